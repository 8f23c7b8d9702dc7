//! Library circulation engine.
//!
//! This crate implements the circulation and inventory-consistency core of a
//! library manager:
//! - an atomic per-book stock counter that never oversells under concurrent
//!   borrow requests,
//! - a borrow/return state machine with compile-time checked transitions,
//! - exactly-once stock restitution when an admin confirms a return,
//! - per-book rating aggregation gated on completed borrows.
//!
//! Storage is pluggable behind the [`storage::Storage`] trait: an in-memory
//! backend for tests and single-process deployments, and a feature-gated
//! PostgreSQL backend for production.
//!
//! # Example
//! ```ignore
//! use circulation::{Circulation, CirculationConfig, InMemoryStorage};
//!
//! let circ = Circulation::new(InMemoryStorage::new(), CirculationConfig::default());
//!
//! let book = circ.add_book(&admin, new_book).await?;
//! let receipt = circ.borrow(&alice, book.id).await?;
//! let ticket = circ.request_return(&alice, receipt.borrow.data.id).await?;
//! circ.confirm_return(&admin, ticket.data.id).await?;
//! circ.rate(&alice, book.id, 4).await?;
//! ```

pub mod auth;
pub mod catalog;
pub mod config;
pub mod error;
pub mod http;
pub mod loan;
pub mod rating;
pub mod service;
pub mod storage;

// Re-export commonly used types
pub use auth::{Principal, Role, StaticTokenVerifier, TokenVerifier, UserId};
pub use catalog::{Book, BookId, NewBook};
pub use config::CirculationConfig;
pub use error::{Error, Result};
pub use http::{router, AppState};
pub use loan::{BorrowId, BorrowSummary, ReturnId, ReturnStatus};
pub use rating::RatingValue;
pub use service::Circulation;
pub use storage::in_memory::InMemoryStorage;
pub use storage::Storage;

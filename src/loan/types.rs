//! Core types for the borrow and return lifecycles.
//!
//! Both lifecycles use the typestate pattern: a `Borrow<Active>` cannot be
//! rated against, a `ReturnTicket<ConfirmedReturn>` cannot be confirmed
//! again, and illegal transitions fail to compile rather than at runtime.

use chrono::{DateTime, Utc};
use serde::Serialize;
use uuid::Uuid;

use crate::auth::UserId;
use crate::catalog::BookId;

/// Unique identifier for a borrow record.
pub type BorrowId = Uuid;

/// Unique identifier for a return ticket.
pub type ReturnId = Uuid;

// ============================================================================
// Borrow lifecycle
// ============================================================================

/// Marker trait for valid borrow states.
pub trait BorrowState: Send + Sync {}

/// A borrow record in state `S`.
///
/// Created only by a successful stock reservation; never deleted.
#[derive(Debug, Clone)]
pub struct Borrow<S: BorrowState> {
    pub state: S,
    pub data: BorrowData,
}

/// Identity of a borrow, shared across its states.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BorrowData {
    pub id: BorrowId,
    pub user_id: UserId,
    pub book_id: BookId,
}

/// The copy is out with the borrower.
#[derive(Debug, Clone)]
pub struct Active {
    pub borrowed_at: DateTime<Utc>,
    pub due_at: DateTime<Utc>,
}

impl BorrowState for Active {}

/// Terminal: the copy has come back and stock was restored.
#[derive(Debug, Clone)]
pub struct Returned {
    pub borrowed_at: DateTime<Utc>,
    pub due_at: DateTime<Utc>,
    pub returned_at: DateTime<Utc>,
}

impl BorrowState for Returned {}

/// A borrow in any state, for storage and queries.
#[derive(Debug, Clone)]
pub enum AnyBorrow {
    Active(Borrow<Active>),
    Returned(Borrow<Returned>),
}

impl AnyBorrow {
    pub fn id(&self) -> BorrowId {
        self.data().id
    }

    pub fn data(&self) -> &BorrowData {
        match self {
            AnyBorrow::Active(b) => &b.data,
            AnyBorrow::Returned(b) => &b.data,
        }
    }

    pub fn is_active(&self) -> bool {
        matches!(self, AnyBorrow::Active(_))
    }

    pub fn as_active(&self) -> Option<&Borrow<Active>> {
        match self {
            AnyBorrow::Active(b) => Some(b),
            AnyBorrow::Returned(_) => None,
        }
    }

    pub fn borrowed_at(&self) -> DateTime<Utc> {
        match self {
            AnyBorrow::Active(b) => b.state.borrowed_at,
            AnyBorrow::Returned(b) => b.state.borrowed_at,
        }
    }

    pub fn due_at(&self) -> DateTime<Utc> {
        match self {
            AnyBorrow::Active(b) => b.state.due_at,
            AnyBorrow::Returned(b) => b.state.due_at,
        }
    }

    pub fn returned_at(&self) -> Option<DateTime<Utc>> {
        match self {
            AnyBorrow::Active(_) => None,
            AnyBorrow::Returned(b) => Some(b.state.returned_at),
        }
    }

    pub fn status(&self) -> BorrowStatus {
        match self {
            AnyBorrow::Active(_) => BorrowStatus::Active,
            AnyBorrow::Returned(_) => BorrowStatus::Returned,
        }
    }
}

impl From<Borrow<Active>> for AnyBorrow {
    fn from(b: Borrow<Active>) -> Self {
        AnyBorrow::Active(b)
    }
}

impl From<Borrow<Returned>> for AnyBorrow {
    fn from(b: Borrow<Returned>) -> Self {
        AnyBorrow::Returned(b)
    }
}

// ============================================================================
// Return lifecycle
// ============================================================================

/// Marker trait for valid return-ticket states.
pub trait ReturnState: Send + Sync {}

/// A return ticket in state `S`, 1:1 with a borrow while pending.
#[derive(Debug, Clone)]
pub struct ReturnTicket<S: ReturnState> {
    pub state: S,
    pub data: ReturnData,
}

/// Identity of a return ticket, shared across its states.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ReturnData {
    pub id: ReturnId,
    pub borrow_id: BorrowId,
}

/// Awaiting admin confirmation; nothing else has changed yet.
#[derive(Debug, Clone)]
pub struct PendingReturn {
    pub requested_at: DateTime<Utc>,
}

impl ReturnState for PendingReturn {}

/// Terminal: the borrow was closed and stock restored in the same unit.
#[derive(Debug, Clone)]
pub struct ConfirmedReturn {
    pub requested_at: DateTime<Utc>,
    pub confirmed_at: DateTime<Utc>,
}

impl ReturnState for ConfirmedReturn {}

/// A return ticket in any state, for storage and queries.
#[derive(Debug, Clone)]
pub enum AnyReturn {
    Pending(ReturnTicket<PendingReturn>),
    Confirmed(ReturnTicket<ConfirmedReturn>),
}

impl AnyReturn {
    pub fn id(&self) -> ReturnId {
        self.data().id
    }

    pub fn data(&self) -> &ReturnData {
        match self {
            AnyReturn::Pending(t) => &t.data,
            AnyReturn::Confirmed(t) => &t.data,
        }
    }

    pub fn is_pending(&self) -> bool {
        matches!(self, AnyReturn::Pending(_))
    }

    pub fn status(&self) -> ReturnStatus {
        match self {
            AnyReturn::Pending(_) => ReturnStatus::Pending,
            AnyReturn::Confirmed(_) => ReturnStatus::Confirmed,
        }
    }
}

impl From<ReturnTicket<PendingReturn>> for AnyReturn {
    fn from(t: ReturnTicket<PendingReturn>) -> Self {
        AnyReturn::Pending(t)
    }
}

impl From<ReturnTicket<ConfirmedReturn>> for AnyReturn {
    fn from(t: ReturnTicket<ConfirmedReturn>) -> Self {
        AnyReturn::Confirmed(t)
    }
}

// ============================================================================
// Derived views
// ============================================================================

/// Borrow status for display.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum BorrowStatus {
    Active,
    Returned,
}

/// Return progress of a borrow, derived from its linked ticket.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum ReturnStatus {
    None,
    Pending,
    Confirmed,
}

/// Read-only projection of a borrow for listings.
#[derive(Debug, Clone, Serialize)]
pub struct BorrowSummary {
    pub id: BorrowId,
    pub user_id: UserId,
    pub book_id: BookId,
    pub book_title: String,
    pub borrowed_at: DateTime<Utc>,
    pub due_at: DateTime<Utc>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub returned_at: Option<DateTime<Utc>>,
    pub status: BorrowStatus,
    pub return_status: ReturnStatus,
    /// Rating the listed user gave this book, if any. Populated for
    /// per-user history views only.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub user_rating: Option<u8>,
}

//! Borrow and return lifecycles.

pub mod transitions;
pub mod types;

pub use types::*;

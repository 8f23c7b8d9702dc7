//! State transitions for borrows and return tickets.
//!
//! Transitions consume the old state, so a closed borrow or a confirmed
//! ticket cannot transition again. The storage backends invoke these inside
//! their atomic composite operations; nothing outside a confirmed return
//! closes a borrow.

use chrono::{DateTime, Utc};

use super::types::{
    Active, Borrow, ConfirmedReturn, PendingReturn, Returned, ReturnTicket,
};

impl Borrow<Active> {
    /// Close the borrow. Only the confirm-return composite calls this; a
    /// borrower never closes their own record.
    pub fn close(self, returned_at: DateTime<Utc>) -> Borrow<Returned> {
        Borrow {
            data: self.data,
            state: Returned {
                borrowed_at: self.state.borrowed_at,
                due_at: self.state.due_at,
                returned_at,
            },
        }
    }
}

impl ReturnTicket<PendingReturn> {
    pub fn confirm(self, confirmed_at: DateTime<Utc>) -> ReturnTicket<ConfirmedReturn> {
        ReturnTicket {
            data: self.data,
            state: ConfirmedReturn {
                requested_at: self.state.requested_at,
                confirmed_at,
            },
        }
    }
}

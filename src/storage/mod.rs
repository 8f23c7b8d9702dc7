use std::future::Future;

use crate::auth::{Principal, UserId};
use crate::catalog::{Book, BookId, NewBook};
use crate::config::CirculationConfig;
use crate::error::Result;
use crate::loan::{
    Active, Borrow, BorrowId, BorrowSummary, ConfirmedReturn, PendingReturn, Returned, ReturnId,
    ReturnTicket,
};
use crate::rating::RatingValue;

pub mod in_memory;

#[cfg(feature = "postgres")]
pub mod postgres;

#[cfg(test)]
mod tests;

/// Outcome of a successful borrow, observed by the same atomic unit that
/// reserved the copy.
#[derive(Debug, Clone)]
pub struct BorrowReceipt {
    pub borrow: Borrow<Active>,
    pub book_title: String,
    pub remaining_stock: u32,
}

/// Outcome of a confirmed return: the confirmed ticket and the closed
/// borrow, applied together with the stock restitution.
#[derive(Debug, Clone)]
pub struct ReturnOutcome {
    pub ticket: ReturnTicket<ConfirmedReturn>,
    pub borrow: Borrow<Returned>,
}

/// Storage trait for catalog, circulation, and rating state.
///
/// Every method that mutates is a single atomic unit: either all its
/// effects are visible or none are. The stock counter in particular is only
/// ever changed inside these operations, which is what makes `stock >= 0`
/// and exactly-once restitution enforceable under concurrent callers.
pub trait Storage: Send + Sync {
    /// Add a book to the catalog, seeding its stock counter.
    fn add_book(&self, book: NewBook) -> impl Future<Output = Result<Book>> + Send;

    fn get_book(&self, id: BookId) -> impl Future<Output = Result<Book>> + Send;

    fn list_books(&self) -> impl Future<Output = Result<Vec<Book>>> + Send;

    /// Borrow a book: one atomic unit that rejects a duplicate active borrow
    /// of the same book (`AlreadyBorrowed`), enforces the active-borrow
    /// limit (`BorrowLimitReached`), reserves a copy (`OutOfStock` /
    /// `NotFound`), and creates the active borrow record. On any failure
    /// nothing is created and stock is unchanged.
    ///
    /// Two concurrent calls for a book with one copy left yield exactly one
    /// success and one `OutOfStock`.
    fn create_borrow(
        &self,
        user_id: UserId,
        book_id: BookId,
        policy: &CirculationConfig,
    ) -> impl Future<Output = Result<BorrowReceipt>> + Send;

    /// Open a return ticket for an active borrow owned by the claimant. The
    /// ownership gate is `Principal::require_owner`, applied inside the same
    /// atomic unit that inspects the borrow.
    ///
    /// # Errors
    /// - `NotFound` - no such borrow
    /// - `NotOwner` - the borrow belongs to someone else
    /// - `InvalidState` - the borrow is already returned
    /// - `AlreadyRequested` - a pending ticket already exists
    fn request_return(
        &self,
        claimant: Principal,
        borrow_id: BorrowId,
    ) -> impl Future<Output = Result<ReturnTicket<PendingReturn>>> + Send;

    /// Confirm a pending return: confirm the ticket, close the borrow, and
    /// release the copy back to stock, all-or-nothing with no visible
    /// intermediate state. A second confirmation of the same ticket fails
    /// with `InvalidState` and never releases stock again.
    fn confirm_return(
        &self,
        return_id: ReturnId,
    ) -> impl Future<Output = Result<ReturnOutcome>> + Send;

    /// All borrows, newest first, with derived return status.
    fn list_borrows(&self) -> impl Future<Output = Result<Vec<BorrowSummary>>> + Send;

    /// One user's borrows, newest first, with derived return status and the
    /// user's own rating where present.
    fn list_borrows_for_user(
        &self,
        user_id: UserId,
    ) -> impl Future<Output = Result<Vec<BorrowSummary>>> + Send;

    /// Record a rating. Eligible only with a returned borrow of the book
    /// (`NotEligible`) and at most once per `(user, book)` (`AlreadyRated`).
    fn add_rating(
        &self,
        user_id: UserId,
        book_id: BookId,
        value: RatingValue,
    ) -> impl Future<Output = Result<()>> + Send;

    /// Arithmetic mean of the book's ratings; `None` with zero ratings.
    /// Pure read. `NotFound` if the book does not exist.
    fn average_rating(&self, book_id: BookId) -> impl Future<Output = Result<Option<f64>>> + Send;
}

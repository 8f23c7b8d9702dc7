//! Workflow layer over a storage backend.
//!
//! `Circulation` is where authorization policy meets the atomic storage
//! operations: each entry point performs exactly one capability check and
//! then delegates to the corresponding storage atomic. It never mutates
//! stock itself; reservation and restitution happen inside the storage
//! composites.

use crate::auth::Principal;
use crate::catalog::{Book, BookId, NewBook};
use crate::config::CirculationConfig;
use crate::error::Result;
use crate::loan::{BorrowId, BorrowSummary, ConfirmedReturn, PendingReturn, ReturnId, ReturnTicket};
use crate::rating::RatingValue;
use crate::storage::{BorrowReceipt, ReturnOutcome, Storage};

#[derive(Clone)]
pub struct Circulation<S> {
    storage: S,
    config: CirculationConfig,
}

impl<S: Storage> Circulation<S> {
    pub fn new(storage: S, config: CirculationConfig) -> Self {
        Self { storage, config }
    }

    pub fn config(&self) -> &CirculationConfig {
        &self.config
    }

    /// Admin inventory entry: catalog a title and seed its stock counter.
    #[tracing::instrument(skip(self, principal, new), fields(user_id = %principal.user_id))]
    pub async fn add_book(&self, principal: &Principal, new: NewBook) -> Result<Book> {
        principal.require_admin()?;
        let book = self.storage.add_book(new).await?;
        tracing::info!(book_id = %book.id, title = %book.title, stock = book.stock(), "book added to catalog");
        Ok(book)
    }

    pub async fn get_book(&self, _principal: &Principal, id: BookId) -> Result<Book> {
        self.storage.get_book(id).await
    }

    pub async fn list_books(&self, _principal: &Principal) -> Result<Vec<Book>> {
        self.storage.list_books().await
    }

    /// Borrow a book for the caller. Reservation, the duplicate-borrow
    /// check, and the active-borrow limit are applied as one atomic unit by
    /// the storage backend.
    #[tracing::instrument(skip(self, principal), fields(user_id = %principal.user_id))]
    pub async fn borrow(&self, principal: &Principal, book_id: BookId) -> Result<BorrowReceipt> {
        let receipt = self
            .storage
            .create_borrow(principal.user_id, book_id, &self.config)
            .await?;
        tracing::info!(
            borrow_id = %receipt.borrow.data.id,
            book_id = %book_id,
            remaining_stock = receipt.remaining_stock,
            "copy reserved"
        );
        Ok(receipt)
    }

    /// Every borrow in the system, with derived return status. Admin only.
    pub async fn list_all_borrows(&self, principal: &Principal) -> Result<Vec<BorrowSummary>> {
        principal.require_admin()?;
        self.storage.list_borrows().await
    }

    /// The caller's own borrow history, including their ratings.
    pub async fn history(&self, principal: &Principal) -> Result<Vec<BorrowSummary>> {
        self.storage.list_borrows_for_user(principal.user_id).await
    }

    /// Open a return ticket for one of the caller's active borrows. The
    /// ownership gate runs inside the storage atomic, against the borrow it
    /// inspects. The borrow and stock are untouched until an admin confirms.
    #[tracing::instrument(skip(self, principal), fields(user_id = %principal.user_id))]
    pub async fn request_return(
        &self,
        principal: &Principal,
        borrow_id: BorrowId,
    ) -> Result<ReturnTicket<PendingReturn>> {
        let ticket = self.storage.request_return(*principal, borrow_id).await?;
        tracing::info!(return_id = %ticket.data.id, borrow_id = %borrow_id, "return requested");
        Ok(ticket)
    }

    /// Confirm a pending return: closes the borrow and restores stock in the
    /// same atomic unit. Admin only.
    #[tracing::instrument(skip(self, principal), fields(user_id = %principal.user_id))]
    pub async fn confirm_return(
        &self,
        principal: &Principal,
        return_id: ReturnId,
    ) -> Result<ReturnTicket<ConfirmedReturn>> {
        principal.require_admin()?;
        let ReturnOutcome { ticket, borrow } = self.storage.confirm_return(return_id).await?;
        tracing::info!(
            return_id = %return_id,
            borrow_id = %borrow.data.id,
            book_id = %borrow.data.book_id,
            "return confirmed, copy released"
        );
        Ok(ticket)
    }

    /// Rate a book the caller has returned. `value` is validated here;
    /// eligibility and uniqueness are checked by the storage backend.
    #[tracing::instrument(skip(self, principal), fields(user_id = %principal.user_id))]
    pub async fn rate(&self, principal: &Principal, book_id: BookId, value: i64) -> Result<()> {
        let value = RatingValue::new(value)?;
        self.storage
            .add_rating(principal.user_id, book_id, value)
            .await
    }

    /// Current average rating of a book; `None` with zero ratings.
    pub async fn average_for(
        &self,
        _principal: &Principal,
        book_id: BookId,
    ) -> Result<Option<f64>> {
        self.storage.average_rating(book_id).await
    }
}

//! In-memory storage backend.
//!
//! All state lives behind a single `parking_lot::RwLock`, so every composite
//! operation is one critical section: the read-check-write on the stock
//! counter, the borrow-plus-reservation, and the three-way confirm-return
//! are each atomic with no visible intermediate state. Suitable for tests
//! and single-process deployments; state is lost on restart.

use std::collections::HashMap;
use std::sync::Arc;

use chrono::Utc;
use parking_lot::RwLock;
use uuid::Uuid;

use crate::auth::{Principal, UserId};
use crate::catalog::{Book, BookId, NewBook};
use crate::config::CirculationConfig;
use crate::error::{Error, Result};
use crate::loan::{
    Active, AnyBorrow, AnyReturn, Borrow, BorrowData, BorrowId, BorrowSummary, PendingReturn,
    ReturnData, ReturnId, ReturnStatus, ReturnTicket,
};
use crate::rating::{self, RatingValue};

use super::{BorrowReceipt, ReturnOutcome, Storage};

#[derive(Default)]
struct State {
    books: HashMap<BookId, Book>,
    borrows: HashMap<BorrowId, AnyBorrow>,
    returns: HashMap<ReturnId, AnyReturn>,
    ratings: HashMap<(UserId, BookId), RatingValue>,
}

impl State {
    fn return_status_of(&self, borrow_id: BorrowId) -> ReturnStatus {
        self.returns
            .values()
            .find(|t| t.data().borrow_id == borrow_id)
            .map(AnyReturn::status)
            .unwrap_or(ReturnStatus::None)
    }

    fn summarize(&self, borrow: &AnyBorrow, with_rating: bool) -> BorrowSummary {
        let data = borrow.data();
        let book_title = self
            .books
            .get(&data.book_id)
            .map(|b| b.title.clone())
            .unwrap_or_default();
        let user_rating = if with_rating {
            self.ratings
                .get(&(data.user_id, data.book_id))
                .map(|r| r.get())
        } else {
            None
        };
        BorrowSummary {
            id: data.id,
            user_id: data.user_id,
            book_id: data.book_id,
            book_title,
            borrowed_at: borrow.borrowed_at(),
            due_at: borrow.due_at(),
            returned_at: borrow.returned_at(),
            status: borrow.status(),
            return_status: self.return_status_of(data.id),
            user_rating,
        }
    }
}

/// In-memory implementation of the [`Storage`] trait.
#[derive(Clone, Default)]
pub struct InMemoryStorage {
    state: Arc<RwLock<State>>,
}

impl InMemoryStorage {
    pub fn new() -> Self {
        Self::default()
    }
}

impl Storage for InMemoryStorage {
    async fn add_book(&self, new: NewBook) -> Result<Book> {
        let book = Book::new(new);
        let mut state = self.state.write();
        state.books.insert(book.id, book.clone());
        Ok(book)
    }

    async fn get_book(&self, id: BookId) -> Result<Book> {
        self.state
            .read()
            .books
            .get(&id)
            .cloned()
            .ok_or(Error::NotFound { resource: "book", id })
    }

    async fn list_books(&self) -> Result<Vec<Book>> {
        let state = self.state.read();
        let mut books: Vec<Book> = state.books.values().cloned().collect();
        books.sort_by(|a, b| b.created_at.cmp(&a.created_at));
        Ok(books)
    }

    async fn create_borrow(
        &self,
        user_id: UserId,
        book_id: BookId,
        policy: &CirculationConfig,
    ) -> Result<BorrowReceipt> {
        let mut state = self.state.write();

        // Book existence is checked before the per-user rules so both
        // backends report NotFound for an unknown id.
        if !state.books.contains_key(&book_id) {
            return Err(Error::NotFound {
                resource: "book",
                id: book_id,
            });
        }

        if state.borrows.values().any(|b| {
            b.is_active() && b.data().user_id == user_id && b.data().book_id == book_id
        }) {
            return Err(Error::AlreadyBorrowed { book_id });
        }

        let active_count = state
            .borrows
            .values()
            .filter(|b| b.is_active() && b.data().user_id == user_id)
            .count();
        if active_count >= policy.max_active_borrows {
            return Err(Error::BorrowLimitReached {
                limit: policy.max_active_borrows,
            });
        }

        let book = state.books.get_mut(&book_id).ok_or(Error::NotFound {
            resource: "book",
            id: book_id,
        })?;
        book.reserve_copy()?;
        let book_title = book.title.clone();
        let remaining_stock = book.stock();

        let now = Utc::now();
        let borrow = Borrow {
            data: BorrowData {
                id: Uuid::new_v4(),
                user_id,
                book_id,
            },
            state: Active {
                borrowed_at: now,
                due_at: now + policy.loan_period,
            },
        };
        state.borrows.insert(borrow.data.id, borrow.clone().into());

        Ok(BorrowReceipt {
            borrow,
            book_title,
            remaining_stock,
        })
    }

    async fn request_return(
        &self,
        claimant: Principal,
        borrow_id: BorrowId,
    ) -> Result<ReturnTicket<PendingReturn>> {
        let mut state = self.state.write();

        let borrow = state.borrows.get(&borrow_id).ok_or(Error::NotFound {
            resource: "borrow",
            id: borrow_id,
        })?;
        claimant.require_owner(borrow.data().user_id)?;
        if !borrow.is_active() {
            return Err(Error::InvalidState(
                "this borrow has already been returned".to_string(),
            ));
        }
        if state
            .returns
            .values()
            .any(|t| t.data().borrow_id == borrow_id && t.is_pending())
        {
            return Err(Error::AlreadyRequested { borrow_id });
        }

        let ticket = ReturnTicket {
            data: ReturnData {
                id: Uuid::new_v4(),
                borrow_id,
            },
            state: PendingReturn {
                requested_at: Utc::now(),
            },
        };
        state.returns.insert(ticket.data.id, ticket.clone().into());
        Ok(ticket)
    }

    async fn confirm_return(&self, return_id: ReturnId) -> Result<ReturnOutcome> {
        let mut state = self.state.write();

        let pending = match state.returns.get(&return_id) {
            None => {
                return Err(Error::NotFound {
                    resource: "return request",
                    id: return_id,
                })
            }
            Some(AnyReturn::Confirmed(_)) => {
                return Err(Error::InvalidState(
                    "this return has already been confirmed".to_string(),
                ))
            }
            Some(AnyReturn::Pending(t)) => t.clone(),
        };

        let borrow_id = pending.data.borrow_id;
        let active = match state.borrows.get(&borrow_id) {
            Some(AnyBorrow::Active(b)) => b.clone(),
            _ => {
                return Err(Error::InvalidState(
                    "the borrow linked to this return is not active".to_string(),
                ))
            }
        };

        let book_id = active.data.book_id;
        let book = state.books.get_mut(&book_id).ok_or(Error::NotFound {
            resource: "book",
            id: book_id,
        })?;

        // All checks passed; the three effects land under the same lock.
        book.release_copy();
        let now = Utc::now();
        let ticket = pending.confirm(now);
        let borrow = active.close(now);
        state.returns.insert(return_id, ticket.clone().into());
        state.borrows.insert(borrow_id, borrow.clone().into());

        Ok(ReturnOutcome { ticket, borrow })
    }

    async fn list_borrows(&self) -> Result<Vec<BorrowSummary>> {
        let state = self.state.read();
        let mut rows: Vec<BorrowSummary> = state
            .borrows
            .values()
            .map(|b| state.summarize(b, false))
            .collect();
        rows.sort_by(|a, b| b.borrowed_at.cmp(&a.borrowed_at));
        Ok(rows)
    }

    async fn list_borrows_for_user(&self, user_id: UserId) -> Result<Vec<BorrowSummary>> {
        let state = self.state.read();
        let mut rows: Vec<BorrowSummary> = state
            .borrows
            .values()
            .filter(|b| b.data().user_id == user_id)
            .map(|b| state.summarize(b, true))
            .collect();
        rows.sort_by(|a, b| b.borrowed_at.cmp(&a.borrowed_at));
        Ok(rows)
    }

    async fn add_rating(
        &self,
        user_id: UserId,
        book_id: BookId,
        value: RatingValue,
    ) -> Result<()> {
        let mut state = self.state.write();

        let eligible = state
            .borrows
            .values()
            .any(|b| !b.is_active() && b.data().user_id == user_id && b.data().book_id == book_id);
        if !eligible {
            return Err(Error::NotEligible);
        }
        if state.ratings.contains_key(&(user_id, book_id)) {
            return Err(Error::AlreadyRated);
        }

        state.ratings.insert((user_id, book_id), value);
        Ok(())
    }

    async fn average_rating(&self, book_id: BookId) -> Result<Option<f64>> {
        let state = self.state.read();
        if !state.books.contains_key(&book_id) {
            return Err(Error::NotFound {
                resource: "book",
                id: book_id,
            });
        }
        Ok(rating::mean(
            state
                .ratings
                .iter()
                .filter(|((_, b), _)| *b == book_id)
                .map(|(_, v)| *v),
        ))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample_book(stock: u32) -> NewBook {
        NewBook {
            title: "Dune".to_string(),
            author: "Frank Herbert".to_string(),
            category_id: None,
            description: "Arrakis".to_string(),
            image_ref: None,
            stock,
        }
    }

    #[tokio::test]
    async fn clones_share_the_same_state() {
        let storage = InMemoryStorage::new();
        let handle = storage.clone();
        let book = storage.add_book(sample_book(3)).await.unwrap();

        assert_eq!(handle.get_book(book.id).await.unwrap().stock(), 3);
    }

    #[tokio::test]
    async fn books_list_newest_first() {
        let storage = InMemoryStorage::new();
        for _ in 0..3 {
            storage.add_book(sample_book(1)).await.unwrap();
        }

        let books = storage.list_books().await.unwrap();
        assert!(books.windows(2).all(|w| w[0].created_at >= w[1].created_at));
    }
}

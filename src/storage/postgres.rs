//! PostgreSQL storage backend.
//!
//! Every composite operation runs in one transaction. The book row is
//! locked first wherever stock is touched, then the guarded ticket and
//! borrow updates follow, so concurrent borrows and confirmations serialize
//! per book without cyclic waits. A transaction dropped before commit rolls
//! back; there is no manual rollback code.

use anyhow::anyhow;
use chrono::{DateTime, Utc};
use sqlx::postgres::{PgPool, PgRow};
use sqlx::Row;
use uuid::Uuid;

use crate::auth::{Principal, UserId};
use crate::catalog::{Book, BookId, NewBook};
use crate::config::CirculationConfig;
use crate::error::{Error, Result};
use crate::loan::{
    Active, Borrow, BorrowData, BorrowId, BorrowStatus, BorrowSummary, PendingReturn, ReturnData,
    ReturnId, ReturnStatus, ReturnTicket,
};
use crate::rating::RatingValue;

use super::{BorrowReceipt, ReturnOutcome, Storage};

/// PostgreSQL implementation of the [`Storage`] trait.
#[derive(Clone)]
pub struct PostgresStorage {
    pool: PgPool,
}

impl PostgresStorage {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    pub fn pool(&self) -> &PgPool {
        &self.pool
    }

    /// Apply the embedded migrations.
    pub async fn migrate(&self) -> Result<()> {
        sqlx::migrate!()
            .run(&self.pool)
            .await
            .map_err(|e| Error::Other(anyhow!("migration failed: {e}")))
    }
}

fn book_from_row(row: &PgRow) -> Result<Book> {
    let stock: i32 = row.try_get("stock")?;
    Ok(Book::from_stored(
        row.try_get("id")?,
        row.try_get("title")?,
        row.try_get("author")?,
        row.try_get("category_id")?,
        row.try_get("description")?,
        row.try_get("image_ref")?,
        row.try_get("created_at")?,
        u32::try_from(stock).map_err(|_| anyhow!("negative stock in books row"))?,
    ))
}

fn summary_from_row(row: &PgRow) -> Result<BorrowSummary> {
    let status = match row.try_get::<&str, _>("status")? {
        "active" => BorrowStatus::Active,
        "returned" => BorrowStatus::Returned,
        other => return Err(Error::Other(anyhow!("unknown borrow status {other:?}"))),
    };
    let return_status = match row.try_get::<Option<&str>, _>("return_status")? {
        None => ReturnStatus::None,
        Some("pending") => ReturnStatus::Pending,
        Some("confirmed") => ReturnStatus::Confirmed,
        Some(other) => return Err(Error::Other(anyhow!("unknown return status {other:?}"))),
    };
    let user_rating = row
        .try_get::<Option<i16>, _>("user_rating")
        .unwrap_or(None)
        .map(|v| v as u8);
    Ok(BorrowSummary {
        id: row.try_get("id")?,
        user_id: row.try_get("user_id")?,
        book_id: row.try_get("book_id")?,
        book_title: row.try_get("book_title")?,
        borrowed_at: row.try_get("borrowed_at")?,
        due_at: row.try_get("due_at")?,
        returned_at: row.try_get("returned_at")?,
        status,
        return_status,
        user_rating,
    })
}

impl Storage for PostgresStorage {
    async fn add_book(&self, new: NewBook) -> Result<Book> {
        let book = Book::new(new);
        sqlx::query(
            r#"
            INSERT INTO books (id, title, author, category_id, description, image_ref, created_at, stock)
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8)
            "#,
        )
        .bind(book.id)
        .bind(&book.title)
        .bind(&book.author)
        .bind(book.category_id)
        .bind(&book.description)
        .bind(&book.image_ref)
        .bind(book.created_at)
        .bind(book.stock() as i32)
        .execute(&self.pool)
        .await?;
        Ok(book)
    }

    async fn get_book(&self, id: BookId) -> Result<Book> {
        let row = sqlx::query(
            "SELECT id, title, author, category_id, description, image_ref, created_at, stock \
             FROM books WHERE id = $1",
        )
        .bind(id)
        .fetch_optional(&self.pool)
        .await?
        .ok_or(Error::NotFound { resource: "book", id })?;
        book_from_row(&row)
    }

    async fn list_books(&self) -> Result<Vec<Book>> {
        let rows = sqlx::query(
            "SELECT id, title, author, category_id, description, image_ref, created_at, stock \
             FROM books ORDER BY created_at DESC",
        )
        .fetch_all(&self.pool)
        .await?;
        rows.iter().map(book_from_row).collect()
    }

    async fn create_borrow(
        &self,
        user_id: UserId,
        book_id: BookId,
        policy: &CirculationConfig,
    ) -> Result<BorrowReceipt> {
        let mut tx = self.pool.begin().await?;

        // Lock the book row first; every borrow of this book serializes here.
        let book_row = sqlx::query("SELECT title, stock FROM books WHERE id = $1 FOR UPDATE")
            .bind(book_id)
            .fetch_optional(&mut *tx)
            .await?
            .ok_or(Error::NotFound {
                resource: "book",
                id: book_id,
            })?;
        let book_title: String = book_row.try_get("title")?;
        let stock: i32 = book_row.try_get("stock")?;

        let duplicate: bool = sqlx::query_scalar(
            "SELECT EXISTS(SELECT 1 FROM borrows \
             WHERE user_id = $1 AND book_id = $2 AND status = 'active')",
        )
        .bind(user_id)
        .bind(book_id)
        .fetch_one(&mut *tx)
        .await?;
        if duplicate {
            return Err(Error::AlreadyBorrowed { book_id });
        }

        let active_count: i64 = sqlx::query_scalar(
            "SELECT COUNT(*) FROM borrows WHERE user_id = $1 AND status = 'active'",
        )
        .bind(user_id)
        .fetch_one(&mut *tx)
        .await?;
        if active_count as usize >= policy.max_active_borrows {
            return Err(Error::BorrowLimitReached {
                limit: policy.max_active_borrows,
            });
        }

        if stock <= 0 {
            return Err(Error::OutOfStock { book_id });
        }
        sqlx::query("UPDATE books SET stock = stock - 1 WHERE id = $1")
            .bind(book_id)
            .execute(&mut *tx)
            .await?;

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
        sqlx::query(
            "INSERT INTO borrows (id, user_id, book_id, status, borrowed_at, due_at) \
             VALUES ($1, $2, $3, 'active', $4, $5)",
        )
        .bind(borrow.data.id)
        .bind(user_id)
        .bind(book_id)
        .bind(borrow.state.borrowed_at)
        .bind(borrow.state.due_at)
        .execute(&mut *tx)
        .await?;

        tx.commit().await?;
        Ok(BorrowReceipt {
            borrow,
            book_title,
            remaining_stock: u32::try_from(stock - 1)
                .map_err(|_| anyhow!("negative stock in books row"))?,
        })
    }

    async fn request_return(
        &self,
        claimant: Principal,
        borrow_id: BorrowId,
    ) -> Result<ReturnTicket<PendingReturn>> {
        let mut tx = self.pool.begin().await?;

        let borrow_row =
            sqlx::query("SELECT user_id, status FROM borrows WHERE id = $1 FOR UPDATE")
                .bind(borrow_id)
                .fetch_optional(&mut *tx)
                .await?
                .ok_or(Error::NotFound {
                    resource: "borrow",
                    id: borrow_id,
                })?;
        claimant.require_owner(borrow_row.try_get("user_id")?)?;
        if borrow_row.try_get::<&str, _>("status")? != "active" {
            return Err(Error::InvalidState(
                "this borrow has already been returned".to_string(),
            ));
        }

        let pending_exists: bool = sqlx::query_scalar(
            "SELECT EXISTS(SELECT 1 FROM returns WHERE borrow_id = $1 AND status = 'pending')",
        )
        .bind(borrow_id)
        .fetch_one(&mut *tx)
        .await?;
        if pending_exists {
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
        sqlx::query(
            "INSERT INTO returns (id, borrow_id, status, requested_at) \
             VALUES ($1, $2, 'pending', $3)",
        )
        .bind(ticket.data.id)
        .bind(borrow_id)
        .bind(ticket.state.requested_at)
        .execute(&mut *tx)
        .await?;

        tx.commit().await?;
        Ok(ticket)
    }

    async fn confirm_return(&self, return_id: ReturnId) -> Result<ReturnOutcome> {
        let mut tx = self.pool.begin().await?;

        let ticket_row = sqlx::query(
            "SELECT borrow_id, status, requested_at FROM returns WHERE id = $1",
        )
        .bind(return_id)
        .fetch_optional(&mut *tx)
        .await?
        .ok_or(Error::NotFound {
            resource: "return request",
            id: return_id,
        })?;
        if ticket_row.try_get::<&str, _>("status")? != "pending" {
            return Err(Error::InvalidState(
                "this return has already been confirmed".to_string(),
            ));
        }
        let borrow_id: Uuid = ticket_row.try_get("borrow_id")?;
        let requested_at: DateTime<Utc> = ticket_row.try_get("requested_at")?;

        let borrow_row = sqlx::query(
            "SELECT user_id, book_id, borrowed_at, due_at, status FROM borrows WHERE id = $1",
        )
        .bind(borrow_id)
        .fetch_optional(&mut *tx)
        .await?
        .ok_or(Error::NotFound {
            resource: "borrow",
            id: borrow_id,
        })?;
        if borrow_row.try_get::<&str, _>("status")? != "active" {
            return Err(Error::InvalidState(
                "the borrow linked to this return is not active".to_string(),
            ));
        }
        let book_id: Uuid = borrow_row.try_get("book_id")?;

        // Fixed acquisition order: the book row is locked first, then the
        // guarded ticket and borrow updates run.
        sqlx::query("SELECT 1 FROM books WHERE id = $1 FOR UPDATE")
            .bind(book_id)
            .fetch_optional(&mut *tx)
            .await?
            .ok_or(Error::NotFound {
                resource: "book",
                id: book_id,
            })?;

        let now = Utc::now();

        // Guarded updates: a concurrent confirmation that won the race makes
        // these touch zero rows, and the whole transaction aborts.
        let confirmed = sqlx::query(
            "UPDATE returns SET status = 'confirmed', confirmed_at = $2 \
             WHERE id = $1 AND status = 'pending'",
        )
        .bind(return_id)
        .bind(now)
        .execute(&mut *tx)
        .await?
        .rows_affected();
        if confirmed == 0 {
            return Err(Error::InvalidState(
                "this return has already been confirmed".to_string(),
            ));
        }

        let closed = sqlx::query(
            "UPDATE borrows SET status = 'returned', returned_at = $2 \
             WHERE id = $1 AND status = 'active'",
        )
        .bind(borrow_id)
        .bind(now)
        .execute(&mut *tx)
        .await?
        .rows_affected();
        if closed == 0 {
            return Err(Error::InvalidState(
                "the borrow linked to this return is not active".to_string(),
            ));
        }

        sqlx::query("UPDATE books SET stock = stock + 1 WHERE id = $1")
            .bind(book_id)
            .execute(&mut *tx)
            .await?;

        tx.commit().await?;

        let active = Borrow {
            data: BorrowData {
                id: borrow_id,
                user_id: borrow_row.try_get("user_id")?,
                book_id,
            },
            state: Active {
                borrowed_at: borrow_row.try_get("borrowed_at")?,
                due_at: borrow_row.try_get("due_at")?,
            },
        };
        let pending = ReturnTicket {
            data: ReturnData {
                id: return_id,
                borrow_id,
            },
            state: PendingReturn { requested_at },
        };
        Ok(ReturnOutcome {
            ticket: pending.confirm(now),
            borrow: active.close(now),
        })
    }

    async fn list_borrows(&self) -> Result<Vec<BorrowSummary>> {
        let rows = sqlx::query(
            r#"
            SELECT b.id, b.user_id, b.book_id, bk.title AS book_title,
                   b.borrowed_at, b.due_at, b.returned_at, b.status,
                   r.status AS return_status
            FROM borrows b
            JOIN books bk ON bk.id = b.book_id
            LEFT JOIN returns r ON r.borrow_id = b.id
            ORDER BY b.borrowed_at DESC
            "#,
        )
        .fetch_all(&self.pool)
        .await?;
        rows.iter().map(summary_from_row).collect()
    }

    async fn list_borrows_for_user(&self, user_id: UserId) -> Result<Vec<BorrowSummary>> {
        let rows = sqlx::query(
            r#"
            SELECT b.id, b.user_id, b.book_id, bk.title AS book_title,
                   b.borrowed_at, b.due_at, b.returned_at, b.status,
                   r.status AS return_status,
                   rt.value AS user_rating
            FROM borrows b
            JOIN books bk ON bk.id = b.book_id
            LEFT JOIN returns r ON r.borrow_id = b.id
            LEFT JOIN ratings rt ON rt.user_id = b.user_id AND rt.book_id = b.book_id
            WHERE b.user_id = $1
            ORDER BY b.borrowed_at DESC
            "#,
        )
        .bind(user_id)
        .fetch_all(&self.pool)
        .await?;
        rows.iter().map(summary_from_row).collect()
    }

    async fn add_rating(
        &self,
        user_id: UserId,
        book_id: BookId,
        value: RatingValue,
    ) -> Result<()> {
        let mut tx = self.pool.begin().await?;

        let eligible: bool = sqlx::query_scalar(
            "SELECT EXISTS(SELECT 1 FROM borrows \
             WHERE user_id = $1 AND book_id = $2 AND status = 'returned')",
        )
        .bind(user_id)
        .bind(book_id)
        .fetch_one(&mut *tx)
        .await?;
        if !eligible {
            return Err(Error::NotEligible);
        }

        // The unique constraint on (user_id, book_id) is the arbiter; losing
        // an insert race surfaces as AlreadyRated, never as a duplicate row.
        let inserted = sqlx::query(
            "INSERT INTO ratings (user_id, book_id, value) VALUES ($1, $2, $3) \
             ON CONFLICT (user_id, book_id) DO NOTHING",
        )
        .bind(user_id)
        .bind(book_id)
        .bind(i16::from(value.get()))
        .execute(&mut *tx)
        .await?
        .rows_affected();
        if inserted == 0 {
            return Err(Error::AlreadyRated);
        }

        tx.commit().await?;
        Ok(())
    }

    async fn average_rating(&self, book_id: BookId) -> Result<Option<f64>> {
        let exists: bool = sqlx::query_scalar("SELECT EXISTS(SELECT 1 FROM books WHERE id = $1)")
            .bind(book_id)
            .fetch_one(&self.pool)
            .await?;
        if !exists {
            return Err(Error::NotFound {
                resource: "book",
                id: book_id,
            });
        }

        let avg: Option<f64> =
            sqlx::query_scalar("SELECT AVG(value)::float8 FROM ratings WHERE book_id = $1")
                .bind(book_id)
                .fetch_one(&self.pool)
                .await?;
        Ok(avg)
    }
}

//! Book records and the stock counter.
//!
//! The stock field is private on purpose: [`Book::reserve_copy`] and
//! [`Book::release_copy`] are the only mutations of stock anywhere in the
//! crate. Workflows go through the storage backends, which call these two
//! methods inside their own critical sections, so the `stock >= 0` invariant
//! is enforced in exactly one place.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::error::{Error, Result};

/// Unique identifier for a book title.
pub type BookId = Uuid;

/// A catalogued book title with its available-copy counter.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Book {
    pub id: BookId,
    pub title: String,
    pub author: String,
    pub category_id: Option<Uuid>,
    pub description: String,
    pub image_ref: Option<String>,
    pub created_at: DateTime<Utc>,
    stock: u32,
}

/// Payload for adding a book to the catalog (admin inventory entry).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NewBook {
    pub title: String,
    pub author: String,
    #[serde(default)]
    pub category_id: Option<Uuid>,
    #[serde(default)]
    pub description: String,
    #[serde(default)]
    pub image_ref: Option<String>,
    pub stock: u32,
}

impl Book {
    pub fn new(new: NewBook) -> Self {
        Self {
            id: Uuid::new_v4(),
            title: new.title,
            author: new.author,
            category_id: new.category_id,
            description: new.description,
            image_ref: new.image_ref,
            created_at: Utc::now(),
            stock: new.stock,
        }
    }

    /// Rehydrate a book from persisted state. For storage backends.
    #[allow(clippy::too_many_arguments)]
    pub fn from_stored(
        id: BookId,
        title: String,
        author: String,
        category_id: Option<Uuid>,
        description: String,
        image_ref: Option<String>,
        created_at: DateTime<Utc>,
        stock: u32,
    ) -> Self {
        Self {
            id,
            title,
            author,
            category_id,
            description,
            image_ref,
            created_at,
            stock,
        }
    }

    pub fn stock(&self) -> u32 {
        self.stock
    }

    /// Atomically take one copy. Fails with `OutOfStock` when none are left;
    /// callers must hold whatever lock serializes this book.
    pub(crate) fn reserve_copy(&mut self) -> Result<()> {
        if self.stock == 0 {
            return Err(Error::OutOfStock { book_id: self.id });
        }
        self.stock -= 1;
        Ok(())
    }

    /// Put one copy back. Called exactly once per confirmed return by the
    /// return workflow; not deduplicated here.
    pub(crate) fn release_copy(&mut self) {
        self.stock += 1;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn book(stock: u32) -> Book {
        Book::new(NewBook {
            title: "The Rust Programming Language".into(),
            author: "Klabnik & Nichols".into(),
            category_id: None,
            description: String::new(),
            image_ref: None,
            stock,
        })
    }

    #[test]
    fn reserve_decrements_until_empty() {
        let mut b = book(2);
        assert!(b.reserve_copy().is_ok());
        assert!(b.reserve_copy().is_ok());
        assert_eq!(b.stock(), 0);
        assert!(matches!(
            b.reserve_copy(),
            Err(Error::OutOfStock { book_id }) if book_id == b.id
        ));
        assert_eq!(b.stock(), 0);
    }

    #[test]
    fn release_restores_a_copy() {
        let mut b = book(1);
        b.reserve_copy().unwrap();
        b.release_copy();
        assert_eq!(b.stock(), 1);
    }
}

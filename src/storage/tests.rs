use rstest::{fixture, rstest};
use uuid::Uuid;

use crate::auth::{Principal, Role, UserId};
use crate::catalog::NewBook;
use crate::config::CirculationConfig;
use crate::error::Error;
use crate::loan::ReturnStatus;
use crate::rating::RatingValue;
use crate::storage::{in_memory::InMemoryStorage, Storage};

#[cfg(feature = "postgres")]
use crate::storage::postgres::PostgresStorage;

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

fn student(user_id: UserId) -> Principal {
    Principal {
        user_id,
        role: Role::Student,
    }
}

fn policy() -> CirculationConfig {
    CirculationConfig::default()
}

#[fixture]
fn in_memory_storage() -> InMemoryStorage {
    InMemoryStorage::new()
}

async fn run_borrow_reserves_a_copy<S: Storage>(storage: &S) {
    let user = Uuid::new_v4();
    let book = storage.add_book(sample_book(2)).await.unwrap();

    let receipt = storage.create_borrow(user, book.id, &policy()).await.unwrap();

    assert_eq!(receipt.book_title, "Dune");
    assert_eq!(receipt.remaining_stock, 1);
    assert_eq!(receipt.borrow.data.user_id, user);
    assert_eq!(
        receipt.borrow.state.due_at - receipt.borrow.state.borrowed_at,
        policy().loan_period
    );
    assert_eq!(storage.get_book(book.id).await.unwrap().stock(), 1);
}

#[rstest]
#[tokio::test]
async fn borrow_reserves_a_copy(in_memory_storage: InMemoryStorage) {
    run_borrow_reserves_a_copy(&in_memory_storage).await;
}

#[cfg(feature = "postgres")]
#[sqlx::test]
async fn borrow_reserves_a_copy_postgres(pool: sqlx::PgPool) {
    run_borrow_reserves_a_copy(&PostgresStorage::new(pool)).await;
}

// An unknown book id reports NotFound no matter how many borrows the user
// already holds; the per-user rules never shadow the lookup.
async fn run_unknown_book_is_not_found_even_at_the_limit<S: Storage>(storage: &S) {
    let user = Uuid::new_v4();

    let result = storage.create_borrow(user, Uuid::new_v4(), &policy()).await;
    assert!(matches!(result, Err(Error::NotFound { resource: "book", .. })));

    for _ in 0..policy().max_active_borrows {
        let book = storage.add_book(sample_book(1)).await.unwrap();
        storage.create_borrow(user, book.id, &policy()).await.unwrap();
    }
    let result = storage.create_borrow(user, Uuid::new_v4(), &policy()).await;
    assert!(matches!(result, Err(Error::NotFound { resource: "book", .. })));
}

#[rstest]
#[tokio::test]
async fn unknown_book_is_not_found_even_at_the_limit(in_memory_storage: InMemoryStorage) {
    run_unknown_book_is_not_found_even_at_the_limit(&in_memory_storage).await;
}

#[cfg(feature = "postgres")]
#[sqlx::test]
async fn unknown_book_is_not_found_even_at_the_limit_postgres(pool: sqlx::PgPool) {
    run_unknown_book_is_not_found_even_at_the_limit(&PostgresStorage::new(pool)).await;
}

async fn run_duplicate_active_borrow_is_rejected<S: Storage>(storage: &S) {
    let user = Uuid::new_v4();
    let book = storage.add_book(sample_book(5)).await.unwrap();

    storage.create_borrow(user, book.id, &policy()).await.unwrap();
    let second = storage.create_borrow(user, book.id, &policy()).await;

    assert!(matches!(second, Err(Error::AlreadyBorrowed { .. })));
    // The failed attempt must not touch stock.
    assert_eq!(storage.get_book(book.id).await.unwrap().stock(), 4);
}

#[rstest]
#[tokio::test]
async fn duplicate_active_borrow_is_rejected(in_memory_storage: InMemoryStorage) {
    run_duplicate_active_borrow_is_rejected(&in_memory_storage).await;
}

#[cfg(feature = "postgres")]
#[sqlx::test]
async fn duplicate_active_borrow_is_rejected_postgres(pool: sqlx::PgPool) {
    run_duplicate_active_borrow_is_rejected(&PostgresStorage::new(pool)).await;
}

async fn run_active_borrow_limit_is_enforced<S: Storage>(storage: &S) {
    let user = Uuid::new_v4();
    let mut books = Vec::new();
    for _ in 0..4 {
        books.push(storage.add_book(sample_book(1)).await.unwrap());
    }

    for book in &books[..3] {
        storage.create_borrow(user, book.id, &policy()).await.unwrap();
    }
    let fourth = storage.create_borrow(user, books[3].id, &policy()).await;

    assert!(matches!(fourth, Err(Error::BorrowLimitReached { limit: 3 })));
    assert_eq!(storage.get_book(books[3].id).await.unwrap().stock(), 1);
}

#[rstest]
#[tokio::test]
async fn active_borrow_limit_is_enforced(in_memory_storage: InMemoryStorage) {
    run_active_borrow_limit_is_enforced(&in_memory_storage).await;
}

#[cfg(feature = "postgres")]
#[sqlx::test]
async fn active_borrow_limit_is_enforced_postgres(pool: sqlx::PgPool) {
    run_active_borrow_limit_is_enforced(&PostgresStorage::new(pool)).await;
}

// Two racing borrows of the last copy: exactly one wins, stock never goes
// negative. In the Postgres backend this exercises the FOR UPDATE
// serialization on the book row.
async fn run_concurrent_last_copy_oversells_nothing<S>(storage: &S)
where
    S: Storage + Clone + Send + Sync + 'static,
{
    let book = storage.add_book(sample_book(1)).await.unwrap();

    let (a, b) = (Uuid::new_v4(), Uuid::new_v4());
    let s1 = storage.clone();
    let s2 = storage.clone();
    let book_id = book.id;
    let t1 = tokio::spawn(async move { s1.create_borrow(a, book_id, &policy()).await });
    let t2 = tokio::spawn(async move { s2.create_borrow(b, book_id, &policy()).await });

    let results = [t1.await.unwrap(), t2.await.unwrap()];
    let successes = results.iter().filter(|r| r.is_ok()).count();
    let out_of_stock = results
        .iter()
        .filter(|r| matches!(r, Err(Error::OutOfStock { .. })))
        .count();

    assert_eq!(successes, 1);
    assert_eq!(out_of_stock, 1);
    assert_eq!(storage.get_book(book.id).await.unwrap().stock(), 0);
}

#[rstest]
#[tokio::test]
async fn concurrent_last_copy_oversells_nothing(in_memory_storage: InMemoryStorage) {
    run_concurrent_last_copy_oversells_nothing(&in_memory_storage).await;
}

#[cfg(feature = "postgres")]
#[sqlx::test]
async fn concurrent_last_copy_oversells_nothing_postgres(pool: sqlx::PgPool) {
    run_concurrent_last_copy_oversells_nothing(&PostgresStorage::new(pool)).await;
}

async fn run_return_request_requires_ownership_and_an_active_borrow<S: Storage>(storage: &S) {
    let owner = Uuid::new_v4();
    let stranger = Uuid::new_v4();
    let book = storage.add_book(sample_book(1)).await.unwrap();
    let receipt = storage.create_borrow(owner, book.id, &policy()).await.unwrap();
    let borrow_id = receipt.borrow.data.id;

    assert!(matches!(
        storage.request_return(student(stranger), borrow_id).await,
        Err(Error::NotOwner)
    ));
    assert!(matches!(
        storage.request_return(student(owner), Uuid::new_v4()).await,
        Err(Error::NotFound { resource: "borrow", .. })
    ));

    let ticket = storage.request_return(student(owner), borrow_id).await.unwrap();
    assert!(matches!(
        storage.request_return(student(owner), borrow_id).await,
        Err(Error::AlreadyRequested { .. })
    ));

    // After confirmation the borrow is closed; a fresh request is illegal.
    storage.confirm_return(ticket.data.id).await.unwrap();
    assert!(matches!(
        storage.request_return(student(owner), borrow_id).await,
        Err(Error::InvalidState(_))
    ));
}

#[rstest]
#[tokio::test]
async fn return_request_requires_ownership_and_an_active_borrow(
    in_memory_storage: InMemoryStorage,
) {
    run_return_request_requires_ownership_and_an_active_borrow(&in_memory_storage).await;
}

#[cfg(feature = "postgres")]
#[sqlx::test]
async fn return_request_requires_ownership_and_an_active_borrow_postgres(pool: sqlx::PgPool) {
    run_return_request_requires_ownership_and_an_active_borrow(&PostgresStorage::new(pool)).await;
}

// The exactly-once restitution path: confirming releases the copy once, a
// second confirmation fails and never releases it again. In the Postgres
// backend this is the guarded status = 'pending' update.
async fn run_confirm_restores_stock_exactly_once<S: Storage>(storage: &S) {
    let user = Uuid::new_v4();
    let book = storage.add_book(sample_book(1)).await.unwrap();
    let receipt = storage.create_borrow(user, book.id, &policy()).await.unwrap();
    let ticket = storage
        .request_return(student(user), receipt.borrow.data.id)
        .await
        .unwrap();

    // Requesting alone must not touch the borrow or stock.
    assert_eq!(storage.get_book(book.id).await.unwrap().stock(), 0);

    let outcome = storage.confirm_return(ticket.data.id).await.unwrap();
    assert_eq!(outcome.borrow.data.id, receipt.borrow.data.id);
    assert_eq!(storage.get_book(book.id).await.unwrap().stock(), 1);

    // Double confirmation fails deterministically and stock stays put.
    assert!(matches!(
        storage.confirm_return(ticket.data.id).await,
        Err(Error::InvalidState(_))
    ));
    assert_eq!(storage.get_book(book.id).await.unwrap().stock(), 1);

    assert!(matches!(
        storage.confirm_return(Uuid::new_v4()).await,
        Err(Error::NotFound { resource: "return request", .. })
    ));
}

#[rstest]
#[tokio::test]
async fn confirm_restores_stock_exactly_once(in_memory_storage: InMemoryStorage) {
    run_confirm_restores_stock_exactly_once(&in_memory_storage).await;
}

#[cfg(feature = "postgres")]
#[sqlx::test]
async fn confirm_restores_stock_exactly_once_postgres(pool: sqlx::PgPool) {
    run_confirm_restores_stock_exactly_once(&PostgresStorage::new(pool)).await;
}

async fn run_rating_is_gated_on_a_completed_borrow<S: Storage>(storage: &S) {
    let user = Uuid::new_v4();
    let book = storage.add_book(sample_book(1)).await.unwrap();
    let four = RatingValue::new(4).unwrap();

    // No borrow yet.
    assert!(matches!(
        storage.add_rating(user, book.id, four).await,
        Err(Error::NotEligible)
    ));

    // Active borrow is still not enough.
    let receipt = storage.create_borrow(user, book.id, &policy()).await.unwrap();
    assert!(matches!(
        storage.add_rating(user, book.id, four).await,
        Err(Error::NotEligible)
    ));

    let ticket = storage
        .request_return(student(user), receipt.borrow.data.id)
        .await
        .unwrap();
    storage.confirm_return(ticket.data.id).await.unwrap();

    storage.add_rating(user, book.id, four).await.unwrap();
    assert!(matches!(
        storage.add_rating(user, book.id, four).await,
        Err(Error::AlreadyRated)
    ));
}

#[rstest]
#[tokio::test]
async fn rating_is_gated_on_a_completed_borrow(in_memory_storage: InMemoryStorage) {
    run_rating_is_gated_on_a_completed_borrow(&in_memory_storage).await;
}

#[cfg(feature = "postgres")]
#[sqlx::test]
async fn rating_is_gated_on_a_completed_borrow_postgres(pool: sqlx::PgPool) {
    run_rating_is_gated_on_a_completed_borrow(&PostgresStorage::new(pool)).await;
}

async fn run_average_is_the_mean_and_none_without_ratings<S: Storage>(storage: &S) {
    let book = storage.add_book(sample_book(5)).await.unwrap();
    assert_eq!(storage.average_rating(book.id).await.unwrap(), None);

    for value in [5, 3] {
        let user = Uuid::new_v4();
        let receipt = storage.create_borrow(user, book.id, &policy()).await.unwrap();
        let ticket = storage
            .request_return(student(user), receipt.borrow.data.id)
            .await
            .unwrap();
        storage.confirm_return(ticket.data.id).await.unwrap();
        storage
            .add_rating(user, book.id, RatingValue::new(value).unwrap())
            .await
            .unwrap();
    }

    assert_eq!(storage.average_rating(book.id).await.unwrap(), Some(4.0));
    assert!(matches!(
        storage.average_rating(Uuid::new_v4()).await,
        Err(Error::NotFound { .. })
    ));
}

#[rstest]
#[tokio::test]
async fn average_is_the_mean_and_none_without_ratings(in_memory_storage: InMemoryStorage) {
    run_average_is_the_mean_and_none_without_ratings(&in_memory_storage).await;
}

#[cfg(feature = "postgres")]
#[sqlx::test]
async fn average_is_the_mean_and_none_without_ratings_postgres(pool: sqlx::PgPool) {
    run_average_is_the_mean_and_none_without_ratings(&PostgresStorage::new(pool)).await;
}

async fn run_history_carries_return_status_and_own_rating<S: Storage>(storage: &S) {
    let user = Uuid::new_v4();
    let book = storage.add_book(sample_book(1)).await.unwrap();
    let receipt = storage.create_borrow(user, book.id, &policy()).await.unwrap();

    let history = storage.list_borrows_for_user(user).await.unwrap();
    assert_eq!(history.len(), 1);
    assert_eq!(history[0].return_status, ReturnStatus::None);
    assert_eq!(history[0].user_rating, None);

    let ticket = storage
        .request_return(student(user), receipt.borrow.data.id)
        .await
        .unwrap();
    let history = storage.list_borrows_for_user(user).await.unwrap();
    assert_eq!(history[0].return_status, ReturnStatus::Pending);

    storage.confirm_return(ticket.data.id).await.unwrap();
    storage
        .add_rating(user, book.id, RatingValue::new(5).unwrap())
        .await
        .unwrap();

    let history = storage.list_borrows_for_user(user).await.unwrap();
    assert_eq!(history[0].return_status, ReturnStatus::Confirmed);
    assert_eq!(history[0].user_rating, Some(5));
    assert_eq!(history[0].book_title, "Dune");

    // The admin listing shows every user and carries no per-user rating.
    let all = storage.list_borrows().await.unwrap();
    assert_eq!(all.len(), 1);
    assert_eq!(all[0].user_rating, None);
}

#[rstest]
#[tokio::test]
async fn history_carries_return_status_and_own_rating(in_memory_storage: InMemoryStorage) {
    run_history_carries_return_status_and_own_rating(&in_memory_storage).await;
}

#[cfg(feature = "postgres")]
#[sqlx::test]
async fn history_carries_return_status_and_own_rating_postgres(pool: sqlx::PgPool) {
    run_history_carries_return_status_and_own_rating(&PostgresStorage::new(pool)).await;
}

// The scenario from the product walkthrough: one copy, two users, a full
// borrow-return-rate cycle.
async fn run_full_circulation_scenario<S: Storage>(storage: &S) {
    let (alice, bob) = (Uuid::new_v4(), Uuid::new_v4());
    let book = storage.add_book(sample_book(1)).await.unwrap();

    let receipt = storage.create_borrow(alice, book.id, &policy()).await.unwrap();
    assert_eq!(receipt.remaining_stock, 0);

    assert!(matches!(
        storage.create_borrow(bob, book.id, &policy()).await,
        Err(Error::OutOfStock { .. })
    ));

    let ticket = storage
        .request_return(student(alice), receipt.borrow.data.id)
        .await
        .unwrap();
    let outcome = storage.confirm_return(ticket.data.id).await.unwrap();
    assert_eq!(storage.get_book(book.id).await.unwrap().stock(), 1);
    assert_eq!(outcome.ticket.data.borrow_id, receipt.borrow.data.id);

    storage
        .add_rating(alice, book.id, RatingValue::new(4).unwrap())
        .await
        .unwrap();
    assert_eq!(storage.average_rating(book.id).await.unwrap(), Some(4.0));

    // Bob can borrow now that the copy is back.
    storage.create_borrow(bob, book.id, &policy()).await.unwrap();
    assert_eq!(storage.get_book(book.id).await.unwrap().stock(), 0);
}

#[rstest]
#[tokio::test]
async fn full_circulation_scenario(in_memory_storage: InMemoryStorage) {
    run_full_circulation_scenario(&in_memory_storage).await;
}

#[cfg(feature = "postgres")]
#[sqlx::test]
async fn full_circulation_scenario_postgres(pool: sqlx::PgPool) {
    run_full_circulation_scenario(&PostgresStorage::new(pool)).await;
}

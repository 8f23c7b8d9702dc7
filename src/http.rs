//! HTTP surface: axum router, handlers, and the bearer-token extractor.
//!
//! Handlers are thin: extract the principal, decode the body, call one
//! service method, wrap the result in the JSON envelope. All policy and all
//! atomicity live below this layer.

use std::sync::Arc;

use axum::{
    extract::{FromRequestParts, Path, State},
    http::{header, request::Parts, StatusCode},
    routing::{get, post, put},
    Json, Router,
};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tower_http::trace::TraceLayer;
use uuid::Uuid;

use crate::auth::{Principal, TokenVerifier};
use crate::catalog::{Book, NewBook};
use crate::error::{Error, Result};
use crate::loan::BorrowSummary;
use crate::service::Circulation;
use crate::storage::Storage;

/// Shared application state.
#[derive(Clone)]
pub struct AppState<S> {
    pub circulation: Circulation<S>,
    pub verifier: Arc<dyn TokenVerifier>,
}

impl<S> FromRequestParts<AppState<S>> for Principal
where
    S: Storage + Clone + Send + Sync + 'static,
{
    type Rejection = Error;

    async fn from_request_parts(
        parts: &mut Parts,
        state: &AppState<S>,
    ) -> std::result::Result<Self, Self::Rejection> {
        let header = parts
            .headers
            .get(header::AUTHORIZATION)
            .ok_or(Error::Unauthenticated)?;
        let token = header
            .to_str()
            .ok()
            .and_then(|v| v.strip_prefix("Bearer "))
            .ok_or(Error::Unauthenticated)?;
        state
            .verifier
            .verify(token)
            .await
            .ok_or(Error::Unauthenticated)
    }
}

/// Build the application router.
pub fn router<S>(state: AppState<S>) -> Router
where
    S: Storage + Clone + Send + Sync + 'static,
{
    Router::new()
        .route("/books", get(list_books::<S>).post(add_book::<S>))
        .route("/books/{id}", get(get_book::<S>))
        .route("/books/{id}/rating", get(get_rating::<S>).post(rate_book::<S>))
        .route("/borrows", post(borrow_book::<S>).get(list_borrows::<S>))
        .route("/borrows/history", get(borrow_history::<S>))
        .route("/returns", post(request_return::<S>))
        .route("/returns/{id}", put(confirm_return::<S>))
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}

// ============================================================================
// Wire types
// ============================================================================

/// The `{success, message?, data?}` envelope mutating routes respond with.
#[derive(Serialize)]
struct Envelope<T> {
    success: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    message: Option<&'static str>,
    #[serde(skip_serializing_if = "Option::is_none")]
    data: Option<T>,
}

impl<T: Serialize> Envelope<T> {
    fn data(message: &'static str, data: T) -> Self {
        Self {
            success: true,
            message: Some(message),
            data: Some(data),
        }
    }
}

impl Envelope<()> {
    fn message(message: &'static str) -> Self {
        Self {
            success: true,
            message: Some(message),
            data: None,
        }
    }
}

#[derive(Deserialize)]
struct BorrowRequest {
    book_id: Uuid,
}

#[derive(Serialize)]
struct BorrowGrant {
    book_id: Uuid,
    book_title: String,
    remaining_stock: u32,
    return_date: DateTime<Utc>,
}

#[derive(Deserialize)]
struct ReturnRequestBody {
    borrow_id: Uuid,
}

#[derive(Serialize)]
struct ReturnOpened {
    return_id: Uuid,
    borrow_id: Uuid,
}

#[derive(Deserialize)]
struct RateRequest {
    rating: i64,
}

#[derive(Serialize)]
struct AvgRating {
    avg_rating: Option<f64>,
}

// ============================================================================
// Handlers
// ============================================================================

async fn list_books<S: Storage + Clone + Send + Sync + 'static>(
    State(state): State<AppState<S>>,
    principal: Principal,
) -> Result<Json<Vec<Book>>> {
    Ok(Json(state.circulation.list_books(&principal).await?))
}

async fn get_book<S: Storage + Clone + Send + Sync + 'static>(
    State(state): State<AppState<S>>,
    principal: Principal,
    Path(id): Path<Uuid>,
) -> Result<Json<Book>> {
    Ok(Json(state.circulation.get_book(&principal, id).await?))
}

async fn add_book<S: Storage + Clone + Send + Sync + 'static>(
    State(state): State<AppState<S>>,
    principal: Principal,
    Json(new): Json<NewBook>,
) -> Result<(StatusCode, Json<Envelope<Book>>)> {
    let book = state.circulation.add_book(&principal, new).await?;
    Ok((
        StatusCode::CREATED,
        Json(Envelope::data("book added", book)),
    ))
}

async fn borrow_book<S: Storage + Clone + Send + Sync + 'static>(
    State(state): State<AppState<S>>,
    principal: Principal,
    Json(req): Json<BorrowRequest>,
) -> Result<(StatusCode, Json<Envelope<BorrowGrant>>)> {
    let receipt = state.circulation.borrow(&principal, req.book_id).await?;
    let grant = BorrowGrant {
        book_id: receipt.borrow.data.book_id,
        book_title: receipt.book_title,
        remaining_stock: receipt.remaining_stock,
        return_date: receipt.borrow.state.due_at,
    };
    Ok((
        StatusCode::CREATED,
        Json(Envelope::data("book borrowed", grant)),
    ))
}

async fn list_borrows<S: Storage + Clone + Send + Sync + 'static>(
    State(state): State<AppState<S>>,
    principal: Principal,
) -> Result<Json<Envelope<Vec<BorrowSummary>>>> {
    let rows = state.circulation.list_all_borrows(&principal).await?;
    Ok(Json(Envelope::data("all borrows", rows)))
}

async fn borrow_history<S: Storage + Clone + Send + Sync + 'static>(
    State(state): State<AppState<S>>,
    principal: Principal,
) -> Result<Json<Envelope<Vec<BorrowSummary>>>> {
    let rows = state.circulation.history(&principal).await?;
    Ok(Json(Envelope::data("borrow history", rows)))
}

async fn request_return<S: Storage + Clone + Send + Sync + 'static>(
    State(state): State<AppState<S>>,
    principal: Principal,
    Json(req): Json<ReturnRequestBody>,
) -> Result<(StatusCode, Json<Envelope<ReturnOpened>>)> {
    let ticket = state
        .circulation
        .request_return(&principal, req.borrow_id)
        .await?;
    let opened = ReturnOpened {
        return_id: ticket.data.id,
        borrow_id: ticket.data.borrow_id,
    };
    Ok((
        StatusCode::CREATED,
        Json(Envelope::data("return requested", opened)),
    ))
}

async fn confirm_return<S: Storage + Clone + Send + Sync + 'static>(
    State(state): State<AppState<S>>,
    principal: Principal,
    Path(id): Path<Uuid>,
) -> Result<Json<Envelope<()>>> {
    state.circulation.confirm_return(&principal, id).await?;
    Ok(Json(Envelope::message("return confirmed")))
}

async fn rate_book<S: Storage + Clone + Send + Sync + 'static>(
    State(state): State<AppState<S>>,
    principal: Principal,
    Path(id): Path<Uuid>,
    Json(req): Json<RateRequest>,
) -> Result<(StatusCode, Json<Envelope<()>>)> {
    state.circulation.rate(&principal, id, req.rating).await?;
    Ok((
        StatusCode::CREATED,
        Json(Envelope::message("rating recorded")),
    ))
}

async fn get_rating<S: Storage + Clone + Send + Sync + 'static>(
    State(state): State<AppState<S>>,
    principal: Principal,
    Path(id): Path<Uuid>,
) -> Result<Json<AvgRating>> {
    let avg_rating = state.circulation.average_for(&principal, id).await?;
    Ok(Json(AvgRating { avg_rating }))
}

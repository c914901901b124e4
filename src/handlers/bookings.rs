use std::sync::Arc;

use axum::extract::{Path, Query, State};
use axum::http::{HeaderMap, StatusCode};
use axum::response::IntoResponse;
use axum::Json;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use super::{check_booking_access, check_tenant, Access};
use crate::errors::AppError;
use crate::models::{Booking, BookingStatus};
use crate::services::bookings::{self, BookingFilter, NewBooking, RequestedStart};
use crate::services::tokens;
use crate::state::AppState;

#[derive(Debug, Default, Deserialize)]
pub struct TokenQuery {
    pub token: Option<String>,
}

#[derive(Serialize)]
pub struct CreatedBooking {
    pub booking: Booking,
    /// Lets the client confirm, cancel or move the booking without an account.
    pub token: String,
}

// POST /locals/:local_id/bookings
pub async fn create_booking(
    State(state): State<Arc<AppState>>,
    Path(local_id): Path<String>,
    Json(new): Json<NewBooking>,
) -> Result<impl IntoResponse, AppError> {
    let booking = bookings::create_booking(&state, &local_id, new).await?;
    let token = tokens::issue(
        &state.config.token_secret,
        &booking.id,
        Utc::now() + state.config.token_ttl(),
    );
    Ok((StatusCode::CREATED, Json(CreatedBooking { booking, token })))
}

// GET /locals/:local_id/bookings
#[derive(Debug, Deserialize)]
pub struct ListQuery {
    pub from: DateTime<Utc>,
    pub to: DateTime<Utc>,
    pub status: Option<BookingStatus>,
    pub worker_id: Option<String>,
    pub work_group_id: Option<String>,
}

pub async fn list_bookings(
    State(state): State<Arc<AppState>>,
    Path(local_id): Path<String>,
    Query(query): Query<ListQuery>,
    headers: HeaderMap,
) -> Result<Json<Vec<Booking>>, AppError> {
    check_tenant(&state, &headers, &local_id)?;
    let filter = BookingFilter {
        window_start: query.from,
        window_end: query.to,
        status: query.status,
        worker_id: query.worker_id,
        work_group_id: query.work_group_id,
    };
    Ok(Json(bookings::list_bookings(&state, &local_id, filter)?))
}

// GET /bookings/:id
pub async fn get_booking(
    State(state): State<Arc<AppState>>,
    Path(id): Path<String>,
    Query(query): Query<TokenQuery>,
    headers: HeaderMap,
) -> Result<Json<Booking>, AppError> {
    let (booking, _) = check_booking_access(&state, &headers, query.token.as_deref(), &id, Access::Read)?;
    Ok(Json(booking))
}

// DELETE /bookings/:id
pub async fn delete_booking(
    State(state): State<Arc<AppState>>,
    Path(id): Path<String>,
    headers: HeaderMap,
) -> Result<StatusCode, AppError> {
    let booking = bookings::get_booking(&state, &id)?;
    check_tenant(&state, &headers, &booking.local_id)?;
    bookings::delete_booking(&state, &id).await?;
    Ok(StatusCode::NO_CONTENT)
}

// POST /bookings/:id/confirm
pub async fn confirm_booking(
    State(state): State<Arc<AppState>>,
    Path(id): Path<String>,
    Query(query): Query<TokenQuery>,
    headers: HeaderMap,
) -> Result<Json<Booking>, AppError> {
    check_booking_access(&state, &headers, query.token.as_deref(), &id, Access::Write)?;
    Ok(Json(bookings::confirm_booking(&state, &id).await?))
}

// POST /bookings/:id/cancel
#[derive(Debug, Default, Deserialize)]
pub struct CancelRequest {
    pub comment: Option<String>,
}

pub async fn cancel_booking(
    State(state): State<Arc<AppState>>,
    Path(id): Path<String>,
    Query(query): Query<TokenQuery>,
    headers: HeaderMap,
    body: Option<Json<CancelRequest>>,
) -> Result<Json<Booking>, AppError> {
    let (_, actor) = check_booking_access(&state, &headers, query.token.as_deref(), &id, Access::Write)?;
    let comment = body.and_then(|Json(req)| req.comment);
    Ok(Json(bookings::cancel_booking(&state, &id, actor, comment).await?))
}

// POST /bookings/:id/reschedule
#[derive(Debug, Deserialize)]
pub struct RescheduleRequest {
    pub start: RequestedStart,
    pub service_ids: Option<Vec<String>>,
}

pub async fn reschedule_booking(
    State(state): State<Arc<AppState>>,
    Path(id): Path<String>,
    Query(query): Query<TokenQuery>,
    headers: HeaderMap,
    Json(req): Json<RescheduleRequest>,
) -> Result<Json<Booking>, AppError> {
    check_booking_access(&state, &headers, query.token.as_deref(), &id, Access::Write)?;
    let booking = bookings::reschedule_booking(&state, &id, req.start, req.service_ids).await?;
    Ok(Json(booking))
}

// POST /bookings/:id/complete
pub async fn complete_booking(
    State(state): State<Arc<AppState>>,
    Path(id): Path<String>,
    headers: HeaderMap,
) -> Result<Json<Booking>, AppError> {
    let booking = bookings::get_booking(&state, &id)?;
    check_tenant(&state, &headers, &booking.local_id)?;
    Ok(Json(bookings::complete_booking(&state, &id).await?))
}

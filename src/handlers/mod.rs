pub mod bookings;
pub mod calendar;
pub mod health;

use std::sync::Arc;

use axum::http::HeaderMap;
use axum::routing::{get, post};
use axum::Router;
use chrono::Utc;

use crate::db::{self, catalog, queries};
use crate::errors::AppError;
use crate::models::{Booking, Local};
use crate::services::bookings::Actor;
use crate::services::tokens;
use crate::state::AppState;

pub fn router(state: Arc<AppState>) -> Router {
    Router::new()
        .route("/health", get(health::health))
        .route(
            "/locals/:local_id/bookings",
            post(bookings::create_booking).get(bookings::list_bookings),
        )
        .route(
            "/bookings/:id",
            get(bookings::get_booking).delete(bookings::delete_booking),
        )
        // GET too, so the links in notification emails work when clicked.
        .route(
            "/bookings/:id/confirm",
            post(bookings::confirm_booking).get(bookings::confirm_booking),
        )
        .route(
            "/bookings/:id/cancel",
            post(bookings::cancel_booking).get(bookings::cancel_booking),
        )
        .route("/bookings/:id/reschedule", post(bookings::reschedule_booking))
        .route("/bookings/:id/complete", post(bookings::complete_booking))
        .route("/bookings/:id/calendar.ics", get(calendar::download_ics))
        .with_state(state)
}

fn bearer_token(headers: &HeaderMap) -> Option<&str> {
    headers
        .get("authorization")
        .and_then(|v| v.to_str().ok())
        .and_then(|v| v.strip_prefix("Bearer "))
        .filter(|t| !t.is_empty())
}

/// The local whose API token was presented as bearer token.
fn check_tenant(state: &AppState, headers: &HeaderMap, local_id: &str) -> Result<Local, AppError> {
    let token = bearer_token(headers).ok_or(AppError::Unauthorized)?;
    let local = {
        let conn = db::lock(&state.db);
        catalog::get_local(&conn, local_id)?
    };
    match local {
        Some(local) if local.api_token == token => Ok(local),
        _ => Err(AppError::Unauthorized),
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Access {
    Read,
    Write,
}

/// Accepts the owning tenant's bearer token or the booking's access token. Access
/// tokens stop granting writes once the booking is done or cancelled.
fn check_booking_access(
    state: &AppState,
    headers: &HeaderMap,
    token: Option<&str>,
    booking_id: &str,
    access: Access,
) -> Result<(Booking, Actor), AppError> {
    let booking = {
        let conn = db::lock(&state.db);
        queries::get_booking(&conn, booking_id)?
    }
    .ok_or_else(|| AppError::not_found("booking", booking_id))?;

    if bearer_token(headers).is_some() {
        check_tenant(state, headers, &booking.local_id)?;
        return Ok((booking, Actor::Tenant));
    }

    let token = token.ok_or(AppError::Unauthorized)?;
    if !tokens::verify(&state.config.token_secret, booking_id, token, Utc::now()) {
        return Err(AppError::Unauthorized);
    }
    if access == Access::Write && booking.status.is_terminal() {
        tracing::debug!(booking_id, "access token revoked for finished booking");
        return Err(AppError::Unauthorized);
    }
    Ok((booking, Actor::Client))
}

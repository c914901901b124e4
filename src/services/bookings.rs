use std::collections::HashMap;
use std::str::FromStr;

use chrono::{DateTime, NaiveDateTime, SubsecRound, Utc};
use chrono_tz::Tz;
use rusqlite::Connection;
use serde::Deserialize;
use tracing::info;

use crate::db::{self, catalog, queries, Db};
use crate::errors::AppError;
use crate::models::{Booking, BookingStatus, Local};
use crate::services::allocator::{self, AllocationRequest};
use crate::services::availability::localize;
use crate::services::calendar;
use crate::services::notifications::{self, NotificationKind};
use crate::state::AppState;

pub use crate::db::queries::BookingFilter;

/// A requested start time: either an absolute instant (RFC 3339 with offset) or a
/// wall-clock time in the local's timezone.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(try_from = "String")]
pub enum RequestedStart {
    At(DateTime<Utc>),
    Local(NaiveDateTime),
}

impl RequestedStart {
    /// The start as stored: whole seconds.
    pub fn resolve(&self, tz: Tz) -> Result<DateTime<Utc>, AppError> {
        let start = match self {
            RequestedStart::At(at) => *at,
            RequestedStart::Local(naive) => localize(*naive, tz)?,
        };
        Ok(start.trunc_subsecs(0))
    }
}

impl FromStr for RequestedStart {
    type Err = AppError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        if let Ok(at) = DateTime::parse_from_rfc3339(s) {
            return Ok(RequestedStart::At(at.with_timezone(&Utc)));
        }
        for format in ["%Y-%m-%dT%H:%M:%S%.f", "%Y-%m-%dT%H:%M", "%Y-%m-%d %H:%M:%S%.f", "%Y-%m-%d %H:%M"] {
            if let Ok(naive) = NaiveDateTime::parse_from_str(s, format) {
                return Ok(RequestedStart::Local(naive));
            }
        }
        Err(AppError::InvalidRange(format!("unrecognised start time: {s}")))
    }
}

impl TryFrom<String> for RequestedStart {
    type Error = AppError;

    fn try_from(s: String) -> Result<Self, Self::Error> {
        s.parse()
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct NewBooking {
    pub service_ids: Vec<String>,
    pub start: RequestedStart,
    pub worker_id: Option<String>,
    pub client_name: String,
    pub client_email: String,
    pub client_phone: Option<String>,
    pub comment: Option<String>,
    /// Client-chosen key; repeating a create with the same key returns the first booking.
    pub request_key: Option<String>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Actor {
    Client,
    Tenant,
}

impl Actor {
    pub fn as_str(&self) -> &'static str {
        match self {
            Actor::Client => "client",
            Actor::Tenant => "tenant",
        }
    }
}

/// Storage keeps whole seconds.
fn now() -> DateTime<Utc> {
    Utc::now().trunc_subsecs(0)
}

fn load_booking(conn: &Connection, booking_id: &str) -> Result<Booking, AppError> {
    queries::get_booking(conn, booking_id)?.ok_or_else(|| AppError::not_found("booking", booking_id))
}

fn load_local(conn: &Connection, local_id: &str) -> Result<Local, AppError> {
    catalog::get_local(conn, local_id)?.ok_or_else(|| AppError::not_found("local", local_id))
}

/// Moves `booking` to `to` with a compare-and-set on its current status and returns the
/// stored result.
fn transition(
    conn: &Connection,
    booking: &Booking,
    to: BookingStatus,
    now: &DateTime<Utc>,
) -> Result<Booking, AppError> {
    let invalid = || AppError::InvalidTransition {
        booking_id: booking.id.clone(),
        from: booking.status,
        to,
    };
    if !booking.status.can_transition_to(to) {
        return Err(invalid());
    }
    if !queries::transition_booking_status(conn, &booking.id, booking.status, to, now)? {
        return Err(invalid());
    }
    load_booking(conn, &booking.id)
}

fn validate_client(new: &NewBooking) -> Result<(), AppError> {
    if new.client_name.trim().is_empty() {
        return Err(AppError::InvalidClient("client name is required".to_string()));
    }
    let email = new.client_email.trim();
    match email.split_once('@') {
        Some((user, domain)) if !user.is_empty() && domain.contains('.') => Ok(()),
        _ => Err(AppError::InvalidClient(format!("invalid email address: {email}"))),
    }
}

/// Allocates a worker and stores a pending booking in one write transaction, registers
/// its expiry and sends the confirmation request.
pub async fn create_booking(
    state: &AppState,
    local_id: &str,
    new: NewBooking,
) -> Result<Booking, AppError> {
    validate_client(&new)?;
    let now = now();

    let (local, settings, booking, created) = db::write_tx(&state.db, |tx| -> Result<_, AppError> {
        let local = load_local(tx, local_id)?;
        let settings = catalog::get_local_settings(tx, local_id)?;

        if let Some(key) = new.request_key.as_deref() {
            if let Some(existing) = queries::find_booking_by_request_key(tx, local_id, key)? {
                return Ok((local, settings, existing, false));
            }
        }

        let start = new.start.resolve(local.tz()?)?;
        let allocation = allocator::allocate(
            tx,
            &AllocationRequest {
                local: &local,
                service_ids: &new.service_ids,
                start,
                requested_worker: new.worker_id.as_deref(),
                preferred_worker: None,
                exclude_booking: None,
            },
            now,
            &mut rand::thread_rng(),
        )?;

        let booking = Booking {
            id: uuid::Uuid::new_v4().to_string(),
            local_id: local.id.clone(),
            worker_id: allocation.worker_id.clone(),
            service_ids: allocation.service_ids(),
            datetime_init: allocation.start,
            datetime_end: allocation.end,
            status: BookingStatus::Pending,
            client_name: new.client_name.trim().to_string(),
            client_email: new.client_email.trim().to_string(),
            client_phone: new.client_phone.clone(),
            comment: new.comment.clone(),
            email_sent: false,
            request_key: new.request_key.clone(),
            created_at: now,
            updated_at: now,
        };
        queries::insert_booking(tx, &booking)?;
        Ok((local, settings, booking, true))
    })?;

    if !created {
        info!(booking_id = %booking.id, local_id, "request key replayed, returning existing booking");
        return Ok(booking);
    }

    info!(
        booking_id = %booking.id,
        local_id,
        worker_id = %booking.worker_id,
        start = %booking.datetime_init,
        "booking created"
    );

    if let Some(timeout) = settings.expiry_timeout() {
        state.expiry.schedule_expiry(&booking.id, booking.created_at + timeout);
    }

    let sent =
        notifications::dispatch_notification(state, &local, &booking, NotificationKind::Confirmed).await;
    Ok(Booking {
        email_sent: sent,
        ..booking
    })
}

/// Pending → Confirmed. Confirming twice is not an error.
pub async fn confirm_booking(state: &AppState, booking_id: &str) -> Result<Booking, AppError> {
    let now = now();
    let (booking, changed) = db::write_tx(&state.db, |tx| -> Result<_, AppError> {
        let booking = load_booking(tx, booking_id)?;
        if booking.status == BookingStatus::Confirmed {
            return Ok((booking, false));
        }
        Ok((transition(tx, &booking, BookingStatus::Confirmed, &now)?, true))
    })?;

    state.expiry.cancel_expiry(booking_id);
    if changed {
        info!(booking_id, "booking confirmed");
    }
    Ok(booking)
}

pub async fn cancel_booking(
    state: &AppState,
    booking_id: &str,
    actor: Actor,
    comment: Option<String>,
) -> Result<Booking, AppError> {
    let now = now();
    let (local, booking) = db::write_tx(&state.db, |tx| -> Result<_, AppError> {
        let booking = load_booking(tx, booking_id)?;
        let mut booking = transition(tx, &booking, BookingStatus::Cancelled, &now)?;
        if let Some(comment) = comment.as_deref().filter(|c| !c.trim().is_empty()) {
            queries::set_booking_comment(tx, booking_id, comment)?;
            booking.comment = Some(comment.to_string());
        }
        Ok((load_local(tx, &booking.local_id)?, booking))
    })?;

    state.expiry.cancel_expiry(booking_id);
    info!(booking_id, actor = actor.as_str(), "booking cancelled");

    let sent =
        notifications::dispatch_notification(state, &local, &booking, NotificationKind::Cancelled).await;
    Ok(Booking {
        email_sent: sent,
        ..booking
    })
}

/// Moves an active booking to a new start and optionally new services. The current
/// worker is kept when still free, otherwise another worker of the group is allocated.
/// The status and any pending expiry stay as they were.
pub async fn reschedule_booking(
    state: &AppState,
    booking_id: &str,
    new_start: RequestedStart,
    new_services: Option<Vec<String>>,
) -> Result<Booking, AppError> {
    let now = now();
    let (local, booking) = db::write_tx(&state.db, |tx| -> Result<_, AppError> {
        let booking = load_booking(tx, booking_id)?;
        if !booking.status.is_active() {
            return Err(AppError::NotEditable {
                booking_id: booking.id,
                status: booking.status,
            });
        }
        let local = load_local(tx, &booking.local_id)?;

        let start = new_start.resolve(local.tz()?)?;
        let service_ids = new_services.unwrap_or_else(|| booking.service_ids.clone());
        let allocation = allocator::allocate(
            tx,
            &AllocationRequest {
                local: &local,
                service_ids: &service_ids,
                start,
                requested_worker: None,
                preferred_worker: Some(&booking.worker_id),
                exclude_booking: Some(&booking.id),
            },
            now,
            &mut rand::thread_rng(),
        )?;

        let moved = Booking {
            worker_id: allocation.worker_id.clone(),
            service_ids: allocation.service_ids(),
            datetime_init: allocation.start,
            datetime_end: allocation.end,
            ..booking
        };
        queries::update_booking_slot(tx, &moved, &now)?;
        Ok((local, load_booking(tx, booking_id)?))
    })?;

    info!(
        booking_id,
        worker_id = %booking.worker_id,
        start = %booking.datetime_init,
        "booking rescheduled"
    );

    let sent =
        notifications::dispatch_notification(state, &local, &booking, NotificationKind::Updated).await;
    Ok(Booking {
        email_sent: sent,
        ..booking
    })
}

/// Confirmed → Done once the booking has ended. Completing twice is not an error.
pub async fn complete_booking(state: &AppState, booking_id: &str) -> Result<Booking, AppError> {
    let now = now();
    db::write_tx(&state.db, |tx| -> Result<_, AppError> {
        let booking = load_booking(tx, booking_id)?;
        match booking.status {
            BookingStatus::Done => Ok(booking),
            BookingStatus::Confirmed if booking.datetime_end > now => {
                Err(AppError::InvalidTransition {
                    booking_id: booking.id,
                    from: booking.status,
                    to: BookingStatus::Done,
                })
            }
            _ => {
                let done = transition(tx, &booking, BookingStatus::Done, &now)?;
                info!(booking_id, "booking completed");
                Ok(done)
            }
        }
    })
}

/// Cancels the booking if it is still pending. Returns whether anything changed; a
/// booking confirmed, cancelled or deleted in the meantime is left alone.
pub fn expire_booking(db: &Db, booking_id: &str, now: DateTime<Utc>) -> Result<bool, AppError> {
    let now = now.trunc_subsecs(0);
    db::write_tx(db, |tx| -> Result<_, AppError> {
        Ok(queries::transition_booking_status(
            tx,
            booking_id,
            BookingStatus::Pending,
            BookingStatus::Cancelled,
            &now,
        )?)
    })
}

pub async fn delete_booking(state: &AppState, booking_id: &str) -> Result<(), AppError> {
    let deleted = db::write_tx(&state.db, |tx| queries::delete_booking(tx, booking_id))?;
    if !deleted {
        return Err(AppError::not_found("booking", booking_id));
    }
    state.expiry.cancel_expiry(booking_id);
    info!(booking_id, "booking deleted");
    Ok(())
}

pub fn get_booking(state: &AppState, booking_id: &str) -> Result<Booking, AppError> {
    let conn = db::lock(&state.db);
    load_booking(&conn, booking_id)
}

pub fn list_bookings(
    state: &AppState,
    local_id: &str,
    filter: BookingFilter,
) -> Result<Vec<Booking>, AppError> {
    if filter.window_end <= filter.window_start {
        return Err(AppError::InvalidRange(format!(
            "{} is not before {}",
            filter.window_start, filter.window_end
        )));
    }
    let conn = db::lock(&state.db);
    load_local(&conn, local_id)?;
    Ok(queries::list_bookings(&conn, local_id, &filter)?)
}

/// iCalendar document for one booking.
pub fn booking_calendar(state: &AppState, booking_id: &str) -> Result<String, AppError> {
    let conn = db::lock(&state.db);
    let booking = load_booking(&conn, booking_id)?;
    let local = load_local(&conn, &booking.local_id)?;
    let mut services = vec![];
    for id in &booking.service_ids {
        if let Some(service) = catalog::get_service(&conn, id)? {
            services.push(service);
        }
    }
    Ok(calendar::generate_ics(&booking, &local, &services))
}

/// Re-registers the expiry of every pending booking, e.g. after a restart. Deadlines
/// already in the past fire right away.
pub fn recover_pending_expiries(state: &AppState) -> Result<usize, AppError> {
    let pending = {
        let conn = db::lock(&state.db);
        let pending = queries::get_bookings_with_status(&conn, BookingStatus::Pending)?;
        let mut timeouts = HashMap::new();
        let mut due = vec![];
        for booking in pending {
            if !timeouts.contains_key(&booking.local_id) {
                let settings = catalog::get_local_settings(&conn, &booking.local_id)?;
                timeouts.insert(booking.local_id.clone(), settings.expiry_timeout());
            }
            if let Some(Some(timeout)) = timeouts.get(&booking.local_id) {
                due.push((booking.id, booking.created_at + *timeout));
            }
        }
        due
    };

    for (booking_id, at) in &pending {
        state.expiry.schedule_expiry(booking_id, *at);
    }
    if !pending.is_empty() {
        info!(count = pending.len(), "re-registered pending booking expiries");
    }
    Ok(pending.len())
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    fn madrid() -> Tz {
        "Europe/Madrid".parse().unwrap()
    }

    #[test]
    fn test_requested_start_with_offset_is_absolute() {
        let start: RequestedStart = "2030-06-03T10:00:00+02:00".parse().unwrap();
        assert_eq!(
            start.resolve(madrid()).unwrap(),
            Utc.with_ymd_and_hms(2030, 6, 3, 8, 0, 0).unwrap()
        );
        let start: RequestedStart = "2030-06-03T08:00:00Z".parse().unwrap();
        assert_eq!(
            start.resolve(chrono_tz::UTC).unwrap(),
            Utc.with_ymd_and_hms(2030, 6, 3, 8, 0, 0).unwrap()
        );
    }

    #[test]
    fn test_fractional_seconds_are_dropped() {
        let start: RequestedStart = "2030-06-03T08:00:00.900Z".parse().unwrap();
        assert_eq!(
            start.resolve(madrid()).unwrap(),
            Utc.with_ymd_and_hms(2030, 6, 3, 8, 0, 0).unwrap()
        );
        let start: RequestedStart = "2030-06-03T10:00:30.250".parse().unwrap();
        assert_eq!(
            start.resolve(madrid()).unwrap(),
            Utc.with_ymd_and_hms(2030, 6, 3, 8, 0, 30).unwrap()
        );
    }

    #[test]
    fn test_naive_start_is_local_wall_clock() {
        let start: RequestedStart = "2030-06-03T10:00".parse().unwrap();
        assert!(matches!(start, RequestedStart::Local(_)));
        assert_eq!(
            start.resolve(madrid()).unwrap(),
            Utc.with_ymd_and_hms(2030, 6, 3, 8, 0, 0).unwrap()
        );
    }

    #[test]
    fn test_garbage_start_is_invalid() {
        assert!(matches!(
            "next tuesday".parse::<RequestedStart>(),
            Err(AppError::InvalidRange(_))
        ));
    }

    #[test]
    fn test_new_booking_deserializes_start() {
        let new: NewBooking = serde_json::from_str(
            r#"{"service_ids":["cut"],"start":"2030-06-03 10:00","client_name":"Ana","client_email":"ana@example.com"}"#,
        )
        .unwrap();
        assert!(matches!(new.start, RequestedStart::Local(_)));
        assert!(new.worker_id.is_none());
        assert!(new.request_key.is_none());

        let bad = serde_json::from_str::<NewBooking>(
            r#"{"service_ids":["cut"],"start":"soon","client_name":"Ana","client_email":"ana@example.com"}"#,
        );
        assert!(bad.is_err());
    }

    #[test]
    fn test_client_validation() {
        let mut new: NewBooking = serde_json::from_str(
            r#"{"service_ids":["cut"],"start":"2030-06-03 10:00","client_name":"Ana","client_email":"ana@example.com"}"#,
        )
        .unwrap();
        assert!(validate_client(&new).is_ok());

        new.client_email = "ana".to_string();
        assert!(matches!(validate_client(&new), Err(AppError::InvalidClient(_))));

        new.client_email = "ana@example.com".to_string();
        new.client_name = "  ".to_string();
        assert!(matches!(validate_client(&new), Err(AppError::InvalidClient(_))));
    }
}

use chrono::{DateTime, Datelike, LocalResult, NaiveDateTime, TimeZone, Utc};
use chrono_tz::Tz;
use rusqlite::Connection;

use crate::db::catalog;
use crate::errors::{AppError, Unavailability};
use crate::models::{ClosedPeriod, Local, Timetable};

/// Decides whether a local window is bookable: it must fit inside a single timetable slot
/// of its weekday and must not touch any closed period.
pub fn resolve(
    timetable: &Timetable,
    closures: &[ClosedPeriod],
    start: &DateTime<Tz>,
    end: &DateTime<Tz>,
) -> Result<(), Unavailability> {
    let same_day = start.date_naive() == end.date_naive();
    if !same_day || !timetable.covers(start.weekday(), start.time(), end.time()) {
        return Err(Unavailability::OutsideHours {
            hours: timetable.to_human_readable(),
        });
    }

    let start_utc = start.with_timezone(&Utc);
    let end_utc = end.with_timezone(&Utc);
    if let Some(period) = closures.iter().find(|p| p.intersects(&start_utc, &end_utc)) {
        return Err(Unavailability::Closed {
            period_id: period.id.clone(),
            description: period.description.clone(),
        });
    }

    Ok(())
}

/// Interprets a wall-clock time in the local's timezone. Ambiguous times (clocks going
/// back) resolve to the earlier instant; times skipped by a DST jump are rejected.
pub fn localize(naive: NaiveDateTime, tz: Tz) -> Result<DateTime<Utc>, AppError> {
    match tz.from_local_datetime(&naive) {
        LocalResult::Single(dt) => Ok(dt.with_timezone(&Utc)),
        LocalResult::Ambiguous(earliest, _) => Ok(earliest.with_timezone(&Utc)),
        LocalResult::None => Err(AppError::InvalidRange(format!(
            "{naive} does not exist in {tz}"
        ))),
    }
}

/// Fails with `LocalUnavailable` unless `[start, end)` is open for bookings.
///
/// Closed periods that are already over are purged first, so callers should hold a
/// write transaction.
pub fn ensure_open(
    conn: &Connection,
    local: &Local,
    start: DateTime<Utc>,
    end: DateTime<Utc>,
    now: DateTime<Utc>,
) -> Result<(), AppError> {
    if end <= start {
        return Err(AppError::InvalidRange(format!(
            "{start} is not before {end}"
        )));
    }

    let tz = local.tz()?;
    let start_local = start.with_timezone(&tz);
    let end_local = end.with_timezone(&tz);
    if start_local.date_naive() != end_local.date_naive() {
        return Err(AppError::InvalidRange(
            "a booking cannot span more than one day".to_string(),
        ));
    }

    let purged = catalog::purge_past_closed_periods(conn, &local.id, &now)?;
    if purged > 0 {
        tracing::debug!(local_id = %local.id, purged, "purged past closed periods");
    }

    let slots = catalog::get_timetable_for_weekday(conn, &local.id, start_local.weekday())?;
    let closures = catalog::get_closed_periods_between(conn, &local.id, &start, &end)?;

    resolve(&Timetable::new(slots), &closures, &start_local, &end_local).map_err(|reason| {
        AppError::LocalUnavailable {
            local_id: local.id.clone(),
            start,
            end,
            reason,
        }
    })
}

pub fn is_open(
    conn: &Connection,
    local: &Local,
    start: DateTime<Utc>,
    end: DateTime<Utc>,
    now: DateTime<Utc>,
) -> Result<bool, AppError> {
    match ensure_open(conn, local, start, end, now) {
        Ok(()) => Ok(true),
        Err(AppError::LocalUnavailable { .. }) | Err(AppError::InvalidRange(_)) => Ok(false),
        Err(e) => Err(e),
    }
}

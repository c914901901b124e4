use std::time::Duration;

use chrono::{DateTime, SubsecRound, Utc};
use tokio::time::interval;
use tracing::{debug, info, warn};

use crate::db::{self, queries, Db};
use crate::errors::AppError;
use crate::models::BookingStatus;

/// Background task marking confirmed bookings as done once they have ended.
pub async fn run_completion_sweep(db: Db, every: Duration) {
    let mut ticker = interval(every);
    info!(interval_secs = every.as_secs(), "starting completion sweep");

    loop {
        ticker.tick().await;
        match complete_finished(&db, Utc::now()) {
            Ok(0) => debug!("no finished bookings"),
            Ok(count) => info!(count, "marked finished bookings as done"),
            Err(e) => warn!(error = %e, "completion sweep failed"),
        }
    }
}

/// One sweep cycle. Each row moves with a compare-and-set, so a booking cancelled in
/// the meantime is skipped.
pub fn complete_finished(db: &Db, now: DateTime<Utc>) -> Result<usize, AppError> {
    let now = now.trunc_subsecs(0);
    db::write_tx(db, |tx| -> Result<usize, AppError> {
        let mut completed = 0;
        for booking_id in queries::get_finished_confirmed_ids(tx, &now)? {
            if queries::transition_booking_status(
                tx,
                &booking_id,
                BookingStatus::Confirmed,
                BookingStatus::Done,
                &now,
            )? {
                debug!(booking_id = %booking_id, "booking done");
                completed += 1;
            }
        }
        Ok(completed)
    })
}

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use super::booking::overlaps;

/// A one-off blackout that overrides the timetable.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ClosedPeriod {
    pub id: String,
    pub local_id: String,
    pub datetime_init: DateTime<Utc>,
    pub datetime_end: DateTime<Utc>,
    pub description: Option<String>,
}

impl ClosedPeriod {
    pub fn intersects(&self, start: &DateTime<Utc>, end: &DateTime<Utc>) -> bool {
        overlaps(&self.datetime_init, &self.datetime_end, start, end)
    }
}

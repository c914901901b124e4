use chrono::{DateTime, Days, Duration, Months, Utc};
use chrono_tz::Tz;
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum SmtpSecurity {
    None,
    StartTls,
    Tls,
}

impl SmtpSecurity {
    pub fn as_str(&self) -> &'static str {
        match self {
            SmtpSecurity::None => "none",
            SmtpSecurity::StartTls => "starttls",
            SmtpSecurity::Tls => "tls",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "none" => Some(SmtpSecurity::None),
            "starttls" => Some(SmtpSecurity::StartTls),
            "tls" => Some(SmtpSecurity::Tls),
            _ => None,
        }
    }
}

/// An outbound mail relay with optional daily and monthly send quotas.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SmtpProvider {
    pub id: String,
    pub local_id: String,
    pub host: String,
    pub port: u16,
    pub security: SmtpSecurity,
    pub username: String,
    #[serde(skip_serializing)]
    pub password: String,
    pub from_address: String,
    /// Lower sends first.
    pub priority: i64,
    pub send_per_day: i64,
    pub send_per_month: i64,
    /// `None` means unlimited.
    pub max_send_per_day: Option<i64>,
    pub max_send_per_month: Option<i64>,
    pub reset_send_per_day: DateTime<Utc>,
    pub reset_send_per_month: DateTime<Utc>,
}

/// Which counters a send attempt has claimed.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct QuotaClaim {
    pub day: bool,
    pub month: bool,
}

impl SmtpProvider {
    /// Zeroes counters whose reset instant has passed and moves the reset instant
    /// forward in whole local days/months until it lies after `now`.
    /// Returns true if anything changed.
    pub fn roll_forward(&mut self, now: DateTime<Utc>, tz: Tz) -> bool {
        let mut changed = false;

        if self.max_send_per_day.is_some() && self.reset_send_per_day <= now {
            self.send_per_day = 0;
            self.reset_send_per_day = advance_past(self.reset_send_per_day, now, |at| {
                next_day(at, tz)
            });
            changed = true;
        }

        if self.max_send_per_month.is_some() && self.reset_send_per_month <= now {
            self.send_per_month = 0;
            self.reset_send_per_month = advance_past(self.reset_send_per_month, now, |at| {
                next_month(at, tz)
            });
            changed = true;
        }

        changed
    }

    pub fn day_exhausted(&self) -> bool {
        self.max_send_per_day
            .is_some_and(|max| self.send_per_day >= max)
    }

    pub fn month_exhausted(&self) -> bool {
        self.max_send_per_month
            .is_some_and(|max| self.send_per_month >= max)
    }

    pub fn has_quota(&self) -> bool {
        !self.day_exhausted() && !self.month_exhausted()
    }

    /// Counts one send against every limited counter. Callers check `has_quota` first.
    pub fn claim(&mut self) -> QuotaClaim {
        let claim = QuotaClaim {
            day: self.max_send_per_day.is_some(),
            month: self.max_send_per_month.is_some(),
        };
        if claim.day {
            self.send_per_day += 1;
        }
        if claim.month {
            self.send_per_month += 1;
        }
        claim
    }

    pub fn release(&mut self, claim: QuotaClaim) {
        if claim.day {
            self.send_per_day = (self.send_per_day - 1).max(0);
        }
        if claim.month {
            self.send_per_month = (self.send_per_month - 1).max(0);
        }
    }
}

/// Steps until the boundary is in the future; a single step from a stale reset would
/// leave it in the past and wipe the counter again on the next send.
fn advance_past(
    mut at: DateTime<Utc>,
    now: DateTime<Utc>,
    step: impl Fn(DateTime<Utc>) -> DateTime<Utc>,
) -> DateTime<Utc> {
    while at <= now {
        at = step(at);
    }
    at
}

/// One calendar day in the local's zone, so the boundary keeps its wall-clock time
/// across DST changes.
fn next_day(at: DateTime<Utc>, tz: Tz) -> DateTime<Utc> {
    at.with_timezone(&tz)
        .checked_add_days(Days::new(1))
        .map(|d| d.with_timezone(&Utc))
        .unwrap_or_else(|| at + Duration::days(1))
}

fn next_month(at: DateTime<Utc>, tz: Tz) -> DateTime<Utc> {
    at.with_timezone(&tz)
        .checked_add_months(Months::new(1))
        .map(|d| d.with_timezone(&Utc))
        .or_else(|| at.checked_add_months(Months::new(1)))
        .unwrap_or_else(|| at + Duration::days(30))
}

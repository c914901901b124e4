pub mod dispatcher;
pub mod transport;

use chrono::Utc;
use chrono_tz::Tz;
use rusqlite::Connection;

use crate::db::{self, catalog, queries};
use crate::models::{Booking, BookingStatus, Local, LocalSettings, Service, Worker};
use crate::services::{calendar, tokens};
use crate::state::AppState;

pub use transport::{MailTransport, OutgoingEmail, SmtpMailer};

const DEFAULT_CONFIRM_LINK: &str = "{base_url}/bookings/{booking_id}/confirm?token={token}";
const DEFAULT_CANCEL_LINK: &str = "{base_url}/bookings/{booking_id}/cancel?token={token}";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum NotificationKind {
    /// Sent on creation: asks a pending booking to be confirmed, or confirms it outright.
    Confirmed,
    Cancelled,
    Updated,
}

impl NotificationKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            NotificationKind::Confirmed => "confirmed",
            NotificationKind::Cancelled => "cancelled",
            NotificationKind::Updated => "updated",
        }
    }
}

/// Everything besides the booking that goes into an email.
#[derive(Debug, Clone)]
pub struct NotificationContext {
    pub settings: LocalSettings,
    pub services: Vec<Service>,
    pub worker: Option<Worker>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Links {
    pub confirm: String,
    pub cancel: String,
}

impl Links {
    pub fn render(settings: &LocalSettings, base_url: &str, booking_id: &str, token: &str) -> Self {
        let confirm = settings.confirm_link.as_deref().filter(|t| !t.is_empty());
        let cancel = settings.cancel_link.as_deref().filter(|t| !t.is_empty());
        Self {
            confirm: fill(confirm.unwrap_or(DEFAULT_CONFIRM_LINK), base_url, booking_id, token),
            cancel: fill(cancel.unwrap_or(DEFAULT_CANCEL_LINK), base_url, booking_id, token),
        }
    }
}

fn fill(template: &str, base_url: &str, booking_id: &str, token: &str) -> String {
    template
        .replace("{base_url}", base_url.trim_end_matches('/'))
        .replace("{booking_id}", booking_id)
        .replace("{token}", token)
}

fn load_context(conn: &Connection, booking: &Booking) -> anyhow::Result<NotificationContext> {
    let settings = catalog::get_local_settings(conn, &booking.local_id)?;
    let mut services = vec![];
    for id in &booking.service_ids {
        if let Some(service) = catalog::get_service(conn, id)? {
            services.push(service);
        }
    }
    let worker = catalog::get_worker(conn, &booking.worker_id)?;
    Ok(NotificationContext {
        settings,
        services,
        worker,
    })
}

/// Sends the email for `kind` and records the outcome in `email_sent`. Failures never
/// reach the caller: the booking operation that triggered the email has already
/// committed.
pub async fn dispatch_notification(
    state: &AppState,
    local: &Local,
    booking: &Booking,
    kind: NotificationKind,
) -> bool {
    let context = {
        let conn = db::lock(&state.db);
        load_context(&conn, booking)
    };
    let context = match context {
        Ok(c) => c,
        Err(e) => {
            tracing::error!(booking_id = %booking.id, error = %e, "failed to load notification context");
            return false;
        }
    };
    let tz = match local.tz() {
        Ok(tz) => tz,
        Err(e) => {
            tracing::error!(booking_id = %booking.id, error = %e, "cannot render notification");
            return false;
        }
    };

    let token = tokens::issue(
        &state.config.token_secret,
        &booking.id,
        Utc::now() + state.config.token_ttl(),
    );
    let links = Links::render(&context.settings, &state.config.public_base_url, &booking.id, &token);
    let email = compose(kind, local, booking, &context, &links, tz);

    let sent = dispatcher::send_email(
        &state.db,
        state.mailer.as_ref(),
        local,
        &email,
        state.config.smtp_timeout(),
    )
    .await;

    let recorded = {
        let conn = db::lock(&state.db);
        queries::set_email_sent(&conn, &booking.id, sent)
    };
    if let Err(e) = recorded {
        tracing::error!(booking_id = %booking.id, error = %e, "failed to record email outcome");
    }

    tracing::info!(booking_id = %booking.id, kind = kind.as_str(), sent, "notification dispatched");
    sent
}

pub fn compose(
    kind: NotificationKind,
    local: &Local,
    booking: &Booking,
    context: &NotificationContext,
    links: &Links,
    tz: Tz,
) -> OutgoingEmail {
    let pending = booking.status == BookingStatus::Pending;
    let subject = match kind {
        NotificationKind::Confirmed if pending => {
            format!("Please confirm your booking at {}", local.name)
        }
        NotificationKind::Confirmed => format!("Your booking at {} is confirmed", local.name),
        NotificationKind::Cancelled => format!("Your booking at {} was cancelled", local.name),
        NotificationKind::Updated => format!("Your booking at {} was changed", local.name),
    };

    let start = booking.datetime_init.with_timezone(&tz);
    let end = booking.datetime_end.with_timezone(&tz);
    let mut lines = vec![
        format!("Hello {},", booking.client_name),
        String::new(),
        match kind {
            NotificationKind::Confirmed => "Thank you for your booking.".to_string(),
            NotificationKind::Cancelled => "Your booking has been cancelled.".to_string(),
            NotificationKind::Updated => "Your booking has been updated.".to_string(),
        },
        String::new(),
        format!(
            "When: {}, {} - {}",
            start.format("%A %d %B %Y"),
            start.format("%H:%M"),
            end.format("%H:%M")
        ),
    ];

    if !context.services.is_empty() {
        let names: Vec<&str> = context.services.iter().map(|s| s.name.as_str()).collect();
        lines.push(format!("Services: {}", names.join(", ")));
    }
    if let Some(worker) = &context.worker {
        lines.push(format!("With: {}", worker.name));
    }
    if !local.address.is_empty() {
        lines.push(format!("Where: {}", local.address));
    }
    if kind == NotificationKind::Cancelled {
        if let Some(comment) = booking.comment.as_deref().filter(|c| !c.is_empty()) {
            lines.push(format!("Note: {comment}"));
        }
    }

    if booking.status.is_active() {
        lines.push(String::new());
        if pending {
            lines.push(format!("Confirm your booking: {}", links.confirm));
            if let Some(timeout) = context.settings.expiry_timeout() {
                lines.push(format!(
                    "Unconfirmed bookings are released after {}.",
                    describe_timeout(timeout)
                ));
            }
        }
        lines.push(format!("Cancel your booking: {}", links.cancel));
    }

    let contacts = context.settings.contact_links();
    if !contacts.is_empty() || !local.phone.is_empty() {
        lines.push(String::new());
        if !local.phone.is_empty() {
            lines.push(format!("Phone: {}", local.phone));
        }
        for (label, url) in contacts {
            lines.push(format!("{label}: {url}"));
        }
    }

    lines.push(String::new());
    lines.push(local.name.clone());

    OutgoingEmail {
        to: booking.client_email.clone(),
        subject,
        body: lines.join("\n"),
        calendar: Some(calendar::generate_ics(booking, local, &context.services)),
    }
}

fn describe_timeout(timeout: chrono::Duration) -> String {
    let secs = timeout.num_seconds();
    match secs {
        s if s % 3600 == 0 && s >= 3600 => plural(s / 3600, "hour"),
        s if s % 60 == 0 && s >= 60 => plural(s / 60, "minute"),
        s => plural(s, "second"),
    }
}

fn plural(n: i64, unit: &str) -> String {
    if n == 1 {
        format!("1 {unit}")
    } else {
        format!("{n} {unit}s")
    }
}

use std::time::Duration;

use anyhow::Context;
use async_trait::async_trait;
use lettre::message::header::ContentType;
use lettre::message::{Attachment, Mailbox, MultiPart, SinglePart};
use lettre::transport::smtp::authentication::Credentials;
use lettre::{AsyncSmtpTransport, AsyncTransport, Message, Tokio1Executor};

use crate::models::{SmtpProvider, SmtpSecurity};

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OutgoingEmail {
    pub to: String,
    pub subject: String,
    pub body: String,
    /// iCalendar document sent as a `.ics` attachment.
    pub calendar: Option<String>,
}

#[async_trait]
pub trait MailTransport: Send + Sync {
    async fn send(&self, provider: &SmtpProvider, email: &OutgoingEmail) -> anyhow::Result<()>;
}

/// Sends through the provider's SMTP server. A transport is built per send since every
/// local brings its own servers and credentials.
pub struct SmtpMailer {
    timeout: Duration,
}

impl SmtpMailer {
    pub fn new(timeout: Duration) -> Self {
        Self { timeout }
    }

    fn transport(&self, provider: &SmtpProvider) -> anyhow::Result<AsyncSmtpTransport<Tokio1Executor>> {
        let builder = match provider.security {
            SmtpSecurity::Tls => AsyncSmtpTransport::<Tokio1Executor>::relay(&provider.host)
                .with_context(|| format!("invalid TLS relay {}", provider.host))?,
            SmtpSecurity::StartTls => {
                AsyncSmtpTransport::<Tokio1Executor>::starttls_relay(&provider.host)
                    .with_context(|| format!("invalid STARTTLS relay {}", provider.host))?
            }
            SmtpSecurity::None => AsyncSmtpTransport::<Tokio1Executor>::builder_dangerous(&provider.host),
        };

        let mut builder = builder.port(provider.port).timeout(Some(self.timeout));
        if !provider.username.is_empty() {
            builder = builder.credentials(Credentials::new(
                provider.username.clone(),
                provider.password.clone(),
            ));
        }
        Ok(builder.build())
    }
}

#[async_trait]
impl MailTransport for SmtpMailer {
    async fn send(&self, provider: &SmtpProvider, email: &OutgoingEmail) -> anyhow::Result<()> {
        let message = build_message(&provider.from_address, email)?;

        self.transport(provider)?
            .send(message)
            .await
            .with_context(|| format!("SMTP send via {} failed", provider.host))?;

        Ok(())
    }
}

fn build_message(from: &str, email: &OutgoingEmail) -> anyhow::Result<Message> {
    let from: Mailbox = from
        .parse()
        .with_context(|| format!("invalid sender address: {from}"))?;
    let to: Mailbox = email
        .to
        .parse()
        .with_context(|| format!("invalid recipient address: {}", email.to))?;

    let builder = Message::builder().from(from).to(to).subject(email.subject.as_str());

    let message = match &email.calendar {
        Some(ics) => {
            let content_type = ContentType::parse("text/calendar; charset=utf-8")
                .map_err(|e| anyhow::anyhow!("invalid calendar content type: {e}"))?;
            builder.multipart(
                MultiPart::mixed()
                    .singlepart(SinglePart::plain(email.body.clone()))
                    .singlepart(Attachment::new("booking.ics".to_string()).body(ics.clone(), content_type)),
            )
        }
        None => builder.body(email.body.clone()),
    };

    message.context("failed to build email")
}

#[cfg(test)]
mod tests {
    use super::*;

    fn email(calendar: Option<&str>) -> OutgoingEmail {
        OutgoingEmail {
            to: "ana@example.com".to_string(),
            subject: "Booking at Salon".to_string(),
            body: "See you soon".to_string(),
            calendar: calendar.map(str::to_string),
        }
    }

    #[test]
    fn test_build_plain_message() {
        let message = build_message("Salon <salon@example.com>", &email(None)).unwrap();
        let raw = String::from_utf8(message.formatted()).unwrap();
        assert!(raw.contains("Subject: Booking at Salon"));
        assert!(raw.contains("To: ana@example.com"));
        assert!(raw.contains("See you soon"));
    }

    #[test]
    fn test_build_message_with_calendar_attachment() {
        let message =
            build_message("salon@example.com", &email(Some("BEGIN:VCALENDAR\r\nEND:VCALENDAR\r\n"))).unwrap();
        let raw = String::from_utf8(message.formatted()).unwrap();
        assert!(raw.contains("multipart/mixed"));
        assert!(raw.contains("text/calendar"));
        assert!(raw.contains("booking.ics"));
    }

    #[test]
    fn test_invalid_addresses_are_errors() {
        assert!(build_message("not an address", &email(None)).is_err());
        let mut bad = email(None);
        bad.to = "nobody".to_string();
        assert!(build_message("salon@example.com", &bad).is_err());
    }
}

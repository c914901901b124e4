use std::time::Duration;

use chrono::{DateTime, Utc};
use chrono_tz::Tz;

use super::transport::{MailTransport, OutgoingEmail};
use crate::db::{self, queries, Db};
use crate::models::{Local, QuotaClaim, SmtpProvider};

/// Quota held on one provider while a send is in flight. Dropping it without
/// [`Reservation::commit`] gives the quota back, which also covers a dispatch future
/// cancelled mid-send.
pub struct Reservation {
    db: Db,
    provider: SmtpProvider,
    claim: QuotaClaim,
    committed: bool,
}

impl Reservation {
    pub fn provider(&self) -> &SmtpProvider {
        &self.provider
    }

    pub fn commit(mut self) {
        self.committed = true;
    }
}

impl Drop for Reservation {
    fn drop(&mut self) {
        if self.committed || !(self.claim.day || self.claim.month) {
            return;
        }
        let result = db::write_tx(&self.db, |tx| -> anyhow::Result<()> {
            let Some(mut current) = queries::get_smtp_provider(tx, &self.provider.id)? else {
                return Ok(());
            };
            // A counter reset since the claim already dropped what we took.
            let claim = QuotaClaim {
                day: self.claim.day && current.reset_send_per_day == self.provider.reset_send_per_day,
                month: self.claim.month
                    && current.reset_send_per_month == self.provider.reset_send_per_month,
            };
            current.release(claim);
            queries::save_provider_counters(tx, &current)
        });
        if let Err(e) = result {
            tracing::error!(provider_id = %self.provider.id, error = %e, "failed to release quota");
        }
    }
}

/// Rolls the provider's counters forward and, when quota is left, claims one send.
/// Returns `None` when the provider is exhausted or gone.
pub fn reserve(
    db: &Db,
    provider_id: &str,
    tz: Tz,
    now: DateTime<Utc>,
) -> anyhow::Result<Option<Reservation>> {
    db::write_tx(db, |tx| {
        let Some(mut provider) = queries::get_smtp_provider(tx, provider_id)? else {
            return Ok(None);
        };

        let rolled = provider.roll_forward(now, tz);
        if !provider.has_quota() {
            if rolled {
                queries::save_provider_counters(tx, &provider)?;
            }
            return Ok(None);
        }

        let claim = provider.claim();
        queries::save_provider_counters(tx, &provider)?;
        Ok(Some(Reservation {
            db: db.clone(),
            provider,
            claim,
            committed: false,
        }))
    })
}

/// Tries the local's providers by ascending priority until one accepts the email.
/// Exhausted providers are skipped; a failed or timed out send gives its quota back and
/// moves on. Returns whether the email went out.
pub async fn send_email(
    db: &Db,
    transport: &dyn MailTransport,
    local: &Local,
    email: &OutgoingEmail,
    send_timeout: Duration,
) -> bool {
    let tz = match local.tz() {
        Ok(tz) => tz,
        Err(e) => {
            tracing::error!(local_id = %local.id, error = %e, "cannot send email");
            return false;
        }
    };

    let providers = {
        let conn = db::lock(db);
        queries::get_smtp_providers(&conn, &local.id)
    };
    let providers = match providers {
        Ok(p) => p,
        Err(e) => {
            tracing::error!(local_id = %local.id, error = %e, "failed to load smtp providers");
            return false;
        }
    };
    if providers.is_empty() {
        tracing::warn!(local_id = %local.id, "no smtp providers configured");
        return false;
    }

    for provider in providers {
        let reservation = match reserve(db, &provider.id, tz, Utc::now()) {
            Ok(Some(r)) => r,
            Ok(None) => {
                tracing::debug!(provider = %provider.host, priority = provider.priority, "smtp quota exhausted, skipping");
                continue;
            }
            Err(e) => {
                tracing::warn!(provider = %provider.host, error = %e, "failed to reserve smtp quota");
                continue;
            }
        };

        match tokio::time::timeout(send_timeout, transport.send(reservation.provider(), email)).await {
            Ok(Ok(())) => {
                tracing::info!(provider = %provider.host, to = %email.to, "email sent");
                reservation.commit();
                return true;
            }
            Ok(Err(e)) => {
                tracing::warn!(provider = %provider.host, error = %e, "smtp send failed, trying next provider");
            }
            Err(_) => {
                tracing::warn!(provider = %provider.host, timeout_secs = send_timeout.as_secs(), "smtp send timed out, trying next provider");
            }
        }
    }

    tracing::warn!(local_id = %local.id, to = %email.to, "no smtp provider accepted the email");
    false
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::catalog;
    use crate::models::SmtpSecurity;
    use async_trait::async_trait;
    use chrono::{Duration as ChronoDuration, NaiveDateTime};
    use std::sync::{Arc, Mutex};

    fn at(s: &str) -> DateTime<Utc> {
        NaiveDateTime::parse_from_str(s, "%Y-%m-%d %H:%M:%S")
            .unwrap()
            .and_utc()
    }

    /// Whole seconds, matching what storage keeps.
    fn in_hours(hours: i64) -> DateTime<Utc> {
        DateTime::from_timestamp(Utc::now().timestamp() + hours * 3600, 0).unwrap()
    }

    fn local() -> Local {
        Local {
            id: "l1".to_string(),
            name: "Salon".to_string(),
            email: "salon@example.com".to_string(),
            phone: String::new(),
            address: String::new(),
            timezone: "UTC".to_string(),
            api_token: "secret".to_string(),
        }
    }

    fn provider(id: &str, priority: i64, max_day: Option<i64>, sent_day: i64, reset: DateTime<Utc>) -> SmtpProvider {
        SmtpProvider {
            id: id.to_string(),
            local_id: "l1".to_string(),
            host: format!("{id}.example.com"),
            port: 587,
            security: SmtpSecurity::StartTls,
            username: String::new(),
            password: String::new(),
            from_address: "salon@example.com".to_string(),
            priority,
            send_per_day: sent_day,
            send_per_month: 0,
            max_send_per_day: max_day,
            max_send_per_month: None,
            reset_send_per_day: reset,
            reset_send_per_month: reset,
        }
    }

    fn setup_db(providers: &[SmtpProvider]) -> Db {
        let conn = db::init_db(":memory:").unwrap();
        catalog::insert_local(&conn, &local()).unwrap();
        for p in providers {
            queries::insert_smtp_provider(&conn, p).unwrap();
        }
        Arc::new(Mutex::new(conn))
    }

    fn email() -> OutgoingEmail {
        OutgoingEmail {
            to: "ana@example.com".to_string(),
            subject: "Hi".to_string(),
            body: "Hello".to_string(),
            calendar: None,
        }
    }

    fn stored(db: &Db, id: &str) -> SmtpProvider {
        queries::get_smtp_provider(&db::lock(db), id).unwrap().unwrap()
    }

    /// Fails for hosts in `failing`, hangs for hosts in `hanging`, records the rest.
    struct ScriptedTransport {
        failing: Vec<String>,
        hanging: Vec<String>,
        sent_via: Mutex<Vec<String>>,
    }

    impl ScriptedTransport {
        fn new(failing: &[&str], hanging: &[&str]) -> Self {
            Self {
                failing: failing.iter().map(|s| s.to_string()).collect(),
                hanging: hanging.iter().map(|s| s.to_string()).collect(),
                sent_via: Mutex::new(vec![]),
            }
        }
    }

    #[async_trait]
    impl MailTransport for ScriptedTransport {
        async fn send(&self, provider: &SmtpProvider, _email: &OutgoingEmail) -> anyhow::Result<()> {
            if self.hanging.contains(&provider.id) {
                std::future::pending::<()>().await;
            }
            if self.failing.contains(&provider.id) {
                anyhow::bail!("connection refused");
            }
            self.sent_via.lock().unwrap().push(provider.id.clone());
            Ok(())
        }
    }

    #[tokio::test]
    async fn test_exhausted_provider_is_skipped_untouched() {
        let future_reset = in_hours(6);
        let db = setup_db(&[
            provider("a", 1, Some(1), 1, future_reset),
            provider("b", 2, Some(10), 0, future_reset),
        ]);
        let transport = ScriptedTransport::new(&[], &[]);

        assert!(send_email(&db, &transport, &local(), &email(), Duration::from_secs(5)).await);
        assert_eq!(*transport.sent_via.lock().unwrap(), vec!["b".to_string()]);

        let a = stored(&db, "a");
        assert_eq!(a.send_per_day, 1);
        assert_eq!(a.reset_send_per_day, future_reset);
        assert_eq!(stored(&db, "b").send_per_day, 1);
    }

    #[tokio::test]
    async fn test_past_reset_rolls_forward_before_sending() {
        let reset = at("2020-01-01 00:00:00");
        let db = setup_db(&[provider("a", 1, Some(1), 1, reset)]);
        let transport = ScriptedTransport::new(&[], &[]);

        assert!(send_email(&db, &transport, &local(), &email(), Duration::from_secs(5)).await);

        let a = stored(&db, "a");
        assert_eq!(a.send_per_day, 1);
        assert!(a.reset_send_per_day > Utc::now());
        assert!(a.reset_send_per_day <= Utc::now() + ChronoDuration::days(1));
    }

    #[tokio::test]
    async fn test_failed_send_releases_quota_and_fails_over() {
        let reset = in_hours(6);
        let db = setup_db(&[
            provider("a", 1, Some(5), 2, reset),
            provider("b", 2, Some(5), 0, reset),
        ]);
        let transport = ScriptedTransport::new(&["a"], &[]);

        assert!(send_email(&db, &transport, &local(), &email(), Duration::from_secs(5)).await);
        assert_eq!(stored(&db, "a").send_per_day, 2);
        assert_eq!(stored(&db, "b").send_per_day, 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_timed_out_send_releases_quota() {
        let reset = in_hours(6);
        let db = setup_db(&[provider("a", 1, Some(5), 0, reset)]);
        let transport = ScriptedTransport::new(&[], &["a"]);

        assert!(!send_email(&db, &transport, &local(), &email(), Duration::from_secs(10)).await);
        assert_eq!(stored(&db, "a").send_per_day, 0);
    }

    #[tokio::test]
    async fn test_all_providers_failing_returns_false() {
        let reset = in_hours(6);
        let db = setup_db(&[
            provider("a", 1, None, 0, reset),
            provider("b", 2, None, 0, reset),
        ]);
        let transport = ScriptedTransport::new(&["a", "b"], &[]);

        assert!(!send_email(&db, &transport, &local(), &email(), Duration::from_secs(5)).await);
        assert!(!send_email(&db, &transport, &local(), &email(), Duration::from_secs(5)).await);
    }

    #[tokio::test]
    async fn test_no_providers_returns_false() {
        let db = setup_db(&[]);
        let transport = ScriptedTransport::new(&[], &[]);
        assert!(!send_email(&db, &transport, &local(), &email(), Duration::from_secs(5)).await);
    }

    #[test]
    fn test_dropped_reservation_gives_quota_back() {
        let reset = in_hours(6);
        let db = setup_db(&[provider("a", 1, Some(2), 1, reset)]);

        let reservation = reserve(&db, "a", chrono_tz::UTC, Utc::now()).unwrap().unwrap();
        assert_eq!(stored(&db, "a").send_per_day, 2);
        assert!(reserve(&db, "a", chrono_tz::UTC, Utc::now()).unwrap().is_none());

        drop(reservation);
        assert_eq!(stored(&db, "a").send_per_day, 1);
    }

    #[test]
    fn test_committed_reservation_keeps_quota() {
        let reset = in_hours(6);
        let db = setup_db(&[provider("a", 1, Some(2), 0, reset)]);

        reserve(&db, "a", chrono_tz::UTC, Utc::now()).unwrap().unwrap().commit();
        assert_eq!(stored(&db, "a").send_per_day, 1);
    }
}

use std::env;
use std::time::Duration;

use rand::distributions::Alphanumeric;
use rand::Rng;

#[derive(Clone, Debug)]
pub struct AppConfig {
    pub port: u16,
    pub database_url: String,
    /// Key for booking access tokens. When unset a random one is generated, so links in
    /// emails stop working after a restart.
    pub token_secret: String,
    pub token_ttl_secs: i64,
    /// Prefix of the links put into notification emails.
    pub public_base_url: String,
    pub smtp_timeout_secs: u64,
    pub sweep_interval_secs: u64,
}

impl AppConfig {
    pub fn from_env() -> Self {
        let port = env::var("PORT")
            .ok()
            .and_then(|v| v.parse().ok())
            .unwrap_or(3000);

        Self {
            port,
            database_url: env::var("DATABASE_URL").unwrap_or_else(|_| "localbook.db".to_string()),
            token_secret: env::var("TOKEN_SECRET")
                .ok()
                .filter(|s| !s.is_empty())
                .unwrap_or_else(random_secret),
            token_ttl_secs: parse_or("TOKEN_TTL_SECS", 7 * 24 * 3600),
            public_base_url: env::var("PUBLIC_BASE_URL")
                .unwrap_or_else(|_| format!("http://localhost:{port}")),
            smtp_timeout_secs: parse_or("SMTP_TIMEOUT_SECS", 10),
            sweep_interval_secs: parse_or("SWEEP_INTERVAL_SECS", 60),
        }
    }

    pub fn token_ttl(&self) -> chrono::Duration {
        chrono::Duration::seconds(self.token_ttl_secs)
    }

    pub fn smtp_timeout(&self) -> Duration {
        Duration::from_secs(self.smtp_timeout_secs)
    }

    pub fn sweep_interval(&self) -> Duration {
        Duration::from_secs(self.sweep_interval_secs.max(1))
    }
}

fn parse_or<T: std::str::FromStr>(key: &str, default: T) -> T {
    env::var(key)
        .ok()
        .and_then(|v| v.parse().ok())
        .unwrap_or(default)
}

fn random_secret() -> String {
    rand::thread_rng()
        .sample_iter(&Alphanumeric)
        .take(48)
        .map(char::from)
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_random_secrets_differ() {
        let a = random_secret();
        assert_eq!(a.len(), 48);
        assert_ne!(a, random_secret());
    }

    #[test]
    fn test_parse_or_falls_back() {
        assert_eq!(parse_or("LOCALBOOK_TEST_UNSET_VARIABLE", 42u64), 42);
    }
}

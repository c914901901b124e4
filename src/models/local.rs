use chrono_tz::Tz;
use serde::{Deserialize, Serialize};

use crate::errors::AppError;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Local {
    pub id: String,
    pub name: String,
    pub email: String,
    pub phone: String,
    pub address: String,
    pub timezone: String,
    #[serde(skip_serializing)]
    pub api_token: String,
}

impl Local {
    pub fn tz(&self) -> Result<Tz, AppError> {
        self.timezone
            .parse::<Tz>()
            .map_err(|_| AppError::InvalidTimezone(self.timezone.clone()))
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct LocalSettings {
    pub local_id: String,
    /// Seconds a pending booking waits for confirmation. `None` or `0` keeps it pending.
    pub booking_timeout: Option<i64>,
    pub website: Option<String>,
    pub instagram: Option<String>,
    pub whatsapp: Option<String>,
    /// Link templates with `{base_url}`, `{booking_id}` and `{token}` placeholders.
    pub confirm_link: Option<String>,
    pub cancel_link: Option<String>,
}

impl LocalSettings {
    pub fn empty(local_id: &str) -> Self {
        Self {
            local_id: local_id.to_string(),
            ..Self::default()
        }
    }

    pub fn expiry_timeout(&self) -> Option<chrono::Duration> {
        match self.booking_timeout {
            Some(secs) if secs > 0 => Some(chrono::Duration::seconds(secs)),
            _ => None,
        }
    }

    pub fn contact_links(&self) -> Vec<(&'static str, &str)> {
        [
            ("Website", self.website.as_deref()),
            ("Instagram", self.instagram.as_deref()),
            ("WhatsApp", self.whatsapp.as_deref()),
        ]
        .into_iter()
        .filter_map(|(label, link)| link.filter(|l| !l.is_empty()).map(|l| (label, l)))
        .collect()
    }
}

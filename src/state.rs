use std::sync::Arc;

use crate::config::AppConfig;
use crate::db::Db;
use crate::services::expiry::ExpiryScheduler;
use crate::services::notifications::MailTransport;

pub struct AppState {
    pub db: Db,
    pub config: AppConfig,
    pub mailer: Box<dyn MailTransport>,
    pub expiry: Arc<dyn ExpiryScheduler>,
}

use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WorkGroup {
    pub id: String,
    pub local_id: String,
    pub name: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Worker {
    pub id: String,
    pub local_id: String,
    pub name: String,
    pub email: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Service {
    pub id: String,
    pub work_group_id: String,
    pub name: String,
    pub duration_minutes: i64,
    pub price_cents: i64,
}

pub fn total_duration(services: &[Service]) -> chrono::Duration {
    chrono::Duration::minutes(services.iter().map(|s| s.duration_minutes).sum())
}

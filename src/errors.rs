use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use chrono::{DateTime, Utc};

use crate::models::BookingStatus;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorKind {
    Validation,
    NotFound,
    Conflict,
    Authorization,
    Internal,
}

/// Why a local cannot take a booking in a given window.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Unavailability {
    OutsideHours { hours: String },
    Closed { period_id: String, description: Option<String> },
}

impl std::fmt::Display for Unavailability {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Unavailability::OutsideHours { hours } if hours.is_empty() => {
                write!(f, "no opening hours on that day")
            }
            Unavailability::OutsideHours { hours } => write!(f, "outside opening hours ({hours})"),
            Unavailability::Closed {
                description: Some(description),
                ..
            } => write!(f, "closed: {description}"),
            Unavailability::Closed { period_id, .. } => write!(f, "closed (period {period_id})"),
        }
    }
}

#[derive(Debug, thiserror::Error)]
pub enum AppError {
    #[error("database error: {0}")]
    Database(#[from] rusqlite::Error),

    #[error("storage error: {0}")]
    Storage(#[from] anyhow::Error),

    #[error("{entity} not found: {id}")]
    NotFound { entity: &'static str, id: String },

    #[error("unauthorized")]
    Unauthorized,

    #[error("bookings must start in the future (requested {start})")]
    PastDate { start: DateTime<Utc> },

    #[error("services {service_ids:?} belong to more than one work group")]
    CrossGroup { service_ids: Vec<String> },

    #[error("worker {worker_id} does not belong to work group {work_group_id}")]
    WrongGroup {
        worker_id: String,
        work_group_id: String,
    },

    #[error("a booking needs at least one service")]
    NoServices,

    #[error("invalid client details: {0}")]
    InvalidClient(String),

    #[error("invalid time range: {0}")]
    InvalidRange(String),

    #[error("unknown timezone: {0}")]
    InvalidTimezone(String),

    #[error("worker {worker_id} is already booked between {start} and {end}")]
    WorkerUnavailable {
        worker_id: String,
        start: DateTime<Utc>,
        end: DateTime<Utc>,
    },

    #[error("no worker of work group {work_group_id} is free between {start} and {end}")]
    NoWorkerAvailable {
        work_group_id: String,
        start: DateTime<Utc>,
        end: DateTime<Utc>,
    },

    #[error("local {local_id} cannot take bookings between {start} and {end}: {reason}")]
    LocalUnavailable {
        local_id: String,
        start: DateTime<Utc>,
        end: DateTime<Utc>,
        reason: Unavailability,
    },

    #[error("booking {booking_id} cannot move from {from} to {to}")]
    InvalidTransition {
        booking_id: String,
        from: BookingStatus,
        to: BookingStatus,
    },

    #[error("booking {booking_id} is {status} and can no longer be changed")]
    NotEditable {
        booking_id: String,
        status: BookingStatus,
    },
}

impl AppError {
    pub fn not_found(entity: &'static str, id: impl Into<String>) -> Self {
        AppError::NotFound {
            entity,
            id: id.into(),
        }
    }

    pub fn kind(&self) -> ErrorKind {
        match self {
            AppError::PastDate { .. }
            | AppError::CrossGroup { .. }
            | AppError::WrongGroup { .. }
            | AppError::NoServices
            | AppError::InvalidClient(_)
            | AppError::InvalidRange(_)
            | AppError::InvalidTimezone(_) => ErrorKind::Validation,
            AppError::NotFound { .. } => ErrorKind::NotFound,
            AppError::WorkerUnavailable { .. }
            | AppError::NoWorkerAvailable { .. }
            | AppError::LocalUnavailable { .. }
            | AppError::InvalidTransition { .. }
            | AppError::NotEditable { .. } => ErrorKind::Conflict,
            AppError::Unauthorized => ErrorKind::Authorization,
            AppError::Database(_) | AppError::Storage(_) => ErrorKind::Internal,
        }
    }
}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        let status = match self.kind() {
            ErrorKind::Validation => StatusCode::UNPROCESSABLE_ENTITY,
            ErrorKind::NotFound => StatusCode::NOT_FOUND,
            ErrorKind::Conflict => StatusCode::CONFLICT,
            ErrorKind::Authorization => StatusCode::UNAUTHORIZED,
            ErrorKind::Internal => StatusCode::INTERNAL_SERVER_ERROR,
        };

        if status == StatusCode::INTERNAL_SERVER_ERROR {
            tracing::error!(error = %self, "request failed");
        }

        let body = serde_json::json!({ "error": self.to_string() });
        (status, axum::Json(body)).into_response()
    }
}

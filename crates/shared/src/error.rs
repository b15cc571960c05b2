use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::domain::CarId;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum BackendErrorCode {
    DiscoveryFailed,
    BrowseFailed,
    CarNotFound,
    AlreadyRunning,
    NotRunning,
    Internal,
}

#[derive(Debug, Clone, Error, Serialize, Deserialize)]
#[error("{code:?}: {message}")]
pub struct BackendError {
    pub code: BackendErrorCode,
    pub message: String,
}

impl BackendError {
    pub fn new(code: BackendErrorCode, message: impl Into<String>) -> Self {
        Self {
            code,
            message: message.into(),
        }
    }

    pub fn discovery_failed(msg: &str) -> Self {
        Self::new(
            BackendErrorCode::DiscoveryFailed,
            format!("discovery start failed: {msg}"),
        )
    }

    pub fn browse_failed(msg: &str) -> Self {
        Self::new(
            BackendErrorCode::BrowseFailed,
            format!("discovery browse failed: {msg}"),
        )
    }

    pub fn car_not_found(car_id: &CarId) -> Self {
        Self::new(
            BackendErrorCode::CarNotFound,
            format!("car not found: {}", car_id.0),
        )
    }

    pub fn already_running() -> Self {
        Self::new(
            BackendErrorCode::AlreadyRunning,
            "discovery is already running",
        )
    }

    pub fn not_running() -> Self {
        Self::new(BackendErrorCode::NotRunning, "discovery is not running")
    }

    pub fn internal(msg: impl Into<String>) -> Self {
        Self::new(BackendErrorCode::Internal, msg)
    }
}

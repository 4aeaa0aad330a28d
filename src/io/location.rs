//! Location provider seam
//!
//! The platform exposes a single "get current position" call parameterized by
//! accuracy preference, timeout and the oldest acceptable cached fix.

use async_trait::async_trait;
use std::time::Duration;
use thiserror::Error;

/// Provider preference for a position request
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AccuracyPreference {
    /// Network / Wi-Fi positioning, GPS only if nothing else is available
    LowPower,
    /// GPS
    High,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PositionRequest {
    pub accuracy: AccuracyPreference,
    pub timeout: Duration,
    pub max_age: Duration,
}

/// A raw fix as reported by the platform
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct PositionFix {
    pub lat: f64,
    pub lng: f64,
    pub accuracy_meters: f64,
    /// Epoch milliseconds when the fix was taken
    pub timestamp: u64,
}

#[derive(Debug, Clone, PartialEq, Error)]
pub enum PositionUnavailable {
    #[error("location services are disabled")]
    ServicesDisabled,
    #[error("location permission denied")]
    PermissionDenied,
    #[error("no position fix within {0:?}")]
    Timeout(Duration),
    #[error("location provider error: {0}")]
    Provider(String),
}

#[async_trait]
pub trait LocationProvider: Send + Sync {
    async fn current_position(
        &self,
        request: PositionRequest,
    ) -> Result<PositionFix, PositionUnavailable>;
}

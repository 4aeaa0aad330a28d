//! Sensor platform seam (pedometer, accelerometer, compass)

use async_trait::async_trait;
use std::time::Duration;
use thiserror::Error;

#[derive(Debug, Clone, PartialEq, Error)]
pub enum SensorError {
    #[error("sensor unavailable: {0}")]
    Unavailable(String),
    #[error("sensor read timed out after {0:?}")]
    Timeout(Duration),
    #[error("sensor read failed: {0}")]
    Read(String),
}

#[async_trait]
pub trait SensorPlatform: Send + Sync {
    /// Cumulative step counter total
    async fn step_count(&self) -> Result<u64, SensorError>;

    /// Instantaneous acceleration magnitude in m/s²
    async fn acceleration(&self) -> Result<f64, SensorError>;

    /// Current heading in degrees (0 = north)
    async fn heading(&self) -> Result<f64, SensorError>;
}

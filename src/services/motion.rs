//! Motion classification from pedometer and accelerometer
//!
//! Step evidence always wins: any positive step delta is walking. With no
//! steps, the deviation of the acceleration magnitude from gravity separates
//! stationary, car and bike. Only walking is dead-reckoned.

use crate::domain::types::MotionState;
use crate::infra::config::Config;
use crate::infra::metrics::Metrics;
use crate::io::sensors::{SensorError, SensorPlatform};
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, warn};

/// Result of one sensor sampling pass
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct MotionSample {
    pub state: MotionState,
    pub current_steps: u64,
    pub step_delta: u64,
}

/// Classification thresholds
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct MotionThresholds {
    pub gravity: f64,
    pub stationary: f64,
    pub car: f64,
    pub walking_stride_m: f64,
}

impl Default for MotionThresholds {
    fn default() -> Self {
        Self { gravity: 9.8, stationary: 0.5, car: 2.0, walking_stride_m: 0.76 }
    }
}

/// Samples the sensor platform and infers the current motion mode
pub struct MotionClassifier {
    sensors: Arc<dyn SensorPlatform>,
    thresholds: MotionThresholds,
    read_timeout: Duration,
    metrics: Option<Arc<Metrics>>,
}

impl MotionClassifier {
    pub fn new(config: &Config, sensors: Arc<dyn SensorPlatform>) -> Self {
        let thresholds = MotionThresholds {
            gravity: config.gravity(),
            stationary: config.stationary_threshold(),
            car: config.car_threshold(),
            walking_stride_m: config.walking_stride_m(),
        };
        Self { sensors, thresholds, read_timeout: config.sensor_timeout(), metrics: None }
    }

    /// Create a classifier that counts sensor fallbacks
    pub fn with_metrics(
        config: &Config,
        sensors: Arc<dyn SensorPlatform>,
        metrics: Arc<Metrics>,
    ) -> Self {
        Self { metrics: Some(metrics), ..Self::new(config, sensors) }
    }

    pub fn classify_motion(&self, step_delta: u64, accel_magnitude: f64) -> MotionState {
        if step_delta > 0 {
            return MotionState::Walking;
        }

        let deviation = (accel_magnitude - self.thresholds.gravity).abs();
        if deviation <= self.thresholds.stationary {
            MotionState::Stationary
        } else if deviation <= self.thresholds.car {
            MotionState::VehicleCar
        } else {
            MotionState::VehicleBike
        }
    }

    /// Stride length used for dead reckoning; zero for every non-walking state
    pub fn stride_length(&self, state: MotionState) -> f64 {
        match state {
            MotionState::Walking => self.thresholds.walking_stride_m,
            MotionState::Stationary | MotionState::VehicleCar | MotionState::VehicleBike => 0.0,
        }
    }

    /// Read step counter and accelerometer, then classify.
    ///
    /// Never fails: any sensor error degrades to a stationary sample that
    /// keeps `last_step_count`, so a flaky sensor cannot produce movement.
    pub async fn detect_current_motion(&self, last_step_count: u64) -> MotionSample {
        match self.read_motion(last_step_count).await {
            Ok(sample) => sample,
            Err(e) => {
                warn!(error = %e, last_step_count = %last_step_count, "motion_sensor_fallback");
                if let Some(ref metrics) = self.metrics {
                    metrics.record_sensor_fallback();
                }
                Self::fallback(last_step_count)
            }
        }
    }

    /// Like `detect_current_motion`, but surfaces the sensor error
    pub async fn read_motion(&self, last_step_count: u64) -> Result<MotionSample, SensorError> {
        let (current_steps, accel) = self.read_sensors().await?;
        let step_delta = current_steps.saturating_sub(last_step_count);
        let state = self.classify_motion(step_delta, accel);
        debug!(
            steps = %current_steps,
            step_delta = %step_delta,
            accel = format!("{:.2}", accel),
            state = %state.as_str(),
            "motion_sampled"
        );
        Ok(MotionSample { state, current_steps, step_delta })
    }

    /// Read the compass, bounded by the sensor timeout
    pub async fn read_heading(&self) -> Result<f64, SensorError> {
        self.bounded(self.sensors.heading()).await
    }

    /// The sample used whenever the sensors cannot be trusted
    pub fn fallback(last_step_count: u64) -> MotionSample {
        MotionSample {
            state: MotionState::Stationary,
            current_steps: last_step_count,
            step_delta: 0,
        }
    }

    async fn read_sensors(&self) -> Result<(u64, f64), SensorError> {
        let steps = self.bounded(self.sensors.step_count()).await?;
        let accel = self.bounded(self.sensors.acceleration()).await?;
        if !accel.is_finite() {
            return Err(SensorError::Read(format!("non-finite acceleration {accel}")));
        }
        Ok((steps, accel))
    }

    async fn bounded<T>(
        &self,
        read: impl std::future::Future<Output = Result<T, SensorError>>,
    ) -> Result<T, SensorError> {
        match tokio::time::timeout(self.read_timeout, read).await {
            Ok(result) => result,
            Err(_) => Err(SensorError::Timeout(self.read_timeout)),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;

    struct FixedSensors {
        steps: Result<u64, SensorError>,
        accel: Result<f64, SensorError>,
    }

    #[async_trait]
    impl SensorPlatform for FixedSensors {
        async fn step_count(&self) -> Result<u64, SensorError> {
            self.steps.clone()
        }

        async fn acceleration(&self) -> Result<f64, SensorError> {
            self.accel.clone()
        }

        async fn heading(&self) -> Result<f64, SensorError> {
            Ok(0.0)
        }
    }

    struct StalledSensors;

    #[async_trait]
    impl SensorPlatform for StalledSensors {
        async fn step_count(&self) -> Result<u64, SensorError> {
            std::future::pending().await
        }

        async fn acceleration(&self) -> Result<f64, SensorError> {
            std::future::pending().await
        }

        async fn heading(&self) -> Result<f64, SensorError> {
            std::future::pending().await
        }
    }

    fn classifier(sensors: impl SensorPlatform + 'static) -> MotionClassifier {
        MotionClassifier::new(&Config::default(), Arc::new(sensors))
    }

    fn fixed(steps: u64, accel: f64) -> MotionClassifier {
        classifier(FixedSensors { steps: Ok(steps), accel: Ok(accel) })
    }

    #[test]
    fn test_classify_motion_table() {
        let c = fixed(0, 9.8);
        assert_eq!(c.classify_motion(0, 9.8), MotionState::Stationary);
        assert_eq!(c.classify_motion(0, 10.4), MotionState::VehicleCar);
        assert_eq!(c.classify_motion(0, 12.0), MotionState::VehicleBike);
        assert_eq!(c.classify_motion(5, 30.0), MotionState::Walking);
    }

    #[test]
    fn test_classify_motion_deviation_is_symmetric() {
        let c = fixed(0, 9.8);
        assert_eq!(c.classify_motion(0, 9.4), MotionState::Stationary);
        assert_eq!(c.classify_motion(0, 9.0), MotionState::VehicleCar);
        assert_eq!(c.classify_motion(0, 7.0), MotionState::VehicleBike);
    }

    #[test]
    fn test_classify_motion_boundaries_inclusive() {
        let c = fixed(0, 9.8);
        assert_eq!(c.classify_motion(0, 10.25), MotionState::Stationary);
        assert_eq!(c.classify_motion(0, 11.75), MotionState::VehicleCar);
    }

    #[test]
    fn test_stride_length() {
        let c = fixed(0, 9.8);
        assert!((c.stride_length(MotionState::Walking) - 0.76).abs() < 1e-9);
        assert_eq!(c.stride_length(MotionState::Stationary), 0.0);
        assert_eq!(c.stride_length(MotionState::VehicleCar), 0.0);
        assert_eq!(c.stride_length(MotionState::VehicleBike), 0.0);
    }

    #[tokio::test]
    async fn test_detect_walking() {
        let c = fixed(1_250, 11.0);
        let sample = c.detect_current_motion(1_200).await;
        assert_eq!(
            sample,
            MotionSample { state: MotionState::Walking, current_steps: 1_250, step_delta: 50 }
        );
    }

    #[tokio::test]
    async fn test_detect_counter_reset_gives_zero_delta() {
        let c = fixed(10, 9.8);
        let sample = c.detect_current_motion(5_000).await;
        assert_eq!(sample.step_delta, 0);
        assert_eq!(sample.current_steps, 10);
        assert_eq!(sample.state, MotionState::Stationary);
    }

    #[tokio::test]
    async fn test_detect_sensor_failure_falls_back() {
        let c = classifier(FixedSensors {
            steps: Err(SensorError::Unavailable("no pedometer".to_string())),
            accel: Ok(15.0),
        });
        let sample = c.detect_current_motion(42).await;
        assert_eq!(sample, MotionClassifier::fallback(42));
    }

    #[tokio::test]
    async fn test_detect_accel_failure_falls_back() {
        let c = classifier(FixedSensors {
            steps: Ok(500),
            accel: Err(SensorError::Read("i/o".to_string())),
        });
        let sample = c.detect_current_motion(100).await;
        assert_eq!(sample.state, MotionState::Stationary);
        assert_eq!(sample.current_steps, 100);
        assert_eq!(sample.step_delta, 0);
    }

    #[tokio::test]
    async fn test_detect_non_finite_accel_falls_back() {
        let c = fixed(500, f64::NAN);
        let sample = c.detect_current_motion(100).await;
        assert_eq!(sample, MotionClassifier::fallback(100));
    }

    #[tokio::test(start_paused = true)]
    async fn test_detect_stalled_sensor_times_out() {
        let c = classifier(StalledSensors);
        let sample = c.detect_current_motion(7).await;
        assert_eq!(sample, MotionClassifier::fallback(7));
        assert!(matches!(c.read_heading().await, Err(SensorError::Timeout(_))));
    }

    #[tokio::test]
    async fn test_fallbacks_counted_and_read_motion_surfaces_error() {
        let metrics = Arc::new(Metrics::new());
        let c = MotionClassifier::with_metrics(
            &Config::default(),
            Arc::new(FixedSensors {
                steps: Err(SensorError::Unavailable("no pedometer".to_string())),
                accel: Ok(9.8),
            }),
            metrics.clone(),
        );

        assert!(c.read_motion(0).await.is_err());
        assert_eq!(metrics.sensor_fallbacks(), 0);

        c.detect_current_motion(3).await;
        assert_eq!(metrics.sensor_fallbacks(), 1);
    }
}

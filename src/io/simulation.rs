//! Simulated walker for the demo binary and tests
//!
//! One walker backs both platform seams: the pedometer advances its true
//! position, the compass reports its heading, and the location provider
//! returns that position shifted by a configurable error.

use crate::domain::types::{epoch_ms, Coordinate};
use crate::infra::config::Config;
use crate::io::location::{LocationProvider, PositionFix, PositionRequest, PositionUnavailable};
use crate::io::sensors::{SensorError, SensorPlatform};
use crate::services::dead_reckoning::{calculate_new_position, destination_point};
use async_trait::async_trait;
use parking_lot::Mutex;
use tracing::debug;

/// Accuracy reported with every simulated fix
const SIMULATED_FIX_ACCURACY_M: f64 = 25.0;

#[derive(Debug, Clone)]
struct WalkerState {
    position: Coordinate,
    steps: u64,
    heading_deg: f64,
    stride_m: f64,
    steps_per_read: u64,
    accel_magnitude: f64,
    fix_offset_m: f64,
    location_available: bool,
    sensors_available: bool,
}

impl WalkerState {
    fn advance(&mut self, steps: u64) {
        if steps == 0 {
            return;
        }
        self.position =
            calculate_new_position(self.position, steps, self.heading_deg, self.stride_m);
        self.steps += steps;
    }
}

pub struct SimulatedWalker {
    state: Mutex<WalkerState>,
}

impl SimulatedWalker {
    pub fn new(start: Coordinate, stride_m: f64, accel_magnitude: f64) -> Self {
        Self {
            state: Mutex::new(WalkerState {
                position: start,
                steps: 0,
                heading_deg: 0.0,
                stride_m,
                steps_per_read: 0,
                accel_magnitude,
                fix_offset_m: 0.0,
                location_available: true,
                sensors_available: true,
            }),
        }
    }

    pub fn from_config(config: &Config) -> Self {
        let sim = config.simulation();
        let walker =
            Self::new(config.simulation_start(), config.walking_stride_m(), sim.accel_magnitude);
        {
            let mut state = walker.state.lock();
            state.heading_deg = sim.heading_deg;
            state.steps_per_read = sim.steps_per_read;
            state.fix_offset_m = sim.fix_offset_m;
        }
        walker
    }

    /// Take steps immediately along the current heading
    pub fn walk(&self, steps: u64) {
        self.state.lock().advance(steps);
    }

    /// Steps taken automatically on every pedometer read
    pub fn set_steps_per_read(&self, steps: u64) {
        self.state.lock().steps_per_read = steps;
    }

    pub fn set_heading(&self, heading_deg: f64) {
        self.state.lock().heading_deg = heading_deg;
    }

    pub fn set_acceleration(&self, magnitude: f64) {
        self.state.lock().accel_magnitude = magnitude;
    }

    /// Northward error applied to reported fixes
    pub fn set_fix_offset(&self, meters: f64) {
        self.state.lock().fix_offset_m = meters;
    }

    pub fn set_location_available(&self, available: bool) {
        self.state.lock().location_available = available;
    }

    pub fn set_sensors_available(&self, available: bool) {
        self.state.lock().sensors_available = available;
    }

    /// Relocate without touching the pedometer
    pub fn teleport(&self, position: Coordinate) {
        self.state.lock().position = position;
    }

    /// The walker's true position
    pub fn position(&self) -> Coordinate {
        self.state.lock().position
    }

    pub fn steps(&self) -> u64 {
        self.state.lock().steps
    }
}

#[async_trait]
impl LocationProvider for SimulatedWalker {
    async fn current_position(
        &self,
        _request: PositionRequest,
    ) -> Result<PositionFix, PositionUnavailable> {
        let state = self.state.lock().clone();
        if !state.location_available {
            return Err(PositionUnavailable::ServicesDisabled);
        }

        let reported = if state.fix_offset_m != 0.0 {
            destination_point(state.position, state.fix_offset_m, 0.0)
        } else {
            state.position
        };
        debug!(lat = %reported.lat, lng = %reported.lng, "simulated_fix");

        Ok(PositionFix {
            lat: reported.lat,
            lng: reported.lng,
            accuracy_meters: SIMULATED_FIX_ACCURACY_M,
            timestamp: epoch_ms(),
        })
    }
}

#[async_trait]
impl SensorPlatform for SimulatedWalker {
    async fn step_count(&self) -> Result<u64, SensorError> {
        let mut state = self.state.lock();
        if !state.sensors_available {
            return Err(SensorError::Unavailable("pedometer".to_string()));
        }
        let steps = state.steps_per_read;
        state.advance(steps);
        Ok(state.steps)
    }

    async fn acceleration(&self) -> Result<f64, SensorError> {
        let state = self.state.lock();
        if !state.sensors_available {
            return Err(SensorError::Unavailable("accelerometer".to_string()));
        }
        Ok(state.accel_magnitude)
    }

    async fn heading(&self) -> Result<f64, SensorError> {
        let state = self.state.lock();
        if !state.sensors_available {
            return Err(SensorError::Unavailable("compass".to_string()));
        }
        Ok(state.heading_deg)
    }
}

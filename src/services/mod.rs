//! Services - tracking logic and state management
//!
//! This module contains the core tracking services:
//! - `dead_reckoning` - Spherical position projection, distance and heading math
//! - `motion` - Motion classification from pedometer and accelerometer
//! - `anchor` - Low-power anchor acquisition and place-snapping
//! - `grid` - Precomputed per-place containment grids
//! - `notification_bus` - De-duplicated notification dispatch
//! - `notification_worker` - Async notification display worker
//! - `orchestrator` - Per-place geofence state machine and tick loop

pub mod anchor;
pub mod dead_reckoning;
pub mod grid;
pub mod motion;
pub mod notification_bus;
pub mod notification_worker;
pub mod orchestrator;

// Re-export commonly used types
pub use anchor::AnchorManager;
pub use grid::{Grid, GridCell};
pub use motion::{MotionClassifier, MotionSample};
pub use notification_bus::{EmitOutcome, NotificationBus};
pub use notification_worker::{create_notification_worker, NotificationWorker};
pub use orchestrator::{
    tracking_channel, Orchestrator, TickOutcome, TickReport, TrackingCommand, TrackingHandle,
};

//! IO modules - external system interfaces
//!
//! This module contains the seams to the platform and persistence layers:
//! - `location` - Location provider (position fixes)
//! - `sensors` - Pedometer, accelerometer and compass
//! - `notifier` - Notification display service
//! - `place_store` - Place repository and check-in history
//! - `jsonl` - Append-only JSONL output
//! - `simulation` - Simulated walker backing location and sensors

pub mod jsonl;
pub mod location;
pub mod notifier;
pub mod place_store;
pub mod sensors;
pub mod simulation;

// Re-export commonly used types
pub use location::{LocationProvider, PositionFix, PositionRequest, PositionUnavailable};
pub use notifier::{JsonlDisplay, Notification, NotificationDisplay, TracingDisplay};
pub use place_store::{InMemoryPlaceStore, PlaceRepository};
pub use sensors::{SensorError, SensorPlatform};
pub use simulation::SimulatedWalker;

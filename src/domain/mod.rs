//! Domain models - core tracking types and check-in history
//!
//! This module contains the canonical data types used throughout the system:
//! - `Coordinate`, `AnchorPosition` - positions and dead-reckoning anchors
//! - `Place`, `PlaceRecord` - monitored circular zones
//! - `MotionState` - classified motion mode
//! - `NotificationEvent` - events handed to the notification bus
//! - `CheckIn`, `CheckOut` - history written on geofence transitions

pub mod history;
pub mod types;

pub use history::{CheckIn, CheckOut, CheckOutReason, HistoryEntry};
pub use types::{
    epoch_ms, AnchorPosition, AnchorSource, Containment, Coordinate, EventSource, GeofenceState,
    MotionState, NotificationEvent, NotificationKind, Place, PlaceId, PlaceRecord,
};

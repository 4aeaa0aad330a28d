//! Shared value types for zone tracking

use serde::{Deserialize, Serialize};
use std::time::{SystemTime, UNIX_EPOCH};

/// Get current epoch milliseconds
#[inline]
pub fn epoch_ms() -> u64 {
    SystemTime::now().duration_since(UNIX_EPOCH).unwrap_or_default().as_millis() as u64
}

/// Newtype wrapper for place IDs to provide type safety
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[repr(transparent)]
pub struct PlaceId(pub i64);

impl std::fmt::Display for PlaceId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// A point on the earth's surface, in degrees
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Coordinate {
    pub lat: f64,
    pub lng: f64,
}

impl Coordinate {
    #[inline]
    pub const fn new(lat: f64, lng: f64) -> Self {
        Self { lat, lng }
    }
}

/// Where an anchor's coordinate came from
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum AnchorSource {
    /// Snapped onto a saved place's exact coordinates
    Home,
    Network,
    Gps,
}

impl AnchorSource {
    pub fn as_str(&self) -> &'static str {
        match self {
            AnchorSource::Home => "home",
            AnchorSource::Network => "network",
            AnchorSource::Gps => "gps",
        }
    }
}

/// Reference fix for dead reckoning. Superseded, never mutated.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct AnchorPosition {
    pub lat: f64,
    pub lng: f64,
    /// Epoch milliseconds of the underlying fix
    pub timestamp: u64,
    pub accuracy_meters: f64,
    pub source: AnchorSource,
}

impl AnchorPosition {
    #[inline]
    pub fn coordinate(&self) -> Coordinate {
        Coordinate::new(self.lat, self.lng)
    }
}

/// A monitored circular zone (read-only to the tracking core)
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Place {
    pub id: PlaceId,
    pub name: String,
    pub lat: f64,
    pub lng: f64,
    pub radius_meters: f64,
}

impl Place {
    #[inline]
    pub fn center(&self) -> Coordinate {
        Coordinate::new(self.lat, self.lng)
    }

    /// True when center or radius differ, i.e. the containment grid must be rebuilt
    pub fn geometry_differs(&self, other: &Place) -> bool {
        self.lat != other.lat || self.lng != other.lng || self.radius_meters != other.radius_meters
    }
}

/// A place as stored by the persistence layer, with its monitoring flag
#[derive(Debug, Clone, PartialEq)]
pub struct PlaceRecord {
    pub place: Place,
    pub enabled: bool,
}

/// Discrete motion mode inferred from pedometer and accelerometer
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum MotionState {
    Stationary,
    Walking,
    VehicleCar,
    VehicleBike,
}

impl MotionState {
    pub fn as_str(&self) -> &'static str {
        match self {
            MotionState::Stationary => "stationary",
            MotionState::Walking => "walking",
            MotionState::VehicleCar => "vehicle_car",
            MotionState::VehicleBike => "vehicle_bike",
        }
    }
}

/// Kinds of user-facing notification
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum NotificationKind {
    ScheduleStart,
    ScheduleEnd,
    ScheduleApproaching,
    PlaceEntered,
    PlaceExited,
    SoundRestored,
}

impl NotificationKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            NotificationKind::ScheduleStart => "schedule_start",
            NotificationKind::ScheduleEnd => "schedule_end",
            NotificationKind::ScheduleApproaching => "schedule_approaching",
            NotificationKind::PlaceEntered => "place_entered",
            NotificationKind::PlaceExited => "place_exited",
            NotificationKind::SoundRestored => "sound_restored",
        }
    }
}

/// What produced a notification event
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum EventSource {
    Alarm,
    Geofence,
    Timer,
    Manual,
}

impl EventSource {
    pub fn as_str(&self) -> &'static str {
        match self {
            EventSource::Alarm => "alarm",
            EventSource::Geofence => "geofence",
            EventSource::Timer => "timer",
            EventSource::Manual => "manual",
        }
    }
}

/// Transient event handed to the notification bus
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct NotificationEvent {
    pub kind: NotificationKind,
    pub place_id: PlaceId,
    pub place_name: String,
    /// Epoch milliseconds; also the clock used for deduplication
    pub timestamp: u64,
    pub source: EventSource,
}

impl NotificationEvent {
    pub fn new(kind: NotificationKind, place: &Place, timestamp: u64, source: EventSource) -> Self {
        Self { kind, place_id: place.id, place_name: place.name.clone(), timestamp, source }
    }
}

/// Per-place geofence state
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum GeofenceState {
    #[default]
    Outside,
    Inside,
}

impl GeofenceState {
    pub fn as_str(&self) -> &'static str {
        match self {
            GeofenceState::Outside => "outside",
            GeofenceState::Inside => "inside",
        }
    }
}

/// Result of testing a position against a place's grid
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Containment {
    Inside,
    Outside,
    /// Position is beyond the grid's extent; carries no information
    Indeterminate,
}

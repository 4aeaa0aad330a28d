//! Check-in history records written to the place repository

use crate::domain::types::{Place, PlaceId};
use chrono::{DateTime, Utc};
use serde::Serialize;
use uuid::Uuid;

/// Generate a new UUIDv7 (time-sortable)
pub fn new_uuid_v7() -> String {
    Uuid::now_v7().to_string()
}

/// Why a check-in was closed
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum CheckOutReason {
    /// Containment test placed the device outside the radius
    Exited,
    /// Place was disabled or deleted while the device was inside
    PlaceRemoved,
    /// Tracking was switched off globally
    TrackingDisabled,
    /// Emergency purge after a permission was revoked
    Purged,
}

impl CheckOutReason {
    pub fn as_str(&self) -> &'static str {
        match self {
            CheckOutReason::Exited => "exited",
            CheckOutReason::PlaceRemoved => "place_removed",
            CheckOutReason::TrackingDisabled => "tracking_disabled",
            CheckOutReason::Purged => "purged",
        }
    }
}

/// Written on OUTSIDE -> INSIDE
#[derive(Debug, Clone, Serialize)]
pub struct CheckIn {
    pub id: String,
    pub place_id: PlaceId,
    pub place_name: String,
    pub checked_in_at: DateTime<Utc>,
}

impl CheckIn {
    pub fn new(place: &Place, checked_in_at: DateTime<Utc>) -> Self {
        Self {
            id: new_uuid_v7(),
            place_id: place.id,
            place_name: place.name.clone(),
            checked_in_at,
        }
    }
}

/// Written when an open check-in is closed
#[derive(Debug, Clone, Serialize)]
pub struct CheckOut {
    /// Id of the check-in being closed
    pub check_in_id: String,
    pub place_id: PlaceId,
    pub place_name: String,
    pub checked_in_at: DateTime<Utc>,
    pub checked_out_at: DateTime<Utc>,
    pub duration_secs: i64,
    pub reason: CheckOutReason,
}

impl CheckOut {
    pub fn close(
        check_in: &CheckIn,
        checked_out_at: DateTime<Utc>,
        reason: CheckOutReason,
    ) -> Self {
        let duration_secs = (checked_out_at - check_in.checked_in_at).num_seconds().max(0);
        Self {
            check_in_id: check_in.id.clone(),
            place_id: check_in.place_id,
            place_name: check_in.place_name.clone(),
            checked_in_at: check_in.checked_in_at,
            checked_out_at,
            duration_secs,
            reason,
        }
    }
}

/// One line of the history file
#[derive(Debug, Clone, Serialize)]
#[serde(tag = "t", rename_all = "snake_case")]
pub enum HistoryEntry {
    CheckIn(CheckIn),
    CheckOut(CheckOut),
}

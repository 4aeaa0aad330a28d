//! Transition and lifecycle handlers for the Orchestrator
//!
//! Transitions write check-in history and emit notifications. Lifecycle
//! handlers keep the monitored set in step with the place repository and
//! close any open check-in before a place stops being tracked.

use super::{MonitoredPlace, Orchestrator, PlaceTracking, TrackingCommand};
use crate::domain::history::{CheckIn, CheckOut, CheckOutReason};
use crate::domain::types::{
    epoch_ms, EventSource, GeofenceState, NotificationEvent, NotificationKind, Place, PlaceId,
    PlaceRecord,
};
use crate::services::grid::Grid;
use chrono::Utc;
use std::ops::ControlFlow;
use tracing::{debug, error, info, warn};

/// How the ringer is handed back when its silencing place stops applying
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum RingerRelease {
    /// Emit SOUND_RESTORED with the given source if no other place takes over
    Restore(EventSource),
    /// Hand over or clear ownership without notifying
    Silent,
}

impl Orchestrator {
    pub(crate) fn handle_command(&mut self, cmd: TrackingCommand) -> ControlFlow<()> {
        debug!(command = %cmd.as_str(), "tracking_command_received");
        match cmd {
            TrackingCommand::SetEnabled(enabled) => self.set_tracking_enabled(enabled),
            TrackingCommand::PlaceToggled { id, enabled } => self.place_toggled(id, enabled),
            TrackingCommand::PlaceDeleted(id) => self.place_deleted(id),
            TrackingCommand::Resync => self.resync(),
            TrackingCommand::PurgeAll => self.purge_all(),
            TrackingCommand::Shutdown => {
                info!("orchestrator_shutdown_requested");
                return ControlFlow::Break(());
            }
        }
        ControlFlow::Continue(())
    }

    /// Turn tracking on or off globally
    pub fn set_tracking_enabled(&mut self, enabled: bool) {
        if enabled == self.enabled {
            debug!(enabled = %enabled, "tracking_enabled_unchanged");
            return;
        }

        if enabled {
            self.enabled = true;
            self.reset_session();
            self.refresh_places(false);
            info!(places = %self.monitored.len(), "tracking_enabled");
        } else {
            let release = RingerRelease::Restore(EventSource::Manual);
            self.close_all(CheckOutReason::TrackingDisabled, release);
            self.monitored.clear();
            self.reset_session();
            self.enabled = false;
            info!("tracking_disabled");
        }
        self.publish_gauges();
    }

    /// A place's monitoring flag changed
    pub fn place_toggled(&mut self, id: PlaceId, enabled: bool) {
        if let Err(e) = self.places.set_enabled(id, enabled) {
            warn!(place_id = %id, error = %e, "place_enabled_write_failed");
        }
        info!(place_id = %id, enabled = %enabled, "place_toggled");
        if self.enabled {
            self.refresh_places(false);
        }
    }

    /// A place was removed from the repository
    pub fn place_deleted(&mut self, id: PlaceId) {
        if let Some(place) = self.close_place(id, CheckOutReason::PlaceRemoved) {
            self.release_ringer(id, &place, RingerRelease::Restore(EventSource::Manual));
        }
        self.monitored.remove(&id);
        info!(place_id = %id, "place_deleted");
        self.publish_gauges();
    }

    /// Rebuild every grid from the repository and force a fresh anchor
    pub fn resync(&mut self) {
        if !self.enabled {
            debug!("resync_ignored_tracking_disabled");
            return;
        }
        self.refresh_places(true);
        self.anchor = None;
        self.estimate = None;
        self.distance_since_anchor = 0.0;
        self.next_anchor_attempt = None;
        info!(places = %self.monitored.len(), "geofences_resynced");
    }

    /// Critical permission revoked: stop everything without notifying
    pub fn purge_all(&mut self) {
        let inside = self.inside_count();
        self.close_all(CheckOutReason::Purged, RingerRelease::Silent);
        self.monitored.clear();
        self.reset_session();
        self.enabled = false;
        self.publish_gauges();
        warn!(closed_check_ins = %inside, "tracking_purged");
    }

    /// Reconcile the monitored set with the repository's enabled places
    pub(crate) fn refresh_places(&mut self, rebuild_grids: bool) {
        let records = match self.places.places() {
            Ok(records) => records,
            Err(e) => {
                error!(error = %e, "place_load_failed");
                return;
            }
        };

        let active: Vec<Place> = records
            .into_iter()
            .filter(|r| r.enabled && is_monitorable(r))
            .map(|r| r.place)
            .collect();

        let stale: Vec<PlaceId> = self
            .sorted_ids()
            .into_iter()
            .filter(|id| !active.iter().any(|p| p.id == *id))
            .collect();
        for id in stale {
            if let Some(place) = self.close_place(id, CheckOutReason::PlaceRemoved) {
                self.release_ringer(id, &place, RingerRelease::Restore(EventSource::Manual));
            }
            self.monitored.remove(&id);
            debug!(place_id = %id, "place_unmonitored");
        }

        let cell_size = self.config.cell_size_m();
        for place in active {
            match self.monitored.get_mut(&place.id) {
                Some(monitored) => {
                    if rebuild_grids || monitored.place.geometry_differs(&place) {
                        monitored.grid =
                            Grid::generate(place.lat, place.lng, place.radius_meters, cell_size);
                        info!(
                            place_id = %place.id,
                            radius_m = %place.radius_meters,
                            cells = %monitored.grid.cells().len(),
                            "grid_rebuilt"
                        );
                    }
                    monitored.place = place;
                }
                None => {
                    let grid = Grid::generate(place.lat, place.lng, place.radius_meters, cell_size);
                    info!(
                        place_id = %place.id,
                        place = %place.name,
                        radius_m = %place.radius_meters,
                        cells = %grid.cells().len(),
                        "place_monitored"
                    );
                    let tracking = PlaceTracking {
                        distance_since_anchor: self.distance_since_anchor,
                        last_step_count: self.last_step_count,
                        ..PlaceTracking::default()
                    };
                    self.monitored.insert(place.id, MonitoredPlace { place, grid, tracking });
                }
            }
        }

        self.publish_gauges();
    }

    /// OUTSIDE -> INSIDE
    pub(crate) fn enter_place(&mut self, id: PlaceId) {
        let Some(monitored) = self.monitored.get_mut(&id) else { return };
        let check_in = CheckIn::new(&monitored.place, Utc::now());
        monitored.tracking.state = GeofenceState::Inside;
        monitored.tracking.check_in = Some(check_in.clone());
        let place = monitored.place.clone();

        if let Err(e) = self.places.record_check_in(&check_in) {
            error!(place_id = %id, error = %e, "check_in_write_failed");
        }
        self.metrics.record_place_entry();
        info!(
            place_id = %id,
            place = %place.name,
            check_in_id = %check_in.id,
            "place_entered"
        );

        self.emit(NotificationKind::PlaceEntered, &place, EventSource::Geofence);

        if self.silencing_place.is_none() {
            self.silencing_place = Some(id);
            info!(place_id = %id, "ringer_silenced");
        }
    }

    /// INSIDE -> OUTSIDE from a containment test
    pub(crate) fn exit_place(&mut self, id: PlaceId) {
        let Some(place) = self.close_place(id, CheckOutReason::Exited) else { return };
        self.emit(NotificationKind::PlaceExited, &place, EventSource::Geofence);
        self.release_ringer(id, &place, RingerRelease::Restore(EventSource::Geofence));
    }

    /// Close a place's open check-in; returns the place if it was INSIDE.
    /// Ringer ownership is left to the caller.
    pub(crate) fn close_place(&mut self, id: PlaceId, reason: CheckOutReason) -> Option<Place> {
        let monitored = self.monitored.get_mut(&id)?;
        if monitored.tracking.state != GeofenceState::Inside {
            return None;
        }
        monitored.tracking.state = GeofenceState::Outside;
        let check_in = monitored.tracking.check_in.take();
        let place = monitored.place.clone();

        match check_in {
            Some(check_in) => {
                let check_out = CheckOut::close(&check_in, Utc::now(), reason);
                if let Err(e) = self.places.record_check_out(&check_out) {
                    error!(place_id = %id, error = %e, "check_out_write_failed");
                }
                info!(
                    place_id = %id,
                    place = %place.name,
                    duration_secs = %check_out.duration_secs,
                    reason = %reason.as_str(),
                    "place_exited"
                );
            }
            None => warn!(place_id = %id, "place_exited_without_check_in"),
        }
        self.metrics.record_place_exit();
        Some(place)
    }

    fn close_all(&mut self, reason: CheckOutReason, release: RingerRelease) {
        // Restore once, for the silencing place, after everything is closed
        let silencing = self.silencing_place.take();
        for id in self.sorted_ids() {
            self.close_place(id, reason);
        }
        if let (Some(id), RingerRelease::Restore(source)) = (silencing, release) {
            if let Some(place) = self.monitored.get(&id).map(|m| m.place.clone()) {
                info!(place_id = %id, "ringer_restored");
                self.emit(NotificationKind::SoundRestored, &place, source);
            }
        }
    }

    /// Pass ringer ownership on, or restore sound when no place remains
    fn release_ringer(&mut self, id: PlaceId, place: &Place, release: RingerRelease) {
        if self.silencing_place != Some(id) {
            return;
        }

        let successor = self
            .sorted_ids()
            .into_iter()
            .find(|other| *other != id && self.place_state(*other) == Some(GeofenceState::Inside));

        match successor {
            Some(next) => {
                self.silencing_place = Some(next);
                info!(from_place_id = %id, to_place_id = %next, "ringer_ownership_transferred");
            }
            None => {
                self.silencing_place = None;
                info!(place_id = %id, "ringer_restored");
                if let RingerRelease::Restore(source) = release {
                    self.emit(NotificationKind::SoundRestored, place, source);
                }
            }
        }
    }

    fn emit(&mut self, kind: NotificationKind, place: &Place, source: EventSource) {
        let event = NotificationEvent::new(kind, place, epoch_ms(), source);
        self.bus.emit(event);
    }

    /// Drop the anchor, estimate and step baseline
    pub(crate) fn reset_session(&mut self) {
        self.anchor = None;
        self.estimate = None;
        self.distance_since_anchor = 0.0;
        self.last_step_count = None;
        self.last_motion = None;
        self.anchored_at = None;
        self.headings.clear();
        self.next_anchor_attempt = None;
    }
}

/// Reject records whose geometry could not produce a grid
fn is_monitorable(record: &PlaceRecord) -> bool {
    let p = &record.place;
    let ok = p.lat.is_finite()
        && p.lng.is_finite()
        && (-90.0..=90.0).contains(&p.lat)
        && p.radius_meters.is_finite()
        && p.radius_meters > 0.0;
    if !ok {
        warn!(place_id = %p.id, radius_m = %p.radius_meters, "place_geometry_invalid");
    }
    ok
}

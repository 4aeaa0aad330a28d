//! Per-place geofence state machine and tick scheduler
//!
//! The Orchestrator owns the current anchor, the dead-reckoned estimate and
//! every monitored place's grid and OUTSIDE/INSIDE state. Each tick has two
//! phases:
//! - gather (async): anchor fix if due, motion sample, heading read
//! - commit (sync): apply the gathered readings and run transitions
//!
//! Only the gather phase suspends, so a tick cancelled by a lifecycle
//! command is dropped before it has touched any state.

mod control;
mod handlers;

pub use control::{tracking_channel, TrackingCommand, TrackingHandle};

use crate::domain::history::CheckIn;
use crate::domain::types::{
    AnchorPosition, AnchorSource, Containment, Coordinate, GeofenceState, MotionState, Place,
    PlaceId,
};
use crate::infra::config::Config;
use crate::infra::metrics::Metrics;
use crate::io::location::LocationProvider;
use crate::io::place_store::PlaceRepository;
use crate::io::sensors::SensorPlatform;
use crate::services::anchor::AnchorManager;
use crate::services::dead_reckoning::{calculate_new_position, distance_between, smooth_heading};
use crate::services::grid::Grid;
use crate::services::motion::{MotionClassifier, MotionSample};
use crate::services::notification_bus::NotificationBus;
use rustc_hash::FxHashMap;
use smallvec::SmallVec;
use std::ops::ControlFlow;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tokio::sync::mpsc;
use tokio::time::{interval, Duration, Instant, Interval, MissedTickBehavior};
use tracing::{debug, info, warn};

/// Per-place tracking state, created when the place becomes monitored
#[derive(Debug, Clone, Default)]
pub struct PlaceTracking {
    pub state: GeofenceState,
    /// Dead-reckoned travel since the current anchor, as of the last tick
    pub distance_since_anchor: f64,
    /// Open check-in; present exactly while `state` is Inside
    pub check_in: Option<CheckIn>,
    pub last_step_count: Option<u64>,
}

#[derive(Debug, Clone)]
pub(crate) struct MonitoredPlace {
    pub(crate) place: Place,
    pub(crate) grid: Grid,
    pub(crate) tracking: PlaceTracking,
}

/// Result of a single tick
#[derive(Debug, Clone, PartialEq)]
pub enum TickOutcome {
    /// Tracking disabled or no monitored place
    Idle,
    /// Another tick was already in flight
    Skipped,
    Completed(TickReport),
}

#[derive(Debug, Clone, PartialEq, Default)]
pub struct TickReport {
    /// None when sensors could not establish a step baseline
    pub motion: Option<MotionState>,
    /// Dead-reckoned position after the tick; None while anchorless
    pub position: Option<Coordinate>,
    pub anchor_refreshed: bool,
    pub entered: Vec<PlaceId>,
    pub exited: Vec<PlaceId>,
}

enum AnchorAttempt {
    NotDue,
    Acquired(AnchorPosition),
    Failed,
}

/// Readings collected by the async phase of a tick
struct TickPlan {
    anchor: AnchorAttempt,
    /// None when sensors failed before a step baseline existed
    sample: Option<MotionSample>,
    heading: Option<f64>,
}

/// In-progress marker for a tick.
///
/// `&mut self` already serializes ticks on one orchestrator. The guard makes
/// the in-progress state explicit across the suspended gather phase of
/// `run_scheduled_tick`, so a tick dropped mid-gather still clears it and a
/// re-entrant attempt reports `Skipped` instead of interleaving.
struct TickGuard {
    flag: Arc<AtomicBool>,
}

impl TickGuard {
    fn acquire(flag: &Arc<AtomicBool>) -> Option<Self> {
        flag.compare_exchange(false, true, Ordering::Acquire, Ordering::Relaxed)
            .ok()
            .map(|_| Self { flag: flag.clone() })
    }
}

impl Drop for TickGuard {
    fn drop(&mut self) {
        self.flag.store(false, Ordering::Release);
    }
}

pub struct Orchestrator {
    pub(crate) config: Config,
    pub(crate) anchor_manager: AnchorManager,
    pub(crate) motion: MotionClassifier,
    pub(crate) places: Arc<dyn PlaceRepository>,
    pub(crate) bus: NotificationBus,
    pub(crate) metrics: Arc<Metrics>,
    pub(crate) enabled: bool,
    pub(crate) monitored: FxHashMap<PlaceId, MonitoredPlace>,
    /// Current anchor; all projections chain from it until superseded
    pub(crate) anchor: Option<AnchorPosition>,
    pub(crate) estimate: Option<Coordinate>,
    pub(crate) distance_since_anchor: f64,
    pub(crate) last_step_count: Option<u64>,
    /// Motion state classified on the previous tick
    pub(crate) last_motion: Option<MotionState>,
    /// When the current anchor was installed
    pub(crate) anchored_at: Option<Instant>,
    pub(crate) headings: SmallVec<[f64; 8]>,
    /// Place that silenced the ringer, if any
    pub(crate) silencing_place: Option<PlaceId>,
    /// Earliest time the next anchor attempt may run after a failure
    pub(crate) next_anchor_attempt: Option<Instant>,
    tick_in_progress: Arc<AtomicBool>,
}

impl Orchestrator {
    /// Create a disabled orchestrator; enable it with `set_tracking_enabled`
    pub fn new(
        config: Config,
        location: Arc<dyn LocationProvider>,
        sensors: Arc<dyn SensorPlatform>,
        places: Arc<dyn PlaceRepository>,
        bus: NotificationBus,
        metrics: Arc<Metrics>,
    ) -> Self {
        let anchor_manager = AnchorManager::new(&config, location);
        let motion = MotionClassifier::with_metrics(&config, sensors, metrics.clone());
        Self {
            config,
            anchor_manager,
            motion,
            places,
            bus,
            metrics,
            enabled: false,
            monitored: FxHashMap::default(),
            anchor: None,
            estimate: None,
            distance_since_anchor: 0.0,
            last_step_count: None,
            last_motion: None,
            anchored_at: None,
            headings: SmallVec::new(),
            silencing_place: None,
            next_anchor_attempt: None,
            tick_in_progress: Arc::new(AtomicBool::new(false)),
        }
    }

    /// Run ticks and lifecycle commands until shutdown or the channel closes
    pub async fn run(&mut self, mut cmd_rx: mpsc::Receiver<TrackingCommand>) {
        info!(
            tick_interval_secs = %self.config.tick_interval().as_secs(),
            enabled = %self.enabled,
            "orchestrator_started"
        );

        let mut ticker = None;
        self.sync_ticker(&mut ticker);

        loop {
            tokio::select! {
                cmd = cmd_rx.recv() => {
                    let Some(cmd) = cmd else { break };
                    if self.handle_command(cmd).is_break() {
                        break;
                    }
                    self.sync_ticker(&mut ticker);
                }
                _ = next_tick(&mut ticker) => {
                    if self.run_scheduled_tick(&mut cmd_rx, &mut ticker).await.is_break() {
                        break;
                    }
                }
            }
        }

        info!("orchestrator_stopped");
    }

    /// Run one tick to completion
    pub async fn tick(&mut self) -> TickOutcome {
        let _guard = match self.begin_tick() {
            Ok(guard) => guard,
            Err(outcome) => return outcome,
        };
        let started = std::time::Instant::now();
        let plan = self.gather().await;
        self.finish_tick(plan, started.elapsed())
    }

    /// Tick from the run loop; a command arriving mid-gather cancels the tick
    async fn run_scheduled_tick(
        &mut self,
        cmd_rx: &mut mpsc::Receiver<TrackingCommand>,
        ticker: &mut Option<Interval>,
    ) -> ControlFlow<()> {
        let _guard = match self.begin_tick() {
            Ok(guard) => guard,
            Err(_) => return ControlFlow::Continue(()),
        };
        let started = std::time::Instant::now();

        let gathered = {
            let gather = self.gather();
            tokio::select! {
                biased;
                cmd = cmd_rx.recv() => Err(cmd),
                plan = gather => Ok(plan),
            }
        };

        match gathered {
            Ok(plan) => {
                self.finish_tick(plan, started.elapsed());
                ControlFlow::Continue(())
            }
            Err(Some(cmd)) => {
                self.metrics.record_tick_cancelled();
                info!(elapsed_ms = %started.elapsed().as_millis(), "tick_cancelled");
                let flow = self.handle_command(cmd);
                self.sync_ticker(ticker);
                flow
            }
            Err(None) => ControlFlow::Break(()),
        }
    }

    fn begin_tick(&self) -> Result<TickGuard, TickOutcome> {
        if !self.enabled || self.monitored.is_empty() {
            self.metrics.record_tick_idle();
            debug!(enabled = %self.enabled, places = %self.monitored.len(), "tick_idle");
            return Err(TickOutcome::Idle);
        }
        match TickGuard::acquire(&self.tick_in_progress) {
            Some(guard) => Ok(guard),
            None => {
                self.metrics.record_tick_skipped();
                debug!("tick_skipped_in_progress");
                Err(TickOutcome::Skipped)
            }
        }
    }

    /// Async phase: read-only, safe to drop at any await
    async fn gather(&self) -> TickPlan {
        let anchor = if self.anchor_due() {
            let places = self.sorted_places();
            match self.anchor_manager.get_initial_anchor(&places).await {
                Some(anchor) => AnchorAttempt::Acquired(anchor),
                None => AnchorAttempt::Failed,
            }
        } else {
            AnchorAttempt::NotDue
        };

        let sample = match self.last_step_count {
            Some(last) => Some(self.motion.detect_current_motion(last).await),
            // A fallback sample would fake a zero baseline
            None => match self.motion.read_motion(0).await {
                Ok(sample) => Some(sample),
                Err(e) => {
                    warn!(error = %e, "step_baseline_unavailable");
                    self.metrics.record_sensor_fallback();
                    None
                }
            },
        };

        let heading = match sample {
            Some(s) if self.last_step_count.is_some() && s.step_delta > 0 => {
                match self.motion.read_heading().await {
                    Ok(h) if h.is_finite() => Some(h),
                    Ok(h) => {
                        warn!(heading = %h, "heading_not_finite");
                        None
                    }
                    Err(e) => {
                        warn!(error = %e, "heading_read_failed");
                        None
                    }
                }
            }
            _ => None,
        };

        TickPlan { anchor, sample, heading }
    }

    /// Sync phase: apply readings, then run containment transitions.
    ///
    /// Only this phase feeds the latency histogram; the gather phase waits on
    /// platform fixes for up to the fix timeout and is logged separately.
    fn finish_tick(&mut self, plan: TickPlan, gather_elapsed: Duration) -> TickOutcome {
        let started = std::time::Instant::now();
        let mut report = TickReport::default();

        match plan.anchor {
            AnchorAttempt::NotDue => {}
            AnchorAttempt::Acquired(anchor) => {
                self.install_anchor(anchor);
                report.anchor_refreshed = true;
            }
            AnchorAttempt::Failed => {
                self.metrics.record_anchor_failure();
                let retry_at = Instant::now() + self.config.anchor_retry();
                self.next_anchor_attempt = Some(retry_at);
                warn!(
                    anchorless = %self.anchor.is_none(),
                    retry_secs = %self.config.anchor_retry().as_secs(),
                    "anchor_attempt_failed"
                );
            }
        }

        if let Some(sample) = plan.sample {
            report.motion = Some(sample.state);
            self.last_motion = Some(sample.state);
            self.apply_motion(sample, plan.heading, report.anchor_refreshed);
        }

        report.position = self.estimate;
        if let Some(position) = self.estimate {
            self.evaluate_places(position, report.anchor_refreshed, &mut report);
        } else {
            debug!(places = %self.monitored.len(), "containment_indeterminate_anchorless");
        }

        for monitored in self.monitored.values_mut() {
            monitored.tracking.distance_since_anchor = self.distance_since_anchor;
            monitored.tracking.last_step_count = self.last_step_count;
        }
        self.publish_gauges();

        let latency_us = started.elapsed().as_micros() as u64;
        self.metrics.record_tick(latency_us);
        let motion = report.motion.map_or("unknown", |m| m.as_str());
        debug!(
            motion = %motion,
            distance_since_anchor_m = format!("{:.1}", self.distance_since_anchor),
            entered = %report.entered.len(),
            exited = %report.exited.len(),
            gather_ms = %gather_elapsed.as_millis(),
            latency_us = %latency_us,
            "tick_completed"
        );

        TickOutcome::Completed(report)
    }

    fn install_anchor(&mut self, anchor: AnchorPosition) {
        let snapped = anchor.source == AnchorSource::Home;
        self.metrics.record_anchor_acquired(snapped);
        info!(
            lat = %anchor.lat,
            lng = %anchor.lng,
            accuracy_m = %anchor.accuracy_meters,
            source = %anchor.source.as_str(),
            previous_distance_m = format!("{:.1}", self.distance_since_anchor),
            "anchor_acquired"
        );
        self.estimate = Some(anchor.coordinate());
        self.anchored_at = Some(Instant::now());
        self.distance_since_anchor = 0.0;
        self.next_anchor_attempt = None;
        self.anchor = Some(anchor);
    }

    fn apply_motion(&mut self, sample: MotionSample, heading: Option<f64>, fresh_anchor: bool) {
        if self.last_step_count.is_none() {
            self.last_step_count = Some(sample.current_steps);
            debug!(steps = %sample.current_steps, "step_baseline_set");
            return;
        }
        self.last_step_count = Some(sample.current_steps);

        if let Some(h) = heading {
            if self.headings.len() >= self.config.heading_window() {
                self.headings.remove(0);
            }
            self.headings.push(h);
        }

        let stride = self.motion.stride_length(sample.state);
        if sample.step_delta == 0 || stride <= 0.0 {
            return;
        }
        // A fix taken this tick already reflects this tick's steps
        if fresh_anchor {
            return;
        }
        let Some(from) = self.estimate else { return };
        let Some(bearing) = smooth_heading(&self.headings) else {
            debug!(step_delta = %sample.step_delta, "dead_reckoning_skipped_no_heading");
            return;
        };

        let to = calculate_new_position(from, sample.step_delta, bearing, stride);
        self.distance_since_anchor += sample.step_delta as f64 * stride;
        self.estimate = Some(to);
        debug!(
            step_delta = %sample.step_delta,
            heading = format!("{:.1}", bearing),
            lat = %to.lat,
            lng = %to.lng,
            "position_projected"
        );
    }

    /// Grid containment per place. On a fresh-anchor tick the position is an
    /// absolute fix, so a grid miss is settled by distance to the center.
    fn evaluate_places(
        &mut self,
        position: Coordinate,
        fresh_anchor: bool,
        report: &mut TickReport,
    ) {
        for id in self.sorted_ids() {
            let Some(monitored) = self.monitored.get(&id) else { continue };
            let containment = match monitored.grid.containment(position) {
                Containment::Indeterminate if fresh_anchor => {
                    let distance = distance_between(position, monitored.place.center());
                    debug!(
                        place_id = %id,
                        distance_m = format!("{:.1}", distance),
                        "containment_resolved_by_fix"
                    );
                    if distance <= monitored.place.radius_meters {
                        Containment::Inside
                    } else {
                        Containment::Outside
                    }
                }
                containment => containment,
            };
            match (monitored.tracking.state, containment) {
                (GeofenceState::Outside, Containment::Inside) => {
                    self.enter_place(id);
                    report.entered.push(id);
                }
                (GeofenceState::Inside, Containment::Outside) => {
                    self.exit_place(id);
                    report.exited.push(id);
                }
                (_, Containment::Indeterminate) => {
                    debug!(place_id = %id, "containment_indeterminate");
                }
                _ => {}
            }
        }
    }

    fn anchor_due(&self) -> bool {
        let needed = self.anchor.is_none()
            || self.anchor_manager.should_re_anchor(self.distance_since_anchor)
            || self.vehicle_anchor_stale();
        let backoff_elapsed = match self.next_anchor_attempt {
            Some(at) => Instant::now() >= at,
            None => true,
        };
        needed && backoff_elapsed
    }

    /// Vehicle travel is never dead-reckoned, so it is bounded by anchor age
    fn vehicle_anchor_stale(&self) -> bool {
        let in_vehicle =
            matches!(self.last_motion, Some(MotionState::VehicleCar | MotionState::VehicleBike));
        match self.anchored_at {
            Some(at) if in_vehicle => at.elapsed() >= self.config.vehicle_reanchor(),
            _ => false,
        }
    }

    fn sync_ticker(&self, ticker: &mut Option<Interval>) {
        match (self.enabled, ticker.is_some()) {
            (true, false) => {
                let mut t = interval(self.config.tick_interval());
                t.set_missed_tick_behavior(MissedTickBehavior::Delay);
                *ticker = Some(t);
                debug!("ticker_started");
            }
            (false, true) => {
                *ticker = None;
                debug!("ticker_stopped");
            }
            _ => {}
        }
    }

    pub(crate) fn publish_gauges(&self) {
        self.metrics.set_place_gauges(self.monitored.len(), self.inside_count());
    }

    pub(crate) fn sorted_ids(&self) -> Vec<PlaceId> {
        let mut ids: Vec<PlaceId> = self.monitored.keys().copied().collect();
        ids.sort_unstable();
        ids
    }

    fn sorted_places(&self) -> Vec<Place> {
        self.sorted_ids()
            .into_iter()
            .filter_map(|id| self.monitored.get(&id).map(|m| m.place.clone()))
            .collect()
    }

    pub fn is_enabled(&self) -> bool {
        self.enabled
    }

    pub fn anchor(&self) -> Option<&AnchorPosition> {
        self.anchor.as_ref()
    }

    pub fn estimated_position(&self) -> Option<Coordinate> {
        self.estimate
    }

    pub fn distance_since_anchor(&self) -> f64 {
        self.distance_since_anchor
    }

    pub fn last_step_count(&self) -> Option<u64> {
        self.last_step_count
    }

    pub fn silencing_place(&self) -> Option<PlaceId> {
        self.silencing_place
    }

    pub fn place_state(&self, id: PlaceId) -> Option<GeofenceState> {
        self.monitored.get(&id).map(|m| m.tracking.state)
    }

    pub fn tracking(&self, id: PlaceId) -> Option<&PlaceTracking> {
        self.monitored.get(&id).map(|m| &m.tracking)
    }

    pub fn grid(&self, id: PlaceId) -> Option<&Grid> {
        self.monitored.get(&id).map(|m| &m.grid)
    }

    pub fn monitored_count(&self) -> usize {
        self.monitored.len()
    }

    pub fn inside_count(&self) -> usize {
        self.monitored.values().filter(|m| m.tracking.state == GeofenceState::Inside).count()
    }
}

async fn next_tick(ticker: &mut Option<Interval>) {
    match ticker {
        Some(t) => {
            t.tick().await;
        }
        None => std::future::pending().await,
    }
}

//! Notification de-duplication and dispatch
//!
//! Events are keyed by kind + place. A repeat of the same key within the dedup
//! window is dropped. Accepted events are rendered and handed to the dispatch
//! worker without waiting, so a slow or broken display never holds up the
//! geofence transition that produced the event.

use crate::domain::types::{NotificationEvent, NotificationKind, PlaceId};
use crate::infra::metrics::Metrics;
use crate::io::notifier::Notification;
use rustc_hash::FxHashMap;
use std::sync::Arc;
use tokio::sync::mpsc;
use tokio::sync::mpsc::error::TrySendError;
use tracing::{debug, info, warn};

/// Outcome of a single emit
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EmitOutcome {
    Dispatched,
    Deduplicated,
    /// Accepted but the dispatch channel was full or closed
    Dropped,
}

pub struct NotificationBus {
    dedup_window_ms: u64,
    /// Last accepted emission time (epoch ms) per kind + place
    last_emitted: FxHashMap<(NotificationKind, PlaceId), u64>,
    dispatch_tx: mpsc::Sender<Notification>,
    metrics: Option<Arc<Metrics>>,
}

impl NotificationBus {
    pub fn new(dedup_window_ms: u64, dispatch_tx: mpsc::Sender<Notification>) -> Self {
        Self { dedup_window_ms, last_emitted: FxHashMap::default(), dispatch_tx, metrics: None }
    }

    /// Create a bus that records dispatch/dedup counts
    pub fn with_metrics(
        dedup_window_ms: u64,
        dispatch_tx: mpsc::Sender<Notification>,
        metrics: Arc<Metrics>,
    ) -> Self {
        Self {
            dedup_window_ms,
            last_emitted: FxHashMap::default(),
            dispatch_tx,
            metrics: Some(metrics),
        }
    }

    /// Emit an event, using its timestamp as the dedup clock
    pub fn emit(&mut self, event: NotificationEvent) -> EmitOutcome {
        let now = event.timestamp;
        self.purge_stale(now);

        let key = (event.kind, event.place_id);
        if let Some(&last) = self.last_emitted.get(&key) {
            if now.saturating_sub(last) < self.dedup_window_ms {
                debug!(
                    kind = %event.kind.as_str(),
                    place_id = %event.place_id,
                    since_last_ms = %now.saturating_sub(last),
                    "notification_deduplicated"
                );
                if let Some(ref metrics) = self.metrics {
                    metrics.record_notification_deduplicated();
                }
                return EmitOutcome::Deduplicated;
            }
        }
        self.last_emitted.insert(key, now);

        let notification = render(&event);
        match self.dispatch_tx.try_send(notification) {
            Ok(()) => {
                info!(
                    kind = %event.kind.as_str(),
                    place_id = %event.place_id,
                    place = %event.place_name,
                    source = %event.source.as_str(),
                    "notification_emitted"
                );
                if let Some(ref metrics) = self.metrics {
                    metrics.record_notification_dispatched();
                }
                EmitOutcome::Dispatched
            }
            Err(e) => {
                let reason = match e {
                    TrySendError::Full(_) => "channel_full",
                    TrySendError::Closed(_) => "channel_closed",
                };
                warn!(
                    kind = %event.kind.as_str(),
                    place_id = %event.place_id,
                    reason = %reason,
                    "notification_dropped"
                );
                if let Some(ref metrics) = self.metrics {
                    metrics.record_notification_dropped();
                }
                EmitOutcome::Dropped
            }
        }
    }

    /// Reset all dedup state
    pub fn clear(&mut self) {
        self.last_emitted.clear();
    }

    /// Number of dedup keys currently remembered
    pub fn tracked_keys(&self) -> usize {
        self.last_emitted.len()
    }

    /// Forget keys older than twice the dedup window
    fn purge_stale(&mut self, now: u64) {
        let horizon = self.dedup_window_ms.saturating_mul(2);
        self.last_emitted.retain(|_, &mut ts| now.saturating_sub(ts) <= horizon);
    }
}

/// Map an event onto display content
pub fn render(event: &NotificationEvent) -> Notification {
    let name = &event.place_name;
    let (title, body, silent, grouped) = match event.kind {
        NotificationKind::ScheduleStart => (
            format!("{name}: quiet hours started"),
            "Your phone has been silenced for this schedule.".to_string(),
            true,
            false,
        ),
        NotificationKind::ScheduleEnd => (
            format!("{name}: quiet hours ended"),
            "Your ringer is back to normal.".to_string(),
            false,
            false,
        ),
        NotificationKind::ScheduleApproaching => (
            format!("{name}: quiet hours soon"),
            "Your phone will be silenced shortly.".to_string(),
            false,
            false,
        ),
        NotificationKind::PlaceEntered => (
            format!("Arrived at {name}"),
            "Your phone has been silenced.".to_string(),
            true,
            true,
        ),
        NotificationKind::PlaceExited => (
            format!("Left {name}"),
            "You are no longer inside this place.".to_string(),
            true,
            true,
        ),
        NotificationKind::SoundRestored => (
            "Sound restored".to_string(),
            format!("Ringer restored after leaving {name}."),
            false,
            false,
        ),
    };

    Notification {
        id: format!("{}-{}", event.kind.as_str(), event.place_id),
        kind: event.kind,
        place_id: event.place_id,
        title,
        body,
        silent,
        grouped,
        ts: event.timestamp,
    }
}

//! Anchor acquisition, place-snapping and re-anchor policy
//!
//! A low-power fix is requested with a hard timeout. When the fix lands within
//! the snap threshold of a saved place, the anchor is replaced by the place's
//! exact coordinates, which removes consumer-GPS noise while the device is
//! plausibly inside that place.

use crate::domain::types::{AnchorPosition, AnchorSource, Place};
use crate::infra::config::Config;
use crate::io::location::{
    AccuracyPreference, LocationProvider, PositionRequest, PositionUnavailable,
};
use crate::services::dead_reckoning::haversine_distance;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, info, warn};

pub struct AnchorManager {
    provider: Arc<dyn LocationProvider>,
    fix_timeout: Duration,
    max_fix_age: Duration,
    snap_threshold_m: f64,
    snapped_accuracy_m: f64,
    reanchor_distance_m: f64,
}

impl AnchorManager {
    pub fn new(config: &Config, provider: Arc<dyn LocationProvider>) -> Self {
        Self {
            provider,
            fix_timeout: config.fix_timeout(),
            max_fix_age: config.max_fix_age(),
            snap_threshold_m: config.snap_threshold_m(),
            snapped_accuracy_m: config.snapped_accuracy_m(),
            reanchor_distance_m: config.reanchor_distance_m(),
        }
    }

    /// Request a single low-power fix.
    ///
    /// The timeout is enforced here as well as passed to the provider, so a
    /// provider that ignores it still cannot stall the caller.
    pub async fn request_network_anchor(&self) -> Result<AnchorPosition, PositionUnavailable> {
        let request = PositionRequest {
            accuracy: AccuracyPreference::LowPower,
            timeout: self.fix_timeout,
            max_age: self.max_fix_age,
        };

        let pending = self.provider.current_position(request);
        let fix = match tokio::time::timeout(self.fix_timeout, pending).await {
            Ok(result) => result?,
            Err(_) => return Err(PositionUnavailable::Timeout(self.fix_timeout)),
        };

        if !fix.lat.is_finite() || !fix.lng.is_finite() {
            return Err(PositionUnavailable::Provider("non-finite coordinate".to_string()));
        }

        debug!(
            lat = %fix.lat,
            lng = %fix.lng,
            accuracy_m = %fix.accuracy_meters,
            "network_fix_received"
        );

        Ok(AnchorPosition {
            lat: fix.lat,
            lng: fix.lng,
            timestamp: fix.timestamp,
            accuracy_meters: fix.accuracy_meters,
            source: AnchorSource::Network,
        })
    }

    /// Acquire an anchor, snapping onto the nearest place when close enough.
    ///
    /// Fix failure yields None; no GPS escalation is attempted.
    pub async fn get_initial_anchor(&self, places: &[Place]) -> Option<AnchorPosition> {
        let fix = match self.request_network_anchor().await {
            Ok(fix) => fix,
            Err(e) => {
                warn!(error = %e, "anchor_unavailable");
                return None;
            }
        };

        Some(self.snap_to_place(fix, places))
    }

    /// Replace a fix with the nearest place's exact center if within the snap threshold
    pub fn snap_to_place(&self, fix: AnchorPosition, places: &[Place]) -> AnchorPosition {
        let nearest = places
            .iter()
            .map(|p| (p, haversine_distance(fix.lat, fix.lng, p.lat, p.lng)))
            .min_by(|a, b| a.1.total_cmp(&b.1));

        match nearest {
            Some((place, distance)) if distance <= self.snap_threshold_m => {
                info!(
                    place_id = %place.id,
                    place = %place.name,
                    distance_m = format!("{:.1}", distance),
                    fix_accuracy_m = %fix.accuracy_meters,
                    "anchor_snapped_to_place"
                );
                AnchorPosition {
                    lat: place.lat,
                    lng: place.lng,
                    timestamp: fix.timestamp,
                    accuracy_meters: self.snapped_accuracy_m,
                    source: AnchorSource::Home,
                }
            }
            _ => fix,
        }
    }

    /// True once dead-reckoned travel since the last anchor reaches the drift bound
    pub fn should_re_anchor(&self, cumulative_distance_m: f64) -> bool {
        cumulative_distance_m >= self.reanchor_distance_m
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::types::{epoch_ms, PlaceId};
    use crate::io::location::PositionFix;
    use async_trait::async_trait;
    use parking_lot::Mutex;

    struct FixedLocation {
        result: Result<PositionFix, PositionUnavailable>,
        requests: Mutex<Vec<PositionRequest>>,
    }

    impl FixedLocation {
        fn at(lat: f64, lng: f64) -> Self {
            Self {
                result: Ok(PositionFix { lat, lng, accuracy_meters: 35.0, timestamp: epoch_ms() }),
                requests: Mutex::new(Vec::new()),
            }
        }

        fn failing(error: PositionUnavailable) -> Self {
            Self { result: Err(error), requests: Mutex::new(Vec::new()) }
        }
    }

    #[async_trait]
    impl LocationProvider for FixedLocation {
        async fn current_position(
            &self,
            request: PositionRequest,
        ) -> Result<PositionFix, PositionUnavailable> {
            self.requests.lock().push(request);
            self.result.clone()
        }
    }

    struct StalledLocation;

    #[async_trait]
    impl LocationProvider for StalledLocation {
        async fn current_position(
            &self,
            _request: PositionRequest,
        ) -> Result<PositionFix, PositionUnavailable> {
            std::future::pending().await
        }
    }

    fn place(id: i64, lat: f64, lng: f64) -> Place {
        Place { id: PlaceId(id), name: format!("P{id}"), lat, lng, radius_meters: 50.0 }
    }

    fn manager(provider: Arc<dyn LocationProvider>) -> AnchorManager {
        AnchorManager::new(&Config::default(), provider)
    }

    #[test]
    fn test_should_re_anchor_threshold() {
        let m = manager(Arc::new(FixedLocation::at(0.0, 0.0)));
        assert!(!m.should_re_anchor(0.0));
        assert!(!m.should_re_anchor(299.0));
        assert!(!m.should_re_anchor(299.999));
        assert!(m.should_re_anchor(300.0));
        assert!(m.should_re_anchor(1_000.0));
    }

    #[tokio::test]
    async fn test_request_uses_low_power_parameters() {
        let provider = Arc::new(FixedLocation::at(1.0, 2.0));
        let m = manager(provider.clone());

        let anchor = m.request_network_anchor().await.unwrap();
        assert_eq!(anchor.source, AnchorSource::Network);
        assert_eq!(anchor.lat, 1.0);

        let requests = provider.requests.lock();
        assert_eq!(requests.len(), 1);
        assert_eq!(requests[0].accuracy, AccuracyPreference::LowPower);
        assert_eq!(requests[0].timeout, Duration::from_secs(15));
        assert_eq!(requests[0].max_age, Duration::from_secs(10));
    }

    #[tokio::test]
    async fn test_request_failure_is_explicit() {
        let m = manager(Arc::new(FixedLocation::failing(PositionUnavailable::ServicesDisabled)));
        assert_eq!(m.request_network_anchor().await, Err(PositionUnavailable::ServicesDisabled));
    }

    #[tokio::test(start_paused = true)]
    async fn test_request_times_out() {
        let m = manager(Arc::new(StalledLocation));
        let result = m.request_network_anchor().await;
        assert_eq!(result, Err(PositionUnavailable::Timeout(Duration::from_secs(15))));
    }

    #[tokio::test]
    async fn test_initial_anchor_none_on_failure() {
        let m = manager(Arc::new(FixedLocation::failing(PositionUnavailable::PermissionDenied)));
        assert!(m.get_initial_anchor(&[place(1, 0.0, 0.0)]).await.is_none());
    }

    #[tokio::test]
    async fn test_initial_anchor_snaps_within_threshold() {
        // ~44 m north of home
        let m = manager(Arc::new(FixedLocation::at(51.5004, -0.12)));
        let places = [place(1, 51.5, -0.12), place(2, 51.6, -0.12)];

        let anchor = m.get_initial_anchor(&places).await.unwrap();
        assert_eq!(anchor.source, AnchorSource::Home);
        assert_eq!(anchor.lat, 51.5);
        assert_eq!(anchor.lng, -0.12);
        assert_eq!(anchor.accuracy_meters, 5.0);
    }

    #[tokio::test]
    async fn test_initial_anchor_picks_nearest_place() {
        // Between two places, closer to the second
        let m = manager(Arc::new(FixedLocation::at(0.0, 0.0006)));
        let places = [place(1, 0.0, 0.0), place(2, 0.0, 0.0009)];

        let anchor = m.get_initial_anchor(&places).await.unwrap();
        assert_eq!(anchor.source, AnchorSource::Home);
        assert_eq!(anchor.lng, 0.0009);
    }

    #[tokio::test]
    async fn test_initial_anchor_raw_beyond_threshold() {
        // ~222 m away
        let m = manager(Arc::new(FixedLocation::at(0.002, 0.0)));
        let anchor = m.get_initial_anchor(&[place(1, 0.0, 0.0)]).await.unwrap();
        assert_eq!(anchor.source, AnchorSource::Network);
        assert_eq!(anchor.lat, 0.002);
        assert_eq!(anchor.accuracy_meters, 35.0);
    }

    #[tokio::test]
    async fn test_initial_anchor_without_places() {
        let m = manager(Arc::new(FixedLocation::at(3.0, 4.0)));
        let anchor = m.get_initial_anchor(&[]).await.unwrap();
        assert_eq!(anchor.source, AnchorSource::Network);
    }
}

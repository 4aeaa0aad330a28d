//! Configuration loading from TOML files
//!
//! The binary picks the file with `--config <path>` (default: config/dev.toml).

use crate::domain::types::{Coordinate, Place, PlaceId, PlaceRecord};
use anyhow::Context;
use serde::Deserialize;
use std::fs;
use std::path::Path;
use std::time::Duration;
use tracing::warn;

#[derive(Debug, Clone, Deserialize)]
pub struct TrackingConfig {
    #[serde(default = "default_tick_interval_secs")]
    pub tick_interval_secs: u64,
    /// Back-off between anchor attempts when no fix could be obtained
    #[serde(default = "default_anchor_retry_secs")]
    pub anchor_retry_secs: u64,
    #[serde(default = "default_sensor_timeout_ms")]
    pub sensor_timeout_ms: u64,
    /// Number of recent heading samples smoothed per projection
    #[serde(default = "default_heading_window")]
    pub heading_window: usize,
    #[serde(default = "default_enabled_on_start")]
    pub enabled_on_start: bool,
    /// Anchor age that forces a fresh fix while riding in a vehicle
    #[serde(default = "default_vehicle_reanchor_secs")]
    pub vehicle_reanchor_secs: u64,
}

impl Default for TrackingConfig {
    fn default() -> Self {
        Self {
            tick_interval_secs: default_tick_interval_secs(),
            anchor_retry_secs: default_anchor_retry_secs(),
            sensor_timeout_ms: default_sensor_timeout_ms(),
            heading_window: default_heading_window(),
            enabled_on_start: default_enabled_on_start(),
            vehicle_reanchor_secs: default_vehicle_reanchor_secs(),
        }
    }
}

fn default_tick_interval_secs() -> u64 {
    30
}

fn default_anchor_retry_secs() -> u64 {
    60
}

fn default_sensor_timeout_ms() -> u64 {
    2000
}

fn default_heading_window() -> usize {
    5
}

fn default_enabled_on_start() -> bool {
    true
}

fn default_vehicle_reanchor_secs() -> u64 {
    120
}

#[derive(Debug, Clone, Deserialize)]
pub struct AnchorConfig {
    #[serde(default = "default_fix_timeout_ms")]
    pub fix_timeout_ms: u64,
    /// Oldest cached fix the location provider may hand back
    #[serde(default = "default_max_fix_age_ms")]
    pub max_fix_age_ms: u64,
    #[serde(default = "default_snap_threshold_m")]
    pub snap_threshold_m: f64,
    #[serde(default = "default_snapped_accuracy_m")]
    pub snapped_accuracy_m: f64,
    #[serde(default = "default_reanchor_distance_m")]
    pub reanchor_distance_m: f64,
}

impl Default for AnchorConfig {
    fn default() -> Self {
        Self {
            fix_timeout_ms: default_fix_timeout_ms(),
            max_fix_age_ms: default_max_fix_age_ms(),
            snap_threshold_m: default_snap_threshold_m(),
            snapped_accuracy_m: default_snapped_accuracy_m(),
            reanchor_distance_m: default_reanchor_distance_m(),
        }
    }
}

fn default_fix_timeout_ms() -> u64 {
    15_000
}

fn default_max_fix_age_ms() -> u64 {
    10_000
}

fn default_snap_threshold_m() -> f64 {
    100.0
}

fn default_snapped_accuracy_m() -> f64 {
    5.0
}

fn default_reanchor_distance_m() -> f64 {
    300.0
}

#[derive(Debug, Clone, Deserialize)]
pub struct MotionConfig {
    #[serde(default = "default_gravity")]
    pub gravity: f64,
    /// Max |accel - gravity| still considered stationary
    #[serde(default = "default_stationary_threshold")]
    pub stationary_threshold: f64,
    /// Max |accel - gravity| still considered a car; above is a bike
    #[serde(default = "default_car_threshold")]
    pub car_threshold: f64,
    #[serde(default = "default_walking_stride_m")]
    pub walking_stride_m: f64,
}

impl Default for MotionConfig {
    fn default() -> Self {
        Self {
            gravity: default_gravity(),
            stationary_threshold: default_stationary_threshold(),
            car_threshold: default_car_threshold(),
            walking_stride_m: default_walking_stride_m(),
        }
    }
}

fn default_gravity() -> f64 {
    9.8
}

fn default_stationary_threshold() -> f64 {
    0.5
}

fn default_car_threshold() -> f64 {
    2.0
}

fn default_walking_stride_m() -> f64 {
    0.76
}

#[derive(Debug, Clone, Deserialize)]
pub struct GridConfig {
    #[serde(default = "default_cell_size_m")]
    pub cell_size_m: f64,
}

impl Default for GridConfig {
    fn default() -> Self {
        Self { cell_size_m: default_cell_size_m() }
    }
}

fn default_cell_size_m() -> f64 {
    10.0
}

#[derive(Debug, Clone, Deserialize)]
pub struct NotificationsConfig {
    #[serde(default = "default_dedup_window_ms")]
    pub dedup_window_ms: u64,
    #[serde(default = "default_channel_capacity")]
    pub channel_capacity: usize,
    /// JSONL file for displayed notifications (log-only display when unset)
    #[serde(default)]
    pub file: Option<String>,
}

impl Default for NotificationsConfig {
    fn default() -> Self {
        Self {
            dedup_window_ms: default_dedup_window_ms(),
            channel_capacity: default_channel_capacity(),
            file: None,
        }
    }
}

fn default_dedup_window_ms() -> u64 {
    30_000
}

fn default_channel_capacity() -> usize {
    64
}

#[derive(Debug, Clone, Deserialize)]
pub struct HistoryConfig {
    /// File path for check-in history (JSONL format)
    #[serde(default = "default_history_file")]
    pub file: String,
}

impl Default for HistoryConfig {
    fn default() -> Self {
        Self { file: default_history_file() }
    }
}

fn default_history_file() -> String {
    "checkins.jsonl".to_string()
}

#[derive(Debug, Clone, Deserialize)]
pub struct PlaceConfig {
    pub id: i64,
    pub name: String,
    pub lat: f64,
    pub lng: f64,
    pub radius_m: f64,
    #[serde(default = "default_place_enabled")]
    pub enabled: bool,
}

fn default_place_enabled() -> bool {
    true
}

impl PlaceConfig {
    fn into_record(self) -> PlaceRecord {
        PlaceRecord {
            place: Place {
                id: PlaceId(self.id),
                name: self.name,
                lat: self.lat,
                lng: self.lng,
                radius_meters: self.radius_m,
            },
            enabled: self.enabled,
        }
    }
}

/// Parameters for the simulated walker driving the demo binary
#[derive(Debug, Clone, Deserialize)]
pub struct SimulationConfig {
    pub start_lat: f64,
    pub start_lng: f64,
    #[serde(default)]
    pub heading_deg: f64,
    /// Steps added to the pedometer on every read
    #[serde(default)]
    pub steps_per_read: u64,
    #[serde(default = "default_gravity")]
    pub accel_magnitude: f64,
    /// Northward error applied to every simulated fix
    #[serde(default)]
    pub fix_offset_m: f64,
}

impl Default for SimulationConfig {
    fn default() -> Self {
        Self {
            start_lat: 0.0,
            start_lng: 0.0,
            heading_deg: 0.0,
            steps_per_read: 0,
            accel_magnitude: default_gravity(),
            fix_offset_m: 0.0,
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct MetricsConfig {
    #[serde(default = "default_metrics_interval_secs")]
    pub interval_secs: u64,
}

impl Default for MetricsConfig {
    fn default() -> Self {
        Self { interval_secs: default_metrics_interval_secs() }
    }
}

fn default_metrics_interval_secs() -> u64 {
    60
}

#[derive(Debug, Clone, Deserialize, Default)]
pub struct TomlConfig {
    #[serde(default)]
    pub tracking: TrackingConfig,
    #[serde(default)]
    pub anchor: AnchorConfig,
    #[serde(default)]
    pub motion: MotionConfig,
    #[serde(default)]
    pub grid: GridConfig,
    #[serde(default)]
    pub notifications: NotificationsConfig,
    #[serde(default)]
    pub history: HistoryConfig,
    #[serde(default)]
    pub places: Vec<PlaceConfig>,
    #[serde(default)]
    pub simulation: SimulationConfig,
    #[serde(default)]
    pub metrics: MetricsConfig,
}

/// Main configuration struct used throughout the application
#[derive(Debug, Clone)]
pub struct Config {
    config_file: String,
    tick_interval_secs: u64,
    anchor_retry_secs: u64,
    sensor_timeout_ms: u64,
    heading_window: usize,
    enabled_on_start: bool,
    vehicle_reanchor_secs: u64,
    fix_timeout_ms: u64,
    max_fix_age_ms: u64,
    snap_threshold_m: f64,
    snapped_accuracy_m: f64,
    reanchor_distance_m: f64,
    gravity: f64,
    stationary_threshold: f64,
    car_threshold: f64,
    walking_stride_m: f64,
    cell_size_m: f64,
    dedup_window_ms: u64,
    notification_channel_capacity: usize,
    notification_file: Option<String>,
    history_file: String,
    places: Vec<PlaceRecord>,
    simulation: SimulationConfig,
    metrics_interval_secs: u64,
}

impl Default for Config {
    fn default() -> Self {
        Self::from_toml(TomlConfig::default(), "default".to_string())
    }
}

impl Config {
    /// Load configuration from a TOML file
    pub fn from_file<P: AsRef<Path>>(path: P) -> anyhow::Result<Self> {
        let path = path.as_ref();
        let content = fs::read_to_string(path)
            .with_context(|| format!("Failed to read config file {}", path.display()))?;

        let toml_config: TomlConfig = toml::from_str(&content)
            .with_context(|| format!("Failed to parse config file {}", path.display()))?;

        Ok(Self::from_toml(toml_config, path.display().to_string()))
    }

    /// Load configuration from a path, falling back to defaults
    pub fn load_from_path(path: &str) -> Self {
        match Self::from_file(path) {
            Ok(config) => config,
            Err(e) => {
                warn!(error = %e, "config_load_failed_using_defaults");
                Self::default()
            }
        }
    }

    fn from_toml(toml_config: TomlConfig, config_file: String) -> Self {
        let TomlConfig {
            tracking,
            anchor,
            motion,
            grid,
            notifications,
            history,
            places,
            simulation,
            metrics,
        } = toml_config;

        Self {
            config_file,
            tick_interval_secs: tracking.tick_interval_secs.max(1),
            anchor_retry_secs: tracking.anchor_retry_secs,
            sensor_timeout_ms: tracking.sensor_timeout_ms,
            heading_window: tracking.heading_window.max(1),
            enabled_on_start: tracking.enabled_on_start,
            vehicle_reanchor_secs: tracking.vehicle_reanchor_secs,
            fix_timeout_ms: anchor.fix_timeout_ms,
            max_fix_age_ms: anchor.max_fix_age_ms,
            snap_threshold_m: anchor.snap_threshold_m,
            snapped_accuracy_m: anchor.snapped_accuracy_m,
            reanchor_distance_m: anchor.reanchor_distance_m,
            gravity: motion.gravity,
            stationary_threshold: motion.stationary_threshold,
            car_threshold: motion.car_threshold,
            walking_stride_m: motion.walking_stride_m,
            cell_size_m: if grid.cell_size_m > 0.0 {
                grid.cell_size_m
            } else {
                default_cell_size_m()
            },
            dedup_window_ms: notifications.dedup_window_ms,
            notification_channel_capacity: notifications.channel_capacity.max(1),
            notification_file: notifications.file,
            history_file: history.file,
            places: places.into_iter().map(PlaceConfig::into_record).collect(),
            simulation,
            metrics_interval_secs: metrics.interval_secs.max(1),
        }
    }

    pub fn config_file(&self) -> &str {
        &self.config_file
    }

    pub fn tick_interval(&self) -> Duration {
        Duration::from_secs(self.tick_interval_secs)
    }

    pub fn anchor_retry(&self) -> Duration {
        Duration::from_secs(self.anchor_retry_secs)
    }

    pub fn sensor_timeout(&self) -> Duration {
        Duration::from_millis(self.sensor_timeout_ms)
    }

    pub fn heading_window(&self) -> usize {
        self.heading_window
    }

    pub fn enabled_on_start(&self) -> bool {
        self.enabled_on_start
    }

    pub fn vehicle_reanchor(&self) -> Duration {
        Duration::from_secs(self.vehicle_reanchor_secs)
    }

    pub fn fix_timeout(&self) -> Duration {
        Duration::from_millis(self.fix_timeout_ms)
    }

    pub fn max_fix_age(&self) -> Duration {
        Duration::from_millis(self.max_fix_age_ms)
    }

    pub fn snap_threshold_m(&self) -> f64 {
        self.snap_threshold_m
    }

    pub fn snapped_accuracy_m(&self) -> f64 {
        self.snapped_accuracy_m
    }

    pub fn reanchor_distance_m(&self) -> f64 {
        self.reanchor_distance_m
    }

    pub fn gravity(&self) -> f64 {
        self.gravity
    }

    pub fn stationary_threshold(&self) -> f64 {
        self.stationary_threshold
    }

    pub fn car_threshold(&self) -> f64 {
        self.car_threshold
    }

    pub fn walking_stride_m(&self) -> f64 {
        self.walking_stride_m
    }

    pub fn cell_size_m(&self) -> f64 {
        self.cell_size_m
    }

    pub fn dedup_window_ms(&self) -> u64 {
        self.dedup_window_ms
    }

    pub fn notification_channel_capacity(&self) -> usize {
        self.notification_channel_capacity
    }

    pub fn notification_file(&self) -> Option<&str> {
        self.notification_file.as_deref()
    }

    pub fn history_file(&self) -> &str {
        &self.history_file
    }

    pub fn places(&self) -> &[PlaceRecord] {
        &self.places
    }

    pub fn simulation(&self) -> &SimulationConfig {
        &self.simulation
    }

    pub fn simulation_start(&self) -> Coordinate {
        Coordinate::new(self.simulation.start_lat, self.simulation.start_lng)
    }

    pub fn metrics_interval_secs(&self) -> u64 {
        self.metrics_interval_secs
    }

    /// Builder method to replace the configured places
    pub fn with_places(mut self, places: Vec<PlaceRecord>) -> Self {
        self.places = places;
        self
    }

    /// Builder method to set the anchor retry back-off
    pub fn with_anchor_retry_secs(mut self, secs: u64) -> Self {
        self.anchor_retry_secs = secs;
        self
    }

    /// Builder method to set the fix timeout
    pub fn with_fix_timeout_ms(mut self, ms: u64) -> Self {
        self.fix_timeout_ms = ms;
        self
    }

    /// Builder method to set the sensor read timeout
    pub fn with_sensor_timeout_ms(mut self, ms: u64) -> Self {
        self.sensor_timeout_ms = ms;
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config() {
        let config = Config::default();
        assert_eq!(config.tick_interval(), Duration::from_secs(30));
        assert_eq!(config.fix_timeout(), Duration::from_secs(15));
        assert_eq!(config.max_fix_age(), Duration::from_secs(10));
        assert_eq!(config.snap_threshold_m(), 100.0);
        assert_eq!(config.snapped_accuracy_m(), 5.0);
        assert_eq!(config.reanchor_distance_m(), 300.0);
        assert_eq!(config.vehicle_reanchor(), Duration::from_secs(120));
        assert_eq!(config.walking_stride_m(), 0.76);
        assert_eq!(config.dedup_window_ms(), 30_000);
        assert_eq!(config.history_file(), "checkins.jsonl");
        assert!(config.places().is_empty());
        assert!(config.notification_file().is_none());
    }

    #[test]
    fn test_partial_sections_keep_defaults() {
        let toml_config: TomlConfig = toml::from_str(
            r#"
[anchor]
reanchor_distance_m = 150.0

[tracking]
heading_window = 0
"#,
        )
        .unwrap();
        let config = Config::from_toml(toml_config, "inline".to_string());

        assert_eq!(config.reanchor_distance_m(), 150.0);
        assert_eq!(config.snap_threshold_m(), 100.0);
        // A zero window would make smoothing impossible
        assert_eq!(config.heading_window(), 1);
    }

    #[test]
    fn test_places_parsed() {
        let toml_config: TomlConfig = toml::from_str(
            r#"
[[places]]
id = 1
name = "Home"
lat = 51.5
lng = -0.12
radius_m = 50.0

[[places]]
id = 2
name = "Office"
lat = 51.52
lng = -0.1
radius_m = 80.0
enabled = false
"#,
        )
        .unwrap();
        let config = Config::from_toml(toml_config, "inline".to_string());

        assert_eq!(config.places().len(), 2);
        assert_eq!(config.places()[0].place.id, PlaceId(1));
        assert!(config.places()[0].enabled);
        assert!(!config.places()[1].enabled);
        assert_eq!(config.places()[1].place.radius_meters, 80.0);
    }
}

//! End-to-end tracking flow: simulated walker through orchestrator, bus and
//! notification worker

use async_trait::async_trait;
use quietzone::domain::types::{Containment, Coordinate, NotificationKind, PlaceId};
use quietzone::domain::HistoryEntry;
use quietzone::infra::{Config, Metrics};
use quietzone::io::{InMemoryPlaceStore, Notification, NotificationDisplay, SimulatedWalker};
use quietzone::services::dead_reckoning::{calculate_new_position, distance_between};
use quietzone::services::{
    create_notification_worker, tracking_channel, Grid, NotificationBus, Orchestrator,
};
use std::io::Write;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc;
use tokio::time::timeout;

const HOME: Coordinate = Coordinate::new(51.5, -0.12);

/// Forwards every shown notification to the test
struct ChannelDisplay {
    tx: mpsc::UnboundedSender<Notification>,
}

#[async_trait]
impl NotificationDisplay for ChannelDisplay {
    async fn show(&self, notification: &Notification) -> anyhow::Result<()> {
        self.tx.send(notification.clone())?;
        Ok(())
    }
}

fn write_config(dir: &tempfile::TempDir) -> Config {
    let history = dir.path().join("checkins.jsonl");
    let content = format!(
        r#"
[tracking]
tick_interval_secs = 1

[history]
file = "{}"

[[places]]
id = 1
name = "Home"
lat = {}
lng = {}
radius_m = 50.0
"#,
        history.display(),
        HOME.lat,
        HOME.lng
    );
    let path = dir.path().join("flow.toml");
    let mut file = std::fs::File::create(&path).unwrap();
    file.write_all(content.as_bytes()).unwrap();
    Config::from_file(&path).unwrap()
}

#[test]
fn test_short_walk_from_anchor_stays_inside() {
    let grid = Grid::generate(HOME.lat, HOME.lng, 50.0, 10.0);

    let near = calculate_new_position(HOME, 20, 45.0, 0.76);
    assert!(distance_between(HOME, near) < 20.0);
    assert_eq!(grid.containment(near), Containment::Inside);

    let far = calculate_new_position(HOME, 1_500, 45.0, 0.76);
    assert!(distance_between(HOME, far) > 1_000.0);
    assert_eq!(grid.containment(far), Containment::Indeterminate);
}

#[tokio::test(start_paused = true)]
async fn test_walk_out_of_home_through_run_loop() {
    let dir = tempfile::tempdir().unwrap();
    let config = write_config(&dir);

    let metrics = Arc::new(Metrics::new());
    let store = Arc::new(InMemoryPlaceStore::from_config(&config));
    let walker =
        Arc::new(SimulatedWalker::new(HOME, config.walking_stride_m(), config.gravity()));
    walker.set_heading(90.0);
    walker.set_steps_per_read(18);

    let (shown_tx, mut shown_rx) = mpsc::unbounded_channel();
    let display: Arc<dyn NotificationDisplay> = Arc::new(ChannelDisplay { tx: shown_tx });
    let (notification_tx, worker) = create_notification_worker(display, metrics.clone(), 16);
    let worker_handle = tokio::spawn(worker.run());

    let bus =
        NotificationBus::with_metrics(config.dedup_window_ms(), notification_tx, metrics.clone());
    let mut orchestrator = Orchestrator::new(
        config,
        walker.clone(),
        walker.clone(),
        store.clone(),
        bus,
        metrics.clone(),
    );
    orchestrator.set_tracking_enabled(true);

    let (handle, cmd_rx) = tracking_channel(8);
    let run = tokio::spawn(async move {
        orchestrator.run(cmd_rx).await;
        orchestrator
    });

    let mut kinds = Vec::new();
    while kinds.last() != Some(&NotificationKind::SoundRestored) {
        let shown = timeout(Duration::from_secs(60), shown_rx.recv())
            .await
            .expect("notification within a minute")
            .expect("worker alive");
        assert_eq!(shown.place_id, PlaceId(1));
        kinds.push(shown.kind);
    }
    assert_eq!(
        kinds,
        vec![
            NotificationKind::PlaceEntered,
            NotificationKind::PlaceExited,
            NotificationKind::SoundRestored,
        ]
    );

    handle.shutdown().await.unwrap();
    let orchestrator = run.await.unwrap();
    assert!(orchestrator.silencing_place().is_none());
    assert!(orchestrator.distance_since_anchor() > 50.0);

    let history = store.history();
    assert!(matches!(history.first(), Some(HistoryEntry::CheckIn(_))));
    assert!(matches!(history.get(1), Some(HistoryEntry::CheckOut(_))));

    drop(orchestrator);
    worker_handle.await.unwrap();
    let report = metrics.report();
    assert_eq!(report.place_entries, 1);
    assert_eq!(report.place_exits, 1);
}

#[tokio::test]
async fn test_disabled_orchestrator_stops_on_shutdown() {
    let metrics = Arc::new(Metrics::new());
    let store = Arc::new(InMemoryPlaceStore::new(Vec::new()));
    let walker = Arc::new(SimulatedWalker::new(HOME, 0.76, 9.8));
    let (tx, _rx) = mpsc::channel(4);
    let bus = NotificationBus::new(30_000, tx);
    let mut orchestrator = Orchestrator::new(
        Config::default(),
        walker.clone(),
        walker,
        store,
        bus,
        metrics.clone(),
    );

    let (handle, cmd_rx) = tracking_channel(4);
    handle.set_enabled(false).await.unwrap();
    handle.shutdown().await.unwrap();

    timeout(Duration::from_secs(1), orchestrator.run(cmd_rx)).await.unwrap();
    assert!(!orchestrator.is_enabled());
    assert_eq!(metrics.report().ticks_total, 0);
}

//! Notification dispatch worker - shows notifications off the tick path
//!
//! The bus enqueues rendered notifications with `try_send`; this worker owns
//! the display service and absorbs its latency and failures.

use crate::infra::metrics::Metrics;
use crate::io::notifier::{Notification, NotificationDisplay};
use std::sync::Arc;
use std::time::Instant;
use tokio::sync::mpsc;
use tracing::{debug, info, warn};

pub struct NotificationWorker {
    display: Arc<dyn NotificationDisplay>,
    rx: mpsc::Receiver<Notification>,
    metrics: Arc<Metrics>,
}

impl NotificationWorker {
    pub fn new(
        display: Arc<dyn NotificationDisplay>,
        rx: mpsc::Receiver<Notification>,
        metrics: Arc<Metrics>,
    ) -> Self {
        Self { display, rx, metrics }
    }

    /// Run until every sender is dropped
    pub async fn run(mut self) {
        info!("notification_worker_started");

        while let Some(notification) = self.rx.recv().await {
            let start = Instant::now();
            match self.display.show(&notification).await {
                Ok(()) => {
                    debug!(
                        id = %notification.id,
                        show_us = %start.elapsed().as_micros(),
                        "notification_displayed"
                    );
                }
                Err(e) => {
                    warn!(id = %notification.id, error = %e, "notification_display_failed");
                    self.metrics.record_notification_failed();
                }
            }
        }

        info!("notification_worker_stopped");
    }
}

/// Create a notification channel and worker
///
/// Returns the sender (for the bus) and the worker (to be spawned)
pub fn create_notification_worker(
    display: Arc<dyn NotificationDisplay>,
    metrics: Arc<Metrics>,
    buffer_size: usize,
) -> (mpsc::Sender<Notification>, NotificationWorker) {
    let (tx, rx) = mpsc::channel(buffer_size);
    let worker = NotificationWorker::new(display, rx, metrics);
    (tx, worker)
}

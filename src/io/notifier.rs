//! Notification display seam
//!
//! `NotificationDisplay` is the platform's `showNotification`. Two
//! implementations ship: one that logs, and one that appends every shown
//! notification to a JSONL file.

use crate::domain::types::{NotificationKind, PlaceId};
use crate::io::jsonl::JsonlWriter;
use async_trait::async_trait;
use serde::Serialize;
use std::path::Path;
use tracing::info;

/// Rendered notification, ready for display
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Notification {
    /// Stable per kind+place, so a newer notification replaces an older one
    pub id: String,
    pub kind: NotificationKind,
    pub place_id: PlaceId,
    pub title: String,
    pub body: String,
    pub silent: bool,
    pub grouped: bool,
    /// Epoch milliseconds of the originating event
    pub ts: u64,
}

#[async_trait]
pub trait NotificationDisplay: Send + Sync {
    async fn show(&self, notification: &Notification) -> anyhow::Result<()>;
}

/// Displays notifications as structured log lines
#[derive(Debug, Default)]
pub struct TracingDisplay;

#[async_trait]
impl NotificationDisplay for TracingDisplay {
    async fn show(&self, notification: &Notification) -> anyhow::Result<()> {
        info!(
            id = %notification.id,
            title = %notification.title,
            body = %notification.body,
            silent = %notification.silent,
            grouped = %notification.grouped,
            "notification_shown"
        );
        Ok(())
    }
}

/// Appends shown notifications to a JSONL file
#[derive(Debug)]
pub struct JsonlDisplay {
    writer: JsonlWriter,
}

impl JsonlDisplay {
    pub fn new(path: impl AsRef<Path>) -> Self {
        let writer = JsonlWriter::new(path);
        info!(file_path = %writer.path().display(), "notification_file_initialized");
        Self { writer }
    }
}

#[async_trait]
impl NotificationDisplay for JsonlDisplay {
    async fn show(&self, notification: &Notification) -> anyhow::Result<()> {
        self.writer.append(notification)
    }
}

//! Lifecycle command channel into the Orchestrator

use crate::domain::types::PlaceId;
use anyhow::anyhow;
use tokio::sync::mpsc;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TrackingCommand {
    SetEnabled(bool),
    PlaceToggled { id: PlaceId, enabled: bool },
    PlaceDeleted(PlaceId),
    Resync,
    /// A critical permission was revoked
    PurgeAll,
    Shutdown,
}

impl TrackingCommand {
    pub fn as_str(&self) -> &'static str {
        match self {
            TrackingCommand::SetEnabled(_) => "set_enabled",
            TrackingCommand::PlaceToggled { .. } => "place_toggled",
            TrackingCommand::PlaceDeleted(_) => "place_deleted",
            TrackingCommand::Resync => "resync",
            TrackingCommand::PurgeAll => "purge_all",
            TrackingCommand::Shutdown => "shutdown",
        }
    }
}

/// Cloneable handle used by the UI layer to drive the Orchestrator
#[derive(Debug, Clone)]
pub struct TrackingHandle {
    tx: mpsc::Sender<TrackingCommand>,
}

/// Create a command channel
///
/// Returns the handle (for callers) and the receiver (for `Orchestrator::run`)
pub fn tracking_channel(buffer_size: usize) -> (TrackingHandle, mpsc::Receiver<TrackingCommand>) {
    let (tx, rx) = mpsc::channel(buffer_size);
    (TrackingHandle { tx }, rx)
}

impl TrackingHandle {
    pub async fn set_enabled(&self, enabled: bool) -> anyhow::Result<()> {
        self.send(TrackingCommand::SetEnabled(enabled)).await
    }

    pub async fn place_toggled(&self, id: PlaceId, enabled: bool) -> anyhow::Result<()> {
        self.send(TrackingCommand::PlaceToggled { id, enabled }).await
    }

    pub async fn place_deleted(&self, id: PlaceId) -> anyhow::Result<()> {
        self.send(TrackingCommand::PlaceDeleted(id)).await
    }

    pub async fn resync(&self) -> anyhow::Result<()> {
        self.send(TrackingCommand::Resync).await
    }

    pub async fn purge_all(&self) -> anyhow::Result<()> {
        self.send(TrackingCommand::PurgeAll).await
    }

    pub async fn shutdown(&self) -> anyhow::Result<()> {
        self.send(TrackingCommand::Shutdown).await
    }

    async fn send(&self, cmd: TrackingCommand) -> anyhow::Result<()> {
        let name = cmd.as_str();
        self.tx.send(cmd).await.map_err(|_| anyhow!("orchestrator stopped, dropped {name}"))
    }
}

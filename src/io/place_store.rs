//! Place repository seam and the in-memory store used by the binary
//!
//! The tracking core only reads places, flips their enabled flag and writes
//! check-in history. The schema behind those calls belongs to the store.

use crate::domain::history::{CheckIn, CheckOut, HistoryEntry};
use crate::domain::types::{PlaceId, PlaceRecord};
use crate::infra::config::Config;
use crate::io::jsonl::JsonlWriter;
use anyhow::bail;
use parking_lot::RwLock;
use std::path::Path;
use tracing::{debug, info};

pub trait PlaceRepository: Send + Sync {
    /// Every stored place, monitored or not
    fn places(&self) -> anyhow::Result<Vec<PlaceRecord>>;

    fn set_enabled(&self, id: PlaceId, enabled: bool) -> anyhow::Result<()>;

    fn record_check_in(&self, check_in: &CheckIn) -> anyhow::Result<()>;

    fn record_check_out(&self, check_out: &CheckOut) -> anyhow::Result<()>;
}

/// Places held in memory, history optionally mirrored to a JSONL file
pub struct InMemoryPlaceStore {
    places: RwLock<Vec<PlaceRecord>>,
    history: RwLock<Vec<HistoryEntry>>,
    history_file: Option<JsonlWriter>,
}

impl InMemoryPlaceStore {
    pub fn new(places: Vec<PlaceRecord>) -> Self {
        Self { places: RwLock::new(places), history: RwLock::new(Vec::new()), history_file: None }
    }

    /// Seed from configured places, writing history to the configured file
    pub fn from_config(config: &Config) -> Self {
        let store = Self::new(config.places().to_vec()).with_history_file(config.history_file());
        info!(
            places = %config.places().len(),
            history_file = %config.history_file(),
            "place_store_initialized"
        );
        store
    }

    pub fn with_history_file(mut self, path: impl AsRef<Path>) -> Self {
        self.history_file = Some(JsonlWriter::new(path));
        self
    }

    /// Insert a place or replace the one with the same id
    pub fn upsert(&self, record: PlaceRecord) {
        let mut places = self.places.write();
        match places.iter_mut().find(|r| r.place.id == record.place.id) {
            Some(existing) => *existing = record,
            None => places.push(record),
        }
    }

    /// Delete a place; returns false when it did not exist
    pub fn remove(&self, id: PlaceId) -> bool {
        let mut places = self.places.write();
        let before = places.len();
        places.retain(|r| r.place.id != id);
        places.len() != before
    }

    /// Snapshot of every history entry recorded so far
    pub fn history(&self) -> Vec<HistoryEntry> {
        self.history.read().clone()
    }

    fn append_history(&self, entry: HistoryEntry) -> anyhow::Result<()> {
        if let Some(ref writer) = self.history_file {
            writer.append(&entry)?;
        }
        self.history.write().push(entry);
        Ok(())
    }
}

impl PlaceRepository for InMemoryPlaceStore {
    fn places(&self) -> anyhow::Result<Vec<PlaceRecord>> {
        Ok(self.places.read().clone())
    }

    fn set_enabled(&self, id: PlaceId, enabled: bool) -> anyhow::Result<()> {
        let mut places = self.places.write();
        let Some(record) = places.iter_mut().find(|r| r.place.id == id) else {
            bail!("unknown place {id}");
        };
        record.enabled = enabled;
        debug!(place_id = %id, enabled = %enabled, "place_enabled_updated");
        Ok(())
    }

    fn record_check_in(&self, check_in: &CheckIn) -> anyhow::Result<()> {
        self.append_history(HistoryEntry::CheckIn(check_in.clone()))
    }

    fn record_check_out(&self, check_out: &CheckOut) -> anyhow::Result<()> {
        self.append_history(HistoryEntry::CheckOut(check_out.clone()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::history::CheckOutReason;
    use crate::domain::types::Place;
    use chrono::Utc;

    fn record(id: i64, enabled: bool) -> PlaceRecord {
        PlaceRecord {
            place: Place {
                id: PlaceId(id),
                name: format!("Place {id}"),
                lat: 10.0,
                lng: 20.0,
                radius_meters: 50.0,
            },
            enabled,
        }
    }

    #[test]
    fn test_set_enabled_and_remove() {
        let store = InMemoryPlaceStore::new(vec![record(1, true), record(2, true)]);

        store.set_enabled(PlaceId(2), false).unwrap();
        assert!(!store.places().unwrap()[1].enabled);
        assert!(store.set_enabled(PlaceId(9), false).is_err());

        assert!(store.remove(PlaceId(1)));
        assert!(!store.remove(PlaceId(1)));
        assert_eq!(store.places().unwrap().len(), 1);
    }

    #[test]
    fn test_upsert_replaces_by_id() {
        let store = InMemoryPlaceStore::new(vec![record(1, true)]);
        let mut moved = record(1, true);
        moved.place.radius_meters = 120.0;

        store.upsert(moved);
        store.upsert(record(3, false));

        let places = store.places().unwrap();
        assert_eq!(places.len(), 2);
        assert_eq!(places[0].place.radius_meters, 120.0);
    }

    #[test]
    fn test_history_mirrored_to_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("checkins.jsonl");
        let store = InMemoryPlaceStore::new(vec![record(1, true)]).with_history_file(&path);

        let place = record(1, true).place;
        let check_in = CheckIn::new(&place, Utc::now());
        store.record_check_in(&check_in).unwrap();
        store
            .record_check_out(&CheckOut::close(&check_in, Utc::now(), CheckOutReason::Exited))
            .unwrap();

        assert_eq!(store.history().len(), 2);
        let content = std::fs::read_to_string(&path).unwrap();
        let lines: Vec<&str> = content.lines().collect();
        assert_eq!(lines.len(), 2);
        assert!(lines[0].contains("\"t\":\"check_in\""));
        assert!(lines[1].contains("\"reason\":\"exited\""));
    }
}

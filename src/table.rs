//! Latest known position per source

use std::collections::HashMap;

use tokio::sync::RwLock;
use tracing::debug;

use crate::models::{LocationRecord, LocationReport};

/// Map from source identifier to its most recent accepted report
///
/// Records are replaced whole under the write lock, so a snapshot never
/// observes a partially written record.
#[derive(Debug, Default)]
pub struct LocationTable {
    records: RwLock<HashMap<String, LocationRecord>>,
}

impl LocationTable {
    pub fn new() -> Self {
        Self::default()
    }

    /// Insert or overwrite the record for the report's source
    ///
    /// Every accepted report counts as a change, identical repeats included.
    pub async fn upsert(&self, report: LocationReport) -> bool {
        let record = LocationRecord::new(report);
        let mut records = self.records.write().await;
        let previous = records.insert(record.source_id.clone(), record);
        debug!(sources = records.len(), new_source = previous.is_none(), "location table updated");
        true
    }

    /// Point-in-time copy of all records
    pub async fn snapshot(&self) -> HashMap<String, LocationRecord> {
        self.records.read().await.clone()
    }

    pub async fn get(&self, source_id: &str) -> Option<LocationRecord> {
        self.records.read().await.get(source_id).cloned()
    }

    pub async fn len(&self) -> usize {
        self.records.read().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.records.read().await.is_empty()
    }
}

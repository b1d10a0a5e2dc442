//! Persistence collaborator contract and the in-memory implementation.

use std::sync::atomic::{AtomicI64, Ordering};

use async_trait::async_trait;
use dashmap::DashMap;
use parking_lot::Mutex;
use thiserror::Error;
use tracing::debug;

use crate::device::{GpsDeviceRecord, GpsHistoryRecord};
use crate::position::PositionReport;

/// Storage-layer error.
#[derive(Error, Debug, Clone)]
pub enum StoreError {
    #[error("storage error: {0}")]
    Storage(String),
}

impl StoreError {
    pub fn storage(msg: impl Into<String>) -> Self {
        StoreError::Storage(msg.into())
    }
}

pub type Result<T> = std::result::Result<T, StoreError>;

/// Narrow contract the tracking core holds against the fleet database.
///
/// The CRUD layer owns the real relational implementation; the core only
/// resolves identities and writes decoded state through these four calls.
#[async_trait]
pub trait FleetStore: Send + Sync {
    /// Look up a device by hardware identifier.
    async fn find_device(&self, hardware_id: &str) -> Result<Option<GpsDeviceRecord>>;

    /// Resolve a hardware identifier to its linked vehicle, if any.
    ///
    /// `None` covers both "device not registered" and "device registered but
    /// not mounted on a vehicle" - callers drop the report either way.
    async fn find_linked_vehicle(&self, hardware_id: &str) -> Result<Option<i64>>;

    /// Overwrite the device's last-known position fields.
    async fn upsert_last_position(&self, hardware_id: &str, report: &PositionReport)
        -> Result<()>;

    /// Append one accepted report to the history log.
    async fn append_history(
        &self,
        hardware_id: &str,
        vehicle_id: i64,
        report: &PositionReport,
        raw_message: &str,
    ) -> Result<()>;
}

/// In-memory [`FleetStore`] backing the bundled binary and the test suite.
///
/// Devices are seeded up front (from configuration or test setup); history
/// is an append-only vector behind a plain mutex since nothing iterates it
/// concurrently with writes.
#[derive(Debug, Default)]
pub struct MemoryFleetStore {
    devices: DashMap<String, GpsDeviceRecord>,
    history: Mutex<Vec<GpsHistoryRecord>>,
    next_id: AtomicI64,
}

impl MemoryFleetStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a device, returning its assigned record id.
    pub fn add_device(
        &self,
        hardware_id: impl Into<String>,
        vehicle_id: Option<i64>,
        title: impl Into<String>,
        icon: impl Into<String>,
    ) -> i64 {
        let hardware_id = hardware_id.into();
        let id = self.next_id.fetch_add(1, Ordering::Relaxed) + 1;
        self.devices.insert(
            hardware_id.clone(),
            GpsDeviceRecord {
                id,
                vehicle_id,
                hardware_id,
                title: title.into(),
                icon: icon.into(),
                last_position: None,
            },
        );
        id
    }

    /// Current record for a device, if registered.
    pub fn device(&self, hardware_id: &str) -> Option<GpsDeviceRecord> {
        self.devices.get(hardware_id).map(|r| r.value().clone())
    }

    /// Snapshot of the accepted-report history.
    pub fn history(&self) -> Vec<GpsHistoryRecord> {
        self.history.lock().clone()
    }
}

#[async_trait]
impl FleetStore for MemoryFleetStore {
    async fn find_device(&self, hardware_id: &str) -> Result<Option<GpsDeviceRecord>> {
        Ok(self.devices.get(hardware_id).map(|r| r.value().clone()))
    }

    async fn find_linked_vehicle(&self, hardware_id: &str) -> Result<Option<i64>> {
        Ok(self
            .devices
            .get(hardware_id)
            .and_then(|r| r.vehicle_id))
    }

    async fn upsert_last_position(
        &self,
        hardware_id: &str,
        report: &PositionReport,
    ) -> Result<()> {
        match self.devices.get_mut(hardware_id) {
            Some(mut record) => {
                let mut stored = report.clone();
                stored.heading = report.normalized_heading();
                record.last_position = Some(stored);
                Ok(())
            },
            None => {
                // Reports are gated on vehicle linkage before this call, so
                // an unknown id here is a race with device deregistration.
                debug!(device_id = %hardware_id, "upsert for unregistered device ignored");
                Ok(())
            },
        }
    }

    async fn append_history(
        &self,
        hardware_id: &str,
        vehicle_id: i64,
        report: &PositionReport,
        raw_message: &str,
    ) -> Result<()> {
        let device_id = match self.devices.get(hardware_id) {
            Some(record) => record.id,
            None => {
                debug!(device_id = %hardware_id, "history append for unregistered device ignored");
                return Ok(());
            },
        };
        self.history.lock().push(GpsHistoryRecord {
            device_id,
            vehicle_id,
            report: report.clone(),
            raw_message: raw_message.to_string(),
        });
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{TimeZone, Utc};

    fn sample_report(heading: f64) -> PositionReport {
        PositionReport {
            latitude: -23.550520,
            longitude: -46.633308,
            speed: 12.0,
            heading,
            timestamp: Utc.with_ymd_and_hms(2025, 8, 1, 9, 30, 0).unwrap(),
            ignition: true,
        }
    }

    #[tokio::test]
    async fn upsert_normalizes_heading_and_updates_record() {
        let store = MemoryFleetStore::new();
        store.add_device("358000000000001", Some(7), "Truck 1", "truck");

        store
            .upsert_last_position("358000000000001", &sample_report(725.0))
            .await
            .unwrap();

        let record = store.device("358000000000001").unwrap();
        let last = record.last_position.unwrap();
        assert_eq!(last.heading, 5.0);
        assert_eq!(last.latitude, -23.550520);
    }

    #[tokio::test]
    async fn linkage_lookup_distinguishes_unlinked_from_unknown() {
        let store = MemoryFleetStore::new();
        store.add_device("linked", Some(3), "Van", "van");
        store.add_device("unlinked", None, "Spare", "box");

        assert_eq!(store.find_linked_vehicle("linked").await.unwrap(), Some(3));
        assert_eq!(store.find_linked_vehicle("unlinked").await.unwrap(), None);
        assert_eq!(store.find_linked_vehicle("missing").await.unwrap(), None);

        // find_device still sees the unlinked one
        assert!(store.find_device("unlinked").await.unwrap().is_some());
        assert!(store.find_device("missing").await.unwrap().is_none());
    }

    #[tokio::test]
    async fn history_is_append_only() {
        let store = MemoryFleetStore::new();
        let id = store.add_device("dev", Some(1), "T", "t");

        store
            .append_history("dev", 1, &sample_report(90.0), "RAW;1")
            .await
            .unwrap();
        store
            .append_history("dev", 1, &sample_report(91.0), "RAW;2")
            .await
            .unwrap();

        let history = store.history();
        assert_eq!(history.len(), 2);
        assert_eq!(history[0].device_id, id);
        assert_eq!(history[0].raw_message, "RAW;1");
        assert_eq!(history[1].report.heading, 91.0);
    }
}

//! Protocol listeners and codecs.
//!
//! The two device protocols are structurally parallel - accept loop, one
//! handler task per socket, codec-driven read loop, ACK/NAK writes - but
//! deliberately share no code beyond the connection registry, the
//! persistence gate below, and the stats counters.

pub mod gt06;
pub mod suntech;

use std::sync::Arc;

use fleet_model::{FleetStore, PositionReport};
use parking_lot::RwLock;
use tracing::{debug, warn};

/// Counters kept per listener.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct StatsSnapshot {
    pub connections_accepted: u64,
    pub frames_decoded: u64,
    pub frames_rejected: u64,
    pub positions_stored: u64,
}

/// Shared, cheaply-lockable listener statistics.
#[derive(Debug, Default)]
pub struct ListenerStats {
    inner: RwLock<StatsSnapshot>,
}

impl ListenerStats {
    pub fn record_accept(&self) {
        self.inner.write().connections_accepted += 1;
    }

    pub fn record_decoded(&self) {
        self.inner.write().frames_decoded += 1;
    }

    pub fn record_rejected(&self) {
        self.inner.write().frames_rejected += 1;
    }

    pub fn record_stored(&self) {
        self.inner.write().positions_stored += 1;
    }

    pub fn snapshot(&self) -> StatsSnapshot {
        *self.inner.read()
    }
}

/// Persist one accepted report, gated on vehicle linkage.
///
/// Devices without a linked vehicle are a policy drop, not an error: the
/// report was decoded and acknowledged, it just is not stored. Storage
/// failures are logged and swallowed - nothing here may kill the handler.
pub(crate) async fn persist_report(
    store: &Arc<dyn FleetStore>,
    stats: &ListenerStats,
    hardware_id: &str,
    report: &PositionReport,
    raw_message: &str,
) {
    let vehicle_id = match store.find_linked_vehicle(hardware_id).await {
        Ok(Some(vehicle_id)) => vehicle_id,
        Ok(None) => {
            debug!(device_id = %hardware_id, "device not linked to a vehicle, report dropped");
            return;
        },
        Err(err) => {
            warn!(device_id = %hardware_id, error = %err, "vehicle lookup failed, report dropped");
            return;
        },
    };

    if let Err(err) = store.upsert_last_position(hardware_id, report).await {
        warn!(device_id = %hardware_id, error = %err, "failed to update last position");
        return;
    }
    if let Err(err) = store
        .append_history(hardware_id, vehicle_id, report, raw_message)
        .await
    {
        warn!(device_id = %hardware_id, error = %err, "failed to append history");
        return;
    }

    stats.record_stored();
    debug!(
        device_id = %hardware_id,
        vehicle_id,
        latitude = report.latitude,
        longitude = report.longitude,
        ignition = report.ignition,
        "position stored"
    );
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{TimeZone, Utc};
    use fleet_model::MemoryFleetStore;

    fn report() -> PositionReport {
        PositionReport {
            latitude: -23.5,
            longitude: -46.6,
            speed: 0.0,
            heading: 90.0,
            timestamp: Utc.with_ymd_and_hms(2025, 8, 1, 10, 0, 0).unwrap(),
            ignition: true,
        }
    }

    #[tokio::test]
    async fn unlinked_devices_are_dropped_before_persistence() {
        let memory = Arc::new(MemoryFleetStore::new());
        memory.add_device("unlinked", None, "Spare", "box");
        let store: Arc<dyn FleetStore> = memory.clone();
        let stats = ListenerStats::default();

        persist_report(&store, &stats, "unlinked", &report(), "RAW").await;

        assert!(memory.device("unlinked").unwrap().last_position.is_none());
        assert!(memory.history().is_empty());
        assert_eq!(stats.snapshot().positions_stored, 0);
    }

    #[tokio::test]
    async fn linked_devices_get_state_and_history() {
        let memory = Arc::new(MemoryFleetStore::new());
        memory.add_device("linked", Some(9), "Truck", "truck");
        let store: Arc<dyn FleetStore> = memory.clone();
        let stats = ListenerStats::default();

        persist_report(&store, &stats, "linked", &report(), "RAW;TEXT").await;

        assert!(memory.device("linked").unwrap().last_position.is_some());
        let history = memory.history();
        assert_eq!(history.len(), 1);
        assert_eq!(history[0].vehicle_id, 9);
        assert_eq!(history[0].raw_message, "RAW;TEXT");
        assert_eq!(stats.snapshot().positions_stored, 1);
    }
}

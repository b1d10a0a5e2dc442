//! Device and history records owned by the persistence collaborator.

use serde::{Deserialize, Serialize};

use crate::position::PositionReport;

/// A registered GPS tracker and its last-known state.
///
/// The tracking core only reads this record (to resolve hardware id to the
/// linked vehicle) and updates its last-known position fields; the record's
/// lifecycle belongs to the fleet CRUD layer. `vehicle_id` is nullable on
/// purpose: a device may be registered but not yet mounted on a vehicle, and
/// reports from such devices are dropped rather than stored.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GpsDeviceRecord {
    pub id: i64,
    pub vehicle_id: Option<i64>,
    /// IMEI or equivalent hardware identifier, unique per device
    pub hardware_id: String,
    pub title: String,
    pub icon: String,
    pub last_position: Option<PositionReport>,
}

/// One accepted position report, append-only.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GpsHistoryRecord {
    pub device_id: i64,
    pub vehicle_id: i64,
    pub report: PositionReport,
    /// Original wire text (hex for binary protocols) kept for auditing
    pub raw_message: String,
}

//! GPS tracker ingestion and command service.
//!
//! Two always-on TCP listeners ingest live position reports from
//! vehicle-mounted trackers speaking incompatible wire protocols (GT-06
//! binary frames and Suntech ASCII messages), keep track of which device
//! owns which live connection, and push operator commands back down those
//! same connections. Persistence goes through the narrow
//! [`fleet_model::FleetStore`] contract; everything else about the fleet
//! (CRUD, REST, reporting) lives outside this crate.

pub mod config;
pub mod dispatch;
pub mod error;
pub mod logging;
pub mod protocols;
pub mod registry;

pub use error::{Result, TrackSrvError};

//! Domain model for the fleet GPS tracking core.
//!
//! This crate holds the types shared between the tracker ingestion service
//! and its collaborators: decoded position reports, device and history
//! records, operator command intents, and the [`FleetStore`] persistence
//! contract. The surrounding CRUD/REST layer implements [`FleetStore`] on
//! top of its relational store; [`MemoryFleetStore`] is the in-process
//! implementation used by the bundled binary and by tests.

pub mod command;
pub mod device;
pub mod position;
pub mod store;

pub use command::{Command, CommandIntent, DeliveryResult, ServerTransport};
pub use device::{GpsDeviceRecord, GpsHistoryRecord};
pub use position::PositionReport;
pub use store::{FleetStore, MemoryFleetStore, StoreError};

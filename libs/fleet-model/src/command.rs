//! Operator command intents and delivery outcomes.
//!
//! The API layer constructs a [`CommandIntent`] and hands it to the tracking
//! core's dispatcher. Each [`Command`] variant carries named, typed fields
//! instead of a string-keyed parameter map, so a malformed parameter set is
//! unrepresentable. Conversion to protocol wire strings happens inside the
//! dispatcher's builder, never here.

use serde::{Deserialize, Serialize};

/// Transport selector for the server-reconfigure command.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ServerTransport {
    Tcp,
    Udp,
}

impl ServerTransport {
    /// Single-letter wire form used by the tracker protocol.
    pub fn wire_code(self) -> &'static str {
        match self {
            ServerTransport::Tcp => "T",
            ServerTransport::Udp => "U",
        }
    }
}

/// A control command, one variant per supported operation.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum Command {
    /// Request an immediate position report
    Locate,
    /// Engage or release the immobilizer relay on output 1
    Immobilizer { engage: bool },
    /// Reconfigure how often the device reports while driving/parked
    ReportIntervals { driving_secs: u32, parking_secs: u32 },
    /// Reboot the tracker
    Reboot,
    /// Point the tracker at a different ingestion server
    ConfigureServer {
        transport: ServerTransport,
        ip: String,
        port: u16,
    },
    /// Escape hatch for device-specific verbs; parameters are joined
    /// positionally in the order given
    Custom { verb: String, params: Vec<String> },
}

/// A command aimed at one device.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CommandIntent {
    /// Hardware identifier of the target device
    pub device_id: String,
    pub command: Command,
}

impl CommandIntent {
    pub fn new(device_id: impl Into<String>, command: Command) -> Self {
        Self {
            device_id: device_id.into(),
            command,
        }
    }

    pub fn locate(device_id: impl Into<String>) -> Self {
        Self::new(device_id, Command::Locate)
    }

    pub fn immobilize(device_id: impl Into<String>, engage: bool) -> Self {
        Self::new(device_id, Command::Immobilizer { engage })
    }

    pub fn set_report_intervals(
        device_id: impl Into<String>,
        driving_secs: u32,
        parking_secs: u32,
    ) -> Self {
        Self::new(
            device_id,
            Command::ReportIntervals {
                driving_secs,
                parking_secs,
            },
        )
    }

    pub fn reboot(device_id: impl Into<String>) -> Self {
        Self::new(device_id, Command::Reboot)
    }

    pub fn configure_server(
        device_id: impl Into<String>,
        transport: ServerTransport,
        ip: impl Into<String>,
        port: u16,
    ) -> Self {
        Self::new(
            device_id,
            Command::ConfigureServer {
                transport,
                ip: ip.into(),
                port,
            },
        )
    }
}

/// Outcome of a dispatch attempt, reported synchronously to the caller.
///
/// Every precondition failure is a value, not an error - the API layer maps
/// these onto whatever outward status representation it wants.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DeliveryResult {
    /// The wire command was written to the device's live connection
    Delivered,
    /// No device with that hardware id is registered in the system
    DeviceUnknown,
    /// The device exists but holds no live connection right now
    DeviceOffline,
    /// The write failed; the stale connection has been evicted
    SendFailed,
}

impl DeliveryResult {
    pub fn is_delivered(self) -> bool {
        matches!(self, DeliveryResult::Delivered)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn constructors_carry_typed_fields() {
        let intent = CommandIntent::immobilize("358000000000001", true);
        assert_eq!(intent.device_id, "358000000000001");
        assert_eq!(intent.command, Command::Immobilizer { engage: true });

        let intent = CommandIntent::configure_server("X", ServerTransport::Udp, "10.0.0.1", 1150);
        match intent.command {
            Command::ConfigureServer {
                transport,
                ref ip,
                port,
            } => {
                assert_eq!(transport.wire_code(), "U");
                assert_eq!(ip, "10.0.0.1");
                assert_eq!(port, 1150);
            },
            other => panic!("unexpected command: {other:?}"),
        }
    }

    #[test]
    fn delivery_result_serializes_snake_case() {
        let json = serde_json::to_string(&DeliveryResult::DeviceOffline).unwrap();
        assert_eq!(json, "\"device_offline\"");
        assert!(DeliveryResult::Delivered.is_delivered());
        assert!(!DeliveryResult::SendFailed.is_delivered());
    }
}

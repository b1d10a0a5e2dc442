//! Operator command dispatch.
//!
//! The dispatcher is a chain of short-circuiting preconditions - device
//! registered, device connected, wire write succeeded - each reported as a
//! [`DeliveryResult`] value rather than an error. Wire string construction
//! is a pure function kept separate from delivery so the format logic tests
//! without sockets.

use std::sync::Arc;

use tracing::{debug, info};

use fleet_model::{Command, CommandIntent, DeliveryResult, FleetStore};

use crate::error::Result;
use crate::registry::ConnectionRegistry;

/// Suntech command protocol revision marker, constant across all verbs
const PROTOCOL_REV: &str = "02";

/// Build the protocol wire string for a command, without terminator.
///
/// Parameter order per verb is fixed by the device firmware:
/// output before status, driving before parking before the constant `0`,
/// transport before ip before port.
pub fn build_wire_command(device_id: &str, command: &Command) -> String {
    match command {
        Command::Locate => format!("ST300CMD;{device_id};{PROTOCOL_REV}"),
        Command::Immobilizer { engage } => {
            let status = if *engage { "1" } else { "0" };
            format!("ST300OUT;{device_id};{PROTOCOL_REV};1;{status}")
        },
        Command::ReportIntervals {
            driving_secs,
            parking_secs,
        } => format!("ST300RPT;{device_id};{PROTOCOL_REV};{driving_secs};{parking_secs};0"),
        Command::Reboot => format!("ST300RST;{device_id};{PROTOCOL_REV}"),
        Command::ConfigureServer {
            transport,
            ip,
            port,
        } => format!(
            "ST300ADP;{device_id};{PROTOCOL_REV};{};{ip};{port}",
            transport.wire_code()
        ),
        Command::Custom { verb, params } => {
            if params.is_empty() {
                format!("ST300{verb};{device_id};{PROTOCOL_REV}")
            } else {
                format!(
                    "ST300{verb};{device_id};{PROTOCOL_REV};{}",
                    params.join(";")
                )
            }
        },
    }
}

/// Validates a command intent against the device roster and the live
/// connection registry, then writes it down the device's own socket.
pub struct CommandDispatcher {
    store: Arc<dyn FleetStore>,
    registry: Arc<ConnectionRegistry>,
}

impl CommandDispatcher {
    pub fn new(store: Arc<dyn FleetStore>, registry: Arc<ConnectionRegistry>) -> Self {
        Self { store, registry }
    }

    /// Deliver one command intent.
    ///
    /// Errors surface only for persistence-collaborator failures; every
    /// delivery-level outcome is a [`DeliveryResult`] value. Delivery is
    /// synchronous: when this returns `Delivered` the bytes have been
    /// written and flushed to the device socket. Retry policy belongs to
    /// the caller.
    pub async fn dispatch(&self, intent: &CommandIntent) -> Result<DeliveryResult> {
        if self.store.find_device(&intent.device_id).await?.is_none() {
            debug!(device_id = %intent.device_id, "command for unknown device");
            return Ok(DeliveryResult::DeviceUnknown);
        }

        if !self.registry.is_connected(&intent.device_id).await {
            debug!(device_id = %intent.device_id, "command for offline device");
            return Ok(DeliveryResult::DeviceOffline);
        }

        let wire = build_wire_command(&intent.device_id, &intent.command);
        let mut payload = wire.clone().into_bytes();
        payload.push(b'\r');

        if self.registry.send(&intent.device_id, &payload).await {
            info!(device_id = %intent.device_id, command = %wire, "command delivered");
            Ok(DeliveryResult::Delivered)
        } else {
            info!(device_id = %intent.device_id, command = %wire, "command send failed");
            Ok(DeliveryResult::SendFailed)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use fleet_model::{MemoryFleetStore, ServerTransport};

    #[test]
    fn builder_fixes_parameter_order_per_verb() {
        let id = "865432109876543";

        assert_eq!(
            build_wire_command(id, &Command::Locate),
            "ST300CMD;865432109876543;02"
        );
        assert_eq!(
            build_wire_command(id, &Command::Immobilizer { engage: true }),
            "ST300OUT;865432109876543;02;1;1"
        );
        assert_eq!(
            build_wire_command(id, &Command::Immobilizer { engage: false }),
            "ST300OUT;865432109876543;02;1;0"
        );
        assert_eq!(
            build_wire_command(
                id,
                &Command::ReportIntervals {
                    driving_secs: 30,
                    parking_secs: 180,
                }
            ),
            "ST300RPT;865432109876543;02;30;180;0"
        );
        assert_eq!(
            build_wire_command(id, &Command::Reboot),
            "ST300RST;865432109876543;02"
        );
        assert_eq!(
            build_wire_command(
                id,
                &Command::ConfigureServer {
                    transport: ServerTransport::Tcp,
                    ip: "10.1.2.3".into(),
                    port: 1150,
                }
            ),
            "ST300ADP;865432109876543;02;T;10.1.2.3;1150"
        );
        assert_eq!(
            build_wire_command(
                id,
                &Command::Custom {
                    verb: "SVC".into(),
                    params: vec!["0".into(), "90".into()],
                }
            ),
            "ST300SVC;865432109876543;02;0;90"
        );
        assert_eq!(
            build_wire_command(
                id,
                &Command::Custom {
                    verb: "PRESET".into(),
                    params: vec![],
                }
            ),
            "ST300PRESET;865432109876543;02"
        );
    }

    #[tokio::test]
    async fn unknown_device_short_circuits_before_any_lookup_of_the_registry() {
        let store = Arc::new(MemoryFleetStore::new());
        let registry = Arc::new(ConnectionRegistry::new());
        let dispatcher = CommandDispatcher::new(store, registry.clone());

        let result = dispatcher
            .dispatch(&CommandIntent::locate("does-not-exist"))
            .await
            .unwrap();
        assert_eq!(result, DeliveryResult::DeviceUnknown);
        assert_eq!(registry.connected_count().await, 0);
    }

    #[tokio::test]
    async fn registered_but_disconnected_device_is_offline() {
        let store = Arc::new(MemoryFleetStore::new());
        store.add_device("865432109876543", Some(1), "Truck", "truck");
        let registry = Arc::new(ConnectionRegistry::new());
        let dispatcher = CommandDispatcher::new(store, registry);

        let result = dispatcher
            .dispatch(&CommandIntent::reboot("865432109876543"))
            .await
            .unwrap();
        assert_eq!(result, DeliveryResult::DeviceOffline);
    }
}

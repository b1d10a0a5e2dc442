//! Suntech TCP listener.
//!
//! Unlike GT-06 there is no dedicated login packet: the device's identity is
//! taken from the first classifiable message and re-checked on every one, so
//! a heartbeat, a position report or even an alert can open the session. The
//! protocol caps silent connections, so reads run under an idle timeout.

use std::sync::Arc;
use std::time::Duration;

use futures::StreamExt;
use tokio::net::{TcpListener, TcpStream};
use tokio::time::timeout;
use tokio_util::codec::FramedRead;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use fleet_model::FleetStore;

use super::codec;
use super::codec::{MessageKind, SuntechLineCodec};
use crate::config::ListenerConfig;
use crate::error::Result;
use crate::protocols::{persist_report, ListenerStats};
use crate::registry::{ConnectionRegistry, DeviceConnection, SharedWriter};

/// Suntech protocol listener.
pub struct SuntechListener {
    config: ListenerConfig,
    registry: Arc<ConnectionRegistry>,
    store: Arc<dyn FleetStore>,
    stats: Arc<ListenerStats>,
}

impl SuntechListener {
    pub fn new(
        config: ListenerConfig,
        registry: Arc<ConnectionRegistry>,
        store: Arc<dyn FleetStore>,
    ) -> Self {
        Self {
            config,
            registry,
            store,
            stats: Arc::new(ListenerStats::default()),
        }
    }

    pub fn stats(&self) -> Arc<ListenerStats> {
        Arc::clone(&self.stats)
    }

    /// Accept loop over an already-bound listener. The caller binds (and so
    /// owns bind failures); tests bind port 0 to learn the ephemeral port.
    pub async fn serve(self, listener: TcpListener, shutdown: CancellationToken) -> Result<()> {
        info!(addr = %listener.local_addr()?, "Suntech listener started");
        let idle = self.config.idle_timeout();
        loop {
            tokio::select! {
                _ = shutdown.cancelled() => break,
                accepted = listener.accept() => {
                    match accepted {
                        Ok((socket, peer)) => {
                            self.stats.record_accept();
                            debug!(%peer, "Suntech connection accepted");
                            let registry = Arc::clone(&self.registry);
                            let store = Arc::clone(&self.store);
                            let stats = Arc::clone(&self.stats);
                            let shutdown = shutdown.child_token();
                            tokio::spawn(async move {
                                handle_device(socket, idle, registry, store, stats, shutdown)
                                    .await;
                            });
                        },
                        Err(err) => {
                            warn!(error = %err, "Suntech accept failed");
                        },
                    }
                }
            }
        }

        let snapshot = self.stats.snapshot();
        info!(
            connections = snapshot.connections_accepted,
            decoded = snapshot.frames_decoded,
            rejected = snapshot.frames_rejected,
            stored = snapshot.positions_stored,
            "Suntech listener stopped"
        );
        Ok(())
    }
}

/// Per-connection session state.
struct Session {
    device_id: Option<String>,
    conn_token: Option<u64>,
}

/// Per-connection handler; every exit path runs the cleanup at the bottom.
async fn handle_device(
    socket: TcpStream,
    idle: Option<Duration>,
    registry: Arc<ConnectionRegistry>,
    store: Arc<dyn FleetStore>,
    stats: Arc<ListenerStats>,
    shutdown: CancellationToken,
) {
    let peer = match socket.peer_addr() {
        Ok(peer) => peer,
        Err(err) => {
            warn!(error = %err, "Suntech socket lost before handling");
            return;
        },
    };

    let (read_half, write_half) = socket.into_split();
    let writer = SharedWriter::new(write_half);
    let mut lines = FramedRead::new(read_half, SuntechLineCodec);

    let mut session = Session {
        device_id: None,
        conn_token: None,
    };

    'read: loop {
        let item = tokio::select! {
            _ = shutdown.cancelled() => break 'read,
            item = read_next(&mut lines, idle) => match item {
                ReadOutcome::Message(item) => item,
                ReadOutcome::IdleTimeout => {
                    info!(%peer, device_id = ?session.device_id, "Suntech idle timeout, closing");
                    break 'read;
                },
            },
        };

        let message = match item {
            Some(Ok(message)) => message,
            Some(Err(err)) => {
                warn!(%peer, error = %err, "Suntech read failed");
                break 'read;
            },
            None => {
                debug!(%peer, "Suntech connection closed by device");
                break 'read;
            },
        };

        debug!(%peer, raw = %message, "Suntech message received");

        match codec::classify(&message) {
            MessageKind::Unknown => {
                stats.record_rejected();
                debug!(%peer, raw = %message, "unrecognized message, sending NAK");
                if writer.write(&codec::nak()).await.is_err() {
                    break 'read;
                }
            },
            MessageKind::Heartbeat => {
                if let Some(id) = codec::extract_device_id(&message) {
                    identify(&mut session, id, &writer, peer, &registry).await;
                }
                let reply_id = session.device_id.as_deref().unwrap_or(codec::UNKNOWN_DEVICE);
                debug!(device_id = %reply_id, "heartbeat");
                if writer.write(&codec::ack(reply_id)).await.is_err() {
                    break 'read;
                }
            },
            kind => {
                let Some(id) = codec::extract_device_id(&message)
                    .or_else(|| session.device_id.clone())
                else {
                    debug!(%peer, "position message without device id, dropped");
                    continue;
                };
                identify(&mut session, id.clone(), &writer, peer, &registry).await;

                if matches!(kind, MessageKind::Alert | MessageKind::Emergency) {
                    // Field 3 carries the alert/emergency mode code
                    let code = message.split(';').nth(3).unwrap_or("?");
                    info!(device_id = %id, code = %code, kind = ?kind, "device event received");
                }

                match codec::decode(&message) {
                    Some(report) => {
                        stats.record_decoded();
                        persist_report(&store, &stats, &id, &report, &message).await;
                        if writer.write(&codec::ack(&id)).await.is_err() {
                            break 'read;
                        }
                    },
                    None if kind == MessageKind::CommandEcho => {
                        // Echoes without a position payload still get an ACK
                        debug!(device_id = %id, raw = %message, "command echo without position");
                        if writer.write(&codec::ack(&id)).await.is_err() {
                            break 'read;
                        }
                    },
                    None => {
                        stats.record_rejected();
                        debug!(device_id = %id, raw = %message, "undecodable position message dropped");
                    },
                }
            },
        }
    }

    if let (Some(id), Some(token)) = (session.device_id.as_deref(), session.conn_token) {
        registry.unregister_conn(id, token).await;
    }
    writer.shutdown().await;
    debug!(%peer, "Suntech connection closed");
}

enum ReadOutcome {
    Message(Option<std::result::Result<String, crate::error::TrackSrvError>>),
    IdleTimeout,
}

async fn read_next(
    lines: &mut FramedRead<tokio::net::tcp::OwnedReadHalf, SuntechLineCodec>,
    idle: Option<Duration>,
) -> ReadOutcome {
    match idle {
        Some(limit) => match timeout(limit, lines.next()).await {
            Ok(item) => ReadOutcome::Message(item),
            Err(_) => ReadOutcome::IdleTimeout,
        },
        None => ReadOutcome::Message(lines.next().await),
    }
}

/// Bind this socket to a device id in the registry, once per identity.
///
/// A device that starts reporting under a different id (SIM swap mid
/// session) drops its old registration first so no stale binding lingers.
async fn identify(
    session: &mut Session,
    id: String,
    writer: &SharedWriter,
    peer: std::net::SocketAddr,
    registry: &Arc<ConnectionRegistry>,
) {
    if session.device_id.as_deref() == Some(id.as_str()) {
        return;
    }

    if let (Some(previous), Some(token)) = (session.device_id.as_deref(), session.conn_token) {
        registry.unregister_conn(previous, token).await;
    }

    info!(device_id = %id, %peer, "Suntech device identified");
    let conn = DeviceConnection::new(writer.clone(), peer);
    session.conn_token = Some(conn.token());
    if let Some(superseded) = registry.register(id.clone(), conn).await {
        debug!(device_id = %id, "closing superseded connection");
        superseded.close().await;
    }
    session.device_id = Some(id);
}

//! GT-06 TCP listener.
//!
//! Accepts tracker connections, runs one handler task per socket and drives
//! the login/position exchange. A handler's life is a small state machine:
//! unidentified until a login frame arrives, then registered in the
//! connection registry and streaming position frames until the socket dies.

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
use super::codec::Gt06FrameCodec;
use crate::config::ListenerConfig;
use crate::error::Result;
use crate::protocols::{persist_report, ListenerStats};
use crate::registry::{ConnectionRegistry, DeviceConnection, SharedWriter};

/// GT-06 protocol listener.
pub struct Gt06Listener {
    config: ListenerConfig,
    registry: Arc<ConnectionRegistry>,
    store: Arc<dyn FleetStore>,
    stats: Arc<ListenerStats>,
}

impl Gt06Listener {
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
        info!(addr = %listener.local_addr()?, "GT-06 listener started");
        let idle = self.config.idle_timeout();
        loop {
            tokio::select! {
                _ = shutdown.cancelled() => break,
                accepted = listener.accept() => {
                    match accepted {
                        Ok((socket, peer)) => {
                            self.stats.record_accept();
                            debug!(%peer, "GT-06 connection accepted");
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
                            warn!(error = %err, "GT-06 accept failed");
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
            "GT-06 listener stopped"
        );
        Ok(())
    }
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
            warn!(error = %err, "GT-06 socket lost before handling");
            return;
        },
    };

    let (read_half, write_half) = socket.into_split();
    let writer = SharedWriter::new(write_half);
    let mut frames = FramedRead::new(read_half, Gt06FrameCodec);

    let mut device_id: Option<String> = None;
    let mut conn_token: Option<u64> = None;

    loop {
        let item = tokio::select! {
            _ = shutdown.cancelled() => break,
            item = read_next(&mut frames, idle) => match item {
                Some(item) => item,
                None => {
                    info!(%peer, device_id = ?device_id, "GT-06 idle timeout, closing");
                    break;
                },
            },
        };

        let frame = match item {
            Some(Ok(frame)) => frame,
            Some(Err(err)) => {
                warn!(%peer, error = %err, "GT-06 read failed");
                break;
            },
            None => {
                debug!(%peer, "GT-06 connection closed by device");
                break;
            },
        };

        match codec::packet_type(&frame) {
            Some(codec::MSG_LOGIN) => match codec::decode_login(&frame) {
                Some(id) => {
                    info!(device_id = %id, %peer, "GT-06 device logged in");
                    let conn = DeviceConnection::new(writer.clone(), peer);
                    conn_token = Some(conn.token());
                    if let Some(superseded) = registry.register(id.clone(), conn).await {
                        debug!(device_id = %id, "closing superseded connection");
                        superseded.close().await;
                    }
                    device_id = Some(id);
                    if writer.write(&codec::login_ack()).await.is_err() {
                        break;
                    }
                },
                None => {
                    stats.record_rejected();
                    debug!(%peer, raw = %hex::encode_upper(&frame), "malformed login frame dropped");
                },
            },
            Some(kind @ (codec::MSG_POSITION | codec::MSG_STATUS)) => {
                // Positions before login carry no identity; ignore them
                let Some(id) = device_id.as_deref() else {
                    debug!(%peer, "position frame before login, ignored");
                    continue;
                };
                match codec::decode(&frame) {
                    Some(report) => {
                        stats.record_decoded();
                        persist_report(&store, &stats, id, &report, &hex::encode_upper(&frame))
                            .await;
                        let serial = frame[1];
                        if writer
                            .write(&codec::position_ack(kind, serial))
                            .await
                            .is_err()
                        {
                            break;
                        }
                    },
                    None => {
                        stats.record_rejected();
                        debug!(
                            device_id = %id,
                            raw = %hex::encode_upper(&frame),
                            "malformed position frame dropped"
                        );
                    },
                }
            },
            Some(other) => {
                debug!(%peer, packet_type = other, "unhandled GT-06 packet type");
            },
            None => {
                stats.record_rejected();
            },
        }
    }

    // Guaranteed cleanup: drop our registry entry (unless a re-login already
    // replaced it) and close the socket.
    if let (Some(id), Some(token)) = (device_id.as_deref(), conn_token) {
        registry.unregister_conn(id, token).await;
    }
    writer.shutdown().await;
    debug!(%peer, "GT-06 connection closed");
}

/// Next frame off the wire, bounded by the idle timeout when one is
/// configured. The outer `None` means the idle limit expired.
async fn read_next(
    frames: &mut FramedRead<tokio::net::tcp::OwnedReadHalf, Gt06FrameCodec>,
    idle: Option<Duration>,
) -> Option<Option<std::result::Result<bytes::BytesMut, crate::error::TrackSrvError>>> {
    match idle {
        Some(limit) => timeout(limit, frames.next()).await.ok(),
        None => Some(frames.next().await),
    }
}

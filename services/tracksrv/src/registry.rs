//! Live device connection registry.
//!
//! One registry instance is shared (via `Arc`) between both protocol
//! listeners and the command dispatcher - injected, never global. All
//! operations, including the socket write inside [`ConnectionRegistry::send`],
//! run under a single async mutex so a concurrent register/unregister/send
//! sequence can never observe a half-updated map.

use std::collections::HashMap;
use std::net::SocketAddr;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use tokio::io::AsyncWriteExt;
use tokio::net::tcp::OwnedWriteHalf;
use tokio::sync::Mutex;
use tracing::{debug, warn};

/// Monotonic token distinguishing connections that reuse a device id.
static NEXT_CONNECTION_TOKEN: AtomicU64 = AtomicU64::new(1);

/// Write handle shared between a connection's handler task (for protocol
/// ACKs) and the registry (for operator commands). The inner mutex keeps the
/// two write paths from interleaving mid-frame.
#[derive(Debug, Clone)]
pub struct SharedWriter {
    inner: Arc<Mutex<OwnedWriteHalf>>,
}

impl SharedWriter {
    pub fn new(half: OwnedWriteHalf) -> Self {
        Self {
            inner: Arc::new(Mutex::new(half)),
        }
    }

    /// Write a full payload, flushing before releasing the writer.
    pub async fn write(&self, payload: &[u8]) -> std::io::Result<()> {
        let mut writer = self.inner.lock().await;
        writer.write_all(payload).await?;
        writer.flush().await
    }

    /// Half-close the socket; errors on an already-dead socket are ignored.
    pub async fn shutdown(&self) {
        let mut writer = self.inner.lock().await;
        let _ = writer.shutdown().await;
    }
}

/// One live, identified device connection.
#[derive(Debug, Clone)]
pub struct DeviceConnection {
    writer: SharedWriter,
    peer: SocketAddr,
    token: u64,
}

impl DeviceConnection {
    pub fn new(writer: SharedWriter, peer: SocketAddr) -> Self {
        Self {
            writer,
            peer,
            token: NEXT_CONNECTION_TOKEN.fetch_add(1, Ordering::Relaxed),
        }
    }

    pub fn token(&self) -> u64 {
        self.token
    }

    pub fn peer(&self) -> SocketAddr {
        self.peer
    }

    async fn write(&self, payload: &[u8]) -> std::io::Result<()> {
        self.writer.write(payload).await
    }

    /// Shut the underlying socket down, waking its handler's read loop.
    pub async fn close(&self) {
        self.writer.shutdown().await;
    }
}

/// Concurrent map from hardware identifier to live connection.
#[derive(Debug, Default)]
pub struct ConnectionRegistry {
    connections: Mutex<HashMap<String, DeviceConnection>>,
}

impl ConnectionRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a connection under a device id, last writer wins.
    ///
    /// Returns the superseded connection when the id was already registered;
    /// closing it is the caller's responsibility (the listener owns that
    /// socket's lifecycle, not the registry).
    pub async fn register(
        &self,
        device_id: impl Into<String>,
        conn: DeviceConnection,
    ) -> Option<DeviceConnection> {
        let device_id = device_id.into();
        let mut connections = self.connections.lock().await;
        let previous = connections.insert(device_id.clone(), conn);
        debug!(
            device_id = %device_id,
            total = connections.len(),
            replaced = previous.is_some(),
            "device connection registered"
        );
        previous
    }

    /// Remove a device's registration unconditionally.
    pub async fn unregister(&self, device_id: &str) -> Option<DeviceConnection> {
        let mut connections = self.connections.lock().await;
        let removed = connections.remove(device_id);
        if removed.is_some() {
            debug!(device_id = %device_id, total = connections.len(), "device connection unregistered");
        }
        removed
    }

    /// Remove a registration only if it still belongs to the given
    /// connection token. Handler cleanup uses this so a handler whose entry
    /// was superseded by a re-login cannot evict its replacement.
    pub async fn unregister_conn(&self, device_id: &str, token: u64) -> bool {
        let mut connections = self.connections.lock().await;
        match connections.get(device_id) {
            Some(conn) if conn.token == token => {
                connections.remove(device_id);
                debug!(device_id = %device_id, total = connections.len(), "device connection unregistered");
                true
            },
            _ => false,
        }
    }

    /// Current connection for a device, if any.
    pub async fn get(&self, device_id: &str) -> Option<DeviceConnection> {
        self.connections.lock().await.get(device_id).cloned()
    }

    pub async fn is_connected(&self, device_id: &str) -> bool {
        self.connections.lock().await.contains_key(device_id)
    }

    pub async fn connected_count(&self) -> usize {
        self.connections.lock().await.len()
    }

    /// Write a payload to a device's live connection.
    ///
    /// Returns `false` - never an error - when the id is unknown or the
    /// write fails. A failed write evicts and closes the stale connection
    /// before returning, so callers need no cleanup logic of their own.
    pub async fn send(&self, device_id: &str, payload: &[u8]) -> bool {
        let mut connections = self.connections.lock().await;
        let result = match connections.get(device_id) {
            Some(conn) => conn.write(payload).await,
            None => return false,
        };
        match result {
            Ok(()) => true,
            Err(err) => {
                warn!(device_id = %device_id, error = %err, "send failed, evicting stale connection");
                if let Some(stale) = connections.remove(device_id) {
                    stale.close().await;
                }
                false
            },
        }
    }
}

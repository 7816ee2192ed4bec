//! Fan-out hub for realtime clients.
//!
//! The hub keeps the set of live connections, enriches every new reading
//! with its AQI, hands it to the persistence writer and broadcasts it. A
//! connection that fails a send is dropped; the others are unaffected.

mod connection;
mod message;

pub use self::connection::{ChannelConnection, Connection, ConnectionId};
pub use self::message::{HubMessage, NO_DATA_MESSAGE};

use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, RwLock};

use anyhow::{Result, anyhow};
use chrono::{DateTime, Utc};
use tokio::sync::{Mutex, mpsc};
use tokio::task::JoinSet;
use tokio::time::timeout;
use tracing::{debug, error, info, warn};

use crate::aqi::EnrichedReading;
use crate::config::HubConfig;
use crate::events::Subscription;
use crate::reading::CanonicalReading;
use crate::store::ReadingStore;

type ConnectionMap = HashMap<ConnectionId, Arc<dyn Connection>>;

pub struct Hub {
    connections: RwLock<ConnectionMap>,
    next_id: AtomicU64,
    /// Serializes initial snapshots against broadcasts so a new client's
    /// first message is always its snapshot.
    delivery: Mutex<()>,
    latest: RwLock<Option<EnrichedReading>>,
    store: Arc<dyn ReadingStore>,
    persist_tx: mpsc::UnboundedSender<EnrichedReading>,
    config: HubConfig,
}

impl Hub {
    /// Creates the hub and spawns its persistence writer. Must be called
    /// inside a tokio runtime.
    pub fn new(store: Arc<dyn ReadingStore>, config: HubConfig) -> Self {
        let (persist_tx, persist_rx) = mpsc::unbounded_channel();
        tokio::spawn(persist_readings(
            store.clone(),
            persist_rx,
            config.persist_timeout,
        ));

        Self {
            connections: RwLock::new(HashMap::new()),
            next_id: AtomicU64::new(1),
            delivery: Mutex::new(()),
            latest: RwLock::new(None),
            store,
            persist_tx,
            config,
        }
    }

    /// Registers a connection and sends it exactly one initial message:
    /// a snapshot of the latest reading, or `no_data`.
    ///
    /// The store is consulted before broadcasts are held back, so a slow
    /// store never delays delivery to other clients.
    pub async fn on_connect(&self, connection: Arc<dyn Connection>) -> ConnectionId {
        let id = ConnectionId(self.next_id.fetch_add(1, Ordering::Relaxed));
        let stored = match self.latest() {
            Some(_) => None,
            None => self.stored_snapshot().await,
        };

        let _delivery = self.delivery.lock().await;
        // A broadcast may have landed while the store was being read.
        let message = match self.latest().or(stored) {
            Some(data) => HubMessage::Snapshot { data },
            None => HubMessage::no_data(),
        };

        self.write_connections().insert(id, connection.clone());
        info!(
            connection = %id,
            active = self.connection_count(),
            "Client connected"
        );

        if let Err(e) = self.deliver(connection.as_ref(), &message).await {
            self.on_error(id, &e);
        }
        id
    }

    /// Removes a connection. Unknown or already removed ids are ignored.
    pub fn on_disconnect(&self, id: ConnectionId) -> bool {
        let removed = self.write_connections().remove(&id).is_some();
        if removed {
            info!(
                connection = %id,
                active = self.connection_count(),
                "Client disconnected"
            );
        }
        removed
    }

    /// Transport-level error on a connection; the connection is dropped.
    pub fn on_error(&self, id: ConnectionId, error: &anyhow::Error) -> bool {
        let removed = self.write_connections().remove(&id).is_some();
        if removed {
            warn!(connection = %id, error = %error, "Dropping connection after error");
        }
        removed
    }

    /// Enriches, persists and broadcasts a batch of new readings in order.
    pub async fn on_new_readings(&self, readings: Vec<CanonicalReading>) {
        let _delivery = self.delivery.lock().await;

        for reading in readings {
            let enriched = EnrichedReading::from_reading(reading);

            if self.persist_tx.send(enriched.clone()).is_err() {
                error!(timestamp = %enriched.timestamp(), "Persistence writer stopped; reading not stored");
            }
            self.remember(&enriched);

            let delivered = self.broadcast(&HubMessage::Update { data: enriched }).await;
            debug!(delivered, "Reading broadcast");
        }
    }

    /// Feeds every batch from a poller subscription into the hub until the
    /// poller side goes away.
    pub async fn run(&self, mut readings: Subscription<Vec<CanonicalReading>>) {
        while let Some(batch) = readings.recv().await {
            self.on_new_readings(batch).await;
        }
        debug!("Reading subscription closed");
    }

    pub fn connection_count(&self) -> usize {
        self.read_connections().len()
    }

    /// Latest reading this hub has seen from the poller.
    pub fn latest(&self) -> Option<EnrichedReading> {
        self.latest.read().ok().and_then(|latest| latest.clone())
    }

    pub fn last_update(&self) -> Option<DateTime<Utc>> {
        self.latest().map(|r| r.timestamp())
    }

    /// Latest stored reading for a snapshot; errors and timeouts count as none.
    async fn stored_snapshot(&self) -> Option<EnrichedReading> {
        match timeout(self.config.persist_timeout, self.store.latest()).await {
            Ok(Ok(reading)) => reading.map(EnrichedReading::from_reading),
            Ok(Err(e)) => {
                warn!(error = %e, "Store lookup for snapshot failed");
                None
            }
            Err(_) => {
                warn!(timeout = ?self.config.persist_timeout, "Store lookup for snapshot timed out");
                None
            }
        }
    }

    /// Sends to a copy of the connection set, concurrently. Failed
    /// connections are removed afterwards. Returns the number delivered.
    async fn broadcast(&self, message: &HubMessage) -> usize {
        let targets: Vec<(ConnectionId, Arc<dyn Connection>)> = self
            .read_connections()
            .iter()
            .map(|(id, conn)| (*id, conn.clone()))
            .collect();

        let mut sends = JoinSet::new();
        for (id, connection) in targets {
            let message = message.clone();
            let send_timeout = self.config.send_timeout;
            sends.spawn(async move {
                let result = match timeout(send_timeout, connection.send(&message)).await {
                    Ok(result) => result,
                    Err(_) => Err(anyhow!("send timed out after {send_timeout:?}")),
                };
                (id, result)
            });
        }

        let mut delivered = 0;
        while let Some(joined) = sends.join_next().await {
            match joined {
                Ok((_, Ok(()))) => delivered += 1,
                Ok((id, Err(e))) => {
                    self.on_error(id, &e);
                }
                Err(e) => error!(error = %e, "Send task failed"),
            }
        }
        delivered
    }

    async fn deliver(&self, connection: &dyn Connection, message: &HubMessage) -> Result<()> {
        match timeout(self.config.send_timeout, connection.send(message)).await {
            Ok(result) => result,
            Err(_) => Err(anyhow!("send timed out after {:?}", self.config.send_timeout)),
        }
    }

    fn remember(&self, reading: &EnrichedReading) {
        if let Ok(mut latest) = self.latest.write() {
            let newer = latest
                .as_ref()
                .is_none_or(|current| reading.timestamp() >= current.timestamp());
            if newer {
                *latest = Some(reading.clone());
            }
        }
    }

    fn read_connections(&self) -> std::sync::RwLockReadGuard<'_, ConnectionMap> {
        self.connections.read().unwrap_or_else(|e| e.into_inner())
    }

    fn write_connections(&self) -> std::sync::RwLockWriteGuard<'_, ConnectionMap> {
        self.connections.write().unwrap_or_else(|e| e.into_inner())
    }
}

/// Writes readings to the store one at a time. Failures are logged and the
/// reading is skipped; broadcasting never waits on this task.
async fn persist_readings(
    store: Arc<dyn ReadingStore>,
    mut rx: mpsc::UnboundedReceiver<EnrichedReading>,
    persist_timeout: std::time::Duration,
) {
    while let Some(reading) = rx.recv().await {
        match timeout(persist_timeout, store.append(&reading)).await {
            Ok(Ok(())) => debug!(timestamp = %reading.timestamp(), "Reading persisted"),
            Ok(Err(e)) => {
                error!(timestamp = %reading.timestamp(), error = %format!("{e:#}"), "Failed to persist reading")
            }
            Err(_) => {
                error!(timestamp = %reading.timestamp(), timeout = ?persist_timeout, "Persisting reading timed out")
            }
        }
    }
}

//! Wires a poller to a hub and reports combined status.

use std::sync::{Arc, Mutex};

use chrono::{DateTime, Utc};
use serde::Serialize;
use tokio::task::JoinHandle;
use tracing::{error, info};

use crate::hub::{Connection, ConnectionId, Hub};
use crate::poller::Poller;

/// Status exposed to operators and transports.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ConnectionStatus {
    pub active: bool,
    pub last_update_timestamp: Option<DateTime<Utc>>,
    pub active_connection_count: usize,
}

pub struct Pipeline {
    poller: Poller,
    hub: Arc<Hub>,
    tasks: Mutex<Vec<JoinHandle<()>>>,
}

impl Pipeline {
    pub fn new(poller: Poller, hub: Arc<Hub>) -> Self {
        Self {
            poller,
            hub,
            tasks: Mutex::new(Vec::new()),
        }
    }

    pub fn poller(&self) -> &Poller {
        &self.poller
    }

    pub fn hub(&self) -> &Arc<Hub> {
        &self.hub
    }

    /// Subscribes the hub to the poller and starts monitoring. Also
    /// restarts monitoring after the poller gave up; does nothing while
    /// the poller is running.
    pub fn start(&self) {
        if self.poller.is_running() {
            info!("Pipeline is already running");
            return;
        }

        let mut tasks = self.lock_tasks();
        tasks.retain(|t| !t.is_finished());
        if tasks.is_empty() {
            // Subscribe before starting so the baseline emission is not missed.
            let readings = self.poller.subscribe_readings();
            let hub = Arc::clone(&self.hub);
            tasks.push(tokio::spawn(async move { hub.run(readings).await }));

            let mut errors = self.poller.subscribe_errors();
            tasks.push(tokio::spawn(async move {
                while let Some(err) = errors.recv().await {
                    error!(error = %err, "Poller stopped");
                }
            }));
        }
        drop(tasks);

        self.poller.start_monitoring();
        info!("Pipeline started");
    }

    /// Stops monitoring and detaches the hub from the poller.
    pub fn stop(&self) {
        self.poller.stop_monitoring();
        for task in self.lock_tasks().drain(..) {
            task.abort();
        }
        info!("Pipeline stopped");
    }

    pub async fn connect(&self, connection: Arc<dyn Connection>) -> ConnectionId {
        self.hub.on_connect(connection).await
    }

    pub fn disconnect(&self, id: ConnectionId) -> bool {
        self.hub.on_disconnect(id)
    }

    pub fn status(&self) -> ConnectionStatus {
        ConnectionStatus {
            active: self.poller.is_running(),
            last_update_timestamp: self.hub.last_update(),
            active_connection_count: self.hub.connection_count(),
        }
    }

    fn lock_tasks(&self) -> std::sync::MutexGuard<'_, Vec<JoinHandle<()>>> {
        self.tasks.lock().expect("pipeline task lock poisoned")
    }
}

impl Drop for Pipeline {
    fn drop(&mut self) {
        self.stop();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::{HubConfig, PollerConfig};
    use crate::fetch::FileSource;
    use crate::store::MemoryStore;
    use std::time::Duration;

    #[tokio::test]
    async fn test_status_before_start() {
        let source = Arc::new(FileSource::new("/nonexistent/air_quality_monitor.json"));
        let poller = Poller::new(source, PollerConfig::default());
        let hub = Arc::new(Hub::new(Arc::new(MemoryStore::new()), HubConfig::default()));
        let pipeline = Pipeline::new(poller, hub);

        let status = pipeline.status();
        assert!(!status.active);
        assert_eq!(status.last_update_timestamp, None);
        assert_eq!(status.active_connection_count, 0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_start_stop_toggles_active() {
        let source = Arc::new(FileSource::new("/nonexistent/air_quality_monitor.json"));
        let config = PollerConfig {
            poll_interval: Duration::from_secs(1),
            max_retries: 0,
            ..Default::default()
        };
        let pipeline = Pipeline::new(
            Poller::new(source, config),
            Arc::new(Hub::new(Arc::new(MemoryStore::new()), HubConfig::default())),
        );

        pipeline.start();
        pipeline.start();
        assert!(pipeline.status().active);

        pipeline.stop();
        assert!(!pipeline.status().active);
    }

    #[tokio::test]
    async fn test_start_restarts_after_retries_exhausted() {
        let source = Arc::new(FileSource::new("/nonexistent/air_quality_monitor_restart.json"));
        let config = PollerConfig {
            poll_interval: Duration::from_millis(10),
            max_retries: 2,
            ..Default::default()
        };
        let pipeline = Pipeline::new(
            Poller::new(source, config),
            Arc::new(Hub::new(Arc::new(MemoryStore::new()), HubConfig::default())),
        );
        let mut fatal = pipeline.poller().subscribe_errors();

        pipeline.start();
        tokio::time::timeout(Duration::from_secs(5), fatal.recv())
            .await
            .expect("poller never gave up")
            .unwrap();
        assert!(!pipeline.status().active);

        pipeline.start();
        assert!(pipeline.status().active);
        pipeline.stop();
    }

    #[test]
    fn test_status_serializes() {
        let status = ConnectionStatus {
            active: true,
            last_update_timestamp: None,
            active_connection_count: 2,
        };
        let json = serde_json::to_value(&status).unwrap();
        assert_eq!(json["active"], true);
        assert_eq!(json["active_connection_count"], 2);
        assert!(json["last_update_timestamp"].is_null());
    }
}

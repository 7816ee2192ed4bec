//! Change-detection poller.
//!
//! Periodically fetches the sensor object, keeps only readings newer than
//! the last one it emitted, and publishes them to subscribers. All state
//! lives behind one async mutex that each fetch cycle holds from start to
//! finish, so cycles never overlap.

pub mod state;

use std::hash::{DefaultHasher, Hash, Hasher};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use anyhow::{Result, anyhow};
use bytes::Bytes;
use chrono::{DateTime, Utc};
use serde::Serialize;
use thiserror::Error;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;
use tracing::{debug, error, info, warn};

use crate::config::{EmitMode, PollerConfig};
use crate::events::{EventBus, Subscription};
use crate::fetch::{FetchOutcome, ObjectSource};
use crate::normalize::{normalize, parse_timestamp};
use crate::parser::parse_payload;
use crate::reading::CanonicalReading;

pub use state::{FailureOutcome, Phase, PollerState};

/// Fatal poller conditions, delivered to error subscribers.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum PollerError {
    #[error("poller stopped after {failures} failed fetches (last error: {last_error})")]
    RetriesExhausted { failures: u32, last_error: String },
}

/// Point-in-time view of the poller.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct PollerStatus {
    pub active: bool,
    pub phase: Phase,
    pub last_seen: Option<DateTime<Utc>>,
    pub last_success: Option<DateTime<Utc>>,
    pub consecutive_errors: u32,
    pub total_failures: u32,
}

/// Shortest accepted poll interval; `tokio::time::interval` rejects zero.
pub const MIN_POLL_INTERVAL: Duration = Duration::from_millis(1);

struct Cycle {
    readings: Option<Vec<CanonicalReading>>,
    succeeded: bool,
    stopped: bool,
}

struct Inner {
    source: Arc<dyn ObjectSource>,
    config: PollerConfig,
    state: tokio::sync::Mutex<PollerState>,
    readings: EventBus<Vec<CanonicalReading>>,
    errors: EventBus<PollerError>,
    status: watch::Sender<PollerStatus>,
    task: Mutex<Option<JoinHandle<()>>>,
    /// Bumped by every start and stop; a loop exits once its generation is stale.
    generation: AtomicU64,
}

/// Cheaply cloneable handle to a poller.
#[derive(Clone)]
pub struct Poller {
    inner: Arc<Inner>,
}

fn fingerprint(body: &Bytes) -> u64 {
    let mut hasher = DefaultHasher::new();
    body.hash(&mut hasher);
    hasher.finish()
}

impl Poller {
    pub fn new(source: Arc<dyn ObjectSource>, mut config: PollerConfig) -> Self {
        if config.poll_interval < MIN_POLL_INTERVAL {
            warn!(
                requested = ?config.poll_interval,
                using = ?MIN_POLL_INTERVAL,
                "Poll interval too short, clamping"
            );
            config.poll_interval = MIN_POLL_INTERVAL;
        }
        let (status, _) = watch::channel(PollerStatus::default());
        Self {
            inner: Arc::new(Inner {
                source,
                config,
                state: tokio::sync::Mutex::new(PollerState::default()),
                readings: EventBus::new(),
                errors: EventBus::new(),
                status,
                task: Mutex::new(None),
                generation: AtomicU64::new(0),
            }),
        }
    }

    pub fn config(&self) -> &PollerConfig {
        &self.inner.config
    }

    /// Fetches the source once and returns readings newer than the watermark.
    ///
    /// Returns `None` when the fetch fails or nothing is new. Failures feed
    /// the same error counters as timer-driven cycles.
    ///
    /// The watermark advances but reading subscribers are not notified, so
    /// readings returned here never reach the hub. Callers that want them
    /// broadcast must hand them on themselves.
    pub async fn fetch_latest(&self) -> Option<Vec<CanonicalReading>> {
        self.inner.cycle(self.inner.config.emit_mode).await.readings
    }

    /// Starts timer-driven polling. A no-op if already running.
    ///
    /// The first cycle runs immediately and establishes the baseline; it
    /// only emits the newest record so a restart does not replay the whole
    /// object. Must be called from within a Tokio runtime.
    pub fn start_monitoring(&self) {
        let mut task = self.inner.lock_task();
        if task.as_ref().is_some_and(|h| !h.is_finished()) {
            info!("Monitoring is already running");
            return;
        }

        let generation = self.inner.generation.fetch_add(1, Ordering::SeqCst) + 1;
        info!(
            source = %self.inner.source.describe(),
            interval_ms = self.inner.config.poll_interval.as_millis() as u64,
            "Starting real-time monitoring"
        );
        let inner = Arc::clone(&self.inner);
        *task = Some(tokio::spawn(async move { inner.run(generation).await }));
        drop(task);
        self.inner.refresh_status(None);
    }

    /// Stops polling. No further cycle starts once this returns.
    pub fn stop_monitoring(&self) {
        self.inner.generation.fetch_add(1, Ordering::SeqCst);
        let handle = self.inner.lock_task().take();
        if let Some(handle) = handle {
            handle.abort();
            info!("Monitoring stopped");
        }
        self.inner.refresh_status(None);
    }

    pub fn is_running(&self) -> bool {
        self.inner.is_running()
    }

    /// Subscribes to batches of new readings emitted by the polling loop.
    pub fn subscribe_readings(&self) -> Subscription<Vec<CanonicalReading>> {
        self.inner.readings.subscribe()
    }

    /// Subscribes to fatal poller errors.
    pub fn subscribe_errors(&self) -> Subscription<PollerError> {
        self.inner.errors.subscribe()
    }

    pub fn status(&self) -> PollerStatus {
        let mut status = self.inner.status.borrow().clone();
        status.active = self.is_running();
        status
    }

    /// Current watermark.
    pub async fn last_seen(&self) -> Option<DateTime<Utc>> {
        self.inner.state.lock().await.last_seen
    }
}

impl Inner {
    fn lock_task(&self) -> std::sync::MutexGuard<'_, Option<JoinHandle<()>>> {
        self.task.lock().expect("poller task lock poisoned")
    }

    fn is_running(&self) -> bool {
        self.lock_task().as_ref().is_some_and(|h| !h.is_finished())
    }

    fn is_current(&self, generation: u64) -> bool {
        self.generation.load(Ordering::SeqCst) == generation
    }

    async fn run(self: Arc<Self>, generation: u64) {
        self.state.lock().await.restart();

        let mut interval = tokio::time::interval(self.config.poll_interval);
        interval.set_missed_tick_behavior(MissedTickBehavior::Delay);
        let mut mode = EmitMode::LatestOnly;

        loop {
            interval.tick().await;
            if !self.is_current(generation) {
                break;
            }

            let cycle = self.cycle(mode).await;
            // Stay on the baseline until one cycle has actually read the source.
            if cycle.succeeded {
                mode = self.config.emit_mode;
            }

            if let Some(readings) = cycle.readings {
                if self.is_current(generation) {
                    let delivered = self.readings.publish(&readings);
                    debug!(count = readings.len(), subscribers = delivered, "Readings published");
                }
            }

            if cycle.stopped {
                break;
            }
        }
    }

    #[tracing::instrument(skip(self), fields(source = %self.source.describe()))]
    async fn cycle(&self, mode: EmitMode) -> Cycle {
        let mut state = self.state.lock().await;
        state.begin_cycle();

        let fetched = tokio::time::timeout(
            self.config.fetch_timeout,
            self.source.fetch(&state.validators),
        )
        .await;

        let outcome = match fetched {
            Ok(Ok(outcome)) => self.process(&mut state, outcome, mode),
            Ok(Err(e)) => Err(e),
            Err(_) => Err(anyhow!(
                "fetch timed out after {} ms",
                self.config.fetch_timeout.as_millis()
            )),
        };

        let mut stopped = false;
        let succeeded = outcome.is_ok();
        let readings = match outcome {
            Ok(readings) => {
                state.record_success();
                self.refresh_status(Some((&state, true)));
                readings
            }
            Err(e) => {
                stopped = self.handle_failure(&mut state, e);
                self.refresh_status(Some((&state, false)));
                None
            }
        };

        Cycle {
            readings,
            succeeded,
            stopped,
        }
    }

    fn process(
        &self,
        state: &mut PollerState,
        outcome: FetchOutcome,
        mode: EmitMode,
    ) -> Result<Option<Vec<CanonicalReading>>> {
        let (body, validators) = match outcome {
            FetchOutcome::NotModified => {
                debug!("Source reports no change");
                return Ok(None);
            }
            FetchOutcome::Fetched { body, validators } => (body, validators),
        };

        let print = fingerprint(&body);
        if state.body_fingerprint == Some(print) {
            debug!(bytes = body.len(), "Source content unchanged");
            state.validators = validators;
            return Ok(None);
        }

        let payload = parse_payload(&body)?;
        if payload.malformed > 0 {
            warn!(malformed = payload.malformed, kept = payload.records.len(), "Dropped malformed records");
        }

        let mut readings = Vec::with_capacity(payload.records.len());
        for raw in &payload.records {
            // Records without a usable timestamp cannot be ordered against
            // the watermark.
            if raw.timestamp_str().and_then(parse_timestamp).is_none() {
                warn!(
                    timestamp = raw.timestamp_str().unwrap_or("<missing>"),
                    "Dropping record with unusable timestamp"
                );
                continue;
            }
            readings.push(normalize(raw));
        }

        state.validators = validators;
        state.body_fingerprint = Some(print);

        let previous = state.last_seen;
        let fresh = state.select_new(readings, mode);
        match &fresh {
            Some(fresh) => info!(
                count = fresh.len(),
                previous = ?previous,
                latest = ?state.last_seen,
                "New readings detected"
            ),
            None => debug!(records = payload.records.len(), "No new readings"),
        }
        Ok(fresh)
    }

    /// Returns `true` when the failure stopped the poller.
    fn handle_failure(&self, state: &mut PollerState, err: anyhow::Error) -> bool {
        let outcome = state.record_failure(&self.config);
        warn!(
            error = %err,
            consecutive_errors = state.consecutive_errors,
            total_failures = state.total_failures,
            "Fetch failed"
        );

        match outcome {
            FailureOutcome::Retry => false,
            FailureOutcome::BaselineReset => {
                warn!(
                    threshold = self.config.max_consecutive_errors,
                    "Too many consecutive errors, resetting baseline"
                );
                false
            }
            FailureOutcome::Exhausted => {
                error!(failures = state.total_failures, "Max retries reached, stopping monitoring");
                self.generation.fetch_add(1, Ordering::SeqCst);
                if let Some(handle) = self.lock_task().take() {
                    handle.abort();
                }
                self.errors.publish(&PollerError::RetriesExhausted {
                    failures: state.total_failures,
                    last_error: format!("{err:#}"),
                });
                true
            }
        }
    }

    fn refresh_status(&self, cycle: Option<(&PollerState, bool)>) {
        let active = self.is_running();
        self.status.send_modify(|status| {
            status.active = active;
            if let Some((state, success)) = cycle {
                status.phase = state.phase;
                status.last_seen = state.last_seen;
                status.consecutive_errors = state.consecutive_errors;
                status.total_failures = state.total_failures;
                if success {
                    status.last_success = Some(Utc::now());
                }
            }
        });
    }
}

//! Runtime configuration for the pipeline components.

use std::time::Duration;

/// Which new records a fetch cycle hands to subscribers.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, clap::ValueEnum)]
pub enum EmitMode {
    /// Every record newer than the watermark, oldest first.
    #[default]
    All,
    /// Only the newest record.
    LatestOnly,
}

/// Poller configuration.
#[derive(Debug, Clone)]
pub struct PollerConfig {
    /// Delay between fetch cycles (default: 5 s)
    pub poll_interval: Duration,
    /// Upper bound for a single fetch, including the body download (default: 10 s)
    pub fetch_timeout: Duration,
    /// Consecutive failures that trigger a baseline reset (default: 3)
    pub max_consecutive_errors: u32,
    /// Total failures since start before the poller stops; 0 = never stop (default: 5)
    pub max_retries: u32,
    pub emit_mode: EmitMode,
}

impl Default for PollerConfig {
    fn default() -> Self {
        Self {
            poll_interval: Duration::from_secs(5),
            fetch_timeout: Duration::from_secs(10),
            max_consecutive_errors: 3,
            max_retries: 5,
            emit_mode: EmitMode::All,
        }
    }
}

/// Fan-out hub configuration.
#[derive(Debug, Clone)]
pub struct HubConfig {
    /// Upper bound for delivering one message to one connection (default: 5 s)
    pub send_timeout: Duration,
    /// Upper bound for a single store call (default: 10 s)
    pub persist_timeout: Duration,
}

impl Default for HubConfig {
    fn default() -> Self {
        Self {
            send_timeout: Duration::from_secs(5),
            persist_timeout: Duration::from_secs(10),
        }
    }
}

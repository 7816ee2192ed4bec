//! Persistence gateway for reading history.
//!
//! [`ReadingStore`] is what the hub writes every enriched reading to and
//! what it asks for the latest reading when no live one is known.

mod csv_file;
mod memory;
mod s3;

pub use self::csv_file::{CsvStore, HistoryRow};
pub use self::memory::MemoryStore;
pub use self::s3::S3Store;

use anyhow::Result;
use async_trait::async_trait;

use crate::aqi::EnrichedReading;
use crate::reading::CanonicalReading;

#[async_trait]
pub trait ReadingStore: Send + Sync {
    /// Appends one reading to history.
    async fn append(&self, reading: &EnrichedReading) -> Result<()>;

    /// Most recent stored reading by timestamp, if any.
    async fn latest(&self) -> Result<Option<CanonicalReading>>;
}

use std::path::PathBuf;

use anyhow::{Context, Result};
use async_trait::async_trait;
use bytes::Bytes;

use super::{FetchOutcome, ObjectSource, Validators};

/// Reads the sensor object from a local file, useful for replaying captures.
///
/// Files carry no validators; unchanged content is detected by the poller's
/// body comparison instead.
pub struct FileSource {
    path: PathBuf,
}

impl FileSource {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }
}

#[async_trait]
impl ObjectSource for FileSource {
    async fn fetch(&self, _validators: &Validators) -> Result<FetchOutcome> {
        let body = tokio::fs::read(&self.path)
            .await
            .with_context(|| format!("Failed to read {}", self.path.display()))?;
        Ok(FetchOutcome::Fetched {
            body: Bytes::from(body),
            validators: Validators::default(),
        })
    }

    fn describe(&self) -> String {
        self.path.display().to_string()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::env;
    use std::fs;

    #[tokio::test]
    async fn test_file_source_reads_content() {
        let path = env::temp_dir().join("air_quality_monitor_file_source.ndjson");
        fs::write(&path, b"{\"timestamp\":\"01/01/2025 00:00:00\"}\n").unwrap();

        let source = FileSource::new(&path);
        match source.fetch(&Validators::default()).await.unwrap() {
            FetchOutcome::Fetched { body, validators } => {
                assert!(body.starts_with(b"{\"timestamp\""));
                assert!(validators.is_empty());
            }
            FetchOutcome::NotModified => panic!("file sources never report NotModified"),
        }

        fs::remove_file(&path).unwrap();
    }

    #[tokio::test]
    async fn test_file_source_missing_file_errors() {
        let source = FileSource::new("/definitely/not/here.json");
        assert!(source.fetch(&Validators::default()).await.is_err());
        assert_eq!(source.describe(), "/definitely/not/here.json");
    }
}

//! Parser for the sensor data object stored in the bucket.
//!
//! The gateway has written the object both as a single JSON document and as
//! newline-delimited JSON, optionally gzip-compressed. All three are accepted.

use std::borrow::Cow;
use std::io::Read;

use anyhow::{Context, Result, bail};
use flate2::read::GzDecoder;
use serde_json::Value;
use tracing::{debug, warn};

use crate::reading::RawReading;

const GZIP_MAGIC: [u8; 2] = [0x1f, 0x8b];

/// Layout the payload was recognised as.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PayloadFormat {
    Empty,
    JsonArray,
    JsonObject,
    Ndjson,
}

/// Records recovered from one payload, plus a count of the ones dropped.
#[derive(Debug, Clone, PartialEq)]
pub struct ParsedPayload {
    pub format: PayloadFormat,
    pub records: Vec<RawReading>,
    pub malformed: usize,
}

/// Transparently gunzips `bytes` when they carry the gzip magic number.
pub fn decode_body(bytes: &[u8]) -> Result<Cow<'_, [u8]>> {
    if bytes.starts_with(&GZIP_MAGIC) {
        let mut out = Vec::new();
        GzDecoder::new(bytes)
            .read_to_end(&mut out)
            .context("Failed to gunzip payload")?;
        debug!(compressed = bytes.len(), decompressed = out.len(), "Payload gunzipped");
        return Ok(Cow::Owned(out));
    }
    Ok(Cow::Borrowed(bytes))
}

/// Splits a JSON value into records; returns how many elements were not objects.
fn collect_records(value: Value, records: &mut Vec<RawReading>) -> usize {
    match value {
        Value::Object(map) => {
            records.push(RawReading(map));
            0
        }
        Value::Array(items) => items
            .into_iter()
            .map(|item| match item {
                Value::Object(map) => {
                    records.push(RawReading(map));
                    0
                }
                _ => 1,
            })
            .sum(),
        _ => 1,
    }
}

fn parse_ndjson(text: &str) -> ParsedPayload {
    let mut records = Vec::new();
    let mut malformed = 0;

    for (index, line) in text.lines().enumerate() {
        let line = line.trim();
        if line.is_empty() {
            continue;
        }
        match serde_json::from_str::<Value>(line) {
            Ok(value) => {
                let dropped = collect_records(value, &mut records);
                if dropped > 0 {
                    warn!(line = index + 1, dropped, "NDJSON line held non-object values");
                }
                malformed += dropped;
            }
            Err(e) => {
                warn!(line = index + 1, error = %e, "Failed to parse NDJSON line");
                malformed += 1;
            }
        }
    }

    ParsedPayload {
        format: PayloadFormat::Ndjson,
        records,
        malformed,
    }
}

/// Parses a bucket object into raw records.
///
/// Malformed NDJSON lines are dropped and counted; their siblings are kept.
///
/// # Errors
///
/// Returns an error if the body is not UTF-8 (after gunzip) or if not a
/// single record could be recovered from a non-empty body.
pub fn parse_payload(bytes: &[u8]) -> Result<ParsedPayload> {
    let body = decode_body(bytes)?;
    let text = std::str::from_utf8(&body).context("Payload is not valid UTF-8")?;
    let trimmed = text.trim();

    if trimmed.is_empty() {
        return Ok(ParsedPayload {
            format: PayloadFormat::Empty,
            records: Vec::new(),
            malformed: 0,
        });
    }

    if trimmed.starts_with('[') || trimmed.starts_with('{') {
        // NDJSON also starts with '{', so a failed whole-document parse falls
        // through to line-by-line parsing.
        if let Ok(value) = serde_json::from_str::<Value>(trimmed) {
            let format = if value.is_array() {
                PayloadFormat::JsonArray
            } else {
                PayloadFormat::JsonObject
            };
            let mut records = Vec::new();
            let malformed = collect_records(value, &mut records);
            debug!(?format, records = records.len(), malformed, "Payload parsed");
            return Ok(ParsedPayload {
                format,
                records,
                malformed,
            });
        }
    }

    let parsed = parse_ndjson(text);
    if parsed.records.is_empty() && parsed.malformed > 0 {
        bail!(
            "No parseable records in payload ({} malformed lines)",
            parsed.malformed
        );
    }
    debug!(
        records = parsed.records.len(),
        malformed = parsed.malformed,
        "NDJSON payload parsed"
    );
    Ok(parsed)
}

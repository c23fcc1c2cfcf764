//! Streaming line decoder.
//!
//! Payloads are line-delimited; each non-empty line is a base64 blob whose
//! decoded bytes are gzip-compressed, whose inflated content is a JSON
//! `ScanBundle`. Malformed lines are counted and skipped; the object keeps
//! processing. A cumulative inflated-byte cap defeats decompression bombs.

use std::io::Read;

use base64::engine::general_purpose::STANDARD as BASE64;
use base64::Engine as _;
use flate2::read::GzDecoder;
use tokio::io::{AsyncBufRead, AsyncBufReadExt};

use crate::model::ScanBundle;
use crate::observability::metrics;

#[derive(Debug, thiserror::Error)]
pub enum DecodeError {
    #[error("declared object size {0} exceeds configured maximum {1}")]
    PayloadTooLarge(u64, u64),
    #[error("cumulative inflated size exceeded {0} bytes; possible decompression bomb")]
    InflationBombSuspected(u64),
    #[error(transparent)]
    Io(#[from] std::io::Error),
}

/// Per-object decode counters, surfaced to the Ingestor for logging/metrics.
#[derive(Debug, Default, Clone)]
pub struct DecodeStats {
    pub lines_total: u64,
    pub lines_skipped_base64: u64,
    pub lines_skipped_gzip: u64,
    pub lines_skipped_parse: u64,
    pub lines_skipped_utf8: u64,
    pub bundles_emitted: u64,
    pub inflated_bytes: u64,
}

pub struct Decoder {
    max_inflated_bytes: u64,
}

impl Decoder {
    pub const fn new(max_inflated_bytes: u64) -> Self {
        Self { max_inflated_bytes }
    }

    /// Rejects upfront if the declared object size exceeds the configured cap.
    pub fn check_object_size(&self, declared_size: u64, max_object_bytes: u64) -> Result<(), DecodeError> {
        if declared_size > max_object_bytes {
            return Err(DecodeError::PayloadTooLarge(declared_size, max_object_bytes));
        }
        Ok(())
    }

    /// Decodes a line-delimited, base64(gzip(json)) stream, invoking
    /// `on_bundle` for each successfully decoded `ScanBundle` as soon as it is
    /// available, so the full object is never materialized in memory.
    ///
    /// Returns `Err` only for a fatal, object-wide condition (a suspected
    /// decompression bomb, or an I/O failure on the underlying stream);
    /// per-line malformed base64/gzip/JSON/UTF-8 are counted in `stats` and
    /// the line is skipped.
    pub async fn decode_lines<R, F>(
        &self,
        mut reader: R,
        stats: &mut DecodeStats,
        mut on_bundle: F,
    ) -> Result<(), DecodeError>
    where
        R: AsyncBufRead + Unpin,
        F: FnMut(ScanBundle),
    {
        let mut line = String::new();
        loop {
            line.clear();
            let n = reader.read_line(&mut line).await?;
            if n == 0 {
                break;
            }
            let trimmed = line.trim_end_matches(['\n', '\r']);
            if trimmed.is_empty() {
                continue;
            }
            stats.lines_total += 1;

            let gz_bytes = match BASE64.decode(trimmed.as_bytes()) {
                Ok(bytes) => bytes,
                Err(e) => {
                    stats.lines_skipped_base64 += 1;
                    metrics::parse_error("base64");
                    tracing::debug!(error = %e, "skipping line: malformed base64");
                    continue;
                }
            };

            let inflated = match self.inflate_bounded(&gz_bytes, stats) {
                Ok(bytes) => bytes,
                Err(DecodeError::InflationBombSuspected(limit)) => {
                    return Err(DecodeError::InflationBombSuspected(limit));
                }
                Err(e) => {
                    stats.lines_skipped_gzip += 1;
                    metrics::parse_error("gzip");
                    tracing::debug!(error = %e, "skipping line: malformed gzip");
                    continue;
                }
            };

            let text = match std::str::from_utf8(&inflated) {
                Ok(t) => t,
                Err(e) => {
                    stats.lines_skipped_utf8 += 1;
                    metrics::parse_error("utf8");
                    tracing::debug!(error = %e, "skipping line: invalid utf-8");
                    continue;
                }
            };

            match serde_json::from_str::<ScanBundle>(text) {
                Ok(bundle) => {
                    stats.bundles_emitted += 1;
                    on_bundle(bundle);
                }
                Err(e) => {
                    stats.lines_skipped_parse += 1;
                    metrics::parse_error("json");
                    tracing::debug!(error = %e, "skipping line: malformed json");
                }
            }
        }
        Ok(())
    }

    /// Inflates `gz_bytes`, tracking the cumulative inflated total across the
    /// whole object in `stats.inflated_bytes` and bailing out the moment it
    /// would exceed `max_inflated_bytes` — regardless of how much of this
    /// single line remains unread.
    fn inflate_bounded(&self, gz_bytes: &[u8], stats: &mut DecodeStats) -> Result<Vec<u8>, DecodeError> {
        let mut decoder = GzDecoder::new(gz_bytes);
        let mut out = Vec::new();
        let mut chunk = [0u8; 8192];
        loop {
            let n = decoder.read(&mut chunk)?;
            if n == 0 {
                break;
            }
            out.extend_from_slice(&chunk[..n]);
            stats.inflated_bytes += n as u64;
            if stats.inflated_bytes > self.max_inflated_bytes {
                return Err(DecodeError::InflationBombSuspected(self.max_inflated_bytes));
            }
        }
        Ok(out)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    fn gzip_b64(json: &str) -> String {
        let mut enc = flate2::write::GzEncoder::new(Vec::new(), flate2::Compression::default());
        enc.write_all(json.as_bytes()).unwrap();
        let gz = enc.finish().unwrap();
        BASE64.encode(gz)
    }

    #[tokio::test]
    async fn decodes_valid_lines_and_skips_bad_ones() {
        let good = gzip_b64(r#"{"osVersion":"14","connectedEvents":[],"scanResults":[]}"#);
        let body = format!("{good}\nnot-base64!!!\n{good}\n");
        let decoder = Decoder::new(10_000_000);
        let mut stats = DecodeStats::default();
        let mut bundles = Vec::new();
        decoder
            .decode_lines(body.as_bytes(), &mut stats, |b| bundles.push(b))
            .await
            .unwrap();
        assert_eq!(bundles.len(), 2);
        assert_eq!(stats.lines_total, 3);
        assert_eq!(stats.lines_skipped_base64, 1);
    }

    #[tokio::test]
    async fn rejects_declared_size_over_cap() {
        let decoder = Decoder::new(10_000_000);
        assert!(decoder.check_object_size(10, 5).is_err());
        assert!(decoder.check_object_size(5, 10).is_ok());
    }

    #[tokio::test]
    async fn aborts_on_inflation_bomb() {
        let big = "x".repeat(1_000_000);
        let line = gzip_b64(&big);
        let decoder = Decoder::new(1_000);
        let mut stats = DecodeStats::default();
        let result = decoder
            .decode_lines(line.as_bytes(), &mut stats, |_| {})
            .await;
        assert!(matches!(result, Err(DecodeError::InflationBombSuspected(_))));
    }

    #[tokio::test]
    async fn skips_malformed_json_line() {
        let bad = BASE64.encode({
            let mut enc = flate2::write::GzEncoder::new(Vec::new(), flate2::Compression::default());
            enc.write_all(b"{not json").unwrap();
            enc.finish().unwrap()
        });
        let decoder = Decoder::new(10_000_000);
        let mut stats = DecodeStats::default();
        let mut bundles = Vec::new();
        decoder
            .decode_lines(bad.as_bytes(), &mut stats, |b| bundles.push(b))
            .await
            .unwrap();
        assert!(bundles.is_empty());
        assert_eq!(stats.lines_skipped_parse, 1);
    }
}

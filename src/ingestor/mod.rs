//! Per-object orchestration: fetch stream → decode → transform →
//! publish.

use std::sync::Arc;

use futures::StreamExt;
use tokio::sync::mpsc;
use tokio_util::io::StreamReader;

use crate::clients::ObjectStoreClient;
use crate::config::Config;
use crate::decoder::{DecodeError, DecodeStats, Decoder};
use crate::model::{ProcessingContext, ScanBundle, UploadEvent};
use crate::publisher::Publisher;
use crate::transformer;

#[derive(Debug, thiserror::Error)]
pub enum IngestError {
    #[error("invalid upload event: {0}")]
    InvalidEvent(String),
    #[error(transparent)]
    Decode(#[from] DecodeError),
    #[error("upstream failure: {0}")]
    Upstream(String),
}

/// Validates `UploadEvent` invariants: bucket-name grammar, non-empty
/// object key, no path traversal, size and event-time bounds, and (when
/// present) `eTag` shape.
pub fn validate_upload_event(event: &UploadEvent) -> Result<(), IngestError> {
    if !is_valid_bucket_name(&event.bucket) {
        return Err(IngestError::InvalidEvent("bucket name fails grammar check".into()));
    }
    if event.object_key.trim().is_empty() {
        return Err(IngestError::InvalidEvent("empty object key".into()));
    }
    if event.object_key.contains("..") || event.object_key.starts_with('/') {
        return Err(IngestError::InvalidEvent("path traversal in object key".into()));
    }
    if event.object_size > 5_000_000_000 {
        return Err(IngestError::InvalidEvent("object size out of range".into()));
    }
    let now = chrono::Utc::now();
    if event.event_time < now - chrono::Duration::days(7) || event.event_time > now + chrono::Duration::days(1) {
        return Err(IngestError::InvalidEvent("event time out of range".into()));
    }
    if let Some(e_tag) = &event.e_tag {
        if !is_valid_e_tag(e_tag) {
            return Err(IngestError::InvalidEvent("malformed eTag".into()));
        }
    }
    Ok(())
}

/// Lowercase, 3-63 chars, `[a-z0-9.-]`, no leading/trailing separator and
/// no doubled `.`/`-` separator.
fn is_valid_bucket_name(bucket: &str) -> bool {
    if bucket.len() < 3 || bucket.len() > 63 {
        return false;
    }
    if !bucket.chars().all(|c| c.is_ascii_lowercase() || c.is_ascii_digit() || c == '.' || c == '-') {
        return false;
    }
    let first = bucket.as_bytes()[0];
    let last = bucket.as_bytes()[bucket.len() - 1];
    if matches!(first, b'.' | b'-') || matches!(last, b'.' | b'-') {
        return false;
    }
    if bucket.contains("..") || bucket.contains("--") || bucket.contains(".-") || bucket.contains("-.") {
        return false;
    }
    true
}

/// A 32-hex-char MD5 digest, optionally wrapped in double quotes.
fn is_valid_e_tag(e_tag: &str) -> bool {
    let inner = e_tag.strip_prefix('"').and_then(|s| s.strip_suffix('"')).unwrap_or(e_tag);
    inner.len() == 32 && inner.chars().all(|c| c.is_ascii_hexdigit())
}

/// Derives the stream name from an object key: the path component
/// immediately preceding the file segment. Falls back to `"unknown"` on
/// any malformed input.
pub fn derive_stream_name(object_key: &str) -> String {
    let components: Vec<String> = object_key.split('/').map(percent_decode_or_verbatim).collect();

    if components.len() < 2 {
        return "unknown".into();
    }
    let candidate = &components[components.len() - 2];
    if candidate.is_empty() || candidate.len() > 200 {
        "unknown".into()
    } else {
        candidate.clone()
    }
}

fn percent_decode_or_verbatim(part: &str) -> String {
    percent_decode(part).unwrap_or_else(|| part.to_string())
}

/// Minimal percent-decoder; returns `None` on malformed escapes so the
/// caller can fall back to the verbatim component rather than erroring.
fn percent_decode(input: &str) -> Option<String> {
    let bytes = input.as_bytes();
    let mut out = Vec::with_capacity(bytes.len());
    let mut i = 0;
    while i < bytes.len() {
        if bytes[i] == b'%' {
            let hex = bytes.get(i + 1..i + 3)?;
            let hex_str = std::str::from_utf8(hex).ok()?;
            let value = u8::from_str_radix(hex_str, 16).ok()?;
            out.push(value);
            i += 3;
        } else {
            out.push(bytes[i]);
            i += 1;
        }
    }
    String::from_utf8(out).ok()
}

pub struct Ingestor {
    config: Arc<Config>,
    object_store: Arc<dyn ObjectStoreClient>,
    publisher: Arc<Publisher>,
    decoder: Decoder,
}

impl Ingestor {
    pub fn new(config: Arc<Config>, object_store: Arc<dyn ObjectStoreClient>, publisher: Arc<Publisher>) -> Self {
        let decoder = Decoder::new(config.max_inflated_bytes);
        Self {
            config,
            object_store,
            publisher,
            decoder,
        }
    }

    /// Processes one object end to end. Succeeds only if the stream was
    /// consumed without a fatal decode error and every produced measurement
    /// was admitted by the Publisher.
    #[tracing::instrument(skip(self, event), fields(bucket = %event.bucket, key = %event.object_key))]
    pub async fn process(&self, event: &UploadEvent) -> Result<(), IngestError> {
        validate_upload_event(event)?;
        self.decoder
            .check_object_size(event.object_size, self.config.max_object_bytes)?;

        let stream_name = derive_stream_name(&event.object_key);
        let ctx = ProcessingContext::new(stream_name, event.object_key.clone());

        let object_stream = self
            .object_store
            .open_stream(&event.bucket, &event.object_key)
            .await
            .map_err(|e| IngestError::Upstream(e.to_string()))?;

        let mapped = object_stream.map(|r| r.map_err(std::io::Error::other));
        let reader = StreamReader::new(mapped);
        let mut buffered = tokio::io::BufReader::new(reader);

        let (tx, rx) = mpsc::unbounded_channel::<ScanBundle>();
        let mut stats = DecodeStats::default();

        let decode_fut = self
            .decoder
            .decode_lines(&mut buffered, &mut stats, move |bundle| {
                let _ = tx.send(bundle);
            });
        let consume_fut = self.consume_bundles(rx, &ctx);

        let (decode_result, all_admitted) = tokio::join!(decode_fut, consume_fut);
        decode_result?;

        tracing::info!(
            object_key = %event.object_key,
            lines = stats.lines_total,
            bundles = stats.bundles_emitted,
            batch_id = %ctx.batch_id,
            "object processed"
        );

        if !all_admitted {
            return Err(IngestError::Upstream("publisher rejected one or more records".into()));
        }
        Ok(())
    }

    /// Drains decoded bundles as they arrive, transforming and handing each
    /// resulting Measurement to the Publisher. Returns `false` if any
    /// record failed admission (the publisher was closed mid-flight).
    async fn consume_bundles(&self, mut rx: mpsc::UnboundedReceiver<ScanBundle>, ctx: &ProcessingContext) -> bool {
        let mut all_admitted = true;
        while let Some(bundle) = rx.recv().await {
            let measurements = match transformer::transform(Some(&bundle), ctx, &self.config) {
                Ok(ms) => ms,
                Err(e) => {
                    tracing::warn!(error = %e, "bundle produced no measurements");
                    continue;
                }
            };
            for measurement in &measurements {
                match self.publisher.submit(measurement).await {
                    Ok(_) => {}
                    Err(e) => {
                        tracing::error!(error = %e, "publisher rejected measurement");
                        all_admitted = false;
                    }
                }
            }
        }
        all_admitted
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn stream_name_derivation() {
        assert_eq!(derive_stream_name("devices/device-42/scan-001.gz"), "device-42");
        assert_eq!(derive_stream_name("lonefile.gz"), "unknown");
        assert_eq!(derive_stream_name(""), "unknown");
    }

    #[test]
    fn stream_name_percent_decoding() {
        assert_eq!(derive_stream_name("devices/device%2042/scan.gz"), "device 42");
    }

    #[test]
    fn stream_name_falls_back_on_empty_or_long_component() {
        assert_eq!(derive_stream_name("//scan.gz"), "unknown");
        let long = "a".repeat(250);
        assert_eq!(derive_stream_name(&format!("{long}/scan.gz")), "unknown");
    }

    #[test]
    fn rejects_path_traversal() {
        let event = UploadEvent {
            region_hint: None,
            bucket: "bucket".into(),
            object_key: "../etc/passwd".into(),
            object_size: 10,
            e_tag: None,
            sequencer: None,
            event_time: chrono::Utc::now(),
            request_id: None,
        };
        assert!(matches!(validate_upload_event(&event), Err(IngestError::InvalidEvent(_))));
    }

    #[test]
    fn rejects_oversized_object() {
        let event = UploadEvent {
            region_hint: None,
            bucket: "bucket".into(),
            object_key: "k/scan.gz".into(),
            object_size: 6_000_000_000,
            e_tag: None,
            sequencer: None,
            event_time: chrono::Utc::now(),
            request_id: None,
        };
        assert!(matches!(validate_upload_event(&event), Err(IngestError::InvalidEvent(_))));
    }

    fn base_event() -> UploadEvent {
        UploadEvent {
            region_hint: None,
            bucket: "wifi-uploads".into(),
            object_key: "devices/d1/scan.gz".into(),
            object_size: 10,
            e_tag: None,
            sequencer: None,
            event_time: chrono::Utc::now(),
            request_id: None,
        }
    }

    #[test]
    fn bucket_name_grammar() {
        assert!(is_valid_bucket_name("wifi-uploads"));
        assert!(is_valid_bucket_name("a.b.c"));
        assert!(!is_valid_bucket_name("ab"));
        assert!(!is_valid_bucket_name(&"a".repeat(64)));
        assert!(!is_valid_bucket_name("-leading-dash"));
        assert!(!is_valid_bucket_name("trailing-dash-"));
        assert!(!is_valid_bucket_name("double..dot"));
        assert!(!is_valid_bucket_name("Has-Upper"));
        assert!(!is_valid_bucket_name("has_underscore"));
    }

    #[test]
    fn rejects_malformed_bucket_name() {
        let mut event = base_event();
        event.bucket = "ab".into();
        assert!(matches!(validate_upload_event(&event), Err(IngestError::InvalidEvent(_))));
    }

    #[test]
    fn e_tag_shape() {
        assert!(is_valid_e_tag("d41d8cd98f00b204e9800998ecf8427e"));
        assert!(is_valid_e_tag("\"d41d8cd98f00b204e9800998ecf8427e\""));
        assert!(!is_valid_e_tag("not-hex"));
        assert!(!is_valid_e_tag("d41d8cd98f00b204e9800998ecf8427"));
    }

    #[test]
    fn rejects_malformed_e_tag() {
        let mut event = base_event();
        event.e_tag = Some("not-an-etag".into());
        assert!(matches!(validate_upload_event(&event), Err(IngestError::InvalidEvent(_))));
    }

    #[test]
    fn accepts_well_formed_e_tag() {
        let mut event = base_event();
        event.e_tag = Some("\"d41d8cd98f00b204e9800998ecf8427e\"".into());
        assert!(validate_upload_event(&event).is_ok());
    }
}

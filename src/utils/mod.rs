//! Shared utilities
//!
//! Small, dependency-light helpers used across the pipeline: human-readable
//! size formatting/parsing, URL hygiene, and serde adapters.

pub mod human_format;
pub mod url;

pub use human_format::{format_bytes, format_duration_secs, parse_size};
pub use url::UrlUtils;

/// Serialize a `Duration` as integer milliseconds (wire format of provider
/// timeouts in stored user configurations)
pub mod serde_duration_ms {
    use std::time::Duration;

    use serde::{Deserialize, Deserializer, Serializer};

    pub fn serialize<S: Serializer>(value: &Duration, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_u64(value.as_millis() as u64)
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Duration, D::Error> {
        let millis = u64::deserialize(deserializer)?;
        Ok(Duration::from_millis(millis))
    }
}

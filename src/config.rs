//! Configuration loading.
//!
//! A single TOML file (`loam.toml` at the storage root by convention) with
//! one optional section per tunable subsystem. Every field has a default;
//! an absent file yields the default configuration. Unknown fields are
//! rejected so typos fail loudly instead of silently configuring nothing.

use std::path::{Path, PathBuf};

use serde::Deserialize;

use crate::db::DatabaseOptions;
use crate::events::EventLogOptions;
use crate::mergetree::MergeTreeOptions;
use crate::streaming::StreamingOptions;

// ---------------------------------------------------------------------------
// ConfigError
// ---------------------------------------------------------------------------

/// A configuration file could not be read or parsed.
#[derive(Debug)]
pub struct ConfigError {
    /// The file involved, when known.
    pub path: Option<PathBuf>,
    /// What went wrong.
    pub message: String,
}

impl std::fmt::Display for ConfigError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match &self.path {
            Some(path) => write!(f, "config error in '{}': {}", path.display(), self.message),
            None => write!(f, "config error: {}", self.message),
        }
    }
}

impl std::error::Error for ConfigError {}

// ---------------------------------------------------------------------------
// Sections
// ---------------------------------------------------------------------------

#[derive(Clone, Debug, Default, Deserialize)]
#[serde(deny_unknown_fields)]
struct EventsSection {
    /// Events replayed past a snapshot before a new one is written.
    auto_snapshot_threshold: Option<u64>,
    /// Segment rotation threshold in bytes.
    segment_max_bytes: Option<u64>,
}

#[derive(Clone, Debug, Default, Deserialize)]
#[serde(deny_unknown_fields)]
struct MergetreeSection {
    compact_after_lines: Option<u64>,
    compact_after_bytes: Option<u64>,
}

#[derive(Clone, Debug, Default, Deserialize)]
#[serde(deny_unknown_fields)]
struct LocksSection {
    /// Lock TTL in ms.
    timeout_ms: Option<u64>,
    /// How long acquire waits, in ms.
    wait_timeout_ms: Option<u64>,
    /// Pause between acquisition attempts, in ms.
    retry_interval_ms: Option<u64>,
}

#[derive(Clone, Debug, Default, Deserialize)]
#[serde(deny_unknown_fields)]
struct StreamingSection {
    batch_size: Option<usize>,
    batch_timeout_ms: Option<u64>,
}

#[derive(Clone, Debug, Default, Deserialize)]
#[serde(deny_unknown_fields)]
struct RawConfig {
    /// Actor recorded on writes.
    actor: Option<String>,
    #[serde(default)]
    events: EventsSection,
    #[serde(default)]
    mergetree: MergetreeSection,
    #[serde(default)]
    locks: LocksSection,
    #[serde(default)]
    streaming: StreamingSection,
}

// ---------------------------------------------------------------------------
// LoamConfig
// ---------------------------------------------------------------------------

/// Resolved configuration with every default applied.
#[derive(Clone, Debug, Default)]
pub struct LoamConfig {
    /// Options handed to [`crate::Database::open`].
    pub database: DatabaseOptions,
    /// Lock TTL in ms.
    pub lock_timeout_ms: u64,
    /// Lock wait budget in ms.
    pub lock_wait_timeout_ms: u64,
    /// Lock retry interval in ms.
    pub lock_retry_interval_ms: u64,
}

impl LoamConfig {
    /// Load from `path`; an absent file yields defaults.
    ///
    /// # Errors
    /// Unreadable or unparsable files.
    pub fn load(path: &Path) -> Result<Self, ConfigError> {
        let text = match std::fs::read_to_string(path) {
            Ok(text) => text,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(Self::resolved(RawConfig::default())),
            Err(e) => {
                return Err(ConfigError {
                    path: Some(path.to_owned()),
                    message: e.to_string(),
                });
            }
        };
        let raw: RawConfig = toml::from_str(&text).map_err(|e| ConfigError {
            path: Some(path.to_owned()),
            message: e.to_string(),
        })?;
        Ok(Self::resolved(raw))
    }

    fn resolved(raw: RawConfig) -> Self {
        let event_defaults = EventLogOptions::default();
        let tree_defaults = MergeTreeOptions::default();
        let stream_defaults = StreamingOptions::default();
        Self {
            database: DatabaseOptions {
                actor: raw.actor,
                events: EventLogOptions {
                    auto_snapshot_threshold: raw
                        .events
                        .auto_snapshot_threshold
                        .map_or(event_defaults.auto_snapshot_threshold, Some),
                    segment_max_bytes: raw
                        .events
                        .segment_max_bytes
                        .unwrap_or(event_defaults.segment_max_bytes),
                },
                mergetree: MergeTreeOptions {
                    compact_after_lines: raw
                        .mergetree
                        .compact_after_lines
                        .unwrap_or(tree_defaults.compact_after_lines),
                    compact_after_bytes: raw
                        .mergetree
                        .compact_after_bytes
                        .unwrap_or(tree_defaults.compact_after_bytes),
                },
                streaming: StreamingOptions {
                    batch_size: raw.streaming.batch_size.unwrap_or(stream_defaults.batch_size),
                    batch_timeout_ms: raw
                        .streaming
                        .batch_timeout_ms
                        .unwrap_or(stream_defaults.batch_timeout_ms),
                },
            },
            lock_timeout_ms: raw.locks.timeout_ms.unwrap_or(30_000),
            lock_wait_timeout_ms: raw.locks.wait_timeout_ms.unwrap_or(5_000),
            lock_retry_interval_ms: raw.locks.retry_interval_ms.unwrap_or(100),
        }
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

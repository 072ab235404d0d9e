//! Runtime configuration of a [`GwaRipper`](crate::GwaRipper) run.

use std::collections::HashSet;
use std::path::PathBuf;
use std::time::Duration;

use thiserror::Error;

use crate::download::BackoffPolicy;
use crate::download::constants::{CONNECT_TIMEOUT_SECS, DEFAULT_REQUEST_DELAY, READ_TIMEOUT_SECS};
use crate::extractor::{AudioHost, ExtractorSettings};

/// Reddit asks API clients to stay below one request per second.
pub const REDDIT_REQUEST_DELAY: Duration = Duration::from_secs(2);

/// Default minimum age of the newest backup before a new one is made.
pub const DEFAULT_BACKUP_FREQUENCY: Duration = Duration::from_secs(7 * 24 * 60 * 60);

#[derive(Debug, Error, PartialEq, Eq)]
pub enum ConfigError {
    #[error("invalid config value for `{field}`: {reason}")]
    Invalid { field: &'static str, reason: String },
}

impl ConfigError {
    fn invalid(field: &'static str, reason: impl Into<String>) -> Self {
        Self::Invalid {
            field,
            reason: reason.into(),
        }
    }
}

#[derive(Debug, Clone)]
pub struct RipperConfig {
    /// Library root; holds the database, the audio tree and reports.
    pub root_dir: PathBuf,
    /// Preferred audio hosts, best first.
    pub host_priority: Vec<AudioHost>,
    /// Download only the best-ranked host among sibling mirrors.
    pub only_one_mirror: bool,
    /// Fill in reddit context of already downloaded, context-less soundgasm files.
    pub set_missing_reddit: bool,
    pub extractor: ExtractorSettings,
    pub backup_frequency: Duration,
    /// Spacing between two requests to the same domain; zero disables it.
    pub request_delay: Duration,
    pub connect_timeout_secs: u64,
    pub read_timeout_secs: u64,
    pub hls_backoff: BackoffPolicy,
    pub ffmpeg_path: PathBuf,
    pub show_progress: bool,
}

impl Default for RipperConfig {
    fn default() -> Self {
        Self {
            root_dir: PathBuf::from("."),
            host_priority: vec![
                AudioHost::Soundgasm,
                AudioHost::Eraudica,
                AudioHost::Whyp,
                AudioHost::Erocast,
                AudioHost::Skittykat,
            ],
            only_one_mirror: false,
            set_missing_reddit: false,
            extractor: ExtractorSettings::default(),
            backup_frequency: DEFAULT_BACKUP_FREQUENCY,
            request_delay: DEFAULT_REQUEST_DELAY,
            connect_timeout_secs: CONNECT_TIMEOUT_SECS,
            read_timeout_secs: READ_TIMEOUT_SECS,
            hls_backoff: BackoffPolicy::default(),
            ffmpeg_path: PathBuf::from("ffmpeg"),
            show_progress: true,
        }
    }
}

impl RipperConfig {
    #[must_use]
    pub fn with_root(root_dir: impl Into<PathBuf>) -> Self {
        Self {
            root_dir: root_dir.into(),
            ..Self::default()
        }
    }

    /// Checks value ranges before anything touches disk or network.
    ///
    /// # Errors
    ///
    /// [`ConfigError::Invalid`] naming the first offending field.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.root_dir.as_os_str().is_empty() {
            return Err(ConfigError::invalid("root_dir", "must not be empty"));
        }

        let mut seen = HashSet::new();
        for host in &self.host_priority {
            if !seen.insert(host) {
                return Err(ConfigError::invalid(
                    "host_priority",
                    format!("`{host}` listed twice"),
                ));
            }
        }

        if self.request_delay > Duration::from_secs(60) {
            return Err(ConfigError::invalid(
                "request_delay",
                format!("{}ms; expected range 0..=60000", self.request_delay.as_millis()),
            ));
        }
        validate_timeout_secs("connect_timeout_secs", self.connect_timeout_secs)?;
        validate_timeout_secs("read_timeout_secs", self.read_timeout_secs)?;

        if !(self.hls_backoff.factor.is_finite() && self.hls_backoff.factor > 0.0) {
            return Err(ConfigError::invalid(
                "hls_backoff.factor",
                format!("{}; expected a positive number", self.hls_backoff.factor),
            ));
        }
        if self.hls_backoff.max_consecutive_failures == 0 {
            return Err(ConfigError::invalid(
                "hls_backoff.max_consecutive_failures",
                "must be at least 1",
            ));
        }

        for (tag, _) in &self.extractor.tag_combos {
            if tag.trim().is_empty() {
                return Err(ConfigError::invalid("tag_combos", "empty tag"));
            }
        }
        if self.extractor.banned_tags.iter().any(|t| t.trim().is_empty()) {
            return Err(ConfigError::invalid("banned_tags", "empty tag"));
        }
        Ok(())
    }
}

fn validate_timeout_secs(field: &'static str, value: u64) -> Result<(), ConfigError> {
    if !(1..=3600).contains(&value) {
        return Err(ConfigError::invalid(
            field,
            format!("{value}; expected range 1..=3600"),
        ));
    }
    Ok(())
}

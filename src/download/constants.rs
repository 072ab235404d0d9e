//! Constants for the download module (timeouts, request spacing).

use std::time::Duration;

/// Default HTTP connect timeout (30 seconds).
pub const CONNECT_TIMEOUT_SECS: u64 = 30;

/// Default HTTP read timeout (5 minutes for long recordings).
pub const READ_TIMEOUT_SECS: u64 = 300;

/// Default spacing between two requests to the same domain.
pub const DEFAULT_REQUEST_DELAY: Duration = Duration::from_millis(500);

/// Warn once a single domain has made us wait this long in total.
pub const CUMULATIVE_DELAY_WARNING_THRESHOLD: Duration = Duration::from_secs(30);

/// Template of the per-transfer progress bar.
pub const PROGRESS_TEMPLATE: &str =
    "{msg:30!} [{bar:30}] {bytes}/{total_bytes} ({bytes_per_sec}, {eta})";

//! Per-domain request spacing.
//!
//! Every page fetch and file transfer goes through [`RateLimiter::acquire`]
//! first. Requests to the same domain are spaced by at least the configured
//! delay; different domains never wait on each other. Hosts that are known to
//! throttle harder (the reddit JSON endpoints) can get a longer spacing via
//! [`RateLimiter::with_domain_delay`].

use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

use dashmap::DashMap;
use tokio::sync::Mutex;
use tokio::time::Instant;
use tracing::{debug, instrument, warn};

use super::constants::CUMULATIVE_DELAY_WARNING_THRESHOLD;

#[derive(Debug)]
pub struct RateLimiter {
    default_delay: Duration,
    disabled: bool,
    /// Spacing that replaces `default_delay` for specific domains.
    overrides: DashMap<String, Duration>,
    /// Arc lets us drop the shard lock before awaiting the inner mutex.
    domains: DashMap<String, Arc<DomainSlot>>,
}

#[derive(Debug, Default)]
struct DomainSlot {
    /// `None` until the first request; the first request never waits.
    last_request: Mutex<Option<Instant>>,
    waited_ms: AtomicU64,
}

impl DomainSlot {
    #[allow(clippy::cast_possible_truncation)]
    fn add_wait(&self, delay: Duration) -> Duration {
        let delay_ms = delay.as_millis() as u64;
        let total = self.waited_ms.fetch_add(delay_ms, Ordering::SeqCst) + delay_ms;
        Duration::from_millis(total)
    }
}

impl RateLimiter {
    #[must_use]
    pub fn new(default_delay: Duration) -> Self {
        Self {
            default_delay,
            disabled: default_delay.is_zero(),
            overrides: DashMap::new(),
            domains: DashMap::new(),
        }
    }

    /// A limiter that never waits.
    #[must_use]
    pub fn disabled() -> Self {
        Self::new(Duration::ZERO)
    }

    /// Sets a different spacing for one domain (`www.` is ignored).
    #[must_use]
    pub fn with_domain_delay(self, domain: &str, delay: Duration) -> Self {
        self.overrides.insert(normalize_domain(domain), delay);
        self
    }

    #[must_use]
    pub fn is_disabled(&self) -> bool {
        self.disabled
    }

    #[must_use]
    pub fn default_delay(&self) -> Duration {
        self.default_delay
    }

    /// Spacing applied to requests for `domain`.
    #[must_use]
    pub fn delay_for(&self, domain: &str) -> Duration {
        self.overrides
            .get(domain)
            .map_or(self.default_delay, |d| *d)
    }

    /// Waits until a request to `url`'s domain is allowed, then records it.
    #[instrument(level = "trace", skip(self), fields(domain))]
    pub async fn acquire(&self, url: &str) {
        if self.disabled {
            return;
        }

        let domain = extract_domain(url);
        tracing::Span::current().record("domain", domain.as_str());
        let spacing = self.delay_for(&domain);

        let slot = self
            .domains
            .entry(domain.clone())
            .or_insert_with(|| Arc::new(DomainSlot::default()))
            .clone();

        let mut last_request = slot.last_request.lock().await;
        if let Some(previous) = *last_request {
            let elapsed = previous.elapsed();
            if elapsed < spacing {
                let delay = spacing - elapsed;
                let total = slot.add_wait(delay);
                debug!(
                    domain = %domain,
                    delay_ms = delay.as_millis(),
                    total_ms = total.as_millis(),
                    "spacing request"
                );
                if total >= CUMULATIVE_DELAY_WARNING_THRESHOLD
                    && total.saturating_sub(delay) < CUMULATIVE_DELAY_WARNING_THRESHOLD
                {
                    warn!(
                        domain = %domain,
                        total_secs = total.as_secs(),
                        "spent a long time waiting on this domain"
                    );
                }
                tokio::time::sleep(delay).await;
            }
        }
        *last_request = Some(Instant::now());
    }
}

fn normalize_domain(domain: &str) -> String {
    let lower = domain.to_ascii_lowercase();
    lower
        .strip_prefix("www.")
        .map_or_else(|| lower.clone(), str::to_string)
}

/// Lowercased host of `url` without a leading `www.`; `"unknown"` if unparsable.
#[must_use]
pub fn extract_domain(url: &str) -> String {
    url::Url::parse(url)
        .ok()
        .and_then(|u| u.host_str().map(normalize_domain))
        .unwrap_or_else(|| "unknown".to_string())
}

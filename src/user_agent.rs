//! User-Agent sent with every request.

const PROJECT_UA_URL: &str = "https://github.com/fierce/gwaripper";

/// Identifies the tool and version; some hosts reject anonymous clients.
#[must_use]
pub(crate) fn default_user_agent() -> String {
    let version = env!("CARGO_PKG_VERSION");
    format!("gwaripper/{version} (audio-archiver; +{PROJECT_UA_URL})")
}

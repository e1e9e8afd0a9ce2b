//! HTTP-backed implementations of the external provider contracts.
//!
//! Each client is a thin `reqwest` wrapper with a fixed request timeout
//! and no retries; the engine's failure semantics (session-level, not
//! transport-level) live above these.

use std::time::Duration;

use chrono::{DateTime, Utc};
use foreman_core::Error;

pub mod agents;
pub mod auditor;
pub mod vcs;

pub use agents::HttpAgentProvider;
pub use auditor::HttpAuditorOracle;
pub use vcs::HttpVcsProvider;

/// Default request timeout for provider calls.
pub(crate) const DEFAULT_REQUEST_TIMEOUT: Duration = Duration::from_secs(30);

/// Builds a client with the standard timeout, falling back to the
/// library default if the builder fails.
pub(crate) fn http_client(timeout: Duration) -> reqwest::Client {
    reqwest::Client::builder()
        .timeout(timeout)
        .build()
        .unwrap_or_else(|err| {
            tracing::warn!(error = %err, "failed to configure http client; using defaults");
            reqwest::Client::new()
        })
}

/// Maps a transport error onto the provider error kind.
pub(crate) fn transport_error(provider: &'static str, err: &reqwest::Error) -> Error {
    Error::provider(provider, format!("transport: {err}"))
}

/// Extracts a rate-limit reset timestamp from response headers, when the
/// response is a throttle.
pub(crate) fn rate_limit_reset(response: &reqwest::Response) -> Option<DateTime<Utc>> {
    let throttled = response.status() == reqwest::StatusCode::TOO_MANY_REQUESTS
        || (response.status() == reqwest::StatusCode::FORBIDDEN
            && response
                .headers()
                .get("x-ratelimit-remaining")
                .and_then(|v| v.to_str().ok())
                == Some("0"));
    if !throttled {
        return None;
    }
    let epoch = response
        .headers()
        .get("x-ratelimit-reset")
        .and_then(|v| v.to_str().ok())
        .and_then(|v| v.parse::<i64>().ok())?;
    DateTime::from_timestamp(epoch, 0)
}

//! Logging setup and shared span constructors.
//!
//! The control plane is edge-triggered, so almost every log line hangs
//! off one of three units of work: a session transition, a cascade
//! dispatch, or a review pass. The span constructors here keep those
//! units queryable by the same field names everywhere.

use std::str::FromStr;
use std::sync::atomic::{AtomicBool, Ordering};

use tracing::Span;
use tracing_subscriber::EnvFilter;

use crate::error::Error;

/// Filter applied when `RUST_LOG` is unset. sqlx logs every statement
/// at info, which drowns the engine's own lines.
const DEFAULT_FILTER: &str = "info,sqlx=warn";

static INSTALLED: AtomicBool = AtomicBool::new(false);

/// Log output format, selected by `FOREMAN_LOG_FORMAT`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LogFormat {
    /// JSON structured logs (for production).
    Json,
    /// Pretty-printed logs (for development).
    Pretty,
}

impl FromStr for LogFormat {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self, Error> {
        match s {
            "json" => Ok(Self::Json),
            "pretty" => Ok(Self::Pretty),
            other => Err(Error::InvalidInput(format!(
                "unknown log format '{other}', expected 'json' or 'pretty'"
            ))),
        }
    }
}

/// Installs the global tracing subscriber.
///
/// Returns false when a subscriber was already installed by an earlier
/// call, in which case the requested format is ignored. `RUST_LOG`
/// overrides the default filter.
pub fn init_logging(format: LogFormat) -> bool {
    if INSTALLED.swap(true, Ordering::SeqCst) {
        return false;
    }
    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(DEFAULT_FILTER));
    match format {
        LogFormat::Json => tracing_subscriber::fmt()
            .with_env_filter(filter)
            .json()
            .init(),
        LogFormat::Pretty => tracing_subscriber::fmt()
            .with_env_filter(filter)
            .pretty()
            .init(),
    }
    true
}

/// Creates a span for session lifecycle operations.
#[must_use]
pub fn session_span(operation: &str, session_id: &str) -> Span {
    tracing::info_span!("session", op = operation, session = session_id)
}

/// Creates a span for cascade operations.
#[must_use]
pub fn cascade_span(operation: &str, cascade_id: &str) -> Span {
    tracing::info_span!("cascade", op = operation, cascade = cascade_id)
}

/// Creates a span for review passes.
#[must_use]
pub fn review_span(source_repo: &str, branch: &str, commit: &str) -> Span {
    tracing::info_span!("review", repo = source_repo, branch = branch, commit = commit)
}

//! Engine tunables.
//!
//! All knobs that shape dispatch and remediation behavior live here so
//! the engine itself stays free of magic numbers. The HTTP crate builds
//! this from environment variables; tests build it directly.

use std::time::Duration;

use globset::{Glob, GlobSet, GlobSetBuilder};

use crate::error::{Error, Result};
use crate::session::MAX_REMEDIATION_DEPTH;

/// Commit-message marker identifying commits Foreman itself caused.
///
/// Webhook deliveries for such commits are skipped to prevent
/// self-triggering loops.
pub const AUTO_COMMIT_MARKER: &str = "[Auto]";

/// Default cap on repair jobs dispatched in parallel from one cascade.
pub const DEFAULT_MAX_PARALLEL_AGENTS: usize = 5;

/// Default oracle-confidence floor below which a decomposition is
/// recorded but not dispatched.
pub const DEFAULT_MIN_CONFIDENCE: f64 = 0.7;

/// Default wall-clock timeout for cascade analysis calls.
pub const DEFAULT_ANALYSIS_TIMEOUT: Duration = Duration::from_secs(60);

/// Default wall-clock timeout for review calls. Shorter than analysis;
/// a review blocks a webhook delivery.
pub const DEFAULT_REVIEW_TIMEOUT: Duration = Duration::from_secs(30);

/// A compiled set of core-file globs.
///
/// A push whose change set intersects this set triggers cascade analysis.
#[derive(Debug, Clone)]
pub struct CoreFileSet {
    patterns: Vec<String>,
    matcher: GlobSet,
}

impl CoreFileSet {
    /// Compiles a set of glob patterns.
    ///
    /// # Errors
    ///
    /// Returns `InvalidInput` when a pattern does not parse.
    pub fn new<I, S>(patterns: I) -> Result<Self>
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        let patterns: Vec<String> = patterns.into_iter().map(Into::into).collect();
        let mut builder = GlobSetBuilder::new();
        for pattern in &patterns {
            let glob = Glob::new(pattern).map_err(|e| {
                Error::InvalidInput(format!("invalid core-file glob '{pattern}': {e}"))
            })?;
            builder.add(glob);
        }
        let matcher = builder
            .build()
            .map_err(|e| Error::InvalidInput(format!("core-file glob set: {e}")))?;
        Ok(Self { patterns, matcher })
    }

    /// An empty set that matches nothing.
    #[must_use]
    pub fn empty() -> Self {
        Self {
            patterns: Vec::new(),
            matcher: GlobSet::empty(),
        }
    }

    /// Returns true when the path matches any core-file glob.
    #[must_use]
    pub fn is_core_file(&self, path: &str) -> bool {
        self.matcher.is_match(path)
    }

    /// The configured patterns, in order.
    #[must_use]
    pub fn patterns(&self) -> &[String] {
        &self.patterns
    }
}

/// Tunables for the dispatch-and-remediation engine.
#[derive(Debug, Clone)]
pub struct EngineConfig {
    /// Bound on self-healing generations. Fixed at
    /// [`MAX_REMEDIATION_DEPTH`] unless overridden for tests.
    pub max_remediation_depth: u32,
    /// Cap on repair jobs dispatched in parallel from one cascade.
    pub max_parallel_agents: usize,
    /// Oracle-confidence floor for dispatching a decomposition.
    pub min_confidence: f64,
    /// Wall-clock timeout for cascade analysis calls.
    pub analysis_timeout: Duration,
    /// Wall-clock timeout for review calls.
    pub review_timeout: Duration,
    /// Paths whose change triggers cascade analysis.
    pub core_files: CoreFileSet,
    /// CI pipelines whose check results drive session transitions.
    /// Checks from any other pipeline are logged and ignored.
    pub primary_pipelines: Vec<String>,
    /// Commit authors treated as automation (skipped by the webhook
    /// receiver, alongside the [`AUTO_COMMIT_MARKER`]).
    pub bot_authors: Vec<String>,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            max_remediation_depth: MAX_REMEDIATION_DEPTH,
            max_parallel_agents: DEFAULT_MAX_PARALLEL_AGENTS,
            min_confidence: DEFAULT_MIN_CONFIDENCE,
            analysis_timeout: DEFAULT_ANALYSIS_TIMEOUT,
            review_timeout: DEFAULT_REVIEW_TIMEOUT,
            core_files: CoreFileSet::empty(),
            primary_pipelines: Vec::new(),
            bot_authors: Vec::new(),
        }
    }
}

impl EngineConfig {
    /// Returns true when the named CI pipeline drives session transitions.
    #[must_use]
    pub fn is_primary_pipeline(&self, name: &str) -> bool {
        self.primary_pipelines.iter().any(|p| p == name)
    }

    /// Returns true when a commit should be skipped as automation-caused.
    #[must_use]
    pub fn is_automated_commit(&self, author: &str, message: &str) -> bool {
        message.contains(AUTO_COMMIT_MARKER) || self.bot_authors.iter().any(|b| b == author)
    }

    /// Validates the tunables.
    ///
    /// # Errors
    ///
    /// Returns `InvalidInput` when a value is outside its legal range.
    pub fn validate(&self) -> Result<()> {
        if self.max_remediation_depth > MAX_REMEDIATION_DEPTH {
            return Err(Error::InvalidInput(format!(
                "max_remediation_depth {} exceeds the hard bound {}",
                self.max_remediation_depth, MAX_REMEDIATION_DEPTH
            )));
        }
        if self.max_parallel_agents == 0 {
            return Err(Error::InvalidInput(
                "max_parallel_agents must be at least 1".into(),
            ));
        }
        if !(0.0..=1.0).contains(&self.min_confidence) {
            return Err(Error::InvalidInput(format!(
                "min_confidence {} is outside [0, 1]",
                self.min_confidence
            )));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn core_file_globs_match_paths() {
        let set = CoreFileSet::new(["core/**/*.rs", "schema.sql"]).expect("globs");
        assert!(set.is_core_file("core/model/types.rs"));
        assert!(set.is_core_file("schema.sql"));
        assert!(!set.is_core_file("docs/readme.md"));
    }

    #[test]
    fn empty_set_matches_nothing() {
        assert!(!CoreFileSet::empty().is_core_file("core/model/types.rs"));
    }

    #[test]
    fn invalid_globs_are_rejected() {
        assert!(CoreFileSet::new(["core/[".to_string()]).is_err());
    }

    #[test]
    fn automated_commits_are_detected() {
        let config = EngineConfig {
            bot_authors: vec!["foreman-bot".into()],
            ..EngineConfig::default()
        };
        assert!(config.is_automated_commit("foreman-bot", "fix planner"));
        assert!(config.is_automated_commit("alice", "[Auto] repair dispatch"));
        assert!(!config.is_automated_commit("alice", "fix planner"));
    }

    #[test]
    fn defaults_validate() {
        EngineConfig::default().validate().expect("valid");
    }

    #[test]
    fn out_of_range_confidence_is_rejected() {
        let config = EngineConfig {
            min_confidence: 1.5,
            ..EngineConfig::default()
        };
        assert!(config.validate().is_err());
    }
}

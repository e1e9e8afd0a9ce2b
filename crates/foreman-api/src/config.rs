//! Server configuration from environment variables.

use std::net::SocketAddr;
use std::time::Duration;

use foreman_core::{CoreFileSet, EngineConfig, Error, LogFormat, Result};

/// Everything the binary needs to start.
#[derive(Clone)]
pub struct Config {
    /// Socket the server binds.
    pub bind_addr: SocketAddr,
    /// Path of the registry database.
    pub database_path: String,
    /// Shared secret for webhook signatures.
    pub webhook_secret: String,
    /// Auditor oracle base URL.
    pub auditor_url: String,
    /// Auditor oracle API key.
    pub auditor_api_key: String,
    /// Agent Provider base URL.
    pub agents_url: String,
    /// Agent Provider API key.
    pub agents_api_key: String,
    /// VCS Provider API base URL.
    pub vcs_url: String,
    /// VCS Provider token.
    pub vcs_token: String,
    /// Log output format.
    pub log_format: LogFormat,
    /// Engine tunables.
    pub engine: EngineConfig,
}

impl std::fmt::Debug for Config {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Config")
            .field("bind_addr", &self.bind_addr)
            .field("database_path", &self.database_path)
            .field("webhook_secret", &"[REDACTED]")
            .field("auditor_url", &self.auditor_url)
            .field("auditor_api_key", &"[REDACTED]")
            .field("agents_url", &self.agents_url)
            .field("agents_api_key", &"[REDACTED]")
            .field("vcs_url", &self.vcs_url)
            .field("vcs_token", &"[REDACTED]")
            .field("engine", &self.engine)
            .finish_non_exhaustive()
    }
}

fn env_or(key: &str, default: &str) -> String {
    std::env::var(key).unwrap_or_else(|_| default.to_string())
}

fn env_required(key: &str) -> Result<String> {
    std::env::var(key)
        .ok()
        .filter(|v| !v.trim().is_empty())
        .ok_or_else(|| Error::InvalidInput(format!("{key} is required")))
}

fn env_list(key: &str) -> Vec<String> {
    std::env::var(key)
        .unwrap_or_default()
        .split(',')
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .map(ToString::to_string)
        .collect()
}

impl Config {
    /// Loads configuration from `FOREMAN_*` environment variables.
    ///
    /// # Errors
    ///
    /// Returns `InvalidInput` when a required variable is missing or a
    /// value does not parse.
    pub fn from_env() -> Result<Self> {
        let bind_addr = env_or("FOREMAN_BIND_ADDR", "127.0.0.1:8080")
            .parse::<SocketAddr>()
            .map_err(|e| Error::InvalidInput(format!("FOREMAN_BIND_ADDR: {e}")))?;

        let log_format = env_or("FOREMAN_LOG_FORMAT", "pretty")
            .parse::<LogFormat>()
            .map_err(|e| Error::InvalidInput(format!("FOREMAN_LOG_FORMAT: {e}")))?;

        let mut engine = EngineConfig {
            core_files: CoreFileSet::new(env_list("FOREMAN_CORE_FILE_GLOBS"))?,
            primary_pipelines: env_list("FOREMAN_PRIMARY_PIPELINES"),
            bot_authors: env_list("FOREMAN_BOT_AUTHORS"),
            ..EngineConfig::default()
        };
        if let Ok(value) = std::env::var("FOREMAN_MAX_PARALLEL_AGENTS") {
            engine.max_parallel_agents = value
                .parse()
                .map_err(|e| Error::InvalidInput(format!("FOREMAN_MAX_PARALLEL_AGENTS: {e}")))?;
        }
        if let Ok(value) = std::env::var("FOREMAN_MIN_CONFIDENCE") {
            engine.min_confidence = value
                .parse()
                .map_err(|e| Error::InvalidInput(format!("FOREMAN_MIN_CONFIDENCE: {e}")))?;
        }
        if let Ok(value) = std::env::var("FOREMAN_ANALYSIS_TIMEOUT_MS") {
            let ms: u64 = value
                .parse()
                .map_err(|e| Error::InvalidInput(format!("FOREMAN_ANALYSIS_TIMEOUT_MS: {e}")))?;
            engine.analysis_timeout = Duration::from_millis(ms);
        }
        engine.validate()?;

        Ok(Self {
            bind_addr,
            database_path: env_or("FOREMAN_DATABASE_PATH", "foreman.db"),
            webhook_secret: env_required("FOREMAN_WEBHOOK_SECRET")?,
            auditor_url: env_required("FOREMAN_AUDITOR_URL")?,
            auditor_api_key: env_required("FOREMAN_AUDITOR_API_KEY")?,
            agents_url: env_required("FOREMAN_AGENTS_URL")?,
            agents_api_key: env_required("FOREMAN_AGENTS_API_KEY")?,
            vcs_url: env_or("FOREMAN_VCS_URL", "https://api.github.com"),
            vcs_token: env_required("FOREMAN_VCS_TOKEN")?,
            log_format,
            engine,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn debug_redacts_secrets() {
        let config = Config {
            bind_addr: "127.0.0.1:8080".parse().expect("addr"),
            database_path: "foreman.db".into(),
            webhook_secret: "hunter2".into(),
            auditor_url: "https://auditor.test".into(),
            auditor_api_key: "key-a".into(),
            agents_url: "https://agents.test".into(),
            agents_api_key: "key-b".into(),
            vcs_url: "https://api.github.com".into(),
            vcs_token: "token".into(),
            log_format: LogFormat::Pretty,
            engine: EngineConfig::default(),
        };
        let rendered = format!("{config:?}");
        assert!(!rendered.contains("hunter2"));
        assert!(!rendered.contains("key-a"));
        assert!(rendered.contains("[REDACTED]"));
    }
}

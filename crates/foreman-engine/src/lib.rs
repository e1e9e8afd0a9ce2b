//! # foreman-engine
//!
//! The dispatch-and-remediation engine: session lifecycle, cascade
//! dispatch, and the review loop, over the registry's transactional
//! substrate.
//!
//! The engine is edge-triggered. Webhooks and poll requests drive it;
//! there are no background workers or in-process queues. Every external
//! AI system sits behind a contract from `foreman-core`
//! ([`AuditorOracle`](foreman_core::AuditorOracle),
//! [`AgentProvider`](foreman_core::AgentProvider),
//! [`VcsProvider`](foreman_core::VcsProvider)), so the whole engine runs
//! against deterministic test doubles.

#![forbid(unsafe_code)]
#![deny(rust_2018_idioms)]

use std::sync::Arc;

use foreman_core::{AgentProvider, AuditorOracle, EngineConfig, VcsProvider};
use foreman_registry::{LockManager, RegistryStore};

pub mod cascade;
pub mod events;
pub mod lifecycle;
pub mod metrics;
pub mod providers;
pub mod review;
pub mod webhook;

pub use cascade::{BatchJob, BatchRequest, BatchResponse, CascadeRequest, CascadeResponse, DispatchedSession};
pub use lifecycle::{CheckOutcome, ClosureOutcome, DispatchResult, SyncResult};
pub use review::ReviewOutcome;
pub use webhook::WebhookResult;

/// The control-plane engine. Cheap to clone.
#[derive(Clone)]
pub struct Engine {
    pub(crate) store: RegistryStore,
    pub(crate) locks: LockManager,
    pub(crate) auditor: Arc<dyn AuditorOracle>,
    pub(crate) agents: Arc<dyn AgentProvider>,
    pub(crate) vcs: Arc<dyn VcsProvider>,
    pub(crate) config: Arc<EngineConfig>,
}

impl Engine {
    /// Wires an engine over a registry and the three external providers.
    #[must_use]
    pub fn new(
        store: RegistryStore,
        auditor: Arc<dyn AuditorOracle>,
        agents: Arc<dyn AgentProvider>,
        vcs: Arc<dyn VcsProvider>,
        config: EngineConfig,
    ) -> Self {
        let locks = LockManager::new(store.clone());
        Self {
            store,
            locks,
            auditor,
            agents,
            vcs,
            config: Arc::new(config),
        }
    }

    /// The registry handle.
    #[must_use]
    pub fn store(&self) -> &RegistryStore {
        &self.store
    }

    /// The lock manager.
    #[must_use]
    pub fn locks(&self) -> &LockManager {
        &self.locks
    }

    /// The engine tunables.
    #[must_use]
    pub fn config(&self) -> &EngineConfig {
        &self.config
    }
}

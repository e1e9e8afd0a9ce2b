//! # foreman-core
//!
//! Core abstractions for the Foreman agent-fleet control plane.
//!
//! This crate provides the foundational types and contracts used across
//! all Foreman components:
//!
//! - **Identifiers**: Strongly-typed ULID IDs for goals, sessions, and cascades
//! - **Domain Entities**: Goals, sessions, file locks, and cascades
//! - **Provider Contracts**: The Auditor oracle, Agent Provider, and VCS Provider traits
//! - **Error Types**: Shared error definitions and result types
//! - **Configuration**: Engine tunables and the core-file matcher
//! - **Observability**: Logging initialization and span constructors
//!
//! ## Crate Boundary
//!
//! `foreman-core` is the **only** crate allowed to define shared
//! primitives. All cross-component interaction happens via the contracts
//! defined in this crate, which is what lets the engine be validated with
//! deterministic test doubles and providers be swapped without touching
//! lifecycle logic.
//!
//! ## Example
//!
//! ```rust
//! use foreman_core::prelude::*;
//!
//! let goal = Goal::new(
//!     "Harden the webhook receiver",
//!     "Reject unsigned deliveries",
//!     vec![AcceptanceCriterion::new("c-hmac", "signatures verified in constant time")],
//! );
//! assert_eq!(goal.status, GoalStatus::Backlog);
//! ```

#![forbid(unsafe_code)]
#![deny(missing_docs)]
#![deny(rust_2018_idioms)]
#![warn(clippy::pedantic)]

pub mod agent;
pub mod cascade;
pub mod config;
pub mod error;
pub mod goal;
pub mod id;
pub mod observability;
pub mod oracle;
pub mod session;
pub mod vcs;

/// Prelude module for convenient imports.
///
/// # Example
///
/// ```rust
/// use foreman_core::prelude::*;
/// ```
pub mod prelude {
    pub use crate::agent::{AgentHandle, AgentProvider, AgentSnapshot, AgentSpec, AgentStatus};
    pub use crate::cascade::{Cascade, CascadeStatus, DispatchTelemetry};
    pub use crate::config::{CoreFileSet, EngineConfig};
    pub use crate::error::{Error, Result};
    pub use crate::goal::{AcceptanceCriterion, Goal, GoalStatus, ReviewArtifact};
    pub use crate::id::{CascadeId, GoalId, SessionId};
    pub use crate::oracle::{
        AuditReport, AuditorOracle, CascadeAnalysis, CriterionAssessment, DecomposeInput,
        JobPriority, RepairJob, ReviewInput, Severity,
    };
    pub use crate::session::{
        FileLock, Session, SessionSpec, SessionStatus, MAX_REMEDIATION_DEPTH,
    };
    pub use crate::vcs::{RepoRef, VcsProvider};
}

// Re-export key types at crate root for ergonomics
pub use agent::{AgentHandle, AgentProvider, AgentSnapshot, AgentSpec, AgentStatus};
pub use cascade::{Cascade, CascadeStatus, DispatchTelemetry};
pub use config::{CoreFileSet, EngineConfig};
pub use error::{Error, Result};
pub use goal::{AcceptanceCriterion, Goal, GoalStatus, ReviewArtifact};
pub use id::{CascadeId, GoalId, SessionId};
pub use observability::{init_logging, LogFormat};
pub use oracle::{
    AuditReport, AuditorOracle, CascadeAnalysis, CriterionAssessment, DecomposeInput, JobPriority,
    RepairJob, ReviewInput, Severity,
};
pub use session::{FileLock, Session, SessionSpec, SessionStatus, MAX_REMEDIATION_DEPTH};
pub use vcs::{RepoRef, VcsProvider};

//! # foreman-test-utils
//!
//! Deterministic test doubles for the three external providers, plus
//! fixture builders. Everything here is scripted: tests enqueue the
//! responses they want and assert on the recorded calls afterwards.

#![forbid(unsafe_code)]
#![deny(rust_2018_idioms)]

mod fixtures;
mod providers;

pub use fixtures::{
    failing_report, passing_report, sample_analysis, sample_criteria, sample_job, session_spec,
};
pub use providers::{StubAgents, StubAuditor, StubVcs};

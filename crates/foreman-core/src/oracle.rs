//! The Auditor oracle contract.
//!
//! The auditor is an external LLM-backed reviewer. The engine treats it
//! as an oracle with a fixed output contract: given a diff and a goal's
//! criteria it returns a severity plus per-criterion assessments, and
//! given a core-file change set it returns a blast-radius decomposition.
//! The engine must behave correctly given whatever the oracle returns;
//! all hard invariants (job disjointness, confidence floor, parallelism
//! cap, depth bound) are enforced on the engine side.

use std::collections::BTreeMap;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use crate::error::Result;
use crate::goal::AcceptanceCriterion;

/// Severity of the issues an audit found in a diff.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Severity {
    /// No findings worth acting on.
    None,
    /// Findings that do not block the change.
    Minor,
    /// Findings that require remediation.
    Major,
}

/// Priority of a repair job within a cascade.
///
/// Ordering puts `High` first so that sorting by priority keeps the most
/// important jobs when the parallelism cap truncates the list.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum JobPriority {
    /// Must be repaired first.
    High,
    /// Ordinary repair work.
    Medium,
    /// Nice to have.
    Low,
}

/// The auditor's judgement of one acceptance criterion for one diff.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CriterionAssessment {
    /// Whether the criterion is met by the reviewed state of the branch.
    pub met: bool,
    /// Free-form reasoning.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub reasoning: Option<String>,
    /// Paths cited as evidence.
    #[serde(default)]
    pub evidence_files: Vec<String>,
}

/// Everything the auditor needs to review one diff.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ReviewInput {
    /// Repository, `owner/repo`.
    pub source_repo: String,
    /// Branch under review.
    pub branch_name: String,
    /// Commit under review.
    pub commit_sha: String,
    /// The goal's acceptance criteria, in order.
    pub criteria: Vec<AcceptanceCriterion>,
    /// Unified diff text.
    pub diff: String,
}

/// The auditor's verdict on one diff.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AuditReport {
    /// Overall severity of the findings.
    pub severity: Severity,
    /// One-paragraph summary for the review comment.
    pub summary: String,
    /// Individual findings, most important first.
    #[serde(default)]
    pub findings: Vec<String>,
    /// A prompt a repair agent could start from, when the auditor has one.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub recommended_fix_prompt: Option<String>,
    /// Per-criterion assessment keyed by criterion ID. May cover any
    /// subset of the goal's criteria; IDs not present are left untouched.
    #[serde(default)]
    pub criteria_assessment: BTreeMap<String, CriterionAssessment>,
}

impl AuditReport {
    /// Failure determination for one review pass.
    ///
    /// A review fails iff any assessed criterion is unmet, or the auditor
    /// returned no assessment at all and judged the severity major.
    #[must_use]
    pub fn is_failure(&self) -> bool {
        if self.criteria_assessment.is_empty() {
            return self.severity == Severity::Major;
        }
        self.criteria_assessment.values().any(|a| !a.met)
    }
}

/// One repair job inside a cascade decomposition.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RepairJob {
    /// Oracle-assigned job identifier, unique within the analysis.
    pub id: String,
    /// Files this job is allowed to touch. Pairwise disjoint across the
    /// jobs of one cascade after engine normalization.
    pub files: Vec<String>,
    /// The prompt handed to the repair agent.
    pub prompt: String,
    /// Scheduling priority.
    pub priority: JobPriority,
    /// Free-form impact estimate for the operator.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub estimated_impact: Option<String>,
}

/// Everything the auditor needs to decompose a blast radius.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DecomposeInput {
    /// Repository, `owner/repo`.
    pub source_repo: String,
    /// Diffs of the changed core files.
    pub core_file_diffs: Vec<String>,
    /// Every path the triggering commit changed.
    pub changed_paths: Vec<String>,
}

/// The auditor's blast-radius decomposition.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CascadeAnalysis {
    /// Whether the change warrants a cascade at all.
    pub is_cascade: bool,
    /// Core files whose change triggered the analysis.
    pub core_files_changed: Vec<String>,
    /// Downstream files judged at risk.
    pub downstream_files: Vec<String>,
    /// Proposed repair jobs. The engine enforces disjointness and the
    /// parallelism cap regardless of what is returned here.
    #[serde(default)]
    pub repair_jobs: Vec<RepairJob>,
    /// One-paragraph summary of the blast radius.
    pub summary: String,
    /// Oracle confidence in the decomposition, in `[0, 1]`.
    pub confidence: f64,
}

/// External LLM-backed reviewer, abstracted so the engine can be
/// validated with deterministic test doubles.
#[async_trait]
pub trait AuditorOracle: Send + Sync {
    /// Reviews one diff against a goal's acceptance criteria.
    ///
    /// # Errors
    ///
    /// Returns a provider error when the oracle is unreachable or its
    /// output does not match the contract.
    async fn review(&self, input: ReviewInput) -> Result<AuditReport>;

    /// Decomposes the blast radius of a core-file change into repair jobs.
    ///
    /// # Errors
    ///
    /// Returns a provider error when the oracle is unreachable or its
    /// output does not match the contract.
    async fn decompose(&self, input: DecomposeInput) -> Result<CascadeAnalysis>;
}

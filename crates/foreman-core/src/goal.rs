//! Goals and their acceptance criteria.
//!
//! A goal is a piece of architectural intent with an ordered list of
//! acceptance criteria. The Auditor oracle assesses criteria per diff;
//! assessments are merged back into the goal keyed by criterion ID, so
//! criterion IDs must stay stable for the goal's lifetime.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::id::{GoalId, SessionId};
use crate::oracle::CriterionAssessment;

/// Lifecycle status of a goal.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum GoalStatus {
    /// Created, no session has picked it up yet.
    Backlog,
    /// At least one session is working toward it.
    InProgress,
    /// All criteria met and the work landed.
    Completed,
    /// Remediation was exhausted without meeting the criteria.
    ///
    /// Terminal failure: a session for this goal hit the maximum
    /// remediation depth with unmet criteria.
    Drifted,
}

impl GoalStatus {
    /// Returns true when no further automated work will run for the goal.
    #[must_use]
    pub fn is_terminal(self) -> bool {
        matches!(self, Self::Completed | Self::Drifted)
    }
}

impl std::fmt::Display for GoalStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            Self::Backlog => "backlog",
            Self::InProgress => "in-progress",
            Self::Completed => "completed",
            Self::Drifted => "drifted",
        };
        f.write_str(s)
    }
}

impl std::str::FromStr for GoalStatus {
    type Err = crate::error::Error;

    fn from_str(s: &str) -> crate::error::Result<Self> {
        match s {
            "backlog" => Ok(Self::Backlog),
            "in-progress" => Ok(Self::InProgress),
            "completed" => Ok(Self::Completed),
            "drifted" => Ok(Self::Drifted),
            other => Err(crate::error::Error::InvalidInput(format!(
                "unknown goal status '{other}'"
            ))),
        }
    }
}

/// A single testable requirement of a goal.
///
/// The `id` is assigned at creation and never rewritten afterwards, so
/// auditor updates stay idempotent across re-deliveries.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AcceptanceCriterion {
    /// Stable identifier, unique within the goal.
    pub id: String,
    /// The requirement text shown to the auditor and the operator.
    pub text: String,
    /// Whether the most recent assessment judged the criterion met.
    pub met: bool,
    /// Auditor reasoning from the most recent assessment.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub reasoning: Option<String>,
    /// Paths the auditor cited as evidence.
    #[serde(default)]
    pub evidence_files: Vec<String>,
}

impl AcceptanceCriterion {
    /// Creates an unmet criterion with the given stable ID and text.
    #[must_use]
    pub fn new(id: impl Into<String>, text: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            text: text.into(),
            met: false,
            reasoning: None,
            evidence_files: Vec::new(),
        }
    }
}

/// A reference to an external change proposal produced for a goal.
///
/// Deduplicated on `(url, agent_id)` so webhook re-deliveries do not
/// accumulate duplicates.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ReviewArtifact {
    /// External artifact URL (for example a pull request).
    pub url: String,
    /// The session that produced the artifact.
    pub session_id: SessionId,
    /// The external agent that produced it, when known.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub agent_id: Option<String>,
}

/// A goal: stable identity, acceptance criteria, and review artifacts.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Goal {
    /// Unique identifier.
    pub id: GoalId,
    /// Short human-readable title.
    pub title: String,
    /// Longer description of the intent.
    pub description: String,
    /// Ordered acceptance criteria. Updates are full-rewrite under the
    /// goal's row lock.
    pub criteria: Vec<AcceptanceCriterion>,
    /// References to change proposals produced for this goal.
    #[serde(default)]
    pub review_artifacts: Vec<ReviewArtifact>,
    /// Lifecycle status.
    pub status: GoalStatus,
    /// Creation time.
    pub created_at: DateTime<Utc>,
    /// Last mutation time.
    pub updated_at: DateTime<Utc>,
}

impl Goal {
    /// Creates a backlog goal with unmet criteria.
    #[must_use]
    pub fn new(
        title: impl Into<String>,
        description: impl Into<String>,
        criteria: Vec<AcceptanceCriterion>,
    ) -> Self {
        let now = Utc::now();
        Self {
            id: GoalId::generate(),
            title: title.into(),
            description: description.into(),
            criteria,
            review_artifacts: Vec::new(),
            status: GoalStatus::Backlog,
            created_at: now,
            updated_at: now,
        }
    }

    /// Merges an auditor assessment into the criteria list.
    ///
    /// Only criteria whose IDs appear in the assessment are touched;
    /// `met`, `reasoning`, and `evidence_files` are overwritten for those.
    /// Unknown assessment IDs are ignored. Returns the number of criteria
    /// updated.
    pub fn merge_assessment<'a, I>(&mut self, assessments: I) -> usize
    where
        I: IntoIterator<Item = (&'a String, &'a CriterionAssessment)>,
    {
        let mut updated = 0;
        for (criterion_id, assessment) in assessments {
            if let Some(criterion) = self.criteria.iter_mut().find(|c| &c.id == criterion_id) {
                criterion.met = assessment.met;
                criterion.reasoning.clone_from(&assessment.reasoning);
                criterion.evidence_files.clone_from(&assessment.evidence_files);
                updated += 1;
            }
        }
        if updated > 0 {
            self.updated_at = Utc::now();
        }
        updated
    }

    /// Returns true when any criterion is currently unmet.
    #[must_use]
    pub fn has_unmet_criteria(&self) -> bool {
        self.criteria.iter().any(|c| !c.met)
    }

    /// Appends a review artifact, deduplicated on `(url, agent_id)`.
    ///
    /// Returns true when the artifact was new.
    pub fn push_review_artifact(&mut self, artifact: ReviewArtifact) -> bool {
        let exists = self
            .review_artifacts
            .iter()
            .any(|a| a.url == artifact.url && a.agent_id == artifact.agent_id);
        if exists {
            return false;
        }
        self.review_artifacts.push(artifact);
        self.updated_at = Utc::now();
        true
    }
}

//! Fixture builders shared across the engine and API test suites.

use std::collections::BTreeMap;

use foreman_core::{
    AcceptanceCriterion, AuditReport, CascadeAnalysis, JobPriority, RepairJob, SessionSpec,
    Severity,
};

use crate::providers::assessment;

/// A session spec for `acme/platform` on the given branch.
#[must_use]
pub fn session_spec(branch: &str) -> SessionSpec {
    SessionSpec {
        goal_id: None,
        cascade_id: None,
        source_repo: "acme/platform".into(),
        branch_name: branch.into(),
        base_branch: "main".into(),
        remediation_depth: 0,
    }
}

/// Two unmet criteria with stable ids `c-1` and `c-2`.
#[must_use]
pub fn sample_criteria() -> Vec<AcceptanceCriterion> {
    vec![
        AcceptanceCriterion::new("c-1", "the loader is split into parse and validate"),
        AcceptanceCriterion::new("c-2", "validation errors carry field names"),
    ]
}

/// A report that meets every listed criterion.
#[must_use]
pub fn passing_report(criterion_ids: &[&str]) -> AuditReport {
    let mut criteria_assessment = BTreeMap::new();
    for id in criterion_ids {
        criteria_assessment.insert((*id).to_string(), assessment(true, "satisfied by the diff"));
    }
    AuditReport {
        severity: Severity::None,
        summary: "change matches the goal".into(),
        findings: Vec::new(),
        recommended_fix_prompt: None,
        criteria_assessment,
    }
}

/// A report that fails the listed criterion.
#[must_use]
pub fn failing_report(unmet_id: &str) -> AuditReport {
    let mut criteria_assessment = BTreeMap::new();
    criteria_assessment.insert(unmet_id.to_string(), assessment(false, "not addressed"));
    AuditReport {
        severity: Severity::Major,
        summary: "criterion unmet".into(),
        findings: vec![format!("{unmet_id} is not satisfied")],
        recommended_fix_prompt: Some("address the unmet criterion".into()),
        criteria_assessment,
    }
}

/// A repair job touching the given files.
#[must_use]
pub fn sample_job(id: &str, files: &[&str], priority: JobPriority) -> RepairJob {
    RepairJob {
        id: id.to_string(),
        files: files.iter().map(|f| (*f).to_string()).collect(),
        prompt: format!("repair {id}"),
        priority,
        estimated_impact: None,
    }
}

/// A confident cascade decomposition over the given jobs.
#[must_use]
pub fn sample_analysis(jobs: Vec<RepairJob>, confidence: f64) -> CascadeAnalysis {
    CascadeAnalysis {
        is_cascade: true,
        core_files_changed: vec!["core/schema.rs".into()],
        downstream_files: jobs.iter().flat_map(|j| j.files.clone()).collect(),
        repair_jobs: jobs,
        summary: "schema change ripples into consumers".into(),
        confidence,
    }
}

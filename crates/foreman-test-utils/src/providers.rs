//! Scripted provider doubles.

use std::collections::{HashMap, VecDeque};
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Mutex;

use async_trait::async_trait;

use foreman_core::{
    AgentHandle, AgentProvider, AgentSnapshot, AgentSpec, AgentStatus, AuditReport, AuditorOracle,
    CascadeAnalysis, CriterionAssessment, DecomposeInput, Error, RepoRef, Result, ReviewInput,
    Severity, VcsProvider,
};

/// Scripted auditor oracle.
///
/// Reviews pop from a queue; an empty queue returns a clean report.
/// Every input is recorded for assertions.
#[derive(Default)]
pub struct StubAuditor {
    reports: Mutex<VecDeque<AuditReport>>,
    analyses: Mutex<VecDeque<CascadeAnalysis>>,
    review_inputs: Mutex<Vec<ReviewInput>>,
    decompose_inputs: Mutex<Vec<DecomposeInput>>,
    fail_reviews: AtomicBool,
}

impl StubAuditor {
    /// Creates an auditor that passes everything.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Enqueues the next review report.
    pub fn push_report(&self, report: AuditReport) {
        self.reports.lock().expect("lock").push_back(report);
    }

    /// Enqueues the next decomposition.
    pub fn push_analysis(&self, analysis: CascadeAnalysis) {
        self.analyses.lock().expect("lock").push_back(analysis);
    }

    /// Makes every subsequent review call fail with a provider error.
    pub fn fail_reviews(&self, fail: bool) {
        self.fail_reviews.store(fail, Ordering::SeqCst);
    }

    /// Number of review calls the engine made.
    #[must_use]
    pub fn review_calls(&self) -> usize {
        self.review_inputs.lock().expect("lock").len()
    }

    /// The recorded review inputs.
    #[must_use]
    pub fn review_inputs(&self) -> Vec<ReviewInput> {
        self.review_inputs.lock().expect("lock").clone()
    }

    /// Number of decompose calls the engine made.
    #[must_use]
    pub fn decompose_calls(&self) -> usize {
        self.decompose_inputs.lock().expect("lock").len()
    }
}

#[async_trait]
impl AuditorOracle for StubAuditor {
    async fn review(&self, input: ReviewInput) -> Result<AuditReport> {
        self.review_inputs.lock().expect("lock").push(input);
        if self.fail_reviews.load(Ordering::SeqCst) {
            return Err(Error::provider("auditor", "scripted failure"));
        }
        Ok(self
            .reports
            .lock()
            .expect("lock")
            .pop_front()
            .unwrap_or_else(|| AuditReport {
                severity: Severity::None,
                summary: "looks fine".into(),
                findings: Vec::new(),
                recommended_fix_prompt: None,
                criteria_assessment: std::collections::BTreeMap::new(),
            }))
    }

    async fn decompose(&self, input: DecomposeInput) -> Result<CascadeAnalysis> {
        self.decompose_inputs.lock().expect("lock").push(input);
        Ok(self
            .analyses
            .lock()
            .expect("lock")
            .pop_front()
            .unwrap_or_else(|| CascadeAnalysis {
                is_cascade: false,
                core_files_changed: Vec::new(),
                downstream_files: Vec::new(),
                repair_jobs: Vec::new(),
                summary: "no cascade".into(),
                confidence: 1.0,
            }))
    }
}

/// Scripted Agent Provider.
///
/// Accepts every create with sequential ids unless told to reject.
#[derive(Default)]
pub struct StubAgents {
    counter: AtomicU64,
    reject_creates: AtomicBool,
    snapshots: Mutex<HashMap<String, AgentSnapshot>>,
    created: Mutex<Vec<AgentSpec>>,
}

impl StubAgents {
    /// Creates a provider that accepts everything.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Makes every subsequent create call fail.
    pub fn reject_creates(&self, reject: bool) {
        self.reject_creates.store(reject, Ordering::SeqCst);
    }

    /// Scripts the snapshot returned for one agent.
    pub fn set_snapshot(&self, agent_id: impl Into<String>, snapshot: AgentSnapshot) {
        self.snapshots
            .lock()
            .expect("lock")
            .insert(agent_id.into(), snapshot);
    }

    /// The recorded create specs.
    #[must_use]
    pub fn created(&self) -> Vec<AgentSpec> {
        self.created.lock().expect("lock").clone()
    }

    /// Number of agents created.
    #[must_use]
    pub fn create_calls(&self) -> usize {
        self.created.lock().expect("lock").len()
    }
}

#[async_trait]
impl AgentProvider for StubAgents {
    async fn create_agent(&self, spec: AgentSpec) -> Result<AgentHandle> {
        self.created.lock().expect("lock").push(spec);
        if self.reject_creates.load(Ordering::SeqCst) {
            return Err(Error::provider("agents", "scripted rejection"));
        }
        let n = self.counter.fetch_add(1, Ordering::SeqCst) + 1;
        Ok(AgentHandle {
            id: format!("agent-{n}"),
            url: format!("https://agents.test/runs/{n}"),
        })
    }

    async fn get_agent(&self, agent_id: &str) -> Result<AgentSnapshot> {
        Ok(self
            .snapshots
            .lock()
            .expect("lock")
            .get(agent_id)
            .cloned()
            .unwrap_or(AgentSnapshot {
                status: AgentStatus::Running,
                url: None,
                change_proposal_url: None,
            }))
    }
}

/// Scripted VCS Provider.
///
/// Serves one configurable diff and log body and records every comment.
pub struct StubVcs {
    diff: Mutex<String>,
    logs: Mutex<String>,
    comments: Mutex<Vec<(String, String)>>,
}

impl Default for StubVcs {
    fn default() -> Self {
        Self {
            diff: Mutex::new("--- a/src/lib.rs\n+++ b/src/lib.rs\n+fn main() {}\n".into()),
            logs: Mutex::new(String::new()),
            comments: Mutex::new(Vec::new()),
        }
    }
}

impl StubVcs {
    /// Creates a provider with a non-empty default diff.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Scripts the diff every fetch returns.
    pub fn set_diff(&self, diff: impl Into<String>) {
        *self.diff.lock().expect("lock") = diff.into();
    }

    /// Scripts the log body every fetch returns.
    pub fn set_logs(&self, logs: impl Into<String>) {
        *self.logs.lock().expect("lock") = logs.into();
    }

    /// The recorded comments as `(target, body)` pairs.
    #[must_use]
    pub fn comments(&self) -> Vec<(String, String)> {
        self.comments.lock().expect("lock").clone()
    }
}

#[async_trait]
impl VcsProvider for StubVcs {
    async fn commit_diff(&self, _repo: &RepoRef, _sha: &str) -> Result<String> {
        Ok(self.diff.lock().expect("lock").clone())
    }

    async fn pull_request_diff(&self, _repo: &RepoRef, _number: u64) -> Result<String> {
        Ok(self.diff.lock().expect("lock").clone())
    }

    async fn check_run_logs(&self, _repo: &RepoRef, _job_id: u64) -> Result<String> {
        Ok(self.logs.lock().expect("lock").clone())
    }

    async fn post_pull_request_comment(
        &self,
        _repo: &RepoRef,
        number: u64,
        body: &str,
    ) -> Result<()> {
        self.comments
            .lock()
            .expect("lock")
            .push((format!("pr/{number}"), body.to_string()));
        Ok(())
    }

    async fn post_commit_comment(&self, _repo: &RepoRef, sha: &str, body: &str) -> Result<()> {
        self.comments
            .lock()
            .expect("lock")
            .push((format!("commit/{sha}"), body.to_string()));
        Ok(())
    }
}

/// Builds a criterion assessment quickly.
#[must_use]
pub(crate) fn assessment(met: bool, reasoning: &str) -> CriterionAssessment {
    CriterionAssessment {
        met,
        reasoning: Some(reasoning.to_string()),
        evidence_files: Vec::new(),
    }
}

//! The cascade engine: blast-radius analysis and parallel repair
//! dispatch.
//!
//! A push that touches a configured core file gets decomposed by the
//! auditor into disjoint repair jobs, each dispatched as its own session
//! under the lock discipline. The engine enforces job disjointness, the
//! confidence floor, and the parallelism cap no matter what the oracle
//! returns.

use std::collections::BTreeSet;
use std::time::Instant;

use chrono::Utc;
use serde::{Deserialize, Serialize};

use foreman_core::{
    AcceptanceCriterion, Cascade, CascadeId, CascadeStatus, DecomposeInput, DispatchTelemetry,
    Error, Goal, GoalId, GoalStatus, JobPriority, RepairJob, RepoRef, Result, SessionId,
    SessionSpec, SessionStatus,
};
use foreman_registry::{LockConflict, RegistryStore};

use crate::lifecycle::{commit, DispatchResult};
use crate::Engine;

/// Inputs for one cascade analysis.
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CascadeRequest {
    /// Repository, `owner/repo`.
    pub source_repo: String,
    /// Branch repair sessions merge into.
    pub base_branch: String,
    /// The commit whose change set is analyzed.
    pub commit_sha: String,
    /// Every path the commit changed.
    pub changed_paths: Vec<String>,
    /// Goal the repairs belong to. A synthetic goal is created when
    /// absent.
    #[serde(default)]
    pub goal_id: Option<GoalId>,
    /// The session whose push triggered the analysis, when known.
    #[serde(default)]
    pub trigger_session_id: Option<SessionId>,
}

/// One session the cascade dispatch produced.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct DispatchedSession {
    /// The repair job the session executes.
    pub job_id: String,
    /// The session.
    pub session_id: SessionId,
    /// The session's working branch.
    pub branch_name: String,
    /// Session status after dispatch.
    pub status: SessionStatus,
    /// Agent URL, when the provider accepted.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub agent_url: Option<String>,
    /// Failure detail, when dispatch failed.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

/// The cascade analysis response.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct CascadeResponse {
    /// Whether the change set intersected the core files and the oracle
    /// judged the change cascading.
    pub is_cascade: bool,
    /// The recorded cascade, when analysis ran.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub cascade_id: Option<CascadeId>,
    /// Cascade status after dispatch.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub status: Option<CascadeStatus>,
    /// Oracle summary, or a reason the cascade did not run.
    pub summary: String,
    /// Oracle confidence, when analysis ran.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub confidence: Option<f64>,
    /// Per-job dispatch results.
    pub dispatched_sessions: Vec<DispatchedSession>,
    /// Contested paths across all conflicting jobs.
    pub lock_conflicts: Vec<LockConflict>,
    /// Dispatch telemetry, when a dispatch pass ran.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub telemetry: Option<DispatchTelemetry>,
}

impl CascadeResponse {
    fn not_triggered(summary: impl Into<String>) -> Self {
        Self {
            is_cascade: false,
            cascade_id: None,
            status: None,
            summary: summary.into(),
            confidence: None,
            dispatched_sessions: Vec::new(),
            lock_conflicts: Vec::new(),
            telemetry: None,
        }
    }

    /// Returns true when nothing was dispatched and at least one job hit
    /// a lock conflict, the condition surfaced to callers as a conflict.
    #[must_use]
    pub fn is_conflict(&self) -> bool {
        self.telemetry
            .is_some_and(|t| t.dispatched_count == 0 && t.conflict_count > 0)
    }
}

/// One job of an operator-authored batch.
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct BatchJob {
    /// Job identifier; generated when absent.
    #[serde(default)]
    pub id: Option<String>,
    /// The prompt handed to the agent.
    pub prompt: String,
    /// Files the job may touch.
    pub files: Vec<String>,
    /// Scheduling priority.
    #[serde(default)]
    pub priority: Option<JobPriority>,
}

/// An operator-authored batch dispatch.
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct BatchRequest {
    /// Repository, `owner/repo`.
    pub source_repo: String,
    /// Branch repair sessions merge into.
    pub base_branch: String,
    /// Goal the jobs belong to. A synthetic goal is created when absent.
    #[serde(default)]
    pub goal_id: Option<GoalId>,
    /// The jobs to dispatch.
    pub jobs: Vec<BatchJob>,
}

/// The batch dispatch response.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct BatchResponse {
    /// The cascade grouping the batch.
    pub batch_id: CascadeId,
    /// Jobs whose agent started.
    pub dispatched_count: usize,
    /// Jobs that failed for any reason.
    pub failed_count: usize,
    /// Per-job results.
    pub sessions: Vec<DispatchedSession>,
    /// Contested paths across all conflicting jobs.
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub lock_conflicts: Vec<LockConflict>,
    /// Dispatch telemetry.
    pub telemetry: DispatchTelemetry,
}

impl Engine {
    /// Runs blast-radius analysis for a commit and dispatches the
    /// surviving repair jobs in parallel.
    ///
    /// # Errors
    ///
    /// Returns provider errors from the diff fetch or the oracle, and
    /// storage errors.
    pub async fn analyze_commit(&self, request: CascadeRequest) -> Result<CascadeResponse> {
        let core_changed: Vec<String> = request
            .changed_paths
            .iter()
            .filter(|p| self.config().core_files.is_core_file(p))
            .cloned()
            .collect();
        if core_changed.is_empty() {
            return Ok(CascadeResponse::not_triggered("no core files touched"));
        }

        let repo = RepoRef::parse(&request.source_repo)?;
        let diff = self.vcs.commit_diff(&repo, &request.commit_sha).await?;
        let analysis = tokio::time::timeout(
            self.config().analysis_timeout,
            self.auditor.decompose(DecomposeInput {
                source_repo: request.source_repo.clone(),
                core_file_diffs: vec![diff],
                changed_paths: request.changed_paths.clone(),
            }),
        )
        .await
        .map_err(|_| Error::provider("auditor", "cascade analysis timed out"))??;

        let mut cascade = Cascade::new(request.trigger_session_id, core_changed);
        cascade.downstream_files = analysis.downstream_files.clone();
        cascade.summary = analysis.summary.clone();

        if !analysis.is_cascade {
            cascade.status = CascadeStatus::Failed;
            self.record_cascade(&cascade).await?;
            return Ok(CascadeResponse {
                is_cascade: false,
                cascade_id: Some(cascade.id),
                status: Some(CascadeStatus::Failed),
                summary: analysis.summary,
                confidence: Some(analysis.confidence),
                dispatched_sessions: Vec::new(),
                lock_conflicts: Vec::new(),
                telemetry: None,
            });
        }
        if analysis.confidence < self.config().min_confidence {
            // Recorded for the operator, never dispatched.
            cascade.status = CascadeStatus::Failed;
            self.record_cascade(&cascade).await?;
            tracing::info!(
                cascade = %cascade.id,
                confidence = analysis.confidence,
                floor = self.config().min_confidence,
                "cascade discarded below confidence floor"
            );
            return Ok(CascadeResponse {
                is_cascade: true,
                cascade_id: Some(cascade.id),
                status: Some(CascadeStatus::Failed),
                summary: format!(
                    "discarded: confidence {:.2} below floor {:.2}",
                    analysis.confidence,
                    self.config().min_confidence
                ),
                confidence: Some(analysis.confidence),
                dispatched_sessions: Vec::new(),
                lock_conflicts: Vec::new(),
                telemetry: None,
            });
        }

        let jobs = normalize_jobs(analysis.repair_jobs, self.config().max_parallel_agents);
        cascade.repair_job_count = jobs.len();
        self.record_cascade(&cascade).await?;

        let goal_id = self
            .resolve_goal(request.goal_id, &cascade, &jobs)
            .await?;

        let (sessions, conflicts, telemetry) = self
            .dispatch_jobs(&request, cascade.id, goal_id, jobs)
            .await?;

        let status = if telemetry.dispatched_count > 0 {
            CascadeStatus::Dispatched
        } else {
            CascadeStatus::Failed
        };
        let mut tx = self.store().begin().await?;
        cascade.status = status;
        cascade.telemetry = Some(telemetry);
        cascade.updated_at = Utc::now();
        RegistryStore::update_cascade(&mut tx, &cascade).await?;
        commit(tx).await?;

        Ok(CascadeResponse {
            is_cascade: true,
            cascade_id: Some(cascade.id),
            status: Some(status),
            summary: analysis.summary,
            confidence: Some(analysis.confidence),
            dispatched_sessions: sessions,
            lock_conflicts: conflicts,
            telemetry: Some(telemetry),
        })
    }

    /// Dispatches an operator-authored batch of jobs under one cascade.
    ///
    /// # Errors
    ///
    /// Returns `InvalidInput` for an empty batch and storage errors.
    pub async fn dispatch_batch(&self, request: BatchRequest) -> Result<BatchResponse> {
        if request.jobs.is_empty() {
            return Err(Error::InvalidInput("batch has no jobs".into()));
        }

        let jobs: Vec<RepairJob> = request
            .jobs
            .iter()
            .enumerate()
            .map(|(i, job)| RepairJob {
                id: job.id.clone().unwrap_or_else(|| format!("job-{}", i + 1)),
                files: job.files.clone(),
                prompt: job.prompt.clone(),
                priority: job.priority.unwrap_or(JobPriority::Medium),
                estimated_impact: None,
            })
            .collect();
        let jobs = normalize_jobs(jobs, self.config().max_parallel_agents);

        let mut cascade = Cascade::new(None, Vec::new());
        cascade.summary = format!("operator batch of {} jobs", jobs.len());
        cascade.repair_job_count = jobs.len();
        self.record_cascade(&cascade).await?;

        let goal_id = self.resolve_goal(request.goal_id, &cascade, &jobs).await?;

        let cascade_request = CascadeRequest {
            source_repo: request.source_repo,
            base_branch: request.base_branch,
            commit_sha: String::new(),
            changed_paths: Vec::new(),
            goal_id: Some(goal_id),
            trigger_session_id: None,
        };
        let (sessions, conflicts, telemetry) = self
            .dispatch_jobs(&cascade_request, cascade.id, goal_id, jobs)
            .await?;

        let mut tx = self.store().begin().await?;
        cascade.status = if telemetry.dispatched_count > 0 {
            CascadeStatus::Dispatched
        } else {
            CascadeStatus::Failed
        };
        cascade.telemetry = Some(telemetry);
        cascade.updated_at = Utc::now();
        RegistryStore::update_cascade(&mut tx, &cascade).await?;
        commit(tx).await?;

        Ok(BatchResponse {
            batch_id: cascade.id,
            dispatched_count: telemetry.dispatched_count,
            failed_count: telemetry.failed_count,
            sessions,
            lock_conflicts: conflicts,
            telemetry,
        })
    }

    /// Dispatches the jobs in parallel and aggregates telemetry.
    async fn dispatch_jobs(
        &self,
        request: &CascadeRequest,
        cascade_id: CascadeId,
        goal_id: GoalId,
        jobs: Vec<RepairJob>,
    ) -> Result<(Vec<DispatchedSession>, Vec<LockConflict>, DispatchTelemetry)> {
        let started = Instant::now();
        let futures = jobs.into_iter().map(|job| {
            let engine = self.clone();
            let source_repo = request.source_repo.clone();
            let base_branch = request.base_branch.clone();
            async move {
                let branch_name = format!("foreman/cascade/{cascade_id}/{}", job.id);
                let spec = SessionSpec {
                    goal_id: Some(goal_id),
                    cascade_id: Some(cascade_id),
                    source_repo,
                    branch_name,
                    base_branch,
                    remediation_depth: 0,
                };
                let result = engine
                    .dispatch_session(spec, &job.files, &job.prompt, job.estimated_impact.clone())
                    .await;
                (job.id, result)
            }
        });
        let results = futures::future::join_all(futures).await;

        let mut sessions = Vec::new();
        let mut conflicts = Vec::new();
        let mut telemetry = DispatchTelemetry::default();
        for (job_id, result) in results {
            match result? {
                DispatchResult::Dispatched(session) => {
                    telemetry.dispatched_count += 1;
                    sessions.push(DispatchedSession {
                        job_id,
                        session_id: session.id,
                        branch_name: session.branch_name,
                        status: session.status,
                        agent_url: session.external_agent_url,
                        error: None,
                    });
                }
                DispatchResult::Conflict {
                    session,
                    conflicts: job_conflicts,
                } => {
                    telemetry.conflict_count += 1;
                    telemetry.failed_count += 1;
                    conflicts.extend(job_conflicts);
                    sessions.push(DispatchedSession {
                        job_id,
                        session_id: session.id,
                        branch_name: session.branch_name,
                        status: session.status,
                        agent_url: None,
                        error: session.last_error,
                    });
                }
                DispatchResult::Rejected { session, error } => {
                    telemetry.failed_count += 1;
                    sessions.push(DispatchedSession {
                        job_id,
                        session_id: session.id,
                        branch_name: session.branch_name,
                        status: session.status,
                        agent_url: None,
                        error: Some(error),
                    });
                }
            }
        }
        telemetry.dispatch_latency_ms = started.elapsed().as_millis() as u64;
        crate::metrics::record_dispatch(&telemetry);
        Ok((sessions, conflicts, telemetry))
    }

    async fn record_cascade(&self, cascade: &Cascade) -> Result<()> {
        let mut tx = self.store().begin().await?;
        RegistryStore::insert_cascade(&mut tx, cascade).await?;
        commit(tx).await
    }

    /// Uses the supplied goal or synthesizes one whose criteria are the
    /// repair prompts.
    async fn resolve_goal(
        &self,
        goal_id: Option<GoalId>,
        cascade: &Cascade,
        jobs: &[RepairJob],
    ) -> Result<GoalId> {
        if let Some(goal_id) = goal_id {
            return Ok(goal_id);
        }
        let mut goal = Goal::new(
            format!("Cascade repair {}", cascade.id),
            cascade.summary.clone(),
            jobs.iter()
                .map(|job| AcceptanceCriterion::new(job.id.clone(), job.prompt.clone()))
                .collect(),
        );
        goal.status = GoalStatus::InProgress;
        let mut tx = self.store().begin().await?;
        RegistryStore::insert_goal(&mut tx, &goal).await?;
        commit(tx).await?;
        Ok(goal.id)
    }
}

/// Applies the engine-side invariants to the oracle's job list:
/// priority-first ordering, pairwise-disjoint file sets, and the
/// parallelism cap.
fn normalize_jobs(jobs: Vec<RepairJob>, max_parallel: usize) -> Vec<RepairJob> {
    let mut ordered: Vec<(usize, RepairJob)> = jobs.into_iter().enumerate().collect();
    ordered.sort_by_key(|(index, job)| (job.priority, *index));

    let mut seen = BTreeSet::new();
    let mut survivors = Vec::new();
    for (_, mut job) in ordered {
        job.files.retain(|path| seen.insert(path.clone()));
        if job.files.is_empty() {
            continue;
        }
        survivors.push(job);
        if survivors.len() == max_parallel {
            break;
        }
    }
    survivors
}

#[cfg(test)]
mod tests {
    use super::*;

    fn job(id: &str, files: &[&str], priority: JobPriority) -> RepairJob {
        RepairJob {
            id: id.into(),
            files: files.iter().map(|f| (*f).to_string()).collect(),
            prompt: format!("repair {id}"),
            priority,
            estimated_impact: None,
        }
    }

    #[test]
    fn duplicate_paths_stay_with_the_higher_priority_job() {
        let jobs = vec![
            job("low", &["a.rs", "b.rs"], JobPriority::Low),
            job("high", &["a.rs"], JobPriority::High),
        ];
        let normalized = normalize_jobs(jobs, 5);
        assert_eq!(normalized.len(), 2);
        assert_eq!(normalized[0].id, "high");
        assert_eq!(normalized[0].files, vec!["a.rs".to_string()]);
        assert_eq!(normalized[1].files, vec!["b.rs".to_string()]);
    }

    #[test]
    fn equal_priority_ties_break_by_list_order() {
        let jobs = vec![
            job("first", &["a.rs"], JobPriority::Medium),
            job("second", &["a.rs", "b.rs"], JobPriority::Medium),
        ];
        let normalized = normalize_jobs(jobs, 5);
        assert_eq!(normalized[0].id, "first");
        assert_eq!(normalized[1].files, vec!["b.rs".to_string()]);
    }

    #[test]
    fn jobs_emptied_by_dedup_are_dropped() {
        let jobs = vec![
            job("keeper", &["a.rs"], JobPriority::High),
            job("shadowed", &["a.rs"], JobPriority::Low),
        ];
        let normalized = normalize_jobs(jobs, 5);
        assert_eq!(normalized.len(), 1);
        assert_eq!(normalized[0].id, "keeper");
    }

    #[test]
    fn cap_keeps_the_highest_priority_jobs() {
        let jobs = vec![
            job("l1", &["a.rs"], JobPriority::Low),
            job("h1", &["b.rs"], JobPriority::High),
            job("m1", &["c.rs"], JobPriority::Medium),
            job("h2", &["d.rs"], JobPriority::High),
        ];
        let normalized = normalize_jobs(jobs, 2);
        let ids: Vec<&str> = normalized.iter().map(|j| j.id.as_str()).collect();
        assert_eq!(ids, vec!["h1", "h2"]);
    }

    #[test]
    fn normalized_job_files_are_pairwise_disjoint() {
        let jobs = vec![
            job("a", &["x.rs", "y.rs"], JobPriority::Medium),
            job("b", &["y.rs", "z.rs"], JobPriority::Medium),
            job("c", &["z.rs", "x.rs"], JobPriority::Low),
        ];
        let normalized = normalize_jobs(jobs, 5);
        let mut seen = BTreeSet::new();
        for job in &normalized {
            for file in &job.files {
                assert!(seen.insert(file.clone()), "{file} appears twice");
            }
        }
    }
}

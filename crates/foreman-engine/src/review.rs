//! The review and remediation loop.
//!
//! Every push or change-proposal event for a branch with a live session
//! lands here: fetch the diff, ask the auditor, merge its per-criterion
//! assessment into the goal, and either complete the session or spawn a
//! bounded repair child that inherits the parent's locks atomically.

use chrono::Utc;
use serde::Serialize;

use foreman_core::{
    AgentSpec, AuditReport, Cascade, CascadeStatus, Error, GoalId, RepoRef, Result, ReviewArtifact,
    ReviewInput, Session, SessionId, SessionSpec, SessionStatus, Severity,
};
use foreman_registry::{LockManager, RegistryStore};

use crate::events::PushEvent;
use crate::lifecycle::commit;
use crate::Engine;

/// Upper bound on the CI log excerpt embedded in a remediation prompt.
const LOG_EXCERPT_LIMIT: usize = 4_000;

/// What set off a remediation pass.
#[derive(Debug, Clone)]
pub enum RemediationTrigger {
    /// The auditor failed the diff.
    ReviewFailure {
        /// Commit that failed review.
        commit_sha: String,
        /// The auditor's report, for the repair prompt.
        report: AuditReport,
    },
    /// A primary CI pipeline failed.
    CiFailure {
        /// Commit whose checks failed.
        commit_sha: String,
        /// Raw log tail, best-effort.
        log_excerpt: String,
    },
}

impl RemediationTrigger {
    fn commit_sha(&self) -> &str {
        match self {
            Self::ReviewFailure { commit_sha, .. } | Self::CiFailure { commit_sha, .. } => {
                commit_sha
            }
        }
    }

    fn short_reason(&self) -> &'static str {
        match self {
            Self::ReviewFailure { .. } => "review failed",
            Self::CiFailure { .. } => "primary CI failed",
        }
    }
}

/// How one remediation pass ended.
#[derive(Debug, Clone)]
pub enum RemediationOutcome {
    /// A child session now carries the parent's locks.
    ChildSpawned {
        /// The failed parent.
        parent: SessionId,
        /// The repair child.
        child: SessionId,
    },
    /// The parent sat at the depth bound; its goal drifted.
    DepthExhausted {
        /// The failed parent.
        parent: SessionId,
        /// The drifted goal, when the parent had one.
        goal: Option<GoalId>,
    },
}

/// Outcome of one review pass.
#[derive(Debug, Clone, Serialize)]
#[serde(tag = "outcome", rename_all = "snake_case")]
pub enum ReviewOutcome {
    /// No live session watches the branch.
    NoActiveSession,
    /// The commit was already reviewed.
    DuplicateCommitSkipped,
    /// The diff was empty.
    EmptyDiffSkipped,
    /// All assessed criteria met; the session completed.
    Completed {
        /// The completed session.
        session_id: SessionId,
    },
    /// The review failed; a repair child was spawned.
    RepairSpawned {
        /// The failed parent.
        session_id: SessionId,
        /// The child carrying the parent's locks.
        child_session_id: SessionId,
    },
    /// The review failed at maximum depth; the goal drifted.
    Drifted {
        /// The failed parent.
        session_id: SessionId,
    },
}

impl ReviewOutcome {
    /// Stable outcome string for webhook result payloads.
    #[must_use]
    pub fn as_result(&self) -> &'static str {
        match self {
            Self::NoActiveSession => "no_active_session",
            Self::DuplicateCommitSkipped => "duplicate_commit_skipped",
            Self::EmptyDiffSkipped => "empty_diff_skipped",
            Self::Completed { .. } => "completed",
            Self::RepairSpawned { .. } => "repair_spawned",
            Self::Drifted { .. } => "drifted",
        }
    }
}

/// Inputs for one review pass.
#[derive(Debug, Clone)]
pub struct ReviewRequest {
    /// Repository, `owner/repo`.
    pub source_repo: String,
    /// Branch under review.
    pub branch: String,
    /// Commit under review.
    pub commit_sha: String,
    /// Open change proposal, when known. Selects the proposal diff and
    /// the comment target.
    pub pr_number: Option<u64>,
    /// Proposal URL for the goal's artifact list, when known.
    pub artifact_url: Option<String>,
    /// Skips duplicate-commit suppression. Used by re-audit.
    pub force: bool,
}

impl ReviewRequest {
    /// Builds a review request from a push event.
    #[must_use]
    pub fn from_push(event: &PushEvent) -> Self {
        Self {
            source_repo: event.source_repo.clone(),
            branch: event.branch.clone(),
            commit_sha: event.commit.sha.clone(),
            pr_number: event.pr_number,
            artifact_url: None,
            force: false,
        }
    }
}

/// Result of re-running the auditor for a goal.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ReAuditResult {
    /// The goal whose criteria were refreshed.
    pub goal_id: GoalId,
    /// The commit that was re-audited.
    pub commit_sha: String,
    /// Severity the auditor returned.
    pub severity: Severity,
    /// Criteria still unmet after the merge.
    pub unmet_criteria: usize,
}

impl Engine {
    /// Runs one review pass for a commit on a branch.
    ///
    /// # Errors
    ///
    /// Returns provider errors from the diff fetch or the auditor; in
    /// that case no session state changed and redelivery is safe.
    pub async fn review_commit(&self, request: ReviewRequest) -> Result<ReviewOutcome> {
        // Step 1: locate the newest session for (repo, branch).
        // Duplicate suppression runs before the liveness check so a
        // redelivery after a completing review still reads as a
        // duplicate rather than no_active_session.
        let mut tx = self.store().begin().await?;
        let Some(session) =
            RegistryStore::latest_session(&mut tx, &request.source_repo, &request.branch).await?
        else {
            return Ok(ReviewOutcome::NoActiveSession);
        };
        if !request.force
            && session.last_reviewed_commit.as_deref() == Some(request.commit_sha.as_str())
        {
            return Ok(ReviewOutcome::DuplicateCommitSkipped);
        }
        if session.is_terminal() {
            return Ok(ReviewOutcome::NoActiveSession);
        }
        drop(tx);

        // Step 3: fetch the diff.
        let repo = RepoRef::parse(&request.source_repo)?;
        let diff = match request.pr_number {
            Some(number) => self.vcs.pull_request_diff(&repo, number).await?,
            None => self.vcs.commit_diff(&repo, &request.commit_sha).await?,
        };
        if diff.trim().is_empty() {
            return Ok(ReviewOutcome::EmptyDiffSkipped);
        }

        // Step 4: invoke the auditor with the goal's criteria.
        let criteria = match session.goal_id {
            Some(goal_id) => self
                .store()
                .goal(goal_id)
                .await?
                .map(|g| g.criteria)
                .unwrap_or_default(),
            None => Vec::new(),
        };
        let report = self
            .audit_with_timeout(ReviewInput {
                source_repo: request.source_repo.clone(),
                branch_name: request.branch.clone(),
                commit_sha: request.commit_sha.clone(),
                criteria,
                diff,
            })
            .await?;
        crate::metrics::record_review(&report);

        // Steps 5 and 7-10: merge the assessment and transition, in one
        // transaction keyed on a re-read of the session row.
        let outcome = self.apply_review(&request, session.id, &report).await?;

        // Step 6: the review comment, after the state committed so a
        // racing redelivery cannot double-post.
        if !matches!(
            outcome,
            ReviewOutcome::DuplicateCommitSkipped | ReviewOutcome::NoActiveSession
        ) {
            self.post_review_comment(&repo, &request, &report).await;
        }
        Ok(outcome)
    }

    /// Re-runs the auditor over a goal's last reviewed commit and
    /// refreshes the criteria, without touching session state.
    ///
    /// # Errors
    ///
    /// Returns `ResourceNotFound` when the goal does not exist or has no
    /// reviewed session, and provider errors from the auditor.
    pub async fn re_audit_goal(&self, goal_id: GoalId) -> Result<ReAuditResult> {
        let goal = self
            .store()
            .goal(goal_id)
            .await?
            .ok_or_else(|| Error::resource_not_found("goal", goal_id))?;
        let session = self
            .store()
            .latest_reviewed_session_for_goal(goal_id)
            .await?
            .ok_or_else(|| Error::PreconditionFailed {
                message: format!("goal {goal_id} has no reviewed commit to re-audit"),
            })?;
        let commit_sha = session
            .last_reviewed_commit
            .clone()
            .unwrap_or_default();

        let repo = RepoRef::parse(&session.source_repo)?;
        let diff = self.vcs.commit_diff(&repo, &commit_sha).await?;
        let report = self
            .audit_with_timeout(ReviewInput {
                source_repo: session.source_repo.clone(),
                branch_name: session.branch_name.clone(),
                commit_sha: commit_sha.clone(),
                criteria: goal.criteria.clone(),
                diff,
            })
            .await?;
        crate::metrics::record_review(&report);

        let mut tx = self.store().begin().await?;
        let mut unmet = 0;
        if let Some(mut goal) = RegistryStore::goal_for_update(&mut tx, goal_id).await? {
            goal.merge_assessment(&report.criteria_assessment);
            unmet = goal.criteria.iter().filter(|c| !c.met).count();
            RegistryStore::update_goal(&mut tx, &goal).await?;
        }
        commit(tx).await?;

        Ok(ReAuditResult {
            goal_id,
            commit_sha,
            severity: report.severity,
            unmet_criteria: unmet,
        })
    }

    /// Fails the parent and, depth permitting, spawns a repair child
    /// that inherits the parent's locks in the spawn transaction.
    ///
    /// The Agent Provider call happens after the transaction commits. If
    /// that call fails the child goes failed with its inherited locks
    /// still held, preserving exclusivity until the operator terminates
    /// the child.
    pub(crate) async fn remediate(
        &self,
        parent: Session,
        trigger: RemediationTrigger,
    ) -> Result<RemediationOutcome> {
        if parent.remediation_depth >= self.config().max_remediation_depth {
            return self.exhaust_remediation(parent, &trigger).await;
        }

        let mut tx = self.store().begin().await?;
        let Some(mut parent) = RegistryStore::session_for_update(&mut tx, parent.id).await? else {
            return Err(Error::resource_not_found("session", parent.id));
        };

        // Inherit the parent's cascade, or group stray remediation under
        // a fresh one so lineage stays observable.
        let cascade_id = match parent.cascade_id {
            Some(id) => id,
            None => {
                let mut cascade = Cascade::new(Some(parent.id), Vec::new());
                cascade.summary = format!("auto-remediation of {}", parent.branch_name);
                cascade.status = CascadeStatus::Dispatched;
                cascade.repair_job_count = 1;
                RegistryStore::insert_cascade(&mut tx, &cascade).await?;
                cascade.id
            }
        };

        let child = Session::from_spec(SessionSpec {
            goal_id: parent.goal_id,
            cascade_id: Some(cascade_id),
            source_repo: parent.source_repo.clone(),
            branch_name: parent.branch_name.clone(),
            base_branch: parent.base_branch.clone(),
            remediation_depth: parent.remediation_depth + 1,
        });
        RegistryStore::insert_session(&mut tx, &child).await?;
        let moved = LockManager::transfer(&mut tx, parent.id, child.id).await?;

        parent.status = SessionStatus::Failed;
        parent.last_error = Some(trigger.short_reason().to_string());
        parent.last_reviewed_commit = Some(trigger.commit_sha().to_string());
        parent.updated_at = Utc::now();
        RegistryStore::update_session(&mut tx, &parent).await?;
        commit(tx).await?;

        tracing::info!(
            parent = %parent.id,
            child = %child.id,
            depth = child.remediation_depth,
            locks = moved,
            "repair child spawned"
        );

        // Agent dispatch sits outside the spawn transaction.
        let prompt = build_remediation_prompt(&parent, &trigger);
        let mut child = child;
        match self
            .agents
            .create_agent(AgentSpec {
                prompt,
                source_repo: child.source_repo.clone(),
                starting_branch: child.branch_name.clone(),
                context: None,
            })
            .await
        {
            Ok(handle) => {
                let mut tx = self.store().begin().await?;
                child.external_agent_id = Some(handle.id);
                child.external_agent_url = Some(handle.url);
                child.status = SessionStatus::Executing;
                child.updated_at = Utc::now();
                RegistryStore::update_session(&mut tx, &child).await?;
                commit(tx).await?;
            }
            Err(err) => {
                // The lock transfer stays in place so the files remain
                // reserved for the operator's manual repair.
                self.fail_session(&mut child, err.to_string(), false).await?;
            }
        }

        Ok(RemediationOutcome::ChildSpawned {
            parent: parent.id,
            child: child.id,
        })
    }

    /// Terminal remediation: the parent fails, its locks release, and
    /// its goal drifts.
    async fn exhaust_remediation(
        &self,
        parent: Session,
        trigger: &RemediationTrigger,
    ) -> Result<RemediationOutcome> {
        let mut tx = self.store().begin().await?;
        let Some(mut parent) = RegistryStore::session_for_update(&mut tx, parent.id).await? else {
            return Err(Error::resource_not_found("session", parent.id));
        };
        parent.status = SessionStatus::Failed;
        parent.last_error = Some(format!(
            "ManualInterventionRequired: {} at remediation depth {}",
            trigger.short_reason(),
            parent.remediation_depth
        ));
        parent.last_reviewed_commit = Some(trigger.commit_sha().to_string());
        parent.updated_at = Utc::now();
        RegistryStore::update_session(&mut tx, &parent).await?;
        LockManager::release_in(&mut tx, parent.id).await?;

        let goal = parent.goal_id;
        if let Some(goal_id) = goal {
            if let Some(mut goal) = RegistryStore::goal_for_update(&mut tx, goal_id).await? {
                if !goal.status.is_terminal() {
                    goal.status = foreman_core::GoalStatus::Drifted;
                    goal.updated_at = Utc::now();
                    RegistryStore::update_goal(&mut tx, &goal).await?;
                }
            }
        }
        commit(tx).await?;
        tracing::warn!(parent = %parent.id, "remediation exhausted, goal drifted");
        Ok(RemediationOutcome::DepthExhausted {
            parent: parent.id,
            goal,
        })
    }

    /// Merges the assessment and applies the resulting transition, all
    /// keyed on a fresh read of the session row so a racing redelivery
    /// collapses into `DuplicateCommitSkipped`.
    async fn apply_review(
        &self,
        request: &ReviewRequest,
        session_id: SessionId,
        report: &AuditReport,
    ) -> Result<ReviewOutcome> {
        let mut tx = self.store().begin().await?;
        let Some(mut session) = RegistryStore::session_for_update(&mut tx, session_id).await?
        else {
            return Ok(ReviewOutcome::NoActiveSession);
        };
        if session.is_terminal() {
            return Ok(ReviewOutcome::NoActiveSession);
        }
        if !request.force
            && session.last_reviewed_commit.as_deref() == Some(request.commit_sha.as_str())
        {
            return Ok(ReviewOutcome::DuplicateCommitSkipped);
        }

        // Step 5: merge the assessment under the goal's row.
        if let Some(goal_id) = session.goal_id {
            if let Some(mut goal) = RegistryStore::goal_for_update(&mut tx, goal_id).await? {
                goal.merge_assessment(&report.criteria_assessment);
                RegistryStore::update_goal(&mut tx, &goal).await?;
            }
        }

        if report.is_failure() {
            // The remediation path owns the rest of the transition; it
            // re-reads the session in its own transaction.
            commit(tx).await?;
            let trigger = RemediationTrigger::ReviewFailure {
                commit_sha: request.commit_sha.clone(),
                report: report.clone(),
            };
            return match self.remediate(session, trigger).await? {
                RemediationOutcome::ChildSpawned { parent, child } => {
                    Ok(ReviewOutcome::RepairSpawned {
                        session_id: parent,
                        child_session_id: child,
                    })
                }
                RemediationOutcome::DepthExhausted { parent, .. } => {
                    Ok(ReviewOutcome::Drifted { session_id: parent })
                }
            };
        }

        // Step 10: success. Complete the session and release its locks.
        session.status = SessionStatus::Completed;
        session.last_reviewed_commit = Some(request.commit_sha.clone());
        session.updated_at = Utc::now();
        if let (Some(goal_id), Some(url)) = (session.goal_id, &request.artifact_url) {
            Self::attach_artifact(
                &mut tx,
                goal_id,
                ReviewArtifact {
                    url: url.clone(),
                    session_id: session.id,
                    agent_id: session.external_agent_id.clone(),
                },
            )
            .await?;
        }
        RegistryStore::update_session(&mut tx, &session).await?;
        LockManager::release_in(&mut tx, session.id).await?;
        commit(tx).await?;
        Ok(ReviewOutcome::Completed {
            session_id: session.id,
        })
    }

    async fn audit_with_timeout(&self, input: ReviewInput) -> Result<AuditReport> {
        tokio::time::timeout(self.config().review_timeout, self.auditor.review(input))
            .await
            .map_err(|_| Error::provider("auditor", "review timed out"))?
    }

    /// Posts the review comment. Best-effort: a comment failure never
    /// rolls back a committed review.
    async fn post_review_comment(&self, repo: &RepoRef, request: &ReviewRequest, report: &AuditReport) {
        let body = compose_review_comment(report);
        let posted = match request.pr_number {
            Some(number) => self.vcs.post_pull_request_comment(repo, number, &body).await,
            None => {
                self.vcs
                    .post_commit_comment(repo, &request.commit_sha, &body)
                    .await
            }
        };
        if let Err(err) = posted {
            tracing::warn!(error = %err, commit = %request.commit_sha, "review comment failed");
        }
    }
}

/// Renders the auditor's report as a review comment.
fn compose_review_comment(report: &AuditReport) -> String {
    let mut body = format!(
        "## Automated review\n\n**Severity:** {:?}\n\n{}\n",
        report.severity, report.summary
    );
    if !report.findings.is_empty() {
        body.push_str("\n### Findings\n");
        for finding in &report.findings {
            body.push_str("- ");
            body.push_str(finding);
            body.push('\n');
        }
    }
    if !report.criteria_assessment.is_empty() {
        body.push_str("\n### Criteria\n");
        for (id, assessment) in &report.criteria_assessment {
            let mark = if assessment.met { "x" } else { " " };
            body.push_str(&format!("- [{mark}] {id}"));
            if let Some(reasoning) = &assessment.reasoning {
                body.push_str(": ");
                body.push_str(reasoning);
            }
            body.push('\n');
        }
    }
    body
}

/// Builds the prompt handed to a repair agent.
fn build_remediation_prompt(parent: &Session, trigger: &RemediationTrigger) -> String {
    match trigger {
        RemediationTrigger::ReviewFailure { commit_sha, report } => {
            let mut prompt = format!(
                "The previous attempt on branch `{}` (commit {}) failed review.\n\nSummary: {}\n",
                parent.branch_name, commit_sha, report.summary
            );
            if !report.findings.is_empty() {
                prompt.push_str("\nFindings to address:\n");
                for finding in &report.findings {
                    prompt.push_str("- ");
                    prompt.push_str(finding);
                    prompt.push('\n');
                }
            }
            if let Some(fix) = &report.recommended_fix_prompt {
                prompt.push_str("\nSuggested approach: ");
                prompt.push_str(fix);
                prompt.push('\n');
            }
            prompt.push_str("\nFix the findings and keep the acceptance criteria satisfied.");
            prompt
        }
        RemediationTrigger::CiFailure {
            commit_sha,
            log_excerpt,
        } => {
            let mut prompt = format!(
                "The primary CI pipeline failed for commit {} on branch `{}`.\n",
                commit_sha, parent.branch_name
            );
            let excerpt = tail(log_excerpt, LOG_EXCERPT_LIMIT);
            if !excerpt.is_empty() {
                prompt.push_str("\nLog tail:\n```\n");
                prompt.push_str(excerpt);
                prompt.push_str("\n```\n");
            }
            prompt.push_str("\nMake the pipeline pass without weakening the checks.");
            prompt
        }
    }
}

/// Returns the trailing `limit` bytes of `s`, snapped to a char boundary.
fn tail(s: &str, limit: usize) -> &str {
    if s.len() <= limit {
        return s;
    }
    let mut start = s.len() - limit;
    while !s.is_char_boundary(start) {
        start += 1;
    }
    &s[start..]
}

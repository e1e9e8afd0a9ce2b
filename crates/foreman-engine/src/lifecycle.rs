//! Session lifecycle: the state machine every other component talks to.
//!
//! Transitions run inside registry write transactions so a terminal
//! state and its lock cleanup commit together. Already-terminal sessions
//! no-op; force-termination is idempotent.

use chrono::Utc;
use serde::Serialize;

use foreman_core::{
    AgentSpec, Error, GoalId, RepoRef, Result, ReviewArtifact, Session, SessionId, SessionSpec,
    SessionStatus,
};
use foreman_registry::{AcquireOutcome, LockConflict, LockManager, RegistryStore, Tx};

use crate::events::{CheckRunEvent, PullRequestEvent};
use crate::review::{RemediationOutcome, RemediationTrigger};
use crate::Engine;

/// Commits a registry transaction, mapping the driver error.
pub(crate) async fn commit(tx: Tx<'_>) -> Result<()> {
    tx.commit()
        .await
        .map_err(|e| Error::storage_with_source("transaction commit failed", e))
}

/// Outcome of dispatching one session to the Agent Provider.
#[derive(Debug, Clone)]
pub enum DispatchResult {
    /// The agent is live; the session is executing.
    Dispatched(Session),
    /// Lock acquisition failed; the session is failed.
    Conflict {
        /// The failed session.
        session: Session,
        /// The contested paths.
        conflicts: Vec<LockConflict>,
    },
    /// The Agent Provider rejected the dispatch; the session is failed.
    Rejected {
        /// The failed session.
        session: Session,
        /// Provider error detail.
        error: String,
    },
}

/// Outcome of a completed check-run event.
#[derive(Debug, Clone, Serialize)]
#[serde(tag = "outcome", rename_all = "snake_case")]
pub enum CheckOutcome {
    /// The pipeline is not on the primary allow-list.
    IgnoredNonPrimary,
    /// No live session watches the branch.
    NoActiveSession,
    /// The commit was already reviewed.
    DuplicateCommitSkipped,
    /// A primary success moved the session to verifying.
    Verifying {
        /// The advanced session.
        session_id: SessionId,
    },
    /// A primary success arrived in a state it does not advance.
    Unchanged {
        /// The untouched session.
        session_id: SessionId,
    },
    /// A primary failure spawned a repair child.
    RepairSpawned {
        /// The failed parent.
        session_id: SessionId,
        /// The child carrying the parent's locks.
        child_session_id: SessionId,
    },
    /// A primary failure at maximum depth; no child was created.
    Drifted {
        /// The failed parent.
        session_id: SessionId,
    },
}

impl CheckOutcome {
    /// Stable outcome string for webhook result payloads.
    #[must_use]
    pub fn as_result(&self) -> &'static str {
        match self {
            Self::IgnoredNonPrimary => "ignored_non_primary",
            Self::NoActiveSession => "no_active_session",
            Self::DuplicateCommitSkipped => "duplicate_commit_skipped",
            Self::Verifying { .. } => "verifying",
            Self::Unchanged { .. } => "unchanged",
            Self::RepairSpawned { .. } => "repair_spawned",
            Self::Drifted { .. } => "drifted",
        }
    }
}

/// Outcome of a change-proposal closure.
#[derive(Debug, Clone, Serialize)]
#[serde(tag = "outcome", rename_all = "snake_case")]
pub enum ClosureOutcome {
    /// No live session watches the branch.
    NoActiveSession,
    /// Merged: the session completed.
    Completed {
        /// The completed session.
        session_id: SessionId,
    },
    /// Closed without merge: the session failed.
    Failed {
        /// The failed session.
        session_id: SessionId,
    },
}

impl ClosureOutcome {
    /// Stable outcome string for webhook result payloads.
    #[must_use]
    pub fn as_result(&self) -> &'static str {
        match self {
            Self::NoActiveSession => "no_active_session",
            Self::Completed { .. } => "completed",
            Self::Failed { .. } => "failed",
        }
    }
}

/// Result of reconciling one session against the Agent Provider.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SyncResult {
    /// The session after reconciliation.
    pub session: Session,
    /// Raw provider status, when the session had an agent to poll.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub external_status: Option<foreman_core::AgentStatus>,
    /// Change proposal the agent produced, when one exists.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub change_proposal_url: Option<String>,
}

impl Engine {
    /// Inserts a queued session.
    ///
    /// # Errors
    ///
    /// Returns `PreconditionFailed` when the requested remediation depth
    /// exceeds the bound, and storage errors otherwise.
    pub async fn create_session(&self, spec: SessionSpec) -> Result<Session> {
        if spec.remediation_depth > self.config().max_remediation_depth {
            return Err(Error::PreconditionFailed {
                message: format!(
                    "remediation depth {} exceeds bound {}",
                    spec.remediation_depth,
                    self.config().max_remediation_depth
                ),
            });
        }
        let session = Session::from_spec(spec);
        let mut tx = self.store().begin().await?;
        RegistryStore::insert_session(&mut tx, &session).await?;
        commit(tx).await?;
        Ok(session)
    }

    /// Creates a session, reserves its files, and starts its agent.
    ///
    /// Lock conflicts and provider rejections are not errors; they are
    /// recorded on the session and reported in the result so cascade
    /// dispatch can aggregate them.
    ///
    /// # Errors
    ///
    /// Returns storage errors only.
    pub async fn dispatch_session(
        &self,
        spec: SessionSpec,
        lock_paths: &[String],
        prompt: &str,
        context: Option<String>,
    ) -> Result<DispatchResult> {
        let mut session = self.create_session(spec).await?;

        if !lock_paths.is_empty() {
            match self.locks().acquire(session.id, lock_paths).await? {
                AcquireOutcome::Acquired { .. } => {}
                AcquireOutcome::Conflict { conflicts } => {
                    let detail = conflicts
                        .iter()
                        .map(|c| format!("{} held by {}", c.path, c.held_by))
                        .collect::<Vec<_>>()
                        .join(", ");
                    self.fail_session(&mut session, format!("LockConflict({detail})"), true)
                        .await?;
                    return Ok(DispatchResult::Conflict { session, conflicts });
                }
            }
        }

        let agent_spec = AgentSpec {
            prompt: prompt.to_string(),
            source_repo: session.source_repo.clone(),
            starting_branch: session.branch_name.clone(),
            context,
        };
        match self.agents.create_agent(agent_spec).await {
            Ok(handle) => {
                let mut tx = self.store().begin().await?;
                session.external_agent_id = Some(handle.id);
                session.external_agent_url = Some(handle.url);
                session.status = SessionStatus::Executing;
                session.updated_at = Utc::now();
                RegistryStore::update_session(&mut tx, &session).await?;
                commit(tx).await?;
                tracing::info!(session = %session.id, "agent dispatched");
                Ok(DispatchResult::Dispatched(session))
            }
            Err(err) => {
                let message = err.to_string();
                self.fail_session(&mut session, message.clone(), true).await?;
                tracing::warn!(session = %session.id, error = %message, "agent dispatch rejected");
                Ok(DispatchResult::Rejected {
                    session,
                    error: message,
                })
            }
        }
    }

    /// Applies a completed CI check run.
    ///
    /// Only primary pipelines drive transitions; everything else is
    /// logged and ignored. A primary success moves an executing session
    /// to verifying. A primary failure follows the remediation path with
    /// a best-effort log excerpt.
    ///
    /// # Errors
    ///
    /// Returns storage errors, and provider errors from remediation
    /// dispatch bookkeeping.
    pub async fn handle_check_run(&self, event: &CheckRunEvent) -> Result<CheckOutcome> {
        if !self.config().is_primary_pipeline(&event.pipeline) {
            tracing::debug!(pipeline = %event.pipeline, "non-primary check run ignored");
            return Ok(CheckOutcome::IgnoredNonPrimary);
        }

        let mut tx = self.store().begin().await?;
        let Some(mut session) =
            RegistryStore::latest_session(&mut tx, &event.source_repo, &event.branch).await?
        else {
            return Ok(CheckOutcome::NoActiveSession);
        };
        if event.conclusion.is_failure()
            && session.last_reviewed_commit.as_deref() == Some(event.head_sha.as_str())
        {
            return Ok(CheckOutcome::DuplicateCommitSkipped);
        }
        if session.is_terminal() {
            return Ok(CheckOutcome::NoActiveSession);
        }

        if event.conclusion.is_failure() {
            drop(tx);

            let logs = match event.job_id {
                Some(job_id) => {
                    let repo = RepoRef::parse(&event.source_repo)?;
                    self.vcs
                        .check_run_logs(&repo, job_id)
                        .await
                        .unwrap_or_else(|err| {
                            tracing::warn!(error = %err, "check-run log fetch failed");
                            String::new()
                        })
                }
                None => String::new(),
            };

            let trigger = RemediationTrigger::CiFailure {
                commit_sha: event.head_sha.clone(),
                log_excerpt: logs,
            };
            return match self.remediate(session, trigger).await? {
                RemediationOutcome::ChildSpawned { parent, child } => {
                    Ok(CheckOutcome::RepairSpawned {
                        session_id: parent,
                        child_session_id: child,
                    })
                }
                RemediationOutcome::DepthExhausted { parent, .. } => {
                    Ok(CheckOutcome::Drifted { session_id: parent })
                }
            };
        }

        // Primary success: executing -> verifying. Anything else stands.
        if session.status == SessionStatus::Executing {
            session.status = SessionStatus::Verifying;
            session.updated_at = Utc::now();
            RegistryStore::update_session(&mut tx, &session).await?;
            commit(tx).await?;
            tracing::info!(session = %session.id, "primary check passed, verifying");
            Ok(CheckOutcome::Verifying {
                session_id: session.id,
            })
        } else {
            Ok(CheckOutcome::Unchanged {
                session_id: session.id,
            })
        }
    }

    /// Applies a change-proposal closure.
    ///
    /// Merged closes the session as completed and records the proposal
    /// URL on the goal (deduplicated, so re-deliveries are harmless).
    /// Unmerged closes it as failed. Locks go away either way, in the
    /// same transaction.
    ///
    /// # Errors
    ///
    /// Returns storage errors.
    pub async fn handle_pull_request_closed(
        &self,
        event: &PullRequestEvent,
    ) -> Result<ClosureOutcome> {
        let mut tx = self.store().begin().await?;
        let Some(mut session) =
            RegistryStore::latest_live_session(&mut tx, &event.source_repo, &event.branch).await?
        else {
            return Ok(ClosureOutcome::NoActiveSession);
        };

        session.updated_at = Utc::now();
        let outcome = if event.merged {
            session.status = SessionStatus::Completed;
            if let Some(goal_id) = session.goal_id {
                Self::attach_artifact(
                    &mut tx,
                    goal_id,
                    ReviewArtifact {
                        url: event.url.clone(),
                        session_id: session.id,
                        agent_id: session.external_agent_id.clone(),
                    },
                )
                .await?;
            }
            ClosureOutcome::Completed {
                session_id: session.id,
            }
        } else {
            session.status = SessionStatus::Failed;
            session.last_error = Some("change proposal closed without merge".into());
            ClosureOutcome::Failed {
                session_id: session.id,
            }
        };

        RegistryStore::update_session(&mut tx, &session).await?;
        LockManager::release_in(&mut tx, session.id).await?;
        commit(tx).await?;
        tracing::info!(session = %session.id, merged = event.merged, "change proposal closed");
        Ok(outcome)
    }

    /// Reconciles one session against the Agent Provider.
    ///
    /// Provider statuses map onto the session state machine; unknown
    /// combinations no-op. A completed agent's change proposal URL is
    /// appended to the goal's review artifacts.
    ///
    /// # Errors
    ///
    /// Returns `ResourceNotFound` for an unknown session and provider
    /// errors from the poll itself.
    pub async fn sync_session(&self, session_id: SessionId) -> Result<SyncResult> {
        let session = self
            .store()
            .session(session_id)
            .await?
            .ok_or_else(|| Error::resource_not_found("session", session_id))?;

        let Some(agent_id) = session.external_agent_id.clone() else {
            // Nothing to poll yet; the session is still queued.
            return Ok(SyncResult {
                session,
                external_status: None,
                change_proposal_url: None,
            });
        };

        let snapshot = self.agents.get_agent(&agent_id).await?;
        let change_proposal_url = snapshot.change_proposal_url.clone();

        let mut tx = self.store().begin().await?;
        let Some(mut session) = RegistryStore::session_for_update(&mut tx, session_id).await?
        else {
            return Err(Error::resource_not_found("session", session_id));
        };

        if !session.is_terminal() {
            if let Some(next) = snapshot.status.session_status() {
                session.status = next;
                if next == SessionStatus::Failed {
                    session.last_error = Some(format!("agent reported {:?}", snapshot.status));
                }
            }
            if let Some(url) = &snapshot.url {
                session.external_agent_url = Some(url.clone());
            }
            session.last_synced_at = Some(Utc::now());
            session.updated_at = Utc::now();

            if session.is_terminal() {
                LockManager::release_in(&mut tx, session.id).await?;
            }
            if session.status == SessionStatus::Completed {
                if let (Some(goal_id), Some(url)) = (session.goal_id, &change_proposal_url) {
                    Self::attach_artifact(
                        &mut tx,
                        goal_id,
                        ReviewArtifact {
                            url: url.clone(),
                            session_id: session.id,
                            agent_id: Some(agent_id),
                        },
                    )
                    .await?;
                }
            }
            RegistryStore::update_session(&mut tx, &session).await?;
            commit(tx).await?;
        }

        Ok(SyncResult {
            session,
            external_status: Some(snapshot.status),
            change_proposal_url,
        })
    }

    /// Force-terminates a session: failed, locks released. Idempotent;
    /// terminating an already-terminal session returns it unchanged.
    ///
    /// # Errors
    ///
    /// Returns `ResourceNotFound` for an unknown session.
    pub async fn terminate_session(&self, session_id: SessionId) -> Result<Session> {
        let mut tx = self.store().begin().await?;
        let Some(mut session) = RegistryStore::session_for_update(&mut tx, session_id).await?
        else {
            return Err(Error::resource_not_found("session", session_id));
        };
        if session.is_terminal() {
            return Ok(session);
        }
        session.status = SessionStatus::Failed;
        session.last_error = Some("terminated by operator".into());
        session.updated_at = Utc::now();
        RegistryStore::update_session(&mut tx, &session).await?;
        LockManager::release_in(&mut tx, session.id).await?;
        commit(tx).await?;
        tracing::info!(session = %session.id, "session terminated");
        Ok(session)
    }

    /// Marks a session failed with an error, optionally releasing its
    /// locks in the same transaction.
    pub(crate) async fn fail_session(
        &self,
        session: &mut Session,
        error: String,
        release_locks: bool,
    ) -> Result<()> {
        let mut tx = self.store().begin().await?;
        session.status = SessionStatus::Failed;
        session.last_error = Some(error);
        session.updated_at = Utc::now();
        RegistryStore::update_session(&mut tx, session).await?;
        if release_locks {
            LockManager::release_in(&mut tx, session.id).await?;
        }
        commit(tx).await
    }

    /// Appends a review artifact to a goal inside the caller's
    /// transaction, deduplicated on `(url, agent_id)`.
    pub(crate) async fn attach_artifact(
        tx: &mut Tx<'_>,
        goal_id: GoalId,
        artifact: ReviewArtifact,
    ) -> Result<()> {
        let Some(mut goal) = RegistryStore::goal_for_update(tx, goal_id).await? else {
            tracing::warn!(goal = %goal_id, "artifact for a deleted goal dropped");
            return Ok(());
        };
        if goal.push_review_artifact(artifact) {
            RegistryStore::update_goal(tx, &goal).await?;
        }
        Ok(())
    }
}

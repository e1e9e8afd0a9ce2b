//! Webhook routing: one entry point for all inbound VCS events.
//!
//! Push and proposal events feed the review loop; pushes that touch core
//! files additionally trigger cascade analysis; check runs drive the
//! lifecycle. Provider failures alone are folded into the result string,
//! so the sender sees a 2xx and does not redeliver a poisoned event
//! forever; every other error kind propagates to the HTTP layer for its
//! real status code.

use serde::Serialize;

use foreman_core::Result;

use crate::cascade::{CascadeRequest, CascadeResponse};
use crate::events::{PullRequestAction, PullRequestEvent, PushEvent, VcsEvent};
use crate::review::ReviewRequest;
use crate::Engine;

/// What the engine did with one webhook delivery.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct WebhookResult {
    /// Echo of the event type.
    pub event_type: &'static str,
    /// Outcome summary, stable strings for the sender's logs.
    pub result: String,
    /// Cascade analysis triggered by a core-file push, when one ran.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub cascade_trigger: Option<CascadeResponse>,
}

impl Engine {
    /// Routes one authenticated webhook event.
    ///
    /// # Errors
    ///
    /// Returns validation, not-found, and storage errors so the HTTP
    /// layer can map them to their status codes. Provider failures are
    /// captured in the result string instead, so webhook senders do not
    /// retry them.
    pub async fn handle_webhook(&self, event: VcsEvent) -> Result<WebhookResult> {
        match event {
            VcsEvent::Push(push) => self.handle_push(push).await,
            VcsEvent::PullRequest(pr) => self.handle_pull_request(pr).await,
            VcsEvent::CheckRun(check) => {
                let outcome = self.handle_check_run(&check).await;
                Ok(WebhookResult {
                    event_type: "check_run",
                    result: summarize(outcome.map(|o| o.as_result().to_string()))?,
                    cascade_trigger: None,
                })
            }
        }
    }

    async fn handle_push(&self, push: PushEvent) -> Result<WebhookResult> {
        if self
            .config()
            .is_automated_commit(&push.commit.author, &push.commit.message)
        {
            tracing::debug!(commit = %push.commit.sha, "automated commit skipped");
            return Ok(WebhookResult {
                event_type: "push",
                result: "automated_commit_skipped".into(),
                cascade_trigger: None,
            });
        }

        let review = self.review_commit(ReviewRequest::from_push(&push)).await;
        let result = summarize(review.map(|o| o.as_result().to_string()))?;

        // Core-file pushes additionally get blast-radius analysis.
        let touches_core = push
            .changed_paths
            .iter()
            .any(|p| self.config().core_files.is_core_file(p));
        let cascade_trigger = if touches_core {
            match self
                .analyze_commit(CascadeRequest {
                    source_repo: push.source_repo.clone(),
                    base_branch: "main".into(),
                    commit_sha: push.commit.sha.clone(),
                    changed_paths: push.changed_paths.clone(),
                    goal_id: None,
                    trigger_session_id: None,
                })
                .await
            {
                Ok(response) => Some(response),
                Err(err) if err.is_provider() => {
                    tracing::warn!(error = %err, "cascade analysis failed");
                    None
                }
                Err(err) => return Err(err),
            }
        } else {
            None
        };

        Ok(WebhookResult {
            event_type: "push",
            result,
            cascade_trigger,
        })
    }

    async fn handle_pull_request(&self, pr: PullRequestEvent) -> Result<WebhookResult> {
        let result = match pr.action {
            PullRequestAction::Opened | PullRequestAction::Synchronize => {
                if self
                    .config()
                    .is_automated_commit(&pr.head.author, &pr.head.message)
                {
                    "automated_commit_skipped".to_string()
                } else {
                    let review = self
                        .review_commit(ReviewRequest {
                            source_repo: pr.source_repo.clone(),
                            branch: pr.branch.clone(),
                            commit_sha: pr.head.sha.clone(),
                            pr_number: Some(pr.number),
                            artifact_url: Some(pr.url.clone()),
                            force: false,
                        })
                        .await;
                    summarize(review.map(|o| o.as_result().to_string()))?
                }
            }
            PullRequestAction::Closed => {
                let closure = self.handle_pull_request_closed(&pr).await;
                summarize(closure.map(|o| o.as_result().to_string()))?
            }
        };

        Ok(WebhookResult {
            event_type: "pull_request",
            result,
            cascade_trigger: None,
        })
    }
}

/// Collapses provider failures into a result string so the delivery is
/// acknowledged; every other error kind propagates for real status
/// mapping upstream.
fn summarize(result: Result<String>) -> Result<String> {
    match result {
        Ok(outcome) => Ok(outcome),
        Err(err) if err.is_provider() => {
            tracing::warn!(error = %err, "provider failure during event handling");
            Ok(format!("provider_failed: {err}"))
        }
        Err(err) => Err(err),
    }
}

//! Lifecycle edges: closures, provider reconciliation, termination.

mod common;

use common::{executing_session, harness, insert_goal, PRIMARY_PIPELINE, REPO};
use foreman_core::{AgentSnapshot, AgentStatus, SessionStatus};
use foreman_engine::events::{
    CheckConclusion, CheckRunEvent, CommitInfo, PullRequestAction, PullRequestEvent,
};
use foreman_engine::{ClosureOutcome, CheckOutcome};
use foreman_test_utils::sample_criteria;

fn pr_closed(branch: &str, merged: bool) -> PullRequestEvent {
    PullRequestEvent {
        source_repo: REPO.into(),
        branch: branch.into(),
        action: PullRequestAction::Closed,
        number: 7,
        head: CommitInfo {
            sha: "abc123".into(),
            author: "alice".into(),
            message: "final polish".into(),
        },
        merged,
        url: "https://vcs.example/acme/platform/pull/7".into(),
    }
}

#[tokio::test]
async fn merged_proposal_completes_the_session_and_records_the_artifact() {
    // Scenario: an executing session's proposal merges; the session
    // completes, its locks vanish, and the goal gains the PR URL once.
    let h = harness().await;
    let goal = insert_goal(&h.store, sample_criteria()).await;
    let session = executing_session(&h, Some(goal.id), "foreman/goal", &["src/loader.rs"]).await;

    let outcome = h
        .engine
        .handle_pull_request_closed(&pr_closed("foreman/goal", true))
        .await
        .expect("closure");
    assert!(matches!(outcome, ClosureOutcome::Completed { .. }));

    let session = h.store.session(session.id).await.expect("read").expect("row");
    assert_eq!(session.status, SessionStatus::Completed);
    assert!(h
        .engine
        .locks()
        .locks_for_session(session.id)
        .await
        .expect("locks")
        .is_empty());

    let goal_row = h.store.goal(goal.id).await.expect("read").expect("row");
    assert_eq!(goal_row.review_artifacts.len(), 1);
    assert_eq!(
        goal_row.review_artifacts[0].url,
        "https://vcs.example/acme/platform/pull/7"
    );

    // Redelivery: the session is terminal, the artifact list is stable.
    let outcome = h
        .engine
        .handle_pull_request_closed(&pr_closed("foreman/goal", true))
        .await
        .expect("redelivery");
    assert!(matches!(outcome, ClosureOutcome::NoActiveSession));
    let goal_row = h.store.goal(goal.id).await.expect("read").expect("row");
    assert_eq!(goal_row.review_artifacts.len(), 1);
}

#[tokio::test]
async fn unmerged_closure_fails_the_session() {
    let h = harness().await;
    let session = executing_session(&h, None, "foreman/goal", &["src/loader.rs"]).await;

    let outcome = h
        .engine
        .handle_pull_request_closed(&pr_closed("foreman/goal", false))
        .await
        .expect("closure");
    assert!(matches!(outcome, ClosureOutcome::Failed { .. }));

    let session = h.store.session(session.id).await.expect("read").expect("row");
    assert_eq!(session.status, SessionStatus::Failed);
    assert!(session
        .last_error
        .as_deref()
        .unwrap_or_default()
        .contains("without merge"));
    assert!(h.engine.locks().list_locks().await.expect("list").is_empty());
}

#[tokio::test]
async fn primary_success_advances_executing_to_verifying() {
    let h = harness().await;
    let session = executing_session(&h, None, "foreman/goal", &[]).await;

    let event = CheckRunEvent {
        source_repo: REPO.into(),
        branch: "foreman/goal".into(),
        head_sha: "abc".into(),
        pipeline: PRIMARY_PIPELINE.into(),
        conclusion: CheckConclusion::Success,
        job_id: None,
    };
    let outcome = h.engine.handle_check_run(&event).await.expect("check");
    assert!(matches!(outcome, CheckOutcome::Verifying { .. }));

    let session = h.store.session(session.id).await.expect("read").expect("row");
    assert_eq!(session.status, SessionStatus::Verifying);

    // A second success does not advance further.
    let outcome = h.engine.handle_check_run(&event).await.expect("check");
    assert!(matches!(outcome, CheckOutcome::Unchanged { .. }));
}

#[tokio::test]
async fn sync_maps_provider_states_onto_the_session() {
    let h = harness().await;
    let goal = insert_goal(&h.store, sample_criteria()).await;
    let session = executing_session(&h, Some(goal.id), "foreman/goal", &["src/loader.rs"]).await;
    let agent_id = session.external_agent_id.clone().expect("agent id");

    // Still running: no state change.
    h.agents.set_snapshot(
        agent_id.clone(),
        AgentSnapshot {
            status: AgentStatus::Running,
            url: None,
            change_proposal_url: None,
        },
    );
    let result = h.engine.sync_session(session.id).await.expect("sync");
    assert_eq!(result.session.status, SessionStatus::Executing);
    assert!(result.session.last_synced_at.is_some());

    // Completed with a proposal: terminal, locks gone, artifact attached.
    h.agents.set_snapshot(
        agent_id.clone(),
        AgentSnapshot {
            status: AgentStatus::Completed,
            url: Some("https://agents.test/runs/1".into()),
            change_proposal_url: Some("https://vcs.example/pull/9".into()),
        },
    );
    let result = h.engine.sync_session(session.id).await.expect("sync");
    assert_eq!(result.session.status, SessionStatus::Completed);
    assert_eq!(
        result.change_proposal_url.as_deref(),
        Some("https://vcs.example/pull/9")
    );
    assert!(h.engine.locks().list_locks().await.expect("list").is_empty());

    let goal_row = h.store.goal(goal.id).await.expect("read").expect("row");
    assert_eq!(goal_row.review_artifacts.len(), 1);

    // Syncing a terminal session is a no-op.
    let again = h.engine.sync_session(session.id).await.expect("sync");
    assert_eq!(again.session.status, SessionStatus::Completed);
    let goal_row = h.store.goal(goal.id).await.expect("read").expect("row");
    assert_eq!(goal_row.review_artifacts.len(), 1, "artifact deduped");
}

#[tokio::test]
async fn unknown_provider_states_do_not_move_the_session() {
    let h = harness().await;
    let session = executing_session(&h, None, "foreman/goal", &[]).await;
    let agent_id = session.external_agent_id.clone().expect("agent id");

    h.agents.set_snapshot(
        agent_id,
        AgentSnapshot {
            status: AgentStatus::Unknown,
            url: None,
            change_proposal_url: None,
        },
    );
    let result = h.engine.sync_session(session.id).await.expect("sync");
    assert_eq!(result.session.status, SessionStatus::Executing);
}

#[tokio::test]
async fn termination_is_idempotent_and_releases_locks() {
    let h = harness().await;
    let session = executing_session(&h, None, "foreman/goal", &["src/loader.rs"]).await;

    let first = h
        .engine
        .terminate_session(session.id)
        .await
        .expect("terminate");
    assert_eq!(first.status, SessionStatus::Failed);
    assert!(h.engine.locks().list_locks().await.expect("list").is_empty());

    let second = h
        .engine
        .terminate_session(session.id)
        .await
        .expect("second terminate");
    assert_eq!(second.status, SessionStatus::Failed);
    assert_eq!(
        second.last_error.as_deref(),
        Some("terminated by operator"),
        "first termination's error stands"
    );
}

#[tokio::test]
async fn rejected_dispatch_fails_the_session_and_releases_locks() {
    let h = harness().await;
    h.agents.reject_creates(true);

    let spec = foreman_test_utils::session_spec("foreman/goal");
    let result = h
        .engine
        .dispatch_session(spec, &["src/loader.rs".to_string()], "do the work", None)
        .await
        .expect("dispatch");

    match result {
        foreman_engine::DispatchResult::Rejected { session, error } => {
            assert_eq!(session.status, SessionStatus::Failed);
            assert!(error.contains("scripted rejection"));
        }
        other => panic!("expected rejection, got {other:?}"),
    }
    assert!(h.engine.locks().list_locks().await.expect("list").is_empty());
}

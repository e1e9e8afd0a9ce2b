//! Review and remediation scenarios.

mod common;

use common::{ci_failure, executing_session, harness, insert_goal, push};
use foreman_core::{GoalStatus, SessionStatus, MAX_REMEDIATION_DEPTH};
use foreman_engine::review::ReviewRequest;
use foreman_engine::{CheckOutcome, ReviewOutcome};
use foreman_test_utils::{failing_report, passing_report, sample_criteria};

#[tokio::test]
async fn passing_review_completes_the_session_and_releases_locks() {
    let h = harness().await;
    let goal = insert_goal(&h.store, sample_criteria()).await;
    let session = executing_session(&h, Some(goal.id), "foreman/goal", &["src/loader.rs"]).await;

    h.auditor.push_report(passing_report(&["c-1", "c-2"]));
    let outcome = h
        .engine
        .review_commit(ReviewRequest::from_push(&push("foreman/goal", "abc123")))
        .await
        .expect("review");

    match outcome {
        ReviewOutcome::Completed { session_id } => assert_eq!(session_id, session.id),
        other => panic!("expected completion, got {other:?}"),
    }

    let session = h.store.session(session.id).await.expect("read").expect("row");
    assert_eq!(session.status, SessionStatus::Completed);
    assert_eq!(session.last_reviewed_commit.as_deref(), Some("abc123"));
    assert!(h
        .engine
        .locks()
        .locks_for_session(session.id)
        .await
        .expect("locks")
        .is_empty());

    let goal = h.store.goal(goal.id).await.expect("read").expect("row");
    assert!(goal.criteria.iter().all(|c| c.met));
}

#[tokio::test]
async fn redelivery_of_a_reviewed_commit_is_suppressed() {
    // Scenario: one webhook delivery reviews commit abc; the redelivery
    // must produce no second auditor call and no second comment.
    let h = harness().await;
    let goal = insert_goal(&h.store, sample_criteria()).await;
    executing_session(&h, Some(goal.id), "foreman/goal", &[]).await;

    h.auditor.push_report(passing_report(&["c-1", "c-2"]));
    let first = h
        .engine
        .review_commit(ReviewRequest::from_push(&push("foreman/goal", "abc")))
        .await
        .expect("first review");
    assert!(matches!(first, ReviewOutcome::Completed { .. }));
    assert_eq!(h.auditor.review_calls(), 1);
    assert_eq!(h.vcs.comments().len(), 1);

    let second = h
        .engine
        .review_commit(ReviewRequest::from_push(&push("foreman/goal", "abc")))
        .await
        .expect("redelivery");
    assert!(matches!(second, ReviewOutcome::DuplicateCommitSkipped));
    assert_eq!(h.auditor.review_calls(), 1, "auditor ran once");
    assert_eq!(h.vcs.comments().len(), 1, "one comment posted");
}

#[tokio::test]
async fn empty_diffs_are_skipped_without_an_audit() {
    let h = harness().await;
    let goal = insert_goal(&h.store, sample_criteria()).await;
    executing_session(&h, Some(goal.id), "foreman/goal", &[]).await;

    h.vcs.set_diff("");
    let outcome = h
        .engine
        .review_commit(ReviewRequest::from_push(&push("foreman/goal", "abc")))
        .await
        .expect("review");
    assert!(matches!(outcome, ReviewOutcome::EmptyDiffSkipped));
    assert_eq!(h.auditor.review_calls(), 0);
}

#[tokio::test]
async fn unknown_branches_report_no_active_session() {
    let h = harness().await;
    let outcome = h
        .engine
        .review_commit(ReviewRequest::from_push(&push("foreman/ghost", "abc")))
        .await
        .expect("review");
    assert!(matches!(outcome, ReviewOutcome::NoActiveSession));
}

#[tokio::test]
async fn failed_review_spawns_a_child_that_inherits_the_locks() {
    let h = harness().await;
    let goal = insert_goal(&h.store, sample_criteria()).await;
    let parent = executing_session(&h, Some(goal.id), "foreman/goal", &["src/loader.rs"]).await;

    h.auditor.push_report(failing_report("c-1"));
    let outcome = h
        .engine
        .review_commit(ReviewRequest::from_push(&push("foreman/goal", "abc")))
        .await
        .expect("review");

    let child_id = match outcome {
        ReviewOutcome::RepairSpawned {
            session_id,
            child_session_id,
        } => {
            assert_eq!(session_id, parent.id);
            child_session_id
        }
        other => panic!("expected repair spawn, got {other:?}"),
    };

    let parent = h.store.session(parent.id).await.expect("read").expect("row");
    assert_eq!(parent.status, SessionStatus::Failed);
    assert_eq!(parent.last_reviewed_commit.as_deref(), Some("abc"));

    let child = h.store.session(child_id).await.expect("read").expect("row");
    assert_eq!(child.remediation_depth, 1);
    assert_eq!(child.status, SessionStatus::Executing);
    assert_eq!(child.branch_name, parent.branch_name);
    assert_eq!(child.goal_id, Some(goal.id));

    // The lock moved, it never lapsed.
    let child_locks = h
        .engine
        .locks()
        .locks_for_session(child_id)
        .await
        .expect("locks");
    assert_eq!(child_locks.len(), 1);
    assert_eq!(child_locks[0].file_path, "src/loader.rs");

    // The goal's criteria picked up the failing assessment.
    let goal = h.store.goal(goal.id).await.expect("read").expect("row");
    let c1 = goal.criteria.iter().find(|c| c.id == "c-1").expect("c-1");
    assert!(!c1.met);
}

#[tokio::test]
async fn remediation_is_bounded_and_drifts_the_goal() {
    // Scenario: CI failures drive remediation until the depth bound;
    // the final failure creates no child and no lock leaks.
    let h = harness().await;
    let goal = insert_goal(&h.store, sample_criteria()).await;
    let root = executing_session(&h, Some(goal.id), "foreman/goal", &["src/loader.rs"]).await;

    let branch = root.branch_name.clone();
    for depth in 1..=MAX_REMEDIATION_DEPTH {
        let sha = format!("sha-{depth}");
        let outcome = h
            .engine
            .handle_check_run(&ci_failure(&branch, &sha))
            .await
            .expect("check run");
        let child_id = match outcome {
            CheckOutcome::RepairSpawned {
                child_session_id, ..
            } => child_session_id,
            other => panic!("expected repair at depth {depth}, got {other:?}"),
        };
        let child = h.store.session(child_id).await.expect("read").expect("row");
        assert_eq!(child.remediation_depth, depth);

        // The lock set follows the lineage, one holder at a time.
        let locks = h.engine.locks().list_locks().await.expect("list");
        assert_eq!(locks.len(), 1);
        assert_eq!(locks[0].session_id, child_id);
    }

    // The session at the depth bound fails without a child.
    let outcome = h
        .engine
        .handle_check_run(&ci_failure(&branch, "sha-final"))
        .await
        .expect("final check run");
    assert!(matches!(outcome, CheckOutcome::Drifted { .. }));

    let goal = h.store.goal(goal.id).await.expect("read").expect("row");
    assert_eq!(goal.status, GoalStatus::Drifted);

    let active = h.store.list_active_sessions().await.expect("active");
    assert!(active.is_empty(), "every session reached a terminal state");
    assert!(
        h.engine.locks().list_locks().await.expect("list").is_empty(),
        "no lock leaked past the drift"
    );

    // Depth never exceeded the bound.
    let drifted_parent = h
        .store
        .latest_reviewed_session_for_goal(goal.id)
        .await
        .expect("query")
        .expect("session");
    assert!(drifted_parent.remediation_depth <= MAX_REMEDIATION_DEPTH);
}

#[tokio::test]
async fn auditor_failure_leaves_the_session_reviewable() {
    let h = harness().await;
    let goal = insert_goal(&h.store, sample_criteria()).await;
    let session = executing_session(&h, Some(goal.id), "foreman/goal", &[]).await;

    h.auditor.fail_reviews(true);
    let err = h
        .engine
        .review_commit(ReviewRequest::from_push(&push("foreman/goal", "abc")))
        .await
        .expect_err("auditor down");
    assert!(err.is_provider());

    // Nothing was acknowledged: redelivery reviews the same commit.
    let session = h.store.session(session.id).await.expect("read").expect("row");
    assert_eq!(session.status, SessionStatus::Executing);
    assert!(session.last_reviewed_commit.is_none());

    h.auditor.fail_reviews(false);
    h.auditor.push_report(passing_report(&["c-1", "c-2"]));
    let outcome = h
        .engine
        .review_commit(ReviewRequest::from_push(&push("foreman/goal", "abc")))
        .await
        .expect("redelivery");
    assert!(matches!(outcome, ReviewOutcome::Completed { .. }));
}

#[tokio::test]
async fn non_primary_check_runs_are_ignored() {
    let h = harness().await;
    let goal = insert_goal(&h.store, sample_criteria()).await;
    executing_session(&h, Some(goal.id), "foreman/goal", &[]).await;

    let mut event = ci_failure("foreman/goal", "abc");
    event.pipeline = "lint/optional".into();
    let outcome = h.engine.handle_check_run(&event).await.expect("check run");
    assert!(matches!(outcome, CheckOutcome::IgnoredNonPrimary));
    assert_eq!(h.agents.create_calls(), 1, "no repair agent started");
}

#[tokio::test]
async fn re_audit_refreshes_criteria_without_touching_sessions() {
    let h = harness().await;
    let goal = insert_goal(&h.store, sample_criteria()).await;
    executing_session(&h, Some(goal.id), "foreman/goal", &[]).await;

    h.auditor.push_report(passing_report(&["c-1", "c-2"]));
    h.engine
        .review_commit(ReviewRequest::from_push(&push("foreman/goal", "abc")))
        .await
        .expect("review");

    // The auditor changes its mind on re-audit.
    h.auditor.push_report(failing_report("c-2"));
    let result = h.engine.re_audit_goal(goal.id).await.expect("re-audit");
    assert_eq!(result.commit_sha, "abc");
    assert_eq!(result.unmet_criteria, 1);

    let goal = h.store.goal(goal.id).await.expect("read").expect("row");
    let c2 = goal.criteria.iter().find(|c| c.id == "c-2").expect("c-2");
    assert!(!c2.met);

    // Session state is untouched by a re-audit.
    let sessions = h.store.list_active_sessions().await.expect("active");
    assert!(sessions.is_empty());
}

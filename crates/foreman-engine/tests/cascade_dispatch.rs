//! Cascade analysis and dispatch scenarios.

mod common;

use common::{executing_session, harness, REPO};
use foreman_core::{CascadeStatus, JobPriority, SessionStatus};
use foreman_engine::cascade::{BatchJob, BatchRequest, CascadeRequest};
use foreman_test_utils::{sample_analysis, sample_job};

fn analyze_request(changed_paths: &[&str]) -> CascadeRequest {
    CascadeRequest {
        source_repo: REPO.into(),
        base_branch: "main".into(),
        commit_sha: "deadbeef".into(),
        changed_paths: changed_paths.iter().map(|p| (*p).to_string()).collect(),
        goal_id: None,
        trigger_session_id: None,
    }
}

#[tokio::test]
async fn non_core_changes_do_not_trigger_analysis() {
    let h = harness().await;
    let response = h
        .engine
        .analyze_commit(analyze_request(&["docs/readme.md"]))
        .await
        .expect("analyze");
    assert!(!response.is_cascade);
    assert!(response.cascade_id.is_none());
    assert_eq!(h.auditor.decompose_calls(), 0);
}

#[tokio::test]
async fn dispatch_continues_past_a_lock_conflict() {
    // Scenario: two jobs, one blocked by an unrelated session's lock.
    let h = harness().await;
    let blocker = executing_session(&h, None, "other/branch", &["b.ts"]).await;

    h.auditor.push_analysis(sample_analysis(
        vec![
            sample_job("j1", &["a.ts"], JobPriority::High),
            sample_job("j2", &["b.ts"], JobPriority::Medium),
        ],
        0.9,
    ));
    let response = h
        .engine
        .analyze_commit(analyze_request(&["core/schema.rs"]))
        .await
        .expect("analyze");

    assert_eq!(response.status, Some(CascadeStatus::Dispatched));
    let telemetry = response.telemetry.expect("telemetry");
    assert_eq!(telemetry.dispatched_count, 1);
    assert_eq!(telemetry.conflict_count, 1);
    assert_eq!(telemetry.failed_count, 1);
    assert!(!response.is_conflict(), "partial success is not a conflict");

    let j1 = response
        .dispatched_sessions
        .iter()
        .find(|s| s.job_id == "j1")
        .expect("j1");
    assert_eq!(j1.status, SessionStatus::Executing);

    let j2 = response
        .dispatched_sessions
        .iter()
        .find(|s| s.job_id == "j2")
        .expect("j2");
    assert_eq!(j2.status, SessionStatus::Failed);
    assert!(j2.error.as_deref().unwrap_or_default().contains("LockConflict"));
    assert_eq!(response.lock_conflicts.len(), 1);
    assert_eq!(response.lock_conflicts[0].path, "b.ts");
    assert_eq!(response.lock_conflicts[0].held_by, blocker.id);

    // The cascade row carries the telemetry.
    let cascade = h
        .store
        .cascade(response.cascade_id.expect("cascade id"))
        .await
        .expect("read")
        .expect("row");
    assert_eq!(cascade.status, CascadeStatus::Dispatched);
    assert_eq!(cascade.telemetry.expect("telemetry").dispatched_count, 1);
}

#[tokio::test]
async fn all_conflicts_surface_as_a_conflict_response() {
    let h = harness().await;
    executing_session(&h, None, "other/branch", &["a.ts"]).await;

    h.auditor.push_analysis(sample_analysis(
        vec![sample_job("j1", &["a.ts"], JobPriority::High)],
        0.9,
    ));
    let response = h
        .engine
        .analyze_commit(analyze_request(&["core/schema.rs"]))
        .await
        .expect("analyze");

    assert!(response.is_conflict());
    assert_eq!(response.status, Some(CascadeStatus::Failed));
    assert_eq!(response.telemetry.expect("telemetry").dispatched_count, 0);
}

#[tokio::test]
async fn low_confidence_analyses_are_recorded_but_never_dispatched() {
    let h = harness().await;
    h.auditor.push_analysis(sample_analysis(
        vec![sample_job("j1", &["a.ts"], JobPriority::High)],
        0.4,
    ));
    let response = h
        .engine
        .analyze_commit(analyze_request(&["core/schema.rs"]))
        .await
        .expect("analyze");

    assert!(response.is_cascade);
    assert_eq!(response.status, Some(CascadeStatus::Failed));
    assert!(response.dispatched_sessions.is_empty());
    assert_eq!(h.agents.create_calls(), 0);

    // Recorded for the operator regardless.
    let cascade = h
        .store
        .cascade(response.cascade_id.expect("cascade id"))
        .await
        .expect("read");
    assert!(cascade.is_some());
}

#[tokio::test]
async fn overlapping_jobs_are_made_disjoint_before_dispatch() {
    let h = harness().await;
    h.auditor.push_analysis(sample_analysis(
        vec![
            sample_job("low", &["x.ts", "shared.ts"], JobPriority::Low),
            sample_job("high", &["shared.ts"], JobPriority::High),
        ],
        0.9,
    ));
    let response = h
        .engine
        .analyze_commit(analyze_request(&["core/schema.rs"]))
        .await
        .expect("analyze");

    // Within one cascade the jobs never contend for a path.
    assert_eq!(response.telemetry.expect("telemetry").conflict_count, 0);
    assert_eq!(response.dispatched_sessions.len(), 2);

    let locks = h.engine.locks().list_locks().await.expect("list");
    let shared_holder: Vec<_> = locks.iter().filter(|l| l.file_path == "shared.ts").collect();
    assert_eq!(shared_holder.len(), 1);
}

#[tokio::test]
async fn dispatch_is_capped_at_the_parallelism_limit() {
    let h = harness().await;
    let jobs: Vec<_> = (0..8)
        .map(|i| {
            sample_job(
                &format!("j{i}"),
                &[&format!("file-{i}.ts") as &str],
                JobPriority::Medium,
            )
        })
        .collect();
    h.auditor.push_analysis(sample_analysis(jobs, 0.95));
    let response = h
        .engine
        .analyze_commit(analyze_request(&["core/schema.rs"]))
        .await
        .expect("analyze");

    assert_eq!(response.dispatched_sessions.len(), 5);
    assert_eq!(h.agents.create_calls(), 5);
}

#[tokio::test]
async fn cascade_without_a_goal_synthesizes_one_from_the_prompts() {
    let h = harness().await;
    h.auditor.push_analysis(sample_analysis(
        vec![sample_job("j1", &["a.ts"], JobPriority::High)],
        0.9,
    ));
    let response = h
        .engine
        .analyze_commit(analyze_request(&["core/schema.rs"]))
        .await
        .expect("analyze");

    let session = &response.dispatched_sessions[0];
    let stored = h
        .store
        .session(session.session_id)
        .await
        .expect("read")
        .expect("row");
    let goal_id = stored.goal_id.expect("synthetic goal");
    let goal = h.store.goal(goal_id).await.expect("read").expect("row");
    assert_eq!(goal.criteria.len(), 1);
    assert_eq!(goal.criteria[0].id, "j1");
    assert_eq!(goal.criteria[0].text, "repair j1");
}

#[tokio::test]
async fn batch_dispatch_groups_jobs_under_one_cascade() {
    let h = harness().await;
    let response = h
        .engine
        .dispatch_batch(BatchRequest {
            source_repo: REPO.into(),
            base_branch: "main".into(),
            goal_id: None,
            jobs: vec![
                BatchJob {
                    id: None,
                    prompt: "migrate the settings page".into(),
                    files: vec!["settings.ts".into()],
                    priority: None,
                },
                BatchJob {
                    id: Some("nav".into()),
                    prompt: "migrate the nav".into(),
                    files: vec!["nav.ts".into()],
                    priority: Some(JobPriority::High),
                },
            ],
        })
        .await
        .expect("batch");

    assert_eq!(response.dispatched_count, 2);
    assert_eq!(response.failed_count, 0);
    assert_eq!(response.sessions.len(), 2);

    for session in &response.sessions {
        let stored = h
            .store
            .session(session.session_id)
            .await
            .expect("read")
            .expect("row");
        assert_eq!(
            stored.cascade_id.expect("cascade"),
            response.batch_id,
            "sessions share the batch cascade"
        );
    }
}

#[tokio::test]
async fn agent_rejection_fails_the_job_but_not_the_cascade() {
    let h = harness().await;
    h.agents.reject_creates(true);
    h.auditor.push_analysis(sample_analysis(
        vec![sample_job("j1", &["a.ts"], JobPriority::High)],
        0.9,
    ));
    let response = h
        .engine
        .analyze_commit(analyze_request(&["core/schema.rs"]))
        .await
        .expect("analyze");

    assert_eq!(response.status, Some(CascadeStatus::Failed));
    let telemetry = response.telemetry.expect("telemetry");
    assert_eq!(telemetry.dispatched_count, 0);
    assert_eq!(telemetry.failed_count, 1);
    assert_eq!(telemetry.conflict_count, 0);

    // The failed job released its locks.
    assert!(h.engine.locks().list_locks().await.expect("list").is_empty());
}

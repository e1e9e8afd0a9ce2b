//! Shared harness for the engine scenario suites.

#![allow(dead_code)]

use std::sync::Arc;

use foreman_core::{
    AcceptanceCriterion, CoreFileSet, EngineConfig, Goal, GoalStatus, Session, SessionSpec,
};
use foreman_engine::events::{CheckConclusion, CheckRunEvent, CommitInfo, PushEvent};
use foreman_engine::{DispatchResult, Engine};
use foreman_registry::RegistryStore;
use foreman_test_utils::{StubAgents, StubAuditor, StubVcs};

pub const REPO: &str = "acme/platform";
pub const PRIMARY_PIPELINE: &str = "ci/main";

pub struct Harness {
    pub engine: Engine,
    pub store: RegistryStore,
    pub auditor: Arc<StubAuditor>,
    pub agents: Arc<StubAgents>,
    pub vcs: Arc<StubVcs>,
}

pub async fn harness() -> Harness {
    let store = RegistryStore::in_memory().await.expect("open registry");
    let auditor = Arc::new(StubAuditor::new());
    let agents = Arc::new(StubAgents::new());
    let vcs = Arc::new(StubVcs::new());
    let config = EngineConfig {
        core_files: CoreFileSet::new(["core/**"]).expect("globs"),
        primary_pipelines: vec![PRIMARY_PIPELINE.to_string()],
        ..EngineConfig::default()
    };
    let engine = Engine::new(
        store.clone(),
        auditor.clone(),
        agents.clone(),
        vcs.clone(),
        config,
    );
    Harness {
        engine,
        store,
        auditor,
        agents,
        vcs,
    }
}

pub async fn insert_goal(store: &RegistryStore, criteria: Vec<AcceptanceCriterion>) -> Goal {
    let mut goal = Goal::new("stabilize the loader", "split parse from validate", criteria);
    goal.status = GoalStatus::InProgress;
    let mut tx = store.begin().await.expect("begin");
    RegistryStore::insert_goal(&mut tx, &goal).await.expect("insert goal");
    tx.commit().await.expect("commit");
    goal
}

/// Dispatches an executing session through the engine, with locks.
pub async fn executing_session(
    harness: &Harness,
    goal_id: Option<foreman_core::GoalId>,
    branch: &str,
    lock_paths: &[&str],
) -> Session {
    let spec = SessionSpec {
        goal_id,
        cascade_id: None,
        source_repo: REPO.into(),
        branch_name: branch.into(),
        base_branch: "main".into(),
        remediation_depth: 0,
    };
    let paths: Vec<String> = lock_paths.iter().map(|p| (*p).to_string()).collect();
    match harness
        .engine
        .dispatch_session(spec, &paths, "implement the goal", None)
        .await
        .expect("dispatch")
    {
        DispatchResult::Dispatched(session) => session,
        other => panic!("expected dispatched session, got {other:?}"),
    }
}

pub fn push(branch: &str, sha: &str) -> PushEvent {
    PushEvent {
        source_repo: REPO.into(),
        branch: branch.into(),
        commit: CommitInfo {
            sha: sha.into(),
            author: "alice".into(),
            message: "iterate on the loader".into(),
        },
        changed_paths: vec!["src/loader.rs".into()],
        pr_number: None,
    }
}

pub fn ci_failure(branch: &str, sha: &str) -> CheckRunEvent {
    CheckRunEvent {
        source_repo: REPO.into(),
        branch: branch.into(),
        head_sha: sha.into(),
        pipeline: PRIMARY_PIPELINE.into(),
        conclusion: CheckConclusion::Failure,
        job_id: Some(77),
    }
}

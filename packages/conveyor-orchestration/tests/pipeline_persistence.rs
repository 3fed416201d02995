//! End-to-end persistence: a pipeline run in one orchestrator instance must
//! be resumable by a fresh instance over the same state directory, the way a
//! restarted process would see it.

use async_trait::async_trait;
use conveyor_orchestration::{
    AgentInvoker, ArtifactCheck, ArtifactValidator, EchoInvoker, OrchestratorConfig,
    OrchestratorError, OrchestratorSession, PipelineMode, PipelineOrchestrator, SessionStatus,
    StageDefinition, StageStatus,
};
use conveyor_store::FsStateStore;
use std::sync::Arc;

fn fast_config() -> OrchestratorConfig {
    OrchestratorConfig {
        max_retries: 1,
        base_delay_ms: 0,
    }
}

/// Fails the named stage on every invocation.
struct FailStage(&'static str);

#[async_trait]
impl AgentInvoker for FailStage {
    async fn invoke(
        &self,
        stage: &StageDefinition,
        _session: &OrchestratorSession,
    ) -> conveyor_orchestration::Result<String> {
        if stage.name == self.0 {
            Err(OrchestratorError::StageExecutionFailed(format!(
                "{} unavailable",
                stage.agent
            )))
        } else {
            Ok(format!("{} output", stage.name))
        }
    }
}

#[tokio::test]
async fn partial_run_resumes_across_orchestrator_instances() {
    let dir = tempfile::tempdir().unwrap();

    // First "process": generate-code is down, the run ends Partial.
    let store = Arc::new(FsStateStore::new(dir.path()));
    let first = PipelineOrchestrator::new(
        PipelineMode::Greenfield,
        store,
        Arc::new(FailStage("generate-code")),
    )
    .with_config(fast_config())
    .run()
    .await
    .unwrap();

    assert_eq!(first.status, SessionStatus::Partial);
    assert_eq!(
        first.stage_status("generate-code"),
        Some(StageStatus::Failed)
    );

    // Second "process": fresh store handle, fresh orchestrator, healthy agent.
    let store = Arc::new(FsStateStore::new(dir.path()));
    let invoker = Arc::new(EchoInvoker::new());
    let resumed = PipelineOrchestrator::new(PipelineMode::Greenfield, store.clone(), invoker.clone())
        .with_config(fast_config())
        .resume(&first.id)
        .await
        .unwrap();

    // Only the failed stage and its downstream re-execute.
    assert_eq!(invoker.invocations(), vec!["generate-code", "review-code"]);
    assert_eq!(resumed.status, SessionStatus::Completed);

    // Both sessions remain on disk.
    let ids = OrchestratorSession::list(store.as_ref()).await.unwrap();
    assert!(ids.contains(&first.id));
    assert!(ids.contains(&resumed.id));
}

#[tokio::test]
async fn resume_revalidates_artifacts_from_disk_state() {
    struct RejectPlan;

    #[async_trait]
    impl ArtifactValidator for RejectPlan {
        async fn validate_stage(
            &self,
            stage: &str,
            _mode: PipelineMode,
        ) -> conveyor_orchestration::Result<ArtifactCheck> {
            if stage == "plan-work" {
                Ok(ArtifactCheck::invalid("plan file was edited by hand"))
            } else {
                Ok(ArtifactCheck::valid())
            }
        }
    }

    let dir = tempfile::tempdir().unwrap();

    let store = Arc::new(FsStateStore::new(dir.path()));
    let first = PipelineOrchestrator::new(
        PipelineMode::Greenfield,
        store.clone(),
        Arc::new(EchoInvoker::new()),
    )
    .with_config(fast_config())
    .run()
    .await
    .unwrap();
    assert_eq!(first.status, SessionStatus::Completed);

    let invoker = Arc::new(EchoInvoker::new());
    let resumed = PipelineOrchestrator::new(PipelineMode::Greenfield, store, invoker.clone())
        .with_config(fast_config())
        .with_validator(Arc::new(RejectPlan))
        .resume(&first.id)
        .await
        .unwrap();

    assert_eq!(
        invoker.invocations(),
        vec!["plan-work", "generate-code", "review-code"]
    );
    assert_eq!(resumed.status, SessionStatus::Completed);
    assert!(resumed.pre_completed.contains("collect-requirements"));
    assert!(resumed.pre_completed.contains("draft-documents"));
}

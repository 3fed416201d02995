//! Pipeline orchestrator: drives a mode's stage catalog through its
//! dependency order, with retry, cascading skip, resume, and start-from.
//!
//! The orchestrator owns no stage logic. It asks the dependency analyzer for
//! an execution order, invokes each stage through the [`AgentInvoker`] port,
//! classifies failures to decide whether a retry is worthwhile, and persists
//! the session after every transition so a later process can resume it.

use crate::analyzer::{AnalyzerConfig, DependencyAnalyzer};
use crate::error::{classify_error, OrchestratorError, Result};
use crate::invoker::{AcceptAllValidator, AgentInvoker, ArtifactValidator};
use crate::item::{DependencyEdge, ItemPriority, WorkItem};
use crate::session::{OrchestratorSession, SessionSnapshot};
use crate::stage::{PipelineMode, StageDefinition, StageStatus};
use conveyor_store::StateStore;
use parking_lot::Mutex;
use std::collections::{BTreeMap, BTreeSet};
use std::sync::Arc;
use std::time::Duration;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

#[derive(Debug, Clone)]
pub struct OrchestratorConfig {
    /// Retries after the first attempt; total attempts = max_retries + 1.
    pub max_retries: u32,
    /// Base for exponential backoff between attempts. Zero disables sleeping.
    pub base_delay_ms: u64,
}

impl Default for OrchestratorConfig {
    fn default() -> Self {
        Self {
            max_retries: 2,
            base_delay_ms: 500,
        }
    }
}

pub struct PipelineOrchestrator {
    mode: PipelineMode,
    stages: Vec<StageDefinition>,
    invoker: Arc<dyn AgentInvoker>,
    validator: Arc<dyn ArtifactValidator>,
    store: Arc<dyn StateStore>,
    config: OrchestratorConfig,
    cancel: CancellationToken,
    /// Last persisted revision of the in-flight session, for snapshots.
    current: Mutex<Option<OrchestratorSession>>,
}

impl PipelineOrchestrator {
    pub fn new(
        mode: PipelineMode,
        store: Arc<dyn StateStore>,
        invoker: Arc<dyn AgentInvoker>,
    ) -> Self {
        Self {
            mode,
            stages: mode.stage_catalog(),
            invoker,
            validator: Arc::new(AcceptAllValidator),
            store,
            config: OrchestratorConfig::default(),
            cancel: CancellationToken::new(),
            current: Mutex::new(None),
        }
    }

    pub fn with_validator(mut self, validator: Arc<dyn ArtifactValidator>) -> Self {
        self.validator = validator;
        self
    }

    pub fn with_config(mut self, config: OrchestratorConfig) -> Self {
        self.config = config;
        self
    }

    /// Run the full pipeline from scratch.
    pub async fn run(&self) -> Result<OrchestratorSession> {
        let session = OrchestratorSession::new(
            self.mode,
            self.stages.iter().map(|s| s.name.clone()),
        );
        info!(session_id = %session.id, mode = %self.mode, "starting pipeline run");
        self.execute(session).await
    }

    /// Resume from a prior session: stages it completed are carried over as
    /// pre-completed, minus any whose artifacts no longer validate (those
    /// re-execute, along with everything downstream of them).
    pub async fn resume(&self, prior_id: &str) -> Result<OrchestratorSession> {
        let prior = OrchestratorSession::load(self.store.as_ref(), prior_id).await?;

        // Stage names collide across mode catalogs, so trusting another
        // mode's results would silently mislabel what was actually done.
        if prior.mode != self.mode {
            return Err(OrchestratorError::PipelineModeMismatch {
                session_id: prior_id.to_string(),
                session_mode: prior.mode.to_string(),
                requested_mode: self.mode.to_string(),
            });
        }

        let completed: BTreeSet<String> = prior
            .stage_results
            .iter()
            .filter(|r| r.status == StageStatus::Completed)
            .map(|r| r.name.clone())
            .collect();

        let pre_completed = self.revalidate(completed).await?;

        let mut session = OrchestratorSession::new(
            self.mode,
            self.stages.iter().map(|s| s.name.clone()),
        );
        session.pre_completed = pre_completed;
        session.resumed_from = Some(prior_id.to_string());
        info!(
            session_id = %session.id,
            resumed_from = prior_id,
            pre_completed = session.pre_completed.len(),
            "resuming pipeline"
        );
        self.execute(session).await
    }

    /// Force execution to begin at `stage`: everything before it is treated
    /// as pre-completed (subject to artifact validation), while `stage` and
    /// its transitive dependents always re-execute.
    pub async fn start_from(&self, stage: &str) -> Result<OrchestratorSession> {
        if !self.stages.iter().any(|s| s.name == stage) {
            return Err(OrchestratorError::InvalidStartStage(stage.to_string()));
        }

        let mut forced: BTreeSet<String> = [stage.to_string()].into();
        forced.extend(self.transitive_dependents(&forced));

        let assumed: BTreeSet<String> = self
            .stages
            .iter()
            .map(|s| s.name.clone())
            .filter(|name| !forced.contains(name))
            .collect();
        let pre_completed = self.revalidate(assumed).await?;

        let mut session = OrchestratorSession::new(
            self.mode,
            self.stages.iter().map(|s| s.name.clone()),
        );
        session.pre_completed = pre_completed;
        info!(session_id = %session.id, start_stage = stage, "starting pipeline mid-catalog");
        self.execute(session).await
    }

    /// Monitoring view of the in-flight (or last finished) session.
    pub fn snapshot(&self) -> Option<SessionSnapshot> {
        self.current.lock().as_ref().map(|s| s.snapshot())
    }

    /// Request cooperative shutdown. Idempotent; the running stage fails and
    /// the remainder of the catalog is skipped.
    pub fn dispose(&self) {
        self.cancel.cancel();
    }

    /// Validate a set of trusted stages, dropping any whose artifact fails
    /// re-validation along with every stage downstream of it.
    async fn revalidate(&self, trusted: BTreeSet<String>) -> Result<BTreeSet<String>> {
        let names: Vec<String> = trusted.iter().cloned().collect();
        let invalidated = self
            .validator
            .validate_pre_completed(&names, self.mode)
            .await?;
        if invalidated.is_empty() {
            return Ok(trusted);
        }

        let mut dropped: BTreeSet<String> = invalidated.iter().cloned().collect();
        dropped.extend(self.transitive_dependents(&dropped));
        warn!(
            invalidated = ?invalidated,
            re_executing = dropped.len(),
            "stale artifacts found during resume validation"
        );
        Ok(trusted.difference(&dropped).cloned().collect())
    }

    /// All stages that transitively depend on any stage in `roots`.
    fn transitive_dependents(&self, roots: &BTreeSet<String>) -> BTreeSet<String> {
        let dependents: BTreeMap<&str, Vec<&str>> = {
            let mut map: BTreeMap<&str, Vec<&str>> =
                self.stages.iter().map(|s| (s.name.as_str(), Vec::new())).collect();
            for stage in &self.stages {
                for dep in &stage.depends_on {
                    map.entry(dep.as_str()).or_default().push(stage.name.as_str());
                }
            }
            map
        };

        let mut reached = BTreeSet::new();
        let mut frontier: Vec<&str> = roots.iter().map(String::as_str).collect();
        while let Some(name) = frontier.pop() {
            if let Some(next) = dependents.get(name) {
                for &dependent in next {
                    if reached.insert(dependent.to_string()) {
                        frontier.push(dependent);
                    }
                }
            }
        }
        reached
    }

    /// Topological order over the stage catalog. A cycle or dangling
    /// dependency in the catalog is a configuration bug, not a runtime
    /// condition.
    fn execution_order(&self) -> Result<Vec<String>> {
        let items: Vec<WorkItem> = self
            .stages
            .iter()
            .map(|s| WorkItem::new(&s.name, &s.name, ItemPriority::Medium))
            .collect();
        let edges: Vec<DependencyEdge> = self
            .stages
            .iter()
            .flat_map(|s| {
                s.depends_on
                    .iter()
                    .map(|dep| DependencyEdge::new(&s.name, dep))
            })
            .collect();

        let analysis = DependencyAnalyzer::new(AnalyzerConfig::default())
            .analyze(&items, &edges)
            .map_err(|e| match e {
                OrchestratorError::MissingItemReference(name) => {
                    OrchestratorError::UnknownStage(name)
                }
                other => other,
            })?;
        if analysis.has_cycles() {
            return Err(OrchestratorError::Config(format!(
                "stage catalog for mode {} contains a dependency cycle",
                self.mode
            )));
        }
        Ok(analysis.execution_order)
    }

    async fn execute(&self, mut session: OrchestratorSession) -> Result<OrchestratorSession> {
        let order = self.execution_order()?;

        session.start()?;
        self.persist(&mut session).await?;

        for name in order {
            if self.cancel.is_cancelled() {
                self.abort_remaining(&mut session).await?;
                break;
            }

            if session.pre_completed.contains(&name) {
                session
                    .stage_result_mut(&name)?
                    .complete_pre_validated("validated artifact from previous run")?;
                self.persist(&mut session).await?;
                continue;
            }

            // Cascading skip: any non-completed prerequisite blocks this stage.
            let definition = self
                .stages
                .iter()
                .find(|s| s.name == name)
                .cloned()
                .ok_or_else(|| OrchestratorError::UnknownStage(name.clone()))?;
            let blocked_by: Option<String> = definition
                .depends_on
                .iter()
                .find(|dep| session.stage_status(dep) != Some(StageStatus::Completed))
                .cloned();
            if let Some(prerequisite) = blocked_by {
                session
                    .stage_result_mut(&name)?
                    .skip(format!("prerequisite {} did not complete", prerequisite))?;
                self.persist(&mut session).await?;
                continue;
            }

            self.run_stage(&definition, &mut session).await?;
        }

        let status = session.finish()?;
        self.persist(&mut session).await?;
        info!(session_id = %session.id, status = %status, "pipeline run finished");
        Ok(session)
    }

    async fn run_stage(
        &self,
        definition: &StageDefinition,
        session: &mut OrchestratorSession,
    ) -> Result<()> {
        session.stage_result_mut(&definition.name)?.start()?;
        self.persist(session).await?;
        info!(stage = %definition.name, agent = %definition.agent, "stage started");

        let max_attempts = self.config.max_retries + 1;
        let mut attempt = 0;
        loop {
            attempt += 1;
            let outcome = self.invoke_once(definition, session).await;
            session.stage_result_mut(&definition.name)?.attempts = attempt;
            match outcome {
                Ok(output) => {
                    session.stage_result_mut(&definition.name)?.complete(output)?;
                    self.persist(session).await?;
                    info!(stage = %definition.name, attempt, "stage completed");
                    return Ok(());
                }
                Err(e) => {
                    let category = classify_error(&e);

                    let out_of_attempts = attempt >= max_attempts;
                    if out_of_attempts || !category.is_retryable() {
                        warn!(
                            stage = %definition.name,
                            attempt,
                            category = category.as_str(),
                            error = %e,
                            "stage failed"
                        );
                        session.stage_result_mut(&definition.name)?.fail(e.to_string())?;
                        self.persist(session).await?;
                        return Ok(());
                    }

                    warn!(
                        stage = %definition.name,
                        attempt,
                        category = category.as_str(),
                        error = %e,
                        "stage attempt failed, retrying"
                    );
                    self.persist(session).await?;
                    if !self.backoff(attempt).await {
                        let cancelled =
                            OrchestratorError::Cancelled("retry backoff interrupted".to_string());
                        session
                            .stage_result_mut(&definition.name)?
                            .fail(cancelled.to_string())?;
                        self.persist(session).await?;
                        return Ok(());
                    }
                }
            }
        }
    }

    async fn invoke_once(
        &self,
        definition: &StageDefinition,
        session: &OrchestratorSession,
    ) -> Result<String> {
        let output = self.invoker.invoke(definition, session).await?;
        if output.trim().is_empty() {
            return Err(OrchestratorError::EmptyInvocationOutput(
                definition.name.clone(),
            ));
        }
        Ok(output)
    }

    /// Sleep for the backoff window. Returns false if cancelled while
    /// sleeping.
    async fn backoff(&self, attempt: u32) -> bool {
        let delay = self.config.base_delay_ms.saturating_mul(1u64 << attempt.min(16));
        if delay == 0 {
            return !self.cancel.is_cancelled();
        }
        tokio::select! {
            _ = self.cancel.cancelled() => false,
            _ = tokio::time::sleep(Duration::from_millis(delay)) => true,
        }
    }

    /// Cancellation path: a stage caught mid-run fails, stages that never
    /// started are skipped, and the session still finishes normally so its
    /// terminal status reflects what actually ran.
    async fn abort_remaining(&self, session: &mut OrchestratorSession) -> Result<()> {
        warn!(session_id = %session.id, "cancellation requested, aborting remaining stages");
        for result in session.stage_results.iter_mut() {
            match result.status {
                StageStatus::Running => {
                    result.fail("cancelled")?;
                }
                StageStatus::Pending => {
                    result.skip("cancelled before execution")?;
                }
                _ => {}
            }
        }
        self.persist(session).await
    }

    async fn persist(&self, session: &mut OrchestratorSession) -> Result<()> {
        session.touch();
        session.save(self.store.as_ref()).await?;
        *self.current.lock() = Some(session.clone());
        Ok(())
    }
}

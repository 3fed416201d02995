//! Ports for stage execution and artifact validation.
//!
//! The orchestrator never knows how a stage's agent runs, only that invoking
//! it either yields a non-empty output artifact or an error. Artifact
//! validation is the second port: on resume, previously completed stages are
//! re-checked before being trusted.

use crate::error::{OrchestratorError, Result};
use crate::session::OrchestratorSession;
use crate::stage::{PipelineMode, StageDefinition};
use async_trait::async_trait;

/// Executes the agent behind one pipeline stage.
#[async_trait]
pub trait AgentInvoker: Send + Sync {
    /// Run the stage's agent and return its output artifact. An empty output
    /// is treated as a failure by the orchestrator.
    async fn invoke(
        &self,
        stage: &StageDefinition,
        session: &OrchestratorSession,
    ) -> Result<String>;
}

/// Outcome of re-checking one stage's persisted artifact.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ArtifactCheck {
    pub valid: bool,
    pub reason: Option<String>,
}

impl ArtifactCheck {
    pub fn valid() -> Self {
        Self {
            valid: true,
            reason: None,
        }
    }

    pub fn invalid(reason: impl Into<String>) -> Self {
        Self {
            valid: false,
            reason: Some(reason.into()),
        }
    }
}

/// Re-validates artifacts of previously completed stages on resume.
#[async_trait]
pub trait ArtifactValidator: Send + Sync {
    async fn validate_stage(&self, stage: &str, mode: PipelineMode) -> Result<ArtifactCheck>;

    /// Check a batch of stages, returning the names whose artifacts are no
    /// longer valid and must re-execute.
    async fn validate_pre_completed(
        &self,
        stages: &[String],
        mode: PipelineMode,
    ) -> Result<Vec<String>> {
        let mut invalidated = Vec::new();
        for stage in stages {
            let check = self.validate_stage(stage, mode).await?;
            if !check.valid {
                invalidated.push(stage.clone());
            }
        }
        Ok(invalidated)
    }
}

/// Validator that trusts every persisted artifact. The default when no
/// project-specific validation is wired in.
#[derive(Debug, Default, Clone, Copy)]
pub struct AcceptAllValidator;

#[async_trait]
impl ArtifactValidator for AcceptAllValidator {
    async fn validate_stage(&self, _stage: &str, _mode: PipelineMode) -> Result<ArtifactCheck> {
        Ok(ArtifactCheck::valid())
    }
}

/// Invoker that records each call and echoes a canned artifact. Useful as a
/// dry-run placeholder and in tests.
#[derive(Debug, Default)]
pub struct EchoInvoker {
    invocations: parking_lot::Mutex<Vec<String>>,
}

impl EchoInvoker {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn invocations(&self) -> Vec<String> {
        self.invocations.lock().clone()
    }
}

#[async_trait]
impl AgentInvoker for EchoInvoker {
    async fn invoke(
        &self,
        stage: &StageDefinition,
        _session: &OrchestratorSession,
    ) -> Result<String> {
        self.invocations.lock().push(stage.name.clone());
        Ok(format!("{} output from {}", stage.name, stage.agent))
    }
}

/// Invoker scripted to fail named stages a set number of times before
/// succeeding. Drives the retry and partial-completion tests.
#[derive(Debug, Default)]
pub struct ScriptedInvoker {
    failures: parking_lot::Mutex<std::collections::HashMap<String, u32>>,
    invocations: parking_lot::Mutex<Vec<String>>,
}

impl ScriptedInvoker {
    pub fn new() -> Self {
        Self::default()
    }

    /// Make `stage` fail its next `count` invocations, then succeed.
    pub fn fail_times(self, stage: &str, count: u32) -> Self {
        self.failures.lock().insert(stage.to_string(), count);
        self
    }

    /// Make `stage` fail every invocation.
    pub fn always_fail(self, stage: &str) -> Self {
        self.fail_times(stage, u32::MAX)
    }

    pub fn invocations(&self) -> Vec<String> {
        self.invocations.lock().clone()
    }

    pub fn invocation_count(&self, stage: &str) -> usize {
        self.invocations.lock().iter().filter(|s| *s == stage).count()
    }
}

#[async_trait]
impl AgentInvoker for ScriptedInvoker {
    async fn invoke(
        &self,
        stage: &StageDefinition,
        _session: &OrchestratorSession,
    ) -> Result<String> {
        self.invocations.lock().push(stage.name.clone());

        let mut failures = self.failures.lock();
        if let Some(remaining) = failures.get_mut(&stage.name) {
            if *remaining > 0 {
                *remaining = remaining.saturating_sub(1);
                return Err(OrchestratorError::StageExecutionFailed(format!(
                    "scripted failure in {}",
                    stage.name
                )));
            }
        }
        Ok(format!("{} output", stage.name))
    }
}

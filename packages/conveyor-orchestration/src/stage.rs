use crate::error::{OrchestratorError, Result};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Pipeline mode. Each mode carries its own ordered stage catalog.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PipelineMode {
    /// Build a new deliverable from collected requirements.
    Greenfield,
    /// Extend an existing deliverable; context import comes first.
    Enhancement,
    /// Drive work from externally imported issues.
    Import,
}

impl PipelineMode {
    pub fn as_str(&self) -> &'static str {
        match self {
            PipelineMode::Greenfield => "greenfield",
            PipelineMode::Enhancement => "enhancement",
            PipelineMode::Import => "import",
        }
    }

    pub fn from_str(s: &str) -> Result<Self> {
        match s {
            "greenfield" => Ok(PipelineMode::Greenfield),
            "enhancement" => Ok(PipelineMode::Enhancement),
            "import" => Ok(PipelineMode::Import),
            _ => Err(OrchestratorError::config(format!(
                "Invalid pipeline mode: {}",
                s
            ))),
        }
    }

    /// Static stage catalog for this mode. Dependencies reference stage
    /// names within the same catalog.
    pub fn stage_catalog(&self) -> Vec<StageDefinition> {
        match self {
            PipelineMode::Greenfield => vec![
                StageDefinition::new("collect-requirements", &[]),
                StageDefinition::new("draft-documents", &["collect-requirements"]),
                StageDefinition::new("plan-work", &["draft-documents"]),
                StageDefinition::new("generate-code", &["plan-work"]),
                StageDefinition::new("review-code", &["generate-code"]),
            ],
            PipelineMode::Enhancement => vec![
                StageDefinition::new("import-context", &[]),
                StageDefinition::new("collect-requirements", &["import-context"]),
                StageDefinition::new("draft-documents", &["collect-requirements"]),
                StageDefinition::new("generate-code", &["draft-documents"]),
                StageDefinition::new("review-code", &["generate-code"]),
            ],
            PipelineMode::Import => vec![
                StageDefinition::new("import-issues", &[]),
                StageDefinition::new("plan-work", &["import-issues"]),
                StageDefinition::new("generate-code", &["plan-work"]),
                StageDefinition::new("review-code", &["generate-code"]),
            ],
        }
    }
}

impl std::fmt::Display for PipelineMode {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// A named pipeline stage with declared prerequisite stages. The `agent`
/// field names the external unit of work the stage wraps; the scheduler never
/// interprets it.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StageDefinition {
    pub name: String,
    pub depends_on: Vec<String>,
    pub agent: String,
}

impl StageDefinition {
    pub fn new(name: &str, depends_on: &[&str]) -> Self {
        Self {
            name: name.to_string(),
            depends_on: depends_on.iter().map(|d| d.to_string()).collect(),
            agent: format!("{}-agent", name),
        }
    }

    pub fn with_agent(mut self, agent: impl Into<String>) -> Self {
        self.agent = agent.into();
        self
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StageStatus {
    Pending,
    Running,
    Completed,
    Failed,
    Skipped,
}

impl StageStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            StageStatus::Pending => "pending",
            StageStatus::Running => "running",
            StageStatus::Completed => "completed",
            StageStatus::Failed => "failed",
            StageStatus::Skipped => "skipped",
        }
    }

    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            StageStatus::Completed | StageStatus::Failed | StageStatus::Skipped
        )
    }
}

impl std::fmt::Display for StageStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// Per-stage execution record, accumulated into the session.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StageResult {
    pub name: String,
    pub status: StageStatus,
    pub started_at: Option<DateTime<Utc>>,
    pub finished_at: Option<DateTime<Utc>>,
    pub duration_ms: Option<u64>,
    /// Invocations made for this stage, including the successful one.
    pub attempts: u32,
    pub output: Option<String>,
    pub error: Option<String>,
}

impl StageResult {
    pub fn pending(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            status: StageStatus::Pending,
            started_at: None,
            finished_at: None,
            duration_ms: None,
            attempts: 0,
            output: None,
            error: None,
        }
    }

    pub fn start(&mut self) -> Result<()> {
        match self.status {
            StageStatus::Pending => {
                self.status = StageStatus::Running;
                self.started_at = Some(Utc::now());
                Ok(())
            }
            _ => Err(OrchestratorError::InvalidStateTransition {
                from: self.status.as_str().to_string(),
                to: "running".to_string(),
            }),
        }
    }

    pub fn complete(&mut self, output: impl Into<String>) -> Result<()> {
        match self.status {
            StageStatus::Running => {
                self.finish(StageStatus::Completed);
                self.output = Some(output.into());
                Ok(())
            }
            _ => Err(OrchestratorError::InvalidStateTransition {
                from: self.status.as_str().to_string(),
                to: "completed".to_string(),
            }),
        }
    }

    pub fn fail(&mut self, error: impl Into<String>) -> Result<()> {
        match self.status {
            StageStatus::Running => {
                self.finish(StageStatus::Failed);
                self.error = Some(error.into());
                Ok(())
            }
            _ => Err(OrchestratorError::InvalidStateTransition {
                from: self.status.as_str().to_string(),
                to: "failed".to_string(),
            }),
        }
    }

    /// Cascading skip: a failed or skipped prerequisite skips this stage
    /// without execution.
    pub fn skip(&mut self, reason: impl Into<String>) -> Result<()> {
        match self.status {
            StageStatus::Pending => {
                self.status = StageStatus::Skipped;
                self.error = Some(reason.into());
                Ok(())
            }
            _ => Err(OrchestratorError::InvalidStateTransition {
                from: self.status.as_str().to_string(),
                to: "skipped".to_string(),
            }),
        }
    }

    /// Mark completed without execution (pre-completed on resume).
    pub fn complete_pre_validated(&mut self, note: impl Into<String>) -> Result<()> {
        match self.status {
            StageStatus::Pending => {
                self.status = StageStatus::Completed;
                self.output = Some(note.into());
                Ok(())
            }
            _ => Err(OrchestratorError::InvalidStateTransition {
                from: self.status.as_str().to_string(),
                to: "completed (pre-validated)".to_string(),
            }),
        }
    }

    fn finish(&mut self, status: StageStatus) {
        let now = Utc::now();
        self.duration_ms = self
            .started_at
            .map(|started| (now - started).num_milliseconds().max(0) as u64);
        self.finished_at = Some(now);
        self.status = status;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_mode_roundtrip() {
        for mode in &[
            PipelineMode::Greenfield,
            PipelineMode::Enhancement,
            PipelineMode::Import,
        ] {
            let parsed = PipelineMode::from_str(mode.as_str()).unwrap();
            assert_eq!(*mode, parsed);
        }
        assert!(PipelineMode::from_str("bogus").is_err());
    }

    #[test]
    fn test_catalogs_reference_known_stages() {
        for mode in &[
            PipelineMode::Greenfield,
            PipelineMode::Enhancement,
            PipelineMode::Import,
        ] {
            let catalog = mode.stage_catalog();
            let names: Vec<&str> = catalog.iter().map(|s| s.name.as_str()).collect();
            for stage in &catalog {
                for dep in &stage.depends_on {
                    assert!(
                        names.contains(&dep.as_str()),
                        "{} references unknown dep {}",
                        stage.name,
                        dep
                    );
                }
            }
        }
    }

    #[test]
    fn test_stage_result_lifecycle() {
        let mut result = StageResult::pending("generate-code");
        result.start().unwrap();
        assert_eq!(result.status, StageStatus::Running);
        assert!(result.started_at.is_some());

        result.complete("3 files generated").unwrap();
        assert_eq!(result.status, StageStatus::Completed);
        assert!(result.duration_ms.is_some());
        assert_eq!(result.output.as_deref(), Some("3 files generated"));
    }

    #[test]
    fn test_cannot_start_twice() {
        let mut result = StageResult::pending("plan-work");
        result.start().unwrap();
        assert!(result.start().is_err());
    }

    #[test]
    fn test_fail_records_error() {
        let mut result = StageResult::pending("review-code");
        result.start().unwrap();
        result.fail("reviewer agent crashed").unwrap();
        assert_eq!(result.status, StageStatus::Failed);
        assert_eq!(result.error.as_deref(), Some("reviewer agent crashed"));
    }

    #[test]
    fn test_skip_only_from_pending() {
        let mut result = StageResult::pending("review-code");
        result.skip("prerequisite generate-code failed").unwrap();
        assert_eq!(result.status, StageStatus::Skipped);

        let mut running = StageResult::pending("x");
        running.start().unwrap();
        assert!(running.skip("too late").is_err());
    }
}

//! Session state: the top-level record of one pipeline run.
//!
//! The session is mutated stage-by-stage, persisted after every transition,
//! and immutable once its status reaches a terminal value. The persisted form
//! is plain JSON, loadable by a different process instance than the one that
//! wrote it.

use crate::error::{OrchestratorError, Result};
use crate::stage::{PipelineMode, StageResult, StageStatus};
use chrono::{DateTime, Utc};
use conveyor_store::{StateStore, StateStoreExt};
use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;
use uuid::Uuid;

const SESSIONS_COLLECTION: &str = "sessions";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SessionStatus {
    Pending,
    Running,
    Completed,
    /// At least one stage completed and at least one failed or was skipped.
    /// A normal outcome, not an error.
    Partial,
    Failed,
}

impl SessionStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            SessionStatus::Pending => "pending",
            SessionStatus::Running => "running",
            SessionStatus::Completed => "completed",
            SessionStatus::Partial => "partial",
            SessionStatus::Failed => "failed",
        }
    }

    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            SessionStatus::Completed | SessionStatus::Partial | SessionStatus::Failed
        )
    }
}

impl std::fmt::Display for SessionStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// Summary statistics over a session's stage results.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct SessionStats {
    pub total: usize,
    pub completed: usize,
    pub failed: usize,
    pub skipped: usize,
    pub pending: usize,
    pub total_duration_ms: u64,
}

/// Read-only monitoring projection of a session. Obtainable at any time
/// without mutating state.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SessionSnapshot {
    pub session_id: String,
    pub mode: PipelineMode,
    pub status: SessionStatus,
    pub current_stage: Option<String>,
    pub stats: SessionStats,
    pub elapsed_ms: u64,
}

/// Top-level state of one pipeline run.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct OrchestratorSession {
    pub id: String,
    pub mode: PipelineMode,
    /// Stage results in execution order.
    pub stage_results: Vec<StageResult>,
    /// Stages treated as already done (resume / start-from), after artifact
    /// re-validation.
    pub pre_completed: BTreeSet<String>,
    pub status: SessionStatus,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    /// Prior session this run was resumed from, if any.
    pub resumed_from: Option<String>,
}

impl OrchestratorSession {
    pub fn new(mode: PipelineMode, stage_names: impl IntoIterator<Item = String>) -> Self {
        let now = Utc::now();
        Self {
            id: format!("pipeline-{}", Uuid::new_v4()),
            mode,
            stage_results: stage_names.into_iter().map(StageResult::pending).collect(),
            pre_completed: BTreeSet::new(),
            status: SessionStatus::Pending,
            created_at: now,
            updated_at: now,
            resumed_from: None,
        }
    }

    pub fn stage_result(&self, name: &str) -> Option<&StageResult> {
        self.stage_results.iter().find(|r| r.name == name)
    }

    pub fn stage_result_mut(&mut self, name: &str) -> Result<&mut StageResult> {
        self.ensure_mutable()?;
        self.stage_results
            .iter_mut()
            .find(|r| r.name == name)
            .ok_or_else(|| OrchestratorError::UnknownStage(name.to_string()))
    }

    pub fn stage_status(&self, name: &str) -> Option<StageStatus> {
        self.stage_result(name).map(|r| r.status)
    }

    /// Transition: Pending -> Running.
    pub fn start(&mut self) -> Result<()> {
        match self.status {
            SessionStatus::Pending => {
                self.status = SessionStatus::Running;
                self.touch();
                Ok(())
            }
            _ => Err(OrchestratorError::InvalidStateTransition {
                from: self.status.as_str().to_string(),
                to: "running".to_string(),
            }),
        }
    }

    /// Transition: Running -> terminal status derived from stage outcomes.
    ///
    /// All completed: `Completed`. Some completed, some failed/skipped:
    /// `Partial`. Nothing completed: `Failed`.
    pub fn finish(&mut self) -> Result<SessionStatus> {
        if self.status != SessionStatus::Running {
            return Err(OrchestratorError::InvalidStateTransition {
                from: self.status.as_str().to_string(),
                to: "terminal".to_string(),
            });
        }

        let stats = self.stats();
        self.status = if stats.completed == stats.total && stats.total > 0 {
            SessionStatus::Completed
        } else if stats.completed > 0 {
            SessionStatus::Partial
        } else {
            SessionStatus::Failed
        };
        self.touch();
        Ok(self.status)
    }

    /// Guard for stage-level mutation: terminal sessions are immutable.
    pub fn ensure_mutable(&self) -> Result<()> {
        if self.status.is_terminal() {
            return Err(OrchestratorError::InvalidStateTransition {
                from: self.status.as_str().to_string(),
                to: "stage update".to_string(),
            });
        }
        Ok(())
    }

    pub fn touch(&mut self) {
        self.updated_at = Utc::now();
    }

    pub fn stats(&self) -> SessionStats {
        let mut stats = SessionStats {
            total: self.stage_results.len(),
            ..Default::default()
        };
        for result in &self.stage_results {
            match result.status {
                StageStatus::Completed => stats.completed += 1,
                StageStatus::Failed => stats.failed += 1,
                StageStatus::Skipped => stats.skipped += 1,
                StageStatus::Pending | StageStatus::Running => stats.pending += 1,
            }
            stats.total_duration_ms += result.duration_ms.unwrap_or(0);
        }
        stats
    }

    /// Stages that failed, and stages skipped as a consequence. Drives the
    /// partial-run summary shown to operators.
    pub fn failure_report(&self) -> (Vec<String>, Vec<String>) {
        let failed = self
            .stage_results
            .iter()
            .filter(|r| r.status == StageStatus::Failed)
            .map(|r| r.name.clone())
            .collect();
        let skipped = self
            .stage_results
            .iter()
            .filter(|r| r.status == StageStatus::Skipped)
            .map(|r| r.name.clone())
            .collect();
        (failed, skipped)
    }

    pub fn snapshot(&self) -> SessionSnapshot {
        let current_stage = self
            .stage_results
            .iter()
            .find(|r| r.status == StageStatus::Running)
            .map(|r| r.name.clone());

        SessionSnapshot {
            session_id: self.id.clone(),
            mode: self.mode,
            status: self.status,
            current_stage,
            stats: self.stats(),
            elapsed_ms: (Utc::now() - self.created_at).num_milliseconds().max(0) as u64,
        }
    }

    /// Persist the full session record, replacing the previous revision.
    pub async fn save(&self, store: &dyn StateStore) -> Result<()> {
        store
            .put_record(SESSIONS_COLLECTION, &self.id, self)
            .await?;
        Ok(())
    }

    /// Load a session by id. A missing record maps to `SessionNotFound`;
    /// an unreadable record propagates as a corrupted storage error.
    pub async fn load(store: &dyn StateStore, session_id: &str) -> Result<Self> {
        match store
            .get_record::<OrchestratorSession>(SESSIONS_COLLECTION, session_id)
            .await
        {
            Ok(session) => Ok(session),
            Err(e) if e.is_not_found() => {
                Err(OrchestratorError::SessionNotFound(session_id.to_string()))
            }
            Err(e) => Err(e.into()),
        }
    }

    pub async fn list(store: &dyn StateStore) -> Result<Vec<String>> {
        Ok(store.list_keys(SESSIONS_COLLECTION).await?)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use conveyor_store::MemoryStateStore;

    fn session() -> OrchestratorSession {
        let catalog = PipelineMode::Greenfield.stage_catalog();
        OrchestratorSession::new(
            PipelineMode::Greenfield,
            catalog.into_iter().map(|s| s.name),
        )
    }

    #[test]
    fn test_new_session_is_pending() {
        let session = session();
        assert_eq!(session.status, SessionStatus::Pending);
        assert_eq!(session.stage_results.len(), 5);
        assert!(session
            .stage_results
            .iter()
            .all(|r| r.status == StageStatus::Pending));
    }

    #[test]
    fn test_finish_all_completed() {
        let mut session = session();
        session.start().unwrap();
        for i in 0..session.stage_results.len() {
            session.stage_results[i].start().unwrap();
            session.stage_results[i].complete("done").unwrap();
        }
        assert_eq!(session.finish().unwrap(), SessionStatus::Completed);
    }

    #[test]
    fn test_finish_mixed_is_partial() {
        let mut session = session();
        session.start().unwrap();

        session.stage_results[0].start().unwrap();
        session.stage_results[0].complete("done").unwrap();
        session.stage_results[1].start().unwrap();
        session.stage_results[1].fail("boom").unwrap();
        for i in 2..session.stage_results.len() {
            session.stage_results[i].skip("prerequisite failed").unwrap();
        }

        assert_eq!(session.finish().unwrap(), SessionStatus::Partial);

        let (failed, skipped) = session.failure_report();
        assert_eq!(failed, vec!["draft-documents"]);
        assert_eq!(skipped.len(), 3);
    }

    #[test]
    fn test_finish_nothing_completed_is_failed() {
        let mut session = session();
        session.start().unwrap();
        session.stage_results[0].start().unwrap();
        session.stage_results[0].fail("boom").unwrap();
        for i in 1..session.stage_results.len() {
            session.stage_results[i].skip("prerequisite failed").unwrap();
        }
        assert_eq!(session.finish().unwrap(), SessionStatus::Failed);
    }

    #[test]
    fn test_terminal_session_is_immutable() {
        let mut session = session();
        session.start().unwrap();
        for i in 0..session.stage_results.len() {
            session.stage_results[i].start().unwrap();
            session.stage_results[i].complete("done").unwrap();
        }
        session.finish().unwrap();

        assert!(session.ensure_mutable().is_err());
        assert!(session.start().is_err());
        assert!(session.finish().is_err());

        // Stage records are frozen along with the session.
        let err = session.stage_result_mut("collect-requirements").unwrap_err();
        assert!(matches!(err, OrchestratorError::InvalidStateTransition { .. }));
    }

    #[test]
    fn test_stats_counts() {
        let mut session = session();
        session.start().unwrap();
        session.stage_results[0].start().unwrap();
        session.stage_results[0].complete("ok").unwrap();
        session.stage_results[1].start().unwrap();
        session.stage_results[1].fail("bad").unwrap();
        session.stage_results[2].skip("cascade").unwrap();

        let stats = session.stats();
        assert_eq!(stats.total, 5);
        assert_eq!(stats.completed, 1);
        assert_eq!(stats.failed, 1);
        assert_eq!(stats.skipped, 1);
        assert_eq!(stats.pending, 2);
    }

    #[test]
    fn test_snapshot_reports_current_stage() {
        let mut session = session();
        session.start().unwrap();
        session.stage_results[0].start().unwrap();

        let snapshot = session.snapshot();
        assert_eq!(
            snapshot.current_stage.as_deref(),
            Some("collect-requirements")
        );
        assert_eq!(snapshot.status, SessionStatus::Running);
    }

    #[tokio::test]
    async fn test_store_round_trip_preserves_everything() {
        let store = MemoryStateStore::new();

        let mut session = session();
        session.start().unwrap();
        session.stage_results[0].start().unwrap();
        session.stage_results[0].complete("requirements.md").unwrap();
        session.pre_completed.insert("collect-requirements".to_string());
        session.save(&store).await.unwrap();

        let loaded = OrchestratorSession::load(&store, &session.id).await.unwrap();
        assert_eq!(loaded, session);
        assert_eq!(loaded.mode, PipelineMode::Greenfield);
        assert_eq!(
            loaded.stage_status("collect-requirements"),
            Some(StageStatus::Completed)
        );
        // Ordering preserved.
        let names: Vec<&str> = loaded.stage_results.iter().map(|r| r.name.as_str()).collect();
        assert_eq!(
            names,
            vec![
                "collect-requirements",
                "draft-documents",
                "plan-work",
                "generate-code",
                "review-code"
            ]
        );
    }

    #[tokio::test]
    async fn test_load_missing_session() {
        let store = MemoryStateStore::new();
        let err = OrchestratorSession::load(&store, "pipeline-missing")
            .await
            .unwrap_err();
        assert!(matches!(err, OrchestratorError::SessionNotFound(_)));
    }

    #[tokio::test]
    async fn test_load_corrupted_session_is_distinct() {
        let store = MemoryStateStore::new();
        store.corrupt("sessions", "pipeline-bad");

        let err = OrchestratorSession::load(&store, "pipeline-bad")
            .await
            .unwrap_err();
        match err {
            OrchestratorError::Storage(e) => assert!(e.is_corrupted()),
            other => panic!("expected corrupted storage error, got {:?}", other),
        }
    }
}

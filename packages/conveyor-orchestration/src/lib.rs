/*
 * Conveyor Orchestration - Pipeline Scheduling and Work Distribution
 *
 * Single-process pipeline core for agent-driven development workflows.
 *
 * Architecture:
 * - Dependency Analyzer (DAG scheduling, cycle detection, priority scoring)
 * - Worker Pool Manager (bounded slots, work orders, persistence)
 * - Pipeline Orchestrator (mode catalogs, retry, resume, start-from)
 * - State persistence through the conveyor-store port (JSON on disk)
 */

// Public modules
pub mod analyzer;
pub mod error;
pub mod invoker;
pub mod item;
pub mod orchestrator;
pub mod pool;
pub mod queue;
pub mod session;
pub mod stage;

// Re-exports
pub use analyzer::{AnalysisResult, AnalyzedItem, AnalyzerConfig, DependencyAnalyzer};
pub use error::{classify_error, ErrorCategory, OrchestratorError, Result};
pub use invoker::{
    AcceptAllValidator, AgentInvoker, ArtifactCheck, ArtifactValidator, EchoInvoker,
};
pub use item::{DependencyEdge, ItemPriority, ItemStatus, WorkItem};
pub use orchestrator::{OrchestratorConfig, PipelineOrchestrator};
pub use pool::{PoolSnapshot, Worker, WorkerPool, WorkerStatus, WorkOrder, WorkOrderResult};
pub use queue::{QueueEntry, ReadyQueue};
pub use session::{
    OrchestratorSession, SessionSnapshot, SessionStats, SessionStatus,
};
pub use stage::{PipelineMode, StageDefinition, StageResult, StageStatus};

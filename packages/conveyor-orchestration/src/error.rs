use thiserror::Error;

pub type Result<T> = std::result::Result<T, OrchestratorError>;

#[derive(Error, Debug)]
pub enum OrchestratorError {
    // --- Validation errors: reported immediately, never retried ---
    #[error("Dependency edge references unknown item: {0}")]
    MissingItemReference(String),

    #[error("Unknown stage: {0}")]
    UnknownStage(String),

    #[error("Invalid start stage override: {0}")]
    InvalidStartStage(String),

    #[error("Session {session_id} belongs to the {session_mode} pipeline, not {requested_mode}")]
    PipelineModeMismatch {
        session_id: String,
        session_mode: String,
        requested_mode: String,
    },

    // --- Structural errors: contract violations, never crash the process ---
    #[error("Worker {worker_id} is not available: {reason}")]
    WorkerNotAvailable { worker_id: String, reason: String },

    #[error("Unknown worker: {0}")]
    UnknownWorker(String),

    #[error("Invalid state transition: {from} -> {to}")]
    InvalidStateTransition { from: String, to: String },

    // --- Execution errors: retried up to the limit, then terminal ---
    #[error("Stage execution failed: {0}")]
    StageExecutionFailed(String),

    #[error("Agent invocation returned empty output for stage {0}")]
    EmptyInvocationOutput(String),

    #[error("Timeout: {0}")]
    Timeout(String),

    // --- State errors: carry the corrupted/not-found distinction ---
    #[error("Storage error: {0}")]
    Storage(#[from] conveyor_store::StorageError),

    #[error("Session not found: {0}")]
    SessionNotFound(String),

    // --- Lifecycle ---
    #[error("Cancelled: {0}")]
    Cancelled(String),

    #[error("Serialization error: {0}")]
    Serialization(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Configuration error: {0}")]
    Config(String),

    #[error(transparent)]
    Other(#[from] anyhow::Error),
}

impl OrchestratorError {
    pub fn serialization<E: std::fmt::Display>(e: E) -> Self {
        Self::Serialization(e.to_string())
    }

    pub fn config<E: std::fmt::Display>(e: E) -> Self {
        Self::Config(e.to_string())
    }

    /// Whether this error should propagate to the top-level caller instead of
    /// being absorbed into stage/session status fields.
    pub fn is_fatal(&self) -> bool {
        match self {
            OrchestratorError::MissingItemReference(_)
            | OrchestratorError::UnknownStage(_)
            | OrchestratorError::InvalidStartStage(_)
            | OrchestratorError::PipelineModeMismatch { .. }
            | OrchestratorError::SessionNotFound(_)
            | OrchestratorError::Config(_) => true,
            OrchestratorError::Storage(e) => e.is_corrupted(),
            _ => false,
        }
    }
}

impl From<serde_json::Error> for OrchestratorError {
    fn from(err: serde_json::Error) -> Self {
        OrchestratorError::Serialization(err.to_string())
    }
}

/// Error category for retry logic
#[derive(Debug, Clone, Copy, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorCategory {
    /// Transient error - retry automatically (e.g., timeout, connection)
    Transient,
    /// Permanent error - don't retry (e.g., invalid input, validation)
    Permanent,
    /// Infrastructure error - alert ops (e.g., OOM, disk full)
    Infrastructure,
}

impl ErrorCategory {
    pub fn as_str(&self) -> &'static str {
        match self {
            ErrorCategory::Transient => "transient",
            ErrorCategory::Permanent => "permanent",
            ErrorCategory::Infrastructure => "infrastructure",
        }
    }

    pub fn from_str(s: &str) -> Result<Self> {
        match s {
            "transient" => Ok(ErrorCategory::Transient),
            "permanent" => Ok(ErrorCategory::Permanent),
            "infrastructure" => Ok(ErrorCategory::Infrastructure),
            _ => Err(OrchestratorError::Config(format!(
                "Invalid error category: {}",
                s
            ))),
        }
    }

    pub fn is_retryable(&self) -> bool {
        matches!(self, ErrorCategory::Transient)
    }
}

impl std::fmt::Display for ErrorCategory {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// Classify an invocation error for retry decisions.
///
/// Keyword heuristic over the error text; anything unrecognized defaults to
/// transient so one flaky invocation gets its retries.
pub fn classify_error(error: &OrchestratorError) -> ErrorCategory {
    match error {
        OrchestratorError::Timeout(_) => ErrorCategory::Transient,
        OrchestratorError::MissingItemReference(_)
        | OrchestratorError::UnknownStage(_)
        | OrchestratorError::InvalidStartStage(_)
        | OrchestratorError::PipelineModeMismatch { .. }
        | OrchestratorError::Config(_)
        | OrchestratorError::EmptyInvocationOutput(_) => ErrorCategory::Permanent,
        _ => {
            let text = error.to_string().to_lowercase();
            if text.contains("out of memory") || text.contains("no space left") {
                ErrorCategory::Infrastructure
            } else if text.contains("invalid") || text.contains("malformed") {
                ErrorCategory::Permanent
            } else {
                ErrorCategory::Transient
            }
        }
    }
}

use crate::error::{OrchestratorError, Result};
use serde::{Deserialize, Serialize};

/// Priority class for a work item, most-urgent first.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ItemPriority {
    Critical,
    High,
    Medium,
    Low,
}

impl ItemPriority {
    pub fn as_str(&self) -> &'static str {
        match self {
            ItemPriority::Critical => "critical",
            ItemPriority::High => "high",
            ItemPriority::Medium => "medium",
            ItemPriority::Low => "low",
        }
    }

    pub fn from_str(s: &str) -> Result<Self> {
        match s {
            "critical" => Ok(ItemPriority::Critical),
            "high" => Ok(ItemPriority::High),
            "medium" => Ok(ItemPriority::Medium),
            "low" => Ok(ItemPriority::Low),
            _ => Err(OrchestratorError::config(format!(
                "Invalid priority: {}",
                s
            ))),
        }
    }

    /// Rank used by the priority-score formula: 0 for most urgent.
    pub fn rank(&self) -> i64 {
        match self {
            ItemPriority::Critical => 0,
            ItemPriority::High => 1,
            ItemPriority::Medium => 2,
            ItemPriority::Low => 3,
        }
    }
}

impl std::fmt::Display for ItemPriority {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// Lifecycle status of a work item. Only the scheduler mutates this.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ItemStatus {
    Pending,
    Assigned,
    InProgress,
    Completed,
    Failed,
}

impl ItemStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            ItemStatus::Pending => "pending",
            ItemStatus::Assigned => "assigned",
            ItemStatus::InProgress => "in_progress",
            ItemStatus::Completed => "completed",
            ItemStatus::Failed => "failed",
        }
    }

    pub fn is_terminal(&self) -> bool {
        matches!(self, ItemStatus::Completed | ItemStatus::Failed)
    }
}

impl std::fmt::Display for ItemStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// An atomic unit of schedulable work.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct WorkItem {
    pub id: String,
    pub title: String,
    pub priority: ItemPriority,
    /// Effort estimate in arbitrary points; informational, not scheduled on.
    pub effort: u32,
    pub status: ItemStatus,
}

impl WorkItem {
    pub fn new(id: impl Into<String>, title: impl Into<String>, priority: ItemPriority) -> Self {
        Self {
            id: id.into(),
            title: title.into(),
            priority,
            effort: 1,
            status: ItemStatus::Pending,
        }
    }

    pub fn with_effort(mut self, effort: u32) -> Self {
        self.effort = effort;
        self
    }
}

/// Directed relation: `from` depends on `to`.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct DependencyEdge {
    pub from: String,
    pub to: String,
}

impl DependencyEdge {
    pub fn new(from: impl Into<String>, to: impl Into<String>) -> Self {
        Self {
            from: from.into(),
            to: to.into(),
        }
    }
}

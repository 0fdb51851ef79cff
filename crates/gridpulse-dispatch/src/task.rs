//! Task definitions — the core data model for dispatched analysis work.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// A persisted unit of work routing to exactly one provider/capability pair.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Task {
    /// Unique task ID (uuid v4).
    pub id: String,
    /// Human-readable name.
    pub name: String,
    #[serde(default)]
    pub description: String,
    /// Which analysis to run.
    pub capability: Capability,
    /// Which registered provider runs it.
    pub provider: String,
    /// Opaque parameter bag handed to the capability handler.
    #[serde(default)]
    pub params: serde_json::Value,
    pub status: TaskStatus,
    #[serde(default)]
    pub priority: TaskPriority,
    /// Who created the task (API caller, or "poller"/"fan-out").
    pub created_by: Option<String>,
    pub created_at: DateTime<Utc>,
    /// When set, the poller picks the task up once this time has passed.
    pub scheduled_for: Option<DateTime<Utc>>,
    pub started_at: Option<DateTime<Utc>>,
    pub completed_at: Option<DateTime<Utc>>,
    /// Success payload from the capability handler.
    pub result: Option<serde_json::Value>,
    /// Failure message, prefixed "retryable:" or "permanent:".
    pub error: Option<String>,
    /// Links a child to its parent for one-level fan-out.
    pub parent_task_id: Option<String>,
    /// Free-form bag; `inherit_parent_result: true` requests result splicing.
    #[serde(default)]
    pub metadata: serde_json::Value,
}

/// Task status.
///
/// Transitions are monotonic: `Pending | Scheduled → InProgress →
/// {Completed, Failed}`, `Cancelled` from any pre-terminal state. The one
/// added edge is the manual re-execution of a `Failed` task.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum TaskStatus {
    Pending,
    Scheduled,
    InProgress,
    Completed,
    Failed,
    Cancelled,
}

impl TaskStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Pending => "pending",
            Self::Scheduled => "scheduled",
            Self::InProgress => "in_progress",
            Self::Completed => "completed",
            Self::Failed => "failed",
            Self::Cancelled => "cancelled",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "pending" => Some(Self::Pending),
            "scheduled" => Some(Self::Scheduled),
            "in_progress" => Some(Self::InProgress),
            "completed" => Some(Self::Completed),
            "failed" => Some(Self::Failed),
            "cancelled" => Some(Self::Cancelled),
            _ => None,
        }
    }

    /// Completed and Cancelled are immutable; Failed allows manual re-run.
    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Completed | Self::Failed | Self::Cancelled)
    }
}

/// Task priority.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Default)]
#[serde(rename_all = "snake_case")]
pub enum TaskPriority {
    Low,
    #[default]
    Medium,
    High,
    Critical,
}

impl TaskPriority {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Low => "low",
            Self::Medium => "medium",
            Self::High => "high",
            Self::Critical => "critical",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "low" => Some(Self::Low),
            "medium" => Some(Self::Medium),
            "high" => Some(Self::High),
            "critical" => Some(Self::Critical),
            _ => None,
        }
    }
}

/// The closed set of analysis capabilities.
///
/// Each capability declares the parameter keys its handler requires; the
/// executor checks them against the task's bag before dispatch, so handlers
/// never see a bag missing a declared key.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "snake_case")]
pub enum Capability {
    SentimentAnalysis,
    Summarization,
    TrendAnalysis,
    AnomalyDetection,
    TaskDecomposition,
}

impl Capability {
    pub const ALL: [Capability; 5] = [
        Self::SentimentAnalysis,
        Self::Summarization,
        Self::TrendAnalysis,
        Self::AnomalyDetection,
        Self::TaskDecomposition,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::SentimentAnalysis => "sentiment_analysis",
            Self::Summarization => "summarization",
            Self::TrendAnalysis => "trend_analysis",
            Self::AnomalyDetection => "anomaly_detection",
            Self::TaskDecomposition => "task_decomposition",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "sentiment_analysis" => Some(Self::SentimentAnalysis),
            "summarization" => Some(Self::Summarization),
            "trend_analysis" => Some(Self::TrendAnalysis),
            "anomaly_detection" => Some(Self::AnomalyDetection),
            "task_decomposition" => Some(Self::TaskDecomposition),
            _ => None,
        }
    }

    /// Parameter keys that must be present in a task's bag.
    pub fn required_params(&self) -> &'static [&'static str] {
        match self {
            Self::SentimentAnalysis => &["text"],
            Self::Summarization => &["text"],
            Self::TrendAnalysis => &["data"],
            Self::AnomalyDetection => &["data"],
            Self::TaskDecomposition => &["goal"],
        }
    }
}

impl std::fmt::Display for Capability {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Fields accepted when creating a task.
#[derive(Debug, Clone, Deserialize)]
pub struct NewTask {
    pub name: String,
    #[serde(default)]
    pub description: String,
    pub capability: Capability,
    pub provider: String,
    #[serde(default)]
    pub params: serde_json::Value,
    #[serde(default)]
    pub priority: TaskPriority,
    pub created_by: Option<String>,
    pub scheduled_for: Option<DateTime<Utc>>,
    pub parent_task_id: Option<String>,
    #[serde(default)]
    pub metadata: serde_json::Value,
}

/// Fields accepted by the PATCH endpoint. Absent = unchanged.
/// Only pre-terminal, not-yet-started tasks can be patched.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct TaskPatch {
    pub name: Option<String>,
    pub description: Option<String>,
    pub priority: Option<TaskPriority>,
    pub params: Option<serde_json::Value>,
    pub metadata: Option<serde_json::Value>,
    pub scheduled_for: Option<DateTime<Utc>>,
}

impl Task {
    /// Build a fresh task from creation fields. Status is Pending, or
    /// Scheduled when `scheduled_for` is set.
    pub fn from_new(new: NewTask) -> Self {
        let status = if new.scheduled_for.is_some() {
            TaskStatus::Scheduled
        } else {
            TaskStatus::Pending
        };
        Self {
            id: uuid::Uuid::new_v4().to_string(),
            name: new.name,
            description: new.description,
            capability: new.capability,
            provider: new.provider,
            params: if new.params.is_null() {
                serde_json::json!({})
            } else {
                new.params
            },
            status,
            priority: new.priority,
            created_by: new.created_by,
            created_at: Utc::now(),
            scheduled_for: new.scheduled_for,
            started_at: None,
            completed_at: None,
            result: None,
            error: None,
            parent_task_id: new.parent_task_id,
            metadata: if new.metadata.is_null() {
                serde_json::json!({})
            } else {
                new.metadata
            },
        }
    }

    /// Whether this child asked to inherit its parent's result.
    pub fn inherits_parent_result(&self) -> bool {
        self.metadata
            .get("inherit_parent_result")
            .and_then(|v| v.as_bool())
            .unwrap_or(false)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_status_round_trip() {
        for s in [
            TaskStatus::Pending,
            TaskStatus::Scheduled,
            TaskStatus::InProgress,
            TaskStatus::Completed,
            TaskStatus::Failed,
            TaskStatus::Cancelled,
        ] {
            assert_eq!(TaskStatus::parse(s.as_str()), Some(s));
        }
        assert_eq!(TaskStatus::parse("bogus"), None);
    }

    #[test]
    fn test_capability_wire_names() {
        assert_eq!(
            Capability::parse("anomaly_detection"),
            Some(Capability::AnomalyDetection)
        );
        assert_eq!(Capability::SentimentAnalysis.as_str(), "sentiment_analysis");
        for c in Capability::ALL {
            assert!(!c.required_params().is_empty());
            assert_eq!(Capability::parse(c.as_str()), Some(c));
        }
    }

    #[test]
    fn test_from_new_sets_scheduled_status() {
        let new = NewTask {
            name: "nightly rollup".into(),
            description: String::new(),
            capability: Capability::TrendAnalysis,
            provider: "statistics".into(),
            params: serde_json::Value::Null,
            priority: TaskPriority::default(),
            created_by: None,
            scheduled_for: Some(Utc::now()),
            parent_task_id: None,
            metadata: serde_json::Value::Null,
        };
        let task = Task::from_new(new);
        assert_eq!(task.status, TaskStatus::Scheduled);
        assert!(task.params.is_object());
    }

    #[test]
    fn test_inherit_flag() {
        let mut new = NewTask {
            name: "child".into(),
            description: String::new(),
            capability: Capability::Summarization,
            provider: "insight".into(),
            params: serde_json::json!({"text": "x"}),
            priority: TaskPriority::default(),
            created_by: None,
            scheduled_for: None,
            parent_task_id: Some("p1".into()),
            metadata: serde_json::json!({"inherit_parent_result": true}),
        };
        assert!(Task::from_new(new.clone()).inherits_parent_result());
        new.metadata = serde_json::json!({});
        assert!(!Task::from_new(new).inherits_parent_result());
    }
}

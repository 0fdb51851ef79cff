//! Task executor — runs a task through its provider's capability handler.
//!
//! The pending/scheduled/failed → in_progress transition is a single atomic
//! claim in the store, so two concurrent `execute` calls on the same id have
//! exactly one winner. Completed and Cancelled tasks are immutable; a Failed
//! task may be re-executed manually (that call IS the retry — there is no
//! automatic retry policy).

use std::sync::Arc;

use gridpulse_core::error::{GridPulseError, Result};

use crate::registry::{CapabilityProvider as _, CapabilityRegistry};
use crate::store::TaskStore;
use crate::task::{Task, TaskStatus};

/// Statuses the manual execute endpoint may claim from.
const CLAIMABLE: [TaskStatus; 3] = [
    TaskStatus::Pending,
    TaskStatus::Scheduled,
    TaskStatus::Failed,
];

#[derive(Clone)]
pub struct TaskExecutor {
    store: Arc<TaskStore>,
    registry: Arc<CapabilityRegistry>,
}

impl TaskExecutor {
    pub fn new(store: Arc<TaskStore>, registry: Arc<CapabilityRegistry>) -> Self {
        Self { store, registry }
    }

    pub fn store(&self) -> &Arc<TaskStore> {
        &self.store
    }

    pub fn registry(&self) -> &Arc<CapabilityRegistry> {
        &self.registry
    }

    /// Execute a task by id and return it in its final state.
    ///
    /// NotFound for unknown ids; Conflict when the task is in progress or in
    /// an immutable terminal state (Completed/Cancelled).
    pub async fn execute(&self, task_id: &str) -> Result<Task> {
        let existing = self.store.get_existing(task_id)?;
        let Some(task) = self.store.claim(task_id, &CLAIMABLE)? else {
            return Err(GridPulseError::Conflict(format!(
                "task '{task_id}' is {} and cannot be executed",
                existing.status.as_str()
            )));
        };
        self.run_claimed(task).await
    }

    /// Run a task the caller has already claimed (status is InProgress).
    pub(crate) async fn run_claimed(&self, task: Task) -> Result<Task> {
        tracing::info!(
            "▶️ Executing task '{}' ({}) — {}/{}",
            task.name,
            task.id,
            task.provider,
            task.capability
        );

        match self.dispatch(&task).await {
            Ok(result) => {
                self.store.mark_completed(&task.id, &result)?;
                tracing::info!("✅ Task completed: '{}' ({})", task.name, task.id);
                self.fan_out(&task.id, &result)?;
                self.store.get_existing(&task.id)
            }
            Err(e) => {
                let message = e.stored_message();
                self.store.mark_failed(&task.id, &message)?;
                tracing::warn!("❌ Task failed: '{}' ({}): {message}", task.name, task.id);
                Err(e)
            }
        }
    }

    /// Resolve provider + capability and invoke the handler.
    async fn dispatch(&self, task: &Task) -> Result<serde_json::Value> {
        let provider = self.registry.get(&task.provider).ok_or_else(|| {
            GridPulseError::NotFound(format!("provider '{}'", task.provider))
        })?;

        if !provider.capabilities().contains(&task.capability) {
            return Err(GridPulseError::NotFound(format!(
                "capability '{}' on provider '{}'",
                task.capability, task.provider
            )));
        }

        if !provider.is_available().await {
            return Err(GridPulseError::Unavailable(format!(
                "provider '{}' is not configured",
                task.provider
            )));
        }

        // Declared parameter schema, checked before the handler runs
        let missing: Vec<&str> = task
            .capability
            .required_params()
            .iter()
            .copied()
            .filter(|key| task.params.get(key).is_none())
            .collect();
        if !missing.is_empty() {
            return Err(GridPulseError::Validation(format!(
                "missing required parameter(s) for {}: {}",
                task.capability,
                missing.join(", ")
            )));
        }

        provider.execute(task.capability, &task.params).await
    }

    /// Fire pending children of a completed parent, splicing the parent's
    /// result into each child that asked for it. Children run detached — the
    /// parent's caller does not wait for them.
    fn fan_out(&self, parent_id: &str, parent_result: &serde_json::Value) -> Result<()> {
        let children = self.store.pending_children(parent_id)?;
        for child in children {
            if child.inherits_parent_result() {
                let mut params = child.params.clone();
                if let Some(obj) = params.as_object_mut() {
                    obj.insert("parent_result".to_string(), parent_result.clone());
                }
                self.store.set_params(&child.id, &params)?;
            }
            tracing::info!(
                "🌱 Queueing child task '{}' ({}) of {}",
                child.name,
                child.id,
                parent_id
            );
            let executor = self.clone();
            let child_id = child.id.clone();
            tokio::spawn(async move {
                if let Err(e) = Box::pin(executor.execute(&child_id)).await {
                    tracing::warn!("⚠️ Child task {child_id} failed: {e}");
                }
            });
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::registry::CapabilityProvider;
    use crate::task::{Capability, NewTask, TaskPriority};
    use async_trait::async_trait;
    use serde_json::{Value, json};

    struct EchoProvider {
        available: bool,
    }

    const ECHO_CAPS: [Capability; 2] =
        [Capability::TrendAnalysis, Capability::AnomalyDetection];

    #[async_trait]
    impl CapabilityProvider for EchoProvider {
        fn name(&self) -> &str {
            "statistics"
        }
        fn description(&self) -> &str {
            "echo"
        }
        fn capabilities(&self) -> &[Capability] {
            &ECHO_CAPS
        }
        async fn is_available(&self) -> bool {
            self.available
        }
        async fn execute(&self, capability: Capability, params: &Value) -> super::Result<Value> {
            if params.get("boom").is_some() {
                return Err(GridPulseError::Execution("handler blew up".into()));
            }
            Ok(json!({"capability": capability.as_str(), "echo": params}))
        }
    }

    fn setup(available: bool) -> TaskExecutor {
        let store = Arc::new(TaskStore::open_in_memory().unwrap());
        let registry = Arc::new(CapabilityRegistry::new());
        registry
            .register(Arc::new(EchoProvider { available }))
            .unwrap();
        TaskExecutor::new(store, registry)
    }

    fn new_task(provider: &str, capability: Capability, params: Value) -> NewTask {
        NewTask {
            name: "t".into(),
            description: String::new(),
            capability,
            provider: provider.into(),
            params,
            priority: TaskPriority::default(),
            created_by: None,
            scheduled_for: None,
            parent_task_id: None,
            metadata: Value::Null,
        }
    }

    #[tokio::test]
    async fn test_round_trip_pending_to_completed() {
        let executor = setup(true);
        let task = executor
            .store()
            .create(new_task(
                "statistics",
                Capability::TrendAnalysis,
                json!({"data": [1]}),
            ))
            .unwrap();

        let done = executor.execute(&task.id).await.unwrap();
        assert_eq!(done.status, TaskStatus::Completed);
        assert!(done.completed_at.is_some());
        assert_eq!(done.result.unwrap()["capability"], json!("trend_analysis"));
    }

    #[tokio::test]
    async fn test_handler_error_marks_failed_and_allows_rerun() {
        let executor = setup(true);
        let task = executor
            .store()
            .create(new_task(
                "statistics",
                Capability::TrendAnalysis,
                json!({"data": [1], "boom": true}),
            ))
            .unwrap();

        let err = executor.execute(&task.id).await.unwrap_err();
        assert!(matches!(err, GridPulseError::Execution(_)));

        let failed = executor.store().get_existing(&task.id).unwrap();
        assert_eq!(failed.status, TaskStatus::Failed);
        assert!(failed.error.unwrap().starts_with("permanent:"));

        // Manual re-execution of a failed task is the retry path
        let mut fixed = failed.params.clone();
        fixed.as_object_mut().unwrap().remove("boom");
        executor.store().set_params(&task.id, &fixed).unwrap();
        let done = executor.execute(&task.id).await.unwrap();
        assert_eq!(done.status, TaskStatus::Completed);
        assert!(done.error.is_none());
    }

    #[tokio::test]
    async fn test_completed_task_is_immutable() {
        let executor = setup(true);
        let task = executor
            .store()
            .create(new_task(
                "statistics",
                Capability::TrendAnalysis,
                json!({"data": [1]}),
            ))
            .unwrap();
        executor.execute(&task.id).await.unwrap();

        let err = executor.execute(&task.id).await.unwrap_err();
        assert!(matches!(err, GridPulseError::Conflict(_)));
    }

    #[tokio::test]
    async fn test_unknown_task_and_provider() {
        let executor = setup(true);
        assert!(matches!(
            executor.execute("no-such-id").await.unwrap_err(),
            GridPulseError::NotFound(_)
        ));

        let task = executor
            .store()
            .create(new_task(
                "nobody",
                Capability::TrendAnalysis,
                json!({"data": [1]}),
            ))
            .unwrap();
        let err = executor.execute(&task.id).await.unwrap_err();
        assert!(matches!(err, GridPulseError::NotFound(_)));
        // The failure is recorded on the task as permanent
        let failed = executor.store().get_existing(&task.id).unwrap();
        assert_eq!(failed.status, TaskStatus::Failed);
        assert!(failed.error.unwrap().starts_with("permanent:"));
    }

    #[tokio::test]
    async fn test_unavailable_provider_is_retryable_failure() {
        let executor = setup(false);
        let task = executor
            .store()
            .create(new_task(
                "statistics",
                Capability::TrendAnalysis,
                json!({"data": [1]}),
            ))
            .unwrap();
        let err = executor.execute(&task.id).await.unwrap_err();
        assert!(matches!(err, GridPulseError::Unavailable(_)));
        let failed = executor.store().get_existing(&task.id).unwrap();
        assert!(failed.error.unwrap().starts_with("retryable:"));
    }

    #[tokio::test]
    async fn test_missing_required_params_fail_before_handler() {
        let executor = setup(true);
        let task = executor
            .store()
            .create(new_task("statistics", Capability::TrendAnalysis, json!({})))
            .unwrap();
        let err = executor.execute(&task.id).await.unwrap_err();
        assert!(matches!(err, GridPulseError::Validation(_)));
    }

    #[tokio::test]
    async fn test_unsupported_capability_rejected() {
        let executor = setup(true);
        let task = executor
            .store()
            .create(new_task(
                "statistics",
                Capability::Summarization,
                json!({"text": "x"}),
            ))
            .unwrap();
        let err = executor.execute(&task.id).await.unwrap_err();
        assert!(matches!(err, GridPulseError::NotFound(_)));
    }

    #[tokio::test]
    async fn test_fan_out_splices_parent_result_into_children() {
        let executor = setup(true);
        let parent = executor
            .store()
            .create(new_task(
                "statistics",
                Capability::TrendAnalysis,
                json!({"data": [1, 2]}),
            ))
            .unwrap();

        let mut children = Vec::new();
        for name in ["child-a", "child-b"] {
            let mut child = new_task(
                "statistics",
                Capability::AnomalyDetection,
                json!({"data": [9]}),
            );
            child.name = name.into();
            child.parent_task_id = Some(parent.id.clone());
            child.metadata = json!({"inherit_parent_result": true});
            children.push(executor.store().create(child).unwrap());
        }

        let done = executor.execute(&parent.id).await.unwrap();
        let parent_result = done.result.unwrap();

        // Children run detached — poll until both reach a terminal state
        for child in &children {
            let mut final_child = None;
            for _ in 0..50 {
                let t = executor.store().get_existing(&child.id).unwrap();
                if t.status.is_terminal() {
                    final_child = Some(t);
                    break;
                }
                tokio::time::sleep(std::time::Duration::from_millis(10)).await;
            }
            let t = final_child.expect("child never reached a terminal state");
            assert_eq!(t.status, TaskStatus::Completed);
            assert_eq!(t.params["parent_result"], parent_result);
        }
    }
}

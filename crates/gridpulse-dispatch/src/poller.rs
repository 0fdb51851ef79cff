//! Due-task poller — the loop that picks up scheduled work.
//!
//! Each tick claims due tasks straight from the store (atomic
//! `UPDATE ... RETURNING`), so there is no in-memory re-entrancy flag and a
//! second process polling the same database cannot double-fire a task.

use std::sync::Arc;

use chrono::Utc;

use crate::executor::TaskExecutor;

/// Max tasks claimed per tick. A backlog larger than this drains over the
/// following ticks.
const CLAIM_BATCH: usize = 32;

/// Run the poller loop forever. Spawn this as a background tokio task.
pub async fn spawn_poller(executor: Arc<TaskExecutor>, check_interval_secs: u64) {
    tracing::info!("⏰ Poller started (check every {}s)", check_interval_secs);

    let mut interval = tokio::time::interval(std::time::Duration::from_secs(check_interval_secs));
    interval.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);

    loop {
        interval.tick().await;
        tick(&executor).await;
    }
}

/// One poll cycle: claim everything due and run it sequentially.
/// Returns the number of tasks run.
pub async fn tick(executor: &TaskExecutor) -> usize {
    let due = match executor.store().claim_due(Utc::now(), CLAIM_BATCH) {
        Ok(due) => due,
        Err(e) => {
            tracing::warn!("⚠️ Due-task scan failed: {e}");
            return 0;
        }
    };

    if due.is_empty() {
        return 0;
    }
    tracing::info!("🔔 {} due task(s) claimed", due.len());

    let mut run = 0;
    for task in due {
        let id = task.id.clone();
        // run_claimed records failures on the task row; nothing to re-raise here
        if let Err(e) = executor.run_claimed(task).await {
            tracing::warn!("⚠️ Scheduled task {id} failed: {e}");
        }
        run += 1;
    }
    run
}

//! Periodic sweep: queue reminders for tasks approaching their due date,
//! then persist the derived overdue status.
//!
//! The loop variants run on tokio intervals, spawned from main at startup.
//! A scan failure aborts that batch — nothing is partially retried within
//! one invocation; the next interval picks up whatever stayed unmarked.

use std::sync::Arc;
use std::time::Duration;

use anyhow::Result;
use tokio::time::interval;
use tracing::{debug, info, warn};

use crate::notify::{Notifier, Reminder};
use crate::tasks::store::now_ts;
use crate::tasks::{TaskService, TaskStore};

/// Counts from one sweep invocation.
#[derive(Debug, Clone, Copy)]
pub struct SweepOutcome {
    pub notifications_queued: usize,
    pub overdue_marked: u64,
}

/// One sweep: scan for eligible reminders, enqueue each exactly once, then
/// mark overdue tasks. Eligibility re-checks the sent timestamp at scan
/// time, so a task appears in at most one sweep per reminder window.
pub async fn run_once(
    store: &TaskStore,
    notifier: &Notifier,
    window_secs: i64,
) -> Result<SweepOutcome> {
    let now = now_ts();

    let eligible = store.tasks_needing_reminder(now, window_secs).await?;
    let mut queued = 0usize;
    for row in eligible {
        if notifier.enqueue(Reminder::from(row)).await {
            queued += 1;
        }
    }

    let overdue_marked = store.mark_overdue(now).await?;

    info!(
        notifications_queued = queued,
        overdue_marked,
        "upcoming-tasks sweep complete"
    );
    Ok(SweepOutcome { notifications_queued: queued, overdue_marked })
}

/// Background sweep loop. First run fires immediately after startup.
pub async fn run_sweep_loop(
    store: TaskStore,
    notifier: Notifier,
    interval_secs: u64,
    window_secs: i64,
) {
    info!(interval_secs, "sweep loop started");
    let mut ticker = interval(Duration::from_secs(interval_secs.max(1)));
    loop {
        ticker.tick().await;
        if let Err(e) = run_once(&store, &notifier, window_secs).await {
            warn!(err = %e, "sweep aborted — will retry on the next interval");
        }
    }
}

/// Evict expired cache entries once a minute so idle namespaces do not hold
/// dead pages until the next lookup.
pub async fn run_cache_purge(service: Arc<TaskService>, interval_secs: u64) {
    let mut ticker = interval(Duration::from_secs(interval_secs.max(1)));
    loop {
        ticker.tick().await;
        let (listing, search) = service.purge_expired();
        if listing + search > 0 {
            debug!(listing, search, "purged expired cache entries");
        }
    }
}

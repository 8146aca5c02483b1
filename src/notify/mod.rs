//! Asynchronous reminder dispatch.
//!
//! The scheduler enqueues; a single worker task drains the queue, sends the
//! reminder through the configured [`Mailer`], and then sets the task's
//! notification-sent timestamp with a guarded UPDATE. A failed delivery
//! leaves the timestamp NULL so the next sweep re-selects the task —
//! at-least-once semantics, duplicates accepted.

pub mod mailer;

pub use mailer::{CaptureMailer, LogMailer, Mailer, SmtpMailer};

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use anyhow::{anyhow, Result};
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn};

use crate::tasks::store::now_ts;
use crate::tasks::{ReminderRow, TaskStore};

/// Bounded queue depth: a sweep of more than this many eligible tasks backs
/// up the enqueue side instead of growing without bound.
const QUEUE_DEPTH: usize = 256;

/// A queued reminder work item.
#[derive(Debug, Clone)]
pub struct Reminder {
    pub task_id: i64,
    pub user_id: i64,
    pub recipient: String,
    pub title: String,
    pub due_date: i64,
}

impl From<ReminderRow> for Reminder {
    fn from(row: ReminderRow) -> Self {
        Reminder {
            task_id: row.id,
            user_id: row.user_id,
            recipient: row.email,
            title: row.title,
            due_date: row.due_date,
        }
    }
}

/// In-dispatch retry for transient transport failures. Exhaustion leaves the
/// task eligible for the next sweep.
#[derive(Debug, Clone)]
pub struct RetryPolicy {
    /// Total attempts including the first.
    pub attempts: u32,
    pub initial_delay: Duration,
    pub max_delay: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            attempts: 3,
            initial_delay: Duration::from_millis(500),
            max_delay: Duration::from_secs(10),
        }
    }
}

impl RetryPolicy {
    /// No real waiting — for tests.
    pub fn instant() -> Self {
        Self {
            attempts: 3,
            initial_delay: Duration::from_millis(1),
            max_delay: Duration::from_millis(5),
        }
    }
}

/// Dispatcher counters, exposed for the health endpoint and tests.
#[derive(Debug, Default)]
pub struct DispatchStats {
    pub queued: AtomicU64,
    pub sent: AtomicU64,
    pub failed: AtomicU64,
}

/// Cloneable handle to the dispatch queue.
#[derive(Clone)]
pub struct Notifier {
    tx: mpsc::Sender<Reminder>,
    stats: Arc<DispatchStats>,
}

impl Notifier {
    /// Start the worker task and return the enqueue handle plus the worker's
    /// join handle (awaited by the one-shot sweep command to drain).
    pub fn spawn(
        store: TaskStore,
        mailer: Arc<dyn Mailer>,
        retry: RetryPolicy,
    ) -> (Notifier, JoinHandle<()>) {
        let (tx, rx) = mpsc::channel(QUEUE_DEPTH);
        let stats = Arc::new(DispatchStats::default());
        let handle = tokio::spawn(run_worker(rx, store, mailer, retry, stats.clone()));
        (Notifier { tx, stats }, handle)
    }

    /// Hand a reminder to the worker. Returns immediately once queued;
    /// delivery happens asynchronously.
    pub async fn enqueue(&self, reminder: Reminder) -> bool {
        match self.tx.send(reminder).await {
            Ok(()) => {
                self.stats.queued.fetch_add(1, Ordering::Relaxed);
                true
            }
            Err(e) => {
                warn!(task_id = e.0.task_id, "dispatch queue closed — reminder dropped");
                false
            }
        }
    }

    pub fn stats(&self) -> &DispatchStats {
        &self.stats
    }
}

async fn run_worker(
    mut rx: mpsc::Receiver<Reminder>,
    store: TaskStore,
    mailer: Arc<dyn Mailer>,
    retry: RetryPolicy,
    stats: Arc<DispatchStats>,
) {
    info!("notification dispatcher started");
    while let Some(job) = rx.recv().await {
        dispatch_one(&store, mailer.as_ref(), &retry, &stats, job).await;
    }
    info!("notification dispatcher stopped");
}

/// Send one reminder, then mark the task notified. The status of the task is
/// deliberately not re-read here; only the sent-timestamp guard applies.
async fn dispatch_one(
    store: &TaskStore,
    mailer: &dyn Mailer,
    retry: &RetryPolicy,
    stats: &DispatchStats,
    job: Reminder,
) {
    let subject = format!("Task Due Tomorrow: {}", job.title);
    let body = reminder_body(&job);

    match send_with_retry(mailer, &job.recipient, &subject, &body, retry).await {
        Ok(()) => match store.mark_notification_sent(job.task_id, now_ts()).await {
            Ok(true) => {
                stats.sent.fetch_add(1, Ordering::Relaxed);
                info!(task_id = job.task_id, recipient = %job.recipient, "task reminder sent");
            }
            Ok(false) => {
                debug!(task_id = job.task_id, "reminder already marked sent");
            }
            Err(e) => {
                warn!(
                    task_id = job.task_id,
                    err = %e,
                    "reminder sent but marking failed — may resend on a later sweep"
                );
            }
        },
        Err(e) => {
            stats.failed.fetch_add(1, Ordering::Relaxed);
            error!(
                task_id = job.task_id,
                recipient = %job.recipient,
                err = %e,
                "reminder delivery failed — task stays eligible for the next sweep"
            );
        }
    }
}

fn reminder_body(job: &Reminder) -> String {
    let due = chrono::DateTime::from_timestamp(job.due_date, 0)
        .map(|dt| dt.to_rfc3339())
        .unwrap_or_else(|| job.due_date.to_string());
    format!(
        "Your task \"{}\" is due at {}.\n\n\
         Open your task list to review or reschedule it.",
        job.title, due
    )
}

/// Retry a send with doubling delay, capped at `max_delay`.
async fn send_with_retry(
    mailer: &dyn Mailer,
    to: &str,
    subject: &str,
    body: &str,
    policy: &RetryPolicy,
) -> Result<()> {
    let mut delay = policy.initial_delay;
    for attempt in 1..=policy.attempts {
        match mailer.send(to, subject, body).await {
            Ok(()) => {
                if attempt > 1 {
                    debug!(attempt, "reminder send succeeded after retry");
                }
                return Ok(());
            }
            Err(e) if attempt < policy.attempts => {
                warn!(
                    attempt,
                    max = policy.attempts,
                    err = %e,
                    "reminder send failed — retrying"
                );
                tokio::time::sleep(delay).await;
                delay = (delay * 2).min(policy.max_delay);
            }
            Err(e) => return Err(e),
        }
    }
    Err(anyhow!("retry attempts exhausted"))
}

// ─── Tests ────────────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use std::sync::atomic::AtomicU32;

    /// Fails the first `fail_first` sends, then succeeds.
    struct FlakyMailer {
        fail_first: u32,
        calls: AtomicU32,
    }

    #[async_trait]
    impl Mailer for FlakyMailer {
        async fn send(&self, _to: &str, _subject: &str, _body: &str) -> Result<()> {
            let n = self.calls.fetch_add(1, Ordering::Relaxed) + 1;
            if n <= self.fail_first {
                Err(anyhow!("transport error on attempt {n}"))
            } else {
                Ok(())
            }
        }
    }

    #[tokio::test]
    async fn retry_recovers_from_transient_failures() {
        let mailer = FlakyMailer { fail_first: 2, calls: AtomicU32::new(0) };
        let policy = RetryPolicy::instant();
        send_with_retry(&mailer, "a@b.test", "s", "b", &policy)
            .await
            .unwrap();
        assert_eq!(mailer.calls.load(Ordering::Relaxed), 3);
    }

    #[tokio::test]
    async fn retry_gives_up_after_all_attempts() {
        let mailer = FlakyMailer { fail_first: 10, calls: AtomicU32::new(0) };
        let policy = RetryPolicy::instant();
        let result = send_with_retry(&mailer, "a@b.test", "s", "b", &policy).await;
        assert!(result.is_err());
        assert_eq!(mailer.calls.load(Ordering::Relaxed), 3);
    }

    #[tokio::test]
    async fn capture_mailer_records_subject() {
        let mailer = CaptureMailer::new();
        mailer.send("a@b.test", "Task Due Tomorrow: x", "body").await.unwrap();
        let sent = mailer.sent();
        assert_eq!(sent.len(), 1);
        assert_eq!(sent[0].1, "Task Due Tomorrow: x");
    }
}

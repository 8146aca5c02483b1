use anyhow::{anyhow, Result};
use sqlx::{QueryBuilder, Sqlite, SqlitePool};
use std::time::{SystemTime, UNIX_EPOCH};

use super::model::{ReminderRow, TaskPriority, TaskRow, TaskStatus};
use super::query::{Cursor, ListQuery};

/// Default timeout for individual SQLite queries (same as storage/mod.rs).
const QUERY_TIMEOUT: std::time::Duration = std::time::Duration::from_secs(30);

/// Hard cap on unpaginated search results.
const SEARCH_LIMIT: i64 = 100;

/// Execute a future with the standard query timeout.
async fn with_timeout<T>(fut: impl std::future::Future<Output = Result<T>>) -> Result<T> {
    match tokio::time::timeout(QUERY_TIMEOUT, fut).await {
        Ok(result) => result,
        Err(_) => Err(anyhow!(
            "database query timed out after {}s",
            QUERY_TIMEOUT.as_secs()
        )),
    }
}

pub fn now_ts() -> i64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .unwrap_or_default()
        .as_secs() as i64
}

/// Escape LIKE wildcards in user-supplied search text. Queries pass
/// `ESCAPE '\'` alongside the pattern.
fn like_pattern(needle: &str) -> String {
    let mut escaped = String::with_capacity(needle.len() + 2);
    for ch in needle.chars() {
        if matches!(ch, '%' | '_' | '\\') {
            escaped.push('\\');
        }
        escaped.push(ch);
    }
    format!("%{escaped}%")
}

// ─── Field sets ───────────────────────────────────────────────────────────────

/// Validated field set for create and full update.
#[derive(Debug, Clone)]
pub struct TaskFields {
    pub title: String,
    pub description: Option<String>,
    pub status: TaskStatus,
    pub priority: TaskPriority,
    pub due_date: i64,
}

/// One page of a listing query.
#[derive(Debug, Clone)]
pub struct TaskPage {
    pub tasks: Vec<TaskRow>,
    pub next_cursor: Option<String>,
    pub per_page: i64,
}

// ─── TaskStore ────────────────────────────────────────────────────────────────

#[derive(Clone)]
pub struct TaskStore {
    pool: SqlitePool,
}

impl TaskStore {
    pub fn new(pool: SqlitePool) -> Self {
        Self { pool }
    }

    // ─── CRUD ────────────────────────────────────────────────────────────────

    pub async fn create(&self, user_id: i64, fields: &TaskFields) -> Result<TaskRow> {
        let now = now_ts();
        let id = sqlx::query(
            "INSERT INTO tasks
             (title, description, status, priority, due_date, user_id, created_at, updated_at)
             VALUES (?, ?, ?, ?, ?, ?, ?, ?)",
        )
        .bind(&fields.title)
        .bind(&fields.description)
        .bind(fields.status.as_str())
        .bind(fields.priority.as_str())
        .bind(fields.due_date)
        .bind(user_id)
        .bind(now)
        .bind(now)
        .execute(&self.pool)
        .await?
        .last_insert_rowid();

        self.get(id)
            .await?
            .ok_or_else(|| anyhow!("task not found after insert"))
    }

    /// Fetch one task by id, soft-deleted rows excluded. Not owner-scoped —
    /// callers distinguish not-found from not-owned.
    pub async fn get(&self, id: i64) -> Result<Option<TaskRow>> {
        Ok(
            sqlx::query_as("SELECT * FROM tasks WHERE id = ? AND deleted_at IS NULL")
                .bind(id)
                .fetch_optional(&self.pool)
                .await?,
        )
    }

    /// Full update, owner-constrained. Returns false when no live row
    /// matched (missing, deleted, or another owner's task).
    pub async fn update(&self, user_id: i64, id: i64, fields: &TaskFields) -> Result<bool> {
        let now = now_ts();
        let rows_affected = sqlx::query(
            "UPDATE tasks
             SET title = ?, description = ?, status = ?, priority = ?, due_date = ?, updated_at = ?
             WHERE id = ? AND user_id = ? AND deleted_at IS NULL",
        )
        .bind(&fields.title)
        .bind(&fields.description)
        .bind(fields.status.as_str())
        .bind(fields.priority.as_str())
        .bind(fields.due_date)
        .bind(now)
        .bind(id)
        .bind(user_id)
        .execute(&self.pool)
        .await?
        .rows_affected();
        Ok(rows_affected > 0)
    }

    pub async fn set_status(&self, user_id: i64, id: i64, status: TaskStatus) -> Result<bool> {
        let now = now_ts();
        let rows_affected = sqlx::query(
            "UPDATE tasks SET status = ?, updated_at = ?
             WHERE id = ? AND user_id = ? AND deleted_at IS NULL",
        )
        .bind(status.as_str())
        .bind(now)
        .bind(id)
        .bind(user_id)
        .execute(&self.pool)
        .await?
        .rows_affected();
        Ok(rows_affected > 0)
    }

    /// Soft delete: the row stays for audit but disappears from every query.
    pub async fn soft_delete(&self, user_id: i64, id: i64) -> Result<bool> {
        let now = now_ts();
        let rows_affected = sqlx::query(
            "UPDATE tasks SET deleted_at = ?, updated_at = ?
             WHERE id = ? AND user_id = ? AND deleted_at IS NULL",
        )
        .bind(now)
        .bind(now)
        .bind(id)
        .bind(user_id)
        .execute(&self.pool)
        .await?
        .rows_affected();
        Ok(rows_affected > 0)
    }

    // ─── Listing ─────────────────────────────────────────────────────────────

    /// Run a validated listing query: owner scope, AND-combined filters,
    /// keyset pagination on (sort value, id).
    pub async fn list(&self, user_id: i64, q: &ListQuery) -> Result<TaskPage> {
        let pool = self.pool.clone();
        let expr = q.sort.key.expr();
        let (op, dir) = if q.sort.descending { ("<", "DESC") } else { (">", "ASC") };

        let mut qb: QueryBuilder<Sqlite> =
            QueryBuilder::new("SELECT * FROM tasks WHERE deleted_at IS NULL AND user_id = ");
        qb.push_bind(user_id);

        if let Some(status) = q.status {
            qb.push(" AND status = ").push_bind(status.as_str());
        }
        if let Some(priority) = q.priority {
            qb.push(" AND priority = ").push_bind(priority.as_str());
        }
        if let Some(from) = q.due_from {
            qb.push(" AND due_date >= ").push_bind(from);
        }
        if let Some(to) = q.due_to {
            qb.push(" AND due_date <= ").push_bind(to);
        }
        if let Some(ref needle) = q.search {
            let pattern = like_pattern(needle);
            qb.push(" AND (title LIKE ")
                .push_bind(pattern.clone())
                .push(" ESCAPE '\\' OR description LIKE ")
                .push_bind(pattern)
                .push(" ESCAPE '\\')");
        }
        if let Some(cursor) = q.cursor {
            qb.push(format!(" AND ({expr} {op} "))
                .push_bind(cursor.last)
                .push(format!(" OR ({expr} = "))
                .push_bind(cursor.last)
                .push(format!(" AND id {op} "))
                .push_bind(cursor.id)
                .push("))");
        }
        qb.push(format!(" ORDER BY {expr} {dir}, id {dir} LIMIT "));
        // Fetch one extra row to know whether another page exists.
        qb.push_bind(q.per_page + 1);

        let mut rows: Vec<TaskRow> = with_timeout(async {
            Ok(qb.build_query_as().fetch_all(&pool).await?)
        })
        .await?;

        let next_cursor = if rows.len() as i64 > q.per_page {
            rows.truncate(q.per_page as usize);
            rows.last().map(|last| {
                Cursor { last: q.sort.key.value_of(last), id: last.id }.encode()
            })
        } else {
            None
        };

        Ok(TaskPage { tasks: rows, next_cursor, per_page: q.per_page })
    }

    /// Owner-scoped substring search over title and description.
    pub async fn search(&self, user_id: i64, needle: &str) -> Result<Vec<TaskRow>> {
        let pool = self.pool.clone();
        let pattern = like_pattern(needle);
        with_timeout(async {
            Ok(sqlx::query_as(
                "SELECT * FROM tasks
                 WHERE deleted_at IS NULL AND user_id = ?
                   AND (title LIKE ? ESCAPE '\\' OR description LIKE ? ESCAPE '\\')
                 ORDER BY created_at DESC
                 LIMIT ?",
            )
            .bind(user_id)
            .bind(&pattern)
            .bind(&pattern)
            .bind(SEARCH_LIMIT)
            .fetch_all(&pool)
            .await?)
        })
        .await
    }

    // ─── Sweep queries ───────────────────────────────────────────────────────

    /// Tasks eligible for a due-date reminder: not yet notified, due within
    /// (now, now+window], still in an active status. Joined with the owner's
    /// email so the dispatcher needs no second lookup.
    pub async fn tasks_needing_reminder(
        &self,
        now: i64,
        window_secs: i64,
    ) -> Result<Vec<ReminderRow>> {
        let pool = self.pool.clone();
        with_timeout(async {
            Ok(sqlx::query_as(
                "SELECT t.id, t.title, t.due_date, t.user_id, u.email
                 FROM tasks t
                 JOIN users u ON u.id = t.user_id
                 WHERE t.deleted_at IS NULL
                   AND t.notification_sent_at IS NULL
                   AND t.due_date > ?
                   AND t.due_date <= ?
                   AND t.status IN ('pending', 'in_progress')
                 ORDER BY t.due_date ASC",
            )
            .bind(now)
            .bind(now + window_secs)
            .fetch_all(&pool)
            .await?)
        })
        .await
    }

    /// Persist the derived overdue status: due date passed, not completed,
    /// not already overdue. Returns the number of rows transitioned.
    pub async fn mark_overdue(&self, now: i64) -> Result<u64> {
        let rows_affected = sqlx::query(
            "UPDATE tasks SET status = 'overdue', updated_at = ?
             WHERE deleted_at IS NULL
               AND due_date < ?
               AND status NOT IN ('completed', 'overdue')",
        )
        .bind(now)
        .bind(now)
        .execute(&self.pool)
        .await?
        .rows_affected();
        Ok(rows_affected)
    }

    /// Set the notification-sent timestamp, at most once. Returns false when
    /// the task was already marked (or no longer exists) — the caller treats
    /// that as an idempotent no-op.
    pub async fn mark_notification_sent(&self, task_id: i64, now: i64) -> Result<bool> {
        let rows_affected = sqlx::query(
            "UPDATE tasks SET notification_sent_at = ?, updated_at = ?
             WHERE id = ? AND notification_sent_at IS NULL",
        )
        .bind(now)
        .bind(now)
        .bind(task_id)
        .execute(&self.pool)
        .await?
        .rows_affected();
        Ok(rows_affected > 0)
    }
}

// ─── Tests ────────────────────────────────────────────────────────────────────

//! Domain service: composes the task store with the listing/search caches
//! and enforces the rules the HTTP layer must never bypass — field
//! validation, the completed-only-from-in-progress transition, and
//! owner-scoped access.

use std::time::Duration;

use serde::Deserialize;
use sha2::{Digest, Sha256};
use tracing::debug;

use crate::cache::TtlCache;

use super::model::{TaskPriority, TaskRow, TaskStatus};
use super::query::{parse_rfc3339, ListParams, ListQuery};
use super::store::{now_ts, TaskFields, TaskPage, TaskStore};
use super::{FieldError, TaskError};

const COMPLETE_REQUIRES_IN_PROGRESS: &str =
    "Task must be in progress before it can be completed.";

/// Create/full-update request body. Every field is optional at the serde
/// layer so that missing fields become field-level errors, not a 400.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct TaskInput {
    pub title: Option<String>,
    pub description: Option<String>,
    pub due_date: Option<String>,
    pub priority: Option<String>,
    pub status: Option<String>,
}

pub struct TaskService {
    store: TaskStore,
    list_cache: TtlCache<TaskPage>,
    search_cache: TtlCache<Vec<TaskRow>>,
}

impl TaskService {
    pub fn new(store: TaskStore, cache_ttl: Duration) -> Self {
        Self {
            store,
            list_cache: TtlCache::new(cache_ttl),
            search_cache: TtlCache::new(cache_ttl),
        }
    }

    pub fn store(&self) -> &TaskStore {
        &self.store
    }

    // ─── Reads ───────────────────────────────────────────────────────────────

    /// Fetch one task. NotFound for missing/deleted rows, Forbidden when the
    /// task belongs to someone else.
    pub async fn get(&self, user_id: i64, id: i64) -> Result<TaskRow, TaskError> {
        let task = self.store.get(id).await?.ok_or(TaskError::NotFound)?;
        if task.user_id != user_id {
            return Err(TaskError::Forbidden);
        }
        Ok(task)
    }

    /// Listing with filters/sort/cursor, memoized per user + parameter hash.
    pub async fn list(&self, user_id: i64, params: &ListParams) -> Result<TaskPage, TaskError> {
        let query = ListQuery::from_params(params).map_err(TaskError::Invalid)?;
        let key = list_key(user_id, &query);
        let page = self
            .list_cache
            .remember(&key, || self.store.list(user_id, &query))
            .await?;
        Ok(page)
    }

    /// Free-text search, memoized in its own namespace. Not evicted on write
    /// — stale for at most the cache TTL.
    pub async fn search(
        &self,
        user_id: i64,
        query: Option<&str>,
    ) -> Result<Vec<TaskRow>, TaskError> {
        let needle = match query {
            Some(s) if !s.is_empty() => s,
            _ => return Err(TaskError::invalid("query", "The search query is required.")),
        };
        let key = format!("tasks:search:{user_id}:{}", sha256_hex(needle));
        let tasks = self
            .search_cache
            .remember(&key, || self.store.search(user_id, needle))
            .await?;
        Ok(tasks)
    }

    // ─── Writes ──────────────────────────────────────────────────────────────

    pub async fn create(&self, user_id: i64, input: &TaskInput) -> Result<TaskRow, TaskError> {
        let fields = validate_fields(input, now_ts()).map_err(TaskError::Invalid)?;
        let task = self.store.create(user_id, &fields).await?;
        self.evict_listings(user_id);
        Ok(task)
    }

    /// Full update. A status change to `completed` is only allowed from
    /// `in_progress`.
    pub async fn update(
        &self,
        user_id: i64,
        id: i64,
        input: &TaskInput,
    ) -> Result<TaskRow, TaskError> {
        let current = self.get(user_id, id).await?;
        let fields = validate_fields(input, now_ts()).map_err(TaskError::Invalid)?;

        if fields.status == TaskStatus::Completed
            && current.status != TaskStatus::Completed.as_str()
            && !current.can_complete()
        {
            return Err(TaskError::invalid("status", COMPLETE_REQUIRES_IN_PROGRESS));
        }

        if !self.store.update(user_id, id, &fields).await? {
            return Err(TaskError::NotFound);
        }
        self.evict_listings(user_id);
        self.get(user_id, id).await
    }

    pub async fn set_status(
        &self,
        user_id: i64,
        id: i64,
        status: Option<&str>,
    ) -> Result<TaskRow, TaskError> {
        let status = match status {
            None => return Err(TaskError::invalid("status", "The task status is required.")),
            Some(s) => TaskStatus::parse(s)
                .ok_or_else(|| TaskError::invalid("status", "The selected status is invalid."))?,
        };

        let current = self.get(user_id, id).await?;
        if status == TaskStatus::Completed && !current.can_complete() {
            return Err(TaskError::invalid("status", COMPLETE_REQUIRES_IN_PROGRESS));
        }

        if !self.store.set_status(user_id, id, status).await? {
            return Err(TaskError::NotFound);
        }
        self.evict_listings(user_id);
        self.get(user_id, id).await
    }

    pub async fn delete(&self, user_id: i64, id: i64) -> Result<(), TaskError> {
        // Resolve ownership first so a foreign id reports Forbidden, not 404.
        self.get(user_id, id).await?;
        if !self.store.soft_delete(user_id, id).await? {
            return Err(TaskError::NotFound);
        }
        self.evict_listings(user_id);
        Ok(())
    }

    // ─── Cache maintenance ───────────────────────────────────────────────────

    fn evict_listings(&self, user_id: i64) {
        let evicted = self.list_cache.invalidate_prefix(&format!("tasks:{user_id}:"));
        if evicted > 0 {
            debug!(user_id, evicted, "listing cache invalidated");
        }
    }

    /// Drop expired entries from both namespaces. Returns (listing, search)
    /// counts for the purge job's log line.
    pub fn purge_expired(&self) -> (usize, usize) {
        (self.list_cache.purge_expired(), self.search_cache.purge_expired())
    }
}

fn list_key(user_id: i64, query: &ListQuery) -> String {
    format!("tasks:{user_id}:{}", sha256_hex(&query.canonical()))
}

fn sha256_hex(input: &str) -> String {
    let mut hasher = Sha256::new();
    hasher.update(input.as_bytes());
    format!("{:x}", hasher.finalize())
}

/// Validate a create/full-update body. Collects every field error.
fn validate_fields(input: &TaskInput, now: i64) -> Result<TaskFields, Vec<FieldError>> {
    let mut errors: Vec<FieldError> = Vec::new();

    let title = match input.title.as_deref() {
        None | Some("") => {
            errors.push(("title", "The task title is required.".to_string()));
            String::new()
        }
        Some(t) if t.chars().count() > 255 => {
            errors.push(("title", "The title may not be greater than 255 characters.".to_string()));
            String::new()
        }
        Some(t) => t.to_string(),
    };

    let due_date = match input.due_date.as_deref() {
        None | Some("") => {
            errors.push(("due_date", "The due date is required.".to_string()));
            0
        }
        Some(s) => match parse_rfc3339(s) {
            Some(ts) if ts > now => ts,
            Some(_) => {
                errors.push(("due_date", "The due date must be a future date.".to_string()));
                0
            }
            None => {
                errors.push((
                    "due_date",
                    "The due date must be an RFC 3339 timestamp.".to_string(),
                ));
                0
            }
        },
    };

    let priority = match input.priority.as_deref() {
        None | Some("") => {
            errors.push(("priority", "The task priority is required.".to_string()));
            TaskPriority::Medium
        }
        Some(p) => match TaskPriority::parse(p) {
            Some(v) => v,
            None => {
                errors.push(("priority", "The selected priority is invalid.".to_string()));
                TaskPriority::Medium
            }
        },
    };

    let status = match input.status.as_deref() {
        None | Some("") => {
            errors.push(("status", "The task status is required.".to_string()));
            TaskStatus::Pending
        }
        Some(s) => match TaskStatus::parse(s) {
            Some(v) => v,
            None => {
                errors.push(("status", "The selected status is invalid.".to_string()));
                TaskStatus::Pending
            }
        },
    };

    if !errors.is_empty() {
        return Err(errors);
    }

    Ok(TaskFields {
        title,
        description: input.description.clone().filter(|d| !d.is_empty()),
        status,
        priority,
        due_date,
    })
}

// ─── Tests ────────────────────────────────────────────────────────────────────

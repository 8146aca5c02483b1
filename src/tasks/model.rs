use serde::{Deserialize, Serialize};

// ─── Enumerations ─────────────────────────────────────────────────────────────

/// Task lifecycle status. Stored as TEXT in the tasks table.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TaskStatus {
    Pending,
    InProgress,
    Completed,
    Overdue,
}

impl TaskStatus {
    pub const ALL: [TaskStatus; 4] = [
        TaskStatus::Pending,
        TaskStatus::InProgress,
        TaskStatus::Completed,
        TaskStatus::Overdue,
    ];

    pub fn as_str(self) -> &'static str {
        match self {
            TaskStatus::Pending => "pending",
            TaskStatus::InProgress => "in_progress",
            TaskStatus::Completed => "completed",
            TaskStatus::Overdue => "overdue",
        }
    }

    pub fn parse(s: &str) -> Option<TaskStatus> {
        Self::ALL.into_iter().find(|v| v.as_str() == s)
    }
}

/// Task priority. Sorting uses [`TaskPriority::rank`], never the lexical order
/// of the stored strings.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TaskPriority {
    Low,
    Medium,
    High,
}

impl TaskPriority {
    pub const ALL: [TaskPriority; 3] =
        [TaskPriority::Low, TaskPriority::Medium, TaskPriority::High];

    pub fn as_str(self) -> &'static str {
        match self {
            TaskPriority::Low => "low",
            TaskPriority::Medium => "medium",
            TaskPriority::High => "high",
        }
    }

    pub fn parse(s: &str) -> Option<TaskPriority> {
        Self::ALL.into_iter().find(|v| v.as_str() == s)
    }

    /// Ordinal used for priority sorting: high=3, medium=2, low=1.
    pub fn rank(self) -> i64 {
        match self {
            TaskPriority::High => 3,
            TaskPriority::Medium => 2,
            TaskPriority::Low => 1,
        }
    }
}

// ─── Row types ────────────────────────────────────────────────────────────────

/// A task row as stored. Status and priority stay TEXT at this layer; the
/// enums above validate them at the service boundary.
#[derive(Debug, Clone, sqlx::FromRow, Serialize, Deserialize)]
pub struct TaskRow {
    pub id: i64,
    pub title: String,
    pub description: Option<String>,
    pub status: String,
    pub priority: String,
    pub due_date: i64,
    pub notification_sent_at: Option<i64>,
    pub user_id: i64,
    pub deleted_at: Option<i64>,
    pub created_at: i64,
    pub updated_at: i64,
}

impl TaskRow {
    /// A task may only transition to `completed` from `in_progress`.
    pub fn can_complete(&self) -> bool {
        self.status == TaskStatus::InProgress.as_str()
    }

    /// Read-time convenience only — the persisted status column is the
    /// authoritative source once the sweep has run.
    pub fn is_overdue(&self, now: i64) -> bool {
        self.due_date < now && self.status != TaskStatus::Completed.as_str()
    }
}

/// An eligible reminder, joined with the owner's email address.
#[derive(Debug, Clone, sqlx::FromRow)]
pub struct ReminderRow {
    pub id: i64,
    pub title: String,
    pub due_date: i64,
    pub user_id: i64,
    pub email: String,
}

// ─── Tests ────────────────────────────────────────────────────────────────────

//! Listing query parameters: a closed set of filters, a sort specification,
//! and an opaque keyset cursor. Everything is validated up front — unknown
//! sort keys, malformed dates, and bad cursors are field-level errors, never
//! raw SQL input.

use base64::engine::general_purpose::URL_SAFE_NO_PAD;
use base64::Engine as _;
use chrono::DateTime;
use serde::Deserialize;

use super::model::{TaskPriority, TaskRow, TaskStatus};
use super::FieldError;

pub const DEFAULT_PER_PAGE: i64 = 15;
pub const MAX_PER_PAGE: i64 = 100;

// ─── Raw request parameters ───────────────────────────────────────────────────

/// Query-string parameters as they arrive on `GET /tasks`. Unknown keys are
/// rejected at deserialization — the filter set is a whitelist.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct ListParams {
    pub status: Option<String>,
    pub priority: Option<String>,
    pub due_date_from: Option<String>,
    pub due_date_to: Option<String>,
    pub search: Option<String>,
    pub sort: Option<String>,
    pub per_page: Option<i64>,
    pub cursor: Option<String>,
}

// ─── Sort ─────────────────────────────────────────────────────────────────────

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SortKey {
    CreatedAt,
    DueDate,
    Priority,
}

impl SortKey {
    /// SQL expression producing the integer sort value for this key.
    pub fn expr(self) -> &'static str {
        match self {
            SortKey::CreatedAt => "created_at",
            SortKey::DueDate => "due_date",
            SortKey::Priority => {
                "CASE priority WHEN 'high' THEN 3 WHEN 'medium' THEN 2 WHEN 'low' THEN 1 ELSE 0 END"
            }
        }
    }

    /// The sort value of a row, matching [`SortKey::expr`]. Used to build the
    /// next-page cursor from the last row of a page.
    pub fn value_of(self, row: &TaskRow) -> i64 {
        match self {
            SortKey::CreatedAt => row.created_at,
            SortKey::DueDate => row.due_date,
            SortKey::Priority => TaskPriority::parse(&row.priority).map(|p| p.rank()).unwrap_or(0),
        }
    }
}

/// Sort specification, parsed from strings like `due_date` or `-created_at`
/// (leading `-` = descending).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SortSpec {
    pub key: SortKey,
    pub descending: bool,
}

impl SortSpec {
    pub fn parse(s: &str) -> Option<SortSpec> {
        let (descending, name) = match s.strip_prefix('-') {
            Some(rest) => (true, rest),
            None => (false, s),
        };
        let key = match name {
            "created_at" => SortKey::CreatedAt,
            "due_date" => SortKey::DueDate,
            "priority" => SortKey::Priority,
            _ => return None,
        };
        Some(SortSpec { key, descending })
    }

    /// Canonical string form, used in cache keys.
    pub fn canonical(self) -> String {
        let name = match self.key {
            SortKey::CreatedAt => "created_at",
            SortKey::DueDate => "due_date",
            SortKey::Priority => "priority",
        };
        if self.descending {
            format!("-{name}")
        } else {
            name.to_string()
        }
    }
}

impl Default for SortSpec {
    fn default() -> Self {
        SortSpec { key: SortKey::CreatedAt, descending: true }
    }
}

// ─── Cursor ───────────────────────────────────────────────────────────────────

/// Opaque keyset page boundary: the sort value and row id of the last row on
/// the previous page. Base64 so clients treat it as a token, not a number.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Cursor {
    pub last: i64,
    pub id: i64,
}

impl Cursor {
    pub fn encode(self) -> String {
        URL_SAFE_NO_PAD.encode(format!("{}.{}", self.last, self.id))
    }

    pub fn decode(token: &str) -> Option<Cursor> {
        let bytes = URL_SAFE_NO_PAD.decode(token).ok()?;
        let text = String::from_utf8(bytes).ok()?;
        let (last, id) = text.split_once('.')?;
        Some(Cursor {
            last: last.parse().ok()?,
            id: id.parse().ok()?,
        })
    }
}

// ─── Validated query ──────────────────────────────────────────────────────────

/// A fully validated listing query. Only values from the closed filter/sort
/// sets can appear here.
#[derive(Debug, Clone)]
pub struct ListQuery {
    pub status: Option<TaskStatus>,
    pub priority: Option<TaskPriority>,
    pub due_from: Option<i64>,
    pub due_to: Option<i64>,
    pub search: Option<String>,
    pub sort: SortSpec,
    pub per_page: i64,
    pub cursor: Option<Cursor>,
}

impl ListQuery {
    /// Validate raw request parameters. Collects every field error rather
    /// than stopping at the first.
    pub fn from_params(params: &ListParams) -> Result<ListQuery, Vec<FieldError>> {
        let mut errors: Vec<FieldError> = Vec::new();

        let status = match params.status.as_deref() {
            None => None,
            Some(s) => match TaskStatus::parse(s) {
                Some(v) => Some(v),
                None => {
                    errors.push(("status", "The selected status is invalid.".to_string()));
                    None
                }
            },
        };

        let priority = match params.priority.as_deref() {
            None => None,
            Some(s) => match TaskPriority::parse(s) {
                Some(v) => Some(v),
                None => {
                    errors.push(("priority", "The selected priority is invalid.".to_string()));
                    None
                }
            },
        };

        let due_from = match params.due_date_from.as_deref() {
            None => None,
            Some(s) => match parse_rfc3339(s) {
                Some(ts) => Some(ts),
                None => {
                    errors.push((
                        "due_date_from",
                        "The due date from must be an RFC 3339 timestamp.".to_string(),
                    ));
                    None
                }
            },
        };

        let due_to = match params.due_date_to.as_deref() {
            None => None,
            Some(s) => match parse_rfc3339(s) {
                Some(ts) => Some(ts),
                None => {
                    errors.push((
                        "due_date_to",
                        "The due date to must be an RFC 3339 timestamp.".to_string(),
                    ));
                    None
                }
            },
        };

        if let (Some(from), Some(to)) = (due_from, due_to) {
            if to < from {
                errors.push((
                    "due_date_to",
                    "The due date to must be on or after the due date from.".to_string(),
                ));
            }
        }

        let search = match params.search.as_deref() {
            None => None,
            Some(s) if s.is_empty() => {
                errors.push(("search", "The search term may not be empty.".to_string()));
                None
            }
            Some(s) => Some(s.to_string()),
        };

        let sort = match params.sort.as_deref() {
            None => SortSpec::default(),
            Some(s) => match SortSpec::parse(s) {
                Some(spec) => spec,
                None => {
                    errors.push(("sort", "The selected sort is invalid.".to_string()));
                    SortSpec::default()
                }
            },
        };

        let per_page = match params.per_page {
            None => DEFAULT_PER_PAGE,
            Some(n) if (1..=MAX_PER_PAGE).contains(&n) => n,
            Some(_) => {
                errors.push((
                    "per_page",
                    format!("The per page value must be between 1 and {MAX_PER_PAGE}."),
                ));
                DEFAULT_PER_PAGE
            }
        };

        let cursor = match params.cursor.as_deref() {
            None => None,
            Some(token) => match Cursor::decode(token) {
                Some(c) => Some(c),
                None => {
                    errors.push(("cursor", "The cursor is invalid.".to_string()));
                    None
                }
            },
        };

        if !errors.is_empty() {
            return Err(errors);
        }

        Ok(ListQuery {
            status,
            priority,
            due_from,
            due_to,
            search,
            sort,
            per_page,
            cursor,
        })
    }

    /// Canonical form of the full parameter set, hashed into the listing
    /// cache key. Field order is fixed; absent filters normalize to `-`.
    pub fn canonical(&self) -> String {
        fn opt<T: std::fmt::Display>(v: &Option<T>) -> String {
            v.as_ref().map(|x| x.to_string()).unwrap_or_else(|| "-".to_string())
        }
        format!(
            "status={};priority={};from={};to={};search={};sort={};per_page={};cursor={}",
            self.status.map(|s| s.as_str()).unwrap_or("-"),
            self.priority.map(|p| p.as_str()).unwrap_or("-"),
            opt(&self.due_from),
            opt(&self.due_to),
            opt(&self.search),
            self.sort.canonical(),
            self.per_page,
            self.cursor.map(|c| c.encode()).unwrap_or_else(|| "-".to_string()),
        )
    }
}

/// Parse an RFC 3339 timestamp into unix seconds.
pub fn parse_rfc3339(s: &str) -> Option<i64> {
    DateTime::parse_from_rfc3339(s).ok().map(|dt| dt.timestamp())
}

// ─── Tests ────────────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn sort_parse_handles_direction_prefix() {
        let spec = SortSpec::parse("-created_at").unwrap();
        assert_eq!(spec.key, SortKey::CreatedAt);
        assert!(spec.descending);

        let spec = SortSpec::parse("due_date").unwrap();
        assert_eq!(spec.key, SortKey::DueDate);
        assert!(!spec.descending);

        assert!(SortSpec::parse("title").is_none());
        assert!(SortSpec::parse("-id").is_none());
    }

    #[test]
    fn cursor_round_trips() {
        let c = Cursor { last: 1_700_000_000, id: 42 };
        let decoded = Cursor::decode(&c.encode()).unwrap();
        assert_eq!(decoded, c);
    }

    #[test]
    fn cursor_rejects_garbage() {
        assert!(Cursor::decode("not base64 !!").is_none());
        assert!(Cursor::decode(&URL_SAFE_NO_PAD.encode("no-separator")).is_none());
        assert!(Cursor::decode(&URL_SAFE_NO_PAD.encode("a.b")).is_none());
    }

    #[test]
    fn negative_sort_values_survive_the_cursor() {
        let c = Cursor { last: -5, id: 7 };
        assert_eq!(Cursor::decode(&c.encode()).unwrap(), c);
    }

    #[test]
    fn defaults_apply_when_params_absent() {
        let q = ListQuery::from_params(&ListParams::default()).unwrap();
        assert_eq!(q.per_page, DEFAULT_PER_PAGE);
        assert_eq!(q.sort, SortSpec::default());
        assert!(q.status.is_none());
        assert!(q.cursor.is_none());
    }

    #[test]
    fn invalid_fields_are_all_collected() {
        let params = ListParams {
            status: Some("done".to_string()),
            priority: Some("urgent".to_string()),
            sort: Some("name".to_string()),
            per_page: Some(0),
            cursor: Some("???".to_string()),
            ..Default::default()
        };
        let errors = ListQuery::from_params(&params).unwrap_err();
        let fields: Vec<&str> = errors.iter().map(|(f, _)| *f).collect();
        assert_eq!(fields, vec!["status", "priority", "sort", "per_page", "cursor"]);
    }

    #[test]
    fn due_range_must_be_ordered() {
        let params = ListParams {
            due_date_from: Some("2026-01-02T00:00:00Z".to_string()),
            due_date_to: Some("2026-01-01T00:00:00Z".to_string()),
            ..Default::default()
        };
        let errors = ListQuery::from_params(&params).unwrap_err();
        assert_eq!(errors[0].0, "due_date_to");
    }

    #[test]
    fn canonical_is_stable_for_equal_queries() {
        let params = ListParams {
            status: Some("pending".to_string()),
            per_page: Some(20),
            ..Default::default()
        };
        let a = ListQuery::from_params(&params).unwrap().canonical();
        let b = ListQuery::from_params(&params).unwrap().canonical();
        assert_eq!(a, b);

        let other = ListQuery::from_params(&ListParams::default()).unwrap().canonical();
        assert_ne!(a, other);
    }

    #[test]
    fn priority_sort_value_uses_rank() {
        let mut row = TaskRow {
            id: 1,
            title: "t".to_string(),
            description: None,
            status: "pending".to_string(),
            priority: "high".to_string(),
            due_date: 0,
            notification_sent_at: None,
            user_id: 1,
            deleted_at: None,
            created_at: 9,
            updated_at: 9,
        };
        assert_eq!(SortKey::Priority.value_of(&row), 3);
        row.priority = "low".to_string();
        assert_eq!(SortKey::Priority.value_of(&row), 1);
        assert_eq!(SortKey::CreatedAt.value_of(&row), 9);
    }
}

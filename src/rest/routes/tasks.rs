// rest/routes/tasks.rs — Task REST routes. Thin glue: validation and domain
// rules live in the service; handlers shape JSON.

use axum::extract::{Path, Query, State};
use axum::http::StatusCode;
use axum::{Extension, Json};
use serde::Deserialize;
use serde_json::{json, Value};
use std::sync::Arc;

use crate::rest::error::ApiError;
use crate::rest::AuthUser;
use crate::tasks::query::ListParams;
use crate::tasks::service::TaskInput;
use crate::tasks::TaskRow;
use crate::AppContext;

fn rfc3339(ts: i64) -> String {
    chrono::DateTime::from_timestamp(ts, 0)
        .map(|dt| dt.to_rfc3339())
        .unwrap_or_default()
}

fn task_json(task: &TaskRow) -> Value {
    json!({
        "id": task.id,
        "title": task.title,
        "description": task.description,
        "status": task.status,
        "priority": task.priority,
        "due_date": rfc3339(task.due_date),
        "notification_sent_at": task.notification_sent_at.map(rfc3339),
        "created_at": rfc3339(task.created_at),
        "updated_at": rfc3339(task.updated_at),
    })
}

pub async fn list_tasks(
    State(ctx): State<Arc<AppContext>>,
    Extension(user): Extension<AuthUser>,
    Query(params): Query<ListParams>,
) -> Result<Json<Value>, ApiError> {
    let page = ctx.tasks.list(user.user_id, &params).await?;
    Ok(Json(json!({
        "data": page.tasks.iter().map(task_json).collect::<Vec<_>>(),
        "per_page": page.per_page,
        "next_cursor": page.next_cursor,
    })))
}

#[derive(Deserialize)]
pub struct SearchParams {
    pub query: Option<String>,
}

pub async fn search_tasks(
    State(ctx): State<Arc<AppContext>>,
    Extension(user): Extension<AuthUser>,
    Query(params): Query<SearchParams>,
) -> Result<Json<Value>, ApiError> {
    let tasks = ctx.tasks.search(user.user_id, params.query.as_deref()).await?;
    Ok(Json(json!({
        "data": tasks.iter().map(task_json).collect::<Vec<_>>(),
    })))
}

pub async fn create_task(
    State(ctx): State<Arc<AppContext>>,
    Extension(user): Extension<AuthUser>,
    Json(body): Json<TaskInput>,
) -> Result<(StatusCode, Json<Value>), ApiError> {
    let task = ctx.tasks.create(user.user_id, &body).await?;
    Ok((StatusCode::CREATED, Json(json!({ "data": task_json(&task) }))))
}

pub async fn get_task(
    State(ctx): State<Arc<AppContext>>,
    Extension(user): Extension<AuthUser>,
    Path(id): Path<i64>,
) -> Result<Json<Value>, ApiError> {
    let task = ctx.tasks.get(user.user_id, id).await?;
    Ok(Json(json!({ "data": task_json(&task) })))
}

pub async fn update_task(
    State(ctx): State<Arc<AppContext>>,
    Extension(user): Extension<AuthUser>,
    Path(id): Path<i64>,
    Json(body): Json<TaskInput>,
) -> Result<Json<Value>, ApiError> {
    let task = ctx.tasks.update(user.user_id, id, &body).await?;
    Ok(Json(json!({ "data": task_json(&task) })))
}

#[derive(Deserialize)]
pub struct StatusBody {
    pub status: Option<String>,
}

pub async fn update_task_status(
    State(ctx): State<Arc<AppContext>>,
    Extension(user): Extension<AuthUser>,
    Path(id): Path<i64>,
    Json(body): Json<StatusBody>,
) -> Result<Json<Value>, ApiError> {
    let task = ctx
        .tasks
        .set_status(user.user_id, id, body.status.as_deref())
        .await?;
    Ok(Json(json!({ "data": task_json(&task) })))
}

pub async fn delete_task(
    State(ctx): State<Arc<AppContext>>,
    Extension(user): Extension<AuthUser>,
    Path(id): Path<i64>,
) -> Result<StatusCode, ApiError> {
    ctx.tasks.delete(user.user_id, id).await?;
    Ok(StatusCode::NO_CONTENT)
}

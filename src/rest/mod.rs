// rest/mod.rs — Public REST API server.
//
// Axum HTTP server, local-only by default. Every task route is
// owner-scoped: the bearer middleware resolves the token to a user id and
// handlers never see another owner's rows.
//
// Endpoints:
//   GET    /api/v1/health                  (no auth)
//   GET    /api/v1/tasks
//   POST   /api/v1/tasks
//   GET    /api/v1/tasks/search
//   GET    /api/v1/tasks/{id}
//   PUT    /api/v1/tasks/{id}
//   PATCH  /api/v1/tasks/{id}/status
//   DELETE /api/v1/tasks/{id}

pub mod error;
pub mod routes;

use anyhow::Result;
use axum::extract::{Request, State};
use axum::http::header::AUTHORIZATION;
use axum::middleware::{self, Next};
use axum::response::Response;
use axum::routing::{get, patch};
use axum::Router;
use std::net::SocketAddr;
use std::sync::Arc;
use tower_http::cors::CorsLayer;
use tracing::info;

use crate::auth;
use crate::AppContext;
use error::ApiError;

/// The authenticated caller, injected into request extensions by
/// [`require_bearer`].
#[derive(Debug, Clone, Copy)]
pub struct AuthUser {
    pub user_id: i64,
}

pub async fn start_rest_server(ctx: Arc<AppContext>) -> Result<()> {
    let bind = format!("{}:{}", ctx.config.bind_address, ctx.config.port);
    let addr: SocketAddr = bind.parse()?;

    let router = build_router(ctx);

    info!("REST API listening on http://{}", addr);
    let listener = tokio::net::TcpListener::bind(addr).await?;
    axum::serve(listener, router).await?;
    Ok(())
}

pub fn build_router(ctx: Arc<AppContext>) -> Router {
    let tasks = Router::new()
        .route(
            "/tasks",
            get(routes::tasks::list_tasks).post(routes::tasks::create_task),
        )
        .route("/tasks/search", get(routes::tasks::search_tasks))
        .route(
            "/tasks/{id}",
            get(routes::tasks::get_task)
                .put(routes::tasks::update_task)
                .delete(routes::tasks::delete_task),
        )
        .route("/tasks/{id}/status", patch(routes::tasks::update_task_status))
        .route_layer(middleware::from_fn_with_state(ctx.clone(), require_bearer));

    Router::new()
        // Health (no auth)
        .route("/api/v1/health", get(routes::health::health))
        .nest("/api/v1", tasks)
        .layer(CorsLayer::permissive())
        .with_state(ctx)
}

/// Resolve `Authorization: Bearer <token>` against the api_tokens table.
/// Missing, malformed, or unknown tokens all answer 401 without detail.
async fn require_bearer(
    State(ctx): State<Arc<AppContext>>,
    mut req: Request,
    next: Next,
) -> Result<Response, ApiError> {
    let header = req
        .headers()
        .get(AUTHORIZATION)
        .and_then(|v| v.to_str().ok())
        .ok_or(ApiError::Unauthorized)?;
    let token = auth::bearer_token(header).ok_or(ApiError::Unauthorized)?;

    let user_id = ctx
        .storage
        .user_id_for_token(&auth::hash_token(token))
        .await
        .map_err(ApiError::Internal)?
        .ok_or(ApiError::Unauthorized)?;

    req.extensions_mut().insert(AuthUser { user_id });
    Ok(next.run(req).await)
}

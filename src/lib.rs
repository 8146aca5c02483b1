pub mod auth;
pub mod cache;
pub mod config;
pub mod notify;
pub mod rest;
pub mod scheduler;
pub mod storage;
pub mod tasks;

use std::sync::Arc;

use config::ServerConfig;
use notify::Notifier;
use storage::Storage;
use tasks::TaskService;

/// Shared application state passed to every request handler and background
/// job.
#[derive(Clone)]
pub struct AppContext {
    pub config: Arc<ServerConfig>,
    pub storage: Arc<Storage>,
    /// Task domain service: store + listing/search caches + domain rules.
    pub tasks: Arc<TaskService>,
    /// Enqueue handle for the reminder dispatch worker.
    pub notifier: Notifier,
    pub started_at: std::time::Instant,
}

use anyhow::Result;
use clap::{Parser, Subcommand};
use std::path::PathBuf;
use std::sync::Arc;
use tracing::warn;

use taskd::config::ServerConfig;
use taskd::notify::{LogMailer, Mailer, Notifier, RetryPolicy, SmtpMailer};
use taskd::storage::Storage;
use taskd::tasks::{TaskService, TaskStore};
use taskd::{auth, rest, scheduler, AppContext};

#[derive(Parser)]
#[command(
    name = "taskd",
    about = "taskd — owner-scoped task API daemon with due-date reminders",
    version
)]
struct Args {
    #[command(subcommand)]
    command: Option<Command>,

    /// HTTP server port
    #[arg(long, env = "TASKD_PORT")]
    port: Option<u16>,

    /// Data directory for config.toml and the SQLite database
    #[arg(long, env = "TASKD_DATA_DIR")]
    data_dir: Option<PathBuf>,

    /// Log level (trace, debug, info, warn, error)
    #[arg(long, env = "TASKD_LOG")]
    log: Option<String>,

    /// Write logs to this file path (rotated daily). Optional.
    #[arg(long, env = "TASKD_LOG_FILE")]
    log_file: Option<PathBuf>,
}

#[derive(Subcommand)]
enum Command {
    /// Start the API server (default when no subcommand given).
    ///
    /// Runs the HTTP server plus the background sweep and cache-purge jobs.
    ///
    /// Examples:
    ///   taskd serve
    ///   taskd
    Serve,
    /// Run one reminder/overdue sweep, wait for dispatch to drain, and exit.
    ///
    /// For deployments that trigger sweeps from an external cron instead of
    /// the built-in interval loop.
    ///
    /// Examples:
    ///   taskd sweep
    Sweep,
    /// Manage user accounts.
    ///
    /// Examples:
    ///   taskd user add --name Ada --email ada@example.com
    User {
        #[command(subcommand)]
        action: UserAction,
    },
    /// Manage API bearer tokens.
    ///
    /// Examples:
    ///   taskd token issue --user-id 1
    Token {
        #[command(subcommand)]
        action: TokenAction,
    },
}

#[derive(Subcommand)]
enum UserAction {
    /// Create a user and print a fresh bearer token for it.
    Add {
        #[arg(long)]
        name: String,
        #[arg(long)]
        email: String,
    },
}

#[derive(Subcommand)]
enum TokenAction {
    /// Issue an additional bearer token for an existing user.
    Issue {
        #[arg(long)]
        user_id: i64,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();
    let config = Arc::new(ServerConfig::new(
        args.port,
        args.data_dir.clone(),
        args.log.clone(),
    ));
    let _log_guard = setup_logging(&config.log, args.log_file.as_deref(), &config.log_format);

    match args.command.unwrap_or(Command::Serve) {
        Command::Serve => cmd_serve(config).await,
        Command::Sweep => cmd_sweep(config).await,
        Command::User { action: UserAction::Add { name, email } } => {
            cmd_user_add(&config, &name, &email).await
        }
        Command::Token { action: TokenAction::Issue { user_id } } => {
            cmd_token_issue(&config, user_id).await
        }
    }
}

// ── Logging ──────────────────────────────────────────────────────────────────

/// If the log directory cannot be created, falls back to stdout-only logging
/// with a warning — never panics.
fn setup_logging(
    log_level: &str,
    log_file: Option<&std::path::Path>,
    log_format: &str,
) -> Option<tracing_appender::non_blocking::WorkerGuard> {
    use tracing_subscriber::{fmt, layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

    let use_json = log_format == "json";

    if let Some(path) = log_file {
        let dir = path.parent().unwrap_or_else(|| std::path::Path::new("."));
        let filename = path
            .file_name()
            .unwrap_or_else(|| std::ffi::OsStr::new("taskd.log"));

        // Ensure the directory exists before tracing-appender tries to open it.
        if let Err(e) = std::fs::create_dir_all(dir) {
            eprintln!(
                "warn: could not create log directory '{}': {e} — falling back to stdout",
                dir.display()
            );
            if use_json {
                tracing_subscriber::fmt().json().with_env_filter(log_level).init();
            } else {
                tracing_subscriber::fmt().with_env_filter(log_level).compact().init();
            }
            return None;
        }

        let appender = tracing_appender::rolling::daily(dir, filename);
        let (non_blocking, guard) = tracing_appender::non_blocking(appender);

        if use_json {
            tracing_subscriber::registry()
                .with(EnvFilter::new(log_level))
                .with(fmt::layer().json())
                .with(fmt::layer().json().with_writer(non_blocking))
                .init();
        } else {
            tracing_subscriber::registry()
                .with(EnvFilter::new(log_level))
                .with(fmt::layer().compact())
                .with(fmt::layer().with_writer(non_blocking))
                .init();
        }

        Some(guard)
    } else if use_json {
        tracing_subscriber::fmt().json().with_env_filter(log_level).init();
        None
    } else {
        tracing_subscriber::fmt().with_env_filter(log_level).compact().init();
        None
    }
}

// ── Commands ─────────────────────────────────────────────────────────────────

fn build_mailer(config: &ServerConfig) -> Result<Arc<dyn Mailer>> {
    match &config.smtp {
        Some(smtp) => Ok(Arc::new(SmtpMailer::new(smtp)?)),
        None => {
            warn!("no [smtp] section in config.toml — reminders will be logged, not mailed");
            Ok(Arc::new(LogMailer))
        }
    }
}

async fn cmd_serve(config: Arc<ServerConfig>) -> Result<()> {
    let storage = Arc::new(
        Storage::new_with_slow_query(
            &config.data_dir,
            config.observability.slow_query_threshold_ms,
        )
        .await?,
    );
    let store = TaskStore::new(storage.pool());
    let tasks = Arc::new(TaskService::new(store.clone(), config.cache_ttl()));

    let mailer = build_mailer(&config)?;
    let (notifier, _dispatcher) = Notifier::spawn(store.clone(), mailer, RetryPolicy::default());

    // ── Background jobs ───────────────────────────────────────────────────────
    tokio::spawn(scheduler::run_sweep_loop(
        store,
        notifier.clone(),
        config.scheduler.sweep_interval_secs,
        config.reminder_window_secs(),
    ));
    tokio::spawn(scheduler::run_cache_purge(
        tasks.clone(),
        config.cache.purge_interval_secs,
    ));

    let ctx = Arc::new(AppContext {
        config: config.clone(),
        storage,
        tasks,
        notifier,
        started_at: std::time::Instant::now(),
    });

    rest::start_rest_server(ctx).await
}

async fn cmd_sweep(config: Arc<ServerConfig>) -> Result<()> {
    let storage = Storage::new(&config.data_dir).await?;
    let store = TaskStore::new(storage.pool());
    let mailer = build_mailer(&config)?;
    let (notifier, dispatcher) = Notifier::spawn(store.clone(), mailer, RetryPolicy::default());

    let outcome = scheduler::run_once(&store, &notifier, config.reminder_window_secs()).await?;

    // Close the queue so the worker drains the backlog and exits.
    drop(notifier);
    dispatcher.await?;

    println!(
        "queued {} notifications, marked {} tasks overdue",
        outcome.notifications_queued, outcome.overdue_marked
    );
    Ok(())
}

async fn cmd_user_add(config: &ServerConfig, name: &str, email: &str) -> Result<()> {
    let storage = Storage::new(&config.data_dir).await?;
    let user = storage.create_user(name, email).await?;
    let token = auth::generate_token();
    storage.insert_token(&auth::hash_token(&token), user.id).await?;

    println!("user {} created (id {})", user.email, user.id);
    println!("bearer token: {token}");
    println!("store it now — only its hash is kept");
    Ok(())
}

async fn cmd_token_issue(config: &ServerConfig, user_id: i64) -> Result<()> {
    let storage = Storage::new(&config.data_dir).await?;
    let user = storage
        .get_user(user_id)
        .await?
        .ok_or_else(|| anyhow::anyhow!("no user with id {user_id}"))?;

    let token = auth::generate_token();
    storage.insert_token(&auth::hash_token(&token), user.id).await?;

    println!("bearer token for {}: {token}", user.email);
    Ok(())
}

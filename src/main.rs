use anyhow::Result;
use clap::{Parser, Subcommand};
use flagscope::{
    auth,
    config::DaemonConfig,
    identity,
    ipc::event::EventBroadcaster,
    relay::StateRelay,
    state::{GlobalStateStore, TabStateStore},
    storage::Storage,
    AppContext,
};
use std::sync::Arc;
use tracing::info;

#[derive(Parser)]
#[command(
    name = "flagscoped",
    about = "FlagScope host — background state broker for feature-flag SDK devtools",
    version
)]
struct Args {
    #[command(subcommand)]
    command: Option<Command>,

    /// JSON-RPC WebSocket server port
    #[arg(long, env = "FLAGSCOPE_PORT")]
    port: Option<u16>,

    /// Data directory for config, auth token, and the SQLite database
    #[arg(long, env = "FLAGSCOPE_DATA_DIR")]
    data_dir: Option<std::path::PathBuf>,

    /// Log level (trace, debug, info, warn, error)
    #[arg(long, env = "FLAGSCOPE_LOG")]
    log: Option<String>,

    /// Bind address for the WebSocket server (default: 127.0.0.1)
    #[arg(long, env = "FLAGSCOPE_BIND")]
    bind_address: Option<String>,

    /// Write logs to this file path (rotated daily). Optional.
    #[arg(long, env = "FLAGSCOPE_LOG_FILE")]
    log_file: Option<std::path::PathBuf>,
}

#[derive(Subcommand)]
enum Command {
    /// Start the daemon server (default when no subcommand given).
    ///
    /// Runs flagscoped in the foreground.
    ///
    /// Examples:
    ///   flagscoped serve
    ///   flagscoped
    Serve,
    /// Query a running daemon's health endpoint.
    ///
    /// Exit code 0 when the daemon is up, 1 otherwise.
    ///
    /// Examples:
    ///   flagscoped status
    ///   flagscoped status --json
    Status {
        /// Print the raw JSON health document
        #[arg(long)]
        json: bool,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();

    // ── Logging setup ────────────────────────────────────────────────────────
    // Init once — must happen before any tracing calls.
    let log_level = args.log.as_deref().unwrap_or("info").to_owned();
    let log_format =
        std::env::var("FLAGSCOPE_LOG_FORMAT").unwrap_or_else(|_| "pretty".to_string());
    let _file_guard = setup_logging(&log_level, args.log_file.as_deref(), &log_format);

    match args.command {
        Some(Command::Status { json }) => {
            let config = DaemonConfig::new(args.port, args.data_dir, Some("error".to_string()), None);
            let exit_code = run_status(&config, json).await;
            std::process::exit(exit_code);
        }
        None | Some(Command::Serve) => {
            run_server(args.port, args.data_dir, args.log, args.bind_address).await?;
        }
    }

    Ok(())
}

async fn run_server(
    port: Option<u16>,
    data_dir: Option<std::path::PathBuf>,
    log: Option<String>,
    bind_address: Option<String>,
) -> Result<()> {
    info!(version = env!("CARGO_PKG_VERSION"), "flagscoped starting");

    let config = Arc::new(DaemonConfig::new(port, data_dir, log, bind_address));
    info!(
        data_dir = %config.data_dir.display(),
        port = config.port,
        "config loaded"
    );

    let storage = Arc::new(Storage::new(&config.data_dir).await?);

    let daemon_id = match identity::get_or_create(&config.data_dir) {
        Ok(id) => {
            info!(daemon_id = %id, "daemon identity ready");
            id
        }
        Err(e) => {
            tracing::warn!("failed to get daemon_id: {e:#}; proceeding without identity");
            String::new()
        }
    };

    let auth_token = auth::get_or_create_token(&config.data_dir)?;

    let broadcaster = Arc::new(EventBroadcaster::new());
    // Stores are created here and handed to the relay — the relay is the
    // only component that ever mutates them.
    let relay = StateRelay::new(
        GlobalStateStore::new(),
        TabStateStore::new(),
        storage,
        broadcaster.clone(),
    );

    let ctx = Arc::new(AppContext {
        config,
        broadcaster,
        relay,
        started_at: std::time::Instant::now(),
        daemon_id,
        auth_token,
        connected_clients: std::sync::atomic::AtomicUsize::new(0),
    });

    flagscope::ipc::run(ctx).await
}

async fn run_status(config: &DaemonConfig, json: bool) -> i32 {
    let url = format!("http://127.0.0.1:{}/health", config.port);
    let resp = reqwest::get(&url)
        .await
        .and_then(|r| r.error_for_status());
    let body: Option<serde_json::Value> = match resp {
        Ok(r) => r.json().await.ok(),
        Err(_) => None,
    };
    match body {
        Some(doc) => {
            if json {
                println!("{}", serde_json::to_string(&doc).unwrap_or_default());
            } else {
                let version = doc["version"].as_str().unwrap_or("?");
                let clients = doc["connectedClients"].as_u64().unwrap_or(0);
                let uptime = format_uptime(doc["uptime"].as_u64().unwrap_or(0));
                println!(
                    "flagscoped {version} — Running ({clients} connected clients, uptime {uptime})"
                );
            }
            0
        }
        None => {
            if json {
                println!(r#"{{"status":"not_running"}}"#);
            } else {
                println!("flagscoped: not running");
            }
            1
        }
    }
}

/// Format uptime seconds as "2h 14m" or "45m 3s".
fn format_uptime(secs: u64) -> String {
    let h = secs / 3600;
    let m = (secs % 3600) / 60;
    let s = secs % 60;
    if h > 0 {
        format!("{h}h {m}m")
    } else {
        format!("{m}m {s}s")
    }
}

/// Initialize the tracing subscriber.
/// If `log_file` is set, logs go to both stdout and a daily-rolling file.
/// Returns a `WorkerGuard` that must stay alive for the process lifetime.
///
/// `log_format` may be `"pretty"` (default, human-readable compact format)
/// or `"json"` (structured JSON for log aggregators).
///
/// If the log directory cannot be created, falls back to stdout-only
/// logging with a warning — never panics.
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
            .unwrap_or_else(|| std::ffi::OsStr::new("flagscoped.log"));

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

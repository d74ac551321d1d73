use anyhow::{Context as _, Result};
use clap::{Parser, Subcommand};
use nimbusd::{
    assembler::{assemble, ClientConfig, SetupSelection},
    config::HostConfig,
    control_plane::{ControlPlane, Endpoints, HttpControlPlane},
    identity,
    provision::{RunRegistry, StepPolicies},
    rest,
    storage::Storage,
    AppContext,
};
use std::sync::Arc;
use tracing::info;

#[derive(Parser)]
#[command(
    name = "nimbusd",
    about = "Nimbus Host — local provisioning gateway daemon",
    version
)]
struct Args {
    #[command(subcommand)]
    command: Option<Command>,

    /// REST gateway port
    #[arg(long, env = "NIMBUSD_PORT")]
    port: Option<u16>,

    /// Data directory for config and the SQLite run history
    #[arg(long, env = "NIMBUSD_DATA_DIR")]
    data_dir: Option<std::path::PathBuf>,

    /// Log level (trace, debug, info, warn, error)
    #[arg(long, env = "NIMBUSD_LOG")]
    log: Option<String>,

    /// Bind address for the REST gateway (default: 127.0.0.1; use 0.0.0.0 for LAN access)
    #[arg(long, env = "NIMBUSD_BIND")]
    bind_address: Option<String>,

    /// Write logs to this file path (rotated daily). Optional.
    #[arg(long, env = "NIMBUSD_LOG_FILE")]
    log_file: Option<std::path::PathBuf>,
}

#[derive(Subcommand)]
enum Command {
    /// Start the gateway daemon (default when no subcommand given).
    ///
    /// Runs nimbusd in the foreground. When invoked with no subcommand, this is the default.
    ///
    /// Examples:
    ///   nimbusd serve
    ///   nimbusd
    Serve,
    /// Render the SDK bootstrap module from saved selection and config files.
    ///
    /// Offline counterpart of POST /api/v1/module: reads a setup selection
    /// (features + settings) and a client configuration from JSON files and
    /// prints or writes the assembled nimbus.js.
    ///
    /// Examples:
    ///   nimbusd render --selection selection.json --config config.json
    ///   nimbusd render --selection selection.json --config config.json --out nimbus.js
    Render {
        /// Path to the setup selection JSON
        #[arg(long)]
        selection: std::path::PathBuf,
        /// Path to the client configuration JSON
        #[arg(long)]
        config: std::path::PathBuf,
        /// Output file (default: stdout)
        #[arg(long)]
        out: Option<std::path::PathBuf>,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();

    // ── Logging setup ────────────────────────────────────────────────────────
    // Init once — must happen before any tracing calls.
    let log_level = args.log.as_deref().unwrap_or("info").to_owned();
    let log_format = std::env::var("NIMBUSD_LOG_FORMAT")
        .unwrap_or_else(|_| "pretty".to_string());
    let _file_guard = setup_logging(&log_level, args.log_file.as_deref(), &log_format);

    match args.command {
        Some(Command::Render {
            selection,
            config,
            out,
        }) => {
            run_render(&selection, &config, out.as_deref()).await?;
        }
        None | Some(Command::Serve) => {
            run_server(args.port, args.data_dir, args.log, args.bind_address).await?;
        }
    }

    Ok(())
}

/// Initialize the tracing subscriber.
/// If `log_file` is set, logs go to both stdout and a daily-rolling file.
/// Returns a `WorkerGuard` that must stay alive for the process lifetime.
///
/// `log_format` may be `"pretty"` (default, human-readable compact format) or
/// `"json"` (structured JSON for log aggregators like Loki/Elasticsearch).
///
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
            .unwrap_or_else(|| std::ffi::OsStr::new("nimbusd.log"));

        // Ensure the directory exists before tracing-appender tries to open it.
        if let Err(e) = std::fs::create_dir_all(dir) {
            // Fall back to stdout-only — don't panic on a bad log path.
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

// ── nimbusd serve ─────────────────────────────────────────────────────────────

async fn run_server(
    port: Option<u16>,
    data_dir: Option<std::path::PathBuf>,
    log: Option<String>,
    bind_address: Option<String>,
) -> Result<()> {
    info!(version = env!("CARGO_PKG_VERSION"), "nimbusd starting");

    let config = Arc::new(HostConfig::new(port, data_dir, log, bind_address));
    info!(
        data_dir = %config.data_dir.display(),
        port = config.port,
        resource_api = %config.resource_api_url,
        platform_api = %config.platform_api_url,
        "config loaded"
    );

    let storage = Arc::new(
        Storage::new_with_slow_query(
            &config.data_dir,
            config.observability.slow_query_threshold_ms,
        )
        .await?,
    );

    let host_id = identity::get_or_create(&storage).await?;
    info!(host_id = %host_id, "host identity loaded");

    let control: Arc<dyn ControlPlane> = Arc::new(HttpControlPlane::new(
        std::time::Duration::from_secs(config.http_timeout_secs),
    )?);
    let endpoints = Endpoints::new(&config.resource_api_url, &config.platform_api_url);

    let ctx = Arc::new(AppContext {
        config: config.clone(),
        storage,
        control,
        endpoints,
        policies: StepPolicies::default(),
        runs: RunRegistry::new(),
        host_id,
        started_at: std::time::Instant::now(),
    });

    rest::serve(ctx).await
}

// ── nimbusd render ────────────────────────────────────────────────────────────

async fn run_render(
    selection_path: &std::path::Path,
    config_path: &std::path::Path,
    out: Option<&std::path::Path>,
) -> Result<()> {
    let selection_text = tokio::fs::read_to_string(selection_path)
        .await
        .with_context(|| format!("cannot read selection file {}", selection_path.display()))?;
    let selection: SetupSelection = serde_json::from_str(&selection_text)
        .with_context(|| format!("invalid selection JSON in {}", selection_path.display()))?;

    let config_text = tokio::fs::read_to_string(config_path)
        .await
        .with_context(|| format!("cannot read config file {}", config_path.display()))?;
    let client_config: ClientConfig = serde_json::from_str(&config_text)
        .with_context(|| format!("invalid client config JSON in {}", config_path.display()))?;

    let module = assemble(&selection, &client_config)?;
    let rendered = module.render();

    match out {
        Some(path) => {
            tokio::fs::write(path, &rendered)
                .await
                .with_context(|| format!("cannot write {}", path.display()))?;
            eprintln!("wrote {}", path.display());
        }
        None => {
            print!("{rendered}");
        }
    }
    Ok(())
}

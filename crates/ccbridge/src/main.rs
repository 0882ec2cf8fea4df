use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, bail};
use clap::{Parser, Subcommand};
use env_flags::env_flags;
use once_cell::sync::OnceCell;

use ccbridge::assistant::{DEFAULT_BINARY, OutputFormat, QueryOptions};
use ccbridge::bridge::Bridge;
use ccbridge::config::{LoggingCfg, UserConfig, expand_home, load_user_config, resolve_home};
use ccbridge::events::TracingReporter;
use ccbridge::mcp::aggregate::{DEFAULT_MAX_CONCURRENCY, DiscoveryOptions, discover_mcp_tools};
use ccbridge::mcp::enumerator::EnumerateOptions;
use ccbridge::mcp::transport::SdkTransportFactory;
use ccbridge::memory::load_memory_context;
use ccbridge::policy::{default_settings_path, setup_mcp_permissions};

#[derive(Debug, Parser)]
#[command(
    name = "ccbridge",
    version,
    about = "Discover MCP tools and write Claude CLI permission settings"
)]
struct Cli {
    /// Project root (defaults to WORKSPACE_DIR, then the current directory)
    #[arg(long, global = true)]
    dir: Option<PathBuf>,

    #[command(subcommand)]
    command: Option<Cmd>,
}

#[derive(Debug, Subcommand)]
enum Cmd {
    /// Discover MCP tools and merge them into the settings file (default)
    Setup {
        /// Settings file to update (defaults to <dir>/.claude/settings.json)
        #[arg(long)]
        settings: Option<PathBuf>,
    },
    /// Discover MCP tools and print the result as JSON
    Discover,
    /// Send a prompt to the assistant CLI
    Ask {
        prompt: String,
        /// Session to resume or create (defaults to a fresh UUID)
        #[arg(long)]
        session: Option<String>,
        #[arg(long)]
        model: Option<String>,
        /// text, json or stream-json
        #[arg(long)]
        output_format: Option<OutputFormat>,
    },
    /// Print the CLAUDE.md memory context for the project
    Memory,
    /// Print the assistant CLI version
    Version,
}

#[derive(Clone, Copy)]
enum LogStyle {
    Json,
    Compact,
    Pretty,
    Full,
}

type BoxedLayer = Box<dyn tracing_subscriber::Layer<tracing_subscriber::Registry> + Send + Sync>;

fn fmt_layer<W>(writer: W, ansi: bool, style: LogStyle) -> BoxedLayer
where
    W: for<'w> tracing_subscriber::fmt::MakeWriter<'w> + Send + Sync + 'static,
{
    use tracing_subscriber::Layer;

    let base = tracing_subscriber::fmt::layer()
        .with_file(false)
        .with_line_number(false)
        .with_target(true)
        .with_ansi(ansi)
        .with_writer(writer);
    match style {
        LogStyle::Json => base.json().boxed(),
        LogStyle::Compact => base.compact().boxed(),
        LogStyle::Pretty => base.pretty().boxed(),
        LogStyle::Full => base.boxed(),
    }
}

fn init_tracing(home: &Path, cfg: Option<&LoggingCfg>) {
    env_flags! {
        /// Tracing filter, e.g. "info", "debug", or targets format.
        RUST_LOG: &str = "info";
        /// Preferred filter env (alias). If set, overrides RUST_LOG.
        TRACING_FILTER: &str = "";
        /// Pretty formatting for logs (ignored if TRACING_JSON=true).
        TRACING_PRETTY: bool = false;
        /// Compact single-line formatting for logs (ignored if TRACING_JSON=true)
        TRACING_COMPACT: bool = true;
        /// JSON formatting for logs
        TRACING_JSON: bool = false;
        /// If true, also log to file under <CCBRIDGE_HOME>/logs or LOG_DIR
        LOG_TO_FILE: bool = false;
        /// Optional explicit log directory (absolute). Defaults to <CCBRIDGE_HOME>/logs
        LOG_DIR: &str = "";
    }

    use tracing_subscriber::{EnvFilter, layer::SubscriberExt, util::SubscriberInitExt};

    let env_set = |k: &str| std::env::var_os(k).is_some();

    // TRACING_FILTER first, then RUST_LOG, then user config.
    let mut rust_log = if !(*TRACING_FILTER).is_empty() {
        (*TRACING_FILTER).to_string()
    } else {
        (*RUST_LOG).to_string()
    };
    let mut tracing_json = *TRACING_JSON;
    let mut tracing_compact = *TRACING_COMPACT;
    let mut tracing_pretty = *TRACING_PRETTY;
    let mut log_to_file = *LOG_TO_FILE;
    let mut log_dir: Option<PathBuf> = if !(*LOG_DIR).is_empty() {
        Some(PathBuf::from(*LOG_DIR))
    } else {
        None
    };

    if let Some(cfg) = cfg {
        if !(env_set("TRACING_FILTER") || env_set("RUST_LOG"))
            && let Some(level) = cfg.level.as_ref()
        {
            rust_log = level.clone();
        }
        if !env_set("TRACING_JSON")
            && let Some(v) = cfg.json
        {
            tracing_json = v;
        }
        if !env_set("TRACING_COMPACT")
            && let Some(v) = cfg.compact
        {
            tracing_compact = v;
        }
        if !env_set("TRACING_PRETTY")
            && let Some(v) = cfg.pretty
        {
            tracing_pretty = v;
        }
        if !env_set("LOG_TO_FILE")
            && let Some(v) = cfg.to_file
        {
            log_to_file = v;
        }
        if !env_set("LOG_DIR")
            && let Some(dir) = cfg.dir.as_ref()
        {
            log_dir = Some(expand_home(dir));
        }
    }

    let filter = EnvFilter::try_new(rust_log).unwrap_or_else(|_| EnvFilter::new("info"));
    let style = if tracing_json {
        LogStyle::Json
    } else if tracing_compact {
        LogStyle::Compact
    } else if tracing_pretty {
        LogStyle::Pretty
    } else {
        LogStyle::Full
    };

    // stdout carries command output; logs always go to stderr
    let mut layers = vec![fmt_layer(std::io::stderr, true, style)];
    static FILE_GUARD: OnceCell<tracing_appender::non_blocking::WorkerGuard> = OnceCell::new();
    let mut dir_error = None;
    if log_to_file {
        let dir = log_dir.unwrap_or_else(|| home.join("logs"));
        match std::fs::create_dir_all(&dir) {
            Ok(()) => {
                let appender = tracing_appender::rolling::daily(&dir, "ccbridge.log");
                let (nb, guard) = tracing_appender::non_blocking(appender);
                let _ = FILE_GUARD.set(guard);
                layers.push(fmt_layer(nb, false, style));
            }
            Err(e) => dir_error = Some(format!("failed to create log dir {}: {}", dir.display(), e)),
        }
    }

    if let Err(e) = tracing_subscriber::registry()
        .with(layers)
        .with(filter)
        .try_init()
    {
        tracing::debug!("tracing already set: {:?}", e);
    }
    if let Some(msg) = dir_error {
        tracing::warn!("{}", msg);
    }
}

fn discovery_options(user_cfg: Option<&UserConfig>) -> DiscoveryOptions {
    env_flags! {
        /// Per-server enumeration deadline in milliseconds
        MCP_ENUM_TIMEOUT_MS: u64 = 10000;
        /// Servers enumerated concurrently
        MCP_MAX_CONCURRENCY: usize = 8;
    }
    let env_set = |k: &str| std::env::var_os(k).is_some();
    let cfg = user_cfg.and_then(|c| c.discovery.as_ref());

    let timeout_ms = if env_set("MCP_ENUM_TIMEOUT_MS") {
        *MCP_ENUM_TIMEOUT_MS
    } else {
        cfg.and_then(|d| d.timeout_ms)
            .unwrap_or(*MCP_ENUM_TIMEOUT_MS)
    };
    let max_concurrency = if env_set("MCP_MAX_CONCURRENCY") {
        *MCP_MAX_CONCURRENCY
    } else {
        cfg.and_then(|d| d.max_concurrency)
            .unwrap_or(DEFAULT_MAX_CONCURRENCY)
    };

    let timeout = Duration::from_millis(timeout_ms.max(1));
    tracing::debug!(
        "discovery timeout={}ms max_concurrency={}",
        timeout.as_millis(),
        max_concurrency
    );
    DiscoveryOptions {
        enumerate: EnumerateOptions {
            timeout,
            factory: Arc::new(SdkTransportFactory {
                request_timeout: timeout,
            }),
            reporter: Arc::new(TracingReporter),
        },
        max_concurrency: max_concurrency.max(1),
    }
}

fn settings_path(
    workspace_dir: &Path,
    explicit: Option<PathBuf>,
    user_cfg: Option<&UserConfig>,
) -> PathBuf {
    env_flags! {
        /// Settings file to update. Relative paths resolve against the workspace.
        CLAUDE_SETTINGS_PATH: &str = "";
    }
    let chosen = explicit
        .or_else(|| (!(*CLAUDE_SETTINGS_PATH).is_empty()).then(|| expand_home(*CLAUDE_SETTINGS_PATH)))
        .or_else(|| {
            user_cfg
                .and_then(|c| c.discovery.as_ref())
                .and_then(|d| d.settings_path.as_deref())
                .map(expand_home)
        });
    match chosen {
        Some(p) if p.is_absolute() => p,
        Some(p) => workspace_dir.join(p),
        None => default_settings_path(workspace_dir),
    }
}

fn assistant_defaults(user_cfg: Option<&UserConfig>) -> anyhow::Result<(String, QueryOptions)> {
    env_flags! {
        /// Assistant binary name or path
        CLAUDE_BIN: &str = "";
        /// Default model passed with --model
        CLAUDE_MODEL: &str = "";
        /// Default --output-format: text, json or stream-json
        CLAUDE_OUTPUT_FORMAT: &str = "";
        /// Pass --verbose
        CLAUDE_VERBOSE: bool = false;
        /// Per-invocation timeout in milliseconds
        CLAUDE_TIMEOUT_MS: u64 = 60000;
    }
    let env_set = |k: &str| std::env::var_os(k).is_some();
    let cfg = user_cfg.and_then(|c| c.assistant.as_ref());

    let binary = if !(*CLAUDE_BIN).is_empty() {
        (*CLAUDE_BIN).to_string()
    } else {
        cfg.and_then(|a| a.binary.clone())
            .unwrap_or_else(|| DEFAULT_BINARY.to_string())
    };
    let model = if !(*CLAUDE_MODEL).is_empty() {
        Some((*CLAUDE_MODEL).to_string())
    } else {
        cfg.and_then(|a| a.model.clone())
    };
    let output_format = if !(*CLAUDE_OUTPUT_FORMAT).is_empty() {
        Some((*CLAUDE_OUTPUT_FORMAT).to_string())
    } else {
        cfg.and_then(|a| a.output_format.clone())
    };
    let output_format = output_format
        .map(|f| f.parse::<OutputFormat>())
        .transpose()
        .map_err(anyhow::Error::msg)
        .context("invalid assistant output format")?;
    let verbose = if env_set("CLAUDE_VERBOSE") {
        *CLAUDE_VERBOSE
    } else {
        cfg.and_then(|a| a.verbose).unwrap_or(*CLAUDE_VERBOSE)
    };
    let timeout_ms = if env_set("CLAUDE_TIMEOUT_MS") {
        *CLAUDE_TIMEOUT_MS
    } else {
        cfg.and_then(|a| a.timeout_ms).unwrap_or(*CLAUDE_TIMEOUT_MS)
    };

    Ok((
        binary,
        QueryOptions {
            model,
            output_format,
            verbose: Some(verbose),
            timeout: Some(Duration::from_millis(timeout_ms.max(1))),
        },
    ))
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    env_flags! {
        /// Workspace directory to scan. If empty, defaults to the current execution directory.
        WORKSPACE_DIR: &str = "";
        /// ccbridge home directory (absolute). Defaults to $HOME/.ccbridge
        CCBRIDGE_HOME: &str = "";
    }

    let cli = Cli::parse();
    let home = resolve_home(*CCBRIDGE_HOME);
    let (user_cfg, cfg_error) = match load_user_config(&home) {
        Ok(cfg) => (cfg, None),
        Err(e) => (None, Some(e)),
    };
    init_tracing(&home, user_cfg.as_ref().and_then(|c| c.logging.as_ref()));
    if let Some(e) = cfg_error {
        tracing::warn!("ignoring {}/config.toml: {:#}", home.display(), e);
    }

    let workspace_dir = match cli.dir {
        Some(dir) => dir,
        None if !(*WORKSPACE_DIR).is_empty() => expand_home(*WORKSPACE_DIR),
        None => std::env::current_dir().context("cannot determine current directory")?,
    };
    tracing::info!("workspace_dir={}", workspace_dir.display());
    tracing::debug!("ccbridge_home={}", home.display());

    match cli.command.unwrap_or(Cmd::Setup { settings: None }) {
        Cmd::Setup { settings } => {
            let path = settings_path(&workspace_dir, settings, user_cfg.as_ref());
            let options = discovery_options(user_cfg.as_ref());
            let result = setup_mcp_permissions(&workspace_dir, Some(&path), &options)
                .await
                .with_context(|| format!("failed to update {}", path.display()))?;
            let wildcards = result.tools.iter().filter(|t| t.is_wildcard()).count();
            println!(
                "{} MCP config(s), {} server(s), {} tool permission(s) ({} wildcard) written to {}",
                result.mcp_configs.len(),
                result.server_count(),
                result.allow_list.len(),
                wildcards,
                path.display()
            );
        }
        Cmd::Discover => {
            let options = discovery_options(user_cfg.as_ref());
            let result = discover_mcp_tools(&workspace_dir, &options).await;
            let rendered =
                serde_json::to_string_pretty(&result).context("failed to render discovery result")?;
            println!("{rendered}");
        }
        Cmd::Ask {
            prompt,
            session,
            model,
            output_format,
        } => {
            let (binary, defaults) = assistant_defaults(user_cfg.as_ref())?;
            let bridge = Bridge::claude(&binary, defaults);
            if !bridge.initialize().await {
                bail!("`{}` is not available on PATH", binary);
            }
            let session_id = session.unwrap_or_else(|| uuid::Uuid::new_v4().to_string());
            let overrides = QueryOptions {
                model,
                output_format,
                ..Default::default()
            };
            let response = bridge.ask(&prompt, &session_id, Some(&overrides)).await;
            if !response.success {
                bail!(
                    "assistant query failed: {}",
                    response.error.unwrap_or_else(|| "unknown error".to_string())
                );
            }
            println!("{}", response.data.unwrap_or_default());
            tracing::info!("session_id={}", session_id);
        }
        Cmd::Memory => match load_memory_context(&workspace_dir).await {
            Some(context) => println!("{context}"),
            None => tracing::info!("no CLAUDE.md memory files found"),
        },
        Cmd::Version => {
            let (binary, defaults) = assistant_defaults(user_cfg.as_ref())?;
            let bridge = Bridge::claude(&binary, defaults);
            match bridge.version().await {
                Some(version) => println!("{version}"),
                None => bail!("could not determine `{}` version", binary),
            }
        }
    }
    Ok(())
}

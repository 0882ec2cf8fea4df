//! Claude CLI client and trait definition.
//!
//! `AssistantClient` abstracts the assistant binary so the bridge can be
//! tested without one installed. `ClaudeCli` shells out to `claude`, piping
//! the prompt over stdin. A query first resumes the given session and, if
//! that fails, creates it.

use std::process::Stdio;
use std::str::FromStr;
use std::time::{Duration, Instant};

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use tokio::io::AsyncWriteExt;
use tokio::process::Command;

pub const DEFAULT_BINARY: &str = "claude";
pub const DEFAULT_QUERY_TIMEOUT: Duration = Duration::from_secs(60);
pub const PROBE_TIMEOUT: Duration = Duration::from_secs(5);

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum OutputFormat {
    Text,
    Json,
    StreamJson,
}

impl OutputFormat {
    pub fn as_str(&self) -> &'static str {
        match self {
            OutputFormat::Text => "text",
            OutputFormat::Json => "json",
            OutputFormat::StreamJson => "stream-json",
        }
    }
}

impl FromStr for OutputFormat {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "text" => Ok(OutputFormat::Text),
            "json" => Ok(OutputFormat::Json),
            "stream-json" | "stream_json" => Ok(OutputFormat::StreamJson),
            other => Err(format!("unknown output format `{other}`")),
        }
    }
}

/// Per-query knobs. Unset fields fall back to the client's defaults.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct QueryOptions {
    pub model: Option<String>,
    pub output_format: Option<OutputFormat>,
    pub verbose: Option<bool>,
    pub timeout: Option<Duration>,
}

impl QueryOptions {
    /// Fields set on `self` win over `base`.
    pub fn merged_over(&self, base: &QueryOptions) -> QueryOptions {
        QueryOptions {
            model: self.model.clone().or_else(|| base.model.clone()),
            output_format: self.output_format.or(base.output_format),
            verbose: self.verbose.or(base.verbose),
            timeout: self.timeout.or(base.timeout),
        }
    }
}

/// Outcome of one query; failures are reported, not raised.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AssistantResponse {
    pub success: bool,
    pub data: Option<String>,
    pub error: Option<String>,
    pub elapsed: Duration,
}

#[derive(Debug, thiserror::Error)]
pub enum AssistantError {
    #[error("failed to launch `{binary}`: {source}")]
    Spawn {
        binary: String,
        #[source]
        source: std::io::Error,
    },
    #[error("i/o error talking to the assistant: {0}")]
    Io(#[from] std::io::Error),
    #[error("assistant did not finish within {}s", .0.as_secs())]
    Timeout(Duration),
    #[error("assistant exited with status {status:?}: {stderr}")]
    Exit { status: Option<i32>, stderr: String },
}

#[async_trait]
pub trait AssistantClient: Send + Sync {
    /// Whether the assistant binary can be found.
    async fn is_available(&self) -> bool;

    /// The assistant's self-reported version, if it answers.
    async fn version(&self) -> Option<String>;

    /// Send `prompt` within `session_id`, resuming the session when it exists
    /// and creating it otherwise.
    async fn query_with_session(
        &self,
        prompt: &str,
        session_id: &str,
        options: &QueryOptions,
    ) -> AssistantResponse;
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionMode {
    Resume,
    Create,
}

/// Argument vector for one non-interactive invocation.
pub fn session_args(session_id: &str, mode: SessionMode, options: &QueryOptions) -> Vec<String> {
    let mut args = vec!["--print".to_string()];
    match mode {
        SessionMode::Resume => args.extend(["--resume".to_string(), session_id.to_string()]),
        SessionMode::Create => args.extend(["--session-id".to_string(), session_id.to_string()]),
    }
    if let Some(model) = options.model.as_deref().filter(|m| !m.trim().is_empty()) {
        args.extend(["--model".to_string(), model.to_string()]);
    }
    if let Some(format) = options.output_format {
        args.extend(["--output-format".to_string(), format.as_str().to_string()]);
    }
    if options.verbose.unwrap_or(false) {
        args.push("--verbose".to_string());
    }
    args
}

/// Shells out to the `claude` binary.
#[derive(Debug, Clone)]
pub struct ClaudeCli {
    binary: String,
    defaults: QueryOptions,
}

impl Default for ClaudeCli {
    fn default() -> Self {
        Self::new(DEFAULT_BINARY, QueryOptions::default())
    }
}

impl ClaudeCli {
    pub fn new(binary: impl Into<String>, defaults: QueryOptions) -> Self {
        Self {
            binary: binary.into(),
            defaults,
        }
    }

    pub fn binary(&self) -> &str {
        &self.binary
    }

    async fn run(&self, prompt: &str, args: &[String], timeout: Duration) -> Result<String, AssistantError> {
        let mut child = Command::new(&self.binary)
            .args(args)
            .stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true)
            .spawn()
            .map_err(|source| AssistantError::Spawn {
                binary: self.binary.clone(),
                source,
            })?;

        // the prompt is fed while output drains so neither pipe can stall the
        // other; dropping the exchange on timeout drops the child, which kills it
        let stdin = child.stdin.take();
        let exchange = async move {
            let feed = async {
                if let Some(mut stdin) = stdin {
                    match stdin.write_all(prompt.as_bytes()).await {
                        Ok(()) => stdin.shutdown().await?,
                        // the child exited or closed stdin without reading it all
                        Err(e) if e.kind() == std::io::ErrorKind::BrokenPipe => {}
                        Err(e) => return Err(e),
                    }
                }
                Ok::<(), std::io::Error>(())
            };
            let (fed, output) = tokio::join!(feed, child.wait_with_output());
            let output = output?;
            if let Err(e) = fed
                && output.status.success()
            {
                return Err(e);
            }
            Ok::<_, std::io::Error>(output)
        };
        let output = tokio::time::timeout(timeout, exchange)
            .await
            .map_err(|_| AssistantError::Timeout(timeout))??;

        if output.status.success() {
            Ok(String::from_utf8_lossy(&output.stdout).trim().to_string())
        } else {
            Err(AssistantError::Exit {
                status: output.status.code(),
                stderr: String::from_utf8_lossy(&output.stderr).trim().to_string(),
            })
        }
    }
}

#[async_trait]
impl AssistantClient for ClaudeCli {
    async fn is_available(&self) -> bool {
        which::which(&self.binary).is_ok()
    }

    async fn version(&self) -> Option<String> {
        let probe = Command::new(&self.binary)
            .arg("--version")
            .stdin(Stdio::null())
            .kill_on_drop(true)
            .output();
        let output = tokio::time::timeout(PROBE_TIMEOUT, probe).await.ok()?.ok()?;
        if !output.status.success() {
            return None;
        }
        let version = String::from_utf8_lossy(&output.stdout).trim().to_string();
        (!version.is_empty()).then_some(version)
    }

    async fn query_with_session(
        &self,
        prompt: &str,
        session_id: &str,
        options: &QueryOptions,
    ) -> AssistantResponse {
        let started = Instant::now();
        let merged = options.merged_over(&self.defaults);
        let timeout = merged.timeout.unwrap_or(DEFAULT_QUERY_TIMEOUT);

        let resume = session_args(session_id, SessionMode::Resume, &merged);
        let result = match self.run(prompt, &resume, timeout).await {
            Ok(out) => Ok(out),
            Err(e) => {
                tracing::debug!("resume of session {} failed ({}); creating it", session_id, e);
                let create = session_args(session_id, SessionMode::Create, &merged);
                self.run(prompt, &create, timeout).await
            }
        };

        match result {
            Ok(data) => AssistantResponse {
                success: true,
                data: Some(data),
                error: None,
                elapsed: started.elapsed(),
            },
            Err(e) => AssistantResponse {
                success: false,
                data: None,
                error: Some(e.to_string()),
                elapsed: started.elapsed(),
            },
        }
    }
}

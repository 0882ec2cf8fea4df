use serde::Deserialize;
use std::path::{Path, PathBuf};

#[derive(Debug, Default, Deserialize)]
pub struct UserConfig {
    pub logging: Option<LoggingCfg>,
    pub discovery: Option<DiscoveryCfg>,
    pub assistant: Option<AssistantCfg>,
}

#[derive(Debug, Default, Deserialize)]
pub struct LoggingCfg {
    pub to_file: Option<bool>,
    pub dir: Option<String>,
    pub json: Option<bool>,
    pub compact: Option<bool>,
    pub pretty: Option<bool>,
    pub level: Option<String>,
}

#[derive(Debug, Default, Deserialize)]
pub struct DiscoveryCfg {
    pub timeout_ms: Option<u64>,
    pub max_concurrency: Option<usize>,
    pub settings_path: Option<String>, // relative paths resolve against the workspace
}

#[derive(Debug, Default, Deserialize)]
pub struct AssistantCfg {
    pub binary: Option<String>,
    pub model: Option<String>,
    pub output_format: Option<String>, // text | json | stream-json
    pub verbose: Option<bool>,
    pub timeout_ms: Option<u64>,
}

pub fn load_user_config(home: &Path) -> anyhow::Result<Option<UserConfig>> {
    let path = home.join("config.toml");
    if !path.exists() {
        return Ok(None);
    }
    let s = std::fs::read_to_string(&path)?;
    let cfg: UserConfig = toml::from_str(&s)?;
    Ok(Some(cfg))
}

pub fn expand_home(path: &str) -> PathBuf {
    if let Some(stripped) = path.strip_prefix("~/")
        && let Ok(home) = std::env::var("HOME")
    {
        return PathBuf::from(home).join(stripped);
    }
    PathBuf::from(path)
}

/// ccbridge home: explicit value, else `$HOME/.ccbridge`, else `./.ccbridge`.
pub fn resolve_home(explicit: &str) -> PathBuf {
    if !explicit.is_empty() {
        return expand_home(explicit);
    }
    if let Ok(home) = std::env::var("HOME") {
        return PathBuf::from(home).join(".ccbridge");
    }
    std::env::current_dir()
        .unwrap_or_else(|_| PathBuf::from("."))
        .join(".ccbridge")
}

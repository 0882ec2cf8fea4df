//! Permission policy: merge discovered MCP tools into `.claude/settings.json`.

use std::collections::HashSet;
use std::io;
use std::path::{Path, PathBuf};

use serde_json::{Map, Value as JsonValue};

use crate::mcp::aggregate::{DiscoveryOptions, discover_mcp_tools};
use crate::mcp::DiscoveryResult;

pub const SETTINGS_DIR: &str = ".claude";
pub const SETTINGS_FILE: &str = "settings.json";

/// Built-in capabilities denied whenever MCP permissions are written.
pub const DENY_PATTERNS: [&str; 8] = [
    "Bash(*)", "Read(*)", "Write(*)", "Edit(*)", "Grep(*)", "Glob(*)", "List(*)", "View(*)",
];

#[derive(Debug, thiserror::Error)]
pub enum PolicyError {
    #[error("failed to create settings directory {}: {source}", path.display())]
    CreateDir {
        path: PathBuf,
        #[source]
        source: io::Error,
    },
    #[error("failed to serialize settings: {0}")]
    Serialize(#[from] serde_json::Error),
    #[error("failed to write settings {}: {source}", path.display())]
    Write {
        path: PathBuf,
        #[source]
        source: io::Error,
    },
}

/// `<root>/.claude/settings.json`
pub fn default_settings_path(root: &Path) -> PathBuf {
    root.join(SETTINGS_DIR).join(SETTINGS_FILE)
}

/// Merge `allow` and the fixed deny-list into a settings document.
///
/// Non-object documents are replaced with `{}`. Every key other than
/// `permissions.allow`, `permissions.deny` and `enableAllProjectMcpServers`
/// is left untouched and in place.
pub fn apply_policy(document: JsonValue, allow: &[String]) -> JsonValue {
    let mut root = match document {
        JsonValue::Object(map) => map,
        _ => Map::new(),
    };

    let permissions = root
        .entry("permissions")
        .or_insert_with(|| JsonValue::Object(Map::new()));
    if !permissions.is_object() {
        *permissions = JsonValue::Object(Map::new());
    }
    if let JsonValue::Object(perms) = permissions {
        let slot = perms.entry("allow").or_insert(JsonValue::Null);
        *slot = union(slot.take(), allow.iter().map(String::as_str));
        let slot = perms.entry("deny").or_insert(JsonValue::Null);
        *slot = union(slot.take(), DENY_PATTERNS);
    }

    // existing keys keep their position on insert
    root.insert(
        "enableAllProjectMcpServers".to_string(),
        JsonValue::Bool(true),
    );
    JsonValue::Object(root)
}

/// Existing entries first (duplicates collapsed), then unseen additions.
fn union<'a>(existing: JsonValue, additions: impl IntoIterator<Item = &'a str>) -> JsonValue {
    let existing = match existing {
        JsonValue::Array(items) => items,
        _ => Vec::new(),
    };
    let mut seen: HashSet<String> = HashSet::new();
    let mut out = Vec::with_capacity(existing.len());
    for item in existing {
        let key = match &item {
            JsonValue::String(s) => s.clone(),
            other => other.to_string(),
        };
        if seen.insert(key) {
            out.push(item);
        }
    }
    for addition in additions {
        if seen.insert(addition.to_string()) {
            out.push(JsonValue::String(addition.to_string()));
        }
    }
    JsonValue::Array(out)
}

/// Read a settings document, falling back to `{}` when it is missing or
/// unusable.
pub async fn read_settings(path: &Path) -> JsonValue {
    let content = match tokio::fs::read_to_string(path).await {
        Ok(c) => c,
        Err(e) if e.kind() == io::ErrorKind::NotFound => return JsonValue::Object(Map::new()),
        Err(e) => {
            tracing::warn!("cannot read {}: {}; starting fresh", path.display(), e);
            return JsonValue::Object(Map::new());
        }
    };
    match serde_json::from_str::<JsonValue>(&content) {
        Ok(v @ JsonValue::Object(_)) => v,
        Ok(_) => {
            tracing::warn!("{} is not a JSON object; starting fresh", path.display());
            JsonValue::Object(Map::new())
        }
        Err(e) => {
            tracing::warn!("cannot parse {}: {}; starting fresh", path.display(), e);
            JsonValue::Object(Map::new())
        }
    }
}

/// Merge a discovery result into the settings file at `path`.
pub async fn update_settings(result: &DiscoveryResult, path: &Path) -> Result<PathBuf, PolicyError> {
    if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
        tokio::fs::create_dir_all(parent)
            .await
            .map_err(|source| PolicyError::CreateDir {
                path: parent.to_path_buf(),
                source,
            })?;
    }

    let current = read_settings(path).await;
    let updated = apply_policy(current, &result.allow_list);
    let rendered = serde_json::to_string_pretty(&updated)?;
    tokio::fs::write(path, rendered)
        .await
        .map_err(|source| PolicyError::Write {
            path: path.to_path_buf(),
            source,
        })?;

    tracing::info!(
        "updated {} with {} MCP tool permission(s)",
        path.display(),
        result.allow_list.len()
    );
    Ok(path.to_path_buf())
}

/// Discover every MCP tool under `root` and persist the resulting policy.
///
/// Discovery itself never fails; only writing the settings file can.
pub async fn setup_mcp_permissions(
    root: &Path,
    settings_path: Option<&Path>,
    options: &DiscoveryOptions,
) -> Result<DiscoveryResult, PolicyError> {
    let result = discover_mcp_tools(root, options).await;
    let path = settings_path
        .map(Path::to_path_buf)
        .unwrap_or_else(|| default_settings_path(root));
    update_settings(&result, &path).await?;
    Ok(result)
}

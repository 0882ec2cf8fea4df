//! Locate `.mcp.json` files under a project root.
//!
//! The walk never descends into `node_modules` or `.git`, never follows
//! symlinked directories, and visits entries in sorted name order. Files that
//! cannot be read or parsed are reported and skipped; the scan itself never
//! fails.

use std::fs;
use std::path::Path;

use indexmap::IndexMap;
use serde_json::Value as JsonValue;

use super::{DiscoveredConfig, ProjectConfig, ServerConfig};
use crate::events::{DiscoveryEvent, DiscoveryReporter};

pub const MCP_CONFIG_FILE: &str = ".mcp.json";

/// Directory names the walk never enters.
pub const SKIPPED_DIRS: &[&str] = &["node_modules", ".git"];

/// Why a config file was rejected.
#[derive(Debug, thiserror::Error)]
pub enum ConfigParseError {
    #[error("invalid JSON: {0}")]
    Json(#[from] serde_json::Error),
    #[error("top-level value is not an object")]
    NotAnObject,
    #[error("`mcpServers` is not an object")]
    ServersNotAnObject,
}

/// Recursively collect every parseable `.mcp.json` under `root`.
pub fn find_mcp_configs(root: &Path, reporter: &dyn DiscoveryReporter) -> Vec<DiscoveredConfig> {
    let mut found = Vec::new();
    walk(root, reporter, &mut found);
    found
}

fn walk(dir: &Path, reporter: &dyn DiscoveryReporter, out: &mut Vec<DiscoveredConfig>) {
    let Ok(entries) = fs::read_dir(dir) else {
        return;
    };
    let mut entries: Vec<_> = entries.filter_map(Result::ok).collect();
    entries.sort_by_key(|e| e.file_name());

    for entry in entries {
        let name = entry.file_name();
        if name.to_str().is_some_and(|n| SKIPPED_DIRS.contains(&n)) {
            continue;
        }
        // DirEntry::file_type does not follow symlinks
        let Ok(file_type) = entry.file_type() else {
            continue;
        };
        let path = entry.path();
        if file_type.is_dir() {
            walk(&path, reporter, out);
        } else if file_type.is_file()
            && name == MCP_CONFIG_FILE
            && let Some(found) = load_config_file(&path, reporter)
        {
            out.push(found);
        }
    }
}

fn load_config_file(path: &Path, reporter: &dyn DiscoveryReporter) -> Option<DiscoveredConfig> {
    let content = match fs::read_to_string(path) {
        Ok(c) => c,
        Err(e) => {
            reporter.report(DiscoveryEvent::ConfigSkipped {
                path: path.to_path_buf(),
                reason: format!("unreadable: {e}"),
            });
            return None;
        }
    };
    match parse_project_config(&content) {
        Ok(Some(config)) => {
            reporter.report(DiscoveryEvent::ConfigFound {
                path: path.to_path_buf(),
                servers: config.servers.len(),
            });
            Some(DiscoveredConfig {
                path: path.to_path_buf(),
                config,
            })
        }
        Ok(None) => None,
        Err(e) => {
            reporter.report(DiscoveryEvent::ConfigSkipped {
                path: path.to_path_buf(),
                reason: e.to_string(),
            });
            None
        }
    }
}

/// Parse the contents of one `.mcp.json`.
///
/// Blank content, `null` and `{}` yield `Ok(None)`: the file exists but
/// declares nothing.
pub fn parse_project_config(content: &str) -> Result<Option<ProjectConfig>, ConfigParseError> {
    if content.trim().is_empty() {
        return Ok(None);
    }
    let value: JsonValue = serde_json::from_str(content)?;
    let obj = match &value {
        JsonValue::Null => return Ok(None),
        JsonValue::Object(map) if map.is_empty() => return Ok(None),
        JsonValue::Object(map) => map,
        _ => return Err(ConfigParseError::NotAnObject),
    };

    let mut servers = IndexMap::new();
    match obj.get("mcpServers") {
        None | Some(JsonValue::Null) => {}
        Some(JsonValue::Object(map)) => {
            for (name, def) in map {
                servers.insert(name.clone(), ServerConfig::from_value(def));
            }
        }
        Some(_) => return Err(ConfigParseError::ServersNotAnObject),
    }

    Ok(Some(ProjectConfig {
        servers,
        raw: value,
    }))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::events::RecordingReporter;
    use std::path::PathBuf;

    fn write_file(dir: &Path, rel: &str, content: &str) -> PathBuf {
        let path = dir.join(rel);
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent).unwrap();
        }
        fs::write(&path, content).unwrap();
        path
    }

    #[test]
    fn finds_nested_configs_in_sorted_order() {
        let tmp = tempfile::tempdir().unwrap();
        write_file(tmp.path(), "b/.mcp.json", r#"{"mcpServers":{"y":{"command":"y"}}}"#);
        write_file(tmp.path(), "a/deep/.mcp.json", r#"{"mcpServers":{"x":{"command":"x"}}}"#);
        write_file(tmp.path(), ".mcp.json", r#"{"mcpServers":{"root":{"url":"http://h/"}}}"#);

        let reporter = RecordingReporter::default();
        let found = find_mcp_configs(tmp.path(), &reporter);
        let names: Vec<_> = found
            .iter()
            .map(|c| c.config.servers.keys().next().cloned().unwrap())
            .collect();
        // ".mcp.json" sorts before "a" and "b"
        assert_eq!(names, vec!["root", "x", "y"]);
        assert_eq!(reporter.events().len(), 3);
    }

    #[test]
    fn skips_node_modules_and_git() {
        let tmp = tempfile::tempdir().unwrap();
        write_file(tmp.path(), "node_modules/pkg/.mcp.json", r#"{"mcpServers":{"a":{"command":"a"}}}"#);
        write_file(tmp.path(), ".git/.mcp.json", r#"{"mcpServers":{"b":{"command":"b"}}}"#);
        write_file(tmp.path(), "src/.mcp.json", r#"{"mcpServers":{"c":{"command":"c"}}}"#);

        let found = find_mcp_configs(tmp.path(), &RecordingReporter::default());
        assert_eq!(found.len(), 1);
        assert!(found[0].path.ends_with("src/.mcp.json"));
    }

    #[test]
    fn empty_file_is_not_a_config() {
        let tmp = tempfile::tempdir().unwrap();
        write_file(tmp.path(), ".mcp.json", "");
        write_file(tmp.path(), "a/.mcp.json", "  \n");
        write_file(tmp.path(), "b/.mcp.json", "{}");
        write_file(tmp.path(), "c/.mcp.json", "null");

        let reporter = RecordingReporter::default();
        let found = find_mcp_configs(tmp.path(), &reporter);
        assert!(found.is_empty());
        assert!(reporter.events().is_empty());
    }

    #[test]
    fn malformed_files_are_reported_and_skipped() {
        let tmp = tempfile::tempdir().unwrap();
        write_file(tmp.path(), "a/.mcp.json", "{not json");
        write_file(tmp.path(), "b/.mcp.json", "[1, 2]");
        write_file(tmp.path(), "c/.mcp.json", r#"{"mcpServers": []}"#);
        write_file(tmp.path(), "d/.mcp.json", r#"{"mcpServers":{"ok":{"command":"ok"}}}"#);

        let reporter = RecordingReporter::default();
        let found = find_mcp_configs(tmp.path(), &reporter);
        assert_eq!(found.len(), 1);
        let skipped = reporter
            .events()
            .into_iter()
            .filter(|e| matches!(e, DiscoveryEvent::ConfigSkipped { .. }))
            .count();
        assert_eq!(skipped, 3);
    }

    #[test]
    fn missing_root_yields_nothing() {
        let found = find_mcp_configs(
            Path::new("/definitely/not/a/real/dir"),
            &RecordingReporter::default(),
        );
        assert!(found.is_empty());
    }

    #[test]
    fn keeps_declaration_order_and_raw_json() {
        let parsed = parse_project_config(
            r#"{"mcpServers":{"zeta":{"command":"z"},"alpha":{"url":"http://a/"},"bad":{}}}"#,
        )
        .unwrap()
        .unwrap();
        let keys: Vec<_> = parsed.servers.keys().cloned().collect();
        assert_eq!(keys, vec!["zeta", "alpha", "bad"]);
        assert!(matches!(parsed.servers["bad"], ServerConfig::Unusable { .. }));
        assert!(parsed.raw.get("mcpServers").is_some());
    }

    #[test]
    fn config_without_servers_is_kept() {
        let parsed = parse_project_config(r#"{"other": true}"#).unwrap().unwrap();
        assert!(parsed.servers.is_empty());
    }
}

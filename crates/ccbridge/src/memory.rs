//! Load `CLAUDE.md` memory files from a directory and its ancestors.

use std::path::{Path, PathBuf};

/// Checked in this order in every directory.
pub const MEMORY_FILES: [&str; 2] = ["CLAUDE.md", "CLAUDE.local.md"];

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MemoryFile {
    pub path: PathBuf,
    pub content: String,
}

/// Collect memory files from `start` upward, nearest first. The filesystem
/// root itself is not searched.
pub async fn find_memory_files(start: &Path) -> Vec<MemoryFile> {
    let start = std::path::absolute(start).unwrap_or_else(|_| start.to_path_buf());
    let mut found = Vec::new();
    let mut dir = Some(start.as_path());
    while let Some(current) = dir {
        if current.parent().is_none() {
            break;
        }
        for name in MEMORY_FILES {
            let path = current.join(name);
            match tokio::fs::read_to_string(&path).await {
                Ok(content) => found.push(MemoryFile { path, content }),
                Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
                Err(e) => tracing::debug!("skipping {}: {}", path.display(), e),
            }
        }
        dir = current.parent();
    }
    found
}

/// Render files as context blocks headed by their path relative to `base`.
pub fn format_memory_context(files: &[MemoryFile], base: &Path) -> String {
    let base = std::path::absolute(base).unwrap_or_else(|_| base.to_path_buf());
    let mut parts = Vec::with_capacity(files.len() * 3);
    for file in files {
        parts.push(format!(
            "## Context from {}\n",
            relative_to(&file.path, &base).display()
        ));
        parts.push(file.content.clone());
        parts.push("\n---\n".to_string());
    }
    parts.join("\n")
}

/// `None` when no memory file exists between `start` and the root.
pub async fn load_memory_context(start: &Path) -> Option<String> {
    let files = find_memory_files(start).await;
    if files.is_empty() {
        return None;
    }
    tracing::debug!("loaded {} memory file(s)", files.len());
    Some(format_memory_context(&files, start))
}

fn relative_to(path: &Path, base: &Path) -> PathBuf {
    let path_parts: Vec<_> = path.components().collect();
    let base_parts: Vec<_> = base.components().collect();
    let common = path_parts
        .iter()
        .zip(&base_parts)
        .take_while(|(a, b)| a == b)
        .count();
    let mut rel = PathBuf::new();
    for _ in common..base_parts.len() {
        rel.push("..");
    }
    for part in &path_parts[common..] {
        rel.push(part.as_os_str());
    }
    rel
}

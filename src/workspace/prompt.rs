//! Prompt content building.
//!
//! The user's text always becomes the first `text` block. Every `@path`
//! reference to a file inside the workspace is attached after it: readable
//! UTF-8 files up to [`MAX_EMBED_BYTES`] are embedded as `resource` blocks,
//! anything else becomes a `resource_link`. Directories, missing files, and
//! paths outside the workspace are skipped.

use std::path::Path;
use std::sync::OnceLock;

use regex::Regex;
use serde_json::{json, Value};
use tracing::debug;

use crate::workspace::fs::validate_path;

/// Largest file embedded inline.
pub const MAX_EMBED_BYTES: u64 = 1024 * 1024;

fn reference_pattern() -> Option<&'static Regex> {
    static PATTERN: OnceLock<Option<Regex>> = OnceLock::new();
    PATTERN
        .get_or_init(|| Regex::new(r"(?:^|\s)@([^\s@]+)").ok())
        .as_ref()
}

/// `@path` references in order of appearance, without duplicates.
#[must_use]
pub fn extract_references(text: &str) -> Vec<String> {
    let Some(pattern) = reference_pattern() else {
        return Vec::new();
    };
    let mut refs: Vec<String> = Vec::new();
    for capture in pattern.captures_iter(text) {
        let raw = capture[1].trim_end_matches([',', '.', ';', ':', ')', '?', '!']);
        if raw.is_empty() || raw.ends_with('/') {
            continue;
        }
        if !refs.iter().any(|r| r == raw) {
            refs.push(raw.to_owned());
        }
    }
    refs
}

/// Build the content blocks for a prompt.
#[must_use]
pub fn build_prompt(workspace_root: &Path, text: &str) -> Vec<Value> {
    let mut blocks = vec![json!({ "type": "text", "text": text })];
    for reference in extract_references(text) {
        if let Some(block) = resource_block(workspace_root, &reference) {
            blocks.push(block);
        }
    }
    blocks
}

fn resource_block(workspace_root: &Path, reference: &str) -> Option<Value> {
    let resolved = match validate_path(workspace_root, reference) {
        Ok(path) => path,
        Err(err) => {
            debug!(reference, %err, "skipping prompt reference");
            return None;
        }
    };
    let metadata = std::fs::metadata(&resolved).ok()?;
    if !metadata.is_file() {
        return None;
    }

    let uri = format!("file://{}", resolved.display());
    let name = resolved
        .file_name()
        .map_or_else(|| reference.to_owned(), |n| n.to_string_lossy().into_owned());
    let mime_type = mime_type_for(&resolved);

    if metadata.len() <= MAX_EMBED_BYTES {
        if let Ok(text) = std::fs::read_to_string(&resolved) {
            return Some(json!({
                "type": "resource",
                "resource": { "uri": uri, "text": text, "mimeType": mime_type }
            }));
        }
    }

    Some(json!({
        "type": "resource_link",
        "uri": uri,
        "name": name,
        "mimeType": mime_type,
        "size": metadata.len()
    }))
}

fn mime_type_for(path: &Path) -> &'static str {
    let ext = path
        .extension()
        .and_then(|e| e.to_str())
        .map(str::to_ascii_lowercase);
    match ext.as_deref() {
        Some("md" | "markdown") => "text/markdown",
        Some("html" | "htm") => "text/html",
        Some("css") => "text/css",
        Some("csv") => "text/csv",
        Some("json") => "application/json",
        Some("toml") => "application/toml",
        Some("yaml" | "yml") => "application/yaml",
        Some("xml") => "application/xml",
        Some("js" | "mjs") => "text/javascript",
        Some("py") => "text/x-python",
        Some("rs") => "text/x-rust",
        Some("png") => "image/png",
        Some("jpg" | "jpeg") => "image/jpeg",
        Some("gif") => "image/gif",
        Some("pdf") => "application/pdf",
        Some(_) | None => "text/plain",
    }
}

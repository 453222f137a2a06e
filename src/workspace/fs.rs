//! File access confined to the workspace root.
//!
//! Every path the agent names goes through [`validate_path`] first: `..`
//! segments may not climb above the root, absolute paths must already lie
//! inside it, and symlinks (on the target or on its nearest existing
//! ancestor) may not lead outside.

use std::io::Write;
use std::path::{Component, Path, PathBuf};

use tempfile::NamedTempFile;

use crate::{AppError, Result};

/// Validate that `candidate` resides within `workspace_root` and return the
/// resolved absolute path.
///
/// # Errors
///
/// Returns `AppError::PathViolation` if:
/// - The workspace root cannot be canonicalized.
/// - An absolute candidate does not start with the root.
/// - `..` segments escape the root.
/// - The path, or its nearest existing ancestor, resolves outside the root.
pub fn validate_path(workspace_root: &Path, candidate: impl AsRef<Path>) -> Result<PathBuf> {
    let root = workspace_root
        .canonicalize()
        .map_err(|err| AppError::PathViolation(format!("workspace root invalid: {err}")))?;
    let candidate = candidate.as_ref();

    let relative = if candidate.is_absolute() {
        candidate
            .strip_prefix(&root)
            .or_else(|_| candidate.strip_prefix(workspace_root))
            .map_err(|_| {
                AppError::PathViolation(format!("{} is outside workspace", candidate.display()))
            })?
    } else {
        candidate
    };

    let mut normalized = PathBuf::new();
    for component in relative.components() {
        match component {
            Component::ParentDir => {
                if !normalized.pop() {
                    return Err(AppError::PathViolation(
                        "path attempts to escape workspace".into(),
                    ));
                }
            }
            Component::CurDir => {}
            Component::RootDir | Component::Prefix(_) => {
                return Err(AppError::PathViolation(format!(
                    "unexpected root component in {}",
                    candidate.display()
                )));
            }
            Component::Normal(part) => normalized.push(part),
        }
    }

    let absolute = root.join(normalized);

    // The target may not exist yet (writes); check the closest ancestor that does.
    let existing = absolute
        .ancestors()
        .find(|p| p.exists())
        .unwrap_or(root.as_path());
    let canonical = existing
        .canonicalize()
        .map_err(|err| AppError::PathViolation(format!("cannot resolve path: {err}")))?;
    if !canonical.starts_with(&root) {
        return Err(AppError::PathViolation(
            "symlink target escapes workspace".into(),
        ));
    }

    if existing == absolute.as_path() {
        Ok(canonical)
    } else {
        Ok(absolute)
    }
}

/// Read a text file for the agent.
///
/// `line` is 1-based; `limit` caps the number of lines returned. Lines keep
/// their original terminators.
///
/// # Errors
///
/// - `AppError::PathViolation` if the path is outside the workspace.
/// - `AppError::NotFound` if the file does not exist.
/// - `AppError::Io` if it cannot be read as UTF-8 text.
pub fn read_text_file(
    workspace_root: &Path,
    path: &str,
    line: Option<u32>,
    limit: Option<u32>,
) -> Result<String> {
    let resolved = validate_path(workspace_root, path)?;
    if !resolved.is_file() {
        return Err(AppError::NotFound(format!("no such file: {path}")));
    }
    let text = std::fs::read_to_string(&resolved)
        .map_err(|err| AppError::Io(format!("failed to read {path}: {err}")))?;

    if line.is_none() && limit.is_none() {
        return Ok(text);
    }

    let skip = line.map_or(0, |l| l.saturating_sub(1) as usize);
    let take = limit.map_or(usize::MAX, |l| l as usize);
    Ok(text.split_inclusive('\n').skip(skip).take(take).collect())
}

/// Summary of a completed agent write.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WriteOutcome {
    /// Absolute path of the written file.
    pub path: PathBuf,
    /// Unified diff between the previous and new content.
    pub diff: String,
    /// The file did not exist before.
    pub created: bool,
}

/// Write a text file for the agent, atomically.
///
/// Parent directories are created as needed. The content goes to a
/// temporary file in the target directory which is then persisted over the
/// target, so readers never see a partial write.
///
/// # Errors
///
/// - `AppError::PathViolation` if the path is outside the workspace.
/// - `AppError::Io` on directory creation, write, or rename failure.
pub fn write_text_file(workspace_root: &Path, path: &str, content: &str) -> Result<WriteOutcome> {
    let resolved = validate_path(workspace_root, path)?;
    if resolved.is_dir() {
        return Err(AppError::Io(format!("{path} is a directory")));
    }

    let previous = match std::fs::read_to_string(&resolved) {
        Ok(text) => Some(text),
        Err(err) if err.kind() == std::io::ErrorKind::NotFound => None,
        Err(err) => return Err(AppError::Io(format!("failed to read {path}: {err}"))),
    };

    let parent = resolved
        .parent()
        .ok_or_else(|| AppError::Io("file path has no parent directory".into()))?;
    std::fs::create_dir_all(parent).map_err(|err| {
        AppError::Io(format!(
            "failed to create parent directories for {}: {err}",
            resolved.display()
        ))
    })?;

    let mut tmp = NamedTempFile::new_in(parent)
        .map_err(|err| AppError::Io(format!("failed to create temporary file: {err}")))?;
    tmp.write_all(content.as_bytes())
        .map_err(|err| AppError::Io(format!("failed to write temporary file: {err}")))?;
    tmp.persist(&resolved).map_err(|err| {
        AppError::Io(format!(
            "failed to persist file to {}: {err}",
            resolved.display()
        ))
    })?;

    let before = previous.as_deref().unwrap_or("");
    let diff = diffy::create_patch(before, content).to_string();

    Ok(WriteOutcome {
        path: resolved,
        diff,
        created: previous.is_none(),
    })
}

use std::path::Path;

use agent_console::workspace::fs::{read_text_file, validate_path, write_text_file};
use agent_console::AppError;

#[test]
fn allows_new_file_in_missing_directory() {
    let temp = tempfile::tempdir().expect("tempdir");
    let validated = validate_path(temp.path(), "a/b/c.txt").expect("path valid");

    let canonical_root = temp.path().canonicalize().expect("canonicalize root");
    assert!(validated.starts_with(&canonical_root));
    assert!(validated.ends_with(Path::new("a/b/c.txt")));
}

#[test]
fn current_dir_segments_are_ignored() {
    let temp = tempfile::tempdir().expect("tempdir");
    let root = temp.path().canonicalize().expect("canonicalize root");
    let validated = validate_path(&root, "./src/./lib.rs").expect("path valid");
    assert_eq!(validated, root.join("src/lib.rs"));
}

#[test]
fn traversal_past_root_is_violation() {
    let temp = tempfile::tempdir().expect("tempdir");
    let err = validate_path(temp.path(), "src/../../secret.txt").expect_err("escape");
    assert!(matches!(err, AppError::PathViolation(_)));
}

#[cfg(unix)]
#[test]
fn symlink_out_of_workspace_is_rejected() {
    let workspace = tempfile::tempdir().expect("workspace");
    let outside = tempfile::tempdir().expect("outside");
    std::fs::write(outside.path().join("secret.txt"), "key").expect("write");
    std::os::unix::fs::symlink(outside.path(), workspace.path().join("link")).expect("symlink");

    let err = validate_path(workspace.path(), "link/secret.txt").expect_err("escape");
    assert!(matches!(err, AppError::PathViolation(_)));

    let err = write_text_file(workspace.path(), "link/new.txt", "x").expect_err("escape");
    assert!(matches!(err, AppError::PathViolation(_)));
    assert!(!outside.path().join("new.txt").exists());
}

#[cfg(unix)]
#[test]
fn symlink_inside_workspace_is_allowed() {
    let temp = tempfile::tempdir().expect("tempdir");
    let root = temp.path().canonicalize().expect("canonicalize root");
    std::fs::create_dir(root.join("real")).expect("mkdir");
    std::fs::write(root.join("real/f.txt"), "hi\n").expect("write");
    std::os::unix::fs::symlink(root.join("real"), root.join("alias")).expect("symlink");

    let text = read_text_file(&root, "alias/f.txt", None, None).expect("read");
    assert_eq!(text, "hi\n");
}

#[test]
fn writing_over_a_directory_is_refused() {
    let temp = tempfile::tempdir().expect("tempdir");
    std::fs::create_dir(temp.path().join("dir")).expect("mkdir");
    let err = write_text_file(temp.path(), "dir", "x").expect_err("directory");
    assert!(matches!(err, AppError::Io(_)));
}

#[test]
fn limit_without_line_starts_at_top() {
    let temp = tempfile::tempdir().expect("tempdir");
    std::fs::write(temp.path().join("f.txt"), "a\nb\nc").expect("write");
    let text = read_text_file(temp.path(), "f.txt", None, Some(2)).expect("read");
    assert_eq!(text, "a\nb\n");
    let past_end = read_text_file(temp.path(), "f.txt", Some(10), None).expect("read");
    assert_eq!(past_end, "");
}

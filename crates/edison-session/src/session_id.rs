//! Per-worktree session pinning via `<mgmt-dir>/.session-id`.

use std::path::{Path, PathBuf};

use anyhow::Result;

use edison_config::{ENV_SESSION, ManagementPaths};

/// Write the pin file inside a worktree's management dir (idempotent).
pub fn ensure_worktree_session_id_file(
    worktree_path: &Path,
    management_dir_name: &str,
    session_id: &str,
) -> Result<()> {
    let project_dir = worktree_path.join(management_dir_name);
    std::fs::create_dir_all(&project_dir)?;
    let target = project_dir.join(".session-id");
    if let Ok(existing) = std::fs::read_to_string(&target) {
        if existing.trim() == session_id {
            return Ok(());
        }
    }
    std::fs::write(&target, format!("{session_id}\n"))?;
    Ok(())
}

/// Pin status for a worktree: the file path and whether it matches.
pub fn worktree_pinning_status(
    worktree_path: &Path,
    management_dir_name: &str,
    session_id: &str,
) -> (PathBuf, bool) {
    let path = worktree_path.join(management_dir_name).join(".session-id");
    let pinned = std::fs::read_to_string(&path)
        .map(|content| content.trim() == session_id)
        .unwrap_or(false);
    (path, pinned)
}

/// Ambient session id resolution: explicit argument, `AGENTS_SESSION`, then
/// the pin file discovered by walking up from `start_dir`.
pub fn infer_session_id(explicit: Option<&str>, start_dir: &Path, mgmt: &ManagementPaths) -> Option<String> {
    if let Some(id) = explicit {
        let id = id.trim();
        if !id.is_empty() {
            return Some(id.to_string());
        }
    }
    if let Ok(ambient) = std::env::var(ENV_SESSION) {
        let ambient = ambient.trim().to_string();
        if !ambient.is_empty() {
            return Some(ambient);
        }
    }

    let mgmt_name = mgmt
        .management_root()
        .file_name()
        .and_then(|n| n.to_str())
        .unwrap_or(".project")
        .to_string();
    let mut dir = Some(start_dir);
    while let Some(current) = dir {
        let pin = current.join(&mgmt_name).join(".session-id");
        if let Ok(content) = std::fs::read_to_string(&pin) {
            let id = content.trim().to_string();
            if !id.is_empty() {
                return Some(id);
            }
        }
        dir = current.parent();
    }
    None
}

#[cfg(test)]
mod tests {
    use super::*;
    use serial_test::serial;
    use tempfile::tempdir;

    #[test]
    #[serial]
    fn test_pin_file_write_and_status() {
        let dir = tempdir().unwrap();
        ensure_worktree_session_id_file(dir.path(), ".project", "sess-a").unwrap();
        let (path, pinned) = worktree_pinning_status(dir.path(), ".project", "sess-a");
        assert!(pinned);
        assert!(path.ends_with(".project/.session-id"));

        let (_, other) = worktree_pinning_status(dir.path(), ".project", "sess-b");
        assert!(!other);
    }

    #[test]
    #[serial]
    fn test_pin_write_idempotent() {
        let dir = tempdir().unwrap();
        ensure_worktree_session_id_file(dir.path(), ".project", "sess-a").unwrap();
        ensure_worktree_session_id_file(dir.path(), ".project", "sess-a").unwrap();
        let content = std::fs::read_to_string(dir.path().join(".project/.session-id")).unwrap();
        assert_eq!(content, "sess-a\n");
    }

    #[test]
    #[serial]
    fn test_infer_precedence() {
        let dir = tempdir().unwrap();
        let mgmt = ManagementPaths::with_management_dir(dir.path(), ".project");
        ensure_worktree_session_id_file(dir.path(), ".project", "pinned").unwrap();

        // Explicit wins over everything.
        assert_eq!(
            infer_session_id(Some("explicit"), dir.path(), &mgmt).as_deref(),
            Some("explicit")
        );

        // Env wins over the pin file.
        std::env::set_var(ENV_SESSION, "ambient");
        assert_eq!(
            infer_session_id(None, dir.path(), &mgmt).as_deref(),
            Some("ambient")
        );
        std::env::remove_var(ENV_SESSION);

        // Pin file discovered from a nested directory.
        let nested = dir.path().join("src/deep");
        std::fs::create_dir_all(&nested).unwrap();
        assert_eq!(
            infer_session_id(None, &nested, &mgmt).as_deref(),
            Some("pinned")
        );
    }

    #[test]
    #[serial]
    fn test_infer_none_when_nothing_set() {
        std::env::remove_var(ENV_SESSION);
        let dir = tempdir().unwrap();
        let mgmt = ManagementPaths::with_management_dir(dir.path(), ".project");
        assert!(infer_session_id(None, dir.path(), &mgmt).is_none());
    }
}

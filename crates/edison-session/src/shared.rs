//! Shared-path symlinks: configured paths are linked from each checkout into
//! the shared root so session state is visible from every worktree.

use std::path::{Path, PathBuf};

use anyhow::Result;
use tracing::{debug, warn};

use edison_config::{SharedPathSpec, WorktreeConfig};

use crate::git;

/// True when `rel_path` is tracked in the checkout's index. Tracked paths
/// are never replaced with symlinks.
fn path_is_tracked(checkout_path: &Path, rel_path: &str, timeout_secs: u64) -> bool {
    match git::run_git(checkout_path, &["ls-files", "-z", "--", rel_path], timeout_secs) {
        Ok(out) => !out.stdout.trim().is_empty(),
        Err(_) => false,
    }
}

/// Ensure `link` is a symlink to `target`, merging any existing directory or
/// file content into the target exactly once. Returns true when the link was
/// (re)created.
fn ensure_symlink_with_merge(
    link: &Path,
    target: &Path,
    is_dir: bool,
    merge_existing: bool,
) -> Result<bool> {
    if is_dir {
        std::fs::create_dir_all(target)?;
    } else if let Some(parent) = target.parent() {
        std::fs::create_dir_all(parent)?;
    }

    if link.is_symlink() {
        if let (Ok(resolved), Ok(target_resolved)) = (link.canonicalize(), target.canonicalize()) {
            if resolved == target_resolved {
                return Ok(false);
            }
        }
        std::fs::remove_file(link)?;
    }

    if link.exists() && !link.is_symlink() {
        if is_dir && link.is_dir() {
            if merge_existing {
                for entry in std::fs::read_dir(link)? {
                    let entry = entry?;
                    let dest = target.join(entry.file_name());
                    if dest.exists() {
                        continue;
                    }
                    std::fs::rename(entry.path(), &dest)?;
                }
            }
            std::fs::remove_dir_all(link)?;
        } else if !is_dir && link.is_file() {
            if merge_existing && !target.exists() {
                std::fs::rename(link, target)?;
            } else {
                return Ok(false);
            }
        } else {
            return Ok(false);
        }
    }

    if !link.exists() {
        if let Some(parent) = link.parent() {
            std::fs::create_dir_all(parent)?;
        }
        #[cfg(unix)]
        std::os::unix::fs::symlink(target, link)?;
        #[cfg(not(unix))]
        anyhow::bail!("shared-state symlinks require a unix platform");
        return Ok(true);
    }
    Ok(false)
}

fn item_target_root(
    item: &SharedPathSpec,
    shared_root: &Path,
    primary_root: &Path,
) -> PathBuf {
    if item.target_root == "primary" {
        primary_root.to_path_buf()
    } else {
        shared_root.to_path_buf()
    }
}

/// Link every configured shared path for `scope` into `checkout_path`.
///
/// Returns `(updated, skipped_tracked)`.
pub fn ensure_shared_paths_in_checkout(
    checkout_path: &Path,
    shared_root: &Path,
    primary_root: &Path,
    config: &WorktreeConfig,
    scope: &str,
) -> Result<(usize, usize)> {
    let mut updated = 0;
    let mut skipped_tracked = 0;
    let timeout = config.timeouts.health_check;

    for item in config.shared_state.effective_shared_paths() {
        if !item.in_scope(scope) {
            continue;
        }
        let rel = item.path.trim();
        if rel.is_empty() {
            continue;
        }
        let rel_path = Path::new(rel);
        if rel_path.is_absolute() || rel_path.components().any(|c| c.as_os_str() == "..") {
            warn!(path = rel, "skipping unsafe shared path");
            continue;
        }

        if path_is_tracked(checkout_path, rel, timeout) {
            skipped_tracked += 1;
            continue;
        }

        let target_base = item_target_root(item, shared_root, primary_root);
        let link = checkout_path.join(rel);
        let target = target_base.join(rel);

        // Linking a checkout path onto itself would loop.
        if link == target {
            continue;
        }
        if item.only_if_target_exists && !target.exists() {
            continue;
        }

        match ensure_symlink_with_merge(&link, &target, item.is_dir(), item.merge_existing) {
            Ok(true) => {
                debug!(link = %link.display(), target = %target.display(), "shared path linked");
                updated += 1;
            }
            Ok(false) => {}
            Err(e) => warn!(link = %link.display(), error = %e, "failed to link shared path"),
        }
    }

    Ok((updated, skipped_tracked))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::git::testutil::init_repo;
    use edison_config::ConfigManager;
    use serial_test::serial;
    use tempfile::tempdir;

    fn worktree_config(root: &Path) -> WorktreeConfig {
        WorktreeConfig::from_config(&ConfigManager::load(root).unwrap()).unwrap()
    }

    #[test]
    #[serial]
    fn test_links_shared_path_into_checkout() {
        let dir = tempdir().unwrap();
        let checkout = dir.path().join("checkout");
        let shared = dir.path().join("shared");
        std::fs::create_dir_all(&checkout).unwrap();
        init_repo(&checkout);
        let config = worktree_config(dir.path());

        let (updated, skipped) =
            ensure_shared_paths_in_checkout(&checkout, &shared, &checkout, &config, "session")
                .unwrap();
        assert_eq!(updated, 1);
        assert_eq!(skipped, 0);

        let link = checkout.join(".project");
        assert!(link.is_symlink());
        assert_eq!(link.canonicalize().unwrap(), shared.join(".project").canonicalize().unwrap());
    }

    #[test]
    #[serial]
    fn test_existing_content_merged_once() {
        let dir = tempdir().unwrap();
        let checkout = dir.path().join("checkout");
        let shared = dir.path().join("shared");
        std::fs::create_dir_all(&checkout).unwrap();
        init_repo(&checkout);
        // Pre-existing state in the checkout must move into the shared root.
        std::fs::create_dir_all(checkout.join(".project/tasks/todo")).unwrap();
        std::fs::write(checkout.join(".project/tasks/todo/x.md"), "---\nid: x\n---\n").unwrap();

        let config = worktree_config(dir.path());
        ensure_shared_paths_in_checkout(&checkout, &shared, &checkout, &config, "session").unwrap();

        assert!(shared.join(".project/tasks/todo/x.md").exists());
        assert!(checkout.join(".project").is_symlink());
        // Reachable through the link too.
        assert!(checkout.join(".project/tasks/todo/x.md").exists());
    }

    #[test]
    #[serial]
    fn test_idempotent_relink() {
        let dir = tempdir().unwrap();
        let checkout = dir.path().join("checkout");
        let shared = dir.path().join("shared");
        std::fs::create_dir_all(&checkout).unwrap();
        init_repo(&checkout);
        let config = worktree_config(dir.path());

        ensure_shared_paths_in_checkout(&checkout, &shared, &checkout, &config, "session").unwrap();
        let (updated, _) =
            ensure_shared_paths_in_checkout(&checkout, &shared, &checkout, &config, "session")
                .unwrap();
        assert_eq!(updated, 0);
    }

    #[test]
    #[serial]
    fn test_tracked_path_is_skipped() {
        let dir = tempdir().unwrap();
        let checkout = dir.path().join("checkout");
        let shared = dir.path().join("shared");
        std::fs::create_dir_all(&checkout).unwrap();
        init_repo(&checkout);
        std::fs::create_dir_all(checkout.join(".project")).unwrap();
        std::fs::write(checkout.join(".project/keep.md"), "tracked").unwrap();
        git::git_checked(&checkout, &["add", "-f", ".project/keep.md"], 10).unwrap();
        git::git_checked(&checkout, &["commit", "-m", "track"], 10).unwrap();

        let config = worktree_config(dir.path());
        let (updated, skipped) =
            ensure_shared_paths_in_checkout(&checkout, &shared, &checkout, &config, "session")
                .unwrap();
        assert_eq!(updated, 0);
        assert_eq!(skipped, 1);
        assert!(!checkout.join(".project").is_symlink());
    }
}

//! Filesystem helpers with atomic-write and cross-device-safe move semantics.
//!
//! State transitions rename entity files between directories; a crash must
//! leave either the source intact or the target complete. Plain writes go
//! through write-to-temp + rename for the same reason.

use std::fs;
use std::path::Path;

use crate::error::EdisonError;

pub fn ensure_dir(path: &Path) -> Result<(), EdisonError> {
    fs::create_dir_all(path)
        .map_err(|e| EdisonError::Persistence(format!("Failed to create {}: {e}", path.display())))
}

/// Write `content` atomically: temp file in the same directory, then rename.
pub fn write_atomic(path: &Path, content: &str) -> Result<(), EdisonError> {
    let parent = path
        .parent()
        .ok_or_else(|| EdisonError::Persistence(format!("No parent dir for {}", path.display())))?;
    ensure_dir(parent)?;

    let tmp = tempfile::NamedTempFile::new_in(parent)
        .map_err(|e| EdisonError::Persistence(format!("Failed to create temp file: {e}")))?;
    fs::write(tmp.path(), content)
        .map_err(|e| EdisonError::Persistence(format!("Failed to write temp file: {e}")))?;
    tmp.persist(path).map_err(|e| {
        EdisonError::Persistence(format!("Failed to persist {}: {e}", path.display()))
    })?;
    Ok(())
}

/// Move a file, falling back to copy + verify + delete across devices.
pub fn safe_move(src: &Path, dst: &Path) -> Result<(), EdisonError> {
    if let Some(parent) = dst.parent() {
        ensure_dir(parent)?;
    }
    match fs::rename(src, dst) {
        Ok(()) => Ok(()),
        Err(_) => {
            // Cross-device rename fails with EXDEV; copy then verify length.
            fs::copy(src, dst).map_err(|e| {
                EdisonError::Persistence(format!(
                    "Failed to copy {} -> {}: {e}",
                    src.display(),
                    dst.display()
                ))
            })?;
            let src_len = fs::metadata(src)
                .map_err(|e| EdisonError::Persistence(format!("stat failed: {e}")))?
                .len();
            let dst_len = fs::metadata(dst)
                .map_err(|e| EdisonError::Persistence(format!("stat failed: {e}")))?
                .len();
            if src_len != dst_len {
                let _ = fs::remove_file(dst);
                return Err(EdisonError::Persistence(format!(
                    "Copy verification failed moving {} ({} != {} bytes)",
                    src.display(),
                    src_len,
                    dst_len
                )));
            }
            fs::remove_file(src).map_err(|e| {
                EdisonError::Persistence(format!("Failed to remove {}: {e}", src.display()))
            })
        }
    }
}

/// Parse a YAML file into `T`. Missing files are a `Config` error.
pub fn read_yaml<T: serde::de::DeserializeOwned>(path: &Path) -> Result<T, EdisonError> {
    let content = fs::read_to_string(path)
        .map_err(|e| EdisonError::Config(format!("Failed to read {}: {e}", path.display())))?;
    serde_yaml::from_str(&content)
        .map_err(|e| EdisonError::Config(format!("Malformed YAML in {}: {e}", path.display())))
}

/// Parse a JSON file into `T`.
pub fn read_json<T: serde::de::DeserializeOwned>(path: &Path) -> Result<T, EdisonError> {
    let content = fs::read_to_string(path)
        .map_err(|e| EdisonError::Persistence(format!("Failed to read {}: {e}", path.display())))?;
    serde_json::from_str(&content)
        .map_err(|e| EdisonError::Persistence(format!("Malformed JSON in {}: {e}", path.display())))
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    #[test]
    fn test_write_atomic_creates_parents() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("a/b/c.txt");
        write_atomic(&path, "hello").unwrap();
        assert_eq!(fs::read_to_string(&path).unwrap(), "hello");
    }

    #[test]
    fn test_write_atomic_replaces_existing() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("f.txt");
        write_atomic(&path, "one").unwrap();
        write_atomic(&path, "two").unwrap();
        assert_eq!(fs::read_to_string(&path).unwrap(), "two");
    }

    #[test]
    fn test_safe_move_renames_within_device() {
        let dir = tempdir().unwrap();
        let src = dir.path().join("src.md");
        let dst = dir.path().join("state/dst.md");
        fs::write(&src, "body").unwrap();
        safe_move(&src, &dst).unwrap();
        assert!(!src.exists());
        assert_eq!(fs::read_to_string(&dst).unwrap(), "body");
    }

    #[test]
    fn test_read_yaml_reports_malformed() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("bad.yml");
        fs::write(&path, ": not yaml : [").unwrap();
        let err = read_yaml::<serde_yaml::Value>(&path).unwrap_err();
        assert!(err.to_string().contains("Malformed YAML"));
    }

    #[test]
    fn test_read_json_roundtrip() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("s.json");
        fs::write(&path, r#"{"id": "x"}"#).unwrap();
        let v: serde_json::Value = read_json(&path).unwrap();
        assert_eq!(v["id"], "x");
    }
}

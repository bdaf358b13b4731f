//! Every file in the store is replaced, never edited in place: the new
//! content goes to a temporary sibling which is then renamed over the
//! target. Readers see either the old or the new file, never a mix.

use serde::de::DeserializeOwned;
use serde::Serialize;
use std::fs;
use std::io::{self, Write};
use std::path::Path;

use crate::error::{FeedbackError, Result};

/// Prefix shared by all in-flight temp files; directory scans skip it.
pub const TEMP_PREFIX: &str = ".tmp-";

pub fn write_atomic(path: &Path, data: &[u8]) -> Result<()> {
    let parent = path.parent().ok_or_else(|| {
        FeedbackError::Io(io::Error::new(
            io::ErrorKind::InvalidInput,
            format!("path has no parent: {}", path.display()),
        ))
    })?;
    fs::create_dir_all(parent)?;

    let mut temp = tempfile::Builder::new()
        .prefix(TEMP_PREFIX)
        .tempfile_in(parent)?;
    temp.write_all(data)?;
    temp.as_file().sync_all()?;
    // Dropping a NamedTempFile that failed to persist removes it.
    temp.persist(path)?;

    if let Ok(dir) = fs::File::open(parent) {
        let _ = dir.sync_all();
    }
    Ok(())
}

pub fn write_json<T: Serialize>(path: &Path, value: &T) -> Result<()> {
    let json = serde_json::to_vec_pretty(value)?;
    write_atomic(path, &json)
}

/// `Ok(None)` when the file does not exist; parse failures are errors.
pub fn read_json<T: DeserializeOwned>(path: &Path) -> Result<Option<T>> {
    match fs::read(path) {
        Ok(bytes) => Ok(Some(serde_json::from_slice(&bytes)?)),
        Err(e) if e.kind() == io::ErrorKind::NotFound => Ok(None),
        Err(e) => Err(e.into()),
    }
}

pub fn remove_if_exists(path: &Path) -> Result<()> {
    match fs::remove_file(path) {
        Ok(()) => Ok(()),
        Err(e) if e.kind() == io::ErrorKind::NotFound => Ok(()),
        Err(e) => Err(e.into()),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn test_write_creates_parent_and_leaves_no_temp_files() {
        let dir = TempDir::new().unwrap();
        let target = dir.path().join("nested").join("record.json");
        write_atomic(&target, b"{\"a\":1}").unwrap();
        assert_eq!(fs::read_to_string(&target).unwrap(), "{\"a\":1}");

        let leftovers: Vec<_> = fs::read_dir(target.parent().unwrap())
            .unwrap()
            .filter_map(|e| e.ok())
            .filter(|e| e.file_name().to_string_lossy().starts_with(TEMP_PREFIX))
            .collect();
        assert!(leftovers.is_empty());
    }

    #[test]
    fn test_replace_overwrites_whole_file() {
        let dir = TempDir::new().unwrap();
        let target = dir.path().join("record.json");
        write_atomic(&target, b"a much longer first version").unwrap();
        write_atomic(&target, b"short").unwrap();
        assert_eq!(fs::read_to_string(&target).unwrap(), "short");
    }

    #[test]
    fn test_read_json_missing_is_none() {
        let dir = TempDir::new().unwrap();
        let value: Option<serde_json::Value> = read_json(&dir.path().join("nope.json")).unwrap();
        assert!(value.is_none());
    }

    #[test]
    fn test_read_json_corrupt_is_error() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("bad.json");
        fs::write(&path, "{ truncated").unwrap();
        let result: Result<Option<serde_json::Value>> = read_json(&path);
        assert!(matches!(result, Err(FeedbackError::Serialization(_))));
    }

    #[test]
    fn test_remove_if_exists_is_quiet() {
        let dir = TempDir::new().unwrap();
        assert!(remove_if_exists(&dir.path().join("ghost.png")).is_ok());
    }
}

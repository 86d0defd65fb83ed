use anyhow::{Context, Result};
use std::collections::HashMap;
use std::fs;
use std::path::{Path, PathBuf};

/// Durable device -> cursor checkpoint map. The whole map is rewritten on
/// every update so the file is always a consistent snapshot; a missing entry
/// means the device is fetched from the beginning.
#[derive(Debug)]
pub struct CursorStore {
    path: PathBuf,
    cursors: HashMap<String, String>,
}

impl CursorStore {
    /// Loads the cache from disk. A missing or unreadable file starts the
    /// store empty rather than failing the run.
    pub fn load(path: &Path) -> Self {
        let cursors = read_cursor_file(path).unwrap_or_else(|err| {
            tracing::warn!(path = %path.display(), error = %err, "failed to load cursor cache; starting fresh");
            HashMap::new()
        });
        Self {
            path: path.to_path_buf(),
            cursors,
        }
    }

    pub fn get(&self, device_uid: &str) -> Option<&str> {
        self.cursors.get(device_uid).map(String::as_str)
    }

    /// Updates one device's cursor and rewrites the full map to disk.
    pub fn set_and_persist(&mut self, device_uid: &str, cursor: &str) -> Result<()> {
        self.cursors
            .insert(device_uid.to_string(), cursor.to_string());
        let tmp = self.path.with_extension("json.tmp");
        let json = serde_json::to_string_pretty(&self.cursors)?;
        fs::write(&tmp, json).context("write cursor cache tmp")?;
        fs::rename(&tmp, &self.path).context("rename cursor cache")?;
        Ok(())
    }

    pub fn len(&self) -> usize {
        self.cursors.len()
    }

    pub fn is_empty(&self) -> bool {
        self.cursors.is_empty()
    }
}

fn read_cursor_file(path: &Path) -> Result<HashMap<String, String>> {
    if !path.exists() {
        return Ok(HashMap::new());
    }
    let data = fs::read_to_string(path).context("read cursor cache")?;
    serde_json::from_str(&data).context("parse cursor cache")
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn missing_file_starts_empty() {
        let dir = TempDir::new().unwrap();
        let store = CursorStore::load(&dir.path().join("cursors.json"));
        assert!(store.is_empty());
        assert_eq!(store.get("dev:1"), None);
    }

    #[test]
    fn malformed_file_starts_empty() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("cursors.json");
        fs::write(&path, "{not json").unwrap();

        let store = CursorStore::load(&path);
        assert!(store.is_empty());
    }

    #[test]
    fn set_and_persist_round_trips() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("cursors.json");

        let mut store = CursorStore::load(&path);
        store.set_and_persist("dev:1", "evt-aaa").unwrap();
        store.set_and_persist("dev:2", "evt-bbb").unwrap();
        store.set_and_persist("dev:1", "evt-ccc").unwrap();

        let reloaded = CursorStore::load(&path);
        assert_eq!(reloaded.len(), 2);
        assert_eq!(reloaded.get("dev:1"), Some("evt-ccc"));
        assert_eq!(reloaded.get("dev:2"), Some("evt-bbb"));
        assert!(!path.with_extension("json.tmp").exists());
    }
}

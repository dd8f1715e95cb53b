//! JSON spec file with atomic replacement

use super::SpecStore;
use crate::error::SpecError;
use async_trait::async_trait;
use serde_json::Value;
use std::io::Write;
use std::path::{Path, PathBuf};

/// Spec document stored as a JSON file
///
/// Writes go to a temporary file in the same directory which is fsynced and
/// then renamed over the target, so a reader sees either the old or the new
/// document.
#[derive(Debug, Clone)]
pub struct JsonFileSpecStore {
    path: PathBuf,
}

impl JsonFileSpecStore {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    #[inline]
    #[must_use]
    pub fn path(&self) -> &Path {
        &self.path
    }
}

#[async_trait]
impl SpecStore for JsonFileSpecStore {
    async fn read(&self) -> Result<Value, SpecError> {
        let text = tokio::fs::read_to_string(&self.path)
            .await
            .map_err(|e| SpecError::io_error(&self.path, e))?;
        Ok(serde_json::from_str(&text)?)
    }

    async fn write(&self, document: &Value) -> Result<(), SpecError> {
        let mut bytes = serde_json::to_vec_pretty(document)?;
        bytes.push(b'\n');
        let path = self.path.clone();

        tokio::task::spawn_blocking(move || write_atomic(&path, &bytes))
            .await
            .map_err(|e| SpecError::io_error(&self.path, std::io::Error::other(e)))??;

        tracing::info!(path = %self.path.display(), "spec written");
        Ok(())
    }
}

fn write_atomic(path: &Path, bytes: &[u8]) -> Result<(), SpecError> {
    let dir = match path.parent() {
        Some(parent) if !parent.as_os_str().is_empty() => parent,
        _ => Path::new("."),
    };

    let mut temp =
        tempfile::NamedTempFile::new_in(dir).map_err(|e| SpecError::io_error(dir, e))?;
    temp.write_all(bytes)
        .map_err(|e| SpecError::io_error(temp.path(), e))?;
    temp.as_file()
        .sync_all()
        .map_err(|e| SpecError::io_error(temp.path(), e))?;
    temp.persist(path)
        .map_err(|e| SpecError::io_error(path, e.error))?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[tokio::test]
    async fn write_then_read() {
        let dir = tempfile::tempdir().unwrap();
        let store = JsonFileSpecStore::new(dir.path().join("spec.json"));
        let doc = json!({ "name": "test", "params": { "b": 2, "a": 1 } });

        store.write(&doc).await.unwrap();
        assert_eq!(store.read().await.unwrap(), doc);

        let text = std::fs::read_to_string(store.path()).unwrap();
        assert!(text.starts_with("{\n  \"name\""));
        // insertion order survives the round trip
        assert!(text.find("\"b\"").unwrap() < text.find("\"a\"").unwrap());
    }

    #[tokio::test]
    async fn replaces_existing_file_without_leftovers() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("spec.json");
        std::fs::write(&path, "{\"old\": true}").unwrap();

        let store = JsonFileSpecStore::new(&path);
        store.write(&json!({ "new": true })).await.unwrap();

        assert_eq!(store.read().await.unwrap(), json!({ "new": true }));
        let entries: Vec<_> = std::fs::read_dir(dir.path()).unwrap().collect();
        assert_eq!(entries.len(), 1);
    }

    #[tokio::test]
    async fn invalid_json_is_parse_error() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("spec.json");
        std::fs::write(&path, "{ not json").unwrap();
        assert!(matches!(
            JsonFileSpecStore::new(&path).read().await,
            Err(SpecError::Parse(_))
        ));
    }

    #[tokio::test]
    async fn missing_file_is_io_error() {
        let dir = tempfile::tempdir().unwrap();
        let store = JsonFileSpecStore::new(dir.path().join("absent.json"));
        assert!(matches!(store.read().await, Err(SpecError::Io { .. })));
    }
}

//! Atomic file-based storage for small JSON documents.
//!
//! The growth strategy and the health snapshot are both rewritten wholesale.
//! Writers take an exclusive lock on a sibling `.lock` file, write to a
//! `.tmp` file, `sync_all` it and rename it over the target, so readers never
//! observe a half-written document.

use std::fs::{self, File};
use std::io::{Read, Write};
use std::marker::PhantomData;
use std::path::{Path, PathBuf};

use fs2::FileExt;
use serde::de::DeserializeOwned;
use serde::Serialize;

use crate::error::{EngineError, Result};

/// Temporary file suffix for atomic writes.
const TMP_SUFFIX: &str = ".tmp";

/// Lock file suffix for concurrent access prevention.
const LOCK_SUFFIX: &str = ".lock";

/// A JSON document of type `T` stored at a fixed path.
#[derive(Debug, Clone)]
pub struct JsonDocument<T> {
    path: PathBuf,
    _marker: PhantomData<fn() -> T>,
}

impl<T> JsonDocument<T>
where
    T: Serialize + DeserializeOwned,
{
    #[must_use]
    pub fn new(path: impl AsRef<Path>) -> Self {
        Self {
            path: path.as_ref().to_path_buf(),
            _marker: PhantomData,
        }
    }

    #[must_use]
    pub fn path(&self) -> &Path {
        &self.path
    }

    fn sibling(&self, suffix: &str) -> PathBuf {
        let mut name = self
            .path
            .file_name()
            .map(|n| n.to_os_string())
            .unwrap_or_default();
        name.push(suffix);
        self.path.with_file_name(name)
    }

    /// Returns the path to the temporary file.
    #[must_use]
    pub fn tmp_file_path(&self) -> PathBuf {
        self.sibling(TMP_SUFFIX)
    }

    /// Returns the path to the lock file.
    #[must_use]
    pub fn lock_file_path(&self) -> PathBuf {
        self.sibling(LOCK_SUFFIX)
    }

    /// Saves the document atomically.
    pub fn save(&self, value: &T) -> Result<()> {
        if let Some(parent) = self.path.parent() {
            fs::create_dir_all(parent)?;
        }

        let lock_file = File::create(self.lock_file_path())?;
        FileExt::lock_exclusive(&lock_file)
            .map_err(|e| EngineError::store(format!("failed to lock {}: {e}", self.path.display())))?;

        let tmp_path = self.tmp_file_path();
        let json = serde_json::to_string_pretty(value)?;

        let mut tmp_file = File::create(&tmp_path)?;
        tmp_file.write_all(json.as_bytes())?;
        tmp_file.sync_all()?;

        fs::rename(&tmp_path, &self.path)?;
        Ok(())
    }

    /// Loads the document.
    ///
    /// Returns `Ok(None)` when the file does not exist. Unparseable content
    /// is returned as [`EngineError::Json`] and left on disk so the caller
    /// decides how to degrade.
    pub fn load(&self) -> Result<Option<T>> {
        let lock_path = self.lock_file_path();
        let _lock = if lock_path.exists() {
            let lock_file = File::open(&lock_path)?;
            FileExt::lock_shared(&lock_file).map_err(|e| {
                EngineError::store(format!("failed to lock {}: {e}", self.path.display()))
            })?;
            Some(lock_file)
        } else {
            None
        };

        let mut file = match File::open(&self.path) {
            Ok(f) => f,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(None),
            Err(e) => return Err(e.into()),
        };

        let mut contents = String::new();
        file.read_to_string(&mut contents)?;
        Ok(Some(serde_json::from_str(&contents)?))
    }

    /// Checks if the document exists.
    #[must_use]
    pub fn exists(&self) -> bool {
        self.path.exists()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde::Deserialize;
    use tempfile::TempDir;

    #[derive(Debug, PartialEq, Serialize, Deserialize)]
    struct Counter {
        name: String,
        value: u32,
    }

    fn document() -> (JsonDocument<Counter>, TempDir) {
        let temp = TempDir::new().expect("Failed to create temp dir");
        let doc = JsonDocument::new(temp.path().join(".prospector").join("counter.json"));
        (doc, temp)
    }

    #[test]
    fn test_load_missing_returns_none() {
        let (doc, _temp) = document();
        assert!(doc.load().unwrap().is_none());
        assert!(!doc.exists());
    }

    #[test]
    fn test_save_then_load() {
        let (doc, _temp) = document();
        let value = Counter {
            name: "emails".into(),
            value: 3,
        };
        doc.save(&value).unwrap();
        assert_eq!(doc.load().unwrap(), Some(value));
    }

    #[test]
    fn test_no_tmp_file_after_save() {
        let (doc, _temp) = document();
        doc.save(&Counter {
            name: "x".into(),
            value: 1,
        })
        .unwrap();
        assert!(!doc.tmp_file_path().exists());
        assert!(doc.lock_file_path().exists());
        assert!(doc.exists());
    }

    #[test]
    fn test_save_overwrites_whole_document() {
        let (doc, _temp) = document();
        doc.save(&Counter {
            name: "a-much-longer-name".into(),
            value: 1,
        })
        .unwrap();
        doc.save(&Counter {
            name: "b".into(),
            value: 2,
        })
        .unwrap();
        assert_eq!(doc.load().unwrap().unwrap().name, "b");
    }

    #[test]
    fn test_corrupt_file_is_json_error_and_kept() {
        let (doc, _temp) = document();
        fs::create_dir_all(doc.path().parent().unwrap()).unwrap();
        fs::write(doc.path(), "not valid json {{{").unwrap();

        assert!(matches!(doc.load(), Err(EngineError::Json(_))));
        assert!(doc.exists());
    }

    #[test]
    fn test_sibling_paths() {
        let doc: JsonDocument<Counter> = JsonDocument::new("/state/health.json");
        assert_eq!(doc.tmp_file_path(), PathBuf::from("/state/health.json.tmp"));
        assert_eq!(doc.lock_file_path(), PathBuf::from("/state/health.json.lock"));
    }
}

//! Local preference cache
//!
//! Small per-device state that does not belong in the record store: where
//! the reader left off, the preferred translation, and the last chat
//! session. Loaded once at startup and saved explicitly after changes.

use crate::error::{LampstandError, Result};
use directories::ProjectDirs;
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};

/// Where the reader left off
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ReadingPosition {
    /// Book slug
    pub book: String,
    /// Chapter number
    pub chapter: u32,
    /// Verse number, if one was selected
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub verse: Option<u32>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
struct CacheState {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    reading_position: Option<ReadingPosition>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    translation: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    last_session: Option<String>,
}

/// JSON-file backed preference cache
#[derive(Debug, Clone)]
pub struct LocalCache {
    path: PathBuf,
    state: CacheState,
}

impl LocalCache {
    /// Platform cache location (`state.json` in the cache directory)
    pub fn default_path() -> Result<PathBuf> {
        let dirs = ProjectDirs::from("org", "lampstand", "lampstand").ok_or_else(|| {
            LampstandError::Storage("could not determine cache directory".to_string())
        })?;
        Ok(dirs.cache_dir().join("state.json"))
    }

    /// Reads the cache at `path`
    ///
    /// A missing file yields an empty cache. An unreadable or corrupt file
    /// is logged and treated as empty.
    pub fn load(path: impl Into<PathBuf>) -> Result<Self> {
        let path = path.into();
        let state = match fs::read_to_string(&path) {
            Ok(contents) => serde_json::from_str(&contents).unwrap_or_else(|e| {
                tracing::warn!("Ignoring corrupt cache at {}: {}", path.display(), e);
                CacheState::default()
            }),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => CacheState::default(),
            Err(e) => {
                tracing::warn!("Could not read cache at {}: {}", path.display(), e);
                CacheState::default()
            }
        };
        Ok(Self { path, state })
    }

    /// Writes the cache back to disk
    pub fn save(&self) -> Result<()> {
        if let Some(parent) = self.path.parent() {
            fs::create_dir_all(parent)?;
        }
        let tmp = self.path.with_extension("json.tmp");
        fs::write(&tmp, serde_json::to_string_pretty(&self.state)?)?;
        fs::rename(&tmp, &self.path)?;
        tracing::debug!("Saved cache to {}", self.path.display());
        Ok(())
    }

    /// File backing this cache
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Last reading position
    pub fn reading_position(&self) -> Option<&ReadingPosition> {
        self.state.reading_position.as_ref()
    }

    /// Record the reading position
    pub fn set_reading_position(&mut self, position: ReadingPosition) {
        self.state.reading_position = Some(position);
    }

    /// Preferred translation code
    pub fn translation(&self) -> Option<&str> {
        self.state.translation.as_deref()
    }

    /// Record the preferred translation
    pub fn set_translation(&mut self, translation: impl Into<String>) {
        self.state.translation = Some(translation.into());
    }

    /// Slug of the last chat session
    pub fn last_session(&self) -> Option<&str> {
        self.state.last_session.as_deref()
    }

    /// Record or forget the last chat session
    pub fn set_last_session(&mut self, slug: Option<String>) {
        self.state.last_session = slug;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn test_missing_file_is_empty() {
        let dir = TempDir::new().unwrap();
        let cache = LocalCache::load(dir.path().join("state.json")).unwrap();
        assert!(cache.reading_position().is_none());
        assert!(cache.translation().is_none());
        assert!(cache.last_session().is_none());
    }

    #[test]
    fn test_save_and_reload() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("nested").join("state.json");

        let mut cache = LocalCache::load(&path).unwrap();
        cache.set_reading_position(ReadingPosition {
            book: "joao".to_string(),
            chapter: 3,
            verse: Some(16),
        });
        cache.set_translation("ARA");
        cache.set_last_session(Some("k3x9q2m1ab".to_string()));
        cache.save().unwrap();

        let reloaded = LocalCache::load(&path).unwrap();
        assert_eq!(reloaded.reading_position().map(|p| p.chapter), Some(3));
        assert_eq!(reloaded.translation(), Some("ARA"));
        assert_eq!(reloaded.last_session(), Some("k3x9q2m1ab"));
    }

    #[test]
    fn test_corrupt_file_is_ignored() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("state.json");
        fs::write(&path, "{not json").unwrap();

        let cache = LocalCache::load(&path).unwrap();
        assert!(cache.last_session().is_none());
    }
}

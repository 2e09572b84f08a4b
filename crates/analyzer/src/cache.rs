use crate::analysis::types::FileSymbolData;
use crate::config::CacheConfig;
use rustc_hash::FxHashMap;
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::time::SystemTime;
use thiserror::Error;

const PERSIST_FORMAT_VERSION: u32 = 1;

#[derive(Debug, Error)]
pub enum CacheError {
    #[error("cache io failure: {0}")]
    Io(#[from] std::io::Error),
    #[error("cache serialization failure: {0}")]
    Serialization(#[from] serde_json::Error),
    #[error("no persistence path configured")]
    NoPersistencePath,
    #[error("unsupported cache format version {0}")]
    UnsupportedVersion(u32),
}

/// One cached extraction plus the validity fingerprint taken at cache time.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CacheEntry {
    pub data: FileSymbolData,
    /// On-disk modification time when the entry was stored
    pub mtime: SystemTime,
    /// Content hash, present only in hash-validation mode
    pub content_hash: Option<String>,
    /// Number of hits served from this entry
    pub access_count: u64,
    /// Logical tick of the last access, drives LRU eviction
    pub last_accessed: u64,
}

#[derive(Debug, Clone, PartialEq)]
pub struct CacheStatistics {
    pub entries: usize,
    pub hits: u64,
    pub misses: u64,
    /// hits / (hits + misses), 0.0 before any access
    pub hit_rate: f64,
}

#[derive(Debug, Serialize, Deserialize)]
struct PersistedCache {
    version: u32,
    entries: BTreeMap<String, CacheEntry>,
}

/// Incremental symbol cache keyed by file path.
///
/// `get` serves cached extractions while the on-disk mtime (and optionally
/// a content hash) still matches; anything else is a miss, never an error.
/// Beyond capacity the least-recently-touched entry is evicted first.
pub struct SymbolCache {
    config: CacheConfig,
    entries: FxHashMap<String, CacheEntry>,
    persist_path: Option<PathBuf>,
    clock: u64,
    hits: u64,
    misses: u64,
}

impl SymbolCache {
    pub fn new(config: CacheConfig) -> Self {
        Self {
            config,
            entries: FxHashMap::default(),
            persist_path: None,
            clock: 0,
            hits: 0,
            misses: 0,
        }
    }

    /// Cache backed by a JSON document; loads any previously persisted
    /// entries on construction. A missing or unreadable document starts
    /// the cache empty rather than failing.
    pub fn with_persistence(path: impl Into<PathBuf>, config: CacheConfig) -> Self {
        let path = path.into();
        let mut cache = Self::new(config);

        match Self::load_entries(&path) {
            Ok(Some(entries)) => {
                cache.clock = entries.values().map(|e| e.last_accessed).max().unwrap_or(0);
                cache.entries = entries;
            }
            Ok(None) => {}
            Err(error) => {
                log::warn!("discarding unreadable symbol cache {}: {error}", path.display());
            }
        }
        cache.persist_path = Some(path);
        cache
    }

    fn load_entries(path: &Path) -> Result<Option<FxHashMap<String, CacheEntry>>, CacheError> {
        if !path.exists() {
            return Ok(None);
        }
        let content = std::fs::read_to_string(path)?;
        let persisted: PersistedCache = serde_json::from_str(&content)?;
        if persisted.version != PERSIST_FORMAT_VERSION {
            return Err(CacheError::UnsupportedVersion(persisted.version));
        }
        Ok(Some(persisted.entries.into_iter().collect()))
    }

    fn tick(&mut self) -> u64 {
        self.clock += 1;
        self.clock
    }

    fn fingerprint(&self, path: &str) -> Option<(SystemTime, Option<String>)> {
        let mtime = std::fs::metadata(path).and_then(|m| m.modified()).ok()?;
        let hash = if self.config.validate_content_hash {
            let content = std::fs::read(path).ok()?;
            Some(hex::encode(Sha256::digest(&content)))
        } else {
            None
        };
        Some((mtime, hash))
    }

    fn entry_is_current(&self, entry: &CacheEntry, path: &str) -> bool {
        let Some((mtime, hash)) = self.fingerprint(path) else {
            // File deleted or unreadable between check and read: a miss
            return false;
        };
        if entry.mtime != mtime {
            return false;
        }
        if self.config.validate_content_hash {
            return entry.content_hash == hash;
        }
        true
    }

    /// Insert or replace an entry, capturing the file's current mtime.
    /// Evicts the least-recently-used entry when over capacity.
    pub fn set(&mut self, path: &str, data: FileSymbolData) {
        let (mtime, content_hash) = self
            .fingerprint(path)
            .unwrap_or((SystemTime::UNIX_EPOCH, None));

        let tick = self.tick();
        self.entries.insert(
            path.to_string(),
            CacheEntry {
                data,
                mtime,
                content_hash,
                access_count: 0,
                last_accessed: tick,
            },
        );

        while self.entries.len() > self.config.capacity {
            let Some(oldest) = self
                .entries
                .iter()
                .min_by_key(|(_, entry)| entry.last_accessed)
                .map(|(key, _)| key.clone())
            else {
                break;
            };
            log::debug!("evicting least-recently-used cache entry {oldest}");
            self.entries.remove(&oldest);
        }
    }

    /// Cached data for an unchanged file. A hit bumps recency; a stale
    /// entry is dropped and counted as a miss.
    pub fn get(&mut self, path: &str) -> Option<&FileSymbolData> {
        let current = match self.entries.get(path) {
            Some(entry) => self.entry_is_current(entry, path),
            None => false,
        };
        if !current {
            self.entries.remove(path);
            self.misses += 1;
            return None;
        }

        self.hits += 1;
        let tick = self.tick();
        let entry = self.entries.get_mut(path)?;
        entry.access_count += 1;
        entry.last_accessed = tick;
        Some(&entry.data)
    }

    /// Same validity check as `get`, without the side effects.
    pub fn is_valid(&self, path: &str) -> bool {
        self.entries
            .get(path)
            .is_some_and(|entry| self.entry_is_current(entry, path))
    }

    pub fn invalidate(&mut self, path: &str) -> bool {
        self.entries.remove(path).is_some()
    }

    pub fn invalidate_all(&mut self) {
        self.entries.clear();
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn statistics(&self) -> CacheStatistics {
        let total = self.hits + self.misses;
        CacheStatistics {
            entries: self.entries.len(),
            hits: self.hits,
            misses: self.misses,
            hit_rate: if total == 0 {
                0.0
            } else {
                self.hits as f64 / total as f64
            },
        }
    }

    /// Write the full entry set to the configured persistence path.
    pub fn persist(&self) -> Result<(), CacheError> {
        let path = self
            .persist_path
            .as_ref()
            .ok_or(CacheError::NoPersistencePath)?;
        self.persist_to(path)
    }

    pub fn persist_to(&self, path: &Path) -> Result<(), CacheError> {
        let persisted = PersistedCache {
            version: PERSIST_FORMAT_VERSION,
            entries: self
                .entries
                .iter()
                .map(|(key, entry)| (key.clone(), entry.clone()))
                .collect(),
        };
        if let Some(parent) = path.parent()
            && !parent.as_os_str().is_empty()
        {
            std::fs::create_dir_all(parent)?;
        }
        std::fs::write(path, serde_json::to_string_pretty(&persisted)?)?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;
    use tempfile::TempDir;

    fn write_file(dir: &TempDir, name: &str, contents: &str) -> String {
        let path = dir.path().join(name);
        fs::write(&path, contents).unwrap();
        path.to_string_lossy().to_string()
    }

    fn data_for(path: &str) -> FileSymbolData {
        FileSymbolData::new(path)
    }

    fn config_with_capacity(capacity: usize) -> CacheConfig {
        CacheConfig {
            capacity,
            ..CacheConfig::default()
        }
    }

    #[test]
    fn test_hit_on_unchanged_file() {
        let dir = TempDir::new().unwrap();
        let path = write_file(&dir, "a.py", "x = 1\n");

        let mut cache = SymbolCache::new(CacheConfig::default());
        cache.set(&path, data_for(&path));
        assert!(cache.get(&path).is_some());

        let stats = cache.statistics();
        assert_eq!(stats.hits, 1);
        assert_eq!(stats.misses, 0);
        assert!((stats.hit_rate - 1.0).abs() < f64::EPSILON);
    }

    #[test]
    fn test_miss_on_absent_entry_and_deleted_file() {
        let dir = TempDir::new().unwrap();
        let path = write_file(&dir, "a.py", "x = 1\n");

        let mut cache = SymbolCache::new(CacheConfig::default());
        assert!(cache.get(&path).is_none());

        cache.set(&path, data_for(&path));
        fs::remove_file(&path).unwrap();
        assert!(cache.get(&path).is_none());

        let stats = cache.statistics();
        assert_eq!(stats.misses, 2);
    }

    #[test]
    fn test_hit_rate_zero_without_accesses() {
        let cache = SymbolCache::new(CacheConfig::default());
        assert_eq!(cache.statistics().hit_rate, 0.0);
    }

    #[test]
    fn test_lru_eviction_order() {
        let dir = TempDir::new().unwrap();
        let paths: Vec<String> = (0..4)
            .map(|i| write_file(&dir, &format!("f{i}.py"), "x = 1\n"))
            .collect();

        let mut cache = SymbolCache::new(config_with_capacity(3));
        cache.set(&paths[0], data_for(&paths[0]));
        cache.set(&paths[1], data_for(&paths[1]));
        cache.set(&paths[2], data_for(&paths[2]));

        // N+1 inserts with no intervening gets: the first insert goes
        cache.set(&paths[3], data_for(&paths[3]));
        assert_eq!(cache.len(), 3);
        assert!(!cache.is_valid(&paths[0]));
        assert!(cache.is_valid(&paths[1]));
    }

    #[test]
    fn test_get_protects_entry_from_eviction() {
        let dir = TempDir::new().unwrap();
        let paths: Vec<String> = (0..4)
            .map(|i| write_file(&dir, &format!("f{i}.py"), "x = 1\n"))
            .collect();

        let mut cache = SymbolCache::new(config_with_capacity(3));
        cache.set(&paths[0], data_for(&paths[0]));
        cache.set(&paths[1], data_for(&paths[1]));
        cache.set(&paths[2], data_for(&paths[2]));

        // Touching entry 0 makes entry 1 the eviction victim instead
        assert!(cache.get(&paths[0]).is_some());
        cache.set(&paths[3], data_for(&paths[3]));

        assert!(cache.is_valid(&paths[0]));
        assert!(!cache.is_valid(&paths[1]));
    }

    #[test]
    fn test_invalidate() {
        let dir = TempDir::new().unwrap();
        let path = write_file(&dir, "a.py", "x = 1\n");

        let mut cache = SymbolCache::new(CacheConfig::default());
        cache.set(&path, data_for(&path));
        assert!(cache.invalidate(&path));
        assert!(!cache.invalidate(&path));
        assert!(cache.is_empty());
    }

    #[test]
    fn test_content_hash_detects_mtime_preserving_change() {
        let dir = TempDir::new().unwrap();
        let path = write_file(&dir, "a.py", "x = 1\n");

        let mut cache = SymbolCache::new(CacheConfig {
            capacity: 16,
            validate_content_hash: true,
        });
        cache.set(&path, data_for(&path));
        assert!(cache.is_valid(&path));

        // Rewrite with different content, then force the old mtime back
        let mtime = fs::metadata(&path).unwrap().modified().unwrap();
        fs::write(&path, "x = 2\n").unwrap();
        let file = fs::File::options().write(true).open(&path).unwrap();
        file.set_modified(mtime).unwrap();
        drop(file);

        assert!(!cache.is_valid(&path));
    }

    #[test]
    fn test_persistence_round_trip() {
        let dir = TempDir::new().unwrap();
        let source = write_file(&dir, "a.py", "def foo():\n    pass\n");
        let cache_path = dir.path().join("symbols.json");

        let mut cache = SymbolCache::with_persistence(&cache_path, CacheConfig::default());
        let mut data = data_for(&source);
        data.definitions.push(crate::analysis::types::SymbolDefinition::new(
            "foo",
            crate::analysis::types::SymbolKind::Function,
            1,
            2,
        ));
        cache.set(&source, data.clone());
        cache.persist().unwrap();

        let mut reloaded = SymbolCache::with_persistence(&cache_path, CacheConfig::default());
        let hit = reloaded.get(&source).expect("unchanged file should hit");
        assert_eq!(hit.definitions, data.definitions);
        assert_eq!(hit.references, data.references);
    }

    #[test]
    fn test_reloaded_cache_misses_on_modified_file() {
        let dir = TempDir::new().unwrap();
        let source = write_file(&dir, "a.py", "x = 1\n");
        let cache_path = dir.path().join("symbols.json");

        let mut cache = SymbolCache::with_persistence(&cache_path, CacheConfig::default());
        cache.set(&source, data_for(&source));
        cache.persist().unwrap();

        // Ensure the mtime actually changes across filesystems with coarse
        // timestamp resolution
        let file = fs::File::options().write(true).open(&source).unwrap();
        file.set_modified(SystemTime::now() + std::time::Duration::from_secs(10))
            .unwrap();
        drop(file);

        let mut reloaded = SymbolCache::with_persistence(&cache_path, CacheConfig::default());
        assert!(reloaded.get(&source).is_none());
    }
}

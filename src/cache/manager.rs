//! Cache manager for persisting response bodies to disk
//!
//! Provides a `CacheManager` that maps a reference string to a file inside the
//! cache directory, and answers whether that file is still fresh for a given TTL.

use chrono::{DateTime, Utc};
use directories::ProjectDirs;
use std::fs;
use std::io::{self, Write};
use std::path::{Path, PathBuf};
use std::time::{Duration, SystemTime};
use tempfile::Builder;
use thiserror::Error;
use tracing::{debug, warn};

/// Errors that can occur while reading or writing the cache
#[derive(Debug, Error)]
pub enum CacheError {
    /// Filesystem operation failed
    #[error("Cache I/O error at {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: io::Error,
    },

    /// No platform cache directory could be determined
    #[error("Could not determine a cache directory (no home directory?)")]
    NoCacheDirectory,

    /// The reference has no ASCII letters or digits to name a file with
    #[error("Cache reference '{0}' contains no letters or digits")]
    EmptyReference(String),
}

impl CacheError {
    fn io(path: &Path, source: io::Error) -> Self {
        Self::Io {
            path: path.to_path_buf(),
            source,
        }
    }
}

/// Metadata about a single cache entry on disk
#[derive(Debug, Clone)]
pub struct CacheEntryInfo {
    /// Location of the cache file
    pub path: PathBuf,
    /// Size of the cached body in bytes
    pub size: u64,
    /// When the entry was last written (file modification time)
    pub written_at: DateTime<Utc>,
    /// Time elapsed since the entry was written
    pub age: Duration,
}

impl CacheEntryInfo {
    /// Whether this entry is still fresh for the given TTL
    pub fn is_fresh(&self, ttl: Duration) -> bool {
        self.age < ttl
    }
}

/// Strips every character that is not an ASCII letter or digit
///
/// Distinct references may sanitize to the same string; they then share a
/// cache file.
pub fn safe_reference(reference: &str) -> String {
    reference
        .chars()
        .filter(|c| c.is_ascii_alphanumeric())
        .collect()
}

/// Manages reading and writing cached responses on disk
///
/// Each reference maps to exactly one file, `cache_dir/<safe reference>`, with an
/// optional extension. A file is fresh while its age is strictly below the TTL,
/// so a TTL of zero treats every entry as stale.
#[derive(Debug, Clone)]
pub struct CacheManager {
    /// Directory where cache files are stored
    cache_dir: PathBuf,
    /// Optional extension appended to every cache file name
    extension: Option<String>,
}

impl CacheManager {
    /// Creates a new CacheManager using the XDG-compliant cache directory
    ///
    /// Uses `~/.cache/cached-request/` on Linux, or the equivalent path on other
    /// platforms.
    pub fn new() -> Result<Self, CacheError> {
        let project_dirs =
            ProjectDirs::from("", "", "cached-request").ok_or(CacheError::NoCacheDirectory)?;
        Ok(Self::with_dir(project_dirs.cache_dir().to_path_buf()))
    }

    /// Creates a new CacheManager with a custom cache directory
    pub fn with_dir(cache_dir: impl Into<PathBuf>) -> Self {
        Self {
            cache_dir: cache_dir.into(),
            extension: None,
        }
    }

    /// Sets the extension appended to cache file names (without the leading dot)
    pub fn with_extension(mut self, extension: impl Into<String>) -> Self {
        let extension = extension.into();
        let extension = extension.trim_start_matches('.');
        self.extension = (!extension.is_empty()).then(|| extension.to_string());
        self
    }

    /// Directory holding the cache files
    pub fn cache_dir(&self) -> &Path {
        &self.cache_dir
    }

    /// Returns the path of the cache file for the given reference
    ///
    /// Fails with [`CacheError::EmptyReference`] if nothing is left after
    /// sanitizing, since the path would then be the cache directory itself.
    pub fn path_for(&self, reference: &str) -> Result<PathBuf, CacheError> {
        let name = safe_reference(reference);
        if name.is_empty() {
            return Err(CacheError::EmptyReference(reference.to_string()));
        }
        Ok(match &self.extension {
            Some(ext) => self.cache_dir.join(format!("{}.{}", name, ext)),
            None => self.cache_dir.join(name),
        })
    }

    /// Ensures the cache directory exists
    fn ensure_dir(&self) -> Result<(), CacheError> {
        fs::create_dir_all(&self.cache_dir).map_err(|e| CacheError::io(&self.cache_dir, e))
    }

    /// Looks up size and modification time of the entry for a reference
    ///
    /// Returns `Ok(None)` if no entry exists.
    pub fn entry_info(&self, reference: &str) -> Result<Option<CacheEntryInfo>, CacheError> {
        let path = self.path_for(reference)?;
        let metadata = match fs::metadata(&path) {
            Ok(metadata) if metadata.is_file() => metadata,
            Ok(_) => return Ok(None),
            Err(e) if e.kind() == io::ErrorKind::NotFound => return Ok(None),
            Err(e) => return Err(CacheError::io(&path, e)),
        };

        let modified = metadata.modified().map_err(|e| CacheError::io(&path, e))?;
        // A modification time in the future counts as just written
        let age = SystemTime::now()
            .duration_since(modified)
            .unwrap_or(Duration::ZERO);

        Ok(Some(CacheEntryInfo {
            path,
            size: metadata.len(),
            written_at: DateTime::<Utc>::from(modified),
            age,
        }))
    }

    /// Checks whether a fresh entry exists for the reference
    ///
    /// # Returns
    /// * `Ok(false)` if the file is missing or `age >= ttl`
    /// * `Ok(true)` otherwise
    /// * `Err` if the file exists but its metadata cannot be read
    pub fn is_fresh(&self, reference: &str, ttl: Duration) -> Result<bool, CacheError> {
        Ok(self
            .entry_info(reference)?
            .is_some_and(|info| info.is_fresh(ttl)))
    }

    /// Reads the cached body for a reference
    pub fn read(&self, reference: &str) -> Result<Vec<u8>, CacheError> {
        let path = self.path_for(reference)?;
        fs::read(&path).map_err(|e| CacheError::io(&path, e))
    }

    /// Writes content to the cache, replacing any previous entry
    ///
    /// The content goes to a uniquely named temporary file in the cache directory
    /// and is then renamed over the final path. Readers never see a partial body,
    /// and concurrent writers of one reference each succeed with the last rename
    /// winning.
    ///
    /// # Arguments
    /// * `reference` - Caller-supplied identifier (e.g., "feed_a")
    /// * `content` - The bytes to store verbatim
    pub fn write(&self, reference: &str, content: &[u8]) -> Result<(), CacheError> {
        let final_path = self.path_for(reference)?;
        self.ensure_dir()?;

        let mut temp = Builder::new()
            .prefix(&format!(".{}.", safe_reference(reference)))
            .suffix(".tmp")
            .tempfile_in(&self.cache_dir)
            .map_err(|e| CacheError::io(&self.cache_dir, e))?;

        // The temporary file is removed on drop if anything below fails
        if let Err(e) = temp.write_all(content) {
            return Err(CacheError::io(temp.path(), e));
        }

        temp.persist(&final_path).map_err(|e| {
            warn!("Failed to move cache file into place: {}", e.error);
            CacheError::io(&final_path, e.error)
        })?;

        debug!(
            "Cached {} bytes for '{}' at {}",
            content.len(),
            reference,
            final_path.display()
        );
        Ok(())
    }

    /// Removes the entry for a reference; does nothing if there is none
    pub fn delete_by_reference(&self, reference: &str) -> Result<(), CacheError> {
        let path = self.path_for(reference)?;
        match fs::remove_file(&path) {
            Ok(()) => {
                debug!("Removed cache entry {}", path.display());
                Ok(())
            }
            Err(e) if e.kind() == io::ErrorKind::NotFound => Ok(()),
            Err(e) => Err(CacheError::io(&path, e)),
        }
    }

    /// Removes every file in the cache directory, leaving the directory itself
    ///
    /// Subdirectories are left alone. A missing cache directory is not an error.
    ///
    /// # Returns
    /// The number of files removed
    pub fn clear_all(&self) -> Result<usize, CacheError> {
        let entries = match fs::read_dir(&self.cache_dir) {
            Ok(entries) => entries,
            Err(e) if e.kind() == io::ErrorKind::NotFound => return Ok(0),
            Err(e) => return Err(CacheError::io(&self.cache_dir, e)),
        };

        let mut removed = 0;
        for entry in entries {
            let entry = entry.map_err(|e| CacheError::io(&self.cache_dir, e))?;
            let path = entry.path();
            let file_type = entry.file_type().map_err(|e| CacheError::io(&path, e))?;
            if file_type.is_dir() {
                continue;
            }
            fs::remove_file(&path).map_err(|e| CacheError::io(&path, e))?;
            removed += 1;
        }

        debug!(
            "Cleared {} cache files from {}",
            removed,
            self.cache_dir.display()
        );
        Ok(removed)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::thread;
    use tempfile::TempDir;

    const HOUR: Duration = Duration::from_secs(3600);

    fn create_test_cache() -> (CacheManager, TempDir) {
        let temp_dir = TempDir::new().expect("Failed to create temp directory");
        let cache = CacheManager::with_dir(temp_dir.path());
        (cache, temp_dir)
    }

    #[test]
    fn test_safe_reference_strips_symbols() {
        assert_eq!(safe_reference("#$i am ^&a bad ()@##name"), "iamabadname");
        assert_eq!(safe_reference("unreached_people"), "unreachedpeople");
        assert_eq!(safe_reference("Feed42"), "Feed42");
        assert_eq!(safe_reference("../../etc/passwd"), "etcpasswd");
    }

    #[test]
    fn test_path_for_is_deterministic() {
        let (cache, temp_dir) = create_test_cache();

        let first = cache.path_for("feed_a").unwrap();
        let second = cache.path_for("feed_a").unwrap();

        assert_eq!(first, second);
        assert_eq!(first, temp_dir.path().join("feeda"));
    }

    #[test]
    fn test_path_for_contains_sanitized_reference() {
        let (cache, _temp_dir) = create_test_cache();
        let path = cache.path_for("#$i am ^&a bad ()@##name").unwrap();
        assert_eq!(path.file_name().unwrap(), "iamabadname");
    }

    #[test]
    fn test_path_for_with_extension() {
        let (cache, temp_dir) = create_test_cache();
        let cache = cache.with_extension(".xml");
        assert_eq!(
            cache.path_for("feed_a").unwrap(),
            temp_dir.path().join("feeda.xml")
        );
    }

    #[test]
    fn test_colliding_references_share_a_file() {
        let (cache, _temp_dir) = create_test_cache();

        cache.write("feed-a", b"first").unwrap();
        cache.write("feed_a", b"second").unwrap();

        assert_eq!(
            cache.path_for("feed-a").unwrap(),
            cache.path_for("feed_a").unwrap()
        );
        assert_eq!(cache.read("feed-a").unwrap(), b"second");
    }

    #[test]
    fn test_is_fresh_false_for_missing_entry() {
        let (cache, _temp_dir) = create_test_cache();
        assert!(!cache.is_fresh("i_am_an_uncached_file", HOUR).unwrap());
    }

    #[test]
    fn test_is_fresh_true_for_recent_entry() {
        let (cache, _temp_dir) = create_test_cache();
        cache.write("i_am_a_cached_file", b"").unwrap();
        assert!(cache.is_fresh("i_am_a_cached_file", HOUR).unwrap());
    }

    #[test]
    fn test_is_fresh_false_with_zero_ttl() {
        let (cache, _temp_dir) = create_test_cache();
        cache.write("i_am_an_outdated_cache_file", b"old").unwrap();

        // Zero TTL is stale even without waiting
        assert!(!cache.is_fresh("i_am_an_outdated_cache_file", Duration::ZERO).unwrap());

        thread::sleep(Duration::from_millis(1100));
        assert!(!cache.is_fresh("i_am_an_outdated_cache_file", Duration::ZERO).unwrap());
    }

    #[test]
    fn test_is_fresh_false_once_ttl_elapsed() {
        let (cache, _temp_dir) = create_test_cache();
        cache.write("short_lived", b"data").unwrap();

        thread::sleep(Duration::from_millis(60));

        assert!(!cache.is_fresh("short_lived", Duration::from_millis(50)).unwrap());
        assert!(cache.is_fresh("short_lived", HOUR).unwrap());
    }

    #[test]
    fn test_write_then_read_returns_content() {
        let (cache, _temp_dir) = create_test_cache();
        cache
            .write("giant_smashing_robots_again", b"Here is some content.")
            .unwrap();

        assert_eq!(
            cache.read("giant_smashing_robots_again").unwrap(),
            b"Here is some content."
        );
    }

    #[test]
    fn test_write_twice_with_same_content_is_idempotent() {
        let (cache, _temp_dir) = create_test_cache();

        cache.write("feed", b"X").unwrap();
        cache.write("feed", b"X").unwrap();

        assert!(cache.is_fresh("feed", HOUR).unwrap());
        assert_eq!(cache.read("feed").unwrap(), b"X");
    }

    #[test]
    fn test_write_truncates_previous_content() {
        let (cache, _temp_dir) = create_test_cache();

        cache.write("feed", b"a much longer first body").unwrap();
        cache.write("feed", b"short").unwrap();

        assert_eq!(cache.read("feed").unwrap(), b"short");
    }

    #[test]
    fn test_write_creates_directory_if_missing() {
        let temp_dir = TempDir::new().expect("Failed to create temp directory");
        let nested_path = temp_dir.path().join("nested").join("cache").join("dir");
        let cache = CacheManager::with_dir(nested_path.clone());

        cache.write("nested_key", b"nested").unwrap();

        assert!(nested_path.exists(), "Nested directory should be created");
        assert!(nested_path.join("nestedkey").exists(), "Cache file should exist");
    }

    #[test]
    fn test_write_leaves_no_temporary_files() {
        let (cache, temp_dir) = create_test_cache();
        cache.write("feed", b"body").unwrap();

        let names: Vec<_> = fs::read_dir(temp_dir.path())
            .unwrap()
            .map(|e| e.unwrap().file_name())
            .collect();
        assert_eq!(names, vec![std::ffi::OsString::from("feed")]);
    }

    #[test]
    fn test_read_missing_entry_is_an_error() {
        let (cache, _temp_dir) = create_test_cache();
        let err = cache.read("missing").unwrap_err();
        assert!(matches!(
            err,
            CacheError::Io { ref source, .. } if source.kind() == io::ErrorKind::NotFound
        ));
    }

    #[test]
    fn test_delete_by_reference_removes_file() {
        let (cache, _temp_dir) = create_test_cache();
        cache.write("unreached_people", b"data").unwrap();

        cache.delete_by_reference("unreached_people").unwrap();

        assert!(!cache.path_for("unreached_people").unwrap().exists());
        assert!(!cache.is_fresh("unreached_people", HOUR).unwrap());
    }

    #[test]
    fn test_delete_by_reference_missing_is_noop() {
        let (cache, _temp_dir) = create_test_cache();
        cache.delete_by_reference("never_written").unwrap();
    }

    #[test]
    fn test_clear_all_empties_directory() {
        let (cache, temp_dir) = create_test_cache();
        cache.write("new_file", b"1").unwrap();
        cache.write("another_file", b"2").unwrap();
        fs::create_dir(temp_dir.path().join("keep")).unwrap();

        let removed = cache.clear_all().unwrap();

        assert_eq!(removed, 2);
        assert!(temp_dir.path().exists(), "Cache directory should remain");
        assert!(temp_dir.path().join("keep").exists());
        assert!(!cache.is_fresh("new_file", HOUR).unwrap());
        assert!(!cache.is_fresh("another_file", HOUR).unwrap());
    }

    #[test]
    fn test_clear_all_missing_directory_is_noop() {
        let temp_dir = TempDir::new().unwrap();
        let cache = CacheManager::with_dir(temp_dir.path().join("absent"));
        assert_eq!(cache.clear_all().unwrap(), 0);
    }

    #[test]
    fn test_entry_info_reports_size_and_time() {
        let (cache, _temp_dir) = create_test_cache();
        let before = Utc::now() - chrono::Duration::seconds(2);
        cache.write("info", b"12345").unwrap();

        let info = cache.entry_info("info").unwrap().expect("entry should exist");

        assert_eq!(info.size, 5);
        assert!(info.written_at >= before);
        assert!(info.age < HOUR);
        assert!(cache.entry_info("nope").unwrap().is_none());
    }

    #[test]
    fn test_reference_without_alphanumerics_is_rejected() {
        let (cache, temp_dir) = create_test_cache();

        for reference in ["", "!!!", "_-/"] {
            assert!(matches!(
                cache.path_for(reference),
                Err(CacheError::EmptyReference(ref r)) if r == reference
            ));
            assert!(cache.is_fresh(reference, HOUR).is_err());
            assert!(cache.read(reference).is_err());
            assert!(matches!(
                cache.write(reference, b"body"),
                Err(CacheError::EmptyReference(_))
            ));
            assert!(matches!(
                cache.delete_by_reference(reference),
                Err(CacheError::EmptyReference(_))
            ));
        }

        assert!(temp_dir.path().exists(), "Cache directory should remain");
        assert_eq!(fs::read_dir(temp_dir.path()).unwrap().count(), 0);
    }

    #[test]
    fn test_concurrent_writes_to_same_reference_all_succeed() {
        let (cache, temp_dir) = create_test_cache();
        let bodies: Vec<Vec<u8>> = (0..4u8).map(|i| vec![b'a' + i; 1 << 20]).collect();

        for _ in 0..5 {
            let results: Vec<_> = thread::scope(|scope| {
                let handles: Vec<_> = bodies
                    .iter()
                    .map(|body| {
                        let cache = &cache;
                        scope.spawn(move || cache.write("feed_a", body))
                    })
                    .collect();
                handles.into_iter().map(|h| h.join().unwrap()).collect()
            });

            for result in results {
                assert!(result.is_ok(), "write failed: {:?}", result);
            }
            let stored = cache.read("feed_a").unwrap();
            assert!(bodies.contains(&stored), "cache entry is a mix of writes");
        }

        let names: Vec<_> = fs::read_dir(temp_dir.path())
            .unwrap()
            .map(|e| e.unwrap().file_name())
            .collect();
        assert_eq!(names, vec![std::ffi::OsString::from("feeda")]);
    }

    #[test]
    fn test_new_creates_xdg_compliant_path() {
        if let Ok(cache) = CacheManager::new() {
            let path_str = cache.cache_dir.to_string_lossy();
            assert!(
                path_str.contains("cached-request"),
                "Cache path should contain project name"
            );
        }
        // Test passes if new() fails (e.g., no home directory in CI)
    }
}

//! Durable cache of prior check results.
//!
//! The backing store is an append-only text file, one entry per line:
//!
//! ```text
//! <service>|<username>|<statusCode>[|<unixTimestampSeconds>]
//! ```
//!
//! Appends always write the four-field form. The three-field form is a
//! leftover from before entries carried timestamps; such lines are still
//! read, and never expire. Append-only plus a linear scan on read keeps
//! writes crash-safe: a torn write can at most lose the final line, never
//! corrupt the ones before it.

use std::collections::HashMap;
use std::fs::OpenOptions;
use std::io::{self, BufRead, BufReader, Write};
use std::path::{Path, PathBuf};
use std::sync::Mutex;
use std::time::{Duration, SystemTime, UNIX_EPOCH};

use thiserror::Error;

use crate::check::Status;

/// How long a timestamped entry stays valid.
pub const ENTRY_TTL: Duration = Duration::from_secs(7 * 24 * 60 * 60);

/// Failure while loading or appending to the backing file.
///
/// A single malformed line fails the whole load; the caller decides
/// whether to abort or carry on with an empty cache.
#[derive(Debug, Error)]
pub enum CacheError {
    /// The backing file could not be opened, read, or written.
    #[error("cache file {path}: {source}")]
    Io {
        /// Path of the backing file.
        path: PathBuf,
        /// The underlying I/O error.
        #[source]
        source: io::Error,
    },
    /// A line does not match `service|username|status[|timestamp]`.
    #[error("malformed line in cache file {path}: {reason}: `{line}`")]
    MalformedLine {
        /// Path of the backing file.
        path: PathBuf,
        /// The offending line, verbatim.
        line: String,
        /// What was wrong with it.
        reason: &'static str,
    },
}

/// One recorded check result.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Entry {
    /// Which service the result pertains to.
    pub service: String,
    /// The checked username.
    pub username: String,
    /// The recorded classification.
    pub status: Status,
    /// Unix seconds of the check; `None` for legacy lines, which never
    /// expire.
    pub observed_at: Option<u64>,
}

impl Entry {
    fn parse(path: &Path, line: &str) -> Result<Self, CacheError> {
        let malformed = |reason| CacheError::MalformedLine {
            path: path.to_path_buf(),
            line: line.to_string(),
            reason,
        };

        let fields: Vec<&str> = line.split('|').collect();
        if fields.len() != 3 && fields.len() != 4 {
            return Err(malformed("expected 3 or 4 pipe-delimited fields"));
        }

        let code: u8 = fields[2]
            .parse()
            .map_err(|_| malformed("status is not a number"))?;
        let status = Status::from_code(code).ok_or_else(|| malformed("status code out of range"))?;

        let observed_at = match fields.get(3) {
            Some(raw) => Some(
                raw.parse::<u64>()
                    .map_err(|_| malformed("timestamp is not a number"))?,
            ),
            None => None,
        };

        Ok(Self {
            service: fields[0].to_string(),
            username: fields[1].to_string(),
            status,
            observed_at,
        })
    }

    fn to_line(&self) -> String {
        match self.observed_at {
            Some(ts) => format!(
                "{}|{}|{}|{}",
                self.service,
                self.username,
                self.status.code(),
                ts
            ),
            None => format!("{}|{}|{}", self.service, self.username, self.status.code()),
        }
    }

    fn is_expired(&self, now: u64) -> bool {
        match self.observed_at {
            Some(ts) => ts.saturating_add(ENTRY_TTL.as_secs()) < now,
            None => false,
        }
    }
}

/// A store of prior check results, shared across workers.
///
/// `get` answers [`Status::Unknown`] for anything it does not hold, and
/// `put` silently ignores [`Status::Unknown`], so the cache never caches
/// ignorance. Both operations are infallible from the pool's point of
/// view: a broken store degrades to always-miss, it never stops a check.
pub trait Cache: Send + Sync {
    /// Most recent non-expired classification for the pair, or
    /// [`Status::Unknown`] if there is none.
    fn get(&self, service: &str, username: &str) -> Status;

    /// Record a determinate classification for the pair.
    fn put(&self, service: &str, username: &str, status: Status);
}

/// The durable, file-backed [`Cache`].
///
/// All access to the backing file goes through one store-wide lock:
/// reads hold it for the load, writes for the append. Lookups rescan
/// the file on every call; the pipeline's bottleneck is the network,
/// not the cache scan.
#[derive(Debug)]
pub struct FileCache {
    path: PathBuf,
    lock: Mutex<()>,
}

impl FileCache {
    /// Create a store backed by `path`. The file is only created once
    /// the first entry is appended.
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self {
            path: path.into(),
            lock: Mutex::new(()),
        }
    }

    /// Read every entry from the backing file, oldest first.
    ///
    /// A missing file is an empty cache, not an error.
    ///
    /// # Errors
    ///
    /// [`CacheError::Io`] if the file exists but cannot be read, or
    /// [`CacheError::MalformedLine`] for the first line that does not
    /// parse. No entries are returned from a file with a bad line.
    pub fn load(&self) -> Result<Vec<Entry>, CacheError> {
        let _guard = self.lock.lock().unwrap_or_else(|e| e.into_inner());

        let file = match OpenOptions::new().read(true).open(&self.path) {
            Ok(file) => file,
            Err(err) if err.kind() == io::ErrorKind::NotFound => return Ok(Vec::new()),
            Err(err) => {
                return Err(CacheError::Io {
                    path: self.path.clone(),
                    source: err,
                });
            }
        };

        let mut entries = Vec::new();
        for line in BufReader::new(file).lines() {
            let line = line.map_err(|err| CacheError::Io {
                path: self.path.clone(),
                source: err,
            })?;
            entries.push(Entry::parse(&self.path, &line)?);
        }
        Ok(entries)
    }

    fn append(&self, entry: &Entry) -> Result<(), CacheError> {
        let _guard = self.lock.lock().unwrap_or_else(|e| e.into_inner());

        let io_err = |err| CacheError::Io {
            path: self.path.clone(),
            source: err,
        };
        let mut file = OpenOptions::new()
            .append(true)
            .create(true)
            .open(&self.path)
            .map_err(io_err)?;
        writeln!(file, "{}", entry.to_line()).map_err(io_err)
    }
}

impl Cache for FileCache {
    fn get(&self, service: &str, username: &str) -> Status {
        let entries = match self.load() {
            Ok(entries) => entries,
            Err(err) => {
                tracing::error!(error = %err, "cache read failed, treating cache as empty");
                return Status::Unknown;
            }
        };

        let now = unix_now();
        // Last write wins: scan newest-first for the pair.
        entries
            .iter()
            .rev()
            .find(|e| e.service == service && e.username == username && !e.is_expired(now))
            .map_or(Status::Unknown, |e| e.status)
    }

    fn put(&self, service: &str, username: &str, status: Status) {
        if status == Status::Unknown {
            return;
        }
        let entry = Entry {
            service: service.to_string(),
            username: username.to_string(),
            status,
            observed_at: Some(unix_now()),
        };
        if let Err(err) = self.append(&entry) {
            tracing::error!(error = %err, "cache append failed, dropping entry");
        }
    }
}

/// An in-memory [`Cache`] holding results for the lifetime of the
/// process. Useful as a stand-in for [`FileCache`] when persistence is
/// unwanted, and as a test double for the pool.
#[derive(Debug, Default)]
pub struct MemoryCache {
    entries: Mutex<HashMap<(String, String), Status>>,
}

impl MemoryCache {
    /// Create an empty store.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }
}

impl Cache for MemoryCache {
    fn get(&self, service: &str, username: &str) -> Status {
        let entries = self.entries.lock().unwrap_or_else(|e| e.into_inner());
        entries
            .get(&(service.to_string(), username.to_string()))
            .copied()
            .unwrap_or(Status::Unknown)
    }

    fn put(&self, service: &str, username: &str, status: Status) {
        if status == Status::Unknown {
            return;
        }
        let mut entries = self.entries.lock().unwrap_or_else(|e| e.into_inner());
        entries.insert((service.to_string(), username.to_string()), status);
    }
}

fn unix_now() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map_or(0, |d| d.as_secs())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn file_cache(dir: &tempfile::TempDir) -> FileCache {
        FileCache::new(dir.path().join("cache.txt"))
    }

    #[test]
    fn get_on_missing_file_is_unknown() {
        let dir = tempfile::tempdir().unwrap();
        let cache = file_cache(&dir);
        assert_eq!(cache.get("github", "alice"), Status::Unknown);
    }

    #[test]
    fn put_then_get_round_trips() {
        let dir = tempfile::tempdir().unwrap();
        let cache = file_cache(&dir);
        cache.put("github", "alice", Status::Unavailable);
        assert_eq!(cache.get("github", "alice"), Status::Unavailable);
    }

    #[test]
    fn lookup_is_exact_on_both_fields() {
        let dir = tempfile::tempdir().unwrap();
        let cache = file_cache(&dir);
        cache.put("github", "alice", Status::Unavailable);
        assert_eq!(cache.get("gitlab", "alice"), Status::Unknown);
        assert_eq!(cache.get("github", "alicia"), Status::Unknown);
    }

    #[test]
    fn unknown_is_never_persisted() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("cache.txt");
        let cache = FileCache::new(&path);
        cache.put("github", "alice", Status::Unknown);
        assert_eq!(cache.get("github", "alice"), Status::Unknown);
        assert!(!path.exists(), "no-op put must not create the file");
    }

    #[test]
    fn last_write_wins() {
        let dir = tempfile::tempdir().unwrap();
        let cache = file_cache(&dir);
        cache.put("github", "alice", Status::Unavailable);
        cache.put("github", "alice", Status::Available);
        assert_eq!(cache.get("github", "alice"), Status::Available);
    }

    #[test]
    fn expired_entry_is_not_returned() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("cache.txt");
        let eight_days_ago = unix_now() - 8 * 24 * 60 * 60;
        std::fs::write(&path, format!("github|alice|0|{eight_days_ago}\n")).unwrap();
        let cache = FileCache::new(&path);
        assert_eq!(cache.get("github", "alice"), Status::Unknown);
    }

    #[test]
    fn fresh_entry_is_returned() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("cache.txt");
        let six_days_ago = unix_now() - 6 * 24 * 60 * 60;
        std::fs::write(&path, format!("github|alice|0|{six_days_ago}\n")).unwrap();
        let cache = FileCache::new(&path);
        assert_eq!(cache.get("github", "alice"), Status::Unavailable);
    }

    #[test]
    fn legacy_three_field_entry_never_expires() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("cache.txt");
        std::fs::write(&path, "github|alice|0\n").unwrap();
        let cache = FileCache::new(&path);
        assert_eq!(cache.get("github", "alice"), Status::Unavailable);
    }

    #[test]
    fn expired_entry_shadows_nothing() {
        // An expired rewrite does not hide an older never-expiring line.
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("cache.txt");
        let long_ago = 1_000_000;
        std::fs::write(&path, format!("github|alice|0\ngithub|alice|1|{long_ago}\n")).unwrap();
        let cache = FileCache::new(&path);
        assert_eq!(cache.get("github", "alice"), Status::Unavailable);
    }

    #[test]
    fn appends_preserve_existing_lines() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("cache.txt");
        let cache = FileCache::new(&path);
        cache.put("github", "alice", Status::Unavailable);
        cache.put("gitlab", "bob", Status::Available);
        let contents = std::fs::read_to_string(&path).unwrap();
        let lines: Vec<&str> = contents.lines().collect();
        assert_eq!(lines.len(), 2);
        assert!(lines[0].starts_with("github|alice|0|"));
        assert!(lines[1].starts_with("gitlab|bob|1|"));
    }

    #[test]
    fn wrong_field_count_fails_load() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("cache.txt");
        std::fs::write(&path, "github|alice\n").unwrap();
        let cache = FileCache::new(&path);
        match cache.load() {
            Err(CacheError::MalformedLine { line, reason, .. }) => {
                assert_eq!(line, "github|alice");
                assert!(reason.contains("fields"), "reason: {reason}");
            }
            other => panic!("expected MalformedLine, got {other:?}"),
        }
    }

    #[test]
    fn non_numeric_status_fails_load() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("cache.txt");
        std::fs::write(&path, "github|alice|free\n").unwrap();
        let cache = FileCache::new(&path);
        match cache.load() {
            Err(CacheError::MalformedLine { reason, .. }) => {
                assert_eq!(reason, "status is not a number");
            }
            other => panic!("expected MalformedLine, got {other:?}"),
        }
    }

    #[test]
    fn out_of_range_status_fails_load() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("cache.txt");
        std::fs::write(&path, "github|alice|4\n").unwrap();
        let cache = FileCache::new(&path);
        match cache.load() {
            Err(CacheError::MalformedLine { reason, .. }) => {
                assert_eq!(reason, "status code out of range");
            }
            other => panic!("expected MalformedLine, got {other:?}"),
        }
    }

    #[test]
    fn non_numeric_timestamp_fails_load() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("cache.txt");
        std::fs::write(&path, "github|alice|0|yesterday\n").unwrap();
        let cache = FileCache::new(&path);
        match cache.load() {
            Err(CacheError::MalformedLine { reason, .. }) => {
                assert_eq!(reason, "timestamp is not a number");
            }
            other => panic!("expected MalformedLine, got {other:?}"),
        }
    }

    #[test]
    fn load_error_names_the_file_and_line() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("cache.txt");
        std::fs::write(&path, "github|alice|0\nbroken line\n").unwrap();
        let cache = FileCache::new(&path);
        let err = cache.load().unwrap_err();
        let message = err.to_string();
        assert!(message.contains("cache.txt"), "message: {message}");
        assert!(message.contains("broken line"), "message: {message}");
    }

    #[test]
    fn malformed_file_degrades_get_to_miss() {
        // One bad line poisons the load, but get must still answer.
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("cache.txt");
        std::fs::write(&path, "github|alice|0\nbroken\n").unwrap();
        let cache = FileCache::new(&path);
        assert_eq!(cache.get("github", "alice"), Status::Unknown);
    }

    #[test]
    fn unreadable_store_degrades_get_to_miss() {
        // A directory at the cache path cannot be read as a file.
        let dir = tempfile::tempdir().unwrap();
        let cache = FileCache::new(dir.path());
        assert_eq!(cache.get("github", "alice"), Status::Unknown);
    }

    #[test]
    fn memory_cache_round_trips() {
        let cache = MemoryCache::new();
        cache.put("github", "alice", Status::Available);
        assert_eq!(cache.get("github", "alice"), Status::Available);
        assert_eq!(cache.get("github", "bob"), Status::Unknown);
    }

    #[test]
    fn memory_cache_never_stores_unknown() {
        let cache = MemoryCache::new();
        cache.put("github", "alice", Status::Available);
        cache.put("github", "alice", Status::Unknown);
        assert_eq!(cache.get("github", "alice"), Status::Available);
    }

    #[test]
    fn file_cache_is_send_sync() {
        fn assert_normal<T: Sized + Send + Sync>() {}
        assert_normal::<FileCache>();
        assert_normal::<MemoryCache>();
    }

    // Property-based tests
    mod prop {
        use super::*;
        use proptest::prelude::*;

        fn arb_status() -> impl Strategy<Value = Status> {
            prop_oneof![
                Just(Status::Unavailable),
                Just(Status::Available),
                Just(Status::Invalid),
                Just(Status::Unknown),
            ]
        }

        proptest! {
            // After any sequence of puts for one pair, get answers the
            // last determinate status, because Unknown puts are no-ops.
            #[test]
            fn get_returns_last_determinate_put(statuses in proptest::collection::vec(arb_status(), 1..12)) {
                let dir = tempfile::tempdir().unwrap();
                let cache = FileCache::new(dir.path().join("cache.txt"));
                for status in &statuses {
                    cache.put("github", "alice", *status);
                }
                let expected = statuses
                    .iter()
                    .rev()
                    .copied()
                    .find(|s| *s != Status::Unknown)
                    .unwrap_or(Status::Unknown);
                prop_assert_eq!(cache.get("github", "alice"), expected);
            }

            #[test]
            fn every_appended_line_parses_back(
                service in "[a-z]{2,10}",
                username in "[a-zA-Z0-9]{1,20}",
            ) {
                let dir = tempfile::tempdir().unwrap();
                let path = dir.path().join("cache.txt");
                let cache = FileCache::new(&path);
                cache.put(&service, &username, Status::Available);
                let entries = cache.load().unwrap();
                prop_assert_eq!(entries.len(), 1);
                prop_assert_eq!(&entries[0].service, &service);
                prop_assert_eq!(&entries[0].username, &username);
                prop_assert_eq!(entries[0].status, Status::Available);
                prop_assert!(entries[0].observed_at.is_some());
            }
        }
    }
}

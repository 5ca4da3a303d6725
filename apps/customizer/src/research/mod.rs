//! Research Cache: durable store of company research, one JSON record per company.
//!
//! Records live under a single root directory. Keys are normalized company names
//! (trimmed, lowercased, inner whitespace collapsed) and are encoded into file names so
//! that any company name maps to exactly one file. Writes go to a temporary file in the
//! same directory and are renamed over the canonical name only once fully flushed, so a
//! crash mid-write leaves the previous record (or none) in place.
//!
//! No locking: concurrent runs against one directory are last-writer-wins.
//!
//! The methods are synchronous file I/O. Async callers use the `*_async` variants, which
//! run the same operation via `tokio::task::spawn_blocking`.

pub mod handlers;

use std::fs;
use std::io::{self, Write};
use std::path::{Path, PathBuf};
use std::sync::Arc;

use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};
use tempfile::{Builder, NamedTempFile};
use thiserror::Error;
use tokio::task::JoinError;
use tracing::{debug, info, warn};

const RECORD_EXTENSION: &str = "json";
const STAGING_PREFIX: &str = ".research-";
const STAGING_SUFFIX: &str = ".partial";

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ResearchRecord {
    pub company_key: String,
    pub content: String,
    pub created_at: DateTime<Utc>,
}

/// Listing row for operators: which companies are cached and since when.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct CachedCompany {
    pub company_key: String,
    pub created_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Serialize)]
pub struct ClearFailure {
    pub path: PathBuf,
    pub error: String,
}

/// Outcome of `clear_all`: removal continues past individual failures.
#[derive(Debug, Clone, Default, Serialize)]
pub struct ClearReport {
    pub removed: usize,
    /// Staging files left behind by writes that never completed.
    pub staging_removed: usize,
    pub failures: Vec<ClearFailure>,
}

#[derive(Debug, Error)]
pub enum CacheIoError {
    #[error("company name is empty")]
    EmptyKey,

    #[error("cannot prepare cache directory {}: {source}", path.display())]
    Directory { path: PathBuf, source: io::Error },

    #[error("cannot read research record {}: {source}", path.display())]
    Read { path: PathBuf, source: io::Error },

    #[error("research record {} is corrupt: {source}", path.display())]
    Corrupt {
        path: PathBuf,
        source: serde_json::Error,
    },

    #[error("cannot write research record {}: {source}", path.display())]
    Write { path: PathBuf, source: io::Error },

    #[error("research cache task failed: {0}")]
    Task(#[from] JoinError),
}

/// Normalizes a company name into its cache key.
pub fn normalize_key(company: &str) -> String {
    company
        .split_whitespace()
        .collect::<Vec<_>>()
        .join(" ")
        .to_lowercase()
}

/// Encodes a normalized key as a file stem. Lowercase ASCII letters, digits and `-` pass
/// through; every other byte (including `_`) becomes `_xx`, so the mapping is injective.
fn encode_file_stem(key: &str) -> String {
    let mut stem = String::with_capacity(key.len());
    for byte in key.bytes() {
        match byte {
            b'a'..=b'z' | b'0'..=b'9' | b'-' => stem.push(byte as char),
            other => stem.push_str(&format!("_{other:02x}")),
        }
    }
    stem
}

pub struct ResearchCache {
    root: PathBuf,
}

impl ResearchCache {
    /// Opens (creating if needed) a cache rooted at `root`.
    pub fn open(root: impl Into<PathBuf>) -> Result<Self, CacheIoError> {
        let root = root.into();
        fs::create_dir_all(&root).map_err(|source| CacheIoError::Directory {
            path: root.clone(),
            source,
        })?;
        Ok(Self { root })
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    fn record_path(&self, key: &str) -> PathBuf {
        self.root
            .join(format!("{}.{RECORD_EXTENSION}", encode_file_stem(key)))
    }

    /// Returns the record for `company` if it is at most `ttl` old.
    ///
    /// Expired records are left on disk and still show up in [`ResearchCache::list`].
    pub fn get(&self, company: &str, ttl: Duration) -> Result<Option<ResearchRecord>, CacheIoError> {
        self.get_at(company, ttl, Utc::now())
    }

    pub fn get_at(
        &self,
        company: &str,
        ttl: Duration,
        now: DateTime<Utc>,
    ) -> Result<Option<ResearchRecord>, CacheIoError> {
        let key = normalize_key(company);
        if key.is_empty() {
            return Err(CacheIoError::EmptyKey);
        }

        let Some(record) = self.read_record(&self.record_path(&key))? else {
            debug!("No cached research for '{key}'");
            return Ok(None);
        };

        let age = now.signed_duration_since(record.created_at);
        if age <= ttl {
            debug!("Cached research for '{key}' is fresh ({}s old)", age.num_seconds());
            Ok(Some(record))
        } else {
            info!(
                "Cached research for '{key}' expired ({} days old, ttl {} days)",
                age.num_days(),
                ttl.num_days()
            );
            Ok(None)
        }
    }

    /// Stores research for `company`, replacing any previous record.
    pub fn put(&self, company: &str, content: &str) -> Result<ResearchRecord, CacheIoError> {
        self.put_at(company, content, Utc::now())
    }

    pub fn put_at(
        &self,
        company: &str,
        content: &str,
        created_at: DateTime<Utc>,
    ) -> Result<ResearchRecord, CacheIoError> {
        let key = normalize_key(company);
        if key.is_empty() {
            return Err(CacheIoError::EmptyKey);
        }

        let record = ResearchRecord {
            company_key: key,
            content: content.to_string(),
            created_at,
        };
        let path = self.record_path(&record.company_key);
        let staged = self.stage(&record, &path)?;
        self.promote(staged, &path)?;

        info!("Cached research for '{}'", record.company_key);
        Ok(record)
    }

    /// Writes the record to a temporary file next to its final location.
    fn stage(&self, record: &ResearchRecord, path: &Path) -> Result<NamedTempFile, CacheIoError> {
        let write_err = |source| CacheIoError::Write {
            path: path.to_path_buf(),
            source,
        };

        let mut staged = Builder::new()
            .prefix(STAGING_PREFIX)
            .suffix(STAGING_SUFFIX)
            .tempfile_in(&self.root)
            .map_err(write_err)?;

        let body = serde_json::to_vec_pretty(record)
            .map_err(|e| write_err(io::Error::new(io::ErrorKind::InvalidData, e)))?;
        staged.write_all(&body).map_err(write_err)?;
        staged.as_file().sync_all().map_err(write_err)?;

        Ok(staged)
    }

    /// Atomically renames a staged record over the canonical path.
    fn promote(&self, staged: NamedTempFile, path: &Path) -> Result<(), CacheIoError> {
        staged.persist(path).map_err(|e| CacheIoError::Write {
            path: path.to_path_buf(),
            source: e.error,
        })?;
        Ok(())
    }

    fn read_record(&self, path: &Path) -> Result<Option<ResearchRecord>, CacheIoError> {
        let bytes = match fs::read(path) {
            Ok(bytes) => bytes,
            Err(e) if e.kind() == io::ErrorKind::NotFound => return Ok(None),
            Err(source) => {
                return Err(CacheIoError::Read {
                    path: path.to_path_buf(),
                    source,
                })
            }
        };
        serde_json::from_slice(&bytes)
            .map(Some)
            .map_err(|source| CacheIoError::Corrupt {
                path: path.to_path_buf(),
                source,
            })
    }

    fn files_where(&self, keep: impl Fn(&Path) -> bool) -> Result<Vec<PathBuf>, CacheIoError> {
        let entries = match fs::read_dir(&self.root) {
            Ok(entries) => entries,
            Err(e) if e.kind() == io::ErrorKind::NotFound => return Ok(Vec::new()),
            Err(source) => {
                return Err(CacheIoError::Read {
                    path: self.root.clone(),
                    source,
                })
            }
        };

        Ok(entries
            .filter_map(Result::ok)
            .map(|entry| entry.path())
            .filter(|path| path.is_file() && keep(path))
            .collect())
    }

    fn record_files(&self) -> Result<Vec<PathBuf>, CacheIoError> {
        self.files_where(|path| {
            path.extension().and_then(|e| e.to_str()) == Some(RECORD_EXTENSION)
        })
    }

    fn staging_files(&self) -> Result<Vec<PathBuf>, CacheIoError> {
        self.files_where(|path| {
            path.file_name()
                .and_then(|name| name.to_str())
                .is_some_and(|name| {
                    name.starts_with(STAGING_PREFIX) && name.ends_with(STAGING_SUFFIX)
                })
        })
    }

    /// Lists every persisted record, expired or not, sorted by company key.
    pub fn list(&self) -> Result<Vec<CachedCompany>, CacheIoError> {
        let mut companies = Vec::new();
        for path in self.record_files()? {
            match self.read_record(&path) {
                Ok(Some(record)) => companies.push(CachedCompany {
                    company_key: record.company_key,
                    created_at: record.created_at,
                }),
                Ok(None) => {}
                Err(e) => warn!("Skipping unreadable research record: {e}"),
            }
        }
        companies.sort_by(|a, b| a.company_key.cmp(&b.company_key));
        Ok(companies)
    }

    /// Deletes every persisted record and any staging file left by an interrupted write,
    /// continuing past files that cannot be removed.
    pub fn clear_all(&self) -> Result<ClearReport, CacheIoError> {
        let mut report = ClearReport::default();
        for path in self.record_files()? {
            if remove_reporting(path, &mut report.failures) {
                report.removed += 1;
            }
        }
        for path in self.staging_files()? {
            if remove_reporting(path, &mut report.failures) {
                report.staging_removed += 1;
            }
        }
        info!(
            "Cleared research cache: {} removed, {} staging files removed, {} failed",
            report.removed,
            report.staging_removed,
            report.failures.len()
        );
        Ok(report)
    }

    /// [`ResearchCache::get`] on the blocking pool.
    pub async fn get_async(
        self: &Arc<Self>,
        company: &str,
        ttl: Duration,
    ) -> Result<Option<ResearchRecord>, CacheIoError> {
        let company = company.to_string();
        self.blocking(move |cache| cache.get(&company, ttl)).await
    }

    /// [`ResearchCache::put`] on the blocking pool.
    pub async fn put_async(
        self: &Arc<Self>,
        company: &str,
        content: &str,
    ) -> Result<ResearchRecord, CacheIoError> {
        let company = company.to_string();
        let content = content.to_string();
        self.blocking(move |cache| cache.put(&company, &content)).await
    }

    /// [`ResearchCache::list`] on the blocking pool.
    pub async fn list_async(self: &Arc<Self>) -> Result<Vec<CachedCompany>, CacheIoError> {
        self.blocking(|cache| cache.list()).await
    }

    /// [`ResearchCache::clear_all`] on the blocking pool.
    pub async fn clear_all_async(self: &Arc<Self>) -> Result<ClearReport, CacheIoError> {
        self.blocking(|cache| cache.clear_all()).await
    }

    async fn blocking<T, F>(self: &Arc<Self>, op: F) -> Result<T, CacheIoError>
    where
        T: Send + 'static,
        F: FnOnce(&ResearchCache) -> Result<T, CacheIoError> + Send + 'static,
    {
        let cache = Arc::clone(self);
        tokio::task::spawn_blocking(move || op(&cache)).await?
    }
}

fn remove_reporting(path: PathBuf, failures: &mut Vec<ClearFailure>) -> bool {
    match fs::remove_file(&path) {
        Ok(()) => true,
        Err(e) => {
            warn!("Could not remove {}: {e}", path.display());
            failures.push(ClearFailure {
                path,
                error: e.to_string(),
            });
            false
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;
    use tempfile::TempDir;

    fn cache() -> (TempDir, ResearchCache) {
        let dir = TempDir::new().unwrap();
        let cache = ResearchCache::open(dir.path().join("company_research")).unwrap();
        (dir, cache)
    }

    fn t0() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2026, 1, 10, 12, 0, 0).unwrap()
    }

    #[test]
    fn test_normalize_key_is_case_and_whitespace_insensitive() {
        assert_eq!(normalize_key("  Acme   Robotics \n"), "acme robotics");
        assert_eq!(normalize_key("ACME Robotics"), normalize_key("acme robotics"));
    }

    #[test]
    fn test_file_stems_are_distinct_for_lookalike_keys() {
        assert_ne!(encode_file_stem("a b"), encode_file_stem("a_b"));
        assert_ne!(encode_file_stem("a/b"), encode_file_stem("a_2fb"));
        assert_eq!(encode_file_stem("acme-2"), "acme-2");
    }

    #[test]
    fn test_put_then_get_with_different_spelling() {
        let (_dir, cache) = cache();
        cache.put_at("Acme Robotics", "Builds warehouse robots", t0()).unwrap();

        let record = cache
            .get_at("  acme ROBOTICS ", Duration::days(30), t0())
            .unwrap()
            .expect("record should be found");
        assert_eq!(record.company_key, "acme robotics");
        assert_eq!(record.content, "Builds warehouse robots");
        assert_eq!(record.created_at, t0());
    }

    #[test]
    fn test_get_missing_company_is_none() {
        let (_dir, cache) = cache();
        assert!(cache.get("Nobody Inc", Duration::days(30)).unwrap().is_none());
    }

    #[test]
    fn test_ttl_boundary_is_inclusive() {
        let (_dir, cache) = cache();
        let ttl = Duration::days(30);
        cache.put_at("Acme", "research", t0()).unwrap();

        assert!(cache.get_at("Acme", ttl, t0() + ttl).unwrap().is_some());
        assert!(cache
            .get_at("Acme", ttl, t0() + ttl + Duration::nanoseconds(1))
            .unwrap()
            .is_none());
        assert!(cache
            .get_at("Acme", ttl, t0() + ttl + Duration::days(1))
            .unwrap()
            .is_none());
    }

    #[test]
    fn test_expired_records_are_kept_and_listed() {
        let (_dir, cache) = cache();
        cache.put_at("Acme", "old", t0()).unwrap();
        let later = t0() + Duration::days(400);

        assert!(cache.get_at("Acme", Duration::days(30), later).unwrap().is_none());
        let listed = cache.list().unwrap();
        assert_eq!(listed.len(), 1);
        assert_eq!(listed[0].company_key, "acme");
    }

    #[test]
    fn test_put_overwrites_previous_record() {
        let (_dir, cache) = cache();
        cache.put_at("Acme", "first", t0()).unwrap();
        cache
            .put_at("ACME", "second", t0() + Duration::days(1))
            .unwrap();

        let record = cache
            .get_at("acme", Duration::days(30), t0() + Duration::days(1))
            .unwrap()
            .unwrap();
        assert_eq!(record.content, "second");
        assert_eq!(cache.list().unwrap().len(), 1);
    }

    #[test]
    fn test_crash_before_promotion_keeps_previous_record() {
        let (_dir, cache) = cache();
        cache.put_at("Acme", "previous", t0()).unwrap();

        let replacement = ResearchRecord {
            company_key: "acme".to_string(),
            content: "half-written".to_string(),
            created_at: t0() + Duration::days(1),
        };
        let path = cache.record_path("acme");
        let staged = cache.stage(&replacement, &path).unwrap();
        // Simulated crash: the staged file is never promoted and never cleaned up.
        let (_file, leftover) = staged.keep().unwrap();
        assert!(leftover.exists());

        let record = cache
            .get_at("Acme", Duration::days(30), t0() + Duration::days(2))
            .unwrap()
            .unwrap();
        assert_eq!(record.content, "previous");
        assert_eq!(cache.list().unwrap().len(), 1, "staging files are not records");
    }

    #[test]
    fn test_crash_before_first_promotion_leaves_nothing() {
        let (_dir, cache) = cache();
        let record = ResearchRecord {
            company_key: "acme".to_string(),
            content: "never promoted".to_string(),
            created_at: t0(),
        };
        let path = cache.record_path("acme");
        let staged = cache.stage(&record, &path).unwrap();
        drop(staged);

        assert!(cache.get_at("Acme", Duration::days(30), t0()).unwrap().is_none());
        assert!(cache.list().unwrap().is_empty());
    }

    #[test]
    fn test_list_is_sorted_by_key() {
        let (_dir, cache) = cache();
        cache.put_at("Zeta Labs", "z", t0()).unwrap();
        cache.put_at("acme", "a", t0()).unwrap();
        cache.put_at("Midway", "m", t0()).unwrap();

        let keys: Vec<_> = cache
            .list()
            .unwrap()
            .into_iter()
            .map(|c| c.company_key)
            .collect();
        assert_eq!(keys, vec!["acme", "midway", "zeta labs"]);
    }

    #[test]
    fn test_list_skips_corrupt_records() {
        let (_dir, cache) = cache();
        cache.put_at("Acme", "ok", t0()).unwrap();
        fs::write(cache.root().join("broken.json"), b"{not json").unwrap();

        let listed = cache.list().unwrap();
        assert_eq!(listed.len(), 1);
    }

    #[test]
    fn test_get_reports_corrupt_record() {
        let (_dir, cache) = cache();
        fs::write(cache.record_path("acme"), b"{not json").unwrap();
        let err = cache.get("Acme", Duration::days(30)).unwrap_err();
        assert!(matches!(err, CacheIoError::Corrupt { .. }));
    }

    #[test]
    fn test_clear_all_counts_removed_records() {
        let (_dir, cache) = cache();
        cache.put_at("Acme", "a", t0()).unwrap();
        cache.put_at("Contoso", "c", t0()).unwrap();

        let report = cache.clear_all().unwrap();
        assert_eq!(report.removed, 2);
        assert!(report.failures.is_empty());
        assert!(cache.list().unwrap().is_empty());
        assert_eq!(cache.clear_all().unwrap().removed, 0);
    }

    #[test]
    fn test_empty_company_name_is_rejected() {
        let (_dir, cache) = cache();
        assert!(matches!(
            cache.put("   ", "x"),
            Err(CacheIoError::EmptyKey)
        ));
    }

    #[test]
    fn test_clear_all_removes_abandoned_staging_files() {
        let (_dir, cache) = cache();
        cache.put_at("Acme", "kept until cleared", t0()).unwrap();
        let abandoned = ResearchRecord {
            company_key: "acme".to_string(),
            content: "interrupted".to_string(),
            created_at: t0(),
        };
        let path = cache.record_path("acme");
        let (_file, leftover) = cache.stage(&abandoned, &path).unwrap().keep().unwrap();
        fs::write(cache.root().join("notes.txt"), b"operator file").unwrap();

        let report = cache.clear_all().unwrap();

        assert_eq!(report.removed, 1);
        assert_eq!(report.staging_removed, 1);
        assert!(report.failures.is_empty());
        assert!(!leftover.exists());
        assert!(cache.root().join("notes.txt").exists());
    }

    #[tokio::test]
    async fn test_async_variants_share_the_same_records() {
        let (_dir, cache) = cache();
        let cache = Arc::new(cache);

        let stored = cache.put_async("Acme Robotics", "Builds robots").await.unwrap();
        assert_eq!(stored.company_key, "acme robotics");

        let fetched = cache
            .get_async("ACME robotics", Duration::days(30))
            .await
            .unwrap()
            .unwrap();
        assert_eq!(fetched.content, "Builds robots");
        assert_eq!(cache.list_async().await.unwrap().len(), 1);

        let report = cache.clear_all_async().await.unwrap();
        assert_eq!(report.removed, 1);
        assert!(cache.get_async("Acme Robotics", Duration::days(30)).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_async_get_reports_corrupt_record() {
        let (_dir, cache) = cache();
        fs::write(cache.record_path("acme"), b"{not json").unwrap();
        let cache = Arc::new(cache);

        let err = cache.get_async("Acme", Duration::days(30)).await.unwrap_err();
        assert!(matches!(err, CacheIoError::Corrupt { .. }));
    }
}

//! Append-only, partitioned detection catalog on the local filesystem.
//!
//! Layout under the store root:
//!
//! ```text
//! zone=<zone>/period=<period>/part-<batch>-<n>.jsonl.gz   gzip JSON lines, one row per line
//! zone=<zone>/orbit=<pass>/period=<period>/...            when partitioning by orbit
//! _commits/<batch>.json                                   commit manifest
//! ```
//!
//! Partition files are staged as temp files next to their destination and
//! renamed without clobbering. The manifest is written last; a batch and
//! its rows are visible only once its manifest exists. Files of batches
//! without a manifest are orphans and are removed by [`CatalogStore::recover`].
//!
//! A store has a single writer. Recovery leaves temp files younger than the
//! grace period alone, so it can run beside a commit that is still staging.

use crate::core::catalog::{validate_batch_id, CatalogBatch, CatalogRow, PartitionKey};
use crate::core::pipeline::ParameterSnapshot;
use crate::types::{SarError, SarResult};
use chrono::{DateTime, Utc};
use flate2::read::GzDecoder;
use flate2::write::GzEncoder;
use flate2::Compression;
use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;
use std::fs::{self, File};
use std::io::{self, BufRead, BufReader, BufWriter, Write};
use std::path::{Path, PathBuf};
use std::time::{Duration, SystemTime};
use tempfile::NamedTempFile;
use uuid::Uuid;

const COMMITS_DIR: &str = "_commits";
const PART_SUFFIX: &str = ".jsonl.gz";
const TEMP_PREFIX: &str = ".tmp";

/// Retry policy for transient write failures
#[derive(Debug, Clone, PartialEq)]
pub struct RetryPolicy {
    pub max_attempts: u32,
    pub initial_backoff: Duration,
    pub multiplier: f64,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            initial_backoff: Duration::from_millis(200),
            multiplier: 2.0,
        }
    }
}

impl RetryPolicy {
    pub fn is_transient(error: &io::Error) -> bool {
        matches!(
            error.kind(),
            io::ErrorKind::Interrupted | io::ErrorKind::WouldBlock | io::ErrorKind::TimedOut
        )
    }
}

/// One partition file written by a batch
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ManifestEntry {
    pub zone: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub orbit: Option<String>,
    pub period: String,
    /// Path relative to the store root
    pub path: String,
    pub rows: usize,
}

impl ManifestEntry {
    pub fn key(&self) -> PartitionKey {
        PartitionKey {
            zone: self.zone.clone(),
            orbit: self.orbit.clone(),
            period: self.period.clone(),
        }
    }
}

/// Written last; its presence commits the batch
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CommitManifest {
    pub batch_id: String,
    pub processing_uuid: Uuid,
    pub processed_at: DateTime<Utc>,
    pub supersedes: Option<String>,
    pub scene_ids: Vec<String>,
    pub snapshot: ParameterSnapshot,
    pub files: Vec<ManifestEntry>,
    pub row_count: usize,
}

pub struct CatalogStore {
    root: PathBuf,
    retry: RetryPolicy,
    /// Minimum age of a temp file before recovery may delete it
    temp_grace: Duration,
}

impl CatalogStore {
    /// Open (or create) a store rooted at `root`
    pub fn open(root: impl AsRef<Path>) -> SarResult<Self> {
        let root = root.as_ref().to_path_buf();
        fs::create_dir_all(root.join(COMMITS_DIR))?;
        log::debug!("Opened catalog store at {}", root.display());
        Ok(Self {
            root,
            retry: RetryPolicy::default(),
            temp_grace: Duration::from_secs(3600),
        })
    }

    pub fn with_retry(mut self, retry: RetryPolicy) -> Self {
        self.retry = retry;
        self
    }

    pub fn with_temp_grace(mut self, temp_grace: Duration) -> Self {
        self.temp_grace = temp_grace;
        self
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    fn manifest_path(&self, batch_id: &str) -> PathBuf {
        self.root.join(COMMITS_DIR).join(format!("{}.json", batch_id))
    }

    pub fn is_committed(&self, batch_id: &str) -> SarResult<bool> {
        validate_batch_id(batch_id)?;
        Ok(self.manifest_path(batch_id).is_file())
    }

    /// Manifest of a committed batch
    pub fn manifest(&self, batch_id: &str) -> SarResult<Option<CommitManifest>> {
        if !self.is_committed(batch_id)? {
            return Ok(None);
        }
        let file = File::open(self.manifest_path(batch_id))?;
        Ok(Some(serde_json::from_reader(BufReader::new(file))?))
    }

    /// Manifests of every committed batch, ordered by batch id
    pub fn committed_batches(&self) -> SarResult<Vec<CommitManifest>> {
        let mut ids = Vec::new();
        for entry in fs::read_dir(self.root.join(COMMITS_DIR))? {
            let name = entry?.file_name().to_string_lossy().into_owned();
            if let Some(id) = name.strip_suffix(".json") {
                if validate_batch_id(id).is_ok() {
                    ids.push(id.to_string());
                }
            }
        }
        ids.sort();

        let mut manifests = Vec::with_capacity(ids.len());
        for id in ids {
            if let Some(m) = self.manifest(&id)? {
                manifests.push(m);
            }
        }
        Ok(manifests)
    }

    /// Persist a batch. All of its rows become visible together or not at all.
    pub fn commit(&self, batch: &CatalogBatch) -> SarResult<CommitManifest> {
        let batch_id = batch.batch_id();
        validate_batch_id(batch_id)?;
        if self.is_committed(batch_id)? {
            return Err(SarError::AlreadyCommitted {
                batch_id: batch_id.to_string(),
            });
        }

        // Leftovers of an earlier interrupted attempt at this batch
        let stale = self
            .remove_orphans(Some(batch_id))
            .map_err(|e| self.write_error(batch_id, 1, e))?;
        if stale > 0 {
            log::warn!("Removed {} stale file(s) of uncommitted batch {}", stale, batch_id);
        }

        let mut written: Vec<PathBuf> = Vec::new();
        let mut files = Vec::with_capacity(batch.partitions.len());
        for (n, (key, rows)) in batch.partitions.iter().enumerate() {
            let relative = format!("{}/part-{}-{:04}{}", key.relative_dir(), batch_id, n, PART_SUFFIX);
            let path = self.root.join(&relative);
            if let Err(e) = self.retrying(batch_id, &relative, || write_partition(&path, rows)) {
                self.discard(&written);
                return Err(e);
            }
            log::debug!("Wrote {} rows to {}", rows.len(), relative);
            written.push(path);
            files.push(ManifestEntry {
                zone: key.zone.clone(),
                orbit: key.orbit.clone(),
                period: key.period.clone(),
                path: relative,
                rows: rows.len(),
            });
        }

        let provenance = &batch.provenance;
        let manifest = CommitManifest {
            batch_id: batch_id.to_string(),
            processing_uuid: provenance.processing_uuid,
            processed_at: provenance.processed_at,
            supersedes: provenance.supersedes.clone(),
            scene_ids: provenance.scene_ids.clone(),
            snapshot: provenance.snapshot.clone(),
            files,
            row_count: batch.row_count(),
        };

        let manifest_path = self.manifest_path(batch_id);
        match self.retrying(batch_id, "commit manifest", || write_manifest(&manifest_path, &manifest)) {
            Ok(()) => {}
            Err(SarError::CatalogWrite { source, .. }) if source.kind() == io::ErrorKind::AlreadyExists => {
                self.discard(&written);
                return Err(SarError::AlreadyCommitted {
                    batch_id: batch_id.to_string(),
                });
            }
            Err(e) => {
                self.discard(&written);
                return Err(e);
            }
        }

        log::info!(
            "Committed batch {}: {} rows in {} partition files",
            batch_id,
            manifest.row_count,
            manifest.files.len()
        );
        Ok(manifest)
    }

    /// Delete partition files of batches that never committed, and temp
    /// files older than the grace period
    pub fn recover(&self) -> SarResult<usize> {
        let removed = self.remove_orphans(None)?;
        if removed > 0 {
            log::info!("Catalog recovery removed {} orphan file(s)", removed);
        }
        Ok(removed)
    }

    /// Rows of committed batches in one partition, in batch id then row order
    pub fn read_partition(&self, key: &PartitionKey) -> SarResult<Vec<CatalogRow>> {
        let mut rows = Vec::new();
        for manifest in self.committed_batches()? {
            for entry in manifest.files.iter().filter(|f| f.key() == *key) {
                let file = File::open(self.root.join(&entry.path))?;
                for line in BufReader::new(GzDecoder::new(file)).lines() {
                    let line = line?;
                    if !line.trim().is_empty() {
                        rows.push(serde_json::from_str(&line)?);
                    }
                }
            }
        }
        Ok(rows)
    }

    /// Partitions holding committed rows
    pub fn partitions(&self) -> SarResult<Vec<PartitionKey>> {
        let keys: BTreeSet<PartitionKey> = self
            .committed_batches()?
            .into_iter()
            .flat_map(|m| m.files.into_iter().map(|f| f.key()))
            .collect();
        Ok(keys.into_iter().collect())
    }

    fn retrying<T>(&self, batch_id: &str, what: &str, mut op: impl FnMut() -> io::Result<T>) -> SarResult<T> {
        let max_attempts = self.retry.max_attempts.max(1);
        let mut backoff = self.retry.initial_backoff;
        let mut attempt = 1;
        loop {
            match op() {
                Ok(value) => return Ok(value),
                Err(e) if RetryPolicy::is_transient(&e) && attempt < max_attempts => {
                    log::warn!(
                        "Writing {} for batch {} failed (attempt {} of {}): {}; retrying in {:?}",
                        what,
                        batch_id,
                        attempt,
                        max_attempts,
                        e,
                        backoff
                    );
                    std::thread::sleep(backoff);
                    backoff = backoff.mul_f64(self.retry.multiplier.max(1.0));
                    attempt += 1;
                }
                Err(e) => return Err(self.write_error(batch_id, attempt, e)),
            }
        }
    }

    fn write_error(&self, batch_id: &str, attempts: u32, source: io::Error) -> SarError {
        SarError::CatalogWrite {
            batch_id: batch_id.to_string(),
            attempts,
            source,
        }
    }

    fn discard(&self, paths: &[PathBuf]) {
        for path in paths {
            if let Err(e) = fs::remove_file(path) {
                log::warn!("Could not remove {}: {}; run recovery before retrying", path.display(), e);
            }
        }
    }

    /// Remove uncommitted part files (of one batch, or of all batches plus stale temp files)
    fn remove_orphans(&self, only_batch: Option<&str>) -> io::Result<usize> {
        let mut removed = 0;
        let mut dirs = Vec::new();
        partition_dirs(&self.root, "zone=", &mut dirs)?;
        for dir in dirs {
            for entry in fs::read_dir(&dir)? {
                let entry = entry?;
                if !entry.file_type()?.is_file() {
                    continue;
                }
                let name = entry.file_name().to_string_lossy().into_owned();
                let orphan = match (part_batch_id(&name), only_batch) {
                    (Some(batch), Some(only)) => batch == only,
                    (Some(batch), None) => !self.manifest_path(batch).is_file(),
                    (None, None) => name.starts_with(TEMP_PREFIX) && self.is_stale(&entry)?,
                    (None, Some(_)) => false,
                };
                if orphan {
                    log::debug!("Removing orphan {}", entry.path().display());
                    fs::remove_file(entry.path())?;
                    removed += 1;
                }
            }
        }
        Ok(removed)
    }

    fn is_stale(&self, entry: &fs::DirEntry) -> io::Result<bool> {
        let modified = entry.metadata()?.modified()?;
        // A clock step backwards makes the file look new
        let age = SystemTime::now().duration_since(modified).unwrap_or(Duration::ZERO);
        Ok(age >= self.temp_grace)
    }
}

/// Every `key=value` directory below `dir`, parents before children
fn partition_dirs(dir: &Path, prefix: &str, found: &mut Vec<PathBuf>) -> io::Result<()> {
    let mut children = Vec::new();
    for entry in fs::read_dir(dir)? {
        let entry = entry?;
        if entry.file_type()?.is_dir() && entry.file_name().to_string_lossy().starts_with(prefix) {
            children.push(entry.path());
        }
    }
    children.sort();
    for child in children {
        found.push(child.clone());
        partition_dirs(&child, "", found)?;
    }
    Ok(())
}

/// Batch id encoded in a `part-<batch>-<n>.jsonl.gz` name
fn part_batch_id(name: &str) -> Option<&str> {
    let stem = name.strip_prefix("part-")?.strip_suffix(PART_SUFFIX)?;
    let (batch, n) = stem.rsplit_once('-')?;
    if n.is_empty() || !n.chars().all(|c| c.is_ascii_digit()) {
        return None;
    }
    Some(batch)
}

fn staging_file(path: &Path) -> io::Result<NamedTempFile> {
    let dir = path
        .parent()
        .ok_or_else(|| io::Error::new(io::ErrorKind::InvalidInput, "catalog path has no parent"))?;
    fs::create_dir_all(dir)?;
    NamedTempFile::new_in(dir)
}

fn write_partition(path: &Path, rows: &[CatalogRow]) -> io::Result<()> {
    let staged = staging_file(path)?;
    {
        let mut encoder = GzEncoder::new(BufWriter::new(staged.as_file()), Compression::default());
        for row in rows {
            serde_json::to_writer(&mut encoder, row)?;
            encoder.write_all(b"\n")?;
        }
        let mut writer = encoder.finish()?;
        writer.flush()?;
    }
    staged.as_file().sync_all()?;
    staged.persist_noclobber(path).map_err(|e| e.error)?;
    Ok(())
}

fn write_manifest(path: &Path, manifest: &CommitManifest) -> io::Result<()> {
    let staged = staging_file(path)?;
    {
        let mut writer = BufWriter::new(staged.as_file());
        serde_json::to_writer_pretty(&mut writer, manifest)?;
        writer.flush()?;
    }
    staged.as_file().sync_all()?;
    staged.persist_noclobber(path).map_err(|e| e.error)?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::cell::Cell;

    #[test]
    fn test_part_file_names() {
        assert_eq!(part_batch_id("part-2022-03-a-0001.jsonl.gz"), Some("2022-03-a"));
        assert_eq!(part_batch_id("part-b7-0000.jsonl.gz"), Some("b7"));
        assert_eq!(part_batch_id("part-b7.jsonl.gz"), None);
        assert_eq!(part_batch_id(".tmpAbc123"), None);
    }

    #[test]
    fn test_transient_errors_are_retried() {
        let dir = tempfile::tempdir().unwrap();
        let store = CatalogStore::open(dir.path()).unwrap().with_retry(RetryPolicy {
            max_attempts: 3,
            initial_backoff: Duration::from_millis(1),
            multiplier: 2.0,
        });

        let calls = Cell::new(0);
        let result = store.retrying("b1", "test", || {
            calls.set(calls.get() + 1);
            if calls.get() < 3 {
                Err(io::Error::new(io::ErrorKind::TimedOut, "slow disk"))
            } else {
                Ok(42)
            }
        });
        assert_eq!(result.unwrap(), 42);
        assert_eq!(calls.get(), 3);
    }

    #[test]
    fn test_persistent_failure_reports_attempts() {
        let dir = tempfile::tempdir().unwrap();
        let store = CatalogStore::open(dir.path()).unwrap().with_retry(RetryPolicy {
            max_attempts: 2,
            initial_backoff: Duration::from_millis(1),
            multiplier: 2.0,
        });

        let transient: SarResult<()> =
            store.retrying("b2", "test", || Err(io::Error::new(io::ErrorKind::Interrupted, "again")));
        match transient {
            Err(SarError::CatalogWrite { batch_id, attempts, .. }) => {
                assert_eq!(batch_id, "b2");
                assert_eq!(attempts, 2);
            }
            other => panic!("expected catalog write error, got {:?}", other),
        }

        let permanent: SarResult<()> =
            store.retrying("b3", "test", || Err(io::Error::new(io::ErrorKind::PermissionDenied, "no")));
        assert!(matches!(permanent, Err(SarError::CatalogWrite { attempts: 1, .. })));
    }

    #[test]
    fn test_recover_removes_uncommitted_parts() {
        let dir = tempfile::tempdir().unwrap();
        let store = CatalogStore::open(dir.path()).unwrap().with_temp_grace(Duration::ZERO);
        let period = dir.path().join("zone=irish_sea/period=2022-03");
        fs::create_dir_all(&period).unwrap();
        fs::write(period.join("part-lost-0000.jsonl.gz"), b"").unwrap();
        fs::write(period.join(".tmpXYZ"), b"").unwrap();

        assert_eq!(store.recover().unwrap(), 2);
        assert_eq!(fs::read_dir(&period).unwrap().count(), 0);
        assert!(store.committed_batches().unwrap().is_empty());
    }

    #[test]
    fn test_recover_keeps_fresh_temp_files() {
        let dir = tempfile::tempdir().unwrap();
        let store = CatalogStore::open(dir.path()).unwrap();
        let period = dir.path().join("zone=irish_sea/orbit=ascending/period=2022-03");
        fs::create_dir_all(&period).unwrap();
        fs::write(period.join("part-lost-0000.jsonl.gz"), b"").unwrap();
        // Still being staged by a live commit
        fs::write(period.join(".tmpLIVE"), b"").unwrap();

        assert_eq!(store.recover().unwrap(), 1);
        assert!(period.join(".tmpLIVE").is_file());
        assert!(!period.join("part-lost-0000.jsonl.gz").exists());
    }
}

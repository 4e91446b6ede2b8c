//! Per-scope pane tracking records.
//!
//! The record names the pane a scope believes it owns. It is advisory: the
//! pane's ownership tag is the authoritative check, and a record that fails
//! verification is simply cleared.

use std::collections::HashMap;
use std::fs;
use std::io::{ErrorKind, Write};
use std::path::{Path, PathBuf};
use std::sync::Mutex;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tempfile::NamedTempFile;
use tracing::warn;

use crate::{AppError, Result};

/// Pane a scope believes it owns.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TrackingRecord {
    /// Multiplexer pane identifier.
    pub pane_id: String,
    /// Token of the launch currently holding the pane.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub lease: Option<String>,
    /// When the record was last written.
    pub updated_at: DateTime<Utc>,
}

impl TrackingRecord {
    /// Record `pane_id` as of now.
    #[must_use]
    pub fn new(pane_id: impl Into<String>) -> Self {
        Self {
            pane_id: pane_id.into(),
            lease: None,
            updated_at: Utc::now(),
        }
    }

    /// Attach the lease token of the launch holding the pane.
    #[must_use]
    pub fn with_lease(mut self, lease: impl Into<String>) -> Self {
        self.lease = Some(lease.into());
        self
    }
}

/// Storage for tracking records keyed by scope.
pub trait ScopeStore: Send + Sync {
    /// Record for `scope`, if any.
    ///
    /// # Errors
    ///
    /// Returns `AppError::Io` if the backing storage cannot be read.
    fn get(&self, scope: &str) -> Result<Option<TrackingRecord>>;

    /// Replace the record for `scope`.
    ///
    /// # Errors
    ///
    /// Returns `AppError::Io` if the record cannot be written.
    fn put_record(&self, scope: &str, record: &TrackingRecord) -> Result<()>;

    /// Point `scope` at `pane_id` with no lease holder.
    ///
    /// # Errors
    ///
    /// Returns `AppError::Io` if the record cannot be written.
    fn put(&self, scope: &str, pane_id: &str) -> Result<()> {
        self.put_record(scope, &TrackingRecord::new(pane_id))
    }

    /// Forget the record for `scope`. Clearing a missing record is a no-op.
    ///
    /// # Errors
    ///
    /// Returns `AppError::Io` if the record cannot be removed.
    fn clear(&self, scope: &str) -> Result<()>;

    /// Every stored `(scope, record)` pair.
    ///
    /// # Errors
    ///
    /// Returns `AppError::Io` if the backing storage cannot be listed.
    fn entries(&self) -> Result<Vec<(String, TrackingRecord)>>;
}

/// In-process store, for tests and single-process embedding.
#[derive(Debug, Default)]
pub struct MemoryScopeStore {
    records: Mutex<HashMap<String, TrackingRecord>>,
}

impl MemoryScopeStore {
    /// Create an empty store.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    fn with_records<T>(&self, f: impl FnOnce(&mut HashMap<String, TrackingRecord>) -> T) -> Result<T> {
        let mut records = self
            .records
            .lock()
            .map_err(|_| AppError::Io("scope store lock poisoned".into()))?;
        Ok(f(&mut records))
    }
}

impl ScopeStore for MemoryScopeStore {
    fn get(&self, scope: &str) -> Result<Option<TrackingRecord>> {
        self.with_records(|records| records.get(scope).cloned())
    }

    fn put_record(&self, scope: &str, record: &TrackingRecord) -> Result<()> {
        self.with_records(|records| {
            records.insert(scope.to_owned(), record.clone());
        })
    }

    fn clear(&self, scope: &str) -> Result<()> {
        self.with_records(|records| {
            records.remove(scope);
        })
    }

    fn entries(&self) -> Result<Vec<(String, TrackingRecord)>> {
        self.with_records(|records| {
            records
                .iter()
                .map(|(scope, record)| (scope.clone(), record.clone()))
                .collect()
        })
    }
}

/// One JSON file per scope under a shared directory, so records survive
/// across controller processes.
#[derive(Debug, Clone)]
pub struct FileScopeStore {
    dir: PathBuf,
}

impl FileScopeStore {
    /// Store records under `dir`, creating it if needed.
    ///
    /// # Errors
    ///
    /// Returns `AppError::Io` if the directory cannot be created.
    pub fn open(dir: impl Into<PathBuf>) -> Result<Self> {
        let dir = dir.into();
        fs::create_dir_all(&dir).map_err(|err| {
            AppError::Io(format!("cannot create state dir {}: {err}", dir.display()))
        })?;
        Ok(Self { dir })
    }

    /// Directory holding the records.
    #[must_use]
    pub fn dir(&self) -> &Path {
        &self.dir
    }

    fn record_path(&self, scope: &str) -> Result<PathBuf> {
        if scope.is_empty() || !scope.chars().all(|c| c.is_ascii_alphanumeric() || c == '-') {
            return Err(AppError::Io(format!("invalid scope identifier '{scope}'")));
        }
        Ok(self.dir.join(format!("{scope}.json")))
    }

    fn read_record(path: &Path) -> Result<Option<TrackingRecord>> {
        let raw = match fs::read_to_string(path) {
            Ok(raw) => raw,
            Err(err) if err.kind() == ErrorKind::NotFound => return Ok(None),
            Err(err) => {
                return Err(AppError::Io(format!(
                    "cannot read tracking record {}: {err}",
                    path.display()
                )))
            }
        };

        match serde_json::from_str(&raw) {
            Ok(record) => Ok(Some(record)),
            Err(err) => {
                warn!(path = %path.display(), %err, "ignoring corrupt tracking record");
                Ok(None)
            }
        }
    }
}

impl ScopeStore for FileScopeStore {
    fn get(&self, scope: &str) -> Result<Option<TrackingRecord>> {
        Self::read_record(&self.record_path(scope)?)
    }

    fn put_record(&self, scope: &str, record: &TrackingRecord) -> Result<()> {
        let path = self.record_path(scope)?;
        let body = serde_json::to_vec(record)
            .map_err(|err| AppError::Io(format!("cannot encode tracking record: {err}")))?;

        // Write-then-rename so concurrent readers never see a partial record.
        let mut tmp = NamedTempFile::new_in(&self.dir)
            .map_err(|err| AppError::Io(format!("cannot stage tracking record: {err}")))?;
        tmp.write_all(&body)
            .map_err(|err| AppError::Io(format!("cannot write tracking record: {err}")))?;
        tmp.persist(&path).map_err(|err| {
            AppError::Io(format!(
                "cannot persist tracking record {}: {err}",
                path.display()
            ))
        })?;
        Ok(())
    }

    fn clear(&self, scope: &str) -> Result<()> {
        let path = self.record_path(scope)?;
        match fs::remove_file(&path) {
            Ok(()) => Ok(()),
            Err(err) if err.kind() == ErrorKind::NotFound => Ok(()),
            Err(err) => Err(AppError::Io(format!(
                "cannot remove tracking record {}: {err}",
                path.display()
            ))),
        }
    }

    fn entries(&self) -> Result<Vec<(String, TrackingRecord)>> {
        let listing = fs::read_dir(&self.dir).map_err(|err| {
            AppError::Io(format!("cannot list state dir {}: {err}", self.dir.display()))
        })?;

        let mut entries = Vec::new();
        for entry in listing {
            let path = entry?.path();
            if path.extension().and_then(|e| e.to_str()) != Some("json") {
                continue;
            }
            let Some(scope) = path.file_stem().and_then(|s| s.to_str()).map(str::to_owned) else {
                continue;
            };
            if let Some(record) = Self::read_record(&path)? {
                entries.push((scope, record));
            }
        }
        Ok(entries)
    }
}

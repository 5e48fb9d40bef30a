//! ---
//! havoc_section: "03-run-state"
//! havoc_subsection: "module"
//! havoc_type: "source"
//! havoc_scope: "code"
//! havoc_description: "Run-scoped snapshot and cooldown persistence."
//! havoc_version: "v0.0.0-prealpha"
//! havoc_owner: "tbd"
//! ---
use std::fs;
use std::io;
use std::path::{Path, PathBuf};

use chrono::{DateTime, TimeZone, Utc};
use thiserror::Error;
use tracing::{debug, warn};
use uuid::Uuid;
use walkdir::WalkDir;

const SNAPSHOTS_DIR: &str = "snapshots";
const COOLDOWNS_DIR: &str = "cooldowns";
const DOCUMENTS_DIR: &str = "documents";

/// Errors surfaced by the run store. Only creation failures abort the
/// process; read/write failures on individual entries are reported to the
/// caller to convert into status values.
#[derive(Debug, Error)]
pub enum StoreError {
    #[error("store io failure at {path}")]
    Io {
        path: PathBuf,
        #[source]
        source: io::Error,
    },
    #[error("corrupt cooldown stamp at {path}")]
    CorruptStamp { path: PathBuf },
}

impl StoreError {
    fn io(path: impl Into<PathBuf>, source: io::Error) -> Self {
        Self::Io {
            path: path.into(),
            source,
        }
    }
}

/// Filesystem-backed store scoped to one orchestrator invocation.
///
/// Layout under `<state_dir>/<run-id>/`: `snapshots/<module>__<key>` holds
/// the opaque prior-state string a module wrote before mutating,
/// `cooldowns/<alert-key>` holds the last-fire unix timestamp, and
/// `documents/` holds round artifacts kept for inspection (the steady-state
/// baseline). Everything is removed at teardown; nothing survives the run.
#[derive(Debug, Clone)]
pub struct RunStore {
    run_id: String,
    root: PathBuf,
}

impl RunStore {
    /// Create the run directory tree. Failure here is fatal at startup,
    /// before any injection.
    pub fn open(state_dir: &Path) -> Result<Self, StoreError> {
        let run_id = Uuid::new_v4().to_string();
        let root = state_dir.join(&run_id);
        for sub in [SNAPSHOTS_DIR, COOLDOWNS_DIR, DOCUMENTS_DIR] {
            let dir = root.join(sub);
            fs::create_dir_all(&dir).map_err(|err| StoreError::io(&dir, err))?;
        }
        debug!(run_id = %run_id, root = %root.display(), "run store opened");
        Ok(Self { run_id, root })
    }

    /// Adopt the most recently modified leftover run directory, if any. An
    /// emergency restore after a hard kill needs the snapshots the dead run
    /// left behind; everything else always opens a fresh run.
    pub fn adopt_latest(state_dir: &Path) -> Result<Option<Self>, StoreError> {
        let entries = match fs::read_dir(state_dir) {
            Ok(entries) => entries,
            Err(err) if err.kind() == io::ErrorKind::NotFound => return Ok(None),
            Err(err) => return Err(StoreError::io(state_dir, err)),
        };
        let mut candidates: Vec<(std::time::SystemTime, PathBuf)> = Vec::new();
        for entry in entries.flatten() {
            let path = entry.path();
            if !path.join(SNAPSHOTS_DIR).is_dir() {
                continue;
            }
            let modified = entry
                .metadata()
                .and_then(|meta| meta.modified())
                .unwrap_or(std::time::SystemTime::UNIX_EPOCH);
            candidates.push((modified, path));
        }
        candidates.sort();
        let Some((_, root)) = candidates.into_iter().last() else {
            return Ok(None);
        };
        let run_id = root
            .file_name()
            .map(|name| name.to_string_lossy().into_owned())
            .unwrap_or_default();
        debug!(run_id = %run_id, root = %root.display(), "adopted leftover run store");
        Ok(Some(Self { run_id, root }))
    }

    pub fn run_id(&self) -> &str {
        &self.run_id
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Record the prior state a module captured before mutating.
    pub fn put_snapshot(&self, module: &str, key: &str, value: &str) -> Result<(), StoreError> {
        let path = self.snapshot_path(module, key);
        fs::write(&path, value).map_err(|err| StoreError::io(&path, err))?;
        debug!(module, key, path = %path.display(), "snapshot persisted");
        Ok(())
    }

    /// Read a snapshot back. Absence is `Ok(None)`, never an error.
    pub fn get_snapshot(&self, module: &str, key: &str) -> Result<Option<String>, StoreError> {
        let path = self.snapshot_path(module, key);
        match fs::read_to_string(&path) {
            Ok(contents) => Ok(Some(contents)),
            Err(err) if err.kind() == io::ErrorKind::NotFound => Ok(None),
            Err(err) => Err(StoreError::io(&path, err)),
        }
    }

    /// Drop a snapshot once the state it guarded has been restored.
    pub fn remove_snapshot(&self, module: &str, key: &str) -> Result<(), StoreError> {
        let path = self.snapshot_path(module, key);
        match fs::remove_file(&path) {
            Ok(()) => Ok(()),
            Err(err) if err.kind() == io::ErrorKind::NotFound => Ok(()),
            Err(err) => Err(StoreError::io(&path, err)),
        }
    }

    /// Number of snapshots still present. Non-zero at teardown means some
    /// module never restored its prior state.
    pub fn snapshot_count(&self) -> usize {
        WalkDir::new(self.root.join(SNAPSHOTS_DIR))
            .min_depth(1)
            .max_depth(1)
            .into_iter()
            .filter_map(|entry| entry.ok())
            .count()
    }

    /// Persist a run artifact (e.g. the steady-state baseline) for
    /// post-drill inspection.
    pub fn put_document(&self, name: &str, contents: &str) -> Result<(), StoreError> {
        let path = self.root.join(DOCUMENTS_DIR).join(sanitize(name));
        fs::write(&path, contents).map_err(|err| StoreError::io(&path, err))?;
        Ok(())
    }

    /// Timestamp of the last alert delivered under `key`, if any.
    pub fn last_fired(&self, key: &str) -> Result<Option<DateTime<Utc>>, StoreError> {
        let path = self.cooldown_path(key);
        let raw = match fs::read_to_string(&path) {
            Ok(raw) => raw,
            Err(err) if err.kind() == io::ErrorKind::NotFound => return Ok(None),
            Err(err) => return Err(StoreError::io(&path, err)),
        };
        let secs: i64 = raw
            .trim()
            .parse()
            .map_err(|_| StoreError::CorruptStamp { path: path.clone() })?;
        let stamp = Utc
            .timestamp_opt(secs, 0)
            .single()
            .ok_or(StoreError::CorruptStamp { path })?;
        Ok(Some(stamp))
    }

    /// Record an alert delivery under `key`.
    pub fn stamp(&self, key: &str, at: DateTime<Utc>) -> Result<(), StoreError> {
        let path = self.cooldown_path(key);
        fs::write(&path, at.timestamp().to_string()).map_err(|err| StoreError::io(&path, err))
    }

    /// Remove the run directory. Best-effort; called exactly once at exit,
    /// after restore has been attempted on anything left broken.
    pub fn teardown(&self) {
        let remaining = self.snapshot_count();
        if remaining > 0 {
            warn!(
                run_id = %self.run_id,
                remaining,
                "tearing down run store with unrestored snapshots"
            );
        }
        if let Err(err) = fs::remove_dir_all(&self.root) {
            warn!(root = %self.root.display(), error = %err, "failed to remove run store");
        } else {
            debug!(run_id = %self.run_id, "run store removed");
        }
    }

    fn snapshot_path(&self, module: &str, key: &str) -> PathBuf {
        self.root
            .join(SNAPSHOTS_DIR)
            .join(format!("{}__{}", sanitize(module), sanitize(key)))
    }

    fn cooldown_path(&self, key: &str) -> PathBuf {
        self.root.join(COOLDOWNS_DIR).join(sanitize(key))
    }
}

/// Flatten arbitrary keys into file-name-safe tokens.
fn sanitize(raw: &str) -> String {
    raw.chars()
        .map(|c| {
            if c.is_ascii_alphanumeric() || matches!(c, '-' | '_' | '.') {
                c
            } else {
                '_'
            }
        })
        .collect()
}

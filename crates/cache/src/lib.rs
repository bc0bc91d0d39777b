use std::{
    fs::{self, TryLockError},
    io::{ErrorKind, Write},
    path::{Path, PathBuf},
};

use anyhow::Context;
use core_model::{CaseRecord, parse_case_array};
use tracing::{debug, warn};

pub const CASES_KEY: &str = "cases";
pub const LAST_PUBLIC_UPDATE_KEY: &str = "last_public_update";
const SYNC_LOCK_FILE: &str = "sync.lock";

/// String key-value storage under one namespace directory. Each key is a
/// file; writes go through a temp file and a rename.
#[derive(Debug, Clone)]
pub struct LocalCache {
    dir: PathBuf,
}

impl LocalCache {
    pub fn default_dir() -> PathBuf {
        dirs::data_dir()
            .unwrap_or_else(|| PathBuf::from("."))
            .join("casebook")
            .join("cache")
    }

    pub fn open_default() -> anyhow::Result<Self> {
        Self::open(Self::default_dir())
    }

    pub fn open(dir: impl Into<PathBuf>) -> anyhow::Result<Self> {
        let dir = dir.into();
        fs::create_dir_all(&dir)
            .with_context(|| format!("creating cache dir {}", dir.display()))?;
        Ok(Self { dir })
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    fn key_path(&self, key: &str) -> PathBuf {
        self.dir.join(key)
    }

    pub fn get(&self, key: &str) -> anyhow::Result<Option<String>> {
        match fs::read_to_string(self.key_path(key)) {
            Ok(s) => Ok(Some(s)),
            Err(err) if err.kind() == ErrorKind::NotFound => Ok(None),
            Err(err) => Err(err).with_context(|| format!("reading cache key {key}")),
        }
    }

    pub fn set(&self, key: &str, value: &str) -> anyhow::Result<()> {
        let path = self.key_path(key);
        let tmp = self.dir.join(format!(".{key}.tmp"));
        fs::write(&tmp, value).with_context(|| format!("writing cache key {key}"))?;
        let reloaded = fs::read_to_string(&tmp).with_context(|| "verify cache write")?;
        if reloaded != value {
            anyhow::bail!("cache verification failed for key {key}");
        }
        fs::rename(&tmp, &path).with_context(|| format!("committing cache key {key}"))?;
        Ok(())
    }

    /// Removes a key; returns whether it existed.
    pub fn remove(&self, key: &str) -> anyhow::Result<bool> {
        match fs::remove_file(self.key_path(key)) {
            Ok(()) => Ok(true),
            Err(err) if err.kind() == ErrorKind::NotFound => Ok(false),
            Err(err) => Err(err).with_context(|| format!("removing cache key {key}")),
        }
    }

    pub fn load_cases(&self) -> anyhow::Result<Vec<CaseRecord>> {
        let Some(raw) = self.get(CASES_KEY)? else {
            return Ok(Vec::new());
        };
        let (cases, _skipped) = parse_case_array(&raw).context("parsing cached cases")?;
        debug!(count = cases.len(), "loaded cached cases");
        Ok(cases)
    }

    pub fn store_cases(&self, cases: &[CaseRecord]) -> anyhow::Result<()> {
        let payload = serde_json::to_string(cases)?;
        self.set(CASES_KEY, &payload)
    }

    pub fn clear_cases(&self) -> anyhow::Result<bool> {
        self.remove(CASES_KEY)
    }

    /// Epoch milliseconds of the last public update; unreadable values count
    /// as never.
    pub fn last_public_update(&self) -> anyhow::Result<Option<i64>> {
        let Some(raw) = self.get(LAST_PUBLIC_UPDATE_KEY)? else {
            return Ok(None);
        };
        match raw.trim().parse::<i64>() {
            Ok(ms) => Ok(Some(ms)),
            Err(_) => {
                warn!(value = %raw.trim(), "ignoring unreadable last public update");
                Ok(None)
            }
        }
    }

    pub fn set_last_public_update(&self, epoch_ms: i64) -> anyhow::Result<()> {
        self.set(LAST_PUBLIC_UPDATE_KEY, &epoch_ms.to_string())
    }

    /// Marks a walk as in flight with an exclusive OS lock on `sync.lock`.
    /// Fails while another holder exists. The lock goes away when the guard
    /// drops or the holding process exits, so a killed sync leaves the file
    /// behind but not the lock.
    pub fn acquire_sync_lock(&self) -> anyhow::Result<SyncLock> {
        let path = self.dir.join(SYNC_LOCK_FILE);
        let mut file = fs::OpenOptions::new()
            .read(true)
            .write(true)
            .create(true)
            .truncate(false)
            .open(&path)
            .with_context(|| format!("opening {}", path.display()))?;
        match file.try_lock() {
            Ok(()) => {}
            Err(TryLockError::WouldBlock) => anyhow::bail!(
                "a sync is already in progress (lock at {})",
                path.display()
            ),
            Err(TryLockError::Error(err)) => {
                return Err(err).with_context(|| format!("locking {}", path.display()));
            }
        }
        file.set_len(0)?;
        write!(file, "{}", std::process::id())?;
        Ok(SyncLock { file, path })
    }

    /// Whether some live process holds the sync lock right now.
    pub fn sync_lock_held(&self) -> bool {
        let path = self.dir.join(SYNC_LOCK_FILE);
        let Ok(file) = fs::OpenOptions::new().read(true).write(true).open(&path) else {
            return false;
        };
        matches!(file.try_lock(), Err(TryLockError::WouldBlock))
    }
}

#[derive(Debug)]
pub struct SyncLock {
    file: fs::File,
    path: PathBuf,
}

impl Drop for SyncLock {
    fn drop(&mut self) {
        if let Err(err) = self.file.unlock() {
            warn!(error = %err, path = %self.path.display(), "failed to release sync lock");
        }
    }
}

//! Per-key locking: an in-process async mutex map plus a lock file for
//! other processes sharing the cache directory.

use std::collections::HashMap;
use std::hash::Hash;
use std::io;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex, PoisonError};
use std::time::{Duration, Instant, SystemTime};

use tokio::io::AsyncWriteExt;
use tokio::sync::{Mutex as AsyncMutex, OwnedMutexGuard};
use tokio::task::JoinHandle;

use super::store::unique_suffix;

pub const LOCK_FILE_NAME: &str = ".lock";

const POLL_START: Duration = Duration::from_millis(25);
const POLL_MAX: Duration = Duration::from_millis(500);
const HEARTBEAT_MIN: Duration = Duration::from_millis(5);

/// Async mutexes handed out by key. Slots nobody holds are dropped lazily.
pub struct KeyedMutex<K> {
    slots: Mutex<HashMap<K, Arc<AsyncMutex<()>>>>,
}

impl<K> Default for KeyedMutex<K> {
    fn default() -> Self {
        Self {
            slots: Mutex::new(HashMap::new()),
        }
    }
}

impl<K: Eq + Hash + Clone> KeyedMutex<K> {
    pub async fn lock(&self, key: &K) -> OwnedMutexGuard<()> {
        let slot = {
            let mut slots = self.slots.lock().unwrap_or_else(PoisonError::into_inner);
            slots.retain(|_, m| Arc::strong_count(m) > 1);
            Arc::clone(slots.entry(key.clone()).or_default())
        };
        slot.lock_owned().await
    }

    #[cfg(test)]
    pub(crate) fn slot_count(&self) -> usize {
        self.slots
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .len()
    }
}

/// Exclusive lock file, removed on drop.
///
/// The file holds a token unique to this holder. While held, a background
/// task keeps its mtime fresh so other processes never see a live lock as
/// stale, and drop only removes the file if it still carries our token.
#[derive(Debug)]
pub struct FileLock {
    path: PathBuf,
    token: String,
    heartbeat: JoinHandle<()>,
}

impl FileLock {
    /// Waits up to `timeout` for the lock. A lock file whose mtime is older
    /// than `stale_after` is assumed abandoned by a crashed process and
    /// removed.
    ///
    /// Returns `Ok(None)` on timeout.
    pub async fn acquire(
        path: &Path,
        timeout: Duration,
        stale_after: Duration,
    ) -> io::Result<Option<Self>> {
        let started = Instant::now();
        let mut delay = POLL_START;

        loop {
            match tokio::fs::OpenOptions::new()
                .write(true)
                .create_new(true)
                .open(path)
                .await
            {
                Ok(mut file) => {
                    let token = unique_suffix();
                    file.write_all(token.as_bytes()).await?;
                    file.flush().await?;
                    log::debug!("acquired cache lock {}", path.display());
                    let heartbeat = tokio::spawn(heartbeat(
                        path.to_path_buf(),
                        token.clone(),
                        heartbeat_interval(stale_after),
                    ));
                    return Ok(Some(Self {
                        path: path.to_path_buf(),
                        token,
                        heartbeat,
                    }));
                }
                Err(e) if e.kind() == io::ErrorKind::AlreadyExists => {
                    if is_stale(path, stale_after).await {
                        log::warn!("breaking stale cache lock {}", path.display());
                        match tokio::fs::remove_file(path).await {
                            Ok(()) => continue,
                            Err(e) if e.kind() == io::ErrorKind::NotFound => continue,
                            Err(e) => return Err(e),
                        }
                    }
                    if started.elapsed() >= timeout {
                        return Ok(None);
                    }
                    tokio::time::sleep(delay).await;
                    delay = (delay * 2).min(POLL_MAX);
                }
                Err(e) => return Err(e),
            }
        }
    }
}

impl Drop for FileLock {
    fn drop(&mut self) {
        self.heartbeat.abort();
        let released = match std::fs::read_to_string(&self.path) {
            Ok(held) if held == self.token => std::fs::remove_file(&self.path),
            Ok(_) => {
                log::warn!(
                    "cache lock {} was taken over by another holder, leaving it",
                    self.path.display()
                );
                Ok(())
            }
            Err(e) => Err(e),
        };
        if let Err(e) = released {
            if e.kind() != io::ErrorKind::NotFound {
                log::warn!("failed to release cache lock {}: {}", self.path.display(), e);
            }
        }
    }
}

fn heartbeat_interval(stale_after: Duration) -> Duration {
    (stale_after / 4).max(HEARTBEAT_MIN)
}

/// Refreshes the lock's mtime until the lock is dropped or stolen.
async fn heartbeat(path: PathBuf, token: String, every: Duration) {
    loop {
        tokio::time::sleep(every).await;
        let (p, t) = (path.clone(), token.clone());
        match tokio::task::spawn_blocking(move || touch_if_held(&p, &t)).await {
            Ok(Ok(true)) => {}
            Ok(Ok(false)) => return,
            Ok(Err(e)) => log::warn!("could not refresh cache lock {}: {}", path.display(), e),
            Err(_) => return,
        }
    }
}

fn touch_if_held(path: &Path, token: &str) -> io::Result<bool> {
    if !holds_token(path, token) {
        return Ok(false);
    }
    std::fs::OpenOptions::new()
        .write(true)
        .open(path)?
        .set_modified(SystemTime::now())?;
    Ok(true)
}

fn holds_token(path: &Path, token: &str) -> bool {
    std::fs::read_to_string(path)
        .map(|held| held == token)
        .unwrap_or(false)
}

async fn is_stale(path: &Path, stale_after: Duration) -> bool {
    let Ok(meta) = tokio::fs::metadata(path).await else {
        return false;
    };
    let Ok(modified) = meta.modified() else {
        return false;
    };
    SystemTime::now()
        .duration_since(modified)
        .map(|age| age > stale_after)
        .unwrap_or(false)
}

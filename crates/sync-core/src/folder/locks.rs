//! Per-path mutual exclusion

use std::collections::HashMap;
use std::sync::{Arc, Mutex};

use sync_fs::RelPath;
use tokio::sync::{Mutex as AsyncMutex, OwnedMutexGuard};

/// At most one holder per path at a time.
///
/// Locks are created on demand and dropped from the map once nobody holds
/// or waits for them.
#[derive(Debug, Default, Clone)]
pub struct PathLocks {
    inner: Arc<Mutex<HashMap<RelPath, Arc<AsyncMutex<()>>>>>,
}

/// Held for the duration of one operation on a path.
#[derive(Debug)]
pub struct PathGuard {
    _guard: OwnedMutexGuard<()>,
    path: RelPath,
    locks: PathLocks,
}

impl PathLocks {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn lock(&self, path: &RelPath) -> PathGuard {
        let mutex = {
            let mut map = self.inner.lock().unwrap_or_else(|e| e.into_inner());
            map.entry(path.clone()).or_default().clone()
        };
        let guard = mutex.lock_owned().await;
        PathGuard {
            _guard: guard,
            path: path.clone(),
            locks: self.clone(),
        }
    }

    /// Number of paths with a live lock.
    pub fn len(&self) -> usize {
        self.inner.lock().unwrap_or_else(|e| e.into_inner()).len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl Drop for PathGuard {
    fn drop(&mut self) {
        let mut map = self.locks.inner.lock().unwrap_or_else(|e| e.into_inner());
        // The map and this guard hold one reference each when no one else
        // is waiting.
        if let Some(mutex) = map.get(&self.path)
            && Arc::strong_count(mutex) <= 2
        {
            map.remove(&self.path);
        }
    }
}

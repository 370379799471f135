//! Per-path serialization of tree mutations.
//!
//! Writers to the same path queue up behind each other, writers to
//! different paths do not interact. Entries are dropped from the table
//! once nobody holds or waits for them.

use std::collections::HashMap;
use std::sync::{Arc, Weak};

use parking_lot::Mutex;
use tokio::sync::{Mutex as AsyncMutex, OwnedMutexGuard};

use crate::davpath::DavPath;

#[derive(Debug, Default)]
pub(crate) struct PathGuards {
    table: Mutex<HashMap<String, Weak<AsyncMutex<()>>>>,
}

/// Held while a path is being mutated.
pub(crate) struct PathGuard {
    _guards: Vec<OwnedMutexGuard<()>>,
}

impl PathGuards {
    pub(crate) fn new() -> PathGuards {
        PathGuards::default()
    }

    fn entry(&self, key: &str) -> Arc<AsyncMutex<()>> {
        let mut table = self.table.lock();
        if let Some(m) = table.get(key).and_then(Weak::upgrade) {
            return m;
        }
        table.retain(|_, w| w.strong_count() > 0);
        let m = Arc::new(AsyncMutex::new(()));
        table.insert(key.to_string(), Arc::downgrade(&m));
        m
    }

    /// Wait for exclusive access to all `paths`.
    pub(crate) async fn lock(&self, paths: &[&DavPath]) -> PathGuard {
        // always acquire in the same order, so two requests that touch
        // the same pair of paths cannot deadlock.
        let mut keys: Vec<String> = paths.iter().map(|p| p.as_key()).collect();
        keys.sort();
        keys.dedup();
        let mut guards = Vec::with_capacity(keys.len());
        for key in keys {
            guards.push(self.entry(&key).lock_owned().await);
        }
        PathGuard { _guards: guards }
    }

    #[cfg(test)]
    fn len(&self) -> usize {
        self.table.lock().values().filter(|w| w.strong_count() > 0).count()
    }
}

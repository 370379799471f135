//! Lock table with an optional persistent backing file.
//!
//! All operations run under one mutex, so that acquiring, releasing and
//! checking locks on overlapping paths are atomic relative to each other.
//! When a file is configured, every change is written to it (as JSON,
//! replaced atomically) before it takes effect, and the table is reloaded
//! from it on startup. Expired locks are dropped lazily on every access.

use std::collections::HashMap;
use std::io;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::{Duration, SystemTime};

use parking_lot::Mutex;
use uuid::Uuid;

use crate::davpath::DavPath;
use crate::ls::*;
use crate::util::write_json_atomic;

type Table = HashMap<String, DavLock>;

/// Lock table, optionally persisted to a file.
#[derive(Debug)]
pub struct FileLs {
    file: Option<PathBuf>,
    table: Mutex<Table>,
}

// Drop expired locks. Returns true if anything was dropped.
fn purge(table: &mut Table, now: SystemTime) -> bool {
    let before = table.len();
    table.retain(|_, l| !l.is_expired(now));
    table.len() != before
}

impl FileLs {
    /// A lock table that lives in memory only.
    pub fn ephemeral() -> Arc<FileLs> {
        Arc::new(FileLs {
            file: None,
            table: Mutex::new(HashMap::new()),
        })
    }

    /// Load the lock table from `file`. A missing file is an empty table.
    pub fn open(file: impl Into<PathBuf>) -> Arc<FileLs> {
        let file = file.into();
        let mut table = match std::fs::read(&file) {
            Ok(data) => match serde_json::from_slice::<Vec<DavLock>>(&data) {
                Ok(locks) => locks.into_iter().map(|l| (l.token.clone(), l)).collect(),
                Err(e) => {
                    warn!("lock store {}: {e}, starting empty", file.display());
                    HashMap::new()
                }
            },
            Err(e) if e.kind() == io::ErrorKind::NotFound => HashMap::new(),
            Err(e) => {
                warn!("lock store {}: {e}, starting empty", file.display());
                HashMap::new()
            }
        };
        purge(&mut table, SystemTime::now());
        debug!("lock store {}: {} active locks", file.display(), table.len());
        Arc::new(FileLs {
            file: Some(file),
            table: Mutex::new(table),
        })
    }

    fn save(&self, table: &Table) -> io::Result<()> {
        match self.file {
            Some(ref file) => {
                let mut locks: Vec<&DavLock> = table.values().collect();
                locks.sort_by(|a, b| a.created.cmp(&b.created));
                write_json_atomic(file, &locks)
            }
            None => Ok(()),
        }
    }

    // Apply `f` to the table. The change only sticks if it could be
    // persisted.
    fn update<T, F>(&self, f: F) -> Result<T, LockError>
    where
        F: FnOnce(&mut Table) -> Result<T, LockError>,
    {
        let mut table = self.table.lock();
        purge(&mut table, SystemTime::now());
        let backup = table.clone();
        let res = f(&mut table)?;
        if let Err(e) = self.save(&table) {
            error!("cannot persist lock table: {e}");
            *table = backup;
            return Err(LockError::Storage(e));
        }
        Ok(res)
    }

    // Read-only access. Expired locks are still purged from memory; the
    // file catches up on the next change.
    fn read<T, F>(&self, f: F) -> T
    where
        F: FnOnce(&Table) -> T,
    {
        let mut table = self.table.lock();
        purge(&mut table, SystemTime::now());
        f(&table)
    }
}

impl DavLockSystem for FileLs {
    fn lock(
        &self,
        path: &DavPath,
        principal: Option<&str>,
        owner: Option<String>,
        timeout: Option<Duration>,
        shared: bool,
        deep: bool,
    ) -> Result<DavLock, LockError> {
        self.update(|table| {
            if let Some(l) = table
                .values()
                .find(|l| l.overlaps(path, deep) && !(l.shared && shared))
            {
                debug!("lock on {path} conflicts with {}", l.token);
                return Err(LockError::Conflict(l.clone()));
            }
            let now = SystemTime::now();
            let lock = DavLock {
                token: format!("opaquelocktoken:{}", Uuid::new_v4().hyphenated()),
                path: path.clone(),
                principal: principal.map(|s| s.to_string()),
                owner,
                timeout_at: timeout.map(|d| now + d),
                timeout,
                shared,
                deep,
                created: now,
            };
            debug!("lock {} created on {path}", lock.token);
            table.insert(lock.token.clone(), lock.clone());
            Ok(lock)
        })
    }

    fn unlock(&self, path: &DavPath, token: &str) -> Result<(), LockError> {
        self.update(|table| {
            if !table.get(token).map_or(false, |l| l.covers(path)) {
                return Err(LockError::NotFound);
            }
            debug!("lock {token} released");
            table.remove(token);
            Ok(())
        })
    }

    fn refresh(
        &self,
        path: &DavPath,
        token: &str,
        timeout: Option<Duration>,
    ) -> Result<DavLock, LockError> {
        self.update(|table| match table.get_mut(token) {
            Some(l) if l.covers(path) => {
                l.timeout = timeout;
                l.timeout_at = timeout.map(|d| SystemTime::now() + d);
                debug!("lock {token} refreshed");
                Ok(l.clone())
            }
            _ => Err(LockError::NotFound),
        })
    }

    fn check(&self, path: &DavPath, deep: bool, tokens: &[String]) -> Result<(), DavLock> {
        self.read(|table| {
            match table
                .values()
                .find(|l| l.overlaps(path, deep) && !tokens.iter().any(|t| *t == l.token))
            {
                Some(l) => Err(l.clone()),
                None => Ok(()),
            }
        })
    }

    fn discover(&self, path: &DavPath) -> Vec<DavLock> {
        self.read(|table| {
            let mut v: Vec<DavLock> = table.values().filter(|l| l.covers(path)).cloned().collect();
            v.sort_by(|a, b| a.created.cmp(&b.created));
            v
        })
    }

    fn delete(&self, path: &DavPath) -> Result<(), LockError> {
        self.update(|table| {
            table.retain(|_, l| !l.path.starts_with(path));
            Ok(())
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn p(s: &str) -> DavPath {
        DavPath::new(s).unwrap()
    }

    fn lock(ls: &FileLs, path: &str, shared: bool, deep: bool) -> Result<DavLock, LockError> {
        ls.lock(&p(path), None, None, Some(Duration::from_secs(60)), shared, deep)
    }

    #[test]
    fn exclusive_conflicts_until_released() {
        let ls = FileLs::ephemeral();
        let l = lock(&ls, "/a", false, false).unwrap();
        assert!(l.token.starts_with("opaquelocktoken:"));
        assert!(matches!(lock(&ls, "/a", false, false), Err(LockError::Conflict(_))));
        assert!(matches!(lock(&ls, "/a", true, false), Err(LockError::Conflict(_))));
        ls.unlock(&p("/a"), &l.token).unwrap();
        assert!(lock(&ls, "/a", false, false).is_ok());
    }

    #[test]
    fn shared_locks_coexist() {
        let ls = FileLs::ephemeral();
        lock(&ls, "/a", true, false).unwrap();
        lock(&ls, "/a", true, false).unwrap();
        assert_eq!(ls.discover(&p("/a")).len(), 2);
        assert!(matches!(lock(&ls, "/a", false, false), Err(LockError::Conflict(_))));
    }

    #[test]
    fn depth_semantics() {
        let ls = FileLs::ephemeral();
        let l = lock(&ls, "/dir/", false, true).unwrap();
        assert!(matches!(lock(&ls, "/dir/f", false, false), Err(LockError::Conflict(_))));
        ls.unlock(&p("/dir"), &l.token).unwrap();

        // a shallow lock on the collection leaves the children alone.
        lock(&ls, "/dir/", false, false).unwrap();
        assert!(lock(&ls, "/dir/f", false, false).is_ok());
        // but a deep lock above a locked child conflicts.
        assert!(matches!(lock(&ls, "/", false, true), Err(LockError::Conflict(_))));
    }

    #[test]
    fn check_requires_token() {
        let ls = FileLs::ephemeral();
        let l = lock(&ls, "/dir", false, true).unwrap();
        assert!(ls.check(&p("/dir/f"), false, &[]).is_err());
        assert!(ls.check(&p("/dir/f"), false, &[l.token.clone()]).is_ok());
        assert!(ls.check(&p("/other"), false, &[]).is_ok());
        // deep check on an ancestor sees the lock below.
        assert!(ls.check(&p("/"), true, &[]).is_err());
        assert!(ls.check(&p("/"), false, &[]).is_ok());
    }

    #[test]
    fn unlock_and_refresh_need_matching_path() {
        let ls = FileLs::ephemeral();
        let l = lock(&ls, "/a", false, false).unwrap();
        assert!(matches!(ls.unlock(&p("/b"), &l.token), Err(LockError::NotFound)));
        assert!(matches!(ls.unlock(&p("/a"), "opaquelocktoken:nope"), Err(LockError::NotFound)));
        let r = ls.refresh(&p("/a"), &l.token, None).unwrap();
        assert_eq!(r.timeout_at, None);
    }

    #[test]
    fn expired_locks_do_not_block() {
        let ls = FileLs::ephemeral();
        ls.lock(&p("/a"), None, None, Some(Duration::from_secs(0)), false, false)
            .unwrap();
        assert!(lock(&ls, "/a", false, false).is_ok());
    }

    #[test]
    fn delete_drops_subtree() {
        let ls = FileLs::ephemeral();
        lock(&ls, "/d/a", false, false).unwrap();
        lock(&ls, "/d/b", false, false).unwrap();
        lock(&ls, "/e", false, false).unwrap();
        ls.delete(&p("/d")).unwrap();
        assert!(ls.discover(&p("/d/a")).is_empty());
        assert_eq!(ls.discover(&p("/e")).len(), 1);
    }

    #[test]
    fn survives_restart() {
        let dir = tempfile::tempdir().unwrap();
        let file = dir.path().join("locks.json");
        let token = {
            let ls = FileLs::open(&file);
            lock(&ls, "/a", false, false).unwrap().token
        };
        let ls = FileLs::open(&file);
        let found = ls.discover(&p("/a"));
        assert_eq!(found.len(), 1);
        assert_eq!(found[0].token, token);
        assert!(matches!(lock(&ls, "/a", false, false), Err(LockError::Conflict(_))));
    }

    #[test]
    fn failed_persist_rolls_back() {
        let dir = tempfile::tempdir().unwrap();
        let ls = FileLs::open(dir.path().join("missing-dir").join("locks.json"));
        assert!(matches!(lock(&ls, "/a", false, false), Err(LockError::Storage(_))));
        assert!(ls.discover(&p("/a")).is_empty());
    }
}

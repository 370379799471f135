//! Contains the structs and traits that define a `locksystem` backend.
//!
//! Note that the methods DO NOT return futures, they are synchronous.
//! This is because currently only the persisted lock table is available,
//! which does its work under a single mutex so that acquire, release and
//! check are atomic with respect to each other.
//!
use std::error::Error;
use std::fmt::{self, Debug};
use std::io;
use std::time::{Duration, SystemTime};

use serde::{Deserialize, Serialize};

use crate::davpath::DavPath;

pub(crate) mod filels;

pub use filels::FileLs;

/// Type of the locks returned by DavLockSystem methods.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DavLock {
    /// Opaque token, `opaquelocktoken:<uuid>`.
    pub token: String,
    pub path: DavPath,
    pub principal: Option<String>,
    /// The client supplied `<owner>` element, serialized.
    pub owner: Option<String>,
    /// `None` means the lock never expires.
    pub timeout_at: Option<SystemTime>,
    pub timeout: Option<Duration>,
    pub shared: bool,
    pub deep: bool,
    pub created: SystemTime,
}

impl DavLock {
    pub fn is_expired(&self, now: SystemTime) -> bool {
        self.timeout_at.map_or(false, |t| t <= now)
    }

    /// Does this lock apply to `path`.
    pub fn covers(&self, path: &DavPath) -> bool {
        self.path == *path || (self.deep && self.path.is_ancestor_of(path))
    }

    /// Would this lock and a new lock on `path` overlap.
    pub(crate) fn overlaps(&self, path: &DavPath, deep: bool) -> bool {
        self.covers(path) || (deep && path.is_ancestor_of(&self.path))
    }
}

/// Errors returned by a locksystem.
#[derive(Debug)]
pub enum LockError {
    /// An incompatible lock is in the way.
    Conflict(DavLock),
    /// No such lock.
    NotFound,
    /// The lock table could not be persisted.
    Storage(io::Error),
}

impl fmt::Display for LockError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            LockError::Conflict(l) => write!(f, "conflicts with lock {} on {}", l.token, l.path),
            LockError::NotFound => f.write_str("no such lock"),
            LockError::Storage(e) => write!(f, "lock store: {e}"),
        }
    }
}

impl Error for LockError {
    fn source(&self) -> Option<&(dyn Error + 'static)> {
        match self {
            LockError::Storage(e) => Some(e),
            _ => None,
        }
    }
}

/// The trait that defines a locksystem.
pub trait DavLockSystem: Debug + Send + Sync {
    /// Lock a node. Returns the new lock, or a conflict with the lock
    /// that is in the way.
    fn lock(
        &self,
        path: &DavPath,
        principal: Option<&str>,
        owner: Option<String>,
        timeout: Option<Duration>,
        shared: bool,
        deep: bool,
    ) -> Result<DavLock, LockError>;

    /// Unlock a node. The lock must apply to `path`.
    fn unlock(&self, path: &DavPath, token: &str) -> Result<(), LockError>;

    /// Refresh the lock with `token`, which must apply to `path`.
    fn refresh(
        &self,
        path: &DavPath,
        token: &str,
        timeout: Option<Duration>,
    ) -> Result<DavLock, LockError>;

    /// Check if the node is locked and if so, whether we hold the token.
    ///
    /// With `deep`, locks on anything below `path` count as well.
    /// Returns the first lock we are missing a token for.
    fn check(&self, path: &DavPath, deep: bool, tokens: &[String]) -> Result<(), DavLock>;

    /// Find the locks that apply to this node.
    fn discover(&self, path: &DavPath) -> Vec<DavLock>;

    /// Delete all locks on this node and below it.
    fn delete(&self, path: &DavPath) -> Result<(), LockError>;
}

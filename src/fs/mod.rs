//! Contains the structs and traits that define the Resource Tree backend.
//!
//! The handler only talks to a [`DavFileSystem`]. The crate ships one
//! implementation, [`LocalFs`](localfs::LocalFs), which serves a directory
//! on the local disk and keeps dead properties in a sidecar store.
use std::error::Error;
use std::fmt;
use std::future::Future;
use std::io::SeekFrom;
use std::pin::Pin;
use std::time::SystemTime;

use bytes::Bytes;
use serde::{Deserialize, Serialize};

use crate::davpath::DavPath;

mod guard;
pub(crate) mod localfs;
pub(crate) mod props;

pub(crate) use guard::PathGuards;

/// Errors generated by a filesystem implementation.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FsError {
    /// Operation not implemented (501)
    NotImplemented,
    /// Something went wrong (500)
    GeneralFailure,
    /// Tried to create something, but it existed (405 / 412)
    Exists,
    /// File / Directory not found (404)
    NotFound,
    /// A path component is not a collection (409)
    NotCollection,
    /// The parent collection does not exist (409)
    ParentMissing,
    /// Not allowed (403)
    Forbidden,
    /// Out of space (507)
    InsufficientStorage,
}

/// The Result type.
pub type FsResult<T> = std::result::Result<T, FsError>;

/// Future returned by almost all of the DavFileSystem methods.
pub type FsFuture<'a, T> = Pin<Box<dyn Future<Output = FsResult<T>> + Send + 'a>>;

/// Kind of a resource.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ResourceKind {
    File,
    Collection,
}

/// Metadata of one resource in the tree.
#[derive(Debug, Clone)]
pub struct Resource {
    /// Path of the resource. Collections end in a slash.
    pub path: DavPath,
    pub kind: ResourceKind,
    /// Size in bytes. Zero for collections.
    pub len: u64,
    pub modified: SystemTime,
    pub created: Option<SystemTime>,
    pub accessed: Option<SystemTime>,
    /// Entity tag, without quotes.
    pub etag: String,
}

impl Resource {
    pub fn is_collection(&self) -> bool {
        self.kind == ResourceKind::Collection
    }

    pub fn is_file(&self) -> bool {
        self.kind == ResourceKind::File
    }

    /// MIME type to report in Content-Type / getcontenttype.
    pub fn content_type(&self) -> &'static str {
        if self.is_collection() {
            "httpd/unix-directory"
        } else {
            self.path.get_mime_type_str()
        }
    }
}

/// A dead property as stored by the filesystem.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DavProp {
    pub name: String,
    pub namespace: Option<String>,
    /// The complete element, serialized. `None` when only the name matters.
    pub xml: Option<String>,
}

/// One dead-property update, applied in order.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PropUpdate {
    Set(DavProp),
    Remove(DavProp),
}

/// Readable handle on a file.
pub trait DavFile: Send + Sync {
    /// Read at most `count` bytes. An empty result means end-of-file.
    fn read_bytes(&mut self, count: usize) -> FsFuture<'_, Bytes>;
    fn seek(&mut self, pos: SeekFrom) -> FsFuture<'_, u64>;
    /// Metadata of the version this handle has open.
    fn metadata(&mut self) -> FsFuture<'_, Resource>;
}

/// Handle on a file being written.
///
/// Data goes to a temporary location. `commit` atomically replaces the
/// target; dropping the writer without committing discards the data.
pub trait DavWriter: Send {
    fn write_bytes(&mut self, buf: Bytes) -> FsFuture<'_, ()>;
    /// Returns true if the target did not exist before.
    fn commit(self: Box<Self>) -> FsFuture<'static, bool>;
}

/// The trait that defines a filesystem.
pub trait DavFileSystem: Send + Sync {
    /// Stat a resource.
    fn metadata<'a>(&'a self, path: &'a DavPath) -> FsFuture<'a, Resource>;

    /// Direct children of a collection.
    fn read_dir<'a>(&'a self, path: &'a DavPath) -> FsFuture<'a, Vec<Resource>>;

    /// Open a file for reading.
    fn open<'a>(&'a self, path: &'a DavPath) -> FsFuture<'a, Box<dyn DavFile>>;

    /// Start writing a file. Fails with `ParentMissing` or `NotCollection`
    /// if the parent is absent or not a collection.
    fn create<'a>(&'a self, path: &'a DavPath) -> FsFuture<'a, Box<dyn DavWriter>>;

    /// Create a collection. The parent must exist.
    fn create_dir<'a>(&'a self, path: &'a DavPath) -> FsFuture<'a, ()>;

    /// Remove a file, or a collection and everything below it.
    fn remove<'a>(&'a self, path: &'a DavPath) -> FsFuture<'a, ()>;

    /// Move a resource. With `overwrite` an existing destination is
    /// replaced, otherwise it is an `Exists` error.
    fn rename<'a>(&'a self, from: &'a DavPath, to: &'a DavPath, overwrite: bool)
        -> FsFuture<'a, ()>;

    /// Copy a resource. Collections are copied recursively when `deep`
    /// is set, otherwise only the (empty) collection itself is created.
    fn copy<'a>(
        &'a self,
        from: &'a DavPath,
        to: &'a DavPath,
        deep: bool,
        overwrite: bool,
    ) -> FsFuture<'a, ()>;

    /// Does this filesystem store dead properties.
    fn have_props<'a>(
        &'a self,
        _path: &'a DavPath,
    ) -> Pin<Box<dyn Future<Output = bool> + Send + 'a>> {
        Box::pin(std::future::ready(false))
    }

    /// All dead properties of a resource.
    fn get_props<'a>(&'a self, _path: &'a DavPath) -> FsFuture<'a, Vec<DavProp>> {
        Box::pin(std::future::ready(Err(FsError::NotImplemented)))
    }

    /// Apply all updates, or none of them.
    fn patch_props<'a>(
        &'a self,
        _path: &'a DavPath,
        _patch: Vec<PropUpdate>,
    ) -> FsFuture<'a, ()> {
        Box::pin(std::future::ready(Err(FsError::NotImplemented)))
    }

    /// Loosen permission bits on a resource and its parent collection.
    fn relax_permissions<'a>(&'a self, _path: &'a DavPath) -> FsFuture<'a, ()> {
        Box::pin(std::future::ready(Ok(())))
    }
}

impl fmt::Display for FsError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            FsError::NotImplemented => "not implemented",
            FsError::GeneralFailure => "general failure",
            FsError::Exists => "resource exists",
            FsError::NotFound => "not found",
            FsError::NotCollection => "not a collection",
            FsError::ParentMissing => "parent collection missing",
            FsError::Forbidden => "forbidden",
            FsError::InsufficientStorage => "insufficient storage",
        };
        f.write_str(s)
    }
}

impl Error for FsError {}

impl From<&std::io::Error> for FsError {
    fn from(e: &std::io::Error) -> Self {
        use std::io::ErrorKind;
        #[cfg(unix)]
        if let Some(errno) = e.raw_os_error() {
            match errno {
                libc::EMLINK | libc::ENOSPC | libc::EDQUOT | libc::EFBIG => {
                    return FsError::InsufficientStorage
                }
                libc::EACCES | libc::EPERM | libc::EROFS => return FsError::Forbidden,
                libc::ELOOP | libc::ENAMETOOLONG | libc::EISDIR => return FsError::Forbidden,
                libc::ENOTEMPTY | libc::EEXIST => return FsError::Exists,
                libc::ENOTDIR => return FsError::NotCollection,
                libc::ENOENT => return FsError::NotFound,
                libc::ENOSYS => return FsError::NotImplemented,
                _ => {}
            }
        }
        match e.kind() {
            ErrorKind::NotFound => FsError::NotFound,
            ErrorKind::PermissionDenied => FsError::Forbidden,
            ErrorKind::AlreadyExists => FsError::Exists,
            ErrorKind::Unsupported => FsError::NotImplemented,
            _ => {
                error!("storage failure: {e}");
                FsError::GeneralFailure
            }
        }
    }
}

impl From<std::io::Error> for FsError {
    fn from(e: std::io::Error) -> Self {
        (&e).into()
    }
}

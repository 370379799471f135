//! Local filesystem access.
//!
//! Serves a directory on the local disk. All paths are confined to that
//! directory, symbolic links included. Files are written to a temporary
//! name next to the target and renamed into place, so a reader never
//! sees a half-written file.

use std::io::{self, SeekFrom};
#[cfg(unix)]
use std::os::unix::fs::{MetadataExt, PermissionsExt};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::UNIX_EPOCH;

use bytes::Bytes;
use futures_util::FutureExt;
use tokio::io::{AsyncReadExt, AsyncSeekExt, AsyncWriteExt};

use crate::davpath::DavPath;
use crate::fs::props::PropStore;
use crate::fs::*;

// Temporary files start with this and are never listed.
const TMP_PREFIX: &str = ".~dav-";

/// Local Filesystem implementation.
#[derive(Debug)]
pub(crate) struct LocalFs {
    basedir: PathBuf,
    public: bool,
    hide_symlinks: bool,
    props: PropStore,
}

#[derive(Debug)]
struct LocalFsFile {
    file: tokio::fs::File,
    path: DavPath,
}

#[derive(Debug)]
struct LocalFsWriter {
    file: Option<tokio::fs::File>,
    tmp: Option<PathBuf>,
    target: PathBuf,
}

fn is_tmp_name(name: &str) -> bool {
    name.starts_with(TMP_PREFIX)
}

fn tmp_name(dir: &Path) -> PathBuf {
    dir.join(format!("{}{}.tmp", TMP_PREFIX, uuid::Uuid::new_v4().simple()))
}

fn resource(mut path: DavPath, meta: &std::fs::Metadata) -> Resource {
    let kind = if meta.is_dir() {
        path.add_slash();
        ResourceKind::Collection
    } else {
        ResourceKind::File
    };
    Resource {
        path,
        kind,
        len: if meta.is_dir() { 0 } else { meta.len() },
        modified: meta.modified().unwrap_or(UNIX_EPOCH),
        created: meta.created().ok(),
        accessed: meta.accessed().ok(),
        etag: etag(meta),
    }
}

// same as the default apache etag.
fn etag(meta: &std::fs::Metadata) -> String {
    let t = meta
        .modified()
        .ok()
        .and_then(|m| m.duration_since(UNIX_EPOCH).ok())
        .map(|t| t.as_secs() * 1000000 + t.subsec_nanos() as u64 / 1000)
        .unwrap_or(0);
    #[cfg(unix)]
    if meta.is_file() {
        format!("{:x}-{:x}-{:x}", meta.ino(), meta.len(), t)
    } else {
        format!("{:x}-{:x}", meta.ino(), t)
    }
    #[cfg(not(unix))]
    if meta.is_file() {
        format!("{:x}-{:x}", meta.len(), t)
    } else {
        format!("{:x}", t)
    }
}

impl LocalFs {
    /// Create a new LocalFs DavFileSystem, serving "base".
    ///
    /// If "public" is set to true, all files and directories created will be
    /// publically readable (mode 644/755), otherwise they will be private
    /// (mode 600/700). Umask still overrides this.
    ///
    /// The directory is created if it does not exist yet. Dead properties
    /// go to `props_file`, or are kept in memory only if it is `None`.
    pub fn new(
        base: PathBuf,
        public: bool,
        hide_symlinks: bool,
        props_file: Option<PathBuf>,
    ) -> Arc<LocalFs> {
        if let Err(e) = std::fs::create_dir_all(&base) {
            warn!("cannot create {}: {e}", base.display());
        }
        let basedir = match std::fs::canonicalize(&base) {
            Ok(b) => b,
            Err(e) => {
                warn!("cannot resolve {}: {e}", base.display());
                base
            }
        };
        let props = match props_file {
            Some(f) => PropStore::open(f),
            None => PropStore::ephemeral(),
        };
        Arc::new(LocalFs {
            basedir,
            public,
            hide_symlinks,
            props,
        })
    }

    // Map to a filesystem path, refusing anything that ends up outside
    // of the base directory once symlinks are followed.
    async fn abs_path(&self, path: &DavPath) -> FsResult<PathBuf> {
        if path.file_name().map_or(false, is_tmp_name) {
            return Err(FsError::Forbidden);
        }
        let full = self.basedir.join(path.as_rel_ospath());
        let mut ancestor = full.as_path();
        loop {
            match tokio::fs::canonicalize(ancestor).await {
                Ok(real) if real.starts_with(&self.basedir) => return Ok(full),
                Ok(real) => {
                    debug!("{path:?} resolves to {} outside of the root", real.display());
                    return Err(FsError::Forbidden);
                }
                Err(_) => match ancestor.parent() {
                    Some(p) if p.starts_with(&self.basedir) => ancestor = p,
                    _ => return Ok(full),
                },
            }
        }
    }

    // metadata, following symlinks unless they are hidden.
    async fn stat(&self, abs: &Path) -> FsResult<std::fs::Metadata> {
        let meta = tokio::fs::symlink_metadata(abs).await?;
        if !meta.file_type().is_symlink() {
            return Ok(meta);
        }
        if self.hide_symlinks {
            return Err(FsError::NotFound);
        }
        Ok(tokio::fs::metadata(abs).await?)
    }

    // The parent of `abs` must be an existing directory.
    async fn check_parent(&self, abs: &Path) -> FsResult<()> {
        let parent = abs.parent().ok_or(FsError::Forbidden)?;
        match tokio::fs::metadata(parent).await {
            Ok(m) if m.is_dir() => Ok(()),
            Ok(_) => Err(FsError::NotCollection),
            Err(e) => match FsError::from(e) {
                FsError::NotFound => Err(FsError::ParentMissing),
                e => Err(e),
            },
        }
    }

    async fn remove_abs(&self, abs: &Path) -> FsResult<()> {
        let meta = tokio::fs::symlink_metadata(abs).await?;
        if meta.is_dir() {
            tokio::fs::remove_dir_all(abs).await?;
        } else {
            tokio::fs::remove_file(abs).await?;
        }
        Ok(())
    }

    async fn mkdir(&self, abs: &Path) -> io::Result<()> {
        #[allow(unused_mut)]
        let mut dir = tokio::fs::DirBuilder::new();
        #[cfg(unix)]
        dir.mode(if self.public { 0o755 } else { 0o700 });
        dir.create(abs).await
    }

    // copy via a temporary file, so the destination flips atomically.
    async fn copy_file(&self, from: &Path, to: &Path) -> io::Result<()> {
        let dir = to.parent().unwrap_or(self.basedir.as_path());
        let tmp = tmp_name(dir);
        let res = match tokio::fs::copy(from, &tmp).await {
            Ok(_) => tokio::fs::rename(&tmp, to).await,
            Err(e) => Err(e),
        };
        if res.is_err() {
            let _ = tokio::fs::remove_file(&tmp).await;
        }
        res
    }

    async fn copy_abs(&self, from: &Path, to: &Path, deep: bool) -> FsResult<()> {
        let meta = tokio::fs::metadata(from).await?;
        if !meta.is_dir() {
            return Ok(self.copy_file(from, to).await?);
        }
        self.mkdir(to).await?;
        if !deep {
            return Ok(());
        }
        // walk the tree without recursion.
        let mut todo = vec![(from.to_path_buf(), to.to_path_buf())];
        while let Some((src, dst)) = todo.pop() {
            let mut entries = tokio::fs::read_dir(&src).await?;
            while let Some(entry) = entries.next_entry().await? {
                let name = entry.file_name();
                if name.to_str().map_or(false, is_tmp_name) {
                    continue;
                }
                let ft = entry.file_type().await?;
                if ft.is_symlink() && self.hide_symlinks {
                    continue;
                }
                let (s, d) = (src.join(&name), dst.join(&name));
                if tokio::fs::metadata(&s).await?.is_dir() {
                    self.mkdir(&d).await?;
                    todo.push((s, d));
                } else {
                    self.copy_file(&s, &d).await?;
                }
            }
        }
        Ok(())
    }

    fn props_result(&self, res: io::Result<()>) -> FsResult<()> {
        res.map_err(|e| {
            error!("property store: {e}");
            FsError::GeneralFailure
        })
    }
}

impl DavFileSystem for LocalFs {
    fn metadata<'a>(&'a self, path: &'a DavPath) -> FsFuture<'a, Resource> {
        async move {
            trace!("FS: metadata {path:?}");
            let abs = self.abs_path(path).await?;
            let meta = self.stat(&abs).await?;
            Ok(resource(path.clone(), &meta))
        }
        .boxed()
    }

    fn read_dir<'a>(&'a self, path: &'a DavPath) -> FsFuture<'a, Vec<Resource>> {
        async move {
            trace!("FS: read_dir {path:?}");
            let abs = self.abs_path(path).await?;
            if !self.stat(&abs).await?.is_dir() {
                return Err(FsError::NotCollection);
            }
            let mut entries = tokio::fs::read_dir(&abs).await?;
            let mut v = Vec::new();
            while let Some(entry) = entries.next_entry().await? {
                let name = match entry.file_name().into_string() {
                    Ok(name) => name,
                    Err(name) => {
                        debug!("skipping non-utf8 name {name:?}");
                        continue;
                    }
                };
                if is_tmp_name(&name) {
                    continue;
                }
                let meta = match self.stat(&entry.path()).await {
                    Ok(meta) => meta,
                    Err(e) => {
                        debug!("skipping {name}: {e}");
                        continue;
                    }
                };
                let mut npath = path.clone();
                npath.push_segment(&name);
                v.push(resource(npath, &meta));
            }
            v.sort_by(|a, b| a.path.file_name().cmp(&b.path.file_name()));
            Ok(v)
        }
        .boxed()
    }

    fn open<'a>(&'a self, path: &'a DavPath) -> FsFuture<'a, Box<dyn DavFile>> {
        async move {
            trace!("FS: open {path:?}");
            let abs = self.abs_path(path).await?;
            if self.stat(&abs).await?.is_dir() {
                return Err(FsError::Forbidden);
            }
            let file = tokio::fs::File::open(abs).await?;
            Ok(Box::new(LocalFsFile {
                file,
                path: path.clone(),
            }) as Box<dyn DavFile>)
        }
        .boxed()
    }

    fn create<'a>(&'a self, path: &'a DavPath) -> FsFuture<'a, Box<dyn DavWriter>> {
        async move {
            trace!("FS: create {path:?}");
            let abs = self.abs_path(path).await?;
            self.check_parent(&abs).await?;
            if let Ok(meta) = tokio::fs::metadata(&abs).await {
                if meta.is_dir() {
                    return Err(FsError::Exists);
                }
            }
            let tmp = tmp_name(abs.parent().unwrap_or(self.basedir.as_path()));
            let mut opt = tokio::fs::OpenOptions::new();
            opt.write(true).create_new(true);
            #[cfg(unix)]
            opt.mode(if self.public { 0o644 } else { 0o600 });
            let file = opt.open(&tmp).await?;
            Ok(Box::new(LocalFsWriter {
                file: Some(file),
                tmp: Some(tmp),
                target: abs,
            }) as Box<dyn DavWriter>)
        }
        .boxed()
    }

    fn create_dir<'a>(&'a self, path: &'a DavPath) -> FsFuture<'a, ()> {
        async move {
            trace!("FS: create_dir {path:?}");
            let abs = self.abs_path(path).await?;
            self.check_parent(&abs).await?;
            if tokio::fs::symlink_metadata(&abs).await.is_ok() {
                return Err(FsError::Exists);
            }
            Ok(self.mkdir(&abs).await?)
        }
        .boxed()
    }

    fn remove<'a>(&'a self, path: &'a DavPath) -> FsFuture<'a, ()> {
        async move {
            trace!("FS: remove {path:?}");
            if path.is_root() {
                return Err(FsError::Forbidden);
            }
            let abs = self.abs_path(path).await?;
            self.remove_abs(&abs).await?;
            self.props_result(self.props.remove_tree(path))
        }
        .boxed()
    }

    fn rename<'a>(
        &'a self,
        from: &'a DavPath,
        to: &'a DavPath,
        overwrite: bool,
    ) -> FsFuture<'a, ()> {
        async move {
            trace!("FS: rename {from:?} {to:?}");
            if from.is_root() || to.is_root() {
                return Err(FsError::Forbidden);
            }
            let p_from = self.abs_path(from).await?;
            let p_to = self.abs_path(to).await?;
            let src = self.stat(&p_from).await?;
            self.check_parent(&p_to).await?;
            if let Ok(dst) = tokio::fs::symlink_metadata(&p_to).await {
                if !overwrite {
                    return Err(FsError::Exists);
                }
                // rename(2) replaces a file atomically, anything else has
                // to go first.
                if src.is_dir() || dst.is_dir() {
                    self.remove_abs(&p_to).await?;
                }
            }
            tokio::fs::rename(&p_from, &p_to).await?;
            self.props_result(self.props.rename_tree(from, to))
        }
        .boxed()
    }

    fn copy<'a>(
        &'a self,
        from: &'a DavPath,
        to: &'a DavPath,
        deep: bool,
        overwrite: bool,
    ) -> FsFuture<'a, ()> {
        async move {
            trace!("FS: copy {from:?} {to:?} deep={deep}");
            if to.is_root() {
                return Err(FsError::Forbidden);
            }
            let p_from = self.abs_path(from).await?;
            let p_to = self.abs_path(to).await?;
            let src = self.stat(&p_from).await?;
            self.check_parent(&p_to).await?;
            if let Ok(dst) = tokio::fs::symlink_metadata(&p_to).await {
                if !overwrite {
                    return Err(FsError::Exists);
                }
                if src.is_dir() || dst.is_dir() {
                    self.remove_abs(&p_to).await?;
                }
            }
            self.copy_abs(&p_from, &p_to, deep).await?;
            self.props_result(self.props.copy_tree(from, to, deep))
        }
        .boxed()
    }

    fn have_props<'a>(
        &'a self,
        _path: &'a DavPath,
    ) -> std::pin::Pin<Box<dyn std::future::Future<Output = bool> + Send + 'a>> {
        Box::pin(futures_util::future::ready(true))
    }

    fn get_props<'a>(&'a self, path: &'a DavPath) -> FsFuture<'a, Vec<DavProp>> {
        async move { Ok(self.props.get(path)) }.boxed()
    }

    fn patch_props<'a>(&'a self, path: &'a DavPath, patch: Vec<PropUpdate>) -> FsFuture<'a, ()> {
        async move {
            trace!("FS: patch_props {path:?}");
            self.props_result(self.props.patch(path, patch))
        }
        .boxed()
    }

    #[cfg(unix)]
    fn relax_permissions<'a>(&'a self, path: &'a DavPath) -> FsFuture<'a, ()> {
        async move {
            let abs = self.abs_path(path).await?;
            let mut targets = vec![(self.basedir.clone(), 0o777)];
            if let Some(parent) = abs.parent().filter(|p| p.starts_with(&self.basedir)) {
                targets.push((parent.to_path_buf(), 0o777));
            }
            if let Ok(meta) = tokio::fs::metadata(&abs).await {
                targets.push((abs, if meta.is_dir() { 0o777 } else { 0o666 }));
            }
            for (p, mode) in targets {
                let perm = std::fs::Permissions::from_mode(mode);
                if let Err(e) = tokio::fs::set_permissions(&p, perm).await {
                    debug!("chmod {:o} {}: {e}", mode, p.display());
                }
            }
            Ok(())
        }
        .boxed()
    }
}

impl DavFile for LocalFsFile {
    fn read_bytes(&mut self, count: usize) -> FsFuture<'_, Bytes> {
        async move {
            let mut buf = vec![0u8; count];
            let mut filled = 0;
            while filled < count {
                let n = self.file.read(&mut buf[filled..]).await?;
                if n == 0 {
                    break;
                }
                filled += n;
            }
            buf.truncate(filled);
            Ok(Bytes::from(buf))
        }
        .boxed()
    }

    fn seek(&mut self, pos: SeekFrom) -> FsFuture<'_, u64> {
        async move { Ok(self.file.seek(pos).await?) }.boxed()
    }

    fn metadata(&mut self) -> FsFuture<'_, Resource> {
        async move {
            let meta = self.file.metadata().await?;
            Ok(resource(self.path.clone(), &meta))
        }
        .boxed()
    }
}

impl DavWriter for LocalFsWriter {
    fn write_bytes(&mut self, buf: Bytes) -> FsFuture<'_, ()> {
        async move {
            let file = self.file.as_mut().ok_or(FsError::GeneralFailure)?;
            Ok(file.write_all(&buf).await?)
        }
        .boxed()
    }

    fn commit(mut self: Box<Self>) -> FsFuture<'static, bool> {
        async move {
            let mut file = self.file.take().ok_or(FsError::GeneralFailure)?;
            file.flush().await?;
            file.sync_all().await?;
            drop(file);
            let tmp = self.tmp.take().ok_or(FsError::GeneralFailure)?;
            let created = tokio::fs::symlink_metadata(&self.target).await.is_err();
            if let Err(e) = tokio::fs::rename(&tmp, &self.target).await {
                let _ = tokio::fs::remove_file(&tmp).await;
                return Err(e.into());
            }
            Ok(created)
        }
        .boxed()
    }
}

// An aborted upload leaves nothing behind.
impl Drop for LocalFsWriter {
    fn drop(&mut self) {
        if let Some(tmp) = self.tmp.take() {
            debug!("discarding unfinished upload {}", tmp.display());
            let _ = std::fs::remove_file(tmp);
        }
    }
}

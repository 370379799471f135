//
// This module contains the main entry point of the library,
// DavHandler.
//
use std::error::Error as StdError;
use std::io;
use std::path::PathBuf;
use std::sync::Arc;

use bytes::Buf;
use headers::HeaderMapExt;
use http::{header, HeaderValue, Request, Response, StatusCode};
use http_body::Body as HttpBody;

use crate::body::Body;
use crate::compat::{Compat, CompatRule};
use crate::davheaders;
use crate::davpath::DavPath;
use crate::errors::DavError;
use crate::fs::localfs::LocalFs;
use crate::fs::*;
use crate::ls::*;
use crate::util::{dav_method, DavMethod, DavMethodSet};
use crate::DavResult;

mod handle_copymove;
mod handle_delete;
mod handle_gethead;
mod handle_lock;
mod handle_mkcol;
mod handle_options;
mod handle_props;
mod handle_put;

use handle_gethead::READ_BUF_SIZE;

// Request bodies other than PUT are read into memory, up to this size.
const MAX_XML_BODY: usize = 65536;

/// Configuration of the handler.
#[derive(Clone)]
pub struct DavBuilder {
    /// Prefix to be stripped off when handling request.
    prefix: String,
    /// Filesystem backend.
    fs: FileSystem,
    /// Locksystem backend.
    ls: LockSystem,
    /// Set of allowed methods (Defaults to "all methods")
    allow: DavMethodSet,
    /// Principal is webdav speak for "user", used to give locks an owner.
    principal: Option<String>,
    /// Hide symbolic links? Defaults to `true`.
    hide_symlinks: bool,
    /// Does GET on a directory return indexes.
    autoindex: bool,
    /// read buffer size in bytes
    read_buf_size: usize,
    /// Client quirks table.
    compat: Compat,
    /// chmod the target of a mutating request to 666/777.
    relax_permissions: bool,
}

/// File system backend.
#[derive(Clone)]
pub enum FileSystem {
    Local {
        /// Path to the root directory.
        base: PathBuf,
        public: bool,
        /// Where dead properties are persisted. `None` keeps them in memory.
        props: Option<PathBuf>,
    },
    Custom(Arc<dyn DavFileSystem>),
}

impl FileSystem {
    /// Serve a local directory, dead properties live in memory only.
    pub fn local(path: impl Into<PathBuf>, public: bool) -> Self {
        FileSystem::Local {
            base: path.into(),
            public,
            props: None,
        }
    }

    /// Serve a local directory, dead properties are stored in `props_file`.
    pub fn local_with_props(
        path: impl Into<PathBuf>,
        public: bool,
        props_file: impl Into<PathBuf>,
    ) -> Self {
        FileSystem::Local {
            base: path.into(),
            public,
            props: Some(props_file.into()),
        }
    }

    fn build(self, hide_symlinks: bool) -> Arc<dyn DavFileSystem> {
        match self {
            FileSystem::Local {
                base,
                public,
                props,
            } => LocalFs::new(base, public, hide_symlinks, props),
            FileSystem::Custom(fs) => fs,
        }
    }
}

/// Lock system backend.
#[derive(Default, Clone)]
pub enum LockSystem {
    /// Locks are lost on restart.
    #[default]
    Mem,
    /// Locks are persisted to this file.
    File(PathBuf),
    Custom(Arc<dyn DavLockSystem>),
}

impl LockSystem {
    fn build(self) -> Arc<dyn DavLockSystem> {
        match self {
            LockSystem::Mem => FileLs::ephemeral(),
            LockSystem::File(path) => FileLs::open(path),
            LockSystem::Custom(ls) => ls,
        }
    }
}

impl DavBuilder {
    /// Create a new configuration builder.
    pub fn new(fs: FileSystem) -> DavBuilder {
        Self {
            prefix: String::new(),
            fs,
            ls: LockSystem::default(),
            allow: DavMethodSet::all(),
            principal: None,
            hide_symlinks: true,
            autoindex: false,
            read_buf_size: READ_BUF_SIZE,
            compat: Compat::default(),
            relax_permissions: false,
        }
    }

    /// Use the configuration that was built to generate a DavHandler.
    pub fn build(self) -> DavHandler {
        self.into()
    }

    /// Prefix to be stripped off before translating the rest of
    /// the request path to a filesystem path.
    pub fn strip_prefix(self, prefix: impl Into<String>) -> Self {
        let mut this = self;
        this.prefix = prefix.into();
        this
    }

    /// Set the locksystem to use.
    pub fn locksystem(self, ls: LockSystem) -> Self {
        let mut this = self;
        this.ls = ls;
        this
    }

    /// Which methods to allow (default is all methods).
    pub fn methods(self, allow: DavMethodSet) -> Self {
        let mut this = self;
        this.allow = allow;
        this
    }

    /// Set the name of the "webdav principal". This will be the owner of any created locks.
    pub fn principal(self, principal: impl Into<String>) -> Self {
        let mut this = self;
        this.principal = Some(principal.into());
        this
    }

    /// Hide symbolic links (default is true)
    pub fn hide_symlinks(self, hide: bool) -> Self {
        let mut this = self;
        this.hide_symlinks = hide;
        this
    }

    /// Does a GET on a directory produce a directory index.
    pub fn autoindex(self, autoindex: bool) -> Self {
        let mut this = self;
        this.autoindex = autoindex;
        this
    }

    /// Read buffer size in bytes
    pub fn read_buf_size(self, size: usize) -> Self {
        let mut this = self;
        this.read_buf_size = size.max(1);
        this
    }

    /// Replace the client compatibility table.
    pub fn compat(self, compat: Compat) -> Self {
        let mut this = self;
        this.compat = compat;
        this
    }

    /// Add a rule to the client compatibility table.
    pub fn compat_rule(self, rule: CompatRule) -> Self {
        let mut this = self;
        this.compat = this.compat.rule(rule);
        this
    }

    /// After a successful PUT, MKCOL, PROPPATCH, LOCK or UNLOCK, make the
    /// target world-writable (666 for files, 777 for collections), along
    /// with its parent and the root. Off by default.
    pub fn relax_permissions(self, relax: bool) -> Self {
        let mut this = self;
        this.relax_permissions = relax;
        this
    }
}

/// The webdav handler struct.
///
/// The `builder` and `build` methods are used to instantiate a handler.
///
/// The `handle` and `handle_with` methods are the methods that do the actual work.
#[derive(Clone)]
pub struct DavHandler {
    pub(crate) prefix: Arc<String>,
    pub(crate) fs: Arc<dyn DavFileSystem>,
    pub(crate) ls: Arc<dyn DavLockSystem>,
    pub(crate) allow: DavMethodSet,
    pub(crate) principal: Option<Arc<String>>,
    pub(crate) autoindex: bool,
    pub(crate) read_buf_size: usize,
    pub(crate) compat: Arc<Compat>,
    pub(crate) relax_permissions: bool,
    pub(crate) guards: Arc<PathGuards>,
}

impl From<DavBuilder> for DavHandler {
    fn from(cfg: DavBuilder) -> Self {
        Self {
            prefix: Arc::new(cfg.prefix),
            fs: cfg.fs.build(cfg.hide_symlinks),
            ls: cfg.ls.build(),
            allow: cfg.allow,
            principal: cfg.principal.map(Arc::new),
            autoindex: cfg.autoindex,
            read_buf_size: cfg.read_buf_size,
            compat: Arc::new(cfg.compat),
            relax_permissions: cfg.relax_permissions,
            guards: Arc::new(PathGuards::new()),
        }
    }
}

impl DavHandler {
    /// Return a configuration builder.
    pub fn builder(fs: FileSystem) -> DavBuilder {
        DavBuilder::new(fs)
    }

    /// Handle a webdav request.
    pub async fn handle<ReqBody, ReqData, ReqError>(&self, req: Request<ReqBody>) -> Response<Body>
    where
        ReqData: Buf + Send + 'static,
        ReqError: StdError + Send + Sync + 'static,
        ReqBody: HttpBody<Data = ReqData, Error = ReqError>,
    {
        self.handle_inner(req).await
    }

    /// Handle a webdav request, overriding parts of the config.
    ///
    /// For example, the `principal` can be set for this request, so that
    /// locks get the name of the authenticated user as their owner.
    pub async fn handle_with<ReqBody, ReqData, ReqError>(
        &self,
        req: Request<ReqBody>,
        prefix: Option<String>,
        principal: Option<String>,
    ) -> Response<Body>
    where
        ReqData: Buf + Send + 'static,
        ReqError: StdError + Send + Sync + 'static,
        ReqBody: HttpBody<Data = ReqData, Error = ReqError>,
    {
        let mut this = self.clone();
        if let Some(prefix) = prefix {
            this.prefix = Arc::new(format!(
                "{}/{}",
                this.prefix.strip_suffix('/').unwrap_or(&this.prefix),
                prefix.strip_prefix('/').unwrap_or(&prefix)
            ));
        }
        if let Some(principal) = principal {
            this.principal = Some(Arc::new(principal));
        }
        this.handle_inner(req).await
    }
}

impl DavHandler {
    // helper.
    pub(crate) fn path(&self, req: &Request<()>) -> DavResult<DavPath> {
        Ok(DavPath::from_uri_and_prefix(req.uri(), &self.prefix)?)
    }

    // See if this is a directory and if so, if we have
    // to fixup the path by adding a slash at the end.
    pub(crate) fn fixpath(&self, res: &mut Response<Body>, path: &mut DavPath, meta: &Resource) {
        if meta.is_collection() && !path.is_collection() {
            path.add_slash();
            let newloc = path.as_url_string_with_prefix();
            res.headers_mut()
                .typed_insert(davheaders::ContentLocation(newloc));
        }
    }

    // 423 if a lock we have no token for is in the way.
    pub(crate) fn check_lock(&self, path: &DavPath, deep: bool, tokens: &[String]) -> DavResult<()> {
        match self.ls.check(path, deep, tokens) {
            Ok(()) => Ok(()),
            Err(l) => {
                debug!("{path} is locked by {} on {}", l.token, l.path);
                Err(StatusCode::LOCKED.into())
            }
        }
    }

    // Loosen permissions after a mutation, when configured to.
    pub(crate) async fn relax(&self, path: &DavPath) {
        if !self.relax_permissions {
            return;
        }
        if let Err(e) = self.fs.relax_permissions(path).await {
            debug!("relax permissions on {path}: {e}");
        }
    }

    // drain request body and return length.
    pub(crate) async fn read_request<ReqBody, ReqData, ReqError>(
        &self,
        body: ReqBody,
        max_size: usize,
    ) -> DavResult<Vec<u8>>
    where
        ReqBody: HttpBody<Data = ReqData, Error = ReqError>,
        ReqData: Buf + Send + 'static,
        ReqError: StdError + Send + Sync + 'static,
    {
        let mut data = Vec::new();
        pin_utils::pin_mut!(body);
        while let Some(res) = body.data().await {
            let mut buf = res.map_err(|_| {
                DavError::IoError(io::Error::new(
                    io::ErrorKind::UnexpectedEof,
                    "UnexpectedEof",
                ))
            })?;
            while buf.has_remaining() {
                if data.len() + buf.remaining() > max_size {
                    return Err(StatusCode::PAYLOAD_TOO_LARGE.into());
                }
                let b = buf.chunk();
                let l = b.len();
                data.extend_from_slice(b);
                buf.advance(l);
            }
        }
        Ok(data)
    }

    // internal dispatcher.
    async fn handle_inner<ReqBody, ReqData, ReqError>(
        &self,
        req: Request<ReqBody>,
    ) -> Response<Body>
    where
        ReqBody: HttpBody<Data = ReqData, Error = ReqError>,
        ReqData: Buf + Send + 'static,
        ReqError: StdError + Send + Sync + 'static,
    {
        let mut req = req;
        let adjust = self.compat.prepare_request(&mut req);
        let method = req.method().clone();
        let uri = req.uri().clone();
        let agent = req
            .headers()
            .get(header::USER_AGENT)
            .and_then(|s| s.to_str().ok())
            .unwrap_or("-")
            .to_string();

        // Turn any DavError results into a HTTP error response.
        let mut resp = match self.handle2(req).await {
            Ok(resp) => {
                debug!("== END REQUEST result OK");
                resp
            }
            Err(err) => {
                debug!("== END REQUEST result {:?}", err);
                let status = err.statuscode();
                if status == StatusCode::INTERNAL_SERVER_ERROR {
                    error!("{method} {uri}: {err}");
                }
                let mut resp = Response::new(Body::empty());
                *resp.status_mut() = status;
                let h = resp.headers_mut();
                h.typed_insert(headers::ContentLength(0));
                if err.must_close() {
                    h.insert(header::CONNECTION, HeaderValue::from_static("close"));
                }
                resp
            }
        };
        self.compat.finish_response(&mut resp, self.allow, adjust);
        debug!("{method} {uri} [{agent}] -> {}", resp.status());
        resp
    }

    // internal dispatcher part 2.
    async fn handle2<ReqBody, ReqData, ReqError>(
        &self,
        req: Request<ReqBody>,
    ) -> DavResult<Response<Body>>
    where
        ReqBody: HttpBody<Data = ReqData, Error = ReqError>,
        ReqData: Buf + Send + 'static,
        ReqError: StdError + Send + Sync + 'static,
    {
        let (req, body) = {
            let (parts, body) = req.into_parts();
            (Request::from_parts(parts, ()), body)
        };

        // translate HTTP method to Webdav method.
        let method = match dav_method(req.method()) {
            Ok(m) => m,
            Err(e) => {
                debug!("refusing method {} request {}", req.method(), req.uri());
                return Err(e);
            }
        };

        // see if method is allowed.
        if !self.allow.contains_method(method) {
            debug!(
                "method {} not allowed on request {}",
                req.method(),
                req.uri()
            );
            return Err(DavError::StatusClose(StatusCode::METHOD_NOT_ALLOWED));
        }

        // make sure the request path is valid.
        let path = DavPath::from_uri_and_prefix(req.uri(), &self.prefix)?;

        // PUT is the only handler that reads the body itself. All the
        // other handlers either expected no body, or a pre-read Vec<u8>.
        let (body_strm, body_data) = match method {
            DavMethod::Put => (Some(body), Vec::new()),
            _ => (None, self.read_request(body, MAX_XML_BODY).await?),
        };

        // Not all methods accept a body.
        if !method.accepts_body() && !body_data.is_empty() {
            return Err(StatusCode::UNSUPPORTED_MEDIA_TYPE.into());
        }

        debug!("== START REQUEST {:?} {}", method, path);

        match method {
            DavMethod::Options => self.handle_options(&req).await,
            DavMethod::PropFind => self.handle_propfind(&req, &body_data).await,
            DavMethod::PropPatch => self.handle_proppatch(&req, &body_data).await,
            DavMethod::MkCol => self.handle_mkcol(&req).await,
            DavMethod::Delete => self.handle_delete(&req).await,
            DavMethod::Lock => self.handle_lock(&req, &body_data).await,
            DavMethod::Unlock => self.handle_unlock(&req).await,
            DavMethod::Head | DavMethod::Get => self.handle_get(&req).await,
            DavMethod::Copy | DavMethod::Move => self.handle_copymove(&req, method).await,
            DavMethod::Put => match body_strm {
                Some(body) => self.handle_put(&req, body).await,
                None => Err(StatusCode::BAD_REQUEST.into()),
            },
        }
    }
}

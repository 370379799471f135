//! ## WebDAV share for file managers and Office clients
//!
//! [`Webdav`] (RFC4918) is defined as
//! HTTP (GET/HEAD/PUT/DELETE) plus a bunch of extension methods (PROPFIND, etc).
//! These extension methods are used to manage collections (like unix directories),
//! get information on collections (like unix `ls` or `readdir`), rename and
//! copy items, lock/unlock items, etc.
//!
//! A `handler` is a piece of code that takes a `http::Request`, processes it in some
//! way, and then generates a `http::Response`. This library is a `handler` that maps
//! the HTTP/Webdav protocol onto a directory on the local disk, so that it can be
//! mounted from Linux, macOS and Windows, and documents can be opened and saved
//! in place from Office applications.
//!
//! ## Backend interfaces.
//!
//! - the library contains a [HTTP handler][DavHandler].
//! - storage is a [filesystem][fs::DavFileSystem]. The included one serves a
//!   local directory and keeps [dead properties][fs::DavProp] in a sidecar
//!   JSON store.
//! - locks are kept by a [locksystem][ls::DavLockSystem]. The included
//!   [`FileLs`](ls::FileLs) can persist its lock table, so that locks
//!   survive a restart.
//!
//! The handler works with the standard http types from the `http` and
//! `http_body` crates, so it can be used straight away with hyper.
//!
//! ## Client quirks.
//!
//! Every response carries the capability headers Windows and Office look
//! for (`DAV`, `MS-Author-Via`, `X-MSDAVEXT`, `Allow`/`Public`) and
//! disables caching. Per-client adjustments, such as dropping conditional
//! headers from Office requests, are driven by a [`Compat`] table.
//!
//! ## Implemented standards.
//!
//! The class 1 and 2 parts of [RFC4918]: PROPFIND/PROPPATCH with dead
//! properties, MKCOL, COPY/MOVE, exclusive and shared write locks,
//! lock-null resources and the `If:` header. From the HTTP RFCs the
//! preconditions (If-Match, If-None-Match, If-Modified-Since,
//! If-Unmodified-Since, If-Range) and single byte ranges.
//!
//! ## Example.
//!
//! Example server using [hyper] that serves the /tmp directory in r/w mode
//! below `/webdav`.
//!
//! ```no_run
//! use std::convert::Infallible;
//! use webdav_share::{DavHandler, FileSystem, LockSystem};
//!
//! #[tokio::main]
//! async fn main() {
//!     let dir = "/tmp";
//!     let addr = ([127, 0, 0, 1], 4918).into();
//!
//!     let dav_server = DavHandler::builder(FileSystem::local(dir, false))
//!         .strip_prefix("/webdav")
//!         .locksystem(LockSystem::File("/var/tmp/webdav-locks.json".into()))
//!         .build();
//!
//!     let make_service = hyper::service::make_service_fn(move |_| {
//!         let dav_server = dav_server.clone();
//!         async move {
//!             let func = move |req| {
//!                 let dav_server = dav_server.clone();
//!                 async move {
//!                     Ok::<_, Infallible>(dav_server.handle(req).await)
//!                 }
//!             };
//!             Ok::<_, Infallible>(hyper::service::service_fn(func))
//!         }
//!     });
//!
//!     println!("Serving {} on {}", dir, addr);
//!     let _ = hyper::Server::bind(&addr)
//!         .serve(make_service)
//!         .await
//!         .map_err(|e| eprintln!("server error: {}", e));
//! }
//! ```
//!
//! [`Webdav`]: https://tools.ietf.org/html/rfc4918
//! [RFC4918]: https://tools.ietf.org/html/rfc4918
//! [hyper]: https://hyper.rs/

#![cfg_attr(docsrs, feature(doc_cfg))]

#[macro_use]
extern crate log;
#[macro_use]
extern crate lazy_static;

mod conditional;
mod davhandler;
mod davheaders;
mod davxml;
mod errors;
mod util;
mod xmltree_ext;

pub mod body;
pub mod compat;
pub mod davpath;
pub mod fs;
pub mod ls;

pub(crate) use crate::errors::DavResult;

pub use crate::compat::{Adjustments, ClientMatcher, Compat, CompatRule};
pub use crate::davhandler::{DavBuilder, DavHandler, FileSystem, LockSystem};
pub use crate::util::{DavMethod, DavMethodSet};

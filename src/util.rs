use std::io::{self, Cursor, Write};
use std::path::Path;
use std::time::{Duration, SystemTime, UNIX_EPOCH};

use bitflags::bitflags;
use bytes::Bytes;
use headers::Header;
use serde::Serialize;
use http::method::InvalidMethod;
use time::format_description::well_known::Rfc3339;
use time::macros::offset;

use crate::errors::DavError;
use crate::DavResult;

/// HTTP and WebDAV methods understood by the handler.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum DavMethod {
    Head,
    Get,
    Put,
    Options,
    PropFind,
    PropPatch,
    MkCol,
    Copy,
    Move,
    Delete,
    Lock,
    Unlock,
}

bitflags! {
    /// A set of [`DavMethod`]s.
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
    pub struct DavMethodSet: u32 {
        const HEAD = 0x0001;
        const GET = 0x0002;
        const PUT = 0x0004;
        const OPTIONS = 0x0010;
        const PROPFIND = 0x0020;
        const PROPPATCH = 0x0040;
        const MKCOL = 0x0080;
        const COPY = 0x0100;
        const MOVE = 0x0200;
        const DELETE = 0x0400;
        const LOCK = 0x0800;
        const UNLOCK = 0x1000;

        const HTTP_RO = Self::HEAD.bits() | Self::GET.bits() | Self::OPTIONS.bits();
        const HTTP_RW = Self::HTTP_RO.bits() | Self::PUT.bits();
        const WEBDAV_RO = Self::HTTP_RO.bits() | Self::PROPFIND.bits();
    }
}
impl DavMethodSet {
    pub const WEBDAV_RW: Self = Self::all();
}

// Order in which methods are advertised in Allow/Public.
const ADVERTISED: &[(DavMethod, &str)] = &[
    (DavMethod::Options, "OPTIONS"),
    (DavMethod::Get, "GET"),
    (DavMethod::Head, "HEAD"),
    (DavMethod::Put, "PUT"),
    (DavMethod::Delete, "DELETE"),
    (DavMethod::PropFind, "PROPFIND"),
    (DavMethod::PropPatch, "PROPPATCH"),
    (DavMethod::MkCol, "MKCOL"),
    (DavMethod::Copy, "COPY"),
    (DavMethod::Move, "MOVE"),
    (DavMethod::Lock, "LOCK"),
    (DavMethod::Unlock, "UNLOCK"),
];

impl DavMethod {
    /// Methods that change state on the server.
    pub fn is_mutating(self) -> bool {
        !matches!(
            self,
            DavMethod::Head | DavMethod::Get | DavMethod::Options | DavMethod::PropFind
        )
    }

    /// Methods that may carry a request body.
    pub(crate) fn accepts_body(self) -> bool {
        matches!(
            self,
            DavMethod::Put | DavMethod::PropFind | DavMethod::PropPatch | DavMethod::Lock
        )
    }
}

impl From<DavMethod> for DavMethodSet {
    fn from(m: DavMethod) -> DavMethodSet {
        match m {
            DavMethod::Head => DavMethodSet::HEAD,
            DavMethod::Get => DavMethodSet::GET,
            DavMethod::Put => DavMethodSet::PUT,
            DavMethod::Options => DavMethodSet::OPTIONS,
            DavMethod::PropFind => DavMethodSet::PROPFIND,
            DavMethod::PropPatch => DavMethodSet::PROPPATCH,
            DavMethod::MkCol => DavMethodSet::MKCOL,
            DavMethod::Copy => DavMethodSet::COPY,
            DavMethod::Move => DavMethodSet::MOVE,
            DavMethod::Delete => DavMethodSet::DELETE,
            DavMethod::Lock => DavMethodSet::LOCK,
            DavMethod::Unlock => DavMethodSet::UNLOCK,
        }
    }
}

impl DavMethodSet {
    /// Is this method part of the set.
    pub fn contains_method(&self, m: DavMethod) -> bool {
        self.contains(DavMethodSet::from(m))
    }

    /// Render as the value of an `Allow` or `Public` header.
    pub fn header_value(&self) -> String {
        ADVERTISED
            .iter()
            .filter(|(m, _)| self.contains_method(*m))
            .map(|(_, name)| *name)
            .collect::<Vec<_>>()
            .join(", ")
    }
}

// translate method into our own enum that has webdav methods as well.
pub(crate) fn dav_method(m: &http::Method) -> DavResult<DavMethod> {
    let m = match *m {
        http::Method::HEAD => DavMethod::Head,
        http::Method::GET => DavMethod::Get,
        http::Method::PUT => DavMethod::Put,
        http::Method::DELETE => DavMethod::Delete,
        http::Method::OPTIONS => DavMethod::Options,
        _ => match m.as_str() {
            "PROPFIND" => DavMethod::PropFind,
            "PROPPATCH" => DavMethod::PropPatch,
            "MKCOL" => DavMethod::MkCol,
            "COPY" => DavMethod::Copy,
            "MOVE" => DavMethod::Move,
            "LOCK" => DavMethod::Lock,
            "UNLOCK" => DavMethod::Unlock,
            _ => {
                return Err(DavError::UnknownDavMethod);
            }
        },
    };
    Ok(m)
}

// for external use.
impl std::convert::TryFrom<&http::Method> for DavMethod {
    type Error = InvalidMethod;

    fn try_from(value: &http::Method) -> Result<Self, Self::Error> {
        dav_method(value).map_err(|_| {
            // A trick to get at the value of http::method::InvalidMethod.
            http::method::Method::from_bytes(b"").unwrap_err()
        })
    }
}

pub fn systemtime_to_offsetdatetime(t: SystemTime) -> time::OffsetDateTime {
    match t.duration_since(UNIX_EPOCH) {
        Ok(t) => time::OffsetDateTime::from_unix_timestamp(t.as_secs() as i64)
            .map(|tm| tm.to_offset(offset!(UTC)))
            .unwrap_or(time::OffsetDateTime::UNIX_EPOCH),
        Err(_) => time::OffsetDateTime::UNIX_EPOCH.to_offset(offset!(UTC)),
    }
}

pub fn systemtime_to_httpdate(t: SystemTime) -> String {
    let d = headers::Date::from(t);
    let mut v = Vec::new();
    d.encode(&mut v);
    v.first()
        .and_then(|h| h.to_str().ok())
        .map(|s| s.to_owned())
        .unwrap_or_default()
}

pub fn systemtime_to_rfc3339(t: SystemTime) -> String {
    // 1996-12-19T16:39:57Z
    systemtime_to_offsetdatetime(t)
        .format(&Rfc3339)
        .unwrap_or_default()
}

// HTTP dates only carry whole seconds.
pub fn systemtime_truncate(t: SystemTime) -> SystemTime {
    match t.duration_since(UNIX_EPOCH) {
        Ok(d) => UNIX_EPOCH + Duration::from_secs(d.as_secs()),
        Err(_) => UNIX_EPOCH,
    }
}

// Store `value` as JSON at `path`. Readers see either the old or the new
// file, never a partial one.
pub(crate) fn write_json_atomic<T: Serialize>(path: &Path, value: &T) -> io::Result<()> {
    let data = serde_json::to_vec(value).map_err(|e| io::Error::new(io::ErrorKind::Other, e))?;
    let mut tmp = path.as_os_str().to_owned();
    tmp.push(format!(".{}.tmp", uuid::Uuid::new_v4().simple()));
    let tmp = std::path::PathBuf::from(tmp);
    let res = std::fs::write(&tmp, &data).and_then(|_| std::fs::rename(&tmp, path));
    if res.is_err() {
        let _ = std::fs::remove_file(&tmp);
    }
    res
}

// Growable in-memory `Write` target for the XML emitter.
#[derive(Clone, Default)]
pub(crate) struct MemBuffer(Cursor<Vec<u8>>);

impl MemBuffer {
    pub(crate) fn new() -> MemBuffer {
        MemBuffer(Cursor::new(Vec::new()))
    }

    // Hand out what was written so far and start over empty.
    pub(crate) fn take(&mut self) -> Bytes {
        let buf = std::mem::take(self.0.get_mut());
        self.0.set_position(0);
        Bytes::from(buf)
    }
}

impl Write for MemBuffer {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        self.0.write(buf)
    }

    fn flush(&mut self) -> io::Result<()> {
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::UNIX_EPOCH;

    #[test]
    fn test_rfc3339() {
        assert!(systemtime_to_rfc3339(UNIX_EPOCH) == "1970-01-01T00:00:00Z");
    }

    #[test]
    fn test_httpdate() {
        assert_eq!(
            systemtime_to_httpdate(UNIX_EPOCH),
            "Thu, 01 Jan 1970 00:00:00 GMT"
        );
    }

    #[test]
    fn test_dav_method() {
        let m = http::Method::from_bytes(b"PROPFIND").unwrap();
        assert_eq!(dav_method(&m).unwrap(), DavMethod::PropFind);
        let m = http::Method::from_bytes(b"PATCH").unwrap();
        assert!(dav_method(&m).is_err());
        assert!(DavMethod::Lock.is_mutating());
        assert!(!DavMethod::PropFind.is_mutating());
    }

    #[test]
    fn test_allow_header() {
        assert_eq!(
            DavMethodSet::all().header_value(),
            "OPTIONS, GET, HEAD, PUT, DELETE, PROPFIND, PROPPATCH, MKCOL, COPY, MOVE, LOCK, UNLOCK"
        );
        assert_eq!(DavMethodSet::HTTP_RO.header_value(), "OPTIONS, GET, HEAD");
    }

    #[test]
    fn membuffer_take_resets() {
        let mut b = MemBuffer::new();
        b.write_all(b"<D:prop/>").unwrap();
        assert_eq!(&b.take()[..], b"<D:prop/>");
        b.write_all(b"x").unwrap();
        assert_eq!(&b.take()[..], b"x");
        assert!(b.take().is_empty());
    }

    #[test]
    fn test_truncate() {
        let t = UNIX_EPOCH + Duration::from_millis(1500);
        assert_eq!(systemtime_truncate(t), UNIX_EPOCH + Duration::from_secs(1));
    }
}

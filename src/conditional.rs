use std::time::SystemTime;

use headers::HeaderMapExt;
use http::{Method, Request, StatusCode};

use crate::davheaders::{self, IfItem};
use crate::davpath::DavPath;
use crate::fs::{DavFileSystem, Resource};
use crate::ls::DavLockSystem;
use crate::util::systemtime_truncate;

fn etag_header(meta: &Resource) -> Option<headers::ETag> {
    format!("\"{}\"", meta.etag).parse().ok()
}

fn modified(meta: &Resource) -> SystemTime {
    systemtime_truncate(meta.modified)
}

/// Evaluate If-Match, If-Unmodified-Since, If-None-Match and
/// If-Modified-Since (RFC 7232 section 6).
///
/// `meta` is `None` if the resource does not exist. Returns the status
/// to reply with if a precondition fails.
pub(crate) fn http_if_match(req: &Request<()>, meta: Option<&Resource>) -> Option<StatusCode> {
    let h = req.headers();
    let is_get = matches!(*req.method(), Method::GET | Method::HEAD);

    if let Some(im) = h.typed_get::<headers::IfMatch>() {
        let pass = match meta.and_then(etag_header) {
            Some(etag) => im.precondition_passes(&etag),
            None => false,
        };
        if !pass {
            trace!("precondition fail: If-Match");
            return Some(StatusCode::PRECONDITION_FAILED);
        }
    } else if let Some(ius) = h.typed_get::<headers::IfUnmodifiedSince>() {
        if let Some(m) = meta {
            if !ius.precondition_passes(modified(m)) {
                trace!("precondition fail: If-Unmodified-Since");
                return Some(StatusCode::PRECONDITION_FAILED);
            }
        }
    }

    if let Some(inm) = h.typed_get::<headers::IfNoneMatch>() {
        if let Some(etag) = meta.and_then(etag_header) {
            if !inm.precondition_passes(&etag) {
                trace!("precondition fail: If-None-Match");
                return Some(if is_get {
                    StatusCode::NOT_MODIFIED
                } else {
                    StatusCode::PRECONDITION_FAILED
                });
            }
        }
    } else if let Some(ims) = h.typed_get::<headers::IfModifiedSince>() {
        if let (true, Some(m)) = (is_get, meta) {
            if !ims.is_modified(modified(m)) {
                trace!("precondition fail: If-Modified-Since");
                return Some(StatusCode::NOT_MODIFIED);
            }
        }
    }
    None
}

// Resolve the resource tag of an If: list to a path.
fn tag_path(tag: &str, prefix: &str) -> Option<DavPath> {
    let d = davheaders::Destination(tag.to_string());
    DavPath::from_str_and_prefix(&d.path()?, prefix).ok()
}

/// Evaluate the If: header (RFC 4918 section 10.4).
///
/// Returns the submitted lock tokens, or `412` if none of the lists in
/// the header holds. A state token holds if it names a lock that applies
/// to the resource, an entity tag holds if it matches the resource.
pub(crate) async fn dav_if_match(
    req: &Request<()>,
    path: &DavPath,
    prefix: &str,
    fs: &dyn DavFileSystem,
    ls: &dyn DavLockSystem,
) -> Result<Vec<String>, StatusCode> {
    let ifh = match req.headers().typed_get::<davheaders::If>() {
        Some(i) => i,
        None => return Ok(Vec::new()),
    };

    for list in &ifh.0 {
        let target = match list.resource_tag {
            Some(ref tag) => match tag_path(tag, prefix) {
                Some(p) => p,
                None => continue,
            },
            None => path.clone(),
        };
        let mut meta = None;
        let mut holds = true;
        for cond in &list.conditions {
            let ok = match cond.item {
                IfItem::StateToken(ref t) => {
                    ls.discover(&target).iter().any(|l| l.token == *t)
                }
                IfItem::ETag(ref e) => {
                    if meta.is_none() {
                        meta = Some(fs.metadata(&target).await.ok());
                    }
                    match meta {
                        Some(Some(ref m)) => e.trim_start_matches("W/") == format!("\"{}\"", m.etag),
                        _ => false,
                    }
                }
            };
            if ok == cond.not {
                holds = false;
                break;
            }
        }
        if holds {
            return Ok(ifh.tokens());
        }
    }
    trace!("precondition fail: If {}", ifh);
    Err(StatusCode::PRECONDITION_FAILED)
}

/// All HTTP and WebDAV preconditions. On success returns the lock
/// tokens submitted in the If: header.
pub(crate) async fn if_match_get_tokens(
    req: &Request<()>,
    meta: Option<&Resource>,
    path: &DavPath,
    prefix: &str,
    fs: &dyn DavFileSystem,
    ls: &dyn DavLockSystem,
) -> Result<Vec<String>, StatusCode> {
    if let Some(status) = http_if_match(req, meta) {
        return Err(status);
    }
    dav_if_match(req, path, prefix, fs, ls).await
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::fs::ResourceKind;
    use std::time::{Duration, UNIX_EPOCH};

    fn resource() -> Resource {
        Resource {
            path: DavPath::new("/a.txt").unwrap(),
            kind: ResourceKind::File,
            len: 3,
            modified: UNIX_EPOCH + Duration::from_secs(1_000_000),
            created: None,
            accessed: None,
            etag: "1-3-f4240".to_string(),
        }
    }

    fn req(method: &str, name: &str, value: &str) -> Request<()> {
        Request::builder()
            .method(method)
            .uri("/a.txt")
            .header(name, value)
            .body(())
            .unwrap()
    }

    #[test]
    fn if_none_match() {
        let m = resource();
        let r = req("GET", "If-None-Match", "\"1-3-f4240\"");
        assert_eq!(http_if_match(&r, Some(&m)), Some(StatusCode::NOT_MODIFIED));
        let r = req("PUT", "If-None-Match", "*");
        assert_eq!(
            http_if_match(&r, Some(&m)),
            Some(StatusCode::PRECONDITION_FAILED)
        );
        assert_eq!(http_if_match(&r, None), None);
        let r = req("GET", "If-None-Match", "\"other\"");
        assert_eq!(http_if_match(&r, Some(&m)), None);
    }

    #[test]
    fn if_match() {
        let m = resource();
        let r = req("PUT", "If-Match", "\"1-3-f4240\"");
        assert_eq!(http_if_match(&r, Some(&m)), None);
        let r = req("PUT", "If-Match", "\"stale\"");
        assert_eq!(
            http_if_match(&r, Some(&m)),
            Some(StatusCode::PRECONDITION_FAILED)
        );
        let r = req("PUT", "If-Match", "*");
        assert_eq!(
            http_if_match(&r, None),
            Some(StatusCode::PRECONDITION_FAILED)
        );
    }

    #[test]
    fn if_modified_since() {
        let m = resource();
        let date = crate::util::systemtime_to_httpdate(m.modified);
        let r = req("GET", "If-Modified-Since", &date);
        assert_eq!(http_if_match(&r, Some(&m)), Some(StatusCode::NOT_MODIFIED));
        let r = req("GET", "If-Modified-Since", "Thu, 01 Jan 1970 00:00:00 GMT");
        assert_eq!(http_if_match(&r, Some(&m)), None);
        let r = req("PUT", "If-Unmodified-Since", "Thu, 01 Jan 1970 00:00:00 GMT");
        assert_eq!(
            http_if_match(&r, Some(&m)),
            Some(StatusCode::PRECONDITION_FAILED)
        );
    }
}

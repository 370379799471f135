use std::cmp;
use std::io::Cursor;
use std::time::{Duration, SystemTime};

use headers::HeaderMapExt;
use http::{header, HeaderValue, Request, Response, StatusCode};
use xmltree::Element;

use crate::body::Body;
use crate::conditional::if_match_get_tokens;
use crate::davheaders::{self, DavTimeout, Depth};
use crate::davpath::DavPath;
use crate::davxml::{parse_lockinfo, prop_document};
use crate::fs::FsError;
use crate::ls::{DavLock, LockError};
use crate::xmltree_ext::ElementExt;
use crate::DavResult;

// Used when the client does not ask for a timeout.
const DEFAULT_TIMEOUT: Duration = Duration::from_secs(3600);
// Longest timeout we hand out, one week.
const MAX_TIMEOUT: Duration = Duration::from_secs(7 * 24 * 3600);

// `None` is a lock that never expires.
fn lock_timeout(req: &Request<()>) -> Option<Duration> {
    let first = req
        .headers()
        .typed_get::<davheaders::Timeout>()
        .and_then(|t| t.0.first().copied());
    match first {
        None => Some(DEFAULT_TIMEOUT),
        Some(DavTimeout::Infinite) => None,
        Some(DavTimeout::Seconds(n)) => Some(cmp::min(Duration::from_secs(n as u64), MAX_TIMEOUT)),
    }
}

fn is_empty_body(xmldata: &[u8]) -> bool {
    xmldata.iter().all(|b| b.is_ascii_whitespace())
}

impl crate::DavHandler {
    pub(crate) async fn handle_lock(
        &self,
        req: &Request<()>,
        xmldata: &[u8],
    ) -> DavResult<Response<Body>> {
        let mut path = self.path(req)?;

        // only depth 0 and infinity are defined for LOCK.
        let deep = match davheaders::typed_strict::<Depth>(req.headers())? {
            None | Some(Depth::Infinity) => true,
            Some(Depth::Zero) => false,
            Some(Depth::One) => return Err(StatusCode::BAD_REQUEST.into()),
        };
        let timeout = lock_timeout(req);

        let _guard = self.guards.lock(&[&path]).await;

        let mut res = Response::new(Body::empty());
        let meta = match self.fs.metadata(&path).await {
            Ok(meta) => {
                self.fixpath(&mut res, &mut path, &meta);
                Some(meta)
            }
            Err(FsError::NotFound) => None,
            Err(e) => return Err(e.into()),
        };

        let tokens = if_match_get_tokens(
            req,
            meta.as_ref(),
            &path,
            &self.prefix,
            &*self.fs,
            &*self.ls,
        )
        .await?;

        // No body means: refresh the lock named in the If: header.
        if is_empty_body(xmldata) {
            if meta.is_none() || tokens.is_empty() {
                return Err(StatusCode::BAD_REQUEST.into());
            }
            let mut refreshed = None;
            for token in &tokens {
                match self.ls.refresh(&path, token, timeout) {
                    Ok(lock) => {
                        refreshed = Some(lock);
                        break;
                    }
                    Err(LockError::NotFound) => continue,
                    Err(e) => return Err(e.into()),
                }
            }
            let lock = refreshed.ok_or(StatusCode::PRECONDITION_FAILED)?;
            debug!("LOCK {path}: refreshed {}", lock.token);
            return self.lock_response(res, &lock);
        }

        let info = parse_lockinfo(xmldata)?;
        let owner = info.owner.as_ref().map(|o| o.to_fragment()).transpose()?;
        let principal = self.principal.as_ref().map(|p| p.as_str());
        let lock = match self
            .ls
            .lock(&path, principal, owner, timeout, info.shared, deep)
        {
            Ok(lock) => lock,
            Err(LockError::Conflict(other)) => {
                debug!("LOCK {path}: conflicts with {} on {}", other.token, other.path);
                return Err(StatusCode::LOCKED.into());
            }
            Err(e) => return Err(e.into()),
        };

        // Locking an unmapped URL creates an empty resource.
        if meta.is_none() {
            let created = match self.fs.create(&path).await {
                Ok(w) => w.commit().await,
                Err(e) => Err(e),
            };
            if let Err(e) = created {
                debug!("LOCK {path}: cannot create: {e}");
                if let Err(e) = self.ls.unlock(&path, &lock.token) {
                    warn!("LOCK {path}: cannot drop lock {}: {e}", lock.token);
                }
                return Err(e.into());
            }
            *res.status_mut() = StatusCode::CREATED;
        }
        self.relax(&path).await;

        res.headers_mut()
            .typed_insert(davheaders::LockToken(lock.token.clone()));
        self.lock_response(res, &lock)
    }

    fn lock_response(&self, mut res: Response<Body>, lock: &DavLock) -> DavResult<Response<Body>> {
        let mut ld = Element::new2("D:lockdiscovery");
        ld.push_elem(self.build_lock_prop(lock));
        let body = prop_document(&ld)?;
        let h = res.headers_mut();
        h.insert(
            header::CONTENT_TYPE,
            HeaderValue::from_static("application/xml; charset=utf-8"),
        );
        h.typed_insert(headers::ContentLength(body.len() as u64));
        *res.body_mut() = Body::from(body);
        Ok(res)
    }

    pub(crate) async fn handle_unlock(&self, req: &Request<()>) -> DavResult<Response<Body>> {
        let path = self.path(req)?;
        let token = req
            .headers()
            .typed_get::<davheaders::LockToken>()
            .ok_or(StatusCode::BAD_REQUEST)?;

        let _guard = self.guards.lock(&[&path]).await;

        // a token that does not apply to this path is a 409.
        self.ls.unlock(&path, &token.0)?;
        debug!("UNLOCK {path}: released {}", token.0);
        self.relax(&path).await;

        let mut res = Response::new(Body::empty());
        res.headers_mut().typed_insert(headers::ContentLength(0));
        *res.status_mut() = StatusCode::NO_CONTENT;
        Ok(res)
    }

    /// DAV:lockdiscovery for a resource.
    pub(crate) fn list_lockdiscovery(&self, path: &DavPath) -> Element {
        let mut elem = Element::new2("D:lockdiscovery");
        for lock in self.ls.discover(path) {
            elem.push_elem(self.build_lock_prop(&lock));
        }
        elem
    }

    // <D:activelock>
    fn build_lock_prop(&self, lock: &DavLock) -> Element {
        let mut actlock = Element::new2("D:activelock");

        let mut elem = Element::new2("D:lockscope");
        elem.push_elem(match lock.shared {
            false => Element::new2("D:exclusive"),
            true => Element::new2("D:shared"),
        });
        actlock.push_elem(elem);

        let mut elem = Element::new2("D:locktype");
        elem.push_elem(Element::new2("D:write"));
        actlock.push_elem(elem);

        actlock.push_elem(
            Element::new2("D:depth").text(if lock.deep { "infinity" } else { "0" }),
        );

        if let Some(ref owner) = lock.owner {
            if let Ok(o) = Element::parse(Cursor::new(owner.as_bytes())) {
                actlock.push_elem(o);
            }
        }

        let timeout = match lock.timeout_at {
            Some(at) => {
                let left = at
                    .duration_since(SystemTime::now())
                    .unwrap_or(Duration::ZERO);
                format!("Second-{}", left.as_secs())
            }
            None => "Infinite".to_string(),
        };
        actlock.push_elem(Element::new2("D:timeout").text(timeout));

        let mut elem = Element::new2("D:locktoken");
        elem.push_elem(Element::new2("D:href").text(lock.token.clone()));
        actlock.push_elem(elem);

        let mut elem = Element::new2("D:lockroot");
        let root = format!(
            "{}{}",
            self.prefix.trim_end_matches('/'),
            lock.path.as_url_string()
        );
        elem.push_elem(Element::new2("D:href").text(root));
        actlock.push_elem(elem);

        actlock
    }
}

/// DAV:supportedlock, the same for every resource.
pub(crate) fn list_supportedlock() -> Element {
    let mut elem = Element::new2("D:supportedlock");
    for scope in ["D:exclusive", "D:shared"] {
        let mut entry = Element::new2("D:lockentry");
        let mut s = Element::new2("D:lockscope");
        s.push_elem(Element::new2(scope));
        entry.push_elem(s);
        let mut t = Element::new2("D:locktype");
        t.push_elem(Element::new2("D:write"));
        entry.push_elem(t);
        elem.push_elem(entry);
    }
    elem
}

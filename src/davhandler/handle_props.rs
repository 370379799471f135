use std::collections::BTreeMap;

use headers::HeaderMapExt;
use http::{header, HeaderValue, Request, Response, StatusCode};
use xmltree::Element;

use crate::body::Body;
use crate::conditional::if_match_get_tokens;
use crate::davheaders::{self, Depth};
use crate::davhandler::handle_lock::list_supportedlock;
use crate::davxml::{
    davprop_to_element, element_to_davprop, element_to_davprop_full, empty_prop,
    parse_propfind, parse_proppatch, prop_key, MultiStatus, PropPatch, PropfindRequest,
};
use crate::errors::DavError;
use crate::fs::{DavProp, PropUpdate, Resource};
use crate::util::{systemtime_to_httpdate, systemtime_to_rfc3339};
use crate::xmltree_ext::{ElementExt, NS_DAV_URI, NS_MS_URI};
use crate::DavResult;

// Live properties returned by allprop and propname, in this order.
const ALLPROP: &[(&str, &str)] = &[
    (NS_DAV_URI, "creationdate"),
    (NS_DAV_URI, "displayname"),
    (NS_DAV_URI, "getcontentlength"),
    (NS_DAV_URI, "getcontenttype"),
    (NS_DAV_URI, "getetag"),
    (NS_DAV_URI, "getlastmodified"),
    (NS_DAV_URI, "resourcetype"),
    (NS_DAV_URI, "lockdiscovery"),
    (NS_DAV_URI, "supportedlock"),
    (NS_MS_URI, "Win32CreationTime"),
    (NS_MS_URI, "Win32LastAccessTime"),
    (NS_MS_URI, "Win32LastModifiedTime"),
    (NS_MS_URI, "Win32FileAttributes"),
];

// DAV: properties a client may set. They are stored as dead properties.
const WRITABLE_DAV: &[&str] = &["displayname", "getcontentlanguage"];

// Win32 attribute bits.
const FILE_ATTRIBUTE_HIDDEN: u32 = 0x02;
const FILE_ATTRIBUTE_DIRECTORY: u32 = 0x10;
const FILE_ATTRIBUTE_ARCHIVE: u32 = 0x20;

type PropStats = BTreeMap<StatusCode, Vec<Element>>;

fn add_prop(props: &mut PropStats, status: StatusCode, elem: Element) {
    props.entry(status).or_default().push(elem);
}

// Windows sets these on every upload. We accept them and throw them away.
fn is_win32_prop(e: &Element) -> bool {
    e.namespace.as_deref() == Some(NS_MS_URI) && e.name.starts_with("Win32")
}

fn win32_attributes(meta: &Resource) -> u32 {
    let mut attrs = if meta.is_collection() {
        FILE_ATTRIBUTE_DIRECTORY
    } else {
        FILE_ATTRIBUTE_ARCHIVE
    };
    if meta.path.file_name().map_or(false, |n| n.starts_with('.')) {
        attrs |= FILE_ATTRIBUTE_HIDDEN;
    }
    attrs
}

fn find_dead<'a>(dead: &'a [DavProp], ns: Option<&str>, name: &str) -> Option<&'a DavProp> {
    dead.iter()
        .find(|p| p.name == name && p.namespace.as_deref() == ns)
}

impl crate::DavHandler {
    pub(crate) async fn handle_propfind(
        &self,
        req: &Request<()>,
        xmldata: &[u8],
    ) -> DavResult<Response<Body>> {
        let mut path = self.path(req)?;
        // no Depth: header means infinity.
        let depth = davheaders::typed_strict::<Depth>(req.headers())?.unwrap_or(Depth::Infinity);
        let request = parse_propfind(xmldata)?;
        debug!("PROPFIND {path} depth {depth:?} {}", request.name());

        let mut res = Response::new(Body::empty());
        let meta = self.fs.metadata(&path).await?;
        self.fixpath(&mut res, &mut path, &meta);

        let mut ms = MultiStatus::new()?;
        // depth-first, without recursion.
        let mut todo = vec![(meta, 0u32)];
        while let Some((meta, level)) = todo.pop() {
            self.propfind_one(&mut ms, &meta, &request).await?;
            let descend = meta.is_collection()
                && match depth {
                    Depth::Zero => false,
                    Depth::One => level == 0,
                    Depth::Infinity => true,
                };
            if !descend {
                continue;
            }
            match self.fs.read_dir(&meta.path).await {
                Ok(children) => {
                    todo.extend(children.into_iter().rev().map(|c| (c, level + 1)));
                }
                Err(e) => {
                    debug!("PROPFIND: read_dir {}: {e}", meta.path);
                    let status = DavError::FsError(e).statuscode();
                    ms.status_response(&meta.path.as_url_string_with_prefix(), status)?;
                }
            }
        }

        let body = ms.finish()?;
        let h = res.headers_mut();
        h.insert(
            header::CONTENT_TYPE,
            HeaderValue::from_static("application/xml; charset=utf-8"),
        );
        h.typed_insert(headers::ContentLength(body.len() as u64));
        *res.status_mut() = StatusCode::MULTI_STATUS;
        *res.body_mut() = Body::from(body);
        Ok(res)
    }

    // One <response> of a PROPFIND.
    async fn propfind_one(
        &self,
        ms: &mut MultiStatus,
        meta: &Resource,
        request: &PropfindRequest,
    ) -> DavResult<()> {
        let dead = if self.fs.have_props(&meta.path).await {
            match self.fs.get_props(&meta.path).await {
                Ok(dead) => dead,
                Err(e) => {
                    // fail this resource, not the whole listing.
                    error!("PROPFIND {}: property store: {e}", meta.path);
                    let href = meta.path.as_url_string_with_prefix();
                    return ms.status_response(&href, StatusCode::INTERNAL_SERVER_ERROR);
                }
            }
        } else {
            Vec::new()
        };

        let mut props = PropStats::new();
        match request {
            PropfindRequest::PropName => {
                for &(ns, name) in ALLPROP {
                    if self.liveprop(meta, &dead, ns, name).is_some() {
                        add_prop(&mut props, StatusCode::OK, empty_prop(Some(ns), name));
                    }
                }
                for p in &dead {
                    if !is_shadowed(p) {
                        add_prop(&mut props, StatusCode::OK, davprop_to_element(p, false));
                    }
                }
            }
            PropfindRequest::AllProp(include) => {
                let mut seen = Vec::new();
                for &(ns, name) in ALLPROP {
                    if let Some(e) = self.liveprop(meta, &dead, ns, name) {
                        add_prop(&mut props, StatusCode::OK, e);
                        seen.push(prop_key(Some(ns), name));
                    }
                }
                for p in &dead {
                    let key = prop_key(p.namespace.as_deref(), &p.name);
                    if !seen.contains(&key) {
                        add_prop(&mut props, StatusCode::OK, davprop_to_element(p, true));
                        seen.push(key);
                    }
                }
                for e in include {
                    if !seen.contains(&prop_key(e.namespace.as_deref(), &e.name)) {
                        let (status, elem) = self.find_prop(meta, &dead, e);
                        add_prop(&mut props, status, elem);
                    }
                }
            }
            PropfindRequest::Prop(wanted) => {
                for e in wanted {
                    let (status, elem) = self.find_prop(meta, &dead, e);
                    add_prop(&mut props, status, elem);
                }
            }
        }
        ms.propstat_response(&meta.path.as_url_string_with_prefix(), props)
    }

    // A single requested property, live or dead.
    fn find_prop(&self, meta: &Resource, dead: &[DavProp], want: &Element) -> (StatusCode, Element) {
        let ns = want.namespace.as_deref();
        if let Some(ns) = ns {
            if let Some(e) = self.liveprop(meta, dead, ns, &want.name) {
                return (StatusCode::OK, e);
            }
        }
        match find_dead(dead, ns, &want.name) {
            Some(p) => (StatusCode::OK, davprop_to_element(p, true)),
            None => (StatusCode::NOT_FOUND, empty_prop(ns, &want.name)),
        }
    }

    // Compute a live property. `None` if it does not apply to this resource.
    fn liveprop(&self, meta: &Resource, dead: &[DavProp], ns: &str, name: &str) -> Option<Element> {
        // displayname and getcontentlanguage may have been set by a client.
        if ns == NS_DAV_URI && WRITABLE_DAV.contains(&name) {
            if let Some(p) = find_dead(dead, Some(ns), name) {
                return Some(davprop_to_element(p, true));
            }
        }
        let e = match (ns, name) {
            (NS_DAV_URI, "creationdate") => Element::new2("D:creationdate")
                .text(systemtime_to_rfc3339(meta.created.unwrap_or(meta.modified))),
            (NS_DAV_URI, "displayname") => {
                Element::new2("D:displayname").text(meta.path.file_name().unwrap_or(""))
            }
            (NS_DAV_URI, "getcontentlength") if meta.is_file() => {
                Element::new2("D:getcontentlength").text(meta.len.to_string())
            }
            (NS_DAV_URI, "getcontenttype") => {
                Element::new2("D:getcontenttype").text(meta.content_type())
            }
            (NS_DAV_URI, "getetag") => Element::new2("D:getetag").text(format!("\"{}\"", meta.etag)),
            (NS_DAV_URI, "getlastmodified") => {
                Element::new2("D:getlastmodified").text(systemtime_to_httpdate(meta.modified))
            }
            (NS_DAV_URI, "resourcetype") => {
                let mut e = Element::new2("D:resourcetype");
                if meta.is_collection() {
                    e.push_elem(Element::new2("D:collection"));
                }
                e
            }
            (NS_DAV_URI, "lockdiscovery") => self.list_lockdiscovery(&meta.path),
            (NS_DAV_URI, "supportedlock") => list_supportedlock(),
            (NS_MS_URI, "Win32CreationTime") => Element::new2("Z:Win32CreationTime")
                .text(systemtime_to_httpdate(meta.created.unwrap_or(meta.modified))),
            (NS_MS_URI, "Win32LastAccessTime") => Element::new2("Z:Win32LastAccessTime")
                .text(systemtime_to_httpdate(meta.accessed.unwrap_or(meta.modified))),
            (NS_MS_URI, "Win32LastModifiedTime") => {
                Element::new2("Z:Win32LastModifiedTime").text(systemtime_to_httpdate(meta.modified))
            }
            (NS_MS_URI, "Win32FileAttributes") => Element::new2("Z:Win32FileAttributes")
                .text(format!("{:08x}", win32_attributes(meta))),
            _ => return None,
        };
        Some(e)
    }

    pub(crate) async fn handle_proppatch(
        &self,
        req: &Request<()>,
        xmldata: &[u8],
    ) -> DavResult<Response<Body>> {
        let mut path = self.path(req)?;
        let patch = parse_proppatch(xmldata)?;

        let _guard = self.guards.lock(&[&path]).await;

        let mut res = Response::new(Body::empty());
        let meta = self.fs.metadata(&path).await?;
        self.fixpath(&mut res, &mut path, &meta);

        let tokens = if_match_get_tokens(
            req,
            Some(&meta),
            &path,
            &self.prefix,
            &*self.fs,
            &*self.ls,
        )
        .await?;
        self.check_lock(&path, false, &tokens)?;

        let can_store = self.fs.have_props(&path).await;

        // Decide per property first. Nothing is stored unless all of them
        // can be.
        let mut results: Vec<(StatusCode, Element)> = Vec::new();
        let mut updates = Vec::new();
        for p in patch {
            let (set, elem) = match p {
                PropPatch::Set(e) => (true, e),
                PropPatch::Remove(e) => (false, e),
            };
            let name = empty_prop(elem.namespace.as_deref(), &elem.name);
            if is_win32_prop(&elem) {
                results.push((StatusCode::OK, name));
                continue;
            }
            let protected = elem.namespace.as_deref() == Some(NS_DAV_URI)
                && !WRITABLE_DAV.contains(&elem.name.as_str());
            if protected || !can_store {
                debug!("PROPPATCH {path}: refusing {}", elem.name);
                results.push((StatusCode::FORBIDDEN, name));
                continue;
            }
            updates.push(if set {
                PropUpdate::Set(element_to_davprop_full(&elem)?)
            } else {
                PropUpdate::Remove(element_to_davprop(&elem))
            });
            results.push((StatusCode::OK, name));
        }

        if results.iter().any(|(s, _)| *s != StatusCode::OK) {
            for (s, _) in results.iter_mut() {
                if *s == StatusCode::OK {
                    *s = StatusCode::FAILED_DEPENDENCY;
                }
            }
        } else if !updates.is_empty() {
            match self.fs.patch_props(&path, updates).await {
                Ok(()) => self.relax(&path).await,
                Err(e) => {
                    let status = DavError::FsError(e).statuscode();
                    for (s, _) in results.iter_mut() {
                        *s = status;
                    }
                }
            }
        }

        let mut props = PropStats::new();
        for (status, elem) in results {
            add_prop(&mut props, status, elem);
        }
        let mut ms = MultiStatus::new()?;
        ms.propstat_response(&path.as_url_string_with_prefix(), props)?;
        let body = ms.finish()?;

        let h = res.headers_mut();
        h.insert(
            header::CONTENT_TYPE,
            HeaderValue::from_static("application/xml; charset=utf-8"),
        );
        h.typed_insert(headers::ContentLength(body.len() as u64));
        *res.status_mut() = StatusCode::MULTI_STATUS;
        *res.body_mut() = Body::from(body);
        Ok(res)
    }
}

// A stored displayname or getcontentlanguage is reported with the live
// properties already.
fn is_shadowed(p: &DavProp) -> bool {
    p.namespace.as_deref() == Some(NS_DAV_URI) && WRITABLE_DAV.contains(&p.name.as_str())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::davhandler::FileSystem;
    use crate::davpath::DavPath;
    use crate::fs::localfs::LocalFs;
    use crate::fs::{DavFile, DavFileSystem, DavWriter, FsError, FsFuture, ResourceKind};
    use std::time::UNIX_EPOCH;

    fn resource(path: &str, kind: ResourceKind) -> Resource {
        Resource {
            path: DavPath::new(path).unwrap(),
            kind,
            len: 0,
            modified: UNIX_EPOCH,
            created: None,
            accessed: None,
            etag: "0".to_string(),
        }
    }

    #[test]
    fn file_attributes() {
        assert_eq!(win32_attributes(&resource("/a.txt", ResourceKind::File)), 0x20);
        assert_eq!(win32_attributes(&resource("/dir/", ResourceKind::Collection)), 0x10);
        assert_eq!(win32_attributes(&resource("/.hidden", ResourceKind::File)), 0x22);
    }

    // Local storage whose property store cannot read one resource.
    struct BrokenProps(std::sync::Arc<crate::fs::localfs::LocalFs>);

    impl DavFileSystem for BrokenProps {
        fn metadata<'a>(&'a self, path: &'a DavPath) -> FsFuture<'a, Resource> {
            self.0.metadata(path)
        }
        fn read_dir<'a>(&'a self, path: &'a DavPath) -> FsFuture<'a, Vec<Resource>> {
            self.0.read_dir(path)
        }
        fn open<'a>(&'a self, path: &'a DavPath) -> FsFuture<'a, Box<dyn DavFile>> {
            self.0.open(path)
        }
        fn create<'a>(&'a self, path: &'a DavPath) -> FsFuture<'a, Box<dyn DavWriter>> {
            self.0.create(path)
        }
        fn create_dir<'a>(&'a self, path: &'a DavPath) -> FsFuture<'a, ()> {
            self.0.create_dir(path)
        }
        fn remove<'a>(&'a self, path: &'a DavPath) -> FsFuture<'a, ()> {
            self.0.remove(path)
        }
        fn rename<'a>(&'a self, from: &'a DavPath, to: &'a DavPath, overwrite: bool) -> FsFuture<'a, ()> {
            self.0.rename(from, to, overwrite)
        }
        fn copy<'a>(
            &'a self,
            from: &'a DavPath,
            to: &'a DavPath,
            deep: bool,
            overwrite: bool,
        ) -> FsFuture<'a, ()> {
            self.0.copy(from, to, deep, overwrite)
        }
        fn have_props<'a>(
            &'a self,
            path: &'a DavPath,
        ) -> std::pin::Pin<Box<dyn std::future::Future<Output = bool> + Send + 'a>> {
            self.0.have_props(path)
        }
        fn get_props<'a>(&'a self, path: &'a DavPath) -> FsFuture<'a, Vec<DavProp>> {
            if path.file_name() == Some("broken.txt") {
                return Box::pin(std::future::ready(Err(FsError::GeneralFailure)));
            }
            self.0.get_props(path)
        }
    }

    #[tokio::test]
    async fn unreadable_props_fail_one_response() {
        let dir = tempfile::TempDir::new().unwrap();
        std::fs::write(dir.path().join("ok.txt"), "fine").unwrap();
        std::fs::write(dir.path().join("broken.txt"), "fine too").unwrap();
        let fs = LocalFs::new(dir.path().to_path_buf(), false, false, None);
        let dav = crate::DavHandler::builder(FileSystem::Custom(std::sync::Arc::new(BrokenProps(fs))))
            .build();

        let req = Request::builder()
            .method("PROPFIND")
            .uri("/")
            .header("Depth", "1")
            .body(hyper::Body::empty())
            .unwrap();
        let res = dav.handle(req).await;
        assert_eq!(res.status(), StatusCode::MULTI_STATUS);
        let body = hyper::body::to_bytes(res.into_body()).await.unwrap();
        let body = String::from_utf8_lossy(&body);

        let responses: Vec<&str> = body.split("<D:response>").skip(1).collect();
        assert_eq!(responses.len(), 3);
        for r in responses {
            let failed = r.contains("500 Internal Server Error");
            assert_eq!(failed, r.contains("/broken.txt"), "{r}");
            assert_eq!(failed, !r.contains("getetag"), "{r}");
        }
    }

    #[test]
    fn win32_props_are_recognized() {
        assert!(is_win32_prop(&Element::new2("Z:Win32LastModifiedTime")));
        assert!(!is_win32_prop(&Element::new2("D:getlastmodified")));
    }
}

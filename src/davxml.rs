//! Request body parsing and multistatus response generation.

use std::collections::BTreeMap;
use std::io::Cursor;

use bytes::Bytes;
use http::StatusCode;
use xml::writer::{EventWriter, XmlEvent as XmlWEvent};
use xmltree::Element;

use crate::errors::DavError;
use crate::fs::DavProp;
use crate::util::MemBuffer;
use crate::xmltree_ext::{self, ElementExt, NS_DAV_URI, NS_MS_URI};
use crate::DavResult;

/// What a PROPFIND asks for.
#[derive(Debug, Clone)]
pub(crate) enum PropfindRequest {
    /// All properties, plus the ones named in `<include>`.
    AllProp(Vec<Element>),
    /// Only the names of the properties.
    PropName,
    /// These specific properties.
    Prop(Vec<Element>),
}

impl PropfindRequest {
    pub(crate) fn name(&self) -> &'static str {
        match self {
            PropfindRequest::AllProp(_) => "allprop",
            PropfindRequest::PropName => "propname",
            PropfindRequest::Prop(_) => "prop",
        }
    }
}

/// One instruction of a PROPPATCH, in document order.
#[derive(Debug, Clone)]
pub(crate) enum PropPatch {
    Set(Element),
    Remove(Element),
}

/// Parsed `<lockinfo>`.
#[derive(Debug, Clone)]
pub(crate) struct LockInfo {
    pub shared: bool,
    pub owner: Option<Element>,
}

pub(crate) fn parse_propfind(xmldata: &[u8]) -> DavResult<PropfindRequest> {
    // an empty body means allprop.
    if xmldata.iter().all(|b| b.is_ascii_whitespace()) {
        return Ok(PropfindRequest::AllProp(Vec::new()));
    }
    let root = Element::parse_dav(Cursor::new(xmldata), "propfind")?;
    let mut includes = Vec::new();
    let mut req = None;
    for elem in root.take_child_elems() {
        if elem.namespace.as_deref() != Some(NS_DAV_URI) {
            continue;
        }
        match elem.name.as_str() {
            "include" => includes = elem.take_child_elems(),
            "allprop" if req.is_none() => req = Some(PropfindRequest::AllProp(Vec::new())),
            "propname" if req.is_none() => req = Some(PropfindRequest::PropName),
            "prop" if req.is_none() => req = Some(PropfindRequest::Prop(elem.take_child_elems())),
            _ => return Err(DavError::XmlParseError),
        }
    }
    match req {
        Some(PropfindRequest::AllProp(_)) => Ok(PropfindRequest::AllProp(includes)),
        Some(r) => Ok(r),
        None => Err(DavError::XmlParseError),
    }
}

pub(crate) fn parse_proppatch(xmldata: &[u8]) -> DavResult<Vec<PropPatch>> {
    let root = Element::parse_dav(Cursor::new(xmldata), "propertyupdate")?;
    let mut patches = Vec::new();
    for op in root.take_child_elems() {
        let set = match op.name.as_str() {
            _ if op.namespace.as_deref() != Some(NS_DAV_URI) => continue,
            "set" => true,
            "remove" => false,
            _ => return Err(DavError::XmlParseError),
        };
        for prop in op.take_child_elems().into_iter().filter(|e| e.is_dav("prop")) {
            for p in prop.take_child_elems() {
                patches.push(if set {
                    PropPatch::Set(p)
                } else {
                    PropPatch::Remove(p)
                });
            }
        }
    }
    if patches.is_empty() {
        return Err(DavError::XmlParseError);
    }
    Ok(patches)
}

pub(crate) fn parse_lockinfo(xmldata: &[u8]) -> DavResult<LockInfo> {
    let root = Element::parse_dav(Cursor::new(xmldata), "lockinfo")?;
    let mut shared = None;
    let mut locktype = false;
    let mut owner = None;
    for elem in root.take_child_elems() {
        if elem.is_dav("lockscope") {
            shared = match elem.child_elems().next() {
                Some(e) if e.is_dav("exclusive") => Some(false),
                Some(e) if e.is_dav("shared") => Some(true),
                _ => return Err(DavError::XmlParseError),
            };
        } else if elem.is_dav("locktype") {
            // write locks are the only kind there is.
            match elem.child_elems().next() {
                Some(e) if e.is_dav("write") => locktype = true,
                _ => return Err(DavError::XmlParseError),
            }
        } else if elem.is_dav("owner") {
            owner = Some(elem);
        }
    }
    match shared {
        Some(shared) if locktype => Ok(LockInfo { shared, owner }),
        _ => Err(DavError::XmlParseError),
    }
}

/// Key under which a property is stored: `{namespace}name`.
pub(crate) fn prop_key(namespace: Option<&str>, name: &str) -> String {
    format!("{{{}}}{}", namespace.unwrap_or(""), name)
}

pub(crate) fn element_to_davprop(elem: &Element) -> DavProp {
    DavProp {
        name: elem.name.clone(),
        namespace: elem.namespace.clone(),
        xml: None,
    }
}

pub(crate) fn element_to_davprop_full(elem: &Element) -> DavResult<DavProp> {
    Ok(DavProp {
        name: elem.name.clone(),
        namespace: elem.namespace.clone(),
        xml: Some(elem.to_fragment()?),
    })
}

/// Turn a stored property back into an element. Without `content` only
/// the (empty) name element is returned, as PROPFIND propname wants.
pub(crate) fn davprop_to_element(prop: &DavProp, content: bool) -> Element {
    if content {
        if let Some(ref xml) = prop.xml {
            if let Ok(e) = Element::parse(Cursor::new(xml.as_bytes())) {
                return e;
            }
        }
    }
    empty_prop(prop.namespace.as_deref(), &prop.name)
}

/// An empty property element with a usable prefix.
pub(crate) fn empty_prop(namespace: Option<&str>, name: &str) -> Element {
    match namespace {
        Some(NS_DAV_URI) => Element::new2(format!("D:{name}").as_str()),
        Some(NS_MS_URI) => Element::new2(format!("Z:{name}").as_str()),
        Some(ns) => {
            let mut e = Element::new(name).ns("X", ns);
            e.prefix = Some("X".to_string());
            e.namespace = Some(ns.to_string());
            e
        }
        None => Element::new(name),
    }
}

/// Writer for a `207 Multi-Status` body.
pub(crate) struct MultiStatus {
    emitter: EventWriter<MemBuffer>,
}

impl MultiStatus {
    pub(crate) fn new() -> DavResult<MultiStatus> {
        let mut emitter = xmltree_ext::emitter(MemBuffer::new())?;
        emitter.write(
            XmlWEvent::start_element("D:multistatus")
                .ns("D", NS_DAV_URI)
                .ns("Z", NS_MS_URI),
        )?;
        Ok(MultiStatus { emitter })
    }

    /// A `<response>` with one `<propstat>` per status.
    pub(crate) fn propstat_response(
        &mut self,
        href: &str,
        props: BTreeMap<StatusCode, Vec<Element>>,
    ) -> DavResult<()> {
        self.emitter.write(XmlWEvent::start_element("D:response"))?;
        Element::new2("D:href").text(href).write_ev(&mut self.emitter)?;
        for (status, elems) in props {
            self.emitter.write(XmlWEvent::start_element("D:propstat"))?;
            self.emitter.write(XmlWEvent::start_element("D:prop"))?;
            for e in &elems {
                e.write_ev(&mut self.emitter)?;
            }
            self.emitter.write(XmlWEvent::end_element())?;
            Element::new2("D:status")
                .text(format!("HTTP/1.1 {status}"))
                .write_ev(&mut self.emitter)?;
            self.emitter.write(XmlWEvent::end_element())?;
        }
        self.emitter.write(XmlWEvent::end_element())?;
        Ok(())
    }

    /// A `<response>` carrying a single status for the whole resource.
    pub(crate) fn status_response(&mut self, href: &str, status: StatusCode) -> DavResult<()> {
        self.emitter.write(XmlWEvent::start_element("D:response"))?;
        Element::new2("D:href").text(href).write_ev(&mut self.emitter)?;
        Element::new2("D:status")
            .text(format!("HTTP/1.1 {status}"))
            .write_ev(&mut self.emitter)?;
        self.emitter.write(XmlWEvent::end_element())?;
        Ok(())
    }

    pub(crate) fn finish(mut self) -> DavResult<Bytes> {
        self.emitter.write(XmlWEvent::end_element())?;
        Ok(self.emitter.into_inner().take())
    }
}

/// Wrap a single element in a `<D:prop>` document, as the LOCK response
/// body wants.
pub(crate) fn prop_document(elem: &Element) -> DavResult<Bytes> {
    let mut emitter = xmltree_ext::emitter(MemBuffer::new())?;
    emitter.write(XmlWEvent::start_element("D:prop").ns("D", NS_DAV_URI))?;
    elem.write_ev(&mut emitter)?;
    emitter.write(XmlWEvent::end_element())?;
    Ok(emitter.into_inner().take())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn empty_propfind_is_allprop() {
        assert!(matches!(
            parse_propfind(b"").unwrap(),
            PropfindRequest::AllProp(v) if v.is_empty()
        ));
        assert!(matches!(
            parse_propfind(b"  \r\n").unwrap(),
            PropfindRequest::AllProp(_)
        ));
    }

    #[test]
    fn propfind_variants() {
        let req = br#"<?xml version="1.0"?><D:propfind xmlns:D="DAV:"><D:prop><D:getetag/><x:foo xmlns:x="urn:x"/></D:prop></D:propfind>"#;
        match parse_propfind(req).unwrap() {
            PropfindRequest::Prop(v) => {
                assert_eq!(v.len(), 2);
                assert!(v[0].is_dav("getetag"));
                assert_eq!(v[1].namespace.as_deref(), Some("urn:x"));
            }
            other => panic!("unexpected {other:?}"),
        }
        let req = br#"<propfind xmlns="DAV:"><propname/></propfind>"#;
        assert!(matches!(parse_propfind(req).unwrap(), PropfindRequest::PropName));

        assert!(parse_propfind(b"<D:propfind xmlns:D=\"DAV:\"></D:propfind>").is_err());
        assert!(parse_propfind(b"<not xml").is_err());
        assert!(parse_propfind(b"<D:lockinfo xmlns:D=\"DAV:\"/>").is_err());
    }

    #[test]
    fn proppatch_keeps_order() {
        let req = br#"<D:propertyupdate xmlns:D="DAV:" xmlns:x="urn:x">
            <D:set><D:prop><x:a>1</x:a></D:prop></D:set>
            <D:remove><D:prop><x:b/></D:prop></D:remove>
            <D:set><D:prop><x:c>3</x:c></D:prop></D:set>
            </D:propertyupdate>"#;
        let v = parse_proppatch(req).unwrap();
        let names: Vec<_> = v
            .iter()
            .map(|p| match p {
                PropPatch::Set(e) => format!("set {}", e.name),
                PropPatch::Remove(e) => format!("remove {}", e.name),
            })
            .collect();
        assert_eq!(names, vec!["set a", "remove b", "set c"]);
    }

    #[test]
    fn lockinfo() {
        let req = br#"<?xml version="1.0" encoding="utf-8" ?>
            <D:lockinfo xmlns:D='DAV:'>
              <D:lockscope><D:exclusive/></D:lockscope>
              <D:locktype><D:write/></D:locktype>
              <D:owner><D:href>mailto:someone@example.com</D:href></D:owner>
            </D:lockinfo>"#;
        let li = parse_lockinfo(req).unwrap();
        assert!(!li.shared);
        assert!(li.owner.is_some());

        let req = br#"<D:lockinfo xmlns:D='DAV:'><D:lockscope><D:shared/></D:lockscope></D:lockinfo>"#;
        assert!(parse_lockinfo(req).is_err());
    }

    #[test]
    fn multistatus_document() {
        let mut ms = MultiStatus::new().unwrap();
        let mut props = BTreeMap::new();
        props.insert(StatusCode::NOT_FOUND, vec![empty_prop(Some("urn:x"), "missing")]);
        props.insert(
            StatusCode::OK,
            vec![Element::new2("D:getcontentlength").text("5")],
        );
        ms.propstat_response("/webdav/a.txt", props).unwrap();
        ms.status_response("/webdav/b.txt", StatusCode::LOCKED).unwrap();
        let body = String::from_utf8(ms.finish().unwrap().to_vec()).unwrap();

        assert!(body.starts_with("<?xml"));
        assert_eq!(body.matches("<D:response>").count(), 2);
        assert!(body.contains("<D:getcontentlength>5</D:getcontentlength>"));
        assert!(body.contains("HTTP/1.1 423 Locked"));
        // 200 sorts before 404.
        let ok = body.find("200 OK").unwrap();
        let nf = body.find("404 Not Found").unwrap();
        assert!(ok < nf);

        let doc = Element::parse(Cursor::new(body)).unwrap();
        assert!(doc.is_dav("multistatus"));
    }
}

use std::io::{Read, Write};

use xml::common::XmlVersion;
use xml::writer::{EventWriter, XmlEvent as XmlWEvent};
use xml::EmitterConfig;
use xmltree::{Element, Namespace, XMLNode};

use crate::errors::DavError;
use crate::DavResult;

pub(crate) const NS_DAV_URI: &str = "DAV:";
pub(crate) const NS_MS_URI: &str = "urn:schemas-microsoft-com:";

pub(crate) trait ElementExt {
    /// Builder: "D:name" gets the DAV: namespace, "Z:name" the Microsoft one.
    fn new2(n: &str) -> Self;
    /// Builder: add a namespace declaration.
    fn ns<S: Into<String>>(self, prefix: S, namespace: S) -> Self;
    /// Builder: set the text content.
    fn text<S: Into<String>>(self, text: S) -> Self;
    /// Append a child element.
    fn push_elem(&mut self, e: Element);
    /// Iterate over the child elements, skipping text.
    fn child_elems(&self) -> Box<dyn Iterator<Item = &Element> + '_>;
    /// Take the child elements, dropping text.
    fn take_child_elems(self) -> Vec<Element>;
    /// Does this element have name `name` in the DAV: namespace.
    fn is_dav(&self, name: &str) -> bool;
    /// Parse, requiring the root element to be DAV:`root`.
    fn parse_dav<R: Read>(r: R, root: &str) -> DavResult<Element>;
    /// Write this element and its children to an EventWriter.
    fn write_ev<W: Write>(&self, emitter: &mut EventWriter<W>) -> xml::writer::Result<()>;
    /// Serialize as a standalone fragment, without xml declaration.
    fn to_fragment(&self) -> DavResult<String>;
}

impl ElementExt for Element {
    fn new2(n: &str) -> Element {
        let v: Vec<&str> = n.splitn(2, ':').collect();
        if v.len() == 1 {
            return Element::new(v[0]);
        }
        let mut e = Element::new(v[1]);
        e.namespace = match v[0] {
            "D" => Some(NS_DAV_URI.to_string()),
            "Z" => Some(NS_MS_URI.to_string()),
            _ => None,
        };
        e.prefix = Some(v[0].to_string());
        e
    }

    fn ns<S: Into<String>>(mut self, prefix: S, namespace: S) -> Element {
        let mut ns = self.namespaces.unwrap_or_else(Namespace::empty);
        ns.force_put(prefix.into(), namespace.into());
        self.namespaces = Some(ns);
        self
    }

    fn text<S: Into<String>>(mut self, text: S) -> Element {
        let text = text.into();
        self.children.retain(|c| !matches!(c, XMLNode::Text(_)));
        if !text.is_empty() {
            self.children.push(XMLNode::Text(text));
        }
        self
    }

    fn push_elem(&mut self, e: Element) {
        self.children.push(XMLNode::Element(e));
    }

    fn child_elems(&self) -> Box<dyn Iterator<Item = &Element> + '_> {
        Box::new(self.children.iter().filter_map(|n| n.as_element()))
    }

    fn take_child_elems(self) -> Vec<Element> {
        self.children
            .into_iter()
            .filter_map(|n| match n {
                XMLNode::Element(e) => Some(e),
                _ => None,
            })
            .collect()
    }

    fn is_dav(&self, name: &str) -> bool {
        self.name == name && self.namespace.as_deref() == Some(NS_DAV_URI)
    }

    fn parse_dav<R: Read>(r: R, root: &str) -> DavResult<Element> {
        let elem = Element::parse(r)?;
        if !elem.is_dav(root) {
            debug!("expected DAV:{} root element, got {}", root, elem.name);
            return Err(DavError::XmlParseError);
        }
        Ok(elem)
    }

    fn write_ev<W: Write>(&self, emitter: &mut EventWriter<W>) -> xml::writer::Result<()> {
        let name = match self.prefix {
            Some(ref p) => format!("{}:{}", p, self.name),
            None => self.name.clone(),
        };
        let mut start = XmlWEvent::start_element(name.as_str());
        if let Some(ref ns) = self.namespaces {
            for (k, v) in ns {
                match (k, v) {
                    ("xml", _) | ("xmlns", _) | ("", "") => {}
                    _ => start = start.ns(k, v),
                }
            }
        }
        for (k, v) in &self.attributes {
            start = start.attr(k.as_str(), v.as_str());
        }
        emitter.write(start)?;
        for child in &self.children {
            match child {
                XMLNode::Element(e) => e.write_ev(emitter)?,
                XMLNode::Text(t) => emitter.write(XmlWEvent::characters(t))?,
                XMLNode::CData(t) => emitter.write(XmlWEvent::cdata(t))?,
                _ => {}
            }
        }
        emitter.write(XmlWEvent::end_element())
    }

    fn to_fragment(&self) -> DavResult<String> {
        let mut emitter = EventWriter::new_with_config(
            Vec::new(),
            EmitterConfig::new()
                .write_document_declaration(false)
                .perform_indent(false),
        );
        self.write_ev(&mut emitter)?;
        String::from_utf8(emitter.into_inner()).map_err(|_| DavError::XmlParseError)
    }
}

/// A fresh emitter for a response document.
pub(crate) fn emitter<W: Write>(w: W) -> DavResult<EventWriter<W>> {
    let mut emitter = EventWriter::new_with_config(
        w,
        EmitterConfig::new()
            .normalize_empty_elements(false)
            .perform_indent(false),
    );
    emitter.write(XmlWEvent::StartDocument {
        version: XmlVersion::Version10,
        encoding: Some("utf-8"),
        standalone: None,
    })?;
    Ok(emitter)
}

//! Typed WebDAV request and response headers.

use std::fmt;

use headers::{Header, HeaderMapExt};
use http::header::{HeaderMap, HeaderName, HeaderValue};
use http::StatusCode;

lazy_static! {
    static ref DEPTH: HeaderName = HeaderName::from_static("depth");
    static ref TIMEOUT: HeaderName = HeaderName::from_static("timeout");
    static ref OVERWRITE: HeaderName = HeaderName::from_static("overwrite");
    static ref DESTINATION: HeaderName = HeaderName::from_static("destination");
    static ref LOCK_TOKEN: HeaderName = HeaderName::from_static("lock-token");
    static ref IF: HeaderName = HeaderName::from_static("if");
}

fn invalid() -> headers::Error {
    headers::Error::invalid()
}

// helper: exactly one header value, as a string.
fn one<'i, I>(values: &mut I) -> Result<&'i str, headers::Error>
where
    I: Iterator<Item = &'i HeaderValue>,
{
    let v = values.next().ok_or_else(invalid)?;
    if values.next().is_some() {
        return Err(invalid());
    }
    v.to_str().map(|s| s.trim()).map_err(|_| invalid())
}

fn encode_str<E: Extend<HeaderValue>>(values: &mut E, s: &str) {
    if let Ok(v) = HeaderValue::from_str(s) {
        values.extend(std::iter::once(v));
    }
}

/// A header that may be missing, but has to parse when it is there.
/// A malformed value is a `400`, not an absent header.
pub(crate) fn typed_strict<H: Header>(headers: &HeaderMap) -> Result<Option<H>, StatusCode> {
    headers.typed_try_get::<H>().map_err(|_| {
        debug!("malformed {} header", H::name());
        StatusCode::BAD_REQUEST
    })
}

/// Depth: header.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Depth {
    Zero,
    One,
    Infinity,
}

impl Header for Depth {
    fn name() -> &'static HeaderName {
        &DEPTH
    }

    fn decode<'i, I>(values: &mut I) -> Result<Self, headers::Error>
    where
        I: Iterator<Item = &'i HeaderValue>,
    {
        match one(values)?.to_ascii_lowercase().as_str() {
            "0" => Ok(Depth::Zero),
            "1" => Ok(Depth::One),
            "infinity" => Ok(Depth::Infinity),
            _ => Err(invalid()),
        }
    }

    fn encode<E: Extend<HeaderValue>>(&self, values: &mut E) {
        let value = match *self {
            Depth::Zero => "0",
            Depth::One => "1",
            Depth::Infinity => "infinity",
        };
        values.extend(std::iter::once(HeaderValue::from_static(value)));
    }
}

/// Overwrite: header. Absent means `T`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Overwrite(pub bool);

impl Header for Overwrite {
    fn name() -> &'static HeaderName {
        &OVERWRITE
    }

    fn decode<'i, I>(values: &mut I) -> Result<Self, headers::Error>
    where
        I: Iterator<Item = &'i HeaderValue>,
    {
        match one(values)? {
            "T" | "t" => Ok(Overwrite(true)),
            "F" | "f" => Ok(Overwrite(false)),
            _ => Err(invalid()),
        }
    }

    fn encode<E: Extend<HeaderValue>>(&self, values: &mut E) {
        let value = if self.0 { "T" } else { "F" };
        values.extend(std::iter::once(HeaderValue::from_static(value)));
    }
}

/// Destination: header, an absolute URL or an absolute path.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Destination(pub String);

impl Destination {
    /// The path part, still percent-encoded.
    pub fn path(&self) -> Option<String> {
        if self.0.starts_with('/') {
            return Some(self.0.clone());
        }
        url::Url::parse(&self.0).ok().map(|u| u.path().to_string())
    }
}

impl Header for Destination {
    fn name() -> &'static HeaderName {
        &DESTINATION
    }

    fn decode<'i, I>(values: &mut I) -> Result<Self, headers::Error>
    where
        I: Iterator<Item = &'i HeaderValue>,
    {
        Ok(Destination(one(values)?.to_string()))
    }

    fn encode<E: Extend<HeaderValue>>(&self, values: &mut E) {
        encode_str(values, &self.0);
    }
}

/// Lock-Token: header. Holds the token without the angle brackets.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LockToken(pub String);

impl Header for LockToken {
    fn name() -> &'static HeaderName {
        &LOCK_TOKEN
    }

    fn decode<'i, I>(values: &mut I) -> Result<Self, headers::Error>
    where
        I: Iterator<Item = &'i HeaderValue>,
    {
        let s = one(values)?;
        let token = s
            .strip_prefix('<')
            .and_then(|s| s.strip_suffix('>'))
            .ok_or_else(invalid)?;
        if token.is_empty() {
            return Err(invalid());
        }
        Ok(LockToken(token.to_string()))
    }

    fn encode<E: Extend<HeaderValue>>(&self, values: &mut E) {
        encode_str(values, &format!("<{}>", self.0));
    }
}

/// One entry of a Timeout: header.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DavTimeout {
    Seconds(u32),
    Infinite,
}

/// Timeout: header, in order of preference.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Timeout(pub Vec<DavTimeout>);

impl Header for Timeout {
    fn name() -> &'static HeaderName {
        &TIMEOUT
    }

    fn decode<'i, I>(values: &mut I) -> Result<Self, headers::Error>
    where
        I: Iterator<Item = &'i HeaderValue>,
    {
        let mut v = Vec::new();
        for value in values {
            let value = value.to_str().map_err(|_| invalid())?;
            for word in value.split(',').map(str::trim) {
                if word.eq_ignore_ascii_case("infinite") {
                    v.push(DavTimeout::Infinite);
                } else if let Some(num) = word
                    .get(..7)
                    .filter(|p| p.eq_ignore_ascii_case("second-"))
                    .map(|_| &word[7..])
                {
                    // clients sometimes send more than fits in an u32.
                    let secs = num.parse::<u64>().map_err(|_| invalid())?;
                    v.push(DavTimeout::Seconds(secs.min(u32::MAX as u64) as u32));
                }
            }
        }
        if v.is_empty() {
            return Err(invalid());
        }
        Ok(Timeout(v))
    }

    fn encode<E: Extend<HeaderValue>>(&self, values: &mut E) {
        let s = self
            .0
            .iter()
            .map(|t| match t {
                DavTimeout::Seconds(n) => format!("Second-{n}"),
                DavTimeout::Infinite => "Infinite".to_string(),
            })
            .collect::<Vec<_>>()
            .join(", ");
        encode_str(values, &s);
    }
}

/// Content-Location: header.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ContentLocation(pub String);

impl Header for ContentLocation {
    fn name() -> &'static HeaderName {
        &http::header::CONTENT_LOCATION
    }

    fn decode<'i, I>(values: &mut I) -> Result<Self, headers::Error>
    where
        I: Iterator<Item = &'i HeaderValue>,
    {
        Ok(ContentLocation(one(values)?.to_string()))
    }

    fn encode<E: Extend<HeaderValue>>(&self, values: &mut E) {
        encode_str(values, &self.0);
    }
}

/// A state token or an entity tag in an If: header condition.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum IfItem {
    StateToken(String),
    ETag(String),
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct IfCondition {
    pub not: bool,
    pub item: IfItem,
}

/// One parenthesized list, optionally tagged with a resource URL.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct IfList {
    pub resource_tag: Option<String>,
    pub conditions: Vec<IfCondition>,
}

/// If: header (RFC4918 10.4).
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct If(pub Vec<IfList>);

impl If {
    /// All state tokens that are not negated.
    pub fn tokens(&self) -> Vec<String> {
        let mut v = Vec::new();
        for list in &self.0 {
            for cond in &list.conditions {
                if let (false, IfItem::StateToken(t)) = (cond.not, &cond.item) {
                    if !v.contains(t) {
                        v.push(t.clone());
                    }
                }
            }
        }
        v
    }
}

fn parse_conditions(s: &str) -> Option<Vec<IfCondition>> {
    let mut out = Vec::new();
    let mut rest = s.trim_start();
    while !rest.is_empty() {
        let mut not = false;
        if rest.get(..3).map_or(false, |w| w.eq_ignore_ascii_case("not")) {
            not = true;
            rest = rest[3..].trim_start();
        }
        let item = if let Some(r) = rest.strip_prefix('<') {
            let end = r.find('>')?;
            rest = &r[end + 1..];
            IfItem::StateToken(r[..end].to_string())
        } else if let Some(r) = rest.strip_prefix('[') {
            let end = r.find(']')?;
            rest = &r[end + 1..];
            IfItem::ETag(r[..end].to_string())
        } else {
            return None;
        };
        out.push(IfCondition { not, item });
        rest = rest.trim_start();
    }
    if out.is_empty() {
        None
    } else {
        Some(out)
    }
}

fn parse_if(s: &str) -> Option<Vec<IfList>> {
    let mut lists = Vec::new();
    let mut tag = None;
    let mut rest = s.trim_start();
    while !rest.is_empty() {
        if let Some(r) = rest.strip_prefix('<') {
            let end = r.find('>')?;
            tag = Some(r[..end].to_string());
            rest = r[end + 1..].trim_start();
        } else if let Some(r) = rest.strip_prefix('(') {
            let end = r.find(')')?;
            lists.push(IfList {
                resource_tag: tag.clone(),
                conditions: parse_conditions(&r[..end])?,
            });
            rest = r[end + 1..].trim_start();
        } else {
            return None;
        }
    }
    if lists.is_empty() {
        None
    } else {
        Some(lists)
    }
}

impl fmt::Display for If {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let mut tag = None;
        for (i, list) in self.0.iter().enumerate() {
            if i > 0 {
                f.write_str(" ")?;
            }
            if list.resource_tag.is_some() && list.resource_tag != tag {
                write!(f, "<{}> ", list.resource_tag.as_deref().unwrap_or(""))?;
                tag = list.resource_tag.clone();
            }
            f.write_str("(")?;
            for (j, cond) in list.conditions.iter().enumerate() {
                if j > 0 {
                    f.write_str(" ")?;
                }
                if cond.not {
                    f.write_str("Not ")?;
                }
                match &cond.item {
                    IfItem::StateToken(t) => write!(f, "<{t}>")?,
                    IfItem::ETag(t) => write!(f, "[{t}]")?,
                }
            }
            f.write_str(")")?;
        }
        Ok(())
    }
}

impl Header for If {
    fn name() -> &'static HeaderName {
        &IF
    }

    fn decode<'i, I>(values: &mut I) -> Result<Self, headers::Error>
    where
        I: Iterator<Item = &'i HeaderValue>,
    {
        let mut lists = Vec::new();
        for value in values {
            let value = value.to_str().map_err(|_| invalid())?;
            lists.extend(parse_if(value).ok_or_else(invalid)?);
        }
        if lists.is_empty() {
            return Err(invalid());
        }
        Ok(If(lists))
    }

    fn encode<E: Extend<HeaderValue>>(&self, values: &mut E) {
        encode_str(values, &self.to_string());
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use headers::HeaderMapExt;
    use http::HeaderMap;

    fn map(name: &str, value: &str) -> HeaderMap {
        let mut h = HeaderMap::new();
        h.insert(
            HeaderName::from_bytes(name.as_bytes()).unwrap(),
            HeaderValue::from_str(value).unwrap(),
        );
        h
    }

    #[test]
    fn depth() {
        assert_eq!(map("Depth", "0").typed_get::<Depth>(), Some(Depth::Zero));
        assert_eq!(map("Depth", "1").typed_get::<Depth>(), Some(Depth::One));
        assert_eq!(
            map("Depth", "Infinity").typed_get::<Depth>(),
            Some(Depth::Infinity)
        );
        assert_eq!(map("Depth", "2").typed_get::<Depth>(), None);
    }

    #[test]
    fn overwrite() {
        assert_eq!(
            map("Overwrite", "F").typed_get::<Overwrite>(),
            Some(Overwrite(false))
        );
        assert_eq!(map("Overwrite", "maybe").typed_get::<Overwrite>(), None);
    }

    #[test]
    fn malformed_is_not_absent() {
        let empty = HeaderMap::new();
        assert_eq!(typed_strict::<Depth>(&empty), Ok(None));
        assert_eq!(
            typed_strict::<Depth>(&map("Depth", "1")),
            Ok(Some(Depth::One))
        );
        assert_eq!(
            typed_strict::<Depth>(&map("Depth", "2")),
            Err(StatusCode::BAD_REQUEST)
        );
        assert_eq!(
            typed_strict::<Overwrite>(&map("Overwrite", "maybe")),
            Err(StatusCode::BAD_REQUEST)
        );
    }

    #[test]
    fn destination_path() {
        let d = map("Destination", "http://localhost:8080/webdav/a%20b/c.txt")
            .typed_get::<Destination>()
            .unwrap();
        assert_eq!(d.path().unwrap(), "/webdav/a%20b/c.txt");
        let d = Destination("/webdav/x".to_string());
        assert_eq!(d.path().unwrap(), "/webdav/x");
    }

    #[test]
    fn lock_token() {
        let t = map("Lock-Token", "<opaquelocktoken:abc>")
            .typed_get::<LockToken>()
            .unwrap();
        assert_eq!(t.0, "opaquelocktoken:abc");
        assert_eq!(map("Lock-Token", "abc").typed_get::<LockToken>(), None);
    }

    #[test]
    fn timeout() {
        let t = map("Timeout", "Second-3600, Infinite")
            .typed_get::<Timeout>()
            .unwrap();
        assert_eq!(t.0, vec![DavTimeout::Seconds(3600), DavTimeout::Infinite]);
        let t = map("Timeout", "Second-99999999999")
            .typed_get::<Timeout>()
            .unwrap();
        assert_eq!(t.0, vec![DavTimeout::Seconds(u32::MAX)]);
    }

    #[test]
    fn if_header() {
        let h = map(
            "If",
            "<http://x/webdav/a> (<opaquelocktoken:1> [\"etag\"]) (Not <opaquelocktoken:2>)",
        );
        let i = h.typed_get::<If>().unwrap();
        assert_eq!(i.0.len(), 2);
        assert_eq!(i.0[0].resource_tag.as_deref(), Some("http://x/webdav/a"));
        assert_eq!(i.0[1].resource_tag.as_deref(), Some("http://x/webdav/a"));
        assert_eq!(i.tokens(), vec!["opaquelocktoken:1".to_string()]);

        let i = map("If", "(<urn:uuid:abc>)").typed_get::<If>().unwrap();
        assert_eq!(i.tokens(), vec!["urn:uuid:abc".to_string()]);
        assert_eq!(i.to_string(), "(<urn:uuid:abc>)");

        assert_eq!(map("If", "garbage").typed_get::<If>(), None);
    }
}

//! Utility module to handle the path part of an URL as a resource path.
//!
//! A [`DavPath`] is a normalized, percent-decoded list of path segments
//! relative to the root of the shared tree. Normalization resolves `.`
//! and `..` segments and refuses any path that would climb above the
//! root, so a `DavPath` can always be joined onto the root directory.

use std::fmt;
use std::hash::{Hash, Hasher};
use std::path::PathBuf;

use percent_encoding::{percent_decode_str, utf8_percent_encode, AsciiSet, NON_ALPHANUMERIC};
use serde::{Deserialize, Deserializer, Serialize, Serializer};

// Characters that are left alone when encoding a path segment.
const PATH_SEGMENT: &AsciiSet = &NON_ALPHANUMERIC
    .remove(b'-')
    .remove(b'_')
    .remove(b'.')
    .remove(b'~')
    .remove(b'!')
    .remove(b'$')
    .remove(b'&')
    .remove(b'\'')
    .remove(b'(')
    .remove(b')')
    .remove(b'*')
    .remove(b'+')
    .remove(b',')
    .remove(b';')
    .remove(b'=')
    .remove(b':')
    .remove(b'@');

/// Path of a resource, relative to the root of the tree.
#[derive(Clone)]
pub struct DavPath {
    segments: Vec<String>,
    collection: bool,
    prefix: String,
}

/// Error returned by the [`DavPath`] constructors.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ParseError {
    /// The path could not be decoded.
    InvalidPath,
    /// The path is not below the configured prefix.
    PrefixMismatch,
    /// The path climbs above the root.
    IllegalPath,
}

impl fmt::Display for ParseError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ParseError::InvalidPath => f.write_str("invalid path"),
            ParseError::PrefixMismatch => f.write_str("path outside of prefix"),
            ParseError::IllegalPath => f.write_str("path escapes the root"),
        }
    }
}

impl std::error::Error for ParseError {}

// Split, decode and normalize. `decode` is false for paths that come
// from our own stores, which are kept in decoded form.
fn normalize(src: &str, decode: bool) -> Result<(Vec<String>, bool), ParseError> {
    if !src.starts_with('/') {
        return Err(ParseError::InvalidPath);
    }
    let collection = src.ends_with('/');
    let mut segments: Vec<String> = Vec::new();
    for raw in src.split('/') {
        let seg = if decode {
            percent_decode_str(raw)
                .decode_utf8()
                .map_err(|_| ParseError::InvalidPath)?
                .into_owned()
        } else {
            raw.to_string()
        };
        if seg.contains('/') || seg.contains('\0') {
            return Err(ParseError::InvalidPath);
        }
        match seg.as_str() {
            "" | "." => {}
            ".." => {
                if segments.pop().is_none() {
                    return Err(ParseError::IllegalPath);
                }
            }
            _ => segments.push(seg),
        }
    }
    let collection = collection || segments.is_empty();
    Ok((segments, collection))
}

impl DavPath {
    /// Parse an (already percent-decoded) absolute path.
    pub fn new(src: &str) -> Result<DavPath, ParseError> {
        let (segments, collection) = normalize(src, false)?;
        Ok(DavPath {
            segments,
            collection,
            prefix: String::new(),
        })
    }

    /// The root of the tree.
    pub fn root() -> DavPath {
        DavPath {
            segments: Vec::new(),
            collection: true,
            prefix: String::new(),
        }
    }

    /// From an URL encoded path and a prefix to strip off.
    pub fn from_str_and_prefix(src: &str, prefix: &str) -> Result<DavPath, ParseError> {
        let prefix = prefix.trim_end_matches('/');
        let rest = src.strip_prefix(prefix).ok_or(ParseError::PrefixMismatch)?;
        let rest = match rest {
            "" => "/",
            r if r.starts_with('/') => r,
            _ => return Err(ParseError::PrefixMismatch),
        };
        let (segments, collection) = normalize(rest, true)?;
        Ok(DavPath {
            segments,
            collection,
            prefix: prefix.to_string(),
        })
    }

    /// From the path part of a request URI and a prefix to strip off.
    pub fn from_uri_and_prefix(uri: &http::uri::Uri, prefix: &str) -> Result<DavPath, ParseError> {
        match uri.path() {
            "*" => Ok(DavPath {
                segments: Vec::new(),
                collection: true,
                prefix: prefix.trim_end_matches('/').to_string(),
            }),
            path => DavPath::from_str_and_prefix(path, prefix),
        }
    }

    /// The prefix that was stripped off.
    pub fn prefix(&self) -> &str {
        &self.prefix
    }

    /// Is this the root of the tree.
    pub fn is_root(&self) -> bool {
        self.segments.is_empty()
    }

    /// Did the path end in a slash (or is it the root).
    pub fn is_collection(&self) -> bool {
        self.collection
    }

    /// Mark the path as a collection.
    pub fn add_slash(&mut self) {
        self.collection = true;
    }

    /// Append a decoded path segment.
    pub fn push_segment(&mut self, segment: &str) {
        self.segments.push(segment.to_string());
        self.collection = false;
    }

    /// The parent collection. The parent of the root is the root.
    pub fn parent(&self) -> DavPath {
        let mut segments = self.segments.clone();
        segments.pop();
        DavPath {
            segments,
            collection: true,
            prefix: self.prefix.clone(),
        }
    }

    /// Last segment of the path, if any.
    pub fn file_name(&self) -> Option<&str> {
        self.segments.last().map(|s| s.as_str())
    }

    /// Decoded path without prefix or trailing slash ("/" for the root).
    ///
    /// This is the key used by the lock and property stores.
    pub fn as_key(&self) -> String {
        if self.segments.is_empty() {
            return "/".to_string();
        }
        let mut s = String::new();
        for seg in &self.segments {
            s.push('/');
            s.push_str(seg);
        }
        s
    }

    /// URL encoded path without the prefix.
    pub fn as_url_string(&self) -> String {
        let mut s = String::new();
        for seg in &self.segments {
            s.push('/');
            s.extend(utf8_percent_encode(seg, PATH_SEGMENT));
        }
        if self.collection || s.is_empty() {
            s.push('/');
        }
        s
    }

    /// URL encoded path including the prefix.
    pub fn as_url_string_with_prefix(&self) -> String {
        format!("{}{}", self.prefix, self.as_url_string())
    }

    /// The path as a relative filesystem path.
    pub fn as_rel_ospath(&self) -> PathBuf {
        self.segments.iter().collect()
    }

    /// Is `self` equal to `other` or somewhere below it.
    pub fn starts_with(&self, other: &DavPath) -> bool {
        self.segments.len() >= other.segments.len()
            && self.segments[..other.segments.len()] == other.segments[..]
    }

    /// Is `self` a strict ancestor of `other`.
    pub fn is_ancestor_of(&self, other: &DavPath) -> bool {
        other.segments.len() > self.segments.len() && other.starts_with(self)
    }

    /// Replace the leading `from` part of this path by `to`.
    pub fn rebase(&self, from: &DavPath, to: &DavPath) -> Option<DavPath> {
        if !self.starts_with(from) {
            return None;
        }
        let mut segments = to.segments.clone();
        segments.extend_from_slice(&self.segments[from.segments.len()..]);
        Some(DavPath {
            segments,
            collection: self.collection,
            prefix: to.prefix.clone(),
        })
    }

    /// Guess the mime type from the file extension.
    pub fn get_mime_type_str(&self) -> &'static str {
        let name = self.file_name().unwrap_or("");
        let d = name.rfind('.').map(|d| &name[d + 1..]).unwrap_or("");
        mime_guess::from_ext(d)
            .first_raw()
            .unwrap_or("application/octet-stream")
    }
}

// Two paths name the same resource regardless of prefix or trailing slash.
impl PartialEq for DavPath {
    fn eq(&self, other: &DavPath) -> bool {
        self.segments == other.segments
    }
}

impl Eq for DavPath {}

impl Hash for DavPath {
    fn hash<H: Hasher>(&self, state: &mut H) {
        self.segments.hash(state);
    }
}

impl fmt::Display for DavPath {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.as_url_string_with_prefix())
    }
}

impl fmt::Debug for DavPath {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "\"{}\"", self.as_url_string_with_prefix())
    }
}

impl Serialize for DavPath {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        // a collection keeps its trailing slash, so it comes back as one.
        let mut key = self.as_key();
        if self.collection && !self.segments.is_empty() {
            key.push('/');
        }
        serializer.serialize_str(&key)
    }
}

impl<'de> Deserialize<'de> for DavPath {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let s = String::deserialize(deserializer)?;
        DavPath::new(&s).map_err(serde::de::Error::custom)
    }
}

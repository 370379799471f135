//! Accommodations for clients that do not quite follow the protocol.
//!
//! A [`Compat`] table is consulted twice per request: once before the
//! request reaches a method handler, and once on the way out. Which
//! adjustments apply is decided by matching the request against a list
//! of [`CompatRule`]s, so the client quirks live in data and not in the
//! handlers.
use std::fmt;
use std::sync::Arc;

use bitflags::bitflags;
use http::header::{self, HeaderMap, HeaderValue};
use http::{Request, Response, StatusCode};
use regex::Regex;

use crate::body::Body;
use crate::util::DavMethodSet;

bitflags! {
    /// Request or response adjustments a [`CompatRule`] can switch on.
    #[derive(Debug, Clone, Copy, PartialEq, Eq)]
    pub struct Adjustments: u32 {
        /// Drop `If-Modified-Since` and `If-None-Match` from the request,
        /// so the client always gets a full response.
        const STRIP_CONDITIONALS = 0x01;
        /// Add `Vary: *` to `404` responses, so the client does not cache
        /// the miss.
        const NO_CACHE_NOT_FOUND = 0x02;
    }
}

/// Decides whether a rule applies to a request.
#[derive(Clone)]
pub enum ClientMatcher {
    /// Match the `User-Agent` header.
    UserAgent(Regex),
    /// Any test on the request headers.
    Predicate(Arc<dyn Fn(&HeaderMap) -> bool + Send + Sync>),
}

impl ClientMatcher {
    /// Match the `User-Agent` header against a regular expression.
    pub fn user_agent(re: &str) -> Result<ClientMatcher, regex::Error> {
        Ok(ClientMatcher::UserAgent(Regex::new(re)?))
    }

    pub fn matches(&self, headers: &HeaderMap) -> bool {
        match self {
            ClientMatcher::UserAgent(re) => headers
                .get(header::USER_AGENT)
                .and_then(|v| v.to_str().ok())
                .map_or(false, |ua| re.is_match(ua)),
            ClientMatcher::Predicate(f) => f(headers),
        }
    }
}

impl fmt::Debug for ClientMatcher {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ClientMatcher::UserAgent(re) => write!(f, "UserAgent({})", re.as_str()),
            ClientMatcher::Predicate(_) => f.write_str("Predicate(..)"),
        }
    }
}

/// One row of the compatibility table.
#[derive(Debug, Clone)]
pub struct CompatRule {
    pub matcher: ClientMatcher,
    pub adjust: Adjustments,
}

impl CompatRule {
    pub fn new(matcher: ClientMatcher, adjust: Adjustments) -> CompatRule {
        CompatRule { matcher, adjust }
    }
}

lazy_static! {
    static ref OFFICE_UA: Regex = Regex::new("(?i)ms-office|msoffice|excel").unwrap();
    static ref MINIREDIR_UA: Regex = Regex::new("Microsoft").unwrap();
}

/// The compatibility table.
#[derive(Debug, Clone)]
pub struct Compat {
    rules: Vec<CompatRule>,
}

impl Default for Compat {
    /// Office applications get no conditional GETs, and the Windows
    /// mini-redirector gets uncacheable 404s.
    fn default() -> Compat {
        Compat {
            rules: vec![
                CompatRule::new(
                    ClientMatcher::UserAgent(OFFICE_UA.clone()),
                    Adjustments::STRIP_CONDITIONALS,
                ),
                CompatRule::new(
                    ClientMatcher::UserAgent(MINIREDIR_UA.clone()),
                    Adjustments::NO_CACHE_NOT_FOUND,
                ),
            ],
        }
    }
}

impl Compat {
    /// A table without any rules.
    pub fn empty() -> Compat {
        Compat { rules: Vec::new() }
    }

    /// Append a rule.
    pub fn rule(mut self, rule: CompatRule) -> Compat {
        self.rules.push(rule);
        self
    }

    /// The union of the adjustments of all matching rules.
    pub fn adjustments(&self, headers: &HeaderMap) -> Adjustments {
        self.rules
            .iter()
            .filter(|r| r.matcher.matches(headers))
            .fold(Adjustments::empty(), |acc, r| acc | r.adjust)
    }

    /// Adjust an incoming request. Returns the adjustments in effect, to
    /// be passed to [`Compat::finish_response`].
    pub(crate) fn prepare_request<B>(&self, req: &mut Request<B>) -> Adjustments {
        let adjust = self.adjustments(req.headers());
        if adjust.contains(Adjustments::STRIP_CONDITIONALS) {
            let h = req.headers_mut();
            if h.remove(header::IF_MODIFIED_SINCE).is_some()
                | h.remove(header::IF_NONE_MATCH).is_some()
            {
                debug!("compat: dropped conditional headers");
            }
        }
        adjust
    }

    /// Add the capability and cache headers every response carries.
    pub(crate) fn finish_response(
        &self,
        resp: &mut Response<Body>,
        allow: DavMethodSet,
        adjust: Adjustments,
    ) {
        let methods = allow.header_value();
        let h = resp.headers_mut();
        h.insert("DAV", HeaderValue::from_static("1,2"));
        h.insert("MS-Author-Via", HeaderValue::from_static("DAV"));
        h.insert("X-MSDAVEXT", HeaderValue::from_static("1"));
        h.insert(header::ACCEPT_RANGES, HeaderValue::from_static("bytes"));
        h.insert(
            header::CACHE_CONTROL,
            HeaderValue::from_static("no-cache, no-store, must-revalidate"),
        );
        h.insert(header::PRAGMA, HeaderValue::from_static("no-cache"));
        h.insert(header::EXPIRES, HeaderValue::from_static("0"));
        if let Ok(v) = HeaderValue::from_str(&methods) {
            h.insert(header::ALLOW, v.clone());
            h.insert("Public", v);
        }
        if adjust.contains(Adjustments::NO_CACHE_NOT_FOUND) && resp.status() == StatusCode::NOT_FOUND
        {
            resp.headers_mut()
                .insert(header::VARY, HeaderValue::from_static("*"));
        }
    }
}

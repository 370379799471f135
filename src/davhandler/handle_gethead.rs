use std::cmp;
use std::fmt::Write as _;
use std::io;
use std::io::SeekFrom;
use std::ops::Bound;

use headers::HeaderMapExt;
use http::{header, HeaderValue, Method, Request, Response, StatusCode};

use crate::body::Body;
use crate::conditional::http_if_match;
use crate::davpath::DavPath;
use crate::fs::Resource;
use crate::util::systemtime_to_httpdate;
use crate::DavResult;

pub(crate) const READ_BUF_SIZE: usize = 16384;

// Resolve a single byte range against a file of `len` bytes. `None` if
// the range cannot be satisfied.
fn byte_range(range: (Bound<u64>, Bound<u64>), len: u64) -> Option<(u64, u64)> {
    if len == 0 {
        return None;
    }
    let (start, end) = match range {
        (Bound::Included(s), Bound::Included(e)) => (s, cmp::min(e, len - 1)),
        (Bound::Included(s), Bound::Unbounded) => (s, len - 1),
        (Bound::Unbounded, Bound::Included(n)) if n > 0 => (len.saturating_sub(n), len - 1),
        _ => return None,
    };
    if start > end || start >= len {
        return None;
    }
    Some((start, end))
}

fn file_headers(res: &mut Response<Body>, meta: &Resource) {
    let h = res.headers_mut();
    if let Ok(ct) = HeaderValue::from_str(meta.content_type()) {
        h.insert(header::CONTENT_TYPE, ct);
    }
    h.typed_insert(headers::LastModified::from(meta.modified));
    if let Ok(etag) = format!("\"{}\"", meta.etag).parse::<headers::ETag>() {
        h.typed_insert(etag);
    }
}

impl crate::DavHandler {
    pub(crate) async fn handle_get(&self, req: &Request<()>) -> DavResult<Response<Body>> {
        let head = req.method() == Method::HEAD;
        let mut path = self.path(req)?;

        let meta = self.fs.metadata(&path).await?;
        let mut res = Response::new(Body::empty());
        if meta.is_collection() {
            if !self.autoindex {
                debug!("GET on collection {path} without autoindex");
                return Err(StatusCode::CONFLICT.into());
            }
            self.fixpath(&mut res, &mut path, &meta);
            return self.handle_autoindex(res, &path, head).await;
        }

        // Headers and body both come from the open handle. A PUT that
        // commits meanwhile replaces the file, not what we stream.
        let mut file = self.fs.open(&path).await?;
        let meta = file.metadata().await?;

        if let Some(status) = http_if_match(req, Some(&meta)) {
            if status != StatusCode::NOT_MODIFIED {
                return Err(status.into());
            }
            file_headers(&mut res, &meta);
            res.headers_mut().remove(header::CONTENT_TYPE);
            *res.status_mut() = status;
            return Ok(res);
        }

        file_headers(&mut res, &meta);
        let len = meta.len;
        let mut start = 0;
        let mut count = len;

        // Only a single range is supported, anything else gets the whole file.
        let range = req.headers().typed_get::<headers::Range>().and_then(|r| {
            let ranges: Vec<_> = r.iter().collect();
            if ranges.len() != 1 {
                return None;
            }
            if let Some(ifr) = req.headers().typed_get::<headers::IfRange>() {
                let etag = res.headers().typed_get::<headers::ETag>();
                let lm = res.headers().typed_get::<headers::LastModified>();
                if ifr.is_modified(etag.as_ref(), lm.as_ref()) {
                    return None;
                }
            }
            Some(ranges[0])
        });
        if let Some(range) = range {
            match byte_range(range, len) {
                Some((s, e)) => {
                    start = s;
                    count = e - s + 1;
                    if let Ok(cr) = headers::ContentRange::bytes(s..=e, len) {
                        res.headers_mut().typed_insert(cr);
                    }
                    *res.status_mut() = StatusCode::PARTIAL_CONTENT;
                }
                None => {
                    debug!("unsatisfiable range on {path} ({len} bytes)");
                    let mut res = Response::new(Body::empty());
                    res.headers_mut()
                        .typed_insert(headers::ContentRange::unsatisfied_bytes(len));
                    res.headers_mut().typed_insert(headers::ContentLength(0));
                    *res.status_mut() = StatusCode::RANGE_NOT_SATISFIABLE;
                    return Ok(res);
                }
            }
        }
        res.headers_mut().typed_insert(headers::ContentLength(count));

        if head {
            return Ok(res);
        }

        if start > 0 {
            file.seek(SeekFrom::Start(start)).await?;
        }
        let read_buf_size = self.read_buf_size;
        *res.body_mut() = Body::stream(async_stream::stream! {
            let mut left = count;
            while left > 0 {
                let n = cmp::min(left, read_buf_size as u64) as usize;
                match file.read_bytes(n).await {
                    Ok(buf) if buf.is_empty() => break,
                    Ok(buf) => {
                        left -= cmp::min(left, buf.len() as u64);
                        yield Ok(buf);
                    }
                    Err(e) => {
                        error!("read error: {e}");
                        yield Err(io::Error::new(io::ErrorKind::Other, e));
                        break;
                    }
                }
            }
        });
        Ok(res)
    }

    async fn handle_autoindex(
        &self,
        mut res: Response<Body>,
        path: &DavPath,
        head: bool,
    ) -> DavResult<Response<Body>> {
        let entries = self.fs.read_dir(path).await?;

        let title = htmlescape::encode_minimal(&path.as_url_string_with_prefix());
        let mut w = String::new();
        let _ = write!(
            w,
            "<!DOCTYPE html>\n<html><head><title>Index of {title}</title></head>\n\
             <body><h1>Index of {title}</h1>\n<table>\n\
             <tr><th>Name</th><th>Last modified</th><th>Size</th></tr>\n"
        );
        if !path.is_root() {
            let up = path.parent().as_url_string_with_prefix();
            let _ = writeln!(
                w,
                "<tr><td><a href=\"{}\">Parent Directory</a></td><td></td><td></td></tr>",
                htmlescape::encode_attribute(&up)
            );
        }
        for e in &entries {
            let mut name = e.path.file_name().unwrap_or("").to_string();
            let size = if e.is_collection() {
                name.push('/');
                "-".to_string()
            } else {
                e.len.to_string()
            };
            let _ = writeln!(
                w,
                "<tr><td><a href=\"{}\">{}</a></td><td>{}</td><td>{}</td></tr>",
                htmlescape::encode_attribute(&e.path.as_url_string_with_prefix()),
                htmlescape::encode_minimal(&name),
                systemtime_to_httpdate(e.modified),
                size
            );
        }
        w.push_str("</table></body></html>\n");

        let h = res.headers_mut();
        h.insert(
            header::CONTENT_TYPE,
            HeaderValue::from_static("text/html; charset=utf-8"),
        );
        h.typed_insert(headers::ContentLength(w.len() as u64));
        if !head {
            *res.body_mut() = Body::from(w);
        }
        Ok(res)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn ranges() {
        use Bound::*;
        assert_eq!(byte_range((Included(0), Included(9)), 100), Some((0, 9)));
        assert_eq!(byte_range((Included(90), Included(200)), 100), Some((90, 99)));
        assert_eq!(byte_range((Included(50), Unbounded), 100), Some((50, 99)));
        assert_eq!(byte_range((Unbounded, Included(10)), 100), Some((90, 99)));
        assert_eq!(byte_range((Unbounded, Included(500)), 100), Some((0, 99)));
        assert_eq!(byte_range((Included(100), Unbounded), 100), None);
        assert_eq!(byte_range((Included(0), Included(0)), 0), None);
    }
}

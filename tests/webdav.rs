use http::{HeaderMap, Request, StatusCode};
use tempfile::TempDir;

use webdav_share::{Adjustments, ClientMatcher, Compat, CompatRule, DavHandler, FileSystem, LockSystem};

const OFFICE_UA: &str = "Microsoft Office Excel 2014";
const MINIREDIR_UA: &str = "Microsoft-WebDAV-MiniRedir/10.0.19043";

const LOCKINFO: &str = r#"<?xml version="1.0" encoding="utf-8"?>
<D:lockinfo xmlns:D="DAV:">
  <D:lockscope><D:exclusive/></D:lockscope>
  <D:locktype><D:write/></D:locktype>
  <D:owner><D:href>mailto:someone@example.com</D:href></D:owner>
</D:lockinfo>"#;

const SET_COLOR: &str = r#"<?xml version="1.0" encoding="utf-8"?>
<D:propertyupdate xmlns:D="DAV:" xmlns:x="urn:example:props">
  <D:set><D:prop><x:color>blue</x:color></D:prop></D:set>
</D:propertyupdate>"#;

const GET_COLOR: &str = r#"<?xml version="1.0" encoding="utf-8"?>
<D:propfind xmlns:D="DAV:" xmlns:x="urn:example:props">
  <D:prop><x:color/></D:prop>
</D:propfind>"#;

struct Reply {
    status: StatusCode,
    headers: HeaderMap,
    body: String,
}

impl Reply {
    fn header(&self, name: &str) -> Option<&str> {
        self.headers.get(name).and_then(|v| v.to_str().ok())
    }

    fn responses(&self) -> usize {
        self.body.matches("<D:response>").count()
    }
}

async fn send(
    dav: &DavHandler,
    method: &str,
    uri: &str,
    headers: &[(&str, &str)],
    body: &str,
) -> Reply {
    let _ = env_logger::builder().is_test(true).try_init();
    let mut req = Request::builder().method(method).uri(uri);
    for (k, v) in headers {
        req = req.header(*k, *v);
    }
    let req = req.body(hyper::Body::from(body.to_string())).unwrap();
    let resp = dav.handle(req).await;
    let (parts, body) = resp.into_parts();
    let body = hyper::body::to_bytes(body).await.unwrap();
    Reply {
        status: parts.status,
        headers: parts.headers,
        body: String::from_utf8_lossy(&body).into_owned(),
    }
}

fn share() -> (TempDir, DavHandler) {
    let dir = TempDir::new().unwrap();
    let dav = DavHandler::builder(FileSystem::local(dir.path(), false)).build();
    (dir, dav)
}

#[tokio::test]
async fn put_then_get() {
    let (_dir, dav) = share();

    let r = send(&dav, "PUT", "/report.txt", &[], "quarterly numbers").await;
    assert_eq!(r.status, StatusCode::CREATED);
    assert!(r.header("etag").is_some());

    let r = send(&dav, "PUT", "/report.txt", &[], "revised numbers").await;
    assert_eq!(r.status, StatusCode::NO_CONTENT);

    let r = send(&dav, "GET", "/report.txt", &[], "").await;
    assert_eq!(r.status, StatusCode::OK);
    assert_eq!(r.body, "revised numbers");
    assert_eq!(r.header("content-length"), Some("15"));

    let r = send(&dav, "GET", "/report.txt", &[("Range", "bytes=8-")], "").await;
    assert_eq!(r.status, StatusCode::PARTIAL_CONTENT);
    assert_eq!(r.body, "numbers");

    let r = send(&dav, "HEAD", "/report.txt", &[], "").await;
    assert_eq!(r.status, StatusCode::OK);
    assert!(r.body.is_empty());
}

#[tokio::test]
async fn mkcol_and_propfind_depth() {
    let (_dir, dav) = share();

    let r = send(&dav, "MKCOL", "/docs", &[], "").await;
    assert_eq!(r.status, StatusCode::CREATED);
    let r = send(&dav, "MKCOL", "/docs", &[], "").await;
    assert_eq!(r.status, StatusCode::METHOD_NOT_ALLOWED);
    let r = send(&dav, "MKCOL", "/missing/docs", &[], "").await;
    assert_eq!(r.status, StatusCode::CONFLICT);

    send(&dav, "PUT", "/docs/a.txt", &[], "a").await;
    send(&dav, "PUT", "/docs/b.txt", &[], "b").await;

    let r = send(&dav, "PROPFIND", "/docs/", &[("Depth", "1")], "").await;
    assert_eq!(r.status, StatusCode::MULTI_STATUS);
    assert_eq!(r.responses(), 3);
    assert!(r.body.contains("<D:collection"));

    let r = send(&dav, "PROPFIND", "/docs/", &[("Depth", "0")], "").await;
    assert_eq!(r.status, StatusCode::MULTI_STATUS);
    assert_eq!(r.responses(), 1);

    // no Depth header walks the whole tree.
    let r = send(&dav, "PROPFIND", "/", &[], "").await;
    assert_eq!(r.responses(), 4);

    let r = send(&dav, "PROPFIND", "/nothing", &[("Depth", "0")], "").await;
    assert_eq!(r.status, StatusCode::NOT_FOUND);
}

#[tokio::test]
async fn hrefs_carry_the_prefix() {
    let dir = TempDir::new().unwrap();
    let dav = DavHandler::builder(FileSystem::local(dir.path(), false))
        .strip_prefix("/webdav")
        .build();

    send(&dav, "MKCOL", "/webdav/My%20Files", &[], "").await;
    let r = send(&dav, "PROPFIND", "/webdav/", &[("Depth", "1")], "").await;
    assert_eq!(r.status, StatusCode::MULTI_STATUS);
    assert!(r.body.contains("/webdav/My%20Files/"));

    let r = send(&dav, "GET", "/elsewhere/file", &[], "").await;
    assert_eq!(r.status, StatusCode::NOT_FOUND);
}

#[tokio::test]
async fn lock_conflict_and_unlock() {
    let (_dir, dav) = share();

    // locking an unmapped url creates an empty file.
    let r = send(&dav, "LOCK", "/book.xlsx", &[("Timeout", "Second-600")], LOCKINFO).await;
    assert_eq!(r.status, StatusCode::CREATED);
    let token = r.header("lock-token").unwrap().to_string();
    assert!(token.starts_with("<opaquelocktoken:"));
    assert!(r.body.contains("mailto:someone@example.com"));
    assert!(r.body.contains("Second-"));

    let r = send(&dav, "LOCK", "/book.xlsx", &[], LOCKINFO).await;
    assert_eq!(r.status, StatusCode::LOCKED);

    let r = send(&dav, "PUT", "/book.xlsx", &[], "data").await;
    assert_eq!(r.status, StatusCode::LOCKED);
    let r = send(&dav, "DELETE", "/book.xlsx", &[], "").await;
    assert_eq!(r.status, StatusCode::LOCKED);

    let ifh = format!("({})", token);
    let r = send(&dav, "PUT", "/book.xlsx", &[("If", ifh.as_str())], "data").await;
    assert_eq!(r.status, StatusCode::NO_CONTENT);

    // refresh with an empty body.
    let r = send(&dav, "LOCK", "/book.xlsx", &[("If", ifh.as_str())], "").await;
    assert_eq!(r.status, StatusCode::OK);

    let r = send(&dav, "UNLOCK", "/book.xlsx", &[("Lock-Token", "<opaquelocktoken:nope>")], "").await;
    assert_eq!(r.status, StatusCode::CONFLICT);
    let r = send(&dav, "UNLOCK", "/book.xlsx", &[("Lock-Token", token.as_str())], "").await;
    assert_eq!(r.status, StatusCode::NO_CONTENT);

    let r = send(&dav, "LOCK", "/book.xlsx", &[], LOCKINFO).await;
    assert_eq!(r.status, StatusCode::OK);
}

#[tokio::test]
async fn collection_lock_covers_members() {
    let (_dir, dav) = share();

    send(&dav, "MKCOL", "/shared", &[], "").await;
    let r = send(&dav, "LOCK", "/shared/", &[("Depth", "infinity")], LOCKINFO).await;
    assert_eq!(r.status, StatusCode::OK);

    let r = send(&dav, "PUT", "/shared/new.docx", &[], "x").await;
    assert_eq!(r.status, StatusCode::LOCKED);

    let r = send(&dav, "LOCK", "/shared/", &[("Depth", "1")], LOCKINFO).await;
    assert_eq!(r.status, StatusCode::BAD_REQUEST);

    let r = send(&dav, "PROPFIND", "/shared/", &[("Depth", "0")], "").await;
    assert!(r.body.contains("activelock"));
}

#[tokio::test]
async fn locks_survive_restart() {
    let dir = TempDir::new().unwrap();
    let state = TempDir::new().unwrap();
    let locks = state.path().join("locks.json");
    let build = || {
        DavHandler::builder(FileSystem::local(dir.path(), false))
            .locksystem(LockSystem::File(locks.clone()))
            .build()
    };

    let dav = build();
    send(&dav, "PUT", "/plan.docx", &[], "v1").await;
    let r = send(&dav, "LOCK", "/plan.docx", &[], LOCKINFO).await;
    assert_eq!(r.status, StatusCode::OK);
    let token = r.header("lock-token").unwrap().to_string();
    drop(dav);

    let dav = build();
    let r = send(&dav, "PUT", "/plan.docx", &[], "v2").await;
    assert_eq!(r.status, StatusCode::LOCKED);

    let r = send(&dav, "UNLOCK", "/plan.docx", &[("Lock-Token", token.as_str())], "").await;
    assert_eq!(r.status, StatusCode::NO_CONTENT);
    drop(dav);

    let dav = build();
    let r = send(&dav, "PUT", "/plan.docx", &[], "v2").await;
    assert_eq!(r.status, StatusCode::NO_CONTENT);
}

#[tokio::test]
async fn lock_refresh() {
    let (_dir, dav) = share();

    send(&dav, "PUT", "/sheet.ods", &[], "cells").await;
    let r = send(&dav, "LOCK", "/sheet.ods", &[("Timeout", "Second-600")], LOCKINFO).await;
    assert_eq!(r.status, StatusCode::OK);
    let token = r.header("lock-token").unwrap().to_string();
    let bare = token.trim_start_matches('<').trim_end_matches('>');

    let ifh = format!("({token})");
    let hdrs = [("If", ifh.as_str()), ("Timeout", "Infinite")];
    let r = send(&dav, "LOCK", "/sheet.ods", &hdrs, "").await;
    assert_eq!(r.status, StatusCode::OK);
    assert!(r.header("lock-token").is_none());
    assert!(r.body.contains(bare), "{}", r.body);
    assert!(r.body.contains("<D:timeout>Infinite</D:timeout>"), "{}", r.body);

    // a token nobody handed out.
    let hdrs = [("If", "(<opaquelocktoken:0a1b2c3d-unknown>)")];
    let r = send(&dav, "LOCK", "/sheet.ods", &hdrs, "").await;
    assert_eq!(r.status, StatusCode::PRECONDITION_FAILED);

    // the lock is still the one we refreshed.
    let r = send(&dav, "PUT", "/sheet.ods", &[], "other").await;
    assert_eq!(r.status, StatusCode::LOCKED);
}

#[tokio::test]
async fn overwrite_drops_destination_locks() {
    let (_dir, dav) = share();

    for (method, src) in [("MOVE", "/a.txt"), ("COPY", "/c.txt")] {
        send(&dav, "PUT", src, &[], "replacement").await;
        send(&dav, "PUT", "/b.txt", &[], "original").await;
        let r = send(&dav, "LOCK", "/b.txt", &[], LOCKINFO).await;
        assert_eq!(r.status, StatusCode::OK, "{method}");
        let token = r.header("lock-token").unwrap().to_string();

        let dest = ("Destination", "http://localhost/b.txt");
        let r = send(&dav, method, src, &[dest], "").await;
        assert_eq!(r.status, StatusCode::LOCKED, "{method}");

        let ifh = format!("<http://localhost/b.txt> ({token})");
        let r = send(&dav, method, src, &[dest, ("If", ifh.as_str())], "").await;
        assert_eq!(r.status, StatusCode::NO_CONTENT, "{method}");

        // the new resource at /b.txt is not locked.
        let r = send(&dav, "PROPFIND", "/b.txt", &[("Depth", "0")], "").await;
        assert!(!r.body.contains("activelock"), "{method}: {}", r.body);
        let r = send(&dav, "PUT", "/b.txt", &[], "after").await;
        assert_eq!(r.status, StatusCode::NO_CONTENT, "{method}");
    }
}

#[tokio::test]
async fn locks_and_props_survive_restart() {
    let dir = TempDir::new().unwrap();
    let state = TempDir::new().unwrap();
    let locks = state.path().join("locks.json");
    let props = state.path().join("props.json");
    let build = || {
        DavHandler::builder(FileSystem::local_with_props(dir.path(), false, props.clone()))
            .locksystem(LockSystem::File(locks.clone()))
            .strip_prefix("/webdav")
            .build()
    };

    let dav = build();
    send(&dav, "MKCOL", "/webdav/shared", &[], "").await;
    send(&dav, "PUT", "/webdav/shared/notes.txt", &[], "v1").await;
    let r = send(&dav, "PROPPATCH", "/webdav/shared/notes.txt", &[], SET_COLOR).await;
    assert!(r.body.contains("200 OK"));
    let r = send(&dav, "LOCK", "/webdav/shared/", &[], LOCKINFO).await;
    assert_eq!(r.status, StatusCode::OK);
    assert!(r.body.contains("<D:lockroot><D:href>/webdav/shared/</D:href></D:lockroot>"));
    let token = r.header("lock-token").unwrap().to_string();
    drop(dav);

    let dav = build();
    let r = send(&dav, "PUT", "/webdav/shared/notes.txt", &[], "v2").await;
    assert_eq!(r.status, StatusCode::LOCKED);

    let r = send(&dav, "PROPFIND", "/webdav/shared/notes.txt", &[("Depth", "0")], GET_COLOR).await;
    assert_eq!(r.status, StatusCode::MULTI_STATUS);
    assert!(r.body.contains("blue"), "{}", r.body);

    let r = send(&dav, "PROPFIND", "/webdav/shared/", &[("Depth", "0")], "").await;
    assert!(
        r.body.contains("<D:lockroot><D:href>/webdav/shared/</D:href></D:lockroot>"),
        "{}",
        r.body
    );

    let ifh = format!("<http://localhost/webdav/shared/> ({token})");
    let r = send(&dav, "PUT", "/webdav/shared/notes.txt", &[("If", ifh.as_str())], "v2").await;
    assert_eq!(r.status, StatusCode::NO_CONTENT);
    let r = send(&dav, "PROPFIND", "/webdav/shared/notes.txt", &[("Depth", "0")], GET_COLOR).await;
    assert!(r.body.contains("blue"), "{}", r.body);
}

#[tokio::test]
async fn malformed_depth_and_overwrite() {
    let (_dir, dav) = share();

    send(&dav, "MKCOL", "/dir", &[], "").await;
    send(&dav, "PUT", "/dir/a.txt", &[], "a").await;

    let r = send(&dav, "PROPFIND", "/dir/", &[("Depth", "2")], "").await;
    assert_eq!(r.status, StatusCode::BAD_REQUEST);
    let r = send(&dav, "DELETE", "/dir/", &[("Depth", "one")], "").await;
    assert_eq!(r.status, StatusCode::BAD_REQUEST);

    let hdrs = [("Destination", "/b.txt"), ("Overwrite", "maybe")];
    let r = send(&dav, "MOVE", "/dir/a.txt", &hdrs, "").await;
    assert_eq!(r.status, StatusCode::BAD_REQUEST);
    let r = send(&dav, "COPY", "/dir/a.txt", &hdrs, "").await;
    assert_eq!(r.status, StatusCode::BAD_REQUEST);

    // nothing was touched.
    let r = send(&dav, "GET", "/dir/a.txt", &[], "").await;
    assert_eq!(r.body, "a");
    let r = send(&dav, "GET", "/b.txt", &[], "").await;
    assert_eq!(r.status, StatusCode::NOT_FOUND);
}

#[tokio::test]
async fn move_and_overwrite() {
    let (_dir, dav) = share();

    send(&dav, "PUT", "/a.txt", &[], "from a").await;
    send(&dav, "PUT", "/b.txt", &[], "from b").await;

    let dest = [("Destination", "http://localhost/b.txt"), ("Overwrite", "F")];
    let r = send(&dav, "MOVE", "/a.txt", &dest, "").await;
    assert_eq!(r.status, StatusCode::CONFLICT);

    let dest = [("Destination", "http://localhost/b.txt"), ("Overwrite", "T")];
    let r = send(&dav, "MOVE", "/a.txt", &dest, "").await;
    assert_eq!(r.status, StatusCode::NO_CONTENT);

    let r = send(&dav, "GET", "/a.txt", &[], "").await;
    assert_eq!(r.status, StatusCode::NOT_FOUND);
    let r = send(&dav, "GET", "/b.txt", &[], "").await;
    assert_eq!(r.body, "from a");

    let r = send(&dav, "COPY", "/b.txt", &[("Destination", "/c.txt")], "").await;
    assert_eq!(r.status, StatusCode::CREATED);
    let r = send(&dav, "COPY", "/b.txt", &[("Destination", "/b.txt")], "").await;
    assert_eq!(r.status, StatusCode::FORBIDDEN);
}

#[tokio::test]
async fn copy_collection_depth() {
    let (_dir, dav) = share();

    send(&dav, "MKCOL", "/src", &[], "").await;
    send(&dav, "PUT", "/src/one.txt", &[], "1").await;

    let r = send(&dav, "COPY", "/src/", &[("Destination", "/deep/")], "").await;
    assert_eq!(r.status, StatusCode::CREATED);
    let r = send(&dav, "GET", "/deep/one.txt", &[], "").await;
    assert_eq!(r.body, "1");

    let hdrs = [("Destination", "/shallow/"), ("Depth", "0")];
    let r = send(&dav, "COPY", "/src/", &hdrs, "").await;
    assert_eq!(r.status, StatusCode::CREATED);
    let r = send(&dav, "GET", "/shallow/one.txt", &[], "").await;
    assert_eq!(r.status, StatusCode::NOT_FOUND);

    let r = send(&dav, "COPY", "/src/", &[("Destination", "/src/inner/")], "").await;
    assert_eq!(r.status, StatusCode::FORBIDDEN);

    let hdrs = [("Destination", "/moved/"), ("Depth", "0")];
    let r = send(&dav, "MOVE", "/src/", &hdrs, "").await;
    assert_eq!(r.status, StatusCode::BAD_REQUEST);
}

#[tokio::test]
async fn dead_props_follow_copy_move_and_restart() {
    let dir = TempDir::new().unwrap();
    let state = TempDir::new().unwrap();
    let props = state.path().join("props.json");
    let build = || {
        DavHandler::builder(FileSystem::local_with_props(dir.path(), false, props.clone()))
            .build()
    };

    let dav = build();
    send(&dav, "PUT", "/a.txt", &[], "a").await;
    let r = send(&dav, "PROPPATCH", "/a.txt", &[], SET_COLOR).await;
    assert_eq!(r.status, StatusCode::MULTI_STATUS);
    assert!(r.body.contains("200 OK"));

    send(&dav, "COPY", "/a.txt", &[("Destination", "/copy.txt")], "").await;
    send(&dav, "MOVE", "/a.txt", &[("Destination", "/moved.txt")], "").await;
    drop(dav);

    let dav = build();
    for path in ["/copy.txt", "/moved.txt"] {
        let r = send(&dav, "PROPFIND", path, &[("Depth", "0")], GET_COLOR).await;
        assert_eq!(r.status, StatusCode::MULTI_STATUS);
        assert!(r.body.contains("blue"), "{path}: {}", r.body);
    }

    send(&dav, "DELETE", "/moved.txt", &[], "").await;
    send(&dav, "PUT", "/moved.txt", &[], "new").await;
    let r = send(&dav, "PROPFIND", "/moved.txt", &[("Depth", "0")], GET_COLOR).await;
    assert!(!r.body.contains("blue"));
    assert!(r.body.contains("404 Not Found"));
}

#[tokio::test]
async fn office_gets_full_responses() {
    let (_dir, dav) = share();

    let r = send(&dav, "PUT", "/sheet.xlsx", &[], "cells").await;
    let etag = r.header("etag").unwrap().to_string();

    let r = send(&dav, "GET", "/sheet.xlsx", &[("If-None-Match", etag.as_str())], "").await;
    assert_eq!(r.status, StatusCode::NOT_MODIFIED);

    let hdrs = [("If-None-Match", etag.as_str()), ("User-Agent", OFFICE_UA)];
    let r = send(&dav, "GET", "/sheet.xlsx", &hdrs, "").await;
    assert_eq!(r.status, StatusCode::OK);
    assert_eq!(r.body, "cells");
}

#[tokio::test]
async fn capability_headers_on_every_response() {
    let (_dir, dav) = share();

    for (method, path) in [("OPTIONS", "/"), ("GET", "/missing.txt"), ("BREW", "/")] {
        let r = send(&dav, method, path, &[], "").await;
        assert_eq!(r.header("dav"), Some("1,2"), "{method}");
        assert_eq!(r.header("ms-author-via"), Some("DAV"), "{method}");
        assert!(r.header("allow").unwrap().contains("PROPFIND"), "{method}");
        assert!(r.header("public").is_some(), "{method}");
        assert!(r.header("cache-control").unwrap().contains("no-store"), "{method}");
    }

    let r = send(&dav, "GET", "/missing.txt", &[], "").await;
    assert_eq!(r.status, StatusCode::NOT_FOUND);
    assert!(r.header("vary").is_none());

    let r = send(&dav, "GET", "/missing.txt", &[("User-Agent", MINIREDIR_UA)], "").await;
    assert_eq!(r.status, StatusCode::NOT_FOUND);
    assert_eq!(r.header("vary"), Some("*"));
}

#[tokio::test]
async fn windows_props_are_accepted() {
    let (_dir, dav) = share();
    send(&dav, "PUT", "/photo.jpg", &[], "jpeg").await;

    let body = r#"<?xml version="1.0" encoding="utf-8"?>
<D:propertyupdate xmlns:D="DAV:" xmlns:Z="urn:schemas-microsoft-com:">
  <D:set><D:prop>
    <Z:Win32LastModifiedTime>Mon, 01 Jan 2024 10:00:00 GMT</Z:Win32LastModifiedTime>
    <Z:Win32FileAttributes>00000020</Z:Win32FileAttributes>
  </D:prop></D:set>
</D:propertyupdate>"#;
    let r = send(&dav, "PROPPATCH", "/photo.jpg", &[], body).await;
    assert_eq!(r.status, StatusCode::MULTI_STATUS);
    assert!(r.body.contains("200 OK"));
    assert!(!r.body.contains("403"));
}

#[tokio::test]
async fn delete_and_bad_bodies() {
    let (_dir, dav) = share();

    send(&dav, "MKCOL", "/tree", &[], "").await;
    send(&dav, "PUT", "/tree/leaf.txt", &[], "leaf").await;

    let r = send(&dav, "DELETE", "/tree/", &[("Depth", "0")], "").await;
    assert_eq!(r.status, StatusCode::BAD_REQUEST);
    let r = send(&dav, "DELETE", "/tree/", &[], "").await;
    assert_eq!(r.status, StatusCode::NO_CONTENT);
    let r = send(&dav, "DELETE", "/tree/", &[], "").await;
    assert_eq!(r.status, StatusCode::NOT_FOUND);

    let r = send(&dav, "PROPFIND", "/", &[("Depth", "0")], "<D:propfind").await;
    assert_eq!(r.status, StatusCode::UNSUPPORTED_MEDIA_TYPE);
    let r = send(&dav, "MKCOL", "/withbody", &[], "<x/>").await;
    assert_eq!(r.status, StatusCode::UNSUPPORTED_MEDIA_TYPE);
}

#[tokio::test]
async fn concurrent_puts() {
    let (_dir, dav) = share();

    let writes = (0..16).map(|i| {
        let dav = dav.clone();
        async move {
            let path = format!("/file-{}.txt", i % 4);
            let body = format!("writer {i}");
            send(&dav, "PUT", &path, &[], &body).await.status
        }
    });
    for status in futures_util::future::join_all(writes).await {
        assert!(status == StatusCode::CREATED || status == StatusCode::NO_CONTENT);
    }

    for n in 0..4 {
        let r = send(&dav, "GET", &format!("/file-{n}.txt"), &[], "").await;
        assert_eq!(r.status, StatusCode::OK);
        assert!(r.body.starts_with("writer "));
        let i: usize = r.body["writer ".len()..].parse().unwrap();
        assert_eq!(i % 4, n);
    }

    let r = send(&dav, "PROPFIND", "/", &[("Depth", "1")], "").await;
    assert_eq!(r.responses(), 5);
}

#[tokio::test]
async fn autoindex() {
    let dir = TempDir::new().unwrap();
    let plain = DavHandler::builder(FileSystem::local(dir.path(), false)).build();
    let indexed = DavHandler::builder(FileSystem::local(dir.path(), false))
        .autoindex(true)
        .build();

    send(&plain, "PUT", "/a%3Cb%3E.txt", &[], "x").await;

    let r = send(&plain, "GET", "/", &[], "").await;
    assert_eq!(r.status, StatusCode::CONFLICT);

    let r = send(&indexed, "GET", "/", &[], "").await;
    assert_eq!(r.status, StatusCode::OK);
    assert!(r.header("content-type").unwrap().starts_with("text/html"));
    assert!(r.body.contains("a&lt;b&gt;.txt"));
}

#[tokio::test]
async fn custom_compat_table() {
    let dir = TempDir::new().unwrap();
    let rule = CompatRule::new(
        ClientMatcher::user_agent("^WebDAVFS/").unwrap(),
        Adjustments::NO_CACHE_NOT_FOUND,
    );
    let dav = DavHandler::builder(FileSystem::local(dir.path(), false))
        .compat(Compat::empty())
        .compat_rule(rule)
        .build();

    let r = send(&dav, "GET", "/gone", &[("User-Agent", "WebDAVFS/3.0.0 (03008000) Darwin/22.1.0")], "").await;
    assert_eq!(r.header("vary"), Some("*"));

    // the default rules are gone.
    let r = send(&dav, "GET", "/gone", &[("User-Agent", MINIREDIR_UA)], "").await;
    assert!(r.header("vary").is_none());
    assert_eq!(r.header("dav"), Some("1,2"));
}

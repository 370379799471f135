use std::error::Error as StdError;
use std::io;

use bytes::Buf;
use headers::HeaderMapExt;
use http::{header, Request, Response, StatusCode};
use http_body::Body as HttpBody;

use crate::body::Body;
use crate::conditional::if_match_get_tokens;
use crate::errors::DavError;
use crate::DavResult;

impl crate::DavHandler {
    pub(crate) async fn handle_put<ReqBody, ReqData, ReqError>(
        &self,
        req: &Request<()>,
        body: ReqBody,
    ) -> DavResult<Response<Body>>
    where
        ReqBody: HttpBody<Data = ReqData, Error = ReqError>,
        ReqData: Buf + Send + 'static,
        ReqError: StdError + Send + Sync + 'static,
    {
        let path = self.path(req)?;
        if path.is_collection() {
            return Err(StatusCode::METHOD_NOT_ALLOWED.into());
        }
        // partial PUT is not supported.
        if req.headers().contains_key(header::CONTENT_RANGE) {
            return Err(StatusCode::NOT_IMPLEMENTED.into());
        }

        // one writer per path at a time.
        let _guard = self.guards.lock(&[&path]).await;

        let meta = self.fs.metadata(&path).await.ok();
        if meta.as_ref().map_or(false, |m| m.is_collection()) {
            debug!("PUT on collection {path}");
            return Err(StatusCode::METHOD_NOT_ALLOWED.into());
        }

        let tokens = if_match_get_tokens(
            req,
            meta.as_ref(),
            &path,
            &self.prefix,
            &*self.fs,
            &*self.ls,
        )
        .await?;
        self.check_lock(&path, false, &tokens)?;

        // data goes to a temporary file. If we bail out before the
        // commit, dropping the writer removes it again.
        let mut writer = self.fs.create(&path).await?;
        pin_utils::pin_mut!(body);
        let mut total = 0u64;
        while let Some(res) = body.data().await {
            let mut buf = res.map_err(|e| {
                debug!("PUT {path}: body: {e}");
                DavError::IoError(io::Error::new(
                    io::ErrorKind::UnexpectedEof,
                    "UnexpectedEof",
                ))
            })?;
            while buf.has_remaining() {
                let chunk = buf.copy_to_bytes(buf.remaining());
                total += chunk.len() as u64;
                writer.write_bytes(chunk).await?;
            }
        }
        let created = writer.commit().await?;
        debug!("PUT {path}: {total} bytes, created={created}");
        self.relax(&path).await;

        let mut res = Response::new(Body::empty());
        if let Ok(meta) = self.fs.metadata(&path).await {
            if let Ok(etag) = format!("\"{}\"", meta.etag).parse::<headers::ETag>() {
                res.headers_mut().typed_insert(etag);
            }
        }
        res.headers_mut().typed_insert(headers::ContentLength(0));
        *res.status_mut() = if created {
            StatusCode::CREATED
        } else {
            StatusCode::NO_CONTENT
        };
        Ok(res)
    }
}

use headers::HeaderMapExt;
use http::{Request, Response, StatusCode};

use crate::body::Body;
use crate::conditional::if_match_get_tokens;
use crate::davheaders::{self, Depth};
use crate::DavResult;

impl crate::DavHandler {
    pub(crate) async fn handle_delete(&self, req: &Request<()>) -> DavResult<Response<Body>> {
        let path = self.path(req)?;
        let _guard = self.guards.lock(&[&path]).await;

        let meta = self.fs.metadata(&path).await?;

        // RFC4918 9.6.1: DELETE on a collection acts as Depth: infinity.
        let depth = davheaders::typed_strict::<Depth>(req.headers())?;
        if meta.is_collection() && matches!(depth, Some(d) if d != Depth::Infinity) {
            debug!("DELETE {path}: depth {depth:?} on a collection");
            return Err(StatusCode::BAD_REQUEST.into());
        }

        let tokens = if_match_get_tokens(
            req,
            Some(&meta),
            &path,
            &self.prefix,
            &*self.fs,
            &*self.ls,
        )
        .await?;
        // a lock anywhere below a collection blocks its removal.
        self.check_lock(&path, true, &tokens)?;

        self.fs.remove(&path).await?;
        if let Err(e) = self.ls.delete(&path) {
            warn!("DELETE {path}: dropping locks: {e}");
        }

        let mut res = Response::new(Body::empty());
        res.headers_mut().typed_insert(headers::ContentLength(0));
        *res.status_mut() = StatusCode::NO_CONTENT;
        Ok(res)
    }
}

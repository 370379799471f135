use headers::HeaderMapExt;
use http::{Request, Response, StatusCode};

use crate::body::Body;
use crate::conditional::if_match_get_tokens;
use crate::davheaders;
use crate::DavResult;

impl crate::DavHandler {
    // A request body was already refused with 415 by the dispatcher.
    pub(crate) async fn handle_mkcol(&self, req: &Request<()>) -> DavResult<Response<Body>> {
        let mut path = self.path(req)?;
        let _guard = self.guards.lock(&[&path]).await;

        if self.fs.metadata(&path).await.is_ok() {
            debug!("MKCOL {path}: exists");
            return Err(StatusCode::METHOD_NOT_ALLOWED.into());
        }

        let tokens =
            if_match_get_tokens(req, None, &path, &self.prefix, &*self.fs, &*self.ls).await?;
        self.check_lock(&path, false, &tokens)?;

        // Exists: 405, parent missing or not a collection: 409.
        self.fs.create_dir(&path).await?;
        self.relax(&path).await;

        let mut res = Response::new(Body::empty());
        if !path.is_collection() {
            path.add_slash();
            res.headers_mut()
                .typed_insert(davheaders::ContentLocation(path.as_url_string_with_prefix()));
        }
        res.headers_mut().typed_insert(headers::ContentLength(0));
        *res.status_mut() = StatusCode::CREATED;
        Ok(res)
    }
}

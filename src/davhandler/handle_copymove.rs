use headers::HeaderMapExt;
use http::{Request, Response, StatusCode};

use crate::body::Body;
use crate::conditional::if_match_get_tokens;
use crate::davheaders::{self, Depth};
use crate::davpath::DavPath;
use crate::util::DavMethod;
use crate::DavResult;

impl crate::DavHandler {
    // Resolve the Destination: header to a path below our prefix.
    fn destination(&self, req: &Request<()>) -> DavResult<DavPath> {
        let dest = req
            .headers()
            .typed_get::<davheaders::Destination>()
            .ok_or(StatusCode::BAD_REQUEST)?;
        let dest = dest.path().ok_or(StatusCode::BAD_REQUEST)?;
        // a destination outside of what we serve is another server.
        DavPath::from_str_and_prefix(&dest, &self.prefix).map_err(|e| {
            debug!("destination {dest}: {e}");
            StatusCode::BAD_GATEWAY.into()
        })
    }

    pub(crate) async fn handle_copymove(
        &self,
        req: &Request<()>,
        method: DavMethod,
    ) -> DavResult<Response<Body>> {
        let mut path = self.path(req)?;
        let mut dest = self.destination(req)?;

        // Overwrite defaults to "T".
        let overwrite =
            davheaders::typed_strict::<davheaders::Overwrite>(req.headers())?.map_or(true, |o| o.0);

        // MOVE is always infinite, COPY can be shallow.
        let deep = match (method, davheaders::typed_strict::<Depth>(req.headers())?) {
            (_, None) | (_, Some(Depth::Infinity)) => true,
            (DavMethod::Copy, Some(Depth::Zero)) => false,
            (_, d) => {
                debug!("{method:?} {path}: depth {d:?} not allowed");
                return Err(StatusCode::BAD_REQUEST.into());
            }
        };

        if path == dest || path.is_ancestor_of(&dest) || dest.is_ancestor_of(&path) {
            debug!("{method:?} {path} -> {dest}: overlapping paths");
            return Err(StatusCode::FORBIDDEN.into());
        }

        let _guard = self.guards.lock(&[&path, &dest]).await;

        let meta = self.fs.metadata(&path).await?;
        if meta.is_collection() {
            path.add_slash();
            dest.add_slash();
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
        if method == DavMethod::Move {
            self.check_lock(&path, true, &tokens)?;
        }
        self.check_lock(&dest, true, &tokens)?;

        let exists = self.fs.metadata(&dest).await.is_ok();
        if exists && !overwrite {
            debug!("{method:?} {path} -> {dest}: destination exists");
            return Err(StatusCode::CONFLICT.into());
        }

        match method {
            DavMethod::Move => {
                self.fs.rename(&path, &dest, overwrite).await?;
                if let Err(e) = self.ls.delete(&path) {
                    warn!("MOVE {path}: dropping locks: {e}");
                }
            }
            _ => self.fs.copy(&path, &dest, deep, overwrite).await?,
        }
        // the resource that was overwritten is gone, and so are its locks.
        if exists {
            if let Err(e) = self.ls.delete(&dest) {
                warn!("{method:?} {dest}: dropping locks: {e}");
            }
        }

        let mut res = Response::new(Body::empty());
        res.headers_mut().typed_insert(headers::ContentLength(0));
        *res.status_mut() = if exists {
            StatusCode::NO_CONTENT
        } else {
            StatusCode::CREATED
        };
        Ok(res)
    }
}

use headers::HeaderMapExt;
use http::{Request, Response};

use crate::body::Body;
use crate::DavResult;

impl crate::DavHandler {
    // The capability headers (DAV, Allow, Public, MS-Author-Via) are added
    // to every response on the way out, so there is nothing left to do
    // here. OPTIONS answers the same whether or not the path exists.
    pub(crate) async fn handle_options(&self, req: &Request<()>) -> DavResult<Response<Body>> {
        let path = self.path(req)?;
        trace!("OPTIONS {path}");
        let mut res = Response::new(Body::empty());
        res.headers_mut().typed_insert(headers::ContentLength(0));
        Ok(res)
    }
}

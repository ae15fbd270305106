use http::StatusCode;
use http::header::{ALLOW, HeaderValue};

use super::{Middleware, Next};
use crate::handler::BoxFuture;
use crate::request::Request;
use crate::response::Response;
use crate::router::Lookup;

/// Resolves the endpoint for the request so later stages can see its
/// metadata. The endpoint itself runs after the last stage.
///
/// An unknown path continues without an endpoint and ends as `404`; a known
/// path with the wrong method stops here with `405`.
pub struct Routing;

impl Middleware for Routing {
    fn handle(&self, mut req: Request, next: Next) -> BoxFuture<'static, Response> {
        match next.router().lookup(req.method(), req.path()) {
            Lookup::Found(endpoint, params) => {
                req.endpoint = Some(endpoint);
                req.params = params;
                next.run(req)
            }
            Lookup::NotFound => next.run(req),
            Lookup::MethodNotAllowed(allowed) => {
                let allow = allowed.iter().map(|m| m.as_str()).collect::<Vec<_>>().join(", ");
                Box::pin(async move {
                    let mut res = Response::status(StatusCode::METHOD_NOT_ALLOWED);
                    if let Ok(value) = HeaderValue::from_str(&allow) {
                        res.headers_mut().insert(ALLOW, value);
                    }
                    res
                })
            }
        }
    }
}

//! HTTPS enforcement.
//!
//! TLS terminates at the reverse proxy, so the original scheme is read from
//! `x-forwarded-proto`. Requests without that header came straight to the
//! process (local development) and are left alone.

use std::time::Duration;

use http::StatusCode;
use http::header::{HOST, HeaderValue, STRICT_TRANSPORT_SECURITY};

use super::{Middleware, Next};
use crate::handler::BoxFuture;
use crate::request::Request;
use crate::response::Response;

/// Adds `strict-transport-security` to responses for HTTPS requests.
pub struct Hsts {
    value: HeaderValue,
}

impl Hsts {
    pub fn new(max_age: Duration) -> Self {
        let value = HeaderValue::from_str(&format!("max-age={}", max_age.as_secs()))
            .unwrap_or_else(|_| HeaderValue::from_static("max-age=2592000"));
        Self { value }
    }
}

impl Middleware for Hsts {
    fn handle(&self, req: Request, next: Next) -> BoxFuture<'static, Response> {
        let value = self.value.clone();
        Box::pin(async move {
            let https = req.is_https();
            let mut res = next.run(req).await;
            if https {
                res.headers_mut().insert(STRICT_TRANSPORT_SECURITY, value);
            }
            res
        })
    }
}

/// Sends plain-HTTP requests to the same URL over HTTPS with `307`, which
/// preserves the method and body.
pub struct HttpsRedirection;

impl Middleware for HttpsRedirection {
    fn handle(&self, req: Request, next: Next) -> BoxFuture<'static, Response> {
        let target = https_target(&req);
        match target {
            Some(location) => Box::pin(async move {
                Response::redirect_with(StatusCode::TEMPORARY_REDIRECT, &location)
            }),
            None => next.run(req),
        }
    }
}

fn https_target(req: &Request) -> Option<String> {
    let proto = req.header("x-forwarded-proto")?;
    if !proto.eq_ignore_ascii_case("http") {
        return None;
    }
    let host = req.header("x-forwarded-host").or_else(|| req.header(HOST.as_str()))?;
    let path = req.uri().path_and_query().map(|p| p.as_str()).unwrap_or("/");
    Some(format!("https://{host}{path}"))
}

#[cfg(test)]
mod tests {
    use bytes::Bytes;
    use http::Method;
    use http::header::LOCATION;

    use super::*;
    use crate::middleware::Pipeline;
    use crate::router::Router;

    async fn ok(_: Request) -> Response { Response::text("ok") }

    fn forwarded(proto: &str, uri: &str) -> Request {
        let req = http::Request::builder()
            .uri(uri)
            .header("x-forwarded-proto", proto)
            .header("host", "asc.example.com")
            .body(Bytes::new())
            .unwrap();
        Request::from_http(req)
    }

    fn app() -> crate::middleware::App {
        Pipeline::builder()
            .use_hsts(Duration::from_secs(2_592_000))
            .use_https_redirection()
            .use_routing()
            .build()
            .unwrap()
            .map_routes(Router::new().on(Method::GET, "/", ok))
            .unwrap()
    }

    #[tokio::test]
    async fn http_is_redirected_with_path_and_query() {
        let res = app().handle(forwarded("http", "/?page=2")).await;
        assert_eq!(res.status_code(), StatusCode::TEMPORARY_REDIRECT);
        assert_eq!(res.header(LOCATION), Some("https://asc.example.com/?page=2"));
        assert!(res.header(STRICT_TRANSPORT_SECURITY).is_none());
    }

    #[tokio::test]
    async fn https_gets_hsts() {
        let res = app().handle(forwarded("https", "/")).await;
        assert_eq!(res.status_code(), StatusCode::OK);
        assert_eq!(res.header(STRICT_TRANSPORT_SECURITY), Some("max-age=2592000"));
    }

    #[tokio::test]
    async fn direct_requests_are_untouched() {
        let res = app().handle(Request::get("/")).await;
        assert_eq!(res.status_code(), StatusCode::OK);
        assert!(res.header(STRICT_TRANSPORT_SECURITY).is_none());
    }
}

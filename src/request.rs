//! Incoming HTTP request type.

use std::collections::HashMap;
use std::net::SocketAddr;

use bytes::Bytes;
use http::{Extensions, HeaderMap, Method, Uri};
use serde::de::DeserializeOwned;
use url::form_urlencoded;

use crate::identity::Principal;
use crate::router::Endpoint;
use crate::session::Session;

/// An incoming HTTP request with its body fully read.
///
/// Middleware fills in the optional parts as the request travels down the
/// pipeline: routing sets the endpoint and path params, the session stage
/// attaches a [`Session`], authorization attaches the signed-in [`Principal`].
pub struct Request {
    pub(crate) head: http::request::Parts,
    pub(crate) body: Bytes,
    pub(crate) params: HashMap<String, String>,
    pub(crate) endpoint: Option<Endpoint>,
    pub(crate) session: Option<Session>,
    pub(crate) user: Option<Principal>,
    pub(crate) remote_addr: Option<SocketAddr>,
}

impl Request {
    /// Wraps an `http` request whose body has already been collected.
    pub fn from_http(req: http::Request<Bytes>) -> Self {
        let (head, body) = req.into_parts();
        Self {
            head,
            body,
            params: HashMap::new(),
            endpoint: None,
            session: None,
            user: None,
            remote_addr: None,
        }
    }

    /// Shorthand for a bodiless request, mostly useful in tests.
    pub fn get(uri: &str) -> Self {
        let mut req = http::Request::new(Bytes::new());
        *req.uri_mut() = uri.parse().unwrap_or_else(|_| Uri::from_static("/"));
        Self::from_http(req)
    }

    pub(crate) fn with_remote_addr(mut self, addr: SocketAddr) -> Self {
        self.remote_addr = Some(addr);
        self
    }

    pub fn method(&self) -> &Method { &self.head.method }
    pub fn uri(&self) -> &Uri { &self.head.uri }
    pub fn path(&self) -> &str { self.head.uri.path() }
    pub fn headers(&self) -> &HeaderMap { &self.head.headers }
    pub fn headers_mut(&mut self) -> &mut HeaderMap { &mut self.head.headers }
    pub fn body(&self) -> &[u8] { &self.body }
    pub fn remote_addr(&self) -> Option<SocketAddr> { self.remote_addr }

    /// Typed per-request values, e.g. the application's service container.
    pub fn extensions(&self) -> &Extensions { &self.head.extensions }
    pub fn extensions_mut(&mut self) -> &mut Extensions { &mut self.head.extensions }

    /// Header lookup; `None` if absent or not visible ASCII.
    pub fn header(&self, name: &str) -> Option<&str> {
        self.head.headers.get(name).and_then(|v| v.to_str().ok())
    }

    /// Returns a named path parameter.
    ///
    /// For a route `/ServiceRequests/Details/{id}`, `req.param("id")` on
    /// `/ServiceRequests/Details/42` returns `Some("42")`.
    pub fn param(&self, key: &str) -> Option<&str> {
        self.params.get(key).map(String::as_str)
    }

    /// Parses the body as JSON.
    pub fn json<T: DeserializeOwned>(&self) -> Result<T, serde_json::Error> {
        serde_json::from_slice(&self.body)
    }

    /// True when the body is an HTML form post.
    pub fn is_form(&self) -> bool {
        self.header("content-type")
            .and_then(|ct| ct.split(';').next())
            .is_some_and(|ct| ct.trim().eq_ignore_ascii_case("application/x-www-form-urlencoded"))
    }

    /// Decodes an `application/x-www-form-urlencoded` body. Repeated names
    /// keep their last value.
    pub fn form(&self) -> HashMap<String, String> {
        form_urlencoded::parse(&self.body).into_owned().collect()
    }

    /// The session attached by the session middleware, if it is installed.
    pub fn session(&self) -> Option<&Session> { self.session.as_ref() }

    /// The signed-in user, set by the authorization middleware.
    pub fn user(&self) -> Option<&Principal> { self.user.as_ref() }

    pub(crate) fn endpoint(&self) -> Option<&Endpoint> { self.endpoint.as_ref() }

    /// Returns the value of a request cookie.
    pub fn cookie(&self, name: &str) -> Option<String> {
        self.head
            .headers
            .get_all(http::header::COOKIE)
            .iter()
            .filter_map(|v| v.to_str().ok())
            .flat_map(|v| cookie::Cookie::split_parse(v))
            .filter_map(Result::ok)
            .find(|c| c.name() == name)
            .map(|c| c.value().to_owned())
    }

    /// True when the client reached the proxy over TLS.
    ///
    /// TLS terminates at the reverse proxy; the scheme arrives in
    /// `x-forwarded-proto`.
    pub fn is_https(&self) -> bool {
        self.header("x-forwarded-proto")
            .map(|p| p.eq_ignore_ascii_case("https"))
            .unwrap_or(false)
    }
}

//! Outgoing HTTP response type and the [`IntoResponse`] conversion trait.
//!
//! Build a [`Response`] in your handler and return it. Middleware may rewrite
//! it on the way out (session cookie, HSTS, error page).

use std::fmt;

use bytes::Bytes;
use http::header::{CONTENT_TYPE, HeaderName, HeaderValue, LOCATION};
use http::{HeaderMap, StatusCode};
use http_body_util::Full;
use tracing::warn;

// ── ContentType ───────────────────────────────────────────────────────────────

/// Content types the host serves, from handlers or from the web root.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum ContentType {
    Css,
    Html,
    Icon,
    JavaScript,
    Jpeg,
    Json,
    OctetStream,
    Png,
    Svg,
    Text,
    Woff2,
}

impl ContentType {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Css         => "text/css; charset=utf-8",
            Self::Html        => "text/html; charset=utf-8",
            Self::Icon        => "image/x-icon",
            Self::JavaScript  => "text/javascript; charset=utf-8",
            Self::Jpeg        => "image/jpeg",
            Self::Json        => "application/json",
            Self::OctetStream => "application/octet-stream",
            Self::Png         => "image/png",
            Self::Svg         => "image/svg+xml",
            Self::Text        => "text/plain; charset=utf-8",
            Self::Woff2       => "font/woff2",
        }
    }

    /// Maps a file extension (without the dot, any case) to a content type.
    /// Unknown extensions are served as `application/octet-stream`.
    pub fn from_extension(ext: &str) -> Self {
        match ext.to_ascii_lowercase().as_str() {
            "css"          => Self::Css,
            "htm" | "html" => Self::Html,
            "ico"          => Self::Icon,
            "js" | "mjs"   => Self::JavaScript,
            "jpg" | "jpeg" => Self::Jpeg,
            "json" | "map" => Self::Json,
            "png"          => Self::Png,
            "svg"          => Self::Svg,
            "txt"          => Self::Text,
            "woff2"        => Self::Woff2,
            _              => Self::OctetStream,
        }
    }
}

// ── Response ─────────────────────────────────────────────────────────────────

/// An outgoing HTTP response.
///
/// ```rust
/// use asc_web::Response;
/// use http::StatusCode;
///
/// Response::json(br#"{"id":1}"#.to_vec());
/// Response::html("<h1>ASC</h1>");
/// Response::status(StatusCode::NO_CONTENT);
/// Response::redirect("/Home/Index");
///
/// Response::builder()
///     .status(StatusCode::CREATED)
///     .header(http::header::LOCATION, "/ServiceRequests/42")
///     .json(br#"{"id":42}"#.to_vec());
/// ```
pub struct Response {
    pub(crate) status: StatusCode,
    pub(crate) headers: HeaderMap,
    pub(crate) body: Bytes,
    /// Failure detail for the developer error page. Never written to the wire.
    pub(crate) diagnostic: Option<String>,
}

impl Response {
    /// `200 OK`: `application/json`.
    pub fn json(body: impl Into<Bytes>) -> Self {
        Self::typed(ContentType::Json, body.into())
    }

    /// `200 OK`: `text/plain; charset=utf-8`.
    pub fn text(body: impl Into<String>) -> Self {
        Self::typed(ContentType::Text, Bytes::from(body.into()))
    }

    /// `200 OK`: `text/html; charset=utf-8`.
    pub fn html(body: impl Into<String>) -> Self {
        Self::typed(ContentType::Html, Bytes::from(body.into()))
    }

    /// Response with no body.
    pub fn status(code: StatusCode) -> Self {
        Self { status: code, headers: HeaderMap::new(), body: Bytes::new(), diagnostic: None }
    }

    /// `302 Found` to `location`.
    pub fn redirect(location: &str) -> Self {
        Self::redirect_with(StatusCode::FOUND, location)
    }

    pub(crate) fn redirect_with(code: StatusCode, location: &str) -> Self {
        match HeaderValue::try_from(location) {
            Ok(value) => {
                let mut res = Self::status(code);
                res.headers.insert(LOCATION, value);
                res
            }
            Err(_) => Self::internal_error(format!("invalid redirect location `{location}`")),
        }
    }

    /// `500 Internal Server Error` that remembers why.
    ///
    /// `detail` is shown only by the developer error page; in production the
    /// client sees the generic error page.
    pub fn internal_error(detail: impl Into<String>) -> Self {
        let mut res = Self::status(StatusCode::INTERNAL_SERVER_ERROR);
        res.diagnostic = Some(detail.into());
        res
    }

    /// Builder for responses that need a custom status or extra headers.
    pub fn builder() -> ResponseBuilder {
        ResponseBuilder { headers: HeaderMap::new(), status: StatusCode::OK }
    }

    pub fn status_code(&self) -> StatusCode { self.status }
    pub fn headers(&self) -> &HeaderMap { &self.headers }
    pub fn headers_mut(&mut self) -> &mut HeaderMap { &mut self.headers }
    pub fn body(&self) -> &Bytes { &self.body }
    pub fn diagnostic(&self) -> Option<&str> { self.diagnostic.as_deref() }

    pub fn header(&self, name: impl http::header::AsHeaderName) -> Option<&str> {
        self.headers.get(name).and_then(|v| v.to_str().ok())
    }

    fn typed(content_type: ContentType, body: Bytes) -> Self {
        let mut headers = HeaderMap::new();
        headers.insert(CONTENT_TYPE, HeaderValue::from_static(content_type.as_str()));
        Self { status: StatusCode::OK, headers, body, diagnostic: None }
    }

    pub(crate) fn into_inner(self) -> http::Response<Full<Bytes>> {
        let mut res = http::Response::new(Full::new(self.body));
        *res.status_mut() = self.status;
        *res.headers_mut() = self.headers;
        res
    }
}

impl fmt::Debug for Response {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Response")
            .field("status", &self.status)
            .field("headers", &self.headers)
            .field("body_len", &self.body.len())
            .finish()
    }
}

// ── ResponseBuilder ───────────────────────────────────────────────────────────

/// Fluent builder for [`Response`].
///
/// Obtain via [`Response::builder()`]. Defaults to `200 OK`.
/// Terminated by a typed body method.
pub struct ResponseBuilder {
    headers: HeaderMap,
    status: StatusCode,
}

impl ResponseBuilder {
    pub fn status(mut self, code: StatusCode) -> Self {
        self.status = code;
        self
    }

    /// Appends a header. A value that is not a legal header value is dropped
    /// with a warning.
    pub fn header<V>(mut self, name: HeaderName, value: V) -> Self
    where
        V: TryInto<HeaderValue>,
    {
        match value.try_into() {
            Ok(value) => {
                self.headers.append(name, value);
            }
            Err(_) => warn!(header = %name, "dropping invalid header value"),
        }
        self
    }

    pub fn json(self, body: impl Into<Bytes>) -> Response {
        self.finish(ContentType::Json, body.into())
    }

    pub fn html(self, body: impl Into<String>) -> Response {
        self.finish(ContentType::Html, Bytes::from(body.into()))
    }

    pub fn text(self, body: impl Into<String>) -> Response {
        self.finish(ContentType::Text, Bytes::from(body.into()))
    }

    pub fn bytes(self, content_type: ContentType, body: impl Into<Bytes>) -> Response {
        self.finish(content_type, body.into())
    }

    /// Terminate with no body (e.g. `204`, `307`).
    pub fn no_body(self) -> Response {
        Response { status: self.status, headers: self.headers, body: Bytes::new(), diagnostic: None }
    }

    fn finish(mut self, content_type: ContentType, body: Bytes) -> Response {
        self.headers.insert(CONTENT_TYPE, HeaderValue::from_static(content_type.as_str()));
        Response { status: self.status, headers: self.headers, body, diagnostic: None }
    }
}

// ── IntoResponse ──────────────────────────────────────────────────────────────

/// Conversion into an HTTP [`Response`].
///
/// Implement on your own types to return them directly from handlers.
pub trait IntoResponse {
    fn into_response(self) -> Response;
}

impl IntoResponse for Response {
    fn into_response(self) -> Response { self }
}

impl IntoResponse for &'static str {
    fn into_response(self) -> Response { Response::text(self) }
}

impl IntoResponse for String {
    fn into_response(self) -> Response { Response::text(self) }
}

/// Return a status directly from a handler: `return StatusCode::NOT_FOUND`.
impl IntoResponse for StatusCode {
    fn into_response(self) -> Response { Response::status(self) }
}

/// `Err` becomes a `500` whose detail only the developer error page shows.
impl<R, E> IntoResponse for Result<R, E>
where
    R: IntoResponse,
    E: fmt::Display,
{
    fn into_response(self) -> Response {
        match self {
            Ok(r) => r.into_response(),
            Err(e) => Response::internal_error(e.to_string()),
        }
    }
}

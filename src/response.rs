//! Outgoing HTTP response type and the [`IntoResponse`] conversion trait.
//!
//! Build a [`Response`] in your handler and return it. Middleware may adjust
//! headers on the way out; nothing reaches the socket until the whole
//! response, body included, exists in memory.

use bytes::Bytes;
use http::header::{self, HeaderName, HeaderValue};
use http::{HeaderMap, StatusCode};
use http_body_util::Full;

const HTML: &str = "text/html; charset=utf-8";
const TEXT: &str = "text/plain; charset=utf-8";

// ── Response ─────────────────────────────────────────────────────────────────

/// An outgoing HTTP response.
///
/// # Shortcuts
///
/// ```rust
/// use http::StatusCode;
/// use snippetbox::Response;
///
/// Response::html("<p>hi</p>");
/// Response::text("OK");
/// Response::status(StatusCode::NO_CONTENT);
/// Response::status_text(StatusCode::NOT_FOUND); // body: "Not Found\n"
/// Response::redirect("/user/login");            // 303 See Other
/// ```
///
/// # Builder (custom status or headers)
///
/// ```rust
/// use http::{header, HeaderValue, StatusCode};
/// use snippetbox::Response;
///
/// Response::builder()
///     .status(StatusCode::CREATED)
///     .header(header::LOCATION, HeaderValue::from_static("/snippet/1"))
///     .text("created");
/// ```
#[derive(Debug)]
pub struct Response {
    pub(crate) body: Bytes,
    pub(crate) headers: HeaderMap,
    pub(crate) status: StatusCode,
}

impl Response {
    /// `200 OK`, `text/html; charset=utf-8`.
    pub fn html(body: impl Into<String>) -> Self {
        Self::builder().html(body)
    }

    /// `200 OK`, `text/plain; charset=utf-8`.
    pub fn text(body: impl Into<String>) -> Self {
        Self::builder().text(body)
    }

    /// Response with no body.
    pub fn status(code: StatusCode) -> Self {
        Self { body: Bytes::new(), headers: HeaderMap::new(), status: code }
    }

    /// Response whose body is the canonical reason phrase for `code`,
    /// followed by a newline. Used for every client and server error so
    /// nothing about the failure leaks beyond its status.
    pub fn status_text(code: StatusCode) -> Self {
        let reason = code.canonical_reason().unwrap_or("");
        Self::builder()
            .status(code)
            .header(header::X_CONTENT_TYPE_OPTIONS, HeaderValue::from_static("nosniff"))
            .text(format!("{reason}\n"))
    }

    /// `303 See Other` to `location`.
    pub fn redirect(location: &str) -> Self {
        let location = HeaderValue::from_str(location)
            .unwrap_or_else(|_| HeaderValue::from_static("/"));
        Self::builder()
            .status(StatusCode::SEE_OTHER)
            .header(header::LOCATION, location)
            .no_body()
    }

    /// Builder for responses that need a custom status or extra headers.
    pub fn builder() -> ResponseBuilder {
        ResponseBuilder { headers: HeaderMap::new(), status: StatusCode::OK }
    }

    pub fn status_code(&self) -> StatusCode { self.status }
    pub fn headers(&self) -> &HeaderMap { &self.headers }
    pub fn body(&self) -> &[u8] { &self.body }

    /// Header value as a string, if present and valid UTF-8.
    pub fn header(&self, name: impl header::AsHeaderName) -> Option<&str> {
        self.headers.get(name).and_then(|v| v.to_str().ok())
    }

    /// Sets a header, replacing any existing value.
    pub fn set_header(&mut self, name: HeaderName, value: HeaderValue) {
        self.headers.insert(name, value);
    }

    /// Appends a header, keeping existing values (e.g. `set-cookie`).
    pub fn append_header(&mut self, name: HeaderName, value: HeaderValue) {
        self.headers.append(name, value);
    }

    pub(crate) fn into_inner(self) -> http::Response<Full<Bytes>> {
        let mut res = http::Response::new(Full::new(self.body));
        *res.status_mut() = self.status;
        *res.headers_mut() = self.headers;
        res
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

    pub fn header(mut self, name: HeaderName, value: HeaderValue) -> Self {
        self.headers.insert(name, value);
        self
    }

    /// Terminate with an HTML body (`text/html; charset=utf-8`).
    pub fn html(self, body: impl Into<String>) -> Response {
        self.finish(HeaderValue::from_static(HTML), Bytes::from(body.into()))
    }

    /// Terminate with a plain-text body (`text/plain; charset=utf-8`).
    pub fn text(self, body: impl Into<String>) -> Response {
        self.finish(HeaderValue::from_static(TEXT), Bytes::from(body.into()))
    }

    /// Terminate with an arbitrary body. Falls back to
    /// `application/octet-stream` if `content_type` is not a valid header value.
    pub fn bytes(self, content_type: &str, body: impl Into<Bytes>) -> Response {
        let content_type = HeaderValue::from_str(content_type)
            .unwrap_or_else(|_| HeaderValue::from_static("application/octet-stream"));
        self.finish(content_type, body.into())
    }

    /// Terminate with no body (e.g. `204 No Content`, `303 See Other`).
    pub fn no_body(self) -> Response {
        Response { body: Bytes::new(), headers: self.headers, status: self.status }
    }

    fn finish(mut self, content_type: HeaderValue, body: Bytes) -> Response {
        self.headers.insert(header::CONTENT_TYPE, content_type);
        Response { body, headers: self.headers, status: self.status }
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

/// Return a [`StatusCode`] directly from a handler: `return StatusCode::NOT_FOUND`
impl IntoResponse for StatusCode {
    fn into_response(self) -> Response { Response::status_text(self) }
}

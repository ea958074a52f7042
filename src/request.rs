//! Incoming HTTP request type.

use std::collections::HashMap;
use std::net::SocketAddr;

use bytes::Bytes;
use http::{HeaderMap, Method, Uri};

use crate::session::Session;

/// Per-request state threaded through the middleware chain.
///
/// Middleware fills these in on the way down; handlers only read them.
#[derive(Default)]
pub struct RequestContext {
    pub(crate) session: Option<Session>,
    pub(crate) authenticated: bool,
}

/// An incoming HTTP request with its body fully buffered.
pub struct Request {
    pub(crate) method: Method,
    pub(crate) uri: Uri,
    pub(crate) headers: HeaderMap,
    pub(crate) body: Bytes,
    pub(crate) params: HashMap<String, String>,
    pub(crate) remote_addr: Option<SocketAddr>,
    pub(crate) context: RequestContext,
}

impl Request {
    /// Builds a request from an already-buffered `http::Request`.
    ///
    /// The server calls this after collecting the body; tests call it
    /// directly to drive the pipeline without a socket.
    pub fn from_http(req: http::Request<Bytes>, remote_addr: Option<SocketAddr>) -> Self {
        let (parts, body) = req.into_parts();
        Self {
            method: parts.method,
            uri: parts.uri,
            headers: parts.headers,
            body,
            params: HashMap::new(),
            remote_addr,
            context: RequestContext::default(),
        }
    }

    pub fn method(&self) -> &Method { &self.method }
    pub fn uri(&self) -> &Uri { &self.uri }
    pub fn path(&self) -> &str { self.uri.path() }
    pub fn headers(&self) -> &HeaderMap { &self.headers }
    pub fn body(&self) -> &[u8] { &self.body }
    pub fn remote_addr(&self) -> Option<SocketAddr> { self.remote_addr }

    /// Case-insensitive header lookup. Non-UTF-8 values read as absent.
    pub fn header(&self, name: &str) -> Option<&str> {
        self.headers.get(name).and_then(|v| v.to_str().ok())
    }

    /// Returns a named path parameter.
    ///
    /// For a route `/snippet/{id}`, `req.param("id")` on `/snippet/42` returns `Some("42")`.
    pub fn param(&self, key: &str) -> Option<&str> {
        self.params.get(key).map(String::as_str)
    }

    /// The session attached by [`SessionManager::enable`](crate::session::SessionManager::enable),
    /// if this route is wrapped by it.
    pub fn session(&self) -> Option<&Session> {
        self.context.session.as_ref()
    }

    /// Whether [`authenticate`](crate::auth::Authenticate) resolved a live user
    /// for this request. Always `false` on routes it does not wrap.
    pub fn is_authenticated(&self) -> bool {
        self.context.authenticated
    }

    pub(crate) fn set_params(&mut self, params: HashMap<String, String>) {
        self.params = params;
    }
}

//! Radix-tree request router.
//!
//! One tree per HTTP method. O(path-length) lookup. A path that matches under
//! some other method answers `405` with an `Allow` header listing every method
//! that would have matched; a path that matches nowhere answers `404`.

use std::collections::HashMap;
use std::sync::Arc;

use bytes::Bytes;
use http::header::{self, HeaderValue};
use http::{Method, StatusCode};
use matchit::Router as MatchitRouter;

use crate::handler::{BoxFuture, BoxedHandler, ErasedHandler, Handler, private};
use crate::request::Request;
use crate::response::Response;

/// The application router.
///
/// Build it once at startup; it sits at the end of the outer
/// [`Pipeline`](crate::middleware::Pipeline). Each registration returns
/// `self` so calls chain naturally.
#[derive(Default)]
pub struct Router {
    routes: HashMap<Method, MatchitRouter<BoxedHandler>>,
}

enum Lookup {
    Found(BoxedHandler, HashMap<String, String>),
    MethodNotAllowed(Vec<Method>),
    NotFound,
}

impl Router {
    pub fn new() -> Self {
        Self { routes: HashMap::new() }
    }

    /// Register a handler for a method + path pair. Returns `self` for chaining.
    ///
    /// Path parameters use `{name}` syntax, catch-alls `{*name}`;
    /// `req.param("name")` retrieves either. The router does not validate
    /// parameter values; handlers do.
    ///
    /// # Panics
    ///
    /// Panics if `path` is malformed or conflicts with an existing route
    /// for the same method. Routes are fixed at startup, so this is a
    /// programming error.
    pub fn on(mut self, method: Method, path: &str, handler: impl Handler) -> Self {
        self.insert(method, path, handler.into_boxed_handler());
        self
    }

    /// Registers `handler` for `GET` and `HEAD`. `HEAD` runs the same
    /// handler and drops the body on the way out.
    pub fn get(mut self, path: &str, handler: impl Handler) -> Self {
        let handler = handler.into_boxed_handler();
        self.insert(Method::GET, path, Arc::clone(&handler));
        self.insert(Method::HEAD, path, handler);
        self
    }

    pub fn post(self, path: &str, handler: impl Handler) -> Self {
        self.on(Method::POST, path, handler)
    }

    fn insert(&mut self, method: Method, path: &str, handler: BoxedHandler) {
        self.routes
            .entry(method)
            .or_default()
            .insert(path, handler)
            .unwrap_or_else(|e| panic!("invalid route `{path}`: {e}"));
    }

    fn lookup(&self, method: &Method, path: &str) -> Lookup {
        if let Some(matched) = self.routes.get(method).and_then(|tree| tree.at(path).ok()) {
            let params = matched.params.iter()
                .map(|(k, v)| (k.to_owned(), v.to_owned()))
                .collect();
            return Lookup::Found(Arc::clone(matched.value), params);
        }

        let mut allowed: Vec<Method> = self.routes.iter()
            .filter(|(m, tree)| *m != method && tree.at(path).is_ok())
            .map(|(m, _)| m.clone())
            .collect();
        if allowed.is_empty() {
            return Lookup::NotFound;
        }
        allowed.sort_by(|a, b| a.as_str().cmp(b.as_str()));
        Lookup::MethodNotAllowed(allowed)
    }

    fn dispatch(&self, mut req: Request) -> BoxFuture {
        match self.lookup(req.method(), req.path()) {
            Lookup::Found(handler, params) => {
                let head = req.method() == Method::HEAD;
                req.set_params(params);
                let fut = handler.call(req);
                if !head {
                    return fut;
                }
                // Advertise the length GET would have sent.
                Box::pin(async move {
                    let mut res = fut.await;
                    let len = HeaderValue::from(res.body.len());
                    res.set_header(header::CONTENT_LENGTH, len);
                    res.body = Bytes::new();
                    res
                })
            }
            Lookup::MethodNotAllowed(allowed) => {
                let allow = allowed.iter().map(Method::as_str).collect::<Vec<_>>().join(", ");
                let mut res = Response::status_text(StatusCode::METHOD_NOT_ALLOWED);
                if let Ok(value) = HeaderValue::from_str(&allow) {
                    res.set_header(header::ALLOW, value);
                }
                Box::pin(async move { res })
            }
            Lookup::NotFound => {
                Box::pin(async { Response::status_text(StatusCode::NOT_FOUND) })
            }
        }
    }
}

impl ErasedHandler for Router {
    fn call(&self, req: Request) -> BoxFuture {
        self.dispatch(req)
    }
}

impl private::Sealed for Router {}

impl Handler for Router {
    fn into_boxed_handler(self) -> BoxedHandler {
        Arc::new(self)
    }
}

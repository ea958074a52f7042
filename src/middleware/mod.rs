//! Middleware layer.
//!
//! Middleware intercepts requests on the way in and responses on the way
//! out. Each interceptor implements [`Middleware`] and receives the request
//! plus a [`Next`] that runs everything after it. A [`Pipeline`] is an
//! ordered list of interceptors terminated by a handler:
//!
//! ```text
//! Pipeline::new()
//!     .layer(RecoverPanic)     ← outermost: sees every failure below it
//!     .layer(LogRequest)
//!     .layer(SecureHeaders)
//!     .then(router)            ← terminal handler
//! ```
//!
//! Layers run top to bottom on the way in and bottom to top on the way out.
//! A layer may short-circuit by returning a response without calling
//! [`Next::run`].

mod headers;
mod logging;
mod recover;

use std::sync::Arc;

use async_trait::async_trait;

use crate::handler::{BoxFuture, BoxedHandler, ErasedHandler, Handler, private};
use crate::request::Request;
use crate::response::Response;

pub use headers::SecureHeaders;
pub use logging::LogRequest;
pub use recover::{RecoverPanic, install_panic_hook};

/// A request interceptor.
///
/// ```rust,no_run
/// use async_trait::async_trait;
/// use snippetbox::middleware::{Middleware, Next};
/// use snippetbox::{Request, Response};
///
/// struct Noop;
///
/// #[async_trait]
/// impl Middleware for Noop {
///     async fn handle(&self, req: Request, next: Next) -> Response {
///         next.run(req).await
///     }
/// }
/// ```
#[async_trait]
pub trait Middleware: Send + Sync + 'static {
    async fn handle(&self, req: Request, next: Next) -> Response;
}

type Layers = Arc<[Arc<dyn Middleware>]>;

/// The remainder of a pipeline, handed to each [`Middleware`].
pub struct Next {
    layers: Layers,
    index: usize,
    endpoint: BoxedHandler,
}

impl Next {
    /// Runs the next interceptor, or the terminal handler once every
    /// interceptor has had its turn.
    pub async fn run(self, req: Request) -> Response {
        match self.layers.get(self.index).cloned() {
            Some(layer) => {
                let next = Next {
                    layers: self.layers,
                    index: self.index + 1,
                    endpoint: self.endpoint,
                };
                layer.handle(req, next).await
            }
            None => self.endpoint.call(req).await,
        }
    }
}

/// Builder for an ordered chain of interceptors.
#[derive(Default)]
pub struct Pipeline {
    layers: Vec<Arc<dyn Middleware>>,
}

impl Pipeline {
    pub fn new() -> Self {
        Self { layers: Vec::new() }
    }

    /// Appends an interceptor. Earlier layers wrap later ones.
    pub fn layer(mut self, middleware: impl Middleware) -> Self {
        self.layers.push(Arc::new(middleware));
        self
    }

    /// Terminates the pipeline with `handler`.
    pub fn then(self, handler: impl Handler) -> Chained {
        Chained {
            layers: self.layers.into(),
            endpoint: handler.into_boxed_handler(),
        }
    }
}

/// A pipeline bound to its terminal handler. Itself a [`Handler`], so
/// chains nest: the router's routes are chains, and the router sits at the
/// end of the outer chain.
pub struct Chained {
    layers: Layers,
    endpoint: BoxedHandler,
}

impl Chained {
    /// Drives one request through the chain.
    pub async fn call(&self, req: Request) -> Response {
        self.start().run(req).await
    }

    fn start(&self) -> Next {
        Next {
            layers: Arc::clone(&self.layers),
            index: 0,
            endpoint: Arc::clone(&self.endpoint),
        }
    }
}

impl ErasedHandler for Chained {
    fn call(&self, req: Request) -> BoxFuture {
        let next = self.start();
        Box::pin(next.run(req))
    }
}

impl private::Sealed for Chained {}

impl Handler for Chained {
    fn into_boxed_handler(self) -> BoxedHandler {
        Arc::new(self)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use bytes::Bytes;
    use http::header::{HeaderName, HeaderValue};
    use http::StatusCode;
    use parking_lot::Mutex;

    struct Trace(&'static str, Arc<Mutex<Vec<String>>>);

    #[async_trait]
    impl Middleware for Trace {
        async fn handle(&self, req: Request, next: Next) -> Response {
            self.1.lock().push(format!("in:{}", self.0));
            let res = next.run(req).await;
            self.1.lock().push(format!("out:{}", self.0));
            res
        }
    }

    struct Gate;

    #[async_trait]
    impl Middleware for Gate {
        async fn handle(&self, _req: Request, _next: Next) -> Response {
            Response::status_text(StatusCode::FORBIDDEN)
        }
    }

    fn get(path: &str) -> Request {
        let req = http::Request::get(path).body(Bytes::new()).unwrap();
        Request::from_http(req, None)
    }

    #[tokio::test]
    async fn layers_run_in_order_and_unwind_in_reverse() {
        let log = Arc::new(Mutex::new(Vec::new()));
        let seen = Arc::clone(&log);
        let chain = Pipeline::new()
            .layer(Trace("a", Arc::clone(&log)))
            .layer(Trace("b", Arc::clone(&log)))
            .then(move |_req: Request| {
                let seen = Arc::clone(&seen);
                async move {
                    seen.lock().push("handler".to_owned());
                    Response::text("done")
                }
            });

        let res = chain.call(get("/")).await;
        assert_eq!(res.body(), b"done");
        assert_eq!(*log.lock(), ["in:a", "in:b", "handler", "out:b", "out:a"]);
    }

    #[tokio::test]
    async fn a_layer_can_short_circuit() {
        let chain = Pipeline::new()
            .layer(Gate)
            .then(|_req: Request| async { Response::text("unreachable") });

        let res = chain.call(get("/")).await;
        assert_eq!(res.status_code(), StatusCode::FORBIDDEN);
    }

    #[tokio::test]
    async fn chains_nest() {
        let inner = Pipeline::new().then(|_req: Request| async {
            let mut res = Response::text("inner");
            res.set_header(HeaderName::from_static("x-inner"), HeaderValue::from_static("1"));
            res
        });
        let outer = Pipeline::new().layer(SecureHeaders).then(inner);

        let res = outer.call(get("/")).await;
        assert_eq!(res.header("x-inner"), Some("1"));
        assert_eq!(res.header("x-frame-options"), Some("deny"));
    }
}

//! Handler trait and type erasure.
//!
//! # How async handlers are stored
//!
//! The router holds handlers of *different* types in a single
//! `HashMap<Method, Tree>`. Rust collections can only hold one concrete type,
//! so we use **trait objects** (`dyn ErasedHandler`) to hide the concrete
//! handler type behind a common interface and store everything uniformly.
//!
//! ```text
//! async fn home(app: Arc<App>, req: Request) -> Response { … }
//!        ↓ with_state(app, home)
//! move |req| home(Arc::clone(&app), req)         ← Fn(Request) -> Fut
//!        ↓ Pipeline::new().layer(…).then(…)
//! Arc<Chained>                                   ← BoxedHandler
//!        ↓
//! handler.call(req)  at request time             ← one vtable dispatch
//! ```
//!
//! The per-request cost is one `Arc` clone per layer plus one virtual call
//! per layer.

use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;

use crate::request::Request;
use crate::response::{IntoResponse, Response};

// ── Internal types ────────────────────────────────────────────────────────────

/// A heap-allocated, type-erased future that resolves to a [`Response`].
///
/// `Send + 'static` let tokio move the future across threads safely.
pub type BoxFuture = Pin<Box<dyn Future<Output = Response> + Send + 'static>>;

/// Internal dispatch interface.
///
/// `#[doc(hidden)] pub` rather than `pub(crate)` because it appears in the
/// return type of the public `Handler` trait's `into_boxed_handler` method.
#[doc(hidden)]
pub trait ErasedHandler {
    fn call(&self, req: Request) -> BoxFuture;
}

/// A heap-allocated, type-erased handler shared across concurrent requests.
#[doc(hidden)]
pub type BoxedHandler = Arc<dyn ErasedHandler + Send + Sync + 'static>;

// ── Public Handler trait ──────────────────────────────────────────────────────

/// Implemented for every valid route handler.
///
/// Satisfied automatically by any `async fn` with the signature
///
/// ```text
/// async fn name(req: Request) -> impl IntoResponse
/// ```
///
/// and by the crate's own composite handlers ([`Router`](crate::Router),
/// [`Chained`](crate::middleware::Chained)). The trait is sealed.
pub trait Handler: private::Sealed + Send + Sync + 'static {
    #[doc(hidden)]
    fn into_boxed_handler(self) -> BoxedHandler;
}

pub(crate) mod private {
    pub trait Sealed {}
}

// ── Blanket implementations ───────────────────────────────────────────────────

impl<F, Fut, R> private::Sealed for F
where
    F: Fn(Request) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = R> + Send + 'static,
    R: IntoResponse + Send + 'static,
{
}

impl<F, Fut, R> Handler for F
where
    F: Fn(Request) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = R> + Send + 'static,
    R: IntoResponse + Send + 'static,
{
    fn into_boxed_handler(self) -> BoxedHandler {
        Arc::new(FnHandler(self))
    }
}

/// Binds shared application state into a two-argument handler.
///
/// The state is constructed once at startup and handed to each handler by
/// reference count; handlers never reach for globals.
///
/// ```rust,no_run
/// # use std::sync::Arc;
/// # use snippetbox::{handler::with_state, Request, Response, Router};
/// struct Counter;
/// async fn show(_state: Arc<Counter>, _req: Request) -> Response { Response::text("") }
///
/// let state = Arc::new(Counter);
/// Router::new().on(http::Method::GET, "/", with_state(state, show));
/// ```
pub fn with_state<S, F, Fut, R>(state: Arc<S>, f: F) -> impl Handler
where
    S: Send + Sync + 'static,
    F: Fn(Arc<S>, Request) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = R> + Send + 'static,
    R: IntoResponse + Send + 'static,
{
    move |req: Request| f(Arc::clone(&state), req)
}

// ── Concrete wrapper ──────────────────────────────────────────────────────────

/// Newtype wrapper that holds a concrete handler `F` and implements
/// [`ErasedHandler`], bridging the typed world to the trait-object world.
struct FnHandler<F>(F);

impl<F, Fut, R> ErasedHandler for FnHandler<F>
where
    F: Fn(Request) -> Fut + Send + Sync,
    Fut: Future<Output = R> + Send + 'static,
    R: IntoResponse + Send + 'static,
{
    fn call(&self, req: Request) -> BoxFuture {
        let fut = (self.0)(req);
        Box::pin(async move { fut.await.into_response() })
    }
}

//! Panic recovery.

use std::any::Any;
use std::backtrace::Backtrace;
use std::cell::{Cell, RefCell};
use std::future::Future;
use std::panic::{self, AssertUnwindSafe};

use async_trait::async_trait;
use futures_util::FutureExt;
use futures_util::future::poll_fn;
use http::header::{self, HeaderValue};
use http::StatusCode;
use tracing::error;

use super::{Middleware, Next};
use crate::request::Request;
use crate::response::Response;

thread_local! {
    // Written by the panic hook, read by `RecoverPanic` on the same thread
    // before the unwinding poll returns.
    static LAST_PANIC_TRACE: RefCell<Option<Backtrace>> = const { RefCell::new(None) };

    // Non-zero while a `RecoverPanic` is polling its inner future on this thread.
    static RECOVER_DEPTH: Cell<usize> = const { Cell::new(0) };
}

struct RecoverScope;

impl RecoverScope {
    fn enter() -> Self {
        RECOVER_DEPTH.with(|d| d.set(d.get() + 1));
        RecoverScope
    }
}

impl Drop for RecoverScope {
    fn drop(&mut self) {
        RECOVER_DEPTH.with(|d| d.set(d.get().saturating_sub(1)));
    }
}

fn in_recover_scope() -> bool {
    RECOVER_DEPTH.with(Cell::get) > 0
}

/// Installs a panic hook that records a backtrace for [`RecoverPanic`].
///
/// Panics inside a `RecoverPanic` layer are only recorded; the layer logs
/// them. Any other panic (connection tasks, blocking pool, startup) is
/// logged at `error` and then handed to the hook that was installed before.
///
/// Call once at startup. Without it, recovered panics are still logged,
/// only with the backtrace of the recovery point rather than the panic site.
pub fn install_panic_hook() {
    let previous = panic::take_hook();
    panic::set_hook(Box::new(move |info| {
        if in_recover_scope() {
            let trace = Backtrace::force_capture();
            LAST_PANIC_TRACE.with(|slot| *slot.borrow_mut() = Some(trace));
            return;
        }
        let location = info
            .location()
            .map_or_else(|| "unknown".to_owned(), ToString::to_string);
        error!(panic = %panic_message(info.payload()), %location, "panic outside request handling");
        previous(info);
    }));
}

/// Converts a panic anywhere below this layer into a `500` with
/// `Connection: close`, so the process keeps serving and the client never
/// reuses a connection whose last response was cut short.
///
/// Place it first in the outermost [`Pipeline`](super::Pipeline).
pub struct RecoverPanic;

#[async_trait]
impl Middleware for RecoverPanic {
    async fn handle(&self, req: Request, next: Next) -> Response {
        let mut inner = Box::pin(next.run(req));
        let scoped = poll_fn(move |cx| {
            let _scope = RecoverScope::enter();
            inner.as_mut().poll(cx)
        });

        match AssertUnwindSafe(scoped).catch_unwind().await {
            Ok(res) => res,
            Err(payload) => {
                let trace = LAST_PANIC_TRACE
                    .with(|slot| slot.borrow_mut().take())
                    .unwrap_or_else(Backtrace::force_capture);
                error!(panic = %panic_message(&*payload), "handler panicked\n{trace}");

                let mut res = Response::status_text(StatusCode::INTERNAL_SERVER_ERROR);
                res.set_header(header::CONNECTION, HeaderValue::from_static("close"));
                res
            }
        }
    }
}

fn panic_message(payload: &(dyn Any + Send)) -> &str {
    if let Some(s) = payload.downcast_ref::<&'static str>() {
        s
    } else if let Some(s) = payload.downcast_ref::<String>() {
        s.as_str()
    } else {
        "non-string panic payload"
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::middleware::Pipeline;
    use bytes::Bytes;

    fn get(path: &str) -> Request {
        Request::from_http(http::Request::get(path).body(Bytes::new()).unwrap(), None)
    }

    async fn boom(_req: Request) -> Response {
        panic!("boom")
    }

    #[tokio::test]
    async fn panic_becomes_500_with_connection_close() {
        let chain = Pipeline::new().layer(RecoverPanic).then(boom);

        let res = chain.call(get("/")).await;
        assert_eq!(res.status_code(), StatusCode::INTERNAL_SERVER_ERROR);
        assert_eq!(res.header(header::CONNECTION), Some("close"));
        assert_eq!(res.body(), b"Internal Server Error\n");
    }

    #[tokio::test]
    async fn chain_keeps_serving_after_a_panic() {
        let chain = Pipeline::new().layer(RecoverPanic).then(|req: Request| async move {
            if req.path() == "/boom" {
                panic!("boom");
            }
            Response::text("OK")
        });

        let first = chain.call(get("/boom")).await;
        assert_eq!(first.status_code(), StatusCode::INTERNAL_SERVER_ERROR);

        let second = chain.call(get("/")).await;
        assert_eq!(second.status_code(), StatusCode::OK);
        assert_eq!(second.header(header::CONNECTION), None);
    }

    #[tokio::test]
    async fn hook_passes_unrelated_panics_on_and_keeps_recovered_ones() {
        use std::sync::Mutex;
        use std::sync::atomic::{AtomicUsize, Ordering};

        static FORWARDED: AtomicUsize = AtomicUsize::new(0);
        // The hook is process-wide; serialise with anything else that swaps it.
        static HOOK_LOCK: Mutex<()> = Mutex::new(());
        let _guard = HOOK_LOCK.lock().unwrap_or_else(|e| e.into_inner());

        panic::set_hook(Box::new(|info| {
            if matches!(panic_message(info.payload()), "outside" | "inside") {
                FORWARDED.fetch_add(1, Ordering::SeqCst);
            }
        }));
        install_panic_hook();

        let outside = std::thread::spawn(|| {
            if true {
                panic!("outside");
            }
        })
        .join();
        assert!(outside.is_err());
        assert_eq!(FORWARDED.load(Ordering::SeqCst), 1);

        let chain = Pipeline::new().layer(RecoverPanic).then(|_req: Request| async {
            if true {
                panic!("inside");
            }
            Response::text("unreachable")
        });
        let res = chain.call(get("/")).await;
        assert_eq!(res.status_code(), StatusCode::INTERNAL_SERVER_ERROR);
        assert_eq!(FORWARDED.load(Ordering::SeqCst), 1);
        assert!(!in_recover_scope());

        drop(panic::take_hook());
    }

    #[test]
    fn panic_message_reads_both_payload_kinds() {
        let s: Box<dyn Any + Send> = Box::new("static");
        assert_eq!(panic_message(&*s), "static");
        let owned: Box<dyn Any + Send> = Box::new(String::from("owned"));
        assert_eq!(panic_message(&*owned), "owned");
        let other: Box<dyn Any + Send> = Box::new(7_u8);
        assert_eq!(panic_message(&*other), "non-string panic payload");
    }
}

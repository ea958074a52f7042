//! HTTP server and graceful shutdown.
//!
//! On SIGTERM or Ctrl-C the server stops accepting, lets every in-flight
//! connection finish, then returns from [`Server::serve`].
//!
//! Each connection runs on its own task and each request on its own service
//! future. When a client goes away hyper drops that future, which cancels
//! whatever the handler was awaiting (store calls, rendering) for it.
//!
//! Limits: a request head must arrive within [`HEADER_READ_TIMEOUT`], a body
//! may not exceed [`MAX_BODY_BYTES`] (`413`), and reading the body plus
//! running the handler must finish within [`REQUEST_TIMEOUT`] (`503`).

use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use bytes::Bytes;
use http::StatusCode;
use http::header::{self, HeaderValue};
use http_body_util::{BodyExt, Full, LengthLimitError, Limited};
use hyper::body::Body;
use hyper::service::service_fn;
use hyper_util::rt::{TokioExecutor, TokioIo, TokioTimer};
use hyper_util::server::conn::auto::Builder as ConnBuilder;
use tokio::net::TcpListener;
use tokio::task::JoinError;
use tracing::{debug, error, info, warn};

use crate::error::Error;
use crate::handler::{BoxedHandler, ErasedHandler, Handler};
use crate::request::Request;
use crate::response::Response;

/// Largest request body accepted, in bytes.
pub const MAX_BODY_BYTES: usize = 10 << 20;

/// Time a client has to send a complete request head.
pub const HEADER_READ_TIMEOUT: Duration = Duration::from_secs(5);

/// Time allowed for reading the body and producing the response.
pub const REQUEST_TIMEOUT: Duration = Duration::from_secs(10);

/// The HTTP server.
pub struct Server {
    addr: SocketAddr,
}

impl Server {
    /// Configures the server to bind to `addr` when [`serve`](Server::serve)
    /// is called.
    pub fn bind(addr: SocketAddr) -> Self {
        Self { addr }
    }

    /// Starts accepting connections and dispatching them through `app`.
    ///
    /// Returns only after a full graceful shutdown.
    pub async fn serve(self, app: impl Handler) -> Result<(), Error> {
        let listener = TcpListener::bind(self.addr).await?;
        let app = app.into_boxed_handler();

        info!(addr = %self.addr, "snippetbox listening");

        let mut conn = ConnBuilder::new(TokioExecutor::new());
        conn.http1()
            .timer(TokioTimer::new())
            .header_read_timeout(HEADER_READ_TIMEOUT);

        let mut tasks = tokio::task::JoinSet::new();

        let shutdown = shutdown_signal();
        tokio::pin!(shutdown);

        loop {
            tokio::select! {
                // Check shutdown first so a SIGTERM stops accepting at once,
                // even if more connections are queued.
                biased;

                () = &mut shutdown => {
                    info!(in_flight = tasks.len(), "shutdown signal received, draining connections");
                    break;
                }

                res = listener.accept() => {
                    let (stream, remote_addr) = match res {
                        Ok(v) => v,
                        Err(e) => {
                            error!("accept error: {e}");
                            continue;
                        }
                    };

                    let app = Arc::clone(&app);
                    let conn = conn.clone();
                    let io = TokioIo::new(stream);

                    tasks.spawn(async move {
                        let svc = service_fn(move |req| {
                            let app = Arc::clone(&app);
                            async move { dispatch(app, req, remote_addr).await }
                        });

                        if let Err(e) = conn.serve_connection(io, svc).await {
                            debug!(peer = %remote_addr, "connection error: {e}");
                        }
                    });
                }

                // Reap finished connection tasks so the JoinSet does not grow
                // without bound on long-running servers.
                Some(joined) = tasks.join_next(), if !tasks.is_empty() => {
                    log_join_error(joined);
                }
            }
        }

        while let Some(joined) = tasks.join_next().await {
            log_join_error(joined);
        }

        info!("snippetbox stopped");
        Ok(())
    }
}

// ── Request dispatch ──────────────────────────────────────────────────────────

/// Runs one request through the app under [`REQUEST_TIMEOUT`].
///
/// Infallible: every failure becomes a status response, so hyper never sees
/// an error.
async fn dispatch(
    app: BoxedHandler,
    req: hyper::Request<hyper::body::Incoming>,
    remote_addr: SocketAddr,
) -> Result<http::Response<Full<Bytes>>, std::convert::Infallible> {
    let res = within(REQUEST_TIMEOUT, handle(app, req, remote_addr)).await;
    Ok(res.into_inner())
}

async fn handle(
    app: BoxedHandler,
    req: hyper::Request<hyper::body::Incoming>,
    remote_addr: SocketAddr,
) -> Response {
    let (parts, body) = req.into_parts();
    let body = match read_body(body, MAX_BODY_BYTES).await {
        Ok(body) => body,
        Err(res) => {
            debug!(peer = %remote_addr, status = res.status_code().as_u16(), "rejected request body");
            return res;
        }
    };

    let req = Request::from_http(http::Request::from_parts(parts, body), Some(remote_addr));
    app.call(req).await
}

/// Buffers `body`, refusing anything over `limit` bytes with `413`.
/// A body that fails to arrive is a `400`.
async fn read_body<B>(body: B, limit: usize) -> Result<Bytes, Response>
where
    B: Body<Data = Bytes>,
    B::Error: Into<Box<dyn std::error::Error + Send + Sync>>,
{
    match Limited::new(body, limit).collect().await {
        Ok(collected) => Ok(collected.to_bytes()),
        Err(e) if e.downcast_ref::<LengthLimitError>().is_some() => {
            // The rest of the body is never read, so the connection cannot be reused.
            let mut res = Response::status_text(StatusCode::PAYLOAD_TOO_LARGE);
            res.set_header(header::CONNECTION, HeaderValue::from_static("close"));
            Err(res)
        }
        Err(e) => {
            debug!("failed to read request body: {e}");
            Err(Response::status_text(StatusCode::BAD_REQUEST))
        }
    }
}

/// Awaits `fut`, or answers `503` with `Connection: close` once `limit` passes.
async fn within(limit: Duration, fut: impl Future<Output = Response>) -> Response {
    match tokio::time::timeout(limit, fut).await {
        Ok(res) => res,
        Err(_) => {
            warn!(timeout_ms = limit.as_millis() as u64, "request timed out");
            let mut res = Response::status_text(StatusCode::SERVICE_UNAVAILABLE);
            res.set_header(header::CONNECTION, HeaderValue::from_static("close"));
            res
        }
    }
}

fn log_join_error(joined: Result<(), JoinError>) {
    if let Err(e) = joined {
        error!("connection task failed: {e}");
    }
}

// ── Shutdown signal ───────────────────────────────────────────────────────────

/// Resolves on the first SIGTERM or SIGINT (Ctrl-C). A signal that cannot be
/// installed is logged and never fires.
async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            error!("failed to install Ctrl-C handler: {e}");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let sigterm = async {
        match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
            Ok(mut signal) => {
                signal.recv().await;
            }
            Err(e) => {
                error!("failed to install SIGTERM handler: {e}");
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let sigterm = std::future::pending::<()>();

    tokio::select! {
        () = ctrl_c   => {}
        () = sigterm  => {}
    }
}

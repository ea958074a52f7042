//! Per-request access log.

use std::time::Instant;

use async_trait::async_trait;
use tracing::{Instrument, debug, info, info_span};

use super::{Middleware, Next};
use crate::request::Request;
use crate::response::Response;

/// Logs method, URI and peer address for every request before delegating,
/// then status and latency once the response exists. Runs the rest of the
/// chain inside an `http_request` span so inner log lines carry the same
/// fields.
pub struct LogRequest;

#[async_trait]
impl Middleware for LogRequest {
    async fn handle(&self, req: Request, next: Next) -> Response {
        let peer = req
            .remote_addr()
            .map_or_else(|| "-".to_owned(), |addr| addr.to_string());
        let span = info_span!(
            "http_request",
            method = %req.method(),
            uri = %req.uri(),
            peer = %peer,
        );

        async move {
            info!("request");
            let started = Instant::now();
            let res = next.run(req).await;
            debug!(
                status = res.status_code().as_u16(),
                elapsed_ms = started.elapsed().as_millis() as u64,
                "response",
            );
            res
        }
        .instrument(span)
        .await
    }
}

//! Fixed security headers.

use async_trait::async_trait;
use http::header::{self, HeaderName, HeaderValue};

use super::{Middleware, Next};
use crate::request::Request;
use crate::response::Response;

const X_XSS_PROTECTION: HeaderName = HeaderName::from_static("x-xss-protection");

/// Sets `X-Frame-Options: deny` and `X-XSS-Protection: 1; mode=block` on
/// every response, whatever the status, overriding anything set below.
pub struct SecureHeaders;

#[async_trait]
impl Middleware for SecureHeaders {
    async fn handle(&self, req: Request, next: Next) -> Response {
        let mut res = next.run(req).await;
        res.set_header(header::X_FRAME_OPTIONS, HeaderValue::from_static("deny"));
        res.set_header(X_XSS_PROTECTION, HeaderValue::from_static("1; mode=block"));
        res
    }
}

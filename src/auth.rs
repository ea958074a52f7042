//! Session authentication.
//!
//! [`Authenticate`] resolves, once per request, whether the session belongs
//! to a live user and records the answer on the request. [`RequireAuthentication`]
//! is the binary gate in front of protected routes.

use std::sync::Arc;

use async_trait::async_trait;
use http::header::{self, HeaderValue};
use tracing::{debug, error};

use crate::middleware::{Middleware, Next};
use crate::models::{ModelError, UserStore};
use crate::request::Request;
use crate::response::Response;

/// Session key holding the logged-in user's id.
pub const USER_ID_KEY: &str = "authenticated_user_id";

/// Session key holding the one-time flash message.
pub const FLASH_KEY: &str = "flash";

pub const LOGIN_PATH: &str = "/user/login";

/// Reads [`USER_ID_KEY`] from the session and confirms the user still exists
/// and is active. Sits inside [`EnableSessions`](crate::session::EnableSessions).
///
/// A missing or deactivated user drops the stale id from the session and the
/// request carries on anonymous. Any other store failure is a `500`.
pub struct Authenticate {
    users: Arc<dyn UserStore>,
}

impl Authenticate {
    pub fn new(users: Arc<dyn UserStore>) -> Self {
        Self { users }
    }
}

#[async_trait]
impl Middleware for Authenticate {
    async fn handle(&self, mut req: Request, next: Next) -> Response {
        let Some(session) = req.session().cloned() else {
            return next.run(req).await;
        };
        let Some(user_id) = session.get_i64(USER_ID_KEY) else {
            return next.run(req).await;
        };

        match self.users.get(user_id).await {
            Ok(user) if user.active => {
                req.context.authenticated = true;
            }
            Ok(_) | Err(ModelError::NoRecord) => {
                debug!(user_id, "session user is gone or inactive");
                session.remove(USER_ID_KEY);
            }
            Err(e) => {
                error!(error = %e, user_id, "failed to load session user");
                return Response::status_text(http::StatusCode::INTERNAL_SERVER_ERROR);
            }
        }

        next.run(req).await
    }
}

/// Redirects anonymous requests to the login page with a flash message.
/// Authenticated requests pass through, and their responses are marked
/// `Cache-Control: no-store` so protected pages never sit in shared caches.
pub struct RequireAuthentication;

#[async_trait]
impl Middleware for RequireAuthentication {
    async fn handle(&self, req: Request, next: Next) -> Response {
        if !req.is_authenticated() {
            if let Some(session) = req.session() {
                session.put(FLASH_KEY, "Please log in before continuing.");
            }
            return Response::redirect(LOGIN_PATH);
        }

        let mut res = next.run(req).await;
        res.set_header(header::CACHE_CONTROL, HeaderValue::from_static("no-store"));
        res
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::middleware::Pipeline;
    use crate::models::memory::MemoryUserStore;
    use crate::session::Session;
    use bytes::Bytes;
    use http::StatusCode;

    fn request_with(session: &Session) -> Request {
        let mut req =
            Request::from_http(http::Request::get("/snippet/create").body(Bytes::new()).unwrap(), None);
        req.context.session = Some(session.clone());
        req
    }

    async fn echo(req: Request) -> Response {
        Response::text(if req.is_authenticated() { "yes" } else { "no" })
    }

    async fn users_with_alice() -> (Arc<MemoryUserStore>, i64) {
        let users = Arc::new(MemoryUserStore::new());
        users.insert("Alice", "alice@example.com", "correct-horse").await.unwrap();
        let id = users.authenticate("alice@example.com", "correct-horse").await.unwrap();
        (users, id)
    }

    #[tokio::test]
    async fn live_user_is_authenticated() {
        let (users, id) = users_with_alice().await;
        let chain = Pipeline::new().layer(Authenticate::new(users)).then(echo);

        let session = Session::default();
        session.put(USER_ID_KEY, id);
        let res = chain.call(request_with(&session)).await;
        assert_eq!(res.body(), b"yes");
    }

    #[tokio::test]
    async fn anonymous_session_is_not_authenticated() {
        let (users, _) = users_with_alice().await;
        let chain = Pipeline::new().layer(Authenticate::new(users)).then(echo);

        let res = chain.call(request_with(&Session::default())).await;
        assert_eq!(res.body(), b"no");
    }

    #[tokio::test]
    async fn deleted_or_deactivated_user_is_dropped_from_session() {
        let (users, id) = users_with_alice().await;
        let chain = Pipeline::new().layer(Authenticate::new(users.clone())).then(echo);

        let session = Session::default();
        session.put(USER_ID_KEY, 999);
        let res = chain.call(request_with(&session)).await;
        assert_eq!(res.body(), b"no");
        assert!(!session.exists(USER_ID_KEY));

        users.deactivate(id).unwrap();
        session.put(USER_ID_KEY, id);
        let res = chain.call(request_with(&session)).await;
        assert_eq!(res.body(), b"no");
        assert!(!session.exists(USER_ID_KEY));
    }

    #[tokio::test]
    async fn gate_redirects_anonymous_with_flash() {
        let (users, _) = users_with_alice().await;
        let chain = Pipeline::new()
            .layer(Authenticate::new(users))
            .layer(RequireAuthentication)
            .then(echo);

        let session = Session::default();
        let res = chain.call(request_with(&session)).await;
        assert_eq!(res.status_code(), StatusCode::SEE_OTHER);
        assert_eq!(res.header(header::LOCATION), Some(LOGIN_PATH));
        assert_eq!(session.pop_string(FLASH_KEY), "Please log in before continuing.");
    }

    #[tokio::test]
    async fn gate_forwards_authenticated_unchanged() {
        let (users, id) = users_with_alice().await;
        let chain = Pipeline::new()
            .layer(Authenticate::new(users))
            .layer(RequireAuthentication)
            .then(echo);

        let session = Session::default();
        session.put(USER_ID_KEY, id);
        let res = chain.call(request_with(&session)).await;
        assert_eq!(res.status_code(), StatusCode::OK);
        assert_eq!(res.body(), b"yes");
        assert_eq!(res.header(header::CACHE_CONTROL), Some("no-store"));
        assert!(!session.exists(FLASH_KEY));
    }
}

//! Application context and route table.

use std::backtrace::Backtrace;
use std::path::PathBuf;
use std::sync::Arc;

use chrono::{Datelike, Utc};
use http::StatusCode;
use tracing::{error, warn};

use crate::auth::{Authenticate, FLASH_KEY, RequireAuthentication};
use crate::handler::with_state;
use crate::handlers;
use crate::middleware::{Chained, LogRequest, Pipeline, RecoverPanic, SecureHeaders};
use crate::models::{SnippetStore, UserStore};
use crate::request::Request;
use crate::response::Response;
use crate::router::Router;
use crate::session::{Session, SessionManager};
use crate::static_files::StaticFiles;
use crate::templates::{TemplateCache, TemplateData};

/// Everything handlers and middleware share, built once in `main` and passed
/// down by `Arc`.
pub struct App {
    pub templates: TemplateCache,
    pub sessions: Arc<SessionManager>,
    pub snippets: Arc<dyn SnippetStore>,
    pub users: Arc<dyn UserStore>,
    pub static_dir: PathBuf,
}

impl App {
    /// The complete request handler:
    ///
    /// ```text
    /// RecoverPanic → LogRequest → SecureHeaders → Router
    ///     dynamic routes:   EnableSessions → Authenticate → handler
    ///     protected routes: EnableSessions → Authenticate → RequireAuthentication → handler
    ///     /ping, /static:   handler only
    /// ```
    pub fn routes(self: &Arc<Self>) -> Chained {
        let dynamic = || {
            Pipeline::new()
                .layer(self.sessions.enable())
                .layer(Authenticate::new(Arc::clone(&self.users)))
        };
        let protected = || dynamic().layer(RequireAuthentication);
        let app = || Arc::clone(self);

        let router = Router::new()
            .get("/", dynamic().then(with_state(app(), handlers::home)))
            .get("/snippet/create", protected().then(with_state(app(), handlers::create_snippet_form)))
            .post("/snippet/create", protected().then(with_state(app(), handlers::create_snippet)))
            .get("/snippet/{id}", dynamic().then(with_state(app(), handlers::show_snippet)))
            .get("/user/signup", dynamic().then(with_state(app(), handlers::signup_user_form)))
            .post("/user/signup", dynamic().then(with_state(app(), handlers::signup_user)))
            .get("/user/login", dynamic().then(with_state(app(), handlers::login_user_form)))
            .post("/user/login", dynamic().then(with_state(app(), handlers::login_user)))
            .post("/user/logout", protected().then(with_state(app(), handlers::logout_user)))
            .get("/ping", handlers::ping)
            .get("/static/{*path}", StaticFiles::new(&self.static_dir).handler());

        Pipeline::new()
            .layer(RecoverPanic)
            .layer(LogRequest)
            .layer(SecureHeaders)
            .then(router)
    }

    /// Renders `name` with the per-request defaults filled in.
    ///
    /// The page is rendered completely before a response is built, so a
    /// failure partway through yields a clean `500` instead of half a page.
    pub fn render(&self, req: &Request, name: &str, data: TemplateData) -> Response {
        let data = self.add_default_data(data, req);
        match self.templates.render(name, &data) {
            Ok(html) => Response::html(html),
            Err(e) => self.server_error(&e),
        }
    }

    fn add_default_data(&self, mut data: TemplateData, req: &Request) -> TemplateData {
        data.current_year = Utc::now().year();
        data.flash = session(req).pop_string(FLASH_KEY);
        data.is_authenticated = req.is_authenticated();
        data
    }

    /// Logs `err` with a backtrace and answers a bare `500`.
    pub fn server_error(&self, err: &dyn std::error::Error) -> Response {
        let trace = Backtrace::force_capture();
        error!(error = %err, "server error\n{trace}");
        Response::status_text(StatusCode::INTERNAL_SERVER_ERROR)
    }

    /// A status-text response for problems with the request itself. Not logged.
    pub fn client_error(&self, status: StatusCode) -> Response {
        Response::status_text(status)
    }

    pub fn not_found(&self) -> Response {
        self.client_error(StatusCode::NOT_FOUND)
    }
}

/// The request's session. Every dynamic route is wrapped by
/// [`EnableSessions`](crate::session::EnableSessions); outside one, writes go
/// to a throwaway session.
pub(crate) fn session(req: &Request) -> Session {
    req.session().cloned().unwrap_or_else(|| {
        warn!(path = req.path(), "session used on a route without session middleware");
        Session::default()
    })
}

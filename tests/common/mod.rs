//! In-process test client for the full route table.

#![allow(dead_code)]

use std::path::{Path, PathBuf};
use std::sync::Arc;

use bytes::Bytes;
use http::header;
use snippetbox::middleware::Chained;
use snippetbox::models::memory::{MemorySnippetStore, MemoryUserStore};
use snippetbox::models::{SnippetStore, UserStore};
use snippetbox::{App, Request, Response, SessionManager, TemplateCache};

pub const SECRET: &[u8] = b"s6Ndh+pPbnzHbS*+9Pk8qGWhTzbpa@ge";

pub fn ui_dir() -> PathBuf {
    Path::new(env!("CARGO_MANIFEST_DIR")).join("ui")
}

pub fn app_with(
    templates: TemplateCache,
    snippets: Arc<dyn SnippetStore>,
    users: Arc<dyn UserStore>,
) -> Arc<App> {
    Arc::new(App {
        templates,
        sessions: Arc::new(SessionManager::new(SECRET).unwrap()),
        snippets,
        users,
        static_dir: ui_dir().join("static"),
    })
}

pub fn default_app() -> (Arc<App>, Arc<MemorySnippetStore>, Arc<MemoryUserStore>) {
    let snippets = Arc::new(MemorySnippetStore::new());
    let users = Arc::new(MemoryUserStore::new());
    let templates = TemplateCache::build(ui_dir().join("html")).unwrap();
    let app = app_with(templates, snippets.clone(), users.clone());
    (app, snippets, users)
}

/// Drives requests through `App::routes()` and carries the session cookie
/// between them like a browser would.
pub struct Client {
    chain: Chained,
    cookie: Option<String>,
}

impl Client {
    pub fn new(app: &Arc<App>) -> Self {
        Self { chain: app.routes(), cookie: None }
    }

    pub fn cookie(&self) -> Option<&str> {
        self.cookie.as_deref()
    }

    pub fn set_cookie(&mut self, cookie: Option<String>) {
        self.cookie = cookie;
    }

    pub async fn get(&mut self, path: &str) -> Response {
        self.send(http::Method::GET, path, Bytes::new()).await
    }

    pub async fn post(&mut self, path: &str, form: &str) -> Response {
        self.send(http::Method::POST, path, Bytes::from(form.to_owned())).await
    }

    pub async fn send(&mut self, method: http::Method, path: &str, body: Bytes) -> Response {
        let mut builder = http::Request::builder()
            .method(method)
            .uri(path)
            .header(header::CONTENT_TYPE, "application/x-www-form-urlencoded");
        if let Some(cookie) = &self.cookie {
            builder = builder.header(header::COOKIE, cookie.as_str());
        }
        let req = Request::from_http(builder.body(body).unwrap(), Some("127.0.0.1:50000".parse().unwrap()));

        let res = self.chain.call(req).await;
        if let Some(set_cookie) = res.header(header::SET_COOKIE) {
            self.cookie = if set_cookie.contains("Max-Age=0") {
                None
            } else {
                set_cookie.split(';').next().map(str::to_owned)
            };
        }
        res
    }

    pub async fn signup_and_login(&mut self, email: &str, password: &str) {
        let res = self
            .post("/user/signup", &format!("name=Alice&email={email}&password={password}"))
            .await;
        assert_eq!(res.header(header::LOCATION), Some("/user/login"));
        let res = self.post("/user/login", &format!("email={email}&password={password}")).await;
        assert_eq!(res.header(header::LOCATION), Some("/snippet/create"));
    }
}

pub fn body(res: &Response) -> String {
    String::from_utf8_lossy(res.body()).into_owned()
}

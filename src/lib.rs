//! # snippetbox
//!
//! A small web application for pasting and browsing text snippets, with
//! signup, login and cookie sessions, built on a minimal hyper-based HTTP
//! core.
//!
//! ## How a request flows
//!
//! ```text
//! RecoverPanic → LogRequest → SecureHeaders → Router
//!                                               ├─ /ping, /static/*        → handler
//!                                               └─ pages  → EnableSessions → Authenticate
//!                                                           [→ RequireAuthentication] → handler
//!                                                                → TemplateCache::render → Response
//! ```
//!
//! Each arrow is a [`middleware::Middleware`]; the chains are assembled with
//! [`middleware::Pipeline`] in [`App::routes`]. Shared state lives in one
//! [`App`] built at startup and handed to handlers by `Arc`.
//!
//! ## Quick start
//!
//! ```rust,no_run
//! use std::sync::Arc;
//! use snippetbox::models::memory::{MemorySnippetStore, MemoryUserStore};
//! use snippetbox::{App, Server, SessionManager, TemplateCache};
//!
//! #[tokio::main]
//! async fn main() -> anyhow::Result<()> {
//!     let app = Arc::new(App {
//!         templates: TemplateCache::build("./ui/html")?,
//!         sessions: Arc::new(SessionManager::new(b"s6Ndh+pPbnzHbS*+9Pk8qGWhTzbpa@ge")?),
//!         snippets: Arc::new(MemorySnippetStore::new()),
//!         users: Arc::new(MemoryUserStore::new()),
//!         static_dir: "./ui/static".into(),
//!     });
//!
//!     Server::bind("127.0.0.1:4000".parse()?).serve(app.routes()).await?;
//!     Ok(())
//! }
//! ```

mod app;
mod error;
mod request;
mod response;
mod router;
mod server;

pub mod auth;
pub mod config;
pub mod forms;
pub mod handler;
pub mod handlers;
pub mod middleware;
pub mod models;
pub mod session;
pub mod static_files;
pub mod templates;

pub use app::App;
pub use config::Config;
pub use error::Error;
pub use handler::Handler;
pub use request::Request;
pub use response::{IntoResponse, Response, ResponseBuilder};
pub use router::Router;
pub use server::Server;
pub use session::{Session, SessionManager};
pub use templates::{TemplateCache, TemplateData};

//! snippetbox - web application binary.
//!
//! Run with:
//!   SNIPPETBOX_SECRET='s6Ndh+pPbnzHbS*+9Pk8qGWhTzbpa@ge' RUST_LOG=info cargo run -- --insecure-cookies

use std::sync::Arc;

use clap::Parser;
use tracing_subscriber::EnvFilter;
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;

use snippetbox::middleware::install_panic_hook;
use snippetbox::models::memory::{MemorySnippetStore, MemoryUserStore};
use snippetbox::{App, Config, Server, SessionManager, TemplateCache};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let config = Config::parse();

    tracing_subscriber::registry()
        .with(EnvFilter::try_from_default_env().unwrap_or_else(|_| "info".into()))
        .with(tracing_subscriber::fmt::layer())
        .init();
    install_panic_hook();

    let templates = TemplateCache::build(&config.templates)?;

    let sessions = SessionManager::new(config.secret.as_bytes())?
        .lifetime(chrono::Duration::hours(config.session_lifetime_hours))
        .secure(!config.insecure_cookies);

    let app = Arc::new(App {
        templates,
        sessions: Arc::new(sessions),
        snippets: Arc::new(MemorySnippetStore::new()),
        users: Arc::new(MemoryUserStore::new()),
        static_dir: config.static_dir.clone(),
    });

    Server::bind(config.addr).serve(app.routes()).await?;
    Ok(())
}

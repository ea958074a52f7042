//! Command-line and environment configuration.

use std::net::SocketAddr;
use std::path::PathBuf;

use clap::Parser;

/// Snippet sharing web application.
#[derive(Parser, Debug, Clone)]
#[command(name = "snippetbox")]
#[command(about = "Paste and browse short text snippets", long_about = None)]
pub struct Config {
    /// Address to listen on.
    #[arg(long, env = "SNIPPETBOX_ADDR", default_value = "127.0.0.1:4000")]
    pub addr: SocketAddr,

    /// Secret the session signing key is derived from (at least 32 bytes).
    #[arg(long, env = "SNIPPETBOX_SECRET", hide_env_values = true)]
    pub secret: String,

    /// Directory holding `*.page.tmpl`, `*.layout.tmpl` and `*.partial.tmpl` files.
    #[arg(long, env = "SNIPPETBOX_TEMPLATES", default_value = "./ui/html")]
    pub templates: PathBuf,

    /// Directory served under `/static/`.
    #[arg(long, env = "SNIPPETBOX_STATIC_DIR", default_value = "./ui/static")]
    pub static_dir: PathBuf,

    /// Absolute session lifetime, counted from first issue.
    #[arg(long, env = "SNIPPETBOX_SESSION_LIFETIME_HOURS", default_value_t = 12)]
    pub session_lifetime_hours: i64,

    /// Omit the `Secure` cookie attribute. Only for plain-HTTP local runs;
    /// browsers will not send `Secure` cookies over HTTP.
    #[arg(long, env = "SNIPPETBOX_INSECURE_COOKIES")]
    pub insecure_cookies: bool,
}

//! Unified error type.

use crate::models::ModelError;

/// The error type returned by snippetbox's fallible operations.
///
/// HTTP-level outcomes (404, 405, redirects) are expressed as
/// [`Response`](crate::Response) values, not as `Error`s. This type surfaces
/// infrastructure and deployment failures: binding a port, loading the
/// template directory, rendering a page, or a collaborator giving up.
#[derive(Debug, thiserror::Error)]
pub enum Error {
    #[error("io: {0}")]
    Io(#[from] std::io::Error),

    #[error("template: {0}")]
    Template(#[from] minijinja::Error),

    /// A handler asked for a page the cache was never built with.
    #[error("the template {0} does not exist")]
    TemplateNotFound(String),

    #[error("template directory: {0}")]
    Walk(#[from] walkdir::Error),

    #[error("model: {0}")]
    Model(#[from] ModelError),

    #[error("config: {0}")]
    Config(String),
}

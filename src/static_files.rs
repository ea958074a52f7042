//! Passthrough file serving for `/static/{*path}`.

use std::path::{Component, Path, PathBuf};
use std::sync::Arc;

use http::StatusCode;
use tracing::warn;

use crate::handler::{Handler, with_state};
use crate::request::Request;
use crate::response::Response;

/// Serves files from one directory. Directory listings are not served.
pub struct StaticFiles {
    root: PathBuf,
}

impl StaticFiles {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    /// Route handler reading the file named by the `path` catch-all parameter.
    pub fn handler(self) -> impl Handler {
        with_state(Arc::new(self), serve)
    }

    /// Joins `rel` onto the root, refusing anything that could escape it.
    fn resolve(&self, rel: &str) -> Option<PathBuf> {
        let rel = Path::new(rel);
        let safe = rel.components().all(|c| matches!(c, Component::Normal(_)));
        (safe && !rel.as_os_str().is_empty()).then(|| self.root.join(rel))
    }
}

async fn serve(files: Arc<StaticFiles>, req: Request) -> Response {
    let Some(path) = req.param("path").and_then(|p| files.resolve(p)) else {
        return Response::status_text(StatusCode::NOT_FOUND);
    };

    match tokio::fs::metadata(&path).await {
        Ok(meta) if meta.is_file() => {}
        _ => return Response::status_text(StatusCode::NOT_FOUND),
    }

    match tokio::fs::read(&path).await {
        Ok(body) => {
            let mime = mime_guess::from_path(&path).first_or_octet_stream();
            Response::builder().bytes(mime.as_ref(), body)
        }
        Err(e) => {
            warn!(path = %path.display(), error = %e, "failed to read static file");
            Response::status_text(StatusCode::NOT_FOUND)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::Router;
    use crate::handler::ErasedHandler;
    use bytes::Bytes;
    use http::header;

    fn setup() -> (tempfile::TempDir, Router) {
        let dir = tempfile::tempdir().unwrap();
        std::fs::create_dir(dir.path().join("css")).unwrap();
        std::fs::write(dir.path().join("css/main.css"), "body{}").unwrap();
        let router = Router::new().get("/static/{*path}", StaticFiles::new(dir.path()).handler());
        (dir, router)
    }

    async fn get(router: &Router, path: &str) -> Response {
        let req = http::Request::get(path).body(Bytes::new()).unwrap();
        ErasedHandler::call(router, Request::from_http(req, None)).await
    }

    #[tokio::test]
    async fn serves_file_with_guessed_type() {
        let (_dir, router) = setup();
        let res = get(&router, "/static/css/main.css").await;
        assert_eq!(res.status_code(), StatusCode::OK);
        assert_eq!(res.header(header::CONTENT_TYPE), Some("text/css"));
        assert_eq!(res.body(), b"body{}");
    }

    #[tokio::test]
    async fn directories_and_missing_files_are_404() {
        let (_dir, router) = setup();
        assert_eq!(get(&router, "/static/css").await.status_code(), StatusCode::NOT_FOUND);
        assert_eq!(get(&router, "/static/css/").await.status_code(), StatusCode::NOT_FOUND);
        assert_eq!(get(&router, "/static/nope.js").await.status_code(), StatusCode::NOT_FOUND);
    }

    #[test]
    fn traversal_is_refused() {
        let files = StaticFiles::new("/srv/static");
        assert!(files.resolve("../secret").is_none());
        assert!(files.resolve("css/../../secret").is_none());
        assert!(files.resolve("/etc/passwd").is_none());
        assert_eq!(files.resolve("css/main.css"), Some(PathBuf::from("/srv/static/css/main.css")));
    }
}

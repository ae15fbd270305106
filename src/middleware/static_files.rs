use std::path::{Path, PathBuf};
use std::sync::Arc;

use http::Method;
use tracing::debug;

use super::{Middleware, Next};
use crate::handler::BoxFuture;
use crate::request::Request;
use crate::response::{ContentType, Response};

/// Serves files under the web root for `GET` and `HEAD`. Anything that is not
/// a regular file under the root falls through to the rest of the pipeline.
pub struct StaticFiles {
    root: Arc<PathBuf>,
}

impl StaticFiles {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: Arc::new(root.into()) }
    }
}

impl Middleware for StaticFiles {
    fn handle(&self, req: Request, next: Next) -> BoxFuture<'static, Response> {
        if req.method() != Method::GET && req.method() != Method::HEAD {
            return next.run(req);
        }
        let Some(file) = resolve(&self.root, req.path()) else {
            return next.run(req);
        };
        Box::pin(async move {
            match tokio::fs::metadata(&file).await {
                Ok(meta) if meta.is_file() => {}
                _ => return next.run(req).await,
            }
            match tokio::fs::read(&file).await {
                Ok(contents) => {
                    let content_type = file
                        .extension()
                        .and_then(|e| e.to_str())
                        .map(ContentType::from_extension)
                        .unwrap_or(ContentType::OctetStream);
                    debug!(file = %file.display(), "serving static file");
                    Response::builder().bytes(content_type, contents)
                }
                Err(e) => {
                    debug!(file = %file.display(), error = %e, "static file unreadable");
                    next.run(req).await
                }
            }
        })
    }
}

/// Maps a request path onto the web root. `None` for the root itself and for
/// any path that tries to leave the root.
fn resolve(root: &Path, path: &str) -> Option<PathBuf> {
    let mut file = root.to_path_buf();
    let mut segments = 0;
    for segment in path.split('/').filter(|s| !s.is_empty()) {
        if segment == "." || segment == ".." || segment.contains(['\\', '\0', ':']) {
            return None;
        }
        file.push(segment);
        segments += 1;
    }
    (segments > 0).then_some(file)
}

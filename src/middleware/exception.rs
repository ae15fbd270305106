//! Error-handling stages.
//!
//! Both stages run the rest of the pipeline on its own task so a panicking
//! handler surfaces as a `JoinError` instead of tearing down the connection.
//! A failure is either a panic or a `5xx` response carrying a diagnostic
//! (see [`Response::internal_error`]).

use std::sync::Arc;

use http::StatusCode;
use tracing::error;

use super::{Middleware, Next};
use crate::handler::BoxFuture;
use crate::request::Request;
use crate::response::Response;

/// Outcome of running the downstream pipeline.
enum Outcome {
    Ok(Response),
    Failed { detail: String },
}

async fn run_guarded(req: Request, next: Next) -> Outcome {
    let method = req.method().clone();
    let path = req.path().to_owned();
    match tokio::spawn(next.run(req)).await {
        Ok(mut res) if res.status_code().is_server_error() => match res.diagnostic.take() {
            Some(detail) => {
                error!(%method, %path, %detail, "request failed");
                Outcome::Failed { detail }
            }
            None => Outcome::Ok(res),
        },
        Ok(res) => Outcome::Ok(res),
        Err(e) => {
            let detail = if e.is_panic() {
                panic_message(e.into_panic())
            } else {
                "request task was cancelled".to_owned()
            };
            error!(%method, %path, %detail, "request panicked");
            Outcome::Failed { detail }
        }
    }
}

fn panic_message(payload: Box<dyn std::any::Any + Send>) -> String {
    match payload.downcast::<String>() {
        Ok(s) => *s,
        Err(payload) => match payload.downcast::<&'static str>() {
            Ok(s) => (*s).to_owned(),
            Err(_) => "handler panicked".to_owned(),
        },
    }
}

/// Development: answers failures with a plain-text page showing the detail.
pub struct DeveloperExceptionPage;

impl Middleware for DeveloperExceptionPage {
    fn handle(&self, req: Request, next: Next) -> BoxFuture<'static, Response> {
        Box::pin(async move {
            match run_guarded(req, next).await {
                Outcome::Ok(res) => res,
                Outcome::Failed { detail } => Response::builder()
                    .status(StatusCode::INTERNAL_SERVER_ERROR)
                    .text(format!(
                        "An unhandled exception occurred while processing the request.\n\n{detail}\n"
                    )),
            }
        })
    }
}

/// Production: redirects failures to a generic error page.
pub struct ExceptionHandler {
    error_path: Arc<str>,
}

impl ExceptionHandler {
    pub fn new(error_path: &str) -> Self {
        Self { error_path: error_path.into() }
    }
}

impl Middleware for ExceptionHandler {
    fn handle(&self, req: Request, next: Next) -> BoxFuture<'static, Response> {
        let error_path = Arc::clone(&self.error_path);
        Box::pin(async move {
            // The error page itself failing must not loop.
            let is_error_page = req.path() == &*error_path;
            match run_guarded(req, next).await {
                Outcome::Ok(res) => res,
                Outcome::Failed { .. } if is_error_page => {
                    Response::builder()
                        .status(StatusCode::INTERNAL_SERVER_ERROR)
                        .text("An error occurred while processing your request.")
                }
                Outcome::Failed { .. } => Response::redirect(&error_path),
            }
        })
    }
}

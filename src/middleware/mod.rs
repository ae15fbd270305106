//! Middleware pipeline.
//!
//! Middleware intercepts requests and responses and is the right place for
//! cross-cutting concerns. The built-in stages run in one fixed order:
//!
//! | # | Stage | What it does |
//! |---|---|---|
//! | 0 | [`Stage::Trace`] | per-request span with method, path, status, latency |
//! | 1 | [`Stage::DeveloperExceptionPage`] / [`Stage::ExceptionHandler`] | turns panics and handler errors into a diagnostic page or a redirect to the error page |
//! | 2 | [`Stage::Hsts`] | `strict-transport-security` on HTTPS responses |
//! | 3 | [`Stage::HttpsRedirection`] | `307` from `http://` to `https://` |
//! | 4 | [`Stage::StaticFiles`] | serves the web root |
//! | 5 | [`Stage::Routing`] | resolves the endpoint |
//! | 6 | [`Stage::Session`] | loads and saves the session |
//! | 7 | [`Stage::Authorization`] | enforces the endpoint's policy |
//!
//! Every stage is optional, but the ones that are registered must appear in
//! this order and at most once. Session state feeds authorization decisions,
//! so a session stage registered after authorization, or twice, is rejected
//! by [`PipelineBuilder::build`].
//!
//! Routes are mapped onto a built [`Pipeline`] with
//! [`Pipeline::map_routes`], which yields the servable [`App`].

mod authorization;
mod exception;
mod routing;
mod session;
mod static_files;
mod trace;
mod transport;

use std::fmt;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use http::{Extensions, StatusCode};
use thiserror::Error;

use crate::handler::BoxFuture;
use crate::identity::IdentityStore;
use crate::request::Request;
use crate::response::Response;
use crate::router::{RouteError, Router};
use crate::session::{SessionOptions, SessionStore};

pub use authorization::Authorization;
pub use exception::{DeveloperExceptionPage, ExceptionHandler};
pub use routing::Routing;
pub use session::SessionMiddleware;
pub use static_files::StaticFiles;
pub use trace::Trace;
pub use transport::{Hsts, HttpsRedirection};

/// A unit of request processing that may call the rest of the pipeline.
///
/// Implementations clone whatever shared state they need into the returned
/// future; it must not borrow `self`.
pub trait Middleware: Send + Sync + 'static {
    fn handle(&self, req: Request, next: Next) -> BoxFuture<'static, Response>;
}

/// Pipeline position of a middleware.
#[derive(Clone, Copy, Debug, Eq, Hash, PartialEq)]
pub enum Stage {
    Trace,
    DeveloperExceptionPage,
    ExceptionHandler,
    Hsts,
    HttpsRedirection,
    StaticFiles,
    Routing,
    Session,
    Authorization,
}

impl Stage {
    /// Relative order. Both error-handling stages share a slot: only one of
    /// them may be installed.
    fn rank(self) -> u8 {
        match self {
            Self::Trace                                          => 0,
            Self::DeveloperExceptionPage | Self::ExceptionHandler => 1,
            Self::Hsts                                           => 2,
            Self::HttpsRedirection                               => 3,
            Self::StaticFiles                                    => 4,
            Self::Routing                                        => 5,
            Self::Session                                        => 6,
            Self::Authorization                                  => 7,
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            Self::Trace                  => "trace",
            Self::DeveloperExceptionPage => "developer-exception-page",
            Self::ExceptionHandler       => "exception-handler",
            Self::Hsts                   => "hsts",
            Self::HttpsRedirection       => "https-redirection",
            Self::StaticFiles            => "static-files",
            Self::Routing                => "routing",
            Self::Session                => "session",
            Self::Authorization          => "authorization",
        }
    }
}

impl fmt::Display for Stage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Invalid pipeline composition. Fatal at startup.
#[derive(Debug, Error, PartialEq)]
pub enum PipelineError {
    #[error("middleware `{0}` registered more than once")]
    Duplicate(Stage),

    #[error("middleware `{stage}` must be registered before `{after}`")]
    OutOfOrder { stage: Stage, after: Stage },

    #[error("middleware `{stage}` requires `{requires}` earlier in the pipeline")]
    Missing { stage: Stage, requires: Stage },
}

// ── Builder ───────────────────────────────────────────────────────────────────

struct Registration {
    stage: Stage,
    middleware: Arc<dyn Middleware>,
}

impl fmt::Debug for Registration {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_tuple("Registration").field(&self.stage).finish()
    }
}

/// Assembles the pipeline in order. The first mistake is remembered and
/// reported by [`build`](PipelineBuilder::build).
#[derive(Debug, Default)]
pub struct PipelineBuilder {
    stages: Vec<Registration>,
    error: Option<PipelineError>,
}

impl PipelineBuilder {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn use_trace(self) -> Self {
        self.push(Stage::Trace, Trace)
    }

    pub fn use_developer_exception_page(self) -> Self {
        self.push(Stage::DeveloperExceptionPage, DeveloperExceptionPage)
    }

    /// Redirects failed requests to `error_path` without exposing detail.
    pub fn use_exception_handler(self, error_path: &str) -> Self {
        self.push(Stage::ExceptionHandler, ExceptionHandler::new(error_path))
    }

    pub fn use_hsts(self, max_age: Duration) -> Self {
        self.push(Stage::Hsts, Hsts::new(max_age))
    }

    pub fn use_https_redirection(self) -> Self {
        self.push(Stage::HttpsRedirection, HttpsRedirection)
    }

    pub fn use_static_files(self, root: impl Into<PathBuf>) -> Self {
        self.push(Stage::StaticFiles, StaticFiles::new(root))
    }

    pub fn use_routing(self) -> Self {
        self.push(Stage::Routing, Routing)
    }

    pub fn use_session(self, options: SessionOptions, store: Arc<dyn SessionStore>) -> Self {
        self.push(Stage::Session, SessionMiddleware::new(options, store))
    }

    /// `login_path` receives anonymous users who hit a protected endpoint.
    pub fn use_authorization(self, identity: Arc<dyn IdentityStore>, login_path: &str) -> Self {
        self.push(Stage::Authorization, Authorization::new(identity, login_path))
    }

    /// Registers `middleware` at `stage`, checking the ordering rules.
    pub fn push(mut self, stage: Stage, middleware: impl Middleware) -> Self {
        if self.error.is_some() {
            return self;
        }
        if let Err(e) = self.check(stage) {
            self.error = Some(e);
            return self;
        }
        self.stages.push(Registration { stage, middleware: Arc::new(middleware) });
        self
    }

    fn check(&self, stage: Stage) -> Result<(), PipelineError> {
        for existing in &self.stages {
            if existing.stage.rank() == stage.rank() {
                return Err(PipelineError::Duplicate(stage));
            }
            if existing.stage.rank() > stage.rank() {
                return Err(PipelineError::OutOfOrder { stage, after: existing.stage });
            }
        }
        if stage == Stage::Authorization && !self.stages.iter().any(|r| r.stage == Stage::Routing) {
            return Err(PipelineError::Missing { stage, requires: Stage::Routing });
        }
        Ok(())
    }

    pub fn build(self) -> Result<Pipeline, PipelineError> {
        match self.error {
            Some(e) => Err(e),
            None => Ok(Pipeline { stages: self.stages }),
        }
    }
}

// ── Pipeline ──────────────────────────────────────────────────────────────────

/// An assembled, validated middleware pipeline without routes.
#[derive(Debug)]
pub struct Pipeline {
    stages: Vec<Registration>,
}

impl Pipeline {
    pub fn builder() -> PipelineBuilder {
        PipelineBuilder::new()
    }

    /// Registered stages in execution order.
    pub fn stages(&self) -> Vec<Stage> {
        self.stages.iter().map(|r| r.stage).collect()
    }

    /// Registration index of `stage`, if installed.
    pub fn position(&self, stage: Stage) -> Option<usize> {
        self.stages.iter().position(|r| r.stage == stage)
    }

    /// Attaches the route table and produces a servable [`App`].
    pub fn map_routes(self, router: Router) -> Result<App, RouteError> {
        let router = router.check()?;
        Ok(App {
            chain: Arc::new(Chain { stages: self.stages, router }),
            state: Extensions::new(),
        })
    }
}

// ── App ───────────────────────────────────────────────────────────────────────

struct Chain {
    stages: Vec<Registration>,
    router: Router,
}

/// A pipeline with its routes: the request handler the server drives.
pub struct App {
    chain: Arc<Chain>,
    state: Extensions,
}

impl fmt::Debug for App {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("App")
            .field("stages", &self.stages())
            .field("routes", &self.chain.router.len())
            .finish()
    }
}

impl App {
    /// Makes `value` available to every request through
    /// [`Request::extensions`].
    pub fn with_state<T: Clone + Send + Sync + 'static>(mut self, value: T) -> Self {
        self.state.insert(value);
        self
    }

    pub fn stages(&self) -> Vec<Stage> {
        self.chain.stages.iter().map(|r| r.stage).collect()
    }

    pub fn position(&self, stage: Stage) -> Option<usize> {
        self.chain.stages.iter().position(|r| r.stage == stage)
    }

    /// Runs one request through the pipeline.
    pub fn handle(&self, mut req: Request) -> BoxFuture<'static, Response> {
        req.extensions_mut().extend(self.state.clone());
        Next { chain: Arc::clone(&self.chain), index: 0 }.run(req)
    }
}

/// The remainder of the pipeline after the current middleware.
pub struct Next {
    chain: Arc<Chain>,
    index: usize,
}

impl Next {
    /// Passes `req` to the next stage, or to the endpoint after the last one.
    pub fn run(self, req: Request) -> BoxFuture<'static, Response> {
        match self.chain.stages.get(self.index) {
            Some(registration) => {
                let middleware = Arc::clone(&registration.middleware);
                let next = Next { chain: Arc::clone(&self.chain), index: self.index + 1 };
                middleware.handle(req, next)
            }
            None => endpoint(req),
        }
    }

    pub(crate) fn router(&self) -> &Router {
        &self.chain.router
    }
}

/// End of the pipeline: call the endpoint routing resolved, or 404.
fn endpoint(req: Request) -> BoxFuture<'static, Response> {
    match req.endpoint().map(|e| Arc::clone(&e.handler)) {
        Some(handler) => handler.call(req),
        None => Box::pin(async { Response::status(StatusCode::NOT_FOUND) }),
    }
}

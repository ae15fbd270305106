//! # asc-web
//!
//! Web host for the Automobile Service Center site.
//!
//! Two pieces carry the weight:
//!
//! - **Typed session values.** [`set_session`] / [`get_session`] store any
//!   serde value in the per-request [`Session`] as UTF-8 JSON. A missing key
//!   is `Ok(None)`; bytes that no longer decode are a distinct
//!   [`SessionError`] that callers recover from locally.
//! - **Ordered, fail-fast startup.** [`Bootstrap`] loads configuration,
//!   registers persistence, identity and application services, assembles the
//!   middleware pipeline, maps routes, migrates, seeds and finally serves.
//!   Any failure stops startup.
//!
//! Around them sits a small HTTP host on hyper: a radix-tree [`Router`] with
//! conventional controller routes, an ordered middleware
//! [`Pipeline`](middleware::Pipeline), and graceful shutdown on SIGTERM /
//! Ctrl-C. TLS, rate limiting and body-size limits are left to the reverse
//! proxy in front of the process.
//!
//! ## Quick start
//!
//! ```rust,no_run
//! use asc_web::{Bootstrap, ConfigSource};
//!
//! #[tokio::main]
//! async fn main() {
//!     let source = ConfigSource::from_env(".");
//!     if let Err(e) = Bootstrap::new(source).run().await {
//!         eprintln!("startup failed: {e}");
//!         std::process::exit(1);
//!     }
//! }
//! ```
//!
//! ## Handlers
//!
//! ```rust
//! use asc_web::{Request, Response, get_session, set_session};
//!
//! async fn visits(req: Request) -> Response {
//!     let Some(session) = req.session() else {
//!         return Response::text("sessions are off");
//!     };
//!     let count = get_session::<u32, _>(session, "visits").ok().flatten().unwrap_or(0) + 1;
//!     if let Err(e) = set_session(session, "visits", &count) {
//!         return Response::internal_error(e.to_string());
//!     }
//!     Response::text(count.to_string())
//! }
//! ```

mod error;
mod handler;
mod request;
mod response;
mod router;
mod server;
mod services;

pub mod bootstrap;
pub mod config;
pub mod identity;
pub mod middleware;
pub mod notify;
pub mod persistence;
pub mod seed;
pub mod session;
pub mod web;

pub use bootstrap::{Application, Bootstrap, BootstrapError, BootstrapLog, Phase, Step};
pub use config::{AppConfig, ApplicationSettings, ConfigError, ConfigSource, Environment};
pub use error::Error;
pub use handler::{BoxFuture, Handler};
pub use middleware::App;
pub use request::Request;
pub use response::{ContentType, IntoResponse, Response, ResponseBuilder};
pub use router::{Endpoint, Policy, RouteError, RouteTemplate, Router};
pub use server::Server;
pub use services::Services;
pub use session::{Session, SessionError, SessionValues, get_session, set_session};

use std::time::Instant;

use tracing::{Instrument, info, info_span};

use super::{Middleware, Next};
use crate::handler::BoxFuture;
use crate::request::Request;
use crate::response::Response;

/// Per-request span with method, path, status and latency.
pub struct Trace;

impl Middleware for Trace {
    fn handle(&self, req: Request, next: Next) -> BoxFuture<'static, Response> {
        let span = info_span!("request", method = %req.method(), path = %req.path());
        Box::pin(
            async move {
                let started = Instant::now();
                let res = next.run(req).await;
                info!(
                    status = res.status_code().as_u16(),
                    latency_ms = started.elapsed().as_millis() as u64,
                    "request finished"
                );
                res
            }
            .instrument(span),
        )
    }
}

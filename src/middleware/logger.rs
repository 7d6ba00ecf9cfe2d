//! Request start/finish logging middleware.

use std::time::Instant;

use tracing::debug;

use crate::handler::BoxFuture;
use crate::middleware::{Middleware, Next};
use crate::request::Request;

/// Logs the start and the outcome of every request it sees.
///
/// The start record carries method, path (or the configured tag), protocol,
/// sender, and agent; the finish record carries the response status and the
/// elapsed time. The status is read directly off the returned
/// [`Response`](crate::Response) — no response-writer shim is needed.
pub struct Logger {
    tag: Option<String>,
}

impl Logger {
    pub fn new() -> Self {
        Self { tag: None }
    }

    /// Replaces the logged method/path pair with a fixed tag.
    pub fn tag(mut self, tag: impl Into<String>) -> Self {
        self.tag = Some(tag.into());
        self
    }
}

impl Default for Logger {
    fn default() -> Self {
        Self::new()
    }
}

impl Middleware for Logger {
    fn handle(&self, req: Request, next: Next) -> BoxFuture {
        let tag = self.tag.clone();
        let method = req.method().clone();
        let path = req.path().to_owned();
        let proto = format!("{:?}", req.version());
        let sender = req.remote_addr();
        let agent = req.user_agent().to_owned();

        Box::pin(async move {
            let start = Instant::now();

            match &tag {
                Some(tag) => debug!(%tag, %method, proto, %sender, agent, "rest api >"),
                None => debug!(%method, path, proto, %sender, agent, "rest api >"),
            }

            let response = next.run(req).await;

            let status = response.status_code().as_u16();
            let elapsed = start.elapsed();
            match &tag {
                Some(tag) => debug!(%tag, status, %method, %sender, ?elapsed, "rest api <"),
                None => debug!(%method, path, status, %sender, ?elapsed, "rest api <"),
            }

            response
        })
    }
}

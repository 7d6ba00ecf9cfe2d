//! Observational redirect-notice middleware.

use std::sync::Arc;

use crate::handler::BoxFuture;
use crate::middleware::{Middleware, Next};
use crate::request::Request;

/// Invokes a redirect observer for every request, then still delegates.
///
/// The observer is side-effecting only (e.g. forwarding a copy of the call
/// to a leader node); it cannot block or replace the local processing of
/// the request. Use a [`Gatekeeper`](crate::middleware::Gatekeeper) when the
/// request must not reach the local handler.
pub struct RedirectNotice {
    observer: Arc<dyn Fn(&Request) + Send + Sync>,
}

impl RedirectNotice {
    pub fn new(observer: impl Fn(&Request) + Send + Sync + 'static) -> Self {
        Self { observer: Arc::new(observer) }
    }
}

impl Middleware for RedirectNotice {
    fn handle(&self, req: Request, next: Next) -> BoxFuture {
        (self.observer)(&req);
        next.run(req)
    }
}

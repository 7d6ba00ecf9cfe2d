//! Panic-recovery middleware.

use std::any::Any;
use std::panic::AssertUnwindSafe;
use std::sync::Arc;

use futures_util::FutureExt;
use http::StatusCode;
use tracing::error;

use crate::handler::BoxFuture;
use crate::middleware::{Middleware, Next};
use crate::request::Request;
use crate::response::Response;

/// Converts panics in downstream stages and handlers into responses.
///
/// Delegation is wrapped in `catch_unwind`, so the recovery callback runs on
/// every abnormal exit path of the delegate; a normal return passes the
/// response through untouched. Without this guard a panicking handler tears
/// down its connection task and the client sees a reset instead of a reply.
pub struct CrashGuard {
    recover: Arc<dyn Fn() -> Response + Send + Sync>,
}

impl CrashGuard {
    /// Creates a guard with a custom recovery callback producing the
    /// response sent after a panic.
    pub fn new(recover: impl Fn() -> Response + Send + Sync + 'static) -> Self {
        Self { recover: Arc::new(recover) }
    }
}

impl Default for CrashGuard {
    /// Recovers with `500` and a fixed JSON error body.
    fn default() -> Self {
        Self::new(|| {
            Response::builder()
                .status(StatusCode::INTERNAL_SERVER_ERROR)
                .json(br#"{"Error": "internal server error"}"#.to_vec())
        })
    }
}

impl Middleware for CrashGuard {
    fn handle(&self, req: Request, next: Next) -> BoxFuture {
        let recover = Arc::clone(&self.recover);

        Box::pin(async move {
            match AssertUnwindSafe(next.run(req)).catch_unwind().await {
                Ok(response) => response,
                Err(panic) => {
                    error!("request handler panicked: {}", panic_message(&panic));
                    recover()
                }
            }
        })
    }
}

fn panic_message(panic: &(dyn Any + Send)) -> &str {
    if let Some(s) = panic.downcast_ref::<&str>() {
        s
    } else if let Some(s) = panic.downcast_ref::<String>() {
        s
    } else {
        "<non-string panic payload>"
    }
}

//! Service call counter middleware.

use std::sync::Arc;

use crate::handler::BoxFuture;
use crate::middleware::{Middleware, Next};
use crate::request::Request;

/// Invokes a counter callback for every request, then delegates
/// unconditionally.
///
/// The callback typically increments a metric; it must be cheap, since it
/// runs on the hot path before any other processing.
pub struct CallCounter {
    counter: Arc<dyn Fn() + Send + Sync>,
}

impl CallCounter {
    pub fn new(counter: impl Fn() + Send + Sync + 'static) -> Self {
        Self { counter: Arc::new(counter) }
    }
}

impl Middleware for CallCounter {
    fn handle(&self, req: Request, next: Next) -> BoxFuture {
        (self.counter)();
        next.run(req)
    }
}

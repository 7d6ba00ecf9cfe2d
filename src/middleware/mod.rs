//! Middleware layer.
//!
//! Middleware intercepts requests on their way to the terminal handler and
//! is the place for cross-cutting concerns: request logging, call counting,
//! admission control, panic recovery.
//!
//! # Execution contract
//!
//! Each middleware receives the [`Request`] and a [`Next`] continuation
//! representing the rest of the chain. It either:
//!
//! - **delegates** by awaiting `next.run(req)` and (optionally) inspecting
//!   the returned [`Response`], or
//! - **short-circuits** by returning a terminal [`Response`] without ever
//!   calling `next.run` (e.g. a gatekeeper rejection).
//!
//! A middleware that produces a terminal response must not also delegate —
//! returning without delegation *is* the short-circuit mechanism.
//!
//! Built-in middleware: [`Logger`], [`CallCounter`], [`Gatekeeper`],
//! [`CrashGuard`], [`RedirectNotice`].

mod counter;
mod crash;
mod gatekeeper;
mod logger;
mod redirect;

pub use counter::CallCounter;
pub use crash::CrashGuard;
pub use gatekeeper::Gatekeeper;
pub use logger::Logger;
pub use redirect::RedirectNotice;

use std::future::Future;
use std::sync::Arc;

use crate::handler::{BoxFuture, BoxedHandler};
use crate::request::Request;
use crate::response::Response;

/// A middleware stage in a dispatch chain.
///
/// Registered instances are shared (`Arc`) across all routes and requests
/// and must therefore be internally immutable or synchronise their own
/// state.
pub trait Middleware: Send + Sync + 'static {
    fn handle(&self, req: Request, next: Next) -> BoxFuture;
}

/// A shared, type-erased middleware as stored in the registry.
pub type SharedMiddleware = Arc<dyn Middleware>;

/// Adapts a plain async closure into a [`Middleware`].
///
/// ```rust
/// use plinth::middleware::{from_fn, Next};
/// use plinth::Request;
///
/// let mw = from_fn(|req: Request, next: Next| async move {
///     // pre-processing here
///     next.run(req).await
/// });
/// ```
pub fn from_fn<F, Fut>(f: F) -> impl Middleware
where
    F: Fn(Request, Next) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = Response> + Send + 'static,
{
    FnMiddleware(f)
}

struct FnMiddleware<F>(F);

impl<F, Fut> Middleware for FnMiddleware<F>
where
    F: Fn(Request, Next) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = Response> + Send + 'static,
{
    fn handle(&self, req: Request, next: Next) -> BoxFuture {
        Box::pin((self.0)(req, next))
    }
}

/// The continuation handed to a middleware: the remaining stages of the
/// chain plus the terminal handler.
///
/// `Next` is cheap to construct and fully owned, so a middleware may move it
/// into a spawned task or wrap its execution (the crash guard does exactly
/// that).
pub struct Next {
    stack: Arc<[SharedMiddleware]>,
    index: usize,
    terminal: BoxedHandler,
}

impl Next {
    pub(crate) fn chain(stack: Arc<[SharedMiddleware]>, terminal: BoxedHandler) -> Self {
        Self { stack, index: 0, terminal }
    }

    /// Runs the rest of the chain to completion.
    pub fn run(mut self, req: Request) -> BoxFuture {
        match self.stack.get(self.index) {
            Some(stage) => {
                let stage = Arc::clone(stage);
                self.index += 1;
                stage.handle(req, self)
            }
            None => self.terminal.call(req),
        }
    }
}

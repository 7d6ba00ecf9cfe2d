//! Route descriptors and the route table.
//!
//! A [`Route`] is a named (method, path, handler) triple plus per-route
//! middleware overrides. Routes are grouped under a URL prefix (the outer
//! namespace, e.g. `"v1/order"`) in a [`RouteTable`] and handed to
//! [`ServiceFactory::make`](crate::ServiceFactory::make), which consumes the
//! table — there is no shared mutable route state after composition.

use std::collections::HashMap;
use std::path::PathBuf;

use http::Method;

use crate::handler::{BoxedHandler, Handler};

/// Mapping from URL prefix to the routes registered under it.
///
/// Iteration order over prefixes is not guaranteed. Within a prefix the
/// registration order is preserved; it determines router insertion order
/// only, not dispatch precedence.
pub type RouteTable = HashMap<String, Vec<Route>>;

/// What a matched route resolves to.
pub(crate) enum RouteKind {
    /// A terminal request handler.
    Handler(BoxedHandler),
    /// A static directory mounted under the route path.
    ///
    /// Static routes run only the always-tier middleware; the default and
    /// available tiers do not apply to file serving.
    StaticDir(PathBuf),
}

/// A REST API endpoint descriptor.
///
/// The HTTP method is optional and defaults to `GET` at composition time.
///
/// ```rust,no_run
/// use http::Method;
/// use plinth::{Request, Response, Route};
///
/// # async fn create_order(_req: Request) -> Response { Response::text("") }
/// let route = Route::new("CreateOrder", "create", create_order)
///     .method(Method::POST)
///     .include("middleware:requestIsAuthorized")
///     .exclude("middleware:logger");
/// ```
pub struct Route {
    pub(crate) name: String,
    pub(crate) method: Option<Method>,
    pub(crate) path: String,
    pub(crate) kind: RouteKind,
    pub(crate) include: Vec<String>,
    pub(crate) exclude: Vec<String>,
}

impl Route {
    /// Creates a route with a terminal handler. The method defaults to `GET`
    /// unless overridden with [`Route::method`].
    pub fn new(name: impl Into<String>, path: impl Into<String>, handler: impl Handler) -> Self {
        Self {
            name: name.into(),
            method: None,
            path: path.into(),
            kind: RouteKind::Handler(handler.into_boxed_handler()),
            include: Vec::new(),
            exclude: Vec::new(),
        }
    }

    /// Creates a route that serves files from `dir` under the route path.
    pub fn static_dir(
        name: impl Into<String>,
        path: impl Into<String>,
        dir: impl Into<PathBuf>,
    ) -> Self {
        Self {
            name: name.into(),
            method: None,
            path: path.into(),
            kind: RouteKind::StaticDir(dir.into()),
            include: Vec::new(),
            exclude: Vec::new(),
        }
    }

    /// Sets the accepted HTTP method.
    pub fn method(mut self, method: Method) -> Self {
        self.method = Some(method);
        self
    }

    /// Requests an available-tier middleware by name for this route.
    pub fn include(mut self, name: impl Into<String>) -> Self {
        self.include.push(name.into());
        self
    }

    /// Excludes a default-tier middleware by name for this route.
    pub fn exclude(mut self, name: impl Into<String>) -> Self {
        self.exclude.push(name.into());
        self
    }

    /// The route name.
    pub fn name(&self) -> &str {
        &self.name
    }

    /// The normalized method: `GET` when none was set.
    pub(crate) fn effective_method(&self) -> Method {
        self.method.clone().unwrap_or(Method::GET)
    }
}

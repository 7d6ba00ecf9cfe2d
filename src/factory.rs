//! Service factory: tiered middleware registry and dispatch composition.
//!
//! The factory holds named middleware in three tiers and turns a
//! [`RouteTable`] into a single composed [`Service`] that the
//! [`Server`](crate::Server) dispatches through:
//!
//! - **always** — applied to every request without exception, including the
//!   not-found fallback and static routes.
//! - **default** — applied to every route unless the route excludes it by
//!   name.
//! - **available** — applied only to routes that include it by name.
//!
//! Tiers preserve **registration order**; the composed chain for a route is
//! always-tier, then default-tier, then included middleware, then the
//! terminal handler. Re-registering a name in a tier overwrites the
//! middleware in place (last registration wins, original position kept).
//!
//! Registration is build-then-freeze: [`ServiceFactory::make`] consumes the
//! factory, and the resulting [`Service`] is immutable — concurrent reads
//! during dispatch need no further synchronisation.

use std::collections::{HashMap, HashSet};
use std::convert::Infallible;
use std::net::SocketAddr;
use std::path::{Component, Path, PathBuf};
use std::sync::Arc;

use bytes::Bytes;
use http::{Method, StatusCode};
use http_body_util::{BodyExt, Full};
use matchit::Router;
use tracing::{debug, error, warn};

use crate::error::Error;
use crate::handler::{BoxFuture, BoxedHandler, Handler};
use crate::middleware::{Middleware, Next, SharedMiddleware};
use crate::request::Request;
use crate::response::Response;
use crate::route::{Route, RouteKind, RouteTable};

/// One middleware tier: named entries in registration order.
struct Tier {
    entries: Vec<(String, SharedMiddleware)>,
}

impl Tier {
    fn new() -> Self {
        Self { entries: Vec::new() }
    }

    /// Registers `mw` under `name`. A repeated name overwrites the stored
    /// middleware without moving it in the order.
    fn register(&mut self, name: String, mw: SharedMiddleware) {
        match self.entries.iter_mut().find(|(n, _)| *n == name) {
            Some(entry) => entry.1 = mw,
            None => self.entries.push((name, mw)),
        }
    }

    fn contains(&self, name: &str) -> bool {
        self.entries.iter().any(|(n, _)| n == name)
    }

    fn get(&self, name: &str) -> Option<&SharedMiddleware> {
        self.entries.iter().find(|(n, _)| n == name).map(|(_, mw)| mw)
    }

    fn iter(&self) -> impl Iterator<Item = &(String, SharedMiddleware)> {
        self.entries.iter()
    }
}

/// Registry of named middleware plus the composition entry point.
///
/// ```rust,no_run
/// use plinth::middleware::Logger;
/// use plinth::{Route, ServiceFactory};
/// # use plinth::{Request, Response};
/// # async fn health(_req: Request) -> Response { Response::text("") }
///
/// let mut factory = ServiceFactory::new();
/// factory.default("middleware:logger", Logger::new());
///
/// let mut routes = plinth::RouteTable::new();
/// routes.insert("v1".to_owned(), vec![Route::new("HealthCheck", "healthcheck", health)]);
///
/// let service = factory.make(routes).unwrap();
/// ```
pub struct ServiceFactory {
    always: Tier,
    defaults: Tier,
    available: Tier,
}

impl ServiceFactory {
    pub fn new() -> Self {
        Self { always: Tier::new(), defaults: Tier::new(), available: Tier::new() }
    }

    /// Registers middleware applied to every request without exception.
    pub fn always(&mut self, name: impl Into<String>, mw: impl Middleware) {
        self.always.register(name.into(), Arc::new(mw));
    }

    /// Registers middleware applied to every route unless excluded by name.
    pub fn default(&mut self, name: impl Into<String>, mw: impl Middleware) {
        self.defaults.register(name.into(), Arc::new(mw));
    }

    /// Registers middleware applied only to routes that include it by name.
    pub fn available(&mut self, name: impl Into<String>, mw: impl Middleware) {
        self.available.register(name.into(), Arc::new(mw));
    }

    /// Composes the route table into a single dispatchable [`Service`].
    ///
    /// Any construction failure (malformed prefix or path, duplicate
    /// registration) aborts the whole composition — no partially registered
    /// service is ever returned. Per-route middleware resolution problems
    /// (include/exclude conflicts, unregistered names) are logged and the
    /// offending middleware is skipped; the route is still registered.
    pub fn make(self, table: RouteTable) -> Result<Service, Error> {
        let always: Arc<[SharedMiddleware]> =
            self.always.iter().map(|(_, mw)| Arc::clone(mw)).collect();

        let mut routes: HashMap<Method, Router<Chain>> = HashMap::new();
        let fallback = Chain::new(Arc::clone(&always), not_found.into_boxed_handler());

        for (prefix, prefix_routes) in table {
            // Index/listing endpoint for the prefix namespace. Explicitly
            // unimplemented rather than silently succeeding.
            insert(
                &mut routes,
                Method::GET,
                &prefix,
                "",
                Chain::new(Arc::clone(&always), api_listing.into_boxed_handler()),
            )?;

            for route in prefix_routes {
                let method = route.effective_method();
                let chain = self.compose(&always, &route);

                match route.kind {
                    RouteKind::Handler(_) => {
                        insert(&mut routes, method, &prefix, &route.path, chain)?;
                    }
                    RouteKind::StaticDir(_) => {
                        let path = format!("{}/{{*file}}", route.path);
                        insert(&mut routes, Method::GET, &prefix, &path, chain)?;
                    }
                }
            }
        }

        Ok(Service { routes, fallback })
    }

    /// Resolves the effective middleware chain for one route.
    fn compose(&self, always: &Arc<[SharedMiddleware]>, route: &Route) -> Chain {
        let terminal = match &route.kind {
            RouteKind::Handler(handler) => Arc::clone(handler),
            // Static routes bypass the default and available tiers; only the
            // always chain wraps file serving.
            RouteKind::StaticDir(dir) => {
                return Chain::new(Arc::clone(always), static_handler(dir.clone()));
            }
        };

        let excluded: HashSet<&str> = route.exclude.iter().map(String::as_str).collect();

        let mut stack: Vec<SharedMiddleware> = always.iter().map(Arc::clone).collect();

        for (name, mw) in self.defaults.iter() {
            if !excluded.contains(name.as_str()) {
                stack.push(Arc::clone(mw));
            }
        }

        for name in &route.include {
            if excluded.contains(name.as_str()) {
                error!(
                    route = route.name.as_str(),
                    "middleware [{name}] is present in <include> and <exclude> list, skipping"
                );
                continue;
            }

            if self.always.contains(name) {
                warn!(route = route.name.as_str(), "middleware [{name}] is unconditionally included, skipping");
                continue;
            }

            if self.defaults.contains(name) {
                warn!(route = route.name.as_str(), "middleware [{name}] is included by default, skipping");
                continue;
            }

            match self.available.get(name) {
                Some(mw) => stack.push(Arc::clone(mw)),
                None => {
                    error!(route = route.name.as_str(), "middleware [{name}] is not registered, skipping");
                }
            }
        }

        Chain::new(stack.into(), terminal)
    }
}

impl Default for ServiceFactory {
    fn default() -> Self {
        Self::new()
    }
}

fn insert(
    routes: &mut HashMap<Method, Router<Chain>>,
    method: Method,
    prefix: &str,
    path: &str,
    chain: Chain,
) -> Result<(), Error> {
    let full = format!("/{}/{}", prefix.trim_matches('/'), path);
    routes
        .entry(method)
        .or_default()
        .insert(&full, chain)
        .map_err(|source| Error::Route {
            prefix: prefix.to_owned(),
            path: path.to_owned(),
            source,
        })
}

// ── Composed service ──────────────────────────────────────────────────────────

/// A fully composed dispatch chain: middleware stack plus terminal handler.
#[derive(Clone)]
struct Chain {
    stack: Arc<[SharedMiddleware]>,
    terminal: BoxedHandler,
}

impl Chain {
    fn new(stack: Arc<[SharedMiddleware]>, terminal: BoxedHandler) -> Self {
        Self { stack, terminal }
    }

    fn run(&self, req: Request) -> BoxFuture {
        Next::chain(Arc::clone(&self.stack), Arc::clone(&self.terminal)).run(req)
    }
}

/// The composed request handler produced by [`ServiceFactory::make`].
///
/// One radix tree per HTTP method; unmatched requests fall through to the
/// not-found chain. The service is immutable and shared across connection
/// tasks by the [`Server`](crate::Server).
pub struct Service {
    routes: HashMap<Method, Router<Chain>>,
    fallback: Chain,
}

impl Service {
    /// Runs one buffered request through the matching chain.
    pub(crate) fn handle(
        &self,
        parts: http::request::Parts,
        body: Bytes,
        remote_addr: SocketAddr,
    ) -> BoxFuture {
        let (chain, params) = self.lookup(&parts.method, parts.uri.path());
        chain.run(Request::new(parts, body, params, remote_addr))
    }

    /// Hyper entry point: buffers the body, dispatches, and converts back.
    ///
    /// Infallible at the hyper boundary — every failure becomes an HTTP
    /// status.
    pub(crate) async fn dispatch(
        &self,
        req: hyper::Request<hyper::body::Incoming>,
        remote_addr: SocketAddr,
    ) -> Result<http::Response<Full<Bytes>>, Infallible> {
        let (parts, body) = req.into_parts();

        let body = match body.collect().await {
            Ok(collected) => collected.to_bytes(),
            Err(e) => {
                error!(peer = %remote_addr, "failed to read request body: {e}");
                return Ok(Response::status(StatusCode::BAD_REQUEST).into_http());
            }
        };

        Ok(self.handle(parts, body, remote_addr).await.into_http())
    }

    fn lookup(&self, method: &Method, path: &str) -> (Chain, HashMap<String, String>) {
        if let Some(tree) = self.routes.get(method) {
            if let Ok(matched) = tree.at(path) {
                let params = matched
                    .params
                    .iter()
                    .map(|(k, v)| (k.to_owned(), v.to_owned()))
                    .collect();
                return (matched.value.clone(), params);
            }
        }
        (self.fallback.clone(), HashMap::new())
    }
}

// ── Built-in terminal handlers ────────────────────────────────────────────────

/// Fallback for unmatched paths: `404` with a fixed JSON body.
async fn not_found(req: Request) -> Response {
    debug!(
        method = %req.method(),
        path = req.path(),
        sender = %req.remote_addr(),
        agent = req.user_agent(),
        "rest api not supported"
    );

    Response::builder()
        .status(StatusCode::NOT_FOUND)
        .json(br#"{"Error": "API Not Supported"}"#.to_vec())
}

/// Placeholder for `GET /<prefix>/` until an API listing exists.
async fn api_listing(_req: Request) -> Response {
    Response::builder()
        .status(StatusCode::NOT_IMPLEMENTED)
        .json(br#"{"Error": "API listing is not implemented"}"#.to_vec())
}

/// Terminal handler serving files out of `dir` for static routes.
fn static_handler(dir: PathBuf) -> BoxedHandler {
    let handler = move |req: Request| {
        let dir = dir.clone();
        async move {
            let rel = req.param("file").unwrap_or("").to_owned();
            serve_file(&dir, &rel).await
        }
    };
    handler.into_boxed_handler()
}

async fn serve_file(dir: &Path, rel: &str) -> Response {
    let rel = Path::new(rel);

    // Reject anything that could escape the mounted directory.
    if rel.components().any(|c| !matches!(c, Component::Normal(_))) {
        return Response::status(StatusCode::NOT_FOUND);
    }

    let path = dir.join(rel);
    match tokio::fs::read(&path).await {
        Ok(contents) => Response::builder()
            .bytes(content_type_for(&path), contents),
        Err(e) => {
            debug!(path = %path.display(), "static file not served: {e}");
            Response::status(StatusCode::NOT_FOUND)
        }
    }
}

fn content_type_for(path: &Path) -> &'static str {
    match path.extension().and_then(|e| e.to_str()) {
        Some("html") => "text/html; charset=utf-8",
        Some("css") => "text/css",
        Some("js") => "application/javascript",
        Some("json") => "application/json",
        Some("png") => "image/png",
        Some("svg") => "image/svg+xml",
        Some("txt") => "text/plain; charset=utf-8",
        _ => "application/octet-stream",
    }
}

// ── Tests ─────────────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Mutex;

    use super::*;
    use crate::middleware::{from_fn, CallCounter, CrashGuard, Gatekeeper, RedirectNotice};

    fn remote() -> SocketAddr {
        "127.0.0.1:50000".parse().unwrap()
    }

    async fn run(service: &Service, method: Method, path: &str, body: &[u8]) -> Response {
        let req = http::Request::builder()
            .method(method)
            .uri(path)
            .body(())
            .unwrap();
        let (parts, ()) = req.into_parts();
        service.handle(parts, Bytes::copy_from_slice(body), remote()).await
    }

    async fn ok(_req: Request) -> Response {
        Response::text("ok")
    }

    fn single_route_table(route: Route) -> RouteTable {
        let mut table = RouteTable::new();
        table.insert("test".to_owned(), vec![route]);
        table
    }

    fn counting() -> (Arc<AtomicUsize>, CallCounter) {
        let count = Arc::new(AtomicUsize::new(0));
        let counter = {
            let count = Arc::clone(&count);
            CallCounter::new(move || {
                count.fetch_add(1, Ordering::SeqCst);
            })
        };
        (count, counter)
    }

    #[tokio::test]
    async fn missing_method_defaults_to_get() {
        let factory = ServiceFactory::new();
        let service = factory.make(single_route_table(Route::new("Ok", "ok", ok))).unwrap();

        let resp = run(&service, Method::GET, "/test/ok", b"").await;
        assert_eq!(resp.status_code(), StatusCode::OK);

        // The same path under another method is unmatched.
        let resp = run(&service, Method::POST, "/test/ok", b"").await;
        assert_eq!(resp.status_code(), StatusCode::NOT_FOUND);
    }

    #[tokio::test]
    async fn explicit_method_is_preserved() {
        let factory = ServiceFactory::new();
        let route = Route::new("Ok", "ok", ok).method(Method::DELETE);
        let service = factory.make(single_route_table(route)).unwrap();

        let resp = run(&service, Method::DELETE, "/test/ok", b"").await;
        assert_eq!(resp.status_code(), StatusCode::OK);
        let resp = run(&service, Method::GET, "/test/ok", b"").await;
        assert_eq!(resp.status_code(), StatusCode::NOT_FOUND);
    }

    #[tokio::test]
    async fn include_and_exclude_conflict_skips_middleware() {
        let (count, counter) = counting();
        let mut factory = ServiceFactory::new();
        factory.available("conflicted", counter);

        let route = Route::new("Ok", "ok", ok).include("conflicted").exclude("conflicted");
        let service = factory.make(single_route_table(route)).unwrap();

        let resp = run(&service, Method::GET, "/test/ok", b"").await;
        assert_eq!(resp.status_code(), StatusCode::OK);
        assert_eq!(count.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn always_tier_ignores_exclusion() {
        let (count, counter) = counting();
        let mut factory = ServiceFactory::new();
        factory.always("counter", counter);

        let route = Route::new("Ok", "ok", ok).exclude("counter");
        let service = factory.make(single_route_table(route)).unwrap();

        run(&service, Method::GET, "/test/ok", b"").await;
        assert_eq!(count.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn always_tier_runs_for_not_found() {
        let (count, counter) = counting();
        let mut factory = ServiceFactory::new();
        factory.always("counter", counter);
        let service = factory.make(single_route_table(Route::new("Ok", "ok", ok))).unwrap();

        let resp = run(&service, Method::GET, "/nowhere", b"").await;
        assert_eq!(resp.status_code(), StatusCode::NOT_FOUND);
        assert_eq!(count.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn always_tier_preserves_registration_order() {
        let seen: Arc<Mutex<Vec<&'static str>>> = Arc::new(Mutex::new(Vec::new()));
        let tracer = |label: &'static str, seen: Arc<Mutex<Vec<&'static str>>>| {
            from_fn(move |req: Request, next: crate::middleware::Next| {
                seen.lock().unwrap().push(label);
                next.run(req)
            })
        };

        let mut factory = ServiceFactory::new();
        factory.always("first", tracer("first", Arc::clone(&seen)));
        factory.always("second", tracer("second", Arc::clone(&seen)));
        factory.always("third", tracer("third", Arc::clone(&seen)));
        let service = factory.make(single_route_table(Route::new("Ok", "ok", ok))).unwrap();

        run(&service, Method::GET, "/test/ok", b"").await;
        assert_eq!(*seen.lock().unwrap(), vec!["first", "second", "third"]);
    }

    #[tokio::test]
    async fn default_tier_include_applies_once() {
        let (count, counter) = counting();
        let mut factory = ServiceFactory::new();
        factory.default("counter", counter);

        let route = Route::new("Ok", "ok", ok).include("counter");
        let service = factory.make(single_route_table(route)).unwrap();

        run(&service, Method::GET, "/test/ok", b"").await;
        assert_eq!(count.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn excluded_default_is_absent() {
        let (count, counter) = counting();
        let mut factory = ServiceFactory::new();
        factory.default("counter", counter);

        let route = Route::new("Ok", "ok", ok).exclude("counter");
        let service = factory.make(single_route_table(route)).unwrap();

        let resp = run(&service, Method::GET, "/test/ok", b"").await;
        assert_eq!(resp.status_code(), StatusCode::OK);
        assert_eq!(count.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn unregistered_include_is_skipped() {
        let factory = ServiceFactory::new();
        let route = Route::new("Ok", "ok", ok).include("no-such-middleware");
        let service = factory.make(single_route_table(route)).unwrap();

        let resp = run(&service, Method::GET, "/test/ok", b"").await;
        assert_eq!(resp.status_code(), StatusCode::OK);
    }

    #[tokio::test]
    async fn reregistration_overwrites_in_place() {
        let (old_count, old_counter) = counting();
        let (new_count, new_counter) = counting();

        let mut factory = ServiceFactory::new();
        factory.available("counter", old_counter);
        factory.available("counter", new_counter);

        let route = Route::new("Ok", "ok", ok).include("counter");
        let service = factory.make(single_route_table(route)).unwrap();

        run(&service, Method::GET, "/test/ok", b"").await;
        assert_eq!(old_count.load(Ordering::SeqCst), 0);
        assert_eq!(new_count.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn gatekeeper_rejection_short_circuits() {
        let (count, counter) = counting();
        let mut factory = ServiceFactory::new();
        factory.always(
            "gate",
            Gatekeeper::new(|req: &Request| req.header("x-allowed").is_some())
                .status(StatusCode::FORBIDDEN)
                .text_response("not today"),
        );
        factory.always("counter", counter);

        let service = factory.make(single_route_table(Route::new("Ok", "ok", ok))).unwrap();

        let resp = run(&service, Method::GET, "/test/ok", b"").await;
        assert_eq!(resp.status_code(), StatusCode::FORBIDDEN);
        assert_eq!(resp.body(), b"not today");
        // Downstream stages never ran.
        assert_eq!(count.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn gatekeeper_pass_delegates_exactly_once() {
        let (count, counter) = counting();
        let mut factory = ServiceFactory::new();
        factory.always("gate", Gatekeeper::new(|_req: &Request| true));
        factory.always("counter", counter);

        let service = factory.make(single_route_table(Route::new("Ok", "ok", ok))).unwrap();

        let resp = run(&service, Method::GET, "/test/ok", b"").await;
        assert_eq!(resp.status_code(), StatusCode::OK);
        assert_eq!(count.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn crash_guard_recovers_panicking_handler() {
        let mut factory = ServiceFactory::new();
        factory.always("crash-handler", CrashGuard::default());

        async fn panicking(_req: Request) -> Response {
            panic!("boom");
        }
        let service = factory
            .make(single_route_table(Route::new("Panic", "panic", panicking)))
            .unwrap();

        let resp = run(&service, Method::GET, "/test/panic", b"").await;
        assert_eq!(resp.status_code(), StatusCode::INTERNAL_SERVER_ERROR);
        assert_eq!(resp.body(), br#"{"Error": "internal server error"}"#);
    }

    #[tokio::test]
    async fn redirect_notice_observes_and_delegates() {
        let (count, _) = counting();
        let observed = Arc::clone(&count);
        let mut factory = ServiceFactory::new();
        factory.always(
            "redirect",
            RedirectNotice::new(move |_req| {
                observed.fetch_add(1, Ordering::SeqCst);
            }),
        );

        let service = factory.make(single_route_table(Route::new("Ok", "ok", ok))).unwrap();

        let resp = run(&service, Method::GET, "/test/ok", b"").await;
        assert_eq!(resp.status_code(), StatusCode::OK);
        assert_eq!(resp.body(), b"ok");
        assert_eq!(count.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn unmatched_path_gets_fixed_not_found_body() {
        let factory = ServiceFactory::new();
        let service = factory.make(single_route_table(Route::new("Ok", "ok", ok))).unwrap();

        let resp = run(&service, Method::GET, "/test/missing", b"").await;
        assert_eq!(resp.status_code(), StatusCode::NOT_FOUND);
        assert_eq!(resp.body(), br#"{"Error": "API Not Supported"}"#);
    }

    #[tokio::test]
    async fn listing_endpoint_is_explicitly_unimplemented() {
        let factory = ServiceFactory::new();
        let service = factory.make(single_route_table(Route::new("Ok", "ok", ok))).unwrap();

        let resp = run(&service, Method::GET, "/test/", b"").await;
        assert_eq!(resp.status_code(), StatusCode::NOT_IMPLEMENTED);
    }

    #[tokio::test]
    async fn malformed_path_aborts_composition() {
        let factory = ServiceFactory::new();
        let result = factory.make(single_route_table(Route::new("Bad", "broken/{", ok)));
        assert!(matches!(result, Err(Error::Route { .. })));
    }

    #[tokio::test]
    async fn static_route_serves_files_and_blocks_traversal() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join("index.html"), b"<html>apis</html>").unwrap();

        let (count, counter) = counting();
        let mut factory = ServiceFactory::new();
        // Default tier must not apply to static routes.
        factory.default("counter", counter);

        let route = Route::static_dir("Apis", "api", dir.path());
        let service = factory.make(single_route_table(route)).unwrap();

        let resp = run(&service, Method::GET, "/test/api/index.html", b"").await;
        assert_eq!(resp.status_code(), StatusCode::OK);
        assert_eq!(resp.body(), b"<html>apis</html>");
        assert_eq!(count.load(Ordering::SeqCst), 0);

        let resp = run(&service, Method::GET, "/test/api/../secret", b"").await;
        assert_eq!(resp.status_code(), StatusCode::NOT_FOUND);
    }
}

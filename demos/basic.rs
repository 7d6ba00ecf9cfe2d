//! Minimal plinth example — a versioned order API with tiered middleware.
//!
//! Run with:
//!   RUST_LOG=debug cargo run --example basic
//!
//! Try:
//!   curl http://localhost:8080/v1/order/healthcheck
//!   curl http://localhost:8080/v1/order/create -X POST -d '{}'
//!   curl http://localhost:8080/nowhere            # fixed 404 body
//!   curl http://localhost:8080/v1/order/          # listing placeholder

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

use plinth::middleware::{CallCounter, CrashGuard, Logger};
use plinth::{health, Method, Request, Response, Route, RouteTable, Server, ServerConfig, ServiceFactory};

#[tokio::main]
async fn main() -> Result<(), plinth::Error> {
    tracing_subscriber::fmt::init();

    let calls = Arc::new(AtomicUsize::new(0));
    let counter = {
        let calls = Arc::clone(&calls);
        CallCounter::new(move || {
            calls.fetch_add(1, Ordering::Relaxed);
        })
    };

    let mut factory = ServiceFactory::new();
    factory.always("middleware:crash-handler", CrashGuard::default());
    factory.default("middleware:logger", Logger::new());
    factory.available("middleware:call-counter", counter);

    let mut routes = RouteTable::new();
    routes.insert(
        "v1/order".to_owned(),
        vec![
            Route::new("HealthCheck", "healthcheck", health::named("order")),
            Route::new("CreateOrder", "create", create_order)
                .method(Method::POST)
                .include("middleware:call-counter"),
        ],
    );

    let server = Server::new(
        factory.make(routes)?,
        ServerConfig::builder().address("0.0.0.0:8080").build()?,
    );

    server.start_http()?;
    server.stop_on_signal().await
}

// POST /v1/order/create
async fn create_order(req: Request) -> Response {
    if req.body().is_empty() {
        return Response::status(plinth::StatusCode::BAD_REQUEST);
    }

    Response::builder()
        .status(plinth::StatusCode::CREATED)
        .json(br#"{"OrderId": "42"}"#.to_vec())
}

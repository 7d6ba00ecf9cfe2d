//! # plinth
//!
//! An HTTP service scaffold: a tiered middleware composition engine plus a
//! managed server lifecycle. Nothing more. Nothing less.
//!
//! ## The contract
//!
//! Route tables and handler bodies belong to the application; path matching
//! belongs to [`matchit`]; plinth owns the two parts in between that
//! actually carry design weight:
//!
//! - **Composition** — a [`ServiceFactory`] holds named middleware in three
//!   tiers (*always* / *default* / *available*) and composes a route table
//!   into one immutable [`Service`], resolving per-route include/exclude
//!   overrides with deterministic, registration-order chains.
//! - **Lifecycle** — a [`Server`] owns a mutex-guarded
//!   `Stopped → Starting → Running → Stopped` state machine with
//!   non-blocking starts, bounded graceful shutdown, and synchronous status
//!   listener callbacks.
//!
//! ## Quick start
//!
//! ```rust,no_run
//! use plinth::middleware::Logger;
//! use plinth::{health, Route, RouteTable, Server, ServerConfig, ServiceFactory};
//!
//! #[tokio::main]
//! async fn main() -> Result<(), plinth::Error> {
//!     let mut factory = ServiceFactory::new();
//!     factory.default("middleware:logger", Logger::new());
//!
//!     let mut routes = RouteTable::new();
//!     routes.insert(
//!         "v1/order".to_owned(),
//!         vec![Route::new("HealthCheck", "healthcheck", health::named("order"))],
//!     );
//!
//!     let server = Server::new(
//!         factory.make(routes)?,
//!         ServerConfig::builder().address("0.0.0.0:8080").build()?,
//!     );
//!
//!     server.start_http()?;
//!     server.stop_on_signal().await
//! }
//! ```
//!
//! Registration is build-then-freeze: register middleware, compose with
//! [`ServiceFactory::make`], then serve. Registering during live traffic is
//! unsupported by construction — `make` consumes the factory.

mod config;
mod error;
mod factory;
mod handler;
mod request;
mod response;
mod route;
mod server;
mod tls;

pub mod health;
pub mod middleware;

pub use config::{ServerConfig, ServerConfigBuilder, DEFAULT_ADDRESS, DEFAULT_SHUTDOWN_TIMEOUT_SECS};
pub use error::Error;
pub use factory::{Service, ServiceFactory};
pub use handler::Handler;
pub use request::Request;
pub use response::{IntoResponse, Response, ResponseBuilder};
pub use route::{Route, RouteTable};
pub use server::{Server, ServerStatus, StatusListener};

// Re-exported because they appear throughout the public API.
pub use http::{Method, StatusCode};

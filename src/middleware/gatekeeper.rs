//! Admission-control middleware.

use std::sync::Arc;

use http::StatusCode;
use serde::Serialize;
use tracing::{error, warn};

use crate::handler::BoxFuture;
use crate::middleware::{Middleware, Next};
use crate::request::Request;
use crate::response::Response;

/// Evaluates a predicate over each request before any further processing.
///
/// When the predicate returns `false` the gatekeeper writes the configured
/// rejection response and does not delegate; when it returns `true` the
/// request proceeds down the chain.
///
/// ```rust
/// use http::StatusCode;
/// use plinth::middleware::Gatekeeper;
/// use plinth::Request;
///
/// let gate = Gatekeeper::new(|req: &Request| req.header("x-api-key").is_some())
///     .status(StatusCode::UNAUTHORIZED)
///     .text_response("missing api key")
///     .log_message("request without api key");
/// ```
pub struct Gatekeeper {
    predicate: Arc<dyn Fn(&Request) -> bool + Send + Sync>,
    status: StatusCode,
    content_type: String,
    body: Vec<u8>,
    log_message: String,
}

impl Gatekeeper {
    /// Creates a gatekeeper rejecting with `503 Service Unavailable` and an
    /// empty body by default.
    pub fn new(predicate: impl Fn(&Request) -> bool + Send + Sync + 'static) -> Self {
        Self {
            predicate: Arc::new(predicate),
            status: StatusCode::SERVICE_UNAVAILABLE,
            content_type: String::new(),
            body: Vec::new(),
            log_message: "service is not available".to_owned(),
        }
    }

    /// Sets the rejection status code.
    pub fn status(mut self, status: StatusCode) -> Self {
        self.status = status;
        self
    }

    /// Sets a raw rejection body under an explicit content type.
    pub fn raw_response(mut self, content_type: impl Into<String>, body: Vec<u8>) -> Self {
        self.content_type = content_type.into();
        self.body = body;
        self
    }

    /// Sets a plain-text rejection body.
    pub fn text_response(self, body: impl Into<String>) -> Self {
        self.raw_response("text/plain", body.into().into_bytes())
    }

    /// Sets a JSON rejection body serialized from `value`.
    ///
    /// Falls back to a plain-text internal-error body if serialization
    /// fails.
    pub fn json_response<T: Serialize>(self, value: &T) -> Self {
        match serde_json::to_vec(value) {
            Ok(body) => self.raw_response("application/json", body),
            Err(e) => {
                error!("gatekeeper failed to serialize JSON response: {e}");
                self.text_response("<internal error: response is not JSON format>")
            }
        }
    }

    /// Sets the message logged when a request is rejected.
    pub fn log_message(mut self, message: impl Into<String>) -> Self {
        self.log_message = message.into();
        self
    }

    fn rejection(&self) -> Response {
        let mut builder = Response::builder().status(self.status);
        if self.body.is_empty() {
            if !self.content_type.is_empty() {
                builder = builder.header("content-type", &self.content_type);
            }
            builder.no_body()
        } else {
            builder.bytes(&self.content_type, self.body.clone())
        }
    }
}

impl Middleware for Gatekeeper {
    fn handle(&self, req: Request, next: Next) -> BoxFuture {
        if !(self.predicate)(&req) {
            warn!("api request is not accepted: {}", self.log_message);
            let response = self.rejection();
            return Box::pin(async move { response });
        }

        next.run(req)
    }
}

//! Health-check terminal handler.

use http::StatusCode;
use serde::Serialize;
use tracing::error;

use crate::handler::Handler;
use crate::request::Request;
use crate::response::Response;

#[derive(Serialize)]
struct HealthCheck {
    #[serde(rename = "Name")]
    name: String,
}

/// Returns a health-check handler answering `200 OK` with
/// `{"Name": "<service_name>"}`, or `500` with the error text if the body
/// cannot be encoded.
///
/// ```rust,no_run
/// use plinth::{health, Route};
///
/// let route = Route::new("HealthCheck", "healthcheck", health::named("order"));
/// ```
pub fn named(service_name: impl Into<String>) -> impl Handler {
    let name = service_name.into();
    move |_req: Request| {
        let name = name.clone();
        async move {
            match serde_json::to_vec(&HealthCheck { name }) {
                Ok(body) => Response::json(body),
                Err(e) => {
                    error!("healthcheck encode error: {e}");
                    Response::builder()
                        .status(StatusCode::INTERNAL_SERVER_ERROR)
                        .text(e.to_string())
                }
            }
        }
    }
}

//! Incoming HTTP request type.
//!
//! The body is buffered before dispatch so middleware and handlers see a
//! plain byte slice. Body-size limits belong to the reverse proxy in front
//! of the service, not to this crate.

use std::collections::HashMap;
use std::net::SocketAddr;

use bytes::Bytes;
use http::{HeaderMap, Method, Uri, Version};

/// An incoming HTTP request with a fully buffered body.
///
/// A `Request` is owned by the dispatch chain: each middleware receives it
/// by value and passes it on through [`Next::run`](crate::middleware::Next::run).
pub struct Request {
    method: Method,
    uri: Uri,
    version: Version,
    headers: HeaderMap,
    body: Bytes,
    params: HashMap<String, String>,
    remote_addr: SocketAddr,
}

impl Request {
    pub(crate) fn new(
        parts: http::request::Parts,
        body: Bytes,
        params: HashMap<String, String>,
        remote_addr: SocketAddr,
    ) -> Self {
        Self {
            method: parts.method,
            uri: parts.uri,
            version: parts.version,
            headers: parts.headers,
            body,
            params,
            remote_addr,
        }
    }

    pub fn method(&self) -> &Method {
        &self.method
    }

    /// The request path, without query string.
    pub fn path(&self) -> &str {
        self.uri.path()
    }

    pub fn uri(&self) -> &Uri {
        &self.uri
    }

    pub fn version(&self) -> Version {
        self.version
    }

    pub fn headers(&self) -> &HeaderMap {
        &self.headers
    }

    pub fn body(&self) -> &[u8] {
        &self.body
    }

    /// The peer address of the connection this request arrived on.
    pub fn remote_addr(&self) -> SocketAddr {
        self.remote_addr
    }

    /// Header lookup by name; returns `None` for missing or non-UTF-8 values.
    pub fn header(&self, name: &str) -> Option<&str> {
        self.headers.get(name).and_then(|v| v.to_str().ok())
    }

    /// The `user-agent` header, or `""` when absent.
    pub fn user_agent(&self) -> &str {
        self.header("user-agent").unwrap_or("")
    }

    /// Returns a named path parameter.
    ///
    /// For a route `getdata/{id}`, `req.param("id")` on `/v1/getdata/42`
    /// returns `Some("42")`.
    pub fn param(&self, key: &str) -> Option<&str> {
        self.params.get(key).map(String::as_str)
    }
}

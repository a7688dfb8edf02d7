//! Request descriptor and body handle.
//!
//! # Responsibilities
//! - Extract routing-relevant information (method, path, query, headers)
//! - Prepare request copies for forwarding to the upstream
//! - Give the body a read-at-most-once handle with opt-in caching
//!
//! # Design Decisions
//! - Descriptors are never mutated in place: `with_*` methods consume and
//!   return a new value, so the original stays available for logging
//! - Headers use `HeaderMap` (multi-valued, case-insensitive names)

use std::borrow::Cow;

use axum::body::Body;
use axum::http::header::{HeaderName, HeaderValue};
use axum::http::{request::Parts, HeaderMap, Method, Uri, Version};
use bytes::Bytes;
use http_body_util::LengthLimitError;

use crate::error::{GatewayError, GatewayResult};

/// Immutable view of an inbound request's head.
#[derive(Debug, Clone)]
pub struct RequestDescriptor {
    method: Method,
    path: String,
    query: Option<String>,
    headers: HeaderMap,
    version: Version,
}

impl RequestDescriptor {
    pub fn new(method: Method, path: impl Into<String>) -> Self {
        Self {
            method,
            path: path.into(),
            query: None,
            headers: HeaderMap::new(),
            version: Version::HTTP_11,
        }
    }

    /// Build a descriptor from decoded request parts.
    pub fn from_parts(parts: &Parts) -> Self {
        Self {
            method: parts.method.clone(),
            path: parts.uri.path().to_string(),
            query: parts.uri.query().map(str::to_string),
            headers: parts.headers.clone(),
            version: parts.version,
        }
    }

    pub fn method(&self) -> &Method {
        &self.method
    }

    pub fn path(&self) -> &str {
        &self.path
    }

    /// Raw query string, without the leading `?`.
    pub fn query(&self) -> Option<&str> {
        self.query.as_deref()
    }

    pub fn headers(&self) -> &HeaderMap {
        &self.headers
    }

    pub fn version(&self) -> Version {
        self.version
    }

    /// First value of a header as a string, if present and valid UTF-8.
    pub fn header_str(&self, name: &str) -> Option<&str> {
        self.headers.get(name).and_then(|v| v.to_str().ok())
    }

    /// First decoded value of a query parameter.
    pub fn query_param(&self, name: &str) -> Option<Cow<'_, str>> {
        let query = self.query.as_deref()?;
        url::form_urlencoded::parse(query.as_bytes())
            .find(|(k, _)| k == name)
            .map(|(_, v)| v)
    }

    /// Path plus query, in origin form.
    pub fn path_and_query(&self) -> String {
        match &self.query {
            Some(q) => format!("{}?{}", self.path, q),
            None => self.path.clone(),
        }
    }

    /// Parse `path_and_query` as a `Uri`.
    pub fn uri(&self) -> GatewayResult<Uri> {
        self.path_and_query()
            .parse()
            .map_err(|e| GatewayError::filter("request", format!("invalid request uri: {}", e)))
    }

    pub fn with_method(mut self, method: Method) -> Self {
        self.method = method;
        self
    }

    pub fn with_path(mut self, path: impl Into<String>) -> Self {
        self.path = path.into();
        self
    }

    pub fn with_query(mut self, query: Option<String>) -> Self {
        self.query = query;
        self
    }

    /// Append a header value, keeping existing values.
    pub fn with_header(mut self, name: HeaderName, value: HeaderValue) -> Self {
        self.headers.append(name, value);
        self
    }

    /// Replace all values of a header.
    pub fn with_header_set(mut self, name: HeaderName, value: HeaderValue) -> Self {
        self.headers.insert(name, value);
        self
    }

    pub fn without_header(mut self, name: &HeaderName) -> Self {
        self.headers.remove(name);
        self
    }
}

/// Inbound body handle.
///
/// A streaming body can be taken once. Calling [`RequestBody::cache`] first
/// buffers it, after which every `take` replays the cached bytes.
#[derive(Debug, Default)]
pub enum RequestBody {
    #[default]
    Empty,
    Streaming(Body),
    Cached(Bytes),
    Consumed,
}

impl RequestBody {
    pub fn streaming(body: Body) -> Self {
        RequestBody::Streaming(body)
    }

    /// Whether `take` can be called again after it succeeds.
    pub fn is_replayable(&self) -> bool {
        matches!(self, RequestBody::Empty | RequestBody::Cached(_))
    }

    pub fn is_cached(&self) -> bool {
        matches!(self, RequestBody::Cached(_))
    }

    /// Take the body for sending.
    pub fn take(&mut self) -> GatewayResult<Body> {
        match std::mem::replace(self, RequestBody::Consumed) {
            RequestBody::Empty => {
                *self = RequestBody::Empty;
                Ok(Body::empty())
            }
            RequestBody::Cached(bytes) => {
                let body = Body::from(bytes.clone());
                *self = RequestBody::Cached(bytes);
                Ok(body)
            }
            RequestBody::Streaming(body) => Ok(body),
            RequestBody::Consumed => Err(GatewayError::BodyAlreadyConsumed),
        }
    }

    /// Buffer a streaming body up to `limit` bytes.
    pub async fn cache(&mut self, limit: usize) -> GatewayResult<Bytes> {
        match std::mem::replace(self, RequestBody::Consumed) {
            RequestBody::Empty => {
                *self = RequestBody::Empty;
                Ok(Bytes::new())
            }
            RequestBody::Cached(bytes) => {
                *self = RequestBody::Cached(bytes.clone());
                Ok(bytes)
            }
            RequestBody::Streaming(body) => {
                let bytes = axum::body::to_bytes(body, limit).await.map_err(|e| {
                    if e.into_inner().is::<LengthLimitError>() {
                        GatewayError::PayloadTooLarge { limit }
                    } else {
                        GatewayError::DownstreamCancelled
                    }
                })?;
                *self = RequestBody::Cached(bytes.clone());
                Ok(bytes)
            }
            RequestBody::Consumed => Err(GatewayError::BodyAlreadyConsumed),
        }
    }
}

//! Status filters: overriding the response status and rejecting requests
//! early.

use async_trait::async_trait;
use axum::body::Body;
use axum::http::{header, HeaderName, HeaderValue, StatusCode};
use serde_json::json;

use crate::error::{GatewayError, GatewayResult};
use crate::filter::headers::header_name;
use crate::filter::{GatewayFilter, Next};
use crate::http::exchange::Exchange;
use crate::http::response::ResponseDescriptor;

fn status_code(code: u16) -> GatewayResult<StatusCode> {
    StatusCode::from_u16(code).map_err(|e| GatewayError::InvalidRoute {
        id: String::new(),
        reason: format!("invalid status {}: {}", code, e),
    })
}

/// Overrides the status of the response produced further down the chain.
#[derive(Debug, Clone)]
pub struct SetStatus {
    status: StatusCode,
}

impl SetStatus {
    pub fn new(code: u16) -> GatewayResult<Self> {
        Ok(Self {
            status: status_code(code)?,
        })
    }
}

#[async_trait]
impl GatewayFilter for SetStatus {
    fn name(&self) -> &str {
        "SetStatus"
    }

    async fn filter(&self, exchange: &mut Exchange, next: Next<'_>) -> GatewayResult<()> {
        next.run(exchange).await?;
        if let Some(response) = exchange.response_mut() {
            response.status = self.status;
        }
        Ok(())
    }
}

/// Rejects requests missing a header without contacting the upstream.
#[derive(Debug, Clone)]
pub struct RequireHeader {
    header: HeaderName,
    status: StatusCode,
}

impl RequireHeader {
    pub fn new(header: &str, status: u16) -> GatewayResult<Self> {
        Ok(Self {
            header: header_name(header)?,
            status: status_code(status)?,
        })
    }
}

#[async_trait]
impl GatewayFilter for RequireHeader {
    fn name(&self) -> &str {
        "RequireHeader"
    }

    async fn filter(&self, exchange: &mut Exchange, next: Next<'_>) -> GatewayResult<()> {
        if exchange.request().headers().contains_key(&self.header) {
            return next.run(exchange).await;
        }

        tracing::debug!(
            request_id = %exchange.request_id(),
            header = %self.header,
            status = self.status.as_u16(),
            "Required header missing, rejecting"
        );
        let body = json!({
            "error": {
                "code": "MISSING_HEADER",
                "message": format!("missing required header '{}'", self.header),
            }
        });
        exchange.set_response(
            ResponseDescriptor::new(self.status)
                .with_header(header::CONTENT_TYPE, HeaderValue::from_static("application/json"))
                .with_body(Body::from(body.to_string())),
        );
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::filter::test_support::run;
    use crate::filter::FilterChain;
    use std::collections::HashMap;
    use std::sync::Arc;

    #[tokio::test]
    async fn missing_header_short_circuits() {
        let chain = FilterChain::build(&[], &[Arc::new(RequireHeader::new("authorization", 401).unwrap())]);

        let (ex, seen) = run(&chain, "/private", &[], HashMap::new()).await;
        assert!(seen.is_none());
        assert!(!ex.was_dispatched());
        assert_eq!(ex.response().unwrap().status, StatusCode::UNAUTHORIZED);

        let (ex, seen) = run(&chain, "/private", &[("authorization", "Bearer t")], HashMap::new()).await;
        assert!(seen.is_some());
        assert_eq!(ex.response().unwrap().status, StatusCode::OK);
    }

    #[tokio::test]
    async fn set_status_overrides_upstream_status() {
        let chain = FilterChain::build(&[], &[Arc::new(SetStatus::new(202).unwrap())]);
        let (ex, _) = run(&chain, "/get", &[], HashMap::new()).await;
        assert_eq!(ex.response().unwrap().status, StatusCode::ACCEPTED);
    }

    #[test]
    fn rejects_invalid_status() {
        assert!(SetStatus::new(42).is_err());
    }
}

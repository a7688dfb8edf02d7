//! Header rewriting filters.
//!
//! Values may reference captured path variables as `{name}`.

use async_trait::async_trait;
use axum::http::{HeaderName, HeaderValue};

use crate::error::{GatewayError, GatewayResult};
use crate::filter::{GatewayFilter, Next};
use crate::http::exchange::Exchange;
use crate::routing::path::expand_template;

pub(crate) fn header_name(name: &str) -> GatewayResult<HeaderName> {
    HeaderName::from_bytes(name.as_bytes()).map_err(|e| GatewayError::InvalidRoute {
        id: String::new(),
        reason: format!("invalid header name '{}': {}", name, e),
    })
}

fn header_value(value: &str) -> GatewayResult<HeaderValue> {
    HeaderValue::from_str(value).map_err(|e| GatewayError::InvalidRoute {
        id: String::new(),
        reason: format!("invalid header value '{}': {}", value, e),
    })
}

/// A header value that may contain `{var}` placeholders.
#[derive(Debug, Clone)]
struct ValueTemplate {
    raw: String,
    fixed: Option<HeaderValue>,
}

impl ValueTemplate {
    fn parse(raw: &str) -> GatewayResult<Self> {
        let value = header_value(raw)?;
        Ok(Self {
            raw: raw.to_string(),
            fixed: (!raw.contains('{')).then_some(value),
        })
    }

    fn resolve(&self, filter: &str, exchange: &Exchange) -> GatewayResult<HeaderValue> {
        match &self.fixed {
            Some(value) => Ok(value.clone()),
            None => {
                let expanded = expand_template(&self.raw, exchange.path_variables());
                HeaderValue::from_str(&expanded).map_err(|e| GatewayError::filter(filter, e.to_string()))
            }
        }
    }
}

/// Appends a request header, keeping existing values.
#[derive(Debug, Clone)]
pub struct AddRequestHeader {
    name: HeaderName,
    value: ValueTemplate,
}

impl AddRequestHeader {
    pub fn new(name: &str, value: &str) -> GatewayResult<Self> {
        Ok(Self {
            name: header_name(name)?,
            value: ValueTemplate::parse(value)?,
        })
    }
}

#[async_trait]
impl GatewayFilter for AddRequestHeader {
    fn name(&self) -> &str {
        "AddRequestHeader"
    }

    async fn filter(&self, exchange: &mut Exchange, next: Next<'_>) -> GatewayResult<()> {
        let value = self.value.resolve(self.name(), exchange)?;
        let name = self.name.clone();
        exchange.mutate_request(|req| req.with_header(name, value));
        next.run(exchange).await
    }
}

/// Replaces all values of a request header.
#[derive(Debug, Clone)]
pub struct SetRequestHeader {
    name: HeaderName,
    value: ValueTemplate,
}

impl SetRequestHeader {
    pub fn new(name: &str, value: &str) -> GatewayResult<Self> {
        Ok(Self {
            name: header_name(name)?,
            value: ValueTemplate::parse(value)?,
        })
    }
}

#[async_trait]
impl GatewayFilter for SetRequestHeader {
    fn name(&self) -> &str {
        "SetRequestHeader"
    }

    async fn filter(&self, exchange: &mut Exchange, next: Next<'_>) -> GatewayResult<()> {
        let value = self.value.resolve(self.name(), exchange)?;
        let name = self.name.clone();
        exchange.mutate_request(|req| req.with_header_set(name, value));
        next.run(exchange).await
    }
}

#[derive(Debug, Clone)]
pub struct RemoveRequestHeader {
    name: HeaderName,
}

impl RemoveRequestHeader {
    pub fn new(name: &str) -> GatewayResult<Self> {
        Ok(Self { name: header_name(name)? })
    }
}

#[async_trait]
impl GatewayFilter for RemoveRequestHeader {
    fn name(&self) -> &str {
        "RemoveRequestHeader"
    }

    async fn filter(&self, exchange: &mut Exchange, next: Next<'_>) -> GatewayResult<()> {
        let name = self.name.clone();
        exchange.mutate_request(|req| req.without_header(&name));
        next.run(exchange).await
    }
}

/// Appends a header to whatever response the rest of the chain produced.
#[derive(Debug, Clone)]
pub struct AddResponseHeader {
    name: HeaderName,
    value: ValueTemplate,
}

impl AddResponseHeader {
    pub fn new(name: &str, value: &str) -> GatewayResult<Self> {
        Ok(Self {
            name: header_name(name)?,
            value: ValueTemplate::parse(value)?,
        })
    }
}

#[async_trait]
impl GatewayFilter for AddResponseHeader {
    fn name(&self) -> &str {
        "AddResponseHeader"
    }

    async fn filter(&self, exchange: &mut Exchange, next: Next<'_>) -> GatewayResult<()> {
        next.run(exchange).await?;
        let value = self.value.resolve(self.name(), exchange)?;
        if let Some(response) = exchange.response_mut() {
            response.headers.append(self.name.clone(), value);
        }
        Ok(())
    }
}

#[derive(Debug, Clone)]
pub struct RemoveResponseHeader {
    name: HeaderName,
}

impl RemoveResponseHeader {
    pub fn new(name: &str) -> GatewayResult<Self> {
        Ok(Self { name: header_name(name)? })
    }
}

#[async_trait]
impl GatewayFilter for RemoveResponseHeader {
    fn name(&self) -> &str {
        "RemoveResponseHeader"
    }

    async fn filter(&self, exchange: &mut Exchange, next: Next<'_>) -> GatewayResult<()> {
        next.run(exchange).await?;
        if let Some(response) = exchange.response_mut() {
            response.headers.remove(&self.name);
        }
        Ok(())
    }
}

//! Path rewriting filters.

use async_trait::async_trait;

use crate::error::{GatewayError, GatewayResult};
use crate::filter::{GatewayFilter, Next};
use crate::http::exchange::Exchange;
use crate::routing::path::expand_template;

/// Drops the first `parts` segments of the request path.
///
/// `/api/v1/items` with `parts = 2` becomes `/items`.
#[derive(Debug, Clone)]
pub struct StripPrefix {
    parts: usize,
}

impl StripPrefix {
    pub fn new(parts: usize) -> Self {
        Self { parts }
    }

    fn rewrite(&self, path: &str) -> String {
        let rest: Vec<&str> = path.split('/').filter(|s| !s.is_empty()).skip(self.parts).collect();
        let mut rewritten = format!("/{}", rest.join("/"));
        if path.len() > 1 && path.ends_with('/') && !rest.is_empty() {
            rewritten.push('/');
        }
        rewritten
    }
}

#[async_trait]
impl GatewayFilter for StripPrefix {
    fn name(&self) -> &str {
        "StripPrefix"
    }

    async fn filter(&self, exchange: &mut Exchange, next: Next<'_>) -> GatewayResult<()> {
        let path = self.rewrite(exchange.request().path());
        exchange.mutate_request(|req| req.with_path(path));
        next.run(exchange).await
    }
}

/// Prepends a fixed prefix to the request path.
#[derive(Debug, Clone)]
pub struct PrefixPath {
    prefix: String,
}

impl PrefixPath {
    pub fn new(prefix: &str) -> GatewayResult<Self> {
        if !prefix.starts_with('/') {
            return Err(GatewayError::InvalidRoute {
                id: String::new(),
                reason: format!("path prefix '{}' must start with '/'", prefix),
            });
        }
        Ok(Self {
            prefix: prefix.trim_end_matches('/').to_string(),
        })
    }
}

#[async_trait]
impl GatewayFilter for PrefixPath {
    fn name(&self) -> &str {
        "PrefixPath"
    }

    async fn filter(&self, exchange: &mut Exchange, next: Next<'_>) -> GatewayResult<()> {
        let path = format!("{}{}", self.prefix, exchange.request().path());
        exchange.mutate_request(|req| req.with_path(path));
        next.run(exchange).await
    }
}

/// Replaces the request path with a template over captured path variables,
/// e.g. `/v2/{segment}`.
#[derive(Debug, Clone)]
pub struct SetPath {
    template: String,
}

impl SetPath {
    pub fn new(template: &str) -> GatewayResult<Self> {
        if !template.starts_with('/') {
            return Err(GatewayError::InvalidRoute {
                id: String::new(),
                reason: format!("path template '{}' must start with '/'", template),
            });
        }
        Ok(Self {
            template: template.to_string(),
        })
    }
}

#[async_trait]
impl GatewayFilter for SetPath {
    fn name(&self) -> &str {
        "SetPath"
    }

    async fn filter(&self, exchange: &mut Exchange, next: Next<'_>) -> GatewayResult<()> {
        let path = expand_template(&self.template, exchange.path_variables());
        exchange.mutate_request(|req| req.with_path(path));
        next.run(exchange).await
    }
}

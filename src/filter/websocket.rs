//! WebSocket routing.
//!
//! Claims the client handshake parked on the exchange, opens the upstream
//! socket at the resolved target and answers `101 Switching Protocols`.
//! Frames are relayed once the client connection is upgraded. Requests
//! without a pending upgrade pass straight through to the dispatcher.

use std::time::Duration;

use async_trait::async_trait;

use crate::error::GatewayResult;
use crate::filter::{FilterOrder, GatewayFilter, Next};
use crate::http::exchange::Exchange;
use crate::http::response::ResponseDescriptor;
use crate::http::websocket::{connect_upstream, relay, PendingUpgrade};

/// Upstream handshake budget for routes without their own timeout.
pub const DEFAULT_HANDSHAKE_TIMEOUT: Duration = Duration::from_secs(10);

#[derive(Debug, Clone)]
pub struct WebsocketRoutingFilter {
    handshake_timeout: Duration,
}

impl WebsocketRoutingFilter {
    pub fn new(handshake_timeout: Duration) -> Self {
        Self { handshake_timeout }
    }
}

impl Default for WebsocketRoutingFilter {
    fn default() -> Self {
        Self::new(DEFAULT_HANDSHAKE_TIMEOUT)
    }
}

#[async_trait]
impl GatewayFilter for WebsocketRoutingFilter {
    fn name(&self) -> &str {
        "WebsocketRouting"
    }

    fn order(&self) -> FilterOrder {
        FilterOrder::WEBSOCKET_ROUTING
    }

    async fn filter(&self, exchange: &mut Exchange, next: Next<'_>) -> GatewayResult<()> {
        let Some(upgrade) = exchange.attributes().get::<PendingUpgrade>().and_then(PendingUpgrade::take) else {
            return next.run(exchange).await;
        };

        let target = match exchange.target() {
            Some(target) => target.clone(),
            None => exchange.route().target_for(exchange.request()),
        };
        let timeout = exchange.route().timeout().unwrap_or(self.handshake_timeout);

        exchange.mark_dispatched();
        let (socket, protocol) = connect_upstream(&target, exchange.request().headers(), timeout).await?;
        exchange.timings_mut().mark("upstream_headers");

        tracing::info!(
            request_id = %exchange.request_id(),
            route_id = %exchange.route().id(),
            target = %target,
            "WebSocket upgrade accepted"
        );

        let upgrade = match protocol {
            Some(protocol) => upgrade.protocols([protocol]),
            None => upgrade,
        };
        let request_id = exchange.request_id().to_string();
        let response = upgrade.on_upgrade(move |client| relay(client, socket, request_id));
        exchange.set_response(ResponseDescriptor::from_response(response));
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::filter::test_support::{exchange_for, EchoDispatch};
    use crate::filter::FilterChain;
    use crate::routing::Route;
    use std::sync::Arc;

    #[tokio::test]
    async fn plain_requests_pass_through() {
        let chain = FilterChain::build(&[Arc::new(WebsocketRoutingFilter::default())], &[]);
        let route = Route::builder("r").path("/**").uri("http://backend.test").build().unwrap();
        let mut ex = exchange_for(route, "/ws", &[("upgrade", "websocket"), ("connection", "upgrade")]);

        let dispatch = EchoDispatch::default();
        chain.execute(&mut ex, &dispatch).await.unwrap();
        assert!(dispatch.seen().is_some());
        assert!(ex.response().unwrap().headers.contains_key(EchoDispatch::MARKER));
    }

    #[test]
    fn runs_after_forwarded_headers() {
        let filter = WebsocketRoutingFilter::default();
        assert!(filter.order() > FilterOrder::FORWARDED_HEADERS);
        assert!(filter.order().is_structural());
    }
}

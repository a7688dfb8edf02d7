//! WebSocket proxy handling.
//!
//! # Responsibilities
//! - Detect WebSocket upgrade requests
//! - Open the upstream WebSocket before answering the client handshake
//! - Bidirectional frame forwarding
//!
//! # Data Flow
//! ```text
//! Client ←──── WebSocket frames ────→ Gateway ←──── WebSocket frames ────→ Upstream
//! ```
//!
//! # Design Decisions
//! - The upstream handshake runs inside the filter chain, so route filters
//!   shape it like any other request
//! - Frame-level forwarding, no message buffering
//! - Close frames propagate in both directions; each side answers its own
//!   pings

use std::fmt;
use std::sync::{Arc, Mutex, PoisonError};
use std::time::Duration;

use axum::extract::ws::{self, WebSocket, WebSocketUpgrade};
use axum::http::{header, HeaderMap, HeaderName};
use futures_util::{SinkExt, StreamExt};
use tokio::net::TcpStream;
use tokio_tungstenite::tungstenite::client::IntoClientRequest;
use tokio_tungstenite::tungstenite::protocol::CloseFrame;
use tokio_tungstenite::tungstenite::{self, Message};
use tokio_tungstenite::{MaybeTlsStream, WebSocketStream};
use url::Url;

use crate::error::{GatewayError, GatewayResult};
use crate::http::response::strip_hop_by_hop;

pub type UpstreamSocket = WebSocketStream<MaybeTlsStream<TcpStream>>;

/// Handshake headers the WebSocket client generates itself.
const CLIENT_HANDSHAKE: [HeaderName; 4] = [
    header::HOST,
    header::SEC_WEBSOCKET_KEY,
    header::SEC_WEBSOCKET_VERSION,
    header::SEC_WEBSOCKET_EXTENSIONS,
];

/// `Upgrade: websocket` together with a `Connection` header naming `upgrade`.
pub fn is_upgrade_request(headers: &HeaderMap) -> bool {
    let upgrade = headers
        .get(header::UPGRADE)
        .and_then(|v| v.to_str().ok())
        .is_some_and(|v| v.trim().eq_ignore_ascii_case("websocket"));
    let connection = headers
        .get_all(header::CONNECTION)
        .iter()
        .filter_map(|v| v.to_str().ok())
        .flat_map(|v| v.split(','))
        .any(|token| token.trim().eq_ignore_ascii_case("upgrade"));
    upgrade && connection
}

/// Client side of a handshake, parked on the exchange until the WebSocket
/// routing filter claims it.
#[derive(Clone)]
pub struct PendingUpgrade(Arc<Mutex<Option<WebSocketUpgrade>>>);

impl PendingUpgrade {
    pub fn new(upgrade: WebSocketUpgrade) -> Self {
        Self(Arc::new(Mutex::new(Some(upgrade))))
    }

    /// Claim the upgrade. Only the first caller gets it.
    pub fn take(&self) -> Option<WebSocketUpgrade> {
        self.0.lock().unwrap_or_else(PoisonError::into_inner).take()
    }
}

impl fmt::Debug for PendingUpgrade {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let claimed = self.0.lock().map(|u| u.is_none()).unwrap_or(true);
        f.debug_struct("PendingUpgrade").field("claimed", &claimed).finish()
    }
}

/// Open a WebSocket to `target` (an `http` URL), forwarding `headers`.
///
/// Returns the socket and the subprotocol the upstream selected, if any.
pub async fn connect_upstream(
    target: &Url,
    headers: &HeaderMap,
    timeout: Duration,
) -> GatewayResult<(UpstreamSocket, Option<String>)> {
    let authority = match (target.host_str(), target.port_or_known_default()) {
        (Some(host), Some(port)) => format!("{}:{}", host, port),
        _ => target.to_string(),
    };

    let mut ws_url = target.clone();
    if ws_url.set_scheme("ws").is_err() {
        return Err(GatewayError::UpstreamUnreachable {
            authority,
            reason: format!("cannot address '{}' as a websocket", target),
        });
    }
    let mut request = ws_url
        .as_str()
        .into_client_request()
        .map_err(|e| GatewayError::UpstreamUnreachable {
            authority: authority.clone(),
            reason: e.to_string(),
        })?;

    let mut forwarded = headers.clone();
    strip_hop_by_hop(&mut forwarded);
    for name in &CLIENT_HANDSHAKE {
        forwarded.remove(name);
    }
    request.headers_mut().extend(forwarded);

    let connecting = tokio_tungstenite::connect_async(request);
    let (socket, response) = match tokio::time::timeout(timeout, connecting).await {
        Ok(Ok(connected)) => connected,
        Ok(Err(e)) => return Err(classify(authority, e)),
        Err(_) => return Err(GatewayError::UpstreamTimeout { authority, timeout }),
    };

    let protocol = response
        .headers()
        .get(header::SEC_WEBSOCKET_PROTOCOL)
        .and_then(|v| v.to_str().ok())
        .map(str::to_string);
    tracing::debug!(authority = %authority, protocol = ?protocol, "Upstream websocket opened");
    Ok((socket, protocol))
}

fn classify(authority: String, err: tungstenite::Error) -> GatewayError {
    match err {
        tungstenite::Error::Io(_) | tungstenite::Error::Url(_) | tungstenite::Error::ConnectionClosed => {
            GatewayError::UpstreamUnreachable {
                authority,
                reason: err.to_string(),
            }
        }
        tungstenite::Error::Http(response) => GatewayError::UpstreamMalformedResponse {
            authority,
            reason: format!("upstream refused the websocket upgrade with {}", response.status()),
        },
        other => GatewayError::UpstreamMalformedResponse {
            authority,
            reason: other.to_string(),
        },
    }
}

/// Forward frames until either side goes away.
pub async fn relay(client: WebSocket, upstream: UpstreamSocket, request_id: String) {
    let (mut client_tx, mut client_rx) = client.split();
    let (mut upstream_tx, mut upstream_rx) = upstream.split();

    let client_to_upstream = async {
        while let Some(Ok(message)) = client_rx.next().await {
            let Some(message) = to_upstream(message) else {
                continue;
            };
            if upstream_tx.send(message).await.is_err() {
                break;
            }
        }
        let _ = upstream_tx.close().await;
    };

    let upstream_to_client = async {
        while let Some(Ok(message)) = upstream_rx.next().await {
            let Some(message) = to_client(message) else {
                continue;
            };
            if client_tx.send(message).await.is_err() {
                break;
            }
        }
        let _ = client_tx.close().await;
    };

    tokio::select! {
        _ = client_to_upstream => {}
        _ = upstream_to_client => {}
    }
    tracing::debug!(request_id = %request_id, "WebSocket relay finished");
}

fn to_upstream(message: ws::Message) -> Option<Message> {
    let message = match message {
        ws::Message::Text(text) => Message::Text(text.as_str().to_owned().into()),
        ws::Message::Binary(data) => Message::Binary(data),
        ws::Message::Close(frame) => Message::Close(frame.map(|f| CloseFrame {
            code: f.code.into(),
            reason: f.reason.as_str().to_owned().into(),
        })),
        ws::Message::Ping(_) | ws::Message::Pong(_) => return None,
    };
    Some(message)
}

fn to_client(message: Message) -> Option<ws::Message> {
    let message = match message {
        Message::Text(text) => ws::Message::Text(text.as_str().to_owned().into()),
        Message::Binary(data) => ws::Message::Binary(data),
        Message::Close(frame) => ws::Message::Close(frame.map(|f| ws::CloseFrame {
            code: f.code.into(),
            reason: f.reason.as_str().to_owned().into(),
        })),
        Message::Ping(_) | Message::Pong(_) | Message::Frame(_) => return None,
    };
    Some(message)
}

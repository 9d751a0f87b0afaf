pub mod packet;
mod polling;
mod websocket;

pub use polling::PollingTransport;
pub use websocket::WebSocketTransport;

use std::{fmt, str::FromStr, time::Duration};

use async_trait::async_trait;
use url::Url;

use super::TransportError;
use crate::config::RealtimeConfig;
use packet::{EnginePacket, Handshake};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum TransportKind {
    Polling,
    WebSocket,
}

impl TransportKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            TransportKind::Polling => "polling",
            TransportKind::WebSocket => "websocket",
        }
    }
}

impl fmt::Display for TransportKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for TransportKind {
    type Err = TransportError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "polling" | "long-polling" => Ok(TransportKind::Polling),
            "websocket" | "ws" => Ok(TransportKind::WebSocket),
            other => Err(TransportError::Protocol(format!("unknown transport {}", other))),
        }
    }
}

/// One open Engine.IO connection.
///
/// `recv` is cancel safe so it can sit in a `select!` next to outbound work.
#[async_trait]
pub trait Transport: Send {
    fn kind(&self) -> TransportKind;
    async fn send(&mut self, packets: Vec<EnginePacket>) -> Result<(), TransportError>;
    /// `Ok(None)` once the peer has closed the connection.
    async fn recv(&mut self) -> Result<Option<EnginePacket>, TransportError>;
    async fn close(&mut self);
}

/// Builds the Engine.IO endpoint for `kind`, switching to `ws`/`wss` for
/// WebSocket.
pub fn endpoint(base: &Url, path: &str, kind: TransportKind, sid: Option<&str>) -> Result<Url, TransportError> {
    let mut url = base
        .join(path)
        .map_err(|e| TransportError::InvalidUrl(format!("{}{}: {}", base, path, e)))?;

    if kind == TransportKind::WebSocket {
        let scheme = match url.scheme() {
            "https" | "wss" => "wss",
            _ => "ws",
        };
        url.set_scheme(scheme)
            .map_err(|_| TransportError::InvalidUrl(format!("cannot use {} with {}", scheme, url)))?;
    }

    {
        let mut query = url.query_pairs_mut();
        query.append_pair("EIO", "4").append_pair("transport", kind.as_str());
        if let Some(sid) = sid {
            query.append_pair("sid", sid);
        }
    }

    Ok(url)
}

/// Opens an Engine.IO session over `kind`, probing an upgrade from
/// long-polling to WebSocket when the server offers one.
pub async fn open(
    kind: TransportKind,
    base: &Url,
    config: &RealtimeConfig,
) -> Result<(Box<dyn Transport>, Handshake), TransportError> {
    match kind {
        TransportKind::WebSocket => {
            let url = endpoint(base, &config.path, TransportKind::WebSocket, None)?;
            let (transport, handshake) = WebSocketTransport::open(&url).await?;
            Ok((Box::new(transport), handshake))
        }
        TransportKind::Polling => {
            let url = endpoint(base, &config.path, TransportKind::Polling, None)?;
            let (mut polling, handshake) = PollingTransport::open(&url, poll_timeout(config)).await?;

            if !(config.upgrade && handshake.offers_websocket()) {
                return Ok((Box::new(polling), handshake));
            }

            let ws_url = endpoint(base, &config.path, TransportKind::WebSocket, Some(&handshake.sid))?;
            match WebSocketTransport::probe(&ws_url, config.connect_timeout()).await {
                Ok(mut websocket) => {
                    let backlog = polling.pause(config.connect_timeout()).await;
                    websocket.send(vec![EnginePacket::Upgrade]).await?;
                    websocket.prepend(backlog);
                    info!("Upgraded realtime session {} to websocket", handshake.sid);
                    Ok((Box::new(websocket), handshake))
                }
                Err(e) => {
                    warn!("WebSocket upgrade failed, staying on long-polling: {}", e);
                    Ok((Box::new(polling), handshake))
                }
            }
        }
    }
}

/// Long enough for one long-poll to be held open by the server.
fn poll_timeout(config: &RealtimeConfig) -> Duration {
    config.connect_timeout().max(Duration::from_secs(60))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_endpoints() {
        let base = Url::parse("https://api.tradewizard.example").unwrap();

        let polling = endpoint(&base, "/socket.io/", TransportKind::Polling, None).unwrap();
        assert_eq!(
            polling.as_str(),
            "https://api.tradewizard.example/socket.io/?EIO=4&transport=polling"
        );

        let ws = endpoint(&base, "/socket.io/", TransportKind::WebSocket, Some("abc")).unwrap();
        assert_eq!(
            ws.as_str(),
            "wss://api.tradewizard.example/socket.io/?EIO=4&transport=websocket&sid=abc"
        );

        let local = Url::parse("http://localhost:5000").unwrap();
        let ws = endpoint(&local, "/socket.io/", TransportKind::WebSocket, None).unwrap();
        assert_eq!(ws.scheme(), "ws");
    }

    #[test]
    fn test_transport_names() {
        assert_eq!("Polling".parse::<TransportKind>().unwrap(), TransportKind::Polling);
        assert_eq!("websocket".parse::<TransportKind>().unwrap(), TransportKind::WebSocket);
        assert!("smoke-signals".parse::<TransportKind>().is_err());
    }
}

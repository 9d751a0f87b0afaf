use std::{collections::VecDeque, time::Duration};

use async_trait::async_trait;
use futures_util::{SinkExt, StreamExt};
use tokio::net::TcpStream;
use tokio_tungstenite::{
    connect_async,
    tungstenite::{self, Message},
    MaybeTlsStream, WebSocketStream,
};
use url::Url;

use super::{
    packet::{EnginePacket, Handshake, PROBE},
    Transport, TransportKind,
};
use crate::runtime::TransportError;

type WsStream = WebSocketStream<MaybeTlsStream<TcpStream>>;

pub struct WebSocketTransport {
    stream: WsStream,
    /// Packets carried over from long-polling during an upgrade.
    backlog: VecDeque<EnginePacket>,
}

impl WebSocketTransport {
    async fn connect(url: &Url) -> Result<Self, TransportError> {
        debug!("Connecting websocket to {}", url);
        let (stream, _) = connect_async(url.as_str()).await?;
        Ok(Self {
            stream,
            backlog: VecDeque::new(),
        })
    }

    /// Fresh session: the server's first frame is the Engine.IO handshake.
    pub async fn open(url: &Url) -> Result<(Self, Handshake), TransportError> {
        let mut transport = Self::connect(url).await?;

        match transport.recv().await? {
            Some(EnginePacket::Open(handshake)) => Ok((transport, handshake)),
            Some(other) => Err(TransportError::Protocol(format!("expected open packet, got {:?}", other))),
            None => Err(TransportError::Closed),
        }
    }

    /// Joins an existing long-polling session and runs the `2probe`/`3probe`
    /// exchange. The caller finishes the upgrade by sending `5`.
    pub async fn probe(url: &Url, timeout: Duration) -> Result<Self, TransportError> {
        let probe = async {
            let mut transport = Self::connect(url).await?;
            transport.send(vec![EnginePacket::Ping(PROBE.to_string())]).await?;

            match transport.recv().await? {
                Some(EnginePacket::Pong(data)) if data == PROBE => Ok(transport),
                other => Err(TransportError::Protocol(format!("unexpected probe reply {:?}", other))),
            }
        };

        tokio::time::timeout(timeout, probe)
            .await
            .map_err(|_| TransportError::Timeout)?
    }

    pub fn prepend(&mut self, packets: Vec<EnginePacket>) {
        for packet in packets.into_iter().rev() {
            self.backlog.push_front(packet);
        }
    }
}

#[async_trait]
impl Transport for WebSocketTransport {
    fn kind(&self) -> TransportKind {
        TransportKind::WebSocket
    }

    async fn send(&mut self, packets: Vec<EnginePacket>) -> Result<(), TransportError> {
        for packet in packets {
            self.stream.feed(Message::Text(packet.encode())).await?;
        }
        self.stream.flush().await?;
        Ok(())
    }

    async fn recv(&mut self) -> Result<Option<EnginePacket>, TransportError> {
        if let Some(packet) = self.backlog.pop_front() {
            return Ok(Some(packet));
        }

        loop {
            match self.stream.next().await {
                None => return Ok(None),
                Some(Ok(Message::Text(text))) => return EnginePacket::decode(&text).map(Some),
                Some(Ok(Message::Close(frame))) => {
                    debug!("WebSocket closed by server: {:?}", frame);
                    return Ok(None);
                }
                Some(Ok(Message::Binary(data))) => {
                    debug!("Ignoring {} byte binary frame", data.len());
                }
                // control frames are answered by tungstenite
                Some(Ok(_)) => {}
                Some(Err(tungstenite::Error::ConnectionClosed | tungstenite::Error::AlreadyClosed)) => {
                    return Ok(None)
                }
                Some(Err(e)) => return Err(e.into()),
            }
        }
    }

    async fn close(&mut self) {
        if let Err(e) = self.stream.close(None).await {
            debug!("WebSocket close: {}", e);
        }
    }
}

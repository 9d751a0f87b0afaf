use std::{
    sync::{
        atomic::{AtomicBool, Ordering},
        Arc,
    },
    time::Duration,
};

use async_trait::async_trait;
use reqwest::{header, Client};
use tokio::{sync::mpsc, task::JoinHandle};
use url::Url;

use super::{
    packet::{decode_payload, encode_payload, EnginePacket, Handshake},
    Transport, TransportKind,
};
use crate::runtime::TransportError;

type Inbound = Result<EnginePacket, TransportError>;

/// Engine.IO over HTTP long-polling. A background task keeps one GET in
/// flight and feeds decoded packets into a channel; writes are POSTs.
pub struct PollingTransport {
    client: Client,
    url: Url,
    inbound: mpsc::UnboundedReceiver<Inbound>,
    paused: Arc<AtomicBool>,
    reader: JoinHandle<()>,
}

impl PollingTransport {
    pub async fn open(url: &Url, poll_timeout: Duration) -> Result<(Self, Handshake), TransportError> {
        let client = Client::builder().cookie_store(true).timeout(poll_timeout).build()?;

        debug!("Opening long-polling session at {}", url);
        let mut packets = poll_once(&client, url).await?.into_iter();

        let handshake = match packets.next() {
            Some(EnginePacket::Open(handshake)) => handshake,
            other => {
                return Err(TransportError::Protocol(format!(
                    "expected open packet, got {:?}",
                    other
                )))
            }
        };

        let mut session_url = url.clone();
        session_url.query_pairs_mut().append_pair("sid", &handshake.sid);

        let (tx, inbound) = mpsc::unbounded_channel();
        for packet in packets {
            let _ = tx.send(Ok(packet));
        }

        let paused = Arc::new(AtomicBool::new(false));
        let reader = tokio::spawn(read_loop(
            client.clone(),
            session_url.clone(),
            tx,
            Arc::clone(&paused),
        ));

        Ok((
            Self {
                client,
                url: session_url,
                inbound,
                paused,
                reader,
            },
            handshake,
        ))
    }

    /// Lets the in-flight poll finish without starting another, then returns
    /// anything that was received but not yet consumed.
    pub async fn pause(&mut self, timeout: Duration) -> Vec<EnginePacket> {
        self.paused.store(true, Ordering::SeqCst);

        if tokio::time::timeout(timeout, &mut self.reader).await.is_err() {
            warn!("Pending long-poll did not finish within {:?}, dropping it", timeout);
            self.reader.abort();
        }

        let mut backlog = Vec::new();
        while let Ok(item) = self.inbound.try_recv() {
            match item {
                Ok(packet) => backlog.push(packet),
                Err(e) => debug!("Discarding long-poll error during upgrade: {}", e),
            }
        }
        backlog
    }
}

impl Drop for PollingTransport {
    fn drop(&mut self) {
        self.reader.abort();
    }
}

#[async_trait]
impl Transport for PollingTransport {
    fn kind(&self) -> TransportKind {
        TransportKind::Polling
    }

    async fn send(&mut self, packets: Vec<EnginePacket>) -> Result<(), TransportError> {
        if packets.is_empty() {
            return Ok(());
        }

        self.client
            .post(self.url.clone())
            .header(header::CONTENT_TYPE, "text/plain;charset=UTF-8")
            .body(encode_payload(&packets))
            .send()
            .await?
            .error_for_status()?;
        Ok(())
    }

    async fn recv(&mut self) -> Result<Option<EnginePacket>, TransportError> {
        match self.inbound.recv().await {
            Some(Ok(packet)) => Ok(Some(packet)),
            Some(Err(e)) => Err(e),
            None => Ok(None),
        }
    }

    async fn close(&mut self) {
        if let Err(e) = self.send(vec![EnginePacket::Close]).await {
            debug!("Long-poll close: {}", e);
        }
        self.reader.abort();
    }
}

async fn poll_once(client: &Client, url: &Url) -> Result<Vec<EnginePacket>, TransportError> {
    let payload = client.get(url.clone()).send().await?.error_for_status()?.text().await?;
    decode_payload(&payload)
}

async fn read_loop(client: Client, url: Url, tx: mpsc::UnboundedSender<Inbound>, paused: Arc<AtomicBool>) {
    while !paused.load(Ordering::SeqCst) {
        match poll_once(&client, &url).await {
            Ok(packets) => {
                for packet in packets {
                    let closing = packet == EnginePacket::Close;
                    if tx.send(Ok(packet)).is_err() || closing {
                        return;
                    }
                }
            }
            Err(e) => {
                let _ = tx.send(Err(e));
                return;
            }
        }
    }
}

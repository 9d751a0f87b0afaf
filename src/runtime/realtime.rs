use std::{collections::VecDeque, time::Duration};

use serde_json::Value;
use tokio::{
    sync::{
        broadcast,
        mpsc::{self, error::TrySendError},
        watch,
    },
    task::JoinHandle,
    time::{sleep, sleep_until, timeout, Instant},
};
use url::Url;

use super::{
    transport::{
        self,
        packet::{rejection_reason, EnginePacket, Handshake, SocketPacket},
        Transport,
    },
    ClientEvent, EventKind, RealtimeEvent, RuntimeError, Subscription, TransportError,
};
use crate::config::RealtimeConfig;

const EVENT_BUFFER: usize = 256;
const CLOSE_GRACE: Duration = Duration::from_secs(5);

/// Handle to the background Socket.IO connection.
///
/// Connecting happens in the background. Failures only show up as
/// `is_connected() == false`, and emits made while disconnected are held (up
/// to `emit_buffer`) and flushed on the next successful connect. Joined rooms
/// are re-joined on every reconnect. Dropping the handle aborts the
/// connection task.
pub struct RealtimeClient {
    commands: mpsc::Sender<ClientEvent>,
    connected: watch::Receiver<bool>,
    last_event: watch::Receiver<Option<RealtimeEvent>>,
    /// Never read, only resubscribed. The driver owns the sender, so every
    /// subscription ends once the driver stops.
    events: broadcast::Receiver<RealtimeEvent>,
    shutdown: broadcast::Sender<()>,
    task: JoinHandle<()>,
}

impl RealtimeClient {
    pub fn connect(base_url: &Url, config: &RealtimeConfig, token: Option<&str>) -> Result<Self, RuntimeError> {
        let token = token
            .map(str::trim)
            .filter(|t| !t.is_empty())
            .ok_or(RuntimeError::MissingToken)?;

        let (commands, commands_rx) = mpsc::channel(config.emit_buffer.max(1));
        let (connected_tx, connected) = watch::channel(false);
        let (last_event_tx, last_event) = watch::channel(None);
        let (events_tx, events) = broadcast::channel(EVENT_BUFFER);
        let (shutdown, shutdown_rx) = broadcast::channel(1);

        let driver = Driver {
            base_url: base_url.clone(),
            config: config.clone(),
            token: token.to_string(),
            commands: commands_rx,
            pending: VecDeque::new(),
            rooms: Vec::new(),
            connected: connected_tx,
            last_event: last_event_tx,
            events: events_tx,
            shutdown: shutdown_rx,
        };
        let task = tokio::spawn(driver.run());

        Ok(Self {
            commands,
            connected,
            last_event,
            events,
            shutdown,
            task,
        })
    }

    pub fn is_connected(&self) -> bool {
        *self.connected.borrow()
    }

    pub fn watch_connected(&self) -> watch::Receiver<bool> {
        self.connected.clone()
    }

    pub fn last_event(&self) -> Option<RealtimeEvent> {
        self.last_event.borrow().clone()
    }

    /// True once the client was closed or gave up reconnecting.
    pub fn is_finished(&self) -> bool {
        self.task.is_finished()
    }

    pub fn subscribe(&self, kind: EventKind) -> Subscription {
        Subscription::new(self.events.resubscribe(), Some(kind))
    }

    pub fn subscribe_all(&self) -> Subscription {
        Subscription::new(self.events.resubscribe(), None)
    }

    pub fn emit(&self, event: ClientEvent) -> Result<(), RuntimeError> {
        debug!("Queueing realtime event {}", event.name());
        match self.commands.try_send(event) {
            Ok(()) => Ok(()),
            Err(TrySendError::Full(event)) => {
                warn!("Realtime emit buffer is full, dropping {}", event.name());
                Err(RuntimeError::BufferFull)
            }
            Err(TrySendError::Closed(_)) => Err(RuntimeError::Closed),
        }
    }

    pub fn join_chat(&self, user_id: &str) -> Result<(), RuntimeError> {
        self.emit(ClientEvent::JoinChat {
            user_id: user_id.to_string(),
        })
    }

    pub fn leave_chat(&self, user_id: &str) -> Result<(), RuntimeError> {
        self.emit(ClientEvent::LeaveChat {
            user_id: user_id.to_string(),
        })
    }

    pub fn join_admin_chat(&self, admin_id: &str) -> Result<(), RuntimeError> {
        self.emit(ClientEvent::JoinAdminChat {
            admin_id: admin_id.to_string(),
        })
    }

    pub fn leave_admin_chat(&self, admin_id: &str) -> Result<(), RuntimeError> {
        self.emit(ClientEvent::LeaveAdminChat {
            admin_id: admin_id.to_string(),
        })
    }

    pub fn send_message(&self, conversation_id: &str, text: &str) -> Result<(), RuntimeError> {
        self.emit(ClientEvent::SendMessage {
            conversation_id: conversation_id.to_string(),
            text: text.to_string(),
        })
    }

    /// Sends a Socket.IO disconnect, closes the transport and waits for the
    /// connection task. Every subscription ends afterwards.
    pub async fn close(mut self) {
        let _ = self.shutdown.send(());

        if timeout(CLOSE_GRACE, &mut self.task).await.is_err() {
            warn!("Realtime task did not stop within {:?}, aborting", CLOSE_GRACE);
            self.task.abort();
        }
        info!("Realtime client closed");
    }
}

impl Drop for RealtimeClient {
    fn drop(&mut self) {
        self.task.abort();
    }
}

enum SessionEnd {
    Dropped,
    Closed,
}

struct Driver {
    base_url: Url,
    config: RealtimeConfig,
    token: String,
    commands: mpsc::Receiver<ClientEvent>,
    /// Emits taken off the queue but not yet written to a transport.
    pending: VecDeque<ClientEvent>,
    /// Joins that reached the server and were not left since.
    rooms: Vec<ClientEvent>,
    connected: watch::Sender<bool>,
    last_event: watch::Sender<Option<RealtimeEvent>>,
    events: broadcast::Sender<RealtimeEvent>,
    shutdown: broadcast::Receiver<()>,
}

impl Driver {
    async fn run(mut self) {
        let mut failures = 0u32;

        loop {
            let attempt = tokio::select! {
                result = timeout(
                    self.config.connect_timeout(),
                    open_session(&self.base_url, &self.config, &self.token),
                ) => result.unwrap_or(Err(TransportError::Timeout)),
                _ = self.shutdown.recv() => break,
            };

            match attempt {
                Ok((transport, handshake)) => {
                    failures = 0;
                    self.connected.send_replace(true);
                    let end = self.session(transport, &handshake).await;
                    self.connected.send_replace(false);

                    if let SessionEnd::Closed = end {
                        break;
                    }
                    warn!("Realtime connection lost, reconnecting");
                }
                Err(e) => warn!("Realtime connect failed: {}", e),
            }

            failures += 1;
            if failures > self.config.reconnect_attempts {
                error!(
                    "Realtime giving up after {} reconnect attempts",
                    self.config.reconnect_attempts
                );
                break;
            }

            tokio::select! {
                _ = sleep(self.config.reconnect_delay()) => {}
                _ = self.shutdown.recv() => break,
            }
            debug!("Realtime reconnect attempt {}/{}", failures, self.config.reconnect_attempts);
        }

        self.connected.send_replace(false);
    }

    async fn session(&mut self, mut transport: Box<dyn Transport>, handshake: &Handshake) -> SessionEnd {
        info!("Realtime connected over {} (sid {})", transport.kind(), handshake.sid);

        let silence = Duration::from_millis(handshake.ping_interval + handshake.ping_timeout);
        let mut deadline = Instant::now() + silence;

        if let Err(e) = self.rejoin(transport.as_mut()).await {
            warn!("Failed to rejoin realtime rooms: {}", e);
            return SessionEnd::Dropped;
        }
        if let Err(e) = self.flush(transport.as_mut()).await {
            warn!("Failed to flush queued realtime events: {}", e);
            return SessionEnd::Dropped;
        }

        loop {
            tokio::select! {
                packet = transport.recv() => match packet {
                    Ok(Some(packet)) => {
                        deadline = Instant::now() + silence;
                        if !self.handle_packet(transport.as_mut(), packet).await {
                            transport.close().await;
                            return SessionEnd::Dropped;
                        }
                    }
                    Ok(None) => {
                        info!("Realtime transport closed by server");
                        return SessionEnd::Dropped;
                    }
                    Err(e) => {
                        warn!("Realtime transport error: {}", e);
                        return SessionEnd::Dropped;
                    }
                },
                command = self.commands.recv() => match command {
                    Some(event) => {
                        self.pending.push_back(event);
                        if let Err(e) = self.flush(transport.as_mut()).await {
                            warn!("Failed to send realtime event, will retry after reconnect: {}", e);
                            return SessionEnd::Dropped;
                        }
                    }
                    None => {
                        disconnect(transport.as_mut()).await;
                        return SessionEnd::Closed;
                    }
                },
                _ = sleep_until(deadline) => {
                    warn!("No heartbeat from server for {:?}", silence);
                    transport.close().await;
                    return SessionEnd::Dropped;
                }
                _ = self.shutdown.recv() => {
                    disconnect(transport.as_mut()).await;
                    return SessionEnd::Closed;
                }
            }
        }
    }

    async fn flush(&mut self, transport: &mut dyn Transport) -> Result<(), TransportError> {
        if self.pending.is_empty() {
            return Ok(());
        }

        let packets = self.pending.iter().map(ClientEvent::to_packet).collect();
        transport.send(packets).await?;
        debug!("Sent {} realtime events", self.pending.len());
        for event in self.pending.drain(..) {
            track_room(&mut self.rooms, event);
        }
        Ok(())
    }

    /// A new connection starts in no rooms.
    async fn rejoin(&self, transport: &mut dyn Transport) -> Result<(), TransportError> {
        if self.rooms.is_empty() {
            return Ok(());
        }

        let packets = self.rooms.iter().map(ClientEvent::to_packet).collect();
        transport.send(packets).await?;
        info!("Rejoined {} realtime rooms", self.rooms.len());
        Ok(())
    }

    /// Returns false when the session should be torn down.
    async fn handle_packet(&mut self, transport: &mut dyn Transport, packet: EnginePacket) -> bool {
        match packet {
            EnginePacket::Ping(data) => match transport.send(vec![EnginePacket::Pong(data)]).await {
                Ok(()) => true,
                Err(e) => {
                    warn!("Failed to answer heartbeat: {}", e);
                    false
                }
            },
            EnginePacket::Close => {
                info!("Server closed the realtime session");
                false
            }
            EnginePacket::Message(text) => match SocketPacket::decode(&text) {
                Ok(Some(SocketPacket::Event { name, data })) => {
                    self.dispatch(&name, data);
                    true
                }
                Ok(Some(SocketPacket::Disconnect)) => {
                    warn!("Server disconnected the socket");
                    false
                }
                Ok(Some(other)) => {
                    debug!("Ignoring socket packet {:?}", other);
                    true
                }
                Ok(None) => true,
                Err(e) => {
                    warn!("Undecodable socket packet {:?}: {}", text, e);
                    true
                }
            },
            EnginePacket::Pong(_) | EnginePacket::Noop | EnginePacket::Upgrade | EnginePacket::Open(_) => true,
        }
    }

    fn dispatch(&self, name: &str, data: Value) {
        match RealtimeEvent::decode(name, data) {
            Some(Ok(event)) => {
                debug!("Realtime event {}", name);
                self.last_event.send_replace(Some(event.clone()));
                // no subscribers is fine
                let _ = self.events.send(event);
            }
            Some(Err(e)) => warn!("Malformed {} payload: {}", name, e),
            None => debug!("Ignoring realtime event {}", name),
        }
    }
}

fn track_room(rooms: &mut Vec<ClientEvent>, event: ClientEvent) {
    match &event {
        ClientEvent::JoinChat { .. } | ClientEvent::JoinAdminChat { .. } => {
            if !rooms.contains(&event) {
                rooms.push(event);
            }
        }
        ClientEvent::LeaveChat { user_id } => {
            rooms.retain(|room| !matches!(room, ClientEvent::JoinChat { user_id: joined } if joined == user_id))
        }
        ClientEvent::LeaveAdminChat { admin_id } => {
            rooms.retain(|room| !matches!(room, ClientEvent::JoinAdminChat { admin_id: joined } if joined == admin_id))
        }
        ClientEvent::SendMessage { .. } => {}
    }
}

/// Tries each configured transport in order and completes the Socket.IO
/// connect on the first one that opens.
async fn open_session(
    base_url: &Url,
    config: &RealtimeConfig,
    token: &str,
) -> Result<(Box<dyn Transport>, Handshake), TransportError> {
    let mut last_error = TransportError::Closed;

    for kind in &config.transports {
        match transport::open(*kind, base_url, config).await {
            Ok((mut transport, handshake)) => match socket_connect(transport.as_mut(), token).await {
                Ok(()) => return Ok((transport, handshake)),
                Err(e) => {
                    transport.close().await;
                    if let TransportError::Rejected(_) = e {
                        return Err(e);
                    }
                    debug!("Socket connect over {} failed: {}", kind, e);
                    last_error = e;
                }
            },
            Err(e) => {
                debug!("Transport {} failed to open: {}", kind, e);
                last_error = e;
            }
        }
    }

    Err(last_error)
}

async fn socket_connect(transport: &mut dyn Transport, token: &str) -> Result<(), TransportError> {
    transport
        .send(vec![SocketPacket::connect_with_token(token).into_engine()])
        .await?;

    loop {
        match transport.recv().await? {
            Some(EnginePacket::Ping(data)) => transport.send(vec![EnginePacket::Pong(data)]).await?,
            Some(EnginePacket::Message(text)) => match SocketPacket::decode(&text)? {
                Some(SocketPacket::Connect(_)) => return Ok(()),
                Some(SocketPacket::ConnectError(data)) => {
                    return Err(TransportError::Rejected(rejection_reason(&data)))
                }
                _ => continue,
            },
            Some(EnginePacket::Close) | None => return Err(TransportError::Closed),
            Some(_) => continue,
        }
    }
}

async fn disconnect(transport: &mut dyn Transport) {
    if let Err(e) = transport.send(vec![SocketPacket::Disconnect.into_engine()]).await {
        debug!("Socket disconnect: {}", e);
    }
    transport.close().await;
}

//! Client role: finds servers and keeps one session to the chosen one

use std::time::Duration;

use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio_rustls::TlsConnector;

use crate::crypto::{tls, HostIdentity};
use crate::device::Device;
use crate::discovery::{DiscoveryEvent, DiscoveryService};
use crate::protocol::{Packet, Snapshot};
use crate::store::{SharedStore, TrustScope};
use crate::sync::connection::{SessionReader, SessionWriter};
use crate::sync::event::SyncEvent;
use crate::sync::framing::check_frame_size;
use crate::sync::handshake::{self, verify_pinned, Established, HandshakeOutcome};
use crate::{Config, Error, Result};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ClientState {
    Idle,
    Discovering,
    Connecting,
    /// Server certificate not pinned yet; waiting for approve or reject
    Authenticating,
    Connected,
    Disconnected,
}

/// Message from the client's background tasks to its owner
pub enum ClientEvent {
    Discovery(DiscoveryEvent),
    Handshake {
        attempt: u64,
        server: Device,
        result: Result<Established>,
    },
    Frame { conn_id: u64, snapshot: Snapshot },
    Closed { conn_id: u64, reason: String },
}

struct ClientSession {
    server: Device,
    conn_id: u64,
    cert: Vec<u8>,
    writer: SessionWriter,
    reader: JoinHandle<()>,
}

impl ClientSession {
    async fn close(self) {
        self.reader.abort();
        self.writer.close().await;
    }
}

pub struct SyncClient {
    device_name: String,
    connector: TlsConnector,
    store: SharedStore,
    send_timeout: Duration,
    handshake_timeout: Duration,
    auto_connect: bool,
    state: ClientState,
    servers: Vec<Device>,
    discovery: Option<DiscoveryService>,
    discovery_rx: Option<mpsc::Receiver<DiscoveryEvent>>,
    /// Bumped on every connect so results of abandoned attempts are ignored
    attempt: u64,
    connecting: Option<JoinHandle<()>>,
    /// Open while Authenticating or Connected; only a Connected session syncs
    session: Option<ClientSession>,
    events_tx: mpsc::UnboundedSender<ClientEvent>,
    events_rx: mpsc::UnboundedReceiver<ClientEvent>,
}

impl SyncClient {
    /// Start the client role, browsing for servers when discovery is enabled
    pub fn start(config: &Config, identity: &HostIdentity, store: SharedStore) -> Result<Self> {
        let connector = tls::connector(identity)?;

        let (discovery, discovery_rx) = if config.discovery {
            let (service, rx) = DiscoveryService::browse(&config.service_type);
            (Some(service), Some(rx))
        } else {
            (None, None)
        };

        let (events_tx, events_rx) = mpsc::unbounded_channel();

        Ok(Self {
            device_name: config.device_name.clone(),
            connector,
            store,
            send_timeout: config.send_timeout(),
            handshake_timeout: config.handshake_timeout(),
            auto_connect: config.auto_connect,
            state: if discovery.is_some() {
                ClientState::Discovering
            } else {
                ClientState::Idle
            },
            servers: Vec::new(),
            discovery,
            discovery_rx,
            attempt: 0,
            connecting: None,
            session: None,
            events_tx,
            events_rx,
        })
    }

    pub fn state(&self) -> ClientState {
        self.state
    }

    /// Discovered servers in the order they appeared
    pub fn servers(&self) -> &[Device] {
        &self.servers
    }

    /// The server we have an open session with
    pub fn connected_server(&self) -> Option<&Device> {
        match self.state {
            ClientState::Connected => self.session.as_ref().map(|s| &s.server),
            _ => None,
        }
    }

    /// Next background event. Cancel safe.
    pub async fn recv_event(&mut self) -> Option<ClientEvent> {
        tokio::select! {
            Some(event) = self.events_rx.recv() => Some(event),
            Some(event) = next_discovery(&mut self.discovery_rx) => Some(ClientEvent::Discovery(event)),
            else => None,
        }
    }

    pub async fn handle_event(&mut self, event: ClientEvent) -> Vec<SyncEvent> {
        match event {
            ClientEvent::Discovery(DiscoveryEvent::Found(server)) => self.on_found(server).await,
            ClientEvent::Discovery(DiscoveryEvent::Gone(server)) => {
                let before = self.servers.len();
                self.servers.retain(|d| d != &server);
                if self.servers.len() == before {
                    return Vec::new();
                }
                tracing::info!("server gone: {}", server);
                vec![
                    SyncEvent::ServerGone(server),
                    SyncEvent::ServerListChanged(self.servers.clone()),
                ]
            }
            ClientEvent::Handshake {
                attempt,
                server,
                result,
            } => {
                if attempt != self.attempt {
                    return Vec::new();
                }
                self.connecting = None;
                self.on_handshake(server, result).await
            }
            ClientEvent::Frame { conn_id, snapshot } => match &self.session {
                Some(session)
                    if session.conn_id == conn_id
                        && self.state == ClientState::Connected
                        && !snapshot.is_empty() =>
                {
                    tracing::debug!("snapshot of {} item(s) from {}", snapshot.len(), session.server);
                    vec![SyncEvent::SyncReceived(snapshot)]
                }
                _ => Vec::new(),
            },
            ClientEvent::Closed { conn_id, reason } => {
                if !self.session.as_ref().is_some_and(|s| s.conn_id == conn_id) {
                    return Vec::new();
                }
                tracing::info!("session closed: {}", reason);
                let awaiting = self.state == ClientState::Authenticating;
                let server = self.session.as_ref().map(|s| s.server.clone());
                let mut events = self.drop_session().await;
                self.state = ClientState::Disconnected;
                if let (true, Some(server)) = (awaiting, server) {
                    events.push(SyncEvent::ConnectionError(format!(
                        "{} closed the connection before approval: {}",
                        server, reason
                    )));
                }
                events
            }
        }
    }

    async fn on_found(&mut self, server: Device) -> Vec<SyncEvent> {
        if self.servers.contains(&server) {
            return Vec::new();
        }
        tracing::info!("found server: {}", server);
        self.servers.push(server.clone());

        let mut events = vec![
            SyncEvent::ServerFound(server.clone()),
            SyncEvent::ServerListChanged(self.servers.clone()),
        ];

        let idle = matches!(
            self.state,
            ClientState::Idle | ClientState::Discovering | ClientState::Disconnected
        );
        if self.auto_connect && idle && self.store.has_pinned_cert(TrustScope::Server, &server.name) {
            tracing::info!("auto-connecting to trusted server {}", server);
            events.extend(self.connect(server).await);
        }
        events
    }

    async fn on_handshake(&mut self, server: Device, result: Result<Established>) -> Vec<SyncEvent> {
        let established = match result {
            Ok(established) => established,
            Err(e) => {
                tracing::warn!("connecting to {} failed: {}", server, e);
                self.state = self.resting_state();
                return vec![SyncEvent::ConnectionError(format!("{}: {}", server, e))];
            }
        };

        let outcome = verify_pinned(
            self.store.as_ref(),
            TrustScope::Server,
            &server.name,
            established.connection.peer_cert(),
        );
        match outcome {
            HandshakeOutcome::Trusted => {
                self.open_session(established);
                self.connected()
            }
            HandshakeOutcome::UntrustedAwaitDecision => {
                // The reader runs from now on so a close during the wait is seen
                tracing::info!("server {} awaiting approval", server);
                self.open_session(established);
                self.state = ClientState::Authenticating;
                vec![SyncEvent::AuthRequest(server)]
            }
            HandshakeOutcome::Failed(reason) => {
                tracing::warn!("rejecting server {}: {}", server, reason);
                close_established(established, self.send_timeout).await;
                self.state = self.resting_state();
                vec![SyncEvent::ConnectionError(format!("{}: {}", server, reason))]
            }
        }
    }

    /// Open a session with `server`, replacing any current one
    pub async fn connect(&mut self, server: Device) -> Vec<SyncEvent> {
        let events = self.reset().await;

        self.attempt += 1;
        let attempt = self.attempt;
        let connector = self.connector.clone();
        let local_name = self.device_name.clone();
        let timeout = self.handshake_timeout;
        let tx = self.events_tx.clone();

        tracing::info!("connecting to {}", server);
        self.state = ClientState::Connecting;
        self.connecting = Some(tokio::spawn(async move {
            let result = handshake::connect(&connector, &server, &local_name, timeout).await;
            let _ = tx.send(ClientEvent::Handshake {
                attempt,
                server,
                result,
            });
        }));

        events
    }

    /// Trust the server we are waiting on: pin its certificate and use the session
    pub fn approve(&mut self, server: &Device) -> Result<Vec<SyncEvent>> {
        let session = self.awaiting(server)?;
        self.store.pin_cert(TrustScope::Server, &server.name, &session.cert)?;

        tracing::info!("approved server {}", server);
        Ok(self.connected())
    }

    /// Close the session awaiting approval without pinning anything
    pub async fn reject(&mut self, server: &Device) -> Result<()> {
        self.awaiting(server)?;
        if let Some(session) = self.session.take() {
            session.close().await;
        }
        self.state = self.resting_state();
        tracing::info!("rejected server {}", server);
        Ok(())
    }

    /// Send a local snapshot to the server. A failed write ends the session;
    /// a snapshot too large to frame is skipped and the session kept.
    pub async fn send_local(&mut self, snapshot: &Snapshot) -> Result<Vec<SyncEvent>> {
        let session = match (&mut self.session, self.state) {
            (Some(session), ClientState::Connected) => session,
            _ => return Err(Error::NotConnected),
        };

        let payload = Packet::Sync(snapshot.clone()).encode();
        if let Err(e) = check_frame_size(payload.len()) {
            tracing::warn!("not sending snapshot to {}: {}", session.server, e);
            return Ok(vec![SyncEvent::ConnectionError(e.to_string())]);
        }

        let sent = session.writer.send_payload(&payload).await;
        match sent {
            Ok(()) => Ok(Vec::new()),
            Err(e) => {
                let server = session.server.clone();
                tracing::warn!("send to {} failed: {}", server, e);
                let mut events = vec![SyncEvent::ConnectionError(format!("{}: {}", server, e))];
                events.extend(self.drop_session().await);
                self.state = ClientState::Disconnected;
                Ok(events)
            }
        }
    }

    /// Close the session and cancel any handshake in flight
    pub async fn disconnect(&mut self) -> Vec<SyncEvent> {
        let events = self.reset().await;
        self.state = self.resting_state();
        events
    }

    /// Disconnect and stop browsing
    pub async fn dispose(mut self) {
        self.reset().await;
        self.discovery_rx = None;
        if let Some(discovery) = self.discovery.take() {
            discovery.shutdown().await;
        }
        tracing::info!("sync client stopped");
    }

    async fn reset(&mut self) -> Vec<SyncEvent> {
        self.attempt += 1;
        if let Some(task) = self.connecting.take() {
            task.abort();
        }
        self.drop_session().await
    }

    /// Where the client rests without a session
    fn resting_state(&self) -> ClientState {
        if self.discovery.is_some() {
            ClientState::Discovering
        } else {
            ClientState::Idle
        }
    }

    /// The session held for an approval decision on `server`
    fn awaiting(&self, server: &Device) -> Result<&ClientSession> {
        match &self.session {
            Some(session) if self.state == ClientState::Authenticating && &session.server == server => {
                Ok(session)
            }
            _ => Err(Error::UnknownDevice(server.clone())),
        }
    }

    fn open_session(&mut self, established: Established) {
        let Established { connection, peer } = established;
        let conn_id = self.attempt;
        let cert = connection.peer_cert().to_vec();
        let (reader, writer) = connection.into_split(self.send_timeout);
        let reader = tokio::spawn(read_loop(reader, conn_id, self.events_tx.clone()));

        self.session = Some(ClientSession {
            server: peer,
            conn_id,
            cert,
            writer,
            reader,
        });
    }

    fn connected(&mut self) -> Vec<SyncEvent> {
        let Some(session) = &self.session else {
            return Vec::new();
        };
        tracing::info!("connected to server {}", session.server);
        self.state = ClientState::Connected;

        vec![SyncEvent::ServerStatusChanged {
            connected: true,
            server: session.server.clone(),
        }]
    }

    /// Close the session; only a Connected one reports a status change
    async fn drop_session(&mut self) -> Vec<SyncEvent> {
        let Some(session) = self.session.take() else {
            return Vec::new();
        };
        let was_connected = self.state == ClientState::Connected;
        let server = session.server.clone();
        session.close().await;

        if !was_connected {
            return Vec::new();
        }
        vec![SyncEvent::ServerStatusChanged {
            connected: false,
            server,
        }]
    }
}

async fn next_discovery(rx: &mut Option<mpsc::Receiver<DiscoveryEvent>>) -> Option<DiscoveryEvent> {
    match rx {
        Some(rx) => rx.recv().await,
        None => std::future::pending().await,
    }
}

async fn close_established(established: Established, send_timeout: Duration) {
    let (_, writer) = established.connection.into_split(send_timeout);
    writer.close().await;
}

async fn read_loop(mut reader: SessionReader, conn_id: u64, events: mpsc::UnboundedSender<ClientEvent>) {
    let reason = loop {
        match reader.recv().await {
            Ok(Packet::Sync(snapshot)) => {
                if events.send(ClientEvent::Frame { conn_id, snapshot }).is_err() {
                    return;
                }
            }
            Ok(Packet::Hello(_)) => break "unexpected hello after handshake".to_string(),
            Err(e) => break e.to_string(),
        }
    };

    let _ = events.send(ClientEvent::Closed { conn_id, reason });
}

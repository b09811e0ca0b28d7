//! Server role: accepts client sessions and relays snapshots between them

use std::collections::HashMap;
use std::net::{IpAddr, Ipv4Addr, SocketAddr};
use std::sync::Arc;
use std::time::Duration;

use tokio::net::TcpListener;
use tokio::sync::mpsc;
use tokio::task::{JoinHandle, JoinSet};
use tokio_rustls::TlsAcceptor;

use crate::crypto::{tls, HostIdentity};
use crate::device::Device;
use crate::discovery::{self, DiscoveryService};
use crate::protocol::{Packet, Snapshot};
use crate::store::{SharedStore, TrustScope};
use crate::sync::connection::{SessionReader, SessionWriter};
use crate::sync::event::SyncEvent;
use crate::sync::framing::check_frame_size;
use crate::sync::handshake::{self, verify_pinned, Established, HandshakeOutcome};
use crate::{Config, Error, Result};

/// Authentication state of one client session
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionState {
    /// Certificate not pinned yet; frames are dropped until approved
    Pending,
    Authenticated,
}

/// Message from the server's background tasks to its owner
pub enum ServerEvent {
    Accepted(Established),
    HandshakeFailed { addr: SocketAddr, reason: String },
    Frame { client: Device, conn_id: u64, snapshot: Snapshot },
    Closed { client: Device, conn_id: u64, reason: String },
}

struct ServerSession {
    conn_id: u64,
    state: SessionState,
    cert: Vec<u8>,
    writer: SessionWriter,
    reader: JoinHandle<()>,
}

impl ServerSession {
    async fn close(self) {
        self.reader.abort();
        self.writer.close().await;
    }
}

/// A listening server and its client sessions.
///
/// Background tasks only report through [`ServerEvent`]s; session state is
/// changed exclusively by the owner through `handle_event` and the other
/// `&mut self` methods.
pub struct SyncServer {
    device: Device,
    store: SharedStore,
    send_timeout: Duration,
    accept_task: JoinHandle<()>,
    advertiser: Option<DiscoveryService>,
    sessions: HashMap<Device, ServerSession>,
    next_conn_id: u64,
    events_tx: mpsc::UnboundedSender<ServerEvent>,
    events_rx: mpsc::UnboundedReceiver<ServerEvent>,
}

impl SyncServer {
    /// Bind the listener, start advertising and accept clients
    pub async fn start(config: &Config, identity: &HostIdentity, store: SharedStore) -> Result<Self> {
        let acceptor = tls::acceptor(identity)?;

        let addr: SocketAddr = ([0, 0, 0, 0], config.port).into();
        let listener = TcpListener::bind(addr)
            .await
            .map_err(|e| Error::Network(format!("failed to bind port {}: {}", config.port, e)))?;

        let port = listener
            .local_addr()
            .map_err(|e| Error::Network(e.to_string()))?
            .port();

        tracing::info!("sync server listening on port {}", port);

        let address = discovery::local_ips()
            .into_iter()
            .find(IpAddr::is_ipv4)
            .unwrap_or(IpAddr::V4(Ipv4Addr::LOCALHOST));
        let device = Device::new(config.device_name.clone(), address, port);

        let (events_tx, events_rx) = mpsc::unbounded_channel();
        let accept_task = tokio::spawn(accept_loop(
            listener,
            acceptor,
            Arc::from(config.device_name.as_str()),
            config.handshake_timeout(),
            events_tx.clone(),
        ));

        let advertiser = config
            .discovery
            .then(|| DiscoveryService::advertise(&config.device_name, port, &config.service_type));

        Ok(Self {
            device,
            store,
            send_timeout: config.send_timeout(),
            accept_task,
            advertiser,
            sessions: HashMap::new(),
            next_conn_id: 0,
            events_tx,
            events_rx,
        })
    }

    /// Port we're listening on
    pub fn port(&self) -> u16 {
        self.device.port
    }

    /// This host as clients see it
    pub fn device(&self) -> &Device {
        &self.device
    }

    /// Next background event. Cancel safe.
    pub async fn recv_event(&mut self) -> Option<ServerEvent> {
        self.events_rx.recv().await
    }

    pub async fn handle_event(&mut self, event: ServerEvent) -> Vec<SyncEvent> {
        match event {
            ServerEvent::Accepted(established) => self.on_accepted(established).await,
            ServerEvent::HandshakeFailed { addr, reason } => {
                tracing::warn!("handshake with {} failed: {}", addr, reason);
                vec![SyncEvent::ConnectionError(format!("{}: {}", addr, reason))]
            }
            ServerEvent::Frame {
                client,
                conn_id,
                snapshot,
            } => self.on_frame(client, conn_id, snapshot).await,
            ServerEvent::Closed {
                client,
                conn_id,
                reason,
            } => {
                if !self.is_current(&client, conn_id) {
                    return Vec::new();
                }
                tracing::info!("client {} disconnected: {}", client, reason);
                self.drop_session(&client).await
            }
        }
    }

    async fn on_accepted(&mut self, established: Established) -> Vec<SyncEvent> {
        let Established { connection, peer } = established;
        let cert = connection.peer_cert().to_vec();

        let outcome = verify_pinned(self.store.as_ref(), TrustScope::Client, &peer.name, &cert);
        let state = match outcome {
            HandshakeOutcome::Trusted => SessionState::Authenticated,
            HandshakeOutcome::UntrustedAwaitDecision => SessionState::Pending,
            HandshakeOutcome::Failed(reason) => {
                tracing::warn!("rejecting {}: {}", peer, reason);
                let (_, writer) = connection.into_split(self.send_timeout);
                writer.close().await;
                return vec![SyncEvent::ConnectionError(format!("{}: {}", peer, reason))];
            }
        };

        // A reconnect replaces whatever session the same name still holds
        let mut events = Vec::new();
        let stale: Vec<Device> = self
            .sessions
            .keys()
            .filter(|d| d.name == peer.name)
            .cloned()
            .collect();
        for device in stale {
            events.extend(self.drop_session(&device).await);
        }

        self.next_conn_id += 1;
        let conn_id = self.next_conn_id;
        let (reader, writer) = connection.into_split(self.send_timeout);
        let reader = tokio::spawn(read_loop(reader, peer.clone(), conn_id, self.events_tx.clone()));

        self.sessions.insert(
            peer.clone(),
            ServerSession {
                conn_id,
                state,
                cert,
                writer,
                reader,
            },
        );

        match state {
            SessionState::Authenticated => {
                tracing::info!("client {} authenticated", peer);
                events.push(SyncEvent::ClientStateChanged {
                    client: peer,
                    connected: true,
                });
                events.push(SyncEvent::ClientListChanged(self.connected_clients()));
            }
            SessionState::Pending => {
                tracing::info!("client {} awaiting approval", peer);
                events.push(SyncEvent::AuthRequest(peer));
            }
        }
        events
    }

    async fn on_frame(&mut self, client: Device, conn_id: u64, snapshot: Snapshot) -> Vec<SyncEvent> {
        match self.sessions.get(&client) {
            Some(session) if session.conn_id == conn_id => {
                if session.state != SessionState::Authenticated {
                    tracing::debug!("dropping frame from unapproved client {}", client);
                    return Vec::new();
                }
            }
            _ => return Vec::new(),
        }

        if snapshot.is_empty() {
            return Vec::new();
        }

        tracing::debug!("snapshot of {} item(s) from {}", snapshot.len(), client);
        let mut events = self.broadcast(&snapshot, Some(&client)).await;
        events.insert(0, SyncEvent::SyncReceived(snapshot));
        events
    }

    /// Trust a pending client: pin its certificate and authenticate it
    pub fn approve(&mut self, client: &Device) -> Result<Vec<SyncEvent>> {
        let session = match self.sessions.get_mut(client) {
            Some(session) if session.state == SessionState::Pending => session,
            _ => return Err(Error::UnknownDevice(client.clone())),
        };

        self.store.pin_cert(TrustScope::Client, &client.name, &session.cert)?;
        session.state = SessionState::Authenticated;
        tracing::info!("approved client {}", client);

        Ok(vec![
            SyncEvent::ClientStateChanged {
                client: client.clone(),
                connected: true,
            },
            SyncEvent::ClientListChanged(self.connected_clients()),
        ])
    }

    /// Close a pending client without pinning anything
    pub async fn reject(&mut self, client: &Device) -> Result<()> {
        match self.sessions.get(client) {
            Some(session) if session.state == SessionState::Pending => {}
            _ => return Err(Error::UnknownDevice(client.clone())),
        }

        if let Some(session) = self.sessions.remove(client) {
            session.close().await;
        }
        tracing::info!("rejected client {}", client);
        Ok(())
    }

    /// Send a local snapshot to every authenticated client
    pub async fn broadcast_local(&mut self, snapshot: &Snapshot) -> Vec<SyncEvent> {
        self.broadcast(snapshot, None).await
    }

    /// Sequential fan-out. A client whose send fails is disconnected on its
    /// own; the rest still receive the snapshot. A snapshot too large to
    /// frame is not sent to anyone and every session stays up.
    async fn broadcast(&mut self, snapshot: &Snapshot, origin: Option<&Device>) -> Vec<SyncEvent> {
        let payload = Packet::Sync(snapshot.clone()).encode();
        if let Err(e) = check_frame_size(payload.len()) {
            tracing::warn!("not broadcasting snapshot: {}", e);
            return vec![SyncEvent::ConnectionError(e.to_string())];
        }
        let mut failed = Vec::new();

        for (device, session) in self.sessions.iter_mut() {
            if session.state != SessionState::Authenticated || Some(device) == origin {
                continue;
            }
            if let Err(e) = session.writer.send_payload(&payload).await {
                tracing::warn!("send to {} failed: {}", device, e);
                failed.push((device.clone(), e));
            }
        }

        let mut events = Vec::new();
        for (device, e) in failed {
            events.push(SyncEvent::ConnectionError(format!("{}: {}", device, e)));
            events.extend(self.drop_session(&device).await);
        }
        events
    }

    /// Close one client session. Unknown devices are ignored.
    pub async fn disconnect(&mut self, client: &Device) -> Vec<SyncEvent> {
        self.drop_session(client).await
    }

    pub async fn disconnect_all(&mut self) -> Vec<SyncEvent> {
        let devices: Vec<Device> = self.sessions.keys().cloned().collect();
        let mut events = Vec::new();
        for device in devices {
            events.extend(self.drop_session(&device).await);
        }
        events
    }

    /// Authenticated clients, sorted by name
    pub fn connected_clients(&self) -> Vec<Device> {
        let mut clients: Vec<Device> = self
            .sessions
            .iter()
            .filter(|(_, s)| s.state == SessionState::Authenticated)
            .map(|(d, _)| d.clone())
            .collect();
        clients.sort_by(|a, b| a.name.cmp(&b.name).then(a.port.cmp(&b.port)));
        clients
    }

    /// Clients waiting for approve or reject
    pub fn pending_clients(&self) -> Vec<Device> {
        self.sessions
            .iter()
            .filter(|(_, s)| s.state == SessionState::Pending)
            .map(|(d, _)| d.clone())
            .collect()
    }

    /// Stop advertising, release the listener and close every session.
    /// The port is free again when this returns.
    pub async fn dispose(mut self) {
        if let Some(advertiser) = self.advertiser.take() {
            advertiser.shutdown().await;
        }

        self.accept_task.abort();
        let _ = (&mut self.accept_task).await;

        for (_, session) in self.sessions.drain() {
            session.close().await;
        }
        tracing::info!("sync server on port {} stopped", self.device.port);
    }

    fn is_current(&self, client: &Device, conn_id: u64) -> bool {
        self.sessions
            .get(client)
            .is_some_and(|s| s.conn_id == conn_id)
    }

    async fn drop_session(&mut self, client: &Device) -> Vec<SyncEvent> {
        let Some(session) = self.sessions.remove(client) else {
            return Vec::new();
        };
        let was_authenticated = session.state == SessionState::Authenticated;
        session.close().await;

        if !was_authenticated {
            return Vec::new();
        }
        vec![
            SyncEvent::ClientStateChanged {
                client: client.clone(),
                connected: false,
            },
            SyncEvent::ClientListChanged(self.connected_clients()),
        ]
    }
}

/// Accept TCP connections and run their handshakes. Handshakes live in a
/// `JoinSet`, so aborting this task cancels them too.
async fn accept_loop(
    listener: TcpListener,
    acceptor: TlsAcceptor,
    local_name: Arc<str>,
    handshake_timeout: Duration,
    events: mpsc::UnboundedSender<ServerEvent>,
) {
    let mut handshakes = JoinSet::new();

    loop {
        tokio::select! {
            accepted = listener.accept() => match accepted {
                Ok((tcp, addr)) => {
                    tracing::debug!("incoming connection from {}", addr);
                    let _ = tcp.set_nodelay(true);
                    let acceptor = acceptor.clone();
                    let local_name = local_name.clone();
                    let events = events.clone();

                    handshakes.spawn(async move {
                        let event = match handshake::accept(&acceptor, tcp, &local_name, handshake_timeout).await {
                            Ok(established) => ServerEvent::Accepted(established),
                            Err(e) => ServerEvent::HandshakeFailed {
                                addr,
                                reason: e.to_string(),
                            },
                        };
                        let _ = events.send(event);
                    });
                }
                Err(e) => {
                    tracing::error!("accept error: {}", e);
                    tokio::time::sleep(Duration::from_millis(100)).await;
                }
            },
            Some(_) = handshakes.join_next(), if !handshakes.is_empty() => {}
        }
    }
}

async fn read_loop(
    mut reader: SessionReader,
    client: Device,
    conn_id: u64,
    events: mpsc::UnboundedSender<ServerEvent>,
) {
    let reason = loop {
        match reader.recv().await {
            Ok(Packet::Sync(snapshot)) => {
                let frame = ServerEvent::Frame {
                    client: client.clone(),
                    conn_id,
                    snapshot,
                };
                if events.send(frame).is_err() {
                    return;
                }
            }
            Ok(Packet::Hello(_)) => break "unexpected hello after handshake".to_string(),
            Err(e) => break e.to_string(),
        }
    };

    let _ = events.send(ServerEvent::Closed {
        client,
        conn_id,
        reason,
    });
}

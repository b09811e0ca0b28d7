//! High-level service that owns the active role and the clipboard history

use std::collections::VecDeque;

use tokio::sync::{mpsc, oneshot};
use tokio::task::JoinHandle;

use crate::clipboard::SharedClipboard;
use crate::crypto::HostIdentity;
use crate::device::Device;
use crate::history::History;
use crate::protocol::Snapshot;
use crate::store::{SharedStore, TrustScope};
use crate::sync::client::{ClientEvent, SyncClient};
use crate::sync::server::{ServerEvent, SyncServer};
use crate::sync::{HostType, SyncEvent};
use crate::{Config, Error, Result};

/// Own clipboard writes remembered for echo suppression
const MAX_PENDING_ECHOES: usize = 16;

/// The one role this host plays at a time
pub enum ActiveRole {
    Idle,
    Server(SyncServer),
    Client(SyncClient),
}

impl ActiveRole {
    pub fn host_type(&self) -> HostType {
        match self {
            ActiveRole::Idle => HostType::Idle,
            ActiveRole::Server(_) => HostType::Server,
            ActiveRole::Client(_) => HostType::Client,
        }
    }
}

/// Background event of whichever role is active
pub enum RoleEvent {
    Server(ServerEvent),
    Client(ClientEvent),
}

/// Owns the role, history, store and clipboard; all state changes go
/// through `&mut self`, either directly or from the [`run`](Self::run) loop.
pub struct SyncCoordinator {
    config: Config,
    identity: HostIdentity,
    store: SharedStore,
    clipboard: SharedClipboard,
    role: ActiveRole,
    history: History,
    /// Content hashes of our own clipboard writes the watcher has not
    /// reported yet, oldest first
    pending_echoes: VecDeque<[u8; 32]>,
    events: mpsc::UnboundedSender<SyncEvent>,
}

impl SyncCoordinator {
    /// Create an idle coordinator, loading or creating the host identity
    pub fn new(
        config: Config,
        store: SharedStore,
        clipboard: SharedClipboard,
    ) -> Result<(Self, mpsc::UnboundedReceiver<SyncEvent>)> {
        config.validate()?;
        let identity = HostIdentity::load_or_create(store.as_ref(), &config.device_name)?;
        let (events, rx) = mpsc::unbounded_channel();

        tracing::info!(
            "coordinator for {} ready, certificate {}",
            config.device_name,
            identity.fingerprint()
        );

        Ok((
            Self {
                history: History::new(config.history_limit),
                config,
                identity,
                store,
                clipboard,
                role: ActiveRole::Idle,
                pending_echoes: VecDeque::new(),
                events,
            },
            rx,
        ))
    }

    pub fn identity(&self) -> &HostIdentity {
        &self.identity
    }

    pub fn config(&self) -> &Config {
        &self.config
    }

    pub fn host_type(&self) -> HostType {
        self.role.host_type()
    }

    pub async fn set_current_host_as_server(&mut self) -> Result<()> {
        self.dispose_role().await;

        match SyncServer::start(&self.config, &self.identity, self.store.clone()).await {
            Ok(server) => {
                self.role = ActiveRole::Server(server);
                self.persist_role(true);
                self.emit(SyncEvent::ServerStateChanged(true));
                self.emit(SyncEvent::HostTypeChanged(HostType::Server));
                Ok(())
            }
            Err(e) => Err(self.role_failed(e)),
        }
    }

    pub async fn set_current_host_as_client(&mut self) -> Result<()> {
        self.dispose_role().await;

        match SyncClient::start(&self.config, &self.identity, self.store.clone()) {
            Ok(client) => {
                self.role = ActiveRole::Client(client);
                self.persist_role(false);
                self.emit(SyncEvent::HostTypeChanged(HostType::Client));
                Ok(())
            }
            Err(e) => Err(self.role_failed(e)),
        }
    }

    /// Start the role this host had last time
    pub async fn restore_last_role(&mut self) -> Result<()> {
        if self.store.host_is_server() {
            self.set_current_host_as_server().await
        } else {
            self.set_current_host_as_client().await
        }
    }

    /// A change of the local clipboard
    pub async fn handle_local_change(&mut self, snapshot: Snapshot) -> Result<()> {
        if snapshot.is_empty() {
            return Ok(());
        }

        if self.take_echo(&snapshot.content_hash()) {
            tracing::debug!("ignoring echo of our own clipboard write");
            return Ok(());
        }

        if !self.history.push(snapshot.clone()) {
            return Ok(());
        }
        self.emit(SyncEvent::HistoryChanged(self.history.to_vec()));

        let events = match &mut self.role {
            ActiveRole::Server(server) => server.broadcast_local(&snapshot).await,
            ActiveRole::Client(client) => match client.send_local(&snapshot).await {
                Ok(events) => events,
                Err(Error::NotConnected) => {
                    tracing::debug!("not connected, snapshot kept in history only");
                    Vec::new()
                }
                Err(e) => return Err(e),
            },
            ActiveRole::Idle => Vec::new(),
        };
        self.dispatch(events).await;
        Ok(())
    }

    /// Handle one background event of the active role
    pub async fn handle_role_event(&mut self, event: RoleEvent) {
        let events = match (&mut self.role, event) {
            (ActiveRole::Server(server), RoleEvent::Server(event)) => server.handle_event(event).await,
            (ActiveRole::Client(client), RoleEvent::Client(event)) => client.handle_event(event).await,
            _ => return,
        };
        self.dispatch(events).await;
    }

    /// Trust the peer waiting on an AuthRequest
    pub async fn approve(&mut self, device: &Device) -> Result<()> {
        let events = match &mut self.role {
            ActiveRole::Server(server) => server.approve(device)?,
            ActiveRole::Client(client) => client.approve(device)?,
            ActiveRole::Idle => return Err(Error::NoActiveRole),
        };
        self.dispatch(events).await;
        Ok(())
    }

    pub async fn reject(&mut self, device: &Device) -> Result<()> {
        match &mut self.role {
            ActiveRole::Server(server) => server.reject(device).await,
            ActiveRole::Client(client) => client.reject(device).await,
            ActiveRole::Idle => Err(Error::NoActiveRole),
        }
    }

    /// History, oldest first
    pub fn history(&self) -> Vec<Snapshot> {
        self.history.to_vec()
    }

    pub fn delete_history_at(&mut self, index: usize) -> Result<Snapshot> {
        let removed = self.history.delete_at(index)?;
        self.emit(SyncEvent::HistoryChanged(self.history.to_vec()));
        Ok(removed)
    }

    pub fn connected_clients(&self) -> Result<Vec<Device>> {
        match &self.role {
            ActiveRole::Server(server) => Ok(server.connected_clients()),
            _ => Err(self.wrong_role()),
        }
    }

    pub fn pending_clients(&self) -> Result<Vec<Device>> {
        match &self.role {
            ActiveRole::Server(server) => Ok(server.pending_clients()),
            _ => Err(self.wrong_role()),
        }
    }

    pub fn connected_server(&self) -> Result<Option<Device>> {
        match &self.role {
            ActiveRole::Client(client) => Ok(client.connected_server().cloned()),
            _ => Err(self.wrong_role()),
        }
    }

    pub fn server_list(&self) -> Result<Vec<Device>> {
        match &self.role {
            ActiveRole::Client(client) => Ok(client.servers().to_vec()),
            _ => Err(self.wrong_role()),
        }
    }

    /// This host as clients see it
    pub fn server_info(&self) -> Result<Device> {
        match &self.role {
            ActiveRole::Server(server) => Ok(server.device().clone()),
            _ => Err(self.wrong_role()),
        }
    }

    /// Current local clipboard contents
    pub async fn clipboard(&self) -> Result<Snapshot> {
        let clipboard = self.clipboard.clone();
        tokio::task::spawn_blocking(move || clipboard.read())
            .await
            .map_err(|e| Error::Clipboard(e.to_string()))?
    }

    /// Put `snapshot` on the local clipboard as if the user copied it
    pub async fn set_clipboard(&self, snapshot: Snapshot) -> Result<()> {
        let clipboard = self.clipboard.clone();
        tokio::task::spawn_blocking(move || clipboard.write(&snapshot))
            .await
            .map_err(|e| Error::Clipboard(e.to_string()))?
    }

    pub async fn connect_to_server(&mut self, server: Device) -> Result<()> {
        let events = match &mut self.role {
            ActiveRole::Client(client) => client.connect(server).await,
            _ => return Err(self.wrong_role()),
        };
        self.dispatch(events).await;
        Ok(())
    }

    pub async fn disconnect_from_server(&mut self) -> Result<()> {
        let events = match &mut self.role {
            ActiveRole::Client(client) => client.disconnect().await,
            _ => return Err(self.wrong_role()),
        };
        self.dispatch(events).await;
        Ok(())
    }

    pub async fn disconnect_client(&mut self, client: &Device) -> Result<()> {
        let events = match &mut self.role {
            ActiveRole::Server(server) => server.disconnect(client).await,
            _ => return Err(self.wrong_role()),
        };
        self.dispatch(events).await;
        Ok(())
    }

    pub async fn disconnect_all_clients(&mut self) -> Result<()> {
        let events = match &mut self.role {
            ActiveRole::Server(server) => server.disconnect_all().await,
            _ => return Err(self.wrong_role()),
        };
        self.dispatch(events).await;
        Ok(())
    }

    /// Forget every server this host trusted as a client
    pub fn clear_server_certificates(&self) -> Result<()> {
        self.store.clear_certs(TrustScope::Server)
    }

    /// Forget every client this host trusted as a server
    pub fn clear_client_certificates(&self) -> Result<()> {
        self.store.clear_certs(TrustScope::Client)
    }

    /// Stop the active role and go idle
    pub async fn shutdown(&mut self) {
        self.dispose_role().await;
    }

    /// Run the owner loop until shut down through a [`CoordinatorHandle`]
    pub fn spawn(self, local_changes: mpsc::Receiver<Snapshot>) -> (CoordinatorHandle, JoinHandle<()>) {
        let (tx, rx) = mpsc::channel(32);
        let task = tokio::spawn(self.run(rx, local_changes));
        (CoordinatorHandle { tx }, task)
    }

    async fn run(mut self, mut commands: mpsc::Receiver<Command>, mut local_changes: mpsc::Receiver<Snapshot>) {
        loop {
            tokio::select! {
                command = commands.recv() => match command {
                    Some(Command::Shutdown(reply)) => {
                        self.shutdown().await;
                        let _ = reply.send(Ok(()));
                        break;
                    }
                    Some(command) => self.execute(command).await,
                    None => {
                        self.shutdown().await;
                        break;
                    }
                },
                Some(event) = next_role_event(&mut self.role) => {
                    self.handle_role_event(event).await;
                }
                Some(snapshot) = local_changes.recv() => {
                    if let Err(e) = self.handle_local_change(snapshot).await {
                        tracing::warn!("failed to sync local change: {}", e);
                    }
                }
            }
        }
        tracing::info!("coordinator stopped");
    }

    async fn execute(&mut self, command: Command) {
        match command {
            Command::SetServer(reply) => {
                let _ = reply.send(self.set_current_host_as_server().await);
            }
            Command::SetClient(reply) => {
                let _ = reply.send(self.set_current_host_as_client().await);
            }
            Command::RestoreLastRole(reply) => {
                let _ = reply.send(self.restore_last_role().await);
            }
            Command::LocalChange(snapshot, reply) => {
                let _ = reply.send(self.handle_local_change(snapshot).await);
            }
            Command::Approve(device, reply) => {
                let _ = reply.send(self.approve(&device).await);
            }
            Command::Reject(device, reply) => {
                let _ = reply.send(self.reject(&device).await);
            }
            Command::History(reply) => {
                let _ = reply.send(Ok(self.history()));
            }
            Command::DeleteHistoryAt(index, reply) => {
                let _ = reply.send(self.delete_history_at(index));
            }
            Command::HostType(reply) => {
                let _ = reply.send(Ok(self.host_type()));
            }
            Command::ConnectedClients(reply) => {
                let _ = reply.send(self.connected_clients());
            }
            Command::PendingClients(reply) => {
                let _ = reply.send(self.pending_clients());
            }
            Command::ConnectedServer(reply) => {
                let _ = reply.send(self.connected_server());
            }
            Command::ServerList(reply) => {
                let _ = reply.send(self.server_list());
            }
            Command::ServerInfo(reply) => {
                let _ = reply.send(self.server_info());
            }
            Command::Clipboard(reply) => {
                let _ = reply.send(self.clipboard().await);
            }
            Command::SetClipboard(snapshot, reply) => {
                let _ = reply.send(self.set_clipboard(snapshot).await);
            }
            Command::ConnectToServer(device, reply) => {
                let _ = reply.send(self.connect_to_server(device).await);
            }
            Command::DisconnectFromServer(reply) => {
                let _ = reply.send(self.disconnect_from_server().await);
            }
            Command::DisconnectClient(device, reply) => {
                let _ = reply.send(self.disconnect_client(&device).await);
            }
            Command::DisconnectAllClients(reply) => {
                let _ = reply.send(self.disconnect_all_clients().await);
            }
            Command::ClearServerCertificates(reply) => {
                let _ = reply.send(self.clear_server_certificates());
            }
            Command::ClearClientCertificates(reply) => {
                let _ = reply.send(self.clear_client_certificates());
            }
            Command::Shutdown(reply) => {
                self.shutdown().await;
                let _ = reply.send(Ok(()));
            }
        }
    }

    async fn dispatch(&mut self, events: Vec<SyncEvent>) {
        for event in events {
            match event {
                SyncEvent::SyncReceived(snapshot) => self.apply_inbound(snapshot).await,
                event => self.emit(event),
            }
        }
    }

    /// Record a snapshot from a peer and put it on the local clipboard
    async fn apply_inbound(&mut self, snapshot: Snapshot) {
        if snapshot.is_empty() {
            return;
        }
        self.emit(SyncEvent::SyncReceived(snapshot.clone()));

        if self.history.push(snapshot.clone()) {
            self.emit(SyncEvent::HistoryChanged(self.history.to_vec()));
        }

        // Written even when history is unchanged. Only a write that changes
        // what the clipboard reads back produces a watcher report.
        let clipboard = self.clipboard.clone();
        let written = tokio::task::spawn_blocking(move || {
            let before = clipboard.read().ok().map(|s| s.content_hash());
            clipboard.write(&snapshot)?;
            let after = clipboard.read().unwrap_or(snapshot).content_hash();
            Ok::<_, Error>((before != Some(after)).then_some(after))
        })
        .await;

        match written {
            Ok(Ok(Some(echo))) => {
                if self.pending_echoes.len() == MAX_PENDING_ECHOES {
                    self.pending_echoes.pop_front();
                }
                self.pending_echoes.push_back(echo);
            }
            Ok(Ok(None)) => {}
            Ok(Err(e)) => tracing::warn!("failed to write clipboard: {}", e),
            Err(e) => tracing::warn!("clipboard writer panicked: {}", e),
        }
    }

    /// Consume the pending echo matching `hash`. A watcher that polls may
    /// skip intermediate writes, so older pending echoes go with it.
    fn take_echo(&mut self, hash: &[u8; 32]) -> bool {
        match self.pending_echoes.iter().position(|h| h == hash) {
            Some(index) => {
                self.pending_echoes.drain(..=index);
                true
            }
            None => false,
        }
    }

    async fn dispose_role(&mut self) {
        match std::mem::replace(&mut self.role, ActiveRole::Idle) {
            ActiveRole::Idle => {}
            ActiveRole::Server(server) => {
                server.dispose().await;
                self.emit(SyncEvent::ServerStateChanged(false));
            }
            ActiveRole::Client(client) => {
                let server = client.connected_server().cloned();
                client.dispose().await;
                if let Some(server) = server {
                    self.emit(SyncEvent::ServerStatusChanged {
                        connected: false,
                        server,
                    });
                }
            }
        }
    }

    fn role_failed(&self, error: Error) -> Error {
        tracing::error!("failed to start role: {}", error);
        self.emit(SyncEvent::ConnectionError(error.to_string()));
        self.emit(SyncEvent::HostTypeChanged(HostType::Idle));
        error
    }

    fn persist_role(&self, is_server: bool) {
        if let Err(e) = self.store.set_host_is_server(is_server) {
            tracing::warn!("failed to persist role: {}", e);
        }
    }

    fn wrong_role(&self) -> Error {
        Error::WrongRole(match self.role {
            ActiveRole::Idle => "idle",
            ActiveRole::Server(_) => "server",
            ActiveRole::Client(_) => "client",
        })
    }

    fn emit(&self, event: SyncEvent) {
        let _ = self.events.send(event);
    }
}

async fn next_role_event(role: &mut ActiveRole) -> Option<RoleEvent> {
    match role {
        ActiveRole::Server(server) => server.recv_event().await.map(RoleEvent::Server),
        ActiveRole::Client(client) => client.recv_event().await.map(RoleEvent::Client),
        ActiveRole::Idle => std::future::pending().await,
    }
}

type Reply<T> = oneshot::Sender<Result<T>>;

enum Command {
    SetServer(Reply<()>),
    SetClient(Reply<()>),
    RestoreLastRole(Reply<()>),
    LocalChange(Snapshot, Reply<()>),
    Approve(Device, Reply<()>),
    Reject(Device, Reply<()>),
    History(Reply<Vec<Snapshot>>),
    DeleteHistoryAt(usize, Reply<Snapshot>),
    HostType(Reply<HostType>),
    ConnectedClients(Reply<Vec<Device>>),
    PendingClients(Reply<Vec<Device>>),
    ConnectedServer(Reply<Option<Device>>),
    ServerList(Reply<Vec<Device>>),
    ServerInfo(Reply<Device>),
    Clipboard(Reply<Snapshot>),
    SetClipboard(Snapshot, Reply<()>),
    ConnectToServer(Device, Reply<()>),
    DisconnectFromServer(Reply<()>),
    DisconnectClient(Device, Reply<()>),
    DisconnectAllClients(Reply<()>),
    ClearServerCertificates(Reply<()>),
    ClearClientCertificates(Reply<()>),
    Shutdown(Reply<()>),
}

/// Cloneable handle to a spawned coordinator
#[derive(Clone)]
pub struct CoordinatorHandle {
    tx: mpsc::Sender<Command>,
}

impl CoordinatorHandle {
    async fn request<T>(&self, command: impl FnOnce(Reply<T>) -> Command) -> Result<T> {
        let (reply, rx) = oneshot::channel();
        self.tx
            .send(command(reply))
            .await
            .map_err(|_| Error::CoordinatorStopped)?;
        rx.await.map_err(|_| Error::CoordinatorStopped)?
    }

    pub async fn set_current_host_as_server(&self) -> Result<()> {
        self.request(Command::SetServer).await
    }

    pub async fn set_current_host_as_client(&self) -> Result<()> {
        self.request(Command::SetClient).await
    }

    pub async fn restore_last_role(&self) -> Result<()> {
        self.request(Command::RestoreLastRole).await
    }

    /// Feed a local clipboard change without going through the watcher
    pub async fn handle_local_change(&self, snapshot: Snapshot) -> Result<()> {
        self.request(|reply| Command::LocalChange(snapshot, reply)).await
    }

    pub async fn approve(&self, device: Device) -> Result<()> {
        self.request(|reply| Command::Approve(device, reply)).await
    }

    pub async fn reject(&self, device: Device) -> Result<()> {
        self.request(|reply| Command::Reject(device, reply)).await
    }

    pub async fn history(&self) -> Result<Vec<Snapshot>> {
        self.request(Command::History).await
    }

    pub async fn delete_history_at(&self, index: usize) -> Result<Snapshot> {
        self.request(|reply| Command::DeleteHistoryAt(index, reply)).await
    }

    pub async fn host_type(&self) -> Result<HostType> {
        self.request(Command::HostType).await
    }

    pub async fn connected_clients(&self) -> Result<Vec<Device>> {
        self.request(Command::ConnectedClients).await
    }

    pub async fn pending_clients(&self) -> Result<Vec<Device>> {
        self.request(Command::PendingClients).await
    }

    pub async fn connected_server(&self) -> Result<Option<Device>> {
        self.request(Command::ConnectedServer).await
    }

    pub async fn server_list(&self) -> Result<Vec<Device>> {
        self.request(Command::ServerList).await
    }

    pub async fn server_info(&self) -> Result<Device> {
        self.request(Command::ServerInfo).await
    }

    pub async fn clipboard(&self) -> Result<Snapshot> {
        self.request(Command::Clipboard).await
    }

    pub async fn set_clipboard(&self, snapshot: Snapshot) -> Result<()> {
        self.request(|reply| Command::SetClipboard(snapshot, reply)).await
    }

    pub async fn connect_to_server(&self, server: Device) -> Result<()> {
        self.request(|reply| Command::ConnectToServer(server, reply)).await
    }

    pub async fn disconnect_from_server(&self) -> Result<()> {
        self.request(Command::DisconnectFromServer).await
    }

    pub async fn disconnect_client(&self, client: Device) -> Result<()> {
        self.request(|reply| Command::DisconnectClient(client, reply)).await
    }

    pub async fn disconnect_all_clients(&self) -> Result<()> {
        self.request(Command::DisconnectAllClients).await
    }

    pub async fn clear_server_certificates(&self) -> Result<()> {
        self.request(Command::ClearServerCertificates).await
    }

    pub async fn clear_client_certificates(&self) -> Result<()> {
        self.request(Command::ClearClientCertificates).await
    }

    /// Dispose the active role and stop the owner loop
    pub async fn shutdown(&self) -> Result<()> {
        self.request(Command::Shutdown).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::clipboard::{ClipboardBackend, MemoryClipboard};
    use crate::store::MemoryStore;
    use std::sync::Arc;

    fn coordinator() -> (SyncCoordinator, mpsc::UnboundedReceiver<SyncEvent>, Arc<MemoryClipboard>) {
        let config = Config {
            device_name: "desk".to_string(),
            port: 0,
            discovery: false,
            ..Config::default()
        };
        let (clipboard, _changes) = MemoryClipboard::new();
        let clipboard = Arc::new(clipboard);
        let (coordinator, events) =
            SyncCoordinator::new(config, Arc::new(MemoryStore::new()), clipboard.clone()).unwrap();
        (coordinator, events, clipboard)
    }

    fn drain(events: &mut mpsc::UnboundedReceiver<SyncEvent>) -> Vec<SyncEvent> {
        let mut out = Vec::new();
        while let Ok(event) = events.try_recv() {
            out.push(event);
        }
        out
    }

    #[tokio::test]
    async fn test_idle_local_change_goes_to_history_only() {
        let (mut coordinator, mut events, _) = coordinator();

        coordinator.handle_local_change(Snapshot::text("hello")).await.unwrap();
        coordinator.handle_local_change(Snapshot::text("hello")).await.unwrap();
        coordinator.handle_local_change(Snapshot::default()).await.unwrap();

        assert_eq!(coordinator.history(), vec![Snapshot::text("hello")]);
        assert_eq!(
            drain(&mut events),
            vec![SyncEvent::HistoryChanged(vec![Snapshot::text("hello")])]
        );
    }

    #[tokio::test]
    async fn test_inbound_write_is_not_echoed() {
        let (mut coordinator, _events, clipboard) = coordinator();

        coordinator.apply_inbound(Snapshot::text("world")).await;
        assert_eq!(clipboard.writes(), vec![Snapshot::text("world")]);

        // The watcher reports our own write once; it must not be re-sent
        coordinator.handle_local_change(Snapshot::text("world")).await.unwrap();
        assert_eq!(coordinator.history(), vec![Snapshot::text("world")]);
        assert!(coordinator.pending_echoes.is_empty());
    }

    #[tokio::test]
    async fn test_back_to_back_inbound_writes_are_all_absorbed() {
        let (mut coordinator, mut events, clipboard) = coordinator();

        coordinator.apply_inbound(Snapshot::text("a")).await;
        coordinator.apply_inbound(Snapshot::text("b")).await;
        assert_eq!(coordinator.pending_echoes.len(), 2);
        drain(&mut events);

        // The watcher catches up with both writes afterwards
        coordinator.handle_local_change(Snapshot::text("a")).await.unwrap();
        coordinator.handle_local_change(Snapshot::text("b")).await.unwrap();

        assert_eq!(coordinator.history(), vec![Snapshot::text("a"), Snapshot::text("b")]);
        assert!(drain(&mut events).is_empty());
        assert!(coordinator.pending_echoes.is_empty());
        assert_eq!(clipboard.writes().len(), 2);
    }

    #[tokio::test]
    async fn test_skipped_echo_does_not_swallow_a_real_copy() {
        let (mut coordinator, _events, _) = coordinator();

        coordinator.apply_inbound(Snapshot::text("a")).await;
        coordinator.apply_inbound(Snapshot::text("b")).await;

        // A polling watcher only saw the second write
        coordinator.handle_local_change(Snapshot::text("b")).await.unwrap();
        assert!(coordinator.pending_echoes.is_empty());

        // So the user copying "a" later is a real change
        coordinator.handle_local_change(Snapshot::text("a")).await.unwrap();
        assert_eq!(
            coordinator.history(),
            vec![Snapshot::text("a"), Snapshot::text("b"), Snapshot::text("a")]
        );
    }

    #[tokio::test]
    async fn test_inbound_duplicate_still_reaches_clipboard() {
        let (mut coordinator, _events, clipboard) = coordinator();

        coordinator.apply_inbound(Snapshot::text("a")).await;
        coordinator.handle_local_change(Snapshot::text("a")).await.unwrap();
        clipboard.set_local(Snapshot::text("b"));
        coordinator.handle_local_change(Snapshot::text("b")).await.unwrap();
        coordinator.delete_history_at(1).unwrap();

        // History already ends in "a", yet the clipboard holds "b"
        coordinator.apply_inbound(Snapshot::text("a")).await;
        assert_eq!(coordinator.history(), vec![Snapshot::text("a")]);
        assert_eq!(clipboard.read().unwrap(), Snapshot::text("a"));
        assert_eq!(clipboard.writes(), vec![Snapshot::text("a"), Snapshot::text("a")]);

        // Applying it again changes nothing on the clipboard, so no echo is expected
        coordinator.handle_local_change(Snapshot::text("a")).await.unwrap();
        assert!(coordinator.pending_echoes.is_empty());
        coordinator.apply_inbound(Snapshot::text("a")).await;
        assert!(coordinator.pending_echoes.is_empty());
    }

    #[tokio::test]
    async fn test_role_queries_check_the_role() {
        let (coordinator, _events, _) = coordinator();
        assert_eq!(coordinator.host_type(), HostType::Idle);
        assert!(matches!(coordinator.connected_clients(), Err(Error::WrongRole("idle"))));
        assert!(matches!(coordinator.server_list(), Err(Error::WrongRole("idle"))));
    }

    #[tokio::test]
    async fn test_delete_history_at() {
        let (mut coordinator, mut events, _) = coordinator();
        for s in ["a", "b", "c"] {
            coordinator.handle_local_change(Snapshot::text(s)).await.unwrap();
        }
        drain(&mut events);

        assert_eq!(coordinator.delete_history_at(0).unwrap(), Snapshot::text("a"));
        assert_eq!(
            drain(&mut events),
            vec![SyncEvent::HistoryChanged(vec![Snapshot::text("b"), Snapshot::text("c")])]
        );
        assert!(matches!(
            coordinator.delete_history_at(2),
            Err(Error::HistoryIndexOutOfRange { index: 2, len: 2 })
        ));
    }

    #[tokio::test]
    async fn test_role_switch_emits_host_type() {
        let (mut coordinator, mut events, _) = coordinator();

        coordinator.set_current_host_as_server().await.unwrap();
        assert_eq!(coordinator.host_type(), HostType::Server);
        coordinator.set_current_host_as_client().await.unwrap();
        assert_eq!(coordinator.host_type(), HostType::Client);
        assert!(!coordinator.store.host_is_server());

        assert_eq!(
            drain(&mut events),
            vec![
                SyncEvent::ServerStateChanged(true),
                SyncEvent::HostTypeChanged(HostType::Server),
                SyncEvent::ServerStateChanged(false),
                SyncEvent::HostTypeChanged(HostType::Client),
            ]
        );
        coordinator.shutdown().await;
    }
}

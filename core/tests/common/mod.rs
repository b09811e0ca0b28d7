//! Loopback hosts for integration tests: discovery off, in-memory store
//! and clipboard.

#![allow(dead_code)]

use std::net::{IpAddr, Ipv4Addr};
use std::sync::Arc;
use std::time::Duration;

use clipbird_core::{
    Config, CoordinatorHandle, Device, HostIdentity, MemoryClipboard, MemoryStore, SettingsStore,
    Snapshot, SyncCoordinator, SyncEvent, TrustScope,
};
use tokio::sync::mpsc::UnboundedReceiver;
use tokio::task::JoinHandle;

pub const WAIT: Duration = Duration::from_secs(10);

pub struct Host {
    pub name: String,
    pub handle: CoordinatorHandle,
    pub events: UnboundedReceiver<SyncEvent>,
    pub clipboard: Arc<MemoryClipboard>,
    pub store: Arc<MemoryStore>,
    pub cert: Vec<u8>,
    task: JoinHandle<()>,
}

impl Host {
    pub fn new(name: &str) -> Self {
        Self::with_port(name, 0)
    }

    pub fn with_port(name: &str, port: u16) -> Self {
        Self::with_config(name, |config| config.port = port)
    }

    /// Loopback defaults, then `tweak`
    pub fn with_config(name: &str, tweak: impl FnOnce(&mut Config)) -> Self {
        let mut config = Config {
            device_name: name.to_string(),
            port: 0,
            discovery: false,
            auto_connect: false,
            ..Config::default()
        };
        tweak(&mut config);

        let store = Arc::new(MemoryStore::new());
        let cert = HostIdentity::load_or_create(store.as_ref(), name)
            .unwrap()
            .cert_der()
            .to_vec();

        let (clipboard, changes) = MemoryClipboard::new();
        let clipboard = Arc::new(clipboard);
        let (coordinator, events) =
            SyncCoordinator::new(config, store.clone(), clipboard.clone()).unwrap();
        let (handle, task) = coordinator.spawn(changes);

        Self {
            name: name.to_string(),
            handle,
            events,
            clipboard,
            store,
            cert,
            task,
        }
    }

    /// Start as server and return the device clients dial
    pub async fn serve(&mut self) -> Device {
        self.handle.set_current_host_as_server().await.unwrap();
        let info = self.handle.server_info().await.unwrap();
        Device::new(self.name.clone(), IpAddr::V4(Ipv4Addr::LOCALHOST), info.port)
    }

    /// Pin `other`'s certificate in the given scope
    pub fn trust(&self, scope: TrustScope, other: &Host) {
        self.store.pin_cert(scope, &other.name, &other.cert).unwrap();
    }

    /// Simulate the user copying `text`
    pub fn copy(&self, text: &str) {
        self.clipboard.set_local(Snapshot::text(text));
    }

    /// Events up to and including the first one matching `pred`
    pub async fn wait_for(&mut self, pred: impl Fn(&SyncEvent) -> bool) -> Vec<SyncEvent> {
        let mut seen = Vec::new();
        let result = tokio::time::timeout(WAIT, async {
            while let Some(event) = self.events.recv().await {
                let done = pred(&event);
                seen.push(event);
                if done {
                    return;
                }
            }
        })
        .await;

        assert!(result.is_ok(), "{}: timed out, saw {:?}", self.name, seen);
        assert!(seen.last().is_some_and(&pred), "{}: event stream ended, saw {:?}", self.name, seen);
        seen
    }

    /// Events that arrive within `window`
    pub async fn quiet_for(&mut self, window: Duration) -> Vec<SyncEvent> {
        let mut seen = Vec::new();
        let _ = tokio::time::timeout(window, async {
            while let Some(event) = self.events.recv().await {
                seen.push(event);
            }
        })
        .await;
        seen
    }

    /// Wait until the clipboard has received `count` writes
    pub async fn wait_for_writes(&self, count: usize) -> Vec<Snapshot> {
        let deadline = tokio::time::Instant::now() + WAIT;
        loop {
            let writes = self.clipboard.writes();
            if writes.len() >= count {
                return writes;
            }
            assert!(
                tokio::time::Instant::now() < deadline,
                "{}: expected {} clipboard writes, have {:?}",
                self.name,
                count,
                writes
            );
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
    }

    pub async fn stop(self) {
        self.handle.shutdown().await.unwrap();
        self.task.await.unwrap();
    }
}

/// Trust both ways and connect `client` to `server`
pub async fn join(server: &mut Host, client: &mut Host, addr: &Device) {
    server.trust(TrustScope::Client, client);
    client.trust(TrustScope::Server, server);
    client.handle.set_current_host_as_client().await.unwrap();
    client.handle.connect_to_server(addr.clone()).await.unwrap();

    client
        .wait_for(|e| matches!(e, SyncEvent::ServerStatusChanged { connected: true, .. }))
        .await;
    let name = client.name.clone();
    server
        .wait_for(|e| matches!(e, SyncEvent::ClientStateChanged { client, connected: true } if client.name == name))
        .await;
}

pub fn is_auth_request(event: &SyncEvent) -> bool {
    matches!(event, SyncEvent::AuthRequest(_))
}

pub fn free_port() -> u16 {
    std::net::TcpListener::bind("0.0.0.0:0")
        .unwrap()
        .local_addr()
        .unwrap()
        .port()
}

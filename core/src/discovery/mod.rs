//! mDNS service discovery for finding peers on the local network
//!
//! The mDNS daemon API is blocking, so each service runs its daemon on a
//! blocking worker and reports to async code through a channel. Daemon or
//! registration failures are retried with exponential backoff.

use std::collections::HashMap;
use std::net::IpAddr;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, OnceLock};
use std::time::Duration;

use mdns_sd::{ServiceDaemon, ServiceEvent, ServiceInfo};
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use uuid::Uuid;

use crate::device::Device;
use crate::protocol::constants::{
    DISCOVERY_RETRY_INITIAL_MS, DISCOVERY_RETRY_MAX_MS, PROTOCOL_VERSION,
};
use crate::{Error, Result};

const POLL_INTERVAL: Duration = Duration::from_millis(250);

/// Membership change on the LAN
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DiscoveryEvent {
    Found(Device),
    Gone(Device),
}

/// Random id of this process, published in the TXT record so a host never
/// discovers itself
pub fn instance_id() -> Uuid {
    static ID: OnceLock<Uuid> = OnceLock::new();
    *ID.get_or_init(Uuid::new_v4)
}

/// A running advertise or browse worker
pub struct DiscoveryService {
    stop: Arc<AtomicBool>,
    worker: Option<JoinHandle<()>>,
}

impl DiscoveryService {
    /// Announce `device_name` on `port` until shut down
    pub fn advertise(device_name: &str, port: u16, service_type: &str) -> Self {
        let stop = Arc::new(AtomicBool::new(false));
        let name = device_name.to_string();
        let ty = service_type.to_string();
        let flag = stop.clone();

        let worker = tokio::task::spawn_blocking(move || {
            with_backoff(&flag, "advertise", || {
                let daemon = new_daemon()?;
                let fullname = register(&daemon, &ty, &name, port)?;

                while !sleep_unless_stopped(&flag, POLL_INTERVAL) {}

                let _ = daemon.unregister(&fullname);
                let _ = daemon.shutdown();
                tracing::info!("stopped advertising {}", fullname);
                Ok(())
            });
        });

        Self {
            stop,
            worker: Some(worker),
        }
    }

    /// Browse for peers; the stream ends when the service is shut down
    pub fn browse(service_type: &str) -> (Self, mpsc::Receiver<DiscoveryEvent>) {
        let (tx, rx) = mpsc::channel(32);
        let stop = Arc::new(AtomicBool::new(false));
        let ty = service_type.to_string();
        let flag = stop.clone();

        let worker = tokio::task::spawn_blocking(move || {
            let mut peers = PeerTable::default();

            with_backoff(&flag, "browse", || {
                let daemon = new_daemon()?;
                let receiver = daemon
                    .browse(&ty)
                    .map_err(|e| Error::Discovery(e.to_string()))?;
                tracing::info!("browsing for {}", ty);

                let result = loop {
                    if flag.load(Ordering::Relaxed) || tx.is_closed() {
                        break Ok(());
                    }

                    match receiver.recv_timeout(POLL_INTERVAL) {
                        Ok(event) => {
                            for change in peers.apply(event) {
                                if tx.blocking_send(change).is_err() {
                                    break;
                                }
                            }
                        }
                        Err(_) if receiver.is_disconnected() => {
                            break Err(Error::Discovery("mDNS daemon stopped".to_string()));
                        }
                        Err(_) => {}
                    }
                };

                let _ = daemon.stop_browse(&ty);
                let _ = daemon.shutdown();
                result
            });
        });

        (
            Self {
                stop,
                worker: Some(worker),
            },
            rx,
        )
    }

    /// Stop the worker and wait for it to release the daemon
    pub async fn shutdown(mut self) {
        self.stop.store(true, Ordering::Relaxed);
        if let Some(worker) = self.worker.take() {
            let _ = worker.await;
        }
    }
}

impl Drop for DiscoveryService {
    fn drop(&mut self) {
        self.stop.store(true, Ordering::Relaxed);
    }
}

fn new_daemon() -> Result<ServiceDaemon> {
    ServiceDaemon::new().map_err(|e| Error::Discovery(e.to_string()))
}

fn register(daemon: &ServiceDaemon, ty: &str, device_name: &str, port: u16) -> Result<String> {
    let id = instance_id().to_string();
    let instance_name = format!("{}-{}", device_name, &id[..8]);

    let mut properties = HashMap::new();
    properties.insert("id".to_string(), id);
    properties.insert("name".to_string(), device_name.to_string());
    properties.insert("v".to_string(), PROTOCOL_VERSION.to_string());

    let host = hostname::get()
        .map(|h| h.to_string_lossy().to_string())
        .unwrap_or_else(|_| "clipbird".to_string());

    let service = ServiceInfo::new(
        ty,
        &instance_name,
        &format!("{}.local.", host),
        (),
        port,
        properties,
    )
    .map_err(|e| Error::Discovery(e.to_string()))?
    .enable_addr_auto();

    let fullname = service.get_fullname().to_string();
    daemon
        .register(service)
        .map_err(|e| Error::Discovery(e.to_string()))?;

    tracing::info!("registered mDNS service: {}", instance_name);
    Ok(fullname)
}

/// Run `attempt` until it succeeds or `stop` is raised, backing off
/// exponentially between failures
fn with_backoff<F>(stop: &AtomicBool, what: &str, mut attempt: F)
where
    F: FnMut() -> Result<()>,
{
    let mut delay = Duration::from_millis(DISCOVERY_RETRY_INITIAL_MS);
    let max = Duration::from_millis(DISCOVERY_RETRY_MAX_MS);

    while !stop.load(Ordering::Relaxed) {
        match attempt() {
            Ok(()) => return,
            Err(e) => {
                tracing::warn!("discovery {} failed, retrying in {:?}: {}", what, delay, e);
                if sleep_unless_stopped(stop, delay) {
                    return;
                }
                delay = (delay * 2).min(max);
            }
        }
    }
}

/// Sleep in small steps; returns true if `stop` was raised meanwhile
fn sleep_unless_stopped(stop: &AtomicBool, total: Duration) -> bool {
    let mut remaining = total;
    while !remaining.is_zero() {
        if stop.load(Ordering::Relaxed) {
            return true;
        }
        let step = remaining.min(POLL_INTERVAL);
        std::thread::sleep(step);
        remaining -= step;
    }
    stop.load(Ordering::Relaxed)
}

/// Known peers keyed by mDNS full name
#[derive(Default)]
struct PeerTable {
    peers: HashMap<String, Device>,
}

impl PeerTable {
    fn apply(&mut self, event: ServiceEvent) -> Vec<DiscoveryEvent> {
        match event {
            ServiceEvent::ServiceResolved(info) => {
                let fullname = info.get_fullname().to_string();
                match peer_from_info(&info) {
                    Some(device) => self.upsert(fullname, device),
                    None => Vec::new(),
                }
            }
            ServiceEvent::ServiceRemoved(_, fullname) => self.remove(&fullname),
            _ => Vec::new(),
        }
    }

    /// Re-announcements of a known peer never produce a duplicate: an
    /// unchanged record is silent, a moved one is reported as gone then found
    fn upsert(&mut self, fullname: String, device: Device) -> Vec<DiscoveryEvent> {
        match self.peers.insert(fullname, device.clone()) {
            Some(old) if old == device => Vec::new(),
            Some(old) => vec![DiscoveryEvent::Gone(old), DiscoveryEvent::Found(device)],
            None => vec![DiscoveryEvent::Found(device)],
        }
    }

    fn remove(&mut self, fullname: &str) -> Vec<DiscoveryEvent> {
        self.peers
            .remove(fullname)
            .map(|device| vec![DiscoveryEvent::Gone(device)])
            .unwrap_or_default()
    }
}

fn peer_from_info(info: &ServiceInfo) -> Option<Device> {
    let id = info.get_property_val_str("id")?;
    if id == instance_id().to_string() {
        return None;
    }

    let version = info.get_property_val_str("v")?;
    if version != PROTOCOL_VERSION.to_string() {
        tracing::debug!("ignoring {} speaking protocol v{}", info.get_fullname(), version);
        return None;
    }

    let name = info
        .get_property_val_str("name")
        .map(str::to_string)
        .unwrap_or_else(|| {
            info.get_fullname()
                .split('.')
                .next()
                .unwrap_or("Unknown")
                .to_string()
        });

    let address = pick_address(info.get_addresses().iter().copied())?;
    Some(Device::new(name, address, info.get_port()))
}

/// Prefer IPv4; link-local IPv6 needs a scope id we do not carry
fn pick_address(addresses: impl Iterator<Item = IpAddr>) -> Option<IpAddr> {
    let mut addresses: Vec<IpAddr> = addresses.collect();
    addresses.sort_by_key(|addr| (!addr.is_ipv4(), *addr));
    addresses.into_iter().next()
}

/// Get local IP addresses (non-loopback)
pub fn local_ips() -> Vec<IpAddr> {
    let mut ips = Vec::new();

    if let Ok(interfaces) = get_if_addrs::get_if_addrs() {
        for iface in interfaces {
            if !iface.is_loopback() {
                ips.push(iface.ip());
            }
        }
    }

    ips
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::net::{Ipv4Addr, Ipv6Addr};

    fn device(name: &str, last_octet: u8, port: u16) -> Device {
        Device::new(name, IpAddr::V4(Ipv4Addr::new(10, 0, 0, last_octet)), port)
    }

    #[test]
    fn test_reannouncement_is_silent() {
        let mut table = PeerTable::default();
        let desk = device("desk", 2, 17394);

        assert_eq!(
            table.upsert("desk-1._clipbird".into(), desk.clone()),
            vec![DiscoveryEvent::Found(desk.clone())]
        );
        assert!(table.upsert("desk-1._clipbird".into(), desk).is_empty());
        assert_eq!(table.peers.len(), 1);
    }

    #[test]
    fn test_moved_peer_replaces_entry() {
        let mut table = PeerTable::default();
        let before = device("desk", 2, 17394);
        let after = device("desk", 3, 17394);

        table.upsert("desk-1._clipbird".into(), before.clone());
        assert_eq!(
            table.upsert("desk-1._clipbird".into(), after.clone()),
            vec![DiscoveryEvent::Gone(before), DiscoveryEvent::Found(after)]
        );
        assert_eq!(table.peers.len(), 1);
    }

    #[test]
    fn test_remove_unknown_is_silent() {
        let mut table = PeerTable::default();
        let desk = device("desk", 2, 17394);
        table.upsert("desk-1._clipbird".into(), desk.clone());

        assert!(table.remove("other._clipbird").is_empty());
        assert_eq!(table.remove("desk-1._clipbird"), vec![DiscoveryEvent::Gone(desk)]);
        assert!(table.remove("desk-1._clipbird").is_empty());
    }

    #[test]
    fn test_prefers_ipv4() {
        let v6 = IpAddr::V6(Ipv6Addr::LOCALHOST);
        let v4 = IpAddr::V4(Ipv4Addr::new(192, 168, 1, 4));
        assert_eq!(pick_address(vec![v6, v4].into_iter()), Some(v4));
        assert_eq!(pick_address(vec![v6].into_iter()), Some(v6));
        assert_eq!(pick_address(Vec::new().into_iter()), None);
    }

    #[test]
    fn test_instance_id_is_stable() {
        assert_eq!(instance_id(), instance_id());
    }

    #[test]
    fn test_local_ips_excludes_loopback() {
        assert!(local_ips().iter().all(|ip| !ip.is_loopback()));
    }
}

//! Events reported to the application

use serde::{Deserialize, Serialize};

use crate::device::Device;
use crate::protocol::Snapshot;

/// Which role the host currently plays
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum HostType {
    Server,
    Client,
    Idle,
}

impl std::fmt::Display for HostType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            HostType::Server => write!(f, "server"),
            HostType::Client => write!(f, "client"),
            HostType::Idle => write!(f, "idle"),
        }
    }
}

/// Event from the sync coordinator
#[derive(Debug, Clone, PartialEq)]
pub enum SyncEvent {
    /// Discovered servers changed (client role)
    ServerListChanged(Vec<Device>),
    ServerFound(Device),
    ServerGone(Device),
    /// A connection or handshake failed; only that session is affected
    ConnectionError(String),
    /// Client role connected to or lost its server
    ServerStatusChanged { connected: bool, server: Device },
    /// A client was authenticated or went away (server role)
    ClientStateChanged { client: Device, connected: bool },
    ClientListChanged(Vec<Device>),
    /// Server role started or stopped listening
    ServerStateChanged(bool),
    /// An unknown peer presented a certificate; approve or reject it
    AuthRequest(Device),
    /// Snapshot received from a peer
    SyncReceived(Snapshot),
    HistoryChanged(Vec<Snapshot>),
    HostTypeChanged(HostType),
}

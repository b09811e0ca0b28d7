//! Session establishment and trust-on-first-use decision
//!
//! Establishment is TLS followed by one `Hello` in each direction (client
//! first). Trust is then decided against the store by [`verify_pinned`].

use std::time::Duration;

use tokio::net::TcpStream;
use tokio_rustls::{TlsAcceptor, TlsConnector};

use crate::device::Device;
use crate::protocol::constants::PROTOCOL_VERSION;
use crate::protocol::{Hello, Packet};
use crate::store::{SettingsStore, TrustScope};
use crate::sync::connection::SecureConnection;
use crate::{Error, Result};

/// Result of checking a presented certificate against the pinned record
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum HandshakeOutcome {
    /// Pinned certificate matches
    Trusted,
    /// First contact: hold the session until approved or rejected
    UntrustedAwaitDecision,
    /// Mismatch or store failure; the connection must be dropped
    Failed(String),
}

/// Compare `presented` with the certificate pinned for `name` in `scope`.
///
/// A mismatch is always `Failed`; it is never silently re-pinned.
pub fn verify_pinned(
    store: &dyn SettingsStore,
    scope: TrustScope,
    name: &str,
    presented: &[u8],
) -> HandshakeOutcome {
    match store.pinned_cert(scope, name) {
        Ok(pinned) if pinned == presented => HandshakeOutcome::Trusted,
        Ok(_) => HandshakeOutcome::Failed(Error::CertificateMismatch(name.to_string()).to_string()),
        Err(Error::CertificateNotFound(_)) => HandshakeOutcome::UntrustedAwaitDecision,
        Err(e) => HandshakeOutcome::Failed(e.to_string()),
    }
}

/// A TLS connection whose peer has identified itself
pub struct Established {
    pub connection: SecureConnection,
    pub peer: Device,
}

/// Server side: TLS accept, then read the client's hello and answer
pub async fn accept(
    acceptor: &TlsAcceptor,
    tcp: TcpStream,
    local_name: &str,
    timeout: Duration,
) -> Result<Established> {
    let addr = tcp.peer_addr()?;
    tokio::time::timeout(timeout, accept_inner(acceptor, tcp, local_name))
        .await
        .map_err(|_| Error::Timeout(format!("handshake with {}", addr)))?
}

/// Client side: dial `server`, send our hello and check the server's name
pub async fn connect(
    connector: &TlsConnector,
    server: &Device,
    local_name: &str,
    timeout: Duration,
) -> Result<Established> {
    tokio::time::timeout(timeout, connect_inner(connector, server, local_name))
        .await
        .map_err(|_| Error::Timeout(format!("handshake with {}", server)))?
}

async fn accept_inner(
    acceptor: &TlsAcceptor,
    tcp: TcpStream,
    local_name: &str,
) -> Result<Established> {
    let mut connection = SecureConnection::accept(acceptor, tcp).await?;
    let hello = read_hello(&mut connection).await?;
    connection.send(&local_hello(local_name)).await?;

    Ok(Established {
        peer: Device::from_socket_addr(hello.name, connection.peer_addr()),
        connection,
    })
}

async fn connect_inner(
    connector: &TlsConnector,
    server: &Device,
    local_name: &str,
) -> Result<Established> {
    let mut connection = SecureConnection::connect(connector, server.socket_addr()).await?;
    connection.send(&local_hello(local_name)).await?;
    let hello = read_hello(&mut connection).await?;

    if hello.name != server.name {
        return Err(Error::Protocol(format!(
            "expected server {}, it identified as {}",
            server.name, hello.name
        )));
    }

    Ok(Established {
        peer: server.clone(),
        connection,
    })
}

fn local_hello(name: &str) -> Packet {
    Packet::Hello(Hello {
        version: PROTOCOL_VERSION,
        name: name.to_string(),
    })
}

async fn read_hello(connection: &mut SecureConnection) -> Result<Hello> {
    match connection.recv().await? {
        Packet::Hello(hello) if hello.version == PROTOCOL_VERSION => Ok(hello),
        Packet::Hello(hello) => Err(Error::Protocol(format!(
            "peer speaks protocol v{}, we speak v{}",
            hello.version, PROTOCOL_VERSION
        ))),
        Packet::Sync(_) => Err(Error::Protocol("expected hello, got sync".to_string())),
    }
}

//! TLS session transport

use std::net::SocketAddr;
use std::time::Duration;

use tokio::io::{AsyncWriteExt, ReadHalf, WriteHalf};
use tokio::net::TcpStream;
use tokio_rustls::{TlsAcceptor, TlsConnector, TlsStream};

use crate::crypto::tls;
use crate::protocol::Packet;
use crate::sync::framing::{read_framed_message, write_framed_message};
use crate::{Error, Result};

type Transport = TlsStream<TcpStream>;

/// An established TLS connection to a peer, before it is split for a session
pub struct SecureConnection {
    stream: Transport,
    peer_addr: SocketAddr,
    peer_cert: Vec<u8>,
}

impl SecureConnection {
    /// Server side: complete TLS on an accepted TCP stream
    pub async fn accept(acceptor: &TlsAcceptor, tcp: TcpStream) -> Result<Self> {
        let peer_addr = tcp.peer_addr()?;
        let stream = acceptor
            .accept(tcp)
            .await
            .map_err(|e| Error::Tls(format!("TLS accept from {} failed: {}", peer_addr, e)))?;

        let peer_cert = stream
            .get_ref()
            .1
            .peer_certificates()
            .and_then(|certs| certs.first())
            .map(|cert| cert.to_vec())
            .ok_or_else(|| Error::Tls(format!("{} presented no certificate", peer_addr)))?;

        Ok(Self {
            stream: TlsStream::Server(stream),
            peer_addr,
            peer_cert,
        })
    }

    /// Client side: dial and complete TLS
    pub async fn connect(connector: &TlsConnector, addr: SocketAddr) -> Result<Self> {
        let tcp = TcpStream::connect(addr)
            .await
            .map_err(|e| Error::Network(format!("connect to {} failed: {}", addr, e)))?;
        tcp.set_nodelay(true)?;

        let stream = connector
            .connect(tls::server_name()?, tcp)
            .await
            .map_err(|e| Error::Tls(format!("TLS connect to {} failed: {}", addr, e)))?;

        let peer_cert = stream
            .get_ref()
            .1
            .peer_certificates()
            .and_then(|certs| certs.first())
            .map(|cert| cert.to_vec())
            .ok_or_else(|| Error::Tls(format!("{} presented no certificate", addr)))?;

        Ok(Self {
            stream: TlsStream::Client(stream),
            peer_addr: addr,
            peer_cert,
        })
    }

    /// DER certificate the peer presented during the TLS handshake
    pub fn peer_cert(&self) -> &[u8] {
        &self.peer_cert
    }

    pub fn peer_addr(&self) -> SocketAddr {
        self.peer_addr
    }

    pub async fn send(&mut self, packet: &Packet) -> Result<()> {
        write_framed_message(&mut self.stream, &packet.encode()).await
    }

    pub async fn recv(&mut self) -> Result<Packet> {
        let payload = read_framed_message(&mut self.stream).await?;
        Packet::decode(&payload)
    }

    /// Split into read and write halves for concurrent processing
    pub fn into_split(self, send_timeout: Duration) -> (SessionReader, SessionWriter) {
        let (read_half, write_half) = tokio::io::split(self.stream);
        (
            SessionReader { stream: read_half },
            SessionWriter {
                stream: write_half,
                send_timeout,
            },
        )
    }
}

/// Read half of a session
pub struct SessionReader {
    stream: ReadHalf<Transport>,
}

impl SessionReader {
    pub async fn recv(&mut self) -> Result<Packet> {
        let payload = read_framed_message(&mut self.stream).await?;
        Packet::decode(&payload)
    }
}

/// Write half of a session. Every send is bounded by the send timeout.
pub struct SessionWriter {
    stream: WriteHalf<Transport>,
    send_timeout: Duration,
}

impl SessionWriter {
    pub async fn send(&mut self, packet: &Packet) -> Result<()> {
        self.send_payload(&packet.encode()).await
    }

    /// Send an already encoded packet, so a fan-out encodes once
    pub async fn send_payload(&mut self, payload: &[u8]) -> Result<()> {
        tokio::time::timeout(
            self.send_timeout,
            write_framed_message(&mut self.stream, payload),
        )
        .await
        .map_err(|_| Error::Timeout(format!("send exceeded {:?}", self.send_timeout)))?
    }

    /// Best-effort TLS close_notify and TCP shutdown
    pub async fn close(mut self) {
        let _ = tokio::time::timeout(self.send_timeout, self.stream.shutdown()).await;
    }
}

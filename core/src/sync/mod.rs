//! TLS sessions between clipboard peers and the two sync roles

pub mod client;
pub mod connection;
pub mod event;
pub mod framing;
pub mod handshake;
pub mod server;

pub use client::{ClientState, SyncClient};
pub use connection::{SecureConnection, SessionReader, SessionWriter};
pub use event::{HostType, SyncEvent};
pub use framing::{check_frame_size, read_framed_message, write_framed_message};
pub use handshake::{verify_pinned, HandshakeOutcome};
pub use server::{SessionState, SyncServer};

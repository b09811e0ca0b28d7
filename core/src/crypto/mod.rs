//! Host identity and TLS plumbing
//!
//! - Self-signed ECDSA P-256 host certificate (rcgen)
//! - rustls configs for mutual TLS without a certificate authority

mod identity;
pub mod tls;

pub use identity::{fingerprint, HostIdentity};

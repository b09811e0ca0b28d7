//! Centralized protocol constants
//!
//! All protocol-level constants are defined here to ensure consistency
//! across the codebase and make configuration easier.

/// Default TCP port for the sync server
pub const DEFAULT_PORT: u16 = 17394;

/// Current protocol version, carried in the hello packet and the TXT record
pub const PROTOCOL_VERSION: u16 = 1;

/// mDNS service type for discovery. The version is part of the name so
/// incompatible peers never see each other.
pub const SERVICE_TYPE: &str = "_clipbird-v1._tcp.local.";

/// Server name used for TLS. Certificates are pinned rather than validated
/// against it, but rustls still requires one.
pub const TLS_SERVER_NAME: &str = "clipbird.local";

/// Maximum frame payload size (32 MB)
pub const MAX_MESSAGE_SIZE: usize = 32 * 1024 * 1024;

/// Default number of snapshots kept in history
pub const DEFAULT_HISTORY_LIMIT: usize = 20;

/// Per-send timeout for a single session write, in milliseconds
pub const SEND_TIMEOUT_MS: u64 = 3_000;

/// Upper bound on TLS handshake plus hello exchange, in milliseconds
pub const HANDSHAKE_TIMEOUT_MS: u64 = 10_000;

/// Clipboard polling interval in milliseconds
pub const CLIPBOARD_POLL_INTERVAL_MS: u64 = 500;

/// First retry delay after a discovery failure, in milliseconds
pub const DISCOVERY_RETRY_INITIAL_MS: u64 = 1_000;

/// Retry delay ceiling for discovery, in milliseconds
pub const DISCOVERY_RETRY_MAX_MS: u64 = 30_000;

/// MIME kind for plain text
pub const MIME_TYPE_TEXT: &str = "text/plain";

/// MIME kind for HTML
pub const MIME_TYPE_HTML: &str = "text/html";

/// MIME kind for PNG images
pub const MIME_TYPE_PNG: &str = "image/png";

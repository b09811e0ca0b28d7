//! Trust and settings persistence
//!
//! The sync core only talks to the [`SettingsStore`] trait. Implementations
//! serialize access internally so the coordinator and the surrounding
//! application can share one instance through an `Arc`.

mod file;
mod memory;

pub use file::FileStore;
pub use memory::MemoryStore;

use std::collections::BTreeMap;
use std::sync::Arc;

use serde::{Deserialize, Serialize};

use crate::Result;

/// Which pinned-certificate set a lookup goes to
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum TrustScope {
    /// Certificates of clients this host trusts while acting as server
    Client,
    /// Certificates of servers this host trusts while acting as client
    Server,
}

/// Persistent trust records, host identity and last-used role
pub trait SettingsStore: Send + Sync {
    /// Pinned certificate for `name`, or `Error::CertificateNotFound`
    fn pinned_cert(&self, scope: TrustScope, name: &str) -> Result<Vec<u8>>;

    fn has_pinned_cert(&self, scope: TrustScope, name: &str) -> bool {
        self.pinned_cert(scope, name).is_ok()
    }

    fn pin_cert(&self, scope: TrustScope, name: &str, cert: &[u8]) -> Result<()>;

    /// Idempotent on unknown names
    fn remove_cert(&self, scope: TrustScope, name: &str) -> Result<()>;

    fn clear_certs(&self, scope: TrustScope) -> Result<()>;

    fn all_certs(&self, scope: TrustScope) -> Vec<Vec<u8>>;

    /// Host certificate and private key (both DER)
    fn host_identity(&self) -> Option<(Vec<u8>, Vec<u8>)>;

    fn set_host_identity(&self, cert: &[u8], key: &[u8]) -> Result<()>;

    /// Last role used; client when never set
    fn host_is_server(&self) -> bool;

    fn set_host_is_server(&self, is_server: bool) -> Result<()>;
}

pub type SharedStore = Arc<dyn SettingsStore>;

/// Serializable contents shared by the store implementations
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub(crate) struct StoreData {
    #[serde(default, with = "crate::serde_utils::base64_map")]
    pub client_certs: BTreeMap<String, Vec<u8>>,
    #[serde(default, with = "crate::serde_utils::base64_map")]
    pub server_certs: BTreeMap<String, Vec<u8>>,
    #[serde(default)]
    pub host: Option<HostRecord>,
    #[serde(default)]
    pub host_is_server: bool,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub(crate) struct HostRecord {
    #[serde(with = "crate::serde_utils::base64_bytes")]
    pub cert: Vec<u8>,
    #[serde(with = "crate::serde_utils::base64_bytes")]
    pub key: Vec<u8>,
}

impl StoreData {
    pub fn certs(&self, scope: TrustScope) -> &BTreeMap<String, Vec<u8>> {
        match scope {
            TrustScope::Client => &self.client_certs,
            TrustScope::Server => &self.server_certs,
        }
    }

    pub fn certs_mut(&mut self, scope: TrustScope) -> &mut BTreeMap<String, Vec<u8>> {
        match scope {
            TrustScope::Client => &mut self.client_certs,
            TrustScope::Server => &mut self.server_certs,
        }
    }
}

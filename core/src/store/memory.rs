use std::sync::{Mutex, MutexGuard};

use super::{HostRecord, SettingsStore, StoreData, TrustScope};
use crate::{Error, Result};

/// Non-persistent store, used for tests and throwaway sessions
#[derive(Debug, Default)]
pub struct MemoryStore {
    data: Mutex<StoreData>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    fn data(&self) -> MutexGuard<'_, StoreData> {
        self.data.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }
}

impl SettingsStore for MemoryStore {
    fn pinned_cert(&self, scope: TrustScope, name: &str) -> Result<Vec<u8>> {
        self.data()
            .certs(scope)
            .get(name)
            .cloned()
            .ok_or_else(|| Error::CertificateNotFound(name.to_string()))
    }

    fn pin_cert(&self, scope: TrustScope, name: &str, cert: &[u8]) -> Result<()> {
        self.data().certs_mut(scope).insert(name.to_string(), cert.to_vec());
        Ok(())
    }

    fn remove_cert(&self, scope: TrustScope, name: &str) -> Result<()> {
        self.data().certs_mut(scope).remove(name);
        Ok(())
    }

    fn clear_certs(&self, scope: TrustScope) -> Result<()> {
        self.data().certs_mut(scope).clear();
        Ok(())
    }

    fn all_certs(&self, scope: TrustScope) -> Vec<Vec<u8>> {
        self.data().certs(scope).values().cloned().collect()
    }

    fn host_identity(&self) -> Option<(Vec<u8>, Vec<u8>)> {
        self.data()
            .host
            .as_ref()
            .map(|host| (host.cert.clone(), host.key.clone()))
    }

    fn set_host_identity(&self, cert: &[u8], key: &[u8]) -> Result<()> {
        self.data().host = Some(HostRecord {
            cert: cert.to_vec(),
            key: key.to_vec(),
        });
        Ok(())
    }

    fn host_is_server(&self) -> bool {
        self.data().host_is_server
    }

    fn set_host_is_server(&self, is_server: bool) -> Result<()> {
        self.data().host_is_server = is_server;
        Ok(())
    }
}

use std::path::{Path, PathBuf};
use std::sync::{Mutex, MutexGuard};

use super::{HostRecord, SettingsStore, StoreData, TrustScope};
use crate::{Error, Result};

const STORE_FILE: &str = "store.json";

/// JSON-file backed store. Every mutation is written through to disk.
#[derive(Debug)]
pub struct FileStore {
    path: PathBuf,
    data: Mutex<StoreData>,
}

impl FileStore {
    /// Open `store.json` inside `data_dir`, starting empty if it does not exist
    pub fn open(data_dir: &Path) -> Result<Self> {
        Self::open_file(data_dir.join(STORE_FILE))
    }

    pub fn open_file(path: PathBuf) -> Result<Self> {
        let data = if path.exists() {
            let content = std::fs::read_to_string(&path)?;
            let data: StoreData = serde_json::from_str(&content)?;
            tracing::info!(
                "loaded store from {} ({} client certs, {} server certs)",
                path.display(),
                data.client_certs.len(),
                data.server_certs.len()
            );
            data
        } else {
            tracing::debug!("store not found at {}, starting fresh", path.display());
            StoreData::default()
        };

        Ok(Self {
            path,
            data: Mutex::new(data),
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    fn data(&self) -> MutexGuard<'_, StoreData> {
        self.data.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    /// Apply a mutation and persist it while still holding the lock, so two
    /// writers can never interleave their file writes.
    fn update<F>(&self, mutate: F) -> Result<()>
    where
        F: FnOnce(&mut StoreData),
    {
        let mut data = self.data();
        mutate(&mut data);
        self.save(&data)
    }

    fn save(&self, data: &StoreData) -> Result<()> {
        if let Some(parent) = self.path.parent() {
            std::fs::create_dir_all(parent)?;
        }

        let content = serde_json::to_string_pretty(data)?;
        let tmp = self.path.with_extension("json.tmp");
        std::fs::write(&tmp, content)?;
        std::fs::rename(&tmp, &self.path)
            .map_err(|e| Error::Store(format!("failed to replace {}: {}", self.path.display(), e)))
    }
}

impl SettingsStore for FileStore {
    fn pinned_cert(&self, scope: TrustScope, name: &str) -> Result<Vec<u8>> {
        self.data()
            .certs(scope)
            .get(name)
            .cloned()
            .ok_or_else(|| Error::CertificateNotFound(name.to_string()))
    }

    fn pin_cert(&self, scope: TrustScope, name: &str, cert: &[u8]) -> Result<()> {
        tracing::info!("pinning {:?} certificate for {}", scope, name);
        self.update(|data| {
            data.certs_mut(scope).insert(name.to_string(), cert.to_vec());
        })
    }

    fn remove_cert(&self, scope: TrustScope, name: &str) -> Result<()> {
        self.update(|data| {
            data.certs_mut(scope).remove(name);
        })
    }

    fn clear_certs(&self, scope: TrustScope) -> Result<()> {
        self.update(|data| data.certs_mut(scope).clear())
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
        self.update(|data| {
            data.host = Some(HostRecord {
                cert: cert.to_vec(),
                key: key.to_vec(),
            });
        })
    }

    fn host_is_server(&self) -> bool {
        self.data().host_is_server
    }

    fn set_host_is_server(&self, is_server: bool) -> Result<()> {
        self.update(|data| data.host_is_server = is_server)
    }
}

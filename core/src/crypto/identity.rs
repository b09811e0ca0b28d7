//! Long-lived self-signed host certificate

use rcgen::{CertificateParams, DnType, KeyPair};
use rustls::pki_types::{CertificateDer, PrivateKeyDer, PrivatePkcs8KeyDer};
use sha2::{Digest, Sha256};

use crate::protocol::constants::TLS_SERVER_NAME;
use crate::store::SettingsStore;
use crate::{Error, Result};

/// This host's certificate and private key, both DER encoded
#[derive(Clone)]
pub struct HostIdentity {
    cert: Vec<u8>,
    key: Vec<u8>,
}

impl std::fmt::Debug for HostIdentity {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("HostIdentity")
            .field("fingerprint", &self.fingerprint())
            .finish_non_exhaustive()
    }
}

impl HostIdentity {
    /// Generate a fresh ECDSA P-256 self-signed certificate
    pub fn generate(device_name: &str) -> Result<Self> {
        let mut params = CertificateParams::new(vec![TLS_SERVER_NAME.to_string()])
            .map_err(|e| Error::Identity(e.to_string()))?;
        params
            .distinguished_name
            .push(DnType::CommonName, device_name.to_string());

        let key_pair = KeyPair::generate().map_err(|e| Error::Identity(e.to_string()))?;
        let cert = params
            .self_signed(&key_pair)
            .map_err(|e| Error::Identity(e.to_string()))?;

        Ok(Self {
            cert: cert.der().to_vec(),
            key: key_pair.serialize_der(),
        })
    }

    pub fn from_der(cert: Vec<u8>, key: Vec<u8>) -> Self {
        Self { cert, key }
    }

    /// Load the identity recorded in the store, or generate and persist one
    pub fn load_or_create(store: &dyn SettingsStore, device_name: &str) -> Result<Self> {
        if let Some((cert, key)) = store.host_identity() {
            return Ok(Self::from_der(cert, key));
        }

        let identity = Self::generate(device_name)?;
        store.set_host_identity(&identity.cert, &identity.key)?;
        tracing::info!("generated host certificate {}", identity.fingerprint());
        Ok(identity)
    }

    pub fn cert_der(&self) -> &[u8] {
        &self.cert
    }

    pub(crate) fn rustls_cert(&self) -> CertificateDer<'static> {
        CertificateDer::from(self.cert.clone())
    }

    pub(crate) fn rustls_key(&self) -> PrivateKeyDer<'static> {
        PrivateKeyDer::Pkcs8(PrivatePkcs8KeyDer::from(self.key.clone()))
    }

    /// Human-readable SHA256 fingerprint of the certificate
    pub fn fingerprint(&self) -> String {
        fingerprint(&self.cert)
    }
}

/// Colon separated hex SHA256 of a DER certificate
pub fn fingerprint(cert_der: &[u8]) -> String {
    Sha256::digest(cert_der)
        .iter()
        .map(|b| format!("{:02x}", b))
        .collect::<Vec<_>>()
        .join(":")
}

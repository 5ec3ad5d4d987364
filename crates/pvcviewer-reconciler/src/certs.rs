use crate::error::{ReconcileError, Result};
use base64::engine::general_purpose::STANDARD;
use base64::Engine;
use pvcviewer_storage::KVStore;
use rcgen::{
    BasicConstraints, CertificateParams, DnType, ExtendedKeyUsagePurpose, IsCa, KeyPair,
    KeyUsagePurpose,
};
use tracing::info;

pub const CERT_KEY: &str = "cert";
pub const KEY_KEY: &str = "key";
pub const CA_KEY: &str = "ca";

/// Webhook serving certificate, its key, and the CA that signed it (PEM)
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CertificateBundle {
    pub cert: String,
    pub key: String,
    pub ca: String,
}

impl CertificateBundle {
    /// DNS names the webhook service is reached by
    pub fn subject_alt_names(service: &str, namespace: &str) -> Vec<String> {
        vec![
            service.to_string(),
            format!("{}.{}", service, namespace),
            format!("{}.{}.svc", service, namespace),
            format!("{}.{}.svc.cluster.local", service, namespace),
        ]
    }

    /// Generate a self-signed CA and a server certificate signed by it
    pub fn generate(service: &str, namespace: &str) -> Result<Self> {
        let cert_err = |what: &str, e: rcgen::Error| {
            ReconcileError::certificate_error(format!("failed to {}: {}", what, e))
        };

        let ca_key = KeyPair::generate().map_err(|e| cert_err("generate CA key pair", e))?;
        let mut ca_params =
            CertificateParams::new(Vec::new()).map_err(|e| cert_err("create CA params", e))?;
        ca_params
            .distinguished_name
            .push(DnType::CommonName, format!("{}-ca", service));
        ca_params.is_ca = IsCa::Ca(BasicConstraints::Unconstrained);
        ca_params.key_usages = vec![KeyUsagePurpose::KeyCertSign, KeyUsagePurpose::CrlSign];
        let ca_cert = ca_params
            .self_signed(&ca_key)
            .map_err(|e| cert_err("self-sign CA certificate", e))?;

        let server_key =
            KeyPair::generate().map_err(|e| cert_err("generate server key pair", e))?;
        let mut server_params = CertificateParams::new(Self::subject_alt_names(service, namespace))
            .map_err(|e| cert_err("create server params", e))?;
        server_params
            .distinguished_name
            .push(DnType::CommonName, format!("{}.{}.svc", service, namespace));
        server_params.extended_key_usages = vec![ExtendedKeyUsagePurpose::ServerAuth];
        let server_cert = server_params
            .signed_by(&server_key, &ca_cert, &ca_key)
            .map_err(|e| cert_err("sign server certificate", e))?;

        Ok(Self {
            cert: server_cert.pem(),
            key: server_key.serialize_pem(),
            ca: ca_cert.pem(),
        })
    }

    /// Load the persisted bundle, generating and storing a new one if any of
    /// the three parts is missing.
    pub fn load_or_generate(store: &dyn KVStore, service: &str, namespace: &str) -> Result<Self> {
        let cert = store.get_string(CERT_KEY)?;
        let key = store.get_string(KEY_KEY)?;
        let ca = store.get_string(CA_KEY)?;

        if let (Some(cert), Some(key), Some(ca)) = (cert, key, ca) {
            info!("Using stored webhook certificates");
            return Ok(Self { cert, key, ca });
        }

        info!("Generating webhook certificates for {}.{}", service, namespace);
        let bundle = Self::generate(service, namespace)?;
        store.put_all(&[
            (CERT_KEY.as_bytes(), bundle.cert.as_bytes()),
            (KEY_KEY.as_bytes(), bundle.key.as_bytes()),
            (CA_KEY.as_bytes(), bundle.ca.as_bytes()),
        ])?;
        Ok(bundle)
    }

    /// The CA PEM, base64-encoded for a webhook `caBundle`
    pub fn ca_base64(&self) -> String {
        STANDARD.encode(self.ca.as_bytes())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pvcviewer_storage::{MemoryStore, RedbBackend};
    use tempfile::tempdir;

    #[test]
    fn test_generate() {
        let bundle = CertificateBundle::generate("pvcviewer-operator", "kubeflow").unwrap();
        assert!(bundle.cert.starts_with("-----BEGIN CERTIFICATE-----"));
        assert!(bundle.ca.starts_with("-----BEGIN CERTIFICATE-----"));
        assert!(bundle.key.contains("PRIVATE KEY"));
        assert_ne!(bundle.cert, bundle.ca);
    }

    #[test]
    fn test_subject_alt_names() {
        let sans = CertificateBundle::subject_alt_names("pvcviewer", "kubeflow");
        assert_eq!(
            sans,
            vec![
                "pvcviewer",
                "pvcviewer.kubeflow",
                "pvcviewer.kubeflow.svc",
                "pvcviewer.kubeflow.svc.cluster.local",
            ]
        );
    }

    #[test]
    fn test_not_regenerated_while_complete() {
        let store = MemoryStore::new();
        let first = CertificateBundle::load_or_generate(&store, "pvcviewer", "kubeflow").unwrap();
        let second = CertificateBundle::load_or_generate(&store, "pvcviewer", "kubeflow").unwrap();
        assert_eq!(first, second);
        assert_eq!(store.get_string(CA_KEY).unwrap().unwrap(), first.ca);
    }

    #[test]
    fn test_regenerated_when_any_part_missing() {
        let store = MemoryStore::new();
        let first = CertificateBundle::load_or_generate(&store, "pvcviewer", "kubeflow").unwrap();
        store.delete(KEY_KEY.as_bytes()).unwrap();

        let second = CertificateBundle::load_or_generate(&store, "pvcviewer", "kubeflow").unwrap();
        assert_ne!(first.cert, second.cert);
        assert_ne!(first.ca, second.ca);
        assert_eq!(store.get_string(KEY_KEY).unwrap().unwrap(), second.key);
    }

    #[test]
    fn test_survives_reopen() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("state.redb");

        let first = {
            let store = RedbBackend::new(&path).unwrap();
            CertificateBundle::load_or_generate(&store, "pvcviewer", "kubeflow").unwrap()
        };
        let store = RedbBackend::new(&path).unwrap();
        let second = CertificateBundle::load_or_generate(&store, "pvcviewer", "kubeflow").unwrap();
        assert_eq!(first, second);
    }

    #[test]
    fn test_ca_base64() {
        let bundle = CertificateBundle {
            cert: String::new(),
            key: String::new(),
            ca: "ca".to_string(),
        };
        assert_eq!(bundle.ca_base64(), "Y2E=");
    }
}

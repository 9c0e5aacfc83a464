// SPDX-License-Identifier: MIT

use std::io;
use std::path::Path;
use std::sync::Arc;

use futures::future::BoxFuture;
use rustls::ServerConfig;
use rustls_pki_types::pem::PemObject;
use rustls_pki_types::{CertificateDer, PrivateKeyDer};
use tokio_rustls::TlsAcceptor;
use tokio_rustls::server::TlsStream;

use crate::engine::Accept;
use crate::error::{Error, Result};

pub fn load_tls_config(cert_path: &Path, key_path: &Path) -> Result<Arc<ServerConfig>> {
    let cert_chain = CertificateDer::pem_file_iter(cert_path)
        .and_then(|certs| certs.collect::<std::result::Result<Vec<_>, _>>())
        .map_err(|e| Error::TlsConfig {
            reason: format!(
                "Failed to load certificate {}: {e}",
                cert_path.display()
            ),
        })?;
    if cert_chain.is_empty() {
        return Err(Error::TlsConfig {
            reason: format!("No certificate found in {}", cert_path.display()),
        });
    }

    // Accepts PKCS#8, PKCS#1 and SEC1 keys.
    let key = PrivateKeyDer::from_pem_file(key_path).map_err(|e| Error::TlsConfig {
        reason: format!("Failed to load private key {}: {e}", key_path.display()),
    })?;

    let mut config =
        ServerConfig::builder_with_provider(Arc::new(rustls::crypto::ring::default_provider()))
            .with_safe_default_protocol_versions()
            .and_then(|builder| builder.with_no_client_auth().with_single_cert(cert_chain, key))
            .map_err(|e| Error::TlsConfig {
                reason: format!("Failed to create TLS config: {e}"),
            })?;
    config.alpn_protocols = vec![b"http/1.1".to_vec()];
    Ok(Arc::new(config))
}

/// Terminates TLS on connections from an inner listener.
///
/// The handshake runs in the `Connecting` future, i.e. on the engine's
/// per-connection task. A failed handshake drops the inner connection, which
/// releases it from the inner listener's live count.
pub struct TlsListener<L> {
    inner: L,
    acceptor: TlsAcceptor,
}

impl<L: Accept> TlsListener<L> {
    pub fn new(inner: L, config: Arc<ServerConfig>) -> Self {
        Self {
            inner,
            acceptor: TlsAcceptor::from(config),
        }
    }

    pub fn get_ref(&self) -> &L {
        &self.inner
    }
}

impl<L: Accept> Accept for TlsListener<L> {
    type Io = TlsStream<L::Io>;
    type Connecting = BoxFuture<'static, io::Result<Self::Io>>;

    async fn next_connecting(&self) -> io::Result<Self::Connecting> {
        let connecting = self.inner.next_connecting().await?;
        let acceptor = self.acceptor.clone();
        Ok(Box::pin(async move { acceptor.accept(connecting.await?).await }))
    }

    fn close(&self) {
        self.inner.close()
    }
}

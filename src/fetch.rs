use std::future::Future;
use std::time::Duration;

use tokio::net::TcpStream;
use tokio::time;
use x509_parser::prelude::*;

use crate::error::FetchError;
use crate::types::{DialTarget, LeafIdentity};

/// Something that can fetch the leaf certificate identity for one target.
pub trait CertFetcher: Send + Sync + 'static {
    fn fetch(
        &self,
        target: &DialTarget,
    ) -> impl Future<Output = Result<LeafIdentity, FetchError>> + Send;
}

/// TCP + TLS fetcher that accepts any certificate the peer presents.
///
/// - Chain and hostname verification are disabled; the tool records what is
///   presented, not whether it is trusted.
/// - Connect and handshake together are bounded by one `tokio::time::timeout`.
/// - The stream is dropped before `fetch` returns on every path.
#[derive(Clone)]
pub struct TlsFetcher {
    connector: tokio_native_tls::TlsConnector,
    timeout: Duration,
}

impl TlsFetcher {
    pub fn new(timeout: Duration) -> Result<Self, native_tls::Error> {
        let connector = native_tls::TlsConnector::builder()
            .danger_accept_invalid_certs(true)
            .danger_accept_invalid_hostnames(true)
            .build()?;
        Ok(Self {
            connector: tokio_native_tls::TlsConnector::from(connector),
            timeout,
        })
    }

    async fn leaf_der(&self, target: &DialTarget) -> Result<Vec<u8>, FetchError> {
        let tcp = TcpStream::connect(target.as_str())
            .await
            .map_err(FetchError::Connect)?;
        let tls = self
            .connector
            .connect(target.host(), tcp)
            .await
            .map_err(FetchError::Handshake)?;
        let cert = tls
            .get_ref()
            .peer_certificate()
            .map_err(FetchError::Handshake)?
            .ok_or(FetchError::NoCertificate)?;
        cert.to_der().map_err(FetchError::Handshake)
    }
}

impl CertFetcher for TlsFetcher {
    async fn fetch(&self, target: &DialTarget) -> Result<LeafIdentity, FetchError> {
        let der = time::timeout(self.timeout, self.leaf_der(target))
            .await
            .map_err(|_| FetchError::Timeout(self.timeout))??;
        extract_identity(&der)
    }
}

/// Read organization, subject CN and DNS SANs from a DER-encoded certificate.
pub fn extract_identity(der: &[u8]) -> Result<LeafIdentity, FetchError> {
    let (_, cert) =
        parse_x509_certificate(der).map_err(|e| FetchError::Certificate(e.to_string()))?;
    let subject = cert.subject();

    let organization = subject
        .iter_organization()
        .next()
        .and_then(|o| o.as_str().ok())
        .map(str::to_string);
    let common_name = subject
        .iter_common_name()
        .next()
        .and_then(|cn| cn.as_str().ok())
        .unwrap_or_default()
        .to_string();

    let mut names = vec![common_name];
    if let Ok(Some(san)) = cert.subject_alternative_name() {
        for gn in &san.value.general_names {
            if let GeneralName::DNSName(name) = gn {
                names.push(name.to_string());
            }
        }
    }

    Ok(LeafIdentity {
        organization,
        names,
    })
}

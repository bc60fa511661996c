//! The base `rustls` client configuration shared by all TLS-based transports.

use std::str::FromStr;
use std::sync::{Arc, OnceLock};

use rustls::client::danger::{HandshakeSignatureValid, ServerCertVerified, ServerCertVerifier};
use rustls::crypto::{CryptoProvider, WebPkiSupportedAlgorithms};
use rustls::pki_types::{CertificateDer, ServerName, UnixTime};
use rustls::{DigitallySignedStruct, SignatureScheme, SupportedProtocolVersion};

use crate::error::ConfigError;

#[derive(Copy, Clone, Debug, PartialEq, Eq, PartialOrd, Ord)]
pub enum TlsVersion {
    Tls12,
    Tls13,
}

impl FromStr for TlsVersion {
    type Err = ConfigError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "1.2" => Ok(TlsVersion::Tls12),
            "1.3" => Ok(TlsVersion::Tls13),
            x => Err(ConfigError::Tls(format!("unsupported TLS version {}", x))),
        }
    }
}

#[derive(Copy, Clone, Debug)]
pub struct TlsOptions {
    /// Accepts any server certificate.
    pub insecure_skip_verify: bool,
    pub min_version: TlsVersion,
    pub max_version: TlsVersion,
}

impl Default for TlsOptions {
    fn default() -> Self {
        Self {
            insecure_skip_verify: false,
            min_version: TlsVersion::Tls12,
            max_version: TlsVersion::Tls13,
        }
    }
}

/// Builds the client configuration from `opts`.
///
/// Server certificates are checked against the `webpki-roots` trust anchors unless verification
/// is disabled. No ALPN protocols are set; transports that need them set them on a clone.
pub fn build_tls_config(opts: &TlsOptions) -> Result<Arc<rustls::ClientConfig>, ConfigError> {
    if opts.min_version > opts.max_version {
        return Err(ConfigError::Tls(
            "minimum TLS version is above the maximum".into(),
        ));
    }
    let versions: Vec<&'static SupportedProtocolVersion> = [
        (TlsVersion::Tls12, &rustls::version::TLS12),
        (TlsVersion::Tls13, &rustls::version::TLS13),
    ]
    .into_iter()
    .filter(|(v, _)| (opts.min_version..=opts.max_version).contains(v))
    .map(|(_, version)| version)
    .collect();

    let builder = rustls::ClientConfig::builder_with_provider(crypto_provider())
        .with_protocol_versions(&versions)
        .map_err(|e| ConfigError::Tls(e.to_string()))?;

    let config = if opts.insecure_skip_verify {
        builder
            .dangerous()
            .with_custom_certificate_verifier(Arc::new(DisabledVerifier {
                supported_algs: crypto_provider().signature_verification_algorithms,
            }))
            .with_no_client_auth()
    } else {
        builder
            .with_root_certificates(root_cert_store())
            .with_no_client_auth()
    };

    Ok(Arc::new(config))
}

fn crypto_provider() -> Arc<CryptoProvider> {
    static INSTANCE: OnceLock<Arc<CryptoProvider>> = OnceLock::new();
    INSTANCE
        .get_or_init(|| Arc::new(rustls::crypto::aws_lc_rs::default_provider()))
        .clone()
}

fn root_cert_store() -> Arc<rustls::RootCertStore> {
    static INSTANCE: OnceLock<Arc<rustls::RootCertStore>> = OnceLock::new();
    INSTANCE
        .get_or_init(|| {
            let mut root_store = rustls::RootCertStore::empty();
            root_store.extend(webpki_roots::TLS_SERVER_ROOTS.iter().cloned());
            Arc::new(root_store)
        })
        .clone()
}

/// Accepts every certificate, but still checks handshake signatures.
#[derive(Debug)]
struct DisabledVerifier {
    supported_algs: WebPkiSupportedAlgorithms,
}

impl ServerCertVerifier for DisabledVerifier {
    fn verify_server_cert(
        &self,
        _end_entity: &CertificateDer<'_>,
        _intermediates: &[CertificateDer<'_>],
        _server_name: &ServerName<'_>,
        _ocsp_response: &[u8],
        _now: UnixTime,
    ) -> Result<ServerCertVerified, rustls::Error> {
        Ok(ServerCertVerified::assertion())
    }

    fn verify_tls12_signature(
        &self,
        message: &[u8],
        cert: &CertificateDer<'_>,
        dss: &DigitallySignedStruct,
    ) -> Result<HandshakeSignatureValid, rustls::Error> {
        rustls::crypto::verify_tls12_signature(message, cert, dss, &self.supported_algs)
    }

    fn verify_tls13_signature(
        &self,
        message: &[u8],
        cert: &CertificateDer<'_>,
        dss: &DigitallySignedStruct,
    ) -> Result<HandshakeSignatureValid, rustls::Error> {
        rustls::crypto::verify_tls13_signature(message, cert, dss, &self.supported_algs)
    }

    fn supported_verify_schemes(&self) -> Vec<SignatureScheme> {
        self.supported_algs.supported_schemes()
    }
}

/// Converts `name` into a TLS server name. IP addresses are accepted and matched against the
/// certificate's IP address SANs.
pub(crate) fn server_name(name: &str) -> Result<ServerName<'static>, ConfigError> {
    ServerName::try_from(name.to_string())
        .map_err(|_| ConfigError::InvalidTlsServerName(name.to_string()))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_config_has_no_alpn() {
        let config = build_tls_config(&TlsOptions::default()).unwrap();
        assert!(config.alpn_protocols.is_empty());
    }

    #[test]
    fn inverted_version_range_is_rejected() {
        let opts = TlsOptions {
            min_version: TlsVersion::Tls13,
            max_version: TlsVersion::Tls12,
            ..Default::default()
        };
        assert!(matches!(build_tls_config(&opts), Err(ConfigError::Tls(_))));
        assert!("1.1".parse::<TlsVersion>().is_err());
    }

    #[test]
    fn insecure_config_builds() {
        let opts = TlsOptions {
            insecure_skip_verify: true,
            min_version: TlsVersion::Tls13,
            ..Default::default()
        };
        assert!(build_tls_config(&opts).is_ok());
    }

    #[test]
    fn server_names() {
        assert!(server_name("dns.example").is_ok());
        assert!(server_name("192.0.2.1").is_ok());
        assert!(matches!(
            server_name("not a name"),
            Err(ConfigError::InvalidTlsServerName(_))
        ));
    }
}

//! TLS configuration for PostgreSQL connections.
//!
//! `tokio_postgres::Config` only understands `disable`, `prefer` and
//! `require`, so the `sslmode` parameter is taken out of the connection
//! string first and mapped to a rustls configuration here. With `prefer`
//! the connection provider retries over plain TCP when the TLS connection
//! cannot be established.

use std::sync::{Arc, OnceLock};

use regex::Regex;
use rustls::ClientConfig;
use tokio_postgres_rustls::MakeRustlsConnect;
use tracing::{info, warn};

use crate::error::{MigrateError, Result};

/// SSL verification modes, matching PostgreSQL's `sslmode` parameter.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum SslMode {
    /// Plain TCP.
    #[default]
    Disable,
    /// TLS without certificate verification, plain TCP when TLS fails.
    Prefer,
    /// TLS without certificate verification.
    /// **Security Warning**: vulnerable to man-in-the-middle attacks.
    Require,
    /// Verify server certificate against CA.
    VerifyCa,
    /// Full certificate and hostname verification.
    VerifyFull,
}

impl SslMode {
    pub fn parse(s: &str) -> Result<Self> {
        match s.to_lowercase().as_str() {
            "disable" | "" => Ok(SslMode::Disable),
            "prefer" => Ok(SslMode::Prefer),
            "require" => Ok(SslMode::Require),
            "verify-ca" => Ok(SslMode::VerifyCa),
            "verify-full" => Ok(SslMode::VerifyFull),
            other => Err(MigrateError::Config(format!(
                "Invalid ssl_mode '{}'. Valid values: disable, prefer, require, verify-ca, verify-full",
                other
            ))),
        }
    }

    pub fn requires_tls(&self) -> bool {
        !matches!(self, SslMode::Disable)
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            SslMode::Disable => "disable",
            SslMode::Prefer => "prefer",
            SslMode::Require => "require",
            SslMode::VerifyCa => "verify-ca",
            SslMode::VerifyFull => "verify-full",
        }
    }
}

fn ssl_mode_regex() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| {
        Regex::new(r"(?i)(^|[\s?&])sslmode\s*=\s*([A-Za-z-]+)").expect("valid sslmode regex")
    })
}

/// Remove `sslmode` from a key/value or URL connection string.
///
/// Returns the remaining connection string and the parsed mode (`disable`
/// when absent).
pub fn split_ssl_mode(connection_string: &str) -> Result<(String, SslMode)> {
    let Some(caps) = ssl_mode_regex().captures(connection_string) else {
        return Ok((connection_string.to_string(), SslMode::Disable));
    };
    let mode = SslMode::parse(caps.get(2).map(|m| m.as_str()).unwrap_or_default())?;
    let (Some(whole), Some(lead)) = (caps.get(0), caps.get(1)) else {
        return Ok((connection_string.to_string(), mode));
    };

    let before = &connection_string[..whole.start()];
    let after = &connection_string[whole.end()..];
    let rest = match lead.as_str() {
        // `?sslmode=x&a=b` keeps the `?` for the next parameter.
        "?" => match after.strip_prefix('&') {
            Some(tail) => format!("{}?{}", before, tail),
            None => before.to_string(),
        },
        "&" => format!("{}{}", before, after),
        _ => format!("{}{}", before, after).trim().to_string(),
    };
    Ok((rest, mode))
}

/// Builder for PostgreSQL TLS connectors.
pub struct TlsBuilder {
    ssl_mode: SslMode,
}

impl TlsBuilder {
    pub fn new(ssl_mode: SslMode) -> Self {
        Self { ssl_mode }
    }

    /// Connector for deadpool-postgres; `None` when TLS is disabled.
    pub fn build(&self) -> Result<Option<MakeRustlsConnect>> {
        if !self.ssl_mode.requires_tls() {
            return Ok(None);
        }
        Ok(Some(MakeRustlsConnect::new(self.build_client_config()?)))
    }

    pub fn build_client_config(&self) -> Result<ClientConfig> {
        let mut root_store = rustls::RootCertStore::empty();
        root_store.extend(webpki_roots::TLS_SERVER_ROOTS.iter().cloned());

        let config = match self.ssl_mode {
            SslMode::Disable => {
                return Err(MigrateError::Config(
                    "Cannot build TLS config for ssl_mode=disable".into(),
                ));
            }
            SslMode::Prefer => {
                warn!("ssl_mode=prefer: TLS without certificate verification");
                ClientConfig::builder()
                    .dangerous()
                    .with_custom_certificate_verifier(Arc::new(NoVerifier))
                    .with_no_client_auth()
            }
            SslMode::Require => {
                warn!(
                    "ssl_mode=require enables TLS but does NOT verify the server certificate. \
                     Use ssl_mode=verify-full in production."
                );
                ClientConfig::builder()
                    .dangerous()
                    .with_custom_certificate_verifier(Arc::new(NoVerifier))
                    .with_no_client_auth()
            }
            SslMode::VerifyCa => {
                warn!("ssl_mode=verify-ca: hostname is verified as well (same as verify-full)");
                ClientConfig::builder()
                    .with_root_certificates(root_store)
                    .with_no_client_auth()
            }
            SslMode::VerifyFull => {
                info!("ssl_mode=verify-full: full certificate and hostname verification enabled");
                ClientConfig::builder()
                    .with_root_certificates(root_store)
                    .with_no_client_auth()
            }
        };

        Ok(config)
    }
}

/// Certificate verifier that accepts any certificate (`prefer`, `require`).
#[derive(Debug)]
struct NoVerifier;

impl rustls::client::danger::ServerCertVerifier for NoVerifier {
    fn verify_server_cert(
        &self,
        _end_entity: &rustls::pki_types::CertificateDer<'_>,
        _intermediates: &[rustls::pki_types::CertificateDer<'_>],
        _server_name: &rustls::pki_types::ServerName<'_>,
        _ocsp_response: &[u8],
        _now: rustls::pki_types::UnixTime,
    ) -> std::result::Result<rustls::client::danger::ServerCertVerified, rustls::Error> {
        Ok(rustls::client::danger::ServerCertVerified::assertion())
    }

    fn verify_tls12_signature(
        &self,
        _message: &[u8],
        _cert: &rustls::pki_types::CertificateDer<'_>,
        _dss: &rustls::DigitallySignedStruct,
    ) -> std::result::Result<rustls::client::danger::HandshakeSignatureValid, rustls::Error> {
        Ok(rustls::client::danger::HandshakeSignatureValid::assertion())
    }

    fn verify_tls13_signature(
        &self,
        _message: &[u8],
        _cert: &rustls::pki_types::CertificateDer<'_>,
        _dss: &rustls::DigitallySignedStruct,
    ) -> std::result::Result<rustls::client::danger::HandshakeSignatureValid, rustls::Error> {
        Ok(rustls::client::danger::HandshakeSignatureValid::assertion())
    }

    fn supported_verify_schemes(&self) -> Vec<rustls::SignatureScheme> {
        vec![
            rustls::SignatureScheme::RSA_PKCS1_SHA256,
            rustls::SignatureScheme::RSA_PKCS1_SHA384,
            rustls::SignatureScheme::RSA_PKCS1_SHA512,
            rustls::SignatureScheme::ECDSA_NISTP256_SHA256,
            rustls::SignatureScheme::ECDSA_NISTP384_SHA384,
            rustls::SignatureScheme::ECDSA_NISTP521_SHA512,
            rustls::SignatureScheme::RSA_PSS_SHA256,
            rustls::SignatureScheme::RSA_PSS_SHA384,
            rustls::SignatureScheme::RSA_PSS_SHA512,
            rustls::SignatureScheme::ED25519,
        ]
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_ssl_mode_parsing() {
        assert_eq!(SslMode::parse("disable").unwrap(), SslMode::Disable);
        assert_eq!(SslMode::parse("prefer").unwrap(), SslMode::Prefer);
        assert_eq!(SslMode::parse("require").unwrap(), SslMode::Require);
        assert_eq!(SslMode::parse("verify-ca").unwrap(), SslMode::VerifyCa);
        assert_eq!(SslMode::parse("VERIFY-FULL").unwrap(), SslMode::VerifyFull);
        assert!(SslMode::parse("invalid").is_err());
    }

    #[test]
    fn test_split_key_value() {
        let (rest, mode) =
            split_ssl_mode("host=db user=app sslmode=verify-full dbname=shop").unwrap();
        assert_eq!(mode, SslMode::VerifyFull);
        assert_eq!(rest, "host=db user=app dbname=shop");
    }

    #[test]
    fn test_split_url() {
        let (rest, mode) =
            split_ssl_mode("postgres://u@h/db?sslmode=require&connect_timeout=5").unwrap();
        assert_eq!(mode, SslMode::Require);
        assert_eq!(rest, "postgres://u@h/db?connect_timeout=5");

        let (rest, _) = split_ssl_mode("postgres://u@h/db?a=1&sslmode=disable").unwrap();
        assert_eq!(rest, "postgres://u@h/db?a=1");
    }

    #[test]
    fn test_split_absent() {
        let (rest, mode) = split_ssl_mode("host=db").unwrap();
        assert_eq!(rest, "host=db");
        assert_eq!(mode, SslMode::Disable);
    }

    #[test]
    fn test_prefer_is_its_own_mode() {
        let (rest, mode) = split_ssl_mode("host=db sslmode=prefer").unwrap();
        assert_eq!(rest, "host=db");
        assert_eq!(mode.as_str(), "prefer");
        assert!(mode.requires_tls());
        assert!(TlsBuilder::new(mode).build().unwrap().is_some());
    }

    #[test]
    fn test_split_ssl_mode_repeated_calls() {
        for _ in 0..3 {
            let (_, mode) = split_ssl_mode("SSLMODE = verify-ca host=db").unwrap();
            assert_eq!(mode, SslMode::VerifyCa);
        }
    }

    #[test]
    fn test_tls_builder() {
        assert!(TlsBuilder::new(SslMode::Disable).build().unwrap().is_none());
        assert!(TlsBuilder::new(SslMode::Require).build().unwrap().is_some());
        assert!(TlsBuilder::new(SslMode::VerifyFull).build().unwrap().is_some());
    }
}

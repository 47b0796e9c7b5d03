/*
 * Copyright Stalwart Labs Ltd.
 *
 * Licensed under the Apache License, Version 2.0 <LICENSE-APACHE or
 * https://www.apache.org/licenses/LICENSE-2.0> or the MIT license
 * <LICENSE-MIT or https://opensource.org/licenses/MIT>, at your
 * option. This file may not be copied, modified, or distributed
 * except according to those terms.
 */

use std::{convert::TryFrom, io, sync::Arc};

use rustls::{
    client::danger::{HandshakeSignatureValid, ServerCertVerified, ServerCertVerifier},
    ClientConfig, RootCertStore, SignatureScheme,
};
use rustls_pki_types::ServerName;
use tokio::io::{AsyncRead, AsyncWrite};
use tokio_rustls::{client::TlsStream, TlsConnector};

use crate::{Error, SmtpClient, Transport};

use super::{capability::STARTTLS, AssertReply, State};

impl<T: Transport> SmtpClient<T> {
    /// Returns `true` when the session should attempt STARTTLS: the stream is
    /// in clear text, the transport can be wrapped and the server offers it.
    pub(crate) fn wants_starttls(&self) -> bool {
        if self.stream.is_secure() || !self.capabilities.has(STARTTLS) {
            false
        } else if !self.stream.can_upgrade() {
            log::warn!(
                "{} offers STARTTLS but the transport cannot be upgraded, continuing in clear text",
                self.tls_hostname
            );
            false
        } else {
            true
        }
    }

    /// Sends STARTTLS, upgrades the stream in place and renegotiates
    /// capabilities over the encrypted channel. Does nothing when the stream
    /// is already encrypted, cannot be upgraded or the server does not offer it.
    pub(crate) async fn start_tls(&mut self) -> crate::Result<()> {
        self.require(&[State::Greeted])?;
        if !self.wants_starttls() {
            return Ok(());
        }
        self.state = State::SecureUpgrading;
        let result = self.negotiate_tls().await;
        self.settle(result, State::Greeted)
    }

    async fn negotiate_tls(&mut self) -> crate::Result<()> {
        self.cmd("STARTTLS", "")
            .await?
            .assert_code(&[220], Error::StartTlsFailed)?;

        // Nothing received before the handshake may be read as encrypted data.
        self.pending.clear();

        tokio::time::timeout(
            self.timeout,
            self.stream
                .upgrade_tls(&self.tls_connector, &self.tls_hostname),
        )
        .await
        .map_err(|_| crate::Error::Timeout)??;
        if self.debug {
            log::debug!("TLS established with {}", self.tls_hostname);
        }

        self.ehlo().await
    }
}

/// Runs the client side of a TLS handshake over `stream`.
pub async fn wrap_tls<T: AsyncRead + AsyncWrite + Unpin>(
    tls_connector: &TlsConnector,
    hostname: &str,
    stream: T,
) -> crate::Result<TlsStream<T>> {
    tls_connector
        .connect(
            ServerName::try_from(hostname)
                .map_err(|_| crate::Error::InvalidTLSName)?
                .to_owned(),
            stream,
        )
        .await
        .map_err(|err| {
            let kind = err.kind();
            if let Some(inner) = err.into_inner() {
                match inner.downcast::<rustls::Error>() {
                    Ok(error) => Error::Tls(error),
                    Err(error) => Error::Io(io::Error::new(kind, error)),
                }
            } else {
                Error::Io(io::Error::new(kind, "Unspecified"))
            }
        })
}

pub fn build_tls_connector(allow_invalid_certs: bool) -> TlsConnector {
    let config = if !allow_invalid_certs {
        let mut root_cert_store = RootCertStore::empty();
        root_cert_store.extend(webpki_roots::TLS_SERVER_ROOTS.iter().cloned());

        ClientConfig::builder()
            .with_root_certificates(root_cert_store)
            .with_no_client_auth()
    } else {
        ClientConfig::builder()
            .dangerous()
            .with_custom_certificate_verifier(Arc::new(DummyVerifier {}))
            .with_no_client_auth()
    };

    TlsConnector::from(Arc::new(config))
}

#[doc(hidden)]
#[derive(Debug)]
struct DummyVerifier;

impl ServerCertVerifier for DummyVerifier {
    fn verify_server_cert(
        &self,
        _end_entity: &rustls_pki_types::CertificateDer<'_>,
        _intermediates: &[rustls_pki_types::CertificateDer<'_>],
        _server_name: &rustls_pki_types::ServerName<'_>,
        _ocsp_response: &[u8],
        _now: rustls_pki_types::UnixTime,
    ) -> Result<ServerCertVerified, rustls::Error> {
        Ok(ServerCertVerified::assertion())
    }

    fn verify_tls12_signature(
        &self,
        _message: &[u8],
        _cert: &rustls_pki_types::CertificateDer<'_>,
        _dss: &rustls::DigitallySignedStruct,
    ) -> Result<HandshakeSignatureValid, rustls::Error> {
        Ok(HandshakeSignatureValid::assertion())
    }

    fn verify_tls13_signature(
        &self,
        _message: &[u8],
        _cert: &rustls_pki_types::CertificateDer<'_>,
        _dss: &rustls::DigitallySignedStruct,
    ) -> Result<HandshakeSignatureValid, rustls::Error> {
        Ok(HandshakeSignatureValid::assertion())
    }

    fn supported_verify_schemes(&self) -> Vec<SignatureScheme> {
        vec![
            SignatureScheme::RSA_PKCS1_SHA1,
            SignatureScheme::ECDSA_SHA1_Legacy,
            SignatureScheme::RSA_PKCS1_SHA256,
            SignatureScheme::ECDSA_NISTP256_SHA256,
            SignatureScheme::RSA_PKCS1_SHA384,
            SignatureScheme::ECDSA_NISTP384_SHA384,
            SignatureScheme::RSA_PKCS1_SHA512,
            SignatureScheme::ECDSA_NISTP521_SHA512,
            SignatureScheme::RSA_PSS_SHA256,
            SignatureScheme::RSA_PSS_SHA384,
            SignatureScheme::RSA_PSS_SHA512,
            SignatureScheme::ED25519,
            SignatureScheme::ED448,
        ]
    }
}

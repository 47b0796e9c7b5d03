/*
 * Copyright Stalwart Labs Ltd. See the COPYING
 * file at the top-level directory of this distribution.
 *
 * Licensed under the Apache License, Version 2.0 <LICENSE-APACHE or
 * https://www.apache.org/licenses/LICENSE-2.0> or the MIT license
 * <LICENSE-MIT or https://opensource.org/licenses/MIT>, at your
 * option. This file may not be copied, modified, or distributed
 * except according to those terms.
 */

use std::{future::Future, io, net::SocketAddr, time::Duration};

use tokio::{
    io::{AsyncRead, AsyncWrite},
    net::TcpStream,
};
use tokio_rustls::TlsConnector;

use crate::smtp::tls::wrap_tls;

use self::stream::SmtpStream;

pub mod stream;

/// A connected, ordered byte stream the session runs over.
pub trait Transport: AsyncRead + AsyncWrite + Unpin + Send {
    /// Returns `true` once the stream is encrypted.
    fn is_secure(&self) -> bool;

    /// Whether the stream can be wrapped in TLS after the connection is up.
    /// Sessions skip STARTTLS when this returns `false`.
    fn can_upgrade(&self) -> bool {
        true
    }

    /// Runs the TLS handshake over the current stream and replaces it with
    /// the encrypted one.
    fn upgrade_tls<'x>(
        &'x mut self,
        connector: &'x TlsConnector,
        server_name: &'x str,
    ) -> impl Future<Output = crate::Result<()>> + Send + 'x;
}

/// Resolves `hostname:port` to the first address returned.
pub async fn resolve(hostname: &str, port: u16) -> crate::Result<SocketAddr> {
    tokio::net::lookup_host((hostname, port))
        .await?
        .next()
        .ok_or_else(|| {
            io::Error::new(
                io::ErrorKind::NotFound,
                format!("could not resolve {hostname}:{port}"),
            )
            .into()
        })
}

/// Opens a TCP connection to `addr`. With `tls` set the stream is wrapped
/// before any SMTP traffic.
pub async fn connect(
    addr: SocketAddr,
    timeout: Duration,
    tls: Option<(&TlsConnector, &str)>,
) -> crate::Result<SmtpStream> {
    tokio::time::timeout(timeout, async {
        let stream = TcpStream::connect(addr).await?;
        Ok::<_, crate::Error>(match tls {
            Some((connector, server_name)) => {
                SmtpStream::Tls(wrap_tls(connector, server_name, stream).await?)
            }
            None => SmtpStream::Basic(stream),
        })
    })
    .await
    .map_err(|_| crate::Error::Timeout)?
}

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

use std::{
    future::Future,
    io,
    pin::Pin,
    task::{Context, Poll},
};

use tokio::{
    io::{AsyncRead, AsyncWrite, ReadBuf},
    net::TcpStream,
};
use tokio_rustls::{client::TlsStream, TlsConnector};

use crate::smtp::tls::wrap_tls;

use super::Transport;

/// TCP stream that can be upgraded to TLS in place.
#[allow(clippy::large_enum_variant)]
#[derive(Default)]
pub enum SmtpStream {
    Basic(TcpStream),
    Tls(TlsStream<TcpStream>),
    /// Left behind by a failed upgrade.
    #[default]
    None,
}

fn not_connected() -> io::Error {
    io::Error::new(io::ErrorKind::NotConnected, "stream is not connected")
}

impl Transport for SmtpStream {
    fn is_secure(&self) -> bool {
        matches!(self, SmtpStream::Tls(_))
    }

    fn upgrade_tls<'x>(
        &'x mut self,
        connector: &'x TlsConnector,
        server_name: &'x str,
    ) -> impl Future<Output = crate::Result<()>> + Send + 'x {
        async move {
            match std::mem::take(self) {
                SmtpStream::Basic(stream) => {
                    *self = SmtpStream::Tls(wrap_tls(connector, server_name, stream).await?);
                    Ok(())
                }
                SmtpStream::None => Err(not_connected().into()),
                tls => {
                    *self = tls;
                    Ok(())
                }
            }
        }
    }
}

impl AsyncRead for SmtpStream {
    fn poll_read(
        self: Pin<&mut Self>,
        cx: &mut Context<'_>,
        buf: &mut ReadBuf<'_>,
    ) -> Poll<io::Result<()>> {
        match self.get_mut() {
            SmtpStream::Basic(stream) => Pin::new(stream).poll_read(cx, buf),
            SmtpStream::Tls(stream) => Pin::new(stream).poll_read(cx, buf),
            SmtpStream::None => Poll::Ready(Err(not_connected())),
        }
    }
}

impl AsyncWrite for SmtpStream {
    fn poll_write(
        self: Pin<&mut Self>,
        cx: &mut Context<'_>,
        buf: &[u8],
    ) -> Poll<io::Result<usize>> {
        match self.get_mut() {
            SmtpStream::Basic(stream) => Pin::new(stream).poll_write(cx, buf),
            SmtpStream::Tls(stream) => Pin::new(stream).poll_write(cx, buf),
            SmtpStream::None => Poll::Ready(Err(not_connected())),
        }
    }

    fn poll_flush(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<io::Result<()>> {
        match self.get_mut() {
            SmtpStream::Basic(stream) => Pin::new(stream).poll_flush(cx),
            SmtpStream::Tls(stream) => Pin::new(stream).poll_flush(cx),
            SmtpStream::None => Poll::Ready(Err(not_connected())),
        }
    }

    fn poll_shutdown(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<io::Result<()>> {
        match self.get_mut() {
            SmtpStream::Basic(stream) => Pin::new(stream).poll_shutdown(cx),
            SmtpStream::Tls(stream) => Pin::new(stream).poll_shutdown(cx),
            SmtpStream::None => Poll::Ready(Ok(())),
        }
    }
}

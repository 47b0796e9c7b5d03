/*
 * Copyright Stalwart Labs Ltd.
 *
 * Licensed under the Apache License, Version 2.0 <LICENSE-APACHE or
 * https://www.apache.org/licenses/LICENSE-2.0> or the MIT license
 * <LICENSE-MIT or https://opensource.org/licenses/MIT>, at your
 * option. This file may not be copied, modified, or distributed
 * except according to those terms.
 */

use std::{
    collections::VecDeque,
    future::Future,
    io,
    pin::Pin,
    sync::{Arc, Mutex},
    task::{Context, Poll},
};

use tokio::io::{AsyncRead, AsyncWrite, ReadBuf};
use tokio_rustls::TlsConnector;

use crate::{SmtpClient, SmtpClientBuilder, Transport};

use super::{capability::Capabilities, State};

/// Scripted server: replays one segment per read and records what the
/// client writes.
pub(crate) struct MockStream {
    segments: VecDeque<Vec<u8>>,
    secure: bool,
    upgradable: bool,
    stalled: bool,
    log: MockLog,
}

#[derive(Clone, Default)]
pub(crate) struct MockLog(Arc<Mutex<Recorded>>);

#[derive(Default)]
struct Recorded {
    written: Vec<u8>,
    upgraded_at: Option<usize>,
    shutdown: bool,
}

impl MockStream {
    pub fn new<I>(segments: I) -> (Self, MockLog)
    where
        I: IntoIterator,
        I::Item: AsRef<[u8]>,
    {
        let _ = env_logger::builder().is_test(true).try_init();
        let log = MockLog::default();
        (
            MockStream {
                segments: segments
                    .into_iter()
                    .map(|segment| segment.as_ref().to_vec())
                    .collect(),
                secure: false,
                upgradable: true,
                stalled: false,
                log: log.clone(),
            },
            log,
        )
    }

    pub fn secure(mut self) -> Self {
        self.secure = true;
        self
    }

    pub fn without_upgrade(mut self) -> Self {
        self.upgradable = false;
        self
    }

    /// Once the scripted segments run out, reads never complete.
    pub fn stalled(mut self) -> Self {
        self.stalled = true;
        self
    }

    /// A session positioned in `state`, skipping the greeting exchange.
    pub fn client(stream: MockStream, state: State) -> SmtpClient<MockStream> {
        let builder = SmtpClientBuilder::new("mx.example.com", 587)
            .helo_host("client.example.com")
            .debug(true);
        let mut client = builder.session(stream);
        client.state = state;
        client
    }

    /// Same as [`MockStream::client`] with capabilities taken from an EHLO reply.
    pub fn client_with(
        stream: MockStream,
        state: State,
        ehlo: &str,
    ) -> SmtpClient<MockStream> {
        let mut client = Self::client(stream, state);
        client.capabilities = Capabilities::parse(
            &super::reply::ResponseParser::new()
                .parse(&mut ehlo.as_bytes().iter())
                .unwrap(),
        );
        client
    }
}

impl MockLog {
    pub fn written(&self) -> String {
        String::from_utf8(self.0.lock().unwrap().written.clone()).unwrap()
    }

    /// Client bytes written before the TLS upgrade, if one took place.
    pub fn written_before_tls(&self) -> Option<String> {
        let recorded = self.0.lock().unwrap();
        recorded
            .upgraded_at
            .map(|pos| String::from_utf8(recorded.written[..pos].to_vec()).unwrap())
    }

    pub fn is_shutdown(&self) -> bool {
        self.0.lock().unwrap().shutdown
    }
}

impl Transport for MockStream {
    fn is_secure(&self) -> bool {
        self.secure
    }

    fn can_upgrade(&self) -> bool {
        self.upgradable
    }

    fn upgrade_tls<'x>(
        &'x mut self,
        _connector: &'x TlsConnector,
        _server_name: &'x str,
    ) -> impl Future<Output = crate::Result<()>> + Send + 'x {
        async move {
            let mut recorded = self.log.0.lock().unwrap();
            recorded.upgraded_at = Some(recorded.written.len());
            self.secure = true;
            Ok(())
        }
    }
}

impl AsyncRead for MockStream {
    fn poll_read(
        self: Pin<&mut Self>,
        _cx: &mut Context<'_>,
        buf: &mut ReadBuf<'_>,
    ) -> Poll<io::Result<()>> {
        let this = self.get_mut();
        if let Some(mut segment) = this.segments.pop_front() {
            let len = segment.len().min(buf.remaining());
            buf.put_slice(&segment[..len]);
            if len < segment.len() {
                segment.drain(..len);
                this.segments.push_front(segment);
            }
        } else if this.stalled {
            return Poll::Pending;
        }
        Poll::Ready(Ok(()))
    }
}

impl AsyncWrite for MockStream {
    fn poll_write(
        self: Pin<&mut Self>,
        _cx: &mut Context<'_>,
        buf: &[u8],
    ) -> Poll<io::Result<usize>> {
        self.log.0.lock().unwrap().written.extend_from_slice(buf);
        Poll::Ready(Ok(buf.len()))
    }

    fn poll_flush(self: Pin<&mut Self>, _cx: &mut Context<'_>) -> Poll<io::Result<()>> {
        Poll::Ready(Ok(()))
    }

    fn poll_shutdown(self: Pin<&mut Self>, _cx: &mut Context<'_>) -> Poll<io::Result<()>> {
        self.log.0.lock().unwrap().shutdown = true;
        Poll::Ready(Ok(()))
    }
}

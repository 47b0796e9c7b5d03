/*
 * Copyright Stalwart Labs Ltd.
 *
 * Licensed under the Apache License, Version 2.0 <LICENSE-APACHE or
 * https://www.apache.org/licenses/LICENSE-2.0> or the MIT license
 * <LICENSE-MIT or https://opensource.org/licenses/MIT>, at your
 * option. This file may not be copied, modified, or distributed
 * except according to those terms.
 */

use tokio::io::{AsyncReadExt, AsyncWriteExt};

use crate::{SmtpClient, Transport};

use super::{
    capability::Capabilities,
    reply::{self, Response, ResponseParser},
    State,
};

impl<T: Transport> SmtpClient<T> {
    /// Reads one reply, starting with any bytes left over from the previous read.
    pub(crate) async fn read(&mut self) -> crate::Result<Response> {
        let mut parser = ResponseParser::new();

        if !self.pending.is_empty() {
            let pending = std::mem::take(&mut self.pending);
            let mut iter = pending.iter();
            match parser.parse(&mut iter) {
                Ok(reply) => {
                    self.pending = iter.as_slice().to_vec();
                    return Ok(self.trace_reply(reply));
                }
                Err(reply::Error::NeedsMoreData) => (),
                Err(err) => return Err(err.into()),
            }
        }

        let mut buf = vec![0u8; 1024];
        loop {
            let br = self.stream.read(&mut buf).await?;

            if br == 0 {
                return Err(crate::Error::ConnectionClosed);
            }

            let mut iter = buf[..br].iter();
            match parser.parse(&mut iter) {
                Ok(reply) => {
                    self.pending.extend_from_slice(iter.as_slice());
                    return Ok(self.trace_reply(reply));
                }
                Err(reply::Error::NeedsMoreData) => (),
                Err(err) => return Err(err.into()),
            }
        }
    }

    /// Waits for a reply without sending anything first.
    pub(crate) async fn read_reply(&mut self) -> crate::Result<Response> {
        tokio::time::timeout(self.timeout, self.read())
            .await
            .map_err(|_| crate::Error::Timeout)?
    }

    /// Sends `VERB args` and waits for the reply.
    pub(crate) async fn cmd(&mut self, verb: &str, args: &str) -> crate::Result<Response> {
        let line = command_line(verb, args);
        if self.debug {
            log::debug!("C: {}", line.trim_end());
        }
        self.exchange(line).await
    }

    /// Like [`SmtpClient::cmd`] but traces `redacted` instead of the line.
    pub(crate) async fn cmd_secret(
        &mut self,
        verb: &str,
        args: &str,
        redacted: &str,
    ) -> crate::Result<Response> {
        if self.debug {
            log::debug!("C: {redacted}");
        }
        self.exchange(command_line(verb, args)).await
    }

    async fn exchange(&mut self, line: String) -> crate::Result<Response> {
        tokio::time::timeout(self.timeout, async {
            self.stream.write_all(line.as_bytes()).await?;
            self.stream.flush().await?;
            self.read().await
        })
        .await
        .map_err(|_| crate::Error::Timeout)?
    }

    /// Sends a single command to the server and waits for the reply.
    ///
    /// The reply code is not checked and the session state is left as is,
    /// except that a transport failure or an undecodable reply aborts the session.
    pub async fn send(&mut self, verb: &str, args: &str) -> crate::Result<Response> {
        self.require_open()?;
        let result = self.cmd(verb, args).await;
        if let Err(err) = &result {
            if err.is_transport() || matches!(err, crate::Error::MalformedResponse(_)) {
                self.state = State::Aborted;
            }
        }
        result
    }

    /// Sends a QUIT command and closes the stream. Allowed from any state
    /// until the session is closed, including after a failure.
    pub async fn quit(&mut self) -> crate::Result<Response> {
        if self.state == State::Closed {
            return Err(crate::Error::InvalidState(self.state));
        }
        let result = self.cmd("QUIT", "").await;
        let shutdown = self.stream.shutdown().await;
        self.state = State::Closed;
        self.pending.clear();
        if self.debug {
            log::debug!("Session with {} closed", self.tls_hostname);
        }
        let response = result?;
        shutdown?;
        Ok(response)
    }

    pub fn state(&self) -> State {
        self.state
    }

    /// Capabilities from the most recent EHLO reply.
    pub fn capabilities(&self) -> &Capabilities {
        &self.capabilities
    }

    /// Authenticated user name, empty until AUTH succeeds.
    pub fn identity(&self) -> &str {
        &self.identity
    }

    pub fn is_secure(&self) -> bool {
        self.stream.is_secure()
    }

    pub(crate) fn require(&self, states: &[State]) -> crate::Result<()> {
        if states.contains(&self.state) {
            Ok(())
        } else {
            Err(crate::Error::InvalidState(self.state))
        }
    }

    fn require_open(&self) -> crate::Result<()> {
        if matches!(self.state, State::Closed | State::Aborted) {
            Err(crate::Error::InvalidState(self.state))
        } else {
            Ok(())
        }
    }

    /// Moves to `next` on success. Any failure leaves the session aborted.
    pub(crate) fn settle<R>(&mut self, result: crate::Result<R>, next: State) -> crate::Result<R> {
        self.state = if result.is_ok() { next } else { State::Aborted };
        if self.debug {
            log::debug!("Session state: {}", self.state);
        }
        result
    }

    fn trace_reply(&self, reply: Response) -> Response {
        if self.debug {
            for line in reply.lines() {
                log::debug!("S: {:03} {}", reply.code(), line);
            }
        }
        reply
    }
}

fn command_line(verb: &str, args: &str) -> String {
    if args.is_empty() {
        format!("{verb}\r\n")
    } else {
        format!("{verb} {args}\r\n")
    }
}

/*
 * Copyright Stalwart Labs Ltd.
 *
 * Licensed under the Apache License, Version 2.0 <LICENSE-APACHE or
 * https://www.apache.org/licenses/LICENSE-2.0> or the MIT license
 * <LICENSE-MIT or https://opensource.org/licenses/MIT>, at your
 * option. This file may not be copied, modified, or distributed
 * except according to those terms.
 */

use tokio::io::AsyncWriteExt;

use crate::{Error, SmtpClient, Transport};

use super::{reply::Response, AssertReply, State};

/// Ends DATA mode.
pub const END_OF_DATA: &[u8; 5] = b"\r\n.\r\n";

/// Whether the server took one recipient.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RecipientOutcome {
    pub address: String,
    pub accepted: bool,
}

/// One address or an ordered list of them.
pub trait IntoRecipients {
    fn into_recipients(self) -> Vec<String>;
}

impl IntoRecipients for &str {
    fn into_recipients(self) -> Vec<String> {
        vec![self.to_string()]
    }
}

impl IntoRecipients for String {
    fn into_recipients(self) -> Vec<String> {
        vec![self]
    }
}

impl<T: Into<String>> IntoRecipients for Vec<T> {
    fn into_recipients(self) -> Vec<String> {
        self.into_iter().map(Into::into).collect()
    }
}

impl<T: Into<String>, const N: usize> IntoRecipients for [T; N] {
    fn into_recipients(self) -> Vec<String> {
        self.into_iter().map(Into::into).collect()
    }
}

impl<T: AsRef<str>> IntoRecipients for &[T] {
    fn into_recipients(self) -> Vec<String> {
        self.iter().map(|rcpt| rcpt.as_ref().to_string()).collect()
    }
}

impl<T: Transport> SmtpClient<T> {
    /// Declares the envelope and enters DATA mode.
    ///
    /// Capabilities are renegotiated with EHLO first. The sender defaults to
    /// the authenticated user. Refused recipients are only traced, the
    /// transaction fails only when every recipient is refused.
    pub async fn envelope(
        &mut self,
        recipients: impl IntoRecipients,
        sender: Option<&str>,
    ) -> crate::Result<Response> {
        self.require(&[State::Greeted, State::Authenticated])?;
        let result = self.transaction(recipients.into_recipients(), sender).await;
        self.settle(result, State::Transacting)
    }

    async fn transaction(
        &mut self,
        recipients: Vec<String>,
        sender: Option<&str>,
    ) -> crate::Result<Response> {
        let sender = match sender {
            Some(sender) => sender.to_string(),
            None if !self.identity.is_empty() => self.identity.clone(),
            None => return Err(Error::MissingMailFrom),
        };
        if recipients.is_empty() {
            return Err(Error::MissingRcptTo);
        }

        self.ehlo().await?;
        self.mail_from(&sender).await?;

        let mut outcomes = Vec::with_capacity(recipients.len());
        let mut last = None;
        for address in recipients {
            let response = self.rcpt_to(&address).await?;
            let accepted = matches!(response.code(), 250 | 251);
            if !accepted && self.debug {
                log::debug!("Recipient <{address}> refused: {response}");
            }
            outcomes.push(RecipientOutcome { address, accepted });
            last = Some(response);
        }

        let accepted = outcomes.iter().filter(|outcome| outcome.accepted).count();
        if accepted == 0 {
            return Err(last.map_or(Error::MissingRcptTo, Error::AllRecipientsRejected));
        }
        if self.debug {
            log::debug!("{accepted} of {} recipients accepted", outcomes.len());
        }

        self.data().await
    }

    /// Sends a MAIL FROM command to the server.
    async fn mail_from(&mut self, addr: &str) -> crate::Result<Response> {
        self.cmd("MAIL", &format!("FROM:<{addr}>"))
            .await?
            .assert_code(&[250], Error::SenderRejected)
    }

    /// Sends a RCPT TO command, the caller decides what the reply means.
    async fn rcpt_to(&mut self, addr: &str) -> crate::Result<Response> {
        self.cmd("RCPT", &format!("TO:<{addr}>")).await
    }

    /// Sends a DATA command to the server.
    async fn data(&mut self) -> crate::Result<Response> {
        self.cmd("DATA", "")
            .await?
            .assert_code(&[354], Error::DataRejected)
    }

    /// Writes the message content followed by `CRLF . CRLF` and returns the
    /// server's final code with its trimmed text.
    ///
    /// The reply code is handed back as is, checking it is up to the caller.
    pub async fn transmit_body(
        &mut self,
        content: impl AsRef<[u8]>,
    ) -> crate::Result<(u16, String)> {
        self.require(&[State::Transacting])?;
        let content = content.as_ref();
        let result = tokio::time::timeout(self.timeout, async {
            if self.debug {
                log::debug!("C: <{} bytes of content>", content.len());
            }
            self.write_message(content).await?;
            self.read().await
        })
        .await
        .map_err(|_| crate::Error::Timeout)
        .and_then(|result| result)
        .map(|response| (response.code(), response.message()));
        self.settle(result, State::Sent)
    }

    async fn write_message(&mut self, message: &[u8]) -> tokio::io::Result<()> {
        // Transparency procedure
        #[derive(Debug)]
        enum State {
            Cr,
            CrLf,
            Init,
        }

        let mut state = State::CrLf;
        let mut last_pos = 0;
        for (pos, byte) in message.iter().enumerate() {
            if *byte == b'.' && matches!(state, State::CrLf) {
                if let Some(bytes) = message.get(last_pos..pos) {
                    self.stream.write_all(bytes).await?;
                    self.stream.write_all(b".").await?;
                    last_pos = pos;
                }
                state = State::Init;
            } else if *byte == b'\r' {
                state = State::Cr;
            } else if *byte == b'\n' && matches!(state, State::Cr) {
                state = State::CrLf;
            } else {
                state = State::Init;
            }
        }
        if let Some(bytes) = message.get(last_pos..) {
            if !bytes.is_empty() {
                self.stream.write_all(bytes).await?;
            }
        }
        self.stream.write_all(END_OF_DATA).await?;
        self.stream.flush().await
    }
}

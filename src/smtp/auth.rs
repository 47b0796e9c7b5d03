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

use std::{borrow::Cow, convert::TryFrom, fmt::Display};

use base64::{engine::general_purpose::STANDARD, Engine};

use crate::{Error, SmtpClient, Transport};

use super::{reply::Response, AssertReply, State};

#[derive(Clone)]
pub struct Credentials<'x> {
    username: Cow<'x, str>,
    secret: Cow<'x, str>,
}

impl<'x> From<(&'x str, &'x str)> for Credentials<'x> {
    fn from(credentials: (&'x str, &'x str)) -> Self {
        Credentials {
            username: credentials.0.into(),
            secret: credentials.1.into(),
        }
    }
}

impl<'x> From<(String, String)> for Credentials<'x> {
    fn from(credentials: (String, String)) -> Self {
        Credentials {
            username: credentials.0.into(),
            secret: credentials.1.into(),
        }
    }
}

impl std::fmt::Debug for Credentials<'_> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Credentials")
            .field("username", &self.username)
            .field("secret", &"<redacted>")
            .finish()
    }
}

/// Authentication mechanism, ordered by preference.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum Mechanism {
    /// Login
    Login = 1,

    /// Plain
    Plain = 2,
}

impl TryFrom<&str> for Mechanism {
    type Error = ();

    fn try_from(s: &str) -> Result<Self, Self::Error> {
        if s.eq_ignore_ascii_case("PLAIN") {
            Ok(Mechanism::Plain)
        } else if s.eq_ignore_ascii_case("LOGIN") {
            Ok(Mechanism::Login)
        } else {
            Err(())
        }
    }
}

impl Display for Mechanism {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Mechanism::Plain => write!(f, "PLAIN"),
            Mechanism::Login => write!(f, "LOGIN"),
        }
    }
}

impl Mechanism {
    /// Picks the preferred supported mechanism among the advertised ones.
    /// The order in which the server lists them does not matter.
    pub fn select<'y>(advertised: impl IntoIterator<Item = &'y str>) -> Option<Mechanism> {
        advertised
            .into_iter()
            .filter_map(|mechanism| Mechanism::try_from(mechanism).ok())
            .max()
    }
}

/// Standard base64 without line wrapping or trailing newline.
pub(crate) fn b64(value: impl AsRef<[u8]>) -> String {
    STANDARD.encode(value)
}

impl<'x> Credentials<'x> {
    /// Creates a new `Credentials` instance.
    pub fn new(
        username: impl Into<Cow<'x, str>>,
        secret: impl Into<Cow<'x, str>>,
    ) -> Credentials<'x> {
        Credentials {
            username: username.into(),
            secret: secret.into(),
        }
    }

    pub fn username(&self) -> &str {
        &self.username
    }

    /// Both the user name and the secret are set.
    pub fn is_complete(&self) -> bool {
        !self.username.is_empty() && !self.secret.is_empty()
    }

    /// `base64(NUL username NUL secret)`
    pub(crate) fn encode_plain(&self) -> String {
        b64(format!("\u{0}{}\u{0}{}", self.username, self.secret))
    }

    pub(crate) fn encode_username(&self) -> String {
        b64(self.username.as_bytes())
    }

    pub(crate) fn encode_secret(&self) -> String {
        b64(self.secret.as_bytes())
    }
}

impl<T: Transport> SmtpClient<T> {
    /// Authenticates with the best mechanism the server offers, PLAIN before
    /// LOGIN. Requires a completed EHLO.
    ///
    /// A 503 (already authenticated) reply is accepted as success.
    pub async fn authenticate(&mut self, credentials: &Credentials<'_>) -> crate::Result<Response> {
        self.require(&[State::Greeted, State::Authenticated])?;
        let result = self.auth(credentials).await;
        if result.is_ok() {
            self.identity = credentials.username().to_string();
        }
        self.settle(result, State::Authenticated)
    }

    async fn auth(&mut self, credentials: &Credentials<'_>) -> crate::Result<Response> {
        let mechanisms = self
            .capabilities
            .auth_mechanisms()
            .ok_or(Error::NoAuthMethod)?;
        let mechanism = Mechanism::select(mechanisms.iter().map(String::as_str))
            .ok_or_else(|| Error::UnsupportedAuthMechanism(mechanisms.to_vec()))?;
        if self.debug {
            log::debug!(
                "Authenticating {} with {mechanism} (offered: {})",
                credentials.username(),
                mechanisms.join(" ")
            );
        }

        let response = match mechanism {
            Mechanism::Plain => {
                self.cmd_secret(
                    "AUTH",
                    &format!("PLAIN {}", credentials.encode_plain()),
                    "AUTH PLAIN <credentials>",
                )
                .await?
            }
            Mechanism::Login => {
                self.cmd(
                    "AUTH",
                    &format!("LOGIN {}", credentials.encode_username()),
                )
                .await?
                .assert_code(&[334], Error::AuthRejected)?;
                self.cmd_secret(&credentials.encode_secret(), "", "<password>")
                    .await?
            }
        };

        response.assert_code(&[235, 503], Error::AuthRejected)
    }
}

#[cfg(test)]
mod test {
    use std::convert::TryInto;

    use base64::{engine::general_purpose::STANDARD, Engine};

    use crate::{
        smtp::{
            auth::{b64, Credentials, Mechanism},
            mock::MockStream,
            State,
        },
        Error,
    };

    const PLAIN_LOGIN: &str = "250-mx.example.com\r\n250-AUTH PLAIN LOGIN\r\n250 HELP\r\n";

    #[test]
    fn auth_encode() {
        assert_eq!(
            Credentials::new("tim", "tanstaaftanstaaf").encode_plain(),
            "AHRpbQB0YW5zdGFhZnRhbnN0YWFm"
        );
        assert_eq!(Credentials::new("tim", "tanstaaftanstaaf").encode_username(), "dGlt");
        assert_eq!(
            Credentials::new("tim", "tanstaaftanstaaf").encode_secret(),
            "dGFuc3RhYWZ0YW5zdGFhZg=="
        );

        let encoded = Credentials::new("user", "pass").encode_plain();
        assert!(!encoded.ends_with('\n'));
        assert_eq!(STANDARD.decode(&encoded).unwrap(), b"\0user\0pass");

        // No line wrapping on long values
        assert!(!b64("x".repeat(200)).contains('\n'));
    }

    #[test]
    fn select_mechanism() {
        assert_eq!(Mechanism::select(["PLAIN", "LOGIN"]), Some(Mechanism::Plain));
        assert_eq!(Mechanism::select(["LOGIN", "PLAIN"]), Some(Mechanism::Plain));
        assert_eq!(
            Mechanism::select(["CRAM-MD5", "login"]),
            Some(Mechanism::Login)
        );
        assert_eq!(Mechanism::select(["CRAM-MD5", "XOAUTH2"]), None);
        assert_eq!(Mechanism::select([]), None);

        let mut mechs: Vec<Mechanism> = vec![
            "PLAIN".try_into().unwrap(),
            "LOGIN".try_into().unwrap(),
        ];
        mechs.sort_unstable();
        assert_eq!(mechs, vec![Mechanism::Login, Mechanism::Plain]);
    }

    #[tokio::test]
    async fn auth_plain() {
        let (stream, log) = MockStream::new(["235 2.7.0 Authentication successful\r\n"]);
        let mut client = MockStream::client_with(stream, State::Greeted, PLAIN_LOGIN);

        let response = client
            .authenticate(&Credentials::new("user", "pass"))
            .await
            .unwrap();
        assert_eq!(response.code(), 235);
        assert_eq!(log.written(), "AUTH PLAIN AHVzZXIAcGFzcw==\r\n");
        assert_eq!(client.state(), State::Authenticated);
        assert_eq!(client.identity(), "user");
    }

    #[tokio::test]
    async fn auth_login() {
        let (stream, log) = MockStream::new(["334 UGFzc3dvcmQ6\r\n", "235 OK\r\n"]);
        let mut client = MockStream::client_with(
            stream,
            State::Greeted,
            "250-mx.example.com\r\n250 AUTH LOGIN CRAM-MD5\r\n",
        );

        client
            .authenticate(&Credentials::new("user", "pass"))
            .await
            .unwrap();
        assert_eq!(log.written(), "AUTH LOGIN dXNlcg==\r\ncGFzcw==\r\n");
        assert_eq!(client.state(), State::Authenticated);
    }

    #[tokio::test]
    async fn already_authenticated() {
        let (stream, _log) = MockStream::new(["503 5.5.1 Already authenticated\r\n"]);
        let mut client = MockStream::client_with(stream, State::Greeted, PLAIN_LOGIN);

        assert_eq!(
            client
                .authenticate(&Credentials::new("user", "pass"))
                .await
                .unwrap()
                .code(),
            503
        );
        assert_eq!(client.state(), State::Authenticated);
    }

    #[tokio::test]
    async fn auth_failures() {
        // Bad credentials
        let (stream, _log) = MockStream::new(["535 5.7.8 Bad credentials\r\n"]);
        let mut client = MockStream::client_with(stream, State::Greeted, PLAIN_LOGIN);
        match client.authenticate(&Credentials::new("user", "pass")).await {
            Err(Error::AuthRejected(response)) => assert_eq!(response.code(), 535),
            other => panic!("unexpected {other:?}"),
        }
        assert_eq!(client.state(), State::Aborted);
        assert_eq!(client.identity(), "");

        // Username refused by LOGIN, password never sent
        let (stream, log) = MockStream::new(["535 no\r\n"]);
        let mut client = MockStream::client_with(
            stream,
            State::Greeted,
            "250-mx.example.com\r\n250 AUTH LOGIN\r\n",
        );
        assert!(matches!(
            client.authenticate(&Credentials::new("user", "pass")).await,
            Err(Error::AuthRejected(_))
        ));
        assert_eq!(log.written(), "AUTH LOGIN dXNlcg==\r\n");

        // No AUTH extension
        let (stream, log) = MockStream::new(Vec::<&str>::new());
        let mut client = MockStream::client_with(
            stream,
            State::Greeted,
            "250-mx.example.com\r\n250 8BITMIME\r\n",
        );
        assert!(matches!(
            client.authenticate(&Credentials::new("user", "pass")).await,
            Err(Error::NoAuthMethod)
        ));
        assert_eq!(log.written(), "");

        // Only unsupported mechanisms
        let (stream, log) = MockStream::new(Vec::<&str>::new());
        let mut client = MockStream::client_with(
            stream,
            State::Greeted,
            "250-mx.example.com\r\n250 AUTH CRAM-MD5 XOAUTH2\r\n",
        );
        match client.authenticate(&Credentials::new("user", "pass")).await {
            Err(Error::UnsupportedAuthMechanism(mechanisms)) => {
                assert_eq!(mechanisms, vec!["CRAM-MD5", "XOAUTH2"])
            }
            other => panic!("unexpected {other:?}"),
        }
        assert_eq!(log.written(), "");

        // Before EHLO
        let (stream, _log) = MockStream::new(Vec::<&str>::new());
        let mut client = MockStream::client(stream, State::Connected);
        assert!(matches!(
            client.authenticate(&Credentials::new("user", "pass")).await,
            Err(Error::InvalidState(State::Connected))
        ));
    }
}

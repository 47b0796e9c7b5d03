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

//! # smtp-submit
//!
//! _smtp-submit_ is a small Rust library that drives a single message submission
//! over SMTP. It includes the following features:
//!
//! - Simple Mail Transfer Protocol (**SMTP**; _RFC 5321_) submission of one message per session.
//! - Implicit **TLS** or in-band upgrade with the STARTTLS extension (_RFC 3207_).
//! - SMTP Service Extension for Authentication (_RFC 4954_) with a fixed mechanism preference:
//!   - PLAIN
//!   - LOGIN
//! - Partial recipient acceptance: the transaction proceeds as long as one recipient is accepted.
//! - Full async (requires Tokio), one command in flight at any time.
//!
//! ## Usage Example
//!
//! Submit a message over implicit TLS, authenticating with the provided credentials:
//!
//! ```rust
//!     let mut client = SmtpClientBuilder::new("smtp.gmail.com", 465)
//!         .implicit_tls(true)
//!         .credentials(("john", "p4ssw0rd"))
//!         .connect()
//!         .await
//!         .unwrap();
//!
//!     client
//!         .envelope(["jane@example.com", "james@test.com"], Some("john@example.com"))
//!         .await
//!         .unwrap();
//!     let (code, text) = client
//!         .transmit_body("Subject: Hi!\r\n\r\nHello world!")
//!         .await
//!         .unwrap();
//!     println!("{code} {text}");
//!     client.quit().await.unwrap();
//! ```
//!
//! Connect in clear text on the submission port. The session upgrades the connection
//! with STARTTLS whenever the server advertises it:
//!
//! ```rust
//!     let client = SmtpClientBuilder::new("smtp.example.com", 587)
//!         .implicit_tls(false)
//!         .debug(true)
//!         .connect()
//!         .await
//!         .unwrap();
//! ```
//!
//! Building the message itself (headers, MIME structure) is left to the caller.
//!
//! ## License
//!
//! Licensed under either of
//!
//!  * Apache License, Version 2.0 ([LICENSE-APACHE](LICENSE-APACHE) or <http://www.apache.org/licenses/LICENSE-2.0>)
//!  * MIT license ([LICENSE-MIT](LICENSE-MIT) or <http://opensource.org/licenses/MIT>)
//!
//! at your option.
//!

pub mod smtp;
#[forbid(unsafe_code)]
pub mod transport;

use std::{fmt::Display, time::Duration};

use smtp::capability::Capabilities;
use tokio_rustls::TlsConnector;

pub use smtp::{auth::Credentials, reply::Response, tls::build_tls_connector, State};
pub use transport::{stream::SmtpStream, Transport};

/// Default I/O timeout applied to every exchange with the server.
pub const DEFAULT_TIMEOUT: Duration = Duration::from_secs(10);

#[derive(Debug)]
pub enum Error {
    /// I/O error
    Io(std::io::Error),

    /// TLS error
    Tls(Box<rustls::Error>),

    /// The server closed the connection in the middle of a reply.
    ConnectionClosed,

    /// The reply could not be decoded.
    MalformedResponse(smtp::reply::Error),

    /// The greeting did not carry code 220.
    ConnectFailed(Response),

    /// EHLO was not accepted.
    EhloFailed(Response),

    /// STARTTLS was not accepted.
    StartTlsFailed(Response),

    /// The server does not advertise the AUTH extension.
    NoAuthMethod,

    /// None of the advertised mechanisms is supported.
    UnsupportedAuthMechanism(Vec<String>),

    /// Credentials were refused.
    AuthRejected(Response),

    /// MAIL FROM was refused.
    SenderRejected(Response),

    /// Every RCPT TO was refused, carries the last reply.
    AllRecipientsRejected(Response),

    /// DATA was refused.
    DataRejected(Response),

    /// No sender was given and the session is not authenticated.
    MissingMailFrom,

    /// Empty recipient list.
    MissingRcptTo,

    /// Operation not allowed in the current session state.
    InvalidState(State),

    /// Invalid TLS name provided.
    InvalidTLSName,

    /// Connection timeout.
    Timeout,
}

pub type Result<T> = std::result::Result<T, Error>;

/// SMTP client session.
///
/// Owns the transport exclusively and walks the states described by [`State`],
/// from the greeting up to QUIT. A session submits exactly one message.
pub struct SmtpClient<T: Transport> {
    pub(crate) stream: T,
    pub(crate) timeout: Duration,
    pub(crate) state: State,
    pub(crate) capabilities: Capabilities,
    pub(crate) identity: String,
    pub(crate) helo_host: String,
    pub(crate) tls_connector: TlsConnector,
    pub(crate) tls_hostname: String,
    pub(crate) pending: Vec<u8>,
    pub(crate) debug: bool,
}

/// Connection parameters for a [`SmtpClient`].
#[derive(Clone)]
pub struct SmtpClientBuilder<'x> {
    pub hostname: String,
    pub port: u16,
    pub timeout: Duration,
    pub tls_connector: TlsConnector,
    pub tls_implicit: bool,
    pub credentials: Option<Credentials<'x>>,
    pub local_host: String,
    pub debug: bool,
}

impl Error {
    /// Returns `true` for failures of the underlying stream, including timeouts.
    pub fn is_transport(&self) -> bool {
        matches!(
            self,
            Error::Io(_)
                | Error::Tls(_)
                | Error::ConnectionClosed
                | Error::InvalidTLSName
                | Error::Timeout
        )
    }

    /// The server reply that caused the failure, if any.
    pub fn response(&self) -> Option<&Response> {
        match self {
            Error::ConnectFailed(response)
            | Error::EhloFailed(response)
            | Error::StartTlsFailed(response)
            | Error::AuthRejected(response)
            | Error::SenderRejected(response)
            | Error::AllRecipientsRejected(response)
            | Error::DataRejected(response) => Some(response),
            _ => None,
        }
    }
}

impl Display for Error {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Error::Io(e) => write!(f, "I/O error: {e}"),
            Error::Tls(e) => write!(f, "TLS error: {e}"),
            Error::ConnectionClosed => write!(f, "Connection closed by server"),
            Error::MalformedResponse(e) => write!(f, "Malformed SMTP reply: {e}"),
            Error::ConnectFailed(r) => write!(f, "Connection refused by server: {r}"),
            Error::EhloFailed(r) => write!(f, "EHLO failed: {r}"),
            Error::StartTlsFailed(r) => write!(f, "STARTTLS failed: {r}"),
            Error::NoAuthMethod => write!(f, "The server does not support authentication"),
            Error::UnsupportedAuthMechanism(mechanisms) => write!(
                f,
                "No supported authentication mechanism among {}",
                mechanisms.join(", ")
            ),
            Error::AuthRejected(r) => write!(f, "Authentication failed: {r}"),
            Error::SenderRejected(r) => write!(f, "Sender refused: {r}"),
            Error::AllRecipientsRejected(r) => write!(f, "All recipients refused: {r}"),
            Error::DataRejected(r) => write!(f, "DATA refused: {r}"),
            Error::MissingMailFrom => write!(f, "Missing message sender"),
            Error::MissingRcptTo => write!(f, "Missing message recipients"),
            Error::InvalidState(state) => write!(f, "Operation not allowed in state {state}"),
            Error::InvalidTLSName => write!(f, "Invalid TLS name provided"),
            Error::Timeout => write!(f, "Connection timeout"),
        }
    }
}

impl std::error::Error for Error {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            Error::Io(e) => Some(e),
            Error::Tls(e) => Some(e.as_ref()),
            Error::MalformedResponse(e) => Some(e),
            _ => None,
        }
    }
}

impl From<std::io::Error> for Error {
    fn from(err: std::io::Error) -> Self {
        Error::Io(err)
    }
}

impl From<smtp::reply::Error> for Error {
    fn from(err: smtp::reply::Error) -> Self {
        Error::MalformedResponse(err)
    }
}

impl From<rustls::Error> for Error {
    fn from(err: rustls::Error) -> Self {
        Error::Tls(Box::new(err))
    }
}

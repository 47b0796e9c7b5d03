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

use std::fmt::Display;

use self::reply::Response;

pub mod auth;
pub mod builder;
pub mod capability;
pub mod client;
pub mod envelope;
pub mod reply;
pub mod tls;

#[cfg(test)]
pub(crate) mod mock;

/// Session states, in the order a successful submission walks them.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum State {
    Init,
    /// Greeting received.
    Connected,
    /// EHLO accepted, capabilities known.
    Greeted,
    /// STARTTLS accepted, waiting for the handshake and the new EHLO.
    SecureUpgrading,
    Authenticated,
    /// In DATA mode, ready for the message content.
    Transacting,
    /// Content transmitted and the final reply read.
    Sent,
    Closed,
    /// A protocol or transport check failed, only QUIT remains.
    Aborted,
}

impl Display for State {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(match self {
            State::Init => "INIT",
            State::Connected => "CONNECTED",
            State::Greeted => "GREETED",
            State::SecureUpgrading => "SECURE-UPGRADING",
            State::Authenticated => "AUTHENTICATED",
            State::Transacting => "TRANSACTING",
            State::Sent => "SENT",
            State::Closed => "CLOSED",
            State::Aborted => "ABORTED",
        })
    }
}

pub(crate) trait AssertReply: Sized {
    /// Passes the reply through when its code is one of `codes`,
    /// otherwise turns it into the error built by `err`.
    fn assert_code(
        self,
        codes: &[u16],
        err: fn(Response) -> crate::Error,
    ) -> crate::Result<Response>;
}

impl AssertReply for Response {
    fn assert_code(
        self,
        codes: &[u16],
        err: fn(Response) -> crate::Error,
    ) -> crate::Result<Response> {
        if codes.contains(&self.code()) {
            Ok(self)
        } else {
            Err(err(self))
        }
    }
}

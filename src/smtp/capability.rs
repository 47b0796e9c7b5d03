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

use std::collections::HashMap;

use crate::{Error, SmtpClient, Transport};

use super::{reply::Response, AssertReply};

pub const STARTTLS: &str = "STARTTLS";
pub const AUTH: &str = "AUTH";

/// Service extensions recognised on the first line of an EHLO reply, where a
/// bare word is otherwise the server's domain.
const EXTENSIONS: &[&str] = &[
    AUTH,
    STARTTLS,
    "8BITMIME",
    "BINARYMIME",
    "CHUNKING",
    "DELIVERBY",
    "DSN",
    "ENHANCEDSTATUSCODES",
    "ETRN",
    "EXPN",
    "HELP",
    "MT-PRIORITY",
    "PIPELINING",
    "REQUIRETLS",
    "SIZE",
    "SMTPUTF8",
    "VRFY",
];

/// Extensions advertised in an EHLO reply, keyed by upper-cased keyword.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Capabilities {
    hostname: String,
    entries: HashMap<String, Option<Vec<String>>>,
}

impl Capabilities {
    /// Builds the capability set from an EHLO reply.
    ///
    /// Every line whose first word is a valid EHLO keyword is an entry. The
    /// first line normally carries the server's domain, kept as the host name,
    /// and only counts as an entry when it names a known extension. `AUTH=`
    /// lines are merged into `AUTH`.
    pub fn parse(response: &Response) -> Self {
        let mut capabilities = Capabilities::default();

        for (pos, line) in response.lines().iter().enumerate() {
            let mut words = line.split_ascii_whitespace();
            let Some(first) = words.next() else {
                continue;
            };
            if pos == 0 {
                capabilities.hostname = first.to_string();
            }

            let (keyword, inline) = match first.split_once('=') {
                Some((keyword, value)) if keyword.eq_ignore_ascii_case(AUTH) => {
                    (keyword, Some(value))
                }
                _ => (first, None),
            };
            if !is_keyword(keyword)
                || (pos == 0
                    && !EXTENSIONS
                        .iter()
                        .any(|extension| extension.eq_ignore_ascii_case(keyword)))
            {
                continue;
            }

            let keyword = keyword.to_ascii_uppercase();
            let is_auth = keyword == AUTH;
            let mut params = inline
                .into_iter()
                .chain(words)
                .filter(|param| !param.is_empty())
                .map(|param| {
                    if is_auth {
                        param.to_ascii_uppercase()
                    } else {
                        param.to_string()
                    }
                })
                .peekable();

            if params.peek().is_none() {
                capabilities.entries.entry(keyword).or_insert(None);
            } else {
                let merged = capabilities
                    .entries
                    .entry(keyword)
                    .or_insert(None)
                    .get_or_insert_with(Vec::new);
                for param in params {
                    if !merged.contains(&param) {
                        merged.push(param);
                    }
                }
            }
        }

        capabilities
    }

    /// First word of the EHLO reply, normally the server's domain.
    pub fn hostname(&self) -> &str {
        &self.hostname
    }

    pub fn has(&self, keyword: &str) -> bool {
        self.entries.contains_key(&keyword.to_ascii_uppercase())
    }

    pub fn params(&self, keyword: &str) -> Option<&[String]> {
        self.entries
            .get(&keyword.to_ascii_uppercase())
            .and_then(|params| params.as_deref())
    }

    /// Advertised SASL mechanisms in server order, `None` without AUTH.
    pub fn auth_mechanisms(&self) -> Option<&[String]> {
        self.entries
            .get(AUTH)
            .map(|params| params.as_deref().unwrap_or_default())
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, Option<&[String]>)> {
        self.entries
            .iter()
            .map(|(keyword, params)| (keyword.as_str(), params.as_deref()))
    }
}

/// `ehlo-keyword = (ALPHA / DIGIT) *(ALPHA / DIGIT / "-")`
fn is_keyword(word: &str) -> bool {
    word.as_bytes()
        .first()
        .is_some_and(|byte| byte.is_ascii_alphanumeric())
        && word
            .bytes()
            .all(|byte| byte.is_ascii_alphanumeric() || byte == b'-')
}

impl<T: Transport> SmtpClient<T> {
    /// Sends EHLO and replaces the capability set with the one in the reply.
    pub(crate) async fn ehlo(&mut self) -> crate::Result<()> {
        let helo_host = std::mem::take(&mut self.helo_host);
        let result = self.cmd("EHLO", &helo_host).await;
        self.helo_host = helo_host;

        let response = result?.assert_code(&[250], Error::EhloFailed)?;
        self.capabilities = Capabilities::parse(&response);
        if self.debug {
            log::debug!(
                "{} capabilities: {:?}",
                self.capabilities.hostname(),
                self.capabilities.entries.keys().collect::<Vec<_>>()
            );
        }
        Ok(())
    }
}

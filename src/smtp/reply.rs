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

pub(crate) const MAX_RESPONSE_LENGTH: usize = 4096;

/// A server reply to one command.
///
/// `text` is the concatenation of the content of every line, in order, with
/// each line's carriage return left in place. `lines` holds the same content
/// split at the line terminators with the carriage returns removed; capability
/// parsing and error display rely on it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Response {
    code: u16,
    text: String,
    lines: Vec<String>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Error {
    /// One of the three code bytes is not an ASCII digit.
    InvalidReplyCode,
    ResponseTooLong,
    NeedsMoreData,
}

impl Response {
    pub fn new(code: u16, lines: impl IntoIterator<Item = impl Into<String>>) -> Self {
        let lines: Vec<String> = lines.into_iter().map(Into::into).collect();
        let mut text = String::new();
        for line in &lines {
            text.push_str(line);
            text.push('\r');
        }
        Response { code, text, lines }
    }

    pub fn code(&self) -> u16 {
        self.code
    }

    pub fn text(&self) -> &str {
        &self.text
    }

    pub fn lines(&self) -> &[String] {
        &self.lines
    }

    /// All lines joined by a single space.
    pub fn message(&self) -> String {
        self.lines
            .iter()
            .map(|line| line.trim())
            .filter(|line| !line.is_empty())
            .collect::<Vec<_>>()
            .join(" ")
    }
}

impl Display for Response {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{:03} {}", self.code, self.message())
    }
}

impl Display for Error {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Error::InvalidReplyCode => write!(f, "invalid reply code"),
            Error::ResponseTooLong => write!(f, "reply exceeds {MAX_RESPONSE_LENGTH} bytes"),
            Error::NeedsMoreData => write!(f, "incomplete reply"),
        }
    }
}

impl std::error::Error for Error {}

enum ParserState {
    Code { digits: u8 },
    Separator,
    Text,
}

/// Incremental reply decoder.
///
/// Consumes three code bytes, one separator byte and the line content up to
/// `\n`, repeating while the separator is `-`. Bytes are taken from the
/// iterator one at a time, so anything after the end of the reply is left
/// untouched for the caller.
pub struct ResponseParser {
    state: ParserState,
    code: u16,
    is_last: bool,
    line: Vec<u8>,
    text: Vec<u8>,
    lines: Vec<String>,
    len: usize,
}

impl Default for ResponseParser {
    fn default() -> Self {
        Self {
            state: ParserState::Code { digits: 0 },
            code: 0,
            is_last: false,
            line: Vec::with_capacity(128),
            text: Vec::with_capacity(128),
            lines: Vec::with_capacity(4),
            len: 0,
        }
    }
}

impl ResponseParser {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn reset(&mut self) {
        *self = Self::default();
    }

    pub fn parse<'x>(
        &mut self,
        bytes: &mut impl Iterator<Item = &'x u8>,
    ) -> Result<Response, Error> {
        for &byte in bytes {
            self.len += 1;
            if self.len > MAX_RESPONSE_LENGTH {
                self.reset();
                return Err(Error::ResponseTooLong);
            }

            match self.state {
                ParserState::Code { digits } => {
                    if !byte.is_ascii_digit() {
                        self.reset();
                        return Err(Error::InvalidReplyCode);
                    }
                    if digits == 0 {
                        self.code = 0;
                    }
                    self.code = self.code * 10 + u16::from(byte - b'0');
                    self.state = if digits == 2 {
                        ParserState::Separator
                    } else {
                        ParserState::Code { digits: digits + 1 }
                    };
                }
                ParserState::Separator => {
                    self.is_last = byte != b'-';
                    if byte == b'\n' {
                        if let Some(response) = self.end_line() {
                            return Ok(response);
                        }
                    } else {
                        self.state = ParserState::Text;
                    }
                }
                ParserState::Text => {
                    if byte == b'\n' {
                        if let Some(response) = self.end_line() {
                            return Ok(response);
                        }
                    } else {
                        self.line.push(byte);
                    }
                }
            }
        }

        Err(Error::NeedsMoreData)
    }

    fn end_line(&mut self) -> Option<Response> {
        self.text.extend_from_slice(&self.line);
        let content = self.line.strip_suffix(b"\r").unwrap_or(&self.line);
        self.lines.push(String::from_utf8_lossy(content).into_owned());
        self.line.clear();
        self.state = ParserState::Code { digits: 0 };

        if self.is_last {
            let response = Response {
                code: self.code,
                text: String::from_utf8_lossy(&self.text).into_owned(),
                lines: std::mem::take(&mut self.lines),
            };
            self.reset();
            Some(response)
        } else {
            None
        }
    }
}

#[cfg(test)]
mod test {
    use super::{Error, Response, ResponseParser, MAX_RESPONSE_LENGTH};

    #[test]
    fn response_parser() {
        let mut parser = ResponseParser::new();

        // Multi-line reply
        let reply = concat!(
            "250-First line\r\n",
            "250-Second line\r\n",
            "250-234 Text beginning with numbers\r\n",
            "250 The last line\r\n",
        );
        let response = parser.parse(&mut reply.as_bytes().iter()).unwrap();
        assert_eq!(response.code(), 250);
        assert_eq!(
            response.lines(),
            &[
                "First line",
                "Second line",
                "234 Text beginning with numbers",
                "The last line"
            ]
        );
        assert_eq!(
            response.text(),
            "First line\rSecond line\r234 Text beginning with numbers\rThe last line\r"
        );

        // Single-line reply
        let response = parser
            .parse(&mut b"421 These pretzels are making me thirsty\r\n".iter())
            .unwrap();
        assert_eq!(response.code(), 421);
        assert_eq!(response.text(), "These pretzels are making me thirsty\r");
        assert_eq!(response.message(), "These pretzels are making me thirsty");

        // Chunked reply
        assert_eq!(
            parser.parse(&mut b"555-These pret".iter()),
            Err(Error::NeedsMoreData)
        );
        assert_eq!(
            parser.parse(&mut b"zels\r\n5".iter()),
            Err(Error::NeedsMoreData)
        );
        let response = parser
            .parse(&mut b"55 are making me thirsty\r\n".iter())
            .unwrap();
        assert_eq!(response.code(), 555);
        assert_eq!(response.lines(), &["These pretzels", "are making me thirsty"]);

        // Bare LF line endings and a code with no text
        let response = parser.parse(&mut b"250-one\n250\n".iter()).unwrap();
        assert_eq!(response.code(), 250);
        assert_eq!(response.lines(), &["one", ""]);

        // Any separator other than '-' ends the reply
        let response = parser.parse(&mut b"354Go ahead\r\n".iter()).unwrap();
        assert_eq!(response.code(), 354);
        assert_eq!(response.lines(), &["o ahead"]);

        // Non-digit code
        assert_eq!(
            parser.parse(&mut b"1zz-These pretzels are making me thirsty\r\n".iter()),
            Err(Error::InvalidReplyCode)
        );

        // Too long
        let mut long_response = Vec::new();
        (0..MAX_RESPONSE_LENGTH).for_each(|_| long_response.extend_from_slice(b"123-a\r\n"));
        long_response.extend_from_slice(b"123 a\r\n");
        assert_eq!(
            parser.parse(&mut long_response.iter()),
            Err(Error::ResponseTooLong)
        );
    }

    #[test]
    fn code_taken_from_final_line() {
        for (reply, code) in [
            ("220 ready\r\n", 220),
            ("250-a\r\n250-b\r\n250 c\r\n", 250),
            ("221-bye\r\n221 bye\r\n", 221),
            ("550-x\r\n551 y\r\n", 551),
            ("000 zero\r\n", 0),
            ("999-a\r\n999 b\r\n", 999),
        ] {
            let response = ResponseParser::new().parse(&mut reply.as_bytes().iter()).unwrap();
            assert_eq!(response.code(), code, "{reply:?}");
            assert_eq!(format!("{:03}", response.code()).len(), 3);
        }
    }

    #[test]
    fn leaves_trailing_bytes() {
        let bytes = b"220 hello\r\n250 next\r\n";
        let mut iter = bytes.iter();
        let response = ResponseParser::new().parse(&mut iter).unwrap();
        assert_eq!(response.code(), 220);
        assert_eq!(iter.as_slice(), b"250 next\r\n");
    }

    #[test]
    fn display() {
        assert_eq!(
            Response::new(550, ["5.1.1 No such user", "try again"]).to_string(),
            "550 5.1.1 No such user try again"
        );
    }
}

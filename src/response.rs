// SPDX-License-Identifier: AGPL-3.0-or-later
//
// Copyright © 2024 RemasteredArch
//
// This file is part of smtp_gateway.
//
// smtp_gateway is free software: you can redistribute it and/or modify it under the terms of the
// GNU Affero General Public License as published by the Free Software Foundation, either version
// 3 of the License, or (at your option) any later version.
//
// smtp_gateway is distributed in the hope that it will be useful, but WITHOUT ANY WARRANTY;
// without even the implied warranty of MERCHANTABILITY or FITNESS FOR A PARTICULAR PURPOSE. See
// the GNU Affero General Public License for more details.
//
// You should have received a copy of the GNU Affero General Public License along with
// smtp_gateway. If not, see <https://www.gnu.org/licenses/>.

//! Renders a status code and one or more text lines into SMTP reply bytes.
//!
//! [RFC 5321 § 4.2](https://www.rfc-editor.org/rfc/rfc5321.html#section-4.2): a single-line
//! reply is `NNN SP text CRLF`; a multi-line reply repeats the code on every line, using `-`
//! instead of a space on every line but the last.

use std::io;

use tokio::io::AsyncWriteExt;

/// The minimum required response codes this crate emits, named for what produces them.
///
/// Grouped the way the teacher crate's `str::max_lengths` groups RFC-numbered constants.
pub mod code {
    /// Initial greeting.
    pub const SERVICE_READY: u16 = 220;
    /// `QUIT` acknowledgement.
    pub const CLOSING: u16 = 221;
    /// `HELO`/`EHLO`/`MAIL FROM`/`RCPT TO`/end-of-`DATA`/`RSET`/`NOOP` success.
    pub const OK: u16 = 250;
    /// `DATA` acknowledgement; client may begin sending the message body.
    pub const START_MAIL_INPUT: u16 = 354;
    /// Forced close: shutdown, command timeout, or fatal I/O.
    pub const SERVICE_NOT_AVAILABLE: u16 = 421;
    /// Part of the required response vocabulary; this crate never emits it directly (a message
    /// handler's transient failure is reported as [`LOCAL_ERROR`] instead).
    pub const MAILBOX_UNAVAILABLE: u16 = 450;
    /// Message handler signalled a transient failure.
    pub const LOCAL_ERROR: u16 = 451;
    /// Too many recipients for this transaction.
    pub const INSUFFICIENT_STORAGE: u16 = 452;
    /// Unknown verb, line-too-long, or non-ASCII control bytes in a command.
    pub const SYNTAX_ERROR_COMMAND: u16 = 500;
    /// Syntax error in command parameters.
    pub const SYNTAX_ERROR_PARAMETERS: u16 = 501;
    /// `VRFY` (syntactic stub only).
    pub const NOT_IMPLEMENTED: u16 = 502;
    /// Command sent out of sequence for the current state.
    pub const BAD_SEQUENCE: u16 = 503;
    /// Unknown `MAIL FROM` parameter, or an unsupported `BODY=` value.
    pub const PARAMETER_NOT_IMPLEMENTED: u16 = 504;
    /// `SIZE=` exceeds the configured maximum, or the `DATA` body does.
    pub const SIZE_EXCEEDED: u16 = 552;
    /// Message handler signalled a permanent failure.
    pub const TRANSACTION_FAILED: u16 = 554;
    /// Server at its concurrency ceiling; sent before a session is even created.
    pub const TOO_MANY_CONNECTIONS: u16 = 421;
}

/// One SMTP reply: a three-digit status code and one or more text lines.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Response {
    code: u16,
    lines: Vec<String>,
}

impl Response {
    /// A single-line reply.
    #[must_use]
    pub fn new(code: u16, text: impl Into<String>) -> Self {
        Self {
            code,
            lines: vec![text.into()],
        }
    }

    /// A multi-line reply. Panics if `lines` is empty — every reply has at least one line.
    #[must_use]
    pub fn multiline(code: u16, lines: Vec<String>) -> Self {
        assert!(!lines.is_empty(), "a response must have at least one line");
        Self { code, lines }
    }

    #[must_use]
    pub const fn code(&self) -> u16 {
        self.code
    }

    #[must_use]
    pub fn lines(&self) -> &[String] {
        &self.lines
    }

    /// Render this reply as wire bytes: `NNN[ -]text CRLF` per line, continuation lines using
    /// `-` and the final line using a space, per RFC 5321 § 4.2.1.
    #[must_use]
    pub fn to_wire_bytes(&self) -> Vec<u8> {
        let mut out = Vec::new();
        let last = self.lines.len() - 1;

        for (i, line) in self.lines.iter().enumerate() {
            let separator = if i == last { ' ' } else { '-' };
            out.extend_from_slice(format!("{}{separator}{line}\r\n", self.code).as_bytes());
        }

        out
    }

    /// Write this reply to `writer`, looping until every byte is written (the transport may
    /// perform a partial write, per the transport contract in the crate's module documentation).
    ///
    /// # Errors
    ///
    /// Any [`io::Error`] from the underlying writer.
    pub async fn write_to<W: tokio::io::AsyncWrite + Unpin>(
        &self,
        writer: &mut W,
    ) -> io::Result<()> {
        writer.write_all(&self.to_wire_bytes()).await
    }
}

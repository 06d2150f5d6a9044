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

//! Drives one connection through the SMTP protocol: greet, read a command, parse it, run it
//! through the state machine, write the response, loop — switching to raw message assembly while
//! in the `DATA` phase.
//!
//! The command phase never buffers more than one line; the `512`-byte cap from RFC 5321
//! § 4.5.3.1.4 is enforced per line (not cumulatively over the read buffer, correcting a gap
//! acknowledged upstream of this crate). The `DATA` phase never buffers more than
//! `max_message_size` bytes of message body: once the running total would exceed it, the
//! remainder of the stream is scanned for the terminator without being retained.
//!
//! Exactly three points in a session suspend: reading a line, writing a response, and invoking
//! the message handler. All three are wrapped in a timeout; reads are additionally raced against
//! the server's shutdown broadcast so a `stop()` unblocks sessions that are idle mid-read. Unlike
//! the command phase (whose timeout resets on each line), the `DATA` phase uses a single deadline
//! computed once on entry so a client cannot stay connected indefinitely by trickling lines in
//! just under the per-read timeout.

use std::{io, sync::Arc};

use tokio::{io::AsyncReadExt, sync::broadcast, time::timeout};
use tracing::{debug, info, instrument, warn};

use crate::{
    command::{self, Command},
    config::Config,
    envelope::Envelope,
    error::SessionError,
    handler::{HandlerOutcome, MessageHandler},
    response::{code, Response},
    state::{self, Effect, State},
    transport::Connection,
};

/// The maximum a command line may occupy on the wire, per RFC 5321 § 4.5.3.1.4, including the
/// terminating CRLF.
const MAX_COMMAND_LINE: usize = 512;

/// The cap applied to `DATA` lines once the running message size has already overflowed
/// `max_message_size`. At that point the per-line budget computed from the remaining quota would
/// shrink towards zero and could misreport the terminator line itself as too long, so scanning
/// switches to this fixed, generous cap instead.
const DATA_SCAN_LINE_CAP: usize = 8192;

/// One live connection, owning its transport and transaction state exclusively.
pub struct Session {
    conn: LineReader<Box<dyn Connection>>,
    config: Arc<Config>,
    handler: Arc<dyn MessageHandler>,
    state: State,
    extended: bool,
    envelope: Envelope,
}

/// Why a session's `run` loop returned.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CloseReason {
    Quit,
    Eof,
    Timeout,
    Shutdown,
    TransportError,
}

impl Session {
    #[must_use]
    pub fn new(conn: Box<dyn Connection>, config: Arc<Config>, handler: Arc<dyn MessageHandler>) -> Self {
        Self {
            conn: LineReader::new(conn),
            config,
            handler,
            state: State::Initial,
            extended: false,
            envelope: Envelope::new(),
        }
    }

    /// Greet the client, then read and answer commands until the connection closes, the client
    /// quits, a timeout expires, or `shutdown` fires.
    #[instrument(skip_all, fields(peer = %self.peer_addr()))]
    pub async fn run(mut self, mut shutdown: broadcast::Receiver<()>) -> CloseReason {
        let greeting = Response::new(
            code::SERVICE_READY,
            format!("{} SMTP service ready", self.config.domain),
        );
        if self.write(&greeting).await.is_err() {
            return CloseReason::TransportError;
        }

        info!("session started");

        let reason = loop {
            if matches!(self.state, State::Closed) {
                break CloseReason::Quit;
            }

            let outcome = tokio::select! {
                biased;
                _ = shutdown.recv() => ReadOutcome::Shutdown,
                outcome = self.read_command() => outcome,
            };

            match outcome {
                ReadOutcome::Command(command) => match self.dispatch(command, &mut shutdown).await {
                    Ok(()) => {}
                    // The `DATA` phase already wrote its own terminal notification before
                    // returning these; writing another here would double up on the wire.
                    Err(SessionError::Shutdown) => break CloseReason::Shutdown,
                    Err(SessionError::Timeout) => break CloseReason::Timeout,
                    Err(SessionError::Transport(_)) => break CloseReason::TransportError,
                },
                ReadOutcome::Reject(response) => {
                    if self.write(&response).await.is_err() {
                        break CloseReason::TransportError;
                    }
                }
                ReadOutcome::Eof => break CloseReason::Eof,
                ReadOutcome::Timeout => {
                    let _ = self.write(&Response::new(code::SERVICE_NOT_AVAILABLE, "Timed out")).await;
                    break CloseReason::Timeout;
                }
                ReadOutcome::Shutdown => {
                    let _ = self
                        .write(&Response::new(code::SERVICE_NOT_AVAILABLE, "Service shutting down"))
                        .await;
                    break CloseReason::Shutdown;
                }
                ReadOutcome::TransportError => break CloseReason::TransportError,
            }
        };

        debug!(?reason, "session closed");
        reason
    }

    fn peer_addr(&self) -> String {
        self.conn
            .peer_addr()
            .map_or_else(|_| "unknown".to_string(), |addr| addr.to_string())
    }

    /// The read timeout for the next command line: [`Config::idle_timeout`] while no transaction
    /// is in progress (the client hasn't started one yet, or the previous one just completed),
    /// [`Config::command_timeout`] once a transaction has begun (the stricter per-command bound
    /// RFC 5321 § 4.5.3.2 enumerates for `MAIL`/`RCPT`/`DATA`).
    fn next_command_timeout(&self) -> std::time::Duration {
        match self.state {
            State::Initial | State::Greeted => self.config.idle_timeout,
            State::MailReceived | State::RcptReceived | State::Data | State::Closed => {
                self.config.command_timeout
            }
        }
    }

    async fn read_command(&mut self) -> ReadOutcome {
        match timeout(self.next_command_timeout(), self.conn.read_line(MAX_COMMAND_LINE)).await {
            Ok(Ok(LineEvent::Line(bytes))) => match validate_ascii(&bytes) {
                Some(text) => ReadOutcome::Command(command::parse(&text)),
                // Non-ASCII/control bytes are a session-level rejection (RFC 5321 § 4.5.3.1.4),
                // not a parser-level syntax error: the specification maps this to 500, the same
                // code as an unrecognised verb, rather than the 501 a malformed parameter gets.
                None => ReadOutcome::Reject(Response::new(
                    code::SYNTAX_ERROR_COMMAND,
                    "Command contained a disallowed control byte",
                )),
            },
            Ok(Ok(LineEvent::TooLong)) => {
                warn!("command line exceeded {MAX_COMMAND_LINE} bytes");
                ReadOutcome::Reject(Response::new(code::SYNTAX_ERROR_COMMAND, "Command line too long"))
            }
            Ok(Ok(LineEvent::Eof)) => ReadOutcome::Eof,
            Ok(Err(error)) => {
                warn!(%error, "transport read failed");
                ReadOutcome::TransportError
            }
            Err(_elapsed) => ReadOutcome::Timeout,
        }
    }

    async fn dispatch(
        &mut self,
        command: Command,
        shutdown: &mut broadcast::Receiver<()>,
    ) -> Result<(), SessionError> {
        let recipient_count = self.envelope.recipients().len();
        let transition = state::transition(self.state, self.extended, command, &self.config, recipient_count);

        self.state = transition.next_state;
        self.extended = transition.next_extended;

        match transition.effect {
            Effect::None => {}
            Effect::SetFrom(address) => self.envelope.set_from(address),
            Effect::AddRecipient(address) => self.envelope.add_recipient(address),
            Effect::ClearEnvelope => self.envelope.reset(),
            Effect::Close => {}
            Effect::EnterData => {
                self.write(&transition.response).await?;
                return self.run_data_phase(shutdown).await;
            }
        }

        self.write(&transition.response).await
    }

    /// Read and assemble the message body until the `CRLF.CRLF` terminator, enforcing
    /// `max_message_size` and undoing dot-stuffing, then invoke the handler and report its
    /// outcome.
    ///
    /// The whole phase — every line read and the handler invocation itself — is bounded by a
    /// single deadline computed on entry, and every read races the server's `shutdown` broadcast
    /// the same way the command-phase loop does, so a `stop()` unblocks a session parked mid-DATA
    /// instead of waiting out its `data_timeout`.
    async fn run_data_phase(&mut self, shutdown: &mut broadcast::Receiver<()>) -> Result<(), SessionError> {
        let mut data = Vec::new();
        let mut overflowed = false;
        let deadline = tokio::time::Instant::now() + self.config.data_timeout;

        loop {
            let cap = next_data_line_cap(self.config.max_message_size, data.len(), overflowed);

            let line = tokio::select! {
                biased;
                _ = shutdown.recv() => {
                    let _ = self
                        .write_best_effort(&Response::new(code::SERVICE_NOT_AVAILABLE, "Service shutting down"))
                        .await;
                    self.envelope.reset();
                    self.state = State::Closed;
                    return Err(SessionError::Shutdown);
                }
                outcome = tokio::time::timeout_at(deadline, self.conn.read_line(cap)) => match outcome {
                    Ok(Ok(LineEvent::Line(bytes))) => bytes,
                    Ok(Ok(LineEvent::TooLong)) => {
                        overflowed = true;
                        continue;
                    }
                    Ok(Ok(LineEvent::Eof)) => {
                        // Premature close mid-DATA: discard the partial envelope, no handler call.
                        self.envelope.reset();
                        self.state = State::Closed;
                        return Err(SessionError::Transport(io::Error::new(
                            io::ErrorKind::UnexpectedEof,
                            "connection closed during DATA",
                        )));
                    }
                    Ok(Err(e)) => return Err(SessionError::Transport(e)),
                    Err(_elapsed) => {
                        let _ = self
                            .write_best_effort(&Response::new(code::SERVICE_NOT_AVAILABLE, "DATA timed out"))
                            .await;
                        self.envelope.reset();
                        self.state = State::Closed;
                        return Err(SessionError::Timeout);
                    }
                },
            };

            if line == b"." {
                break;
            }

            let content = unstuff(&line);

            if !overflowed {
                let additional = content.len() + 2; // accounts for the CRLF this crate re-appends
                if data.len() + additional > self.config.max_message_size {
                    overflowed = true;
                } else {
                    data.extend_from_slice(content);
                    data.extend_from_slice(b"\r\n");
                }
            }
        }

        if overflowed {
            self.envelope.reset();
            self.state = State::Greeted;
            return self
                .write_within(
                    &Response::new(code::SIZE_EXCEEDED, "Message exceeds fixed maximum message size"),
                    deadline,
                )
                .await;
        }

        self.envelope.set_data(data);

        let outcome = match tokio::time::timeout_at(deadline, self.handler.handle(self.envelope.clone())).await {
            Ok(outcome) => outcome,
            Err(_elapsed) => {
                let _ = self
                    .write_best_effort(&Response::new(code::SERVICE_NOT_AVAILABLE, "Message handler timed out"))
                    .await;
                self.envelope.reset();
                self.state = State::Closed;
                return Err(SessionError::Timeout);
            }
        };
        self.envelope.reset();
        self.state = State::Greeted;

        let response = match outcome {
            HandlerOutcome::Accepted => {
                Response::new(code::OK, format!("OK {}", uuid::Uuid::new_v4()))
            }
            HandlerOutcome::TransientFailure => {
                Response::new(code::LOCAL_ERROR, "Message temporarily rejected")
            }
            HandlerOutcome::PermanentFailure => {
                Response::new(code::TRANSACTION_FAILED, "Transaction failed")
            }
        };
        self.write_within(&response, deadline).await
    }

    /// Write `response`, bounded by a fresh [`Self::next_command_timeout`] deadline.
    async fn write(&mut self, response: &Response) -> Result<(), SessionError> {
        let deadline = tokio::time::Instant::now() + self.next_command_timeout();
        self.write_within(response, deadline).await
    }

    /// Write `response`, bounded by `deadline` rather than a fresh timeout — used inside a phase
    /// that already owns a deadline (`DATA`) so a slow write cannot extend the phase's budget.
    async fn write_within(&mut self, response: &Response, deadline: tokio::time::Instant) -> Result<(), SessionError> {
        match tokio::time::timeout_at(deadline, response.write_to(&mut self.conn)).await {
            Ok(Ok(())) => Ok(()),
            Ok(Err(error)) => Err(SessionError::Transport(error)),
            Err(_elapsed) => Err(SessionError::Timeout),
        }
    }

    /// Write `response` with a fresh, short timeout, for best-effort terminal notifications
    /// (shutdown/timeout paths) where the phase's own deadline has already elapsed and would fail
    /// the write instantly rather than give the client a chance to see it.
    async fn write_best_effort(&mut self, response: &Response) -> Result<(), SessionError> {
        let deadline = tokio::time::Instant::now() + self.config.command_timeout;
        self.write_within(response, deadline).await
    }
}

/// The cap to pass to the next `DATA`-phase `LineReader::read_line` call.
///
/// While the message still fits, bounds a single line to the remaining budget plus one byte of
/// slack: a line whose unstuffed content fits within `remaining` bytes occupies, worst case (a
/// stuffed leading dot plus the CRLF this crate re-appends), `remaining + 1` wire bytes including
/// its terminator, so this never misreports a legitimately-fitting line as [`LineEvent::TooLong`].
/// Once the message has already overflowed, the remaining-budget math would shrink towards zero
/// and could flag the terminator line itself, so scanning switches to a fixed, generous cap
/// instead.
fn next_data_line_cap(max_message_size: usize, assembled_len: usize, overflowed: bool) -> usize {
    if overflowed {
        return DATA_SCAN_LINE_CAP;
    }
    max_message_size.saturating_sub(assembled_len).saturating_add(1)
}

/// What the command-phase read loop produced.
enum ReadOutcome {
    Command(Command),
    /// Rejected before reaching the parser/state machine; write `response` and keep the current
    /// state (the specification requires the session to "process the next command normally").
    Reject(Response),
    Eof,
    Timeout,
    Shutdown,
    TransportError,
}

/// Validate that a command line contains only ASCII bytes with no disallowed control bytes
/// (anything below `0x20` other than horizontal tab), per RFC 5321 § 4.5.3.1.4's command-line
/// restriction. Returns the line as `String` if clean.
fn validate_ascii(bytes: &[u8]) -> Option<String> {
    if !bytes.is_ascii() {
        return None;
    }
    if bytes.iter().any(|&b| b < 0x20 && b != b'\t') {
        return None;
    }
    Some(String::from_utf8(bytes.to_vec()).expect("validated ASCII is valid UTF-8"))
}

/// Undo RFC 5321 § 4.5.2 dot-stuffing: a leading `.` followed by more bytes loses that one `.`;
/// a line that is exactly `.` is the terminator and is handled by the caller before this is
/// reached.
fn unstuff(line: &[u8]) -> &[u8] {
    if line.first() == Some(&b'.') {
        &line[1..]
    } else {
        line
    }
}

/// What one [`LineReader::read_line`] call produced.
#[derive(Debug, PartialEq, Eq)]
enum LineEvent {
    /// A complete line, with its terminator stripped.
    Line(Vec<u8>),
    /// The line (including its terminator) exceeded the requested cap.
    TooLong,
    /// The connection was closed before a terminator was seen.
    Eof,
}

/// Buffers bytes read from a connection and splits them into lines terminated by `LF`, tolerating
/// a bare `LF` but stripping a preceding `CR` when present (RFC 5321 § 2.3.8 transparency for
/// common client bugs).
///
/// Enforces `cap` (including the terminator) without retaining unbounded memory for a line that
/// never terminates: once the accumulated, unterminated prefix exceeds `cap`, buffered content is
/// dropped and the reader switches to scanning newly-read bytes for the terminator only, still
/// honoring `cap` as a resynchronisation point rather than a hard limit on total bytes discarded.
struct LineReader<C> {
    conn: C,
    buf: Vec<u8>,
}

impl<C> LineReader<C>
where
    C: tokio::io::AsyncRead + Unpin,
{
    fn new(conn: C) -> Self {
        Self { conn, buf: Vec::new() }
    }

    async fn read_line(&mut self, cap: usize) -> io::Result<LineEvent> {
        let mut discarding = self.buf.len() > cap;

        loop {
            if let Some(lf_pos) = self.buf.iter().position(|&b| b == b'\n') {
                let line_end = if lf_pos > 0 && self.buf[lf_pos - 1] == b'\r' {
                    lf_pos - 1
                } else {
                    lf_pos
                };
                let too_long = discarding || lf_pos + 1 > cap;
                let line = self.buf[..line_end].to_vec();
                self.buf.drain(..=lf_pos);

                return Ok(if too_long { LineEvent::TooLong } else { LineEvent::Line(line) });
            }

            if self.buf.len() > cap && !discarding {
                discarding = true;
                self.buf.clear();
            }

            let mut chunk = [0u8; 4096];
            let n = self.conn.read(&mut chunk).await?;
            if n == 0 {
                return Ok(LineEvent::Eof);
            }
            self.buf.extend_from_slice(&chunk[..n]);
        }
    }

    fn peer_addr(&self) -> io::Result<std::net::SocketAddr>
    where
        C: Connection,
    {
        self.conn.peer_addr()
    }
}

impl<C> tokio::io::AsyncWrite for LineReader<C>
where
    C: tokio::io::AsyncWrite + Unpin,
{
    fn poll_write(
        self: std::pin::Pin<&mut Self>,
        cx: &mut std::task::Context<'_>,
        buf: &[u8],
    ) -> std::task::Poll<io::Result<usize>> {
        let this = self.get_mut();
        std::pin::Pin::new(&mut this.conn).poll_write(cx, buf)
    }

    fn poll_flush(
        self: std::pin::Pin<&mut Self>,
        cx: &mut std::task::Context<'_>,
    ) -> std::task::Poll<io::Result<()>> {
        let this = self.get_mut();
        std::pin::Pin::new(&mut this.conn).poll_flush(cx)
    }

    fn poll_shutdown(
        self: std::pin::Pin<&mut Self>,
        cx: &mut std::task::Context<'_>,
    ) -> std::task::Poll<io::Result<()>> {
        let this = self.get_mut();
        std::pin::Pin::new(&mut this.conn).poll_shutdown(cx)
    }
}

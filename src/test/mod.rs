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

//! End-to-end scenarios driven over a real loopback `TcpStream`, one per session, the way the
//! crate is actually used by a host application. Unit-level parser/state-machine properties live
//! beside the code they exercise; this module covers the session/server wiring between them.


use std::{sync::Arc, time::Duration};

use async_trait::async_trait;
use tokio::{
    io::{AsyncBufReadExt, AsyncWriteExt, BufReader},
    net::TcpStream,
    sync::Mutex,
};

use crate::{
    config::Config,
    envelope::Envelope,
    handler::{HandlerOutcome, MessageHandler},
    server::Server,
    transport::TcpTransport,
};

/// Records every envelope it receives and returns a fixed, configurable outcome.
struct Recording {
    envelopes: Mutex<Vec<Envelope>>,
    outcome: HandlerOutcome,
}

impl Recording {
    fn accepting() -> Self {
        Self {
            envelopes: Mutex::new(Vec::new()),
            outcome: HandlerOutcome::Accepted,
        }
    }
}

#[async_trait]
impl MessageHandler for Arc<Recording> {
    async fn handle(&self, envelope: Envelope) -> HandlerOutcome {
        self.envelopes.lock().await.push(envelope);
        self.outcome
    }
}

/// Starts a server with `config` (host/port are overwritten to an ephemeral loopback port) and
/// the given handler, returning a connected client stream and a way to inspect received
/// envelopes once the test is done with it.
async fn start(config: Config, handler: Arc<Recording>) -> (TcpStream, crate::server::ServerHandle) {
    init_tracing();

    let transport = TcpTransport::bind("127.0.0.1:0").await.expect("bind ephemeral port");
    let addr = transport.local_addr().expect("bound transport has a local address");

    let config = Config { listen_host: addr.ip().to_string(), listen_port: addr.port(), ..config };
    let server = Server::new(config, handler);
    let handle = server.start_on(transport);

    let client = TcpStream::connect(addr).await.expect("connect to freshly bound listener");
    (client, handle)
}

/// Send `line` followed by a literal CRLF.
async fn send(stream: &mut TcpStream, line: &str) {
    stream.write_all(line.as_bytes()).await.expect("write command line");
    stream.write_all(b"\r\n").await.expect("write CRLF");
}

/// Send raw bytes verbatim (for boundary tests that need to control the exact wire length).
async fn send_raw(stream: &mut TcpStream, bytes: &[u8]) {
    stream.write_all(bytes).await.expect("write raw bytes");
}

/// Read one reply: one line for a single-line reply, every line up to and including the first
/// whose separator (the 4th byte) is a space, for a multi-line reply. Bounded by a generous
/// timeout so a protocol bug hangs the test instead of the whole suite.
async fn read_reply(reader: &mut BufReader<&mut TcpStream>) -> Vec<String> {
    let mut lines = Vec::new();
    loop {
        let mut line = String::new();
        let read = tokio::time::timeout(Duration::from_secs(5), reader.read_line(&mut line))
            .await
            .expect("reply arrived within the test timeout")
            .expect("read reply line");
        assert!(read > 0, "connection closed before a reply was sent");

        let is_final = line.as_bytes().get(3) == Some(&b' ');
        lines.push(line.trim_end().to_string());
        if is_final {
            break;
        }
    }
    lines
}

fn code_of(line: &str) -> &str {
    &line[..3]
}

/// Route session/server `tracing` events to the test's stdout, so a failing scenario can be
/// re-run with `cargo test -- --nocapture` to see connection lifecycle and state transitions.
/// Safe to call from every test: the actual subscriber registration happens at most once.
fn init_tracing() {
    static INIT: std::sync::Once = std::sync::Once::new();
    INIT.call_once(|| {
        let _ = tracing_subscriber::fmt()
            .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
            .with_test_writer()
            .try_init();
    });
}

// S1 — Minimal session: EHLO, MAIL FROM, RCPT TO, DATA, QUIT, with the handler receiving the
// envelope exactly as assembled.
#[tokio::test]
async fn s1_minimal_session_delivers_the_envelope() {
    let recording = Arc::new(Recording::accepting());
    let (mut client, handle) = start(Config::builder().domain("localhost").build(), Arc::clone(&recording)).await;
    let mut reader = BufReader::new(&mut client);

    assert!(is_valid_response::server_greeting(&read_reply(&mut reader).await));

    send(reader.get_mut(), "EHLO client.example").await;
    let ehlo = read_reply(&mut reader).await;
    assert_eq!(ehlo.len(), 3);
    assert_eq!(code_of(&ehlo[0]), "250");

    send(reader.get_mut(), "MAIL FROM:<a@x>").await;
    assert_eq!(code_of(&read_reply(&mut reader).await[0]), "250");

    send(reader.get_mut(), "RCPT TO:<b@y>").await;
    assert_eq!(code_of(&read_reply(&mut reader).await[0]), "250");

    send(reader.get_mut(), "DATA").await;
    assert_eq!(code_of(&read_reply(&mut reader).await[0]), "354");

    reader.get_mut().write_all(b"Subject: hi\r\n\r\nhello\r\n.\r\n").await.unwrap();
    assert_eq!(code_of(&read_reply(&mut reader).await[0]), "250");

    send(reader.get_mut(), "QUIT").await;
    assert_eq!(code_of(&read_reply(&mut reader).await[0]), "221");

    handle.stop(Duration::from_secs(1)).await;

    let envelopes = recording.envelopes.lock().await;
    assert_eq!(envelopes.len(), 1);
    assert_eq!(envelopes[0].from().unwrap().as_str(), "a@x");
    assert_eq!(envelopes[0].recipients()[0].as_str(), "b@y");
    assert_eq!(envelopes[0].data(), b"Subject: hi\r\n\r\nhello\r\n");
}

// S2 — Bad sequence: EHLO then DATA, no MAIL/RCPT in between.
#[tokio::test]
async fn s2_data_before_rcpt_is_bad_sequence() {
    let recording = Arc::new(Recording::accepting());
    let (mut client, handle) = start(Config::default(), Arc::clone(&recording)).await;
    let mut reader = BufReader::new(&mut client);
    read_reply(&mut reader).await;

    send(reader.get_mut(), "EHLO x").await;
    read_reply(&mut reader).await;

    send(reader.get_mut(), "DATA").await;
    assert_eq!(code_of(&read_reply(&mut reader).await[0]), "503");

    handle.stop(Duration::from_secs(1)).await;
}

// S3 — Dot-stuffing: a leading ".." on the wire is delivered as a single leading "." to the
// handler.
#[tokio::test]
async fn s3_dot_stuffing_is_undone() {
    let recording = Arc::new(Recording::accepting());
    let (mut client, handle) = start(Config::default(), Arc::clone(&recording)).await;
    let mut reader = BufReader::new(&mut client);
    read_reply(&mut reader).await;

    send(reader.get_mut(), "EHLO x").await;
    read_reply(&mut reader).await;
    send(reader.get_mut(), "MAIL FROM:<a@x>").await;
    read_reply(&mut reader).await;
    send(reader.get_mut(), "RCPT TO:<b@y>").await;
    read_reply(&mut reader).await;
    send(reader.get_mut(), "DATA").await;
    read_reply(&mut reader).await;

    reader.get_mut().write_all(b"..leading dot\r\n.\r\n").await.unwrap();
    assert_eq!(code_of(&read_reply(&mut reader).await[0]), "250");

    handle.stop(Duration::from_secs(1)).await;

    let envelopes = recording.envelopes.lock().await;
    assert_eq!(envelopes[0].data(), b".leading dot\r\n");
}

// S4 — SIZE rejection: a SIZE= parameter exceeding max_message_size is rejected at MAIL FROM,
// and the session stays in Greeted (a subsequent MAIL FROM works normally).
#[tokio::test]
async fn s4_oversized_size_parameter_is_rejected() {
    let recording = Arc::new(Recording::accepting());
    let config = Config::builder().max_message_size(1_048_576).build();
    let (mut client, handle) = start(config, Arc::clone(&recording)).await;
    let mut reader = BufReader::new(&mut client);
    read_reply(&mut reader).await;

    send(reader.get_mut(), "EHLO x").await;
    read_reply(&mut reader).await;

    send(reader.get_mut(), "MAIL FROM:<a@x> SIZE=2000000").await;
    assert_eq!(code_of(&read_reply(&mut reader).await[0]), "552");

    // Still `Greeted`: a fresh MAIL FROM without the oversized parameter succeeds.
    send(reader.get_mut(), "MAIL FROM:<a@x>").await;
    assert_eq!(code_of(&read_reply(&mut reader).await[0]), "250");

    handle.stop(Duration::from_secs(1)).await;
}

// S5 — RSET mid-transaction clears the envelope; a subsequent DATA is bad-sequence again.
#[tokio::test]
async fn s5_rset_mid_transaction_clears_envelope() {
    let recording = Arc::new(Recording::accepting());
    let (mut client, handle) = start(Config::default(), Arc::clone(&recording)).await;
    let mut reader = BufReader::new(&mut client);
    read_reply(&mut reader).await;

    send(reader.get_mut(), "EHLO x").await;
    read_reply(&mut reader).await;
    send(reader.get_mut(), "MAIL FROM:<a@x>").await;
    read_reply(&mut reader).await;
    send(reader.get_mut(), "RCPT TO:<b@y>").await;
    read_reply(&mut reader).await;

    send(reader.get_mut(), "RSET").await;
    assert_eq!(code_of(&read_reply(&mut reader).await[0]), "250");

    send(reader.get_mut(), "DATA").await;
    assert_eq!(code_of(&read_reply(&mut reader).await[0]), "503");

    handle.stop(Duration::from_secs(1)).await;
}

// S6 — A 600-byte command line is rejected with 500, and the session recovers to process the
// next command normally (state is unaffected by the rejection).
#[tokio::test]
async fn s6_oversized_command_line_is_rejected_then_recovers() {
    let recording = Arc::new(Recording::accepting());
    let (mut client, handle) = start(Config::default(), Arc::clone(&recording)).await;
    let mut reader = BufReader::new(&mut client);
    read_reply(&mut reader).await;

    let long_line = format!("NOOP {}\r\n", "x".repeat(600));
    send_raw(reader.get_mut(), long_line.as_bytes()).await;
    assert_eq!(code_of(&read_reply(&mut reader).await[0]), "500");

    send(reader.get_mut(), "EHLO client.example").await;
    assert_eq!(code_of(&read_reply(&mut reader).await[0]), "250");

    handle.stop(Duration::from_secs(1)).await;
}

// Boundary: a command line of exactly 512 bytes (including CRLF) is accepted; 513 is rejected.
#[tokio::test]
async fn command_line_length_boundary() {
    let recording = Arc::new(Recording::accepting());
    let (mut client, handle) = start(Config::default(), Arc::clone(&recording)).await;
    let mut reader = BufReader::new(&mut client);
    read_reply(&mut reader).await;

    // "NOOP" (4) + padding + CRLF (2) == 512; NOOP tolerates a whitespace-only tail.
    let exactly_512 = format!("NOOP{}\r\n", " ".repeat(512 - 4 - 2));
    assert_eq!(exactly_512.len(), 512);
    send_raw(reader.get_mut(), exactly_512.as_bytes()).await;
    assert_eq!(code_of(&read_reply(&mut reader).await[0]), "250");

    let exactly_513 = format!("NOOP{}\r\n", " ".repeat(513 - 4 - 2));
    assert_eq!(exactly_513.len(), 513);
    send_raw(reader.get_mut(), exactly_513.as_bytes()).await;
    assert_eq!(code_of(&read_reply(&mut reader).await[0]), "500");

    handle.stop(Duration::from_secs(1)).await;
}

// Boundary: a message of exactly max_message_size bytes is accepted; one byte more is rejected.
#[tokio::test]
async fn message_size_boundary() {
    let recording = Arc::new(Recording::accepting());
    let config = Config::builder().max_message_size(12).build();
    let (mut client, handle) = start(config, Arc::clone(&recording)).await;
    let mut reader = BufReader::new(&mut client);
    read_reply(&mut reader).await;

    send(reader.get_mut(), "EHLO x").await;
    read_reply(&mut reader).await;
    send(reader.get_mut(), "MAIL FROM:<a@x>").await;
    read_reply(&mut reader).await;
    send(reader.get_mut(), "RCPT TO:<b@y>").await;
    read_reply(&mut reader).await;
    send(reader.get_mut(), "DATA").await;
    read_reply(&mut reader).await;

    // "0123456789" (10 bytes) + the re-appended CRLF (2 bytes) == 12 == max_message_size.
    reader.get_mut().write_all(b"0123456789\r\n.\r\n").await.unwrap();
    assert_eq!(code_of(&read_reply(&mut reader).await[0]), "250");

    send(reader.get_mut(), "MAIL FROM:<a@x>").await;
    read_reply(&mut reader).await;
    send(reader.get_mut(), "RCPT TO:<b@y>").await;
    read_reply(&mut reader).await;
    send(reader.get_mut(), "DATA").await;
    read_reply(&mut reader).await;

    // One byte over: 11-byte line + CRLF == 13 > 12.
    reader.get_mut().write_all(b"01234567890\r\n.\r\n").await.unwrap();
    assert_eq!(code_of(&read_reply(&mut reader).await[0]), "552");

    handle.stop(Duration::from_secs(1)).await;
    assert_eq!(recording.envelopes.lock().await.len(), 1);
}

// Boundary: the null reverse-path (MAIL FROM:<>) is accepted; the null forward-path
// (RCPT TO:<>) is rejected with 501.
#[tokio::test]
async fn null_reverse_path_accepted_null_forward_path_rejected() {
    let recording = Arc::new(Recording::accepting());
    let (mut client, handle) = start(Config::default(), Arc::clone(&recording)).await;
    let mut reader = BufReader::new(&mut client);
    read_reply(&mut reader).await;

    send(reader.get_mut(), "EHLO x").await;
    read_reply(&mut reader).await;

    send(reader.get_mut(), "MAIL FROM:<>").await;
    assert_eq!(code_of(&read_reply(&mut reader).await[0]), "250");

    send(reader.get_mut(), "RCPT TO:<>").await;
    assert_eq!(code_of(&read_reply(&mut reader).await[0]), "501");

    handle.stop(Duration::from_secs(1)).await;
}

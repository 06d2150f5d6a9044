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

//! The transport boundary: what a [`crate::session::Session`] needs from a byte stream, and what
//! [`crate::server::Server`] needs from a listening socket.
//!
//! Kept as a small capability-set trait pair rather than a concrete `TcpStream` dependency so
//! that tests can substitute an in-memory [`tokio::io::duplex`] pipe instead of a real loopback
//! socket. Dynamic dispatch is used throughout (`Box<dyn Connection>`) — this crate is I/O-bound,
//! not call-bound, so the cost is immaterial next to the syscalls it wraps.

use std::{io, net::SocketAddr};

use async_trait::async_trait;
use tokio::{
    io::{AsyncRead, AsyncWrite, DuplexStream},
    net::{TcpListener, TcpStream},
};

/// One accepted connection: an async byte stream plus the peer address used in log lines.
pub trait Connection: AsyncRead + AsyncWrite + Unpin + Send {
    /// The address of the remote end of this connection, for diagnostics only.
    fn peer_addr(&self) -> io::Result<SocketAddr>;
}

impl Connection for TcpStream {
    fn peer_addr(&self) -> io::Result<SocketAddr> {
        Self::peer_addr(self)
    }
}

impl<T: Connection + ?Sized> Connection for Box<T> {
    fn peer_addr(&self) -> io::Result<SocketAddr> {
        (**self).peer_addr()
    }
}

/// A listening socket that accepts [`Connection`]s.
///
/// Implemented over [`TcpListener`] in [`TcpTransport`]; the trait exists so
/// [`crate::server::Server`] does not need to know the concrete socket type.
#[async_trait]
pub trait Transport: Send + Sync {
    /// Accept the next incoming connection.
    ///
    /// # Errors
    ///
    /// Any [`io::Error`] from the underlying listener.
    async fn accept(&self) -> io::Result<Box<dyn Connection>>;

    /// The address this transport is actually bound to (useful when binding to port 0 in tests).
    fn local_addr(&self) -> io::Result<SocketAddr>;
}

/// A [`Transport`] backed by a real TCP listening socket.
pub struct TcpTransport {
    listener: TcpListener,
}

impl TcpTransport {
    /// Bind a new listening socket at `addr`.
    ///
    /// # Errors
    ///
    /// Any [`io::Error`] from [`TcpListener::bind`].
    pub async fn bind(addr: &str) -> io::Result<Self> {
        let listener = TcpListener::bind(addr).await?;
        Ok(Self { listener })
    }
}

#[async_trait]
impl Transport for TcpTransport {
    async fn accept(&self) -> io::Result<Box<dyn Connection>> {
        let (stream, _peer) = self.listener.accept().await?;
        Ok(Box::new(stream))
    }

    fn local_addr(&self) -> io::Result<SocketAddr> {
        self.listener.local_addr()
    }
}

/// Wraps a [`DuplexStream`] half with a synthetic peer address, so tests can drive a
/// [`crate::session::Session`] over an in-memory pipe instead of a loopback socket.
pub struct DuplexConnection {
    stream: DuplexStream,
    peer: SocketAddr,
}

impl DuplexConnection {
    #[must_use]
    pub fn new(stream: DuplexStream) -> Self {
        Self {
            stream,
            peer: "127.0.0.1:0".parse().expect("valid socket address literal"),
        }
    }
}

impl Connection for DuplexConnection {
    fn peer_addr(&self) -> io::Result<SocketAddr> {
        Ok(self.peer)
    }
}

impl AsyncRead for DuplexConnection {
    fn poll_read(
        mut self: std::pin::Pin<&mut Self>,
        cx: &mut std::task::Context<'_>,
        buf: &mut tokio::io::ReadBuf<'_>,
    ) -> std::task::Poll<io::Result<()>> {
        std::pin::Pin::new(&mut self.stream).poll_read(cx, buf)
    }
}

impl AsyncWrite for DuplexConnection {
    fn poll_write(
        mut self: std::pin::Pin<&mut Self>,
        cx: &mut std::task::Context<'_>,
        buf: &[u8],
    ) -> std::task::Poll<io::Result<usize>> {
        std::pin::Pin::new(&mut self.stream).poll_write(cx, buf)
    }

    fn poll_flush(
        mut self: std::pin::Pin<&mut Self>,
        cx: &mut std::task::Context<'_>,
    ) -> std::task::Poll<io::Result<()>> {
        std::pin::Pin::new(&mut self.stream).poll_flush(cx)
    }

    fn poll_shutdown(
        mut self: std::pin::Pin<&mut Self>,
        cx: &mut std::task::Context<'_>,
    ) -> std::task::Poll<io::Result<()>> {
        std::pin::Pin::new(&mut self.stream).poll_shutdown(cx)
    }
}

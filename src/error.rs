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

//! Crate-wide error types.
//!
//! Most of the error taxonomy this library deals with (malformed syntax, commands out of
//! sequence, oversized messages) never becomes a [`std::error::Error`] at all — it is resolved
//! entirely into an SMTP response code and the session keeps running. These types only cover the
//! conditions that actually terminate something: a session ([`SessionError`]) or the server
//! itself ([`ServerError`]).

use std::io;

/// Why a session's connection loop ended abnormally.
///
/// A session ending because of `QUIT` or a clean client disconnect is not an error; those are
/// represented directly in the session's control flow, not here.
#[derive(Debug, thiserror::Error)]
pub enum SessionError {
    /// A read or write against the transport failed.
    #[error("transport error: {0}")]
    Transport(#[from] io::Error),

    /// One of `command_timeout`, `idle_timeout`, or `data_timeout` elapsed, on a read, a write,
    /// or a message handler invocation.
    #[error("session timed out waiting for the client")]
    Timeout,

    /// The server's shutdown broadcast fired while this session was suspended.
    #[error("server is shutting down")]
    Shutdown,
}

/// Why the server's accept loop stopped running, surfaced through
/// [`crate::server::ServerHandle::stop`].
///
/// Per the session/server error propagation policy, losing the listening transport is the *only*
/// condition that is fatal to the server; every per-connection failure is handled inside the
/// session and never reaches here.
#[derive(Debug, thiserror::Error)]
pub enum ServerError {
    /// Binding or listening on the configured address failed.
    #[error("failed to bind {addr}: {source}")]
    Bind {
        /// The address the server attempted to bind.
        addr: String,
        /// The underlying I/O error.
        #[source]
        source: io::Error,
    },

    /// The listening socket itself failed (not a per-connection accept failure).
    #[error("listening socket failed: {0}")]
    Listener(#[source] io::Error),
}

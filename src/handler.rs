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

//! The single seam between this crate and a host application: what happens to a completed
//! envelope.
//!
//! This crate never stores or forwards a message itself — delivery, storage, and queuing are the
//! host's responsibility. A host implements [`MessageHandler`] (or registers a closure via the
//! blanket implementation below) and hands it to [`crate::server::Server`].

use async_trait::async_trait;

use crate::envelope::Envelope;

/// What a [`MessageHandler`] decided about one completed envelope, and the response code it maps
/// to.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HandlerOutcome {
    /// Accept the message. Mapped to `250 OK`.
    Accepted,
    /// Reject with a transient failure; the client is expected to retry later. Mapped to `451`.
    TransientFailure,
    /// Reject with a permanent failure; the client should not retry. Mapped to `554`.
    PermanentFailure,
}

/// Receives one completed envelope per successful `DATA` transaction.
///
/// Implementations run inside the session's task; a slow handler delays that session's next
/// read, which is why [`crate::session::Session`] wraps every handler invocation in its own
/// timeout (see the session module's documentation).
#[async_trait]
pub trait MessageHandler: Send + Sync {
    /// Handle one completed envelope.
    async fn handle(&self, envelope: Envelope) -> HandlerOutcome;
}

/// Adapts any `Fn(Envelope) -> Future<Output = HandlerOutcome>` closure into a [`MessageHandler`],
/// so a host application can register a closure directly instead of defining a type.
#[async_trait]
impl<F, Fut> MessageHandler for F
where
    F: Fn(Envelope) -> Fut + Send + Sync,
    Fut: std::future::Future<Output = HandlerOutcome> + Send,
{
    async fn handle(&self, envelope: Envelope) -> HandlerOutcome {
        self(envelope).await
    }
}

/// A handler that accepts every message, discarding its contents.
///
/// Useful for tests and for hosts that only care about accepting mail during development.
#[derive(Debug, Clone, Copy, Default)]
pub struct AcceptAll;

#[async_trait]
impl MessageHandler for AcceptAll {
    async fn handle(&self, _envelope: Envelope) -> HandlerOutcome {
        HandlerOutcome::Accepted
    }
}

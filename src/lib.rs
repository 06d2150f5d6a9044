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

#![warn(clippy::nursery, clippy::pedantic)]
#![cfg_attr(debug_assertions, allow(clippy::missing_errors_doc))]

//! An embeddable, receive-only SMTP server.
//!
//! Implements the mandatory subset of [RFC 5321](https://www.rfc-editor.org/rfc/rfc5321.html)
//! plus the `SIZE` ([RFC 1870](https://www.rfc-editor.org/rfc/rfc1870.html)) and `8BITMIME`
//! ([RFC 6152](https://www.rfc-editor.org/rfc/rfc6152.html)) extensions. A host application
//! configures a [`config::Config`], supplies a [`handler::MessageHandler`] to receive completed
//! envelopes, and starts a [`server::Server`]:
//!
//! ```no_run
//! use smtp_gateway::{config::Config, handler::AcceptAll, server::Server};
//!
//! # async fn example() -> Result<(), Box<dyn std::error::Error>> {
//! let config = Config::builder().domain("mail.example.com").build();
//! let server = Server::new(config, AcceptAll);
//! let handle = server.start().await?;
//!
//! // ... run until asked to shut down ...
//!
//! handle.stop(std::time::Duration::from_secs(30)).await;
//! # Ok(())
//! # }
//! ```
//!
//! What this crate deliberately does not do: transport security (`STARTTLS`), authentication
//! (`AUTH`), pipelining, relaying, or message storage/delivery. A completed envelope is handed to
//! the host's [`handler::MessageHandler`] and this crate's involvement ends there.

pub mod address;
pub mod command;
pub mod config;
pub mod envelope;
pub mod error;
pub mod handler;
pub mod response;
pub mod server;
pub mod session;
pub mod state;
#[cfg(test)]
mod test;
mod timeouts;
pub mod transport;

pub use address::EmailAddress;
pub use config::Config;
pub use envelope::Envelope;
pub use error::{ServerError, SessionError};
pub use handler::{HandlerOutcome, MessageHandler};
pub use response::Response;
pub use server::{run_until_signal, Server, ServerHandle};
pub use session::{CloseReason, Session};

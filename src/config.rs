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

//! The immutable parameter bundle a host application builds once and hands to
//! [`crate::server::Server`].

use std::time::Duration;

use crate::timeouts;

/// Default port this crate listens on when none is configured.
///
/// 2525 rather than the privileged 25, so that this embeddable library doesn't require the host
/// process to run as root.
pub const DEFAULT_PORT: u16 = 2525;

/// Default advertised/enforced maximum message size: 10 MiB.
pub const DEFAULT_MAX_MESSAGE_SIZE: usize = 10 * 1024 * 1024;

/// Default concurrent-session ceiling.
///
/// The specification permits a platform-recommended value in place of this when none is given;
/// this crate does not attempt platform capability detection (out of scope per the library's
/// purpose) and always falls back to this constant.
pub const DEFAULT_MAX_CONNECTIONS: usize = 100;

/// Default cap on recipients accepted within a single transaction.
pub const DEFAULT_MAX_RECIPIENTS: usize = 100;

/// Immutable configuration for a [`crate::server::Server`].
///
/// Built once via [`Config::builder`] (or [`Config::default`]) before the server starts; nothing
/// in this type is mutated afterwards, and it is shared with every [`crate::session::Session`]
/// by read-only reference.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Config {
    /// Advertised in the greeting and EHLO banner.
    pub domain: String,
    /// Address to listen on, IPv6 preferred.
    pub listen_host: String,
    /// Port to listen on.
    pub listen_port: u16,
    /// Maximum number of concurrently live sessions.
    pub max_connections: usize,
    /// Maximum accepted message size in bytes, advertised via the `SIZE` extension.
    pub max_message_size: usize,
    /// Maximum number of `RCPT TO` recipients accepted in one transaction.
    pub max_recipients_per_message: usize,
    /// Outer ceiling on inter-transaction idleness.
    pub idle_timeout: Duration,
    /// End-to-end timeout for the whole `DATA` phase.
    pub data_timeout: Duration,
    /// Time allotted to read one command line.
    pub command_timeout: Duration,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            domain: "localhost".to_string(),
            listen_host: "::".to_string(),
            listen_port: DEFAULT_PORT,
            max_connections: DEFAULT_MAX_CONNECTIONS,
            max_message_size: DEFAULT_MAX_MESSAGE_SIZE,
            max_recipients_per_message: DEFAULT_MAX_RECIPIENTS,
            idle_timeout: timeouts::DEFAULT_IDLE_TIMEOUT,
            data_timeout: timeouts::DEFAULT_DATA_TIMEOUT,
            command_timeout: timeouts::DEFAULT_COMMAND_TIMEOUT,
        }
    }
}

impl Config {
    /// Start building a [`Config`] from its defaults.
    #[must_use]
    pub fn builder() -> ConfigBuilder {
        ConfigBuilder::default()
    }

    /// The address this configuration binds to, as passed to `TcpListener::bind`.
    #[must_use]
    pub fn listen_addr(&self) -> String {
        format!("{}:{}", self.listen_host, self.listen_port)
    }
}

/// Builder for [`Config`].
///
/// Every setter takes and returns `self` by value so calls chain, matching the builder shape
/// used elsewhere in the SMTP server corpus (see `empath-smtp`'s `SessionConfigBuilder`) rather
/// than exposing a struct-literal with every field public for construction.
#[derive(Debug, Clone, Default)]
pub struct ConfigBuilder {
    config: Config,
}

impl ConfigBuilder {
    #[must_use]
    pub fn domain(mut self, domain: impl Into<String>) -> Self {
        self.config.domain = domain.into();
        self
    }

    #[must_use]
    pub fn listen_host(mut self, host: impl Into<String>) -> Self {
        self.config.listen_host = host.into();
        self
    }

    #[must_use]
    pub const fn listen_port(mut self, port: u16) -> Self {
        self.config.listen_port = port;
        self
    }

    #[must_use]
    pub const fn max_connections(mut self, max: usize) -> Self {
        self.config.max_connections = max;
        self
    }

    #[must_use]
    pub const fn max_message_size(mut self, max: usize) -> Self {
        self.config.max_message_size = max;
        self
    }

    #[must_use]
    pub const fn max_recipients_per_message(mut self, max: usize) -> Self {
        self.config.max_recipients_per_message = max;
        self
    }

    #[must_use]
    pub const fn idle_timeout(mut self, timeout: Duration) -> Self {
        self.config.idle_timeout = timeout;
        self
    }

    #[must_use]
    pub const fn data_timeout(mut self, timeout: Duration) -> Self {
        self.config.data_timeout = timeout;
        self
    }

    #[must_use]
    pub const fn command_timeout(mut self, timeout: Duration) -> Self {
        self.config.command_timeout = timeout;
        self
    }

    /// Finish building, clamping `max_connections`/`max_recipients_per_message` up to 1.
    ///
    /// The specification requires both to be at least 1; rather than returning a builder error
    /// for a single out-of-range integer, this follows Postel's Law and clamps, the same spirit
    /// the teacher crate applies to trimming whitespace it could have rejected instead.
    #[must_use]
    pub fn build(mut self) -> Config {
        self.config.max_connections = self.config.max_connections.max(1);
        self.config.max_recipients_per_message = self.config.max_recipients_per_message.max(1);
        self.config
    }
}

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

//! The minimum amounts of time that participants in an SMTP session should wait for a reply, and
//! the default values for the three session-level timers this crate actually enforces.
//!
//! Some amount of delay from transmission and processing is expected in an SMTP session. To
//! differentiate between these and a genuinely timed out session, [RFC 5321
//! 4.5.3.2](https://www.rfc-editor.org/rfc/rfc5321.html#section-4.5.3.2) defines a list of
//! per-command minimums. This crate does not track each of those individually; it enforces three
//! coarser timers instead (see [`crate::config::Config`]), each at least as generous as the
//! minimums below.

use std::time::Duration;

/// Generate `const` items with [`Duration`] values in minutes, optionally including
/// documentation comments.
///
/// Does not account for leap seconds or similar shenanigans. A "minute" is 60 of whatever
/// [`Duration`] considers to be a "second."
macro_rules! minute_durations {
    [$(
        $( #[$attr:meta] )*
        $label:ident = $minutes:expr
    ),+ $(,)?] => {
        $(
            $( #[$attr] )*
            pub const $label: Duration = Duration::from_secs($minutes * 60);
        )+
    };
}

minute_durations![
    /// Servers will sometimes accept TCP connections but wait for spare processing before
    /// sending the opening `220`. This is the minimum a client should wait for it.
    ///
    /// [RFC 5321 § 4.5.3.2.1](https://www.rfc-editor.org/rfc/rfc5321.html#section-4.5.3.2.1).
    INITIAL_220_MESSAGE = 2,
    /// [RFC 5321 § 4.5.3.2.2](https://www.rfc-editor.org/rfc/rfc5321.html#section-4.5.3.2.2).
    MAIL = 5,
    /// [RFC 5321 § 4.5.3.2.3](https://www.rfc-editor.org/rfc/rfc5321.html#section-4.5.3.2.3).
    RCPT = 5,
    /// [RFC 5321 § 4.5.3.2.4](https://www.rfc-editor.org/rfc/rfc5321.html#section-4.5.3.2.4).
    DATA_INITIATION = 2,
    /// [RFC 5321 § 4.5.3.2.5](https://www.rfc-editor.org/rfc/rfc5321.html#section-4.5.3.2.5).
    DATA_BLOCK = 3,
    /// [RFC 5321 § 4.5.3.2.6](https://www.rfc-editor.org/rfc/rfc5321.html#section-4.5.3.2.6).
    DATA_TERMINATION = 10,
];

/// Default for [`crate::config::Config::command_timeout`]: time to read one command line.
///
/// Covers the wait for `MAIL`/`RCPT`/`DATA_INITIATION` per RFC 5321 § 4.5.3.2.
pub const DEFAULT_COMMAND_TIMEOUT: Duration = Duration::from_secs(5 * 60);

/// Default for [`crate::config::Config::idle_timeout`]: outer ceiling on inter-transaction
/// idleness.
pub const DEFAULT_IDLE_TIMEOUT: Duration = Duration::from_secs(5 * 60);

/// Default for [`crate::config::Config::data_timeout`]: covers the entire `DATA` phase, from the
/// `354` reply to the terminating `.` line.
///
/// At least as generous as `DATA_BLOCK` and `DATA_TERMINATION` combined.
pub const DEFAULT_DATA_TIMEOUT: Duration = Duration::from_secs(10 * 60);

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

//! The reverse-path and forward-path addresses exchanged by `MAIL FROM`/`RCPT TO`.

use std::fmt::{self, Display};

/// An opaque address taken literally from between `<` and `>` in `MAIL FROM`/`RCPT TO`.
///
/// No structural validation is performed beyond what [`crate::command`] already enforces (no
/// nested angle brackets). In particular this is not necessarily a `local-part@domain` shape:
/// the empty string is a valid [`EmailAddress`] and denotes the null reverse-path used by bounce
/// messages.
#[repr(transparent)]
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Default)]
pub struct EmailAddress(String);

impl EmailAddress {
    /// Wrap a string taken from between `<` and `>` as an [`EmailAddress`].
    #[must_use]
    pub fn new(raw: impl Into<String>) -> Self {
        Self(raw.into())
    }

    /// The null reverse-path (`MAIL FROM:<>`), used by bounce/DSN messages.
    #[must_use]
    pub fn is_null(&self) -> bool {
        self.0.is_empty()
    }

    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl Display for EmailAddress {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<String> for EmailAddress {
    fn from(raw: String) -> Self {
        Self(raw)
    }
}

impl From<EmailAddress> for String {
    fn from(addr: EmailAddress) -> Self {
        addr.0
    }
}

#[cfg(test)]
mod test {
    use super::EmailAddress;

    #[test]
    fn null_reverse_path_is_empty() {
        assert!(EmailAddress::new("").is_null());
        assert!(!EmailAddress::new("a@x").is_null());
    }

    #[test]
    fn roundtrips_through_string() {
        let addr = EmailAddress::new("smith@example.com");
        assert_eq!(addr.as_str(), "smith@example.com");
        assert_eq!(addr.to_string(), "smith@example.com");
    }
}

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

//! The envelope sender, recipients, and assembled message body of one transaction.
//!
//! Distinct from the `From:`/`To:` headers that may appear inside [`Envelope::data`] — those are
//! opaque bytes to this crate (no header or MIME parsing is performed, per the library's scope).

use crate::address::EmailAddress;

/// Sender, recipients, and assembled body of a single `MAIL` → `RCPT`(s) → `DATA` transaction.
///
/// `from` is `Some` once `MAIL FROM` has been accepted; `recipients` is non-empty once at least
/// one `RCPT TO` has been accepted; `data` is populated only after a successful end-of-`DATA`.
/// [`Envelope::reset`] clears all three, which happens on `RSET`, after a transaction completes,
/// and implicitly on a mid-transaction `HELO`/`EHLO`.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Envelope {
    from: Option<EmailAddress>,
    recipients: Vec<EmailAddress>,
    data: Vec<u8>,
}

impl Envelope {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    #[must_use]
    pub fn from(&self) -> Option<&EmailAddress> {
        self.from.as_ref()
    }

    pub fn set_from(&mut self, address: EmailAddress) {
        self.from = Some(address);
    }

    #[must_use]
    pub fn recipients(&self) -> &[EmailAddress] {
        &self.recipients
    }

    /// Append a recipient. Duplicates are permitted verbatim, per RFC 5321 § 3.3 and
    /// [`crate::envelope`]'s module documentation.
    pub fn add_recipient(&mut self, address: EmailAddress) {
        self.recipients.push(address);
    }

    #[must_use]
    pub fn data(&self) -> &[u8] {
        &self.data
    }

    pub fn set_data(&mut self, data: Vec<u8>) {
        self.data = data;
    }

    /// Clear the sender, recipients, and body, returning the envelope to its post-`RSET` state.
    ///
    /// Idempotent: calling this twice in a row is a no-op the second time.
    pub fn reset(&mut self) {
        self.from = None;
        self.recipients.clear();
        self.data.clear();
    }

    /// Whether a `MAIL FROM` has been accepted for the current transaction.
    #[must_use]
    pub fn has_sender(&self) -> bool {
        self.from.is_some()
    }

    /// Whether at least one `RCPT TO` has been accepted for the current transaction.
    #[must_use]
    pub fn has_recipients(&self) -> bool {
        !self.recipients.is_empty()
    }
}

#[cfg(test)]
mod test {
    use super::Envelope;
    use crate::address::EmailAddress;

    #[test]
    fn reset_is_idempotent() {
        let mut envelope = Envelope::new();
        envelope.set_from(EmailAddress::new("a@x"));
        envelope.add_recipient(EmailAddress::new("b@y"));
        envelope.set_data(b"hello".to_vec());

        envelope.reset();
        assert_eq!(envelope, Envelope::new());

        envelope.reset();
        assert_eq!(envelope, Envelope::new());
    }

    #[test]
    fn duplicate_recipients_preserved_in_order() {
        let mut envelope = Envelope::new();
        envelope.add_recipient(EmailAddress::new("b@y"));
        envelope.add_recipient(EmailAddress::new("b@y"));
        envelope.add_recipient(EmailAddress::new("c@z"));

        assert_eq!(
            envelope.recipients(),
            &[
                EmailAddress::new("b@y"),
                EmailAddress::new("b@y"),
                EmailAddress::new("c@z"),
            ]
        );
    }
}

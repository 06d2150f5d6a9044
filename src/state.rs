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

//! Validates whether a parsed command is legal in the current session state, and computes the
//! next state and response.
//!
//! [`transition`] is a pure function of `(state, extended, command, config, recipient_count) ->
//! Transition`; it never touches I/O. Side effects (mutating the envelope, invoking the message
//! handler, closing the connection) are named in [`Transition::effect`] and carried out by
//! [`crate::session`].
//!
//! This module is never consulted while the session is in [`State::Data`]: bytes received in
//! that state are message content, not commands, and are handled entirely by the session's DATA
//! loop (see [`crate::session`]'s module documentation).

use crate::{
    address::EmailAddress,
    command::{BodyValue, Command},
    config::Config,
    response::{code, Response},
};

/// The session's position in the SMTP transaction lifecycle.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum State {
    /// Entered when the connection is accepted, before any `HELO`/`EHLO`.
    Initial,
    /// `HELO`/`EHLO` accepted; no transaction in progress.
    Greeted,
    /// `MAIL FROM` accepted for the current transaction.
    MailReceived,
    /// At least one `RCPT TO` accepted for the current transaction.
    RcptReceived,
    /// `DATA` accepted; the session is reading the message body, not commands.
    Data,
    /// Terminal: the connection is closing or closed.
    Closed,
}

/// A side effect [`crate::session`] must carry out after applying a [`Transition`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Effect {
    None,
    SetFrom(EmailAddress),
    AddRecipient(EmailAddress),
    ClearEnvelope,
    /// Enter the `DATA` phase: the session must now read the message body instead of commands.
    EnterData,
    Close,
}

/// The result of applying one command to the state machine.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Transition {
    pub next_state: State,
    pub next_extended: bool,
    pub response: Response,
    pub effect: Effect,
}

/// Apply `command` to `state`, returning the next state, response, and required side effect.
///
/// `recipient_count` is the number of recipients already accepted in the current transaction
/// (used to enforce `max_recipients_per_message`); `extended` records whether the client has
/// negotiated ESMTP via `EHLO` (required to accept `SIZE=`/`BODY=` parameters on `MAIL FROM`).
///
/// Must not be called while `state == State::Data`: see the module documentation.
#[must_use]
pub fn transition(
    state: State,
    extended: bool,
    command: Command,
    config: &Config,
    recipient_count: usize,
) -> Transition {
    debug_assert_ne!(state, State::Data, "DATA-phase bytes are not commands");

    match command {
        Command::Helo(domain) => helo(state, extended, &domain, config),
        Command::Ehlo(domain) => ehlo(state, &domain, config),
        Command::MailFrom { address, params } => {
            mail_from(state, extended, address, &params, config)
        }
        Command::RcptTo { address, .. } => rcpt_to(state, extended, address, config, recipient_count),
        Command::Data => data(state, extended),
        Command::Rset => rset(extended),
        Command::Noop => same_state(state, extended, Response::new(code::OK, "OK")),
        Command::Quit => Transition {
            next_state: State::Closed,
            next_extended: extended,
            response: Response::new(code::CLOSING, format!("{} closing connection", config.domain)),
            effect: Effect::Close,
        },
        Command::Vrfy(_) => same_state(
            state,
            extended,
            Response::new(code::NOT_IMPLEMENTED, "VRFY not implemented"),
        ),
        Command::Unknown(_) => same_state(
            state,
            extended,
            Response::new(code::SYNTAX_ERROR_COMMAND, "Command not recognized"),
        ),
        Command::SyntaxError(reason) => same_state(
            state,
            extended,
            Response::new(code::SYNTAX_ERROR_PARAMETERS, format!("Syntax error - {reason}")),
        ),
    }
}

fn same_state(state: State, extended: bool, response: Response) -> Transition {
    Transition {
        next_state: state,
        next_extended: extended,
        response,
        effect: Effect::None,
    }
}

fn bad_sequence(state: State, extended: bool) -> Transition {
    same_state(
        state,
        extended,
        Response::new(code::BAD_SEQUENCE, "Bad sequence of commands"),
    )
}

fn helo(state: State, extended: bool, _domain: &str, config: &Config) -> Transition {
    match state {
        State::Initial | State::Greeted | State::MailReceived | State::RcptReceived => {
            let effect = if matches!(state, State::MailReceived | State::RcptReceived) {
                Effect::ClearEnvelope
            } else {
                Effect::None
            };
            Transition {
                next_state: State::Greeted,
                next_extended: extended,
                response: Response::new(code::OK, format!("{} greets you", config.domain)),
                effect,
            }
        }
        State::Data | State::Closed => unreachable!("handled by caller/session loop"),
    }
}

fn ehlo(state: State, _domain: &str, config: &Config) -> Transition {
    match state {
        State::Initial | State::Greeted | State::MailReceived | State::RcptReceived => {
            let effect = if matches!(state, State::MailReceived | State::RcptReceived) {
                Effect::ClearEnvelope
            } else {
                Effect::None
            };
            let lines = vec![
                format!("{} greets you", config.domain),
                format!("SIZE {}", config.max_message_size),
                "8BITMIME".to_string(),
            ];
            Transition {
                next_state: State::Greeted,
                next_extended: true,
                response: Response::multiline(code::OK, lines),
                effect,
            }
        }
        State::Data | State::Closed => unreachable!("handled by caller/session loop"),
    }
}

fn mail_from(
    state: State,
    extended: bool,
    address: EmailAddress,
    params: &crate::command::MailParams,
    config: &Config,
) -> Transition {
    if !matches!(state, State::Greeted) {
        return bad_sequence(state, extended);
    }

    let uses_esmtp_param = params.size.is_some() || params.body.is_some();
    if uses_esmtp_param && !extended {
        return same_state(
            state,
            extended,
            Response::new(
                code::PARAMETER_NOT_IMPLEMENTED,
                "SIZE/BODY parameters require EHLO",
            ),
        );
    }

    if let Some(size) = params.size {
        if size > config.max_message_size as u64 {
            return same_state(
                state,
                extended,
                Response::new(code::SIZE_EXCEEDED, "Message exceeds fixed maximum message size"),
            );
        }
    }

    if let Some(BodyValue::Other(value)) = &params.body {
        return same_state(
            state,
            extended,
            Response::new(code::PARAMETER_NOT_IMPLEMENTED, format!("Unsupported BODY={value}")),
        );
    }

    if let Some(key) = params.unrecognized.first() {
        return same_state(
            state,
            extended,
            Response::new(code::PARAMETER_NOT_IMPLEMENTED, format!("Unrecognized parameter {key}")),
        );
    }

    Transition {
        next_state: State::MailReceived,
        next_extended: extended,
        response: Response::new(code::OK, "OK"),
        effect: Effect::SetFrom(address),
    }
}

// `RcptParams::unrecognized` is parsed but deliberately not consulted here: unlike `MAIL FROM`,
// the response vocabulary scopes 504 to an unrecognized `MAIL FROM` parameter or unsupported
// `BODY=` value only — there is no 504 cell for `RCPT TO` in the transition table, so an
// unrecognized `RCPT TO` parameter is ignored rather than rejected.
fn rcpt_to(state: State, extended: bool, address: EmailAddress, config: &Config, recipient_count: usize) -> Transition {
    match state {
        State::MailReceived | State::RcptReceived => {
            if recipient_count >= config.max_recipients_per_message {
                return same_state(
                    state,
                    extended,
                    Response::new(code::INSUFFICIENT_STORAGE, "Too many recipients"),
                );
            }
            Transition {
                next_state: State::RcptReceived,
                next_extended: extended,
                response: Response::new(code::OK, "OK"),
                effect: Effect::AddRecipient(address),
            }
        }
        State::Initial | State::Greeted => bad_sequence(state, extended),
        State::Data | State::Closed => unreachable!("handled by caller/session loop"),
    }
}

fn data(state: State, extended: bool) -> Transition {
    match state {
        State::RcptReceived => Transition {
            next_state: State::Data,
            next_extended: extended,
            response: Response::new(code::START_MAIL_INPUT, "Start mail input; end with <CRLF>.<CRLF>"),
            effect: Effect::EnterData,
        },
        State::Initial | State::Greeted | State::MailReceived => bad_sequence(state, extended),
        State::Data | State::Closed => unreachable!("handled by caller/session loop"),
    }
}

fn rset(extended: bool) -> Transition {
    // Per the specification's testable properties: RSET always yields `Greeted` with an empty
    // envelope, regardless of the prior state.
    Transition {
        next_state: State::Greeted,
        next_extended: extended,
        response: Response::new(code::OK, "OK"),
        effect: Effect::ClearEnvelope,
    }
}

#[cfg(test)]
mod test {
    use super::{transition, Effect, State};
    use crate::{address::EmailAddress, command::Command, config::Config};

    fn config() -> Config {
        Config::builder().domain("localhost").max_message_size(1_048_576).build()
    }

    #[test]
    fn mail_from_before_helo_is_bad_sequence() {
        let t = transition(State::Initial, false, Command::MailFrom {
            address: EmailAddress::new("a@x"),
            params: Default::default(),
        }, &config(), 0);
        assert_eq!(t.next_state, State::Initial);
        assert_eq!(t.response.code(), 503);
    }

    #[test]
    fn full_happy_path() {
        let cfg = config();

        let t = transition(State::Initial, false, Command::Ehlo("client.example".into()), &cfg, 0);
        assert_eq!(t.next_state, State::Greeted);
        assert!(t.next_extended);
        assert_eq!(t.response.code(), 250);
        assert_eq!(t.response.lines().len(), 3);

        let t = transition(State::Greeted, true, Command::MailFrom {
            address: EmailAddress::new("a@x"),
            params: Default::default(),
        }, &cfg, 0);
        assert_eq!(t.next_state, State::MailReceived);
        assert_eq!(t.effect, Effect::SetFrom(EmailAddress::new("a@x")));

        let t = transition(State::MailReceived, true, Command::RcptTo {
            address: EmailAddress::new("b@y"),
            params: Default::default(),
        }, &cfg, 0);
        assert_eq!(t.next_state, State::RcptReceived);
        assert_eq!(t.effect, Effect::AddRecipient(EmailAddress::new("b@y")));

        let t = transition(State::RcptReceived, true, Command::Data, &cfg, 1);
        assert_eq!(t.next_state, State::Data);
        assert_eq!(t.response.code(), 354);
    }

    #[test]
    fn rset_always_returns_to_greeted() {
        for state in [
            State::Initial,
            State::Greeted,
            State::MailReceived,
            State::RcptReceived,
        ] {
            let t = transition(state, true, Command::Rset, &config(), 0);
            assert_eq!(t.next_state, State::Greeted);
            assert_eq!(t.effect, Effect::ClearEnvelope);
            assert_eq!(t.response.code(), 250);
        }
    }

    #[test]
    fn oversized_size_param_is_rejected() {
        let t = transition(State::Greeted, true, Command::MailFrom {
            address: EmailAddress::new("a@x"),
            params: crate::command::MailParams {
                size: Some(2_000_000),
                body: None,
                unrecognized: vec![],
            },
        }, &config(), 0);
        assert_eq!(t.next_state, State::Greeted);
        assert_eq!(t.response.code(), 552);
        assert_eq!(t.effect, Effect::None);
    }

    #[test]
    fn size_param_without_ehlo_is_rejected() {
        let t = transition(State::Greeted, false, Command::MailFrom {
            address: EmailAddress::new("a@x"),
            params: crate::command::MailParams {
                size: Some(10),
                body: None,
                unrecognized: vec![],
            },
        }, &config(), 0);
        assert_eq!(t.response.code(), 504);
    }

    #[test]
    fn rcpt_cap_reached_is_452() {
        let t = transition(State::RcptReceived, true, Command::RcptTo {
            address: EmailAddress::new("c@z"),
            params: Default::default(),
        }, &Config::builder().max_recipients_per_message(1).build(), 1);
        assert_eq!(t.next_state, State::RcptReceived);
        assert_eq!(t.response.code(), 452);
        assert_eq!(t.effect, Effect::None);
    }

    #[test]
    fn rcpt_under_cap_is_accepted() {
        let t = transition(State::RcptReceived, true, Command::RcptTo {
            address: EmailAddress::new("c@z"),
            params: Default::default(),
        }, &Config::builder().max_recipients_per_message(2).build(), 1);
        assert_eq!(t.next_state, State::RcptReceived);
        assert_eq!(t.response.code(), 250);
        assert_eq!(t.effect, Effect::AddRecipient(EmailAddress::new("c@z")));
    }

    #[test]
    fn rcpt_to_with_unrecognized_parameter_is_accepted_not_504() {
        // The transition table has no 504 cell for `RCPT TO`; an unrecognized parameter is
        // ignored, unlike the equivalent case for `MAIL FROM`.
        let t = transition(State::RcptReceived, true, Command::RcptTo {
            address: EmailAddress::new("c@z"),
            params: crate::command::RcptParams { unrecognized: vec!["KEY=VALUE".to_string()] },
        }, &config(), 0);
        assert_eq!(t.next_state, State::RcptReceived);
        assert_eq!(t.response.code(), 250);
        assert_eq!(t.effect, Effect::AddRecipient(EmailAddress::new("c@z")));
    }

    #[test]
    fn quit_closes_from_any_state() {
        for state in [State::Initial, State::Greeted, State::MailReceived, State::RcptReceived] {
            let t = transition(state, true, Command::Quit, &config(), 0);
            assert_eq!(t.next_state, State::Closed);
            assert_eq!(t.effect, Effect::Close);
            assert_eq!(t.response.code(), 221);
        }
    }
}

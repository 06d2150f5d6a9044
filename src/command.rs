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

//! Tokenises one already-extracted command line into a [`Command`].
//!
//! This module performs syntactic validation only — whether a command is *legal in the current
//! state* is the job of [`crate::state`]. The 512-byte command-line cap is a session-level
//! concern (see [`crate::session`]) and is not enforced here.

use crate::address::EmailAddress;

/// One parsed SMTP command line.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Command {
    Helo(String),
    Ehlo(String),
    MailFrom {
        address: EmailAddress,
        params: MailParams,
    },
    RcptTo {
        address: EmailAddress,
        params: RcptParams,
    },
    Data,
    Rset,
    Noop,
    Quit,
    Vrfy(String),
    /// A syntactically well-formed line whose verb this crate does not recognise at all.
    Unknown(String),
    /// A recognised verb (or no verb at all) with a malformed argument.
    SyntaxError(String),
}

/// The negotiated `BODY=` value on a `MAIL FROM`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum BodyValue {
    SevenBit,
    EightBitMime,
    /// A value other than `7BIT`/`8BITMIME`; the state machine rejects this with 504.
    Other(String),
}

/// Parameters recognised on `MAIL FROM`.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct MailParams {
    /// The decimal value of a `SIZE=` parameter, already range-checked for overflow.
    pub size: Option<u64>,
    /// The value of a `BODY=` parameter.
    pub body: Option<BodyValue>,
    /// Parameter keys this crate does not recognise at all, in the order encountered.
    pub unrecognized: Vec<String>,
}

/// Parameters recognised on `RCPT TO`.
///
/// The base protocol this crate implements defines no `RCPT TO` parameters, so every parameter
/// token collected here is unrecognised; [`crate::state`] maps a non-empty list to 504.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct RcptParams {
    pub unrecognized: Vec<String>,
}

/// Parse one CRLF-stripped line into a [`Command`].
///
/// Never fails: a malformed line becomes `Command::SyntaxError`, a well-formed but unrecognised
/// verb becomes `Command::Unknown`.
#[must_use]
pub fn parse(line: &str) -> Command {
    let (verb, rest) = split_verb(line);
    let verb_upper = verb.to_ascii_uppercase();

    match verb_upper.as_str() {
        "HELO" => parse_domain_arg(rest).map_or_else(Command::SyntaxError, Command::Helo),
        "EHLO" => parse_domain_arg(rest).map_or_else(Command::SyntaxError, Command::Ehlo),
        "MAIL" => parse_mail_from(rest),
        "RCPT" => parse_rcpt_to(rest),
        "DATA" => no_argument(rest, Command::Data),
        "RSET" => no_argument(rest, Command::Rset),
        "NOOP" => no_argument(rest, Command::Noop),
        "QUIT" => no_argument(rest, Command::Quit),
        "VRFY" => Command::Vrfy(rest.trim().to_string()),
        "" => Command::Unknown(String::new()),
        _ => Command::Unknown(verb_upper),
    }
}

/// Split a line into its leading ASCII-alphabetic verb and the remaining text.
fn split_verb(line: &str) -> (&str, &str) {
    let verb_len = line
        .find(|c: char| !c.is_ascii_alphabetic())
        .unwrap_or(line.len());
    (&line[..verb_len], &line[verb_len..])
}

/// `DATA`/`RSET`/`NOOP`/`QUIT` take no arguments: any non-whitespace tail is a syntax error.
fn no_argument(rest: &str, command: Command) -> Command {
    if rest.trim().is_empty() {
        command
    } else {
        Command::SyntaxError(format!("unexpected argument {:?}", rest.trim()))
    }
}

/// Parse the single domain/address-literal argument of `HELO`/`EHLO`.
fn parse_domain_arg(rest: &str) -> Result<String, String> {
    let trimmed = rest.trim();
    if trimmed.is_empty() {
        return Err("missing domain argument".to_string());
    }
    if trimmed.split_whitespace().count() > 1 {
        return Err(format!("expected a single domain token, got {trimmed:?}"));
    }
    Ok(trimmed.to_string())
}

fn parse_mail_from(rest: &str) -> Command {
    let (addr, params_text) = match parse_path(rest, "FROM") {
        Ok(parts) => parts,
        Err(e) => return Command::SyntaxError(e),
    };
    // Per spec: the reverse-path may be empty (the null path, <>); only MAIL FROM allows this.
    let params = match parse_params(params_text) {
        Ok(tokens) => tokens,
        Err(e) => return Command::SyntaxError(e),
    };

    let mut mail_params = MailParams::default();
    for (key, value) in params {
        match key.as_str() {
            "SIZE" => match value.as_deref().map(str::parse::<u64>) {
                Some(Ok(size)) => mail_params.size = Some(size),
                _ => return Command::SyntaxError(format!("invalid SIZE value {value:?}")),
            },
            "BODY" => {
                mail_params.body = Some(match value.as_deref() {
                    Some("7BIT") => BodyValue::SevenBit,
                    Some("8BITMIME") => BodyValue::EightBitMime,
                    other => BodyValue::Other(other.unwrap_or_default().to_string()),
                });
            }
            _ => mail_params.unrecognized.push(key),
        }
    }

    Command::MailFrom {
        address: EmailAddress::new(addr),
        params: mail_params,
    }
}

fn parse_rcpt_to(rest: &str) -> Command {
    let (addr, params_text) = match parse_path(rest, "TO") {
        Ok(parts) => parts,
        Err(e) => return Command::SyntaxError(e),
    };
    if addr.is_empty() {
        // The forward-path may never be empty; the null path is reverse-path only.
        return Command::SyntaxError("RCPT TO requires a non-empty forward-path".to_string());
    }

    let params = match parse_params(params_text) {
        Ok(tokens) => tokens,
        Err(e) => return Command::SyntaxError(e),
    };
    let unrecognized = params.into_iter().map(|(key, _)| key).collect();

    Command::RcptTo {
        address: EmailAddress::new(addr),
        params: RcptParams { unrecognized },
    }
}

/// Parse `<WS>*keyword<WS>*:<WS>*<addr>(<WS>param)*` shared by `MAIL FROM`/`RCPT TO`.
///
/// Returns the address text (without angle brackets) and the remaining, unparsed parameter text.
fn parse_path<'a>(rest: &'a str, keyword: &str) -> Result<(&'a str, &'a str), String> {
    let after_ws = rest.trim_start();
    let Some(after_keyword) = strip_prefix_ci(after_ws, keyword) else {
        return Err(format!("expected {keyword} keyword"));
    };

    let after_keyword = after_keyword.trim_start();
    let Some(after_colon) = after_keyword.strip_prefix(':') else {
        return Err("expected ':' after keyword".to_string());
    };

    let after_colon = after_colon.trim_start();
    let Some(after_langle) = after_colon.strip_prefix('<') else {
        return Err("expected '<' to open the path".to_string());
    };

    let Some(close_idx) = after_langle.find(['<', '>']) else {
        return Err("unterminated '<' in path".to_string());
    };
    if after_langle.as_bytes()[close_idx] == b'<' {
        return Err("nested '<' in path".to_string());
    }

    let addr = &after_langle[..close_idx];
    let params_text = &after_langle[close_idx + 1..];
    Ok((addr, params_text))
}

/// Case-insensitive `str::strip_prefix` for ASCII keywords.
fn strip_prefix_ci<'a>(s: &'a str, prefix: &str) -> Option<&'a str> {
    if s.len() >= prefix.len() && s.as_bytes()[..prefix.len()].eq_ignore_ascii_case(prefix.as_bytes()) {
        Some(&s[prefix.len()..])
    } else {
        None
    }
}

/// Parse a whitespace-separated run of `KEY` or `KEY=VALUE` tokens.
///
/// Keys are normalised to uppercase; values keep their original case (parameter values, unlike
/// verbs, are not necessarily case-insensitive).
fn parse_params(text: &str) -> Result<Vec<(String, Option<String>)>, String> {
    let mut params = Vec::new();

    for token in text.split_whitespace() {
        match token.split_once('=') {
            Some((key, _value)) if key.is_empty() => {
                return Err(format!("malformed parameter {token:?}"))
            }
            Some((key, value)) => params.push((key.to_ascii_uppercase(), Some(value.to_string()))),
            None => params.push((token.to_ascii_uppercase(), None)),
        }
    }

    Ok(params)
}

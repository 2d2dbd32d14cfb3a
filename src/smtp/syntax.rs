//-
// Copyright (c) 2026, The Postern Authors
//
// This file is part of Postern.
//
// Postern is free software: you can  redistribute it and/or modify it under the
// terms of  the GNU General Public  License as published by  the Free Software
// Foundation, either version  3 of the License, or (at  your option) any later
// version.
//
// Postern is distributed  in the hope that  it will be useful,  but WITHOUT ANY
// WARRANTY; without  even the implied  warranty of MERCHANTABILITY  or FITNESS
// FOR  A PARTICULAR  PURPOSE.  See the  GNU General  Public  License for  more
// details.
//
// You should have received a copy of the GNU General Public License along with
// Postern. If not, see <http://www.gnu.org/licenses/>.

use std::str::FromStr;

#[derive(Clone, Debug, PartialEq, Eq)]
pub enum Command {
    /// EHLO domain
    Ehlo(String),
    /// HELO domain
    Helo(String),
    /// MAIL FROM:reverse-path
    ///
    /// The argument is passed through verbatim, including any angle brackets
    /// and parameters.
    MailFrom(String),
    /// RCPT TO:forward-path
    RcptTo(String),
    /// DATA
    Data,
    /// RSET
    Reset,
    /// VRFY ignored...
    Verify,
    /// EXPN ignored...
    Expand,
    /// HELP ignored...
    Help,
    /// NOOP
    Noop,
    /// QUIT
    Quit,
    /// STARTTLS
    StartTls,
    /// AUTH mechanism [initial-response]
    Auth(String),
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
enum Verb {
    Ehlo,
    Helo,
    MailFrom,
    RcptTo,
    Data,
    Reset,
    Verify,
    Expand,
    Help,
    Noop,
    Quit,
    StartTls,
    Auth,
}

/// How the text following a verb is treated.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
enum Tail {
    /// Leading whitespace is skipped and the rest is the argument.
    Argument,
    /// At least one whitespace character must follow the verb; the rest
    /// after the whitespace is the argument.
    SpacedArgument,
    /// Anything may follow and is discarded.
    Ignored,
}

// Matched top to bottom against a case-insensitive prefix of the line. Order
// matters only where one verb would be a prefix of another, but is kept
// stable so that dispatch is predictable.
static VERBS: &[(&str, Tail, Verb)] = &[
    ("EHLO", Tail::Argument, Verb::Ehlo),
    ("HELO", Tail::Argument, Verb::Helo),
    ("MAIL FROM:", Tail::Argument, Verb::MailFrom),
    ("RCPT TO:", Tail::Argument, Verb::RcptTo),
    ("DATA", Tail::Ignored, Verb::Data),
    ("RSET", Tail::Ignored, Verb::Reset),
    ("VRFY", Tail::SpacedArgument, Verb::Verify),
    ("EXPN", Tail::SpacedArgument, Verb::Expand),
    ("HELP", Tail::Ignored, Verb::Help),
    ("NOOP", Tail::Ignored, Verb::Noop),
    ("QUIT", Tail::Ignored, Verb::Quit),
    ("STARTTLS", Tail::Ignored, Verb::StartTls),
    ("AUTH", Tail::SpacedArgument, Verb::Auth),
];

/// If `s` starts with `prefix`, ignoring ASCII case, returns the rest of `s`.
fn strip_prefix_ignore_case<'a>(s: &'a str, prefix: &str) -> Option<&'a str> {
    s.get(..prefix.len())
        .filter(|head| head.eq_ignore_ascii_case(prefix))
        .map(|_| &s[prefix.len()..])
}

fn match_verb(s: &str) -> Option<(Verb, &str)> {
    for &(prefix, tail, verb) in VERBS {
        let Some(rest) = strip_prefix_ignore_case(s, prefix) else {
            continue;
        };

        let argument = match tail {
            Tail::Ignored => rest,
            Tail::Argument => rest.trim_start_matches(is_space),
            Tail::SpacedArgument => {
                if !rest.starts_with(is_space) {
                    continue;
                }
                rest.trim_start_matches(is_space)
            },
        };

        return Some((verb, argument));
    }

    None
}

fn is_space(c: char) -> bool {
    c.is_ascii_whitespace()
}

impl FromStr for Command {
    type Err = ();

    fn from_str(s: &str) -> Result<Self, ()> {
        let (verb, argument) = match_verb(s).ok_or(())?;
        Ok(match verb {
            Verb::Ehlo => Command::Ehlo(argument.to_owned()),
            Verb::Helo => Command::Helo(argument.to_owned()),
            Verb::MailFrom => Command::MailFrom(argument.to_owned()),
            Verb::RcptTo => Command::RcptTo(argument.to_owned()),
            Verb::Data => Command::Data,
            Verb::Reset => Command::Reset,
            Verb::Verify => Command::Verify,
            Verb::Expand => Command::Expand,
            Verb::Help => Command::Help,
            Verb::Noop => Command::Noop,
            Verb::Quit => Command::Quit,
            Verb::StartTls => Command::StartTls,
            Verb::Auth => Command::Auth(argument.to_owned()),
        })
    }
}

/// The mechanism named in an `AUTH` argument.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum AuthMechanism<'a> {
    /// RFC 4616 PLAIN, with the initial response if one was given inline.
    Plain(Option<&'a str>),
    Unsupported,
}

/// Splits the argument of `AUTH` into the mechanism and initial response.
pub fn parse_auth_argument(argument: &str) -> AuthMechanism<'_> {
    let Some(rest) = strip_prefix_ignore_case(argument, "PLAIN") else {
        return AuthMechanism::Unsupported;
    };

    if rest.is_empty() {
        AuthMechanism::Plain(None)
    } else if rest.starts_with(is_space) {
        let initial = rest.trim_matches(is_space);
        AuthMechanism::Plain(Some(initial).filter(|s| !s.is_empty()))
    } else {
        AuthMechanism::Unsupported
    }
}

/// Decodes an RFC 4616 PLAIN response into `(user, password)`.
///
/// The payload is `authzid NUL authcid NUL password`; the authorisation
/// identity is discarded. Returns `None` if the response is not valid base64,
/// does not have exactly three fields, or is not UTF-8.
pub fn decode_plain_credentials(response: &str) -> Option<(String, String)> {
    let decoded = base64::decode(response.trim()).ok()?;
    let decoded = String::from_utf8(decoded).ok()?;

    let mut parts = decoded.split('\x00');
    let (Some(_authorise), Some(user), Some(password), None) =
        (parts.next(), parts.next(), parts.next(), parts.next())
    else {
        return None;
    };

    Some((user.to_owned(), password.to_owned()))
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn command_parsing() {
        assert_eq!(
            Ok(Command::Ehlo("a.test".to_owned())),
            "EHLO a.test".parse()
        );
        assert_eq!(
            Ok(Command::Ehlo("a.test".to_owned())),
            "ehlo \t a.test".parse()
        );
        assert_eq!(Ok(Command::Ehlo(String::new())), "EHLO".parse());
        assert_eq!(
            Ok(Command::Helo("foo.example.com".to_owned())),
            "HeLo foo.example.com".parse()
        );

        assert_eq!(
            Ok(Command::MailFrom("<a@b>".to_owned())),
            "MAIL FROM:<a@b>".parse()
        );
        assert_eq!(
            Ok(Command::MailFrom("<a@b> SIZE=42".to_owned())),
            "mail from: <a@b> SIZE=42".parse()
        );
        assert_eq!(
            Ok(Command::MailFrom("<>".to_owned())),
            "MAIL FROM:<>".parse()
        );
        assert_eq!(Err(()), "MAIL <a@b>".parse::<Command>());

        assert_eq!(
            Ok(Command::RcptTo("<c@d>".to_owned())),
            "RCPT TO:<c@d>".parse()
        );
        assert_eq!(
            Ok(Command::RcptTo("<c@d>".to_owned())),
            "rcpt to:   <c@d>".parse()
        );

        assert_eq!(Ok(Command::Data), "DATA".parse());
        assert_eq!(Ok(Command::Data), "data".parse());
        // Verbs are prefixes; what follows them is not inspected.
        assert_eq!(Ok(Command::Data), "DATABASE".parse());
        assert_eq!(Ok(Command::Reset), "RSET".parse());
        assert_eq!(Ok(Command::Noop), "NOOP NOP".parse());
        assert_eq!(Ok(Command::Quit), "quit".parse());
        assert_eq!(Ok(Command::StartTls), "StartTLS".parse());
        assert_eq!(Ok(Command::Help), "HELP".parse());
        assert_eq!(Ok(Command::Help), "help me".parse());

        assert_eq!(Ok(Command::Verify), "VRFY Smith".parse());
        assert_eq!(Ok(Command::Verify), "vrfy <foo@bar.com>".parse());
        assert_eq!(Err(()), "VRFY".parse::<Command>());
        assert_eq!(Ok(Command::Expand), "EXPN Smith".parse());
        assert_eq!(Err(()), "EXPN".parse::<Command>());

        assert_eq!(
            Ok(Command::Auth("PLAIN AGF6dXJl".to_owned())),
            "AUTH PLAIN AGF6dXJl".parse()
        );
        assert_eq!(
            Ok(Command::Auth("LOGIN".to_owned())),
            "auth LOGIN".parse()
        );
        assert_eq!(Err(()), "AUTH".parse::<Command>());

        assert_eq!(Err(()), "".parse::<Command>());
        assert_eq!(Err(()), "GET / HTTP/1.0".parse::<Command>());
        assert_eq!(Err(()), "EHL".parse::<Command>());
        assert_eq!(Err(()), "ÉHLO a.test".parse::<Command>());
    }

    #[test]
    fn auth_argument_parsing() {
        assert_eq!(AuthMechanism::Plain(None), parse_auth_argument("PLAIN"));
        assert_eq!(AuthMechanism::Plain(None), parse_auth_argument("plain "));
        assert_eq!(
            AuthMechanism::Plain(Some("AGEAYg==")),
            parse_auth_argument("PLAIN AGEAYg==")
        );
        assert_eq!(
            AuthMechanism::Plain(Some("AGEAYg==")),
            parse_auth_argument("Plain  AGEAYg==  ")
        );
        assert_eq!(AuthMechanism::Unsupported, parse_auth_argument("LOGIN"));
        assert_eq!(
            AuthMechanism::Unsupported,
            parse_auth_argument("PLAINTEXT")
        );
        assert_eq!(AuthMechanism::Unsupported, parse_auth_argument(""));
    }

    #[test]
    fn plain_credentials_decoding() {
        assert_eq!(
            Some(("azure".to_owned(), "hunter2".to_owned())),
            decode_plain_credentials(&base64::encode("\0azure\0hunter2"))
        );
        assert_eq!(
            Some(("azure".to_owned(), "hunter2".to_owned())),
            decode_plain_credentials(&base64::encode("admin\0azure\0hunter2"))
        );
        assert_eq!(
            Some((String::new(), String::new())),
            decode_plain_credentials(&base64::encode("\0\0"))
        );

        assert_eq!(None, decode_plain_credentials("not base64!"));
        assert_eq!(None, decode_plain_credentials(""));
        assert_eq!(
            None,
            decode_plain_credentials(&base64::encode("azure\0hunter2"))
        );
        assert_eq!(
            None,
            decode_plain_credentials(&base64::encode("a\0b\0c\0d"))
        );
        assert_eq!(
            None,
            decode_plain_credentials(&base64::encode(b"\0\xff\0x"))
        );
    }
}

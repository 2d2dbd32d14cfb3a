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

//! The interface between the protocol engine and the application.
//!
//! The engine knows the rules of SMTP but makes no decisions of its own about
//! who may send what to whom. Each such decision is a call into a [`Policy`],
//! one instance of which exists per connection.

use std::borrow::Cow;

use super::deferred::Deferred;

pub const DEFAULT_GREETING: &str = "Postern SMTP Server";
pub const DEFAULT_DOMAIN: &str = "Ok Postern SMTP Server";

/// Decisions and notifications for one SMTP connection.
///
/// Every method has a default which accepts everything and ignores all
/// notifications, so implementations only need to override what they care
/// about.
///
/// Methods returning [`Deferred`] may answer later; a plain `bool` can be
/// returned via `.into()`. The engine sends nothing for the command in
/// question, nor processes any later command, until the answer is known.
pub trait Policy {
    /// Text following `220` in the greeting sent on connect.
    fn server_greeting(&self) -> Cow<'_, str> {
        Cow::Borrowed(DEFAULT_GREETING)
    }

    /// Name reported in the first line of a successful EHLO or HELO
    /// response.
    fn server_domain(&self) -> Cow<'_, str> {
        Cow::Borrowed(DEFAULT_DOMAIN)
    }

    /// Receives the argument of EHLO or HELO. Returning false causes a `550`
    /// to be sent.
    fn receive_ehlo_domain(&mut self, _domain: &str) -> bool {
        true
    }

    /// Checks the credentials of `AUTH PLAIN`.
    fn receive_plain_auth(&mut self, _user: &str, _password: &str) -> bool {
        true
    }

    /// Receives the argument of MAIL FROM, exactly as the client sent it.
    ///
    /// This is called at most once per transaction.
    fn receive_sender(&mut self, _sender: &str) -> bool {
        true
    }

    /// Receives the argument of a RCPT TO. This may be called any number of
    /// times per transaction; rejecting one recipient does not affect the
    /// others.
    fn receive_recipient(&mut self, _recipient: &str) -> Deferred {
        true.into()
    }

    /// Called when the client sends DATA, after at least one recipient was
    /// accepted. Rejecting this causes a `550` and the transaction stays
    /// where it was.
    fn receive_data_command(&mut self) -> Deferred {
        true.into()
    }

    /// Receives a burst of message body lines, with line endings removed and
    /// dot-stuffing undone.
    ///
    /// This is called as the body arrives, once per 4096 lines and once more
    /// at the end of the body for whatever remains.
    fn receive_data_chunk(&mut self, _lines: &[Vec<u8>]) {}

    /// Called once the whole message body has been received. Returning
    /// success causes `250 Message accepted`; failure causes
    /// `550 Message rejected`. Either way the transaction ends.
    fn receive_message(&mut self) -> Deferred {
        true.into()
    }

    /// Called when the transaction is reset by RSET, EHLO or HELO.
    ///
    /// RSET is not allowed to fail, so there is nothing to return.
    fn receive_reset(&mut self) {}

    /// Called exactly once when the connection ends, however that happens.
    fn connection_ended(&mut self) {}
}

/// A policy which uses all the defaults.
#[derive(Clone, Copy, Debug, Default)]
pub struct AcceptAll;

impl Policy for AcceptAll {}

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

//! The SMTP protocol engine.
//!
//! An [`Engine`] owns everything about one connection except the socket: it
//! reassembles input into lines, interprets them against the session state,
//! consults the [`Policy`] and writes responses through a [`Transport`].
//!
//! The engine never blocks. When the policy answers a command with a
//! [`Deferred`] that is not yet resolved, the engine suspends: input keeps
//! being accepted and buffered, but no further lines are interpreted until
//! the decision arrives through [`Engine::resume`] or [`Engine::try_resume`].
//! Responses are therefore always sent in the order the commands arrived.

use std::collections::VecDeque;

use log::{debug, error, info, warn};
use serde::{Deserialize, Serialize};

use super::codes::*;
use super::deferred::Deferred;
use super::lines::LineBuffer;
use super::policy::Policy;
use super::session::Session;
use super::syntax::*;
use crate::support::log_prefix::LogPrefix;

/// Bytes of input queued behind a pending decision at which a driver should
/// stop reading from the client until the decision arrives.
pub const QUEUE_SOFT_LIMIT: usize = 64 * 1024;
/// Bytes of input queued behind a pending decision beyond which the client is
/// disconnected.
pub const QUEUE_HARD_LIMIT: usize = 2 * QUEUE_SOFT_LIMIT;

/// The engine's view of the connection.
///
/// The methods queue work for the transport; none of them can fail from the
/// engine's point of view. Failures of the underlying I/O are the transport's
/// concern, which must then call [`Engine::connection_closed`].
pub trait Transport {
    /// Queues `data` to be written to the peer.
    fn send_data(&mut self, data: &[u8]);

    /// Requests that the connection be closed after everything queued so far
    /// has been written.
    fn close_connection(&mut self);

    /// Requests a TLS handshake after everything queued so far has been
    /// written.
    fn start_tls(&mut self);
}

/// Protocol features which may be turned on or off per engine.
#[derive(Clone, Debug, PartialEq, Eq, Deserialize, Serialize)]
#[serde(default)]
pub struct EngineConfig {
    /// Whether STARTTLS is offered. If false, STARTTLS is an unknown command.
    pub starttls: bool,
    /// Whether AUTH is offered. If false, AUTH is an unknown command.
    ///
    /// PLAIN is the only supported mechanism.
    pub auth: bool,
    /// The message size limit advertised in the EHLO response.
    pub max_size: u64,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            starttls: false,
            auth: false,
            max_size: 20_000_000,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum ResponseKind {
    /// The last (or only) line of a response.
    Final,
    /// A line of a multi-line response with more to follow.
    Continued,
}

impl ResponseKind {
    fn or_final(self, phinal: bool) -> Self {
        if phinal {
            ResponseKind::Final
        } else {
            self
        }
    }

    fn indicator(self) -> char {
        match self {
            Final => ' ',
            Continued => '-',
        }
    }
}

use self::ResponseKind::*;

/// What to do once a deferred policy decision is known.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Continuation {
    Recipient,
    DataCommand,
    Message,
}

struct Suspension {
    outcome: Deferred,
    continuation: Continuation,
}

pub struct Engine<P, T> {
    config: EngineConfig,
    policy: P,
    transport: T,
    log_prefix: LogPrefix,

    lines: LineBuffer,
    session: Session,
    /// Lines which have been received but not yet interpreted, because the
    /// engine is suspended.
    queued: VecDeque<Vec<u8>>,
    /// Size of `queued`, counting one terminator byte per line.
    queued_bytes: usize,
    suspended: Option<Suspension>,

    quit: bool,
    ended: bool,
}

impl<P: Policy, T: Transport> Engine<P, T> {
    pub fn new(
        config: EngineConfig,
        policy: P,
        transport: T,
        log_prefix: LogPrefix,
    ) -> Self {
        Self {
            config,
            policy,
            transport,
            log_prefix,
            lines: LineBuffer::new(),
            session: Session::new(),
            queued: VecDeque::new(),
            queued_bytes: 0,
            suspended: None,
            quit: false,
            ended: false,
        }
    }

    /// Sends the greeting. SMTP servers speak first, so this should be
    /// called as soon as the connection is established.
    pub fn start(&mut self) {
        debug!("{} Sending greeting", self.log_prefix);
        let greeting = self.policy.server_greeting().into_owned();
        self.send_response(Final, pc::ServiceReady, &greeting);
    }

    /// Feeds raw input from the peer into the engine.
    ///
    /// Any complete lines are interpreted immediately unless the engine is
    /// suspended, in which case they wait for the decision to arrive.
    pub fn receive_data(&mut self, data: &[u8]) {
        if self.is_finished() {
            return;
        }

        for line in self.lines.feed(data) {
            self.queued_bytes += line.len() + 1;
            self.queued.push_back(line);
        }
        self.process_queued();

        if self.queued_bytes > QUEUE_HARD_LIMIT {
            self.reject_excess_input();
        }
    }

    /// Whether a command is waiting on a policy decision.
    pub fn is_suspended(&self) -> bool {
        self.suspended.is_some()
    }

    /// Whether so much input is queued behind a pending decision that the
    /// driver should stop reading until [`Engine::resume`] completes.
    ///
    /// Input fed in regardless is still accepted up to [`QUEUE_HARD_LIMIT`],
    /// past which the client is disconnected.
    pub fn is_saturated(&self) -> bool {
        self.suspended.is_some() && self.queued_bytes >= QUEUE_SOFT_LIMIT
    }

    /// Whether the session is over, either because the client sent QUIT or
    /// because the connection was closed. Input is ignored from then on.
    pub fn is_finished(&self) -> bool {
        self.quit || self.ended
    }

    /// Waits for the pending policy decision, applies it, and then interprets
    /// any lines which were queued behind it.
    ///
    /// If nothing is pending, this never completes. It is cancel-safe: if the
    /// future is dropped before the decision arrives, nothing happens and the
    /// engine stays suspended.
    pub async fn resume(&mut self) {
        let Some(ref mut suspension) = self.suspended else {
            return std::future::pending().await;
        };

        let success = (&mut suspension.outcome).await;
        if let Some(suspension) = self.suspended.take() {
            self.conclude(suspension, success);
        }
        self.process_queued();
    }

    /// Like `resume`, but does not wait. Returns whether a pending decision
    /// was applied.
    pub fn try_resume(&mut self) -> bool {
        let Some(ref mut suspension) = self.suspended else {
            return false;
        };

        let Some(success) = suspension.outcome.try_outcome() else {
            return false;
        };

        if let Some(suspension) = self.suspended.take() {
            self.conclude(suspension, success);
        }
        self.process_queued();
        true
    }

    /// Must be called by the transport when the connection has ended for any
    /// reason. Any pending decision is discarded without being applied.
    ///
    /// The policy is notified the first time this is called; later calls do
    /// nothing.
    pub fn connection_closed(&mut self) {
        if self.ended {
            return;
        }

        self.ended = true;
        if let Some(suspension) = self.suspended.take() {
            debug!(
                "{} Discarding pending {:?} decision",
                self.log_prefix, suspension.continuation,
            );
        }
        self.clear_queue();
        self.policy.connection_ended();
    }

    pub fn log_prefix(&self) -> &LogPrefix {
        &self.log_prefix
    }

    pub fn config(&self) -> &EngineConfig {
        &self.config
    }

    pub fn session(&self) -> &Session {
        &self.session
    }

    pub fn policy(&self) -> &P {
        &self.policy
    }

    pub fn policy_mut(&mut self) -> &mut P {
        &mut self.policy
    }

    pub fn transport(&self) -> &T {
        &self.transport
    }

    pub fn transport_mut(&mut self) -> &mut T {
        &mut self.transport
    }

    fn process_queued(&mut self) {
        while self.suspended.is_none() && !self.is_finished() {
            let Some(line) = self.queued.pop_front() else {
                break;
            };
            self.queued_bytes -= line.len() + 1;

            self.receive_line(line);
        }
    }

    fn receive_line(&mut self, line: Vec<u8>) {
        if self.session.in_data() {
            return self.process_data_line(line);
        }

        let line = String::from_utf8_lossy(&line);
        if self.session.auth_incomplete() {
            return self.process_auth_response(&line);
        }

        let command = match line.parse::<Command>() {
            Ok(c) => c,
            Err(()) => {
                let mut debug_line: &str = &line;
                if let Some((truncate_len, _)) =
                    debug_line.char_indices().nth(64)
                {
                    debug_line = &debug_line[..truncate_len];
                }

                warn!(
                    "{} Received bad command {debug_line:?}",
                    self.log_prefix
                );
                return self.cmd_unknown();
            },
        };

        match command {
            Command::Ehlo(domain) => self.cmd_helo(domain, true),
            Command::Helo(domain) => self.cmd_helo(domain, false),
            Command::MailFrom(sender) => self.cmd_mail_from(sender),
            Command::RcptTo(recipient) => self.cmd_rcpt_to(recipient),
            Command::Data => self.cmd_data(),
            Command::Reset => self.cmd_reset(),
            Command::Verify | Command::Expand | Command::Help => {
                self.cmd_unimplemented()
            },
            Command::Noop => self.cmd_noop(),
            Command::Quit => self.cmd_quit(),
            Command::StartTls => self.cmd_start_tls(),
            Command::Auth(argument) => self.cmd_auth(argument),
        }
    }

    // EHLO and HELO are always legal. Whatever the outcome, they start over
    // with a fresh transaction, so MAIL FROM must come next.
    fn cmd_helo(&mut self, domain: String, extended: bool) {
        let accepted = self.policy.receive_ehlo_domain(&domain);
        self.reset_transaction();

        if !accepted {
            info!(
                "{} Rejected {} {:?}",
                self.log_prefix,
                if extended { "EHLO" } else { "HELO" },
                domain,
            );
            return self.send_response(
                Final,
                pc::ActionNotTakenPermanent,
                "Requested action not taken",
            );
        }

        self.log_prefix.set_helo(domain);
        info!(
            "{} SMTP {}",
            self.log_prefix,
            if extended { "EHLO" } else { "HELO" },
        );
        self.session.set_ehlo();

        let server_domain = self.policy.server_domain().into_owned();
        self.send_response(
            Continued.or_final(!extended),
            pc::Ok,
            &server_domain,
        );
        if !extended {
            return;
        }

        // RFC 3207 forbids offering STARTTLS once TLS is in use.
        if self.config.starttls && !self.session.has_starttls() {
            self.send_response(Continued, pc::Ok, "STARTTLS");
        }
        if self.config.auth {
            self.send_response(Continued, pc::Ok, "AUTH PLAIN");
        }
        self.send_response(Continued, pc::Ok, "NO-SOLICITING");
        let size = format!("SIZE {}", self.config.max_size);
        self.send_response(Final, pc::Ok, &size);
    }

    fn cmd_auth(&mut self, argument: String) {
        if !self.config.auth {
            warn!("{} Rejected AUTH while it is disabled", self.log_prefix);
            return self.cmd_unknown();
        }

        if self.session.has_auth() {
            return self.send_response(
                Final,
                pc::BadSequenceOfCommands,
                "auth already issued",
            );
        }

        match parse_auth_argument(&argument) {
            AuthMechanism::Plain(Some(response)) => {
                self.process_auth_response(response)
            },

            AuthMechanism::Plain(None) => {
                self.session.begin_auth();
                self.send_response(Final, pc::ServerChallenge, "");
            },

            AuthMechanism::Unsupported => {
                warn!(
                    "{} Rejected attempt to auth with {:?}",
                    self.log_prefix, argument,
                );
                self.send_response(
                    Final,
                    pc::CommandParameterNotImplemented,
                    "auth mechanism not available",
                );
            },
        }
    }

    fn process_auth_response(&mut self, response: &str) {
        let accepted = match decode_plain_credentials(response) {
            Some((user, password)) => {
                let accepted = self.policy.receive_plain_auth(&user, &password);
                if accepted {
                    self.log_prefix.set_user(user);
                }
                accepted
            },

            None => {
                warn!("{} Malformed AUTH PLAIN response", self.log_prefix);
                false
            },
        };

        self.session.finish_auth(accepted);
        if accepted {
            info!("{} Authenticated", self.log_prefix);
            self.send_response(
                Final,
                pc::AuthenticationSucceeded,
                "authentication ok",
            );
        } else {
            warn!("{} Authentication failed", self.log_prefix);
            self.send_response(
                Final,
                pc::AuthenticationCredentialsInvalid,
                "invalid authentication",
            );
        }
    }

    // Neither the reverse-path nor its parameters are validated here; that
    // is entirely up to the policy.
    fn cmd_mail_from(&mut self, sender: String) {
        if self.session.has_mail_from() {
            return self.send_response(
                Final,
                pc::BadSequenceOfCommands,
                "MAIL already given",
            );
        }

        if !self.policy.receive_sender(&sender) {
            return self.send_response(
                Final,
                pc::ActionNotTakenPermanent,
                "sender is unacceptable",
            );
        }

        info!("{} Start mail transaction", self.log_prefix);
        self.session.set_mail_from();
        self.send_response(Final, pc::Ok, "Ok");
    }

    // Recipients are not remembered, counted or deduplicated; the policy sees
    // each one and keeps whatever it needs.
    fn cmd_rcpt_to(&mut self, recipient: String) {
        if !self.session.has_mail_from() {
            return self.send_response(
                Final,
                pc::BadSequenceOfCommands,
                "MAIL is required before RCPT",
            );
        }

        let outcome = self.policy.receive_recipient(&recipient);
        self.await_decision(outcome, Continuation::Recipient);
    }

    fn cmd_data(&mut self) {
        if !self.session.has_rcpt() {
            return self.send_response(
                Final,
                pc::BadSequenceOfCommands,
                "Operation sequence error",
            );
        }

        let outcome = self.policy.receive_data_command();
        self.await_decision(outcome, Continuation::DataCommand);
    }

    fn process_data_line(&mut self, mut line: Vec<u8>) {
        if b"." == &line[..] {
            self.flush_data_chunk();
            self.session.end_data();

            let outcome = self.policy.receive_message();
            return self.await_decision(outcome, Continuation::Message);
        }

        if line.starts_with(b".") {
            line.remove(0);
        }

        if self.session.push_data_line(line) {
            self.flush_data_chunk();
        }
    }

    fn flush_data_chunk(&mut self) {
        if let Some(chunk) = self.session.take_data_chunk() {
            self.policy.receive_data_chunk(&chunk);
        }
    }

    fn cmd_reset(&mut self) {
        self.reset_transaction();
        self.send_response(Final, pc::Ok, "Ok");
    }

    // VRFY, EXPN and HELP are accepted but do nothing.
    fn cmd_unimplemented(&mut self) {
        self.send_response(Final, pc::Ok, "Ok, but unimplemented");
    }

    fn cmd_noop(&mut self) {
        self.send_response(Final, pc::Ok, "Ok");
    }

    fn cmd_quit(&mut self) {
        self.send_response(Final, pc::ServiceClosing, "Ok");
        self.quit = true;
        self.clear_queue();
        self.transport.close_connection();
    }

    fn cmd_start_tls(&mut self) {
        if !self.config.starttls {
            warn!("{} Rejected STARTTLS while it is disabled", self.log_prefix);
            return self.cmd_unknown();
        }

        if self.session.has_starttls() {
            return self.send_response(
                Final,
                pc::BadSequenceOfCommands,
                "TLS Already negotiated",
            );
        }

        if !self.session.has_ehlo() {
            return self.send_response(
                Final,
                pc::BadSequenceOfCommands,
                "EHLO required before STARTTLS",
            );
        }

        self.send_response(Final, pc::ServiceReady, "Start TLS negotiation");
        info!("{} Start TLS handshake", self.log_prefix);
        self.transport.start_tls();
        self.session.set_starttls();
        self.log_prefix.set_tls();

        // Anything the client sent after STARTTLS but before the handshake
        // was sent in the clear and must not be treated as coming over TLS.
        if !self.queued.is_empty() || !self.lines.is_empty() {
            warn!(
                "{} Discarding plaintext pipelined after STARTTLS",
                self.log_prefix,
            );
            self.clear_queue();
            self.lines.clear();
        }
    }

    fn cmd_unknown(&mut self) {
        self.send_response(Final, pc::CommandSyntaxError, "Unknown command");
    }

    /// Applies `outcome` now if it is known, otherwise suspends until it is.
    fn await_decision(&mut self, mut outcome: Deferred, on: Continuation) {
        match outcome.try_outcome() {
            Some(success) => self.conclude(
                Suspension {
                    outcome,
                    continuation: on,
                },
                success,
            ),

            None => {
                debug!("{} Waiting for {:?} decision", self.log_prefix, on);
                self.suspended = Some(Suspension {
                    outcome,
                    continuation: on,
                });
            },
        }
    }

    fn conclude(&mut self, suspension: Suspension, success: bool) {
        if suspension.outcome.is_abandoned() {
            error!(
                "{} [BUG] Policy dropped {:?} decision without resolving it",
                self.log_prefix, suspension.continuation,
            );
        }

        match (suspension.continuation, success) {
            (Continuation::Recipient, true) => {
                self.session.set_rcpt();
                self.send_response(Final, pc::Ok, "Ok");
            },

            (Continuation::Recipient, false) => {
                self.send_response(
                    Final,
                    pc::ActionNotTakenPermanent,
                    "recipient is unacceptable",
                );
            },

            (Continuation::DataCommand, true) => {
                self.session.begin_data();
                self.send_response(Final, pc::StartMailInput, "Send it");
            },

            (Continuation::DataCommand, false) => {
                self.send_response(
                    Final,
                    pc::ActionNotTakenPermanent,
                    "Operation failed",
                );
            },

            // A finished message ends the transaction either way, as though
            // the client had sent RSET, but the policy is not told of it.
            (Continuation::Message, true) => {
                info!("{} Message accepted", self.log_prefix);
                self.session.reset();
                self.send_response(Final, pc::Ok, "Message accepted");
            },

            (Continuation::Message, false) => {
                info!("{} Message rejected", self.log_prefix);
                self.session.reset();
                self.send_response(
                    Final,
                    pc::ActionNotTakenPermanent,
                    "Message rejected",
                );
            },
        }
    }

    // The client did not wait for our response, which SMTP without PIPELINING
    // requires, and kept sending. RFC 5321 allows 421 in reply to anything.
    fn reject_excess_input(&mut self) {
        warn!(
            "{} Too much input queued behind a pending decision; disconnecting",
            self.log_prefix,
        );
        if let Some(suspension) = self.suspended.take() {
            debug!(
                "{} Discarding pending {:?} decision",
                self.log_prefix, suspension.continuation,
            );
        }

        self.clear_queue();
        self.lines.clear();
        self.send_response(
            Final,
            pc::ServiceNotAvailable,
            "Too much pipelined input",
        );
        self.quit = true;
        self.transport.close_connection();
    }

    fn clear_queue(&mut self) {
        self.queued.clear();
        self.queued_bytes = 0;
    }

    fn reset_transaction(&mut self) {
        self.session.reset();
        self.policy.receive_reset();
    }

    fn send_response(
        &mut self,
        kind: ResponseKind,
        primary_code: PrimaryCode,
        quip: &str,
    ) {
        let line = format!(
            "{}{}{}\r\n",
            primary_code as u16,
            kind.indicator(),
            quip,
        );
        self.transport.send_data(line.as_bytes());
    }
}

/// A transport which just accumulates what the engine asks of it, for a
/// driver to act upon.
#[derive(Debug, Default)]
pub struct Outbox {
    pub data: Vec<u8>,
    pub close_requested: bool,
    pub start_tls_requested: bool,
}

impl Transport for Outbox {
    fn send_data(&mut self, data: &[u8]) {
        self.data.extend_from_slice(data);
    }

    fn close_connection(&mut self) {
        self.close_requested = true;
    }

    fn start_tls(&mut self) {
        self.start_tls_requested = true;
    }
}

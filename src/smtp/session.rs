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

//! Per-connection protocol state.
//!
//! There is no single "current state"; instead, each command checks the
//! flags it depends on. The flags are split into two groups: those which
//! describe the connection itself and survive a reset, and those which
//! describe the current mail transaction and are cleared by one.

use bitflags::bitflags;

/// Number of body lines buffered before they are handed to the policy.
pub const DATA_CHUNK_LINES: usize = 4096;

bitflags! {
    /// Flags which persist for the lifetime of the connection.
    #[derive(Default)]
    pub struct ConnectionFlags: u8 {
        /// An EHLO or HELO has been accepted.
        const EHLO = 1 << 0;
        /// TLS has been negotiated. There is no way back to cleartext short of
        /// dropping the connection.
        const STARTTLS = 1 << 1;
    }
}

bitflags! {
    /// Flags which are cleared whenever the transaction is reset.
    #[derive(Default)]
    pub struct TransactionFlags: u8 {
        const AUTH = 1 << 0;
        /// An `AUTH` command is waiting for its credentials line.
        const AUTH_INCOMPLETE = 1 << 1;
        const MAIL_FROM = 1 << 2;
        /// At least one recipient has been accepted.
        const RCPT = 1 << 3;
        /// The message body is being received.
        const DATA = 1 << 4;
    }
}

#[derive(Debug, Default)]
pub struct Session {
    connection: ConnectionFlags,
    transaction: TransactionFlags,
    data_buffer: Vec<Vec<u8>>,
}

impl Session {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn connection(&self) -> ConnectionFlags {
        self.connection
    }

    pub fn transaction(&self) -> TransactionFlags {
        self.transaction
    }

    pub fn has_ehlo(&self) -> bool {
        self.connection.contains(ConnectionFlags::EHLO)
    }

    pub fn has_starttls(&self) -> bool {
        self.connection.contains(ConnectionFlags::STARTTLS)
    }

    pub fn has_auth(&self) -> bool {
        self.transaction.contains(TransactionFlags::AUTH)
    }

    pub fn auth_incomplete(&self) -> bool {
        self.transaction.contains(TransactionFlags::AUTH_INCOMPLETE)
    }

    pub fn has_mail_from(&self) -> bool {
        self.transaction.contains(TransactionFlags::MAIL_FROM)
    }

    pub fn has_rcpt(&self) -> bool {
        self.transaction.contains(TransactionFlags::RCPT)
    }

    pub fn in_data(&self) -> bool {
        self.transaction.contains(TransactionFlags::DATA)
    }

    /// Forgets the current transaction, keeping only the connection flags.
    pub fn reset(&mut self) {
        self.transaction = TransactionFlags::empty();
        self.data_buffer.clear();
    }

    pub fn set_ehlo(&mut self) {
        self.connection.insert(ConnectionFlags::EHLO);
    }

    pub fn set_starttls(&mut self) {
        self.connection.insert(ConnectionFlags::STARTTLS);
    }

    pub fn begin_auth(&mut self) {
        debug_assert!(!self.has_auth());
        self.transaction.insert(TransactionFlags::AUTH_INCOMPLETE);
    }

    /// Concludes an authentication exchange, successful or otherwise.
    pub fn finish_auth(&mut self, success: bool) {
        self.transaction.remove(TransactionFlags::AUTH_INCOMPLETE);
        self.transaction.set(TransactionFlags::AUTH, success);
    }

    pub fn set_mail_from(&mut self) {
        self.transaction.insert(TransactionFlags::MAIL_FROM);
    }

    pub fn set_rcpt(&mut self) {
        debug_assert!(self.has_mail_from());
        self.transaction.insert(TransactionFlags::RCPT);
    }

    /// Enters the message body, discarding any stale buffered lines.
    pub fn begin_data(&mut self) {
        debug_assert!(self.has_mail_from() && self.has_rcpt());
        self.transaction.insert(TransactionFlags::DATA);
        self.data_buffer.clear();
    }

    pub fn end_data(&mut self) {
        self.transaction.remove(TransactionFlags::DATA);
    }

    /// Appends a body line, returning whether the buffer is now full and
    /// should be flushed.
    pub fn push_data_line(&mut self, line: Vec<u8>) -> bool {
        self.data_buffer.push(line);
        self.data_buffer.len() >= DATA_CHUNK_LINES
    }

    /// Takes the buffered body lines, if there are any.
    pub fn take_data_chunk(&mut self) -> Option<Vec<Vec<u8>>> {
        if self.data_buffer.is_empty() {
            None
        } else {
            Some(std::mem::take(&mut self.data_buffer))
        }
    }
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn reset_keeps_connection_flags() {
        let mut session = Session::new();
        session.set_ehlo();
        session.set_starttls();
        session.begin_auth();
        session.finish_auth(true);
        session.set_mail_from();
        session.set_rcpt();
        session.begin_data();
        assert!(!session.push_data_line(b"Hello".to_vec()));

        session.reset();
        assert_eq!(TransactionFlags::empty(), session.transaction());
        assert_eq!(
            ConnectionFlags::EHLO | ConnectionFlags::STARTTLS,
            session.connection()
        );
        assert_eq!(None, session.take_data_chunk());
    }

    #[test]
    fn auth_flags_are_exclusive() {
        let mut session = Session::new();
        session.begin_auth();
        assert!(session.auth_incomplete());
        assert!(!session.has_auth());

        session.finish_auth(false);
        assert!(!session.auth_incomplete());
        assert!(!session.has_auth());

        session.begin_auth();
        session.finish_auth(true);
        assert!(!session.auth_incomplete());
        assert!(session.has_auth());
    }

    #[test]
    fn data_buffer_fills_at_chunk_size() {
        let mut session = Session::new();
        session.set_mail_from();
        session.set_rcpt();
        session.begin_data();

        for i in 1..DATA_CHUNK_LINES {
            assert!(!session.push_data_line(i.to_string().into_bytes()));
        }
        assert!(session.push_data_line(b"last".to_vec()));

        let chunk = session.take_data_chunk().unwrap();
        assert_eq!(DATA_CHUNK_LINES, chunk.len());
        assert_eq!(b"1", &chunk[0][..]);
        assert_eq!(b"last", &chunk[DATA_CHUNK_LINES - 1][..]);
        assert_eq!(None, session.take_data_chunk());
    }
}

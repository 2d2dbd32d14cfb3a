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

//! Postern is an embeddable SMTP server protocol engine.
//!
//! The heart of the crate is [`smtp::engine::Engine`], which turns a raw byte
//! stream into validated SMTP commands, tracks the ordering rules of an SMTP
//! transaction, and writes the coded responses. Every decision with external
//! consequences (accepting a sender, a recipient, a message, credentials) is
//! delegated to a [`smtp::policy::Policy`] supplied by the application. The
//! decisions that may take a while are expressed as
//! [`smtp::deferred::Deferred`] values, which the engine waits on without
//! blocking the connection's task or anyone else's.
//!
//! [`smtp::connection::serve`] drives an engine over a tokio stream, including
//! the STARTTLS upgrade.

#[cfg(test)]
macro_rules! assert_matches {
    ($expected:pat, $actual:expr) => {
        match $actual {
            $expected => (),
            unexpected => panic!(
                "Expected {} matches {}, got {:?}",
                stringify!($expected),
                stringify!($actual),
                unexpected
            ),
        }
    };
}

pub mod smtp;
pub mod support;

#[cfg(test)]
mod test_data;

#[cfg(test)]
static INIT_TEST_LOG: std::sync::Once = std::sync::Once::new();

#[cfg(test)]
fn init_test_log() {
    INIT_TEST_LOG.call_once(|| {
        let _ = support::logging::init_console(log::LevelFilter::Debug);
    })
}

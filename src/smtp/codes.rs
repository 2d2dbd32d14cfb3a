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

//! Reply codes from RFC 5321 and RFC 4954.
//!
//! The module is designed to be wildcard-imported, and defines a submodule
//! with a short name for accessing the enum values in a consistent way.

#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash)]
#[repr(u16)]
pub enum PrimaryCode {
    // In the order RFC 5321 defines them
    ServiceReady = 220,
    ServiceClosing = 221,
    Ok = 250,
    StartMailInput = 354,
    ServiceNotAvailable = 421,
    CommandSyntaxError = 500,
    BadSequenceOfCommands = 503,
    CommandParameterNotImplemented = 504,
    ActionNotTakenPermanent = 550,
    // RFC 4954
    AuthenticationSucceeded = 235,
    ServerChallenge = 334,
    AuthenticationCredentialsInvalid = 535,
}

pub mod pc {
    pub use super::PrimaryCode::*;
}

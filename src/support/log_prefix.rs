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

use std::fmt;
use std::mem;
use std::sync::{Arc, Mutex};

/// Tracks text that should be included in at the start of every log statement
/// about a connection.
///
/// Clones of a `LogPrefix` share the same underlying data, so the transport
/// and the engine see the same HELO name and user once they are known.
#[derive(Clone)]
pub struct LogPrefix {
    inner: Arc<Mutex<Inner>>,
}

#[derive(Clone)]
struct Inner {
    origin: String,
    user: Option<String>,
    helo: Option<String>,
    tls: bool,
}

impl LogPrefix {
    /// `origin` identifies the connection, usually the protocol and the peer
    /// address, e.g. `smtp:192.0.2.1:4567`.
    pub fn new(origin: String) -> Self {
        Self {
            inner: Arc::new(Mutex::new(Inner {
                origin,
                user: None,
                helo: None,
                tls: false,
            })),
        }
    }

    pub fn set_user(&self, user: String) {
        self.inner.lock().unwrap().user = Some(sanitise(user));
    }

    pub fn set_helo(&self, helo: String) {
        self.inner.lock().unwrap().helo = Some(sanitise(helo));
    }

    pub fn set_tls(&self) {
        self.inner.lock().unwrap().tls = true;
    }
}

impl fmt::Display for LogPrefix {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        let inner = self.inner.lock().unwrap();
        write!(f, "{}", inner.origin)?;
        if inner.user.is_some() || inner.helo.is_some() || inner.tls {
            write!(f, "[")?;
            let mut first = true;
            if let Some(ref user) = inner.user {
                write!(f, "{user}")?;
                first = false;
            }

            if let Some(ref helo) = inner.helo {
                if !mem::take(&mut first) {
                    write!(f, " ")?;
                }
                write!(f, "helo={helo}")?;
            }

            if inner.tls {
                if !mem::take(&mut first) {
                    write!(f, " ")?;
                }
                write!(f, "tls")?;
            }
            write!(f, "]")?;
        }

        Ok(())
    }
}

// Everything here comes from the client, so keep it from forging log lines
// or flooding them.
fn sanitise(mut s: String) -> String {
    s.retain(|c| !c.is_control());
    if let Some((truncate_len, _)) = s.char_indices().nth(64) {
        s.truncate(truncate_len);
    }

    s
}

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

use std::fs;
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

use super::error::Error;
use crate::smtp::engine::EngineConfig;

/// The configuration for the Postern server.
///
/// This is stored in a file named `postern.toml` under the Postern root,
/// which is typically `/usr/local/etc/postern` or `/etc/postern`.
#[derive(Clone, Debug, Default, Deserialize, Serialize)]
pub struct SystemConfig {
    /// The name to report in the first line of the EHLO response.
    ///
    /// If empty, a generic name is used.
    #[serde(default)]
    pub host_name: String,

    /// The text of the `220` greeting.
    ///
    /// If empty, a generic greeting is used.
    #[serde(default)]
    pub greeting: String,

    /// Where to accept connections.
    #[serde(default)]
    pub listen: ListenConfig,

    /// Configuration for TLS. Required if STARTTLS is enabled.
    #[serde(default)]
    pub tls: Option<TlsConfig>,

    /// Protocol options for each connection.
    #[serde(default)]
    pub smtp: EngineConfig,
}

#[derive(Clone, Debug, Deserialize, Serialize, PartialEq, Eq)]
#[serde(default)]
pub struct ListenConfig {
    /// The address to bind. Overridden by the `HOST` environment variable.
    pub host: String,
    /// The port to bind. Overridden by the `PORT` environment variable.
    pub port: u16,
}

impl Default for ListenConfig {
    fn default() -> Self {
        Self {
            host: "127.0.0.1".to_owned(),
            port: 1025,
        }
    }
}

#[derive(Clone, Debug, Deserialize, Serialize, PartialEq, Eq)]
pub struct TlsConfig {
    /// The path to the TLS private key, which must be in PEM format.
    ///
    /// Relative paths are relative to the Postern root.
    pub private_key: PathBuf,
    /// The path to the TLS certificate chain, which must be in PEM format.
    pub certificate_chain: PathBuf,
}

impl SystemConfig {
    /// Reads and validates the configuration at `path`.
    pub fn load(path: &Path) -> Result<Self, Error> {
        let text = fs::read_to_string(path)?;
        let config: Self = toml::from_str(&text)?;
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<(), Error> {
        if self.smtp.starttls && self.tls.is_none() {
            return Err(Error::Config(
                "smtp.starttls is enabled, but there is no [tls] section"
                    .to_owned(),
            ));
        }

        if self.listen.host.is_empty() {
            return Err(Error::Config("listen.host is empty".to_owned()));
        }

        Ok(())
    }

    /// Replaces the listen address with `host` and `port` where they are
    /// given. `port` is parsed, since it usually comes from the environment.
    pub fn override_listen(
        &mut self,
        host: Option<String>,
        port: Option<&str>,
    ) -> Result<(), Error> {
        if let Some(host) = host.filter(|h| !h.is_empty()) {
            self.listen.host = host;
        }

        if let Some(port) = port {
            self.listen.port = port.trim().parse().map_err(|_| {
                Error::Config(format!("Invalid port number {port:?}"))
            })?;
        }

        Ok(())
    }

    /// The address and port to bind.
    pub fn listen_address(&self) -> (&str, u16) {
        (&self.listen.host, self.listen.port)
    }
}

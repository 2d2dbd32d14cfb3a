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

//! Setup of the global `log4rs` logger.

use std::path::Path;

use log::LevelFilter;
use log4rs::append::console::{ConsoleAppender, Target};
use log4rs::config::{Appender, Config, Root};
use log4rs::encode::pattern::PatternEncoder;
use log4rs::file::Deserializers;

use super::error::Error;

const CONSOLE_PATTERN: &str = "{d(%H:%M:%S%.3f)} [{l}][{t}] {m}{n}";

/// Sends everything at `level` or above to stderr.
pub fn init_console(level: LevelFilter) -> Result<(), Error> {
    let stderr = ConsoleAppender::builder()
        .target(Target::Stderr)
        .encoder(Box::new(PatternEncoder::new(CONSOLE_PATTERN)))
        .build();

    let config = Config::builder()
        .appender(Appender::builder().build("stderr", Box::new(stderr)))
        .build(Root::builder().appender("stderr").build(level))
        .map_err(|e| Error::Logging(e.to_string()))?;

    log4rs::init_config(config)
        .map(|_| ())
        .map_err(|e| Error::Logging(e.to_string()))
}

/// Configures logging from a `log4rs` TOML file.
pub fn init_file(path: &Path) -> Result<(), Error> {
    log4rs::init_file(path, Deserializers::new())
        .map_err(|e| Error::Logging(e.to_string()))
}

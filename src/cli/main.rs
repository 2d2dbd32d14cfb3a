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

use std::env;
use std::path::{Path, PathBuf};

use log::LevelFilter;
use structopt::StructOpt;

use postern::support::logging;
use postern::support::sysexits::*;
use postern::support::system_config::SystemConfig;

/// Run an SMTP server which accepts all mail and logs what it receives.
///
/// The listen address is taken from the configuration, then the HOST and PORT
/// environment variables, then the command line, with later sources taking
/// precedence.
#[derive(StructOpt)]
#[structopt(max_term_width = 80)]
struct Options {
    /// The directory containing `postern.toml` and optionally
    /// `logging.toml`
    /// [default: /etc/postern or /usr/local/etc/postern]
    #[structopt(long, parse(from_os_str))]
    root: Option<PathBuf>,

    /// Read the configuration from this file instead of `postern.toml` in
    /// the root directory.
    #[structopt(long, parse(from_os_str))]
    config: Option<PathBuf>,

    /// The address to listen on.
    #[structopt(long)]
    host: Option<String>,

    /// The port to listen on.
    #[structopt(long)]
    port: Option<u16>,

    /// Log at debug level. Has no effect if `logging.toml` is used.
    #[structopt(short, long)]
    verbose: bool,
}

pub fn main() {
    // Clap exits with status 1 instead of EX_USAGE if we use the more concise
    // API
    let options = Options::from_clap(&match Options::clap().get_matches_safe()
    {
        Ok(matches) => matches,
        Err(
            e @ clap::Error {
                kind: clap::ErrorKind::HelpDisplayed,
                ..
            },
        )
        | Err(
            e @ clap::Error {
                kind: clap::ErrorKind::VersionDisplayed,
                ..
            },
        ) => {
            println!("{}", e.message);
            return;
        },
        Err(e) => {
            eprintln!("{}", e.message);
            EX_USAGE.exit()
        },
    });

    let (root, config_path) = locate_config(&options);
    let mut system_config = match config_path {
        Some(ref path) => match SystemConfig::load(path) {
            Ok(config) => config,
            Err(e) => {
                eprintln!(
                    "Error in config file at '{}': {}",
                    path.display(),
                    e
                );
                EX_CONFIG.exit()
            },
        },
        None => SystemConfig::default(),
    };

    let env_port = env::var("PORT").ok();
    let cli_port = options.port.map(|p| p.to_string());
    for (host, port) in [
        (env::var("HOST").ok(), env_port.as_deref()),
        (options.host.clone(), cli_port.as_deref()),
    ] {
        if let Err(e) = system_config.override_listen(host, port) {
            eprintln!("{}", e);
            EX_USAGE.exit();
        }
    }

    init_logging(root.as_deref(), options.verbose);
    if config_path.is_none() {
        log::warn!("No postern.toml found; using the default configuration");
    }

    super::serve::serve(system_config, root.unwrap_or_default());
}

/// Determines the root directory and configuration file.
///
/// Returns `None` for the file if nothing was specified and nothing exists at
/// the default locations, in which case the defaults are used.
fn locate_config(options: &Options) -> (Option<PathBuf>, Option<PathBuf>) {
    if let Some(ref config) = options.config {
        let root = options.root.clone().or_else(|| {
            config.parent().map(Path::to_owned)
        });
        return (root, Some(config.clone()));
    }

    if let Some(ref root) = options.root {
        return (Some(root.clone()), Some(root.join("postern.toml")));
    }

    for root in ["/etc/postern", "/usr/local/etc/postern"] {
        let root = PathBuf::from(root);
        let config = root.join("postern.toml");
        if config.is_file() {
            return (Some(root), Some(config));
        }
    }

    (None, None)
}

fn init_logging(root: Option<&Path>, verbose: bool) {
    let log_config_file = root.map(|r| r.join("logging.toml"));
    let result = match log_config_file {
        Some(ref path) if path.is_file() => logging::init_file(path),
        _ => logging::init_console(if verbose {
            LevelFilter::Debug
        } else {
            LevelFilter::Info
        }),
    };

    if let Err(e) = result {
        eprintln!("{}", e);
        EX_CONFIG.exit();
    }
}

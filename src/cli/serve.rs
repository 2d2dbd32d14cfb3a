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

use std::borrow::Cow;
use std::net::SocketAddr;
use std::path::Path;
use std::sync::Arc;

use log::{debug, error, info, warn};
use openssl::ssl::{SslAcceptor, SslFiletype, SslMethod};
use tokio::net::{TcpListener, TcpStream};

use postern::smtp::connection;
use postern::smtp::deferred::Deferred;
use postern::smtp::engine::{Engine, Outbox};
use postern::smtp::policy::{Policy, DEFAULT_DOMAIN, DEFAULT_GREETING};
use postern::support::log_prefix::LogPrefix;
use postern::support::system_config::{SystemConfig, TlsConfig};

// Errors at startup go through the log as well as the exit status, since the
// server is usually run without a terminal
macro_rules! fatal {
    ($ex:ident, $($stuff:tt)*) => {{
        error!($($stuff)*);
        postern::support::sysexits::$ex.exit()
    }}
}

/// Listens for connections until the process is killed.
pub fn serve(system_config: SystemConfig, system_root: impl AsRef<Path>) {
    let ssl_acceptor = system_config
        .tls
        .as_ref()
        .map(|tls| create_ssl_acceptor(tls, system_root.as_ref()));

    let runtime = match tokio::runtime::Builder::new_multi_thread()
        .enable_all()
        .build()
    {
        Ok(rt) => rt,
        Err(e) => fatal!(EX_SOFTWARE, "Failed to start tokio runtime: {}", e),
    };

    runtime.block_on(listen(Arc::new(system_config), ssl_acceptor));
}

async fn listen(
    system_config: Arc<SystemConfig>,
    ssl_acceptor: Option<SslAcceptor>,
) {
    let (host, port) = system_config.listen_address();
    let listener = match TcpListener::bind((host, port)).await {
        Ok(l) => l,
        Err(e) => {
            fatal!(EX_OSERR, "Unable to listen on {}:{}: {}", host, port, e)
        },
    };

    info!("Listening on {}:{}", host, port);

    loop {
        let (sock, peer) = match listener.accept().await {
            Ok(accepted) => accepted,
            Err(e) => {
                warn!("Failed to accept connection: {}", e);
                continue;
            },
        };

        tokio::spawn(handle_connection(
            sock,
            peer,
            Arc::clone(&system_config),
            ssl_acceptor.clone(),
        ));
    }
}

async fn handle_connection(
    sock: TcpStream,
    peer: SocketAddr,
    system_config: Arc<SystemConfig>,
    ssl_acceptor: Option<SslAcceptor>,
) {
    let log_prefix = LogPrefix::new(format!("smtp:{peer}"));
    info!("{} Received connection from {}", log_prefix, peer);

    if let Err(e) = sock.set_nodelay(true) {
        warn!("{} Unable to set TCP_NODELAY: {}", log_prefix, e);
    }

    let policy = LoggingPolicy::new(&system_config, log_prefix.clone());
    let mut engine = Engine::new(
        system_config.smtp.clone(),
        policy,
        Outbox::default(),
        log_prefix.clone(),
    );

    match connection::serve(sock, &mut engine, ssl_acceptor.as_ref()).await {
        Ok(()) => info!("{} Normal client disconnect", log_prefix),
        Err(e) => warn!("{} Abnormal client disconnect: {}", log_prefix, e),
    }
}

fn create_ssl_acceptor(tls: &TlsConfig, system_root: &Path) -> SslAcceptor {
    let mut acceptor =
        match SslAcceptor::mozilla_intermediate_v5(SslMethod::tls_server()) {
            Ok(a) => a,
            Err(e) => fatal!(
                EX_SOFTWARE,
                "Failed to initialise OpenSSL acceptor: {}",
                e
            ),
        };

    let private_key_path = system_root.join(&tls.private_key);
    if let Err(e) =
        acceptor.set_private_key_file(&private_key_path, SslFiletype::PEM)
    {
        fatal!(
            EX_CONFIG,
            "Unable to load TLS private key from '{}': {}",
            private_key_path.display(),
            e
        );
    }

    let certificate_path = system_root.join(&tls.certificate_chain);
    if let Err(e) = acceptor.set_certificate_chain_file(&certificate_path) {
        fatal!(
            EX_CONFIG,
            "Unable to load TLS certificate chain from '{}': {}",
            certificate_path.display(),
            e
        );
    }

    if let Err(e) = acceptor.check_private_key() {
        fatal!(EX_CONFIG, "TLS key seems to be invalid: {}", e);
    }

    acceptor.build()
}

/// Accepts everything within the size limit and logs a summary of each
/// message.
struct LoggingPolicy {
    log_prefix: LogPrefix,
    greeting: String,
    domain: String,
    max_size: u64,

    sender: Option<String>,
    recipients: Vec<String>,
    body_lines: usize,
    body_bytes: u64,
}

impl LoggingPolicy {
    fn new(system_config: &SystemConfig, log_prefix: LogPrefix) -> Self {
        Self {
            log_prefix,
            greeting: non_empty_or(&system_config.greeting, DEFAULT_GREETING),
            domain: non_empty_or(&system_config.host_name, DEFAULT_DOMAIN),
            max_size: system_config.smtp.max_size,
            sender: None,
            recipients: Vec::new(),
            body_lines: 0,
            body_bytes: 0,
        }
    }

    fn forget_transaction(&mut self) {
        self.sender = None;
        self.recipients.clear();
        self.body_lines = 0;
        self.body_bytes = 0;
    }
}

fn non_empty_or(s: &str, default: &str) -> String {
    let s = if s.is_empty() { default } else { s };
    s.to_owned()
}

impl Policy for LoggingPolicy {
    fn server_greeting(&self) -> Cow<'_, str> {
        Cow::Borrowed(self.greeting.as_str())
    }

    fn server_domain(&self) -> Cow<'_, str> {
        Cow::Borrowed(self.domain.as_str())
    }

    fn receive_sender(&mut self, sender: &str) -> bool {
        self.sender = Some(sender.to_owned());
        true
    }

    fn receive_recipient(&mut self, recipient: &str) -> Deferred {
        self.recipients.push(recipient.to_owned());
        true.into()
    }

    fn receive_data_chunk(&mut self, lines: &[Vec<u8>]) {
        self.body_lines += lines.len();
        // Count the CRLF each line arrived with
        self.body_bytes +=
            lines.iter().map(|l| l.len() as u64 + 2).sum::<u64>();
    }

    fn receive_message(&mut self) -> Deferred {
        let accepted = self.body_bytes <= self.max_size;
        info!(
            "{} {} message from {} to {} ({} lines, {} bytes)",
            self.log_prefix,
            if accepted { "Received" } else { "Rejected oversized" },
            self.sender.as_deref().unwrap_or("?"),
            self.recipients.join(", "),
            self.body_lines,
            self.body_bytes,
        );
        self.forget_transaction();
        accepted.into()
    }

    fn receive_reset(&mut self) {
        self.forget_transaction();
    }

    fn connection_ended(&mut self) {
        debug!("{} Session ended", self.log_prefix);
    }
}

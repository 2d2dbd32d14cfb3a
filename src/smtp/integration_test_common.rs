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

use std::io::{self, Read, Write};
use std::mem;
use std::net::TcpStream;
use std::sync::{Arc, Mutex};
use std::thread;
use std::time::{Duration, Instant};

use openssl::ssl::{SslAcceptor, SslConnector, SslMethod, SslVerifyMode};

use super::connection;
use super::deferred::{deferred, Deferred};
use super::engine::{Engine, EngineConfig, Outbox};
use super::policy::Policy;
use crate::support::log_prefix::LogPrefix;
use crate::test_data::{CERTIFICATE, CERTIFICATE_PRIVATE_KEY};

pub fn ssl_acceptor() -> SslAcceptor {
    let mut ssl_acceptor =
        SslAcceptor::mozilla_intermediate_v5(SslMethod::tls_server()).unwrap();
    ssl_acceptor
        .set_private_key(&CERTIFICATE_PRIVATE_KEY)
        .unwrap();
    ssl_acceptor.set_certificate(&CERTIFICATE).unwrap();
    ssl_acceptor.build()
}

/// A record of what the server-side policies saw, shared with the test.
#[derive(Clone, Default)]
pub struct Journal(Arc<Mutex<Vec<String>>>);

impl Journal {
    fn push(&self, entry: String) {
        self.0.lock().unwrap().push(entry);
    }

    pub fn entries(&self) -> Vec<String> {
        self.0.lock().unwrap().clone()
    }

    /// Waits until `entry` has been recorded `count` times.
    pub fn wait_for(&self, entry: &str, count: usize) {
        let deadline = Instant::now() + Duration::from_secs(10);
        while self.entries().iter().filter(|e| *e == entry).count() < count {
            assert!(
                Instant::now() < deadline,
                "Timed out waiting for {entry:?}; have {:?}",
                self.entries()
            );
            thread::sleep(Duration::from_millis(10));
        }
    }
}

pub struct JournalPolicy {
    journal: Journal,
    recipient_delay: Option<Duration>,
}

impl Policy for JournalPolicy {
    fn receive_ehlo_domain(&mut self, domain: &str) -> bool {
        self.journal.push(format!("EHLO {domain}"));
        true
    }

    fn receive_plain_auth(&mut self, user: &str, password: &str) -> bool {
        self.journal.push(format!("AUTH {user}"));
        "zim" == user && "gir" == password
    }

    fn receive_sender(&mut self, sender: &str) -> bool {
        self.journal.push(format!("MAIL {sender}"));
        true
    }

    fn receive_recipient(&mut self, recipient: &str) -> Deferred {
        self.journal.push(format!("RCPT {recipient}"));
        let Some(delay) = self.recipient_delay else {
            return true.into();
        };

        // Decided on another thread entirely, as a directory lookup might be.
        let (resolver, deferred) = deferred();
        thread::spawn(move || {
            thread::sleep(delay);
            resolver.resolve_success();
        });
        deferred
    }

    fn receive_data_chunk(&mut self, lines: &[Vec<u8>]) {
        for line in lines {
            self.journal
                .push(format!("BODY {}", String::from_utf8_lossy(line)));
        }
    }

    fn receive_message(&mut self) -> Deferred {
        self.journal.push("MESSAGE".to_owned());
        true.into()
    }

    fn connection_ended(&mut self) {
        self.journal.push("ENDED".to_owned());
    }
}

/// Starts a server on an ephemeral loopback port in a background thread,
/// returning the port.
pub fn start_server(
    config: EngineConfig,
    journal: Journal,
    recipient_delay: Option<Duration>,
) -> u16 {
    crate::init_test_log();

    let listener = std::net::TcpListener::bind("127.0.0.1:0").unwrap();
    let port = listener.local_addr().unwrap().port();
    listener.set_nonblocking(true).unwrap();

    thread::spawn(move || {
        run_server(listener, config, journal, recipient_delay)
    });
    port
}

// A single-threaded runtime, so that any blocking in one session would stall
// all the others.
#[tokio::main(flavor = "current_thread")]
async fn run_server(
    listener: std::net::TcpListener,
    config: EngineConfig,
    journal: Journal,
    recipient_delay: Option<Duration>,
) {
    let listener = tokio::net::TcpListener::from_std(listener).unwrap();
    let ssl_acceptor = ssl_acceptor();

    loop {
        let (sock, peer) = listener.accept().await.unwrap();
        let log_prefix = LogPrefix::new(format!("smtp:{peer}"));
        let policy = JournalPolicy {
            journal: journal.clone(),
            recipient_delay,
        };
        let mut engine =
            Engine::new(config.clone(), policy, Outbox::default(), log_prefix);
        let ssl_acceptor = ssl_acceptor.clone();

        tokio::spawn(async move {
            let _ =
                connection::serve(sock, &mut engine, Some(&ssl_acceptor)).await;
        });
    }
}

pub trait ReadWrite: Read + Write {}
impl<T: Read + Write + ?Sized> ReadWrite for T {}

pub struct SmtpClient {
    name: &'static str,
    io: Box<dyn ReadWrite>,
}

impl SmtpClient {
    pub fn connect(name: &'static str, port: u16) -> Self {
        let sock = TcpStream::connect(("127.0.0.1", port)).unwrap();
        sock.set_read_timeout(Some(Duration::from_secs(10))).unwrap();
        Self {
            name,
            io: Box::new(sock),
        }
    }

    /// Reads one line, including the line ending, without buffering beyond
    /// it. Returns an empty string at EOF.
    fn read_line(&mut self) -> String {
        let mut line = Vec::new();
        let mut byte = [0u8];
        while !line.ends_with(b"\n") {
            match self.io.read(&mut byte) {
                Ok(0) => break,
                Ok(_) => line.push(byte[0]),
                Err(e) if io::ErrorKind::Interrupted == e.kind() => (),
                Err(e) => panic!("[{}] Read failed: {e}", self.name),
            }
        }

        String::from_utf8(line).unwrap()
    }

    /// Read responses from the server up to and including the final response.
    pub fn read_responses(&mut self) -> Vec<String> {
        let mut ret = Vec::<String>::new();

        loop {
            let line = self.read_line();
            println!("[{}] >> {:?}", self.name, line);

            if line.is_empty() {
                panic!("Unexpected EOF");
            }

            let last = " " == &line[3..4];
            ret.push(line.trim_end().to_owned());

            if last {
                break;
            }
        }

        ret
    }

    /// Asserts that the server has closed the connection.
    pub fn expect_eof(&mut self) {
        let line = self.read_line();
        assert_eq!("", line, "[{}] Expected EOF", self.name);
    }

    /// Writes the given complete line(s) to the server.
    pub fn write_line(&mut self, s: &str) {
        assert!(s.ends_with('\n'));
        for line in s.split_inclusive('\n') {
            println!("[{}] << {:?}", self.name, line);
        }
        self.io.write_all(s.as_bytes()).unwrap();
    }

    /// Send a command which is expected to have one response with the given
    /// prefix.
    pub fn simple_command(&mut self, command: &str, prefix: &str) {
        self.write_line(&format!("{}\r\n", command));
        let responses = self.read_responses();
        assert_eq!(1, responses.len(), "{responses:?}");
        assert!(
            responses[0].starts_with(prefix),
            "Expected {prefix:?}, got {:?}",
            responses[0]
        );
    }

    /// Skip the server greeting, then send the given command and consume the
    /// responses. Assert that the command succeeds.
    pub fn skip_pleasantries(&mut self, cmd: &str) -> Vec<String> {
        let greeting = self.read_responses();
        assert_eq!(vec!["220 Postern SMTP Server"], greeting);
        self.write_line(&format!("{}\r\n", cmd));
        let responses = self.read_responses();
        assert!(responses.last().unwrap().starts_with("250"));
        responses
    }

    /// Performs a TLS handshake on the connection.
    pub fn start_tls(&mut self) {
        let mut connector = SslConnector::builder(SslMethod::tls()).unwrap();
        connector.set_verify(SslVerifyMode::NONE);

        println!("[{}] <> Start TLS handshake", self.name);
        let cxn = mem::replace(&mut self.io, Box::new(io::empty()));
        let cxn = connector
            .build()
            .connect("localhost", cxn)
            .map_err(|_| "SSL handshake failed")
            .unwrap();
        println!("[{}] <> TLS handshake succeeded", self.name);
        self.io = Box::new(cxn);
    }
}

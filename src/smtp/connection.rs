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

//! Drives an [`Engine`] over an asynchronous byte stream.
//!
//! This is where the engine meets real I/O: bytes read from the stream are
//! fed to the engine, whatever the engine queues in its [`Outbox`] is written
//! back, and the STARTTLS upgrade is performed when the engine asks for it.

use std::mem;
use std::pin::Pin;

use log::{debug, info};
use openssl::ssl::{Ssl, SslAcceptor};
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};
use tokio_openssl::SslStream;

use super::engine::{Engine, Outbox};
use super::policy::Policy;
use crate::support::error::Error;

const READ_SIZE: usize = 4096;

/// Any stream a session can run over.
pub trait ServerIo: AsyncRead + AsyncWrite + Unpin + Send {}
impl<T: AsyncRead + AsyncWrite + Unpin + Send + ?Sized> ServerIo for T {}

type BoxedServerIo = Box<dyn ServerIo>;

/// Runs one SMTP session over `io` until the client quits or the connection
/// ends.
///
/// The engine's greeting is sent first, so `engine` should be fresh.
/// `ssl_acceptor` is used for STARTTLS; if it is `None`, the engine should
/// not have STARTTLS enabled.
///
/// Whatever the outcome, `engine.connection_closed()` has been called by the
/// time this returns.
pub async fn serve<P: Policy>(
    io: impl ServerIo + 'static,
    engine: &mut Engine<P, Outbox>,
    ssl_acceptor: Option<&SslAcceptor>,
) -> Result<(), Error> {
    let result = run(Box::new(io), engine, ssl_acceptor).await;
    engine.connection_closed();
    result
}

enum Event {
    Read(usize),
    Resumed,
}

async fn run<P: Policy>(
    mut io: BoxedServerIo,
    engine: &mut Engine<P, Outbox>,
    ssl_acceptor: Option<&SslAcceptor>,
) -> Result<(), Error> {
    let mut buf = [0u8; READ_SIZE];

    engine.start();
    loop {
        let outbox = engine.transport_mut();
        if !outbox.data.is_empty() {
            io.write_all(&outbox.data).await?;
            outbox.data.clear();
            io.flush().await?;
        }

        if outbox.close_requested {
            // The client is done with us; whether it got the FIN is not our
            // problem.
            let _ = io.shutdown().await;
            return Ok(());
        }

        if mem::take(&mut outbox.start_tls_requested) {
            let ssl_acceptor = ssl_acceptor.ok_or(Error::TlsUnavailable)?;
            io = start_tls(io, ssl_acceptor).await?;
            info!("{} TLS handshake succeeded", engine.log_prefix());
        }

        // Reading continues while the engine waits on the policy, so that
        // a closed connection is noticed and pipelined input is queued, but
        // only until the queue is full.
        let event = if engine.is_saturated() {
            debug!(
                "{} Waiting for a decision before reading more",
                engine.log_prefix(),
            );
            engine.resume().await;
            Event::Resumed
        } else {
            tokio::select! {
                nread = io.read(&mut buf) => Event::Read(nread?),
                _ = engine.resume() => Event::Resumed,
            }
        };

        match event {
            Event::Read(0) => {
                debug!("{} EOF from client", engine.log_prefix());
                return Ok(());
            },
            Event::Read(nread) => engine.receive_data(&buf[..nread]),
            Event::Resumed => (),
        }
    }
}

async fn start_tls(
    io: BoxedServerIo,
    ssl_acceptor: &SslAcceptor,
) -> Result<BoxedServerIo, Error> {
    let ssl = Ssl::new(ssl_acceptor.context())?;
    let mut stream = SslStream::new(ssl, io)?;
    Pin::new(&mut stream)
        .accept()
        .await
        .map_err(Error::Handshake)?;
    Ok(Box::new(stream))
}

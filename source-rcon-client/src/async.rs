//! Asynchronous sessions on top of [Tokio](https://tokio.rs/).
//!
//! Mirrors the blocking API: [`dial`] connects and logs in, [`Session::execute`] runs a
//! command and [`Session::close`] ends the session.
//!
//! # Example
//! ```rust,no_run
//! use source_rcon_client::r#async::dial;
//!
//! #[tokio::main]
//! async fn main() {
//!     let session = dial("localhost:27015", "password123")
//!         .await
//!         .unwrap();
//!
//!     match session.execute("status").await {
//!         Ok(output) => println!("{}", output),
//!         Err(err) => eprintln!("Command failed: {}", err),
//!     }
//! }
//! ```

use crate::packet::{self, Packet};
use crate::session::{self, FrameBuffer, LoginStep, LOGIN_ATTEMPTS};
use crate::{Error, Options};
use log::debug;
use std::future::Future;
use std::io;
use std::time::Duration;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::{TcpStream, ToSocketAddrs};
use tokio::sync::{watch, Mutex};
use tokio::time::timeout;

/// Asynchronously connect to an RCON server and log in with `password`.
pub async fn dial<A: ToSocketAddrs>(addr: A, password: &str) -> crate::Result<Session> {
    Session::dial(addr, password).await
}

/// An authenticated RCON connection.
///
/// The whole round trip of [`execute`](Session::execute) runs under the session's lock, so a
/// `Session` can be shared between tasks.
#[derive(Debug)]
pub struct Session {
    inner: Mutex<InnerSession>,
    closed: watch::Sender<bool>,
}

#[derive(Debug)]
struct InnerSession {
    stream: Option<TcpStream>,
    last_request_id: i32,
    last_sent_id: i32,
    buffer: FrameBuffer,
    read_timeout: Duration,
    closed: watch::Receiver<bool>,
}

impl Session {
    pub async fn dial<A: ToSocketAddrs>(addr: A, password: &str) -> crate::Result<Self> {
        Self::dial_with(addr, password, &Options::default()).await
    }

    pub async fn dial_with<A: ToSocketAddrs>(
        addr: A,
        password: &str,
        options: &Options,
    ) -> crate::Result<Self> {
        let stream = match timeout(options.connect_timeout, TcpStream::connect(addr)).await {
            Ok(Ok(stream)) => stream,
            Ok(Err(err)) => return Err(Error::from_dial(err)),
            Err(_) => return Err(Error::DialTimeout),
        };
        debug!("connected to {:?}", stream.peer_addr().ok());

        let (closed, closed_rx) = watch::channel(false);
        let mut inner = InnerSession {
            stream: Some(stream),
            last_request_id: 0,
            last_sent_id: 0,
            buffer: FrameBuffer::new(),
            read_timeout: options.read_timeout,
            closed: closed_rx,
        };

        match inner.login(password).await {
            Ok(id) => {
                debug!("authenticated with request id {}", id);
                inner.last_request_id = id;
                inner.last_sent_id = id;
                Ok(Session {
                    inner: Mutex::new(inner),
                    closed,
                })
            }
            Err(err) => {
                inner.shutdown().await;
                Err(err)
            }
        }
    }

    /// Run `command` on the server and return its output.
    pub async fn execute(&self, command: &str) -> crate::Result<String> {
        if self.is_closed() {
            return Err(Error::SessionClosed);
        }

        self.inner.lock().await.execute(command).await
    }

    /// Close the connection.
    ///
    /// A command in progress is interrupted and fails with [`Error::SessionClosed`]. Closing
    /// twice is a no-op.
    pub async fn close(&self) -> crate::Result<()> {
        if self.closed.send_replace(true) {
            return Ok(());
        }

        self.inner.lock().await.shutdown().await;
        debug!("session closed");
        Ok(())
    }

    pub fn is_closed(&self) -> bool {
        *self.closed.borrow()
    }

    /// Id of the last request the server acknowledged.
    pub async fn last_request_id(&self) -> i32 {
        self.inner.lock().await.last_request_id
    }
}

impl InnerSession {
    async fn login(&mut self, password: &str) -> crate::Result<i32> {
        let request = packet::build_login_request(password)?;
        self.send(&request).await?;

        for attempt in 0..LOGIN_ATTEMPTS {
            self.read_frame().await?;
            let response = self.buffer.decode_login()?;

            if session::login_step(&request, &response, attempt)? == LoginStep::Accepted {
                return Ok(response.request_id());
            }
        }

        Err(Error::UnknownResponse)
    }

    async fn execute(&mut self, command: &str) -> crate::Result<String> {
        let request = packet::build_command_request(self.last_sent_id, command)?;
        self.last_sent_id = request.request_id();
        self.send(&request).await?;

        self.read_frame().await?;
        let response = self.buffer.decode_command()?;
        session::command_step(&request, &response)?;

        self.last_request_id = response.request_id();
        Ok(response.into_payload_text())
    }

    async fn send(&mut self, request: &Packet) -> crate::Result<()> {
        let stream = self.stream.as_mut().ok_or(Error::SessionClosed)?;
        debug!(
            "sending request id={} type={} ({} bytes)",
            request.request_id(),
            request.kind_code(),
            request.raw().len()
        );

        // Write timeouts surface as io errors, as they do for the blocking session
        let write = stream.write_all(request.raw());
        guarded(self.closed.clone(), self.read_timeout, write)
            .await?
            .map_err(Error::Io)
    }

    /// Same policy as the blocking session: queued bytes first, then at most one
    /// continuation read to complete the length prefix.
    async fn read_frame(&mut self) -> crate::Result<()> {
        if !self.buffer.begin() {
            self.read_into().await?;
        }
        if self.buffer.needs_length() {
            self.read_into().await?;
        }

        Ok(())
    }

    async fn read_into(&mut self) -> crate::Result<()> {
        let stream = self.stream.as_mut().ok_or(Error::SessionClosed)?;

        let read = stream.read(self.buffer.spare());
        let len = guarded(self.closed.clone(), self.read_timeout, read)
            .await?
            .map_err(Error::from_read)?;
        if len == 0 {
            return Err(Error::ConnectionClosed);
        }

        debug!("read {} bytes", len);
        self.buffer.advance(len);
        Ok(())
    }

    async fn shutdown(&mut self) {
        if let Some(mut stream) = self.stream.take() {
            if let Err(err) = stream.shutdown().await {
                debug!("shutdown: {}", err);
            }
        }
    }
}

/// Run `io` with a deadline of `limit`, abandoning it as soon as the session is closed.
///
/// Hitting the deadline yields an [`io::ErrorKind::TimedOut`] error.
async fn guarded<T>(
    closed: watch::Receiver<bool>,
    limit: Duration,
    io: impl Future<Output = io::Result<T>>,
) -> crate::Result<io::Result<T>> {
    tokio::select! {
        done = timeout(limit, io) => {
            Ok(done.unwrap_or_else(|_| Err(io::Error::from(io::ErrorKind::TimedOut))))
        }
        _ = wait_closed(closed) => Err(Error::SessionClosed),
    }
}

async fn wait_closed(mut closed: watch::Receiver<bool>) {
    loop {
        let is_closed = *closed.borrow_and_update();
        if is_closed || closed.changed().await.is_err() {
            return;
        }
    }
}

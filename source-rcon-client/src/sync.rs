use crate::packet::{self, Packet};
use crate::session::{self, FrameBuffer, LoginStep, Options, LOGIN_ATTEMPTS};
use crate::Error;
use log::debug;
use std::io::{self, Read, Write};
use std::net::{Shutdown, TcpStream, ToSocketAddrs};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Mutex, MutexGuard, PoisonError};
use std::time::Duration;

/// Connect to an RCON server and log in with `password`.
///
/// Uses the default [`Options`]: a 10 second connect timeout and a 60 second read timeout.
pub fn dial<A: ToSocketAddrs>(addr: A, password: &str) -> crate::Result<Session> {
    Session::dial(addr, password)
}

/// An authenticated RCON connection.
///
/// Every [`execute`](Session::execute) holds the session for its whole write-then-read round
/// trip, so a `Session` can be shared between threads without responses being handed to the
/// wrong caller.
#[derive(Debug)]
pub struct Session {
    inner: Mutex<InnerSession>,
    control: TcpStream,
    closed: AtomicBool,
}

#[derive(Debug)]
struct InnerSession {
    stream: Option<TcpStream>,
    last_request_id: i32,
    last_sent_id: i32,
    buffer: FrameBuffer,
}

impl Session {
    pub fn dial<A: ToSocketAddrs>(addr: A, password: &str) -> crate::Result<Self> {
        Self::dial_with(addr, password, &Options::default())
    }

    pub fn dial_with<A: ToSocketAddrs>(addr: A, password: &str, options: &Options) -> crate::Result<Self> {
        let stream = connect(addr, options.connect_timeout)?;
        stream.set_read_timeout(Some(options.read_timeout))?;
        stream.set_write_timeout(Some(options.read_timeout))?;
        let control = stream.try_clone()?;

        let mut inner = InnerSession {
            stream: Some(stream),
            last_request_id: 0,
            last_sent_id: 0,
            buffer: FrameBuffer::new(),
        };

        match inner.login(password) {
            Ok(id) => {
                debug!("authenticated with request id {}", id);
                inner.last_request_id = id;
                inner.last_sent_id = id;
                Ok(Session {
                    inner: Mutex::new(inner),
                    control,
                    closed: AtomicBool::new(false),
                })
            }
            Err(err) => {
                if let Err(shutdown_err) = control.shutdown(Shutdown::Both) {
                    debug!("shutdown after failed login: {}", shutdown_err);
                }
                Err(err)
            }
        }
    }

    /// Run `command` on the server and return its output.
    pub fn execute(&self, command: &str) -> crate::Result<String> {
        if self.is_closed() {
            return Err(Error::SessionClosed);
        }

        let result = self.lock().execute(command);
        match result {
            // The failure was caused by close() interrupting the read
            Err(_) if self.is_closed() => Err(Error::SessionClosed),
            result => result,
        }
    }

    /// Close the connection.
    ///
    /// Does not wait for a command in progress: its read is interrupted and that call fails
    /// with [`Error::SessionClosed`]. Closing twice is a no-op.
    pub fn close(&self) -> crate::Result<()> {
        if self.closed.swap(true, Ordering::SeqCst) {
            return Ok(());
        }

        let shutdown = self.control.shutdown(Shutdown::Both);
        self.finish_close(shutdown)
    }

    /// Drop the stream whatever the outcome of the shutdown.
    fn finish_close(&self, shutdown: io::Result<()>) -> crate::Result<()> {
        self.lock().stream = None;
        debug!("session closed");

        match shutdown {
            Ok(()) => Ok(()),
            Err(err) if err.kind() == io::ErrorKind::NotConnected => Ok(()),
            Err(err) => Err(err.into()),
        }
    }

    pub fn is_closed(&self) -> bool {
        self.closed.load(Ordering::SeqCst)
    }

    /// Id of the last request the server acknowledged.
    pub fn last_request_id(&self) -> i32 {
        self.lock().last_request_id
    }

    fn lock(&self) -> MutexGuard<'_, InnerSession> {
        self.inner.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

impl InnerSession {
    fn login(&mut self, password: &str) -> crate::Result<i32> {
        let request = packet::build_login_request(password)?;
        self.send(&request)?;

        for attempt in 0..LOGIN_ATTEMPTS {
            self.read_frame()?;
            let response = self.buffer.decode_login()?;

            if session::login_step(&request, &response, attempt)? == LoginStep::Accepted {
                return Ok(response.request_id());
            }
        }

        Err(Error::UnknownResponse)
    }

    fn execute(&mut self, command: &str) -> crate::Result<String> {
        // Ids follow the last request sent, so a late reply to an abandoned request never
        // matches a newer one
        let request = packet::build_command_request(self.last_sent_id, command)?;
        self.last_sent_id = request.request_id();
        self.send(&request)?;

        self.read_frame()?;
        let response = self.buffer.decode_command()?;
        session::command_step(&request, &response)?;

        self.last_request_id = response.request_id();
        Ok(response.into_payload_text())
    }

    fn send(&mut self, request: &Packet) -> crate::Result<()> {
        let stream = self.stream.as_mut().ok_or(Error::SessionClosed)?;
        debug!(
            "sending request id={} type={} ({} bytes)",
            request.request_id(),
            request.kind_code(),
            request.raw().len()
        );
        stream.write_all(request.raw())?;
        Ok(())
    }

    /// Fill the buffer with at least the start of the next frame.
    ///
    /// Queued bytes are used without touching the socket. A read that stops short of the
    /// length prefix gets exactly one continuation read; frames split over more reads than
    /// that are not reassembled.
    fn read_frame(&mut self) -> crate::Result<()> {
        let stream = self.stream.as_mut().ok_or(Error::SessionClosed)?;

        if !self.buffer.begin() {
            read_into(stream, &mut self.buffer)?;
        }
        if self.buffer.needs_length() {
            read_into(stream, &mut self.buffer)?;
        }

        Ok(())
    }
}

fn read_into(stream: &mut TcpStream, buffer: &mut FrameBuffer) -> crate::Result<()> {
    let len = stream.read(buffer.spare()).map_err(Error::from_read)?;
    if len == 0 {
        return Err(Error::ConnectionClosed);
    }

    debug!("read {} bytes", len);
    buffer.advance(len);
    Ok(())
}

fn connect<A: ToSocketAddrs>(addr: A, timeout: Duration) -> crate::Result<TcpStream> {
    let mut last_err = None;

    for addr in addr.to_socket_addrs()? {
        match TcpStream::connect_timeout(&addr, timeout) {
            Ok(stream) => {
                debug!("connected to {}", addr);
                return Ok(stream);
            }
            Err(err) => {
                debug!("connecting to {} failed: {}", addr, err);
                last_err = Some(err);
            }
        }
    }

    Err(match last_err {
        Some(err) => Error::from_dial(err),
        None => Error::Io(io::Error::new(
            io::ErrorKind::InvalidInput,
            "address did not resolve to any socket address",
        )),
    })
}

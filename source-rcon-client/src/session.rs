//! Transport-independent parts of a session: the read buffer with its overflow queue, and the
//! rules deciding what a decoded response means for the request that was sent.

use crate::packet::{self, Class, Packet, PacketError, LENGTH_PREFIX, SIZE_MAX};
use crate::Error;
use log::{debug, warn};
use std::fmt::{Debug, Formatter};
use std::time::Duration;

pub const DEFAULT_CONNECT_TIMEOUT: Duration = Duration::from_secs(10);
pub const DEFAULT_READ_TIMEOUT: Duration = Duration::from_secs(60);

/// Some servers send a stray frame before the real login response, so the
/// login exchange may read one extra frame.
pub(crate) const LOGIN_ATTEMPTS: usize = 2;

/// Connection settings used when dialing.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Options {
    pub connect_timeout: Duration,
    pub read_timeout: Duration,
}

impl Default for Options {
    fn default() -> Self {
        Options {
            connect_timeout: DEFAULT_CONNECT_TIMEOUT,
            read_timeout: DEFAULT_READ_TIMEOUT,
        }
    }
}

impl Options {
    pub fn connect_timeout(mut self, timeout: Duration) -> Self {
        self.connect_timeout = timeout;
        self
    }

    pub fn read_timeout(mut self, timeout: Duration) -> Self {
        self.read_timeout = timeout;
        self
    }
}

/// Scratch space for one frame, plus any bytes that arrived after it.
pub(crate) struct FrameBuffer {
    scratch: Box<[u8]>,
    filled: usize,
    pending: Option<Vec<u8>>,
}

impl FrameBuffer {
    pub fn new() -> Self {
        FrameBuffer {
            scratch: vec![0; SIZE_MAX].into_boxed_slice(),
            filled: 0,
            pending: None,
        }
    }

    /// Start collecting a new frame. Returns `true` if bytes queued by an
    /// earlier decode were loaded, in which case no network read is needed.
    pub fn begin(&mut self) -> bool {
        self.filled = 0;

        match self.pending.take() {
            Some(pending) if !pending.is_empty() => {
                let len = pending.len().min(self.scratch.len());
                self.scratch[..len].copy_from_slice(&pending[..len]);
                self.filled = len;
                debug!("reusing {} queued bytes", len);
                true
            }
            _ => false,
        }
    }

    /// Whether the length prefix has not fully arrived yet.
    pub fn needs_length(&self) -> bool {
        self.filled < LENGTH_PREFIX
    }

    pub fn spare(&mut self) -> &mut [u8] {
        &mut self.scratch[self.filled..]
    }

    pub fn advance(&mut self, len: usize) {
        self.filled = (self.filled + len).min(self.scratch.len());
    }

    #[cfg(test)]
    pub fn pending(&self) -> Option<&[u8]> {
        self.pending.as_deref()
    }

    pub fn decode_login(&mut self) -> crate::Result<Packet> {
        self.decode(packet::decode_login_response)
    }

    pub fn decode_command(&mut self) -> crate::Result<Packet> {
        self.decode(packet::decode_command_response)
    }

    fn decode(
        &mut self,
        decode: fn(&[u8]) -> Result<(Packet, &[u8]), PacketError>,
    ) -> crate::Result<Packet> {
        let (packet, residual) = decode(&self.scratch[..self.filled])?;
        let pending = (!residual.is_empty()).then(|| residual.to_vec());

        debug!(
            "decoded frame id={} type={} ({} bytes queued)",
            packet.request_id(),
            packet.kind_code(),
            residual.len()
        );

        self.pending = pending;
        Ok(packet)
    }
}

impl Debug for FrameBuffer {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("FrameBuffer")
            .field("filled", &self.filled)
            .field("pending", &self.pending.as_ref().map(Vec::len))
            .finish()
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum LoginStep {
    Accepted,
    Retry,
}

/// Interpret a response read during the login exchange.
pub(crate) fn login_step(request: &Packet, response: &Packet, attempt: usize) -> crate::Result<LoginStep> {
    let can_retry = attempt + 1 < LOGIN_ATTEMPTS;

    match packet::classify(response).class {
        Class::Login if response.request_id() == request.request_id() => Ok(LoginStep::Accepted),
        Class::Login => Err(Error::IdMismatch {
            expected: request.request_id(),
            actual: response.request_id(),
        }),
        Class::Invalid => Err(Error::AuthenticationFailed),
        class @ (Class::Unknown | Class::Command) if can_retry => {
            warn!("ignoring {} response to login request, waiting for another", class);
            Ok(LoginStep::Retry)
        }
        Class::Unknown => Err(Error::UnknownResponse),
        Class::Command => Err(Error::ResponseKindMismatch {
            expected: Class::Login,
            actual: Class::Command,
        }),
    }
}

/// Interpret the response to a command request.
pub(crate) fn command_step(request: &Packet, response: &Packet) -> crate::Result<()> {
    match packet::classify(response).class {
        Class::Command if response.request_id() == request.request_id() => Ok(()),
        Class::Command => Err(Error::IdMismatch {
            expected: request.request_id(),
            actual: response.request_id(),
        }),
        Class::Unknown => Err(Error::UnknownResponse),
        actual => Err(Error::ResponseKindMismatch {
            expected: Class::Command,
            actual,
        }),
    }
}

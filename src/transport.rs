//! TCP transport (spec.md §4.8).
//!
//! Owns the socket and the retry/reconnect policy; knows nothing about
//! frame or VDS content. [`crate::frame`] hands this module bytes to
//! send and gets bytes back.

use std::io::{Read, Write};
use std::net::TcpStream;
use std::time::Duration;

use log::{debug, warn};

use crate::error::TransportError;

/// Lifecycle state of a [`Transport`] (spec.md §3).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub enum ConnectionState {
    Disconnected,
    Connecting,
    Connected,
    Disconnecting,
}

const RETRY_GAP: Duration = Duration::from_millis(500);

/// A connected (or reconnectable) TCP session to one M-Bus gateway
/// (spec.md §4.8).
pub struct Transport {
    host: String,
    port: u16,
    stream: Option<TcpStream>,
    state: ConnectionState,
    read_timeout: Duration,
    max_retries: u32,
}

impl Transport {
    pub fn new(host: impl Into<String>, port: u16, read_timeout: Duration, max_retries: u32) -> Self {
        Transport {
            host: host.into(),
            port,
            stream: None,
            state: ConnectionState::Disconnected,
            read_timeout,
            max_retries,
        }
    }

    pub fn state(&self) -> ConnectionState {
        self.state
    }

    pub fn read_timeout(&self) -> Duration {
        self.read_timeout
    }

    /// Change the socket read timeout of an already-open connection
    /// (spec.md §4.9: the scan temporarily lowers it to `scan_timeout`).
    pub fn set_read_timeout(&mut self, timeout: Duration) -> Result<(), TransportError> {
        self.read_timeout = timeout;
        if let Some(stream) = &self.stream {
            stream.set_read_timeout(Some(timeout))?;
        }
        Ok(())
    }

    /// Connect, retrying up to `max_retries` times with a 500ms gap
    /// between attempts (spec.md §4.8).
    pub fn connect(&mut self) -> Result<(), TransportError> {
        self.state = ConnectionState::Connecting;
        let mut attempts = 0;
        loop {
            attempts += 1;
            match TcpStream::connect((self.host.as_str(), self.port)) {
                Ok(stream) => {
                    stream.set_read_timeout(Some(self.read_timeout))?;
                    stream.set_nodelay(true)?;
                    self.stream = Some(stream);
                    self.state = ConnectionState::Connected;
                    debug!("connected to {}:{} after {} attempt(s)", self.host, self.port, attempts);
                    return Ok(());
                }
                Err(e) => {
                    warn!("connect attempt {} to {}:{} failed: {}", attempts, self.host, self.port, e);
                    if attempts >= self.max_retries {
                        self.state = ConnectionState::Disconnected;
                        return Err(TransportError::ConnectFailed {
                            host: self.host.clone(),
                            port: self.port,
                            attempts,
                        });
                    }
                    std::thread::sleep(RETRY_GAP);
                }
            }
        }
    }

    /// Probe liveness with a zero-byte send (spec.md §4.8).
    pub fn is_connected(&mut self) -> bool {
        match &self.stream {
            None => false,
            Some(stream) => {
                let mut s = stream;
                matches!(s.write(&[]), Ok(_))
            }
        }
    }

    /// Send `bytes`, retrying the write up to `max_retries` times on
    /// failure (spec.md §4.8). Does not reconnect; a dropped connection
    /// surfaces as repeated write failures and ultimately `SendFailed`,
    /// matching `examples/original_source/pymbus/MbusTcpMaster.py`'s
    /// `send()`, which just retries `self._send(request)`.
    pub fn send(&mut self, bytes: &[u8]) -> Result<(), TransportError> {
        let mut attempts = 0;
        loop {
            attempts += 1;
            let result = match &mut self.stream {
                Some(stream) => stream.write_all(bytes).map_err(TransportError::from),
                None => Err(TransportError::ClosedByPeer),
            };
            match result {
                Ok(()) => return Ok(()),
                Err(e) => {
                    warn!("send attempt {} failed: {}", attempts, e);
                    if attempts >= self.max_retries {
                        return Err(TransportError::SendFailed { attempts });
                    }
                }
            }
        }
    }

    /// Read the first `expected_len` bytes of a new response, or a
    /// single-character ack (`0xE5`) if that's what the first byte
    /// turns out to be (spec.md §4.8: a short response never carries a
    /// length prefix to satisfy, so this returns just that one byte
    /// instead of blocking for more).
    pub fn recv_response_start(&mut self, expected_len: usize) -> Result<Vec<u8>, TransportError> {
        let stream = self.stream.as_mut().ok_or(TransportError::ClosedByPeer)?;

        let mut first = [0u8; 1];
        read_exact_or_eof(stream, &mut first)?;
        if first[0] == crate::frame::SINGLE_CHAR_ACK {
            return Ok(vec![first[0]]);
        }

        let mut buf = Vec::with_capacity(expected_len.max(1));
        buf.push(first[0]);
        while buf.len() < expected_len {
            let mut chunk = vec![0u8; expected_len - buf.len()];
            let n = stream.read(&mut chunk).map_err(TransportError::from)?;
            if n == 0 {
                return Err(TransportError::ClosedByPeer);
            }
            buf.extend_from_slice(&chunk[..n]);
        }
        Ok(buf)
    }

    /// Read exactly `len` more bytes, continuing a response already
    /// begun with [`Transport::recv_response_start`].
    pub fn recv_exact(&mut self, len: usize) -> Result<Vec<u8>, TransportError> {
        let stream = self.stream.as_mut().ok_or(TransportError::ClosedByPeer)?;
        let mut buf = vec![0u8; len];
        let mut filled = 0;
        while filled < len {
            let n = stream.read(&mut buf[filled..]).map_err(TransportError::from)?;
            if n == 0 {
                return Err(TransportError::ClosedByPeer);
            }
            filled += n;
        }
        Ok(buf)
    }

    pub fn close(&mut self) {
        self.state = ConnectionState::Disconnecting;
        self.stream = None;
        self.state = ConnectionState::Disconnected;
    }
}

fn read_exact_or_eof(stream: &mut TcpStream, buf: &mut [u8]) -> Result<(), TransportError> {
    let n = stream.read(buf)?;
    if n == 0 {
        return Err(TransportError::ClosedByPeer);
    }
    if n < buf.len() {
        stream.read_exact(&mut buf[n..])?;
    }
    Ok(())
}

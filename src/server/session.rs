//! One connected client.
//!
//! Sessions sit in non-blocking mode so the tick loop can poll them without
//! stalling. Reads and writes temporarily flip the socket to blocking for
//! exactly one framed message, then flip back; the framing layer retries
//! short reads and writes internally.

use std::io::Write;
use std::net::{SocketAddr, TcpStream};

use log::warn;

use crate::protocol::codec::encode_frame;
use crate::protocol::{read_frame, FrameHeader, MessageKind, ProtocolError};

/// A connected client and its per-session state.
pub struct Session {
    /// Monotonic id assigned at accept time.
    pub id: u64,
    pub addr: SocketAddr,
    /// Colony the client asked to follow, if any.
    pub selected_colony: Option<u32>,
    /// Cleared when the peer disconnects or misbehaves.
    pub alive: bool,
    stream: TcpStream,
}

impl Session {
    /// Wrap an accepted connection: non-blocking, Nagle off.
    pub fn new(id: u64, stream: TcpStream, addr: SocketAddr) -> std::io::Result<Self> {
        stream.set_nonblocking(true)?;
        stream.set_nodelay(true)?;
        Ok(Session {
            id,
            addr,
            selected_colony: None,
            alive: true,
            stream,
        })
    }

    /// Write one pre-encoded frame. Returns false when the session died.
    pub fn send_bytes(&mut self, frame: &[u8]) -> bool {
        if !self.alive {
            return false;
        }
        // Blocking mode for the write so partial sends finish instead of
        // surfacing as WouldBlock mid-frame.
        if self.stream.set_nonblocking(false).is_err() {
            self.alive = false;
            return false;
        }
        let sent = self
            .stream
            .write_all(frame)
            .and_then(|()| self.stream.flush());
        if self.stream.set_nonblocking(true).is_err() {
            self.alive = false;
        }
        if let Err(err) = sent {
            warn!("client {} send failed: {err}", self.id);
            self.alive = false;
        }
        self.alive
    }

    /// Encode and write one frame. Returns false when the session died.
    pub fn send_frame(&mut self, kind: MessageKind, payload: &[u8], sequence: u32) -> bool {
        match encode_frame(kind, payload, sequence) {
            Ok(frame) => self.send_bytes(&frame),
            Err(err) => {
                // An encode failure is not the client's fault; skip the
                // frame but keep the session.
                warn!("client {}: failed to encode frame: {err}", self.id);
                self.alive
            }
        }
    }

    /// Poll for one inbound frame without blocking the tick loop.
    ///
    /// `Ok(None)` means no bytes were waiting. A clean disconnect clears
    /// `alive` and also returns `Ok(None)`; protocol errors come back as
    /// `Err` and the caller is expected to drop the session.
    pub fn poll_frame(&mut self) -> Result<Option<(FrameHeader, Vec<u8>)>, ProtocolError> {
        let mut probe = [0u8; 1];
        match self.stream.peek(&mut probe) {
            Ok(0) => {
                // Peer closed the connection.
                self.alive = false;
                return Ok(None);
            }
            Ok(_) => {}
            Err(err) if err.kind() == std::io::ErrorKind::WouldBlock => return Ok(None),
            Err(err) => {
                self.alive = false;
                return Err(err.into());
            }
        }

        // Bytes are waiting: block for exactly one framed message.
        self.stream.set_nonblocking(false)?;
        let result = read_frame(&mut self.stream);
        if self.stream.set_nonblocking(true).is_err() {
            self.alive = false;
        }
        match result {
            Ok(frame) => Ok(Some(frame)),
            Err(err) => {
                self.alive = false;
                Err(err)
            }
        }
    }
}

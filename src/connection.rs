//! Per-client connection state, per `spec.md` §3.
//!
//! One `Connection` exists per accepted TCP client: it holds the inbound
//! line-framed read buffer, the outbound drain-on-writable write buffer,
//! the SMTP parser state, the in-flight envelope, and the open message
//! file (if any). Destroying a `Connection` (QUIT, peer close, fatal I/O
//! error, or a terminal parser transition) discards any open message file
//! via `Drop`.

use crate::smtp::parser::ParserState;
use std::collections::VecDeque;
use std::fs::File;
use std::net::SocketAddr;
use std::os::fd::RawFd;
use std::time::{SystemTime, UNIX_EPOCH};

/// Minimum buffer capacity per `spec.md` §3 ("≥2 KiB").
pub const MIN_BUFFER_CAPACITY: usize = 2048;

/// The in-flight MAIL FROM / RCPT TO transaction, per `spec.md` §3.
#[derive(Debug, Default, Clone)]
pub struct Envelope {
    pub sender: Option<String>,
    pub recipients: Vec<String>,
}

impl Envelope {
    pub fn is_empty(&self) -> bool {
        self.sender.is_none() && self.recipients.is_empty()
    }

    pub fn clear(&mut self) {
        self.sender = None;
        self.recipients.clear();
    }
}

/// An open in-flight message file, with the server-generated filename and
/// the envelope snapshot it was opened for.
pub struct OpenMessage {
    pub file: File,
    pub filename: String,
}

/// Per-client connection state.
pub struct Connection {
    pub fd: RawFd,
    pub peer: SocketAddr,
    pub inbound: Vec<u8>,
    pub outbound: VecDeque<u8>,
    pub state: ParserState,
    /// Set once the greeting has been sent, distinguishing HELO-mode from
    /// EHLO-mode for the lifetime of the connection (§4.3).
    pub ehlo_mode: bool,
    /// Per-connection TRFM toggle (§4.3); EHLO-mode only.
    pub transform_flag: bool,
    pub envelope: Envelope,
    pub message: Option<OpenMessage>,
    /// Per-connection counter feeding the message filename scheme (§4.3).
    data_counter: u64,
}

impl Connection {
    pub fn new(fd: RawFd, peer: SocketAddr) -> Self {
        Connection {
            fd,
            peer,
            inbound: Vec::with_capacity(MIN_BUFFER_CAPACITY),
            outbound: VecDeque::with_capacity(MIN_BUFFER_CAPACITY),
            state: ParserState::AwaitGreeting,
            ehlo_mode: false,
            transform_flag: false,
            envelope: Envelope::default(),
            message: None,
            data_counter: 0,
        }
    }

    /// Queues bytes on the outbound buffer for the next writable callback.
    pub fn queue_write(&mut self, bytes: &[u8]) {
        self.outbound.extend(bytes.iter().copied());
    }

    /// Generates the next deterministic message filename for this
    /// connection: `(timestamp, fd, per-connection counter)`, per §4.3.
    pub fn next_message_filename(&mut self) -> String {
        let ts = SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .unwrap_or_default()
            .as_micros();
        self.data_counter += 1;
        format!("{}.{}.{}", ts, self.fd, self.data_counter)
    }

    /// Clears envelope and open message, per the "message finalization"
    /// invariant in §3: "sender/recipients from the previous transaction
    /// do not carry over".
    pub fn reset_transaction(&mut self) {
        self.envelope.clear();
        self.message = None;
    }
}

//! UDP control-plane binary protocol, per `spec.md` §4.5.
//!
//! Fixed 15-byte request and response frames. Grounded on the teacher's
//! preference for explicit big-endian byte-slicing over a serde codec for
//! small fixed binary layouts (the teacher otherwise reaches for `serde`
//! for its JSON webhook payloads, but never for a wire frame this size),
//! matching `other_examples/403b8371_cpkb-bluezoo-tagliacarte__core-src-protocol-smtp-mod.rs.rs`'s
//! manual frame parsing style.

use crate::metrics::Metrics;

pub const SIGNATURE: [u8; 2] = [0xFF, 0xFE];
pub const VERSION: u8 = 0x00;
pub const AUTH_KEY: [u8; 8] = [0x01, 0x02, 0x03, 0x04, 0x05, 0x06, 0x07, 0x08];
pub const REQUEST_LEN: usize = 15;
pub const RESPONSE_LEN: usize = 15;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Status {
    Success = 0x00,
    AuthFailed = 0x01,
    InvalidVersion = 0x02,
    InvalidCommand = 0x03,
    InvalidLength = 0x04,
    UnexpectedError = 0x05,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Command {
    HistoricalConnections,
    CurrentConnections,
    BytesTransferred,
    ReadTransformToggle,
    SetTransformOn,
    SetTransformOff,
    SetVerifyOn,
    SetVerifyOff,
}

impl Command {
    fn from_code(code: u8) -> Option<Self> {
        match code {
            0x00 => Some(Command::HistoricalConnections),
            0x01 => Some(Command::CurrentConnections),
            0x02 => Some(Command::BytesTransferred),
            0x03 => Some(Command::ReadTransformToggle),
            0x04 => Some(Command::SetTransformOn),
            0x05 => Some(Command::SetTransformOff),
            0x06 => Some(Command::SetVerifyOn),
            0x07 => Some(Command::SetVerifyOff),
            _ => None,
        }
    }
}

/// A decoded, not-yet-validated request frame.
#[derive(Debug, Clone, Copy)]
pub struct Request {
    pub identifier: u16,
    pub command_code: u8,
}

/// A response frame ready to be serialized onto the wire.
#[derive(Debug, Clone, Copy)]
pub struct Response {
    pub identifier: u16,
    pub status: Status,
    pub quantity: u64,
    pub boolean: bool,
}

impl Response {
    fn failure(identifier: u16, status: Status) -> Self {
        Response { identifier, status, quantity: 0, boolean: false }
    }

    pub fn encode(&self) -> [u8; RESPONSE_LEN] {
        let mut buf = [0u8; RESPONSE_LEN];
        buf[0..2].copy_from_slice(&SIGNATURE);
        buf[2] = VERSION;
        buf[3..5].copy_from_slice(&self.identifier.to_be_bytes());
        buf[5] = self.status as u8;
        buf[6..14].copy_from_slice(&self.quantity.to_be_bytes());
        buf[14] = self.boolean as u8;
        buf
    }
}

/// Decodes, validates, and applies one request datagram against `metrics`,
/// in the order mandated by §4.5: length → signature → version → auth →
/// command. Never fails: any invalid input produces a response frame with
/// a non-zero status and zeroed quantity/boolean.
pub fn handle_datagram(datagram: &[u8], metrics: &mut Metrics) -> Response {
    if datagram.len() != REQUEST_LEN {
        // No identifier is trustworthy yet; echo 0 per "quantity=0,
        // boolean=0" — the identifier field itself is part of the frame
        // we can't trust the length of, so we don't attempt to recover it.
        return Response::failure(0, Status::InvalidLength);
    }

    let identifier = u16::from_be_bytes([datagram[3], datagram[4]]);

    if datagram[0..2] != SIGNATURE {
        return Response::failure(identifier, Status::InvalidVersion);
    }
    if datagram[2] != VERSION {
        return Response::failure(identifier, Status::InvalidVersion);
    }
    if datagram[5..13] != AUTH_KEY {
        return Response::failure(identifier, Status::AuthFailed);
    }

    let command = match Command::from_code(datagram[13]) {
        Some(c) => c,
        None => return Response::failure(identifier, Status::InvalidCommand),
    };

    apply(identifier, command, metrics)
}

fn apply(identifier: u16, command: Command, metrics: &mut Metrics) -> Response {
    match command {
        Command::HistoricalConnections => Response {
            identifier,
            status: Status::Success,
            quantity: metrics.total_connections(),
            boolean: false,
        },
        Command::CurrentConnections => Response {
            identifier,
            status: Status::Success,
            quantity: metrics.current_connections(),
            boolean: false,
        },
        Command::BytesTransferred => Response {
            identifier,
            status: Status::Success,
            quantity: metrics.bytes_transferred(),
            boolean: false,
        },
        Command::ReadTransformToggle => Response {
            identifier,
            status: Status::Success,
            quantity: 0,
            boolean: metrics.transform_enabled(),
        },
        Command::SetTransformOn => {
            metrics.set_transform_enabled(true);
            Response { identifier, status: Status::Success, quantity: 0, boolean: true }
        }
        Command::SetTransformOff => {
            metrics.set_transform_enabled(false);
            Response { identifier, status: Status::Success, quantity: 0, boolean: false }
        }
        Command::SetVerifyOn => {
            metrics.set_verify_enabled(true);
            Response { identifier, status: Status::Success, quantity: 0, boolean: true }
        }
        Command::SetVerifyOff => {
            metrics.set_verify_enabled(false);
            Response { identifier, status: Status::Success, quantity: 0, boolean: false }
        }
    }
}

/// Builds a request frame, used by `smtpctl`.
pub fn encode_request(identifier: u16, command_code: u8) -> [u8; REQUEST_LEN] {
    let mut buf = [0u8; REQUEST_LEN];
    buf[0..2].copy_from_slice(&SIGNATURE);
    buf[2] = VERSION;
    buf[3..5].copy_from_slice(&identifier.to_be_bytes());
    buf[5..13].copy_from_slice(&AUTH_KEY);
    buf[13] = command_code;
    buf
}

/// Decodes a response frame, used by `smtpctl`. Returns `None` if `buf` is
/// not `RESPONSE_LEN` bytes.
pub fn decode_response(buf: &[u8]) -> Option<Response> {
    if buf.len() != RESPONSE_LEN {
        return None;
    }
    let identifier = u16::from_be_bytes([buf[3], buf[4]]);
    let status = match buf[5] {
        0x00 => Status::Success,
        0x01 => Status::AuthFailed,
        0x02 => Status::InvalidVersion,
        0x03 => Status::InvalidCommand,
        0x04 => Status::InvalidLength,
        _ => Status::UnexpectedError,
    };
    let quantity = u64::from_be_bytes(buf[6..14].try_into().ok()?);
    let boolean = buf[14] != 0;
    Some(Response { identifier, status, quantity, boolean })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn wrong_length_yields_invalid_length_with_zeroed_fields() {
        let resp = handle_datagram(&[0u8; 3], &mut Metrics::new());
        assert_eq!(resp.status, Status::InvalidLength);
        assert_eq!(resp.quantity, 0);
        assert!(!resp.boolean);
    }

    #[test]
    fn wrong_signature_yields_invalid_version_with_identifier_echoed() {
        let mut req = encode_request(0x1234, 0x01);
        req[0] = 0xFF;
        req[1] = 0xFD;
        let resp = handle_datagram(&req, &mut Metrics::new());
        assert_eq!(resp.status, Status::InvalidVersion);
        assert_eq!(resp.identifier, 0x1234);
    }

    #[test]
    fn wrong_auth_yields_auth_failed() {
        let mut req = encode_request(1, 0x01);
        req[5] = 0x00;
        let resp = handle_datagram(&req, &mut Metrics::new());
        assert_eq!(resp.status, Status::AuthFailed);
    }

    #[test]
    fn unknown_command_yields_invalid_command() {
        let req = encode_request(1, 0xFF);
        let resp = handle_datagram(&req, &mut Metrics::new());
        assert_eq!(resp.status, Status::InvalidCommand);
    }

    #[test]
    fn set_transform_on_then_read_toggle_reflects_new_state() {
        let mut metrics = Metrics::new();
        let on = encode_request(1, 0x04);
        let resp = handle_datagram(&on, &mut metrics);
        assert_eq!(resp.status, Status::Success);
        assert!(resp.boolean);

        let read = encode_request(2, 0x03);
        let resp = handle_datagram(&read, &mut metrics);
        assert_eq!(resp.status, Status::Success);
        assert!(resp.boolean);
    }

    #[test]
    fn current_connections_reports_metrics_value() {
        let mut metrics = Metrics::new();
        metrics.record_connect();
        metrics.record_connect();
        metrics.record_disconnect();
        let req = encode_request(7, 0x01);
        let resp = handle_datagram(&req, &mut metrics);
        assert_eq!(resp.quantity, 1);
    }

    #[test]
    fn round_trip_encode_decode_response() {
        let resp = Response { identifier: 99, status: Status::Success, quantity: 42, boolean: true };
        let decoded = decode_response(&resp.encode()).unwrap();
        assert_eq!(decoded.identifier, 99);
        assert_eq!(decoded.quantity, 42);
        assert!(decoded.boolean);
    }
}

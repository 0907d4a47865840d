//! Frame-level transport codec (spec.md §4.7, §6).
//!
//! Builds REQ_UD1/REQ_UD2 short frames and validates/parses long-frame
//! envelopes returned by slaves. Knows nothing about VDS payload
//! contents; `payload` is handed to [`crate::record`] unexamined.

use crate::error::FrameError;

/// Control code for a class-1 user-data request.
pub const REQ_UD1: u8 = 0x5A;
/// Control code for a class-2 user-data request (normal readout).
pub const REQ_UD2: u8 = 0x5B;

const START_SHORT: u8 = 0x10;
const START_LONG: u8 = 0x68;
const STOP: u8 = 0x16;
pub(crate) const SINGLE_CHAR_ACK: u8 = 0xE5;

/// Control codes a RSP_UD long frame may carry (spec.md §6).
pub const VALID_RESPONSE_CONTROL_CODES: [u8; 4] = [0x08, 0x18, 0x28, 0x38];

/// CI value for a variable-data (VDS) response.
pub const CI_VARIABLE_DATA: [u8; 2] = [0x72, 0x76];
/// CI value for an RSP_UD application-error response (unimplemented,
/// spec.md §1).
pub const CI_APPLICATION_ERROR: u8 = 0x70;

fn checksum(bytes: &[u8]) -> u8 {
    bytes.iter().fold(0u8, |acc, b| acc.wrapping_add(*b))
}

/// `[0x10, C, A, CS, 0x16]` (spec.md §3, §6).
pub fn build_short(c: u8, a: u8) -> [u8; 5] {
    let cs = checksum(&[c, a]);
    [START_SHORT, c, a, cs, STOP]
}

/// Build a REQ_UD1 short frame addressed to `slave_address`.
pub fn build_req_ud1(slave_address: u8) -> [u8; 5] {
    build_short(REQ_UD1, slave_address)
}

/// Build a REQ_UD2 short frame addressed to `slave_address`.
pub fn build_req_ud2(slave_address: u8) -> [u8; 5] {
    build_short(REQ_UD2, slave_address)
}

/// A fully-parsed long-frame envelope (spec.md §3).
#[derive(Debug, Clone)]
pub struct LongFrameEnvelope {
    pub length: u8,
    pub control: u8,
    pub address: u8,
    pub control_information: u8,
    pub payload: Vec<u8>,
}

/// A decoded response, covering both long frames and the
/// single-character acknowledgement (spec.md §4.7).
#[derive(Debug, Clone)]
pub enum Response {
    Long(LongFrameEnvelope),
    /// `0xE5` single-character acknowledgement.
    Ack,
}

/// Build the wire bytes for a long-frame envelope (spec.md §3). Used
/// only by tests to state the envelope round-trip testable property
/// (spec.md §8); slaves, not this master, emit long frames on the wire
/// in normal operation.
pub fn build_long(control: u8, address: u8, control_information: u8, payload: &[u8]) -> Vec<u8> {
    let mut body = Vec::with_capacity(3 + payload.len());
    body.push(control);
    body.push(address);
    body.push(control_information);
    body.extend_from_slice(payload);

    let l = body.len() as u8;
    let cs = checksum(&body);

    let mut frame = Vec::with_capacity(6 + body.len());
    frame.push(START_LONG);
    frame.push(l);
    frame.push(l);
    frame.push(START_LONG);
    frame.extend_from_slice(&body);
    frame.push(cs);
    frame.push(STOP);
    frame
}

/// Parse a complete response buffer: a single ack byte, or a
/// fully-framed long frame (spec.md §4.7).
///
/// `0x10` (short frame) is not expected from a slave in normal request
/// flow and is reported as [`FrameError::BadStartByte`].
pub fn parse_response(buf: &[u8]) -> Result<Response, FrameError> {
    if buf.is_empty() {
        return Err(FrameError::TooShort { len: 0, min: 1 });
    }
    match buf[0] {
        SINGLE_CHAR_ACK => Ok(Response::Ack),
        START_LONG => Ok(Response::Long(parse_long(buf)?)),
        other => Err(FrameError::BadStartByte(other)),
    }
}

/// Parse and validate a long-frame envelope (spec.md §4.7).
pub fn parse_long(buf: &[u8]) -> Result<LongFrameEnvelope, FrameError> {
    if buf.len() < 6 {
        return Err(FrameError::TooShort { len: buf.len(), min: 6 });
    }
    if buf[0] != START_LONG {
        return Err(FrameError::BadStartByte(buf[0]));
    }
    if buf[3] != START_LONG {
        return Err(FrameError::BadSecondStartByte(buf[3]));
    }
    if buf[1] != buf[2] {
        return Err(FrameError::LengthMismatch(buf[1], buf[2]));
    }
    let last = buf.len() - 1;
    if buf[last] != STOP {
        return Err(FrameError::BadStopByte(buf[last]));
    }

    let l = buf[1];
    let expected = buf.len() - 6;
    if l as usize != expected {
        return Err(FrameError::LengthFieldError {
            declared: l,
            expected,
        });
    }

    let body = &buf[4..4 + l as usize];
    let computed = checksum(body);
    let declared_checksum = buf[last - 1];
    if computed != declared_checksum {
        return Err(FrameError::ChecksumMismatch {
            expected: declared_checksum,
            computed,
        });
    }

    Ok(LongFrameEnvelope {
        length: l,
        control: body[0],
        address: body[1],
        control_information: body[2],
        payload: body[3..].to_vec(),
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn req_ud2_address_one() {
        assert_eq!(build_req_ud2(0x01), [0x10, 0x5B, 0x01, 0x5C, 0x16]);
    }

    #[test]
    fn short_frame_checksum_property() {
        for c in [0x5A_u8, 0x5B] {
            for a in 0..=250u8 {
                let f = build_short(c, a);
                assert_eq!(f[3], c.wrapping_add(a));
                assert_eq!(f.len(), 5);
                assert_eq!(f[0], 0x10);
                assert_eq!(f[4], 0x16);
            }
        }
    }

    #[test]
    fn checksum_rejection() {
        let buf = [0x68, 0x03, 0x03, 0x68, 0x08, 0x01, 0x72, 0x00, 0x16];
        let err = parse_long(&buf).unwrap_err();
        assert!(matches!(
            err,
            FrameError::ChecksumMismatch {
                expected: 0x00,
                computed: 0x7B
            }
        ));
    }

    #[test]
    fn envelope_round_trip() {
        let payload = [0xDE, 0xAD, 0xBE, 0xEF];
        let wire = build_long(0x08, 0x01, 0x72, &payload);
        let parsed = parse_long(&wire).unwrap();
        assert_eq!(parsed.control, 0x08);
        assert_eq!(parsed.address, 0x01);
        assert_eq!(parsed.control_information, 0x72);
        assert_eq!(parsed.payload, payload);

        let rewire = build_long(
            parsed.control,
            parsed.address,
            parsed.control_information,
            &parsed.payload,
        );
        assert_eq!(rewire, wire);
    }

    #[test]
    fn ack_is_recognized() {
        assert!(matches!(parse_response(&[0xE5]).unwrap(), Response::Ack));
    }

    #[test]
    fn unexpected_short_frame_start_byte() {
        let buf = [0x10, 0x5B, 0x01, 0x5C, 0x16];
        assert!(matches!(
            parse_response(&buf),
            Err(FrameError::BadStartByte(0x10))
        ));
    }
}

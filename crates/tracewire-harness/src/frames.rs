//! Host-side frame construction and parsing
//!
//! Mirrors the device codec from the other end of the wire. The layouts are
//! shared with `tracewire-core` so the two cannot drift apart; only the
//! direction differs: the harness builds requests and takes responses apart.

use tracewire_core::protocol::codec::{encode_address, WIRE_ADDRESS_SIZE};
use tracewire_core::protocol::crc::frame_crc;
use tracewire_core::protocol::frame::{
    request_header, CRC_SIZE, RESPONSE_HEADER_SIZE, RESPONSE_MARKER,
};
use tracewire_core::ResponseCode;

// ----------------------------------------------------------------------------
// Request Construction
// ----------------------------------------------------------------------------

/// Frame a request body the way a host tool would
pub fn encode_request(command_id: u8, subfunction_id: u8, data: &[u8]) -> Vec<u8> {
    let header = request_header(command_id, subfunction_id, data.len() as u16);
    let mut frame = Vec::with_capacity(header.len() + data.len() + CRC_SIZE);
    frame.extend_from_slice(&header);
    frame.extend_from_slice(data);
    frame.extend_from_slice(&frame_crc(&header, data).to_be_bytes());
    frame
}

/// A protocol address in the endianness the device build expects
pub fn address_bytes(addr: u64) -> [u8; WIRE_ADDRESS_SIZE] {
    let mut out = [0u8; WIRE_ADDRESS_SIZE];
    encode_address(&mut out, addr);
    out
}

/// Body of a memory-read request: one `[addr][len]` record per entry
pub fn read_request_body(records: &[(u64, u16)]) -> Vec<u8> {
    let mut body = Vec::new();
    for &(addr, len) in records {
        body.extend_from_slice(&address_bytes(addr));
        body.extend_from_slice(&len.to_be_bytes());
    }
    body
}

/// Body of a memory-write request: one `[addr][len][bytes]` record per entry
pub fn write_request_body(records: &[(u64, &[u8])]) -> Vec<u8> {
    let mut body = Vec::new();
    for &(addr, data) in records {
        body.extend_from_slice(&address_bytes(addr));
        body.extend_from_slice(&(data.len() as u16).to_be_bytes());
        body.extend_from_slice(data);
    }
    body
}

// ----------------------------------------------------------------------------
// Response Parsing
// ----------------------------------------------------------------------------

/// A response frame taken apart and CRC-verified
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HostResponse {
    pub command_id: u8,
    pub subfunction_id: u8,
    pub response_code: ResponseCode,
    pub data: Vec<u8>,
}

/// Ways a response frame can be unusable on the host side
#[derive(Debug, Clone, Copy, PartialEq, Eq, thiserror::Error)]
pub enum FrameError {
    #[error("frame shorter than header and checksum")]
    Truncated,
    #[error("length field disagrees with frame size")]
    LengthMismatch,
    #[error("checksum mismatch")]
    CrcMismatch,
    #[error("command byte {0:#04x} is not a response")]
    NotAResponse(u8),
    #[error("unknown response code {0}")]
    UnknownResponseCode(u8),
}

/// Parse and verify one complete response frame
pub fn decode_response(frame: &[u8]) -> Result<HostResponse, FrameError> {
    if frame.len() < RESPONSE_HEADER_SIZE + CRC_SIZE {
        return Err(FrameError::Truncated);
    }
    if frame[0] & RESPONSE_MARKER == 0 {
        return Err(FrameError::NotAResponse(frame[0]));
    }

    let data_len = usize::from(u16::from_be_bytes([frame[3], frame[4]]));
    if frame.len() != RESPONSE_HEADER_SIZE + data_len + CRC_SIZE {
        return Err(FrameError::LengthMismatch);
    }

    let data_end = RESPONSE_HEADER_SIZE + data_len;
    let crc = frame_crc(&frame[..RESPONSE_HEADER_SIZE], &frame[RESPONSE_HEADER_SIZE..data_end]);
    if frame[data_end..] != crc.to_be_bytes() {
        return Err(FrameError::CrcMismatch);
    }

    let response_code = ResponseCode::from_u8(frame[2])
        .ok_or(FrameError::UnknownResponseCode(frame[2]))?;

    Ok(HostResponse {
        command_id: frame[0] & !RESPONSE_MARKER,
        subfunction_id: frame[1],
        response_code,
        data: frame[RESPONSE_HEADER_SIZE..data_end].to_vec(),
    })
}

// ----------------------------------------------------------------------------
// Tests
// ----------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn request_frame_layout() {
        let frame = encode_request(0x02, 0x01, &[0xAA, 0xBB]);
        assert_eq!(&frame[..4], &[0x02, 0x01, 0x00, 0x02]);
        assert_eq!(&frame[4..6], &[0xAA, 0xBB]);
        assert_eq!(frame.len(), 4 + 2 + 4);
    }

    #[test]
    fn response_roundtrip() {
        let header = [0x81u8, 0x02, 0x00, 0x00, 0x03];
        let data = [1u8, 2, 3];
        let mut frame = Vec::new();
        frame.extend_from_slice(&header);
        frame.extend_from_slice(&data);
        frame.extend_from_slice(&frame_crc(&header, &data).to_be_bytes());

        let response = decode_response(&frame).unwrap();
        assert_eq!(response.command_id, 0x01);
        assert_eq!(response.subfunction_id, 0x02);
        assert_eq!(response.response_code, ResponseCode::Ok);
        assert_eq!(response.data, vec![1, 2, 3]);
    }

    #[test]
    fn corrupted_responses_are_refused() {
        let header = [0x81u8, 0x02, 0x00, 0x00, 0x00];
        let mut frame = Vec::new();
        frame.extend_from_slice(&header);
        frame.extend_from_slice(&frame_crc(&header, &[]).to_be_bytes());

        let mut bad_crc = frame.clone();
        *bad_crc.last_mut().unwrap() ^= 0xFF;
        assert_eq!(decode_response(&bad_crc), Err(FrameError::CrcMismatch));

        assert_eq!(decode_response(&frame[..6]), Err(FrameError::LengthMismatch));
        assert_eq!(decode_response(&frame[..3]), Err(FrameError::Truncated));

        let mut not_response = frame.clone();
        not_response[0] = 0x01;
        assert_eq!(
            decode_response(&not_response),
            Err(FrameError::NotAResponse(0x01))
        );
    }
}

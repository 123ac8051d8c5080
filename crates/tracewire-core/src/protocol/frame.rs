//! Frame layout and request/response views
//!
//! On-the-wire layout, identical in both directions apart from the response
//! code byte and the marker bit:
//!
//! ```text
//! request:  [ cmd ][ subfn ][ len u16 BE ][ data ... ][ crc32 BE ]
//! response: [ cmd|0x80 ][ subfn ][ code ][ len u16 BE ][ data ... ][ crc32 BE ]
//! ```
//!
//! The length and CRC fields are big-endian regardless of the address
//! endianness selected at build time. The views in this module borrow the
//! comm handler's buffers; they live for a single dispatch and never copy
//! payload bytes.

use crate::errors::CodecError;
use crate::types::ResponseCode;

// ----------------------------------------------------------------------------
// Layout Constants
// ----------------------------------------------------------------------------

/// Request header: cmd, subfn, 16-bit length.
pub const REQUEST_HEADER_SIZE: usize = 4;

/// Response header: cmd, subfn, response code, 16-bit length.
pub const RESPONSE_HEADER_SIZE: usize = 5;

/// Trailing checksum, both directions.
pub const CRC_SIZE: usize = 4;

/// High bit of the command byte marks a response.
pub const RESPONSE_MARKER: u8 = 0x80;

/// Bytes a request frame adds around its payload.
pub const REQUEST_OVERHEAD: usize = REQUEST_HEADER_SIZE + CRC_SIZE;

/// Bytes a response frame adds around its payload.
pub const RESPONSE_OVERHEAD: usize = RESPONSE_HEADER_SIZE + CRC_SIZE;

/// Header bytes in CRC order for a request frame
pub fn request_header(command_id: u8, subfunction_id: u8, data_len: u16) -> [u8; REQUEST_HEADER_SIZE] {
    let len = data_len.to_be_bytes();
    [command_id, subfunction_id, len[0], len[1]]
}

/// Header bytes in CRC order for a response frame
pub fn response_header(
    command_id: u8,
    subfunction_id: u8,
    response_code: u8,
    data_len: u16,
) -> [u8; RESPONSE_HEADER_SIZE] {
    let len = data_len.to_be_bytes();
    [
        command_id | RESPONSE_MARKER,
        subfunction_id,
        response_code,
        len[0],
        len[1],
    ]
}

// ----------------------------------------------------------------------------
// Request View
// ----------------------------------------------------------------------------

/// A validated request, borrowing the reception buffer
///
/// Only CRC-checked frames become requests; the view dies when the comm
/// handler releases the frame for the next reception.
#[derive(Debug)]
pub struct Request<'a> {
    pub command_id: u8,
    pub subfunction_id: u8,
    pub data: &'a [u8],
}

impl Request<'_> {
    pub fn data_len(&self) -> u16 {
        self.data.len() as u16
    }
}

// ----------------------------------------------------------------------------
// Response Builder
// ----------------------------------------------------------------------------

/// Header fields of a finished response, detached from the payload buffer
#[derive(Debug, Clone, Copy)]
pub struct ResponseMeta {
    pub command_id: u8,
    pub subfunction_id: u8,
    pub response_code: ResponseCode,
    pub data_len: u16,
    pub valid: bool,
}

/// A response under construction, writing into the transmission buffer
///
/// The codec appends through the cursor methods; nothing here knows the
/// meaning of the bytes. Appending past the buffer end reports
/// [`CodecError::Overflow`] and leaves the cursor unchanged.
#[derive(Debug)]
pub struct Response<'a> {
    pub command_id: u8,
    pub subfunction_id: u8,
    pub response_code: ResponseCode,
    pub valid: bool,
    data: &'a mut [u8],
    data_len: usize,
}

impl<'a> Response<'a> {
    /// Wrap the transmit data area. The response starts out invalid.
    pub(crate) fn new(data: &'a mut [u8]) -> Self {
        Self {
            command_id: 0,
            subfunction_id: 0,
            response_code: ResponseCode::FailureToProceed,
            valid: false,
            data,
            data_len: 0,
        }
    }

    /// Set the defaults for answering `(command_id, subfunction_id)`
    pub fn prepare(&mut self, command_id: u8, subfunction_id: u8) {
        self.command_id = command_id;
        self.subfunction_id = subfunction_id;
        self.response_code = ResponseCode::Ok;
        self.valid = true;
        self.data_len = 0;
    }

    pub fn capacity(&self) -> usize {
        self.data.len()
    }

    pub fn data_len(&self) -> u16 {
        self.data_len as u16
    }

    pub fn data(&self) -> &[u8] {
        &self.data[..self.data_len]
    }

    /// Drop any encoded payload, keeping the header fields
    pub fn clear_data(&mut self) {
        self.data_len = 0;
    }

    /// Append raw bytes
    pub fn push_bytes(&mut self, bytes: &[u8]) -> Result<(), CodecError> {
        let slot = self.reserve(bytes.len())?;
        slot.copy_from_slice(bytes);
        Ok(())
    }

    pub fn push_u8(&mut self, value: u8) -> Result<(), CodecError> {
        self.push_bytes(&[value])
    }

    pub fn push_u16_be(&mut self, value: u16) -> Result<(), CodecError> {
        self.push_bytes(&value.to_be_bytes())
    }

    pub fn push_u32_be(&mut self, value: u32) -> Result<(), CodecError> {
        self.push_bytes(&value.to_be_bytes())
    }

    /// Claim `len` bytes of payload and return them for the caller to fill
    pub fn reserve(&mut self, len: usize) -> Result<&mut [u8], CodecError> {
        let start = self.data_len;
        let end = start.checked_add(len).ok_or(CodecError::Overflow)?;
        if end > self.data.len() {
            return Err(CodecError::Overflow);
        }
        self.data_len = end;
        Ok(&mut self.data[start..end])
    }

    pub fn meta(&self) -> ResponseMeta {
        ResponseMeta {
            command_id: self.command_id,
            subfunction_id: self.subfunction_id,
            response_code: self.response_code,
            data_len: self.data_len as u16,
            valid: self.valid,
        }
    }
}

// ----------------------------------------------------------------------------
// Tests
// ----------------------------------------------------------------------------

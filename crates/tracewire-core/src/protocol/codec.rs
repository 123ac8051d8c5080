//! Payload body encoding and decoding
//!
//! The codec is the only place that knows field offsets and byte order
//! inside payload bodies. It formats buffers and nothing else: live memory
//! is read and written by the command processors, which hand the codec
//! pre-sized slots to fill.
//!
//! Framing fields (length, CRC) are big-endian everywhere. Protocol
//! addresses are pointer-sized for the target and little-endian unless the
//! `big-endian-address` feature is enabled; host and device builds must
//! agree on both attributes.

use cfg_if::cfg_if;

use crate::config::SOFTWARE_ID_LENGTH;
use crate::errors::CodecError;
use crate::protocol::frame::{Request, Response};
use crate::types::{FeatureFlags, ProtocolVersion, RegionType};
use crate::AddressRange;

// ----------------------------------------------------------------------------
// Wire Attributes
// ----------------------------------------------------------------------------

/// Bytes per protocol address: the target's pointer width.
pub const WIRE_ADDRESS_SIZE: usize = core::mem::size_of::<usize>();

/// Fixed prefix of every discover response.
pub const DISCOVER_MAGIC: [u8; 4] = [0x7E, 0x18, 0xFC, 0x68];

/// Length of the discover challenge and its echoed complement.
pub const DISCOVER_CHALLENGE_SIZE: usize = 8;

/// Bytes per memory-record header: address plus 16-bit length.
pub const MEMORY_RECORD_HEADER_SIZE: usize = WIRE_ADDRESS_SIZE + 2;

/// Write a protocol address into an address-sized slot
pub fn encode_address(dst: &mut [u8], addr: u64) {
    debug_assert_eq!(dst.len(), WIRE_ADDRESS_SIZE);
    cfg_if! {
        if #[cfg(feature = "big-endian-address")] {
            let bytes = addr.to_be_bytes();
            dst.copy_from_slice(&bytes[8 - WIRE_ADDRESS_SIZE..]);
        } else {
            let bytes = addr.to_le_bytes();
            dst.copy_from_slice(&bytes[..WIRE_ADDRESS_SIZE]);
        }
    }
}

/// Read a protocol address from an address-sized slot
pub fn decode_address(src: &[u8]) -> u64 {
    debug_assert_eq!(src.len(), WIRE_ADDRESS_SIZE);
    let mut bytes = [0u8; 8];
    cfg_if! {
        if #[cfg(feature = "big-endian-address")] {
            bytes[8 - WIRE_ADDRESS_SIZE..].copy_from_slice(src);
            u64::from_be_bytes(bytes)
        } else {
            bytes[..WIRE_ADDRESS_SIZE].copy_from_slice(src);
            u64::from_le_bytes(bytes)
        }
    }
}

fn read_u16_be(src: &[u8]) -> u16 {
    u16::from_be_bytes([src[0], src[1]])
}

fn push_address(response: &mut Response<'_>, addr: u64) -> Result<(), CodecError> {
    let slot = response.reserve(WIRE_ADDRESS_SIZE)?;
    encode_address(slot, addr);
    Ok(())
}

// ----------------------------------------------------------------------------
// GetInfo Bodies
// ----------------------------------------------------------------------------

pub fn encode_protocol_version(
    response: &mut Response<'_>,
    version: ProtocolVersion,
) -> Result<(), CodecError> {
    response.push_u8(version.major)?;
    response.push_u8(version.minor)
}

pub fn encode_software_id(
    response: &mut Response<'_>,
    id: &[u8; SOFTWARE_ID_LENGTH],
) -> Result<(), CodecError> {
    response.push_bytes(id)
}

pub fn encode_supported_features(
    response: &mut Response<'_>,
    features: FeatureFlags,
) -> Result<(), CodecError> {
    response.push_u8(features.as_u8())
}

pub fn encode_special_region_count(
    response: &mut Response<'_>,
    readonly_count: u8,
    forbidden_count: u8,
) -> Result<(), CodecError> {
    response.push_u8(readonly_count)?;
    response.push_u8(forbidden_count)
}

/// Body: `[region_type][region_index]`
pub fn decode_special_region_location(request: &Request<'_>) -> Result<(RegionType, u8), CodecError> {
    if request.data.len() != 2 {
        return Err(CodecError::InvalidRequest);
    }
    let kind = RegionType::from_u8(request.data[0]).ok_or(CodecError::InvalidRequest)?;
    Ok((kind, request.data[1]))
}

pub fn encode_special_region_location(
    response: &mut Response<'_>,
    kind: RegionType,
    index: u8,
    range: AddressRange,
) -> Result<(), CodecError> {
    response.push_u8(kind.as_u8())?;
    response.push_u8(index)?;
    push_address(response, range.start())?;
    push_address(response, range.end())
}

// ----------------------------------------------------------------------------
// CommControl Bodies
// ----------------------------------------------------------------------------

/// Body: the raw challenge bytes
pub fn decode_discover(request: &Request<'_>) -> Result<[u8; DISCOVER_CHALLENGE_SIZE], CodecError> {
    if request.data.len() != DISCOVER_CHALLENGE_SIZE {
        return Err(CodecError::InvalidRequest);
    }
    let mut challenge = [0u8; DISCOVER_CHALLENGE_SIZE];
    challenge.copy_from_slice(request.data);
    Ok(challenge)
}

/// Body: magic prefix then the complemented challenge
pub fn encode_discover(
    response: &mut Response<'_>,
    challenge_response: &[u8; DISCOVER_CHALLENGE_SIZE],
) -> Result<(), CodecError> {
    response.push_bytes(&DISCOVER_MAGIC)?;
    response.push_bytes(challenge_response)
}

pub fn decode_heartbeat(request: &Request<'_>) -> Result<u16, CodecError> {
    if request.data.len() != 2 {
        return Err(CodecError::InvalidRequest);
    }
    Ok(read_u16_be(request.data))
}

pub fn encode_heartbeat(
    response: &mut Response<'_>,
    challenge_response: u16,
) -> Result<(), CodecError> {
    response.push_u16_be(challenge_response)
}

/// Link parameters advertised by `CommControl::GetParams`
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CommParams {
    pub rx_data_size: u16,
    pub tx_data_size: u16,
    pub max_bitrate: u32,
    pub heartbeat_timeout_us: u32,
    pub rx_timeout_us: u32,
}

pub fn encode_comm_params(
    response: &mut Response<'_>,
    params: &CommParams,
) -> Result<(), CodecError> {
    response.push_u16_be(params.rx_data_size)?;
    response.push_u16_be(params.tx_data_size)?;
    response.push_u32_be(params.max_bitrate)?;
    response.push_u32_be(params.heartbeat_timeout_us)?;
    response.push_u32_be(params.rx_timeout_us)
}

// ----------------------------------------------------------------------------
// MemoryControl Bodies
// ----------------------------------------------------------------------------

/// One record of a read request
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ReadRecord {
    pub addr: u64,
    pub len: u16,
}

/// Walks the `[addr][len]` records of a read request
///
/// Construction validates the whole body, so iteration cannot fail.
#[derive(Debug, Clone)]
pub struct ReadRequestParser<'a> {
    data: &'a [u8],
    cursor: usize,
    required_tx_size: usize,
}

impl<'a> ReadRequestParser<'a> {
    pub fn new(request: &Request<'a>) -> Result<Self, CodecError> {
        let data = request.data;
        if data.is_empty() || data.len() % MEMORY_RECORD_HEADER_SIZE != 0 {
            return Err(CodecError::InvalidRequest);
        }

        let mut required_tx_size = 0usize;
        let mut cursor = 0;
        while cursor < data.len() {
            let len = read_u16_be(&data[cursor + WIRE_ADDRESS_SIZE..]);
            required_tx_size += MEMORY_RECORD_HEADER_SIZE + usize::from(len);
            cursor += MEMORY_RECORD_HEADER_SIZE;
        }

        Ok(Self {
            data,
            cursor: 0,
            required_tx_size,
        })
    }

    /// Response bytes the full record list will need
    pub fn required_tx_size(&self) -> usize {
        self.required_tx_size
    }

    pub fn next(&mut self) -> Option<ReadRecord> {
        if self.cursor >= self.data.len() {
            return None;
        }
        let addr = decode_address(&self.data[self.cursor..self.cursor + WIRE_ADDRESS_SIZE]);
        let len = read_u16_be(&self.data[self.cursor + WIRE_ADDRESS_SIZE..]);
        self.cursor += MEMORY_RECORD_HEADER_SIZE;
        Some(ReadRecord { addr, len })
    }
}

/// One record of a write request, payload still in the reception buffer
#[derive(Debug, Clone, Copy)]
pub struct WriteRecord<'a> {
    pub addr: u64,
    pub data: &'a [u8],
}

/// Walks the `[addr][len][bytes]` records of a write request
#[derive(Debug, Clone)]
pub struct WriteRequestParser<'a> {
    data: &'a [u8],
    cursor: usize,
    ack_size: usize,
}

impl<'a> WriteRequestParser<'a> {
    pub fn new(request: &Request<'a>) -> Result<Self, CodecError> {
        let data = request.data;
        if data.is_empty() {
            return Err(CodecError::InvalidRequest);
        }

        // Every record must fit and the records must consume the body exactly.
        let mut ack_size = 0usize;
        let mut cursor = 0;
        while cursor < data.len() {
            if cursor + MEMORY_RECORD_HEADER_SIZE > data.len() {
                return Err(CodecError::InvalidRequest);
            }
            let len = read_u16_be(&data[cursor + WIRE_ADDRESS_SIZE..]);
            cursor += MEMORY_RECORD_HEADER_SIZE + usize::from(len);
            if cursor > data.len() {
                return Err(CodecError::InvalidRequest);
            }
            ack_size += MEMORY_RECORD_HEADER_SIZE;
        }

        Ok(Self {
            data,
            cursor: 0,
            ack_size,
        })
    }

    /// Response bytes the acknowledgment list will need
    pub fn ack_size(&self) -> usize {
        self.ack_size
    }

    pub fn next(&mut self) -> Option<WriteRecord<'a>> {
        if self.cursor >= self.data.len() {
            return None;
        }
        let addr = decode_address(&self.data[self.cursor..self.cursor + WIRE_ADDRESS_SIZE]);
        let len = usize::from(read_u16_be(&self.data[self.cursor + WIRE_ADDRESS_SIZE..]));
        let start = self.cursor + MEMORY_RECORD_HEADER_SIZE;
        self.cursor = start + len;
        Some(WriteRecord {
            addr,
            data: &self.data[start..start + len],
        })
    }
}

/// Appends `[addr][len][bytes]` blocks to a read response
#[derive(Debug)]
pub struct ReadResponseEncoder<'r, 'b> {
    response: &'r mut Response<'b>,
}

impl<'r, 'b> ReadResponseEncoder<'r, 'b> {
    pub fn new(response: &'r mut Response<'b>) -> Self {
        response.clear_data();
        Self { response }
    }

    /// Write one block header and hand back the slot for the memory bytes
    pub fn begin_block(&mut self, addr: u64, len: u16) -> Result<&mut [u8], CodecError> {
        push_address(self.response, addr)?;
        self.response.push_u16_be(len)?;
        self.response.reserve(usize::from(len))
    }
}

/// Appends `[addr][len]` acknowledgments to a write response
#[derive(Debug)]
pub struct WriteResponseEncoder<'r, 'b> {
    response: &'r mut Response<'b>,
}

impl<'r, 'b> WriteResponseEncoder<'r, 'b> {
    pub fn new(response: &'r mut Response<'b>) -> Self {
        response.clear_data();
        Self { response }
    }

    pub fn write_ack(&mut self, addr: u64, len: u16) -> Result<(), CodecError> {
        push_address(self.response, addr)?;
        self.response.push_u16_be(len)
    }
}

// ----------------------------------------------------------------------------
// Tests
// ----------------------------------------------------------------------------

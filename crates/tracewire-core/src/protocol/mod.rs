//! Wire protocol implementation
//!
//! Everything that touches bytes on the link lives under this module:
//!
//! - [`crc`]: the CRC-32 unit shared by reception and transmission
//! - [`frame`]: frame layout constants and the request/response views
//! - [`codec`]: encoding and decoding of command payload bodies
//! - [`comm`]: the byte-stream receiver, transmitter, and session state

pub mod codec;
pub mod comm;
pub mod crc;
pub mod frame;

pub use codec::{DISCOVER_CHALLENGE_SIZE, DISCOVER_MAGIC, WIRE_ADDRESS_SIZE};
pub use comm::CommHandler;
pub use frame::{Request, Response};

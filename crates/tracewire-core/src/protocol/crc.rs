//! Frame checksum
//!
//! Every frame ends with a CRC-32/ISO-HDLC over the header and payload.
//! Both directions share the same polynomial; the host refuses frames that
//! fail it just as silently as the device does.

use crc::{Crc, CRC_32_ISO_HDLC};

const CRC32: Crc<u32> = Crc::<u32>::new(&CRC_32_ISO_HDLC);

/// CRC over a frame split into its header and payload parts
pub fn frame_crc(header: &[u8], payload: &[u8]) -> u32 {
    let mut digest = CRC32.digest();
    digest.update(header);
    digest.update(payload);
    digest.finalize()
}

/// CRC over a contiguous byte run
pub fn crc32(data: &[u8]) -> u32 {
    CRC32.checksum(data)
}

// ----------------------------------------------------------------------------
// Tests
// ----------------------------------------------------------------------------

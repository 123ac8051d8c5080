//! Device configuration
//!
//! Everything the embedding application decides at init time lives here: the
//! protected address ranges, the software id reported to the host, and the
//! buffer-size overrides. The configuration is copied into the core by
//! [`MainHandler::new`](crate::handler::MainHandler::new) and is immutable
//! afterwards.
//!
//! The compile-time maxima in this module bound every buffer in the core;
//! overrides can shrink the advertised sizes but never grow them.

use heapless::Vec;
use serde::{Deserialize, Serialize};

use crate::errors::ConfigError;

// ----------------------------------------------------------------------------
// Build Constants
// ----------------------------------------------------------------------------

/// Reception buffer capacity in data bytes. Headers and CRC are not counted.
pub const MAX_RX_DATA_SIZE: usize = 128;

/// Transmission buffer capacity in data bytes. Headers and CRC are not counted.
pub const MAX_TX_DATA_SIZE: usize = 256;

/// Reset the reception state machine when a partial frame stalls this long.
pub const RX_TIMEOUT_US: u32 = 50_000;

/// Drop the session when no heartbeat is accepted within this delay.
pub const HEARTBEAT_TIMEOUT_US: u32 = 5_000_000;

/// Capacity of the forbidden-range table.
pub const MAX_FORBIDDEN_RANGES: usize = 8;

/// Capacity of the readonly-range table.
pub const MAX_READONLY_RANGES: usize = 8;

/// Length of the software id reported by `GetInfo::GetSoftwareId`.
pub const SOFTWARE_ID_LENGTH: usize = 16;

// The 16-bit length field is the hard ceiling for any buffer override.
const _: () = assert!(MAX_RX_DATA_SIZE <= 0xFFFF);
const _: () = assert!(MAX_TX_DATA_SIZE <= 0xFFFF);
const _: () = assert!(MAX_TX_DATA_SIZE >= SOFTWARE_ID_LENGTH);

// ----------------------------------------------------------------------------
// Address Range
// ----------------------------------------------------------------------------

/// An inclusive interval of host addresses
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct AddressRange {
    start: u64,
    end: u64,
}

impl AddressRange {
    /// Create a range covering `start..=end`
    pub fn new(start: u64, end: u64) -> Result<Self, ConfigError> {
        if start > end {
            return Err(ConfigError::InvalidRange { start, end });
        }
        Ok(Self { start, end })
    }

    pub fn start(&self) -> u64 {
        self.start
    }

    pub fn end(&self) -> u64 {
        self.end
    }

    /// True when `other_start..=other_end` shares at least one address
    pub fn overlaps(&self, other_start: u64, other_end: u64) -> bool {
        other_start <= self.end && other_end >= self.start
    }
}

// ----------------------------------------------------------------------------
// Device Configuration
// ----------------------------------------------------------------------------

/// Immutable per-device configuration, supplied once at init
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DeviceConfig {
    forbidden_ranges: Vec<AddressRange, MAX_FORBIDDEN_RANGES>,
    readonly_ranges: Vec<AddressRange, MAX_READONLY_RANGES>,
    software_id: [u8; SOFTWARE_ID_LENGTH],
    max_bitrate: u32,
    rx_data_size: u16,
    tx_data_size: u16,
}

impl DeviceConfig {
    /// A configuration with no protected ranges and the compiled buffer sizes
    pub fn new() -> Self {
        Self {
            forbidden_ranges: Vec::new(),
            readonly_ranges: Vec::new(),
            software_id: [0; SOFTWARE_ID_LENGTH],
            max_bitrate: 0,
            rx_data_size: MAX_RX_DATA_SIZE as u16,
            tx_data_size: MAX_TX_DATA_SIZE as u16,
        }
    }

    /// Deny both reads and writes to `start..=end`
    pub fn add_forbidden_range(&mut self, start: u64, end: u64) -> Result<(), ConfigError> {
        let range = AddressRange::new(start, end)?;
        self.forbidden_ranges
            .push(range)
            .map_err(|_| ConfigError::RangeTableFull {
                capacity: MAX_FORBIDDEN_RANGES,
            })
    }

    /// Deny writes to `start..=end`; reads stay allowed
    pub fn add_readonly_range(&mut self, start: u64, end: u64) -> Result<(), ConfigError> {
        let range = AddressRange::new(start, end)?;
        self.readonly_ranges
            .push(range)
            .map_err(|_| ConfigError::RangeTableFull {
                capacity: MAX_READONLY_RANGES,
            })
    }

    /// Identify this firmware build to the host
    pub fn set_software_id(&mut self, id: [u8; SOFTWARE_ID_LENGTH]) {
        self.software_id = id;
    }

    /// Advisory egress bitrate limit advertised to the host. 0 means unlimited.
    pub fn set_max_bitrate(&mut self, bits_per_second: u32) {
        self.max_bitrate = bits_per_second;
    }

    /// Shrink the reception buffer below the compiled maximum
    pub fn set_rx_data_size(&mut self, size: u16) -> Result<(), ConfigError> {
        if size as usize > MAX_RX_DATA_SIZE {
            return Err(ConfigError::BufferTooLarge {
                requested: size,
                max: MAX_RX_DATA_SIZE as u16,
            });
        }
        self.rx_data_size = size;
        Ok(())
    }

    /// Shrink the transmission buffer below the compiled maximum
    pub fn set_tx_data_size(&mut self, size: u16) -> Result<(), ConfigError> {
        if size as usize > MAX_TX_DATA_SIZE {
            return Err(ConfigError::BufferTooLarge {
                requested: size,
                max: MAX_TX_DATA_SIZE as u16,
            });
        }
        self.tx_data_size = size;
        Ok(())
    }

    pub fn forbidden_ranges(&self) -> &[AddressRange] {
        &self.forbidden_ranges
    }

    pub fn readonly_ranges(&self) -> &[AddressRange] {
        &self.readonly_ranges
    }

    pub fn software_id(&self) -> &[u8; SOFTWARE_ID_LENGTH] {
        &self.software_id
    }

    pub fn max_bitrate(&self) -> u32 {
        self.max_bitrate
    }

    pub fn rx_data_size(&self) -> u16 {
        self.rx_data_size
    }

    pub fn tx_data_size(&self) -> u16 {
        self.tx_data_size
    }
}

impl Default for DeviceConfig {
    fn default() -> Self {
        Self::new()
    }
}

// ----------------------------------------------------------------------------
// Tests
// ----------------------------------------------------------------------------

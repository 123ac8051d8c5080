//! Core types for the tracewire protocol
//!
//! Wire-level enumerations shared by the codec, the comm handler, and the
//! command processors. The numeric values are part of the host/device
//! interface and must not change between releases.

use serde::{Deserialize, Serialize};

// ----------------------------------------------------------------------------
// Protocol Version
// ----------------------------------------------------------------------------

/// Protocol version advertised by `GetInfo::GetProtocolVersion`
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProtocolVersion {
    pub major: u8,
    pub minor: u8,
}

/// The version implemented by this crate
pub const PROTOCOL_VERSION: ProtocolVersion = ProtocolVersion { major: 1, minor: 0 };

// ----------------------------------------------------------------------------
// Response Codes
// ----------------------------------------------------------------------------

/// Result byte carried by every response frame
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[repr(u8)]
pub enum ResponseCode {
    /// Request serviced in full
    Ok = 0,
    /// Malformed body: wrong length, reserved field nonzero, unknown enum
    InvalidRequest = 1,
    /// Command or subfunction not compiled into this build
    UnsupportedFeature = 2,
    /// The response would not fit the transmit buffer
    Overflow = 3,
    /// The request touched a protected address range
    Forbidden = 4,
    /// An internal precondition did not hold
    FailureToProceed = 5,
    /// A previous request is still being serviced
    Busy = 6,
}

impl ResponseCode {
    /// Convert from the raw wire byte
    pub fn from_u8(value: u8) -> Option<Self> {
        match value {
            0 => Some(ResponseCode::Ok),
            1 => Some(ResponseCode::InvalidRequest),
            2 => Some(ResponseCode::UnsupportedFeature),
            3 => Some(ResponseCode::Overflow),
            4 => Some(ResponseCode::Forbidden),
            5 => Some(ResponseCode::FailureToProceed),
            6 => Some(ResponseCode::Busy),
            _ => None,
        }
    }

    /// Raw wire byte
    pub fn as_u8(self) -> u8 {
        self as u8
    }

    pub fn is_ok(self) -> bool {
        self == ResponseCode::Ok
    }
}

// ----------------------------------------------------------------------------
// Commands
// ----------------------------------------------------------------------------

/// Top-level command groups
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[repr(u8)]
pub enum CommandId {
    GetInfo = 1,
    CommControl = 2,
    MemoryControl = 3,
    DataLogControl = 4,
    UserCommand = 5,
}

impl CommandId {
    pub fn from_u8(value: u8) -> Option<Self> {
        match value {
            1 => Some(CommandId::GetInfo),
            2 => Some(CommandId::CommControl),
            3 => Some(CommandId::MemoryControl),
            4 => Some(CommandId::DataLogControl),
            5 => Some(CommandId::UserCommand),
            _ => None,
        }
    }

    pub fn as_u8(self) -> u8 {
        self as u8
    }
}

/// Subfunctions of [`CommandId::GetInfo`]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum GetInfoSubfunction {
    ProtocolVersion = 1,
    SoftwareId = 2,
    SupportedFeatures = 3,
    SpecialRegionCount = 4,
    SpecialRegionLocation = 5,
}

impl GetInfoSubfunction {
    pub fn from_u8(value: u8) -> Option<Self> {
        match value {
            1 => Some(GetInfoSubfunction::ProtocolVersion),
            2 => Some(GetInfoSubfunction::SoftwareId),
            3 => Some(GetInfoSubfunction::SupportedFeatures),
            4 => Some(GetInfoSubfunction::SpecialRegionCount),
            5 => Some(GetInfoSubfunction::SpecialRegionLocation),
            _ => None,
        }
    }
}

/// Subfunctions of [`CommandId::CommControl`]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum CommControlSubfunction {
    Discover = 1,
    Heartbeat = 2,
    GetParams = 3,
}

impl CommControlSubfunction {
    pub fn from_u8(value: u8) -> Option<Self> {
        match value {
            1 => Some(CommControlSubfunction::Discover),
            2 => Some(CommControlSubfunction::Heartbeat),
            3 => Some(CommControlSubfunction::GetParams),
            _ => None,
        }
    }
}

/// Subfunctions of [`CommandId::MemoryControl`]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum MemoryControlSubfunction {
    Read = 1,
    Write = 2,
}

impl MemoryControlSubfunction {
    pub fn from_u8(value: u8) -> Option<Self> {
        match value {
            1 => Some(MemoryControlSubfunction::Read),
            2 => Some(MemoryControlSubfunction::Write),
            _ => None,
        }
    }
}

// ----------------------------------------------------------------------------
// Feature Flags
// ----------------------------------------------------------------------------

/// Bitfield returned by `GetInfo::GetSupportedFeatures`
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct FeatureFlags(u8);

impl FeatureFlags {
    pub const MEMORY_READ: Self = Self(0x01);
    pub const MEMORY_WRITE: Self = Self(0x02);
    pub const DATALOG: Self = Self(0x04);
    pub const USER_COMMAND: Self = Self(0x08);

    /// Create flags from the raw byte
    pub const fn new(value: u8) -> Self {
        Self(value)
    }

    /// Raw wire byte
    pub const fn as_u8(self) -> u8 {
        self.0
    }

    pub const fn has(self, flag: Self) -> bool {
        (self.0 & flag.0) != 0
    }

    /// The feature set compiled into this build
    pub fn advertised() -> Self {
        let mut bits = Self::MEMORY_READ.0 | Self::MEMORY_WRITE.0;
        if cfg!(feature = "datalog") {
            bits |= Self::DATALOG.0;
        }
        if cfg!(feature = "user-command") {
            bits |= Self::USER_COMMAND.0;
        }
        Self(bits)
    }
}

// ----------------------------------------------------------------------------
// Protected Region Kinds
// ----------------------------------------------------------------------------

/// Region table selector used by the special-region queries
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[repr(u8)]
pub enum RegionType {
    ReadOnly = 0,
    Forbidden = 1,
}

impl RegionType {
    pub fn from_u8(value: u8) -> Option<Self> {
        match value {
            0 => Some(RegionType::ReadOnly),
            1 => Some(RegionType::Forbidden),
            _ => None,
        }
    }

    pub fn as_u8(self) -> u8 {
        self as u8
    }
}

// ----------------------------------------------------------------------------
// Tests
// ----------------------------------------------------------------------------

//! Error types for the tracewire core
//!
//! Protocol-visible failures are never raised as Rust errors: they travel as
//! [`ResponseCode`](crate::types::ResponseCode) values in the response frame.
//! The types here cover the seams where the core talks to the embedding
//! application (configuration, transmission) and the internal codec/policy
//! results that the command processors translate into response codes.
//!
//! Every error is a small `Copy` value so the crate stays allocation-free on
//! `no_std` targets.

use crate::types::ResponseCode;

// ----------------------------------------------------------------------------
// Configuration Errors
// ----------------------------------------------------------------------------

cfg_if::cfg_if! {
    if #[cfg(feature = "std")] {
        /// Errors raised while building a [`DeviceConfig`](crate::config::DeviceConfig)
        #[derive(Debug, Clone, Copy, PartialEq, Eq, thiserror::Error)]
        pub enum ConfigError {
            #[error("address range start {start:#x} is past end {end:#x}")]
            InvalidRange { start: u64, end: u64 },
            #[error("range table is full (capacity {capacity})")]
            RangeTableFull { capacity: usize },
            #[error("buffer override {requested} exceeds the compiled maximum {max}")]
            BufferTooLarge { requested: u16, max: u16 },
        }
    } else {
        /// Errors raised while building a [`DeviceConfig`](crate::config::DeviceConfig)
        #[derive(Debug, Clone, Copy, PartialEq, Eq)]
        pub enum ConfigError {
            InvalidRange { start: u64, end: u64 },
            RangeTableFull { capacity: usize },
            BufferTooLarge { requested: u16, max: u16 },
        }
    }
}

// ----------------------------------------------------------------------------
// Codec Errors
// ----------------------------------------------------------------------------

cfg_if::cfg_if! {
    if #[cfg(feature = "std")] {
        /// Failures while decoding a request body or encoding a response body
        #[derive(Debug, Clone, Copy, PartialEq, Eq, thiserror::Error)]
        pub enum CodecError {
            /// Wrong length, reserved field nonzero, or unknown enum value
            #[error("malformed request body")]
            InvalidRequest,
            /// The encoded response would not fit the transmit buffer
            #[error("response exceeds transmit capacity")]
            Overflow,
            /// An internal precondition did not hold
            #[error("internal precondition unmet")]
            FailureToProceed,
        }
    } else {
        /// Failures while decoding a request body or encoding a response body
        #[derive(Debug, Clone, Copy, PartialEq, Eq)]
        pub enum CodecError {
            InvalidRequest,
            Overflow,
            FailureToProceed,
        }
    }
}

impl From<CodecError> for ResponseCode {
    fn from(err: CodecError) -> Self {
        match err {
            CodecError::InvalidRequest => ResponseCode::InvalidRequest,
            CodecError::Overflow => ResponseCode::Overflow,
            CodecError::FailureToProceed => ResponseCode::FailureToProceed,
        }
    }
}

// ----------------------------------------------------------------------------
// Memory Access Errors
// ----------------------------------------------------------------------------

cfg_if::cfg_if! {
    if #[cfg(feature = "std")] {
        /// A host-supplied address range was denied by the configured rules
        #[derive(Debug, Clone, Copy, PartialEq, Eq, thiserror::Error)]
        pub enum AccessError {
            #[error("range [{addr:#x}; +{len}] touches a forbidden region")]
            Forbidden { addr: u64, len: u32 },
            #[error("range [{addr:#x}; +{len}] touches a read-only region")]
            ReadOnly { addr: u64, len: u32 },
        }
    } else {
        /// A host-supplied address range was denied by the configured rules
        #[derive(Debug, Clone, Copy, PartialEq, Eq)]
        pub enum AccessError {
            Forbidden { addr: u64, len: u32 },
            ReadOnly { addr: u64, len: u32 },
        }
    }
}

impl From<AccessError> for ResponseCode {
    fn from(_: AccessError) -> Self {
        // Both denial kinds surface as the same code on the wire.
        ResponseCode::Forbidden
    }
}

// ----------------------------------------------------------------------------
// Transmission Errors
// ----------------------------------------------------------------------------

cfg_if::cfg_if! {
    if #[cfg(feature = "std")] {
        /// Failures when handing a response to the transmitter
        #[derive(Debug, Clone, Copy, PartialEq, Eq, thiserror::Error)]
        pub enum TxError {
            #[error("a previous response is still draining")]
            Busy,
            #[error("response of {len} bytes exceeds transmit capacity {capacity}")]
            Overflow { len: u16, capacity: u16 },
        }
    } else {
        /// Failures when handing a response to the transmitter
        #[derive(Debug, Clone, Copy, PartialEq, Eq)]
        pub enum TxError {
            Busy,
            Overflow { len: u16, capacity: u16 },
        }
    }
}

// ----------------------------------------------------------------------------
// Unified Error
// ----------------------------------------------------------------------------

cfg_if::cfg_if! {
    if #[cfg(feature = "std")] {
        /// Any error the core can report to the embedding application
        #[derive(Debug, Clone, Copy, PartialEq, Eq, thiserror::Error)]
        pub enum TracewireError {
            #[error("configuration error: {0}")]
            Config(#[from] ConfigError),
            #[error("codec error: {0}")]
            Codec(#[from] CodecError),
            #[error("memory access denied: {0}")]
            Access(#[from] AccessError),
            #[error("transmit error: {0}")]
            Tx(#[from] TxError),
        }
    } else {
        /// Any error the core can report to the embedding application
        #[derive(Debug, Clone, Copy, PartialEq, Eq)]
        pub enum TracewireError {
            Config(ConfigError),
            Codec(CodecError),
            Access(AccessError),
            Tx(TxError),
        }

        impl From<ConfigError> for TracewireError {
            fn from(err: ConfigError) -> Self {
                TracewireError::Config(err)
            }
        }

        impl From<CodecError> for TracewireError {
            fn from(err: CodecError) -> Self {
                TracewireError::Codec(err)
            }
        }

        impl From<AccessError> for TracewireError {
            fn from(err: AccessError) -> Self {
                TracewireError::Access(err)
            }
        }

        impl From<TxError> for TracewireError {
            fn from(err: TxError) -> Self {
                TracewireError::Tx(err)
            }
        }
    }
}

pub type Result<T> = core::result::Result<T, TracewireError>;

// ----------------------------------------------------------------------------
// Tests
// ----------------------------------------------------------------------------

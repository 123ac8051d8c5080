//! Tracewire device-side protocol core
//!
//! This crate is the embedded half of the tracewire debug/telemetry link: a
//! self-contained request/response engine that a target firmware embeds next
//! to its main loop. A host tool sends framed binary commands over any byte
//! stream (UART, UDP, a pipe in tests); the core validates each frame,
//! services it against live memory and a few control facilities, and queues
//! exactly one framed response.
//!
//! ## Architecture Overview
//!
//! The core is a sans-io state machine. It never blocks, never spawns, and
//! never allocates after construction: all buffers are fixed arrays sized by
//! the constants in [`config`], and progress happens only when the host
//! application calls [`MainHandler::process`] once per tick.
//!
//! **Responsibilities by module:**
//! - [`timebase`]: the monotonic microsecond clock the application advances
//!   each tick, used for heartbeat and reception deadlines
//! - [`config`]: the immutable device configuration (protected address
//!   ranges, software id, buffer overrides) copied in at init
//! - [`memory`]: the access-control checks for host-supplied address ranges
//!   and the raw memory primitives they guard
//! - [`protocol`]: framing, CRC validation, the reception/transmission state
//!   machines, session liveness, and the wire codec
//! - [`handler`]: the tick loop that dispatches validated requests to the
//!   command processors
//!
//! ## Usage
//!
//! ```rust
//! use tracewire_core::{DeviceConfig, MainHandler};
//!
//! let mut config = DeviceConfig::new();
//! config.add_forbidden_range(0x1000, 0x1FFF).unwrap();
//!
//! let mut core = MainHandler::new(&config);
//!
//! // Each iteration of the application's main loop:
//! let ingress: &[u8] = &[];    // bytes read from the transport
//! core.receive_data(ingress);
//! core.process(100);           // microseconds since the previous tick
//! let mut egress = [0u8; 64];
//! let n = core.pop_data(&mut egress);
//! // write egress[..n] to the transport
//! ```
//!
//! The transport itself is out of scope: the application moves bytes between
//! its driver and [`MainHandler::receive_data`] / [`MainHandler::pop_data`].

#![cfg_attr(not(feature = "std"), no_std)]

// ----------------------------------------------------------------------------
// Module Declarations
// ----------------------------------------------------------------------------

pub mod config;
pub mod errors;
pub mod handler;
pub mod memory;
pub mod protocol;
pub mod timebase;
pub mod types;

// ----------------------------------------------------------------------------
// Public API
// ----------------------------------------------------------------------------

pub use config::{AddressRange, DeviceConfig};
pub use errors::{AccessError, CodecError, ConfigError, TracewireError, TxError};
pub use handler::MainHandler;
pub use memory::MemoryPolicy;
pub use protocol::comm::CommHandler;
pub use protocol::frame::{Request, Response};
pub use timebase::Timebase;
pub use types::{
    CommandId, FeatureFlags, ProtocolVersion, RegionType, ResponseCode, PROTOCOL_VERSION,
};

//! In-memory byte link
//!
//! Wraps a [`MainHandler`] in the byte-moving loop a real host application
//! would run around its transport driver: deliver ingress, tick the core,
//! drain egress. Tests talk frames to [`DeviceLink::transact`] and get the
//! parsed response back, or drive time directly with [`DeviceLink::advance`]
//! for the liveness scenarios.

use log::trace;
use tracewire_core::{DeviceConfig, MainHandler};

use crate::frames::{decode_response, encode_request, FrameError, HostResponse};

/// How far one `process` call advances the device clock by default.
const DEFAULT_TICK_US: u32 = 100;

/// Ticks `transact` spends waiting before declaring the device silent.
const SILENCE_TICKS: u32 = 64;

// ----------------------------------------------------------------------------
// Link Errors
// ----------------------------------------------------------------------------

/// Failures observed from the host end of the link
#[derive(Debug, Clone, Copy, PartialEq, Eq, thiserror::Error)]
pub enum LinkError {
    /// The device produced no frame; expected for dropped requests
    #[error("device stayed silent")]
    NoResponse,
    #[error("unusable response frame: {0}")]
    Frame(#[from] FrameError),
}

// ----------------------------------------------------------------------------
// Device Link
// ----------------------------------------------------------------------------

/// A core instance plus the host-side pump around it
pub struct DeviceLink {
    core: MainHandler,
    tick_us: u32,
}

impl DeviceLink {
    pub fn new(config: &DeviceConfig) -> Self {
        Self {
            core: MainHandler::new(config),
            tick_us: DEFAULT_TICK_US,
        }
    }

    /// Use a custom tick length for time-sensitive scenarios
    pub fn with_tick(config: &DeviceConfig, tick_us: u32) -> Self {
        Self {
            core: MainHandler::new(config),
            tick_us,
        }
    }

    /// Force-connect the device end, skipping the discover exchange
    pub fn connect(&mut self) {
        self.core.connect();
    }

    pub fn core(&self) -> &MainHandler {
        &self.core
    }

    pub fn core_mut(&mut self) -> &mut MainHandler {
        &mut self.core
    }

    /// Let device time pass without any traffic
    pub fn advance(&mut self, us: u64) {
        let mut remaining = us;
        while remaining > 0 {
            let step = remaining.min(u64::from(self.tick_us)) as u32;
            self.core.process(step);
            remaining -= u64::from(step);
        }
    }

    /// Deliver one request frame and collect the raw response frame, if any
    pub fn transact(&mut self, frame: &[u8]) -> Option<Vec<u8>> {
        let mut pending = frame;
        let mut egress = Vec::new();
        let mut chunk = [0u8; 64];

        for _ in 0..SILENCE_TICKS {
            if !pending.is_empty() {
                let accepted = self.core.receive_data(pending);
                pending = &pending[accepted..];
            }
            self.core.process(self.tick_us);
            loop {
                let n = self.core.pop_data(&mut chunk);
                if n == 0 {
                    break;
                }
                egress.extend_from_slice(&chunk[..n]);
            }
            if pending.is_empty() && !self.core.comm().transmitting() && !egress.is_empty() {
                break;
            }
        }

        trace!("transact: {} bytes in, {} bytes out", frame.len(), egress.len());
        if egress.is_empty() {
            None
        } else {
            Some(egress)
        }
    }

    /// Send a command and parse the device's answer
    pub fn request(
        &mut self,
        command_id: u8,
        subfunction_id: u8,
        data: &[u8],
    ) -> Result<HostResponse, LinkError> {
        let frame = encode_request(command_id, subfunction_id, data);
        let egress = self.transact(&frame).ok_or(LinkError::NoResponse)?;
        Ok(decode_response(&egress)?)
    }
}

// ----------------------------------------------------------------------------
// Tests
// ----------------------------------------------------------------------------

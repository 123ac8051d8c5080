//! Main handler: the tick loop and command dispatch
//!
//! One [`MainHandler`] is one independent instance of the core. The
//! embedding application constructs it with a [`DeviceConfig`], moves bytes
//! in and out around its own transport, and calls [`MainHandler::process`]
//! once per tick. Everything else happens in here: the comm handler is
//! advanced, a validated request (if any) is dispatched to its command
//! processor, and the finished response is handed back for draining.
//!
//! Dispatch is a static match on the command and subfunction bytes. Command
//! processors use the codec for all byte formatting and go through
//! [`MemoryPolicy`] before any live memory access.

use log::debug;

use crate::config::{DeviceConfig, HEARTBEAT_TIMEOUT_US, RX_TIMEOUT_US};
use crate::memory::{self, MemoryPolicy};
use crate::protocol::codec::{
    self, CommParams, ReadRequestParser, ReadResponseEncoder, WriteRequestParser,
    WriteResponseEncoder, DISCOVER_CHALLENGE_SIZE,
};
use crate::protocol::comm::{CommHandler, SessionState};
use crate::protocol::frame::{Request, Response};
use crate::timebase::Timebase;
use crate::types::{
    CommControlSubfunction, CommandId, FeatureFlags, GetInfoSubfunction,
    MemoryControlSubfunction, ResponseCode, PROTOCOL_VERSION,
};

// ----------------------------------------------------------------------------
// Main Handler
// ----------------------------------------------------------------------------

/// The device-side core: timebase, comm handler, and command processors
pub struct MainHandler {
    timebase: Timebase,
    comm: CommHandler,
    config: DeviceConfig,
    policy: MemoryPolicy,
    processing_request: bool,
}

impl MainHandler {
    /// Build a core instance around a copy of `config`
    pub fn new(config: &DeviceConfig) -> Self {
        Self {
            timebase: Timebase::new(),
            comm: CommHandler::new(config),
            policy: MemoryPolicy::from_config(config),
            config: config.clone(),
            processing_request: false,
        }
    }

    /// Drop all state and re-arm with a new configuration
    pub fn init(&mut self, config: &DeviceConfig) {
        *self = Self::new(config);
    }

    /// One cooperative tick: advance time, enforce deadlines, service at
    /// most one request.
    pub fn process(&mut self, delta_us: u32) {
        self.timebase.step(delta_us);
        self.comm.process(&self.timebase);

        if self.comm.request_received() && !self.processing_request {
            self.processing_request = true;
            let now = self.timebase.now_us();
            let meta = {
                let (request, mut response, session) = self.comm.exchange();
                Self::process_request(
                    &self.config,
                    &self.policy,
                    now,
                    &request,
                    &mut response,
                    session,
                );
                response.meta()
            };
            if meta.valid {
                if let Err(err) = self.comm.commit_response(meta) {
                    debug!("response dropped: {:?}", err);
                }
            }
        }

        if self.processing_request && !self.comm.transmitting() {
            // The response is fully queued; reception may resume.
            self.comm.request_processed();
            self.processing_request = false;
        }
    }

    /// Deliver ingress bytes. Returns how many were accepted.
    pub fn receive_data(&mut self, data: &[u8]) -> usize {
        self.comm.receive_data(data, &self.timebase)
    }

    /// Response bytes waiting to be drained
    pub fn data_to_send(&self) -> u32 {
        self.comm.data_to_send()
    }

    /// Drain response bytes into `dst`
    pub fn pop_data(&mut self, dst: &mut [u8]) -> usize {
        self.comm.pop_data(dst)
    }

    /// Force the session up without a discover exchange. Test/local hosts only.
    pub fn connect(&mut self) {
        self.comm.connect(&self.timebase);
    }

    pub fn comm(&self) -> &CommHandler {
        &self.comm
    }

    pub fn timebase(&self) -> &Timebase {
        &self.timebase
    }

    pub fn config(&self) -> &DeviceConfig {
        &self.config
    }

    // ------------------------------------------------------------------------
    // Dispatch
    // ------------------------------------------------------------------------

    fn process_request(
        config: &DeviceConfig,
        policy: &MemoryPolicy,
        now_us: u64,
        request: &Request<'_>,
        response: &mut Response<'_>,
        session: &mut SessionState,
    ) {
        response.prepare(request.command_id, request.subfunction_id);

        let result = match CommandId::from_u8(request.command_id) {
            Some(CommandId::GetInfo) => Self::process_get_info(config, policy, request, response),
            Some(CommandId::CommControl) => {
                Self::process_comm_control(config, now_us, request, response, session)
            }
            Some(CommandId::MemoryControl) => {
                Self::process_memory_control(policy, request, response)
            }
            // Reserved command groups: wire-reachable, not serviced.
            Some(CommandId::DataLogControl) | Some(CommandId::UserCommand) | None => {
                Err(ResponseCode::UnsupportedFeature)
            }
        };

        match result {
            Ok(()) => response.response_code = ResponseCode::Ok,
            Err(code) => {
                response.response_code = code;
                response.clear_data();
            }
        }
    }

    fn process_get_info(
        config: &DeviceConfig,
        policy: &MemoryPolicy,
        request: &Request<'_>,
        response: &mut Response<'_>,
    ) -> Result<(), ResponseCode> {
        match GetInfoSubfunction::from_u8(request.subfunction_id) {
            Some(GetInfoSubfunction::ProtocolVersion) => {
                codec::encode_protocol_version(response, PROTOCOL_VERSION)?;
            }
            Some(GetInfoSubfunction::SoftwareId) => {
                codec::encode_software_id(response, config.software_id())?;
            }
            Some(GetInfoSubfunction::SupportedFeatures) => {
                codec::encode_supported_features(response, FeatureFlags::advertised())?;
            }
            Some(GetInfoSubfunction::SpecialRegionCount) => {
                codec::encode_special_region_count(
                    response,
                    policy.readonly_count() as u8,
                    policy.forbidden_count() as u8,
                )?;
            }
            Some(GetInfoSubfunction::SpecialRegionLocation) => {
                let (kind, index) = codec::decode_special_region_location(request)?;
                let range = policy
                    .region(kind, index)
                    .ok_or(ResponseCode::FailureToProceed)?;
                codec::encode_special_region_location(response, kind, index, range)?;
            }
            None => return Err(ResponseCode::UnsupportedFeature),
        }
        Ok(())
    }

    fn process_comm_control(
        config: &DeviceConfig,
        now_us: u64,
        request: &Request<'_>,
        response: &mut Response<'_>,
        session: &mut SessionState,
    ) -> Result<(), ResponseCode> {
        match CommControlSubfunction::from_u8(request.subfunction_id) {
            Some(CommControlSubfunction::Discover) => {
                let challenge = codec::decode_discover(request)?;
                let echo: [u8; DISCOVER_CHALLENGE_SIZE] =
                    core::array::from_fn(|i| !challenge[i]);
                codec::encode_discover(response, &echo)?;
            }
            Some(CommControlSubfunction::Heartbeat) => {
                let challenge = codec::decode_heartbeat(request)?;
                if !session.heartbeat(challenge, now_us) {
                    return Err(ResponseCode::InvalidRequest);
                }
                codec::encode_heartbeat(response, !challenge)?;
            }
            Some(CommControlSubfunction::GetParams) => {
                codec::encode_comm_params(
                    response,
                    &CommParams {
                        rx_data_size: config.rx_data_size(),
                        tx_data_size: config.tx_data_size(),
                        max_bitrate: config.max_bitrate(),
                        heartbeat_timeout_us: HEARTBEAT_TIMEOUT_US,
                        rx_timeout_us: RX_TIMEOUT_US,
                    },
                )?;
            }
            None => return Err(ResponseCode::UnsupportedFeature),
        }
        Ok(())
    }

    fn process_memory_control(
        policy: &MemoryPolicy,
        request: &Request<'_>,
        response: &mut Response<'_>,
    ) -> Result<(), ResponseCode> {
        match MemoryControlSubfunction::from_u8(request.subfunction_id) {
            Some(MemoryControlSubfunction::Read) => {
                Self::process_memory_read(policy, request, response)
            }
            Some(MemoryControlSubfunction::Write) => {
                Self::process_memory_write(policy, request, response)
            }
            None => Err(ResponseCode::UnsupportedFeature),
        }
    }

    fn process_memory_read(
        policy: &MemoryPolicy,
        request: &Request<'_>,
        response: &mut Response<'_>,
    ) -> Result<(), ResponseCode> {
        let parser = ReadRequestParser::new(request)?;

        // Every record must pass the rules before any memory is touched.
        let mut scan = parser.clone();
        while let Some(record) = scan.next() {
            policy.allow_read(record.addr, u32::from(record.len))?;
        }

        if parser.required_tx_size() > response.capacity() {
            return Err(ResponseCode::Overflow);
        }

        let mut records = parser;
        let mut encoder = ReadResponseEncoder::new(response);
        while let Some(record) = records.next() {
            let slot = encoder.begin_block(record.addr, record.len)?;
            // SAFETY: the record passed the configured access rules above,
            // which are the contract for host-supplied addresses.
            unsafe { memory::copy_from_host(record.addr, slot) };
        }
        Ok(())
    }

    fn process_memory_write(
        policy: &MemoryPolicy,
        request: &Request<'_>,
        response: &mut Response<'_>,
    ) -> Result<(), ResponseCode> {
        let parser = WriteRequestParser::new(request)?;

        let mut scan = parser.clone();
        while let Some(record) = scan.next() {
            policy.allow_write(record.addr, record.data.len() as u32)?;
        }

        if parser.ack_size() > response.capacity() {
            return Err(ResponseCode::Overflow);
        }

        let mut records = parser;
        let mut encoder = WriteResponseEncoder::new(response);
        while let Some(record) = records.next() {
            // SAFETY: the record passed the configured access rules above.
            unsafe { memory::copy_to_host(record.addr, record.data) };
            encoder.write_ack(record.addr, record.data.len() as u16)?;
        }
        Ok(())
    }
}

// ----------------------------------------------------------------------------
// Tests
// ----------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;
    use crate::protocol::crc::frame_crc;
    use crate::protocol::frame::request_header;

    type Bytes = heapless::Vec<u8, 512>;

    fn frame(command_id: u8, subfunction_id: u8, data: &[u8]) -> Bytes {
        let mut out = Bytes::new();
        let header = request_header(command_id, subfunction_id, data.len() as u16);
        out.extend_from_slice(&header).unwrap();
        out.extend_from_slice(data).unwrap();
        out.extend_from_slice(&frame_crc(&header, data).to_be_bytes())
            .unwrap();
        out
    }

    /// Feed one frame, tick, and drain whatever comes back.
    fn roundtrip(core: &mut MainHandler, ingress: &[u8]) -> Bytes {
        assert_eq!(core.receive_data(ingress), ingress.len());
        let mut egress = Bytes::new();
        let mut chunk = [0u8; 32];
        for _ in 0..64 {
            core.process(10);
            loop {
                let n = core.pop_data(&mut chunk);
                if n == 0 {
                    break;
                }
                egress.extend_from_slice(&chunk[..n]).unwrap();
            }
        }
        egress
    }

    fn connected_core() -> MainHandler {
        let mut core = MainHandler::new(&DeviceConfig::new());
        core.connect();
        core
    }

    #[test]
    fn discover_echoes_complemented_challenge() {
        let mut core = MainHandler::new(&DeviceConfig::new());
        let ingress = frame(2, 1, &[0, 1, 2, 3, 4, 5, 6, 7]);
        let egress = roundtrip(&mut core, &ingress);

        assert_eq!(&egress[..5], &[0x82, 0x01, 0x00, 0x00, 0x0C]);
        assert_eq!(&egress[5..9], &codec::DISCOVER_MAGIC);
        assert_eq!(
            &egress[9..17],
            &[0xFF, 0xFE, 0xFD, 0xFC, 0xFB, 0xFA, 0xF9, 0xF8]
        );
        let crc = frame_crc(&egress[..5], &egress[5..17]);
        assert_eq!(&egress[17..], &crc.to_be_bytes());
    }

    #[test]
    fn one_request_yields_exactly_one_response() {
        let mut core = MainHandler::new(&DeviceConfig::new());
        let ingress = frame(2, 1, &[0; 8]);
        let egress = roundtrip(&mut core, &ingress);
        assert!(!egress.is_empty());

        // Further ticks with no ingress must stay silent.
        let mut chunk = [0u8; 32];
        for _ in 0..16 {
            core.process(10);
            assert_eq!(core.pop_data(&mut chunk), 0);
        }
    }

    #[test]
    fn response_mirrors_command_and_subfunction() {
        let mut core = connected_core();
        let egress = roundtrip(&mut core, &frame(1, 3, &[]));
        assert_eq!(egress[0], 0x81);
        assert_eq!(egress[1], 3);
        assert_eq!(egress[2], ResponseCode::Ok.as_u8());
    }

    #[test]
    fn unknown_command_is_unsupported_with_empty_data() {
        let mut core = connected_core();
        let egress = roundtrip(&mut core, &frame(9, 1, &[]));
        assert_eq!(egress[2], ResponseCode::UnsupportedFeature.as_u8());
        assert_eq!(&egress[3..5], &[0, 0]);
    }

    #[test]
    fn reserved_commands_are_unsupported() {
        for command_id in [4u8, 5u8] {
            let mut core = connected_core();
            let egress = roundtrip(&mut core, &frame(command_id, 1, &[]));
            assert_eq!(egress[2], ResponseCode::UnsupportedFeature.as_u8());
        }
    }

    #[test]
    fn heartbeat_rejects_replayed_challenge() {
        let mut core = connected_core();

        let egress = roundtrip(&mut core, &frame(2, 2, &[0x12, 0x34]));
        assert_eq!(egress[2], ResponseCode::Ok.as_u8());
        assert_eq!(&egress[5..7], &[0xED, 0xCB]); // !0x1234

        let egress = roundtrip(&mut core, &frame(2, 2, &[0x12, 0x34]));
        assert_eq!(egress[2], ResponseCode::InvalidRequest.as_u8());
        assert_eq!(&egress[3..5], &[0, 0]);

        let egress = roundtrip(&mut core, &frame(2, 2, &[0x12, 0x35]));
        assert_eq!(egress[2], ResponseCode::Ok.as_u8());
    }

    #[test]
    fn memory_read_returns_live_bytes() {
        let mut core = connected_core();
        let target = [0x11u8, 0x22, 0x33];
        let addr = target.as_ptr() as usize as u64;

        let mut body = Bytes::new();
        let mut addr_bytes = [0u8; codec::WIRE_ADDRESS_SIZE];
        codec::encode_address(&mut addr_bytes, addr);
        body.extend_from_slice(&addr_bytes).unwrap();
        body.extend_from_slice(&[0x00, 0x03]).unwrap();

        let egress = roundtrip(&mut core, &frame(3, 1, &body));
        assert_eq!(egress[2], ResponseCode::Ok.as_u8());
        let data_start = 5 + codec::WIRE_ADDRESS_SIZE + 2;
        assert_eq!(&egress[data_start..data_start + 3], &[0x11, 0x22, 0x33]);
    }

    #[test]
    fn misaligned_read_body_is_invalid() {
        let mut core = connected_core();
        let egress = roundtrip(&mut core, &frame(3, 1, &[0u8; 5]));
        assert_eq!(egress[2], ResponseCode::InvalidRequest.as_u8());
        assert_eq!(&egress[3..5], &[0, 0]);
    }

    #[test]
    fn forbidden_read_is_denied_with_empty_data() {
        let buffer = [0u8; 16];
        let base = buffer.as_ptr() as usize as u64;

        let mut config = DeviceConfig::new();
        config.add_forbidden_range(base, base + 15).unwrap();
        let mut core = MainHandler::new(&config);
        core.connect();

        let mut body = Bytes::new();
        let mut addr_bytes = [0u8; codec::WIRE_ADDRESS_SIZE];
        codec::encode_address(&mut addr_bytes, base + 4);
        body.extend_from_slice(&addr_bytes).unwrap();
        body.extend_from_slice(&[0x00, 0x02]).unwrap();

        let egress = roundtrip(&mut core, &frame(3, 1, &body));
        assert_eq!(egress[2], ResponseCode::Forbidden.as_u8());
        assert_eq!(&egress[3..5], &[0, 0]);
    }

    #[test]
    fn write_to_readonly_region_leaves_memory_untouched() {
        let target = [0xA5u8; 4];
        let base = target.as_ptr() as usize as u64;

        let mut config = DeviceConfig::new();
        config.add_readonly_range(base, base + 3).unwrap();
        let mut core = MainHandler::new(&config);
        core.connect();

        let mut body = Bytes::new();
        let mut addr_bytes = [0u8; codec::WIRE_ADDRESS_SIZE];
        codec::encode_address(&mut addr_bytes, base);
        body.extend_from_slice(&addr_bytes).unwrap();
        body.extend_from_slice(&[0x00, 0x04]).unwrap();
        body.extend_from_slice(&[0, 0, 0, 0]).unwrap();

        let egress = roundtrip(&mut core, &frame(3, 2, &body));
        assert_eq!(egress[2], ResponseCode::Forbidden.as_u8());
        assert_eq!(target, [0xA5; 4]);
    }

    #[test]
    fn oversized_read_reports_overflow_before_touching_memory() {
        let mut core = connected_core();
        let record_len = (crate::config::MAX_TX_DATA_SIZE
            - codec::MEMORY_RECORD_HEADER_SIZE) as u16
            + 1;

        let mut body = Bytes::new();
        let mut addr_bytes = [0u8; codec::WIRE_ADDRESS_SIZE];
        // The address is never dereferenced: capacity is checked first.
        codec::encode_address(&mut addr_bytes, 0xDEAD_0000);
        body.extend_from_slice(&addr_bytes).unwrap();
        body.extend_from_slice(&record_len.to_be_bytes()).unwrap();

        let egress = roundtrip(&mut core, &frame(3, 1, &body));
        assert_eq!(egress[2], ResponseCode::Overflow.as_u8());
        assert_eq!(&egress[3..5], &[0, 0]);
    }

    #[test]
    fn get_params_reports_configured_buffers() {
        let mut config = DeviceConfig::new();
        config.set_rx_data_size(64).unwrap();
        config.set_max_bitrate(115_200);
        let mut core = MainHandler::new(&config);
        core.connect();

        let egress = roundtrip(&mut core, &frame(2, 3, &[]));
        assert_eq!(egress[2], ResponseCode::Ok.as_u8());
        let data = &egress[5..21];
        assert_eq!(&data[..2], &64u16.to_be_bytes());
        assert_eq!(
            &data[2..4],
            &(crate::config::MAX_TX_DATA_SIZE as u16).to_be_bytes()
        );
        assert_eq!(&data[4..8], &115_200u32.to_be_bytes());
        assert_eq!(&data[8..12], &HEARTBEAT_TIMEOUT_US.to_be_bytes());
        assert_eq!(&data[12..16], &RX_TIMEOUT_US.to_be_bytes());
    }

    #[test]
    fn special_region_queries_describe_the_configuration() {
        let mut config = DeviceConfig::new();
        config.add_forbidden_range(0x1000, 0x1FFF).unwrap();
        config.add_readonly_range(0x2000, 0x2FFF).unwrap();
        config.add_readonly_range(0x4000, 0x4FFF).unwrap();
        let mut core = MainHandler::new(&config);
        core.connect();

        let egress = roundtrip(&mut core, &frame(1, 4, &[]));
        assert_eq!(&egress[5..7], &[2, 1]); // readonly count, forbidden count

        let egress = roundtrip(&mut core, &frame(1, 5, &[0x00, 0x01]));
        assert_eq!(egress[2], ResponseCode::Ok.as_u8());
        assert_eq!(&egress[5..7], &[0x00, 0x01]);
        let addr_at = |offset: usize| {
            codec::decode_address(&egress[offset..offset + codec::WIRE_ADDRESS_SIZE])
        };
        assert_eq!(addr_at(7), 0x4000);
        assert_eq!(addr_at(7 + codec::WIRE_ADDRESS_SIZE), 0x4FFF);

        // Out-of-range index cannot be serviced.
        let egress = roundtrip(&mut core, &frame(1, 5, &[0x01, 0x07]));
        assert_eq!(egress[2], ResponseCode::FailureToProceed.as_u8());
    }
}

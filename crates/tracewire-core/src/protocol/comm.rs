//! Byte-stream communication handler
//!
//! Turns the noisy ingress stream into at most one validated request at a
//! time, and drains at most one response at a time. The handler is half
//! duplex by construction: while a request is being serviced or its response
//! is draining, new ingress bytes are not accepted.
//!
//! Frame-level damage (bad CRC, oversized length, a stalled partial frame)
//! is dropped silently, as expected over a noisy physical layer. Session
//! liveness is enforced here too: the device stays quiet until a valid
//! discover frame arrives, connects on the first valid frame after it, and
//! drops the session when the heartbeat deadline passes.

use log::{debug, warn};

use crate::config::{
    DeviceConfig, HEARTBEAT_TIMEOUT_US, MAX_RX_DATA_SIZE, MAX_TX_DATA_SIZE, RX_TIMEOUT_US,
};
use crate::errors::TxError;
use crate::protocol::crc::frame_crc;
use crate::protocol::frame::{
    request_header, response_header, Request, Response, ResponseMeta, CRC_SIZE,
    RESPONSE_HEADER_SIZE, RESPONSE_MARKER,
};
use crate::timebase::Timebase;
use crate::types::{CommControlSubfunction, CommandId};

// ----------------------------------------------------------------------------
// Session State
// ----------------------------------------------------------------------------

/// Liveness state of the host link
#[derive(Debug, Clone, Copy)]
pub(crate) struct SessionState {
    connected: bool,
    discovery_seen: bool,
    session_id: u32,
    last_heartbeat_us: u64,
    last_challenge: Option<u16>,
}

impl SessionState {
    fn new() -> Self {
        Self {
            connected: false,
            discovery_seen: false,
            session_id: 0,
            last_heartbeat_us: 0,
            last_challenge: None,
        }
    }

    fn connect(&mut self, now_us: u64) {
        self.connected = true;
        self.session_id = derive_session_id(now_us);
        self.last_heartbeat_us = now_us;
        self.last_challenge = None;
    }

    fn disconnect(&mut self) {
        self.connected = false;
        self.discovery_seen = false;
        self.last_challenge = None;
    }

    /// Accept or reject a heartbeat challenge.
    ///
    /// A challenge is accepted when the session is connected and the value
    /// differs from the previously accepted one; acceptance refreshes the
    /// liveness deadline.
    pub(crate) fn heartbeat(&mut self, challenge: u16, now_us: u64) -> bool {
        if !self.connected {
            return false;
        }
        if self.last_challenge == Some(challenge) {
            return false;
        }
        self.last_challenge = Some(challenge);
        self.last_heartbeat_us = now_us;
        true
    }

    pub(crate) fn connected(&self) -> bool {
        self.connected
    }

    pub(crate) fn session_id(&self) -> u32 {
        self.session_id
    }
}

/// A session id only needs to differ between consecutive sessions.
fn derive_session_id(now_us: u64) -> u32 {
    let folded = (now_us as u32) ^ ((now_us >> 32) as u32);
    folded.wrapping_mul(0x9E37_79B9) | 1
}

// ----------------------------------------------------------------------------
// Reception State Machine
// ----------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum RxState {
    /// Waiting for the command byte of a new frame
    Idle,
    Subfunction,
    Length,
    Payload,
    Crc,
    /// A CRC-valid request is waiting for the main handler
    Ready,
    /// Swallowing a frame whose declared length exceeds capacity
    Discard,
}

// ----------------------------------------------------------------------------
// Comm Handler
// ----------------------------------------------------------------------------

/// Framer, transmitter, and session keeper for one host link
pub struct CommHandler {
    // Reception
    rx_buffer: [u8; MAX_RX_DATA_SIZE],
    rx_state: RxState,
    rx_command_id: u8,
    rx_subfunction_id: u8,
    rx_data_len: u16,
    rx_len_bytes: u8,
    rx_data_received: u16,
    rx_crc: u32,
    rx_crc_bytes: u8,
    rx_discard_remaining: u32,
    rx_capacity: u16,
    last_rx_us: u64,
    request_pending: bool,

    // Transmission
    tx_buffer: [u8; MAX_TX_DATA_SIZE],
    tx_header: [u8; RESPONSE_HEADER_SIZE],
    tx_crc: [u8; CRC_SIZE],
    tx_data_len: u16,
    tx_sent: u32,
    tx_total: u32,
    tx_capacity: u16,

    session: SessionState,
}

impl CommHandler {
    pub fn new(config: &DeviceConfig) -> Self {
        Self {
            rx_buffer: [0; MAX_RX_DATA_SIZE],
            rx_state: RxState::Idle,
            rx_command_id: 0,
            rx_subfunction_id: 0,
            rx_data_len: 0,
            rx_len_bytes: 0,
            rx_data_received: 0,
            rx_crc: 0,
            rx_crc_bytes: 0,
            rx_discard_remaining: 0,
            rx_capacity: config.rx_data_size(),
            last_rx_us: 0,
            request_pending: false,
            tx_buffer: [0; MAX_TX_DATA_SIZE],
            tx_header: [0; RESPONSE_HEADER_SIZE],
            tx_crc: [0; CRC_SIZE],
            tx_data_len: 0,
            tx_sent: 0,
            tx_total: 0,
            tx_capacity: config.tx_data_size(),
            session: SessionState::new(),
        }
    }

    /// Drop every in-flight frame and the session
    pub fn reset(&mut self) {
        self.reset_rx();
        self.reset_tx();
        self.session = SessionState::new();
    }

    /// Enforce the heartbeat deadline. Called once per tick.
    pub(crate) fn process(&mut self, timebase: &Timebase) {
        if self.session.connected
            && timebase.is_elapsed(self.session.last_heartbeat_us, HEARTBEAT_TIMEOUT_US)
        {
            warn!(
                "session {:08x} missed its heartbeat deadline",
                self.session.session_id
            );
            self.session.disconnect();
            self.reset_rx();
            self.reset_tx();
        }
    }

    /// Feed ingress bytes into the framer. Returns how many were accepted.
    ///
    /// While a request is in flight nothing is accepted; the host retries
    /// the remainder after the response drains.
    pub fn receive_data(&mut self, data: &[u8], timebase: &Timebase) -> usize {
        if data.is_empty() || self.request_pending {
            return 0;
        }

        // A partial frame that stalled for too long is line noise.
        if self.rx_state != RxState::Idle && timebase.is_elapsed(self.last_rx_us, RX_TIMEOUT_US) {
            debug!("dropping stalled partial frame");
            self.reset_rx();
        }
        self.last_rx_us = timebase.now_us();

        let mut i = 0;
        while i < data.len() && !self.request_pending {
            match self.rx_state {
                RxState::Idle => {
                    self.rx_command_id = data[i] & !RESPONSE_MARKER;
                    self.rx_state = RxState::Subfunction;
                    i += 1;
                }
                RxState::Subfunction => {
                    self.rx_subfunction_id = data[i];
                    self.rx_state = RxState::Length;
                    i += 1;
                }
                RxState::Length => {
                    self.rx_data_len = (self.rx_data_len << 8) | u16::from(data[i]);
                    self.rx_len_bytes += 1;
                    i += 1;
                    if self.rx_len_bytes == 2 {
                        if self.rx_data_len > self.rx_capacity {
                            debug!(
                                "declared length {} exceeds capacity {}, discarding frame",
                                self.rx_data_len, self.rx_capacity
                            );
                            self.rx_discard_remaining =
                                u32::from(self.rx_data_len) + CRC_SIZE as u32;
                            self.rx_state = RxState::Discard;
                        } else if self.rx_data_len == 0 {
                            self.rx_state = RxState::Crc;
                        } else {
                            self.rx_state = RxState::Payload;
                        }
                    }
                }
                RxState::Payload => {
                    let missing = usize::from(self.rx_data_len - self.rx_data_received);
                    let take = missing.min(data.len() - i);
                    let start = usize::from(self.rx_data_received);
                    self.rx_buffer[start..start + take].copy_from_slice(&data[i..i + take]);
                    self.rx_data_received += take as u16;
                    i += take;
                    if self.rx_data_received == self.rx_data_len {
                        self.rx_state = RxState::Crc;
                    }
                }
                RxState::Crc => {
                    self.rx_crc = (self.rx_crc << 8) | u32::from(data[i]);
                    self.rx_crc_bytes += 1;
                    i += 1;
                    if self.rx_crc_bytes as usize == CRC_SIZE {
                        self.finish_frame(timebase);
                    }
                }
                RxState::Discard => {
                    let take = (self.rx_discard_remaining as usize).min(data.len() - i);
                    self.rx_discard_remaining -= take as u32;
                    i += take;
                    if self.rx_discard_remaining == 0 {
                        self.reset_rx();
                    }
                }
                RxState::Ready => break,
            }
        }
        i
    }

    /// Validate the completed frame and decide whether it becomes a request
    fn finish_frame(&mut self, timebase: &Timebase) {
        let header = request_header(self.rx_command_id, self.rx_subfunction_id, self.rx_data_len);
        let computed = frame_crc(&header, &self.rx_buffer[..usize::from(self.rx_data_len)]);
        if computed != self.rx_crc {
            debug!("frame crc mismatch, dropping");
            self.reset_rx();
            return;
        }

        let is_discover = self.rx_command_id == CommandId::CommControl.as_u8()
            && self.rx_subfunction_id == CommControlSubfunction::Discover as u8;
        if is_discover {
            // Discover is answered in any state and opens the gate for the
            // commands that follow it.
            self.session.discovery_seen = true;
        } else if !self.session.discovery_seen {
            debug!("dropping request received before discovery");
            self.reset_rx();
            return;
        } else if !self.session.connected {
            self.session.connect(timebase.now_us());
            debug!("session {:08x} connected", self.session.session_id);
        }

        self.rx_state = RxState::Ready;
        self.request_pending = true;
    }

    /// True while a validated request waits for the main handler
    pub fn request_received(&self) -> bool {
        self.request_pending
    }

    /// Views over the pending request, the response under construction, and
    /// the session, borrowed disjointly for one dispatch.
    pub(crate) fn exchange(&mut self) -> (Request<'_>, Response<'_>, &mut SessionState) {
        let request = Request {
            command_id: self.rx_command_id,
            subfunction_id: self.rx_subfunction_id,
            data: &self.rx_buffer[..usize::from(self.rx_data_len)],
        };
        let response = Response::new(&mut self.tx_buffer[..usize::from(self.tx_capacity)]);
        (request, response, &mut self.session)
    }

    /// Seal the response payload already in the transmit buffer and start
    /// draining it.
    pub(crate) fn commit_response(&mut self, meta: ResponseMeta) -> Result<(), TxError> {
        if self.transmitting() {
            return Err(TxError::Busy);
        }
        if meta.data_len > self.tx_capacity {
            return Err(TxError::Overflow {
                len: meta.data_len,
                capacity: self.tx_capacity,
            });
        }

        let header = response_header(
            meta.command_id,
            meta.subfunction_id,
            meta.response_code.as_u8(),
            meta.data_len,
        );
        let crc = frame_crc(&header, &self.tx_buffer[..usize::from(meta.data_len)]);

        self.tx_header = header;
        self.tx_crc = crc.to_be_bytes();
        self.tx_data_len = meta.data_len;
        self.tx_sent = 0;
        self.tx_total = (RESPONSE_HEADER_SIZE + usize::from(meta.data_len) + CRC_SIZE) as u32;
        Ok(())
    }

    /// Bytes of response frame still to drain
    pub fn data_to_send(&self) -> u32 {
        self.tx_total - self.tx_sent
    }

    /// True while a response frame is draining
    pub fn transmitting(&self) -> bool {
        self.tx_sent < self.tx_total
    }

    /// Drain up to `dst.len()` response bytes. Returns how many were copied.
    pub fn pop_data(&mut self, dst: &mut [u8]) -> usize {
        let mut produced = 0;
        let data_end = RESPONSE_HEADER_SIZE + usize::from(self.tx_data_len);

        while produced < dst.len() && self.tx_sent < self.tx_total {
            let pos = self.tx_sent as usize;
            let (segment, offset): (&[u8], usize) = if pos < RESPONSE_HEADER_SIZE {
                (&self.tx_header, pos)
            } else if pos < data_end {
                (
                    &self.tx_buffer[..usize::from(self.tx_data_len)],
                    pos - RESPONSE_HEADER_SIZE,
                )
            } else {
                (&self.tx_crc, pos - data_end)
            };

            let take = (segment.len() - offset).min(dst.len() - produced);
            dst[produced..produced + take].copy_from_slice(&segment[offset..offset + take]);
            produced += take;
            self.tx_sent += take as u32;
        }

        if self.tx_total > 0 && self.tx_sent >= self.tx_total {
            self.reset_tx();
        }
        produced
    }

    /// Release the in-flight request and resume reception
    pub fn request_processed(&mut self) {
        self.reset_rx();
    }

    /// Force the session up without a discover exchange. Test/local hosts only.
    pub fn connect(&mut self, timebase: &Timebase) {
        self.session.discovery_seen = true;
        self.session.connect(timebase.now_us());
    }

    pub fn connected(&self) -> bool {
        self.session.connected()
    }

    pub fn session_id(&self) -> u32 {
        self.session.session_id()
    }

    fn reset_rx(&mut self) {
        self.rx_state = RxState::Idle;
        self.rx_command_id = 0;
        self.rx_subfunction_id = 0;
        self.rx_data_len = 0;
        self.rx_len_bytes = 0;
        self.rx_data_received = 0;
        self.rx_crc = 0;
        self.rx_crc_bytes = 0;
        self.rx_discard_remaining = 0;
        self.request_pending = false;
    }

    fn reset_tx(&mut self) {
        self.tx_data_len = 0;
        self.tx_sent = 0;
        self.tx_total = 0;
    }
}

// ----------------------------------------------------------------------------
// Tests
// ----------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::ResponseCode;

    fn frame(command_id: u8, subfunction_id: u8, data: &[u8]) -> heapless::Vec<u8, 160> {
        let mut out = heapless::Vec::new();
        let header = request_header(command_id, subfunction_id, data.len() as u16);
        out.extend_from_slice(&header).unwrap();
        out.extend_from_slice(data).unwrap();
        let crc = frame_crc(&header, data);
        out.extend_from_slice(&crc.to_be_bytes()).unwrap();
        out
    }

    fn discover_frame() -> heapless::Vec<u8, 160> {
        frame(2, 1, &[0, 1, 2, 3, 4, 5, 6, 7])
    }

    fn handler() -> (CommHandler, Timebase) {
        (CommHandler::new(&DeviceConfig::new()), Timebase::new())
    }

    #[test]
    fn accepts_a_frame_byte_by_byte() {
        let (mut comm, tb) = handler();
        let bytes = discover_frame();
        for (n, byte) in bytes.iter().enumerate() {
            assert!(!comm.request_received(), "ready after only {} bytes", n);
            assert_eq!(comm.receive_data(&[*byte], &tb), 1);
        }
        assert!(comm.request_received());

        let (request, _, _) = comm.exchange();
        assert_eq!(request.command_id, 2);
        assert_eq!(request.subfunction_id, 1);
        assert_eq!(request.data, &[0, 1, 2, 3, 4, 5, 6, 7]);
    }

    #[test]
    fn accepts_a_frame_in_one_burst() {
        let (mut comm, tb) = handler();
        let bytes = discover_frame();
        assert_eq!(comm.receive_data(&bytes, &tb), bytes.len());
        assert!(comm.request_received());
    }

    #[test]
    fn bad_crc_drops_silently() {
        let (mut comm, tb) = handler();
        let mut bytes = discover_frame();
        let last = bytes.len() - 1;
        bytes[last] ^= 0xFF;
        comm.receive_data(&bytes, &tb);
        assert!(!comm.request_received());

        // The framer must have fully recovered.
        comm.receive_data(&discover_frame(), &tb);
        assert!(comm.request_received());
    }

    #[test]
    fn oversized_frame_is_discarded_including_trailer() {
        let (mut comm, tb) = handler();
        let declared = MAX_RX_DATA_SIZE as u16 + 1;
        let mut bytes = heapless::Vec::<u8, 512>::new();
        bytes
            .extend_from_slice(&request_header(3, 1, declared))
            .unwrap();
        // Body + CRC of the oversized frame, then a valid discover.
        for _ in 0..declared as usize + CRC_SIZE {
            bytes.push(0xAB).unwrap();
        }
        bytes.extend_from_slice(&discover_frame()).unwrap();

        assert_eq!(comm.receive_data(&bytes, &tb), bytes.len());
        assert!(comm.request_received());
        let (request, _, _) = comm.exchange();
        assert_eq!(request.command_id, 2);
    }

    #[test]
    fn non_discover_frames_are_dropped_until_discovery() {
        let (mut comm, tb) = handler();
        comm.receive_data(&frame(1, 1, &[]), &tb);
        assert!(!comm.request_received());

        comm.receive_data(&discover_frame(), &tb);
        assert!(comm.request_received());
    }

    #[test]
    fn first_request_after_discovery_connects() {
        let (mut comm, mut tb) = handler();
        comm.receive_data(&discover_frame(), &tb);
        assert!(!comm.connected());
        comm.request_processed();

        tb.step(10);
        comm.receive_data(&frame(1, 1, &[]), &tb);
        assert!(comm.request_received());
        assert!(comm.connected());
        assert_ne!(comm.session_id(), 0);
    }

    #[test]
    fn reception_stalls_while_request_pending() {
        let (mut comm, tb) = handler();
        comm.receive_data(&discover_frame(), &tb);
        assert!(comm.request_received());

        assert_eq!(comm.receive_data(&[0x01, 0x02], &tb), 0);
        let (request, _, _) = comm.exchange();
        assert_eq!(request.data, &[0, 1, 2, 3, 4, 5, 6, 7]);

        comm.request_processed();
        assert_eq!(comm.receive_data(&[0x01], &tb), 1);
    }

    #[test]
    fn stalled_partial_frame_times_out() {
        let (mut comm, mut tb) = handler();
        // Half a header, then silence.
        comm.receive_data(&[0x02, 0x01], &tb);
        tb.step(RX_TIMEOUT_US + 1);

        comm.receive_data(&discover_frame(), &tb);
        assert!(comm.request_received());
        let (request, _, _) = comm.exchange();
        assert_eq!(request.data_len(), 8);
    }

    #[test]
    fn response_drains_across_small_pops() {
        let (mut comm, tb) = handler();
        comm.receive_data(&discover_frame(), &tb);

        let meta = {
            let (_, mut response, _) = comm.exchange();
            response.prepare(2, 1);
            response.push_bytes(&[0xAA, 0xBB, 0xCC]).unwrap();
            response.meta()
        };
        comm.commit_response(meta).unwrap();

        let total = RESPONSE_HEADER_SIZE + 3 + CRC_SIZE;
        assert_eq!(comm.data_to_send() as usize, total);
        assert!(comm.transmitting());

        let mut drained = heapless::Vec::<u8, 32>::new();
        let mut chunk = [0u8; 2];
        while comm.transmitting() {
            let n = comm.pop_data(&mut chunk);
            drained.extend_from_slice(&chunk[..n]).unwrap();
        }
        assert_eq!(drained.len(), total);

        // Header fields and trailing CRC must frame the payload.
        assert_eq!(drained[0], 0x82);
        assert_eq!(drained[1], 0x01);
        assert_eq!(drained[2], ResponseCode::Ok.as_u8());
        assert_eq!(&drained[3..5], &[0x00, 0x03]);
        assert_eq!(&drained[5..8], &[0xAA, 0xBB, 0xCC]);
        let expected_crc = frame_crc(&drained[..5], &drained[5..8]);
        assert_eq!(&drained[8..], &expected_crc.to_be_bytes());
    }

    #[test]
    fn commit_while_draining_is_busy() {
        let (mut comm, tb) = handler();
        comm.receive_data(&discover_frame(), &tb);

        let meta = {
            let (_, mut response, _) = comm.exchange();
            response.prepare(2, 1);
            response.meta()
        };
        comm.commit_response(meta).unwrap();
        assert_eq!(comm.commit_response(meta), Err(TxError::Busy));
    }

    #[test]
    fn heartbeat_refreshes_and_rejects_replays() {
        let (mut comm, mut tb) = handler();
        comm.connect(&tb);
        tb.step(100);

        assert!(comm.session.heartbeat(0x1234, tb.now_us()));
        assert!(!comm.session.heartbeat(0x1234, tb.now_us()));
        assert!(comm.session.heartbeat(0x1235, tb.now_us()));
    }

    #[test]
    fn heartbeat_requires_connection() {
        let (mut comm, tb) = handler();
        assert!(!comm.session.heartbeat(0x1234, tb.now_us()));
    }

    #[test]
    fn session_drops_after_heartbeat_deadline() {
        let (mut comm, mut tb) = handler();
        comm.connect(&tb);

        tb.step(HEARTBEAT_TIMEOUT_US);
        comm.process(&tb);
        assert!(comm.connected());

        tb.step(1);
        comm.process(&tb);
        assert!(!comm.connected());

        // The gate is closed again: non-discover traffic is dropped.
        comm.receive_data(&frame(1, 1, &[]), &tb);
        assert!(!comm.request_received());
    }

    #[test]
    fn timeout_truncates_inflight_transmission() {
        let (mut comm, mut tb) = handler();
        comm.receive_data(&discover_frame(), &tb);
        let meta = {
            let (_, mut response, _) = comm.exchange();
            response.prepare(2, 1);
            response.meta()
        };
        comm.commit_response(meta).unwrap();
        comm.connect(&tb);

        tb.step(HEARTBEAT_TIMEOUT_US + 1);
        comm.process(&tb);
        assert!(!comm.transmitting());
        assert_eq!(comm.data_to_send(), 0);
        assert!(!comm.request_received());
    }
}

//! Receive state machine, transmit engine and bus arbitration, composed
//! into a single `Node`.
//!
//! Grounded on the teacher's `context.rs` for overall shape (one struct
//! holding tx/rx checksum state plus a byte-at-a-time `rx_byte`), and on
//! `original_source/Arduino/WBTVNode/WBTVNode.cpp`'s `waitTillICanSend`/
//! `writeWrapper`/`escapedWrite`/`decodeChar` for the echo-verify and
//! escape semantics the teacher's framing doesn't have.

use log::{debug, trace, warn};

use crate::checksum::ChecksumState;
use crate::clock::{self, ClockState, TimeValue};
use crate::config::NodeConfig;
use crate::dispatch::Handler;
use crate::error::Error;
use crate::frame::{self, FrameBuf};
use crate::interface::{BusSense, ByteIo, Clock};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum RxState {
    Idle,
    InHeader,
    InPayload,
}

/// A protocol node bound to a byte stream, an optional bus-sense input,
/// and a monotonic clock. `'a` is the lifetime the node borrows its
/// capabilities for; `'h` is the (usually shorter) lifetime of a
/// registered dispatch handler.
pub struct Node<'a, 'h, S, C>
where
    S: ByteIo,
    C: Clock,
{
    name: &'static str,
    io: &'a mut S,
    clock: &'a C,
    sense: Option<&'a dyn BusSense>,
    config: NodeConfig,
    tx_checksum: ChecksumState,
    rx_checksum: ChecksumState,
    rx: FrameBuf,
    rx_state: RxState,
    escape: bool,
    msg_start: u32,
    last_service_millis: u32,
    msg_time_error: u32,
    msg_time_accurate: bool,
    clock_state: Option<ClockState>,
    handler: Handler<'h>,
}

impl<'a, 'h, S, C> Node<'a, 'h, S, C>
where
    S: ByteIo,
    C: Clock,
{
    /// A wired-OR node: `sense` is polled for collision avoidance and
    /// every written byte is echo-verified.
    pub fn new(
        name: &'static str,
        io: &'a mut S,
        sense: &'a dyn BusSense,
        clock: &'a C,
        config: NodeConfig,
    ) -> Self {
        Self::build(name, io, Some(sense), clock, config)
    }

    /// A full-duplex node: no arbitration, no echo-verify.
    pub fn new_duplex(name: &'static str, io: &'a mut S, clock: &'a C, config: NodeConfig) -> Self {
        Self::build(name, io, None, clock, config)
    }

    fn build(
        name: &'static str,
        io: &'a mut S,
        sense: Option<&'a dyn BusSense>,
        clock: &'a C,
        mut config: NodeConfig,
    ) -> Self {
        if config.adv_mode && !config.record_time {
            warn!(target: name, "adv_mode requires record_time; disabling adv_mode");
            config.adv_mode = false;
        }
        let now = clock.now_millis();
        let clock_state = if config.adv_mode {
            Some(ClockState::new(config.error_per_second, now))
        } else {
            None
        };
        Node {
            name,
            io,
            clock,
            sense,
            config,
            tx_checksum: ChecksumState::new(),
            rx_checksum: ChecksumState::new(),
            rx: FrameBuf::new(),
            rx_state: RxState::Idle,
            escape: false,
            msg_start: now,
            last_service_millis: now,
            msg_time_error: 0,
            msg_time_accurate: true,
            clock_state,
            handler: Handler::None,
        }
    }

    /// Registers a binary frame handler, clearing any string handler.
    pub fn set_binary_handler(&mut self, f: &'h mut dyn FnMut(&[u8], &[u8])) {
        self.handler = Handler::Binary(f);
    }

    /// Registers a string frame handler, clearing any binary handler.
    pub fn set_string_handler(&mut self, f: &'h mut dyn FnMut(&str, &str)) {
        self.handler = Handler::Str(f);
    }

    /// Unregisters whatever handler is set; validated frames are then
    /// dropped silently.
    pub fn clear_handler(&mut self) {
        self.handler = Handler::None;
    }

    /// The node's current time estimate, or `None` if `adv_mode` is off.
    pub fn current_time(&mut self) -> Option<TimeValue> {
        let now = self.clock.now_millis();
        self.clock_state.as_mut().map(|cs| cs.get_time(now))
    }

    /// Manually sets the clock, same acceptance rule as a received TIME
    /// frame (`claimed_error` worse than the current estimate is ignored).
    /// No-op if `adv_mode` is off.
    pub fn set_time(&mut self, seconds: i64, fraction: u16, claimed_error: u32) {
        let now = self.clock.now_millis();
        if let Some(cs) = self.clock_state.as_mut() {
            cs.set_time(now, seconds, fraction, claimed_error);
        }
    }

    /// Reads at most one byte from the byte-I/O capability and feeds the
    /// receive state machine. Intended to be called from the
    /// application's main loop.
    pub fn service(&mut self) {
        if self.io.available() {
            let byte = self.io.read();
            self.rx_byte(byte);
        }
        self.last_service_millis = self.clock.now_millis();
    }

    /// Sends `payload` on `channel`, retrying (with a fresh backoff draw
    /// in wired-OR mode) until a full frame round-trips cleanly. Fails
    /// only if the frame can't be framed at all.
    pub fn send(&mut self, channel: &[u8], payload: &[u8]) -> Result<(), Error> {
        if channel.is_empty() {
            return Err(Error::EmptyChannel);
        }
        let framed_len = channel.len() + 1 + payload.len() + 2;
        if framed_len > frame::MAX_MESSAGE {
            return Err(Error::FrameTooLarge {
                len: framed_len,
                max: frame::MAX_MESSAGE,
            });
        }
        while !self.try_send_once(channel, payload) {
            trace!(target: self.name, "send restart: arbitration or echo failure");
        }
        Ok(())
    }

    /// Builds and sends a TIME frame from the current clock estimate.
    /// No-op (returns `Ok`) if `adv_mode` is off.
    pub fn send_time(&mut self) -> Result<(), Error> {
        let (payload, estimate) = match self.clock_state.as_mut() {
            Some(cs) => {
                let now = self.clock.now_millis();
                let t = cs.get_time(now);
                let (exp, mantissa) = cs.outgoing_error_exponent_mantissa();
                (
                    clock::encode_time_payload(t.seconds, t.fraction, exp, mantissa),
                    t,
                )
            }
            None => return Ok(()),
        };
        debug!(target: self.name, "send TIME: seconds={}, error={}", estimate.seconds, estimate.error);
        self.send(clock::TIME_CHANNEL, &payload)
    }

    fn try_send_once(&mut self, channel: &[u8], payload: &[u8]) -> bool {
        if self.sense.is_some() {
            self.wait_till_can_send();
        }
        self.tx_checksum.reset();

        if !self.write_raw(frame::STH) {
            return false;
        }
        if self.config.dummy_sth && !self.write_raw(frame::STH) {
            return false;
        }

        for &b in channel {
            self.tx_checksum.update(b);
            if !self.write_escaped(b) {
                return false;
            }
        }

        if !self.write_raw(frame::STX) {
            return false;
        }
        if self.config.hash_stx {
            self.tx_checksum.update(frame::HASH_STX_SENTINEL);
        }

        for &b in payload {
            self.tx_checksum.update(b);
            if !self.write_escaped(b) {
                return false;
            }
        }

        let (slow, fast) = self.tx_checksum.finalize();
        if !self.write_escaped(slow) {
            return false;
        }
        if !self.write_escaped(fast) {
            return false;
        }

        self.write_raw(frame::EOT)
    }

    fn write_escaped(&mut self, byte: u8) -> bool {
        if frame::is_reserved(byte) && !self.write_raw(frame::ESC) {
            return false;
        }
        self.write_raw(byte)
    }

    /// In wired-OR mode: drains stale input, writes, then waits up to
    /// `max_wait_ms` for the echo to confirm no collision. In full-duplex
    /// mode, writes and returns success unconditionally.
    fn write_raw(&mut self, byte: u8) -> bool {
        if self.sense.is_none() {
            self.io.write(byte);
            return true;
        }
        while self.io.available() {
            self.io.read();
        }
        self.io.write(byte);
        let start = self.clock.now_millis();
        loop {
            if self.io.available() {
                let echo = self.io.read();
                if echo != byte {
                    warn!(target: self.name, "echo mismatch: sent={:#04x}, echo={:#04x}", byte, echo);
                }
                return echo == byte;
            }
            if self.clock.now_millis().wrapping_sub(start) >= self.config.max_wait_ms {
                warn!(target: self.name, "echo timeout waiting for {:#04x}", byte);
                return false;
            }
        }
    }

    /// Draws a random backoff from `[min_backoff_us, max_backoff_us)` and
    /// waits for a complete idle window of that length, redrawing
    /// whenever the sense input goes non-idle mid-wait.
    fn wait_till_can_send(&mut self) {
        let sense = match self.sense {
            Some(s) => s,
            None => return,
        };
        loop {
            let delay_us = self
                .clock
                .rand(self.config.min_backoff_us, self.config.max_backoff_us);
            let start = self.clock.now_micros();
            let mut collided = false;
            loop {
                for _ in 0..4 {
                    if !sense.idle() {
                        collided = true;
                        break;
                    }
                }
                if collided {
                    break;
                }
                if self.clock.now_micros().wrapping_sub(start) >= delay_us {
                    return;
                }
            }
            trace!(target: self.name, "bus busy during backoff, redrawing");
        }
    }

    fn rx_byte(&mut self, byte: u8) {
        if self.rx_state == RxState::Idle {
            if byte == frame::STH {
                self.start_frame();
            }
            return;
        }

        if self.escape {
            self.escape = false;
            self.rx.push(byte);
            return;
        }

        match byte {
            frame::ESC => self.escape = true,
            frame::STH => self.start_frame(),
            frame::STX => {
                if !self.rx.mark_divider() {
                    debug!(target: self.name, "second header divider, frame is garbage");
                }
                self.rx_state = RxState::InPayload;
            }
            frame::EOT => {
                self.validate_and_dispatch();
                self.rx_state = RxState::Idle;
            }
            _ => self.rx.push(byte),
        }
    }

    fn start_frame(&mut self) {
        self.rx.reset();
        self.escape = false;
        self.rx_state = RxState::InHeader;

        let now = self.clock.now_millis();
        if self.config.record_time {
            self.msg_time_error = now.wrapping_sub(self.last_service_millis);
            self.msg_time_accurate = !self.io.available();
            self.msg_start = if self.msg_time_accurate {
                now.wrapping_sub(self.msg_time_error / 2)
            } else {
                now
            };
        }

        self.reseed_opportunistically();
    }

    /// Nudges the embedder's RNG at a frame boundary, mixing in whatever
    /// entropy is cheaply at hand. `Clock::rand` owns any actual seeding
    /// semantics; this crate never assumes a global RNG.
    fn reseed_opportunistically(&mut self) {
        let (_, rx_fast) = self.rx_checksum.finalize();
        let mixed = self.clock.now_micros() ^ (rx_fast as u32);
        let _ = self.clock.rand(0, mixed.wrapping_add(1));
    }

    fn validate_and_dispatch(&mut self) {
        if self.rx.is_garbage() {
            debug!(target: self.name, "discarding garbage frame");
            return;
        }
        if !self.rx.has_complete_body() {
            debug!(target: self.name, "discarding frame with no header divider or too short for a checksum");
            return;
        }

        let header_end = self.rx.header_end();
        let body_end = self.rx.recv_ptr() - 2;
        self.rx_checksum.reset();
        for i in 0..body_end {
            if i == header_end {
                if self.config.hash_stx {
                    self.rx_checksum.update(frame::HASH_STX_SENTINEL);
                }
                continue;
            }
            self.rx_checksum.update(self.rx.byte_at(i));
        }

        let computed = self.rx_checksum.finalize();
        let received = self.rx.trailing_checksum();
        if computed != received {
            debug!(target: self.name, "checksum mismatch: computed={:?}, received={:?}", computed, received);
            self.reseed_opportunistically();
            return;
        }

        self.reseed_opportunistically();

        if self.config.adv_mode && self.rx.header() == clock::TIME_CHANNEL.as_ref() {
            self.handle_time_frame();
        } else {
            let header = self.rx.header();
            let payload = self.rx.payload();
            self.handler.dispatch(header, payload);
        }
    }

    fn handle_time_frame(&mut self) {
        let payload = self.rx.payload();
        match (clock::decode_time_payload(payload), self.clock_state.as_mut()) {
            (Some((seconds, fraction, exp, mantissa)), Some(cs)) => {
                cs.accept_time_frame(
                    self.msg_start,
                    self.msg_time_error,
                    self.msg_time_accurate,
                    seconds,
                    fraction,
                    exp,
                    mantissa,
                );
            }
            (None, _) => warn!(target: self.name, "malformed TIME payload"),
            (_, None) => {}
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    struct FakeIo {
        rx: Vec<u8>,
        loopback: bool,
    }

    impl FakeIo {
        fn new(loopback: bool) -> Self {
            FakeIo {
                rx: Vec::new(),
                loopback,
            }
        }

        fn feed(&mut self, bytes: &[u8]) {
            self.rx.extend_from_slice(bytes);
        }
    }

    impl ByteIo for FakeIo {
        fn read(&mut self) -> u8 {
            self.rx.remove(0)
        }
        fn write(&mut self, byte: u8) {
            if self.loopback {
                self.rx.push(byte);
            }
        }
        fn available(&self) -> bool {
            !self.rx.is_empty()
        }
    }

    struct FakeClock {
        millis: u32,
    }

    impl Clock for FakeClock {
        fn now_millis(&self) -> u32 {
            self.millis
        }
        fn now_micros(&self) -> u32 {
            self.millis.wrapping_mul(1000)
        }
        fn rand(&self, min: u32, max: u32) -> u32 {
            min.max(max.saturating_sub(1))
        }
    }

    #[test]
    fn duplex_send_round_trips_through_receive() {
        let mut io = FakeIo::new(true);
        let clock = FakeClock { millis: 0 };
        let mut node = Node::new_duplex("test", &mut io, &clock, NodeConfig::new());

        node.send(b"X", b"Y").unwrap();

        let mut seen = None;
        {
            let mut f = |h: &[u8], p: &[u8]| seen = Some((h.to_vec(), p.to_vec()));
            node.set_binary_handler(&mut f);
            while node.io.available() {
                node.service();
            }
        }
        assert_eq!(seen, Some((b"X".to_vec(), b"Y".to_vec())));
    }

    #[test]
    fn send_rejects_empty_channel() {
        let mut io = FakeIo::new(true);
        let clock = FakeClock { millis: 0 };
        let mut node = Node::new_duplex("test", &mut io, &clock, NodeConfig::new());
        assert_eq!(node.send(b"", b"Y"), Err(Error::EmptyChannel));
    }

    #[test]
    fn garbage_frame_is_not_dispatched() {
        let mut io = FakeIo::new(false);
        io.feed(&[
            frame::STH,
            b'X',
            frame::STX,
            b'Y',
            0xFF,
            0xFF, // wrong checksum bytes
            frame::EOT,
        ]);
        let clock = FakeClock { millis: 0 };
        let mut node = Node::new_duplex("test", &mut io, &clock, NodeConfig::new());
        let mut called = false;
        let mut f = |_h: &[u8], _p: &[u8]| called = true;
        node.set_binary_handler(&mut f);
        while node.io.available() {
            node.service();
        }
        assert!(!called);
    }
}

//! # busnode
//!
//! A node implementation for a lightweight serial bus protocol for
//! microcontroller-class devices: framing with byte-stuffing escapes, a
//! Fletcher-style running checksum, echo-verified CSMA/CA arbitration on a
//! shared wired-OR bus (or plain full-duplex operation on a point-to-point
//! link), and an optional best-effort clock-discipline subsystem driven by
//! `TIME` frames.
//!
//! The crate ships no hardware backend. The embedder supplies the UART
//! ([`ByteIo`]), the bus-idle sense input ([`BusSense`], wired-OR only) and
//! the monotonic clock/RNG source ([`Clock`]); [`Node`] drives them.
//!
//! ## Example
//! ```
//! use busnode::{ByteIo, Clock, Node, NodeConfig};
//!
//! struct Loopback {
//!     buf: Vec<u8>,
//! }
//!
//! impl ByteIo for Loopback {
//!     fn read(&mut self) -> u8 {
//!         self.buf.remove(0)
//!     }
//!     fn write(&mut self, byte: u8) {
//!         self.buf.push(byte);
//!     }
//!     fn available(&self) -> bool {
//!         !self.buf.is_empty()
//!     }
//! }
//!
//! struct SystemClock;
//!
//! impl Clock for SystemClock {
//!     fn now_millis(&self) -> u32 {
//!         0
//!     }
//!     fn now_micros(&self) -> u32 {
//!         0
//!     }
//!     fn rand(&self, min: u32, max: u32) -> u32 {
//!         min.max(max.saturating_sub(1))
//!     }
//! }
//!
//! let mut io = Loopback { buf: Vec::new() };
//! let clock = SystemClock;
//! let mut node = Node::new_duplex("demo", &mut io, &clock, NodeConfig::new());
//! node.send(b"X", b"Y").unwrap();
//!
//! let mut received = None;
//! let mut handler = |header: &[u8], payload: &[u8]| {
//!     received = Some((header.to_vec(), payload.to_vec()));
//! };
//! node.set_binary_handler(&mut handler);
//! // STH, 'X', STX, 'Y', checksum_low, checksum_high, EOT.
//! for _ in 0..7 {
//!     node.service();
//! }
//! assert_eq!(received, Some((b"X".to_vec(), b"Y".to_vec())));
//! ```

pub mod checksum;
pub mod clock;
pub mod config;
pub mod dispatch;
pub mod error;
pub mod frame;
pub mod interface;
pub mod node;

pub use checksum::ChecksumState;
pub use clock::{ClockState, TimeValue};
pub use config::NodeConfig;
pub use dispatch::Handler;
pub use error::Error;
pub use frame::{EOT, ESC, MAX_MESSAGE, STH, STX};
pub use interface::{BusSense, ByteIo, Clock};
pub use node::Node;

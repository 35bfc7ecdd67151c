//! Errors surfaced to callers.
//!
//! Per spec.md §7, almost nothing in this protocol propagates as an error:
//! structural/integrity failures on receive are discarded in place,
//! arbitration failures just trigger a retry, and clock rejections are
//! silent. The only failures a caller ever sees are the ones checked
//! before a frame is even attempted on the wire.

/// Errors returned by [`crate::Node::send`] and [`crate::Node::send_time`].
#[derive(Debug, thiserror::Error, PartialEq, Eq)]
pub enum Error {
    /// `channel.len() + payload.len()` plus framing overhead would exceed
    /// [`crate::frame::MAX_MESSAGE`].
    #[error("framed message of {len} bytes exceeds the {max}-byte frame budget")]
    FrameTooLarge { len: usize, max: usize },

    /// The channel name was empty. A zero-length header is unrepresentable
    /// on the wire (`header_end == 0` is the "no divider yet" sentinel).
    #[error("channel name must not be empty")]
    EmptyChannel,
}

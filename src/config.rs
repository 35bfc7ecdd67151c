//! Node configuration: the enumerated knobs from spec.md §6.

/// Default drift estimate: about 4% (2500/65536 per second), conservative
/// for a ceramic resonator, per the original source's own comment.
pub const DEFAULT_ERROR_PER_SECOND: u32 = 2500;

const DEFAULT_MIN_BACKOFF_US: u32 = 100;
const DEFAULT_MAX_BACKOFF_US: u32 = 1000;
const DEFAULT_MAX_WAIT_MS: u32 = 50;

/// Construction-time configuration for a [`crate::Node`].
///
/// A flat struct with `with_*` setters rather than a type-state builder:
/// every field here is an independent knob, not an alternative
/// construction path, so there's no state machine to encode.
#[derive(Debug, Clone, Copy)]
pub struct NodeConfig {
    /// Emit a leading second STH before every frame, for noise immunity.
    pub dummy_sth: bool,
    /// Include STX (as `HASH_STX_SENTINEL`) in the checksum.
    pub hash_stx: bool,
    /// Enable clock discipline and TIME frame handling.
    pub adv_mode: bool,
    /// Enable receive timestamping. Required if `adv_mode` is set.
    pub record_time: bool,
    /// Drift accumulated per elapsed second, in 1/65536 s.
    pub error_per_second: u32,
    /// Lower bound (inclusive) of the arbitration backoff window, in µs.
    pub min_backoff_us: u32,
    /// Upper bound (exclusive) of the arbitration backoff window, in µs.
    pub max_backoff_us: u32,
    /// Maximum time to wait for an echo byte, in ms.
    pub max_wait_ms: u32,
}

impl Default for NodeConfig {
    fn default() -> Self {
        Self {
            dummy_sth: false,
            hash_stx: false,
            adv_mode: false,
            record_time: false,
            error_per_second: DEFAULT_ERROR_PER_SECOND,
            min_backoff_us: DEFAULT_MIN_BACKOFF_US,
            max_backoff_us: DEFAULT_MAX_BACKOFF_US,
            max_wait_ms: DEFAULT_MAX_WAIT_MS,
        }
    }
}

impl NodeConfig {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_dummy_sth(mut self, enabled: bool) -> Self {
        self.dummy_sth = enabled;
        self
    }

    pub fn with_hash_stx(mut self, enabled: bool) -> Self {
        self.hash_stx = enabled;
        self
    }

    pub fn with_adv_mode(mut self, enabled: bool) -> Self {
        self.adv_mode = enabled;
        self.record_time = self.record_time || enabled;
        self
    }

    pub fn with_record_time(mut self, enabled: bool) -> Self {
        self.record_time = enabled;
        self
    }

    pub fn with_error_per_second(mut self, error_per_second: u32) -> Self {
        self.error_per_second = error_per_second;
        self
    }

    pub fn with_backoff_range_us(mut self, min: u32, max: u32) -> Self {
        self.min_backoff_us = min;
        self.max_backoff_us = max;
        self
    }

    pub fn with_max_wait_ms(mut self, max_wait_ms: u32) -> Self {
        self.max_wait_ms = max_wait_ms;
        self
    }
}

//! Per-iteration fuzz payload: wire layout, runtime flags, and the
//! sequential value cursor
//!
//! Each iteration the orchestrator places one payload into the registered
//! buffer. The layout is a small header followed by the raw value stream:
//!
//! ```text
//! offset 0: size  (u32, little endian) - byte length of the value stream
//! offset 4: flags (u32, little endian) - per-iteration RuntimeFlags
//! offset 8: value stream, consumed as consecutive u64 values
//! ```
//!
//! The stream is consumed strictly sequentially by [`FuzzCursor`]: never
//! rewound, never read past the end. Draws past the end are counted as
//! misses instead.

use bitflags::bitflags;
use thiserror::Error;

/// Width in bytes of a single substituted value
pub const VALUE_WIDTH: usize = core::mem::size_of::<u64>();

/// Byte length of the payload header preceding the value stream
pub(crate) const PAYLOAD_HEADER_SIZE: usize = 8;

bitflags! {
    /// Per-iteration side-recording switches, re-read from every payload
    pub struct RuntimeFlags: u32 {
        /// Record every value actually used into the observation buffer and
        /// dump it at the end of the iteration
        const DUMP_OBSERVED = 1 << 0;

        /// Append a one-line location statistics summary to the stats
        /// artifact at the end of the iteration
        const DUMP_STATS = 1 << 1;

        /// Log a diagnostic line and a call-stack capture for every
        /// interception
        const DUMP_CALLERS = 1 << 2;
    }
}

impl Default for RuntimeFlags {
    fn default() -> Self {
        RuntimeFlags::empty()
    }
}

/// Errors from decoding a delivered payload buffer
#[derive(Error, Debug, PartialEq, Eq)]
pub enum PayloadError {
    /// The delivered buffer cannot even hold the payload header
    #[error("payload buffer of {0} bytes is smaller than the {PAYLOAD_HEADER_SIZE} byte header")]
    TruncatedHeader(usize),
}

/// One decoded iteration payload
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Payload {
    /// Side-recording switches for this iteration
    pub flags: RuntimeFlags,

    /// The value stream to substitute for intercepted reads, in order
    pub values: Vec<u64>,
}

impl Payload {
    /// Decode a payload from the delivery buffer
    ///
    /// The declared stream length is clamped to the bytes actually present so
    /// that a hostile or confused declaration can never make the cursor read
    /// past the delivered data. A trailing partial value is dropped.
    pub fn parse(buffer: &[u8]) -> Result<Payload, PayloadError> {
        if buffer.len() < PAYLOAD_HEADER_SIZE {
            return Err(PayloadError::TruncatedHeader(buffer.len()));
        }

        let declared = u32::from_le_bytes(buffer[0..4].try_into().unwrap()) as usize;
        let raw_flags = u32::from_le_bytes(buffer[4..8].try_into().unwrap());

        let available = buffer.len() - PAYLOAD_HEADER_SIZE;
        let len = if declared > available {
            log::warn!("payload declares {declared} bytes but only {available} were delivered");
            available
        } else {
            declared
        };

        let values = buffer[PAYLOAD_HEADER_SIZE..PAYLOAD_HEADER_SIZE + len]
            .chunks_exact(VALUE_WIDTH)
            .map(|chunk| u64::from_le_bytes(chunk.try_into().unwrap()))
            .collect();

        Ok(Payload {
            flags: RuntimeFlags::from_bits_truncate(raw_flags),
            values,
        })
    }
}

/// Sequential cursor over the value stream of one iteration
///
/// `position` only ever moves forward and never exceeds the number of values.
/// Once the stream is exhausted every further draw increments `miss_count`
/// and yields nothing.
#[derive(Debug, Default)]
pub struct FuzzCursor {
    /// The value stream delivered for this iteration
    values: Vec<u64>,

    /// Index of the next value to hand out
    position: u32,

    /// Number of draws made after the stream ran out
    miss_count: u32,
}

impl FuzzCursor {
    /// Create a cursor over the given value stream
    #[must_use]
    pub fn new(values: Vec<u64>) -> Self {
        Self {
            values,
            position: 0,
            miss_count: 0,
        }
    }

    /// Hand out the next value, or record a miss if the stream is exhausted
    pub fn next(&mut self) -> Option<u64> {
        match self.values.get(self.position as usize) {
            Some(&value) => {
                self.position += 1;
                Some(value)
            }
            None => {
                self.miss_count += 1;
                None
            }
        }
    }

    /// Number of values handed out so far
    #[must_use]
    pub fn position(&self) -> u32 {
        self.position
    }

    /// Number of values in the stream
    #[must_use]
    #[allow(clippy::cast_possible_truncation)]
    pub fn total_values(&self) -> u32 {
        self.values.len() as u32
    }

    /// Number of draws made after exhaustion
    #[must_use]
    pub fn miss_count(&self) -> u32 {
        self.miss_count
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn payload_bytes(values: &[u64], flags: u32, declared: Option<u32>) -> Vec<u8> {
        let mut buf = Vec::new();
        let size = declared.unwrap_or((values.len() * VALUE_WIDTH) as u32);
        buf.extend_from_slice(&size.to_le_bytes());
        buf.extend_from_slice(&flags.to_le_bytes());
        for value in values {
            buf.extend_from_slice(&value.to_le_bytes());
        }
        buf
    }

    #[test]
    fn cursor_is_monotonic_and_counts_misses() {
        let mut cursor = FuzzCursor::new(vec![0x11, 0x22, 0x33]);
        assert_eq!(cursor.total_values(), 3);

        assert_eq!(cursor.next(), Some(0x11));
        assert_eq!(cursor.next(), Some(0x22));
        assert_eq!(cursor.next(), Some(0x33));
        assert_eq!(cursor.position(), 3);
        assert_eq!(cursor.miss_count(), 0);

        // Every draw past the end is a miss and position stays put
        for expected_misses in 1..=4 {
            assert_eq!(cursor.next(), None);
            assert_eq!(cursor.position(), 3);
            assert_eq!(cursor.miss_count(), expected_misses);
        }
    }

    #[test]
    fn empty_stream_only_misses() {
        let mut cursor = FuzzCursor::new(Vec::new());
        assert_eq!(cursor.next(), None);
        assert_eq!(cursor.position(), 0);
        assert_eq!(cursor.miss_count(), 1);
    }

    #[test]
    fn parse_decodes_values_and_flags() {
        let buf = payload_bytes(&[0xaa, 0xbb], 0b101, None);
        let payload = Payload::parse(&buf).unwrap();
        assert_eq!(payload.values, vec![0xaa, 0xbb]);
        assert_eq!(
            payload.flags,
            RuntimeFlags::DUMP_OBSERVED | RuntimeFlags::DUMP_CALLERS
        );
    }

    #[test]
    fn parse_clamps_overdeclared_size() {
        // Declares 1 MiB but delivers two values
        let buf = payload_bytes(&[0x1, 0x2], 0, Some(1 << 20));
        let payload = Payload::parse(&buf).unwrap();
        assert_eq!(payload.values, vec![0x1, 0x2]);
    }

    #[test]
    fn parse_drops_partial_trailing_value() {
        let mut buf = payload_bytes(&[0x1], 0, None);
        buf.extend_from_slice(&[0xde, 0xad]);
        buf[0..4].copy_from_slice(&10u32.to_le_bytes());
        let payload = Payload::parse(&buf).unwrap();
        assert_eq!(payload.values, vec![0x1]);
    }

    #[test]
    fn parse_rejects_truncated_header() {
        assert_eq!(
            Payload::parse(&[0u8; 4]),
            Err(PayloadError::TruncatedHeader(4))
        );
    }

    #[test]
    fn unknown_flag_bits_are_ignored() {
        let buf = payload_bytes(&[], 0xffff_fff8, None);
        let payload = Payload::parse(&buf).unwrap();
        assert_eq!(payload.flags, RuntimeFlags::empty());
    }
}

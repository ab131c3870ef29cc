//! Recorder for the values actually used during one iteration
//!
//! When an iteration runs with `DUMP_OBSERVED` set, every value returned from
//! an interception is appended here, whether it came from the fuzz input or
//! was passed through after exhaustion. The captured stream is dumped at the
//! end of the iteration so a later run can replay exactly what this one saw.

/// Append-only capture of substituted values, bounded by a fixed capacity
///
/// The buffer never grows past its capacity. A full buffer is reported to the
/// caller, which ends the iteration early instead of losing data silently.
#[derive(Debug, Default)]
pub struct ObservationBuffer {
    /// Captured values, in interception order
    values: Vec<u64>,

    /// Maximum number of values to capture, 0 when inactive
    capacity: usize,
}

impl ObservationBuffer {
    /// An inactive recorder that accepts nothing
    #[must_use]
    pub fn inactive() -> Self {
        Self::default()
    }

    /// An active recorder holding at most `capacity` values
    #[must_use]
    pub fn with_capacity(capacity: usize) -> Self {
        Self {
            values: Vec::with_capacity(capacity),
            capacity,
        }
    }

    /// Whether this iteration is recording at all
    #[must_use]
    pub fn is_active(&self) -> bool {
        self.capacity > 0
    }

    /// Stop recording for the rest of the iteration
    pub fn deactivate(&mut self) {
        self.capacity = 0;
    }

    /// Append one value. Returns false without appending when full.
    pub fn push(&mut self, value: u64) -> bool {
        if self.values.len() < self.capacity {
            self.values.push(value);
            true
        } else {
            false
        }
    }

    /// Number of values captured so far
    #[must_use]
    pub fn len(&self) -> usize {
        self.values.len()
    }

    /// Whether nothing has been captured
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.values.is_empty()
    }

    /// The captured stream in payload wire order, ready for a dump call
    #[must_use]
    pub fn as_le_bytes(&self) -> Vec<u8> {
        let mut bytes = Vec::with_capacity(self.values.len() * core::mem::size_of::<u64>());
        for value in &self.values {
            bytes.extend_from_slice(&value.to_le_bytes());
        }
        bytes
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn inactive_recorder_rejects_everything() {
        let mut buffer = ObservationBuffer::inactive();
        assert!(!buffer.is_active());
        assert!(!buffer.push(0x1234));
        assert!(buffer.is_empty());
    }

    #[test]
    fn push_stops_at_capacity() {
        let mut buffer = ObservationBuffer::with_capacity(2);
        assert!(buffer.push(0xa));
        assert!(buffer.push(0xb));
        assert!(!buffer.push(0xc));
        assert_eq!(buffer.len(), 2);
    }

    #[test]
    fn bytes_round_trip_wire_order() {
        let mut buffer = ObservationBuffer::with_capacity(4);
        buffer.push(0x0102_0304_0506_0708);
        assert_eq!(
            buffer.as_le_bytes(),
            vec![0x08, 0x07, 0x06, 0x05, 0x04, 0x03, 0x02, 0x01]
        );
    }
}

//! Per-interception-point statistics and the one-line iteration report
//!
//! Counters are keyed by [`InterceptKind`] and reset at the start of every
//! iteration. They have no behavior beyond increment and formatted emission;
//! the enumeration and its display-name table live together here so they
//! cannot drift apart.

use num_enum::{IntoPrimitive, TryFromPrimitive};

/// Category of an interception point
///
/// External collaborator code tags every substitutable read with one of
/// these. The discriminants are stable because collaborators on the other
/// side of an FFI boundary may deliver them as raw integers.
#[derive(Copy, Clone, Debug, Eq, PartialEq, Ord, PartialOrd, TryFromPrimitive, IntoPrimitive)]
#[repr(usize)]
pub enum InterceptKind {
    /// Model-specific register read
    MsrRead = 0,

    /// Memory-mapped I/O read
    MmioRead,

    /// Error status of a model-specific register read
    MsrReadErr,

    /// Error status of a model-specific register write
    MsrWriteErr,

    /// Error status of a shared-page map operation
    MapErr,

    /// Port I/O read
    PortIn,

    /// Error status of a port I/O read
    PortInErr,

    /// CPU feature query, EAX output word
    CpuidEax,

    /// CPU feature query, EBX output word
    CpuidEbx,

    /// CPU feature query, ECX output word
    CpuidEcx,

    /// CPU feature query, EDX output word
    CpuidEdx,

    /// Random-source read used for entropy seeding
    Random,
}

impl InterceptKind {
    /// Number of interception kinds
    pub const COUNT: usize = 12;

    /// Short display name used in diagnostics
    #[must_use]
    pub fn as_str(&self) -> &'static str {
        match self {
            InterceptKind::MsrRead => "MSR",
            InterceptKind::MmioRead => "MMIO",
            InterceptKind::MsrReadErr => "ERR_RMSR",
            InterceptKind::MsrWriteErr => "ERR_WMSR",
            InterceptKind::MapErr => "ERR_MMAP",
            InterceptKind::PortIn => "PIO",
            InterceptKind::PortInErr => "ERR_PIO",
            InterceptKind::CpuidEax => "CPUID_EAX",
            InterceptKind::CpuidEbx => "CPUID_EBX",
            InterceptKind::CpuidEcx => "CPUID_ECX",
            InterceptKind::CpuidEdx => "CPUID_EDX",
            InterceptKind::Random => "PRNG",
        }
    }

    /// Whether this kind is one of the four CPU feature query words
    #[must_use]
    pub fn is_feature_query(&self) -> bool {
        matches!(
            self,
            InterceptKind::CpuidEax
                | InterceptKind::CpuidEbx
                | InterceptKind::CpuidEcx
                | InterceptKind::CpuidEdx
        )
    }
}

impl core::fmt::Display for InterceptKind {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Counters for every interception kind over one iteration
#[derive(Debug, Default)]
pub struct LocationStats {
    /// One counter per kind, indexed by discriminant
    counts: [u32; InterceptKind::COUNT],
}

impl LocationStats {
    /// Count one interception of the given kind
    ///
    /// Counters wrap at the integer width. Wrapping is an accepted
    /// degradation of the report, not a safety issue.
    pub fn record(&mut self, kind: InterceptKind) {
        let slot = &mut self.counts[kind as usize];
        *slot = slot.wrapping_add(1);
    }

    /// Current count for the given kind
    #[must_use]
    pub fn get(&self, kind: InterceptKind) -> u32 {
        self.counts[kind as usize]
    }

    /// Zero every counter for the next iteration
    pub fn reset(&mut self) {
        self.counts = [0; InterceptKind::COUNT];
    }

    /// Format the single-line iteration summary
    ///
    /// `position` and `miss_count` come from the fuzz cursor. `maxed_out`
    /// marks iterations that missed input with the payload nearly consumed;
    /// it shows up as a trailing asterisk so saturated runs stand out when
    /// the stats artifact is scanned by eye.
    #[must_use]
    pub fn summary_line(&self, position: u32, miss_count: u32, maxed_out: bool) -> String {
        format!(
            "{:05}/{}: {:5}, {:5}, {:5};\trng={}; cpuid=<{},{},{},{}>; err=<{},{},{},{}> {}\n",
            position,
            miss_count,
            self.get(InterceptKind::MsrRead),
            self.get(InterceptKind::MmioRead),
            self.get(InterceptKind::PortIn),
            self.get(InterceptKind::Random),
            self.get(InterceptKind::CpuidEax),
            self.get(InterceptKind::CpuidEbx),
            self.get(InterceptKind::CpuidEcx),
            self.get(InterceptKind::CpuidEdx),
            self.get(InterceptKind::MsrReadErr),
            self.get(InterceptKind::MsrWriteErr),
            self.get(InterceptKind::MapErr),
            self.get(InterceptKind::PortInErr),
            if maxed_out { '*' } else { ' ' },
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn record_and_reset() {
        let mut stats = LocationStats::default();
        stats.record(InterceptKind::MmioRead);
        stats.record(InterceptKind::MmioRead);
        stats.record(InterceptKind::Random);
        assert_eq!(stats.get(InterceptKind::MmioRead), 2);
        assert_eq!(stats.get(InterceptKind::Random), 1);
        assert_eq!(stats.get(InterceptKind::PortIn), 0);

        stats.reset();
        assert_eq!(stats.get(InterceptKind::MmioRead), 0);
    }

    #[test]
    fn summary_line_layout() {
        let mut stats = LocationStats::default();
        stats.record(InterceptKind::MsrRead);
        stats.record(InterceptKind::MmioRead);
        stats.record(InterceptKind::MmioRead);
        stats.record(InterceptKind::PortInErr);

        let line = stats.summary_line(3, 0, false);
        assert_eq!(
            line,
            "00003/0:     1,     2,     0;\trng=0; cpuid=<0,0,0,0>; err=<0,0,0,1>  \n"
        );
    }

    #[test]
    fn summary_line_marks_saturation() {
        let stats = LocationStats::default();
        let line = stats.summary_line(100, 7, true);
        assert!(line.ends_with("*\n"));
    }

    #[test]
    fn kind_discriminants_round_trip() {
        for raw in 0..InterceptKind::COUNT {
            let kind = InterceptKind::try_from(raw).unwrap();
            assert_eq!(usize::from(kind), raw);
        }
        assert!(InterceptKind::try_from(InterceptKind::COUNT).is_err());
    }

    #[test]
    fn counters_wrap_instead_of_panicking() {
        let mut stats = LocationStats::default();
        stats.counts[InterceptKind::MsrRead as usize] = u32::MAX;
        stats.record(InterceptKind::MsrRead);
        assert_eq!(stats.get(InterceptKind::MsrRead), 0);
    }
}

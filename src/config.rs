//! Configuration settings for the agent
//!
//! Everything here is decided before the first iteration and never changes at
//! runtime. In particular the [`SkipPolicy`] is configuration-time policy
//! data: which kinds and addresses are exempt from injection is a property of
//! the fuzzing campaign, not of the agent code.

use serde::{Deserialize, Serialize};

use std::path::Path;

use crate::stats::InterceptKind;
use crate::transport::CodeRange;

/// Configuration settings for one agent instance
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Config {
    /// Capacity in bytes of the agent-side payload buffer. The orchestrator
    /// must not declare a larger delivery size.
    #[serde(default = "default_payload_capacity")]
    pub payload_capacity: usize,

    /// Capacity in bytes of the observation buffer used when an iteration
    /// runs with the observe flag set
    #[serde(default = "default_observe_capacity")]
    pub observe_capacity: usize,

    /// Static pass-through exemptions
    #[serde(default)]
    pub skip: SkipPolicy,

    /// End the iteration on payload exhaustion even while observing.
    /// The default keeps observe-mode iterations running so the full
    /// pass-through stream is captured for replay.
    #[serde(default)]
    pub end_observe_on_exhaustion: bool,

    /// Call-site names exempted from fuzz injection
    #[serde(default)]
    pub disallowed_call_sites: Vec<String>,

    /// Address windows submitted to restrict coverage tracing, none by
    /// default
    #[serde(default)]
    pub code_ranges: Vec<CodeRange>,
}

/// Static pass-through exemptions evaluated before anything else on the
/// interception path
///
/// An exempted read never reaches the handshake, the statistics, or the fuzz
/// input. The default policy exempts nothing; [`SkipPolicy::recommended`]
/// carries the exemptions that keep a Linux guest bootable while fuzzing the
/// rest.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SkipPolicy {
    /// Return this fixed constant for random-source reads instead of fuzzing
    /// them, keeping entropy seeding stable across iterations
    #[serde(default)]
    pub fixed_random: Option<u64>,

    /// Port addresses whose reads pass through unchanged
    #[serde(default)]
    pub passthrough_ports: Vec<u64>,

    /// Memory-mapped addresses whose reads pass through unchanged
    #[serde(default)]
    pub passthrough_mmio: Vec<u64>,

    /// Whether CPU feature queries are fuzzed at all
    #[serde(default = "default_fuzz_feature_queries")]
    pub fuzz_feature_queries: bool,
}

const fn default_payload_capacity() -> usize {
    128 * 1024
}

const fn default_observe_capacity() -> usize {
    128 * 1024
}

const fn default_fuzz_feature_queries() -> bool {
    true
}

impl std::default::Default for Config {
    fn default() -> Self {
        Self {
            payload_capacity: default_payload_capacity(),
            observe_capacity: default_observe_capacity(),
            skip: SkipPolicy::default(),
            end_observe_on_exhaustion: false,
            disallowed_call_sites: Vec::new(),
            code_ranges: Vec::new(),
        }
    }
}

impl std::default::Default for SkipPolicy {
    fn default() -> Self {
        Self {
            fixed_random: None,
            passthrough_ports: Vec::new(),
            passthrough_mmio: Vec::new(),
            fuzz_feature_queries: default_fuzz_feature_queries(),
        }
    }
}

impl Config {
    /// Read a configuration from a TOML file
    ///
    /// # Errors
    ///
    /// * The file cannot be read
    /// * The contents fail to parse as a [`Config`]
    pub fn from_file(path: impl AsRef<Path>) -> anyhow::Result<Self> {
        use anyhow::Context;

        let path = path.as_ref();
        let data = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read config file {}", path.display()))?;
        let config = toml::from_str(&data)
            .with_context(|| format!("Failed to parse config file {}", path.display()))?;
        Ok(config)
    }
}

impl SkipPolicy {
    /// The exemptions known to keep a Linux guest stable under injection:
    /// a fixed entropy constant, the ACPI PM control port, the two IOAPIC
    /// register windows, and no feature-query fuzzing
    #[must_use]
    pub fn recommended() -> Self {
        Self {
            fixed_random: Some(42),
            passthrough_ports: vec![0xb004],
            passthrough_mmio: vec![0xfec0_0000, 0xfec0_0010],
            fuzz_feature_queries: false,
        }
    }

    /// Evaluate the policy for one interception
    ///
    /// Returns the value to hand back when the read is exempt, or `None`
    /// when it should be fuzzed.
    #[must_use]
    pub fn passthrough(&self, kind: InterceptKind, addr: u64, original: u64) -> Option<u64> {
        match kind {
            InterceptKind::Random => self.fixed_random,
            InterceptKind::PortIn if self.passthrough_ports.contains(&addr) => Some(original),
            InterceptKind::MmioRead if self.passthrough_mmio.contains(&addr) => Some(original),
            kind if kind.is_feature_query() && !self.fuzz_feature_queries => Some(original),
            _ => None,
        }
    }
}

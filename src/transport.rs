//! Control channel between the in-guest agent and the fuzzing orchestrator
//!
//! Every exchange with the orchestrator is a single blocking round trip over a
//! narrow hypercall-like channel. The agent core only sees the typed surface
//! below; how a [`Transport`] implementation encodes each call on the wire
//! (hypercall numbers, shared pages, vmcall vs. port knock) is its own
//! concern.
//!
//! The protocol the methods map onto:
//!
//! | Call | Payload | Effect |
//! |------|---------|--------|
//! | `acquire` | none | marks a snapshot/measurement boundary |
//! | `release` | u64 hint | ends measurement; a non-zero hint is the miss byte count and asks for input expansion |
//! | `submit_mode` | mode tag | declares 32/64-bit addressing for code injection and disassembly |
//! | `set_agent_config` | [`AgentConfig`] | one-time capability exchange |
//! | `host_config` | [`HostConfig`] (out) | one-time sizing exchange |
//! | `register_payload_buffer` | buffer capacity | registers the payload delivery address |
//! | `next_payload` | none | places the next iteration's payload at the registered address |
//! | `submit_code_range` | [`CodeRange`] | restricts coverage tracing to an address window |
//! | `dump_file` | name, data, append | persists a named artifact on the orchestrator side |
//! | `user_abort` | none | unconditional fatal termination signal |
//! | `raise_panic` / `raise_kasan` | none | reports a detected fault class |

use serde::{Deserialize, Serialize};

/// Addressing mode of the fuzzed guest, submitted once during the handshake so
/// the orchestrator can configure code injection and disassembly
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ExecutionMode {
    /// 32-bit addressing
    Bits32,

    /// 64-bit addressing
    Bits64,
}

impl ExecutionMode {
    /// The addressing mode of the environment this agent was built for
    #[must_use]
    pub fn native() -> Self {
        if cfg!(target_pointer_width = "64") {
            ExecutionMode::Bits64
        } else {
            ExecutionMode::Bits32
        }
    }
}

/// Agent-side capabilities submitted to the orchestrator once during the
/// handshake. Immutable after submission.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct AgentConfig {
    /// Agent performs its own timeout detection
    pub timeout_detection: bool,

    /// Agent provides its own coverage tracing
    pub tracing: bool,

    /// Agent expects to survive an iteration without a full reload
    pub non_reload_mode: bool,

    /// Size in bytes of the agent-side coverage bitmap, 0 when tracing is
    /// orchestrator-owned
    pub coverage_bitmap_size: u32,

    /// Agent can capture and dump the observed value stream
    pub dump_payloads: bool,
}

/// Orchestrator-chosen sizing received once during the handshake. Immutable
/// after receipt.
///
/// The agent must verify that its own payload allocation can hold
/// `payload_buffer_size` bytes before requesting any payload.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct HostConfig {
    /// Size in bytes of the coverage bitmap the orchestrator measures into
    pub coverage_bitmap_size: u32,

    /// Size in bytes of the auxiliary feedback bitmap
    pub aux_bitmap_size: u32,

    /// Maximum payload size in bytes the orchestrator will deliver
    pub payload_buffer_size: u32,

    /// Identifier of the worker driving this guest
    pub worker_id: u16,
}

/// A half-open guest address window `[start, end)` submitted to restrict
/// coverage tracing
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct CodeRange {
    /// First address inside the window
    pub start: u64,

    /// First address past the window
    pub end: u64,
}

/// The synchronous control-call channel to the fuzzing orchestrator
///
/// Calls are modeled as infallible: the channel is assumed reliable and
/// blocking, and any retry or backoff belongs to the implementation, not to
/// the agent core. Nothing here suspends.
pub trait Transport {
    /// Mark a snapshot/measurement boundary
    fn acquire(&mut self);

    /// End measurement. A non-zero `hint` carries the miss byte count of the
    /// finished iteration and signals the orchestrator to apply an input
    /// expansion mutation strategy.
    fn release(&mut self, hint: u64);

    /// Declare the guest addressing mode
    fn submit_mode(&mut self, mode: ExecutionMode);

    /// Submit the agent capabilities, once
    fn set_agent_config(&mut self, config: &AgentConfig);

    /// Fetch the orchestrator sizing, once
    fn host_config(&mut self) -> HostConfig;

    /// Register the agent-side payload buffer and its capacity as the
    /// delivery address for subsequent payload requests
    fn register_payload_buffer(&mut self, capacity: usize);

    /// Ask for the next iteration's payload to be placed into the registered
    /// buffer
    fn next_payload(&mut self, buffer: &mut [u8]);

    /// Restrict coverage tracing to the given address window
    fn submit_code_range(&mut self, range: &CodeRange);

    /// Persist a named artifact on the orchestrator side. An empty `name`
    /// lets the orchestrator choose its own path.
    fn dump_file(&mut self, name: &str, data: &[u8], append: bool);

    /// Signal unconditional fatal termination. The orchestrator must treat
    /// this as a crash of the agent, not a clean iteration end.
    fn user_abort(&mut self);

    /// Report a detected panic-class fault
    fn raise_panic(&mut self);

    /// Report a detected memory-safety fault
    fn raise_kasan(&mut self);
}

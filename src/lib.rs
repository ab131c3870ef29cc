//! # Snapagent
//!
//! In-guest agent for snapshot fuzzers
//!
//! Snapagent runs inside a virtualized target and makes low-level system
//! software deterministically driven by an externally supplied input stream.
//! At every designated interception point (timer and random reads,
//! memory-mapped or port I/O reads, model-specific-register reads, CPU
//! feature queries) the surrounding code asks the agent for the value to
//! use; while a fuzzing iteration is running the agent substitutes the next
//! value from the orchestrator-delivered payload, and otherwise the original
//! value passes through untouched. The device emulation, CPU virtualization
//! logic, and VM-exit handling around the agent stay unmodified.
//!
//! ## Lifecycle of one iteration
//!
//! 1. The embedder arms the agent with [`Agent::enable`] at the start of the
//!    code region worth fuzzing.
//! 2. The first intercepted read performs the orchestrator handshake:
//!    snapshot baseline, capability and sizing exchange, payload delivery,
//!    then the acquire call that opens the traced region.
//! 3. Reads are substituted from the payload until it runs out or the region
//!    completes.
//! 4. [`Agent::finish_iteration`] emits the configured dumps and the final
//!    release call carrying the miss byte count; the orchestrator restores
//!    the snapshot and the next iteration starts from step 2 with a fresh
//!    payload.
//!
//! Side recordings (observed-value capture, location statistics, caller
//! diagnostics) are switched per iteration by flags embedded in the payload
//! itself, so the orchestrator can flip them without touching the guest.
//!
//! ## Roadmap of the repo
//!
//! * [`Agent`] - lifecycle state machine and the [`Agent::intercept`] entry
//!   point called at every nondeterministic read
//! * [`Transport`] - the synchronous control-call channel to the
//!   orchestrator, implemented per platform
//! * [`Config`] / [`SkipPolicy`] - campaign configuration, including the
//!   static pass-through exemptions
//! * [`CallSiteFilter`] / [`HookInstaller`] - suppressing injection around
//!   call sites named in a [`DisallowList`]
//! * [`InterceptKind`] / [`LocationStats`] - per-interception-point
//!   accounting
//!
//! # Example
//!
//! ```
//! use snapagent::prelude::*;
//!
//! // A transport that talks to no orchestrator at all: every control call
//! // is swallowed and no payload bytes are ever delivered.
//! struct NullTransport;
//!
//! impl Transport for NullTransport {
//!     fn acquire(&mut self) {}
//!     fn release(&mut self, _hint: u64) {}
//!     fn submit_mode(&mut self, _mode: ExecutionMode) {}
//!     fn set_agent_config(&mut self, _config: &AgentConfig) {}
//!     fn host_config(&mut self) -> HostConfig {
//!         HostConfig::default()
//!     }
//!     fn register_payload_buffer(&mut self, _capacity: usize) {}
//!     fn next_payload(&mut self, _buffer: &mut [u8]) {}
//!     fn submit_code_range(&mut self, _range: &CodeRange) {}
//!     fn dump_file(&mut self, _name: &str, _data: &[u8], _append: bool) {}
//!     fn user_abort(&mut self) {}
//!     fn raise_panic(&mut self) {}
//!     fn raise_kasan(&mut self) {}
//! }
//!
//! let mut agent = Agent::new(NullTransport, Config::default());
//! agent.enable();
//!
//! // No payload bytes were delivered, so the first intercepted read misses,
//! // ends the iteration, and passes the original value through.
//! let value = agent.intercept(0x1234, 0xfee0_0000, 8, InterceptKind::MmioRead);
//! assert_eq!(value, 0x1234);
//! assert!(agent.is_terminated());
//! ```
#![deny(missing_docs)]

pub mod agent;
pub use agent::{Agent, AgentEvent, SuppressGuard};

pub mod config;
pub use config::{Config, SkipPolicy};

pub mod filter;
pub use filter::{CallSiteFilter, DisallowList, HookInstaller, MAX_CALL_SITE_HOOKS};

pub mod observe;
pub use observe::ObservationBuffer;

pub mod payload;
pub use payload::{FuzzCursor, Payload, RuntimeFlags, VALUE_WIDTH};

pub mod stats;
pub use stats::{InterceptKind, LocationStats};

pub mod transport;
pub use transport::{AgentConfig, CodeRange, ExecutionMode, HostConfig, Transport};

/// Import the types needed to embed the agent.
/// ```
/// use snapagent::prelude::*;
/// ```
pub mod prelude {
    pub use super::{
        Agent, AgentConfig, AgentEvent, CallSiteFilter, CodeRange, Config, DisallowList,
        ExecutionMode, HookInstaller, HostConfig, InterceptKind, RuntimeFlags, SkipPolicy,
        Transport,
    };
}

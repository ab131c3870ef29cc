//! Agent lifecycle and the interception entry point
//!
//! One [`Agent`] drives one fuzzing iteration inside one isolated execution
//! context. The lifecycle is lazy: the agent sits disabled and uninitialized
//! until the embedder arms it with [`Agent::enable`], and the first
//! intercepted read after that performs the whole orchestrator handshake
//! before any value is substituted. The iteration ends through
//! [`Agent::finish_iteration`], either explicitly, through a lifecycle
//! event, or as a side effect of running out of fuzz input.
//!
//! The agent assumes a single thread of control. All state lives in the
//! [`Agent`] value and is mutated only through exclusive references; sharing
//! one agent between execution contexts requires external serialization.

use num_enum::{IntoPrimitive, TryFromPrimitive};

use std::backtrace::Backtrace;
use std::ops::{Deref, DerefMut};

use crate::config::Config;
use crate::observe::ObservationBuffer;
use crate::payload::{FuzzCursor, Payload, RuntimeFlags, VALUE_WIDTH};
use crate::stats::{InterceptKind, LocationStats};
use crate::transport::{AgentConfig, ExecutionMode, HostConfig, Transport};

/// Orchestrator-side artifact collecting one summary line per iteration
const LOCATION_STATS_FILE: &str = "fuzzer_location_stats.lst";

/// Lifecycle phase of an agent
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Phase {
    /// No handshake has happened yet
    Uninitialized,

    /// Handshake complete, iteration running
    Initialized,

    /// Iteration finished, every further read passes through
    Terminated,
}

/// Lifecycle signals delivered by external collaborator code
///
/// Collaborators on the far side of an FFI boundary may deliver these as raw
/// integers through [`Agent::handle_raw_event`]; the discriminants are
/// stable for that reason.
#[derive(Copy, Clone, Debug, Eq, PartialEq, TryFromPrimitive, IntoPrimitive)]
#[repr(u32)]
pub enum AgentEvent {
    /// A guest panic was detected
    Panic = 0,

    /// A memory-safety violation was detected
    Kasan,

    /// An undefined-behavior sanitizer report was detected
    Ubsan,

    /// An error condition worth surfacing as a fault was detected
    Error,

    /// The fuzzed region completed normally
    Done,

    /// The guest halted
    Halt,

    /// The guest requested a reboot
    Reboot,

    /// The guest entered a safe-halt state
    SafeHalt,

    /// The iteration ran out of time
    Timeout,

    /// Entry into a call site exempted from injection
    Disable,

    /// Exit from a call site exempted from injection
    Enable,
}

/// The in-guest fuzzing agent for one iteration
///
/// Created once per iteration; the orchestrator's snapshot rewind restores
/// the pre-handshake state between iterations, so a fresh `Agent` value is
/// the per-iteration reset. The disallow list and any installed call-site
/// probes live outside the agent and survive across iterations.
pub struct Agent<T: Transport> {
    /// Control channel to the orchestrator
    transport: T,

    /// Campaign configuration, fixed for the lifetime of the agent
    config: Config,

    /// Capabilities submitted during the handshake
    agent_config: AgentConfig,

    /// Sizing received during the handshake
    host_config: Option<HostConfig>,

    /// Current lifecycle phase
    phase: Phase,

    /// Whether interceptions substitute values right now
    enabled: bool,

    /// Fixed-capacity arena the orchestrator delivers payloads into
    payload_buffer: Vec<u8>,

    /// Cursor over the current iteration's value stream
    cursor: FuzzCursor,

    /// Side-recording switches read from the current payload
    flags: RuntimeFlags,

    /// Recorder for the values actually used, active only under the observe
    /// flag
    observed: ObservationBuffer,

    /// Per-kind interception counters
    stats: LocationStats,
}

impl<T: Transport> Agent<T> {
    /// Create an agent with default capabilities
    pub fn new(transport: T, config: Config) -> Self {
        Self::with_capabilities(transport, config, AgentConfig::default())
    }

    /// Create an agent that submits the given capabilities at handshake
    pub fn with_capabilities(transport: T, config: Config, agent_config: AgentConfig) -> Self {
        let payload_buffer = vec![0; config.payload_capacity];
        Self {
            transport,
            config,
            agent_config,
            host_config: None,
            phase: Phase::Uninitialized,
            enabled: false,
            payload_buffer,
            cursor: FuzzCursor::default(),
            flags: RuntimeFlags::default(),
            observed: ObservationBuffer::inactive(),
            stats: LocationStats::default(),
        }
    }

    /// Whether interceptions currently substitute values
    #[must_use]
    pub fn is_enabled(&self) -> bool {
        self.enabled
    }

    /// Whether the handshake has completed
    #[must_use]
    pub fn is_initialized(&self) -> bool {
        self.phase != Phase::Uninitialized
    }

    /// Whether the iteration has finished
    #[must_use]
    pub fn is_terminated(&self) -> bool {
        self.phase == Phase::Terminated
    }

    /// The cursor over the current iteration's value stream
    #[must_use]
    pub fn cursor(&self) -> &FuzzCursor {
        &self.cursor
    }

    /// The side-recording switches of the current iteration
    #[must_use]
    pub fn flags(&self) -> RuntimeFlags {
        self.flags
    }

    /// The per-kind interception counters of the current iteration
    #[must_use]
    pub fn stats(&self) -> &LocationStats {
        &self.stats
    }

    /// The sizing received during the handshake, once it happened
    #[must_use]
    pub fn host_config(&self) -> Option<HostConfig> {
        self.host_config
    }

    /// Arm the agent: interceptions substitute values from here on
    ///
    /// Valid before the handshake. Arming an uninitialized agent is what
    /// lets the first intercepted read trigger the handshake lazily.
    pub fn enable(&mut self) {
        self.enabled = true;
        log::debug!("agent enabled");
    }

    /// One-time handshake with the orchestrator
    ///
    /// Establishes the snapshot baseline, exchanges configuration, fetches
    /// the first payload, and opens the traced region. Runs lazily from the
    /// first interception that needs fuzz input.
    fn initialize(&mut self) {
        if self.phase != Phase::Uninitialized {
            self.abort("agent was already initialized");
        }

        log::info!("initializing fuzzing agent");

        // Initial handshake, establishing the clean snapshot baseline
        self.transport.acquire();
        self.transport.release(0);

        // Declare the addressing mode used for code injection and
        // disassembly on the orchestrator side
        self.transport.submit_mode(ExecutionMode::native());

        // Register our delivery buffer, then exchange configuration
        self.transport
            .register_payload_buffer(self.payload_buffer.len());
        self.transport.set_agent_config(&self.agent_config);
        let host = self.transport.host_config();

        log::info!(
            "[host_config] bitmap sizes = <{:#x},{:#x}>",
            host.coverage_bitmap_size,
            host.aux_bitmap_size
        );
        log::info!(
            "[host_config] payload size = {}KB",
            host.payload_buffer_size / 1024
        );
        log::info!("[host_config] worker id = {:02}", host.worker_id);

        if host.payload_buffer_size as usize > self.payload_buffer.len() {
            self.abort("host payload buffer is larger than the agent side allocation");
        }
        self.host_config = Some(host);

        // Optional tracing windows, none by default
        for (index, range) in self.config.code_ranges.iter().enumerate() {
            log::info!(
                "submitting trace range {index}: {:#x}-{:#x}",
                range.start,
                range.end
            );
            self.transport.submit_code_range(range);
        }

        // Fetch the fuzz input for later injection
        log::info!("starting fuzz loop");
        self.transport.next_payload(&mut self.payload_buffer);

        let payload = match Payload::parse(&self.payload_buffer) {
            Ok(payload) => payload,
            Err(err) => self.abort(&format!("malformed payload: {err}")),
        };

        self.flags = payload.flags;
        if !self.flags.is_empty() {
            log::debug!("runtime agent flags = {:#x}", self.flags.bits());
            log::debug!(
                "\t dump_observed = {}",
                self.flags.contains(RuntimeFlags::DUMP_OBSERVED)
            );
            log::debug!(
                "\t dump_stats = {}",
                self.flags.contains(RuntimeFlags::DUMP_STATS)
            );
            log::debug!(
                "\t dump_callers = {}",
                self.flags.contains(RuntimeFlags::DUMP_CALLERS)
            );
        }

        if self.flags.contains(RuntimeFlags::DUMP_OBSERVED) {
            self.observed =
                ObservationBuffer::with_capacity(self.config.observe_capacity / VALUE_WIDTH);
        }

        self.cursor = FuzzCursor::new(payload.values);
        self.stats.reset();
        self.phase = Phase::Initialized;

        // Start coverage tracing; everything from here is measured
        self.transport.acquire();
    }

    /// End the current iteration
    ///
    /// Idempotent: the first call emits the configured dumps and the final
    /// release; later calls return immediately. Safe to call from any phase.
    pub fn finish_iteration(&mut self) {
        if self.phase != Phase::Initialized {
            return;
        }

        self.enabled = false;

        if self.observed.is_active() {
            log::debug!("dumping observed input");
            let observed = self.observed.as_le_bytes();
            // An empty artifact name lets the orchestrator pick its own path
            self.transport.dump_file("", &observed, false);
            self.observed.deactivate();
        }

        if self.flags.contains(RuntimeFlags::DUMP_STATS) {
            let line = self.stats.summary_line(
                self.cursor.position(),
                self.cursor.miss_count(),
                self.payload_maxed_out(),
            );
            log::debug!("dumping fuzzer location stats");
            self.transport
                .dump_file(LOCATION_STATS_FILE, line.as_bytes(), true);
        }

        // Stop tracing and restore the snapshot. A non-zero release hint is
        // the miss byte count and triggers input expansion mutation.
        self.transport
            .release(u64::from(self.cursor.miss_count()) * VALUE_WIDTH as u64);
        self.phase = Phase::Terminated;
    }

    /// Explicitly end a run that was armed and handshaken
    ///
    /// Aborts fatally when the agent was never enabled or never initialized:
    /// reaching the end of the fuzzed region in either state means the
    /// harness wiring is wrong.
    pub fn stop(&mut self) {
        if !self.enabled {
            self.abort("attempt to finish fuzz run but the agent is not enabled");
        }

        if self.phase == Phase::Uninitialized {
            self.abort("attempt to finish fuzz run but the agent was never initialized");
        }

        self.finish_iteration();
    }

    /// The single entry point for every interception
    ///
    /// Called by external collaborator code at each nondeterministic read
    /// with the value the read would naturally produce. Returns the value to
    /// use instead, which is the original value whenever the agent is
    /// disabled, terminated, or the read is exempt under the skip policy.
    ///
    /// `width` is the byte width of the read at the call site and is used
    /// for diagnostics only.
    pub fn intercept(
        &mut self,
        original: u64,
        addr: u64,
        width: u32,
        kind: InterceptKind,
    ) -> u64 {
        // Fast pass-through outside the traced region
        if !self.enabled || self.phase == Phase::Terminated {
            return original;
        }

        // Static skip policy, evaluated before lazy initialization and
        // before counting: exempted reads never pollute the statistics or
        // consume payload
        if let Some(value) = self.config.skip.passthrough(kind, addr, original) {
            return value;
        }

        // First real interception performs the handshake
        if self.phase == Phase::Uninitialized {
            self.initialize();
        }

        self.stats.record(kind);
        let value = self.next_value(original);

        if self.flags.contains(RuntimeFlags::DUMP_CALLERS) {
            log::info!(
                "intercept: {kind}[{width}], addr: {addr:#018x}, value: {original:#018x} => {value:#018x}"
            );
            log::info!("{}", Backtrace::force_capture());
        }

        if self.observed.is_active() {
            // Record the value actually used; execution may be partly
            // fuzzer-driven and partly pass-through
            if !self.observed.push(value) {
                log::warn!("insufficient space in the observation buffer");
                self.finish_iteration();
            }
        }

        value
    }

    /// Draw the next fuzz value, or handle exhaustion
    fn next_value(&mut self, original: u64) -> u64 {
        match self.cursor.next() {
            Some(value) => value,
            None => {
                // Out of fuzz input. End the iteration at the first miss
                // unless observe mode wants the full pass-through stream.
                if !self.observed.is_active() || self.config.end_observe_on_exhaustion {
                    self.finish_iteration();
                }
                original
            }
        }
    }

    /// Dispatch a lifecycle signal from external collaborator code
    pub fn handle_event(&mut self, event: AgentEvent) {
        match event {
            AgentEvent::Panic => self.transport.raise_panic(),
            AgentEvent::Kasan | AgentEvent::Ubsan => self.transport.raise_kasan(),

            // Surface unexpected error conditions as a fault for review
            AgentEvent::Error => self.transport.raise_panic(),

            AgentEvent::Done
            | AgentEvent::Halt
            | AgentEvent::Reboot
            | AgentEvent::SafeHalt
            | AgentEvent::Timeout => self.finish_iteration(),

            AgentEvent::Disable => {
                log::debug!(
                    "disable event: initialized={} enabled={}",
                    self.is_initialized(),
                    self.enabled
                );
                if self.phase == Phase::Initialized {
                    self.enabled = false;
                }
            }

            AgentEvent::Enable => {
                log::debug!(
                    "enable event: initialized={} enabled={}",
                    self.is_initialized(),
                    self.enabled
                );
                if self.phase == Phase::Initialized {
                    self.enabled = true;
                }
            }
        }
    }

    /// Dispatch a lifecycle signal delivered as a raw integer
    ///
    /// An unrecognized value is a usage error and takes the fatal abort
    /// path.
    pub fn handle_raw_event(&mut self, raw: u32) {
        match AgentEvent::try_from(raw) {
            Ok(event) => self.handle_event(event),
            Err(_) => self.abort("unrecognized fuzz event"),
        }
    }

    /// Report a detected panic-class fault to the orchestrator
    pub fn raise_panic(&mut self) {
        self.transport.raise_panic();
    }

    /// Report a detected memory-safety fault to the orchestrator
    pub fn raise_kasan(&mut self) {
        self.transport.raise_kasan();
    }

    /// Suppress injection for a scope
    ///
    /// The returned guard disables substitution for an initialized agent and
    /// restores the previous state when dropped, on every exit path. Used by
    /// in-process call sites that cannot be probed externally.
    pub fn suppressed(&mut self) -> SuppressGuard<'_, T> {
        let was_enabled = self.enabled;
        if self.phase == Phase::Initialized {
            self.enabled = false;
        }
        SuppressGuard {
            agent: self,
            was_enabled,
        }
    }

    /// Whether the iteration quit on missing input with the payload nearly
    /// consumed, flagged in the stats line as worth expanding
    fn payload_maxed_out(&self) -> bool {
        let max_payload = self
            .host_config
            .map_or(0, |host| u64::from(host.payload_buffer_size));
        self.cursor.miss_count() > 0
            && u64::from(self.cursor.position()) * VALUE_WIDTH as u64 > max_payload / 10 * 9
    }

    /// The fatal abort path for usage errors and capacity violations
    ///
    /// Emits the diagnostic, signals the orchestrator, and faults. There is
    /// no recovery; the orchestrator tears the environment down and restores
    /// the snapshot.
    pub fn abort(&mut self, msg: &str) -> ! {
        log::error!("{msg}");
        self.transport.user_abort();
        panic!("{msg}");
    }
}

/// Scope guard returned by [`Agent::suppressed`]
///
/// Dereferences to the agent so reads inside the suppressed region still go
/// through the ordinary interception path, which passes them through.
pub struct SuppressGuard<'a, T: Transport> {
    /// The suppressed agent
    agent: &'a mut Agent<T>,

    /// Enablement state to restore on drop
    was_enabled: bool,
}

impl<T: Transport> Deref for SuppressGuard<'_, T> {
    type Target = Agent<T>;

    fn deref(&self) -> &Self::Target {
        self.agent
    }
}

impl<T: Transport> DerefMut for SuppressGuard<'_, T> {
    fn deref_mut(&mut self) -> &mut Self::Target {
        self.agent
    }
}

impl<T: Transport> Drop for SuppressGuard<'_, T> {
    fn drop(&mut self) {
        // Do not re-arm an agent whose iteration ended inside the scope
        if self.agent.phase == Phase::Initialized {
            self.agent.enabled = self.was_enabled;
        }
    }
}

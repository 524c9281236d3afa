//! The step-and-poll bridge loop.
//!
//! A [`Bridge`] exclusively owns one engine and one transport. Its lifecycle:
//!
//! ```text
//! Idle -> Initialized -> Stepping -> (Interrupted) -> Closing -> Closed
//! ```
//!
//! Each iteration runs six phases, strictly in sequence:
//!
//! 1. **Horizon** -- extend the engine's horizon by one step.
//! 2. **Compute** -- solve the network at the current time.
//! 3. **Publish** -- extract records, encode them against the register map
//!    and write the image in address order.
//! 4. **Setpoints** -- read writable registers back into the engine.
//! 5. **Advance** -- move the engine to the next hydraulic time.
//! 6. **Pace** -- sleep for the wall-clock interval, waking on interrupt.
//!
//! A rejected transport request skips the rest of the iteration without
//! advancing the engine. A lost connection or any engine step failure is
//! fatal. Whichever way the loop ends, the closing sequence (close session,
//! release engine, close transport) runs exactly once.

use tracing::{debug, error, info, warn};

use crate::clock::SimulationClock;
use crate::codec::CodecError;
use crate::config::{BridgeConfig, ConfigError};
use crate::engine::{EngineError, HydraulicEngine, SimTime};
use crate::entity::{EntityRecord, Field, FieldValue};
use crate::extract::{SyncIfParallel, extract_snapshot};
use crate::register_map::{Direction, MapError, RegisterMap, RegisterMapEntry, RegisterRun};
use crate::stop::StopSignal;
use crate::topology::EntityRef;
use crate::transport::{RegisterTransport, TransportError};

// ---------------------------------------------------------------------------
// States and outcomes
// ---------------------------------------------------------------------------

/// Lifecycle state of a bridge.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BridgeState {
    Idle,
    Initialized,
    Stepping,
    Interrupted,
    Closing,
    Closed,
}

/// Why a run ended without a fatal error.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ExitReason {
    /// The stop signal was raised.
    Interrupted,
    /// The configured iteration bound was reached.
    IterationLimit,
}

/// Result of a single iteration.
#[derive(Debug, Clone, PartialEq)]
pub enum IterationOutcome {
    /// All phases ran; `time` is the simulated time that was published.
    Completed { time: SimTime },
    /// A transport request was rejected; the engine was not advanced.
    Skipped { reason: TransportError },
}

/// Running counters.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct BridgeStats {
    pub iterations: u64,
    pub skipped: u64,
    pub registers_written: u64,
    pub setpoints_applied: u64,
}

// ---------------------------------------------------------------------------
// Error types
// ---------------------------------------------------------------------------

/// Fatal bridge errors.
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum BridgeError {
    /// The engine session could not be opened, initialized or driven.
    #[error("engine: {0}")]
    Engine(#[source] EngineError),
    /// The hydraulic step failed; the physical state is undefined.
    #[error("engine step failure: {0}")]
    EngineStepFailure(#[source] EngineError),
    /// The transport cannot be reached or its connection is unusable.
    #[error("connection error: {0}")]
    Connection(#[from] TransportError),
    #[error("register map: {0}")]
    Map(#[from] MapError),
    /// Register widths and the codec disagree.
    #[error("malformed register data: {0}")]
    MalformedRegisterData(#[from] CodecError),
    #[error("configuration: {0}")]
    Config(#[from] ConfigError),
    #[error("cannot {action} while {state:?}")]
    InvalidState {
        action: &'static str,
        state: BridgeState,
    },
}

impl BridgeError {
    /// The subsystem that failed, for user-facing messages.
    pub fn subsystem(&self) -> &'static str {
        match self {
            BridgeError::Engine(_) | BridgeError::EngineStepFailure(_) => "engine",
            BridgeError::Connection(_) => "transport",
            BridgeError::Map(_) => "register map",
            BridgeError::MalformedRegisterData(_) => "codec",
            BridgeError::Config(_) => "configuration",
            BridgeError::InvalidState { .. } => "bridge",
        }
    }
}

// ---------------------------------------------------------------------------
// Bridge
// ---------------------------------------------------------------------------

/// Which resources are held and must be released on close.
#[derive(Debug, Clone, Copy, Default)]
struct Held {
    session: bool,
    transport: bool,
    engine: bool,
}

/// Connects one engine to one register transport.
#[derive(Debug)]
pub struct Bridge<E, T> {
    engine: E,
    transport: T,
    config: BridgeConfig,
    state: BridgeState,
    map: Option<RegisterMap>,
    clock: SimulationClock,
    stats: BridgeStats,
    setpoints_seeded: bool,
    held: Held,
}

impl<E, T> Bridge<E, T>
where
    E: HydraulicEngine + SyncIfParallel,
    T: RegisterTransport,
{
    /// Create an idle bridge. The engine counts as loaded from here on and
    /// is released when the bridge closes.
    pub fn new(engine: E, transport: T, config: BridgeConfig) -> Self {
        Self {
            engine,
            transport,
            config,
            state: BridgeState::Idle,
            map: None,
            clock: SimulationClock::default(),
            stats: BridgeStats::default(),
            setpoints_seeded: false,
            held: Held {
                engine: true,
                ..Held::default()
            },
        }
    }

    pub fn state(&self) -> BridgeState {
        self.state
    }

    pub fn config(&self) -> &BridgeConfig {
        &self.config
    }

    /// The register map, once initialized.
    pub fn map(&self) -> Option<&RegisterMap> {
        self.map.as_ref()
    }

    pub fn clock(&self) -> SimulationClock {
        self.clock
    }

    pub fn stats(&self) -> BridgeStats {
        self.stats
    }

    pub fn engine(&self) -> &E {
        &self.engine
    }

    pub fn transport(&self) -> &T {
        &self.transport
    }

    /// Consume the bridge and hand back its collaborators.
    pub fn into_parts(self) -> (E, T) {
        (self.engine, self.transport)
    }

    // -----------------------------------------------------------------------
    // Idle -> Initialized
    // -----------------------------------------------------------------------

    /// Open the engine session, connect the transport and build the map.
    ///
    /// Any failure is fatal: whatever was already opened is released and the
    /// bridge ends up `Closed`.
    pub fn initialize(&mut self) -> Result<(), BridgeError> {
        if self.state != BridgeState::Idle {
            return Err(BridgeError::InvalidState {
                action: "initialize",
                state: self.state,
            });
        }
        if let Err(err) = self.try_initialize() {
            error!(subsystem = err.subsystem(), error = %err, "bridge initialization failed");
            self.close();
            return Err(err);
        }
        self.state = BridgeState::Initialized;
        Ok(())
    }

    fn try_initialize(&mut self) -> Result<(), BridgeError> {
        self.config.validate()?;

        self.engine.open_session().map_err(BridgeError::Engine)?;
        self.held.session = true;
        self.engine.initialize_session().map_err(BridgeError::Engine)?;

        let endpoint = self.transport.endpoint();
        self.transport.connect()?;
        self.held.transport = true;

        let map = RegisterMap::build(self.engine.topology(), &self.config.map)?;
        self.clock = SimulationClock::new(self.engine.step_size(), self.engine.horizon());

        info!(
            endpoint = %endpoint,
            nodes = self.engine.topology().node_count(),
            links = self.engine.topology().link_count(),
            entries = map.len(),
            registers = map.register_count(),
            writable = map.writable().count(),
            step_size = self.clock.step_size,
            "bridge initialized"
        );
        self.map = Some(map);
        Ok(())
    }

    // -----------------------------------------------------------------------
    // Stepping
    // -----------------------------------------------------------------------

    /// Initialize if needed, then iterate until interrupted, the iteration
    /// bound is hit, or a fatal error occurs. Always closes before returning.
    pub fn run(&mut self, stop: &StopSignal) -> Result<ExitReason, BridgeError> {
        if self.state == BridgeState::Idle {
            self.initialize()?;
        }
        if self.state != BridgeState::Initialized {
            return Err(BridgeError::InvalidState {
                action: "run",
                state: self.state,
            });
        }
        self.state = BridgeState::Stepping;

        let result = self.step_loop(stop);
        match &result {
            Ok(ExitReason::Interrupted) => {
                self.state = BridgeState::Interrupted;
                info!(iterations = self.stats.iterations, "bridge interrupted");
            }
            Ok(ExitReason::IterationLimit) => {
                info!(iterations = self.stats.iterations, "iteration limit reached");
            }
            Err(err) => {
                error!(subsystem = err.subsystem(), error = %err, "fatal bridge error");
            }
        }
        self.close();
        result
    }

    fn step_loop(&mut self, stop: &StopSignal) -> Result<ExitReason, BridgeError> {
        let mut attempts: u64 = 0;
        loop {
            if stop.is_raised() {
                return Ok(ExitReason::Interrupted);
            }
            if self.config.max_iterations.is_some_and(|max| attempts >= max) {
                return Ok(ExitReason::IterationLimit);
            }
            self.step_once()?;
            attempts += 1;
            if stop.wait_timeout(self.config.pacing()) {
                return Ok(ExitReason::Interrupted);
            }
        }
    }

    /// Run phases 1-5 once. Pacing is left to the caller.
    pub fn step_once(&mut self) -> Result<IterationOutcome, BridgeError> {
        match self.state {
            BridgeState::Initialized | BridgeState::Stepping => {}
            state => {
                return Err(BridgeError::InvalidState {
                    action: "step",
                    state,
                });
            }
        }
        self.state = BridgeState::Stepping;

        let Self {
            engine,
            transport,
            config,
            map,
            clock,
            stats,
            setpoints_seeded,
            ..
        } = self;
        let Some(map) = map.as_ref() else {
            return Err(BridgeError::InvalidState {
                action: "step",
                state: BridgeState::Stepping,
            });
        };

        // Phase 1: Horizon.
        clock.step_size = engine.step_size();
        clock.horizon = engine.horizon();
        let horizon = clock.extend_horizon();
        engine
            .set_horizon(horizon)
            .map_err(BridgeError::EngineStepFailure)?;

        // Phase 2: Compute.
        let time = engine
            .compute_step()
            .map_err(BridgeError::EngineStepFailure)?;
        clock.current_time = time;

        // Phase 3: Publish.
        let records =
            extract_snapshot(&*engine, map.view()).map_err(BridgeError::EngineStepFailure)?;
        let image = map.encode_image(&records, &config.codec)?;
        let runs = if *setpoints_seeded {
            map.runs(Direction::ReadOnly)
        } else {
            map.full_run().into_iter().collect()
        };
        for run in runs {
            let offset = (run.address - map.base_address()) as usize;
            let words = &image[offset..offset + run.count as usize];
            let chunk = config.max_registers_per_write;
            if let Err(reason) = write_run(transport, run, words, chunk, stats) {
                return skip_or_fail(reason, stats, time);
            }
        }
        if map.has_writable() {
            *setpoints_seeded = true;
        }

        // Phase 4: Setpoints.
        for run in map.runs(Direction::Writable) {
            let words = match read_run(transport, run, config.max_registers_per_write) {
                Ok(words) => words,
                Err(reason) => return skip_or_fail(reason, stats, time),
            };
            apply_setpoints(engine, map, run, &words, &records, config, stats)?;
        }

        // Phase 5: Advance.
        let elapsed = engine
            .advance_step()
            .map_err(BridgeError::EngineStepFailure)?;
        clock.advance(elapsed);

        stats.iterations += 1;
        debug!(time, elapsed, registers = image.len(), "iteration complete");
        Ok(IterationOutcome::Completed { time })
    }

    // -----------------------------------------------------------------------
    // Closing -> Closed
    // -----------------------------------------------------------------------

    /// Close the engine session, release the engine and close the transport,
    /// in that order. Idempotent: resources are released at most once.
    pub fn close(&mut self) {
        if self.state == BridgeState::Closed {
            return;
        }
        self.state = BridgeState::Closing;

        if std::mem::take(&mut self.held.session) {
            if let Err(err) = self.engine.close_session() {
                warn!(error = %err, "closing engine session failed");
            }
        }
        if std::mem::take(&mut self.held.engine) {
            if let Err(err) = self.engine.release() {
                warn!(error = %err, "releasing engine failed");
            }
        }
        if std::mem::take(&mut self.held.transport) {
            if let Err(err) = self.transport.close() {
                warn!(error = %err, "closing transport failed");
            }
        }

        self.state = BridgeState::Closed;
        info!(
            iterations = self.stats.iterations,
            skipped = self.stats.skipped,
            "bridge closed"
        );
    }
}

// ---------------------------------------------------------------------------
// Phase helpers
// ---------------------------------------------------------------------------

/// Decide between skipping the iteration and failing the run.
fn skip_or_fail(
    reason: TransportError,
    stats: &mut BridgeStats,
    time: SimTime,
) -> Result<IterationOutcome, BridgeError> {
    if reason.is_connection_lost() {
        return Err(BridgeError::Connection(reason));
    }
    stats.skipped += 1;
    warn!(time, error = %reason, "transport request failed, skipping iteration");
    Ok(IterationOutcome::Skipped { reason })
}

fn write_run<T: RegisterTransport>(
    transport: &mut T,
    run: RegisterRun,
    words: &[u16],
    chunk: u16,
    stats: &mut BridgeStats,
) -> Result<(), TransportError> {
    let mut address = run.address;
    for part in words.chunks(chunk.max(1) as usize) {
        transport.write_holding_registers(address, part)?;
        stats.registers_written += part.len() as u64;
        address = address.wrapping_add(part.len() as u16);
    }
    Ok(())
}

fn read_run<T: RegisterTransport>(
    transport: &mut T,
    run: RegisterRun,
    chunk: u16,
) -> Result<Vec<u16>, TransportError> {
    let chunk = chunk.max(1) as u32;
    let mut words = Vec::with_capacity(run.count as usize);
    let mut done: u32 = 0;
    while done < run.count {
        let count = chunk.min(run.count - done);
        let address = (run.address as u32 + done) as u16;
        words.extend(transport.read_holding_registers(address, count as u16)?);
        done += count;
    }
    Ok(words)
}

/// Push the writable entries of `run` into the engine when they changed.
fn apply_setpoints<E: HydraulicEngine>(
    engine: &mut E,
    map: &RegisterMap,
    run: RegisterRun,
    words: &[u16],
    records: &[EntityRecord],
    config: &BridgeConfig,
    stats: &mut BridgeStats,
) -> Result<(), BridgeError> {
    let run_end = run.end();
    let entries = map
        .entries()
        .iter()
        .filter(|e| e.is_writable() && e.address >= run.address && e.end() <= run_end);

    for entry in entries {
        let offset = (entry.address - run.address) as usize;
        let slice = words
            .get(offset..offset + entry.width as usize)
            .ok_or(CodecError::MalformedRegisterData {
                expected: offset + entry.width as usize,
                actual: words.len(),
            })?;
        let value = map.decode_entry(entry, slice, &config.codec)?;

        let current = map
            .record_index(entry.entity)
            .and_then(|i| records.get(i))
            .and_then(|r| r.value(entry.field));
        if current.is_some_and(|c| c.same_bits(value)) {
            continue;
        }

        match apply_setpoint(engine, entry, value) {
            Ok(()) => {}
            Err(err @ EngineError::InvalidSetpoint { .. }) => {
                warn!(
                    entity = %entry.entity_id,
                    field = %entry.field,
                    error = %err,
                    "setpoint rejected by the engine"
                );
                continue;
            }
            Err(err) => return Err(BridgeError::Engine(err)),
        }
        stats.setpoints_applied += 1;
        info!(
            entity = %entry.entity_id,
            field = %entry.field,
            value = ?value,
            "setpoint applied"
        );
    }
    Ok(())
}

fn apply_setpoint<E: HydraulicEngine>(
    engine: &mut E,
    entry: &RegisterMapEntry,
    value: FieldValue,
) -> Result<(), EngineError> {
    let not_applicable = || EngineError::NotApplicable {
        entity: entry.entity_id.clone(),
        quantity: entry.field.name(),
    };
    let (EntityRef::Link(link), FieldValue::Real(v)) = (entry.entity, value) else {
        return Err(not_applicable());
    };
    match entry.field {
        Field::Power => engine.set_pump_power(link, v),
        Field::Setting => engine.set_valve_setting(link, v),
        _ => Err(not_applicable()),
    }
}

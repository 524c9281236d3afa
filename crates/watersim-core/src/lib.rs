//! Watersim Core -- bridges a hydraulic network simulation onto a field bus.
//!
//! A water-distribution network (junctions, reservoirs, tanks, pipes, pumps,
//! valves) is stepped forever in simulated time while its state is published
//! as holding registers, so SCADA tools and PLC emulators can poll it like a
//! live plant.
//!
//! # Iteration Pipeline
//!
//! Each call to [`bridge::Bridge::step_once`] runs:
//!
//! 1. **Horizon** -- Push the engine's horizon one step ahead.
//! 2. **Compute** -- Solve the network at the current time.
//! 3. **Publish** -- Extract entity records, encode them against the register
//!    map and write them to the transport.
//! 4. **Setpoints** -- Read writable registers back into the engine.
//! 5. **Advance** -- Move to the next hydraulic time.
//!
//! [`bridge::Bridge::run`] repeats this with wall-clock pacing until a
//! [`stop::StopSignal`] is raised.
//!
//! # Key Types
//!
//! - [`topology::NetworkTopology`] -- Declared entities and their kinds.
//! - [`engine::HydraulicEngine`] -- Capability set the solver must provide.
//! - [`register_map::RegisterMap`] -- Deterministic field-to-address layout.
//! - [`codec::RegisterCodec`] -- f32 to register-pair encoding.
//! - [`transport::RegisterTransport`] -- Holding-register I/O boundary.
//! - [`bridge::Bridge`] -- Lifecycle and loop orchestration.

pub mod bridge;
pub mod clock;
pub mod codec;
pub mod config;
pub mod engine;
pub mod entity;
pub mod extract;
pub mod register_map;
pub mod stop;
pub mod topology;
pub mod transport;

#[cfg(any(test, feature = "test-utils"))]
pub mod test_utils;

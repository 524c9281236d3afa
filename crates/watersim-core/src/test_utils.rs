//! Shared test helpers for unit tests, integration tests and benchmarks.
//!
//! Gated behind `#[cfg(any(test, feature = "test-utils"))]`. The centerpiece
//! is [`MockEngine`], a scripted [`HydraulicEngine`] that records every
//! lifecycle call and checks the horizon rule on each `compute_step`.

use crate::engine::{EngineError, HydraulicEngine, NetworkState, SimTime};
use crate::entity::PipeStatus;
use crate::topology::{LinkIndex, LinkKind, NetworkTopology, NodeIndex, NodeKind};

// ===========================================================================
// Topologies
// ===========================================================================

/// One tank `T1` and one pipe `P1`.
pub fn tank_and_pipe_topology() -> NetworkTopology {
    let mut topo = NetworkTopology::new();
    topo.add_node("T1", NodeKind::Tank).unwrap();
    topo.add_link("P1", LinkKind::Pipe).unwrap();
    topo
}

/// Every entity kind at least once, interleaved.
pub fn mixed_topology() -> NetworkTopology {
    let mut topo = NetworkTopology::new();
    topo.add_node("J1", NodeKind::Junction).unwrap();
    topo.add_node("R1", NodeKind::Reservoir).unwrap();
    topo.add_node("T1", NodeKind::Tank).unwrap();
    topo.add_node("J2", NodeKind::Junction).unwrap();
    topo.add_link("P1", LinkKind::Pipe).unwrap();
    topo.add_link("PU1", LinkKind::Pump).unwrap();
    topo.add_link("P2", LinkKind::Pipe).unwrap();
    topo.add_link("V1", LinkKind::Valve).unwrap();
    topo
}

/// `count` open pipes `P0..`, two registers each in the compact view.
pub fn pipe_topology(count: usize) -> NetworkTopology {
    let mut topo = NetworkTopology::new();
    for i in 0..count {
        topo.add_link(&format!("P{i}"), LinkKind::Pipe).unwrap();
    }
    topo
}

// ===========================================================================
// Mock engine
// ===========================================================================

/// A call made on a [`MockEngine`] through [`HydraulicEngine`].
#[derive(Debug, Clone, PartialEq)]
pub enum EngineCall {
    OpenSession,
    InitializeSession,
    SetHorizon(SimTime),
    ComputeStep { time: SimTime },
    AdvanceStep,
    SetPumpPower { link: u32, power: f32 },
    SetValveSetting { link: u32, setting: f32 },
    CloseSession,
    Release,
}

#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct NodeState {
    pub pressure: f32,
    pub head: f32,
    pub elevation: f32,
    pub min_level: f32,
    pub max_level: f32,
    pub init_level: f32,
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct LinkState {
    pub flow: f32,
    pub status: PipeStatus,
    pub power: f32,
    pub setting: f32,
}

impl Default for LinkState {
    fn default() -> Self {
        Self {
            flow: 0.0,
            status: PipeStatus::Open,
            power: 0.0,
            setting: 0.0,
        }
    }
}

/// Scripted engine with fixed values and a recorded call log.
///
/// Each `compute_step` adds `drift` to every node pressure, so successive
/// iterations publish distinguishable images.
#[derive(Debug, Clone)]
pub struct MockEngine {
    topology: NetworkTopology,
    pub nodes: Vec<NodeState>,
    pub links: Vec<LinkState>,
    pub horizon: SimTime,
    pub step_size: SimTime,
    pub time: SimTime,
    pub drift: f32,
    /// Fail `open_session`.
    pub fail_open: bool,
    /// Fail the `compute_step` call with this zero-based ordinal.
    pub fail_compute_at: Option<usize>,
    computes: usize,
    horizon_violations: usize,
    calls: Vec<EngineCall>,
}

impl MockEngine {
    /// An engine over `topology` with zeroed values, a 20 minute horizon and
    /// 10 minute steps.
    pub fn new(topology: NetworkTopology) -> Self {
        Self {
            nodes: vec![NodeState::default(); topology.node_count()],
            links: vec![LinkState::default(); topology.link_count()],
            topology,
            horizon: 1200,
            step_size: 600,
            time: 0,
            drift: 0.0,
            fail_open: false,
            fail_compute_at: None,
            computes: 0,
            horizon_violations: 0,
            calls: Vec::new(),
        }
    }

    pub fn calls(&self) -> &[EngineCall] {
        &self.calls
    }

    /// How many `compute_step` calls found the horizon too close.
    pub fn horizon_violations(&self) -> usize {
        self.horizon_violations
    }

    fn node_state(&self, node: NodeIndex) -> Result<&NodeState, EngineError> {
        self.nodes.get(node.0 as usize).ok_or(EngineError::UnknownEntity {
            class: "node",
            index: node.0,
        })
    }

    fn link_state(&self, link: LinkIndex) -> Result<&LinkState, EngineError> {
        self.links.get(link.0 as usize).ok_or(EngineError::UnknownEntity {
            class: "link",
            index: link.0,
        })
    }

    fn tank(&self, node: NodeIndex, quantity: &'static str) -> Result<&NodeState, EngineError> {
        self.require_node(node, NodeKind::Tank, quantity)?;
        self.node_state(node)
    }

    fn require_node(
        &self,
        node: NodeIndex,
        kind: NodeKind,
        quantity: &'static str,
    ) -> Result<(), EngineError> {
        match self.topology.node(node) {
            Some(decl) if decl.kind == kind => Ok(()),
            Some(decl) => Err(EngineError::NotApplicable {
                entity: decl.id.clone(),
                quantity,
            }),
            None => Err(EngineError::UnknownEntity {
                class: "node",
                index: node.0,
            }),
        }
    }

    fn invalid_setpoint(&self, link: LinkIndex, quantity: &'static str, value: f32) -> EngineError {
        EngineError::InvalidSetpoint {
            entity: self
                .topology
                .link(link)
                .map_or_else(String::new, |decl| decl.id.clone()),
            quantity,
            value,
        }
    }

    fn require_link(
        &self,
        link: LinkIndex,
        kind: LinkKind,
        quantity: &'static str,
    ) -> Result<(), EngineError> {
        match self.topology.link(link) {
            Some(decl) if decl.kind == kind => Ok(()),
            Some(decl) => Err(EngineError::NotApplicable {
                entity: decl.id.clone(),
                quantity,
            }),
            None => Err(EngineError::UnknownEntity {
                class: "link",
                index: link.0,
            }),
        }
    }
}

impl NetworkState for MockEngine {
    fn topology(&self) -> &NetworkTopology {
        &self.topology
    }

    fn node_pressure(&self, node: NodeIndex) -> Result<f32, EngineError> {
        Ok(self.node_state(node)?.pressure)
    }

    fn node_head(&self, node: NodeIndex) -> Result<f32, EngineError> {
        Ok(self.node_state(node)?.head)
    }

    fn node_elevation(&self, node: NodeIndex) -> Result<f32, EngineError> {
        Ok(self.node_state(node)?.elevation)
    }

    fn tank_min_level(&self, node: NodeIndex) -> Result<f32, EngineError> {
        Ok(self.tank(node, "minimum level")?.min_level)
    }

    fn tank_max_level(&self, node: NodeIndex) -> Result<f32, EngineError> {
        Ok(self.tank(node, "maximum level")?.max_level)
    }

    fn tank_init_level(&self, node: NodeIndex) -> Result<f32, EngineError> {
        Ok(self.tank(node, "initial level")?.init_level)
    }

    fn link_flow(&self, link: LinkIndex) -> Result<f32, EngineError> {
        Ok(self.link_state(link)?.flow)
    }

    fn pipe_status(&self, link: LinkIndex) -> Result<PipeStatus, EngineError> {
        self.require_link(link, LinkKind::Pipe, "status")?;
        Ok(self.link_state(link)?.status)
    }

    fn pump_power(&self, link: LinkIndex) -> Result<f32, EngineError> {
        self.require_link(link, LinkKind::Pump, "power")?;
        Ok(self.link_state(link)?.power)
    }

    fn valve_setting(&self, link: LinkIndex) -> Result<f32, EngineError> {
        self.require_link(link, LinkKind::Valve, "setting")?;
        Ok(self.link_state(link)?.setting)
    }
}

impl HydraulicEngine for MockEngine {
    fn open_session(&mut self) -> Result<(), EngineError> {
        self.calls.push(EngineCall::OpenSession);
        if self.fail_open {
            return Err(EngineError::Session("scripted open failure".into()));
        }
        Ok(())
    }

    fn initialize_session(&mut self) -> Result<(), EngineError> {
        self.calls.push(EngineCall::InitializeSession);
        Ok(())
    }

    fn horizon(&self) -> SimTime {
        self.horizon
    }

    fn set_horizon(&mut self, horizon: SimTime) -> Result<(), EngineError> {
        self.calls.push(EngineCall::SetHorizon(horizon));
        self.horizon = horizon;
        Ok(())
    }

    fn step_size(&self) -> SimTime {
        self.step_size
    }

    fn compute_step(&mut self) -> Result<SimTime, EngineError> {
        self.calls.push(EngineCall::ComputeStep { time: self.time });
        let ordinal = self.computes;
        self.computes += 1;
        if self.fail_compute_at == Some(ordinal) {
            return Err(EngineError::StepFailure {
                time: self.time,
                reason: "scripted divergence".into(),
            });
        }
        if self.horizon < self.time + self.step_size {
            self.horizon_violations += 1;
        }
        for node in &mut self.nodes {
            node.pressure += self.drift;
        }
        Ok(self.time)
    }

    fn advance_step(&mut self) -> Result<SimTime, EngineError> {
        self.calls.push(EngineCall::AdvanceStep);
        self.time += self.step_size;
        Ok(self.step_size)
    }

    fn set_pump_power(&mut self, link: LinkIndex, power: f32) -> Result<(), EngineError> {
        self.require_link(link, LinkKind::Pump, "power")?;
        if !power.is_finite() || power < 0.0 {
            return Err(self.invalid_setpoint(link, "power", power));
        }
        self.calls.push(EngineCall::SetPumpPower { link: link.0, power });
        self.links[link.0 as usize].power = power;
        Ok(())
    }

    fn set_valve_setting(&mut self, link: LinkIndex, setting: f32) -> Result<(), EngineError> {
        self.require_link(link, LinkKind::Valve, "setting")?;
        if !setting.is_finite() {
            return Err(self.invalid_setpoint(link, "setting", setting));
        }
        self.calls.push(EngineCall::SetValveSetting {
            link: link.0,
            setting,
        });
        self.links[link.0 as usize].setting = setting;
        Ok(())
    }

    fn close_session(&mut self) -> Result<(), EngineError> {
        self.calls.push(EngineCall::CloseSession);
        Ok(())
    }

    fn release(&mut self) -> Result<(), EngineError> {
        self.calls.push(EngineCall::Release);
        Ok(())
    }
}

// ===========================================================================
// Engines
// ===========================================================================

/// Tank `T1` (levels 0..10 m, head 104 m) feeding open pipe `P1`.
pub fn tank_and_pipe_engine() -> MockEngine {
    let mut engine = MockEngine::new(tank_and_pipe_topology());
    engine.nodes[0] = NodeState {
        pressure: 4.0,
        head: 104.0,
        elevation: 100.0,
        min_level: 0.0,
        max_level: 10.0,
        init_level: 4.0,
    };
    engine.links[0] = LinkState {
        flow: 12.0,
        status: PipeStatus::Open,
        ..LinkState::default()
    };
    engine
}

/// [`mixed_topology`] with distinct values everywhere. Pump `PU1` runs at
/// 7.5 kW, valve `V1` is set to 30, pipe `P2` is closed.
pub fn mixed_engine() -> MockEngine {
    let mut engine = MockEngine::new(mixed_topology());
    engine.drift = 0.25;
    engine.nodes = vec![
        NodeState {
            pressure: 35.0,
            head: 45.0,
            elevation: 10.0,
            ..NodeState::default()
        },
        NodeState {
            pressure: 0.0,
            head: 60.0,
            elevation: 60.0,
            ..NodeState::default()
        },
        NodeState {
            pressure: 3.0,
            head: 53.0,
            elevation: 50.0,
            min_level: 1.0,
            max_level: 6.0,
            init_level: 3.0,
        },
        NodeState {
            pressure: 28.5,
            head: 40.5,
            elevation: 12.0,
            ..NodeState::default()
        },
    ];
    engine.links = vec![
        LinkState {
            flow: 20.0,
            ..LinkState::default()
        },
        LinkState {
            flow: 18.0,
            power: 7.5,
            ..LinkState::default()
        },
        LinkState {
            flow: 0.0,
            status: PipeStatus::Closed,
            ..LinkState::default()
        },
        LinkState {
            flow: 2.0,
            setting: 30.0,
            ..LinkState::default()
        },
    ];
    engine
}

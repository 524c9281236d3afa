//! Reference engine driven by a network definition.
//!
//! [`NetworkEngine`] implements the full [`HydraulicEngine`] capability set
//! without solving any hydraulics: each `compute_step` evaluates the declared
//! values at the current time, scaled by the entity's pattern multiplier. It
//! keeps the horizon semantics of a real solver (the run ends at the
//! configured duration) so the bridge's horizon extension is exercised, and
//! it accepts pump and valve setpoints.

use std::path::Path;

use tracing::debug;

use watersim_core::engine::{EngineError, HydraulicEngine, NetworkState, SimTime};
use watersim_core::entity::PipeStatus;
use watersim_core::topology::{LinkIndex, LinkKind, NetworkTopology, NodeIndex, NodeKind};

use crate::loader::{DataLoadError, validate_network};
use crate::schema::{LinkData, NetworkDefinition, NodeData};

// ===========================================================================
// Per-entity state
// ===========================================================================

#[derive(Debug, Clone)]
struct NodeModel {
    data: NodeData,
    pattern: Option<usize>,
    pressure: f32,
    head: f32,
}

#[derive(Debug, Clone)]
struct LinkModel {
    data: LinkData,
    pattern: Option<usize>,
    /// Running pump power or valve setting, as last set.
    control: f32,
    flow: f32,
}

/// Where the analysis session is.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Session {
    Closed,
    Open,
    Initialized,
    Released,
}

// ===========================================================================
// NetworkEngine
// ===========================================================================

#[derive(Debug, Clone)]
pub struct NetworkEngine {
    topology: NetworkTopology,
    nodes: Vec<NodeModel>,
    links: Vec<LinkModel>,
    patterns: Vec<Vec<f32>>,
    duration: SimTime,
    hydraulic_step: SimTime,
    pattern_step: SimTime,
    time: SimTime,
    session: Session,
}

impl NetworkEngine {
    /// Validate `network` and build an engine for it. `source` names the
    /// file in errors.
    pub fn from_definition(
        network: NetworkDefinition,
        source: &Path,
    ) -> Result<Self, DataLoadError> {
        let (node_patterns, link_patterns) = validate_network(&network, source)?;

        let mut topology = NetworkTopology::new();
        let duplicate = |class, name: &str| DataLoadError::DuplicateName {
            file: source.to_path_buf(),
            class,
            name: name.to_string(),
        };
        for node in &network.nodes {
            let kind = match node {
                NodeData::Junction { .. } => NodeKind::Junction,
                NodeData::Reservoir { .. } => NodeKind::Reservoir,
                NodeData::Tank { .. } => NodeKind::Tank,
            };
            topology
                .add_node(node.id(), kind)
                .map_err(|_| duplicate("node", node.id()))?;
        }
        for link in &network.links {
            let kind = match link {
                LinkData::Pipe { .. } => LinkKind::Pipe,
                LinkData::Pump { .. } => LinkKind::Pump,
                LinkData::Valve { .. } => LinkKind::Valve,
            };
            topology
                .add_link(link.id(), kind)
                .map_err(|_| duplicate("link", link.id()))?;
        }

        let nodes = network
            .nodes
            .into_iter()
            .zip(node_patterns)
            .map(|(data, pattern)| NodeModel {
                data,
                pattern,
                pressure: 0.0,
                head: 0.0,
            })
            .collect();
        let links = network
            .links
            .into_iter()
            .zip(link_patterns)
            .map(|(data, pattern)| {
                let control = match &data {
                    LinkData::Pump { power, .. } => *power,
                    LinkData::Valve { setting, .. } => *setting,
                    LinkData::Pipe { .. } => 0.0,
                };
                LinkModel {
                    data,
                    pattern,
                    control,
                    flow: 0.0,
                }
            })
            .collect();

        let options = network.options;
        let mut engine = Self {
            topology,
            nodes,
            links,
            patterns: network.patterns.into_iter().map(|p| p.multipliers).collect(),
            duration: options.duration,
            hydraulic_step: options.hydraulic_step,
            pattern_step: options.pattern_step.unwrap_or(options.hydraulic_step),
            time: 0,
            session: Session::Closed,
        };
        engine.evaluate();
        Ok(engine)
    }

    pub fn node_count(&self) -> usize {
        self.topology.node_count()
    }

    pub fn link_count(&self) -> usize {
        self.topology.link_count()
    }

    /// Current simulated time.
    pub fn time(&self) -> SimTime {
        self.time
    }

    fn multiplier(&self, pattern: Option<usize>) -> f32 {
        let Some(multipliers) = pattern.and_then(|p| self.patterns.get(p)) else {
            return 1.0;
        };
        if multipliers.is_empty() {
            return 1.0;
        }
        let period = (self.time / self.pattern_step.max(1)) as usize;
        multipliers[period % multipliers.len()]
    }

    /// Recompute every value for the current time.
    fn evaluate(&mut self) {
        let node_multipliers: Vec<f32> =
            self.nodes.iter().map(|n| self.multiplier(n.pattern)).collect();
        for (node, m) in self.nodes.iter_mut().zip(node_multipliers) {
            let (pressure, head) = match node.data {
                NodeData::Junction {
                    elevation, pressure, ..
                } => {
                    let pressure = pressure * m;
                    (pressure, elevation + pressure)
                }
                NodeData::Reservoir { head, .. } => (0.0, head * m),
                NodeData::Tank {
                    elevation,
                    init_level,
                    min_level,
                    max_level,
                    ..
                } => {
                    let level = (init_level * m).clamp(min_level, max_level);
                    (level, elevation + level)
                }
            };
            node.pressure = pressure;
            node.head = head;
        }

        let link_multipliers: Vec<f32> =
            self.links.iter().map(|l| self.multiplier(l.pattern)).collect();
        for (link, m) in self.links.iter_mut().zip(link_multipliers) {
            link.flow = match link.data {
                LinkData::Pipe {
                    status: PipeStatus::Closed,
                    ..
                } => 0.0,
                LinkData::Pipe { flow, .. } | LinkData::Valve { flow, .. } => flow * m,
                LinkData::Pump { power, flow, .. } if power > 0.0 => flow * link.control / power,
                LinkData::Pump { .. } => 0.0,
            };
        }
    }

    fn require_initialized(&self) -> Result<(), EngineError> {
        match self.session {
            Session::Initialized => Ok(()),
            other => Err(EngineError::Session(format!(
                "hydraulic session is {other:?}, not initialized"
            ))),
        }
    }

    fn node(&self, node: NodeIndex) -> Result<&NodeModel, EngineError> {
        self.nodes.get(node.0 as usize).ok_or(EngineError::UnknownEntity {
            class: "node",
            index: node.0,
        })
    }

    fn link(&self, link: LinkIndex) -> Result<&LinkModel, EngineError> {
        self.links.get(link.0 as usize).ok_or(EngineError::UnknownEntity {
            class: "link",
            index: link.0,
        })
    }

    fn tank(
        &self,
        node: NodeIndex,
        quantity: &'static str,
    ) -> Result<(f32, f32, f32), EngineError> {
        match &self.node(node)?.data {
            NodeData::Tank {
                init_level,
                min_level,
                max_level,
                ..
            } => Ok((*init_level, *min_level, *max_level)),
            other => Err(EngineError::NotApplicable {
                entity: other.id().to_string(),
                quantity,
            }),
        }
    }

    fn control_mut(
        &mut self,
        link: LinkIndex,
        kind: LinkKind,
        quantity: &'static str,
    ) -> Result<&mut f32, EngineError> {
        let model = self
            .links
            .get_mut(link.0 as usize)
            .ok_or(EngineError::UnknownEntity {
                class: "link",
                index: link.0,
            })?;
        let matches = matches!(
            (&model.data, kind),
            (LinkData::Pump { .. }, LinkKind::Pump) | (LinkData::Valve { .. }, LinkKind::Valve)
        );
        if !matches {
            return Err(EngineError::NotApplicable {
                entity: model.data.id().to_string(),
                quantity,
            });
        }
        Ok(&mut model.control)
    }

    fn invalid_setpoint(&self, link: LinkIndex, quantity: &'static str, value: f32) -> EngineError {
        EngineError::InvalidSetpoint {
            entity: self
                .links
                .get(link.0 as usize)
                .map_or_else(String::new, |m| m.data.id().to_string()),
            quantity,
            value,
        }
    }
}

impl NetworkState for NetworkEngine {
    fn topology(&self) -> &NetworkTopology {
        &self.topology
    }

    fn node_pressure(&self, node: NodeIndex) -> Result<f32, EngineError> {
        Ok(self.node(node)?.pressure)
    }

    fn node_head(&self, node: NodeIndex) -> Result<f32, EngineError> {
        Ok(self.node(node)?.head)
    }

    fn node_elevation(&self, node: NodeIndex) -> Result<f32, EngineError> {
        Ok(match self.node(node)?.data {
            NodeData::Junction { elevation, .. } | NodeData::Tank { elevation, .. } => elevation,
            NodeData::Reservoir { head, .. } => head,
        })
    }

    fn tank_min_level(&self, node: NodeIndex) -> Result<f32, EngineError> {
        Ok(self.tank(node, "minimum level")?.1)
    }

    fn tank_max_level(&self, node: NodeIndex) -> Result<f32, EngineError> {
        Ok(self.tank(node, "maximum level")?.2)
    }

    fn tank_init_level(&self, node: NodeIndex) -> Result<f32, EngineError> {
        Ok(self.tank(node, "initial level")?.0)
    }

    fn link_flow(&self, link: LinkIndex) -> Result<f32, EngineError> {
        Ok(self.link(link)?.flow)
    }

    fn pipe_status(&self, link: LinkIndex) -> Result<PipeStatus, EngineError> {
        match &self.link(link)?.data {
            LinkData::Pipe { status, .. } => Ok(*status),
            other => Err(EngineError::NotApplicable {
                entity: other.id().to_string(),
                quantity: "status",
            }),
        }
    }

    fn pump_power(&self, link: LinkIndex) -> Result<f32, EngineError> {
        let model = self.link(link)?;
        match model.data {
            LinkData::Pump { .. } => Ok(model.control),
            _ => Err(EngineError::NotApplicable {
                entity: model.data.id().to_string(),
                quantity: "power",
            }),
        }
    }

    fn valve_setting(&self, link: LinkIndex) -> Result<f32, EngineError> {
        let model = self.link(link)?;
        match model.data {
            LinkData::Valve { .. } => Ok(model.control),
            _ => Err(EngineError::NotApplicable {
                entity: model.data.id().to_string(),
                quantity: "setting",
            }),
        }
    }
}

impl HydraulicEngine for NetworkEngine {
    fn open_session(&mut self) -> Result<(), EngineError> {
        match self.session {
            Session::Closed => {
                self.session = Session::Open;
                Ok(())
            }
            other => Err(EngineError::Session(format!("cannot open a session while {other:?}"))),
        }
    }

    fn initialize_session(&mut self) -> Result<(), EngineError> {
        if self.session != Session::Open {
            return Err(EngineError::Session("no open session to initialize".into()));
        }
        self.time = 0;
        self.evaluate();
        self.session = Session::Initialized;
        Ok(())
    }

    fn horizon(&self) -> SimTime {
        self.duration
    }

    fn set_horizon(&mut self, horizon: SimTime) -> Result<(), EngineError> {
        self.duration = horizon;
        Ok(())
    }

    fn step_size(&self) -> SimTime {
        self.hydraulic_step
    }

    fn compute_step(&mut self) -> Result<SimTime, EngineError> {
        self.require_initialized()?;
        if self.time > self.duration {
            return Err(EngineError::StepFailure {
                time: self.time,
                reason: format!("time is past the horizon of {}s", self.duration),
            });
        }
        self.evaluate();
        debug!(time = self.time, "network evaluated");
        Ok(self.time)
    }

    /// Returns 0 once the horizon is reached, as the run is then over.
    fn advance_step(&mut self) -> Result<SimTime, EngineError> {
        self.require_initialized()?;
        if self.time >= self.duration {
            return Ok(0);
        }
        let elapsed = self.hydraulic_step.min(self.duration - self.time);
        self.time += elapsed;
        Ok(elapsed)
    }

    fn set_pump_power(&mut self, link: LinkIndex, power: f32) -> Result<(), EngineError> {
        let control = self.control_mut(link, LinkKind::Pump, "power")?;
        if power.is_finite() && power >= 0.0 {
            *control = power;
            return Ok(());
        }
        Err(self.invalid_setpoint(link, "power", power))
    }

    fn set_valve_setting(&mut self, link: LinkIndex, setting: f32) -> Result<(), EngineError> {
        let control = self.control_mut(link, LinkKind::Valve, "setting")?;
        if setting.is_finite() {
            *control = setting;
            return Ok(());
        }
        Err(self.invalid_setpoint(link, "setting", setting))
    }

    fn close_session(&mut self) -> Result<(), EngineError> {
        match self.session {
            Session::Open | Session::Initialized => {
                self.session = Session::Closed;
                Ok(())
            }
            other => Err(EngineError::Session(format!("no session to close ({other:?})"))),
        }
    }

    fn release(&mut self) -> Result<(), EngineError> {
        self.session = Session::Released;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::loader::{Format, deserialize_str};

    fn engine(toml_str: &str) -> NetworkEngine {
        let path = Path::new("test.toml");
        let network: NetworkDefinition = deserialize_str(toml_str, Format::Toml, path).unwrap();
        NetworkEngine::from_definition(network, path).unwrap()
    }

    fn started(toml_str: &str) -> NetworkEngine {
        let mut engine = engine(toml_str);
        engine.open_session().unwrap();
        engine.initialize_session().unwrap();
        engine
    }

    const TANK_AND_PIPE: &str = r#"
[[nodes]]
kind = "tank"
id = "T1"
elevation = 100.0
init_level = 4.0
min_level = 0.0
max_level = 10.0

[[links]]
kind = "pipe"
id = "P1"
flow = 12.0
"#;

    const PUMPED: &str = r#"
[options]
duration = 3600
hydraulic_step = 600
pattern_step = 1200

[[nodes]]
kind = "junction"
id = "J1"
elevation = 10.0
pressure = 30.0
pattern = "demand"

[[links]]
kind = "pump"
id = "PU1"
power = 10.0
flow = 20.0

[[links]]
kind = "valve"
id = "V1"
setting = 30.0

[[patterns]]
id = "demand"
multipliers = [1.0, 0.5]
"#;

    #[test]
    fn tank_values_come_from_definition() {
        let engine = started(TANK_AND_PIPE);
        let tank = NodeIndex(0);
        assert_eq!(engine.tank_min_level(tank).unwrap(), 0.0);
        assert_eq!(engine.tank_max_level(tank).unwrap(), 10.0);
        assert_eq!(engine.tank_init_level(tank).unwrap(), 4.0);
        assert_eq!(engine.node_pressure(tank).unwrap(), 4.0);
        assert_eq!(engine.node_head(tank).unwrap(), 104.0);
        assert_eq!(engine.pipe_status(LinkIndex(0)).unwrap(), PipeStatus::Open);
        assert_eq!(engine.link_flow(LinkIndex(0)).unwrap(), 12.0);
    }

    #[test]
    fn kind_specific_queries_are_checked() {
        let engine = started(PUMPED);
        assert!(matches!(
            engine.tank_min_level(NodeIndex(0)),
            Err(EngineError::NotApplicable { .. })
        ));
        assert!(matches!(
            engine.pipe_status(LinkIndex(0)),
            Err(EngineError::NotApplicable { .. })
        ));
        assert!(matches!(
            engine.node_head(NodeIndex(3)),
            Err(EngineError::UnknownEntity { class: "node", index: 3 })
        ));
    }

    #[test]
    fn stepping_requires_an_initialized_session() {
        let mut engine = engine(TANK_AND_PIPE);
        assert!(matches!(engine.compute_step(), Err(EngineError::Session(_))));
        engine.open_session().unwrap();
        assert!(engine.compute_step().is_err());
        engine.initialize_session().unwrap();
        assert_eq!(engine.compute_step().unwrap(), 0);
    }

    #[test]
    fn run_ends_at_the_horizon() {
        let mut engine = started(TANK_AND_PIPE);
        let mut times = Vec::new();
        loop {
            times.push(engine.compute_step().unwrap());
            if engine.advance_step().unwrap() == 0 {
                break;
            }
        }
        assert_eq!(times, vec![0, 600, 1200]);
    }

    #[test]
    fn extending_the_horizon_keeps_it_running() {
        let mut engine = started(TANK_AND_PIPE);
        for expected in (0..20).map(|i| i * 600) {
            let horizon = engine.horizon() + engine.step_size();
            engine.set_horizon(horizon).unwrap();
            assert_eq!(engine.compute_step().unwrap(), expected);
            assert_eq!(engine.advance_step().unwrap(), 600);
        }
    }

    #[test]
    fn past_the_horizon_is_a_step_failure() {
        let mut engine = started(TANK_AND_PIPE);
        engine.time = 5000;
        assert!(matches!(
            engine.compute_step(),
            Err(EngineError::StepFailure { time: 5000, .. })
        ));
    }

    #[test]
    fn patterns_scale_by_pattern_period() {
        let mut engine = started(PUMPED);
        let mut pressures = Vec::new();
        for _ in 0..4 {
            engine.compute_step().unwrap();
            pressures.push(engine.node_pressure(NodeIndex(0)).unwrap());
            engine.advance_step().unwrap();
        }
        // Pattern period is two hydraulic steps.
        assert_eq!(pressures, vec![30.0, 30.0, 15.0, 15.0]);
        assert_eq!(engine.node_head(NodeIndex(0)).unwrap(), 25.0);
    }

    #[test]
    fn pump_flow_follows_power() {
        let mut engine = started(PUMPED);
        let pump = LinkIndex(0);
        engine.compute_step().unwrap();
        assert_eq!(engine.link_flow(pump).unwrap(), 20.0);

        engine.set_pump_power(pump, 5.0).unwrap();
        assert_eq!(engine.pump_power(pump).unwrap(), 5.0);
        engine.compute_step().unwrap();
        assert_eq!(engine.link_flow(pump).unwrap(), 10.0);

        assert!(matches!(
            engine.set_pump_power(pump, -1.0),
            Err(EngineError::InvalidSetpoint { quantity: "power", .. })
        ));
        assert!(engine.set_pump_power(pump, f32::INFINITY).is_err());
        assert_eq!(engine.pump_power(pump).unwrap(), 5.0);
    }

    #[test]
    fn setters_check_the_link_kind() {
        let mut engine = started(PUMPED);
        assert!(matches!(
            engine.set_valve_setting(LinkIndex(0), 1.0),
            Err(EngineError::NotApplicable { .. })
        ));
        engine.set_valve_setting(LinkIndex(1), 45.0).unwrap();
        assert_eq!(engine.valve_setting(LinkIndex(1)).unwrap(), 45.0);
    }

    #[test]
    fn nan_setting_is_rejected_and_kept() {
        let mut engine = started(PUMPED);
        let err = engine.set_valve_setting(LinkIndex(1), f32::NAN).unwrap_err();
        assert!(matches!(
            err,
            EngineError::InvalidSetpoint { ref entity, quantity: "setting", .. } if entity == "V1"
        ));
        assert_eq!(engine.valve_setting(LinkIndex(1)).unwrap(), 30.0);
    }

    #[test]
    fn closed_pipes_carry_no_flow() {
        let mut engine = started(
            r#"
[[links]]
kind = "pipe"
id = "P1"
status = "closed"
flow = 12.0
"#,
        );
        engine.compute_step().unwrap();
        assert_eq!(engine.link_flow(LinkIndex(0)).unwrap(), 0.0);
        assert_eq!(engine.pipe_status(LinkIndex(0)).unwrap().code(), 0);
    }

    #[test]
    fn session_lifecycle() {
        let mut engine = started(TANK_AND_PIPE);
        assert!(engine.open_session().is_err());
        engine.close_session().unwrap();
        assert!(engine.close_session().is_err());
        engine.release().unwrap();
        assert!(engine.open_session().is_err());
    }
}

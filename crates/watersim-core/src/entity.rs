//! Entity records and their per-kind field schemas.
//!
//! Every node and link is published as a tagged record whose shape is a pure
//! function of the entity's kind. The schema functions answer "which fields
//! does kind K publish, in which order" without touching live engine state,
//! which is what the register map is built from. Records produced by the
//! extractor always carry exactly the fields their schema lists.

use serde::{Deserialize, Serialize};

use crate::topology::{EntityKind, LinkKind, NodeKind};

// ---------------------------------------------------------------------------
// Fields
// ---------------------------------------------------------------------------

/// A published field of an entity.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Field {
    Pressure,
    Head,
    MinLevel,
    MaxLevel,
    InitLevel,
    Elevation,
    LinkType,
    Status,
    Flow,
    Power,
    Setting,
}

/// Wire representation of a field.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum FieldFormat {
    /// IEEE-754 single precision, two registers.
    Real,
    /// Small non-negative integer code, one register.
    Integer,
}

impl FieldFormat {
    /// Number of registers one value occupies.
    pub fn width(self) -> u16 {
        match self {
            FieldFormat::Real => 2,
            FieldFormat::Integer => 1,
        }
    }
}

impl Field {
    pub fn name(self) -> &'static str {
        match self {
            Field::Pressure => "pressure",
            Field::Head => "head",
            Field::MinLevel => "min_level",
            Field::MaxLevel => "max_level",
            Field::InitLevel => "init_level",
            Field::Elevation => "elevation",
            Field::LinkType => "type",
            Field::Status => "status",
            Field::Flow => "flow",
            Field::Power => "power",
            Field::Setting => "setting",
        }
    }

    pub fn format(self) -> FieldFormat {
        match self {
            Field::LinkType | Field::Status => FieldFormat::Integer,
            _ => FieldFormat::Real,
        }
    }

    /// Registers occupied by this field.
    pub fn width(self) -> u16 {
        self.format().width()
    }

    /// Whether the field is a control input the engine accepts back.
    pub fn is_setpoint(self) -> bool {
        matches!(self, Field::Power | Field::Setting)
    }
}

impl std::fmt::Display for Field {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.pad(self.name())
    }
}

/// A field value as published.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum FieldValue {
    Real(f32),
    Integer(u16),
}

impl FieldValue {
    pub fn format(self) -> FieldFormat {
        match self {
            FieldValue::Real(_) => FieldFormat::Real,
            FieldValue::Integer(_) => FieldFormat::Integer,
        }
    }

    /// Bit-level equality, so NaN payloads compare equal to themselves.
    pub fn same_bits(self, other: FieldValue) -> bool {
        match (self, other) {
            (FieldValue::Real(a), FieldValue::Real(b)) => a.to_bits() == b.to_bits(),
            (FieldValue::Integer(a), FieldValue::Integer(b)) => a == b,
            _ => false,
        }
    }
}

// ---------------------------------------------------------------------------
// Views and schemas
// ---------------------------------------------------------------------------

/// Which optional fields a record includes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RecordView {
    /// Mandatory fields only.
    #[default]
    Compact,
    /// Adds tank geometry and link flow.
    Extended,
}

const NODE_FIELDS: &[Field] = &[Field::Pressure, Field::Head];
const TANK_FIELDS: &[Field] = &[Field::Pressure, Field::Head, Field::MinLevel, Field::MaxLevel];
const TANK_FIELDS_EXTENDED: &[Field] = &[
    Field::Pressure,
    Field::Head,
    Field::MinLevel,
    Field::MaxLevel,
    Field::InitLevel,
    Field::Elevation,
];
const PIPE_FIELDS: &[Field] = &[Field::LinkType, Field::Status];
const PIPE_FIELDS_EXTENDED: &[Field] = &[Field::LinkType, Field::Status, Field::Flow];
const PUMP_FIELDS: &[Field] = &[Field::LinkType, Field::Power];
const PUMP_FIELDS_EXTENDED: &[Field] = &[Field::LinkType, Field::Power, Field::Flow];
const VALVE_FIELDS: &[Field] = &[Field::LinkType, Field::Setting];
const VALVE_FIELDS_EXTENDED: &[Field] = &[Field::LinkType, Field::Setting, Field::Flow];

/// Fields a node of `kind` publishes, in register order.
pub fn node_schema(kind: NodeKind, view: RecordView) -> &'static [Field] {
    match (kind, view) {
        (NodeKind::Junction | NodeKind::Reservoir, _) => NODE_FIELDS,
        (NodeKind::Tank, RecordView::Compact) => TANK_FIELDS,
        (NodeKind::Tank, RecordView::Extended) => TANK_FIELDS_EXTENDED,
    }
}

/// Fields a link of `kind` publishes, in register order.
pub fn link_schema(kind: LinkKind, view: RecordView) -> &'static [Field] {
    match (kind, view) {
        (LinkKind::Pipe, RecordView::Compact) => PIPE_FIELDS,
        (LinkKind::Pipe, RecordView::Extended) => PIPE_FIELDS_EXTENDED,
        (LinkKind::Pump, RecordView::Compact) => PUMP_FIELDS,
        (LinkKind::Pump, RecordView::Extended) => PUMP_FIELDS_EXTENDED,
        (LinkKind::Valve, RecordView::Compact) => VALVE_FIELDS,
        (LinkKind::Valve, RecordView::Extended) => VALVE_FIELDS_EXTENDED,
    }
}

/// Fields any entity of `kind` publishes, in register order.
pub fn schema(kind: EntityKind, view: RecordView) -> &'static [Field] {
    match kind {
        EntityKind::Node(kind) => node_schema(kind, view),
        EntityKind::Link(kind) => link_schema(kind, view),
    }
}

// ---------------------------------------------------------------------------
// Records
// ---------------------------------------------------------------------------

/// Open/closed state of a pipe.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PipeStatus {
    Closed,
    Open,
}

impl PipeStatus {
    pub fn code(self) -> u16 {
        match self {
            PipeStatus::Closed => 0,
            PipeStatus::Open => 1,
        }
    }
}

/// Tank geometry published only in the extended view.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct TankGeometry {
    pub init_level: f32,
    pub elevation: f32,
}

/// Per-step values of a node.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum NodeRecord {
    Junction {
        pressure: f32,
        head: f32,
    },
    Reservoir {
        pressure: f32,
        head: f32,
    },
    Tank {
        pressure: f32,
        head: f32,
        min_level: f32,
        max_level: f32,
        geometry: Option<TankGeometry>,
    },
}

/// Per-step values of a link. `flow` is present only in the extended view.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum LinkRecord {
    Pipe {
        status: PipeStatus,
        flow: Option<f32>,
    },
    Pump {
        power: f32,
        flow: Option<f32>,
    },
    Valve {
        setting: f32,
        flow: Option<f32>,
    },
}

/// A record for any entity.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum EntityRecord {
    Node(NodeRecord),
    Link(LinkRecord),
}

impl NodeRecord {
    pub fn kind(&self) -> NodeKind {
        match self {
            NodeRecord::Junction { .. } => NodeKind::Junction,
            NodeRecord::Reservoir { .. } => NodeKind::Reservoir,
            NodeRecord::Tank { .. } => NodeKind::Tank,
        }
    }

    fn append_fields(&self, out: &mut Vec<(Field, FieldValue)>) {
        match *self {
            NodeRecord::Junction { pressure, head } | NodeRecord::Reservoir { pressure, head } => {
                out.push((Field::Pressure, FieldValue::Real(pressure)));
                out.push((Field::Head, FieldValue::Real(head)));
            }
            NodeRecord::Tank {
                pressure,
                head,
                min_level,
                max_level,
                geometry,
            } => {
                out.push((Field::Pressure, FieldValue::Real(pressure)));
                out.push((Field::Head, FieldValue::Real(head)));
                out.push((Field::MinLevel, FieldValue::Real(min_level)));
                out.push((Field::MaxLevel, FieldValue::Real(max_level)));
                if let Some(geometry) = geometry {
                    out.push((Field::InitLevel, FieldValue::Real(geometry.init_level)));
                    out.push((Field::Elevation, FieldValue::Real(geometry.elevation)));
                }
            }
        }
    }
}

impl LinkRecord {
    pub fn kind(&self) -> LinkKind {
        match self {
            LinkRecord::Pipe { .. } => LinkKind::Pipe,
            LinkRecord::Pump { .. } => LinkKind::Pump,
            LinkRecord::Valve { .. } => LinkKind::Valve,
        }
    }

    fn append_fields(&self, out: &mut Vec<(Field, FieldValue)>) {
        out.push((Field::LinkType, FieldValue::Integer(self.kind().code())));
        let flow = match *self {
            LinkRecord::Pipe { status, flow } => {
                out.push((Field::Status, FieldValue::Integer(status.code())));
                flow
            }
            LinkRecord::Pump { power, flow } => {
                out.push((Field::Power, FieldValue::Real(power)));
                flow
            }
            LinkRecord::Valve { setting, flow } => {
                out.push((Field::Setting, FieldValue::Real(setting)));
                flow
            }
        };
        if let Some(flow) = flow {
            out.push((Field::Flow, FieldValue::Real(flow)));
        }
    }
}

impl EntityRecord {
    pub fn kind(&self) -> EntityKind {
        match self {
            EntityRecord::Node(node) => EntityKind::Node(node.kind()),
            EntityRecord::Link(link) => EntityKind::Link(link.kind()),
        }
    }

    /// All published fields in register order.
    pub fn fields(&self) -> Vec<(Field, FieldValue)> {
        let mut out = Vec::with_capacity(6);
        match self {
            EntityRecord::Node(node) => node.append_fields(&mut out),
            EntityRecord::Link(link) => link.append_fields(&mut out),
        }
        out
    }

    /// Value of a single field, if this record carries it.
    pub fn value(&self, field: Field) -> Option<FieldValue> {
        self.fields()
            .into_iter()
            .find(|(f, _)| *f == field)
            .map(|(_, v)| v)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn names(fields: &[(Field, FieldValue)]) -> Vec<Field> {
        fields.iter().map(|(f, _)| *f).collect()
    }

    #[test]
    fn junction_never_has_levels() {
        let record = EntityRecord::Node(NodeRecord::Junction {
            pressure: 30.0,
            head: 80.0,
        });
        assert!(record.value(Field::MinLevel).is_none());
        assert!(record.value(Field::MaxLevel).is_none());
        for view in [RecordView::Compact, RecordView::Extended] {
            let schema = node_schema(NodeKind::Junction, view);
            assert!(!schema.contains(&Field::MinLevel));
            assert!(!schema.contains(&Field::MaxLevel));
        }
    }

    #[test]
    fn tank_always_has_levels() {
        for view in [RecordView::Compact, RecordView::Extended] {
            let schema = node_schema(NodeKind::Tank, view);
            assert!(schema.contains(&Field::MinLevel));
            assert!(schema.contains(&Field::MaxLevel));
        }
    }

    #[test]
    fn pipe_never_has_power_or_setting() {
        for view in [RecordView::Compact, RecordView::Extended] {
            let schema = link_schema(LinkKind::Pipe, view);
            assert!(!schema.contains(&Field::Power));
            assert!(!schema.contains(&Field::Setting));
        }
    }

    #[test]
    fn record_fields_follow_schema() {
        let tank = EntityRecord::Node(NodeRecord::Tank {
            pressure: 1.0,
            head: 2.0,
            min_level: 0.0,
            max_level: 10.0,
            geometry: Some(TankGeometry {
                init_level: 5.0,
                elevation: 100.0,
            }),
        });
        assert_eq!(
            names(&tank.fields()),
            schema(tank.kind(), RecordView::Extended)
        );

        let valve = EntityRecord::Link(LinkRecord::Valve {
            setting: 0.5,
            flow: None,
        });
        assert_eq!(
            names(&valve.fields()),
            schema(valve.kind(), RecordView::Compact)
        );
    }

    #[test]
    fn link_type_and_status_are_integers() {
        let pipe = EntityRecord::Link(LinkRecord::Pipe {
            status: PipeStatus::Open,
            flow: None,
        });
        assert_eq!(pipe.value(Field::LinkType), Some(FieldValue::Integer(1)));
        assert_eq!(pipe.value(Field::Status), Some(FieldValue::Integer(1)));
        assert_eq!(Field::Status.width(), 1);
        assert_eq!(Field::Power.width(), 2);
    }

    #[test]
    fn setpoint_fields() {
        assert!(Field::Power.is_setpoint());
        assert!(Field::Setting.is_setpoint());
        assert!(!Field::Flow.is_setpoint());
        assert!(!Field::Status.is_setpoint());
    }

    #[test]
    fn same_bits_treats_nan_as_equal() {
        let nan = FieldValue::Real(f32::NAN);
        assert!(nan.same_bits(nan));
        assert!(!FieldValue::Real(0.0).same_bits(FieldValue::Real(-0.0)));
        assert!(!FieldValue::Integer(1).same_bits(FieldValue::Real(1.0)));
    }
}

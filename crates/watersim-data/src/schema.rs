//! Serde data file structs for network definitions.
//!
//! A network file declares analysis options, nodes, links and optional
//! multiplier patterns. Nodes and links are tagged by `kind`, so a TOML
//! file reads as:
//!
//! ```toml
//! [options]
//! duration = 1200
//! hydraulic_step = 600
//!
//! [[nodes]]
//! kind = "tank"
//! id = "T1"
//! elevation = 100.0
//! init_level = 4.0
//! min_level = 0.0
//! max_level = 10.0
//!
//! [[links]]
//! kind = "pipe"
//! id = "P1"
//! flow = 12.0
//! ```

use serde::Deserialize;

use watersim_core::entity::PipeStatus;

// ===========================================================================
// Options
// ===========================================================================

/// Analysis options. Times are in seconds.
#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct OptionsData {
    /// Configured horizon of a run.
    #[serde(default = "default_duration")]
    pub duration: u64,
    #[serde(default = "default_hydraulic_step")]
    pub hydraulic_step: u64,
    /// Interval between pattern entries. Defaults to the hydraulic step.
    #[serde(default)]
    pub pattern_step: Option<u64>,
}

fn default_duration() -> u64 {
    1200
}

fn default_hydraulic_step() -> u64 {
    600
}

impl Default for OptionsData {
    fn default() -> Self {
        Self {
            duration: default_duration(),
            hydraulic_step: default_hydraulic_step(),
            pattern_step: None,
        }
    }
}

// ===========================================================================
// Nodes
// ===========================================================================

/// A node definition. Heads and levels are in metres.
#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum NodeData {
    Junction {
        id: String,
        elevation: f32,
        /// Pressure head before pattern scaling.
        #[serde(default)]
        pressure: f32,
        #[serde(default)]
        pattern: Option<String>,
    },
    Reservoir {
        id: String,
        head: f32,
        #[serde(default)]
        pattern: Option<String>,
    },
    Tank {
        id: String,
        elevation: f32,
        init_level: f32,
        min_level: f32,
        max_level: f32,
        /// Scales the initial level, clamped to the level bounds.
        #[serde(default)]
        pattern: Option<String>,
    },
}

impl NodeData {
    pub fn id(&self) -> &str {
        match self {
            NodeData::Junction { id, .. }
            | NodeData::Reservoir { id, .. }
            | NodeData::Tank { id, .. } => id,
        }
    }

    pub fn pattern(&self) -> Option<&str> {
        match self {
            NodeData::Junction { pattern, .. }
            | NodeData::Reservoir { pattern, .. }
            | NodeData::Tank { pattern, .. } => pattern.as_deref(),
        }
    }
}

// ===========================================================================
// Links
// ===========================================================================

/// A link definition. Flows are in the network's flow unit.
#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum LinkData {
    Pipe {
        id: String,
        #[serde(default = "default_status")]
        status: PipeStatus,
        #[serde(default)]
        flow: f32,
        #[serde(default)]
        pattern: Option<String>,
    },
    Pump {
        id: String,
        /// Rated power; flow scales with the running power.
        power: f32,
        #[serde(default)]
        flow: f32,
    },
    Valve {
        id: String,
        setting: f32,
        #[serde(default)]
        flow: f32,
        #[serde(default)]
        pattern: Option<String>,
    },
}

fn default_status() -> PipeStatus {
    PipeStatus::Open
}

impl LinkData {
    pub fn id(&self) -> &str {
        match self {
            LinkData::Pipe { id, .. }
            | LinkData::Pump { id, .. }
            | LinkData::Valve { id, .. } => id,
        }
    }

    pub fn pattern(&self) -> Option<&str> {
        match self {
            LinkData::Pipe { pattern, .. } | LinkData::Valve { pattern, .. } => pattern.as_deref(),
            LinkData::Pump { .. } => None,
        }
    }
}

// ===========================================================================
// Patterns
// ===========================================================================

/// A cyclic list of multipliers, one per pattern step.
#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct PatternData {
    pub id: String,
    pub multipliers: Vec<f32>,
}

// ===========================================================================
// Network
// ===========================================================================

/// A complete network file.
#[derive(Debug, Clone, PartialEq, Default, Deserialize)]
pub struct NetworkDefinition {
    #[serde(default)]
    pub options: OptionsData,
    #[serde(default)]
    pub nodes: Vec<NodeData>,
    #[serde(default)]
    pub links: Vec<LinkData>,
    #[serde(default)]
    pub patterns: Vec<PatternData>,
}

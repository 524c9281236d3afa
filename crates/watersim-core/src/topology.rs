//! Network topology: the ordered node and link declarations of a loaded
//! hydraulic network.
//!
//! The topology is owned by the engine and is read-only to the bridge. Each
//! entity carries a kind tag that never changes once the network is loaded.
//! Node and link identifiers live in independent namespaces.

use std::collections::HashMap;

use serde::{Deserialize, Serialize};

// ---------------------------------------------------------------------------
// Indices
// ---------------------------------------------------------------------------

/// Position of a node in declaration order. Cheap to copy and compare.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct NodeIndex(pub u32);

/// Position of a link in declaration order. Cheap to copy and compare.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct LinkIndex(pub u32);

/// Either a node or a link.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub enum EntityRef {
    Node(NodeIndex),
    Link(LinkIndex),
}

// ---------------------------------------------------------------------------
// Kinds
// ---------------------------------------------------------------------------

/// Kind of a network node.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum NodeKind {
    Junction,
    Reservoir,
    Tank,
}

/// Kind of a network link.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum LinkKind {
    Pipe,
    Pump,
    Valve,
}

impl LinkKind {
    /// Integer code published in the link `type` register.
    pub fn code(self) -> u16 {
        match self {
            LinkKind::Pipe => 1,
            LinkKind::Pump => 2,
            LinkKind::Valve => 3,
        }
    }
}

/// Kind tag of any entity.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum EntityKind {
    Node(NodeKind),
    Link(LinkKind),
}

// ---------------------------------------------------------------------------
// Declarations
// ---------------------------------------------------------------------------

/// A node as declared in the network definition.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct NodeDecl {
    pub id: String,
    pub kind: NodeKind,
}

/// A link as declared in the network definition.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LinkDecl {
    pub id: String,
    pub kind: LinkKind,
}

/// Errors raised while declaring entities.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum TopologyError {
    #[error("duplicate node id '{0}'")]
    DuplicateNodeId(String),
    #[error("duplicate link id '{0}'")]
    DuplicateLinkId(String),
}

// ---------------------------------------------------------------------------
// NetworkTopology
// ---------------------------------------------------------------------------

/// Ordered node and link declarations.
///
/// Declaration order is the traversal order used everywhere else: the
/// extractor emits records in it and the register map allocates addresses in
/// it, so the same topology always yields the same register layout.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct NetworkTopology {
    nodes: Vec<NodeDecl>,
    links: Vec<LinkDecl>,
    node_ids: HashMap<String, NodeIndex>,
    link_ids: HashMap<String, LinkIndex>,
}

impl NetworkTopology {
    pub fn new() -> Self {
        Self::default()
    }

    /// Declare a node. Returns its index.
    pub fn add_node(&mut self, id: &str, kind: NodeKind) -> Result<NodeIndex, TopologyError> {
        if self.node_ids.contains_key(id) {
            return Err(TopologyError::DuplicateNodeId(id.to_string()));
        }
        let index = NodeIndex(self.nodes.len() as u32);
        self.nodes.push(NodeDecl {
            id: id.to_string(),
            kind,
        });
        self.node_ids.insert(id.to_string(), index);
        Ok(index)
    }

    /// Declare a link. Returns its index.
    pub fn add_link(&mut self, id: &str, kind: LinkKind) -> Result<LinkIndex, TopologyError> {
        if self.link_ids.contains_key(id) {
            return Err(TopologyError::DuplicateLinkId(id.to_string()));
        }
        let index = LinkIndex(self.links.len() as u32);
        self.links.push(LinkDecl {
            id: id.to_string(),
            kind,
        });
        self.link_ids.insert(id.to_string(), index);
        Ok(index)
    }

    pub fn nodes(&self) -> &[NodeDecl] {
        &self.nodes
    }

    pub fn links(&self) -> &[LinkDecl] {
        &self.links
    }

    pub fn node(&self, index: NodeIndex) -> Option<&NodeDecl> {
        self.nodes.get(index.0 as usize)
    }

    pub fn link(&self, index: LinkIndex) -> Option<&LinkDecl> {
        self.links.get(index.0 as usize)
    }

    pub fn node_index(&self, id: &str) -> Option<NodeIndex> {
        self.node_ids.get(id).copied()
    }

    pub fn link_index(&self, id: &str) -> Option<LinkIndex> {
        self.link_ids.get(id).copied()
    }

    pub fn node_count(&self) -> usize {
        self.nodes.len()
    }

    pub fn link_count(&self) -> usize {
        self.links.len()
    }

    /// Total number of entities (nodes plus links).
    pub fn entity_count(&self) -> usize {
        self.nodes.len() + self.links.len()
    }

    /// Iterate node indices in declaration order.
    pub fn node_indices(&self) -> impl Iterator<Item = NodeIndex> + '_ {
        (0..self.nodes.len() as u32).map(NodeIndex)
    }

    /// Iterate link indices in declaration order.
    pub fn link_indices(&self) -> impl Iterator<Item = LinkIndex> + '_ {
        (0..self.links.len() as u32).map(LinkIndex)
    }

    /// Identifier and kind of any entity.
    pub fn describe(&self, entity: EntityRef) -> Option<(&str, EntityKind)> {
        match entity {
            EntityRef::Node(index) => self
                .node(index)
                .map(|n| (n.id.as_str(), EntityKind::Node(n.kind))),
            EntityRef::Link(index) => self
                .link(index)
                .map(|l| (l.id.as_str(), EntityKind::Link(l.kind))),
        }
    }

    /// Number of nodes of the given kind.
    pub fn count_nodes(&self, kind: NodeKind) -> usize {
        self.nodes.iter().filter(|n| n.kind == kind).count()
    }

    /// Number of links of the given kind.
    pub fn count_links(&self, kind: LinkKind) -> usize {
        self.links.iter().filter(|l| l.kind == kind).count()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn indices_follow_declaration_order() {
        let mut topo = NetworkTopology::new();
        let j = topo.add_node("J1", NodeKind::Junction).unwrap();
        let t = topo.add_node("T1", NodeKind::Tank).unwrap();
        assert_eq!(j, NodeIndex(0));
        assert_eq!(t, NodeIndex(1));
        assert_eq!(topo.node_index("T1"), Some(t));
        assert_eq!(topo.node(t).unwrap().kind, NodeKind::Tank);
    }

    #[test]
    fn duplicate_node_id_rejected() {
        let mut topo = NetworkTopology::new();
        topo.add_node("N", NodeKind::Junction).unwrap();
        let err = topo.add_node("N", NodeKind::Tank).unwrap_err();
        assert_eq!(err, TopologyError::DuplicateNodeId("N".into()));
    }

    #[test]
    fn node_and_link_namespaces_are_independent() {
        let mut topo = NetworkTopology::new();
        topo.add_node("1", NodeKind::Junction).unwrap();
        assert!(topo.add_link("1", LinkKind::Pipe).is_ok());
        assert!(matches!(
            topo.add_link("1", LinkKind::Pump),
            Err(TopologyError::DuplicateLinkId(_))
        ));
    }

    #[test]
    fn describe_reports_kind() {
        let mut topo = NetworkTopology::new();
        let p = topo.add_link("P9", LinkKind::Pump).unwrap();
        let (id, kind) = topo.describe(EntityRef::Link(p)).unwrap();
        assert_eq!(id, "P9");
        assert_eq!(kind, EntityKind::Link(LinkKind::Pump));
        assert!(topo.describe(EntityRef::Node(NodeIndex(0))).is_none());
    }

    #[test]
    fn counts_by_kind() {
        let mut topo = NetworkTopology::new();
        topo.add_node("J1", NodeKind::Junction).unwrap();
        topo.add_node("J2", NodeKind::Junction).unwrap();
        topo.add_link("V1", LinkKind::Valve).unwrap();
        assert_eq!(topo.count_nodes(NodeKind::Junction), 2);
        assert_eq!(topo.count_nodes(NodeKind::Tank), 0);
        assert_eq!(topo.count_links(LinkKind::Valve), 1);
        assert_eq!(topo.entity_count(), 3);
    }

    #[test]
    fn link_type_codes() {
        assert_eq!(LinkKind::Pipe.code(), 1);
        assert_eq!(LinkKind::Pump.code(), 2);
        assert_eq!(LinkKind::Valve.code(), 3);
    }
}

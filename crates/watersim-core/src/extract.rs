//! Entity value extraction.
//!
//! Turns the engine's current state into [`EntityRecord`]s by dispatching on
//! each entity's kind tag. Extraction is a pure read: it never mutates the
//! engine, so with the `parallel` feature the per-entity reads may run on a
//! rayon pool as long as the results are returned in declaration order.
//! [`extract_snapshot`] is the entry point the bridge uses; it picks the
//! rayon path when the feature is on.

use crate::engine::{EngineError, NetworkState};
use crate::entity::{EntityRecord, LinkRecord, NodeRecord, RecordView, TankGeometry};
use crate::topology::{LinkIndex, LinkKind, NodeIndex, NodeKind};

/// Extract the record of one node.
pub fn extract_node<S>(
    state: &S,
    node: NodeIndex,
    view: RecordView,
) -> Result<EntityRecord, EngineError>
where
    S: NetworkState + ?Sized,
{
    let decl = state
        .topology()
        .node(node)
        .ok_or(EngineError::UnknownEntity {
            class: "node",
            index: node.0,
        })?;

    let pressure = state.node_pressure(node)?;
    let head = state.node_head(node)?;

    let record = match decl.kind {
        NodeKind::Junction => NodeRecord::Junction { pressure, head },
        NodeKind::Reservoir => NodeRecord::Reservoir { pressure, head },
        NodeKind::Tank => {
            let geometry = match view {
                RecordView::Compact => None,
                RecordView::Extended => Some(TankGeometry {
                    init_level: state.tank_init_level(node)?,
                    elevation: state.node_elevation(node)?,
                }),
            };
            NodeRecord::Tank {
                pressure,
                head,
                min_level: state.tank_min_level(node)?,
                max_level: state.tank_max_level(node)?,
                geometry,
            }
        }
    };
    Ok(EntityRecord::Node(record))
}

/// Extract the record of one link.
pub fn extract_link<S>(
    state: &S,
    link: LinkIndex,
    view: RecordView,
) -> Result<EntityRecord, EngineError>
where
    S: NetworkState + ?Sized,
{
    let decl = state
        .topology()
        .link(link)
        .ok_or(EngineError::UnknownEntity {
            class: "link",
            index: link.0,
        })?;

    let flow = match view {
        RecordView::Compact => None,
        RecordView::Extended => Some(state.link_flow(link)?),
    };

    let record = match decl.kind {
        LinkKind::Pipe => LinkRecord::Pipe {
            status: state.pipe_status(link)?,
            flow,
        },
        LinkKind::Pump => LinkRecord::Pump {
            power: state.pump_power(link)?,
            flow,
        },
        LinkKind::Valve => LinkRecord::Valve {
            setting: state.valve_setting(link)?,
            flow,
        },
    };
    Ok(EntityRecord::Link(record))
}

/// Extract every entity: nodes in declaration order, then links.
pub fn extract_all<S>(state: &S, view: RecordView) -> Result<Vec<EntityRecord>, EngineError>
where
    S: NetworkState + ?Sized,
{
    let topology = state.topology();
    let mut records = Vec::with_capacity(topology.entity_count());
    for node in topology.node_indices() {
        records.push(extract_node(state, node, view)?);
    }
    for link in topology.link_indices() {
        records.push(extract_link(state, link, view)?);
    }
    Ok(records)
}

/// Parallel variant of [`extract_all`]. Same order, same records.
#[cfg(feature = "parallel")]
pub fn extract_all_parallel<S>(
    state: &S,
    view: RecordView,
) -> Result<Vec<EntityRecord>, EngineError>
where
    S: NetworkState + Sync + ?Sized,
{
    use rayon::prelude::*;

    let topology = state.topology();
    let nodes = (0..topology.node_count() as u32)
        .into_par_iter()
        .map(|i| extract_node(state, NodeIndex(i), view));
    let links = (0..topology.link_count() as u32)
        .into_par_iter()
        .map(|i| extract_link(state, LinkIndex(i), view));
    nodes.chain(links).collect()
}

/// `Sync` when the `parallel` feature is on, no requirement otherwise.
///
/// Bounds the bridge's engine so parallel extraction can share it across the
/// rayon pool without forcing `Sync` on single-threaded builds.
#[cfg(feature = "parallel")]
pub trait SyncIfParallel: Sync {}
#[cfg(feature = "parallel")]
impl<T: Sync + ?Sized> SyncIfParallel for T {}

/// `Sync` when the `parallel` feature is on, no requirement otherwise.
#[cfg(not(feature = "parallel"))]
pub trait SyncIfParallel {}
#[cfg(not(feature = "parallel"))]
impl<T: ?Sized> SyncIfParallel for T {}

/// Extract every entity the way the build is configured to: on the rayon
/// pool with the `parallel` feature, sequentially otherwise.
pub fn extract_snapshot<S>(state: &S, view: RecordView) -> Result<Vec<EntityRecord>, EngineError>
where
    S: NetworkState + SyncIfParallel + ?Sized,
{
    #[cfg(feature = "parallel")]
    {
        extract_all_parallel(state, view)
    }
    #[cfg(not(feature = "parallel"))]
    {
        extract_all(state, view)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::entity::{Field, FieldValue, PipeStatus, schema};
    use crate::test_utils::*;

    #[test]
    fn tank_record_carries_bounds() {
        let engine = tank_and_pipe_engine();
        let record = extract_node(&engine, NodeIndex(0), RecordView::Compact).unwrap();
        match record {
            EntityRecord::Node(NodeRecord::Tank {
                min_level,
                max_level,
                geometry,
                ..
            }) => {
                assert_eq!(min_level, 0.0);
                assert_eq!(max_level, 10.0);
                assert!(geometry.is_none());
            }
            other => panic!("expected tank record, got {other:?}"),
        }
    }

    #[test]
    fn extended_view_adds_geometry_and_flow() {
        let engine = tank_and_pipe_engine();
        let tank = extract_node(&engine, NodeIndex(0), RecordView::Extended).unwrap();
        assert!(tank.value(Field::Elevation).is_some());
        assert!(tank.value(Field::InitLevel).is_some());

        let pipe = extract_link(&engine, LinkIndex(0), RecordView::Extended).unwrap();
        assert!(pipe.value(Field::Flow).is_some());
    }

    #[test]
    fn pipe_status_is_extracted() {
        let engine = tank_and_pipe_engine();
        let record = extract_link(&engine, LinkIndex(0), RecordView::Compact).unwrap();
        assert_eq!(
            record,
            EntityRecord::Link(LinkRecord::Pipe {
                status: PipeStatus::Open,
                flow: None,
            })
        );
        assert_eq!(record.value(Field::Status), Some(FieldValue::Integer(1)));
    }

    #[test]
    fn records_match_their_schema() {
        let engine = mixed_engine();
        for view in [RecordView::Compact, RecordView::Extended] {
            for record in extract_all(&engine, view).unwrap() {
                let fields: Vec<Field> = record.fields().into_iter().map(|(f, _)| f).collect();
                assert_eq!(fields, schema(record.kind(), view));
            }
        }
    }

    #[test]
    fn extract_all_follows_declaration_order() {
        let engine = mixed_engine();
        let records = extract_all(&engine, RecordView::Compact).unwrap();
        let topo = engine.topology();
        assert_eq!(records.len(), topo.entity_count());
        for (decl, record) in topo.nodes().iter().zip(&records) {
            assert_eq!(record.kind(), crate::topology::EntityKind::Node(decl.kind));
        }
        for (decl, record) in topo.links().iter().zip(&records[topo.node_count()..]) {
            assert_eq!(record.kind(), crate::topology::EntityKind::Link(decl.kind));
        }
    }

    #[test]
    fn unknown_index_is_reported() {
        let engine = tank_and_pipe_engine();
        let err = extract_node(&engine, NodeIndex(42), RecordView::Compact).unwrap_err();
        assert_eq!(
            err,
            EngineError::UnknownEntity {
                class: "node",
                index: 42
            }
        );
    }

    #[test]
    fn extraction_does_not_touch_engine_calls() {
        let engine = mixed_engine();
        let before = engine.calls().len();
        extract_all(&engine, RecordView::Extended).unwrap();
        assert_eq!(engine.calls().len(), before);
    }

    #[test]
    fn snapshot_matches_sequential_extraction() {
        let engine = mixed_engine();
        for view in [RecordView::Compact, RecordView::Extended] {
            assert_eq!(
                extract_snapshot(&engine, view).unwrap(),
                extract_all(&engine, view).unwrap()
            );
        }
    }

    #[cfg(feature = "parallel")]
    #[test]
    fn parallel_extraction_matches_sequential() {
        let engine = mixed_engine();
        for view in [RecordView::Compact, RecordView::Extended] {
            assert_eq!(
                extract_all_parallel(&engine, view).unwrap(),
                extract_all(&engine, view).unwrap()
            );
        }
    }
}

//! Register map: the static assignment of entity fields to holding-register
//! address ranges.
//!
//! The builder walks nodes in declaration order, then links in declaration
//! order, and for each entity allocates the fields of its kind's schema at a
//! running cursor. The resulting layout is gap-free, contiguous and
//! reproduced identically for the same topology, so addresses are stable
//! across restarts. The map is built once after the topology is loaded and
//! is immutable afterwards.

use std::collections::HashMap;
use std::ops::Range;

use serde::{Deserialize, Serialize};

use crate::codec::{CodecError, RegisterCodec};
use crate::entity::{EntityRecord, Field, FieldFormat, FieldValue, RecordView, schema};
use crate::topology::{EntityKind, EntityRef, LinkIndex, NetworkTopology, NodeIndex};

// ---------------------------------------------------------------------------
// Error types
// ---------------------------------------------------------------------------

/// Errors raised while building a map or encoding an image against it.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum MapError {
    /// Two entries claim overlapping registers. Always an internal bug.
    #[error("register {address} assigned to both {first} and {second}")]
    DuplicateAddressAssignment {
        address: u16,
        first: String,
        second: String,
    },
    /// The same (entity, field) pair was allocated twice.
    #[error("field '{field}' of {entity} allocated twice")]
    DuplicateField { entity: String, field: Field },
    /// The layout does not fit below register 0xFFFF.
    #[error("register address space exhausted at field '{field}' of {entity}")]
    AddressSpaceExhausted { entity: String, field: Field },
    /// The record set does not line up with the map's entities.
    #[error("expected {expected} records, got {actual}")]
    RecordCountMismatch { expected: usize, actual: usize },
    /// A record's fields do not match the map's entries for its entity.
    #[error("record for {entity} does not match the register layout")]
    RecordMismatch { entity: String },
    #[error(transparent)]
    Codec(#[from] CodecError),
}

// ---------------------------------------------------------------------------
// Entries
// ---------------------------------------------------------------------------

/// Whether the field-bus side may write a register range.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Direction {
    ReadOnly,
    Writable,
}

/// One field's register range.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RegisterMapEntry {
    pub address: u16,
    pub width: u16,
    pub entity: EntityRef,
    pub entity_id: String,
    pub field: Field,
    pub direction: Direction,
}

impl RegisterMapEntry {
    /// One past the last register of this entry.
    pub fn end(&self) -> u32 {
        self.address as u32 + self.width as u32
    }

    pub fn range(&self) -> Range<u32> {
        self.address as u32..self.end()
    }

    pub fn is_writable(&self) -> bool {
        self.direction == Direction::Writable
    }
}

/// A contiguous block of registers, used for batched transfers.
///
/// `count` is wider than an address: a layout may cover all 65536 registers.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RegisterRun {
    pub address: u16,
    pub count: u32,
}

impl RegisterRun {
    /// One past the last register of this run.
    pub fn end(&self) -> u32 {
        self.address as u32 + self.count
    }
}

// ---------------------------------------------------------------------------
// Configuration
// ---------------------------------------------------------------------------

/// Layout options.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct RegisterMapConfig {
    /// Address of the first allocated register.
    pub base_address: u16,
    /// Which optional fields are published.
    pub view: RecordView,
    /// Mark setpoint fields (pump power, valve setting) writable so the
    /// bridge reads them back into the engine.
    pub setpoints: bool,
}

// ---------------------------------------------------------------------------
// RegisterMap
// ---------------------------------------------------------------------------

/// Entries of one entity, as a slice of the entry table.
#[derive(Debug, Clone, PartialEq, Eq)]
struct EntitySpan {
    entity: EntityRef,
    entries: Range<usize>,
}

/// Immutable address index, usable in both directions.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RegisterMap {
    entries: Vec<RegisterMapEntry>,
    spans: Vec<EntitySpan>,
    by_field: HashMap<(EntityRef, Field), usize>,
    node_count: usize,
    base_address: u16,
    view: RecordView,
}

impl RegisterMap {
    /// Build the map for `topology`.
    pub fn build(topology: &NetworkTopology, config: &RegisterMapConfig) -> Result<Self, MapError> {
        RegisterMapBuilder::new(config.clone()).build(topology)
    }

    pub fn entries(&self) -> &[RegisterMapEntry] {
        &self.entries
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn base_address(&self) -> u16 {
        self.base_address
    }

    pub fn view(&self) -> RecordView {
        self.view
    }

    /// Total registers covered, from the base address to the last entry.
    pub fn register_count(&self) -> usize {
        self.entries
            .last()
            .map_or(0, |e| (e.end() - self.base_address as u32) as usize)
    }

    /// Entry covering `address`, if any.
    pub fn entry_at(&self, address: u16) -> Option<&RegisterMapEntry> {
        let address = address as u32;
        let pos = self.entries.partition_point(|e| e.end() <= address);
        self.entries.get(pos).filter(|e| e.range().contains(&address))
    }

    /// Entry of a given entity field, if published.
    pub fn find(&self, entity: EntityRef, field: Field) -> Option<&RegisterMapEntry> {
        self.by_field.get(&(entity, field)).map(|&i| &self.entries[i])
    }

    /// Entries of one entity in register order.
    pub fn entity_entries(&self, entity: EntityRef) -> &[RegisterMapEntry] {
        match self.record_index(entity) {
            Some(i) => &self.entries[self.spans[i].entries.clone()],
            None => &[],
        }
    }

    /// Position of `entity`'s record in an extraction result.
    pub fn record_index(&self, entity: EntityRef) -> Option<usize> {
        let index = match entity {
            EntityRef::Node(NodeIndex(i)) => i as usize,
            EntityRef::Link(LinkIndex(i)) => self.node_count + i as usize,
        };
        (index < self.spans.len() && self.spans[index].entity == entity).then_some(index)
    }

    pub fn writable(&self) -> impl Iterator<Item = &RegisterMapEntry> + '_ {
        self.entries.iter().filter(|e| e.is_writable())
    }

    pub fn has_writable(&self) -> bool {
        self.entries.iter().any(|e| e.is_writable())
    }

    /// The whole image as one run.
    pub fn full_run(&self) -> Option<RegisterRun> {
        (!self.entries.is_empty()).then(|| RegisterRun {
            address: self.base_address,
            count: self.register_count() as u32,
        })
    }

    /// Maximal contiguous runs of entries with the given direction.
    pub fn runs(&self, direction: Direction) -> Vec<RegisterRun> {
        let mut runs: Vec<RegisterRun> = Vec::new();
        let mut open = false;
        for entry in &self.entries {
            if entry.direction != direction {
                open = false;
                continue;
            }
            if open {
                if let Some(run) = runs.last_mut() {
                    run.count += entry.width as u32;
                }
            } else {
                runs.push(RegisterRun {
                    address: entry.address,
                    count: entry.width as u32,
                });
            }
            open = true;
        }
        runs
    }

    /// Encode one record set into the full contiguous register image.
    ///
    /// `records` must come from extraction with this map's view; index 0 of
    /// the image is the base address.
    pub fn encode_image(
        &self,
        records: &[EntityRecord],
        codec: &RegisterCodec,
    ) -> Result<Vec<u16>, MapError> {
        if records.len() != self.spans.len() {
            return Err(MapError::RecordCountMismatch {
                expected: self.spans.len(),
                actual: records.len(),
            });
        }

        let mut image = Vec::with_capacity(self.register_count());
        for (span, record) in self.spans.iter().zip(records) {
            let entries = &self.entries[span.entries.clone()];
            let fields = record.fields();
            if fields.len() != entries.len() {
                return Err(MapError::RecordMismatch {
                    entity: entries
                        .first()
                        .map_or_else(String::new, |e| e.entity_id.clone()),
                });
            }
            for (entry, (field, value)) in entries.iter().zip(fields) {
                if entry.field != field || value.format() != field.format() {
                    return Err(MapError::RecordMismatch {
                        entity: entry.entity_id.clone(),
                    });
                }
                match value {
                    FieldValue::Real(v) => image.extend_from_slice(&codec.encode_float(v)),
                    FieldValue::Integer(v) => image.push(v),
                }
            }
        }
        Ok(image)
    }

    /// Decode the registers of one entry back into a field value.
    pub fn decode_entry(
        &self,
        entry: &RegisterMapEntry,
        words: &[u16],
        codec: &RegisterCodec,
    ) -> Result<FieldValue, CodecError> {
        match entry.field.format() {
            FieldFormat::Real => {
                let values = codec.decode_floats(words, 1)?;
                Ok(FieldValue::Real(values[0]))
            }
            FieldFormat::Integer => match words {
                [word] => Ok(FieldValue::Integer(*word)),
                _ => Err(CodecError::MalformedRegisterData {
                    expected: 1,
                    actual: words.len(),
                }),
            },
        }
    }
}

// ---------------------------------------------------------------------------
// Builder
// ---------------------------------------------------------------------------

/// Allocates register ranges for a topology.
#[derive(Debug, Clone, Default)]
pub struct RegisterMapBuilder {
    config: RegisterMapConfig,
}

impl RegisterMapBuilder {
    pub fn new(config: RegisterMapConfig) -> Self {
        Self { config }
    }

    pub fn build(&self, topology: &NetworkTopology) -> Result<RegisterMap, MapError> {
        let mut entries = Vec::new();
        let mut spans = Vec::with_capacity(topology.entity_count());
        let mut cursor = self.config.base_address as u32;

        let entities = topology
            .node_indices()
            .map(EntityRef::Node)
            .chain(topology.link_indices().map(EntityRef::Link));

        for entity in entities {
            let Some((id, kind)) = topology.describe(entity) else {
                continue;
            };
            let start = entries.len();
            for &field in schema(kind, self.config.view) {
                let width = field.width();
                let end = cursor + width as u32;
                // The last register must still be addressable.
                if end > u16::MAX as u32 + 1 {
                    return Err(MapError::AddressSpaceExhausted {
                        entity: id.to_string(),
                        field,
                    });
                }
                entries.push(RegisterMapEntry {
                    address: cursor as u16,
                    width,
                    entity,
                    entity_id: id.to_string(),
                    field,
                    direction: self.direction_of(kind, field),
                });
                cursor = end;
            }
            spans.push(EntitySpan {
                entity,
                entries: start..entries.len(),
            });
        }

        let by_field = index_fields(&entries)?;
        check_no_overlap(&entries)?;

        Ok(RegisterMap {
            entries,
            spans,
            by_field,
            node_count: topology.node_count(),
            base_address: self.config.base_address,
            view: self.config.view,
        })
    }

    fn direction_of(&self, kind: EntityKind, field: Field) -> Direction {
        let settable = matches!(kind, EntityKind::Link(_)) && field.is_setpoint();
        if self.config.setpoints && settable {
            Direction::Writable
        } else {
            Direction::ReadOnly
        }
    }
}

fn index_fields(
    entries: &[RegisterMapEntry],
) -> Result<HashMap<(EntityRef, Field), usize>, MapError> {
    let mut by_field = HashMap::with_capacity(entries.len());
    for (i, entry) in entries.iter().enumerate() {
        if by_field.insert((entry.entity, entry.field), i).is_some() {
            return Err(MapError::DuplicateField {
                entity: entry.entity_id.clone(),
                field: entry.field,
            });
        }
    }
    Ok(by_field)
}

/// Invariant check: entries are sorted by address and their ranges are
/// pairwise disjoint.
fn check_no_overlap(entries: &[RegisterMapEntry]) -> Result<(), MapError> {
    for pair in entries.windows(2) {
        let (prev, next) = (&pair[0], &pair[1]);
        if (next.address as u32) < prev.end() {
            return Err(MapError::DuplicateAddressAssignment {
                address: next.address,
                first: format!("{}.{}", prev.entity_id, prev.field),
                second: format!("{}.{}", next.entity_id, next.field),
            });
        }
    }
    Ok(())
}

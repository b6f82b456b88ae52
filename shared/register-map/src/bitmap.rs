use tracing::debug;

use crate::bit_interval::BitInterval;
use crate::error::{ConfigurationSnafu, OverlapSnafu, Result};
use crate::field::{Field, FieldId, FieldSlice};
use crate::register::RegisterId;

/// One register slice routed onto a field.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct Mapping {
    /// Register bit positions.
    pub source: BitInterval,
    /// Field bit positions.
    pub destination: BitInterval,
    pub field: FieldId,
}

/// Routes the bits of one register onto fields.
///
/// Source intervals never overlap each other. Destination intervals never overlap other
/// destinations of the same field, including those mapped by other registers; the field keeps that
/// half of the bookkeeping.
#[derive(Clone, Debug)]
pub struct BitMap {
    register: RegisterId,
    mappings: Vec<Mapping>,
}

impl BitMap {
    pub(crate) fn new(register: RegisterId) -> Self {
        Self {
            register,
            mappings: Vec::new(),
        }
    }

    pub fn mappings(&self) -> &[Mapping] {
        &self.mappings
    }

    pub fn is_empty(&self) -> bool {
        self.mappings.is_empty()
    }

    pub fn source_intervals(&self) -> impl Iterator<Item = BitInterval> + '_ {
        self.mappings.iter().map(|mapping| mapping.source)
    }

    /// The distinct fields referenced, in first-mapped order.
    pub fn destinations(&self) -> Vec<FieldId> {
        let mut fields = Vec::new();
        for mapping in &self.mappings {
            if !fields.contains(&mapping.field) {
                fields.push(mapping.field);
            }
        }
        fields
    }

    pub fn mappings_for(&self, field: FieldId) -> impl Iterator<Item = &Mapping> + '_ {
        self.mappings
            .iter()
            .filter(move |mapping| mapping.field == field)
    }

    /// Total register bits routed to fields.
    pub fn allocated_bits(&self) -> u64 {
        self.source_intervals().map(BitInterval::width).sum()
    }

    /// Register bits needed to hold the highest mapped source bit.
    pub fn extent(&self) -> u64 {
        self.source_intervals()
            .map(BitInterval::extent)
            .max()
            .unwrap_or(0)
    }

    pub(crate) fn check_source(&self, entity: &str, source: BitInterval) -> Result<()> {
        match self
            .mappings
            .iter()
            .find(|mapping| mapping.source.overlaps(source))
        {
            Some(mapping) => OverlapSnafu {
                entity,
                interval: source,
                existing: mapping.source,
            }
            .fail(),
            None => Ok(()),
        }
    }

    /// Routes `source` register bits onto `destination` bits of `field`, recording the mapping on
    /// both sides. Nothing is recorded on failure.
    pub(crate) fn map_bits(
        &mut self,
        entity: &str,
        source: BitInterval,
        destination: BitInterval,
        field: &mut Field,
        field_entity: &str,
    ) -> Result<FieldId> {
        if source.width() != destination.width() {
            return ConfigurationSnafu {
                entity,
                message: format!(
                    "register bits {source} and field bits {destination} differ in width"
                ),
            }
            .fail();
        }
        self.check_source(entity, source)?;
        field.check_destination(field_entity, destination)?;

        debug!(%entity, field = %field_entity, %source, %destination, "mapping bits");
        self.mappings.push(Mapping {
            source,
            destination,
            field: field.id(),
        });
        field.record(FieldSlice {
            register: self.register,
            source,
            destination,
        });
        Ok(field.id())
    }

    /// Removes every mapping onto `field`, returning the removed mappings.
    pub(crate) fn unmap_field(&mut self, field: FieldId) -> Vec<Mapping> {
        let (removed, kept) = self
            .mappings
            .drain(..)
            .partition(|mapping| mapping.field == field);
        self.mappings = kept;
        removed
    }
}

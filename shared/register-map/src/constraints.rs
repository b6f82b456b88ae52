use indexmap::IndexMap;
use tracing::info;

use crate::error::{ConfigurationSnafu, ConstraintSnafu, Result};
use crate::memory::{round_up, MemoryConfiguration};

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum ConstraintKind {
    FixedAddress,
    FixedSizeMemoryUnits,
    AlignmentMemoryUnits,
}

impl ConstraintKind {
    pub fn name(self) -> &'static str {
        match self {
            Self::FixedAddress => "fixedAddress",
            Self::FixedSizeMemoryUnits => "fixedSizeMemoryUnits",
            Self::AlignmentMemoryUnits => "alignmentMemoryUnits",
        }
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Constraint {
    /// The element starts at exactly this address.
    FixedAddress(u64),
    /// The element occupies exactly this many memory units.
    FixedSizeMemoryUnits(u32),
    /// The element starts on a multiple of this many memory units.
    AlignmentMemoryUnits(u64),
}

impl Constraint {
    pub fn kind(self) -> ConstraintKind {
        match self {
            Self::FixedAddress(_) => ConstraintKind::FixedAddress,
            Self::FixedSizeMemoryUnits(_) => ConstraintKind::FixedSizeMemoryUnits,
            Self::AlignmentMemoryUnits(_) => ConstraintKind::AlignmentMemoryUnits,
        }
    }
}

/// Size and address rules of one register or module, at most one per kind, in the order they
/// were set.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct ConstraintSet {
    constraints: IndexMap<ConstraintKind, Constraint>,
}

impl ConstraintSet {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn get(&self, kind: ConstraintKind) -> Option<Constraint> {
        self.constraints.get(&kind).copied()
    }

    pub fn iter(&self) -> impl Iterator<Item = Constraint> + '_ {
        self.constraints.values().copied()
    }

    pub fn is_empty(&self) -> bool {
        self.constraints.is_empty()
    }

    pub fn fixed_address(&self) -> Option<u64> {
        match self.get(ConstraintKind::FixedAddress) {
            Some(Constraint::FixedAddress(address)) => Some(address),
            _ => None,
        }
    }

    pub fn fixed_size_memory_units(&self) -> Option<u32> {
        match self.get(ConstraintKind::FixedSizeMemoryUnits) {
            Some(Constraint::FixedSizeMemoryUnits(units)) => Some(units),
            _ => None,
        }
    }

    pub fn alignment_memory_units(&self) -> Option<u64> {
        match self.get(ConstraintKind::AlignmentMemoryUnits) {
            Some(Constraint::AlignmentMemoryUnits(units)) => Some(units),
            _ => None,
        }
    }

    /// Validates `constraint` on its own and against the other constraints of the set, then
    /// replaces any constraint of the same kind. Returns the replaced constraint.
    pub fn set(
        &mut self,
        entity: &str,
        constraint: Constraint,
        memory: &MemoryConfiguration,
    ) -> Result<Option<Constraint>> {
        match constraint {
            Constraint::FixedAddress(address) => {
                if address > memory.max_address() {
                    return ConfigurationSnafu {
                        entity,
                        message: format!(
                            "fixed address {address:#x} exceeds maximum addressable memory {:#x}",
                            memory.max_address()
                        ),
                    }
                    .fail();
                }
                if let Some(alignment) = self.alignment_memory_units() {
                    check_aligned(entity, address, alignment)?;
                }
            }
            Constraint::FixedSizeMemoryUnits(0) => {
                return ConfigurationSnafu {
                    entity,
                    message: "fixed size must be at least one memory unit",
                }
                .fail();
            }
            Constraint::FixedSizeMemoryUnits(_) => {}
            Constraint::AlignmentMemoryUnits(0) => {
                return ConfigurationSnafu {
                    entity,
                    message: "alignment must be at least one memory unit",
                }
                .fail();
            }
            Constraint::AlignmentMemoryUnits(alignment) => {
                if let Some(address) = self.fixed_address() {
                    check_aligned(entity, address, alignment)?;
                }
            }
        }
        Ok(self.constraints.insert(constraint.kind(), constraint))
    }

    pub fn clear(&mut self, kind: ConstraintKind) -> Option<Constraint> {
        self.constraints.shift_remove(&kind)
    }

    /// Applies the fixed-size rule to a computed size. A fixed size may pad, but never truncate,
    /// the computed size.
    pub fn apply_size(&self, entity: &str, natural: u64) -> Result<u64> {
        let Some(fixed) = self.fixed_size_memory_units() else {
            return Ok(natural);
        };
        let fixed = u64::from(fixed);
        if fixed < natural {
            return ConstraintSnafu {
                entity,
                message: format!(
                    "fixed size of {fixed} memory unit(s) is smaller than the {natural} memory \
                     unit(s) required"
                ),
            }
            .fail();
        }
        if fixed != natural {
            info!(%entity, natural, fixed, "size constraint applied");
        }
        Ok(fixed)
    }

    /// Applies the address rules to a proposed start address. `None` means the address cannot be
    /// determined yet; a fixed address resolves it anyway.
    pub fn apply_address(&self, entity: &str, proposed: Option<u64>) -> Result<Option<u64>> {
        if let Some(fixed) = self.fixed_address() {
            if let Some(proposed) = proposed.filter(|&proposed| fixed < proposed) {
                return ConstraintSnafu {
                    entity,
                    message: format!(
                        "fixed address {fixed:#x} is before the first free address {proposed:#x}"
                    ),
                }
                .fail();
            }
            if proposed != Some(fixed) {
                info!(%entity, ?proposed, fixed, "address constraint applied");
            }
            return Ok(Some(fixed));
        }
        match (proposed, self.alignment_memory_units()) {
            (Some(proposed), Some(alignment)) => self.align(entity, proposed, alignment).map(Some),
            (proposed, _) => Ok(proposed),
        }
    }

    /// Applies only the alignment rule, as for repeated instances following a fixed first one.
    pub fn apply_alignment(&self, entity: &str, proposed: u64) -> Result<u64> {
        match self.alignment_memory_units() {
            Some(alignment) => self.align(entity, proposed, alignment),
            None => Ok(proposed),
        }
    }

    fn align(&self, entity: &str, proposed: u64, alignment: u64) -> Result<u64> {
        match round_up(proposed, alignment) {
            Some(aligned) => Ok(aligned),
            None => ConstraintSnafu {
                entity,
                message: format!(
                    "no address aligned to {alignment} memory unit(s) follows {proposed:#x}"
                ),
            }
            .fail(),
        }
    }
}

fn check_aligned(entity: &str, address: u64, alignment: u64) -> Result<()> {
    if address % alignment != 0 {
        return ConstraintSnafu {
            entity,
            message: format!(
                "fixed address {address:#x} is not aligned to {alignment} memory unit(s)"
            ),
        }
        .fail();
    }
    Ok(())
}

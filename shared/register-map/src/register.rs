use std::fmt;

use indexmap::IndexMap;

use crate::bitmap::BitMap;
use crate::constraints::ConstraintSet;
use crate::error::{ConstraintSnafu, Result};
use crate::field::FieldId;
use crate::memory::MemoryConfiguration;
use crate::module::ModuleId;
use crate::observer::{Event, Observable, Subject};
use crate::parameter::{Mode, UserParameters, Value};

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct RegisterId(pub(crate) u32);

impl fmt::Display for RegisterId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "register#{}", self.0)
    }
}

/// A container of field bit mappings, sized in whole memory units.
#[derive(Clone, Debug)]
pub struct Register {
    id: RegisterId,
    name: String,
    parent: ModuleId,
    mode: Mode,
    description: String,
    summary: String,
    public: bool,
    global: bool,
    user: UserParameters,
    constraints: ConstraintSet,
    bitmap: BitMap,
    fields: IndexMap<String, FieldId>,
    size_memory_units: u32,
    size_notifier: Observable,
}

impl Register {
    pub(crate) fn new(id: RegisterId, name: String, parent: ModuleId) -> Self {
        Self {
            id,
            name,
            parent,
            mode: Mode::default(),
            description: String::new(),
            summary: String::new(),
            public: true,
            global: false,
            user: UserParameters::new(),
            constraints: ConstraintSet::new(),
            bitmap: BitMap::new(id),
            fields: IndexMap::new(),
            size_memory_units: 1,
            size_notifier: Observable::new(),
        }
    }

    pub fn id(&self) -> RegisterId {
        self.id
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn parent(&self) -> ModuleId {
        self.parent
    }

    pub fn mode(&self) -> Mode {
        self.mode
    }

    pub fn description(&self) -> &str {
        &self.description
    }

    pub fn summary(&self) -> &str {
        &self.summary
    }

    pub fn is_public(&self) -> bool {
        self.public
    }

    pub fn is_global(&self) -> bool {
        self.global
    }

    pub fn user_parameters(&self) -> &UserParameters {
        &self.user
    }

    pub fn constraints(&self) -> &ConstraintSet {
        &self.constraints
    }

    pub fn bitmap(&self) -> &BitMap {
        &self.bitmap
    }

    /// Fields mapped by this register, by name, in mapping order.
    pub fn fields(&self) -> impl Iterator<Item = (&str, FieldId)> + '_ {
        self.fields.iter().map(|(name, &id)| (name.as_str(), id))
    }

    pub fn field(&self, name: &str) -> Option<FieldId> {
        self.fields.get(name).copied()
    }

    pub fn size_memory_units(&self) -> u32 {
        self.size_memory_units
    }

    pub fn size_bits(&self, memory: &MemoryConfiguration) -> u64 {
        u64::from(self.size_memory_units) * u64::from(memory.memory_unit_bits())
    }

    pub fn parameter(&self, key: &str) -> Option<Value> {
        match key {
            "name" => Some(Value::from(self.name.as_str())),
            "mode" => Some(Value::from(self.mode.as_str())),
            "description" => Some(Value::from(self.description.as_str())),
            "summary" => Some(Value::from(self.summary.as_str())),
            "public" => Some(Value::from(self.public)),
            "global" => Some(Value::from(self.global)),
            _ => self.user.get(key).cloned(),
        }
    }

    /// Memory units needed for `extent_bits` register bits, before constraints.
    ///
    /// `extent_bits` runs from bit zero to the highest mapped source bit, so unmapped gaps below
    /// that bit stay reserved in the register. For fields packed from bit zero this equals the sum
    /// of their widths. A register with no fields still occupies one unit.
    pub(crate) fn natural_size_memory_units(
        memory: &MemoryConfiguration,
        extent_bits: u64,
    ) -> u64 {
        memory.units_for_bits(extent_bits).max(1)
    }

    /// The constrained size for a register whose highest mapped bit needs `extent_bits` bits.
    pub(crate) fn constrained_size_memory_units(
        &self,
        entity: &str,
        memory: &MemoryConfiguration,
        extent_bits: u64,
    ) -> Result<u32> {
        let natural = Self::natural_size_memory_units(memory, extent_bits);
        let size = self.constraints.apply_size(entity, natural)?;
        match u32::try_from(size) {
            Ok(size) => Ok(size),
            Err(_) => ConstraintSnafu {
                entity,
                message: format!("size of {size} memory units is not representable"),
            }
            .fail(),
        }
    }

    pub(crate) fn calculate_size_memory_units(
        &self,
        entity: &str,
        memory: &MemoryConfiguration,
    ) -> Result<u32> {
        self.constrained_size_memory_units(entity, memory, self.bitmap.extent())
    }

    pub(crate) fn set_size_memory_units(&mut self, size: u32) {
        self.size_memory_units = size;
    }

    pub(crate) fn set_name(&mut self, name: String) {
        self.name = name;
    }

    pub(crate) fn set_mode(&mut self, mode: Mode) {
        self.mode = mode;
    }

    pub(crate) fn set_description(&mut self, description: String) {
        self.description = description;
    }

    pub(crate) fn set_summary(&mut self, summary: String) {
        self.summary = summary;
    }

    pub(crate) fn set_public(&mut self, public: bool) {
        self.public = public;
    }

    pub(crate) fn set_global(&mut self, global: bool) {
        self.global = global;
    }

    pub(crate) fn user_parameters_mut(&mut self) -> &mut UserParameters {
        &mut self.user
    }

    pub(crate) fn constraints_mut(&mut self) -> &mut ConstraintSet {
        &mut self.constraints
    }

    pub(crate) fn bitmap_mut(&mut self) -> &mut BitMap {
        &mut self.bitmap
    }

    pub(crate) fn field_index_mut(&mut self) -> &mut IndexMap<String, FieldId> {
        &mut self.fields
    }
}

impl Subject for Register {
    fn notifier(&self, event: Event) -> Option<&Observable> {
        match event {
            Event::SizeChanged => Some(&self.size_notifier),
            Event::AddressChanged => None,
        }
    }

    fn notifier_mut(&mut self, event: Event) -> Option<&mut Observable> {
        match event {
            Event::SizeChanged => Some(&mut self.size_notifier),
            Event::AddressChanged => None,
        }
    }
}

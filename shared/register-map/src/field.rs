use std::fmt;

use crate::bit_interval::BitInterval;
use crate::error::{ConfigurationSnafu, OverlapSnafu, Result};
use crate::observer::{Event, Observable, Subject};
use crate::parameter::{UserParameters, Value};
use crate::register::RegisterId;

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct FieldId(pub(crate) u32);

impl fmt::Display for FieldId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "field#{}", self.0)
    }
}

/// Who may map bits onto a field, resolved once when the field is created or converted.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum FieldOwnership {
    /// Exclusively owned by one register.
    Local(RegisterId),
    /// Shared by any number of registers.
    Global,
}

/// One register slice mapped onto a field.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct FieldSlice {
    pub register: RegisterId,
    pub source: BitInterval,
    pub destination: BitInterval,
}

#[derive(Clone, Debug)]
pub struct Field {
    id: FieldId,
    name: String,
    size_bits: u32,
    reset_value: u64,
    ownership: FieldOwnership,
    description: String,
    summary: String,
    user: UserParameters,
    slices: Vec<FieldSlice>,
    size_notifier: Observable,
}

impl Field {
    pub(crate) fn new(id: FieldId, name: String, ownership: FieldOwnership, size_bits: u32) -> Self {
        Self {
            id,
            name,
            size_bits,
            reset_value: 0,
            ownership,
            description: String::new(),
            summary: String::new(),
            user: UserParameters::new(),
            slices: Vec::new(),
            size_notifier: Observable::new(),
        }
    }

    pub fn id(&self) -> FieldId {
        self.id
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn size_bits(&self) -> u32 {
        self.size_bits
    }

    pub fn reset_value(&self) -> u64 {
        self.reset_value
    }

    /// The largest value the field can hold.
    pub fn max_value(&self) -> u64 {
        max_value(self.size_bits)
    }

    pub fn ownership(&self) -> FieldOwnership {
        self.ownership
    }

    pub fn is_global(&self) -> bool {
        self.ownership == FieldOwnership::Global
    }

    pub fn description(&self) -> &str {
        &self.description
    }

    pub fn summary(&self) -> &str {
        &self.summary
    }

    pub fn user_parameters(&self) -> &UserParameters {
        &self.user
    }

    pub fn slices(&self) -> &[FieldSlice] {
        &self.slices
    }

    /// Registers mapping bits onto this field, in mapping order.
    pub fn registers(&self) -> Vec<RegisterId> {
        let mut registers = Vec::new();
        for slice in &self.slices {
            if !registers.contains(&slice.register) {
                registers.push(slice.register);
            }
        }
        registers
    }

    /// Bits needed to hold every mapped field bit.
    pub fn mapped_extent(&self) -> u64 {
        self.slices
            .iter()
            .map(|slice| slice.destination.extent())
            .max()
            .unwrap_or(0)
    }

    pub fn parameter(&self, key: &str) -> Option<Value> {
        match key {
            "name" => Some(Value::from(self.name.as_str())),
            "size" => Some(Value::from(self.size_bits)),
            "resetValue" => Some(Value::from(self.reset_value)),
            "description" => Some(Value::from(self.description.as_str())),
            "summary" => Some(Value::from(self.summary.as_str())),
            "global" => Some(Value::from(self.is_global())),
            _ => self.user.get(key).cloned(),
        }
    }

    /// Field bit positions are partitioned across every register mapping onto the field.
    pub(crate) fn check_destination(&self, entity: &str, destination: BitInterval) -> Result<()> {
        match self
            .slices
            .iter()
            .find(|slice| slice.destination.overlaps(destination))
        {
            Some(slice) => OverlapSnafu {
                entity,
                interval: destination,
                existing: slice.destination,
            }
            .fail(),
            None => Ok(()),
        }
    }

    pub(crate) fn record(&mut self, slice: FieldSlice) {
        self.slices.push(slice);
    }

    /// Removes every slice mapped from `register`, returning how many were removed.
    pub(crate) fn unmap_register(&mut self, register: RegisterId) -> usize {
        let before = self.slices.len();
        self.slices.retain(|slice| slice.register != register);
        before - self.slices.len()
    }

    /// Grows the field to `extent` bits. Returns `false` if the field is already large enough.
    pub(crate) fn resize(&mut self, extent: u32) -> bool {
        if extent <= self.size_bits {
            return false;
        }
        self.size_bits = extent;
        true
    }

    /// Sets the size explicitly, which may shrink the field down to its mapped bits.
    pub(crate) fn set_size_bits(&mut self, entity: &str, size_bits: u32) -> Result<bool> {
        if size_bits == 0 {
            return ConfigurationSnafu {
                entity,
                message: "field size must be at least one bit",
            }
            .fail();
        }
        if u64::from(size_bits) < self.mapped_extent() {
            return ConfigurationSnafu {
                entity,
                message: format!(
                    "field size {size_bits} is smaller than the {} mapped field bits",
                    self.mapped_extent()
                ),
            }
            .fail();
        }
        if self.reset_value > max_value(size_bits) {
            return ConfigurationSnafu {
                entity,
                message: format!(
                    "reset value {:#x} does not fit in {size_bits} bit(s)",
                    self.reset_value
                ),
            }
            .fail();
        }
        let changed = self.size_bits != size_bits;
        self.size_bits = size_bits;
        Ok(changed)
    }

    pub(crate) fn set_reset_value(&mut self, entity: &str, value: u64) -> Result<()> {
        if value > self.max_value() {
            return ConfigurationSnafu {
                entity,
                message: format!(
                    "reset value {value:#x} exceeds the maximum {:#x} of a {}-bit field",
                    self.max_value(),
                    self.size_bits
                ),
            }
            .fail();
        }
        self.reset_value = value;
        Ok(())
    }

    pub(crate) fn set_name(&mut self, name: String) {
        self.name = name;
    }

    pub(crate) fn set_ownership(&mut self, ownership: FieldOwnership) {
        self.ownership = ownership;
    }

    pub(crate) fn set_description(&mut self, description: String) {
        self.description = description;
    }

    pub(crate) fn set_summary(&mut self, summary: String) {
        self.summary = summary;
    }

    pub(crate) fn user_parameters_mut(&mut self) -> &mut UserParameters {
        &mut self.user
    }
}

impl Subject for Field {
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

fn max_value(size_bits: u32) -> u64 {
    if size_bits >= 64 {
        u64::MAX
    } else {
        (1 << size_bits) - 1
    }
}

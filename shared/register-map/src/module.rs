use std::fmt;

use crate::constraints::ConstraintSet;
use crate::instance::ChainLink;
use crate::observer::{Event, Observable, Subject};
use crate::parameter::{UserParameters, Value};
use crate::register::RegisterId;

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ModuleId(pub(crate) u32);

impl fmt::Display for ModuleId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "module#{}", self.0)
    }
}

/// An ordered chain of registers occupying a contiguous span, repeated `instances` times.
#[derive(Clone, Debug)]
pub struct Module {
    id: ModuleId,
    name: String,
    description: String,
    summary: String,
    user: UserParameters,
    instances: u32,
    constraints: ConstraintSet,
    registers: Vec<RegisterId>,
    previous: ChainLink<ModuleId>,
    start_address: Option<u64>,
    span_memory_units: u64,
    instance_addresses: Vec<u64>,
    size_notifier: Observable,
    address_notifier: Observable,
}

impl Module {
    pub(crate) fn new(id: ModuleId, name: String) -> Self {
        Self {
            id,
            name,
            description: String::new(),
            summary: String::new(),
            user: UserParameters::new(),
            instances: 1,
            constraints: ConstraintSet::new(),
            registers: Vec::new(),
            previous: ChainLink::Origin,
            start_address: None,
            span_memory_units: 0,
            instance_addresses: Vec::new(),
            size_notifier: Observable::new(),
            address_notifier: Observable::new(),
        }
    }

    pub fn id(&self) -> ModuleId {
        self.id
    }

    pub fn name(&self) -> &str {
        &self.name
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

    pub fn instances(&self) -> u32 {
        self.instances
    }

    pub fn constraints(&self) -> &ConstraintSet {
        &self.constraints
    }

    /// Registers in address order.
    pub fn registers(&self) -> &[RegisterId] {
        &self.registers
    }

    pub fn previous(&self) -> ChainLink<ModuleId> {
        self.previous
    }

    pub fn start_address(&self) -> Option<u64> {
        self.start_address
    }

    /// Memory units covered by one instance.
    pub fn span_memory_units(&self) -> u64 {
        self.span_memory_units
    }

    /// Start address of every instance, once resolved.
    pub fn instance_addresses(&self) -> &[u64] {
        &self.instance_addresses
    }

    /// The first address after the last instance.
    pub fn following_address(&self) -> Option<u64> {
        match self.instance_addresses.last() {
            Some(last) => last.checked_add(self.span_memory_units),
            None => self.start_address,
        }
    }

    /// `None` while unresolved or when the module spans nothing.
    pub fn end_address(&self) -> Option<u64> {
        let start = self.start_address?;
        self.following_address()?
            .checked_sub(1)
            .filter(|&end| end >= start)
    }

    /// Offset of the module from the memory base address.
    pub fn offset(&self, base_address: u64) -> Option<u64> {
        self.start_address?.checked_sub(base_address)
    }

    pub fn parameter(&self, key: &str) -> Option<Value> {
        match key {
            "name" => Some(Value::from(self.name.as_str())),
            "description" => Some(Value::from(self.description.as_str())),
            "summary" => Some(Value::from(self.summary.as_str())),
            "instances" => Some(Value::from(self.instances)),
            _ => self.user.get(key).cloned(),
        }
    }

    pub(crate) fn set_name(&mut self, name: String) {
        self.name = name;
    }

    pub(crate) fn set_description(&mut self, description: String) {
        self.description = description;
    }

    pub(crate) fn set_summary(&mut self, summary: String) {
        self.summary = summary;
    }

    pub(crate) fn set_instances(&mut self, instances: u32) {
        self.instances = instances;
    }

    pub(crate) fn user_parameters_mut(&mut self) -> &mut UserParameters {
        &mut self.user
    }

    pub(crate) fn constraints_mut(&mut self) -> &mut ConstraintSet {
        &mut self.constraints
    }

    pub(crate) fn registers_mut(&mut self) -> &mut Vec<RegisterId> {
        &mut self.registers
    }

    pub(crate) fn set_previous(&mut self, previous: ChainLink<ModuleId>) {
        self.previous = previous;
    }

    pub(crate) fn set_start_address(&mut self, address: Option<u64>) {
        self.start_address = address;
    }

    pub(crate) fn set_extent(&mut self, span_memory_units: u64, instance_addresses: Vec<u64>) {
        self.span_memory_units = span_memory_units;
        self.instance_addresses = instance_addresses;
    }
}

impl Subject for Module {
    fn notifier(&self, event: Event) -> Option<&Observable> {
        match event {
            Event::SizeChanged => Some(&self.size_notifier),
            Event::AddressChanged => Some(&self.address_notifier),
        }
    }

    fn notifier_mut(&mut self, event: Event) -> Option<&mut Observable> {
        match event {
            Event::SizeChanged => Some(&mut self.size_notifier),
            Event::AddressChanged => Some(&mut self.address_notifier),
        }
    }
}

#[cfg(test)]
mod tests {
    use serde_json::json;

    use super::*;

    #[test]
    fn extent_of_repeated_instances() {
        let mut module = Module::new(ModuleId(0), "uart".into());
        assert_eq!(module.following_address(), None);
        module.set_start_address(Some(0x100));
        assert_eq!(module.following_address(), Some(0x100));
        assert_eq!(module.end_address(), None);

        module.set_instances(2);
        module.set_extent(0x10, vec![0x100, 0x110]);
        assert_eq!(module.following_address(), Some(0x120));
        assert_eq!(module.end_address(), Some(0x11f));
        assert_eq!(module.offset(0x40), Some(0xc0));
        assert_eq!(module.parameter("instances"), Some(json!(2)));
    }
}

use std::fmt;

use indexmap::IndexMap;
use tracing::{debug, trace};

use crate::bit_interval::BitInterval;
use crate::constraints::{Constraint, ConstraintKind};
use crate::error::Result;
use crate::field::{Field, FieldId};
use crate::instance::RegisterInstance;
use crate::layout::Layout;
use crate::memory::MemoryConfiguration;
use crate::module::{Module, ModuleId};
use crate::observer::{ElementRef, Event, Listener, ListenerId, Notification};
use crate::parameter::Value;
use crate::register::RegisterId;

/// A register map: the memory configuration and every module, register and field laid out in it.
///
/// Every mutating method either settles the whole layout or fails and leaves the map exactly as it
/// was. Listeners are notified once the mutation has been committed.
#[derive(Default)]
pub struct RegisterMap {
    layout: Layout,
    listeners: IndexMap<ListenerId, Box<dyn Listener>>,
    next_listener: u32,
}

impl fmt::Debug for RegisterMap {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RegisterMap")
            .field("layout", &self.layout)
            .field("listeners", &self.listeners.len())
            .finish()
    }
}

impl RegisterMap {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_memory(memory: MemoryConfiguration) -> Result<Self> {
        Ok(Self {
            layout: Layout::new(memory)?,
            ..Self::default()
        })
    }

    /// Runs `op` against a staged copy of the layout and commits it once everything has settled.
    pub(crate) fn transact<T>(&mut self, op: impl FnOnce(&mut Layout) -> Result<T>) -> Result<T> {
        let mut staged = self.layout.clone();
        let value = match op(&mut staged).and_then(|value| staged.settle().map(|()| value)) {
            Ok(value) => value,
            Err(error) => {
                debug!(%error, "mutation rejected");
                return Err(error);
            }
        };
        let notifications = staged.take_outbox();
        self.layout = staged;
        self.deliver(notifications);
        Ok(value)
    }

    fn deliver(&mut self, notifications: Vec<Notification>) {
        for notification in notifications {
            if let Some(listener) = self.listeners.get_mut(&notification.listener) {
                trace!(?notification, "notifying listener");
                listener.notify(notification.source, notification.event);
            }
        }
    }

    // Memory

    pub fn memory(&self) -> &MemoryConfiguration {
        self.layout.memory()
    }

    pub fn set_memory(&mut self, memory: MemoryConfiguration) -> Result<()> {
        self.transact(|layout| layout.set_memory(memory))
    }

    pub fn set_memory_unit_bits(&mut self, bits: u32) -> Result<()> {
        self.transact(|layout| layout.set_memory_unit_bits(bits))
    }

    pub fn set_address_bits(&mut self, bits: u32) -> Result<()> {
        self.transact(|layout| layout.set_address_bits(bits))
    }

    pub fn set_base_address(&mut self, address: u64) -> Result<()> {
        self.transact(|layout| layout.set_base_address(address))
    }

    pub fn set_page_size(&mut self, page_size: Option<u64>) -> Result<()> {
        self.transact(|layout| layout.set_page_size(page_size))
    }

    // Modules

    pub fn module(&self, id: ModuleId) -> Option<&Module> {
        self.layout.module(id)
    }

    /// Modules in address order.
    pub fn modules(&self) -> impl Iterator<Item = &Module> + '_ {
        self.layout.modules()
    }

    pub fn module_by_name(&self, name: &str) -> Option<ModuleId> {
        self.layout.module_by_name(name)
    }

    pub fn add_module(&mut self, name: &str) -> Result<ModuleId> {
        self.transact(|layout| layout.add_module(name))
    }

    /// Removes the module with all of its registers.
    pub fn remove_module(&mut self, id: ModuleId) -> Result<()> {
        self.transact(|layout| layout.remove_module(id))
    }

    /// Moves the module to position `index` of the module chain.
    pub fn move_module(&mut self, id: ModuleId, index: usize) -> Result<()> {
        self.transact(|layout| layout.move_module(id, index))
    }

    pub fn set_module_instances(&mut self, id: ModuleId, instances: u32) -> Result<()> {
        self.transact(|layout| layout.set_module_instances(id, instances))
    }

    pub fn set_module_constraint(&mut self, id: ModuleId, constraint: Constraint) -> Result<()> {
        self.transact(|layout| layout.set_module_constraint(id, constraint))
    }

    pub fn clear_module_constraint(&mut self, id: ModuleId, kind: ConstraintKind) -> Result<()> {
        self.transact(|layout| layout.clear_module_constraint(id, kind))
    }

    pub fn set_module_parameter(&mut self, id: ModuleId, key: &str, value: Value) -> Result<()> {
        self.transact(|layout| layout.set_module_parameter(id, key, value))
    }

    // Registers

    pub fn register(&self, id: RegisterId) -> Option<&RegisterInstance> {
        self.layout.register(id)
    }

    /// Registers of `module` in address order.
    pub fn registers(&self, module: ModuleId) -> impl Iterator<Item = &RegisterInstance> + '_ {
        self.layout
            .module(module)
            .map(Module::registers)
            .unwrap_or_default()
            .iter()
            .filter_map(|&id| self.layout.register(id))
    }

    pub fn register_by_name(&self, module: ModuleId, name: &str) -> Option<RegisterId> {
        self.layout.register_by_name(module, name)
    }

    pub fn add_register(&mut self, module: ModuleId, name: &str) -> Result<RegisterId> {
        self.transact(|layout| layout.add_register(module, name))
    }

    /// Removes the register, unmapping its fields. Fields left without any mapping are removed too.
    pub fn remove_register(&mut self, id: RegisterId) -> Result<()> {
        self.transact(|layout| layout.remove_register(id))
    }

    /// Moves the register to position `index` of its module's chain.
    pub fn move_register(&mut self, id: RegisterId, index: usize) -> Result<()> {
        self.transact(|layout| layout.move_register(id, index))
    }

    pub fn set_register_constraint(&mut self, id: RegisterId, constraint: Constraint) -> Result<()> {
        self.transact(|layout| layout.set_register_constraint(id, constraint))
    }

    pub fn clear_register_constraint(&mut self, id: RegisterId, kind: ConstraintKind) -> Result<()> {
        self.transact(|layout| layout.clear_register_constraint(id, kind))
    }

    pub fn set_register_parameter(&mut self, id: RegisterId, key: &str, value: Value) -> Result<()> {
        self.transact(|layout| layout.set_register_parameter(id, key, value))
    }

    // Fields

    pub fn field(&self, id: FieldId) -> Option<&Field> {
        self.layout.field(id)
    }

    pub fn fields(&self) -> impl Iterator<Item = &Field> + '_ {
        self.layout.fields()
    }

    pub fn global_field(&self, name: &str) -> Option<FieldId> {
        self.layout.global_field(name)
    }

    /// Maps `source` register bits onto the field called `name`.
    ///
    /// The field is this register's local field of that name if there is one, else the global
    /// field of that name, else a new field, global if `global` is set. `destination` defaults to
    /// the field bits `[0, width - 1]`.
    pub fn add_field(
        &mut self,
        register: RegisterId,
        name: &str,
        source: impl Into<BitInterval>,
        destination: Option<BitInterval>,
        global: bool,
    ) -> Result<FieldId> {
        let source = source.into();
        self.transact(|layout| layout.add_field(register, name, source, destination, global))
    }

    /// Maps `source` register bits onto `destination` bits of an existing field.
    pub fn map_field(
        &mut self,
        register: RegisterId,
        field: FieldId,
        source: impl Into<BitInterval>,
        destination: impl Into<BitInterval>,
    ) -> Result<()> {
        let (source, destination) = (source.into(), destination.into());
        self.transact(|layout| layout.map_field(register, field, source, destination))
    }

    /// Unmaps the field called `name` from the register.
    pub fn remove_field(&mut self, register: RegisterId, name: &str) -> Result<()> {
        self.transact(|layout| layout.remove_field(register, name))
    }

    pub fn convert_to_local(
        &mut self,
        field: FieldId,
        register: RegisterId,
        remove_others: bool,
    ) -> Result<()> {
        self.transact(|layout| layout.convert_to_local(field, register, remove_others))
    }

    pub fn convert_to_global(&mut self, field: FieldId) -> Result<()> {
        self.transact(|layout| layout.convert_to_global(field))
    }

    pub fn set_field_size(&mut self, field: FieldId, size_bits: u32) -> Result<()> {
        self.transact(|layout| layout.set_field_size(field, size_bits))
    }

    pub fn set_field_reset_value(&mut self, field: FieldId, value: u64) -> Result<()> {
        self.transact(|layout| layout.set_field_reset_value(field, value))
    }

    pub fn set_field_parameter(&mut self, field: FieldId, key: &str, value: Value) -> Result<()> {
        self.transact(|layout| layout.set_field_parameter(field, key, value))
    }

    // Lookup

    pub fn canonical_id(&self, element: ElementRef) -> Option<String> {
        self.layout.canonical_id(element)
    }

    pub fn find(&self, canonical_id: &str) -> Option<ElementRef> {
        self.layout.find(canonical_id)
    }

    /// Recomputes every size and address. Changes nothing on a settled map.
    pub fn review(&mut self) -> Result<()> {
        self.transact(Layout::review_all)
    }

    // Listeners

    pub fn subscribe(
        &mut self,
        element: ElementRef,
        event: Event,
        listener: impl Listener + 'static,
    ) -> Result<ListenerId> {
        let id = ListenerId(self.next_listener);
        self.layout.subscribe_listener(element, event, id)?;
        self.next_listener += 1;
        self.listeners.insert(id, Box::new(listener));
        Ok(id)
    }

    /// Returns `false` if the listener was not subscribed.
    pub fn unsubscribe(&mut self, listener: ListenerId) -> bool {
        self.layout.unsubscribe_listener(listener);
        self.listeners.shift_remove(&listener).is_some()
    }

    pub(crate) fn layout(&self) -> &Layout {
        &self.layout
    }
}

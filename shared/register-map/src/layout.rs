//! The layout graph and its recomputation rules.
//!
//! Elements live in id-keyed arenas and refer to each other by id. Each element publishes size and
//! address changes through its observables; internal subscribers name the recomputation to run.
//! Register reviews cascade synchronously in chain order. Module span reviews are deferred until
//! the register cascade that triggered them has finished, then settled in module order, so a span
//! is never computed from registers that are still waiting for their own review.

use std::fmt;

use indexmap::IndexMap;
use tracing::{debug, trace};

use crate::bit_interval::BitInterval;
use crate::constraints::{Constraint, ConstraintKind};
use crate::error::{ConfigurationSnafu, ConstraintSnafu, Error, Result};
use crate::field::{Field, FieldId, FieldOwnership};
use crate::instance::{ChainLink, RegisterInstance};
use crate::memory::MemoryConfiguration;
use crate::module::{Module, ModuleId};
use crate::observer::{ElementRef, Event, ListenerId, Notification, Observable, Subject, Subscriber};
use crate::parameter::{
    expect_bool, expect_string, expect_u32, expect_u64, validate_name, Mode, Value,
};
use crate::register::{Register, RegisterId};

const MEMORY: &str = "memory";

fn unknown(element: impl fmt::Display) -> Error {
    ConfigurationSnafu {
        entity: element.to_string(),
        message: "no such element in the register map",
    }
    .build()
}

fn field_extent(entity: &str, destination: BitInterval) -> Result<u32> {
    u32::try_from(destination.extent()).map_err(|_| {
        ConfigurationSnafu {
            entity,
            message: format!("field bits {destination} exceed the largest field size"),
        }
        .build()
    })
}

#[derive(Clone, Debug, Default)]
pub(crate) struct Layout {
    memory: MemoryConfiguration,
    memory_size_notifier: Observable,
    memory_address_notifier: Observable,
    modules: IndexMap<ModuleId, Module>,
    module_order: Vec<ModuleId>,
    registers: IndexMap<RegisterId, RegisterInstance>,
    fields: IndexMap<FieldId, Field>,
    next_id: u32,
    pending_spans: Vec<ModuleId>,
    sweeping: bool,
    outbox: Vec<Notification>,
}

impl Layout {
    pub(crate) fn new(memory: MemoryConfiguration) -> Result<Self> {
        memory.validate()?;
        Ok(Self {
            memory,
            ..Self::default()
        })
    }

    fn allocate_id(&mut self) -> u32 {
        let id = self.next_id;
        self.next_id += 1;
        id
    }

    // Queries

    pub(crate) fn memory(&self) -> &MemoryConfiguration {
        &self.memory
    }

    pub(crate) fn module(&self, id: ModuleId) -> Option<&Module> {
        self.modules.get(&id)
    }

    pub(crate) fn modules(&self) -> impl Iterator<Item = &Module> + '_ {
        self.module_order
            .iter()
            .filter_map(|id| self.modules.get(id))
    }

    pub(crate) fn register(&self, id: RegisterId) -> Option<&RegisterInstance> {
        self.registers.get(&id)
    }

    pub(crate) fn field(&self, id: FieldId) -> Option<&Field> {
        self.fields.get(&id)
    }

    pub(crate) fn fields(&self) -> impl Iterator<Item = &Field> + '_ {
        self.fields.values()
    }

    pub(crate) fn module_by_name(&self, name: &str) -> Option<ModuleId> {
        self.modules().find(|module| module.name() == name).map(Module::id)
    }

    pub(crate) fn register_by_name(&self, module: ModuleId, name: &str) -> Option<RegisterId> {
        self.modules
            .get(&module)?
            .registers()
            .iter()
            .copied()
            .find(|id| self.registers.get(id).map_or(false, |r| r.name() == name))
    }

    pub(crate) fn global_field(&self, name: &str) -> Option<FieldId> {
        self.fields
            .values()
            .find(|field| field.is_global() && field.name() == name)
            .map(Field::id)
    }

    fn module_ref(&self, id: ModuleId) -> Result<&Module> {
        self.modules.get(&id).ok_or_else(|| unknown(id))
    }

    fn module_mut(&mut self, id: ModuleId) -> Result<&mut Module> {
        self.modules.get_mut(&id).ok_or_else(|| unknown(id))
    }

    fn instance(&self, id: RegisterId) -> Result<&RegisterInstance> {
        self.registers.get(&id).ok_or_else(|| unknown(id))
    }

    fn instance_mut(&mut self, id: RegisterId) -> Result<&mut RegisterInstance> {
        self.registers.get_mut(&id).ok_or_else(|| unknown(id))
    }

    fn field_ref(&self, id: FieldId) -> Result<&Field> {
        self.fields.get(&id).ok_or_else(|| unknown(id))
    }

    fn field_mut(&mut self, id: FieldId) -> Result<&mut Field> {
        self.fields.get_mut(&id).ok_or_else(|| unknown(id))
    }

    // Canonical ids

    pub(crate) fn module_canonical_id(&self, id: ModuleId) -> String {
        match self.modules.get(&id) {
            Some(module) => module.name().to_owned(),
            None => id.to_string(),
        }
    }

    pub(crate) fn register_canonical_id(&self, id: RegisterId) -> String {
        match self.registers.get(&id) {
            Some(register) => format!(
                "{}.{}",
                self.module_canonical_id(register.parent()),
                register.name()
            ),
            None => id.to_string(),
        }
    }

    pub(crate) fn field_canonical_id(&self, id: FieldId) -> String {
        match self.fields.get(&id) {
            Some(field) => match field.ownership() {
                FieldOwnership::Global => field.name().to_owned(),
                FieldOwnership::Local(register) => {
                    format!("{}.{}", self.register_canonical_id(register), field.name())
                }
            },
            None => id.to_string(),
        }
    }

    pub(crate) fn canonical_id(&self, element: ElementRef) -> Option<String> {
        match element {
            ElementRef::Memory => Some(MEMORY.to_owned()),
            ElementRef::Module(id) => self.modules.get(&id).map(|_| self.module_canonical_id(id)),
            ElementRef::Register(id) => self
                .registers
                .get(&id)
                .map(|_| self.register_canonical_id(id)),
            ElementRef::Field(id) => self.fields.get(&id).map(|_| self.field_canonical_id(id)),
        }
    }

    /// Resolves `module`, `module.register`, `module.register.field` or a global field name.
    pub(crate) fn find(&self, canonical_id: &str) -> Option<ElementRef> {
        let segments: Vec<&str> = canonical_id.split('.').collect();
        match segments.as_slice() {
            [name] => self
                .module_by_name(name)
                .map(ElementRef::Module)
                .or_else(|| self.global_field(name).map(ElementRef::Field)),
            [module, register] => {
                let module = self.module_by_name(module)?;
                self.register_by_name(module, register)
                    .map(ElementRef::Register)
            }
            [module, register, field] => {
                let module = self.module_by_name(module)?;
                let register = self.register_by_name(module, register)?;
                let field = self.registers.get(&register)?.field(field)?;
                self.fields
                    .get(&field)
                    .filter(|field| !field.is_global())
                    .map(|_| ElementRef::Field(field))
            }
            _ => None,
        }
    }

    // Notification

    fn notifier(&self, source: ElementRef, event: Event) -> Option<&Observable> {
        match source {
            ElementRef::Memory => Some(match event {
                Event::SizeChanged => &self.memory_size_notifier,
                Event::AddressChanged => &self.memory_address_notifier,
            }),
            ElementRef::Module(id) => self.modules.get(&id)?.notifier(event),
            ElementRef::Register(id) => self.registers.get(&id)?.notifier(event),
            ElementRef::Field(id) => self.fields.get(&id)?.notifier(event),
        }
    }

    fn notifier_mut(&mut self, source: ElementRef, event: Event) -> Option<&mut Observable> {
        match source {
            ElementRef::Memory => Some(match event {
                Event::SizeChanged => &mut self.memory_size_notifier,
                Event::AddressChanged => &mut self.memory_address_notifier,
            }),
            ElementRef::Module(id) => self.modules.get_mut(&id)?.notifier_mut(event),
            ElementRef::Register(id) => self.registers.get_mut(&id)?.notifier_mut(event),
            ElementRef::Field(id) => self.fields.get_mut(&id)?.notifier_mut(event),
        }
    }

    fn notify(&mut self, source: ElementRef, event: Event) -> Result<()> {
        self.notify_filtered(source, event, |_| true)
    }

    fn notify_filtered(
        &mut self,
        source: ElementRef,
        event: Event,
        mut filter: impl FnMut(&Subscriber) -> bool,
    ) -> Result<()> {
        let subscribers = self
            .notifier(source, event)
            .map(|notifier| notifier.subscribers().to_vec())
            .unwrap_or_default();
        for subscriber in subscribers {
            if filter(&subscriber) {
                self.deliver(source, event, subscriber)?;
            }
        }
        Ok(())
    }

    fn deliver(&mut self, source: ElementRef, event: Event, subscriber: Subscriber) -> Result<()> {
        trace!(?source, ?event, ?subscriber, "delivering notification");
        if let Subscriber::Listener(listener) = subscriber {
            self.outbox.push(Notification {
                source,
                event,
                listener,
            });
            return Ok(());
        }
        // The sweep visits every element in order itself.
        if self.sweeping {
            return Ok(());
        }
        match subscriber {
            Subscriber::RegisterSize(id) => self.review_register_size(id),
            Subscriber::RegisterAddress(id) => self.review_register_address(id),
            Subscriber::ModuleSize(id) => {
                self.defer_span_review(id);
                Ok(())
            }
            Subscriber::ModuleAddress(id) => self.review_module_address(id),
            Subscriber::Listener(_) => Ok(()),
        }
    }

    fn defer_span_review(&mut self, id: ModuleId) {
        if !self.pending_spans.contains(&id) {
            self.pending_spans.push(id);
        }
    }

    fn take_next_pending(&mut self) -> Option<ModuleId> {
        let order = &self.module_order;
        let (index, _) = self.pending_spans.iter().enumerate().min_by_key(|(_, id)| {
            order
                .iter()
                .position(|ordered| ordered == *id)
                .unwrap_or(usize::MAX)
        })?;
        Some(self.pending_spans.swap_remove(index))
    }

    /// Runs the deferred module span reviews until the graph is settled.
    pub(crate) fn settle(&mut self) -> Result<()> {
        while let Some(id) = self.take_next_pending() {
            self.review_module_size(id)?;
        }
        Ok(())
    }

    /// Listener deliveries queued since the last call, each element and event at most once per
    /// listener.
    pub(crate) fn take_outbox(&mut self) -> Vec<Notification> {
        let mut notifications: Vec<Notification> = Vec::new();
        for notification in self.outbox.drain(..) {
            if !notifications.contains(&notification) {
                notifications.push(notification);
            }
        }
        notifications
    }

    pub(crate) fn subscribe_listener(
        &mut self,
        element: ElementRef,
        event: Event,
        listener: ListenerId,
    ) -> Result<()> {
        let entity = self.canonical_id(element).ok_or_else(|| unknown(format!("{element:?}")))?;
        match self.notifier_mut(element, event) {
            Some(notifier) => {
                notifier.subscribe(Subscriber::Listener(listener));
                Ok(())
            }
            None => ConfigurationSnafu {
                entity,
                message: format!("does not publish {event:?}"),
            }
            .fail(),
        }
    }

    pub(crate) fn unsubscribe_listener(&mut self, listener: ListenerId) {
        let subscriber = Subscriber::Listener(listener);
        self.memory_size_notifier.unsubscribe(subscriber);
        self.memory_address_notifier.unsubscribe(subscriber);
        for module in self.modules.values_mut() {
            module.unsubscribe(Event::SizeChanged, subscriber);
            module.unsubscribe(Event::AddressChanged, subscriber);
        }
        for register in self.registers.values_mut() {
            register.unsubscribe(Event::SizeChanged, subscriber);
            register.unsubscribe(Event::AddressChanged, subscriber);
        }
        for field in self.fields.values_mut() {
            field.unsubscribe(Event::SizeChanged, subscriber);
        }
    }

    // Reviews

    pub(crate) fn review_register_size(&mut self, id: RegisterId) -> Result<()> {
        let Some(instance) = self.registers.get(&id) else {
            return Ok(());
        };
        let entity = self.register_canonical_id(id);
        let size = instance.calculate_size_memory_units(&entity, &self.memory)?;
        let old = instance.size_memory_units();
        if size == old {
            return Ok(());
        }
        debug!(register = %entity, old, new = size, "register size changed");
        self.instance_mut(id)?.set_size_memory_units(size);
        self.notify(ElementRef::Register(id), Event::SizeChanged)
    }

    pub(crate) fn review_register_address(&mut self, id: RegisterId) -> Result<()> {
        let Some(instance) = self.registers.get(&id) else {
            return Ok(());
        };
        let proposed = match instance.previous() {
            ChainLink::Origin => self
                .modules
                .get(&instance.parent())
                .and_then(Module::start_address),
            ChainLink::After(previous) => self
                .registers
                .get(&previous)
                .and_then(RegisterInstance::following_address),
        };
        let entity = self.register_canonical_id(id);
        let proposed = proposed.map(|address| self.memory.apply_page_register(address));
        let start = instance.constraints().apply_address(&entity, proposed)?;
        if let Some(start) = start {
            self.check_end(&entity, start, u64::from(instance.size_memory_units()))?;
        }
        let old = instance.start_address();
        if start == old {
            return Ok(());
        }
        debug!(register = %entity, ?old, new = ?start, "register address changed");
        self.instance_mut(id)?.set_start_address(start);
        self.notify(ElementRef::Register(id), Event::AddressChanged)
    }

    pub(crate) fn review_module_address(&mut self, id: ModuleId) -> Result<()> {
        let Some(module) = self.modules.get(&id) else {
            return Ok(());
        };
        let proposed = match module.previous() {
            ChainLink::Origin => Some(self.memory.base_address()),
            ChainLink::After(previous) => self
                .modules
                .get(&previous)
                .and_then(Module::following_address),
        };
        let entity = module.name().to_owned();
        let proposed = proposed.map(|address| self.memory.apply_page_register(address));
        let start = module.constraints().apply_address(&entity, proposed)?;
        let old = module.start_address();
        if start == old {
            return Ok(());
        }
        debug!(module = %entity, ?old, new = ?start, "module address changed");
        self.module_mut(id)?.set_start_address(start);
        // Rank order delivers the first register before the module's own span review.
        self.notify(ElementRef::Module(id), Event::AddressChanged)
    }

    pub(crate) fn review_module_size(&mut self, id: ModuleId) -> Result<()> {
        let Some(module) = self.modules.get(&id) else {
            return Ok(());
        };
        let Some(start) = module.start_address() else {
            return Ok(());
        };
        let entity = module.name().to_owned();
        let natural = module
            .registers()
            .iter()
            .filter_map(|register| self.registers.get(register))
            .filter_map(RegisterInstance::following_address)
            .map(|following| following.saturating_sub(start))
            .max()
            .unwrap_or(0);
        let span = module.constraints().apply_size(&entity, natural)?;

        let mut addresses = Vec::new();
        let mut next = start;
        for index in 0..module.instances() {
            if index > 0 {
                let proposed = self.memory.apply_page_register(next);
                next = module.constraints().apply_alignment(&entity, proposed)?;
            }
            addresses.push(next);
            self.check_end(&entity, next, span)?;
            next = next.saturating_add(span);
        }

        let old_span = module.span_memory_units();
        let old_following = module.following_address();
        if span == old_span && addresses == module.instance_addresses() {
            return Ok(());
        }
        let module = self.module_mut(id)?;
        module.set_extent(span, addresses);
        let following = module.following_address();
        if span != old_span {
            debug!(module = %entity, old = old_span, new = span, "module span changed");
            self.notify(ElementRef::Module(id), Event::SizeChanged)
        } else if following != old_following {
            self.notify_filtered(ElementRef::Module(id), Event::SizeChanged, |subscriber| {
                matches!(subscriber, Subscriber::ModuleAddress(_))
            })
        } else {
            Ok(())
        }
    }

    /// An element of `size` memory units starting at `start` must end inside addressable memory.
    fn check_end(&self, entity: &str, start: u64, size: u64) -> Result<()> {
        let end = start.checked_add(size.saturating_sub(1));
        match end {
            Some(end) if end <= self.memory.max_address() => Ok(()),
            _ => ConstraintSnafu {
                entity,
                message: format!(
                    "{size} memory unit(s) from {start:#x} extend past the maximum address {:#x}",
                    self.memory.max_address()
                ),
            }
            .fail(),
        }
    }

    /// Recomputes every size and address in address order. Running it on a settled graph changes
    /// nothing and notifies nobody.
    pub(crate) fn review_all(&mut self) -> Result<()> {
        self.sweeping = true;
        let result = self.sweep();
        self.sweeping = false;
        result
    }

    fn sweep(&mut self) -> Result<()> {
        for id in self.module_order.clone() {
            self.review_module_address(id)?;
            let registers = self
                .modules
                .get(&id)
                .map(|module| module.registers().to_vec())
                .unwrap_or_default();
            for register in registers {
                self.review_register_size(register)?;
                self.review_register_address(register)?;
            }
            self.pending_spans.retain(|&pending| pending != id);
            self.review_module_size(id)?;
        }
        Ok(())
    }

    // Chains

    fn relink_registers(&mut self, module: ModuleId) -> Result<()> {
        let order = self.module_ref(module)?.registers().to_vec();
        if let Some(notifier) = self.module_mut(module)?.notifier_mut(Event::AddressChanged) {
            notifier.retain(|subscriber| !matches!(subscriber, Subscriber::RegisterAddress(_)));
            if let Some(&first) = order.first() {
                notifier.subscribe(Subscriber::RegisterAddress(first));
            }
        }
        let mut previous = ChainLink::Origin;
        for (index, &id) in order.iter().enumerate() {
            let next = order.get(index + 1).copied();
            let instance = self.instance_mut(id)?;
            instance.set_previous(previous);
            for event in [Event::SizeChanged, Event::AddressChanged] {
                let Some(notifier) = instance.notifier_mut(event) else {
                    continue;
                };
                notifier.retain(|subscriber| !matches!(subscriber, Subscriber::RegisterAddress(_)));
                if event == Event::SizeChanged {
                    notifier.subscribe(Subscriber::RegisterAddress(id));
                }
                if let Some(next) = next {
                    notifier.subscribe(Subscriber::RegisterAddress(next));
                }
            }
            previous = ChainLink::After(id);
        }
        for id in order {
            self.review_register_address(id)?;
        }
        self.defer_span_review(module);
        Ok(())
    }

    fn relink_modules(&mut self) -> Result<()> {
        let order = self.module_order.clone();
        let mut previous = ChainLink::Origin;
        for (index, &id) in order.iter().enumerate() {
            let next = order.get(index + 1).copied();
            let module = self.module_mut(id)?;
            module.set_previous(previous);
            if let Some(notifier) = module.notifier_mut(Event::SizeChanged) {
                notifier.retain(|subscriber| !matches!(subscriber, Subscriber::ModuleAddress(_)));
                if let Some(next) = next {
                    notifier.subscribe(Subscriber::ModuleAddress(next));
                }
            }
            previous = ChainLink::After(id);
        }
        self.review_all()
    }

    // Memory

    pub(crate) fn set_memory_unit_bits(&mut self, bits: u32) -> Result<()> {
        if bits == self.memory.memory_unit_bits() {
            return Ok(());
        }
        self.memory.set_memory_unit_bits(bits)?;
        debug!(bits, "memory unit changed");
        self.review_all()?;
        self.notify(ElementRef::Memory, Event::SizeChanged)
    }

    pub(crate) fn set_address_bits(&mut self, bits: u32) -> Result<()> {
        if bits == self.memory.address_bits() {
            return Ok(());
        }
        self.memory.set_address_bits(bits)?;
        debug!(bits, "address width changed");
        self.review_all()?;
        self.notify(ElementRef::Memory, Event::SizeChanged)
    }

    pub(crate) fn set_base_address(&mut self, address: u64) -> Result<()> {
        if address == self.memory.base_address() {
            return Ok(());
        }
        self.memory.set_base_address(address)?;
        debug!(address, "base address changed");
        self.review_all()?;
        self.notify(ElementRef::Memory, Event::AddressChanged)
    }

    pub(crate) fn set_page_size(&mut self, page_size: Option<u64>) -> Result<()> {
        if page_size == self.memory.page_size() {
            return Ok(());
        }
        self.memory.set_page_size(page_size)?;
        debug!(?page_size, "page size changed");
        self.review_all()?;
        self.notify(ElementRef::Memory, Event::AddressChanged)
    }

    pub(crate) fn set_memory(&mut self, memory: MemoryConfiguration) -> Result<()> {
        memory.validate()?;
        if memory == self.memory {
            return Ok(());
        }
        self.memory = memory;
        self.review_all()?;
        self.notify(ElementRef::Memory, Event::SizeChanged)?;
        self.notify(ElementRef::Memory, Event::AddressChanged)
    }

    // Modules

    pub(crate) fn add_module(&mut self, name: &str) -> Result<ModuleId> {
        validate_name(name, name)?;
        if self.module_by_name(name).is_some() {
            return ConfigurationSnafu {
                entity: name,
                message: "a module with this name already exists",
            }
            .fail();
        }
        let id = ModuleId(self.allocate_id());
        let mut module = Module::new(id, name.to_owned());
        module.subscribe(Event::AddressChanged, Subscriber::ModuleSize(id));
        self.modules.insert(id, module);
        self.module_order.push(id);
        debug!(module = %name, "module added");
        self.relink_modules()?;
        Ok(id)
    }

    pub(crate) fn remove_module(&mut self, id: ModuleId) -> Result<()> {
        let registers = self.module_ref(id)?.registers().to_vec();
        for register in registers {
            self.detach_register(register)?;
        }
        self.modules.shift_remove(&id);
        self.module_order.retain(|&ordered| ordered != id);
        self.pending_spans.retain(|&pending| pending != id);
        debug!(module = %id, "module removed");
        self.relink_modules()
    }

    pub(crate) fn move_module(&mut self, id: ModuleId, index: usize) -> Result<()> {
        let entity = self.module_canonical_id(id);
        let Some(current) = self.module_order.iter().position(|&ordered| ordered == id) else {
            return Err(unknown(id));
        };
        if index >= self.module_order.len() {
            return ConfigurationSnafu {
                entity,
                message: format!(
                    "position {index} is outside the {} module(s)",
                    self.module_order.len()
                ),
            }
            .fail();
        }
        if index == current {
            return Ok(());
        }
        self.module_order.remove(current);
        self.module_order.insert(index, id);
        debug!(module = %entity, from = current, to = index, "module moved");
        self.relink_modules()
    }

    pub(crate) fn set_module_instances(&mut self, id: ModuleId, instances: u32) -> Result<()> {
        let entity = self.module_canonical_id(id);
        if instances == 0 {
            return ConfigurationSnafu {
                entity,
                message: "a module must have at least one instance",
            }
            .fail();
        }
        self.module_mut(id)?.set_instances(instances);
        self.defer_span_review(id);
        Ok(())
    }

    pub(crate) fn set_module_constraint(&mut self, id: ModuleId, constraint: Constraint) -> Result<()> {
        let entity = self.module_canonical_id(id);
        let module = self.modules.get_mut(&id).ok_or_else(|| unknown(id))?;
        module.constraints_mut().set(&entity, constraint, &self.memory)?;
        debug!(module = %entity, ?constraint, "module constraint set");
        self.review_module_address(id)?;
        self.defer_span_review(id);
        Ok(())
    }

    pub(crate) fn clear_module_constraint(&mut self, id: ModuleId, kind: ConstraintKind) -> Result<()> {
        if self.module_mut(id)?.constraints_mut().clear(kind).is_none() {
            return Ok(());
        }
        self.review_module_address(id)?;
        self.defer_span_review(id);
        Ok(())
    }

    pub(crate) fn set_module_parameter(&mut self, id: ModuleId, key: &str, value: Value) -> Result<()> {
        let entity = self.module_canonical_id(id);
        match key {
            "name" => {
                let name = expect_string(&entity, key, &value)?;
                validate_name(&entity, &name)?;
                if self.module_by_name(&name).map_or(false, |other| other != id) {
                    return ConfigurationSnafu {
                        entity,
                        message: format!("a module named {name:?} already exists"),
                    }
                    .fail();
                }
                self.module_mut(id)?.set_name(name);
            }
            "description" => {
                let text = expect_string(&entity, key, &value)?;
                self.module_mut(id)?.set_description(text);
            }
            "summary" => {
                let text = expect_string(&entity, key, &value)?;
                self.module_mut(id)?.set_summary(text);
            }
            "instances" => {
                let instances = expect_u32(&entity, key, &value)?;
                self.set_module_instances(id, instances)?;
            }
            "constraints" | "registers" => {
                return ConfigurationSnafu {
                    entity,
                    message: format!("{key:?} cannot be set as a parameter"),
                }
                .fail();
            }
            _ => {
                self.module_mut(id)?
                    .user_parameters_mut()
                    .insert(&entity, key, value)?;
            }
        }
        Ok(())
    }

    // Registers

    pub(crate) fn add_register(&mut self, module: ModuleId, name: &str) -> Result<RegisterId> {
        let module_entity = self.module_canonical_id(module);
        let entity = format!("{module_entity}.{name}");
        self.module_ref(module)?;
        validate_name(&entity, name)?;
        if self.register_by_name(module, name).is_some() {
            return ConfigurationSnafu {
                entity,
                message: "a register with this name already exists in the module",
            }
            .fail();
        }
        let id = RegisterId(self.allocate_id());
        let mut instance = RegisterInstance::new(Register::new(id, name.to_owned(), module));
        instance.subscribe(Event::SizeChanged, Subscriber::ModuleSize(module));
        instance.subscribe(Event::AddressChanged, Subscriber::ModuleSize(module));
        self.registers.insert(id, instance);
        self.module_mut(module)?.registers_mut().push(id);
        debug!(register = %entity, "register added");
        self.review_register_size(id)?;
        self.relink_registers(module)?;
        Ok(id)
    }

    pub(crate) fn remove_register(&mut self, id: RegisterId) -> Result<()> {
        let parent = self.instance(id)?.parent();
        debug!(register = %self.register_canonical_id(id), "register removed");
        self.detach_register(id)?;
        self.module_mut(parent)?
            .registers_mut()
            .retain(|&register| register != id);
        self.relink_registers(parent)
    }

    /// Unmaps every field of the register and drops it from the arena. The module chain is left for
    /// the caller to relink.
    fn detach_register(&mut self, id: RegisterId) -> Result<()> {
        let fields: Vec<FieldId> = self.instance(id)?.fields().map(|(_, field)| field).collect();
        for field in fields {
            self.unmap_field(id, field);
        }
        self.registers.shift_remove(&id);
        Ok(())
    }

    pub(crate) fn move_register(&mut self, id: RegisterId, index: usize) -> Result<()> {
        let entity = self.register_canonical_id(id);
        let parent = self.instance(id)?.parent();
        let registers = self.module_mut(parent)?.registers_mut();
        let Some(current) = registers.iter().position(|&register| register == id) else {
            return Err(unknown(id));
        };
        if index >= registers.len() {
            return ConfigurationSnafu {
                entity,
                message: format!(
                    "position {index} is outside the {} register(s) of the module",
                    registers.len()
                ),
            }
            .fail();
        }
        if index == current {
            return Ok(());
        }
        registers.remove(current);
        registers.insert(index, id);
        debug!(register = %entity, from = current, to = index, "register moved");
        self.relink_registers(parent)
    }

    pub(crate) fn set_register_constraint(
        &mut self,
        id: RegisterId,
        constraint: Constraint,
    ) -> Result<()> {
        let entity = self.register_canonical_id(id);
        let instance = self.registers.get_mut(&id).ok_or_else(|| unknown(id))?;
        instance
            .constraints_mut()
            .set(&entity, constraint, &self.memory)?;
        debug!(register = %entity, ?constraint, "register constraint set");
        self.review_register_size(id)?;
        self.review_register_address(id)
    }

    pub(crate) fn clear_register_constraint(
        &mut self,
        id: RegisterId,
        kind: ConstraintKind,
    ) -> Result<()> {
        if self.instance_mut(id)?.constraints_mut().clear(kind).is_none() {
            return Ok(());
        }
        self.review_register_size(id)?;
        self.review_register_address(id)
    }

    pub(crate) fn set_register_parameter(
        &mut self,
        id: RegisterId,
        key: &str,
        value: Value,
    ) -> Result<()> {
        let entity = self.register_canonical_id(id);
        match key {
            "name" => {
                let name = expect_string(&entity, key, &value)?;
                validate_name(&entity, &name)?;
                let parent = self.instance(id)?.parent();
                if self
                    .register_by_name(parent, &name)
                    .map_or(false, |other| other != id)
                {
                    return ConfigurationSnafu {
                        entity,
                        message: format!("a register named {name:?} already exists in the module"),
                    }
                    .fail();
                }
                self.instance_mut(id)?.set_name(name);
            }
            "mode" => {
                let mode: Mode = expect_string(&entity, key, &value)?
                    .parse()
                    .map_err(|message: String| {
                        ConfigurationSnafu {
                            entity: entity.as_str(),
                            message,
                        }
                        .build()
                    })?;
                self.instance_mut(id)?.set_mode(mode);
            }
            "description" => {
                let text = expect_string(&entity, key, &value)?;
                self.instance_mut(id)?.set_description(text);
            }
            "summary" => {
                let text = expect_string(&entity, key, &value)?;
                self.instance_mut(id)?.set_summary(text);
            }
            "public" => {
                let public = expect_bool(&entity, key, &value)?;
                self.instance_mut(id)?.set_public(public);
            }
            "global" => {
                let global = expect_bool(&entity, key, &value)?;
                self.instance_mut(id)?.set_global(global);
            }
            "constraints" | "fields" | "bitmap" => {
                return ConfigurationSnafu {
                    entity,
                    message: format!("{key:?} cannot be set as a parameter"),
                }
                .fail();
            }
            _ => {
                self.instance_mut(id)?
                    .user_parameters_mut()
                    .insert(&entity, key, value)?;
            }
        }
        Ok(())
    }

    // Fields

    /// Maps `source` register bits onto the field called `name`: this register's local field of
    /// that name, else the global field of that name, else a new field.
    pub(crate) fn add_field(
        &mut self,
        register: RegisterId,
        name: &str,
        source: BitInterval,
        destination: Option<BitInterval>,
        global: bool,
    ) -> Result<FieldId> {
        let entity = self.register_canonical_id(register);
        let instance = self.instance(register)?;
        validate_name(&entity, name)?;
        let destination = destination.unwrap_or_else(|| source.rebased());

        let local = instance.field(name).filter(|field| {
            self.fields
                .get(field)
                .map_or(false, |field| field.ownership() == FieldOwnership::Local(register))
        });
        let field = if let Some(local) = local {
            if global {
                return ConfigurationSnafu {
                    entity: format!("{entity}.{name}"),
                    message: "field is local to this register; convert it to global first",
                }
                .fail();
            }
            local
        } else if let Some(shared) = self.global_field(name) {
            shared
        } else {
            let ownership = if global {
                FieldOwnership::Global
            } else {
                FieldOwnership::Local(register)
            };
            return self.map_new_field(register, name, ownership, source, destination);
        };
        self.map_field(register, field, source, destination)?;
        Ok(field)
    }

    /// Creates a field and maps `source` register bits onto it. The field does not outlive a
    /// failed mapping.
    pub(crate) fn map_new_field(
        &mut self,
        register: RegisterId,
        name: &str,
        ownership: FieldOwnership,
        source: BitInterval,
        destination: BitInterval,
    ) -> Result<FieldId> {
        let entity = self.register_canonical_id(register);
        self.instance(register)?;
        validate_name(&entity, name)?;
        if ownership == FieldOwnership::Global && self.global_field(name).is_some() {
            return ConfigurationSnafu {
                entity: name,
                message: "a global field with this name already exists",
            }
            .fail();
        }
        let size_bits = field_extent(&entity, destination)?;
        let id = FieldId(self.allocate_id());
        self.fields
            .insert(id, Field::new(id, name.to_owned(), ownership, size_bits));
        debug!(register = %entity, field = %name, ?ownership, "field created");
        if let Err(error) = self.map_field(register, id, source, destination) {
            self.fields.shift_remove(&id);
            return Err(error);
        }
        Ok(id)
    }

    /// Maps `source` register bits onto `destination` bits of an existing field. Every check runs
    /// before anything is recorded.
    pub(crate) fn map_field(
        &mut self,
        register: RegisterId,
        field: FieldId,
        source: BitInterval,
        destination: BitInterval,
    ) -> Result<()> {
        let entity = self.register_canonical_id(register);
        let field_entity = self.field_canonical_id(field);
        let instance = self.instance(register)?;
        let target = self.field_ref(field)?;

        if let FieldOwnership::Local(owner) = target.ownership() {
            if owner != register {
                return ConfigurationSnafu {
                    entity: field_entity,
                    message: format!(
                        "field is local to {}; a local field cannot be mapped by multiple \
                         registers",
                        self.register_canonical_id(owner)
                    ),
                }
                .fail();
            }
        }
        if instance
            .field(target.name())
            .map_or(false, |existing| existing != field)
        {
            return ConfigurationSnafu {
                entity,
                message: format!("register already maps another field named {:?}", target.name()),
            }
            .fail();
        }
        instance.bitmap().check_source(&entity, source)?;
        target.check_destination(&field_entity, destination)?;
        let extent = instance.bitmap().extent().max(source.extent());
        instance.constrained_size_memory_units(&entity, &self.memory, extent)?;
        let field_size = field_extent(&field_entity, destination)?;
        let name = target.name().to_owned();

        let (Some(instance), Some(target)) =
            (self.registers.get_mut(&register), self.fields.get_mut(&field))
        else {
            return Err(unknown(register));
        };
        instance
            .bitmap_mut()
            .map_bits(&entity, source, destination, target, &field_entity)?;
        instance.field_index_mut().insert(name, field);
        target.subscribe(Event::SizeChanged, Subscriber::RegisterSize(register));
        if target.resize(field_size) {
            debug!(field = %field_entity, size = field_size, "field grew");
            // The initiating register reviews its own size below.
            self.notify_filtered(ElementRef::Field(field), Event::SizeChanged, |subscriber| {
                *subscriber != Subscriber::RegisterSize(register)
            })?;
        }
        self.review_register_size(register)
    }

    /// Drops every mapping of `field` from `register`, and the field itself with its last mapping.
    fn unmap_field(&mut self, register: RegisterId, field: FieldId) {
        if let Some(instance) = self.registers.get_mut(&register) {
            instance.bitmap_mut().unmap_field(field);
            instance.field_index_mut().retain(|_, mapped| *mapped != field);
        }
        let Some(target) = self.fields.get_mut(&field) else {
            return;
        };
        target.unmap_register(register);
        target.unsubscribe(Event::SizeChanged, Subscriber::RegisterSize(register));
        if target.slices().is_empty() {
            debug!(field = %target.name(), "field removed with its last mapping");
            self.fields.shift_remove(&field);
        }
    }

    pub(crate) fn remove_field(&mut self, register: RegisterId, name: &str) -> Result<()> {
        let entity = self.register_canonical_id(register);
        let Some(field) = self.instance(register)?.field(name) else {
            return ConfigurationSnafu {
                entity,
                message: format!("register has no field named {name:?}"),
            }
            .fail();
        };
        debug!(register = %entity, field = %name, "field unmapped");
        self.unmap_field(register, field);
        self.review_register_size(register)
    }

    pub(crate) fn convert_to_local(
        &mut self,
        field: FieldId,
        register: RegisterId,
        remove_others: bool,
    ) -> Result<()> {
        let entity = self.field_canonical_id(field);
        let target = self.field_ref(field)?;
        if target.ownership() == FieldOwnership::Local(register) {
            return Ok(());
        }
        let holders = target.registers();
        if !holders.contains(&register) {
            return ConfigurationSnafu {
                entity,
                message: format!("field is not mapped by {}", self.register_canonical_id(register)),
            }
            .fail();
        }
        let others: Vec<RegisterId> = holders
            .into_iter()
            .filter(|&holder| holder != register)
            .collect();
        if !others.is_empty() && !remove_others {
            return ConfigurationSnafu {
                entity,
                message: format!(
                    "field is mapped by multiple registers ({} others)",
                    others.len()
                ),
            }
            .fail();
        }
        for other in others {
            debug!(field = %entity, register = %self.register_canonical_id(other), "mapping removed for local conversion");
            self.unmap_field(other, field);
            self.review_register_size(other)?;
        }
        self.field_mut(field)?
            .set_ownership(FieldOwnership::Local(register));
        debug!(field = %entity, "field converted to local");
        Ok(())
    }

    pub(crate) fn convert_to_global(&mut self, field: FieldId) -> Result<()> {
        let entity = self.field_canonical_id(field);
        let target = self.field_ref(field)?;
        if target.is_global() {
            return Ok(());
        }
        if self.global_field(target.name()).is_some() {
            return ConfigurationSnafu {
                entity,
                message: "a global field with this name already exists",
            }
            .fail();
        }
        self.field_mut(field)?.set_ownership(FieldOwnership::Global);
        debug!(field = %entity, "field converted to global");
        Ok(())
    }

    pub(crate) fn set_field_size(&mut self, field: FieldId, size_bits: u32) -> Result<()> {
        let entity = self.field_canonical_id(field);
        if self.field_mut(field)?.set_size_bits(&entity, size_bits)? {
            debug!(field = %entity, size = size_bits, "field size set");
            self.notify(ElementRef::Field(field), Event::SizeChanged)?;
        }
        Ok(())
    }

    pub(crate) fn set_field_reset_value(&mut self, field: FieldId, value: u64) -> Result<()> {
        let entity = self.field_canonical_id(field);
        self.field_mut(field)?.set_reset_value(&entity, value)
    }

    fn rename_field(&mut self, field: FieldId, name: String) -> Result<()> {
        let entity = self.field_canonical_id(field);
        validate_name(&entity, &name)?;
        let target = self.field_ref(field)?;
        if target.name() == name {
            return Ok(());
        }
        if target.is_global()
            && self
                .global_field(&name)
                .map_or(false, |other| other != field)
        {
            return ConfigurationSnafu {
                entity,
                message: format!("a global field named {name:?} already exists"),
            }
            .fail();
        }
        let holders = target.registers();
        for &holder in &holders {
            if self.instance(holder)?.field(&name).is_some() {
                return ConfigurationSnafu {
                    entity: self.register_canonical_id(holder),
                    message: format!("register already maps a field named {name:?}"),
                }
                .fail();
            }
        }
        for holder in holders {
            let index = self.instance_mut(holder)?.field_index_mut();
            *index = index
                .drain(..)
                .map(|(key, mapped)| {
                    if mapped == field {
                        (name.clone(), mapped)
                    } else {
                        (key, mapped)
                    }
                })
                .collect();
        }
        self.field_mut(field)?.set_name(name);
        Ok(())
    }

    pub(crate) fn set_field_parameter(&mut self, field: FieldId, key: &str, value: Value) -> Result<()> {
        let entity = self.field_canonical_id(field);
        match key {
            "name" => {
                let name = expect_string(&entity, key, &value)?;
                self.rename_field(field, name)?;
            }
            "size" => {
                let size = expect_u32(&entity, key, &value)?;
                self.set_field_size(field, size)?;
            }
            "resetValue" => {
                let reset = expect_u64(&entity, key, &value)?;
                self.set_field_reset_value(field, reset)?;
            }
            "description" => {
                let text = expect_string(&entity, key, &value)?;
                self.field_mut(field)?.set_description(text);
            }
            "summary" => {
                let text = expect_string(&entity, key, &value)?;
                self.field_mut(field)?.set_summary(text);
            }
            "global" => {
                if expect_bool(&entity, key, &value)? {
                    self.convert_to_global(field)?;
                } else {
                    let holders = self.field_ref(field)?.registers();
                    match holders.as_slice() {
                        [holder] => self.convert_to_local(field, *holder, false)?,
                        _ => {
                            return ConfigurationSnafu {
                                entity,
                                message: "field is mapped by multiple registers",
                            }
                            .fail();
                        }
                    }
                }
            }
            "parent" => {
                return ConfigurationSnafu {
                    entity,
                    message: format!("{key:?} cannot be set as a parameter"),
                }
                .fail();
            }
            _ => {
                self.field_mut(field)?
                    .user_parameters_mut()
                    .insert(&entity, key, value)?;
            }
        }
        Ok(())
    }
}

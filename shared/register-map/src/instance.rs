use std::ops::{Deref, DerefMut};

use crate::observer::{Event, Observable, Subject};
use crate::register::{Register, RegisterId};

/// The element whose following address seeds the proposed start address of a chained element.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum ChainLink<Id> {
    /// The first element of a chain, seeded by the start of the enclosing address space.
    Origin,
    After(Id),
}

impl<Id: Copy> ChainLink<Id> {
    pub fn previous(self) -> Option<Id> {
        match self {
            Self::Origin => None,
            Self::After(id) => Some(id),
        }
    }
}

/// A register placed in the address space of its module.
#[derive(Clone, Debug)]
pub struct RegisterInstance {
    register: Register,
    start_address: Option<u64>,
    previous: ChainLink<RegisterId>,
    address_notifier: Observable,
}

impl RegisterInstance {
    pub(crate) fn new(register: Register) -> Self {
        Self {
            register,
            start_address: None,
            previous: ChainLink::Origin,
            address_notifier: Observable::new(),
        }
    }

    pub fn register(&self) -> &Register {
        &self.register
    }

    pub fn previous(&self) -> ChainLink<RegisterId> {
        self.previous
    }

    /// `None` until the chain leading to this register can be resolved.
    pub fn start_address(&self) -> Option<u64> {
        self.start_address
    }

    pub fn end_address(&self) -> Option<u64> {
        self.start_address?
            .checked_add(u64::from(self.size_memory_units()).saturating_sub(1))
    }

    /// The first address after this register.
    pub fn following_address(&self) -> Option<u64> {
        self.start_address?
            .checked_add(u64::from(self.size_memory_units()))
    }

    /// Offset from the start of the enclosing module.
    pub fn module_offset(&self, module_start: Option<u64>) -> Option<u64> {
        self.start_address?.checked_sub(module_start?)
    }

    pub(crate) fn set_start_address(&mut self, address: Option<u64>) {
        self.start_address = address;
    }

    pub(crate) fn set_previous(&mut self, previous: ChainLink<RegisterId>) {
        self.previous = previous;
    }
}

impl Deref for RegisterInstance {
    type Target = Register;

    fn deref(&self) -> &Register {
        &self.register
    }
}

impl DerefMut for RegisterInstance {
    fn deref_mut(&mut self) -> &mut Register {
        &mut self.register
    }
}

impl Subject for RegisterInstance {
    fn notifier(&self, event: Event) -> Option<&Observable> {
        match event {
            Event::SizeChanged => self.register.notifier(event),
            Event::AddressChanged => Some(&self.address_notifier),
        }
    }

    fn notifier_mut(&mut self, event: Event) -> Option<&mut Observable> {
        match event {
            Event::SizeChanged => self.register.notifier_mut(event),
            Event::AddressChanged => Some(&mut self.address_notifier),
        }
    }
}

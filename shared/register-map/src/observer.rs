//! Size and address change notifications.
//!
//! Every element of the layout graph publishes through an [`Observable`] per event kind. Internal
//! subscribers name the recomputation the layout performs when the event is delivered; the layout
//! graph is a DAG, and each recomputation only re-publishes when its value actually changed, so a
//! cascade always terminates.
//!
//! Delivery is synchronous and depth-first. Within one publisher, subscribers are delivered in
//! topological order regardless of subscription order: register sizes, then register addresses,
//! then module spans, then module addresses, then external listeners.

use std::fmt;

use crate::field::FieldId;
use crate::module::ModuleId;
use crate::register::RegisterId;

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum Event {
    SizeChanged,
    AddressChanged,
}

/// A publishing element of the layout graph.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum ElementRef {
    Memory,
    Module(ModuleId),
    Register(RegisterId),
    Field(FieldId),
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ListenerId(pub(crate) u32);

impl fmt::Display for ListenerId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "listener#{}", self.0)
    }
}

/// The receiving end of a subscription.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum Subscriber {
    /// Recompute the register's size.
    RegisterSize(RegisterId),
    /// Recompute the register instance's start address.
    RegisterAddress(RegisterId),
    /// Recompute the module's span.
    ModuleSize(ModuleId),
    /// Recompute the module's start address.
    ModuleAddress(ModuleId),
    /// Queue a delivery to an external listener once the mutation has settled.
    Listener(ListenerId),
}

impl Subscriber {
    fn rank(self) -> u8 {
        match self {
            Self::RegisterSize(_) => 0,
            Self::RegisterAddress(_) => 1,
            Self::ModuleSize(_) => 2,
            Self::ModuleAddress(_) => 3,
            Self::Listener(_) => 4,
        }
    }
}

#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct Observable {
    subscribers: Vec<Subscriber>,
}

impl Observable {
    pub fn new() -> Self {
        Self::default()
    }

    /// Returns `false` if the subscriber was already subscribed.
    pub fn subscribe(&mut self, subscriber: Subscriber) -> bool {
        if self.subscribers.contains(&subscriber) {
            return false;
        }
        let index = self
            .subscribers
            .partition_point(|existing| existing.rank() <= subscriber.rank());
        self.subscribers.insert(index, subscriber);
        true
    }

    pub fn unsubscribe(&mut self, subscriber: Subscriber) -> bool {
        let before = self.subscribers.len();
        self.subscribers.retain(|&existing| existing != subscriber);
        before != self.subscribers.len()
    }

    pub(crate) fn retain(&mut self, keep: impl FnMut(&Subscriber) -> bool) {
        self.subscribers.retain(keep);
    }

    pub fn subscribers(&self) -> &[Subscriber] {
        &self.subscribers
    }

    pub fn is_empty(&self) -> bool {
        self.subscribers.is_empty()
    }
}

/// An element that publishes layout notifications.
pub trait Subject {
    fn notifier(&self, event: Event) -> Option<&Observable>;

    fn notifier_mut(&mut self, event: Event) -> Option<&mut Observable>;

    /// Returns `false` if this element does not publish `event` or the subscriber was already
    /// subscribed.
    fn subscribe(&mut self, event: Event, subscriber: Subscriber) -> bool {
        self.notifier_mut(event)
            .map_or(false, |notifier| notifier.subscribe(subscriber))
    }

    fn unsubscribe(&mut self, event: Event, subscriber: Subscriber) -> bool {
        self.notifier_mut(event)
            .map_or(false, |notifier| notifier.unsubscribe(subscriber))
    }
}

/// Receives notifications after a mutation has settled and been committed.
pub trait Listener {
    fn notify(&mut self, source: ElementRef, event: Event);
}

impl<F: FnMut(ElementRef, Event)> Listener for F {
    fn notify(&mut self, source: ElementRef, event: Event) {
        self(source, event)
    }
}

/// A listener delivery queued during a mutation.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct Notification {
    pub source: ElementRef,
    pub event: Event,
    pub listener: ListenerId,
}

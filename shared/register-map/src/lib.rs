#![deny(rustdoc::broken_intra_doc_links)]
#![doc = include_str!("../README.md")]

mod bit_interval;
mod bitmap;
mod constraints;
mod document;
mod error;
mod field;
mod instance;
mod layout;
mod memory;
mod module;
mod observer;
mod parameter;
mod register;
mod register_map;

pub use crate::bit_interval::BitInterval;
pub use crate::bitmap::{BitMap, Mapping};
pub use crate::constraints::{Constraint, ConstraintKind, ConstraintSet};
pub use crate::document::{
    BitMappingDocument, ConstraintsDocument, FieldDocument, ModuleDocument, RegisterDocument,
    RegisterMapDocument,
};
pub use crate::error::{Error, ErrorKind, Result};
pub use crate::field::{Field, FieldId, FieldOwnership, FieldSlice};
pub use crate::instance::{ChainLink, RegisterInstance};
pub use crate::memory::MemoryConfiguration;
pub use crate::module::{Module, ModuleId};
pub use crate::observer::{
    ElementRef, Event, Listener, ListenerId, Notification, Observable, Subject, Subscriber,
};
pub use crate::parameter::{Mode, UserParameters, Value};
pub use crate::register::{Register, RegisterId};
pub use crate::register_map::RegisterMap;

//! Persisted form of a register map.
//!
//! Documents are plain serde structures, written as JSON. Keys starting with `_` echo computed
//! values for diagnostics and are ignored on import. Importing replays the same entry points that
//! programmatic callers use, so loaded data is checked exactly like interactively built data.

use serde::{Deserialize, Serialize};
use snafu::ResultExt;

use crate::bit_interval::BitInterval;
use crate::constraints::{Constraint, ConstraintSet};
use crate::error::{JsonSnafu, ParseSnafu, Result};
use crate::field::{FieldId, FieldOwnership};
use crate::layout::Layout;
use crate::memory::MemoryConfiguration;
use crate::module::ModuleId;
use crate::observer::ElementRef;
use crate::parameter::{Mode, UserParameters, Value};
use crate::register::RegisterId;
use crate::register_map::RegisterMap;

fn one() -> u32 {
    1
}

fn yes() -> bool {
    true
}

fn is_false(value: &bool) -> bool {
    !*value
}

fn is_zero(value: &u64) -> bool {
    *value == 0
}

#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct RegisterMapDocument {
    #[serde(default)]
    pub memory: MemoryConfiguration,
    #[serde(default)]
    pub modules: Vec<ModuleDocument>,
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ModuleDocument {
    #[serde(rename = "_address", default, skip_serializing_if = "Option::is_none")]
    pub address: Option<u64>,
    #[serde(rename = "_spanMemoryUnits", default, skip_serializing_if = "Option::is_none")]
    pub span_memory_units: Option<u64>,
    pub name: String,
    #[serde(default)]
    pub description: String,
    #[serde(default)]
    pub summary: String,
    #[serde(default = "one")]
    pub instances: u32,
    #[serde(default, skip_serializing_if = "ConstraintsDocument::is_empty")]
    pub constraints: ConstraintsDocument,
    #[serde(default)]
    pub registers: Vec<RegisterDocument>,
    #[serde(flatten)]
    pub user: UserParameters,
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RegisterDocument {
    #[serde(rename = "_address", default, skip_serializing_if = "Option::is_none")]
    pub address: Option<u64>,
    #[serde(rename = "_sizeMemoryUnits", default, skip_serializing_if = "Option::is_none")]
    pub size_memory_units: Option<u32>,
    pub name: String,
    #[serde(default)]
    pub mode: Mode,
    #[serde(default)]
    pub description: String,
    #[serde(default)]
    pub summary: String,
    #[serde(default = "yes")]
    pub public: bool,
    #[serde(default, skip_serializing_if = "is_false")]
    pub global: bool,
    #[serde(default, skip_serializing_if = "ConstraintsDocument::is_empty")]
    pub constraints: ConstraintsDocument,
    #[serde(default)]
    pub fields: Vec<FieldDocument>,
    #[serde(default)]
    pub bitmap: Vec<BitMappingDocument>,
    #[serde(flatten)]
    pub user: UserParameters,
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct FieldDocument {
    pub name: String,
    pub size: u32,
    #[serde(default, skip_serializing_if = "is_zero")]
    pub reset_value: u64,
    #[serde(default)]
    pub description: String,
    #[serde(default)]
    pub summary: String,
    #[serde(default, skip_serializing_if = "is_false")]
    pub global: bool,
    /// Canonical id of the owning register, for local fields.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub parent: Option<String>,
    #[serde(flatten)]
    pub user: UserParameters,
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct BitMappingDocument {
    pub source: BitInterval,
    pub destination: BitInterval,
    /// Canonical id of the destination field.
    pub destination_id: String,
}

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ConstraintsDocument {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub fixed_address: Option<u64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub fixed_size_memory_units: Option<u32>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub alignment_memory_units: Option<u64>,
}

impl ConstraintsDocument {
    pub fn is_empty(&self) -> bool {
        *self == Self::default()
    }

    fn constraints(self) -> impl Iterator<Item = Constraint> {
        [
            self.alignment_memory_units
                .map(Constraint::AlignmentMemoryUnits),
            self.fixed_address.map(Constraint::FixedAddress),
            self.fixed_size_memory_units
                .map(Constraint::FixedSizeMemoryUnits),
        ]
        .into_iter()
        .flatten()
    }
}

impl From<&ConstraintSet> for ConstraintsDocument {
    fn from(constraints: &ConstraintSet) -> Self {
        Self {
            fixed_address: constraints.fixed_address(),
            fixed_size_memory_units: constraints.fixed_size_memory_units(),
            alignment_memory_units: constraints.alignment_memory_units(),
        }
    }
}

// Export

fn module_document(layout: &Layout, id: ModuleId) -> Option<ModuleDocument> {
    let module = layout.module(id)?;
    Some(ModuleDocument {
        address: module.start_address(),
        span_memory_units: Some(module.span_memory_units()),
        name: module.name().to_owned(),
        description: module.description().to_owned(),
        summary: module.summary().to_owned(),
        instances: module.instances(),
        constraints: module.constraints().into(),
        registers: module
            .registers()
            .iter()
            .filter_map(|&register| register_document(layout, register))
            .collect(),
        user: module.user_parameters().clone(),
    })
}

fn register_document(layout: &Layout, id: RegisterId) -> Option<RegisterDocument> {
    let register = layout.register(id)?;
    let canonical_id = layout.register_canonical_id(id);
    let fields = register
        .fields()
        .filter_map(|(_, field)| layout.field(field))
        .map(|field| FieldDocument {
            name: field.name().to_owned(),
            size: field.size_bits(),
            reset_value: field.reset_value(),
            description: field.description().to_owned(),
            summary: field.summary().to_owned(),
            global: field.is_global(),
            parent: match field.ownership() {
                FieldOwnership::Local(_) => Some(canonical_id.clone()),
                FieldOwnership::Global => None,
            },
            user: field.user_parameters().clone(),
        })
        .collect();
    let bitmap = register
        .bitmap()
        .mappings()
        .iter()
        .map(|mapping| BitMappingDocument {
            source: mapping.source,
            destination: mapping.destination,
            destination_id: layout.field_canonical_id(mapping.field),
        })
        .collect();
    Some(RegisterDocument {
        address: register.start_address(),
        size_memory_units: Some(register.size_memory_units()),
        name: register.name().to_owned(),
        mode: register.mode(),
        description: register.description().to_owned(),
        summary: register.summary().to_owned(),
        public: register.is_public(),
        global: register.is_global(),
        constraints: register.constraints().into(),
        fields,
        bitmap,
        user: register.user_parameters().clone(),
    })
}

// Import

fn import_module(layout: &mut Layout, document: &ModuleDocument) -> Result<ModuleId> {
    let id = layout.add_module(&document.name)?;
    layout.set_module_parameter(id, "description", Value::from(document.description.as_str()))?;
    layout.set_module_parameter(id, "summary", Value::from(document.summary.as_str()))?;
    layout.set_module_instances(id, document.instances)?;
    for (key, value) in document.user.without_reserved().iter() {
        layout.set_module_parameter(id, key, value.clone())?;
    }
    for constraint in document.constraints.constraints() {
        layout.set_module_constraint(id, constraint)?;
    }
    for register in &document.registers {
        import_register(layout, id, register)?;
    }
    Ok(id)
}

pub(crate) fn import_register(
    layout: &mut Layout,
    module: ModuleId,
    document: &RegisterDocument,
) -> Result<RegisterId> {
    let id = layout.add_register(module, &document.name)?;
    let entity = layout.register_canonical_id(id);
    let core = [
        ("mode", Value::from(document.mode.as_str())),
        ("description", Value::from(document.description.as_str())),
        ("summary", Value::from(document.summary.as_str())),
        ("public", Value::from(document.public)),
        ("global", Value::from(document.global)),
    ];
    for (key, value) in core {
        layout.set_register_parameter(id, key, value)?;
    }
    for (key, value) in document.user.without_reserved().iter() {
        layout.set_register_parameter(id, key, value.clone())?;
    }
    for constraint in document.constraints.constraints() {
        layout.set_register_constraint(id, constraint)?;
    }

    for mapping in &document.bitmap {
        map_document_bits(layout, id, &entity, document, mapping)?;
    }

    for field in &document.fields {
        let Some(field_id) = layout.register(id).and_then(|register| register.field(&field.name))
        else {
            return ParseSnafu {
                entity: format!("{entity}.{}", field.name),
                message: "field is declared but no bits are mapped to it",
            }
            .fail();
        };
        layout.set_field_size(field_id, field.size)?;
        layout.set_field_reset_value(field_id, field.reset_value)?;
        layout.set_field_parameter(
            field_id,
            "description",
            Value::from(field.description.as_str()),
        )?;
        layout.set_field_parameter(field_id, "summary", Value::from(field.summary.as_str()))?;
        for (key, value) in field.user.without_reserved().iter() {
            layout.set_field_parameter(field_id, key, value.clone())?;
        }
    }
    Ok(id)
}

/// Resolves the destination of one mapping among the register's declared fields, then the fields
/// already in the map. Declared local fields always land on the imported register, whatever
/// register they were written from.
fn map_document_bits(
    layout: &mut Layout,
    register: RegisterId,
    entity: &str,
    document: &RegisterDocument,
    mapping: &BitMappingDocument,
) -> Result<FieldId> {
    let declared = document.fields.iter().find(|field| {
        if field.global {
            field.name == mapping.destination_id
        } else {
            let parent = field.parent.as_deref().unwrap_or(entity);
            format!("{parent}.{}", field.name) == mapping.destination_id
        }
    });
    let existing = match declared {
        Some(field) if field.global => layout.global_field(&field.name),
        Some(field) => layout
            .register(register)
            .and_then(|instance| instance.field(&field.name))
            .filter(|&id| {
                layout
                    .field(id)
                    .map_or(false, |field| !field.is_global())
            }),
        // A bare name may also name a module; the global field wins here.
        None => match layout
            .global_field(&mapping.destination_id)
            .map(ElementRef::Field)
            .or_else(|| layout.find(&mapping.destination_id))
        {
            Some(ElementRef::Field(id)) => Some(id),
            _ => {
                return ParseSnafu {
                    entity,
                    message: format!(
                        "bitmap refers to unknown field {:?}",
                        mapping.destination_id
                    ),
                }
                .fail();
            }
        },
    };
    match (existing, declared) {
        (Some(field), _) => {
            layout.map_field(register, field, mapping.source, mapping.destination)?;
            Ok(field)
        }
        (None, Some(field)) => {
            let ownership = if field.global {
                FieldOwnership::Global
            } else {
                FieldOwnership::Local(register)
            };
            layout.map_new_field(
                register,
                &field.name,
                ownership,
                mapping.source,
                mapping.destination,
            )
        }
        (None, None) => ParseSnafu {
            entity,
            message: format!("bitmap refers to unknown field {:?}", mapping.destination_id),
        }
        .fail(),
    }
}

impl RegisterMap {
    /// The persisted form of the whole map. Does not modify the map.
    pub fn to_document(&self) -> RegisterMapDocument {
        let layout = self.layout();
        RegisterMapDocument {
            memory: layout.memory().clone(),
            modules: layout
                .modules()
                .filter_map(|module| module_document(layout, module.id()))
                .collect(),
        }
    }

    pub fn register_document(&self, id: RegisterId) -> Option<RegisterDocument> {
        register_document(self.layout(), id)
    }

    pub fn from_document(document: &RegisterMapDocument) -> Result<Self> {
        let mut map = Self::with_memory(document.memory.clone())?;
        map.transact(|layout| {
            for module in &document.modules {
                import_module(layout, module)?;
            }
            Ok(())
        })?;
        Ok(map)
    }

    /// Adds a register described by `document` to `module`, resolving field references against
    /// the fields already in the map.
    pub fn import_register(
        &mut self,
        module: ModuleId,
        document: &RegisterDocument,
    ) -> Result<RegisterId> {
        self.transact(|layout| import_register(layout, module, document))
    }

    pub fn to_json(&self) -> Result<String> {
        serde_json::to_string_pretty(&self.to_document()).context(JsonSnafu)
    }

    pub fn from_json(text: &str) -> Result<Self> {
        let document: RegisterMapDocument = serde_json::from_str(text).context(JsonSnafu)?;
        Self::from_document(&document)
    }
}

#[cfg(test)]
mod tests {
    use serde_json::json;

    use super::*;

    #[test]
    fn computed_echoes_are_written_and_ignored() {
        let mut map = RegisterMap::new();
        let module = map.add_module("m").unwrap();
        let register = map.add_register(module, "r").unwrap();
        map.add_field(register, "f", (0, 9), None, false).unwrap();

        let document = map.register_document(register).unwrap();
        assert_eq!(document.address, Some(0));
        assert_eq!(document.size_memory_units, Some(2));
        assert_eq!(document.fields[0].parent.as_deref(), Some("m.r"));
        assert_eq!(document.bitmap[0].destination_id, "m.r.f");

        let mut value = serde_json::to_value(&document).unwrap();
        value["_address"] = json!(0x4000);
        value["_extra"] = json!(true);
        value["name"] = json!("copy");
        let copy: RegisterDocument = serde_json::from_value(value).unwrap();
        let copied = map.import_register(module, &copy).unwrap();
        let instance = map.register(copied).unwrap();
        assert_eq!(instance.start_address(), Some(2));
        assert_eq!(instance.user_parameters().get("_extra"), None);
    }

    #[test]
    fn constraint_document_lists_only_set_constraints() {
        let document = ConstraintsDocument {
            fixed_address: Some(0x10),
            ..ConstraintsDocument::default()
        };
        assert_eq!(
            serde_json::to_value(document).unwrap(),
            json!({"fixedAddress": 16})
        );
        assert!(ConstraintsDocument::default().is_empty());
    }
}

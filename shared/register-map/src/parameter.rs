//! Core and user-defined parameters of layout elements.
//!
//! Each element keeps its core parameters in typed struct fields and anything else in an ordered
//! [`UserParameters`] map. The `parameter` accessors of the elements consult the core fields first
//! and fall back to the user map.

use std::fmt;
use std::str::FromStr;

use indexmap::IndexMap;
use serde::{Deserialize, Serialize};
pub use serde_json::Value;

use crate::error::{ConfigurationSnafu, Error, Result};

/// Access policy of a register. Carried and persisted but never interpreted by the layout.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Mode {
    #[serde(rename = "r")]
    Read,
    #[serde(rename = "ro")]
    ReadOnly,
    #[serde(rename = "w")]
    Write,
    #[serde(rename = "wo")]
    WriteOnly,
    #[default]
    #[serde(rename = "rw")]
    ReadWrite,
    #[serde(rename = "w1c")]
    WriteOneToClear,
}

impl Mode {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Read => "r",
            Self::ReadOnly => "ro",
            Self::Write => "w",
            Self::WriteOnly => "wo",
            Self::ReadWrite => "rw",
            Self::WriteOneToClear => "w1c",
        }
    }
}

impl fmt::Display for Mode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Mode {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Ok(match s {
            "r" => Self::Read,
            "ro" => Self::ReadOnly,
            "w" => Self::Write,
            "wo" => Self::WriteOnly,
            "rw" => Self::ReadWrite,
            "w1c" => Self::WriteOneToClear,
            _ => return Err(format!("invalid register mode {s:?}")),
        })
    }
}

/// User-defined parameters in insertion order.
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct UserParameters(IndexMap<String, Value>);

impl UserParameters {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn get(&self, key: &str) -> Option<&Value> {
        self.0.get(key)
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, &Value)> {
        self.0.iter().map(|(key, value)| (key.as_str(), value))
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    /// Keys beginning with `_` are reserved for computed values.
    pub fn insert(&mut self, entity: &str, key: &str, value: Value) -> Result<Option<Value>> {
        if key.is_empty() || key.starts_with('_') {
            return ConfigurationSnafu {
                entity,
                message: format!("invalid user parameter name {key:?}"),
            }
            .fail();
        }
        Ok(self.0.insert(key.to_owned(), value))
    }

    pub fn remove(&mut self, key: &str) -> Option<Value> {
        self.0.shift_remove(key)
    }

    /// Drops reserved keys, as found in documents echoing computed values.
    pub(crate) fn without_reserved(&self) -> Self {
        Self(
            self.0
                .iter()
                .filter(|(key, _)| !key.starts_with('_'))
                .map(|(key, value)| (key.clone(), value.clone()))
                .collect(),
        )
    }
}

fn wrong_type(entity: &str, key: &str, expected: &str, value: &Value) -> Error {
    ConfigurationSnafu {
        entity,
        message: format!("parameter {key:?} must be {expected}, got {value}"),
    }
    .build()
}

pub(crate) fn expect_bool(entity: &str, key: &str, value: &Value) -> Result<bool> {
    value
        .as_bool()
        .ok_or_else(|| wrong_type(entity, key, "a boolean", value))
}

pub(crate) fn expect_u64(entity: &str, key: &str, value: &Value) -> Result<u64> {
    value
        .as_u64()
        .ok_or_else(|| wrong_type(entity, key, "a non-negative integer", value))
}

pub(crate) fn expect_u32(entity: &str, key: &str, value: &Value) -> Result<u32> {
    value
        .as_u64()
        .and_then(|value| u32::try_from(value).ok())
        .ok_or_else(|| wrong_type(entity, key, "a non-negative 32-bit integer", value))
}

pub(crate) fn expect_string(entity: &str, key: &str, value: &Value) -> Result<String> {
    value
        .as_str()
        .map(str::to_owned)
        .ok_or_else(|| wrong_type(entity, key, "a string", value))
}

/// Names become path segments of canonical ids.
pub(crate) fn validate_name(entity: &str, name: &str) -> Result<()> {
    if name.is_empty() || name.contains('.') {
        return ConfigurationSnafu {
            entity,
            message: format!("invalid name {name:?}; names must be non-empty and contain no '.'"),
        }
        .fail();
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use serde_json::json;

    use crate::error::ErrorKind;

    use super::*;

    #[test]
    fn mode_round_trips_through_text() {
        for mode in [
            Mode::Read,
            Mode::ReadOnly,
            Mode::Write,
            Mode::WriteOnly,
            Mode::ReadWrite,
            Mode::WriteOneToClear,
        ] {
            assert_eq!(mode.as_str().parse::<Mode>(), Ok(mode));
            assert_eq!(serde_json::to_value(mode).unwrap(), json!(mode.as_str()));
        }
        assert!("rwx".parse::<Mode>().is_err());
        assert_eq!(Mode::default(), Mode::ReadWrite);
    }

    #[test]
    fn user_parameters_keep_insertion_order() {
        let mut user = UserParameters::new();
        user.insert("r", "zeta", json!(1)).unwrap();
        user.insert("r", "alpha", json!("two")).unwrap();
        let keys: Vec<&str> = user.iter().map(|(key, _)| key).collect();
        assert_eq!(keys, ["zeta", "alpha"]);
        assert_eq!(user.get("alpha"), Some(&json!("two")));
    }

    #[test]
    fn reserved_user_keys_are_rejected() {
        let mut user = UserParameters::new();
        let error = user.insert("r", "_address", json!(1)).unwrap_err();
        assert_eq!(error.kind(), ErrorKind::Configuration);
        assert!(user.insert("r", "", json!(1)).is_err());
        assert!(user.is_empty());
    }

    #[test]
    fn typed_accessors() {
        assert!(expect_bool("r", "public", &json!(true)).unwrap());
        assert_eq!(
            expect_bool("r", "public", &json!("yes")).unwrap_err().kind(),
            ErrorKind::Configuration
        );
        assert_eq!(expect_u64("f", "resetValue", &json!(7)).unwrap(), 7);
        assert!(expect_u64("f", "resetValue", &json!(-1)).is_err());
        assert!(expect_u32("f", "size", &json!(1u64 << 40)).is_err());
        assert!(validate_name("m", "a.b").is_err());
        assert!(validate_name("m", "").is_err());
        validate_name("m", "control").unwrap();
    }
}

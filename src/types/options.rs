/// Option Bag passed into drivers
use std::collections::HashMap;

use serde::{Deserialize, Serialize};

use super::flags::OptionType;

/// List value wrapper, kept as an object on the wire
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct StringSlice {
    #[serde(default)]
    pub value: Vec<String>,
}

impl StringSlice {
    pub fn new<I, S>(values: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            value: values.into_iter().map(Into::into).collect(),
        }
    }
}

/// Typed key/value configuration for a driver call
///
/// A key absent from its map means "unset". Lookups never fail; they fall back
/// to `""`, `false`, `0` or an empty list.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DriverOptions {
    #[serde(default)]
    pub bool_options: HashMap<String, bool>,
    #[serde(default)]
    pub string_options: HashMap<String, String>,
    #[serde(default)]
    pub int_options: HashMap<String, i64>,
    #[serde(default)]
    pub string_slice_options: HashMap<String, StringSlice>,
}

/// A single looked-up option value
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum OptionValue {
    Bool(bool),
    Int(i64),
    String(String),
    StringSlice(Vec<String>),
}

impl OptionValue {
    /// Zero value for a type
    pub fn zero(option_type: OptionType) -> Self {
        match option_type {
            OptionType::String => OptionValue::String(String::new()),
            OptionType::Bool => OptionValue::Bool(false),
            OptionType::Int => OptionValue::Int(0),
            OptionType::StringSlice => OptionValue::StringSlice(Vec::new()),
        }
    }

    pub fn option_type(&self) -> OptionType {
        match self {
            OptionValue::Bool(_) => OptionType::Bool,
            OptionValue::Int(_) => OptionType::Int,
            OptionValue::String(_) => OptionType::String,
            OptionValue::StringSlice(_) => OptionType::StringSlice,
        }
    }
}

impl DriverOptions {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_string(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.string_options.insert(key.into(), value.into());
        self
    }

    pub fn with_bool(mut self, key: impl Into<String>, value: bool) -> Self {
        self.bool_options.insert(key.into(), value);
        self
    }

    pub fn with_int(mut self, key: impl Into<String>, value: i64) -> Self {
        self.int_options.insert(key.into(), value);
        self
    }

    pub fn with_string_slice<I, S>(mut self, key: impl Into<String>, values: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.string_slice_options
            .insert(key.into(), StringSlice::new(values));
        self
    }

    /// First value present under `keys` in the map for `option_type`, else its zero value
    pub fn get_value(&self, option_type: OptionType, keys: &[&str]) -> OptionValue {
        let found = match option_type {
            OptionType::String => first(&self.string_options, keys).cloned().map(OptionValue::String),
            OptionType::Bool => first(&self.bool_options, keys).copied().map(OptionValue::Bool),
            OptionType::Int => first(&self.int_options, keys).copied().map(OptionValue::Int),
            OptionType::StringSlice => first(&self.string_slice_options, keys)
                .map(|s| OptionValue::StringSlice(s.value.clone())),
        };
        found.unwrap_or_else(|| OptionValue::zero(option_type))
    }

    pub fn get_string(&self, keys: &[&str]) -> String {
        first(&self.string_options, keys).cloned().unwrap_or_default()
    }

    pub fn get_bool(&self, keys: &[&str]) -> bool {
        first(&self.bool_options, keys).copied().unwrap_or_default()
    }

    pub fn get_int(&self, keys: &[&str]) -> i64 {
        first(&self.int_options, keys).copied().unwrap_or_default()
    }

    pub fn get_string_slice(&self, keys: &[&str]) -> Vec<String> {
        first(&self.string_slice_options, keys)
            .map(|s| s.value.clone())
            .unwrap_or_default()
    }

    /// Whether `key` is set in any of the four maps
    pub fn contains(&self, key: &str) -> bool {
        self.string_options.contains_key(key)
            || self.bool_options.contains_key(key)
            || self.int_options.contains_key(key)
            || self.string_slice_options.contains_key(key)
    }

    /// Store a looked-up value back under `key`
    pub fn set_value(&mut self, key: impl Into<String>, value: OptionValue) {
        let key = key.into();
        match value {
            OptionValue::String(v) => {
                self.string_options.insert(key, v);
            }
            OptionValue::Bool(v) => {
                self.bool_options.insert(key, v);
            }
            OptionValue::Int(v) => {
                self.int_options.insert(key, v);
            }
            OptionValue::StringSlice(v) => {
                self.string_slice_options.insert(key, StringSlice { value: v });
            }
        }
    }

    /// Copy string entries for keys that are not already set; existing values win
    pub fn merge_missing_strings<'a, I>(&mut self, entries: I)
    where
        I: IntoIterator<Item = (&'a String, &'a String)>,
    {
        for (key, value) in entries {
            if !self.contains(key) {
                self.string_options.insert(key.clone(), value.clone());
            }
        }
    }

    /// Every key set in the bag, paired with its type
    pub fn keys(&self) -> impl Iterator<Item = (&str, OptionType)> {
        self.string_options
            .keys()
            .map(|k| (k.as_str(), OptionType::String))
            .chain(self.bool_options.keys().map(|k| (k.as_str(), OptionType::Bool)))
            .chain(self.int_options.keys().map(|k| (k.as_str(), OptionType::Int)))
            .chain(
                self.string_slice_options
                    .keys()
                    .map(|k| (k.as_str(), OptionType::StringSlice)),
            )
    }
}

fn first<'a, V>(map: &'a HashMap<String, V>, keys: &[&str]) -> Option<&'a V> {
    keys.iter().find_map(|key| map.get(*key))
}

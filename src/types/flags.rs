/// Self-describing option schema a driver publishes about itself
use std::collections::BTreeMap;
use std::fmt;

use serde::{Deserialize, Serialize};

use super::options::{DriverOptions, OptionValue};
use crate::error::{EngineError, Result};

/// Value type of a declared option
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum OptionType {
    #[serde(rename = "string")]
    String,
    #[serde(rename = "bool")]
    Bool,
    #[serde(rename = "int")]
    Int,
    #[serde(rename = "stringSlice")]
    StringSlice,
}

impl fmt::Display for OptionType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            OptionType::String => write!(f, "string"),
            OptionType::Bool => write!(f, "bool"),
            OptionType::Int => write!(f, "int"),
            OptionType::StringSlice => write!(f, "stringSlice"),
        }
    }
}

/// Descriptor of one accepted option
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Flag {
    #[serde(rename = "type")]
    pub option_type: OptionType,
    #[serde(default)]
    pub usage: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub default: Option<OptionValue>,
}

impl Flag {
    pub fn new(option_type: OptionType, usage: impl Into<String>) -> Self {
        Self {
            option_type,
            usage: usage.into(),
            default: None,
        }
    }

    pub fn string(usage: impl Into<String>) -> Self {
        Self::new(OptionType::String, usage)
    }

    pub fn bool(usage: impl Into<String>) -> Self {
        Self::new(OptionType::Bool, usage)
    }

    pub fn int(usage: impl Into<String>) -> Self {
        Self::new(OptionType::Int, usage)
    }

    pub fn string_slice(usage: impl Into<String>) -> Self {
        Self::new(OptionType::StringSlice, usage)
    }

    /// Attach a default; the value must match the flag type
    pub fn with_default(mut self, value: OptionValue) -> Self {
        debug_assert_eq!(value.option_type(), self.option_type);
        self.default = Some(value);
        self
    }
}

/// Option name -> descriptor, as returned by the describe operations
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct DriverFlags {
    #[serde(default)]
    pub options: BTreeMap<String, Flag>,
}

impl DriverFlags {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with(mut self, name: impl Into<String>, flag: Flag) -> Self {
        self.options.insert(name.into(), flag);
        self
    }

    pub fn get(&self, name: &str) -> Option<&Flag> {
        self.options.get(name)
    }

    /// Check every supplied key is declared with a matching type
    ///
    /// Keys listed in `reserved` (such as `name`) are always accepted.
    pub fn validate(&self, options: &DriverOptions, reserved: &[&str]) -> Result<()> {
        for (key, supplied) in options.keys() {
            if reserved.contains(&key) {
                continue;
            }
            match self.options.get(key) {
                None => {
                    return Err(EngineError::validation(format!("unknown option {}", key)));
                }
                Some(flag) if flag.option_type != supplied => {
                    return Err(EngineError::validation(format!(
                        "option {} expects {} but got {}",
                        key, flag.option_type, supplied
                    )));
                }
                Some(_) => {}
            }
        }
        Ok(())
    }

    /// Fill unset keys from declared defaults
    pub fn apply_defaults(&self, options: &mut DriverOptions) {
        for (name, flag) in &self.options {
            if let Some(default) = &flag.default {
                if !options.contains(name) {
                    options.set_value(name.clone(), default.clone());
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn flags() -> DriverFlags {
        DriverFlags::new()
            .with("zone", Flag::string("The zone to launch the cluster"))
            .with(
                "node-count",
                Flag::int("The number of nodes").with_default(OptionValue::Int(3)),
            )
            .with("labels", Flag::string_slice("Node labels"))
    }

    #[test]
    fn test_validate_accepts_declared_options() {
        let opts = DriverOptions::new()
            .with_string("name", "demo")
            .with_string("zone", "z1")
            .with_int("node-count", 1);
        assert!(flags().validate(&opts, &["name"]).is_ok());
    }

    #[test]
    fn test_validate_rejects_unknown_and_mistyped() {
        let unknown = DriverOptions::new().with_string("region", "eu");
        let err = flags().validate(&unknown, &[]).unwrap_err();
        assert!(err.to_string().contains("unknown option region"));

        let mistyped = DriverOptions::new().with_string("node-count", "3");
        let err = flags().validate(&mistyped, &[]).unwrap_err();
        assert!(err.to_string().contains("expects int but got string"));
    }

    #[test]
    fn test_apply_defaults_only_fills_unset() {
        let mut opts = DriverOptions::new();
        flags().apply_defaults(&mut opts);
        assert_eq!(opts.get_int(&["node-count"]), 3);

        let mut opts = DriverOptions::new().with_int("node-count", 7);
        flags().apply_defaults(&mut opts);
        assert_eq!(opts.get_int(&["node-count"]), 7);
    }

    #[test]
    fn test_wire_type_names() {
        let json = serde_json::to_value(flags()).unwrap();
        assert_eq!(json["options"]["labels"]["type"], "stringSlice");
        assert_eq!(json["options"]["node-count"]["default"], 3);
        assert!(json["options"]["zone"].get("default").is_none());

        let parsed: DriverFlags = serde_json::from_value(json).unwrap();
        assert_eq!(parsed, flags());
    }
}

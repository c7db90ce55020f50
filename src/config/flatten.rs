/// Flattening of nested configuration into the Option Bag
use serde::Serialize;
use serde_yaml::{Mapping, Value};

use crate::error::{EngineError, Result};
use crate::types::{DriverOptions, StringSlice};

/// Object-valued keys flattened to `key=value` lists rather than recursed into
pub const MAP_LIST_KEYS: [&str; 4] = ["labels", "tags", "annotations", "taints"];

/// Flatten any serializable configuration object into an Option Bag
///
/// - strings go to the string map, bools to the bool map
/// - numbers go to the int map; fractional values are truncated
/// - sequences of scalars become string lists, each element stringified
/// - objects under [`MAP_LIST_KEYS`] become `key=value` lists sorted by key
/// - any other object is flattened into the same bag
/// - nulls are skipped
pub fn flatten_options<T: Serialize>(config: &T) -> Result<DriverOptions> {
    let value = serde_yaml::to_value(config)?;
    let mut opts = DriverOptions::new();
    match value {
        Value::Null => {}
        Value::Mapping(map) => flatten_mapping(&map, &mut opts)?,
        Value::Tagged(tagged) => match tagged.value {
            Value::Mapping(map) => flatten_mapping(&map, &mut opts)?,
            _ => return Err(EngineError::validation("configuration must be a mapping")),
        },
        _ => return Err(EngineError::validation("configuration must be a mapping")),
    }
    Ok(opts)
}

fn flatten_mapping(map: &Mapping, opts: &mut DriverOptions) -> Result<()> {
    for (key, value) in map {
        let key = scalar_to_string(key)
            .ok_or_else(|| EngineError::validation("configuration keys must be scalars"))?;
        flatten_value(&key, value, opts)?;
    }
    Ok(())
}

fn flatten_value(key: &str, value: &Value, opts: &mut DriverOptions) -> Result<()> {
    match value {
        Value::Null => {}
        Value::Bool(b) => {
            opts.bool_options.insert(key.to_string(), *b);
        }
        Value::Number(n) => {
            let int = if let Some(i) = n.as_i64() {
                i
            } else if let Some(f) = n.as_f64().filter(|f| f.is_finite()) {
                f.trunc() as i64
            } else {
                return Err(EngineError::validation(format!(
                    "option {} is not a representable integer: {}",
                    key, n
                )));
            };
            opts.int_options.insert(key.to_string(), int);
        }
        Value::String(s) => {
            opts.string_options.insert(key.to_string(), s.clone());
        }
        Value::Sequence(items) => {
            let values = items
                .iter()
                .map(|item| {
                    scalar_to_string(item).ok_or_else(|| {
                        EngineError::validation(format!("option {} must be a list of scalars", key))
                    })
                })
                .collect::<Result<Vec<_>>>()?;
            opts.string_slice_options
                .insert(key.to_string(), StringSlice { value: values });
        }
        Value::Mapping(map) if MAP_LIST_KEYS.contains(&key) => {
            let mut pairs = map
                .iter()
                .map(|(k, v)| match (scalar_to_string(k), scalar_to_string(v)) {
                    (Some(k), Some(v)) => Ok(format!("{}={}", k, v)),
                    _ => Err(EngineError::validation(format!(
                        "option {} must map scalars to scalars",
                        key
                    ))),
                })
                .collect::<Result<Vec<_>>>()?;
            pairs.sort();
            opts.string_slice_options
                .insert(key.to_string(), StringSlice { value: pairs });
        }
        Value::Mapping(map) => flatten_mapping(map, opts)?,
        Value::Tagged(tagged) => flatten_value(key, &tagged.value, opts)?,
    }
    Ok(())
}

fn scalar_to_string(value: &Value) -> Option<String> {
    match value {
        Value::String(s) => Some(s.clone()),
        Value::Bool(b) => Some(b.to_string()),
        Value::Number(n) => Some(n.to_string()),
        Value::Tagged(tagged) => scalar_to_string(&tagged.value),
        Value::Null | Value::Sequence(_) | Value::Mapping(_) => None,
    }
}

/// Config Port implementations
use async_trait::async_trait;
use tracing::debug;

use super::flatten::flatten_options;
use super::ClusterSpec;
use crate::cluster::ConfigGetter;
use crate::error::{EngineError, Result};
use crate::types::{DriverFlags, DriverOptions, OptionType};

/// Reserved key always set to the cluster name
const NAME_KEY: &str = "name";

/// Resolves options from a declarative cluster spec
pub struct SpecConfigGetter {
    spec: ClusterSpec,
    flags: Option<DriverFlags>,
    defaults: bool,
}

impl SpecConfigGetter {
    pub fn new(spec: ClusterSpec) -> Self {
        Self {
            spec,
            flags: None,
            defaults: false,
        }
    }

    /// Validate against a driver's flags and fill in their defaults
    pub fn with_flags(mut self, flags: DriverFlags) -> Self {
        self.flags = Some(flags);
        self.defaults = true;
        self
    }

    /// Validate against a driver's update flags
    ///
    /// Defaults are left out so unset keys keep their stored values.
    pub fn with_update_flags(mut self, flags: DriverFlags) -> Self {
        self.flags = Some(flags);
        self.defaults = false;
        self
    }
}

#[async_trait]
impl ConfigGetter for SpecConfigGetter {
    async fn resolve(&self) -> Result<DriverOptions> {
        let mut opts = flatten_options(&self.spec.options)?;
        if let Some(flags) = &self.flags {
            flags.validate(&opts, &[NAME_KEY])?;
            if self.defaults {
                flags.apply_defaults(&mut opts);
            }
        }
        opts.string_options
            .insert(NAME_KEY.to_string(), self.spec.name.clone());
        debug!("Resolved {} options for cluster {}", opts.keys().count(), self.spec.name);
        Ok(opts)
    }
}

/// Resolves options from `key=value` pairs typed by a driver's flags
pub struct CliConfigGetter {
    name: String,
    flags: DriverFlags,
    pairs: Vec<String>,
    defaults: bool,
}

impl CliConfigGetter {
    pub fn new(name: impl Into<String>, flags: DriverFlags, pairs: Vec<String>) -> Self {
        Self {
            name: name.into(),
            flags,
            pairs,
            defaults: true,
        }
    }

    /// Only pass on the pairs given; used for updates
    pub fn without_defaults(mut self) -> Self {
        self.defaults = false;
        self
    }

    fn parse(&self) -> Result<DriverOptions> {
        let mut opts = DriverOptions::new();

        for pair in &self.pairs {
            let (key, raw) = pair.split_once('=').ok_or_else(|| {
                EngineError::validation(format!("expected key=value, got {}", pair))
            })?;
            let key = key.trim();
            let flag = self
                .flags
                .get(key)
                .ok_or_else(|| EngineError::validation(format!("unknown option {}", key)))?;

            match flag.option_type {
                OptionType::String => {
                    opts.string_options.insert(key.to_string(), raw.to_string());
                }
                OptionType::Bool => {
                    let value = raw.trim().parse::<bool>().map_err(|_| {
                        EngineError::validation(format!("option {} expects true or false", key))
                    })?;
                    opts.bool_options.insert(key.to_string(), value);
                }
                OptionType::Int => {
                    let value = raw.trim().parse::<i64>().map_err(|_| {
                        EngineError::validation(format!("option {} expects an integer", key))
                    })?;
                    opts.int_options.insert(key.to_string(), value);
                }
                OptionType::StringSlice => {
                    opts.string_slice_options
                        .entry(key.to_string())
                        .or_default()
                        .value
                        .extend(
                            raw.split(',')
                                .map(str::trim)
                                .filter(|s| !s.is_empty())
                                .map(str::to_string),
                        );
                }
            }
        }

        Ok(opts)
    }
}

#[async_trait]
impl ConfigGetter for CliConfigGetter {
    async fn resolve(&self) -> Result<DriverOptions> {
        let mut opts = self.parse()?;
        if self.defaults {
            self.flags.apply_defaults(&mut opts);
        }
        opts.string_options
            .insert(NAME_KEY.to_string(), self.name.clone());
        Ok(opts)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::{Flag, OptionValue};

    fn flags() -> DriverFlags {
        DriverFlags::new()
            .with("zone", Flag::string("The zone to launch the cluster"))
            .with(
                "node-count",
                Flag::int("The number of nodes").with_default(OptionValue::Int(3)),
            )
            .with("enable-alpha-feature", Flag::bool("Enable alpha features"))
            .with("labels", Flag::string_slice("Node labels"))
    }

    fn pairs(items: &[&str]) -> Vec<String> {
        items.iter().map(|s| s.to_string()).collect()
    }

    #[tokio::test]
    async fn test_cli_pairs_are_typed_by_flags() {
        let getter = CliConfigGetter::new(
            "demo",
            flags(),
            pairs(&[
                "zone=us-east1",
                "enable-alpha-feature=true",
                "labels=a=b,c=d",
                "labels=e=f",
            ]),
        );

        let opts = getter.resolve().await.unwrap();
        assert_eq!(opts.get_string(&["name"]), "demo");
        assert_eq!(opts.get_string(&["zone"]), "us-east1");
        assert!(opts.get_bool(&["enable-alpha-feature"]));
        assert_eq!(opts.get_int(&["node-count"]), 3);
        assert_eq!(opts.get_string_slice(&["labels"]), vec!["a=b", "c=d", "e=f"]);
    }

    #[tokio::test]
    async fn test_cli_rejects_unknown_and_malformed() {
        for bad in ["region=eu", "node-count=three", "zone"] {
            let getter = CliConfigGetter::new("demo", flags(), pairs(&[bad]));
            let err = getter.resolve().await.unwrap_err();
            assert!(matches!(err, EngineError::Validation(_)), "{}", bad);
        }
    }

    #[tokio::test]
    async fn test_spec_getter_flattens_and_names() {
        let spec: ClusterSpec = serde_yaml::from_str(
            "name: demo\ndriver: gke\noptions:\n  zone: z1\n  labels: {a: b}\n",
        )
        .unwrap();

        let opts = SpecConfigGetter::new(spec).resolve().await.unwrap();
        assert_eq!(opts.get_string(&["name"]), "demo");
        assert_eq!(opts.get_string(&["zone"]), "z1");
        assert_eq!(opts.get_string_slice(&["labels"]), vec!["a=b"]);
    }

    #[tokio::test]
    async fn test_spec_getter_validates_against_flags() {
        let spec: ClusterSpec =
            serde_yaml::from_str("name: demo\ndriver: gke\noptions:\n  zone: z1\n").unwrap();
        let opts = SpecConfigGetter::new(spec.clone())
            .with_flags(flags())
            .resolve()
            .await
            .unwrap();
        assert_eq!(opts.get_int(&["node-count"]), 3);

        let mut bad = spec;
        bad.options = serde_yaml::from_str("region: eu").unwrap();
        let err = SpecConfigGetter::new(bad)
            .with_flags(flags())
            .resolve()
            .await
            .unwrap_err();
        assert!(err.to_string().contains("unknown option region"));
    }

    #[tokio::test]
    async fn test_update_getters_validate_without_defaults() {
        let update_flags = DriverFlags::new()
            .with("node-count", Flag::int("The number of nodes").with_default(OptionValue::Int(3)));

        let spec: ClusterSpec =
            serde_yaml::from_str("name: demo\ndriver: gke\noptions: {}\n").unwrap();
        let opts = SpecConfigGetter::new(spec.clone())
            .with_update_flags(update_flags.clone())
            .resolve()
            .await
            .unwrap();
        assert!(!opts.contains("node-count"));

        let mut moved = spec;
        moved.options = serde_yaml::from_str("zone: z2").unwrap();
        let err = SpecConfigGetter::new(moved)
            .with_update_flags(update_flags.clone())
            .resolve()
            .await
            .unwrap_err();
        assert!(matches!(err, EngineError::Validation(_)));

        let opts = CliConfigGetter::new("demo", update_flags, Vec::new())
            .without_defaults()
            .resolve()
            .await
            .unwrap();
        assert_eq!(opts.keys().count(), 1);
        assert_eq!(opts.get_string(&["name"]), "demo");
    }
}

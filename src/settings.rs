//! Layered plugin settings.
//!
//! A source's effective settings are resolved once per instantiation from
//! three layers, last wins per key:
//!
//! ```text
//! declared defaults  →  alias chain (root parent first)  →  run overrides
//! ```
//!
//! The result is an immutable [`PluginSettings`] value. Deriving a variant
//! (for example, injecting a period key before fingerprinting) produces a
//! new value via [`PluginSettings::with`].

use chrono::NaiveDate;
use serde_json::Value;
use std::collections::BTreeMap;

use crate::error::{EngineError, EngineResult};

/// One layer of `name → value` overrides, as read from the config file.
pub type SettingsLayer = BTreeMap<String, Value>;

/// Declaration of a single setting a plugin understands.
#[derive(Debug, Clone)]
pub struct SettingSpec {
    pub name: &'static str,
    pub help: &'static str,
    pub default: Value,
    pub required: bool,
}

impl SettingSpec {
    pub fn new(name: &'static str, help: &'static str, default: Value) -> Self {
        Self {
            name,
            help,
            default,
            required: false,
        }
    }

    /// A setting with no default that must be provided by an alias or run.
    pub fn required(name: &'static str, help: &'static str) -> Self {
        Self {
            name,
            help,
            default: Value::Null,
            required: true,
        }
    }
}

/// Settings every source understands.
pub fn base_settings() -> Vec<SettingSpec> {
    vec![
        SettingSpec::new(
            "cache-expires",
            "Number of units after which to expire cache files.",
            Value::Null,
        ),
        SettingSpec::new(
            "cache-expires-units",
            "Unit of time for cache-expires: years, months, weeks, days, hours, minutes, seconds, microseconds.",
            Value::from("days"),
        ),
        SettingSpec::new(
            "encoding",
            "Text encoding of fetched files: a label such as 'latin1', or 'chardet' to detect it.",
            Value::Null,
        ),
        SettingSpec::new(
            "no-hash-settings",
            "Settings to exclude from fingerprint calculations.",
            Value::Array(vec![]),
        ),
        SettingSpec::new(
            "source",
            "Provenance tag written on stored rows. Defaults to the alias.",
            Value::Null,
        ),
    ]
}

/// Settings added by sources that work in monthly periods.
pub fn periodic_settings() -> Vec<SettingSpec> {
    vec![
        SettingSpec::required("start-period", "First period (month) in YYYY-MM format."),
        SettingSpec::new(
            "end-period",
            "Last period (month) in YYYY-MM format. Defaults to the last completed month.",
            Value::Null,
        ),
        SettingSpec::new(
            "no-hash-settings",
            "Settings to exclude from fingerprint calculations.",
            Value::from(vec!["start-period", "end-period"]),
        ),
    ]
}

/// Fully resolved settings for one plugin instance.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct PluginSettings {
    values: BTreeMap<String, Value>,
}

impl PluginSettings {
    pub fn from_map(values: BTreeMap<String, Value>) -> Self {
        Self { values }
    }

    pub fn get(&self, key: &str) -> Option<&Value> {
        self.values.get(key).filter(|v| !v.is_null())
    }

    pub fn contains(&self, key: &str) -> bool {
        self.values.contains_key(key)
    }

    pub fn iter(&self) -> impl Iterator<Item = (&String, &Value)> {
        self.values.iter()
    }

    pub fn len(&self) -> usize {
        self.values.len()
    }

    pub fn is_empty(&self) -> bool {
        self.values.is_empty()
    }

    /// Return a copy with one extra (or replaced) entry.
    pub fn with(&self, key: &str, value: Value) -> Self {
        let mut values = self.values.clone();
        values.insert(key.to_string(), value);
        Self { values }
    }

    pub fn str(&self, key: &str) -> EngineResult<Option<&str>> {
        match self.get(key) {
            None => Ok(None),
            Some(Value::String(s)) => Ok(Some(s.as_str())),
            Some(other) => Err(EngineError::config(format!(
                "setting '{}' must be a string, got {}",
                key, other
            ))),
        }
    }

    pub fn u64(&self, key: &str) -> EngineResult<Option<u64>> {
        match self.get(key) {
            None => Ok(None),
            Some(v) => v.as_u64().map(Some).ok_or_else(|| {
                EngineError::config(format!(
                    "setting '{}' must be a non-negative integer, got {}",
                    key, v
                ))
            }),
        }
    }

    pub fn bool(&self, key: &str) -> EngineResult<Option<bool>> {
        match self.get(key) {
            None => Ok(None),
            Some(Value::Bool(b)) => Ok(Some(*b)),
            Some(other) => Err(EngineError::config(format!(
                "setting '{}' must be true or false, got {}",
                key, other
            ))),
        }
    }

    pub fn str_list(&self, key: &str) -> EngineResult<Vec<String>> {
        match self.get(key) {
            None => Ok(Vec::new()),
            Some(Value::Array(items)) => items
                .iter()
                .map(|item| match item {
                    Value::String(s) => Ok(s.clone()),
                    other => Err(EngineError::config(format!(
                        "setting '{}' must be a list of strings, found {}",
                        key, other
                    ))),
                })
                .collect(),
            Some(Value::String(s)) => Ok(vec![s.clone()]),
            Some(other) => Err(EngineError::config(format!(
                "setting '{}' must be a list of strings, got {}",
                key, other
            ))),
        }
    }

    /// Parse a `YYYY-MM` setting into the first day of that month.
    pub fn month(&self, key: &str) -> EngineResult<Option<NaiveDate>> {
        match self.str(key)? {
            None => Ok(None),
            Some(s) => parse_month(s)
                .map(Some)
                .ok_or_else(|| {
                    EngineError::config(format!("{} must be in YYYY-MM format, got '{}'", key, s))
                }),
        }
    }
}

pub fn parse_month(s: &str) -> Option<NaiveDate> {
    NaiveDate::parse_from_str(&format!("{}-01", s.trim()), "%Y-%m-%d").ok()
}

/// Builds [`PluginSettings`] from declared defaults and override layers.
pub struct SettingsBuilder {
    specs: Vec<SettingSpec>,
    layers: Vec<(String, SettingsLayer)>,
}

impl SettingsBuilder {
    pub fn new(specs: Vec<SettingSpec>) -> Self {
        Self {
            specs,
            layers: Vec::new(),
        }
    }

    /// Add an override layer. `label` names the layer in error messages.
    pub fn layer(mut self, label: impl Into<String>, layer: SettingsLayer) -> Self {
        self.layers.push((label.into(), layer));
        self
    }

    pub fn build(self) -> EngineResult<PluginSettings> {
        let mut values: BTreeMap<String, Value> = BTreeMap::new();
        for spec in &self.specs {
            values.insert(spec.name.to_string(), spec.default.clone());
        }

        for (label, layer) in &self.layers {
            let unknown: Vec<&str> = layer
                .keys()
                .filter(|k| !values.contains_key(k.as_str()))
                .map(|k| k.as_str())
                .collect();
            if !unknown.is_empty() {
                return Err(EngineError::config(format!(
                    "unknown setting(s) in {}: {}",
                    label,
                    unknown.join(", ")
                )));
            }
            for (k, v) in layer {
                values.insert(k.clone(), v.clone());
            }
        }

        let mut missing: Vec<&str> = Vec::new();
        for spec in &self.specs {
            if spec.required && values.get(spec.name).map_or(true, Value::is_null) {
                missing.push(spec.name);
            }
        }
        missing.dedup();
        if !missing.is_empty() {
            return Err(EngineError::config(format!(
                "missing required setting(s): {}",
                missing.join(", ")
            )));
        }

        Ok(PluginSettings::from_map(values))
    }
}

/// A registered alias: overrides on top of a built-in plugin or another alias.
#[derive(Debug, Clone, Default, serde::Deserialize)]
pub struct AliasDef {
    #[serde(default)]
    pub plugin: Option<String>,
    #[serde(default)]
    pub parent: Option<String>,
    #[serde(default)]
    pub settings: SettingsLayer,
}

/// An alias walked down to its built-in plugin.
#[derive(Debug, Clone)]
pub struct ResolvedAlias {
    pub alias: String,
    pub plugin: String,
    /// Override layers, root-most parent first.
    pub layers: Vec<(String, SettingsLayer)>,
}

/// Walk `alias` through `parent` links until a built-in plugin is reached.
///
/// A name that is not in `aliases` but satisfies `is_plugin` resolves to
/// that plugin with no override layers.
pub fn resolve_alias_chain(
    alias: &str,
    aliases: &BTreeMap<String, AliasDef>,
    is_plugin: impl Fn(&str) -> bool,
) -> EngineResult<ResolvedAlias> {
    let mut chain: Vec<String> = Vec::new();
    let mut layers: Vec<(String, SettingsLayer)> = Vec::new();
    let mut current = alias.to_string();

    let plugin = loop {
        if chain.contains(&current) {
            chain.push(current);
            return Err(EngineError::config(format!(
                "cyclic alias parent chain: {}",
                chain.join(" -> ")
            )));
        }

        let Some(def) = aliases.get(&current) else {
            if is_plugin(&current) {
                break current;
            }
            return Err(EngineError::config(format!(
                "unknown source alias '{}'",
                current
            )));
        };
        chain.push(current.clone());
        layers.push((format!("alias '{}'", current), def.settings.clone()));

        match (&def.plugin, &def.parent) {
            (Some(_), Some(_)) => {
                return Err(EngineError::config(format!(
                    "alias '{}' sets both `plugin` and `parent`",
                    current
                )))
            }
            (Some(plugin), None) => {
                if !is_plugin(plugin) {
                    return Err(EngineError::config(format!(
                        "alias '{}' names unknown plugin '{}'",
                        current, plugin
                    )));
                }
                break plugin.clone();
            }
            (None, Some(parent)) => current = parent.clone(),
            (None, None) => {
                return Err(EngineError::config(format!(
                    "alias '{}' must set `plugin` or `parent`",
                    current
                )))
            }
        }
    };

    layers.reverse();
    Ok(ResolvedAlias {
        alias: alias.to_string(),
        plugin,
        layers,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn layer(pairs: &[(&str, Value)]) -> SettingsLayer {
        pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.clone()))
            .collect()
    }

    fn specs() -> Vec<SettingSpec> {
        let mut specs = base_settings();
        specs.push(SettingSpec::new("data-file", "file", json!("data.txt")));
        specs
    }

    #[test]
    fn later_layers_win() {
        let settings = SettingsBuilder::new(specs())
            .layer("alias", layer(&[("data-file", json!("alias.txt"))]))
            .layer("run", layer(&[("data-file", json!("run.txt"))]))
            .build()
            .unwrap();
        assert_eq!(settings.str("data-file").unwrap(), Some("run.txt"));
        assert_eq!(settings.str("cache-expires-units").unwrap(), Some("days"));
    }

    #[test]
    fn periodic_defaults_override_base() {
        let mut all = base_settings();
        all.extend(periodic_settings());
        let settings = SettingsBuilder::new(all)
            .layer("run", layer(&[("start-period", json!("2010-01"))]))
            .build()
            .unwrap();
        assert_eq!(
            settings.str_list("no-hash-settings").unwrap(),
            vec!["start-period".to_string(), "end-period".to_string()]
        );
    }

    #[test]
    fn unknown_keys_are_rejected() {
        let err = SettingsBuilder::new(specs())
            .layer("run", layer(&[("datafile", json!("x"))]))
            .build()
            .unwrap_err();
        assert!(err.to_string().contains("datafile"));
        assert!(err.is_user_error());
    }

    #[test]
    fn missing_required_setting() {
        let mut all = base_settings();
        all.extend(periodic_settings());
        let err = SettingsBuilder::new(all).build().unwrap_err();
        assert!(err.to_string().contains("start-period"));
    }

    #[test]
    fn alias_chain_resolves_root_first() {
        let mut aliases = BTreeMap::new();
        aliases.insert(
            "a".to_string(),
            AliasDef {
                plugin: Some("demo".to_string()),
                parent: None,
                settings: layer(&[("data-file", json!("a.txt"))]),
            },
        );
        aliases.insert(
            "b".to_string(),
            AliasDef {
                plugin: None,
                parent: Some("a".to_string()),
                settings: layer(&[("data-file", json!("b.txt"))]),
            },
        );

        let resolved = resolve_alias_chain("b", &aliases, |p| p == "demo").unwrap();
        assert_eq!(resolved.plugin, "demo");
        let mut builder = SettingsBuilder::new(specs());
        for (label, l) in resolved.layers {
            builder = builder.layer(label, l);
        }
        let settings = builder.build().unwrap();
        assert_eq!(settings.str("data-file").unwrap(), Some("b.txt"));
    }

    #[test]
    fn cyclic_alias_chain_is_detected() {
        let mut aliases = BTreeMap::new();
        for (name, parent) in [("a", "b"), ("b", "c"), ("c", "a")] {
            aliases.insert(
                name.to_string(),
                AliasDef {
                    plugin: None,
                    parent: Some(parent.to_string()),
                    settings: SettingsLayer::new(),
                },
            );
        }
        let err = resolve_alias_chain("a", &aliases, |_| false).unwrap_err();
        assert!(err.to_string().contains("a -> b -> c -> a"), "{}", err);
    }

    #[test]
    fn builtin_name_resolves_without_alias() {
        let resolved = resolve_alias_chain("demo", &BTreeMap::new(), |p| p == "demo").unwrap();
        assert_eq!(resolved.plugin, "demo");
        assert!(resolved.layers.is_empty());
    }

    #[test]
    fn month_parsing() {
        let settings = PluginSettings::default().with("start-period", json!("2014-03"));
        assert_eq!(
            settings.month("start-period").unwrap(),
            NaiveDate::from_ymd_opt(2014, 3, 1)
        );
        let bad = PluginSettings::default().with("start-period", json!("March"));
        assert!(bad.month("start-period").is_err());
    }
}

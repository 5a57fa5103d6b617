//! Template name and key tuple filters.
//!
//! ```yaml
//! template_filter: { mode: exclude, names: [relations] }
//! key_filter:
//!   mode: include
//!   keys: [srv1, [srv2, eth0]]
//! ```
//!
//! A key is a scalar for single-column keys or a sequence for key tuples.
//! Keys are compared by their text rendering.

use serde::{Deserialize, Serialize};
use sync_core::Value;

/// Whether a filter list selects or rejects its entries.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FilterMode {
    #[default]
    Include,
    Exclude,
}

impl FilterMode {
    fn allows(self, listed: bool) -> bool {
        match self {
            Self::Include => listed,
            Self::Exclude => !listed,
        }
    }
}

/// Include/exclude list of template names.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct NameFilter {
    #[serde(default)]
    pub mode: FilterMode,
    pub names: Vec<String>,
}

impl NameFilter {
    pub fn new(mode: FilterMode, names: Vec<String>) -> Self {
        Self { mode, names }
    }

    pub fn allows(&self, name: &str) -> bool {
        self.mode.allows(self.names.iter().any(|n| n == name))
    }
}

#[derive(Deserialize)]
#[serde(untagged)]
enum Scalar {
    Int(i64),
    Float(f64),
    Text(String),
}

impl From<Scalar> for String {
    fn from(s: Scalar) -> Self {
        match s {
            Scalar::Int(i) => i.to_string(),
            Scalar::Float(f) => f.to_string(),
            Scalar::Text(t) => t,
        }
    }
}

#[derive(Deserialize)]
#[serde(untagged)]
enum RawKey {
    One(Scalar),
    Tuple(Vec<Scalar>),
}

/// One key tuple of a key filter, in text form.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(from = "RawKey", into = "Vec<String>")]
pub struct KeyTuple(Vec<String>);

impl From<RawKey> for KeyTuple {
    fn from(raw: RawKey) -> Self {
        match raw {
            RawKey::One(s) => Self(vec![s.into()]),
            RawKey::Tuple(parts) => Self(parts.into_iter().map(String::from).collect()),
        }
    }
}

impl From<KeyTuple> for Vec<String> {
    fn from(key: KeyTuple) -> Self {
        key.0
    }
}

impl KeyTuple {
    pub fn new(parts: Vec<String>) -> Self {
        Self(parts)
    }

    /// Parse a command-line key, `,` separating the columns of a tuple.
    pub fn parse(arg: &str) -> Self {
        Self(arg.split(',').map(|p| p.trim().to_string()).collect())
    }

    pub fn matches(&self, key: &[Value]) -> bool {
        self.0.len() == key.len() && self.0.iter().zip(key).all(|(p, v)| *p == v.to_string())
    }
}

/// Include/exclude list of key tuples.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct KeyFilter {
    #[serde(default)]
    pub mode: FilterMode,
    pub keys: Vec<KeyTuple>,
}

impl KeyFilter {
    pub fn new(mode: FilterMode, keys: Vec<KeyTuple>) -> Self {
        Self { mode, keys }
    }

    pub fn allows(&self, key: &[Value]) -> bool {
        self.mode.allows(self.keys.iter().any(|k| k.matches(key)))
    }
}

/// The global and the per-template key filter of one template.
///
/// A key passes only if both filters allow it, so an exclusion in either
/// filter wins over an inclusion in the other.
#[derive(Debug, Clone, Copy, Default)]
pub struct KeyFilters<'a> {
    pub global: Option<&'a KeyFilter>,
    pub template: Option<&'a KeyFilter>,
}

impl KeyFilters<'_> {
    pub fn allows(&self, key: &[Value]) -> bool {
        self.global.map_or(true, |f| f.allows(key)) && self.template.map_or(true, |f| f.allows(key))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn key(parts: &[&str]) -> Vec<Value> {
        parts.iter().map(|p| Value::from(*p)).collect()
    }

    #[test]
    fn test_name_filter() {
        let include = NameFilter::new(FilterMode::Include, vec!["servers".into()]);
        assert!(include.allows("servers"));
        assert!(!include.allows("relations"));
        let exclude = NameFilter::new(FilterMode::Exclude, vec!["servers".into()]);
        assert!(!exclude.allows("servers"));
        assert!(exclude.allows("relations"));
    }

    #[test]
    fn test_key_filter_from_yaml() {
        let filter: KeyFilter = serde_yaml::from_str("mode: include\nkeys: [srv1, 42, [srv2, eth0]]").unwrap();
        assert!(filter.allows(&key(&["srv1"])));
        assert!(filter.allows(&[Value::Int(42)]));
        assert!(filter.allows(&key(&["srv2", "eth0"])));
        assert!(!filter.allows(&key(&["srv2"])));
        assert!(!filter.allows(&key(&["srv3"])));
    }

    #[test]
    fn test_exclude_wins() {
        let global = KeyFilter::new(FilterMode::Include, vec![KeyTuple::parse("K1")]);
        let template = KeyFilter::new(FilterMode::Exclude, vec![KeyTuple::parse("K1")]);
        let filters = KeyFilters {
            global: Some(&global),
            template: Some(&template),
        };
        assert!(!filters.allows(&key(&["K1"])));
        assert!(!filters.allows(&key(&["K2"])));
        assert!(KeyFilters::default().allows(&key(&["K2"])));
    }

    #[test]
    fn test_parse_cli_tuple() {
        assert_eq!(
            KeyTuple::parse("srv2, eth0"),
            KeyTuple::new(vec!["srv2".into(), "eth0".into()])
        );
    }
}

//! Identifier links, cv-entries and cv-chains.
//!
//! A cv-chain is an ordered list of `(link, data type, optional value)`
//! entries describing either the key or the value portion of a mapped entity.
//!
//! # YAML Format
//!
//! A cv-entry is a sequence of two or three elements:
//!
//! ```yaml
//! key:
//!   - [{ kind: node, bundle: server, id: title }, string]
//! value:
//!   - [{ kind: field, name: field_ram }, decimal]
//!   - [{ kind: field, name: field_os }, "term:os", linux]
//! ```

use crate::types::DataType;
use crate::values::Value;
use serde::de::{self, SeqAccess, Visitor};
use serde::ser::SerializeSeq;
use serde::{Deserialize, Deserializer, Serialize, Serializer};
use std::fmt;
use std::ops::Deref;

/// How a node is addressed by its key column.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum NodeId {
    /// Numeric node id
    #[default]
    #[serde(rename = "id")]
    ById,
    /// Node title
    #[serde(rename = "title")]
    ByTitle,
}

/// How a collection item is addressed by its key column.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum CollectionId {
    /// Numeric item id
    #[default]
    #[serde(rename = "id")]
    ById,
    /// Value of the item's label field
    #[serde(rename = "label")]
    ByLabel,
}

/// One identifier link of a chain.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum Link {
    /// A node of the given bundle
    Node {
        bundle: String,
        #[serde(default)]
        id: NodeId,
    },

    /// A field-collection item hosted by `field` on the preceding entity
    Collection {
        field: String,
        #[serde(default)]
        id: CollectionId,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        label_field: Option<String>,
    },

    /// A typed relation starting at the preceding node
    Relation {
        #[serde(rename = "type")]
        relation_type: String,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        field: Option<String>,
    },

    /// A field on the preceding entity
    Field { name: String },

    /// The title of the preceding node
    Title,

    /// The label of the preceding collection item
    Label,

    /// A plain column (generic backend)
    Column { name: String },
}

impl Link {
    /// Short kind name used in diagnostics.
    pub fn kind(&self) -> &'static str {
        match self {
            Self::Node { .. } => "node",
            Self::Collection { .. } => "collection",
            Self::Relation { .. } => "relation",
            Self::Field { .. } => "field",
            Self::Title => "title",
            Self::Label => "label",
            Self::Column { .. } => "column",
        }
    }

    /// Check if this link names a value stored on the preceding entity.
    pub fn is_field_like(&self) -> bool {
        matches!(self, Self::Field { .. } | Self::Title | Self::Label)
    }
}

impl fmt::Display for Link {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Node { bundle, id } => write!(f, "node[{bundle}, {id:?}]"),
            Self::Collection { field, id, .. } => write!(f, "collection[{field}, {id:?}]"),
            Self::Relation {
                relation_type,
                field: Some(field),
            } => write!(f, "relation[{relation_type}, {field}]"),
            Self::Relation { relation_type, .. } => write!(f, "relation[{relation_type}]"),
            Self::Field { name } => write!(f, "field[{name}]"),
            Self::Title => f.write_str("title"),
            Self::Label => f.write_str("label"),
            Self::Column { name } => write!(f, "column[{name}]"),
        }
    }
}

/// A `(link, data type, optional value)` tuple.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct CvEntry {
    pub link: Link,
    pub data_type: DataType,
    /// Bound value; `Some(Value::Null)` is a bound null
    pub value: Option<Value>,
}

impl CvEntry {
    /// Create an open entry.
    pub fn new(link: Link, data_type: DataType) -> Self {
        Self {
            link,
            data_type,
            value: None,
        }
    }

    /// Create an entry with a bound value.
    pub fn bound(link: Link, data_type: DataType, value: Value) -> Self {
        Self {
            link,
            data_type,
            value: Some(value),
        }
    }

    /// Copy of this entry with `value` bound.
    pub fn with_value(&self, value: Value) -> Self {
        Self::bound(self.link.clone(), self.data_type.clone(), value)
    }

    /// The bound value, or `Null` when the entry is open.
    pub fn value_or_null(&self) -> &Value {
        const NULL: &Value = &Value::Null;
        self.value.as_ref().unwrap_or(NULL)
    }
}

impl Serialize for CvEntry {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        let len = if self.value.is_some() { 3 } else { 2 };
        let mut seq = serializer.serialize_seq(Some(len))?;
        seq.serialize_element(&self.link)?;
        seq.serialize_element(&self.data_type)?;
        if let Some(value) = &self.value {
            seq.serialize_element(value)?;
        }
        seq.end()
    }
}

struct CvEntryVisitor;

impl<'de> Visitor<'de> for CvEntryVisitor {
    type Value = CvEntry;

    fn expecting(&self, f: &mut fmt::Formatter) -> fmt::Result {
        f.write_str("a cv-entry of 2 or 3 elements: [link, type] or [link, type, value]")
    }

    fn visit_seq<A: SeqAccess<'de>>(self, mut seq: A) -> Result<CvEntry, A::Error> {
        let link: Link = seq
            .next_element()?
            .ok_or_else(|| de::Error::invalid_length(0, &self))?;
        let data_type: DataType = seq
            .next_element()?
            .ok_or_else(|| de::Error::invalid_length(1, &self))?;
        let value: Option<Value> = seq.next_element()?;
        if seq.next_element::<de::IgnoredAny>()?.is_some() {
            return Err(de::Error::invalid_length(4, &self));
        }
        Ok(CvEntry {
            link,
            data_type,
            value,
        })
    }
}

impl<'de> Deserialize<'de> for CvEntry {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        deserializer.deserialize_seq(CvEntryVisitor)
    }
}

/// An ordered list of cv-entries.
#[derive(Debug, Clone, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct CvChain(Vec<CvEntry>);

impl CvChain {
    pub fn new(entries: Vec<CvEntry>) -> Self {
        Self(entries)
    }

    /// Links of the chain, in order.
    pub fn links(&self) -> Vec<&Link> {
        self.0.iter().map(|e| &e.link).collect()
    }

    /// Copy of this chain with `values` bound positionally.
    ///
    /// Entries beyond the end of `values` keep their current binding.
    pub fn bind(&self, values: &[Value]) -> Self {
        Self(
            self.0
                .iter()
                .enumerate()
                .map(|(i, entry)| match values.get(i) {
                    Some(v) => entry.with_value(v.clone()),
                    None => entry.clone(),
                })
                .collect(),
        )
    }

    /// Single-entry chain made of entry `index` bound to `value`.
    pub fn single(&self, index: usize, value: Value) -> Option<Self> {
        self.0
            .get(index)
            .map(|entry| Self(vec![entry.with_value(value)]))
    }

    /// Bound values, `Null` for open entries.
    pub fn values(&self) -> Vec<Value> {
        self.0.iter().map(|e| e.value_or_null().clone()).collect()
    }

    pub fn into_inner(self) -> Vec<CvEntry> {
        self.0
    }
}

impl Deref for CvChain {
    type Target = [CvEntry];

    fn deref(&self) -> &Self::Target {
        &self.0
    }
}

impl From<Vec<CvEntry>> for CvChain {
    fn from(entries: Vec<CvEntry>) -> Self {
        Self(entries)
    }
}

impl fmt::Display for CvChain {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let parts: Vec<String> = self
            .0
            .iter()
            .map(|e| match &e.value {
                Some(v) => format!("{}:{}={}", e.link, e.data_type, v),
                None => format!("{}:{}", e.link, e.data_type),
            })
            .collect();
        write!(f, "[{}]", parts.join(", "))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_cv_entry_from_yaml() {
        let entry: CvEntry =
            serde_yaml::from_str("[{ kind: node, bundle: server, id: title }, string]").unwrap();
        assert_eq!(
            entry.link,
            Link::Node {
                bundle: "server".into(),
                id: NodeId::ByTitle
            }
        );
        assert_eq!(entry.data_type, DataType::String);
        assert_eq!(entry.value, None);

        let entry: CvEntry =
            serde_yaml::from_str("[{ kind: field, name: field_os }, 'term:os', linux]").unwrap();
        assert_eq!(entry.value, Some(Value::Text("linux".into())));

        let entry: CvEntry = serde_yaml::from_str("[{ kind: title }, string, null]").unwrap();
        assert_eq!(entry.value, Some(Value::Null));
    }

    #[test]
    fn test_cv_entry_length_is_validated() {
        assert!(serde_yaml::from_str::<CvEntry>("[{ kind: title }]").is_err());
        assert!(serde_yaml::from_str::<CvEntry>("[{ kind: title }, string, a, b]").is_err());
    }

    #[test]
    fn test_link_defaults() {
        let link: Link = serde_yaml::from_str("{ kind: node, bundle: server }").unwrap();
        assert_eq!(
            link,
            Link::Node {
                bundle: "server".into(),
                id: NodeId::ById
            }
        );

        let link: Link =
            serde_yaml::from_str("{ kind: relation, type: connected_to, field: field_port }")
                .unwrap();
        assert_eq!(
            link,
            Link::Relation {
                relation_type: "connected_to".into(),
                field: Some("field_port".into())
            }
        );
    }

    #[test]
    fn test_chain_bind_and_single() {
        let chain = CvChain::new(vec![
            CvEntry::new(Link::Column { name: "a".into() }, DataType::String),
            CvEntry::new(Link::Column { name: "b".into() }, DataType::Integer),
        ]);
        let bound = chain.bind(&[Value::from("x")]);
        assert_eq!(bound[0].value, Some(Value::from("x")));
        assert_eq!(bound[1].value, None);
        assert_eq!(bound.values(), vec![Value::from("x"), Value::Null]);

        let single = chain.single(1, Value::Int(5)).unwrap();
        assert_eq!(single.len(), 1);
        assert_eq!(single[0].link, Link::Column { name: "b".into() });
        assert!(chain.single(2, Value::Null).is_none());
    }
}

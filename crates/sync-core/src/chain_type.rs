//! Chain-type resolution.
//!
//! The structured backend supports a fixed set of (key, value) link shapes.
//! `ChainType::resolve` classifies a pair of chains into one of them, in a
//! fixed priority order. Resolution is pure: it only looks at link kinds.

use crate::chain::{CollectionId, CvChain, Link};
use serde::{Deserialize, Serialize};
use std::fmt;

/// Error raised for a chain shape no backend can serve.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ChainError {
    /// The (key, value) shape is not one of the supported chain types
    #[error("Unsupported chain shape: key [{key}], value [{value}]")]
    Unsupported { key: String, value: String },

    /// The value chain has no entries
    #[error("Value chain is empty")]
    EmptyValueChain,

    /// A collection addressed by label has no label field
    #[error("Collection '{0}' is addressed by label but declares no label_field")]
    MissingLabelField(String),

    /// A label link follows a collection without a label field
    #[error("Label link on collection '{0}' which declares no label_field")]
    LabelWithoutField(String),

    /// A generic chain contains a non-column link
    #[error("Generic backend only supports column links, found {0}")]
    NotAColumn(String),
}

/// Supported shapes of the structured backend.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ChainType {
    /// key = [Node]; value = fields (or title) of the node
    NodeToFields,
    /// key = [Node, Relation]; value = [Node] at the other end
    NodeToRelationToNode,
    /// key = [Node, Relation, Node]; value = fields of the relation
    NodeRelationNodeToRelationFields,
    /// key = [Node, Collection]; value = fields (or label) of the item
    NodeToCollectionToFields,
}

impl ChainType {
    /// Resolve the chain type of a (key, value) pair.
    pub fn resolve(key: &CvChain, value: &CvChain) -> Result<Self, ChainError> {
        Self::classify(&key.links(), &value.links())
    }

    /// Classify link lists into a chain type.
    pub fn classify(key: &[&Link], value: &[&Link]) -> Result<Self, ChainError> {
        if value.is_empty() {
            return Err(ChainError::EmptyValueChain);
        }

        let unsupported = || ChainError::Unsupported {
            key: describe(key),
            value: describe(value),
        };
        let all_fields = value.iter().all(|l| matches!(l, Link::Field { .. }));

        match key {
            [Link::Node { .. }] => {
                if value.iter().all(|l| matches!(l, Link::Field { .. } | Link::Title)) {
                    Ok(Self::NodeToFields)
                } else {
                    Err(unsupported())
                }
            }
            [Link::Node { .. }, Link::Relation { .. }] => match value {
                [Link::Node { .. }] => Ok(Self::NodeToRelationToNode),
                _ => Err(unsupported()),
            },
            [Link::Node { .. }, Link::Relation { .. }, Link::Node { .. }] if all_fields => {
                Ok(Self::NodeRelationNodeToRelationFields)
            }
            [Link::Node { .. }, Link::Collection {
                field,
                id,
                label_field,
            }] => {
                if *id == CollectionId::ByLabel && label_field.is_none() {
                    return Err(ChainError::MissingLabelField(field.clone()));
                }
                if !value.iter().all(|l| matches!(l, Link::Field { .. } | Link::Label)) {
                    return Err(unsupported());
                }
                if label_field.is_none() && value.iter().any(|l| matches!(l, Link::Label)) {
                    return Err(ChainError::LabelWithoutField(field.clone()));
                }
                Ok(Self::NodeToCollectionToFields)
            }
            _ => Err(unsupported()),
        }
    }

    /// Number of key columns of this shape.
    pub fn key_len(&self) -> usize {
        match self {
            Self::NodeToFields => 1,
            Self::NodeToRelationToNode | Self::NodeToCollectionToFields => 2,
            Self::NodeRelationNodeToRelationFields => 3,
        }
    }
}

impl fmt::Display for ChainType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::NodeToFields => "node_to_fields",
            Self::NodeToRelationToNode => "node_to_relation_to_node",
            Self::NodeRelationNodeToRelationFields => "node_relation_node_to_relation_fields",
            Self::NodeToCollectionToFields => "node_to_collection_to_fields",
        };
        f.write_str(name)
    }
}

/// Check that every link of a chain is a plain column.
pub fn ensure_columns(chain: &CvChain) -> Result<(), ChainError> {
    match chain.iter().find(|e| !matches!(e.link, Link::Column { .. })) {
        Some(entry) => Err(ChainError::NotAColumn(entry.link.to_string())),
        None => Ok(()),
    }
}

fn describe(links: &[&Link]) -> String {
    links.iter().map(|l| l.kind()).collect::<Vec<_>>().join(", ")
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::chain::{CvEntry, NodeId};
    use crate::types::DataType;

    fn node() -> Link {
        Link::Node {
            bundle: "server".into(),
            id: NodeId::ByTitle,
        }
    }

    fn relation() -> Link {
        Link::Relation {
            relation_type: "hosted_on".into(),
            field: None,
        }
    }

    fn field(name: &str) -> Link {
        Link::Field { name: name.into() }
    }

    fn collection(id: CollectionId, label_field: Option<&str>) -> Link {
        Link::Collection {
            field: "field_disks".into(),
            id,
            label_field: label_field.map(String::from),
        }
    }

    #[test]
    fn test_supported_shapes() {
        assert_eq!(
            ChainType::classify(&[&node()], &[&field("a"), &Link::Title]),
            Ok(ChainType::NodeToFields)
        );
        assert_eq!(
            ChainType::classify(&[&node(), &relation()], &[&node()]),
            Ok(ChainType::NodeToRelationToNode)
        );
        assert_eq!(
            ChainType::classify(&[&node(), &relation(), &node()], &[&field("a")]),
            Ok(ChainType::NodeRelationNodeToRelationFields)
        );
        assert_eq!(
            ChainType::classify(
                &[&node(), &collection(CollectionId::ByLabel, Some("field_label"))],
                &[&field("a"), &Link::Label]
            ),
            Ok(ChainType::NodeToCollectionToFields)
        );
    }

    #[test]
    fn test_unsupported_shapes() {
        // Relation/Node in the value chain needs a key ending in a relation
        assert!(matches!(
            ChainType::classify(&[&node()], &[&node()]),
            Err(ChainError::Unsupported { .. })
        ));
        assert!(matches!(
            ChainType::classify(&[&node(), &relation()], &[&field("a")]),
            Err(ChainError::Unsupported { .. })
        ));
        assert!(matches!(
            ChainType::classify(&[&relation()], &[&field("a")]),
            Err(ChainError::Unsupported { .. })
        ));
        assert!(matches!(
            ChainType::classify(&[&node(), &relation(), &node()], &[&Link::Title]),
            Err(ChainError::Unsupported { .. })
        ));
        assert_eq!(
            ChainType::classify(&[&node()], &[]),
            Err(ChainError::EmptyValueChain)
        );
    }

    #[test]
    fn test_collection_label_requirements() {
        assert_eq!(
            ChainType::classify(
                &[&node(), &collection(CollectionId::ByLabel, None)],
                &[&field("a")]
            ),
            Err(ChainError::MissingLabelField("field_disks".into()))
        );
        assert_eq!(
            ChainType::classify(
                &[&node(), &collection(CollectionId::ById, None)],
                &[&Link::Label]
            ),
            Err(ChainError::LabelWithoutField("field_disks".into()))
        );
    }

    #[test]
    fn test_resolution_is_deterministic() {
        let key = CvChain::new(vec![CvEntry::new(node(), DataType::String)]);
        let value = CvChain::new(vec![CvEntry::new(field("a"), DataType::Integer)]);
        let first = ChainType::resolve(&key, &value);
        for _ in 0..3 {
            assert_eq!(ChainType::resolve(&key, &value), first);
        }
        assert_eq!(ChainType::NodeToFields.key_len(), key.len());
    }

    #[test]
    fn test_ensure_columns() {
        let ok = CvChain::new(vec![CvEntry::new(
            Link::Column { name: "tag".into() },
            DataType::String,
        )]);
        assert!(ensure_columns(&ok).is_ok());

        let bad = CvChain::new(vec![CvEntry::new(Link::Title, DataType::String)]);
        assert_eq!(
            ensure_columns(&bad),
            Err(ChainError::NotAColumn("title".into()))
        );
    }
}

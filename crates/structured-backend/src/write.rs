//! Single-column writes per chain type.
//!
//! Each function runs on a connection that is already inside the write
//! transaction. Data-resolution problems are logged and returned as
//! [`WriteOutcome::Failure`]; only I/O errors and invariant violations are
//! returned as `Err`.

use crate::entity::{
    create_item, create_node, create_relation, delete_item, delete_node, delete_relation,
    find_item, find_node, find_relations, republish_node, retarget_relation, set_node_title,
    Lookup, NodeRef, RelationKey, RelationRef,
};
use crate::field::{capacity, delete_values, insert_value, storage_cells, update_value, Capacity};
use crate::schema::Entity;
use crate::StructuredBackend;
use std::fmt::Display;
use sync_core::{ChainType, CollectionId, CvEntry, Link, NodeId, Value};
use sync_sql::{BackendError, Connection, DeleteScope, WriteOutcome};
use tracing::{debug, warn};

/// A lookup after logging ambiguity and unusable keys.
enum Resolved<T> {
    Found(T),
    Missing,
    Failed,
}

fn resolved<T>(lookup: Lookup<T>, what: impl Display) -> Resolved<T> {
    match lookup {
        Lookup::Found(found) => Resolved::Found(found),
        Lookup::Missing => Resolved::Missing,
        Lookup::Ambiguous(count) => {
            warn!("{count} entities match {what}, expected at most one");
            Resolved::Failed
        }
    }
}

fn mismatch(entry: &CvEntry, expected: &str) -> BackendError {
    BackendError::Invariant(format!("expected a {expected} link, got {}", entry.link))
}

/// The bound, non-null value of a key entry.
fn key_value(entry: &CvEntry) -> Option<&Value> {
    let value = entry.value.as_ref().filter(|v| !v.is_null());
    if value.is_none() {
        warn!("No value bound for key {}", entry.link);
    }
    value
}

/// Created or republished containers turn a failed leaf into a partial success.
fn with_created(created: bool, leaf: WriteOutcome) -> WriteOutcome {
    match leaf {
        WriteOutcome::Failure if created => {
            warn!("Container created but its value could not be written");
            WriteOutcome::PartialSuccess
        }
        other => other,
    }
}

/// The value carried by a leaf entry: a field, a node title or an item label.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Leaf<'a> {
    Field(&'a str),
    Title,
}

fn leaf<'a>(entry: &'a CvEntry, label_field: Option<&'a str>) -> Result<Leaf<'a>, BackendError> {
    match (&entry.link, label_field) {
        (Link::Field { name }, _) => Ok(Leaf::Field(name)),
        (Link::Title, _) => Ok(Leaf::Title),
        (Link::Label, Some(label)) => Ok(Leaf::Field(label)),
        _ => Err(mismatch(entry, "field")),
    }
}

impl StructuredBackend {
    async fn node(
        &self,
        conn: &mut dyn Connection,
        entry: &CvEntry,
        include_unpublished: bool,
    ) -> Result<Resolved<NodeRef>, BackendError> {
        let Link::Node { bundle, id } = &entry.link else {
            return Err(mismatch(entry, "node"));
        };
        let Some(key) = key_value(entry) else {
            return Ok(Resolved::Failed);
        };
        let lookup = find_node(conn, bundle, *id, key).await?;
        Ok(match resolved(lookup, format!("{} = {key}", entry.link)) {
            Resolved::Found(node) if !node.published && !include_unpublished => Resolved::Missing,
            other => other,
        })
    }

    /// The node of `entry`, creating it by title or republishing it.
    async fn node_for_insert(
        &self,
        conn: &mut dyn Connection,
        entry: &CvEntry,
        skip_default: Option<&str>,
    ) -> Result<Option<(NodeRef, bool)>, BackendError> {
        let Link::Node { bundle, id } = &entry.link else {
            return Err(mismatch(entry, "node"));
        };
        match self.node(conn, entry, true).await? {
            Resolved::Found(node) => {
                let republished = !node.published;
                if republished {
                    republish_node(conn, &node).await?;
                }
                Ok(Some((node, republished)))
            }
            Resolved::Failed => Ok(None),
            Resolved::Missing => match (id, entry.value_or_null()) {
                (NodeId::ByTitle, Value::Text(title)) => {
                    let node = create_node(
                        conn,
                        bundle,
                        title,
                        self.options.author_uid,
                        &self.options.defaults,
                        skip_default,
                    )
                    .await?;
                    Ok(Some((node, true)))
                }
                (_, key) => {
                    warn!("No {bundle} node {key}, and nodes can only be created by title");
                    Ok(None)
                }
            },
        }
    }

    /// A node that must already exist, such as the far end of a relation.
    async fn existing_node(
        &self,
        conn: &mut dyn Connection,
        entry: &CvEntry,
    ) -> Result<Option<NodeRef>, BackendError> {
        match self.node(conn, entry, false).await? {
            Resolved::Found(node) => Ok(Some(node)),
            Resolved::Missing => {
                warn!("Node {} = {} does not exist", entry.link, entry.value_or_null());
                Ok(None)
            }
            Resolved::Failed => Ok(None),
        }
    }

    async fn update_field(
        &self,
        conn: &mut dyn Connection,
        entity: &Entity,
        field: &str,
        entry: &CvEntry,
    ) -> Result<Option<WriteOutcome>, BackendError> {
        let value = entry.value_or_null();
        let Some(cells) = storage_cells(conn, field, &entry.data_type, value).await? else {
            return Ok(Some(WriteOutcome::Failure));
        };
        match update_value(conn, field, entity, &cells).await? {
            0 => Ok(None),
            _ => Ok(Some(WriteOutcome::Success)),
        }
    }

    async fn insert_field(
        &self,
        conn: &mut dyn Connection,
        entity: &Entity,
        field: &str,
        entry: &CvEntry,
    ) -> Result<WriteOutcome, BackendError> {
        let value = entry.value_or_null();
        let Some(cells) = storage_cells(conn, field, &entry.data_type, value).await? else {
            return Ok(WriteOutcome::Failure);
        };
        match capacity(conn, field, entity).await? {
            Capacity::Next(delta) => {
                insert_value(conn, field, entity, delta, &cells).await?;
                Ok(WriteOutcome::Success)
            }
            Capacity::Full(cardinality) => {
                warn!("{field} on {entity} already holds {cardinality} values, not adding {value}");
                Ok(WriteOutcome::Failure)
            }
            Capacity::Unconfigured => {
                warn!("Field {field} is not configured, cannot write it on {entity}");
                Ok(WriteOutcome::Failure)
            }
        }
    }

    async fn delete_field(
        &self,
        conn: &mut dyn Connection,
        entity: &Entity,
        field: &str,
        entry: &CvEntry,
    ) -> Result<WriteOutcome, BackendError> {
        let matching = match entry.value.as_ref().filter(|v| !v.is_null()) {
            Some(value) => match storage_cells(conn, field, &entry.data_type, value).await? {
                Some(cells) => cells.into_iter().next(),
                None => return Ok(WriteOutcome::Failure),
            },
            None => None,
        };
        match delete_values(conn, field, entity, matching.as_ref(), self.policy).await? {
            0 => {
                debug!("Nothing to delete in {field} on {entity}");
                Ok(WriteOutcome::Failure)
            }
            _ => Ok(WriteOutcome::Success),
        }
    }

    /// Update one value; `None` means nothing matched and the caller inserts.
    pub(crate) async fn update_in(
        &self,
        conn: &mut dyn Connection,
        chain_type: ChainType,
        key: &[CvEntry],
        entry: &CvEntry,
    ) -> Result<Option<WriteOutcome>, BackendError> {
        let node = match self.node(conn, &key[0], false).await? {
            Resolved::Found(node) => node,
            Resolved::Missing => return Ok(None),
            Resolved::Failed => return Ok(Some(WriteOutcome::Failure)),
        };
        let bundle = node_bundle(&key[0])?;

        match chain_type {
            ChainType::NodeToFields => match leaf(entry, None)? {
                Leaf::Title => match set_node_title(conn, &node, entry.value_or_null()).await? {
                    0 => Ok(None),
                    _ => Ok(Some(WriteOutcome::Success)),
                },
                Leaf::Field(field) => {
                    self.update_field(conn, &node.entity(bundle), field, entry)
                        .await
                }
            },
            ChainType::NodeToCollectionToFields => {
                let (host_field, id, label_field) = collection(&key[1])?;
                let host = node.entity(bundle);
                let Some(item_key) = key_value(&key[1]) else {
                    return Ok(Some(WriteOutcome::Failure));
                };
                let lookup = find_item(conn, &host, host_field, id, label_field, item_key).await?;
                let item = match resolved(lookup, format!("{host_field} {item_key} on {host}")) {
                    Resolved::Found(item) => item,
                    Resolved::Missing => return Ok(None),
                    Resolved::Failed => return Ok(Some(WriteOutcome::Failure)),
                };
                let Leaf::Field(field) = leaf(entry, label_field)? else {
                    return Err(mismatch(entry, "field"));
                };
                self.update_field(conn, &item.entity(host_field), field, entry)
                    .await
            }
            ChainType::NodeToRelationToNode => {
                let Some(target) = self.existing_node(conn, entry).await? else {
                    return Ok(Some(WriteOutcome::Failure));
                };
                let relation_key = relation_key(&key[1], node.nid, None)?;
                let found = find_relations(conn, &relation_key).await?;
                let relation = match resolved(Lookup::from_vec(found), &key[1].link) {
                    Resolved::Found(relation) => relation,
                    Resolved::Missing => return Ok(None),
                    Resolved::Failed => return Ok(Some(WriteOutcome::Failure)),
                };
                match retarget_relation(conn, &relation, target.nid).await? {
                    0 => Ok(None),
                    _ => Ok(Some(WriteOutcome::Success)),
                }
            }
            ChainType::NodeRelationNodeToRelationFields => {
                let far = match self.node(conn, &key[2], false).await? {
                    Resolved::Found(far) => far,
                    Resolved::Missing => return Ok(None),
                    Resolved::Failed => return Ok(Some(WriteOutcome::Failure)),
                };
                let relation_key = relation_key(&key[1], node.nid, Some(far.nid))?;
                let found = find_relations(conn, &relation_key).await?;
                let relation = match resolved(Lookup::from_vec(found), &key[1].link) {
                    Resolved::Found(relation) => relation,
                    Resolved::Missing => return Ok(None),
                    Resolved::Failed => return Ok(Some(WriteOutcome::Failure)),
                };
                let Leaf::Field(field) = leaf(entry, None)? else {
                    return Err(mismatch(entry, "field"));
                };
                let entity = relation.entity(relation_key.relation_type);
                self.update_field(conn, &entity, field, entry).await
            }
        }
    }

    /// Insert one value, creating missing containers.
    pub(crate) async fn insert_in(
        &self,
        conn: &mut dyn Connection,
        chain_type: ChainType,
        key: &[CvEntry],
        entry: &CvEntry,
    ) -> Result<WriteOutcome, BackendError> {
        let skip_default = match &entry.link {
            Link::Field { name } => Some(name.as_str()),
            _ => None,
        };
        let bundle = node_bundle(&key[0])?;

        match chain_type {
            ChainType::NodeToFields => {
                let Some((node, created)) = self.node_for_insert(conn, &key[0], skip_default).await?
                else {
                    return Ok(WriteOutcome::Failure);
                };
                let outcome = match leaf(entry, None)? {
                    Leaf::Title if created => WriteOutcome::Success,
                    Leaf::Title => match set_node_title(conn, &node, entry.value_or_null()).await? {
                        0 => WriteOutcome::Failure,
                        _ => WriteOutcome::Success,
                    },
                    Leaf::Field(field) => {
                        self.insert_field(conn, &node.entity(bundle), field, entry)
                            .await?
                    }
                };
                Ok(with_created(created, outcome))
            }
            ChainType::NodeToCollectionToFields => {
                let Some((node, node_created)) = self.node_for_insert(conn, &key[0], None).await?
                else {
                    return Ok(WriteOutcome::Failure);
                };
                let (host_field, id, label_field) = collection(&key[1])?;
                let host = node.entity(bundle);
                let Some(item_key) = key_value(&key[1]) else {
                    return Ok(with_created(node_created, WriteOutcome::Failure));
                };
                let leaf = leaf(entry, label_field)?;
                let lookup = find_item(conn, &host, host_field, id, label_field, item_key).await?;
                let (item, item_created) = match resolved(
                    lookup,
                    format!("{host_field} {item_key} on {host}"),
                ) {
                    Resolved::Found(item) => (item, false),
                    Resolved::Failed => return Ok(with_created(node_created, WriteOutcome::Failure)),
                    Resolved::Missing => {
                        let label = match (id, label_field) {
                            (CollectionId::ByLabel, Some(label)) => Some((label, item_key)),
                            _ => {
                                warn!("No {host_field} item {item_key} on {host}, and items can only be created by label");
                                return Ok(with_created(node_created, WriteOutcome::Failure));
                            }
                        };
                        let skip = match leaf {
                            Leaf::Field(field) => Some(field),
                            Leaf::Title => None,
                        };
                        let created = create_item(
                            conn,
                            &host,
                            host_field,
                            label,
                            &self.options.defaults,
                            skip,
                        )
                        .await?;
                        match created {
                            Some(item) => (item, true),
                            None => return Ok(with_created(node_created, WriteOutcome::Failure)),
                        }
                    }
                };
                let outcome = match leaf {
                    // The label is written when the item is created
                    Leaf::Field(field) if item_created && Some(field) == label_field => {
                        WriteOutcome::Success
                    }
                    Leaf::Field(field) => {
                        self.insert_field(conn, &item.entity(host_field), field, entry)
                            .await?
                    }
                    Leaf::Title => return Err(mismatch(entry, "field")),
                };
                Ok(with_created(node_created || item_created, outcome))
            }
            ChainType::NodeToRelationToNode => {
                let Some((node, created)) = self.node_for_insert(conn, &key[0], None).await? else {
                    return Ok(WriteOutcome::Failure);
                };
                let Some(target) = self.existing_node(conn, entry).await? else {
                    return Ok(with_created(created, WriteOutcome::Failure));
                };
                let relation_key = relation_key(&key[1], node.nid, Some(target.nid))?;
                if !find_relations(conn, &relation_key).await?.is_empty() {
                    debug!("Node {} already related to node {}", node.nid, target.nid);
                    return Ok(WriteOutcome::Success);
                }
                create_relation(
                    conn,
                    &relation_key,
                    target.nid,
                    self.options.author_uid,
                    &self.options.defaults,
                    None,
                )
                .await?;
                Ok(WriteOutcome::Success)
            }
            ChainType::NodeRelationNodeToRelationFields => {
                let Some((node, node_created)) = self.node_for_insert(conn, &key[0], None).await?
                else {
                    return Ok(WriteOutcome::Failure);
                };
                let Some(far) = self.existing_node(conn, &key[2]).await? else {
                    return Ok(with_created(node_created, WriteOutcome::Failure));
                };
                let Leaf::Field(field) = leaf(entry, None)? else {
                    return Err(mismatch(entry, "field"));
                };
                let relation_key = relation_key(&key[1], node.nid, Some(far.nid))?;
                let found = find_relations(conn, &relation_key).await?;
                let (relation, relation_created) =
                    match resolved(Lookup::from_vec(found), &key[1].link) {
                        Resolved::Found(relation) => (relation, false),
                        Resolved::Failed => {
                            return Ok(with_created(node_created, WriteOutcome::Failure))
                        }
                        Resolved::Missing => {
                            let relation = create_relation(
                                conn,
                                &relation_key,
                                far.nid,
                                self.options.author_uid,
                                &self.options.defaults,
                                Some(field),
                            )
                            .await?;
                            (relation, true)
                        }
                    };
                let entity = relation.entity(relation_key.relation_type);
                let outcome = self.insert_field(conn, &entity, field, entry).await?;
                Ok(with_created(node_created || relation_created, outcome))
            }
        }
    }

    /// Delete one value or its containing entity.
    pub(crate) async fn delete_in(
        &self,
        conn: &mut dyn Connection,
        chain_type: ChainType,
        key: &[CvEntry],
        entry: &CvEntry,
        scope: DeleteScope,
    ) -> Result<WriteOutcome, BackendError> {
        let node = match self.node(conn, &key[0], false).await? {
            Resolved::Found(node) => node,
            Resolved::Missing => {
                debug!("Nothing to delete, {} = {} is gone", key[0].link, key[0].value_or_null());
                return Ok(WriteOutcome::Failure);
            }
            Resolved::Failed => return Ok(WriteOutcome::Failure),
        };
        let bundle = node_bundle(&key[0])?;

        match chain_type {
            ChainType::NodeToFields => match (scope, leaf(entry, None)?) {
                (DeleteScope::Key, _) => {
                    delete_node(conn, bundle, &node, self.policy).await?;
                    Ok(WriteOutcome::Success)
                }
                (DeleteScope::Value, Leaf::Title) => {
                    warn!("Refusing to delete the title of node {}", node.nid);
                    Ok(WriteOutcome::Failure)
                }
                (DeleteScope::Value, Leaf::Field(field)) => {
                    self.delete_field(conn, &node.entity(bundle), field, entry)
                        .await
                }
            },
            ChainType::NodeToCollectionToFields => {
                let (host_field, id, label_field) = collection(&key[1])?;
                let host = node.entity(bundle);
                let Some(item_key) = key_value(&key[1]) else {
                    return Ok(WriteOutcome::Failure);
                };
                let lookup = find_item(conn, &host, host_field, id, label_field, item_key).await?;
                let item = match resolved(lookup, format!("{host_field} {item_key} on {host}")) {
                    Resolved::Found(item) => item,
                    Resolved::Missing | Resolved::Failed => return Ok(WriteOutcome::Failure),
                };
                match scope {
                    DeleteScope::Key => {
                        delete_item(conn, &host, host_field, &item, self.policy).await?;
                        Ok(WriteOutcome::Success)
                    }
                    DeleteScope::Value => {
                        let Leaf::Field(field) = leaf(entry, label_field)? else {
                            return Err(mismatch(entry, "field"));
                        };
                        self.delete_field(conn, &item.entity(host_field), field, entry)
                            .await
                    }
                }
            }
            ChainType::NodeToRelationToNode => {
                let target = match entry.value.as_ref().filter(|v| !v.is_null()) {
                    Some(_) => match self.existing_node(conn, entry).await? {
                        Some(target) => Some(target.nid),
                        None => return Ok(WriteOutcome::Failure),
                    },
                    None => None,
                };
                let relation_key = relation_key(&key[1], node.nid, target)?;
                let relations = find_relations(conn, &relation_key).await?;
                self.delete_relations(conn, relation_key.relation_type, &relations)
                    .await
            }
            ChainType::NodeRelationNodeToRelationFields => {
                let Some(far) = self.existing_node(conn, &key[2]).await? else {
                    return Ok(WriteOutcome::Failure);
                };
                let relation_key = relation_key(&key[1], node.nid, Some(far.nid))?;
                let relations = find_relations(conn, &relation_key).await?;
                match scope {
                    DeleteScope::Key => {
                        self.delete_relations(conn, relation_key.relation_type, &relations)
                            .await
                    }
                    DeleteScope::Value => {
                        let Leaf::Field(field) = leaf(entry, None)? else {
                            return Err(mismatch(entry, "field"));
                        };
                        let mut outcome = WriteOutcome::Failure;
                        for relation in &relations {
                            let entity = relation.entity(relation_key.relation_type);
                            if self.delete_field(conn, &entity, field, entry).await?.is_success() {
                                outcome = WriteOutcome::Success;
                            }
                        }
                        Ok(outcome)
                    }
                }
            }
        }
    }

    async fn delete_relations(
        &self,
        conn: &mut dyn Connection,
        relation_type: &str,
        relations: &[RelationRef],
    ) -> Result<WriteOutcome, BackendError> {
        if relations.is_empty() {
            debug!("No {relation_type} relation to delete");
            return Ok(WriteOutcome::Failure);
        }
        for relation in relations {
            delete_relation(conn, relation_type, relation, self.policy).await?;
        }
        Ok(WriteOutcome::Success)
    }
}

fn node_bundle(entry: &CvEntry) -> Result<&str, BackendError> {
    match &entry.link {
        Link::Node { bundle, .. } => Ok(bundle),
        _ => Err(mismatch(entry, "node")),
    }
}

fn collection(entry: &CvEntry) -> Result<(&str, CollectionId, Option<&str>), BackendError> {
    match &entry.link {
        Link::Collection {
            field,
            id,
            label_field,
        } => Ok((field, *id, label_field.as_deref())),
        _ => Err(mismatch(entry, "collection")),
    }
}

/// Relation identity from a relation key entry. Its value is the
/// distinguishing field value when the link names a field.
fn relation_key(
    entry: &CvEntry,
    source: i64,
    target: Option<i64>,
) -> Result<RelationKey<'_>, BackendError> {
    let Link::Relation {
        relation_type,
        field,
    } = &entry.link
    else {
        return Err(mismatch(entry, "relation"));
    };
    let field = field
        .as_deref()
        .zip(entry.value.as_ref().filter(|v| !v.is_null()));
    Ok(RelationKey {
        relation_type,
        source,
        field,
        target,
    })
}

//! Nodes, collection items and relations.
//!
//! Lookups never create anything. The `create_*` functions insert the entity
//! row, its first revision, link the two and write the configured defaults;
//! callers run them inside the write transaction.

use crate::field::{
    apply_defaults, capacity, delete_entity_fields, delete_values, insert_value, Capacity,
    FieldDefault,
};
use crate::schema::{
    data_table, host_item_column, host_revision_column, primary_column, revision_table, Entity,
    COLLECTION_ITEM, ENDPOINTS, ENDPOINT_ID, ENDPOINT_INDEX, ENDPOINT_TYPE, LANGUAGE_NONE, NODE,
    RELATION,
};
use chrono::Utc;
use sync_core::{CollectionId, DataType, NodeId, Value};
use sync_sql::{
    Condition, Connection, ConnectionError, Delete, DeletePolicy, Insert, Select, Statement,
    Update,
};
use tracing::{debug, info, warn};

/// Result of looking up something expected to be unique.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Lookup<T> {
    Found(T),
    Missing,
    /// More than one match
    Ambiguous(usize),
}

impl<T> Lookup<T> {
    pub fn from_vec(mut found: Vec<T>) -> Self {
        match found.len() {
            0 => Self::Missing,
            1 => found.pop().map_or(Self::Missing, Self::Found),
            n => Self::Ambiguous(n),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct NodeRef {
    pub nid: i64,
    pub vid: i64,
    pub published: bool,
}

impl NodeRef {
    pub fn entity(&self, bundle: &str) -> Entity {
        Entity::new(NODE, bundle, self.nid, self.vid)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ItemRef {
    pub item_id: i64,
    pub revision_id: i64,
}

impl ItemRef {
    /// Items are bundled by the name of their host field.
    pub fn entity(&self, host_field: &str) -> Entity {
        Entity::new(COLLECTION_ITEM, host_field, self.item_id, self.revision_id)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RelationRef {
    pub rid: i64,
    pub vid: i64,
}

impl RelationRef {
    pub fn entity(&self, relation_type: &str) -> Entity {
        Entity::new(RELATION, relation_type, self.rid, self.vid)
    }
}

fn now() -> i64 {
    Utc::now().timestamp()
}

fn int_pairs(rows: Vec<Vec<Value>>) -> Vec<(i64, i64)> {
    rows.into_iter()
        .filter_map(|row| match row.as_slice() {
            [a, b, ..] => Some((a.as_i64()?, b.as_i64()?)),
            _ => None,
        })
        .collect()
}

async fn insert_returning_id(
    conn: &mut dyn Connection,
    statement: &Statement,
) -> Result<i64, ConnectionError> {
    conn.execute(statement).await?;
    conn.last_insert_id()
        .and_then(|id| i64::try_from(id).ok())
        .ok_or_else(|| ConnectionError::query(statement, "no generated id"))
}

// Nodes

/// Find a node of `bundle` by id or title, published or not.
pub async fn find_node(
    conn: &mut dyn Connection,
    bundle: &str,
    id: NodeId,
    key: &Value,
) -> Result<Lookup<NodeRef>, ConnectionError> {
    let column = match id {
        NodeId::ById => "nid",
        NodeId::ByTitle => "title",
    };
    let statement = Select::from("node")
        .columns(["nid", "vid", "status"])
        .filter(Condition::eq("type", bundle))
        .filter(Condition::eq(column, key.clone()))
        .order_by("nid")
        .build();
    let nodes = conn
        .fetch_all(&statement)
        .await?
        .into_iter()
        .filter_map(|row| match row.as_slice() {
            [nid, vid, status] => Some(NodeRef {
                nid: nid.as_i64()?,
                vid: vid.as_i64()?,
                published: status.as_i64() == Some(1),
            }),
            _ => None,
        })
        .collect();
    Ok(Lookup::from_vec(nodes))
}

/// Create a published node and its first revision.
pub async fn create_node(
    conn: &mut dyn Connection,
    bundle: &str,
    title: &str,
    author_uid: i64,
    defaults: &[FieldDefault],
    skip_default: Option<&str>,
) -> Result<NodeRef, ConnectionError> {
    let created = now();
    let node = Insert::into("node")
        .value("vid", 0)
        .value("type", bundle)
        .value("language", LANGUAGE_NONE)
        .value("title", title)
        .value("uid", author_uid)
        .value("status", 1)
        .value("created", created)
        .value("changed", created)
        .build();
    let nid = insert_returning_id(conn, &node).await?;

    let revision = Insert::into("node_revision")
        .value("nid", nid)
        .value("uid", author_uid)
        .value("title", title)
        .value("log", "")
        .value("timestamp", created)
        .value("status", 1)
        .build();
    let vid = insert_returning_id(conn, &revision).await?;

    let link = Update::table("node")
        .set("vid", vid)
        .filter(Condition::eq("nid", nid))
        .build();
    conn.execute(&link).await?;

    let node = NodeRef {
        nid,
        vid,
        published: true,
    };
    apply_defaults(conn, &node.entity(bundle), defaults, skip_default).await?;
    info!("Created {bundle} node {nid} '{title}'");
    Ok(node)
}

async fn set_node_status(
    conn: &mut dyn Connection,
    node: &NodeRef,
    status: i64,
) -> Result<(), ConnectionError> {
    let live = Update::table("node")
        .set("status", status)
        .set("changed", now())
        .filter(Condition::eq("nid", node.nid))
        .build();
    conn.execute(&live).await?;
    let history = Update::table("node_revision")
        .set("status", status)
        .filter(Condition::eq("vid", node.vid))
        .build();
    conn.execute(&history).await?;
    Ok(())
}

/// Publish a node that was soft-deleted.
pub async fn republish_node(
    conn: &mut dyn Connection,
    node: &NodeRef,
) -> Result<(), ConnectionError> {
    set_node_status(conn, node, 1).await?;
    info!("Republished node {}", node.nid);
    Ok(())
}

pub async fn set_node_title(
    conn: &mut dyn Connection,
    node: &NodeRef,
    title: &Value,
) -> Result<u64, ConnectionError> {
    let live = Update::table("node")
        .set("title", title.clone())
        .set("changed", now())
        .filter(Condition::eq("nid", node.nid))
        .build();
    let affected = conn.execute(&live).await?;
    let history = Update::table("node_revision")
        .set("title", title.clone())
        .filter(Condition::eq("vid", node.vid))
        .build();
    conn.execute(&history).await?;
    Ok(affected)
}

/// Unpublish (soft) or remove (hard) a node.
pub async fn delete_node(
    conn: &mut dyn Connection,
    bundle: &str,
    node: &NodeRef,
    policy: DeletePolicy,
) -> Result<(), ConnectionError> {
    match policy {
        DeletePolicy::Soft => set_node_status(conn, node, 0).await?,
        DeletePolicy::Hard => {
            delete_entity_fields(conn, &node.entity(bundle), DeletePolicy::Hard).await?;
            for table in ["node_revision", "node"] {
                let statement = Delete::from(table)
                    .filter(Condition::eq("nid", node.nid))
                    .build();
                conn.execute(&statement).await?;
            }
        }
    }
    info!("Deleted {bundle} node {} ({policy:?})", node.nid);
    Ok(())
}

// Collection items

/// Find a live item hosted by `host_field` on `host`, by id or label.
pub async fn find_item(
    conn: &mut dyn Connection,
    host: &Entity,
    host_field: &str,
    id: CollectionId,
    label_field: Option<&str>,
    key: &Value,
) -> Result<Lookup<ItemRef>, ConnectionError> {
    let mut select = Select::from(format!("{} h", data_table(host_field)))
        .columns(["ci.item_id", "ci.revision_id"])
        .join(
            "field_collection_item ci",
            vec![
                Condition::columns("ci.item_id", format!("h.{}", host_item_column(host_field))),
                Condition::eq("ci.archived", 0),
            ],
        )
        .filter(Condition::eq("h.entity_type", host.entity_type))
        .filter(Condition::eq("h.entity_id", host.id))
        .filter(Condition::eq("h.deleted", 0));
    select = match (id, label_field) {
        (CollectionId::ByLabel, Some(label)) => select
            .join(
                format!("{} lbl", data_table(label)),
                vec![
                    Condition::eq("lbl.entity_type", COLLECTION_ITEM),
                    Condition::columns("lbl.entity_id", "ci.item_id"),
                    Condition::eq("lbl.deleted", 0),
                ],
            )
            .filter(Condition::eq(
                format!("lbl.{}", primary_column(label, &DataType::String)),
                key.clone(),
            )),
        _ => select.filter(Condition::eq("ci.item_id", key.clone())),
    };
    let statement = select.order_by("ci.item_id").build();
    let items = int_pairs(conn.fetch_all(&statement).await?)
        .into_iter()
        .map(|(item_id, revision_id)| ItemRef {
            item_id,
            revision_id,
        })
        .collect();
    Ok(Lookup::from_vec(items))
}

/// Create an item on `host`, or `None` when the host field is full.
pub async fn create_item(
    conn: &mut dyn Connection,
    host: &Entity,
    host_field: &str,
    label: Option<(&str, &Value)>,
    defaults: &[FieldDefault],
    skip_default: Option<&str>,
) -> Result<Option<ItemRef>, ConnectionError> {
    let delta = match capacity(conn, host_field, host).await? {
        Capacity::Next(delta) => delta,
        Capacity::Full(cardinality) => {
            warn!("{host_field} on {host} already holds {cardinality} items, not adding one");
            return Ok(None);
        }
        Capacity::Unconfigured => {
            warn!("Host field {host_field} is not configured");
            return Ok(None);
        }
    };

    let item = Insert::into("field_collection_item")
        .value("revision_id", 0)
        .value("field_name", host_field)
        .value("archived", 0)
        .build();
    let item_id = insert_returning_id(conn, &item).await?;
    let revision = Insert::into("field_collection_item_revision")
        .value("item_id", item_id)
        .build();
    let revision_id = insert_returning_id(conn, &revision).await?;
    let link = Update::table("field_collection_item")
        .set("revision_id", revision_id)
        .filter(Condition::eq("item_id", item_id))
        .build();
    conn.execute(&link).await?;

    insert_value(
        conn,
        host_field,
        host,
        delta,
        &[
            (host_item_column(host_field), Value::Int(item_id)),
            (host_revision_column(host_field), Value::Int(revision_id)),
        ],
    )
    .await?;

    let item = ItemRef {
        item_id,
        revision_id,
    };
    let entity = item.entity(host_field);
    if let Some((label_field, value)) = label {
        let column = primary_column(label_field, &DataType::String);
        insert_value(conn, label_field, &entity, 0, &[(column, value.clone())]).await?;
    }
    apply_defaults(conn, &entity, defaults, skip_default).await?;
    info!("Created {host_field} item {item_id} on {host}");
    Ok(Some(item))
}

/// Archive (soft) or remove (hard) an item and unlink it from its host.
pub async fn delete_item(
    conn: &mut dyn Connection,
    host: &Entity,
    host_field: &str,
    item: &ItemRef,
    policy: DeletePolicy,
) -> Result<(), ConnectionError> {
    let host_link = (host_item_column(host_field), Value::Int(item.item_id));
    match policy {
        DeletePolicy::Soft => {
            let archive = Update::table("field_collection_item")
                .set("archived", 1)
                .filter(Condition::eq("item_id", item.item_id))
                .build();
            conn.execute(&archive).await?;
        }
        DeletePolicy::Hard => {
            delete_entity_fields(conn, &item.entity(host_field), DeletePolicy::Hard).await?;
            for table in ["field_collection_item_revision", "field_collection_item"] {
                let statement = Delete::from(table)
                    .filter(Condition::eq("item_id", item.item_id))
                    .build();
                conn.execute(&statement).await?;
            }
        }
    }
    delete_values(conn, host_field, host, Some(&host_link), policy).await?;
    info!("Deleted {host_field} item {} on {host} ({policy:?})", item.item_id);
    Ok(())
}

// Relations

/// Identity of a relation: source node, type, optional distinguishing field
/// value and optional target node.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RelationKey<'a> {
    pub relation_type: &'a str,
    pub source: i64,
    pub field: Option<(&'a str, &'a Value)>,
    pub target: Option<i64>,
}

fn endpoint_join(alias: &str, index: i64) -> Vec<Condition> {
    vec![
        Condition::eq(format!("{alias}.entity_type"), RELATION),
        Condition::columns(format!("{alias}.entity_id"), "r.rid"),
        Condition::eq(format!("{alias}.{ENDPOINT_INDEX}"), index),
        Condition::eq(format!("{alias}.{ENDPOINT_TYPE}"), NODE),
        Condition::eq(format!("{alias}.deleted"), 0),
    ]
}

/// Find live relations matching `key`.
pub async fn find_relations(
    conn: &mut dyn Connection,
    key: &RelationKey<'_>,
) -> Result<Vec<RelationRef>, ConnectionError> {
    let endpoints = data_table(ENDPOINTS);
    let mut select = Select::from("relation r")
        .columns(["r.rid", "r.vid"])
        .join(format!("{endpoints} e0"), endpoint_join("e0", 0))
        .filter(Condition::eq("r.relation_type", key.relation_type))
        .filter(Condition::eq(format!("e0.{ENDPOINT_ID}"), key.source));
    if let Some((field, value)) = key.field {
        select = select
            .join(
                format!("{} rf", data_table(field)),
                vec![
                    Condition::eq("rf.entity_type", RELATION),
                    Condition::columns("rf.entity_id", "r.rid"),
                    Condition::eq("rf.deleted", 0),
                ],
            )
            .filter(Condition::eq(
                format!("rf.{}", primary_column(field, &DataType::String)),
                value.clone(),
            ));
    }
    if let Some(target) = key.target {
        select = select
            .join(format!("{endpoints} e1"), endpoint_join("e1", 1))
            .filter(Condition::eq(format!("e1.{ENDPOINT_ID}"), target));
    }
    let statement = select.order_by("r.rid").build();
    Ok(int_pairs(conn.fetch_all(&statement).await?)
        .into_iter()
        .map(|(rid, vid)| RelationRef { rid, vid })
        .collect())
}

/// Create a relation from `key.source` to `key.target` with its endpoints.
pub async fn create_relation(
    conn: &mut dyn Connection,
    key: &RelationKey<'_>,
    target: i64,
    author_uid: i64,
    defaults: &[FieldDefault],
    skip_default: Option<&str>,
) -> Result<RelationRef, ConnectionError> {
    let created = now();
    let relation = Insert::into("relation")
        .value("relation_type", key.relation_type)
        .value("vid", 0)
        .value("uid", author_uid)
        .value("created", created)
        .value("changed", created)
        .value("arity", 2)
        .build();
    let rid = insert_returning_id(conn, &relation).await?;
    let revision = Insert::into("relation_revision")
        .value("rid", rid)
        .value("relation_type", key.relation_type)
        .value("uid", author_uid)
        .value("changed", created)
        .value("arity", 2)
        .build();
    let vid = insert_returning_id(conn, &revision).await?;
    let link = Update::table("relation")
        .set("vid", vid)
        .filter(Condition::eq("rid", rid))
        .build();
    conn.execute(&link).await?;

    let relation = RelationRef { rid, vid };
    let entity = relation.entity(key.relation_type);
    for (index, nid) in [key.source, target].into_iter().enumerate() {
        let index = index as i64;
        let cells = [
            (ENDPOINT_TYPE.to_string(), Value::from(NODE)),
            (ENDPOINT_ID.to_string(), Value::Int(nid)),
            (ENDPOINT_INDEX.to_string(), Value::Int(index)),
        ];
        insert_value(conn, ENDPOINTS, &entity, index, &cells).await?;
    }
    if let Some((field, value)) = key.field {
        let column = primary_column(field, &DataType::String);
        insert_value(conn, field, &entity, 0, &[(column, value.clone())]).await?;
    }
    apply_defaults(conn, &entity, defaults, skip_default).await?;
    info!(
        "Created {} relation {rid} from node {} to node {target}",
        key.relation_type, key.source
    );
    Ok(relation)
}

/// Point the far endpoint of a relation at another node.
pub async fn retarget_relation(
    conn: &mut dyn Connection,
    relation: &RelationRef,
    target: i64,
) -> Result<u64, ConnectionError> {
    let far_end = |table: String| {
        Update::table(table)
            .set(ENDPOINT_ID, target)
            .filter(Condition::eq("entity_type", RELATION))
            .filter(Condition::eq("entity_id", relation.rid))
            .filter(Condition::eq(ENDPOINT_INDEX, 1))
            .filter(Condition::eq("deleted", 0))
    };
    let affected = conn.execute(&far_end(data_table(ENDPOINTS)).build()).await?;
    let history = far_end(revision_table(ENDPOINTS))
        .filter(Condition::eq("revision_id", relation.vid))
        .build();
    conn.execute(&history).await?;
    debug!("Relation {} now targets node {target}", relation.rid);
    Ok(affected)
}

/// Delete a relation: soft flags its endpoints and fields deleted.
pub async fn delete_relation(
    conn: &mut dyn Connection,
    relation_type: &str,
    relation: &RelationRef,
    policy: DeletePolicy,
) -> Result<(), ConnectionError> {
    let entity = relation.entity(relation_type);
    delete_entity_fields(conn, &entity, policy).await?;
    // Endpoints are not always registered as an instance of the bundle
    delete_values(conn, ENDPOINTS, &entity, None, policy).await?;
    if policy == DeletePolicy::Hard {
        for table in ["relation_revision", "relation"] {
            let statement = Delete::from(table)
                .filter(Condition::eq("rid", relation.rid))
                .build();
            conn.execute(&statement).await?;
        }
    }
    info!("Deleted {relation_type} relation {} ({policy:?})", relation.rid);
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_lookup_from_vec() {
        assert_eq!(Lookup::<i64>::from_vec(vec![]), Lookup::Missing);
        assert_eq!(Lookup::from_vec(vec![7]), Lookup::Found(7));
        assert_eq!(Lookup::from_vec(vec![7, 8]), Lookup::Ambiguous(2));
    }

    #[test]
    fn test_int_pairs_skips_nulls() {
        let rows = vec![
            vec![Value::Int(1), Value::Int(10)],
            vec![Value::Int(2), Value::Null],
        ];
        assert_eq!(int_pairs(rows), vec![(1, 10)]);
    }
}

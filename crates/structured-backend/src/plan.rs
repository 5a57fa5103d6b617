//! Read plans.
//!
//! A side is read with one statement per value column. Each statement joins
//! the key path of the chain type and only the tables of the column under
//! test, so a missing or soft-deleted sibling field never hides a row.
//! Building the statements is pure; executing them is up to the backend.

use crate::schema::{
    data_table, host_item_column, primary_column, COLLECTION_ITEM, ENDPOINTS, ENDPOINT_ID,
    ENDPOINT_INDEX, ENDPOINT_TYPE, NODE, RELATION,
};
use sync_core::{ChainType, CollectionId, CvChain, CvEntry, DataType, Link, NodeId, Value};
use sync_sql::{BackendError, Condition, Select, Statement};

/// Statement reading one value column.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ReadPlan {
    /// Index of the value column in the value chain
    pub column: usize,
    pub statement: Statement,
    /// Row layout is `keys.., label, tid, vocabulary id` instead of `keys.., value`
    pub term: bool,
}

/// Key path of a chain type: joins, filters and key expressions.
#[derive(Debug, Clone)]
struct KeyScope {
    select: Select,
    keys: Vec<String>,
    /// Entity type and id expression of the entity carrying the value fields
    entity_type: &'static str,
    entity_id: &'static str,
    label_field: Option<String>,
}

pub fn node_key(alias: &str, id: NodeId) -> String {
    match id {
        NodeId::ById => format!("{alias}.nid"),
        NodeId::ByTitle => format!("{alias}.title"),
    }
}

fn node_filters(select: Select, alias: &str, bundle: &str) -> Select {
    select
        .filter(Condition::eq(format!("{alias}.type"), bundle))
        .filter(Condition::eq(format!("{alias}.status"), 1))
}

fn field_join(alias: &str, entity_type: &str, entity_id: &str) -> Vec<Condition> {
    vec![
        Condition::eq(format!("{alias}.entity_type"), entity_type),
        Condition::columns(format!("{alias}.entity_id"), entity_id),
        Condition::eq(format!("{alias}.deleted"), 0),
    ]
}

/// Join from relation `r` to its endpoint node at `index`, aliased `node_alias`.
fn endpoint_join(select: Select, endpoint: &str, index: i64, node_alias: &str, bundle: &str) -> Select {
    let select = select
        .join(
            format!("{} {endpoint}", data_table(ENDPOINTS)),
            vec![
                Condition::eq(format!("{endpoint}.entity_type"), RELATION),
                Condition::columns(format!("{endpoint}.entity_id"), "r.rid"),
                Condition::eq(format!("{endpoint}.{ENDPOINT_INDEX}"), index),
                Condition::eq(format!("{endpoint}.{ENDPOINT_TYPE}"), NODE),
                Condition::eq(format!("{endpoint}.deleted"), 0),
            ],
        )
        .join(
            format!("node {node_alias}"),
            vec![Condition::columns(
                format!("{node_alias}.nid"),
                format!("{endpoint}.{ENDPOINT_ID}"),
            )],
        );
    node_filters(select, node_alias, bundle)
}

fn relation_scope(key: &[&Link]) -> Option<(Select, Vec<String>)> {
    let (bundle, id, relation_type, field, far) = match key {
        [Link::Node { bundle, id }, Link::Relation { relation_type, field }] => {
            (bundle, id, relation_type, field, None)
        }
        [Link::Node { bundle, id }, Link::Relation { relation_type, field }, Link::Node {
            bundle: far_bundle,
            id: far_id,
        }] => (bundle, id, relation_type, field, Some((far_bundle, far_id))),
        _ => return None,
    };

    let mut select = node_filters(Select::from("node n"), "n", bundle)
        .join(
            format!("{} e0", data_table(ENDPOINTS)),
            vec![
                Condition::eq("e0.entity_type", RELATION),
                Condition::eq(format!("e0.{ENDPOINT_TYPE}"), NODE),
                Condition::columns(format!("e0.{ENDPOINT_ID}"), "n.nid"),
                Condition::eq(format!("e0.{ENDPOINT_INDEX}"), 0),
                Condition::eq("e0.deleted", 0),
            ],
        )
        .join(
            "relation r",
            vec![
                Condition::columns("r.rid", "e0.entity_id"),
                Condition::eq("r.relation_type", relation_type.as_str()),
            ],
        );
    let mut keys = vec![node_key("n", *id)];
    match field {
        Some(field) => {
            select = select.join(
                format!("{} rf", data_table(field)),
                field_join("rf", RELATION, "r.rid"),
            );
            keys.push(format!("rf.{}", primary_column(field, &DataType::String)));
        }
        None => keys.push("r.relation_type".to_string()),
    }
    if let Some((far_bundle, far_id)) = far {
        select = endpoint_join(select, "e1", 1, "b", far_bundle);
        keys.push(node_key("b", *far_id));
    }
    Some((select, keys))
}

fn key_scope(chain_type: ChainType, key: &CvChain) -> Option<KeyScope> {
    let links = key.links();
    let scope = match (chain_type, links.as_slice()) {
        (ChainType::NodeToFields, [Link::Node { bundle, id }]) => KeyScope {
            select: node_filters(Select::from("node n"), "n", bundle),
            keys: vec![node_key("n", *id)],
            entity_type: NODE,
            entity_id: "n.nid",
            label_field: None,
        },
        (
            ChainType::NodeToCollectionToFields,
            [Link::Node { bundle, id }, Link::Collection {
                field: host,
                id: item_id,
                label_field,
            }],
        ) => {
            let mut select = node_filters(Select::from("node n"), "n", bundle)
                .join(
                    format!("{} h", data_table(host)),
                    field_join("h", NODE, "n.nid"),
                )
                .join(
                    "field_collection_item ci",
                    vec![
                        Condition::columns("ci.item_id", format!("h.{}", host_item_column(host))),
                        Condition::eq("ci.archived", 0),
                    ],
                );
            let item_key = match (item_id, label_field) {
                (CollectionId::ByLabel, Some(label)) => {
                    select = select.join(
                        format!("{} lbl", data_table(label)),
                        field_join("lbl", COLLECTION_ITEM, "ci.item_id"),
                    );
                    format!("lbl.{}", primary_column(label, &DataType::String))
                }
                _ => "ci.item_id".to_string(),
            };
            KeyScope {
                select,
                keys: vec![node_key("n", *id), item_key],
                entity_type: COLLECTION_ITEM,
                entity_id: "ci.item_id",
                label_field: label_field.clone(),
            }
        }
        (ChainType::NodeToRelationToNode | ChainType::NodeRelationNodeToRelationFields, links) => {
            let (select, keys) = relation_scope(links)?;
            KeyScope {
                select,
                keys,
                entity_type: RELATION,
                entity_id: "r.rid",
                label_field: None,
            }
        }
        _ => return None,
    };
    Some(scope)
}

/// Filter condition for a bound value read through `column`.
fn bound_condition(column: &str, data_type: &DataType, value: &Value) -> Condition {
    match data_type {
        DataType::Ip => Condition::eq(
            column,
            crate::schema::ip_to_int(value).map(Value::Int).unwrap_or(Value::Null),
        ),
        _ => Condition::eq(column, value.clone()),
    }
}

fn field_plan(scope: &KeyScope, field: &str, entry: &CvEntry) -> (Select, bool) {
    let column = format!("f.{}", primary_column(field, &entry.data_type));
    let mut select = scope
        .select
        .clone()
        .columns(scope.keys.iter().cloned())
        .join(
            format!("{} f", data_table(field)),
            field_join("f", scope.entity_type, scope.entity_id),
        );

    let term = match entry.data_type.vocabulary() {
        Some(vocabulary) => {
            select = select
                .column("t.name")
                .column(column.clone())
                .column("v.vid")
                .left_join(
                    "taxonomy_term_data t",
                    vec![Condition::columns("t.tid", column.clone())],
                )
                .left_join(
                    "taxonomy_vocabulary v",
                    vec![
                        Condition::columns("v.vid", "t.vid"),
                        Condition::eq("v.machine_name", vocabulary),
                    ],
                );
            if let Some(value) = &entry.value {
                select = select.filter(Condition::eq("t.name", value.clone()));
            }
            true
        }
        None => {
            select = select.column(column.clone());
            if let Some(value) = &entry.value {
                select = select.filter(bound_condition(&column, &entry.data_type, value));
            }
            false
        }
    };

    let select = scope
        .keys
        .iter()
        .fold(select, |s, k| s.order_by(k.clone()))
        .order_by("f.delta");
    (select, term)
}

/// Build the read statements of a side, one per value column.
pub fn read_plans(
    chain_type: ChainType,
    key: &CvChain,
    value: &CvChain,
) -> Result<Vec<ReadPlan>, BackendError> {
    let mismatch = || {
        BackendError::Invariant(format!(
            "key chain {key} does not have the shape of {chain_type}"
        ))
    };
    let mut scope = key_scope(chain_type, key).ok_or_else(mismatch)?;
    for (entry, k) in key.iter().zip(scope.keys.clone()) {
        if let Some(v) = &entry.value {
            scope.select = scope.select.filter(Condition::eq(k, v.clone()));
        }
    }

    let ordered = |select: Select, keys: &[String]| {
        keys.iter().fold(select, |s, k| s.order_by(k.clone()))
    };

    value
        .iter()
        .enumerate()
        .map(|(column, entry)| {
            let (select, term) = match &entry.link {
                Link::Field { name } => field_plan(&scope, name, entry),
                Link::Label => {
                    let label = scope.label_field.clone().ok_or_else(mismatch)?;
                    field_plan(&scope, &label, entry)
                }
                Link::Title if scope.entity_type == NODE => {
                    let mut select = scope
                        .select
                        .clone()
                        .columns(scope.keys.iter().cloned())
                        .column("n.title");
                    if let Some(v) = &entry.value {
                        select = select.filter(Condition::eq("n.title", v.clone()));
                    }
                    (ordered(select, &scope.keys), false)
                }
                Link::Node { bundle, id } if chain_type == ChainType::NodeToRelationToNode => {
                    let far = node_key("b", *id);
                    let mut select = endpoint_join(scope.select.clone(), "e1", 1, "b", bundle)
                        .columns(scope.keys.iter().cloned())
                        .column(far.clone());
                    if let Some(v) = &entry.value {
                        select = select.filter(Condition::eq(far.clone(), v.clone()));
                    }
                    (ordered(select, &scope.keys).order_by(far), false)
                }
                _ => return Err(mismatch()),
            };
            Ok(ReadPlan {
                column,
                statement: select.build(),
                term,
            })
        })
        .collect()
}

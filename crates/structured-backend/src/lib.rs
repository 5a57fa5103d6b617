//! Query backend for the node / relation / field-collection schema.
//!
//! Sides of this backend are chains starting at a node. The chain type
//! resolved at startup picks the read plan ([`plan`]) and the write path:
//!
//! | chain type | key | value |
//! |---|---|---|
//! | `node_to_fields` | node | fields or title of the node |
//! | `node_to_relation_to_node` | node, relation | node at the far end |
//! | `node_relation_node_to_relation_fields` | node, relation, node | fields of the relation |
//! | `node_to_collection_to_fields` | node, collection | fields or label of the item |
//!
//! Writes run in one transaction per call. A missing node addressed by title,
//! a missing collection item addressed by label and a missing relation are
//! created on insert together with their revision rows and configured
//! default field values.
//!
//! # Example
//!
//! ```yaml
//! destination:
//!   backend: structured
//!   url: mysql://sync@cmdb/drupal
//!   author_uid: 1
//!   defaults:
//!     - { entity_type: node, bundle: server, field: field_state, type: "term:state", value: active }
//! ```

pub mod entity;
pub mod field;
pub mod plan;
pub mod reassemble;
pub mod schema;
pub mod term;
pub mod testing;
mod write;

pub use field::FieldDefault;

use async_trait::async_trait;
use plan::read_plans;
use reassemble::Reassembler;
use serde::{Deserialize, Serialize};
use sync_core::{
    BackendArgs, ChainType, CvChain, CvEntry, Row, SideOptions, StructuredArgs, TemplateSide,
    Value, ValueError,
};
use sync_sql::{
    BackendError, BackendKind, Connection, DeletePolicy, DeleteScope, QueryBackend, Transaction,
    WriteOutcome, WriteRequest,
};
use tracing::{debug, error, warn};

/// Database-level options of a structured database.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct StructuredOptions {
    /// Author of created nodes and relations
    #[serde(default)]
    pub author_uid: i64,

    /// Field values written to newly created entities
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub defaults: Vec<FieldDefault>,
}

/// Query backend for the node / relation / field-collection schema.
#[derive(Debug, Clone)]
pub struct StructuredBackend {
    policy: DeletePolicy,
    options: StructuredOptions,
}

impl StructuredBackend {
    pub fn new(policy: DeletePolicy, options: StructuredOptions) -> Self {
        Self { policy, options }
    }

    pub fn policy(&self) -> DeletePolicy {
        self.policy
    }
}

fn chain_type(side: &TemplateSide) -> Result<ChainType, BackendError> {
    match &side.args {
        BackendArgs::Structured(args) => Ok(args.chain_type),
        BackendArgs::Generic(_) => Err(BackendError::Invariant(
            "structured backend called with generic side arguments".to_string(),
        )),
    }
}

/// Chain type of a write request, checking the key shape.
fn request_chain_type(request: &WriteRequest<'_>, operation: &str) -> Result<ChainType, BackendError> {
    request.ensure_single_value(operation)?;
    let chain_type = chain_type(request.side)?;
    if request.key.len() != chain_type.key_len() {
        return Err(BackendError::Invariant(format!(
            "{operation} called with {} key entries for {chain_type}",
            request.key.len()
        )));
    }
    Ok(chain_type)
}

fn normalize_bound(chain: CvChain) -> Result<CvChain, ValueError> {
    chain
        .into_inner()
        .into_iter()
        .map(|entry| match entry.value.clone() {
            Some(value) => Ok(entry.with_value(entry.data_type.normalize(value)?)),
            None => Ok(entry),
        })
        .collect::<Result<Vec<CvEntry>, ValueError>>()
        .map(CvChain::new)
}

/// Keep invariant violations fatal, log everything else as a failed write.
fn settle(operation: &str, result: Result<WriteOutcome, BackendError>) -> Result<WriteOutcome, BackendError> {
    match result {
        Ok(outcome) => Ok(outcome),
        Err(e) if e.is_invariant() => Err(e),
        Err(e) => {
            error!("Structured {operation} failed: {e}");
            Ok(WriteOutcome::Failure)
        }
    }
}

#[async_trait]
impl QueryBackend for StructuredBackend {
    fn kind(&self) -> BackendKind {
        BackendKind::Structured
    }

    fn prepare(
        &self,
        key: CvChain,
        value: CvChain,
        options: &SideOptions,
    ) -> Result<TemplateSide, BackendError> {
        if !options.is_empty() {
            return Err(BackendError::Options {
                backend: BackendKind::Structured,
                message: "table options are not supported, the chain defines the tables"
                    .to_string(),
            });
        }
        let chain_type = ChainType::resolve(&key, &value)?;
        Ok(TemplateSide {
            key: normalize_bound(key)?,
            value: normalize_bound(value)?,
            args: BackendArgs::Structured(StructuredArgs { chain_type }),
        })
    }

    async fn read(
        &self,
        conn: &mut dyn Connection,
        side: &TemplateSide,
    ) -> Result<Vec<Row>, BackendError> {
        let chain_type = chain_type(side)?;
        let key_len = side.key.len();
        let mut reassembler = Reassembler::new(side.value.len());

        for plan in read_plans(chain_type, &side.key, &side.value)? {
            let entry = &side.value[plan.column];
            for mut cells in conn.fetch_all(&plan.statement).await? {
                if plan.term {
                    // keys.., label, tid, vocabulary id
                    let vocabulary = cells.pop();
                    let tid = cells.pop().unwrap_or(Value::Null);
                    if vocabulary.as_ref().map_or(true, Value::is_null) {
                        warn!(
                            "Skipping {} term {tid} that does not resolve in its vocabulary",
                            entry.link
                        );
                        continue;
                    }
                }
                if cells.len() != key_len + 1 {
                    return Err(ValueError::Width {
                        expected: key_len + 1,
                        actual: cells.len(),
                    }
                    .into());
                }
                let raw_value = cells.pop().unwrap_or(Value::Null);
                let keys = side
                    .key
                    .iter()
                    .zip(cells)
                    .map(|(e, cell)| e.data_type.normalize(cell))
                    .collect::<Result<Vec<_>, _>>();
                let normalized = keys.and_then(|keys| Ok((keys, entry.data_type.normalize(raw_value)?)));
                match normalized {
                    Ok((keys, value)) => reassembler.push(plan.column, keys, value),
                    Err(e) => warn!("Skipping {} row: {e}", entry.link),
                }
            }
        }

        let rows = reassembler.into_rows();
        debug!("Read {} rows for {chain_type}", rows.len());
        Ok(rows)
    }

    async fn update(
        &self,
        conn: &mut dyn Connection,
        request: &WriteRequest<'_>,
    ) -> Result<WriteOutcome, BackendError> {
        let chain_type = request_chain_type(request, "update")?;
        let entry = &request.value[0];
        if entry.value_or_null().is_null() {
            return self.delete(conn, request, DeleteScope::Value).await;
        }

        let mut tx = match Transaction::begin(conn).await {
            Ok(tx) => tx,
            Err(e) => return settle("update", Err(e.into())),
        };
        let result = match self.update_in(tx.conn(), chain_type, &request.key, entry).await {
            Ok(Some(outcome)) => Ok(outcome),
            Ok(None) => {
                debug!("Nothing to update for {}, inserting", request.key);
                self.insert_in(tx.conn(), chain_type, &request.key, entry)
                    .await
            }
            Err(e) => Err(e),
        };
        settle("update", tx.finish(result).await)
    }

    async fn insert(
        &self,
        conn: &mut dyn Connection,
        request: &WriteRequest<'_>,
    ) -> Result<WriteOutcome, BackendError> {
        let chain_type = request_chain_type(request, "insert")?;
        let entry = &request.value[0];

        let mut tx = match Transaction::begin(conn).await {
            Ok(tx) => tx,
            Err(e) => return settle("insert", Err(e.into())),
        };
        let result = self.insert_in(tx.conn(), chain_type, &request.key, entry).await;
        settle("insert", tx.finish(result).await)
    }

    async fn delete(
        &self,
        conn: &mut dyn Connection,
        request: &WriteRequest<'_>,
        scope: DeleteScope,
    ) -> Result<WriteOutcome, BackendError> {
        let chain_type = request_chain_type(request, "delete")?;
        let entry = &request.value[0];

        let mut tx = match Transaction::begin(conn).await {
            Ok(tx) => tx,
            Err(e) => return settle("delete", Err(e.into())),
        };
        let result = self
            .delete_in(tx.conn(), chain_type, &request.key, entry, scope)
            .await;
        settle("delete", tx.finish(result).await)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use sync_core::{DataType, Link, NodeId};

    fn side(key: CvChain, value: CvChain) -> Result<TemplateSide, BackendError> {
        StructuredBackend::new(DeletePolicy::Soft, StructuredOptions::default()).prepare(
            key,
            value,
            &SideOptions::default(),
        )
    }

    fn server() -> CvEntry {
        CvEntry::new(
            Link::Node {
                bundle: "server".into(),
                id: NodeId::ByTitle,
            },
            DataType::String,
        )
    }

    #[test]
    fn test_prepare_resolves_chain_type() {
        let value = CvChain::new(vec![CvEntry::new(
            Link::Field {
                name: "field_ram".into(),
            },
            DataType::Decimal,
        )]);
        let side = side(CvChain::new(vec![server()]), value).unwrap();
        assert_eq!(
            side.args,
            BackendArgs::Structured(StructuredArgs {
                chain_type: ChainType::NodeToFields
            })
        );
    }

    #[test]
    fn test_prepare_normalizes_bound_values() {
        let value = CvChain::new(vec![CvEntry::bound(
            Link::Field {
                name: "field_ip".into(),
            },
            DataType::Ip,
            Value::Int(167772161),
        )]);
        let side = side(CvChain::new(vec![server()]), value).unwrap();
        assert_eq!(side.value[0].value, Some(Value::from("10.0.0.1")));
    }

    #[test]
    fn test_prepare_rejects_columns_and_options() {
        let value = CvChain::new(vec![CvEntry::new(
            Link::Column { name: "ram".into() },
            DataType::Integer,
        )]);
        let err = side(CvChain::new(vec![server()]), value.clone()).unwrap_err();
        assert!(matches!(err, BackendError::Chain(_)));

        let backend = StructuredBackend::new(DeletePolicy::Hard, StructuredOptions::default());
        let options = SideOptions {
            table: Some("servers".into()),
            ..Default::default()
        };
        let err = backend
            .prepare(CvChain::new(vec![server()]), value, &options)
            .unwrap_err();
        assert!(matches!(err, BackendError::Options { .. }));
    }

    #[test]
    fn test_options_from_yaml() {
        let yaml = r#"
author_uid: 3
defaults:
  - { entity_type: node, bundle: server, field: field_state, type: "term:state", value: active }
"#;
        let options: StructuredOptions = serde_yaml::from_str(yaml).unwrap();
        assert_eq!(options.author_uid, 3);
        assert_eq!(options.defaults[0].data_type, DataType::Term { vocabulary: "state".into() });
        assert_eq!(options.defaults[0].value, Value::from("active"));
    }
}

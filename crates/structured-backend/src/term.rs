//! Taxonomy term lookups.

use crate::entity::Lookup;
use sync_core::Value;
use sync_sql::{Condition, Connection, ConnectionError, Select};

/// Find the term id of `label` in `vocabulary`.
pub async fn resolve_tid(
    conn: &mut dyn Connection,
    vocabulary: &str,
    label: &Value,
) -> Result<Lookup<i64>, ConnectionError> {
    let statement = Select::from("taxonomy_term_data t")
        .column("t.tid")
        .join(
            "taxonomy_vocabulary v",
            vec![Condition::columns("v.vid", "t.vid")],
        )
        .filter(Condition::eq("v.machine_name", vocabulary))
        .filter(Condition::eq("t.name", label.clone()))
        .build();
    let tids = conn
        .fetch_all(&statement)
        .await?
        .into_iter()
        .filter_map(|row| row.first().and_then(Value::as_i64))
        .collect();
    Ok(Lookup::from_vec(tids))
}

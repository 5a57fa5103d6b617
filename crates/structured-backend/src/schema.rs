//! Storage naming of the node / field schema.
//!
//! Every field `f` is stored in a live table `field_data_f` and a history
//! table `field_revision_f` sharing the same layout: `entity_type`,
//! `bundle`, `deleted`, `entity_id`, `revision_id`, `language`, `delta`, then
//! one or more value columns named after the field and the data type.

use std::net::Ipv4Addr;
use sync_core::{DataType, Value};

pub const NODE: &str = "node";
pub const COLLECTION_ITEM: &str = "field_collection_item";
pub const RELATION: &str = "relation";

/// Language code of language-neutral field rows.
pub const LANGUAGE_NONE: &str = "und";

/// Field holding relation endpoints.
pub const ENDPOINTS: &str = "endpoints";
pub const ENDPOINT_TYPE: &str = "endpoints_entity_type";
pub const ENDPOINT_ID: &str = "endpoints_entity_id";
pub const ENDPOINT_INDEX: &str = "endpoints_r_index";

pub fn data_table(field: &str) -> String {
    format!("field_data_{field}")
}

pub fn revision_table(field: &str) -> String {
    format!("field_revision_{field}")
}

/// Storage columns of `field` for values of `data_type`.
pub fn field_columns(field: &str, data_type: &DataType) -> Vec<String> {
    match data_type {
        DataType::Term { .. } => vec![format!("{field}_tid")],
        DataType::Id => vec![format!("{field}_target_id")],
        DataType::Ip => vec![format!("{field}_start"), format!("{field}_end")],
        DataType::String | DataType::Integer | DataType::Decimal => {
            vec![format!("{field}_value")]
        }
    }
}

/// The column a value of `field` is read from.
pub fn primary_column(field: &str, data_type: &DataType) -> String {
    match data_type {
        DataType::Term { .. } => format!("{field}_tid"),
        DataType::Id => format!("{field}_target_id"),
        DataType::Ip => format!("{field}_start"),
        DataType::String | DataType::Integer | DataType::Decimal => format!("{field}_value"),
    }
}

/// Item id column of a field-collection host field.
pub fn host_item_column(host: &str) -> String {
    format!("{host}_value")
}

/// Item revision column of a field-collection host field.
pub fn host_revision_column(host: &str) -> String {
    format!("{host}_revision_id")
}

/// Integer form of a dotted IPv4 address.
pub fn ip_to_int(value: &Value) -> Option<i64> {
    match value {
        Value::Int(i) => u32::try_from(*i).ok().map(i64::from),
        Value::Text(s) => s
            .trim()
            .parse::<Ipv4Addr>()
            .ok()
            .map(|ip| i64::from(u32::from(ip))),
        _ => None,
    }
}

/// Address of one entity's field rows.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Entity {
    pub entity_type: &'static str,
    pub bundle: String,
    pub id: i64,
    pub revision_id: i64,
}

impl Entity {
    pub fn new(entity_type: &'static str, bundle: impl Into<String>, id: i64, revision_id: i64) -> Self {
        Self {
            entity_type,
            bundle: bundle.into(),
            id,
            revision_id,
        }
    }
}

impl std::fmt::Display for Entity {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{} {} ({})", self.entity_type, self.id, self.bundle)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_field_columns() {
        assert_eq!(field_columns("field_ram", &DataType::Decimal), vec!["field_ram_value"]);
        assert_eq!(
            field_columns("field_os", &DataType::Term { vocabulary: "os".into() }),
            vec!["field_os_tid"]
        );
        assert_eq!(
            field_columns("field_ip", &DataType::Ip),
            vec!["field_ip_start", "field_ip_end"]
        );
        assert_eq!(primary_column("field_rack", &DataType::Id), "field_rack_target_id");
    }

    #[test]
    fn test_ip_to_int() {
        assert_eq!(ip_to_int(&Value::from("10.0.0.1")), Some(167772161));
        assert_eq!(ip_to_int(&Value::Int(1)), Some(1));
        assert_eq!(ip_to_int(&Value::from("10.0.0")), None);
        assert_eq!(ip_to_int(&Value::Int(-1)), None);
    }
}

//! Reassembly of per-column reads into rows.

use std::collections::HashMap;
use sync_core::{Row, Value};

/// Values of every column, grouped by key tuple in first-appearance order.
#[derive(Debug, Default)]
pub struct Reassembler {
    columns: usize,
    order: Vec<Vec<Value>>,
    index: HashMap<Vec<Value>, usize>,
    values: Vec<Vec<Vec<Value>>>,
}

impl Reassembler {
    pub fn new(columns: usize) -> Self {
        Self {
            columns,
            ..Default::default()
        }
    }

    /// Record one value of column `column` for `key`.
    pub fn push(&mut self, column: usize, key: Vec<Value>, value: Value) {
        let slot = match self.index.get(&key) {
            Some(&slot) => slot,
            None => {
                let slot = self.order.len();
                self.index.insert(key.clone(), slot);
                self.order.push(key);
                self.values.push(vec![Vec::new(); self.columns]);
                slot
            }
        };
        if let Some(cells) = self.values[slot].get_mut(column) {
            cells.push(value);
        }
    }

    /// Build rows: for each key the Cartesian product of its column values,
    /// first column varying slowest, with `Null` for a column without values.
    pub fn into_rows(self) -> Vec<Row> {
        let mut rows = Vec::new();
        for (key, columns) in self.order.into_iter().zip(self.values) {
            let mut product: Vec<Vec<Value>> = vec![Vec::new()];
            for cells in columns {
                let cells = if cells.is_empty() {
                    vec![Value::Null]
                } else {
                    cells
                };
                product = product
                    .into_iter()
                    .flat_map(|prefix| {
                        cells.iter().map(move |cell| {
                            let mut next = prefix.clone();
                            next.push(cell.clone());
                            next
                        })
                    })
                    .collect();
            }
            rows.extend(product.into_iter().map(|values| Row::new(key.clone(), values)));
        }
        rows
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn key(k: &str) -> Vec<Value> {
        vec![Value::from(k)]
    }

    #[test]
    fn test_missing_column_becomes_null() {
        let mut r = Reassembler::new(2);
        r.push(0, key("srv1"), Value::Int(16));
        r.push(1, key("srv2"), Value::from("linux"));
        let rows = r.into_rows();
        assert_eq!(
            rows,
            vec![
                Row::new(key("srv1"), vec![Value::Int(16), Value::Null]),
                Row::new(key("srv2"), vec![Value::Null, Value::from("linux")]),
            ]
        );
    }

    #[test]
    fn test_cartesian_product_order() {
        let mut r = Reassembler::new(2);
        r.push(0, key("srv1"), Value::from("a"));
        r.push(0, key("srv1"), Value::from("b"));
        r.push(1, key("srv1"), Value::Int(1));
        r.push(1, key("srv1"), Value::Int(2));
        let values: Vec<Vec<Value>> = r
            .into_rows()
            .into_iter()
            .map(|row| row.values().to_vec())
            .collect();
        assert_eq!(
            values,
            vec![
                vec![Value::from("a"), Value::Int(1)],
                vec![Value::from("a"), Value::Int(2)],
                vec![Value::from("b"), Value::Int(1)],
                vec![Value::from("b"), Value::Int(2)],
            ]
        );
    }

    #[test]
    fn test_keys_keep_first_appearance_order() {
        let mut r = Reassembler::new(2);
        r.push(0, key("srv2"), Value::Int(1));
        r.push(1, key("srv1"), Value::Int(2));
        r.push(1, key("srv2"), Value::Int(3));
        let keys: Vec<Value> = r
            .into_rows()
            .into_iter()
            .map(|row| row.keys()[0].clone())
            .collect();
        assert_eq!(keys, vec![Value::from("srv2"), Value::from("srv1")]);
    }
}

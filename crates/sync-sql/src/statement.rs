//! Parameterized statement builders.
//!
//! Backends describe their queries as data ([`Select`], [`Insert`],
//! [`Update`], [`Delete`]) and render them into a [`Statement`]: SQL text with
//! `?` placeholders plus the bound parameters, collected in text order. Both
//! supported dialects accept `?` placeholders.
//!
//! Identifiers (tables, columns, aliases) come from validated configuration
//! and are rendered as given; only values are parameterized.

use std::fmt;
use sync_core::Value;

/// SQL text plus its positional parameters.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Statement {
    sql: String,
    params: Vec<Value>,
}

impl Statement {
    pub fn new(sql: impl Into<String>, params: Vec<Value>) -> Self {
        Self {
            sql: sql.into(),
            params,
        }
    }

    /// Statement without parameters.
    pub fn raw(sql: impl Into<String>) -> Self {
        Self::new(sql, Vec::new())
    }

    pub fn sql(&self) -> &str {
        &self.sql
    }

    pub fn params(&self) -> &[Value] {
        &self.params
    }

    pub fn into_parts(self) -> (String, Vec<Value>) {
        (self.sql, self.params)
    }
}

impl fmt::Display for Statement {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.params.is_empty() {
            f.write_str(&self.sql)
        } else {
            let params: Vec<String> = self.params.iter().map(|p| p.to_string()).collect();
            write!(f, "{} [{}]", self.sql, params.join(", "))
        }
    }
}

/// One predicate of a WHERE or ON clause.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Condition {
    /// `column = ?`, or `column IS NULL` for a null value
    Eq { column: String, value: Value },
    /// `left = right` between two columns
    ColumnEq { left: String, right: String },
    /// Verbatim SQL fragment
    Raw(String),
}

impl Condition {
    pub fn eq(column: impl Into<String>, value: impl Into<Value>) -> Self {
        Self::Eq {
            column: column.into(),
            value: value.into(),
        }
    }

    pub fn columns(left: impl Into<String>, right: impl Into<String>) -> Self {
        Self::ColumnEq {
            left: left.into(),
            right: right.into(),
        }
    }

    pub fn raw(sql: impl Into<String>) -> Self {
        Self::Raw(sql.into())
    }

    fn render(&self, sql: &mut String, params: &mut Vec<Value>) {
        match self {
            Self::Eq { column, value } if value.is_null() => {
                sql.push_str(column);
                sql.push_str(" IS NULL");
            }
            Self::Eq { column, value } => {
                sql.push_str(column);
                sql.push_str(" = ?");
                params.push(value.clone());
            }
            Self::ColumnEq { left, right } => {
                sql.push_str(left);
                sql.push_str(" = ");
                sql.push_str(right);
            }
            Self::Raw(fragment) => {
                sql.push('(');
                sql.push_str(fragment);
                sql.push(')');
            }
        }
    }
}

fn render_conditions(
    keyword: &str,
    conditions: &[Condition],
    sql: &mut String,
    params: &mut Vec<Value>,
) {
    for (i, condition) in conditions.iter().enumerate() {
        sql.push_str(if i == 0 { keyword } else { " AND " });
        condition.render(sql, params);
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum JoinKind {
    Inner,
    Left,
}

#[derive(Debug, Clone, PartialEq, Eq)]
struct Join {
    kind: JoinKind,
    table: String,
    on: Vec<Condition>,
}

/// SELECT builder.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Select {
    columns: Vec<String>,
    from: String,
    joins: Vec<Join>,
    filter: Vec<Condition>,
    order_by: Vec<String>,
    limit: Option<u64>,
}

impl Select {
    /// Start a SELECT from `from`, which may be `table alias` or a joined clause.
    pub fn from(from: impl Into<String>) -> Self {
        Self {
            columns: Vec::new(),
            from: from.into(),
            joins: Vec::new(),
            filter: Vec::new(),
            order_by: Vec::new(),
            limit: None,
        }
    }

    pub fn column(mut self, column: impl Into<String>) -> Self {
        self.columns.push(column.into());
        self
    }

    pub fn columns<I, S>(mut self, columns: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.columns.extend(columns.into_iter().map(Into::into));
        self
    }

    pub fn join(mut self, table: impl Into<String>, on: Vec<Condition>) -> Self {
        self.joins.push(Join {
            kind: JoinKind::Inner,
            table: table.into(),
            on,
        });
        self
    }

    pub fn left_join(mut self, table: impl Into<String>, on: Vec<Condition>) -> Self {
        self.joins.push(Join {
            kind: JoinKind::Left,
            table: table.into(),
            on,
        });
        self
    }

    pub fn filter(mut self, condition: Condition) -> Self {
        self.filter.push(condition);
        self
    }

    pub fn order_by(mut self, column: impl Into<String>) -> Self {
        self.order_by.push(column.into());
        self
    }

    pub fn limit(mut self, limit: u64) -> Self {
        self.limit = Some(limit);
        self
    }

    pub fn build(&self) -> Statement {
        let mut sql = String::from("SELECT ");
        let mut params = Vec::new();
        if self.columns.is_empty() {
            sql.push('*');
        } else {
            sql.push_str(&self.columns.join(", "));
        }
        sql.push_str(" FROM ");
        sql.push_str(&self.from);
        for join in &self.joins {
            sql.push_str(match join.kind {
                JoinKind::Inner => " INNER JOIN ",
                JoinKind::Left => " LEFT JOIN ",
            });
            sql.push_str(&join.table);
            render_conditions(" ON ", &join.on, &mut sql, &mut params);
        }
        render_conditions(" WHERE ", &self.filter, &mut sql, &mut params);
        if !self.order_by.is_empty() {
            sql.push_str(" ORDER BY ");
            sql.push_str(&self.order_by.join(", "));
        }
        if let Some(limit) = self.limit {
            sql.push_str(&format!(" LIMIT {limit}"));
        }
        Statement::new(sql, params)
    }
}

/// INSERT builder for a single row.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Insert {
    table: String,
    values: Vec<(String, Value)>,
}

impl Insert {
    pub fn into(table: impl Into<String>) -> Self {
        Self {
            table: table.into(),
            values: Vec::new(),
        }
    }

    pub fn value(mut self, column: impl Into<String>, value: impl Into<Value>) -> Self {
        self.values.push((column.into(), value.into()));
        self
    }

    pub fn build(&self) -> Statement {
        let columns: Vec<&str> = self.values.iter().map(|(c, _)| c.as_str()).collect();
        let placeholders = vec!["?"; self.values.len()].join(", ");
        Statement::new(
            format!(
                "INSERT INTO {} ({}) VALUES ({})",
                self.table,
                columns.join(", "),
                placeholders
            ),
            self.values.iter().map(|(_, v)| v.clone()).collect(),
        )
    }
}

/// UPDATE builder.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Update {
    table: String,
    set: Vec<(String, Value)>,
    filter: Vec<Condition>,
}

impl Update {
    pub fn table(table: impl Into<String>) -> Self {
        Self {
            table: table.into(),
            set: Vec::new(),
            filter: Vec::new(),
        }
    }

    pub fn set(mut self, column: impl Into<String>, value: impl Into<Value>) -> Self {
        self.set.push((column.into(), value.into()));
        self
    }

    pub fn filter(mut self, condition: Condition) -> Self {
        self.filter.push(condition);
        self
    }

    pub fn build(&self) -> Statement {
        let mut sql = format!("UPDATE {} SET ", self.table);
        let mut params = Vec::new();
        let assignments: Vec<String> = self.set.iter().map(|(c, _)| format!("{c} = ?")).collect();
        sql.push_str(&assignments.join(", "));
        params.extend(self.set.iter().map(|(_, v)| v.clone()));
        render_conditions(" WHERE ", &self.filter, &mut sql, &mut params);
        Statement::new(sql, params)
    }
}

/// DELETE builder.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Delete {
    table: String,
    filter: Vec<Condition>,
}

impl Delete {
    pub fn from(table: impl Into<String>) -> Self {
        Self {
            table: table.into(),
            filter: Vec::new(),
        }
    }

    pub fn filter(mut self, condition: Condition) -> Self {
        self.filter.push(condition);
        self
    }

    pub fn build(&self) -> Statement {
        let mut sql = format!("DELETE FROM {}", self.table);
        let mut params = Vec::new();
        render_conditions(" WHERE ", &self.filter, &mut sql, &mut params);
        Statement::new(sql, params)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_select_with_joins_collects_params_in_text_order() {
        let stmt = Select::from("node n")
            .columns(["n.title", "f.field_ram_value"])
            .join(
                "field_data_field_ram f",
                vec![
                    Condition::columns("f.entity_id", "n.nid"),
                    Condition::eq("f.entity_type", "node"),
                    Condition::eq("f.deleted", 0),
                ],
            )
            .filter(Condition::eq("n.type", "server"))
            .order_by("n.title")
            .order_by("f.delta")
            .build();

        assert_eq!(
            stmt.sql(),
            "SELECT n.title, f.field_ram_value FROM node n \
             INNER JOIN field_data_field_ram f ON f.entity_id = n.nid \
             AND f.entity_type = ? AND f.deleted = ? \
             WHERE n.type = ? ORDER BY n.title, f.delta"
        );
        assert_eq!(
            stmt.params(),
            &[Value::from("node"), Value::Int(0), Value::from("server")]
        );
    }

    #[test]
    fn test_null_renders_is_null() {
        let stmt = Select::from("t")
            .column("a")
            .filter(Condition::eq("b", Value::Null))
            .filter(Condition::raw("c > 1"))
            .limit(2)
            .build();
        assert_eq!(stmt.sql(), "SELECT a FROM t WHERE b IS NULL AND (c > 1) LIMIT 2");
        assert!(stmt.params().is_empty());
    }

    #[test]
    fn test_write_builders() {
        let insert = Insert::into("servers")
            .value("tag", "srv1")
            .value("ram", 16384)
            .build();
        assert_eq!(insert.sql(), "INSERT INTO servers (tag, ram) VALUES (?, ?)");
        assert_eq!(insert.params(), &[Value::from("srv1"), Value::Int(16384)]);

        let update = Update::table("servers")
            .set("ram", 1)
            .filter(Condition::eq("tag", "srv1"))
            .build();
        assert_eq!(update.sql(), "UPDATE servers SET ram = ? WHERE tag = ?");
        assert_eq!(update.params(), &[Value::Int(1), Value::from("srv1")]);

        let delete = Delete::from("servers")
            .filter(Condition::eq("tag", "srv1"))
            .build();
        assert_eq!(delete.sql(), "DELETE FROM servers WHERE tag = ?");
        assert_eq!(delete.to_string(), "DELETE FROM servers WHERE tag = ? [srv1]");
    }
}

//! Relational codec: positional binds, positional extraction, and SQL text.
//!
//! The database itself is reached through the narrow [`Connection`] contract
//! below. Positions are 1-based, as in JDBC, and always follow the schema's
//! declared order starting after a caller-supplied offset.

use std::sync::Arc;

use chrono::NaiveDateTime;
use itertools::Itertools;
use log::{debug, warn};

use crate::{
    error::Result,
    field::{FieldDescriptor, FieldId, FieldKind, Value},
    record::Record,
    schema::Schema,
};

/// Trailing column holding the load timestamp of every row.
pub const LOAD_DATE_COLUMN: &str = "lddate";
/// Server-side "now" used by literal inserts.
pub const NOW_KEYWORD: &str = "SYSDATE";

const UNBOUNDED_TEXT_WIDTH: usize = 4000;
const UNBOUNDED_INTEGER_DIGITS: usize = 19;
const FLOAT_SQL_TYPE: &str = "float(24)";

#[derive(Debug, Clone, PartialEq)]
pub enum SqlValue {
    Integer(i64),
    Float(f64),
    Text(String),
    Timestamp(NaiveDateTime),
}

impl From<&Value> for SqlValue {
    fn from(value: &Value) -> Self {
        match value {
            Value::Integer(i) => SqlValue::Integer(*i),
            Value::Float(f) => SqlValue::Float(*f),
            Value::Text(s) => SqlValue::Text(s.clone()),
        }
    }
}

/// One row of a result set. `None` stands for SQL NULL.
pub trait Row {
    fn get_integer(&self, position: usize) -> Result<Option<i64>>;
    fn get_float(&self, position: usize) -> Result<Option<f64>>;
    fn get_text(&self, position: usize) -> Result<Option<String>>;
}

pub trait Rows {
    type Row: Row;

    fn next_row(&mut self) -> Result<Option<Self::Row>>;
}

pub trait Statement {
    fn bind(&mut self, position: usize, value: SqlValue) -> Result<()>;
    fn add_batch(&mut self) -> Result<()>;
    /// Executes every batched row, returning the number of rows affected.
    fn execute_batch(&mut self) -> Result<usize>;
}

/// Transport contract. Statements and cursors release their resources when
/// dropped.
pub trait Connection {
    type Statement: Statement;
    type Rows: Rows;

    fn prepare(&mut self, sql: &str) -> Result<Self::Statement>;
    fn query(&mut self, sql: &str) -> Result<Self::Rows>;
    fn execute(&mut self, sql: &str) -> Result<usize>;
    fn commit(&mut self) -> Result<()>;
    fn rollback(&mut self) -> Result<()>;
}

/// The record's values in declared order followed by the load date.
pub fn row_values(record: &Record, load_date: NaiveDateTime) -> Vec<SqlValue> {
    record
        .values()
        .iter()
        .map(SqlValue::from)
        .chain(std::iter::once(SqlValue::Timestamp(load_date)))
        .collect()
}

/// Binds the record at `offset + 1..` plus the load date, then adds the row
/// to the statement's batch.
pub fn bind_insert<S: Statement>(
    statement: &mut S,
    record: &Record,
    offset: usize,
    load_date: NaiveDateTime,
) -> Result<()> {
    for (idx, value) in row_values(record, load_date).into_iter().enumerate() {
        statement.bind(offset + idx + 1, value)?;
    }
    statement.add_batch()
}

/// Builds a record from the columns at `offset + 1..` of `row`.
pub fn extract<R: Row>(row: &R, schema: &Arc<Schema>, offset: usize) -> Result<Record> {
    let mut record = Record::new(Arc::clone(schema));
    for (id, field) in schema.field_ids().zip(schema.fields()) {
        let position = offset + id.index() + 1;
        let value = match field.kind {
            FieldKind::Integer => row.get_integer(position)?.map(Value::Integer),
            FieldKind::Float => row.get_float(position)?.map(Value::Float),
            FieldKind::Text => row.get_text(position)?.map(Value::Text),
        };
        if let Some(value) = value {
            record.set(id, value)?;
        }
    }
    Ok(record)
}

/// `insert into T values (?,?,...)` with one placeholder per field plus the
/// load date.
pub fn prepared_insert_sql(schema: &Schema, table: &str) -> String {
    let placeholders = std::iter::repeat_n("?", schema.len() + 1).join(",");
    format!("insert into {table} values ({placeholders})")
}

/// A literal insert statement. Text is single-quoted without escaping.
pub fn render_insert_statement(record: &Record, table: &str) -> String {
    let schema = record.schema();
    let columns = schema
        .column_names()
        .into_iter()
        .chain(std::iter::once(LOAD_DATE_COLUMN))
        .join(", ");
    let values = record
        .values()
        .iter()
        .map(|value| match value {
            Value::Integer(i) => i.to_string(),
            Value::Float(f) => format!("{f:?}"),
            Value::Text(s) => format!("'{s}'"),
        })
        .chain(std::iter::once(NOW_KEYWORD.to_string()))
        .join(", ");
    format!("insert into {table} ({columns}) values ({values})")
}

/// Column type derived from the descriptor unless it declares one.
pub fn sql_type(field: &FieldDescriptor) -> String {
    if let Some(explicit) = &field.sql_type {
        return explicit.clone();
    }
    match field.kind {
        FieldKind::Integer => {
            let digits = field
                .max_magnitude
                .map(|bound| format!("{:.0}", (bound - 1.0).abs().max(1.0)).len())
                .unwrap_or(UNBOUNDED_INTEGER_DIGITS);
            format!("number({digits})")
        }
        FieldKind::Float => FLOAT_SQL_TYPE.to_string(),
        FieldKind::Text => format!(
            "varchar2({})",
            field.max_length.unwrap_or(UNBOUNDED_TEXT_WIDTH)
        ),
    }
}

/// The table script: create, optional key constraints, then a read grant.
///
/// A key constraint is emitted only when requested and the schema declares
/// that key.
pub fn render_create_table(
    schema: &Schema,
    table: &str,
    with_primary_key: bool,
    with_unique_key: bool,
) -> Vec<String> {
    let columns = schema
        .fields()
        .iter()
        .map(|field| column_line(&field.name, &sql_type(field)))
        .chain(std::iter::once(column_line(LOAD_DATE_COLUMN, "date")))
        .join(",\n");
    let mut script = vec![format!("create table {table} (\n{columns}\n)")];

    let constraint = table.rsplit('.').next().unwrap_or(table);
    let key_names = |ids: &[FieldId]| {
        ids.iter()
            .filter_map(|id| schema.fields().get(id.index()))
            .map(|field| field.name.as_str())
            .join(",")
    };
    if with_primary_key && !schema.primary_key().is_empty() {
        script.push(format!(
            "alter table {table} add constraint {constraint}_pk primary key ({})",
            key_names(schema.primary_key())
        ));
    }
    if with_unique_key && !schema.unique_key().is_empty() {
        script.push(format!(
            "alter table {table} add constraint {constraint}_uk unique ({})",
            key_names(schema.unique_key())
        ));
    }
    script.push(format!("grant select on {table} to public"));
    script
}

fn column_line(name: &str, sql_type: &str) -> String {
    format!("{name:<12} {sql_type:<20} NOT NULL")
}

/// Inserts every record as one batch, committing afterwards when asked.
///
/// If anything fails while `commit` is set, the transaction is rolled back
/// before the original error is returned.
pub fn insert_all<'r, C, I>(
    connection: &mut C,
    table: &str,
    records: I,
    load_date: NaiveDateTime,
    commit: bool,
) -> Result<usize>
where
    C: Connection,
    I: IntoIterator<Item = &'r Record>,
{
    let mut records = records.into_iter().peekable();
    let Some(first) = records.peek() else {
        return Ok(0);
    };
    let sql = prepared_insert_sql(first.schema(), table);
    match insert_batch(connection, &sql, records, load_date, commit) {
        Ok(rows) => {
            debug!("Inserted {rows} row(s) into {table}");
            Ok(rows)
        }
        Err(err) => {
            if commit && let Err(rollback_err) = connection.rollback() {
                warn!("Rollback of {table} failed: {rollback_err}");
            }
            Err(err)
        }
    }
}

fn insert_batch<'r, C: Connection>(
    connection: &mut C,
    sql: &str,
    records: impl Iterator<Item = &'r Record>,
    load_date: NaiveDateTime,
    commit: bool,
) -> Result<usize> {
    let rows = {
        let mut statement = connection.prepare(sql)?;
        for record in records {
            bind_insert(&mut statement, record, 0, load_date)?;
        }
        statement.execute_batch()?
    };
    if commit {
        connection.commit()?;
    }
    Ok(rows)
}

/// Executes the table script statement by statement.
pub fn create_table<C: Connection>(
    connection: &mut C,
    schema: &Schema,
    table: &str,
    with_primary_key: bool,
    with_unique_key: bool,
) -> Result<()> {
    for statement in render_create_table(schema, table, with_primary_key, with_unique_key) {
        connection.execute(&statement)?;
    }
    Ok(())
}

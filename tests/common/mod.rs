#![allow(dead_code)]

use std::{
    cell::RefCell,
    collections::{HashMap, VecDeque},
    fs::File,
    io::{self, Write},
    path::{Path, PathBuf},
    rc::Rc,
    sync::Arc,
};

use rowcodec::{
    error::{CodecError, Result},
    relational::{Connection, Row, Rows, SqlValue, Statement},
    FieldDescriptor, Schema,
};
use tempfile::{TempDir, tempdir};

/// Scratch directory helper that cleans up files automatically on drop.
pub struct TestWorkspace {
    temp_dir: TempDir,
}

impl TestWorkspace {
    pub fn new() -> Self {
        Self {
            temp_dir: tempdir().expect("temp dir"),
        }
    }

    pub fn path(&self) -> &Path {
        self.temp_dir.path()
    }

    /// Writes `contents` into a file under the workspace and returns the path.
    pub fn write(&self, name: &str, contents: &str) -> PathBuf {
        let path = self.temp_dir.path().join(name);
        let mut file = File::create(&path).expect("create temp file");
        file.write_all(contents.as_bytes())
            .expect("write temp file contents");
        path
    }

    pub fn file(&self, name: &str) -> PathBuf {
        self.temp_dir.path().join(name)
    }
}

/// `id` (required integer) and `label` (text, at most six characters).
pub fn id_label_schema() -> Arc<Schema> {
    let mut builder = Schema::builder("item");
    builder
        .register_field(FieldDescriptor::integer("id").max_magnitude(1e9))
        .expect("id field");
    builder
        .register_field(FieldDescriptor::text("label", 6))
        .expect("label field");
    builder.primary_key(["id"]);
    builder.build().expect("item schema").into_shared()
}

pub const NETMAG_LINES: &str = "\
1 IDC 100 -1 mb 12 4.50 0.10 IDC -1
2 - 101 - ml 5 3.20 -1.00 - -
";

/// Shared state behind [`MemoryConnection`]: committed tables, rows waiting
/// for a commit, and counters the tests assert on.
#[derive(Debug, Default)]
pub struct Database {
    pub tables: HashMap<String, Vec<Vec<SqlValue>>>,
    pub pending: Vec<(String, Vec<SqlValue>)>,
    pub executed: Vec<String>,
    pub prepared: Vec<String>,
    pub commits: usize,
    pub rollbacks: usize,
    pub open_statements: usize,
    /// Makes `execute_batch` fail when the batch holds more rows than this.
    pub fail_after_rows: Option<usize>,
}

#[derive(Clone, Default)]
pub struct MemoryConnection {
    state: Rc<RefCell<Database>>,
}

impl MemoryConnection {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn state(&self) -> std::cell::Ref<'_, Database> {
        self.state.borrow()
    }

    pub fn state_mut(&self) -> std::cell::RefMut<'_, Database> {
        self.state.borrow_mut()
    }
}

fn table_of(sql: &str, keyword: &str) -> Result<String> {
    let mut words = sql.split_whitespace();
    words
        .by_ref()
        .find(|word| word.eq_ignore_ascii_case(keyword))
        .and_then(|_| words.next())
        .map(str::to_string)
        .ok_or_else(|| {
            CodecError::transport(
                format!("Unsupported statement: {sql}"),
                io::Error::other("no table name"),
            )
        })
}

impl Connection for MemoryConnection {
    type Statement = MemoryStatement;
    type Rows = MemoryRows;

    fn prepare(&mut self, sql: &str) -> Result<MemoryStatement> {
        let table = table_of(sql, "into")?;
        let mut state = self.state.borrow_mut();
        state.prepared.push(sql.to_string());
        state.open_statements += 1;
        Ok(MemoryStatement {
            state: Rc::clone(&self.state),
            table,
            current: Vec::new(),
            batch: Vec::new(),
        })
    }

    fn query(&mut self, sql: &str) -> Result<MemoryRows> {
        let table = table_of(sql, "from")?;
        let rows = self
            .state
            .borrow()
            .tables
            .get(&table)
            .cloned()
            .unwrap_or_default();
        Ok(MemoryRows { rows: rows.into() })
    }

    fn execute(&mut self, sql: &str) -> Result<usize> {
        self.state.borrow_mut().executed.push(sql.to_string());
        Ok(0)
    }

    fn commit(&mut self) -> Result<()> {
        let mut state = self.state.borrow_mut();
        state.commits += 1;
        let pending = std::mem::take(&mut state.pending);
        for (table, row) in pending {
            state.tables.entry(table).or_default().push(row);
        }
        Ok(())
    }

    fn rollback(&mut self) -> Result<()> {
        let mut state = self.state.borrow_mut();
        state.rollbacks += 1;
        state.pending.clear();
        Ok(())
    }
}

pub struct MemoryStatement {
    state: Rc<RefCell<Database>>,
    table: String,
    current: Vec<Option<SqlValue>>,
    batch: Vec<Vec<SqlValue>>,
}

impl Statement for MemoryStatement {
    fn bind(&mut self, position: usize, value: SqlValue) -> Result<()> {
        if self.current.len() < position {
            self.current.resize(position, None);
        }
        self.current[position - 1] = Some(value);
        Ok(())
    }

    fn add_batch(&mut self) -> Result<()> {
        let row = std::mem::take(&mut self.current)
            .into_iter()
            .collect::<Option<Vec<_>>>()
            .ok_or_else(|| {
                CodecError::transport("Adding batch", io::Error::other("unbound parameter"))
            })?;
        self.batch.push(row);
        Ok(())
    }

    fn execute_batch(&mut self) -> Result<usize> {
        let mut state = self.state.borrow_mut();
        if let Some(limit) = state.fail_after_rows
            && self.batch.len() > limit
        {
            return Err(CodecError::transport(
                "Executing batch",
                io::Error::other("unique constraint violated"),
            ));
        }
        let rows = self.batch.len();
        for row in self.batch.drain(..) {
            state.pending.push((self.table.clone(), row));
        }
        Ok(rows)
    }
}

impl Drop for MemoryStatement {
    fn drop(&mut self) {
        self.state.borrow_mut().open_statements -= 1;
    }
}

pub struct MemoryRows {
    rows: VecDeque<Vec<SqlValue>>,
}

impl Rows for MemoryRows {
    type Row = MemoryRow;

    fn next_row(&mut self) -> Result<Option<MemoryRow>> {
        Ok(self.rows.pop_front().map(MemoryRow))
    }
}

pub struct MemoryRow(Vec<SqlValue>);

impl MemoryRow {
    fn at(&self, position: usize) -> Option<&SqlValue> {
        self.0.get(position - 1)
    }
}

impl Row for MemoryRow {
    fn get_integer(&self, position: usize) -> Result<Option<i64>> {
        Ok(match self.at(position) {
            Some(SqlValue::Integer(i)) => Some(*i),
            _ => None,
        })
    }

    fn get_float(&self, position: usize) -> Result<Option<f64>> {
        Ok(match self.at(position) {
            Some(SqlValue::Float(f)) => Some(*f),
            _ => None,
        })
    }

    fn get_text(&self, position: usize) -> Result<Option<String>> {
        Ok(match self.at(position) {
            Some(SqlValue::Text(s)) => Some(s.clone()),
            _ => None,
        })
    }
}

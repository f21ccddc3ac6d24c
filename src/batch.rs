//! Batch reads and writes over files, streams, and connections.
//!
//! Readers collect into any `FromIterator` destination: a `Vec<Record>`
//! keeps duplicates, a `HashSet<ByPrimaryKey>` or `HashSet<ByUniqueKey>`
//! keeps one record per key. Every reader stops at the first failing record;
//! [`scan_text`] is the lenient variant that collects failures instead.

use std::{
    collections::HashSet,
    fs::File,
    hash::Hash,
    io::{BufRead, BufReader, BufWriter, Write},
    path::Path,
    sync::Arc,
};

use chrono::NaiveDateTime;
use log::{debug, info};

use crate::{
    binary::BinaryCodec,
    error::{CodecError, Result},
    record::{ByPrimaryKey, ByUniqueKey, Record},
    relational::{self, Connection, Rows},
    schema::{ColumnOrder, Schema},
    text::TextCodec,
};

pub fn read_text<C, T, R>(
    codec: &TextCodec,
    schema: &Arc<Schema>,
    reader: R,
    order: &ColumnOrder,
) -> Result<C>
where
    C: FromIterator<T>,
    T: From<Record>,
    R: BufRead,
{
    codec
        .records(Arc::clone(schema), reader, order.clone())
        .map(|record| record.map(T::from))
        .collect()
}

pub fn read_text_file<C, T>(
    codec: &TextCodec,
    schema: &Arc<Schema>,
    path: &Path,
    order: &ColumnOrder,
) -> Result<C>
where
    C: FromIterator<T>,
    T: From<Record>,
{
    let file = File::open(path)
        .map_err(|err| CodecError::transport(format!("Opening {}", path.display()), err))?;
    debug!("Reading {} records from {}", schema.kind(), path.display());
    read_text(codec, schema, BufReader::new(file), order)
}

/// Writes an optional header line followed by one line per record.
pub fn write_text<'r, W, I>(
    codec: &TextCodec,
    writer: &mut W,
    schema: &Schema,
    order: &ColumnOrder,
    records: I,
    header: bool,
) -> Result<usize>
where
    W: Write,
    I: IntoIterator<Item = &'r Record>,
{
    let io_error = |err| CodecError::transport("Writing text records", err);
    if header {
        writeln!(writer, "{}", codec.encode_header(schema, order)).map_err(io_error)?;
    }
    let mut written = 0;
    for record in records {
        let line = codec.encode_line(record, order)?;
        writeln!(writer, "{line}").map_err(io_error)?;
        written += 1;
    }
    writer.flush().map_err(io_error)?;
    Ok(written)
}

pub fn write_text_file<'r, I>(
    codec: &TextCodec,
    path: &Path,
    schema: &Schema,
    order: &ColumnOrder,
    records: I,
) -> Result<usize>
where
    I: IntoIterator<Item = &'r Record>,
{
    let file = File::create(path)
        .map_err(|err| CodecError::transport(format!("Creating {}", path.display()), err))?;
    let mut writer = BufWriter::new(file);
    let written = write_text(codec, &mut writer, schema, order, records, true)?;
    info!("Wrote {written} {} record(s) to {}", schema.kind(), path.display());
    Ok(written)
}

pub fn read_binary<C, T, R>(schema: &Arc<Schema>, mut reader: R) -> Result<C>
where
    C: FromIterator<T>,
    T: From<Record>,
    R: BufRead,
{
    let codec = BinaryCodec;
    let mut failed = false;
    std::iter::from_fn(|| {
        if failed {
            return None;
        }
        let at_end = reader.fill_buf().map(|buffer| buffer.is_empty());
        let outcome = match at_end {
            Ok(true) => return None,
            Ok(false) => codec.decode_from(schema, &mut reader),
            Err(err) => Err(CodecError::transport("Reading binary stream", err)),
        };
        failed = outcome.is_err();
        Some(outcome.map(T::from))
    })
    .collect()
}

pub fn write_binary<'r, W, I>(writer: &mut W, records: I) -> Result<usize>
where
    W: Write,
    I: IntoIterator<Item = &'r Record>,
{
    let codec = BinaryCodec;
    let mut bytes = 0;
    for record in records {
        bytes += codec.encode_into(record, writer)?;
    }
    writer
        .flush()
        .map_err(|err| CodecError::transport("Flushing binary stream", err))?;
    Ok(bytes)
}

/// Runs `select_sql` and extracts one record per row, reading columns after
/// `offset`.
pub fn read_relational<C, T, Conn>(
    connection: &mut Conn,
    schema: &Arc<Schema>,
    select_sql: &str,
    offset: usize,
) -> Result<C>
where
    C: FromIterator<T>,
    T: From<Record>,
    Conn: Connection,
{
    let mut rows = connection.query(select_sql)?;
    let mut failed = false;
    std::iter::from_fn(|| {
        if failed {
            return None;
        }
        let outcome = match rows.next_row() {
            Ok(None) => return None,
            Ok(Some(row)) => relational::extract(&row, schema, offset),
            Err(err) => Err(err),
        };
        failed = outcome.is_err();
        Some(outcome.map(T::from))
    })
    .collect()
}

/// Batched insert of every record followed by a single commit when asked.
pub fn write_relational<'r, Conn, I>(
    connection: &mut Conn,
    table: &str,
    records: I,
    load_date: NaiveDateTime,
    commit: bool,
) -> Result<usize>
where
    Conn: Connection,
    I: IntoIterator<Item = &'r Record>,
{
    relational::insert_all(connection, table, records, load_date, commit)
}

/// Keeps the first record for each primary key, preserving order.
pub fn dedupe_by_primary_key(records: Vec<Record>) -> Vec<Record> {
    dedupe_with(records, ByPrimaryKey::from)
}

/// Keeps the first record for each unique key, preserving order.
pub fn dedupe_by_unique_key(records: Vec<Record>) -> Vec<Record> {
    dedupe_with(records, ByUniqueKey::from)
}

fn dedupe_with<K: Hash + Eq>(records: Vec<Record>, key: impl Fn(Record) -> K) -> Vec<Record> {
    let before = records.len();
    let mut seen = HashSet::with_capacity(before);
    let kept: Vec<Record> = records
        .into_iter()
        .filter(|record| seen.insert(key(record.clone())))
        .collect();
    if kept.len() < before {
        debug!("Dropped {} duplicate record(s)", before - kept.len());
    }
    kept
}

/// Outcome of a lenient text read.
#[derive(Debug, Default)]
pub struct ScanReport {
    pub records: Vec<Record>,
    /// Failures in line order, each wrapped with its line number.
    pub failures: Vec<CodecError>,
    pub lines: usize,
}

impl ScanReport {
    pub fn is_clean(&self) -> bool {
        self.failures.is_empty()
    }
}

/// Decodes every line it can, recording the rest as failures. A transport
/// failure ends the scan.
pub fn scan_text<R: BufRead>(
    codec: &TextCodec,
    schema: &Arc<Schema>,
    reader: R,
    order: &ColumnOrder,
) -> ScanReport {
    let mut report = ScanReport::default();
    let mut records = codec.records(Arc::clone(schema), reader, order.clone());
    for outcome in records.by_ref() {
        match outcome {
            Ok(record) => report.records.push(record),
            Err(err @ CodecError::Transport { .. }) => {
                report.failures.push(err);
                break;
            }
            Err(err) => report.failures.push(err),
        }
    }
    report.lines = records.line_number();
    report
}

#[cfg(test)]
mod tests {
    use std::io::Cursor;

    use super::*;
    use crate::field::FieldDescriptor;

    fn schema() -> Arc<Schema> {
        let mut builder = Schema::builder("wftag");
        builder
            .register_field(FieldDescriptor::text("tagname", 8))
            .unwrap();
        builder
            .register_field(FieldDescriptor::integer("tagid"))
            .unwrap();
        builder
            .register_field(FieldDescriptor::integer("wfid"))
            .unwrap();
        builder.primary_key(["tagname", "tagid", "wfid"]);
        builder.unique_key(["tagid"]);
        builder.build().unwrap().into_shared()
    }

    const INPUT: &str = "evid 1 10\nevid 1 10\narid 1 11\n";

    #[test]
    fn vec_keeps_duplicates_and_sets_do_not() {
        let schema = schema();
        let codec = TextCodec::default();
        let order = schema.natural_order();
        let all: Vec<Record> = read_text(&codec, &schema, Cursor::new(INPUT), &order).unwrap();
        assert_eq!(all.len(), 3);
        let by_pk: HashSet<ByPrimaryKey> =
            read_text(&codec, &schema, Cursor::new(INPUT), &order).unwrap();
        assert_eq!(by_pk.len(), 2);
        let by_uk: HashSet<ByUniqueKey> =
            read_text(&codec, &schema, Cursor::new(INPUT), &order).unwrap();
        assert_eq!(by_uk.len(), 1);
    }

    #[test]
    fn dedupe_preserves_first_occurrence_order() {
        let schema = schema();
        let records: Vec<Record> = read_text(
            &TextCodec::default(),
            &schema,
            Cursor::new("arid 2 1\nevid 1 10\narid 2 1\n"),
            &schema.natural_order(),
        )
        .unwrap();
        let kept = dedupe_by_primary_key(records);
        let names: Vec<&str> = kept.iter().map(|r| r.get_text("tagname").unwrap()).collect();
        assert_eq!(names, vec!["arid", "evid"]);
    }

    #[test]
    fn write_text_emits_header_then_lines() {
        let schema = schema();
        let codec = TextCodec::default();
        let order = schema.output_order(&["wfid", "tagname"]).unwrap();
        let records: Vec<Record> = read_text(
            &codec,
            &schema,
            Cursor::new("evid 1 10\n"),
            &schema.natural_order(),
        )
        .unwrap();
        let mut out = Vec::new();
        let written = write_text(&codec, &mut out, &schema, &order, &records, true).unwrap();
        assert_eq!(written, 1);
        assert_eq!(String::from_utf8(out).unwrap(), "#wfid tagname\n10 evid\n");
    }

    #[test]
    fn binary_batch_round_trips_into_any_collection() {
        let schema = schema();
        let records: Vec<Record> = read_text(
            &TextCodec::default(),
            &schema,
            Cursor::new(INPUT),
            &schema.natural_order(),
        )
        .unwrap();
        let mut stream = Vec::new();
        write_binary(&mut stream, &records).unwrap();
        let back: Vec<Record> = read_binary(&schema, Cursor::new(&stream)).unwrap();
        assert_eq!(back.len(), 3);
        let unique: HashSet<ByUniqueKey> = read_binary(&schema, Cursor::new(&stream)).unwrap();
        assert_eq!(unique.len(), 1);
    }

    #[test]
    fn read_stops_at_first_failure_but_scan_continues() {
        let schema = schema();
        let codec = TextCodec::default();
        let order = schema.natural_order();
        let input = "evid 1 10\nevid x 10\nevid 1\narid 2 11\n";
        let err = read_text::<Vec<Record>, Record, _>(&codec, &schema, Cursor::new(input), &order)
            .unwrap_err();
        assert!(matches!(err, CodecError::AtLine { line: 2, .. }));

        let report = scan_text(&codec, &schema, Cursor::new(input), &order);
        assert_eq!(report.records.len(), 2);
        assert_eq!(report.failures.len(), 2);
        assert_eq!(report.lines, 4);
        assert!(!report.is_clean());
    }
}

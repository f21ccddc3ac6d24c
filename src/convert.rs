//! `convert` command: read records in one representation, write another.

use std::{io::Write, sync::Arc};

use anyhow::{Context, Result, bail};
use log::{debug, info};

use crate::{
    batch,
    cli::{ConvertArgs, DedupeMode, InputFormat, OutputFormat},
    error,
    io_utils,
    record::Record,
    relational,
    schema::{ColumnOrder, Schema},
    text::{Delimiter, TextCodec},
};

pub fn execute(args: &ConvertArgs) -> Result<()> {
    let schema = args.source.load()?;
    let input_delimiter = args.delimiter.clone().unwrap_or_default();
    info!(
        "Converting {} records from {:?} ({:?}) to {:?}",
        schema.kind(),
        args.input,
        args.from,
        args.to
    );

    let records = read_records(args, &schema, &input_delimiter)?;
    let total = records.len();
    let records = match args.dedupe {
        DedupeMode::None => records,
        DedupeMode::Primary => batch::dedupe_by_primary_key(records),
        DedupeMode::Unique => batch::dedupe_by_unique_key(records),
    };
    if records.len() < total {
        info!("Removed {} duplicate record(s)", total - records.len());
    }

    let output_order = if args.output_columns.is_empty() {
        schema.natural_order()
    } else {
        schema
            .output_order(&args.output_columns)
            .context("Resolving --output-columns")?
    };
    let output_delimiter = args
        .output_delimiter
        .clone()
        .unwrap_or(input_delimiter);
    let written = write_records(args, &schema, &records, &output_order, output_delimiter)?;
    info!("Wrote {written} record(s)");
    Ok(())
}

fn read_records(args: &ConvertArgs, schema: &Arc<Schema>, delimiter: &Delimiter) -> Result<Vec<Record>> {
    match args.from {
        InputFormat::Text => {
            let encoding = io_utils::resolve_encoding(args.input_encoding.as_deref())?;
            let order = if args.input_columns.is_empty() {
                schema.natural_order()
            } else {
                schema
                    .input_order(&args.input_columns)
                    .context("Resolving --input-columns")?
            };
            debug!(
                "Text input delimiter '{}', encoding {}",
                delimiter.printable(),
                encoding.name()
            );
            let reader = io_utils::open_text_input(&args.input, encoding)?;
            let codec = TextCodec::new(delimiter.clone());
            batch::read_text(&codec, schema, reader, &order)
                .with_context(|| format!("Reading text records from {:?}", args.input))
        }
        InputFormat::Binary => {
            if !args.input_columns.is_empty() {
                bail!("--input-columns applies to text input only");
            }
            let reader = io_utils::open_binary_input(&args.input)?;
            batch::read_binary(schema, reader)
                .with_context(|| format!("Reading binary records from {:?}", args.input))
        }
    }
}

fn write_records(
    args: &ConvertArgs,
    schema: &Arc<Schema>,
    records: &[Record],
    order: &ColumnOrder,
    delimiter: Delimiter,
) -> Result<usize> {
    let output = args.output.as_deref();
    let text_output = || -> Result<Box<dyn Write>> {
        let encoding = io_utils::resolve_encoding(args.output_encoding.as_deref())?;
        io_utils::open_text_output(output, encoding)
    };
    match args.to {
        OutputFormat::Binary => {
            if !args.output_columns.is_empty() {
                bail!("Binary output always carries every column in declared order");
            }
            let mut writer = io_utils::open_binary_output(output)?;
            let bytes =
                batch::write_binary(&mut writer, records).context("Writing binary records")?;
            debug!("Wrote {bytes} byte(s)");
            Ok(records.len())
        }
        OutputFormat::Text => {
            let codec = TextCodec::new(delimiter);
            let mut writer = text_output()?;
            batch::write_text(&codec, &mut writer, schema, order, records, !args.no_header)
                .context("Writing text records")
        }
        OutputFormat::Csv => write_csv(&mut text_output()?, schema, records, order),
        OutputFormat::Json => write_json(&mut text_output()?, records, order),
        OutputFormat::Sql => {
            let table = args.table.as_deref().unwrap_or(schema.kind());
            let mut writer = text_output()?;
            for record in records {
                writeln!(writer, "{};", relational::render_insert_statement(record, table))
                    .context("Writing SQL statements")?;
            }
            writer.flush().context("Flushing SQL output")?;
            Ok(records.len())
        }
    }
}

fn write_csv<W: Write>(
    writer: &mut W,
    schema: &Schema,
    records: &[Record],
    order: &ColumnOrder,
) -> Result<usize> {
    let mut csv_writer = io_utils::csv_writer(writer, b',');
    csv_writer
        .write_record(order.names(schema))
        .context("Writing CSV header")?;
    for record in records {
        let cells = order
            .fields()
            .iter()
            .map(|id| record.render(*id))
            .collect::<error::Result<Vec<String>>>()?;
        csv_writer.write_record(&cells).context("Writing CSV row")?;
    }
    csv_writer.flush().context("Flushing CSV output")?;
    Ok(records.len())
}

/// One JSON array per line holding the selected values positionally.
fn write_json<W: Write>(writer: &mut W, records: &[Record], order: &ColumnOrder) -> Result<usize> {
    for record in records {
        let values = order
            .fields()
            .iter()
            .map(|id| record.get(*id))
            .collect::<error::Result<Vec<_>>>()?;
        serde_json::to_writer(&mut *writer, &values).context("Serializing record to JSON")?;
        writeln!(writer).context("Writing JSON output")?;
    }
    writer.flush().context("Flushing JSON output")?;
    Ok(records.len())
}

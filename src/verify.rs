use std::{path::Path, sync::Arc};

use anyhow::{Context, Result, bail};
use encoding_rs::Encoding;
use log::{info, warn};

use crate::{
    batch::{self, ScanReport},
    cli::VerifyArgs,
    io_utils,
    schema::{ColumnOrder, Schema},
    text::TextCodec,
};

pub fn execute(args: &VerifyArgs) -> Result<()> {
    let schema = args.source.load()?;
    let encoding = io_utils::resolve_encoding(args.input_encoding.as_deref())?;
    let codec = TextCodec::new(args.delimiter.clone().unwrap_or_default());
    let order = if args.input_columns.is_empty() {
        schema.natural_order()
    } else {
        schema
            .input_order(&args.input_columns)
            .context("Resolving --input-columns")?
    };

    let mut failed_files = 0usize;
    for input in &args.inputs {
        let report = verify_file(&codec, &schema, input, &order, encoding)?;
        if report.is_clean() {
            info!(
                "✓ {:?}: {} {} record(s) verified",
                input,
                report.records.len(),
                schema.kind()
            );
            continue;
        }
        failed_files += 1;
        warn!(
            "✗ {:?}: {} of {} line(s) failed",
            input,
            report.failures.len(),
            report.lines
        );
        let limit = match args.report_limit {
            0 => report.failures.len(),
            n => n,
        };
        for failure in report.failures.iter().take(limit) {
            println!("{}: {failure}", input.display());
        }
        if report.failures.len() > limit {
            println!(
                "{}: ... {} more failure(s)",
                input.display(),
                report.failures.len() - limit
            );
        }
    }
    if failed_files > 0 {
        bail!("{failed_files} file(s) failed verification");
    }
    Ok(())
}

pub fn verify_file(
    codec: &TextCodec,
    schema: &Arc<Schema>,
    path: &Path,
    order: &ColumnOrder,
    encoding: &'static Encoding,
) -> Result<ScanReport> {
    let reader = io_utils::open_text_input(path, encoding)?;
    Ok(batch::scan_text(codec, schema, reader, order))
}

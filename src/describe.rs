//! `columns` and `ddl` commands.

use anyhow::Result;
use log::info;

use crate::{
    cli::{ColumnsArgs, DdlArgs},
    relational, table,
};

pub fn columns(args: &ColumnsArgs) -> Result<()> {
    let schema = args.source.load()?;
    if args.yaml {
        print!("{}", schema.to_yaml_string()?);
        return Ok(());
    }
    info!(
        "{} ({}) with {} column(s)",
        schema.display_name(),
        schema.source(),
        schema.len()
    );
    print!("{}", table::render_schema(&schema));
    match schema.max_encoded_size() {
        Some(size) => println!("max encoded size: {size} bytes"),
        None => println!("max encoded size: unbounded"),
    }
    Ok(())
}

pub fn ddl(args: &DdlArgs) -> Result<()> {
    let schema = args.source.load()?;
    let table = args.table.as_deref().unwrap_or(schema.kind());
    for statement in relational::render_create_table(
        &schema,
        table,
        !args.no_primary_key,
        !args.no_unique_key,
    ) {
        println!("{statement};");
    }
    Ok(())
}

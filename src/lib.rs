pub mod batch;
pub mod binary;
pub mod catalog;
pub mod cli;
pub mod convert;
pub mod describe;
pub mod error;
pub mod field;
pub mod format;
pub mod io_utils;
pub mod record;
pub mod relational;
pub mod schema;
pub mod table;
pub mod text;
pub mod verify;

use std::{env, sync::OnceLock};

use anyhow::Result;
use clap::Parser;
use log::{LevelFilter, debug};

use crate::cli::{Cli, Commands};

pub use crate::{
    binary::BinaryCodec,
    error::CodecError,
    field::{FieldDescriptor, FieldId, FieldKind, Value},
    format::FormatSpec,
    record::{ByPrimaryKey, ByUniqueKey, Record},
    schema::{ColumnOrder, ColumnOrders, Schema, SchemaBuilder},
    text::{Delimiter, TextCodec},
};

static LOGGER: OnceLock<()> = OnceLock::new();

fn init_logging() {
    LOGGER.get_or_init(|| {
        let mut builder = env_logger::Builder::from_env(env_logger::Env::default());
        if env::var("RUST_LOG").is_err() {
            builder.filter_module("rowcodec", LevelFilter::Info);
        }
        let _ = builder.format_timestamp_millis().try_init();
    });
}

pub fn run() -> Result<()> {
    init_logging();
    let cli = Cli::parse();
    debug!("{:?}", cli.command);
    match cli.command {
        Commands::Columns(args) => describe::columns(&args),
        Commands::Convert(args) => convert::execute(&args),
        Commands::Ddl(args) => describe::ddl(&args),
        Commands::Verify(args) => verify::execute(&args),
    }
}

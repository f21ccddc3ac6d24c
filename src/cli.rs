use std::{path::PathBuf, sync::Arc};

use anyhow::{Context, Result};
use clap::{Args, Parser, Subcommand, ValueEnum};

use crate::{catalog, schema::Schema, text::Delimiter};

#[derive(Debug, Parser)]
#[command(
    author,
    version,
    about = "Convert flat records between text, binary, and SQL representations",
    long_about = None
)]
pub struct Cli {
    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Debug, Subcommand)]
pub enum Commands {
    /// Describe the columns of a record kind
    Columns(ColumnsArgs),
    /// Convert records from one representation to another
    Convert(ConvertArgs),
    /// Print the CREATE TABLE script for a record kind
    Ddl(DdlArgs),
    /// Verify one or more text files against a record kind
    Verify(VerifyArgs),
}

/// Where the record schema comes from.
#[derive(Debug, Args)]
pub struct SchemaSource {
    /// Built-in record kind (gregion, netmag, site, stamag, wftag)
    #[arg(short, long, conflicts_with = "schema", required_unless_present = "schema")]
    pub kind: Option<String>,
    /// YAML schema definition file
    #[arg(short, long)]
    pub schema: Option<PathBuf>,
}

impl SchemaSource {
    pub fn load(&self) -> Result<Arc<Schema>> {
        match (&self.kind, &self.schema) {
            (_, Some(path)) => Schema::load(path)
                .map(Schema::into_shared)
                .with_context(|| format!("Loading schema from {path:?}")),
            (Some(kind), None) => catalog::schema(kind),
            (None, None) => anyhow::bail!("Either --kind or --schema is required"),
        }
    }
}

#[derive(Debug, Args)]
pub struct ColumnsArgs {
    #[command(flatten)]
    pub source: SchemaSource,
    /// Emit the schema definition as YAML instead of a table
    #[arg(long)]
    pub yaml: bool,
}

#[derive(Debug, Args)]
pub struct ConvertArgs {
    #[command(flatten)]
    pub source: SchemaSource,
    /// Input file ('-' for stdin)
    #[arg(short, long, default_value = "-")]
    pub input: PathBuf,
    /// Output file (stdout when omitted)
    #[arg(short, long)]
    pub output: Option<PathBuf>,
    /// Representation of the input
    #[arg(long, value_enum, default_value = "text")]
    pub from: InputFormat,
    /// Representation of the output
    #[arg(long, value_enum, default_value = "text")]
    pub to: OutputFormat,
    /// Column order of text input when it carries no header line
    #[arg(long = "input-columns", value_delimiter = ',')]
    pub input_columns: Vec<String>,
    /// Columns to write, in order (defaults to every column)
    #[arg(short = 'C', long = "output-columns", value_delimiter = ',')]
    pub output_columns: Vec<String>,
    /// Text input delimiter: 'whitespace', 'tab', 'comma', or literal text
    #[arg(long, value_parser = parse_delimiter)]
    pub delimiter: Option<Delimiter>,
    /// Text output delimiter (defaults to the input delimiter)
    #[arg(long = "output-delimiter", value_parser = parse_delimiter)]
    pub output_delimiter: Option<Delimiter>,
    /// Character encoding of text input (defaults to utf-8)
    #[arg(long = "input-encoding")]
    pub input_encoding: Option<String>,
    /// Character encoding of text output (defaults to utf-8)
    #[arg(long = "output-encoding")]
    pub output_encoding: Option<String>,
    /// Drop records sharing a key with an earlier record
    #[arg(long, value_enum, default_value = "none")]
    pub dedupe: DedupeMode,
    /// Table name used by SQL output (defaults to the record kind)
    #[arg(long)]
    pub table: Option<String>,
    /// Omit the header line from text output
    #[arg(long = "no-header")]
    pub no_header: bool,
}

#[derive(Debug, Args)]
pub struct DdlArgs {
    #[command(flatten)]
    pub source: SchemaSource,
    /// Table name (defaults to the record kind)
    #[arg(long)]
    pub table: Option<String>,
    /// Skip the primary key constraint
    #[arg(long = "no-primary-key")]
    pub no_primary_key: bool,
    /// Skip the unique key constraint
    #[arg(long = "no-unique-key")]
    pub no_unique_key: bool,
}

#[derive(Debug, Args)]
pub struct VerifyArgs {
    #[command(flatten)]
    pub source: SchemaSource,
    /// Text files to verify
    #[arg(short = 'i', long = "input", required = true, action = clap::ArgAction::Append)]
    pub inputs: Vec<PathBuf>,
    /// Column order of files that carry no header line
    #[arg(long = "input-columns", value_delimiter = ',')]
    pub input_columns: Vec<String>,
    /// Text delimiter: 'whitespace', 'tab', 'comma', or literal text
    #[arg(long, value_parser = parse_delimiter)]
    pub delimiter: Option<Delimiter>,
    /// Character encoding of the input files (defaults to utf-8)
    #[arg(long = "input-encoding")]
    pub input_encoding: Option<String>,
    /// Number of failing lines to report per file (0 reports all)
    #[arg(long = "report-limit", default_value_t = 20)]
    pub report_limit: usize,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
pub enum InputFormat {
    Text,
    Binary,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
pub enum OutputFormat {
    Text,
    Binary,
    Csv,
    Json,
    Sql,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
pub enum DedupeMode {
    None,
    Primary,
    Unique,
}

pub fn parse_delimiter(value: &str) -> Result<Delimiter, String> {
    match value {
        "" => Err("Delimiter cannot be empty".to_string()),
        "whitespace" | "space" | " " => Ok(Delimiter::Whitespace),
        "\\t" => Ok(Delimiter::Literal("\t".to_string())),
        "pipe" => Ok(Delimiter::Literal("|".to_string())),
        "semicolon" => Ok(Delimiter::Literal(";".to_string())),
        other => Ok(Delimiter::from_spec(other)),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn delimiter_words_resolve() {
        assert_eq!(parse_delimiter("whitespace").unwrap(), Delimiter::Whitespace);
        assert_eq!(parse_delimiter("tab").unwrap(), Delimiter::Literal("\t".into()));
        assert_eq!(parse_delimiter("\\t").unwrap(), Delimiter::Literal("\t".into()));
        assert_eq!(parse_delimiter("pipe").unwrap(), Delimiter::Literal("|".into()));
        assert_eq!(
            parse_delimiter("comma tab").unwrap(),
            Delimiter::Literal(",\t".into())
        );
        assert!(parse_delimiter("").is_err());
    }

    #[test]
    fn kind_and_schema_are_exclusive() {
        assert!(Cli::try_parse_from(["rowcodec", "columns"]).is_err());
        assert!(
            Cli::try_parse_from(["rowcodec", "columns", "--kind", "site", "--schema", "x.yml"])
                .is_err()
        );
        let cli = Cli::try_parse_from(["rowcodec", "ddl", "--kind", "site"]).unwrap();
        assert!(matches!(cli.command, Commands::Ddl(_)));
    }

    #[test]
    fn convert_defaults_to_text_on_stdin() {
        let cli = Cli::try_parse_from(["rowcodec", "convert", "-k", "netmag"]).unwrap();
        let Commands::Convert(args) = cli.command else {
            panic!("expected convert");
        };
        assert_eq!(args.from, InputFormat::Text);
        assert_eq!(args.to, OutputFormat::Text);
        assert_eq!(args.input, PathBuf::from("-"));
        assert_eq!(args.dedupe, DedupeMode::None);
    }
}

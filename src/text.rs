//! Delimited text codec.
//!
//! One record per line. Tokens are separated by runs of whitespace or by a
//! literal delimiter; tokens wrapped in paired single or double quotes are
//! kept whole. A stream may start with a `#name name ...` header line that
//! selects the input column order for that stream alone.

use std::{
    io::{BufRead, Lines},
    str::FromStr,
    sync::{Arc, OnceLock},
};

use itertools::Itertools;
use log::debug;
use regex::Regex;

use crate::{
    error::{CodecError, Result},
    field::{FieldId, FieldKind, Value},
    record::Record,
    schema::{ColumnOrder, Schema},
};

pub const COMMENT_MARKER: char = '#';

static TOKEN_PATTERN: OnceLock<Regex> = OnceLock::new();

fn token_pattern() -> &'static Regex {
    TOKEN_PATTERN.get_or_init(|| {
        Regex::new(r#""[^"]*"|'[^']*'|\S+"#).expect("token pattern is valid")
    })
}

#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub enum Delimiter {
    /// Runs of whitespace on input, a single space on output.
    #[default]
    Whitespace,
    Literal(String),
}

impl Delimiter {
    /// Builds a delimiter from words such as `"comma tab"`.
    ///
    /// `tab`, `comma`, and `space` name those characters; any other word is
    /// taken literally. An empty spec means tab.
    pub fn from_spec(spec: &str) -> Self {
        let assembled: String = spec
            .split(' ')
            .filter(|word| !word.is_empty())
            .map(|word| match word.to_ascii_lowercase().as_str() {
                "tab" => "\t".to_string(),
                "comma" => ",".to_string(),
                "space" => " ".to_string(),
                "whitespace" => " ".to_string(),
                _ => word.replace("\\t", "\t"),
            })
            .collect();
        match assembled.as_str() {
            "" => Delimiter::Literal("\t".to_string()),
            " " => Delimiter::Whitespace,
            _ => Delimiter::Literal(assembled),
        }
    }

    pub fn as_output(&self) -> &str {
        match self {
            Delimiter::Whitespace => " ",
            Delimiter::Literal(text) => text,
        }
    }

    pub fn printable(&self) -> String {
        match self {
            Delimiter::Whitespace => "whitespace".to_string(),
            Delimiter::Literal(text) => text.replace('\t', "\\t"),
        }
    }

    fn splits(&self, value: &str) -> bool {
        match self {
            Delimiter::Whitespace => value.chars().any(char::is_whitespace),
            Delimiter::Literal(text) => value.contains(text.as_str()),
        }
    }
}

impl FromStr for Delimiter {
    type Err = String;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        if s.is_empty() {
            return Err("delimiter cannot be empty".to_string());
        }
        Ok(Delimiter::from_spec(s))
    }
}

#[derive(Debug, Clone, Default)]
pub struct TextCodec {
    delimiter: Delimiter,
}

impl TextCodec {
    pub fn new(delimiter: Delimiter) -> Self {
        TextCodec { delimiter }
    }

    pub fn delimiter(&self) -> &Delimiter {
        &self.delimiter
    }

    pub fn tokenize(&self, line: &str) -> Vec<String> {
        self.split_tokens(line)
            .into_iter()
            .map(|token| token.text.to_string())
            .collect()
    }

    fn split_tokens<'a>(&self, line: &'a str) -> Vec<Token<'a>> {
        let line = line.trim();
        if line.is_empty() {
            return Vec::new();
        }
        match &self.delimiter {
            Delimiter::Whitespace => token_pattern()
                .find_iter(line)
                .map(|m| Token::unquote(m.as_str()))
                .collect(),
            Delimiter::Literal(delim) => line
                .split(delim.as_str())
                .map(|token| Token::unquote(token.trim()))
                .collect(),
        }
    }

    /// Assigns each token, in `order`, to a fresh all-defaults record.
    pub fn decode_line<S: AsRef<str>>(
        &self,
        schema: &Arc<Schema>,
        tokens: &[S],
        order: &ColumnOrder,
    ) -> Result<Record> {
        let tokens: Vec<Token<'_>> = tokens
            .iter()
            .map(|token| Token {
                text: token.as_ref(),
                quoted: false,
            })
            .collect();
        self.decode_tokens(schema, &tokens, order)
    }

    pub fn decode_str(
        &self,
        schema: &Arc<Schema>,
        line: &str,
        order: &ColumnOrder,
    ) -> Result<Record> {
        let tokens = self.split_tokens(line);
        self.decode_tokens(schema, &tokens, order)
    }

    fn decode_tokens(
        &self,
        schema: &Arc<Schema>,
        tokens: &[Token<'_>],
        order: &ColumnOrder,
    ) -> Result<Record> {
        if tokens.len() != order.len() {
            return Err(CodecError::TokenCountMismatch {
                kind: schema.kind().to_string(),
                expected: order.len(),
                found: tokens.len(),
            });
        }
        let mut record = Record::new(Arc::clone(schema));
        for (id, token) in order.fields().iter().zip(tokens) {
            let value = parse_token(schema, *id, token)?;
            record.set(*id, value)?;
        }
        Ok(record)
    }

    /// Renders the fields in `order` with their formats; no trailing delimiter.
    ///
    /// Text holding a line break cannot be written as one line and is rejected.
    pub fn encode_line(&self, record: &Record, order: &ColumnOrder) -> Result<String> {
        let schema = record.schema();
        for id in order.fields() {
            if let Value::Text(text) = record.get(*id)?
                && text.contains(['\n', '\r'])
            {
                return Err(CodecError::LineBreakInText {
                    kind: schema.kind().to_string(),
                    field: schema.field(*id)?.name.clone(),
                });
            }
        }
        Ok(self.render_line(record, order))
    }

    pub(crate) fn render_line(&self, record: &Record, order: &ColumnOrder) -> String {
        let schema = record.schema();
        order
            .fields()
            .iter()
            .filter_map(|id| {
                let value = record.get(*id).ok()?;
                let rendered = schema.format(*id).render(value);
                Some(match value {
                    Value::Text(_) if self.needs_quotes(schema, *id, &rendered) => {
                        quote(&rendered)
                    }
                    _ => rendered,
                })
            })
            .join(self.delimiter.as_output())
    }

    /// The `#name ...` line matching `order`.
    pub fn encode_header(&self, schema: &Schema, order: &ColumnOrder) -> String {
        format!(
            "{COMMENT_MARKER}{}",
            order.names(schema).join(self.delimiter.as_output())
        )
    }

    /// Iterates the records of a stream, honoring a leading header line.
    pub fn records<R: BufRead>(
        &self,
        schema: Arc<Schema>,
        reader: R,
        order: ColumnOrder,
    ) -> TextRecords<R> {
        TextRecords {
            codec: self.clone(),
            schema,
            lines: reader.lines(),
            order,
            line_number: 0,
        }
    }

    pub fn decode_stream<R: BufRead>(
        &self,
        schema: &Arc<Schema>,
        reader: R,
        order: &ColumnOrder,
    ) -> Result<Vec<Record>> {
        self.records(Arc::clone(schema), reader, order.clone())
            .collect()
    }

    /// Whether a rendered text token would not read back as itself.
    fn needs_quotes(&self, schema: &Schema, id: FieldId, token: &str) -> bool {
        token.is_empty()
            || token.trim() != token
            || token.starts_with(['"', '\'', COMMENT_MARKER])
            || self.delimiter.splits(token)
            || shadows_na_marker(schema, id, token)
    }

    fn parse_header(&self, line: &str) -> Vec<String> {
        let names = line.trim_start_matches(COMMENT_MARKER);
        let names = match &self.delimiter {
            Delimiter::Whitespace => names.to_string(),
            Delimiter::Literal(delim) => names.replace(delim.as_str(), " "),
        };
        names
            .replace(',', " ")
            .split_whitespace()
            .map(str::to_string)
            .collect()
    }
}

/// An unquoted token equal to the marker decodes to the field default, so a
/// text value spelled like the marker must be quoted unless it is the default.
fn shadows_na_marker(schema: &Schema, id: FieldId, token: &str) -> bool {
    schema.na_marker() == Some(token)
        && schema
            .field(id)
            .is_ok_and(|field| field.na_value() != Value::Text(token.to_string()))
}

fn parse_token(schema: &Schema, id: FieldId, token: &Token<'_>) -> Result<Value> {
    let field = schema.field(id)?;
    if !token.quoted && schema.na_marker() == Some(token.text) {
        return Ok(field.na_value());
    }
    let token = token.text;
    let parse_error = || CodecError::FieldParse {
        kind: schema.kind().to_string(),
        field: field.name.clone(),
        token: token.to_string(),
        expected: field.kind,
    };
    match field.kind {
        FieldKind::Integer => token
            .parse::<i64>()
            .map(Value::Integer)
            .map_err(|_| parse_error()),
        FieldKind::Float => token
            .parse::<f64>()
            .map(Value::Float)
            .map_err(|_| parse_error()),
        FieldKind::Text => Ok(Value::Text(token.to_string())),
    }
}

struct Token<'a> {
    text: &'a str,
    quoted: bool,
}

impl<'a> Token<'a> {
    fn unquote(raw: &'a str) -> Self {
        let quoted = raw.len() >= 2
            && ((raw.starts_with('"') && raw.ends_with('"'))
                || (raw.starts_with('\'') && raw.ends_with('\'')));
        let text = if quoted { &raw[1..raw.len() - 1] } else { raw };
        Token { text, quoted }
    }
}

fn quote(text: &str) -> String {
    if text.contains('"') {
        format!("'{text}'")
    } else {
        format!("\"{text}\"")
    }
}

/// Record iterator over a text stream.
///
/// A header on the first line replaces the input order for this iterator
/// only; other comment lines are skipped. Errors carry 1-based line numbers.
pub struct TextRecords<R> {
    codec: TextCodec,
    schema: Arc<Schema>,
    lines: Lines<R>,
    order: ColumnOrder,
    line_number: usize,
}

impl<R> TextRecords<R> {
    /// The order in effect, including any header override.
    pub fn order(&self) -> &ColumnOrder {
        &self.order
    }

    pub fn line_number(&self) -> usize {
        self.line_number
    }
}

impl<R: BufRead> Iterator for TextRecords<R> {
    type Item = Result<Record>;

    fn next(&mut self) -> Option<Self::Item> {
        loop {
            let line = match self.lines.next()? {
                Ok(line) => line,
                Err(err) => {
                    return Some(Err(CodecError::transport(
                        format!("Reading line {}", self.line_number + 1),
                        err,
                    )));
                }
            };
            self.line_number += 1;
            let trimmed = line.trim();
            if trimmed.starts_with(COMMENT_MARKER) {
                if self.line_number == 1 {
                    let names = self.codec.parse_header(trimmed);
                    debug!(
                        "Header override for {}: {}",
                        self.schema.kind(),
                        names.join(",")
                    );
                    match self.schema.input_order(&names) {
                        Ok(order) => self.order = order,
                        Err(err) => return Some(Err(err.at_line(self.line_number))),
                    }
                }
                continue;
            }
            return Some(
                self.codec
                    .decode_str(&self.schema, trimmed, &self.order)
                    .map_err(|err| err.at_line(self.line_number)),
            );
        }
    }
}

#[cfg(test)]
mod tests {
    use std::io::Cursor;

    use super::*;
    use crate::field::FieldDescriptor;

    fn schema() -> Arc<Schema> {
        let mut builder = Schema::builder("station");
        builder.na_marker("-");
        builder
            .register_field(FieldDescriptor::text("sta", 6))
            .unwrap();
        builder
            .register_field(FieldDescriptor::integer("ondate").default_value(-1i64))
            .unwrap();
        builder
            .register_field(
                FieldDescriptor::float("lat")
                    .format("%1.6f".parse().unwrap())
                    .optional(),
            )
            .unwrap();
        builder
            .register_field(FieldDescriptor::text("staname", 50).optional())
            .unwrap();
        builder.build().unwrap().into_shared()
    }

    #[test]
    fn delimiter_spec_words_are_expanded() {
        assert_eq!(Delimiter::from_spec("comma tab"), Delimiter::Literal(",\t".into()));
        assert_eq!(Delimiter::from_spec("space"), Delimiter::Whitespace);
        assert_eq!(Delimiter::from_spec(""), Delimiter::Literal("\t".into()));
        assert_eq!(Delimiter::from_spec("|"), Delimiter::Literal("|".into()));
    }

    #[test]
    fn whitespace_tokenizer_keeps_quoted_tokens_whole() {
        let codec = TextCodec::default();
        assert_eq!(
            codec.tokenize("  ABC  19990101 'Black Hills' \"\"  "),
            vec!["ABC", "19990101", "Black Hills", ""]
        );
    }

    #[test]
    fn literal_tokenizer_preserves_empty_fields() {
        let codec = TextCodec::new(Delimiter::from_spec("tab"));
        assert_eq!(codec.tokenize("a\t\t c "), vec!["a", "", "c"]);
        assert!(codec.tokenize("   ").is_empty());
    }

    #[test]
    fn na_marker_yields_field_default() {
        let schema = schema();
        let codec = TextCodec::default();
        let record = codec
            .decode_str(&schema, "ABC - - -", &schema.natural_order())
            .unwrap();
        assert_eq!(record.get_integer("ondate").unwrap(), -1);
        assert_eq!(record.get_float("lat").unwrap(), -999.0);
        assert_eq!(record.get_text("staname").unwrap(), "-");
    }

    #[test]
    fn token_count_and_parse_errors_name_the_problem() {
        let schema = schema();
        let codec = TextCodec::default();
        let order = schema.natural_order();
        let err = codec.decode_str(&schema, "ABC 1", &order).unwrap_err();
        assert!(matches!(
            err,
            CodecError::TokenCountMismatch { expected: 4, found: 2, .. }
        ));
        let err = codec
            .decode_str(&schema, "ABC x 1.0 name", &order)
            .unwrap_err();
        assert!(matches!(err, CodecError::FieldParse { ref field, .. } if field == "ondate"));
    }

    #[test]
    fn encode_quotes_values_that_would_split() {
        let schema = schema();
        let codec = TextCodec::default();
        let order = schema.natural_order();
        let mut record = Record::new(Arc::clone(&schema));
        record.set_text("sta", "ABC").unwrap();
        record.set_integer("ondate", 2001).unwrap();
        record.set_float("lat", 44.5).unwrap();
        record.set_text("staname", "Black Hills").unwrap();
        let line = codec.encode_line(&record, &order).unwrap();
        assert_eq!(line, "ABC 2001 44.500000 \"Black Hills\"");

        let back = codec.decode_str(&schema, &line, &order).unwrap();
        assert_eq!(back.values(), record.values());
    }

    #[test]
    fn header_line_matches_output_order() {
        let schema = schema();
        let codec = TextCodec::new(Delimiter::from_spec("tab"));
        let order = schema.output_order(&["lat", "sta"]).unwrap();
        assert_eq!(codec.encode_header(&schema, &order), "#lat\tsta");
    }

    #[test]
    fn stream_header_overrides_order_and_comments_are_skipped() {
        let schema = schema();
        let codec = TextCodec::default();
        let input = "#ondate, sta\n# comment\n20010101 ABC\n20020202 DEF\n";
        let mut records = codec.records(
            Arc::clone(&schema),
            Cursor::new(input),
            schema.natural_order(),
        );
        let first = records.next().unwrap().unwrap();
        assert_eq!(first.get_text("sta").unwrap(), "ABC");
        assert_eq!(first.get_integer("ondate").unwrap(), 20010101);
        assert_eq!(first.get_float("lat").unwrap(), -999.0);
        assert_eq!(records.order().len(), 2);
        assert!(records.next().unwrap().is_ok());
        assert!(records.next().is_none());
    }

    #[test]
    fn header_missing_required_column_fails_at_line_one() {
        let schema = schema();
        let codec = TextCodec::default();
        let err = codec
            .decode_stream(&schema, Cursor::new("#sta lat\nABC 1.0\n"), &schema.natural_order())
            .unwrap_err();
        assert!(matches!(err, CodecError::AtLine { line: 1, .. }));
        assert!(matches!(err.root(), CodecError::RequiredColumnMissing { .. }));
    }

    #[test]
    fn blank_line_is_a_token_count_error() {
        let schema = schema();
        let codec = TextCodec::default();
        let err = codec
            .decode_stream(&schema, Cursor::new("ABC 1 2.0 x\n\n"), &schema.natural_order())
            .unwrap_err();
        assert!(matches!(err, CodecError::AtLine { line: 2, .. }));
        assert!(matches!(err.root(), CodecError::TokenCountMismatch { found: 0, .. }));
    }

    fn record(schema: &Arc<Schema>, sta: &str, ondate: i64) -> Record {
        let mut record = Record::new(Arc::clone(schema));
        record.set_text("sta", sta).unwrap();
        record.set_integer("ondate", ondate).unwrap();
        record
    }

    #[test]
    fn text_starting_with_comment_marker_survives_a_stream() {
        let schema = schema();
        let codec = TextCodec::default();
        let order = schema.output_order(&["sta", "ondate"]).unwrap();
        let lines = [record(&schema, "#A", 1), record(&schema, "#B", 2)]
            .iter()
            .map(|r| codec.encode_line(r, &order).unwrap())
            .collect::<Vec<_>>();
        assert_eq!(lines, vec!["\"#A\" 1", "\"#B\" 2"]);

        let stream = format!(
            "{}\n{}\n",
            codec.encode_header(&schema, &order),
            lines.join("\n")
        );
        let back = codec
            .decode_stream(&schema, Cursor::new(stream), &schema.natural_order())
            .unwrap();
        let names: Vec<&str> = back.iter().map(|r| r.get_text("sta").unwrap()).collect();
        assert_eq!(names, vec!["#A", "#B"]);
    }

    #[test]
    fn line_breaks_in_text_are_rejected() {
        let schema = schema();
        let codec = TextCodec::new(Delimiter::from_spec("tab"));
        let mut record = record(&schema, "ABC", 1);
        for broken in ["Black\nHills", "Black\rHills"] {
            record.set_text("staname", broken).unwrap();
            let err = codec
                .encode_line(&record, &schema.natural_order())
                .unwrap_err();
            assert!(
                matches!(err, CodecError::LineBreakInText { ref field, .. } if field == "staname")
            );
        }
    }

    #[test]
    fn literal_delimiter_header_reads_back() {
        let schema = schema();
        for delimiter in ["|", ";"] {
            let codec = TextCodec::new(Delimiter::from_spec(delimiter));
            let order = schema.output_order(&["ondate", "sta"]).unwrap();
            let stream = format!(
                "{}\n{}\n",
                codec.encode_header(&schema, &order),
                codec.encode_line(&record(&schema, "ABC", 7), &order).unwrap()
            );
            assert_eq!(stream, format!("#ondate{delimiter}sta\n7{delimiter}ABC\n"));

            let back = codec
                .decode_stream(&schema, Cursor::new(stream), &schema.natural_order())
                .unwrap();
            assert_eq!(back[0].get_integer("ondate").unwrap(), 7);
            assert_eq!(back[0].get_text("sta").unwrap(), "ABC");
        }
    }

    #[test]
    fn quotes_wrap_the_formatted_token() {
        let mut builder = Schema::builder("note");
        builder
            .register_field(
                FieldDescriptor::text("text", 20).format("%.4s".parse().unwrap()),
            )
            .unwrap();
        builder
            .register_field(FieldDescriptor::text("tag", 20).format("<%s>".parse().unwrap()))
            .unwrap();
        let schema = builder.build().unwrap().into_shared();
        let codec = TextCodec::default();
        let order = schema.natural_order();
        let mut record = Record::new(Arc::clone(&schema));
        record.set_text("text", "a b c d").unwrap();
        record.set_text("tag", "x y").unwrap();

        let line = codec.encode_line(&record, &order).unwrap();
        assert_eq!(line, "\"a b \" \"<x y>\"");
        let back = codec.decode_str(&schema, &line, &order).unwrap();
        assert_eq!(back.get_text("text").unwrap(), "a b ");
        assert_eq!(back.get_text("tag").unwrap(), "<x y>");
    }

    #[test]
    fn text_spelled_like_the_marker_keeps_its_value() {
        let mut builder = Schema::builder("remark");
        builder.na_marker("-");
        builder
            .register_field(FieldDescriptor::text("sta", 6))
            .unwrap();
        builder
            .register_field(FieldDescriptor::text("note", 10).default_value("none").optional())
            .unwrap();
        let schema = builder.build().unwrap().into_shared();
        let codec = TextCodec::default();
        let order = schema.natural_order();

        let mut record = Record::new(Arc::clone(&schema));
        record.set_text("sta", "-").unwrap();
        record.set_text("note", "-").unwrap();
        let line = codec.encode_line(&record, &order).unwrap();
        assert_eq!(line, "- \"-\"");
        let back = codec.decode_str(&schema, &line, &order).unwrap();
        assert_eq!(back.get_text("note").unwrap(), "-");
        assert_eq!(back.get_text("sta").unwrap(), "-");

        let defaulted = codec.decode_str(&schema, "ABC -", &order).unwrap();
        assert_eq!(defaulted.get_text("note").unwrap(), "none");
    }
}

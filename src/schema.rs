//! Schema registry, YAML persistence, and column orders.
//!
//! A [`Schema`] is the ordered set of [`FieldDescriptor`]s for one record
//! kind together with its required columns and key subsets. Schemas are
//! immutable once built and are shared between records through an `Arc`.
//!
//! Column orders used to parse or render a particular stream are plain
//! [`ColumnOrder`] values obtained from the schema, validated once, and
//! passed to the codecs explicitly.

use std::{
    collections::HashMap,
    fs::File,
    io::BufReader,
    path::Path,
    sync::Arc,
};

use anyhow::{Context, Result as AnyResult};
use heck::ToUpperCamelCase;
use log::debug;
use serde::{Deserialize, Serialize};

use crate::{
    error::{CodecError, Result},
    field::{FieldDescriptor, FieldId, FieldKind, Value},
    format::FormatSpec,
};

/// Bytes used by the binary codec for every integer or float field.
pub const NUMERIC_WIDTH: usize = 8;
/// Bytes used by the binary codec for a text length prefix.
pub const LENGTH_PREFIX_WIDTH: usize = 4;

/// Serialized form of a schema, as stored in YAML files.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SchemaDef {
    pub kind: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub source: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub na_marker: Option<String>,
    pub fields: Vec<FieldDescriptor>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub primary_key: Vec<String>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub unique_key: Vec<String>,
}

#[derive(Debug)]
pub struct Schema {
    kind: String,
    source: Option<String>,
    na_marker: Option<String>,
    fields: Vec<FieldDescriptor>,
    formats: Vec<FormatSpec>,
    by_name: HashMap<String, FieldId>,
    primary_key: Vec<FieldId>,
    unique_key: Vec<FieldId>,
}

#[derive(Debug)]
pub struct SchemaBuilder {
    kind: String,
    source: Option<String>,
    na_marker: Option<String>,
    fields: Vec<FieldDescriptor>,
    formats: Vec<FormatSpec>,
    by_name: HashMap<String, FieldId>,
    primary_key: Vec<String>,
    unique_key: Vec<String>,
}

impl SchemaBuilder {
    pub fn source(&mut self, source: impl Into<String>) -> &mut Self {
        self.source = Some(source.into());
        self
    }

    pub fn na_marker(&mut self, marker: impl Into<String>) -> &mut Self {
        self.na_marker = Some(marker.into());
        self
    }

    /// Appends a field to the natural column order.
    pub fn register_field(&mut self, descriptor: FieldDescriptor) -> Result<FieldId> {
        let mut descriptor = descriptor;
        descriptor.name = normalize_name(&descriptor.name);
        if self.by_name.contains_key(&descriptor.name) {
            return Err(CodecError::DuplicateField {
                kind: self.kind.clone(),
                field: descriptor.name,
            });
        }

        let format = descriptor.render_format();
        if !format.accepts(descriptor.kind) {
            return Err(CodecError::InvalidFormat {
                spec: format.to_string(),
                reason: format!(
                    "cannot render {} field '{}'",
                    descriptor.kind, descriptor.name
                ),
            });
        }

        let default = match (descriptor.kind, descriptor.na_value()) {
            (FieldKind::Float, Value::Integer(i)) => Value::Float(i as f64),
            (_, value) => value,
        };
        if default.kind() != descriptor.kind {
            return Err(CodecError::FieldTypeMismatch {
                kind: self.kind.clone(),
                field: descriptor.name,
                expected: descriptor.kind,
                found: default.kind(),
            });
        }
        if let Some(limit) = descriptor.bound_violation(&default) {
            return Err(CodecError::FieldBounds {
                kind: self.kind.clone(),
                field: descriptor.name,
                value: default.to_string(),
                limit,
            });
        }

        descriptor.format = Some(format.clone());
        descriptor.default = Some(default);
        let id = FieldId::new(self.fields.len());
        self.by_name.insert(descriptor.name.clone(), id);
        self.fields.push(descriptor);
        self.formats.push(format);
        Ok(id)
    }

    pub fn primary_key<I, S>(&mut self, names: I) -> &mut Self
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        self.primary_key = names.into_iter().map(|n| normalize_name(n.as_ref())).collect();
        self
    }

    pub fn unique_key<I, S>(&mut self, names: I) -> &mut Self
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        self.unique_key = names.into_iter().map(|n| normalize_name(n.as_ref())).collect();
        self
    }

    pub fn build(self) -> Result<Schema> {
        let resolve = |names: &[String]| -> Result<Vec<FieldId>> {
            names
                .iter()
                .map(|name| {
                    self.by_name
                        .get(name)
                        .copied()
                        .ok_or_else(|| CodecError::UnknownField {
                            kind: self.kind.clone(),
                            field: name.clone(),
                        })
                })
                .collect()
        };
        let primary_key = resolve(&self.primary_key)?;
        let unique_key = resolve(&self.unique_key)?;
        debug!(
            "Built schema '{}' with {} field(s)",
            self.kind,
            self.fields.len()
        );
        Ok(Schema {
            kind: self.kind,
            source: self.source,
            na_marker: self.na_marker,
            fields: self.fields,
            formats: self.formats,
            by_name: self.by_name,
            primary_key,
            unique_key,
        })
    }
}

impl Schema {
    pub fn builder(kind: impl Into<String>) -> SchemaBuilder {
        SchemaBuilder {
            kind: normalize_name(&kind.into()),
            source: None,
            na_marker: None,
            fields: Vec::new(),
            formats: Vec::new(),
            by_name: HashMap::new(),
            primary_key: Vec::new(),
            unique_key: Vec::new(),
        }
    }

    pub fn from_def(def: SchemaDef) -> Result<Self> {
        let mut builder = Schema::builder(def.kind);
        if let Some(source) = def.source {
            builder.source(source);
        }
        if let Some(marker) = def.na_marker {
            builder.na_marker(marker);
        }
        for field in def.fields {
            builder.register_field(field)?;
        }
        builder.primary_key(&def.primary_key);
        builder.unique_key(&def.unique_key);
        builder.build()
    }

    pub fn to_def(&self) -> SchemaDef {
        let names = |ids: &[FieldId]| {
            ids.iter()
                .map(|id| self.fields[id.index()].name.clone())
                .collect()
        };
        SchemaDef {
            kind: self.kind.clone(),
            source: self.source.clone(),
            na_marker: self.na_marker.clone(),
            fields: self.fields.clone(),
            primary_key: names(&self.primary_key),
            unique_key: names(&self.unique_key),
        }
    }

    pub fn from_yaml_str(yaml: &str) -> AnyResult<Self> {
        let def: SchemaDef = serde_yaml::from_str(yaml).context("Parsing schema YAML")?;
        let kind = def.kind.clone();
        Schema::from_def(def).with_context(|| format!("Validating schema '{kind}'"))
    }

    pub fn load(path: &Path) -> AnyResult<Self> {
        let file = File::open(path).with_context(|| format!("Opening schema file {path:?}"))?;
        let def: SchemaDef = serde_yaml::from_reader(BufReader::new(file))
            .with_context(|| format!("Parsing schema YAML {path:?}"))?;
        Schema::from_def(def).with_context(|| format!("Validating schema file {path:?}"))
    }

    pub fn to_yaml_string(&self) -> AnyResult<String> {
        serde_yaml::to_string(&self.to_def()).context("Serializing schema to YAML string")
    }

    pub fn save(&self, path: &Path) -> AnyResult<()> {
        let file = File::create(path).with_context(|| format!("Creating schema file {path:?}"))?;
        serde_yaml::to_writer(file, &self.to_def()).context("Writing schema YAML")
    }

    pub fn into_shared(self) -> Arc<Schema> {
        Arc::new(self)
    }

    /// Lower-case record kind, also the default table name.
    pub fn kind(&self) -> &str {
        &self.kind
    }

    pub fn display_name(&self) -> String {
        self.kind.to_upper_camel_case()
    }

    /// Human-readable name of the schema family this kind belongs to.
    pub fn source(&self) -> &str {
        self.source.as_deref().unwrap_or("custom")
    }

    pub fn na_marker(&self) -> Option<&str> {
        self.na_marker.as_deref()
    }

    pub fn len(&self) -> usize {
        self.fields.len()
    }

    pub fn is_empty(&self) -> bool {
        self.fields.is_empty()
    }

    pub fn fields(&self) -> &[FieldDescriptor] {
        &self.fields
    }

    pub fn field_ids(&self) -> impl Iterator<Item = FieldId> + '_ {
        (0..self.fields.len()).map(FieldId::new)
    }

    pub fn field(&self, id: FieldId) -> Result<&FieldDescriptor> {
        self.fields
            .get(id.index())
            .ok_or_else(|| CodecError::UnknownField {
                kind: self.kind.clone(),
                field: format!("#{}", id.index()),
            })
    }

    pub(crate) fn format(&self, id: FieldId) -> &FormatSpec {
        &self.formats[id.index()]
    }

    pub fn field_id(&self, name: &str) -> Result<FieldId> {
        self.by_name
            .get(&normalize_name(name))
            .copied()
            .ok_or_else(|| CodecError::UnknownField {
                kind: self.kind.clone(),
                field: name.to_string(),
            })
    }

    pub fn column_names(&self) -> Vec<&str> {
        self.fields.iter().map(|f| f.name.as_str()).collect()
    }

    pub fn required_names(&self) -> Vec<&str> {
        self.fields
            .iter()
            .filter(|f| f.required)
            .map(|f| f.name.as_str())
            .collect()
    }

    pub fn primary_key(&self) -> &[FieldId] {
        &self.primary_key
    }

    pub fn unique_key(&self) -> &[FieldId] {
        &self.unique_key
    }

    /// Checks that every name is registered and every required field is named.
    pub fn validate_column_names<S: AsRef<str>>(&self, names: &[S]) -> Result<()> {
        self.resolve_names(names)?;
        for field in self.fields.iter().filter(|f| f.required) {
            if !names
                .iter()
                .any(|name| normalize_name(name.as_ref()) == field.name)
            {
                return Err(CodecError::RequiredColumnMissing {
                    kind: self.kind.clone(),
                    name: field.name.clone(),
                });
            }
        }
        Ok(())
    }

    pub fn natural_order(&self) -> ColumnOrder {
        ColumnOrder {
            fields: self.field_ids().collect(),
        }
    }

    /// Column order for parsing; must cover every required field.
    pub fn input_order<S: AsRef<str>>(&self, names: &[S]) -> Result<ColumnOrder> {
        self.validate_column_names(names)?;
        Ok(ColumnOrder {
            fields: self.resolve_names(names)?,
        })
    }

    /// Column order for rendering; any subset of registered fields.
    pub fn output_order<S: AsRef<str>>(&self, names: &[S]) -> Result<ColumnOrder> {
        Ok(ColumnOrder {
            fields: self.resolve_names(names)?,
        })
    }

    fn resolve_names<S: AsRef<str>>(&self, names: &[S]) -> Result<Vec<FieldId>> {
        names
            .iter()
            .map(|name| {
                self.by_name
                    .get(&normalize_name(name.as_ref()))
                    .copied()
                    .ok_or_else(|| CodecError::ColumnNameInvalid {
                        kind: self.kind.clone(),
                        name: name.as_ref().to_string(),
                    })
            })
            .collect()
    }

    /// Upper bound of one binary-encoded record, when every text field is bounded.
    pub fn max_encoded_size(&self) -> Option<usize> {
        self.fields.iter().try_fold(0usize, |total, field| {
            let width = match field.kind {
                FieldKind::Integer | FieldKind::Float => Some(NUMERIC_WIDTH),
                FieldKind::Text => field.max_length.map(|len| LENGTH_PREFIX_WIDTH + len),
            }?;
            Some(total + width)
        })
    }
}

/// Ordered projection of a schema's fields used for one stream.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ColumnOrder {
    fields: Vec<FieldId>,
}

impl ColumnOrder {
    pub fn fields(&self) -> &[FieldId] {
        &self.fields
    }

    pub fn len(&self) -> usize {
        self.fields.len()
    }

    pub fn is_empty(&self) -> bool {
        self.fields.is_empty()
    }

    pub fn names<'a>(&'a self, schema: &'a Schema) -> impl Iterator<Item = &'a str> + 'a {
        self.fields
            .iter()
            .filter_map(|id| schema.fields.get(id.index()))
            .map(|f| f.name.as_str())
    }
}

/// Input and output column orders for one read/write session.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ColumnOrders {
    pub input: ColumnOrder,
    pub output: ColumnOrder,
}

impl ColumnOrders {
    pub fn natural(schema: &Schema) -> Self {
        ColumnOrders {
            input: schema.natural_order(),
            output: schema.natural_order(),
        }
    }
}

pub(crate) fn normalize_name(name: &str) -> String {
    name.trim().to_ascii_lowercase()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample() -> Schema {
        let mut builder = Schema::builder("Sample");
        builder
            .register_field(FieldDescriptor::integer("id").max_magnitude(1e9))
            .unwrap();
        builder
            .register_field(FieldDescriptor::text("label", 6))
            .unwrap();
        builder
            .register_field(FieldDescriptor::float("score").optional())
            .unwrap();
        builder.primary_key(["id"]);
        builder.build().unwrap()
    }

    #[test]
    fn kind_and_names_are_lower_cased() {
        let schema = sample();
        assert_eq!(schema.kind(), "sample");
        assert_eq!(schema.display_name(), "Sample");
        assert_eq!(schema.field_id("LABEL").unwrap(), FieldId::new(1));
    }

    #[test]
    fn validate_rejects_unknown_then_missing_required() {
        let schema = sample();
        let err = schema.validate_column_names(&["id", "bogus"]).unwrap_err();
        assert!(matches!(err, CodecError::ColumnNameInvalid { ref name, .. } if name == "bogus"));

        let err = schema.validate_column_names(&["id", "score"]).unwrap_err();
        assert!(
            matches!(err, CodecError::RequiredColumnMissing { ref name, .. } if name == "label")
        );

        schema.validate_column_names(&["label", "id"]).unwrap();
    }

    #[test]
    fn output_order_allows_subsets_without_required_fields() {
        let schema = sample();
        let order = schema.output_order(&["score"]).unwrap();
        assert_eq!(order.fields(), &[FieldId::new(2)]);
        assert!(schema.input_order(&["score"]).is_err());
    }

    #[test]
    fn duplicate_fields_are_rejected() {
        let mut builder = Schema::builder("dup");
        builder.register_field(FieldDescriptor::integer("a")).unwrap();
        let err = builder
            .register_field(FieldDescriptor::float("A"))
            .unwrap_err();
        assert!(matches!(err, CodecError::DuplicateField { .. }));
    }

    #[test]
    fn format_must_match_kind() {
        let mut builder = Schema::builder("bad");
        let err = builder
            .register_field(
                FieldDescriptor::integer("n").format(FormatSpec::parse("%1.2f").unwrap()),
            )
            .unwrap_err();
        assert!(matches!(err, CodecError::InvalidFormat { .. }));
    }

    #[test]
    fn integer_defaults_are_promoted_for_float_fields() {
        let mut builder = Schema::builder("promo");
        builder
            .register_field(FieldDescriptor::float("depth").default_value(-1i64))
            .unwrap();
        let schema = builder.build().unwrap();
        assert_eq!(schema.fields()[0].na_value(), Value::Float(-1.0));
    }

    #[test]
    fn defaults_must_respect_bounds() {
        let mut builder = Schema::builder("bounded");
        let err = builder
            .register_field(FieldDescriptor::text("code", 2).default_value("toolong"))
            .unwrap_err();
        assert!(matches!(err, CodecError::FieldBounds { .. }));
    }

    #[test]
    fn max_encoded_size_requires_bounded_text() {
        let schema = sample();
        assert_eq!(schema.max_encoded_size(), Some(8 + 4 + 6 + 8));

        let mut builder = Schema::builder("open");
        builder
            .register_field(FieldDescriptor::new("note", FieldKind::Text))
            .unwrap();
        assert_eq!(builder.build().unwrap().max_encoded_size(), None);
    }

    #[test]
    fn unknown_key_field_fails_build() {
        let mut builder = Schema::builder("keys");
        builder.register_field(FieldDescriptor::integer("a")).unwrap();
        builder.primary_key(["b"]);
        assert!(matches!(
            builder.build().unwrap_err(),
            CodecError::UnknownField { .. }
        ));
    }

    #[test]
    fn yaml_definition_round_trips() {
        let schema = sample();
        let yaml = schema.to_yaml_string().unwrap();
        let reloaded = Schema::from_yaml_str(&yaml).unwrap();
        assert_eq!(reloaded.column_names(), schema.column_names());
        assert_eq!(reloaded.primary_key(), schema.primary_key());
        assert_eq!(reloaded.required_names(), vec!["id", "label"]);
    }
}

//! Typed value holder for one schema instance.
//!
//! A [`Record`] always holds one value per schema field. Every mutation goes
//! through a setter that checks kind and bounds before assigning, and that
//! clears the cached identity hash.

use std::{
    cell::Cell,
    fmt,
    hash::{Hash, Hasher},
    ops::Deref,
    sync::Arc,
};

use sha2::{Digest, Sha256};

use crate::{
    error::{CodecError, Result},
    field::{FieldId, FieldKind, Value},
    schema::Schema,
    text::TextCodec,
};

#[derive(Debug, Clone)]
pub struct Record {
    schema: Arc<Schema>,
    values: Vec<Value>,
    cached_hash: Cell<Option<u128>>,
}

impl Record {
    /// A record holding every field's not-applicable value.
    pub fn new(schema: Arc<Schema>) -> Self {
        let values = schema.fields().iter().map(|f| f.na_value()).collect();
        Record {
            schema,
            values,
            cached_hash: Cell::new(None),
        }
    }

    /// A record from an explicit positional list in declared order.
    pub fn from_values(schema: Arc<Schema>, values: Vec<Value>) -> Result<Self> {
        if values.len() != schema.len() {
            return Err(CodecError::TokenCountMismatch {
                kind: schema.kind().to_string(),
                expected: schema.len(),
                found: values.len(),
            });
        }
        for (id, value) in schema.field_ids().zip(values.iter()) {
            check_value(&schema, id, value)?;
        }
        Ok(Record {
            schema,
            values,
            cached_hash: Cell::new(None),
        })
    }

    pub fn schema(&self) -> &Arc<Schema> {
        &self.schema
    }

    pub fn kind(&self) -> &str {
        self.schema.kind()
    }

    /// Values in declared order.
    pub fn values(&self) -> &[Value] {
        &self.values
    }

    pub fn into_values(self) -> Vec<Value> {
        self.values
    }

    pub fn get(&self, id: FieldId) -> Result<&Value> {
        self.schema.field(id)?;
        Ok(&self.values[id.index()])
    }

    pub fn set(&mut self, id: FieldId, value: Value) -> Result<()> {
        check_value(&self.schema, id, &value)?;
        self.values[id.index()] = value;
        self.cached_hash.set(None);
        Ok(())
    }

    pub fn value(&self, name: &str) -> Result<&Value> {
        let id = self.schema.field_id(name)?;
        self.get(id)
    }

    pub fn set_value(&mut self, name: &str, value: Value) -> Result<()> {
        let id = self.schema.field_id(name)?;
        self.set(id, value)
    }

    pub fn get_text(&self, name: &str) -> Result<&str> {
        let value = self.typed(name, FieldKind::Text)?;
        Ok(value.as_text().unwrap_or_default())
    }

    pub fn set_text(&mut self, name: &str, value: impl Into<String>) -> Result<()> {
        self.set_value(name, Value::Text(value.into()))
    }

    pub fn get_integer(&self, name: &str) -> Result<i64> {
        let value = self.typed(name, FieldKind::Integer)?;
        Ok(value.as_integer().unwrap_or_default())
    }

    pub fn set_integer(&mut self, name: &str, value: i64) -> Result<()> {
        self.set_value(name, Value::Integer(value))
    }

    pub fn get_float(&self, name: &str) -> Result<f64> {
        let value = self.typed(name, FieldKind::Float)?;
        Ok(value.as_float().unwrap_or_default())
    }

    pub fn set_float(&mut self, name: &str, value: f64) -> Result<()> {
        self.set_value(name, Value::Float(value))
    }

    fn typed(&self, name: &str, requested: FieldKind) -> Result<&Value> {
        let id = self.schema.field_id(name)?;
        let field = self.schema.field(id)?;
        if field.kind != requested {
            return Err(CodecError::FieldTypeMismatch {
                kind: self.schema.kind().to_string(),
                field: field.name.clone(),
                expected: field.kind,
                found: requested,
            });
        }
        Ok(&self.values[id.index()])
    }

    /// Renders one field with its declared format.
    pub fn render(&self, id: FieldId) -> Result<String> {
        let value = self.get(id)?;
        Ok(self.schema.format(id).render(value))
    }

    /// Digest of the record kind and the canonical value tuple.
    ///
    /// Computed on first use and reused until the next setter call.
    pub fn identity_hash(&self) -> u128 {
        if let Some(hash) = self.cached_hash.get() {
            return hash;
        }
        let hash = self.compute_hash();
        self.cached_hash.set(Some(hash));
        hash
    }

    pub fn is_hash_cached(&self) -> bool {
        self.cached_hash.get().is_some()
    }

    fn compute_hash(&self) -> u128 {
        let mut hasher = Sha256::new();
        hasher.update(self.schema.kind().as_bytes());
        hasher.update([0u8]);
        for value in &self.values {
            match value {
                Value::Integer(i) => {
                    hasher.update([b'i']);
                    hasher.update(i.to_be_bytes());
                }
                Value::Float(f) => {
                    hasher.update([b'f']);
                    hasher.update(f.to_bits().to_be_bytes());
                }
                Value::Text(s) => {
                    hasher.update([b's']);
                    hasher.update((s.len() as u64).to_be_bytes());
                    hasher.update(s.as_bytes());
                }
            }
        }
        let digest = hasher.finalize();
        let mut head = [0u8; 16];
        head.copy_from_slice(&digest[..16]);
        u128::from_be_bytes(head)
    }

    pub fn primary_key_eq(&self, other: &Record) -> bool {
        self.keys_eq(other, self.schema.primary_key())
    }

    pub fn unique_key_eq(&self, other: &Record) -> bool {
        self.keys_eq(other, self.schema.unique_key())
    }

    fn keys_eq(&self, other: &Record, key: &[FieldId]) -> bool {
        if self.schema.kind() != other.schema.kind() || self.values.len() != other.values.len() {
            return false;
        }
        key_positions(key, self.values.len())
            .all(|idx| self.values[idx].same_as(&other.values[idx]))
    }

    fn hash_keys<H: Hasher>(&self, key: &[FieldId], state: &mut H) {
        self.schema.kind().hash(state);
        for idx in key_positions(key, self.values.len()) {
            self.values[idx].hash_identity(state);
        }
    }
}

/// Positions compared for a key; an undeclared key compares every field.
fn key_positions(key: &[FieldId], len: usize) -> Box<dyn Iterator<Item = usize> + '_> {
    if key.is_empty() {
        Box::new(0..len)
    } else {
        Box::new(key.iter().map(|id| id.index()))
    }
}

fn check_value(schema: &Schema, id: FieldId, value: &Value) -> Result<()> {
    let field = schema.field(id)?;
    if value.kind() != field.kind {
        return Err(CodecError::FieldTypeMismatch {
            kind: schema.kind().to_string(),
            field: field.name.clone(),
            expected: field.kind,
            found: value.kind(),
        });
    }
    if let Some(limit) = field.bound_violation(value) {
        return Err(CodecError::FieldBounds {
            kind: schema.kind().to_string(),
            field: field.name.clone(),
            value: value.to_string(),
            limit,
        });
    }
    Ok(())
}

impl fmt::Display for Record {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let line = TextCodec::default().render_line(self, &self.schema.natural_order());
        f.write_str(&line)
    }
}

macro_rules! key_view {
    ($(#[$meta:meta])* $name:ident, $eq:ident, $key:ident) => {
        $(#[$meta])*
        #[derive(Debug, Clone)]
        pub struct $name(pub Record);

        impl $name {
            pub fn into_inner(self) -> Record {
                self.0
            }
        }

        impl From<Record> for $name {
            fn from(record: Record) -> Self {
                $name(record)
            }
        }

        impl Deref for $name {
            type Target = Record;

            fn deref(&self) -> &Record {
                &self.0
            }
        }

        impl PartialEq for $name {
            fn eq(&self, other: &Self) -> bool {
                self.0.$eq(&other.0)
            }
        }

        impl Eq for $name {}

        impl Hash for $name {
            fn hash<H: Hasher>(&self, state: &mut H) {
                self.0.hash_keys(self.0.schema.$key(), state);
            }
        }
    };
}

key_view!(
    /// Record compared and hashed by its primary key only.
    ByPrimaryKey,
    primary_key_eq,
    primary_key
);
key_view!(
    /// Record compared and hashed by its unique key only.
    ByUniqueKey,
    unique_key_eq,
    unique_key
);

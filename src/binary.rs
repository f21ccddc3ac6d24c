//! Fixed-order binary codec.
//!
//! Fields are written in declared order, big-endian: integers and floats as
//! eight bytes, text as a signed 32-bit byte count followed by UTF-8 bytes.

use std::{
    io::{self, BufRead, Cursor, Read, Write},
    sync::Arc,
};

use byteorder::{BigEndian, ReadBytesExt, WriteBytesExt};

use crate::{
    error::{CodecError, Result},
    field::{FieldDescriptor, FieldKind, Value},
    record::Record,
    schema::Schema,
};

#[derive(Debug, Clone, Copy, Default)]
pub struct BinaryCodec;

impl BinaryCodec {
    pub fn new() -> Self {
        BinaryCodec
    }

    pub fn encode(&self, record: &Record) -> Result<Vec<u8>> {
        let schema = record.schema();
        let mut buffer = Vec::with_capacity(schema.max_encoded_size().unwrap_or(64));
        for value in record.values() {
            match value {
                Value::Integer(i) => buffer.write_i64::<BigEndian>(*i)?,
                Value::Float(f) => buffer.write_f64::<BigEndian>(*f)?,
                Value::Text(s) => {
                    let len = i32::try_from(s.len()).map_err(|_| {
                        CodecError::EncodedSizeExceeded {
                            kind: schema.kind().to_string(),
                            size: s.len(),
                            max: i32::MAX as usize,
                        }
                    })?;
                    buffer.write_i32::<BigEndian>(len)?;
                    buffer.extend_from_slice(s.as_bytes());
                }
            }
        }
        if let Some(max) = schema.max_encoded_size()
            && buffer.len() > max
        {
            return Err(CodecError::EncodedSizeExceeded {
                kind: schema.kind().to_string(),
                size: buffer.len(),
                max,
            });
        }
        Ok(buffer)
    }

    /// Encodes `record` onto `writer`, returning the number of bytes written.
    pub fn encode_into<W: Write>(&self, record: &Record, writer: &mut W) -> Result<usize> {
        let bytes = self.encode(record)?;
        writer
            .write_all(&bytes)
            .map_err(|err| CodecError::transport("Writing binary record", err))?;
        Ok(bytes.len())
    }

    pub fn decode(&self, schema: &Arc<Schema>, bytes: &[u8]) -> Result<Record> {
        self.decode_from(schema, &mut Cursor::new(bytes))
    }

    /// Reads exactly one record. A stream that ends mid-record is an
    /// encoding error, not a transport failure.
    pub fn decode_from<R: Read>(&self, schema: &Arc<Schema>, reader: &mut R) -> Result<Record> {
        let mut record = Record::new(Arc::clone(schema));
        for (id, field) in schema.field_ids().zip(schema.fields()) {
            let value = read_value(schema, field, reader)?;
            record.set(id, value)?;
        }
        Ok(record)
    }

    /// Decodes records until the stream ends on a record boundary.
    pub fn read_all<R: BufRead>(&self, schema: &Arc<Schema>, mut reader: R) -> Result<Vec<Record>> {
        let mut records = Vec::new();
        loop {
            let at_end = reader
                .fill_buf()
                .map_err(|err| CodecError::transport("Reading binary stream", err))?
                .is_empty();
            if at_end {
                return Ok(records);
            }
            records.push(self.decode_from(schema, &mut reader)?);
        }
    }
}

fn read_value<R: Read>(schema: &Schema, field: &FieldDescriptor, reader: &mut R) -> Result<Value> {
    let invalid = |reason: String| CodecError::InvalidEncoding {
        kind: schema.kind().to_string(),
        field: field.name.clone(),
        reason,
    };
    let io_failure = |err: io::Error| {
        if err.kind() == io::ErrorKind::UnexpectedEof {
            invalid("stream ended inside the record".to_string())
        } else {
            CodecError::transport(format!("Reading {}.{}", schema.kind(), field.name), err)
        }
    };
    match field.kind {
        FieldKind::Integer => reader
            .read_i64::<BigEndian>()
            .map(Value::Integer)
            .map_err(io_failure),
        FieldKind::Float => reader
            .read_f64::<BigEndian>()
            .map(Value::Float)
            .map_err(io_failure),
        FieldKind::Text => {
            let len = reader.read_i32::<BigEndian>().map_err(io_failure)?;
            let len = usize::try_from(len)
                .map_err(|_| invalid(format!("negative length prefix {len}")))?;
            let mut bytes = Vec::new();
            reader
                .take(len as u64)
                .read_to_end(&mut bytes)
                .map_err(io_failure)?;
            if bytes.len() < len {
                return Err(invalid(format!(
                    "expected {len} text bytes but found {}",
                    bytes.len()
                )));
            }
            String::from_utf8(bytes)
                .map(Value::Text)
                .map_err(|err| invalid(err.to_string()))
        }
    }
}

//! Error type shared by every codec.
//!
//! Each variant names the record kind and, where one applies, the field or
//! column that triggered it. Transport failures from files, streams, or a
//! database connection are wrapped opaquely in [`CodecError::Transport`].

use std::{error::Error as StdError, io};

use thiserror::Error;

use crate::field::FieldKind;

pub type Result<T> = std::result::Result<T, CodecError>;

#[derive(Debug, Error)]
pub enum CodecError {
    #[error("{kind}: field '{field}' is not defined")]
    UnknownField { kind: String, field: String },

    #[error("{kind}.{field}: expected a {expected} value but got {found}")]
    FieldTypeMismatch {
        kind: String,
        field: String,
        expected: FieldKind,
        found: FieldKind,
    },

    #[error("{kind}.{field}: value {value} is out of bounds ({limit})")]
    FieldBounds {
        kind: String,
        field: String,
        value: String,
        limit: String,
    },

    #[error("{kind}: expected {expected} token(s) but found {found}")]
    TokenCountMismatch {
        kind: String,
        expected: usize,
        found: usize,
    },

    #[error("{kind}.{field}: cannot parse '{token}' as {expected}")]
    FieldParse {
        kind: String,
        field: String,
        token: String,
        expected: FieldKind,
    },

    #[error("{kind}: column name '{name}' is not a valid name")]
    ColumnNameInvalid { kind: String, name: String },

    #[error("{kind}: column list does not contain required column '{name}'")]
    RequiredColumnMissing { kind: String, name: String },

    #[error("{kind}: encoded record needs {size} bytes but the maximum is {max}")]
    EncodedSizeExceeded {
        kind: String,
        size: usize,
        max: usize,
    },

    #[error("{kind}.{field}: invalid binary encoding: {reason}")]
    InvalidEncoding {
        kind: String,
        field: String,
        reason: String,
    },

    #[error("{kind}.{field}: text value contains a line break")]
    LineBreakInText { kind: String, field: String },

    #[error("{kind}: field '{field}' is registered twice")]
    DuplicateField { kind: String, field: String },

    #[error("invalid format specification '{spec}': {reason}")]
    InvalidFormat { spec: String, reason: String },

    #[error("line {line}: {source}")]
    AtLine {
        line: usize,
        #[source]
        source: Box<CodecError>,
    },

    #[error("{context}")]
    Transport {
        context: String,
        #[source]
        source: Box<dyn StdError + Send + Sync>,
    },
}

impl CodecError {
    pub fn transport<E>(context: impl Into<String>, source: E) -> Self
    where
        E: StdError + Send + Sync + 'static,
    {
        CodecError::Transport {
            context: context.into(),
            source: Box::new(source),
        }
    }

    pub(crate) fn at_line(self, line: usize) -> Self {
        match self {
            already @ CodecError::AtLine { .. } => already,
            other => CodecError::AtLine {
                line,
                source: Box::new(other),
            },
        }
    }

    /// Strips any line-number wrapping and returns the underlying error.
    pub fn root(&self) -> &CodecError {
        match self {
            CodecError::AtLine { source, .. } => source.root(),
            other => other,
        }
    }
}

impl From<io::Error> for CodecError {
    fn from(err: io::Error) -> Self {
        CodecError::transport("I/O failure", err)
    }
}

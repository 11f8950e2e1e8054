use core::fmt;

use thiserror::Error;

pub type Result<T> = std::result::Result<T, MetadataError>;

/// MessagePack wire type family, as seen by the token reader.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum WireType {
    Nil,
    Bool,
    Int,
    Float,
    Str,
    Bin,
    Array,
    Map,
    Ext,
}

impl fmt::Display for WireType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            WireType::Nil => "nil",
            WireType::Bool => "bool",
            WireType::Int => "int",
            WireType::Float => "float",
            WireType::Str => "str",
            WireType::Bin => "bin",
            WireType::Array => "array",
            WireType::Map => "map",
            WireType::Ext => "ext",
        };
        f.write_str(name)
    }
}

/// Errors produced while decoding pipeline metadata.
///
/// None of these are recovered from inside the codec: a blob is either well-formed or it is
/// not, and pipeline creation is expected to abort on any of them.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum MetadataError {
    /// Map/array nesting does not follow the metadata schema.
    #[error("malformed metadata at offset {offset}: {context}")]
    MalformedStructure { offset: usize, context: String },

    /// A declared length runs past the end of the buffer.
    #[error("truncated metadata at offset {offset}: need {needed} bytes, {remaining} remaining")]
    Truncated {
        offset: usize,
        needed: usize,
        remaining: usize,
    },

    /// A value has the wrong wire type (or an out-of-range value) for its schema slot.
    #[error("type mismatch at offset {offset}: expected {expected}, found {found}")]
    TypeMismatch {
        offset: usize,
        expected: WireType,
        found: WireType,
    },

    #[error("unsupported metadata version {major}.{minor} (decoder supports major <= {supported_major})")]
    VersionUnsupported {
        major: u32,
        minor: u32,
        supported_major: u32,
    },

    /// A fixed-capacity string field is longer than its capacity allows.
    #[error("string at offset {offset} is {len} bytes, capacity is {capacity} (including terminator)")]
    StringTooLong {
        offset: usize,
        len: usize,
        capacity: usize,
    },
}

impl MetadataError {
    pub(crate) fn malformed(offset: usize, context: impl Into<String>) -> Self {
        MetadataError::MalformedStructure {
            offset,
            context: context.into(),
        }
    }

    /// Byte offset into the blob at which the error was detected.
    pub fn offset(&self) -> Option<usize> {
        match self {
            MetadataError::MalformedStructure { offset, .. }
            | MetadataError::Truncated { offset, .. }
            | MetadataError::TypeMismatch { offset, .. }
            | MetadataError::StringTooLong { offset, .. } => Some(*offset),
            MetadataError::VersionUnsupported { .. } => None,
        }
    }
}

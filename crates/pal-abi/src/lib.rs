//! Pipeline ABI metadata codec.
//!
//! A compiled pipeline carries a MessagePack metadata blob describing its shaders, hardware
//! stages and register values. This crate decodes that blob into [`CodeObjectMetadata`] (and
//! encodes it back), tracking per-field presence so consumers can tell "absent" from "zero".
//!
//! The register map and shader function table are not parsed during decode; they are kept as
//! [`LazyRef`]s into the original blob and parsed on demand with [`RegisterMap::parse`] and
//! [`parse_shader_functions`].

#![forbid(unsafe_code)]

mod decode;
mod encode;
mod error;
mod lazy;
pub mod msgpack;
mod options;
mod schema;

#[cfg(any(test, feature = "test-utils"))]
pub mod test_utils;


pub use decode::{decode_metadata, find_version};
pub use encode::encode_metadata;
pub use error::{MetadataError, Result, WireType};
pub use lazy::{parse_shader_functions, LazyRef, RegisterMap, ShaderFunction};
pub use options::{CodecOptions, StringOverflow, LEGACY_FIELDS_REMOVED_IN_CLIENT_INTERFACE};
pub use schema::*;

//! Blob builders shared by unit tests, integration tests and downstream crates' tests.

use crate::msgpack::MsgPackWriter;
use crate::schema::{key, METADATA_MAJOR_VERSION, METADATA_MINOR_VERSION};

/// Encodes a map from already-encoded `(key, value)` pairs.
pub fn map_value(entries: &[(&str, Vec<u8>)]) -> Vec<u8> {
    let mut w = MsgPackWriter::new();
    w.write_map_len(entries.len() as u32);
    for (k, v) in entries {
        w.write_str(k);
        w.write_raw(v);
    }
    w.into_bytes()
}

pub fn array_value(items: &[Vec<u8>]) -> Vec<u8> {
    let mut w = MsgPackWriter::new();
    w.write_array_len(items.len() as u32);
    for item in items {
        w.write_raw(item);
    }
    w.into_bytes()
}

pub fn uint_value(v: u64) -> Vec<u8> {
    let mut w = MsgPackWriter::new();
    w.write_uint(v);
    w.into_bytes()
}

pub fn str_value(s: &str) -> Vec<u8> {
    let mut w = MsgPackWriter::new();
    w.write_str(s);
    w.into_bytes()
}

pub fn bool_value(b: bool) -> Vec<u8> {
    let mut w = MsgPackWriter::new();
    w.write_bool(b);
    w.into_bytes()
}

pub fn version_value(major: u32, minor: u32) -> Vec<u8> {
    array_value(&[uint_value(u64::from(major)), uint_value(u64::from(minor))])
}

/// Encodes a `.registers` map.
pub fn registers_value(pairs: &[(u32, u32)]) -> Vec<u8> {
    let mut w = MsgPackWriter::new();
    w.write_map_len(pairs.len() as u32);
    for &(reg, value) in pairs {
        w.write_uint(u64::from(reg));
        w.write_uint(u64::from(value));
    }
    w.into_bytes()
}

/// Root map `{ amdpal.version: [major, minor], amdpal.pipelines: [pipeline] }`.
pub fn build_root(major: u32, minor: u32, pipeline: Vec<u8>) -> Vec<u8> {
    map_value(&[
        (key::VERSION, version_value(major, minor)),
        (key::PIPELINES, array_value(&[pipeline])),
    ])
}

/// Current-version blob with a single empty pipeline.
pub fn minimal_blob() -> Vec<u8> {
    build_root(METADATA_MAJOR_VERSION, METADATA_MINOR_VERSION, map_value(&[]))
}

/// Current-version blob whose pipeline carries only a `.registers` map.
pub fn blob_with_registers(pairs: &[(u32, u32)]) -> Vec<u8> {
    build_root(
        METADATA_MAJOR_VERSION,
        METADATA_MINOR_VERSION,
        map_value(&[(key::pipeline::REGISTERS, registers_value(pairs))]),
    )
}

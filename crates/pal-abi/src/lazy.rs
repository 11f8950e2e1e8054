//! Sub-structures that are located during decode but only parsed when a consumer asks.

use core::fmt;

use crate::error::{MetadataError, Result, WireType};
use crate::msgpack::{MsgPackReader, MsgPackWriter};

/// A `(blob, offset)` reference to an encoded value inside the original metadata blob.
///
/// Two references compare equal when the values they point at are byte-identical, regardless of
/// where in their blobs those values live.
#[derive(Clone, Copy, Default)]
pub struct LazyRef<'a> {
    blob: &'a [u8],
    offset: usize,
}

impl<'a> LazyRef<'a> {
    /// Creates a reference to the value at `offset`, validating that a complete value is there.
    pub fn new(blob: &'a [u8], offset: usize) -> Result<Self> {
        let mut reader = MsgPackReader::at(blob, offset)?;
        reader.skip_value()?;
        Ok(Self { blob, offset })
    }

    /// The caller has already walked the value at `offset`.
    pub(crate) fn validated(blob: &'a [u8], offset: usize) -> Self {
        debug_assert!(offset < blob.len());
        Self { blob, offset }
    }

    pub fn blob(&self) -> &'a [u8] {
        self.blob
    }

    pub fn offset(&self) -> usize {
        self.offset
    }

    /// A reader positioned at the referenced value.
    pub fn reader(&self) -> Result<MsgPackReader<'a>> {
        MsgPackReader::at(self.blob, self.offset)
    }

    /// The complete encoded bytes of the referenced value.
    pub fn raw_value(&self) -> Result<&'a [u8]> {
        self.reader()?.raw_value()
    }
}

impl PartialEq for LazyRef<'_> {
    fn eq(&self, other: &Self) -> bool {
        self.raw_value().ok() == other.raw_value().ok()
    }
}

impl Eq for LazyRef<'_> {}

impl fmt::Debug for LazyRef<'_> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("LazyRef")
            .field("offset", &self.offset)
            .field("blob_len", &self.blob.len())
            .finish()
    }
}

fn expect_map(reader: &MsgPackReader<'_>, what: &str) -> Result<()> {
    match reader.peek_type()? {
        WireType::Map => Ok(()),
        found => Err(MetadataError::malformed(
            reader.position(),
            format!("{what} must be a map, found {found}"),
        )),
    }
}

/// Register offset -> value pairs from the `.registers` map.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RegisterMap {
    // Sorted by register offset, unique.
    entries: Vec<(u32, u32)>,
}

impl RegisterMap {
    pub fn parse(registers: LazyRef<'_>) -> Result<Self> {
        let mut reader = registers.reader()?;
        expect_map(&reader, "register map")?;
        let len = reader.read_map_len()?;
        let mut entries = Vec::with_capacity(len as usize);
        for _ in 0..len {
            let reg = reader.read_u32()?;
            let value = reader.read_u32()?;
            entries.push((reg, value));
        }
        Ok(Self::from_entries(entries))
    }

    /// Builds a map from `(register, value)` pairs; a later duplicate replaces an earlier one.
    pub fn from_entries(entries: impl IntoIterator<Item = (u32, u32)>) -> Self {
        let mut entries: Vec<(u32, u32)> = entries.into_iter().collect();
        entries.sort_by_key(|&(reg, _)| reg);

        let mut unique: Vec<(u32, u32)> = Vec::with_capacity(entries.len());
        for (reg, value) in entries {
            match unique.last_mut() {
                Some(last) if last.0 == reg => last.1 = value,
                _ => unique.push((reg, value)),
            }
        }
        Self { entries: unique }
    }

    pub fn get(&self, reg: u32) -> Option<u32> {
        self.entries
            .binary_search_by_key(&reg, |&(r, _)| r)
            .ok()
            .map(|idx| self.entries[idx].1)
    }

    pub fn has_entry(&self, reg: u32) -> bool {
        self.get(reg).is_some()
    }

    /// Value of `reg`, or 0 if the map has no entry for it.
    pub fn at(&self, reg: u32) -> u32 {
        self.get(reg).unwrap_or(0)
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = (u32, u32)> + '_ {
        self.entries.iter().copied()
    }

    pub fn encode(&self, w: &mut MsgPackWriter) {
        w.write_map_len(self.entries.len() as u32);
        for &(reg, value) in &self.entries {
            w.write_uint(u64::from(reg));
            w.write_uint(u64::from(value));
        }
    }
}

/// One entry of the `.shader_functions` map.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ShaderFunction<'a> {
    pub name: &'a str,
    /// The function's own metadata map, left unparsed.
    pub metadata: LazyRef<'a>,
}

/// Lists the functions in a `.shader_functions` map. Entries with non-string keys are skipped.
pub fn parse_shader_functions<'a>(functions: LazyRef<'a>) -> Result<Vec<ShaderFunction<'a>>> {
    let mut reader = functions.reader()?;
    expect_map(&reader, "shader function map")?;
    let len = reader.read_map_len()?;
    let mut out = Vec::new();
    for _ in 0..len {
        if reader.peek_type()? != WireType::Str {
            reader.skip_value()?;
            reader.skip_value()?;
            continue;
        }
        let name = reader.read_str()?;
        expect_map(&reader, "shader function metadata")?;
        let offset = reader.position();
        reader.skip_value()?;
        out.push(ShaderFunction {
            name,
            metadata: LazyRef::validated(reader.bytes(), offset),
        });
    }
    Ok(out)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn encoded_registers(pairs: &[(u64, u64)]) -> Vec<u8> {
        let mut w = MsgPackWriter::new();
        w.write_map_len(pairs.len() as u32);
        for &(reg, value) in pairs {
            w.write_uint(reg);
            w.write_uint(value);
        }
        w.into_bytes()
    }

    #[test]
    fn register_map_lookup_and_duplicates() {
        let blob = encoded_registers(&[(0x2d0b, 7), (0x2d0a, 5), (0x2d0b, 9)]);
        let map = RegisterMap::parse(LazyRef::new(&blob, 0).unwrap()).unwrap();
        assert_eq!(map.len(), 2);
        assert_eq!(map.get(0x2d0a), Some(5));
        assert_eq!(map.get(0x2d0b), Some(9));
        assert_eq!(map.get(0x1234), None);
        assert_eq!(map.at(0x1234), 0);
        assert!(map.has_entry(0x2d0a));
    }

    #[test]
    fn register_map_rejects_wide_values() {
        let blob = encoded_registers(&[(1, u64::from(u32::MAX) + 1)]);
        let err = RegisterMap::parse(LazyRef::new(&blob, 0).unwrap()).unwrap_err();
        assert!(matches!(err, MetadataError::TypeMismatch { .. }));
    }

    #[test]
    fn register_map_requires_a_map() {
        let mut w = MsgPackWriter::new();
        w.write_array_len(0);
        let blob = w.into_bytes();
        let err = RegisterMap::parse(LazyRef::new(&blob, 0).unwrap()).unwrap_err();
        assert!(matches!(err, MetadataError::MalformedStructure { .. }));
    }

    #[test]
    fn register_map_encode_is_parseable() {
        let map = RegisterMap::from_entries([(3, 30), (1, 10), (2, 20)]);
        let mut w = MsgPackWriter::new();
        map.encode(&mut w);
        let blob = w.into_bytes();
        let parsed = RegisterMap::parse(LazyRef::new(&blob, 0).unwrap()).unwrap();
        assert_eq!(parsed, map);
        assert_eq!(parsed.iter().collect::<Vec<_>>(), vec![(1, 10), (2, 20), (3, 30)]);
    }

    #[test]
    fn lazy_ref_validates_offset_and_value() {
        let blob = encoded_registers(&[(1, 2)]);
        assert!(LazyRef::new(&blob, blob.len()).is_err());
        assert!(LazyRef::new(&blob, blob.len() + 1).is_err());
        // Offset 1 lands on the key `1`, which is a complete value on its own.
        assert!(LazyRef::new(&blob, 1).is_ok());
        assert!(LazyRef::new(&blob[..blob.len() - 1], 0).is_err());
    }

    #[test]
    fn lazy_refs_compare_by_content() {
        let a = encoded_registers(&[(1, 2)]);
        let mut b = vec![0xc0, 0xc0];
        b.extend_from_slice(&a);
        let ra = LazyRef::new(&a, 0).unwrap();
        let rb = LazyRef::new(&b, 2).unwrap();
        assert_eq!(ra, rb);
        assert_ne!(ra, LazyRef::new(&b, 0).unwrap());
        assert_eq!(LazyRef::default(), LazyRef::default());
    }

    #[test]
    fn shader_functions_are_listed_lazily() {
        let mut w = MsgPackWriter::new();
        w.write_map_len(3);
        w.write_str("_amdgpu_cs_main");
        w.write_map_len(1);
        w.write_str(".stack_frame_size_in_bytes");
        w.write_uint(64);
        w.write_uint(7); // non-string key, skipped
        w.write_map_len(0);
        w.write_str("helper");
        w.write_map_len(0);
        let blob = w.into_bytes();

        let functions = parse_shader_functions(LazyRef::new(&blob, 0).unwrap()).unwrap();
        let names: Vec<_> = functions.iter().map(|f| f.name).collect();
        assert_eq!(names, vec!["_amdgpu_cs_main", "helper"]);

        let mut body = functions[0].metadata.reader().unwrap();
        assert_eq!(body.read_map_len().unwrap(), 1);
        assert_eq!(body.read_str().unwrap(), ".stack_frame_size_in_bytes");
        assert_eq!(body.read_uint().unwrap(), 64);
    }

    #[test]
    fn shader_function_body_must_be_a_map() {
        let mut w = MsgPackWriter::new();
        w.write_map_len(1);
        w.write_str("f");
        w.write_uint(1);
        let blob = w.into_bytes();
        let err = parse_shader_functions(LazyRef::new(&blob, 0).unwrap()).unwrap_err();
        assert!(matches!(err, MetadataError::MalformedStructure { .. }));
    }
}

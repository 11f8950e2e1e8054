//! Metadata blob -> [`CodeObjectMetadata`].
//!
//! Decoding is a bounded walk over the blob. Unknown keys are skipped at every level, known
//! keys that are absent leave their presence bit clear, and the two large sub-structures
//! (`.shader_functions`, `.registers`) are only located, not parsed.

use tracing::{debug, trace, warn};

use crate::error::{MetadataError, Result, WireType};
use crate::lazy::LazyRef;
use crate::msgpack::MsgPackReader;
use crate::options::{CodecOptions, StringOverflow};
use crate::schema::{
    key, ApiShaderType, CodeObjectFields, CodeObjectMetadata, Hash128, HardwareStage,
    HardwareStageFields, HardwareStageFlags, HardwareStageMask, HardwareStageMetadata,
    MetadataVersion, PipelineFields, PipelineFlags, PipelineMetadata, PipelineSymbolType,
    PipelineType, ShaderFields, ShaderMetadata, API_NAME_CAPACITY, METADATA_MINOR_VERSION,
    PIPELINE_NAME_CAPACITY,
};

/// Decodes a metadata blob.
///
/// The version is located and checked before any pipeline field is interpreted: a blob whose
/// major version exceeds [`CodecOptions::supported_major_version`] is rejected with
/// [`MetadataError::VersionUnsupported`]. Any minor version is accepted.
///
/// The returned metadata borrows strings, the API create-info blob and lazy references from
/// `blob`.
pub fn decode_metadata<'a>(
    blob: &'a [u8],
    options: &CodecOptions,
) -> Result<CodeObjectMetadata<'a>> {
    let version = find_version(blob)?;
    if version.major > options.supported_major_version {
        return Err(MetadataError::VersionUnsupported {
            major: version.major,
            minor: version.minor,
            supported_major: options.supported_major_version,
        });
    }
    if version.major == options.supported_major_version && version.minor > METADATA_MINOR_VERSION
    {
        debug!(
            %version,
            known_minor = METADATA_MINOR_VERSION,
            "metadata is newer than this decoder; unknown fields will be ignored"
        );
    }

    let mut reader = MsgPackReader::new(blob);
    let len = read_container_len(&mut reader, WireType::Map, "metadata root")?;
    let mut pipeline = None;
    for _ in 0..len {
        match read_key(&mut reader)? {
            Some(key::PIPELINES) => pipeline = Some(decode_pipelines(&mut reader, options)?),
            Some(key::VERSION) => reader.skip_value()?,
            Some(other) => {
                trace!(key = other, "skipping unknown root key");
                reader.skip_value()?;
            }
            None => reader.skip_value()?,
        }
    }

    let pipeline = pipeline
        .ok_or_else(|| MetadataError::malformed(0, format!("missing `{}`", key::PIPELINES)))?;

    Ok(CodeObjectMetadata {
        version,
        pipeline,
        has: CodeObjectFields::VERSION,
    })
}

/// Reads only the version pair of a blob.
pub fn find_version(blob: &[u8]) -> Result<MetadataVersion> {
    let mut reader = MsgPackReader::new(blob);
    let len = read_container_len(&mut reader, WireType::Map, "metadata root")?;
    let mut version = None;
    for _ in 0..len {
        match read_key(&mut reader)? {
            Some(key::VERSION) => version = Some(decode_version(&mut reader)?),
            _ => reader.skip_value()?,
        }
    }
    version.ok_or_else(|| MetadataError::malformed(0, format!("missing `{}`", key::VERSION)))
}

fn decode_version(reader: &mut MsgPackReader<'_>) -> Result<MetadataVersion> {
    let offset = reader.position();
    let len = read_container_len(reader, WireType::Array, "version")?;
    if len < 2 {
        return Err(MetadataError::malformed(
            offset,
            format!("version has {len} elements, need [major, minor]"),
        ));
    }
    let major = reader.read_u32()?;
    let minor = reader.read_u32()?;
    for _ in 2..len {
        reader.skip_value()?;
    }
    Ok(MetadataVersion { major, minor })
}

fn decode_pipelines<'a>(
    reader: &mut MsgPackReader<'a>,
    options: &CodecOptions,
) -> Result<PipelineMetadata<'a>> {
    let offset = reader.position();
    let len = read_container_len(reader, WireType::Array, "pipeline list")?;
    if len == 0 {
        return Err(MetadataError::malformed(offset, "pipeline list is empty"));
    }
    let pipeline = decode_pipeline(reader, options)?;
    if len > 1 {
        debug!(count = len, "metadata lists several pipelines; only the first is used");
        for _ in 1..len {
            reader.skip_value()?;
        }
    }
    Ok(pipeline)
}

fn decode_pipeline<'a>(
    reader: &mut MsgPackReader<'a>,
    options: &CodecOptions,
) -> Result<PipelineMetadata<'a>> {
    let len = read_container_len(reader, WireType::Map, "pipeline")?;
    let legacy = options.legacy_fields();
    let mut p = PipelineMetadata::default();

    for _ in 0..len {
        let Some(k) = read_key(reader)? else {
            reader.skip_value()?;
            continue;
        };
        let field = match k {
            key::pipeline::NAME => {
                p.name = read_bounded_str(reader, PIPELINE_NAME_CAPACITY, options)?;
                PipelineFields::NAME
            }
            key::pipeline::TYPE => {
                let offset = reader.position();
                let name = reader.read_str()?;
                p.pipeline_type = PipelineType::from_name(name).ok_or_else(|| {
                    MetadataError::malformed(offset, format!("unknown pipeline type {name:?}"))
                })?;
                PipelineFields::TYPE
            }
            key::pipeline::INTERNAL_PIPELINE_HASH => {
                p.internal_pipeline_hash = read_hash(reader)?;
                PipelineFields::INTERNAL_PIPELINE_HASH
            }
            key::pipeline::SHADERS => {
                decode_shaders(reader, &mut p.shaders)?;
                continue;
            }
            key::pipeline::HARDWARE_STAGES => {
                decode_hardware_stages(reader, &mut p.hardware_stages, options)?;
                continue;
            }
            key::pipeline::SHADER_FUNCTIONS => {
                p.shader_functions = read_lazy_ref(reader, "shader function map")?;
                PipelineFields::SHADER_FUNCTIONS
            }
            key::pipeline::REGISTERS => {
                p.registers = read_lazy_ref(reader, "register map")?;
                PipelineFields::REGISTERS
            }
            key::pipeline::USER_DATA_LIMIT => {
                p.user_data_limit = reader.read_u32()?;
                PipelineFields::USER_DATA_LIMIT
            }
            key::pipeline::SPILL_THRESHOLD => {
                p.spill_threshold = reader.read_u32()?;
                PipelineFields::SPILL_THRESHOLD
            }
            key::pipeline::USES_VIEWPORT_ARRAY_INDEX => {
                p.flags
                    .set(PipelineFlags::USES_VIEWPORT_ARRAY_INDEX, reader.read_bool()?);
                PipelineFields::USES_VIEWPORT_ARRAY_INDEX
            }
            key::pipeline::ES_GS_LDS_SIZE => {
                p.es_gs_lds_size = reader.read_u32()?;
                PipelineFields::ES_GS_LDS_SIZE
            }
            key::pipeline::STREAM_OUT_TABLE_ADDRESS if legacy => {
                p.stream_out_table_address = reader.read_u32()?;
                PipelineFields::STREAM_OUT_TABLE_ADDRESS
            }
            key::pipeline::INDIRECT_USER_DATA_TABLE_ADDRESSES if legacy => {
                // 3 entries for Vulkan, 1 for everyone else.
                let (addresses, _) = read_u32_array::<3>(reader, false)?;
                p.indirect_user_data_table_addresses = addresses;
                PipelineFields::INDIRECT_USER_DATA_TABLE_ADDRESSES
            }
            key::pipeline::CALC_WAVE_BREAK_SIZE_AT_DRAW_TIME if legacy => {
                p.flags.set(
                    PipelineFlags::CALC_WAVE_BREAK_SIZE_AT_DRAW_TIME,
                    reader.read_bool()?,
                );
                PipelineFields::CALC_WAVE_BREAK_SIZE_AT_DRAW_TIME
            }
            key::pipeline::NGG_SUBGROUP_SIZE => {
                p.ngg_subgroup_size = reader.read_u32()?;
                PipelineFields::NGG_SUBGROUP_SIZE
            }
            key::pipeline::NUM_INTERPOLANTS => {
                p.num_interpolants = reader.read_u32()?;
                PipelineFields::NUM_INTERPOLANTS
            }
            key::pipeline::MESH_SCRATCH_MEMORY_SIZE => {
                p.mesh_scratch_memory_size = reader.read_u32()?;
                PipelineFields::MESH_SCRATCH_MEMORY_SIZE
            }
            key::pipeline::API => {
                p.api = read_bounded_str(reader, API_NAME_CAPACITY, options)?;
                PipelineFields::API
            }
            key::pipeline::API_CREATE_INFO => {
                p.api_create_info = reader.read_bin()?;
                PipelineFields::API_CREATE_INFO
            }
            other => {
                trace!(key = other, "skipping unknown pipeline key");
                reader.skip_value()?;
                continue;
            }
        };
        p.has |= field;
    }

    Ok(p)
}

fn decode_shaders(
    reader: &mut MsgPackReader<'_>,
    shaders: &mut [ShaderMetadata; ApiShaderType::COUNT],
) -> Result<()> {
    let len = read_container_len(reader, WireType::Map, "shader map")?;
    for _ in 0..len {
        match read_key(reader)?.map(|k| (k, ApiShaderType::from_key(k))) {
            Some((_, Some(ty))) => decode_shader(reader, &mut shaders[ty.index()])?,
            Some((k, None)) => {
                trace!(key = k, "skipping unknown API shader stage");
                reader.skip_value()?;
            }
            None => reader.skip_value()?,
        }
    }
    Ok(())
}

fn decode_shader(reader: &mut MsgPackReader<'_>, shader: &mut ShaderMetadata) -> Result<()> {
    let len = read_container_len(reader, WireType::Map, "shader")?;
    for _ in 0..len {
        let Some(k) = read_key(reader)? else {
            reader.skip_value()?;
            continue;
        };
        let field = match k {
            key::shader::API_SHADER_HASH => {
                shader.api_shader_hash = read_hash(reader)?;
                ShaderFields::API_SHADER_HASH
            }
            key::shader::HARDWARE_MAPPING => {
                shader.hardware_mapping = read_hardware_mapping(reader)?;
                ShaderFields::HARDWARE_MAPPING
            }
            other => {
                trace!(key = other, "skipping unknown shader key");
                reader.skip_value()?;
                continue;
            }
        };
        shader.has |= field;
    }
    Ok(())
}

fn read_hardware_mapping(reader: &mut MsgPackReader<'_>) -> Result<HardwareStageMask> {
    let len = reader.read_array_len()?;
    let mut mask = HardwareStageMask::empty();
    for _ in 0..len {
        let name = reader.read_str()?;
        match HardwareStage::from_key(name) {
            Some(stage) => mask |= stage.mask(),
            None => debug!(stage = name, "ignoring unknown hardware stage in mapping"),
        }
    }
    Ok(mask)
}

fn decode_hardware_stages(
    reader: &mut MsgPackReader<'_>,
    stages: &mut [HardwareStageMetadata; HardwareStage::COUNT],
    options: &CodecOptions,
) -> Result<()> {
    let len = read_container_len(reader, WireType::Map, "hardware stage map")?;
    for _ in 0..len {
        match read_key(reader)?.map(|k| (k, HardwareStage::from_key(k))) {
            Some((_, Some(stage))) => {
                decode_hardware_stage(reader, &mut stages[stage.index()], options)?
            }
            Some((k, None)) => {
                trace!(key = k, "skipping unknown hardware stage");
                reader.skip_value()?;
            }
            None => reader.skip_value()?,
        }
    }
    Ok(())
}

fn decode_hardware_stage(
    reader: &mut MsgPackReader<'_>,
    stage: &mut HardwareStageMetadata,
    options: &CodecOptions,
) -> Result<()> {
    use key::hardware_stage as hw;

    let len = read_container_len(reader, WireType::Map, "hardware stage")?;
    let legacy = options.legacy_fields();
    for _ in 0..len {
        let Some(k) = read_key(reader)? else {
            reader.skip_value()?;
            continue;
        };
        let field = match k {
            hw::ENTRY_POINT => {
                let offset = reader.position();
                let name = reader.read_str()?;
                stage.entry_point = PipelineSymbolType::from_name(name).ok_or_else(|| {
                    MetadataError::malformed(offset, format!("unknown entry point {name:?}"))
                })?;
                HardwareStageFields::ENTRY_POINT
            }
            hw::SCRATCH_MEMORY_SIZE => {
                stage.scratch_memory_size = reader.read_u32()?;
                HardwareStageFields::SCRATCH_MEMORY_SIZE
            }
            hw::LDS_SIZE => {
                stage.lds_size = reader.read_u32()?;
                HardwareStageFields::LDS_SIZE
            }
            hw::PERF_DATA_BUFFER_SIZE => {
                stage.perf_data_buffer_size = reader.read_u32()?;
                HardwareStageFields::PERF_DATA_BUFFER_SIZE
            }
            hw::VGPR_COUNT => {
                stage.vgpr_count = reader.read_u32()?;
                HardwareStageFields::VGPR_COUNT
            }
            hw::SGPR_COUNT => {
                stage.sgpr_count = reader.read_u32()?;
                HardwareStageFields::SGPR_COUNT
            }
            hw::VGPR_LIMIT => {
                stage.vgpr_limit = reader.read_u32()?;
                HardwareStageFields::VGPR_LIMIT
            }
            hw::SGPR_LIMIT => {
                stage.sgpr_limit = reader.read_u32()?;
                HardwareStageFields::SGPR_LIMIT
            }
            hw::THREADGROUP_DIMENSIONS => {
                let (dims, _) = read_u32_array::<3>(reader, true)?;
                stage.threadgroup_dimensions = dims;
                HardwareStageFields::THREADGROUP_DIMENSIONS
            }
            hw::WAVEFRONT_SIZE => {
                stage.wavefront_size = reader.read_u32()?;
                HardwareStageFields::WAVEFRONT_SIZE
            }
            hw::USES_UAVS => {
                read_flag(reader, stage, HardwareStageFlags::USES_UAVS)?;
                HardwareStageFields::USES_UAVS
            }
            hw::USES_ROVS => {
                read_flag(reader, stage, HardwareStageFlags::USES_ROVS)?;
                HardwareStageFields::USES_ROVS
            }
            hw::WRITES_UAVS => {
                read_flag(reader, stage, HardwareStageFlags::WRITES_UAVS)?;
                HardwareStageFields::WRITES_UAVS
            }
            hw::WRITES_DEPTH => {
                read_flag(reader, stage, HardwareStageFlags::WRITES_DEPTH)?;
                HardwareStageFields::WRITES_DEPTH
            }
            hw::USES_APPEND_CONSUME => {
                read_flag(reader, stage, HardwareStageFlags::USES_APPEND_CONSUME)?;
                HardwareStageFields::USES_APPEND_CONSUME
            }
            hw::USES_PRIM_ID => {
                read_flag(reader, stage, HardwareStageFlags::USES_PRIM_ID)?;
                HardwareStageFields::USES_PRIM_ID
            }
            hw::MAX_PRIMS_PER_WAVE if legacy => {
                stage.max_prims_per_wave = reader.read_u32()?;
                HardwareStageFields::MAX_PRIMS_PER_WAVE
            }
            other => {
                trace!(key = other, "skipping unknown hardware stage key");
                reader.skip_value()?;
                continue;
            }
        };
        stage.has |= field;
    }
    Ok(())
}

fn read_flag(
    reader: &mut MsgPackReader<'_>,
    stage: &mut HardwareStageMetadata,
    flag: HardwareStageFlags,
) -> Result<()> {
    stage.flags.set(flag, reader.read_bool()?);
    Ok(())
}

/// Reads a map key. Keys that are not strings are consumed and reported as `None`; the caller
/// then skips the paired value.
fn read_key<'a>(reader: &mut MsgPackReader<'a>) -> Result<Option<&'a str>> {
    if reader.peek_type()? == WireType::Str {
        return reader.read_str().map(Some);
    }
    reader.skip_value()?;
    Ok(None)
}

/// Reads a container header where the schema requires a nested record. A value of any other
/// wire type violates the schema's nesting rather than a single field's type.
fn read_container_len(reader: &mut MsgPackReader<'_>, ty: WireType, what: &str) -> Result<u32> {
    let found = reader.peek_type()?;
    if found != ty {
        return Err(MetadataError::malformed(
            reader.position(),
            format!("{what} must be {ty}, found {found}"),
        ));
    }
    match ty {
        WireType::Map => reader.read_map_len(),
        _ => reader.read_array_len(),
    }
}

fn read_lazy_ref<'a>(reader: &mut MsgPackReader<'a>, what: &str) -> Result<LazyRef<'a>> {
    let found = reader.peek_type()?;
    if found != WireType::Map {
        return Err(MetadataError::malformed(
            reader.position(),
            format!("{what} must be map, found {found}"),
        ));
    }
    let offset = reader.position();
    reader.skip_value()?;
    Ok(LazyRef::validated(reader.bytes(), offset))
}

fn read_hash(reader: &mut MsgPackReader<'_>) -> Result<Hash128> {
    let offset = reader.position();
    let len = reader.read_array_len()?;
    if len != 2 {
        return Err(MetadataError::malformed(
            offset,
            format!("128-bit hash has {len} elements, need 2"),
        ));
    }
    let lower = reader.read_uint()?;
    let upper = reader.read_uint()?;
    Ok(Hash128 { lower, upper })
}

/// Reads an array of at most `N` u32 values (exactly `N` when `exact`). Missing trailing
/// elements stay zero. Returns the values and the element count.
fn read_u32_array<const N: usize>(
    reader: &mut MsgPackReader<'_>,
    exact: bool,
) -> Result<([u32; N], usize)> {
    let offset = reader.position();
    let len = reader.read_array_len()? as usize;
    if len > N || (exact && len != N) {
        return Err(MetadataError::malformed(
            offset,
            format!(
                "array has {len} elements, expected {}{N}",
                if exact { "" } else { "at most " }
            ),
        ));
    }
    let mut out = [0u32; N];
    for slot in out.iter_mut().take(len) {
        *slot = reader.read_u32()?;
    }
    Ok((out, len))
}

fn read_bounded_str<'a>(
    reader: &mut MsgPackReader<'a>,
    capacity: usize,
    options: &CodecOptions,
) -> Result<&'a str> {
    let offset = reader.position();
    let s = reader.read_str()?;
    // Capacity counts the terminator of the fixed-size buffer the ABI defines.
    if s.len() < capacity {
        return Ok(s);
    }
    match options.string_overflow {
        StringOverflow::Reject => Err(MetadataError::StringTooLong {
            offset,
            len: s.len(),
            capacity,
        }),
        StringOverflow::Truncate => {
            let mut end = capacity - 1;
            while !s.is_char_boundary(end) {
                end -= 1;
            }
            warn!(offset, len = s.len(), capacity, "truncating oversized metadata string");
            Ok(&s[..end])
        }
    }
}

//! [`CodeObjectMetadata`] -> metadata blob.

use tracing::trace;

use crate::error::{MetadataError, Result};
use crate::msgpack::MsgPackWriter;
use crate::options::CodecOptions;
use crate::schema::{
    key, ApiShaderType, CodeObjectMetadata, Hash128, HardwareStage, HardwareStageFields,
    HardwareStageFlags, HardwareStageMetadata, PipelineFields, PipelineFlags, PipelineMetadata,
    ShaderFields, ShaderMetadata, API_NAME_CAPACITY, PIPELINE_NAME_CAPACITY,
};

/// A map whose entry count is only known once all entries have been written.
struct MapBody {
    w: MsgPackWriter,
    len: u32,
}

impl MapBody {
    fn new() -> Self {
        Self {
            w: MsgPackWriter::new(),
            len: 0,
        }
    }

    /// Writes `key` and returns the writer for its value.
    fn entry(&mut self, key: &str) -> &mut MsgPackWriter {
        self.len += 1;
        self.w.write_str(key);
        &mut self.w
    }

    fn is_empty(&self) -> bool {
        self.len == 0
    }

    fn finish(self, out: &mut MsgPackWriter) {
        out.write_map_len(self.len);
        out.write_raw(self.w.as_bytes());
    }
}

/// Encodes metadata into a blob.
///
/// Only fields whose presence bit is set are written, so decoding the result yields the same
/// presence sets and values. Legacy fields are written only when `options` selects a client
/// interface that still has them. Lazy references are copied as their raw encoded values.
pub fn encode_metadata(
    metadata: &CodeObjectMetadata<'_>,
    options: &CodecOptions,
) -> Result<Vec<u8>> {
    let mut root = MapBody::new();
    let version = root.entry(key::VERSION);
    version.write_array_len(2);
    version.write_uint(u64::from(metadata.version.major));
    version.write_uint(u64::from(metadata.version.minor));

    let mut pipeline = MsgPackWriter::new();
    encode_pipeline(&mut pipeline, &metadata.pipeline, options)?;
    let pipelines = root.entry(key::PIPELINES);
    pipelines.write_array_len(1);
    pipelines.write_raw(pipeline.as_bytes());

    let mut out = MsgPackWriter::new();
    root.finish(&mut out);
    trace!(len = out.len(), "encoded pipeline metadata");
    Ok(out.into_bytes())
}

fn encode_pipeline(
    out: &mut MsgPackWriter,
    p: &PipelineMetadata<'_>,
    options: &CodecOptions,
) -> Result<()> {
    let has = p.has & options.pipeline_fields();
    let mut map = MapBody::new();

    if has.contains(PipelineFields::NAME) {
        check_capacity(p.name, PIPELINE_NAME_CAPACITY)?;
        map.entry(key::pipeline::NAME).write_str(p.name);
    }
    if has.contains(PipelineFields::TYPE) {
        map.entry(key::pipeline::TYPE)
            .write_str(p.pipeline_type.name());
    }
    if has.contains(PipelineFields::INTERNAL_PIPELINE_HASH) {
        write_hash(map.entry(key::pipeline::INTERNAL_PIPELINE_HASH), p.internal_pipeline_hash);
    }

    let mut shaders = MapBody::new();
    for ty in ApiShaderType::ALL {
        let shader = p.shader(ty);
        if !shader.has.is_empty() {
            encode_shader(shaders.entry(ty.key()), shader);
        }
    }
    if !shaders.is_empty() {
        shaders.finish(map.entry(key::pipeline::SHADERS));
    }

    let stage_fields = options.hardware_stage_fields();
    let mut stages = MapBody::new();
    for stage in HardwareStage::ALL {
        let hw = p.hardware_stage(stage);
        if !(hw.has & stage_fields).is_empty() {
            encode_hardware_stage(stages.entry(stage.key()), hw, stage_fields);
        }
    }
    if !stages.is_empty() {
        stages.finish(map.entry(key::pipeline::HARDWARE_STAGES));
    }

    if has.contains(PipelineFields::SHADER_FUNCTIONS) {
        let raw = p.shader_functions.raw_value()?;
        map.entry(key::pipeline::SHADER_FUNCTIONS).write_raw(raw);
    }
    if has.contains(PipelineFields::REGISTERS) {
        let raw = p.registers.raw_value()?;
        map.entry(key::pipeline::REGISTERS).write_raw(raw);
    }

    let scalars = [
        (PipelineFields::USER_DATA_LIMIT, key::pipeline::USER_DATA_LIMIT, p.user_data_limit),
        (PipelineFields::SPILL_THRESHOLD, key::pipeline::SPILL_THRESHOLD, p.spill_threshold),
        (PipelineFields::ES_GS_LDS_SIZE, key::pipeline::ES_GS_LDS_SIZE, p.es_gs_lds_size),
        (
            PipelineFields::STREAM_OUT_TABLE_ADDRESS,
            key::pipeline::STREAM_OUT_TABLE_ADDRESS,
            p.stream_out_table_address,
        ),
        (PipelineFields::NGG_SUBGROUP_SIZE, key::pipeline::NGG_SUBGROUP_SIZE, p.ngg_subgroup_size),
        (PipelineFields::NUM_INTERPOLANTS, key::pipeline::NUM_INTERPOLANTS, p.num_interpolants),
        (
            PipelineFields::MESH_SCRATCH_MEMORY_SIZE,
            key::pipeline::MESH_SCRATCH_MEMORY_SIZE,
            p.mesh_scratch_memory_size,
        ),
    ];
    for (field, k, value) in scalars {
        if has.contains(field) {
            map.entry(k).write_uint(u64::from(value));
        }
    }

    if has.contains(PipelineFields::USES_VIEWPORT_ARRAY_INDEX) {
        map.entry(key::pipeline::USES_VIEWPORT_ARRAY_INDEX)
            .write_bool(p.flags.contains(PipelineFlags::USES_VIEWPORT_ARRAY_INDEX));
    }
    if has.contains(PipelineFields::INDIRECT_USER_DATA_TABLE_ADDRESSES) {
        let w = map.entry(key::pipeline::INDIRECT_USER_DATA_TABLE_ADDRESSES);
        w.write_array_len(p.indirect_user_data_table_addresses.len() as u32);
        for &addr in &p.indirect_user_data_table_addresses {
            w.write_uint(u64::from(addr));
        }
    }
    if has.contains(PipelineFields::CALC_WAVE_BREAK_SIZE_AT_DRAW_TIME) {
        map.entry(key::pipeline::CALC_WAVE_BREAK_SIZE_AT_DRAW_TIME)
            .write_bool(p.flags.contains(PipelineFlags::CALC_WAVE_BREAK_SIZE_AT_DRAW_TIME));
    }
    if has.contains(PipelineFields::API) {
        check_capacity(p.api, API_NAME_CAPACITY)?;
        map.entry(key::pipeline::API).write_str(p.api);
    }
    if has.contains(PipelineFields::API_CREATE_INFO) {
        map.entry(key::pipeline::API_CREATE_INFO)
            .write_bin(p.api_create_info);
    }

    map.finish(out);
    Ok(())
}

fn encode_shader(out: &mut MsgPackWriter, shader: &ShaderMetadata) {
    let mut map = MapBody::new();
    if shader.has.contains(ShaderFields::API_SHADER_HASH) {
        write_hash(map.entry(key::shader::API_SHADER_HASH), shader.api_shader_hash);
    }
    if shader.has.contains(ShaderFields::HARDWARE_MAPPING) {
        let stages: Vec<HardwareStage> = shader.hardware_mapping.stages().collect();
        let w = map.entry(key::shader::HARDWARE_MAPPING);
        w.write_array_len(stages.len() as u32);
        for stage in stages {
            w.write_str(stage.key());
        }
    }
    map.finish(out);
}

fn encode_hardware_stage(
    out: &mut MsgPackWriter,
    stage: &HardwareStageMetadata,
    allowed: HardwareStageFields,
) {
    use key::hardware_stage as hw;

    let has = stage.has & allowed;
    let mut map = MapBody::new();

    if has.contains(HardwareStageFields::ENTRY_POINT) {
        match stage.entry_point.name() {
            Some(name) => map.entry(hw::ENTRY_POINT).write_str(&name),
            // An unknown symbol has no wire name; it cannot have been decoded either.
            None => trace!("hardware stage entry point is unknown; not encoded"),
        }
    }

    let scalars = [
        (
            HardwareStageFields::SCRATCH_MEMORY_SIZE,
            hw::SCRATCH_MEMORY_SIZE,
            stage.scratch_memory_size,
        ),
        (HardwareStageFields::LDS_SIZE, hw::LDS_SIZE, stage.lds_size),
        (
            HardwareStageFields::PERF_DATA_BUFFER_SIZE,
            hw::PERF_DATA_BUFFER_SIZE,
            stage.perf_data_buffer_size,
        ),
        (HardwareStageFields::VGPR_COUNT, hw::VGPR_COUNT, stage.vgpr_count),
        (HardwareStageFields::SGPR_COUNT, hw::SGPR_COUNT, stage.sgpr_count),
        (HardwareStageFields::VGPR_LIMIT, hw::VGPR_LIMIT, stage.vgpr_limit),
        (HardwareStageFields::SGPR_LIMIT, hw::SGPR_LIMIT, stage.sgpr_limit),
        (HardwareStageFields::WAVEFRONT_SIZE, hw::WAVEFRONT_SIZE, stage.wavefront_size),
        (HardwareStageFields::MAX_PRIMS_PER_WAVE, hw::MAX_PRIMS_PER_WAVE, stage.max_prims_per_wave),
    ];
    for (field, k, value) in scalars {
        if has.contains(field) {
            map.entry(k).write_uint(u64::from(value));
        }
    }

    if has.contains(HardwareStageFields::THREADGROUP_DIMENSIONS) {
        let w = map.entry(hw::THREADGROUP_DIMENSIONS);
        w.write_array_len(3);
        for &dim in &stage.threadgroup_dimensions {
            w.write_uint(u64::from(dim));
        }
    }

    let flags = [
        (HardwareStageFields::USES_UAVS, hw::USES_UAVS, HardwareStageFlags::USES_UAVS),
        (HardwareStageFields::USES_ROVS, hw::USES_ROVS, HardwareStageFlags::USES_ROVS),
        (HardwareStageFields::WRITES_UAVS, hw::WRITES_UAVS, HardwareStageFlags::WRITES_UAVS),
        (HardwareStageFields::WRITES_DEPTH, hw::WRITES_DEPTH, HardwareStageFlags::WRITES_DEPTH),
        (
            HardwareStageFields::USES_APPEND_CONSUME,
            hw::USES_APPEND_CONSUME,
            HardwareStageFlags::USES_APPEND_CONSUME,
        ),
        (HardwareStageFields::USES_PRIM_ID, hw::USES_PRIM_ID, HardwareStageFlags::USES_PRIM_ID),
    ];
    for (field, k, flag) in flags {
        if has.contains(field) {
            map.entry(k).write_bool(stage.flags.contains(flag));
        }
    }

    map.finish(out);
}

fn write_hash(w: &mut MsgPackWriter, hash: Hash128) {
    w.write_array_len(2);
    w.write_uint(hash.lower);
    w.write_uint(hash.upper);
}

fn check_capacity(s: &str, capacity: usize) -> Result<()> {
    if s.len() >= capacity {
        return Err(MetadataError::StringTooLong {
            offset: 0,
            len: s.len(),
            capacity,
        });
    }
    Ok(())
}

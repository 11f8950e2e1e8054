//! Pipeline metadata schema: the key space and the decoded structures.
//!
//! Every optional field is paired with a bit in a presence set ([`PipelineFields`],
//! [`ShaderFields`], [`HardwareStageFields`]). A field whose bit is clear holds its `Default`
//! value and must not be interpreted by consumers.

use core::fmt;

use bitflags::bitflags;

use crate::lazy::LazyRef;

/// Major version of the metadata layout this crate understands.
pub const METADATA_MAJOR_VERSION: u32 = 2;
/// Newest minor version whose keys this crate knows about.
pub const METADATA_MINOR_VERSION: u32 = 6;

/// Capacity of [`PipelineMetadata::name`], including the terminator slot.
pub const PIPELINE_NAME_CAPACITY: usize = 256;
/// Capacity of [`PipelineMetadata::api`], including the terminator slot.
pub const API_NAME_CAPACITY: usize = 16;

/// Stable string keys of the wire format.
///
/// Adding keys is forward compatible; renaming or removing one requires a major version bump.
pub mod key {
    pub const VERSION: &str = "amdpal.version";
    pub const PIPELINES: &str = "amdpal.pipelines";

    pub mod pipeline {
        pub const NAME: &str = ".name";
        pub const TYPE: &str = ".type";
        pub const INTERNAL_PIPELINE_HASH: &str = ".internal_pipeline_hash";
        pub const SHADERS: &str = ".shaders";
        pub const HARDWARE_STAGES: &str = ".hardware_stages";
        pub const SHADER_FUNCTIONS: &str = ".shader_functions";
        pub const REGISTERS: &str = ".registers";
        pub const USER_DATA_LIMIT: &str = ".user_data_limit";
        pub const SPILL_THRESHOLD: &str = ".spill_threshold";
        pub const USES_VIEWPORT_ARRAY_INDEX: &str = ".uses_viewport_array_index";
        pub const ES_GS_LDS_SIZE: &str = ".es_gs_lds_size";
        pub const STREAM_OUT_TABLE_ADDRESS: &str = ".stream_out_table_address";
        pub const INDIRECT_USER_DATA_TABLE_ADDRESSES: &str = ".indirect_user_data_table_addresses";
        pub const NGG_SUBGROUP_SIZE: &str = ".nggSubgroupSize";
        pub const NUM_INTERPOLANTS: &str = ".num_interpolants";
        pub const MESH_SCRATCH_MEMORY_SIZE: &str = ".mesh_scratch_memory_size";
        pub const CALC_WAVE_BREAK_SIZE_AT_DRAW_TIME: &str = ".calc_wave_break_size_at_draw_time";
        pub const API: &str = ".api";
        pub const API_CREATE_INFO: &str = ".api_create_info";
    }

    pub mod shader {
        pub const API_SHADER_HASH: &str = ".api_shader_hash";
        pub const HARDWARE_MAPPING: &str = ".hardware_mapping";
    }

    pub mod hardware_stage {
        pub const ENTRY_POINT: &str = ".entry_point";
        pub const SCRATCH_MEMORY_SIZE: &str = ".scratch_memory_size";
        pub const LDS_SIZE: &str = ".lds_size";
        pub const PERF_DATA_BUFFER_SIZE: &str = ".perf_data_buffer_size";
        pub const VGPR_COUNT: &str = ".vgpr_count";
        pub const SGPR_COUNT: &str = ".sgpr_count";
        pub const VGPR_LIMIT: &str = ".vgpr_limit";
        pub const SGPR_LIMIT: &str = ".sgpr_limit";
        pub const THREADGROUP_DIMENSIONS: &str = ".threadgroup_dimensions";
        pub const WAVEFRONT_SIZE: &str = ".wavefront_size";
        pub const USES_UAVS: &str = ".uses_uavs";
        pub const USES_ROVS: &str = ".uses_rovs";
        pub const WRITES_UAVS: &str = ".writes_uavs";
        pub const WRITES_DEPTH: &str = ".writes_depth";
        pub const USES_APPEND_CONSUME: &str = ".uses_append_consume";
        pub const MAX_PRIMS_PER_WAVE: &str = ".max_prims_per_wave";
        pub const USES_PRIM_ID: &str = ".uses_prim_id";
    }
}

/// Metadata layout version (`amdpal.version`).
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct MetadataVersion {
    pub major: u32,
    pub minor: u32,
}

impl MetadataVersion {
    pub const CURRENT: MetadataVersion = MetadataVersion {
        major: METADATA_MAJOR_VERSION,
        minor: METADATA_MINOR_VERSION,
    };
}

impl fmt::Display for MetadataVersion {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}.{}", self.major, self.minor)
    }
}

/// A 128-bit hash stored on the wire as `[lower, upper]`.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash)]
pub struct Hash128 {
    pub lower: u64,
    pub upper: u64,
}

impl Hash128 {
    pub const fn new(lower: u64, upper: u64) -> Self {
        Self { lower, upper }
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash)]
pub enum PipelineType {
    #[default]
    VsPs,
    Gs,
    Cs,
    Ngg,
    Tess,
    GsTess,
    NggTess,
    Mesh,
    TaskMesh,
}

impl PipelineType {
    pub const ALL: [PipelineType; 9] = [
        PipelineType::VsPs,
        PipelineType::Gs,
        PipelineType::Cs,
        PipelineType::Ngg,
        PipelineType::Tess,
        PipelineType::GsTess,
        PipelineType::NggTess,
        PipelineType::Mesh,
        PipelineType::TaskMesh,
    ];

    pub fn name(self) -> &'static str {
        match self {
            PipelineType::VsPs => "VsPs",
            PipelineType::Gs => "Gs",
            PipelineType::Cs => "Cs",
            PipelineType::Ngg => "Ngg",
            PipelineType::Tess => "Tess",
            PipelineType::GsTess => "GsTess",
            PipelineType::NggTess => "NggTess",
            PipelineType::Mesh => "Mesh",
            PipelineType::TaskMesh => "TaskMesh",
        }
    }

    pub fn from_name(name: &str) -> Option<Self> {
        Self::ALL.into_iter().find(|ty| ty.name() == name)
    }
}

/// API-level shader stage.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum ApiShaderType {
    Cs,
    Task,
    Vs,
    Hs,
    Ds,
    Gs,
    Mesh,
    Ps,
}

impl ApiShaderType {
    pub const COUNT: usize = 8;
    pub const ALL: [ApiShaderType; Self::COUNT] = [
        ApiShaderType::Cs,
        ApiShaderType::Task,
        ApiShaderType::Vs,
        ApiShaderType::Hs,
        ApiShaderType::Ds,
        ApiShaderType::Gs,
        ApiShaderType::Mesh,
        ApiShaderType::Ps,
    ];

    pub fn index(self) -> usize {
        self as usize
    }

    /// Key of this stage inside the `.shaders` map.
    pub fn key(self) -> &'static str {
        match self {
            ApiShaderType::Cs => ".compute",
            ApiShaderType::Task => ".task",
            ApiShaderType::Vs => ".vertex",
            ApiShaderType::Hs => ".hull",
            ApiShaderType::Ds => ".domain",
            ApiShaderType::Gs => ".geometry",
            ApiShaderType::Mesh => ".mesh",
            ApiShaderType::Ps => ".pixel",
        }
    }

    pub fn from_key(key: &str) -> Option<Self> {
        Self::ALL.into_iter().find(|ty| ty.key() == key)
    }
}

/// Hardware shader stage.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum HardwareStage {
    Ls,
    Hs,
    Es,
    Gs,
    Vs,
    Ps,
    Cs,
}

impl HardwareStage {
    pub const COUNT: usize = 7;
    pub const ALL: [HardwareStage; Self::COUNT] = [
        HardwareStage::Ls,
        HardwareStage::Hs,
        HardwareStage::Es,
        HardwareStage::Gs,
        HardwareStage::Vs,
        HardwareStage::Ps,
        HardwareStage::Cs,
    ];

    pub fn index(self) -> usize {
        self as usize
    }

    fn abbrev(self) -> &'static str {
        match self {
            HardwareStage::Ls => "ls",
            HardwareStage::Hs => "hs",
            HardwareStage::Es => "es",
            HardwareStage::Gs => "gs",
            HardwareStage::Vs => "vs",
            HardwareStage::Ps => "ps",
            HardwareStage::Cs => "cs",
        }
    }

    /// Key of this stage inside `.hardware_stages` and `.hardware_mapping`.
    pub fn key(self) -> &'static str {
        match self {
            HardwareStage::Ls => ".ls",
            HardwareStage::Hs => ".hs",
            HardwareStage::Es => ".es",
            HardwareStage::Gs => ".gs",
            HardwareStage::Vs => ".vs",
            HardwareStage::Ps => ".ps",
            HardwareStage::Cs => ".cs",
        }
    }

    pub fn from_key(key: &str) -> Option<Self> {
        Self::ALL.into_iter().find(|stage| stage.key() == key)
    }

    pub fn mask(self) -> HardwareStageMask {
        HardwareStageMask::from_bits_truncate(1 << self.index())
    }
}

/// Named ELF symbols a pipeline binary may define.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash)]
pub enum PipelineSymbolType {
    #[default]
    Unknown,
    /// `_amdgpu_<stage>_main`
    MainEntry(HardwareStage),
    /// `_amdgpu_<stage>_shdr_intrl_table`
    ShdrIntrlTblPtr(HardwareStage),
    /// `_amdgpu_<stage>_disasm`
    Disassembly(HardwareStage),
}

const SYMBOL_PREFIX: &str = "_amdgpu_";

impl PipelineSymbolType {
    pub fn stage(self) -> Option<HardwareStage> {
        match self {
            PipelineSymbolType::Unknown => None,
            PipelineSymbolType::MainEntry(stage)
            | PipelineSymbolType::ShdrIntrlTblPtr(stage)
            | PipelineSymbolType::Disassembly(stage) => Some(stage),
        }
    }

    fn suffix(self) -> &'static str {
        match self {
            PipelineSymbolType::Unknown => "",
            PipelineSymbolType::MainEntry(_) => "_main",
            PipelineSymbolType::ShdrIntrlTblPtr(_) => "_shdr_intrl_table",
            PipelineSymbolType::Disassembly(_) => "_disasm",
        }
    }

    /// ELF symbol name, or `None` for [`PipelineSymbolType::Unknown`].
    pub fn name(self) -> Option<String> {
        let stage = self.stage()?;
        Some(format!("{SYMBOL_PREFIX}{}{}", stage.abbrev(), self.suffix()))
    }

    pub fn from_name(name: &str) -> Option<Self> {
        let rest = name.strip_prefix(SYMBOL_PREFIX)?;
        HardwareStage::ALL.into_iter().find_map(|stage| {
            let suffix = rest.strip_prefix(stage.abbrev())?;
            match suffix {
                "_main" => Some(PipelineSymbolType::MainEntry(stage)),
                "_shdr_intrl_table" => Some(PipelineSymbolType::ShdrIntrlTblPtr(stage)),
                "_disasm" => Some(PipelineSymbolType::Disassembly(stage)),
                _ => None,
            }
        })
    }
}

impl fmt::Display for PipelineSymbolType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.name() {
            Some(name) => f.write_str(&name),
            None => f.write_str("<unknown symbol>"),
        }
    }
}

bitflags! {
    /// Set of hardware stages an API shader maps onto.
    #[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash)]
    pub struct HardwareStageMask: u32 {
        const LS = 1 << 0;
        const HS = 1 << 1;
        const ES = 1 << 2;
        const GS = 1 << 3;
        const VS = 1 << 4;
        const PS = 1 << 5;
        const CS = 1 << 6;
    }
}

impl HardwareStageMask {
    pub fn stages(self) -> impl Iterator<Item = HardwareStage> {
        HardwareStage::ALL
            .into_iter()
            .filter(move |stage| self.contains(stage.mask()))
    }
}

bitflags! {
    /// Presence bits for [`CodeObjectMetadata`].
    #[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash)]
    pub struct CodeObjectFields: u8 {
        const VERSION = 1 << 0;
    }
}

bitflags! {
    /// Presence bits for [`PipelineMetadata`].
    #[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash)]
    pub struct PipelineFields: u32 {
        const NAME = 1 << 0;
        const TYPE = 1 << 1;
        const INTERNAL_PIPELINE_HASH = 1 << 2;
        const SHADER_FUNCTIONS = 1 << 3;
        const REGISTERS = 1 << 4;
        const USER_DATA_LIMIT = 1 << 5;
        const SPILL_THRESHOLD = 1 << 6;
        const USES_VIEWPORT_ARRAY_INDEX = 1 << 7;
        const ES_GS_LDS_SIZE = 1 << 8;
        const STREAM_OUT_TABLE_ADDRESS = 1 << 9;
        const INDIRECT_USER_DATA_TABLE_ADDRESSES = 1 << 10;
        const NGG_SUBGROUP_SIZE = 1 << 11;
        const NUM_INTERPOLANTS = 1 << 12;
        const MESH_SCRATCH_MEMORY_SIZE = 1 << 13;
        const CALC_WAVE_BREAK_SIZE_AT_DRAW_TIME = 1 << 14;
        const API = 1 << 17;
        const API_CREATE_INFO = 1 << 18;

        /// Fields only legal for clients older than interface 619.
        const LEGACY = Self::STREAM_OUT_TABLE_ADDRESS.bits()
            | Self::INDIRECT_USER_DATA_TABLE_ADDRESSES.bits()
            | Self::CALC_WAVE_BREAK_SIZE_AT_DRAW_TIME.bits();
    }
}

bitflags! {
    /// Presence bits for [`ShaderMetadata`].
    #[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash)]
    pub struct ShaderFields: u8 {
        const API_SHADER_HASH = 1 << 0;
        const HARDWARE_MAPPING = 1 << 1;
    }
}

bitflags! {
    /// Presence bits for [`HardwareStageMetadata`].
    #[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash)]
    pub struct HardwareStageFields: u32 {
        const ENTRY_POINT = 1 << 0;
        const SCRATCH_MEMORY_SIZE = 1 << 1;
        const LDS_SIZE = 1 << 2;
        const PERF_DATA_BUFFER_SIZE = 1 << 3;
        const VGPR_COUNT = 1 << 4;
        const SGPR_COUNT = 1 << 5;
        const VGPR_LIMIT = 1 << 6;
        const SGPR_LIMIT = 1 << 7;
        const THREADGROUP_DIMENSIONS = 1 << 8;
        const WAVEFRONT_SIZE = 1 << 9;
        const USES_UAVS = 1 << 10;
        const USES_ROVS = 1 << 11;
        const WRITES_UAVS = 1 << 12;
        const WRITES_DEPTH = 1 << 13;
        const USES_APPEND_CONSUME = 1 << 14;
        const MAX_PRIMS_PER_WAVE = 1 << 15;
        const USES_PRIM_ID = 1 << 16;

        const LEGACY = Self::MAX_PRIMS_PER_WAVE.bits();
    }
}

bitflags! {
    /// Boolean attributes of a hardware stage.
    #[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash)]
    pub struct HardwareStageFlags: u8 {
        const USES_UAVS = 1 << 0;
        const USES_ROVS = 1 << 1;
        const WRITES_UAVS = 1 << 2;
        const WRITES_DEPTH = 1 << 3;
        const USES_APPEND_CONSUME = 1 << 4;
        const USES_PRIM_ID = 1 << 5;
    }
}

bitflags! {
    /// Boolean attributes of a pipeline.
    #[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash)]
    pub struct PipelineFlags: u8 {
        const USES_VIEWPORT_ARRAY_INDEX = 1 << 0;
        const CALC_WAVE_BREAK_SIZE_AT_DRAW_TIME = 1 << 1;
    }
}

/// Per-API-shader metadata.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ShaderMetadata {
    /// Input shader hash, typically passed in from the client.
    pub api_shader_hash: Hash128,
    /// Hardware stages this API shader maps to.
    pub hardware_mapping: HardwareStageMask,
    pub has: ShaderFields,
}

/// Per-hardware-stage metadata.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct HardwareStageMetadata {
    /// Symbol of this stage's entry point.
    pub entry_point: PipelineSymbolType,
    pub scratch_memory_size: u32,
    pub lds_size: u32,
    pub perf_data_buffer_size: u32,
    pub vgpr_count: u32,
    pub sgpr_count: u32,
    /// VGPR limit the compiler was asked to honor (only set if it differs from the HW default).
    pub vgpr_limit: u32,
    pub sgpr_limit: u32,
    /// Thread-group X/Y/Z dimensions (compute only).
    pub threadgroup_dimensions: [u32; 3],
    /// Wavefront size (only set if it differs from the HW default).
    pub wavefront_size: u32,
    /// Deprecated; only decoded for legacy clients.
    pub max_prims_per_wave: u32,
    pub flags: HardwareStageFlags,
    pub has: HardwareStageFields,
}

impl HardwareStageMetadata {
    pub fn is_empty(&self) -> bool {
        self.has.is_empty()
    }
}

/// Per-pipeline metadata.
///
/// Borrowed data (`name`, `api`, `api_create_info` and the lazy references) points into the
/// blob that was decoded and is only valid as long as that blob is.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct PipelineMetadata<'a> {
    pub name: &'a str,
    pub pipeline_type: PipelineType,
    /// Lower half is the stable hash (shader replacement lookup), upper half the unique hash
    /// (pipeline cache identity).
    pub internal_pipeline_hash: Hash128,
    pub shaders: [ShaderMetadata; ApiShaderType::COUNT],
    pub hardware_stages: [HardwareStageMetadata; HardwareStage::COUNT],
    /// Per-shader-function metadata map, parsed on demand.
    pub shader_functions: LazyRef<'a>,
    /// Register value map, parsed on demand.
    pub registers: LazyRef<'a>,
    /// Number of user data entries accessed by this pipeline.
    pub user_data_limit: u32,
    /// User data spill threshold; `0xFFFF` means no spilling.
    pub spill_threshold: u32,
    /// LDS bytes used for ES->GS data passing.
    pub es_gs_lds_size: u32,
    pub stream_out_table_address: u32,
    pub indirect_user_data_table_addresses: [u32; 3],
    /// Explicit maximum NGG subgroup size, in threads.
    pub ngg_subgroup_size: u32,
    pub num_interpolants: u32,
    pub mesh_scratch_memory_size: u32,
    /// Client API name.
    pub api: &'a str,
    /// Opaque client-defined creation info.
    pub api_create_info: &'a [u8],
    pub flags: PipelineFlags,
    pub has: PipelineFields,
}

impl<'a> PipelineMetadata<'a> {
    pub fn shader(&self, ty: ApiShaderType) -> &ShaderMetadata {
        &self.shaders[ty.index()]
    }

    pub fn hardware_stage(&self, stage: HardwareStage) -> &HardwareStageMetadata {
        &self.hardware_stages[stage.index()]
    }

    /// Stable half of the internal hash, if present.
    pub fn stable_hash(&self) -> Option<u64> {
        self.has
            .contains(PipelineFields::INTERNAL_PIPELINE_HASH)
            .then_some(self.internal_pipeline_hash.lower)
    }

    /// Unique half of the internal hash, if present.
    pub fn unique_hash(&self) -> Option<u64> {
        self.has
            .contains(PipelineFields::INTERNAL_PIPELINE_HASH)
            .then_some(self.internal_pipeline_hash.upper)
    }

    pub fn registers(&self) -> Option<LazyRef<'a>> {
        self.has
            .contains(PipelineFields::REGISTERS)
            .then_some(self.registers)
    }

    pub fn shader_functions(&self) -> Option<LazyRef<'a>> {
        self.has
            .contains(PipelineFields::SHADER_FUNCTIONS)
            .then_some(self.shader_functions)
    }
}

/// Root of a decoded metadata blob.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CodeObjectMetadata<'a> {
    pub version: MetadataVersion,
    pub pipeline: PipelineMetadata<'a>,
    pub has: CodeObjectFields,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn symbol_names_roundtrip() {
        for stage in HardwareStage::ALL {
            for symbol in [
                PipelineSymbolType::MainEntry(stage),
                PipelineSymbolType::ShdrIntrlTblPtr(stage),
                PipelineSymbolType::Disassembly(stage),
            ] {
                let name = symbol.name().unwrap();
                assert_eq!(PipelineSymbolType::from_name(&name), Some(symbol), "{name}");
            }
        }
        assert_eq!(
            PipelineSymbolType::MainEntry(HardwareStage::Hs).name().as_deref(),
            Some("_amdgpu_hs_main")
        );
        assert_eq!(PipelineSymbolType::Unknown.name(), None);
        assert_eq!(PipelineSymbolType::from_name("_amdgpu_xs_main"), None);
        assert_eq!(PipelineSymbolType::from_name("hs_main"), None);
    }

    #[test]
    fn stage_keys_are_distinct_and_reversible() {
        for stage in HardwareStage::ALL {
            assert_eq!(HardwareStage::from_key(stage.key()), Some(stage));
        }
        for ty in ApiShaderType::ALL {
            assert_eq!(ApiShaderType::from_key(ty.key()), Some(ty));
        }
        for ty in PipelineType::ALL {
            assert_eq!(PipelineType::from_name(ty.name()), Some(ty));
        }
    }

    #[test]
    fn hardware_stage_mask_iterates_in_stage_order() {
        let mask = HardwareStageMask::HS | HardwareStageMask::LS | HardwareStageMask::PS;
        let stages: Vec<_> = mask.stages().collect();
        assert_eq!(
            stages,
            vec![HardwareStage::Ls, HardwareStage::Hs, HardwareStage::Ps]
        );
    }

    #[test]
    fn absent_hash_is_not_reported() {
        let mut pipeline = PipelineMetadata::default();
        pipeline.internal_pipeline_hash = Hash128::new(1, 2);
        assert_eq!(pipeline.stable_hash(), None);
        pipeline.has |= PipelineFields::INTERNAL_PIPELINE_HASH;
        assert_eq!(pipeline.stable_hash(), Some(1));
        assert_eq!(pipeline.unique_hash(), Some(2));
    }
}

//! GFX9+ hardware stage programming from decoded pipeline metadata.
//!
//! The flow is `pal_abi::decode_metadata` -> [`PipelineChunkHs::late_init`] (once per pipeline)
//! -> [`PipelineChunkHs::write_sh_commands`] / [`PipelineChunkHs::write_context_commands`]
//! (once per command buffer, from any thread).

mod chunk_hs;
pub mod device;
mod error;
mod lookup;
pub mod pm4;
pub mod regs;

pub use chunk_hs::{
    ContextRegs, DynamicRegs, DynamicStageInfo, HsRegs, PipelineChunkHs, ShRegs, SnapshotRegs,
    StageInfo, ENTRY_POINT_ALIGNMENT,
};
pub use device::{ChipProperties, GfxLevel, Workarounds};
pub use error::{LateInitError, Result};
pub use lookup::{
    GpuSymbol, HashAccumulator, PerfDataInfo, RegisterLookup, SymbolResolver, SymbolTable,
};
pub use pm4::{CmdSpace, Pm4DecodeError, Pm4Packet, Pm4Packets, ShaderType};

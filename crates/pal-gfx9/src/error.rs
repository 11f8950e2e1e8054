use pal_abi::{MetadataError, PipelineSymbolType};
use thiserror::Error;

pub type Result<T> = std::result::Result<T, LateInitError>;

/// Late-init failures. Each one means the pipeline binary is corrupt; none are retried.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum LateInitError {
    #[error("entry point {symbol} at {gpu_virt_addr:#x} is not {alignment}-byte aligned")]
    MisalignedEntryPoint {
        symbol: PipelineSymbolType,
        gpu_virt_addr: u64,
        alignment: u64,
    },

    /// The address does not fit the program address register.
    #[error("entry point {symbol} at {gpu_virt_addr:#x} is beyond the 40-bit program address range")]
    EntryPointOutOfRange {
        symbol: PipelineSymbolType,
        gpu_virt_addr: u64,
    },

    #[error("pipeline metadata: {0}")]
    Metadata(#[from] MetadataError),
}

//! Collaborators consulted by late-init: register values, symbol addresses, hashing.

use pal_abi::{PipelineSymbolType, RegisterMap};
use xxhash_rust::xxh3::Xxh3;

/// Register value lookup by register offset.
pub trait RegisterLookup {
    fn get(&self, reg: u32) -> Option<u32>;

    fn has_entry(&self, reg: u32) -> bool {
        self.get(reg).is_some()
    }

    /// Value of `reg`, or 0 when absent.
    fn at(&self, reg: u32) -> u32 {
        self.get(reg).unwrap_or(0)
    }
}

impl RegisterLookup for RegisterMap {
    fn get(&self, reg: u32) -> Option<u32> {
        RegisterMap::get(self, reg)
    }
}

/// A pipeline symbol after upload.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct GpuSymbol {
    pub gpu_virt_addr: u64,
    pub size: u64,
}

/// Resolves pipeline symbols to their uploaded location.
pub trait SymbolResolver {
    /// GPU address and size of an uploaded symbol.
    fn gpu_symbol(&self, ty: PipelineSymbolType) -> Option<GpuSymbol>;

    /// Size of the ELF symbol, for symbols that are not uploaded (disassembly).
    fn elf_symbol_size(&self, ty: PipelineSymbolType) -> Option<u64>;
}

/// In-memory [`SymbolResolver`].
#[derive(Debug, Clone, Default)]
pub struct SymbolTable {
    gpu: Vec<(PipelineSymbolType, GpuSymbol)>,
    elf: Vec<(PipelineSymbolType, u64)>,
}

impl SymbolTable {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_gpu_symbol(
        mut self,
        ty: PipelineSymbolType,
        gpu_virt_addr: u64,
        size: u64,
    ) -> Self {
        self.gpu.retain(|(t, _)| *t != ty);
        self.gpu.push((ty, GpuSymbol { gpu_virt_addr, size }));
        self
    }

    pub fn with_elf_symbol(mut self, ty: PipelineSymbolType, size: u64) -> Self {
        self.elf.retain(|(t, _)| *t != ty);
        self.elf.push((ty, size));
        self
    }
}

impl SymbolResolver for SymbolTable {
    fn gpu_symbol(&self, ty: PipelineSymbolType) -> Option<GpuSymbol> {
        self.gpu.iter().find(|(t, _)| *t == ty).map(|&(_, sym)| sym)
    }

    fn elf_symbol_size(&self, ty: PipelineSymbolType) -> Option<u64> {
        self.elf.iter().find(|(t, _)| *t == ty).map(|&(_, size)| size)
    }
}

/// Sink for pipeline cache-key material.
pub trait HashAccumulator {
    fn update(&mut self, bytes: &[u8]);
}

impl HashAccumulator for Xxh3 {
    fn update(&mut self, bytes: &[u8]) {
        Xxh3::update(self, bytes);
    }
}

/// Where a stage's performance data buffer address is written, if anywhere.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct PerfDataInfo {
    /// SH register receiving the address; `None` when the buffer is not mapped to user data.
    pub reg_offset: Option<u32>,
    pub gpu_virt_addr: u32,
}

#[cfg(test)]
mod tests {
    use super::*;
    use pal_abi::HardwareStage;

    #[test]
    fn register_map_lookup() {
        let map = RegisterMap::from_entries([(0x2d0a, 7)]);
        assert!(RegisterLookup::has_entry(&map, 0x2d0a));
        assert_eq!(RegisterLookup::at(&map, 0x2d0b), 0);
    }

    #[test]
    fn symbol_table_replaces_duplicates() {
        let ty = PipelineSymbolType::MainEntry(HardwareStage::Hs);
        let table = SymbolTable::new()
            .with_gpu_symbol(ty, 0x100, 4)
            .with_gpu_symbol(ty, 0x200, 8);
        assert_eq!(
            table.gpu_symbol(ty),
            Some(GpuSymbol {
                gpu_virt_addr: 0x200,
                size: 8
            })
        );
        assert_eq!(table.elf_symbol_size(ty), None);
    }

    #[test]
    fn xxh3_accumulates_like_a_single_update() {
        let mut split = Xxh3::new();
        HashAccumulator::update(&mut split, b"hull");
        HashAccumulator::update(&mut split, b"shader");
        let mut whole = Xxh3::new();
        HashAccumulator::update(&mut whole, b"hullshader");
        assert_eq!(split.digest(), whole.digest());
    }
}

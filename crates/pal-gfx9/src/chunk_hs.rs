//! Hull-shader stage programming.
//!
//! [`PipelineChunkHs::late_init`] resolves the stage's symbols and register values once, at
//! pipeline creation, into an immutable snapshot. The write methods replay that snapshot into
//! command space as often as needed, applying per-draw overrides to a local copy only.

use bitflags::bitflags;
use bytemuck::{Pod, Zeroable};
use pal_abi::{
    HardwareStage, HardwareStageFields, PipelineMetadata, PipelineSymbolType, RegisterMap,
};
use tracing::{debug, trace, warn};

use crate::device::{ChipProperties, Workarounds, MAX_WAVE_LIMIT};
use crate::error::{LateInitError, Result};
use crate::lookup::{HashAccumulator, PerfDataInfo, RegisterLookup, SymbolResolver};
use crate::pm4::{set_regs_size, CmdSpace, ShaderType, SH_REG_INDEX_APPLY_KMD_CU_AND_MASK};
use crate::regs::{
    adjust_cu_en_hi, get_256b_addr_hi, get_256b_addr_lo, PgmRsrc3Hs, PgmRsrc4Hs, RegisterInfo,
    CONST_BUF_TBL_START_REG, MM_SPI_SHADER_PGM_CHKSUM_HS, MM_SPI_SHADER_PGM_RSRC1_HS,
    MM_SPI_SHADER_PGM_RSRC2_HS, MM_SPI_SHADER_PGM_RSRC3_HS, MM_SPI_SHADER_PGM_RSRC4_HS,
    MM_SPI_SHADER_USER_ACCUM_LSHS_0, MM_VGT_HOS_MAX_TESS_LEVEL, MM_VGT_HOS_MIN_TESS_LEVEL,
    NUM_USER_ACCUM_REGS,
};

/// Required alignment of a shader entry point.
pub const ENTRY_POINT_ALIGNMENT: u64 = 256;

/// Registers written by [`PipelineChunkHs::write_sh_commands`] that never change per draw.
#[repr(C)]
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Pod, Zeroable)]
pub struct ShRegs {
    pub spi_shader_pgm_lo_ls: u32,
    pub spi_shader_pgm_rsrc1_hs: u32,
    pub spi_shader_pgm_rsrc2_hs: u32,
    pub user_data_internal_table: u32,
    pub spi_shader_pgm_chksum_hs: u32,
}

/// Registers that per-draw overrides may patch.
#[repr(C)]
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Pod, Zeroable)]
pub struct DynamicRegs {
    pub spi_shader_pgm_rsrc3_hs: PgmRsrc3Hs,
    pub spi_shader_pgm_rsrc4_hs: PgmRsrc4Hs,
}

/// Context registers, in register order (`MAX_TESS_LEVEL` precedes `MIN_TESS_LEVEL`).
#[repr(C)]
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Pod, Zeroable)]
pub struct ContextRegs {
    pub vgt_hos_max_tess_level: u32,
    pub vgt_hos_min_tess_level: u32,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct HsRegs {
    pub sh: ShRegs,
    pub dynamic: DynamicRegs,
    pub context: ContextRegs,
}

bitflags! {
    /// Optional registers that were populated during late-init.
    #[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash)]
    pub struct SnapshotRegs: u8 {
        /// `RSRC3` came from the register map (its `CU_EN` is always PAL's).
        const PGM_RSRC3 = 1 << 0;
        /// `RSRC4` is programmed (GFX10+).
        const PGM_RSRC4 = 1 << 1;
        /// `PGM_CHKSUM` came from the register map.
        const PGM_CHKSUM = 1 << 2;
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct StageInfo {
    pub stage_id: HardwareStage,
    /// Size of the entry point's machine code; 0 if the entry point was not found.
    pub code_length: usize,
    pub disassembly_length: usize,
}

/// Per-draw overrides.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct DynamicStageInfo {
    /// Non-zero replaces `WAVE_LIMIT`.
    pub waves_per_sh: u32,
    /// Non-zero restricts the CU enable fields.
    pub cu_enable_mask: u32,
}

/// Immutable, ready-to-replay register state for the HS hardware stage.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PipelineChunkHs {
    chip: ChipProperties,
    reg_info: RegisterInfo,
    workarounds: Workarounds,
    regs: HsRegs,
    present: SnapshotRegs,
    stage_info: StageInfo,
    perf_data: PerfDataInfo,
}

impl PipelineChunkHs {
    /// Upper bound on dwords written by [`Self::write_sh_commands`].
    pub const MAX_SH_DWORDS: usize = set_regs_size(1) // PGM_LO_LS
        + set_regs_size(2) // RSRC1..RSRC2
        + set_regs_size(1) // internal table
        + set_regs_size(1) // CHKSUM
        + set_regs_size(1) // RSRC3
        + set_regs_size(1) // RSRC4
        + set_regs_size(1); // perf data

    /// Dwords written by [`Self::write_context_commands`].
    pub const MAX_CONTEXT_DWORDS: usize = set_regs_size(2);

    /// Builds the snapshot.
    ///
    /// A missing entry point is not an error: code length stays 0 and the program address
    /// register keeps its default. A misaligned or out-of-range entry point is.
    pub fn late_init(
        chip: &ChipProperties,
        metadata: &PipelineMetadata<'_>,
        registers: &impl RegisterLookup,
        symbols: &impl SymbolResolver,
        perf_data: PerfDataInfo,
        hasher: &mut impl HashAccumulator,
    ) -> Result<Self> {
        let reg_info = RegisterInfo::for_level(chip.gfx_level);
        let mut regs = HsRegs::default();
        let mut present = SnapshotRegs::empty();
        let mut stage_info = StageInfo {
            stage_id: HardwareStage::Hs,
            code_length: 0,
            disassembly_length: 0,
        };

        let entry = entry_point_symbol(metadata);
        match symbols.gpu_symbol(entry) {
            Some(symbol) => {
                if symbol.gpu_virt_addr % ENTRY_POINT_ALIGNMENT != 0 {
                    return Err(LateInitError::MisalignedEntryPoint {
                        symbol: entry,
                        gpu_virt_addr: symbol.gpu_virt_addr,
                        alignment: ENTRY_POINT_ALIGNMENT,
                    });
                }
                if get_256b_addr_hi(symbol.gpu_virt_addr) != 0 {
                    return Err(LateInitError::EntryPointOutOfRange {
                        symbol: entry,
                        gpu_virt_addr: symbol.gpu_virt_addr,
                    });
                }
                debug!(
                    %entry,
                    addr = symbol.gpu_virt_addr,
                    size = symbol.size,
                    "resolved HS entry point"
                );
                stage_info.code_length = symbol.size as usize;
                regs.sh.spi_shader_pgm_lo_ls = get_256b_addr_lo(symbol.gpu_virt_addr);
            }
            None => debug!(%entry, "HS entry point not present"),
        }

        if let Some(table) =
            symbols.gpu_symbol(PipelineSymbolType::ShdrIntrlTblPtr(HardwareStage::Hs))
        {
            regs.sh.user_data_internal_table = table.gpu_virt_addr as u32;
        }
        if let Some(size) =
            symbols.elf_symbol_size(PipelineSymbolType::Disassembly(HardwareStage::Hs))
        {
            stage_info.disassembly_length = size as usize;
        }

        regs.sh.spi_shader_pgm_rsrc1_hs = required(registers, MM_SPI_SHADER_PGM_RSRC1_HS);
        regs.sh.spi_shader_pgm_rsrc2_hs = required(registers, MM_SPI_SHADER_PGM_RSRC2_HS);
        if let Some(value) = registers.get(MM_SPI_SHADER_PGM_RSRC3_HS) {
            regs.dynamic.spi_shader_pgm_rsrc3_hs = PgmRsrc3Hs(value);
            present |= SnapshotRegs::PGM_RSRC3;
        }
        // The ABI has no per-stage CU masks, so the device's preferred ones always apply.
        regs.dynamic
            .spi_shader_pgm_rsrc3_hs
            .set_cu_en(chip.cu_enable_mask_lo());

        if chip.gfx_level.is_gfx10_plus() {
            regs.dynamic
                .spi_shader_pgm_rsrc4_hs
                .set_cu_en(chip.cu_enable_mask_hi());
            present |= SnapshotRegs::PGM_RSRC4;

            for i in 0..NUM_USER_ACCUM_REGS {
                let reg = MM_SPI_SHADER_USER_ACCUM_LSHS_0 + i;
                let value = registers.at(reg);
                if value != 0 {
                    warn!(reg, value, "user accumulator register is enabled for LS/HS");
                }
            }
        }

        if chip.supports_spp {
            if let Some(value) = registers.get(MM_SPI_SHADER_PGM_CHKSUM_HS) {
                regs.sh.spi_shader_pgm_chksum_hs = value;
                present |= SnapshotRegs::PGM_CHKSUM;
            }
        }

        regs.context.vgt_hos_min_tess_level = registers.at(MM_VGT_HOS_MIN_TESS_LEVEL);
        regs.context.vgt_hos_max_tess_level = registers.at(MM_VGT_HOS_MAX_TESS_LEVEL);

        hasher.update(bytemuck::bytes_of(&regs.context));

        Ok(Self {
            chip: *chip,
            reg_info,
            workarounds: Workarounds::for_chip(chip),
            regs,
            present,
            stage_info,
            perf_data,
        })
    }

    /// [`Self::late_init`] with register values taken from the pipeline's own `.registers`
    /// map. A pipeline without one programs every register as 0.
    pub fn late_init_from_metadata(
        chip: &ChipProperties,
        metadata: &PipelineMetadata<'_>,
        symbols: &impl SymbolResolver,
        perf_data: PerfDataInfo,
        hasher: &mut impl HashAccumulator,
    ) -> Result<Self> {
        let registers = match metadata.registers() {
            Some(registers) => RegisterMap::parse(registers)?,
            None => RegisterMap::default(),
        };
        Self::late_init(chip, metadata, &registers, symbols, perf_data, hasher)
    }

    pub fn stage_info(&self) -> &StageInfo {
        &self.stage_info
    }

    pub fn regs(&self) -> &HsRegs {
        &self.regs
    }

    pub fn present(&self) -> SnapshotRegs {
        self.present
    }

    pub fn perf_data(&self) -> &PerfDataInfo {
        &self.perf_data
    }

    /// Dynamic registers with `overrides` applied. The snapshot itself is left untouched.
    pub fn dynamic_regs(&self, overrides: &DynamicStageInfo) -> DynamicRegs {
        let mut dynamic = self.regs.dynamic;
        let rsrc3 = &mut dynamic.spi_shader_pgm_rsrc3_hs;

        if overrides.waves_per_sh > 0 {
            // WAVE_LIMIT is 6 bits; masking a larger request could land on 0.
            rsrc3.set_wave_limit(overrides.waves_per_sh.min(MAX_WAVE_LIMIT));
        } else if self.workarounds.zero_wave_limit_is_broken && rsrc3.wave_limit() == 0 {
            // A zero limit disables the limiter on this generation instead of meaning
            // "unlimited".
            rsrc3.set_wave_limit(self.chip.max_waves_per_sh());
        }

        if overrides.cu_enable_mask != 0 {
            rsrc3.set_cu_en(rsrc3.cu_en() & overrides.cu_enable_mask);
            let rsrc4 = &mut dynamic.spi_shader_pgm_rsrc4_hs;
            rsrc4.set_cu_en(adjust_cu_en_hi(rsrc4.cu_en(), overrides.cu_enable_mask));
        }
        dynamic
    }

    /// Appends the SH register writes for this stage.
    pub fn write_sh_commands(&self, space: &mut CmdSpace<'_>, overrides: &DynamicStageInfo) {
        let sh = &self.regs.sh;
        let start = space.position();

        space.write_set_one_sh_reg(
            self.reg_info.mm_spi_shader_pgm_lo_ls,
            sh.spi_shader_pgm_lo_ls,
            ShaderType::Graphics,
        );
        space.write_set_seq_sh_regs(
            MM_SPI_SHADER_PGM_RSRC1_HS,
            MM_SPI_SHADER_PGM_RSRC2_HS,
            ShaderType::Graphics,
            &[sh.spi_shader_pgm_rsrc1_hs, sh.spi_shader_pgm_rsrc2_hs],
        );
        space.write_set_one_sh_reg(
            self.reg_info.mm_user_data_start_hs_shader_stage + CONST_BUF_TBL_START_REG,
            sh.user_data_internal_table,
            ShaderType::Graphics,
        );
        if self.chip.supports_spp {
            space.write_set_one_sh_reg(
                MM_SPI_SHADER_PGM_CHKSUM_HS,
                sh.spi_shader_pgm_chksum_hs,
                ShaderType::Graphics,
            );
        }

        let dynamic = self.dynamic_regs(overrides);
        space.write_set_one_sh_reg_index(
            MM_SPI_SHADER_PGM_RSRC3_HS,
            dynamic.spi_shader_pgm_rsrc3_hs.0,
            ShaderType::Graphics,
            SH_REG_INDEX_APPLY_KMD_CU_AND_MASK,
        );
        if self.chip.gfx_level.is_gfx10_plus() {
            space.write_set_one_sh_reg_index(
                MM_SPI_SHADER_PGM_RSRC4_HS,
                dynamic.spi_shader_pgm_rsrc4_hs.0,
                ShaderType::Graphics,
                SH_REG_INDEX_APPLY_KMD_CU_AND_MASK,
            );
        }

        if let Some(reg) = self.perf_data.reg_offset {
            space.write_set_one_sh_reg(reg, self.perf_data.gpu_virt_addr, ShaderType::Graphics);
        }

        trace!(dwords = space.position() - start, "wrote HS sh commands");
    }

    /// Appends the context register writes for this stage.
    pub fn write_context_commands(&self, space: &mut CmdSpace<'_>) {
        let values: [u32; 2] = bytemuck::cast(self.regs.context);
        space.write_set_seq_context_regs(
            MM_VGT_HOS_MAX_TESS_LEVEL,
            MM_VGT_HOS_MIN_TESS_LEVEL,
            &values,
        );
    }
}

fn entry_point_symbol(metadata: &PipelineMetadata<'_>) -> PipelineSymbolType {
    let hs = metadata.hardware_stage(HardwareStage::Hs);
    if hs.has.contains(HardwareStageFields::ENTRY_POINT)
        && hs.entry_point != PipelineSymbolType::Unknown
    {
        hs.entry_point
    } else {
        PipelineSymbolType::MainEntry(HardwareStage::Hs)
    }
}

fn required(registers: &impl RegisterLookup, reg: u32) -> u32 {
    registers.get(reg).unwrap_or_else(|| {
        debug!(reg, "register missing from pipeline; programming 0");
        0
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::device::GfxLevel;
    use crate::lookup::SymbolTable;
    use crate::pm4::{Pm4Packets, IT_SET_SH_REG_INDEX};
    use xxhash_rust::xxh3::Xxh3;

    const HS_MAIN: PipelineSymbolType = PipelineSymbolType::MainEntry(HardwareStage::Hs);

    fn init(chip: &ChipProperties, registers: &RegisterMap) -> PipelineChunkHs {
        let symbols = SymbolTable::new().with_gpu_symbol(HS_MAIN, 0x1_0000, 0x400);
        PipelineChunkHs::late_init(
            chip,
            &PipelineMetadata::default(),
            registers,
            &symbols,
            PerfDataInfo::default(),
            &mut Xxh3::new(),
        )
        .unwrap()
    }

    fn rsrc3_written(chunk: &PipelineChunkHs, overrides: &DynamicStageInfo) -> u32 {
        let mut mem = [0u32; PipelineChunkHs::MAX_SH_DWORDS];
        let mut space = CmdSpace::new(&mut mem);
        chunk.write_sh_commands(&mut space, overrides);
        Pm4Packets::new(space.written())
            .map(|p| p.unwrap())
            .find(|p| p.opcode == IT_SET_SH_REG_INDEX && p.reg == MM_SPI_SHADER_PGM_RSRC3_HS)
            .map(|p| p.values[0])
            .unwrap()
    }

    #[test]
    fn snapshot_register_structs_are_dword_arrays() {
        assert_eq!(core::mem::size_of::<ShRegs>(), 5 * 4);
        assert_eq!(core::mem::size_of::<DynamicRegs>(), 2 * 4);
        assert_eq!(core::mem::size_of::<ContextRegs>(), 2 * 4);
    }

    #[test]
    fn zero_wave_limit_is_replaced_on_gfx9_only() {
        let registers = RegisterMap::from_entries([(MM_SPI_SHADER_PGM_RSRC3_HS, 0)]);

        let gfx9 = ChipProperties::new(GfxLevel::Gfx9);
        let chunk = init(&gfx9, &registers);
        let rsrc3 = PgmRsrc3Hs(rsrc3_written(&chunk, &DynamicStageInfo::default()));
        assert_eq!(rsrc3.wave_limit(), gfx9.max_waves_per_sh());
        assert_ne!(rsrc3.wave_limit(), 0);

        let gfx10 = ChipProperties::new(GfxLevel::Gfx10_3);
        let chunk = init(&gfx10, &registers);
        let rsrc3 = PgmRsrc3Hs(rsrc3_written(&chunk, &DynamicStageInfo::default()));
        assert_eq!(rsrc3.wave_limit(), 0);
    }

    #[test]
    fn explicit_wave_limit_wins_over_workaround() {
        let chip = ChipProperties::new(GfxLevel::Gfx9);
        let chunk = init(&chip, &RegisterMap::default());
        let overrides = DynamicStageInfo {
            waves_per_sh: 5,
            cu_enable_mask: 0,
        };
        assert_eq!(PgmRsrc3Hs(rsrc3_written(&chunk, &overrides)).wave_limit(), 5);
    }

    #[test]
    fn oversized_wave_limit_override_saturates() {
        let chip = ChipProperties::new(GfxLevel::Gfx9);
        let chunk = init(&chip, &RegisterMap::from_entries([(MM_SPI_SHADER_PGM_RSRC3_HS, 0)]));
        for waves_per_sh in [63, 64, 100, 128, u32::MAX] {
            let overrides = DynamicStageInfo {
                waves_per_sh,
                cu_enable_mask: 0,
            };
            let written = PgmRsrc3Hs(rsrc3_written(&chunk, &overrides));
            assert_eq!(written.wave_limit(), MAX_WAVE_LIMIT, "waves_per_sh = {waves_per_sh}");
        }
    }

    #[test]
    fn non_zero_wave_limit_is_kept_on_gfx9() {
        let mut rsrc3 = PgmRsrc3Hs(0);
        rsrc3.set_wave_limit(12);
        let registers = RegisterMap::from_entries([(MM_SPI_SHADER_PGM_RSRC3_HS, rsrc3.0)]);
        let chunk = init(&ChipProperties::new(GfxLevel::Gfx9), &registers);
        let written = PgmRsrc3Hs(rsrc3_written(&chunk, &DynamicStageInfo::default()));
        assert_eq!(written.wave_limit(), 12);
    }

    #[test]
    fn cu_masks_come_from_the_chip_and_overrides() {
        let chip = ChipProperties {
            cu_enable_mask: 0x00ff_0f0f,
            ..ChipProperties::new(GfxLevel::Gfx10_3)
        };
        // The register map's CU_EN is ignored.
        let registers = RegisterMap::from_entries([(MM_SPI_SHADER_PGM_RSRC3_HS, 0xffff)]);
        let chunk = init(&chip, &registers);
        assert_eq!(chunk.regs().dynamic.spi_shader_pgm_rsrc3_hs.cu_en(), 0x0f0f);
        assert_eq!(chunk.regs().dynamic.spi_shader_pgm_rsrc4_hs.cu_en(), 0x00ff);
        assert!(chunk
            .present()
            .contains(SnapshotRegs::PGM_RSRC3 | SnapshotRegs::PGM_RSRC4));

        let dynamic = chunk.dynamic_regs(&DynamicStageInfo {
            waves_per_sh: 0,
            cu_enable_mask: 0x000f_00ff,
        });
        assert_eq!(dynamic.spi_shader_pgm_rsrc3_hs.cu_en(), 0x000f);
        assert_eq!(dynamic.spi_shader_pgm_rsrc4_hs.cu_en(), 0x000f);
        // Snapshot untouched.
        assert_eq!(chunk.regs().dynamic.spi_shader_pgm_rsrc3_hs.cu_en(), 0x0f0f);
    }

    #[test]
    fn gfx9_has_no_rsrc4() {
        let chunk = init(&ChipProperties::new(GfxLevel::Gfx9), &RegisterMap::default());
        assert!(!chunk.present().contains(SnapshotRegs::PGM_RSRC4));
        assert_eq!(chunk.regs().dynamic.spi_shader_pgm_rsrc4_hs, PgmRsrc4Hs(0));
    }

    #[test]
    fn context_commands_write_max_then_min() {
        let registers = RegisterMap::from_entries([
            (MM_VGT_HOS_MIN_TESS_LEVEL, 0x3f80_0000),
            (MM_VGT_HOS_MAX_TESS_LEVEL, 0x4200_0000),
        ]);
        let chunk = init(&ChipProperties::new(GfxLevel::Gfx10_1), &registers);
        let mut mem = [0u32; PipelineChunkHs::MAX_CONTEXT_DWORDS];
        let mut space = CmdSpace::new(&mut mem);
        chunk.write_context_commands(&mut space);
        assert_eq!(space.remaining(), 0);
        let packet = Pm4Packets::new(space.written()).next().unwrap().unwrap();
        assert_eq!(
            packet.writes().collect::<Vec<_>>(),
            vec![
                (MM_VGT_HOS_MAX_TESS_LEVEL, 0x4200_0000),
                (MM_VGT_HOS_MIN_TESS_LEVEL, 0x3f80_0000)
            ]
        );
    }

    #[test]
    fn metadata_entry_point_overrides_default_symbol() {
        let mut metadata = PipelineMetadata::default();
        let hs = &mut metadata.hardware_stages[HardwareStage::Hs.index()];
        hs.entry_point = PipelineSymbolType::MainEntry(HardwareStage::Ls);
        hs.has |= HardwareStageFields::ENTRY_POINT;
        assert_eq!(
            entry_point_symbol(&metadata),
            PipelineSymbolType::MainEntry(HardwareStage::Ls)
        );
        assert_eq!(entry_point_symbol(&PipelineMetadata::default()), HS_MAIN);
    }
}

//! Register offsets and bitfield views used by the hull-shader chunk.
//!
//! Offsets are dword register addresses as they appear in the pipeline's `.registers` map.

use bytemuck::{Pod, Zeroable};

use crate::device::GfxLevel;

pub const MM_SPI_SHADER_PGM_CHKSUM_HS: u32 = 0x2d00;
pub const MM_SPI_SHADER_PGM_RSRC4_HS: u32 = 0x2d01;
pub const MM_SPI_SHADER_PGM_RSRC3_HS: u32 = 0x2d07;
pub const MM_SPI_SHADER_PGM_RSRC1_HS: u32 = 0x2d0a;
pub const MM_SPI_SHADER_PGM_RSRC2_HS: u32 = 0x2d0b;

/// First of the four LS/HS user accumulator registers (GFX10+).
pub const MM_SPI_SHADER_USER_ACCUM_LSHS_0: u32 = 0x2d2c;
pub const NUM_USER_ACCUM_REGS: u32 = 4;

pub const MM_VGT_HOS_MAX_TESS_LEVEL: u32 = 0xa286;
pub const MM_VGT_HOS_MIN_TESS_LEVEL: u32 = 0xa287;

/// User-data slot (relative to the stage's first user-data register) holding the low half of
/// the shader internal table address.
pub const CONST_BUF_TBL_START_REG: u32 = 1;

/// Register offsets that moved between generations.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RegisterInfo {
    pub mm_spi_shader_pgm_lo_ls: u32,
    pub mm_user_data_start_hs_shader_stage: u32,
}

impl RegisterInfo {
    pub fn for_level(level: GfxLevel) -> Self {
        if level.is_gfx10_plus() {
            Self {
                mm_spi_shader_pgm_lo_ls: 0x2d48,
                mm_user_data_start_hs_shader_stage: 0x2d0c,
            }
        } else {
            Self {
                mm_spi_shader_pgm_lo_ls: 0x2d48,
                mm_user_data_start_hs_shader_stage: 0x2d4c,
            }
        }
    }
}

/// `SPI_SHADER_PGM_RSRC3_HS`.
#[repr(transparent)]
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Pod, Zeroable)]
pub struct PgmRsrc3Hs(pub u32);

impl PgmRsrc3Hs {
    const CU_EN_MASK: u32 = 0xffff;
    const WAVE_LIMIT_SHIFT: u32 = 16;
    const WAVE_LIMIT_MASK: u32 = 0x3f;

    pub fn cu_en(self) -> u32 {
        self.0 & Self::CU_EN_MASK
    }

    pub fn set_cu_en(&mut self, cu_en: u32) {
        self.0 = (self.0 & !Self::CU_EN_MASK) | (cu_en & Self::CU_EN_MASK);
    }

    pub fn wave_limit(self) -> u32 {
        (self.0 >> Self::WAVE_LIMIT_SHIFT) & Self::WAVE_LIMIT_MASK
    }

    pub fn set_wave_limit(&mut self, waves: u32) {
        let field = Self::WAVE_LIMIT_MASK << Self::WAVE_LIMIT_SHIFT;
        self.0 = (self.0 & !field) | ((waves & Self::WAVE_LIMIT_MASK) << Self::WAVE_LIMIT_SHIFT);
    }
}

/// `SPI_SHADER_PGM_RSRC4_HS` (GFX10+ layout).
#[repr(transparent)]
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Pod, Zeroable)]
pub struct PgmRsrc4Hs(pub u32);

impl PgmRsrc4Hs {
    const CU_EN_MASK: u32 = 0xffff;

    pub fn cu_en(self) -> u32 {
        self.0 & Self::CU_EN_MASK
    }

    pub fn set_cu_en(&mut self, cu_en: u32) {
        self.0 = (self.0 & !Self::CU_EN_MASK) | (cu_en & Self::CU_EN_MASK);
    }
}

/// Restricts an `RSRC4` CU enable field by the high half of a 32-bit CU mask.
pub fn adjust_cu_en_hi(cu_en_hi: u32, cu_enable_mask: u32) -> u32 {
    cu_en_hi & (cu_enable_mask >> 16)
}

/// Low bits of a 256-byte aligned address, as programmed into `SPI_SHADER_PGM_LO_*`.
pub fn get_256b_addr_lo(addr: u64) -> u32 {
    (addr >> 8) as u32
}

/// Bits above the ones `get_256b_addr_lo` keeps.
pub fn get_256b_addr_hi(addr: u64) -> u32 {
    (addr >> 40) as u32
}

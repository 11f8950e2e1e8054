//! Per-device capability values.
//!
//! These are computed once when a device is opened and passed into late-init and command
//! replay as plain data, so a single build serves every hardware generation.

use core::fmt;
use core::str::FromStr;

/// Graphics IP generation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum GfxLevel {
    Gfx9,
    Gfx10_1,
    Gfx10_3,
    Gfx11,
}

impl GfxLevel {
    pub const ALL: [GfxLevel; 4] = [
        GfxLevel::Gfx9,
        GfxLevel::Gfx10_1,
        GfxLevel::Gfx10_3,
        GfxLevel::Gfx11,
    ];

    pub fn is_gfx9(self) -> bool {
        self == GfxLevel::Gfx9
    }

    pub fn is_gfx10_plus(self) -> bool {
        self >= GfxLevel::Gfx10_1
    }

    pub fn name(self) -> &'static str {
        match self {
            GfxLevel::Gfx9 => "gfx9",
            GfxLevel::Gfx10_1 => "gfx10",
            GfxLevel::Gfx10_3 => "gfx10.3",
            GfxLevel::Gfx11 => "gfx11",
        }
    }
}

impl fmt::Display for GfxLevel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UnknownGfxLevel(pub String);

impl fmt::Display for UnknownGfxLevel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "unknown gfx level {:?} (expected gfx9, gfx10, gfx10.3 or gfx11)", self.0)
    }
}

impl std::error::Error for UnknownGfxLevel {}

impl FromStr for GfxLevel {
    type Err = UnknownGfxLevel;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let lower = s.to_ascii_lowercase();
        match lower.as_str() {
            "gfx10.1" => return Ok(GfxLevel::Gfx10_1),
            "gfx10_3" => return Ok(GfxLevel::Gfx10_3),
            _ => {}
        }
        GfxLevel::ALL
            .into_iter()
            .find(|level| level.name() == lower)
            .ok_or_else(|| UnknownGfxLevel(s.to_string()))
    }
}

/// Largest value the 6-bit `WAVE_LIMIT` field can hold.
pub const MAX_WAVE_LIMIT: u32 = 63;

/// Waves are counted in units of 16 for the graphics `WAVE_LIMIT` field.
const MAX_WAVES_PER_SH_GRAPHICS_UNIT_SIZE: u32 = 16;

/// Hardware properties that late-init and command replay consult.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ChipProperties {
    pub gfx_level: GfxLevel,
    /// Shader program checksum registers are present.
    pub supports_spp: bool,
    pub num_simd_per_cu: u32,
    pub num_waves_per_simd: u32,
    pub max_num_cu_per_sh: u32,
    /// CU enable mask preferred for graphics work. Bits 15:0 go to `RSRC3`, 31:16 to `RSRC4`.
    pub cu_enable_mask: u32,
}

impl ChipProperties {
    /// Typical values for a part of the given generation.
    pub fn new(gfx_level: GfxLevel) -> Self {
        let (num_simd_per_cu, num_waves_per_simd, max_num_cu_per_sh) = match gfx_level {
            GfxLevel::Gfx9 => (4, 10, 16),
            GfxLevel::Gfx10_1 | GfxLevel::Gfx10_3 => (2, 20, 10),
            GfxLevel::Gfx11 => (2, 16, 10),
        };
        Self {
            gfx_level,
            supports_spp: false,
            num_simd_per_cu,
            num_waves_per_simd,
            max_num_cu_per_sh,
            cu_enable_mask: u32::MAX,
        }
    }

    /// Architectural per-SH wave limit in `WAVE_LIMIT` units.
    pub fn max_waves_per_sh(&self) -> u32 {
        let waves = self
            .num_simd_per_cu
            .saturating_mul(self.num_waves_per_simd)
            .saturating_mul(self.max_num_cu_per_sh)
            / MAX_WAVES_PER_SH_GRAPHICS_UNIT_SIZE;
        waves.min(MAX_WAVE_LIMIT)
    }

    pub fn cu_enable_mask_lo(&self) -> u32 {
        self.cu_enable_mask & 0xffff
    }

    pub fn cu_enable_mask_hi(&self) -> u32 {
        self.cu_enable_mask >> 16
    }
}

/// Hardware defects that need compensation during command replay.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct Workarounds {
    /// `WAVE_LIMIT == 0` disables the limit's safety behaviour instead of meaning "unlimited",
    /// which can starve high-priority compute.
    pub zero_wave_limit_is_broken: bool,
}

impl Workarounds {
    pub fn for_chip(chip: &ChipProperties) -> Self {
        Self {
            zero_wave_limit_is_broken: chip.gfx_level.is_gfx9(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn level_parsing() {
        assert_eq!("gfx9".parse::<GfxLevel>().unwrap(), GfxLevel::Gfx9);
        assert_eq!("GFX10".parse::<GfxLevel>().unwrap(), GfxLevel::Gfx10_1);
        assert_eq!("gfx10.3".parse::<GfxLevel>().unwrap(), GfxLevel::Gfx10_3);
        assert!("gfx8".parse::<GfxLevel>().is_err());
        for level in GfxLevel::ALL {
            assert_eq!(level.name().parse::<GfxLevel>().unwrap(), level);
        }
    }

    #[test]
    fn generation_predicates() {
        assert!(GfxLevel::Gfx9.is_gfx9());
        assert!(!GfxLevel::Gfx9.is_gfx10_plus());
        assert!(GfxLevel::Gfx10_3.is_gfx10_plus());
        assert!(GfxLevel::Gfx11.is_gfx10_plus());
    }

    #[test]
    fn max_waves_per_sh_is_clamped() {
        let chip = ChipProperties::new(GfxLevel::Gfx9);
        // 4 SIMDs * 10 waves * 16 CUs / 16
        assert_eq!(chip.max_waves_per_sh(), 40);

        let big = ChipProperties {
            max_num_cu_per_sh: 64,
            ..chip
        };
        assert_eq!(big.max_waves_per_sh(), MAX_WAVE_LIMIT);
    }

    #[test]
    fn workaround_only_on_gfx9() {
        for level in GfxLevel::ALL {
            let chip = ChipProperties::new(level);
            assert_eq!(
                Workarounds::for_chip(&chip).zero_wave_limit_is_broken,
                level == GfxLevel::Gfx9
            );
        }
    }

    #[test]
    fn cu_mask_halves() {
        let chip = ChipProperties {
            cu_enable_mask: 0xabcd_1234,
            ..ChipProperties::new(GfxLevel::Gfx10_3)
        };
        assert_eq!(chip.cu_enable_mask_lo(), 0x1234);
        assert_eq!(chip.cu_enable_mask_hi(), 0xabcd);
    }
}

use std::io::{self, Write};
use std::path::PathBuf;

use anyhow::{anyhow, bail, Context};
use clap::Parser;
use pal_abi::{
    decode_metadata, parse_shader_functions, ApiShaderType, CodeObjectMetadata, CodecOptions,
    HardwareStage, PipelineMetadata, PipelineSymbolType, RegisterMap, StringOverflow,
    LEGACY_FIELDS_REMOVED_IN_CLIENT_INTERFACE, METADATA_MAJOR_VERSION,
};
use pal_gfx9::pm4::{IT_SET_CONTEXT_REG, IT_SET_SH_REG, IT_SET_SH_REG_INDEX};
use pal_gfx9::{
    ChipProperties, CmdSpace, DynamicStageInfo, GfxLevel, PerfDataInfo, PipelineChunkHs,
    Pm4Packets, SymbolTable,
};
use xxhash_rust::xxh3::Xxh3;

#[derive(Parser, Debug)]
#[command(
    name = "pal-abi-dump",
    about = "Decode a PAL pipeline metadata blob and optionally program the HS stage from it."
)]
struct Args {
    /// Raw MessagePack metadata blob (the contents of the ELF note)
    blob: PathBuf,

    /// Highest metadata major version to accept
    #[arg(long, value_name = "N", default_value_t = METADATA_MAJOR_VERSION)]
    supported_major: u32,

    /// Client interface major version (legacy fields are decoded below 619)
    #[arg(long, value_name = "N", default_value_t = LEGACY_FIELDS_REMOVED_IN_CLIENT_INTERFACE)]
    client_interface: u32,

    /// Truncate oversized strings instead of rejecting the blob
    #[arg(long, action = clap::ArgAction::SetTrue)]
    truncate_strings: bool,

    /// Late-init the HS chunk and print the PM4 it emits
    #[arg(long, action = clap::ArgAction::SetTrue)]
    program_hs: bool,

    /// Target generation (gfx9, gfx10, gfx10.3, gfx11)
    #[arg(long, value_name = "LEVEL", default_value = "gfx10.3")]
    gfx_level: GfxLevel,

    /// The chip supports shader program checksums
    #[arg(long, action = clap::ArgAction::SetTrue)]
    supports_spp: bool,

    /// Device CU enable mask (hex)
    #[arg(long, value_name = "HEX", value_parser = parse_hex_u32)]
    cu_mask: Option<u32>,

    /// Uploaded HS entry point as ADDR:SIZE
    #[arg(long, value_name = "ADDR:SIZE", value_parser = parse_symbol)]
    hs_entry: Option<(u64, u64)>,

    /// Per-draw wave limit override
    #[arg(long, value_name = "N", default_value_t = 0)]
    waves_per_sh: u32,

    /// Per-draw CU enable override (hex)
    #[arg(long, value_name = "HEX", value_parser = parse_hex_u32, default_value = "0")]
    cu_override: u32,
}

fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .with_writer(io::stderr)
        .init();

    let args = Args::parse();
    let stdout = io::stdout();
    run(&args, &mut stdout.lock())
}

fn run(args: &Args, out: &mut impl Write) -> anyhow::Result<()> {
    let blob = std::fs::read(&args.blob)
        .with_context(|| format!("read metadata blob {}", args.blob.display()))?;
    if blob.is_empty() {
        bail!("{} is empty", args.blob.display());
    }

    let options = CodecOptions {
        supported_major_version: args.supported_major,
        client_interface_major_version: args.client_interface,
        string_overflow: if args.truncate_strings {
            StringOverflow::Truncate
        } else {
            StringOverflow::Reject
        },
    };
    let metadata = decode_metadata(&blob, &options)
        .with_context(|| format!("decode {}", args.blob.display()))?;
    tracing::debug!(len = blob.len(), "decoded metadata blob");

    print_metadata(out, &metadata)?;

    if args.program_hs {
        program_hs(args, out, &metadata.pipeline)?;
    }
    Ok(())
}

fn print_metadata(
    out: &mut impl Write,
    metadata: &CodeObjectMetadata<'_>,
) -> anyhow::Result<()> {
    let p = &metadata.pipeline;
    writeln!(
        out,
        "version: {}.{}",
        metadata.version.major, metadata.version.minor
    )?;
    writeln!(out, "pipeline:")?;
    if !p.name.is_empty() {
        writeln!(out, "  name: {}", p.name)?;
    }
    writeln!(out, "  type: {}", p.pipeline_type.name())?;
    if let (Some(stable), Some(unique)) = (p.stable_hash(), p.unique_hash()) {
        writeln!(out, "  internal_pipeline_hash: {stable:#018x} {unique:#018x}")?;
    }
    if !p.api.is_empty() {
        writeln!(out, "  api: {}", p.api)?;
    }
    if !p.api_create_info.is_empty() {
        writeln!(out, "  api_create_info: {} bytes", p.api_create_info.len())?;
    }
    writeln!(out, "  user_data_limit: {}", p.user_data_limit)?;
    writeln!(out, "  spill_threshold: {:#x}", p.spill_threshold)?;
    if !p.flags.is_empty() {
        writeln!(out, "  flags: {:?}", p.flags)?;
    }

    for ty in ApiShaderType::ALL {
        let shader = p.shader(ty);
        if shader.has.is_empty() {
            continue;
        }
        writeln!(
            out,
            "  shader {}: hash {:#018x}{:016x} -> {:?}",
            ty.key(),
            shader.api_shader_hash.upper,
            shader.api_shader_hash.lower,
            shader.hardware_mapping
        )?;
    }

    for stage in HardwareStage::ALL {
        let hw = p.hardware_stage(stage);
        if hw.is_empty() {
            continue;
        }
        writeln!(
            out,
            "  stage {}: entry {} vgprs {}/{} sgprs {}/{} lds {} scratch {} wave{}",
            stage.key(),
            hw.entry_point,
            hw.vgpr_count,
            hw.vgpr_limit,
            hw.sgpr_count,
            hw.sgpr_limit,
            hw.lds_size,
            hw.scratch_memory_size,
            hw.wavefront_size
        )?;
    }

    if let Some(functions) = p.shader_functions() {
        for function in parse_shader_functions(functions)? {
            writeln!(out, "  function: {}", function.name)?;
        }
    }

    if let Some(registers) = p.registers() {
        let map = RegisterMap::parse(registers)?;
        writeln!(out, "  registers: {}", map.len())?;
        for (reg, value) in map.iter() {
            writeln!(out, "    {reg:#06x} = {value:#010x}")?;
        }
    }
    Ok(())
}

fn program_hs(
    args: &Args,
    out: &mut impl Write,
    pipeline: &PipelineMetadata<'_>,
) -> anyhow::Result<()> {
    let mut chip = ChipProperties::new(args.gfx_level);
    chip.supports_spp = args.supports_spp;
    if let Some(mask) = args.cu_mask {
        chip.cu_enable_mask = mask;
    }

    let mut symbols = SymbolTable::new();
    if let Some((addr, size)) = args.hs_entry {
        let hs = pipeline.hardware_stage(HardwareStage::Hs);
        let entry = if hs.has.contains(pal_abi::HardwareStageFields::ENTRY_POINT) {
            hs.entry_point
        } else {
            PipelineSymbolType::MainEntry(HardwareStage::Hs)
        };
        symbols = symbols.with_gpu_symbol(entry, addr, size);
    }

    let mut hasher = Xxh3::new();
    let chunk = PipelineChunkHs::late_init_from_metadata(
        &chip,
        pipeline,
        &symbols,
        PerfDataInfo::default(),
        &mut hasher,
    )
    .context("late-init HS chunk")?;

    let overrides = DynamicStageInfo {
        waves_per_sh: args.waves_per_sh,
        cu_enable_mask: args.cu_override,
    };
    let mut mem =
        vec![0u32; PipelineChunkHs::MAX_SH_DWORDS + PipelineChunkHs::MAX_CONTEXT_DWORDS];
    let mut space = CmdSpace::new(&mut mem);
    chunk.write_sh_commands(&mut space, &overrides);
    chunk.write_context_commands(&mut space);

    writeln!(out, "hs ({}):", chip.gfx_level)?;
    writeln!(out, "  code_length: {}", chunk.stage_info().code_length)?;
    writeln!(out, "  present: {:?}", chunk.present())?;
    writeln!(out, "  context_hash: {:#018x}", hasher.digest())?;
    for packet in Pm4Packets::new(space.written()) {
        let packet = packet.map_err(|err| anyhow!("emitted PM4 does not decode: {err}"))?;
        let op = match packet.opcode {
            IT_SET_SH_REG => "SET_SH_REG",
            IT_SET_SH_REG_INDEX => "SET_SH_REG_INDEX",
            IT_SET_CONTEXT_REG => "SET_CONTEXT_REG",
            _ => "?",
        };
        for (reg, value) in packet.writes() {
            writeln!(out, "  {op:<16} {reg:#06x} = {value:#010x}")?;
        }
    }
    Ok(())
}

fn parse_u64(s: &str) -> Result<u64, String> {
    let s = s.trim();
    let parsed = match s.strip_prefix("0x").or_else(|| s.strip_prefix("0X")) {
        Some(hex) => u64::from_str_radix(hex, 16),
        None => s.parse(),
    };
    parsed.map_err(|err| format!("invalid number {s:?}: {err}"))
}

fn parse_hex_u32(s: &str) -> Result<u32, String> {
    let hex = s.trim_start_matches("0x").trim_start_matches("0X");
    u32::from_str_radix(hex, 16).map_err(|err| format!("invalid hex value {s:?}: {err}"))
}

fn parse_symbol(s: &str) -> Result<(u64, u64), String> {
    let (addr, size) = s
        .split_once(':')
        .ok_or_else(|| format!("expected ADDR:SIZE, got {s:?}"))?;
    Ok((parse_u64(addr)?, parse_u64(size)?))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn symbol_argument_accepts_hex_and_decimal() {
        assert_eq!(parse_symbol("0x100000:512"), Ok((0x10_0000, 512)));
        assert_eq!(parse_symbol("256:0x40"), Ok((256, 0x40)));
        assert!(parse_symbol("0x100").is_err());
        assert!(parse_symbol("zz:1").is_err());
    }

    #[test]
    fn cu_mask_is_hex() {
        assert_eq!(parse_hex_u32("ff00"), Ok(0xff00));
        assert_eq!(parse_hex_u32("0xFFFFFFFF"), Ok(u32::MAX));
        assert!(parse_hex_u32("0x100000000").is_err());
    }

    #[test]
    fn args_parse() {
        let args = Args::try_parse_from([
            "pal-abi-dump",
            "blob.bin",
            "--program-hs",
            "--gfx-level",
            "gfx9",
            "--hs-entry",
            "0x100000:0x200",
            "--cu-override",
            "0xff",
        ])
        .unwrap();
        assert!(args.program_hs);
        assert_eq!(args.gfx_level, GfxLevel::Gfx9);
        assert_eq!(args.hs_entry, Some((0x10_0000, 0x200)));
        assert_eq!(args.cu_override, 0xff);
        assert_eq!(args.client_interface, LEGACY_FIELDS_REMOVED_IN_CLIENT_INTERFACE);
    }
}

use pal_abi::test_utils::{blob_with_registers, build_root, map_value, registers_value, str_value};
use pal_abi::{
    decode_metadata, key, CodecOptions, HardwareStage, MetadataError, PipelineMetadata,
    PipelineSymbolType, METADATA_MAJOR_VERSION, METADATA_MINOR_VERSION,
};
use pal_gfx9::regs::{
    PgmRsrc3Hs, MM_SPI_SHADER_PGM_RSRC1_HS, MM_SPI_SHADER_PGM_RSRC3_HS,
    MM_VGT_HOS_MAX_TESS_LEVEL, MM_VGT_HOS_MIN_TESS_LEVEL,
};
use pal_gfx9::{
    ChipProperties, CmdSpace, DynamicStageInfo, GfxLevel, LateInitError, PerfDataInfo,
    PipelineChunkHs, Pm4Packets, SymbolTable,
};
use pretty_assertions::assert_eq;
use xxhash_rust::xxh3::Xxh3;

#[test]
fn blob_to_pm4() {
    let blob = blob_with_registers(&[
        (MM_SPI_SHADER_PGM_RSRC1_HS, 0xabc),
        (MM_SPI_SHADER_PGM_RSRC3_HS, 0),
        (MM_VGT_HOS_MAX_TESS_LEVEL, 64),
        (MM_VGT_HOS_MIN_TESS_LEVEL, 1),
    ]);
    let metadata = decode_metadata(&blob, &CodecOptions::default()).unwrap();

    let chip = ChipProperties::new(GfxLevel::Gfx9);
    let symbols = SymbolTable::new().with_gpu_symbol(
        PipelineSymbolType::MainEntry(HardwareStage::Hs),
        0x10_0000,
        0x200,
    );
    let chunk = PipelineChunkHs::late_init_from_metadata(
        &chip,
        &metadata.pipeline,
        &symbols,
        PerfDataInfo::default(),
        &mut Xxh3::new(),
    )
    .unwrap();
    assert_eq!(chunk.regs().sh.spi_shader_pgm_rsrc1_hs, 0xabc);

    let mut mem = vec![0u32; PipelineChunkHs::MAX_SH_DWORDS + PipelineChunkHs::MAX_CONTEXT_DWORDS];
    let mut space = CmdSpace::new(&mut mem);
    chunk.write_sh_commands(&mut space, &DynamicStageInfo::default());
    chunk.write_context_commands(&mut space);

    let writes: Vec<(u32, u32)> = Pm4Packets::new(space.written())
        .flat_map(|p| p.unwrap().writes().collect::<Vec<_>>())
        .collect();
    let value_of = |reg: u32| writes.iter().find(|w| w.0 == reg).map(|w| w.1);
    assert_eq!(value_of(MM_SPI_SHADER_PGM_RSRC1_HS), Some(0xabc));
    assert_eq!(value_of(MM_VGT_HOS_MAX_TESS_LEVEL), Some(64));
    assert_eq!(value_of(MM_VGT_HOS_MIN_TESS_LEVEL), Some(1));
    let rsrc3 = PgmRsrc3Hs(value_of(MM_SPI_SHADER_PGM_RSRC3_HS).unwrap());
    assert_eq!(rsrc3.wave_limit(), chip.max_waves_per_sh());
}

fn ls_entry_pipeline_blob() -> Vec<u8> {
    let pipeline = map_value(&[
        (
            key::pipeline::HARDWARE_STAGES,
            map_value(&[(
                ".hs",
                map_value(&[(
                    key::hardware_stage::ENTRY_POINT,
                    str_value("_amdgpu_ls_main"),
                )]),
            )]),
        ),
        (key::pipeline::REGISTERS, registers_value(&[])),
    ]);
    build_root(METADATA_MAJOR_VERSION, METADATA_MINOR_VERSION, pipeline)
}

fn late_init_with(
    metadata: &PipelineMetadata<'_>,
    symbols: &SymbolTable,
) -> Result<PipelineChunkHs, LateInitError> {
    PipelineChunkHs::late_init_from_metadata(
        &ChipProperties::new(GfxLevel::Gfx10_1),
        metadata,
        symbols,
        PerfDataInfo::default(),
        &mut Xxh3::new(),
    )
}

#[test]
fn entry_point_name_from_metadata_is_used() {
    let blob = ls_entry_pipeline_blob();
    let metadata = decode_metadata(&blob, &CodecOptions::default()).unwrap();
    let ls_main = PipelineSymbolType::MainEntry(HardwareStage::Ls);
    let hs_main = PipelineSymbolType::MainEntry(HardwareStage::Hs);

    // Only the LS symbol is registered at an aligned address; the default HS name is a decoy.
    let symbols = SymbolTable::new()
        .with_gpu_symbol(ls_main, 0x300, 0x80)
        .with_gpu_symbol(hs_main, 0x1000, 0x40);
    let chunk = late_init_with(&metadata.pipeline, &symbols).unwrap();
    assert_eq!(chunk.stage_info().code_length, 0x80);
    assert_eq!(chunk.regs().sh.spi_shader_pgm_lo_ls, 0x3);
}

#[test]
fn misaligned_metadata_entry_point_is_rejected() {
    let blob = ls_entry_pipeline_blob();
    let metadata = decode_metadata(&blob, &CodecOptions::default()).unwrap();
    let ls_main = PipelineSymbolType::MainEntry(HardwareStage::Ls);

    let symbols = SymbolTable::new().with_gpu_symbol(ls_main, 0x380, 0x80);
    let err = late_init_with(&metadata.pipeline, &symbols).unwrap_err();
    assert_eq!(
        err,
        LateInitError::MisalignedEntryPoint {
            symbol: ls_main,
            gpu_virt_addr: 0x380,
            alignment: 256,
        }
    );
}

#[test]
fn malformed_register_map_surfaces_at_late_init() {
    // A register value wider than 32 bits is only noticed when the map is parsed.
    let pipeline = map_value(&[(key::pipeline::REGISTERS, {
        let mut w = pal_abi::msgpack::MsgPackWriter::new();
        w.write_map_len(1);
        w.write_uint(u64::from(MM_SPI_SHADER_PGM_RSRC1_HS));
        w.write_uint(1 << 40);
        w.into_bytes()
    })]);
    let blob = build_root(METADATA_MAJOR_VERSION, METADATA_MINOR_VERSION, pipeline);
    let metadata = decode_metadata(&blob, &CodecOptions::default()).unwrap();

    let err = PipelineChunkHs::late_init_from_metadata(
        &ChipProperties::new(GfxLevel::Gfx9),
        &metadata.pipeline,
        &SymbolTable::new(),
        PerfDataInfo::default(),
        &mut Xxh3::new(),
    )
    .unwrap_err();
    assert!(matches!(
        err,
        LateInitError::Metadata(MetadataError::TypeMismatch { .. })
    ));
}

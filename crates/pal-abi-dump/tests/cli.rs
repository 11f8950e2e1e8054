use std::fs;

use pal_abi::key;
use pal_abi::test_utils::{blob_with_registers, build_root, map_value, version_value};
use tempfile::tempdir;

const RSRC1_HS: u32 = 0x2d0a;
const RSRC3_HS: u32 = 0x2d07;
const VGT_HOS_MAX_TESS_LEVEL: u32 = 0xa286;

fn contains(stdout: &[u8], needle: &str) -> bool {
    String::from_utf8_lossy(stdout).contains(needle)
}

#[test]
fn prints_registers_and_hs_packets() {
    let dir = tempdir().unwrap();
    let path = dir.path().join("meta.bin");
    fs::write(
        &path,
        blob_with_registers(&[(RSRC1_HS, 0xabc), (RSRC3_HS, 0), (VGT_HOS_MAX_TESS_LEVEL, 64)]),
    )
    .unwrap();

    let output = assert_cmd::cargo::cargo_bin_cmd!("pal-abi-dump")
        .args([
            path.to_str().unwrap(),
            "--program-hs",
            "--gfx-level",
            "gfx9",
            "--hs-entry",
            "0x100000:0x200",
        ])
        .assert()
        .success()
        .get_output()
        .stdout
        .clone();

    assert!(contains(&output, "version: 2.6"));
    assert!(contains(&output, "registers: 3"));
    assert!(contains(&output, "0x2d0a = 0x00000abc"));
    assert!(contains(&output, "hs (gfx9):"));
    assert!(contains(&output, "SET_SH_REG_INDEX"));
    // Zero wave limit on gfx9 becomes the architectural maximum (40 waves).
    assert!(contains(&output, "0x2d07 = 0x0028ffff"));
    assert!(contains(&output, "SET_CONTEXT_REG  0xa286 = 0x00000040"));
}

#[test]
fn rejects_newer_major_version() {
    let dir = tempdir().unwrap();
    let path = dir.path().join("future.bin");
    fs::write(&path, build_root(3, 0, map_value(&[]))).unwrap();

    assert_cmd::cargo::cargo_bin_cmd!("pal-abi-dump")
        .arg(path.to_str().unwrap())
        .assert()
        .failure();

    assert_cmd::cargo::cargo_bin_cmd!("pal-abi-dump")
        .args([path.to_str().unwrap(), "--supported-major", "3"])
        .assert()
        .success();
}

#[test]
fn rejects_blob_without_pipelines() {
    let dir = tempdir().unwrap();
    let path = dir.path().join("nopipe.bin");
    fs::write(&path, map_value(&[(key::VERSION, version_value(2, 6))])).unwrap();

    assert_cmd::cargo::cargo_bin_cmd!("pal-abi-dump")
        .arg(path.to_str().unwrap())
        .assert()
        .failure();
}

#[test]
fn missing_file_fails() {
    let dir = tempdir().unwrap();
    assert_cmd::cargo::cargo_bin_cmd!("pal-abi-dump")
        .arg(dir.path().join("absent.bin").to_str().unwrap())
        .assert()
        .failure();
}

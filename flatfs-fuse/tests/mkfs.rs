use std::process::Command;

fn mkfs() -> Command {
    Command::new(env!("CARGO_BIN_EXE_mkfs-flatfs"))
}

#[test]
fn prints_layout_summary() {
    let dir = tempfile::tempdir().unwrap();
    let image = dir.path().join("fs.img");

    let output = mkfs()
        .arg(&image)
        .args(["--create-blocks", "1024"])
        .output()
        .unwrap();
    assert!(output.status.success());

    let stdout = String::from_utf8(output.stdout).unwrap();
    assert!(stdout.contains("magic=0x434f5746"));
    assert!(stdout.contains("nr_blocks=1024"));
    assert!(stdout.contains("nr_inodes=1024 (istore=4 blocks)"));
    assert!(stdout.contains("nr_free_inodes=1022"));
    assert_eq!(std::fs::metadata(&image).unwrap().len(), 1024 * 4096);
}

#[test]
fn quiet_run_prints_nothing() {
    let dir = tempfile::tempdir().unwrap();
    let image = dir.path().join("fs.img");

    let output = mkfs()
        .arg(&image)
        .args(["-c", "200", "--quiet"])
        .output()
        .unwrap();
    assert!(output.status.success());
    assert!(output.stdout.is_empty());
}

#[test]
fn small_image_fails() {
    let dir = tempfile::tempdir().unwrap();
    let image = dir.path().join("fs.img");

    let output = mkfs()
        .arg(&image)
        .args(["--create-blocks", "100"])
        .output()
        .unwrap();
    assert_eq!(output.status.code(), Some(1));
    assert!(output.stdout.is_empty());
    assert!(String::from_utf8_lossy(&output.stderr).contains("not large enough"));
}

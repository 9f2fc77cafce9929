use std::fs;

use ntest::timeout;
use unearth::excavate;

#[test]
#[timeout(10000)]
fn copy_reads_source_and_writes_target() -> anyhow::Result<()> {
    let dir = tempfile::tempdir()?;
    let root = dir.path().canonicalize()?;
    fs::write(root.join("a.txt"), "data\n")?;

    let report = excavate("sh", &["-c", "cp a.txt b.txt"], &root)?;

    assert_eq!(report.inputs, vec!["a.txt"]);
    assert_eq!(report.outputs, vec!["b.txt"]);
    assert_eq!(fs::read_to_string(root.join("b.txt"))?, "data\n");

    Ok(())
}

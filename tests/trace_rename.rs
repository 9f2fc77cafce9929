use std::fs;

use ntest::timeout;
use unearth::excavate;

// `mv src dst` within one filesystem is a pure rename: the source is
// removed, the destination written, and nothing is read.
#[test]
#[timeout(10000)]
fn rename_reports_removal_and_write() -> anyhow::Result<()> {
    let dir = tempfile::tempdir()?;
    let root = dir.path().canonicalize()?;
    fs::write(root.join("src"), "payload\n")?;

    let report = excavate("sh", &["-c", "mv src dst"], &root)?;

    assert_eq!(report.inputs, Vec::<String>::new());
    assert_eq!(report.outputs, vec!["dst"]);
    assert_eq!(report.removed, vec!["src"]);
    assert!(!root.join("src").exists());
    assert_eq!(fs::read_to_string(root.join("dst"))?, "payload\n");

    Ok(())
}

use std::fs;

use ntest::timeout;
use unearth::excavate;

// A backgrounded command runs in a forked child; its write must still be
// observed, and exactly once.
#[test]
#[timeout(10000)]
fn forked_child_write_is_reported_once() -> anyhow::Result<()> {
    let dir = tempfile::tempdir()?;
    let root = dir.path().canonicalize()?;

    let report = excavate("sh", &["-c", "echo hi > out.log & wait"], &root)?;

    assert_eq!(report.inputs, Vec::<String>::new());
    assert_eq!(report.outputs, vec!["out.log"]);
    assert_eq!(fs::read_to_string(root.join("out.log"))?, "hi\n");

    Ok(())
}

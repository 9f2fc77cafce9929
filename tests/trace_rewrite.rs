use std::fs;

use ntest::timeout;
use unearth::excavate;

// A file read early and overwritten later is a product of the command, not
// a dependency; the intermediate is never an input either.
#[test]
#[timeout(10000)]
fn rewritten_file_is_an_output_only() -> anyhow::Result<()> {
    let dir = tempfile::tempdir()?;
    let root = dir.path().canonicalize()?;
    fs::write(root.join("f"), "v1\n")?;

    let report = excavate("sh", &["-c", "cat f > f.tmp && cat f.tmp > f"], &root)?;

    assert_eq!(report.inputs, Vec::<String>::new());
    assert_eq!(report.outputs, vec!["f", "f.tmp"]);
    assert_eq!(fs::read_to_string(root.join("f"))?, "v1\n");

    Ok(())
}

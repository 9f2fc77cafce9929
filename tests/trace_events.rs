use std::fs;
use std::path::{Path, PathBuf};
use std::process::Command;

use ntest::timeout;
use unearth::{FileEvents, Program};

#[derive(Debug, Default)]
struct Recorder {
    events: Vec<(char, PathBuf)>,
}

impl FileEvents for Recorder {
    fn on_read(&mut self, path: &Path) {
        self.events.push(('r', path.to_path_buf()));
    }

    fn on_write(&mut self, path: &Path) {
        self.events.push(('w', path.to_path_buf()));
    }

    fn on_remove(&mut self, path: &Path) {
        self.events.push(('x', path.to_path_buf()));
    }
}

// Drive the supervisor directly and check the raw event stream: every
// successful open yields exactly one classified callback, and every path
// is absolute.
#[test]
#[timeout(10000)]
fn open_classification_is_complete_and_absolute() -> anyhow::Result<()> {
    let dir = tempfile::tempdir()?;
    let root = dir.path().canonicalize()?;
    fs::write(root.join("a.txt"), "hello\n")?;

    let mut cmd = Command::new("sh");
    cmd.args(["-c", "cat a.txt > b.txt"]).current_dir(&root);

    let (mut program, _root_pid) = Program::spawn(cmd, Recorder::default())?;
    while let Some(status) = program.wait()? {
        if !status.exited() {
            program.resume(status)?;
        }
    }
    let events = program.into_sink().events;

    assert!(!events.is_empty());
    for (_, path) in &events {
        assert!(path.is_absolute(), "non-absolute path reported: {path:?}");
    }

    let source = root.join("a.txt");
    let target = root.join("b.txt");
    let reads = events.iter().filter(|e| *e == &('r', source.clone())).count();
    let writes = events.iter().filter(|e| *e == &('w', target.clone())).count();
    assert_eq!(reads, 1);
    assert_eq!(writes, 1);

    Ok(())
}

//! Dependency collection on top of the trace callbacks.
//!
//! [`DepTracker`] is the sink that turns the raw read/write/remove stream
//! into input and output sets, and [`excavate`] is the one-shot driver:
//! trace a command to completion, return what it consumed and produced.

use std::collections::BTreeSet;
use std::path::{Path, PathBuf};
use std::process::Command;

use tracing::{trace, warn};

use crate::error::Result;
use crate::proc::FileEvents;
use crate::program::Program;

/// Collects the files a traced command read, wrote, and removed, filtered
/// to a scope directory.
///
/// Policy, applied per path: a read is an input unless the path was already
/// written (a produced file re-read later is still a product, not a
/// dependency); a write cancels any earlier read; a removal cancels the
/// path from both sets (a deleted input is no dependency, a deleted temp
/// file is no product) and is remembered separately.
#[derive(Debug)]
pub struct DepTracker {
    root: PathBuf,
    inputs: BTreeSet<PathBuf>,
    outputs: BTreeSet<PathBuf>,
    removed: BTreeSet<PathBuf>,
}

impl DepTracker {
    /// Track accesses under `root`; anything outside (system headers,
    /// toolchain binaries, caches) is ignored.
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self {
            root: root.into(),
            inputs: BTreeSet::new(),
            outputs: BTreeSet::new(),
            removed: BTreeSet::new(),
        }
    }

    /// Finish collecting and report paths relative to the scope root, in
    /// sorted order.
    pub fn finish(self) -> DepReport {
        fn rel(root: &Path, set: BTreeSet<PathBuf>) -> Vec<String> {
            set.iter()
                .map(|p| {
                    p.strip_prefix(root)
                        .unwrap_or(p)
                        .to_string_lossy()
                        .into_owned()
                })
                .collect()
        }

        DepReport {
            inputs: rel(&self.root, self.inputs),
            outputs: rel(&self.root, self.outputs),
            removed: rel(&self.root, self.removed),
        }
    }

    // Component-wise prefix check, so `/work` never captures `/workspace`.
    fn in_scope(&self, path: &Path) -> bool {
        path.starts_with(&self.root)
    }
}

impl FileEvents for DepTracker {
    fn on_read(&mut self, path: &Path) {
        trace!(path = %path.display(), "rd");
        if !self.in_scope(path) {
            return;
        }
        if !self.outputs.contains(path) {
            self.inputs.insert(path.to_path_buf());
        }
    }

    fn on_write(&mut self, path: &Path) {
        trace!(path = %path.display(), "wr");
        if !self.in_scope(path) {
            return;
        }
        self.inputs.remove(path);
        self.outputs.insert(path.to_path_buf());
    }

    fn on_remove(&mut self, path: &Path) {
        trace!(path = %path.display(), "rm");
        if !self.in_scope(path) {
            return;
        }
        self.inputs.remove(path);
        self.outputs.remove(path);
        self.removed.insert(path.to_path_buf());
    }
}

/// What one excavated command consumed and produced, relative to the scope
/// root.
#[derive(Clone, Debug, Default, Eq, PartialEq)]
pub struct DepReport {
    pub inputs: Vec<String>,
    pub outputs: Vec<String>,
    pub removed: Vec<String>,
}

/// Run `target` with `args` in `root`, trace it and every descendant to
/// completion, and report the files under `root` it consumed and produced.
pub fn excavate(target: &str, args: &[&str], root: impl Into<PathBuf>) -> Result<DepReport> {
    let root = root.into();

    let mut cmd = Command::new(target);
    cmd.args(args).current_dir(&root);

    let (mut program, _root_pid) = Program::spawn(cmd, DepTracker::new(root))?;

    while let Some(status) = program.wait()? {
        if status.exited() {
            continue;
        }
        if let Err(err) = program.resume(status) {
            warn!(pid = status.pid().as_raw(), %err, "failed to resume tracee");
        }
    }

    Ok(program.into_sink().finish())
}

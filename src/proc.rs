//! Per-task syscall interpretation.
//!
//! A [`Proc`] turns the raw syscall-stops of one traced task into semantic
//! filesystem events. Syscall-enter-stops and syscall-exit-stops are
//! indistinguishable to the tracer, so each task tracks which side it
//! expects next; the two strictly alternate for as long as the task lives.
//! Work that needs the syscall's return value (installing the fd of a
//! successful `open`) is captured at entry and deferred to the matching
//! exit via the task's [`ExitStack`].

use std::cell::RefCell;
use std::collections::HashMap;
use std::fs;
use std::path::{Component, Path, PathBuf};
use std::rc::Rc;

use nix::unistd::Pid;
use tracing::debug;

use crate::error::{Error, Result};
use crate::stack::{ExitAction, ExitStack};
use crate::tracer::Tracer;

/// Sinks for the filesystem accesses excavated from a trace.
///
/// Paths handed to the callbacks are always absolute and lexically clean.
/// Callbacks run synchronously inside the supervisor's wait loop and must
/// not block.
pub trait FileEvents {
    /// A path was opened for reading.
    fn on_read(&mut self, path: &Path);

    /// A path was opened for writing, or is the destination of a rename.
    fn on_write(&mut self, path: &Path);

    /// A path was unlinked, or is the source of a rename.
    fn on_remove(&mut self, path: &Path);
}

/// Which side of a syscall the next syscall-stop belongs to.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
enum Phase {
    SyscallEnter,
    SyscallExit,
}

type FdTable = HashMap<i32, PathBuf>;

/// State machine for one traced task.
pub struct Proc {
    tracer: Tracer,
    phase: Phase,
    stack: ExitStack,
    // Shared with fork-family siblings when the tracee asked the kernel for
    // a shared file table, deep-copied otherwise.
    fds: Rc<RefCell<FdTable>>,
    exited: bool,
}

impl Proc {
    /// State for a task that is already being traced: the spawned root, or
    /// a task first seen through the wait primitive.
    pub(crate) fn traced(pid: Pid) -> Self {
        let fds = HashMap::from([
            (0, PathBuf::from("/dev/stdin")),
            (1, PathBuf::from("/dev/stdout")),
            (2, PathBuf::from("/dev/stderr")),
        ]);

        Self {
            tracer: Tracer::new(pid),
            phase: Phase::SyscallEnter,
            stack: ExitStack::new(),
            fds: Rc::new(RefCell::new(fds)),
            exited: false,
        }
    }

    /// State for a task created by a fork-family event. The child sees the
    /// parent's open files as of the event: a snapshot by value, or the
    /// very same table when `share_files` reflects a shared-file-table
    /// clone.
    pub(crate) fn forked(parent: &Proc, share_files: bool, pid: Pid) -> Self {
        let fds = if share_files {
            Rc::clone(&parent.fds)
        } else {
            Rc::new(RefCell::new(parent.fds.borrow().clone()))
        };

        Self {
            tracer: Tracer::new(pid),
            phase: Phase::SyscallEnter,
            stack: ExitStack::new(),
            fds,
            exited: false,
        }
    }

    pub fn pid(&self) -> Pid {
        self.tracer.pid()
    }

    pub fn exited(&self) -> bool {
        self.exited
    }

    pub(crate) fn set_exited(&mut self) {
        self.exited = true;
    }

    pub(crate) fn tracer(&self) -> &Tracer {
        &self.tracer
    }

    /// The task has just survived an exec: any deferred work captured
    /// against the previous image is stale.
    pub(crate) fn post_exec(&mut self) {
        self.stack.reset();
    }

    /// Handle one syscall-stop. An error aborts only the current syscall's
    /// interpretation; the phase has already advanced, so the task stays
    /// consistent and traceable.
    pub(crate) fn handle_interrupt<S: FileEvents>(&mut self, sink: &mut S) -> Result<()> {
        match self.phase {
            Phase::SyscallEnter => {
                self.phase = Phase::SyscallExit;
                if let Some(action) = self.syscall_enter(sink)? {
                    self.stack.push(action);
                }
            }
            Phase::SyscallExit => {
                self.phase = Phase::SyscallEnter;
                if let Some(action) = self.stack.pop() {
                    self.syscall_exit(action, sink)?;
                }
            }
        }
        Ok(())
    }

    // Decode the syscall being entered. `close` and the rename/unlink
    // family have their full effect here; `open`/`openat` return a deferred
    // action so classification can see the return value.
    //
    // Reads and writes are deliberately not classified from `read(2)` and
    // `write(2)` traffic: pipes, socketpairs, and mmap-backed I/O make that
    // signal unusable. The access mode declared at open time is cheaper and
    // truer to intent.
    fn syscall_enter<S: FileEvents>(&mut self, sink: &mut S) -> Result<Option<ExitAction>> {
        let regs = self.tracer.registers()?;

        match regs.orig_rax as i64 {
            libc::SYS_close => {
                let fd = regs.rdi as i32;
                self.fds.borrow_mut().remove(&fd);
                Ok(None)
            }
            nr @ (libc::SYS_open | libc::SYS_openat) => {
                let (addr, flags, dirfd) = if nr == libc::SYS_open {
                    (regs.rdi, regs.rsi, libc::AT_FDCWD)
                } else {
                    (regs.rsi, regs.rdx, regs.rdi as i32)
                };

                let path = self.tracer.read_c_string(addr)?;
                let Some(dir) = self.base_dir(dirfd)? else {
                    debug!(
                        pid = self.pid().as_raw(),
                        dirfd,
                        "open against untracked dirfd, dropping"
                    );
                    return Ok(None);
                };

                let path = absolutize(Path::new(&path), &dir);
                Ok(Some(ExitAction::Open { path, flags }))
            }
            libc::SYS_rename => {
                let wd = self.cwd()?;
                let old = self.tracer.read_c_string(regs.rdi)?;
                let new = self.tracer.read_c_string(regs.rsi)?;

                sink.on_remove(&absolutize(Path::new(&old), &wd));
                sink.on_write(&absolutize(Path::new(&new), &wd));
                Ok(None)
            }
            // `renameat2`'s flags word is ignored; an exchange still
            // reports the old name removed and the new name written.
            libc::SYS_renameat | libc::SYS_renameat2 => {
                let Some(old_dir) = self.base_dir(regs.rdi as i32)? else {
                    return Ok(None);
                };
                let Some(new_dir) = self.base_dir(regs.rdx as i32)? else {
                    return Ok(None);
                };
                let old = self.tracer.read_c_string(regs.rsi)?;
                let new = self.tracer.read_c_string(regs.r10)?;

                sink.on_remove(&absolutize(Path::new(&old), &old_dir));
                sink.on_write(&absolutize(Path::new(&new), &new_dir));
                Ok(None)
            }
            nr @ (libc::SYS_unlink | libc::SYS_unlinkat) => {
                let (addr, dirfd) = if nr == libc::SYS_unlink {
                    (regs.rdi, libc::AT_FDCWD)
                } else {
                    (regs.rsi, regs.rdi as i32)
                };

                let Some(dir) = self.base_dir(dirfd)? else {
                    return Ok(None);
                };
                let path = self.tracer.read_c_string(addr)?;

                sink.on_remove(&absolutize(Path::new(&path), &dir));
                Ok(None)
            }
            _ => Ok(None),
        }
    }

    // Finish a deferred open: a negative return drops it; otherwise the new
    // fd maps to the path and the declared access mode classifies the
    // event.
    fn syscall_exit<S: FileEvents>(&mut self, action: ExitAction, sink: &mut S) -> Result<()> {
        let ExitAction::Open { path, flags } = action;

        let regs = self.tracer.registers()?;
        let ret = regs.rax as i64;
        if ret < 0 {
            return Ok(());
        }

        self.fds.borrow_mut().insert(ret as i32, path.clone());

        match (flags as i32) & libc::O_ACCMODE {
            libc::O_WRONLY | libc::O_RDWR => sink.on_write(&path),
            libc::O_RDONLY => sink.on_read(&path),
            _ => {}
        }

        Ok(())
    }

    // The directory a path-plus-dirfd argument pair resolves against:
    // the live working directory for `AT_FDCWD`, the tracked path of the fd
    // otherwise. An fd the table has never seen yields `None` rather than a
    // fabricated base (the table can drift from reality across `dup2` and
    // friends, which are not tracked).
    fn base_dir(&self, dirfd: i32) -> Result<Option<PathBuf>> {
        if dirfd == libc::AT_FDCWD {
            return Ok(Some(self.cwd()?));
        }
        Ok(self.fds.borrow().get(&dirfd).cloned())
    }

    // Re-read on every use: `chdir`/`fchdir` may move it between syscalls.
    fn cwd(&self) -> Result<PathBuf> {
        let link = format!("/proc/{}/cwd", self.pid().as_raw());
        fs::read_link(link).map_err(|source| Error::Cwd {
            pid: self.pid(),
            source,
        })
    }
}

/// Make `path` absolute relative to `base` and lexically clean it.
fn absolutize(path: &Path, base: &Path) -> PathBuf {
    if path.is_absolute() {
        clean(path)
    } else {
        clean(&base.join(path))
    }
}

/// Lexically clean a path: collapse `.` and `..` components and redundant
/// separators, without touching the filesystem. `..` at the root stays at
/// the root; a path that cleans away entirely becomes `.`.
fn clean(path: &Path) -> PathBuf {
    let mut out = PathBuf::new();

    for comp in path.components() {
        match comp {
            Component::RootDir => out.push("/"),
            Component::CurDir => {}
            Component::ParentDir => {
                if out.as_os_str() == "/" {
                    // ".." at the root stays at the root
                } else if out.as_os_str().is_empty() || out.ends_with("..") {
                    out.push("..");
                } else {
                    out.pop();
                }
            }
            Component::Normal(name) => out.push(name),
            Component::Prefix(_) => {}
        }
    }

    if out.as_os_str().is_empty() {
        out.push(".");
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn clean_collapses_lexically() {
        let cases = [
            ("/a/./b//c", "/a/b/c"),
            ("/a/b/../c", "/a/c"),
            ("/a/b/", "/a/b"),
            ("/..", "/"),
            ("/../..", "/"),
            ("a/../../b", "../b"),
            ("./", "."),
            ("", "."),
        ];

        for (given, want) in cases {
            assert_eq!(clean(Path::new(given)), Path::new(want), "clean({given:?})");
        }
    }

    #[test]
    fn absolutize_joins_relative_only() {
        let base = Path::new("/work");

        assert_eq!(absolutize(Path::new("x/y"), base), Path::new("/work/x/y"));
        assert_eq!(absolutize(Path::new("./x"), base), Path::new("/work/x"));
        assert_eq!(absolutize(Path::new("../x"), base), Path::new("/x"));
        assert_eq!(absolutize(Path::new("/abs/./p"), base), Path::new("/abs/p"));
    }

    #[test]
    fn new_task_tracks_standard_streams() {
        let proc = Proc::traced(Pid::from_raw(1));
        let fds = proc.fds.borrow();

        assert_eq!(fds.get(&0), Some(&PathBuf::from("/dev/stdin")));
        assert_eq!(fds.get(&1), Some(&PathBuf::from("/dev/stdout")));
        assert_eq!(fds.get(&2), Some(&PathBuf::from("/dev/stderr")));
        assert_eq!(fds.len(), 3);
    }

    #[test]
    fn forked_copy_is_independent() {
        let parent = Proc::traced(Pid::from_raw(1));
        parent.fds.borrow_mut().insert(7, PathBuf::from("/tmp/log"));

        let child = Proc::forked(&parent, false, Pid::from_raw(2));
        assert_eq!(child.fds.borrow().get(&7), Some(&PathBuf::from("/tmp/log")));

        child.fds.borrow_mut().remove(&7);
        assert!(parent.fds.borrow().contains_key(&7));
    }

    #[test]
    fn forked_shared_table_aliases_parent() {
        let parent = Proc::traced(Pid::from_raw(1));
        let child = Proc::forked(&parent, true, Pid::from_raw(2));

        child.fds.borrow_mut().insert(7, PathBuf::from("/tmp/log"));
        assert_eq!(
            parent.fds.borrow().get(&7),
            Some(&PathBuf::from("/tmp/log"))
        );
    }
}

//! The supervisor that owns the tracee forest.
//!
//! A [`Program`] spawns the root command with tracing enabled and then
//! drives a single wait loop over every task the kernel reports: the root,
//! everything it forks or clones, and (defensively) any task the wait
//! primitive names before its creation event arrives. Each wait status is
//! classified once and either handled internally (syscall-stops, fork
//! events, exits) or reflected back to the caller as a [`Status`] that the
//! next [`resume`](Program::resume) must honor, so tracees observe signals
//! and group-stops transparently.

use std::collections::HashMap;
use std::io;
use std::marker::PhantomData;
use std::os::unix::process::CommandExt;
use std::process::Command;

use nix::sys::ptrace::{self, Options};
use nix::sys::signal::Signal;
use nix::sys::wait::{waitpid, WaitPidFlag, WaitStatus};
use nix::unistd::Pid;
use tracing::{debug, info, warn};

use crate::error::{Error, Result};
use crate::proc::{FileEvents, Proc};

/// Options applied to the root task. Auto-attached fork-family children
/// inherit them.
///
/// Exit-kill ties the whole tracee forest to the supervisor's lifetime;
/// sysgood marks syscall-stops apart from genuine `SIGTRAP`s; the rest
/// subscribe to the fork/clone/exec/exit events the registry is built from.
pub const TRACE_OPTIONS: Options = Options::PTRACE_O_EXITKILL
    .union(Options::PTRACE_O_TRACECLONE)
    .union(Options::PTRACE_O_TRACEFORK)
    .union(Options::PTRACE_O_TRACEVFORK)
    .union(Options::PTRACE_O_TRACESYSGOOD)
    .union(Options::PTRACE_O_TRACEEXEC)
    .union(Options::PTRACE_O_TRACEEXIT);

/// Outcome of one wait, to be passed back to [`Program::resume`].
///
/// Carries the signal observed while waiting (re-injected on resume, so
/// signal delivery stays transparent to the tracee) and whether the stop
/// was a group-stop, which needs a different resume flavor.
#[derive(Clone, Copy, Debug)]
pub struct Status {
    pid: Pid,
    sig: Option<Signal>,
    group_stop: bool,
    exited: bool,
}

impl Status {
    fn new(pid: Pid) -> Self {
        Self {
            pid,
            sig: None,
            group_stop: false,
            exited: false,
        }
    }

    pub fn pid(&self) -> Pid {
        self.pid
    }

    /// The task terminated during this wait; there is nothing to resume.
    pub fn exited(&self) -> bool {
        self.exited
    }
}

/// Multi-task trace supervisor.
pub struct Program<S> {
    procs: HashMap<i32, Proc>,
    sink: S,

    // Every ptrace request must come from the OS thread that attached to
    // the tracee; keeping the supervisor `!Send` pins the whole session.
    _not_send: PhantomData<*const ()>,
}

impl<S: FileEvents> Program<S> {
    /// Spawn `cmd` with tracing enabled and return the supervisor plus the
    /// root task id. The child requests `PTRACE_TRACEME` pre-exec, so its
    /// first stop (the exec trap) is observed without a race; the root is
    /// configured with [`TRACE_OPTIONS`] and resumed toward its first
    /// syscall-stop before this returns.
    pub fn spawn(mut cmd: Command, sink: S) -> Result<(Self, Pid)> {
        unsafe {
            cmd.pre_exec(|| {
                ptrace::traceme().map_err(|err| io::Error::from_raw_os_error(err as i32))
            });
        }

        let child = cmd.spawn().map_err(|source| Error::Spawn { source })?;
        let pid = Pid::from_raw(child.id() as i32);

        let status = waitpid(pid, None).map_err(|source| Error::Wait { source })?;
        debug!(pid = pid.as_raw(), ?status, "root tracee stopped at exec");

        let root = Proc::traced(pid);
        root.tracer().set_options(TRACE_OPTIONS)?;
        root.tracer().syscall(None)?;

        let procs = HashMap::from([(pid.as_raw(), root)]);

        Ok((
            Self {
                procs,
                sink,
                _not_send: PhantomData,
            },
            pid,
        ))
    }

    /// Block until some tracee changes state and classify the result.
    ///
    /// Returns `None` once the last task has terminated and the registry is
    /// empty: the trace is complete. Errors local to a single syscall's
    /// decode (unreadable argument memory, a vanished cwd) are logged and
    /// swallowed here; they never tear down the task.
    pub fn wait(&mut self) -> Result<Option<Status>> {
        let status = waitpid(None, Some(WaitPidFlag::__WALL))
            .map_err(|source| Error::Wait { source })?;

        let Some(pid) = status.pid() else {
            warn!(?status, "wait status without a task id");
            return self.wait();
        };
        let raw = pid.as_raw();
        let mut out = Status::new(pid);

        // A task can be reported before the fork event that creates it.
        if !self.procs.contains_key(&raw) {
            info!(pid = raw, "new process observed (tracing enabled)");
            self.procs.insert(raw, Proc::traced(pid));
            return Ok(Some(out));
        }

        match status {
            WaitStatus::Exited(..) | WaitStatus::Signaled(..) => {
                info!(pid = raw, "exited");
                if let Some(mut proc) = self.procs.remove(&raw) {
                    proc.set_exited();
                }
                out.exited = true;

                if self.procs.is_empty() {
                    info!("trace finished");
                    return Ok(None);
                }
            }
            WaitStatus::PtraceSyscall(_) => {
                if let Some(proc) = self.procs.get_mut(&raw) {
                    if let Err(err) = proc.handle_interrupt(&mut self.sink) {
                        debug!(pid = raw, %err, "dropping syscall interpretation");
                    }
                }
            }
            WaitStatus::PtraceEvent(_, _, event) => match event {
                libc::PTRACE_EVENT_FORK | libc::PTRACE_EVENT_VFORK | libc::PTRACE_EVENT_CLONE => {
                    self.handle_new_child(pid, event)?;
                }
                libc::PTRACE_EVENT_EXEC => {
                    info!(pid = raw, "called execve()");
                    if let Some(proc) = self.procs.get_mut(&raw) {
                        proc.post_exec();
                    }
                }
                libc::PTRACE_EVENT_EXIT => {
                    // The terminal status arrives on a later wait; nothing
                    // to update yet.
                    info!(pid = raw, "called exit()");
                }
                libc::PTRACE_EVENT_STOP => {
                    debug!(pid = raw, "received group stop");
                    out.group_stop = true;
                }
                _ => {
                    debug!(pid = raw, event, "trapped, continuing");
                }
            },
            WaitStatus::Stopped(_, Signal::SIGTRAP) => {
                debug!(pid = raw, "trapped, continuing");
            }
            WaitStatus::Stopped(_, sig) => {
                debug!(pid = raw, ?sig, "received signal");
                out.sig = Some(sig);
            }
            _ => {
                warn!(pid = raw, ?status, "not stopped?");
            }
        }

        Ok(Some(out))
    }

    /// Resume a task reported by [`wait`](Program::wait), re-injecting any
    /// signal recorded in `status`. Group-stops are left pending rather
    /// than suppressed. Resuming a task that has since been reaped is not
    /// an error.
    pub fn resume(&self, status: Status) -> Result<()> {
        let Some(proc) = self.procs.get(&status.pid.as_raw()) else {
            return Ok(());
        };

        if status.group_stop {
            proc.tracer().listen()
        } else {
            proc.tracer().syscall(status.sig)
        }
    }

    /// Consume the supervisor and hand back the event sink.
    pub fn into_sink(self) -> S {
        self.sink
    }

    // Register the new task announced by a fork-family event, snapshotting
    // or sharing the parent's fd table as the event dictates.
    fn handle_new_child(&mut self, pid: Pid, event: libc::c_int) -> Result<()> {
        let Some(parent) = self.procs.get(&pid.as_raw()) else {
            return Ok(());
        };

        let child_pid = Pid::from_raw(parent.tracer().event_msg()? as u32 as i32);
        let share_files = event == libc::PTRACE_EVENT_CLONE && clone_shares_files(parent);
        let flavor = match event {
            libc::PTRACE_EVENT_FORK => "fork",
            libc::PTRACE_EVENT_VFORK => "vfork",
            _ => "clone",
        };
        info!(
            pid = pid.as_raw(),
            child = child_pid.as_raw(),
            share_files,
            "called {flavor}() (tracing enabled)"
        );

        let child = Proc::forked(parent, share_files, child_pid);
        self.procs.insert(child_pid.as_raw(), child);

        Ok(())
    }
}

// At a clone event the parent is stopped inside `clone(2)`, so its first
// argument register still holds the flags word and `CLONE_FILES` can be
// propagated faithfully. `clone3(2)` passes its flags in memory instead;
// those (and unreadable registers) fall back to a by-value copy.
fn clone_shares_files(parent: &Proc) -> bool {
    match parent.tracer().registers() {
        Ok(regs) if regs.orig_rax as i64 == libc::SYS_clone => {
            (regs.rdi & libc::CLONE_FILES as u64) != 0
        }
        Ok(_) => false,
        Err(_) => false,
    }
}

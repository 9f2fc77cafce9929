//! Thin per-task wrapper around the `ptrace(2)` requests the supervisor
//! needs.
//!
//! A [`Tracer`] holds no state beyond the task id: every method issues a
//! single request against a tracee that is currently in a ptrace-stop, and
//! surfaces kernel refusals verbatim (wrapped with the pid for context).
//! All requests against a given tracee must come from the OS thread that
//! attached to it.

use std::ffi::OsString;
use std::fs;
use std::io;
use std::os::unix::ffi::OsStringExt;
use std::os::unix::fs::FileExt;

use nix::errno::Errno;
use nix::sys::ptrace::{self, Options};
use nix::sys::signal::Signal;
use nix::unistd::Pid;

use crate::error::{Error, Result};

/// Register state of a tracee, in the x86-64 layout: syscall number in
/// `orig_rax`, arguments in `rdi`, `rsi`, `rdx`, `r10`, return value in
/// `rax`.
pub type Registers = libc::user_regs_struct;

// Upper bound on tracee string reads. Anything longer than a path cannot be
// an argument we care about.
const STRING_MAX: usize = 4096;

/// One-task bridge to the kernel tracing primitive.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub struct Tracer {
    pid: Pid,
}

impl Tracer {
    pub fn new(pid: Pid) -> Self {
        Self { pid }
    }

    pub fn pid(&self) -> Pid {
        self.pid
    }

    /// Apply the tracing option bitmask. Called once per task, at its first
    /// stop; auto-attached children inherit the options of their parent.
    pub fn set_options(&self, options: Options) -> Result<()> {
        ptrace::setoptions(self.pid, options).map_err(|source| Error::Trace {
            pid: self.pid,
            source,
        })
    }

    /// Resume the stopped tracee until the next syscall boundary (entry or
    /// exit), delivering `sig` if one is pending.
    pub fn syscall(&self, sig: Option<Signal>) -> Result<()> {
        ptrace::syscall(self.pid, sig).map_err(|source| Error::Resume {
            pid: self.pid,
            source,
        })
    }

    /// Resume a tracee out of a group-stop without letting it run: the next
    /// stop will be observable, but no signal is delivered and no syscall
    /// boundary is crossed. nix has no wrapper for `PTRACE_LISTEN`, so this
    /// is a raw request.
    pub fn listen(&self) -> Result<()> {
        let res = unsafe { libc::ptrace(libc::PTRACE_LISTEN, self.pid.as_raw(), 0, 0) };

        Errno::result(res).map(drop).map_err(|source| Error::Resume {
            pid: self.pid,
            source,
        })
    }

    /// Read the general-purpose register file of the stopped tracee.
    pub fn registers(&self) -> Result<Registers> {
        ptrace::getregs(self.pid).map_err(|source| Error::Trace {
            pid: self.pid,
            source,
        })
    }

    /// Write the general-purpose register file of the stopped tracee.
    pub fn set_registers(&self, regs: Registers) -> Result<()> {
        ptrace::setregs(self.pid, regs).map_err(|source| Error::Trace {
            pid: self.pid,
            source,
        })
    }

    /// Retrieve the event message of the current ptrace-event-stop. For the
    /// fork-family events this is the pid of the new task.
    pub fn event_msg(&self) -> Result<libc::c_long> {
        ptrace::getevent(self.pid).map_err(|source| Error::Trace {
            pid: self.pid,
            source,
        })
    }

    /// Read a NUL-terminated string out of the tracee address space via
    /// `/proc/<pid>/mem`. Unmapped or unreadable memory surfaces as a
    /// [`Error::MemoryRead`].
    pub fn read_c_string(&self, addr: u64) -> Result<OsString> {
        let mem = fs::File::open(self.proc_mem_path())
            .map_err(|source| self.memory_read_err(addr, source))?;

        let mut out = Vec::new();
        let mut buf = [0u8; 256];

        loop {
            let offset = addr + out.len() as u64;
            let n = mem
                .read_at(&mut buf, offset)
                .map_err(|source| self.memory_read_err(addr, source))?;
            if n == 0 {
                let source = io::Error::from(io::ErrorKind::UnexpectedEof);
                return Err(self.memory_read_err(addr, source));
            }

            match buf[..n].iter().position(|&b| b == 0) {
                Some(nul) => {
                    out.extend_from_slice(&buf[..nul]);
                    return Ok(OsString::from_vec(out));
                }
                None => out.extend_from_slice(&buf[..n]),
            }

            if out.len() > STRING_MAX {
                let source = io::Error::from(io::ErrorKind::InvalidData);
                return Err(self.memory_read_err(addr, source));
            }
        }
    }

    fn proc_mem_path(&self) -> String {
        format!("/proc/{}/mem", self.pid.as_raw())
    }

    fn memory_read_err(&self, addr: u64, source: io::Error) -> Error {
        Error::MemoryRead {
            pid: self.pid,
            addr,
            source,
        }
    }
}

use std::io;

use nix::unistd::Pid;

pub type Result<T> = std::result::Result<T, Error>;

#[derive(thiserror::Error, Debug)]
pub enum Error {
    #[error("Could not spawn trace target")]
    Spawn { source: io::Error },

    #[error("Error waiting on tracees")]
    Wait { source: nix::Error },

    #[error("Could not resume tracee = {pid}")]
    Resume { pid: Pid, source: nix::Error },

    #[error("Ptrace request failed for tracee = {pid}")]
    Trace { pid: Pid, source: nix::Error },

    #[error("Could not read memory of tracee = {pid} at {addr:#x}")]
    MemoryRead {
        pid: Pid,
        addr: u64,
        source: io::Error,
    },

    #[error("Could not resolve working directory of tracee = {pid}")]
    Cwd { pid: Pid, source: io::Error },
}

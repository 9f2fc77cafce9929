//! Excavate implicit build dependencies from ad-hoc shell recipes.
//!
//! A shell recipe like `cc -c foo.c -o foo.o` knows exactly which files it
//! consumes and produces, but a build system migrating away from such
//! recipes does not. This crate runs a command under `ptrace(2)`, follows
//! every fork, vfork, and clone through the resulting process forest, and
//! interprets the filesystem syscalls it observes: opens classified by
//! their declared access mode, renames, and unlinks. The interpreted stream
//! is delivered to a [`FileEvents`] sink; the bundled [`DepTracker`] sink
//! reduces it to input/output sets suitable for lifting into declarative
//! build rules ([`Excavation`] renders JSON, Knit, or Make fragments).
//!
//! The supervisor is strictly single-threaded: the kernel requires every
//! ptrace request for a tracee to come from the OS thread that attached to
//! it, so [`Program`] is `!Send` and the whole trace runs inside one wait
//! loop.

pub mod error;
pub mod excavate;
pub mod proc;
pub mod program;
pub mod rules;
pub mod stack;
pub mod tracer;

#[doc(inline)]
pub use error::{Error, Result};

#[doc(inline)]
pub use excavate::{excavate, DepReport, DepTracker};

#[doc(inline)]
pub use proc::FileEvents;

#[doc(inline)]
pub use program::{Program, Status, TRACE_OPTIONS};

#[doc(inline)]
pub use rules::{Excavation, Rule};

#[doc(inline)]
pub use tracer::{Registers, Tracer};

#[cfg(not(all(target_os = "linux", target_arch = "x86_64")))]
compile_error!("unearth decodes the x86-64 Linux syscall ABI");

//! # Vermilion
//!
//! Vermilion is a Linux binary-compatibility shim. It lets programs built for
//! the Linux system-call interface (the guest ABI) run unmodified inside an
//! ordinary process on a different POSIX-like host.
//!
//! ## Core Features
//!
//! - Readiness multiplexing: guest `poll`/`select` over guest-numbered
//!   descriptors, translated into one host `select`
//! - Process-image replacement: `execve` of guest ELF images (with their
//!   runtime interpreter) or of host-native programs
//! - Descriptor-namespace reconciliation before handing off to a host image
//! - A per-process context with a recursive lock that is re-created at every
//!   exec boundary
//!
//! ## Layout
//!
//! - [`abi`]: the guest syscall surface (`abi::linux`) and the host-native
//!   exec path (`abi::host`)
//! - [`executor`]: binary probing and exec dispatch
//! - [`task`]: the process context and the default ELF loader
//! - [`host`]: the seam to host primitives and the collaborator traits
//! - [`sync`]: the recursive process lock
//!
//! ## Startup
//!
//! An embedding loader calls [`init`] once, builds a [`abi::linux::LinuxAbi`]
//! from its collaborators and routes every trapped guest syscall through
//! [`abi::AbiModule::handle_syscall`].

pub mod abi;
pub mod console;
pub mod environment;
pub mod executor;
pub mod host;
pub mod sync;
pub mod task;

#[cfg(test)]
mod mock;

use environment::Config;

/// Read the runtime configuration and bring up the console logger.
pub fn init() -> Config {
    let config = Config::from_env();
    console::init(&config);
    log::debug!("vermilion: log level {}", config.log_level);
    config
}

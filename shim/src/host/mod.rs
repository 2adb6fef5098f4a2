//! Host seam
//!
//! Everything the shim asks of the host operating system goes through this
//! module: the raw primitives in [`HostOps`] (implemented over `libc` by
//! [`PosixHost`]) and the collaborator contracts the core consumes but does
//! not own:
//!
//! - [`DescriptorTranslator`]: guest descriptor number -> real host descriptor
//! - [`Vfs`]: path lookup and the current-directory node
//! - [`AddressSpace`]: guest mappings and the program break
//!
//! Each collaborator has a default implementation ([`FdTable`], [`HostVfs`],
//! [`MappingTracker`]) so the crate works end to end on its own.

pub mod fd_table;
pub mod fdset;
pub mod memory;
pub mod posix;
pub mod vfs;

use std::ffi::CStr;
use std::os::fd::RawFd;

use crate::abi::linux::errno::Errno;

pub use fd_table::{DescriptorTranslator, FdTable};
pub use fdset::HostFdSet;
pub use memory::{AddressSpace, MapRequest, MappingTracker};
pub use posix::PosixHost;
pub use vfs::{CwdNode, HostVfs, Vfs};

/// Host primitives used by the multiplexer and the native exec path.
pub trait HostOps {
    /// Native multi-descriptor wait. `None` blocks forever.
    fn select(
        &mut self,
        nfds: i32,
        read: &mut HostFdSet,
        write: &mut HostFdSet,
        error: &mut HostFdSet,
        timeout: Option<&mut libc::timeval>,
    ) -> Result<usize, Errno>;

    /// Duplicate `fd` onto the lowest free descriptor not below `floor`.
    fn dup_above(&mut self, fd: RawFd, floor: RawFd) -> Result<RawFd, Errno>;

    /// Duplicate `fd` onto exactly `target`, closing whatever was there.
    fn dup2(&mut self, fd: RawFd, target: RawFd) -> Result<(), Errno>;

    fn close(&mut self, fd: RawFd) -> Result<(), Errno>;

    fn fchdir(&mut self, fd: RawFd) -> Result<(), Errno>;

    fn chdir(&mut self, path: &CStr) -> Result<(), Errno>;

    /// Replace the process image. Only returns on failure.
    fn execve(&mut self, path: &CStr, argv: &[&CStr], envp: &[&CStr]) -> Errno;
}

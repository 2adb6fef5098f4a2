//! Virtual filesystem contract used by the exec paths.

use std::ffi::CStr;
use std::os::fd::{AsRawFd, FromRawFd, OwnedFd, RawFd};

use crate::abi::linux::errno::Errno;

/// What the guest's current directory is backed by.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CwdNode {
    /// A real host directory, open on this descriptor
    Host(RawFd),
    /// A synthesized directory with no host counterpart
    Virtual,
}

pub trait Vfs {
    /// Open `path` read-only.
    fn open_file(&self, path: &CStr) -> Result<OwnedFd, Errno>;

    fn cwd_node(&self) -> CwdNode;
}

fn open_raw(path: &CStr, flags: libc::c_int) -> Result<OwnedFd, Errno> {
    // SAFETY: path is NUL-terminated; a non-negative result is a fresh
    // descriptor nobody else owns.
    let fd = unsafe { libc::open(path.as_ptr(), flags | libc::O_CLOEXEC) };
    if fd == -1 {
        return Err(Errno::last_host());
    }
    Ok(unsafe { OwnedFd::from_raw_fd(fd) })
}

/// Default VFS: guest paths are host paths.
#[derive(Debug, Default)]
pub struct HostVfs {
    cwd: Option<OwnedFd>,
}

impl HostVfs {
    /// A VFS whose current directory is virtual.
    pub fn new() -> Self {
        Self::default()
    }

    /// A VFS whose current directory is the host directory at `path`.
    pub fn with_host_cwd(path: &CStr) -> Result<Self, Errno> {
        let mut vfs = Self::new();
        vfs.change_dir(path)?;
        Ok(vfs)
    }

    pub fn change_dir(&mut self, path: &CStr) -> Result<(), Errno> {
        self.cwd = Some(open_raw(path, libc::O_RDONLY | libc::O_DIRECTORY)?);
        Ok(())
    }

    pub fn set_virtual_cwd(&mut self) {
        self.cwd = None;
    }
}

impl Vfs for HostVfs {
    fn open_file(&self, path: &CStr) -> Result<OwnedFd, Errno> {
        open_raw(path, libc::O_RDONLY)
    }

    fn cwd_node(&self) -> CwdNode {
        match &self.cwd {
            Some(fd) => CwdNode::Host(fd.as_raw_fd()),
            None => CwdNode::Virtual,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_open_missing() {
        let vfs = HostVfs::new();
        assert_eq!(vfs.open_file(c"/nonexistent/vermilion").err(), Some(Errno::ENOENT));
    }

    #[test]
    fn test_cwd_node() {
        let mut vfs = HostVfs::with_host_cwd(c"/").unwrap();
        assert!(matches!(vfs.cwd_node(), CwdNode::Host(fd) if fd >= 0));
        vfs.set_virtual_cwd();
        assert_eq!(vfs.cwd_node(), CwdNode::Virtual);
    }

    #[test]
    fn test_change_dir_to_file_fails() {
        let file = tempfile::NamedTempFile::new().unwrap();
        let path = std::ffi::CString::new(file.path().to_str().unwrap()).unwrap();
        let mut vfs = HostVfs::new();
        assert_eq!(vfs.change_dir(&path), Err(Errno::ENOTDIR));
    }
}

use core::mem::MaybeUninit;
use std::os::fd::RawFd;

use crate::abi::linux::errno::Errno;
use crate::environment::FD_SETSIZE;

/// A host `fd_set`, always initialized and bounds-checked.
pub struct HostFdSet {
    raw: libc::fd_set,
}

impl HostFdSet {
    pub fn new() -> Self {
        let mut raw = MaybeUninit::<libc::fd_set>::uninit();
        // SAFETY: FD_ZERO fully initializes the set.
        let raw = unsafe {
            libc::FD_ZERO(raw.as_mut_ptr());
            raw.assume_init()
        };
        Self { raw }
    }

    /// Host descriptors outside `0..FD_SETSIZE` cannot be represented.
    pub fn check(fd: RawFd) -> Result<(), Errno> {
        if fd < 0 || fd as usize >= FD_SETSIZE {
            Err(Errno::EINVAL)
        } else {
            Ok(())
        }
    }

    pub fn insert(&mut self, fd: RawFd) -> Result<(), Errno> {
        Self::check(fd)?;
        // SAFETY: fd is within the set's capacity.
        unsafe { libc::FD_SET(fd, &mut self.raw) };
        Ok(())
    }

    pub fn contains(&self, fd: RawFd) -> bool {
        if Self::check(fd).is_err() {
            return false;
        }
        // SAFETY: fd is within the set's capacity.
        unsafe { libc::FD_ISSET(fd, &self.raw) }
    }

    pub fn remove(&mut self, fd: RawFd) {
        if Self::check(fd).is_ok() {
            // SAFETY: fd is within the set's capacity.
            unsafe { libc::FD_CLR(fd, &mut self.raw) };
        }
    }

    pub fn as_mut_ptr(&mut self) -> *mut libc::fd_set {
        &mut self.raw
    }
}

impl Default for HostFdSet {
    fn default() -> Self {
        Self::new()
    }
}

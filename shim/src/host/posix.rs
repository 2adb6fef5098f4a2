//! `HostOps` over the host's POSIX interface.

use std::ffi::CStr;
use std::os::fd::RawFd;
use std::ptr;

use super::{HostFdSet, HostOps};
use crate::abi::linux::errno::Errno;

fn check(ret: libc::c_int) -> Result<libc::c_int, Errno> {
    if ret == -1 { Err(Errno::last_host()) } else { Ok(ret) }
}

/// Null-terminated pointer vector borrowing from `strings`.
fn pointer_vector(strings: &[&CStr]) -> Vec<*const libc::c_char> {
    strings
        .iter()
        .map(|s| s.as_ptr())
        .chain(std::iter::once(ptr::null()))
        .collect()
}

#[derive(Debug, Default, Clone, Copy)]
pub struct PosixHost;

impl HostOps for PosixHost {
    fn select(
        &mut self,
        nfds: i32,
        read: &mut HostFdSet,
        write: &mut HostFdSet,
        error: &mut HostFdSet,
        timeout: Option<&mut libc::timeval>,
    ) -> Result<usize, Errno> {
        let timeout = timeout.map_or(ptr::null_mut(), |tv| tv as *mut libc::timeval);
        // SAFETY: the sets are initialized fd_sets and timeout is null or a
        // valid timeval for the duration of the call.
        let ready = unsafe {
            libc::select(nfds, read.as_mut_ptr(), write.as_mut_ptr(), error.as_mut_ptr(), timeout)
        };
        check(ready).map(|n| n as usize)
    }

    fn dup_above(&mut self, fd: RawFd, floor: RawFd) -> Result<RawFd, Errno> {
        // SAFETY: F_DUPFD takes an integer argument and touches no memory.
        check(unsafe { libc::fcntl(fd, libc::F_DUPFD, floor) })
    }

    fn dup2(&mut self, fd: RawFd, target: RawFd) -> Result<(), Errno> {
        // SAFETY: plain descriptor operation.
        check(unsafe { libc::dup2(fd, target) }).map(|_| ())
    }

    fn close(&mut self, fd: RawFd) -> Result<(), Errno> {
        // SAFETY: plain descriptor operation.
        check(unsafe { libc::close(fd) }).map(|_| ())
    }

    fn fchdir(&mut self, fd: RawFd) -> Result<(), Errno> {
        // SAFETY: plain descriptor operation.
        check(unsafe { libc::fchdir(fd) }).map(|_| ())
    }

    fn chdir(&mut self, path: &CStr) -> Result<(), Errno> {
        // SAFETY: path is NUL-terminated.
        check(unsafe { libc::chdir(path.as_ptr()) }).map(|_| ())
    }

    fn execve(&mut self, path: &CStr, argv: &[&CStr], envp: &[&CStr]) -> Errno {
        let argv = pointer_vector(argv);
        let envp = pointer_vector(envp);
        // SAFETY: all pointers refer to NUL-terminated strings that outlive
        // the call, and both vectors are null-terminated.
        unsafe { libc::execve(path.as_ptr(), argv.as_ptr(), envp.as_ptr()) };
        Errno::last_host()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_pointer_vector_is_null_terminated() {
        let strings = [c"a", c"bc"];
        let vector = pointer_vector(&strings);
        assert_eq!(vector.len(), 3);
        assert!(vector[2].is_null());
        assert_eq!(vector[1], strings[1].as_ptr());
    }

    #[test]
    fn test_dup_above_respects_floor() {
        let mut host = PosixHost;
        let fd = host.dup_above(0, 200).unwrap();
        assert!(fd >= 200);
        host.close(fd).unwrap();
    }

    #[test]
    fn test_execve_missing_file() {
        let mut host = PosixHost;
        let errno = host.execve(c"/nonexistent/vermilion-target", &[c"x"], &[]);
        assert_eq!(errno, Errno::ENOENT);
    }
}

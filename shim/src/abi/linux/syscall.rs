//! Guest syscall entry points
//!
//! Decode register arguments, borrow the guest memory they point to and
//! call into the ABI implementation. The guest shares the shim's address
//! space, so guest pointers are dereferenced directly.

use std::ffi::{CStr, c_char};

use super::LinuxAbi;
use super::errno::Errno;
use super::poll::{self, GuestFdSet, PollFd};
use crate::abi::SyscallArgs;

/// Upper bound on the entries of one `poll`.
const MAX_POLL_ENTRIES: usize = 1 << 16;
/// Upper bound on argv/envp entries.
const MAX_ARG_COUNT: usize = 1 << 17;

/// Borrow `len` values of `T` at guest address `addr`.
///
/// # Safety
///
/// A non-null `addr` must point to `len` valid, unaliased `T`s for `'a`.
unsafe fn guest_slice_mut<'a, T>(addr: usize, len: usize) -> Result<&'a mut [T], Errno> {
    if len == 0 {
        return Ok(&mut []);
    }
    if addr == 0 || addr % align_of::<T>() != 0 {
        return Err(Errno::EFAULT);
    }
    Ok(unsafe { std::slice::from_raw_parts_mut(addr as *mut T, len) })
}

/// Optional guest `fd_set` sized for `nfds` descriptors.
///
/// # Safety
///
/// As for [`guest_slice_mut`].
unsafe fn guest_fd_set<'a>(addr: usize, nfds: usize) -> Result<Option<&'a mut [usize]>, Errno> {
    if addr == 0 {
        return Ok(None);
    }
    unsafe { guest_slice_mut(addr, GuestFdSet::words_for(nfds)) }.map(Some)
}

/// # Safety
///
/// A non-null `addr` must point to a NUL-terminated string valid for `'a`.
unsafe fn guest_cstr<'a>(addr: usize) -> Result<&'a CStr, Errno> {
    if addr == 0 {
        return Err(Errno::EFAULT);
    }
    Ok(unsafe { CStr::from_ptr(addr as *const c_char) })
}

/// A null-terminated array of guest string pointers. A null array is empty.
///
/// # Safety
///
/// A non-null `addr` must point to a null-terminated pointer array whose
/// entries satisfy [`guest_cstr`].
unsafe fn guest_string_array<'a>(addr: usize) -> Result<Vec<&'a CStr>, Errno> {
    let mut strings = Vec::new();
    if addr == 0 {
        return Ok(strings);
    }
    let array = addr as *const usize;
    loop {
        let entry = unsafe { array.add(strings.len()).read() };
        if entry == 0 {
            return Ok(strings);
        }
        if strings.len() == MAX_ARG_COUNT {
            return Err(Errno::E2BIG);
        }
        strings.push(unsafe { guest_cstr(entry)? });
    }
}

/// `poll(struct pollfd *fds, nfds_t nfds, int timeout)`
pub fn handle_poll(abi: &mut LinuxAbi, args: &SyscallArgs) -> Result<usize, Errno> {
    let count = args.get_arg(1);
    if count > MAX_POLL_ENTRIES {
        return Err(Errno::EINVAL);
    }
    let entries = unsafe { guest_slice_mut::<PollFd>(args.get_arg(0), count)? };
    let timeout_ms = args.get_arg(2) as i32;
    poll::sys_poll(abi.fds.as_ref(), abi.host.as_mut(), entries, timeout_ms)
}

/// `select(int nfds, fd_set *readfds, fd_set *writefds, fd_set *exceptfds,
/// struct timeval *timeout)`. The guest timeval has the host layout.
pub fn handle_select(abi: &mut LinuxAbi, args: &SyscallArgs) -> Result<usize, Errno> {
    let nfds = args.get_arg(0) as i32;
    let bound = nfds.max(0) as usize;
    let readfds = unsafe { guest_fd_set(args.get_arg(1), bound)? };
    let writefds = unsafe { guest_fd_set(args.get_arg(2), bound)? };
    let exceptfds = unsafe { guest_fd_set(args.get_arg(3), bound)? };
    let timeout = match args.get_arg(4) {
        0 => None,
        addr => unsafe { guest_slice_mut::<libc::timeval>(addr, 1)? }.first_mut(),
    };
    poll::sys_select(
        abi.fds.as_ref(),
        abi.host.as_mut(),
        nfds,
        readfds,
        writefds,
        exceptfds,
        timeout,
    )
}

pub fn handle_pselect6(_abi: &mut LinuxAbi, _args: &SyscallArgs) -> Result<usize, Errno> {
    poll::sys_pselect6()
}

/// `execve(const char *path, char *const argv[], char *const envp[])`
pub fn handle_execve(abi: &mut LinuxAbi, args: &SyscallArgs) -> Result<usize, Errno> {
    let path = unsafe { guest_cstr(args.get_arg(0))? };
    let argv = unsafe { guest_string_array(args.get_arg(1))? };
    let envp = unsafe { guest_string_array(args.get_arg(2))? };
    match abi.exec(path, &argv, &envp) {
        Ok(never) => match never {},
        Err(error) => {
            log::debug!("linux: execve {:?} failed: {}", path, error);
            Err(error.errno())
        }
    }
}

#[cfg(target_arch = "x86_64")]
syscall_table! {
    Poll = 7 => handle_poll,
    Select = 23 => handle_select,
    Execve = 59 => handle_execve,
    Pselect6 = 270 => handle_pselect6,
}

#[cfg(target_arch = "x86")]
syscall_table! {
    Execve = 11 => handle_execve,
    Select = 142 => handle_select,
    Poll = 168 => handle_poll,
    Pselect6 = 308 => handle_pselect6,
}

// asm-generic numbering has neither poll nor the classic select.
#[cfg(not(any(target_arch = "x86_64", target_arch = "x86")))]
syscall_table! {
    Pselect6 = 72 => handle_pselect6,
    Execve = 221 => handle_execve,
}

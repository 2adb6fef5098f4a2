//! Linux errno values
//!
//! Guest-visible failures are carried as [`Errno`], a newtype over the Linux
//! error number. Host primitives report host error numbers, which need not
//! agree with Linux; [`Errno::from_host`] translates them.

use core::fmt;

/// A Linux error number.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct Errno(pub i32);

impl Errno {
    /// Operation not permitted
    pub const EPERM: Errno = Errno(1);
    /// No such file or directory
    pub const ENOENT: Errno = Errno(2);
    /// No such process
    pub const ESRCH: Errno = Errno(3);
    /// Interrupted system call
    pub const EINTR: Errno = Errno(4);
    /// I/O error
    pub const EIO: Errno = Errno(5);
    /// No such device or address
    pub const ENXIO: Errno = Errno(6);
    /// Argument list too long
    pub const E2BIG: Errno = Errno(7);
    /// Exec format error
    pub const ENOEXEC: Errno = Errno(8);
    /// Bad file number
    pub const EBADF: Errno = Errno(9);
    /// No child processes
    pub const ECHILD: Errno = Errno(10);
    /// Try again
    pub const EAGAIN: Errno = Errno(11);
    /// Out of memory
    pub const ENOMEM: Errno = Errno(12);
    /// Permission denied
    pub const EACCES: Errno = Errno(13);
    /// Bad address
    pub const EFAULT: Errno = Errno(14);
    /// Device or resource busy
    pub const EBUSY: Errno = Errno(16);
    /// File exists
    pub const EEXIST: Errno = Errno(17);
    /// Not a directory
    pub const ENOTDIR: Errno = Errno(20);
    /// Is a directory
    pub const EISDIR: Errno = Errno(21);
    /// Invalid argument
    pub const EINVAL: Errno = Errno(22);
    /// File table overflow
    pub const ENFILE: Errno = Errno(23);
    /// Too many open files
    pub const EMFILE: Errno = Errno(24);
    /// Not a typewriter
    pub const ENOTTY: Errno = Errno(25);
    /// Text file busy
    pub const ETXTBSY: Errno = Errno(26);
    /// File too large
    pub const EFBIG: Errno = Errno(27);
    /// No space left on device
    pub const ENOSPC: Errno = Errno(28);
    /// Illegal seek
    pub const ESPIPE: Errno = Errno(29);
    /// Read-only file system
    pub const EROFS: Errno = Errno(30);
    /// Broken pipe
    pub const EPIPE: Errno = Errno(32);
    /// Math result not representable
    pub const ERANGE: Errno = Errno(34);
    /// File name too long
    pub const ENAMETOOLONG: Errno = Errno(36);
    /// Function not implemented
    pub const ENOSYS: Errno = Errno(38);
    /// Too many symbolic links encountered
    pub const ELOOP: Errno = Errno(40);
    /// Operation not supported on transport endpoint
    pub const EOPNOTSUPP: Errno = Errno(95);

    /// Translate a host error number into its Linux counterpart,
    /// defaulting to EIO for numbers with no Linux meaning.
    pub fn from_host(host: i32) -> Errno {
        match host {
            libc::EPERM => Errno::EPERM,
            libc::ENOENT => Errno::ENOENT,
            libc::ESRCH => Errno::ESRCH,
            libc::EINTR => Errno::EINTR,
            libc::EIO => Errno::EIO,
            libc::ENXIO => Errno::ENXIO,
            libc::E2BIG => Errno::E2BIG,
            libc::ENOEXEC => Errno::ENOEXEC,
            libc::EBADF => Errno::EBADF,
            libc::ECHILD => Errno::ECHILD,
            libc::EAGAIN => Errno::EAGAIN,
            libc::ENOMEM => Errno::ENOMEM,
            libc::EACCES => Errno::EACCES,
            libc::EFAULT => Errno::EFAULT,
            libc::EBUSY => Errno::EBUSY,
            libc::EEXIST => Errno::EEXIST,
            libc::ENOTDIR => Errno::ENOTDIR,
            libc::EISDIR => Errno::EISDIR,
            libc::EINVAL => Errno::EINVAL,
            libc::ENFILE => Errno::ENFILE,
            libc::EMFILE => Errno::EMFILE,
            libc::ENOTTY => Errno::ENOTTY,
            libc::ETXTBSY => Errno::ETXTBSY,
            libc::EFBIG => Errno::EFBIG,
            libc::ENOSPC => Errno::ENOSPC,
            libc::ESPIPE => Errno::ESPIPE,
            libc::EROFS => Errno::EROFS,
            libc::EPIPE => Errno::EPIPE,
            libc::ERANGE => Errno::ERANGE,
            libc::ENAMETOOLONG => Errno::ENAMETOOLONG,
            libc::ENOSYS => Errno::ENOSYS,
            libc::ELOOP => Errno::ELOOP,
            libc::EOPNOTSUPP => Errno::EOPNOTSUPP,
            _ => Errno::EIO,
        }
    }

    /// The Linux errno for the calling thread's last host failure.
    pub fn last_host() -> Errno {
        Self::from_io_error(&std::io::Error::last_os_error())
    }

    pub fn from_io_error(error: &std::io::Error) -> Errno {
        error.raw_os_error().map_or(Errno::EIO, Errno::from_host)
    }

    /// Encode as a syscall return word: Linux returns `-errno`.
    pub fn as_return(self) -> usize {
        (self.0 as usize).wrapping_neg()
    }
}

impl fmt::Display for Errno {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "errno {}", self.0)
    }
}

/// Convert a handler result into the word placed in the guest's return register.
pub fn to_syscall_return(result: Result<usize, Errno>) -> usize {
    match result {
        Ok(value) => value,
        Err(errno) => errno.as_return(),
    }
}

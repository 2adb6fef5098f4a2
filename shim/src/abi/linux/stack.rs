//! Startup stack
//!
//! The word layout a fresh Linux image finds at its initial stack pointer:
//!
//! ```text
//! sp -> argc
//!       argv[0] .. argv[argc - 1], 0
//!       envp[0] .. envp[n - 1], 0
//!       (key, value) .. , (AT_NULL, 0)
//! ```
//!
//! Building the layout is pure; placing it copies the words to the top of a
//! stack region with the initial stack pointer 16-byte aligned.

use std::ffi::CString;
use std::ptr;

use crate::abi::linux::auxv::{AT_NULL, AuxVector};
use crate::abi::linux::errno::Errno;
use crate::environment::WORD_SIZE;

const STACK_ALIGN: usize = 16;

/// Build the startup words. String pointers refer to `arguments` and
/// `environment`, which must outlive the image.
pub fn build(arguments: &[CString], environment: &[CString], auxv: &AuxVector) -> Vec<usize> {
    let mut words = Vec::with_capacity(1 + arguments.len() + 1 + environment.len() + 1 + auxv.word_len());
    words.push(arguments.len());
    words.extend(arguments.iter().map(|arg| arg.as_ptr() as usize));
    words.push(0);
    words.extend(environment.iter().map(|env| env.as_ptr() as usize));
    words.push(0);
    for entry in auxv.entries() {
        words.push(entry.key);
        words.push(entry.value);
    }
    words.push(AT_NULL);
    words.push(0);
    words
}

/// A mapped region that receives a startup stack.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct StackRegion {
    pub base: usize,
    pub len: usize,
}

impl StackRegion {
    /// Map a fresh read-write region. It is not tracked by the guest
    /// address space: the image that requests the next exec may be running
    /// on it.
    pub fn map(len: usize) -> Result<Self, Errno> {
        // SAFETY: anonymous private mapping at a host-chosen address.
        let addr = unsafe {
            libc::mmap(
                ptr::null_mut(),
                len,
                libc::PROT_READ | libc::PROT_WRITE,
                libc::MAP_PRIVATE | libc::MAP_ANONYMOUS | libc::MAP_STACK,
                -1,
                0,
            )
        };
        if addr == libc::MAP_FAILED {
            return Err(Errno::last_host());
        }
        Ok(Self { base: addr as usize, len })
    }

    /// Give the region back to the host. Nothing may still run on it.
    pub fn unmap(self) {
        // SAFETY: the region was mapped by `map` and is no longer in use.
        if unsafe { libc::munmap(self.base as *mut libc::c_void, self.len) } == -1 {
            log::warn!("stack: munmap {:#x}+{:#x} failed: {}", self.base, self.len, Errno::last_host());
        }
    }

    /// Copy `words` to the top of the region and return the initial stack
    /// pointer, which addresses `words[0]`.
    pub fn place(&self, words: &[usize]) -> Result<usize, Errno> {
        let bytes = words.len().checked_mul(WORD_SIZE).ok_or(Errno::E2BIG)?;
        let top = self.base + self.len;
        let sp = top.checked_sub(bytes).ok_or(Errno::E2BIG)? & !(STACK_ALIGN - 1);
        if sp < self.base {
            return Err(Errno::E2BIG);
        }
        // SAFETY: sp..sp+bytes lies inside this writable region.
        unsafe {
            ptr::copy_nonoverlapping(words.as_ptr(), sp as *mut usize, words.len());
        }
        Ok(sp)
    }
}

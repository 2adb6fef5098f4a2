//! Guest address-space bookkeeping.

use std::collections::BTreeMap;
use std::ptr;

use crate::abi::linux::errno::Errno;
use crate::environment::PAGE_SIZE;

pub fn page_align_down(addr: usize) -> usize {
    addr & !(PAGE_SIZE - 1)
}

/// `None` when the aligned address does not fit in a `usize`.
pub fn page_align_up(addr: usize) -> Option<usize> {
    addr.checked_add(PAGE_SIZE - 1).map(|addr| addr & !(PAGE_SIZE - 1))
}

/// An anonymous mapping request. `addr` of `None` lets the host choose.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct MapRequest {
    pub addr: Option<usize>,
    pub len: usize,
    pub prot: i32,
}

/// Address-space and break manager contract.
pub trait AddressSpace {
    /// Create an anonymous private mapping and return its address.
    fn map(&mut self, request: MapRequest) -> Result<usize, Errno>;

    fn protect(&mut self, addr: usize, len: usize, prot: i32) -> Result<(), Errno>;

    fn set_program_break(&mut self, addr: usize);

    fn program_break(&self) -> Option<usize>;

    /// Unmap every guest mapping made through this manager.
    fn release_all_mappings(&mut self);

    fn reset_program_break(&mut self);
}

/// Default address-space manager: tracks the mappings it creates.
#[derive(Debug, Default)]
pub struct MappingTracker {
    /// start -> length, page aligned
    mappings: BTreeMap<usize, usize>,
    program_break: Option<usize>,
}

impl MappingTracker {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn mapping_count(&self) -> usize {
        self.mappings.len()
    }

    fn covers(&self, addr: usize, len: usize) -> bool {
        self.mappings
            .range(..=addr)
            .next_back()
            .is_some_and(|(&start, &size)| addr + len <= start + size)
    }
}

impl AddressSpace for MappingTracker {
    fn map(&mut self, request: MapRequest) -> Result<usize, Errno> {
        if request.len == 0 {
            return Err(Errno::EINVAL);
        }
        let len = page_align_up(request.len).ok_or(Errno::ENOMEM)?;
        let (hint, flags) = match request.addr {
            Some(addr) if addr % PAGE_SIZE != 0 => return Err(Errno::EINVAL),
            Some(addr) => (addr as *mut libc::c_void, libc::MAP_FIXED),
            None => (ptr::null_mut(), 0),
        };
        // SAFETY: anonymous private mapping; a fixed address is only ever
        // requested inside guest-owned ranges.
        let addr = unsafe {
            libc::mmap(hint, len, request.prot, libc::MAP_PRIVATE | libc::MAP_ANONYMOUS | flags, -1, 0)
        };
        if addr == libc::MAP_FAILED {
            return Err(Errno::last_host());
        }
        let addr = addr as usize;
        if !self.covers(addr, len) {
            self.mappings.insert(addr, len);
        }
        Ok(addr)
    }

    fn protect(&mut self, addr: usize, len: usize, prot: i32) -> Result<(), Errno> {
        let len = page_align_up(len).ok_or(Errno::EINVAL)?;
        // SAFETY: changes protection of guest pages only.
        if unsafe { libc::mprotect(addr as *mut libc::c_void, len, prot) } == -1 {
            return Err(Errno::last_host());
        }
        Ok(())
    }

    fn set_program_break(&mut self, addr: usize) {
        self.program_break = Some(addr);
    }

    fn program_break(&self) -> Option<usize> {
        self.program_break
    }

    fn release_all_mappings(&mut self) {
        for (addr, len) in std::mem::take(&mut self.mappings) {
            // SAFETY: the range was created by this tracker for the guest.
            if unsafe { libc::munmap(addr as *mut libc::c_void, len) } == -1 {
                log::warn!("memory: munmap {:#x}+{:#x} failed: {}", addr, len, Errno::last_host());
            }
        }
    }

    fn reset_program_break(&mut self) {
        self.program_break = None;
    }
}

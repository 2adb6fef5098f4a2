//! Guest descriptor table
//!
//! Guest programs see small descriptor numbers of their own; each maps to a
//! real host descriptor. The multiplexer and the exec paths only consume this
//! mapping through [`DescriptorTranslator`].

use std::os::fd::RawFd;

use hashbrown::HashMap;

use crate::abi::linux::errno::Errno;

const MAX_FDS: i32 = 1024; // Maximum number of guest file descriptors

/// The descriptor translation contract.
pub trait DescriptorTranslator {
    /// Real host descriptor behind `guest`, EBADF if unknown.
    fn resolve(&self, guest: i32) -> Result<RawFd, Errno>;

    /// Discard guest-owned descriptor state that does not survive an image
    /// replacement. Descriptors inherited across exec stay open.
    fn flush(&mut self);

    /// The whole mapping as `(guest, real)` pairs ordered by guest number.
    fn enumerate_map(&self) -> Vec<(i32, RawFd)>;
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
struct FdEntry {
    real: RawFd,
    /// FD_CLOEXEC: closed by `flush`
    close_on_exec: bool,
}

/// Default translator: a guest -> host map with close-on-exec flags.
#[derive(Debug, Default)]
pub struct FdTable {
    entries: HashMap<i32, FdEntry>,
}

impl FdTable {
    pub fn new() -> Self {
        Self::default()
    }

    /// Table with guest 0, 1, 2 mapped onto the host's standard streams.
    pub fn with_std_fds() -> Self {
        let mut table = Self::new();
        for fd in 0..3 {
            table.entries.insert(fd, FdEntry { real: fd, close_on_exec: false });
        }
        table
    }

    /// Map `real` on the lowest free guest number.
    pub fn allocate(&mut self, real: RawFd, close_on_exec: bool) -> Result<i32, Errno> {
        let guest = (0..MAX_FDS)
            .find(|fd| !self.entries.contains_key(fd))
            .ok_or(Errno::EMFILE)?;
        self.entries.insert(guest, FdEntry { real, close_on_exec });
        Ok(guest)
    }

    /// Map `real` on a specific guest number, replacing any previous mapping.
    /// Returns the real descriptor that was displaced.
    pub fn insert(&mut self, guest: i32, real: RawFd, close_on_exec: bool) -> Result<Option<RawFd>, Errno> {
        if !(0..MAX_FDS).contains(&guest) {
            return Err(Errno::EBADF);
        }
        Ok(self
            .entries
            .insert(guest, FdEntry { real, close_on_exec })
            .map(|old| old.real))
    }

    /// Forget a guest descriptor; the caller owns the returned real one.
    pub fn remove(&mut self, guest: i32) -> Option<RawFd> {
        self.entries.remove(&guest).map(|entry| entry.real)
    }

    pub fn set_close_on_exec(&mut self, guest: i32, close_on_exec: bool) -> Result<(), Errno> {
        let entry = self.entries.get_mut(&guest).ok_or(Errno::EBADF)?;
        entry.close_on_exec = close_on_exec;
        Ok(())
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

impl DescriptorTranslator for FdTable {
    fn resolve(&self, guest: i32) -> Result<RawFd, Errno> {
        self.entries.get(&guest).map(|entry| entry.real).ok_or(Errno::EBADF)
    }

    fn flush(&mut self) {
        let doomed: Vec<i32> = self
            .entries
            .iter()
            .filter(|(_, entry)| entry.close_on_exec)
            .map(|(&guest, _)| guest)
            .collect();
        for guest in doomed {
            if let Some(entry) = self.entries.remove(&guest) {
                // SAFETY: the table owns close-on-exec descriptors.
                if unsafe { libc::close(entry.real) } == -1 {
                    log::debug!("fd_table: close of real fd {} for guest {} failed", entry.real, guest);
                }
            }
        }
    }

    fn enumerate_map(&self) -> Vec<(i32, RawFd)> {
        let mut map: Vec<(i32, RawFd)> = self
            .entries
            .iter()
            .map(|(&guest, entry)| (guest, entry.real))
            .collect();
        map.sort_unstable_by_key(|&(guest, _)| guest);
        map
    }
}

//! ELF auxiliary vector (kernel-userland ABI).
//!
//! Placed after the environment pointers on the startup stack. The runtime
//! interpreter (or a static image's startup code) reads it to find the
//! executable's program headers and entrypoint.

use crate::environment::PAGE_SIZE;
use crate::task::GuestImage;

/// End of auxiliary vector.
pub const AT_NULL: usize = 0;
/// Address of program headers in memory.
pub const AT_PHDR: usize = 3;
/// Size of each program header entry.
pub const AT_PHENT: usize = 4;
/// Number of program headers.
pub const AT_PHNUM: usize = 5;
/// System page size.
pub const AT_PAGESZ: usize = 6;
/// Base address of the interpreter. Not emitted.
pub const AT_BASE: usize = 7;
/// Flags. Not emitted.
pub const AT_FLAGS: usize = 8;
/// Entry point of the program (not the interpreter).
pub const AT_ENTRY: usize = 9;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct AuxEntry {
    pub key: usize,
    pub value: usize,
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct AuxVector {
    entries: Vec<AuxEntry>,
}

impl AuxVector {
    pub fn new() -> Self {
        Self::default()
    }

    /// The entries describing a loaded executable.
    pub fn for_executable(executable: &dyn GuestImage) -> Self {
        let mut auxv = Self::new();
        auxv.push(AT_PHDR, executable.program_header(0));
        auxv.push(AT_PHENT, executable.program_header_size());
        auxv.push(AT_PHNUM, executable.program_header_count());
        auxv.push(AT_ENTRY, executable.entrypoint());
        auxv.push(AT_PAGESZ, PAGE_SIZE);
        auxv
    }

    /// Append an entry. `AT_NULL` is implied at the end and never stored.
    pub fn push(&mut self, key: usize, value: usize) {
        if key != AT_NULL {
            self.entries.push(AuxEntry { key, value });
        }
    }

    pub fn get(&self, key: usize) -> Option<usize> {
        self.entries.iter().find(|entry| entry.key == key).map(|entry| entry.value)
    }

    pub fn entries(&self) -> &[AuxEntry] {
        &self.entries
    }

    /// Number of words including the terminating `(AT_NULL, 0)` pair.
    pub fn word_len(&self) -> usize {
        (self.entries.len() + 1) * 2
    }
}

//! Loaded guest images
//!
//! The exec path consumes images through these traits; the default
//! implementation is [`crate::task::elf_loader::ElfLoader`].

use std::ffi::CStr;

use crate::abi::linux::errno::Errno;
use crate::host::{AddressSpace, Vfs};

/// An opened, validated guest image.
pub trait GuestImage {
    fn path(&self) -> &CStr;

    /// Runtime interpreter requested by the image, if any.
    fn interpreter(&self) -> Option<&CStr>;

    /// Map the image's segments into the guest address space.
    fn load(&mut self, memory: &mut dyn AddressSpace) -> Result<(), Errno>;

    /// Entrypoint address; final once the image is loaded.
    fn entrypoint(&self) -> usize;

    /// In-memory address of program header 0.
    fn program_header_table(&self) -> usize;

    fn program_header_size(&self) -> usize;

    fn program_header_count(&self) -> usize;

    /// In-memory address of program header `index`.
    fn program_header(&self, index: usize) -> usize {
        self.program_header_table() + index * self.program_header_size()
    }
}

/// Opens and validates guest images without touching process state.
pub trait ImageLoader {
    fn open(&self, vfs: &dyn Vfs, path: &CStr) -> Result<Box<dyn GuestImage>, Errno>;
}

/// The primary executable and its optional runtime interpreter.
pub struct ImagePair {
    pub executable: Box<dyn GuestImage>,
    pub interpreter: Option<Box<dyn GuestImage>>,
}

impl ImagePair {
    /// Where control goes first: the interpreter when there is one.
    pub fn transfer_entrypoint(&self) -> usize {
        match &self.interpreter {
            Some(interpreter) => interpreter.entrypoint(),
            None => self.executable.entrypoint(),
        }
    }
}

//! ELF Loading Module
//!
//! Opens, validates and maps guest ELF images into the guest address space.
//! Only images of the host's own class and machine, in little-endian
//! encoding, are accepted; anything else is rejected as `ENOEXEC` before any
//! process state has been touched.
//!
//! # Components
//!
//! - `ElfHeader`: the ELF file header, parsed for either class
//! - `ProgramHeader`: one entry of the program header table
//! - `ElfImage`: an opened image implementing [`GuestImage`]
//! - `ElfLoader`: the default [`ImageLoader`]
//!
//! # Loading
//!
//! The whole span covered by `PT_LOAD` segments is mapped once read-write,
//! file contents are copied in, and each segment then gets its final
//! protection. `ET_DYN` images are placed wherever the host chooses;
//! `ET_EXEC` images go at their linked addresses.

use std::ffi::{CStr, CString};
use std::fmt;
use std::fs::File;
use std::io;
use std::os::unix::fs::FileExt;

use crate::abi::linux::errno::Errno;
use crate::host::memory::{page_align_down, page_align_up};
use crate::host::{AddressSpace, MapRequest, Vfs};
use crate::task::image::{GuestImage, ImageLoader};

// ELF Magic Number
pub const ELFMAG: [u8; 4] = [0x7F, b'E', b'L', b'F'];
// ELF Class
pub const ELFCLASS32: u8 = 1;
pub const ELFCLASS64: u8 = 2;
// ELF Data Endian
pub const ELFDATA2LSB: u8 = 1;
pub const EV_CURRENT: u32 = 1;

// File Type
pub const ET_EXEC: u16 = 2;
pub const ET_DYN: u16 = 3;

// Machine
pub const EM_386: u16 = 3;
pub const EM_X86_64: u16 = 62;
pub const EM_AARCH64: u16 = 183;
pub const EM_RISCV: u16 = 243;

#[cfg(target_arch = "x86_64")]
pub const NATIVE_MACHINE: u16 = EM_X86_64;
#[cfg(target_arch = "x86")]
pub const NATIVE_MACHINE: u16 = EM_386;
#[cfg(target_arch = "aarch64")]
pub const NATIVE_MACHINE: u16 = EM_AARCH64;
#[cfg(target_arch = "riscv64")]
pub const NATIVE_MACHINE: u16 = EM_RISCV;

#[cfg(target_pointer_width = "64")]
pub const NATIVE_CLASS: u8 = ELFCLASS64;
#[cfg(target_pointer_width = "32")]
pub const NATIVE_CLASS: u8 = ELFCLASS32;

// Program Header Type
pub const PT_LOAD: u32 = 1; // Loadable segment
pub const PT_INTERP: u32 = 3; // Interpreter path
pub const PT_PHDR: u32 = 6; // Program header table itself

// Segment Flags
pub const PF_X: u32 = 1; // Executable
pub const PF_W: u32 = 2; // Writable
pub const PF_R: u32 = 4; // Readable

// ELF Identifier Indices
const EI_CLASS: usize = 4;
const EI_DATA: usize = 5;
const EI_VERSION: usize = 6;

pub(crate) const EHDR64_SIZE: usize = 64;
const EHDR32_SIZE: usize = 52;
pub(crate) const PHDR64_SIZE: usize = 56;
const PHDR32_SIZE: usize = 32;

/// Longest interpreter path accepted from `PT_INTERP`.
const INTERP_MAX: u64 = 4096;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ElfError {
    Truncated,
    InvalidMagicNumber,
    UnsupportedClass(u8),
    UnsupportedEncoding(u8),
    UnsupportedVersion(u32),
    UnsupportedType(u16),
    UnsupportedMachine(u16),
    InvalidProgramHeaders,
    InvalidSegment(usize),
    InvalidInterpreter,
    NoLoadableSegment,
    ProgramHeadersNotMapped,
}

impl fmt::Display for ElfError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ElfError::Truncated => write!(f, "file too short"),
            ElfError::InvalidMagicNumber => write!(f, "invalid ELF magic number"),
            ElfError::UnsupportedClass(class) => write!(f, "unsupported class {}", class),
            ElfError::UnsupportedEncoding(data) => write!(f, "unsupported data encoding {}", data),
            ElfError::UnsupportedVersion(version) => write!(f, "unsupported version {}", version),
            ElfError::UnsupportedType(kind) => write!(f, "unsupported file type {}", kind),
            ElfError::UnsupportedMachine(machine) => write!(f, "unsupported machine {}", machine),
            ElfError::InvalidProgramHeaders => write!(f, "invalid program header table"),
            ElfError::InvalidSegment(index) => write!(f, "invalid segment {}", index),
            ElfError::InvalidInterpreter => write!(f, "invalid interpreter path"),
            ElfError::NoLoadableSegment => write!(f, "no loadable segment"),
            ElfError::ProgramHeadersNotMapped => write!(f, "program headers are not mapped"),
        }
    }
}

impl From<ElfError> for Errno {
    fn from(_: ElfError) -> Self {
        Errno::ENOEXEC
    }
}

fn read_u16(buffer: &[u8], offset: usize) -> Result<u16, ElfError> {
    let bytes = buffer.get(offset..offset + 2).ok_or(ElfError::Truncated)?;
    Ok(u16::from_le_bytes([bytes[0], bytes[1]]))
}

fn read_u32(buffer: &[u8], offset: usize) -> Result<u32, ElfError> {
    let bytes = buffer.get(offset..offset + 4).ok_or(ElfError::Truncated)?;
    let mut word = [0u8; 4];
    word.copy_from_slice(bytes);
    Ok(u32::from_le_bytes(word))
}

fn read_u64(buffer: &[u8], offset: usize) -> Result<u64, ElfError> {
    let bytes = buffer.get(offset..offset + 8).ok_or(ElfError::Truncated)?;
    let mut word = [0u8; 8];
    word.copy_from_slice(bytes);
    Ok(u64::from_le_bytes(word))
}

/// Read a class-sized address or offset.
fn read_word(buffer: &[u8], offset: usize, class: u8) -> Result<u64, ElfError> {
    if class == ELFCLASS64 {
        read_u64(buffer, offset)
    } else {
        read_u32(buffer, offset).map(u64::from)
    }
}

#[derive(Debug, Clone)]
pub struct ElfHeader {
    pub ei_class: u8,     // 32-bit or 64-bit (EI_CLASS)
    pub ei_data: u8,      // Endianness (EI_DATA)
    pub e_type: u16,      // File type
    pub e_machine: u16,   // Machine type
    pub e_version: u32,   // ELF version
    pub e_entry: u64,     // Entry point address
    pub e_phoff: u64,     // Program header table file offset
    pub e_phentsize: u16, // Program header table entry size
    pub e_phnum: u16,     // Number of program header entries
}

impl ElfHeader {
    pub fn size_for(class: u8) -> usize {
        if class == ELFCLASS64 { EHDR64_SIZE } else { EHDR32_SIZE }
    }

    pub fn parse(buffer: &[u8]) -> Result<Self, ElfError> {
        if buffer.len() < 16 {
            return Err(ElfError::Truncated);
        }
        if buffer[..4] != ELFMAG {
            return Err(ElfError::InvalidMagicNumber);
        }
        let ei_class = buffer[EI_CLASS];
        if ei_class != ELFCLASS32 && ei_class != ELFCLASS64 {
            return Err(ElfError::UnsupportedClass(ei_class));
        }
        let ei_data = buffer[EI_DATA];
        if ei_data != ELFDATA2LSB {
            return Err(ElfError::UnsupportedEncoding(ei_data));
        }
        if buffer.len() < Self::size_for(ei_class) {
            return Err(ElfError::Truncated);
        }

        let word = if ei_class == ELFCLASS64 { 8 } else { 4 };
        let e_type = read_u16(buffer, 16)?;
        let e_machine = read_u16(buffer, 18)?;
        let e_version = read_u32(buffer, 20)?;
        let e_entry = read_word(buffer, 24, ei_class)?;
        let e_phoff = read_word(buffer, 24 + word, ei_class)?;
        // e_shoff, e_flags, e_ehsize sit between e_phoff and e_phentsize
        let tail = 24 + 3 * word + 6;
        let e_phentsize = read_u16(buffer, tail)?;
        let e_phnum = read_u16(buffer, tail + 2)?;

        Ok(Self {
            ei_class,
            ei_data,
            e_type,
            e_machine,
            e_version,
            e_entry,
            e_phoff,
            e_phentsize,
            e_phnum,
        })
    }

    /// Reject anything the host cannot run directly.
    pub fn validate_native(&self, ident_version: u8) -> Result<(), ElfError> {
        if self.ei_class != NATIVE_CLASS {
            return Err(ElfError::UnsupportedClass(self.ei_class));
        }
        if u32::from(ident_version) != EV_CURRENT || self.e_version != EV_CURRENT {
            return Err(ElfError::UnsupportedVersion(self.e_version));
        }
        if self.e_type != ET_EXEC && self.e_type != ET_DYN {
            return Err(ElfError::UnsupportedType(self.e_type));
        }
        if self.e_machine != NATIVE_MACHINE {
            return Err(ElfError::UnsupportedMachine(self.e_machine));
        }
        if usize::from(self.e_phentsize) != ProgramHeader::size_for(self.ei_class) || self.e_phnum == 0 {
            return Err(ElfError::InvalidProgramHeaders);
        }
        Ok(())
    }

    fn program_table_len(&self) -> u64 {
        u64::from(self.e_phentsize) * u64::from(self.e_phnum)
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ProgramHeader {
    pub p_type: u32,   // Segment type
    pub p_flags: u32,  // Segment flags
    pub p_offset: u64, // Segment offset in file
    pub p_vaddr: u64,  // Segment virtual address for loading
    pub p_filesz: u64, // Segment size in file
    pub p_memsz: u64,  // Segment size in memory
}

impl ProgramHeader {
    pub fn size_for(class: u8) -> usize {
        if class == ELFCLASS64 { PHDR64_SIZE } else { PHDR32_SIZE }
    }

    pub fn parse(buffer: &[u8], class: u8) -> Result<Self, ElfError> {
        if buffer.len() < Self::size_for(class) {
            return Err(ElfError::Truncated);
        }
        if class == ELFCLASS64 {
            Ok(Self {
                p_type: read_u32(buffer, 0)?,
                p_flags: read_u32(buffer, 4)?,
                p_offset: read_u64(buffer, 8)?,
                p_vaddr: read_u64(buffer, 16)?,
                p_filesz: read_u64(buffer, 32)?,
                p_memsz: read_u64(buffer, 40)?,
            })
        } else {
            Ok(Self {
                p_type: read_u32(buffer, 0)?,
                p_offset: u64::from(read_u32(buffer, 4)?),
                p_vaddr: u64::from(read_u32(buffer, 8)?),
                p_filesz: u64::from(read_u32(buffer, 16)?),
                p_memsz: u64::from(read_u32(buffer, 20)?),
                p_flags: read_u32(buffer, 24)?,
            })
        }
    }

    /// Host protection bits for this segment.
    pub fn protection(&self) -> i32 {
        let mut prot = libc::PROT_NONE;
        if self.p_flags & PF_R != 0 {
            prot |= libc::PROT_READ;
        }
        if self.p_flags & PF_W != 0 {
            prot |= libc::PROT_WRITE;
        }
        if self.p_flags & PF_X != 0 {
            prot |= libc::PROT_EXEC;
        }
        prot
    }

    fn file_end(&self) -> Option<u64> {
        self.p_offset.checked_add(self.p_filesz)
    }

    fn memory_end(&self) -> Option<u64> {
        self.p_vaddr.checked_add(self.p_memsz)
    }

    /// Page-aligned end of the segment in memory, if it is addressable.
    fn page_end(&self) -> Option<usize> {
        self.memory_end()
            .and_then(|end| usize::try_from(end).ok())
            .and_then(page_align_up)
    }
}

fn read_exact_at(file: &File, buffer: &mut [u8], offset: u64) -> Result<(), Errno> {
    file.read_exact_at(buffer, offset).map_err(|error| match error.kind() {
        io::ErrorKind::UnexpectedEof => Errno::ENOEXEC,
        _ => Errno::from_io_error(&error),
    })
}

/// An opened and validated ELF image.
pub struct ElfImage {
    path: CString,
    file: File,
    header: ElfHeader,
    program_headers: Vec<ProgramHeader>,
    interpreter: Option<CString>,
    /// Link-time address of the program header table
    phdr_vaddr: u64,
    /// Difference between load address and link-time address
    bias: usize,
    loaded: bool,
}

impl ElfImage {
    pub fn open(file: File, path: &CStr) -> Result<Self, Errno> {
        let file_len = file.metadata().map_err(|e| Errno::from_io_error(&e))?.len();

        let mut ident = [0u8; EHDR64_SIZE];
        let ident_len = ElfHeader::size_for(NATIVE_CLASS).min(usize::try_from(file_len).unwrap_or(usize::MAX));
        read_exact_at(&file, &mut ident[..ident_len], 0)?;
        let header = ElfHeader::parse(&ident[..ident_len])?;
        header.validate_native(ident[EI_VERSION])?;

        let table_end = header
            .e_phoff
            .checked_add(header.program_table_len())
            .ok_or(ElfError::InvalidProgramHeaders)?;
        if table_end > file_len {
            return Err(ElfError::InvalidProgramHeaders.into());
        }
        let mut table = vec![0u8; header.program_table_len() as usize];
        read_exact_at(&file, &mut table, header.e_phoff)?;
        let program_headers = table
            .chunks_exact(usize::from(header.e_phentsize))
            .map(|entry| ProgramHeader::parse(entry, header.ei_class))
            .collect::<Result<Vec<_>, _>>()?;

        let mut interpreter = None;
        let mut phdr_vaddr = None;
        let mut loadable = 0;
        for (index, ph) in program_headers.iter().enumerate() {
            match ph.p_type {
                PT_LOAD => {
                    loadable += 1;
                    let in_file = ph.file_end().is_some_and(|end| end <= file_len);
                    if ph.p_filesz > ph.p_memsz || !in_file || ph.page_end().is_none() {
                        return Err(ElfError::InvalidSegment(index).into());
                    }
                }
                PT_INTERP => {
                    if interpreter.is_some() {
                        return Err(ElfError::InvalidInterpreter.into());
                    }
                    interpreter = Some(Self::read_interpreter(&file, ph, file_len)?);
                }
                PT_PHDR => phdr_vaddr = Some(ph.p_vaddr),
                _ => {}
            }
        }
        if loadable == 0 {
            return Err(ElfError::NoLoadableSegment.into());
        }

        let phdr_vaddr = match phdr_vaddr {
            Some(vaddr) => vaddr,
            None => Self::locate_program_headers(&header, &program_headers)?,
        };

        Ok(Self {
            path: path.to_owned(),
            file,
            header,
            program_headers,
            interpreter,
            phdr_vaddr,
            bias: 0,
            loaded: false,
        })
    }

    fn read_interpreter(file: &File, ph: &ProgramHeader, file_len: u64) -> Result<CString, Errno> {
        let in_file = ph.file_end().is_some_and(|end| end <= file_len);
        if ph.p_filesz == 0 || ph.p_filesz > INTERP_MAX || !in_file {
            return Err(ElfError::InvalidInterpreter.into());
        }
        let mut raw = vec![0u8; ph.p_filesz as usize];
        read_exact_at(file, &mut raw, ph.p_offset)?;
        if raw.last() == Some(&0) {
            raw.pop();
        }
        match CString::new(raw) {
            Ok(path) if !path.as_bytes().is_empty() => Ok(path),
            _ => Err(ElfError::InvalidInterpreter.into()),
        }
    }

    /// Find the link-time address of the program header table through the
    /// `PT_LOAD` segment whose file range contains it.
    fn locate_program_headers(header: &ElfHeader, program_headers: &[ProgramHeader]) -> Result<u64, ElfError> {
        let table_end = header.e_phoff + header.program_table_len();
        program_headers
            .iter()
            .filter(|ph| ph.p_type == PT_LOAD)
            .find(|ph| ph.p_offset <= header.e_phoff && ph.file_end().is_some_and(|end| table_end <= end))
            .map(|ph| ph.p_vaddr + (header.e_phoff - ph.p_offset))
            .ok_or(ElfError::ProgramHeadersNotMapped)
    }

    pub fn header(&self) -> &ElfHeader {
        &self.header
    }

    pub fn program_headers(&self) -> &[ProgramHeader] {
        &self.program_headers
    }

    pub fn is_loaded(&self) -> bool {
        self.loaded
    }

    pub fn load_bias(&self) -> usize {
        self.bias
    }

    /// Page-aligned link-time span covered by all loadable segments.
    fn span(&self) -> Result<(usize, usize), ElfError> {
        let mut low = usize::MAX;
        let mut high = 0;
        for (index, ph) in self.program_headers.iter().enumerate() {
            if ph.p_type != PT_LOAD {
                continue;
            }
            let start = usize::try_from(ph.p_vaddr).map_err(|_| ElfError::InvalidSegment(index))?;
            let end = ph.page_end().ok_or(ElfError::InvalidSegment(index))?;
            low = low.min(start);
            high = high.max(end);
        }
        Ok((page_align_down(low), high))
    }
}

impl GuestImage for ElfImage {
    fn path(&self) -> &CStr {
        &self.path
    }

    fn interpreter(&self) -> Option<&CStr> {
        self.interpreter.as_deref()
    }

    fn load(&mut self, memory: &mut dyn AddressSpace) -> Result<(), Errno> {
        let (low, high) = self.span()?;
        if high <= low {
            return Err(ElfError::NoLoadableSegment.into());
        }
        let fixed = self.header.e_type == ET_EXEC;
        let base = memory.map(MapRequest {
            addr: fixed.then_some(low),
            len: high - low,
            prot: libc::PROT_READ | libc::PROT_WRITE,
        })?;
        self.bias = base.wrapping_sub(low);

        for ph in self.program_headers.iter().filter(|ph| ph.p_type == PT_LOAD) {
            if ph.p_filesz == 0 {
                continue;
            }
            let dest = (ph.p_vaddr as usize).wrapping_add(self.bias);
            // SAFETY: dest..dest+filesz lies inside the span mapped read-write
            // just above, which nothing else references yet.
            let segment = unsafe { std::slice::from_raw_parts_mut(dest as *mut u8, ph.p_filesz as usize) };
            read_exact_at(&self.file, segment, ph.p_offset)?;
        }

        for (index, ph) in self.program_headers.iter().enumerate() {
            if ph.p_type != PT_LOAD {
                continue;
            }
            let start = (ph.p_vaddr as usize).wrapping_add(self.bias);
            let aligned = page_align_down(start);
            let end = start
                .checked_add(ph.p_memsz as usize)
                .and_then(page_align_up)
                .ok_or(ElfError::InvalidSegment(index))?;
            if end > aligned {
                memory.protect(aligned, end - aligned, ph.protection())?;
            }
        }

        memory.set_program_break(high.wrapping_add(self.bias));
        self.loaded = true;
        log::debug!(
            "elf_loader: loaded {:?} at {:#x} (entry {:#x})",
            self.path,
            base,
            self.entrypoint()
        );
        Ok(())
    }

    fn entrypoint(&self) -> usize {
        (self.header.e_entry as usize).wrapping_add(self.bias)
    }

    fn program_header_table(&self) -> usize {
        (self.phdr_vaddr as usize).wrapping_add(self.bias)
    }

    fn program_header_size(&self) -> usize {
        usize::from(self.header.e_phentsize)
    }

    fn program_header_count(&self) -> usize {
        usize::from(self.header.e_phnum)
    }
}

/// Default image loader: reads ELF images through the VFS.
#[derive(Debug, Default, Clone, Copy)]
pub struct ElfLoader;

impl ImageLoader for ElfLoader {
    fn open(&self, vfs: &dyn Vfs, path: &CStr) -> Result<Box<dyn GuestImage>, Errno> {
        let file = File::from(vfs.open_file(path)?);
        let image = ElfImage::open(file, path).inspect_err(|errno| {
            log::debug!("elf_loader: rejected {:?}: {}", path, errno);
        })?;
        Ok(Box::new(image))
    }
}

//! Test doubles for the host seam and the collaborators.

use std::cell::RefCell;
use std::collections::BTreeMap;
use std::ffi::{CStr, CString};
use std::os::fd::{FromRawFd, OwnedFd, RawFd};
use std::io::Write;
use std::rc::Rc;

use hashbrown::HashMap;
use tempfile::NamedTempFile;

use crate::abi::linux::errno::Errno;
use crate::host::{AddressSpace, CwdNode, DescriptorTranslator, HostFdSet, HostOps, HostVfs, MapRequest, Vfs};
use crate::task::elf_loader::{
    EHDR64_SIZE, ELFCLASS64, ELFDATA2LSB, ELFMAG, EV_CURRENT, NATIVE_MACHINE, PF_R, PF_X, PHDR64_SIZE, PT_LOAD,
};
use crate::task::{GuestImage, ImageLoader};

/// A host primitive as seen by [`RecordingHost`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum HostCall {
    Select { nfds: i32 },
    DupAbove { fd: RawFd, floor: RawFd },
    Dup2 { fd: RawFd, target: RawFd },
    Close(RawFd),
    Fchdir(RawFd),
    Chdir(CString),
    Execve {
        path: CString,
        argv: Vec<CString>,
        envp: Vec<CString>,
    },
}

/// Records every host call. `select` reports the descriptors listed in
/// `readable`/`writable`/`errored` as ready.
#[derive(Debug)]
pub struct RecordingHost {
    pub calls: Vec<HostCall>,
    pub readable: Vec<RawFd>,
    pub writable: Vec<RawFd>,
    pub errored: Vec<RawFd>,
    pub select_error: Option<Errno>,
    pub fail_dup2_target: Option<RawFd>,
    pub fail_fchdir: bool,
    pub fail_chdir: bool,
    pub execve_errno: Errno,
    next_dup: RawFd,
}

impl RecordingHost {
    /// Descriptor returned by the first `dup_above`.
    pub const FIRST_DUP: RawFd = 100;

    pub fn new() -> Self {
        Self {
            calls: Vec::new(),
            readable: Vec::new(),
            writable: Vec::new(),
            errored: Vec::new(),
            select_error: None,
            fail_dup2_target: None,
            fail_fchdir: false,
            fail_chdir: false,
            execve_errno: Errno::ENOENT,
            next_dup: Self::FIRST_DUP,
        }
    }

    pub fn select_calls(&self) -> usize {
        self.calls.iter().filter(|call| matches!(call, HostCall::Select { .. })).count()
    }
}

fn keep_ready(set: &mut HostFdSet, nfds: i32, ready: &[RawFd]) -> usize {
    let mut count = 0;
    for fd in 0..nfds {
        if set.contains(fd) {
            if ready.contains(&fd) {
                count += 1;
            } else {
                set.remove(fd);
            }
        }
    }
    count
}

impl HostOps for RecordingHost {
    fn select(
        &mut self,
        nfds: i32,
        read: &mut HostFdSet,
        write: &mut HostFdSet,
        error: &mut HostFdSet,
        _timeout: Option<&mut libc::timeval>,
    ) -> Result<usize, Errno> {
        self.calls.push(HostCall::Select { nfds });
        if let Some(errno) = self.select_error {
            return Err(errno);
        }
        Ok(keep_ready(read, nfds, &self.readable)
            + keep_ready(write, nfds, &self.writable)
            + keep_ready(error, nfds, &self.errored))
    }

    fn dup_above(&mut self, fd: RawFd, floor: RawFd) -> Result<RawFd, Errno> {
        self.calls.push(HostCall::DupAbove { fd, floor });
        let copy = self.next_dup.max(floor);
        self.next_dup = copy + 1;
        Ok(copy)
    }

    fn dup2(&mut self, fd: RawFd, target: RawFd) -> Result<(), Errno> {
        self.calls.push(HostCall::Dup2 { fd, target });
        if self.fail_dup2_target == Some(target) {
            return Err(Errno::EBADF);
        }
        Ok(())
    }

    fn close(&mut self, fd: RawFd) -> Result<(), Errno> {
        self.calls.push(HostCall::Close(fd));
        Ok(())
    }

    fn fchdir(&mut self, fd: RawFd) -> Result<(), Errno> {
        self.calls.push(HostCall::Fchdir(fd));
        if self.fail_fchdir {
            return Err(Errno::EBADF);
        }
        Ok(())
    }

    fn chdir(&mut self, path: &CStr) -> Result<(), Errno> {
        self.calls.push(HostCall::Chdir(path.to_owned()));
        if self.fail_chdir {
            return Err(Errno::ENOENT);
        }
        Ok(())
    }

    fn execve(&mut self, path: &CStr, argv: &[&CStr], envp: &[&CStr]) -> Errno {
        self.calls.push(HostCall::Execve {
            path: path.to_owned(),
            argv: argv.iter().map(|&arg| arg.to_owned()).collect(),
            envp: envp.iter().map(|&env| env.to_owned()).collect(),
        });
        self.execve_errno
    }
}

/// A fixed guest -> real map that only counts flushes.
#[derive(Debug, Default)]
pub struct MockTranslator {
    pub map: BTreeMap<i32, RawFd>,
    pub flushes: usize,
}

impl MockTranslator {
    pub fn new(pairs: &[(i32, RawFd)]) -> Self {
        Self {
            map: pairs.iter().copied().collect(),
            flushes: 0,
        }
    }
}

impl DescriptorTranslator for MockTranslator {
    fn resolve(&self, guest: i32) -> Result<RawFd, Errno> {
        self.map.get(&guest).copied().ok_or(Errno::EBADF)
    }

    fn flush(&mut self) {
        self.flushes += 1;
    }

    fn enumerate_map(&self) -> Vec<(i32, RawFd)> {
        self.map.iter().map(|(&guest, &real)| (guest, real)).collect()
    }
}

/// Address space that maps nothing and counts teardown calls.
#[derive(Debug, Default)]
pub struct MockAddressSpace {
    pub requests: Vec<MapRequest>,
    pub releases: usize,
    pub break_resets: usize,
    program_break: Option<usize>,
}

impl MockAddressSpace {
    pub fn new() -> Self {
        Self::default()
    }
}

impl AddressSpace for MockAddressSpace {
    fn map(&mut self, request: MapRequest) -> Result<usize, Errno> {
        self.requests.push(request);
        Ok(request.addr.unwrap_or(0x4000_0000))
    }

    fn protect(&mut self, _addr: usize, _len: usize, _prot: i32) -> Result<(), Errno> {
        Ok(())
    }

    fn set_program_break(&mut self, addr: usize) {
        self.program_break = Some(addr);
    }

    fn program_break(&self) -> Option<usize> {
        self.program_break
    }

    fn release_all_mappings(&mut self) {
        self.releases += 1;
    }

    fn reset_program_break(&mut self) {
        self.break_resets += 1;
        self.program_break = None;
    }
}

/// Host paths with a configurable current-directory node.
#[derive(Debug)]
pub struct MockVfs {
    cwd: CwdNode,
}

impl MockVfs {
    pub fn virtual_cwd() -> Self {
        Self { cwd: CwdNode::Virtual }
    }

    pub fn host_cwd(fd: RawFd) -> Self {
        Self { cwd: CwdNode::Host(fd) }
    }
}

impl Vfs for MockVfs {
    fn open_file(&self, path: &CStr) -> Result<OwnedFd, Errno> {
        HostVfs::new().open_file(path)
    }

    fn cwd_node(&self) -> CwdNode {
        self.cwd
    }
}

/// An image that records its loads in a log shared with its loader.
#[derive(Debug, Clone)]
pub struct MockImage {
    path: CString,
    interpreter: Option<CString>,
    entry: usize,
    phdr: usize,
    phent: usize,
    phnum: usize,
    load_error: Option<Errno>,
    panic_on_load: bool,
    log: Rc<RefCell<Vec<CString>>>,
}

impl MockImage {
    pub fn new(path: &CStr, entry: usize) -> Self {
        Self {
            path: path.to_owned(),
            interpreter: None,
            entry,
            phdr: entry & !0xfff,
            phent: 56,
            phnum: 1,
            load_error: None,
            panic_on_load: false,
            log: Rc::default(),
        }
    }

    pub fn with_interpreter(mut self, interpreter: &CStr) -> Self {
        self.interpreter = Some(interpreter.to_owned());
        self
    }

    pub fn with_program_headers(mut self, phdr: usize, phent: usize, phnum: usize) -> Self {
        self.phdr = phdr;
        self.phent = phent;
        self.phnum = phnum;
        self
    }

    pub fn failing_load(mut self, errno: Errno) -> Self {
        self.load_error = Some(errno);
        self
    }

    pub fn panicking_load(mut self) -> Self {
        self.panic_on_load = true;
        self
    }
}

impl GuestImage for MockImage {
    fn path(&self) -> &CStr {
        &self.path
    }

    fn interpreter(&self) -> Option<&CStr> {
        self.interpreter.as_deref()
    }

    fn load(&mut self, memory: &mut dyn AddressSpace) -> Result<(), Errno> {
        if self.panic_on_load {
            panic!("load of {:?} panicked", self.path);
        }
        if let Some(errno) = self.load_error {
            return Err(errno);
        }
        self.log.borrow_mut().push(self.path.clone());
        memory.set_program_break(self.entry + 0x1000);
        Ok(())
    }

    fn entrypoint(&self) -> usize {
        self.entry
    }

    fn program_header_table(&self) -> usize {
        self.phdr
    }

    fn program_header_size(&self) -> usize {
        self.phent
    }

    fn program_header_count(&self) -> usize {
        self.phnum
    }
}

/// Hands out clones of registered images by path.
#[derive(Debug, Default)]
pub struct MockLoader {
    images: HashMap<CString, MockImage>,
    opened: RefCell<Vec<CString>>,
    loaded: Rc<RefCell<Vec<CString>>>,
}

impl MockLoader {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_image(mut self, mut image: MockImage) -> Self {
        image.log = Rc::clone(&self.loaded);
        self.images.insert(image.path.clone(), image);
        self
    }

    /// Paths passed to `open`, in order.
    pub fn opened(&self) -> Vec<CString> {
        self.opened.borrow().clone()
    }

    /// Paths of images loaded so far, in order.
    pub fn loaded(&self) -> Vec<CString> {
        self.loaded.borrow().clone()
    }
}

impl ImageLoader for MockLoader {
    fn open(&self, _vfs: &dyn Vfs, path: &CStr) -> Result<Box<dyn GuestImage>, Errno> {
        self.opened.borrow_mut().push(path.to_owned());
        match self.images.get(path) {
            Some(image) => Ok(Box::new(image.clone())),
            None => Err(Errno::ENOENT),
        }
    }
}

/// A host pipe as `(read end, write end)`.
pub fn pipe() -> (OwnedFd, OwnedFd) {
    let mut fds = [0; 2];
    assert_eq!(unsafe { libc::pipe(fds.as_mut_ptr()) }, 0);
    unsafe { (OwnedFd::from_raw_fd(fds[0]), OwnedFd::from_raw_fd(fds[1])) }
}

/// A temporary file holding `bytes`, and its path.
pub fn temp_file(bytes: &[u8]) -> (NamedTempFile, CString) {
    let mut file = NamedTempFile::new().unwrap();
    file.write_all(bytes).unwrap();
    let path = CString::new(file.path().to_str().unwrap()).unwrap();
    (file, path)
}

/// A 64-bit image of type `e_type` whose single read+exec `PT_LOAD` maps the
/// whole file at `vaddr`. `code` follows the headers and is the entrypoint.
pub fn elf_program(e_type: u16, vaddr: u64, code: &[u8]) -> Vec<u8> {
    let code_offset = EHDR64_SIZE + PHDR64_SIZE;
    let file_len = code_offset + code.len();
    let mut image = vec![0u8; file_len];
    image[..4].copy_from_slice(&ELFMAG);
    image[4] = ELFCLASS64;
    image[5] = ELFDATA2LSB;
    image[6] = EV_CURRENT as u8;
    image[16..18].copy_from_slice(&e_type.to_le_bytes());
    image[18..20].copy_from_slice(&NATIVE_MACHINE.to_le_bytes());
    image[20..24].copy_from_slice(&EV_CURRENT.to_le_bytes());
    image[24..32].copy_from_slice(&vaddr.wrapping_add(code_offset as u64).to_le_bytes());
    image[32..40].copy_from_slice(&(EHDR64_SIZE as u64).to_le_bytes());
    image[52..54].copy_from_slice(&(EHDR64_SIZE as u16).to_le_bytes());
    image[54..56].copy_from_slice(&(PHDR64_SIZE as u16).to_le_bytes());
    image[56..58].copy_from_slice(&1u16.to_le_bytes());

    let ph = EHDR64_SIZE;
    image[ph..ph + 4].copy_from_slice(&PT_LOAD.to_le_bytes());
    image[ph + 4..ph + 8].copy_from_slice(&(PF_R | PF_X).to_le_bytes());
    image[ph + 16..ph + 24].copy_from_slice(&vaddr.to_le_bytes());
    image[ph + 32..ph + 40].copy_from_slice(&(file_len as u64).to_le_bytes());
    image[ph + 40..ph + 48].copy_from_slice(&(file_len as u64).to_le_bytes());
    image[code_offset..].copy_from_slice(code);
    image
}

/// Run `child` in a forked process and return its exit status. A child
/// that returns exits with 99, one that panics with 98.
pub fn exit_status_of(child: impl FnOnce()) -> i32 {
    let pid = unsafe { libc::fork() };
    assert!(pid >= 0, "fork failed");
    if pid == 0 {
        let outcome = std::panic::catch_unwind(std::panic::AssertUnwindSafe(child));
        unsafe { libc::_exit(if outcome.is_ok() { 99 } else { 98 }) };
    }
    let mut status = 0;
    assert_eq!(unsafe { libc::waitpid(pid, &mut status, 0) }, pid);
    assert!(libc::WIFEXITED(status), "child did not exit normally: {:#x}", status);
    libc::WEXITSTATUS(status)
}

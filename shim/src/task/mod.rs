//! Task module.
//!
//! The process context: everything about the running guest process that is
//! replaced, not mutated, at an exec boundary. One [`Process`] exists per
//! host process and is passed by reference to every exec-path operation.

pub mod elf_loader;
pub mod image;
pub mod local;

use std::ffi::{CStr, CString};
use std::sync::Arc;

use crate::abi::linux::stack::StackRegion;
use crate::sync::{RecursiveGuard, RecursiveLock};

pub use image::{GuestImage, ImageLoader, ImagePair};
pub use local::LocalStorage;

pub struct Process {
    lock: Arc<RecursiveLock>,
    images: Option<ImagePair>,
    arguments: Vec<CString>,
    environment: Vec<CString>,
    local: LocalStorage,
    generation: u64,
    /// Startup stacks handed to guest images, oldest first. The newest one
    /// may be the stack of the image that is calling exec.
    startup_stacks: Vec<StackRegion>,
}

impl Process {
    pub fn new() -> Self {
        Self {
            lock: RecursiveLock::new(),
            images: None,
            arguments: Vec::new(),
            environment: Vec::new(),
            local: LocalStorage::new(),
            generation: 0,
            startup_stacks: Vec::new(),
        }
    }

    /// Take the process lock. Re-entrant on the same thread.
    pub fn lock(&self) -> RecursiveGuard {
        self.lock.lock()
    }

    pub fn lock_handle(&self) -> Arc<RecursiveLock> {
        Arc::clone(&self.lock)
    }

    /// Start a fresh per-process lifetime: a new lock (holders of the old
    /// one belong to the replaced image) and empty process-local storage.
    pub fn reinit(&mut self) {
        self.lock = RecursiveLock::new();
        self.local.reset();
    }

    /// Copy argument and environment vectors into process-owned storage.
    pub fn snapshot_vectors(&mut self, argv: &[&CStr], envp: &[&CStr]) {
        self.arguments = argv.iter().map(|&arg| arg.to_owned()).collect();
        self.environment = envp.iter().map(|&env| env.to_owned()).collect();
    }

    /// Detach the current images so the caller can release them.
    pub fn take_images(&mut self) -> Option<ImagePair> {
        self.images.take()
    }

    /// Make `images` current. Any pair still installed is dropped.
    pub fn install_images(&mut self, images: ImagePair) {
        self.generation += 1;
        self.images = Some(images);
    }

    pub fn images(&self) -> Option<&ImagePair> {
        self.images.as_ref()
    }

    pub fn images_mut(&mut self) -> Option<&mut ImagePair> {
        self.images.as_mut()
    }

    pub fn arguments(&self) -> &[CString] {
        &self.arguments
    }

    pub fn environment(&self) -> &[CString] {
        &self.environment
    }

    pub fn local_storage(&self) -> &LocalStorage {
        &self.local
    }

    pub fn local_storage_mut(&mut self) -> &mut LocalStorage {
        &mut self.local
    }

    /// Number of images committed over this process's lifetime.
    pub fn generation(&self) -> u64 {
        self.generation
    }

    pub fn retain_startup_stack(&mut self, region: StackRegion) {
        self.startup_stacks.push(region);
    }

    /// Unmap every retained startup stack except the newest.
    pub fn release_stale_stacks(&mut self) {
        let stale = self.startup_stacks.len().saturating_sub(1);
        for region in self.startup_stacks.drain(..stale) {
            region.unmap();
        }
    }

    pub fn startup_stacks(&self) -> &[StackRegion] {
        &self.startup_stacks
    }
}

impl Default for Process {
    fn default() -> Self {
        Self::new()
    }
}

/// End the host process immediately, without unwinding or running
/// destructors of an image that no longer exists.
pub fn terminate(status: i32) -> ! {
    log::logger().flush();
    // SAFETY: _exit has no preconditions.
    unsafe { libc::_exit(status) }
}

//! Guest-image execution path
//!
//! `execve` of a Linux ELF image, in three stages:
//!
//! 1. [`prepare`] opens and validates the image and its interpreter. Nothing
//!    about the running process changes, so failures return to the caller.
//! 2. [`commit`] tears the old image down and builds the new one. There is
//!    no image to return to after its first step.
//! 3. [`Launch::enter`] transfers control.
//!
//! [`exec_guest`] runs all three and turns a commit failure into process
//! termination.

use std::convert::Infallible;
use std::ffi::{CStr, CString};
use std::fmt;
use std::panic::{self, AssertUnwindSafe};

use crate::abi::linux::auxv::AuxVector;
use crate::abi::linux::errno::Errno;
use crate::abi::linux::stack::{self, StackRegion};
use crate::abi::linux::transfer;
use crate::environment::{EXIT_EXEC_FAILED, STACK_SIZE};
use crate::executor::ExecEnv;
use crate::host::Vfs;
use crate::task::{self, ImageLoader, ImagePair, Process};

/// Failure after the commit point. Always fatal to the process.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CommitError {
    Load { path: CString, errno: Errno },
    Stack(Errno),
}

impl fmt::Display for CommitError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            CommitError::Load { path, errno } => write!(f, "failed to load {:?}: {}", path, errno),
            CommitError::Stack(errno) => write!(f, "failed to build startup stack: {}", errno),
        }
    }
}

/// A fully built image, ready to run.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Launch {
    pub entry: usize,
    pub stack_pointer: usize,
}

impl Launch {
    /// Start the image.
    ///
    /// # Safety
    ///
    /// Must come from a successful [`commit`]; the calling image is gone
    /// once this runs.
    pub unsafe fn enter(self) -> ! {
        log::debug!("exec: entering {:#x} with sp {:#x}", self.entry, self.stack_pointer);
        log::logger().flush();
        unsafe { transfer::enter(self.entry, self.stack_pointer) }
    }
}

/// Open and validate `path` and, if it names one, its interpreter.
pub fn prepare(vfs: &dyn Vfs, loader: &dyn ImageLoader, path: &CStr) -> Result<ImagePair, Errno> {
    let executable = loader.open(vfs, path)?;
    let interpreter = match executable.interpreter().map(CStr::to_owned) {
        Some(interpreter_path) => {
            log::debug!("exec: {:?} requests interpreter {:?}", path, interpreter_path);
            Some(loader.open(vfs, &interpreter_path)?)
        }
        None => None,
    };
    Ok(ImagePair { executable, interpreter })
}

/// Replace the process image with `images`.
///
/// Runs under the process lock. The caller's `argv`/`envp` may live in the
/// mappings released here, so they are copied into the process first.
pub fn commit(
    process: &mut Process,
    env: &mut ExecEnv<'_>,
    mut images: ImagePair,
    argv: &[&CStr],
    envp: &[&CStr],
) -> Result<Launch, CommitError> {
    let lock = process.lock_handle();
    let _guard = lock.lock();

    process.snapshot_vectors(argv, envp);
    env.memory.release_all_mappings();
    env.memory.reset_program_break();
    env.fds.flush();
    drop(process.take_images());

    // The interpreter is loaded first so the executable's break wins.
    if let Some(interpreter) = images.interpreter.as_mut() {
        interpreter.load(env.memory).map_err(|errno| CommitError::Load {
            path: interpreter.path().to_owned(),
            errno,
        })?;
    }
    images.executable.load(env.memory).map_err(|errno| CommitError::Load {
        path: images.executable.path().to_owned(),
        errno,
    })?;
    let entry = images.transfer_entrypoint();
    let auxv = AuxVector::for_executable(images.executable.as_ref());
    process.install_images(images);

    process.reinit();

    process.release_stale_stacks();
    let region = StackRegion::map(STACK_SIZE).map_err(CommitError::Stack)?;
    process.retain_startup_stack(region);
    let words = stack::build(process.arguments(), process.environment(), &auxv);
    let stack_pointer = region.place(&words).map_err(CommitError::Stack)?;

    Ok(Launch { entry, stack_pointer })
}

/// `execve` of a guest image. Returns only if the image was rejected before
/// anything was torn down.
pub fn exec_guest(
    process: &mut Process,
    env: &mut ExecEnv<'_>,
    path: &CStr,
    argv: &[&CStr],
    envp: &[&CStr],
) -> Result<Infallible, Errno> {
    let images = prepare(env.vfs, env.loader, path)?;
    // Past this point there is no image to unwind into.
    let committed = panic::catch_unwind(AssertUnwindSafe(|| commit(process, env, images, argv, envp)));
    match committed {
        // SAFETY: the launch was just built by commit.
        Ok(Ok(launch)) => unsafe { launch.enter() },
        Ok(Err(error)) => {
            log::error!("exec: {:?}: {}", path, error);
            task::terminate(EXIT_EXEC_FAILED)
        }
        Err(_) => {
            log::error!("exec: {:?}: panicked while building the new image", path);
            task::terminate(EXIT_EXEC_FAILED)
        }
    }
}

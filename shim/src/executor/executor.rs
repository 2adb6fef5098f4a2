//! Executor implementation
//!
//! Probing and dispatch. Format-specific work lives with the ABI that owns
//! the format.

use std::convert::Infallible;
use std::ffi::CStr;
use std::fmt;

use crate::abi::host::exec::exec_native;
use crate::abi::linux::errno::Errno;
use crate::abi::linux::exec::exec_guest;
use crate::task::Process;

use super::ExecEnv;
use super::probe::{ImageFormat, probe};

/// Errors that can occur during exec
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ExecutorError {
    /// Binary format not recognized
    UnknownBinaryFormat,
    /// The target or its interpreter could not be opened or validated
    Image(Errno),
    /// The host refused the native image replacement
    Host(Errno),
}

impl ExecutorError {
    pub fn errno(&self) -> Errno {
        match self {
            ExecutorError::UnknownBinaryFormat => Errno::ENOEXEC,
            ExecutorError::Image(errno) | ExecutorError::Host(errno) => *errno,
        }
    }
}

impl fmt::Display for ExecutorError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ExecutorError::UnknownBinaryFormat => write!(f, "Unknown binary format"),
            ExecutorError::Image(errno) => write!(f, "Image rejected: {}", errno),
            ExecutorError::Host(errno) => write!(f, "Host exec failed: {}", errno),
        }
    }
}

impl From<ExecutorError> for Errno {
    fn from(error: ExecutorError) -> Self {
        error.errno()
    }
}

/// Result type for executor operations
pub type ExecutorResult<T> = Result<T, ExecutorError>;

/// Exec dispatcher.
pub struct Executor;

impl Executor {
    /// Replace the calling process image with `path`.
    ///
    /// Never returns on success. Every error returned here leaves the
    /// calling image running; failures after the guest path's commit point
    /// terminate the process instead.
    pub fn exec(
        process: &mut Process,
        env: &mut ExecEnv<'_>,
        path: &CStr,
        argv: &[&CStr],
        envp: &[&CStr],
    ) -> ExecutorResult<Infallible> {
        let format = probe(env.vfs, path).map_err(ExecutorError::Image)?;
        log::debug!("executor: {:?} probed as {:?}", path, format);
        match format {
            ImageFormat::Guest => exec_guest(process, env, path, argv, envp).map_err(ExecutorError::Image),
            ImageFormat::HostNative => exec_native(process, env, path, argv, envp).map_err(ExecutorError::Host),
            ImageFormat::Unknown => Err(ExecutorError::UnknownBinaryFormat),
        }
    }
}

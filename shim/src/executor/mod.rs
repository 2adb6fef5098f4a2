//! Executor Module
//!
//! Entry point for process-image replacement. The executor probes the
//! target, then hands it to the execution path for its format:
//!
//! - guest ELF images go to [`crate::abi::linux::exec`]
//! - host-native images go to [`crate::abi::host::exec`]
//! - anything else fails with "no such executable format"
//!
//! Both execution paths end the calling image on success, so the result
//! type of [`Executor::exec`] has no success value.

pub mod executor;
pub mod probe;

use crate::environment::Config;
use crate::host::{AddressSpace, DescriptorTranslator, HostOps, Vfs};
use crate::task::ImageLoader;

pub use executor::{Executor, ExecutorError, ExecutorResult};
pub use probe::{ImageFormat, classify, probe};

/// The collaborators an exec runs against.
pub struct ExecEnv<'a> {
    pub vfs: &'a dyn Vfs,
    pub loader: &'a dyn ImageLoader,
    pub fds: &'a mut dyn DescriptorTranslator,
    pub memory: &'a mut dyn AddressSpace,
    pub host: &'a mut dyn HostOps,
    pub config: &'a Config,
}

#[cfg(test)]
mod tests;

//! Linux ABI
//!
//! The guest-visible syscall surface of one process. [`LinuxAbi`] owns the
//! process context and the collaborators every handler runs against; the
//! syscall table for the running architecture lives in [`syscall`].

#[macro_use]
mod macros;
pub mod auxv;
pub mod errno;
pub mod exec;
pub mod poll;
pub mod stack;
pub mod syscall;
pub mod transfer;

use std::convert::Infallible;
use std::ffi::CStr;

use crate::abi::{AbiModule, SyscallArgs};
use crate::environment::Config;
use crate::executor::{ExecEnv, Executor, ExecutorResult};
use crate::host::{AddressSpace, DescriptorTranslator, FdTable, HostOps, HostVfs, MappingTracker, PosixHost, Vfs};
use crate::task::elf_loader::ElfLoader;
use crate::task::{ImageLoader, Process};

use errno::Errno;

pub struct LinuxAbi {
    process: Process,
    fds: Box<dyn DescriptorTranslator>,
    vfs: Box<dyn Vfs>,
    memory: Box<dyn AddressSpace>,
    loader: Box<dyn ImageLoader>,
    host: Box<dyn HostOps>,
    config: Config,
}

impl LinuxAbi {
    /// An ABI over the default collaborators: standard streams mapped
    /// one-to-one and the host's current directory as the guest's.
    pub fn new(config: Config) -> Self {
        let vfs = HostVfs::with_host_cwd(c".").unwrap_or_else(|errno| {
            log::warn!("linux: host cwd unavailable ({}), guest cwd is virtual", errno);
            HostVfs::new()
        });
        Self::with_collaborators(
            config,
            Box::new(FdTable::with_std_fds()),
            Box::new(vfs),
            Box::new(MappingTracker::new()),
            Box::new(ElfLoader),
            Box::new(PosixHost),
        )
    }

    pub fn with_collaborators(
        config: Config,
        fds: Box<dyn DescriptorTranslator>,
        vfs: Box<dyn Vfs>,
        memory: Box<dyn AddressSpace>,
        loader: Box<dyn ImageLoader>,
        host: Box<dyn HostOps>,
    ) -> Self {
        Self {
            process: Process::new(),
            fds,
            vfs,
            memory,
            loader,
            host,
            config,
        }
    }

    pub fn process(&self) -> &Process {
        &self.process
    }

    pub fn process_mut(&mut self) -> &mut Process {
        &mut self.process
    }

    pub fn config(&self) -> &Config {
        &self.config
    }

    /// Replace the process image. Returns only on failure.
    pub fn exec(&mut self, path: &CStr, argv: &[&CStr], envp: &[&CStr]) -> ExecutorResult<Infallible> {
        let mut env = ExecEnv {
            vfs: self.vfs.as_ref(),
            loader: self.loader.as_ref(),
            fds: self.fds.as_mut(),
            memory: self.memory.as_mut(),
            host: self.host.as_mut(),
            config: &self.config,
        };
        Executor::exec(&mut self.process, &mut env, path, argv, envp)
    }
}

impl AbiModule for LinuxAbi {
    fn name() -> &'static str {
        "linux"
    }

    fn handle_syscall(&mut self, args: &SyscallArgs) -> Result<usize, Errno> {
        syscall::syscall_handler(self, args)
    }
}

use crate::abi::linux::errno::Errno;

pub mod host;
pub mod linux;

/// Register snapshot of one trapped guest syscall.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct SyscallArgs {
    pub number: usize,
    pub args: [usize; 6],
}

impl SyscallArgs {
    pub fn new(number: usize, args: [usize; 6]) -> Self {
        Self { number, args }
    }

    pub fn get_arg(&self, index: usize) -> usize {
        self.args.get(index).copied().unwrap_or(0)
    }
}

/// ABI module trait.
///
/// An ABI module owns the guest-visible syscall surface of one process:
/// it decodes a trapped syscall, runs the handler and produces the value
/// for the guest's return register (or the error to encode there).
pub trait AbiModule {
    fn name() -> &'static str
    where
        Self: Sized;

    fn handle_syscall(&mut self, args: &SyscallArgs) -> Result<usize, Errno>;
}

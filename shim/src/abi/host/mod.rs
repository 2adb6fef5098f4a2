//! Host-native images
//!
//! Programs built for the host itself are not loaded by the shim: the host's
//! own `execve` replaces the process. Before that, the host descriptor table
//! is rearranged so the new image sees the guest's descriptor numbering.

pub mod exec;
pub mod relocate;

pub use exec::exec_native;
pub use relocate::{FdOp, RelocationPlan, Source};

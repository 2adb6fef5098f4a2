//! Process-state transfer
//!
//! Hands the CPU to a freshly loaded image. Contract, per the Linux
//! process-startup ABI:
//!
//! - the stack pointer is the startup-stack address (it addresses `argc`)
//! - every general-purpose register is zero; in particular the register
//!   carrying an exit-handler pointer (`rdx`/`edx`) is null
//! - control reaches `entry` by a `ret`, as if `entry` had been called with
//!   nothing but the startup stack
//!
//! Nothing after the jump runs in the caller's context.

use crate::environment::EXIT_TRANSFER_RETURNED;

/// Jump to `entry` on `stack_pointer`.
///
/// # Safety
///
/// `entry` must be the entrypoint of a loaded image and `stack_pointer` a
/// startup stack built for it. The calling image's state is abandoned.
#[cfg(target_arch = "x86_64")]
pub unsafe fn enter(entry: usize, stack_pointer: usize) -> ! {
    unsafe {
        core::arch::asm!(
            "mov rsp, {sp}",
            "push {entry}",
            "xor eax, eax",
            "xor ebx, ebx",
            "xor ecx, ecx",
            "xor edx, edx",
            "xor esi, esi",
            "xor edi, edi",
            "xor ebp, ebp",
            "xor r8d, r8d",
            "xor r9d, r9d",
            "xor r10d, r10d",
            "xor r11d, r11d",
            "xor r12d, r12d",
            "xor r13d, r13d",
            "xor r14d, r14d",
            "xor r15d, r15d",
            "ret",
            sp = in(reg) stack_pointer,
            entry = in(reg) entry,
            options(noreturn),
        )
    }
}

/// Jump to `entry` on `stack_pointer`.
///
/// # Safety
///
/// See the x86_64 variant.
#[cfg(target_arch = "x86")]
pub unsafe fn enter(entry: usize, stack_pointer: usize) -> ! {
    unsafe {
        core::arch::asm!(
            "mov esp, {sp}",
            "push {entry}",
            "xor eax, eax",
            "xor ebx, ebx",
            "xor ecx, ecx",
            "xor edx, edx",
            "xor esi, esi",
            "xor edi, edi",
            "xor ebp, ebp",
            "ret",
            sp = in(reg) stack_pointer,
            entry = in(reg) entry,
            options(noreturn),
        )
    }
}

/// No transfer sequence for this architecture: the image can never start.
///
/// # Safety
///
/// Always safe; the process terminates.
#[cfg(not(any(target_arch = "x86_64", target_arch = "x86")))]
pub unsafe fn enter(entry: usize, stack_pointer: usize) -> ! {
    log::error!(
        "transfer: unsupported architecture (entry {:#x}, sp {:#x})",
        entry,
        stack_pointer
    );
    returned()
}

/// Reached only if a transfer came back.
pub fn returned() -> ! {
    log::error!("transfer: control returned from guest entrypoint");
    crate::task::terminate(EXIT_TRANSFER_RETURNED)
}

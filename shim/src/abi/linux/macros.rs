/// Define the syscall table and dispatcher for the Linux ABI
///
/// # Example
/// ```ignore
/// syscall_table! {
///    Poll = 7 => handle_poll,
///    Execve = 59 => handle_execve,
/// }
/// ```
macro_rules! syscall_table {
    ( $( $name:ident = $num:literal => $func:expr ),* $(,)? ) => {
        #[derive(Debug, Clone, Copy, PartialEq, Eq)]
        pub enum Syscall {
            $(
                $name = $num,
            )*
        }

        impl Syscall {
            pub fn number(self) -> usize {
                self as usize
            }

            pub fn from_number(number: usize) -> Option<Self> {
                match number {
                    $(
                        $num => Some(Syscall::$name),
                    )*
                    _ => None,
                }
            }
        }

        /// Syscall handler
        ///
        /// # Arguments
        /// * `abi` - The process's ABI state
        /// * `args` - The trapped syscall
        ///
        /// # Errors
        /// `ENOSYS` for numbers outside the table, otherwise whatever the
        /// handler reports
        pub fn syscall_handler(abi: &mut LinuxAbi, args: &SyscallArgs) -> Result<usize, Errno> {
            match args.number {
                $(
                    $num => $func(abi, args),
                )*
                _ => {
                    log::debug!("linux: unimplemented syscall {}", args.number);
                    Err(Errno::ENOSYS)
                }
            }
        }
    };
}

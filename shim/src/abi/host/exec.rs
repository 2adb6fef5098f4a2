//! Native-image execution path.

use std::convert::Infallible;
use std::ffi::CStr;

use crate::abi::linux::errno::Errno;
use crate::executor::ExecEnv;
use crate::host::CwdNode;
use crate::task::Process;

use super::relocate::RelocationPlan;

/// Move the host process into the guest's working directory, or the
/// configured fallback when the guest directory has no host counterpart.
fn enter_working_directory(env: &mut ExecEnv<'_>) -> Result<(), Errno> {
    if let CwdNode::Host(fd) = env.vfs.cwd_node() {
        match env.host.fchdir(fd) {
            Ok(()) => return Ok(()),
            Err(errno) => log::warn!("exec: fchdir to guest cwd (real fd {}) failed: {}", fd, errno),
        }
    }
    env.host.chdir(&env.config.fallback_cwd)
}

/// `execve` of a host-native image.
///
/// Failures before the descriptor table is touched leave the process as it
/// was. Once relocation has started it is not undone: a later failure
/// leaves host descriptors in the guest's numbering.
pub fn exec_native(
    process: &Process,
    env: &mut ExecEnv<'_>,
    path: &CStr,
    argv: &[&CStr],
    envp: &[&CStr],
) -> Result<Infallible, Errno> {
    enter_working_directory(env)?;

    let _guard = process.lock();
    env.fds.flush();
    let map = env.fds.enumerate_map();
    let plan = RelocationPlan::new(&map);
    log::debug!("exec: {:?} native, {} descriptor ops", path, plan.ops().len());
    if let Err(errno) = plan.apply(env.host) {
        log::warn!("exec: descriptor relocation for {:?} failed: {}", path, errno);
        return Err(errno);
    }

    let errno = env.host.execve(path, argv, envp);
    log::debug!("exec: host execve of {:?} failed: {}", path, errno);
    Err(errno)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::environment::Config;
    use crate::mock::{HostCall, MockAddressSpace, MockLoader, MockTranslator, MockVfs, RecordingHost};

    fn run(vfs: &MockVfs, fds: &mut MockTranslator, host: &mut RecordingHost, config: &Config) -> Result<Infallible, Errno> {
        let loader = MockLoader::new();
        let mut memory = MockAddressSpace::new();
        let mut env = ExecEnv {
            vfs,
            loader: &loader,
            fds,
            memory: &mut memory,
            host,
            config,
        };
        exec_native(&Process::new(), &mut env, c"/host/bin/tool", &[c"tool", c"-q"], &[c"TERM=dumb"])
    }

    #[test]
    fn test_native_exec_sequence() {
        let vfs = MockVfs::host_cwd(9);
        let mut fds = MockTranslator::new(&[(0, 0), (1, 1), (3, 5), (5, 3)]);
        let mut host = RecordingHost::new();
        host.execve_errno = Errno::EACCES;

        let result = run(&vfs, &mut fds, &mut host, &Config::default());
        assert_eq!(result.err(), Some(Errno::EACCES));
        assert_eq!(fds.flushes, 1);

        let copy = RecordingHost::FIRST_DUP;
        assert_eq!(
            host.calls,
            vec![
                HostCall::Fchdir(9),
                HostCall::DupAbove { fd: 3, floor: 6 },
                HostCall::Dup2 { fd: 5, target: 3 },
                HostCall::Dup2 { fd: copy, target: 5 },
                HostCall::Close(copy),
                HostCall::Execve {
                    path: c"/host/bin/tool".to_owned(),
                    argv: vec![c"tool".to_owned(), c"-q".to_owned()],
                    envp: vec![c"TERM=dumb".to_owned()],
                },
            ]
        );
    }

    #[test]
    fn test_virtual_cwd_uses_fallback() {
        let vfs = MockVfs::virtual_cwd();
        let mut fds = MockTranslator::new(&[(0, 0)]);
        let mut host = RecordingHost::new();
        let config = Config {
            fallback_cwd: c"/srv".to_owned(),
            ..Config::default()
        };

        run(&vfs, &mut fds, &mut host, &config).unwrap_err();
        assert_eq!(host.calls[0], HostCall::Chdir(c"/srv".to_owned()));
        assert!(matches!(host.calls[1], HostCall::Execve { .. }));
    }

    #[test]
    fn test_failed_fchdir_falls_back() {
        let vfs = MockVfs::host_cwd(9);
        let mut fds = MockTranslator::new(&[]);
        let mut host = RecordingHost::new();
        host.fail_fchdir = true;

        run(&vfs, &mut fds, &mut host, &Config::default()).unwrap_err();
        assert_eq!(&host.calls[..2], &[HostCall::Fchdir(9), HostCall::Chdir(c"/".to_owned())]);
    }

    #[test]
    fn test_chdir_failure_leaves_descriptors_alone() {
        let vfs = MockVfs::virtual_cwd();
        let mut fds = MockTranslator::new(&[(3, 7)]);
        let mut host = RecordingHost::new();
        host.fail_chdir = true;

        assert_eq!(run(&vfs, &mut fds, &mut host, &Config::default()).err(), Some(Errno::ENOENT));
        assert_eq!(fds.flushes, 0);
        assert_eq!(host.calls, vec![HostCall::Chdir(c"/".to_owned())]);
    }

    #[test]
    fn test_relocation_failure_is_reported() {
        let vfs = MockVfs::virtual_cwd();
        let mut fds = MockTranslator::new(&[(3, 7)]);
        let mut host = RecordingHost::new();
        host.fail_dup2_target = Some(3);

        assert_eq!(run(&vfs, &mut fds, &mut host, &Config::default()).err(), Some(Errno::EBADF));
        assert!(!host.calls.iter().any(|call| matches!(call, HostCall::Execve { .. })));
    }
}

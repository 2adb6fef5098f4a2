use std::ffi::CString;

use super::*;
use crate::abi::linux::errno::Errno;
use crate::environment::Config;
use crate::host::HostVfs;
use crate::mock::{HostCall, MockAddressSpace, MockLoader, MockTranslator, MockVfs, RecordingHost, temp_file};
use crate::task::Process;
use crate::task::elf_loader::ElfLoader;

#[test]
fn test_classify() {
    assert_eq!(classify(b"\x7FELF\x02\x01"), ImageFormat::Guest);
    assert_eq!(classify(b"MZ\x90\x00"), ImageFormat::HostNative);
    assert_eq!(classify(b"\x7FEL"), ImageFormat::Unknown);
    assert_eq!(classify(b"M"), ImageFormat::Unknown);
    assert_eq!(classify(b""), ImageFormat::Unknown);
}

#[test]
fn test_probe_files() {
    let vfs = HostVfs::new();
    let cases: [(&[u8], ImageFormat); 4] = [
        (b"\x7FELF\x02\x01\x01\x00", ImageFormat::Guest),
        (b"MZ", ImageFormat::HostNative),
        (b"#!/bin/sh\n", ImageFormat::Unknown),
        (b"", ImageFormat::Unknown),
    ];
    for (bytes, expected) in cases {
        let (_file, path) = temp_file(bytes);
        assert_eq!(probe(&vfs, &path), Ok(expected), "{:?}", bytes);
    }
}

#[test]
fn test_probe_missing_file() {
    let result = probe(&HostVfs::new(), c"/nonexistent/vermilion/probe");
    assert_eq!(result, Err(Errno::ENOENT));
}

#[test]
fn test_executor_error_mapping() {
    assert_eq!(ExecutorError::UnknownBinaryFormat.errno(), Errno::ENOEXEC);
    assert_eq!(Errno::from(ExecutorError::Host(Errno::EACCES)), Errno::EACCES);
    assert_eq!(ExecutorError::Image(Errno::ENOENT).errno(), Errno::ENOENT);
    assert_eq!(ExecutorError::UnknownBinaryFormat.to_string(), "Unknown binary format");
}

struct Fixture {
    vfs: MockVfs,
    fds: MockTranslator,
    memory: MockAddressSpace,
    host: RecordingHost,
    config: Config,
}

impl Fixture {
    fn new() -> Self {
        Self {
            vfs: MockVfs::virtual_cwd(),
            fds: MockTranslator::new(&[(0, 0), (1, 1), (2, 2)]),
            memory: MockAddressSpace::new(),
            host: RecordingHost::new(),
            config: Config::default(),
        }
    }

    fn exec(&mut self, loader: &dyn crate::task::ImageLoader, path: &CString) -> ExecutorResult<std::convert::Infallible> {
        let mut env = ExecEnv {
            vfs: &self.vfs,
            loader,
            fds: &mut self.fds,
            memory: &mut self.memory,
            host: &mut self.host,
            config: &self.config,
        };
        Executor::exec(&mut Process::new(), &mut env, path, &[c"target"], &[c"HOME=/"])
    }
}

#[test]
fn test_exec_unknown_format() {
    let (_file, path) = temp_file(b"plain text\n");
    let mut fixture = Fixture::new();
    let loader = MockLoader::new();

    let result = fixture.exec(&loader, &path);
    assert_eq!(result.err(), Some(ExecutorError::UnknownBinaryFormat));
    assert!(loader.opened().is_empty());
    assert!(fixture.host.calls.is_empty());
    assert_eq!(fixture.fds.flushes, 0);
}

#[test]
fn test_exec_missing_target() {
    let mut fixture = Fixture::new();
    let path = c"/nonexistent/vermilion/exec".to_owned();
    let result = fixture.exec(&MockLoader::new(), &path);
    assert_eq!(result.err(), Some(ExecutorError::Image(Errno::ENOENT)));
}

#[test]
fn test_exec_native_dispatch() {
    let (_file, path) = temp_file(b"MZ\x90\x00\x03\x00");
    let mut fixture = Fixture::new();

    let result = fixture.exec(&MockLoader::new(), &path);
    assert_eq!(result.err(), Some(ExecutorError::Host(Errno::ENOENT)));
    assert_eq!(fixture.fds.flushes, 1);
    assert_eq!(fixture.memory.releases, 0);
    match fixture.host.calls.last() {
        Some(HostCall::Execve { path: called, argv, envp }) => {
            assert_eq!(called, &path);
            assert_eq!(argv, &vec![c"target".to_owned()]);
            assert_eq!(envp, &vec![c"HOME=/".to_owned()]);
        }
        other => panic!("expected execve, got {:?}", other),
    }
}

#[test]
fn test_exec_malformed_guest_is_recoverable() {
    // ELF magic followed by garbage
    let (_file, path) = temp_file(b"\x7FELF\xff\xff\xff\xff");
    let mut fixture = Fixture::new();

    let result = fixture.exec(&ElfLoader, &path);
    assert_eq!(result.err(), Some(ExecutorError::Image(Errno::ENOEXEC)));
    assert_eq!(fixture.fds.flushes, 0);
    assert_eq!(fixture.memory.releases, 0);
    assert_eq!(fixture.memory.break_resets, 0);
    assert!(fixture.host.calls.is_empty());
}

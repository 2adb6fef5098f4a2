//! Executable prober.
//!
//! Classifies a file by its first bytes. Nothing about the process changes
//! here; the file is only opened and read.

use std::ffi::CStr;
use std::fs::File;
use std::os::unix::fs::FileExt;

use crate::abi::linux::errno::Errno;
use crate::host::Vfs;

/// Guest ELF identification.
pub const ELF_MAGIC: [u8; 4] = [0x7F, b'E', b'L', b'F'];
/// Host-native executable identification.
pub const NATIVE_MAGIC: [u8; 2] = [b'M', b'Z'];

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ImageFormat {
    /// Linux ELF image, run by the guest path
    Guest,
    /// Host-native image, handed to the host's execve
    HostNative,
    Unknown,
}

pub fn classify(magic: &[u8]) -> ImageFormat {
    if magic.starts_with(&ELF_MAGIC) {
        ImageFormat::Guest
    } else if magic.starts_with(&NATIVE_MAGIC) {
        ImageFormat::HostNative
    } else {
        ImageFormat::Unknown
    }
}

/// Open `path` and classify it. A file that cannot be opened fails with the
/// open error; one that cannot be read is `Unknown`.
pub fn probe(vfs: &dyn Vfs, path: &CStr) -> Result<ImageFormat, Errno> {
    let file = File::from(vfs.open_file(path)?);
    let mut magic = [0u8; ELF_MAGIC.len()];
    let mut filled = 0;
    while filled < magic.len() {
        match file.read_at(&mut magic[filled..], filled as u64) {
            Ok(0) => break,
            Ok(n) => filled += n,
            Err(error) if error.kind() == std::io::ErrorKind::Interrupted => continue,
            Err(error) => {
                log::debug!("probe: read of {:?} failed: {}", path, error);
                return Ok(ImageFormat::Unknown);
            }
        }
    }
    Ok(classify(&magic[..filled]))
}

use std::ffi::CString;

use log::LevelFilter;

pub const PAGE_SIZE: usize = 0x1000; // 4KB
pub const STACK_SIZE: usize = 0x100000; // 1MB startup stack for a guest image
pub const FD_SETSIZE: usize = libc::FD_SETSIZE as usize;
pub const WORD_SIZE: usize = core::mem::size_of::<usize>();

/// Exit status when an exec fails after the old image was torn down
pub const EXIT_EXEC_FAILED: i32 = 1;
/// Exit status when the control transfer to a guest entrypoint comes back
pub const EXIT_TRANSFER_RETURNED: i32 = 127;

const LOG_VAR: &str = "VERMILION_LOG";
const FALLBACK_CWD_VAR: &str = "VERMILION_FALLBACK_CWD";

/// Runtime configuration, read once from the host environment.
#[derive(Debug, Clone)]
pub struct Config {
    pub log_level: LevelFilter,
    /// Host directory entered by the native exec path when the virtual
    /// working directory has no host counterpart.
    pub fallback_cwd: CString,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            log_level: LevelFilter::Warn,
            fallback_cwd: c"/".to_owned(),
        }
    }
}

impl Config {
    pub fn from_env() -> Self {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Build a config from an arbitrary variable lookup. Unparsable values
    /// keep their defaults.
    pub fn from_lookup<F>(lookup: F) -> Self
    where
        F: Fn(&str) -> Option<String>,
    {
        let mut config = Self::default();
        if let Some(level) = lookup(LOG_VAR).and_then(|v| v.parse::<LevelFilter>().ok()) {
            config.log_level = level;
        }
        if let Some(cwd) = lookup(FALLBACK_CWD_VAR) {
            match CString::new(cwd) {
                Ok(cwd) if !cwd.as_bytes().is_empty() => config.fallback_cwd = cwd,
                _ => {}
            }
        }
        config
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_config_defaults() {
        let config = Config::from_lookup(|_| None);
        assert_eq!(config.log_level, LevelFilter::Warn);
        assert_eq!(config.fallback_cwd.as_bytes(), b"/");
    }

    #[test]
    fn test_config_overrides() {
        let config = Config::from_lookup(|key| match key {
            "VERMILION_LOG" => Some("trace".to_string()),
            "VERMILION_FALLBACK_CWD" => Some("/tmp".to_string()),
            _ => None,
        });
        assert_eq!(config.log_level, LevelFilter::Trace);
        assert_eq!(config.fallback_cwd.as_bytes(), b"/tmp");
    }

    #[test]
    fn test_config_rejects_garbage() {
        let config = Config::from_lookup(|key| match key {
            "VERMILION_LOG" => Some("loud".to_string()),
            "VERMILION_FALLBACK_CWD" => Some("bad\0path".to_string()),
            _ => None,
        });
        assert_eq!(config.log_level, LevelFilter::Warn);
        assert_eq!(config.fallback_cwd.as_bytes(), b"/");
    }
}

//! Output file naming for benchmark trials.
//!
//! Every trial writes `bs * count` bytes to a file inside the target
//! directory. Two naming policies exist:
//! - **Unique**: a fresh random name per trial, so every trial lands on
//!   new file-system extents (disk usage grows with each trial).
//! - **Reuse**: one fixed name per directory, so each trial overwrites the
//!   previous trial's file (disk usage stays bounded).

use std::path::{Path, PathBuf};

use rand::Rng;
use serde::Deserialize;

/// Prefix used for benchmark output files.
pub const FILE_PREFIX: &str = "test_file_";

/// Suffix used for benchmark output files.
pub const FILE_SUFFIX: &str = ".tmp";

/// Fixed file name used by [`FilePolicy::Reuse`].
pub const REUSED_FILE_NAME: &str = "test_file.tmp";

/// Number of random bytes in a unique file name token.
const TOKEN_BYTES: usize = 16;

/// How trial output files are named.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Deserialize, clap::ValueEnum)]
#[serde(rename_all = "snake_case")]
pub enum FilePolicy {
    /// Allocate a fresh random file name for every trial.
    #[default]
    Unique,
    /// Overwrite one fixed file per directory.
    Reuse,
}

impl FilePolicy {
    /// Output path for the next trial written into `dir`.
    pub fn output_path(&self, dir: &Path) -> PathBuf {
        match self {
            Self::Unique => temp_file_name(dir, FILE_PREFIX, FILE_SUFFIX),
            Self::Reuse => dir.join(REUSED_FILE_NAME),
        }
    }
}

/// Build `dir/<prefix><32 hex chars><suffix>`.
///
/// The token comes from the thread-local CSPRNG. No file is created and
/// the file system is not consulted; uniqueness is probabilistic.
pub fn temp_file_name(dir: &Path, prefix: &str, suffix: &str) -> PathBuf {
    let mut token = [0u8; TOKEN_BYTES];
    rand::rng().fill(&mut token);
    dir.join(format!("{}{}{}", prefix, hex::encode(token), suffix))
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashSet;

    #[test]
    fn test_temp_file_name_shape() {
        let dir = Path::new("/mnt/disk");
        let path = temp_file_name(dir, "test_file_", ".tmp");

        assert_eq!(path.parent(), Some(dir));
        let name = path.file_name().unwrap().to_str().unwrap();
        assert!(name.starts_with("test_file_"));
        assert!(name.ends_with(".tmp"));

        let token = &name["test_file_".len()..name.len() - ".tmp".len()];
        assert_eq!(token.len(), TOKEN_BYTES * 2);
        assert!(token.chars().all(|c| c.is_ascii_hexdigit()));
    }

    #[test]
    fn test_temp_file_name_does_not_touch_disk() {
        let dir = tempfile::tempdir().unwrap();
        let path = temp_file_name(dir.path(), "x", ".y");
        assert!(!path.exists());
        assert_eq!(std::fs::read_dir(dir.path()).unwrap().count(), 0);
    }

    #[test]
    fn test_unique_policy_never_repeats() {
        let dir = Path::new("/tmp");
        let names: HashSet<PathBuf> = (0..1000)
            .map(|_| FilePolicy::Unique.output_path(dir))
            .collect();
        assert_eq!(names.len(), 1000);
    }

    #[test]
    fn test_reuse_policy_is_stable() {
        let dir = Path::new("/data");
        let first = FilePolicy::Reuse.output_path(dir);
        let second = FilePolicy::Reuse.output_path(dir);
        assert_eq!(first, second);
        assert_eq!(first, PathBuf::from("/data/test_file.tmp"));
    }

    #[test]
    fn test_policy_parses_from_toml() {
        #[derive(Deserialize)]
        struct Wrapper {
            policy: FilePolicy,
        }
        let parsed: Wrapper = toml::from_str("policy = \"reuse\"").unwrap();
        assert_eq!(parsed.policy, FilePolicy::Reuse);
        assert_eq!(FilePolicy::default(), FilePolicy::Unique);
    }
}

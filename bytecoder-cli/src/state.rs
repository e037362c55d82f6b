// bytecoder-cli/src/state.rs

use std::collections::BTreeMap;
use std::fs;
use std::io;
use std::path::Path;

use serde::{Deserialize, Serialize};
use sha2::Digest;

pub const STATE_FILE_NAME: &str = ".bytecoder-state.json";

/// What happened to an input since the previous build.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Status {
    Added,
    Changed,
    NotChanged,
    Removed,
}

/// Content hashes of the inputs of one build, keyed by `/`-separated
/// relative path.
#[derive(Debug, Default, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BuildState {
    /// Digest of the settings the outputs were produced with.
    #[serde(default)]
    pub settings: String,
    pub files: BTreeMap<String, String>,
}

impl BuildState {
    /// Loads the state left in `output_dir` by the previous build.
    ///
    /// A missing or corrupt state file yields an empty state, which turns
    /// the build into a full one.
    pub fn load(output_dir: &Path) -> io::Result<Self> {
        let path = output_dir.join(STATE_FILE_NAME);
        let json = match fs::read_to_string(&path) {
            Ok(json) => json,
            Err(err) if err.kind() == io::ErrorKind::NotFound => return Ok(Self::default()),
            Err(err) => return Err(err),
        };
        match serde_json::from_str(&json) {
            Ok(state) => Ok(state),
            Err(err) => {
                breadcrumbs::log!(
                    breadcrumbs::LogLevel::Warn,
                    "build",
                    format!("Ignoring corrupt {}: {err}", path.display())
                );
                Ok(Self::default())
            }
        }
    }

    pub fn save(&self, output_dir: &Path) -> io::Result<()> {
        let json = serde_json::to_string_pretty(self)
            .map_err(|err| io::Error::new(io::ErrorKind::InvalidData, err))?;
        crate::write_atomically(&output_dir.join(STATE_FILE_NAME), json.as_bytes())
    }

    pub fn record(&mut self, relative_path: &str, contents: &[u8]) {
        self.files.insert(relative_path.to_string(), digest(contents));
    }

    /// Classifies every path of `self` (the previous build) and `current`.
    pub fn classify(&self, current: &BuildState) -> Vec<(String, Status)> {
        let mut changes: Vec<(String, Status)> = current
            .files
            .iter()
            .map(|(path, hash)| {
                let status = match self.files.get(path) {
                    None => Status::Added,
                    Some(previous) if previous == hash => Status::NotChanged,
                    Some(_) => Status::Changed,
                };
                (path.clone(), status)
            })
            .collect();
        changes.extend(
            self.files
                .keys()
                .filter(|path| !current.files.contains_key(*path))
                .map(|path| (path.clone(), Status::Removed)),
        );
        changes.sort_by(|(a, _), (b, _)| a.cmp(b));
        changes
    }
}

/// Hex SHA-256 of `contents`.
pub fn digest(contents: &[u8]) -> String {
    let mut hasher = sha2::Sha256::new();
    hasher.update(contents);
    format!("{:x}", hasher.finalize())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn state(files: &[(&str, &str)]) -> BuildState {
        let mut state = BuildState::default();
        for (path, contents) in files {
            state.record(path, contents.as_bytes());
        }
        state
    }

    #[test]
    fn classifies_against_previous_build() {
        let previous = state(&[("a/A.class", "one"), ("a/B.class", "two"), ("C.class", "x")]);
        let current = state(&[("a/A.class", "one"), ("a/B.class", "three"), ("D.txt", "d")]);
        assert_eq!(
            previous.classify(&current),
            vec![
                ("C.class".to_string(), Status::Removed),
                ("D.txt".to_string(), Status::Added),
                ("a/A.class".to_string(), Status::NotChanged),
                ("a/B.class".to_string(), Status::Changed),
            ]
        );
    }

    #[test]
    fn empty_previous_state_adds_everything() {
        let current = state(&[("A.class", "a")]);
        assert_eq!(
            BuildState::default().classify(&current),
            vec![("A.class".to_string(), Status::Added)]
        );
    }

    #[test]
    fn state_survives_save_and_load() {
        let dir = tempfile::tempdir().unwrap();
        let saved = state(&[("A.class", "a")]);
        saved.save(dir.path()).unwrap();
        assert_eq!(BuildState::load(dir.path()).unwrap(), saved);
    }

    #[test]
    fn corrupt_state_is_ignored() {
        let dir = tempfile::tempdir().unwrap();
        fs::write(dir.path().join(STATE_FILE_NAME), "{not json").unwrap();
        assert_eq!(BuildState::load(dir.path()).unwrap(), BuildState::default());
    }

    #[test]
    fn digest_is_hex_sha256() {
        assert_eq!(
            digest(b"abc"),
            "ba7816bf8f01cfea414140de5dae2223b00361a396177a9cb410ff61f20015ad"
        );
    }
}

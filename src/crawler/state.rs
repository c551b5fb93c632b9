//! Cycle state persisted between crawler slices so a restart resumes at the
//! next prefix rather than restarting the cycle from scratch.

use std::{
    io,
    path::{Path, PathBuf},
};

use serde::{Deserialize, Serialize};
use snafu::{ResultExt, Snafu};

#[derive(Debug, Snafu)]
pub enum StateError {
    #[snafu(display("crawler state I/O error at {}: {}", path.display(), source))]
    Io { path: PathBuf, source: io::Error },

    #[snafu(display("crawler state at {} is not valid JSON: {}", path.display(), source))]
    Decode {
        path: PathBuf,
        source: serde_json::Error,
    },
}

type Result<T, E = StateError> = std::result::Result<T, E>;

#[derive(Clone, Debug, Default, Serialize, Deserialize, PartialEq, Eq)]
pub struct CrawlerState {
    /// Wall-clock time the most recent full cycle finished; `None` until
    /// the first full cycle completes.
    pub last_cycle_finished: Option<u64>,
    /// Index into the prefix list of the next prefix to process.
    pub cursor: usize,
    /// Wall-clock time the current (in-progress) cycle started.
    pub cycle_started_at: Option<u64>,
}

impl CrawlerState {
    pub fn load(path: &Path) -> Result<Self> {
        match std::fs::read(path) {
            Ok(bytes) => serde_json::from_slice(&bytes).context(DecodeSnafu {
                path: path.to_path_buf(),
            }),
            Err(e) if e.kind() == io::ErrorKind::NotFound => Ok(Self::default()),
            Err(source) => Err(StateError::Io {
                path: path.to_path_buf(),
                source,
            }),
        }
    }

    /// Writes the state via write-temp-then-rename, matching the account
    /// attribute persistence discipline in spec.md §6.
    pub fn save(&self, path: &Path) -> Result<()> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent).context(IoSnafu {
                path: path.to_path_buf(),
            })?;
        }
        let tmp_path = path.with_extension("tmp");
        let bytes = serde_json::to_vec_pretty(self).expect("CrawlerState always serializes");
        std::fs::write(&tmp_path, bytes).context(IoSnafu {
            path: tmp_path.clone(),
        })?;
        std::fs::rename(&tmp_path, path).context(IoSnafu {
            path: path.to_path_buf(),
        })?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn missing_state_file_loads_as_default() {
        let dir = tempfile::tempdir().unwrap();
        let state = CrawlerState::load(&dir.path().join("state.json")).unwrap();
        assert_eq!(state, CrawlerState::default());
    }

    #[test]
    fn round_trips_through_save_and_load() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("state.json");
        let state = CrawlerState {
            last_cycle_finished: Some(1_000),
            cursor: 42,
            cycle_started_at: Some(900),
        };
        state.save(&path).unwrap();
        assert_eq!(CrawlerState::load(&path).unwrap(), state);
        assert!(!path.with_extension("tmp").exists());
    }
}

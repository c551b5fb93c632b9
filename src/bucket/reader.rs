//! Bucket reader: stateless random-access reads of a committed share.

use std::path::PathBuf;

use snafu::{ResultExt, Snafu};

use crate::{
    container::{ContainerError, ShareContainer},
    ShareNumber, StorageIndex,
};

#[derive(Debug, Snafu)]
pub enum ReaderError {
    #[snafu(display("bucket reader container error: {}", source))]
    Container { source: ContainerError },
}

type Result<T, E = ReaderError> = std::result::Result<T, E>;

/// A reason a client believes a share is corrupted, forwarded to the server
/// for an advisory keyed by `(share_type, storage_index, shnum)`.
#[derive(Clone, Debug, serde::Serialize, serde::Deserialize)]
pub struct CorruptionAdvisory {
    pub share_type: String,
    pub storage_index: StorageIndex,
    pub shnum: ShareNumber,
    pub reason: String,
}

/// Reads of a committed share file. Carries no write operations.
pub struct BucketReader {
    storage_index: StorageIndex,
    shnum: ShareNumber,
    path: PathBuf,
}

impl BucketReader {
    /// Opens the committed share at `path`. The caller is expected to have
    /// already confirmed commit happened (i.e. this is only ever called
    /// against paths under `shares/<pp>/...`, never `shares/incoming/...`).
    pub fn open(storage_index: StorageIndex, shnum: ShareNumber, path: PathBuf) -> Result<Self> {
        // Validate the header eagerly so `UnknownContainerVersion` surfaces
        // at open time rather than on the first read.
        ShareContainer::open(&path).context(ContainerSnafu)?;
        Ok(Self {
            storage_index,
            shnum,
            path,
        })
    }

    pub fn storage_index(&self) -> &StorageIndex {
        &self.storage_index
    }

    pub fn shnum(&self) -> ShareNumber {
        self.shnum
    }

    /// Reads `length` bytes of payload starting at `offset`, delegating to
    /// the underlying container.
    pub fn read(&self, offset: u64, length: usize) -> Result<Vec<u8>> {
        let mut container = ShareContainer::open(&self.path).context(ContainerSnafu)?;
        container.read(offset, length).context(ContainerSnafu)
    }

    /// Builds a corruption advisory for the transport to forward to the
    /// server; this type does not itself deliver it (the RPC transport is
    /// out of scope).
    pub fn advise_corrupt_share(&self, share_type: &str, reason: &str) -> CorruptionAdvisory {
        warn!(
            storage_index = %self.storage_index,
            shnum = self.shnum,
            reason,
            "client reported possible share corruption"
        );
        CorruptionAdvisory {
            share_type: share_type.to_string(),
            storage_index: self.storage_index.clone(),
            shnum: self.shnum,
            reason: reason.to_string(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn reads_committed_payload() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("0");
        let mut container = ShareContainer::create(&path, 64).unwrap();
        container.write(0, b"payload").unwrap();
        drop(container);

        let reader = BucketReader::open("si".to_string(), 0, path).unwrap();
        assert_eq!(reader.read(0, 7).unwrap(), b"payload");
    }

    #[test]
    fn open_rejects_bad_version() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("0");
        std::fs::write(&path, [0, 0, 0, 7, 0, 0, 0, 0, 0, 0, 0, 0]).unwrap();
        assert!(BucketReader::open("si".to_string(), 0, path).is_err());
    }
}

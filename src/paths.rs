//! On-disk path layout for shares and accounts.
//!
//! ```text
//! <base>/shares/incoming/<pp>/<storage_index>/<shnum>   (staging)
//! <base>/shares/<pp>/<storage_index>/<shnum>            (committed)
//! <base>/accounts/<pubkey_string>/...
//! ```

use std::path::{Path, PathBuf};

use crate::{ShareNumber, StorageIndex};

/// Returns the two-character directory-sharding prefix of a storage index.
///
/// # Panics
///
/// Panics if `storage_index` is shorter than two characters; callers are
/// expected to validate storage index shape before reaching this layer.
pub fn prefix_of(storage_index: &StorageIndex) -> &str {
    &storage_index[..2]
}

/// Root-relative layout for a single storage server's share corpus.
#[derive(Clone, Debug)]
pub struct ShareLayout {
    base: PathBuf,
}

impl ShareLayout {
    pub fn new<P: Into<PathBuf>>(base: P) -> Self {
        Self { base: base.into() }
    }

    pub fn base(&self) -> &Path {
        &self.base
    }

    /// Directory holding every committed storage index under a prefix.
    pub fn prefix_dir(&self, prefix: &str) -> PathBuf {
        self.base.join("shares").join(prefix)
    }

    /// Directory holding one storage index's committed shares.
    pub fn storage_index_dir(&self, storage_index: &StorageIndex) -> PathBuf {
        self.prefix_dir(prefix_of(storage_index)).join(storage_index)
    }

    /// Path of one committed share file.
    pub fn share_path(&self, storage_index: &StorageIndex, shnum: ShareNumber) -> PathBuf {
        self.storage_index_dir(storage_index).join(shnum.to_string())
    }

    /// Directory holding every staged storage index under a prefix.
    pub fn incoming_prefix_dir(&self, prefix: &str) -> PathBuf {
        self.base.join("shares").join("incoming").join(prefix)
    }

    /// Directory holding one storage index's staged shares.
    pub fn incoming_storage_index_dir(&self, storage_index: &StorageIndex) -> PathBuf {
        self.incoming_prefix_dir(prefix_of(storage_index))
            .join(storage_index)
    }

    /// Path of one staged (not-yet-committed) share file.
    pub fn incoming_share_path(&self, storage_index: &StorageIndex, shnum: ShareNumber) -> PathBuf {
        self.incoming_storage_index_dir(storage_index)
            .join(shnum.to_string())
    }

    /// Root directory for per-account scalar attribute files.
    pub fn accounts_dir(&self) -> PathBuf {
        self.base.join("accounts")
    }

    /// Directory for one account's attribute files, keyed by its public-key
    /// string identifier.
    pub fn account_dir(&self, pubkey_string: &str) -> PathBuf {
        self.accounts_dir().join(pubkey_string)
    }

    /// Path to the lease database directory.
    pub fn leasedb_dir(&self) -> PathBuf {
        self.base.join("leasedb")
    }
}

/// The 32 hex-ish base alphabet used by storage indices is opaque to this
/// crate; we only ever slice its first two characters.
pub const PREFIX_WIDTH: usize = 2;

#[cfg(test)]
mod tests {
    use super::*;

    fn si() -> StorageIndex {
        "ab".to_string() + &"c".repeat(24)
    }

    #[test]
    fn prefix_is_first_two_chars() {
        assert_eq!(prefix_of(&si()), "ab");
    }

    #[test]
    fn share_path_layout() {
        let layout = ShareLayout::new("/base");
        let storage_index = si();
        assert_eq!(
            layout.share_path(&storage_index, 3),
            Path::new("/base/shares/ab").join(&storage_index).join("3")
        );
        assert_eq!(
            layout.incoming_share_path(&storage_index, 3),
            Path::new("/base/shares/incoming/ab")
                .join(&storage_index)
                .join("3")
        );
    }

    #[test]
    fn account_dir_layout() {
        let layout = ShareLayout::new("/base");
        assert_eq!(
            layout.account_dir("pub-v0-abc"),
            Path::new("/base/accounts/pub-v0-abc")
        );
    }
}

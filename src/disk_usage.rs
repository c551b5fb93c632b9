//! Disk-usage measurement used only for accounting display, never for quota
//! enforcement.

use std::{fs::Metadata, path::Path};

/// Returns `st_blocks * 512` when the filesystem exposes block counts,
/// falling back to `st_size` otherwise (e.g. on platforms without a
/// `blocks()` accessor).
pub fn size_of_disk_file(path: &Path) -> std::io::Result<u64> {
    let metadata = std::fs::metadata(path)?;
    Ok(size_of_metadata(&metadata))
}

#[cfg(unix)]
fn size_of_metadata(metadata: &Metadata) -> u64 {
    use std::os::unix::fs::MetadataExt;
    metadata.blocks() * 512
}

#[cfg(not(unix))]
fn size_of_metadata(metadata: &Metadata) -> u64 {
    metadata.len()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn measures_an_existing_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("f");
        std::fs::write(&path, vec![0u8; 5000]).unwrap();
        let size = size_of_disk_file(&path).unwrap();
        assert!(size >= 5000);
    }
}

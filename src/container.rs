//! Share container: the on-disk binary layout of a single immutable share.
//!
//! ```text
//! offset 0   u32 big-endian   version (must be 1)
//! offset 4   u32 big-endian   data_length_hint (saturated, informational)
//! offset 8   u32 big-endian   num_leases (always written as 0)
//! offset 12  ..               payload
//! ```
//!
//! There is no trailer. Legacy lease records that may follow the payload in
//! historical files are not parsed; reads past end-of-payload return
//! whatever bytes are present.

use std::{
    fs::{File, OpenOptions},
    io::{self, Read, Seek, SeekFrom, Write},
    path::{Path, PathBuf},
};

use snafu::{ResultExt, Snafu};

/// Size in bytes of the share container header.
pub const HEADER_LEN: u64 = 12;

/// The only header version this implementation understands.
pub const CONTAINER_VERSION: u32 = 1;

/// Error that occurred while creating, opening, reading, or writing a share
/// container.
#[derive(Debug, Snafu)]
pub enum ContainerError {
    /// A general I/O error occurred.
    #[snafu(display("share container I/O error at {}: {}", path.display(), source))]
    Io { path: PathBuf, source: io::Error },

    /// `create` was called against a path that already has a file.
    #[snafu(display("share container already exists at {}", path.display()))]
    AlreadyExists { path: PathBuf },

    /// `open` read a header whose version field was not 1.
    #[snafu(display(
        "share container at {} has unknown version {} (expected {})",
        path.display(),
        found,
        CONTAINER_VERSION
    ))]
    UnknownVersion { path: PathBuf, found: u32 },

    /// A write would place bytes past the container's declared maximum size.
    #[snafu(display(
        "write of {} bytes at offset {} would exceed max_size {} for {}",
        len,
        offset,
        max_size,
        path.display()
    ))]
    DataTooLarge {
        path: PathBuf,
        offset: u64,
        len: usize,
        max_size: u64,
    },
}

type Result<T, E = ContainerError> = std::result::Result<T, E>;

/// A single immutable share's header + payload region.
///
/// Writes are permitted only while the container is held by a
/// [`BucketWriter`](crate::bucket::writer::BucketWriter) in the staging
/// state; once committed, a container is only ever opened for reads.
pub struct ShareContainer {
    file: File,
    path: PathBuf,
    max_size: u64,
}

impl ShareContainer {
    /// Creates a new staged share container at `path`.
    ///
    /// Fails with [`ContainerError::AlreadyExists`] if a file already exists
    /// there. Creates parent directories as needed.
    pub fn create(path: impl AsRef<Path>, max_size: u64) -> Result<Self> {
        let path = path.as_ref().to_path_buf();
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent).context(IoSnafu { path: path.clone() })?;
        }

        let mut file = OpenOptions::new()
            .write(true)
            .read(true)
            .create_new(true)
            .open(&path)
            .map_err(|source| {
                if source.kind() == io::ErrorKind::AlreadyExists {
                    ContainerError::AlreadyExists { path: path.clone() }
                } else {
                    ContainerError::Io {
                        path: path.clone(),
                        source,
                    }
                }
            })?;

        let hint = max_size.min(u64::from(u32::MAX)) as u32;
        let mut header = [0u8; HEADER_LEN as usize];
        header[0..4].copy_from_slice(&CONTAINER_VERSION.to_be_bytes());
        header[4..8].copy_from_slice(&hint.to_be_bytes());
        header[8..12].copy_from_slice(&0u32.to_be_bytes());
        file.write_all(&header)
            .context(IoSnafu { path: path.clone() })?;

        Ok(Self {
            file,
            path,
            max_size,
        })
    }

    /// Opens an existing share container, validating its header version.
    pub fn open(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref().to_path_buf();
        let mut file = OpenOptions::new()
            .read(true)
            .write(true)
            .open(&path)
            .context(IoSnafu { path: path.clone() })?;

        let mut header = [0u8; HEADER_LEN as usize];
        file.read_exact(&mut header)
            .context(IoSnafu { path: path.clone() })?;
        let version = u32::from_be_bytes(header[0..4].try_into().expect("4 bytes"));
        if version != CONTAINER_VERSION {
            return Err(ContainerError::UnknownVersion {
                path,
                found: version,
            });
        }

        let len = file
            .metadata()
            .context(IoSnafu { path: path.clone() })?
            .len();
        let max_size = len.saturating_sub(HEADER_LEN);

        Ok(Self {
            file,
            path,
            max_size,
        })
    }

    /// Absolute path of this container's file on disk.
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// The size the writer originally allocated for this share.
    pub fn max_size(&self) -> u64 {
        self.max_size
    }

    /// Reads `length` bytes of payload starting at `offset`, truncated at
    /// end-of-file. An offset past EOF yields an empty vector.
    pub fn read(&mut self, offset: u64, length: usize) -> Result<Vec<u8>> {
        let abs_offset = HEADER_LEN + offset;
        self.file
            .seek(SeekFrom::Start(abs_offset))
            .context(IoSnafu {
                path: self.path.clone(),
            })?;

        let mut buf = vec![0u8; length];
        let mut filled = 0;
        loop {
            match self.file.read(&mut buf[filled..]) {
                Ok(0) => break,
                Ok(n) => filled += n,
                Err(e) if e.kind() == io::ErrorKind::Interrupted => continue,
                Err(source) => {
                    return Err(ContainerError::Io {
                        path: self.path.clone(),
                        source,
                    })
                }
            }
            if filled == buf.len() {
                break;
            }
        }
        buf.truncate(filled);
        Ok(buf)
    }

    /// Writes `data` into the payload region at absolute offset `offset`.
    ///
    /// Fails with [`ContainerError::DataTooLarge`] when
    /// `offset + data.len() > max_size`. Random-access: writes at
    /// non-contiguous offsets are permitted.
    pub fn write(&mut self, offset: u64, data: &[u8]) -> Result<()> {
        let end = offset
            .checked_add(data.len() as u64)
            .unwrap_or(u64::MAX);
        if end > self.max_size {
            return Err(ContainerError::DataTooLarge {
                path: self.path.clone(),
                offset,
                len: data.len(),
                max_size: self.max_size,
            });
        }

        let abs_offset = HEADER_LEN + offset;
        self.file
            .seek(SeekFrom::Start(abs_offset))
            .context(IoSnafu {
                path: self.path.clone(),
            })?;
        self.file
            .write_all(data)
            .context(IoSnafu {
                path: self.path.clone(),
            })?;
        Ok(())
    }

    /// Flushes buffered writes to the OS.
    pub fn flush(&mut self) -> Result<()> {
        self.file.flush().context(IoSnafu {
            path: self.path.clone(),
        })
    }

    /// Current on-disk length of the file, header included.
    pub fn file_len(&self) -> Result<u64> {
        Ok(self
            .file
            .metadata()
            .context(IoSnafu {
                path: self.path.clone(),
            })?
            .len())
    }
}

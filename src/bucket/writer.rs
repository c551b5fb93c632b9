//! Bucket writer: staged ingestion of one share with atomic commit/abort.
//!
//! State machine (initial state `Open`):
//!
//! | From | Event | To | Action |
//! |---|---|---|---|
//! | Open | write | Open | forward to staged container |
//! | Open | close | Committed | rename staged → final; best-effort rmdir of parent & grandparent |
//! | Open | abort | Aborted | unlink staged; best-effort rmdir of parent |
//! | Open | peer disconnect | Aborted | same as abort |
//! | Committed, Aborted | any | — | rejected |

use std::{
    io,
    path::PathBuf,
    sync::Arc,
};

use parking_lot::Mutex;
use snafu::{ensure, ResultExt, Snafu};

use crate::{container::{ContainerError, ShareContainer}, ShareNumber, StorageIndex};

use super::canary::DisconnectCanary;

#[derive(Debug, Snafu)]
pub enum WriterError {
    #[snafu(display("bucket writer container error: {}", source))]
    Container { source: ContainerError },

    #[snafu(display("bucket writer I/O error: {}", source))]
    Io { source: io::Error },

    #[snafu(display("bucket writer for ({}, {}) is already {:?}", storage_index, shnum, state))]
    AlreadyFinished {
        storage_index: StorageIndex,
        shnum: ShareNumber,
        state: WriterState,
    },
}

type Result<T, E = WriterError> = std::result::Result<T, E>;

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum WriterState {
    Open,
    Committed,
    Aborted,
}

/// Information about a successfully committed share, returned by
/// [`BucketWriter::close`] so the caller can register the starter lease.
#[derive(Clone, Debug)]
pub struct CommitInfo {
    pub storage_index: StorageIndex,
    pub shnum: ShareNumber,
    pub final_path: PathBuf,
    pub final_size: u64,
}

struct Inner {
    state: WriterState,
    container: Option<ShareContainer>,
    storage_index: StorageIndex,
    shnum: ShareNumber,
    incoming_path: PathBuf,
    incoming_storage_index_dir: PathBuf,
    incoming_prefix_dir: PathBuf,
    final_path: PathBuf,
    allocated_size: u64,
}

/// A share in the process of being uploaded.
///
/// Cheap to clone: all clones refer to the same underlying staged file and
/// state machine, which is how a disconnect watcher task (see
/// [`BucketWriter::watch_disconnect`]) can race an explicit `close`/`abort`
/// call without either side needing exclusive ownership.
#[derive(Clone)]
pub struct BucketWriter {
    inner: Arc<Mutex<Inner>>,
}

impl BucketWriter {
    /// Allocates a new staged share container at `incoming_path` and begins
    /// the writer's `Open` state.
    #[allow(clippy::too_many_arguments)]
    pub fn create(
        storage_index: StorageIndex,
        shnum: ShareNumber,
        incoming_path: PathBuf,
        incoming_storage_index_dir: PathBuf,
        incoming_prefix_dir: PathBuf,
        final_path: PathBuf,
        allocated_size: u64,
    ) -> Result<Self> {
        let container =
            ShareContainer::create(&incoming_path, allocated_size).context(ContainerSnafu)?;
        Ok(Self {
            inner: Arc::new(Mutex::new(Inner {
                state: WriterState::Open,
                container: Some(container),
                storage_index,
                shnum,
                incoming_path,
                incoming_storage_index_dir,
                incoming_prefix_dir,
                final_path,
                allocated_size,
            })),
        })
    }

    pub fn storage_index(&self) -> StorageIndex {
        self.inner.lock().storage_index.clone()
    }

    pub fn shnum(&self) -> ShareNumber {
        self.inner.lock().shnum
    }

    /// The size this writer was allocated for, independent of bytes
    /// actually written.
    pub fn allocated_size(&self) -> u64 {
        self.inner.lock().allocated_size
    }

    pub fn state(&self) -> WriterState {
        self.inner.lock().state
    }

    /// Writes `data` at `offset` into the staged container.
    ///
    /// Fails without partial effect if the write would exceed
    /// `allocated_size`, or if the writer is no longer `Open`.
    pub fn write(&self, offset: u64, data: &[u8]) -> Result<()> {
        let mut guard = self.inner.lock();
        ensure_open(&guard)?;
        guard
            .container
            .as_mut()
            .expect("container present while Open")
            .write(offset, data)
            .context(ContainerSnafu)
    }

    /// Commits the share: renames staged → final, attempts to remove the
    /// now-possibly-empty staged parent and grandparent directories, and
    /// returns the final file's length for lease registration.
    pub fn close(&self) -> Result<CommitInfo> {
        let mut guard = self.inner.lock();
        ensure_open(&guard)?;

        let mut container = guard.container.take().expect("container present while Open");
        container.flush().context(ContainerSnafu)?;
        let final_size = container.file_len().context(ContainerSnafu)?;
        drop(container);

        if let Some(parent) = guard.final_path.parent() {
            std::fs::create_dir_all(parent).context(IoSnafu)?;
        }
        std::fs::rename(&guard.incoming_path, &guard.final_path).context(IoSnafu)?;

        best_effort_rmdir(&guard.incoming_storage_index_dir);
        best_effort_rmdir(&guard.incoming_prefix_dir);

        guard.state = WriterState::Committed;

        Ok(CommitInfo {
            storage_index: guard.storage_index.clone(),
            shnum: guard.shnum,
            final_path: guard.final_path.clone(),
            final_size,
        })
    }

    /// Aborts the share: unlinks the staged file and best-effort removes
    /// the now-possibly-empty staged parent directory.
    pub fn abort(&self) -> Result<()> {
        let mut guard = self.inner.lock();
        ensure_open(&guard)?;
        self.do_abort(&mut guard)
    }

    /// Used by the disconnect watcher: aborts if still `Open`, silently
    /// no-ops if the writer already finished via the normal path.
    fn abort_for_disconnect(&self) {
        let mut guard = self.inner.lock();
        if guard.state != WriterState::Open {
            return;
        }
        let _ = self.do_abort(&mut guard);
    }

    fn do_abort(&self, guard: &mut Inner) -> Result<()> {
        guard.container = None;
        match std::fs::remove_file(&guard.incoming_path) {
            Ok(()) => {}
            Err(e) if e.kind() == io::ErrorKind::NotFound => {}
            Err(source) => return Err(WriterError::Io { source }),
        }
        best_effort_rmdir(&guard.incoming_storage_index_dir);
        guard.state = WriterState::Aborted;
        Ok(())
    }

    /// Spawns a task that aborts this writer once `canary` fires, unless
    /// the writer has already committed or aborted through the normal path.
    pub fn watch_disconnect(&self, canary: DisconnectCanary) -> tokio::task::JoinHandle<()> {
        let writer = self.clone();
        tokio::spawn(async move {
            canary.cancelled().await;
            writer.abort_for_disconnect();
        })
    }
}

fn ensure_open(inner: &Inner) -> Result<()> {
    ensure!(
        inner.state == WriterState::Open,
        AlreadyFinishedSnafu {
            storage_index: inner.storage_index.clone(),
            shnum: inner.shnum,
            state: inner.state,
        }
    );
    Ok(())
}

/// Best-effort `rmdir`: a non-empty directory (another in-flight share
/// shares the prefix) is left in place. Never recurses.
fn best_effort_rmdir(path: &std::path::Path) {
    match std::fs::remove_dir(path) {
        Ok(()) => {}
        Err(e) if e.kind() == io::ErrorKind::NotFound => {}
        Err(e) if e.raw_os_error() == Some(39) /* ENOTEMPTY */ => {
            debug!(path = %path.display(), "staged directory not empty, leaving in place");
        }
        Err(e) => {
            warn!(path = %path.display(), error = %e, "failed to remove staged directory");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    struct Paths {
        incoming: PathBuf,
        incoming_si_dir: PathBuf,
        incoming_prefix_dir: PathBuf,
        final_path: PathBuf,
        final_si_dir: PathBuf,
        final_prefix_dir: PathBuf,
    }

    fn paths(base: &std::path::Path) -> Paths {
        let incoming_prefix_dir = base.join("shares/incoming/ab");
        let incoming_si_dir = incoming_prefix_dir.join("abcsi");
        let final_prefix_dir = base.join("shares/ab");
        let final_si_dir = final_prefix_dir.join("abcsi");
        Paths {
            incoming: incoming_si_dir.join("0"),
            incoming_si_dir,
            incoming_prefix_dir,
            final_path: final_si_dir.join("0"),
            final_si_dir,
            final_prefix_dir,
        }
    }

    fn make_writer(base: &std::path::Path) -> BucketWriter {
        let p = paths(base);
        let _ = (&p.final_si_dir, &p.final_prefix_dir);
        BucketWriter::create(
            "abcsi".to_string(),
            0,
            p.incoming,
            p.incoming_si_dir,
            p.incoming_prefix_dir,
            p.final_path,
            1024,
        )
        .unwrap()
    }

    #[test]
    fn commit_renames_and_cleans_staging_dirs() {
        let dir = tempfile::tempdir().unwrap();
        let writer = make_writer(dir.path());
        writer.write(0, b"hello").unwrap();
        let info = writer.close().unwrap();
        assert_eq!(info.final_size, 12 + 5);
        assert!(!dir.path().join("shares/incoming/ab/abcsi/0").exists());
        assert!(!dir.path().join("shares/incoming/ab/abcsi").exists());
        assert!(dir.path().join("shares/ab/abcsi/0").exists());
        assert_eq!(writer.state(), WriterState::Committed);
    }

    #[test]
    fn abort_unlinks_staged_file_and_cleans_dir() {
        let dir = tempfile::tempdir().unwrap();
        let writer = make_writer(dir.path());
        writer.write(0, b"hi").unwrap();
        writer.abort().unwrap();
        assert!(!dir.path().join("shares/incoming/ab/abcsi/0").exists());
        assert!(!dir.path().join("shares/incoming/ab/abcsi").exists());
        assert!(!dir.path().join("shares/ab/abcsi/0").exists());
        assert_eq!(writer.state(), WriterState::Aborted);
    }

    #[test]
    fn write_past_allocation_fails_without_partial_effect() {
        let dir = tempfile::tempdir().unwrap();
        let writer = make_writer(dir.path());
        let err = writer.write(1020, b"0123456789").unwrap_err();
        assert!(matches!(err, WriterError::Container { .. }));
    }

    #[test]
    fn operations_after_commit_are_rejected() {
        let dir = tempfile::tempdir().unwrap();
        let writer = make_writer(dir.path());
        writer.close().unwrap();
        assert!(matches!(
            writer.write(0, b"x"),
            Err(WriterError::AlreadyFinished { .. })
        ));
        assert!(matches!(
            writer.close(),
            Err(WriterError::AlreadyFinished { .. })
        ));
    }

    #[test]
    fn busy_sibling_keeps_staged_dirs_after_abort() {
        let dir = tempfile::tempdir().unwrap();
        let p = paths(dir.path());
        std::fs::create_dir_all(&p.incoming_si_dir).unwrap();
        std::fs::write(p.incoming_si_dir.join("1"), b"sibling share").unwrap();
        let writer = make_writer(dir.path());
        writer.abort().unwrap();
        assert!(p.incoming_si_dir.exists(), "sibling share keeps the directory alive");
    }

    #[tokio::test]
    async fn disconnect_before_close_aborts() {
        let dir = tempfile::tempdir().unwrap();
        let writer = make_writer(dir.path());
        let canary = DisconnectCanary::new();
        let handle = writer.watch_disconnect(canary.clone());
        canary.fire();
        handle.await.unwrap();
        assert_eq!(writer.state(), WriterState::Aborted);
    }

    #[tokio::test]
    async fn disconnect_after_close_is_a_no_op() {
        let dir = tempfile::tempdir().unwrap();
        let writer = make_writer(dir.path());
        writer.close().unwrap();
        let canary = DisconnectCanary::new();
        let handle = writer.watch_disconnect(canary.clone());
        canary.fire();
        handle.await.unwrap();
        assert_eq!(writer.state(), WriterState::Committed);
    }
}

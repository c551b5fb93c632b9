//! Account handle: per-account wire operations and persisted attributes.
//!
//! An `Account` is the unit a connected peer holds a strong reference to;
//! the [`crate::accountant::Accountant`] keeps only a [`std::sync::Weak`]
//! pointer so an idle account can be dropped and later re-created without
//! losing its identity (its owner number and on-disk attributes persist
//! independently of the in-memory handle).

use std::{collections::HashMap, path::PathBuf, sync::Arc};

use serde::{Deserialize, Serialize};
use snafu::{ResultExt, Snafu};
use tokio::sync::Mutex as AsyncMutex;

use crate::{
    bucket::{
        canary::DisconnectCanary,
        reader::{CorruptionAdvisory, ReaderError},
        writer::{CommitInfo, WriterError},
        BucketReader, BucketWriter,
    },
    crawler::now_unix,
    leasedb::{LedgerError, LeaseDatabase},
    paths::{prefix_of, ShareLayout},
    OwnerNum, ShareNumber, StorageIndex, STARTER_LEASE_DURATION_SECS,
};

#[derive(Debug, Snafu)]
pub enum AccountError {
    #[snafu(display("account ledger error: {}", source))]
    Ledger { source: LedgerError },

    #[snafu(display("account bucket writer error: {}", source))]
    Writer { source: WriterError },

    #[snafu(display("account bucket reader error: {}", source))]
    Reader { source: ReaderError },

    #[snafu(display("account attribute I/O error at {}: {}", path.display(), source))]
    Io {
        path: PathBuf,
        source: std::io::Error,
    },
}

type Result<T, E = AccountError> = std::result::Result<T, E>;

/// Tagged status reply for `get_status()` (spec.md §9: replaces the
/// original's ad-hoc JSON with a validated shape).
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct AccountStatus {
    pub write: bool,
    pub read: bool,
    pub save: bool,
}

/// Tagged push-message shape for `get_account_message()`.
#[derive(Clone, Debug, Default, Serialize, Deserialize)]
pub struct AccountMessage {
    pub message: String,
    pub extras: HashMap<String, String>,
}

#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct VersionInfo {
    pub version: String,
}

/// A live handle to one account. Cheap to clone: the lease database and
/// share layout are shared, and the attribute files are the durable state.
pub struct Account {
    owner_num: OwnerNum,
    pubkey_string: String,
    layout: ShareLayout,
    leasedb: Arc<AsyncMutex<LeaseDatabase>>,
}

impl Account {
    pub(crate) fn new(
        owner_num: OwnerNum,
        pubkey_string: String,
        layout: ShareLayout,
        leasedb: Arc<AsyncMutex<LeaseDatabase>>,
    ) -> Self {
        Self {
            owner_num,
            pubkey_string,
            layout,
            leasedb,
        }
    }

    pub fn owner_num(&self) -> OwnerNum {
        self.owner_num
    }

    pub fn pubkey_string(&self) -> &str {
        &self.pubkey_string
    }

    fn dir(&self) -> PathBuf {
        self.layout.account_dir(&self.pubkey_string)
    }

    fn write_attribute(&self, name: &str, value: &str) -> Result<()> {
        let dir = self.dir();
        std::fs::create_dir_all(&dir).context(IoSnafu { path: dir.clone() })?;
        let path = dir.join(name);
        let tmp_path = dir.join(format!("{name}.tmp"));
        std::fs::write(&tmp_path, value.as_bytes()).context(IoSnafu {
            path: tmp_path.clone(),
        })?;
        std::fs::rename(&tmp_path, &path).context(IoSnafu { path })?;
        Ok(())
    }

    fn read_attribute(&self, name: &str) -> Result<Option<String>> {
        match std::fs::read_to_string(self.dir().join(name)) {
            Ok(value) => Ok(Some(value)),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(None),
            Err(source) => Err(AccountError::Io {
                path: self.dir().join(name),
                source,
            }),
        }
    }

    pub fn set_nickname(&self, nickname: &str) -> Result<()> {
        self.write_attribute("nickname", nickname)
    }

    pub fn nickname(&self) -> Result<Option<String>> {
        self.read_attribute("nickname")
    }

    pub fn record_created(&self, now: u64) -> Result<()> {
        self.write_attribute("created", &now.to_string())
    }

    pub fn touch_last_seen(&self, now: u64) -> Result<()> {
        self.write_attribute("last_seen", &now.to_string())
    }

    pub fn set_last_connected_from(&self, address: &str) -> Result<()> {
        self.write_attribute("last_connected_from", address)
    }

    /// Shnums with a `shares` row under `storage_index`, found by scanning
    /// the one prefix directory it falls under (never a full-table scan).
    async fn shnums_for_storage_index(&self, storage_index: &StorageIndex) -> Result<Vec<ShareNumber>> {
        let db = self.leasedb.lock().await;
        let shares = db
            .get_shares_for_prefix(prefix_of(storage_index))
            .context(LedgerSnafu)?;
        Ok(shares
            .into_iter()
            .filter(|(si, _)| si == storage_index)
            .map(|(_, shnum)| shnum)
            .collect())
    }

    /// `allocate_buckets` (spec.md §6): for each requested shnum, either the
    /// share already exists (refresh this account's lease on it) or a fresh
    /// [`BucketWriter`] is staged and wired to abort on `canary` firing.
    #[allow(clippy::too_many_arguments)]
    pub async fn allocate_buckets(
        &self,
        storage_index: StorageIndex,
        renew_secret: String,
        cancel_secret: String,
        shnums: Vec<ShareNumber>,
        allocated_size: u64,
        canary: DisconnectCanary,
    ) -> Result<(Vec<ShareNumber>, HashMap<ShareNumber, BucketWriter>)> {
        let existing = {
            let db = self.leasedb.lock().await;
            db.get_shares_for_prefix(prefix_of(&storage_index))
                .context(LedgerSnafu)?
        };

        let mut already_have = Vec::new();
        let mut writers = HashMap::new();
        for shnum in shnums {
            if existing.contains(&(storage_index.clone(), shnum)) {
                let expiration = now_unix() + STARTER_LEASE_DURATION_SECS;
                let mut db = self.leasedb.lock().await;
                db.add_lease(
                    &storage_index,
                    shnum,
                    self.owner_num,
                    expiration,
                    renew_secret.clone(),
                    cancel_secret.clone(),
                )
                .context(LedgerSnafu)?;
                db.commit().context(LedgerSnafu)?;
                already_have.push(shnum);
                continue;
            }

            let writer = BucketWriter::create(
                storage_index.clone(),
                shnum,
                self.layout.incoming_share_path(&storage_index, shnum),
                self.layout.incoming_storage_index_dir(&storage_index),
                self.layout.incoming_prefix_dir(prefix_of(&storage_index)),
                self.layout.share_path(&storage_index, shnum),
                allocated_size,
            )
            .context(WriterSnafu)?;
            writer.watch_disconnect(canary.clone());
            writers.insert(shnum, writer);
        }
        Ok((already_have, writers))
    }

    /// Completes a write: closes the writer, inserts its `shares` row with
    /// the starter lease, then adds this account's own lease under the
    /// secrets it allocated with.
    ///
    /// Registering the share here (rather than waiting for the crawler) is
    /// a sharpening of spec.md §2's "on commit the writer registers the new
    /// share" into an explicit two-step (writer closes; account registers);
    /// the crawler's own `add_share` call is then idempotent against this
    /// one since it only visits `disk_shares \ db_shares`.
    pub async fn finish_write(
        &self,
        writer: &BucketWriter,
        renew_secret: String,
        cancel_secret: String,
    ) -> Result<CommitInfo> {
        let info = writer.close().context(WriterSnafu)?;
        let now = now_unix();
        let mut db = self.leasedb.lock().await;
        db.add_share(
            prefix_of(&info.storage_index),
            &info.storage_index,
            info.shnum,
            info.final_size,
            now,
        )
        .context(LedgerSnafu)?;
        db.add_lease(
            &info.storage_index,
            info.shnum,
            self.owner_num,
            now + STARTER_LEASE_DURATION_SECS,
            renew_secret,
            cancel_secret,
        )
        .context(LedgerSnafu)?;
        db.commit().context(LedgerSnafu)?;
        Ok(info)
    }

    pub async fn add_lease(
        &self,
        storage_index: &StorageIndex,
        renew_secret: String,
        cancel_secret: String,
    ) -> Result<()> {
        let shnums = self.shnums_for_storage_index(storage_index).await?;
        let expiration = now_unix() + STARTER_LEASE_DURATION_SECS;
        let mut db = self.leasedb.lock().await;
        for shnum in shnums {
            db.add_lease(
                storage_index,
                shnum,
                self.owner_num,
                expiration,
                renew_secret.clone(),
                cancel_secret.clone(),
            )
            .context(LedgerSnafu)?;
        }
        db.commit().context(LedgerSnafu)?;
        Ok(())
    }

    pub async fn renew_lease(&self, storage_index: &StorageIndex, renew_secret: &str) -> Result<()> {
        let shnums = self.shnums_for_storage_index(storage_index).await?;
        let expiration = now_unix() + STARTER_LEASE_DURATION_SECS;
        let mut db = self.leasedb.lock().await;
        for shnum in shnums {
            db.renew_lease(storage_index, shnum, self.owner_num, renew_secret, expiration)
                .context(LedgerSnafu)?;
        }
        db.commit().context(LedgerSnafu)?;
        Ok(())
    }

    pub async fn cancel_lease(&self, storage_index: &StorageIndex, cancel_secret: &str) -> Result<()> {
        let shnums = self.shnums_for_storage_index(storage_index).await?;
        let mut db = self.leasedb.lock().await;
        for shnum in shnums {
            db.cancel_lease(storage_index, shnum, self.owner_num, cancel_secret)
                .context(LedgerSnafu)?;
        }
        db.commit().context(LedgerSnafu)?;
        Ok(())
    }

    pub async fn get_buckets(&self, storage_index: &StorageIndex) -> Result<HashMap<ShareNumber, BucketReader>> {
        let shnums = self.shnums_for_storage_index(storage_index).await?;
        let mut out = HashMap::new();
        for shnum in shnums {
            let path = self.layout.share_path(storage_index, shnum);
            let reader =
                BucketReader::open(storage_index.clone(), shnum, path).context(ReaderSnafu)?;
            out.insert(shnum, reader);
        }
        Ok(out)
    }

    pub fn advise_corrupt_share(
        &self,
        storage_index: &StorageIndex,
        shnum: ShareNumber,
        share_type: &str,
        reason: &str,
    ) -> Result<CorruptionAdvisory> {
        let path = self.layout.share_path(storage_index, shnum);
        let reader =
            BucketReader::open(storage_index.clone(), shnum, path).context(ReaderSnafu)?;
        Ok(reader.advise_corrupt_share(share_type, reason))
    }

    pub fn get_version(&self) -> VersionInfo {
        VersionInfo {
            version: env!("CARGO_PKG_VERSION").to_string(),
        }
    }

    /// No quota enforcement (spec.md §1 non-goal), so every live account can
    /// write, read, and save.
    pub fn get_status(&self) -> AccountStatus {
        AccountStatus {
            write: true,
            read: true,
            save: true,
        }
    }

    /// Push messaging rides the RPC transport, which is out of scope; this
    /// always answers the empty message.
    pub fn get_account_message(&self) -> AccountMessage {
        AccountMessage::default()
    }

    pub async fn get_current_usage(&self) -> Result<u64> {
        let db = self.leasedb.lock().await;
        db.usage_for_account(self.owner_num).context(LedgerSnafu)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn setup() -> (tempfile::TempDir, Account) {
        let dir = tempfile::tempdir().unwrap();
        let layout = ShareLayout::new(dir.path());
        let leasedb = LeaseDatabase::open(layout.leasedb_dir()).unwrap();
        let account = Account::new(7, "pub-v0-test".to_string(), layout, Arc::new(AsyncMutex::new(leasedb)));
        (dir, account)
    }

    #[tokio::test]
    async fn allocate_then_finish_write_registers_starter_and_own_lease() {
        let (_dir, account) = setup();
        let si = "ab".to_string() + &"c".repeat(24);
        let canary = DisconnectCanary::new();
        let (already_have, writers) = account
            .allocate_buckets(si.clone(), "renew".into(), "cancel".into(), vec![0], 1024, canary)
            .await
            .unwrap();
        assert!(already_have.is_empty());
        let writer = writers.get(&0).unwrap();
        writer.write(0, b"hello").unwrap();
        let info = account
            .finish_write(writer, "renew".into(), "cancel".into())
            .await
            .unwrap();
        assert_eq!(info.final_size, 12 + 5);
        assert_eq!(account.get_current_usage().await.unwrap(), 12 + 5);
    }

    #[tokio::test]
    async fn reallocating_an_existing_share_reports_already_have() {
        let (_dir, account) = setup();
        let si = "cd".to_string() + &"c".repeat(24);
        let canary = DisconnectCanary::new();
        let (_, writers) = account
            .allocate_buckets(si.clone(), "r".into(), "c".into(), vec![0], 1024, canary.clone())
            .await
            .unwrap();
        account
            .finish_write(writers.get(&0).unwrap(), "r".into(), "c".into())
            .await
            .unwrap();

        let (already_have, writers) = account
            .allocate_buckets(si, "r2".into(), "c2".into(), vec![0], 1024, canary)
            .await
            .unwrap();
        assert_eq!(already_have, vec![0]);
        assert!(writers.is_empty());
    }

    #[test]
    fn nickname_round_trips_through_atomic_write() {
        let (_dir, account) = setup();
        assert_eq!(account.nickname().unwrap(), None);
        account.set_nickname("alice").unwrap();
        assert_eq!(account.nickname().unwrap(), Some("alice".to_string()));
    }
}

//! Accountant: owns the lease database handle, the weak-valued table of
//! live account handles, and the crawler.

use std::{
    collections::HashMap,
    path::PathBuf,
    sync::{Arc, Weak},
};

use parking_lot::Mutex;
use snafu::{ensure, Snafu};
use tokio::sync::Mutex as AsyncMutex;

use crate::{
    account::Account,
    crawler::{now_unix, Crawler, CrawlerConfig},
    leasedb::{LedgerError, LeaseDatabase, ANONYMOUS_NAME},
    paths::ShareLayout,
    OwnerNum, ANONYMOUS_OWNER_NUM,
};

#[derive(Debug, Snafu)]
pub enum AccountantError {
    #[snafu(display(
        "account name {:?} is invalid: must match ^[A-Za-z0-9+\\-_]+$ and contain no '.' or '/'",
        pubkey_string
    ))]
    BadAccountName { pubkey_string: String },

    #[snafu(display("accountant ledger error: {}", source))]
    Ledger { source: LedgerError },
}

type Result<T, E = AccountantError> = std::result::Result<T, E>;

fn is_valid_pubkey_string(pubkey_string: &str) -> bool {
    !pubkey_string.is_empty()
        && pubkey_string
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || c == '+' || c == '-' || c == '_')
}

/// Owns the lease database and the accounting crawler for one storage
/// server process. Account handles hold weak references back into
/// [`Self::accounts`] so an idle account can be garbage-collected while a
/// reconnecting peer resurrects the same logical identity (same owner
/// number, same on-disk attributes).
pub struct Accountant {
    layout: ShareLayout,
    leasedb: Arc<AsyncMutex<LeaseDatabase>>,
    accounts: Mutex<HashMap<String, Weak<Account>>>,
    crawler_state_path: PathBuf,
}

impl Accountant {
    pub fn open(layout: ShareLayout) -> Result<Self> {
        let leasedb =
            LeaseDatabase::open(layout.leasedb_dir()).map_err(|source| AccountantError::Ledger { source })?;
        let crawler_state_path = layout.base().join("crawler-state.json");
        Ok(Self {
            layout,
            leasedb: Arc::new(AsyncMutex::new(leasedb)),
            accounts: Mutex::new(HashMap::new()),
            crawler_state_path,
        })
    }

    /// Spawns the accounting crawler with `config`, running for as long as
    /// the returned handle is not aborted.
    pub fn spawn_crawler(&self, config: CrawlerConfig) -> tokio::task::JoinHandle<()> {
        let mut crawler = Crawler::new(
            self.layout.clone(),
            self.leasedb.clone(),
            config,
            self.crawler_state_path.clone(),
        );
        tokio::spawn(async move {
            if let Err(error) = crawler.run().await {
                error!(%error, "accounting crawler stopped");
            }
        })
    }

    /// Resolves (creating if absent) the account named `pubkey_string`,
    /// reusing a still-live handle when one exists.
    pub async fn get_account(&self, pubkey_string: &str) -> Result<Arc<Account>> {
        ensure!(
            is_valid_pubkey_string(pubkey_string),
            BadAccountNameSnafu {
                pubkey_string: pubkey_string.to_string()
            }
        );
        self.get_or_create(pubkey_string).await
    }

    /// Returns the singleton owner-0 handle.
    pub async fn get_anonymous_account(&self) -> Result<Arc<Account>> {
        self.get_or_create(ANONYMOUS_NAME).await
    }

    async fn get_or_create(&self, pubkey_string: &str) -> Result<Arc<Account>> {
        if let Some(account) = self
            .accounts
            .lock()
            .get(pubkey_string)
            .and_then(Weak::upgrade)
        {
            return Ok(account);
        }

        let owner_num = {
            let mut db = self.leasedb.lock().await;
            let owner_num = db
                .get_or_allocate_ownernum(pubkey_string, now_unix())
                .map_err(|source| AccountantError::Ledger { source })?;
            db.commit().map_err(|source| AccountantError::Ledger { source })?;
            owner_num
        };

        let account = Arc::new(Account::new(
            owner_num,
            pubkey_string.to_string(),
            self.layout.clone(),
            self.leasedb.clone(),
        ));
        if owner_num != ANONYMOUS_OWNER_NUM {
            let _ = account.record_created(now_unix());
        }

        // Another task may have raced us to create the same account; the
        // last writer wins the map entry, but both handles share the same
        // owner number and on-disk attributes, so this is harmless.
        self.accounts
            .lock()
            .insert(pubkey_string.to_string(), Arc::downgrade(&account));
        Ok(account)
    }

    /// Accounts with a currently-live handle, not the full accounts table
    /// (that's [`LeaseDatabase::get_all_accounts`]).
    pub fn list_active_accounts(&self) -> Vec<(OwnerNum, String)> {
        let accounts = self.accounts.lock();
        accounts
            .iter()
            .filter_map(|(pubkey_string, weak)| {
                weak.upgrade()
                    .map(|account| (account.owner_num(), pubkey_string.clone()))
            })
            .collect()
    }

    pub fn leasedb(&self) -> Arc<AsyncMutex<LeaseDatabase>> {
        self.leasedb.clone()
    }
}

//! Accounting crawler: a periodic, bandwidth-limited reconciler that walks
//! the share directory, computes the symmetric difference against the
//! lease database, and applies corrective inserts/deletions.
//!
//! The filesystem is always authoritative; the crawler only ever rewrites
//! the index.

pub mod state;

use std::{
    collections::HashSet,
    path::PathBuf,
    sync::Arc,
    time::Duration,
};

use snafu::{ResultExt, Snafu};
use tokio::sync::Mutex as AsyncMutex;

use crate::{disk_usage::size_of_disk_file, leasedb::{LeaseDatabase, LedgerError}, paths::ShareLayout};

use self::state::{CrawlerState, StateError};

/// Base-32 alphabet used to enumerate the fixed set of two-character
/// directory-sharding prefixes (32 * 32 = 1024 prefixes).
pub const PREFIX_ALPHABET: &str = "abcdefghijklmnopqrstuvwxyz234567";

/// Every two-character prefix, in stable lexicographic order.
pub fn all_prefixes() -> Vec<String> {
    let chars: Vec<char> = PREFIX_ALPHABET.chars().collect();
    let mut out = Vec::with_capacity(chars.len() * chars.len());
    for &a in &chars {
        for &b in &chars {
            out.push(format!("{a}{b}"));
        }
    }
    out.sort();
    out
}

pub fn now_unix() -> u64 {
    std::time::SystemTime::now()
        .duration_since(std::time::UNIX_EPOCH)
        .expect("system clock before epoch")
        .as_secs()
}

#[derive(Debug, Snafu)]
pub enum CrawlerError {
    #[snafu(display("crawler I/O error at {}: {}", path.display(), source))]
    Io {
        path: PathBuf,
        source: std::io::Error,
    },

    #[snafu(display("crawler ledger error: {}", source))]
    Ledger { source: LedgerError },

    #[snafu(display("crawler state error: {}", source))]
    State { source: StateError },
}

type Result<T, E = CrawlerError> = std::result::Result<T, E>;

/// Crawler scheduling parameters (spec.md §4.5).
#[derive(Clone, Debug)]
pub struct CrawlerConfig {
    pub slow_start: Duration,
    pub minimum_cycle_time: Duration,
    pub allowed_cpu_percentage: f64,
}

impl Default for CrawlerConfig {
    fn default() -> Self {
        Self {
            slow_start: Duration::from_secs(7 * 60),
            minimum_cycle_time: Duration::from_secs(12 * 60 * 60),
            allowed_cpu_percentage: 0.1,
        }
    }
}

impl CrawlerConfig {
    pub fn builder() -> CrawlerConfigBuilder {
        CrawlerConfigBuilder::default()
    }
}

/// Builder for [`CrawlerConfig`], in the same shape as the teacher's
/// `DiskBufferConfigBuilder`.
#[derive(Default)]
pub struct CrawlerConfigBuilder {
    slow_start: Option<Duration>,
    minimum_cycle_time: Option<Duration>,
    allowed_cpu_percentage: Option<f64>,
}

impl CrawlerConfigBuilder {
    /// Defaults to 7 minutes.
    pub fn slow_start(mut self, delay: Duration) -> Self {
        self.slow_start = Some(delay);
        self
    }

    /// Defaults to 12 hours.
    pub fn minimum_cycle_time(mut self, duration: Duration) -> Self {
        self.minimum_cycle_time = Some(duration);
        self
    }

    /// Defaults to 0.1 (10%).
    pub fn allowed_cpu_percentage(mut self, percentage: f64) -> Self {
        self.allowed_cpu_percentage = Some(percentage);
        self
    }

    pub fn build(self) -> CrawlerConfig {
        let defaults = CrawlerConfig::default();
        CrawlerConfig {
            slow_start: self.slow_start.unwrap_or(defaults.slow_start),
            minimum_cycle_time: self.minimum_cycle_time.unwrap_or(defaults.minimum_cycle_time),
            allowed_cpu_percentage: self
                .allowed_cpu_percentage
                .unwrap_or(defaults.allowed_cpu_percentage),
        }
    }
}

/// Lease-expiration opt-in, per spec.md §4.5: disabled by default, and when
/// enabled, sweeps leases with `expiration_time < cutoff`.
#[derive(Clone, Copy, Debug, Default)]
pub struct LeaseExpirationPolicy {
    pub enabled: bool,
    pub expire_time: Option<u64>,
}

pub struct Crawler {
    layout: ShareLayout,
    leasedb: Arc<AsyncMutex<LeaseDatabase>>,
    config: CrawlerConfig,
    state_path: PathBuf,
    prefixes: Vec<String>,
    lease_expiration: LeaseExpirationPolicy,
}

impl Crawler {
    pub fn new(
        layout: ShareLayout,
        leasedb: Arc<AsyncMutex<LeaseDatabase>>,
        config: CrawlerConfig,
        state_path: PathBuf,
    ) -> Self {
        Self {
            layout,
            leasedb,
            config,
            state_path,
            prefixes: all_prefixes(),
            lease_expiration: LeaseExpirationPolicy::default(),
        }
    }

    /// Enables or disables the lease-expiration sweep. Until called with
    /// `enable = true`, no expiration occurs.
    pub fn set_lease_expiration(&mut self, enable: bool, expire_time: Option<u64>) {
        self.lease_expiration = LeaseExpirationPolicy {
            enabled: enable,
            expire_time,
        };
    }

    /// Runs forever: one `slow_start` delay, then repeated cycles spaced at
    /// least `minimum_cycle_time` apart.
    pub async fn run(&mut self) -> Result<()> {
        tokio::time::sleep(self.config.slow_start).await;
        loop {
            let cycle_start = std::time::Instant::now();
            self.run_one_cycle().await?;
            let elapsed = cycle_start.elapsed();
            if elapsed < self.config.minimum_cycle_time {
                tokio::time::sleep(self.config.minimum_cycle_time - elapsed).await;
            }
        }
    }

    /// Runs exactly one cycle over every prefix, honoring a persisted
    /// cursor so a restart mid-cycle resumes rather than starting over.
    pub async fn run_one_cycle(&mut self) -> Result<()> {
        let mut state = CrawlerState::load(&self.state_path).context(StateSnafu)?;
        if state.cycle_started_at.is_none() {
            state.cycle_started_at = Some(now_unix());
            state.cursor = 0;
        }

        while state.cursor < self.prefixes.len() {
            let slice_start = std::time::Instant::now();
            let prefix = self.prefixes[state.cursor].clone();
            self.process_slice(&prefix).await?;
            state.cursor += 1;
            state.save(&self.state_path).context(StateSnafu)?;
            self.yield_for_slice(slice_start.elapsed()).await;
        }

        state.last_cycle_finished = Some(now_unix());
        state.cursor = 0;
        state.cycle_started_at = None;
        state.save(&self.state_path).context(StateSnafu)?;
        Ok(())
    }

    /// Processes a single prefix: the reconciliation algorithm of
    /// spec.md §4.5, followed by the lease-expiration sweep if enabled.
    pub async fn process_slice(&self, prefix: &str) -> Result<()> {
        let disk_shares = self.disk_shares_for_prefix(prefix)?;
        let mut leasedb = self.leasedb.lock().await;
        let db_shares = leasedb.get_shares_for_prefix(prefix).context(LedgerSnafu)?;

        for (storage_index, shnum) in disk_shares.difference(&db_shares) {
            let path = self.layout.share_path(storage_index, *shnum);
            match size_of_disk_file(&path) {
                Ok(size) => {
                    if let Err(error) =
                        leasedb.add_share(prefix, storage_index, *shnum, size, now_unix())
                    {
                        warn!(storage_index = %storage_index, shnum = *shnum, %error, "failed to record out-of-band share");
                    }
                }
                Err(error) => {
                    debug!(storage_index = %storage_index, shnum = *shnum, %error, "share vanished between listing and stat");
                }
            }
        }

        let missing: HashSet<_> = db_shares.difference(&disk_shares).cloned().collect();
        if !missing.is_empty() {
            leasedb
                .remove_deleted_shares(&missing)
                .context(LedgerSnafu)?;
        }

        if let Some(cutoff) = self.expiration_cutoff() {
            self.expire_leases(&mut leasedb, cutoff)?;
        }

        leasedb.commit().context(LedgerSnafu)?;
        Ok(())
    }

    fn expiration_cutoff(&self) -> Option<u64> {
        if !self.lease_expiration.enabled {
            return None;
        }
        Some(self.lease_expiration.expire_time.unwrap_or_else(now_unix))
    }

    fn expire_leases(&self, leasedb: &mut LeaseDatabase, cutoff: u64) -> Result<()> {
        leasedb
            .delete_leases_expiring_before(cutoff)
            .context(LedgerSnafu)?;
        // shares_with_zero_leases scans the committed database directly, not
        // the pending-write overlay, so the deletes above must land before
        // it can observe a share's lease count reaching zero.
        leasedb.commit().context(LedgerSnafu)?;
        let empties = leasedb.shares_with_zero_leases().context(LedgerSnafu)?;
        for row in &empties {
            let path = self.layout.share_path(&row.storage_index, row.shnum);
            match std::fs::remove_file(&path) {
                Ok(()) => {
                    info!(storage_index = %row.storage_index, shnum = row.shnum, "reclaimed expired share");
                }
                Err(error) if error.kind() == std::io::ErrorKind::NotFound => {}
                Err(error) => {
                    warn!(storage_index = %row.storage_index, shnum = row.shnum, %error, "failed to unlink reclaimed share");
                }
            }
        }
        leasedb.delete_share_rows(&empties).context(LedgerSnafu)?;
        Ok(())
    }

    /// Lists the committed storage-index subdirectories under `prefix`,
    /// and within each, filenames that parse as a share number.
    fn disk_shares_for_prefix(&self, prefix: &str) -> Result<HashSet<(String, u32)>> {
        let dir = self.layout.prefix_dir(prefix);
        let mut out = HashSet::new();
        let entries = match std::fs::read_dir(&dir) {
            Ok(entries) => entries,
            Err(error) if error.kind() == std::io::ErrorKind::NotFound => return Ok(out),
            Err(source) => return Err(CrawlerError::Io { path: dir, source }),
        };
        for entry in entries {
            let entry = entry.context(IoSnafu { path: dir.clone() })?;
            let is_dir = entry.file_type().context(IoSnafu { path: dir.clone() })?.is_dir();
            if !is_dir {
                continue;
            }
            let storage_index = entry.file_name().to_string_lossy().to_string();
            let Ok(share_entries) = std::fs::read_dir(entry.path()) else {
                continue;
            };
            for share_entry in share_entries.flatten() {
                if let Some(shnum) = share_entry
                    .file_name()
                    .to_str()
                    .and_then(|name| name.parse::<u32>().ok())
                {
                    out.insert((storage_index.clone(), shnum));
                }
            }
        }
        Ok(out)
    }

    async fn yield_for_slice(&self, slice_elapsed: Duration) {
        let pct = self.config.allowed_cpu_percentage.clamp(0.01, 1.0);
        let sleep_secs = slice_elapsed.as_secs_f64() * (1.0 - pct) / pct;
        if sleep_secs > 0.0 {
            tokio::time::sleep(Duration::from_secs_f64(sleep_secs)).await;
        }
    }
}

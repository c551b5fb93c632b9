//! Storage accounting core.
//!
//! This crate tracks which immutable share files exist on disk, attributes
//! them to accounts, and reconciles the authoritative on-disk share corpus
//! with a secondary bookkeeping index (the [`leasedb`]) used to answer
//! per-account usage queries and to drive lease expiration.
//!
//! The filesystem is always authoritative: the [`crawler`] rewrites the
//! index to match disk, never the reverse.

#![deny(clippy::all)]
#![allow(clippy::module_name_repetitions)]
#![allow(clippy::must_use_candidate)]

#[macro_use]
extern crate tracing;

pub mod account;
pub mod accountant;
pub mod bucket;
pub mod container;
pub mod crawler;
pub mod disk_usage;
pub mod facade;
pub mod leasedb;
pub mod paths;

pub use account::{Account, AccountError};
pub use accountant::{Accountant, AccountantError};
pub use bucket::reader::BucketReader;
pub use bucket::writer::{BucketWriter, WriterError};
pub use container::{ContainerError, ShareContainer};
pub use crawler::{Crawler, CrawlerConfig};
pub use facade::StorageFacade;
pub use leasedb::{LeaseDatabase, LedgerError};

/// A 26-character opaque content-derived identifier for an immutable object.
///
/// The first two characters form the [`prefix`](paths::prefix_of) used for
/// directory sharding.
pub type StorageIndex = String;

/// A non-negative integer identifying one erasure-coded share within a
/// storage index.
pub type ShareNumber = u32;

/// Integer account identifier stored in the lease database and tagged on
/// wire operations.
pub type OwnerNum = u64;

/// Owner number reserved for anonymous wire callers. Distinct from
/// [`STARTER_LEASE_ACCOUNT`] in the database.
pub const ANONYMOUS_OWNER_NUM: OwnerNum = 0;

/// Account id that every newly inserted share's starter lease is recorded
/// against.
pub const STARTER_LEASE_ACCOUNT: OwnerNum = 1;

/// Starter lease lifetime: 60 days, in seconds.
pub const STARTER_LEASE_DURATION_SECS: u64 = 60 * 24 * 60 * 60;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn starter_lease_duration_is_sixty_days() {
        assert_eq!(STARTER_LEASE_DURATION_SECS, 5_184_000);
    }
}

//! Row types stored (via `bincode`) as `leveldb` values.

use serde::{Deserialize, Serialize};

/// A row of the logical `shares` table.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct ShareRow {
    pub share_id: u64,
    pub prefix: String,
    pub storage_index: String,
    pub shnum: u32,
    pub size: u64,
}

/// A row of the logical `leases` table.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct LeaseRow {
    pub share_id: u64,
    pub account_id: u64,
    pub expiration_time: u64,
    pub renew_secret: String,
    pub cancel_secret: String,
}

/// A row of the logical `accounts` table.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct AccountRow {
    pub owner_num: u64,
    pub name: String,
    pub creation_time: u64,
}

pub(super) fn encode<T: Serialize>(value: &T) -> Vec<u8> {
    bincode::serialize(value).expect("in-memory row encoding never fails")
}

pub(super) fn decode<T: for<'de> Deserialize<'de>>(bytes: &[u8]) -> T {
    bincode::deserialize(bytes).expect("ledger value corrupted")
}

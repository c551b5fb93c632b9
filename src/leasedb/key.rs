//! Composite key encoding for the lease database's single `leveldb` instance.
//!
//! `leveldb::Database` is keyed by one type; the three logical tables of
//! `spec.md` §3 (shares, leases, accounts) and their secondary indexes are
//! folded into one byte-ordered keyspace, tagged by a leading byte, the same
//! way the teacher's `disk_v1` variant keys its queue by a single `usize`
//! newtype. Every multi-byte integer is big-endian so that leveldb's
//! byte-wise default comparator gives numeric/time ordering for range scans
//! (the prefix scan backing `get_shares_for_prefix`, the ordered sweep
//! backing lease expiration).

use std::convert::TryInto;

/// Share row, keyed by its allocated share id.
pub const TAG_SHARE_BY_ID: u8 = 0x01;
/// Share id lookup by `(storage_index, shnum)`; enforces uniqueness.
pub const TAG_SHARE_ID_BY_SI_SHNUM: u8 = 0x02;
/// Share id membership by `(prefix, storage_index, shnum)`; backs
/// `get_shares_for_prefix`.
pub const TAG_SHARE_BY_PREFIX: u8 = 0x03;
/// Lease row, keyed by `(share_id, account_id)`.
pub const TAG_LEASE: u8 = 0x04;
/// Lease membership keyed by `(expiration_time, share_id, account_id)`;
/// backs the expiration sweep.
pub const TAG_LEASE_BY_EXPIRATION: u8 = 0x05;
/// Account row, keyed by owner number.
pub const TAG_ACCOUNT_BY_ID: u8 = 0x06;
/// Owner number lookup by account name.
pub const TAG_ACCOUNT_ID_BY_NAME: u8 = 0x07;
/// Account attribute, keyed by `(owner_num, attribute key)`.
pub const TAG_ACCOUNT_ATTRIBUTE: u8 = 0x08;
/// Monotonic share id counter (singleton key).
pub const TAG_NEXT_SHARE_ID: u8 = 0x09;
/// Monotonic owner number counter (singleton key).
pub const TAG_NEXT_OWNERNUM: u8 = 0x0a;
/// Schema version record (singleton key).
pub const TAG_SCHEMA_VERSION: u8 = 0x0b;

/// Opaque, ordered byte-string key used for every row in the ledger.
#[derive(Clone, Debug, PartialEq, Eq, PartialOrd, Ord)]
pub struct LedgerKey(pub Vec<u8>);

impl db_key::Key for LedgerKey {
    fn from_u8(key: &[u8]) -> Self {
        Self(key.to_vec())
    }

    fn as_slice<T, F: Fn(&[u8]) -> T>(&self, f: F) -> T {
        f(&self.0)
    }
}

impl LedgerKey {
    fn singleton(tag: u8) -> Self {
        Self(vec![tag])
    }

    pub fn schema_version() -> Self {
        Self::singleton(TAG_SCHEMA_VERSION)
    }

    pub fn next_share_id() -> Self {
        Self::singleton(TAG_NEXT_SHARE_ID)
    }

    pub fn next_ownernum() -> Self {
        Self::singleton(TAG_NEXT_OWNERNUM)
    }

    pub fn share_by_id(share_id: u64) -> Self {
        let mut buf = vec![TAG_SHARE_BY_ID];
        buf.extend_from_slice(&share_id.to_be_bytes());
        Self(buf)
    }

    pub fn share_id_by_si_shnum(storage_index: &str, shnum: u32) -> Self {
        let mut buf = vec![TAG_SHARE_ID_BY_SI_SHNUM];
        buf.extend_from_slice(storage_index.as_bytes());
        buf.extend_from_slice(&shnum.to_be_bytes());
        Self(buf)
    }

    pub fn share_by_prefix(prefix: &str, storage_index: &str, shnum: u32) -> Self {
        let mut buf = vec![TAG_SHARE_BY_PREFIX];
        buf.extend_from_slice(prefix.as_bytes());
        buf.extend_from_slice(storage_index.as_bytes());
        buf.extend_from_slice(&shnum.to_be_bytes());
        Self(buf)
    }

    /// Lower bound for an iteration over every `(storage_index, shnum)` pair
    /// filed under `prefix`.
    pub fn share_by_prefix_lower_bound(prefix: &str) -> Self {
        let mut buf = vec![TAG_SHARE_BY_PREFIX];
        buf.extend_from_slice(prefix.as_bytes());
        Self(buf)
    }

    pub fn lease(share_id: u64, account_id: u64) -> Self {
        let mut buf = vec![TAG_LEASE];
        buf.extend_from_slice(&share_id.to_be_bytes());
        buf.extend_from_slice(&account_id.to_be_bytes());
        Self(buf)
    }

    /// Lower bound for an iteration over every lease of one share.
    pub fn lease_lower_bound(share_id: u64) -> Self {
        let mut buf = vec![TAG_LEASE];
        buf.extend_from_slice(&share_id.to_be_bytes());
        Self(buf)
    }

    pub fn lease_by_expiration(expiration_time: u64, share_id: u64, account_id: u64) -> Self {
        let mut buf = vec![TAG_LEASE_BY_EXPIRATION];
        buf.extend_from_slice(&expiration_time.to_be_bytes());
        buf.extend_from_slice(&share_id.to_be_bytes());
        buf.extend_from_slice(&account_id.to_be_bytes());
        Self(buf)
    }

    /// Upper-exclusive bound for an iteration over every lease whose
    /// expiration is strictly less than `cutoff`.
    pub fn lease_by_expiration_cutoff(cutoff: u64) -> Self {
        let mut buf = vec![TAG_LEASE_BY_EXPIRATION];
        buf.extend_from_slice(&cutoff.to_be_bytes());
        Self(buf)
    }

    pub fn account_by_id(owner_num: u64) -> Self {
        let mut buf = vec![TAG_ACCOUNT_BY_ID];
        buf.extend_from_slice(&owner_num.to_be_bytes());
        Self(buf)
    }

    pub fn account_id_by_name(name: &str) -> Self {
        let mut buf = vec![TAG_ACCOUNT_ID_BY_NAME];
        buf.extend_from_slice(name.as_bytes());
        Self(buf)
    }

    pub fn account_attribute(owner_num: u64, attr: &str) -> Self {
        let mut buf = vec![TAG_ACCOUNT_ATTRIBUTE];
        buf.extend_from_slice(&owner_num.to_be_bytes());
        buf.extend_from_slice(attr.as_bytes());
        Self(buf)
    }

    pub fn starts_with(&self, prefix: &[u8]) -> bool {
        self.0.starts_with(prefix)
    }

    /// Decodes the `(share_id, account_id)` suffix of a [`TAG_LEASE`] key.
    pub fn decode_lease(&self) -> Option<(u64, u64)> {
        if self.0.first() != Some(&TAG_LEASE) || self.0.len() != 17 {
            return None;
        }
        let share_id = u64::from_be_bytes(self.0[1..9].try_into().ok()?);
        let account_id = u64::from_be_bytes(self.0[9..17].try_into().ok()?);
        Some((share_id, account_id))
    }

    /// Decodes the `(expiration_time, share_id, account_id)` suffix of a
    /// [`TAG_LEASE_BY_EXPIRATION`] key.
    pub fn decode_lease_by_expiration(&self) -> Option<(u64, u64, u64)> {
        if self.0.first() != Some(&TAG_LEASE_BY_EXPIRATION) || self.0.len() != 25 {
            return None;
        }
        let expiration = u64::from_be_bytes(self.0[1..9].try_into().ok()?);
        let share_id = u64::from_be_bytes(self.0[9..17].try_into().ok()?);
        let account_id = u64::from_be_bytes(self.0[17..25].try_into().ok()?);
        Some((expiration, share_id, account_id))
    }

    /// Decodes the `(storage_index, shnum)` suffix of a
    /// [`TAG_SHARE_BY_PREFIX`] key, given the known prefix width.
    pub fn decode_share_by_prefix(&self, prefix_len: usize) -> Option<(String, u32)> {
        if self.0.first() != Some(&TAG_SHARE_BY_PREFIX) {
            return None;
        }
        let body = &self.0[1 + prefix_len..];
        if body.len() < 4 {
            return None;
        }
        let (si_bytes, shnum_bytes) = body.split_at(body.len() - 4);
        let storage_index = String::from_utf8(si_bytes.to_vec()).ok()?;
        let shnum = u32::from_be_bytes(shnum_bytes.try_into().ok()?);
        Some((storage_index, shnum))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn big_endian_keys_sort_numerically() {
        let a = LedgerKey::share_by_id(1).0;
        let b = LedgerKey::share_by_id(2).0;
        assert!(a < b);
        let a = LedgerKey::lease_by_expiration(10, 0, 0).0;
        let b = LedgerKey::lease_by_expiration(20, 0, 0).0;
        assert!(a < b);
    }

    #[test]
    fn prefix_lower_bound_is_a_true_prefix_of_members() {
        let lower = LedgerKey::share_by_prefix_lower_bound("ab").0;
        let member = LedgerKey::share_by_prefix("ab", "abccccccccccccccccccccccccc", 0).0;
        assert!(member.starts_with(&lower));
    }

    #[test]
    fn lease_round_trips() {
        let key = LedgerKey::lease(7, 1);
        assert_eq!(key.decode_lease(), Some((7, 1)));
    }

    #[test]
    fn lease_by_expiration_round_trips() {
        let key = LedgerKey::lease_by_expiration(99, 7, 1);
        assert_eq!(key.decode_lease_by_expiration(), Some((99, 7, 1)));
    }
}

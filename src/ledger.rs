// Copyright (c) 2025-2026 Adrian Robinson. Licensed under the AGPL-3.0.
// See LICENSE file in the project root for full license text.

//! Authoritative usage index.
//!
//! The [`UsageLedger`] owns every [`OriginRecord`] and maintains running
//! totals per group and globally, so usage queries never scan.
//!
//! # Example
//!
//! ```
//! use quota_engine::UsageLedger;
//!
//! let mut ledger = UsageLedger::new();
//! ledger.register("https://a.example.com".into(), "example.com".into()).unwrap();
//! ledger.record_usage_delta(&"https://a.example.com".into(), 512).unwrap();
//!
//! assert_eq!(ledger.total_usage(), 512);
//! assert_eq!(ledger.group_usage(&"example.com".into()), 512);
//! ```

use std::collections::HashMap;

use tracing::error;

use crate::clock::Timestamp;
use crate::error::QuotaError;
use crate::origin::{GroupKey, OriginKey, OriginRecord, PersistedOrigin};

#[derive(Debug, Default, Clone, Copy)]
struct GroupTotals {
    usage_bytes: u64,
    origins: usize,
}

/// In-memory index of origin records with O(1) running totals.
#[derive(Debug, Default)]
pub struct UsageLedger {
    origins: HashMap<OriginKey, OriginRecord>,
    groups: HashMap<GroupKey, GroupTotals>,
    total_bytes: u64,
    next_seq: u64,
}

impl UsageLedger {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Register an origin. Idempotent: an existing record keeps its usage.
    pub fn register(
        &mut self,
        origin_key: OriginKey,
        group_key: GroupKey,
    ) -> Result<&mut OriginRecord, QuotaError> {
        if let Some(existing) = self.origins.get(&origin_key) {
            if existing.group_key != group_key {
                return Err(QuotaError::GroupMismatch {
                    origin: origin_key,
                    existing: existing.group_key.clone(),
                    requested: group_key,
                });
            }
        } else {
            let seq = self.next_seq;
            self.next_seq += 1;
            self.groups.entry(group_key.clone()).or_default().origins += 1;
            self.origins.insert(
                origin_key.clone(),
                OriginRecord::new(origin_key.clone(), group_key, seq),
            );
        }

        self.origins
            .get_mut(&origin_key)
            .ok_or(QuotaError::UnknownOrigin(origin_key))
    }

    /// Insert a record recovered from a usage cache or a storage scan.
    ///
    /// Replaces any record with the same key. Records without a stored
    /// registration order get the next one.
    pub fn restore(&mut self, persisted: PersistedOrigin) -> &OriginRecord {
        self.remove(&persisted.origin_key);

        let seq = match persisted.registration_seq {
            Some(seq) => seq,
            None => self.next_seq,
        };
        self.next_seq = self.next_seq.max(seq + 1);

        let mut record = OriginRecord::new(persisted.origin_key.clone(), persisted.group_key, seq);
        record.usage_bytes = persisted.usage_bytes;
        record.last_access_time = persisted.last_access_time.unwrap_or(Timestamp::ZERO);
        record.on_disk = true;

        let group = self.groups.entry(record.group_key.clone()).or_default();
        group.origins += 1;
        group.usage_bytes += record.usage_bytes;
        self.total_bytes += record.usage_bytes;

        self.origins.entry(persisted.origin_key).or_insert(record)
    }

    /// Apply a usage change. Returns the origin's new usage.
    pub fn record_usage_delta(&mut self, origin_key: &OriginKey, delta: i64) -> Result<u64, QuotaError> {
        let record = self
            .origins
            .get_mut(origin_key)
            .ok_or_else(|| QuotaError::UnknownOrigin(origin_key.clone()))?;

        let magnitude = delta.unsigned_abs();
        if delta < 0 {
            if magnitude > record.usage_bytes {
                error!(
                    origin = %origin_key,
                    usage = record.usage_bytes,
                    delta,
                    "Usage delta would underflow - rejecting"
                );
                return Err(QuotaError::UsageUnderflow {
                    origin: origin_key.clone(),
                    usage: record.usage_bytes,
                    delta,
                });
            }
            record.usage_bytes -= magnitude;
            self.total_bytes -= magnitude;
            if let Some(group) = self.groups.get_mut(&record.group_key) {
                group.usage_bytes -= magnitude;
            }
        } else {
            record.usage_bytes += magnitude;
            self.total_bytes += magnitude;
            self.groups.entry(record.group_key.clone()).or_default().usage_bytes += magnitude;
        }

        Ok(record.usage_bytes)
    }

    /// Remove a record and subtract its usage from all running totals.
    pub fn remove(&mut self, origin_key: &OriginKey) -> Option<OriginRecord> {
        let record = self.origins.remove(origin_key)?;
        self.total_bytes -= record.usage_bytes;

        if let Some(group) = self.groups.get_mut(&record.group_key) {
            group.usage_bytes -= record.usage_bytes;
            group.origins -= 1;
            if group.origins == 0 {
                self.groups.remove(&record.group_key);
            }
        }
        Some(record)
    }

    #[must_use]
    pub fn total_usage(&self) -> u64 {
        self.total_bytes
    }

    #[must_use]
    pub fn group_usage(&self, group_key: &GroupKey) -> u64 {
        self.groups.get(group_key).map_or(0, |g| g.usage_bytes)
    }

    #[must_use]
    pub fn get(&self, origin_key: &OriginKey) -> Option<&OriginRecord> {
        self.origins.get(origin_key)
    }

    pub fn get_mut(&mut self, origin_key: &OriginKey) -> Option<&mut OriginRecord> {
        self.origins.get_mut(origin_key)
    }

    #[must_use]
    pub fn contains(&self, origin_key: &OriginKey) -> bool {
        self.origins.contains_key(origin_key)
    }

    pub fn records(&self) -> impl Iterator<Item = &OriginRecord> {
        self.origins.values()
    }

    /// Groups with their current usage.
    pub fn groups(&self) -> impl Iterator<Item = (&GroupKey, u64)> {
        self.groups.iter().map(|(k, g)| (k, g.usage_bytes))
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.origins.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.origins.is_empty()
    }

    #[must_use]
    pub fn active_origins(&self) -> usize {
        self.origins.values().filter(|r| r.is_active()).count()
    }

    /// Persistable snapshot of every record, in registration order.
    #[must_use]
    pub fn snapshot(&self) -> Vec<PersistedOrigin> {
        let mut records: Vec<&OriginRecord> = self.origins.values().collect();
        records.sort_by_key(|r| r.registration_seq);
        records.into_iter().map(PersistedOrigin::from).collect()
    }

    /// Drop all records and totals.
    pub fn clear(&mut self) {
        self.origins.clear();
        self.groups.clear();
        self.total_bytes = 0;
        self.next_seq = 0;
    }
}

// Copyright (c) 2025-2026 Adrian Robinson. Licensed under the AGPL-3.0.
// See LICENSE file in the project root for full license text.

use std::collections::HashSet;

use crate::clock::Timestamp;
use crate::ledger::UsageLedger;
use crate::origin::{GroupKey, OriginKey, OriginRecord};

/// Eviction metadata copied out of the ledger for one candidate origin.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EvictionCandidate {
    pub origin_key: OriginKey,
    pub group_key: GroupKey,
    pub usage_bytes: u64,
    pub last_access_time: Timestamp,
    pub registration_seq: u64,
}

impl From<&OriginRecord> for EvictionCandidate {
    fn from(record: &OriginRecord) -> Self {
        Self {
            origin_key: record.origin_key.clone(),
            group_key: record.group_key.clone(),
            usage_bytes: record.usage_bytes,
            last_access_time: record.last_access_time,
            registration_seq: record.registration_seq,
        }
    }
}

/// What to free and who may not be touched.
#[derive(Debug, Clone, Copy)]
pub struct EvictionRequest<'a> {
    /// Bytes that must be freed
    pub need: u64,
    /// Origin asking for space; never evicted to make room for itself
    pub requester: Option<&'a OriginKey>,
    /// Restrict candidates to one group
    pub group: Option<&'a GroupKey>,
    /// Origins already claimed by another plan
    pub exclude: Option<&'a HashSet<OriginKey>>,
}

impl<'a> EvictionRequest<'a> {
    #[must_use]
    pub fn new(need: u64) -> Self {
        Self {
            need,
            requester: None,
            group: None,
            exclude: None,
        }
    }

    #[must_use]
    pub fn for_requester(mut self, requester: &'a OriginKey) -> Self {
        self.requester = Some(requester);
        self
    }

    #[must_use]
    pub fn in_group(mut self, group: &'a GroupKey) -> Self {
        self.group = Some(group);
        self
    }

    #[must_use]
    pub fn excluding(mut self, exclude: &'a HashSet<OriginKey>) -> Self {
        self.exclude = Some(exclude);
        self
    }
}

/// Ordered victims for one eviction.
///
/// `victims` is the shortest oldest-first prefix covering `need`; `fallback`
/// holds the remaining candidates in the same order, used when deleting a
/// victim fails.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct EvictionPlan {
    pub need: u64,
    pub victims: Vec<EvictionCandidate>,
    pub fallback: Vec<EvictionCandidate>,
}

impl EvictionPlan {
    #[must_use]
    pub fn selected_bytes(&self) -> u64 {
        self.victims.iter().map(|c| c.usage_bytes).sum()
    }

    #[must_use]
    pub fn is_sufficient(&self) -> bool {
        self.selected_bytes() >= self.need
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.victims.is_empty()
    }

    pub fn victim_keys(&self) -> impl Iterator<Item = &OriginKey> {
        self.victims.iter().map(|c| &c.origin_key)
    }
}

/// Not enough evictable bytes to satisfy a request.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Shortfall {
    pub need: u64,
    pub available: u64,
}

impl Shortfall {
    #[must_use]
    pub fn missing(&self) -> u64 {
        self.need.saturating_sub(self.available)
    }
}

/// Least-recently-accessed eviction gated by liveness.
///
/// Active origins and the requester are never candidates. Candidates are
/// ordered by access time, ties broken by registration order.
#[derive(Debug, Clone)]
pub struct LruPolicy {
    /// Skip origins with no usage; they free nothing
    pub skip_empty: bool,
}

impl Default for LruPolicy {
    fn default() -> Self {
        Self { skip_empty: true }
    }
}

impl LruPolicy {
    /// Every evictable origin for the request, oldest first.
    pub fn candidates(&self, ledger: &UsageLedger, request: &EvictionRequest<'_>) -> Vec<EvictionCandidate> {
        let mut candidates: Vec<EvictionCandidate> = ledger
            .records()
            .filter(|r| !r.is_active())
            .filter(|r| request.requester != Some(&r.origin_key))
            .filter(|r| request.group.map_or(true, |g| &r.group_key == g))
            .filter(|r| request.exclude.map_or(true, |ex| !ex.contains(&r.origin_key)))
            .filter(|r| !(self.skip_empty && r.usage_bytes == 0))
            .map(EvictionCandidate::from)
            .collect();

        candidates.sort_by(|a, b| {
            a.last_access_time
                .cmp(&b.last_access_time)
                .then(a.registration_seq.cmp(&b.registration_seq))
        });
        candidates
    }

    /// Oldest-first prefix covering as much of `need` as possible.
    ///
    /// Used for quota shrink, where freeing part of the excess still helps.
    pub fn select_best_effort(&self, ledger: &UsageLedger, request: &EvictionRequest<'_>) -> EvictionPlan {
        let mut plan = EvictionPlan {
            need: request.need,
            ..Default::default()
        };
        if request.need == 0 {
            return plan;
        }

        let mut freed = 0u64;
        for candidate in self.candidates(ledger, request) {
            if freed >= request.need {
                plan.fallback.push(candidate);
            } else {
                freed += candidate.usage_bytes;
                plan.victims.push(candidate);
            }
        }
        plan
    }

    /// All-or-nothing selection: a plan covering `need`, or the shortfall.
    pub fn select(&self, ledger: &UsageLedger, request: &EvictionRequest<'_>) -> Result<EvictionPlan, Shortfall> {
        let plan = self.select_best_effort(ledger, request);
        if plan.is_sufficient() {
            Ok(plan)
        } else {
            Err(Shortfall {
                need: request.need,
                available: plan.selected_bytes(),
            })
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    /// Ledger with origins registered in order, each with the given usage and
    /// an access time equal to its index.
    fn ledger_with(entries: &[(&str, &str, u64)]) -> UsageLedger {
        let mut ledger = UsageLedger::new();
        for (i, (origin, group, usage)) in entries.iter().enumerate() {
            let record = ledger.register((*origin).into(), (*group).into()).unwrap();
            record.last_access_time = Timestamp::from_micros(i as u64 + 1);
            ledger.record_usage_delta(&(*origin).into(), *usage as i64).unwrap();
        }
        ledger
    }

    fn keys(plan: &EvictionPlan) -> Vec<&str> {
        plan.victim_keys().map(|k| k.as_str()).collect()
    }

    #[test]
    fn test_oldest_evicted_first() {
        let ledger = ledger_with(&[("a", "g", 10), ("b", "g", 10), ("c", "g", 10)]);
        let plan = LruPolicy::default().select(&ledger, &EvictionRequest::new(10)).unwrap();
        assert_eq!(keys(&plan), vec!["a"]);
        assert_eq!(plan.fallback.len(), 2);
    }

    #[test]
    fn test_access_time_beats_registration_order() {
        let mut ledger = ledger_with(&[("a", "g", 10), ("b", "g", 10)]);
        ledger.get_mut(&"a".into()).unwrap().last_access_time = Timestamp::from_micros(100);

        let plan = LruPolicy::default().select(&ledger, &EvictionRequest::new(5)).unwrap();
        assert_eq!(keys(&plan), vec!["b"]);
    }

    #[test]
    fn test_ties_broken_by_registration_order() {
        let mut ledger = ledger_with(&[("a", "g", 10), ("b", "g", 10), ("c", "g", 10)]);
        for key in ["a", "b", "c"] {
            ledger.get_mut(&key.into()).unwrap().last_access_time = Timestamp::ZERO;
        }
        let plan = LruPolicy::default().select(&ledger, &EvictionRequest::new(15)).unwrap();
        assert_eq!(keys(&plan), vec!["a", "b"]);
    }

    #[test]
    fn test_active_origins_are_immune() {
        let mut ledger = ledger_with(&[("a", "g", 10), ("b", "g", 10)]);
        ledger.get_mut(&"a".into()).unwrap().active_client_count = 1;

        let plan = LruPolicy::default().select(&ledger, &EvictionRequest::new(10)).unwrap();
        assert_eq!(keys(&plan), vec!["b"]);
    }

    #[test]
    fn test_requester_never_evicts_itself() {
        let ledger = ledger_with(&[("a", "g", 10), ("b", "g", 10)]);
        let requester = OriginKey::from("a");
        let plan = LruPolicy::default()
            .select(&ledger, &EvictionRequest::new(10).for_requester(&requester))
            .unwrap();
        assert_eq!(keys(&plan), vec!["b"]);
    }

    #[test]
    fn test_all_or_nothing() {
        let mut ledger = ledger_with(&[("a", "g", 10), ("b", "g", 10), ("c", "g", 10)]);
        ledger.get_mut(&"c".into()).unwrap().active_client_count = 2;

        let shortfall = LruPolicy::default()
            .select(&ledger, &EvictionRequest::new(25))
            .unwrap_err();
        assert_eq!(shortfall, Shortfall { need: 25, available: 20 });
        assert_eq!(shortfall.missing(), 5);
    }

    #[test]
    fn test_group_restriction() {
        let ledger = ledger_with(&[("a", "g1", 10), ("b", "g2", 10), ("c", "g1", 10)]);
        let group = GroupKey::from("g1");
        let plan = LruPolicy::default()
            .select(&ledger, &EvictionRequest::new(20).in_group(&group))
            .unwrap();
        assert_eq!(keys(&plan), vec!["a", "c"]);
    }

    #[test]
    fn test_exclusion_set() {
        let ledger = ledger_with(&[("a", "g", 10), ("b", "g", 10)]);
        let exclude: HashSet<OriginKey> = [OriginKey::from("a")].into_iter().collect();
        let plan = LruPolicy::default()
            .select(&ledger, &EvictionRequest::new(10).excluding(&exclude))
            .unwrap();
        assert_eq!(keys(&plan), vec!["b"]);
    }

    #[test]
    fn test_empty_origins_skipped() {
        let ledger = ledger_with(&[("empty", "g", 0), ("a", "g", 10)]);
        let plan = LruPolicy::default().select(&ledger, &EvictionRequest::new(1)).unwrap();
        assert_eq!(keys(&plan), vec!["a"]);

        let keep_empty = LruPolicy { skip_empty: false };
        let plan = keep_empty.select(&ledger, &EvictionRequest::new(1)).unwrap();
        assert_eq!(keys(&plan), vec!["empty", "a"]);
    }

    #[test]
    fn test_zero_need_selects_nothing() {
        let ledger = ledger_with(&[("a", "g", 10)]);
        let plan = LruPolicy::default().select(&ledger, &EvictionRequest::new(0)).unwrap();
        assert!(plan.is_empty());
    }

    #[test]
    fn test_best_effort_takes_everything_available() {
        let mut ledger = ledger_with(&[("a", "g", 10), ("b", "g", 10), ("c", "g", 10)]);
        ledger.get_mut(&"b".into()).unwrap().active_client_count = 1;

        let plan = LruPolicy::default().select_best_effort(&ledger, &EvictionRequest::new(100));
        assert_eq!(keys(&plan), vec!["a", "c"]);
        assert!(!plan.is_sufficient());
    }
}

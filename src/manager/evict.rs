//! Eviction execution: turning plans into deleted data and removed records.
//!
//! Runs with the coordinator lock held, so the ledger cannot change between
//! selection and deletion except through this code.

use std::collections::HashSet;

use tracing::{debug, info, warn};

use crate::error::QuotaError;
use crate::eviction::{EvictionPlan, EvictionRequest};
use crate::origin::{GroupKey, OriginKey};

use super::{EvictionReport, Inner, QuotaLimits};

impl Inner {
    /// Evict plan victims until `plan.need` bytes are freed.
    ///
    /// A victim whose data cannot be deleted is logged and skipped; the next
    /// candidate in the fallback list covers for it.
    pub(crate) async fn execute_plan(&mut self, plan: EvictionPlan, reason: &'static str) -> EvictionReport {
        let mut report = EvictionReport {
            need: plan.need,
            ..Default::default()
        };

        for candidate in plan.victims.into_iter().chain(plan.fallback) {
            if report.freed_bytes >= report.need {
                break;
            }

            // Already evicted by an earlier pass of the same request
            match self.ledger.get(&candidate.origin_key) {
                Some(record) if !record.is_active() => {}
                _ => continue,
            }

            match self.client.delete_origin_data(&candidate.origin_key).await {
                Ok(()) => {
                    if let Some(removed) = self.ledger.remove(&candidate.origin_key) {
                        info!(
                            origin = %removed.origin_key,
                            group = %removed.group_key,
                            bytes = removed.usage_bytes,
                            last_access = %removed.last_access_time,
                            reason,
                            "Evicted origin"
                        );
                        report.freed_bytes += removed.usage_bytes;
                        report.evicted.push(removed.origin_key);
                    }
                }
                Err(e) => {
                    warn!(
                        origin = %candidate.origin_key,
                        error = %e,
                        reason,
                        "Failed to delete origin data - skipping"
                    );
                    crate::metrics::record_eviction_failure(reason);
                    report.failed.push(candidate.origin_key);
                }
            }
        }

        crate::metrics::record_eviction(reason, report.evicted.len(), report.freed_bytes);
        self.publish_usage();
        report
    }

    /// Make room for `additional` bytes of `origin`, then reserve them.
    ///
    /// Group and global eviction are both planned before anything is deleted;
    /// if either cannot be satisfied nothing is evicted.
    pub(crate) async fn admit(&mut self, origin: &OriginKey, additional: u64) -> Result<(), QuotaError> {
        let limits = self.ensure_ready()?;
        let group = self
            .ledger
            .get(origin)
            .map(|r| r.group_key.clone())
            .ok_or_else(|| QuotaError::UnknownOrigin(origin.clone()))?;

        if additional == 0 {
            return Ok(());
        }

        let insufficient = |shortfall: u64| QuotaError::InsufficientSpace {
            origin: origin.clone(),
            requested: additional,
            shortfall,
        };

        let (group_plan, global_plan) = self.plan_admission(origin, &group, additional, limits)?;

        if let Some(plan) = group_plan {
            debug!(origin = %origin, need = plan.need, victims = plan.victims.len(), "Group quota eviction");
            let report = self.execute_plan(plan, "group").await;
            if !report.is_satisfied() {
                return Err(insufficient(report.shortfall()));
            }
        }

        if let Some(mut plan) = global_plan {
            // Group pass may have freed more than planned
            plan.need = self
                .ledger
                .total_usage()
                .saturating_add(additional)
                .saturating_sub(limits.global_bytes);
            if plan.need > 0 {
                debug!(origin = %origin, need = plan.need, victims = plan.victims.len(), "Global quota eviction");
                let report = self.execute_plan(plan, "request").await;
                if !report.is_satisfied() {
                    return Err(insufficient(report.shortfall()));
                }
            }
        }

        self.ledger.record_usage_delta(origin, additional as i64)?;
        crate::metrics::record_admitted_bytes(additional);
        self.publish_usage();
        Ok(())
    }

    /// Select victims for both the group and global ceilings without touching
    /// anything. Fails with `InsufficientSpace` if either cannot be covered.
    fn plan_admission(
        &self,
        origin: &OriginKey,
        group: &GroupKey,
        additional: u64,
        limits: QuotaLimits,
    ) -> Result<(Option<EvictionPlan>, Option<EvictionPlan>), QuotaError> {
        let insufficient = |shortfall: u64| QuotaError::InsufficientSpace {
            origin: origin.clone(),
            requested: additional,
            shortfall,
        };

        let group_need = self
            .ledger
            .group_usage(group)
            .saturating_add(additional)
            .saturating_sub(limits.group_bytes);

        let group_plan = if group_need > 0 {
            let request = EvictionRequest::new(group_need).for_requester(origin).in_group(group);
            Some(self.policy.select(&self.ledger, &request).map_err(|s| insufficient(s.missing()))?)
        } else {
            None
        };

        let claimed: HashSet<OriginKey> = group_plan
            .iter()
            .flat_map(|p| p.victim_keys().cloned())
            .collect();
        let freed_by_group = group_plan.as_ref().map_or(0, EvictionPlan::selected_bytes);

        let global_need = self
            .ledger
            .total_usage()
            .saturating_sub(freed_by_group)
            .saturating_add(additional)
            .saturating_sub(limits.global_bytes);

        let global_plan = if global_need > 0 {
            let request = EvictionRequest::new(global_need)
                .for_requester(origin)
                .excluding(&claimed);
            Some(self.policy.select(&self.ledger, &request).map_err(|s| insufficient(s.missing()))?)
        } else {
            None
        };

        Ok((group_plan, global_plan))
    }

    /// Bring usage back under the current limits after a shrink or restart.
    ///
    /// Best effort: groups over their ceiling lose their oldest inactive
    /// origins first, then the global pass runs. Active origins are untouched,
    /// so usage may stay above the limit while they remain open.
    pub(crate) async fn enforce_limits(&mut self) -> EvictionReport {
        let mut report = EvictionReport::default();
        let Some(limits) = self.limits else {
            return report;
        };

        let mut over_groups: Vec<(GroupKey, u64)> = self
            .ledger
            .groups()
            .filter(|(_, usage)| *usage > limits.group_bytes)
            .map(|(group, usage)| (group.clone(), usage - limits.group_bytes))
            .collect();
        over_groups.sort();

        for (group, need) in over_groups {
            let plan = self
                .policy
                .select_best_effort(&self.ledger, &EvictionRequest::new(need).in_group(&group));
            info!(group = %group, need, victims = plan.victims.len(), "Group over quota - evicting");
            report.merge(self.execute_plan(plan, "shrink").await);
        }

        let need = self.ledger.total_usage().saturating_sub(limits.global_bytes);
        if need > 0 {
            let plan = self.policy.select_best_effort(&self.ledger, &EvictionRequest::new(need));
            info!(need, victims = plan.victims.len(), "Usage over quota - evicting");
            report.merge(self.execute_plan(plan, "shrink").await);
        }

        if self.ledger.total_usage() > limits.global_bytes {
            warn!(
                usage = self.ledger.total_usage(),
                limit = limits.global_bytes,
                active = self.ledger.active_origins(),
                "Usage still over quota - remaining bytes belong to active origins"
            );
        }

        report
    }
}

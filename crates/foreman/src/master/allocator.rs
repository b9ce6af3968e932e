//! Offer allocation.
//!
//! The allocator is an event-driven decision module owned by the master. It
//! keeps its own view of frameworks and free slave resources, built purely
//! from the events the master feeds it, and emits offer proposals. It never
//! mutates master state: the master applies every proposal transactionally
//! and silently drops proposals whose slave is gone by application time.

use crate::ids::{FrameworkId, SlaveId};
use crate::resources::Resources;
use std::collections::HashMap;
use tracing::debug;

/// A decision: offer `resources` from `slave_id` to `framework_id`.
#[derive(Debug, Clone, PartialEq)]
pub struct OfferProposal {
    pub framework_id: FrameworkId,
    pub slave_id: SlaveId,
    pub resources: Resources,
}

/// A decline filter: keep the identical resource shape on this slave away
/// from the framework until the filter expires.
#[derive(Debug, Clone)]
pub struct RefusalFilter {
    pub framework_id: FrameworkId,
    pub refuse_ms: u64,
}

/// The event protocol between the master and its allocator. Every call may
/// emit offer proposals; `now_ms` comes from the master's clock so paused
/// test clocks drive filter expiry.
pub trait Allocator: Send + 'static {
    fn framework_added(
        &mut self,
        now_ms: u64,
        framework_id: &FrameworkId,
        registered_at_ms: u64,
    ) -> Vec<OfferProposal>;

    fn framework_removed(&mut self, now_ms: u64, framework_id: &FrameworkId)
        -> Vec<OfferProposal>;

    /// The framework's total allocation (used plus outstanding offers)
    /// changed.
    fn framework_resources_changed(
        &mut self,
        now_ms: u64,
        framework_id: &FrameworkId,
        allocation: &Resources,
    ) -> Vec<OfferProposal>;

    fn slave_added(
        &mut self,
        now_ms: u64,
        slave_id: &SlaveId,
        total: &Resources,
        free: &Resources,
    ) -> Vec<OfferProposal>;

    fn slave_removed(&mut self, now_ms: u64, slave_id: &SlaveId) -> Vec<OfferProposal>;

    /// Resources returned to a slave's free pool: an offer was declined or
    /// partially used, or a task reached a terminal state.
    fn resources_recovered(
        &mut self,
        now_ms: u64,
        slave_id: &SlaveId,
        resources: &Resources,
        filter: Option<RefusalFilter>,
    ) -> Vec<OfferProposal>;

    /// Drops every filter held against the framework.
    fn offers_revived(&mut self, now_ms: u64, framework_id: &FrameworkId) -> Vec<OfferProposal>;

    /// A framework hinted at what it wants; purely advisory.
    fn resource_request(
        &mut self,
        now_ms: u64,
        framework_id: &FrameworkId,
        resources: &Resources,
    ) -> Vec<OfferProposal>;

    /// Periodic batch round: expire filters, then re-allocate.
    fn tick(&mut self, now_ms: u64) -> Vec<OfferProposal>;
}

struct FrameworkEntry {
    registered_at_ms: u64,
    allocation: Resources,
}

struct SlaveEntry {
    total: Resources,
    free: Resources,
}

struct Filter {
    framework_id: FrameworkId,
    slave_id: SlaveId,
    resources: Resources,
    expires_at_ms: u64,
}

/// Dominant-share fairness.
///
/// Whenever a slave has free resources and at least one unfiltered
/// framework exists, the slave's entire free pool goes to the framework
/// whose dominant share (largest allocated component divided by the cluster
/// total of that component) is smallest, ties broken by earliest
/// registration.
pub struct DrfAllocator {
    frameworks: HashMap<FrameworkId, FrameworkEntry>,
    slaves: HashMap<SlaveId, SlaveEntry>,
    filters: Vec<Filter>,
}

impl DrfAllocator {
    pub fn new() -> Self {
        Self {
            frameworks: HashMap::new(),
            slaves: HashMap::new(),
            filters: Vec::new(),
        }
    }

    fn cluster_totals(&self) -> Resources {
        self.slaves
            .values()
            .fold(Resources::empty(), |acc, slave| acc.plus(&slave.total))
    }

    fn dominant_share(allocation: &Resources, totals: &Resources) -> f64 {
        allocation
            .quantities()
            .filter_map(|(name, quantity)| {
                let total = totals
                    .quantities()
                    .find(|(t, _)| *t == name)
                    .map(|(_, q)| q)?;
                (total > 0.0).then_some(quantity / total)
            })
            .fold(0.0, f64::max)
    }

    fn filtered(&self, now_ms: u64, framework_id: &FrameworkId, slave_id: &SlaveId, resources: &Resources) -> bool {
        self.filters.iter().any(|filter| {
            filter.expires_at_ms > now_ms
                && filter.framework_id == *framework_id
                && filter.slave_id == *slave_id
                && filter.resources == *resources
        })
    }

    /// One allocation round over every slave with a non-empty free pool.
    fn allocate(&mut self, now_ms: u64) -> Vec<OfferProposal> {
        let totals = self.cluster_totals();
        let mut slave_ids: Vec<SlaveId> = self
            .slaves
            .iter()
            .filter(|(_, entry)| !entry.free.is_empty())
            .map(|(id, _)| id.clone())
            .collect();
        slave_ids.sort();

        let mut proposals = Vec::new();
        for slave_id in slave_ids {
            let free = match self.slaves.get(&slave_id) {
                Some(entry) if !entry.free.is_empty() => entry.free.clone(),
                _ => continue,
            };
            let winner = self
                .frameworks
                .iter()
                .filter(|(id, _)| !self.filtered(now_ms, id, &slave_id, &free))
                .min_by(|(a_id, a), (b_id, b)| {
                    let a_share = Self::dominant_share(&a.allocation, &totals);
                    let b_share = Self::dominant_share(&b.allocation, &totals);
                    a_share
                        .total_cmp(&b_share)
                        .then(a.registered_at_ms.cmp(&b.registered_at_ms))
                        .then(a_id.cmp(b_id))
                })
                .map(|(id, _)| id.clone());
            let Some(framework_id) = winner else { continue };

            debug!(%framework_id, %slave_id, resources = %free, "proposing offer");
            if let Some(framework) = self.frameworks.get_mut(&framework_id) {
                framework.allocation = framework.allocation.plus(&free);
            }
            if let Some(slave) = self.slaves.get_mut(&slave_id) {
                slave.free = Resources::empty();
            }
            proposals.push(OfferProposal {
                framework_id,
                slave_id,
                resources: free,
            });
        }
        proposals
    }
}

impl Default for DrfAllocator {
    fn default() -> Self {
        Self::new()
    }
}

impl Allocator for DrfAllocator {
    fn framework_added(
        &mut self,
        now_ms: u64,
        framework_id: &FrameworkId,
        registered_at_ms: u64,
    ) -> Vec<OfferProposal> {
        self.frameworks
            .entry(framework_id.clone())
            .or_insert(FrameworkEntry {
                registered_at_ms,
                allocation: Resources::empty(),
            });
        self.allocate(now_ms)
    }

    fn framework_removed(
        &mut self,
        now_ms: u64,
        framework_id: &FrameworkId,
    ) -> Vec<OfferProposal> {
        self.frameworks.remove(framework_id);
        self.filters
            .retain(|filter| filter.framework_id != *framework_id);
        self.allocate(now_ms)
    }

    fn framework_resources_changed(
        &mut self,
        _now_ms: u64,
        framework_id: &FrameworkId,
        allocation: &Resources,
    ) -> Vec<OfferProposal> {
        if let Some(framework) = self.frameworks.get_mut(framework_id) {
            framework.allocation = allocation.clone();
        }
        Vec::new()
    }

    fn slave_added(
        &mut self,
        now_ms: u64,
        slave_id: &SlaveId,
        total: &Resources,
        free: &Resources,
    ) -> Vec<OfferProposal> {
        self.slaves.insert(
            slave_id.clone(),
            SlaveEntry {
                total: total.clone(),
                free: free.clone(),
            },
        );
        self.allocate(now_ms)
    }

    fn slave_removed(&mut self, _now_ms: u64, slave_id: &SlaveId) -> Vec<OfferProposal> {
        self.slaves.remove(slave_id);
        self.filters.retain(|filter| filter.slave_id != *slave_id);
        Vec::new()
    }

    fn resources_recovered(
        &mut self,
        now_ms: u64,
        slave_id: &SlaveId,
        resources: &Resources,
        filter: Option<RefusalFilter>,
    ) -> Vec<OfferProposal> {
        if let Some(slave) = self.slaves.get_mut(slave_id) {
            slave.free = slave.free.plus(resources);
        }
        if let Some(refusal) = filter {
            self.filters.push(Filter {
                framework_id: refusal.framework_id,
                slave_id: slave_id.clone(),
                resources: resources.clone(),
                expires_at_ms: now_ms + refusal.refuse_ms,
            });
        }
        self.allocate(now_ms)
    }

    fn offers_revived(&mut self, now_ms: u64, framework_id: &FrameworkId) -> Vec<OfferProposal> {
        self.filters
            .retain(|filter| filter.framework_id != *framework_id);
        self.allocate(now_ms)
    }

    fn resource_request(
        &mut self,
        _now_ms: u64,
        framework_id: &FrameworkId,
        resources: &Resources,
    ) -> Vec<OfferProposal> {
        // The batch round already offers whole free pools; the hint is
        // logged for operators and otherwise unused.
        debug!(%framework_id, resources = %resources, "resource request hint");
        Vec::new()
    }

    fn tick(&mut self, now_ms: u64) -> Vec<OfferProposal> {
        self.filters.retain(|filter| filter.expires_at_ms > now_ms);
        self.allocate(now_ms)
    }
}

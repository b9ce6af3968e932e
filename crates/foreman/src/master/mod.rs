//! The master: resource accountant and offer dispatcher.
//!
//! A single actor holds the authoritative view of slaves, frameworks, tasks,
//! and outstanding offers. It drives the [`allocator`], owns offer
//! lifetimes, and reconciles state after slave, framework, and executor
//! failures. Nothing here is persisted: a restarted master rebuilds its
//! world from slave re-registrations.
//!
//! Accounting invariant, per slave, at every quiescent point:
//! `total = free + offered + used`, componentwise, with `free` implicit.
//! Task resources return to the free pool exactly once, on the first
//! terminal transition the master observes.

pub mod allocator;

use crate::ids::{FrameworkId, MasterId, OfferId, SlaveId, TaskId};
use crate::messages::{self as proto, f2m, m2f, m2s, s2m, Ping, Pong, Task, TaskState, WireMessage};
use crate::resources::Resources;
use actor_runtime::{Actor, ActorAddr, ActorError, Context, EndpointReply, Envelope, EXITED, TIMEOUT};
use allocator::{Allocator, OfferProposal, RefusalFilter};
use async_trait::async_trait;
use bytes::Bytes;
use serde_json::json;
use std::collections::{HashMap, HashSet};
use std::fmt::Write as _;
use std::time::{Duration, SystemTime, UNIX_EPOCH};
use tracing::{debug, info, warn};

/// The actor name the master registers under.
pub const MASTER_ACTOR: &str = "master";

/// Message names the master installs for inbound remote frames.
pub const MASTER_INSTALLS: &[&str] = &[
    "F2M_REGISTER_FRAMEWORK",
    "F2M_REREGISTER_FRAMEWORK",
    "F2M_UNREGISTER_FRAMEWORK",
    "F2M_RESOURCE_REQUEST",
    "F2M_RESOURCE_OFFER_REPLY",
    "F2M_KILL_TASK",
    "F2M_FRAMEWORK_MESSAGE",
    "S2M_REGISTER_SLAVE",
    "S2M_REREGISTER_SLAVE",
    "S2M_STATUS_UPDATE",
    "S2M_FRAMEWORK_MESSAGE",
    "S2M_EXITED_EXECUTOR",
    "PING",
];

/// Batch tick: allocator round, filter expiry, framework failover scan.
const TICK_INTERVAL: Duration = Duration::from_secs(1);

/// Protocol error codes sent with `M2F_ERROR`.
const ERROR_UNKNOWN_OFFER: i32 = 1;
const ERROR_INVALID_TASKS: i32 = 2;
const ERROR_FAILOVER_DISABLED: i32 = 3;

struct FrameworkRecord {
    info: proto::FrameworkInfo,
    addr: ActorAddr,
    registered_at_ms: u64,
    active: bool,
    tasks: HashMap<TaskId, Task>,
    offers: HashSet<OfferId>,
    /// When inactive: the instant the framework is deleted unless it
    /// re-registers first.
    failover_deadline_ms: Option<u64>,
}

struct SlaveRecord {
    info: proto::SlaveInfo,
    addr: ActorAddr,
    registered_at_ms: u64,
    offered: Resources,
    used: Resources,
    offers: HashSet<OfferId>,
    tasks: HashSet<(FrameworkId, TaskId)>,
}

struct OfferRecord {
    framework_id: FrameworkId,
    slave_id: SlaveId,
    resources: Resources,
    #[allow(dead_code)]
    created_at_ms: u64,
}

#[derive(Default)]
struct MasterStats {
    launched_tasks: u64,
    finished_tasks: u64,
    killed_tasks: u64,
    failed_tasks: u64,
    lost_tasks: u64,
    valid_status_updates: u64,
    invalid_status_updates: u64,
    valid_framework_messages: u64,
    invalid_framework_messages: u64,
    invalid_offer_replies: u64,
}

pub struct Master {
    id: MasterId,
    next_id: u64,
    frameworks: HashMap<FrameworkId, FrameworkRecord>,
    slaves: HashMap<SlaveId, SlaveRecord>,
    offers: HashMap<OfferId, OfferRecord>,
    allocator: Box<dyn Allocator>,
    stats: MasterStats,
    start_ms: u64,
    /// Configuration pairs surfaced by the `vars` endpoint.
    config_vars: Vec<(String, String)>,
}

impl Master {
    pub fn new(allocator: Box<dyn Allocator>, config_vars: Vec<(String, String)>) -> Self {
        let epoch = SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .map(|d| d.as_secs())
            .unwrap_or(0);
        Self {
            id: MasterId(format!("{epoch:x}")),
            next_id: 0,
            frameworks: HashMap::new(),
            slaves: HashMap::new(),
            offers: HashMap::new(),
            allocator,
            stats: MasterStats::default(),
            start_ms: 0,
            config_vars,
        }
    }

    fn mint(&mut self) -> String {
        let n = self.next_id;
        self.next_id += 1;
        format!("{}-{n}", self.id)
    }

    /// A framework's total allocation: task resources plus outstanding
    /// offers, the quantity the allocator ranks fairness on.
    fn allocation(&self, framework_id: &FrameworkId) -> Resources {
        let Some(framework) = self.frameworks.get(framework_id) else {
            return Resources::empty();
        };
        let mut total = framework
            .tasks
            .values()
            .fold(Resources::empty(), |acc, task| acc.plus(&task.resources));
        for offer_id in &framework.offers {
            if let Some(offer) = self.offers.get(offer_id) {
                total = total.plus(&offer.resources);
            }
        }
        total
    }

    /// Applies allocator decisions transactionally: create the offer entity,
    /// debit the slave's offered pool, send the offer. Decisions naming a
    /// framework or slave that is gone by application time are dropped.
    fn apply_proposals(
        &mut self,
        ctx: &mut Context,
        proposals: Vec<OfferProposal>,
    ) -> Result<(), ActorError> {
        for proposal in proposals {
            if proposal.resources.is_empty() {
                continue;
            }
            if !self.slaves.contains_key(&proposal.slave_id) {
                debug!(slave_id = %proposal.slave_id, "dropping offer for unknown slave");
                continue;
            }
            let Some((framework_addr, active)) = self
                .frameworks
                .get(&proposal.framework_id)
                .map(|f| (f.addr.clone(), f.active))
            else {
                debug!(framework_id = %proposal.framework_id, "dropping offer for unknown framework");
                continue;
            };
            if !active {
                debug!(framework_id = %proposal.framework_id, "dropping offer for inactive framework");
                continue;
            }

            let offer_id = OfferId(self.mint());
            let slave = self
                .slaves
                .get_mut(&proposal.slave_id)
                .expect("slave checked above");
            slave.offered = slave.offered.plus(&proposal.resources);
            slave.offers.insert(offer_id.clone());
            let hostname = slave.info.public_hostname.clone();
            if let Some(framework) = self.frameworks.get_mut(&proposal.framework_id) {
                framework.offers.insert(offer_id.clone());
            }
            self.offers.insert(
                offer_id.clone(),
                OfferRecord {
                    framework_id: proposal.framework_id.clone(),
                    slave_id: proposal.slave_id.clone(),
                    resources: proposal.resources.clone(),
                    created_at_ms: ctx.now_ms(),
                },
            );

            info!(
                %offer_id,
                framework_id = %proposal.framework_id,
                slave_id = %proposal.slave_id,
                resources = %proposal.resources,
                "sending offer"
            );
            proto::send(
                ctx,
                &framework_addr,
                &m2f::ResourceOffer {
                    offer_id,
                    slave_id: proposal.slave_id,
                    hostname,
                    resources: proposal.resources,
                },
            )?;
        }
        Ok(())
    }

    /// Deletes the offer entity and credits its resources back to the
    /// slave's free pool. Does not notify the framework.
    fn return_offer(
        &mut self,
        ctx: &mut Context,
        offer_id: &OfferId,
        filter: Option<RefusalFilter>,
    ) -> Result<(), ActorError> {
        let Some(offer) = self.offers.remove(offer_id) else {
            return Ok(());
        };
        if let Some(framework) = self.frameworks.get_mut(&offer.framework_id) {
            framework.offers.remove(offer_id);
        }
        let mut recovered = false;
        if let Some(slave) = self.slaves.get_mut(&offer.slave_id) {
            match slave.offered.minus(&offer.resources) {
                Ok(rest) => {
                    slave.offered = rest;
                    slave.offers.remove(offer_id);
                    recovered = true;
                }
                Err(e) => {
                    // Offered accounting out of step with the offer table.
                    panic!("offer {offer_id} exceeds slave {} offered pool: {e}", offer.slave_id);
                }
            }
        }
        if recovered {
            let now = ctx.now_ms();
            let proposals =
                self.allocator
                    .resources_recovered(now, &offer.slave_id, &offer.resources, filter);
            self.apply_proposals(ctx, proposals)?;
        }
        Ok(())
    }

    fn register_framework(
        &mut self,
        ctx: &mut Context,
        msg: f2m::RegisterFramework,
        from: ActorAddr,
    ) -> Result<(), ActorError> {
        let framework_id = FrameworkId(self.mint());
        let now = ctx.now_ms();
        info!(%framework_id, name = %msg.framework.name, addr = %from, "registering framework");
        ctx.link(&from);
        self.frameworks.insert(
            framework_id.clone(),
            FrameworkRecord {
                info: msg.framework,
                addr: from.clone(),
                registered_at_ms: now,
                active: true,
                tasks: HashMap::new(),
                offers: HashSet::new(),
                failover_deadline_ms: None,
            },
        );
        proto::send(
            ctx,
            &from,
            &m2f::FrameworkRegistered {
                framework_id: framework_id.clone(),
            },
        )?;
        let proposals = self.allocator.framework_added(now, &framework_id, now);
        self.apply_proposals(ctx, proposals)
    }

    fn reregister_framework(
        &mut self,
        ctx: &mut Context,
        msg: f2m::ReregisterFramework,
        from: ActorAddr,
    ) -> Result<(), ActorError> {
        let now = ctx.now_ms();
        let framework_id = msg.framework_id.clone();
        match self.frameworks.get_mut(&framework_id) {
            Some(framework) => {
                info!(%framework_id, addr = %from, "framework re-registered");
                framework.addr = from.clone();
                framework.active = true;
                framework.failover_deadline_ms = None;
                framework.info = msg.framework;
            }
            None if msg.failover => {
                // A framework surviving a master restart brings its id along.
                info!(%framework_id, addr = %from, "framework re-registered with unknown id (failover)");
                self.frameworks.insert(
                    framework_id.clone(),
                    FrameworkRecord {
                        info: msg.framework,
                        addr: from.clone(),
                        registered_at_ms: now,
                        active: true,
                        tasks: HashMap::new(),
                        offers: HashSet::new(),
                        failover_deadline_ms: None,
                    },
                );
            }
            None => {
                warn!(%framework_id, "re-registration for unknown framework without failover");
                proto::send(
                    ctx,
                    &from,
                    &m2f::ProtocolError {
                        code: ERROR_FAILOVER_DISABLED,
                        message: format!("framework {framework_id} is not registered"),
                    },
                )?;
                return Ok(());
            }
        }
        ctx.link(&from);
        proto::send(
            ctx,
            &from,
            &m2f::FrameworkReregistered {
                framework_id: framework_id.clone(),
            },
        )?;

        // Executor traffic has to reach the new scheduler address.
        let hosting: HashSet<SlaveId> = self
            .frameworks
            .get(&framework_id)
            .map(|f| f.tasks.values().map(|t| t.slave_id.clone()).collect())
            .unwrap_or_default();
        for slave_id in hosting {
            if let Some(slave) = self.slaves.get(&slave_id) {
                proto::send(
                    ctx,
                    &slave.addr,
                    &m2s::UpdateFramework {
                        framework_id: framework_id.clone(),
                        framework_addr: from.clone(),
                    },
                )?;
            }
        }

        let allocation = self.allocation(&framework_id);
        let registered_at = self
            .frameworks
            .get(&framework_id)
            .map(|f| f.registered_at_ms)
            .unwrap_or(now);
        let mut proposals = self
            .allocator
            .framework_added(now, &framework_id, registered_at);
        proposals.extend(
            self.allocator
                .framework_resources_changed(now, &framework_id, &allocation),
        );
        proposals.extend(self.allocator.offers_revived(now, &framework_id));
        self.apply_proposals(ctx, proposals)
    }

    fn unregister_framework(
        &mut self,
        ctx: &mut Context,
        msg: f2m::UnregisterFramework,
    ) -> Result<(), ActorError> {
        info!(framework_id = %msg.framework_id, "framework unregistered");
        self.deactivate_framework(ctx, &msg.framework_id)
    }

    /// Marks the framework inactive, rescinds its offers, drops it from the
    /// allocator, and starts the failover timer. Running tasks continue.
    fn deactivate_framework(
        &mut self,
        ctx: &mut Context,
        framework_id: &FrameworkId,
    ) -> Result<(), ActorError> {
        let now = ctx.now_ms();
        let Some(framework) = self.frameworks.get_mut(framework_id) else {
            return Ok(());
        };
        framework.active = false;
        let failover_ms = (framework.info.failover_timeout_secs * 1000.0) as u64;
        framework.failover_deadline_ms = Some(now + failover_ms);
        let outstanding: Vec<OfferId> = framework.offers.iter().cloned().collect();
        for offer_id in outstanding {
            self.return_offer(ctx, &offer_id, None)?;
        }
        let proposals = self.allocator.framework_removed(now, framework_id);
        self.apply_proposals(ctx, proposals)?;
        if failover_ms == 0 {
            self.remove_framework(ctx, framework_id)?;
        }
        Ok(())
    }

    /// Final deletion: kills the framework's tasks on every slave and drops
    /// the record.
    fn remove_framework(
        &mut self,
        ctx: &mut Context,
        framework_id: &FrameworkId,
    ) -> Result<(), ActorError> {
        let Some(framework) = self.frameworks.remove(framework_id) else {
            return Ok(());
        };
        info!(%framework_id, tasks = framework.tasks.len(), "removing framework");
        let now = ctx.now_ms();
        let mut recovered: HashMap<SlaveId, Resources> = HashMap::new();
        let mut hosting: HashSet<SlaveId> = HashSet::new();
        for task in framework.tasks.values() {
            hosting.insert(task.slave_id.clone());
            if let Some(slave) = self.slaves.get_mut(&task.slave_id) {
                slave.tasks.remove(&(framework_id.clone(), task.task_id.clone()));
                match slave.used.minus(&task.resources) {
                    Ok(rest) => slave.used = rest,
                    Err(e) => panic!(
                        "task {} resources exceed slave {} used pool: {e}",
                        task.task_id, task.slave_id
                    ),
                }
                recovered
                    .entry(task.slave_id.clone())
                    .and_modify(|r| *r = r.plus(&task.resources))
                    .or_insert_with(|| task.resources.clone());
            }
            self.stats.killed_tasks += 1;
        }
        for slave_id in hosting {
            if let Some(slave) = self.slaves.get(&slave_id) {
                proto::send(
                    ctx,
                    &slave.addr,
                    &m2s::KillFramework {
                        framework_id: framework_id.clone(),
                    },
                )?;
            }
        }
        for offer_id in framework.offers.iter().cloned().collect::<Vec<_>>() {
            self.return_offer(ctx, &offer_id, None)?;
        }
        let mut proposals = self.allocator.framework_removed(now, framework_id);
        for (slave_id, resources) in recovered {
            proposals.extend(
                self.allocator
                    .resources_recovered(now, &slave_id, &resources, None),
            );
        }
        self.apply_proposals(ctx, proposals)
    }

    fn register_slave(
        &mut self,
        ctx: &mut Context,
        msg: s2m::RegisterSlave,
        from: ActorAddr,
    ) -> Result<(), ActorError> {
        let slave_id = SlaveId(self.mint());
        let now = ctx.now_ms();
        info!(%slave_id, hostname = %msg.slave.hostname, resources = %msg.slave.resources, "registering slave");
        ctx.link(&from);
        let total = msg.slave.resources.clone();
        self.slaves.insert(
            slave_id.clone(),
            SlaveRecord {
                info: msg.slave,
                addr: from.clone(),
                registered_at_ms: now,
                offered: Resources::empty(),
                used: Resources::empty(),
                offers: HashSet::new(),
                tasks: HashSet::new(),
            },
        );
        proto::send(
            ctx,
            &from,
            &m2s::SlaveRegistered {
                slave_id: slave_id.clone(),
            },
        )?;
        let proposals = self.allocator.slave_added(now, &slave_id, &total, &total);
        self.apply_proposals(ctx, proposals)
    }

    /// Slave re-registration after a master restart: merge the reported
    /// tasks into the authoritative view. Tasks of unknown frameworks are
    /// told to be killed; for tasks the master already tracks, the master's
    /// view wins.
    fn reregister_slave(
        &mut self,
        ctx: &mut Context,
        msg: s2m::ReregisterSlave,
        from: ActorAddr,
    ) -> Result<(), ActorError> {
        let now = ctx.now_ms();
        let slave_id = msg.slave_id.clone();
        ctx.link(&from);
        let known = self.slaves.contains_key(&slave_id);
        if !known {
            info!(%slave_id, hostname = %msg.slave.hostname, "slave re-registered with a fresh master");
            self.slaves.insert(
                slave_id.clone(),
                SlaveRecord {
                    info: msg.slave,
                    addr: from.clone(),
                    registered_at_ms: now,
                    offered: Resources::empty(),
                    used: Resources::empty(),
                    offers: HashSet::new(),
                    tasks: HashSet::new(),
                },
            );
        } else if let Some(slave) = self.slaves.get_mut(&slave_id) {
            info!(%slave_id, "slave re-registered");
            slave.addr = from.clone();
            slave.info = msg.slave;
        }

        for task in msg.tasks {
            if task.state.is_terminal() {
                continue;
            }
            let Some(framework) = self.frameworks.get_mut(&task.framework_id) else {
                warn!(task_id = %task.task_id, framework_id = %task.framework_id,
                      "re-registered slave reports task of unknown framework; killing");
                proto::send(
                    ctx,
                    &from,
                    &m2s::KillTask {
                        framework_id: task.framework_id.clone(),
                        task_id: task.task_id.clone(),
                    },
                )?;
                continue;
            };
            if framework.tasks.contains_key(&task.task_id) {
                // Already tracked; keep the master's view of its state.
                continue;
            }
            let key = (task.framework_id.clone(), task.task_id.clone());
            let resources = task.resources.clone();
            framework.tasks.insert(task.task_id.clone(), task);
            if let Some(slave) = self.slaves.get_mut(&slave_id) {
                slave.tasks.insert(key);
                slave.used = slave.used.plus(&resources);
            }
        }

        proto::send(
            ctx,
            &from,
            &m2s::SlaveReregistered {
                slave_id: slave_id.clone(),
            },
        )?;
        if !known {
            let (total, free) = match self.slaves.get(&slave_id) {
                Some(slave) => {
                    let total = slave.info.resources.clone();
                    let free = total.minus(&slave.used).unwrap_or_else(|e| {
                        panic!("slave {slave_id} reports more task resources than it has: {e}")
                    });
                    (total, free)
                }
                None => return Ok(()),
            };
            let proposals = self.allocator.slave_added(now, &slave_id, &total, &free);
            self.apply_proposals(ctx, proposals)?;
        }
        Ok(())
    }

    /// Atomic offer consumption: validate every task against the offer,
    /// launch all of them or none, and return whatever remains to the free
    /// pool immediately.
    fn offer_reply(
        &mut self,
        ctx: &mut Context,
        msg: f2m::ResourceOfferReply,
        from: ActorAddr,
    ) -> Result<(), ActorError> {
        let now = ctx.now_ms();
        let Some(offer) = self.offers.get(&msg.offer_id) else {
            debug!(offer_id = %msg.offer_id, "reply to unknown offer");
            self.stats.invalid_offer_replies += 1;
            proto::send(
                ctx,
                &from,
                &m2f::ProtocolError {
                    code: ERROR_UNKNOWN_OFFER,
                    message: format!("offer {} is not outstanding", msg.offer_id),
                },
            )?;
            return Ok(());
        };
        let framework_id = offer.framework_id.clone();
        let slave_id = offer.slave_id.clone();
        let offer_resources = offer.resources.clone();

        let framework_live = self
            .frameworks
            .get(&framework_id)
            .map(|f| f.active)
            .unwrap_or(false);
        let slave_live = self.slaves.contains_key(&slave_id);

        // Validate tasks left to right, each debiting the running remainder.
        let mut remaining = offer_resources.clone();
        let mut seen: HashSet<TaskId> = HashSet::new();
        let mut rejection: Option<String> = None;
        if !framework_live || !slave_live {
            rejection = Some("offer no longer valid".to_string());
        } else {
            for task in &msg.tasks {
                let duplicate = seen.contains(&task.task_id)
                    || self
                        .frameworks
                        .get(&framework_id)
                        .map(|f| f.tasks.contains_key(&task.task_id))
                        .unwrap_or(false);
                if duplicate {
                    rejection = Some(format!("duplicate task id {}", task.task_id));
                    break;
                }
                seen.insert(task.task_id.clone());
                match remaining.minus(&task.resources) {
                    Ok(rest) => remaining = rest,
                    Err(_) => {
                        rejection = Some(format!(
                            "task {} requests {} but only {} remain in offer {}",
                            task.task_id, task.resources, remaining, msg.offer_id
                        ));
                        break;
                    }
                }
            }
        }

        if let Some(reason) = rejection {
            warn!(offer_id = %msg.offer_id, %framework_id, reason, "rejecting offer reply");
            self.stats.invalid_offer_replies += 1;
            // The whole offer goes back to the free pool.
            self.return_offer(ctx, &msg.offer_id, None)?;
            if let Some(framework) = self.frameworks.get(&framework_id) {
                proto::send(
                    ctx,
                    &framework.addr,
                    &m2f::ProtocolError {
                        code: ERROR_INVALID_TASKS,
                        message: reason,
                    },
                )?;
            }
            return Ok(());
        }

        // Commit: the offer entity dies, tasks move offered -> used, the
        // remainder moves offered -> free.
        self.offers.remove(&msg.offer_id);
        let (framework_addr, framework_info, default_executor) = {
            let framework = self
                .frameworks
                .get_mut(&framework_id)
                .expect("framework checked above");
            framework.offers.remove(&msg.offer_id);
            (
                framework.addr.clone(),
                framework.info.clone(),
                framework.info.executor.executor_id.clone(),
            )
        };
        {
            let slave = self.slaves.get_mut(&slave_id).expect("slave checked above");
            slave.offers.remove(&msg.offer_id);
            match slave.offered.minus(&offer_resources) {
                Ok(rest) => slave.offered = rest,
                Err(e) => panic!("offer {} exceeds slave {slave_id} offered pool: {e}", msg.offer_id),
            }
        }

        let slave_addr = self
            .slaves
            .get(&slave_id)
            .map(|s| s.addr.clone())
            .expect("slave checked above");
        for task in msg.tasks {
            let executor_id = task
                .executor
                .as_ref()
                .map(|e| e.executor_id.clone())
                .unwrap_or_else(|| default_executor.clone());
            info!(task_id = %task.task_id, %framework_id, %slave_id, resources = %task.resources, "launching task");
            let record = Task {
                task_id: task.task_id.clone(),
                framework_id: framework_id.clone(),
                executor_id,
                slave_id: slave_id.clone(),
                name: task.name.clone(),
                resources: task.resources.clone(),
                state: TaskState::Staging,
            };
            if let Some(framework) = self.frameworks.get_mut(&framework_id) {
                framework.tasks.insert(task.task_id.clone(), record);
            }
            if let Some(slave) = self.slaves.get_mut(&slave_id) {
                slave.tasks.insert((framework_id.clone(), task.task_id.clone()));
                slave.used = slave.used.plus(&task.resources);
            }
            self.stats.launched_tasks += 1;
            proto::send(
                ctx,
                &slave_addr,
                &m2s::RunTask {
                    framework_id: framework_id.clone(),
                    framework: framework_info.clone(),
                    framework_addr: framework_addr.clone(),
                    task,
                },
            )?;
        }

        let allocation = self.allocation(&framework_id);
        let mut proposals =
            self.allocator
                .framework_resources_changed(now, &framework_id, &allocation);
        if !remaining.is_empty() {
            // Unused remainder returns to free immediately; a declined
            // shape is kept away from this framework while the filter
            // lasts.
            let filter = (msg.filters.refuse_secs > 0.0).then(|| RefusalFilter {
                framework_id: framework_id.clone(),
                refuse_ms: (msg.filters.refuse_secs * 1000.0) as u64,
            });
            proposals.extend(
                self.allocator
                    .resources_recovered(now, &slave_id, &remaining, filter),
            );
        }
        self.apply_proposals(ctx, proposals)
    }

    fn kill_task(&mut self, ctx: &mut Context, msg: f2m::KillTask) -> Result<(), ActorError> {
        let Some(framework) = self.frameworks.get(&msg.framework_id) else {
            warn!(framework_id = %msg.framework_id, "kill_task for unknown framework");
            return Ok(());
        };
        match framework.tasks.get(&msg.task_id) {
            Some(task) => {
                if let Some(slave) = self.slaves.get(&task.slave_id) {
                    proto::send(
                        ctx,
                        &slave.addr,
                        &m2s::KillTask {
                            framework_id: msg.framework_id,
                            task_id: msg.task_id,
                        },
                    )?;
                }
            }
            None => {
                // Best effort: the task is already gone, tell the scheduler.
                let addr = framework.addr.clone();
                proto::send(
                    ctx,
                    &addr,
                    &m2f::StatusUpdate {
                        framework_id: msg.framework_id,
                        status: proto::TaskStatus {
                            task_id: msg.task_id,
                            slave_id: SlaveId(String::new()),
                            state: TaskState::Lost,
                            message: "task is unknown to the master".to_string(),
                        },
                    },
                )?;
            }
        }
        Ok(())
    }

    /// Validates, accounts, forwards to the framework, and acks the slave.
    /// Duplicate terminal updates are expected (at-least-once delivery) and
    /// must not credit resources twice.
    fn status_update(
        &mut self,
        ctx: &mut Context,
        msg: s2m::StatusUpdate,
        from: ActorAddr,
    ) -> Result<(), ActorError> {
        let status = msg.status;
        let framework_known = self.frameworks.contains_key(&msg.framework_id);
        let slave_known = self.slaves.contains_key(&status.slave_id);
        if !framework_known || !slave_known {
            warn!(
                framework_id = %msg.framework_id,
                slave_id = %status.slave_id,
                task_id = %status.task_id,
                "status update for unknown framework or slave; dropped"
            );
            self.stats.invalid_status_updates += 1;
            return Ok(());
        }
        info!(task_id = %status.task_id, state = %status.state, framework_id = %msg.framework_id, "status update");
        self.stats.valid_status_updates += 1;

        let now = ctx.now_ms();
        let mut recovered: Option<Resources> = None;
        if let Some(framework) = self.frameworks.get_mut(&msg.framework_id) {
            let first_terminal = framework
                .tasks
                .get(&status.task_id)
                .map(|task| status.state.is_terminal() && !task.state.is_terminal())
                .unwrap_or(false);
            if first_terminal {
                if let Some(task) = framework.tasks.remove(&status.task_id) {
                    recovered = Some(task.resources.clone());
                    match status.state {
                        TaskState::Finished => self.stats.finished_tasks += 1,
                        TaskState::Failed => self.stats.failed_tasks += 1,
                        TaskState::Killed => self.stats.killed_tasks += 1,
                        TaskState::Lost => self.stats.lost_tasks += 1,
                        _ => {}
                    }
                    if let Some(slave) = self.slaves.get_mut(&status.slave_id) {
                        slave.tasks.remove(&(msg.framework_id.clone(), status.task_id.clone()));
                        match slave.used.minus(&task.resources) {
                            Ok(rest) => slave.used = rest,
                            Err(e) => panic!(
                                "task {} resources exceed slave {} used pool: {e}",
                                status.task_id, status.slave_id
                            ),
                        }
                    }
                }
            } else if let Some(task) = framework.tasks.get_mut(&status.task_id) {
                // The lattice only moves forward; late lesser states are
                // latched out.
                if state_rank(status.state) > state_rank(task.state) {
                    task.state = status.state;
                }
            }
        }

        if let Some(resources) = recovered {
            let allocation = self.allocation(&msg.framework_id);
            let mut proposals =
                self.allocator
                    .framework_resources_changed(now, &msg.framework_id, &allocation);
            proposals.extend(self.allocator.resources_recovered(
                now,
                &status.slave_id,
                &resources,
                None,
            ));
            self.apply_proposals(ctx, proposals)?;
        }

        let framework_addr = self
            .frameworks
            .get(&msg.framework_id)
            .map(|f| f.addr.clone())
            .expect("framework checked above");
        proto::send(
            ctx,
            &framework_addr,
            &m2f::StatusUpdate {
                framework_id: msg.framework_id.clone(),
                status: status.clone(),
            },
        )?;
        // Ack lets the slave clear its retry entry.
        let slave_addr = self
            .slaves
            .get(&status.slave_id)
            .map(|s| s.addr.clone())
            .unwrap_or(from);
        proto::send(
            ctx,
            &slave_addr,
            &m2s::StatusUpdateAck {
                slave_id: status.slave_id,
                framework_id: msg.framework_id,
                task_id: status.task_id,
            },
        )
    }

    /// Executor process exit, reported by the slave: every non-terminal
    /// task of that executor is lost.
    fn exited_executor(
        &mut self,
        ctx: &mut Context,
        msg: s2m::ExitedExecutor,
    ) -> Result<(), ActorError> {
        info!(
            executor_id = %msg.executor_id,
            framework_id = %msg.framework_id,
            slave_id = %msg.slave_id,
            exit_status = msg.exit_status,
            "executor exited"
        );
        let Some(framework) = self.frameworks.get_mut(&msg.framework_id) else {
            return Ok(());
        };
        let lost: Vec<Task> = framework
            .tasks
            .values()
            .filter(|task| {
                task.slave_id == msg.slave_id
                    && task.executor_id == msg.executor_id
                    && !task.state.is_terminal()
            })
            .cloned()
            .collect();
        let framework_addr = framework.addr.clone();
        let now = ctx.now_ms();
        let mut recovered = Resources::empty();
        for task in &lost {
            framework.tasks.remove(&task.task_id);
            recovered = recovered.plus(&task.resources);
            self.stats.lost_tasks += 1;
        }
        if let Some(slave) = self.slaves.get_mut(&msg.slave_id) {
            for task in &lost {
                slave.tasks.remove(&(msg.framework_id.clone(), task.task_id.clone()));
                match slave.used.minus(&task.resources) {
                    Ok(rest) => slave.used = rest,
                    Err(e) => panic!(
                        "task {} resources exceed slave {} used pool: {e}",
                        task.task_id, msg.slave_id
                    ),
                }
            }
        }
        for task in &lost {
            proto::send(
                ctx,
                &framework_addr,
                &m2f::StatusUpdate {
                    framework_id: msg.framework_id.clone(),
                    status: proto::TaskStatus {
                        task_id: task.task_id.clone(),
                        slave_id: msg.slave_id.clone(),
                        state: TaskState::Lost,
                        message: format!("executor exited with status {}", msg.exit_status),
                    },
                },
            )?;
        }
        if !recovered.is_empty() {
            let allocation = self.allocation(&msg.framework_id);
            let mut proposals =
                self.allocator
                    .framework_resources_changed(now, &msg.framework_id, &allocation);
            proposals.extend(self.allocator.resources_recovered(
                now,
                &msg.slave_id,
                &recovered,
                None,
            ));
            self.apply_proposals(ctx, proposals)?;
        }
        Ok(())
    }

    /// Scheduler-to-executor forward, uninspected.
    fn framework_message(
        &mut self,
        ctx: &mut Context,
        msg: f2m::FrameworkMessage,
    ) -> Result<(), ActorError> {
        let valid = self.frameworks.contains_key(&msg.framework_id)
            && self.slaves.contains_key(&msg.slave_id);
        if !valid {
            self.stats.invalid_framework_messages += 1;
            return Ok(());
        }
        self.stats.valid_framework_messages += 1;
        let slave_addr = self
            .slaves
            .get(&msg.slave_id)
            .map(|s| s.addr.clone())
            .expect("slave checked above");
        proto::send(
            ctx,
            &slave_addr,
            &m2s::FrameworkMessage {
                slave_id: msg.slave_id,
                framework_id: msg.framework_id,
                executor_id: msg.executor_id,
                data: msg.data,
            },
        )
    }

    /// Executor-to-scheduler forward; the outbound name is `M2F_*` for wire
    /// compatibility.
    fn executor_message(
        &mut self,
        ctx: &mut Context,
        msg: s2m::FrameworkMessage,
    ) -> Result<(), ActorError> {
        let Some(framework) = self.frameworks.get(&msg.framework_id) else {
            self.stats.invalid_framework_messages += 1;
            return Ok(());
        };
        self.stats.valid_framework_messages += 1;
        let addr = framework.addr.clone();
        proto::send(
            ctx,
            &addr,
            &m2f::FrameworkMessage {
                slave_id: msg.slave_id,
                framework_id: msg.framework_id,
                executor_id: msg.executor_id,
                data: msg.data,
            },
        )
    }

    /// A linked peer died: reconcile depending on what it was.
    fn peer_exited(&mut self, ctx: &mut Context, addr: ActorAddr) -> Result<(), ActorError> {
        if let Some((framework_id, _)) = self
            .frameworks
            .iter()
            .find(|(_, f)| f.addr == addr && f.active)
            .map(|(id, f)| (id.clone(), f.addr.clone()))
        {
            info!(%framework_id, %addr, "framework disconnected; starting failover timer");
            return self.deactivate_framework(ctx, &framework_id);
        }
        if let Some(slave_id) = self
            .slaves
            .iter()
            .find(|(_, s)| s.addr == addr)
            .map(|(id, _)| id.clone())
        {
            info!(%slave_id, %addr, "slave exited");
            return self.remove_slave(ctx, &slave_id);
        }
        debug!(%addr, "exit notification for unknown peer");
        Ok(())
    }

    /// Slave death: every task on it is lost, exactly one `LOST` update per
    /// task reaches its framework, offers on the slave die with it.
    fn remove_slave(&mut self, ctx: &mut Context, slave_id: &SlaveId) -> Result<(), ActorError> {
        let Some(slave) = self.slaves.remove(slave_id) else {
            return Ok(());
        };
        let now = ctx.now_ms();
        for (framework_id, task_id) in slave.tasks {
            let Some(framework) = self.frameworks.get_mut(&framework_id) else {
                continue;
            };
            let Some(task) = framework.tasks.remove(&task_id) else {
                continue;
            };
            self.stats.lost_tasks += 1;
            let framework_addr = framework.addr.clone();
            proto::send(
                ctx,
                &framework_addr,
                &m2f::StatusUpdate {
                    framework_id: framework_id.clone(),
                    status: proto::TaskStatus {
                        task_id: task.task_id,
                        slave_id: slave_id.clone(),
                        state: TaskState::Lost,
                        message: "slave exited".to_string(),
                    },
                },
            )?;
            let allocation = self.allocation(&framework_id);
            let proposals =
                self.allocator
                    .framework_resources_changed(now, &framework_id, &allocation);
            self.apply_proposals(ctx, proposals)?;
        }
        // Offers die with the slave; there is no pool to return them to.
        for offer_id in slave.offers {
            if let Some(offer) = self.offers.remove(&offer_id) {
                if let Some(framework) = self.frameworks.get_mut(&offer.framework_id) {
                    framework.offers.remove(&offer_id);
                    let addr = framework.addr.clone();
                    proto::send(
                        ctx,
                        &addr,
                        &m2f::RescindOffer {
                            offer_id: offer_id.clone(),
                        },
                    )?;
                }
            }
        }
        for framework in self.frameworks.values() {
            if framework.active {
                proto::send(
                    ctx,
                    &framework.addr,
                    &m2f::LostSlave {
                        slave_id: slave_id.clone(),
                    },
                )?;
            }
        }
        let proposals = self.allocator.slave_removed(now, slave_id);
        self.apply_proposals(ctx, proposals)
    }

    /// 1 Hz batch tick: allocator round (filter expiry included) and the
    /// framework failover scan.
    fn tick(&mut self, ctx: &mut Context) -> Result<(), ActorError> {
        let now = ctx.now_ms();
        let expired: Vec<FrameworkId> = self
            .frameworks
            .iter()
            .filter(|(_, f)| {
                !f.active && f.failover_deadline_ms.map(|d| d <= now).unwrap_or(false)
            })
            .map(|(id, _)| id.clone())
            .collect();
        for framework_id in expired {
            info!(%framework_id, "framework failover timeout expired");
            self.remove_framework(ctx, &framework_id)?;
        }
        let proposals = self.allocator.tick(now);
        self.apply_proposals(ctx, proposals)?;
        ctx.after(TICK_INTERVAL, TIMEOUT, Bytes::new());
        Ok(())
    }
}

fn state_rank(state: TaskState) -> u8 {
    match state {
        TaskState::Staging => 0,
        TaskState::Starting => 1,
        TaskState::Running => 2,
        _ => 3,
    }
}

#[async_trait]
impl Actor for Master {
    async fn started(&mut self, ctx: &mut Context) -> Result<(), ActorError> {
        self.start_ms = ctx.now_ms();
        info!(master_id = %self.id, addr = %ctx.self_addr(), "master started");
        ctx.after(TICK_INTERVAL, TIMEOUT, Bytes::new());
        Ok(())
    }

    async fn receive(&mut self, ctx: &mut Context, envelope: Envelope) -> Result<(), ActorError> {
        let from = envelope.from.clone();
        match envelope.name.as_str() {
            f2m::RegisterFramework::NAME => match proto::try_decode(&envelope) {
                Some(msg) => self.register_framework(ctx, msg, from),
                None => Ok(()),
            },
            f2m::ReregisterFramework::NAME => match proto::try_decode(&envelope) {
                Some(msg) => self.reregister_framework(ctx, msg, from),
                None => Ok(()),
            },
            f2m::UnregisterFramework::NAME => match proto::try_decode(&envelope) {
                Some(msg) => self.unregister_framework(ctx, msg),
                None => Ok(()),
            },
            f2m::ResourceRequest::NAME => match proto::try_decode::<f2m::ResourceRequest>(&envelope) {
                Some(msg) => {
                    let now = ctx.now_ms();
                    let proposals =
                        self.allocator
                            .resource_request(now, &msg.framework_id, &msg.resources);
                    self.apply_proposals(ctx, proposals)
                }
                None => Ok(()),
            },
            f2m::ResourceOfferReply::NAME => match proto::try_decode(&envelope) {
                Some(msg) => self.offer_reply(ctx, msg, from),
                None => Ok(()),
            },
            f2m::KillTask::NAME => match proto::try_decode(&envelope) {
                Some(msg) => self.kill_task(ctx, msg),
                None => Ok(()),
            },
            f2m::FrameworkMessage::NAME => match proto::try_decode(&envelope) {
                Some(msg) => self.framework_message(ctx, msg),
                None => Ok(()),
            },
            s2m::RegisterSlave::NAME => match proto::try_decode(&envelope) {
                Some(msg) => self.register_slave(ctx, msg, from),
                None => Ok(()),
            },
            s2m::ReregisterSlave::NAME => match proto::try_decode(&envelope) {
                Some(msg) => self.reregister_slave(ctx, msg, from),
                None => Ok(()),
            },
            s2m::StatusUpdate::NAME => match proto::try_decode(&envelope) {
                Some(msg) => self.status_update(ctx, msg, from),
                None => Ok(()),
            },
            s2m::FrameworkMessage::NAME => match proto::try_decode(&envelope) {
                Some(msg) => self.executor_message(ctx, msg),
                None => Ok(()),
            },
            s2m::ExitedExecutor::NAME => match proto::try_decode(&envelope) {
                Some(msg) => self.exited_executor(ctx, msg),
                None => Ok(()),
            },
            Ping::NAME => proto::send(ctx, &from, &Pong {}),
            TIMEOUT => self.tick(ctx),
            EXITED => self.peer_exited(ctx, from),
            other => {
                debug!(name = other, %from, "unhandled message");
                Ok(())
            }
        }
    }

    async fn endpoint(&mut self, ctx: &mut Context, name: &str) -> Option<EndpointReply> {
        match name {
            "info.json" => Some(EndpointReply::json(
                json!({
                    "master_id": self.id.to_string(),
                    "pid": ctx.self_addr().to_string(),
                    "start_time_ms": self.start_ms,
                    "uptime_ms": ctx.now_ms() - self.start_ms,
                })
                .to_string(),
            )),
            "frameworks.json" => {
                let frameworks: Vec<_> = self
                    .frameworks
                    .iter()
                    .map(|(id, f)| {
                        json!({
                            "id": id.to_string(),
                            "name": f.info.name,
                            "user": f.info.user,
                            "active": f.active,
                            "registered_at_ms": f.registered_at_ms,
                            "tasks": f.tasks.len(),
                        })
                    })
                    .collect();
                Some(EndpointReply::json(json!(frameworks).to_string()))
            }
            "slaves.json" => {
                let slaves: Vec<_> = self
                    .slaves
                    .iter()
                    .map(|(id, s)| {
                        let free = s
                            .info
                            .resources
                            .minus(&s.offered.plus(&s.used))
                            .unwrap_or_else(|_| Resources::empty());
                        json!({
                            "id": id.to_string(),
                            "hostname": s.info.hostname,
                            "public_hostname": s.info.public_hostname,
                            "total": s.info.resources.to_string(),
                            "offered": s.offered.to_string(),
                            "used": s.used.to_string(),
                            "free": free.to_string(),
                            "registered_at_ms": s.registered_at_ms,
                        })
                    })
                    .collect();
                Some(EndpointReply::json(json!(slaves).to_string()))
            }
            "tasks.json" => {
                let tasks: Vec<_> = self
                    .frameworks
                    .values()
                    .flat_map(|f| f.tasks.values())
                    .map(|task| {
                        json!({
                            "task_id": task.task_id.to_string(),
                            "framework_id": task.framework_id.to_string(),
                            "slave_id": task.slave_id.to_string(),
                            "executor_id": task.executor_id.to_string(),
                            "name": task.name,
                            "state": task.state.to_string(),
                            "resources": task.resources.to_string(),
                        })
                    })
                    .collect();
                Some(EndpointReply::json(json!(tasks).to_string()))
            }
            "stats.json" => Some(EndpointReply::json(
                json!({
                    "uptime_ms": ctx.now_ms() - self.start_ms,
                    "total_frameworks": self.frameworks.len(),
                    "total_slaves": self.slaves.len(),
                    "outstanding_offers": self.offers.len(),
                    "launched_tasks": self.stats.launched_tasks,
                    "finished_tasks": self.stats.finished_tasks,
                    "killed_tasks": self.stats.killed_tasks,
                    "failed_tasks": self.stats.failed_tasks,
                    "lost_tasks": self.stats.lost_tasks,
                    "valid_status_updates": self.stats.valid_status_updates,
                    "invalid_status_updates": self.stats.invalid_status_updates,
                    "valid_framework_messages": self.stats.valid_framework_messages,
                    "invalid_framework_messages": self.stats.invalid_framework_messages,
                    "invalid_offer_replies": self.stats.invalid_offer_replies,
                })
                .to_string(),
            )),
            "vars" => {
                let mut out = String::new();
                for (key, value) in &self.config_vars {
                    let _ = writeln!(out, "{key} {value}");
                }
                let _ = writeln!(out, "uptime_ms {}", ctx.now_ms() - self.start_ms);
                let _ = writeln!(out, "total_frameworks {}", self.frameworks.len());
                let _ = writeln!(out, "total_slaves {}", self.slaves.len());
                let _ = writeln!(out, "outstanding_offers {}", self.offers.len());
                let _ = writeln!(out, "launched_tasks {}", self.stats.launched_tasks);
                let _ = writeln!(out, "finished_tasks {}", self.stats.finished_tasks);
                let _ = writeln!(out, "killed_tasks {}", self.stats.killed_tasks);
                let _ = writeln!(out, "failed_tasks {}", self.stats.failed_tasks);
                let _ = writeln!(out, "lost_tasks {}", self.stats.lost_tasks);
                let _ = writeln!(out, "valid_status_updates {}", self.stats.valid_status_updates);
                let _ = writeln!(out, "invalid_status_updates {}", self.stats.invalid_status_updates);
                let _ = writeln!(out, "valid_framework_messages {}", self.stats.valid_framework_messages);
                let _ = writeln!(out, "invalid_framework_messages {}", self.stats.invalid_framework_messages);
                Some(EndpointReply::text(out))
            }
            _ => None,
        }
    }
}

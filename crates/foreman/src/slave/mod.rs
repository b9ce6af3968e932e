//! The slave: local executor supervisor.
//!
//! A single actor tracks the frameworks with presence on this machine, the
//! executors it launched for them through the isolation module, and the
//! status updates still awaiting a master acknowledgement. Status updates
//! are delivered at least once: every entry in the retry table is resent
//! until the master acks it or the framework disappears.

pub mod isolation;
pub mod reaper;

use crate::ids::{ExecutorId, FrameworkId, SlaveId, TaskId};
use crate::messages::{
    self as proto, e2s, m2s, oracle, r2s, s2e, s2m, ExecutorArgs, FrameworkInfo, Ping, Pong,
    SlaveInfo, Task, TaskDescription, TaskState, TaskStatus, WireMessage,
};
use crate::resources::Resources;
use actor_runtime::{
    Actor, ActorAddr, ActorError, Context, EndpointReply, Envelope, EXITED, TIMEOUT,
};
use async_trait::async_trait;
use bytes::Bytes;
use isolation::{ExecutorLaunch, IsolationModule};
use serde_json::json;
use std::collections::{BTreeMap, HashMap};
use std::fmt::Write as _;
use std::path::PathBuf;
use std::time::Duration;
use tracing::{debug, info, warn};

/// The actor name the slave registers under.
pub const SLAVE_ACTOR: &str = "slave";

/// Message names the slave installs for inbound remote frames.
pub const SLAVE_INSTALLS: &[&str] = &[
    "M2S_REGISTER_REPLY",
    "M2S_REREGISTER_REPLY",
    "M2S_RUN_TASK",
    "M2S_KILL_TASK",
    "M2S_KILL_FRAMEWORK",
    "M2S_FRAMEWORK_MESSAGE",
    "M2S_UPDATE_FRAMEWORK",
    "M2S_STATUS_UPDATE_ACK",
    "E2S_REGISTER_EXECUTOR",
    "E2S_STATUS_UPDATE",
    "E2S_FRAMEWORK_MESSAGE",
    "R2S_EXECUTOR_EXITED",
    "NEW_MASTER_DETECTED",
    "NO_MASTER_DETECTED",
    "PING",
];

/// How long an unacknowledged status update waits before it is resent.
pub const STATUS_UPDATE_RETRY_INTERVAL: Duration = Duration::from_secs(10);

/// Retry scan tick.
const TICK_INTERVAL: Duration = Duration::from_secs(1);

struct ExecutorRecord {
    info: proto::ExecutorInfo,
    /// Unset until the executor registers; tasks queue meanwhile.
    addr: Option<ActorAddr>,
    directory: PathBuf,
    tasks: HashMap<TaskId, Task>,
    queued: Vec<TaskDescription>,
    /// Sum over `tasks` (queued tasks are not counted).
    resources: Resources,
}

struct FrameworkOnSlave {
    info: FrameworkInfo,
    scheduler_addr: ActorAddr,
    executors: HashMap<ExecutorId, ExecutorRecord>,
    /// Pending-ack table: deadline -> task -> last status.
    statuses: BTreeMap<u64, HashMap<TaskId, TaskStatus>>,
}

#[derive(Default)]
struct SlaveStats {
    launched_tasks: u64,
    finished_tasks: u64,
    killed_tasks: u64,
    failed_tasks: u64,
    lost_tasks: u64,
    valid_status_updates: u64,
    invalid_status_updates: u64,
    valid_framework_messages: u64,
    invalid_framework_messages: u64,
}

pub struct Slave {
    id: Option<SlaveId>,
    info: SlaveInfo,
    master: ActorAddr,
    connected: bool,
    frameworks: HashMap<FrameworkId, FrameworkOnSlave>,
    isolation: Box<dyn IsolationModule>,
    work_dir: PathBuf,
    stats: SlaveStats,
    start_ms: u64,
    config_vars: Vec<(String, String)>,
}

impl Slave {
    pub fn new(
        info: SlaveInfo,
        isolation: Box<dyn IsolationModule>,
        work_dir: PathBuf,
        config_vars: Vec<(String, String)>,
    ) -> Self {
        Self {
            id: None,
            info,
            master: ActorAddr::none(),
            connected: false,
            frameworks: HashMap::new(),
            isolation,
            work_dir,
            stats: SlaveStats::default(),
            start_ms: 0,
            config_vars,
        }
    }

    /// Records the status for retry and forwards it to the master once.
    fn enqueue_status(
        &mut self,
        ctx: &mut Context,
        framework_id: &FrameworkId,
        status: TaskStatus,
    ) -> Result<(), ActorError> {
        let deadline = ctx.now_ms() + STATUS_UPDATE_RETRY_INTERVAL.as_millis() as u64;
        if let Some(framework) = self.frameworks.get_mut(framework_id) {
            framework
                .statuses
                .entry(deadline)
                .or_default()
                .insert(status.task_id.clone(), status.clone());
        }
        if self.connected {
            proto::send(
                ctx,
                &self.master,
                &s2m::StatusUpdate {
                    framework_id: framework_id.clone(),
                    status,
                },
            )?;
        }
        Ok(())
    }

    /// `<work_dir>/work/slave-<sid>/fw-<fid>-<eid>/<n>` with the smallest
    /// `n` that does not exist yet; the same executor may be launched more
    /// than once on one slave.
    async fn unique_work_directory(
        &self,
        slave_id: &SlaveId,
        framework_id: &FrameworkId,
        executor_id: &ExecutorId,
    ) -> PathBuf {
        let base = self
            .work_dir
            .join("work")
            .join(format!("slave-{slave_id}"))
            .join(format!("fw-{framework_id}-{executor_id}"));
        let mut n = 0u32;
        loop {
            let candidate = base.join(n.to_string());
            match tokio::fs::try_exists(&candidate).await {
                Ok(false) => return candidate,
                Ok(true) => n += 1,
                Err(_) => return candidate,
            }
        }
    }

    async fn new_master_detected(
        &mut self,
        ctx: &mut Context,
        msg: oracle::NewMasterDetected,
    ) -> Result<(), ActorError> {
        info!(master = %msg.master_addr, "new master detected");
        self.master = msg.master_addr;
        self.connected = true;
        ctx.link(&self.master);
        match &self.id {
            None => proto::send(
                ctx,
                &self.master,
                &s2m::RegisterSlave {
                    slave: self.info.clone(),
                },
            ),
            Some(slave_id) => {
                // Re-registration reports every live task so the master can
                // rebuild its view.
                let tasks: Vec<Task> = self
                    .frameworks
                    .values()
                    .flat_map(|f| f.executors.values())
                    .flat_map(|e| e.tasks.values())
                    .filter(|t| !t.state.is_terminal())
                    .cloned()
                    .collect();
                proto::send(
                    ctx,
                    &self.master,
                    &s2m::ReregisterSlave {
                        slave_id: slave_id.clone(),
                        slave: self.info.clone(),
                        tasks,
                    },
                )
            }
        }
    }

    async fn run_task(&mut self, ctx: &mut Context, msg: m2s::RunTask) -> Result<(), ActorError> {
        info!(task_id = %msg.task.task_id, framework_id = %msg.framework_id, "got assigned task");
        let Some(slave_id) = self.id.clone() else {
            warn!(task_id = %msg.task.task_id, "run_task before registration; dropped");
            return Ok(());
        };
        self.stats.launched_tasks += 1;
        let framework_id = msg.framework_id.clone();
        self.frameworks
            .entry(framework_id.clone())
            .or_insert_with(|| FrameworkOnSlave {
                info: msg.framework.clone(),
                scheduler_addr: msg.framework_addr.clone(),
                executors: HashMap::new(),
                statuses: BTreeMap::new(),
            });

        let executor_info = msg
            .task
            .executor
            .clone()
            .unwrap_or_else(|| msg.framework.executor.clone());
        let executor_id = executor_info.executor_id.clone();

        let running = self
            .frameworks
            .get(&framework_id)
            .and_then(|f| f.executors.get(&executor_id))
            .map(|e| e.addr.clone());
        match running {
            Some(Some(executor_addr)) => {
                // Executor is up: hand the task straight over.
                let task = Task {
                    task_id: msg.task.task_id.clone(),
                    framework_id: framework_id.clone(),
                    executor_id: executor_id.clone(),
                    slave_id,
                    name: msg.task.name.clone(),
                    resources: msg.task.resources.clone(),
                    state: TaskState::Staging,
                };
                let resources = {
                    let framework = self
                        .frameworks
                        .get_mut(&framework_id)
                        .expect("framework inserted above");
                    let executor = framework
                        .executors
                        .get_mut(&executor_id)
                        .expect("executor checked above");
                    executor.resources = executor.resources.plus(&task.resources);
                    executor.tasks.insert(task.task_id.clone(), task);
                    executor.resources.clone()
                };
                proto::send(
                    ctx,
                    &executor_addr,
                    &s2e::RunTask {
                        framework_id: framework_id.clone(),
                        framework: msg.framework,
                        framework_addr: msg.framework_addr,
                        task: msg.task,
                    },
                )?;
                self.isolation
                    .resources_changed(&framework_id, &executor_id, &resources)
                    .await;
            }
            Some(None) => {
                // Executor is still starting: queue until it registers.
                let resources = {
                    let framework = self
                        .frameworks
                        .get_mut(&framework_id)
                        .expect("framework inserted above");
                    let executor = framework
                        .executors
                        .get_mut(&executor_id)
                        .expect("executor checked above");
                    executor.queued.push(msg.task);
                    executor.resources.clone()
                };
                self.isolation
                    .resources_changed(&framework_id, &executor_id, &resources)
                    .await;
            }
            None => {
                // First task for this executor: launch it and queue.
                let directory = self
                    .unique_work_directory(&slave_id, &framework_id, &executor_id)
                    .await;
                let task_id = msg.task.task_id.clone();
                if let Some(framework) = self.frameworks.get_mut(&framework_id) {
                    framework.executors.insert(
                        executor_id.clone(),
                        ExecutorRecord {
                            info: executor_info.clone(),
                            addr: None,
                            directory: directory.clone(),
                            tasks: HashMap::new(),
                            queued: vec![msg.task],
                            resources: Resources::empty(),
                        },
                    );
                }
                let framework_info = msg.framework.clone();
                let slave_addr = ctx.self_addr().clone();
                let launched = self
                    .isolation
                    .launch_executor(ExecutorLaunch {
                        framework_id: &framework_id,
                        framework: &framework_info,
                        executor: &executor_info,
                        directory: &directory,
                        slave_id: &slave_id,
                        slave_addr: &slave_addr,
                    })
                    .await;
                if let Err(e) = launched {
                    warn!(%framework_id, %executor_id, error = %e, "executor launch failed");
                    if let Some(framework) = self.frameworks.get_mut(&framework_id) {
                        framework.executors.remove(&executor_id);
                    }
                    self.stats.lost_tasks += 1;
                    self.enqueue_status(
                        ctx,
                        &framework_id,
                        TaskStatus {
                            task_id,
                            slave_id,
                            state: TaskState::Lost,
                            message: format!("failed to launch executor: {e}"),
                        },
                    )?;
                }
            }
        }
        Ok(())
    }

    async fn register_executor(
        &mut self,
        ctx: &mut Context,
        msg: e2s::RegisterExecutor,
        from: ActorAddr,
    ) -> Result<(), ActorError> {
        info!(executor_id = %msg.executor_id, framework_id = %msg.framework_id, addr = %from, "executor registration");
        let Some(slave_id) = self.id.clone() else {
            proto::send(ctx, &from, &s2e::KillExecutor {})?;
            return Ok(());
        };
        let expected = self
            .frameworks
            .get(&msg.framework_id)
            .and_then(|f| f.executors.get(&msg.executor_id))
            .map(|e| e.addr.is_none());
        if expected != Some(true) {
            // Unknown executor, or a second registration for one already
            // adopted: either way it does not get to run.
            warn!(executor_id = %msg.executor_id, framework_id = %msg.framework_id, "unexpected executor registration");
            proto::send(ctx, &from, &s2e::KillExecutor {})?;
            return Ok(());
        }

        let hostname = self.info.hostname.clone();
        let (init_data, framework_info, scheduler_addr, flush, resources) = {
            let framework = self
                .frameworks
                .get_mut(&msg.framework_id)
                .expect("framework checked above");
            let info = framework.info.clone();
            let scheduler = framework.scheduler_addr.clone();
            let executor = framework
                .executors
                .get_mut(&msg.executor_id)
                .expect("executor checked above");
            executor.addr = Some(from.clone());
            // Move queued tasks into the live task set.
            let mut flush = Vec::new();
            for description in executor.queued.drain(..).collect::<Vec<_>>() {
                executor.resources = executor.resources.plus(&description.resources);
                executor.tasks.insert(
                    description.task_id.clone(),
                    Task {
                        task_id: description.task_id.clone(),
                        framework_id: msg.framework_id.clone(),
                        executor_id: msg.executor_id.clone(),
                        slave_id: slave_id.clone(),
                        name: description.name.clone(),
                        resources: description.resources.clone(),
                        state: TaskState::Staging,
                    },
                );
                flush.push(description);
            }
            (
                executor.info.data.clone(),
                info,
                scheduler,
                flush,
                executor.resources.clone(),
            )
        };

        proto::send(
            ctx,
            &from,
            &s2e::ExecutorRegistered {
                args: ExecutorArgs {
                    framework_id: msg.framework_id.clone(),
                    executor_id: msg.executor_id.clone(),
                    slave_id,
                    hostname,
                    data: init_data,
                },
            },
        )?;
        if !flush.is_empty() {
            info!(executor_id = %msg.executor_id, tasks = flush.len(), "flushing queued tasks");
        }
        for task in flush {
            proto::send(
                ctx,
                &from,
                &s2e::RunTask {
                    framework_id: msg.framework_id.clone(),
                    framework: framework_info.clone(),
                    framework_addr: scheduler_addr.clone(),
                    task,
                },
            )?;
        }
        self.isolation
            .resources_changed(&msg.framework_id, &msg.executor_id, &resources)
            .await;
        Ok(())
    }

    async fn kill_task(&mut self, ctx: &mut Context, msg: m2s::KillTask) -> Result<(), ActorError> {
        info!(task_id = %msg.task_id, framework_id = %msg.framework_id, "asked to kill task");
        let Some(slave_id) = self.id.clone() else {
            return Ok(());
        };
        if !self.frameworks.contains_key(&msg.framework_id) {
            warn!(framework_id = %msg.framework_id, "kill for framework that is not running here");
            // No framework entry to hold a retry; report once.
            if self.connected {
                proto::send(
                    ctx,
                    &self.master,
                    &s2m::StatusUpdate {
                        framework_id: msg.framework_id,
                        status: TaskStatus {
                            task_id: msg.task_id,
                            slave_id,
                            state: TaskState::Lost,
                            message: "framework is not running on this slave".to_string(),
                        },
                    },
                )?;
            }
            return Ok(());
        }

        let located = self
            .frameworks
            .get(&msg.framework_id)
            .and_then(|f| {
                f.executors
                    .iter()
                    .find(|(_, e)| {
                        e.tasks.contains_key(&msg.task_id)
                            || e.queued.iter().any(|t| t.task_id == msg.task_id)
                    })
                    .map(|(id, e)| (id.clone(), e.addr.clone()))
            });
        match located {
            Some((_, Some(executor_addr))) => {
                // The executor answers with its own status update.
                proto::send(
                    ctx,
                    &executor_addr,
                    &s2e::KillTask {
                        framework_id: msg.framework_id,
                        task_id: msg.task_id,
                    },
                )?;
            }
            Some((executor_id, None)) => {
                // Not started yet: it just never runs.
                let resources = {
                    let framework = self
                        .frameworks
                        .get_mut(&msg.framework_id)
                        .expect("framework checked above");
                    let executor = framework
                        .executors
                        .get_mut(&executor_id)
                        .expect("executor located above");
                    executor.queued.retain(|t| t.task_id != msg.task_id);
                    if let Some(task) = executor.tasks.remove(&msg.task_id) {
                        executor.resources =
                            executor.resources.minus(&task.resources).unwrap_or_else(|e| {
                                panic!("task {} exceeds executor resources: {e}", msg.task_id)
                            });
                    }
                    executor.resources.clone()
                };
                self.isolation
                    .resources_changed(&msg.framework_id, &executor_id, &resources)
                    .await;
                self.stats.lost_tasks += 1;
                self.enqueue_status(
                    ctx,
                    &msg.framework_id,
                    TaskStatus {
                        task_id: msg.task_id,
                        slave_id,
                        state: TaskState::Lost,
                        message: "task killed before its executor started".to_string(),
                    },
                )?;
            }
            None => {
                self.stats.lost_tasks += 1;
                self.enqueue_status(
                    ctx,
                    &msg.framework_id,
                    TaskStatus {
                        task_id: msg.task_id,
                        slave_id,
                        state: TaskState::Lost,
                        message: "task is unknown to this slave".to_string(),
                    },
                )?;
            }
        }
        Ok(())
    }

    async fn kill_framework(
        &mut self,
        ctx: &mut Context,
        msg: m2s::KillFramework,
    ) -> Result<(), ActorError> {
        let Some(framework) = self.frameworks.remove(&msg.framework_id) else {
            return Ok(());
        };
        info!(framework_id = %msg.framework_id, executors = framework.executors.len(), "cleaning up framework");
        for (executor_id, executor) in framework.executors {
            if let Some(addr) = &executor.addr {
                proto::send(ctx, addr, &s2e::KillExecutor {})?;
            }
            self.isolation
                .kill_executor(&msg.framework_id, &executor_id)
                .await;
        }
        Ok(())
    }

    /// Status from an executor: account locally, then enqueue for the
    /// at-least-once path to the master.
    async fn status_update(
        &mut self,
        ctx: &mut Context,
        msg: e2s::StatusUpdate,
    ) -> Result<(), ActorError> {
        let status = msg.status;
        let framework_id = msg.framework_id;
        let located = self.frameworks.get(&framework_id).and_then(|f| {
            f.executors
                .iter()
                .find(|(_, e)| e.tasks.contains_key(&status.task_id))
                .map(|(id, _)| id.clone())
        });
        let Some(executor_id) = located else {
            warn!(task_id = %status.task_id, %framework_id, "status update for unknown task");
            self.stats.invalid_status_updates += 1;
            return Ok(());
        };
        info!(task_id = %status.task_id, state = %status.state, %framework_id, "status update");
        self.stats.valid_status_updates += 1;
        match status.state {
            TaskState::Finished => self.stats.finished_tasks += 1,
            TaskState::Failed => self.stats.failed_tasks += 1,
            TaskState::Killed => self.stats.killed_tasks += 1,
            TaskState::Lost => self.stats.lost_tasks += 1,
            _ => {}
        }

        let resources_after = {
            let framework = self
                .frameworks
                .get_mut(&framework_id)
                .expect("framework located above");
            let executor = framework
                .executors
                .get_mut(&executor_id)
                .expect("executor located above");
            if status.state.is_terminal() {
                if let Some(task) = executor.tasks.remove(&status.task_id) {
                    executor.resources =
                        executor.resources.minus(&task.resources).unwrap_or_else(|e| {
                            panic!("task {} exceeds executor resources: {e}", status.task_id)
                        });
                }
                Some(executor.resources.clone())
            } else {
                if let Some(task) = executor.tasks.get_mut(&status.task_id) {
                    task.state = status.state;
                }
                None
            }
        };
        if let Some(resources) = resources_after {
            self.isolation
                .resources_changed(&framework_id, &executor_id, &resources)
                .await;
        }
        self.enqueue_status(ctx, &framework_id, status)
    }

    fn status_update_ack(&mut self, msg: m2s::StatusUpdateAck) {
        if let Some(framework) = self.frameworks.get_mut(&msg.framework_id) {
            let mut cleared = false;
            for statuses in framework.statuses.values_mut() {
                cleared |= statuses.remove(&msg.task_id).is_some();
            }
            framework.statuses.retain(|_, statuses| !statuses.is_empty());
            if cleared {
                debug!(task_id = %msg.task_id, framework_id = %msg.framework_id, "status update acknowledged");
            }
        }
    }

    /// Executor process exit, observed by the reaper: every task it still
    /// owned is lost.
    async fn executor_exited(
        &mut self,
        ctx: &mut Context,
        msg: r2s::ExecutorExited,
    ) -> Result<(), ActorError> {
        let Some(slave_id) = self.id.clone() else {
            return Ok(());
        };
        let Some(framework) = self.frameworks.get_mut(&msg.framework_id) else {
            warn!(executor_id = %msg.executor_id, framework_id = %msg.framework_id, "exit of unknown executor");
            return Ok(());
        };
        let Some(executor) = framework.executors.remove(&msg.executor_id) else {
            warn!(executor_id = %msg.executor_id, framework_id = %msg.framework_id, "exit of unknown executor");
            return Ok(());
        };
        info!(
            executor_id = %msg.executor_id,
            framework_id = %msg.framework_id,
            exit_status = msg.exit_status,
            "executor exited"
        );

        let mut lost: Vec<TaskId> = executor
            .tasks
            .values()
            .filter(|t| !t.state.is_terminal())
            .map(|t| t.task_id.clone())
            .collect();
        lost.extend(executor.queued.iter().map(|t| t.task_id.clone()));
        for task_id in lost {
            self.stats.lost_tasks += 1;
            self.enqueue_status(
                ctx,
                &msg.framework_id,
                TaskStatus {
                    task_id,
                    slave_id: slave_id.clone(),
                    state: TaskState::Lost,
                    message: format!("executor exited with status {}", msg.exit_status),
                },
            )?;
        }
        if self.connected {
            proto::send(
                ctx,
                &self.master,
                &s2m::ExitedExecutor {
                    slave_id,
                    framework_id: msg.framework_id.clone(),
                    executor_id: msg.executor_id.clone(),
                    exit_status: msg.exit_status,
                },
            )?;
        }
        self.isolation
            .kill_executor(&msg.framework_id, &msg.executor_id)
            .await;

        // A framework with no executors and nothing awaiting ack is done
        // here.
        let idle = self
            .frameworks
            .get(&msg.framework_id)
            .map(|f| f.executors.is_empty() && f.statuses.is_empty())
            .unwrap_or(false);
        if idle {
            self.frameworks.remove(&msg.framework_id);
        }
        Ok(())
    }

    /// Scheduler-to-executor forward.
    fn scheduler_message(
        &mut self,
        ctx: &mut Context,
        msg: m2s::FrameworkMessage,
    ) -> Result<(), ActorError> {
        let target = self
            .frameworks
            .get(&msg.framework_id)
            .and_then(|f| f.executors.get(&msg.executor_id))
            .and_then(|e| e.addr.clone());
        match target {
            Some(executor_addr) => {
                self.stats.valid_framework_messages += 1;
                proto::send(
                    ctx,
                    &executor_addr,
                    &s2e::FrameworkMessage {
                        slave_id: msg.slave_id,
                        framework_id: msg.framework_id,
                        executor_id: msg.executor_id,
                        data: msg.data,
                    },
                )
            }
            None => {
                warn!(executor_id = %msg.executor_id, framework_id = %msg.framework_id,
                      "dropping message: executor does not exist or is not running");
                self.stats.invalid_framework_messages += 1;
                Ok(())
            }
        }
    }

    /// Executor-to-scheduler forward, routed through the master.
    fn executor_message(
        &mut self,
        ctx: &mut Context,
        msg: e2s::FrameworkMessage,
    ) -> Result<(), ActorError> {
        if self.frameworks.contains_key(&msg.framework_id) && self.connected {
            self.stats.valid_framework_messages += 1;
            proto::send(
                ctx,
                &self.master,
                &s2m::FrameworkMessage {
                    slave_id: msg.slave_id,
                    framework_id: msg.framework_id,
                    executor_id: msg.executor_id,
                    data: msg.data,
                },
            )
        } else {
            warn!(framework_id = %msg.framework_id, "dropping executor message");
            self.stats.invalid_framework_messages += 1;
            Ok(())
        }
    }

    /// 1 Hz: resend every status update whose deadline passed and push the
    /// deadline forward.
    fn tick(&mut self, ctx: &mut Context) -> Result<(), ActorError> {
        let now = ctx.now_ms();
        let next_deadline = now + STATUS_UPDATE_RETRY_INTERVAL.as_millis() as u64;
        let connected = self.connected;
        let master = self.master.clone();
        for (framework_id, framework) in self.frameworks.iter_mut() {
            if !connected {
                break;
            }
            let due: Vec<u64> = framework
                .statuses
                .range(..=now)
                .map(|(deadline, _)| *deadline)
                .collect();
            for deadline in due {
                let Some(statuses) = framework.statuses.remove(&deadline) else {
                    continue;
                };
                for (task_id, status) in statuses {
                    warn!(%task_id, framework_id = %framework_id, state = %status.state, "resending unacknowledged status update");
                    proto::send(
                        ctx,
                        &master,
                        &s2m::StatusUpdate {
                            framework_id: framework_id.clone(),
                            status: status.clone(),
                        },
                    )?;
                    framework
                        .statuses
                        .entry(next_deadline)
                        .or_default()
                        .insert(task_id, status);
                }
            }
        }
        ctx.after(TICK_INTERVAL, TIMEOUT, Bytes::new());
        Ok(())
    }
}

#[async_trait]
impl Actor for Slave {
    async fn started(&mut self, ctx: &mut Context) -> Result<(), ActorError> {
        self.start_ms = ctx.now_ms();
        info!(addr = %ctx.self_addr(), resources = %self.info.resources, "slave started");
        ctx.after(TICK_INTERVAL, TIMEOUT, Bytes::new());
        Ok(())
    }

    async fn receive(&mut self, ctx: &mut Context, envelope: Envelope) -> Result<(), ActorError> {
        let from = envelope.from.clone();
        match envelope.name.as_str() {
            oracle::NewMasterDetected::NAME => match proto::try_decode(&envelope) {
                Some(msg) => self.new_master_detected(ctx, msg).await,
                None => Ok(()),
            },
            oracle::NoMasterDetected::NAME => {
                warn!("lost master(s); buffering updates while waiting");
                self.connected = false;
                Ok(())
            }
            m2s::SlaveRegistered::NAME => match proto::try_decode::<m2s::SlaveRegistered>(&envelope)
            {
                Some(msg) => {
                    info!(slave_id = %msg.slave_id, "registered with master");
                    self.id = Some(msg.slave_id);
                    Ok(())
                }
                None => Ok(()),
            },
            m2s::SlaveReregistered::NAME => {
                match proto::try_decode::<m2s::SlaveReregistered>(&envelope) {
                    Some(msg) => {
                        info!(slave_id = %msg.slave_id, "re-registered with master");
                        if self.id.as_ref() != Some(&msg.slave_id) {
                            return Err(ActorError::fatal(format!(
                                "re-registered with wrong id {} (own id {:?})",
                                msg.slave_id, self.id
                            )));
                        }
                        Ok(())
                    }
                    None => Ok(()),
                }
            }
            m2s::RunTask::NAME => match proto::try_decode(&envelope) {
                Some(msg) => self.run_task(ctx, msg).await,
                None => Ok(()),
            },
            m2s::KillTask::NAME => match proto::try_decode(&envelope) {
                Some(msg) => self.kill_task(ctx, msg).await,
                None => Ok(()),
            },
            m2s::KillFramework::NAME => match proto::try_decode(&envelope) {
                Some(msg) => self.kill_framework(ctx, msg).await,
                None => Ok(()),
            },
            m2s::FrameworkMessage::NAME => match proto::try_decode(&envelope) {
                Some(msg) => self.scheduler_message(ctx, msg),
                None => Ok(()),
            },
            m2s::UpdateFramework::NAME => match proto::try_decode::<m2s::UpdateFramework>(&envelope)
            {
                Some(msg) => {
                    if let Some(framework) = self.frameworks.get_mut(&msg.framework_id) {
                        info!(framework_id = %msg.framework_id, addr = %msg.framework_addr, "updating framework address");
                        framework.scheduler_addr = msg.framework_addr;
                    }
                    Ok(())
                }
                None => Ok(()),
            },
            m2s::StatusUpdateAck::NAME => {
                if let Some(msg) = proto::try_decode(&envelope) {
                    self.status_update_ack(msg);
                }
                Ok(())
            }
            e2s::RegisterExecutor::NAME => match proto::try_decode(&envelope) {
                Some(msg) => self.register_executor(ctx, msg, from).await,
                None => Ok(()),
            },
            e2s::StatusUpdate::NAME => match proto::try_decode(&envelope) {
                Some(msg) => self.status_update(ctx, msg).await,
                None => Ok(()),
            },
            e2s::FrameworkMessage::NAME => match proto::try_decode(&envelope) {
                Some(msg) => self.executor_message(ctx, msg),
                None => Ok(()),
            },
            r2s::ExecutorExited::NAME => match proto::try_decode(&envelope) {
                Some(msg) => self.executor_exited(ctx, msg).await,
                None => Ok(()),
            },
            Ping::NAME => proto::send(ctx, &from, &Pong {}),
            TIMEOUT => self.tick(ctx),
            EXITED => {
                if from.same_peer(&self.master) && from.name() == self.master.name() {
                    warn!("master disconnected; waiting for a new master to be elected");
                    self.connected = false;
                } else {
                    debug!(%from, "exit notification");
                }
                Ok(())
            }
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
                    "slave_id": self.id.as_ref().map(|id| id.to_string()),
                    "pid": ctx.self_addr().to_string(),
                    "hostname": self.info.hostname,
                    "master": self.master.to_string(),
                    "connected": self.connected,
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
                            "executors": f.executors.len(),
                        })
                    })
                    .collect();
                Some(EndpointReply::json(json!(frameworks).to_string()))
            }
            "tasks.json" => {
                let tasks: Vec<_> = self
                    .frameworks
                    .values()
                    .flat_map(|f| f.executors.values())
                    .flat_map(|e| e.tasks.values())
                    .map(|task| {
                        json!({
                            "task_id": task.task_id.to_string(),
                            "framework_id": task.framework_id.to_string(),
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
                    "launched_tasks": self.stats.launched_tasks,
                    "finished_tasks": self.stats.finished_tasks,
                    "killed_tasks": self.stats.killed_tasks,
                    "failed_tasks": self.stats.failed_tasks,
                    "lost_tasks": self.stats.lost_tasks,
                    "valid_status_updates": self.stats.valid_status_updates,
                    "invalid_status_updates": self.stats.invalid_status_updates,
                    "valid_framework_messages": self.stats.valid_framework_messages,
                    "invalid_framework_messages": self.stats.invalid_framework_messages,
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

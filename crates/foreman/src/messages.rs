//! # Wire Protocol
//!
//! Shared data records and every message the master, slaves, frameworks,
//! and executors exchange.
//!
//! Envelope names follow the `MODULE_EVENT` convention (`S2M_*` slave to
//! master, `M2F_*` master to framework, and so on). Bodies are serde
//! records; unknown fields are skipped and absent optional fields default,
//! so peers can evolve independently.
//!
//! ## Usage
//!
//! Every message type carries its envelope name, so encoding and decoding
//! need no side tables:
//!
//! ```rust
//! use actor_runtime::ActorAddr;
//! use foreman::ids::{FrameworkId, TaskId};
//! use foreman::messages::{self as proto, f2m, WireMessage};
//!
//! let message = f2m::KillTask {
//!     framework_id: FrameworkId("1-0".to_string()),
//!     task_id: TaskId("t1".to_string()),
//! };
//! let envelope = proto::envelope(&message, ActorAddr::new("sched", "10.0.0.2", 6060)).unwrap();
//! assert_eq!(envelope.name, f2m::KillTask::NAME);
//!
//! let decoded: f2m::KillTask = proto::decode(&envelope).unwrap();
//! assert_eq!(decoded.task_id, message.task_id);
//! ```
//!
//! Inside an actor handler, [`send`] and [`try_decode`] do the same work
//! against a [`Context`](actor_runtime::Context).

use crate::ids::{ExecutorId, FrameworkId, OfferId, SlaveId, TaskId};
use crate::resources::Resources;
use actor_runtime::{ActorAddr, ActorError, Context, Envelope};
use bytes::Bytes;
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use std::fmt;

/// A message with a fixed envelope name.
pub trait WireMessage: Serialize + DeserializeOwned {
    const NAME: &'static str;
}

macro_rules! wire_message {
    ($ty:ty, $name:literal) => {
        impl WireMessage for $ty {
            const NAME: &'static str = $name;
        }
    };
}

/// Serializes `message` into an envelope body.
pub fn body<M: WireMessage>(message: &M) -> Result<Bytes, ActorError> {
    let bytes = serde_json::to_vec(message)
        .map_err(|e| ActorError::fatal(format!("encoding {}: {e}", M::NAME)))?;
    Ok(Bytes::from(bytes))
}

/// Builds a complete envelope for `message` (mostly useful to tests and
/// out-of-actor senders).
pub fn envelope<M: WireMessage>(message: &M, from: ActorAddr) -> Result<Envelope, ActorError> {
    Ok(Envelope::new(M::NAME, from, body(message)?))
}

/// Sends `message` from inside an actor handler.
pub fn send<M: WireMessage>(ctx: &Context, to: &ActorAddr, message: &M) -> Result<(), ActorError> {
    ctx.send(to, M::NAME, body(message)?);
    Ok(())
}

/// Decodes an inbound envelope; a malformed body is a protocol error, not a
/// crash.
pub fn decode<M: WireMessage>(envelope: &Envelope) -> Result<M, ActorError> {
    serde_json::from_slice(&envelope.body)
        .map_err(|e| ActorError::fatal(format!("decoding {}: {e}", M::NAME)))
}

/// Decodes an inbound envelope, logging and discarding malformed bodies.
/// Peers that send garbage do not get to take the receiving actor down.
pub fn try_decode<M: WireMessage>(envelope: &Envelope) -> Option<M> {
    match serde_json::from_slice(&envelope.body) {
        Ok(message) => Some(message),
        Err(e) => {
            tracing::warn!(name = %envelope.name, from = %envelope.from, error = %e, "malformed message body; dropped");
            None
        }
    }
}

// ---------------------------------------------------------------------------
// Shared data records
// ---------------------------------------------------------------------------

/// Task states form a monotonic lattice; the terminal states are sinks.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum TaskState {
    #[serde(rename = "STAGING")]
    Staging,
    #[serde(rename = "STARTING")]
    Starting,
    #[serde(rename = "RUNNING")]
    Running,
    #[serde(rename = "FINISHED")]
    Finished,
    #[serde(rename = "FAILED")]
    Failed,
    #[serde(rename = "KILLED")]
    Killed,
    #[serde(rename = "LOST")]
    Lost,
}

impl TaskState {
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            TaskState::Finished | TaskState::Failed | TaskState::Killed | TaskState::Lost
        )
    }
}

impl fmt::Display for TaskState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            TaskState::Staging => "STAGING",
            TaskState::Starting => "STARTING",
            TaskState::Running => "RUNNING",
            TaskState::Finished => "FINISHED",
            TaskState::Failed => "FAILED",
            TaskState::Killed => "KILLED",
            TaskState::Lost => "LOST",
        };
        write!(f, "{name}")
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ExecutorInfo {
    pub executor_id: ExecutorId,
    /// Path or URI of the executor binary.
    pub uri: String,
    /// Opaque initialization blob handed to the executor on registration.
    #[serde(default)]
    pub data: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FrameworkInfo {
    pub name: String,
    pub user: String,
    pub executor: ExecutorInfo,
    #[serde(default)]
    pub principal: String,
    /// How long the master keeps the framework's tasks after its scheduler
    /// disconnects, waiting for a re-registration.
    #[serde(default)]
    pub failover_timeout_secs: f64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SlaveInfo {
    pub hostname: String,
    pub public_hostname: String,
    pub resources: Resources,
}

/// A task as a framework describes it in an offer reply.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TaskDescription {
    pub task_id: TaskId,
    pub name: String,
    pub resources: Resources,
    /// Overrides the framework's default executor when set.
    #[serde(default)]
    pub executor: Option<ExecutorInfo>,
    #[serde(default)]
    pub data: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TaskStatus {
    pub task_id: TaskId,
    pub slave_id: SlaveId,
    pub state: TaskState,
    #[serde(default)]
    pub message: String,
}

/// The authoritative task record held by the master, also reported by
/// slaves on re-registration.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Task {
    pub task_id: TaskId,
    pub framework_id: FrameworkId,
    pub executor_id: ExecutorId,
    pub slave_id: SlaveId,
    pub name: String,
    pub resources: Resources,
    pub state: TaskState,
}

/// Attached to an offer reply; declined resources are not re-offered to the
/// same framework for `refuse_secs`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct OfferFilters {
    #[serde(default = "default_refuse_secs")]
    pub refuse_secs: f64,
}

fn default_refuse_secs() -> f64 {
    5.0
}

impl Default for OfferFilters {
    fn default() -> Self {
        Self {
            refuse_secs: default_refuse_secs(),
        }
    }
}

/// Registration payload handed to an executor once the slave adopts it.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ExecutorArgs {
    pub framework_id: FrameworkId,
    pub executor_id: ExecutorId,
    pub slave_id: SlaveId,
    pub hostname: String,
    #[serde(default)]
    pub data: String,
}

// ---------------------------------------------------------------------------
// Framework -> master
// ---------------------------------------------------------------------------

pub mod f2m {
    use super::*;

    #[derive(Debug, Clone, Serialize, Deserialize)]
    pub struct RegisterFramework {
        pub framework: FrameworkInfo,
    }
    wire_message!(RegisterFramework, "F2M_REGISTER_FRAMEWORK");

    #[derive(Debug, Clone, Serialize, Deserialize)]
    pub struct ReregisterFramework {
        pub framework_id: FrameworkId,
        pub framework: FrameworkInfo,
        /// False means the framework insists it is already known; an
        /// unknown id is then a fatal protocol error.
        pub failover: bool,
    }
    wire_message!(ReregisterFramework, "F2M_REREGISTER_FRAMEWORK");

    #[derive(Debug, Clone, Serialize, Deserialize)]
    pub struct UnregisterFramework {
        pub framework_id: FrameworkId,
    }
    wire_message!(UnregisterFramework, "F2M_UNREGISTER_FRAMEWORK");

    /// A hint to the allocator; carries no obligation.
    #[derive(Debug, Clone, Serialize, Deserialize)]
    pub struct ResourceRequest {
        pub framework_id: FrameworkId,
        pub resources: Resources,
    }
    wire_message!(ResourceRequest, "F2M_RESOURCE_REQUEST");

    /// Atomic consumption of one offer: launch these tasks on the offered
    /// resources, return the rest.
    #[derive(Debug, Clone, Serialize, Deserialize)]
    pub struct ResourceOfferReply {
        pub offer_id: OfferId,
        pub framework_id: FrameworkId,
        pub tasks: Vec<TaskDescription>,
        #[serde(default)]
        pub filters: OfferFilters,
    }
    wire_message!(ResourceOfferReply, "F2M_RESOURCE_OFFER_REPLY");

    #[derive(Debug, Clone, Serialize, Deserialize)]
    pub struct KillTask {
        pub framework_id: FrameworkId,
        pub task_id: TaskId,
    }
    wire_message!(KillTask, "F2M_KILL_TASK");

    /// Scheduler-to-executor payload, forwarded uninspected.
    #[derive(Debug, Clone, Serialize, Deserialize)]
    pub struct FrameworkMessage {
        pub slave_id: SlaveId,
        pub framework_id: FrameworkId,
        pub executor_id: ExecutorId,
        pub data: String,
    }
    wire_message!(FrameworkMessage, "F2M_FRAMEWORK_MESSAGE");
}

// ---------------------------------------------------------------------------
// Master -> framework
// ---------------------------------------------------------------------------

pub mod m2f {
    use super::*;

    #[derive(Debug, Clone, Serialize, Deserialize)]
    pub struct FrameworkRegistered {
        pub framework_id: FrameworkId,
    }
    wire_message!(FrameworkRegistered, "M2F_REGISTER_REPLY");

    #[derive(Debug, Clone, Serialize, Deserialize)]
    pub struct FrameworkReregistered {
        pub framework_id: FrameworkId,
    }
    wire_message!(FrameworkReregistered, "M2F_REREGISTER_REPLY");

    #[derive(Debug, Clone, Serialize, Deserialize)]
    pub struct ResourceOffer {
        pub offer_id: OfferId,
        pub slave_id: SlaveId,
        pub hostname: String,
        pub resources: Resources,
    }
    wire_message!(ResourceOffer, "M2F_RESOURCE_OFFER");

    #[derive(Debug, Clone, Serialize, Deserialize)]
    pub struct RescindOffer {
        pub offer_id: OfferId,
    }
    wire_message!(RescindOffer, "M2F_RESCIND_OFFER");

    #[derive(Debug, Clone, Serialize, Deserialize)]
    pub struct StatusUpdate {
        pub framework_id: FrameworkId,
        pub status: TaskStatus,
    }
    wire_message!(StatusUpdate, "M2F_STATUS_UPDATE");

    /// Executor-to-scheduler payload. Also used for slave-to-framework
    /// forwards; the name is kept for wire compatibility.
    #[derive(Debug, Clone, Serialize, Deserialize)]
    pub struct FrameworkMessage {
        pub slave_id: SlaveId,
        pub framework_id: FrameworkId,
        pub executor_id: ExecutorId,
        pub data: String,
    }
    wire_message!(FrameworkMessage, "M2F_FRAMEWORK_MESSAGE");

    #[derive(Debug, Clone, Serialize, Deserialize)]
    pub struct LostSlave {
        pub slave_id: SlaveId,
    }
    wire_message!(LostSlave, "M2F_LOST_SLAVE");

    /// One-way protocol error report; the connection stays open.
    #[derive(Debug, Clone, Serialize, Deserialize)]
    pub struct ProtocolError {
        pub code: i32,
        pub message: String,
    }
    wire_message!(ProtocolError, "M2F_ERROR");
}

// ---------------------------------------------------------------------------
// Slave -> master
// ---------------------------------------------------------------------------

pub mod s2m {
    use super::*;

    #[derive(Debug, Clone, Serialize, Deserialize)]
    pub struct RegisterSlave {
        pub slave: SlaveInfo,
    }
    wire_message!(RegisterSlave, "S2M_REGISTER_SLAVE");

    /// Re-registration after a master restart; reports every task the slave
    /// still considers live so the new master can rebuild its view.
    #[derive(Debug, Clone, Serialize, Deserialize)]
    pub struct ReregisterSlave {
        pub slave_id: SlaveId,
        pub slave: SlaveInfo,
        pub tasks: Vec<Task>,
    }
    wire_message!(ReregisterSlave, "S2M_REREGISTER_SLAVE");

    #[derive(Debug, Clone, Serialize, Deserialize)]
    pub struct StatusUpdate {
        pub framework_id: FrameworkId,
        pub status: TaskStatus,
    }
    wire_message!(StatusUpdate, "S2M_STATUS_UPDATE");

    /// Executor-to-scheduler payload on its way through the master.
    #[derive(Debug, Clone, Serialize, Deserialize)]
    pub struct FrameworkMessage {
        pub slave_id: SlaveId,
        pub framework_id: FrameworkId,
        pub executor_id: ExecutorId,
        pub data: String,
    }
    wire_message!(FrameworkMessage, "S2M_FRAMEWORK_MESSAGE");

    #[derive(Debug, Clone, Serialize, Deserialize)]
    pub struct ExitedExecutor {
        pub slave_id: SlaveId,
        pub framework_id: FrameworkId,
        pub executor_id: ExecutorId,
        pub exit_status: i32,
    }
    wire_message!(ExitedExecutor, "S2M_EXITED_EXECUTOR");
}

// ---------------------------------------------------------------------------
// Master -> slave
// ---------------------------------------------------------------------------

pub mod m2s {
    use super::*;

    #[derive(Debug, Clone, Serialize, Deserialize)]
    pub struct SlaveRegistered {
        pub slave_id: SlaveId,
    }
    wire_message!(SlaveRegistered, "M2S_REGISTER_REPLY");

    #[derive(Debug, Clone, Serialize, Deserialize)]
    pub struct SlaveReregistered {
        pub slave_id: SlaveId,
    }
    wire_message!(SlaveReregistered, "M2S_REREGISTER_REPLY");

    #[derive(Debug, Clone, Serialize, Deserialize)]
    pub struct RunTask {
        pub framework_id: FrameworkId,
        pub framework: FrameworkInfo,
        pub framework_addr: ActorAddr,
        pub task: TaskDescription,
    }
    wire_message!(RunTask, "M2S_RUN_TASK");

    #[derive(Debug, Clone, Serialize, Deserialize)]
    pub struct KillTask {
        pub framework_id: FrameworkId,
        pub task_id: TaskId,
    }
    wire_message!(KillTask, "M2S_KILL_TASK");

    #[derive(Debug, Clone, Serialize, Deserialize)]
    pub struct KillFramework {
        pub framework_id: FrameworkId,
    }
    wire_message!(KillFramework, "M2S_KILL_FRAMEWORK");

    /// Scheduler-to-executor payload on its way to the slave.
    #[derive(Debug, Clone, Serialize, Deserialize)]
    pub struct FrameworkMessage {
        pub slave_id: SlaveId,
        pub framework_id: FrameworkId,
        pub executor_id: ExecutorId,
        pub data: String,
    }
    wire_message!(FrameworkMessage, "M2S_FRAMEWORK_MESSAGE");

    /// Pushed after a framework fails over so executor traffic reaches the
    /// new scheduler address.
    #[derive(Debug, Clone, Serialize, Deserialize)]
    pub struct UpdateFramework {
        pub framework_id: FrameworkId,
        pub framework_addr: ActorAddr,
    }
    wire_message!(UpdateFramework, "M2S_UPDATE_FRAMEWORK");

    /// Lets the slave drop the matching status-update retry entry.
    #[derive(Debug, Clone, Serialize, Deserialize)]
    pub struct StatusUpdateAck {
        pub slave_id: SlaveId,
        pub framework_id: FrameworkId,
        pub task_id: TaskId,
    }
    wire_message!(StatusUpdateAck, "M2S_STATUS_UPDATE_ACK");
}

// ---------------------------------------------------------------------------
// Executor <-> slave
// ---------------------------------------------------------------------------

pub mod e2s {
    use super::*;

    #[derive(Debug, Clone, Serialize, Deserialize)]
    pub struct RegisterExecutor {
        pub framework_id: FrameworkId,
        pub executor_id: ExecutorId,
    }
    wire_message!(RegisterExecutor, "E2S_REGISTER_EXECUTOR");

    #[derive(Debug, Clone, Serialize, Deserialize)]
    pub struct StatusUpdate {
        pub framework_id: FrameworkId,
        pub status: TaskStatus,
    }
    wire_message!(StatusUpdate, "E2S_STATUS_UPDATE");

    #[derive(Debug, Clone, Serialize, Deserialize)]
    pub struct FrameworkMessage {
        pub slave_id: SlaveId,
        pub framework_id: FrameworkId,
        pub executor_id: ExecutorId,
        pub data: String,
    }
    wire_message!(FrameworkMessage, "E2S_FRAMEWORK_MESSAGE");
}

pub mod s2e {
    use super::*;

    #[derive(Debug, Clone, Serialize, Deserialize)]
    pub struct ExecutorRegistered {
        pub args: ExecutorArgs,
    }
    wire_message!(ExecutorRegistered, "S2E_REGISTER_REPLY");

    #[derive(Debug, Clone, Serialize, Deserialize)]
    pub struct RunTask {
        pub framework_id: FrameworkId,
        pub framework: FrameworkInfo,
        pub framework_addr: ActorAddr,
        pub task: TaskDescription,
    }
    wire_message!(RunTask, "S2E_RUN_TASK");

    #[derive(Debug, Clone, Serialize, Deserialize)]
    pub struct KillTask {
        pub framework_id: FrameworkId,
        pub task_id: TaskId,
    }
    wire_message!(KillTask, "S2E_KILL_TASK");

    #[derive(Debug, Clone, Serialize, Deserialize)]
    pub struct KillExecutor {}
    wire_message!(KillExecutor, "S2E_KILL_EXECUTOR");

    #[derive(Debug, Clone, Serialize, Deserialize)]
    pub struct FrameworkMessage {
        pub slave_id: SlaveId,
        pub framework_id: FrameworkId,
        pub executor_id: ExecutorId,
        pub data: String,
    }
    wire_message!(FrameworkMessage, "S2E_FRAMEWORK_MESSAGE");
}

// ---------------------------------------------------------------------------
// Reaper -> slave, liveness, and the election oracle
// ---------------------------------------------------------------------------

pub mod r2s {
    use super::*;

    /// Posted by the executor reaper when an executor process exits.
    #[derive(Debug, Clone, Serialize, Deserialize)]
    pub struct ExecutorExited {
        pub framework_id: FrameworkId,
        pub executor_id: ExecutorId,
        pub exit_status: i32,
    }
    wire_message!(ExecutorExited, "R2S_EXECUTOR_EXITED");
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Ping {}
wire_message!(Ping, "PING");

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Pong {}
wire_message!(Pong, "PONG");

pub mod oracle {
    use super::*;

    /// Emitted by the leader-election oracle when a (new) master is known.
    #[derive(Debug, Clone, Serialize, Deserialize)]
    pub struct NewMasterDetected {
        pub master_addr: ActorAddr,
    }
    wire_message!(NewMasterDetected, "NEW_MASTER_DETECTED");

    #[derive(Debug, Clone, Serialize, Deserialize)]
    pub struct NoMasterDetected {}
    wire_message!(NoMasterDetected, "NO_MASTER_DETECTED");
}

//! Slave behavior against a scripted master and executor.

mod common;

use actor_runtime::{ActorAddr, ActorSystem};
use common::*;
use foreman::ids::{ExecutorId, FrameworkId, SlaveId, TaskId};
use foreman::messages::{
    self as proto, e2s, m2s, oracle, r2s, s2e, s2m, TaskDescription, TaskState, TaskStatus,
    WireMessage,
};
use foreman::{Slave, SLAVE_ACTOR, SLAVE_INSTALLS};
use std::path::PathBuf;
use std::sync::{Arc, Mutex};

type Launches = Arc<Mutex<Vec<(FrameworkId, ExecutorId, PathBuf)>>>;
type Kills = Arc<Mutex<Vec<(FrameworkId, ExecutorId)>>>;

struct Fixture {
    sys: ActorSystem,
    slave: ActorAddr,
    master_addr: ActorAddr,
    master_seen: Seen,
    launches: Launches,
    kills: Kills,
    slave_id: SlaveId,
    _work_dir: tempfile::TempDir,
}

/// Boots a slave with a scripted master: detection, registration, and the
/// id grant have already happened.
async fn registered_slave() -> Fixture {
    let sys = system().await;
    sys.clock().pause();
    let work_dir = tempfile::tempdir().unwrap();

    let (master, master_seen) = Recorder::new();
    let master_addr = sys.spawn("master", master, &[]).unwrap();

    let (isolation, launches, kills) = TestIsolation::new();
    let slave_actor = Slave::new(
        slave_info("cpus:2;mem:1024"),
        Box::new(isolation),
        work_dir.path().to_path_buf(),
        Vec::new(),
    );
    let slave = sys.spawn(SLAVE_ACTOR, slave_actor, SLAVE_INSTALLS).unwrap();

    send_msg(
        &sys,
        &master_addr,
        &slave,
        &oracle::NewMasterDetected {
            master_addr: master_addr.clone(),
        },
    );
    eventually("slave registers", || {
        first::<s2m::RegisterSlave>(&master_seen).is_some()
    })
    .await;
    let slave_id = SlaveId("e-0".to_string());
    send_msg(
        &sys,
        &master_addr,
        &slave,
        &m2s::SlaveRegistered {
            slave_id: slave_id.clone(),
        },
    );
    settle().await;

    Fixture {
        sys,
        slave,
        master_addr,
        master_seen,
        launches,
        kills,
        slave_id,
        _work_dir: work_dir,
    }
}

fn fid(s: &str) -> FrameworkId {
    FrameworkId(s.to_string())
}

fn run_task(fx: &Fixture, framework_id: &str, task_id: &str, resources: &str) {
    let framework_addr = fx.sys.addr_of("scheduler");
    send_msg(
        &fx.sys,
        &fx.master_addr,
        &fx.slave,
        &m2s::RunTask {
            framework_id: fid(framework_id),
            framework: framework_info("test"),
            framework_addr,
            task: TaskDescription {
                task_id: TaskId(task_id.to_string()),
                name: task_id.to_string(),
                resources: res(resources),
                executor: None,
                data: String::new(),
            },
        },
    );
}

#[tokio::test]
async fn first_task_launches_the_executor_and_queues() {
    let fx = registered_slave().await;
    run_task(&fx, "f1", "t1", "cpus:1;mem:512");

    eventually("executor launched", || fx.launches.lock().unwrap().len() == 1).await;
    let (framework_id, executor_id, directory) = fx.launches.lock().unwrap()[0].clone();
    assert_eq!(framework_id, fid("f1"));
    assert_eq!(executor_id.0, "default-exec");
    // Work directory: .../work/slave-<sid>/fw-<fid>-<eid>/<n>
    let path = directory.display().to_string();
    assert!(
        path.ends_with("work/slave-e-0/fw-f1-default-exec/0"),
        "unexpected work directory {path}"
    );

    // A second task for the same executor queues without a second launch.
    run_task(&fx, "f1", "t2", "cpus:0.5;mem:128");
    settle().await;
    assert_eq!(fx.launches.lock().unwrap().len(), 1);
}

#[tokio::test]
async fn executor_registration_flushes_queued_tasks() {
    let fx = registered_slave().await;
    run_task(&fx, "f1", "t1", "cpus:1;mem:512");
    run_task(&fx, "f1", "t2", "cpus:0.5;mem:128");
    eventually("executor launched", || fx.launches.lock().unwrap().len() == 1).await;

    let (exec, exec_seen) = Recorder::new();
    let exec_addr = fx.sys.spawn("executor-1", exec, &[]).unwrap();
    send_msg(
        &fx.sys,
        &exec_addr,
        &fx.slave,
        &e2s::RegisterExecutor {
            framework_id: fid("f1"),
            executor_id: ExecutorId("default-exec".to_string()),
        },
    );

    eventually("registration reply and both tasks flushed", || {
        first::<s2e::ExecutorRegistered>(&exec_seen).is_some()
            && sent::<s2e::RunTask>(&exec_seen).len() == 2
    })
    .await;
    let args = first::<s2e::ExecutorRegistered>(&exec_seen).unwrap().args;
    assert_eq!(args.slave_id, fx.slave_id);
    assert_eq!(args.hostname, "node1");
    let task_ids: Vec<String> = sent::<s2e::RunTask>(&exec_seen)
        .iter()
        .map(|r| r.task.task_id.0.clone())
        .collect();
    assert_eq!(task_ids, ["t1", "t2"]);

    // A second registration for the same executor is told to die.
    let (other, other_seen) = Recorder::new();
    let other_addr = fx.sys.spawn("executor-2", other, &[]).unwrap();
    send_msg(
        &fx.sys,
        &other_addr,
        &fx.slave,
        &e2s::RegisterExecutor {
            framework_id: fid("f1"),
            executor_id: ExecutorId("default-exec".to_string()),
        },
    );
    eventually("impostor killed", || {
        first::<s2e::KillExecutor>(&other_seen).is_some()
    })
    .await;
}

#[tokio::test]
async fn status_updates_retry_until_acknowledged() {
    let fx = registered_slave().await;
    run_task(&fx, "f1", "t1", "cpus:1;mem:512");
    let (exec, _exec_seen) = Recorder::new();
    let exec_addr = fx.sys.spawn("executor-1", exec, &[]).unwrap();
    send_msg(
        &fx.sys,
        &exec_addr,
        &fx.slave,
        &e2s::RegisterExecutor {
            framework_id: fid("f1"),
            executor_id: ExecutorId("default-exec".to_string()),
        },
    );
    settle().await;

    send_msg(
        &fx.sys,
        &exec_addr,
        &fx.slave,
        &e2s::StatusUpdate {
            framework_id: fid("f1"),
            status: TaskStatus {
                task_id: TaskId("t1".to_string()),
                slave_id: fx.slave_id.clone(),
                state: TaskState::Finished,
                message: String::new(),
            },
        },
    );
    eventually("first delivery", || {
        count::<s2m::StatusUpdate>(&fx.master_seen) == 1
    })
    .await;

    // No ack: the deadline passes and the update is resent.
    advance_secs(&fx.sys, 11).await;
    eventually("resent", || count::<s2m::StatusUpdate>(&fx.master_seen) >= 2).await;

    // Ack clears the retry entry; no further resends.
    send_msg(
        &fx.sys,
        &fx.master_addr,
        &fx.slave,
        &m2s::StatusUpdateAck {
            slave_id: fx.slave_id.clone(),
            framework_id: fid("f1"),
            task_id: TaskId("t1".to_string()),
        },
    );
    settle().await;
    let settled = count::<s2m::StatusUpdate>(&fx.master_seen);
    advance_secs(&fx.sys, 22).await;
    assert_eq!(count::<s2m::StatusUpdate>(&fx.master_seen), settled);
}

#[tokio::test]
async fn kill_before_executor_registers_synthesizes_lost() {
    let fx = registered_slave().await;
    run_task(&fx, "f1", "t1", "cpus:1;mem:512");
    eventually("executor launched", || fx.launches.lock().unwrap().len() == 1).await;

    send_msg(
        &fx.sys,
        &fx.master_addr,
        &fx.slave,
        &m2s::KillTask {
            framework_id: fid("f1"),
            task_id: TaskId("t1".to_string()),
        },
    );
    eventually("LOST synthesized", || {
        sent::<s2m::StatusUpdate>(&fx.master_seen)
            .iter()
            .any(|u| u.status.state == TaskState::Lost && u.status.task_id.0 == "t1")
    })
    .await;

    // The executor registers afterwards; the killed task is not flushed.
    let (exec, exec_seen) = Recorder::new();
    let exec_addr = fx.sys.spawn("executor-1", exec, &[]).unwrap();
    send_msg(
        &fx.sys,
        &exec_addr,
        &fx.slave,
        &e2s::RegisterExecutor {
            framework_id: fid("f1"),
            executor_id: ExecutorId("default-exec".to_string()),
        },
    );
    eventually("registered", || {
        first::<s2e::ExecutorRegistered>(&exec_seen).is_some()
    })
    .await;
    assert!(sent::<s2e::RunTask>(&exec_seen).is_empty());
}

#[tokio::test]
async fn kill_of_running_task_defers_to_the_executor() {
    let fx = registered_slave().await;
    run_task(&fx, "f1", "t1", "cpus:1;mem:512");
    let (exec, exec_seen) = Recorder::new();
    let exec_addr = fx.sys.spawn("executor-1", exec, &[]).unwrap();
    send_msg(
        &fx.sys,
        &exec_addr,
        &fx.slave,
        &e2s::RegisterExecutor {
            framework_id: fid("f1"),
            executor_id: ExecutorId("default-exec".to_string()),
        },
    );
    eventually("task flushed", || sent::<s2e::RunTask>(&exec_seen).len() == 1).await;

    send_msg(
        &fx.sys,
        &fx.master_addr,
        &fx.slave,
        &m2s::KillTask {
            framework_id: fid("f1"),
            task_id: TaskId("t1".to_string()),
        },
    );
    eventually("kill forwarded", || {
        first::<s2e::KillTask>(&exec_seen).is_some()
    })
    .await;
    // No synthesized LOST: the executor owns the kill and will report.
    assert!(!sent::<s2m::StatusUpdate>(&fx.master_seen)
        .iter()
        .any(|u| u.status.state == TaskState::Lost));
}

#[tokio::test]
async fn executor_exit_loses_tasks_and_reports() {
    let fx = registered_slave().await;
    run_task(&fx, "f1", "t1", "cpus:1;mem:512");
    let (exec, exec_seen) = Recorder::new();
    let exec_addr = fx.sys.spawn("executor-1", exec, &[]).unwrap();
    send_msg(
        &fx.sys,
        &exec_addr,
        &fx.slave,
        &e2s::RegisterExecutor {
            framework_id: fid("f1"),
            executor_id: ExecutorId("default-exec".to_string()),
        },
    );
    eventually("task flushed", || sent::<s2e::RunTask>(&exec_seen).len() == 1).await;

    // The reaper observed the process die.
    fx.sys.post(
        &fx.slave,
        r2s::ExecutorExited::NAME,
        proto::body(&r2s::ExecutorExited {
            framework_id: fid("f1"),
            executor_id: ExecutorId("default-exec".to_string()),
            exit_status: 137,
        })
        .unwrap(),
    );

    eventually("exit reported and task lost", || {
        first::<s2m::ExitedExecutor>(&fx.master_seen).is_some()
            && sent::<s2m::StatusUpdate>(&fx.master_seen)
                .iter()
                .any(|u| u.status.state == TaskState::Lost && u.status.task_id.0 == "t1")
    })
    .await;
    assert_eq!(
        first::<s2m::ExitedExecutor>(&fx.master_seen).unwrap().exit_status,
        137
    );
    eventually("isolation told to clean up", || {
        fx.kills.lock().unwrap().len() == 1
    })
    .await;

    // A relaunch for the same executor pair gets the next directory
    // suffix.
    run_task(&fx, "f1", "t9", "cpus:1;mem:512");
    eventually("relaunched", || fx.launches.lock().unwrap().len() == 2).await;
    let (_, _, directory) = fx.launches.lock().unwrap()[1].clone();
    assert!(
        directory.display().to_string().ends_with("fw-f1-default-exec/1"),
        "expected the next unique suffix, got {}",
        directory.display()
    );
}

#[tokio::test]
async fn reregistration_reports_live_tasks() {
    let fx = registered_slave().await;
    run_task(&fx, "f1", "t1", "cpus:1;mem:512");
    let (exec, exec_seen) = Recorder::new();
    let exec_addr = fx.sys.spawn("executor-1", exec, &[]).unwrap();
    send_msg(
        &fx.sys,
        &exec_addr,
        &fx.slave,
        &e2s::RegisterExecutor {
            framework_id: fid("f1"),
            executor_id: ExecutorId("default-exec".to_string()),
        },
    );
    eventually("task flushed", || sent::<s2e::RunTask>(&exec_seen).len() == 1).await;
    send_msg(
        &fx.sys,
        &exec_addr,
        &fx.slave,
        &e2s::StatusUpdate {
            framework_id: fid("f1"),
            status: TaskStatus {
                task_id: TaskId("t1".to_string()),
                slave_id: fx.slave_id.clone(),
                state: TaskState::Running,
                message: String::new(),
            },
        },
    );
    settle().await;

    // A new master appears; the slave re-registers with its live task.
    send_msg(
        &fx.sys,
        &fx.master_addr,
        &fx.slave,
        &oracle::NewMasterDetected {
            master_addr: fx.master_addr.clone(),
        },
    );
    eventually("re-registered with tasks", || {
        first::<s2m::ReregisterSlave>(&fx.master_seen).is_some()
    })
    .await;
    let rereg = first::<s2m::ReregisterSlave>(&fx.master_seen).unwrap();
    assert_eq!(rereg.slave_id, fx.slave_id);
    assert_eq!(rereg.tasks.len(), 1);
    assert_eq!(rereg.tasks[0].task_id.0, "t1");
    assert_eq!(rereg.tasks[0].state, TaskState::Running);
}

#[tokio::test]
async fn framework_messages_route_both_ways() {
    let fx = registered_slave().await;
    run_task(&fx, "f1", "t1", "cpus:1;mem:512");
    let (exec, exec_seen) = Recorder::new();
    let exec_addr = fx.sys.spawn("executor-1", exec, &[]).unwrap();
    send_msg(
        &fx.sys,
        &exec_addr,
        &fx.slave,
        &e2s::RegisterExecutor {
            framework_id: fid("f1"),
            executor_id: ExecutorId("default-exec".to_string()),
        },
    );
    eventually("registered", || {
        first::<s2e::ExecutorRegistered>(&exec_seen).is_some()
    })
    .await;

    // Scheduler -> executor.
    send_msg(
        &fx.sys,
        &fx.master_addr,
        &fx.slave,
        &m2s::FrameworkMessage {
            slave_id: fx.slave_id.clone(),
            framework_id: fid("f1"),
            executor_id: ExecutorId("default-exec".to_string()),
            data: "work-unit-7".to_string(),
        },
    );
    eventually("delivered to executor", || {
        first::<s2e::FrameworkMessage>(&exec_seen)
            .map(|m| m.data == "work-unit-7")
            .unwrap_or(false)
    })
    .await;

    // Executor -> scheduler, via the master.
    send_msg(
        &fx.sys,
        &exec_addr,
        &fx.slave,
        &e2s::FrameworkMessage {
            slave_id: fx.slave_id.clone(),
            framework_id: fid("f1"),
            executor_id: ExecutorId("default-exec".to_string()),
            data: "result-7".to_string(),
        },
    );
    eventually("forwarded to the master", || {
        first::<s2m::FrameworkMessage>(&fx.master_seen)
            .map(|m| m.data == "result-7")
            .unwrap_or(false)
    })
    .await;

    // A message for an executor that is not running is dropped and counted.
    send_msg(
        &fx.sys,
        &fx.master_addr,
        &fx.slave,
        &m2s::FrameworkMessage {
            slave_id: fx.slave_id.clone(),
            framework_id: fid("f1"),
            executor_id: ExecutorId("no-such-exec".to_string()),
            data: "void".to_string(),
        },
    );
    settle().await;
    let reply = fx.sys.query(SLAVE_ACTOR, "stats.json").await.unwrap();
    let stats: serde_json::Value = serde_json::from_str(&reply.body).unwrap();
    assert_eq!(stats["invalid_framework_messages"], 1);
    assert_eq!(stats["valid_framework_messages"], 2);
}

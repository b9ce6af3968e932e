//! End-to-end scenarios with a real master and a real slave in one actor
//! system; scripted doubles play the scheduler and the executor.

mod common;

use actor_runtime::{ActorAddr, ActorSystem};
use common::*;
use foreman::ids::{ExecutorId, SlaveId, TaskId};
use foreman::master::allocator::DrfAllocator;
use foreman::messages::{
    e2s, f2m, m2f, oracle, s2e, OfferFilters, TaskDescription, TaskState, TaskStatus,
};
use foreman::ids::FrameworkId;
use foreman::{Master, Slave, MASTER_ACTOR, MASTER_INSTALLS, SLAVE_ACTOR, SLAVE_INSTALLS};
use std::path::PathBuf;
use std::sync::{Arc, Mutex};
use std::time::Duration;

struct Cluster {
    sys: ActorSystem,
    master: ActorAddr,
    slave: ActorAddr,
    scheduler: ActorAddr,
    scheduler_seen: Seen,
    executor: ActorAddr,
    executor_seen: Seen,
    launches: Arc<Mutex<Vec<(FrameworkId, foreman::ids::ExecutorId, PathBuf)>>>,
    _work_dir: tempfile::TempDir,
}

/// One master, one slave (cpus:2;mem:1024), a scheduler double, and an
/// executor double, all wired and registered.
async fn cluster() -> Cluster {
    let sys = system().await;
    sys.clock().pause();
    let work_dir = tempfile::tempdir().unwrap();

    let master_actor = Master::new(Box::new(DrfAllocator::new()), Vec::new());
    let master = sys
        .spawn(MASTER_ACTOR, master_actor, MASTER_INSTALLS)
        .unwrap();

    let (isolation, launches, _) = TestIsolation::new();
    let slave_actor = Slave::new(
        slave_info("cpus:2;mem:1024"),
        Box::new(isolation),
        work_dir.path().to_path_buf(),
        Vec::new(),
    );
    let slave = sys.spawn(SLAVE_ACTOR, slave_actor, SLAVE_INSTALLS).unwrap();

    let (scheduler, scheduler_seen) = Recorder::new();
    let scheduler = sys.spawn("scheduler", scheduler, &[]).unwrap();
    let (executor, executor_seen) = Recorder::new();
    let executor = sys.spawn("executor", executor, &[]).unwrap();

    send_msg(
        &sys,
        &master,
        &slave,
        &oracle::NewMasterDetected {
            master_addr: master.clone(),
        },
    );
    settle().await;

    Cluster {
        sys,
        master,
        slave,
        scheduler,
        scheduler_seen,
        executor,
        executor_seen,
        launches,
        _work_dir: work_dir,
    }
}

/// Registers the scheduler double and accepts the first offer with one
/// task; walks the executor through registration. Returns the framework
/// id, slave id, and the task id.
async fn launch_task(
    cl: &Cluster,
    task_id: &str,
    resources: &str,
) -> (foreman::ids::FrameworkId, SlaveId, TaskId) {
    let mut info = framework_info("pipeline");
    info.failover_timeout_secs = 60.0;
    send_msg(
        &cl.sys,
        &cl.scheduler,
        &cl.master,
        &f2m::RegisterFramework { framework: info },
    );
    eventually("offer arrives", || {
        first::<m2f::ResourceOffer>(&cl.scheduler_seen).is_some()
    })
    .await;
    let framework_id = first::<m2f::FrameworkRegistered>(&cl.scheduler_seen)
        .unwrap()
        .framework_id;
    let offer = first::<m2f::ResourceOffer>(&cl.scheduler_seen).unwrap();
    assert_eq!(offer.resources, res("cpus:2;mem:1024"));

    send_msg(
        &cl.sys,
        &cl.scheduler,
        &cl.master,
        &f2m::ResourceOfferReply {
            offer_id: offer.offer_id,
            framework_id: framework_id.clone(),
            tasks: vec![TaskDescription {
                task_id: TaskId(task_id.to_string()),
                name: task_id.to_string(),
                resources: res(resources),
                executor: None,
                data: String::new(),
            }],
            filters: OfferFilters { refuse_secs: 300.0 },
        },
    );

    // Wait for the slave to launch the executor, then let the double
    // register as it.
    eventually("executor launched", || !cl.launches.lock().unwrap().is_empty()).await;
    send_msg(
        &cl.sys,
        &cl.executor,
        &cl.slave,
        &e2s::RegisterExecutor {
            framework_id: framework_id.clone(),
            executor_id: ExecutorId("default-exec".to_string()),
        },
    );
    eventually("task reaches the executor", || {
        sent::<s2e::RunTask>(&cl.executor_seen)
            .iter()
            .any(|r| r.task.task_id.0 == task_id)
    })
    .await;
    (framework_id, offer.slave_id, TaskId(task_id.to_string()))
}

fn status(task_id: &TaskId, slave_id: &SlaveId, state: TaskState) -> TaskStatus {
    TaskStatus {
        task_id: task_id.clone(),
        slave_id: slave_id.clone(),
        state,
        message: String::new(),
    }
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn single_task_happy_path_end_to_end() {
    let cl = cluster().await;
    let (framework_id, slave_id, task_id) = launch_task(&cl, "t1", "cpus:1;mem:512").await;

    for state in [TaskState::Starting, TaskState::Running, TaskState::Finished] {
        send_msg(
            &cl.sys,
            &cl.executor,
            &cl.slave,
            &e2s::StatusUpdate {
                framework_id: framework_id.clone(),
                status: status(&task_id, &slave_id, state),
            },
        );
        settle().await;
    }

    eventually("scheduler sees the full lifecycle", || {
        let states: Vec<TaskState> = sent::<m2f::StatusUpdate>(&cl.scheduler_seen)
            .iter()
            .map(|u| u.status.state)
            .collect();
        states == [TaskState::Starting, TaskState::Running, TaskState::Finished]
    })
    .await;

    // The master acked everything: nothing is resent long after.
    advance_secs(&cl.sys, 25).await;
    assert_eq!(
        sent::<m2f::StatusUpdate>(&cl.scheduler_seen).len(),
        3,
        "acked updates must not be redelivered"
    );

    // Resources are whole again, on both sides of the accounting.
    let reply = cl.sys.query(MASTER_ACTOR, "slaves.json").await.unwrap();
    let slaves: serde_json::Value = serde_json::from_str(&reply.body).unwrap();
    assert_eq!(slaves[0]["used"], "");
    let reply = cl.sys.query(MASTER_ACTOR, "stats.json").await.unwrap();
    let stats: serde_json::Value = serde_json::from_str(&reply.body).unwrap();
    assert_eq!(stats["launched_tasks"], 1);
    assert_eq!(stats["finished_tasks"], 1);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn slave_loss_reaches_the_scheduler_as_task_lost() {
    let cl = cluster().await;
    let (framework_id, slave_id, task_id) = launch_task(&cl, "t1", "cpus:1;mem:512").await;
    send_msg(
        &cl.sys,
        &cl.executor,
        &cl.slave,
        &e2s::StatusUpdate {
            framework_id: framework_id.clone(),
            status: status(&task_id, &slave_id, TaskState::Running),
        },
    );
    eventually("running", || {
        sent::<m2f::StatusUpdate>(&cl.scheduler_seen)
            .iter()
            .any(|u| u.status.state == TaskState::Running)
    })
    .await;

    cl.sys.terminate(&cl.slave);

    eventually("one TASK_LOST and the slave is gone", || {
        let lost = sent::<m2f::StatusUpdate>(&cl.scheduler_seen)
            .into_iter()
            .filter(|u| u.status.state == TaskState::Lost)
            .count();
        lost == 1 && first::<m2f::LostSlave>(&cl.scheduler_seen).is_some()
    })
    .await;
    let reply = cl.sys.query(MASTER_ACTOR, "slaves.json").await.unwrap();
    assert_eq!(reply.body, "[]");
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn status_update_survives_a_master_restart() {
    let cl = cluster().await;
    let (framework_id, slave_id, task_id) = launch_task(&cl, "t1", "cpus:1;mem:512").await;
    send_msg(
        &cl.sys,
        &cl.executor,
        &cl.slave,
        &e2s::StatusUpdate {
            framework_id: framework_id.clone(),
            status: status(&task_id, &slave_id, TaskState::Running),
        },
    );
    eventually("running", || {
        sent::<m2f::StatusUpdate>(&cl.scheduler_seen)
            .iter()
            .any(|u| u.status.state == TaskState::Running)
    })
    .await;

    // The master dies. The slave notices through the link.
    cl.sys.terminate(&cl.master);
    settle().await;

    // The executor finishes while no master is around; the update is
    // buffered in the retry table.
    send_msg(
        &cl.sys,
        &cl.executor,
        &cl.slave,
        &e2s::StatusUpdate {
            framework_id: framework_id.clone(),
            status: status(&task_id, &slave_id, TaskState::Finished),
        },
    );
    settle().await;
    assert!(
        !sent::<m2f::StatusUpdate>(&cl.scheduler_seen)
            .iter()
            .any(|u| u.status.state == TaskState::Finished),
        "no master, no forward"
    );

    // A fresh master takes over; the scheduler fails over first, then the
    // slave re-registers. The actor name frees asynchronously.
    let mut respawned = None;
    for _ in 0..100 {
        match cl.sys.spawn(
            MASTER_ACTOR,
            Master::new(Box::new(DrfAllocator::new()), Vec::new()),
            MASTER_INSTALLS,
        ) {
            Ok(addr) => {
                respawned = Some(addr);
                break;
            }
            Err(_) => tokio::time::sleep(Duration::from_millis(10)).await,
        }
    }
    let master_addr = respawned.expect("master name never freed");
    let mut info = framework_info("pipeline");
    info.failover_timeout_secs = 60.0;
    send_msg(
        &cl.sys,
        &cl.scheduler,
        &cl.master,
        &f2m::ReregisterFramework {
            framework_id: framework_id.clone(),
            framework: info,
            failover: true,
        },
    );
    eventually("scheduler failed over", || {
        first::<m2f::FrameworkReregistered>(&cl.scheduler_seen).is_some()
    })
    .await;
    send_msg(
        &cl.sys,
        &master_addr,
        &cl.slave,
        &oracle::NewMasterDetected {
            master_addr: master_addr.clone(),
        },
    );
    settle().await;

    // The retry interval elapses: the buffered FINISHED reaches the new
    // master, which forwards and acks it.
    advance_secs(&cl.sys, 11).await;
    eventually("FINISHED delivered after restart", || {
        sent::<m2f::StatusUpdate>(&cl.scheduler_seen)
            .iter()
            .any(|u| u.status.state == TaskState::Finished)
    })
    .await;

    // The ack cleared the slave's retry entry: no duplicates later.
    let finished = || {
        sent::<m2f::StatusUpdate>(&cl.scheduler_seen)
            .into_iter()
            .filter(|u| u.status.state == TaskState::Finished)
            .count()
    };
    let delivered = finished();
    advance_secs(&cl.sys, 25).await;
    assert_eq!(finished(), delivered, "ack must clear the retry entry");
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn scheduler_messages_flow_through_master_and_slave() {
    let cl = cluster().await;
    let (framework_id, slave_id, _task_id) = launch_task(&cl, "t1", "cpus:1;mem:512").await;

    send_msg(
        &cl.sys,
        &cl.scheduler,
        &cl.master,
        &f2m::FrameworkMessage {
            slave_id: slave_id.clone(),
            framework_id: framework_id.clone(),
            executor_id: ExecutorId("default-exec".to_string()),
            data: "shard-3".to_string(),
        },
    );
    eventually("scheduler message reaches the executor", || {
        first::<s2e::FrameworkMessage>(&cl.executor_seen)
            .map(|m| m.data == "shard-3")
            .unwrap_or(false)
    })
    .await;

    send_msg(
        &cl.sys,
        &cl.executor,
        &cl.slave,
        &e2s::FrameworkMessage {
            slave_id,
            framework_id,
            executor_id: ExecutorId("default-exec".to_string()),
            data: "shard-3-done".to_string(),
        },
    );
    eventually("executor message reaches the scheduler", || {
        first::<m2f::FrameworkMessage>(&cl.scheduler_seen)
            .map(|m| m.data == "shard-3-done")
            .unwrap_or(false)
    })
    .await;
}

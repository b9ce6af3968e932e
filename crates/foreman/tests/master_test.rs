//! Master behavior against scripted framework and slave peers.

mod common;

use actor_runtime::{ActorAddr, ActorSystem};
use common::*;
use foreman::ids::{SlaveId, TaskId};
use foreman::master::allocator::DrfAllocator;
use foreman::messages::{f2m, m2f, m2s, s2m, OfferFilters, TaskDescription, TaskState, TaskStatus};
use foreman::{Master, MASTER_ACTOR, MASTER_INSTALLS};
use std::time::Duration;

async fn master_system() -> (ActorSystem, ActorAddr) {
    let sys = system().await;
    sys.clock().pause();
    let master = Master::new(Box::new(DrfAllocator::new()), Vec::new());
    let addr = sys.spawn(MASTER_ACTOR, master, MASTER_INSTALLS).unwrap();
    (sys, addr)
}

fn task(id: &str, resources: &str) -> TaskDescription {
    TaskDescription {
        task_id: TaskId(id.to_string()),
        name: id.to_string(),
        resources: res(resources),
        executor: None,
        data: String::new(),
    }
}

async fn stats(sys: &ActorSystem) -> serde_json::Value {
    let reply = sys.query(MASTER_ACTOR, "stats.json").await.unwrap();
    serde_json::from_str(&reply.body).unwrap()
}

#[tokio::test]
async fn single_task_happy_path() {
    let (sys, master) = master_system().await;
    let (fw, fw_seen) = Recorder::new();
    let fw_addr = sys.spawn("framework1", fw, &[]).unwrap();
    let (sl, sl_seen) = Recorder::new();
    let sl_addr = sys.spawn("slave1", sl, &[]).unwrap();

    send_msg(
        &sys,
        &fw_addr,
        &master,
        &f2m::RegisterFramework {
            framework: framework_info("wordcount"),
        },
    );
    eventually("framework registered", || {
        first::<m2f::FrameworkRegistered>(&fw_seen).is_some()
    })
    .await;
    let framework_id = first::<m2f::FrameworkRegistered>(&fw_seen)
        .unwrap()
        .framework_id;

    send_msg(
        &sys,
        &sl_addr,
        &master,
        &s2m::RegisterSlave {
            slave: slave_info("cpus:2;mem:1024"),
        },
    );
    eventually("slave registered and offer sent", || {
        first::<m2s::SlaveRegistered>(&sl_seen).is_some()
            && first::<m2f::ResourceOffer>(&fw_seen).is_some()
    })
    .await;
    let slave_id = first::<m2s::SlaveRegistered>(&sl_seen).unwrap().slave_id;
    let offer = first::<m2f::ResourceOffer>(&fw_seen).unwrap();
    assert_eq!(offer.resources, res("cpus:2;mem:1024"));
    assert_eq!(offer.slave_id, slave_id);

    // Launch one task on half the offer; filter the declined remainder so
    // it stays put for the rest of the test.
    send_msg(
        &sys,
        &fw_addr,
        &master,
        &f2m::ResourceOfferReply {
            offer_id: offer.offer_id,
            framework_id: framework_id.clone(),
            tasks: vec![task("t1", "cpus:1;mem:512")],
            filters: OfferFilters { refuse_secs: 60.0 },
        },
    );
    eventually("run_task reached the slave", || {
        first::<m2s::RunTask>(&sl_seen).is_some()
    })
    .await;
    let run = first::<m2s::RunTask>(&sl_seen).unwrap();
    assert_eq!(run.task.task_id.0, "t1");
    assert_eq!(run.framework_addr, fw_addr);

    // The slave walks the task through its lifecycle.
    for state in [TaskState::Starting, TaskState::Running, TaskState::Finished] {
        send_msg(
            &sys,
            &sl_addr,
            &master,
            &s2m::StatusUpdate {
                framework_id: framework_id.clone(),
                status: TaskStatus {
                    task_id: TaskId("t1".to_string()),
                    slave_id: slave_id.clone(),
                    state,
                    message: String::new(),
                },
            },
        );
        settle().await;
    }

    eventually("updates forwarded and acked", || {
        sent::<m2f::StatusUpdate>(&fw_seen).len() == 3
            && sent::<m2s::StatusUpdateAck>(&sl_seen).len() == 3
    })
    .await;
    let states: Vec<TaskState> = sent::<m2f::StatusUpdate>(&fw_seen)
        .iter()
        .map(|u| u.status.state)
        .collect();
    assert_eq!(
        states,
        [TaskState::Starting, TaskState::Running, TaskState::Finished]
    );

    // After FINISHED the task's resources are free again: the next offer
    // carries the whole pool.
    eventually("full pool re-offered", || {
        sent::<m2f::ResourceOffer>(&fw_seen)
            .iter()
            .any(|o| o.resources == res("cpus:2;mem:1024"))
    })
    .await;

    let stats = stats(&sys).await;
    assert_eq!(stats["launched_tasks"], 1);
    assert_eq!(stats["finished_tasks"], 1);
    assert_eq!(stats["invalid_status_updates"], 0);
}

#[tokio::test]
async fn overcommitted_offer_reply_is_rejected_whole() {
    let (sys, master) = master_system().await;
    let (fw, fw_seen) = Recorder::new();
    let fw_addr = sys.spawn("framework1", fw, &[]).unwrap();
    let (sl, sl_seen) = Recorder::new();
    let sl_addr = sys.spawn("slave1", sl, &[]).unwrap();

    send_msg(
        &sys,
        &fw_addr,
        &master,
        &f2m::RegisterFramework {
            framework: framework_info("greedy"),
        },
    );
    send_msg(
        &sys,
        &sl_addr,
        &master,
        &s2m::RegisterSlave {
            slave: slave_info("cpus:1;mem:512"),
        },
    );
    eventually("offer sent", || {
        first::<m2f::ResourceOffer>(&fw_seen).is_some()
    })
    .await;
    let framework_id = first::<m2f::FrameworkRegistered>(&fw_seen)
        .unwrap()
        .framework_id;
    let offer = first::<m2f::ResourceOffer>(&fw_seen).unwrap();

    // cpus:2 from a cpus:1 offer: the whole reply dies.
    send_msg(
        &sys,
        &fw_addr,
        &master,
        &f2m::ResourceOfferReply {
            offer_id: offer.offer_id,
            framework_id,
            tasks: vec![task("t1", "cpus:2;mem:512")],
            filters: OfferFilters { refuse_secs: 0.0 },
        },
    );

    eventually("error reported", || {
        first::<m2f::ProtocolError>(&fw_seen).is_some()
    })
    .await;
    assert!(sent::<m2s::RunTask>(&sl_seen).is_empty(), "no task may launch");

    // The resources went back to free and the next allocator round offers
    // them again.
    eventually("re-offered after rejection", || {
        sent::<m2f::ResourceOffer>(&fw_seen).len() >= 2
    })
    .await;
    let second = &sent::<m2f::ResourceOffer>(&fw_seen)[1];
    assert_eq!(second.resources, res("cpus:1;mem:512"));

    let stats = stats(&sys).await;
    assert_eq!(stats["launched_tasks"], 0);
    assert_eq!(stats["invalid_offer_replies"], 1);
}

#[tokio::test]
async fn slave_exit_loses_tasks_exactly_once() {
    let (sys, master) = master_system().await;
    let (fw, fw_seen) = Recorder::new();
    let fw_addr = sys.spawn("framework1", fw, &[]).unwrap();
    let (sl, sl_seen) = Recorder::new();
    let sl_addr = sys.spawn("slave1", sl, &[]).unwrap();

    send_msg(
        &sys,
        &fw_addr,
        &master,
        &f2m::RegisterFramework {
            framework: framework_info("fragile"),
        },
    );
    send_msg(
        &sys,
        &sl_addr,
        &master,
        &s2m::RegisterSlave {
            slave: slave_info("cpus:2;mem:1024"),
        },
    );
    eventually("offer sent", || {
        first::<m2f::ResourceOffer>(&fw_seen).is_some()
    })
    .await;
    let framework_id = first::<m2f::FrameworkRegistered>(&fw_seen)
        .unwrap()
        .framework_id;
    let slave_id = first::<m2s::SlaveRegistered>(&sl_seen).unwrap().slave_id;
    let offer = first::<m2f::ResourceOffer>(&fw_seen).unwrap();

    send_msg(
        &sys,
        &fw_addr,
        &master,
        &f2m::ResourceOfferReply {
            offer_id: offer.offer_id,
            framework_id: framework_id.clone(),
            tasks: vec![task("t1", "cpus:1;mem:512")],
            filters: OfferFilters { refuse_secs: 60.0 },
        },
    );
    send_msg(
        &sys,
        &sl_addr,
        &master,
        &s2m::StatusUpdate {
            framework_id: framework_id.clone(),
            status: TaskStatus {
                task_id: TaskId("t1".to_string()),
                slave_id: slave_id.clone(),
                state: TaskState::Running,
                message: String::new(),
            },
        },
    );
    eventually("task running", || {
        sent::<m2f::StatusUpdate>(&fw_seen)
            .iter()
            .any(|u| u.status.state == TaskState::Running)
    })
    .await;

    // The slave's process dies.
    sys.terminate(&sl_addr);

    eventually("exactly one TASK_LOST and a lost-slave notice", || {
        let lost: Vec<_> = sent::<m2f::StatusUpdate>(&fw_seen)
            .into_iter()
            .filter(|u| u.status.state == TaskState::Lost)
            .collect();
        lost.len() == 1
            && lost[0].status.task_id.0 == "t1"
            && first::<m2f::LostSlave>(&fw_seen).is_some()
    })
    .await;

    // The slave entry is gone and its resources are not counted anywhere.
    let reply = sys.query(MASTER_ACTOR, "slaves.json").await.unwrap();
    assert_eq!(reply.body, "[]");
    let stats = stats(&sys).await;
    assert_eq!(stats["lost_tasks"], 1);

    // Settled state: no duplicate LOST arrives later.
    advance_secs(&sys, 3).await;
    let lost_count = sent::<m2f::StatusUpdate>(&fw_seen)
        .into_iter()
        .filter(|u| u.status.state == TaskState::Lost)
        .count();
    assert_eq!(lost_count, 1);
}

#[tokio::test]
async fn framework_failover_keeps_running_tasks() {
    let (sys, master) = master_system().await;
    let (fw1, fw1_seen) = Recorder::new();
    let fw1_addr = sys.spawn("framework1", fw1, &[]).unwrap();
    let (sl, sl_seen) = Recorder::new();
    let sl_addr = sys.spawn("slave1", sl, &[]).unwrap();

    let mut info = framework_info("durable");
    info.failover_timeout_secs = 60.0;
    send_msg(&sys, &fw1_addr, &master, &f2m::RegisterFramework { framework: info.clone() });
    send_msg(
        &sys,
        &sl_addr,
        &master,
        &s2m::RegisterSlave {
            slave: slave_info("cpus:2;mem:1024"),
        },
    );
    eventually("offer sent", || {
        first::<m2f::ResourceOffer>(&fw1_seen).is_some()
    })
    .await;
    let framework_id = first::<m2f::FrameworkRegistered>(&fw1_seen)
        .unwrap()
        .framework_id;
    let slave_id = first::<m2s::SlaveRegistered>(&sl_seen).unwrap().slave_id;
    let offer = first::<m2f::ResourceOffer>(&fw1_seen).unwrap();

    send_msg(
        &sys,
        &fw1_addr,
        &master,
        &f2m::ResourceOfferReply {
            offer_id: offer.offer_id,
            framework_id: framework_id.clone(),
            tasks: vec![task("t1", "cpus:1;mem:512")],
            filters: OfferFilters { refuse_secs: 60.0 },
        },
    );
    send_msg(
        &sys,
        &sl_addr,
        &master,
        &s2m::StatusUpdate {
            framework_id: framework_id.clone(),
            status: TaskStatus {
                task_id: TaskId("t1".to_string()),
                slave_id: slave_id.clone(),
                state: TaskState::Running,
                message: String::new(),
            },
        },
    );
    eventually("t1 running", || {
        sent::<m2f::StatusUpdate>(&fw1_seen)
            .iter()
            .any(|u| u.status.state == TaskState::Running)
    })
    .await;

    // The scheduler dies; within the failover window a new incarnation
    // re-registers under the same framework id.
    sys.terminate(&fw1_addr);
    advance_secs(&sys, 5).await;

    let (fw2, fw2_seen) = Recorder::new();
    let fw2_addr = sys.spawn("framework2", fw2, &[]).unwrap();
    send_msg(
        &sys,
        &fw2_addr,
        &master,
        &f2m::ReregisterFramework {
            framework_id: framework_id.clone(),
            framework: info,
            failover: true,
        },
    );
    eventually("re-registered", || {
        first::<m2f::FrameworkReregistered>(&fw2_seen).is_some()
    })
    .await;

    // The slave is told about the new scheduler address.
    eventually("slave repointed", || {
        first::<m2s::UpdateFramework>(&sl_seen)
            .map(|u| u.framework_addr == fw2_addr)
            .unwrap_or(false)
    })
    .await;

    // t1 survived the failover and its next update reaches the new actor.
    send_msg(
        &sys,
        &sl_addr,
        &master,
        &s2m::StatusUpdate {
            framework_id: framework_id.clone(),
            status: TaskStatus {
                task_id: TaskId("t1".to_string()),
                slave_id,
                state: TaskState::Running,
                message: String::new(),
            },
        },
    );
    eventually("update reaches the new incarnation", || {
        sent::<m2f::StatusUpdate>(&fw2_seen)
            .iter()
            .any(|u| u.status.state == TaskState::Running)
    })
    .await;
}

#[tokio::test]
async fn framework_removed_after_failover_window() {
    let (sys, master) = master_system().await;
    let (fw, fw_seen) = Recorder::new();
    let fw_addr = sys.spawn("framework1", fw, &[]).unwrap();
    let (sl, sl_seen) = Recorder::new();
    let sl_addr = sys.spawn("slave1", sl, &[]).unwrap();

    let mut info = framework_info("doomed");
    info.failover_timeout_secs = 10.0;
    send_msg(&sys, &fw_addr, &master, &f2m::RegisterFramework { framework: info });
    send_msg(
        &sys,
        &sl_addr,
        &master,
        &s2m::RegisterSlave {
            slave: slave_info("cpus:2;mem:1024"),
        },
    );
    eventually("offer sent", || {
        first::<m2f::ResourceOffer>(&fw_seen).is_some()
    })
    .await;
    let framework_id = first::<m2f::FrameworkRegistered>(&fw_seen)
        .unwrap()
        .framework_id;
    let offer = first::<m2f::ResourceOffer>(&fw_seen).unwrap();
    send_msg(
        &sys,
        &fw_addr,
        &master,
        &f2m::ResourceOfferReply {
            offer_id: offer.offer_id,
            framework_id,
            tasks: vec![task("t1", "cpus:1;mem:512")],
            filters: OfferFilters { refuse_secs: 60.0 },
        },
    );
    eventually("task launched", || first::<m2s::RunTask>(&sl_seen).is_some()).await;

    sys.terminate(&fw_addr);
    settle().await;
    // No re-registration within the window: the framework and its tasks go.
    advance_secs(&sys, 12).await;

    eventually("slave told to kill the framework", || {
        first::<m2s::KillFramework>(&sl_seen).is_some()
    })
    .await;
    let reply = sys.query(MASTER_ACTOR, "frameworks.json").await.unwrap();
    assert_eq!(reply.body, "[]");
    let stats = stats(&sys).await;
    assert_eq!(stats["killed_tasks"], 1);
}

#[tokio::test]
async fn allocator_tie_break_and_decline_filter() {
    let (sys, master) = master_system().await;
    let (fw1, fw1_seen) = Recorder::new();
    let fw1_addr = sys.spawn("framework1", fw1, &[]).unwrap();
    let (fw2, fw2_seen) = Recorder::new();
    let fw2_addr = sys.spawn("framework2", fw2, &[]).unwrap();
    let (sl, _sl_seen) = Recorder::new();
    let sl_addr = sys.spawn("slave1", sl, &[]).unwrap();

    // Framework 1 registers strictly earlier on the paused clock.
    send_msg(
        &sys,
        &fw1_addr,
        &master,
        &f2m::RegisterFramework {
            framework: framework_info("early"),
        },
    );
    eventually("fw1 registered", || {
        first::<m2f::FrameworkRegistered>(&fw1_seen).is_some()
    })
    .await;
    sys.clock().advance(Duration::from_millis(10));
    settle().await;
    send_msg(
        &sys,
        &fw2_addr,
        &master,
        &f2m::RegisterFramework {
            framework: framework_info("late"),
        },
    );
    eventually("fw2 registered", || {
        first::<m2f::FrameworkRegistered>(&fw2_seen).is_some()
    })
    .await;

    send_msg(
        &sys,
        &sl_addr,
        &master,
        &s2m::RegisterSlave {
            slave: slave_info("cpus:4"),
        },
    );

    // Both are at zero usage; the earlier registration wins.
    eventually("fw1 offered first", || {
        first::<m2f::ResourceOffer>(&fw1_seen).is_some()
    })
    .await;
    assert!(sent::<m2f::ResourceOffer>(&fw2_seen).is_empty());
    let offer = first::<m2f::ResourceOffer>(&fw1_seen).unwrap();
    let fw1_id = first::<m2f::FrameworkRegistered>(&fw1_seen)
        .unwrap()
        .framework_id;

    // fw1 declines with a 5 s filter; the pool flows to fw2.
    send_msg(
        &sys,
        &fw1_addr,
        &master,
        &f2m::ResourceOfferReply {
            offer_id: offer.offer_id,
            framework_id: fw1_id,
            tasks: Vec::new(),
            filters: OfferFilters { refuse_secs: 5.0 },
        },
    );
    eventually("fw2 offered after the decline", || {
        first::<m2f::ResourceOffer>(&fw2_seen).is_some()
    })
    .await;
    assert_eq!(
        first::<m2f::ResourceOffer>(&fw2_seen).unwrap().resources,
        res("cpus:4")
    );
}

#[tokio::test]
async fn unknown_status_updates_are_counted_and_not_acked() {
    let (sys, master) = master_system().await;
    let (sl, sl_seen) = Recorder::new();
    let sl_addr = sys.spawn("slave1", sl, &[]).unwrap();

    send_msg(
        &sys,
        &sl_addr,
        &master,
        &s2m::StatusUpdate {
            framework_id: foreman::ids::FrameworkId("no-such".to_string()),
            status: TaskStatus {
                task_id: TaskId("t1".to_string()),
                slave_id: SlaveId("no-such".to_string()),
                state: TaskState::Finished,
                message: String::new(),
            },
        },
    );
    settle().await;
    assert!(sent::<m2s::StatusUpdateAck>(&sl_seen).is_empty());
    let stats = stats(&sys).await;
    assert_eq!(stats["invalid_status_updates"], 1);
}

#[tokio::test]
async fn reregistration_without_failover_is_a_protocol_error() {
    let (sys, master) = master_system().await;
    let (fw, fw_seen) = Recorder::new();
    let fw_addr = sys.spawn("framework1", fw, &[]).unwrap();

    send_msg(
        &sys,
        &fw_addr,
        &master,
        &f2m::ReregisterFramework {
            framework_id: foreman::ids::FrameworkId("stale-0".to_string()),
            framework: framework_info("stale"),
            failover: false,
        },
    );
    eventually("error reported", || {
        first::<m2f::ProtocolError>(&fw_seen).is_some()
    })
    .await;
    assert!(first::<m2f::FrameworkReregistered>(&fw_seen).is_none());
}

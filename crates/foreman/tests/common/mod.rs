//! Shared test doubles: recording actors play the framework and executor
//! roles, a no-op isolation module stands in for process launching, and a
//! paused clock drives every timer deterministically.

#![allow(dead_code)]

use actor_runtime::{Actor, ActorAddr, ActorError, ActorSystem, Context, Envelope};
use async_trait::async_trait;
use foreman::ids::{ExecutorId, FrameworkId};
use foreman::messages::{self as proto, ExecutorInfo, FrameworkInfo, SlaveInfo, WireMessage};
use foreman::resources::Resources;
use foreman::slave::isolation::{ExecutorLaunch, IsolationError, IsolationModule};
use std::path::PathBuf;
use std::sync::{Arc, Mutex};
use std::time::Duration;

pub type Seen = Arc<Mutex<Vec<Envelope>>>;

/// A scripted peer: records everything, sends nothing on its own. Tests
/// speak on its behalf with `send_msg`.
pub struct Recorder {
    seen: Seen,
}

impl Recorder {
    pub fn new() -> (Self, Seen) {
        let seen: Seen = Arc::new(Mutex::new(Vec::new()));
        (Self { seen: seen.clone() }, seen)
    }
}

#[async_trait]
impl Actor for Recorder {
    async fn receive(&mut self, _: &mut Context, envelope: Envelope) -> Result<(), ActorError> {
        self.seen.lock().unwrap().push(envelope);
        Ok(())
    }
}

/// Records launch and kill calls; creates the work directory so the unique
/// suffix search observes prior launches, but starts no process.
pub struct TestIsolation {
    pub launches: Arc<Mutex<Vec<(FrameworkId, ExecutorId, PathBuf)>>>,
    pub kills: Arc<Mutex<Vec<(FrameworkId, ExecutorId)>>>,
}

impl TestIsolation {
    #[allow(clippy::type_complexity)]
    pub fn new() -> (
        Self,
        Arc<Mutex<Vec<(FrameworkId, ExecutorId, PathBuf)>>>,
        Arc<Mutex<Vec<(FrameworkId, ExecutorId)>>>,
    ) {
        let launches = Arc::new(Mutex::new(Vec::new()));
        let kills = Arc::new(Mutex::new(Vec::new()));
        (
            Self {
                launches: launches.clone(),
                kills: kills.clone(),
            },
            launches,
            kills,
        )
    }
}

#[async_trait]
impl IsolationModule for TestIsolation {
    async fn launch_executor(&mut self, launch: ExecutorLaunch<'_>) -> Result<(), IsolationError> {
        tokio::fs::create_dir_all(launch.directory)
            .await
            .map_err(|e| IsolationError::WorkDirectory(launch.directory.to_path_buf(), e))?;
        self.launches.lock().unwrap().push((
            launch.framework_id.clone(),
            launch.executor.executor_id.clone(),
            launch.directory.to_path_buf(),
        ));
        Ok(())
    }

    async fn kill_executor(&mut self, framework_id: &FrameworkId, executor_id: &ExecutorId) {
        self.kills
            .lock()
            .unwrap()
            .push((framework_id.clone(), executor_id.clone()));
    }

    async fn resources_changed(&mut self, _: &FrameworkId, _: &ExecutorId, _: &Resources) {}
}

pub async fn system() -> ActorSystem {
    ActorSystem::bind("127.0.0.1", 0).await.unwrap()
}

pub fn res(text: &str) -> Resources {
    Resources::parse(text).unwrap()
}

pub fn framework_info(name: &str) -> FrameworkInfo {
    FrameworkInfo {
        name: name.to_string(),
        user: "tester".to_string(),
        executor: ExecutorInfo {
            executor_id: ExecutorId("default-exec".to_string()),
            uri: "/usr/libexec/test-executor".to_string(),
            data: String::new(),
        },
        principal: String::new(),
        failover_timeout_secs: 0.0,
    }
}

pub fn slave_info(resources: &str) -> SlaveInfo {
    SlaveInfo {
        hostname: "node1".to_string(),
        public_hostname: "node1.example.com".to_string(),
        resources: res(resources),
    }
}

/// All decoded messages of one kind, in arrival order.
pub fn sent<M: WireMessage>(seen: &Seen) -> Vec<M> {
    seen.lock()
        .unwrap()
        .iter()
        .filter(|e| e.name == M::NAME)
        .map(|e| proto::decode(e).expect("recorded message decodes"))
        .collect()
}

pub fn first<M: WireMessage>(seen: &Seen) -> Option<M> {
    sent::<M>(seen).into_iter().next()
}

pub fn count<M: WireMessage>(seen: &Seen) -> usize {
    seen.lock()
        .unwrap()
        .iter()
        .filter(|e| e.name == M::NAME)
        .count()
}

/// Sends `message` on behalf of the spawned double at `from`.
pub fn send_msg<M: WireMessage>(sys: &ActorSystem, from: &ActorAddr, to: &ActorAddr, message: &M) {
    let body = proto::body(message).expect("test message encodes");
    sys.post_as(from, to, M::NAME, body);
}

pub async fn eventually(what: &str, condition: impl Fn() -> bool) {
    for _ in 0..300 {
        if condition() {
            return;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
    panic!("timed out waiting for: {what}");
}

/// Steps a paused clock forward one second at a time so 1 Hz ticks re-arm
/// and fire along the way.
pub async fn advance_secs(sys: &ActorSystem, seconds: u64) {
    for _ in 0..seconds {
        sys.clock().advance(Duration::from_secs(1));
        tokio::time::sleep(Duration::from_millis(15)).await;
    }
}

pub async fn settle() {
    tokio::time::sleep(Duration::from_millis(60)).await;
}

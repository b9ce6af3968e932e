//! Executor isolation.
//!
//! The slave launches per-framework executor processes through this
//! pluggable interface and tells it whenever an executor's resource
//! entitlement changes. The default [`ProcessIsolation`] spawns plain OS
//! processes with the executor environment contract and no enforcement;
//! stricter modules (containers, cgroups) implement the same trait.

use crate::ids::{ExecutorId, FrameworkId, SlaveId};
use crate::messages::{ExecutorInfo, FrameworkInfo};
use crate::resources::Resources;
use actor_runtime::ActorAddr;
use async_trait::async_trait;
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::process::Stdio;
use std::sync::{Arc, Mutex};
use thiserror::Error;
use tokio::process::{Child, Command};
use tracing::{debug, info, warn};

#[derive(Debug, Error)]
pub enum IsolationError {
    #[error("creating work directory {0}: {1}")]
    WorkDirectory(PathBuf, std::io::Error),
    #[error("spawning executor '{0}': {1}")]
    Spawn(String, std::io::Error),
}

/// Everything a module needs to start one executor.
pub struct ExecutorLaunch<'a> {
    pub framework_id: &'a FrameworkId,
    pub framework: &'a FrameworkInfo,
    pub executor: &'a ExecutorInfo,
    pub directory: &'a Path,
    pub slave_id: &'a SlaveId,
    pub slave_addr: &'a ActorAddr,
}

#[async_trait]
pub trait IsolationModule: Send + Sync + 'static {
    async fn launch_executor(&mut self, launch: ExecutorLaunch<'_>) -> Result<(), IsolationError>;

    /// Kills the executor process and releases whatever the module holds
    /// for it.
    async fn kill_executor(&mut self, framework_id: &FrameworkId, executor_id: &ExecutorId);

    /// The sum of resources across the executor's current tasks changed.
    async fn resources_changed(
        &mut self,
        framework_id: &FrameworkId,
        executor_id: &ExecutorId,
        resources: &Resources,
    );
}

/// Child processes shared between the process isolation module (which
/// spawns them) and the executor reaper (which waits on them).
pub type ChildTable = Arc<Mutex<HashMap<(FrameworkId, ExecutorId), Child>>>;

pub fn child_table() -> ChildTable {
    Arc::new(Mutex::new(HashMap::new()))
}

/// Slave-level settings that shape every executor environment.
#[derive(Debug, Clone, Default)]
pub struct IsolationConfig {
    pub home: Option<PathBuf>,
    pub frameworks_home: Option<PathBuf>,
    pub hadoop_home: Option<PathBuf>,
    pub switch_user: bool,
    pub redirect_io: bool,
    pub public_hostname: String,
}

/// Launches executors as unconfined OS processes.
pub struct ProcessIsolation {
    config: IsolationConfig,
    children: ChildTable,
}

impl ProcessIsolation {
    pub fn new(config: IsolationConfig, children: ChildTable) -> Self {
        Self { config, children }
    }
}

#[async_trait]
impl IsolationModule for ProcessIsolation {
    async fn launch_executor(&mut self, launch: ExecutorLaunch<'_>) -> Result<(), IsolationError> {
        tokio::fs::create_dir_all(launch.directory)
            .await
            .map_err(|e| IsolationError::WorkDirectory(launch.directory.to_path_buf(), e))?;

        // Relative executor paths resolve against the frameworks home.
        let uri = Path::new(&launch.executor.uri);
        let program = if uri.is_relative() {
            match &self.config.frameworks_home {
                Some(home) => home.join(uri),
                None => uri.to_path_buf(),
            }
        } else {
            uri.to_path_buf()
        };

        let mut command = Command::new(&program);
        command
            .current_dir(launch.directory)
            .env("MESOS_FRAMEWORK_ID", launch.framework_id.to_string())
            .env("MESOS_EXECUTOR_ID", launch.executor.executor_id.to_string())
            .env("MESOS_EXECUTOR_URI", &launch.executor.uri)
            .env("MESOS_USER", &launch.framework.user)
            .env("MESOS_WORK_DIRECTORY", launch.directory)
            .env("MESOS_SLAVE_PID", launch.slave_addr.to_string())
            .env("MESOS_REDIRECT_IO", if self.config.redirect_io { "1" } else { "0" })
            .env("MESOS_SWITCH_USER", if self.config.switch_user { "1" } else { "0" })
            .env("MESOS_PUBLIC_DNS", &self.config.public_hostname);
        if let Some(home) = &self.config.home {
            command.env("MESOS_HOME", home);
        }
        if let Some(home) = &self.config.frameworks_home {
            command.env("MESOS_FRAMEWORKS_HOME", home);
        }
        if let Some(home) = &self.config.hadoop_home {
            command.env("MESOS_HADOOP_HOME", home);
        }

        if self.config.redirect_io {
            let stdout = tokio::fs::File::create(launch.directory.join("stdout"))
                .await
                .map_err(|e| IsolationError::WorkDirectory(launch.directory.to_path_buf(), e))?;
            let stderr = tokio::fs::File::create(launch.directory.join("stderr"))
                .await
                .map_err(|e| IsolationError::WorkDirectory(launch.directory.to_path_buf(), e))?;
            command
                .stdout(Stdio::from(stdout.into_std().await))
                .stderr(Stdio::from(stderr.into_std().await));
        }

        let child = command
            .spawn()
            .map_err(|e| IsolationError::Spawn(launch.executor.uri.clone(), e))?;
        info!(
            framework_id = %launch.framework_id,
            executor_id = %launch.executor.executor_id,
            pid = child.id(),
            directory = %launch.directory.display(),
            "launched executor"
        );
        let mut children = self.children.lock().expect("child table lock poisoned");
        children.insert(
            (launch.framework_id.clone(), launch.executor.executor_id.clone()),
            child,
        );
        Ok(())
    }

    async fn kill_executor(&mut self, framework_id: &FrameworkId, executor_id: &ExecutorId) {
        let child = {
            let mut children = self.children.lock().expect("child table lock poisoned");
            children.remove(&(framework_id.clone(), executor_id.clone()))
        };
        if let Some(mut child) = child {
            info!(%framework_id, %executor_id, "killing executor");
            if let Err(e) = child.start_kill() {
                warn!(%framework_id, %executor_id, error = %e, "kill failed");
            }
        }
    }

    async fn resources_changed(
        &mut self,
        framework_id: &FrameworkId,
        executor_id: &ExecutorId,
        resources: &Resources,
    ) {
        // Plain processes are not constrained; the module only records the
        // new entitlement.
        debug!(%framework_id, %executor_id, resources = %resources, "executor resources changed");
    }
}

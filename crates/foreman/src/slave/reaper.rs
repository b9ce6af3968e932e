//! The executor reaper.
//!
//! Waiting on child processes is a blocking OS concern, so it lives in this
//! helper subactor instead of the slave's handler loop. Once a second the
//! reaper polls every launched executor process and reports exits to the
//! slave as `R2S_EXECUTOR_EXITED`.

use crate::messages::{self as proto, r2s};
use crate::slave::isolation::ChildTable;
use actor_runtime::{Actor, ActorAddr, ActorError, Context, Envelope, TIMEOUT};
use async_trait::async_trait;
use bytes::Bytes;
use std::time::Duration;
use tracing::{debug, info};

pub const REAPER_ACTOR: &str = "reaper";

const REAP_INTERVAL: Duration = Duration::from_secs(1);

pub struct ExecutorReaper {
    slave: ActorAddr,
    children: ChildTable,
}

impl ExecutorReaper {
    pub fn new(slave: ActorAddr, children: ChildTable) -> Self {
        Self { slave, children }
    }

    fn reap(&mut self, ctx: &mut Context) -> Result<(), ActorError> {
        let mut exited = Vec::new();
        {
            let mut children = self.children.lock().expect("child table lock poisoned");
            children.retain(|(framework_id, executor_id), child| match child.try_wait() {
                Ok(Some(status)) => {
                    exited.push((
                        framework_id.clone(),
                        executor_id.clone(),
                        status.code().unwrap_or(-1),
                    ));
                    false
                }
                Ok(None) => true,
                Err(e) => {
                    debug!(%framework_id, %executor_id, error = %e, "wait failed; dropping child");
                    false
                }
            });
        }
        for (framework_id, executor_id, exit_status) in exited {
            info!(%framework_id, %executor_id, exit_status, "executor process exited");
            proto::send(
                ctx,
                &self.slave,
                &r2s::ExecutorExited {
                    framework_id,
                    executor_id,
                    exit_status,
                },
            )?;
        }
        Ok(())
    }
}

#[async_trait]
impl Actor for ExecutorReaper {
    async fn started(&mut self, ctx: &mut Context) -> Result<(), ActorError> {
        ctx.link(&self.slave);
        ctx.after(REAP_INTERVAL, TIMEOUT, Bytes::new());
        Ok(())
    }

    async fn receive(&mut self, ctx: &mut Context, envelope: Envelope) -> Result<(), ActorError> {
        match envelope.name.as_str() {
            TIMEOUT => {
                self.reap(ctx)?;
                ctx.after(REAP_INTERVAL, TIMEOUT, Bytes::new());
                Ok(())
            }
            // The slave died; nothing left to report to.
            actor_runtime::EXITED => Err(ActorError::fatal("slave exited")),
            _ => Ok(()),
        }
    }
}

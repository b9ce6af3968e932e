//! The [`Actor`] trait and the per-actor [`Context`].

use crate::addr::ActorAddr;
use crate::envelope::Envelope;
use crate::error::RuntimeError;
use crate::mailbox::EndpointReply;
use crate::system::SystemShared;
use async_trait::async_trait;
use bytes::Bytes;
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;

/// A failed handler. Returning this from [`Actor::receive`] terminates the
/// actor; linked actors are then notified with `EXITED`.
#[derive(Debug, Error)]
#[error("{message}")]
pub struct ActorError {
    message: String,
}

impl ActorError {
    pub fn fatal(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
        }
    }
}

/// A message-driven actor.
///
/// The runtime runs `receive` for one envelope at a time; between calls the
/// actor owns its state exclusively. Handlers suspend only at `.await`
/// points, so blocking OS calls belong in helper subactors.
///
/// # Example
///
/// ```rust
/// use actor_runtime::{Actor, ActorError, Context, Envelope};
/// use async_trait::async_trait;
///
/// struct Counter {
///     seen: u64,
/// }
///
/// #[async_trait]
/// impl Actor for Counter {
///     async fn receive(
///         &mut self,
///         _ctx: &mut Context,
///         _envelope: Envelope,
///     ) -> Result<(), ActorError> {
///         // No locks: the runtime guarantees one handler at a time.
///         self.seen += 1;
///         Ok(())
///     }
/// }
/// ```
#[async_trait]
pub trait Actor: Send + 'static {
    /// Called once, before the first message is delivered.
    async fn started(&mut self, _ctx: &mut Context) -> Result<(), ActorError> {
        Ok(())
    }

    /// Handles one envelope. An `Err` terminates the actor.
    async fn receive(&mut self, ctx: &mut Context, envelope: Envelope) -> Result<(), ActorError>;

    /// Named endpoint handlers, dispatched from the HTTP server. `None`
    /// means the endpoint does not exist on this actor.
    async fn endpoint(&mut self, _ctx: &mut Context, _name: &str) -> Option<EndpointReply> {
        None
    }
}

/// Capabilities handed to an actor while it runs: its own address, message
/// sends, linking, timers, and subactor spawning.
pub struct Context {
    pub(crate) shared: Arc<SystemShared>,
    pub(crate) self_addr: ActorAddr,
}

impl Context {
    pub fn self_addr(&self) -> &ActorAddr {
        &self.self_addr
    }

    /// Sends a named message. Local targets are delivered directly, remote
    /// targets go through the transport. Never blocks.
    pub fn send(&self, to: &ActorAddr, name: &str, body: Bytes) {
        self.shared
            .send(Envelope::new(name, self.self_addr.clone(), body), to);
    }

    /// Subscribes this actor to `subject`'s death; idempotent, and survives
    /// process boundaries.
    pub fn link(&self, subject: &ActorAddr) {
        self.shared.link(&self.self_addr, subject);
    }

    /// Schedules `name`/`body` to arrive in this actor's own mailbox after
    /// `delay`, subject to the system clock (which tests may pause).
    pub fn after(&self, delay: Duration, name: &str, body: Bytes) {
        self.shared
            .clock
            .after(delay, self.self_addr.clone(), name, body);
    }

    /// Milliseconds on the system clock. Comparable across calls within one
    /// process; paused clocks only move on `advance`.
    pub fn now_ms(&self) -> u64 {
        self.shared.clock.now_ms()
    }

    /// Spawns a helper subactor on the same system.
    pub fn spawn(
        &self,
        name: &str,
        actor: impl Actor,
        installs: &[&str],
    ) -> Result<ActorAddr, RuntimeError> {
        self.shared.spawn(name, actor, installs)
    }
}

//! # Actor Runtime
//!
//! This crate provides the foundational building blocks for message-driven,
//! distributed actor systems in Rust: typed addresses, reliable local
//! dispatch, process linking, deterministic timers, and a length-prefixed
//! wire transport.
//!
//! ## The Actor Model
//!
//! An actor is an entity with a unique address of the form `name(host:port)`,
//! a private mailbox, and a single-threaded handler loop. Actors never share
//! mutable state; they interact through:
//!
//! - **Typed messages**: named envelopes delivered FIFO per sender
//! - **Linking**: `link(other)` subscribes the caller to `other`'s death;
//!   when `other` exits the runtime delivers an `EXITED` notification
//! - **Query futures**: one-shot request/response used by the HTTP layer
//!
//! ## Architecture Overview
//!
//! The runtime separates concerns into three layers:
//!
//! 1. **Actor Layer** ([`Actor`]) - your message handlers and state
//! 2. **System Layer** ([`ActorSystem`]) - spawning, dispatch, links, timers
//! 3. **Wire Layer** ([`codec`], transport) - framing and peer connections
//!
//! You write handlers against the [`Actor`] trait once; the runtime owns
//! every scheduling, routing, and failure-notification concern around them.
//!
//! ## Usage
//!
//! Define an actor, spawn it, and speak to it by address:
//!
//! ```rust
//! use actor_runtime::{Actor, ActorError, ActorSystem, Context, Envelope};
//! use async_trait::async_trait;
//! use bytes::Bytes;
//!
//! // 1. Define the actor
//! struct Echo;
//!
//! #[async_trait]
//! impl Actor for Echo {
//!     async fn receive(&mut self, ctx: &mut Context, envelope: Envelope) -> Result<(), ActorError> {
//!         // Reply to whoever spoke to us.
//!         ctx.send(&envelope.from, "ECHO_REPLY", envelope.body.clone());
//!         Ok(())
//!     }
//! }
//!
//! // 2. Run it
//! #[tokio::main]
//! async fn main() -> Result<(), actor_runtime::RuntimeError> {
//!     let system = ActorSystem::bind("127.0.0.1", 0).await?;
//!     // Installing "X2E_SAY" lets inbound remote frames with that name
//!     // find this actor; local sends just use the address.
//!     let echo = system.spawn("echo", Echo, &["X2E_SAY"])?;
//!     system.post(&echo, "X2E_SAY", Bytes::from_static(b"hello"));
//!     Ok(())
//! }
//! ```
//!
//! ## Concurrency Model
//!
//! - Each actor runs in its own Tokio task
//! - Messages are processed **sequentially** within an actor (no locks needed!)
//! - Multiple actors run in **parallel** (true concurrency)
//! - Suspension points occur only between message handlers
//!
//! All of an actor's state is safe to access without locking between
//! suspension points; the runtime's own scheduler queue, connection table,
//! and timer heap are internally synchronised and invisible to actor
//! authors.
//!
//! ## Addresses and Wire Format
//!
//! Every actor is reachable at `name(host:port)`. Messages that cross a
//! process boundary are framed as
//! `u32 name_len | name | u32 body_len | body | u32 from_len | from`
//! in network byte order (see [`codec`]). Frames between any ordered pair of
//! peers are delivered in send order; no ordering is implied across distinct
//! sender pairs.
//!
//! ## Deterministic Time
//!
//! The runtime exposes a [`Clock`] with `pause`, `advance`, and `resume` so
//! tests can drive timers without waiting on wall-clock time. In paused mode
//! a timer fires only when `advance` crosses its deadline:
//!
//! ```rust
//! use actor_runtime::{Actor, ActorError, ActorSystem, Context, Envelope, TIMEOUT};
//! use async_trait::async_trait;
//! use bytes::Bytes;
//! use std::time::Duration;
//!
//! struct Ticker;
//!
//! #[async_trait]
//! impl Actor for Ticker {
//!     async fn started(&mut self, ctx: &mut Context) -> Result<(), ActorError> {
//!         ctx.after(Duration::from_secs(60), TIMEOUT, Bytes::new());
//!         Ok(())
//!     }
//!
//!     async fn receive(&mut self, _ctx: &mut Context, envelope: Envelope) -> Result<(), ActorError> {
//!         assert_eq!(envelope.name, TIMEOUT);
//!         Ok(())
//!     }
//! }
//!
//! #[tokio::main]
//! async fn main() -> Result<(), actor_runtime::RuntimeError> {
//!     let system = ActorSystem::bind("127.0.0.1", 0).await?;
//!     system.clock().pause();
//!     system.spawn("ticker", Ticker, &[])?;
//!     // A whole minute passes without anyone waiting for one.
//!     system.clock().advance(Duration::from_secs(61));
//!     Ok(())
//! }
//! ```
//!
//! ## Failure Model
//!
//! A handler that returns an error terminates its actor. The runtime then
//! notifies every linked actor with `EXITED(addr)`, locally and across the
//! wire, and frees the mailbox. Transport loss of a remote peer synthesises
//! the same `EXITED` notifications for every remote address at that peer
//! that a local actor had linked to. Dropping a whole process is a
//! supported operational response: all durable state lives in
//! externally-observable messages.

pub mod actor;
pub mod addr;
pub mod clock;
pub mod codec;
pub mod envelope;
pub mod error;
pub mod http;
pub mod mailbox;
mod registry;
pub mod system;
mod transport;

pub use actor::{Actor, ActorError, Context};
pub use addr::ActorAddr;
pub use clock::Clock;
pub use envelope::{Envelope, EXITED, TERMINATE, TIMEOUT};
pub use error::RuntimeError;
pub use mailbox::EndpointReply;
pub use system::ActorSystem;

//! # Foreman
//!
//! A two-level cluster resource manager: one master multiplexes a pool of
//! worker machines among independently-developed job frameworks.
//!
//! The master tracks the live set of slaves, aggregates their free
//! resources, and periodically offers bundles of those resources to
//! registered frameworks; each framework answers by launching tasks on the
//! offered resources. Tasks execute inside per-framework executor
//! processes that the slaves supervise through a pluggable isolation
//! module.
//!
//! ## Crate Layout
//!
//! - [`ids`] / [`resources`]: identifier newtypes and the resource
//!   multiset every accounting decision is made in
//! - [`messages`]: the wire protocol between master, slaves, frameworks,
//!   and executors
//! - [`master`]: the resource accountant and offer dispatcher, with its
//!   pluggable [`master::allocator`]
//! - [`slave`]: the local executor supervisor, its [`slave::isolation`]
//!   module and [`slave::reaper`]
//! - [`detector`]: the leader-election oracle interface
//!
//! Everything runs on the `actor-runtime` crate: one actor per component,
//! messages in, messages out, no shared state.
//!
//! ## Usage
//!
//! Wire a master and a slave into one actor system:
//!
//! ```rust
//! use actor_runtime::ActorSystem;
//! use foreman::detector::{MasterDetector, StandaloneDetector};
//! use foreman::master::allocator::DrfAllocator;
//! use foreman::messages::SlaveInfo;
//! use foreman::slave::isolation::{child_table, IsolationConfig, ProcessIsolation};
//! use foreman::{
//!     Master, Resources, Slave, MASTER_ACTOR, MASTER_INSTALLS, SLAVE_ACTOR, SLAVE_INSTALLS,
//! };
//!
//! #[tokio::main]
//! async fn main() -> anyhow::Result<()> {
//!     let system = ActorSystem::bind("127.0.0.1", 0).await?;
//!
//!     // 1. The master, with the dominant-share allocator
//!     let master = Master::new(Box::new(DrfAllocator::new()), Vec::new());
//!     let master_addr = system.spawn(MASTER_ACTOR, master, MASTER_INSTALLS)?;
//!
//!     // 2. A slave advertising two cores and a gigabyte
//!     let isolation = ProcessIsolation::new(IsolationConfig::default(), child_table());
//!     let slave = Slave::new(
//!         SlaveInfo {
//!             hostname: "localhost".to_string(),
//!             public_hostname: "localhost".to_string(),
//!             resources: Resources::parse("cpus:2;mem:1024")?,
//!         },
//!         Box::new(isolation),
//!         std::env::temp_dir().join("foreman-demo"),
//!         Vec::new(),
//!     );
//!     let slave_addr = system.spawn(SLAVE_ACTOR, slave, SLAVE_INSTALLS)?;
//!
//!     // 3. The election oracle points the slave at its master; the slave
//!     //    registers and its resources become offerable.
//!     let detector = Box::new(StandaloneDetector::new(master_addr));
//!     detector.run(system.clone(), slave_addr).await;
//!
//!     // Give registration a beat before shutting down.
//!     tokio::time::sleep(std::time::Duration::from_millis(100)).await;
//!     Ok(())
//! }
//! ```
//!
//! A framework then registers with the master (`F2M_REGISTER_FRAMEWORK`),
//! receives resource offers, and replies with task descriptions; see
//! [`messages`] for the full protocol surface.
//!
//! ## Fault Model
//!
//! Master state is deliberately unpersisted. A restarted master rebuilds
//! its world from slave re-registrations; slaves guarantee at-least-once
//! delivery of task status updates; frameworks ride out a master failover
//! behind the detector oracle. Terminal task states are latched so
//! duplicate deliveries are harmless.
//!
//! ## Testing
//!
//! The integration tests drive full clusters deterministically: scripted
//! recorder actors play the scheduler and executor roles, and the paused
//! runtime clock steps offer rounds, retry deadlines, and failover windows
//! one second at a time.

pub mod detector;
pub mod ids;
pub mod logging;
pub mod master;
pub mod messages;
pub mod resources;
pub mod slave;

pub use master::{Master, MASTER_ACTOR, MASTER_INSTALLS};
pub use resources::Resources;
pub use slave::{Slave, SLAVE_ACTOR, SLAVE_INSTALLS};

//! The actor system: spawning, dispatch, linking, and lifecycle.

use crate::actor::{Actor, Context};
use crate::addr::ActorAddr;
use crate::clock::Clock;
use crate::codec;
use crate::envelope::{Envelope, EXITED, LINK, TERMINATE};
use crate::error::RuntimeError;
use crate::mailbox::{mailbox, Delivery, EndpointReply, Mailbox};
use crate::registry::Registry;
use crate::transport::{self, Transport};
use bytes::{Bytes, BytesMut};
use std::sync::{Arc, Mutex, Weak};
use tokio::net::TcpListener;
use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn};

/// Handle to a running actor system. Cheap to clone; all clones share the
/// same registry, clock, and transport.
#[derive(Clone)]
pub struct ActorSystem {
    shared: Arc<SystemShared>,
}

pub(crate) struct SystemShared {
    host: String,
    port: u16,
    pub(crate) registry: Registry,
    pub(crate) clock: Clock,
    transport: Transport,
    background: Mutex<Vec<JoinHandle<()>>>,
    /// Self-reference so internal paths can hand an owning handle to the
    /// tasks they spawn.
    weak: Weak<SystemShared>,
}

impl ActorSystem {
    /// Binds the system's listening socket and starts the timer driver.
    /// `host` is the address other systems will reach this one at; a port
    /// of 0 picks an ephemeral one.
    pub async fn bind(host: &str, port: u16) -> Result<Self, RuntimeError> {
        let listener = TcpListener::bind((host, port)).await?;
        let port = listener.local_addr()?.port();
        let shared = Arc::new_cyclic(|weak| SystemShared {
            host: host.to_string(),
            port,
            registry: Registry::default(),
            clock: Clock::new(),
            transport: Transport::default(),
            background: Mutex::new(Vec::new()),
            weak: weak.clone(),
        });

        let listen_task = tokio::spawn(transport::listen(Arc::clone(&shared), listener));
        let driver = {
            let deliver_to = Arc::clone(&shared);
            let clock = shared.clock.clone();
            tokio::spawn(async move {
                clock
                    .drive(move |target, envelope| deliver_to.deliver_local(target, envelope))
                    .await;
            })
        };
        shared.track(listen_task);
        shared.track(driver);

        info!(host = %shared.host, port = shared.port, "actor system listening");
        Ok(Self { shared })
    }

    /// Spawns an actor under `name`, installing the given message names so
    /// inbound remote frames find it. Returns the actor's address.
    pub fn spawn(
        &self,
        name: &str,
        actor: impl Actor,
        installs: &[&str],
    ) -> Result<ActorAddr, RuntimeError> {
        self.shared.spawn(name, actor, installs)
    }

    /// The address an actor spawned under `name` would have on this system.
    pub fn addr_of(&self, name: &str) -> ActorAddr {
        self.shared.local_addr(name)
    }

    pub fn clock(&self) -> &Clock {
        &self.shared.clock
    }

    /// Sends a message from outside any actor (test drivers, detectors).
    pub fn post(&self, to: &ActorAddr, name: &str, body: Bytes) {
        self.shared
            .send(Envelope::new(name, ActorAddr::none(), body), to);
    }

    /// Sends a message with an explicit sender address. Intended for test
    /// drivers and oracles that speak on behalf of a spawned peer.
    pub fn post_as(&self, from: &ActorAddr, to: &ActorAddr, name: &str, body: Bytes) {
        self.shared
            .send(Envelope::new(name, from.clone(), body), to);
    }

    /// Injects `TERMINATE` at the front of the actor's queue.
    pub fn terminate(&self, addr: &ActorAddr) {
        if let Some(mailbox) = self.shared.registry.lookup(addr.name()) {
            mailbox.deliver(Envelope::control(TERMINATE, ActorAddr::none()));
        }
    }

    /// Dispatches an endpoint query into the owning actor and awaits the
    /// response future. `None` if the actor or endpoint does not exist.
    pub async fn query(&self, actor: &str, endpoint: &str) -> Option<EndpointReply> {
        let mailbox = self.shared.registry.lookup(actor)?;
        mailbox.query(endpoint).await.ok().flatten()
    }

    /// Stops the listener, the timer driver, and every connection. Running
    /// actors keep their mailboxes but nothing external reaches them.
    pub fn shutdown(&self) {
        let mut background = self
            .shared
            .background
            .lock()
            .expect("system lock poisoned");
        for task in background.drain(..) {
            task.abort();
        }
        drop(background);
        self.shared.transport.drop_all();
    }
}

impl SystemShared {
    pub(crate) fn local_addr(&self, name: &str) -> ActorAddr {
        ActorAddr::new(name, self.host.clone(), self.port)
    }

    fn is_local(&self, addr: &ActorAddr) -> bool {
        addr.host() == self.host && addr.port() == self.port
    }

    /// An owning handle to this system; only valid while some `ActorSystem`
    /// clone is alive, which is guaranteed for the lifetime of any actor.
    fn strong(&self) -> Arc<SystemShared> {
        self.weak.upgrade().expect("actor system dropped")
    }

    /// Registers a background task for teardown at shutdown.
    pub(crate) fn track(&self, task: JoinHandle<()>) {
        let mut background = self.background.lock().expect("system lock poisoned");
        background.retain(|handle| !handle.is_finished());
        background.push(task);
    }

    pub(crate) fn spawn(
        &self,
        name: &str,
        actor: impl Actor,
        installs: &[&str],
    ) -> Result<ActorAddr, RuntimeError> {
        let (sender, mailbox) = mailbox();
        self.registry.register(name, sender, installs)?;
        let addr = self.local_addr(name);
        let ctx = Context {
            shared: self.strong(),
            self_addr: addr.clone(),
        };
        tokio::spawn(run_actor(actor, ctx, mailbox));
        Ok(addr)
    }

    /// Local or remote dispatch; never blocks the caller.
    pub(crate) fn send(&self, envelope: Envelope, to: &ActorAddr) {
        if to.is_none() {
            warn!(name = %envelope.name, "dropping message addressed to __none__");
            return;
        }
        if self.is_local(to) {
            self.deliver_local(to, envelope);
            return;
        }
        let mut frame = BytesMut::new();
        match codec::encode(&envelope, &mut frame) {
            Ok(()) => {
                self.transport
                    .enqueue(&self.strong(), to.host(), to.port(), frame.freeze())
            }
            Err(e) => error!(name = %envelope.name, error = %e, "unencodable message dropped"),
        }
    }

    pub(crate) fn deliver_local(&self, to: &ActorAddr, envelope: Envelope) {
        match self.registry.lookup(to.name()) {
            Some(mailbox) => {
                mailbox.deliver(envelope);
            }
            None => debug!(to = %to, name = %envelope.name, "no such actor; message dropped"),
        }
    }

    /// Records the link and, for a remote subject, tells the remote system
    /// so it can notify back on death.
    pub(crate) fn link(&self, linker: &ActorAddr, subject: &ActorAddr) {
        if subject.is_none() {
            return;
        }
        if self.is_local(subject) {
            if self.registry.lookup(subject.name()).is_none() {
                // Linking to an already-dead actor notifies immediately.
                self.deliver_local(linker, Envelope::control(EXITED, subject.clone()));
                return;
            }
            self.registry.link(linker, subject);
            return;
        }
        self.registry.link(linker, subject);
        let frame = Envelope::new(
            LINK,
            linker.clone(),
            Bytes::from(subject.name().as_bytes().to_vec()),
        );
        self.send(frame, subject);
    }

    /// Sends a wire-level `EXITED` notification for `subject` to a remote
    /// linker.
    pub(crate) fn send_exited_frame(&self, subject: &ActorAddr, linker: &ActorAddr) {
        let frame = Envelope::new(
            EXITED,
            subject.clone(),
            Bytes::from(linker.name().as_bytes().to_vec()),
        );
        self.send(frame, linker);
    }

    /// Tears down an exited actor and notifies its linkers, local and
    /// remote.
    pub(crate) fn actor_exited(&self, addr: &ActorAddr) {
        let linkers = self.registry.unregister(addr);
        for linker in linkers {
            if self.is_local(&linker) {
                self.deliver_local(&linker, Envelope::control(EXITED, addr.clone()));
            } else {
                self.send_exited_frame(addr, &linker);
            }
        }
    }

    /// Declares every actor at `host:port` dead: severs links and delivers
    /// `EXITED` to each local linker.
    pub(crate) fn peer_lost(&self, host: &str, port: u16) {
        self.transport.drop_peer(host, port);
        let severed = self.registry.sever_peer(host, port);
        if !severed.is_empty() {
            info!(host, port, links = severed.len(), "peer lost");
        }
        for (subject, linker) in severed {
            if self.is_local(&linker) {
                self.deliver_local(&linker, Envelope::control(EXITED, subject.clone()));
            }
        }
    }
}

/// The per-actor handler loop: strictly serial, draining the priority lane
/// first. Ends on `TERMINATE`, on mailbox closure, or on a failed handler;
/// all three notify linked actors.
async fn run_actor(mut actor: impl Actor, mut ctx: Context, mut mailbox: Mailbox) {
    let addr = ctx.self_addr().clone();
    info!(actor = %addr, "actor started");

    let mut failed = false;
    if let Err(e) = actor.started(&mut ctx).await {
        error!(actor = %addr, error = %e, "actor failed to start");
        failed = true;
    }

    while !failed {
        let delivery = tokio::select! {
            biased;
            envelope = mailbox.priority.recv() => envelope.map(Delivery::Message),
            delivery = mailbox.normal.recv() => delivery,
        };
        let Some(delivery) = delivery else { break };
        match delivery {
            Delivery::Message(envelope) if envelope.name == TERMINATE => {
                info!(actor = %addr, "terminated");
                break;
            }
            Delivery::Message(envelope) => {
                if let Err(e) = actor.receive(&mut ctx, envelope).await {
                    error!(actor = %addr, error = %e, "handler failed; terminating actor");
                    failed = true;
                }
            }
            Delivery::Query(query) => {
                let reply = actor.endpoint(&mut ctx, &query.name).await;
                let _ = query.respond_to.send(reply);
            }
        }
    }

    ctx.shared.actor_exited(&addr);
    info!(actor = %addr, "actor exited");
}

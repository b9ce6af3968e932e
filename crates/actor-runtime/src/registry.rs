//! Process-wide actor registry.
//!
//! Maps actor names to mailboxes, installed message names to owning actors
//! (how inbound remote frames find their actor, since frames carry no `to`
//! field), and link subjects to their linkers.

use crate::addr::ActorAddr;
use crate::error::RuntimeError;
use crate::mailbox::MailboxSender;
use std::collections::{HashMap, HashSet};
use std::sync::Mutex;

#[derive(Default)]
pub(crate) struct Registry {
    inner: Mutex<Inner>,
}

#[derive(Default)]
struct Inner {
    actors: HashMap<String, MailboxSender>,
    installs: HashMap<String, String>,
    links: HashMap<ActorAddr, HashSet<ActorAddr>>,
}

impl Registry {
    pub fn register(
        &self,
        name: &str,
        sender: MailboxSender,
        installs: &[&str],
    ) -> Result<(), RuntimeError> {
        let mut inner = self.inner.lock().expect("registry lock poisoned");
        if inner.actors.contains_key(name) {
            return Err(RuntimeError::DuplicateName(name.to_string()));
        }
        for message in installs {
            if let Some(owner) = inner.installs.get(*message) {
                return Err(RuntimeError::DuplicateInstall(
                    message.to_string(),
                    owner.clone(),
                ));
            }
        }
        for message in installs {
            inner.installs.insert(message.to_string(), name.to_string());
        }
        inner.actors.insert(name.to_string(), sender);
        Ok(())
    }

    /// Removes the actor, its installs, and its link subscriptions.
    /// Returns the linkers to notify of its death.
    pub fn unregister(&self, addr: &ActorAddr) -> Vec<ActorAddr> {
        let mut inner = self.inner.lock().expect("registry lock poisoned");
        inner.actors.remove(addr.name());
        inner.installs.retain(|_, owner| owner != addr.name());
        inner
            .links
            .remove(addr)
            .map(|set| set.into_iter().collect())
            .unwrap_or_default()
    }

    pub fn lookup(&self, name: &str) -> Option<MailboxSender> {
        let inner = self.inner.lock().expect("registry lock poisoned");
        inner.actors.get(name).cloned()
    }

    /// Resolves an inbound frame to the actor that installed its name.
    pub fn route(&self, message: &str) -> Option<MailboxSender> {
        let inner = self.inner.lock().expect("registry lock poisoned");
        let owner = inner.installs.get(message)?;
        inner.actors.get(owner).cloned()
    }

    pub fn link(&self, linker: &ActorAddr, subject: &ActorAddr) {
        let mut inner = self.inner.lock().expect("registry lock poisoned");
        inner
            .links
            .entry(subject.clone())
            .or_default()
            .insert(linker.clone());
    }

    /// Removes every link whose subject lives at `host:port` and returns
    /// `(subject, linker)` pairs for death notification.
    pub fn sever_peer(&self, host: &str, port: u16) -> Vec<(ActorAddr, ActorAddr)> {
        let mut inner = self.inner.lock().expect("registry lock poisoned");
        let subjects: Vec<ActorAddr> = inner
            .links
            .keys()
            .filter(|subject| subject.host() == host && subject.port() == port)
            .cloned()
            .collect();
        let mut severed = Vec::new();
        for subject in subjects {
            if let Some(linkers) = inner.links.remove(&subject) {
                for linker in linkers {
                    severed.push((subject.clone(), linker));
                }
            }
        }
        severed
    }
}

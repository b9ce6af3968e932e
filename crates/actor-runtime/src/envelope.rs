//! Message envelopes and reserved message names.

use crate::addr::ActorAddr;
use bytes::Bytes;

/// Canonical name of timer deliveries.
pub const TIMEOUT: &str = "__timeout__";

/// Delivered to linked actors when the subject of the link exits.
pub const EXITED: &str = "__exited__";

/// Injected at the front of a mailbox to stop an actor.
pub const TERMINATE: &str = "__terminate__";

/// Transport control frame propagating a link to a remote peer.
pub(crate) const LINK: &str = "__link__";

/// A named message together with its sender and an opaque body.
///
/// Names on the wire are ASCII labels of the form `MODULE_EVENT`
/// (e.g. `S2M_REGISTER_SLAVE`); the double-underscore names above are
/// reserved for the runtime.
#[derive(Debug, Clone)]
pub struct Envelope {
    pub name: String,
    pub from: ActorAddr,
    pub body: Bytes,
}

impl Envelope {
    pub fn new(name: impl Into<String>, from: ActorAddr, body: Bytes) -> Self {
        Self {
            name: name.into(),
            from,
            body,
        }
    }

    /// An envelope with an empty body.
    pub fn control(name: impl Into<String>, from: ActorAddr) -> Self {
        Self::new(name, from, Bytes::new())
    }
}

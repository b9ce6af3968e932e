//! Actor mailboxes.
//!
//! A mailbox has two lanes: the priority lane carries `EXITED` and
//! `TERMINATE` (which the runtime may inject at the front of the queue) and
//! the normal lane carries everything else, FIFO per sender. A delivery is
//! either a protocol [`Envelope`] or an endpoint [`Query`] carrying a
//! one-shot responder.

use crate::envelope::{Envelope, EXITED, TERMINATE};
use tokio::sync::{mpsc, oneshot};

/// Response produced by an actor's named endpoint handler.
#[derive(Debug, Clone)]
pub struct EndpointReply {
    pub content_type: &'static str,
    pub body: String,
}

impl EndpointReply {
    pub fn json(body: String) -> Self {
        Self {
            content_type: "text/x-json;charset=UTF-8",
            body,
        }
    }

    pub fn text(body: String) -> Self {
        Self {
            content_type: "text/plain",
            body,
        }
    }
}

/// An endpoint request dispatched into the owning actor's handler loop.
#[derive(Debug)]
pub struct Query {
    pub name: String,
    pub respond_to: oneshot::Sender<Option<EndpointReply>>,
}

#[derive(Debug)]
pub enum Delivery {
    Message(Envelope),
    Query(Query),
}

pub(crate) struct Mailbox {
    pub normal: mpsc::UnboundedReceiver<Delivery>,
    pub priority: mpsc::UnboundedReceiver<Envelope>,
}

/// Cheap-to-clone handle used by the registry, the transport, and the clock
/// to deliver into an actor's mailbox.
#[derive(Clone)]
pub(crate) struct MailboxSender {
    normal: mpsc::UnboundedSender<Delivery>,
    priority: mpsc::UnboundedSender<Envelope>,
}

impl MailboxSender {
    /// Delivers an envelope, routing `EXITED`/`TERMINATE` onto the priority
    /// lane. Returns false if the actor is gone.
    pub fn deliver(&self, envelope: Envelope) -> bool {
        match envelope.name.as_str() {
            EXITED | TERMINATE => self.priority.send(envelope).is_ok(),
            _ => self.normal.send(Delivery::Message(envelope)).is_ok(),
        }
    }

    /// Posts an endpoint query; the returned receiver settles when the actor
    /// runs the handler.
    pub fn query(&self, name: &str) -> oneshot::Receiver<Option<EndpointReply>> {
        let (respond_to, response) = oneshot::channel();
        let query = Query {
            name: name.to_string(),
            respond_to,
        };
        // A dropped actor just leaves the receiver to settle as an error.
        let _ = self.normal.send(Delivery::Query(query));
        response
    }
}

pub(crate) fn mailbox() -> (MailboxSender, Mailbox) {
    let (normal_tx, normal_rx) = mpsc::unbounded_channel();
    let (priority_tx, priority_rx) = mpsc::unbounded_channel();
    (
        MailboxSender {
            normal: normal_tx,
            priority: priority_tx,
        },
        Mailbox {
            normal: normal_rx,
            priority: priority_rx,
        },
    )
}

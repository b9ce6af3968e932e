//! TCP transport.
//!
//! One outbound connection per remote `host:port` keeps frames ordered per
//! peer. Inbound frames are routed through the registry's install table;
//! connection loss synthesises `EXITED` notifications for every remote
//! address at that peer that a local actor had linked to.

use crate::addr::ActorAddr;
use crate::codec;
use crate::envelope::{Envelope, EXITED, LINK};
use crate::system::SystemShared;
use bytes::{Bytes, BytesMut};
use std::collections::{HashMap, HashSet};
use std::sync::{Arc, Mutex};
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::mpsc;
use tracing::{debug, trace, warn};

#[derive(Default)]
pub(crate) struct Transport {
    peers: Mutex<HashMap<(String, u16), mpsc::UnboundedSender<Bytes>>>,
}

impl Transport {
    /// Queues a frame for `host:port`, connecting on first use.
    pub fn enqueue(&self, shared: &Arc<SystemShared>, host: &str, port: u16, frame: Bytes) {
        let mut peers = self.peers.lock().expect("transport lock poisoned");
        let sender = peers.entry((host.to_string(), port)).or_insert_with(|| {
            let (tx, rx) = mpsc::unbounded_channel();
            tokio::spawn(run_peer(
                Arc::clone(shared),
                host.to_string(),
                port,
                rx,
            ));
            tx
        });
        if sender.send(frame).is_err() {
            // Writer already died; the peer-lost path will reconcile.
            peers.remove(&(host.to_string(), port));
        }
    }

    pub fn drop_peer(&self, host: &str, port: u16) {
        let mut peers = self.peers.lock().expect("transport lock poisoned");
        peers.remove(&(host.to_string(), port));
    }

    pub fn drop_all(&self) {
        let mut peers = self.peers.lock().expect("transport lock poisoned");
        peers.clear();
    }
}

/// Writer loop for one outbound peer connection. The read half is watched
/// only for EOF, which signals peer death.
async fn run_peer(
    shared: Arc<SystemShared>,
    host: String,
    port: u16,
    mut frames: mpsc::UnboundedReceiver<Bytes>,
) {
    let stream = match TcpStream::connect((host.as_str(), port)).await {
        Ok(stream) => stream,
        Err(e) => {
            warn!(host, port, error = %e, "connect failed");
            shared.peer_lost(&host, port);
            return;
        }
    };
    let (mut read_half, mut write_half) = stream.into_split();
    let mut eof_probe = [0u8; 256];
    loop {
        tokio::select! {
            frame = frames.recv() => match frame {
                Some(bytes) => {
                    if let Err(e) = write_half.write_all(&bytes).await {
                        debug!(host, port, error = %e, "peer write failed");
                        break;
                    }
                }
                None => return, // transport shut down
            },
            read = read_half.read(&mut eof_probe) => match read {
                Ok(0) | Err(_) => break,
                // Peers reply on their own outbound connections; anything
                // readable here is ignored.
                Ok(_) => {}
            }
        }
    }
    shared.peer_lost(&host, port);
}

/// Accept loop for the system's listening socket. Connection tasks are
/// tracked so `shutdown` closes live sockets, letting peers observe death.
pub(crate) async fn listen(shared: Arc<SystemShared>, listener: TcpListener) {
    loop {
        match listener.accept().await {
            Ok((stream, _)) => {
                let task = tokio::spawn(serve_connection(Arc::clone(&shared), stream));
                shared.track(task);
            }
            Err(e) => {
                warn!(error = %e, "accept failed");
                return;
            }
        }
    }
}

/// Reader loop for one inbound connection. Frames are routed as they
/// arrive; at EOF every peer identity seen on the connection is declared
/// lost.
async fn serve_connection(shared: Arc<SystemShared>, mut stream: TcpStream) {
    let mut buffer = BytesMut::with_capacity(4096);
    let mut identities: HashSet<(String, u16)> = HashSet::new();
    loop {
        match codec::decode(&mut buffer) {
            Ok(Some(envelope)) => {
                if !envelope.from.is_none() {
                    identities.insert((envelope.from.host().to_string(), envelope.from.port()));
                }
                deliver_inbound(&shared, envelope);
                continue;
            }
            Ok(None) => {}
            Err(e) => {
                warn!(error = %e, "corrupt frame; dropping connection");
                break;
            }
        }
        match stream.read_buf(&mut buffer).await {
            Ok(0) => break,
            Ok(_) => {}
            Err(e) => {
                debug!(error = %e, "connection read failed");
                break;
            }
        }
    }
    for (host, port) in identities {
        shared.peer_lost(&host, port);
    }
}

fn deliver_inbound(shared: &Arc<SystemShared>, envelope: Envelope) {
    trace!(name = %envelope.name, from = %envelope.from, "inbound frame");
    match envelope.name.as_str() {
        // A remote actor linked to one of ours: body names the subject.
        LINK => {
            let subject_name = String::from_utf8_lossy(&envelope.body).to_string();
            let subject = shared.local_addr(&subject_name);
            if shared.registry.lookup(&subject_name).is_some() {
                shared.registry.link(&envelope.from, &subject);
            } else {
                // Linking to a dead actor notifies immediately.
                shared.send_exited_frame(&subject, &envelope.from);
            }
        }
        // A remote actor we linked to died: body names the local linker.
        EXITED => {
            let linker = String::from_utf8_lossy(&envelope.body).to_string();
            if let Some(mailbox) = shared.registry.lookup(&linker) {
                mailbox.deliver(Envelope::control(EXITED, envelope.from));
            }
        }
        _ => match shared.registry.route(&envelope.name) {
            Some(mailbox) => {
                mailbox.deliver(envelope);
            }
            None => {
                debug!(name = %envelope.name, from = %envelope.from, "no actor installed for message; dropped");
            }
        },
    }
}

//! Master detection.
//!
//! Leader election itself is an external collaborator; the core consumes it
//! as an oracle that posts `NEW_MASTER_DETECTED` / `NO_MASTER_DETECTED` to
//! a subscribing actor. The built-in [`StandaloneDetector`] knows exactly
//! one master address and announces it once.

use crate::messages::{self as proto, oracle, WireMessage};
use actor_runtime::{ActorAddr, ActorSystem};
use async_trait::async_trait;
use thiserror::Error;
use tracing::info;

#[derive(Debug, Error)]
pub enum DetectorError {
    #[error("'{0}' is not a master address; expected host:port or master(host:port)")]
    BadUrl(String),
    #[error("'{0}' names an external election service, which this build does not ship")]
    Unsupported(String),
}

/// Parses `--master`/`--url` values. Accepted forms: `host:port` and
/// `master(host:port)`. `zoo://` and `zoofile://` URLs belong to the
/// external election layer and are rejected here.
pub fn parse_master_url(url: &str) -> Result<ActorAddr, DetectorError> {
    if url.starts_with("zoo://") || url.starts_with("zoofile://") {
        return Err(DetectorError::Unsupported(url.to_string()));
    }
    if url.contains('(') {
        return url
            .parse::<ActorAddr>()
            .map_err(|_| DetectorError::BadUrl(url.to_string()));
    }
    let (host, port) = url
        .rsplit_once(':')
        .ok_or_else(|| DetectorError::BadUrl(url.to_string()))?;
    let port: u16 = port
        .parse()
        .map_err(|_| DetectorError::BadUrl(url.to_string()))?;
    if host.is_empty() {
        return Err(DetectorError::BadUrl(url.to_string()));
    }
    Ok(ActorAddr::new("master", host, port))
}

/// The oracle interface: implementations watch the election state and post
/// detection events to `subscriber` until the process exits.
#[async_trait]
pub trait MasterDetector: Send + 'static {
    async fn run(self: Box<Self>, system: ActorSystem, subscriber: ActorAddr);
}

/// A fixed, pre-elected master.
pub struct StandaloneDetector {
    master: ActorAddr,
}

impl StandaloneDetector {
    pub fn new(master: ActorAddr) -> Self {
        Self { master }
    }
}

#[async_trait]
impl MasterDetector for StandaloneDetector {
    async fn run(self: Box<Self>, system: ActorSystem, subscriber: ActorAddr) {
        info!(master = %self.master, "standalone master detected");
        if let Ok(body) = proto::body(&oracle::NewMasterDetected {
            master_addr: self.master.clone(),
        }) {
            system.post(&subscriber, oracle::NewMasterDetected::NAME, body);
        }
    }
}

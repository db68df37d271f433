mod gobgp;
#[cfg(test)]
mod scripted;

pub use gobgp::{GobgpSpeaker, GOBGP_CMD};
#[cfg(test)]
pub use scripted::ScriptedSpeaker;

use std::error::Error;
use std::fmt;
use std::io;

use async_trait::async_trait;
use ipnetwork::IpNetwork;
use tokio::io::AsyncRead;

/// Newline-delimited JSON update feed
pub type UpdateFeed = Box<dyn AsyncRead + Send + Unpin>;

#[derive(Debug)]
pub enum SpeakerError {
    /// Speaker command could not be started [command, error]
    Spawn(String, io::Error),
    /// Speaker command exited with an error [command, output]
    Failed(String, String),
}

impl fmt::Display for SpeakerError {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        match self {
            SpeakerError::Spawn(cmd, err) => write!(f, "Could not run '{}': {}", cmd, err),
            SpeakerError::Failed(cmd, output) => write!(f, "'{}' failed: {}", cmd, output),
        }
    }
}

impl Error for SpeakerError {
    fn source(&self) -> Option<&(dyn Error + 'static)> {
        match self {
            SpeakerError::Spawn(_, err) => Some(err),
            _ => None,
        }
    }
}

/// Local BGP speaker holding the RIB we mirror into the kernel
#[async_trait]
pub trait Speaker: Send + Sync {
    /// Full global RIB as a JSON document
    async fn rib_snapshot(&self) -> Result<String, SpeakerError>;
    /// Stream of global RIB changes, one JSON array per line
    async fn monitor(&self) -> Result<UpdateFeed, SpeakerError>;
    /// Inject a locally originated prefix into the global RIB
    async fn originate(&self, prefix: IpNetwork) -> Result<(), SpeakerError>;
}

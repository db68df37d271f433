use std::io::Cursor;
use std::sync::Mutex;

use async_trait::async_trait;
use ipnetwork::IpNetwork;

use super::{Speaker, SpeakerError, UpdateFeed};

/// Speaker replaying a canned RIB and update feed
#[derive(Debug, Default)]
pub struct ScriptedSpeaker {
    // None behaves like an unreachable speaker
    rib: Option<String>,
    updates: Vec<String>,
    originated: Mutex<Vec<IpNetwork>>,
}

impl ScriptedSpeaker {
    pub fn new(rib: &str) -> Self {
        Self {
            rib: Some(rib.to_string()),
            ..Default::default()
        }
    }

    pub fn unreachable() -> Self {
        Self::default()
    }

    pub fn with_update(mut self, line: &str) -> Self {
        self.updates.push(line.to_string());
        self
    }

    pub fn originated(&self) -> Vec<IpNetwork> {
        self.originated
            .lock()
            .map(|o| o.clone())
            .unwrap_or_default()
    }
}

#[async_trait]
impl Speaker for ScriptedSpeaker {
    async fn rib_snapshot(&self) -> Result<String, SpeakerError> {
        self.rib
            .clone()
            .ok_or_else(|| SpeakerError::Failed("scripted".to_string(), "connection refused".to_string()))
    }

    async fn monitor(&self) -> Result<UpdateFeed, SpeakerError> {
        let mut feed = self.updates.join("\n");
        feed.push('\n');
        Ok(Box::new(Cursor::new(feed.into_bytes())))
    }

    async fn originate(&self, prefix: IpNetwork) -> Result<(), SpeakerError> {
        if let Ok(mut originated) = self.originated.lock() {
            originated.push(prefix);
        }
        Ok(())
    }
}

use serde::{Deserialize, Serialize};
use str0m::media::MediaKind;

use crate::error::BrokerError;

/// What the local side wants to send and receive.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct MediaConfiguration {
    pub audio: bool,
    pub video: bool,
}

impl Default for MediaConfiguration {
    fn default() -> Self {
        Self {
            audio: true,
            video: true,
        }
    }
}

impl MediaConfiguration {
    pub fn audio_only() -> Self {
        Self {
            audio: true,
            video: false,
        }
    }

    pub fn validate(&self) -> Result<(), BrokerError> {
        if !self.audio && !self.video {
            return Err(BrokerError::InvalidConfiguration(
                "neither audio nor video requested".to_string(),
            ));
        }
        Ok(())
    }

    /// Media kinds in the order their m-lines are offered.
    pub fn kinds(&self) -> Vec<MediaKind> {
        let mut kinds = Vec::with_capacity(2);
        if self.audio {
            kinds.push(MediaKind::Audio);
        }
        if self.video {
            kinds.push(MediaKind::Video);
        }
        kinds
    }
}

use anyhow::{anyhow, Result};
use sha2::{Digest, Sha256};
use std::sync::Mutex;
use url::Url;

use crate::detect::result::Classification;
use crate::detect::transport::DetectionTransport;
use crate::frame::EncodedFrame;

/// Stub transport for offline runs and tests, behind `stub://` endpoints.
///
/// - `stub://dangerous?description=fire`: every frame is dangerous
/// - `stub://clear`: every frame gets label `clear`
/// - `stub://changes`: dangerous whenever the payload differs from the previous one
pub struct StubTransport {
    mode: StubMode,
    last_hash: Mutex<Option<[u8; 32]>>,
}

enum StubMode {
    Fixed(Classification),
    Changes,
}

impl StubTransport {
    pub fn fixed(classification: Classification) -> Self {
        Self {
            mode: StubMode::Fixed(classification),
            last_hash: Mutex::new(None),
        }
    }

    pub fn changes() -> Self {
        Self {
            mode: StubMode::Changes,
            last_hash: Mutex::new(None),
        }
    }

    pub fn from_endpoint(endpoint: &str) -> Result<Self> {
        let url = Url::parse(endpoint).map_err(|err| anyhow!("parse stub endpoint: {}", err))?;
        let label = url.host_str().unwrap_or("clear");
        match label {
            "changes" => Ok(Self::changes()),
            "dangerous" => {
                let description = url
                    .query_pairs()
                    .find(|(key, _)| key == "description")
                    .map(|(_, value)| value.into_owned())
                    .unwrap_or_else(|| "stub threat".to_string());
                Ok(Self::fixed(Classification::dangerous(description)))
            }
            other => Ok(Self::fixed(Classification::other(other))),
        }
    }
}

impl DetectionTransport for StubTransport {
    fn name(&self) -> &'static str {
        "stub"
    }

    fn classify(&self, frame: &EncodedFrame) -> Result<Classification> {
        match &self.mode {
            StubMode::Fixed(classification) => Ok(classification.clone()),
            StubMode::Changes => {
                let current: [u8; 32] = Sha256::digest(&frame.payload).into();
                let mut last = self
                    .last_hash
                    .lock()
                    .map_err(|_| anyhow!("stub transport lock poisoned"))?;
                let changed = last.is_some_and(|prev| prev != current);
                *last = Some(current);
                if changed {
                    Ok(Classification::dangerous("scene changed"))
                } else {
                    Ok(Classification::other("clear"))
                }
            }
        }
    }
}

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::error::ConnectionError;
use crate::room::Identity;

/// Envelope received from a peer. `sdp` and `candidate` are opaque to the relay.
#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum Inbound {
    Offer {
        target: Option<Identity>,
        #[serde(default)]
        sdp: Value,
    },
    Answer {
        target: Option<Identity>,
        #[serde(default)]
        sdp: Value,
    },
    Candidate {
        target: Option<Identity>,
        #[serde(default)]
        candidate: Value,
    },
    Heartbeat,
    /// Any other `type`; ignored.
    #[serde(other)]
    Unknown,
}

impl Inbound {
    pub fn decode(frame: &str) -> Result<Self, ConnectionError> {
        Ok(serde_json::from_str(frame)?)
    }
}

/// Envelope generated by the relay.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum Outbound {
    UserJoined { username: Identity, room_id: String },
    UserLeft { username: Identity, room_id: String },
    Offer { from: Identity, sdp: Value },
    Answer { from: Identity, sdp: Value },
    Candidate { from: Identity, candidate: Value },
    HeartbeatResponse,
}

impl Outbound {
    pub fn encode(&self) -> Result<String, serde_json::Error> {
        serde_json::to_string(self)
    }

    /// The relayed form of a signaling message, stamped with its sender.
    /// `None` for messages that are not relayed.
    pub fn relayed(from: &str, inbound: Inbound) -> Option<(Option<Identity>, Outbound)> {
        let from = from.to_owned();
        match inbound {
            Inbound::Offer { target, sdp } => Some((target, Outbound::Offer { from, sdp })),
            Inbound::Answer { target, sdp } => Some((target, Outbound::Answer { from, sdp })),
            Inbound::Candidate { target, candidate } => {
                Some((target, Outbound::Candidate { from, candidate }))
            }
            Inbound::Heartbeat | Inbound::Unknown => None,
        }
    }
}

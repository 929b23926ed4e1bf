//! Discovery progress events

use dssb_core::ServerKey;
use serde::{Deserialize, Serialize};

/// Outcome counts of one refresh cycle
#[derive(Clone, Copy, Debug, Default, Eq, PartialEq, Serialize, Deserialize)]
pub struct RefreshSummary {
    pub total: usize,
    pub succeeded: usize,
    pub failed: usize,
}

/// Events emitted by the discovery service
#[derive(Clone, Debug, Eq, PartialEq)]
pub enum DiscoveryEvent {
    /// A refresh cycle started fetching the candidate list
    FetchStarted,

    /// A refresh cycle finished. All-zero when the list was empty or could not be fetched.
    FetchCompleted(RefreshSummary),

    /// A server answered its listing query
    ServerValidated {
        key: ServerKey,
        name: String,
        players: u16,
        max_players: u16,
    },

    /// A server could not be queried
    ServerFailed { key: ServerKey, error: String },

    /// A cycle-level failure (candidate fetch or storage)
    Error { message: String },
}

use serde::{Deserialize, Serialize};

/// Message a wing sends on its control channel once it is listening, or
/// when it gives up.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "SCREAMING_SNAKE_CASE")]
pub enum Handshake {
    Started { pid: u32, port: u16 },
    Failure { error: String },
}

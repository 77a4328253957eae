//! Connection mode state machine
//!
//! Every transition bumps the epoch and cancels the previous transition's
//! token. Asynchronous work captures the epoch at dispatch and is discarded
//! on completion unless the epoch is still current.

use serde::{Deserialize, Serialize};
use std::str::FromStr;
use tokio_util::sync::CancellationToken;

use crate::error::{FedError, Result};

/// How the federation acquires order books
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ConnectionMode {
    #[default]
    Disconnected,
    /// Request/response against every coordinator API
    Polling,
    /// Incremental events from the relay network
    Subscribed,
}

impl ConnectionMode {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Disconnected => "disconnected",
            Self::Polling => "polling",
            Self::Subscribed => "subscribed",
        }
    }
}

impl std::fmt::Display for ConnectionMode {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

impl FromStr for ConnectionMode {
    type Err = &'static str;

    fn from_str(raw: &str) -> std::result::Result<Self, Self::Err> {
        match raw.trim().to_ascii_lowercase().as_str() {
            "disconnected" | "off" => Ok(Self::Disconnected),
            "polling" | "api" => Ok(Self::Polling),
            "subscribed" | "nostr" | "relay" => Ok(Self::Subscribed),
            _ => Err("invalid connection mode; expected polling|subscribed|disconnected"),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Default)]
pub struct Epoch(u64);

impl std::fmt::Display for Epoch {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Result of a mode change
#[derive(Debug, Clone)]
pub struct Transition {
    pub from: ConnectionMode,
    pub to: ConnectionMode,
    pub epoch: Epoch,
    /// Cancelled by the next transition
    pub cancel: CancellationToken,
}

#[derive(Debug)]
pub struct ModeMachine {
    mode: ConnectionMode,
    epoch: Epoch,
    cancel: CancellationToken,
}

impl Default for ModeMachine {
    fn default() -> Self {
        Self::new()
    }
}

impl ModeMachine {
    pub fn new() -> Self {
        Self {
            mode: ConnectionMode::Disconnected,
            epoch: Epoch::default(),
            cancel: CancellationToken::new(),
        }
    }

    pub fn mode(&self) -> ConnectionMode {
        self.mode
    }

    pub fn epoch(&self) -> Epoch {
        self.epoch
    }

    /// Token of the live transition
    pub fn cancel_token(&self) -> CancellationToken {
        self.cancel.clone()
    }

    /// Move to `to`. Re-entering the current mode is a restart: it still
    /// invalidates everything dispatched under the old epoch.
    pub fn transition(&mut self, to: ConnectionMode) -> Transition {
        self.cancel.cancel();
        self.cancel = CancellationToken::new();
        self.epoch = Epoch(self.epoch.0 + 1);
        let from = std::mem::replace(&mut self.mode, to);
        Transition {
            from,
            to,
            epoch: self.epoch,
            cancel: self.cancel.clone(),
        }
    }

    /// True while `epoch` is the live epoch of `mode`.
    pub fn is_current(&self, epoch: Epoch, mode: ConnectionMode) -> bool {
        self.epoch == epoch && self.mode == mode
    }

    /// Guard for operations only valid in `mode`; returns the live epoch.
    pub fn require(&self, mode: ConnectionMode) -> Result<Epoch> {
        if self.mode != mode {
            return Err(FedError::InvalidState(format!(
                "operation requires {} mode, federation is {}",
                mode, self.mode
            )));
        }
        Ok(self.epoch)
    }
}

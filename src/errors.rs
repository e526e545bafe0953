use eyre::Report;
use std::time::Duration;

use crate::chain::ChainId;

#[derive(Debug, thiserror::Error)]
pub enum WatchError {
    // Connectivity
    #[error("chain {chain} unreachable: {reason}")]
    Connectivity { chain: ChainId, reason: String },
    #[error("connecting to {chain} timed out after {timeout:?}")]
    ConnectTimeout { chain: ChainId, timeout: Duration },

    // Task prerequisites
    #[error("{task} is missing prerequisite: {prerequisite}")]
    PrerequisiteMissing { task: String, prerequisite: String },

    // Result decoding
    #[error("malformed result for {context}: {reason}")]
    MalformedResult { context: String, reason: String },

    // Engine state
    #[error("chain {0} has no tracked subscriptions")]
    UnknownChain(ChainId),
    #[error("chain {0} must be built before it can run")]
    NotBuilt(ChainId),

    #[error(transparent)]
    Json(#[from] serde_json::Error),
    #[error(transparent)]
    InternalEyre(Report),
}

impl WatchError {
    pub fn malformed(context: impl Into<String>, reason: impl Into<String>) -> Self {
        Self::MalformedResult { context: context.into(), reason: reason.into() }
    }

    pub fn offline(chain: ChainId) -> Self {
        Self::Connectivity { chain, reason: "no connected client".to_string() }
    }

    /// Errors that mean the chain itself could not be reached.
    pub fn is_connectivity(&self) -> bool {
        matches!(self, Self::Connectivity { .. } | Self::ConnectTimeout { .. })
    }
}

impl From<Report> for WatchError {
    fn from(error: Report) -> Self {
        Self::InternalEyre(error)
    }
}

pub type WatchResult<T> = Result<T, WatchError>;

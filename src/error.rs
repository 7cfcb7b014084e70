//! Error types for the cache
//!
//! Provides unified error handling using thiserror.

use std::sync::Arc;

use thiserror::Error;

use crate::cache::{ListId, NodeKey};

// == List Error Enum ==
/// Misuse of an intrusive list.
///
/// These are programming errors in the caller, never data errors, so the
/// cache surfaces them instead of recovering.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ListError {
    /// The node is already linked into a list (possibly this one)
    #[error("node {node} is already a member of list {owner}")]
    AlreadyMember { node: NodeKey, owner: ListId },

    /// The node is not linked into the list it was removed from
    #[error("node {node} is not a member of list {list}")]
    NotMember { node: NodeKey, list: ListId },

    /// The node is still linked and cannot be freed
    #[error("node {node} is still linked into list {owner}")]
    StillLinked { node: NodeKey, owner: ListId },

    /// The handle does not refer to a live node in the arena
    #[error("node {0} does not exist")]
    UnknownNode(NodeKey),
}

// == Cache Error Enum ==
/// Unified error type for the cache.
#[derive(Error, Debug, Clone)]
pub enum CacheError {
    /// The fetch collaborator reported a failure
    #[error("fetch failed for `{key}`: {reason:#}")]
    Fetch {
        key: String,
        reason: Arc<anyhow::Error>,
    },

    /// The fetch dropped its completion without reporting a result
    #[error("fetch for `{key}` finished without a result")]
    Abandoned { key: String },

    /// The cache was dropped before the lookup was answered
    #[error("cache closed before `{key}` was resolved")]
    Closed { key: String },

    /// Invalid construction parameters
    #[error("Invalid configuration: {0}")]
    InvalidConfig(String),

    /// Internal list misuse
    #[error(transparent)]
    List(#[from] ListError),
}

impl CacheError {
    /// Wraps an error reported by a fetch for `key`.
    pub fn fetch(key: &str, reason: anyhow::Error) -> Self {
        CacheError::Fetch {
            key: key.to_string(),
            reason: Arc::new(reason),
        }
    }

    /// Returns the fetch collaborator's error, if this is a fetch failure.
    pub fn fetch_reason(&self) -> Option<&anyhow::Error> {
        match self {
            CacheError::Fetch { reason, .. } => Some(reason),
            _ => None,
        }
    }
}

// == Result Type Alias ==
/// Convenience Result type for the cache.
pub type Result<T> = std::result::Result<T, CacheError>;

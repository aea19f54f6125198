//! Content node health check

use ipt_core::{IptError, IptResult};

use crate::node::ContentNode;

/// Verify the node answers; returns its version string
pub async fn check_health<N: ContentNode + ?Sized>(node: &N) -> IptResult<String> {
    // `version` is the lightest command the RPC exposes
    node.version().await.map_err(|e| match e {
        IptError::StorageUnavailable { message, .. } => IptError::storage("health", message),
        other => other,
    })
}

/// Returns true if the node is reachable, false otherwise (non-panicking)
pub async fn is_healthy<N: ContentNode + ?Sized>(node: &N) -> bool {
    check_health(node).await.is_ok()
}

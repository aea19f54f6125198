use thiserror::Error;

pub type IptResult<T> = Result<T, IptError>;

#[derive(Debug, Error)]
pub enum IptError {
    #[error("only the xyz tiling scheme is supported, found {scheme:?}")]
    UnsupportedScheme { scheme: String },

    #[error("unknown tileset {id:?}: no naming key tiles-{id} exists (run create first)")]
    UnknownTileset { id: String },

    #[error("corrupt tile {key}: {message}")]
    CorruptTile { key: String, message: String },

    #[error("content node unavailable during {operation}: {message}")]
    StorageUnavailable { operation: String, message: String },

    #[error("snapshot {cid} is not retrievable")]
    StaleReference { cid: String },

    #[error("archive error: {0}")]
    Archive(String),

    #[error("config error: {0}")]
    Config(String),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error(transparent)]
    Other(#[from] anyhow::Error),
}

impl IptError {
    /// Shorthand for a failed content-node call.
    pub fn storage(operation: impl Into<String>, message: impl ToString) -> Self {
        IptError::StorageUnavailable {
            operation: operation.into(),
            message: message.to_string(),
        }
    }
}

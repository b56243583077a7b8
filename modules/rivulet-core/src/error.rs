use thiserror::Error;

#[derive(Error, Debug)]
pub enum Error {
    #[error("Query is not bound to a store: {0}")]
    NotInStore(String),

    #[error("Unknown slot in store: {0}")]
    UnknownSlot(String),

    #[error("Event has no string `type` field: {0}")]
    MissingEventType(String),

    #[error("Transform failed: {0:#}")]
    Transform(#[source] anyhow::Error),

    #[error("Storage error: {0}")]
    Storage(String),

    #[error("publish_async evaluated without an async outlet")]
    MissingAsyncOutlet,

    #[error("Cascade depth {depth} exceeds the configured limit of {limit}")]
    CascadeLimit { depth: usize, limit: usize },

    #[error("Executor lane closed: {0}")]
    ExecutorClosed(String),

    #[error("No Tokio runtime available to spawn executor lanes")]
    NoRuntime,

    #[error("Operator panicked: {0}")]
    Panicked(String),

    #[error(transparent)]
    Serde(#[from] serde_json::Error),

    #[error(transparent)]
    Anyhow(#[from] anyhow::Error),
}

pub type Result<T> = std::result::Result<T, Error>;

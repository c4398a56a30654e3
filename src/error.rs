//! Crate-level error types for stores, the worker loop, and the foreground client.

use std::time::Duration;

/// Error returned when a store cannot run a mutation or an action.
#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    /// No mutation with the given name is registered on the store.
    #[error("store `{store}` has no mutation named `{name}`")]
    UnknownMutation {
        /// Type name of the store that was asked.
        store: String,
        /// The mutation name that could not be resolved.
        name: String,
    },

    /// No action with the given name is registered on the store.
    #[error("store `{store}` has no action named `{name}`")]
    UnknownAction {
        /// Type name of the store that was asked.
        store: String,
        /// The action name that could not be resolved.
        name: String,
    },

    /// The payload could not be decoded into the type a handler expects.
    #[error("invalid payload: {0}")]
    Payload(#[source] serde_json::Error),

    /// The store state could not be serialized for broadcast.
    #[error("state could not be serialized: {0}")]
    Serialize(#[source] serde_json::Error),

    /// A handler refused the request.
    ///
    /// Handlers return this for domain-level rejections ("counter would
    /// overflow"); the message is forwarded to the foreground verbatim.
    #[error("{0}")]
    Rejected(String),

    /// Nobody is listening for broadcasts anymore.
    #[error("foreground is no longer listening")]
    Disconnected,
}

/// Error returned by the worker loop.
#[derive(Debug, thiserror::Error)]
pub enum WorkerError {
    /// A request named a store type that was never registered.
    #[error("no store registered with type `{0}`")]
    UnknownStore(String),

    /// The targeted store failed to handle the request.
    #[error(transparent)]
    Store(#[from] StoreError),
}

impl WorkerError {
    /// Returns `true` if the foreground side has gone away, which ends the
    /// worker loop instead of being reported back.
    pub(crate) fn is_disconnect(&self) -> bool {
        matches!(self, WorkerError::Store(StoreError::Disconnected))
    }
}

/// Error returned by the foreground [`Businessman`](crate::Businessman) API.
#[derive(Debug, thiserror::Error)]
pub enum ClientError {
    /// `dispatch` or `get_state` was called before [`install`](crate::Businessman::install).
    #[error("worker has not been installed")]
    NotInstalled,

    /// `install` was called outside a tokio runtime.
    #[error("install must be called from within a tokio runtime")]
    NoRuntime,

    /// The worker thread could not be started.
    #[error("failed to spawn worker thread: {0}")]
    Spawn(#[from] std::io::Error),

    /// The worker thread has exited.
    #[error("worker is no longer running")]
    WorkerGone,

    /// The store type is not part of the worker's manifest.
    #[error("no client store with type `{0}`")]
    UnknownStore(String),

    /// The worker reported a failure while handling the request.
    #[error("worker rejected request: {0}")]
    Rejected(String),

    /// No state broadcast arrived in time.
    #[error("timed out after {after:?} waiting for state of store `{store}`")]
    Timeout {
        /// Type name of the store whose state was requested.
        store: String,
        /// How long the client waited.
        after: Duration,
    },

    /// A state payload could not be decoded into the requested type.
    #[error("state could not be decoded: {0}")]
    Decode(#[from] serde_json::Error),
}

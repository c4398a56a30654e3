//! Messages exchanged between the foreground client and the worker thread.
//!
//! Payloads are `serde_json::Value`s: plain, owned data that moves across the
//! thread boundary without sharing anything with the sender.

use serde::{Deserialize, Serialize};
use serde_json::Value;

/// Sent once by the worker when it starts; carries an [`InitPayload`].
pub const INIT: &str = "INIT";

/// Triggered on the client once the [`ClientStores`](crate::ClientStores)
/// have been built from the worker's [`INIT`] manifest.
pub const CREATE_CLIENT_STORE: &str = "CREATE_CLIENT_STORE";

/// Built-in action and mutation present on every store. Committing it
/// re-broadcasts the current state without changing it.
pub const GET_STATE: &str = "GET_STATE";

/// Sent by the worker when a request could not be handled; carries an
/// [`ErrorPayload`].
pub const ERROR: &str = "ERROR";

/// A foreground request to run `action_type` on the store `store_type`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Request {
    /// Target store type.
    pub store_type: String,
    /// Name of the action to dispatch.
    pub action_type: String,
    /// Action argument; `Null` when none was given.
    #[serde(default)]
    pub payload: Value,
}

/// A worker broadcast.
///
/// `kind` is either a store type (the payload is that store's new state) or
/// one of the reserved event names [`INIT`] / [`ERROR`].
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Message {
    /// Store type or reserved event name.
    #[serde(rename = "type")]
    pub kind: String,
    /// Event data.
    #[serde(default)]
    pub payload: Value,
    /// Mutation that produced a state broadcast.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub applied: Option<String>,
}

/// Build a [`Message`]. An empty `applied` name is treated as absent.
pub fn pack(kind: impl Into<String>, payload: Value, applied: Option<&str>) -> Message {
    Message {
        kind: kind.into(),
        payload,
        applied: applied.filter(|name| !name.is_empty()).map(str::to_owned),
    }
}

/// One entry of the worker manifest: a store type and its action names.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StoreManifest {
    /// Store type name.
    #[serde(rename = "type")]
    pub store_type: String,
    /// Names of the actions the store accepts, built-ins included.
    pub actions: Vec<String>,
}

/// Payload of the [`INIT`] message.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct InitPayload {
    /// Registered stores, in registration order.
    pub stores: Vec<StoreManifest>,
}

/// Payload of the [`ERROR`] message.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ErrorPayload {
    /// Store type named by the failed request.
    pub store: String,
    /// Action named by the failed request.
    pub action: String,
    /// Rendered error.
    pub error: String,
}

/// A single state broadcast as seen by a store subscriber.
#[derive(Debug, Clone, PartialEq)]
pub struct StateUpdate {
    /// The store's state after the mutation.
    pub state: Value,
    /// The mutation that produced it.
    pub applied: Option<String>,
}

impl From<&Message> for StateUpdate {
    fn from(message: &Message) -> Self {
        Self {
            state: message.payload.clone(),
            applied: message.applied.clone(),
        }
    }
}

//! Application state that lives on a background worker thread and is synced
//! to foreground subscribers by message passing.

mod client;
pub use client::{Businessman, BusinessmanBuilder, ClientStore, ClientStores, StateStream};
mod config;
mod emitter;
pub use emitter::{Emitter, ListenerId, WILDCARD};
mod error;
mod message;
mod store;
mod worker;

pub use config::{Config, DEFAULT_GET_STATE_TIMEOUT, DEFAULT_THREAD_NAME};
pub use error::{ClientError, StoreError, WorkerError};
pub use message::{
    CREATE_CLIENT_STORE, ERROR, ErrorPayload, GET_STATE, INIT, InitPayload, Message, Request,
    StateUpdate, StoreManifest, pack,
};
pub use store::{Context, Store, StoreBuilder, decode, decode_or};
pub use worker::Worker;

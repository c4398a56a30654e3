//! Worker loop that owns every registered store and serves foreground requests.
//!
//! The worker runs on a dedicated OS thread started by
//! [`Businessman::install`](crate::Businessman::install). A user-supplied
//! script runs first on that thread: it registers stores and then calls
//! [`Worker::start`], which announces the stores to the foreground with an
//! [`INIT`] message and processes [`Request`]s one at a time until the
//! foreground drops its sender.

use std::collections::HashSet;
use std::io;

use serde_json::Value;
use tokio::sync::mpsc;

use crate::error::WorkerError;
use crate::message::{ERROR, ErrorPayload, INIT, InitPayload, Request, StoreManifest, pack};
use crate::store::{AnyStore, Outbox, Store};

/// The worker side of an installed [`Businessman`](crate::Businessman).
///
/// Owns the stores, the receiving end of the request channel, and the
/// sending end of the broadcast channel.
pub struct Worker {
    stores: Vec<Box<dyn AnyStore>>,
    types: HashSet<String>,
    inbox: mpsc::UnboundedReceiver<Request>,
    outbox: Outbox,
}

impl std::fmt::Debug for Worker {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Worker")
            .field("stores", &self.store_types().collect::<Vec<_>>())
            .finish_non_exhaustive()
    }
}

impl Worker {
    pub(crate) fn new(inbox: mpsc::UnboundedReceiver<Request>, outbox: Outbox) -> Self {
        Self {
            stores: Vec::new(),
            types: HashSet::new(),
            inbox,
            outbox,
        }
    }

    /// Register a store under its type name.
    ///
    /// A store whose type is already registered is dropped; the first
    /// registration wins.
    pub fn register_store<S>(&mut self, mut store: Store<S>) -> &mut Self
    where
        S: serde::Serialize + Send + 'static,
    {
        if !self.types.insert(store.store_type().to_owned()) {
            tracing::warn!(
                store = %store.store_type(),
                "store type already registered, ignoring duplicate"
            );
            return self;
        }
        store.attach(self.outbox.clone());
        self.stores.push(Box::new(store));
        self
    }

    /// Registered store types, in registration order.
    pub fn store_types(&self) -> impl Iterator<Item = &str> {
        self.stores.iter().map(|store| store.store_type())
    }

    /// Announce the registered stores and serve requests until the foreground
    /// goes away.
    ///
    /// Requests are handled strictly in arrival order. A request that fails
    /// (unknown store, unknown action, rejected by a handler) is logged and
    /// reported to the foreground as an [`ERROR`] message; the loop keeps
    /// going.
    pub fn start(mut self) {
        let manifest = InitPayload {
            stores: self
                .stores
                .iter()
                .map(|store| StoreManifest {
                    store_type: store.store_type().to_owned(),
                    actions: store.action_names(),
                })
                .collect(),
        };
        let init = match serde_json::to_value(&manifest) {
            Ok(init) => init,
            Err(e) => {
                tracing::error!(error = %e, "failed to encode worker manifest");
                return;
            }
        };
        if self.outbox.post(pack(INIT, init, None)).is_err() {
            tracing::debug!("foreground gone before INIT");
            return;
        }
        tracing::info!(stores = self.stores.len(), "worker started");

        while let Some(request) = self.inbox.blocking_recv() {
            let _span = tracing::debug_span!(
                "request",
                store = %request.store_type,
                action = %request.action_type,
            )
            .entered();

            let Request {
                store_type,
                action_type,
                payload,
            } = request;
            match self.handle(&store_type, &action_type, payload) {
                Ok(()) => {}
                Err(e) if e.is_disconnect() => break,
                Err(e) => {
                    tracing::warn!(error = %e, "request failed");
                    if self.report(store_type, action_type, &e).is_err() {
                        break;
                    }
                }
            }
        }

        tracing::info!("worker stopped");
    }

    fn handle(&mut self, store_type: &str, action: &str, payload: Value) -> Result<(), WorkerError> {
        let store = self
            .stores
            .iter_mut()
            .find(|store| store.store_type() == store_type)
            .ok_or_else(|| WorkerError::UnknownStore(store_type.to_owned()))?;
        store.dispatch(action, payload)?;
        Ok(())
    }

    fn report(&self, store: String, action: String, error: &WorkerError) -> Result<(), WorkerError> {
        let payload = ErrorPayload {
            store,
            action,
            error: error.to_string(),
        };
        let payload = serde_json::to_value(payload)
            .map_err(|e| WorkerError::Store(crate::error::StoreError::Serialize(e)))?;
        self.outbox.post(pack(ERROR, payload, None))?;
        Ok(())
    }
}

/// Start `script` on a new worker thread named `thread_name`.
///
/// The script receives the [`Worker`]; it is expected to register stores and
/// call [`Worker::start`]. The thread ends when the script returns.
///
/// # Errors
///
/// Returns [`io::Error`] if the OS refuses to spawn the thread.
pub(crate) fn spawn_worker<F>(
    thread_name: &str,
    worker: Worker,
    script: F,
) -> io::Result<std::thread::JoinHandle<()>>
where
    F: FnOnce(Worker) + Send + 'static,
{
    std::thread::Builder::new()
        .name(thread_name.to_owned())
        .spawn(move || script(worker))
}

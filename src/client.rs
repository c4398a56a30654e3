//! Foreground proxy that installs the worker and talks to it.
//!
//! [`Businessman`] owns the foreground [`Emitter`]. Every worker broadcast is
//! pumped from the worker's channel into that emitter on a tokio task, so
//! subscribers run on the runtime that called [`Businessman::install`] and see
//! broadcasts in the order the worker produced them.
//!
//! The handshake works as follows: the worker posts [`INIT`] with a manifest
//! of its stores, the pump turns the manifest into [`ClientStores`], publishes
//! them under [`CREATE_CLIENT_STORE`], and only then forwards `INIT` itself to
//! subscribers. Handles go to [`Businessman::on_stores`] listeners; plain
//! subscribers of `CREATE_CLIENT_STORE` receive the manifest as JSON.

use std::sync::{Arc, Mutex, OnceLock, PoisonError, RwLock};
use std::time::Duration;

use serde::de::DeserializeOwned;
use serde_json::Value;
use tokio::sync::{mpsc, oneshot, watch};
use tokio_stream::wrappers::UnboundedReceiverStream;

use crate::config::Config;
use crate::emitter::{Emitter, ListenerId};
use crate::error::ClientError;
use crate::message::{
    CREATE_CLIENT_STORE, ERROR, ErrorPayload, GET_STATE, INIT, InitPayload, Message, Request,
    StateUpdate, pack,
};
use crate::store::Outbox;
use crate::worker::{Worker, spawn_worker};

/// Stream of state broadcasts for a single store type.
pub type StateStream = UnboundedReceiverStream<StateUpdate>;

type Reply = oneshot::Sender<Result<Value, ClientError>>;

/// Connection to one installed worker.
#[derive(Debug, Clone)]
struct Link {
    sender: mpsc::UnboundedSender<Request>,
    emitter: Emitter<Message>,
    get_state_timeout: Duration,
}

impl Link {
    fn dispatch(&self, store_type: &str, action_type: &str, payload: Value) -> Result<(), ClientError> {
        self.sender
            .send(Request {
                store_type: store_type.to_owned(),
                action_type: action_type.to_owned(),
                payload,
            })
            .map_err(|_| ClientError::WorkerGone)
    }

    /// Ask the worker to re-broadcast `store_type` and wait for the broadcast
    /// tagged [`GET_STATE`].
    async fn get_state(&self, store_type: &str) -> Result<Value, ClientError> {
        let (tx, rx) = oneshot::channel();
        let reply: Arc<Mutex<Option<Reply>>> = Arc::new(Mutex::new(Some(tx)));

        let on_state = {
            let reply = Arc::clone(&reply);
            self.emitter.on(store_type, move |message: &Message| {
                if message.applied.as_deref() == Some(GET_STATE) {
                    resolve(&reply, Ok(message.payload.clone()));
                }
            })
        };
        let on_error = {
            let reply = Arc::clone(&reply);
            let store = store_type.to_owned();
            self.emitter.on(ERROR, move |message: &Message| {
                let Ok(failure) = serde_json::from_value::<ErrorPayload>(message.payload.clone())
                else {
                    return;
                };
                if failure.store == store && failure.action == GET_STATE {
                    resolve(&reply, Err(ClientError::Rejected(failure.error)));
                }
            })
        };
        let _listeners = PendingReply {
            emitter: &self.emitter,
            store_type,
            on_state,
            on_error,
        };

        self.dispatch(store_type, GET_STATE, Value::Null)?;
        tokio::select! {
            biased;
            reply = rx => reply.unwrap_or(Err(ClientError::WorkerGone)),
            () = self.sender.closed() => Err(ClientError::WorkerGone),
            () = tokio::time::sleep(self.get_state_timeout) => Err(ClientError::Timeout {
                store: store_type.to_owned(),
                after: self.get_state_timeout,
            }),
        }
    }
}

/// Listeners registered by one `get_state` call. Dropping it removes them,
/// whether the call resolved, failed, or was cancelled mid-await.
struct PendingReply<'a> {
    emitter: &'a Emitter<Message>,
    store_type: &'a str,
    on_state: ListenerId,
    on_error: ListenerId,
}

impl Drop for PendingReply<'_> {
    fn drop(&mut self) {
        self.emitter.off(self.store_type, Some(self.on_state));
        self.emitter.off(ERROR, Some(self.on_error));
    }
}

fn resolve(reply: &Mutex<Option<Reply>>, value: Result<Value, ClientError>) {
    if let Some(tx) = reply.lock().unwrap_or_else(PoisonError::into_inner).take() {
        // The waiter may have timed out already.
        let _ = tx.send(value);
    }
}

fn subscribe<F>(emitter: &Emitter<Message>, event: &str, f: F) -> ListenerId
where
    F: Fn(&Value, Option<&str>) + Send + Sync + 'static,
{
    emitter.on(event, move |message: &Message| {
        f(&message.payload, message.applied.as_deref())
    })
}

fn watch_store(emitter: &Emitter<Message>, store_type: &str) -> StateStream {
    let (tx, rx) = mpsc::unbounded_channel();
    let own_id: Arc<OnceLock<ListenerId>> = Arc::new(OnceLock::new());

    let weak = emitter.downgrade();
    let slot = Arc::clone(&own_id);
    let event = store_type.to_owned();
    let id = emitter.on(store_type, move |message: &Message| {
        if tx.send(StateUpdate::from(message)).is_err() {
            // Stream dropped.
            if let (Some(emitter), Some(id)) = (weak.upgrade(), slot.get()) {
                emitter.off(&event, Some(*id));
            }
        }
    });
    let _ = own_id.set(id);

    UnboundedReceiverStream::new(rx)
}

/// Moves worker broadcasts into the foreground emitter until the worker's
/// broadcast channel closes.
async fn pump(
    mut messages: mpsc::UnboundedReceiver<Message>,
    link: Link,
    store_events: Emitter<ClientStores>,
    stores: Arc<watch::Sender<Option<ClientStores>>>,
) {
    while let Some(message) = messages.recv().await {
        if message.kind == INIT {
            match serde_json::from_value::<InitPayload>(message.payload.clone()) {
                Ok(init) => {
                    let client_stores = ClientStores::new(init, &link);
                    tracing::info!(stores = client_stores.len(), "client stores created");
                    stores.send_replace(Some(client_stores.clone()));
                    store_events.trigger(CREATE_CLIENT_STORE, &client_stores);
                    link.emitter.trigger(
                        CREATE_CLIENT_STORE,
                        &pack(CREATE_CLIENT_STORE, message.payload.clone(), None),
                    );
                }
                Err(e) => tracing::error!(error = %e, "malformed INIT payload"),
            }
        }
        link.emitter.trigger(&message.kind, &message);
    }
    tracing::debug!("worker broadcast channel closed");
}

/// Foreground handle to one store announced by the worker.
///
/// Cheap to clone. Holding a `ClientStore` keeps its worker's request
/// channel open.
#[derive(Debug, Clone)]
pub struct ClientStore {
    store_type: String,
    actions: Vec<String>,
    link: Link,
}

impl ClientStore {
    /// The store type.
    pub fn store_type(&self) -> &str {
        &self.store_type
    }

    /// Action names the worker reported for this store.
    pub fn actions(&self) -> &[String] {
        &self.actions
    }

    /// Dispatch `action_type` on this store. See [`Businessman::dispatch`].
    pub fn dispatch(&self, action_type: &str, payload: impl Into<Value>) -> Result<(), ClientError> {
        self.link.dispatch(&self.store_type, action_type, payload.into())
    }

    /// Subscribe to this store's state broadcasts.
    pub fn subscribe<F>(&self, f: F) -> ListenerId
    where
        F: Fn(&Value, Option<&str>) + Send + Sync + 'static,
    {
        subscribe(&self.link.emitter, &self.store_type, f)
    }

    /// Remove one subscriber, or with `None` every listener of this store,
    /// including pending `get_state` waiters.
    pub fn unsubscribe(&self, id: Option<ListenerId>) -> usize {
        self.link.emitter.off(&self.store_type, id)
    }

    /// Current state of this store. See [`Businessman::get_state`].
    pub async fn get_state(&self) -> Result<Value, ClientError> {
        self.link.get_state(&self.store_type).await
    }

    /// Current state of this store, decoded into `T`.
    pub async fn get_state_as<T: DeserializeOwned>(&self) -> Result<T, ClientError> {
        Ok(serde_json::from_value(self.get_state().await?)?)
    }

    /// Stream of this store's state broadcasts. See [`Businessman::watch`].
    pub fn watch(&self) -> StateStream {
        watch_store(&self.link.emitter, &self.store_type)
    }
}

/// The client-side stores built from the worker's [`INIT`] manifest.
#[derive(Debug, Clone, Default)]
pub struct ClientStores {
    stores: Vec<ClientStore>,
}

impl ClientStores {
    fn new(init: InitPayload, link: &Link) -> Self {
        Self {
            stores: init
                .stores
                .into_iter()
                .map(|manifest| ClientStore {
                    store_type: manifest.store_type,
                    actions: manifest.actions,
                    link: link.clone(),
                })
                .collect(),
        }
    }

    /// The store of type `store_type`, if the worker announced one.
    pub fn get(&self, store_type: &str) -> Option<&ClientStore> {
        self.stores.iter().find(|store| store.store_type == store_type)
    }

    /// Like [`get`](ClientStores::get), but an unknown type is an error.
    ///
    /// # Errors
    ///
    /// [`ClientError::UnknownStore`] if the worker did not announce it.
    pub fn store(&self, store_type: &str) -> Result<&ClientStore, ClientError> {
        self.get(store_type)
            .ok_or_else(|| ClientError::UnknownStore(store_type.to_owned()))
    }

    /// Stores in the order the worker registered them.
    pub fn iter(&self) -> impl Iterator<Item = &ClientStore> {
        self.stores.iter()
    }

    /// Store types in registration order.
    pub fn store_types(&self) -> impl Iterator<Item = &str> {
        self.stores.iter().map(|store| store.store_type.as_str())
    }

    /// Number of stores the worker announced.
    pub fn len(&self) -> usize {
        self.stores.len()
    }

    /// Returns `true` if the worker announced no stores.
    pub fn is_empty(&self) -> bool {
        self.stores.is_empty()
    }
}

struct Inner {
    config: Config,
    emitter: Emitter<Message>,
    store_events: Emitter<ClientStores>,
    stores: Arc<watch::Sender<Option<ClientStores>>>,
    link: RwLock<Option<Link>>,
    pump: Mutex<Option<tokio::task::JoinHandle<()>>>,
}

impl Drop for Inner {
    fn drop(&mut self) {
        // The pump owns a request sender; stopping it lets the worker exit.
        let pump = self.pump.get_mut().unwrap_or_else(PoisonError::into_inner);
        if let Some(task) = pump.take() {
            task.abort();
        }
    }
}

/// Foreground entry point: installs the worker, dispatches actions, and
/// delivers state broadcasts to subscribers.
///
/// `Clone` is cheap: clones share the same worker and subscribers.
///
/// # Examples
///
/// ```
/// use businessman::{Businessman, Store, decode_or};
///
/// # #[tokio::main(flavor = "current_thread")]
/// # async fn main() -> Result<(), Box<dyn std::error::Error>> {
/// let app = Businessman::new();
/// app.install(|mut worker| {
///     worker.register_store(
///         Store::builder("counter", 0i64)
///             .mutation("increment", |state, payload| {
///                 *state += decode_or(payload, 1i64)?;
///                 Ok(())
///             })
///             .action("increment", |ctx, payload| ctx.commit("increment", payload))
///             .build(),
///     );
///     worker.start();
/// })?;
///
/// let stores = app.stores().await?;
/// let counter = stores.store("counter")?;
/// counter.dispatch("increment", 2)?;
/// assert_eq!(counter.get_state_as::<i64>().await?, 2);
/// # Ok(())
/// # }
/// ```
#[derive(Clone)]
pub struct Businessman {
    inner: Arc<Inner>,
}

impl std::fmt::Debug for Businessman {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Businessman")
            .field("config", &self.inner.config)
            .field("installed", &self.is_installed())
            .finish()
    }
}

impl Default for Businessman {
    fn default() -> Self {
        Self::new()
    }
}

impl Businessman {
    /// Create a client with the default [`Config`].
    pub fn new() -> Self {
        Self::with_config(Config::default())
    }

    /// Create a client with an explicit [`Config`].
    pub fn with_config(config: Config) -> Self {
        let (stores, _) = watch::channel(None);
        Self {
            inner: Arc::new(Inner {
                config,
                emitter: Emitter::new(),
                store_events: Emitter::new(),
                stores: Arc::new(stores),
                link: RwLock::new(None),
                pump: Mutex::new(None),
            }),
        }
    }

    /// Start configuring a client.
    pub fn builder() -> BusinessmanBuilder {
        BusinessmanBuilder::default()
    }

    /// The configuration this client was built with.
    pub fn config(&self) -> &Config {
        &self.inner.config
    }

    /// Returns `true` once [`install`](Businessman::install) has succeeded.
    pub fn is_installed(&self) -> bool {
        self.inner
            .link
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .is_some()
    }

    /// Spawn a worker thread running `script`.
    ///
    /// The script receives the [`Worker`], registers stores on it, and calls
    /// [`Worker::start`]. Broadcasts are delivered on a task spawned onto the
    /// current tokio runtime.
    ///
    /// Installing again replaces the previous worker: its stores are
    /// forgotten until the new worker's `INIT` arrives, and the old worker
    /// exits once no [`ClientStore`] refers to it anymore. Subscribers are
    /// kept.
    ///
    /// # Errors
    ///
    /// * [`ClientError::NoRuntime`] -- called outside a tokio runtime.
    /// * [`ClientError::Spawn`] -- the worker thread could not be started.
    pub fn install<F>(&self, script: F) -> Result<(), ClientError>
    where
        F: FnOnce(Worker) + Send + 'static,
    {
        let runtime = tokio::runtime::Handle::try_current().map_err(|_| ClientError::NoRuntime)?;

        let (request_tx, request_rx) = mpsc::unbounded_channel();
        let (message_tx, message_rx) = mpsc::unbounded_channel();
        let worker = Worker::new(request_rx, Outbox::new(message_tx));
        spawn_worker(&self.inner.config.thread_name, worker, script)?;

        let link = Link {
            sender: request_tx,
            emitter: self.inner.emitter.clone(),
            get_state_timeout: self.inner.config.get_state_timeout,
        };

        let mut pump_slot = self.inner.pump.lock().unwrap_or_else(PoisonError::into_inner);
        if let Some(previous) = pump_slot.take() {
            tracing::debug!("replacing installed worker");
            previous.abort();
        }
        self.inner.stores.send_replace(None);
        *pump_slot = Some(runtime.spawn(pump(
            message_rx,
            link.clone(),
            self.inner.store_events.clone(),
            Arc::clone(&self.inner.stores),
        )));
        drop(pump_slot);

        *self.inner.link.write().unwrap_or_else(PoisonError::into_inner) = Some(link);
        tracing::info!(thread = %self.inner.config.thread_name, "worker installed");
        Ok(())
    }

    /// Ask the worker to run `action_type` on the store `store_type`.
    ///
    /// Fire-and-forget: the resulting state arrives through subscribers.
    ///
    /// # Errors
    ///
    /// * [`ClientError::NotInstalled`] -- no worker installed yet.
    /// * [`ClientError::WorkerGone`] -- the worker thread has exited.
    pub fn dispatch(
        &self,
        store_type: &str,
        action_type: &str,
        payload: impl Into<Value>,
    ) -> Result<(), ClientError> {
        self.link()?.dispatch(store_type, action_type, payload.into())
    }

    /// Listen to `event`: a store type, [`INIT`], [`ERROR`] or
    /// [`CREATE_CLIENT_STORE`].
    ///
    /// `f` receives the payload and, for state broadcasts, the name of the
    /// mutation that produced it. Subscribing does not require a worker.
    ///
    /// `CREATE_CLIENT_STORE` listeners receive the worker's manifest
    /// (`{"stores": [{"type": .., "actions": [..]}]}`). Use
    /// [`on_stores`](Businessman::on_stores) or
    /// [`stores`](Businessman::stores) to get the [`ClientStores`] handles.
    pub fn subscribe<F>(&self, event: &str, f: F) -> ListenerId
    where
        F: Fn(&Value, Option<&str>) + Send + Sync + 'static,
    {
        subscribe(&self.inner.emitter, event, f)
    }

    /// Listen to every worker broadcast; `f` also receives the event name.
    pub fn subscribe_all<F>(&self, f: F) -> ListenerId
    where
        F: Fn(&str, &Value, Option<&str>) + Send + Sync + 'static,
    {
        self.inner.emitter.on_any(move |event: &str, message: &Message| {
            f(event, &message.payload, message.applied.as_deref())
        })
    }

    /// Remove one listener of `event`, or with `None` all of them.
    ///
    /// Returns how many listeners were removed.
    pub fn unsubscribe(&self, event: &str, id: Option<ListenerId>) -> usize {
        self.inner.emitter.off(event, id)
    }

    /// Current state of `store_type`.
    ///
    /// Dispatches the built-in [`GET_STATE`] action and resolves with the
    /// first broadcast tagged `GET_STATE`. Regular subscribers of the store
    /// see that broadcast too.
    ///
    /// # Errors
    ///
    /// * [`ClientError::NotInstalled`] / [`ClientError::WorkerGone`].
    /// * [`ClientError::Rejected`] -- the worker has no such store.
    /// * [`ClientError::Timeout`] -- no reply within
    ///   [`Config::get_state_timeout`].
    pub async fn get_state(&self, store_type: &str) -> Result<Value, ClientError> {
        self.link()?.get_state(store_type).await
    }

    /// Current state of `store_type`, decoded into `T`.
    pub async fn get_state_as<T: DeserializeOwned>(&self, store_type: &str) -> Result<T, ClientError> {
        Ok(serde_json::from_value(self.get_state(store_type).await?)?)
    }

    /// Stream of state broadcasts for `store_type`. The listener behind it is
    /// removed on the first broadcast after the stream is dropped.
    pub fn watch(&self, store_type: &str) -> StateStream {
        watch_store(&self.inner.emitter, store_type)
    }

    /// Run `f` every time a worker announces its stores.
    pub fn on_stores<F>(&self, f: F) -> ListenerId
    where
        F: Fn(&ClientStores) + Send + Sync + 'static,
    {
        self.inner.store_events.on(CREATE_CLIENT_STORE, f)
    }

    /// The stores of the installed worker, if it has announced them.
    pub fn try_stores(&self) -> Option<ClientStores> {
        self.inner.stores.borrow().clone()
    }

    /// Wait until the installed worker has announced its stores.
    ///
    /// Resolves immediately if it already has. Called before
    /// [`install`](Businessman::install), it waits for the first worker.
    ///
    /// # Errors
    ///
    /// [`ClientError::WorkerGone`] if the worker exits without announcing,
    /// for instance because its script never called [`Worker::start`].
    pub async fn stores(&self) -> Result<ClientStores, ClientError> {
        let mut rx = self.inner.stores.subscribe();
        let link = self.link().ok();
        let announced = async {
            rx.wait_for(Option::is_some)
                .await
                .ok()
                .and_then(|stores| stores.clone())
        };

        let stores = match link {
            Some(link) => tokio::select! {
                biased;
                stores = announced => stores,
                () = link.sender.closed() => None,
            },
            None => announced.await,
        };
        stores.ok_or(ClientError::WorkerGone)
    }

    fn link(&self) -> Result<Link, ClientError> {
        self.inner
            .link
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
            .ok_or(ClientError::NotInstalled)
    }
}

/// Builder for [`Businessman`].
#[derive(Debug, Default)]
pub struct BusinessmanBuilder {
    config: Config,
}

impl BusinessmanBuilder {
    /// How long `get_state` waits for the worker. Defaults to 5 seconds.
    pub fn get_state_timeout(mut self, timeout: Duration) -> Self {
        self.config.get_state_timeout = timeout;
        self
    }

    /// Name of the worker thread. Defaults to `"businessman-worker"`.
    pub fn thread_name(mut self, name: impl Into<String>) -> Self {
        self.config.thread_name = name.into();
        self
    }

    /// Replace the whole configuration.
    pub fn config(mut self, config: Config) -> Self {
        self.config = config;
        self
    }

    /// Create the client. No worker is installed yet.
    pub fn build(self) -> Businessman {
        Businessman::with_config(self.config)
    }
}

#[cfg(test)]
mod tests {
    use std::sync::atomic::{AtomicUsize, Ordering};

    use serde_json::json;
    use tokio_stream::StreamExt;

    use super::*;
    use crate::store::test_fixtures::{counter, message};

    fn install_fixtures(app: &Businessman) {
        app.install(|mut worker| {
            worker.register_store(counter()).register_store(message());
            worker.start();
        })
        .expect("install should succeed");
    }

    /// Collects `(state, applied)` pairs seen by a subscriber.
    fn recorder(
        app: &Businessman,
        event: &str,
    ) -> (Arc<Mutex<Vec<(Value, Option<String>)>>>, ListenerId) {
        let seen = Arc::new(Mutex::new(Vec::new()));
        let sink = Arc::clone(&seen);
        let id = app.subscribe(event, move |state, applied| {
            sink.lock()
                .unwrap()
                .push((state.clone(), applied.map(str::to_owned)));
        });
        (seen, id)
    }

    #[tokio::test]
    async fn dispatch_before_install_fails() {
        let app = Businessman::new();
        assert!(!app.is_installed());
        assert!(matches!(
            app.dispatch("counter", "increment", 1),
            Err(ClientError::NotInstalled)
        ));
        assert!(matches!(
            app.get_state("counter").await,
            Err(ClientError::NotInstalled)
        ));
    }

    #[test]
    fn install_outside_runtime_fails() {
        let app = Businessman::new();
        let result = app.install(|worker| worker.start());
        assert!(matches!(result, Err(ClientError::NoRuntime)));
    }

    #[tokio::test]
    async fn handshake_builds_client_stores() {
        let app = Businessman::new();
        let created = Arc::new(AtomicUsize::new(0));
        let created_clone = Arc::clone(&created);
        app.on_stores(move |stores| {
            assert_eq!(stores.len(), 2);
            created_clone.fetch_add(1, Ordering::SeqCst);
        });
        let (inits, _) = recorder(&app, INIT);

        install_fixtures(&app);
        let stores = app.stores().await.expect("stores should be announced");

        assert_eq!(stores.store_types().collect::<Vec<_>>(), vec!["counter", "message"]);
        assert!(stores.store("counter").unwrap().actions().contains(&"set".to_string()));
        assert!(matches!(stores.store("nope"), Err(ClientError::UnknownStore(_))));
        assert_eq!(created.load(Ordering::SeqCst), 1);
        assert_eq!(inits.lock().unwrap().len(), 1);
        assert!(app.try_stores().is_some());
    }

    #[tokio::test]
    async fn subscribers_see_state_and_applied_mutation() {
        let app = Businessman::new();
        let (seen, _) = recorder(&app, "counter");
        install_fixtures(&app);

        app.dispatch("counter", "increment", 1).unwrap();
        app.dispatch("counter", "set", 10).unwrap();
        app.get_state("counter").await.unwrap();

        assert_eq!(
            *seen.lock().unwrap(),
            vec![
                (json!(1), Some("increment".to_string())),
                (json!(10), Some("set".to_string())),
                (json!(10), Some(GET_STATE.to_string())),
            ]
        );
    }

    #[tokio::test]
    async fn unsubscribe_stops_delivery() {
        let app = Businessman::new();
        let (seen, id) = recorder(&app, "counter");
        install_fixtures(&app);

        app.dispatch("counter", "increment", Value::Null).unwrap();
        app.get_state("counter").await.unwrap();
        assert_eq!(app.unsubscribe("counter", Some(id)), 1);
        app.dispatch("counter", "increment", Value::Null).unwrap();
        app.get_state("counter").await.unwrap();

        assert_eq!(seen.lock().unwrap().len(), 2);
    }

    #[tokio::test]
    async fn get_state_returns_latest_state() {
        let app = Businessman::new();
        install_fixtures(&app);

        app.dispatch("counter", "set", 123456).unwrap();

        assert_eq!(app.get_state("counter").await.unwrap(), json!(123456));
        assert_eq!(app.get_state_as::<i64>("counter").await.unwrap(), 123456);
    }

    #[tokio::test]
    async fn get_state_cleans_up_its_listeners() {
        let app = Businessman::new();
        install_fixtures(&app);

        app.get_state("counter").await.unwrap();

        assert_eq!(app.inner.emitter.listener_count("counter"), 0);
        assert_eq!(app.inner.emitter.listener_count(ERROR), 0);
    }

    #[tokio::test]
    async fn get_state_of_unknown_store_is_rejected() {
        let app = Businessman::new();
        install_fixtures(&app);

        let err = app.get_state("ghost").await.unwrap_err();

        assert!(
            matches!(err, ClientError::Rejected(ref msg) if msg.contains("ghost")),
            "unexpected error: {err:?}"
        );
    }

    #[tokio::test]
    async fn get_state_times_out_when_worker_is_busy() {
        let app = Businessman::builder()
            .get_state_timeout(Duration::from_millis(50))
            .build();
        app.install(|worker| {
            std::thread::sleep(Duration::from_millis(300));
            worker.start();
        })
        .unwrap();

        let err = app.get_state("counter").await.unwrap_err();

        assert!(matches!(err, ClientError::Timeout { ref store, .. } if store == "counter"));
    }

    #[tokio::test]
    async fn get_state_fails_fast_when_worker_exits() {
        let app = Businessman::new();
        app.install(|_worker| {}).unwrap();

        let err = app.get_state("counter").await.unwrap_err();

        assert!(matches!(err, ClientError::WorkerGone), "unexpected error: {err:?}");
    }

    #[tokio::test]
    async fn stores_fails_when_worker_never_starts() {
        let app = Businessman::new();
        app.install(|mut worker| {
            worker.register_store(counter());
        })
        .unwrap();

        let result = tokio::time::timeout(Duration::from_secs(2), app.stores())
            .await
            .expect("stores() should not wait for a worker that has exited");

        assert!(matches!(result, Err(ClientError::WorkerGone)), "unexpected: {result:?}");
    }

    #[tokio::test]
    async fn cancelled_get_state_removes_its_listeners() {
        let app = Businessman::new();
        app.install(|mut worker| {
            std::thread::sleep(Duration::from_millis(300));
            worker.register_store(counter());
            worker.start();
        })
        .unwrap();

        for _ in 0..5 {
            let attempt =
                tokio::time::timeout(Duration::from_millis(10), app.get_state("counter")).await;
            assert!(attempt.is_err(), "worker should still be asleep");
        }

        assert_eq!(app.inner.emitter.listener_count("counter"), 0);
        assert_eq!(app.inner.emitter.listener_count(ERROR), 0);
    }

    #[tokio::test]
    async fn create_client_store_subscribers_receive_the_manifest() {
        let app = Businessman::new();
        let (created, _) = recorder(&app, CREATE_CLIENT_STORE);
        install_fixtures(&app);
        app.stores().await.unwrap();
        app.get_state("counter").await.unwrap();

        let created = created.lock().unwrap();
        assert_eq!(created.len(), 1);
        let manifest: InitPayload = serde_json::from_value(created[0].0.clone()).unwrap();
        let types: Vec<_> = manifest.stores.iter().map(|s| s.store_type.as_str()).collect();
        assert_eq!(types, vec!["counter", "message"]);
        assert_eq!(created[0].1, None);
    }

    #[tokio::test]
    async fn worker_errors_reach_error_subscribers() {
        let app = Businessman::new();
        let (errors, _) = recorder(&app, ERROR);
        install_fixtures(&app);

        app.dispatch("counter", "decrement", Value::Null).unwrap();
        app.get_state("counter").await.unwrap();

        let errors = errors.lock().unwrap();
        assert_eq!(errors.len(), 1);
        let failure: ErrorPayload = serde_json::from_value(errors[0].0.clone()).unwrap();
        assert_eq!(failure.action, "decrement");
    }

    #[tokio::test]
    async fn subscribe_all_sees_every_event() {
        let app = Businessman::new();
        let events = Arc::new(Mutex::new(Vec::new()));
        let sink = Arc::clone(&events);
        app.subscribe_all(move |event, _, _| sink.lock().unwrap().push(event.to_owned()));
        install_fixtures(&app);

        app.stores().await.unwrap();
        app.dispatch("message", "update", "hello").unwrap();
        app.get_state("counter").await.unwrap();

        assert_eq!(
            *events.lock().unwrap(),
            vec![CREATE_CLIENT_STORE, INIT, "message", "counter"]
        );
    }

    #[tokio::test]
    async fn client_store_proxies_to_its_store() {
        let app = Businessman::new();
        install_fixtures(&app);
        let stores = app.stores().await.unwrap();
        let message_store = stores.store("message").unwrap();

        let seen = Arc::new(Mutex::new(Vec::new()));
        let sink = Arc::clone(&seen);
        message_store.subscribe(move |state, _| sink.lock().unwrap().push(state.clone()));
        message_store.dispatch("update", "This is a test").unwrap();

        assert_eq!(
            message_store.get_state_as::<String>().await.unwrap(),
            "This is a test"
        );
        assert_eq!(seen.lock().unwrap()[0], json!("This is a test"));

        assert!(message_store.unsubscribe(None) >= 1);
    }

    #[tokio::test]
    async fn watch_streams_updates_in_commit_order() {
        let app = Businessman::new();
        install_fixtures(&app);
        let mut updates = app.watch("counter");

        for _ in 0..3 {
            app.dispatch("counter", "increment", Value::Null).unwrap();
        }

        for expected in 1..=3 {
            let update = updates.next().await.expect("stream should yield");
            assert_eq!(update.state, json!(expected));
            assert_eq!(update.applied.as_deref(), Some("increment"));
        }
    }

    #[tokio::test]
    async fn dropped_watch_stream_unregisters_itself() {
        let app = Businessman::new();
        install_fixtures(&app);
        drop(app.watch("counter"));
        assert_eq!(app.inner.emitter.listener_count("counter"), 1);

        app.dispatch("counter", "increment", Value::Null).unwrap();
        app.get_state("counter").await.unwrap();

        assert_eq!(app.inner.emitter.listener_count("counter"), 0);
    }

    #[tokio::test]
    async fn reinstall_replaces_worker_and_keeps_subscribers() {
        let app = Businessman::new();
        let (seen, _) = recorder(&app, "counter");
        install_fixtures(&app);
        app.dispatch("counter", "set", 5).unwrap();
        app.get_state("counter").await.unwrap();

        install_fixtures(&app);
        let stores = app.stores().await.unwrap();
        assert_eq!(stores.len(), 2);

        // Fresh worker, fresh state.
        assert_eq!(app.get_state_as::<i64>("counter").await.unwrap(), 0);
        assert_eq!(seen.lock().unwrap().len(), 3);
    }

    #[tokio::test]
    async fn builder_applies_config() {
        let app = Businessman::builder()
            .thread_name("store-thread")
            .get_state_timeout(Duration::from_secs(1))
            .build();
        assert_eq!(app.config().thread_name, "store-thread");
        assert_eq!(app.config().get_state_timeout, Duration::from_secs(1));
    }
}

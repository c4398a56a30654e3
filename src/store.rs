//! Worker-side store: a state value plus named mutations and actions.
//!
//! Actions are the entry point for foreground requests. They may inspect the
//! state, dispatch other actions, and commit mutations. Mutations are the only
//! code that changes the state; every commit broadcasts the resulting state to
//! the foreground tagged with the mutation name.
//!
//! ```
//! use businessman::{Store, decode_or};
//!
//! let store = Store::builder("counter", 0i64)
//!     .mutation("increment", |state, payload| {
//!         *state += decode_or(payload, 1i64)?;
//!         Ok(())
//!     })
//!     .action("increment", |ctx, payload| ctx.commit("increment", payload))
//!     .build();
//!
//! assert_eq!(store.store_type(), "counter");
//! assert!(store.action_names().contains(&"increment".to_string()));
//! ```

use std::collections::HashMap;
use std::sync::Arc;

use serde::Serialize;
use serde::de::DeserializeOwned;
use serde_json::Value;
use tokio::sync::mpsc;

use crate::error::StoreError;
use crate::message::{GET_STATE, Message, pack};

type Mutation<S> = Arc<dyn Fn(&mut S, Value) -> Result<(), StoreError> + Send + Sync>;
type Action<S> = Arc<dyn Fn(&mut Context<'_, S>, Value) -> Result<(), StoreError> + Send + Sync>;

/// Decode a handler payload into `T`.
///
/// # Errors
///
/// Returns [`StoreError::Payload`] if the value does not match `T`.
pub fn decode<T: DeserializeOwned>(payload: Value) -> Result<T, StoreError> {
    serde_json::from_value(payload).map_err(StoreError::Payload)
}

/// Decode a handler payload into `T`, falling back to `default` when no
/// payload was given (`Null`).
///
/// # Errors
///
/// Returns [`StoreError::Payload`] if a payload is present but does not
/// match `T`.
pub fn decode_or<T: DeserializeOwned>(payload: Value, default: T) -> Result<T, StoreError> {
    if payload.is_null() {
        Ok(default)
    } else {
        decode(payload)
    }
}

/// Sending half of the worker → foreground channel.
#[derive(Debug, Clone)]
pub(crate) struct Outbox {
    sender: mpsc::UnboundedSender<Message>,
}

impl Outbox {
    pub(crate) fn new(sender: mpsc::UnboundedSender<Message>) -> Self {
        Self { sender }
    }

    /// Post a message to the foreground.
    ///
    /// # Errors
    ///
    /// [`StoreError::Disconnected`] if the receiving side was dropped.
    pub(crate) fn post(&self, message: Message) -> Result<(), StoreError> {
        self.sender
            .send(message)
            .map_err(|_| StoreError::Disconnected)
    }
}

struct Handlers<S> {
    mutations: HashMap<String, Mutation<S>>,
    actions: HashMap<String, Action<S>>,
}

/// Application state living on the worker thread.
///
/// Built with [`Store::builder`] and handed to
/// [`Worker::register_store`](crate::Worker::register_store). A store that
/// has not been registered yet mutates its state without broadcasting.
pub struct Store<S> {
    store_type: String,
    state: S,
    handlers: Arc<Handlers<S>>,
    applied: Option<String>,
    outbox: Option<Outbox>,
}

impl<S> std::fmt::Debug for Store<S> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Store")
            .field("store_type", &self.store_type)
            .field("applied", &self.applied)
            .finish_non_exhaustive()
    }
}

impl<S: Serialize + Send + 'static> Store<S> {
    /// Start building a store of type `store_type` holding `state`.
    pub fn builder(store_type: impl Into<String>, state: S) -> StoreBuilder<S> {
        StoreBuilder {
            store_type: store_type.into(),
            state,
            mutations: HashMap::new(),
            actions: HashMap::new(),
        }
    }

    /// The store type, used as the event name for its broadcasts.
    pub fn store_type(&self) -> &str {
        &self.store_type
    }

    /// The current state.
    pub fn state(&self) -> &S {
        &self.state
    }

    /// Name of the most recently committed mutation.
    pub fn applied_mutation(&self) -> Option<&str> {
        self.applied.as_deref()
    }

    /// Action names, sorted, for the worker manifest.
    pub fn action_names(&self) -> Vec<String> {
        let mut names: Vec<String> = self.handlers.actions.keys().cloned().collect();
        names.sort();
        names
    }

    /// Run the mutation `name` and broadcast the resulting state.
    ///
    /// The broadcast happens even if the mutation left the state unchanged.
    ///
    /// # Errors
    ///
    /// * [`StoreError::UnknownMutation`] -- no such mutation.
    /// * Whatever the mutation itself returns; nothing is broadcast then.
    /// * [`StoreError::Serialize`] / [`StoreError::Disconnected`] -- the
    ///   broadcast could not be built or delivered.
    pub fn commit(&mut self, name: &str, payload: Value) -> Result<(), StoreError> {
        let handlers = Arc::clone(&self.handlers);
        let mutation = handlers
            .mutations
            .get(name)
            .ok_or_else(|| StoreError::UnknownMutation {
                store: self.store_type.clone(),
                name: name.to_owned(),
            })?;

        self.applied = Some(name.to_owned());
        mutation(&mut self.state, payload)?;
        tracing::trace!(store = %self.store_type, mutation = %name, "mutation committed");
        self.broadcast()
    }

    /// Run the action `name`.
    ///
    /// # Errors
    ///
    /// * [`StoreError::UnknownAction`] -- no such action.
    /// * Whatever the action (or anything it commits) returns.
    pub fn dispatch(&mut self, name: &str, payload: Value) -> Result<(), StoreError> {
        let handlers = Arc::clone(&self.handlers);
        let action = handlers
            .actions
            .get(name)
            .ok_or_else(|| StoreError::UnknownAction {
                store: self.store_type.clone(),
                name: name.to_owned(),
            })?;

        action(&mut Context { store: self }, payload)
    }

    pub(crate) fn attach(&mut self, outbox: Outbox) {
        self.outbox = Some(outbox);
    }

    fn broadcast(&self) -> Result<(), StoreError> {
        let Some(outbox) = &self.outbox else {
            return Ok(());
        };
        let state = serde_json::to_value(&self.state).map_err(StoreError::Serialize)?;
        outbox.post(pack(self.store_type.as_str(), state, self.applied.as_deref()))
    }
}

/// What an action sees of its store.
pub struct Context<'a, S> {
    store: &'a mut Store<S>,
}

impl<S: Serialize + Send + 'static> Context<'_, S> {
    /// The current state.
    pub fn state(&self) -> &S {
        self.store.state()
    }

    /// Type name of the store running the action.
    pub fn store_type(&self) -> &str {
        self.store.store_type()
    }

    /// Commit a mutation on this store. See [`Store::commit`].
    pub fn commit(&mut self, name: &str, payload: impl Into<Value>) -> Result<(), StoreError> {
        self.store.commit(name, payload.into())
    }

    /// Dispatch another action on this store. See [`Store::dispatch`].
    pub fn dispatch(&mut self, name: &str, payload: impl Into<Value>) -> Result<(), StoreError> {
        self.store.dispatch(name, payload.into())
    }
}

/// Builder for [`Store`].
pub struct StoreBuilder<S> {
    store_type: String,
    state: S,
    mutations: HashMap<String, Mutation<S>>,
    actions: HashMap<String, Action<S>>,
}

impl<S: Serialize + Send + 'static> StoreBuilder<S> {
    /// Register a mutation. A later registration under the same name wins.
    pub fn mutation<F>(mut self, name: impl Into<String>, f: F) -> Self
    where
        F: Fn(&mut S, Value) -> Result<(), StoreError> + Send + Sync + 'static,
    {
        self.mutations.insert(name.into(), Arc::new(f));
        self
    }

    /// Register an action. A later registration under the same name wins.
    pub fn action<F>(mut self, name: impl Into<String>, f: F) -> Self
    where
        F: Fn(&mut Context<'_, S>, Value) -> Result<(), StoreError> + Send + Sync + 'static,
    {
        self.actions.insert(name.into(), Arc::new(f));
        self
    }

    /// Finish the store, merging in the built-in [`GET_STATE`] handlers.
    ///
    /// The built-ins replace user handlers registered under that name.
    pub fn build(mut self) -> Store<S> {
        if self.mutations.contains_key(GET_STATE) || self.actions.contains_key(GET_STATE) {
            tracing::warn!(
                store = %self.store_type,
                "user handler named GET_STATE replaced by the built-in"
            );
        }
        self.mutations
            .insert(GET_STATE.to_owned(), Arc::new(get_state_mutation::<S>));
        self.actions
            .insert(GET_STATE.to_owned(), Arc::new(get_state_action::<S>));

        Store {
            store_type: self.store_type,
            state: self.state,
            handlers: Arc::new(Handlers {
                mutations: self.mutations,
                actions: self.actions,
            }),
            applied: None,
            outbox: None,
        }
    }
}

fn get_state_mutation<S>(_: &mut S, _: Value) -> Result<(), StoreError> {
    Ok(())
}

fn get_state_action<S: Serialize + Send + 'static>(
    ctx: &mut Context<'_, S>,
    _: Value,
) -> Result<(), StoreError> {
    ctx.commit(GET_STATE, Value::Null)
}

/// Object-safe view of a [`Store`] so the worker can hold stores with
/// different state types side by side.
pub(crate) trait AnyStore: Send {
    fn store_type(&self) -> &str;
    fn action_names(&self) -> Vec<String>;
    fn dispatch(&mut self, name: &str, payload: Value) -> Result<(), StoreError>;
    fn attach(&mut self, outbox: Outbox);
}

impl<S: Serialize + Send + 'static> AnyStore for Store<S> {
    fn store_type(&self) -> &str {
        Store::store_type(self)
    }

    fn action_names(&self) -> Vec<String> {
        Store::action_names(self)
    }

    fn dispatch(&mut self, name: &str, payload: Value) -> Result<(), StoreError> {
        Store::dispatch(self, name, payload)
    }

    fn attach(&mut self, outbox: Outbox) {
        Store::attach(self, outbox)
    }
}

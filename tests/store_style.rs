//! End-to-end tests for the worker-backed store: install a worker with a
//! counter and a message store, then drive it through the client stores.

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use businessman::{
    Businessman, ClientError, ClientStores, GET_STATE, Store, StoreError, Worker, decode_or,
};
use serde::{Deserialize, Serialize};
use serde_json::{Value, json};
use tokio_stream::StreamExt;

fn counter_store() -> Store<i64> {
    Store::builder("counter", 0i64)
        .mutation("increment", |state, payload| {
            *state += decode_or(payload, 1i64)?;
            Ok(())
        })
        .mutation("set", |state, payload| {
            *state = decode_or(payload, 0i64)?;
            Ok(())
        })
        .action("increment", |ctx, payload| ctx.commit("increment", payload))
        .action("set", |ctx, payload| ctx.commit("set", payload))
        .build()
}

fn message_store() -> Store<String> {
    Store::builder("message", String::new())
        .mutation("set", |state, payload| {
            *state = decode_or(payload, String::new())?;
            Ok(())
        })
        .action("set", |ctx, payload| ctx.commit("set", payload))
        .build()
}

fn script(mut worker: Worker) {
    worker
        .register_store(counter_store())
        .register_store(message_store());
    worker.start();
}

async fn installed() -> (Businessman, ClientStores) {
    let app = Businessman::builder()
        .get_state_timeout(Duration::from_secs(2))
        .build();
    app.install(script).expect("install should succeed");
    let stores = app.stores().await.expect("worker should announce its stores");
    (app, stores)
}

#[tokio::test]
async fn install_announces_client_stores() {
    let app = Businessman::new();
    let announced = Arc::new(AtomicUsize::new(0));
    let announced_clone = Arc::clone(&announced);
    app.on_stores(move |_| {
        announced_clone.fetch_add(1, Ordering::SeqCst);
    });

    app.install(script).expect("install should succeed");
    let stores = app.stores().await.expect("stores should arrive");

    assert_eq!(announced.load(Ordering::SeqCst), 1);
    assert_eq!(stores.len(), 2);
    for store in stores.iter() {
        assert!(store.actions().iter().any(|a| a == GET_STATE));
        assert!(store.actions().iter().any(|a| a == "set"));
    }
}

#[tokio::test]
async fn dispatch_and_subscribe() {
    let (_app, stores) = installed().await;
    let counter = stores.store("counter").unwrap();
    let message = stores.store("message").unwrap();

    let counter_seen = Arc::new(Mutex::new(Vec::new()));
    let sink = Arc::clone(&counter_seen);
    counter.subscribe(move |state, applied| {
        sink.lock()
            .unwrap()
            .push((state.clone(), applied.map(str::to_owned)));
    });
    let mut messages = message.watch();

    counter.dispatch("increment", 1).unwrap();
    message.dispatch("set", "This is a test").unwrap();

    let update = messages.next().await.expect("message broadcast");
    assert_eq!(update.state, json!("This is a test"));
    assert_eq!(update.applied.as_deref(), Some("set"));
    assert_eq!(
        *counter_seen.lock().unwrap(),
        vec![(json!(1), Some("increment".to_string()))]
    );
}

#[tokio::test]
async fn unsubscribe_stops_notifications() {
    let (_app, stores) = installed().await;
    let counter = stores.store("counter").unwrap();

    let hits = Arc::new(AtomicUsize::new(0));
    let hits_clone = Arc::clone(&hits);
    let id = counter.subscribe(move |_, _| {
        hits_clone.fetch_add(1, Ordering::SeqCst);
    });

    counter.dispatch("increment", Value::Null).unwrap();
    counter.get_state().await.unwrap();
    counter.unsubscribe(Some(id));
    counter.dispatch("increment", Value::Null).unwrap();

    assert_eq!(counter.get_state_as::<i64>().await.unwrap(), 2);
    assert_eq!(hits.load(Ordering::SeqCst), 1);
}

#[tokio::test]
async fn get_store_state() {
    let (app, stores) = installed().await;
    let counter = stores.store("counter").unwrap();

    counter.dispatch("set", 123456).unwrap();

    assert_eq!(counter.get_state().await.unwrap(), json!(123456));
    assert_eq!(app.get_state_as::<i64>("counter").await.unwrap(), 123456);
}

#[tokio::test]
async fn stores_are_independent() {
    let (_app, stores) = installed().await;
    let counter = stores.store("counter").unwrap();
    let message = stores.store("message").unwrap();

    counter.dispatch("set", 7).unwrap();
    message.dispatch("set", "seven").unwrap();
    counter.dispatch("increment", Value::Null).unwrap();

    assert_eq!(counter.get_state_as::<i64>().await.unwrap(), 8);
    assert_eq!(message.get_state_as::<String>().await.unwrap(), "seven");
}

#[tokio::test]
async fn unknown_store_is_reported() {
    let (app, stores) = installed().await;

    assert!(matches!(stores.store("ghost"), Err(ClientError::UnknownStore(_))));
    assert!(matches!(
        app.get_state("ghost").await,
        Err(ClientError::Rejected(_))
    ));
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
struct Todo {
    items: Vec<String>,
    done: usize,
}

#[tokio::test]
async fn structured_state_round_trips_through_the_worker() {
    let app = Businessman::new();
    app.install(|mut worker| {
        worker.register_store(
            Store::builder("todo", Todo::default())
                .mutation("add", |state: &mut Todo, payload| {
                    state.items.push(businessman::decode(payload)?);
                    Ok(())
                })
                .mutation("complete", |state: &mut Todo, _| {
                    if state.done >= state.items.len() {
                        return Err(StoreError::Rejected("nothing left to complete".into()));
                    }
                    state.done += 1;
                    Ok(())
                })
                .action("add", |ctx, payload| ctx.commit("add", payload))
                .action("add_and_complete", |ctx, payload| {
                    ctx.dispatch("add", payload)?;
                    ctx.commit("complete", Value::Null)
                })
                .build(),
        );
        worker.start();
    })
    .unwrap();

    let todo = app.stores().await.unwrap().store("todo").unwrap().clone();
    todo.dispatch("add", "write docs").unwrap();
    todo.dispatch("add_and_complete", "ship it").unwrap();

    assert_eq!(
        todo.get_state_as::<Todo>().await.unwrap(),
        Todo {
            items: vec!["write docs".into(), "ship it".into()],
            done: 1,
        }
    );
}

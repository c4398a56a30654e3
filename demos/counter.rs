//! Runs a counter store on a worker thread and drives it from the foreground.
//!
//! Run with: `cargo run --example counter`

use businessman::{Businessman, Store, StoreError, decode_or};
use serde_json::Value;

// ---------------------------------------------------------------------------
// Worker script
// ---------------------------------------------------------------------------

/// A counter that can be incremented, decremented, or reset.
fn counter() -> Store<i64> {
    Store::builder("counter", 0i64)
        .mutation("add", |state, payload| {
            *state += decode_or(payload, 1i64)?;
            Ok(())
        })
        .mutation("reset", |state, _| {
            *state = 0;
            Ok(())
        })
        .action("increment", |ctx, payload| ctx.commit("add", payload))
        .action("decrement", |ctx, _| {
            if *ctx.state() <= 0 {
                return Err(StoreError::Rejected(
                    "counter is already zero, cannot decrement".into(),
                ));
            }
            ctx.commit("add", -1i64)
        })
        .action("reset", |ctx, _| ctx.commit("reset", Value::Null))
        .build()
}

// ---------------------------------------------------------------------------
// Main
// ---------------------------------------------------------------------------

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let app = Businessman::new();

    app.subscribe("counter", |state, applied| {
        println!("counter = {state} (via {})", applied.unwrap_or("?"));
    });
    app.subscribe(businessman::ERROR, |payload, _| {
        println!("worker error: {payload}");
    });

    app.install(|mut worker| {
        worker.register_store(counter());
        worker.start();
    })?;

    let stores = app.stores().await?;
    let counter = stores.store("counter")?;
    println!("counter actions: {:?}", counter.actions());

    counter.dispatch("increment", Value::Null)?;
    counter.dispatch("increment", 5)?;
    counter.dispatch("decrement", Value::Null)?;
    let value: i64 = counter.get_state_as().await?;
    assert_eq!(value, 5);

    counter.dispatch("reset", Value::Null)?;
    // Rejected by the worker; reported through ERROR subscribers.
    counter.dispatch("decrement", Value::Null)?;
    let value: i64 = counter.get_state_as().await?;
    assert_eq!(value, 0);

    println!("all assertions passed");
    Ok(())
}

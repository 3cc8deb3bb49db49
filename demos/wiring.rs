//! A small graph showing how units are wired, how fan-out copies messages,
//! and how a mixed sync/async shutdown is awaited.
//!
//! ```text
//!   inject ──┬──> upper ──> debug
//!            └──> audit
//! ```

use flowwire::diagnostics::forward_to_log;
use flowwire::prelude::*;
use serde_json::json;
use std::sync::Arc;
use std::time::Duration;

// ============================================================================
// Step 1: Describe the units
// ============================================================================

fn definitions() -> Vec<UnitConfig> {
    let raw = json!([
        {"id": "inject", "type": "inject", "wires": [["upper", "audit"]]},
        {"id": "upper", "type": "function", "name": "to upper case", "wires": ["debug"]},
        {"id": "audit", "type": "audit"},
        {"id": "debug", "type": "debug"}
    ]);

    raw.as_array()
        .into_iter()
        .flatten()
        .filter_map(|def| match UnitConfig::from_json(def.clone()) {
            Ok(config) => Some(config),
            Err(err) => {
                eprintln!("skipping bad definition: {}", err);
                None
            }
        })
        .collect()
}

#[tokio::main(flavor = "current_thread")]
async fn main() -> flowwire::Result<()> {
    let registry = Arc::new(UnitRegistry::new());
    for config in definitions() {
        let unit = registry.register(Unit::new(config))?;
        unit.on_log(forward_to_log);
    }
    let dispatcher = Arc::new(Dispatcher::new(registry.clone()));
    let bus = Arc::new(MemoryBus::new());

    // ========================================================================
    // Step 2: Give the units some behaviour
    // ========================================================================

    if let Some(upper) = registry.get("upper") {
        let forward = dispatcher.clone();
        let me = Arc::downgrade(&upper);
        upper.on_input(move |msg| {
            let Some(me) = me.upgrade() else { return };
            msg.modify("payload", |v| {
                *v = json!(v.as_str().unwrap_or_default().to_uppercase());
            });
            me.send(&forward, msg);
        });
        let status_bus = bus.clone();
        let me = Arc::downgrade(&upper);
        upper.on_close_async(move |reason, done| {
            let status_bus = status_bus.clone();
            let me = me.clone();
            tokio::spawn(async move {
                tokio::time::sleep(Duration::from_millis(100)).await;
                if let Some(me) = me.upgrade() {
                    me.status(status_bus.as_ref(), Arc::new(json!({"text": "stopped"})));
                    me.log(format!("shut down ({:?})", reason));
                }
                done.done();
            });
        });
    }

    if let Some(audit) = registry.get("audit") {
        // audit receives a copy: touching it does not affect the other branch
        audit.on_input(|msg| {
            msg.set("audited", true);
            println!("[audit] {}", msg.to_json());
        });
        audit.on_close(|_| println!("[audit] closed"));
    }

    if let Some(debug) = registry.get("debug") {
        debug.on_input(|msg| println!("[debug] {}", msg.to_json()));
    }

    // ========================================================================
    // Step 3: Run and shut down
    // ========================================================================

    if let Some(inject) = registry.get("inject") {
        let delivered = inject.send(&dispatcher, Message::from_json(json!({"payload": "hello"})));
        println!("inject delivered {} message(s)", delivered);
    }

    registry
        .close_all_within(CloseReason::Removed, Duration::from_secs(1))
        .await?;

    if let Some(status) = bus.retained("status/upper") {
        println!("last status of upper: {}", status);
    }
    Ok(())
}

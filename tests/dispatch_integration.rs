//! Integration tests for sending and receiving between wired units.
//!
//! Every test builds a small graph in a `UnitRegistry`, records what each unit
//! receives, and checks identity (same object vs copy) of every delivery.

use flowwire::prelude::*;
use serde_json::json;
use std::sync::{Arc, Mutex};

type Inbox = Arc<Mutex<Vec<Message>>>;

fn wire(registry: &UnitRegistry, config: UnitConfig) -> (Arc<Unit>, Inbox) {
    let unit = registry.register(Unit::new(config)).unwrap();
    let inbox: Inbox = Arc::new(Mutex::new(Vec::new()));
    let sink = inbox.clone();
    unit.on_input(move |msg| sink.lock().unwrap().push(msg));
    (unit, inbox)
}

fn payload(text: &str) -> Message {
    Message::from_json(json!({ "payload": text }))
}

#[test]
fn test_single_message_is_not_copied() {
    let registry = Arc::new(UnitRegistry::new());
    let (n1, _) = wire(&registry, UnitConfig::new("n1", "abc").with_port(["n2"]));
    let (_, n2_inbox) = wire(&registry, UnitConfig::new("n2", "abc"));
    let dispatcher = Dispatcher::new(registry.clone());

    let message = payload("x");
    n1.send(&dispatcher, message.clone());

    let inbox = n2_inbox.lock().unwrap();
    assert_eq!(inbox.len(), 1);
    assert!(inbox[0].ptr_eq(&message));

    // The recipient holds the sender's object: writes are visible both ways.
    inbox[0].set("payload", "changed");
    assert_eq!(message.get("payload"), Some(json!("changed")));
}

#[test]
fn test_multiple_messages_on_a_single_output() {
    let registry = Arc::new(UnitRegistry::new());
    let (n1, _) = wire(&registry, UnitConfig::new("n1", "abc").with_port(["n2"]));
    let (_, n2_inbox) = wire(&registry, UnitConfig::new("n2", "abc"));
    let dispatcher = Dispatcher::new(registry.clone());

    let messages = vec![payload("hello world"), payload("hello world again")];
    n1.send(&dispatcher, vec![PortOutput::Many(messages.clone())]);

    let inbox = n2_inbox.lock().unwrap();
    assert_eq!(inbox.len(), 2);
    // first msg sent, don't copy
    assert!(inbox[0].ptr_eq(&messages[0]));
    // second msg sent, copy
    assert_eq!(inbox[1], messages[1]);
    assert!(!inbox[1].ptr_eq(&messages[1]));
}

#[test]
fn test_messages_to_multiple_outputs() {
    let registry = Arc::new(UnitRegistry::new());
    let (n1, _) = wire(
        &registry,
        UnitConfig::new("n1", "abc").with_wires([vec!["n2"], vec!["n3"], vec!["n4", "n5"]]),
    );
    let inboxes: Vec<Inbox> = ["n2", "n3", "n4", "n5"]
        .iter()
        .map(|id| wire(&registry, UnitConfig::new(*id, "abc")).1)
        .collect();
    let dispatcher = Dispatcher::new(registry.clone());

    let a = payload("hello world");
    let b = payload("hello world again");
    let delivered = n1.send(&dispatcher, Output::ports(vec![Some(a.clone()), None, Some(b.clone())]));

    assert_eq!(delivered, 3);
    assert!(inboxes[0].lock().unwrap()[0].ptr_eq(&a));
    assert!(inboxes[1].lock().unwrap().is_empty());
    for inbox in &inboxes[2..] {
        let inbox = inbox.lock().unwrap();
        assert_eq!(inbox.len(), 1);
        assert_eq!(inbox[0], b);
        assert!(!inbox[0].ptr_eq(&b));
    }

    // Copies are isolated from each other and from the original.
    inboxes[2].lock().unwrap()[0].set("payload", "only n4");
    assert_eq!(inboxes[3].lock().unwrap()[0].get("payload"), Some(json!("hello world again")));
    assert_eq!(b.get("payload"), Some(json!("hello world again")));
}

#[test]
fn test_fan_out_yields_one_original_per_message_object() {
    let registry = Arc::new(UnitRegistry::new());
    let (n1, _) = wire(&registry, UnitConfig::new("n1", "abc").with_port(["a", "b", "c", "d"]));
    let inboxes: Vec<Inbox> = ["a", "b", "c", "d"]
        .iter()
        .map(|id| wire(&registry, UnitConfig::new(*id, "abc")).1)
        .collect();
    let dispatcher = Dispatcher::new(registry.clone())
        .with_policy(ClonePolicy::new().with_mode(CloneMode::PerMessage));

    let message = payload("fan");
    assert_eq!(n1.send(&dispatcher, message.clone()), 4);

    let received: Vec<Message> = inboxes.iter().map(|i| i.lock().unwrap()[0].clone()).collect();
    let originals = received.iter().filter(|m| m.ptr_eq(&message)).count();
    assert_eq!(originals, 1);
    for (i, copy) in received.iter().enumerate() {
        assert_eq!(*copy, message);
        for other in &received[i + 1..] {
            assert!(!copy.ptr_eq(other));
        }
    }
}

#[test]
fn test_no_messages() {
    let registry = Arc::new(UnitRegistry::new());
    let (n1, _) = wire(&registry, UnitConfig::new("n1", "abc").with_port(["n2"]));
    let (_, n2_inbox) = wire(&registry, UnitConfig::new("n2", "abc"));
    let dispatcher = Dispatcher::new(registry.clone());

    assert_eq!(n1.send(&dispatcher, Output::Nothing), 0);
    assert_eq!(n1.send(&dispatcher, None::<Message>), 0);
    assert_eq!(n1.send(&dispatcher, vec![PortOutput::Empty]), 0);
    assert!(n2_inbox.lock().unwrap().is_empty());
}

#[test]
fn test_non_existent_units_are_ignored() {
    let registry = Arc::new(UnitRegistry::new());
    let (n1, _) = wire(&registry, UnitConfig::new("n1", "abc").with_wires([vec!["n9"], vec!["n2"]]));
    let (_, n2_inbox) = wire(&registry, UnitConfig::new("n2", "abc"));
    let dispatcher = Dispatcher::new(registry.clone());

    let messages = vec![payload("hello world"), payload("hello world again")];
    let delivered = n1.send(&dispatcher, Output::ports(messages.clone()));

    // only one message delivered, so no copy needed
    assert_eq!(delivered, 1);
    let inbox = n2_inbox.lock().unwrap();
    assert_eq!(inbox.len(), 1);
    assert!(inbox[0].ptr_eq(&messages[1]));
}

#[test]
fn test_req_and_res_are_never_copied() {
    struct HttpRequest;
    struct HttpResponse;

    let registry = Arc::new(UnitRegistry::new());
    let (n1, _) = wire(&registry, UnitConfig::new("n1", "abc").with_wires([vec!["n2"], vec!["n3"]]));
    let (_, n2_inbox) = wire(&registry, UnitConfig::new("n2", "abc"));
    let (_, n3_inbox) = wire(&registry, UnitConfig::new("n3", "abc"));
    let dispatcher = Dispatcher::new(registry.clone());

    let req = Handle::new(HttpRequest);
    let res = Handle::new(HttpResponse);
    let message = Message::from_json(json!({"payload": "foo", "cloned": {}}))
        .with_handle("req", req.clone())
        .with_handle("res", res.clone());

    n1.send(&dispatcher, Output::ports(vec![message.clone(), message.clone()]));

    // first delivery: the original object itself
    let first = n2_inbox.lock().unwrap()[0].clone();
    assert!(first.ptr_eq(&message));

    // second delivery: a copy whose handles are still the originals
    let second = n3_inbox.lock().unwrap()[0].clone();
    assert_eq!(second, message);
    assert!(!second.ptr_eq(&message));
    assert!(second.handle("req").unwrap().ptr_eq(&req));
    assert!(second.handle("res").unwrap().ptr_eq(&res));
    assert!(second.handle("req").unwrap().downcast_ref::<HttpRequest>().is_some());

    second.modify("cloned", |v| v["copy"] = json!(true));
    assert_eq!(message.get("cloned"), Some(json!({})));
}

fn fan_out_copy(policy: ClonePolicy, message: &Message) -> Message {
    let registry = Arc::new(UnitRegistry::new());
    let (n1, _) = wire(&registry, UnitConfig::new("n1", "abc").with_port(["n2", "n3"]));
    wire(&registry, UnitConfig::new("n2", "abc"));
    let (_, n3_inbox) = wire(&registry, UnitConfig::new("n3", "abc"));
    let dispatcher = Dispatcher::new(registry.clone()).with_policy(policy);

    n1.send(&dispatcher, message.clone());
    let copy = n3_inbox.lock().unwrap()[0].clone();
    assert!(!copy.ptr_eq(message));
    copy
}

#[test]
fn test_custom_reserved_keys() {
    let socket = Handle::duplicable(7u16);
    let message = payload("x")
        .with("session", json!({"user": "barney"}))
        .with_handle("socket", socket.clone());

    // not reserved: the copy owns its own session and socket
    let copy = fan_out_copy(ClonePolicy::new(), &message);
    assert!(!copy.handle("socket").unwrap().ptr_eq(&socket));
    copy.modify("session", |v| v["user"] = json!("fred"));
    assert_eq!(message.get("session"), Some(json!({"user": "barney"})));

    // reserved: both are shared with the original
    let policy = ClonePolicy::new()
        .with_reserved_key("socket")
        .with_reserved_key("session");
    let copy = fan_out_copy(policy, &message);
    assert!(copy.handle("socket").unwrap().ptr_eq(&socket));
    copy.modify("session", |v| v["user"] = json!("fred"));
    assert_eq!(message.get("session"), Some(json!({"user": "fred"})));
}

#[test]
fn test_reserved_keys_can_be_dropped_from_the_policy() {
    let message = Message::from_json(json!({"payload": "x", "req": {"headers": {}}}));

    let shared = fan_out_copy(ClonePolicy::new(), &message);
    shared.modify("req", |v| v["headers"]["x"] = json!(1));
    assert_eq!(message.get("req"), Some(json!({"headers": {"x": 1}})));

    let copied = fan_out_copy(ClonePolicy::new().without_reserved_keys(), &message);
    copied.modify("req", |v| v["headers"]["y"] = json!(2));
    assert_eq!(message.get("req"), Some(json!({"headers": {"x": 1}})));
    assert_eq!(copied.get("req"), Some(json!({"headers": {"x": 1, "y": 2}})));
}

#[test]
fn test_chained_units_forward_messages() {
    let registry = Arc::new(UnitRegistry::new());
    let dispatcher = Arc::new(Dispatcher::new(registry.clone()));

    let (source, _) = wire(&registry, UnitConfig::new("source", "inject").with_port(["upper"]));
    let upper = registry
        .register(Unit::new(UnitConfig::new("upper", "function").with_port(["sink"])))
        .unwrap();
    let (_, sink_inbox) = wire(&registry, UnitConfig::new("sink", "debug"));

    let forward = dispatcher.clone();
    let me = Arc::downgrade(&upper);
    upper.on_input(move |msg| {
        let Some(me) = me.upgrade() else { return };
        msg.modify("payload", |v| {
            *v = json!(v.as_str().unwrap_or_default().to_uppercase());
        });
        me.send(&forward, msg);
    });

    source.send(&dispatcher, payload("shout"));

    let inbox = sink_inbox.lock().unwrap();
    assert_eq!(inbox[0].get("payload"), Some(json!("SHOUT")));
}

#[test]
fn test_diagnostics_reach_the_log_sink() {
    let unit = Unit::new(UnitConfig::new("123", "abc").with_name("barney"));
    let records = Arc::new(Mutex::new(Vec::new()));
    let sink = records.clone();
    unit.on_log(move |record| sink.lock().unwrap().push(record.clone()));
    unit.on_log(flowwire::diagnostics::forward_to_log);

    unit.log("a log message");
    unit.warn("a warning");
    unit.error("an error message");

    let records = records.lock().unwrap();
    let levels: Vec<LogLevel> = records.iter().map(|r| r.level).collect();
    assert_eq!(levels, vec![LogLevel::Log, LogLevel::Warn, LogLevel::Error]);
    assert!(records.iter().all(|r| r.id == "123" && r.unit_type == "abc"));
    assert!(records.iter().all(|r| r.name.as_deref() == Some("barney")));
}

#[test]
fn test_status_is_retained_for_late_subscribers() {
    let unit = Unit::new(UnitConfig::new("123", "abc"));
    let bus = MemoryBus::new();
    let status: Status = Arc::new(json!({"fill": "green", "shape": "dot", "text": "connected"}));

    unit.status(&bus, status.clone());

    let retained = bus.retained("status/123").expect("status is retained");
    assert!(Arc::ptr_eq(&retained, &status));
}

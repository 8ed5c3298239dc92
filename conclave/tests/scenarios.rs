//! End-to-end scenarios: nodes wired over the in-process transport,
//! stepped deterministically.

use std::sync::{Arc, Mutex};
use std::time::Duration;

use conclave::{
    json, Access, ConclaveError, InprocHub, InprocTransport, Json, Node, NodeHandler, Path,
    PeerId, Value,
};

/// Handler that records the callbacks the scenarios assert on.
#[derive(Clone, Default)]
struct Recorder {
    signals: Arc<Mutex<Vec<Json>>>,
    replies: Arc<Mutex<Vec<Json>>>,
    exits: Arc<Mutex<Vec<PeerId>>>,
}

impl NodeHandler for Recorder {
    fn on_peer_replied(&mut self, _peer: PeerId, payload: &Json) {
        self.replies.lock().unwrap().push(payload.clone());
    }

    fn on_peer_signaled(&mut self, _peer: PeerId, payload: &Json) {
        self.signals.lock().unwrap().push(payload.clone());
    }

    fn on_peer_exit(&mut self, peer: PeerId) {
        self.exits.lock().unwrap().push(peer);
    }
}

/// Step every node until the mesh goes quiet (bounded rounds; inproc
/// delivery is immediate, so a few rounds settle any message chain).
fn pump(nodes: &mut [&mut Node<InprocTransport>]) {
    for _ in 0..8 {
        for node in nodes.iter_mut() {
            node.step(Some(Duration::ZERO)).unwrap();
        }
    }
}

fn pair(hub: &InprocHub) -> (Node<InprocTransport>, Node<InprocTransport>) {
    let n1 = Node::new(hub.attach("node1")).unwrap();
    let n2 = Node::new(hub.attach("node2")).unwrap();
    (n1, n2)
}

#[test]
fn discovery() {
    let hub = InprocHub::new();
    let (mut n1, mut n2) = pair(&hub);
    pump(&mut [&mut n1, &mut n2]);

    assert!(n2.get_peers().contains(&n1.uuid()));
    assert!(n1.get_peers().contains(&n2.uuid()));
}

#[test]
fn whole_tree_get() {
    let hub = InprocHub::new();
    let (mut n1, mut n2) = pair(&hub);
    let recorder = Recorder::default();
    n2.set_handler(recorder.clone());

    n1.register_int("A", 7, Access::r());
    pump(&mut [&mut n1, &mut n2]);

    n2.peer_get_capability(n1.uuid()).unwrap();
    pump(&mut [&mut n1, &mut n2]);

    let replies = recorder.replies.lock().unwrap();
    assert!(replies
        .iter()
        .any(|r| r["A"] == json!({"value": 7, "typeHint": "int", "access": "r"})));

    let mirror = n2.peer_tree(n1.uuid()).unwrap();
    assert_eq!(
        mirror.attribute(&Path::parse("A")).unwrap().value,
        Value::Int(7)
    );
}

#[test]
fn write_denied() {
    let hub = InprocHub::new();
    let (mut n1, mut n2) = pair(&hub);
    n1.register_string("B", "x", Access::r());
    pump(&mut [&mut n1, &mut n2]);

    n2.peer_set(n1.uuid(), json!({"B": {"value": "y"}})).unwrap();
    pump(&mut [&mut n1, &mut n2]);

    assert_eq!(n1.value("B"), Some(Value::Str("x".into())));
}

#[test]
fn write_accepted_and_signaled() {
    let hub = InprocHub::new();
    let (mut n1, mut n2) = pair(&hub);
    let recorder = Recorder::default();
    n2.set_handler(recorder.clone());

    n1.register_float("C", 0.0, Access::rwe());
    pump(&mut [&mut n1, &mut n2]);

    n2.peer_subscribe(n1.uuid(), "C", "C").unwrap();
    pump(&mut [&mut n1, &mut n2]);

    // a write from n2 lands on n1
    n2.peer_set(n1.uuid(), json!({"C": {"value": 0.5}})).unwrap();
    pump(&mut [&mut n1, &mut n2]);
    assert_eq!(n1.value("C"), Some(Value::Float(0.5)));

    // that accepted write fanned a SET back to the subscriber's sink
    assert_eq!(n2.value("C"), Some(Value::Float(0.5)));

    // an explicit signal reaches the subscriber as SIG
    n1.emit_signal("C", 1.0).unwrap();
    pump(&mut [&mut n1, &mut n2]);

    let signals = recorder.signals.lock().unwrap();
    assert!(signals.iter().any(|s| *s == json!(["C", 1.0, ["C"]])));
}

#[test]
fn counter_ticks_strictly_increase() {
    let hub = InprocHub::new();
    let (mut n1, mut n2) = pair(&hub);
    let recorder = Recorder::default();
    n2.set_handler(recorder.clone());

    n1.register_bool("Counter active", true, Access::rw());
    n1.register_float("Counter", 0.0, Access::re());
    pump(&mut [&mut n1, &mut n2]);

    n2.peer_subscribe(n1.uuid(), "Counter", "Counter").unwrap();
    pump(&mut [&mut n1, &mut n2]);

    let _timer = n1.schedule_repeating(Duration::from_millis(5), |d| {
        if !matches!(
            d.value(&Path::parse("Counter active")),
            Some(Value::Bool(true))
        ) {
            return;
        }
        let next = match d.value(&Path::parse("Counter")) {
            Some(Value::Float(v)) => v + 1.0,
            _ => 0.0,
        };
        d.emit_signal(&Path::parse("Counter"), next).unwrap();
    });

    for _ in 0..4 {
        std::thread::sleep(Duration::from_millis(7));
        pump(&mut [&mut n1, &mut n2]);
    }

    let observed: Vec<f64> = recorder
        .signals
        .lock()
        .unwrap()
        .iter()
        .filter(|s| s[0] == json!("Counter"))
        .filter_map(|s| s[1].as_f64())
        .collect();
    assert!(observed.len() >= 2, "expected ticks, saw {observed:?}");
    assert!(
        observed.windows(2).all(|w| w[1] > w[0]),
        "not strictly increasing: {observed:?}"
    );

    // pausing the counter stops the ticks
    n1.set_value("Counter active", false).unwrap();
    pump(&mut [&mut n1, &mut n2]);
    let seen = recorder.signals.lock().unwrap().len();
    std::thread::sleep(Duration::from_millis(12));
    pump(&mut [&mut n1, &mut n2]);
    assert_eq!(recorder.signals.lock().unwrap().len(), seen);
}

#[test]
fn peer_exit_cleans_up() {
    let hub = InprocHub::new();
    let (mut n1, mut n2) = pair(&hub);
    let recorder = Recorder::default();
    n2.set_handler(recorder.clone());
    pump(&mut [&mut n1, &mut n2]);

    let n1_id = n1.uuid();
    assert!(n2.get_peers().contains(&n1_id));

    drop(n1);
    pump(&mut [&mut n2]);

    assert!(!n2.get_peers().contains(&n1_id));
    assert_eq!(recorder.exits.lock().unwrap().as_slice(), &[n1_id]);
    assert!(matches!(
        n2.peer_get(n1_id, None),
        Err(ConclaveError::UnknownPeer(_))
    ));
}

#[test]
fn mod_broadcast_keeps_mirrors_fresh() {
    let hub = InprocHub::new();
    let (mut n1, mut n2) = pair(&hub);
    n1.register_int("A", 1, Access::rw());
    pump(&mut [&mut n1, &mut n2]);

    n1.set_value("A", 2i64).unwrap();
    pump(&mut [&mut n1, &mut n2]);

    let mirror = n2.peer_tree(n1.uuid()).unwrap();
    assert_eq!(
        mirror.attribute(&Path::parse("A")).unwrap().value,
        Value::Int(2)
    );
}

#[test]
fn scoped_objects_travel_whole() {
    let hub = InprocHub::new();
    let (mut n1, mut n2) = pair(&hub);
    n1.object("lamp", "Light")
        .register_bool("power", false, Access::rw())
        .register_float("dim", 0.0, Access::rwe());
    n1.set_name("node1").unwrap();
    pump(&mut [&mut n1, &mut n2]);

    let mirror = n2.peer_tree(n1.uuid()).unwrap();
    assert_eq!(mirror.meta.name.as_deref(), Some("node1"));
    let lamp = mirror
        .get(&Path::parse("objects.lamp"))
        .and_then(|n| n.as_container())
        .expect("lamp object mirrored");
    assert_eq!(lamp.meta.object_type.as_deref(), Some("Light"));
    assert_eq!(
        mirror
            .attribute(&Path::parse("objects.lamp.power"))
            .unwrap()
            .value,
        Value::Bool(false)
    );
}

#[test]
fn call_round_trip_and_error_reply() {
    let hub = InprocHub::new();
    let (mut n1, mut n2) = pair(&hub);
    let calls: Arc<Mutex<Vec<Json>>> = Arc::default();
    let seen = calls.clone();
    n1.register_call_handler("play", move |_peer, args| {
        seen.lock().unwrap().push(args.clone());
    });
    pump(&mut [&mut n1, &mut n2]);

    n2.peer_call(n1.uuid(), "play", json!(["clip-1", 2.0]))
        .unwrap();
    // an unknown method draws an error reply, which must not bounce
    n2.peer_call(n1.uuid(), "stop", json!([])).unwrap();
    pump(&mut [&mut n1, &mut n2]);

    assert_eq!(calls.lock().unwrap().as_slice(), &[json!(["clip-1", 2.0])]);
}

#[test]
fn unsubscribe_stops_updates() {
    let hub = InprocHub::new();
    let (mut n1, mut n2) = pair(&hub);
    let recorder = Recorder::default();
    n2.set_handler(recorder.clone());

    n1.register_float("C", 0.0, Access::rwe());
    pump(&mut [&mut n1, &mut n2]);

    n2.peer_subscribe(n1.uuid(), "C", "C").unwrap();
    pump(&mut [&mut n1, &mut n2]);
    n1.emit_signal("C", 1.0).unwrap();
    pump(&mut [&mut n1, &mut n2]);
    assert_eq!(recorder.signals.lock().unwrap().len(), 1);

    n2.peer_unsubscribe(n1.uuid(), "C", "C").unwrap();
    pump(&mut [&mut n1, &mut n2]);
    n1.emit_signal("C", 2.0).unwrap();
    pump(&mut [&mut n1, &mut n2]);
    assert_eq!(recorder.signals.lock().unwrap().len(), 1);
}

#[test]
fn three_nodes_fan_out_independently() {
    let hub = InprocHub::new();
    let mut n1 = Node::new(hub.attach("node1")).unwrap();
    let mut n2 = Node::new(hub.attach("node2")).unwrap();
    let mut n3 = Node::new(hub.attach("node3")).unwrap();
    let r2 = Recorder::default();
    let r3 = Recorder::default();
    n2.set_handler(r2.clone());
    n3.set_handler(r3.clone());

    n1.register_float("C", 0.0, Access::rwe());
    pump(&mut [&mut n1, &mut n2, &mut n3]);

    n2.peer_subscribe(n1.uuid(), "C", "mirror2").unwrap();
    pump(&mut [&mut n1, &mut n2, &mut n3]);

    n1.emit_signal("C", 3.0).unwrap();
    pump(&mut [&mut n1, &mut n2, &mut n3]);

    assert_eq!(
        r2.signals.lock().unwrap().as_slice(),
        &[json!(["C", 3.0, ["mirror2"]])]
    );
    assert!(r3.signals.lock().unwrap().is_empty());
}

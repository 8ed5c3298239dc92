//! Merge and codec invariants exercised through the public API.

use conclave_core::path::Path;
use conclave_core::tree::{Attribute, Container, MergeMode};
use conclave_core::value::{Access, Value};
use conclave_core::wire::Request;
use serde_json::{json, Value as Json};

fn seeded() -> Container {
    let mut tree = Container::new();
    tree.insert_attribute(
        &Path::root(),
        "level",
        Attribute::new(0.0, Access::rwe()).with_min(0.0).with_max(1.0),
    );
    tree.insert_attribute(&Path::root(), "label", Attribute::new("idle", Access::r()));
    let scope = tree.ensure_object("deck", "Player");
    tree.insert_attribute(&scope, "clip", Attribute::new("", Access::rw()));
    tree
}

/// encode(decode(m)) == m for canonical wire messages.
#[test]
fn codec_round_trips_canonical_bytes() {
    let messages: &[&[u8]] = &[
        br#"{"GET":null}"#,
        br#"{"GET":["level","objects.deck"]}"#,
        br#"{"SET":{"level":{"value":0.5}}}"#,
        br#"{"CALL":["play",["clip-1"]]}"#,
        br#"{"SUB":["level","meter"]}"#,
        br#"{"UNSUB":["level","meter"]}"#,
        br#"{"REP":{"level":{"access":"rwe","typeHint":"float","value":0.0}}}"#,
        br#"{"MOD":{"_name":"deck-1"}}"#,
        br#"{"SIG":["level",0.7,["meter"]]}"#,
    ];
    for bytes in messages {
        let decoded = Request::decode(bytes).unwrap();
        assert_eq!(decoded.len(), 1);
        let reencoded = decoded[0].encode();
        let a: Json = serde_json::from_slice(bytes).unwrap();
        let b: Json = serde_json::from_slice(&reencoded).unwrap();
        assert_eq!(a, b, "round trip changed {}", String::from_utf8_lossy(bytes));
    }
}

/// Applying the same payload twice equals applying it once.
#[test]
fn merge_is_idempotent() {
    let patch = json!({
        "level": {"value": 0.75},
        "objects": {"deck": {"clip": {"value": "intro.mov"}}},
        "_name": "deck-1",
    });
    let mut once = seeded();
    once.merge(&patch, MergeMode::Mirror);
    let mut twice = seeded();
    twice.merge(&patch, MergeMode::Mirror);
    twice.merge(&patch, MergeMode::Mirror);
    assert_eq!(once, twice);
}

/// Payloads with disjoint key sets merge to the same tree in either
/// order.
#[test]
fn disjoint_merges_are_order_independent() {
    let a = json!({"added": {"value": 1, "typeHint": "int", "access": "rw"}});
    let b = json!({"objects": {"deck": {"clip": {"value": "x.mov"}}}});

    let mut ab = seeded();
    ab.merge(&a, MergeMode::Mirror);
    ab.merge(&b, MergeMode::Mirror);

    let mut ba = seeded();
    ba.merge(&b, MergeMode::Mirror);
    ba.merge(&a, MergeMode::Mirror);

    assert_eq!(ab, ba);
}

/// A SET against a path without `w` leaves the tree unchanged there.
#[test]
fn write_merge_enforces_access() {
    let mut tree = seeded();
    let before = tree.clone();
    let out = tree.merge(&json!({"label": {"value": "hacked"}}), MergeMode::Write);
    assert!(!out.applied);
    assert_eq!(tree, before);

    // a mixed patch still lands on writable siblings
    let out = tree.merge(
        &json!({
            "label": {"value": "hacked"},
            "level": {"value": 0.9},
        }),
        MergeMode::Write,
    );
    assert_eq!(out.changed, vec![Path::parse("level")]);
    assert_eq!(
        tree.attribute(&Path::parse("label")).unwrap().value,
        Value::Str("idle".into())
    );
    assert_eq!(
        tree.attribute(&Path::parse("level")).unwrap().value,
        Value::Float(0.9)
    );
}

/// Mirror merges ignore access: a mirror must faithfully track the
/// owning node, whatever the flags say.
#[test]
fn mirror_merge_ignores_access() {
    let mut tree = seeded();
    let out = tree.merge(&json!({"label": {"value": "running"}}), MergeMode::Mirror);
    assert_eq!(out.changed, vec![Path::parse("label")]);
    assert_eq!(
        tree.attribute(&Path::parse("label")).unwrap().value,
        Value::Str("running".into())
    );
}

/// Wire-shape invariant: a decoded tree equals the tree that produced
/// the JSON.
#[test]
fn tree_survives_the_wire() {
    let tree = seeded();
    let over_the_wire = Request::Rep(tree.to_json()).encode();
    let decoded = Request::decode(&over_the_wire).unwrap();
    match &decoded[0] {
        Request::Rep(payload) => assert_eq!(Container::from_json(payload), tree),
        other => panic!("expected REP, got {other:?}"),
    }
}

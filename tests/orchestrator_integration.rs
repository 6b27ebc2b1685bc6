//! Integration tests for the orchestrator, driven directly with `step`
//!
//! These tests validate:
//! - The echo round trip from `send` to an out-port subscriber
//! - One node per tick and the scheduling signals
//! - Error containment and validation
//! - Drivers, node-to-node sends and snapshots

mod common;

use common::builders::{run_log, RecordingNodeBuilder};
use common::{test_config, Collector};
use harmonic_bus::bus::{driver_fn, LogKind};
use harmonic_bus::{
    DriverNode, EchoNode, MemoryStore, Metadata, Orchestrator, PortDirection, PortOptions,
    Snapshot, TickOutcome, TypeTag, Weights,
};
use serde_json::{json, Value};

fn orchestrator() -> Orchestrator {
    Orchestrator::new(test_config(), MemoryStore::new("it")).unwrap()
}

#[test]
fn test_echo_scenario() {
    let mut orch = orchestrator();
    orch.register_node(EchoNode::new("a", "p.in", "p.out")).unwrap();
    let collector = Collector::new();
    orch.on("p.out", collector.callback());

    orch.send("p.in", json!(42), Metadata::new()).unwrap();
    let outcome = orch.step();

    assert_eq!(
        outcome,
        TickOutcome::Ran {
            node_id: "a".to_string(),
            did_work: true
        }
    );
    let stats = orch.stats("a").unwrap();
    assert_eq!(stats.processed, 1);
    assert!(stats.last_run.is_some());

    let messages = collector.messages();
    assert_eq!(messages.len(), 1);
    assert_eq!(messages[0].data()["echo"], json!(42));
    assert_eq!(messages[0].data()["node"], json!("a"));
    assert_eq!(messages[0].port(), "p.out");

    assert!(orch.step().is_idle());
}

#[test]
fn test_exactly_one_node_per_tick() {
    let runs = run_log();
    let mut orch = orchestrator();
    orch.register_plugin(RecordingNodeBuilder::new("a").build(&runs))
        .unwrap();
    orch.register_plugin(RecordingNodeBuilder::new("b").build(&runs))
        .unwrap();
    orch.send("a.in", json!(1), Metadata::new()).unwrap();
    orch.send("b.in", json!(2), Metadata::new()).unwrap();

    orch.step();
    assert_eq!(runs.lock().unwrap().len(), 1);
    orch.step();
    assert_eq!(runs.lock().unwrap().len(), 2);
    assert!(orch.step().is_idle());

    let mut ran = runs.lock().unwrap().clone();
    ran.sort();
    assert_eq!(ran, vec!["a".to_string(), "b".to_string()]);
}

#[test]
fn test_tie_goes_to_first_registered() {
    let runs = run_log();
    let mut orch = orchestrator();
    orch.register_plugin(RecordingNodeBuilder::new("first").build(&runs))
        .unwrap();
    orch.register_plugin(RecordingNodeBuilder::new("second").build(&runs))
        .unwrap();
    orch.send("second.in", json!(1), Metadata::new()).unwrap();
    orch.send("first.in", json!(1), Metadata::new()).unwrap();

    assert_eq!(orch.step().node_id(), Some("first"));
}

#[test]
fn test_resonance_steers_selection() {
    let runs = run_log();
    let mut orch = orchestrator();
    orch.register_plugin(RecordingNodeBuilder::new("plain").build(&runs))
        .unwrap();
    orch.register_plugin(
        RecordingNodeBuilder::new("linguist")
            .tags(&["lang", "text"])
            .build(&runs),
    )
    .unwrap();
    orch.set_intent_tags(["lang"]);
    orch.send("plain.in", json!(1), Metadata::new()).unwrap();
    orch.send("linguist.in", json!(1), Metadata::new()).unwrap();

    assert_eq!(orch.step().node_id(), Some("linguist"));
    assert!(orch.log().iter().any(|e| e.kind == LogKind::Intent));
}

#[test]
fn test_demand_steers_selection() {
    let runs = run_log();
    let mut orch = orchestrator();
    orch.register_plugin(RecordingNodeBuilder::new("light").build(&runs))
        .unwrap();
    orch.register_plugin(RecordingNodeBuilder::new("busy").build(&runs))
        .unwrap();
    orch.send("light.in", json!(1), Metadata::new()).unwrap();
    for i in 0..5 {
        orch.send("busy.in", json!(i), Metadata::new()).unwrap();
    }

    assert_eq!(orch.step().node_id(), Some("busy"));
}

#[test]
fn test_priority_only_weights() {
    let runs = run_log();
    let mut orch = orchestrator();
    orch.register_plugin(RecordingNodeBuilder::new("low").priority(0.5).build(&runs))
        .unwrap();
    orch.register_plugin(RecordingNodeBuilder::new("high").priority(5.0).build(&runs))
        .unwrap();
    orch.set_weights(Weights {
        demand: 0.0,
        freshness: 0.0,
        priority: 1.0,
        resonance: 0.0,
    });
    for _ in 0..3 {
        orch.send("low.in", json!(1), Metadata::new()).unwrap();
        orch.send("high.in", json!(1), Metadata::new()).unwrap();
    }

    for _ in 0..3 {
        assert_eq!(orch.step().node_id(), Some("high"));
    }
    assert_eq!(orch.step().node_id(), Some("low"));
}

#[test]
fn test_failing_node_is_contained() {
    let runs = run_log();
    let mut orch = orchestrator();
    orch.register_plugin(RecordingNodeBuilder::new("broken").failing().build(&runs))
        .unwrap();
    orch.register_node(EchoNode::new("echo", "e.in", "e.out")).unwrap();
    let collector = Collector::new();
    orch.on("e.out", collector.callback());

    orch.send("broken.in", json!("x"), Metadata::new()).unwrap();
    let outcome = orch.step();
    assert!(matches!(&outcome, TickOutcome::Failed { node_id, error }
        if node_id == "broken" && error.contains("always fails")));

    let stats = orch.stats("broken").unwrap();
    assert_eq!(stats.errors, 1);
    assert_eq!(stats.processed, 0);
    assert!(stats.last_run.is_some());

    orch.send("e.in", json!("y"), Metadata::new()).unwrap();
    orch.run_until_idle(4);
    assert_eq!(collector.len(), 1);
    assert!(orch
        .log()
        .iter()
        .any(|e| e.kind == LogKind::TickError && e.subject == "broken"));
}

#[test]
fn test_failing_node_counts_every_cycle() {
    const CYCLES: u64 = 5;
    let runs = run_log();
    let mut orch = orchestrator();
    orch.register_plugin(RecordingNodeBuilder::new("broken").failing().build(&runs))
        .unwrap();
    orch.register_plugin(RecordingNodeBuilder::new("healthy").build(&runs))
        .unwrap();
    // The failing node never consumes its input, so it stays ready throughout.
    orch.send("broken.in", json!("x"), Metadata::new()).unwrap();
    for i in 0..3 {
        orch.send("healthy.in", json!(i), Metadata::new()).unwrap();
    }

    let mut failed = 0;
    for _ in 0..100 {
        match orch.step() {
            TickOutcome::Failed { node_id, .. } => {
                assert_eq!(node_id, "broken");
                failed += 1;
            }
            TickOutcome::Ran { node_id, .. } => assert_eq!(node_id, "healthy"),
            TickOutcome::Idle => unreachable!("the failing node is always ready"),
        }
        if failed >= CYCLES && orch.port("healthy.in").unwrap().is_empty() {
            break;
        }
    }

    let broken = orch.stats("broken").unwrap();
    assert!(failed >= CYCLES);
    assert_eq!(broken.errors, failed);
    assert_eq!(broken.processed, 0);
    assert_eq!(orch.stats("healthy").unwrap().processed, 3);
    assert_eq!(
        orch.log().iter().filter(|e| e.kind == LogKind::TickError).count() as u64,
        failed
    );
}

#[test]
fn test_validation_rejects_without_side_effects() {
    let mut orch = orchestrator();
    let port = orch.declare_port("text.in", PortDirection::In, PortOptions::new(TypeTag::Text));
    let log_len = orch.log().len();

    let err = orch.send("text.in", json!(42), Metadata::new()).unwrap_err();
    assert!(err.is_validation());
    assert_eq!(port.len(), 0);
    assert_eq!(orch.log().len(), log_len);

    orch.send("text.in", json!("fine"), Metadata::new()).unwrap();
    assert_eq!(port.len(), 1);
}

#[test]
fn test_driver_node_round_trip() {
    let mut orch = orchestrator();
    orch.register_driver(
        "upper",
        driver_fn(|req: Value| async move {
            Ok(json!(req.as_str().unwrap_or_default().to_uppercase()))
        }),
    );
    orch.register_node(DriverNode::new("shout", "upper", "shout.req", "shout.resp"))
        .unwrap();
    let collector = Collector::new();
    orch.on("shout.resp", collector.callback());

    orch.send("shout.req", json!("hello"), Metadata::new()).unwrap();
    orch.step();

    let messages = collector.messages();
    assert_eq!(messages[0].data(), &json!("HELLO"));

    assert!(orch.remove_driver("upper"));
    orch.send("shout.req", json!("again"), Metadata::new()).unwrap();
    orch.step();
    let messages = collector.messages();
    assert_eq!(messages[1].data()["error"], json!("no driver"));
    assert_eq!(orch.stats("shout").unwrap().errors, 0);
}

#[test]
fn test_node_can_send_to_other_ports() {
    let runs = run_log();
    let mut orch = orchestrator();
    orch.register_plugin(
        RecordingNodeBuilder::new("relay")
            .forward_to("echo.in")
            .build(&runs),
    )
    .unwrap();
    orch.register_node(EchoNode::new("echo", "echo.in", "echo.out"))
        .unwrap();
    let collector = Collector::new();
    orch.on("echo.out", collector.callback());

    orch.send("relay.in", json!({"hop": 1}), Metadata::new())
        .unwrap();
    assert_eq!(orch.run_until_idle(10), 2);

    let messages = collector.messages();
    assert_eq!(messages.len(), 1);
    assert_eq!(messages[0].data()["echo"], json!({"hop": 1}));
    assert!(orch
        .log()
        .iter()
        .any(|e| e.kind == LogKind::Send && e.payload["from"] == json!("relay")));
}

#[test]
fn test_remove_node_keeps_ports() {
    let mut orch = orchestrator();
    orch.register_node(EchoNode::new("a", "p.in", "p.out")).unwrap();
    orch.send("p.in", json!(1), Metadata::new()).unwrap();

    assert!(orch.remove_node("a"));
    assert!(!orch.remove_node("a"));
    assert!(orch.step().is_idle());
    assert_eq!(orch.port("p.in").unwrap().len(), 1);
    assert!(orch.node_ids().is_empty());
}

#[test]
fn test_snapshot_and_export() {
    let mut orch = orchestrator();
    orch.register_node(EchoNode::new("a", "p.in", "p.out").with_tags(["demo"]))
        .unwrap();
    orch.send("p.in", json!(1), Metadata::new()).unwrap();
    orch.send("p.in", json!(2), Metadata::new()).unwrap();
    orch.step();

    let snap = orch.snapshot();
    assert_eq!(snap.meta.name, "test-bus");
    let node = snap.node("a").unwrap();
    assert_eq!(node.stats.processed, 1);
    assert!(node.tags.contains("demo"));
    assert_eq!(snap.port("p.in").unwrap().queue_length, 1);
    assert_eq!(snap.port("p.out").unwrap().direction, PortDirection::Out);
    assert!(snap.log.iter().any(|e| e.kind == LogKind::Register));

    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("snapshot.json");
    orch.export_snapshot(&path).unwrap();
    let loaded = Snapshot::load(&path).unwrap();
    assert_eq!(loaded.nodes, snap.nodes);
    assert_eq!(loaded.ports, snap.ports);
}

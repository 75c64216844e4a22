//! Propagation scenarios on the furnace switchboard.

use sldsim_common::persist::{KeyValueStore, MemoryStore};
use sldsim_common::{ChangeCause, ContactorRef, NodeId, NodeKind, RejectReason, SwitchId, SwitchRef};
use sldsim_runner::{
    furnace_model, mount_model, Command, JsonFileStore, Presentation, Switchboard,
};
use rand::{Rng, SeedableRng};
use rand_chacha::ChaCha8Rng;
use tempfile::TempDir;

// ============================================================================
// Test Helper Functions
// ============================================================================

fn furnace<S: KeyValueStore + 'static>(store: S) -> Switchboard {
    mount_model(&furnace_model().unwrap(), store).unwrap()
}

fn sw(text: &str) -> SwitchRef {
    text.parse().unwrap()
}

fn toggle(board: &mut Switchboard, target: &str) -> sldsim_runner::CommandOutcome {
    board.toggle(&sw(target), Presentation::Compact).unwrap()
}

fn closed(board: &Switchboard, target: &str) -> bool {
    board.is_closed(&sw(target)).unwrap()
}

/// Close every switch on the diagram, upstream first.
fn energize_everything(board: &mut Switchboard) {
    board.set_supply(true);
    for node in board.views() {
        for switch in &node.switches {
            let target = SwitchRef::new(node.node.clone(), switch.id);
            assert!(
                board.toggle(&target, Presentation::Compact).unwrap().applied,
                "{} rejected",
                target
            );
        }
    }
}

/// Every board with an open top switch has every feeder open.
fn assert_top_gates_feeders(board: &Switchboard) {
    for view in board.views() {
        if view.kind != NodeKind::FeederBoard {
            continue;
        }
        if !view.switches[0].closed {
            assert!(
                view.switches.iter().all(|s| !s.closed),
                "{} has a closed feeder under an open top switch",
                view.node
            );
        }
    }
}

// ============================================================================
// Properties
// ============================================================================

#[test]
fn test_top_switch_gates_feeders_under_random_operation() {
    let mut board = furnace(MemoryStore::new());
    let targets: Vec<SwitchRef> = board
        .views()
        .into_iter()
        .flat_map(|v| {
            let node = v.node;
            v.switches
                .into_iter()
                .map(move |s| SwitchRef::new(node.clone(), s.id))
        })
        .collect();

    let mut rng = ChaCha8Rng::seed_from_u64(0x5eed);
    for step in 0..2000 {
        if step % 97 == 0 {
            board.toggle_supply();
        } else {
            let target = &targets[rng.gen_range(0..targets.len())];
            board.toggle(target, Presentation::Compact).unwrap();
        }
        assert_top_gates_feeders(&board);
    }
    assert!(board.stats().commands >= 2000);
}

#[test]
fn test_contactor_drop_opens_board_in_every_presentation() {
    let mut board = furnace(MemoryStore::new());
    board.set_supply(true);
    for target in [
        "IGBT-Conv1.left",
        "IGBT-Conv1.right",
        "FourIGBT-1.isolator",
        "FourIGBT-1.output2",
        "IA-RTDB-3.top",
    ] {
        assert!(toggle(&mut board, target).applied, "{} rejected", target);
    }

    let rtdb3 = NodeId::new("IA-RTDB-3");
    board.set_zoom_mode(true);
    board.click(&rtdb3).unwrap();
    for n in [1, 5] {
        let target = SwitchRef::new(rtdb3.clone(), SwitchId::Feeder(n));
        assert!(board.toggle(&target, Presentation::Expanded).unwrap().applied);
    }
    let expanded = board.view(&rtdb3).unwrap();
    assert_eq!(expanded.presentation, Presentation::Expanded);
    assert_eq!(expanded.circuit_active, Some(true));

    board.close_focus();
    let outcome = toggle(&mut board, "FourIGBT-1.output2");
    assert!(outcome.applied);
    let cascaded: Vec<String> = outcome
        .changes
        .iter()
        .filter(|c| c.cause == ChangeCause::Cascade)
        .map(|c| c.switch.to_string())
        .collect();
    assert_eq!(
        cascaded,
        vec!["IA-RTDB-3.topSwitch", "IA-RTDB-3.switch1", "IA-RTDB-3.switch5"]
    );

    // Compact and expanded are projections of the same state.
    board.click(&rtdb3).unwrap();
    let expanded = board.view(&rtdb3).unwrap();
    assert!(expanded.switches.iter().all(|s| !s.closed));
    assert!(!expanded.feed_live);
    assert_eq!(expanded.circuit_active, Some(false));
}

#[test]
fn test_supply_off_opens_everything() {
    let mut board = furnace(MemoryStore::new());
    energize_everything(&mut board);
    assert!(board.snapshot().switches.values().all(|closed| *closed));
    assert!(board.any_pair_closed());

    let outcome = board.set_supply(false);
    assert!(outcome.applied);
    let snapshot = board.snapshot();
    assert!(snapshot.switches.values().all(|closed| !*closed));
    assert!(snapshot.contactors.iter().all(|c| !c.closed));
    assert!(snapshot.energized.is_empty());
    assert!(!board.any_pair_closed());
    assert_eq!(outcome.changes.len(), snapshot.switches.len());
}

#[test]
fn test_supply_off_opens_contactors_behind_open_isolator() {
    let store: MemoryStore = [
        ("inputCurrentOn", "true"),
        ("FourIGBT1.isCircuitOn", "false"),
        ("FourIGBT1.outputSwitches", "[true,false,false,false]"),
    ]
    .into_iter()
    .collect();
    let mut board = furnace(store);
    let output0 = ContactorRef::new("FourIGBT-1", 0);
    assert!(board.contactor(&output0));
    assert!(!closed(&board, "FourIGBT-1.isolator"));

    let outcome = board.set_supply(false);
    let target = sw("FourIGBT-1.output0");
    let dropped: Vec<_> = outcome.changes_of(&target).collect();
    assert_eq!(dropped.len(), 1);
    assert!(!dropped[0].closed);
    assert_eq!(dropped[0].cause, ChangeCause::Cascade);

    assert!(!board.contactor(&output0));
    let snapshot = board.snapshot();
    assert!(snapshot.switches.values().all(|closed| !*closed));
    assert!(snapshot.contactors.iter().all(|c| !c.closed));
    assert_eq!(
        board.store().get("FourIGBT1.outputSwitches").unwrap().as_deref(),
        Some("[false,false,false,false]")
    );
}

#[test]
fn test_forcing_open_twice_reports_nothing() {
    let mut board = furnace(MemoryStore::new());
    energize_everything(&mut board);
    board.set_supply(false);
    let journal_len = board.journal().len();

    let outcome = board.set_supply(false);
    assert!(!outcome.applied);
    assert!(outcome.changes.is_empty());
    assert_eq!(board.journal().len(), journal_len);

    // Bringing the supply back closes nothing by itself.
    let outcome = board.set_supply(true);
    assert!(outcome.changes.is_empty());
}

#[test]
fn test_isolator_open_reports_each_output_once() {
    let mut board = furnace(MemoryStore::new());
    energize_everything(&mut board);
    let outcome = toggle(&mut board, "FourIGBT-2.isolator");
    for output in 0..4 {
        let target = SwitchRef::new("FourIGBT-2", SwitchId::Output(output));
        assert_eq!(outcome.changes_of(&target).count(), 1, "{}", target);
    }

    // Each output fed one board; each board dropped once.
    for board_name in ["IA-RTDB-5", "IA-RTDB-6", "IA-RTDB-7", "IA-RTDB-8"] {
        let top = SwitchRef::new(board_name, SwitchId::Top);
        assert_eq!(outcome.changes_of(&top).count(), 1, "{}", top);
    }
    // Unrelated branches keep their state.
    assert!(closed(&board, "IB-RTDB-1.top"));
}

#[test]
fn test_contactor_index_space_is_partitioned() {
    let mut board = furnace(MemoryStore::new());
    let entries = board.bus().entries();
    let four_output: Vec<usize> = entries
        .iter()
        .filter(|e| e.contactor.group.as_str().starts_with("FourIGBT"))
        .map(|e| e.index)
        .collect();
    assert_eq!(four_output, (0..16).collect::<Vec<_>>());
    assert_eq!(entries.len(), 18);

    energize_everything(&mut board);
    toggle(&mut board, "FourIGBT-2.output0");
    assert_eq!(
        board.contactor_by_index(4),
        Some((ContactorRef::new("FourIGBT-2", 0), false))
    );
    assert_eq!(
        board.contactor_by_index(5),
        Some((ContactorRef::new("FourIGBT-2", 1), true))
    );
    assert!(!board.contactor(&ContactorRef::new("FourIGBT-2", 0)));
    assert!(board.contactor_by_index(18).is_none());
}

#[test]
fn test_focus_is_exclusive() {
    let mut board = furnace(MemoryStore::new());
    let first = NodeId::new("IA-RTDB-1");
    let second = NodeId::new("TwoIGBT");

    board.focus(&first).unwrap();
    let outcome = board.focus(&second).unwrap();
    assert_eq!(outcome.zoom.len(), 2);
    assert!(!outcome.zoom[0].zoomed && outcome.zoom[0].node == first);
    assert!(outcome.zoom[1].zoomed && outcome.zoom[1].node == second);

    let views = board.views();
    let expanded: Vec<&NodeId> = views
        .iter()
        .filter(|v| v.presentation == Presentation::Expanded)
        .map(|v| &v.node)
        .collect();
    assert_eq!(expanded, vec![&second]);
    assert!(views.iter().filter(|v| v.node != second).all(|v| v.blurred));
    assert_eq!(
        board.store().get("zoomedCircuit").unwrap().as_deref(),
        Some("TwoIGBT")
    );

    let closed = board.close_focus();
    assert_eq!(closed.zoom.len(), 1);
    assert!(board.views().iter().all(|v| !v.blurred));
    assert_eq!(board.store().get("zoomedCircuit").unwrap(), None);
}

// ============================================================================
// Scenarios
// ============================================================================

#[test]
fn test_toggle_without_supply_is_ignored() {
    let mut board = furnace(MemoryStore::new());
    let outcome = toggle(&mut board, "IA-RTDB-1.top");
    assert!(!outcome.applied);
    assert_eq!(outcome.rejected, Some(RejectReason::SupplyOff));
    assert!(outcome.changes.is_empty());
    assert!(!closed(&board, "IA-RTDB-1.top"));
    assert!(board.journal().is_empty());
    assert_eq!(board.stats().rejected, 1);
}

#[test]
fn test_pair_conjunction_enables_isolator() {
    let mut board = furnace(MemoryStore::new());
    board.set_supply(true);
    let conv2 = NodeId::new("IGBT-Conv2");

    let outcome = toggle(&mut board, "IGBT-Conv2.left");
    assert_eq!(outcome.pair_report(&conv2), Some((true, false)));
    let outcome = toggle(&mut board, "IGBT-Conv2.right");
    assert_eq!(outcome.pair_report(&conv2), Some((true, true)));
    assert!(board.pair_conjunction(&conv2));

    let outcome = toggle(&mut board, "TwoIGBT.isolator");
    assert!(outcome.applied);
    assert!(closed(&board, "TwoIGBT.isolator"));
}

#[test]
fn test_isolator_off_reports_output_exactly_once() {
    let mut board = furnace(MemoryStore::new());
    board.set_supply(true);
    for target in [
        "IGBT-Conv1.left",
        "IGBT-Conv1.right",
        "FourIGBT-1.isolator",
        "FourIGBT-1.output1",
    ] {
        toggle(&mut board, target);
    }

    let outcome = toggle(&mut board, "FourIGBT-1.isolator");
    let output1 = sw("FourIGBT-1.output1");
    let reported: Vec<_> = outcome.changes_of(&output1).collect();
    assert_eq!(reported.len(), 1);
    assert!(!reported[0].closed);
    assert_eq!(reported[0].cause, ChangeCause::Cascade);
    // The other outputs were already open.
    assert_eq!(outcome.changes.len(), 2);
}

#[test]
fn test_top_off_clears_closed_feeders() {
    let mut board = furnace(MemoryStore::new());
    board.set_supply(true);
    for target in [
        "IGBT-Conv1.left",
        "IGBT-Conv1.right",
        "FourIGBT-3.isolator",
        "FourIGBT-3.output0",
        "IB-RTDB-1.top",
        "IB-RTDB-1.switch1",
        "IB-RTDB-1.switch2",
        "IB-RTDB-1.switch13",
    ] {
        assert!(toggle(&mut board, target).applied, "{} rejected", target);
    }

    let outcome = toggle(&mut board, "IB-RTDB-1.top");
    let reported: Vec<(String, bool)> = outcome
        .changes
        .iter()
        .map(|c| (c.switch.to_string(), c.closed))
        .collect();
    assert_eq!(
        reported,
        vec![
            ("IB-RTDB-1.topSwitch".to_string(), false),
            ("IB-RTDB-1.switch1".to_string(), false),
            ("IB-RTDB-1.switch2".to_string(), false),
            ("IB-RTDB-1.switch13".to_string(), false),
        ]
    );
    let view = board.view(&NodeId::new("IB-RTDB-1")).unwrap();
    assert_eq!(view.switches.len(), 14);
    assert!(view.switches.iter().all(|s| !s.closed));
}

#[test]
fn test_restore_is_authoritative() {
    let store: MemoryStore = [
        ("IA-RTDB-4-topSwitchClosed", "true"),
        ("IA-RTDB-4-switch3Closed", "true"),
    ]
    .into_iter()
    .collect();
    let mut board = furnace(store);

    let view = board.view(&NodeId::new("IA-RTDB-4")).unwrap();
    let closed_now: Vec<SwitchId> = view
        .switches
        .iter()
        .filter(|s| s.closed)
        .map(|s| s.id)
        .collect();
    assert_eq!(closed_now, vec![SwitchId::Top, SwitchId::Feeder(3)]);
    assert!(board
        .restore_report()
        .changes
        .iter()
        .all(|c| c.cause == ChangeCause::Restore));

    // Later commands that never drop this board's feed leave it alone.
    board.set_zoom_mode(true);
    board.set_supply(true);
    assert!(closed(&board, "IA-RTDB-4.top"));
    assert!(closed(&board, "IA-RTDB-4.switch3"));
    assert_eq!(board.stats().cascade_opens, 0);
}

#[test]
fn test_restored_contactors_feed_boards() {
    let store: MemoryStore = [
        ("inputCurrentOn", "true"),
        ("IGBTConv1.leftMCCBOn", "true"),
        ("IGBTConv1.rightMCCBOn", "true"),
        ("FourIGBT1.isCircuitOn", "true"),
        ("FourIGBT1.outputSwitches", "[false, 1, 0, null]"),
        ("IA-RTDB-1-topSwitchClosed", "true"),
        ("zoomModeEnabled", "garbage"),
    ]
    .into_iter()
    .collect();
    let mut board = furnace(store);

    assert!(board.supply_on());
    assert!(!board.zoom_mode());
    assert!(board.contactor(&ContactorRef::new("FourIGBT-1", 1)));
    let restored = board.restore_report();
    assert_eq!(
        restored
            .changes
            .iter()
            .filter(|c| c.switch.node.as_str() == "FourIGBT-1")
            .count(),
        4
    );
    assert_eq!(
        restored.pair_report(&NodeId::new("IGBT-Conv1")),
        Some((true, true))
    );

    let view = board.view(&NodeId::new("IA-RTDB-1")).unwrap();
    assert!(view.feed_live);
    assert!(view.switches[0].live);

    // Dropping the restored contactor cascades like any other.
    let outcome = toggle(&mut board, "FourIGBT-1.output1");
    assert!(outcome
        .changes_of(&sw("IA-RTDB-1.topSwitch"))
        .any(|c| !c.closed && c.cause == ChangeCause::Cascade));
    assert_eq!(
        board.store().get("FourIGBT1.outputSwitches").unwrap().as_deref(),
        Some("[false,false,false,false]")
    );
}

#[test]
fn test_state_survives_remount() {
    let dir = TempDir::new().unwrap();
    let path = dir.path().join("state.json");

    let before = {
        let mut board = furnace(JsonFileStore::open(&path).unwrap());
        for command in [
            "supply on",
            "toggle IGBT-Conv2.left",
            "toggle IGBT-Conv2.right",
            "toggle FourIGBT-4.isolator",
            "toggle FourIGBT-4.output2",
            "toggle IB-RTDB-7.top",
            "toggle IB-RTDB-7.switch17",
            "zoom-mode on",
            "click IB-RTDB-7",
        ] {
            let command: Command = command.parse().unwrap();
            board.apply(&command).unwrap();
        }
        serde_json::to_value(board.snapshot()).unwrap()
    };

    let board = furnace(JsonFileStore::open(&path).unwrap());
    assert_eq!(serde_json::to_value(board.snapshot()).unwrap(), before);
    let zoom = &board.restore_report().zoom;
    assert_eq!(zoom.len(), 1);
    assert!(zoom[0].zoomed);
    assert_eq!(zoom[0].node.as_str(), "IB-RTDB-7");
    assert!(closed(&board, "IB-RTDB-7.switch17"));
}

//! # sldsim-runner library
//!
//! The switchboard aggregator: owns the master supply, the cross-branch
//! derived gates, zoom focus and persistence, and drives the settle loop that
//! lets every node re-evaluate its reactive rules after a command.
//!
//! ## Settling
//!
//! A command runs to completion before the next one is accepted:
//!
//! 1. The addressed node handles the toggle and queues notifications.
//! 2. The aggregator drains them into its mirrors (pair conjunctions,
//!    contactor bus) and the journal.
//! 3. Every node observes its freshly derived gates, upstream first, and the
//!    queue is drained after each node, so a cascade reaches the bottom of the
//!    diagram in one pass.
//! 4. Passes repeat until a pass produces no notification.
//! 5. Changed keys are written to the store.

pub mod bus;
pub mod command;
pub mod focus;
pub mod store;

pub use bus::{ContactorBus, ContactorEntry};
pub use command::{parse_script, Command, CommandOutcome, PairReport, SupplyAction};
pub use focus::{FocusTracker, Presentation, ZoomChange};
pub use store::{JsonFileStore, StateWriter};

use serde::Serialize;
use sldsim_common::persist::{
    KeyValueStore, PersistBatch, StateSnapshot, StoreError, FOCUS_KEY, GLOBAL_KEYS, SUPPLY_KEY,
    ZOOM_MODE_KEY,
};
use sldsim_common::{
    unknown_switch, ChangeCause, ContactorRef, GateInputs, NodeId, NodeKind, NodeRegistry,
    Notification, PropagationContext, RejectReason, SimError, SwitchChange, SwitchId, SwitchRef,
    ToggleOutcome,
};
use sldsim_model::{BuiltSwitchboard, Feed, NodeInfo};
use std::collections::BTreeMap;
use thiserror::Error;
use tracing::{debug, info, warn};

/// Settle passes after which the loop gives up.
const MAX_SETTLE_PASSES: u32 = 16;

// ============================================================================
// Error Types
// ============================================================================

/// Errors that can occur while operating the switchboard.
#[derive(Debug, Error)]
pub enum RunnerError {
    /// Model error.
    #[error("Model error: {0}")]
    Model(#[from] sldsim_model::ModelError),

    /// Addressing error.
    #[error("Switchboard error: {0}")]
    Switchboard(#[from] SimError),

    /// Storage error.
    #[error("Storage error: {0}")]
    Store(#[from] StoreError),

    /// Malformed command text.
    #[error("Invalid command: {0}")]
    InvalidCommand(String),

    /// IO error.
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// JSON serialization error.
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
}

// ============================================================================
// Journal and Statistics
// ============================================================================

/// One switch change absorbed by the aggregator.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct JournalEntry {
    /// Sequence number, starting at 0 at mount.
    pub seq: u64,
    /// Switch that changed.
    pub switch: SwitchRef,
    /// New position.
    pub closed: bool,
    /// What caused the change.
    pub cause: ChangeCause,
}

/// Statistics collected while operating the switchboard.
#[derive(Debug, Clone, Default, Serialize)]
pub struct SwitchboardStats {
    /// Commands applied or rejected.
    pub commands: u64,
    /// Commands ignored because a precondition failed.
    pub rejected: u64,
    /// Notifications absorbed, including restores.
    pub notifications: u64,
    /// Switches forced open by a cascade.
    pub cascade_opens: u64,
    /// Settle passes run.
    pub settle_passes: u64,
    /// Keys written to the store.
    pub keys_written: u64,
}

// ============================================================================
// Views
// ============================================================================

/// One switch as a presentation draws it.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct SwitchView {
    /// Switch identifier.
    pub id: SwitchId,
    /// Position.
    pub closed: bool,
    /// Carries simulated current.
    pub live: bool,
    /// Can be operated from this presentation right now.
    pub operable: bool,
}

/// One node as it is currently presented.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct NodeView {
    /// Node name.
    pub node: NodeId,
    /// Node kind.
    pub kind: NodeKind,
    /// Presentation the node is shown in.
    pub presentation: Presentation,
    /// Another node holds the focus.
    pub blurred: bool,
    /// The node accepts clicks or toggles.
    pub interactive: bool,
    /// Supply and feed are both live.
    pub feed_live: bool,
    /// Feeder boards: top switch closed and at least one feeder closed.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub circuit_active: Option<bool>,
    /// Switches in display order.
    pub switches: Vec<SwitchView>,
}

/// Conjunction of one MCCB pair as mirrored by the aggregator.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize)]
pub struct PairState {
    /// Left breaker closed.
    pub left: bool,
    /// Right breaker closed.
    pub right: bool,
}

impl PairState {
    /// Both breakers closed.
    pub fn both(&self) -> bool {
        self.left && self.right
    }
}

/// Serializable picture of the whole switchboard.
#[derive(Debug, Clone, Serialize)]
pub struct SwitchboardSnapshot {
    /// Master supply on.
    pub supply_on: bool,
    /// Zoom mode on.
    pub zoom_mode: bool,
    /// Focused node.
    pub focus: Option<NodeId>,
    /// Pair mirrors.
    pub pairs: BTreeMap<NodeId, PairState>,
    /// Contactor bus in flat index order.
    pub contactors: Vec<ContactorEntry>,
    /// Every switch position, keyed by `NODE.SWITCH`.
    pub switches: BTreeMap<String, bool>,
    /// Switches carrying simulated current.
    pub energized: Vec<SwitchRef>,
}

// ============================================================================
// Switchboard
// ============================================================================

/// The circuit state aggregator.
pub struct Switchboard {
    supply_on: bool,
    nodes: NodeRegistry,
    feeds: BTreeMap<NodeId, Feed>,
    node_infos: Vec<NodeInfo>,
    pairs: BTreeMap<NodeId, PairState>,
    bus: ContactorBus,
    focus: FocusTracker,
    context: PropagationContext,
    store: Box<dyn KeyValueStore>,
    writer: StateWriter,
    journal: Vec<JournalEntry>,
    stats: SwitchboardStats,
    /// Outcome being assembled for the command in progress.
    current: CommandOutcome,
    restored: CommandOutcome,
}

impl Switchboard {
    /// Mount a built switchboard on `store`.
    ///
    /// Reads every declared key once, hydrates nodes upstream first, absorbs
    /// their restore notifications and re-applies a persisted focus. No
    /// reactive rule runs during mount.
    pub fn mount<S: KeyValueStore + 'static>(built: BuiltSwitchboard, store: S) -> Self {
        let BuiltSwitchboard {
            nodes,
            feeds,
            contactor_groups,
            node_infos,
        } = built;

        let mut keys: Vec<String> = GLOBAL_KEYS.iter().map(|k| k.to_string()).collect();
        for node in nodes.iter() {
            keys.extend(node.storage_keys());
        }
        let snapshot = StateSnapshot::read(&store, keys.iter().map(String::as_str));

        let mut focus = FocusTracker::new();
        focus.set_zoom_mode(snapshot.get_bool(ZOOM_MODE_KEY).unwrap_or(false));

        let mut board = Switchboard {
            supply_on: snapshot.get_bool(SUPPLY_KEY).unwrap_or(false),
            pairs: nodes
                .iter()
                .filter(|n| n.kind() == NodeKind::MccbPair)
                .map(|n| (n.node_id().clone(), PairState::default()))
                .collect(),
            bus: ContactorBus::new(&contactor_groups),
            nodes,
            feeds,
            node_infos,
            focus,
            context: PropagationContext::new(),
            store: Box::new(store),
            writer: StateWriter::from_snapshot(&snapshot, keys.iter().map(String::as_str)),
            journal: Vec::new(),
            stats: SwitchboardStats::default(),
            current: CommandOutcome::new("mount"),
            restored: CommandOutcome::default(),
        };

        for position in 0..board.nodes.len() {
            let Some(id) = board.nodes.at(position).map(|n| n.node_id().clone()) else {
                continue;
            };
            let gates = board.gates_for(&id);
            if let Some(node) = board.nodes.at_mut(position) {
                node.hydrate(&snapshot, &gates, &mut board.context);
            }
            board.absorb();
        }

        if let Some(name) = snapshot.get_str(FOCUS_KEY) {
            let node = NodeId::new(name);
            if board.nodes.get(&node).is_some() {
                let changes = board.focus.set_focus(node);
                board.current.zoom.extend(changes);
            } else {
                warn!(node = %name, "ignoring persisted focus on unknown node");
            }
        }

        board.flush();
        board.restored = std::mem::take(&mut board.current);
        info!(
            nodes = board.nodes.len(),
            restored_keys = snapshot.len(),
            supply_on = board.supply_on,
            "switchboard mounted"
        );
        board
    }

    // ------------------------------------------------------------------------
    // Commands
    // ------------------------------------------------------------------------

    /// Run one command to completion.
    pub fn apply(&mut self, command: &Command) -> Result<CommandOutcome, RunnerError> {
        match command {
            Command::Supply(SupplyAction::On) => Ok(self.set_supply(true)),
            Command::Supply(SupplyAction::Off) => Ok(self.set_supply(false)),
            Command::Supply(SupplyAction::Toggle) => Ok(self.toggle_supply()),
            Command::Toggle {
                switch,
                presentation,
            } => self.toggle(switch, *presentation),
            Command::ZoomMode(on) => Ok(self.set_zoom_mode(*on)),
            Command::Click(node) => self.click(node),
            Command::Focus(node) => self.focus(node),
            Command::Close => Ok(self.close_focus()),
        }
    }

    /// Flip the master supply.
    pub fn toggle_supply(&mut self) -> CommandOutcome {
        let on = !self.supply_on;
        self.set_supply(on)
    }

    /// Set the master supply. Switching it off drives every switch open.
    pub fn set_supply(&mut self, on: bool) -> CommandOutcome {
        self.begin(if on { "supply on" } else { "supply off" });
        if self.supply_on != on {
            self.supply_on = on;
            self.current.applied = true;
            debug!(supply_on = on, "master supply changed");
        }
        self.finish()
    }

    /// Toggle a switch through one of its node's presentations.
    ///
    /// Returns an error only when the switch does not exist. A toggle whose
    /// preconditions fail is reported as rejected and changes nothing.
    pub fn toggle(
        &mut self,
        switch: &SwitchRef,
        presentation: Presentation,
    ) -> Result<CommandOutcome, RunnerError> {
        let node = self
            .nodes
            .get(&switch.node)
            .ok_or_else(|| SimError::UnknownNode(switch.node.clone()))?;
        if node.is_closed(switch.switch).is_none() {
            return Err(unknown_switch(&switch.node, switch.switch).into());
        }
        let kind = node.kind();

        self.begin(
            Command::Toggle {
                switch: switch.clone(),
                presentation,
            }
            .to_string(),
        );
        if let Err(reason) = self.interaction(&switch.node, kind, presentation) {
            return Ok(self.reject(reason));
        }

        let gates = self.gates_for(&switch.node);
        let node = self
            .nodes
            .get_mut(&switch.node)
            .ok_or_else(|| SimError::UnknownNode(switch.node.clone()))?;
        match node.toggle(switch.switch, &gates, &mut self.context)? {
            ToggleOutcome::Applied { .. } => {
                self.current.applied = true;
                Ok(self.finish())
            }
            ToggleOutcome::Rejected(reason) => Ok(self.reject(reason)),
        }
    }

    /// Turn zoom mode on or off. The current focus, if any, is kept.
    pub fn set_zoom_mode(&mut self, on: bool) -> CommandOutcome {
        self.begin(Command::ZoomMode(on).to_string());
        self.current.applied = self.focus.set_zoom_mode(on);
        self.finish()
    }

    /// Click a node's diagram. Focuses it while zoom mode is on and no other
    /// node holds the focus.
    pub fn click(&mut self, node: &NodeId) -> Result<CommandOutcome, RunnerError> {
        self.require_node(node)?;
        self.begin(Command::Click(node.clone()).to_string());
        if !self.focus.zoom_mode() {
            return Ok(self.reject(RejectReason::ZoomModeOff));
        }
        if self.focus.is_blurred(node) {
            return Ok(self.reject(RejectReason::NotInteractive));
        }
        let changes = self.focus.set_focus(node.clone());
        self.current.applied = !changes.is_empty();
        self.current.zoom.extend(changes);
        Ok(self.finish())
    }

    /// Focus a node, superseding any previous focus.
    pub fn focus(&mut self, node: &NodeId) -> Result<CommandOutcome, RunnerError> {
        self.require_node(node)?;
        self.begin(Command::Focus(node.clone()).to_string());
        let changes = self.focus.set_focus(node.clone());
        self.current.applied = !changes.is_empty();
        self.current.zoom.extend(changes);
        Ok(self.finish())
    }

    /// Close the expanded view.
    pub fn close_focus(&mut self) -> CommandOutcome {
        self.begin(Command::Close.to_string());
        if let Some(change) = self.focus.clear() {
            self.current.applied = true;
            self.current.zoom.push(change);
        }
        self.finish()
    }

    // ------------------------------------------------------------------------
    // Queries
    // ------------------------------------------------------------------------

    /// Master supply on.
    pub fn supply_on(&self) -> bool {
        self.supply_on
    }

    /// Zoom mode on.
    pub fn zoom_mode(&self) -> bool {
        self.focus.zoom_mode()
    }

    /// Focused node.
    pub fn focused(&self) -> Option<&NodeId> {
        self.focus.focus()
    }

    /// Position of a switch.
    pub fn is_closed(&self, switch: &SwitchRef) -> Result<bool, RunnerError> {
        let node = self
            .nodes
            .get(&switch.node)
            .ok_or_else(|| SimError::UnknownNode(switch.node.clone()))?;
        node.is_closed(switch.switch)
            .ok_or_else(|| unknown_switch(&switch.node, switch.switch).into())
    }

    /// Mirrored conjunction of an MCCB pair.
    pub fn pair_conjunction(&self, pair: &NodeId) -> bool {
        self.pairs.get(pair).map(PairState::both).unwrap_or(false)
    }

    /// Any MCCB pair has both breakers closed.
    pub fn any_pair_closed(&self) -> bool {
        self.pairs.values().any(PairState::both)
    }

    /// Mirrored position of an output contactor.
    pub fn contactor(&self, contactor: &ContactorRef) -> bool {
        self.bus.is_closed(contactor)
    }

    /// Contactor at a flat index, with its mirrored position.
    pub fn contactor_by_index(&self, index: usize) -> Option<(ContactorRef, bool)> {
        self.bus.at_index(index).map(|c| {
            let closed = self.bus.is_closed(&c);
            (c, closed)
        })
    }

    /// The contactor bus.
    pub fn bus(&self) -> &ContactorBus {
        &self.bus
    }

    /// Every switch carrying simulated current.
    pub fn energized(&self) -> Vec<SwitchRef> {
        self.nodes
            .iter()
            .flat_map(|node| {
                let gates = self.gates_for(node.node_id());
                node.energized(&gates)
                    .into_iter()
                    .map(move |id| SwitchRef::new(node.node_id().clone(), id))
            })
            .collect()
    }

    /// View of one node.
    pub fn view(&self, id: &NodeId) -> Result<NodeView, RunnerError> {
        let node = self
            .nodes
            .get(id)
            .ok_or_else(|| SimError::UnknownNode(id.clone()))?;
        let gates = self.gates_for(id);
        let presentation = self.focus.presentation_of(id);
        let interactive = self.interaction(id, node.kind(), presentation).is_ok();
        let energized = node.energized(&gates);
        let switches: Vec<SwitchView> = node
            .switches()
            .into_iter()
            .map(|s| SwitchView {
                id: s.id,
                closed: s.closed,
                live: energized.contains(&s.id),
                operable: interactive && node.operable(s.id, &gates),
            })
            .collect();
        let circuit_active = (node.kind() == NodeKind::FeederBoard).then(|| {
            let top = switches.first().map(|s| s.closed).unwrap_or(false);
            top && switches.iter().skip(1).any(|s| s.closed)
        });

        Ok(NodeView {
            node: id.clone(),
            kind: node.kind(),
            presentation,
            blurred: self.focus.is_blurred(id),
            interactive,
            feed_live: gates.is_live(),
            circuit_active,
            switches,
        })
    }

    /// Views of every node in propagation order.
    pub fn views(&self) -> Vec<NodeView> {
        self.nodes
            .node_ids()
            .filter_map(|id| self.view(id).ok())
            .collect()
    }

    /// Serializable picture of the whole switchboard.
    pub fn snapshot(&self) -> SwitchboardSnapshot {
        let switches = self
            .nodes
            .iter()
            .flat_map(|node| {
                node.switches().into_iter().map(move |s| {
                    (SwitchRef::new(node.node_id().clone(), s.id).to_string(), s.closed)
                })
            })
            .collect();
        SwitchboardSnapshot {
            supply_on: self.supply_on,
            zoom_mode: self.focus.zoom_mode(),
            focus: self.focus.focus().cloned(),
            pairs: self.pairs.clone(),
            contactors: self.bus.entries(),
            switches,
            energized: self.energized(),
        }
    }

    /// Every absorbed switch change since mount.
    pub fn journal(&self) -> &[JournalEntry] {
        &self.journal
    }

    /// What mount restored and reported.
    pub fn restore_report(&self) -> &CommandOutcome {
        &self.restored
    }

    /// Statistics.
    pub fn stats(&self) -> &SwitchboardStats {
        &self.stats
    }

    /// Node information from the topology.
    pub fn node_infos(&self) -> &[NodeInfo] {
        &self.node_infos
    }

    /// The backing store.
    pub fn store(&self) -> &dyn KeyValueStore {
        self.store.as_ref()
    }

    /// Write changed state to the store. Returns the number of keys written.
    pub fn flush(&mut self) -> usize {
        let batch = self.persist_batch();
        let written = self.writer.flush(self.store.as_mut(), &batch);
        self.stats.keys_written += written as u64;
        written
    }

    // ------------------------------------------------------------------------
    // Internals
    // ------------------------------------------------------------------------

    fn require_node(&self, node: &NodeId) -> Result<(), RunnerError> {
        match self.nodes.get(node) {
            Some(_) => Ok(()),
            None => Err(SimError::UnknownNode(node.clone()).into()),
        }
    }

    /// Gates a node reads, derived from the supply and the mirrors.
    fn gates_for(&self, id: &NodeId) -> GateInputs {
        let feed_live = match self.feeds.get(id) {
            Some(Feed::Supply) | None => self.supply_on,
            Some(Feed::AnyPair(pairs)) => pairs.iter().any(|p| self.pair_conjunction(p)),
            Some(Feed::Contactor(contactor)) => self.bus.is_closed(contactor),
        };
        GateInputs::new(self.supply_on, feed_live)
    }

    /// Whether the operator can act on `node` through `presentation`.
    fn interaction(
        &self,
        node: &NodeId,
        kind: NodeKind,
        presentation: Presentation,
    ) -> Result<(), RejectReason> {
        if self.focus.is_blurred(node) {
            return Err(RejectReason::NotInteractive);
        }
        match presentation {
            Presentation::Expanded if !self.focus.is_expanded(node) => {
                Err(RejectReason::NotInteractive)
            }
            Presentation::Compact if kind == NodeKind::FeederBoard && self.focus.zoom_mode() => {
                Err(RejectReason::ZoomMode)
            }
            _ => Ok(()),
        }
    }

    fn begin(&mut self, command: impl Into<String>) {
        self.current = CommandOutcome::new(command);
        self.stats.commands += 1;
    }

    fn reject(&mut self, reason: RejectReason) -> CommandOutcome {
        self.stats.rejected += 1;
        std::mem::take(&mut self.current).into_rejected(reason)
    }

    fn finish(&mut self) -> CommandOutcome {
        self.settle();
        self.flush();
        std::mem::take(&mut self.current)
    }

    /// Drain queued notifications into the mirrors, journal and outcome.
    /// Returns the number drained.
    fn absorb(&mut self) -> usize {
        let pending = self.context.take_pending();
        let count = pending.len();
        for notification in pending {
            self.stats.notifications += 1;
            match notification {
                Notification::Switch(change) => self.absorb_switch(change),
                Notification::PairState { node, left, right } => {
                    self.pairs.insert(node.clone(), PairState { left, right });
                    self.current.pairs.push(PairReport { node, left, right });
                }
            }
        }
        count
    }

    fn absorb_switch(&mut self, change: SwitchChange) {
        if let SwitchId::Output(output) = change.switch.switch {
            let contactor = ContactorRef::new(change.switch.node.clone(), output);
            self.bus.set(&contactor, change.closed);
        }
        if change.cause == ChangeCause::Cascade && !change.closed {
            self.stats.cascade_opens += 1;
        }
        self.journal.push(JournalEntry {
            seq: self.journal.len() as u64,
            switch: change.switch.clone(),
            closed: change.closed,
            cause: change.cause,
        });
        self.current.changes.push(change);
    }

    /// Run reactive rules until nothing changes.
    fn settle(&mut self) {
        self.absorb();
        loop {
            self.context.begin_pass();
            self.stats.settle_passes += 1;
            let mut drained = 0;
            for position in 0..self.nodes.len() {
                let Some(id) = self.nodes.at(position).map(|n| n.node_id().clone()) else {
                    continue;
                };
                let gates = self.gates_for(&id);
                if let Some(node) = self.nodes.at_mut(position) {
                    node.observe(&gates, &mut self.context);
                }
                drained += self.absorb();
            }
            if drained == 0 {
                break;
            }
            if self.context.pass() >= MAX_SETTLE_PASSES {
                warn!(passes = self.context.pass(), "switchboard did not settle");
                break;
            }
        }
        self.context = PropagationContext::new();
    }

    fn persist_batch(&self) -> PersistBatch {
        let mut batch = PersistBatch::new();
        batch.set_bool(SUPPLY_KEY, self.supply_on);
        batch.set_bool(ZOOM_MODE_KEY, self.focus.zoom_mode());
        match self.focus.focus() {
            Some(node) => batch.set_str(FOCUS_KEY, node.as_str()),
            None => batch.remove(FOCUS_KEY),
        }
        for node in self.nodes.iter() {
            node.persist(&mut batch);
        }
        batch
    }
}

/// Build and mount a switchboard in one step.
pub fn mount_model<S: KeyValueStore + 'static>(
    model: &sldsim_model::Model,
    store: S,
) -> Result<Switchboard, RunnerError> {
    let built = sldsim_model::build_switchboard(model)?;
    Ok(Switchboard::mount(built, store))
}

// Re-export key types for convenience
pub use sldsim_model::{build_switchboard, furnace_model, load_model, load_model_from_str, load_models};

#[cfg(test)]
mod tests {
    use super::*;
    use sldsim_common::persist::MemoryStore;

    const SMALL: &str = r#"
pairs:
  - name: P1
  - name: P2
groups:
  - name: G1
    outputs: 2
boards:
  - name: B1
    feed: { group: G1, output: 1 }
    feeders: [1, 2, 3]
"#;

    fn small() -> Switchboard {
        let model = load_model_from_str(SMALL).unwrap();
        mount_model(&model, MemoryStore::new()).unwrap()
    }

    fn toggle(board: &mut Switchboard, target: &str) -> CommandOutcome {
        board.toggle(&target.parse().unwrap(), Presentation::Compact).unwrap()
    }

    fn energize_board(board: &mut Switchboard) {
        board.set_supply(true);
        for target in ["P2.left", "P2.right", "G1.isolator", "G1.output1", "B1.top"] {
            assert!(toggle(board, target).applied, "{} rejected", target);
        }
    }

    #[test]
    fn test_either_pair_gates_group() {
        let mut board = small();
        board.set_supply(true);
        toggle(&mut board, "P2.left");
        assert!(!board.any_pair_closed());
        assert_eq!(
            toggle(&mut board, "G1.isolator").rejected,
            Some(RejectReason::UpstreamOpen)
        );
        toggle(&mut board, "P2.right");
        assert!(board.pair_conjunction(&NodeId::new("P2")));
        assert!(!board.pair_conjunction(&NodeId::new("P1")));
        assert!(toggle(&mut board, "G1.isolator").applied);
    }

    #[test]
    fn test_pair_loss_cascades_to_board() {
        let mut board = small();
        energize_board(&mut board);
        toggle(&mut board, "B1.switch2");

        let outcome = toggle(&mut board, "P2.left");
        let opened: Vec<String> = outcome
            .changes
            .iter()
            .filter(|c| c.cause == ChangeCause::Cascade)
            .map(|c| c.switch.to_string())
            .collect();
        assert_eq!(
            opened,
            vec!["G1.isolator", "G1.output1", "B1.topSwitch", "B1.switch2"]
        );
        // Only the breaker that stayed closed still carries current.
        assert_eq!(
            board.energized(),
            vec![SwitchRef::new("P2", SwitchId::Right)]
        );
        assert_eq!(board.stats().cascade_opens, 4);
    }

    #[test]
    fn test_unknown_targets_are_errors() {
        let mut board = small();
        let missing_node: SwitchRef = "B9.top".parse().unwrap();
        assert!(matches!(
            board.toggle(&missing_node, Presentation::Compact),
            Err(RunnerError::Switchboard(SimError::UnknownNode(_)))
        ));
        let missing_switch: SwitchRef = "B1.switch7".parse().unwrap();
        assert!(matches!(
            board.toggle(&missing_switch, Presentation::Compact),
            Err(RunnerError::Switchboard(SimError::UnknownSwitch { .. }))
        ));
        assert!(board.click(&NodeId::new("nope")).is_err());
        assert_eq!(board.stats().commands, 0);
    }

    #[test]
    fn test_zoom_mode_blocks_compact_board_toggles() {
        let mut board = small();
        energize_board(&mut board);
        board.set_zoom_mode(true);
        assert_eq!(
            toggle(&mut board, "B1.switch1").rejected,
            Some(RejectReason::ZoomMode)
        );
        // Groups stay operable from the compact diagram.
        assert!(toggle(&mut board, "G1.output0").applied);

        board.click(&NodeId::new("B1")).unwrap();
        let expanded = board
            .toggle(&"B1.switch1".parse().unwrap(), Presentation::Expanded)
            .unwrap();
        assert!(expanded.applied);
        assert_eq!(
            toggle(&mut board, "G1.output0").rejected,
            Some(RejectReason::NotInteractive)
        );
    }

    #[test]
    fn test_click_requires_zoom_mode_and_no_focus() {
        let mut board = small();
        let b1 = NodeId::new("B1");
        let g1 = NodeId::new("G1");
        assert_eq!(board.click(&b1).unwrap().rejected, Some(RejectReason::ZoomModeOff));
        board.set_zoom_mode(true);
        assert_eq!(board.click(&b1).unwrap().zoom.len(), 1);
        assert_eq!(
            board.click(&g1).unwrap().rejected,
            Some(RejectReason::NotInteractive)
        );
        assert_eq!(board.focused(), Some(&b1));
    }

    #[test]
    fn test_views_reflect_state() {
        let mut board = small();
        energize_board(&mut board);
        let view = board.view(&NodeId::new("B1")).unwrap();
        assert_eq!(view.circuit_active, Some(false));
        assert!(view.feed_live);
        assert!(view.switches.iter().all(|s| s.operable));
        assert!(view.switches[0].live);

        board.set_zoom_mode(true);
        let view = board.view(&NodeId::new("B1")).unwrap();
        assert!(!view.interactive);
        assert!(view.switches.iter().all(|s| !s.operable));
        assert_eq!(board.views().len(), 4);
    }

    #[test]
    fn test_commands_are_persisted() {
        let mut board = small();
        energize_board(&mut board);
        let store = board.store();
        assert_eq!(store.get("inputCurrentOn").unwrap().as_deref(), Some("true"));
        assert_eq!(store.get("G1.outputSwitches").unwrap().as_deref(), Some("[false,true]"));
        assert_eq!(store.get("B1-topSwitchClosed").unwrap().as_deref(), Some("true"));
        assert_eq!(store.get("zoomedCircuit").unwrap(), None);
        assert_eq!(board.flush(), 0);
    }
}

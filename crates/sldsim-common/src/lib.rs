//! # sldsim-common
//!
//! Common types and traits for the sldsim switchboard simulator.
//!
//! This crate provides the primitives every switchgear node shares:
//! - Identification ([`NodeId`], [`SwitchId`], [`SwitchRef`], [`ContactorRef`])
//! - Switch state ([`SwitchState`]) and upstream gates ([`GateInputs`])
//! - Upward notifications ([`Notification`], [`SwitchChange`])
//! - Propagation context ([`PropagationContext`])
//! - Node trait ([`Switchgear`]) and registry ([`NodeRegistry`])
//! - Persistence primitives ([`persist`])

pub mod persist;

use persist::{PersistBatch, StateSnapshot};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::fmt;
use std::str::FromStr;
use thiserror::Error;

// ============================================================================
// Error Types
// ============================================================================

/// Errors raised for requests that address something that does not exist.
///
/// Operating a device whose upstream gate is open is not an error; see
/// [`ToggleOutcome::Rejected`].
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum SimError {
    /// Node not found.
    #[error("Node not found: {0}")]
    UnknownNode(NodeId),

    /// The node exists but has no such switch.
    #[error("Node {node} has no switch {switch}")]
    UnknownSwitch {
        /// Addressed node.
        node: NodeId,
        /// Switch that was requested.
        switch: SwitchId,
    },

    /// A switch reference could not be parsed.
    #[error("Invalid switch reference: {0}")]
    InvalidSwitchRef(String),
}

// ============================================================================
// Identifier Types
// ============================================================================

/// Unique identifier for a switchgear node (e.g. `IB-RTDB-4`, `FourIGBT-2`).
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct NodeId(String);

impl NodeId {
    /// Create a new node ID.
    pub fn new(id: impl Into<String>) -> Self {
        NodeId(id.into())
    }

    /// Borrow the identifier text.
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for NodeId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for NodeId {
    fn from(s: &str) -> Self {
        NodeId::new(s)
    }
}

/// Kind of switchgear a node models.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum NodeKind {
    /// Two breakers whose conjunction gates the DC bus.
    MccbPair,
    /// DC isolator feeding a row of output contactors.
    ContactorGroup,
    /// Protected incoming breaker fanning out to numbered feeders.
    FeederBoard,
}

/// Identifies one switch within a node.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum SwitchId {
    /// Incoming protected breaker of a feeder board.
    Top,
    /// Numbered feeder switch of a feeder board (terminal number, not position).
    Feeder(u16),
    /// DC off-load isolator of a contactor group.
    Isolator,
    /// Output contactor of a contactor group (zero-based local index).
    Output(usize),
    /// Left breaker of an MCCB pair.
    Left,
    /// Right breaker of an MCCB pair.
    Right,
}

impl fmt::Display for SwitchId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SwitchId::Top => write!(f, "topSwitch"),
            SwitchId::Feeder(n) => write!(f, "switch{}", n),
            SwitchId::Isolator => write!(f, "isolator"),
            SwitchId::Output(i) => write!(f, "output{}", i),
            SwitchId::Left => write!(f, "leftMCCB"),
            SwitchId::Right => write!(f, "rightMCCB"),
        }
    }
}

impl FromStr for SwitchId {
    type Err = SimError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let invalid = || SimError::InvalidSwitchRef(s.to_string());
        match s {
            "topSwitch" | "top" => Ok(SwitchId::Top),
            "isolator" => Ok(SwitchId::Isolator),
            "leftMCCB" | "left" => Ok(SwitchId::Left),
            "rightMCCB" | "right" => Ok(SwitchId::Right),
            _ => {
                if let Some(n) = s.strip_prefix("switch") {
                    n.parse().map(SwitchId::Feeder).map_err(|_| invalid())
                } else if let Some(i) = s.strip_prefix("output") {
                    i.parse().map(SwitchId::Output).map_err(|_| invalid())
                } else {
                    Err(invalid())
                }
            }
        }
    }
}

impl Serialize for SwitchId {
    fn serialize<S: serde::Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.collect_str(self)
    }
}

impl<'de> Deserialize<'de> for SwitchId {
    fn deserialize<D: serde::Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let s = String::deserialize(deserializer)?;
        s.parse().map_err(serde::de::Error::custom)
    }
}

/// Fully-qualified switch address, written `NODE.SWITCH` (e.g. `IB-RTDB-4.switch14`).
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct SwitchRef {
    /// Owning node.
    pub node: NodeId,
    /// Switch within the node.
    pub switch: SwitchId,
}

impl SwitchRef {
    /// Create a new switch reference.
    pub fn new(node: impl Into<NodeId>, switch: SwitchId) -> Self {
        SwitchRef {
            node: node.into(),
            switch,
        }
    }
}

impl fmt::Display for SwitchRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}.{}", self.node, self.switch)
    }
}

impl FromStr for SwitchRef {
    type Err = SimError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let (node, switch) = s
            .rsplit_once('.')
            .ok_or_else(|| SimError::InvalidSwitchRef(s.to_string()))?;
        if node.is_empty() {
            return Err(SimError::InvalidSwitchRef(s.to_string()));
        }
        Ok(SwitchRef::new(NodeId::new(node), switch.parse()?))
    }
}

impl Serialize for SwitchRef {
    fn serialize<S: serde::Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.collect_str(self)
    }
}

impl<'de> Deserialize<'de> for SwitchRef {
    fn deserialize<D: serde::Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let s = String::deserialize(deserializer)?;
        s.parse().map_err(serde::de::Error::custom)
    }
}

/// Stable address of one output contactor: the owning group plus its local index.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct ContactorRef {
    /// Contactor group node.
    pub group: NodeId,
    /// Zero-based output index within the group.
    pub output: usize,
}

impl ContactorRef {
    /// Create a new contactor reference.
    pub fn new(group: impl Into<NodeId>, output: usize) -> Self {
        ContactorRef {
            group: group.into(),
            output,
        }
    }

    /// The switch this contactor corresponds to.
    pub fn switch_ref(&self) -> SwitchRef {
        SwitchRef::new(self.group.clone(), SwitchId::Output(self.output))
    }
}

impl fmt::Display for ContactorRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}.output{}", self.group, self.output)
    }
}

// ============================================================================
// Switch State
// ============================================================================

/// Open/closed state of one physical device.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct SwitchState {
    /// Device identifier within its node.
    pub id: SwitchId,
    /// Whether the device is closed (conducting).
    pub closed: bool,
}

impl SwitchState {
    /// A new switch in its initial open position.
    pub fn open(id: SwitchId) -> Self {
        SwitchState { id, closed: false }
    }

    /// Flip the switch and return the new position.
    pub fn flip(&mut self) -> bool {
        self.closed = !self.closed;
        self.closed
    }

    /// Force the switch open. Returns `true` only if it was closed.
    pub fn force_open(&mut self) -> bool {
        std::mem::replace(&mut self.closed, false)
    }

    /// Set the position. Returns `true` if it changed.
    pub fn set(&mut self, closed: bool) -> bool {
        std::mem::replace(&mut self.closed, closed) != closed
    }
}

/// Upstream signals a node reads but never owns.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct GateInputs {
    /// Master input supply is on.
    pub supply_on: bool,
    /// The specific feed supplying this node is closed: the supply itself for
    /// MCCB pairs, the pair conjunction for contactor groups, the feeding
    /// output contactor for boards.
    pub feed_live: bool,
}

impl GateInputs {
    /// Create gate inputs.
    pub fn new(supply_on: bool, feed_live: bool) -> Self {
        GateInputs {
            supply_on,
            feed_live,
        }
    }

    /// Both the supply and the node's feed are live.
    pub fn is_live(&self) -> bool {
        self.supply_on && self.feed_live
    }

    /// The supply went from on to off between `previous` and `self`.
    pub fn supply_lost(&self, previous: &GateInputs) -> bool {
        previous.supply_on && !self.supply_on
    }

    /// The feed went from closed to open between `previous` and `self`.
    pub fn feed_lost(&self, previous: &GateInputs) -> bool {
        previous.feed_live && !self.feed_live
    }
}

// ============================================================================
// Notifications
// ============================================================================

/// Why a switch changed position.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ChangeCause {
    /// Operator toggled the switch.
    Operator,
    /// Forced open by an upstream device opening.
    Cascade,
    /// Reported from persisted state at mount.
    Restore,
}

/// One switch changed position.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SwitchChange {
    /// Switch that changed.
    pub switch: SwitchRef,
    /// New position.
    pub closed: bool,
    /// What caused the change.
    pub cause: ChangeCause,
}

/// Upward notification from a node to the aggregator.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Notification {
    /// A switch changed position.
    Switch(SwitchChange),
    /// An MCCB pair reports both breaker positions; the aggregator derives the conjunction.
    PairState {
        /// Reporting pair.
        node: NodeId,
        /// Left breaker closed.
        left: bool,
        /// Right breaker closed.
        right: bool,
    },
}

/// Why a toggle was ignored.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RejectReason {
    /// Master supply is off.
    SupplyOff,
    /// The node's upstream feed is open.
    UpstreamOpen,
    /// The device gating this switch inside the same node is open.
    ParentOpen,
    /// Compact presentations are click targets while zoom mode is on.
    ZoomMode,
    /// Another node is focused, or the node is not expanded.
    NotInteractive,
    /// Clicking only focuses nodes while zoom mode is on.
    ZoomModeOff,
}

/// Result of a toggle request.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ToggleOutcome {
    /// The switch flipped to the given position.
    Applied {
        /// New position.
        closed: bool,
    },
    /// The device cannot be operated right now; nothing changed.
    Rejected(RejectReason),
}

impl ToggleOutcome {
    /// Whether the toggle changed state.
    pub fn is_applied(&self) -> bool {
        matches!(self, ToggleOutcome::Applied { .. })
    }
}

// ============================================================================
// Propagation Context
// ============================================================================

/// Context passed to nodes while handling toggles and reactive rules.
///
/// Nodes finish mutating their own state before pushing notifications, so the
/// aggregator never reads an intermediate state when it drains the queue.
#[derive(Debug, Default)]
pub struct PropagationContext {
    pending: Vec<Notification>,
    pass: u32,
}

impl PropagationContext {
    /// Create an empty context.
    pub fn new() -> Self {
        Self::default()
    }

    /// Current settle pass (0 while handling the triggering command).
    pub fn pass(&self) -> u32 {
        self.pass
    }

    /// Advance to the next settle pass (used by the settle loop).
    pub fn begin_pass(&mut self) {
        self.pass += 1;
    }

    /// Notify that a switch changed position.
    pub fn notify_switch(&mut self, node: &NodeId, switch: SwitchId, closed: bool, cause: ChangeCause) {
        self.pending.push(Notification::Switch(SwitchChange {
            switch: SwitchRef::new(node.clone(), switch),
            closed,
            cause,
        }));
    }

    /// Report both positions of an MCCB pair.
    pub fn report_pair(&mut self, node: &NodeId, left: bool, right: bool) {
        self.pending.push(Notification::PairState {
            node: node.clone(),
            left,
            right,
        });
    }

    /// Whether notifications are waiting to be drained.
    pub fn has_pending(&self) -> bool {
        !self.pending.is_empty()
    }

    /// Take all pending notifications (used by the aggregator).
    pub fn take_pending(&mut self) -> Vec<Notification> {
        std::mem::take(&mut self.pending)
    }
}

// ============================================================================
// Switchgear Trait
// ============================================================================

/// Base trait for all switchgear nodes.
pub trait Switchgear: Send {
    /// Get the node's unique ID.
    fn node_id(&self) -> &NodeId;

    /// What kind of device this node models.
    fn kind(&self) -> NodeKind;

    /// All switches owned by this node, in display order.
    fn switches(&self) -> Vec<SwitchState>;

    /// Position of one switch, or `None` if the node has no such switch.
    fn is_closed(&self, switch: SwitchId) -> Option<bool> {
        self.switches()
            .into_iter()
            .find(|s| s.id == switch)
            .map(|s| s.closed)
    }

    /// Check the operating preconditions of an existing switch.
    fn precondition(&self, switch: SwitchId, gates: &GateInputs) -> Result<(), RejectReason>;

    /// Whether the switch exists and may be operated under `gates`.
    fn operable(&self, switch: SwitchId, gates: &GateInputs) -> bool {
        self.is_closed(switch).is_some() && self.precondition(switch, gates).is_ok()
    }

    /// Handle an operator toggle.
    fn toggle(
        &mut self,
        switch: SwitchId,
        gates: &GateInputs,
        ctx: &mut PropagationContext,
    ) -> Result<ToggleOutcome, SimError>;

    /// Re-evaluate reactive rules against the latest upstream gates.
    fn observe(&mut self, gates: &GateInputs, ctx: &mut PropagationContext);

    /// Load persisted state at mount and record `gates` as the baseline.
    ///
    /// Hydration never runs reactive rules.
    fn hydrate(&mut self, snapshot: &StateSnapshot, gates: &GateInputs, ctx: &mut PropagationContext);

    /// Storage keys this node reads and writes.
    fn storage_keys(&self) -> Vec<String>;

    /// Write the node's current state into `batch`.
    fn persist(&self, batch: &mut PersistBatch);

    /// Switches currently carrying simulated current.
    fn energized(&self, gates: &GateInputs) -> Vec<SwitchId>;
}

/// Shared helper: error for a switch the node does not own.
pub fn unknown_switch(node: &NodeId, switch: SwitchId) -> SimError {
    SimError::UnknownSwitch {
        node: node.clone(),
        switch,
    }
}

// ============================================================================
// Node Registry
// ============================================================================

/// Registry holding nodes in propagation order (upstream before downstream).
pub struct NodeRegistry {
    nodes: Vec<Box<dyn Switchgear>>,
    index: HashMap<NodeId, usize>,
}

impl NodeRegistry {
    /// Create a new empty registry.
    pub fn new() -> Self {
        NodeRegistry {
            nodes: Vec::new(),
            index: HashMap::new(),
        }
    }

    /// Register a node. A node registered under an existing ID replaces it in place.
    pub fn register(&mut self, node: Box<dyn Switchgear>) {
        let id = node.node_id().clone();
        match self.index.get(&id) {
            Some(&slot) => self.nodes[slot] = node,
            None => {
                self.index.insert(id, self.nodes.len());
                self.nodes.push(node);
            }
        }
    }

    /// Position of a node in propagation order.
    pub fn position(&self, id: &NodeId) -> Option<usize> {
        self.index.get(id).copied()
    }

    /// Get a node by ID.
    pub fn get(&self, id: &NodeId) -> Option<&dyn Switchgear> {
        self.position(id).map(|i| self.nodes[i].as_ref())
    }

    /// Get a mutable reference to a node by ID.
    pub fn get_mut(&mut self, id: &NodeId) -> Option<&mut Box<dyn Switchgear>> {
        let slot = self.position(id)?;
        self.nodes.get_mut(slot)
    }

    /// Node at a propagation-order position.
    pub fn at(&self, position: usize) -> Option<&dyn Switchgear> {
        self.nodes.get(position).map(|n| n.as_ref())
    }

    /// Mutable node at a propagation-order position.
    pub fn at_mut(&mut self, position: usize) -> Option<&mut Box<dyn Switchgear>> {
        self.nodes.get_mut(position)
    }

    /// Iterate nodes in propagation order.
    pub fn iter(&self) -> impl Iterator<Item = &dyn Switchgear> + '_ {
        self.nodes.iter().map(|n| n.as_ref())
    }

    /// Get all node IDs in propagation order.
    pub fn node_ids(&self) -> impl Iterator<Item = &NodeId> + '_ {
        self.nodes.iter().map(|n| n.node_id())
    }

    /// Get the number of registered nodes.
    pub fn len(&self) -> usize {
        self.nodes.len()
    }

    /// Check if the registry is empty.
    pub fn is_empty(&self) -> bool {
        self.nodes.is_empty()
    }
}

impl Default for NodeRegistry {
    fn default() -> Self {
        Self::new()
    }
}

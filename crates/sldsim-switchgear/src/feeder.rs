//! Protected feeder board (RTDB).
//!
//! One incoming protected breaker (`topSwitch`) gating a row of numbered
//! feeder switches. A feeder is never closed while the top switch is open,
//! and nothing on the board stays closed once its feeding contactor or the
//! master supply drops.

use serde::{Deserialize, Serialize};
use sldsim_common::persist::{PersistBatch, StateSnapshot};
use sldsim_common::{
    unknown_switch, ChangeCause, GateInputs, NodeId, NodeKind, PropagationContext, RejectReason,
    SimError, SwitchId, SwitchState, Switchgear, ToggleOutcome,
};
use tracing::debug;

/// Configuration for a feeder board.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FeederBoardConfig {
    /// Prefix of the board's storage keys (e.g. `IB-RTDB-4`).
    pub storage_prefix: String,
    /// Terminal numbers of the feeder switches, in display order.
    pub feeders: Vec<u16>,
}

/// A protected feeder board.
#[derive(Debug, Clone)]
pub struct FeederBoard {
    id: NodeId,
    storage_prefix: String,
    top: SwitchState,
    feeders: Vec<SwitchState>,
    baseline: GateInputs,
}

impl FeederBoard {
    /// Create a board with every switch open.
    pub fn new(id: NodeId, config: FeederBoardConfig) -> Self {
        FeederBoard {
            id,
            storage_prefix: config.storage_prefix,
            top: SwitchState::open(SwitchId::Top),
            feeders: config
                .feeders
                .into_iter()
                .map(|n| SwitchState::open(SwitchId::Feeder(n)))
                .collect(),
            baseline: GateInputs::default(),
        }
    }

    /// Whether the incoming breaker is closed.
    pub fn top_closed(&self) -> bool {
        self.top.closed
    }

    /// Position of the feeder wired to `terminal`.
    pub fn feeder_closed(&self, terminal: u16) -> Option<bool> {
        self.feeder(terminal).map(|s| s.closed)
    }

    /// Terminal numbers in display order.
    pub fn terminals(&self) -> impl Iterator<Item = u16> + '_ {
        self.feeders.iter().filter_map(|s| match s.id {
            SwitchId::Feeder(n) => Some(n),
            _ => None,
        })
    }

    /// Top switch closed and at least one feeder closed.
    pub fn circuit_active(&self) -> bool {
        self.top.closed && self.feeders.iter().any(|s| s.closed)
    }

    fn feeder(&self, terminal: u16) -> Option<&SwitchState> {
        self.feeders.iter().find(|s| s.id == SwitchId::Feeder(terminal))
    }

    fn feeder_mut(&mut self, terminal: u16) -> Option<&mut SwitchState> {
        self.feeders
            .iter_mut()
            .find(|s| s.id == SwitchId::Feeder(terminal))
    }

    /// Open every feeder, returning the ones that were closed.
    fn open_feeders(&mut self) -> Vec<SwitchId> {
        self.feeders
            .iter_mut()
            .filter_map(|s| s.force_open().then_some(s.id))
            .collect()
    }

    fn top_key(&self) -> String {
        format!("{}-topSwitchClosed", self.storage_prefix)
    }

    fn feeder_key(&self, terminal: u16) -> String {
        format!("{}-switch{}Closed", self.storage_prefix, terminal)
    }
}

impl Switchgear for FeederBoard {
    fn node_id(&self) -> &NodeId {
        &self.id
    }

    fn kind(&self) -> NodeKind {
        NodeKind::FeederBoard
    }

    fn switches(&self) -> Vec<SwitchState> {
        std::iter::once(self.top)
            .chain(self.feeders.iter().copied())
            .collect()
    }

    fn precondition(&self, switch: SwitchId, gates: &GateInputs) -> Result<(), RejectReason> {
        if !gates.supply_on {
            return Err(RejectReason::SupplyOff);
        }
        match switch {
            SwitchId::Top if !gates.feed_live => Err(RejectReason::UpstreamOpen),
            SwitchId::Feeder(_) if !self.top.closed => Err(RejectReason::ParentOpen),
            _ => Ok(()),
        }
    }

    fn toggle(
        &mut self,
        switch: SwitchId,
        gates: &GateInputs,
        ctx: &mut PropagationContext,
    ) -> Result<ToggleOutcome, SimError> {
        if self.is_closed(switch).is_none() {
            return Err(unknown_switch(&self.id, switch));
        }
        if let Err(reason) = self.precondition(switch, gates) {
            return Ok(ToggleOutcome::Rejected(reason));
        }

        match switch {
            SwitchId::Top => {
                let closed = self.top.flip();
                let opened = if closed { Vec::new() } else { self.open_feeders() };
                ctx.notify_switch(&self.id, SwitchId::Top, closed, ChangeCause::Operator);
                for id in opened {
                    ctx.notify_switch(&self.id, id, false, ChangeCause::Cascade);
                }
                Ok(ToggleOutcome::Applied { closed })
            }
            SwitchId::Feeder(n) => {
                let closed = match self.feeder_mut(n) {
                    Some(state) => state.flip(),
                    None => return Err(unknown_switch(&self.id, switch)),
                };
                ctx.notify_switch(&self.id, switch, closed, ChangeCause::Operator);
                Ok(ToggleOutcome::Applied { closed })
            }
            _ => Err(unknown_switch(&self.id, switch)),
        }
    }

    fn observe(&mut self, gates: &GateInputs, ctx: &mut PropagationContext) {
        let lost = gates.supply_lost(&self.baseline) || gates.feed_lost(&self.baseline);
        self.baseline = *gates;
        if !lost {
            return;
        }

        let top_opened = self.top.force_open();
        let opened = self.open_feeders();
        if top_opened || !opened.is_empty() {
            debug!(
                node = %self.id,
                feeders = opened.len(),
                "upstream lost, board forced open"
            );
        }
        if top_opened {
            ctx.notify_switch(&self.id, SwitchId::Top, false, ChangeCause::Cascade);
        }
        for id in opened {
            ctx.notify_switch(&self.id, id, false, ChangeCause::Cascade);
        }
    }

    fn hydrate(&mut self, snapshot: &StateSnapshot, gates: &GateInputs, _ctx: &mut PropagationContext) {
        if let Some(closed) = snapshot.get_bool(&self.top_key()) {
            self.top.closed = closed;
        }
        let terminals: Vec<u16> = self.terminals().collect();
        for n in terminals {
            if let Some(closed) = snapshot.get_bool(&self.feeder_key(n)) {
                if let Some(state) = self.feeder_mut(n) {
                    state.closed = closed;
                }
            }
        }
        self.baseline = *gates;
    }

    fn storage_keys(&self) -> Vec<String> {
        std::iter::once(self.top_key())
            .chain(self.terminals().map(|n| self.feeder_key(n)))
            .collect()
    }

    fn persist(&self, batch: &mut PersistBatch) {
        batch.set_bool(self.top_key(), self.top.closed);
        for state in &self.feeders {
            if let SwitchId::Feeder(n) = state.id {
                batch.set_bool(self.feeder_key(n), state.closed);
            }
        }
    }

    fn energized(&self, gates: &GateInputs) -> Vec<SwitchId> {
        if !(gates.is_live() && self.top.closed) {
            return Vec::new();
        }
        std::iter::once(SwitchId::Top)
            .chain(self.feeders.iter().filter(|s| s.closed).map(|s| s.id))
            .collect()
    }
}

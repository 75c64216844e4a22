//! DC isolator and output contactor group (the IGBT inverter blocks).
//!
//! The isolator is fed from the MCCB conjunction. Output contactors can only be
//! operated while the isolator is closed and the supply is live. When the
//! isolator goes from closed to open, every closed contactor is forced open
//! and reported once. Losing the supply or the feed also opens every closed
//! contactor, even behind an isolator that was already open.

use serde::{Deserialize, Serialize};
use sldsim_common::persist::{PersistBatch, StateSnapshot};
use sldsim_common::{
    unknown_switch, ChangeCause, GateInputs, NodeId, NodeKind, PropagationContext, RejectReason,
    SimError, SwitchId, SwitchState, Switchgear, ToggleOutcome,
};
use tracing::debug;

/// Configuration for a contactor group.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ContactorGroupConfig {
    /// Prefix of the group's storage keys (e.g. `FourIGBT4`).
    pub storage_prefix: String,
    /// Number of output contactors.
    pub outputs: usize,
}

/// An isolator gating a row of output contactors.
#[derive(Debug, Clone)]
pub struct ContactorGroup {
    id: NodeId,
    storage_prefix: String,
    isolator: SwitchState,
    outputs: Vec<SwitchState>,
    baseline: GateInputs,
    /// Isolator position as of the last cascade check.
    isolator_was_closed: bool,
}

impl ContactorGroup {
    /// Create a group with every switch open.
    pub fn new(id: NodeId, config: ContactorGroupConfig) -> Self {
        ContactorGroup {
            id,
            storage_prefix: config.storage_prefix,
            isolator: SwitchState::open(SwitchId::Isolator),
            outputs: (0..config.outputs)
                .map(|i| SwitchState::open(SwitchId::Output(i)))
                .collect(),
            baseline: GateInputs::default(),
            isolator_was_closed: false,
        }
    }

    /// Whether the isolator is closed.
    pub fn isolator_closed(&self) -> bool {
        self.isolator.closed
    }

    /// Position of output contactor `index`.
    pub fn output_closed(&self, index: usize) -> Option<bool> {
        self.outputs.get(index).map(|s| s.closed)
    }

    /// Number of output contactors.
    pub fn output_count(&self) -> usize {
        self.outputs.len()
    }

    /// Apply the closed→open isolator rule. Returns the contactors it opened.
    fn track_isolator(&mut self) -> Vec<SwitchId> {
        let just_opened = self.isolator_was_closed && !self.isolator.closed;
        self.isolator_was_closed = self.isolator.closed;
        if !just_opened {
            return Vec::new();
        }
        self.outputs
            .iter_mut()
            .filter_map(|s| s.force_open().then_some(s.id))
            .collect()
    }

    fn isolator_key(&self) -> String {
        format!("{}.isCircuitOn", self.storage_prefix)
    }

    fn outputs_key(&self) -> String {
        format!("{}.outputSwitches", self.storage_prefix)
    }
}

impl Switchgear for ContactorGroup {
    fn node_id(&self) -> &NodeId {
        &self.id
    }

    fn kind(&self) -> NodeKind {
        NodeKind::ContactorGroup
    }

    fn switches(&self) -> Vec<SwitchState> {
        std::iter::once(self.isolator)
            .chain(self.outputs.iter().copied())
            .collect()
    }

    fn precondition(&self, switch: SwitchId, gates: &GateInputs) -> Result<(), RejectReason> {
        match switch {
            SwitchId::Isolator if !gates.feed_live => Err(RejectReason::UpstreamOpen),
            SwitchId::Output(_) if !gates.supply_on => Err(RejectReason::SupplyOff),
            SwitchId::Output(_) if !self.isolator.closed => Err(RejectReason::ParentOpen),
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
            SwitchId::Isolator => {
                let closed = self.isolator.flip();
                let opened = self.track_isolator();
                ctx.notify_switch(&self.id, SwitchId::Isolator, closed, ChangeCause::Operator);
                for id in opened {
                    ctx.notify_switch(&self.id, id, false, ChangeCause::Cascade);
                }
                Ok(ToggleOutcome::Applied { closed })
            }
            SwitchId::Output(i) => {
                let state = self
                    .outputs
                    .get_mut(i)
                    .ok_or_else(|| unknown_switch(&self.id, switch))?;
                let closed = state.flip();
                ctx.notify_switch(&self.id, switch, closed, ChangeCause::Operator);
                Ok(ToggleOutcome::Applied { closed })
            }
            _ => Err(unknown_switch(&self.id, switch)),
        }
    }

    fn observe(&mut self, gates: &GateInputs, ctx: &mut PropagationContext) {
        let lost = gates.feed_lost(&self.baseline) || gates.supply_lost(&self.baseline);
        self.baseline = *gates;

        let isolator_opened = lost && self.isolator.force_open();
        let mut opened = self.track_isolator();
        if lost {
            // Outputs restored closed behind an open isolator.
            opened.extend(
                self.outputs
                    .iter_mut()
                    .filter_map(|s| s.force_open().then_some(s.id)),
            );
        }
        if isolator_opened {
            debug!(node = %self.id, outputs = opened.len(), "feed lost, isolator forced open");
            ctx.notify_switch(&self.id, SwitchId::Isolator, false, ChangeCause::Cascade);
        }
        for id in opened {
            ctx.notify_switch(&self.id, id, false, ChangeCause::Cascade);
        }
    }

    fn hydrate(&mut self, snapshot: &StateSnapshot, gates: &GateInputs, ctx: &mut PropagationContext) {
        if let Some(closed) = snapshot.get_bool(&self.isolator_key()) {
            self.isolator.closed = closed;
        }
        if let Some(row) = snapshot.get_bool_array(&self.outputs_key(), self.outputs.len()) {
            for (state, closed) in self.outputs.iter_mut().zip(row) {
                state.closed = closed;
            }
            for state in &self.outputs {
                ctx.notify_switch(&self.id, state.id, state.closed, ChangeCause::Restore);
            }
        }
        self.isolator_was_closed = self.isolator.closed;
        self.baseline = *gates;
    }

    fn storage_keys(&self) -> Vec<String> {
        vec![self.isolator_key(), self.outputs_key()]
    }

    fn persist(&self, batch: &mut PersistBatch) {
        batch.set_bool(self.isolator_key(), self.isolator.closed);
        let row: Vec<bool> = self.outputs.iter().map(|s| s.closed).collect();
        batch.set_bool_array(self.outputs_key(), &row);
    }

    fn energized(&self, gates: &GateInputs) -> Vec<SwitchId> {
        if !(gates.is_live() && self.isolator.closed) {
            return Vec::new();
        }
        std::iter::once(SwitchId::Isolator)
            .chain(self.outputs.iter().filter(|s| s.closed).map(|s| s.id))
            .collect()
    }
}

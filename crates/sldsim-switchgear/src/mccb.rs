//! MCCB pair feeding an IGBT converter.
//!
//! Two independent breakers. The pair reports both positions upward after every
//! change and at mount; the aggregator derives the conjunction.

use serde::{Deserialize, Serialize};
use sldsim_common::persist::{PersistBatch, StateSnapshot};
use sldsim_common::{
    unknown_switch, ChangeCause, GateInputs, NodeId, NodeKind, PropagationContext, RejectReason,
    SimError, SwitchId, SwitchState, Switchgear, ToggleOutcome,
};
use tracing::debug;

/// Configuration for an MCCB pair.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MccbPairConfig {
    /// Prefix of the pair's storage keys (e.g. `IGBTConv2`).
    pub storage_prefix: String,
}

/// Two breakers whose conjunction gates the DC bus.
#[derive(Debug, Clone)]
pub struct MccbPair {
    id: NodeId,
    storage_prefix: String,
    left: SwitchState,
    right: SwitchState,
    baseline: GateInputs,
}

impl MccbPair {
    /// Create a pair with both breakers open.
    pub fn new(id: NodeId, config: MccbPairConfig) -> Self {
        MccbPair {
            id,
            storage_prefix: config.storage_prefix,
            left: SwitchState::open(SwitchId::Left),
            right: SwitchState::open(SwitchId::Right),
            baseline: GateInputs::default(),
        }
    }

    /// Left breaker closed.
    pub fn left_closed(&self) -> bool {
        self.left.closed
    }

    /// Right breaker closed.
    pub fn right_closed(&self) -> bool {
        self.right.closed
    }

    /// Both breakers closed.
    pub fn both_closed(&self) -> bool {
        self.left.closed && self.right.closed
    }

    fn report(&self, ctx: &mut PropagationContext) {
        ctx.report_pair(&self.id, self.left.closed, self.right.closed);
    }

    fn left_key(&self) -> String {
        format!("{}.leftMCCBOn", self.storage_prefix)
    }

    fn right_key(&self) -> String {
        format!("{}.rightMCCBOn", self.storage_prefix)
    }
}

impl Switchgear for MccbPair {
    fn node_id(&self) -> &NodeId {
        &self.id
    }

    fn kind(&self) -> NodeKind {
        NodeKind::MccbPair
    }

    fn switches(&self) -> Vec<SwitchState> {
        vec![self.left, self.right]
    }

    fn precondition(&self, _switch: SwitchId, gates: &GateInputs) -> Result<(), RejectReason> {
        if gates.supply_on {
            Ok(())
        } else {
            Err(RejectReason::SupplyOff)
        }
    }

    fn toggle(
        &mut self,
        switch: SwitchId,
        gates: &GateInputs,
        ctx: &mut PropagationContext,
    ) -> Result<ToggleOutcome, SimError> {
        let state = match switch {
            SwitchId::Left => &mut self.left,
            SwitchId::Right => &mut self.right,
            _ => return Err(unknown_switch(&self.id, switch)),
        };
        if !gates.supply_on {
            return Ok(ToggleOutcome::Rejected(RejectReason::SupplyOff));
        }
        let closed = state.flip();
        ctx.notify_switch(&self.id, switch, closed, ChangeCause::Operator);
        self.report(ctx);
        Ok(ToggleOutcome::Applied { closed })
    }

    fn observe(&mut self, gates: &GateInputs, ctx: &mut PropagationContext) {
        let lost = gates.supply_lost(&self.baseline);
        self.baseline = *gates;
        if !lost {
            return;
        }

        let left = self.left.force_open();
        let right = self.right.force_open();
        if !(left || right) {
            return;
        }
        debug!(node = %self.id, "supply lost, breakers forced open");
        if left {
            ctx.notify_switch(&self.id, SwitchId::Left, false, ChangeCause::Cascade);
        }
        if right {
            ctx.notify_switch(&self.id, SwitchId::Right, false, ChangeCause::Cascade);
        }
        self.report(ctx);
    }

    fn hydrate(&mut self, snapshot: &StateSnapshot, gates: &GateInputs, ctx: &mut PropagationContext) {
        if let Some(closed) = snapshot.get_bool(&self.left_key()) {
            self.left.closed = closed;
        }
        if let Some(closed) = snapshot.get_bool(&self.right_key()) {
            self.right.closed = closed;
        }
        self.baseline = *gates;
        self.report(ctx);
    }

    fn storage_keys(&self) -> Vec<String> {
        vec![self.left_key(), self.right_key()]
    }

    fn persist(&self, batch: &mut PersistBatch) {
        batch.set_bool(self.left_key(), self.left.closed);
        batch.set_bool(self.right_key(), self.right.closed);
    }

    fn energized(&self, gates: &GateInputs) -> Vec<SwitchId> {
        if !gates.is_live() {
            return Vec::new();
        }
        self.switches()
            .into_iter()
            .filter(|s| s.closed)
            .map(|s| s.id)
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use sldsim_common::Notification;

    fn pair() -> MccbPair {
        MccbPair::new(
            NodeId::new("IGBT-Conv2"),
            MccbPairConfig {
                storage_prefix: "IGBTConv2".to_string(),
            },
        )
    }

    fn last_report(ctx: &mut PropagationContext) -> Option<(bool, bool)> {
        ctx.take_pending().into_iter().rev().find_map(|n| match n {
            Notification::PairState { left, right, .. } => Some((left, right)),
            _ => None,
        })
    }

    #[test]
    fn test_breakers_are_independent() {
        let mut p = pair();
        let mut ctx = PropagationContext::new();
        let live = GateInputs::new(true, true);
        p.toggle(SwitchId::Right, &live, &mut ctx).unwrap();
        assert_eq!(last_report(&mut ctx), Some((false, true)));
        assert!(!p.both_closed());
        p.toggle(SwitchId::Left, &live, &mut ctx).unwrap();
        assert_eq!(last_report(&mut ctx), Some((true, true)));
        assert!(p.both_closed());
    }

    #[test]
    fn test_no_supply_rejects_toggle() {
        let mut p = pair();
        let mut ctx = PropagationContext::new();
        let outcome = p
            .toggle(SwitchId::Left, &GateInputs::default(), &mut ctx)
            .unwrap();
        assert_eq!(outcome, ToggleOutcome::Rejected(RejectReason::SupplyOff));
        assert!(!ctx.has_pending());
        assert!(p.toggle(SwitchId::Top, &GateInputs::default(), &mut ctx).is_err());
    }

    #[test]
    fn test_supply_loss_opens_both() {
        let mut p = pair();
        let mut ctx = PropagationContext::new();
        let live = GateInputs::new(true, true);
        p.observe(&live, &mut ctx);
        p.toggle(SwitchId::Left, &live, &mut ctx).unwrap();
        p.toggle(SwitchId::Right, &live, &mut ctx).unwrap();
        ctx.take_pending();

        p.observe(&GateInputs::default(), &mut ctx);
        assert_eq!(last_report(&mut ctx), Some((false, false)));
        assert!(!p.left_closed() && !p.right_closed());
    }

    #[test]
    fn test_hydrate_reports_on_mount() {
        let mut p = pair();
        let mut ctx = PropagationContext::new();
        let snap: StateSnapshot = [("IGBTConv2.leftMCCBOn", "true")].into_iter().collect();
        p.hydrate(&snap, &GateInputs::default(), &mut ctx);
        assert_eq!(last_report(&mut ctx), Some((true, false)));
    }
}

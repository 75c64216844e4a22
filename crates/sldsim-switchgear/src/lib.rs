//! # sldsim-switchgear
//!
//! Switchgear node models for the sldsim switchboard.
//!
//! This crate provides:
//!
//! - [`MccbPair`] - two breakers whose conjunction gates the DC bus.
//! - [`ContactorGroup`] - a DC isolator gating 2 or 4 output contactors.
//! - [`FeederBoard`] - a protected incoming breaker fanning out to numbered feeders.
//!
//! Every node owns its switch states exclusively. Upstream gates arrive as
//! [`GateInputs`](sldsim_common::GateInputs) and changes leave as notifications
//! on the [`PropagationContext`](sldsim_common::PropagationContext).

pub mod contactor;
pub mod feeder;
pub mod mccb;

pub use contactor::{ContactorGroup, ContactorGroupConfig};
pub use feeder::{FeederBoard, FeederBoardConfig};
pub use mccb::{MccbPair, MccbPairConfig};

use sldsim_common::{NodeId, Switchgear};

/// Create a boxed MCCB pair.
pub fn create_mccb_pair(id: NodeId, config: MccbPairConfig) -> Box<dyn Switchgear> {
    Box::new(MccbPair::new(id, config))
}

/// Create a boxed contactor group.
pub fn create_contactor_group(id: NodeId, config: ContactorGroupConfig) -> Box<dyn Switchgear> {
    Box::new(ContactorGroup::new(id, config))
}

/// Create a boxed feeder board.
pub fn create_feeder_board(id: NodeId, config: FeederBoardConfig) -> Box<dyn Switchgear> {
    Box::new(FeederBoard::new(id, config))
}

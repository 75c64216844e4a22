//! Contactor bus: the aggregator's mirror of every output contactor.
//!
//! Groups report by [`ContactorRef`]. The bus alone decides the flat index,
//! which is the running sum of group sizes in declaration order.

use serde::Serialize;
use sldsim_common::{ContactorRef, NodeId};
use std::collections::BTreeMap;

#[derive(Debug, Clone)]
struct GroupSpan {
    group: NodeId,
    offset: usize,
    len: usize,
}

/// One mirrored contactor.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ContactorEntry {
    /// Flat index across all groups.
    pub index: usize,
    /// Stable address.
    pub contactor: ContactorRef,
    /// Mirrored position.
    pub closed: bool,
}

/// Mirrored output contactor states.
#[derive(Debug, Clone, Default)]
pub struct ContactorBus {
    spans: Vec<GroupSpan>,
    states: BTreeMap<ContactorRef, bool>,
}

impl ContactorBus {
    /// Create a bus for groups given as `(name, outputs)` in declaration order.
    pub fn new(groups: &[(NodeId, usize)]) -> Self {
        let mut spans = Vec::with_capacity(groups.len());
        let mut states = BTreeMap::new();
        let mut offset = 0;
        for (group, len) in groups {
            for output in 0..*len {
                states.insert(ContactorRef::new(group.clone(), output), false);
            }
            spans.push(GroupSpan {
                group: group.clone(),
                offset,
                len: *len,
            });
            offset += len;
        }
        ContactorBus { spans, states }
    }

    /// Total number of contactors.
    pub fn len(&self) -> usize {
        self.states.len()
    }

    /// Whether the bus has no contactors.
    pub fn is_empty(&self) -> bool {
        self.states.is_empty()
    }

    /// Whether `contactor` belongs to the bus.
    pub fn contains(&self, contactor: &ContactorRef) -> bool {
        self.states.contains_key(contactor)
    }

    /// Mirrored position. Unknown contactors read as open.
    pub fn is_closed(&self, contactor: &ContactorRef) -> bool {
        self.states.get(contactor).copied().unwrap_or(false)
    }

    /// Update the mirror. Returns `true` if the position changed.
    pub fn set(&mut self, contactor: &ContactorRef, closed: bool) -> bool {
        match self.states.get_mut(contactor) {
            Some(state) => std::mem::replace(state, closed) != closed,
            None => false,
        }
    }

    /// Flat index of a contactor.
    pub fn index_of(&self, contactor: &ContactorRef) -> Option<usize> {
        self.spans
            .iter()
            .find(|s| s.group == contactor.group && contactor.output < s.len)
            .map(|s| s.offset + contactor.output)
    }

    /// Contactor at a flat index.
    pub fn at_index(&self, index: usize) -> Option<ContactorRef> {
        self.spans
            .iter()
            .find(|s| (s.offset..s.offset + s.len).contains(&index))
            .map(|s| ContactorRef::new(s.group.clone(), index - s.offset))
    }

    /// All contactors in flat index order.
    pub fn entries(&self) -> Vec<ContactorEntry> {
        self.spans
            .iter()
            .flat_map(|s| {
                (0..s.len).map(move |output| ContactorRef::new(s.group.clone(), output))
            })
            .enumerate()
            .map(|(index, contactor)| ContactorEntry {
                index,
                closed: self.is_closed(&contactor),
                contactor,
            })
            .collect()
    }
}

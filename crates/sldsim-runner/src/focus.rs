//! Zoom mode and the exclusive focus singleton.

use serde::{Deserialize, Serialize};
use sldsim_common::NodeId;

/// Which presentation of a node an operator is acting on.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Presentation {
    /// The node as drawn on the full diagram.
    #[default]
    Compact,
    /// The focused node's enlarged view.
    Expanded,
}

/// A node entered or left its expanded presentation.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ZoomChange {
    /// Node whose presentation changed.
    pub node: NodeId,
    /// Whether it is now expanded.
    pub zoomed: bool,
}

/// Tracks zoom mode and at most one focused node.
#[derive(Debug, Clone, Default)]
pub struct FocusTracker {
    zoom_mode: bool,
    focus: Option<NodeId>,
}

impl FocusTracker {
    /// Create a tracker with zoom mode off and nothing focused.
    pub fn new() -> Self {
        Self::default()
    }

    /// Whether zoom mode is on.
    pub fn zoom_mode(&self) -> bool {
        self.zoom_mode
    }

    /// Set zoom mode. Returns `true` if it changed. Focus is left untouched.
    pub fn set_zoom_mode(&mut self, on: bool) -> bool {
        std::mem::replace(&mut self.zoom_mode, on) != on
    }

    /// The focused node, if any.
    pub fn focus(&self) -> Option<&NodeId> {
        self.focus.as_ref()
    }

    /// Focus `node`, superseding any previous focus.
    ///
    /// Returns the presentation changes in the order they take effect.
    pub fn set_focus(&mut self, node: NodeId) -> Vec<ZoomChange> {
        if self.focus.as_ref() == Some(&node) {
            return Vec::new();
        }
        let mut changes = Vec::with_capacity(2);
        if let Some(previous) = self.focus.take() {
            changes.push(ZoomChange {
                node: previous,
                zoomed: false,
            });
        }
        changes.push(ZoomChange {
            node: node.clone(),
            zoomed: true,
        });
        self.focus = Some(node);
        changes
    }

    /// Clear the focus.
    pub fn clear(&mut self) -> Option<ZoomChange> {
        self.focus.take().map(|node| ZoomChange {
            node,
            zoomed: false,
        })
    }

    /// Another node holds the focus.
    pub fn is_blurred(&self, node: &NodeId) -> bool {
        matches!(&self.focus, Some(f) if f != node)
    }

    /// The node is shown expanded.
    pub fn is_expanded(&self, node: &NodeId) -> bool {
        self.focus.as_ref() == Some(node)
    }

    /// Presentation a node is currently shown in.
    pub fn presentation_of(&self, node: &NodeId) -> Presentation {
        if self.is_expanded(node) {
            Presentation::Expanded
        } else {
            Presentation::Compact
        }
    }
}

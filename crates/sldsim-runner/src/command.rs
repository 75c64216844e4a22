//! Operator commands and their text form.
//!
//! One command per line:
//!
//! ```text
//! supply on|off|toggle
//! toggle <NODE>.<SWITCH>[@expanded|@compact]
//! zoom-mode on|off
//! click <NODE>
//! focus <NODE>
//! close
//! ```
//!
//! Blank lines and lines starting with `#` are ignored in scripts.

use crate::focus::{Presentation, ZoomChange};
use crate::RunnerError;
use serde::Serialize;
use sldsim_common::{NodeId, RejectReason, SwitchChange, SwitchRef};
use std::fmt;
use std::str::FromStr;

/// What to do with the master supply.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SupplyAction {
    /// Switch the supply on.
    On,
    /// Switch the supply off.
    Off,
    /// Flip the supply.
    Toggle,
}

/// One operator action.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Command {
    /// Operate the master supply.
    Supply(SupplyAction),
    /// Toggle one switch through a presentation.
    Toggle {
        /// Addressed switch.
        switch: SwitchRef,
        /// Presentation the operator clicked in.
        presentation: Presentation,
    },
    /// Turn zoom mode on or off.
    ZoomMode(bool),
    /// Click a node's diagram (focuses it while zoom mode is on).
    Click(NodeId),
    /// Focus a node directly, superseding any previous focus.
    Focus(NodeId),
    /// Close the expanded view.
    Close,
}

fn parse_on_off(word: Option<&str>, line: &str) -> Result<bool, RunnerError> {
    match word {
        Some("on") => Ok(true),
        Some("off") => Ok(false),
        _ => Err(RunnerError::InvalidCommand(line.to_string())),
    }
}

impl FromStr for Command {
    type Err = RunnerError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let line = s.trim();
        let invalid = || RunnerError::InvalidCommand(line.to_string());
        let mut words = line.split_whitespace();
        let verb = words.next().ok_or_else(invalid)?;
        let arg = words.next();
        if words.next().is_some() {
            return Err(invalid());
        }

        match verb {
            "supply" => match arg {
                Some("toggle") => Ok(Command::Supply(SupplyAction::Toggle)),
                other => parse_on_off(other, line).map(|on| {
                    Command::Supply(if on { SupplyAction::On } else { SupplyAction::Off })
                }),
            },
            "toggle" => {
                let target = arg.ok_or_else(invalid)?;
                let (switch, presentation) = match target.split_once('@') {
                    Some((switch, "expanded")) => (switch, Presentation::Expanded),
                    Some((switch, "compact")) => (switch, Presentation::Compact),
                    Some(_) => return Err(invalid()),
                    None => (target, Presentation::Compact),
                };
                Ok(Command::Toggle {
                    switch: switch.parse()?,
                    presentation,
                })
            }
            "zoom-mode" => parse_on_off(arg, line).map(Command::ZoomMode),
            "click" => Ok(Command::Click(NodeId::new(arg.ok_or_else(invalid)?))),
            "focus" => Ok(Command::Focus(NodeId::new(arg.ok_or_else(invalid)?))),
            "close" if arg.is_none() => Ok(Command::Close),
            _ => Err(invalid()),
        }
    }
}

impl fmt::Display for Command {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Command::Supply(SupplyAction::On) => write!(f, "supply on"),
            Command::Supply(SupplyAction::Off) => write!(f, "supply off"),
            Command::Supply(SupplyAction::Toggle) => write!(f, "supply toggle"),
            Command::Toggle {
                switch,
                presentation: Presentation::Compact,
            } => write!(f, "toggle {}", switch),
            Command::Toggle {
                switch,
                presentation: Presentation::Expanded,
            } => write!(f, "toggle {}@expanded", switch),
            Command::ZoomMode(on) => write!(f, "zoom-mode {}", if *on { "on" } else { "off" }),
            Command::Click(node) => write!(f, "click {}", node),
            Command::Focus(node) => write!(f, "focus {}", node),
            Command::Close => write!(f, "close"),
        }
    }
}

/// Parse a command script.
pub fn parse_script(text: &str) -> Result<Vec<Command>, RunnerError> {
    text.lines()
        .map(str::trim)
        .filter(|line| !line.is_empty() && !line.starts_with('#'))
        .map(str::parse)
        .collect()
}

/// Both breaker positions reported by an MCCB pair.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct PairReport {
    /// Reporting pair.
    pub node: NodeId,
    /// Left breaker closed.
    pub left: bool,
    /// Right breaker closed.
    pub right: bool,
}

/// Everything one command caused.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct CommandOutcome {
    /// The command, in text form.
    pub command: String,
    /// Whether the command changed anything the operator asked for.
    pub applied: bool,
    /// Why the command was ignored.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub rejected: Option<RejectReason>,
    /// Switch changes, in the order they were reported.
    pub changes: Vec<SwitchChange>,
    /// MCCB pair reports.
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub pairs: Vec<PairReport>,
    /// Presentation changes.
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub zoom: Vec<ZoomChange>,
}

impl CommandOutcome {
    pub(crate) fn new(command: impl Into<String>) -> Self {
        CommandOutcome {
            command: command.into(),
            ..Self::default()
        }
    }

    pub(crate) fn into_rejected(mut self, reason: RejectReason) -> Self {
        self.applied = false;
        self.rejected = Some(reason);
        self
    }

    /// Last conjunction reported by `pair`, if it reported.
    pub fn pair_report(&self, pair: &NodeId) -> Option<(bool, bool)> {
        self.pairs
            .iter()
            .rev()
            .find(|r| &r.node == pair)
            .map(|r| (r.left, r.right))
    }

    /// Changes reported for one switch.
    pub fn changes_of<'a>(
        &'a self,
        switch: &'a SwitchRef,
    ) -> impl Iterator<Item = &'a SwitchChange> + 'a {
        self.changes.iter().filter(move |c| &c.switch == switch)
    }
}

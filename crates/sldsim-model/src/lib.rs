//! # sldsim-model
//!
//! YAML topology loading and switchboard building for sldsim.
//!
//! This crate provides:
//! - YAML schema types for switchboard topologies
//! - Topology loading from files and strings, with multi-file merging
//! - Validation of the merged topology
//! - The built-in furnace topology ([`FURNACE_TOPOLOGY`])
//! - Switchboard building ([`build_switchboard`])
//!
//! ## Merging
//!
//! Later files override earlier ones: a node with the same name replaces the
//! earlier definition in place (keeping its position), `remove: true` deletes
//! it, and new nodes are appended. Validation runs only on the merged result.
//!
//! ## Example YAML
//!
//! ```yaml
//! pairs:
//!   - name: IGBT-Conv1
//! groups:
//!   - name: FourIGBT-1
//!     outputs: 4
//!     gated_by: [IGBT-Conv1]
//! boards:
//!   - name: IA-RTDB-1
//!     feed: { group: FourIGBT-1, output: 0 }
//!     feeders: [1, 2, 3]
//! ```

use serde::{Deserialize, Serialize};
use sldsim_common::persist::GLOBAL_KEYS;
use sldsim_common::{ContactorRef, NodeId, NodeKind, NodeRegistry};
use sldsim_switchgear::{
    create_contactor_group, create_feeder_board, create_mccb_pair, ContactorGroupConfig,
    FeederBoardConfig, MccbPairConfig,
};
use std::collections::{BTreeMap, BTreeSet, HashSet};
use std::path::Path;
use thiserror::Error;
use tracing::info;

/// The furnace switchboard as drawn on the single-line diagram.
pub const FURNACE_TOPOLOGY: &str = include_str!("../topologies/furnace.yaml");

// ============================================================================
// Error Types
// ============================================================================

/// Errors that can occur during model operations.
#[derive(Debug, Error)]
pub enum ModelError {
    /// YAML parsing error.
    #[error("YAML parse error: {0}")]
    YamlError(#[from] serde_yaml::Error),

    /// Node not found.
    #[error("Node not found: {0}")]
    NodeNotFound(String),

    /// Invalid configuration.
    #[error("Invalid configuration: {0}")]
    InvalidConfig(String),

    /// Duplicate node name.
    #[error("Duplicate node name: {0}")]
    DuplicateNode(String),

    /// A node refers to another node that does not exist or has the wrong kind.
    #[error("Node '{node}' refers to unknown {expected} '{target}'")]
    UnknownReference {
        /// Node holding the reference.
        node: String,
        /// Kind of node that was expected.
        expected: &'static str,
        /// Referenced name.
        target: String,
    },

    /// A board is fed from an output the group does not have.
    #[error("Board '{board}' is fed from {group} output {output}, but the group has {available} outputs")]
    InvalidFeed {
        /// Board name.
        board: String,
        /// Feeding group.
        group: String,
        /// Requested output.
        output: usize,
        /// Outputs the group actually has.
        available: usize,
    },

    /// Two nodes would write the same storage key.
    #[error("Storage key '{0}' is used by more than one node")]
    DuplicateStorageKey(String),

    /// IO error.
    #[error("IO error: {0}")]
    IoError(#[from] std::io::Error),
}

// ============================================================================
// YAML Schema
// ============================================================================

/// Top-level topology file.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct TopologyYaml {
    /// MCCB pairs.
    #[serde(default)]
    pub pairs: Vec<PairYaml>,
    /// Contactor groups.
    #[serde(default)]
    pub groups: Vec<GroupYaml>,
    /// Feeder boards.
    #[serde(default)]
    pub boards: Vec<BoardYaml>,
}

/// MCCB pair definition.
#[derive(Debug, Clone, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct PairYaml {
    /// Node name.
    pub name: String,
    /// Storage key prefix. Defaults to the name without dashes.
    #[serde(default)]
    pub storage_prefix: Option<String>,
    /// Remove a node defined by an earlier file.
    #[serde(default)]
    pub remove: bool,
}

/// Contactor group definition.
#[derive(Debug, Clone, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct GroupYaml {
    /// Node name.
    pub name: String,
    /// Storage key prefix. Defaults to the name without dashes.
    #[serde(default)]
    pub storage_prefix: Option<String>,
    /// Number of output contactors.
    #[serde(default)]
    pub outputs: Option<usize>,
    /// MCCB pairs whose conjunction feeds the isolator (any one suffices).
    /// Defaults to every pair.
    #[serde(default)]
    pub gated_by: Option<Vec<String>>,
    /// Remove a node defined by an earlier file.
    #[serde(default)]
    pub remove: bool,
}

/// Feed of a feeder board.
#[derive(Debug, Clone, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct FeedYaml {
    /// Contactor group name.
    pub group: String,
    /// Output index within the group.
    pub output: usize,
}

/// Feeder board definition.
#[derive(Debug, Clone, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct BoardYaml {
    /// Node name.
    pub name: String,
    /// Storage key prefix. Defaults to the name.
    #[serde(default)]
    pub storage_prefix: Option<String>,
    /// Output contactor feeding the board.
    #[serde(default)]
    pub feed: Option<FeedYaml>,
    /// Terminal numbers of the feeder switches.
    #[serde(default)]
    pub feeders: Option<Vec<u16>>,
    /// Remove a node defined by an earlier file.
    #[serde(default)]
    pub remove: bool,
}

trait Named {
    fn name(&self) -> &str;
    fn removed(&self) -> bool;
}

impl Named for PairYaml {
    fn name(&self) -> &str {
        &self.name
    }
    fn removed(&self) -> bool {
        self.remove
    }
}

impl Named for GroupYaml {
    fn name(&self) -> &str {
        &self.name
    }
    fn removed(&self) -> bool {
        self.remove
    }
}

impl Named for BoardYaml {
    fn name(&self) -> &str {
        &self.name
    }
    fn removed(&self) -> bool {
        self.remove
    }
}

/// Merge `item` into `list` by name.
fn merge_named<T: Named>(list: &mut Vec<T>, item: T) -> Result<(), ModelError> {
    let existing = list.iter().position(|e| e.name() == item.name());
    match (existing, item.removed()) {
        (Some(i), true) => {
            list.remove(i);
        }
        (None, true) => return Err(ModelError::NodeNotFound(item.name().to_string())),
        (Some(i), false) => list[i] = item,
        (None, false) => list.push(item),
    }
    Ok(())
}

// ============================================================================
// Resolved Model
// ============================================================================

/// Resolved MCCB pair.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct PairDef {
    /// Node name.
    pub name: NodeId,
    /// Storage key prefix.
    pub storage_prefix: String,
}

/// Resolved contactor group.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct GroupDef {
    /// Node name.
    pub name: NodeId,
    /// Storage key prefix.
    pub storage_prefix: String,
    /// Number of output contactors.
    pub outputs: usize,
    /// Pairs feeding the isolator.
    pub gated_by: Vec<NodeId>,
}

/// Resolved feeder board.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct BoardDef {
    /// Node name.
    pub name: NodeId,
    /// Storage key prefix.
    pub storage_prefix: String,
    /// Output contactor feeding the board.
    pub feed: ContactorRef,
    /// Terminal numbers of the feeder switches.
    pub feeders: Vec<u16>,
}

/// A loaded and validated topology.
#[derive(Debug, Clone, Serialize)]
pub struct Model {
    pairs: Vec<PairDef>,
    groups: Vec<GroupDef>,
    boards: Vec<BoardDef>,
}

impl Model {
    /// MCCB pairs in declaration order.
    pub fn pairs(&self) -> &[PairDef] {
        &self.pairs
    }

    /// Contactor groups in declaration order.
    pub fn groups(&self) -> &[GroupDef] {
        &self.groups
    }

    /// Feeder boards in declaration order.
    pub fn boards(&self) -> &[BoardDef] {
        &self.boards
    }

    /// Total number of nodes.
    pub fn node_count(&self) -> usize {
        self.pairs.len() + self.groups.len() + self.boards.len()
    }

    fn validate(&self) -> Result<(), ModelError> {
        let mut names = HashSet::new();
        let all_names = self
            .pairs
            .iter()
            .map(|p| &p.name)
            .chain(self.groups.iter().map(|g| &g.name))
            .chain(self.boards.iter().map(|b| &b.name));
        for name in all_names {
            let text = name.as_str();
            if text.is_empty() || text.contains('.') || text.chars().any(char::is_whitespace) {
                return Err(ModelError::InvalidConfig(format!(
                    "node name '{}' must be non-empty without dots or whitespace",
                    text
                )));
            }
            if !names.insert(text) {
                return Err(ModelError::DuplicateNode(text.to_string()));
            }
        }

        let pair_names: HashSet<&NodeId> = self.pairs.iter().map(|p| &p.name).collect();
        for group in &self.groups {
            if group.outputs == 0 {
                return Err(ModelError::InvalidConfig(format!(
                    "group '{}' must have at least one output",
                    group.name
                )));
            }
            if let Some(unknown) = group.gated_by.iter().find(|p| !pair_names.contains(p)) {
                return Err(ModelError::UnknownReference {
                    node: group.name.to_string(),
                    expected: "MCCB pair",
                    target: unknown.to_string(),
                });
            }
        }

        let group_outputs: BTreeMap<&NodeId, usize> =
            self.groups.iter().map(|g| (&g.name, g.outputs)).collect();
        for board in &self.boards {
            let available = *group_outputs.get(&board.feed.group).ok_or_else(|| {
                ModelError::UnknownReference {
                    node: board.name.to_string(),
                    expected: "contactor group",
                    target: board.feed.group.to_string(),
                }
            })?;
            if board.feed.output >= available {
                return Err(ModelError::InvalidFeed {
                    board: board.name.to_string(),
                    group: board.feed.group.to_string(),
                    output: board.feed.output,
                    available,
                });
            }
            if board.feeders.is_empty() {
                return Err(ModelError::InvalidConfig(format!(
                    "board '{}' has no feeders",
                    board.name
                )));
            }
            let unique: BTreeSet<u16> = board.feeders.iter().copied().collect();
            if unique.len() != board.feeders.len() {
                return Err(ModelError::InvalidConfig(format!(
                    "board '{}' lists a terminal twice",
                    board.name
                )));
            }
        }
        Ok(())
    }
}

fn default_prefix(name: &str) -> String {
    name.replace('-', "")
}

fn resolve(yaml: TopologyYaml) -> Result<Model, ModelError> {
    let all_pairs: Vec<NodeId> = yaml.pairs.iter().map(|p| NodeId::new(&p.name)).collect();

    let pairs = yaml
        .pairs
        .into_iter()
        .map(|p| PairDef {
            storage_prefix: p.storage_prefix.unwrap_or_else(|| default_prefix(&p.name)),
            name: NodeId::new(p.name),
        })
        .collect();

    let groups = yaml
        .groups
        .into_iter()
        .map(|g| {
            let outputs = g.outputs.ok_or_else(|| {
                ModelError::InvalidConfig(format!("group '{}' needs 'outputs'", g.name))
            })?;
            Ok(GroupDef {
                storage_prefix: g.storage_prefix.unwrap_or_else(|| default_prefix(&g.name)),
                outputs,
                gated_by: g
                    .gated_by
                    .map(|names| names.into_iter().map(NodeId::new).collect())
                    .unwrap_or_else(|| all_pairs.clone()),
                name: NodeId::new(g.name),
            })
        })
        .collect::<Result<Vec<_>, ModelError>>()?;

    let boards = yaml
        .boards
        .into_iter()
        .map(|b| {
            let feed = b.feed.ok_or_else(|| {
                ModelError::InvalidConfig(format!("board '{}' needs 'feed'", b.name))
            })?;
            let feeders = b.feeders.ok_or_else(|| {
                ModelError::InvalidConfig(format!("board '{}' needs 'feeders'", b.name))
            })?;
            Ok(BoardDef {
                storage_prefix: b.storage_prefix.unwrap_or_else(|| b.name.clone()),
                feed: ContactorRef::new(NodeId::new(feed.group), feed.output),
                feeders,
                name: NodeId::new(b.name),
            })
        })
        .collect::<Result<Vec<_>, ModelError>>()?;

    let model = Model {
        pairs,
        groups,
        boards,
    };
    model.validate()?;
    Ok(model)
}

// ============================================================================
// Loading
// ============================================================================

/// Load a topology from a YAML file.
pub fn load_model(path: &Path) -> Result<Model, ModelError> {
    load_models(&[path])
}

/// Parse a topology from a YAML string.
pub fn load_model_from_str(yaml_str: &str) -> Result<Model, ModelError> {
    load_models_from_str(&[yaml_str])
}

/// Load the built-in furnace topology.
pub fn furnace_model() -> Result<Model, ModelError> {
    load_model_from_str(FURNACE_TOPOLOGY)
}

/// Load and merge multiple topology files. Later files override earlier ones.
pub fn load_models(paths: &[&Path]) -> Result<Model, ModelError> {
    if paths.is_empty() {
        return Err(ModelError::InvalidConfig("No topology files provided".to_string()));
    }

    let yaml_strings = paths
        .iter()
        .map(std::fs::read_to_string)
        .collect::<Result<Vec<String>, std::io::Error>>()?;
    let yaml_strs: Vec<&str> = yaml_strings.iter().map(|s| s.as_str()).collect();

    load_models_from_str(&yaml_strs)
}

/// Load and merge multiple topology strings. Later strings override earlier ones.
pub fn load_models_from_str(yaml_strs: &[&str]) -> Result<Model, ModelError> {
    if yaml_strs.is_empty() {
        return Err(ModelError::InvalidConfig("No topology strings provided".to_string()));
    }

    let mut merged = TopologyYaml::default();
    for yaml_str in yaml_strs {
        let yaml: TopologyYaml = serde_yaml::from_str(yaml_str)?;
        for pair in yaml.pairs {
            merge_named(&mut merged.pairs, pair)?;
        }
        for group in yaml.groups {
            merge_named(&mut merged.groups, group)?;
        }
        for board in yaml.boards {
            merge_named(&mut merged.boards, board)?;
        }
    }

    resolve(merged)
}

// ============================================================================
// Switchboard Building
// ============================================================================

/// What supplies a node.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum Feed {
    /// Directly from the master supply.
    Supply,
    /// Live while any of these MCCB pairs has both breakers closed.
    AnyPair(Vec<NodeId>),
    /// From one output contactor.
    Contactor(ContactorRef),
}

/// Information about a node for display.
#[derive(Debug, Clone, Serialize)]
pub struct NodeInfo {
    /// Node name.
    pub name: NodeId,
    /// Node kind.
    pub kind: NodeKind,
    /// What supplies it.
    pub feed: Feed,
    /// Number of switches the node owns.
    pub switch_count: usize,
}

/// A switchboard ready to mount.
pub struct BuiltSwitchboard {
    /// Nodes in propagation order: pairs, then groups, then boards.
    pub nodes: NodeRegistry,
    /// Feed of every node.
    pub feeds: BTreeMap<NodeId, Feed>,
    /// Contactor groups and their output counts, in declaration order.
    pub contactor_groups: Vec<(NodeId, usize)>,
    /// Information about each node for display.
    pub node_infos: Vec<NodeInfo>,
}

/// Build a switchboard from a model.
pub fn build_switchboard(model: &Model) -> Result<BuiltSwitchboard, ModelError> {
    let mut nodes = NodeRegistry::new();
    let mut feeds = BTreeMap::new();
    let mut node_infos = Vec::with_capacity(model.node_count());

    for pair in &model.pairs {
        nodes.register(create_mccb_pair(
            pair.name.clone(),
            MccbPairConfig {
                storage_prefix: pair.storage_prefix.clone(),
            },
        ));
        feeds.insert(pair.name.clone(), Feed::Supply);
    }

    for group in &model.groups {
        nodes.register(create_contactor_group(
            group.name.clone(),
            ContactorGroupConfig {
                storage_prefix: group.storage_prefix.clone(),
                outputs: group.outputs,
            },
        ));
        feeds.insert(group.name.clone(), Feed::AnyPair(group.gated_by.clone()));
    }

    for board in &model.boards {
        nodes.register(create_feeder_board(
            board.name.clone(),
            FeederBoardConfig {
                storage_prefix: board.storage_prefix.clone(),
                feeders: board.feeders.clone(),
            },
        ));
        feeds.insert(board.name.clone(), Feed::Contactor(board.feed.clone()));
    }

    let mut keys: HashSet<String> = GLOBAL_KEYS.iter().map(|k| k.to_string()).collect();
    for node in nodes.iter() {
        for key in node.storage_keys() {
            if !keys.insert(key.clone()) {
                return Err(ModelError::DuplicateStorageKey(key));
            }
        }
        node_infos.push(NodeInfo {
            name: node.node_id().clone(),
            kind: node.kind(),
            feed: feeds
                .get(node.node_id())
                .cloned()
                .ok_or_else(|| ModelError::NodeNotFound(node.node_id().to_string()))?,
            switch_count: node.switches().len(),
        });
    }

    info!(
        pairs = model.pairs.len(),
        groups = model.groups.len(),
        boards = model.boards.len(),
        "switchboard built"
    );

    Ok(BuiltSwitchboard {
        nodes,
        feeds,
        contactor_groups: model
            .groups
            .iter()
            .map(|g| (g.name.clone(), g.outputs))
            .collect(),
        node_infos,
    })
}

//! # 带标签迁移系统（Labelled Transition System）
//!
//! 迁移系统 `TS = (S, E, →, s0)` 由状态集合 `S`、事件字母表 `E`、
//! 带标签的弧 `→ ⊆ S × E × S` 与初始状态 `s0` 组成。字母表只包含
//! 实际出现在弧上的标签。事件可以带有可选的 *location* 标注，用于
//! 要求合成出的网可分布（每个库所的消费者位于同一位置）。
//!
//! 存储基于 `petgraph::graph::DiGraph`：节点权重为状态名，边权重为标签。
//! 出/入弧按插入顺序返回，保证生成树等算法的结果稳定。

pub mod factorize;
pub mod parse;
pub mod unfolding;

use std::collections::{BTreeSet, VecDeque};
use std::fmt::Write as FmtWrite;

use indexmap::{IndexMap, IndexSet};
use petgraph::Direction;
use petgraph::graph::{DiGraph, EdgeIndex, NodeIndex};
use petgraph::visit::EdgeRef;
use serde::{Deserialize, Serialize};
use smallvec::SmallVec;
use thiserror::Error;

pub use factorize::{Factor, Factorization, factorize};
pub use parse::parse_lts;
pub use unfolding::{UnfoldingError, limited_unfolding};

pub type StateId = NodeIndex;
pub type ArcId = EdgeIndex;

#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum TsError {
    #[error("unknown state `{0}`")]
    UnknownState(String),
    #[error("duplicate state `{0}`")]
    DuplicateState(String),
    #[error("state `{state}` has several successors under label `{label}`")]
    NonDeterministic { state: String, label: String },
    #[error("transition system has no initial state")]
    MissingInitial,
    #[error("parse error at line {line}: {message}")]
    Parse { line: usize, message: String },
}

/// Borrowed view of one arc.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ArcRef<'a> {
    pub id: ArcId,
    pub source: StateId,
    pub target: StateId,
    pub label: &'a str,
}

type ArcList<'a> = SmallVec<[ArcRef<'a>; 4]>;

#[derive(Debug, Clone)]
pub struct TransitionSystem {
    name: String,
    graph: DiGraph<String, String>,
    names: IndexMap<String, StateId>,
    initial: StateId,
    locations: IndexMap<String, String>,
}

impl TransitionSystem {
    /// Creates a transition system containing only its initial state.
    pub fn new(initial: impl Into<String>) -> Self {
        let initial = initial.into();
        let mut graph = DiGraph::new();
        let id = graph.add_node(initial.clone());
        let mut names = IndexMap::new();
        names.insert(initial, id);
        Self {
            name: String::new(),
            graph,
            names,
            initial: id,
            locations: IndexMap::new(),
        }
    }

    pub fn with_name(mut self, name: impl Into<String>) -> Self {
        self.name = name.into();
        self
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    /// Adds a state; an existing state with the same name is returned unchanged.
    pub fn add_state(&mut self, name: impl Into<String>) -> StateId {
        let name = name.into();
        if let Some(&id) = self.names.get(&name) {
            return id;
        }
        let id = self.graph.add_node(name.clone());
        self.names.insert(name, id);
        id
    }

    pub fn add_arc(&mut self, source: StateId, label: impl Into<String>, target: StateId) -> ArcId {
        self.graph.add_edge(source, target, label.into())
    }

    /// Adds an arc between named states, creating the states on demand.
    pub fn add_arc_named(&mut self, source: &str, label: &str, target: &str) -> ArcId {
        let source = self.add_state(source);
        let target = self.add_state(target);
        self.add_arc(source, label, target)
    }

    pub fn initial(&self) -> StateId {
        self.initial
    }

    pub fn set_initial(&mut self, state: StateId) {
        self.initial = state;
    }

    pub fn state_name(&self, state: StateId) -> &str {
        self.graph
            .node_weight(state)
            .map(String::as_str)
            .unwrap_or("<unknown>")
    }

    pub fn find_state(&self, name: &str) -> Option<StateId> {
        self.names.get(name).copied()
    }

    pub fn state(&self, name: &str) -> Result<StateId, TsError> {
        self.find_state(name)
            .ok_or_else(|| TsError::UnknownState(name.to_string()))
    }

    pub fn states(&self) -> impl Iterator<Item = StateId> + '_ {
        self.graph.node_indices()
    }

    pub fn state_count(&self) -> usize {
        self.graph.node_count()
    }

    pub fn arc_count(&self) -> usize {
        self.graph.edge_count()
    }

    pub fn arc(&self, id: ArcId) -> Option<ArcRef<'_>> {
        let (source, target) = self.graph.edge_endpoints(id)?;
        let label = self.graph.edge_weight(id)?;
        Some(ArcRef {
            id,
            source,
            target,
            label,
        })
    }

    pub fn arcs(&self) -> impl Iterator<Item = ArcRef<'_>> + '_ {
        self.graph.edge_references().map(|edge| ArcRef {
            id: edge.id(),
            source: edge.source(),
            target: edge.target(),
            label: edge.weight().as_str(),
        })
    }

    /// Outgoing arcs of `state` in insertion order.
    pub fn outgoing(&self, state: StateId) -> ArcList<'_> {
        self.adjacent(state, Direction::Outgoing)
    }

    /// Incoming arcs of `state` in insertion order.
    pub fn incoming(&self, state: StateId) -> ArcList<'_> {
        self.adjacent(state, Direction::Incoming)
    }

    fn adjacent(&self, state: StateId, direction: Direction) -> ArcList<'_> {
        let mut arcs = self
            .graph
            .edges_directed(state, direction)
            .map(|edge| ArcRef {
                id: edge.id(),
                source: edge.source(),
                target: edge.target(),
                label: edge.weight().as_str(),
            })
            .collect::<ArcList<'_>>();
        arcs.sort_by_key(|arc| arc.id);
        arcs
    }

    pub fn successors(&self, state: StateId, label: &str) -> SmallVec<[StateId; 2]> {
        self.outgoing(state)
            .into_iter()
            .filter(|arc| arc.label == label)
            .map(|arc| arc.target)
            .collect()
    }

    /// The unique successor under `label`, if the state has exactly one.
    pub fn successor(&self, state: StateId, label: &str) -> Option<StateId> {
        let successors = self.successors(state, label);
        match successors.as_slice() {
            [single] => Some(*single),
            _ => None,
        }
    }

    pub fn is_enabled(&self, state: StateId, label: &str) -> bool {
        self.graph
            .edges_directed(state, Direction::Outgoing)
            .any(|edge| edge.weight() == label)
    }

    /// Labels occurring on arcs, sorted lexicographically.
    pub fn alphabet(&self) -> Vec<String> {
        self.graph
            .edge_weights()
            .map(String::as_str)
            .collect::<BTreeSet<_>>()
            .into_iter()
            .map(str::to_string)
            .collect()
    }

    pub fn check_deterministic(&self) -> Result<(), TsError> {
        for state in self.states() {
            let mut seen = IndexSet::new();
            for arc in self.outgoing(state) {
                if !seen.insert(arc.label) {
                    return Err(TsError::NonDeterministic {
                        state: self.state_name(state).to_string(),
                        label: arc.label.to_string(),
                    });
                }
            }
        }
        Ok(())
    }

    pub fn is_deterministic(&self) -> bool {
        self.check_deterministic().is_ok()
    }

    /// Reachable states in breadth-first order from the initial state.
    pub fn reachable_states(&self) -> Vec<StateId> {
        let mut seen = vec![false; self.state_count()];
        let mut order = Vec::with_capacity(self.state_count());
        let mut queue = VecDeque::new();
        seen[self.initial.index()] = true;
        queue.push_back(self.initial);
        while let Some(state) = queue.pop_front() {
            order.push(state);
            for arc in self.outgoing(state) {
                if !seen[arc.target.index()] {
                    seen[arc.target.index()] = true;
                    queue.push_back(arc.target);
                }
            }
        }
        order
    }

    pub fn is_totally_reachable(&self) -> bool {
        self.reachable_states().len() == self.state_count()
    }

    /// Copy restricted to the states reachable from the initial state.
    pub fn reachable_part(&self) -> TransitionSystem {
        let reachable = self.reachable_states();
        let mut copy = TransitionSystem::new(self.state_name(self.initial)).with_name(&self.name);
        let mut mapping = vec![None; self.state_count()];
        for &state in &reachable {
            mapping[state.index()] = Some(copy.add_state(self.state_name(state)));
        }
        for &state in &reachable {
            for arc in self.outgoing(state) {
                if let (Some(source), Some(target)) =
                    (mapping[arc.source.index()], mapping[arc.target.index()])
                {
                    copy.add_arc(source, arc.label, target);
                }
            }
        }
        copy.locations = self.locations.clone();
        copy
    }

    /// Every reachable state can reach the initial state again.
    pub fn is_reversible(&self) -> bool {
        let reachable = self.reachable_states();
        let mut seen = vec![false; self.state_count()];
        let mut queue = VecDeque::from([self.initial]);
        seen[self.initial.index()] = true;
        while let Some(state) = queue.pop_front() {
            for arc in self.incoming(state) {
                if !seen[arc.source.index()] {
                    seen[arc.source.index()] = true;
                    queue.push_back(arc.source);
                }
            }
        }
        reachable.iter().all(|state| seen[state.index()])
    }

    /// Deterministic persistence: two different enabled labels never disable each
    /// other and their interleavings close a diamond.
    pub fn is_persistent(&self) -> bool {
        for state in self.reachable_states() {
            let out = self.outgoing(state);
            for (i, first) in out.iter().enumerate() {
                for second in out.iter().skip(i + 1) {
                    if first.label == second.label {
                        continue;
                    }
                    let left = self.successor(first.target, second.label);
                    let right = self.successor(second.target, first.label);
                    match (left, right) {
                        (Some(left), Some(right)) if left == right => {}
                        _ => return false,
                    }
                }
            }
        }
        true
    }

    pub fn location(&self, label: &str) -> Option<&str> {
        self.locations.get(label).map(String::as_str)
    }

    pub fn set_location(&mut self, label: impl Into<String>, location: impl Into<String>) {
        self.locations.insert(label.into(), location.into());
    }

    pub fn locations(&self) -> &IndexMap<String, String> {
        &self.locations
    }

    pub fn has_locations(&self) -> bool {
        !self.locations.is_empty()
    }

    /// Structural isomorphism preserving labels and the initial state.
    pub fn is_isomorphic_to(&self, other: &TransitionSystem) -> bool {
        if self.state_count() != other.state_count() || self.arc_count() != other.arc_count() {
            return false;
        }
        let left = self.graph.map(|id, _| id == self.initial, |_, label| label.clone());
        let right = other
            .graph
            .map(|id, _| id == other.initial, |_, label| label.clone());
        petgraph::algo::is_isomorphic_matching(&left, &right, |a, b| a == b, |a, b| a == b)
    }

    pub fn to_dot(&self) -> String {
        let mut dot = String::new();
        let _ = writeln!(&mut dot, "digraph TransitionSystem {{");
        let _ = writeln!(&mut dot, "    node [shape=circle, fontname=\"Helvetica\"];");
        for state in self.states() {
            let style = if state == self.initial {
                ", style=bold"
            } else {
                ""
            };
            let _ = writeln!(
                &mut dot,
                "    s{} [label=\"{}\"{}];",
                state.index(),
                escape_label(self.state_name(state)),
                style
            );
        }
        for arc in self.arcs() {
            let _ = writeln!(
                &mut dot,
                "    s{} -> s{} [label=\"{}\"];",
                arc.source.index(),
                arc.target.index(),
                escape_label(arc.label)
            );
        }
        let _ = writeln!(&mut dot, "}}");
        dot
    }
}

pub(crate) fn escape_label(input: &str) -> String {
    let mut escaped = String::with_capacity(input.len());
    for ch in input.chars() {
        match ch {
            '"' => escaped.push_str("\\\""),
            '\\' => escaped.push_str("\\\\"),
            '\n' => escaped.push_str("\\n"),
            _ => escaped.push(ch),
        }
    }
    escaped
}

/// Serialisable form used for the JSON / RON input formats.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TsDescription {
    #[serde(default)]
    pub name: String,
    pub initial: String,
    #[serde(default)]
    pub states: Vec<String>,
    pub arcs: Vec<ArcDescription>,
    #[serde(default)]
    pub locations: IndexMap<String, String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ArcDescription {
    pub from: String,
    pub label: String,
    pub to: String,
}

impl From<&TransitionSystem> for TsDescription {
    fn from(ts: &TransitionSystem) -> Self {
        Self {
            name: ts.name.clone(),
            initial: ts.state_name(ts.initial).to_string(),
            states: ts.states().map(|s| ts.state_name(s).to_string()).collect(),
            arcs: ts
                .arcs()
                .map(|arc| ArcDescription {
                    from: ts.state_name(arc.source).to_string(),
                    label: arc.label.to_string(),
                    to: ts.state_name(arc.target).to_string(),
                })
                .collect(),
            locations: ts.locations.clone(),
        }
    }
}

impl TryFrom<TsDescription> for TransitionSystem {
    type Error = TsError;

    fn try_from(description: TsDescription) -> Result<Self, Self::Error> {
        let mut ts = TransitionSystem::new(description.initial).with_name(description.name);
        for state in &description.states {
            ts.add_state(state.as_str());
        }
        for arc in &description.arcs {
            let source = ts.state(&arc.from)?;
            let target = ts.state(&arc.to)?;
            ts.add_arc(source, arc.label.as_str(), target);
        }
        ts.locations = description.locations;
        Ok(ts)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn diamond() -> TransitionSystem {
        let mut ts = TransitionSystem::new("s0");
        ts.add_arc_named("s0", "a", "s1");
        ts.add_arc_named("s0", "b", "s2");
        ts.add_arc_named("s1", "b", "s3");
        ts.add_arc_named("s2", "a", "s3");
        ts
    }

    #[test]
    fn alphabet_is_sorted_and_unique() {
        let ts = diamond();
        assert_eq!(ts.alphabet(), vec!["a".to_string(), "b".to_string()]);
    }

    #[test]
    fn outgoing_follows_insertion_order() {
        let ts = diamond();
        let labels = ts
            .outgoing(ts.initial())
            .iter()
            .map(|arc| arc.label)
            .collect::<Vec<_>>();
        assert_eq!(labels, vec!["a", "b"]);
    }

    #[test]
    fn detects_non_determinism() {
        let mut ts = TransitionSystem::new("s");
        ts.add_arc_named("s", "a", "t1");
        ts.add_arc_named("s", "a", "t2");
        assert_eq!(
            ts.check_deterministic(),
            Err(TsError::NonDeterministic {
                state: "s".into(),
                label: "a".into()
            })
        );
    }

    #[test]
    fn reachable_part_drops_isolated_states() {
        let mut ts = diamond();
        ts.add_arc_named("x", "c", "s0");
        assert!(!ts.is_totally_reachable());
        let reachable = ts.reachable_part();
        assert_eq!(reachable.state_count(), 4);
        assert!(reachable.is_totally_reachable());
        assert_eq!(reachable.alphabet(), vec!["a".to_string(), "b".to_string()]);
    }

    #[test]
    fn diamond_is_persistent_but_not_reversible() {
        let ts = diamond();
        assert!(ts.is_persistent());
        assert!(!ts.is_reversible());
    }

    #[test]
    fn isomorphism_respects_initial_state() {
        let mut left = TransitionSystem::new("a0");
        left.add_arc_named("a0", "x", "a1");
        let mut right = TransitionSystem::new("b1");
        right.add_arc_named("b0", "x", "b1");
        assert!(!left.is_isomorphic_to(&right));
        right.set_initial(right.state("b0").unwrap());
        assert!(left.is_isomorphic_to(&right));
    }

    #[test]
    fn description_round_trip_keeps_structure() {
        let mut ts = diamond();
        ts.set_location("a", "left");
        let description = TsDescription::from(&ts);
        let back = TransitionSystem::try_from(description).unwrap();
        assert!(ts.is_isomorphic_to(&back));
        assert_eq!(back.location("a"), Some("left"));
    }
}

//! 运行时：可激发集、发生语义与可达图构造。
use std::collections::VecDeque;
use std::fmt::{self, Write as FmtWrite};

use indexmap::IndexMap;
use thiserror::Error;

use crate::net::ids::{PlaceId, TransitionId};
use crate::net::incidence::Incidence;
use crate::net::index_vec::{Idx, IndexVec};
use crate::net::structure::{Marking, Place, Transition, Weight};
use crate::ts::{StateId, TransitionSystem, escape_label};

#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum FireError {
    #[error("transition {0:?} is out of bounds")]
    OutOfBounds(TransitionId),
    #[error("transition {0:?} is not enabled under the supplied marking")]
    NotEnabled(TransitionId),
    #[error("token count overflow on place {0:?}")]
    Overflow(PlaceId),
    #[error("reachability graph exceeds {0} markings")]
    StateLimit(usize),
}

#[derive(Clone, serde::Serialize, serde::Deserialize)]
pub struct Net {
    pub places: IndexVec<PlaceId, Place>,
    pub transitions: IndexVec<TransitionId, Transition>,
    pub pre: Incidence<u64>,
    pub post: Incidence<u64>,
}

/// Reachability graph of a net as a transition system; state `i` has marking `markings[i]`.
#[derive(Debug, Clone)]
pub struct ReachabilityGraph {
    pub ts: TransitionSystem,
    pub markings: Vec<Marking>,
}

impl ReachabilityGraph {
    pub fn marking(&self, state: StateId) -> &Marking {
        &self.markings[state.index()]
    }
}

impl fmt::Debug for Net {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Net")
            .field("places", &self.places)
            .field("transitions", &self.transitions)
            .field("pre", &self.pre)
            .field("post", &self.post)
            .finish()
    }
}

impl Net {
    pub fn empty() -> Self {
        Self {
            places: IndexVec::new(),
            transitions: IndexVec::new(),
            pre: Incidence::new(0, 0, 0u64),
            post: Incidence::new(0, 0, 0u64),
        }
    }

    pub fn add_place(&mut self, place: Place) -> PlaceId {
        let place_id = self.places.push(place);
        self.pre.push_place_with_default(0);
        self.post.push_place_with_default(0);
        place_id
    }

    pub fn add_transition(&mut self, transition: Transition) -> TransitionId {
        let transition_id = self.transitions.push(transition);
        self.pre.push_transition_with_default(0);
        self.post.push_transition_with_default(0);
        transition_id
    }

    pub fn set_input_weight(&mut self, place: PlaceId, transition: TransitionId, weight: Weight) {
        self.pre.set(place, transition, weight);
    }

    pub fn set_output_weight(&mut self, place: PlaceId, transition: TransitionId, weight: Weight) {
        self.post.set(place, transition, weight);
    }

    pub fn input_weight(&self, place: PlaceId, transition: TransitionId) -> Weight {
        *self.pre.get(place, transition)
    }

    pub fn output_weight(&self, place: PlaceId, transition: TransitionId) -> Weight {
        *self.post.get(place, transition)
    }

    pub fn places_len(&self) -> usize {
        self.places.len()
    }

    pub fn transitions_len(&self) -> usize {
        self.transitions.len()
    }

    /// 前集 •t：向 `transition` 输入令牌的库所。
    pub fn preset(&self, transition: TransitionId) -> Vec<PlaceId> {
        self.pre.support_of(transition)
    }

    /// 后集 t•
    pub fn postset(&self, transition: TransitionId) -> Vec<PlaceId> {
        self.post.support_of(transition)
    }

    /// Transitions producing into `place`.
    pub fn place_preset(&self, place: PlaceId) -> Vec<TransitionId> {
        self.post.support_in_row(place)
    }

    /// Transitions consuming from `place`.
    pub fn place_postset(&self, place: PlaceId) -> Vec<TransitionId> {
        self.pre.support_in_row(place)
    }

    pub fn initial_marking(&self) -> Marking {
        Marking(IndexVec::from(
            self.places.iter().map(|p| p.tokens).collect::<Vec<_>>(),
        ))
    }

    pub fn enabled_transitions(&self, marking: &Marking) -> Vec<TransitionId> {
        self.transitions
            .indices()
            .filter(|&transition| self.is_transition_enabled(transition, marking))
            .collect()
    }

    pub fn fire_transition(
        &self,
        marking: &Marking,
        transition: TransitionId,
    ) -> Result<Marking, FireError> {
        if transition.index() >= self.transitions_len() {
            return Err(FireError::OutOfBounds(transition));
        }
        if !self.is_transition_enabled(transition, marking) {
            return Err(FireError::NotEnabled(transition));
        }

        let mut next = marking.clone();
        for place in self.places.indices() {
            let tokens = next.tokens_mut(place);
            let consumed = *tokens - *self.pre.get(place, transition);
            *tokens = consumed
                .checked_add(*self.post.get(place, transition))
                .ok_or(FireError::Overflow(place))?;
        }
        Ok(next)
    }

    pub fn is_transition_enabled(&self, transition: TransitionId, marking: &Marking) -> bool {
        if transition.index() >= self.transitions_len() {
            return false;
        }
        self.pre
            .column(transition)
            .all(|(place, weight)| marking.tokens(place) >= *weight)
    }

    /// Breadth-first exploration of the reachable markings, aborting after `limit` markings.
    pub fn reachability_graph(&self, limit: usize) -> Result<ReachabilityGraph, FireError> {
        let initial = self.initial_marking();
        let mut ts = TransitionSystem::new("m0");
        let mut index: IndexMap<Marking, StateId> = IndexMap::new();
        index.insert(initial.clone(), ts.initial());
        let mut queue = VecDeque::from([(initial, ts.initial())]);

        while let Some((marking, state)) = queue.pop_front() {
            for transition in self.enabled_transitions(&marking) {
                let next = self.fire_transition(&marking, transition)?;
                let target = match index.get(&next) {
                    Some(&target) => target,
                    None => {
                        if index.len() >= limit {
                            return Err(FireError::StateLimit(limit));
                        }
                        let target = ts.add_state(format!("m{}", index.len()));
                        index.insert(next.clone(), target);
                        queue.push_back((next, target));
                        target
                    }
                };
                ts.add_arc(state, self.transitions[transition].name.as_str(), target);
            }
        }

        for transition in self.transitions.iter() {
            if let Some(location) = &transition.location {
                ts.set_location(transition.name.as_str(), location.as_str());
            }
        }
        Ok(ReachabilityGraph {
            ts,
            markings: index.into_keys().collect(),
        })
    }

    pub fn to_dot(&self) -> String {
        let mut dot = String::new();
        let _ = writeln!(&mut dot, "digraph PetriNet {{");
        let _ = writeln!(&mut dot, "    rankdir=LR;");
        let _ = writeln!(&mut dot, "    node [fontname=\"Helvetica\"];");

        for (place_id, place) in self.places.iter_enumerated() {
            let _ = writeln!(
                &mut dot,
                "    place_{} [label=\"{}\\n{}\", shape=circle, style=filled, fillcolor=\"#e3f2fd\"];",
                place_id.index(),
                escape_label(&place.name),
                place.tokens
            );
        }

        for (transition_id, transition) in self.transitions.iter_enumerated() {
            let label = match &transition.location {
                Some(location) => format!(
                    "{}\\n@{}",
                    escape_label(&transition.name),
                    escape_label(location)
                ),
                None => escape_label(&transition.name),
            };
            let _ = writeln!(
                &mut dot,
                "    trans_{} [label=\"{}\", shape=box, style=filled, fillcolor=\"#ffe0b2\"];",
                transition_id.index(),
                label
            );
        }

        let arcs = self
            .pre
            .rows()
            .iter_enumerated()
            .map(|(place, row)| (place, row, true))
            .chain(
                self.post
                    .rows()
                    .iter_enumerated()
                    .map(|(place, row)| (place, row, false)),
            );
        for (place_id, row, consuming) in arcs {
            for (idx, weight) in row.iter().enumerate() {
                if *weight == 0 {
                    continue;
                }
                let (from, to) = if consuming {
                    (format!("place_{}", place_id.index()), format!("trans_{idx}"))
                } else {
                    (format!("trans_{idx}"), format!("place_{}", place_id.index()))
                };
                if *weight == 1 {
                    let _ = writeln!(&mut dot, "    {from} -> {to};");
                } else {
                    let _ = writeln!(&mut dot, "    {from} -> {to} [label=\"{weight}\"];");
                }
            }
        }

        let _ = writeln!(&mut dot, "}}");
        dot
    }
}

impl Default for Net {
    fn default() -> Self {
        Self::empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    /// p0 -a-> p1 -b-> p0 with one token in p0.
    fn cycle() -> (Net, TransitionId, TransitionId) {
        let mut net = Net::empty();
        let p0 = net.add_place(Place::new("p0", 1));
        let p1 = net.add_place(Place::new("p1", 0));
        let a = net.add_transition(Transition::new("a"));
        let b = net.add_transition(Transition::new("b"));
        net.set_input_weight(p0, a, 1);
        net.set_output_weight(p1, a, 1);
        net.set_input_weight(p1, b, 1);
        net.set_output_weight(p0, b, 1);
        (net, a, b)
    }

    #[test]
    fn firing_moves_tokens() {
        let (net, a, b) = cycle();
        let m0 = net.initial_marking();
        assert_eq!(net.enabled_transitions(&m0), vec![a]);
        assert_eq!(net.fire_transition(&m0, b), Err(FireError::NotEnabled(b)));
        let m1 = net.fire_transition(&m0, a).unwrap();
        assert_eq!(m1.tokens(PlaceId::new(1)), 1);
        assert_eq!(net.preset(a), vec![PlaceId::new(0)]);
        assert_eq!(net.place_postset(PlaceId::new(1)), vec![b]);
    }

    #[test]
    fn reachability_graph_of_cycle() {
        let (net, _, _) = cycle();
        let graph = net.reachability_graph(16).unwrap();
        assert_eq!(graph.ts.state_count(), 2);
        assert_eq!(graph.ts.arc_count(), 2);
        assert_eq!(graph.marking(graph.ts.initial()), &net.initial_marking());

        let mut expected = TransitionSystem::new("x");
        expected.add_arc_named("x", "a", "y");
        expected.add_arc_named("y", "b", "x");
        assert!(graph.ts.is_isomorphic_to(&expected));
    }

    #[test]
    fn unbounded_net_hits_the_limit() {
        let mut net = Net::empty();
        let p = net.add_place(Place::new("p", 0));
        let t = net.add_transition(Transition::new("grow"));
        net.set_output_weight(p, t, 1);
        assert_eq!(net.reachability_graph(5).unwrap_err(), FireError::StateLimit(5));
    }

    #[test]
    fn dot_mentions_weights() {
        let (mut net, a, _) = cycle();
        net.set_input_weight(PlaceId::new(0), a, 2);
        let dot = net.to_dot();
        assert!(dot.contains("place_0 -> trans_0 [label=\"2\"];"));
        assert!(dot.contains("trans_1 -> place_0;"));
    }
}

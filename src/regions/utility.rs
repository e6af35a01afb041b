//! 区域工具：对一个 TS 构造一次，之后只读（区域基延迟计算并缓存）。
//!
//! 生成树为从初始状态出发的 BFS 树，出弧按插入顺序遍历，因此结果稳定。
//! 不在生成树上的弧称为弦（chord），其 Parikh 差向量构成区域基的齐次方程组。
use std::collections::VecDeque;
use std::convert::Infallible;

use indexmap::IndexSet;
use num::{BigInt, Signed, Zero};
use once_cell::unsync::OnceCell;
use smallvec::SmallVec;

use crate::cancel::{CancelToken, Interrupted};
use crate::regions::basis::integer_kernel_basis_with;
use crate::regions::region::normal_initial_marking;
use crate::regions::{Region, RegionError};
use crate::ts::{ArcId, StateId, TransitionSystem};

/// Arc between two reachable states with its label resolved to an event index.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct EventArc {
    pub id: ArcId,
    pub source: StateId,
    pub event: usize,
    pub target: StateId,
}

#[derive(Debug)]
pub struct RegionUtility {
    ts: TransitionSystem,
    events: IndexSet<String>,
    reachable: Vec<StateId>,
    /// Position of each state (by index) in `reachable`.
    position: Vec<Option<usize>>,
    parikh: Vec<Vec<i64>>,
    tree_arc: Vec<Option<ArcId>>,
    chords: Vec<ArcId>,
    arcs: Vec<EventArc>,
    enabled: Vec<SmallVec<[usize; 4]>>,
    basis: OnceCell<Vec<Region>>,
}

impl RegionUtility {
    pub fn new(ts: TransitionSystem) -> Self {
        let Ok(utility) = Self::build(ts, || Ok::<(), Infallible>(()));
        utility
    }

    /// Same as [`RegionUtility::new`], polling `cancel` once per visited state.
    pub fn new_cancellable(ts: TransitionSystem, cancel: &CancelToken) -> Result<Self, Interrupted> {
        Self::build(ts, || cancel.check())
    }

    fn build<E>(ts: TransitionSystem, mut poll: impl FnMut() -> Result<(), E>) -> Result<Self, E> {
        let events = ts.alphabet().into_iter().collect::<IndexSet<_>>();
        let n = events.len();

        let mut position = vec![None; ts.state_count()];
        let mut tree_arc = vec![None; ts.state_count()];
        let mut reachable = Vec::with_capacity(ts.state_count());
        let mut parikh: Vec<Vec<i64>> = Vec::with_capacity(ts.state_count());
        let mut is_tree = vec![false; ts.arc_count()];

        position[ts.initial().index()] = Some(0);
        reachable.push(ts.initial());
        parikh.push(vec![0; n]);
        let mut queue = VecDeque::from([ts.initial()]);
        while let Some(state) = queue.pop_front() {
            poll()?;
            let base = position[state.index()].unwrap_or_default();
            for arc in ts.outgoing(state) {
                if position[arc.target.index()].is_some() {
                    continue;
                }
                let Some(event) = events.get_index_of(arc.label) else {
                    continue;
                };
                let mut vector = parikh[base].clone();
                vector[event] += 1;
                position[arc.target.index()] = Some(reachable.len());
                tree_arc[arc.target.index()] = Some(arc.id);
                is_tree[arc.id.index()] = true;
                reachable.push(arc.target);
                parikh.push(vector);
                queue.push_back(arc.target);
            }
        }

        let mut arcs = Vec::new();
        let mut chords = Vec::new();
        let mut enabled = vec![SmallVec::new(); reachable.len()];
        for &state in &reachable {
            poll()?;
            for arc in ts.outgoing(state) {
                let Some(event) = events.get_index_of(arc.label) else {
                    continue;
                };
                arcs.push(EventArc {
                    id: arc.id,
                    source: arc.source,
                    event,
                    target: arc.target,
                });
                if !is_tree[arc.id.index()] {
                    chords.push(arc.id);
                }
                let slot: &mut SmallVec<[usize; 4]> =
                    &mut enabled[position[state.index()].unwrap_or_default()];
                if !slot.contains(&event) {
                    slot.push(event);
                }
            }
        }

        log::debug!(
            "region utility: {} events, {} reachable states, {} chords",
            n,
            reachable.len(),
            chords.len()
        );

        Ok(Self {
            ts,
            events,
            reachable,
            position,
            parikh,
            tree_arc,
            chords,
            arcs,
            enabled,
            basis: OnceCell::new(),
        })
    }

    pub fn ts(&self) -> &TransitionSystem {
        &self.ts
    }

    pub fn state_name(&self, state: StateId) -> &str {
        self.ts.state_name(state)
    }

    pub fn event_count(&self) -> usize {
        self.events.len()
    }

    pub fn events(&self) -> impl Iterator<Item = &str> + '_ {
        self.events.iter().map(String::as_str)
    }

    pub fn event_index(&self, label: &str) -> Option<usize> {
        self.events.get_index_of(label)
    }

    pub fn event_label(&self, event: usize) -> &str {
        self.events
            .get_index(event)
            .map(String::as_str)
            .unwrap_or("<unknown>")
    }

    pub fn event_location(&self, event: usize) -> Option<&str> {
        self.ts.location(self.event_label(event))
    }

    /// Reachable states in spanning-tree (breadth-first) order.
    pub fn reachable_states(&self) -> &[StateId] {
        &self.reachable
    }

    pub fn position(&self, state: StateId) -> Option<usize> {
        self.position.get(state.index()).copied().flatten()
    }

    pub fn is_reachable(&self, state: StateId) -> bool {
        self.position(state).is_some()
    }

    fn require_position(&self, state: StateId) -> Result<usize, RegionError> {
        self.position(state)
            .ok_or_else(|| RegionError::Unreachable(self.ts.state_name(state).to_string()))
    }

    pub fn reaching_parikh_vector(&self, state: StateId) -> Result<&[i64], RegionError> {
        let position = self.require_position(state)?;
        Ok(&self.parikh[position])
    }

    pub fn tree_arc(&self, state: StateId) -> Option<ArcId> {
        self.tree_arc.get(state.index()).copied().flatten()
    }

    pub fn chords(&self) -> &[ArcId] {
        &self.chords
    }

    /// `P(s) - P(s') + unit(e)` for the arc `s --e--> s'`; zero on tree arcs.
    pub fn parikh_vector_for_edge(&self, id: ArcId) -> Result<Vec<i64>, RegionError> {
        let Some(arc) = self.ts.arc(id) else {
            return Err(RegionError::Unreachable(format!("arc {}", id.index())));
        };
        let event = self
            .event_index(arc.label)
            .ok_or_else(|| RegionError::MissingLabel(arc.label.to_string()))?;
        let source = self.reaching_parikh_vector(arc.source)?;
        let target = self.reaching_parikh_vector(arc.target)?;
        let mut vector = source
            .iter()
            .zip(target.iter())
            .map(|(s, t)| s - t)
            .collect::<Vec<_>>();
        vector[event] += 1;
        Ok(vector)
    }

    /// All arcs whose source is reachable.
    pub fn arcs(&self) -> &[EventArc] {
        &self.arcs
    }

    pub fn enabled_events(&self, state: StateId) -> &[usize] {
        self.position(state)
            .map(|position| self.enabled[position].as_slice())
            .unwrap_or(&[])
    }

    pub fn is_enabled(&self, state: StateId, event: usize) -> bool {
        self.enabled_events(state).contains(&event)
    }

    /// Every event/state separation instance: a reachable state and an event disabled there.
    pub fn event_state_problems(&self) -> Vec<(StateId, usize)> {
        let mut problems = Vec::new();
        for &state in &self.reachable {
            for event in 0..self.event_count() {
                if !self.is_enabled(state, event) {
                    problems.push((state, event));
                }
            }
        }
        problems
    }

    /// Pure regions generating every region of the TS, each with its normal initial marking.
    pub fn region_basis(&self) -> &[Region] {
        let Ok(basis) = self
            .basis
            .get_or_try_init(|| self.compute_basis(|| Ok::<(), Infallible>(())));
        basis
    }

    /// Computes and caches [`RegionUtility::region_basis`], polling `cancel` per chord.
    pub fn prepare_basis(&self, cancel: &CancelToken) -> Result<&[Region], Interrupted> {
        self.basis
            .get_or_try_init(|| self.compute_basis(|| cancel.check()))
            .map(Vec::as_slice)
    }

    fn compute_basis<E>(&self, mut poll: impl FnMut() -> Result<(), E>) -> Result<Vec<Region>, E> {
        let mut rows = Vec::with_capacity(self.chords.len());
        for &chord in &self.chords {
            poll()?;
            let Ok(vector) = self.parikh_vector_for_edge(chord) else {
                continue;
            };
            if vector.iter().any(|value| *value != 0) {
                rows.push(vector.into_iter().map(BigInt::from).collect::<Vec<_>>());
            }
        }
        let kernel = integer_kernel_basis_with(&rows, self.event_count(), &mut poll)?;
        let basis = kernel
            .into_iter()
            .map(|weights| {
                let backward = weights
                    .iter()
                    .map(|w| if w.is_negative() { -w } else { BigInt::zero() })
                    .collect::<Vec<_>>();
                let forward = weights
                    .iter()
                    .map(|w| if w.is_positive() { w.clone() } else { BigInt::zero() })
                    .collect::<Vec<_>>();
                let initial = normal_initial_marking(self, &backward, &forward);
                Region::from_parts(backward, forward, initial)
            })
            .collect::<Vec<_>>();
        log::debug!("region basis has {} elements", basis.len());
        Ok(basis)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    /// s0 -a-> s1 -b-> s2 -c-> s0, plus s1 -d-> s1
    fn cycle() -> TransitionSystem {
        let mut ts = TransitionSystem::new("s0");
        ts.add_arc_named("s0", "a", "s1");
        ts.add_arc_named("s1", "b", "s2");
        ts.add_arc_named("s2", "c", "s0");
        ts.add_arc_named("s1", "d", "s1");
        ts
    }

    #[test]
    fn parikh_vectors_follow_the_tree() {
        let utility = RegionUtility::new(cycle());
        let ts = utility.ts();
        let s0 = ts.initial();
        assert_eq!(utility.reaching_parikh_vector(s0).unwrap(), &[0, 0, 0, 0]);
        for &state in utility.reachable_states() {
            let Some(tree) = utility.tree_arc(state) else {
                continue;
            };
            let arc = ts.arc(tree).unwrap();
            let event = utility.event_index(arc.label).unwrap();
            let mut expected = utility.reaching_parikh_vector(arc.source).unwrap().to_vec();
            expected[event] += 1;
            assert_eq!(utility.reaching_parikh_vector(state).unwrap(), expected.as_slice());
        }
        assert_eq!(utility.chords().len(), 2);
    }

    #[test]
    fn unreachable_state_is_reported() {
        let mut ts = cycle();
        let lonely = ts.add_state("lonely");
        let utility = RegionUtility::new(ts);
        assert_eq!(
            utility.reaching_parikh_vector(lonely),
            Err(RegionError::Unreachable("lonely".into()))
        );
        assert!(utility.enabled_events(lonely).is_empty());
    }

    #[test]
    fn basis_vanishes_on_every_chord() {
        let utility = RegionUtility::new(cycle());
        let basis = utility.region_basis();
        assert!(!basis.is_empty());
        for &chord in utility.chords() {
            let vector = utility.parikh_vector_for_edge(chord).unwrap();
            for region in basis {
                assert!(region.evaluate(&vector).is_zero());
            }
        }
        for region in basis {
            assert!(region.is_pure());
            assert!(region.check_valid(&utility).is_ok());
        }
    }

    #[test]
    fn cancelled_construction_is_interrupted() {
        let cancel = CancelToken::new();
        assert!(RegionUtility::new_cancellable(cycle(), &cancel).is_ok());
        let utility = RegionUtility::new(cycle());
        cancel.cancel();
        assert_eq!(
            RegionUtility::new_cancellable(cycle(), &cancel).err(),
            Some(Interrupted)
        );
        assert_eq!(utility.prepare_basis(&cancel).err(), Some(Interrupted));
        // a computed basis is cached and no longer polls
        let basis = utility.region_basis().len();
        assert_eq!(utility.prepare_basis(&cancel).map(<[Region]>::len), Ok(basis));
    }

    #[test]
    fn event_state_problems_skip_enabled_events() {
        let utility = RegionUtility::new(cycle());
        let problems = utility.event_state_problems();
        let s1 = utility.ts().state("s1").unwrap();
        let b = utility.event_index("b").unwrap();
        assert!(!problems.contains(&(s1, b)));
        // 3 states * 4 events - 4 enabled pairs
        assert_eq!(problems.len(), 8);
    }
}

//! 区域值类型与构造器。
//!
//! [`Region`] 一经构造即不可变；所有代数运算（加权、自环、线性组合、纯化）
//! 在临时的 [`RegionBuilder`] 上完成，最后通过指定初始标识冻结为 `Region`。
use std::fmt;

use num::{BigInt, Signed, Zero};
use serde::{Deserialize, Serialize};

use crate::regions::utility::RegionUtility;
use crate::regions::{InvalidRegion, RegionError};
use crate::ts::StateId;

#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Region {
    backward: Box<[BigInt]>,
    forward: Box<[BigInt]>,
    initial_marking: BigInt,
}

impl Region {
    pub(crate) fn from_parts(backward: Vec<BigInt>, forward: Vec<BigInt>, initial: BigInt) -> Self {
        debug_assert_eq!(backward.len(), forward.len());
        Self {
            backward: backward.into_boxed_slice(),
            forward: forward.into_boxed_slice(),
            initial_marking: initial,
        }
    }

    /// Pure region with effective weights `weights` and the normal initial marking.
    pub fn pure_from_weights(utility: &RegionUtility, weights: &[BigInt]) -> Self {
        let mut builder = RegionBuilder::new(weights.len());
        for (event, weight) in weights.iter().enumerate() {
            builder.add_weight_on(event, weight.clone());
        }
        builder.with_normal_initial_marking(utility)
    }

    pub fn event_count(&self) -> usize {
        self.backward.len()
    }

    pub fn backward(&self, event: usize) -> &BigInt {
        &self.backward[event]
    }

    pub fn forward(&self, event: usize) -> &BigInt {
        &self.forward[event]
    }

    /// Effective weight `forward - backward`.
    pub fn weight(&self, event: usize) -> BigInt {
        &self.forward[event] - &self.backward[event]
    }

    pub fn weights(&self) -> Vec<BigInt> {
        (0..self.event_count()).map(|e| self.weight(e)).collect()
    }

    pub fn initial_marking(&self) -> &BigInt {
        &self.initial_marking
    }

    /// Effect of a Parikh vector: `W · vector`.
    pub fn evaluate(&self, vector: &[i64]) -> BigInt {
        vector
            .iter()
            .enumerate()
            .filter(|(_, count)| **count != 0)
            .fold(BigInt::zero(), |acc, (event, count)| {
                acc + self.weight(event) * BigInt::from(*count)
            })
    }

    pub fn marking_for_state(
        &self,
        utility: &RegionUtility,
        state: StateId,
    ) -> Result<BigInt, RegionError> {
        let parikh = utility.reaching_parikh_vector(state)?;
        Ok(&self.initial_marking + self.evaluate(parikh))
    }

    /// Markings of all reachable states, in the utility's spanning-tree order.
    pub fn markings(&self, utility: &RegionUtility) -> Vec<BigInt> {
        utility
            .reachable_states()
            .iter()
            .filter_map(|&state| self.marking_for_state(utility, state).ok())
            .collect()
    }

    /// Events producing into the place (`forward > 0`).
    pub fn preset(&self) -> impl Iterator<Item = usize> + '_ {
        (0..self.event_count()).filter(|&e| self.forward[e].is_positive())
    }

    /// Events consuming from the place (`backward > 0`).
    pub fn postset(&self) -> impl Iterator<Item = usize> + '_ {
        (0..self.event_count()).filter(|&e| self.backward[e].is_positive())
    }

    pub fn is_pure(&self) -> bool {
        self.backward
            .iter()
            .zip(self.forward.iter())
            .all(|(b, f)| b.is_zero() || f.is_zero())
    }

    pub fn is_plain(&self) -> bool {
        let one = BigInt::from(1);
        self.backward.iter().chain(self.forward.iter()).all(|w| *w <= one)
    }

    pub fn separates_states(
        &self,
        utility: &RegionUtility,
        left: StateId,
        right: StateId,
    ) -> Result<bool, RegionError> {
        Ok(self.marking_for_state(utility, left)? != self.marking_for_state(utility, right)?)
    }

    /// The place prevents `event` in `state`.
    pub fn separates_event(
        &self,
        utility: &RegionUtility,
        state: StateId,
        event: usize,
    ) -> Result<bool, RegionError> {
        Ok(self.marking_for_state(utility, state)? < self.backward[event])
    }

    /// Checks every region invariant and reports the first violation.
    pub fn check_valid(&self, utility: &RegionUtility) -> Result<(), InvalidRegion> {
        if self.event_count() != utility.event_count() || self.forward.len() != self.event_count() {
            return Err(InvalidRegion::WrongArity {
                expected: utility.event_count(),
                found: self.event_count().max(self.forward.len()),
            });
        }
        for event in 0..self.event_count() {
            if self.backward[event].is_negative() || self.forward[event].is_negative() {
                return Err(InvalidRegion::NegativeWeight {
                    event: utility.event_label(event).to_string(),
                });
            }
        }
        if self.initial_marking.is_negative() {
            return Err(InvalidRegion::NegativeInitialMarking(
                self.initial_marking.clone(),
            ));
        }

        for &state in utility.reachable_states() {
            let marking = self.marking_at(utility, state);
            if marking.is_negative() {
                return Err(InvalidRegion::NegativeMarking {
                    state: utility.state_name(state).to_string(),
                    marking,
                });
            }
        }

        for arc in utility.arcs() {
            let from = self.marking_at(utility, arc.source);
            let backward = &self.backward[arc.event];
            if &from < backward {
                return Err(InvalidRegion::PreventedArc {
                    from: utility.state_name(arc.source).to_string(),
                    label: utility.event_label(arc.event).to_string(),
                    to: utility.state_name(arc.target).to_string(),
                    marking: from,
                    backward: backward.clone(),
                });
            }
            let expected = &from + self.weight(arc.event);
            let found = self.marking_at(utility, arc.target);
            if expected != found {
                return Err(InvalidRegion::EffectMismatch {
                    from: utility.state_name(arc.source).to_string(),
                    label: utility.event_label(arc.event).to_string(),
                    to: utility.state_name(arc.target).to_string(),
                    expected,
                    found,
                });
            }
        }
        Ok(())
    }

    fn marking_at(&self, utility: &RegionUtility, state: StateId) -> BigInt {
        // arcs of the utility only connect reachable states
        self.marking_for_state(utility, state)
            .unwrap_or_else(|_| self.initial_marking.clone())
    }

    pub fn with_initial_marking(&self, marking: impl Into<BigInt>) -> Region {
        Region {
            backward: self.backward.clone(),
            forward: self.forward.clone(),
            initial_marking: marking.into(),
        }
    }

    pub fn with_normal_initial_marking(&self, utility: &RegionUtility) -> Region {
        let marking = normal_initial_marking(utility, &self.backward, &self.forward);
        self.with_initial_marking(marking)
    }

    /// Drops side conditions while keeping the effective weights.
    pub fn make_pure(&self) -> Region {
        let mut builder = RegionBuilder::from_region(self);
        builder.make_pure();
        builder.with_initial_marking(self.initial_marking.clone())
    }

    /// Re-expresses this region over `target`, whose labels must all exist in `source`.
    pub fn copy_to_utility(
        &self,
        source: &RegionUtility,
        target: &RegionUtility,
    ) -> Result<Region, RegionError> {
        let mut backward = Vec::with_capacity(target.event_count());
        let mut forward = Vec::with_capacity(target.event_count());
        for label in target.events() {
            let event = source
                .event_index(label)
                .ok_or_else(|| RegionError::MissingLabel(label.to_string()))?;
            backward.push(self.backward[event].clone());
            forward.push(self.forward[event].clone());
        }
        Ok(Region::from_parts(
            backward,
            forward,
            self.initial_marking.clone(),
        ))
    }

    pub fn display_with<'a>(&'a self, utility: &'a RegionUtility) -> RegionDisplay<'a> {
        RegionDisplay {
            region: self,
            utility: Some(utility),
        }
    }
}

/// `{b:a, 2:c} -> {d} [m0 = 1]` style rendering, with event labels when a utility is known.
pub struct RegionDisplay<'a> {
    region: &'a Region,
    utility: Option<&'a RegionUtility>,
}

impl RegionDisplay<'_> {
    fn label(&self, event: usize) -> String {
        match self.utility {
            Some(utility) => utility.event_label(event).to_string(),
            None => format!("e{event}"),
        }
    }

    fn side(&self, f: &mut fmt::Formatter<'_>, weights: &[BigInt]) -> fmt::Result {
        write!(f, "{{")?;
        let mut first = true;
        for (event, weight) in weights.iter().enumerate() {
            if weight.is_zero() {
                continue;
            }
            if !first {
                write!(f, ", ")?;
            }
            first = false;
            if weight == &BigInt::from(1) {
                write!(f, "{}", self.label(event))?;
            } else {
                write!(f, "{}*{}", weight, self.label(event))?;
            }
        }
        write!(f, "}}")
    }
}

impl fmt::Display for RegionDisplay<'_> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        self.side(f, &self.region.backward)?;
        write!(f, " -> ")?;
        self.side(f, &self.region.forward)?;
        write!(f, " [m0 = {}]", self.region.initial_marking)
    }
}

impl fmt::Display for Region {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        RegionDisplay {
            region: self,
            utility: None,
        }
        .fmt(f)
    }
}

/// Smallest initial marking keeping every reachable marking non-negative and no arc prevented.
pub(crate) fn normal_initial_marking(
    utility: &RegionUtility,
    backward: &[BigInt],
    forward: &[BigInt],
) -> BigInt {
    let effect = |state: StateId| -> BigInt {
        utility
            .reaching_parikh_vector(state)
            .map(|parikh| {
                parikh
                    .iter()
                    .enumerate()
                    .fold(BigInt::zero(), |acc, (event, count)| {
                        acc + (&forward[event] - &backward[event]) * BigInt::from(*count)
                    })
            })
            .unwrap_or_default()
    };
    let mut marking = BigInt::zero();
    for &state in utility.reachable_states() {
        let needed = -effect(state);
        if needed > marking {
            marking = needed;
        }
    }
    for arc in utility.arcs() {
        let needed = &backward[arc.event] - effect(arc.source);
        if needed > marking {
            marking = needed;
        }
    }
    marking
}

/// Transient accumulator for region algebra.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RegionBuilder {
    backward: Vec<BigInt>,
    forward: Vec<BigInt>,
}

impl RegionBuilder {
    pub fn new(events: usize) -> Self {
        Self {
            backward: vec![BigInt::zero(); events],
            forward: vec![BigInt::zero(); events],
        }
    }

    pub fn from_region(region: &Region) -> Self {
        Self {
            backward: region.backward.to_vec(),
            forward: region.forward.to_vec(),
        }
    }

    /// Positive `delta` produces into the place, negative consumes from it.
    pub fn add_weight_on(&mut self, event: usize, delta: impl Into<BigInt>) -> &mut Self {
        let delta = delta.into();
        if delta.is_negative() {
            self.backward[event] -= delta;
        } else {
            self.forward[event] += delta;
        }
        self
    }

    /// Side condition: consume and produce `weight` tokens on `event`.
    pub fn add_loop_around(&mut self, event: usize, weight: impl Into<BigInt>) -> &mut Self {
        let weight = weight.into();
        self.backward[event] += &weight;
        self.forward[event] += weight;
        self
    }

    /// Adds `factor` times `other`; a negative factor swaps its backward and forward sides.
    pub fn add_region_with_factor(&mut self, other: &Region, factor: impl Into<BigInt>) -> &mut Self {
        let factor = factor.into();
        let (backward, forward, scale) = if factor.is_negative() {
            (&other.forward, &other.backward, -factor)
        } else {
            (&other.backward, &other.forward, factor)
        };
        for (target, value) in self.backward.iter_mut().zip(backward.iter()) {
            *target += value * &scale;
        }
        for (target, value) in self.forward.iter_mut().zip(forward.iter()) {
            *target += value * &scale;
        }
        self
    }

    pub fn make_pure(&mut self) -> &mut Self {
        for (backward, forward) in self.backward.iter_mut().zip(self.forward.iter_mut()) {
            let common = backward.clone().min(forward.clone());
            *backward -= &common;
            *forward -= common;
        }
        self
    }

    pub fn weight(&self, event: usize) -> BigInt {
        &self.forward[event] - &self.backward[event]
    }

    pub fn with_initial_marking(self, marking: impl Into<BigInt>) -> Region {
        Region::from_parts(self.backward, self.forward, marking.into())
    }

    pub fn with_normal_initial_marking(self, utility: &RegionUtility) -> Region {
        let marking = normal_initial_marking(utility, &self.backward, &self.forward);
        Region::from_parts(self.backward, self.forward, marking)
    }
}

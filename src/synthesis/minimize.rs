//! 区域集合最小化（即库所数最小化）。
//!
//! * 廉价层：对每个分离问题求出能解它的已知区域；唯一解某问题的区域是必需的，
//!   其余问题若未被已选区域覆盖则贪心地选第一个候选；
//! * 约束层：反复询问后端是否存在 `N - 1` 个区域解决全部 ESSP 与当前已知必须分开的状态对，
//!   每次成功后重新计算未分开的状态对并加入约束，直到不可满足。
use std::collections::BTreeSet;

use indexmap::IndexMap;
use itertools::Itertools;
use num::BigInt;

use crate::cancel::{CancelToken, Interrupted};
use crate::config::SynthConfig;
use crate::properties::PnProperties;
use crate::regions::{Region, RegionUtility};
use crate::separation::RegionEncoding;
use crate::solver::{CheckResult, Formula, new_backend};
use crate::ts::StateId;

/// Required regions plus a greedy cover of the remaining separation problems.
pub fn minimize_cheap(
    utility: &RegionUtility,
    regions: &[Region],
    only_events: bool,
    cancel: &CancelToken,
) -> Result<Vec<Region>, Interrupted> {
    let mut solvers: Vec<Vec<usize>> = Vec::new();
    for (state, event) in utility.event_state_problems() {
        cancel.check()?;
        solvers.push(
            regions
                .iter()
                .positions(|r| r.separates_event(utility, state, event).unwrap_or(false))
                .collect(),
        );
    }
    if !only_events {
        let markings = regions
            .iter()
            .map(|r| r.markings(utility))
            .collect::<Vec<_>>();
        let states = utility.reachable_states().len();
        for (left, right) in (0..states).tuple_combinations() {
            cancel.check()?;
            solvers.push(
                markings
                    .iter()
                    .positions(|m| m[left] != m[right])
                    .collect(),
            );
        }
    }

    let mut chosen = solvers
        .iter()
        .filter(|candidates| candidates.len() == 1)
        .map(|candidates| candidates[0])
        .collect::<BTreeSet<_>>();
    for candidates in &solvers {
        if candidates.is_empty() || candidates.iter().any(|c| chosen.contains(c)) {
            continue;
        }
        chosen.insert(candidates[0]);
    }
    let minimal = chosen
        .into_iter()
        .map(|index| regions[index].clone())
        .collect::<Vec<_>>();
    debug_assert!(minimal.iter().all(|r| r.check_valid(utility).is_ok()));
    log::debug!("cheap minimization: {} -> {} regions", regions.len(), minimal.len());
    Ok(minimal)
}

/// Pairs separated by `reference` but not by `candidate`.
fn lost_pairs(
    utility: &RegionUtility,
    candidate: &[Region],
    reference: &[Region],
) -> Vec<(StateId, StateId)> {
    let states = utility.reachable_states();
    let signature = |regions: &[Region], position: usize| -> Vec<BigInt> {
        regions
            .iter()
            .map(|r| {
                r.marking_for_state(utility, states[position])
                    .unwrap_or_default()
            })
            .collect()
    };
    let mut groups: IndexMap<Vec<BigInt>, Vec<usize>> = IndexMap::new();
    for position in 0..states.len() {
        groups
            .entry(signature(candidate, position))
            .or_default()
            .push(position);
    }
    let mut lost = Vec::new();
    for group in groups.values() {
        for (&left, &right) in group.iter().tuple_combinations() {
            if signature(reference, left) != signature(reference, right) {
                lost.push((states[left], states[right]));
            }
        }
    }
    lost
}

/// Backend search for ever smaller region sets, finished by [`minimize_cheap`].
pub fn minimize_with_backend(
    utility: &RegionUtility,
    properties: PnProperties,
    regions: Vec<Region>,
    only_events: bool,
    config: &SynthConfig,
    cancel: &CancelToken,
) -> Result<Vec<Region>, Interrupted> {
    let mut best = minimize_cheap(utility, &regions, only_events, cancel)?;
    let event_problems = utility
        .event_state_problems()
        .into_iter()
        .filter(|&(state, event)| {
            best.iter()
                .any(|r| r.separates_event(utility, state, event).unwrap_or(false))
        })
        .collect::<Vec<_>>();
    let mut known_pairs: Vec<(StateId, StateId)> = Vec::new();

    while !best.is_empty() {
        let target = best.len() - 1;
        let mut backend = new_backend(&config.solver);
        let encodings = (0..target)
            .map(|index| {
                let encoding = RegionEncoding::declare(
                    backend.as_mut(),
                    utility,
                    &properties,
                    &format!("r{index}."),
                );
                backend.assert(encoding.region_constraints(utility));
                backend.assert(encoding.structure_constraints(utility, &properties));
                encoding
            })
            .collect::<Vec<_>>();
        let separate_pair = |left: StateId, right: StateId| {
            Formula::or(
                encodings
                    .iter()
                    .map(|e| e.state_separation(utility, left, right))
                    .collect(),
            )
        };
        for &(state, event) in &event_problems {
            backend.assert(Formula::or(
                encodings
                    .iter()
                    .map(|e| e.event_separation(utility, state, event))
                    .collect(),
            ));
        }
        for &(left, right) in &known_pairs {
            backend.assert(separate_pair(left, right));
        }

        let found = loop {
            cancel.check()?;
            let model = match backend.check(cancel)? {
                CheckResult::Sat(model) => model,
                CheckResult::Unsat => break None,
                CheckResult::Unknown => {
                    log::debug!("backend gave up on {target} regions, keeping {}", best.len());
                    break None;
                }
            };
            let candidate = encodings
                .iter()
                .map(|e| e.region(&model))
                .collect::<Vec<_>>();
            if only_events {
                break Some(candidate);
            }
            let lost = lost_pairs(utility, &candidate, &best);
            if lost.is_empty() {
                break Some(candidate);
            }
            for (left, right) in lost {
                backend.assert(separate_pair(left, right));
                known_pairs.push((left, right));
            }
        };

        let Some(candidate) = found else {
            break;
        };
        if let Some(err) = candidate.iter().find_map(|r| r.check_valid(utility).err()) {
            log::warn!("minimization stopped on an invalid region: {err}");
            break;
        }
        log::info!("found a solution with {} regions", candidate.len());
        best = candidate;
    }
    minimize_cheap(utility, &best, only_events, cancel)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::properties::Structure;
    use crate::regions::RegionBuilder;
    use crate::ts::TransitionSystem;

    /// s0 -a-> s1 -b-> s2
    fn word() -> RegionUtility {
        let mut ts = TransitionSystem::new("s0");
        ts.add_arc_named("s0", "a", "s1");
        ts.add_arc_named("s1", "b", "s2");
        RegionUtility::new(ts)
    }

    fn region(utility: &RegionUtility, weights: &[i64]) -> Region {
        let mut builder = RegionBuilder::new(weights.len());
        for (event, weight) in weights.iter().enumerate() {
            builder.add_weight_on(event, *weight);
        }
        builder.with_normal_initial_marking(utility)
    }

    #[test]
    fn drops_redundant_regions_and_is_idempotent() {
        let utility = word();
        let cancel = CancelToken::new();
        // a -> p -> b, consumed-once by a, produced by b, and a duplicate effect of the first
        let regions = vec![
            region(&utility, &[1, -1]),
            region(&utility, &[-1, 0]),
            region(&utility, &[0, 1]),
            region(&utility, &[2, -2]),
        ];
        let once = minimize_cheap(&utility, &regions, false, &cancel).unwrap();
        assert!(once.len() < regions.len());
        let twice = minimize_cheap(&utility, &once, false, &cancel).unwrap();
        assert_eq!(once.len(), twice.len());
    }

    #[test]
    fn backend_tier_never_grows_the_set() {
        let utility = word();
        let cancel = CancelToken::new();
        let properties = PnProperties::new().with(Structure::PURE);
        let regions = vec![
            region(&utility, &[1, -1]),
            region(&utility, &[-1, 0]),
            region(&utility, &[0, 1]),
        ];
        let cheap = minimize_cheap(&utility, &regions, false, &cancel).unwrap();
        let small = minimize_with_backend(
            &utility,
            properties,
            regions,
            false,
            &SynthConfig::default(),
            &cancel,
        )
        .unwrap();
        assert!(small.len() <= cheap.len());
        assert!(small.iter().all(|r| r.check_valid(&utility).is_ok()));
        for (state, event) in utility.event_state_problems() {
            assert!(small.iter().any(|r| r.separates_event(&utility, state, event).unwrap()));
        }
    }
}

//! 过近似合成：输入无法精确实现时逐步放宽迁移系统。
//!
//! 每一轮在当前 TS 上合成；若有未解实例，则把每个不可分离的状态类合并为一个状态，
//! 并对每个未解的 ESSP `(s, e)` 添加一条通往新逃逸状态的 `e` 弧。
//! 上一轮找到的区域被重新表达到新的 utility 上，仍然有效的作为种子复用。
use std::rc::Rc;

use indexmap::IndexSet;

use crate::cancel::CancelToken;
use crate::config::SynthConfig;
use crate::properties::{PnProperties, Structure};
use crate::regions::RegionUtility;
use crate::synthesis::{SynthesisError, SynthesisFlags, SynthesisResult, Synthesizer};
use crate::ts::{StateId, TransitionSystem};

fn check_supported(ts: &TransitionSystem, properties: &PnProperties) -> Result<(), SynthesisError> {
    let allowed = Structure::PURE | Structure::PLAIN | Structure::TNET | Structure::MARKED_GRAPH;
    if !properties.structure_within(allowed) || properties.k_marking().is_some() {
        return Err(SynthesisError::UnsupportedProperties(format!(
            "overapproximation cannot realize `{properties}`"
        )));
    }
    if ts.has_locations() {
        return Err(SynthesisError::UnsupportedProperties(
            "overapproximation does not support locations".to_string(),
        ));
    }
    Ok(())
}

/// Synthesizes the smallest relaxation of `ts` found by merging and escaping.
///
/// Gives up after `overapproximation.max_iterations` rounds and returns the last
/// (failed) result.
pub fn overapproximate(
    ts: &TransitionSystem,
    properties: PnProperties,
    flags: SynthesisFlags,
    config: &SynthConfig,
    cancel: &CancelToken,
) -> Result<SynthesisResult, SynthesisError> {
    check_supported(ts, &properties)?;
    let flags = flags - SynthesisFlags::QUICK_FAIL - SynthesisFlags::OVERAPPROXIMATE;

    let mut current = ts.reachable_part();
    let mut previous: Option<SynthesisResult> = None;
    let mut round = 0;
    loop {
        let utility = Rc::new(RegionUtility::new_cancellable(current.clone(), cancel)?);
        let seeds = previous
            .as_ref()
            .map(|result| {
                result
                    .regions()
                    .iter()
                    .filter_map(|r| r.copy_to_utility(result.utility(), &utility).ok())
                    .filter(|r| r.check_valid(&utility).is_ok())
                    .collect()
            })
            .unwrap_or_default();
        let result = Synthesizer::new(utility, properties)
            .with_flags(flags)
            .with_config(config.clone())
            .with_cancel(cancel.clone())
            .with_seeds(seeds)
            .run()?;
        if result.is_success() {
            log::info!("overapproximation succeeded after {round} relaxations");
            return Ok(result);
        }
        round += 1;
        if round > config.overapproximation.max_iterations {
            log::warn!(
                "overapproximation gave up after {} relaxations",
                config.overapproximation.max_iterations
            );
            return Ok(result);
        }
        current = relax(&current, &result);
        log::debug!(
            "relaxed to {} states and {} arcs",
            current.state_count(),
            current.arc_count()
        );
        previous = Some(result);
    }
}

/// Merges unseparable classes and adds escape arcs for unsolved event separations.
fn relax(ts: &TransitionSystem, result: &SynthesisResult) -> TransitionSystem {
    let mut representative: Vec<StateId> = ts.states().collect();
    for class in result.failed_state_separation() {
        if let Some((&first, rest)) = class.split_first() {
            for state in rest {
                representative[state.index()] = first;
            }
        }
    }

    let mut relaxed =
        TransitionSystem::new(ts.state_name(representative[ts.initial().index()])).with_name(ts.name());
    for state in ts.states() {
        if representative[state.index()] == state {
            relaxed.add_state(ts.state_name(state));
        }
    }
    let lookup = |relaxed: &mut TransitionSystem, state: StateId| {
        relaxed.add_state(ts.state_name(representative[state.index()]))
    };
    let mut seen: IndexSet<(StateId, String, StateId)> = IndexSet::new();
    for arc in ts.arcs() {
        let source = lookup(&mut relaxed, arc.source);
        let target = lookup(&mut relaxed, arc.target);
        if seen.insert((source, arc.label.to_string(), target)) {
            relaxed.add_arc(source, arc.label, target);
        }
    }

    let utility = result.utility();
    for (&event, states) in result.failed_event_separation() {
        let label = utility.event_label(event);
        for &state in states {
            let source = lookup(&mut relaxed, state);
            if relaxed.is_enabled(source, label) {
                continue;
            }
            let escape = fresh_state(&relaxed, &format!("{}_{label}", relaxed.state_name(source)));
            let escape = relaxed.add_state(escape);
            relaxed.add_arc(source, label, escape);
        }
    }
    relaxed
}

fn fresh_state(ts: &TransitionSystem, base: &str) -> String {
    let mut name = format!("{base}_escape");
    let mut counter = 1;
    while ts.find_state(&name).is_some() {
        name = format!("{base}_escape{counter}");
        counter += 1;
    }
    name
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn merges_nondeterministic_successors() {
        let mut ts = TransitionSystem::new("s");
        ts.add_arc_named("s", "a", "t1");
        ts.add_arc_named("s", "a", "t2");
        ts.add_arc_named("t1", "b", "u");
        let result = overapproximate(
            &ts,
            PnProperties::new(),
            SynthesisFlags::empty(),
            &SynthConfig::default(),
            &CancelToken::new(),
        )
        .unwrap();
        assert!(result.is_success());
        assert_eq!(result.utility().ts().state_count(), 3);
    }

    #[test]
    fn exact_inputs_are_kept() {
        let mut ts = TransitionSystem::new("s0");
        ts.add_arc_named("s0", "a", "s1");
        ts.add_arc_named("s1", "b", "s0");
        ts.add_state("dangling");
        let result = overapproximate(
            &ts,
            PnProperties::new().with(Structure::PURE),
            SynthesisFlags::QUICK_FAIL,
            &SynthConfig::default(),
            &CancelToken::new(),
        )
        .unwrap();
        assert!(result.is_success());
        assert_eq!(result.utility().ts().state_count(), 2);
    }

    #[test]
    fn unguardable_events_get_escape_arcs() {
        // pure nets cannot disable the zero-effect `a` after `b`
        let mut ts = TransitionSystem::new("s0");
        ts.add_arc_named("s0", "a", "s0");
        ts.add_arc_named("s0", "b", "s1");
        let result = overapproximate(
            &ts,
            PnProperties::new().with(Structure::PURE),
            SynthesisFlags::empty(),
            &SynthConfig::default(),
            &CancelToken::new(),
        )
        .unwrap();
        assert!(result.is_success());
        let relaxed = result.utility().ts();
        assert_eq!(relaxed.state_count(), 2);
        assert_eq!(relaxed.arc_count(), 3);
        let after_b = relaxed.successor(relaxed.initial(), "b").unwrap();
        assert_eq!(relaxed.successor(after_b, "a"), Some(after_b));
    }

    #[test]
    fn rejects_unsupported_requests() {
        let ts = TransitionSystem::new("s0");
        let err = overapproximate(
            &ts,
            PnProperties::new().with(Structure::HOMOGENEOUS),
            SynthesisFlags::empty(),
            &SynthConfig::default(),
            &CancelToken::new(),
        )
        .unwrap_err();
        assert!(matches!(err, SynthesisError::UnsupportedProperties(_)));

        let mut located = TransitionSystem::new("s0");
        located.add_arc_named("s0", "a", "s1");
        located.set_location("a", "left");
        let err = overapproximate(
            &located,
            PnProperties::new(),
            SynthesisFlags::empty(),
            &SynthConfig::default(),
            &CancelToken::new(),
        )
        .unwrap_err();
        assert!(matches!(err, SynthesisError::UnsupportedProperties(_)));
    }
}

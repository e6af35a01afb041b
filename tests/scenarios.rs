//! 端到端合成场景

use pn_synth::ts::parse_lts;
use pn_synth::{
    CancelToken, PnProperties, Structure, SynthConfig, SynthesisFlags, SynthesisResult,
    TransitionSystem, synthesize,
};

fn run(ts: &TransitionSystem, properties: PnProperties, flags: SynthesisFlags) -> SynthesisResult {
    synthesize(
        ts,
        properties,
        flags,
        &SynthConfig::default(),
        &CancelToken::new(),
    )
    .unwrap()
}

fn word(labels: &[&str]) -> TransitionSystem {
    let mut ts = TransitionSystem::new("s0");
    for (i, label) in labels.iter().enumerate() {
        ts.add_arc_named(&format!("s{i}"), label, &format!("s{}", i + 1));
    }
    ts
}

/// The synthesized net behaves exactly like `ts`.
fn assert_realizes(result: &SynthesisResult, ts: &TransitionSystem) {
    assert!(result.is_success());
    let net = result.to_net().unwrap();
    let graph = net.reachability_graph(10_000).unwrap();
    assert!(graph.ts.is_isomorphic_to(ts));
}

#[test]
fn single_state_gives_an_empty_net() {
    let ts = TransitionSystem::new("s0");
    let result = run(&ts, PnProperties::new(), SynthesisFlags::empty());
    assert!(result.is_success());
    let net = result.to_net().unwrap();
    assert_eq!(net.places_len(), 0);
    assert_eq!(net.transitions_len(), 0);
}

#[test]
fn pure_path_is_realized() {
    let ts = word(&["a", "b"]);
    let properties = PnProperties::new().with(Structure::PURE);
    let result = run(&ts, properties, SynthesisFlags::empty());
    assert_realizes(&result, &ts);
    assert!(result.regions().iter().all(|r| r.is_pure()));
}

#[test]
fn nondeterministic_successors_cannot_be_separated() {
    let mut ts = TransitionSystem::new("s");
    ts.add_arc_named("s", "a", "t1");
    ts.add_arc_named("s", "a", "t2");
    let result = run(&ts, PnProperties::new(), SynthesisFlags::empty());
    assert!(!result.is_success());
    let t1 = ts.state("t1").unwrap();
    let t2 = ts.state("t2").unwrap();
    assert_eq!(result.failed_state_separation(), &[vec![t1, t2]]);
}

#[test]
fn zero_bounded_fails_every_event() {
    let ts = word(&["a", "b"]);
    let result = run(&ts, PnProperties::new().with_k_bounded(0), SynthesisFlags::empty());
    assert!(!result.is_success());
    let utility = result.utility();
    for event in 0..utility.event_count() {
        assert!(
            result.failed_event_separation().contains_key(&event),
            "event {} was separated",
            utility.event_label(event)
        );
    }
}

#[test]
fn alternating_word_is_realized() {
    let ts = word(&["a", "b", "a", "b"]);
    let result = run(&ts, PnProperties::new(), SynthesisFlags::empty());
    assert_realizes(&result, &ts);
}

#[test]
fn repeated_runs_agree_on_success() {
    let ts = word(&["a", "a", "b"]);
    for properties in [PnProperties::new(), PnProperties::safe(), PnProperties::new().with(Structure::PURE)] {
        let first = run(&ts, properties, SynthesisFlags::empty()).is_success();
        let second = run(&ts, properties, SynthesisFlags::empty()).is_success();
        assert_eq!(first, second, "{properties}");
    }
}

#[test]
fn parsed_input_is_synthesized() {
    let ts = parse_lts(
        r#"
        .name "cycle"
        .type LTS
        .states
        s0[initial]
        s1
        .arcs
        s0 produce s1
        s1 consume s0
        "#,
    )
    .unwrap();
    let result = run(&ts, PnProperties::safe(), SynthesisFlags::empty());
    assert_realizes(&result, &ts);
    assert_eq!(result.utility().ts().name(), "cycle");
}

fn a_70_b() -> TransitionSystem {
    let mut labels = vec!["a"; 70];
    labels.push("b");
    word(&labels)
}

fn built_in_search(max_value_limit: i64) -> SynthConfig {
    let mut config = SynthConfig::default();
    config.solver.use_z3 = false;
    config.solver.max_value_limit = max_value_limit;
    config.solver.node_limit = 20_000;
    config
}

#[test]
fn weights_above_sixty_four_are_found() {
    // `b` needs an arc weight of 70 and `a` an initial marking of 70
    let ts = a_70_b();
    let result = run(&ts, PnProperties::new(), SynthesisFlags::empty());
    assert_realizes(&result, &ts);
    assert_eq!(result.inconclusive(), 0);
}

#[test]
fn pure_counter_of_capacity_seventy_is_realized() {
    let mut ts = TransitionSystem::new("c0");
    for i in 0..70 {
        ts.add_arc_named(&format!("c{i}"), "inc", &format!("c{}", i + 1));
        ts.add_arc_named(&format!("c{}", i + 1), "dec", &format!("c{i}"));
    }
    let properties = PnProperties::new().with(Structure::PURE);
    let result = run(&ts, properties, SynthesisFlags::empty());
    assert_realizes(&result, &ts);
    assert!(result.regions().iter().all(|r| r.is_pure()));
}

#[test]
fn built_in_search_grows_past_its_starting_range() {
    let ts = a_70_b();
    let result = synthesize(
        &ts,
        PnProperties::new(),
        SynthesisFlags::empty(),
        &built_in_search(1 << 20),
        &CancelToken::new(),
    )
    .unwrap();
    assert_realizes(&result, &ts);
}

#[test]
fn capped_search_reports_inconclusive_failures() {
    let ts = a_70_b();
    let result = synthesize(
        &ts,
        PnProperties::new(),
        SynthesisFlags::empty(),
        &built_in_search(64),
        &CancelToken::new(),
    )
    .unwrap();
    assert!(!result.is_success());
    assert!(result.inconclusive() > 0);
}

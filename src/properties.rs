//! 合成目标网需要满足的性质描述。
//!
//! 描述本身不含算法逻辑，仅用于选择合适的分离策略以及向约束系统添加结构约束。
//! 结构性质之间存在蕴含关系（标记图 ⇒ T 网 ⇒ 输出无分支 + 无合并，
//! 输出无分支 ⇒ 无冲突），构造时总是取闭包。
use std::fmt;
use std::str::FromStr;

use bitflags::bitflags;
use itertools::Itertools;
use once_cell::sync::Lazy;
use regex::Regex;
use thiserror::Error;

use crate::net::{Net, PlaceId, TransitionId};

/// Limit on explored markings when behavioural properties are verified.
const VERIFY_MARKING_LIMIT: usize = 100_000;

bitflags! {
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
    pub struct Structure: u16 {
        const PURE = 1 << 0;
        const PLAIN = 1 << 1;
        const TNET = 1 << 2;
        const MARKED_GRAPH = 1 << 3;
        const OUTPUT_NONBRANCHING = 1 << 4;
        const MERGE_FREE = 1 << 5;
        const CONFLICT_FREE = 1 << 6;
        const HOMOGENEOUS = 1 << 7;
        const BEHAVIOURALLY_CONFLICT_FREE = 1 << 8;
        const BINARY_CONFLICT_FREE = 1 << 9;
        const EQUAL_CONFLICT = 1 << 10;
    }
}

impl Structure {
    /// Adds every property implied by the ones already present.
    pub fn closure(self) -> Structure {
        let mut closed = self;
        if closed.contains(Structure::MARKED_GRAPH) {
            closed |= Structure::TNET;
        }
        if closed.contains(Structure::TNET) {
            closed |= Structure::OUTPUT_NONBRANCHING | Structure::MERGE_FREE;
        }
        if closed.contains(Structure::OUTPUT_NONBRANCHING) {
            closed |= Structure::CONFLICT_FREE;
        }
        closed
    }
}

const NAMES: &[(Structure, &str)] = &[
    (Structure::PURE, "pure"),
    (Structure::PLAIN, "plain"),
    (Structure::TNET, "tnet"),
    (Structure::MARKED_GRAPH, "marked-graph"),
    (Structure::OUTPUT_NONBRANCHING, "output-nonbranching"),
    (Structure::MERGE_FREE, "merge-free"),
    (Structure::CONFLICT_FREE, "conflict-free"),
    (Structure::HOMOGENEOUS, "homogeneous"),
    (Structure::BEHAVIOURALLY_CONFLICT_FREE, "behaviourally-conflict-free"),
    (Structure::BINARY_CONFLICT_FREE, "binary-conflict-free"),
    (Structure::EQUAL_CONFLICT, "equal-conflict"),
];

const ABBREVIATIONS: &[(&str, Structure)] = &[
    ("t-net", Structure::TNET),
    ("mg", Structure::MARKED_GRAPH),
    ("on", Structure::OUTPUT_NONBRANCHING),
    ("mf", Structure::MERGE_FREE),
    ("cf", Structure::CONFLICT_FREE),
    ("bcf", Structure::BEHAVIOURALLY_CONFLICT_FREE),
    ("bicf", Structure::BINARY_CONFLICT_FREE),
    ("ec", Structure::EQUAL_CONFLICT),
];

static NUMBERED: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"^(\d+)-(bounded|marking)$").unwrap());

#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum ParseError {
    #[error("unknown property `{0}`")]
    UnknownProperty(String),
    #[error("invalid number in property `{0}`")]
    InvalidNumber(String),
    #[error("k-marking requires k > 0")]
    ZeroMarking,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub struct PnProperties {
    k_bounded: Option<u64>,
    k_marking: Option<u64>,
    structure: Structure,
}

impl PnProperties {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn safe() -> Self {
        Self::new().with_k_bounded(1)
    }

    /// Tightens the bound if one is already present.
    pub fn with_k_bounded(mut self, k: u64) -> Self {
        self.k_bounded = Some(self.k_bounded.map_or(k, |old| old.min(k)));
        self
    }

    /// Initial markings must be multiples of `k`; combining two requests takes their lcm.
    pub fn with_k_marking(mut self, k: u64) -> Self {
        self.k_marking = Some(self.k_marking.map_or(k, |old| lcm(old, k)));
        self
    }

    pub fn with(mut self, structure: Structure) -> Self {
        self.structure = (self.structure | structure).closure();
        self
    }

    pub fn without_bounds(mut self) -> Self {
        self.k_bounded = None;
        self.k_marking = None;
        self
    }

    pub fn k_bounded(&self) -> Option<u64> {
        self.k_bounded
    }

    pub fn k_marking(&self) -> Option<u64> {
        self.k_marking.filter(|k| *k > 1)
    }

    pub fn structure(&self) -> Structure {
        self.structure
    }

    pub fn requires(&self, structure: Structure) -> bool {
        self.structure.contains(structure)
    }

    pub fn is_pure(&self) -> bool {
        self.requires(Structure::PURE)
    }

    pub fn is_plain(&self) -> bool {
        self.requires(Structure::PLAIN)
    }

    pub fn is_safe(&self) -> bool {
        self.k_bounded.is_some_and(|k| k <= 1)
    }

    /// Every requested structural property lies within `allowed` (and its implications).
    pub fn structure_within(&self, allowed: Structure) -> bool {
        allowed.closure().contains(self.structure)
    }

    pub fn is_empty(&self) -> bool {
        self.k_bounded.is_none() && self.k_marking().is_none() && self.structure.is_empty()
    }

    /// Lists every requested property that `net` violates.
    pub fn verify_net(&self, net: &Net) -> Vec<String> {
        let mut violations = Vec::new();

        for place in net.places.indices() {
            let producers = net.place_preset(place);
            let consumers = net.place_postset(place);
            let name = &net.places[place].name;

            if self.is_pure()
                && consumers
                    .iter()
                    .any(|&t| net.output_weight(place, t) > 0)
            {
                violations.push(format!("place {name} is a side condition"));
            }
            if self.is_plain()
                && net
                    .transitions
                    .indices()
                    .any(|t| net.input_weight(place, t) > 1 || net.output_weight(place, t) > 1)
            {
                violations.push(format!("place {name} has an arc weight above 1"));
            }
            if self.requires(Structure::MARKED_GRAPH)
                && (producers.len() != 1 || consumers.len() != 1)
            {
                violations.push(format!("place {name} is not a marked-graph place"));
            }
            if self.requires(Structure::TNET) && (producers.len() > 1 || consumers.len() > 1) {
                violations.push(format!("place {name} is not a T-net place"));
            }
            if self.requires(Structure::OUTPUT_NONBRANCHING) && consumers.len() > 1 {
                violations.push(format!("place {name} has several consumers"));
            }
            if self.requires(Structure::MERGE_FREE) && producers.len() > 1 {
                violations.push(format!("place {name} has several producers"));
            }
            if self.requires(Structure::CONFLICT_FREE)
                && consumers.len() > 1
                && !consumers.iter().all(|t| producers.contains(t))
            {
                violations.push(format!("place {name} is in conflict"));
            }
            if self.requires(Structure::HOMOGENEOUS)
                && consumers
                    .iter()
                    .map(|&t| net.input_weight(place, t))
                    .dedup()
                    .count()
                    > 1
            {
                violations.push(format!("place {name} is not homogeneous"));
            }
            if let Some(k) = self.k_marking() {
                if net.places[place].tokens % k != 0 {
                    violations.push(format!("place {name} is not marked with a multiple of {k}"));
                }
            }
        }

        if self.requires(Structure::EQUAL_CONFLICT) {
            for (left, right) in net.transitions.indices().tuple_combinations() {
                if shares_input(net, left, right) && !same_preset(net, left, right) {
                    violations.push(format!(
                        "transitions {} and {} are not in equal conflict",
                        net.transitions[left].name, net.transitions[right].name
                    ));
                }
            }
        }

        let behavioural = self.k_bounded.is_some()
            || self.requires(Structure::BEHAVIOURALLY_CONFLICT_FREE)
            || self.requires(Structure::BINARY_CONFLICT_FREE);
        if behavioural {
            match net.reachability_graph(VERIFY_MARKING_LIMIT) {
                Ok(graph) => {
                    for marking in &graph.markings {
                        if let Some(k) = self.k_bounded {
                            if marking.max_tokens() > k {
                                violations.push(format!("marking {marking} is not {k}-bounded"));
                            }
                        }
                        let enabled = net.enabled_transitions(marking);
                        for (left, right) in enabled.iter().tuple_combinations() {
                            if self.requires(Structure::BEHAVIOURALLY_CONFLICT_FREE)
                                && shares_input(net, *left, *right)
                            {
                                violations.push(format!(
                                    "{} and {} are in conflict at {marking}",
                                    net.transitions[*left].name, net.transitions[*right].name
                                ));
                            }
                            if self.requires(Structure::BINARY_CONFLICT_FREE)
                                && net.places.indices().any(|p: PlaceId| {
                                    marking.tokens(p)
                                        < net.input_weight(p, *left) + net.input_weight(p, *right)
                                })
                            {
                                violations.push(format!(
                                    "{} and {} are in binary conflict at {marking}",
                                    net.transitions[*left].name, net.transitions[*right].name
                                ));
                            }
                        }
                    }
                }
                Err(err) => violations.push(format!("reachability graph unavailable: {err}")),
            }
        }

        violations
    }
}

fn shares_input(net: &Net, left: TransitionId, right: TransitionId) -> bool {
    net.places
        .indices()
        .any(|p| net.input_weight(p, left) > 0 && net.input_weight(p, right) > 0)
}

fn same_preset(net: &Net, left: TransitionId, right: TransitionId) -> bool {
    net.places
        .indices()
        .all(|p| net.input_weight(p, left) == net.input_weight(p, right))
}

fn gcd(a: u64, b: u64) -> u64 {
    if b == 0 { a } else { gcd(b, a % b) }
}

fn lcm(a: u64, b: u64) -> u64 {
    if a == 0 || b == 0 {
        0
    } else {
        a / gcd(a, b) * b
    }
}

impl FromStr for PnProperties {
    type Err = ParseError;

    fn from_str(input: &str) -> Result<Self, Self::Err> {
        let mut properties = PnProperties::new();
        for token in input.split(',').map(|t| t.trim().to_ascii_lowercase()) {
            if token.is_empty() || token == "none" {
                continue;
            }
            if token == "safe" {
                properties = properties.with_k_bounded(1);
                continue;
            }
            if let Some(captures) = NUMBERED.captures(&token) {
                // weights and markings are solved as i64
                let k = captures[1]
                    .parse::<i64>()
                    .ok()
                    .and_then(|k| u64::try_from(k).ok())
                    .ok_or_else(|| ParseError::InvalidNumber(token.clone()))?;
                properties = match &captures[2] {
                    "bounded" => properties.with_k_bounded(k),
                    _ if k == 0 => return Err(ParseError::ZeroMarking),
                    _ => properties.with_k_marking(k),
                };
                continue;
            }
            let structure = NAMES
                .iter()
                .find(|(_, name)| *name == token)
                .map(|(flag, _)| *flag)
                .or_else(|| {
                    ABBREVIATIONS
                        .iter()
                        .find(|(name, _)| *name == token)
                        .map(|(_, flag)| *flag)
                })
                .ok_or_else(|| ParseError::UnknownProperty(token.clone()))?;
            properties = properties.with(structure);
        }
        Ok(properties)
    }
}

impl fmt::Display for PnProperties {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let mut parts = Vec::new();
        match self.k_bounded {
            Some(1) => parts.push("safe".to_string()),
            Some(k) => parts.push(format!("{k}-bounded")),
            None => {}
        }
        if let Some(k) = self.k_marking() {
            parts.push(format!("{k}-marking"));
        }
        for (flag, name) in NAMES {
            if self.structure.contains(*flag) {
                parts.push((*name).to_string());
            }
        }
        if parts.is_empty() {
            write!(f, "none")
        } else {
            write!(f, "{}", parts.join(", "))
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::net::{Place, Transition};

    #[test]
    fn parses_numbers_and_abbreviations() {
        let props: PnProperties = "3-bounded, pure, MG".parse().unwrap();
        assert_eq!(props.k_bounded(), Some(3));
        assert!(props.is_pure());
        assert!(props.requires(Structure::TNET | Structure::CONFLICT_FREE));
        assert_eq!(
            "frobnicate".parse::<PnProperties>(),
            Err(ParseError::UnknownProperty("frobnicate".into()))
        );
        assert_eq!("0-marking".parse::<PnProperties>(), Err(ParseError::ZeroMarking));
    }

    #[test]
    fn numbers_beyond_i64_are_rejected() {
        let k = i64::MAX as u64 + 1;
        assert_eq!(
            format!("{k}-bounded").parse::<PnProperties>(),
            Err(ParseError::InvalidNumber(format!("{k}-bounded")))
        );
        let props: PnProperties = format!("{}-bounded", i64::MAX).parse().unwrap();
        assert_eq!(props.k_bounded(), Some(i64::MAX as u64));
    }

    #[test]
    fn bounds_combine_conservatively() {
        let props: PnProperties = "4-bounded,safe,2-marking,3-marking".parse().unwrap();
        assert!(props.is_safe());
        assert_eq!(props.k_marking(), Some(6));
        assert_eq!(props.to_string(), "safe, 6-marking");
        assert_eq!("none".parse::<PnProperties>().unwrap().to_string(), "none");
    }

    #[test]
    fn structure_within_uses_closure() {
        let props = PnProperties::new().with(Structure::TNET);
        assert!(props.structure_within(Structure::MARKED_GRAPH));
        assert!(!props.structure_within(Structure::PURE));
    }

    #[test]
    fn verify_reports_structural_violations() {
        let mut net = Net::empty();
        let p = net.add_place(Place::new("p", 2));
        let a = net.add_transition(Transition::new("a"));
        let b = net.add_transition(Transition::new("b"));
        net.set_input_weight(p, a, 1);
        net.set_input_weight(p, b, 2);
        let props: PnProperties = "output-nonbranching,homogeneous,plain,1-bounded".parse().unwrap();
        let violations = props.verify_net(&net);
        assert!(violations.iter().any(|v| v.contains("several consumers")));
        assert!(violations.iter().any(|v| v.contains("not homogeneous")));
        assert!(violations.iter().any(|v| v.contains("weight above 1")));
        assert!(violations.iter().any(|v| v.contains("not 1-bounded")));
    }
}

//! 迁移系统的并发分解：把 TS 拆分为字母表互不相交、相互独立的因子，
//! 使得原系统同构于各因子的交错积。
//!
//! 两个标签 `a`、`b` 独立当且仅当在每个可达状态上它们互不影响使能性，
//! 且同时使能时两种交错顺序闭合为菱形。依赖关系的连通分量即为因子的字母表。
use indexmap::IndexSet;
use petgraph::unionfind::UnionFind;

use crate::ts::{StateId, TransitionSystem};

/// One factor of a decomposed transition system.
#[derive(Debug, Clone)]
pub struct Factor {
    pub ts: TransitionSystem,
    pub labels: Vec<String>,
    /// Maps every state of the composite system (by index) to its factor state.
    projection: Vec<StateId>,
}

impl Factor {
    pub fn project(&self, state: StateId) -> StateId {
        self.projection[state.index()]
    }

    pub fn contains_label(&self, label: &str) -> bool {
        self.labels.iter().any(|l| l == label)
    }
}

#[derive(Debug, Clone)]
pub struct Factorization {
    pub factors: Vec<Factor>,
}

impl Factorization {
    pub fn factor_of_label(&self, label: &str) -> Option<&Factor> {
        self.factors.iter().find(|factor| factor.contains_label(label))
    }
}

/// Splits `ts` into at least two independent factors, if possible.
///
/// Only deterministic, totally reachable systems are considered; anything else
/// yields `None`.
pub fn factorize(ts: &TransitionSystem) -> Option<Factorization> {
    if !ts.is_deterministic() || !ts.is_totally_reachable() {
        return None;
    }
    let alphabet = ts.alphabet();
    if alphabet.len() < 2 {
        return None;
    }

    let mut dependency = UnionFind::<usize>::new(alphabet.len());
    for (i, a) in alphabet.iter().enumerate() {
        for (j, b) in alphabet.iter().enumerate().skip(i + 1) {
            if !independent(ts, a, b) {
                dependency.union(i, j);
            }
        }
    }

    let mut groups: Vec<Vec<String>> = Vec::new();
    let mut roots: IndexSet<usize> = IndexSet::new();
    for (i, label) in alphabet.iter().enumerate() {
        let (root, _) = roots.insert_full(dependency.find(i));
        if root == groups.len() {
            groups.push(Vec::new());
        }
        groups[root].push(label.clone());
    }
    if groups.len() < 2 {
        return None;
    }

    let factors = groups
        .into_iter()
        .map(|labels| build_factor(ts, labels))
        .collect::<Vec<_>>();

    let product_states: usize = factors.iter().map(|f| f.ts.state_count()).product();
    if product_states != ts.state_count() {
        return None;
    }
    let product_arcs: usize = factors
        .iter()
        .map(|f| f.ts.arc_count() * product_states / f.ts.state_count())
        .sum();
    if product_arcs != ts.arc_count() || factors.iter().any(|f| !f.ts.is_deterministic()) {
        return None;
    }

    log::debug!(
        "factorised transition system into {} factors: {:?}",
        factors.len(),
        factors.iter().map(|f| &f.labels).collect::<Vec<_>>()
    );
    Some(Factorization { factors })
}

fn independent(ts: &TransitionSystem, a: &str, b: &str) -> bool {
    for state in ts.states() {
        let after_a = ts.successor(state, a);
        let after_b = ts.successor(state, b);
        // firing one label must not change the enabledness of the other
        if let Some(next) = after_a {
            if ts.is_enabled(state, b) != ts.is_enabled(next, b) {
                return false;
            }
        }
        if let Some(next) = after_b {
            if ts.is_enabled(state, a) != ts.is_enabled(next, a) {
                return false;
            }
        }
        if let (Some(sa), Some(sb)) = (after_a, after_b) {
            match (ts.successor(sa, b), ts.successor(sb, a)) {
                (Some(left), Some(right)) if left == right => {}
                _ => return false,
            }
        }
    }
    true
}

fn build_factor(ts: &TransitionSystem, labels: Vec<String>) -> Factor {
    let mut classes = UnionFind::<usize>::new(ts.state_count());
    for arc in ts.arcs() {
        if !labels.iter().any(|l| l == arc.label) {
            classes.union(arc.source.index(), arc.target.index());
        }
    }

    let initial_root = classes.find(ts.initial().index());
    let mut factor_ts = TransitionSystem::new(ts.state_name(ts.initial()));
    let mut by_root: Vec<Option<StateId>> = vec![None; ts.state_count()];
    by_root[initial_root] = Some(factor_ts.initial());
    for state in ts.reachable_states() {
        let root = classes.find(state.index());
        if by_root[root].is_none() {
            by_root[root] = Some(factor_ts.add_state(ts.state_name(state)));
        }
    }

    let projection = ts
        .states()
        .map(|state| {
            by_root[classes.find(state.index())].unwrap_or_else(|| factor_ts.initial())
        })
        .collect::<Vec<_>>();

    let mut seen = IndexSet::new();
    for arc in ts.arcs() {
        if !labels.iter().any(|l| l == arc.label) {
            continue;
        }
        let source = projection[arc.source.index()];
        let target = projection[arc.target.index()];
        if seen.insert((source, arc.label.to_string(), target)) {
            factor_ts.add_arc(source, arc.label, target);
        }
    }
    for label in &labels {
        if let Some(location) = ts.location(label) {
            factor_ts.set_location(label.as_str(), location);
        }
    }

    Factor {
        ts: factor_ts,
        labels,
        projection,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    /// Interleaving of the cycles `a b` and `c`.
    fn product() -> TransitionSystem {
        let mut ts = TransitionSystem::new("00");
        ts.add_arc_named("00", "a", "10");
        ts.add_arc_named("10", "b", "00");
        ts.add_arc_named("01", "a", "11");
        ts.add_arc_named("11", "b", "01");
        ts.add_arc_named("00", "c", "01");
        ts.add_arc_named("01", "c", "00");
        ts.add_arc_named("10", "c", "11");
        ts.add_arc_named("11", "c", "10");
        ts
    }

    #[test]
    fn splits_independent_components() {
        let ts = product();
        let factorization = factorize(&ts).expect("product should factorise");
        assert_eq!(factorization.factors.len(), 2);
        let ab = factorization.factor_of_label("a").unwrap();
        assert_eq!(ab.labels, vec!["a".to_string(), "b".to_string()]);
        assert_eq!(ab.ts.state_count(), 2);
        let c = factorization.factor_of_label("c").unwrap();
        assert_eq!(c.ts.state_count(), 2);
        let s11 = ts.state("11").unwrap();
        assert_ne!(ab.project(s11), ab.project(ts.initial()));
    }

    #[test]
    fn sequential_word_does_not_factorise() {
        let mut ts = TransitionSystem::new("s0");
        ts.add_arc_named("s0", "a", "s1");
        ts.add_arc_named("s1", "b", "s2");
        assert!(factorize(&ts).is_none());
    }
}

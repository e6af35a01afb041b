//! 安全纯网的粗区域（rough region）传播。
//!
//! 安全纯区域是一个状态集合：每个事件要么进入（所有弧从外到内），要么离开，要么不跨越。
//! 搜索节点给部分状态标注 内/外、部分事件标注 进入/离开/不跨越，
//! 沿弧传播到不动点；出现矛盾则剪枝，否则在第一个未定事件（其次是第一个未定状态）上分支。
use crate::cancel::Interrupted;
use crate::properties::Structure;
use crate::regions::{Region, RegionBuilder};
use crate::separation::{Separation, SeparationContext};
use crate::ts::StateId;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Crossing {
    Enter,
    Exit,
    Stay,
}

#[derive(Debug, Clone)]
struct Rough {
    /// By utility position; `Some(true)` = inside.
    states: Vec<Option<bool>>,
    events: Vec<Option<Crossing>>,
}

pub struct ElementarySeparation {
    context: SeparationContext,
    /// Arcs as `(source position, event, target position)`.
    arcs: Vec<(usize, usize, usize)>,
}

impl ElementarySeparation {
    pub fn create(context: &SeparationContext) -> Option<Box<dyn Separation>> {
        let properties = &context.properties;
        let utility = &context.utility;
        if properties.k_bounded() != Some(1)
            || properties.k_marking().is_some()
            || !properties.structure_within(Structure::PURE | Structure::PLAIN)
            || utility.ts().has_locations()
            || !utility.ts().is_totally_reachable()
        {
            return None;
        }
        let arcs = utility
            .arcs()
            .iter()
            .filter_map(|arc| {
                Some((
                    utility.position(arc.source)?,
                    arc.event,
                    utility.position(arc.target)?,
                ))
            })
            .collect();
        Some(Box::new(Self {
            context: context.clone(),
            arcs,
        }))
    }

    fn empty(&self) -> Rough {
        Rough {
            states: vec![None; self.context.utility.reachable_states().len()],
            events: vec![None; self.context.utility.event_count()],
        }
    }

    /// Closes `rough` under the arc rules; `false` on a contradiction.
    fn propagate(&self, rough: &mut Rough) -> bool {
        let mut changed = true;
        while changed {
            changed = false;
            for &(source, event, target) in &self.arcs {
                let implied = match (rough.states[source], rough.states[target]) {
                    (Some(false), Some(true)) => Some(Crossing::Enter),
                    (Some(true), Some(false)) => Some(Crossing::Exit),
                    (Some(a), Some(b)) if a == b => Some(Crossing::Stay),
                    _ => None,
                };
                if let Some(implied) = implied {
                    match rough.events[event] {
                        Some(crossing) if crossing != implied => return false,
                        Some(_) => {}
                        None => {
                            rough.events[event] = Some(implied);
                            changed = true;
                        }
                    }
                }
                let Some(crossing) = rough.events[event] else {
                    continue;
                };
                let wanted = match crossing {
                    Crossing::Enter => (Some(false), Some(true)),
                    Crossing::Exit => (Some(true), Some(false)),
                    Crossing::Stay => (rough.states[target], rough.states[source]),
                };
                for (slot, value) in [(source, wanted.0), (target, wanted.1)] {
                    let Some(value) = value else {
                        continue;
                    };
                    match rough.states[slot] {
                        Some(current) if current != value => return false,
                        Some(_) => {}
                        None => {
                            rough.states[slot] = Some(value);
                            changed = true;
                        }
                    }
                }
            }
        }
        true
    }

    fn search(&self, seed: Rough) -> Result<Option<Region>, Interrupted> {
        let mut stack = vec![seed];
        while let Some(mut rough) = stack.pop() {
            self.context.cancel.check()?;
            if !self.propagate(&mut rough) {
                continue;
            }
            if let Some(event) = rough.events.iter().position(Option::is_none) {
                for crossing in [Crossing::Stay, Crossing::Exit, Crossing::Enter] {
                    let mut child = rough.clone();
                    child.events[event] = Some(crossing);
                    stack.push(child);
                }
                continue;
            }
            if let Some(state) = rough.states.iter().position(Option::is_none) {
                for inside in [true, false] {
                    let mut child = rough.clone();
                    child.states[state] = Some(inside);
                    stack.push(child);
                }
                continue;
            }
            return Ok(Some(self.region(&rough)));
        }
        Ok(None)
    }

    fn region(&self, rough: &Rough) -> Region {
        let mut builder = RegionBuilder::new(rough.events.len());
        for (event, crossing) in rough.events.iter().enumerate() {
            match crossing {
                Some(Crossing::Enter) => builder.add_weight_on(event, 1),
                Some(Crossing::Exit) => builder.add_weight_on(event, -1),
                _ => &mut builder,
            };
        }
        let initial = rough.states.first().copied().flatten().unwrap_or(false);
        let region = builder.with_initial_marking(u8::from(initial));
        debug_assert_eq!(region.check_valid(&self.context.utility), Ok(()));
        region
    }
}

impl Separation for ElementarySeparation {
    fn name(&self) -> &'static str {
        "elementary"
    }

    fn separate_states(
        &mut self,
        left: StateId,
        right: StateId,
    ) -> Result<Option<Region>, Interrupted> {
        let utility = &self.context.utility;
        let (Some(left), Some(right)) = (utility.position(left), utility.position(right)) else {
            return Ok(None);
        };
        // complements of regions are regions, one orientation suffices
        let mut seed = self.empty();
        seed.states[left] = Some(true);
        seed.states[right] = Some(false);
        self.search(seed)
    }

    fn separate_event(
        &mut self,
        state: StateId,
        event: usize,
    ) -> Result<Option<Region>, Interrupted> {
        let Some(position) = self.context.utility.position(state) else {
            return Ok(None);
        };
        let mut seed = self.empty();
        seed.states[position] = Some(false);
        seed.events[event] = Some(Crossing::Exit);
        self.search(seed)
    }

    fn is_exact(&self) -> bool {
        self.context.properties.is_pure()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::rc::Rc;

    use crate::properties::PnProperties;
    use crate::regions::RegionUtility;
    use crate::ts::TransitionSystem;

    fn context(ts: TransitionSystem) -> SeparationContext {
        SeparationContext::new(
            Rc::new(RegionUtility::new(ts)),
            PnProperties::safe().with(Structure::PURE),
        )
    }

    #[test]
    fn finds_the_places_of_a_cycle() {
        let mut ts = TransitionSystem::new("s0");
        ts.add_arc_named("s0", "a", "s1");
        ts.add_arc_named("s1", "b", "s0");
        let context = context(ts);
        let utility = context.utility.clone();
        let mut strategy = ElementarySeparation::create(&context).unwrap();
        let s1 = utility.ts().state("s1").unwrap();
        let a = utility.event_index("a").unwrap();

        let region = strategy.separate_event(s1, a).unwrap().unwrap();
        assert!(region.separates_event(&utility, s1, a).unwrap());
        assert!(region.is_plain() && region.is_pure());

        let s0 = utility.ts().initial();
        assert!(strategy.separate_states(s0, s1).unwrap().is_some());
    }

    #[test]
    fn unsafe_counter_has_no_elementary_region() {
        // s0 -a-> s1 -a-> s2 -b-> s3: a is disabled at s2, which needs two tokens
        let mut ts = TransitionSystem::new("s0");
        ts.add_arc_named("s0", "a", "s1");
        ts.add_arc_named("s1", "a", "s2");
        ts.add_arc_named("s2", "b", "s3");
        let context = context(ts);
        let utility = context.utility.clone();
        let mut strategy = ElementarySeparation::create(&context).unwrap();
        let s2 = utility.ts().state("s2").unwrap();
        let a = utility.event_index("a").unwrap();
        assert_eq!(strategy.separate_event(s2, a).unwrap(), None);
        assert!(strategy.is_exact());
    }

    #[test]
    fn requires_safety() {
        let mut ts = TransitionSystem::new("s0");
        ts.add_arc_named("s0", "a", "s1");
        let context = SeparationContext::new(Rc::new(RegionUtility::new(ts)), PnProperties::new());
        assert!(ElementarySeparation::create(&context).is_none());
    }
}

//! 有限展开（limited unfolding）：语言等价模式下的预处理。
//!
//! 深度优先遍历确定性 TS 并构造新副本。若目标状态已在当前根路径上，
//! 则复用该副本闭合环路，而不是继续复制；其余情况下每条路径得到独立副本。
use indexmap::IndexMap;

use crate::cancel::{CancelToken, Interrupted};
use crate::ts::{StateId, TransitionSystem, TsError};

#[derive(Debug, thiserror::Error)]
pub enum UnfoldingError {
    #[error(transparent)]
    Ts(#[from] TsError),
    #[error(transparent)]
    Interrupted(#[from] Interrupted),
}

struct Frame {
    original: StateId,
    copy: StateId,
    next_arc: usize,
}

/// Unfolds `ts` into a tree whose only cycles are back edges to the current path.
pub fn limited_unfolding(
    ts: &TransitionSystem,
    cancel: &CancelToken,
) -> Result<TransitionSystem, UnfoldingError> {
    ts.check_deterministic()?;

    let initial = ts.initial();
    let mut unfolded =
        TransitionSystem::new(ts.state_name(initial).to_string()).with_name(ts.name());
    for (label, location) in ts.locations() {
        unfolded.set_location(label.as_str(), location.as_str());
    }

    // original state -> its copy on the current root path
    let mut on_path: IndexMap<StateId, StateId> = IndexMap::new();
    on_path.insert(initial, unfolded.initial());
    let mut stack = vec![Frame {
        original: initial,
        copy: unfolded.initial(),
        next_arc: 0,
    }];

    while let Some(frame) = stack.last_mut() {
        cancel.check()?;
        let outgoing = ts.outgoing(frame.original);
        let Some(arc) = outgoing.get(frame.next_arc).copied() else {
            on_path.pop();
            stack.pop();
            continue;
        };
        frame.next_arc += 1;
        let source = frame.copy;

        if let Some(&existing) = on_path.get(&arc.target) {
            unfolded.add_arc(source, arc.label, existing);
            continue;
        }
        let name = format!("{}_{}", ts.state_name(arc.target), unfolded.state_count());
        let copy = unfolded.add_state(name);
        unfolded.add_arc(source, arc.label, copy);
        on_path.insert(arc.target, copy);
        stack.push(Frame {
            original: arc.target,
            copy,
            next_arc: 0,
        });
    }

    log::debug!(
        "limited unfolding: {} states -> {} states",
        ts.state_count(),
        unfolded.state_count()
    );
    Ok(unfolded)
}

//! 输入、输出弧权重的稠密矩阵封装（行 = 库所，列 = 迁移）。
use std::fmt;

use serde::{Deserialize, Serialize};
use smallvec::SmallVec;

use crate::net::ids::{PlaceId, TransitionId};
use crate::net::index_vec::{Idx, IndexVec};

type SmallRow<T> = SmallVec<[T; 4]>;

#[derive(Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Incidence<T> {
    rows: IndexVec<PlaceId, SmallRow<T>>,
    cols: usize,
}

impl<T> Incidence<T>
where
    T: Clone,
{
    pub fn new(places: usize, transitions: usize, default: T) -> Self {
        let mut rows = IndexVec::new();
        for _ in 0..places {
            rows.push(SmallRow::from_elem(default.clone(), transitions));
        }
        Self {
            rows,
            cols: transitions,
        }
    }

    pub fn push_place_with_default(&mut self, default: T) -> PlaceId {
        let mut row = SmallRow::new();
        row.resize(self.cols, default);
        self.rows.push(row)
    }

    pub fn push_transition_with_default(&mut self, default: T) -> TransitionId {
        let next = self.cols;
        for row in self.rows.iter_mut() {
            row.push(default.clone());
        }
        self.cols += 1;
        TransitionId::from_usize(next)
    }

    pub fn places(&self) -> usize {
        self.rows.len()
    }

    pub fn transitions(&self) -> usize {
        self.cols
    }

    pub fn set(&mut self, place: PlaceId, transition: TransitionId, value: T) {
        self.rows[place][transition.index()] = value;
    }

    pub fn get(&self, place: PlaceId, transition: TransitionId) -> &T {
        &self.rows[place][transition.index()]
    }

    pub fn rows(&self) -> &IndexVec<PlaceId, SmallRow<T>> {
        &self.rows
    }

    /// Entries of one transition column, paired with their place.
    pub fn column(&self, transition: TransitionId) -> impl Iterator<Item = (PlaceId, &T)> + '_ {
        self.rows
            .iter_enumerated()
            .map(move |(place, row)| (place, &row[transition.index()]))
    }
}

impl<T> fmt::Debug for Incidence<T>
where
    T: fmt::Debug,
{
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Incidence")
            .field("rows", &self.rows)
            .field("cols", &self.cols)
            .finish()
    }
}

impl Incidence<u64> {
    /// Places with a non-zero entry in the column of `transition`.
    pub fn support_of(&self, transition: TransitionId) -> Vec<PlaceId> {
        self.column(transition)
            .filter(|(_, weight)| **weight > 0)
            .map(|(place, _)| place)
            .collect()
    }

    /// Transitions with a non-zero entry in the row of `place`.
    pub fn support_in_row(&self, place: PlaceId) -> Vec<TransitionId> {
        self.rows[place]
            .iter()
            .enumerate()
            .filter(|(_, weight)| **weight > 0)
            .map(|(idx, _)| TransitionId::from_usize(idx))
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn growing_keeps_matrix_rectangular() {
        let mut pre = Incidence::new(1, 0, 0u64);
        let t0 = pre.push_transition_with_default(0);
        let p1 = pre.push_place_with_default(0);
        let t1 = pre.push_transition_with_default(0);
        pre.set(p1, t1, 2);
        assert_eq!(pre.places(), 2);
        assert_eq!(pre.transitions(), 2);
        assert_eq!(*pre.get(PlaceId::new(0), t0), 0);
        assert_eq!(pre.support_of(t1), vec![p1]);
        assert_eq!(pre.support_in_row(p1), vec![t1]);
    }
}

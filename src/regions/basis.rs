//! 整数零空间格基：`{x ∈ ℤⁿ | A·x = 0}`。
//!
//! 从单位矩阵出发，逐行对列向量做幺模变换（类欧几里得消元），
//! 使当前行在所有候选列上的取值只剩一个非零项，并将其剔除。
//! 剩余列在整数格意义下张成零空间，而非仅在有理数域上。
use std::convert::Infallible;

use num::{BigInt, Integer, Signed, Zero};

fn dot(left: &[BigInt], right: &[BigInt]) -> BigInt {
    left.iter()
        .zip(right.iter())
        .fold(BigInt::zero(), |acc, (l, r)| acc + l * r)
}

fn axpy(target: &mut [BigInt], factor: &BigInt, source: &[BigInt]) {
    for (t, s) in target.iter_mut().zip(source.iter()) {
        *t -= factor * s;
    }
}

/// Lattice basis of the integer kernel of `rows` (each of length `cols`).
pub fn integer_kernel_basis(rows: &[Vec<BigInt>], cols: usize) -> Vec<Vec<BigInt>> {
    let Ok(basis) = integer_kernel_basis_with(rows, cols, || Ok::<(), Infallible>(()));
    basis
}

/// [`integer_kernel_basis`] calling `poll` before each row is eliminated.
pub fn integer_kernel_basis_with<E>(
    rows: &[Vec<BigInt>],
    cols: usize,
    mut poll: impl FnMut() -> Result<(), E>,
) -> Result<Vec<Vec<BigInt>>, E> {
    let mut basis: Vec<Vec<BigInt>> = (0..cols)
        .map(|idx| {
            let mut column = vec![BigInt::zero(); cols];
            column[idx] = BigInt::from(1);
            column
        })
        .collect();

    for row in rows {
        poll()?;
        debug_assert_eq!(row.len(), cols);
        if row.iter().all(Zero::is_zero) {
            continue;
        }
        let mut values = basis.iter().map(|column| dot(row, column)).collect::<Vec<_>>();
        loop {
            let pivot = values
                .iter()
                .enumerate()
                .filter(|(_, value)| !value.is_zero())
                .min_by(|(_, a), (_, b)| a.abs().cmp(&b.abs()))
                .map(|(idx, _)| idx);
            let Some(pivot) = pivot else {
                break;
            };
            let mut reduced = true;
            for idx in 0..values.len() {
                if idx == pivot || values[idx].is_zero() {
                    continue;
                }
                let quotient = values[idx].div_floor(&values[pivot]);
                let pivot_column = basis[pivot].clone();
                axpy(&mut basis[idx], &quotient, &pivot_column);
                let pivot_value = values[pivot].clone();
                values[idx] -= quotient * pivot_value;
                if !values[idx].is_zero() {
                    reduced = false;
                }
            }
            if reduced {
                basis.swap_remove(pivot);
                values.swap_remove(pivot);
                break;
            }
        }
    }

    size_reduce(&mut basis);
    for column in &mut basis {
        normalize_sign(column);
    }
    basis.sort();
    Ok(basis)
}

/// Pairwise size reduction: subtract rounded multiples while the norm shrinks.
fn size_reduce(basis: &mut [Vec<BigInt>]) {
    let mut changed = true;
    while changed {
        changed = false;
        for i in 0..basis.len() {
            for j in 0..basis.len() {
                if i == j {
                    continue;
                }
                let norm_j = dot(&basis[j], &basis[j]);
                if norm_j.is_zero() {
                    continue;
                }
                let projection = dot(&basis[i], &basis[j]);
                // round(projection / norm_j)
                let twice_norm: BigInt = &norm_j * 2u32;
                let quotient = (&projection * 2u32 + &norm_j).div_floor(&twice_norm);
                if quotient.is_zero() {
                    continue;
                }
                let mut candidate = basis[i].clone();
                axpy(&mut candidate, &quotient, &basis[j]);
                if dot(&candidate, &candidate) < dot(&basis[i], &basis[i]) {
                    basis[i] = candidate;
                    changed = true;
                }
            }
        }
    }
}

fn normalize_sign(column: &mut [BigInt]) {
    if column
        .iter()
        .find(|value| !value.is_zero())
        .is_some_and(|value| value.is_negative())
    {
        for value in column.iter_mut() {
            *value = -value.clone();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn ints(values: &[i64]) -> Vec<BigInt> {
        values.iter().copied().map(BigInt::from).collect()
    }

    fn in_kernel(rows: &[Vec<BigInt>], vector: &[BigInt]) -> bool {
        rows.iter().all(|row| dot(row, vector).is_zero())
    }

    #[test]
    fn no_rows_gives_unit_vectors() {
        let basis = integer_kernel_basis(&[], 3);
        assert_eq!(basis.len(), 3);
        assert!(basis.contains(&ints(&[0, 0, 1])));
    }

    #[test]
    fn kernel_of_cycle_constraint() {
        // a + b = 0 over events (a, b, c)
        let rows = vec![ints(&[1, 1, 0])];
        let basis = integer_kernel_basis(&rows, 3);
        assert_eq!(basis.len(), 2);
        assert!(basis.iter().all(|v| in_kernel(&rows, v)));
        assert!(basis.contains(&ints(&[0, 0, 1])));
        assert!(basis.contains(&ints(&[1, -1, 0])));
    }

    #[test]
    fn kernel_is_a_lattice_basis() {
        // 2a - 4b + 6c = 0 admits (2, 1, 0) and (1, -1, -1), not only rational multiples
        let rows = vec![ints(&[2, -4, 6])];
        let basis = integer_kernel_basis(&rows, 3);
        assert_eq!(basis.len(), 2);
        assert!(basis.iter().all(|v| in_kernel(&rows, v)));
        // the lattice spanned by the basis has determinant 1 inside the kernel:
        // both generators (2, 1, 0) and (-3, 0, 1) have integer coordinates
        let (u, v) = (&basis[0], &basis[1]);
        let solve = |target: &[BigInt]| {
            (-20i64..=20).any(|x| {
                (-20i64..=20).any(|y| {
                    target
                        .iter()
                        .zip(u.iter().zip(v.iter()))
                        .all(|(t, (a, b))| *t == a * x + b * y)
                })
            })
        };
        assert!(solve(&ints(&[2, 1, 0])));
        assert!(solve(&ints(&[-3, 0, 1])));
    }

    #[test]
    fn poll_failure_stops_elimination() {
        let rows = vec![ints(&[1, -1, 0]), ints(&[0, 1, -1])];
        let mut calls = 0;
        let result = integer_kernel_basis_with(&rows, 3, || {
            calls += 1;
            if calls > 1 { Err("stop") } else { Ok(()) }
        });
        assert_eq!(result, Err("stop"));
        assert_eq!(calls, 2);
    }

    #[test]
    fn full_rank_has_trivial_kernel() {
        let rows = vec![ints(&[1, 0]), ints(&[0, 1])];
        assert!(integer_kernel_basis(&rows, 2).is_empty());
    }
}

//! Distributed vector/matrix assembly: DOF map and scatter, owned-segment
//! vectors and row-map matrices with off-processor stashes, insert-mode
//! discipline and the row merge/clear protocol.

pub mod dof;
pub mod matrix;
pub mod vector;

pub use dof::{DofLayout, DofMap, ScatterContext};
pub use matrix::ParMatrix;
pub use vector::ParVector;

use crate::parallel::ExecutionContext;

/// How the next batch of values combines with what is already stored.
/// Switching between `Insert` and `Add` requires flushing the stash first.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum InsertMode {
    #[default]
    NotSet,
    Insert,
    Add,
}

/// Anything with an off-processor stash that can be flushed collectively.
pub trait Assemble {
    fn assemble(&mut self, exec: &ExecutionContext);
}

/// Record that the caller is about to write with `target`, flushing pending
/// entries when the previous mode differs. Every rank takes the same branch
/// because the mode sequence is identical everywhere.
pub fn switch_mode<A: Assemble>(target: InsertMode, flag: &mut InsertMode, a: &mut A, exec: &ExecutionContext) {
    if *flag != target && *flag != InsertMode::NotSet {
        a.assemble(exec);
    }
    *flag = target;
}

/// Row merge/clear directives produced by a boundary condition's
/// preprocess step: add `src[k]` into `dst[k]`, then zero every row in
/// `clear`.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RowDirectives {
    pub src: Vec<usize>,
    pub dst: Vec<usize>,
    pub clear: Vec<usize>,
}

impl RowDirectives {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn merge(&mut self, src: usize, dst: usize) {
        self.src.push(src);
        self.dst.push(dst);
    }

    pub fn clear_row(&mut self, row: usize) {
        self.clear.push(row);
    }

    pub fn extend(&mut self, other: RowDirectives) {
        self.src.extend(other.src);
        self.dst.extend(other.dst);
        self.clear.extend(other.clear);
    }

    pub fn is_empty(&self) -> bool {
        self.src.is_empty() && self.clear.is_empty()
    }

    /// Apply to a plain, fully global residual.
    pub fn apply_to_slice(&self, f: &mut [f64]) {
        let moved: Vec<(usize, f64)> = self.src.iter().zip(&self.dst).map(|(&s, &d)| (d, f[s])).collect();
        for (d, v) in moved {
            f[d] += v;
        }
        for &r in &self.clear {
            f[r] = 0.0;
        }
    }

    /// Collective. Directives from every rank are gathered so that a merge
    /// whose source and destination live on different ranks still lands.
    pub fn apply_to_vector(&self, exec: &ExecutionContext, v: &mut ParVector) {
        let src = exec.all_gather_indices(&self.src);
        let dst = exec.all_gather_indices(&self.dst);
        let clear = exec.all_gather_indices(&self.clear);

        let moved: Vec<(usize, f64)> = src
            .iter()
            .zip(&dst)
            .filter_map(|(&s, &d)| v.get(s).map(|val| (d, val)))
            .collect();
        for (d, val) in moved {
            v.add_value(d, val);
        }
        v.assemble(exec);

        for r in clear {
            v.zero_owned_row(r);
        }
    }

    /// Collective. Matrix counterpart of [`RowDirectives::apply_to_vector`].
    pub fn apply_to_matrix(&self, exec: &ExecutionContext, m: &mut ParMatrix) {
        let src = exec.all_gather_indices(&self.src);
        let dst = exec.all_gather_indices(&self.dst);
        let clear = exec.all_gather_indices(&self.clear);

        m.add_rows_to_rows(&src, &dst);
        m.assemble(exec);
        m.clear_rows(&clear);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    #[test]
    fn merge_then_clear_on_plain_residual() {
        let mut f = vec![0.0; 6];
        f[2] = 1.0;
        f[5] = 3.0;
        let mut d = RowDirectives::new();
        d.merge(5, 2);
        d.clear_row(5);
        d.apply_to_slice(&mut f);
        assert_eq!(f[2], 4.0);
        assert_eq!(f[5], 0.0);
    }

    #[test]
    fn merges_read_pre_merge_values() {
        // 0 -> 1 and 1 -> 2 both read the values before any add happens.
        let mut f = vec![1.0, 10.0, 100.0];
        let mut d = RowDirectives::new();
        d.merge(0, 1);
        d.merge(1, 2);
        d.apply_to_slice(&mut f);
        assert_eq!(f, vec![1.0, 11.0, 110.0]);
    }

    proptest! {
        #[test]
        fn vector_and_slice_agree(
            values in proptest::collection::vec(-1e3f64..1e3, 8),
            pairs in proptest::collection::vec((0usize..8, 0usize..8), 0..5),
        ) {
            let mut d = RowDirectives::new();
            for &(s, t) in &pairs {
                d.merge(s, t);
                d.clear_row(s);
            }
            let mut plain = values.clone();
            d.apply_to_slice(&mut plain);

            let exec = ExecutionContext::serial();
            let mut v = ParVector::from_global(&DofLayout::single(8), &values);
            d.apply_to_vector(&exec, &mut v);
            prop_assert_eq!(v.owned(), plain.as_slice());
        }
    }
}

use std::collections::BTreeMap;
use std::ops::Range;

use super::{Assemble, DofLayout, ParVector};
use crate::parallel::ExecutionContext;

/// Row-distributed sparse matrix. Each owned row is an ordered column map so
/// repeated additions to the same entry accumulate and CSR export comes out
/// with sorted columns.
#[derive(Debug, Clone)]
pub struct ParMatrix {
    range: Range<usize>,
    n_global: usize,
    rows: Vec<BTreeMap<usize, f64>>,
    stash: Vec<(usize, usize, f64)>,
}

impl ParMatrix {
    pub fn new(layout: &DofLayout) -> Self {
        let range = layout.owned_range();
        Self {
            rows: vec![BTreeMap::new(); range.len()],
            range,
            n_global: layout.n_global,
            stash: Vec::new(),
        }
    }

    #[inline]
    pub fn n_global(&self) -> usize {
        self.n_global
    }

    #[inline]
    pub fn range(&self) -> Range<usize> {
        self.range.clone()
    }

    pub fn add_value(&mut self, row: usize, col: usize, v: f64) {
        if self.range.contains(&row) {
            *self.rows[row - self.range.start].entry(col).or_insert(0.0) += v;
        } else {
            self.stash.push((row, col, v));
        }
    }

    /// Add one row's worth of (column, value) pairs.
    pub fn add_row_values(&mut self, row: usize, cols: &[usize], vals: &[f64]) {
        for (&c, &v) in cols.iter().zip(vals) {
            self.add_value(row, c, v);
        }
    }

    /// Zero all values but keep the nonzero pattern.
    pub fn zero_entries(&mut self) {
        for row in &mut self.rows {
            for v in row.values_mut() {
                *v = 0.0;
            }
        }
        self.stash.clear();
    }

    pub fn get(&self, row: usize, col: usize) -> Option<f64> {
        if !self.range.contains(&row) {
            return None;
        }
        Some(self.rows[row - self.range.start].get(&col).copied().unwrap_or(0.0))
    }

    pub fn row(&self, row: usize) -> Option<&BTreeMap<usize, f64>> {
        self.range.contains(&row).then(|| &self.rows[row - self.range.start])
    }

    /// Flush stashed entries. `final_assembly` only marks the intent; the
    /// exchange is the same either way.
    pub fn close(&mut self, exec: &ExecutionContext, final_assembly: bool) {
        self.assemble(exec);
        if final_assembly {
            tracing::trace!(rank = exec.rank, nnz = self.nnz_local(), "jacobian assembled");
        }
    }

    /// Every pair whose source row is owned here copies that row into the
    /// destination (possibly stashed). Sources are read before any add.
    pub fn add_rows_to_rows(&mut self, src: &[usize], dst: &[usize]) {
        let mut moved: Vec<(usize, Vec<(usize, f64)>)> = Vec::new();
        for (&s, &d) in src.iter().zip(dst) {
            if let Some(row) = self.row(s) {
                moved.push((d, row.iter().map(|(&c, &v)| (c, v)).collect()));
            }
        }
        for (d, entries) in moved {
            for (c, v) in entries {
                self.add_value(d, c, v);
            }
        }
    }

    pub fn clear_rows(&mut self, rows: &[usize]) {
        for &r in rows {
            if self.range.contains(&r) {
                for v in self.rows[r - self.range.start].values_mut() {
                    *v = 0.0;
                }
            }
        }
    }

    /// Left diagonal scaling: row r is multiplied by `l[r]`.
    pub fn scale_rows(&mut self, l: &ParVector) {
        for (row, &s) in self.rows.iter_mut().zip(l.owned()) {
            for v in row.values_mut() {
                *v *= s;
            }
        }
    }

    pub fn nnz_local(&self) -> usize {
        self.rows.iter().map(BTreeMap::len).sum()
    }

    /// Collective. Global (row, col, value) list in row order.
    pub fn gather_triplets(&self, exec: &ExecutionContext) -> Vec<(usize, usize, f64)> {
        let local: Vec<(usize, usize, f64)> = self
            .rows
            .iter()
            .enumerate()
            .flat_map(|(i, row)| {
                let r = self.range.start + i;
                row.iter().map(move |(&c, &v)| (r, c, v))
            })
            .collect();
        exec.all_gather_triplets(&local)
    }

    /// Collective. Global CSR arrays `(indptr, indices, data)` with sorted
    /// columns.
    pub fn gather_csr(&self, exec: &ExecutionContext) -> (Vec<usize>, Vec<usize>, Vec<f64>) {
        let triplets = self.gather_triplets(exec);
        let n = self.n_global;
        let mut indptr = vec![0usize; n + 1];
        for &(r, _, _) in &triplets {
            indptr[r + 1] += 1;
        }
        for i in 0..n {
            indptr[i + 1] += indptr[i];
        }
        // rows arrive grouped and column-sorted, rank by rank
        let indices = triplets.iter().map(|&(_, c, _)| c).collect();
        let data = triplets.iter().map(|&(_, _, v)| v).collect();
        (indptr, indices, data)
    }
}

impl Assemble for ParMatrix {
    fn assemble(&mut self, exec: &ExecutionContext) {
        let incoming = exec.all_gather_triplets(&self.stash);
        self.stash.clear();
        for (r, c, v) in incoming {
            if self.range.contains(&r) {
                *self.rows[r - self.range.start].entry(c).or_insert(0.0) += v;
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::assembly::RowDirectives;

    #[test]
    fn row_merge_moves_entries_then_clears() {
        let layout = DofLayout::single(3);
        let exec = ExecutionContext::serial();
        let mut m = ParMatrix::new(&layout);
        m.add_row_values(0, &[0, 2], &[1.0, 2.0]);
        m.add_row_values(2, &[1, 2], &[3.0, 4.0]);
        let mut d = RowDirectives::new();
        d.merge(2, 0);
        d.clear_row(2);
        d.apply_to_matrix(&exec, &mut m);
        assert_eq!(m.get(0, 0), Some(1.0));
        assert_eq!(m.get(0, 1), Some(3.0));
        assert_eq!(m.get(0, 2), Some(6.0));
        assert_eq!(m.get(2, 2), Some(0.0));

        let (indptr, indices, _) = m.gather_csr(&exec);
        assert_eq!(indptr, vec![0, 3, 3, 5]);
        assert_eq!(indices, vec![0, 1, 2, 1, 2]);
    }
}

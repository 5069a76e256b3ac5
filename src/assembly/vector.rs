use std::ops::Range;

use super::{Assemble, DofLayout};
use crate::parallel::ExecutionContext;

/// A globally indexed vector of which this rank stores a contiguous owned
/// segment. Writes to rows owned elsewhere are stashed until [`assemble`].
///
/// [`assemble`]: Assemble::assemble
#[derive(Debug, Clone)]
pub struct ParVector {
    range: Range<usize>,
    n_global: usize,
    values: Vec<f64>,
    add_stash: Vec<(usize, f64)>,
    insert_stash: Vec<(usize, f64)>,
}

impl ParVector {
    pub fn new(layout: &DofLayout) -> Self {
        let range = layout.owned_range();
        Self {
            values: vec![0.0; range.len()],
            range,
            n_global: layout.n_global,
            add_stash: Vec::new(),
            insert_stash: Vec::new(),
        }
    }

    /// Take this rank's segment out of a fully global array.
    pub fn from_global(layout: &DofLayout, global: &[f64]) -> Self {
        let mut v = Self::new(layout);
        v.values.copy_from_slice(&global[v.range.clone()]);
        v
    }

    #[inline]
    pub fn range(&self) -> Range<usize> {
        self.range.clone()
    }

    #[inline]
    pub fn n_global(&self) -> usize {
        self.n_global
    }

    #[inline]
    pub fn is_owned(&self, row: usize) -> bool {
        self.range.contains(&row)
    }

    #[inline]
    pub fn owned(&self) -> &[f64] {
        &self.values
    }

    #[inline]
    pub fn owned_mut(&mut self) -> &mut [f64] {
        &mut self.values
    }

    pub fn get(&self, row: usize) -> Option<f64> {
        self.is_owned(row).then(|| self.values[row - self.range.start])
    }

    pub fn add_value(&mut self, row: usize, v: f64) {
        if self.is_owned(row) {
            self.values[row - self.range.start] += v;
        } else {
            self.add_stash.push((row, v));
        }
    }

    pub fn insert_value(&mut self, row: usize, v: f64) {
        if self.is_owned(row) {
            self.values[row - self.range.start] = v;
        } else {
            self.insert_stash.push((row, v));
        }
    }

    pub(crate) fn zero_owned_row(&mut self, row: usize) {
        if self.is_owned(row) {
            self.values[row - self.range.start] = 0.0;
        }
    }

    pub fn zero(&mut self) {
        self.values.fill(0.0);
        self.add_stash.clear();
        self.insert_stash.clear();
    }

    pub fn fill(&mut self, v: f64) {
        self.values.fill(v);
    }

    pub fn copy_from(&mut self, other: &ParVector) {
        self.values.copy_from_slice(&other.values);
    }

    pub fn pointwise_mult(&mut self, l: &ParVector) {
        for (a, b) in self.values.iter_mut().zip(&l.values) {
            *a *= b;
        }
    }

    pub fn pointwise_divide(&mut self, l: &ParVector) {
        for (a, b) in self.values.iter_mut().zip(&l.values) {
            *a /= b;
        }
    }

    /// `self += alpha * x`
    pub fn axpy(&mut self, alpha: f64, x: &ParVector) {
        for (a, b) in self.values.iter_mut().zip(&x.values) {
            *a += alpha * b;
        }
    }

    /// `x - y`
    pub fn difference(x: &ParVector, y: &ParVector) -> ParVector {
        let mut w = x.clone();
        w.axpy(-1.0, y);
        w
    }

    /// Collective.
    pub fn norm2(&self, exec: &ExecutionContext) -> f64 {
        let local: f64 = self.values.iter().map(|v| v * v).sum();
        exec.sum(local).sqrt()
    }

    /// Collective. False if any rank holds a NaN or infinity.
    pub fn all_finite(&self, exec: &ExecutionContext) -> bool {
        let bad = self.values.iter().filter(|v| !v.is_finite()).count();
        exec.sum_count(bad) == 0
    }

    /// Collective. The full global array, identical on every rank.
    pub fn gather_global(&self, exec: &ExecutionContext) -> Vec<f64> {
        exec.all_gather(&self.values)
    }
}

impl Assemble for ParVector {
    fn assemble(&mut self, exec: &ExecutionContext) {
        let inserts = exec.all_gather_entries(&self.insert_stash);
        let adds = exec.all_gather_entries(&self.add_stash);
        self.insert_stash.clear();
        self.add_stash.clear();
        for (row, v) in inserts {
            if self.is_owned(row) {
                self.values[row - self.range.start] = v;
            }
        }
        for (row, v) in adds {
            if self.is_owned(row) {
                self.values[row - self.range.start] += v;
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn off_processor_adds_land_after_assembly() {
        let layout = DofLayout::single(4);
        let exec = ExecutionContext::serial();
        let mut v = ParVector::new(&layout);
        v.add_value(1, 2.0);
        v.add_value(1, 0.5);
        v.insert_value(3, 7.0);
        v.assemble(&exec);
        assert_eq!(v.owned(), &[0.0, 2.5, 0.0, 7.0]);
        assert!(v.all_finite(&exec));
        assert_eq!(v.norm2(&exec), (2.5f64 * 2.5 + 49.0).sqrt());
    }
}

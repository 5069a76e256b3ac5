//! Explicit execution context and collective communication.
//!
//! Every collective on [`Communicator`] must be reached by all ranks in the
//! same order. Callers never branch around a reduction on rank-local data.

pub mod thread_comm;

use std::fmt;
use std::ops::Range;
use std::sync::Arc;

pub use thread_comm::ThreadComm;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReduceOp {
    Sum,
    Max,
    Min,
}

impl ReduceOp {
    #[inline]
    pub fn apply(self, a: f64, b: f64) -> f64 {
        match self {
            ReduceOp::Sum => a + b,
            ReduceOp::Max => a.max(b),
            ReduceOp::Min => a.min(b),
        }
    }
}

pub trait Communicator: Send + Sync + fmt::Debug {
    fn rank(&self) -> usize;
    fn size(&self) -> usize;

    /// Element-wise reduction of `values` across all ranks, in place.
    fn all_reduce(&self, values: &mut [f64], op: ReduceOp);

    /// Concatenation of every rank's slice, ordered by rank.
    fn all_gather(&self, values: &[f64]) -> Vec<f64>;

    fn all_gather_entries(&self, entries: &[(usize, f64)]) -> Vec<(usize, f64)>;

    fn all_gather_triplets(&self, entries: &[(usize, usize, f64)]) -> Vec<(usize, usize, f64)>;

    fn all_gather_indices(&self, indices: &[usize]) -> Vec<usize>;

    fn barrier(&self);
}

/// Single process communicator. All collectives are identities.
#[derive(Debug, Default, Clone, Copy)]
pub struct SerialComm;

impl Communicator for SerialComm {
    fn rank(&self) -> usize {
        0
    }

    fn size(&self) -> usize {
        1
    }

    fn all_reduce(&self, _values: &mut [f64], _op: ReduceOp) {}

    fn all_gather(&self, values: &[f64]) -> Vec<f64> {
        values.to_vec()
    }

    fn all_gather_entries(&self, entries: &[(usize, f64)]) -> Vec<(usize, f64)> {
        entries.to_vec()
    }

    fn all_gather_triplets(&self, entries: &[(usize, usize, f64)]) -> Vec<(usize, usize, f64)> {
        entries.to_vec()
    }

    fn all_gather_indices(&self, indices: &[usize]) -> Vec<usize> {
        indices.to_vec()
    }

    fn barrier(&self) {}
}

/// Rank id, rank count and communicator handle, threaded through every
/// assembly and controller call.
#[derive(Clone)]
pub struct ExecutionContext {
    pub rank: usize,
    pub size: usize,
    comm: Arc<dyn Communicator>,
}

impl fmt::Debug for ExecutionContext {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ExecutionContext")
            .field("rank", &self.rank)
            .field("size", &self.size)
            .finish()
    }
}

impl Default for ExecutionContext {
    fn default() -> Self {
        Self::serial()
    }
}

impl ExecutionContext {
    pub fn new(comm: Arc<dyn Communicator>) -> Self {
        Self {
            rank: comm.rank(),
            size: comm.size(),
            comm,
        }
    }

    pub fn serial() -> Self {
        Self::new(Arc::new(SerialComm))
    }

    pub fn comm(&self) -> &dyn Communicator {
        self.comm.as_ref()
    }

    /// The rank that owns electrode and hub unknowns.
    #[inline]
    pub fn is_last_rank(&self) -> bool {
        self.rank + 1 == self.size
    }

    pub fn sum(&self, v: f64) -> f64 {
        let mut buf = [v];
        self.comm.all_reduce(&mut buf, ReduceOp::Sum);
        buf[0]
    }

    pub fn max(&self, v: f64) -> f64 {
        let mut buf = [v];
        self.comm.all_reduce(&mut buf, ReduceOp::Max);
        buf[0]
    }

    pub fn min(&self, v: f64) -> f64 {
        let mut buf = [v];
        self.comm.all_reduce(&mut buf, ReduceOp::Min);
        buf[0]
    }

    /// Counts travel as f64; exact below 2^53.
    pub fn sum_count(&self, v: usize) -> usize {
        self.sum(v as f64).round() as usize
    }

    pub fn sum_in_place(&self, values: &mut [f64]) {
        self.comm.all_reduce(values, ReduceOp::Sum);
    }

    pub fn all_gather(&self, values: &[f64]) -> Vec<f64> {
        self.comm.all_gather(values)
    }

    pub fn all_gather_entries(&self, entries: &[(usize, f64)]) -> Vec<(usize, f64)> {
        self.comm.all_gather_entries(entries)
    }

    pub fn all_gather_triplets(&self, entries: &[(usize, usize, f64)]) -> Vec<(usize, usize, f64)> {
        self.comm.all_gather_triplets(entries)
    }

    pub fn all_gather_indices(&self, indices: &[usize]) -> Vec<usize> {
        self.comm.all_gather_indices(indices)
    }

    pub fn barrier(&self) {
        self.comm.barrier();
    }
}

/// Contiguous block decomposition of `n` items over `size` ranks.
/// The first `n % size` ranks receive one extra item.
pub fn block_range(n: usize, size: usize, rank: usize) -> Range<usize> {
    let size = size.max(1);
    let base = n / size;
    let rem = n % size;
    let start = rank * base + rank.min(rem);
    let local = base + usize::from(rank < rem);
    start..start + local
}

/// Owner of item `i` under [`block_range`].
pub fn block_owner(n: usize, size: usize, i: usize) -> usize {
    let size = size.max(1);
    let base = n / size;
    let rem = n % size;
    let fat = (base + 1) * rem;
    if i < fat {
        i / (base + 1)
    } else if base == 0 {
        size - 1
    } else {
        rem + (i - fat) / base
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn block_decomposition_covers_everything_once() {
        for n in [0usize, 1, 7, 10, 33] {
            for size in 1..5 {
                let mut next = 0;
                for rank in 0..size {
                    let r = block_range(n, size, rank);
                    assert_eq!(r.start, next);
                    for i in r.clone() {
                        assert_eq!(block_owner(n, size, i), rank);
                    }
                    next = r.end;
                }
                assert_eq!(next, n);
            }
        }
    }

    #[test]
    fn serial_reductions_are_identities() {
        let exec = ExecutionContext::serial();
        assert_eq!(exec.sum(2.5), 2.5);
        assert_eq!(exec.max(-1.0), -1.0);
        assert_eq!(exec.sum_count(4), 4);
        assert!(exec.is_last_rank());
    }
}

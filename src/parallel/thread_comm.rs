use std::fmt;
use std::sync::{Arc, Barrier, Mutex, PoisonError};

use super::{Communicator, ReduceOp};

#[derive(Debug, Clone)]
enum Payload {
    Values(Vec<f64>),
    Entries(Vec<(usize, f64)>),
    Triplets(Vec<(usize, usize, f64)>),
    Indices(Vec<usize>),
}

struct Shared {
    size: usize,
    barrier: Barrier,
    slots: Mutex<Vec<Option<Payload>>>,
}

/// In-process communicator: one instance per thread, all sharing a barrier
/// and a slot table. Each collective publishes into the caller's slot,
/// waits, reads every slot, then waits again before the slot is reused.
#[derive(Clone)]
pub struct ThreadComm {
    rank: usize,
    shared: Arc<Shared>,
}

impl fmt::Debug for ThreadComm {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ThreadComm")
            .field("rank", &self.rank)
            .field("size", &self.shared.size)
            .finish()
    }
}

impl ThreadComm {
    /// One communicator per rank, to be moved into its own thread.
    pub fn universe(size: usize) -> Vec<ThreadComm> {
        let size = size.max(1);
        let shared = Arc::new(Shared {
            size,
            barrier: Barrier::new(size),
            slots: Mutex::new(vec![None; size]),
        });
        (0..size)
            .map(|rank| ThreadComm {
                rank,
                shared: Arc::clone(&shared),
            })
            .collect()
    }

    fn exchange(&self, mine: Payload) -> Vec<Payload> {
        {
            let mut slots = self.shared.slots.lock().unwrap_or_else(PoisonError::into_inner);
            slots[self.rank] = Some(mine);
        }
        self.shared.barrier.wait();
        let all: Vec<Payload> = {
            let slots = self.shared.slots.lock().unwrap_or_else(PoisonError::into_inner);
            slots.iter().flatten().cloned().collect()
        };
        self.shared.barrier.wait();
        all
    }
}

impl Communicator for ThreadComm {
    fn rank(&self) -> usize {
        self.rank
    }

    fn size(&self) -> usize {
        self.shared.size
    }

    fn all_reduce(&self, values: &mut [f64], op: ReduceOp) {
        let all = self.exchange(Payload::Values(values.to_vec()));
        let mut first = true;
        for p in all {
            if let Payload::Values(v) = p {
                for (dst, src) in values.iter_mut().zip(v) {
                    *dst = if first { src } else { op.apply(*dst, src) };
                }
                first = false;
            }
        }
    }

    fn all_gather(&self, values: &[f64]) -> Vec<f64> {
        self.exchange(Payload::Values(values.to_vec()))
            .into_iter()
            .flat_map(|p| match p {
                Payload::Values(v) => v,
                _ => Vec::new(),
            })
            .collect()
    }

    fn all_gather_entries(&self, entries: &[(usize, f64)]) -> Vec<(usize, f64)> {
        self.exchange(Payload::Entries(entries.to_vec()))
            .into_iter()
            .flat_map(|p| match p {
                Payload::Entries(v) => v,
                _ => Vec::new(),
            })
            .collect()
    }

    fn all_gather_triplets(&self, entries: &[(usize, usize, f64)]) -> Vec<(usize, usize, f64)> {
        self.exchange(Payload::Triplets(entries.to_vec()))
            .into_iter()
            .flat_map(|p| match p {
                Payload::Triplets(v) => v,
                _ => Vec::new(),
            })
            .collect()
    }

    fn all_gather_indices(&self, indices: &[usize]) -> Vec<usize> {
        self.exchange(Payload::Indices(indices.to_vec()))
            .into_iter()
            .flat_map(|p| match p {
                Payload::Indices(v) => v,
                _ => Vec::new(),
            })
            .collect()
    }

    fn barrier(&self) {
        self.shared.barrier.wait();
    }
}

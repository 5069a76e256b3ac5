use std::sync::Arc;
use std::thread;

use vfvm_device::assembly::{Assemble, DofLayout, ParMatrix, ParVector, RowDirectives};
use vfvm_device::parallel::{ExecutionContext, ThreadComm};

fn split_layout(n: usize, rank: usize, cut: usize) -> DofLayout {
    DofLayout {
        n_global: n,
        ranges: vec![0..cut, cut..n],
        rank,
    }
}

fn merge_five_into_two() -> RowDirectives {
    let mut d = RowDirectives::new();
    d.merge(5, 2);
    d.clear_row(5);
    d
}

#[test]
fn merge_and_clear_serial() {
    let exec = ExecutionContext::serial();
    let layout = DofLayout::single(6);
    let mut f = ParVector::new(&layout);
    f.insert_value(2, 1.0);
    f.insert_value(5, 3.0);
    merge_five_into_two().apply_to_vector(&exec, &mut f);
    assert_eq!(f.owned(), &[0.0, 0.0, 4.0, 0.0, 0.0, 0.0]);
}

#[test]
fn merge_across_ranks_lands_on_the_owner() {
    // row 2 lives on rank 0, row 5 on rank 1; only rank 1 knows the merge
    let comms = ThreadComm::universe(2);
    let globals: Vec<Vec<f64>> = thread::scope(|s| {
        let handles: Vec<_> = comms
            .into_iter()
            .map(|comm| {
                s.spawn(move || {
                    let exec = ExecutionContext::new(Arc::new(comm));
                    let layout = split_layout(6, exec.rank, 3);
                    let mut f = ParVector::new(&layout);
                    if exec.rank == 1 {
                        f.add_value(2, 1.0);
                        f.add_value(5, 3.0);
                    }
                    f.assemble(&exec);
                    let d = if exec.rank == 1 { merge_five_into_two() } else { RowDirectives::new() };
                    d.apply_to_vector(&exec, &mut f);
                    f.gather_global(&exec)
                })
            })
            .collect();
        handles.into_iter().map(|h| h.join().unwrap()).collect()
    });
    for g in globals {
        assert_eq!(g, vec![0.0, 0.0, 4.0, 0.0, 0.0, 0.0]);
    }
}

#[test]
fn matrix_rows_merge_before_clear() {
    let exec = ExecutionContext::serial();
    let layout = DofLayout::single(4);
    let mut m = ParMatrix::new(&layout);
    m.add_value(1, 1, 2.0);
    m.add_value(3, 1, 1.0);
    m.add_value(3, 3, 5.0);
    m.assemble(&exec);
    let mut d = RowDirectives::new();
    d.merge(3, 1);
    d.clear_row(3);
    d.apply_to_matrix(&exec, &mut m);
    m.add_value(3, 3, 1.0);
    m.close(&exec, true);
    assert_eq!(m.get(1, 1), Some(3.0));
    assert_eq!(m.get(1, 3), Some(5.0));
    assert_eq!(m.get(3, 3), Some(1.0));
    assert_eq!(m.get(3, 1).unwrap_or(0.0), 0.0);
}

use super::{BcContext, BoundaryEquations, BoundaryState, Site};
use crate::assembly::{InsertMode, ParMatrix, ParVector, RowDirectives, switch_mode};
use crate::physics::SolutionVariable;

const COUPLED: [SolutionVariable; 2] = [SolutionVariable::Potential, SolutionVariable::Temperature];

/// Coincident nodes of two or more regions. The highest-priority region
/// node keeps its equations and absorbs the flux rows of the others, which
/// are replaced by equality constraints.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct InterfaceCoupling;

fn sites<'a>(cx: &BcContext<'a>, bc: &BoundaryState, rank: usize) -> Vec<(Site<'a>, Vec<Site<'a>>)> {
    bc.owned_nodes(rank)
        .filter_map(|bn| {
            let mut all = bn
                .region_nodes
                .iter()
                .map(|rn| Site::resolve(cx.regions, rn))
                .filter(|s| s.has_unknowns());
            let primary = all.next()?;
            Some((primary, all.collect()))
        })
        .collect()
}

impl BoundaryEquations for InterfaceCoupling {
    fn function_preprocess(&self, bc: &BoundaryState, cx: &BcContext, _lx: &[f64]) -> RowDirectives {
        let mut d = RowDirectives::new();
        for (primary, secondary) in sites(cx, bc, cx.exec.rank) {
            for s in &secondary {
                for var in COUPLED {
                    if let (Some(src), Some(dst)) = (s.global(var), primary.global(var)) {
                        d.merge(src, dst);
                        d.clear_row(src);
                    }
                }
            }
        }
        d
    }

    fn function(&self, bc: &mut BoundaryState, cx: &BcContext, lx: &[f64], f: &mut ParVector, mode: &mut InsertMode) {
        switch_mode(InsertMode::Add, mode, f, cx.exec);
        for (primary, secondary) in sites(cx, bc, cx.exec.rank) {
            for s in &secondary {
                for var in COUPLED {
                    if let (Some(row), Some(_)) = (s.global(var), primary.global(var)) {
                        f.add_value(row, s.value(lx, var) - primary.value(lx, var));
                    }
                }
            }
        }
    }

    fn jacobian(&self, bc: &BoundaryState, cx: &BcContext, _lx: &[f64], jac: &mut ParMatrix, mode: &mut InsertMode) {
        switch_mode(InsertMode::Add, mode, jac, cx.exec);
        for (primary, secondary) in sites(cx, bc, cx.exec.rank) {
            for s in &secondary {
                for var in COUPLED {
                    if let (Some(row), Some(col)) = (s.global(var), primary.global(var)) {
                        jac.add_value(row, row, 1.0);
                        jac.add_value(row, col, -1.0);
                    }
                }
            }
        }
    }
}

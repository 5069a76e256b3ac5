//! Per-variable solution and residual norms used for Newton convergence.

use std::fmt;

use super::{ElectrodeBlock, NodeBlock, ResidualTolerances};
use crate::parallel::ExecutionContext;
use crate::physics::SolutionVariable;

/// L2 norms of the solution components and of each equation's unscaled
/// residual, summed over every rank.
#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct SolutionNorms {
    pub potential: f64,
    pub electron: f64,
    pub hole: f64,
    pub temperature: f64,
    pub elec_temperature: f64,
    pub hole_temperature: f64,

    pub poisson: f64,
    pub elec_continuity: f64,
    pub hole_continuity: f64,
    pub heat: f64,
    pub elec_energy: f64,
    pub hole_energy: f64,
    pub electrode: f64,
}

impl SolutionNorms {
    const LEN: usize = 13;

    fn to_array(self) -> [f64; Self::LEN] {
        [
            self.potential,
            self.electron,
            self.hole,
            self.temperature,
            self.elec_temperature,
            self.hole_temperature,
            self.poisson,
            self.elec_continuity,
            self.hole_continuity,
            self.heat,
            self.elec_energy,
            self.hole_energy,
            self.electrode,
        ]
    }

    fn from_array(a: [f64; Self::LEN]) -> Self {
        Self {
            potential: a[0],
            electron: a[1],
            hole: a[2],
            temperature: a[3],
            elec_temperature: a[4],
            hole_temperature: a[5],
            poisson: a[6],
            elec_continuity: a[7],
            hole_continuity: a[8],
            heat: a[9],
            elec_energy: a[10],
            hole_energy: a[11],
            electrode: a[12],
        }
    }

    /// Every residual norm below its tolerance.
    pub fn converged(&self, tol: &ResidualTolerances) -> bool {
        self.poisson < tol.poisson
            && self.elec_continuity < tol.continuity
            && self.hole_continuity < tol.continuity
            && self.heat < tol.heat
            && self.elec_energy < tol.energy
            && self.hole_energy < tol.energy
            && self.electrode < tol.electrode
    }

    pub fn all_finite(&self) -> bool {
        self.to_array().iter().all(|v| v.is_finite())
    }
}

impl fmt::Display for SolutionNorms {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "poisson {:.3e}, elec {:.3e}, hole {:.3e}, heat {:.3e}, elec energy {:.3e}, hole energy {:.3e}, electrode {:.3e}",
            self.poisson,
            self.elec_continuity,
            self.hole_continuity,
            self.heat,
            self.elec_energy,
            self.hole_energy,
            self.electrode
        )
    }
}

/// Collective. Squared sums per bucket over owned nodes and electrodes,
/// reduced across ranks, then square-rooted.
///
/// `f` must be the unscaled residual. Conductor potential rows carry a
/// current balance, so they are counted with electron continuity.
pub fn error_norm(
    exec: &ExecutionContext,
    blocks: &[NodeBlock],
    electrodes: &[ElectrodeBlock],
    x: &[f64],
    f: &[f64],
) -> SolutionNorms {
    let mut acc = SolutionNorms::default().to_array();
    let sq = |v: f64| v * v;

    for b in blocks {
        let o = b.offset;
        for (k, var) in b.layout.variables().enumerate() {
            let (xv, fv) = (x[o + k], f[o + k]);
            match var {
                SolutionVariable::Potential => {
                    acc[0] += sq(xv);
                    if b.kind.is_conductor() {
                        acc[7] += sq(fv);
                    } else {
                        acc[6] += sq(fv);
                    }
                }
                SolutionVariable::Electron => {
                    acc[1] += sq(xv);
                    acc[7] += sq(fv);
                }
                SolutionVariable::Hole => {
                    acc[2] += sq(xv);
                    acc[8] += sq(fv);
                }
                SolutionVariable::Temperature => {
                    acc[3] += sq(xv);
                    acc[9] += sq(fv);
                }
                SolutionVariable::ElectronTemperature => {
                    if let Some(n) = b.layout.offset(SolutionVariable::Electron) {
                        acc[4] += sq(xv / x[o + n]);
                    }
                    acc[10] += sq(fv);
                }
                SolutionVariable::HoleTemperature => {
                    if let Some(p) = b.layout.offset(SolutionVariable::Hole) {
                        acc[5] += sq(xv / x[o + p]);
                    }
                    acc[11] += sq(fv);
                }
            }
        }
    }

    for e in electrodes {
        acc[0] += sq(x[e.offset]);
        acc[12] += sq(f[e.offset]) / (sq(e.scaling) + 1e-6);
    }

    exec.sum_in_place(&mut acc);
    SolutionNorms::from_array(acc.map(f64::sqrt))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::physics::{AdvancedModel, RegionKind, VariableLayout};
    use approx::assert_relative_eq;

    #[test]
    fn residual_rows_land_in_their_buckets() {
        let exec = ExecutionContext::serial();
        let blocks = [
            NodeBlock {
                kind: RegionKind::Semiconductor,
                layout: VariableLayout::semiconductor(&AdvancedModel::default()),
                offset: 0,
            },
            NodeBlock {
                kind: RegionKind::Metal,
                layout: VariableLayout::lattice(&AdvancedModel::default()),
                offset: 3,
            },
        ];
        let electrodes = [ElectrodeBlock { offset: 4, scaling: 1.0 }];
        let x = [0.5, 1e16, 1e4, 0.1, 2.0];
        let f = [3e-27, 4e-15, 0.0, 3e-15, 1e-3];
        let norms = error_norm(&exec, &blocks, &electrodes, &x, &f);

        assert_relative_eq!(norms.poisson, 3e-27, max_relative = 1e-12);
        // metal potential row counts as a current balance
        assert_relative_eq!(norms.elec_continuity, 5e-15, max_relative = 1e-12);
        assert_relative_eq!(norms.potential, (0.25f64 + 0.01 + 4.0).sqrt(), max_relative = 1e-12);
        assert_relative_eq!(norms.electrode, 1e-3 / (1.0f64 + 1e-6).sqrt(), max_relative = 1e-12);
        assert!(!norms.converged(&ResidualTolerances::default()));

        let quiet = error_norm(&exec, &blocks, &electrodes, &x, &[0.0; 5]);
        assert!(quiet.converged(&ResidualTolerances::default()));
    }
}

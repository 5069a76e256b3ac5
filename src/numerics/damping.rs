//! Newton update post-processing: logarithmic potential damping and the
//! positive-density clamp, plus the projection applied to a predicted
//! solution before a time step.
//!
//! All kernels work on owned segments. `x` is the current iterate, `y` the
//! Newton direction and `w = x - y` the candidate.

use serde::Deserialize;

use super::NodeBlock;
use crate::parallel::ExecutionContext;
use crate::physics::{RegionKind, SolutionVariable};

/// Which parts of the update a post-check modified.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct DampingFlags {
    pub changed_y: bool,
    pub changed_w: bool,
}

impl std::ops::BitOrAssign for DampingFlags {
    fn bitor_assign(&mut self, rhs: Self) {
        self.changed_y |= rhs.changed_y;
        self.changed_w |= rhs.changed_w;
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DampingKind {
    None,
    #[default]
    Potential,
}

/// Updates smaller than this, V, are left alone.
const MIN_POTENTIAL_SPREAD: f64 = 1e-6;
/// Density used when the Newton update overshoots below zero, cm^-3.
pub const DENSITY_FLOOR: f64 = 1.0;
/// Lattice temperature may not drop further than this below ambient, K.
const LATTICE_UNDERSHOOT: f64 = 50.0;
/// Carrier temperatures are held above this fraction of ambient.
const CARRIER_TEMPERATURE_FLOOR: f64 = 0.9;
/// Hottest carrier temperature a Newton update may produce, K.
pub const CARRIER_TEMPERATURE_CEILING: f64 = 1e4;

/// `ln(1 + dV/Vut) / (dV/Vut)`
pub fn log_damping_factor(spread: f64, vut: f64) -> f64 {
    let r = spread / vut;
    r.ln_1p() / r
}

/// Carrier temperature implied by the damped density `n1`, given the
/// previous density `n0` and the raw energy product `energy` of `w`,
/// held between a fraction of ambient and [`CARRIER_TEMPERATURE_CEILING`].
fn carrier_temperature(n0: f64, n1: f64, t0: f64, energy: f64, t_external: f64) -> f64 {
    let t1 = t0 * (1.0 - (n1 / n0).min(2.0)) + energy / n0;
    let floor = CARRIER_TEMPERATURE_FLOOR * t_external;
    if t1.is_nan() {
        return floor;
    }
    t1.clamp(floor, CARRIER_TEMPERATURE_CEILING.max(floor))
}

fn semiconductors(blocks: &[NodeBlock]) -> impl Iterator<Item = &NodeBlock> + '_ {
    blocks.iter().filter(|b| b.kind == RegionKind::Semiconductor)
}

/// Collective. Logarithmic damping of the potential update over
/// semiconductor nodes. The common part of a one-signed update is kept
/// and the remainder is scaled by [`log_damping_factor`] of the global
/// update spread. Densities driven negative are reset to a small fraction
/// of their previous value.
pub fn potential_damping(
    exec: &ExecutionContext,
    blocks: &[NodeBlock],
    x: &[f64],
    y: &[f64],
    w: &mut [f64],
    vut: f64,
) -> DampingFlags {
    let mut dv_max = f64::NEG_INFINITY;
    let mut dv_min = f64::INFINITY;
    for b in semiconductors(blocks) {
        let dv = y[b.offset];
        dv_max = dv_max.max(dv);
        dv_min = dv_min.min(dv);
    }
    let mut dv_max = exec.max(dv_max);
    let mut dv_min = exec.min(dv_min);

    // no semiconductor node anywhere
    if dv_min > dv_max {
        return DampingFlags::default();
    }

    if dv_max.abs() < dv_min.abs() {
        std::mem::swap(&mut dv_max, &mut dv_min);
    }
    let spread = (dv_max - dv_min).abs();
    let common = if dv_max * dv_min > 0.0 { dv_min } else { 0.0 };

    if spread > MIN_POTENTIAL_SPREAD {
        let factor = log_damping_factor(spread, vut);
        for b in semiconductors(blocks) {
            let o = b.offset;
            w[o] = x[o] - (common + factor * (y[o] - common));
            for k in [1, 2] {
                if w[o + k] < 0.0 {
                    w[o + k] = 1e-2 * x[o + k].abs() + 1e-6;
                }
            }
        }
    }

    DampingFlags {
        changed_y: false,
        changed_w: true,
    }
}

/// Keep densities positive and temperatures physical in the candidate.
pub fn check_positive_density(blocks: &[NodeBlock], x: &[f64], w: &mut [f64], t_external: f64) -> DampingFlags {
    for b in semiconductors(blocks) {
        let o = b.offset;
        for k in [1, 2] {
            if w[o + k] < 0.0 {
                w[o + k] = DENSITY_FLOOR;
            }
        }
        clamp_temperatures(b, x, w, t_external);
    }
    DampingFlags {
        changed_y: false,
        changed_w: true,
    }
}

/// Same floors as [`check_positive_density`], applied to a predicted
/// solution `x` with `xo` the previous accepted one.
pub fn projection_positive_density_check(blocks: &[NodeBlock], x: &mut [f64], xo: &[f64], t_external: f64) {
    for b in semiconductors(blocks) {
        let o = b.offset;
        for k in [1, 2] {
            if x[o + k] < DENSITY_FLOOR {
                x[o + k] = DENSITY_FLOOR;
            }
        }
        clamp_temperatures(b, xo, x, t_external);
    }
}

/// `reference` supplies the densities and energies the carrier
/// temperatures are measured against; `w` is modified in place.
fn clamp_temperatures(b: &NodeBlock, reference: &[f64], w: &mut [f64], t_external: f64) {
    let o = b.offset;
    if let Some(k) = b.layout.offset(SolutionVariable::Temperature) {
        w[o + k] = w[o + k].max(t_external - LATTICE_UNDERSHOOT);
    }
    for (var, density) in [
        (SolutionVariable::ElectronTemperature, 1),
        (SolutionVariable::HoleTemperature, 2),
    ] {
        if let Some(k) = b.layout.offset(var) {
            let n0 = reference[o + density];
            let n1 = w[o + density];
            let t0 = reference[o + k] / n0;
            let t1 = carrier_temperature(n0, n1, t0, w[o + k], t_external);
            w[o + k] = t1 * n1;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::physics::{AdvancedModel, VariableLayout};
    use approx::assert_relative_eq;
    use proptest::prelude::*;

    fn semi(offset: usize, model: &AdvancedModel) -> NodeBlock {
        NodeBlock {
            kind: RegionKind::Semiconductor,
            layout: VariableLayout::semiconductor(model),
            offset,
        }
    }

    #[test]
    fn opposite_sign_updates_are_scaled_logarithmically() {
        let exec = ExecutionContext::serial();
        let model = AdvancedModel::default();
        let blocks = [semi(0, &model), semi(3, &model)];
        let x = [0.0, 1e16, 1e4, 0.0, 1e16, 1e4];
        let y = [1.0, 0.0, 0.0, -1.0, 0.0, 0.0];
        let mut w: Vec<f64> = x.iter().zip(&y).map(|(a, b)| a - b).collect();
        let flags = potential_damping(&exec, &blocks, &x, &y, &mut w, 0.025);

        let f = 81f64.ln() / 80.0;
        assert_relative_eq!(f, 0.0549, epsilon = 1e-4);
        assert_relative_eq!(w[0], -f, max_relative = 1e-12);
        assert_relative_eq!(w[3], f, max_relative = 1e-12);
        assert!(flags.changed_w && !flags.changed_y);
    }

    #[test]
    fn one_signed_update_keeps_its_common_part() {
        let exec = ExecutionContext::serial();
        let model = AdvancedModel::default();
        let blocks = [semi(0, &model), semi(3, &model)];
        let x = [0.0, 1e16, 1e4, 0.0, 1e16, 1e4];
        let y = [0.3, 0.0, 0.0, 0.1, 0.0, 0.0];
        let mut w: Vec<f64> = x.iter().zip(&y).map(|(a, b)| a - b).collect();
        potential_damping(&exec, &blocks, &x, &y, &mut w, 0.025);
        let f = log_damping_factor(0.2, 0.025);
        assert_relative_eq!(w[3], -0.1, max_relative = 1e-12);
        assert_relative_eq!(w[0], -(0.1 + f * 0.2), max_relative = 1e-12);
    }

    #[test]
    fn no_semiconductor_leaves_the_update_alone() {
        let exec = ExecutionContext::serial();
        let blocks = [NodeBlock {
            kind: RegionKind::Insulator,
            layout: VariableLayout::lattice(&AdvancedModel::default()),
            offset: 0,
        }];
        let mut w = [-5.0];
        let flags = potential_damping(&exec, &blocks, &[0.0], &[5.0], &mut w, 0.025);
        assert_eq!(w[0], -5.0);
        assert_eq!(flags, DampingFlags::default());
    }

    #[test]
    fn carrier_temperature_follows_the_clamped_density() {
        let model = AdvancedModel {
            enable_tl: true,
            enable_tn: true,
            enable_tp: false,
        };
        let blocks = [semi(0, &model)];
        let x = [0.0, 1e10, 1e10, 300.0, 1e10 * 400.0];
        let mut w = [0.1, -3e10, 5e9, 200.0, 1e10 * 100.0];
        check_positive_density(&blocks, &x, &mut w, 300.0);
        assert_eq!(w[1], DENSITY_FLOOR);
        assert_eq!(w[3], 250.0);
        // T1 = 400 (1 - 1e-10) + 100, far above the floor
        assert_relative_eq!(w[4], (400.0 * (1.0 - 1e-10) + 100.0) * DENSITY_FLOOR, max_relative = 1e-12);
    }

    #[test]
    fn runaway_carrier_temperature_is_capped() {
        let model = AdvancedModel {
            enable_tn: true,
            enable_tp: true,
            ..Default::default()
        };
        let blocks = [semi(0, &model)];
        let x = [0.0, 1e3, 1e16, 1e3 * 300.0, 1e16 * 300.0];
        // the electron energy jumps far more than its density
        let mut w = [0.0, 1e3, 1e16, 1e3 * 2.5e4, 1e16 * 350.0];
        check_positive_density(&blocks, &x, &mut w, 300.0);
        assert_relative_eq!(w[3] / w[1], CARRIER_TEMPERATURE_CEILING, max_relative = 1e-12);
        assert_relative_eq!(w[4] / w[2], 350.0, max_relative = 1e-9);
    }

    #[test]
    fn projection_floors_small_densities() {
        let model = AdvancedModel::default();
        let blocks = [semi(0, &model)];
        let xo = [0.0, 1e3, 1e3];
        let mut x = [0.0, 0.2, 5.0];
        projection_positive_density_check(&blocks, &mut x, &xo, 300.0);
        assert_eq!(x[1], DENSITY_FLOOR);
        assert_eq!(x[2], 5.0);
    }

    proptest! {
        #[test]
        fn clamped_candidate_is_physical(
            n in -1e18f64..1e18,
            p in -1e18f64..1e18,
            t in 0.0f64..1000.0,
        ) {
            let model = AdvancedModel { enable_tl: true, ..Default::default() };
            let blocks = [semi(0, &model)];
            let x = [0.0, 1e15, 1e5, 300.0];
            let mut w = [0.0, n, p, t];
            check_positive_density(&blocks, &x, &mut w, 300.0);
            prop_assert!(w[1] > 0.0 || (n == 0.0 && w[1] == 0.0));
            prop_assert!(w[2] > 0.0 || (p == 0.0 && w[2] == 0.0));
            prop_assert!(w[3] >= 250.0);
        }

        #[test]
        fn carrier_temperature_stays_in_band(
            n in -1e18f64..1e18,
            energy in -1e22f64..1e22,
        ) {
            let model = AdvancedModel { enable_tn: true, ..Default::default() };
            let blocks = [semi(0, &model)];
            let x = [0.0, 1e15, 1e5, 1e15 * 300.0];
            let mut w = [0.0, n, 1e5, energy];
            check_positive_density(&blocks, &x, &mut w, 300.0);
            let tn = w[3] / w[1];
            prop_assert!(w[1] > 0.0 || (n == 0.0 && w[1] == 0.0));
            if w[1] > 0.0 {
                prop_assert!(tn >= 270.0 * (1.0 - 1e-12));
                prop_assert!(tn <= CARRIER_TEMPERATURE_CEILING * (1.0 + 1e-12));
            }
        }
    }
}

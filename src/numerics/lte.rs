//! Local truncation error estimate and the BDF2 positivity guard driving
//! the adaptive time step.

use serde::Deserialize;

use super::{NodeBlock, StepContext};
use crate::assembly::ParVector;
use crate::parallel::ExecutionContext;
use crate::physics::{NodeData, RegionKind, SolutionVariable, VariableLayout};

/// Reference density for the absolute LTE tolerance, cm^-3.
pub const CONCENTRATION_SCALE: f64 = 5e22;
/// Reference temperature for the absolute LTE tolerance, K.
pub const TEMPERATURE_SCALE: f64 = 1e4;

#[derive(Debug, Clone, Copy, PartialEq, Deserialize)]
#[serde(default)]
pub struct LteTolerances {
    pub rtol: f64,
    pub atol: f64,
}

impl Default for LteTolerances {
    fn default() -> Self {
        Self { rtol: 1e-3, atol: 1e-4 }
    }
}

/// Accepted solutions, newest first.
#[derive(Debug, Clone, Default)]
pub struct SolutionHistory {
    levels: Vec<ParVector>,
}

impl SolutionHistory {
    const DEPTH: usize = 3;

    pub fn push(&mut self, x: &ParVector) {
        self.levels.insert(0, x.clone());
        self.levels.truncate(Self::DEPTH);
    }

    pub fn clear(&mut self) {
        self.levels.clear();
    }

    pub fn len(&self) -> usize {
        self.levels.len()
    }

    pub fn is_empty(&self) -> bool {
        self.levels.is_empty()
    }

    /// `k = 0` is the last accepted solution.
    pub fn level(&self, k: usize) -> Option<&ParVector> {
        self.levels.get(k)
    }
}

/// Predictor `x_p = cn x_n + cn1 x_{n-1} + cn2 x_{n-2}` and the factor
/// turning `x - x_p` into the truncation error: `(cn, cn1, cn2, factor)`.
pub fn predictor_coefficients(step: &StepContext) -> (f64, f64, f64, f64) {
    let hn = step.dt;
    let hn1 = step.dt_last;
    if step.bdf2_active() {
        let hn2 = step.dt_last_last;
        let cn = 1.0 + hn * (hn + 2.0 * hn1 + hn2) / (hn1 * (hn1 + hn2));
        let cn1 = -hn * (hn + hn1 + hn2) / (hn1 * hn2);
        let cn2 = hn * (hn + hn1) / (hn2 * (hn1 + hn2));
        (cn, cn1, cn2, hn / (hn + hn1 + hn2))
    } else {
        (1.0 + hn / hn1, -hn / hn1, 0.0, hn / (hn + hn1))
    }
}

/// Weight of one unknown in the error norm, or `None` for unknowns that
/// do not count.
fn lte_weight(kind: RegionKind, var: SolutionVariable, x: f64, tol: &LteTolerances) -> Option<f64> {
    match (kind, var) {
        (_, SolutionVariable::Potential) => None,
        (RegionKind::Semiconductor, SolutionVariable::Electron | SolutionVariable::Hole) => {
            Some(tol.rtol * x.abs() + tol.atol * CONCENTRATION_SCALE)
        }
        (_, SolutionVariable::Temperature) => Some(tol.rtol * x + tol.atol * TEMPERATURE_SCALE),
        (RegionKind::Semiconductor, SolutionVariable::ElectronTemperature | SolutionVariable::HoleTemperature) => {
            Some(tol.rtol * x + tol.atol * CONCENTRATION_SCALE * TEMPERATURE_SCALE)
        }
        _ => None,
    }
}

/// Collective. Weighted RMS of the truncation error over every owned
/// unknown except potentials and electrode unknowns. A value above one
/// rejects the step. Returns 1.0 when nothing counts.
pub fn lte_norm(
    exec: &ExecutionContext,
    blocks: &[NodeBlock],
    step: &StepContext,
    tol: &LteTolerances,
    x: &[f64],
    history: [&[f64]; 3],
) -> f64 {
    let (cn, cn1, cn2, factor) = predictor_coefficients(step);
    let [x_n, x_n1, x_n2] = history;

    let mut sum = 0.0;
    let mut count = 0usize;
    for b in blocks {
        count += b.layout.n_vars().saturating_sub(1);
        for (k, var) in b.layout.variables().enumerate() {
            let i = b.offset + k;
            let Some(weight) = lte_weight(b.kind, var, x[i], tol) else {
                continue;
            };
            let predicted = cn * x_n[i] + cn1 * x_n1[i] + if cn2 != 0.0 { cn2 * x_n2[i] } else { 0.0 };
            let e = factor * (x[i] - predicted) / weight;
            sum += e * e;
        }
    }

    let sum = exec.sum(sum);
    let count = exec.sum_count(count);
    if count == 0 {
        return 1.0;
    }
    sum.sqrt() / (count as f64).sqrt()
}

/// Collective. True when the BDF2 extrapolation `a u_n - b u_{n-1}` stays
/// non-negative for every density and energy product, so the scheme may
/// keep second order for the proposed step.
pub fn bdf2_positive_defined<'a>(
    exec: &ExecutionContext,
    step: &StepContext,
    nodes: impl IntoIterator<Item = (&'a VariableLayout, &'a NodeData)>,
) -> bool {
    let r = step.bdf2_ratio();
    let a = 1.0 / (r * (1.0 - r));
    let b = (1.0 - r) / r;
    let mut failures = 0usize;
    for (layout, d) in nodes {
        let mut check = |now: f64, last: f64| {
            if a * now < b * last {
                failures += 1;
            }
        };
        check(d.n, d.n_last);
        check(d.p, d.p_last);
        if layout.has(SolutionVariable::Temperature) {
            check(d.t, d.t_last);
        }
        if layout.has(SolutionVariable::ElectronTemperature) {
            check(d.n * d.tn, d.n_last * d.tn_last);
        }
        if layout.has(SolutionVariable::HoleTemperature) {
            check(d.p * d.tp, d.p_last * d.tp_last);
        }
    }
    exec.sum_count(failures) == 0
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::numerics::TimeScheme;
    use crate::physics::AdvancedModel;
    use approx::assert_relative_eq;

    fn transient(dt: f64, dt_last: f64) -> StepContext {
        StepContext {
            time_dependent: true,
            scheme: TimeScheme::Bdf1,
            dt,
            dt_last,
            dt_last_last: dt_last,
            ..StepContext::default()
        }
    }

    #[test]
    fn bdf1_error_from_linear_extrapolation() {
        let step = transient(1.0, 1.0);
        let (cn, cn1, _, factor) = predictor_coefficients(&step);
        assert_eq!((cn, cn1, factor), (2.0, -1.0, 0.5));
        // x_n = 1.0, x_{n-1} = 0.8 -> predicted 1.2; x = 1.3 -> LTE 0.05
        let predicted = cn * 1.0 + cn1 * 0.8;
        assert_relative_eq!(predicted, 1.2, epsilon = 1e-12);
        assert_relative_eq!(factor * (1.3 - predicted), 0.05, epsilon = 1e-12);
    }

    #[test]
    fn bdf2_predictor_is_exact_for_quadratics() {
        let step = StepContext {
            scheme: TimeScheme::Bdf2,
            bdf2_lower_order: false,
            dt_last_last: 0.5,
            ..transient(0.7, 1.3)
        };
        let (cn, cn1, cn2, _) = predictor_coefficients(&step);
        let u = |t: f64| 2.0 + 3.0 * t - t * t;
        let t = 0.0;
        let predicted = cn * u(t - 0.7) + cn1 * u(t - 2.0) + cn2 * u(t - 2.5);
        assert_relative_eq!(predicted, u(t), epsilon = 1e-10);
    }

    #[test]
    fn norm_skips_potentials_and_counts_the_rest() {
        let exec = ExecutionContext::serial();
        let blocks = [NodeBlock {
            kind: RegionKind::Semiconductor,
            layout: VariableLayout::semiconductor(&AdvancedModel::default()),
            offset: 0,
        }];
        let tol = LteTolerances::default();
        let step = transient(1.0, 1.0);
        let old = [0.0, 1e16, 1e4];
        // potential jumps, densities are on the extrapolation
        let x = [5.0, 1e16, 1e4];
        assert_eq!(lte_norm(&exec, &blocks, &step, &tol, &x, [&old, &old, &old]), 0.0);

        let x = [0.0, 1e16 + 2e19, 1e4];
        let e = 0.5 * 2e19 / (tol.rtol * x[1] + tol.atol * CONCENTRATION_SCALE);
        let r = lte_norm(&exec, &blocks, &step, &tol, &x, [&old, &old, &old]);
        assert_relative_eq!(r, e / 2f64.sqrt(), max_relative = 1e-12);

        assert_eq!(lte_norm(&exec, &[], &step, &tol, &[], [&[], &[], &[]]), 1.0);
    }

    #[test]
    fn fast_falling_density_rejects_second_order() {
        let exec = ExecutionContext::serial();
        let layout = VariableLayout::semiconductor(&AdvancedModel::default());
        let step = transient(1.0, 1.0);
        // r = 1/2: a = 4, b = 1
        let steady = NodeData {
            n: 1.0,
            n_last: 1.0,
            p: 1.0,
            p_last: 1.0,
            ..Default::default()
        };
        assert!(bdf2_positive_defined(&exec, &step, [(&layout, &steady)]));
        let falling = NodeData { n: 0.2, n_last: 1.0, ..steady.clone() };
        assert!(!bdf2_positive_defined(&exec, &step, [(&layout, &steady), (&layout, &falling)]));
    }

    #[test]
    fn history_keeps_three_levels() {
        let layout = crate::assembly::DofLayout::single(1);
        let mut h = SolutionHistory::default();
        for v in 0..5 {
            h.push(&ParVector::from_global(&layout, &[v as f64]));
        }
        assert_eq!(h.len(), 3);
        assert_eq!(h.level(0).map(|x| x.owned()[0]), Some(4.0));
        assert_eq!(h.level(2).map(|x| x.owned()[0]), Some(2.0));
    }
}

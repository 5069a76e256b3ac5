pub mod damping;
pub mod linear;
pub mod lte;
pub mod newton;
pub mod norms;
pub mod timing;
pub mod transient;

use serde::Deserialize;

use crate::physics::{RegionKind, VariableLayout};

/// The unknowns of one owned node as seen by the per-node numerics:
/// region kind, variable layout and the offset of the first unknown into
/// the owned segment.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct NodeBlock {
    pub kind: RegionKind,
    pub layout: VariableLayout,
    pub offset: usize,
}

/// An electrode or hub unknown owned by this rank, with the scaling its
/// residual is normalized by.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ElectrodeBlock {
    pub offset: usize,
    pub scaling: f64,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TimeScheme {
    #[default]
    Bdf1,
    Bdf2,
}

/// Time-level information handed to every region and boundary call.
/// Steady solves use `dt = inf`, which removes reactive circuit terms.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct StepContext {
    pub time_dependent: bool,
    pub scheme: TimeScheme,
    /// Set when this step is demoted to first order.
    pub bdf2_lower_order: bool,
    pub time: f64,
    pub dt: f64,
    pub dt_last: f64,
    pub dt_last_last: f64,
    /// Ambient temperature, K.
    pub t_external: f64,
}

impl Default for StepContext {
    fn default() -> Self {
        Self::steady(300.0)
    }
}

impl StepContext {
    pub fn steady(t_external: f64) -> Self {
        Self {
            time_dependent: false,
            scheme: TimeScheme::Bdf1,
            bdf2_lower_order: true,
            time: 0.0,
            dt: f64::INFINITY,
            dt_last: f64::INFINITY,
            dt_last_last: f64::INFINITY,
            t_external,
        }
    }

    #[inline]
    pub fn bdf2_active(&self) -> bool {
        self.time_dependent && self.scheme == TimeScheme::Bdf2 && !self.bdf2_lower_order
    }

    /// `r = dt_last / (dt_last + dt)`
    #[inline]
    pub fn bdf2_ratio(&self) -> f64 {
        self.dt_last / (self.dt_last + self.dt)
    }

    /// Coefficients `(c0, c1, c2, denom)` of the time derivative
    /// `(c0 u + c1 u_n + c2 u_{n-1}) / denom`.
    pub fn derivative_coefficients(&self) -> (f64, f64, f64, f64) {
        if self.bdf2_active() {
            let r = self.bdf2_ratio();
            (
                (2.0 - r) / (1.0 - r),
                -1.0 / (r * (1.0 - r)),
                (1.0 - r) / r,
                self.dt_last + self.dt,
            )
        } else {
            (1.0, -1.0, 0.0, self.dt)
        }
    }

    /// Time derivative of a scalar history.
    pub fn derivative(&self, u: f64, u_n: f64, u_n1: f64) -> f64 {
        let (c0, c1, c2, denom) = self.derivative_coefficients();
        (c0 * u + c1 * u_n + c2 * u_n1) / denom
    }
}

/// Absolute tolerances on the per-equation residual norms.
#[derive(Debug, Clone, Copy, PartialEq, Deserialize)]
#[serde(default)]
pub struct ResidualTolerances {
    /// C
    pub poisson: f64,
    /// A
    pub continuity: f64,
    /// W
    pub heat: f64,
    /// W
    pub energy: f64,
    /// Electrode equation, normalized by the MNA scaling.
    pub electrode: f64,
}

impl Default for ResidualTolerances {
    fn default() -> Self {
        Self {
            poisson: 1e-26,
            continuity: 5e-15,
            heat: 1e-11,
            energy: 1e-11,
            electrode: 1e-9,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn bdf2_coefficients_are_consistent() {
        let step = StepContext {
            time_dependent: true,
            scheme: TimeScheme::Bdf2,
            bdf2_lower_order: false,
            dt: 1.0,
            dt_last: 1.0,
            ..StepContext::default()
        };
        // constant history has zero derivative
        assert!(step.derivative(2.0, 2.0, 2.0).abs() < 1e-14);
        // linear history u = t has unit slope
        assert!((step.derivative(2.0, 1.0, 0.0) - 1.0).abs() < 1e-14);
        // equal steps reduce to (3u - 4u_n + u_{n-1}) / 2dt
        let (c0, c1, c2, d) = step.derivative_coefficients();
        assert!((c0 / d * 2.0 - 3.0).abs() < 1e-14);
        assert!((c1 / d * 2.0 + 4.0).abs() < 1e-14);
        assert!((c2 / d * 2.0 - 1.0).abs() < 1e-14);
    }

    #[test]
    fn lower_order_flag_demotes_to_backward_euler() {
        let step = StepContext {
            time_dependent: true,
            scheme: TimeScheme::Bdf2,
            bdf2_lower_order: true,
            dt: 0.5,
            dt_last: 1.0,
            ..StepContext::default()
        };
        assert!((step.derivative(2.0, 1.0, 123.0) - 2.0).abs() < 1e-14);
    }
}

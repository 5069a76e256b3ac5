//! Step-size and order policy of the transient driver.

use serde::Deserialize;
use tracing::{debug, info};

use super::lte::LteTolerances;
use super::{StepContext, TimeScheme};
use crate::error::SimError;

#[derive(Debug, Clone, Copy, PartialEq, Deserialize)]
#[serde(default)]
pub struct TransientSettings {
    pub t_start: f64,
    pub t_stop: f64,
    /// Initial step, s.
    pub dt: f64,
    pub dt_min: f64,
    pub dt_max: f64,
    pub scheme: TimeScheme,
    /// Drive the step from the truncation error estimate.
    pub auto_step: bool,
    /// Start each step from the extrapolated history.
    pub predict: bool,
    pub lte: LteTolerances,
    /// Bounds on the step change factor.
    pub shrink: f64,
    pub growth: f64,
}

impl Default for TransientSettings {
    fn default() -> Self {
        Self {
            t_start: 0.0,
            t_stop: 1e-9,
            dt: 1e-12,
            dt_min: 1e-18,
            dt_max: f64::INFINITY,
            scheme: TimeScheme::Bdf2,
            auto_step: true,
            predict: true,
            lte: LteTolerances::default(),
            shrink: 0.2,
            growth: 2.0,
        }
    }
}

/// Time, step history and counters of a transient run.
#[derive(Debug, Clone)]
pub struct TransientController {
    pub settings: TransientSettings,
    pub time: f64,
    /// Proposed size of the next step.
    pub dt: f64,
    pub dt_last: f64,
    pub dt_last_last: f64,
    pub accepted: usize,
    pub rejected: usize,
}

impl TransientController {
    pub fn new(settings: TransientSettings) -> Self {
        Self {
            time: settings.t_start,
            dt: settings.dt.min(settings.dt_max),
            dt_last: f64::INFINITY,
            dt_last_last: f64::INFINITY,
            accepted: 0,
            rejected: 0,
            settings,
        }
    }

    pub fn finished(&self) -> bool {
        let span = (self.settings.t_stop - self.settings.t_start).abs();
        self.time >= self.settings.t_stop - 1e-12 * span
    }

    /// Step context for the next attempt, landing exactly on `t_stop`.
    /// Second order is requested only once an accepted step exists;
    /// the caller still demotes it when the positivity guard fails.
    pub fn begin_step(&self, t_external: f64) -> StepContext {
        let dt = self.dt.min(self.settings.t_stop - self.time);
        StepContext {
            time_dependent: true,
            scheme: self.settings.scheme,
            bdf2_lower_order: self.settings.scheme != TimeScheme::Bdf2 || self.accepted == 0,
            time: self.time + dt,
            dt,
            dt_last: self.dt_last,
            dt_last_last: self.dt_last_last,
            t_external,
        }
    }

    /// Order of the step's integration formula.
    pub fn order(step: &StepContext) -> u32 {
        if step.bdf2_active() { 2 } else { 1 }
    }

    /// `0.9 r^(-1/(p+1))` bounded by the shrink and growth limits.
    pub fn step_factor(&self, r: f64, order: u32) -> f64 {
        let f = 0.9 * r.powf(-1.0 / f64::from(order + 1));
        if f.is_nan() {
            return self.settings.shrink;
        }
        f.clamp(self.settings.shrink, self.settings.growth)
    }

    /// Commit an accepted step. `r` is the truncation error ratio when it
    /// was evaluated.
    pub fn accept(&mut self, step: &StepContext, r: Option<f64>) {
        self.dt_last_last = self.dt_last;
        self.dt_last = step.dt;
        self.time = step.time;
        self.accepted += 1;
        let mut next = self.dt.max(step.dt);
        if let (true, Some(r)) = (self.settings.auto_step, r) {
            next = step.dt * self.step_factor(r, Self::order(step));
        }
        self.dt = next.min(self.settings.dt_max);
        info!(
            step = self.accepted,
            time = self.time,
            dt = step.dt,
            lte = r,
            next_dt = self.dt,
            order = Self::order(step),
            "time step accepted"
        );
    }

    /// The truncation error ratio exceeded one.
    pub fn reject_lte(&mut self, step: &StepContext, r: f64) -> Result<(), SimError> {
        self.rejected += 1;
        let f = self.step_factor(r, Self::order(step)).min(0.9);
        info!(time = self.time, dt = step.dt, lte = r, "time step rejected on truncation error");
        self.shrink_to(step.dt * f)
    }

    /// Newton failed; retry with half the step.
    pub fn diverged(&mut self, step: &StepContext) -> Result<(), SimError> {
        self.rejected += 1;
        info!(time = self.time, dt = step.dt, "time step diverged, halving");
        self.shrink_to(0.5 * step.dt)
    }

    fn shrink_to(&mut self, dt: f64) -> Result<(), SimError> {
        if dt < self.settings.dt_min {
            return Err(SimError::TimeStepTooSmall {
                dt,
                dt_min: self.settings.dt_min,
                time: self.time,
            });
        }
        debug!(dt, "next attempt");
        self.dt = dt;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;

    fn controller() -> TransientController {
        TransientController::new(TransientSettings {
            t_stop: 1.0,
            dt: 0.1,
            dt_min: 0.01,
            ..Default::default()
        })
    }

    #[test]
    fn first_step_is_backward_euler() {
        let mut c = controller();
        let step = c.begin_step(300.0);
        assert!(!step.bdf2_active());
        c.accept(&step, None);
        let step = c.begin_step(300.0);
        assert!(step.bdf2_active());
        assert_eq!(step.dt_last, 0.1);
        assert_eq!(TransientController::order(&step), 2);
    }

    #[test]
    fn step_change_is_bounded() {
        let c = controller();
        assert_eq!(c.step_factor(0.0, 1), 2.0);
        assert_eq!(c.step_factor(1e6, 1), 0.2);
        assert_relative_eq!(c.step_factor(0.5, 1), 0.9 * 2f64.sqrt(), max_relative = 1e-12);
    }

    #[test]
    fn repeated_divergence_runs_into_the_minimum_step() {
        let mut c = controller();
        let mut failures = 0;
        loop {
            let step = c.begin_step(300.0);
            match c.diverged(&step) {
                Ok(()) => failures += 1,
                Err(SimError::TimeStepTooSmall { dt, dt_min, .. }) => {
                    assert!(dt < dt_min);
                    break;
                }
                Err(e) => panic!("unexpected {e}"),
            }
        }
        // 0.1 -> 0.05 -> 0.025 -> 0.0125 -> stop
        assert_eq!(failures, 3);
    }

    #[test]
    fn final_step_lands_on_the_stop_time() {
        let mut c = controller();
        c.time = 0.95;
        let step = c.begin_step(300.0);
        assert_relative_eq!(step.dt, 0.05, epsilon = 1e-15);
        c.accept(&step, Some(0.1));
        assert!(c.finished());
    }
}

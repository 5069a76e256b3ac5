//! Steady, DC sweep and transient drivers on top of [`DeviceSolver`].

use std::time::Instant;

use serde::Deserialize;
use tracing::{debug, info, info_span, warn};

use super::DeviceSolver;
use crate::assembly::ParVector;
use crate::error::{Result, SimError};
use crate::numerics::newton::NewtonReport;
use crate::numerics::timing::{finalize_and_log, reset_timing};
use crate::numerics::transient::{TransientController, TransientSettings};
use crate::numerics::StepContext;

/// Ramp of one electrode's applied voltage or current.
#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(default)]
pub struct SweepSettings {
    pub electrode: String,
    pub start: f64,
    pub stop: f64,
    pub step: f64,
    /// Smallest increment the divergence recovery may fall back to.
    pub min_step: f64,
}

impl Default for SweepSettings {
    fn default() -> Self {
        Self {
            electrode: "anode".into(),
            start: 0.0,
            stop: 1.0,
            step: 0.1,
            min_step: 1e-4,
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct ElectrodeSample {
    pub label: String,
    pub potential: f64,
    pub current: f64,
}

/// Terminal state after a converged solve.
#[derive(Debug, Clone, PartialEq)]
pub struct OperatingPoint {
    pub time: f64,
    /// Swept source value, or the time in transient runs.
    pub applied: f64,
    pub electrodes: Vec<ElectrodeSample>,
}

impl OperatingPoint {
    pub fn electrode(&self, label: &str) -> Option<&ElectrodeSample> {
        self.electrodes.iter().find(|e| e.label == label)
    }
}

impl DeviceSolver {
    pub fn operating_point(&self, applied: f64) -> OperatingPoint {
        OperatingPoint {
            time: self.step.time,
            applied,
            electrodes: self
                .bcs
                .iter()
                .filter_map(|bc| {
                    let c = bc.circuit()?;
                    Some(ElectrodeSample {
                        label: bc.label().to_string(),
                        potential: c.potential(),
                        current: c.current(),
                    })
                })
                .collect(),
        }
    }

    /// Collective. Steady state at the present sources. On failure the
    /// last accepted state is restored before the error surfaces.
    pub fn solve_steady(&mut self) -> Result<NewtonReport> {
        let _span = info_span!("steady").entered();
        let started = Instant::now();
        reset_timing();
        self.step = StepContext::steady(self.step.t_external);
        self.pre_solve_process(true);
        let report = match self.newton() {
            Ok(report) => report,
            Err(e) => {
                warn!(error = %e, "steady solve failed");
                self.diverged_recovery();
                return Err(e.into());
            }
        };
        self.post_solve_process();
        info!(iterations = report.iterations, norms = %report.norms, "steady state converged");
        finalize_and_log(started.elapsed());
        Ok(report)
    }

    /// Collective. Ramp `sweep.electrode` from `start` to `stop`. A diverged
    /// point is retried from the last converged one with half the
    /// increment; the increment grows back after every success.
    pub fn dc_sweep(&mut self, sweep: &SweepSettings) -> Result<Vec<OperatingPoint>> {
        let _span = info_span!("dc_sweep", electrode = %sweep.electrode).entered();
        let started = Instant::now();
        reset_timing();
        if sweep.step == 0.0 || !sweep.step.is_finite() {
            return Err(SimError::InvalidDevice(format!("sweep step must be finite and non-zero, got {}", sweep.step)));
        }
        let full = sweep.step.abs() * (sweep.stop - sweep.start).signum();
        let span = (sweep.stop - sweep.start).abs();
        let done = |v: f64| (v - sweep.start).abs() >= span - 1e-9 * span.max(1.0);

        self.step = StepContext::steady(self.step.t_external);
        let mut points = Vec::new();
        let mut value = sweep.start;
        let mut inc = full;
        let mut first = true;
        loop {
            let target = if first {
                sweep.start
            } else if (value + inc - sweep.start).abs() > span {
                sweep.stop
            } else {
                value + inc
            };
            self.set_applied(&sweep.electrode, target)?;
            self.pre_solve_process(false);
            match self.newton() {
                Ok(report) => {
                    self.post_solve_process();
                    value = target;
                    first = false;
                    let point = self.operating_point(value);
                    info!(
                        applied = value,
                        iterations = report.iterations,
                        current = point.electrode(&sweep.electrode).map(|e| e.current),
                        "sweep point converged"
                    );
                    points.push(point);
                    if done(value) {
                        break;
                    }
                    inc = (inc * 1.5).clamp(-full.abs(), full.abs());
                }
                Err(e) => {
                    warn!(applied = target, error = %e, "sweep point diverged");
                    self.diverged_recovery();
                    if first {
                        return Err(e.into());
                    }
                    inc *= 0.5;
                    if inc.abs() < sweep.min_step {
                        return Err(e.into());
                    }
                    debug!(increment = inc, "retrying with a smaller increment");
                }
            }
        }
        finalize_and_log(started.elapsed());
        Ok(points)
    }

    /// Collective. Integrate from the present state. `on_step` sees the
    /// solver after every accepted step.
    pub fn solve_transient(
        &mut self,
        settings: TransientSettings,
        mut on_step: impl FnMut(&DeviceSolver),
    ) -> Result<TransientController> {
        let _span = info_span!("transient").entered();
        let started = Instant::now();
        reset_timing();
        let t_external = self.step.t_external;
        let mut ctl = TransientController::new(settings);
        self.step = StepContext {
            time: ctl.time,
            ..StepContext::steady(t_external)
        };
        self.pre_solve_process(true);
        self.history.clear();
        self.history.push(&self.x);

        while !ctl.finished() {
            let mut step = ctl.begin_step(t_external);
            if !step.bdf2_lower_order && !self.bdf2_positive_defined(&step) {
                debug!(time = step.time, "second order inadmissible, using BDF1");
                step.bdf2_lower_order = true;
            }
            self.step = step;
            self.pre_solve_process(false);
            if settings.predict {
                self.predict();
            }

            match self.newton() {
                Ok(report) => {
                    let r = if settings.auto_step { self.lte_norm(&settings.lte) } else { None };
                    if let Some(r) = r.filter(|r| *r > 1.0) {
                        self.abandon_step(&ctl);
                        ctl.reject_lte(&step, r)?;
                        continue;
                    }
                    for region in &mut self.regions {
                        region.advance_time_level();
                    }
                    self.post_solve_process();
                    self.history.push(&self.x);
                    debug!(iterations = report.iterations, "transient step converged");
                    ctl.accept(&step, r);
                    on_step(self);
                }
                Err(e) => {
                    warn!(time = step.time, dt = step.dt, error = %e, "transient step diverged");
                    self.abandon_step(&ctl);
                    ctl.diverged(&step)?;
                }
            }
        }
        info!(accepted = ctl.accepted, rejected = ctl.rejected, time = ctl.time, "transient finished");
        finalize_and_log(started.elapsed());
        Ok(ctl)
    }

    /// Back out of an unaccepted step: the iterate and circuits return to
    /// the last accepted state and the step clock to the accepted time.
    fn abandon_step(&mut self, ctl: &TransientController) {
        self.diverged_recovery();
        self.step.time = ctl.time;
    }

    /// Linear extrapolation of the accepted history as the initial guess,
    /// floored against the last accepted solution.
    fn predict(&mut self) {
        let (Some(x_n), Some(x_n1)) = (self.history.level(0), self.history.level(1)) else {
            return;
        };
        if !self.step.dt_last.is_finite() {
            return;
        }
        let ratio = self.step.dt / self.step.dt_last;
        let mut xp = x_n.clone();
        xp.axpy(ratio, &ParVector::difference(x_n, x_n1));
        self.projection_positive_density_check(&mut xp, x_n);
        self.x = xp;
    }
}

//! Wall-clock accounting of the Newton kernels, compiled in with the
//! `timing` feature. Without it every recorder just runs its closure.

use std::time::Duration;

#[cfg(feature = "timing")]
use std::cell::RefCell;

#[derive(Debug, Default, Clone)]
pub struct TimingStats {
    pub residual_times: Vec<Duration>,
    pub jacobian_times: Vec<Duration>,
    pub linear_solve_times: Vec<Duration>,
    pub total_time: Duration,
}

impl TimingStats {
    pub fn new() -> Self {
        Self::default()
    }

    fn total(times: &[Duration]) -> Duration {
        times.iter().sum()
    }

    fn mean_ms(times: &[Duration]) -> f64 {
        if times.is_empty() {
            0.0
        } else {
            Self::total(times).as_secs_f64() * 1000.0 / times.len() as f64
        }
    }

    /// Time not spent in any recorded kernel.
    pub fn overhead(&self) -> Duration {
        let accounted =
            Self::total(&self.residual_times) + Self::total(&self.jacobian_times) + Self::total(&self.linear_solve_times);
        self.total_time.saturating_sub(accounted)
    }

    pub fn log_summary(&self) {
        if self.jacobian_times.is_empty() && self.residual_times.is_empty() {
            return;
        }
        tracing::info!(
            total_s = self.total_time.as_secs_f64(),
            residuals = self.residual_times.len(),
            residual_avg_ms = Self::mean_ms(&self.residual_times),
            jacobians = self.jacobian_times.len(),
            jacobian_avg_ms = Self::mean_ms(&self.jacobian_times),
            linear_solves = self.linear_solve_times.len(),
            linear_avg_ms = Self::mean_ms(&self.linear_solve_times),
            overhead_ms = self.overhead().as_secs_f64() * 1000.0,
            "solver timing"
        );
    }
}

#[cfg(feature = "timing")]
thread_local! {
    static TIMING_STATS: RefCell<TimingStats> = RefCell::new(TimingStats::new());
}

#[cfg(feature = "timing")]
fn record<F, R>(f: F, slot: fn(&mut TimingStats) -> &mut Vec<Duration>) -> R
where
    F: FnOnce() -> R,
{
    let start = std::time::Instant::now();
    let result = f();
    let elapsed = start.elapsed();
    TIMING_STATS.with(|stats| slot(&mut stats.borrow_mut()).push(elapsed));
    result
}

#[cfg(feature = "timing")]
pub fn reset_timing() {
    TIMING_STATS.with(|stats| {
        *stats.borrow_mut() = TimingStats::new();
    });
}

#[cfg(not(feature = "timing"))]
pub fn reset_timing() {}

#[cfg(feature = "timing")]
pub fn record_residual<F, R>(f: F) -> R
where
    F: FnOnce() -> R,
{
    record(f, |s| &mut s.residual_times)
}

#[cfg(not(feature = "timing"))]
pub fn record_residual<F, R>(f: F) -> R
where
    F: FnOnce() -> R,
{
    f()
}

#[cfg(feature = "timing")]
pub fn record_jacobian<F, R>(f: F) -> R
where
    F: FnOnce() -> R,
{
    record(f, |s| &mut s.jacobian_times)
}

#[cfg(not(feature = "timing"))]
pub fn record_jacobian<F, R>(f: F) -> R
where
    F: FnOnce() -> R,
{
    f()
}

#[cfg(feature = "timing")]
pub fn record_linear_solve<F, R>(f: F) -> R
where
    F: FnOnce() -> R,
{
    record(f, |s| &mut s.linear_solve_times)
}

#[cfg(not(feature = "timing"))]
pub fn record_linear_solve<F, R>(f: F) -> R
where
    F: FnOnce() -> R,
{
    f()
}

#[cfg(feature = "timing")]
pub fn finalize_timing(total_time: Duration) -> TimingStats {
    TIMING_STATS.with(|stats| {
        let mut s = stats.borrow_mut();
        s.total_time = total_time;
        s.clone()
    })
}

#[cfg(not(feature = "timing"))]
pub fn finalize_timing(total_time: Duration) -> TimingStats {
    TimingStats {
        total_time,
        ..TimingStats::new()
    }
}

pub fn finalize_and_log(total_time: Duration) {
    finalize_timing(total_time).log_summary();
}

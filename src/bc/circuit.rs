//! Lumped external circuits attached to electrodes, in modified nodal
//! analysis form. Every method takes the current step `dt`; steady solves
//! pass `f64::INFINITY`, which drops the reactive terms.

use std::fmt;

use serde::Deserialize;

pub trait ExternalCircuit: fmt::Debug + Send + Sync {
    /// Electrode potential, V.
    fn potential(&self) -> f64;
    fn set_potential(&mut self, v: f64);

    /// Current flowing from the electrode into the device, A.
    fn current(&self) -> f64;
    fn set_current(&mut self, i: f64);

    /// Factor applied to the device current in the electrode row.
    fn mna_scaling(&self, dt: f64) -> f64;
    /// The circuit's own residual at the stored potential.
    fn mna_function(&self, dt: f64) -> f64;
    /// Derivative of [`ExternalCircuit::mna_function`] by the potential.
    fn mna_jacobian(&self, dt: f64) -> f64;
    /// Row scale for the electrode equation.
    fn electrode_scaling(&self, dt: f64) -> f64;
    /// Series resistance used when the electrode is tied to a hub.
    fn inter_connect_resistance(&self) -> f64;

    /// Applied voltage or current of the source.
    fn applied(&self) -> f64;
    fn set_applied(&mut self, value: f64);

    /// Commit the converged potential and current as the previous level.
    fn update(&mut self, dt: f64);

    /// Drop an unconverged potential and current and return to the
    /// previous level.
    fn restore(&mut self);
}

/// Voltage source behind a series resistor and inductor, with a shunt
/// capacitor at the electrode.
#[derive(Debug, Clone, PartialEq)]
pub struct VoltageSource {
    pub vapp: f64,
    /// Ohm
    pub r: f64,
    /// F
    pub c: f64,
    /// H
    pub l: f64,
    potential: f64,
    current: f64,
    potential_last: f64,
    current_last: f64,
    inductor_current_last: f64,
}

impl VoltageSource {
    pub fn new(vapp: f64, r: f64, c: f64, l: f64) -> Self {
        Self {
            vapp,
            r,
            c,
            l,
            potential: vapp,
            current: 0.0,
            potential_last: vapp,
            current_last: 0.0,
            inductor_current_last: 0.0,
        }
    }

    pub fn ideal(vapp: f64) -> Self {
        Self::new(vapp, 0.0, 0.0, 0.0)
    }

    fn series_impedance(&self, dt: f64) -> f64 {
        self.r + self.l / dt
    }
}

impl ExternalCircuit for VoltageSource {
    fn potential(&self) -> f64 {
        self.potential
    }

    fn set_potential(&mut self, v: f64) {
        self.potential = v;
    }

    fn current(&self) -> f64 {
        self.current
    }

    fn set_current(&mut self, i: f64) {
        self.current = i;
    }

    fn mna_scaling(&self, dt: f64) -> f64 {
        self.series_impedance(dt)
    }

    fn mna_function(&self, dt: f64) -> f64 {
        let z = self.series_impedance(dt);
        z * self.c / dt * (self.potential - self.potential_last) + self.potential
            - self.vapp
            - self.l / dt * self.inductor_current_last
    }

    fn mna_jacobian(&self, dt: f64) -> f64 {
        self.series_impedance(dt) * self.c / dt + 1.0
    }

    fn electrode_scaling(&self, dt: f64) -> f64 {
        1.0 / self.mna_jacobian(dt)
    }

    fn inter_connect_resistance(&self) -> f64 {
        self.r
    }

    fn applied(&self) -> f64 {
        self.vapp
    }

    fn set_applied(&mut self, value: f64) {
        self.vapp = value;
    }

    fn update(&mut self, dt: f64) {
        let shunt = if self.c == 0.0 {
            0.0
        } else {
            self.c * (self.potential - self.potential_last) / dt
        };
        self.inductor_current_last = self.current + shunt;
        self.potential_last = self.potential;
        self.current_last = self.current;
    }

    fn restore(&mut self) {
        self.potential = self.potential_last;
        self.current = self.current_last;
    }
}

/// Current source with a shunt capacitor.
#[derive(Debug, Clone, PartialEq)]
pub struct CurrentSource {
    pub iapp: f64,
    pub c: f64,
    potential: f64,
    current: f64,
    potential_last: f64,
    current_last: f64,
}

impl CurrentSource {
    pub fn new(iapp: f64, c: f64) -> Self {
        Self {
            iapp,
            c,
            potential: 0.0,
            current: 0.0,
            potential_last: 0.0,
            current_last: 0.0,
        }
    }
}

impl ExternalCircuit for CurrentSource {
    fn potential(&self) -> f64 {
        self.potential
    }

    fn set_potential(&mut self, v: f64) {
        self.potential = v;
    }

    fn current(&self) -> f64 {
        self.current
    }

    fn set_current(&mut self, i: f64) {
        self.current = i;
    }

    fn mna_scaling(&self, _dt: f64) -> f64 {
        1.0
    }

    fn mna_function(&self, dt: f64) -> f64 {
        self.c / dt * (self.potential - self.potential_last) - self.iapp
    }

    fn mna_jacobian(&self, dt: f64) -> f64 {
        self.c / dt
    }

    fn electrode_scaling(&self, _dt: f64) -> f64 {
        1.0
    }

    fn inter_connect_resistance(&self) -> f64 {
        0.0
    }

    fn applied(&self) -> f64 {
        self.iapp
    }

    fn set_applied(&mut self, value: f64) {
        self.iapp = value;
    }

    fn update(&mut self, _dt: f64) {
        self.potential_last = self.potential;
        self.current_last = self.current;
    }

    fn restore(&mut self) {
        self.potential = self.potential_last;
        self.current = self.current_last;
    }
}

/// Circuit description as read from configuration.
#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(tag = "type", rename_all = "lowercase")]
pub enum CircuitSpec {
    Voltage {
        #[serde(default)]
        value: f64,
        #[serde(default)]
        r: f64,
        #[serde(default)]
        c: f64,
        #[serde(default)]
        l: f64,
    },
    Current {
        #[serde(default)]
        value: f64,
        #[serde(default)]
        c: f64,
    },
}

impl Default for CircuitSpec {
    fn default() -> Self {
        CircuitSpec::Voltage {
            value: 0.0,
            r: 0.0,
            c: 0.0,
            l: 0.0,
        }
    }
}

impl CircuitSpec {
    pub fn build(&self) -> Box<dyn ExternalCircuit> {
        match *self {
            CircuitSpec::Voltage { value, r, c, l } => Box::new(VoltageSource::new(value, r, c, l)),
            CircuitSpec::Current { value, c } => Box::new(CurrentSource::new(value, c)),
        }
    }
}

//! Built-in material parameters. Every accessor is a pure function of the
//! local state handed in.

use num_dual::DualNum;

use super::{EPS0, KB_OVER_Q, RegionKind};
use crate::error::SimError;

#[derive(Debug, Clone, PartialEq)]
pub struct SemiconductorMaterial {
    /// Relative permittivity.
    pub permittivity: f64,
    /// Intrinsic density at 300 K, cm^-3.
    pub ni_300: f64,
    /// Band gap, eV.
    pub band_gap: f64,
    /// Electron affinity, V.
    pub affinity: f64,
    /// Mobilities, cm^2/(V s).
    pub mu_n: f64,
    pub mu_p: f64,
    /// SRH lifetimes, s.
    pub tau_n: f64,
    pub tau_p: f64,
    /// Energy relaxation times, s.
    pub tau_wn: f64,
    pub tau_wp: f64,
    /// Thermal conductivity, W/(cm K).
    pub kappa: f64,
    /// Volumetric heat capacity, J/(cm^3 K).
    pub heat_capacity: f64,
}

impl SemiconductorMaterial {
    pub fn silicon() -> Self {
        Self {
            permittivity: 11.7,
            ni_300: 1.0e10,
            band_gap: 1.12,
            affinity: 4.05,
            mu_n: 1400.0,
            mu_p: 450.0,
            tau_n: 1.0e-7,
            tau_p: 1.0e-7,
            tau_wn: 0.3e-12,
            tau_wp: 0.25e-12,
            kappa: 1.48,
            heat_capacity: 1.63,
        }
    }

    pub fn eps(&self) -> f64 {
        self.permittivity * EPS0
    }

    pub fn ni<T: DualNum<f64>>(&self, t: T) -> T {
        let ratio = t.clone() / 300.0;
        let boltzmann = ((t.recip() - 1.0 / 300.0) * (-0.5 * self.band_gap / KB_OVER_Q)).exp();
        ratio.powf(1.5) * boltzmann * self.ni_300
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct InsulatorMaterial {
    pub permittivity: f64,
    pub affinity: f64,
    pub kappa: f64,
    pub heat_capacity: f64,
}

impl InsulatorMaterial {
    pub fn oxide() -> Self {
        Self {
            permittivity: 3.9,
            affinity: 0.9,
            kappa: 0.014,
            heat_capacity: 1.67,
        }
    }

    pub fn eps(&self) -> f64 {
        self.permittivity * EPS0
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct ConductorMaterial {
    /// Conductivity at 300 K, S/cm.
    pub conductivity: f64,
    /// Linear resistivity temperature coefficient, 1/K.
    pub temp_coefficient: f64,
    /// Work function, V.
    pub affinity: f64,
    pub kappa: f64,
    pub heat_capacity: f64,
}

impl ConductorMaterial {
    pub fn aluminium() -> Self {
        Self {
            conductivity: 3.77e5,
            temp_coefficient: 3.9e-3,
            affinity: 4.10,
            kappa: 2.37,
            heat_capacity: 2.42,
        }
    }

    pub fn copper() -> Self {
        Self {
            conductivity: 5.96e5,
            temp_coefficient: 3.9e-3,
            affinity: 4.65,
            kappa: 4.01,
            heat_capacity: 3.45,
        }
    }

    /// Ideal contact metal for electrode regions.
    pub fn ideal() -> Self {
        Self {
            conductivity: 1.0e8,
            temp_coefficient: 0.0,
            affinity: 4.05,
            kappa: 4.0,
            heat_capacity: 3.0,
        }
    }

    pub fn affinity(&self, _t: f64) -> f64 {
        self.affinity
    }

    pub fn sigma<T: DualNum<f64>>(&self, t: T) -> T {
        let r = (t - 300.0) * self.temp_coefficient + 1.0;
        r.recip() * self.conductivity
    }

    /// Conduction current density along the field, A/cm^2.
    pub fn current_density<T: DualNum<f64>>(&self, e: T, t: T) -> T {
        e * self.sigma(t)
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum Material {
    Semiconductor(SemiconductorMaterial),
    Insulator(InsulatorMaterial),
    Conductor(ConductorMaterial),
    Vacuum,
}

impl Material {
    pub fn lookup(name: &str) -> Result<Self, SimError> {
        match name.to_ascii_lowercase().as_str() {
            "si" | "silicon" => Ok(Material::Semiconductor(SemiconductorMaterial::silicon())),
            "sio2" | "oxide" => Ok(Material::Insulator(InsulatorMaterial::oxide())),
            "al" | "aluminium" | "aluminum" => Ok(Material::Conductor(ConductorMaterial::aluminium())),
            "cu" | "copper" => Ok(Material::Conductor(ConductorMaterial::copper())),
            "elec" | "ideal" => Ok(Material::Conductor(ConductorMaterial::ideal())),
            "vacuum" | "air" => Ok(Material::Vacuum),
            _ => Err(SimError::UnknownMaterial(name.to_string())),
        }
    }

    /// Whether a region of `kind` can be made of this material.
    pub fn fits(&self, kind: RegionKind) -> bool {
        matches!(
            (self, kind),
            (Material::Semiconductor(_), RegionKind::Semiconductor)
                | (Material::Insulator(_), RegionKind::Insulator)
                | (Material::Conductor(_), RegionKind::Metal | RegionKind::Electrode)
                | (Material::Vacuum, RegionKind::Vacuum)
        )
    }
}

pub mod material;
pub mod node_data;

use serde::Deserialize;

pub use material::{ConductorMaterial, InsulatorMaterial, Material, SemiconductorMaterial};
pub use node_data::NodeData;

/// Elementary charge, C.
pub const Q: f64 = 1.602_176_634e-19;
/// Boltzmann constant, J/K.
pub const KB: f64 = 1.380_649e-23;
/// Vacuum permittivity, F/cm.
pub const EPS0: f64 = 8.854_187_812_8e-14;
/// Thermal voltage per kelvin, V/K.
pub const KB_OVER_Q: f64 = KB / Q;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RegionKind {
    Semiconductor,
    Insulator,
    Metal,
    Electrode,
    Vacuum,
}

impl RegionKind {
    /// Order in which coincident region nodes are listed at a boundary node.
    pub fn priority(self) -> u8 {
        match self {
            RegionKind::Semiconductor => 0,
            RegionKind::Insulator => 1,
            RegionKind::Metal | RegionKind::Electrode => 2,
            RegionKind::Vacuum => 3,
        }
    }

    pub fn is_conductor(self) -> bool {
        matches!(self, RegionKind::Metal | RegionKind::Electrode)
    }
}

/// Which optional equations are solved.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Deserialize)]
#[serde(default)]
pub struct AdvancedModel {
    /// Lattice temperature.
    pub enable_tl: bool,
    /// Electron energy balance.
    pub enable_tn: bool,
    /// Hole energy balance.
    pub enable_tp: bool,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum SolutionVariable {
    Potential,
    Electron,
    Hole,
    Temperature,
    /// Stored as the product `n * Tn`.
    ElectronTemperature,
    /// Stored as the product `p * Tp`.
    HoleTemperature,
}

impl SolutionVariable {
    pub const ALL: [SolutionVariable; 6] = [
        SolutionVariable::Potential,
        SolutionVariable::Electron,
        SolutionVariable::Hole,
        SolutionVariable::Temperature,
        SolutionVariable::ElectronTemperature,
        SolutionVariable::HoleTemperature,
    ];

    #[inline]
    fn slot(self) -> usize {
        self as usize
    }
}

/// Per-node offset of each solved variable within a region.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct VariableLayout {
    offsets: [Option<usize>; 6],
    n_vars: usize,
}

impl VariableLayout {
    fn from_vars(vars: &[SolutionVariable]) -> Self {
        let mut offsets = [None; 6];
        for (k, v) in vars.iter().enumerate() {
            offsets[v.slot()] = Some(k);
        }
        Self {
            offsets,
            n_vars: vars.len(),
        }
    }

    pub fn semiconductor(model: &AdvancedModel) -> Self {
        let mut vars = vec![
            SolutionVariable::Potential,
            SolutionVariable::Electron,
            SolutionVariable::Hole,
        ];
        if model.enable_tl {
            vars.push(SolutionVariable::Temperature);
        }
        if model.enable_tn {
            vars.push(SolutionVariable::ElectronTemperature);
        }
        if model.enable_tp {
            vars.push(SolutionVariable::HoleTemperature);
        }
        Self::from_vars(&vars)
    }

    /// Potential plus lattice temperature when enabled: insulators,
    /// metals and electrodes.
    pub fn lattice(model: &AdvancedModel) -> Self {
        if model.enable_tl {
            Self::from_vars(&[SolutionVariable::Potential, SolutionVariable::Temperature])
        } else {
            Self::from_vars(&[SolutionVariable::Potential])
        }
    }

    pub fn empty() -> Self {
        Self::from_vars(&[])
    }

    #[inline]
    pub fn n_vars(&self) -> usize {
        self.n_vars
    }

    #[inline]
    pub fn offset(&self, var: SolutionVariable) -> Option<usize> {
        self.offsets[var.slot()]
    }

    #[inline]
    pub fn has(&self, var: SolutionVariable) -> bool {
        self.offset(var).is_some()
    }

    /// Variables in storage order.
    pub fn variables(&self) -> impl Iterator<Item = SolutionVariable> + '_ {
        let mut vars: Vec<(usize, SolutionVariable)> = SolutionVariable::ALL
            .iter()
            .filter_map(|&v| self.offset(v).map(|k| (k, v)))
            .collect();
        vars.sort_by_key(|&(k, _)| k);
        vars.into_iter().map(|(_, v)| v)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn semiconductor_layout_follows_enable_flags() {
        let model = AdvancedModel {
            enable_tl: true,
            enable_tn: false,
            enable_tp: true,
        };
        let l = VariableLayout::semiconductor(&model);
        assert_eq!(l.n_vars(), 5);
        assert_eq!(l.offset(SolutionVariable::Temperature), Some(3));
        assert_eq!(l.offset(SolutionVariable::ElectronTemperature), None);
        assert_eq!(l.offset(SolutionVariable::HoleTemperature), Some(4));
        let order: Vec<_> = l.variables().collect();
        assert_eq!(order[4], SolutionVariable::HoleTemperature);

        let ins = VariableLayout::lattice(&AdvancedModel::default());
        assert_eq!(ins.n_vars(), 1);
        assert!(!ins.has(SolutionVariable::Temperature));
    }
}

use super::{SolutionVariable, VariableLayout};

/// Persistent per-node state of one region: the values at the current
/// accepted time level, the previous level, and the local material data.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct NodeData {
    pub psi: f64,
    pub n: f64,
    pub p: f64,
    /// Lattice temperature, K.
    pub t: f64,
    /// Electron temperature, K.
    pub tn: f64,
    /// Hole temperature, K.
    pub tp: f64,

    pub psi_last: f64,
    pub n_last: f64,
    pub p_last: f64,
    pub t_last: f64,
    pub tn_last: f64,
    pub tp_last: f64,

    /// Permittivity, F/cm.
    pub eps: f64,
    /// Affinity or work function, V.
    pub affinity: f64,
    /// Nd - Na, cm^-3.
    pub net_doping: f64,
    /// Intrinsic density, cm^-3.
    pub ni: f64,
    /// Electric field magnitude along the local gradient, V/cm.
    pub e_field: f64,
}

impl NodeData {
    /// Value as stored in the solution vector.
    pub fn value(&self, var: SolutionVariable) -> f64 {
        match var {
            SolutionVariable::Potential => self.psi,
            SolutionVariable::Electron => self.n,
            SolutionVariable::Hole => self.p,
            SolutionVariable::Temperature => self.t,
            SolutionVariable::ElectronTemperature => self.n * self.tn,
            SolutionVariable::HoleTemperature => self.p * self.tp,
        }
    }

    /// Solution-vector value at the previous time level.
    pub fn last_value(&self, var: SolutionVariable) -> f64 {
        match var {
            SolutionVariable::Potential => self.psi_last,
            SolutionVariable::Electron => self.n_last,
            SolutionVariable::Hole => self.p_last,
            SolutionVariable::Temperature => self.t_last,
            SolutionVariable::ElectronTemperature => self.n_last * self.tn_last,
            SolutionVariable::HoleTemperature => self.p_last * self.tp_last,
        }
    }

    /// Current-level values laid out as the region's unknowns.
    pub fn values(&self, layout: &VariableLayout) -> Vec<f64> {
        layout.variables().map(|v| self.value(v)).collect()
    }

    pub fn last_values(&self, layout: &VariableLayout) -> Vec<f64> {
        layout.variables().map(|v| self.last_value(v)).collect()
    }

    /// Read one node's unknowns back. Energy products are divided by the
    /// density just read.
    pub fn load(&mut self, layout: &VariableLayout, u: &[f64]) {
        for (k, var) in layout.variables().enumerate() {
            match var {
                SolutionVariable::Potential => self.psi = u[k],
                SolutionVariable::Electron => self.n = u[k],
                SolutionVariable::Hole => self.p = u[k],
                SolutionVariable::Temperature => self.t = u[k],
                SolutionVariable::ElectronTemperature => {}
                SolutionVariable::HoleTemperature => {}
            }
        }
        if let Some(k) = layout.offset(SolutionVariable::ElectronTemperature) {
            self.tn = u[k] / self.n;
        }
        if let Some(k) = layout.offset(SolutionVariable::HoleTemperature) {
            self.tp = u[k] / self.p;
        }
    }

    /// Shift the current level into the last level.
    pub fn advance(&mut self) {
        self.psi_last = self.psi;
        self.n_last = self.n;
        self.p_last = self.p;
        self.t_last = self.t;
        self.tn_last = self.tn;
        self.tp_last = self.tp;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::physics::AdvancedModel;

    #[test]
    fn energy_products_round_trip() {
        let layout = VariableLayout::semiconductor(&AdvancedModel {
            enable_tl: true,
            enable_tn: true,
            enable_tp: true,
        });
        let data = NodeData {
            psi: 0.3,
            n: 1e17,
            p: 1e3,
            t: 310.0,
            tn: 500.0,
            tp: 320.0,
            ..Default::default()
        };
        let u = data.values(&layout);
        assert_eq!(u[4], 1e17 * 500.0);
        let mut back = NodeData::default();
        back.load(&layout, &u);
        assert!((back.tn - 500.0).abs() < 1e-9);
        assert!((back.tp - 320.0).abs() < 1e-9);
        assert_eq!(back.n, 1e17);
    }
}

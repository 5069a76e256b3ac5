use num_dual::DualNum;

use super::fvm::{self, EdgeCtx, FvmKernel, NodeCtx};
use super::{EvalContext, RegionEquations, RegionState};
use crate::assembly::{InsertMode, ParMatrix, ParVector};
use crate::discretization::mesh::FvmNode;
use crate::physics::{KB, KB_OVER_Q, NodeData, Q, SemiconductorMaterial, SolutionVariable, VariableLayout};

/// `x / (exp(x) - 1)`, with the series near zero. The branch is taken on the
/// real part so value and derivative come from the same expression.
pub fn bernoulli<T: DualNum<f64>>(x: T, x_re: f64) -> T {
    if x_re.abs() < 1e-6 {
        T::one() - x.clone() * 0.5 + x.clone() * x / 12.0
    } else {
        x.clone() / x.exp_m1()
    }
}

/// Drift-diffusion with optional lattice heating and carrier energy balance.
#[derive(Debug, Clone)]
pub struct SemiconductorPhysics {
    pub material: SemiconductorMaterial,
    layout: VariableLayout,
    it: Option<usize>,
    itn: Option<usize>,
    itp: Option<usize>,
}

/// Electron and hole currents on an edge, A/cm^2, positive from i to j.
pub struct EdgeCurrents<T> {
    pub jn: T,
    pub jp: T,
}

/// Exponential fitting along one edge for one carrier.
struct Fitting<T> {
    /// Thermal voltage, V.
    vt: T,
    x: T,
    x_re: f64,
}

impl<T: DualNum<f64>> Fitting<T> {
    fn new(dpsi: T, dpsi_re: f64, (t, t_re): (T, f64)) -> Self {
        let vt = t * KB_OVER_Q;
        let x = dpsi / vt.clone();
        let x_re = dpsi_re / (t_re * KB_OVER_Q);
        Self { vt, x, x_re }
    }

    /// `vt (a_j B(x) - a_i B(-x))`
    fn difference(&self, ai: T, aj: T) -> T {
        (aj * bernoulli(self.x.clone(), self.x_re) - ai * bernoulli(-self.x.clone(), -self.x_re)) * self.vt.clone()
    }
}

impl SemiconductorPhysics {
    pub fn new(material: SemiconductorMaterial, layout: VariableLayout) -> Self {
        Self {
            material,
            it: layout.offset(SolutionVariable::Temperature),
            itn: layout.offset(SolutionVariable::ElectronTemperature),
            itp: layout.offset(SolutionVariable::HoleTemperature),
            layout,
        }
    }

    pub fn layout(&self) -> &VariableLayout {
        &self.layout
    }

    fn lattice_temperature<T: DualNum<f64>>(&self, u: &[T], re: &[f64], data: &NodeData) -> (T, f64) {
        match self.it {
            Some(k) => (u[k].clone(), re[k]),
            None => (T::from(data.t), data.t),
        }
    }

    /// Edge average of a carrier temperature stored as a density product,
    /// or the lattice temperature when it is not solved.
    fn carrier_temperature<T: DualNum<f64>>(
        &self,
        slot: Option<usize>,
        density: usize,
        (ui, uj): (&[T], &[T]),
        (re_i, re_j): (&[f64], &[f64]),
        tl: &(T, f64),
    ) -> (T, f64) {
        match slot {
            Some(k) => (
                (ui[k].clone() / ui[density].clone() + uj[k].clone() / uj[density].clone()) * 0.5,
                0.5 * (re_i[k] / re_i[density] + re_j[k] / re_j[density]),
            ),
            None => tl.clone(),
        }
    }

    /// Thermal voltages and Scharfetter-Gummel arguments of an edge for
    /// electrons and holes.
    fn fitting<T: DualNum<f64>>(&self, ui: &[T], uj: &[T], edge: &EdgeCtx) -> (Fitting<T>, Fitting<T>) {
        let tl = self.edge_lattice_temperature(ui, uj, edge);
        let tn = self.carrier_temperature(self.itn, 1, (ui, uj), (edge.ui, edge.uj), &tl);
        let tp = self.carrier_temperature(self.itp, 2, (ui, uj), (edge.ui, edge.uj), &tl);
        let dpsi = uj[0].clone() - ui[0].clone();
        let dpsi_re = edge.uj[0] - edge.ui[0];
        (Fitting::new(dpsi.clone(), dpsi_re, tn), Fitting::new(dpsi, dpsi_re, tp))
    }

    /// Scharfetter-Gummel currents between two nodes.
    pub fn edge_currents<T: DualNum<f64>>(&self, ui: &[T], uj: &[T], edge: &EdgeCtx) -> EdgeCurrents<T> {
        let (fit_n, fit_p) = self.fitting(ui, uj, edge);
        self.currents(ui, uj, edge.distance, &fit_n, &fit_p)
    }

    fn currents<T: DualNum<f64>>(
        &self,
        ui: &[T],
        uj: &[T],
        d: f64,
        fit_n: &Fitting<T>,
        fit_p: &Fitting<T>,
    ) -> EdgeCurrents<T> {
        let jn = fit_n.difference(ui[1].clone(), uj[1].clone()) * (Q * self.material.mu_n / d);
        let jp = fit_p.difference(uj[2].clone(), ui[2].clone()) * (Q * self.material.mu_p / d);
        EdgeCurrents { jn, jp }
    }

    fn edge_lattice_temperature<T: DualNum<f64>>(&self, ui: &[T], uj: &[T], edge: &EdgeCtx) -> (T, f64) {
        let (ti, ti_re) = self.lattice_temperature(ui, edge.ui, edge.di);
        let (tj, tj_re) = self.lattice_temperature(uj, edge.uj, edge.dj);
        ((ti + tj) * 0.5, 0.5 * (ti_re + tj_re))
    }
}

impl FvmKernel for SemiconductorPhysics {
    fn edge_flux<T: DualNum<f64>>(&self, f: &mut [T], ui: &[T], uj: &[T], edge: &EdgeCtx) {
        let d = edge.distance;
        let eps = 0.5 * (edge.di.eps + edge.dj.eps);
        f[0] = (uj[0].clone() - ui[0].clone()) * (eps / d);

        let (fit_n, fit_p) = self.fitting(ui, uj, edge);
        let EdgeCurrents { jn, jp } = self.currents(ui, uj, d, &fit_n, &fit_p);
        f[1] = jn.clone();
        f[2] = -jp.clone();

        // half of the edge's J.E goes to each end
        let half_drop = (ui[0].clone() - uj[0].clone()) * 0.5;

        if let Some(k) = self.it {
            let mut q = (uj[k].clone() - ui[k].clone()) * (self.material.kappa / d);
            if self.itn.is_none() {
                q += jn.clone() * half_drop.clone();
            }
            if self.itp.is_none() {
                q += jp.clone() * half_drop.clone();
            }
            f[k] = q;
        }

        // energy products n Tn and p Tp are fitted like the densities
        if let Some(k) = self.itn {
            let s = -fit_n.difference(ui[k].clone(), uj[k].clone()) * (2.5 * KB * self.material.mu_n / d);
            f[k] = -s + jn * half_drop.clone();
        }

        if let Some(k) = self.itp {
            let s = fit_p.difference(uj[k].clone(), ui[k].clone()) * (2.5 * KB * self.material.mu_p / d);
            f[k] = -s + jp * half_drop;
        }
    }

    fn node_source<T: DualNum<f64>>(&self, f: &mut [T], u: &[T], node: &NodeCtx) {
        let m = &self.material;
        let data = node.data;
        let ni = data.ni;
        let n = u[1].clone();
        let p = u[2].clone();

        f[0] = (p.clone() - n.clone() + data.net_doping) * Q;

        let r = (n.clone() * p.clone() - ni * ni) / ((n.clone() + ni) * m.tau_p + (p + ni) * m.tau_n);
        f[1] = -(r.clone() * Q);
        f[2] = -(r * Q);

        let (tl, _) = self.lattice_temperature(u, node.u, data);
        let mut to_lattice = T::zero();
        if let Some(k) = self.itn {
            let relax = (u[k].clone() - n.clone() * tl.clone()) * (1.5 * KB / m.tau_wn);
            f[k] = -relax.clone();
            to_lattice += relax;
        }
        if let Some(k) = self.itp {
            let relax = (u[k].clone() - u[2].clone() * tl.clone()) * (1.5 * KB / m.tau_wp);
            f[k] = -relax.clone();
            to_lattice += relax;
        }
        if let Some(k) = self.it {
            f[k] = to_lattice;
        }
    }

    fn storage<T: DualNum<f64>>(&self, s: &mut [T], u: &[T], _data: &NodeData) {
        s[0] = T::zero();
        s[1] = u[1].clone() * Q;
        s[2] = u[2].clone() * Q;
        if let Some(k) = self.it {
            s[k] = u[k].clone() * self.material.heat_capacity;
        }
        if let Some(k) = self.itn {
            s[k] = u[k].clone() * (1.5 * KB);
        }
        if let Some(k) = self.itp {
            s[k] = u[k].clone() * (1.5 * KB);
        }
    }

    fn scale(&self, var: SolutionVariable, node: &FvmNode, data: &NodeData) -> f64 {
        match var {
            SolutionVariable::Potential => 1.0 / (data.eps * node.volume),
            SolutionVariable::Electron | SolutionVariable::Hole => 1.0 / (Q * node.volume),
            SolutionVariable::Temperature => 1.0 / (self.material.heat_capacity * node.volume),
            SolutionVariable::ElectronTemperature | SolutionVariable::HoleTemperature => 1.0 / (KB * node.volume),
        }
    }
}

impl RegionEquations for SemiconductorPhysics {
    fn fill_value(&self, region: &RegionState, cx: &EvalContext, x: &mut ParVector, l: &mut ParVector) {
        fvm::fill_value(self, region, cx, x, l);
    }

    fn function(&self, region: &RegionState, cx: &EvalContext, lx: &[f64], f: &mut ParVector, mode: &mut InsertMode) {
        fvm::function(self, region, cx, lx, f, mode);
    }

    fn jacobian(&self, region: &RegionState, cx: &EvalContext, lx: &[f64], jac: &mut ParMatrix, mode: &mut InsertMode) {
        fvm::jacobian(self, region, cx, lx, jac, mode);
    }

    fn time_dependent_function(
        &self,
        region: &RegionState,
        cx: &EvalContext,
        lx: &[f64],
        f: &mut ParVector,
        mode: &mut InsertMode,
    ) {
        fvm::time_dependent_function(self, region, cx, lx, f, mode);
    }

    fn time_dependent_jacobian(
        &self,
        region: &RegionState,
        cx: &EvalContext,
        lx: &[f64],
        jac: &mut ParMatrix,
        mode: &mut InsertMode,
    ) {
        fvm::time_dependent_jacobian(self, region, cx, lx, jac, mode);
    }

    fn update_solution(&self, region: &mut RegionState, cx: &EvalContext, lx: &[f64]) {
        fvm::update_solution(region, cx, lx);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::physics::AdvancedModel;
    use approx::assert_relative_eq;
    use num_dual::DualDVec64;

    fn edge<'a>(ui: &'a [f64], uj: &'a [f64], data: &'a NodeData) -> EdgeCtx<'a> {
        EdgeCtx {
            distance: 1e-5,
            ui,
            uj,
            di: data,
            dj: data,
            t_external: 300.0,
        }
    }

    #[test]
    fn bernoulli_is_smooth_across_the_series_switch() {
        let below: f64 = bernoulli(0.9e-6, 0.9e-6);
        let above: f64 = bernoulli(1.1e-6, 1.1e-6);
        assert_relative_eq!(below, above, epsilon = 1e-9);
        assert_relative_eq!(bernoulli(1.0, 1.0), 1.0 / (1f64.exp() - 1.0), epsilon = 1e-14);
        // B(x) - B(-x) = -x
        assert_relative_eq!(bernoulli(3.0, 3.0) - bernoulli(-3.0, -3.0), -3.0, epsilon = 1e-12);
    }

    #[test]
    fn uniform_density_carries_pure_drift() {
        let layout = VariableLayout::semiconductor(&AdvancedModel::default());
        let phys = SemiconductorPhysics::new(SemiconductorMaterial::silicon(), layout);
        let data = NodeData {
            t: 300.0,
            eps: phys.material.eps(),
            ..Default::default()
        };
        let ui = [0.0, 1e16, 1e16];
        let uj = [0.01, 1e16, 1e16];
        let c = phys.edge_currents(&ui, &uj, &edge(&ui, &uj, &data));
        // field points from j to i, so conventional current flows j -> i
        let e = (ui[0] - uj[0]) / 1e-5;
        assert_relative_eq!(c.jn, Q * phys.material.mu_n * 1e16 * e, max_relative = 1e-10);
        assert_relative_eq!(c.jp, Q * phys.material.mu_p * 1e16 * e, max_relative = 1e-10);
    }

    #[test]
    fn edge_flux_derivatives_match_finite_differences() {
        let layout = VariableLayout::semiconductor(&AdvancedModel::default());
        let phys = SemiconductorPhysics::new(SemiconductorMaterial::silicon(), layout);
        let data = NodeData {
            t: 300.0,
            eps: phys.material.eps(),
            ..Default::default()
        };
        let ui = [0.1, 1e16, 1e4];
        let uj = [0.12, 2e16, 5e3];
        let di = fvm::seed(&ui, 6, 0);
        let dj = fvm::seed(&uj, 6, 3);
        let mut f = vec![DualDVec64::from_re(0.0); 3];
        phys.edge_flux(&mut f, &di, &dj, &edge(&ui, &uj, &data));
        let d_jn = fvm::partials(&f[1], 6);

        let h = 1e-7;
        let mut up = uj;
        up[0] += h;
        let mut fp = [0.0; 3];
        phys.edge_flux(&mut fp, &ui, &up, &edge(&ui, &up, &data));
        let mut f0 = [0.0; 3];
        phys.edge_flux(&mut f0, &ui, &uj, &edge(&ui, &uj, &data));
        assert_relative_eq!(d_jn[3], (fp[1] - f0[1]) / h, max_relative = 1e-4);
    }

    fn hot_carrier_physics() -> SemiconductorPhysics {
        let model = AdvancedModel {
            enable_tn: true,
            enable_tp: true,
            ..Default::default()
        };
        SemiconductorPhysics::new(SemiconductorMaterial::silicon(), VariableLayout::semiconductor(&model))
    }

    #[test]
    fn isothermal_energy_flux_is_convected_with_the_current() {
        let phys = hot_carrier_physics();
        let data = NodeData {
            t: 300.0,
            eps: phys.material.eps(),
            ..Default::default()
        };
        let (n, p) = (1e16, 4e15);
        let ui = [0.0, n, p, n * 300.0, p * 300.0];
        let uj = [0.02, n, p, n * 300.0, p * 300.0];
        let e = edge(&ui, &uj, &data);
        let c = phys.edge_currents(&ui, &uj, &e);
        let mut f = [0.0; 5];
        phys.edge_flux(&mut f, &ui, &uj, &e);

        let half_drop = -0.01;
        assert_relative_eq!(f[3], (2.5 * KB_OVER_Q * 300.0 + half_drop) * c.jn, max_relative = 1e-9);
        assert_relative_eq!(f[4], (-2.5 * KB_OVER_Q * 300.0 + half_drop) * c.jp, max_relative = 1e-9);
    }

    #[test]
    fn field_free_energy_flux_is_heat_conduction() {
        let phys = hot_carrier_physics();
        let data = NodeData {
            t: 300.0,
            eps: phys.material.eps(),
            ..Default::default()
        };
        let n = 1e16;
        let ui = [0.0, n, n, n * 300.0, n * 300.0];
        let uj = [0.0, n, n, n * 400.0, n * 400.0];
        let mut f = [0.0; 5];
        phys.edge_flux(&mut f, &ui, &uj, &edge(&ui, &uj, &data));

        assert_relative_eq!(f[1], 0.0);
        let kappa_n = 2.5 * KB * KB_OVER_Q * phys.material.mu_n * n * 350.0;
        let kappa_p = 2.5 * KB * KB_OVER_Q * phys.material.mu_p * n * 350.0;
        // heat flows from the hot node j into i
        assert_relative_eq!(f[3], kappa_n * 100.0 / 1e-5, max_relative = 1e-9);
        assert_relative_eq!(f[4], kappa_p * 100.0 / 1e-5, max_relative = 1e-9);
    }

    #[test]
    fn boltzmann_edge_carries_no_current_or_energy() {
        let phys = hot_carrier_physics();
        let data = NodeData {
            t: 300.0,
            eps: phys.material.eps(),
            ..Default::default()
        };
        let vt = KB_OVER_Q * 300.0;
        let (n, p) = (1e10, 1e10);
        let dpsi = 0.3;
        let nj = n * (dpsi / vt).exp();
        let pj = p * (-dpsi / vt).exp();
        let ui = [0.0, n, p, n * 300.0, p * 300.0];
        let uj = [dpsi, nj, pj, nj * 300.0, pj * 300.0];
        let mut f = [0.0; 5];
        phys.edge_flux(&mut f, &ui, &uj, &edge(&ui, &uj, &data));

        // one-sided drift scale of the same edge
        let scale = Q * phys.material.mu_n * nj * dpsi / 1e-5;
        for (k, v) in f.iter().enumerate().skip(1) {
            assert!(v.abs() < 1e-9 * scale * 300.0, "flux {k} = {v}");
        }
    }
}

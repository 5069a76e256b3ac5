use glam::DVec3;

/// A control-volume node inside one region. Coincident nodes of different
/// regions share `root` and `owner` but keep their own DOF offsets.
#[derive(Debug, Clone)]
pub struct FvmNode {
    /// Geometric node id, shared across regions at interfaces.
    pub root: usize,
    /// Rank that owns this node's rows.
    pub owner: usize,
    pub volume: f64,
    pub position: DVec3,
    pub neighbors: Vec<Neighbor>,
    /// Control-volume surface lying on the exterior boundary.
    pub boundary_area: f64,
    /// On the exterior boundary or next to a vacuum region.
    pub on_boundary: bool,
    pub global_offset: usize,
    pub local_offset: Option<usize>,
}

/// An edge of the node's control volume.
#[derive(Debug, Clone, Copy)]
pub struct Neighbor {
    /// Index of the neighbor within the same region.
    pub node: usize,
    pub distance: f64,
    /// Area of the control-volume face crossing the edge.
    pub cv_area: f64,
}

impl FvmNode {
    pub fn new(root: usize, position: DVec3, volume: f64) -> Self {
        Self {
            root,
            owner: 0,
            volume,
            position,
            neighbors: Vec::new(),
            boundary_area: 0.0,
            on_boundary: false,
            global_offset: 0,
            local_offset: None,
        }
    }

    /// Local offset of variable `k`; `usize::MAX` for nodes outside this
    /// rank's scatter.
    #[inline]
    pub fn local(&self, k: usize) -> usize {
        self.local_offset.map_or(usize::MAX, |o| o + k)
    }

    /// Least-squares style gradient of a nodal quantity from the edge
    /// differences. Exact for linear fields on symmetric 1-D stencils.
    pub fn gradient(&self, value: impl Fn(usize) -> f64, own: f64, positions: impl Fn(usize) -> DVec3) -> DVec3 {
        if self.neighbors.is_empty() {
            return DVec3::ZERO;
        }
        let mut g = DVec3::ZERO;
        for nb in &self.neighbors {
            let dr = positions(nb.node) - self.position;
            let len2 = dr.length_squared();
            if len2 > 0.0 {
                g += dr * ((value(nb.node) - own) / len2);
            }
        }
        g / self.neighbors.len() as f64
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn central_difference_gradient() {
        let mut node = FvmNode::new(1, DVec3::new(1.0, 0.0, 0.0), 1.0);
        node.neighbors = vec![
            Neighbor { node: 0, distance: 1.0, cv_area: 1.0 },
            Neighbor { node: 2, distance: 1.0, cv_area: 1.0 },
        ];
        let xs = [0.0, 1.0, 2.0];
        let psi = [0.0, 3.0, 6.0];
        let g = node.gradient(|j| psi[j], psi[1], |j| DVec3::new(xs[j], 0.0, 0.0));
        assert!((g.x - 3.0).abs() < 1e-12);
        assert_eq!(g.y, 0.0);
    }
}

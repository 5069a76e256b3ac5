use std::collections::BTreeSet;
use std::ops::Range;

use tracing::debug;

use super::ParVector;
use crate::bc::BoundaryCondition;
use crate::parallel::ExecutionContext;
use crate::region::Region;

/// Global DOF count and the processor-contiguous ownership ranges.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DofLayout {
    pub n_global: usize,
    pub ranges: Vec<Range<usize>>,
    pub rank: usize,
}

impl DofLayout {
    /// Everything owned by a single rank.
    pub fn single(n: usize) -> Self {
        Self {
            n_global: n,
            ranges: vec![0..n],
            rank: 0,
        }
    }

    #[inline]
    pub fn owned_range(&self) -> Range<usize> {
        self.ranges[self.rank].clone()
    }

    #[inline]
    pub fn n_owned(&self) -> usize {
        self.ranges[self.rank].len()
    }
}

/// Global-to-local scatter. Local arrays hold the owned block first, in
/// global order, followed by ghosts in ascending global order, so an owned
/// DOF's local offset equals its global offset minus the range start.
#[derive(Debug, Clone)]
pub struct ScatterContext {
    local_to_global: Vec<usize>,
}

impl ScatterContext {
    pub fn n_local(&self) -> usize {
        self.local_to_global.len()
    }

    pub fn local_to_global(&self) -> &[usize] {
        &self.local_to_global
    }

    /// Collective. Build the owned+ghost local copy of `x`.
    pub fn scatter(&self, exec: &ExecutionContext, x: &ParVector) -> Vec<f64> {
        let global = x.gather_global(exec);
        self.local_to_global.iter().map(|&g| global[g]).collect()
    }
}

#[derive(Debug, Clone)]
pub struct DofMap {
    pub layout: DofLayout,
    pub scatter: ScatterContext,
}

impl DofMap {
    /// Assign global and local offsets to every region node and electrode
    /// unknown. Every rank runs the same deterministic numbering; electrode
    /// and hub unknowns go to the last rank.
    pub fn build(exec: &ExecutionContext, regions: &mut [Region], bcs: &mut [BoundaryCondition]) -> Self {
        let size = exec.size;
        let mut ranges = Vec::with_capacity(size);
        let mut next = 0usize;
        for rank in 0..size {
            let lo = next;
            for region in regions.iter_mut() {
                let m = region.state.layout.n_vars();
                for node in region.state.nodes.iter_mut().filter(|n| n.owner == rank) {
                    node.global_offset = next;
                    next += m;
                }
            }
            if rank + 1 == size {
                for bc in bcs.iter_mut().filter(|bc| bc.has_electrode_dof()) {
                    bc.state.dof = Some(crate::bc::ElectrodeDof {
                        global_offset: next,
                        local_offset: None,
                    });
                    next += 1;
                }
            }
            ranges.push(lo..next);
        }

        let layout = DofLayout {
            n_global: next,
            ranges,
            rank: exec.rank,
        };
        let owned = layout.owned_range();

        let mut ghosts = BTreeSet::new();
        for region in regions.iter() {
            let m = region.state.layout.n_vars();
            let nodes = &region.state.nodes;
            for node in nodes.iter().filter(|n| n.owner == exec.rank) {
                for nb in &node.neighbors {
                    let other = &nodes[nb.node];
                    if other.owner != exec.rank {
                        ghosts.extend(other.global_offset..other.global_offset + m);
                    }
                }
            }
        }
        for bc in bcs.iter() {
            for rn in bc.state.nodes.iter().flat_map(|n| &n.region_nodes) {
                let region = &regions[rn.region];
                let node = &region.state.nodes[rn.node];
                if node.owner != exec.rank {
                    let m = region.state.layout.n_vars();
                    ghosts.extend(node.global_offset..node.global_offset + m);
                }
            }
            if let Some(dof) = bc.state.dof {
                if !owned.contains(&dof.global_offset) {
                    ghosts.insert(dof.global_offset);
                }
            }
        }

        let mut local_to_global: Vec<usize> = owned.clone().collect();
        local_to_global.extend(ghosts.iter().copied());
        let local_of = |g: usize| -> Option<usize> {
            if owned.contains(&g) {
                Some(g - owned.start)
            } else {
                ghosts.iter().position(|&x| x == g).map(|p| owned.len() + p)
            }
        };

        for region in regions.iter_mut() {
            let m = region.state.layout.n_vars();
            for node in region.state.nodes.iter_mut() {
                node.local_offset = if m == 0 { None } else { local_of(node.global_offset) };
            }
        }
        for bc in bcs.iter_mut() {
            if let Some(dof) = bc.state.dof.as_mut() {
                dof.local_offset = local_of(dof.global_offset);
            }
        }
        crate::bc::link_inter_connects(bcs);

        debug!(
            rank = exec.rank,
            n_global = layout.n_global,
            n_owned = layout.n_owned(),
            n_ghost = ghosts.len(),
            "dof map built"
        );

        Self {
            layout,
            scatter: ScatterContext { local_to_global },
        }
    }
}
